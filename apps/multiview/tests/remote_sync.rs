use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use multiview_proto::{
    FeedRef, Message, ModelError, Schedule, SessionCode, SessionRecord, SlotIndex, Slots,
    StatePatch, ViewOrder, ViewState,
};
use multiview_remote::{
    BusConnector, ChannelTransport, ConnectionState, ControlledHandle, ControlledSession,
    ControllingSession, RecordingSurface, RolePhase, SessionError, SurfaceCall,
    TransportConnector, TransportEvent,
};
use session_directory::{DirectoryError, DirectoryResult, MemoryDirectory, SessionDirectory};
use tokio::sync::watch;
use transport_bus::Bus;

type TestResult = Result<(), Box<dyn Error>>;

const WAIT: Duration = Duration::from_secs(5);

fn feed(id: &str) -> FeedRef {
    FeedRef::new(id, id.to_uppercase(), format!("https://embed.example/{id}"))
}

fn code(raw: &str) -> SessionCode {
    raw.parse().unwrap()
}

struct Harness {
    directory: Arc<MemoryDirectory>,
    connector: BusConnector,
    surface: Arc<RecordingSurface>,
}

impl Harness {
    fn new() -> Self {
        Self {
            directory: MemoryDirectory::new(),
            connector: BusConnector::default(),
            surface: Arc::new(RecordingSurface::new()),
        }
    }

    fn display(&self) -> ControlledSession {
        ControlledSession::new(self.directory.clone(), Arc::new(self.connector.clone()))
            .with_surface(self.surface.clone())
            .with_client_id("display")
    }

    fn remote(&self) -> ControllingSession {
        ControllingSession::new(Arc::new(self.connector.clone()))
            .with_directory(self.directory.clone())
            .with_client_id("remote")
    }

    async fn activate(&self, raw_code: &str) -> ControlledHandle {
        self.display()
            .with_preferred_code(code(raw_code))
            .activate(ViewState::new())
            .await
            .expect("display activates")
    }

    /// A bare channel member standing in for a controlling device.
    async fn peer(&self, raw_code: &str, client_id: &str) -> Box<dyn ChannelTransport> {
        let channel = multiview_proto::channel_name(code(raw_code));
        self.connector
            .open(&channel, client_id)
            .await
            .expect("peer attaches")
    }
}

async fn next_message(transport: &mut Box<dyn ChannelTransport>) -> Message {
    tokio::time::timeout(WAIT, async {
        loop {
            match transport.next_event().await {
                Some(TransportEvent::Message { message, .. }) => return message,
                Some(_) => continue,
                None => panic!("channel member closed"),
            }
        }
    })
    .await
    .expect("message within deadline")
}

async fn next_state_update(transport: &mut Box<dyn ChannelTransport>) -> ViewState {
    loop {
        if let Message::StateUpdate(state) = next_message(transport).await {
            return state;
        }
    }
}

async fn next_pushed_state(transport: &mut Box<dyn ChannelTransport>) -> ViewState {
    loop {
        if let Message::UpdateState(state) = next_message(transport).await {
            return state;
        }
    }
}

fn fullscreen_calls(surface: &RecordingSurface) -> Vec<Option<SlotIndex>> {
    surface
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            SurfaceCall::Fullscreen(slot) => Some(slot),
            _ => None,
        })
        .collect()
}

fn schedule(id: &str, name: &str, hour: u32, feed_id: &str) -> Schedule {
    let mut selected_events = Slots::new();
    selected_events.set(SlotIndex::new(0).unwrap(), Some(feed(feed_id)));
    Schedule {
        id: id.into(),
        name: name.into(),
        activate_at: Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap(),
        selected_events,
        view_order: ViewOrder::identity(),
    }
}

async fn wait_for_state<F>(rx: &mut watch::Receiver<ViewState>, predicate: F) -> ViewState
where
    F: FnMut(&ViewState) -> bool,
{
    tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("state within deadline")
        .expect("state channel open")
        .clone()
}

#[tokio::test]
async fn join_after_edits_receives_current_state() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("4821").await;
    assert_eq!(display.code(), code("4821"));
    assert_eq!(display.phase(), RolePhase::Active);

    display.set_slot(0, Some(feed("a"))).await?;
    display.set_order(vec![0, 1, 2, 3, 4, 5, 6, 7, 8]).await?;

    let remote = harness.remote().join("4821").await?;
    assert_eq!(remote.phase(), RolePhase::Active);

    let state = remote.state();
    assert_eq!(state.selected_events.get(SlotIndex::new(0)?), Some(&feed("a")));
    assert_eq!(state.count_occupied(), 1);
    assert_eq!(state.view_order, ViewOrder::identity());
    assert_eq!(state, display.state());

    let record = harness.directory.get(code("4821")).await?;
    assert_eq!(record.state, display.state());

    remote.terminate().await?;
    display.end().await?;
    Ok(())
}

#[test_timeout::tokio_timeout_test(paused)]
async fn unknown_code_times_out_back_to_idle() {
    let harness = Harness::new();
    let session = harness.remote();
    let phase = session.subscribe_phase();

    let started = tokio::time::Instant::now();
    let result = session.join("9999").await;

    assert!(matches!(result, Err(SessionError::ConnectionTimeout(t)) if t == Duration::from_secs(10)));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(*phase.borrow(), RolePhase::Idle);
    assert!(harness
        .connector
        .bus()
        .members(&multiview_proto::channel_name(code("9999")))
        .is_empty());
}

#[tokio::test]
async fn malformed_code_is_rejected_before_attaching() {
    let harness = Harness::new();
    let result = harness.remote().join("48a1").await;
    assert!(matches!(result, Err(SessionError::InvalidCode(raw)) if raw == "48a1"));
}

#[tokio::test]
async fn reload_passes_through_exactly_once() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("1234").await;
    display.set_slot(2, Some(feed("b"))).await?;
    let before = display.state();
    let record_before = harness.directory.get(code("1234")).await?;

    let mut peer = harness.peer("1234", "remote").await;
    // Answer to the peer's own arrival.
    assert_eq!(next_state_update(&mut peer).await, before);
    peer.publish(&Message::Reload(SlotIndex::new(2)?)).await?;
    peer.publish(&Message::RequestInitialState).await?;
    // The display answers in publish order, so the reload has been handled.
    let reported = next_state_update(&mut peer).await;

    assert_eq!(harness.surface.reloads(), vec![SlotIndex::new(2)?]);
    assert_eq!(display.state(), before);
    assert_eq!(reported, before);
    assert_eq!(harness.directory.get(code("1234")).await?, record_before);

    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn repeated_update_state_is_idempotent() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("2345").await;

    let mut pushed = ViewState::new();
    pushed.set_slot(4, Some(feed("c")))?;
    pushed.set_order(&[4])?;
    pushed.set_gap(0)?;

    let mut peer = harness.peer("2345", "remote").await;
    assert_eq!(next_state_update(&mut peer).await, ViewState::new());
    peer.publish(&Message::UpdateState(pushed.clone())).await?;
    let once = next_state_update(&mut peer).await;
    peer.publish(&Message::UpdateState(pushed.clone())).await?;
    let twice = next_state_update(&mut peer).await;

    assert_eq!(once, pushed);
    assert_eq!(twice, once);
    assert_eq!(display.state(), pushed);
    assert_eq!(harness.directory.get(code("2345")).await?.state, pushed);

    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn late_joiner_converges_on_republish() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("3456").await;

    let mut first = ViewState::new();
    first.set_slot(0, Some(feed("a")))?;
    let mut writer = harness.peer("3456", "remote-early").await;
    writer.publish(&Message::UpdateState(first)).await?;

    let mut latest = ViewState::new();
    latest.set_slot(1, Some(feed("z")))?;
    latest.set_chat_enabled(true);

    // Joins after the first push and never asks for state.
    let mut late = harness.peer("3456", "remote-late").await;
    writer.publish(&Message::UpdateState(latest.clone())).await?;

    let converged = tokio::time::timeout(WAIT, async {
        loop {
            if next_state_update(&mut late).await == latest {
                return;
            }
        }
    })
    .await;
    assert!(converged.is_ok(), "late joiner never saw the latest state");
    assert_eq!(display.state(), latest);

    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn fullscreen_is_exclusive_across_roles() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("4567").await;
    let remote = harness.remote().join("4567").await?;

    let k = SlotIndex::new(1)?;
    let j = SlotIndex::new(6)?;
    assert_eq!(remote.toggle_fullscreen(k).await?, Some(k));
    assert_eq!(remote.set_fullscreen(Some(j)).await?, Some(j));

    let mut display_state = display.subscribe_state();
    let settled = wait_for_state(&mut display_state, |s| s.fullscreen_index == Some(j)).await;
    let mut remote_state = remote.subscribe_state();
    let mirrored = wait_for_state(&mut remote_state, |s| *s == settled).await;
    assert_eq!(mirrored.fullscreen_index, Some(j));

    assert_eq!(fullscreen_calls(&harness.surface), vec![Some(k), Some(j)]);
    assert_eq!(
        harness.directory.get(code("4567")).await?.state.fullscreen_index,
        Some(j)
    );

    remote.terminate().await?;
    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn clearing_the_fullscreen_window_exits_fullscreen() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("3141").await;
    let remote = harness.remote().join("3141").await?;
    let slot = SlotIndex::new(3)?;

    remote.set_slot(3, Some(feed("a"))).await?;
    assert_eq!(remote.toggle_fullscreen(slot).await?, Some(slot));
    let mut display_state = display.subscribe_state();
    wait_for_state(&mut display_state, |s| s.fullscreen_index == Some(slot)).await;

    // The clear travels as a full updateState, not a toggle.
    remote.set_slot(3, None).await?;
    let cleared = wait_for_state(&mut display_state, |s| s.fullscreen_index.is_none()).await;

    assert_eq!(cleared.count_occupied(), 0);
    assert_eq!(fullscreen_calls(&harness.surface), vec![Some(slot), None]);
    assert_eq!(
        harness.directory.get(code("3141")).await?.state.fullscreen_index,
        None
    );

    remote.terminate().await?;
    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn restored_fullscreen_is_rendered_on_activation() -> TestResult {
    let harness = Harness::new();
    let slot = SlotIndex::new(2)?;
    let mut restored = ViewState::new();
    restored.set_slot(2, Some(feed("a")))?;
    restored.set_fullscreen(Some(slot));

    let display = harness
        .display()
        .with_preferred_code(code("1414"))
        .activate(restored.clone())
        .await?;

    assert_eq!(harness.surface.last_applied(), Some(restored));
    assert_eq!(fullscreen_calls(&harness.surface), vec![Some(slot)]);

    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn schedules_and_layout_reach_display_and_directory() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("2718").await;
    let remote = harness.remote().join("2718").await?;

    let evening = schedule("s-evening", "Evening", 19, "a");
    let late = schedule("s-late", "Late", 22, "b");
    remote
        .replace_schedules(vec![evening.clone(), late.clone()])
        .await?;

    let mut prime_time = evening.clone();
    prime_time.name = "Prime time".into();
    prime_time.activate_at = Utc.with_ymd_and_hms(2026, 3, 14, 20, 30, 0).unwrap();
    remote.upsert_schedule(prime_time.clone()).await?;
    assert_eq!(remote.remove_schedule("s-late").await?, Some(late));
    assert_eq!(remote.remove_schedule("s-late").await?, None);

    remote.set_gap(12).await?;
    remote.set_chat_enabled(true).await?;

    let mut display_state = display.subscribe_state();
    let settled = wait_for_state(&mut display_state, |s| s.layout.chat_enabled()).await;
    assert_eq!(settled.schedules.iter().collect::<Vec<_>>(), vec![&prime_time]);
    assert_eq!(settled.layout.gap(), 12);

    let record = harness.directory.get(code("2718")).await?;
    assert_eq!(record.state, settled);
    assert_eq!(
        record.state.schedules.get("s-evening").map(|s| s.activate_at),
        Some(prime_time.activate_at)
    );

    let mut remote_state = remote.subscribe_state();
    wait_for_state(&mut remote_state, |s| *s == settled).await;

    remote.terminate().await?;
    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn stale_snapshot_does_not_roll_back_remote_edits() -> TestResult {
    let harness = Harness::new();
    let mut display = harness.peer("1618", "display").await;
    let joining = tokio::spawn(harness.remote().join("1618"));

    assert_eq!(next_message(&mut display).await, Message::RequestInitialState);
    let initial = ViewState::new();
    display
        .publish(&Message::StateUpdate(initial.clone()))
        .await?;
    let remote = joining.await??;

    remote.set_gap(12).await?;
    let first = next_pushed_state(&mut display).await;
    assert_eq!(first.layout.gap(), 12);

    // A greeting sent before the push was handled, then the real echo.
    display.publish(&Message::StateUpdate(initial)).await?;
    display.publish(&Message::StateUpdate(first.clone())).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(remote.state(), first);

    remote.set_chat_enabled(true).await?;
    let second = next_pushed_state(&mut display).await;
    assert_eq!(second.layout.gap(), 12);
    assert!(second.layout.chat_enabled());
    assert_eq!(remote.state(), second);

    remote.terminate().await?;
    Ok(())
}

#[tokio::test]
async fn remote_edits_reach_display_and_directory() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("5678").await;
    let remote = harness.remote().join("5678").await?;

    let placed = remote.place_feed(feed("a")).await?;
    assert_eq!(placed, SlotIndex::new(0)?);
    remote.set_border_color("white").await?;

    assert_eq!(
        remote.set_slot(9, Some(feed("x"))).await,
        Err(SessionError::Model(ModelError::SlotOutOfRange(9)))
    );
    assert_eq!(
        remote.set_gap(40).await,
        Err(SessionError::Model(ModelError::GapOutOfRange(40)))
    );

    let mut display_state = display.subscribe_state();
    let settled = wait_for_state(&mut display_state, |s| {
        s.count_occupied() == 1 && s.layout.border_color().as_str() == "white"
    })
    .await;
    let mut remote_state = remote.subscribe_state();
    wait_for_state(&mut remote_state, |s| *s == settled).await;
    assert_eq!(harness.surface.last_applied(), Some(settled.clone()));
    assert_eq!(harness.directory.get(code("5678")).await?.state, settled);

    remote.terminate().await?;
    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn display_transport_loss_ends_session() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("6789").await;
    let mut phase = display.subscribe_phase();

    assert!(harness.connector.interrupt("display", ConnectionState::Suspended));
    let outcome = tokio::time::timeout(WAIT, display.wait()).await?;

    assert!(matches!(outcome, Err(SessionError::TransportLost(_))));
    assert_eq!(*phase.borrow_and_update(), RolePhase::Ended);
    assert_eq!(
        harness.directory.get(code("6789")).await,
        Err(DirectoryError::NotFound(code("6789")))
    );
    Ok(())
}

#[tokio::test]
async fn remote_transport_loss_ends_remote_only() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("7890").await;
    let remote = harness.remote().join("7890").await?;

    assert!(harness.connector.interrupt("remote", ConnectionState::Failed));
    let outcome = tokio::time::timeout(WAIT, remote.wait()).await?;
    assert!(matches!(outcome, Err(SessionError::TransportLost(_))));

    assert_eq!(display.phase(), RolePhase::Active);
    assert!(harness.directory.is_live(code("7890")).await?);
    display.end().await?;
    Ok(())
}

#[tokio::test]
async fn terminate_deletes_record_and_releases_channel() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("8901").await;
    let remote = harness.remote().join("8901").await?;
    let channel = multiview_proto::channel_name(code("8901"));
    assert_eq!(harness.connector.bus().members(&channel).len(), 2);

    remote.terminate().await?;
    assert!(!harness.directory.is_live(code("8901")).await?);
    assert_eq!(
        harness.connector.bus().members(&channel),
        vec!["display".to_string()]
    );

    display.end().await?;
    assert!(harness.connector.bus().members(&channel).is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_record_ends_display() -> TestResult {
    let harness = Harness::new();
    let display = harness.activate("1001").await;
    harness.directory.delete(code("1001")).await?;

    assert_eq!(
        display.set_gap(8).await,
        Err(SessionError::SessionNotFound(code("1001")))
    );
    let outcome = tokio::time::timeout(WAIT, display.wait()).await?;
    assert_eq!(outcome, Err(SessionError::SessionNotFound(code("1001"))));
    Ok(())
}

#[tokio::test]
async fn preferred_code_falls_back_when_live() -> TestResult {
    let harness = Harness::new();
    let first = harness.activate("4321").await;
    let second = harness
        .display()
        .with_client_id("display-2")
        .with_preferred_code(code("4321"))
        .activate(ViewState::new())
        .await?;

    assert_ne!(second.code(), first.code());
    assert!(harness.directory.is_live(second.code()).await?);

    second.end().await?;
    first.end().await?;
    Ok(())
}

/// Reports every code as taken.
struct FullDirectory;

#[async_trait]
impl SessionDirectory for FullDirectory {
    async fn insert(&self, code: SessionCode, _state: ViewState) -> DirectoryResult<SessionRecord> {
        Err(DirectoryError::Conflict(code))
    }

    async fn get(&self, code: SessionCode) -> DirectoryResult<SessionRecord> {
        Ok(SessionRecord::new(code, ViewState::new()))
    }

    async fn replace(&self, code: SessionCode, _patch: StatePatch) -> DirectoryResult<SessionRecord> {
        Err(DirectoryError::NotFound(code))
    }

    async fn delete(&self, _code: SessionCode) -> DirectoryResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn exhausted_code_space_returns_to_idle() {
    let session = ControlledSession::new(Arc::new(FullDirectory), Arc::new(BusConnector::default()));
    let phase = session.subscribe_phase();

    let result = session.activate(ViewState::new()).await;
    assert!(matches!(
        result,
        Err(SessionError::SessionCreationExhausted { attempts: 20 })
    ));
    assert_eq!(*phase.borrow(), RolePhase::Idle);
}
