use multiview_proto::{SessionCode, SessionRecord, ViewState};
use rand::Rng;
use tracing::debug;

use crate::{DirectoryError, DirectoryResult, SessionDirectory};

/// Collisions are ~1/9000 per attempt, so twenty attempts only run out when
/// the code space is close to full.
pub const DEFAULT_CODE_ATTEMPTS: u32 = 20;

/// Uniform in [1000, 9999].
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> SessionCode {
    SessionCode::from_offset(rng.gen_range(0..=SessionCode::MAX - SessionCode::MIN))
}

/// Picks a code no live record holds and stores `initial` under it.
///
/// Each attempt draws a fresh code; a code reported live, or one that loses an
/// insert race (`Conflict`), consumes an attempt.
pub async fn create_session<D, R>(
    directory: &D,
    initial: ViewState,
    attempts: u32,
    rng: &mut R,
) -> DirectoryResult<SessionRecord>
where
    D: SessionDirectory + ?Sized,
    R: Rng + Send,
{
    for attempt in 1..=attempts {
        let code = generate_code(rng);
        if directory.is_live(code).await? {
            debug!(%code, attempt, "session code already live; retrying");
            continue;
        }
        match directory.insert(code, initial.clone()).await {
            Ok(record) => {
                debug!(%code, attempt, "session record created");
                return Ok(record);
            }
            Err(DirectoryError::Conflict(_)) => {
                debug!(%code, attempt, "session code taken during insert; retrying");
            }
            Err(err) => return Err(err),
        }
    }
    Err(DirectoryError::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use multiview_proto::StatePatch;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Reports a fixed set of codes as live and records inserts.
    struct CollidingDirectory {
        live: HashSet<SessionCode>,
        inserted: Mutex<Vec<SessionCode>>,
        checks: Mutex<u32>,
    }

    impl CollidingDirectory {
        fn new(live: impl IntoIterator<Item = SessionCode>) -> Self {
            Self {
                live: live.into_iter().collect(),
                inserted: Mutex::new(Vec::new()),
                checks: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionDirectory for CollidingDirectory {
        async fn insert(
            &self,
            code: SessionCode,
            state: ViewState,
        ) -> DirectoryResult<SessionRecord> {
            self.inserted.lock().await.push(code);
            Ok(SessionRecord::new(code, state))
        }

        async fn get(&self, code: SessionCode) -> DirectoryResult<SessionRecord> {
            Err(DirectoryError::NotFound(code))
        }

        async fn is_live(&self, code: SessionCode) -> DirectoryResult<bool> {
            *self.checks.lock().await += 1;
            Ok(self.live.contains(&code))
        }

        async fn replace(&self, code: SessionCode, _: StatePatch) -> DirectoryResult<SessionRecord> {
            Err(DirectoryError::NotFound(code))
        }

        async fn delete(&self, _: SessionCode) -> DirectoryResult<()> {
            Ok(())
        }
    }

    fn first_codes(seed: u64, count: usize) -> Vec<SessionCode> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| generate_code(&mut rng)).collect()
    }

    #[test_timeout::timeout]
    fn generated_codes_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let code = generate_code(&mut rng).value();
            assert!((1000..=9999).contains(&code));
        }
    }

    #[tokio::test]
    async fn retries_past_live_codes() {
        let sequence = first_codes(42, 30);
        let live: HashSet<SessionCode> = sequence[..3].iter().copied().collect();
        let (position, expected) = sequence
            .iter()
            .enumerate()
            .find(|(_, code)| !live.contains(code))
            .map(|(position, code)| (position, *code))
            .unwrap();
        let directory = CollidingDirectory::new(live);
        let mut rng = StdRng::seed_from_u64(42);

        let record = create_session(&directory, ViewState::new(), DEFAULT_CODE_ATTEMPTS, &mut rng)
            .await
            .unwrap();

        assert_eq!(record.code, expected);
        assert_eq!(*directory.checks.lock().await, position as u32 + 1);
        assert_eq!(*directory.inserted.lock().await, vec![expected]);
    }

    #[tokio::test]
    async fn exhausts_after_every_attempt_collides() {
        let directory = CollidingDirectory::new(first_codes(9, DEFAULT_CODE_ATTEMPTS as usize));
        let mut rng = StdRng::seed_from_u64(9);

        let err = create_session(&directory, ViewState::new(), DEFAULT_CODE_ATTEMPTS, &mut rng)
            .await
            .unwrap_err();

        assert_eq!(err, DirectoryError::Exhausted { attempts: 20 });
        assert_eq!(*directory.checks.lock().await, 20);
        assert!(directory.inserted.lock().await.is_empty());
    }
}
