use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multiview_proto::{SessionCode, ViewState};
use session_directory::HttpDirectory;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use multiview_remote::cli::{describe, parse_line, LineCommand, ParseError, HELP};
use multiview_remote::config::normalize_relay_url;
use multiview_remote::store::ViewStore;
use multiview_remote::telemetry::{init_tracing, DEFAULT_FILTER};
use multiview_remote::{
    ControlledSession, ControllingSession, JsonFileStore, LogSurface, NoopStore, RemoteConfig,
    RoleControls, WebSocketConnector,
};

#[derive(Parser, Debug)]
#[command(name = "multiview")]
#[command(about = "Multiview display and remote control")]
struct Cli {
    /// Relay base URL (overrides MULTIVIEW_RELAY_URL)
    #[arg(long, global = true)]
    relay: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the display and print a code for the remote
    Display {
        /// Persist the view here (overrides MULTIVIEW_STATE_FILE)
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Ask for a specific four-digit code
        #[arg(long)]
        code: Option<String>,
    },
    /// Control a running display
    Remote {
        /// Code shown on the display
        code: String,

        /// Seconds to wait for the display's state
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(DEFAULT_FILTER);
    let cli = Cli::parse();

    let mut config = RemoteConfig::from_env();
    if let Some(relay) = cli.relay {
        config.relay_url = normalize_relay_url(&relay);
    }

    match cli.command {
        Commands::Display { state_file, code } => {
            if let Some(path) = state_file {
                config.state_file = Some(path);
            }
            run_display(config, code).await
        }
        Commands::Remote { code, timeout } => {
            if let Some(secs) = timeout {
                config.connect_timeout = Duration::from_secs(secs.max(1));
            }
            run_remote(config, code).await
        }
    }
}

async fn run_display(config: RemoteConfig, code: Option<String>) -> Result<()> {
    let directory = Arc::new(HttpDirectory::new(&config.relay_url));
    let connector = Arc::new(WebSocketConnector::new(&config));

    let store: Arc<dyn ViewStore> = match &config.state_file {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(NoopStore),
    };
    let initial = match store.load().await {
        Ok(Some(state)) => state,
        Ok(None) => ViewState::new(),
        Err(err) => {
            warn!(error = %err, "ignoring unreadable saved view");
            ViewState::new()
        }
    };

    let mut session = ControlledSession::new(directory, connector)
        .configure(&config)
        .with_surface(Arc::new(LogSurface))
        .with_store(store);
    if let Some(raw) = code {
        let code: SessionCode = raw.parse().context("invalid --code")?;
        session = session.with_preferred_code(code);
    }

    let handle = session.activate(initial).await?;
    println!("Session code: {}", handle.code());
    println!("{HELP}");

    let outcome = tokio::select! {
        quit = command_loop(handle.controls()) => quit,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    if let Err(err) = outcome {
        warn!(error = %err, "display command loop stopped");
    }
    handle.end().await?;
    info!("display stopped");
    Ok(())
}

async fn run_remote(config: RemoteConfig, code: String) -> Result<()> {
    let directory = Arc::new(HttpDirectory::new(&config.relay_url));
    let connector = Arc::new(WebSocketConnector::new(&config));

    let handle = ControllingSession::new(connector)
        .configure(&config)
        .with_directory(directory)
        .join(&code)
        .await?;
    println!("Connected to {}", handle.code());
    println!("{}", describe(&handle.state()));
    println!("{HELP}");

    command_loop(handle.controls()).await?;
    handle.terminate().await?;
    Ok(())
}

/// Reads stdin until `quit`, EOF or the session ending.
async fn command_loop(controls: &RoleControls) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut phase = controls.subscribe_phase();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = phase.wait_for(|phase| phase.is_terminal()) => {
                println!("session ended");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        let result = match command {
            LineCommand::Set { slot, feed } => controls.set_slot(slot, Some(feed)).await,
            LineCommand::Clear { slot } => controls.set_slot(slot, None).await,
            LineCommand::Order(prefix) => controls.set_order(prefix).await,
            LineCommand::Gap(gap) => controls.set_gap(gap).await,
            LineCommand::Color(color) => controls.set_border_color(color).await,
            LineCommand::Chat(enabled) => controls.set_chat_enabled(enabled).await,
            LineCommand::Fullscreen(slot) => controls.set_fullscreen(slot).await.map(|_| ()),
            LineCommand::Reload(slot) => controls.reload(slot).await,
            LineCommand::Show => {
                println!("{}", describe(&controls.state()));
                Ok(())
            }
            LineCommand::Quit => return Ok(()),
        };
        if let Err(err) = result {
            println!("error: {err}");
        }
    }
}
