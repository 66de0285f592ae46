use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multiview_proto::SessionCode;
use session_directory::{DirectoryError, HttpDirectory, SessionDirectory};

#[derive(Parser, Debug)]
#[command(name = "multiview-relay")]
#[command(about = "Multiview session relay and inspection client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay (default when no command is given)
    Serve {
        /// Overrides MULTIVIEW_RELAY_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the record stored for a session code
    Inspect {
        /// Four-digit session code
        code: String,

        /// Relay base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
}

pub async fn run_inspect(url: &str, code: &str) -> Result<()> {
    let code: SessionCode = code.parse()?;
    let directory = HttpDirectory::new(url);
    match directory.get(code).await {
        Ok(record) => {
            let pretty = serde_json::to_string_pretty(&record).context("encode record")?;
            println!("{pretty}");
            Ok(())
        }
        Err(DirectoryError::NotFound(_)) => {
            anyhow::bail!("no live session {code} at {}", directory.base_url())
        }
        Err(err) => Err(err).with_context(|| format!("fetch session {code}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_optional() {
        let cli = Cli::try_parse_from(["multiview-relay"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["multiview-relay", "serve", "--port", "9000"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { port: Some(9000) })));
    }

    #[test]
    fn inspect_takes_code_and_url() {
        let cli =
            Cli::try_parse_from(["multiview-relay", "inspect", "4821", "-u", "http://relay:80"])
                .unwrap();
        match cli.command {
            Some(Commands::Inspect { code, url }) => {
                assert_eq!(code, "4821");
                assert_eq!(url, "http://relay:80");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn inspect_rejects_malformed_codes_before_connecting() {
        assert!(run_inspect("http://127.0.0.1:9", "48").await.is_err());
    }
}
