//! Node authentication console.
//!
//! Reads one command per line from stdin and runs it against a software
//! secure element. Type `help` for the command list.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use nodeauth_core::Config;
use nodeauth_identity::{AuthSession, Orchestrator, SoftwareSecureElement};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod command;
mod console;

use console::{write_help, Console, PROMPT};

const CONFIG_ENV: &str = "NODEAUTH_CONFIG";

/// `--config <path>`, then `NODEAUTH_CONFIG`.
fn config_path(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    if let Some(index) = args.iter().position(|arg| arg == "--config") {
        let path = args
            .get(index + 1)
            .context("--config requires a path argument")?;
        return Ok(Some(PathBuf::from(path)));
    }
    Ok(std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

fn load_config(args: &[String]) -> anyhow::Result<Config> {
    match config_path(args)? {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = load_config(&args)?;
    nodeauth_core::logging::init(&config.logging);

    let session = AuthSession::from_config(SoftwareSecureElement::new(), &config)
        .context("invalid trust configuration")?;
    info!(
        root_key_configured = session.store().root_public_key().is_some(),
        timeout_ms = config.element.operation_timeout_ms,
        "STATUS: NodeAuthConsole :: starting"
    );

    let mut console = Console::new(Orchestrator::new(session));

    let mut stdout = std::io::stdout();
    write_help(&mut stdout)?;
    write!(stdout, "{PROMPT}")?;
    stdout.flush()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        console.execute(&line, &mut stdout).await?;
        write!(stdout, "{PROMPT}")?;
        stdout.flush()?;
    }

    info!(
        state = ?console.orchestrator().state(),
        "STATUS: NodeAuthConsole :: input closed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn test_config_flag_takes_precedence() {
        let path = config_path(&args(&["node-auth-console", "--config", "/etc/nodeauth.toml"]))
            .unwrap();
        assert_eq!(path, Some(PathBuf::from("/etc/nodeauth.toml")));
    }

    #[test]
    fn test_config_flag_requires_value() {
        assert!(config_path(&args(&["node-auth-console", "--config"])).is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = load_config(&args(&[
            "node-auth-console",
            "--config",
            "/nonexistent/nodeauth.toml",
        ]));
        assert!(result.is_err());
    }
}
