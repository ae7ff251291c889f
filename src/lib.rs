pub mod ai;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod session;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use ai::gemini::GeminiGateway;
use ai::GatewayHandle;
use config::{GatewayConfig, SettingsStore};
use session::{ChatDrawer, PanelController};

pub use ai::{LoreEntry, ModelGateway};
pub use error::AgentError;

/// `GEMINI_AGENT_CONFIG_DIR` overrides the platform config directory.
fn settings_dir() -> PathBuf {
    std::env::var("GEMINI_AGENT_CONFIG_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(SettingsStore::default_dir)
}

pub async fn run() -> anyhow::Result<()> {
    env_logger::init();

    // ─── State ───────────────────────────────────────────────────────────
    let settings = SettingsStore::load(&settings_dir());
    log::info!("Settings loaded from {}", settings.path().display());
    let settings = settings.into_state();

    let gateway_config = GatewayConfig::from_env();
    if gateway_config.api_key.is_empty() {
        log::warn!("No GEMINI_API_KEY in the environment; requests will fail until it is set");
    }
    let gateway: GatewayHandle = Arc::new(GeminiGateway::new(gateway_config, settings.clone()));
    let recognizer = ai::stt::detect_recognizer(gateway.clone());

    let shell = cli::Shell {
        settings,
        panel: PanelController::new().into_state(),
        drawer: ChatDrawer::new().into_state(),
        gateway,
        recognizer,
    };

    log::info!(
        "Gemini Agent initialized (voice input {})",
        if shell.recognizer.is_some() { "on" } else { "off" }
    );

    // ─── REPL ────────────────────────────────────────────────────────────
    if let Some(greeting) = shell.drawer.lock().messages().first() {
        println!("Gemini Agent: {}", greeting.content);
    }
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("flushing stdout")?;

        let Some(line) = lines.next_line().await.context("reading stdin")? else {
            break;
        };
        match shell.handle_line(&line).await {
            cli::Outcome::Continue(output) if output.is_empty() => {}
            cli::Outcome::Continue(output) => println!("{}", output),
            cli::Outcome::Quit => break,
        }
    }

    log::info!("Gemini Agent exiting");
    Ok(())
}
