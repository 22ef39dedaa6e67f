//! Assistant Portal - terminal front end for streaming chat assistants
//!
//! Each assistant lives behind its own HTTP backend. The portal keeps one
//! conversation session per thread, posts turns to the backend's run-stream
//! endpoint and renders the reply as it arrives.

use std::sync::Arc;

use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod client;
mod config;
mod conversation;
mod core;
mod render;
mod stream;

use cli::Repl;
use client::AssistantClient;
use config::Config;
use crate::core::ConversationSession;
use render::TerminalRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assistant_portal=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    let portal = config.load_portal()?;

    let assistant_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.assistant.clone());
    let assistant = portal
        .assistant(&assistant_id)
        .cloned()
        .ok_or_else(|| {
            let known: Vec<&str> = portal.assistants.iter().map(|a| a.id.as_str()).collect();
            anyhow::anyhow!(
                "Unknown assistant '{}' (available: {})",
                assistant_id,
                known.join(", ")
            )
        })?;

    let client = Arc::new(AssistantClient::from_config(&config, &portal, &assistant)?);
    tracing::info!(
        "Loaded {} assistant(s), using {} ({:?})",
        portal.assistants.len(),
        assistant.id,
        assistant.format
    );

    let renderer = Arc::new(TerminalRenderer::new(std::io::stdout(), assistant.id.clone()));
    let session = {
        let renderer = Arc::clone(&renderer);
        ConversationSession::new(client.clone()).with_listener(move |event| renderer.render(event))
    };

    let repl = Repl {
        session: Arc::new(session),
        client,
        portal,
        assistant,
    };
    repl.run(BufReader::new(tokio::io::stdin())).await?;

    Ok(())
}
