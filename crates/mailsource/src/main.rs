//! `mailsource` - retrieves mail from an IMAP or POP3 store and writes one
//! JSON record per message to stdout.
//!
//! Usage: `mailsource [config.json]`. Without an argument the path comes
//! from `MAIL_SOURCE_CONFIG` or the user configuration directory.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod config;
mod sink;
mod trigger;

use std::io;

use anyhow::Context;
use mailsource_core::MailSourceFlow;
use mailsource_store::Receiver;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::sink::JsonLinesSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries records
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailsource=info,mailsource_core=info,mailsource_store=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let path = config::config_path(
        std::env::args().nth(1),
        std::env::var(config::CONFIG_ENV).ok(),
    )
    .context("No configuration path given and no user configuration directory")?;
    let config = config::load(&path)?;

    info!(config = %path.display(), "Starting mail source");

    let flow = MailSourceFlow::configure(&config.mail).context("Invalid mail source settings")?;
    let receiver = Receiver::for_strategy(flow.url(), flow.strategy(), config.idle.settings())
        .context("Invalid protocol properties")?;

    let mut sink = JsonLinesSink::new(io::stdout());

    // The trigger finishes in-flight work before it returns
    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    trigger::run(&flow, &receiver, &config.trigger, &mut sink, shutdown).await
}
