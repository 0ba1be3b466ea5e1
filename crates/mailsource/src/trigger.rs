//! Drives the receiver: a fixed-delay poll loop, or the IDLE event loop.

use anyhow::Context;
use mailsource_core::{MailSourceFlow, RecordSink};
use mailsource_store::{ImapIdleReceiver, Receiver};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::config::TriggerProperties;

/// Messages buffered between the idle receiver and the flow.
const IDLE_CHANNEL_CAPACITY: usize = 64;

/// Runs until `shutdown` turns `true` or a record cannot be published.
///
/// Shutdown is only observed between polls, so messages a poll already
/// flagged on the server are always published. In idle mode the channel is
/// closed and whatever the receiver already handed over is drained.
///
/// # Errors
///
/// Returns the sink's error. Retrieval failures are logged and retried.
pub async fn run<S>(
    flow: &MailSourceFlow,
    receiver: &Receiver,
    trigger: &TriggerProperties,
    sink: &mut S,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: RecordSink + ?Sized,
{
    match receiver {
        Receiver::ImapIdle(idle) => run_idle(flow, idle, sink, shutdown).await,
        Receiver::ImapPoll(_) | Receiver::Pop3Poll(_) => {
            run_polling(flow, receiver, trigger, sink, shutdown).await
        }
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|&stop| stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn run_polling<S>(
    flow: &MailSourceFlow,
    receiver: &Receiver,
    trigger: &TriggerProperties,
    sink: &mut S,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: RecordSink + ?Sized,
{
    info!(
        every = ?trigger.fixed_delay(),
        max_messages = trigger.max_messages,
        "Polling"
    );
    tokio::select! {
        () = tokio::time::sleep(trigger.initial_delay()) => {}
        () = stopped(&mut shutdown) => return Ok(()),
    }

    loop {
        match receiver.poll(trigger.limit()).await {
            Ok(messages) => {
                let published = deliver(flow, &messages, sink)?;
                debug!(retrieved = messages.len(), published, "Poll complete");
            }
            Err(e) => error!(error = %e, "Poll failed"),
        }
        tokio::select! {
            () = tokio::time::sleep(trigger.fixed_delay()) => {}
            () = stopped(&mut shutdown) => return Ok(()),
        }
    }
}

async fn run_idle<S>(
    flow: &MailSourceFlow,
    receiver: &ImapIdleReceiver,
    sink: &mut S,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: RecordSink + ?Sized,
{
    let (tx, mut rx) = mpsc::channel(IDLE_CHANNEL_CAPACITY);
    let receiver = receiver.clone();
    let task = tokio::spawn(async move { receiver.run(tx).await });
    let mut closing = false;

    loop {
        tokio::select! {
            raw = rx.recv() => match raw {
                Some(raw) => {
                    flow.dispatch(&raw, sink).context("Failed to publish record")?;
                }
                None => break,
            },
            () = stopped(&mut shutdown), if !closing => {
                debug!("Closing idle channel");
                rx.close();
                closing = true;
            }
        }
    }

    task.await.context("Idle receiver panicked")
}

/// Publishes every message that transforms cleanly; returns how many did.
///
/// # Errors
///
/// Returns the sink's error.
pub fn deliver<S>(
    flow: &MailSourceFlow,
    messages: &[Vec<u8>],
    sink: &mut S,
) -> anyhow::Result<usize>
where
    S: RecordSink + ?Sized,
{
    let mut published = 0;
    for raw in messages {
        if flow.dispatch(raw, sink).context("Failed to publish record")? {
            published += 1;
        }
    }
    Ok(published)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use mailsource_core::{MailSourceProperties, OutputRecord};

    fn flow() -> MailSourceFlow {
        MailSourceFlow::configure(&MailSourceProperties::new("imap://u:p@localhost")).unwrap()
    }

    #[test]
    fn test_deliver_skips_bad_messages() {
        let messages = vec![
            b"To: a@example.com\r\n\r\nfirst".to_vec(),
            b"To: <broken\r\n\r\nsecond".to_vec(),
            b"To: b@example.com\r\n\r\nthird".to_vec(),
        ];
        let mut sink: Vec<OutputRecord> = Vec::new();
        assert_eq!(deliver(&flow(), &messages, &mut sink).unwrap(), 2);
        assert_eq!(sink[0].payload, "first");
        assert_eq!(sink[1].payload, "third");
    }

    #[test]
    fn test_deliver_stops_on_sink_failure() {
        struct Closed;
        impl RecordSink for Closed {
            fn publish(&mut self, _record: &OutputRecord) -> std::io::Result<()> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }
        }

        let messages = vec![b"To: a@example.com\r\n\r\nbody".to_vec()];
        let err = deliver(&flow(), &messages, &mut Closed).unwrap_err();
        assert!(err.to_string().contains("Failed to publish record"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_survives_failed_polls() {
        // Nothing listens on port 1, so every poll fails and is retried.
        let properties = MailSourceProperties::new("pop3://u:p@127.0.0.1:1");
        let flow = MailSourceFlow::configure(&properties).unwrap();
        let receiver = Receiver::for_strategy(
            flow.url(),
            flow.strategy(),
            mailsource_store::IdleSettings::default(),
        )
        .unwrap();
        let mut sink: Vec<OutputRecord> = Vec::new();
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run(&flow, &receiver, &TriggerProperties::default(), &mut sink, shutdown),
        )
        .await;
        assert!(outcome.is_err(), "poll loop should still be running");
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_between_polls_on_shutdown() {
        let properties = MailSourceProperties::new("pop3://u:p@127.0.0.1:1");
        let flow = MailSourceFlow::configure(&properties).unwrap();
        let receiver = Receiver::for_strategy(
            flow.url(),
            flow.strategy(),
            mailsource_store::IdleSettings::default(),
        )
        .unwrap();
        let mut sink: Vec<OutputRecord> = Vec::new();
        let (shutdown_tx, shutdown) = watch::channel(false);

        let trigger = TriggerProperties {
            fixed_delay_secs: 60,
            ..TriggerProperties::default()
        };
        let running = run(&flow, &receiver, &trigger, &mut sink, shutdown);
        let stop = async {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            shutdown_tx.send(true).unwrap();
        };
        let (outcome, ()) = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            async { tokio::join!(running, stop) },
        )
        .await
        .unwrap();
        outcome.unwrap();
    }
}
