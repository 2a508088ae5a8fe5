//! Relay startup and shutdown: verify the bot, open the log, start both sources,
//! run the dispatcher, then stop everything.

use crate::channels::TelegramChannel;
use crate::config::Settings;
use crate::inject::{Injector, MultiplexerInjector};
use crate::relay::dispatcher::{Dispatcher, Exit};
use crate::tail::LineSource;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INBOX_CAPACITY: usize = 64;
/// How long each source task gets to stop after the loop ends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run the relay with the multiplexer injector until SIGINT/SIGTERM or a source closes.
pub async fn run_relay(settings: Settings) -> Result<Exit> {
    let cancel = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(cancel.clone()));
    let injector = Arc::new(MultiplexerInjector::for_target(&settings.session));
    let res = run_relay_with(settings, injector, cancel).await;
    signals.abort();
    res
}

/// Run the relay with the given injector until `cancel` fires or a source closes.
/// Startup failures (token rejected, log file missing) are returned before the loop starts.
pub async fn run_relay_with(
    settings: Settings,
    injector: Arc<dyn Injector>,
    cancel: CancellationToken,
) -> Result<Exit> {
    if settings.custom_api_base {
        log::info!("custom backend: {}", settings.api_base);
    }
    let channel = Arc::new(
        TelegramChannel::new(settings.bot_token.clone(), settings.api_base.clone())
            .with_poll_timeout(settings.poll_timeout),
    );
    let me = channel
        .get_me()
        .await
        .context("verifying telegram bot token")?;
    log::info!(
        "authorized on account {}",
        me.username.as_deref().unwrap_or("<unnamed bot>")
    );

    let source = LineSource::open(settings.log_path.clone(), settings.tail.clone())
        .await
        .context("opening log file")?;
    log::info!("following {}", source.path().display());

    let (lines, tail_task) = source.spawn(cancel.clone());
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let inbox_task = channel.clone().start_inbound(inbox_tx, cancel.clone());

    let dispatcher = Dispatcher::from_settings(&settings, channel, injector);
    let exit = dispatcher.run(lines, inbox_rx, &cancel).await;
    log::info!("relay loop ended: {:?}", exit);

    cancel.cancel();
    await_task("tail", tail_task).await;
    await_task("telegram", inbox_task).await;
    Ok(exit)
}

async fn await_task(name: &str, task: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
        Ok(Ok(())) => log::debug!("{} task finished", name),
        Ok(Err(e)) => log::warn!("{} task failed: {}", name, e),
        Err(_) => log::warn!("{} task did not stop within {:?}", name, SHUTDOWN_GRACE),
    }
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
    cancel.cancel();
}
