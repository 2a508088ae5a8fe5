//! The relay's single control loop.
//!
//! Merges tailed lines and inbound chat messages, fans lines out to every
//! recipient, and turns authorized commands into session input. All sends and
//! injections happen here, one at a time.

use crate::channels::{ChannelHandle, InboundMessage};
use crate::config::{RestartPlan, Settings};
use crate::inject::Injector;
use crate::policy::{CommandPolicy, Verdict};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Shutdown,
    LinesClosed,
    InboxClosed,
}

pub struct Dispatcher {
    channel: Arc<dyn ChannelHandle>,
    injector: Arc<dyn Injector>,
    policy: CommandPolicy,
    recipients: Vec<i64>,
    session: String,
    restart: RestartPlan,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn ChannelHandle>,
        injector: Arc<dyn Injector>,
        policy: CommandPolicy,
        recipients: Vec<i64>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            injector,
            policy,
            recipients,
            session: session.into(),
            restart: RestartPlan::default(),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        channel: Arc<dyn ChannelHandle>,
        injector: Arc<dyn Injector>,
    ) -> Self {
        Self::new(
            channel,
            injector,
            settings.policy.clone(),
            settings.recipients.clone(),
            settings.session.name.clone(),
        )
        .with_restart(settings.restart.clone())
    }

    pub fn with_restart(mut self, restart: RestartPlan) -> Self {
        self.restart = restart;
        self
    }

    /// Run until `cancel` fires or either source closes.
    pub async fn run(
        &self,
        mut lines: mpsc::Receiver<String>,
        mut inbox: mpsc::Receiver<InboundMessage>,
        cancel: &CancellationToken,
    ) -> Exit {
        log::info!(
            "relay: forwarding to {} recipient(s), injecting into session {:?}",
            self.recipients.len(),
            self.session
        );
        loop {
            if cancel.is_cancelled() {
                log::info!("shutting down...");
                return Exit::Shutdown;
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                line = lines.recv() => match line {
                    Some(line) => {
                        until_cancelled(cancel, async {
                            self.fan_out(&line).await;
                            None::<Exit>
                        })
                        .await
                    }
                    None => {
                        log::info!("tail ended");
                        return Exit::LinesClosed;
                    }
                },
                msg = inbox.recv() => match msg {
                    Some(msg) => until_cancelled(cancel, self.handle_message(msg, cancel)).await,
                    None => {
                        log::info!("inbox closed");
                        return Exit::InboxClosed;
                    }
                },
            };
            match outcome {
                None => {
                    log::info!("shutting down...");
                    return Exit::Shutdown;
                }
                Some(Some(exit)) => return exit,
                Some(None) => {}
            }
        }
    }

    async fn fan_out(&self, line: &str) {
        for &chat_id in &self.recipients {
            if let Err(e) = self.channel.send_message(chat_id, line).await {
                log::warn!("send error to {}: {}", chat_id, e);
            }
        }
    }

    async fn handle_message(&self, msg: InboundMessage, cancel: &CancellationToken) -> Option<Exit> {
        if msg.is_empty() {
            log::debug!("ignoring empty update {}", msg.update_id);
            return None;
        }
        let who = msg.display_sender();
        match self.policy.evaluate(msg.sender_id, &msg.text) {
            Verdict::Unauthorized => log::info!("[UNAUTHORIZED] {}: {}", who, msg.text),
            Verdict::Plain => log::info!("[NOT MATCHED] {}: {}", who, msg.text),
            Verdict::Blocked(body) => {
                log::warn!("[BLOCKED] {} tried reserved command {:?}", who, body)
            }
            Verdict::Inject(body) => {
                log::info!("[MATCHED] {}: {}", who, msg.text);
                self.inject_or_report(msg.chat_id, &body).await;
            }
            Verdict::Restart => {
                log::info!("[MATCHED] {}: {} (restart)", who, msg.text);
                return self.restart(msg.chat_id, cancel).await;
            }
        }
        None
    }

    /// Inject `command`; on failure tell the requester. Returns true on success.
    async fn inject_or_report(&self, chat_id: i64, command: &str) -> bool {
        match self.injector.inject(&self.session, command).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("injection into {:?} failed: {}", self.session, e);
                self.reply(chat_id, &format!("Error: {}", e)).await;
                false
            }
        }
    }

    /// Stop, notify, wait, start. The loop does not process other events while waiting.
    async fn restart(&self, chat_id: i64, cancel: &CancellationToken) -> Option<Exit> {
        let Some(start_command) = self.restart.start_command.as_deref() else {
            log::warn!("restart requested but no start script is configured");
            self.reply(chat_id, "Restart unavailable: no start script configured")
                .await;
            return None;
        };
        if !self.inject_or_report(chat_id, &self.restart.stop_command).await {
            return None;
        }
        self.reply(
            chat_id,
            &format!(
                "Restarting: starting again in {}s",
                self.restart.delay.as_secs()
            ),
        )
        .await;
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("shutdown during restart delay, start skipped");
                return Some(Exit::Shutdown);
            }
            _ = tokio::time::sleep(self.restart.delay) => {}
        }
        self.inject_or_report(chat_id, start_command).await;
        None
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.channel.send_message(chat_id, text).await {
            log::warn!("reply to {} failed: {}", chat_id, e);
        }
    }
}

/// Run `work` to completion unless `cancel` fires first; `None` means it was abandoned.
/// Sends and injections in flight are dropped so a stalled transport cannot delay shutdown.
async fn until_cancelled<F>(cancel: &CancellationToken, work: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = work => Some(out),
    }
}
