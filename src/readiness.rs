//! Readiness inference — a broadcast latch plus heuristic classifiers.
//!
//! SourceKit-LSP never sends a discrete "analysis finished" event, so
//! readiness is inferred from free-text log, user-message, and progress
//! traffic. Channels race; the first match sets the latch and every later
//! match is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::protocol::{ConfigurationParams, MessageParams, ProgressParams};
use crate::transport::Transport;
use crate::types::ReadinessKeywords;

/// Single-assignment broadcast latch.
///
/// `try_set` is an atomic compare-and-set; the call that wins wakes every
/// waiter, and the latch stays set for the rest of the session. Safe to set
/// from any handler on the delivery path while the supervisor waits.
#[derive(Debug)]
pub(crate) struct ReadinessLatch {
    set: AtomicBool,
    notify: Notify,
}

impl ReadinessLatch {
    pub fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Set the latch. True only for the call that performed the transition.
    pub fn try_set(&self) -> bool {
        let won = self
            .set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.notify.notify_waiters();
        }
        won
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Wait until the latch is set or `timeout` elapses. Returns whether the
    /// latch was set by the deadline.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a set between the check
            // and the await cannot be missed.
            let notified = self.notify.notified();
            if self.is_set() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_set();
            }
        }
    }
}

/// Case-insensitive substring match against any keyword in the table.
pub(crate) fn matches_any(text: &str, keywords: &[String]) -> bool {
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_lowercase()))
}

/// Free-text channels: extract the message and match it.
pub(crate) fn message_matches(params: Option<&serde_json::Value>, keywords: &[String]) -> bool {
    let Some(params) = params else { return false };
    match serde_json::from_value::<MessageParams>(params.clone()) {
        Ok(message) => matches_any(&message.message, keywords),
        Err(_) => false,
    }
}

/// Progress channel: only an `end` event with a matching message counts —
/// `begin` and `report` say work is still underway.
pub(crate) fn progress_end_matches(
    params: Option<&serde_json::Value>,
    keywords: &[String],
) -> bool {
    let Some(params) = params else { return false };
    match serde_json::from_value::<ProgressParams>(params.clone()) {
        Ok(progress) => {
            progress.value.kind == "end" && matches_any(&progress.value.message, keywords)
        }
        Err(_) => false,
    }
}

/// One empty configuration entry per requested item.
pub(crate) fn empty_configuration_reply(params: Option<&serde_json::Value>) -> serde_json::Value {
    let count = params
        .and_then(|value| serde_json::from_value::<ConfigurationParams>(value.clone()).ok())
        .map_or(0, |config| config.items.len());
    serde_json::Value::Array(vec![serde_json::json!({}); count])
}

/// Install the readiness classifiers and the pre-readiness request
/// answerers. Must run before the transport starts so no early server
/// message is lost.
pub(crate) fn install_handlers<T: Transport>(
    transport: &mut T,
    latch: &Arc<ReadinessLatch>,
    keywords: &ReadinessKeywords,
) {
    let log_latch = Arc::clone(latch);
    let log_keywords = keywords.log.clone();
    transport.on_notification(
        "window/logMessage",
        Box::new(move |params| {
            if message_matches(params.as_ref(), &log_keywords) && log_latch.try_set() {
                tracing::info!("workspace analysis complete (window/logMessage)");
            }
        }),
    );

    let show_latch = Arc::clone(latch);
    let show_keywords = keywords.message.clone();
    transport.on_notification(
        "window/showMessage",
        Box::new(move |params| {
            // Skip the parse once the latch is set; try_set keeps this
            // idempotent regardless.
            if !show_latch.is_set()
                && message_matches(params.as_ref(), &show_keywords)
                && show_latch.try_set()
            {
                tracing::info!("workspace analysis complete (window/showMessage)");
            }
        }),
    );

    let progress_latch = Arc::clone(latch);
    let progress_keywords = keywords.progress.clone();
    transport.on_notification(
        "$/progress",
        Box::new(move |params| {
            if progress_end_matches(params.as_ref(), &progress_keywords)
                && progress_latch.try_set()
            {
                tracing::info!("workspace analysis complete ($/progress end)");
            }
        }),
    );

    // Diagnostics are outside the session core; accept and drop them so the
    // transport never flags them as unhandled.
    transport.on_notification("textDocument/publishDiagnostics", Box::new(|_params| {}));

    // Requests the server may issue before analysis is available. These run
    // on the delivery path and must answer immediately — blocking on the
    // latch here would deadlock the very messages that set it.
    transport.on_request(
        "workspace/configuration",
        Box::new(|params| empty_configuration_reply(params.as_ref())),
    );
    transport.on_request(
        "workspace/executeClientCommand",
        Box::new(|_params| serde_json::json!([])),
    );
    transport.on_request(
        "client/registerCapability",
        Box::new(|_params| serde_json::Value::Null),
    );
}
