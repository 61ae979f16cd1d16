//! Toasts and asynchronous confirmation.
//!
//! `NotificationCenter` is a cheap, cloneable handle; every component that
//! needs to talk to the user gets one injected at construction time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::shared::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
    Warning,
    Info,
}

impl NoticeKind {
    pub fn label(self) -> &'static str {
        match self {
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
            NoticeKind::Warning => "warning",
            NoticeKind::Info => "info",
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A transient message shown until `expires_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
    pub expires_at: Instant,
}

/// Permanent record of a notification
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub kind: NoticeKind,
    pub message: String,
    pub at: OffsetDateTime,
}

impl LogEntry {
    pub fn timestamp(&self) -> String {
        self.at
            .format(format_description!("[hour]:[minute]:[second]"))
            .unwrap_or_default()
    }
}

/// How a confirmation dialog was closed. Only `Confirm` counts as a yes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismissal {
    Confirm,
    Cancel,
    Close,
    OutsideClick,
}

impl Dismissal {
    pub fn accepted(self) -> bool {
        matches!(self, Dismissal::Confirm)
    }
}

/// The question currently waiting for an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub id: u64,
    pub message: String,
}

struct PendingConfirm {
    prompt: ConfirmPrompt,
    reply: oneshot::Sender<bool>,
}

struct Inner {
    next_id: u64,
    toasts: VecDeque<Toast>,
    history: VecDeque<LogEntry>,
    pending: Option<PendingConfirm>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<Mutex<Inner>>,
    prompt_tx: Arc<watch::Sender<Option<ConfirmPrompt>>>,
    toast_duration: Duration,
    history_limit: usize,
}

impl NotificationCenter {
    pub fn new(config: &NotificationConfig) -> Self {
        let (prompt_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                toasts: VecDeque::new(),
                history: VecDeque::new(),
                pending: None,
            })),
            prompt_tx: Arc::new(prompt_tx),
            toast_duration: config.toast_duration,
            history_limit: config.history,
        }
    }

    pub fn notify(&self, message: impl Into<String>, kind: NoticeKind) -> u64 {
        let message = message.into();
        match kind {
            NoticeKind::Error => warn!(%message, "notification"),
            _ => info!(%kind, %message, "notification"),
        }

        let mut inner = lock(&self.inner);
        let id = inner.next_id();
        inner.toasts.push_back(Toast {
            id,
            kind,
            message: message.clone(),
            expires_at: Instant::now() + self.toast_duration,
        });
        inner.history.push_back(LogEntry {
            kind,
            message,
            at: now(),
        });
        while inner.history.len() > self.history_limit {
            inner.history.pop_front();
        }
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NoticeKind::Success)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NoticeKind::Error)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NoticeKind::Warning)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.notify(message, NoticeKind::Info)
    }

    /// Toasts still visible at `now`, oldest first
    pub fn toasts(&self, now: Instant) -> Vec<Toast> {
        lock(&self.inner)
            .toasts
            .iter()
            .filter(|toast| toast.expires_at > now)
            .cloned()
            .collect()
    }

    /// Drop toasts whose timer ran out
    pub fn prune(&self, now: Instant) {
        lock(&self.inner).toasts.retain(|toast| toast.expires_at > now);
    }

    /// Remove one toast before it expires. History keeps the entry.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.toasts.len();
        inner.toasts.retain(|toast| toast.id != id);
        inner.toasts.len() != before
    }

    pub fn history(&self) -> Vec<LogEntry> {
        lock(&self.inner).history.iter().cloned().collect()
    }

    /// Ask the user a yes/no question.
    ///
    /// Resolves exactly once: true only for `Dismissal::Confirm`. A second call
    /// while one is pending replaces the dialog and the replaced call resolves false.
    pub async fn confirm(&self, message: impl Into<String>) -> bool {
        let (reply, answer) = oneshot::channel();
        let prompt = {
            let mut inner = lock(&self.inner);
            let prompt = ConfirmPrompt {
                id: inner.next_id(),
                message: message.into(),
            };
            let replaced = inner.pending.replace(PendingConfirm {
                prompt: prompt.clone(),
                reply,
            });
            if let Some(previous) = replaced {
                debug!(id = previous.prompt.id, "confirmation replaced by a newer one");
                let _ = previous.reply.send(false);
            }
            prompt
        };
        self.prompt_tx.send_replace(Some(prompt));

        // A dropped sender (center torn down) counts as a dismissal
        answer.await.unwrap_or(false)
    }

    /// The question currently shown, if any
    pub fn pending_confirm(&self) -> Option<ConfirmPrompt> {
        let mut inner = lock(&self.inner);
        if inner
            .pending
            .as_ref()
            .is_some_and(|pending| pending.reply.is_closed())
        {
            // The asking side gave up; nothing to show anymore
            inner.pending = None;
            self.prompt_tx.send_replace(None);
        }
        inner.pending.as_ref().map(|pending| pending.prompt.clone())
    }

    /// Wait until a confirmation is pending. Used by presenters that do not poll.
    pub async fn wait_for_confirm(&self) -> ConfirmPrompt {
        let mut rx = self.prompt_tx.subscribe();
        loop {
            if let Some(prompt) = self.pending_confirm() {
                return prompt;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as self; unreachable in practice
                std::future::pending::<()>().await;
            }
        }
    }

    /// Close the pending dialog. Returns the answer delivered, or None if nothing was pending.
    pub fn resolve(&self, how: Dismissal) -> Option<bool> {
        let pending = lock(&self.inner).pending.take()?;
        self.prompt_tx.send_replace(None);
        let answer = how.accepted();
        debug!(id = pending.prompt.id, ?how, answer, "confirmation resolved");
        let _ = pending.reply.send(answer);
        Some(answer)
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
