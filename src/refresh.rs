//! Post-mutation refresh with a full-reload fallback.
//!
//! After any change on the server the panel either re-fetches the affected
//! table, or, when that is impossible, asks the front end to reload
//! everything after a short delay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::shared::lock;

#[derive(Debug, Error)]
pub enum RefreshError {
    /// The table the refresher renders into is gone
    #[error("table for page `{0}` is not mounted")]
    TableMissing(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Something that can re-fetch and re-render one table
pub trait Refresher: Send + Sync {
    /// Returns the number of rows now rendered
    fn refresh(&self) -> BoxFuture<'_, Result<usize, RefreshError>>;
}

/// Sent to the front end when it must reload all state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { page: String, rows: usize },
    Reloaded,
}

pub struct RefreshCoordinator {
    refreshers: Mutex<HashMap<String, Arc<dyn Refresher>>>,
    current_path: Mutex<String>,
    reload_delay: Duration,
    reload_tx: mpsc::UnboundedSender<ReloadRequest>,
}

impl RefreshCoordinator {
    pub fn new(reload_delay: Duration) -> (Self, mpsc::UnboundedReceiver<ReloadRequest>) {
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            refreshers: Mutex::new(HashMap::new()),
            current_path: Mutex::new(String::new()),
            reload_delay,
            reload_tx,
        };
        (coordinator, reload_rx)
    }

    /// Register the refresher for a page, replacing any previous one
    pub fn register(&self, page_key: impl Into<String>, refresher: Arc<dyn Refresher>) {
        lock(&self.refreshers).insert(page_key.into(), refresher);
    }

    pub fn unregister(&self, page_key: &str) -> bool {
        lock(&self.refreshers).remove(page_key).is_some()
    }

    pub fn set_current_path(&self, path: impl Into<String>) {
        *lock(&self.current_path) = path.into();
    }

    /// Page key for the current path: the last path segment naming a
    /// registered page, else the last segment
    pub fn current_page_key(&self) -> Option<String> {
        let path = lock(&self.current_path).clone();
        let refreshers = lock(&self.refreshers);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        segments
            .iter()
            .rev()
            .find(|segment| refreshers.contains_key(**segment))
            .or_else(|| segments.last())
            .map(|segment| segment.to_string())
    }

    pub async fn after_mutation(&self, page_key: Option<&str>) -> RefreshOutcome {
        let key = match page_key {
            Some(key) => Some(key.to_string()),
            None => self.current_page_key(),
        };

        let refresher = key
            .as_deref()
            .and_then(|key| lock(&self.refreshers).get(key).cloned());

        let reason = match (key, refresher) {
            (Some(key), Some(refresher)) => match refresher.refresh().await {
                Ok(rows) => {
                    debug!(page = %key, rows, "table refreshed");
                    return RefreshOutcome::Refreshed { page: key, rows };
                }
                Err(err) => {
                    warn!(page = %key, error = %err, "refresh failed, falling back to reload");
                    err.to_string()
                }
            },
            (Some(key), None) => format!("no refresher registered for `{}`", key),
            (None, _) => "current page unknown".to_string(),
        };

        self.reload(reason).await;
        RefreshOutcome::Reloaded
    }

    async fn reload(&self, reason: String) {
        info!(%reason, delay_ms = self.reload_delay.as_millis() as u64, "scheduling full reload");
        if !self.reload_delay.is_zero() {
            tokio::time::sleep(self.reload_delay).await;
        }
        if self.reload_tx.send(ReloadRequest { reason }).is_err() {
            debug!("no front end listening for reloads");
        }
    }
}
