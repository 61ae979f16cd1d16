//! Bulk delete of the selected rows of one page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::api::{AdminApi, RowId};
use crate::config::PageConfig;
use crate::error::ApiError;
use crate::notify::NotificationCenter;
use crate::refresh::RefreshCoordinator;
use crate::selection::{HeaderState, SelectionEvent, SelectionTracker};
use crate::shared::lock;

const NOTHING_SELECTED: &str = "Select at least one item to delete.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Empty selection, nothing was sent
    NothingSelected,
    /// Another delete on this page is still running
    Busy,
    Cancelled,
    Deleted { count: usize },
    Failed(ApiError),
}

/// Clears the in-flight flag when dropped, so an abandoned request re-enables the button
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BulkActionController<A> {
    api: Arc<A>,
    center: NotificationCenter,
    refresh: Arc<RefreshCoordinator>,
    page_key: String,
    endpoint: String,
    selection: Mutex<SelectionTracker>,
    in_flight: AtomicBool,
}

impl<A: AdminApi> BulkActionController<A> {
    pub fn new(
        api: Arc<A>,
        center: NotificationCenter,
        refresh: Arc<RefreshCoordinator>,
        page: &PageConfig,
    ) -> Self {
        Self {
            api,
            center,
            refresh,
            page_key: page.key.clone(),
            endpoint: page.bulk_delete_endpoint.clone(),
            selection: Mutex::new(SelectionTracker::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn apply(&self, event: SelectionEvent) {
        lock(&self.selection).apply(event);
    }

    pub fn selection_count(&self) -> usize {
        lock(&self.selection).selection_count()
    }

    pub fn is_selected(&self, id: &RowId) -> bool {
        lock(&self.selection).is_selected(id)
    }

    pub fn header_state(&self) -> HeaderState {
        lock(&self.selection).header_state()
    }

    pub fn selected_ids(&self) -> Vec<RowId> {
        lock(&self.selection).selected_ids()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the delete button is usable right now
    pub fn button_enabled(&self) -> bool {
        self.selection_count() > 0 && !self.is_busy()
    }

    pub async fn request_delete(&self) -> DeleteOutcome {
        let ids = self.selected_ids();
        if ids.is_empty() {
            self.center.warning(NOTHING_SELECTED);
            return DeleteOutcome::NothingSelected;
        }

        let Some(guard) = InFlight::acquire(&self.in_flight) else {
            debug!(page = %self.page_key, "bulk delete already running");
            return DeleteOutcome::Busy;
        };

        let count = ids.len();
        let question = if count == 1 {
            "Delete 1 selected item? This cannot be undone.".to_string()
        } else {
            format!("Delete {} selected items? This cannot be undone.", count)
        };
        if !self.center.confirm(question).await {
            debug!(page = %self.page_key, "bulk delete cancelled");
            return DeleteOutcome::Cancelled;
        }

        info!(page = %self.page_key, count, "bulk delete");
        let result = self.api.bulk_delete(&self.endpoint, &ids).await;
        let result = result.and_then(|response| {
            if response.success {
                Ok(response.message)
            } else {
                Err(ApiError::server(
                    response
                        .error
                        .or(response.message)
                        .unwrap_or_else(|| "The operation failed.".to_string()),
                ))
            }
        });

        match result {
            Ok(message) => {
                let message = message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| format!("Deleted {} item(s).", count));
                self.center.success(message);
                self.apply(SelectionEvent::Cleared);
                drop(guard);
                self.refresh.after_mutation(Some(&self.page_key)).await;
                DeleteOutcome::Deleted { count }
            }
            Err(err) => {
                // Selection is kept so the user can retry
                self.center.error(err.user_message());
                DeleteOutcome::Failed(err)
            }
        }
    }
}
