//! One admin page: its table, bulk controller and row actions.

use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use tracing::debug;

use crate::api::{AdminApi, RowId, TableData};
use crate::bulk::BulkActionController;
use crate::config::PageConfig;
use crate::error::ApiResult;
use crate::items::{ItemActions, ItemOutcome};
use crate::notify::NotificationCenter;
use crate::refresh::{RefreshCoordinator, RefreshError, Refresher};
use crate::selection::SelectionEvent;
use crate::shared::lock;

pub struct PageModel<A> {
    pub config: PageConfig,
    api: Arc<A>,
    table: Mutex<TableData>,
    refresh: Arc<RefreshCoordinator>,
    pub bulk: BulkActionController<A>,
    pub items: ItemActions<A>,
}

impl<A: AdminApi + 'static> PageModel<A> {
    /// Build the page and register its refresher. Dropping the page
    /// unregisters it.
    pub fn mount(
        config: PageConfig,
        api: Arc<A>,
        center: &NotificationCenter,
        refresh: &Arc<RefreshCoordinator>,
    ) -> Arc<Self> {
        let page = Arc::new(Self {
            bulk: BulkActionController::new(
                Arc::clone(&api),
                center.clone(),
                Arc::clone(refresh),
                &config,
            ),
            items: ItemActions::new(Arc::clone(&api), center.clone(), Arc::clone(refresh), &config),
            table: Mutex::new(TableData::default()),
            refresh: Arc::clone(refresh),
            api,
            config,
        });
        let refresher = PageRefresher {
            key: page.config.key.clone(),
            page: Arc::downgrade(&page),
        };
        refresh.register(page.config.key.clone(), Arc::new(refresher));
        page
    }

    pub fn table(&self) -> TableData {
        lock(&self.table).clone()
    }

    pub fn row_count(&self) -> usize {
        lock(&self.table).rows.len()
    }

    pub fn row_id(&self, index: usize) -> Option<RowId> {
        lock(&self.table).rows.get(index).map(|row| row.id.clone())
    }

    /// Fetch the rows from the server and render them. Selection of rows that
    /// disappeared is dropped.
    pub async fn load(&self) -> ApiResult<usize> {
        let table = self.api.list_rows(&self.config.resource).await?;
        Ok(self.replace_rows(table))
    }

    /// Render new rows, pruning the selection
    pub fn replace_rows(&self, table: TableData) -> usize {
        let ids = table.ids();
        let count = ids.len();
        *lock(&self.table) = table;
        self.bulk.apply(SelectionEvent::RowsReplaced { ids });
        count
    }

    /// Full reload: fresh rows and an empty selection
    pub async fn reload(&self) -> ApiResult<usize> {
        self.bulk.apply(SelectionEvent::Cleared);
        self.load().await
    }

    /// Delete one row, dropping it from the selection on success
    pub async fn delete_row(&self, id: &RowId) -> ItemOutcome<()> {
        self.items
            .delete(id, |id| {
                self.bulk.apply(SelectionEvent::Toggled {
                    id: id.clone(),
                    checked: false,
                })
            })
            .await
    }
}

impl<A> Drop for PageModel<A> {
    fn drop(&mut self) {
        if self.refresh.unregister(&self.config.key) {
            debug!(page = %self.config.key, "refresher unregistered");
        }
    }
}

/// Re-renders a mounted page. Holds the page weakly so an unmounted page
/// reports `TableMissing`.
struct PageRefresher<A> {
    key: String,
    page: Weak<PageModel<A>>,
}

impl<A: AdminApi + 'static> Refresher for PageRefresher<A> {
    fn refresh(&self) -> BoxFuture<'_, Result<usize, RefreshError>> {
        Box::pin(async move {
            let Some(page) = self.page.upgrade() else {
                debug!(page = %self.key, "page is gone");
                return Err(RefreshError::TableMissing(self.key.clone()));
            };
            Ok(page.load().await?)
        })
    }
}
