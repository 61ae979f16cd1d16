//! Single-row actions: show, update and delete one item.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::api::{AdminApi, Item, RowId};
use crate::config::PageConfig;
use crate::error::ApiError;
use crate::notify::NotificationCenter;
use crate::refresh::RefreshCoordinator;
use crate::shared::lock;

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<T> {
    Done(T),
    /// A call for the same row is still running
    Busy,
    Cancelled,
    Failed(ApiError),
}

/// Marks a row in flight until dropped
struct RowGuard<'a> {
    rows: &'a Mutex<HashSet<RowId>>,
    id: RowId,
}

impl<'a> RowGuard<'a> {
    fn acquire(rows: &'a Mutex<HashSet<RowId>>, id: &RowId) -> Option<Self> {
        if lock(rows).insert(id.clone()) {
            Some(Self {
                rows,
                id: id.clone(),
            })
        } else {
            None
        }
    }
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        lock(self.rows).remove(&self.id);
    }
}

pub struct ItemActions<A> {
    api: Arc<A>,
    center: NotificationCenter,
    refresh: Arc<RefreshCoordinator>,
    page_key: String,
    resource: String,
    in_flight: Mutex<HashSet<RowId>>,
}

impl<A: AdminApi> ItemActions<A> {
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
            resource: page.resource.clone(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_busy(&self, id: &RowId) -> bool {
        lock(&self.in_flight).contains(id)
    }

    pub async fn get(&self, id: &RowId) -> ItemOutcome<Item> {
        let Some(_guard) = RowGuard::acquire(&self.in_flight, id) else {
            return ItemOutcome::Busy;
        };
        match self.api.get_item(&self.resource, id).await {
            Ok(item) => ItemOutcome::Done(item),
            Err(err) => self.fail(err),
        }
    }

    pub async fn update(&self, id: &RowId, fields: &Item) -> ItemOutcome<Item> {
        let Some(guard) = RowGuard::acquire(&self.in_flight, id) else {
            return ItemOutcome::Busy;
        };
        info!(resource = %self.resource, %id, fields = fields.len(), "updating item");
        match self.api.update_item(&self.resource, id, fields).await {
            Ok(item) => {
                self.center.success(format!("Saved {} #{}.", singular(&self.resource), id));
                drop(guard);
                self.refresh.after_mutation(Some(&self.page_key)).await;
                ItemOutcome::Done(item)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Confirm, then delete one row. `on_deleted` runs before the refresh so
    /// the caller can drop the id from its selection.
    pub async fn delete(&self, id: &RowId, on_deleted: impl FnOnce(&RowId)) -> ItemOutcome<()> {
        let Some(guard) = RowGuard::acquire(&self.in_flight, id) else {
            debug!(%id, "delete already running for row");
            return ItemOutcome::Busy;
        };
        let question = format!("Delete {} #{}? This cannot be undone.", singular(&self.resource), id);
        if !self.center.confirm(question).await {
            return ItemOutcome::Cancelled;
        }

        info!(resource = %self.resource, %id, "deleting item");
        match self.api.delete_item(&self.resource, id).await {
            Ok(()) => {
                self.center.success(format!("Deleted {} #{}.", singular(&self.resource), id));
                on_deleted(id);
                drop(guard);
                self.refresh.after_mutation(Some(&self.page_key)).await;
                ItemOutcome::Done(())
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail<T>(&self, err: ApiError) -> ItemOutcome<T> {
        self.center.error(err.user_message());
        ItemOutcome::Failed(err)
    }
}

/// `users` -> `user`, good enough for messages
fn singular(resource: &str) -> &str {
    resource.strip_suffix('s').unwrap_or(resource)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::api::fake::{Call, FakeApi};
    use crate::config::NotificationConfig;
    use crate::notify::{Dismissal, NoticeKind};

    fn actions(api: FakeApi) -> (Arc<FakeApi>, NotificationCenter, Arc<ItemActions<FakeApi>>) {
        let api = Arc::new(api);
        let center = NotificationCenter::new(&NotificationConfig::default());
        let (refresh, _reloads) = RefreshCoordinator::new(Duration::ZERO);
        let page = PageConfig {
            key: "users".into(),
            title: "USERS".into(),
            path: "/admin/users".into(),
            resource: "users".into(),
            bulk_delete_endpoint: "/api/users/bulk-delete".into(),
        };
        let actions = ItemActions::new(Arc::clone(&api), center.clone(), Arc::new(refresh), &page);
        (api, center, Arc::new(actions))
    }

    #[tokio::test]
    async fn test_get_returns_item() {
        let api = FakeApi::default();
        let mut item = Item::new();
        item.insert("name".into(), json!("Ann"));
        *lock(&api.item) = Ok(item.clone());
        let (api, _center, actions) = actions(api);

        let outcome = actions.get(&RowId::from(3)).await;
        assert_eq!(outcome, ItemOutcome::Done(item));
        assert_eq!(api.calls(), vec![Call::GetItem("users".into(), RowId::from(3))]);
        assert!(!actions.is_busy(&RowId::from(3)));
    }

    #[tokio::test]
    async fn test_update_notifies_success() {
        let (api, center, actions) = actions(FakeApi::default());
        let mut fields = Item::new();
        fields.insert("email".into(), json!("ann@example.com"));

        let outcome = actions.update(&RowId::from("7"), &fields).await;
        assert_eq!(outcome, ItemOutcome::Done(fields));
        assert_eq!(api.calls(), vec![Call::UpdateItem("users".into(), RowId::from("7"))]);
        let last = center.history().pop().unwrap();
        assert_eq!(last.kind, NoticeKind::Success);
        assert_eq!(last.message, "Saved user #7.");
    }

    #[tokio::test]
    async fn test_confirmed_delete_calls_back() {
        let (api, center, actions) = actions(FakeApi::default());
        let task = {
            let actions = Arc::clone(&actions);
            tokio::spawn(async move {
                let mut pruned = None;
                let outcome = actions
                    .delete(&RowId::from(5), |id| pruned = Some(id.clone()))
                    .await;
                (outcome, pruned)
            })
        };
        let prompt = center.wait_for_confirm().await;
        assert!(prompt.message.contains("user #5"));
        center.resolve(Dismissal::Confirm);

        let (outcome, pruned) = task.await.unwrap();
        assert_eq!(outcome, ItemOutcome::Done(()));
        assert_eq!(pruned, Some(RowId::from(5)));
        assert_eq!(api.calls(), vec![Call::DeleteItem("users".into(), RowId::from(5))]);
    }

    #[tokio::test]
    async fn test_cancelled_delete_sends_nothing() {
        let (api, center, actions) = actions(FakeApi::default());
        let task = {
            let actions = Arc::clone(&actions);
            tokio::spawn(async move { actions.delete(&RowId::from(5), |_| {}).await })
        };
        center.wait_for_confirm().await;
        center.resolve(Dismissal::OutsideClick);
        assert_eq!(task.await.unwrap(), ItemOutcome::Cancelled);
        assert!(api.calls().is_empty());
        assert!(!actions.is_busy(&RowId::from(5)));
    }

    #[tokio::test]
    async fn test_same_row_is_guarded() {
        let (api, _center, actions) = actions(FakeApi::gated());
        let first = {
            let actions = Arc::clone(&actions);
            tokio::spawn(async move { actions.get(&RowId::from(1)).await })
        };
        while api.calls().is_empty() {
            tokio::task::yield_now().await;
        }

        assert!(actions.is_busy(&RowId::from(1)));
        assert_eq!(actions.get(&RowId::from(1)).await, ItemOutcome::Busy);

        // Other rows are independent
        let other = {
            let actions = Arc::clone(&actions);
            tokio::spawn(async move { actions.get(&RowId::from(2)).await })
        };
        api.open_gate();
        assert!(matches!(first.await.unwrap(), ItemOutcome::Done(_)));
        assert!(matches!(other.await.unwrap(), ItemOutcome::Done(_)));
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let api = FakeApi::default();
        *lock(&api.item) = Err(ApiError::Unauthorized { status: 401 });
        let (_api, center, actions) = actions(api);

        let outcome = actions.get(&RowId::from(1)).await;
        assert_eq!(outcome, ItemOutcome::Failed(ApiError::Unauthorized { status: 401 }));
        assert_eq!(center.history()[0].kind, NoticeKind::Error);
    }
}
