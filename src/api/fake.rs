//! Scriptable in-memory `AdminApi` for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::Semaphore;

use crate::api::{
    AdminApi, AnalyzeResponse, BulkDeleteResponse, Campaign, ExecuteRequest, ImportSummary, Item,
    PreviewRequest, PreviewResponse, RowId, TableData, UploadFile,
};
use crate::error::{ApiError, ApiResult};
use crate::shared::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListRows(String),
    GetItem(String, RowId),
    UpdateItem(String, RowId),
    DeleteItem(String, RowId),
    BulkDelete { endpoint: String, ids: Vec<RowId> },
    Analyze(String),
    Preview(usize),
    Execute { campaign_id: Option<String> },
    Campaigns,
}

pub struct FakeApi {
    pub calls: Mutex<Vec<Call>>,
    pub tables: Mutex<HashMap<String, ApiResult<TableData>>>,
    pub item: Mutex<ApiResult<Item>>,
    pub delete_item: Mutex<ApiResult<()>>,
    pub bulk: Mutex<ApiResult<BulkDeleteResponse>>,
    pub analyze: Mutex<ApiResult<AnalyzeResponse>>,
    pub preview: Mutex<ApiResult<PreviewResponse>>,
    pub execute: Mutex<ApiResult<ImportSummary>>,
    pub campaigns: Mutex<ApiResult<Vec<Campaign>>>,
    /// Every call waits for a permit; tests close the gate to hold calls in flight
    pub gate: Semaphore,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            tables: Mutex::new(HashMap::new()),
            item: Mutex::new(Ok(Item::new())),
            delete_item: Mutex::new(Ok(())),
            bulk: Mutex::new(Ok(BulkDeleteResponse {
                success: true,
                message: None,
                error: None,
            })),
            analyze: Mutex::new(Ok(AnalyzeResponse::default())),
            preview: Mutex::new(Ok(PreviewResponse::default())),
            execute: Mutex::new(Ok(ImportSummary::default())),
            campaigns: Mutex::new(Ok(Vec::new())),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }
}

impl FakeApi {
    /// Calls block until `open_gate` is called
    pub fn gated() -> Self {
        Self {
            gate: Semaphore::new(0),
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1000);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn set_table(&self, resource: &str, table: ApiResult<TableData>) {
        lock(&self.tables).insert(resource.to_string(), table);
    }

    async fn record(&self, call: Call) {
        lock(&self.calls).push(call);
        let _permit = self.gate.acquire().await;
    }
}

impl AdminApi for FakeApi {
    async fn list_rows(&self, resource: &str) -> ApiResult<TableData> {
        self.record(Call::ListRows(resource.to_string())).await;
        lock(&self.tables)
            .get(resource)
            .cloned()
            .unwrap_or_else(|| Err(ApiError::server(format!("no table for {}", resource))))
    }

    async fn get_item(&self, resource: &str, id: &RowId) -> ApiResult<Item> {
        self.record(Call::GetItem(resource.to_string(), id.clone())).await;
        lock(&self.item).clone()
    }

    async fn update_item(&self, resource: &str, id: &RowId, fields: &Item) -> ApiResult<Item> {
        self.record(Call::UpdateItem(resource.to_string(), id.clone())).await;
        lock(&self.item).clone().map(|_| fields.clone())
    }

    async fn delete_item(&self, resource: &str, id: &RowId) -> ApiResult<()> {
        self.record(Call::DeleteItem(resource.to_string(), id.clone())).await;
        lock(&self.delete_item).clone()
    }

    async fn bulk_delete(&self, endpoint: &str, ids: &[RowId]) -> ApiResult<BulkDeleteResponse> {
        self.record(Call::BulkDelete {
            endpoint: endpoint.to_string(),
            ids: ids.to_vec(),
        })
        .await;
        lock(&self.bulk).clone()
    }

    async fn analyze_import(&self, file: &UploadFile) -> ApiResult<AnalyzeResponse> {
        self.record(Call::Analyze(file.name.clone())).await;
        lock(&self.analyze).clone()
    }

    async fn preview_import(&self, request: &PreviewRequest) -> ApiResult<PreviewResponse> {
        self.record(Call::Preview(request.limit)).await;
        lock(&self.preview).clone()
    }

    async fn execute_import(&self, request: &ExecuteRequest) -> ApiResult<ImportSummary> {
        self.record(Call::Execute {
            campaign_id: request.campaign_id.clone(),
        })
        .await;
        lock(&self.execute).clone()
    }

    async fn list_campaigns(&self) -> ApiResult<Vec<Campaign>> {
        self.record(Call::Campaigns).await;
        lock(&self.campaigns).clone()
    }
}
