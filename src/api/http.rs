//! Admin API client over HTTP using reqwest.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{
    AdminApi, AnalyzeResponse, BulkDeleteRequest, BulkDeleteResponse, Campaign, ExecuteRequest,
    ImportSummary, Item, PreviewRequest, PreviewResponse, RowId, TableData, UploadFile,
};
use crate::config::{ApiConfig, ImportConfig};
use crate::error::{ApiError, ApiResult};

const DEFAULT_FAILURE: &str = "The operation failed.";

pub struct HttpApi {
    client: Client,
    base_url: String,
    resource_prefix: String,
    import_endpoint: String,
    campaigns_endpoint: String,
}

impl HttpApi {
    pub fn new(api: &ApiConfig, import: &ImportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &api.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("api.token contains characters not allowed in a header")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(api.timeout)
            .default_headers(headers)
            .user_agent(concat!("panelctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: api.base_url.clone(),
            resource_prefix: api.resource_prefix.clone(),
            import_endpoint: import.endpoint.clone(),
            campaigns_endpoint: api.campaigns_endpoint.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// `<base><prefix>/<resource>[/<id>]` with each segment escaped
    fn resource_url(&self, resource: &str, id: Option<&RowId>) -> ApiResult<Url> {
        let mut url = Url::parse(&self.url(&self.resource_prefix))
            .map_err(|err| ApiError::validation(format!("invalid API URL: {}", err)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::validation("API base URL cannot carry a path"))?;
            segments.pop_if_empty();
            segments.extend(resource.split('/').filter(|s| !s.is_empty()));
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    /// Status and raw body of one call
    async fn exchange(&self, request: RequestBuilder) -> ApiResult<(u16, String)> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let url = response.url().clone();
        let body = response.text().await?;
        debug!(%url, status, bytes = body.len(), "api response");
        Ok((status, body))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let (status, body) = self.exchange(request).await?;
        let value = interpret_response(status, &body)?;
        serde_json::from_value(value).map_err(|err| {
            warn!(error = %err, "unexpected response shape");
            ApiError::Malformed(err.to_string())
        })
    }
}

/// Turn a status code and body into either the payload or a classified error.
///
/// Bodies of the form `{"success": true, "data": ...}` are unwrapped to `data`.
/// `{"success": false}` is a business failure even on a 2xx status.
pub fn interpret_response(status: u16, body: &str) -> ApiResult<Value> {
    if status == 401 || status == 403 {
        return Err(ApiError::Unauthorized { status });
    }

    let trimmed = body.trim();
    let parsed: Option<Value> = if trimmed.is_empty() {
        Some(Value::Null)
    } else {
        serde_json::from_str(trimmed).ok()
    };

    if !(200..300).contains(&status) {
        let message = parsed
            .as_ref()
            .and_then(server_message)
            .unwrap_or_else(|| format!("Request failed (HTTP {}).", status));
        return Err(ApiError::Server {
            status: Some(status),
            message,
        });
    }

    let value = parsed.ok_or_else(|| ApiError::Malformed("response is not JSON".into()))?;

    if let Some(object) = value.as_object() {
        if object.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(ApiError::Server {
                status: Some(status),
                message: server_message(&value).unwrap_or_else(|| DEFAULT_FAILURE.to_string()),
            });
        }
        if object.contains_key("success") {
            if let Some(data) = object.get("data") {
                return Ok(data.clone());
            }
        }
    }

    Ok(value)
}

/// Read a bulk delete reply. The body must be an object carrying a boolean
/// `success`; an empty 2xx body (204 No Content) counts as success.
pub fn interpret_bulk_delete(status: u16, body: &str) -> ApiResult<BulkDeleteResponse> {
    interpret_response(status, body)?;
    if body.trim().is_empty() {
        return Ok(BulkDeleteResponse {
            success: true,
            ..Default::default()
        });
    }
    let value: Value =
        serde_json::from_str(body).map_err(|err| ApiError::Malformed(err.to_string()))?;
    if !value.is_object() {
        warn!(status, "bulk delete reply is not an object");
        return Err(ApiError::Malformed("bulk delete reply is not an object".into()));
    }
    serde_json::from_value(value).map_err(|err| {
        warn!(status, error = %err, "bulk delete reply without a success flag");
        ApiError::Malformed(err.to_string())
    })
}

/// Prefer `error`, then `message`, then `detail`
fn server_message(value: &Value) -> Option<String> {
    ["error", "message", "detail"]
        .iter()
        .filter_map(|key| value.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

impl AdminApi for HttpApi {
    async fn list_rows(&self, resource: &str) -> ApiResult<TableData> {
        let url = self.resource_url(resource, None)?;
        self.send(self.client.get(url)).await
    }

    async fn get_item(&self, resource: &str, id: &RowId) -> ApiResult<Item> {
        let url = self.resource_url(resource, Some(id))?;
        self.send(self.client.get(url)).await
    }

    async fn update_item(&self, resource: &str, id: &RowId, fields: &Item) -> ApiResult<Item> {
        let url = self.resource_url(resource, Some(id))?;
        let value: Value = self.send(self.client.put(url).json(fields)).await?;
        // Some endpoints answer with a bare acknowledgement
        match value {
            Value::Object(item) if !item.contains_key("success") => Ok(item),
            _ => Ok(fields.clone()),
        }
    }

    async fn delete_item(&self, resource: &str, id: &RowId) -> ApiResult<()> {
        let url = self.resource_url(resource, Some(id))?;
        let _: Value = self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn bulk_delete(&self, endpoint: &str, ids: &[RowId]) -> ApiResult<BulkDeleteResponse> {
        let request = self
            .client
            .post(self.url(endpoint))
            .json(&BulkDeleteRequest { ids });
        let (status, body) = self.exchange(request).await?;
        interpret_bulk_delete(status, &body)
    }

    async fn analyze_import(&self, file: &UploadFile) -> ApiResult<AnalyzeResponse> {
        let part = Part::bytes(file.bytes.clone()).file_name(file.name.clone());
        let form = Form::new().part("file", part);
        let url = self.url(&format!("{}/analyze", self.import_endpoint));
        self.send(self.client.post(url).multipart(form)).await
    }

    async fn preview_import(&self, request: &PreviewRequest) -> ApiResult<PreviewResponse> {
        let url = self.url(&format!("{}/preview", self.import_endpoint));
        self.send(self.client.post(url).json(request)).await
    }

    async fn execute_import(&self, request: &ExecuteRequest) -> ApiResult<ImportSummary> {
        let url = self.url(&format!("{}/execute", self.import_endpoint));
        self.send(self.client.post(url).json(request)).await
    }

    async fn list_campaigns(&self) -> ApiResult<Vec<Campaign>> {
        self.send(self.client.get(self.url(&self.campaigns_endpoint)))
            .await
    }
}
