//! Admin API abstraction.
//!
//! This module provides:
//! - `AdminApi` trait for abstracting the REST server behind the panel
//! - `HttpApi` implementation using reqwest
//! - Wire types exchanged with the server

pub mod http;

#[cfg(test)]
pub mod fake;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::import::mapping::ColumnMapping;

/// Server-assigned key of one table row. Numeric ids are kept as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        RowId(value.to_string())
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        RowId(value)
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        RowId(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RowId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match Helper::deserialize(deserializer)? {
            Helper::Text(text) => RowId(text),
            Helper::Signed(n) => RowId(n.to_string()),
            Helper::Unsigned(n) => RowId(n.to_string()),
        })
    }
}

/// One rendered row of an admin table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableRow {
    pub id: RowId,
    #[serde(default)]
    pub cells: Vec<String>,
}

/// Contents of one admin page
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
}

impl TableData {
    pub fn ids(&self) -> Vec<RowId> {
        self.rows.iter().map(|row| row.id.clone()).collect()
    }
}

/// A single entity as returned by `GET /<resource>/<id>`
pub type Item = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize)]
pub struct BulkDeleteRequest<'a> {
    pub ids: &'a [RowId],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BulkDeleteResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A file picked for import
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl UploadFile {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self { name, bytes })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub sample: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRequest {
    pub mapping: ColumnMapping,
    pub limit: usize,
}

/// How one sample row resolves under the current mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PreviewRow {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PreviewResponse {
    #[serde(default)]
    pub rows: Vec<PreviewRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub mapping: ColumnMapping,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImportSummary {
    #[serde(default)]
    pub inserted: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Campaign {
    pub id: RowId,
    #[serde(default)]
    pub name: String,
}

/// Trait for the REST server behind the admin panel
pub trait AdminApi: Send + Sync {
    /// Load the rows of one admin table
    fn list_rows(&self, resource: &str) -> impl Future<Output = ApiResult<TableData>> + Send;

    fn get_item(&self, resource: &str, id: &RowId) -> impl Future<Output = ApiResult<Item>> + Send;

    /// Replace fields of one item, returns the stored item
    fn update_item(
        &self,
        resource: &str,
        id: &RowId,
        fields: &Item,
    ) -> impl Future<Output = ApiResult<Item>> + Send;

    fn delete_item(&self, resource: &str, id: &RowId) -> impl Future<Output = ApiResult<()>> + Send;

    /// Delete many rows in one request
    fn bulk_delete(
        &self,
        endpoint: &str,
        ids: &[RowId],
    ) -> impl Future<Output = ApiResult<BulkDeleteResponse>> + Send;

    /// Upload a file and detect its columns
    fn analyze_import(
        &self,
        file: &UploadFile,
    ) -> impl Future<Output = ApiResult<AnalyzeResponse>> + Send;

    /// Dry-run the mapping against sample rows
    fn preview_import(
        &self,
        request: &PreviewRequest,
    ) -> impl Future<Output = ApiResult<PreviewResponse>> + Send;

    fn execute_import(
        &self,
        request: &ExecuteRequest,
    ) -> impl Future<Output = ApiResult<ImportSummary>> + Send;

    fn list_campaigns(&self) -> impl Future<Output = ApiResult<Vec<Campaign>>> + Send;
}
