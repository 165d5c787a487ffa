//! Remote API collaborator for the PZ Server.
//!
//! The [`ApiBackend`] trait is the seam between the orchestration/upload
//! logic and the wire: the real [`ApiClient`] speaks token-authenticated
//! JSON over HTTP, while tests substitute a recording mock.

mod client;
#[cfg(test)]
pub(crate) mod mock;

pub use client::ApiClient;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Role of a file attached to a product, encoded as the server's numeric
/// code on the product-files endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Main,
    Description,
    Auxiliary,
}

impl FileRole {
    pub fn code(self) -> u8 {
        match self {
            FileRole::Main => 0,
            FileRole::Description => 1,
            FileRole::Auxiliary => 2,
        }
    }
}

/// One page of a filtered entity listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultPage {
    pub count: u64,
    #[serde(default)]
    pub results: Vec<Value>,
}

/// Patch applied to a discovered upload column.
///
/// Both fields are always serialized: clearing an association sends empty
/// strings, which the server stores as "no role".
#[derive(Debug, Clone, Serialize)]
pub struct ColumnPatch {
    pub ucd: Option<String>,
    pub alias: Option<String>,
}

/// Operations the remote catalog service exposes to this client.
///
/// Every method maps to a single HTTP round trip. Transport failures and
/// application-level rejections are both reported as [`ClientError`]; no
/// retry or backoff happens at this layer.
#[async_trait]
pub trait ApiBackend: Send + Sync {
    /// Fetch one record of an entity by id.
    async fn get(&self, entity: &str, id: i64) -> Result<Value, ClientError>;

    /// Fetch every record of an entity, optionally server-ordered.
    async fn get_all(&self, entity: &str, ordering: Option<&str>)
        -> Result<Vec<Value>, ClientError>;

    /// Filtered listing with arbitrary query parameters.
    async fn query(&self, entity: &str, params: &[(String, String)])
        -> Result<ResultPage, ClientError>;

    /// Create a record.
    async fn post(&self, entity: &str, payload: &Value) -> Result<Value, ClientError>;

    /// Partially update a record.
    async fn patch(&self, entity: &str, id: i64, payload: &Value) -> Result<Value, ClientError>;

    /// Remove a record.
    async fn delete(&self, entity: &str, id: i64) -> Result<(), ClientError>;

    /// Invoke a GET action endpoint on a record (`{entity}/{id}/{action}/`).
    async fn get_action(&self, entity: &str, id: i64, action: &str)
        -> Result<Value, ClientError>;

    /// Submit a process; the response carries `{id, upload, status}`.
    async fn start_process(&self, payload: &Value) -> Result<Value, ClientError>;

    /// Transfer one local file to a product under the given role.
    async fn upload_file(
        &self,
        product_id: i64,
        path: &Path,
        role: FileRole,
        mimetype: Option<&str>,
    ) -> Result<Value, ClientError>;

    /// Patch a discovered column's role association.
    async fn update_column(&self, column_id: i64, patch: &ColumnPatch)
        -> Result<Value, ClientError>;

    /// Flip a product's remote status to published.
    async fn finalize_product(&self, product_id: i64) -> Result<Value, ClientError>;

    /// Stream a download endpoint to a local file, named from the
    /// Content-Disposition header. Returns the written path.
    async fn download(&self, path: &str, dest_dir: &Path) -> Result<PathBuf, ClientError>;

    /// Ask the service to cancel a running process.
    async fn stop_process(&self, process_id: i64) -> Result<Value, ClientError> {
        self.get_action("processes", process_id, "stop").await
    }

    /// Ask the service to parse the files registered for a product.
    async fn registry_upload(&self, product_id: i64) -> Result<Value, ClientError> {
        self.get_action("products", product_id, "registry").await
    }

    /// Filtered listing on a single attribute.
    async fn get_page(
        &self,
        entity: &str,
        attribute: &str,
        value: &str,
    ) -> Result<ResultPage, ClientError> {
        self.query(entity, &[(attribute.to_string(), value.to_string())])
            .await
    }

    /// Look up a record by its unique `name` attribute.
    ///
    /// Returns `None` when nothing matches and fails when the name is not
    /// unique on the server.
    async fn get_by_name(&self, entity: &str, name: &str) -> Result<Option<Value>, ClientError> {
        let page = self.get_page(entity, "name", name).await?;
        if page.count > 1 {
            return Err(ClientError::NotUnique {
                entity: entity.to_string(),
                name: name.to_string(),
                count: page.count,
            });
        }
        Ok(page.results.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_role_codes() {
        assert_eq!(FileRole::Main.code(), 0);
        assert_eq!(FileRole::Description.code(), 1);
        assert_eq!(FileRole::Auxiliary.code(), 2);
    }
}
