//! Operations on an already-registered product.
//!
//! Mutations are gated on the locally cached `is_owner` flag so a caller
//! who does not own the product fails fast, without a wasted round trip.
//! The cache can go stale; the server stays the authority and its own
//! rejection is surfaced unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::api::{ApiBackend, FileRole};
use crate::error::{ClientError, ProductError};
use crate::process::Selector;

/// Handle over one registered product and its cached attributes.
pub struct Product {
    api: Arc<dyn ApiBackend>,
    attrs: Value,
}

impl Product {
    /// Fetch a product by id or unique internal name and cache its
    /// attributes, including the caller's ownership flag.
    pub async fn fetch(api: Arc<dyn ApiBackend>, selector: &Selector) -> Result<Self, ProductError> {
        let attrs = match selector {
            Selector::Id(id) => api.get("products", *id).await.map_err(|e| match e {
                ClientError::Api { code: 404, .. } => ProductError::NotFound(id.to_string()),
                other => ProductError::Api(other),
            })?,
            Selector::Name(name) => {
                let page = api
                    .get_page("products", "internal_name", name)
                    .await
                    .map_err(ProductError::Api)?;
                page.results
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProductError::NotFound(name.clone()))?
            }
        };
        Ok(Self { api, attrs })
    }

    pub fn id(&self) -> i64 {
        self.attrs.get("id").and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.attrs.get("display_name").and_then(Value::as_str)
    }

    pub fn internal_name(&self) -> Option<&str> {
        self.attrs.get("internal_name").and_then(Value::as_str)
    }

    pub fn is_owner(&self) -> bool {
        self.attrs
            .get("is_owner")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The cached attribute record as returned by the service.
    pub fn attributes(&self) -> &Value {
        &self.attrs
    }

    fn ensure_owner(&self) -> Result<(), ProductError> {
        if self.is_owner() {
            Ok(())
        } else {
            Err(ProductError::NotOwner(self.id()))
        }
    }

    /// Attach an auxiliary file. Requires ownership.
    pub async fn attach_auxiliary_file(&self, path: &Path) -> Result<i64, ProductError> {
        self.ensure_owner()?;
        if !path.is_file() {
            return Err(ProductError::FileNotFound(path.to_path_buf()));
        }
        let mimetype = mime_guess::from_path(path).first_raw();
        let record = self
            .api
            .upload_file(self.id(), path, FileRole::Auxiliary, mimetype)
            .await?;
        Ok(record.get("id").and_then(Value::as_i64).unwrap_or(0))
    }

    /// Remove an attached file. Requires ownership.
    pub async fn remove_file(&self, file_id: i64) -> Result<(), ProductError> {
        self.ensure_owner()?;
        self.api.delete("product-files", file_id).await?;
        info!(product_id = self.id(), file_id, "product file removed");
        Ok(())
    }

    /// Replace the free-text description. Requires ownership.
    pub async fn update_description(&self, description: &str) -> Result<Value, ProductError> {
        self.ensure_owner()?;
        let record = self
            .api
            .patch("products", self.id(), &json!({ "description": description }))
            .await?;
        Ok(record)
    }

    /// Delete the product. Requires ownership.
    pub async fn delete(self) -> Result<(), ProductError> {
        self.ensure_owner()?;
        let id = self.id();
        self.api.delete("products", id).await?;
        info!(product_id = id, "product deleted");
        Ok(())
    }

    /// Information about the registered main file, including the column
    /// associations when the schema was parsed.
    pub async fn main_file_info(&self) -> Result<Value, ProductError> {
        let response = self
            .api
            .get_action("products", self.id(), "main_file_info")
            .await?;
        let mut info = response
            .get("main_file")
            .cloned()
            .filter(|v| !v.is_null())
            .ok_or_else(|| ProductError::MissingMainFile(self.id()))?;

        let associations = self
            .api
            .get_page("product-contents", "product", &self.id().to_string())
            .await;
        if let Ok(page) = associations {
            info["columns_association"] = Value::Array(page.results);
        }
        Ok(info)
    }

    /// Download the product archive into `dest_dir`. Returns the written
    /// path.
    pub async fn download(&self, dest_dir: &Path) -> Result<PathBuf, ProductError> {
        let path = format!("products/{}/download/", self.id());
        Ok(self.api.download(&path, dest_dir).await?)
    }
}
