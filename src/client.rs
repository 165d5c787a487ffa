//! Top-level client facade for the PZ Server.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::api::{ApiBackend, ApiClient};
use crate::error::{ClientError, ProcessError, ProductError, UploadError};
use crate::process::{
    CombineCatalogsProcess, ManagedProcess, PollOutcome, PollingSupervisor, ProcessStatus,
    Selector, TrainingSetProcess,
};
use crate::product::Product;
use crate::upload::{Upload, UploadRequest};

/// User-facing filter keys mapped to the attribute names the products
/// endpoint filters on.
fn map_filter_key(key: &str) -> &str {
    match key {
        "product_type" => "product_type_name",
        "release" => "release_name",
        other => other,
    }
}

/// Client for the PZ Server: catalog listings, uploads, and
/// server-executed processes.
pub struct PzClient {
    api: Arc<dyn ApiBackend>,
}

impl PzClient {
    /// Connect with a token to one of the known hosts (`pz`, `pz-dev`,
    /// `localhost`) or a custom API root, verifying the token before
    /// returning.
    pub async fn connect(token: &str, host: &str) -> Result<Self, ClientError> {
        let api = ApiClient::new(token, host);
        api.check_token().await?;
        info!(base_url = api.base_url(), "connected to PZ Server");
        Ok(Self { api: Arc::new(api) })
    }

    /// Wrap an existing backend.
    pub fn with_backend(api: Arc<dyn ApiBackend>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn ApiBackend> {
        &self.api
    }

    /// Valid product types, in the service's display order.
    pub async fn product_types(&self) -> Result<Vec<Value>, ClientError> {
        self.api.get_all("product-types", Some("order")).await
    }

    /// Known data releases.
    pub async fn releases(&self) -> Result<Vec<Value>, ClientError> {
        self.api.get_all("releases", None).await
    }

    /// Registered users.
    pub async fn users(&self) -> Result<Vec<Value>, ClientError> {
        self.api.get_all("users", None).await
    }

    /// Published products, optionally filtered. Only completed products
    /// are listed; registering uploads stay invisible here.
    pub async fn products(&self, filters: &[(String, String)]) -> Result<Vec<Value>, ClientError> {
        let mut params = vec![("status".to_string(), "1".to_string())];
        params.extend(
            filters
                .iter()
                .map(|(key, value)| (map_filter_key(key).to_string(), value.clone())),
        );
        Ok(self.api.query("products", &params).await?.results)
    }

    /// Handle over one registered product, by id or internal name.
    pub async fn product(&self, selector: &Selector) -> Result<Product, ProductError> {
        Product::fetch(self.api.clone(), selector).await
    }

    /// Start the multi-step upload workflow for a new product.
    pub async fn upload(&self, request: UploadRequest) -> Result<Upload, UploadError> {
        Upload::begin(self.api.clone(), request).await
    }

    /// Orchestrator for a training-set-maker run.
    pub async fn training_set_maker(
        &self,
        name: impl Into<String>,
    ) -> Result<TrainingSetProcess, ProcessError> {
        TrainingSetProcess::new(self.api.clone(), name).await
    }

    /// Orchestrator for a combine-specz run.
    pub async fn combine_catalogs(
        &self,
        name: impl Into<String>,
    ) -> Result<CombineCatalogsProcess, ProcessError> {
        CombineCatalogsProcess::new(self.api.clone(), name).await
    }

    /// One status fetch for a process by remote id.
    pub async fn process_status(&self, process_id: i64) -> Result<ProcessStatus, ClientError> {
        let record = self.api.get("processes", process_id).await?;
        Ok(record
            .get("status")
            .and_then(Value::as_str)
            .map(ProcessStatus::from_remote)
            .unwrap_or_else(|| ProcessStatus::Other("unreported".to_string())))
    }

    /// Ask the service to stop a process by remote id.
    pub async fn stop_process(&self, process_id: i64) -> Result<Value, ClientError> {
        self.api.stop_process(process_id).await
    }

    /// Submit a process and block until it finishes, fails, or the default
    /// 30-minute polling budget runs out.
    pub async fn run_and_wait<P>(&self, process: &mut P) -> Result<PollOutcome, ProcessError>
    where
        P: ManagedProcess + ?Sized,
    {
        PollingSupervisor::default().supervise(process).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use serde_json::json;

    #[tokio::test]
    async fn test_products_filter_mapping() {
        let mock = MockApi::new();
        mock.insert_page(
            "products",
            "status=1&release_name=lsst_dp1",
            vec![json!({ "id": 12, "display_name": "DES specz" })],
        );
        let client = PzClient::with_backend(mock.clone());

        let products = client
            .products(&[("release".to_string(), "lsst_dp1".to_string())])
            .await
            .unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0]["id"], json!(12));
    }

    #[tokio::test]
    async fn test_listings_hit_expected_entities() {
        let mock = MockApi::new();
        mock.insert_list("product-types", vec![json!({ "name": "redshift_catalog" })]);
        mock.insert_list("releases", vec![json!({ "name": "lsst_dp1" })]);
        let client = PzClient::with_backend(mock.clone());

        assert_eq!(client.product_types().await.unwrap().len(), 1);
        assert_eq!(client.releases().await.unwrap().len(), 1);
        assert!(client.users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_status_by_id() {
        let mock = MockApi::new();
        mock.push_status("Running");
        let client = PzClient::with_backend(mock.clone());

        let status = client.process_status(99).await.unwrap();
        assert_eq!(status, ProcessStatus::Running);
    }
}
