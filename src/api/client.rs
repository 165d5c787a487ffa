//! reqwest-backed implementation of the PZ Server API.
//!
//! All requests carry the user's token; responses are checked uniformly,
//! so callers see one [`ClientError`] regardless of whether the failure
//! was a transport problem or a 4xx/5xx with a message body.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::{ApiBackend, ColumnPatch, FileRole, ResultPage};
use crate::error::ClientError;

/// Known host aliases and their API roots.
const HOSTS: &[(&str, &str)] = &[
    ("localhost", "http://localhost/api/"),
    ("pz-dev", "https://pzserver-dev.linea.org.br/api/"),
    ("pz", "https://pzserver.linea.org.br/api/"),
];

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Resolve a host alias to an API root; anything unknown is taken as a
/// literal URL (normalized to end with `/`).
fn resolve_host(host: &str) -> String {
    for (alias, url) in HOSTS {
        if *alias == host {
            return (*url).to_string();
        }
    }
    if host.ends_with('/') {
        host.to_string()
    } else {
        format!("{}/", host)
    }
}

/// Token-authenticated client for the PZ Server API.
pub struct ApiClient {
    base_url: String,
    token: String,
    http: Client,
}

impl ApiClient {
    /// Create a client for the given token and host.
    ///
    /// `host` is either one of the known aliases (`pz`, `pz-dev`,
    /// `localhost`) or a full API root URL.
    pub fn new(token: impl Into<String>, host: &str) -> Self {
        Self {
            base_url: resolve_host(host),
            token: token.into(),
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Verify the token against the API root.
    ///
    /// The service only answers the root endpoint for valid tokens, so
    /// this doubles as a connection handshake.
    pub async fn check_token(&self) -> Result<(), ClientError> {
        self.request_json(self.http.get(&self.base_url)).await?;
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}{}", self.base_url, suffix)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Token {}", self.token))
    }

    async fn request_json(&self, builder: RequestBuilder) -> Result<Value, ClientError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        check_response(response).await
    }

    async fn page(&self, entity: &str, params: &[(String, String)]) -> Result<ResultPage, ClientError> {
        let value = self
            .request_json(self.http.get(self.url(&format!("{}/", entity))).query(params))
            .await?;
        serde_json::from_value(value).map_err(|e| ClientError::Parse(e.to_string()))
    }
}

/// Map a response to its JSON body, or to one uniform error carrying the
/// status code and the body text verbatim.
async fn check_response(response: Response) -> Result<Value, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ClientError::Api {
            code: status.as_u16(),
            message,
        });
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Ok(Value::Null);
    }
    response
        .json()
        .await
        .map_err(|e| ClientError::Parse(e.to_string()))
}

#[async_trait]
impl ApiBackend for ApiClient {
    async fn get(&self, entity: &str, id: i64) -> Result<Value, ClientError> {
        self.request_json(self.http.get(self.url(&format!("{}/{}/", entity, id))))
            .await
    }

    async fn get_all(
        &self,
        entity: &str,
        ordering: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let params: Vec<(String, String)> = ordering
            .map(|o| vec![("ordering".to_string(), o.to_string())])
            .unwrap_or_default();
        Ok(self.page(entity, &params).await?.results)
    }

    async fn query(
        &self,
        entity: &str,
        params: &[(String, String)],
    ) -> Result<ResultPage, ClientError> {
        self.page(entity, params).await
    }

    async fn post(&self, entity: &str, payload: &Value) -> Result<Value, ClientError> {
        self.request_json(
            self.http
                .post(self.url(&format!("{}/", entity)))
                .json(payload),
        )
        .await
    }

    async fn patch(&self, entity: &str, id: i64, payload: &Value) -> Result<Value, ClientError> {
        self.request_json(
            self.http
                .patch(self.url(&format!("{}/{}/", entity, id)))
                .json(payload),
        )
        .await
    }

    async fn delete(&self, entity: &str, id: i64) -> Result<(), ClientError> {
        self.request_json(self.http.delete(self.url(&format!("{}/{}/", entity, id))))
            .await?;
        Ok(())
    }

    async fn get_action(&self, entity: &str, id: i64, action: &str) -> Result<Value, ClientError> {
        self.request_json(
            self.http
                .get(self.url(&format!("{}/{}/{}/", entity, id, action))),
        )
        .await
    }

    async fn start_process(&self, payload: &Value) -> Result<Value, ClientError> {
        self.post("processes", payload).await
    }

    async fn upload_file(
        &self,
        product_id: i64,
        path: &Path,
        role: FileRole,
        mimetype: Option<&str>,
    ) -> Result<Value, ClientError> {
        // Read the file up front so the handle is released on every exit
        // path before the request goes out.
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.dat")
            .to_string();

        let mut part = multipart::Part::bytes(bytes).file_name(file_name);
        if let Some(mt) = mimetype {
            part = part
                .mime_str(mt)
                .map_err(|e| ClientError::Request(e.to_string()))?;
        }

        let mut form = multipart::Form::new()
            .text("product", product_id.to_string())
            .text("role", role.code().to_string())
            .part("file", part);
        if let Some(mt) = mimetype {
            form = form.text("type", mt.to_string());
        }

        debug!(product_id, path = %path.display(), role = role.code(), "uploading file");
        self.request_json(self.http.post(self.url("product-files/")).multipart(form))
            .await
    }

    async fn update_column(
        &self,
        column_id: i64,
        patch: &ColumnPatch,
    ) -> Result<Value, ClientError> {
        let payload =
            serde_json::to_value(patch).map_err(|e| ClientError::Parse(e.to_string()))?;
        self.patch("product-contents", column_id, &payload).await
    }

    async fn finalize_product(&self, product_id: i64) -> Result<Value, ClientError> {
        // Status 1 marks the product as published.
        self.patch("products", product_id, &json!({ "status": 1 }))
            .await
    }

    async fn download(&self, path: &str, dest_dir: &Path) -> Result<PathBuf, ClientError> {
        let response = self
            .authed(self.http.get(self.url(path)))
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split("filename=").nth(1))
            .map(|v| v.trim_matches('"').to_string())
            .ok_or_else(|| {
                ClientError::Parse("download response missing Content-Disposition".to_string())
            })?;

        let dest = dest_dir.join(filename);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        tokio::fs::write(&dest, &bytes).await?;
        debug!(path = %dest.display(), bytes = bytes.len(), "download written");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_aliases() {
        assert_eq!(resolve_host("pz"), "https://pzserver.linea.org.br/api/");
        assert_eq!(
            resolve_host("pz-dev"),
            "https://pzserver-dev.linea.org.br/api/"
        );
        assert_eq!(resolve_host("localhost"), "http://localhost/api/");
    }

    #[test]
    fn test_resolve_literal_url_normalized() {
        assert_eq!(
            resolve_host("https://example.org/api"),
            "https://example.org/api/"
        );
        assert_eq!(
            resolve_host("https://example.org/api/"),
            "https://example.org/api/"
        );
    }

    #[test]
    fn test_client_urls() {
        let client = ApiClient::new("secret", "pz");
        assert_eq!(
            client.base_url(),
            "https://pzserver.linea.org.br/api/"
        );
        assert_eq!(
            client.url("products/12/"),
            "https://pzserver.linea.org.br/api/products/12/"
        );
    }
}
