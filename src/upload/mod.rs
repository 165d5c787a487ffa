//! Product upload workflow: local validation, file transfer, schema
//! discovery, column association, and finalization.
//!
//! The sequence is mostly irreversible: once the product is registered the
//! service keeps it in a non-published "registering" state until
//! [`Upload::save`] flips it to published. Partial failures (a lost
//! auxiliary transfer, a mid-sequence association error) leave the partial
//! product in place for the caller to retry the specific step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::{ApiBackend, ColumnPatch, FileRole};
use crate::error::UploadError;

/// Semantic role a catalog column can play.
///
/// Each known role carries the canonical display alias and the UCD tag the
/// service stores with the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    Id,
    Ra,
    Dec,
    Redshift,
    RedshiftError,
    RedshiftFlag,
    Survey,
    /// A role outside the fixed vocabulary; persisted as a bare alias
    /// with no UCD tag.
    Custom(String),
}

impl ColumnRole {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "id" => ColumnRole::Id,
            "ra" => ColumnRole::Ra,
            "dec" => ColumnRole::Dec,
            "z" => ColumnRole::Redshift,
            "z_err" => ColumnRole::RedshiftError,
            "z_flag" => ColumnRole::RedshiftFlag,
            "survey" => ColumnRole::Survey,
            _ => ColumnRole::Custom(value.to_string()),
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            ColumnRole::Id => "ID",
            ColumnRole::Ra => "RA",
            ColumnRole::Dec => "Dec",
            ColumnRole::Redshift => "z",
            ColumnRole::RedshiftError => "z_err",
            ColumnRole::RedshiftFlag => "z_flag",
            ColumnRole::Survey => "survey",
            ColumnRole::Custom(name) => name,
        }
    }

    pub fn ucd(&self) -> Option<&'static str> {
        match self {
            ColumnRole::Id => Some("meta.id;meta.main"),
            ColumnRole::Ra => Some("pos.eq.ra;meta.main"),
            ColumnRole::Dec => Some("pos.eq.dec;meta.main"),
            ColumnRole::Redshift => Some("src.redshift"),
            ColumnRole::RedshiftError => Some("stat.error;src.redshift"),
            ColumnRole::RedshiftFlag => Some("stat.rank"),
            ColumnRole::Survey => Some("meta.curation"),
            ColumnRole::Custom(_) => None,
        }
    }
}

/// Aliases that must be associated before a product of the given type can
/// be published.
fn required_aliases(product_type: &str) -> &'static [&'static str] {
    match product_type {
        "redshift_catalog" => &["RA", "Dec", "z"],
        "training_set" => &["z"],
        _ => &[],
    }
}

/// Parameters for a new product upload.
///
/// Every referenced local path is validated at construction time, so a
/// missing file fails here — before any network traffic.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    name: String,
    product_type: String,
    main_file: PathBuf,
    release: Option<String>,
    pz_code: Option<String>,
    auxiliary_files: Vec<PathBuf>,
    description: Option<String>,
}

impl UploadRequest {
    pub fn new(
        name: impl Into<String>,
        product_type: impl Into<String>,
        main_file: impl Into<PathBuf>,
    ) -> Result<Self, UploadError> {
        let main_file = main_file.into();
        ensure_file(&main_file)?;
        Ok(Self {
            name: name.into(),
            product_type: product_type.into(),
            main_file,
            release: None,
            pz_code: None,
            auxiliary_files: Vec::new(),
            description: None,
        })
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn with_pz_code(mut self, pz_code: impl Into<String>) -> Self {
        self.pz_code = Some(pz_code.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_auxiliary_file(mut self, path: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let path = path.into();
        ensure_file(&path)?;
        self.auxiliary_files.push(path);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn main_file(&self) -> &Path {
        &self.main_file
    }

    pub fn auxiliary_files(&self) -> &[PathBuf] {
        &self.auxiliary_files
    }

    /// Re-check every referenced path; paths can vanish between request
    /// construction and the start of the transfer.
    pub fn validate(&self) -> Result<(), UploadError> {
        ensure_file(&self.main_file)?;
        for aux in &self.auxiliary_files {
            ensure_file(aux)?;
        }
        Ok(())
    }
}

fn ensure_file(path: &Path) -> Result<(), UploadError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(UploadError::FileNotFound(path.to_path_buf()))
    }
}

/// A column the service extracted from the uploaded main file.
#[derive(Debug, Clone)]
pub struct DiscoveredColumn {
    pub name: String,
    pub id: i64,
}

/// A column-role association persisted on the server.
#[derive(Debug, Clone)]
pub struct ColumnAssociation {
    pub column_id: i64,
    pub alias: String,
    pub ucd: Option<String>,
}

/// Sequential upload workflow for one new product.
pub struct Upload {
    api: Arc<dyn ApiBackend>,
    request: UploadRequest,
    product_id: i64,
    file_ids: Vec<i64>,
    columns: Vec<DiscoveredColumn>,
    associations: Vec<ColumnAssociation>,
}

impl Upload {
    /// Register the product, transfer its files, and discover the column
    /// set the service extracted from the main file.
    pub async fn begin(api: Arc<dyn ApiBackend>, request: UploadRequest) -> Result<Self, UploadError> {
        request.validate()?;

        let product_id = register_product(api.as_ref(), &request).await?;
        let mut upload = Self {
            api,
            request,
            product_id,
            file_ids: Vec::new(),
            columns: Vec::new(),
            associations: Vec::new(),
        };

        let main_file = upload.request.main_file().to_path_buf();
        let main_id = upload.transfer(&main_file, FileRole::Main).await?;
        upload.file_ids.push(main_id);
        for aux in upload.request.auxiliary_files().to_vec() {
            let id = upload.transfer(&aux, FileRole::Auxiliary).await?;
            upload.file_ids.push(id);
        }

        upload.api.registry_upload(product_id).await?;
        let columns = upload.discover_columns().await;
        upload.columns = columns;

        info!(
            product_id,
            files = upload.file_ids.len(),
            columns = upload.columns.len(),
            "upload registered"
        );
        Ok(upload)
    }

    pub fn product_id(&self) -> i64 {
        self.product_id
    }

    pub fn file_ids(&self) -> &[i64] {
        &self.file_ids
    }

    /// Names of the discovered columns, in discovery order.
    pub fn columns(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn associations(&self) -> &[ColumnAssociation] {
        &self.associations
    }

    fn column_id(&self, name: &str) -> Option<i64> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.id)
    }

    /// Persist a `column name → role` mapping, one column at a time.
    ///
    /// Associations are not batched: a failure partway through leaves the
    /// earlier ones in place and is surfaced immediately.
    pub async fn make_columns_association<'a, I>(&mut self, mapping: I) -> Result<(), UploadError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (column, role_name) in mapping {
            let column_id = self
                .column_id(column)
                .ok_or_else(|| UploadError::UnknownColumn(column.to_string()))?;
            let role = ColumnRole::parse(role_name);
            let patch = ColumnPatch {
                ucd: role.ucd().map(str::to_string),
                alias: Some(role.alias().to_string()),
            };
            self.api.update_column(column_id, &patch).await?;
            self.associations.push(ColumnAssociation {
                column_id,
                alias: role.alias().to_string(),
                ucd: role.ucd().map(str::to_string),
            });
            debug!(column, alias = role.alias(), "column associated");
        }
        Ok(())
    }

    /// Clear every persisted association, one column at a time.
    pub async fn reset_columns_association(&mut self) -> Result<(), UploadError> {
        while let Some(association) = self.associations.first().cloned() {
            let patch = ColumnPatch {
                ucd: Some(String::new()),
                alias: Some(String::new()),
            };
            self.api.update_column(association.column_id, &patch).await?;
            self.associations.remove(0);
        }
        Ok(())
    }

    /// Aliases required by the product type that have not been associated
    /// yet.
    pub fn missing_required_columns(&self) -> Vec<String> {
        required_aliases(self.request.product_type())
            .iter()
            .filter(|alias| !self.associations.iter().any(|a| a.alias == **alias))
            .map(|alias| alias.to_string())
            .collect()
    }

    /// Attach another auxiliary file to the registered product.
    pub async fn add_auxiliary_file(&mut self, path: impl Into<PathBuf>) -> Result<i64, UploadError> {
        let path = path.into();
        ensure_file(&path)?;
        let id = self.transfer(&path, FileRole::Auxiliary).await?;
        self.file_ids.push(id);
        self.request.auxiliary_files.push(path);
        Ok(id)
    }

    /// Attach a description file to the registered product.
    pub async fn add_description_file(&mut self, path: impl Into<PathBuf>) -> Result<i64, UploadError> {
        let path = path.into();
        ensure_file(&path)?;
        let id = self.transfer(&path, FileRole::Description).await?;
        self.file_ids.push(id);
        Ok(id)
    }

    /// Finalize the upload, publishing the product.
    ///
    /// Fails fast, without contacting the service, while any required
    /// column is still unmapped; the remote status stays "registering".
    pub async fn save(&mut self) -> Result<Value, UploadError> {
        let missing = self.missing_required_columns();
        if !missing.is_empty() {
            return Err(UploadError::RequiredColumnsMissing(missing));
        }
        let record = self.api.finalize_product(self.product_id).await?;
        info!(product_id = self.product_id, "upload published");
        Ok(record)
    }

    async fn transfer(&self, path: &Path, role: FileRole) -> Result<i64, UploadError> {
        let mimetype = mime_guess::from_path(path).first_raw();
        let record = self
            .api
            .upload_file(self.product_id, path, role, mimetype)
            .await?;
        record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| UploadError::Malformed("product-files response missing 'id'".to_string()))
    }

    /// Fetch the columns the service extracted from the main file. Some
    /// product types have no parsable schema; that is reported as an empty
    /// column set, not an error.
    async fn discover_columns(&self) -> Vec<DiscoveredColumn> {
        let page = match self
            .api
            .get_page("product-contents", "product", &self.product_id.to_string())
            .await
        {
            Ok(page) => page,
            Err(err) => {
                debug!(product_id = self.product_id, %err, "no column schema available");
                return Vec::new();
            }
        };
        page.results
            .iter()
            .filter_map(|item| {
                let name = item.get("column_name").and_then(Value::as_str)?;
                let id = item.get("id").and_then(Value::as_i64)?;
                Some(DiscoveredColumn {
                    name: name.to_string(),
                    id,
                })
            })
            .collect()
    }
}

/// Resolve the product-type and release names, then create the product
/// record in its "registering" state.
async fn register_product(api: &dyn ApiBackend, request: &UploadRequest) -> Result<i64, UploadError> {
    let product_type = api
        .get_by_name("product-types", &request.product_type)
        .await?
        .ok_or_else(|| UploadError::ProductTypeNotFound(request.product_type.clone()))?;
    let product_type_id = product_type.get("id").and_then(Value::as_i64);

    let release_id = match &request.release {
        Some(release) => {
            let record = api
                .get_by_name("releases", release)
                .await?
                .ok_or_else(|| UploadError::ReleaseNotFound(release.clone()))?;
            record.get("id").and_then(Value::as_i64)
        }
        None => None,
    };

    let payload = json!({
        "display_name": request.name,
        "product_type": product_type_id,
        "release": release_id,
        "official_product": false,
        "pz_code": request.pz_code,
        "description": request.description,
        // Status 0 keeps the product in its non-published registering state.
        "status": 0,
    });

    let record = api.post("products", &payload).await?;
    record
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| UploadError::Malformed("products response missing 'id'".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockApi;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        main: PathBuf,
        aux: PathBuf,
    }

    fn fixture_files() -> Fixture {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("catalog.csv");
        let aux = dir.path().join("notes.txt");
        fs::write(&main, "id,ra,dec,z\n1,10.0,-4.2,0.3\n").unwrap();
        fs::write(&aux, "calibration notes\n").unwrap();
        Fixture {
            _dir: dir,
            main,
            aux,
        }
    }

    fn seed_catalog_service(mock: &MockApi) {
        mock.insert_page(
            "product-types",
            "name=redshift_catalog",
            vec![serde_json::json!({ "id": 21, "name": "redshift_catalog" })],
        );
        mock.insert_page(
            "releases",
            "name=lsst_dp1",
            vec![serde_json::json!({ "id": 5, "name": "lsst_dp1" })],
        );
    }

    fn seed_columns(mock: &MockApi, product_id: i64) {
        mock.insert_page(
            "product-contents",
            &format!("product={}", product_id),
            vec![
                serde_json::json!({ "id": 901, "column_name": "obj_id" }),
                serde_json::json!({ "id": 902, "column_name": "ra_deg" }),
                serde_json::json!({ "id": 903, "column_name": "dec_deg" }),
                serde_json::json!({ "id": 904, "column_name": "spec_z" }),
            ],
        );
    }

    async fn begin_upload(mock: &Arc<MockApi>, fixture: &Fixture) -> Upload {
        seed_catalog_service(mock);
        // The mock assigns the first posted product id 500.
        seed_columns(mock, 500);
        let request = UploadRequest::new("DES specz", "redshift_catalog", &fixture.main)
            .unwrap()
            .with_release("lsst_dp1")
            .with_auxiliary_file(&fixture.aux)
            .unwrap();
        Upload::begin(mock.clone(), request).await.unwrap()
    }

    #[test]
    fn test_missing_main_file_fails_without_network() {
        let mock = MockApi::new();
        let err = UploadRequest::new("x", "redshift_catalog", "/nonexistent/catalog.csv")
            .unwrap_err();
        assert!(matches!(err, UploadError::FileNotFound(_)));
        assert_eq!(mock.total_calls(), 0);
    }

    #[test]
    fn test_missing_auxiliary_file_fails_without_network() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        let err = UploadRequest::new("x", "redshift_catalog", &fixture.main)
            .unwrap()
            .with_auxiliary_file("/nonexistent/notes.txt")
            .unwrap_err();
        assert!(matches!(err, UploadError::FileNotFound(_)));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_begin_registers_and_transfers() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        let upload = begin_upload(&mock, &fixture).await;

        assert_eq!(upload.product_id(), 500);
        assert_eq!(upload.file_ids().len(), 2);
        assert_eq!(
            upload.columns(),
            vec!["obj_id", "ra_deg", "dec_deg", "spec_z"]
        );
        assert_eq!(mock.calls("action:products:registry"), 1);

        let uploaded = mock.uploaded.lock().unwrap().clone();
        assert_eq!(uploaded.len(), 2);
        assert_eq!(uploaded[0].2, FileRole::Main.code());
        assert_eq!(uploaded[1].2, FileRole::Auxiliary.code());
    }

    #[tokio::test]
    async fn test_save_blocks_until_required_columns_mapped() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        let mut upload = begin_upload(&mock, &fixture).await;

        upload
            .make_columns_association([("ra_deg", "RA"), ("dec_deg", "Dec")])
            .await
            .unwrap();

        let err = upload.save().await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::RequiredColumnsMissing(ref missing) if missing == &["z".to_string()]
        ));
        assert_eq!(mock.calls("finalize_product"), 0);

        upload
            .make_columns_association([("spec_z", "z")])
            .await
            .unwrap();
        let record = upload.save().await.unwrap();
        assert_eq!(record["status"], serde_json::json!(1));
        assert_eq!(mock.calls("finalize_product"), 1);
    }

    #[tokio::test]
    async fn test_training_set_requires_only_redshift() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        mock.insert_page(
            "product-types",
            "name=training_set",
            vec![serde_json::json!({ "id": 35, "name": "training_set" })],
        );
        seed_columns(&mock, 500);
        let request = UploadRequest::new("tset", "training_set", &fixture.main).unwrap();
        let mut upload = Upload::begin(mock.clone(), request).await.unwrap();

        assert_eq!(upload.missing_required_columns(), vec!["z".to_string()]);
        upload
            .make_columns_association([("spec_z", "z")])
            .await
            .unwrap();
        assert!(upload.missing_required_columns().is_empty());
        upload.save().await.unwrap();
    }

    #[tokio::test]
    async fn test_mid_association_failure_keeps_earlier_columns() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        let mut upload = begin_upload(&mock, &fixture).await;
        mock.fail_op_at("update_column", 2, 500, "schema lock contention");

        let err = upload
            .make_columns_association([("ra_deg", "RA"), ("dec_deg", "Dec")])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Api(_)));
        assert_eq!(upload.associations().len(), 1);
        assert_eq!(upload.associations()[0].alias, "RA");
    }

    #[tokio::test]
    async fn test_unknown_column_is_rejected_locally() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        let mut upload = begin_upload(&mock, &fixture).await;
        let before = mock.calls("update_column");

        let err = upload
            .make_columns_association([("no_such_column", "RA")])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownColumn(_)));
        assert_eq!(mock.calls("update_column"), before);
    }

    #[tokio::test]
    async fn test_custom_role_has_no_ucd() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        let mut upload = begin_upload(&mock, &fixture).await;

        upload
            .make_columns_association([("obj_id", "observation_run")])
            .await
            .unwrap();
        assert_eq!(upload.associations()[0].alias, "observation_run");
        assert_eq!(upload.associations()[0].ucd, None);
    }

    #[tokio::test]
    async fn test_reset_clears_associations() {
        let mock = MockApi::new();
        let fixture = fixture_files();
        let mut upload = begin_upload(&mock, &fixture).await;

        upload
            .make_columns_association([("ra_deg", "RA"), ("dec_deg", "Dec")])
            .await
            .unwrap();
        let before = mock.calls("update_column");
        upload.reset_columns_association().await.unwrap();

        assert!(upload.associations().is_empty());
        assert_eq!(mock.calls("update_column"), before + 2);
    }

    #[test]
    fn test_role_vocabulary() {
        assert_eq!(ColumnRole::parse("RA").alias(), "RA");
        assert_eq!(ColumnRole::parse("ra").ucd(), Some("pos.eq.ra;meta.main"));
        assert_eq!(ColumnRole::parse("Z").alias(), "z");
        assert_eq!(ColumnRole::parse("z_err").ucd(), Some("stat.error;src.redshift"));
        assert!(matches!(ColumnRole::parse("weird"), ColumnRole::Custom(_)));
    }
}
