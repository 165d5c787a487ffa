//! Training-set generation: a single spec-z catalog joined against a
//! photometric data release.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ManagedProcess, Process, ProcessInfo, ProcessStatus, ProductRef, Selector, StopOutcome};
use crate::api::ApiBackend;
use crate::error::{ClientError, ProcessError};

const PIPELINE_NAME: &str = "training_set_maker";

/// Orchestrator for the training-set-maker pipeline.
///
/// Conceptually single-input: binding a spec-z catalog a second time
/// replaces the previous one, and a release must be selected before the
/// job can be submitted.
pub struct TrainingSetProcess {
    core: Process,
    release: Option<Value>,
    specz: Option<ProductRef>,
}

impl TrainingSetProcess {
    pub async fn new(api: Arc<dyn ApiBackend>, name: impl Into<String>) -> Result<Self, ProcessError> {
        Ok(Self {
            core: Process::new(api, PIPELINE_NAME, name).await?,
            release: None,
            specz: None,
        })
    }

    pub fn core(&self) -> &Process {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Process {
        &mut self.core
    }

    pub fn release(&self) -> Option<&Value> {
        self.release.as_ref()
    }

    pub fn specz(&self) -> Option<&ProductRef> {
        self.specz.as_ref()
    }

    /// Select the data release the training set will be drawn from.
    pub async fn set_release(&mut self, selector: &Selector) -> Result<(), ProcessError> {
        let record = match selector {
            Selector::Id(id) => {
                self.core_api().get("releases", *id).await.map_err(|e| match e {
                    ClientError::Api { code: 404, .. } => {
                        ProcessError::ReleaseNotFound(id.to_string())
                    }
                    other => ProcessError::Api(other),
                })?
            }
            Selector::Name(name) => self
                .core_api()
                .get_by_name("releases", name)
                .await?
                .ok_or_else(|| ProcessError::ReleaseNotFound(name.clone()))?,
        };
        self.release = Some(record);
        Ok(())
    }

    /// Bind the spec-z catalog input, replacing any previous binding.
    pub async fn set_specz(&mut self, selector: &Selector) -> Result<(), ProcessError> {
        let record = self.core.resolve_input(selector).await?;
        let product = ProductRef::from_record(&record)?;
        self.core.clear_inputs();
        self.core.append_input(product.id);
        self.specz = Some(product);
        Ok(())
    }

    fn core_api(&self) -> &dyn ApiBackend {
        self.core.api()
    }

    fn release_id(&self) -> Result<i64, ProcessError> {
        let release = self.release.as_ref().ok_or(ProcessError::MissingRelease)?;
        release
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProcessError::MalformedRecord {
                entity: "releases".to_string(),
                reason: "missing integer field 'id'".to_string(),
            })
    }
}

#[async_trait]
impl ManagedProcess for TrainingSetProcess {
    async fn run(&mut self) -> Result<ProcessInfo, ProcessError> {
        if let Some(info) = self.core.stored_info().await? {
            return Ok(info);
        }
        let release_id = self.release_id()?;
        if self.core.inputs().is_empty() {
            return Err(ProcessError::MissingInput);
        }
        let mut payload = self.core.submission_payload();
        payload["release"] = json!(release_id);
        self.core.submit(payload).await
    }

    async fn check_status(&self) -> Result<ProcessStatus, ProcessError> {
        self.core.check_status().await
    }

    async fn stop(&mut self) -> Result<StopOutcome, ProcessError> {
        self.core.stop().await
    }

    async fn error_payload(&self) -> Result<Option<Value>, ProcessError> {
        self.core.error_payload().await
    }

    fn summary(&self) -> String {
        let mut extra = Vec::new();
        if let Some(specz) = &self.specz {
            extra.push(format!(
                "Specz: id={} internal_name={}",
                specz.id,
                specz.internal_name.as_deref().unwrap_or("-")
            ));
        }
        if let Some(release) = &self.release {
            extra.push(format!(
                "Release: {}",
                release.get("name").and_then(Value::as_str).unwrap_or("-")
            ));
        }
        self.core.describe(&extra)
    }

    fn output(&self) -> Option<&ProductRef> {
        self.core.output()
    }
}
