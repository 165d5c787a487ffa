//! Catalog combination: concatenating an open list of spec-z catalogs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{ManagedProcess, Process, ProcessInfo, ProcessStatus, ProductRef, Selector, StopOutcome};
use crate::api::ApiBackend;
use crate::error::ProcessError;

const PIPELINE_NAME: &str = "combine_specz";

/// Orchestrator for the combine-specz pipeline.
///
/// Accepts any number of same-type catalog inputs. Re-appending an id
/// already present is ignored; insertion order is preserved because the
/// combination order drives deterministic tie-breaking on the server.
pub struct CombineCatalogsProcess {
    core: Process,
    catalogs: Vec<ProductRef>,
}

impl CombineCatalogsProcess {
    pub async fn new(api: Arc<dyn ApiBackend>, name: impl Into<String>) -> Result<Self, ProcessError> {
        Ok(Self {
            core: Process::new(api, PIPELINE_NAME, name).await?,
            catalogs: Vec::new(),
        })
    }

    pub fn core(&self) -> &Process {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Process {
        &mut self.core
    }

    pub fn input_catalogs(&self) -> &[ProductRef] {
        &self.catalogs
    }

    /// Append one catalog to the combination, validating its type.
    /// Duplicates are silently skipped.
    pub async fn append_catalog(&mut self, selector: &Selector) -> Result<(), ProcessError> {
        let record = self.core.resolve_input(selector).await?;
        let product = ProductRef::from_record(&record)?;
        if self.core.inputs().contains(&product.id) {
            return Ok(());
        }
        self.core.append_input(product.id);
        self.catalogs.push(product);
        Ok(())
    }
}

#[async_trait]
impl ManagedProcess for CombineCatalogsProcess {
    async fn run(&mut self) -> Result<ProcessInfo, ProcessError> {
        if let Some(info) = self.core.stored_info().await? {
            return Ok(info);
        }
        let payload = self.core.submission_payload();
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
        if !self.catalogs.is_empty() {
            let names: Vec<&str> = self
                .catalogs
                .iter()
                .map(|c| c.internal_name.as_deref().unwrap_or("-"))
                .collect();
            extra.push(format!("Input catalogs: {}", names.join(", ")));
        }
        self.core.describe(&extra)
    }

    fn output(&self) -> Option<&ProductRef> {
        self.core.output()
    }
}
