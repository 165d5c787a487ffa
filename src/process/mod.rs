//! Remote process orchestration: submission, status tracking, cancellation.
//!
//! A [`Process`] manages one job submission against a resolved
//! [`PipelineDescriptor`]: it accumulates inputs (validated against the
//! pipeline's accepted types), submits exactly once, and tracks the remote
//! status. The two pipeline-specific variants
//! ([`TrainingSetProcess`], [`CombineCatalogsProcess`]) wrap the same core
//! with their own payload shaping, behind the shared [`ManagedProcess`]
//! contract.

pub mod combine;
pub mod poll;
pub mod training_set;

pub use combine::CombineCatalogsProcess;
pub use poll::{PollOutcome, PollingSupervisor};
pub use training_set::TrainingSetProcess;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::api::ApiBackend;
use crate::error::{ClientError, ProcessError};
use crate::pipeline::PipelineDescriptor;

/// Status of a remote process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The process has not been submitted; no remote state exists.
    NotSubmitted,
    Pending,
    Running,
    Successful,
    Failed,
    Stopped,
    /// A status string this client does not recognize, kept verbatim.
    Other(String),
}

impl ProcessStatus {
    pub fn from_remote(status: &str) -> Self {
        match status {
            "Pending" => ProcessStatus::Pending,
            "Running" => ProcessStatus::Running,
            "Successful" => ProcessStatus::Successful,
            "Failed" => ProcessStatus::Failed,
            "Stopped" => ProcessStatus::Stopped,
            other => ProcessStatus::Other(other.to_string()),
        }
    }

    /// Whether the remote job is still in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessStatus::Pending | ProcessStatus::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::NotSubmitted => write!(f, "not submitted"),
            ProcessStatus::Pending => write!(f, "Pending"),
            ProcessStatus::Running => write!(f, "Running"),
            ProcessStatus::Successful => write!(f, "Successful"),
            ProcessStatus::Failed => write!(f, "Failed"),
            ProcessStatus::Stopped => write!(f, "Stopped"),
            ProcessStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Selects a record either by numeric id or by its unique name
/// (`internal_name` for products, `name` for releases).
#[derive(Debug, Clone)]
pub enum Selector {
    Id(i64),
    Name(String),
}

impl Selector {
    /// Parse a CLI-style selector: all-digit strings become ids.
    pub fn parse(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(id) => Selector::Id(id),
            Err(_) => Selector::Name(value.to_string()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "{}", id),
            Selector::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Reference to a registered product record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRef {
    pub id: i64,
    pub display_name: Option<String>,
    pub internal_name: Option<String>,
}

impl ProductRef {
    pub(crate) fn from_record(record: &Value) -> Result<Self, ProcessError> {
        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProcessError::MalformedRecord {
                entity: "products".to_string(),
                reason: "missing integer field 'id'".to_string(),
            })?;
        Ok(Self {
            id,
            display_name: record
                .get("display_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            internal_name: record
                .get("internal_name")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Submission info for a process: remote id, last known status, and the
/// output product reference once the service registered it.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub id: i64,
    pub status: ProcessStatus,
    pub output: Option<ProductRef>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing to cancel; the process was never submitted.
    NotSubmitted,
    /// Cancellation request accepted by the service.
    Requested,
}

/// Shared contract over the process variants: submit once, poll, cancel,
/// describe.
#[async_trait]
pub trait ManagedProcess: Send {
    /// Submit the job. Effective-once: a repeated call returns the stored
    /// submission info without issuing a second submission request.
    async fn run(&mut self) -> Result<ProcessInfo, ProcessError>;

    /// Fetch the current remote status. Returns
    /// [`ProcessStatus::NotSubmitted`] without touching the network before
    /// the first submission.
    async fn check_status(&self) -> Result<ProcessStatus, ProcessError>;

    /// Ask the service to stop the job. Local state is not transitioned;
    /// the next `check_status` is authoritative.
    async fn stop(&mut self) -> Result<StopOutcome, ProcessError>;

    /// The error payload reported by the service for a failed job, when
    /// one is available.
    async fn error_payload(&self) -> Result<Option<Value>, ProcessError>;

    /// Human-readable description of the run. Informational only.
    fn summary(&self) -> String;

    /// The resolved output product, once known.
    fn output(&self) -> Option<&ProductRef>;
}

/// Generic orchestrator for one job submission.
pub struct Process {
    api: Arc<dyn ApiBackend>,
    pipeline: Arc<PipelineDescriptor>,
    name: String,
    config: Map<String, Value>,
    inputs: Vec<i64>,
    process_id: Option<i64>,
    output: Option<ProductRef>,
}

impl Process {
    /// Resolve the pipeline and seed the run config from its defaults.
    pub async fn new(
        api: Arc<dyn ApiBackend>,
        pipeline_name: &str,
        name: impl Into<String>,
    ) -> Result<Self, ProcessError> {
        let pipeline = PipelineDescriptor::resolve(api.as_ref(), pipeline_name).await?;
        let config = pipeline.parameters();
        Ok(Self {
            api,
            pipeline,
            name: name.into(),
            config,
            inputs: Vec::new(),
            process_id: None,
            output: None,
        })
    }

    pub fn pipeline(&self) -> &PipelineDescriptor {
        &self.pipeline
    }

    pub(crate) fn api(&self) -> &dyn ApiBackend {
        self.api.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Shallow-merge `partial` into the run config. Keys are not validated
    /// here; the service is the source of truth for acceptable parameters.
    pub fn set_config(&mut self, partial: Map<String, Value>) {
        for (key, value) in partial {
            self.config.insert(key, value);
        }
    }

    pub fn inputs(&self) -> &[i64] {
        &self.inputs
    }

    pub fn submitted(&self) -> bool {
        self.process_id.is_some()
    }

    pub fn process_id(&self) -> Option<i64> {
        self.process_id
    }

    /// Resolve a product by id or unique internal name, then validate its
    /// type against the pipeline's accepted set. Fails before any state
    /// mutation; on success the full record is returned for the caller to
    /// bind however its variant requires.
    pub async fn resolve_input(&self, selector: &Selector) -> Result<Value, ProcessError> {
        let record = match selector {
            Selector::Id(id) => self.api.get("products", *id).await.map_err(|e| match e {
                ClientError::Api { code: 404, .. } => ProcessError::ProductLookup {
                    query: id.to_string(),
                    matches: 0,
                },
                other => ProcessError::Api(other),
            })?,
            Selector::Name(name) => {
                let page = self
                    .api
                    .get_page("products", "internal_name", name)
                    .await?;
                if page.count != 1 {
                    return Err(ProcessError::ProductLookup {
                        query: name.clone(),
                        matches: page.count,
                    });
                }
                page.results
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProcessError::ProductLookup {
                        query: name.clone(),
                        matches: 0,
                    })?
            }
        };

        let type_id = record
            .get("product_type")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProcessError::MalformedRecord {
                entity: "products".to_string(),
                reason: "missing integer field 'product_type'".to_string(),
            })?;
        if !self.pipeline.accepts(type_id) {
            return Err(ProcessError::TypeMismatch {
                product: selector.to_string(),
                type_id,
                pipeline: self.pipeline.name().to_string(),
            });
        }

        Ok(record)
    }

    /// Resolve and append an input product. The generic orchestrator
    /// appends as-is; the pipeline variants layer their replace/dedup
    /// semantics on top.
    pub async fn add_input(&mut self, selector: &Selector) -> Result<ProductRef, ProcessError> {
        let record = self.resolve_input(selector).await?;
        let product = ProductRef::from_record(&record)?;
        self.inputs.push(product.id);
        Ok(product)
    }

    pub(crate) fn append_input(&mut self, product_id: i64) {
        self.inputs.push(product_id);
    }

    pub(crate) fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    pub(crate) fn submission_payload(&self) -> Value {
        json!({
            "display_name": self.name,
            "used_config": { "param": Value::Object(self.config.clone()) },
            "pipeline": self.pipeline.id(),
            "inputs": self.inputs,
        })
    }

    /// Submission info for an already-submitted process, refreshing the
    /// status; `None` before the first submission.
    pub(crate) async fn stored_info(&self) -> Result<Option<ProcessInfo>, ProcessError> {
        match self.process_id {
            Some(id) => {
                let status = self.fetch_status().await?;
                Ok(Some(ProcessInfo {
                    id,
                    status,
                    output: self.output.clone(),
                }))
            }
            None => Ok(None),
        }
    }

    /// Post the payload, record the remote process id (set exactly once),
    /// and resolve the output product reference the service registered for
    /// this run.
    pub(crate) async fn submit(&mut self, payload: Value) -> Result<ProcessInfo, ProcessError> {
        let record = self.api.start_process(&payload).await?;
        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProcessError::MalformedRecord {
                entity: "processes".to_string(),
                reason: "missing integer field 'id'".to_string(),
            })?;
        self.process_id = Some(id);

        if let Some(upload_id) = record.get("upload").and_then(Value::as_i64) {
            let product = self.api.get("products", upload_id).await?;
            self.output = Some(ProductRef::from_record(&product)?);
        }

        let status = record
            .get("status")
            .and_then(Value::as_str)
            .map(ProcessStatus::from_remote)
            .unwrap_or(ProcessStatus::Pending);

        info!(
            process_id = id,
            pipeline = self.pipeline.name(),
            name = %self.name,
            "process submitted"
        );

        Ok(ProcessInfo {
            id,
            status,
            output: self.output.clone(),
        })
    }

    async fn fetch_status(&self) -> Result<ProcessStatus, ProcessError> {
        match self.process_id {
            None => Ok(ProcessStatus::NotSubmitted),
            Some(id) => {
                let record = self.api.get("processes", id).await?;
                Ok(record
                    .get("status")
                    .and_then(Value::as_str)
                    .map(ProcessStatus::from_remote)
                    .unwrap_or_else(|| ProcessStatus::Other("unreported".to_string())))
            }
        }
    }

    async fn fetch_error_payload(&self) -> Result<Option<Value>, ProcessError> {
        match self.process_id {
            None => Ok(None),
            Some(id) => {
                let record = self.api.get("processes", id).await?;
                Ok(record.get("error").filter(|e| !e.is_null()).cloned())
            }
        }
    }

    async fn request_stop(&self) -> Result<StopOutcome, ProcessError> {
        match self.process_id {
            None => Ok(StopOutcome::NotSubmitted),
            Some(id) => {
                self.api.stop_process(id).await?;
                info!(process_id = id, "stop requested");
                Ok(StopOutcome::Requested)
            }
        }
    }

    pub(crate) fn describe(&self, extra: &[String]) -> String {
        let mut lines = vec![
            format!(
                "{}: {}",
                self.pipeline.display_name().unwrap_or_else(|| self.pipeline.name()),
                self.name
            ),
            format!("Configuration: {}", Value::Object(self.config.clone())),
            format!("Inputs: {:?}", self.inputs),
        ];
        lines.extend(extra.iter().cloned());
        if let Some(output) = &self.output {
            lines.push(format!(
                "Output: id={} internal_name={}",
                output.id,
                output.internal_name.as_deref().unwrap_or("-")
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl ManagedProcess for Process {
    async fn run(&mut self) -> Result<ProcessInfo, ProcessError> {
        if let Some(info) = self.stored_info().await? {
            info!(process_id = info.id, "process already submitted");
            return Ok(info);
        }
        let payload = self.submission_payload();
        self.submit(payload).await
    }

    async fn check_status(&self) -> Result<ProcessStatus, ProcessError> {
        self.fetch_status().await
    }

    async fn stop(&mut self) -> Result<StopOutcome, ProcessError> {
        self.request_stop().await
    }

    async fn error_payload(&self) -> Result<Option<Value>, ProcessError> {
        self.fetch_error_payload().await
    }

    fn summary(&self) -> String {
        self.describe(&[])
    }

    fn output(&self) -> Option<&ProductRef> {
        self.output.as_ref()
    }
}
