//! Pipeline descriptors: immutable views of server-side job types.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::api::ApiBackend;
use crate::error::ProcessError;

/// A resolved `{id, name}` reference to a product type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTypeRef {
    pub id: i64,
    pub name: String,
}

/// Immutable snapshot of a named server-side pipeline.
///
/// Built once by [`PipelineDescriptor::resolve`]: the accepted-input type
/// list and the output type are fetched eagerly at construction and never
/// refreshed, so one descriptor can back any number of process
/// orchestrators without synchronization.
pub struct PipelineDescriptor {
    id: i64,
    name: String,
    display_name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    accepted_input_types: Vec<ProductTypeRef>,
    output_type: Option<ProductTypeRef>,
    parameters: Map<String, Value>,
}

impl PipelineDescriptor {
    /// Look up a pipeline by name and resolve its type references.
    ///
    /// Each accepted-input type id costs one extra fetch; pipeline
    /// metadata changes rarely and is read once per orchestrator
    /// construction, not per input.
    pub async fn resolve(api: &dyn ApiBackend, name: &str) -> Result<Arc<Self>, ProcessError> {
        let record = api
            .get_by_name("pipelines", name)
            .await?
            .ok_or_else(|| ProcessError::PipelineNotFound(name.to_string()))?;

        let id = required_i64(&record, "pipelines", "id")?;

        let mut accepted_input_types = Vec::new();
        let accepted_ids: Vec<i64> = record
            .get("product_types_accepted")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        for type_id in accepted_ids {
            accepted_input_types.push(resolve_product_type(api, type_id).await?);
        }

        let output_type = match record.get("output_product_type").and_then(Value::as_i64) {
            Some(type_id) => Some(resolve_product_type(api, type_id).await?),
            None => None,
        };

        let parameters = record
            .get("system_config")
            .and_then(|config| config.get("param"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        debug!(
            pipeline = name,
            accepted = accepted_input_types.len(),
            "pipeline descriptor resolved"
        );

        Ok(Arc::new(Self {
            id,
            name: name.to_string(),
            display_name: string_field(&record, "display_name"),
            version: string_field(&record, "version"),
            description: string_field(&record, "description"),
            accepted_input_types,
            output_type,
            parameters,
        }))
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn accepted_input_types(&self) -> &[ProductTypeRef] {
        &self.accepted_input_types
    }

    pub fn output_type(&self) -> Option<&ProductTypeRef> {
        self.output_type.as_ref()
    }

    /// Whether the pipeline accepts inputs of the given product type.
    pub fn accepts(&self, type_id: i64) -> bool {
        self.accepted_input_types.iter().any(|t| t.id == type_id)
    }

    /// Names of the accepted input types, for summaries.
    pub fn accepted_type_names(&self) -> Vec<&str> {
        self.accepted_input_types
            .iter()
            .map(|t| t.name.as_str())
            .collect()
    }

    /// A copy of the pipeline's default parameter map.
    ///
    /// Always a fresh copy: two orchestrators seeded from one descriptor
    /// must never share config storage.
    pub fn parameters(&self) -> Map<String, Value> {
        self.parameters.clone()
    }
}

async fn resolve_product_type(
    api: &dyn ApiBackend,
    type_id: i64,
) -> Result<ProductTypeRef, ProcessError> {
    let record = api.get("product-types", type_id).await?;
    Ok(ProductTypeRef {
        id: type_id,
        name: string_field(&record, "name").unwrap_or_default(),
    })
}

fn string_field(record: &Value, field: &str) -> Option<String> {
    record.get(field).and_then(Value::as_str).map(str::to_string)
}

fn required_i64(record: &Value, entity: &str, field: &str) -> Result<i64, ProcessError> {
    record
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| ProcessError::MalformedRecord {
            entity: entity.to_string(),
            reason: format!("missing integer field '{}'", field),
        })
}
