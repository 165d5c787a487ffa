//! Recording mock backend shared by the unit tests.
//!
//! Responses are scripted per entity; every call is counted under an
//! operation key so tests can assert exactly which round trips happened
//! (or that none did).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ApiBackend, ColumnPatch, FileRole, ResultPage};
use crate::error::ClientError;

struct FailureRule {
    code: u16,
    message: String,
    /// 1-based call index the failure fires at; `None` fails every call.
    at: Option<usize>,
}

#[derive(Default)]
pub(crate) struct MockApi {
    records: Mutex<HashMap<(String, i64), Value>>,
    pages: Mutex<HashMap<(String, String), Vec<Value>>>,
    lists: Mutex<HashMap<String, Vec<Value>>>,
    actions: Mutex<HashMap<(String, i64, String), Value>>,
    statuses: Mutex<VecDeque<String>>,
    last_status: Mutex<Option<String>>,
    process_error: Mutex<Option<Value>>,
    start_response: Mutex<Option<Value>>,
    pub last_start_payload: Mutex<Option<Value>>,
    pub uploaded: Mutex<Vec<(i64, PathBuf, u8)>>,
    next_id: AtomicI64,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, FailureRule>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        let mock = Self {
            next_id: AtomicI64::new(500),
            ..Self::default()
        };
        Arc::new(mock)
    }

    pub fn insert_record(&self, entity: &str, id: i64, record: Value) {
        self.records
            .lock()
            .unwrap()
            .insert((entity.to_string(), id), record);
    }

    /// Script the results for a filtered listing; `query` is the joined
    /// `k=v&k=v` parameter string the call will produce.
    pub fn insert_page(&self, entity: &str, query: &str, results: Vec<Value>) {
        self.pages
            .lock()
            .unwrap()
            .insert((entity.to_string(), query.to_string()), results);
    }

    pub fn insert_list(&self, entity: &str, results: Vec<Value>) {
        self.lists
            .lock()
            .unwrap()
            .insert(entity.to_string(), results);
    }

    pub fn insert_action(&self, entity: &str, id: i64, action: &str, response: Value) {
        self.actions
            .lock()
            .unwrap()
            .insert((entity.to_string(), id, action.to_string()), response);
    }

    /// Queue the status reported by the next `get("processes", _)` call;
    /// once the queue drains, the last queued status repeats.
    pub fn push_status(&self, status: &str) {
        self.statuses.lock().unwrap().push_back(status.to_string());
    }

    pub fn set_process_error(&self, error: Value) {
        *self.process_error.lock().unwrap() = Some(error);
    }

    pub fn set_start_response(&self, response: Value) {
        *self.start_response.lock().unwrap() = Some(response);
    }

    /// Make every call under `op` fail with the given API error.
    pub fn fail_op(&self, op: &str, code: u16, message: &str) {
        self.failures.lock().unwrap().insert(
            op.to_string(),
            FailureRule {
                code,
                message: message.to_string(),
                at: None,
            },
        );
    }

    /// Make only the `nth` call (1-based) under `op` fail.
    pub fn fail_op_at(&self, op: &str, nth: usize, code: u16, message: &str) {
        self.failures.lock().unwrap().insert(
            op.to_string(),
            FailureRule {
                code,
                message: message.to_string(),
                at: Some(nth),
            },
        );
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn record_call(&self, op: &str) -> Result<(), ClientError> {
        let mut calls = self.calls.lock().unwrap();
        let n = calls.entry(op.to_string()).or_insert(0);
        *n += 1;
        let n = *n;
        drop(calls);

        if let Some(rule) = self.failures.lock().unwrap().get(op) {
            if rule.at.map(|at| at == n).unwrap_or(true) {
                return Err(ClientError::Api {
                    code: rule.code,
                    message: rule.message.clone(),
                });
            }
        }
        Ok(())
    }

    fn next_status(&self) -> String {
        let mut queue = self.statuses.lock().unwrap();
        match queue.pop_front() {
            Some(status) => {
                if queue.is_empty() {
                    *self.last_status.lock().unwrap() = Some(status.clone());
                }
                status
            }
            None => self
                .last_status
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "Pending".to_string()),
        }
    }

    fn assign_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiBackend for MockApi {
    async fn get(&self, entity: &str, id: i64) -> Result<Value, ClientError> {
        self.record_call(&format!("get:{}", entity))?;
        if entity == "processes" {
            let mut record = json!({ "id": id, "status": self.next_status() });
            if let Some(error) = self.process_error.lock().unwrap().clone() {
                record["error"] = error;
            }
            return Ok(record);
        }
        self.records
            .lock()
            .unwrap()
            .get(&(entity.to_string(), id))
            .cloned()
            .ok_or_else(|| ClientError::Api {
                code: 404,
                message: "Not found.".to_string(),
            })
    }

    async fn get_all(&self, entity: &str, _ordering: Option<&str>) -> Result<Vec<Value>, ClientError> {
        self.record_call(&format!("get_all:{}", entity))?;
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(entity)
            .cloned()
            .unwrap_or_default())
    }

    async fn query(
        &self,
        entity: &str,
        params: &[(String, String)],
    ) -> Result<ResultPage, ClientError> {
        self.record_call(&format!("query:{}", entity))?;
        let key = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let results = self
            .pages
            .lock()
            .unwrap()
            .get(&(entity.to_string(), key))
            .cloned()
            .unwrap_or_default();
        Ok(ResultPage {
            count: results.len() as u64,
            results,
        })
    }

    async fn post(&self, entity: &str, payload: &Value) -> Result<Value, ClientError> {
        self.record_call(&format!("post:{}", entity))?;
        let id = self.assign_id();
        let mut record = payload.clone();
        record["id"] = json!(id);
        self.insert_record(entity, id, record.clone());
        Ok(record)
    }

    async fn patch(&self, entity: &str, id: i64, payload: &Value) -> Result<Value, ClientError> {
        self.record_call(&format!("patch:{}", entity))?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry((entity.to_string(), id))
            .or_insert_with(|| json!({ "id": id }));
        if let (Some(target), Some(fields)) = (record.as_object_mut(), payload.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, entity: &str, id: i64) -> Result<(), ClientError> {
        self.record_call(&format!("delete:{}", entity))?;
        self.records
            .lock()
            .unwrap()
            .remove(&(entity.to_string(), id));
        Ok(())
    }

    async fn get_action(&self, entity: &str, id: i64, action: &str) -> Result<Value, ClientError> {
        self.record_call(&format!("action:{}:{}", entity, action))?;
        Ok(self
            .actions
            .lock()
            .unwrap()
            .get(&(entity.to_string(), id, action.to_string()))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn start_process(&self, payload: &Value) -> Result<Value, ClientError> {
        self.record_call("start_process")?;
        *self.last_start_payload.lock().unwrap() = Some(payload.clone());
        Ok(self
            .start_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| json!({ "id": 99, "status": "Pending" })))
    }

    async fn upload_file(
        &self,
        product_id: i64,
        path: &Path,
        role: FileRole,
        _mimetype: Option<&str>,
    ) -> Result<Value, ClientError> {
        self.record_call("upload_file")?;
        self.uploaded
            .lock()
            .unwrap()
            .push((product_id, path.to_path_buf(), role.code()));
        Ok(json!({ "id": self.assign_id() }))
    }

    async fn update_column(
        &self,
        column_id: i64,
        patch: &ColumnPatch,
    ) -> Result<Value, ClientError> {
        self.record_call("update_column")?;
        Ok(json!({
            "id": column_id,
            "ucd": patch.ucd,
            "alias": patch.alias,
        }))
    }

    async fn finalize_product(&self, product_id: i64) -> Result<Value, ClientError> {
        self.record_call("finalize_product")?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(("products".to_string(), product_id))
            .or_insert_with(|| json!({ "id": product_id }));
        record["status"] = json!(1);
        Ok(record.clone())
    }

    async fn download(&self, _path: &str, dest_dir: &Path) -> Result<PathBuf, ClientError> {
        self.record_call("download")?;
        Ok(dest_dir.join("mock-download.zip"))
    }
}
