//! In-process metadata service
//!
//! `MemoryApi` answers every `LaminApi` call from in-memory tables. It
//! counts mutations, tracks how many mutating calls overlap, and can be
//! told to fail upcoming calls, which makes it the stand-in for the
//! remote service in tests and in the CLI's `simulate` command.

use serde_json::{json, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::api::{ApiError, ApiResult, LaminApi, NewArtifact, NewTransform, RecordQuery};
use super::metadata::{MODEL_ARTIFACT, MODEL_STORAGE, MODEL_TRANSFORM, MODULE_CORE};
use crate::model::Record;

/// Root of the storage location every fresh `MemoryApi` starts with.
pub const DEFAULT_STORAGE_ROOT: &str = "s3://lamin-memory";

/// In-memory `LaminApi` implementation.
pub struct MemoryApi {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    next_id: AtomicI64,
    faults: Mutex<VecDeque<ApiError>>,
    creates: AtomicUsize,
    updates: AtomicUsize,
    uploads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
    default_storage_id: i64,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::with_storage_root(DEFAULT_STORAGE_ROOT)
    }

    /// Create a service whose default storage location has the given root.
    pub fn with_storage_root(root: &str) -> Self {
        let mut api = Self {
            tables: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            faults: Mutex::new(VecDeque::new()),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency: Duration::ZERO,
            default_storage_id: 0,
        };
        let storage = api.insert(MODULE_CORE, MODEL_STORAGE, storage_record(root));
        api.default_storage_id = record_id(&storage).unwrap_or_default();
        api
    }

    /// Hold every mutating call for `latency` to widen race windows.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call (of any kind) fail with `err`. Queued faults are
    /// consumed in order.
    pub fn fail_next(&self, err: ApiError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(err);
        }
    }

    /// Seed a record directly. Assigns `id`/`uid` if missing; not counted
    /// as a mutation.
    pub fn insert(&self, module: &str, model: &str, mut record: Record) -> Record {
        self.assign_identity(model, &mut record);
        if let Ok(mut tables) = self.tables.lock() {
            tables.entry(table(module, model)).or_default().push(record.clone());
        }
        record
    }

    /// Snapshot of a table.
    pub fn records(&self, module: &str, model: &str) -> Vec<Record> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(&table(module, model)).cloned())
            .unwrap_or_default()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Total create, update and upload calls that succeeded.
    pub fn mutations(&self) -> usize {
        self.creates() + self.updates() + self.uploads()
    }

    /// Highest number of mutating calls observed running at once.
    pub fn max_concurrent_mutations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn assign_identity(&self, model: &str, record: &mut Record) {
        if !record.contains_key("id") {
            record.insert("id".into(), json!(self.next_id.fetch_add(1, Ordering::SeqCst)));
        }
        if !record.contains_key("uid") {
            record.insert("uid".into(), json!(generate_uid(uid_len(model))));
        }
    }

    fn take_fault(&self) -> ApiResult<()> {
        let fault = self.faults.lock().ok().and_then(|mut f| f.pop_front());
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn enter_mutation(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        InFlight(self)
    }

    fn find(&self, module: &str, model: &str, pred: impl Fn(&Record) -> bool) -> Option<Record> {
        let tables = self.tables.lock().ok()?;
        tables.get(&table(module, model))?.iter().find(|r| pred(r)).cloned()
    }

    /// Find a storage location by root, creating it if needed.
    fn storage_for_root(&self, root: &str) -> i64 {
        let existing = self.find(MODULE_CORE, MODEL_STORAGE, |r| {
            r.get("root").and_then(Value::as_str) == Some(root)
        });
        let record = match existing {
            Some(record) => record,
            None => self.insert(MODULE_CORE, MODEL_STORAGE, storage_record(root)),
        };
        record_id(&record).unwrap_or(self.default_storage_id)
    }

    fn create_counted(&self, module: &str, model: &str, record: Record) -> Record {
        let created = self.insert(module, model, record);
        self.creates.fetch_add(1, Ordering::SeqCst);
        created
    }
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a MemoryApi);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LaminApi for MemoryApi {
    fn get_record(
        &self,
        _token: &str,
        module: &str,
        model: &str,
        id_or_uid: &str,
    ) -> ApiResult<Option<Record>> {
        self.take_fault()?;
        Ok(self.find(module, model, |r| matches_id_or_uid(r, id_or_uid)))
    }

    fn get_records(
        &self,
        _token: &str,
        module: &str,
        model: &str,
        query: &RecordQuery,
    ) -> ApiResult<Vec<Record>> {
        self.take_fault()?;
        let mut matching: Vec<Record> = self
            .records(module, model)
            .into_iter()
            .filter(|r| query.filter.iter().all(|(k, v)| r.get(k) == Some(v)))
            .collect();

        if let Some(order_by) = &query.order_by {
            let (field, descending) = match order_by.strip_prefix('-') {
                Some(field) => (field, true),
                None => (order_by.as_str(), false),
            };
            matching.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let page = matching.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    fn create_record(&self, _token: &str, module: &str, model: &str, data: &Record) -> ApiResult<Record> {
        self.take_fault()?;
        let _guard = self.enter_mutation();
        Ok(self.create_counted(module, model, data.clone()))
    }

    fn update_record(
        &self,
        _token: &str,
        module: &str,
        model: &str,
        uid: &str,
        data: &Record,
    ) -> ApiResult<Record> {
        self.take_fault()?;
        let _guard = self.enter_mutation();
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| ApiError::Transient("table lock poisoned".to_string()))?;
        let record = tables
            .get_mut(&table(module, model))
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.get("uid").and_then(Value::as_str) == Some(uid))
            })
            .ok_or_else(|| ApiError::NotFound(format!("{}.{} {}", module, model, uid)))?;
        for (k, v) in data {
            record.insert(k.clone(), v.clone());
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }

    fn create_transform(&self, _token: &str, transform: &NewTransform) -> ApiResult<Record> {
        self.take_fault()?;
        let _guard = self.enter_mutation();
        let mut record = Record::new();
        record.insert("key".into(), json!(transform.key));
        record.insert("version".into(), json!(transform.version));
        record.insert("type".into(), json!(transform.kind));
        insert_opt(&mut record, "source_code", &transform.source_code);
        insert_opt(&mut record, "reference", &transform.reference);
        insert_opt(&mut record, "reference_type", &transform.reference_type);
        insert_opt(&mut record, "description", &transform.description);

        // Check and insert under one lock: the first writer of an identity wins.
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| ApiError::Transient("table lock poisoned".to_string()))?;
        let rows = tables.entry(table(MODULE_CORE, MODEL_TRANSFORM)).or_default();
        let exists = rows.iter().any(|r| {
            r.get("key") == record.get("key") && r.get("version") == record.get("version")
        });
        if exists {
            return Err(ApiError::Rejected {
                status: 409,
                message: format!("transform {}@{} exists", transform.key, transform.version),
            });
        }
        self.assign_identity(MODEL_TRANSFORM, &mut record);
        rows.push(record.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    fn create_artifact(&self, _token: &str, path: &str, artifact: &NewArtifact) -> ApiResult<Record> {
        self.take_fault()?;
        let _guard = self.enter_mutation();

        let (storage_id, key) = match Url::parse(path) {
            Ok(url) if url.scheme() != "file" => {
                let root = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
                let key = url.path().trim_start_matches('/').to_string();
                (self.storage_for_root(&root), key)
            }
            _ => (self.default_storage_id, path.trim_start_matches('/').to_string()),
        };

        let mut record = artifact_record(artifact, path, &key, storage_id);
        record.insert("_key_is_virtual".into(), json!(false));
        record.insert("_overwrite_versions".into(), json!(false));
        Ok(self.create_counted(MODULE_CORE, MODEL_ARTIFACT, record))
    }

    fn upload_artifact(&self, _token: &str, file: &Path, artifact: &NewArtifact) -> ApiResult<Record> {
        self.take_fault()?;
        let _guard = self.enter_mutation();
        let metadata = std::fs::metadata(file)?;
        let key = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut record =
            artifact_record(artifact, &file.display().to_string(), &key, self.default_storage_id);
        record.insert("_key_is_virtual".into(), json!(true));
        record.insert("_overwrite_versions".into(), json!(metadata.is_dir()));
        record.insert("size".into(), json!(metadata.len()));
        let created = self.insert(MODULE_CORE, MODEL_ARTIFACT, record);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    fn get_artifact_by_path(&self, _token: &str, path: &str) -> ApiResult<Option<Record>> {
        self.take_fault()?;
        Ok(self.find(MODULE_CORE, MODEL_ARTIFACT, |r| {
            r.get("path").and_then(Value::as_str) == Some(path)
        }))
    }
}

fn table(module: &str, model: &str) -> String {
    format!("{}.{}", module, model)
}

/// uid length per model, base plus a 4-character version suffix where the
/// service versions records.
fn uid_len(model: &str) -> usize {
    match model {
        MODEL_TRANSFORM => 16,
        MODEL_STORAGE => 12,
        _ => 20,
    }
}

fn generate_uid(len: usize) -> String {
    let mut uid = Uuid::new_v4().simple().to_string();
    uid.truncate(len);
    uid
}

fn record_id(record: &Record) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

fn matches_id_or_uid(record: &Record, id_or_uid: &str) -> bool {
    record.get("uid").and_then(Value::as_str) == Some(id_or_uid)
        || record_id(record).map(|id| id.to_string()).as_deref() == Some(id_or_uid)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        _ => CmpOrdering::Equal,
    }
}

fn insert_opt(record: &mut Record, field: &str, value: &Option<String>) {
    if let Some(v) = value {
        record.insert(field.into(), json!(v));
    }
}

fn storage_record(root: &str) -> Record {
    let mut record = Record::new();
    record.insert("root".into(), json!(root));
    record
}

fn artifact_record(artifact: &NewArtifact, path: &str, key: &str, storage_id: i64) -> Record {
    let mut record = Record::new();
    record.insert("path".into(), json!(path));
    record.insert("key".into(), json!(key));
    record.insert("storage_id".into(), json!(storage_id));
    record.insert("suffix".into(), json!(suffix_of(key)));
    record.insert("run_id".into(), json!(artifact.run_id));
    insert_opt(&mut record, "description", &artifact.description);
    insert_opt(&mut record, "kind", &artifact.kind);
    record
}

fn suffix_of(key: &str) -> String {
    Path::new(key)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_registration_splits_bucket_and_key() {
        let api = MemoryApi::new();
        let record = api
            .create_artifact("t", "s3://bucket/results/counts.csv", &NewArtifact::default())
            .unwrap();

        assert_eq!(record.get("key"), Some(&json!("results/counts.csv")));
        assert_eq!(record.get("suffix"), Some(&json!(".csv")));
        let storage_id = record.get("storage_id").cloned().unwrap();
        let storage = api
            .get_record("t", MODULE_CORE, MODEL_STORAGE, &storage_id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(storage.get("root"), Some(&json!("s3://bucket")));
    }

    #[test]
    fn duplicate_transform_identity_is_a_conflict() {
        let api = MemoryApi::new();
        let new = NewTransform {
            key: "k".into(),
            version: "1".into(),
            kind: "pipeline".into(),
            ..Default::default()
        };
        api.create_transform("t", &new).unwrap();
        let err = api.create_transform("t", &new).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(api.creates(), 1);
    }

    #[test]
    fn queued_faults_fire_in_order() {
        let api = MemoryApi::new();
        api.fail_next(ApiError::Auth("a".into()));
        api.fail_next(ApiError::Transient("b".into()));

        assert!(api.get_record("t", "core", "run", "x").unwrap_err().is_auth());
        assert!(matches!(
            api.get_record("t", "core", "run", "x"),
            Err(ApiError::Transient(_))
        ));
        assert!(api.get_record("t", "core", "run", "x").unwrap().is_none());
    }

    #[test]
    fn get_records_orders_and_pages() {
        let api = MemoryApi::new();
        for n in [3, 1, 2] {
            api.insert("core", "run", Record::from_iter([("n".to_string(), json!(n))]));
        }
        let query = RecordQuery::new().with_order_by("-n").with_offset(1).with_limit(1);
        let page = api.get_records("t", "core", "run", &query).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].get("n"), Some(&json!(2)));
    }
}
