//! Durable JSON store of assessment verdicts.
//!
//! Layout: document id → object holding pass-through metadata (category,
//! year, key, ...) and one entry per metric:
//!
//! ```json
//! {
//!   "P1": {
//!     "key": "smith2021phish",
//!     "year": 2021,
//!     "f1-coverage": {
//!       "evaluatorA": {"value": "High", "why": "...", "evidence": "..."},
//!       "evaluatorB": {"value": "High", "why": "...", "evidence": "..."},
//!       "final":      {"value": "High", "why": "...", "evidence": "..."}
//!     }
//!   }
//! }
//! ```
//!
//! An object is an assessment record when it carries `evaluatorA`,
//! `evaluatorB`, `final` or `manual`, and every verdict slot it has is itself
//! an object. Everything else is metadata and is written back untouched.
//! Documents and fields keep the order they were loaded in.

use std::fmt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::verdict::Verdict;

const VERDICT_SLOTS: [&str; 3] = ["evaluatorA", "evaluatorB", "final"];
const MANUAL: &str = "manual";

// =============================================================================
// Records
// =============================================================================

/// The three verdicts for one document × metric.
///
/// Unknown keys (e.g. an expert `manual` verdict) are kept and written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    #[serde(
        rename = "evaluatorA",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub evaluator_a: Option<Verdict>,
    #[serde(
        rename = "evaluatorB",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub evaluator_b: Option<Verdict>,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub final_verdict: Option<Verdict>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AssessmentRecord {
    pub fn is_complete(&self) -> bool {
        self.evaluator_a.is_some() && self.evaluator_b.is_some() && self.final_verdict.is_some()
    }

    /// Whether the two evaluators chose the same value. `None` if either is missing.
    pub fn evaluators_agree(&self) -> Option<bool> {
        match (&self.evaluator_a, &self.evaluator_b) {
            (Some(a), Some(b)) => Some(a.agrees_with(b)),
            _ => None,
        }
    }

    /// An expert verdict stored alongside the model verdicts, if any.
    ///
    /// Accepts either a bare value string or a verdict-shaped object.
    pub fn manual_value(&self) -> Option<&str> {
        match self.extra.get(MANUAL)? {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj.get("value").and_then(Value::as_str),
            _ => None,
        }
    }
}

fn is_record_shaped(obj: &Map<String, Value>) -> bool {
    let has_slot = VERDICT_SLOTS.iter().any(|k| obj.contains_key(*k)) || obj.contains_key(MANUAL);
    has_slot
        && VERDICT_SLOTS
            .iter()
            .filter_map(|k| obj.get(*k))
            .all(Value::is_object)
}

/// One named field of a document: pass-through metadata or a metric's record.
#[derive(Debug, Clone, PartialEq)]
enum Field {
    Metadata(Value),
    Assessment(AssessmentRecord),
}

/// Metadata plus assessment records for one document, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentEntry {
    fields: Vec<(String, Field)>,
}

impl DocumentEntry {
    pub fn metadata(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().filter_map(|(k, f)| match f {
            Field::Metadata(v) => Some((k.as_str(), v)),
            Field::Assessment(_) => None,
        })
    }

    pub fn assessments(&self) -> impl Iterator<Item = (&str, &AssessmentRecord)> {
        self.fields.iter().filter_map(|(k, f)| match f {
            Field::Assessment(r) => Some((k.as_str(), r)),
            Field::Metadata(_) => None,
        })
    }

    pub fn metadata_value(&self, field: &str) -> Option<&Value> {
        self.metadata().find(|(k, _)| *k == field).map(|(_, v)| v)
    }

    pub fn metadata_str(&self, field: &str) -> Option<&str> {
        self.metadata_value(field).and_then(Value::as_str)
    }

    pub fn assessment(&self, metric: &str) -> Option<&AssessmentRecord> {
        self.assessments().find(|(k, _)| *k == metric).map(|(_, r)| r)
    }

    fn set_metadata(&mut self, field: &str, value: Value) {
        match self.fields.iter_mut().find(|(k, _)| k == field) {
            Some((_, slot)) => *slot = Field::Metadata(value),
            None => self.fields.push((field.to_string(), Field::Metadata(value))),
        }
    }

    /// Apply `update` to the record for `metric`, appending it if missing.
    ///
    /// A same-named metadata object becomes a record; its keys other than the
    /// verdict slots are kept.
    fn update_assessment(&mut self, metric: &str, update: impl FnOnce(&mut AssessmentRecord)) {
        let idx = match self.fields.iter().position(|(k, _)| k == metric) {
            Some(idx) => idx,
            None => {
                let empty = Field::Assessment(AssessmentRecord::default());
                self.fields.push((metric.to_string(), empty));
                self.fields.len() - 1
            }
        };
        let slot = &mut self.fields[idx].1;
        let mut record = match std::mem::replace(slot, Field::Metadata(Value::Null)) {
            Field::Assessment(record) => record,
            Field::Metadata(value) => record_from_metadata(value),
        };
        update(&mut record);
        *slot = Field::Assessment(record);
    }
}

fn record_from_metadata(value: Value) -> AssessmentRecord {
    let mut extra = match value {
        Value::Object(obj) => obj,
        _ => Map::new(),
    };
    for k in VERDICT_SLOTS {
        extra.remove(k);
    }
    AssessmentRecord {
        extra,
        ..AssessmentRecord::default()
    }
}

impl Serialize for DocumentEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, field) in &self.fields {
            match field {
                Field::Metadata(v) => map.serialize_entry(k, v)?,
                Field::Assessment(r) => map.serialize_entry(k, r)?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DocumentEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        let mut fields = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let field = match value {
                Value::Object(obj) if is_record_shaped(&obj) => {
                    let record = serde_json::from_value(Value::Object(obj))
                        .map_err(|e| D::Error::custom(format!("assessment `{key}`: {e}")))?;
                    Field::Assessment(record)
                }
                other => Field::Metadata(other),
            };
            fields.push((key, field));
        }
        Ok(Self { fields })
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed store {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store {0} is locked by another run")]
    Locked(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Documents keyed by id, in the order they were loaded or first written.
#[derive(Debug, Clone, Default)]
struct Documents(Vec<(String, DocumentEntry)>);

impl Documents {
    fn get(&self, id: &str) -> Option<&DocumentEntry> {
        self.0.iter().find(|(k, _)| k == id).map(|(_, e)| e)
    }

    fn entry(&mut self, id: &str) -> &mut DocumentEntry {
        let idx = match self.0.iter().position(|(k, _)| k == id) {
            Some(idx) => idx,
            None => {
                self.0.push((id.to_string(), DocumentEntry::default()));
                self.0.len() - 1
            }
        };
        &mut self.0[idx].1
    }
}

impl Serialize for Documents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, entry) in &self.0 {
            map.serialize_entry(id, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Documents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        let mut documents = Vec::with_capacity(raw.len());
        for (id, value) in raw {
            let entry = DocumentEntry::deserialize(value)
                .map_err(|e| D::Error::custom(format!("document `{id}`: {e}")))?;
            documents.push((id, entry));
        }
        Ok(Self(documents))
    }
}

/// In-memory verdict store bound to its file.
#[derive(Debug, Clone)]
pub struct VerdictStore {
    path: PathBuf,
    documents: Documents,
}

impl VerdictStore {
    /// Empty store that will be written to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            documents: Documents::default(),
        }
    }

    /// Load from `path`, or start empty if the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(Self::empty(path));
        }
        let documents = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, documents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the whole store: write a sibling temp file, then rename over.
    pub fn save(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.documents)?;
        let tmp = tmp_path(&self.path);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        std::fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }

    /// Take the single-writer lock for this store (`<store>.lock`).
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.path)
    }

    pub fn document(&self, id: &str) -> Option<&DocumentEntry> {
        self.documents.get(id)
    }

    pub fn documents(&self) -> impl Iterator<Item = (&str, &DocumentEntry)> {
        self.documents.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.documents.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.0.is_empty()
    }

    pub fn record(&self, document: &str, metric: &str) -> Option<&AssessmentRecord> {
        self.documents.get(document)?.assessment(metric)
    }

    pub fn is_complete(&self, document: &str, metric: &str) -> bool {
        self.record(document, metric)
            .is_some_and(AssessmentRecord::is_complete)
    }

    /// Pass-through metadata for a document, if the store knows it.
    pub fn document_metadata(&self, document: &str) -> Option<Map<String, Value>> {
        let entry = self.documents.get(document)?;
        Some(
            entry
                .metadata()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    /// Citation key from the document's `key` metadata, if set.
    pub fn citation_key(&self, document: &str) -> Option<&str> {
        self.documents
            .get(document)?
            .metadata_str("key")
            .filter(|k| !k.trim().is_empty())
    }

    /// Insert or replace metadata for a document, keeping its assessments.
    pub fn set_metadata(&mut self, document: &str, field: &str, value: Value) {
        self.documents.entry(document).set_metadata(field, value);
    }

    /// Write all three verdicts for a pair. Other keys on the record survive.
    pub fn commit(
        &mut self,
        document: &str,
        metric: &str,
        evaluator_a: Verdict,
        evaluator_b: Verdict,
        final_verdict: Verdict,
    ) {
        self.documents
            .entry(document)
            .update_assessment(metric, |record| {
                record.evaluator_a = Some(evaluator_a);
                record.evaluator_b = Some(evaluator_b);
                record.final_verdict = Some(final_verdict);
            });
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "assessments.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Exclusive advisory lock held for the duration of a run.
#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl StoreLock {
    fn acquire(store_path: &Path) -> Result<Self, StoreError> {
        let mut lock_path = store_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(store_path.to_path_buf()))?;
        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }
}

impl fmt::Display for StoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
