//! File-backed cache of raw provider responses.
//!
//! One plain-text file per (document cache key, metric, role), named
//! `{doc_key}-{metric}.{role}`. Presence of the file is a cache hit; the
//! contents are the provider output exactly as received.
//!
//! The naming is lossy: `a-b` × `c` and `a` × `b-c` share a file, and so do
//! keys that only differ in sanitized characters. [`stem_collisions`] finds
//! such pairs up front so a run can report them.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Which call produced a cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    EvaluatorA,
    EvaluatorB,
    Arbitrator,
}

impl CallRole {
    pub const ALL: [CallRole; 3] = [
        CallRole::EvaluatorA,
        CallRole::EvaluatorB,
        CallRole::Arbitrator,
    ];

    /// File extension used for this role's cache files.
    pub fn slug(self) -> &'static str {
        match self {
            CallRole::EvaluatorA => "evaluator_a",
            CallRole::EvaluatorB => "evaluator_b",
            CallRole::Arbitrator => "arbitrator",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        CallRole::ALL.into_iter().find(|r| r.slug() == slug)
    }
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseCacheKey {
    pub document_key: String,
    pub metric: String,
    pub role: CallRole,
}

impl ResponseCacheKey {
    pub fn new(document_key: &str, metric: &str, role: CallRole) -> Self {
        Self {
            document_key: document_key.to_string(),
            metric: metric.to_string(),
            role,
        }
    }

    /// Deterministic file name for this key.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem(), self.role.slug())
    }

    /// File name without the role extension.
    pub fn stem(&self) -> String {
        format!(
            "{}-{}",
            sanitize_component(&self.document_key),
            sanitize_component(&self.metric)
        )
    }
}

/// Two distinct (document key, metric) pairs that map to the same cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemCollision {
    pub stem: String,
    pub first: (String, String),
    pub second: (String, String),
}

/// Every pair in `pairs` whose cache stem was already taken by an earlier,
/// different pair.
pub fn stem_collisions<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<StemCollision> {
    let mut seen: HashMap<String, (&str, &str)> = HashMap::new();
    let mut collisions = Vec::new();
    for (document_key, metric) in pairs {
        let stem = ResponseCacheKey::new(document_key, metric, CallRole::EvaluatorA).stem();
        match seen.get(&stem) {
            Some(&first) if first != (document_key, metric) => collisions.push(StemCollision {
                stem,
                first: (first.0.to_string(), first.1.to_string()),
                second: (document_key.to_string(), metric.to_string()),
            }),
            Some(_) => {}
            None => {
                seen.insert(stem, (document_key, metric));
            }
        }
    }
    collisions
}

/// Replace characters that cannot appear in a single path component.
fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(String),
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &ResponseCacheKey) -> Result<Option<String>, CacheError>;
    async fn put(&self, key: &ResponseCacheKey, raw: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
pub struct FsResponseCache {
    dir: PathBuf,
}

impl FsResponseCache {
    /// Open (and create if needed) a cache directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn default_dir() -> PathBuf {
        if let Ok(path) = std::env::var("ASSESS_CACHE_DIR") {
            return PathBuf::from(path);
        }
        PathBuf::from("llm_responses")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ResponseCacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// All cache files whose name parses as `{doc_key}-{metric}.{role}`.
    ///
    /// Both the document key and the metric may contain `-`, so the split
    /// between them is ambiguous; the stem is reported whole.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let read_dir = std::fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| CacheError::io(&self.dir, e))?;
            let path = item.path();
            if !path.is_file() {
                continue;
            }
            let Some(role) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(CallRole::from_slug)
            else {
                continue;
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let meta = item.metadata().map_err(|e| CacheError::io(&path, e))?;
            let modified_at = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default();
            entries.push(CacheEntry {
                stem: stem.to_string(),
                role,
                path,
                bytes: meta.len(),
                modified_at,
            });
        }
        entries.sort_by(|a, b| a.stem.cmp(&b.stem).then(a.role.slug().cmp(b.role.slug())));
        Ok(entries)
    }

    /// Write one JSON line per cache entry, with a content hash for diffing
    /// cache directories across machines.
    pub fn export_jsonl(&self, out: impl AsRef<Path>) -> Result<usize, CacheError> {
        let out = out.as_ref();
        let entries = self.entries()?;
        let mut file = std::fs::File::create(out).map_err(|e| CacheError::io(out, e))?;
        for entry in &entries {
            let raw = std::fs::read(&entry.path).map_err(|e| CacheError::io(&entry.path, e))?;
            let row = CacheExportRow {
                file_name: entry
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                stem: entry.stem.clone(),
                role: entry.role,
                bytes: entry.bytes,
                blake3: blake3::hash(&raw).to_hex().to_string(),
                modified_at: entry.modified_at,
            };
            let line =
                serde_json::to_string(&row).map_err(|e| CacheError::Serde(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| CacheError::io(out, e))?;
        }
        Ok(entries.len())
    }
}

#[async_trait]
impl ResponseCache for FsResponseCache {
    async fn get(&self, key: &ResponseCacheKey) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    async fn put(&self, key: &ResponseCacheKey, raw: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| CacheError::io(&path, e))
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub stem: String,
    pub role: CallRole,
    pub path: PathBuf,
    pub bytes: u64,
    pub modified_at: i64,
}

#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub file_name: String,
    pub stem: String,
    pub role: CallRole,
    pub bytes: u64,
    pub blake3: String,
    pub modified_at: i64,
}
