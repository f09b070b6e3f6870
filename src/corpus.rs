//! Discovery of documents and metric codebooks on disk.

use std::path::{Path, PathBuf};

use crate::gateway::Attachment;

/// A research document to be assessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File stem; the document's key in the verdict store.
    pub id: String,
    pub path: PathBuf,
    /// Citation key used to name cache files. Defaults to `id`.
    pub cache_key: String,
}

impl Document {
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let path = path.into();
        let id = file_stem(&path)?;
        Ok(Self {
            cache_key: id.clone(),
            id,
            path,
        })
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    pub fn is_pdf(&self) -> bool {
        has_extension(&self.path, "pdf")
    }

    /// Load the full document as a request attachment.
    ///
    /// PDFs are forwarded as files; anything else is read as UTF-8 text.
    pub async fn load_attachment(&self) -> Result<Attachment, CorpusError> {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.pdf", self.id));
        if self.is_pdf() {
            let data = tokio::fs::read(&self.path)
                .await
                .map_err(|e| CorpusError::io(&self.path, e))?;
            Ok(Attachment::pdf(filename, data))
        } else {
            let text = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| CorpusError::io(&self.path, e))?;
            Ok(Attachment::Text(format!(
                "<document name=\"{filename}\">\n{}\n</document>",
                text.trim()
            )))
        }
    }
}

/// A metric codebook: definition, allowed values and criteria as free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    /// File stem, e.g. `f1-coverage`.
    pub name: String,
    pub text: String,
}

impl Metric {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let name = file_stem(path)?;
        let text = std::fs::read_to_string(path).map_err(|e| CorpusError::io(path, e))?;
        Ok(Self { name, text })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("path does not exist: {0}")]
    Missing(PathBuf),
    #[error("no .{extension} files found in {dir}")]
    Empty { dir: PathBuf, extension: &'static str },
    #[error("not a .{extension} file: {path}")]
    WrongExtension { path: PathBuf, extension: &'static str },
    #[error("cannot derive a name from {0}")]
    Unnamed(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CorpusError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CorpusError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Documents at `path`: the file itself, or every `.pdf` in the directory.
pub fn discover_documents(path: &Path) -> Result<Vec<Document>, CorpusError> {
    list_files(path, "pdf")?
        .into_iter()
        .map(Document::from_path)
        .collect()
}

/// Metrics at `path`: the file itself, or every `.txt` in the directory.
pub fn discover_metrics(path: &Path) -> Result<Vec<Metric>, CorpusError> {
    list_files(path, "txt")?
        .iter()
        .map(|p| Metric::load(p))
        .collect()
}

/// Non-recursive, in directory-listing order (deliberately unsorted).
fn list_files(path: &Path, extension: &'static str) -> Result<Vec<PathBuf>, CorpusError> {
    if !path.exists() {
        return Err(CorpusError::Missing(path.to_path_buf()));
    }
    if path.is_file() {
        if !has_extension(path, extension) {
            return Err(CorpusError::WrongExtension {
                path: path.to_path_buf(),
                extension,
            });
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| CorpusError::io(path, e))? {
        let entry = entry.map_err(|e| CorpusError::io(path, e))?;
        let p = entry.path();
        if p.is_file() && has_extension(&p, extension) {
            files.push(p);
        }
    }
    if files.is_empty() {
        return Err(CorpusError::Empty {
            dir: path.to_path_buf(),
            extension,
        });
    }
    Ok(files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn file_stem(path: &Path) -> Result<String, CorpusError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CorpusError::Unnamed(path.to_path_buf()))
}
