//! The knowledge base: an in-memory document map mirrored to a directory.
//!
//! Documents are loaded from every file under the store directory whose
//! relative path matches the include globs. The file name is the document
//! name, so names are unique and a later file with the same name replaces
//! an earlier one. New documents are written to disk before the in-memory
//! map is touched.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::extract;
use crate::models::Document;

pub struct DocumentStore {
    dir: PathBuf,
    documents: Vec<Document>,
    index: HashMap<String, usize>,
}

impl DocumentStore {
    /// An empty store rooted at `dir`. Nothing is read or created.
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            documents: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Create `dir` if needed and load every matching file beneath it.
    ///
    /// Unreadable files are logged and skipped; only an invalid glob or a
    /// store directory that cannot be created fails the load.
    pub fn load(dir: impl Into<PathBuf>, include_globs: &[String]) -> Result<Self, StoreError> {
        let mut store = Self::empty(dir);
        std::fs::create_dir_all(&store.dir).map_err(|e| StoreError::io(&store.dir, e))?;

        let include_set = build_globset(include_globs)?;

        let walker = WalkDir::new(&store.dir).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable knowledge base entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&store.dir).unwrap_or(path);
            if !include_set.is_match(relative) {
                continue;
            }

            let name = match path.file_name() {
                Some(n) => n.to_string_lossy().to_string(),
                None => continue,
            };

            match std::fs::read_to_string(path) {
                Ok(content) => {
                    debug!(name = %name, path = %path.display(), "loaded document");
                    store.insert(Document::new(name, content, path.to_path_buf()));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load document");
                }
            }
        }

        info!(
            dir = %store.dir.display(),
            documents = store.len(),
            "knowledge base loaded"
        );
        Ok(store)
    }

    /// Write `content` to disk and record it in memory.
    ///
    /// A new name is written to `<dir>/<name>`. Replacing a known document
    /// overwrites the file it was loaded from, which may sit in a
    /// subdirectory, so the next load sees the new content. On a write
    /// failure the in-memory map is left as it was.
    pub fn add(&mut self, name: &str, content: &str) -> Result<&Document, StoreError> {
        validate_name(name)?;

        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let path = match self.get(name) {
            Some(existing) => existing.path.clone(),
            None => self.dir.join(name),
        };
        std::fs::write(&path, content).map_err(|e| StoreError::io(&path, e))?;

        info!(name, bytes = content.len(), "added document");
        let idx = self.insert(Document::new(name, content, path));
        Ok(&self.documents[idx])
    }

    /// Extract text from a PDF, DOCX, TXT, or MD file and add it under the
    /// source file name.
    pub fn import(&mut self, source: &Path) -> Result<&Document, StoreError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::InvalidName(source.display().to_string()))?;

        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let text = match ext.as_str() {
            "pdf" => {
                let bytes = std::fs::read(source).map_err(|e| StoreError::io(source, e))?;
                extract::extract_pdf(&bytes)?
            }
            "docx" => {
                let bytes = std::fs::read(source).map_err(|e| StoreError::io(source, e))?;
                extract::extract_docx(&bytes)?
            }
            "txt" | "md" => {
                std::fs::read_to_string(source).map_err(|e| StoreError::io(source, e))?
            }
            other => return Err(StoreError::UnsupportedFormat(format!(".{}", other))),
        };

        if text.trim().is_empty() {
            return Err(StoreError::EmptyDocument(source.to_path_buf()));
        }

        self.add(&name, &text)
    }

    /// Document names in insertion order.
    pub fn list(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, name: &str) -> Option<&Document> {
        self.index.get(name).map(|&i| &self.documents[i])
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Insert or replace by name; a replaced document keeps its position.
    fn insert(&mut self, doc: Document) -> usize {
        match self.index.get(&doc.name) {
            Some(&i) => {
                self.documents[i] = doc;
                i
            }
            None => {
                let i = self.documents.len();
                self.index.insert(doc.name.clone(), i);
                self.documents.push(doc);
                i
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, StoreError> {
    let invalid = |e: globset::Error| StoreError::UnsupportedFormat(e.to_string());
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(invalid)?);
    }
    builder.build().map_err(invalid)
}
