//! Directory loading of extracted documents.
//!
//! `*.json` files hold a serialized [`Document`]; `*.txt` files become a
//! single-text document. Documents without an explicit id or filename get
//! them from the path relative to the walked root, so same-named files in
//! different subdirectories stay distinct. Files that cannot be read or
//! parsed, or that repeat an id already loaded, are reported in
//! [`LoadReport::skipped`] and never abort the walk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::Document;

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    /// Path relative to the walked root, `/`-separated. Unique within a load.
    pub key: String,
    pub document: Document,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<LoadedDocument>,
    pub skipped: Vec<(PathBuf, String)>,
}

pub fn load_directory(root: &Path) -> LoadReport {
    let mut report = LoadReport::default();
    let files = list_source_files(root);
    if files.is_empty() {
        info!(dir = %root.display(), "no .json or .txt documents found");
        return report;
    }
    let mut seen: HashMap<String, String> = HashMap::new();
    for path in files {
        let key = relative_key(root, &path);
        let loaded = load_file(&path, &key).and_then(|document| match seen.get(&document.id) {
            Some(first) => Err(format!("duplicate document id {} (already loaded from {first})", document.id)),
            None => Ok(document),
        });
        match loaded {
            Ok(document) => {
                seen.insert(document.id.clone(), key.clone());
                report.documents.push(LoadedDocument { path, key, document });
            }
            Err(reason) => {
                warn!(file = %path.display(), %reason, "skipping document");
                report.skipped.push((path, reason));
            }
        }
    }
    info!(loaded = report.documents.len(), skipped = report.skipped.len(), "loaded documents");
    report
}

/// `key` is the `/`-separated relative path; the default id is the key
/// without its extension.
fn load_file(path: &Path, key: &str) -> Result<Document, String> {
    let default_id = key.rsplit_once('.').map_or(key, |(stem, _)| stem).to_string();
    let bytes = fs::read(path).map_err(|e| format!("read failed: {e}"))?;

    let mut doc = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_slice::<Document>(&bytes).map_err(|e| format!("malformed JSON: {e}"))?,
        _ => Document {
            id: String::new(),
            filename: String::new(),
            file_type: "txt".to_string(),
            title: None,
            full_text: String::from_utf8_lossy(&bytes).to_string(),
            pages: Vec::new(),
            tables: Vec::new(),
            code: None,
            metadata: Default::default(),
        },
    };
    if doc.id.trim().is_empty() {
        doc.id = default_id;
    }
    if doc.filename.trim().is_empty() {
        doc.filename = key.to_string();
    }
    if doc.text().trim().is_empty() && doc.table_rows().is_empty() {
        return Err("no text or table content".to_string());
    }
    Ok(doc)
}

fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

fn list_source_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "txt")))
        .collect();
    files.sort();
    files
}
