use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use encoding_rs::SHIFT_JIS;

use crate::models::{DocumentChunk, DocumentMetadata};

/// Produces document chunks from one file. Used by ingestion-side
/// collaborators and by the keyword fallback searcher.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<DocumentChunk>>;
}

/// Extension → loader mapping. Extensions are matched lowercase with the
/// leading dot.
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn DocumentLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Registry preloaded with the plain-text and CSV loaders. Richer codecs
    /// (PDF, DOCX) are external collaborators registered by the embedder.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let text = Arc::new(TextLoader);
        registry.register(".txt", text.clone());
        registry.register(".md", text);
        registry.register(".csv", Arc::new(CsvLoader));
        registry
    }

    pub fn register(&mut self, extension: &str, loader: Arc<dyn DocumentLoader>) {
        self.loaders
            .insert(extension.to_ascii_lowercase(), loader);
    }

    pub fn get(&self, extension: &str) -> Option<&Arc<dyn DocumentLoader>> {
        self.loaders.get(&extension.to_ascii_lowercase())
    }

    /// Lowercased dot-prefixed extension of a path, if any.
    pub fn extension_of(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Read a file trying a fixed ordered list of encodings: strict UTF-8, UTF-8
/// with BOM, then Shift_JIS. The first that decodes without error wins.
pub fn read_text_with_encodings(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    // A leading BOM would otherwise survive the strict pass and pollute the
    // first CSV header.
    let without_bom = bytes
        .strip_prefix(&[0xEF, 0xBB, 0xBF])
        .unwrap_or(&bytes);
    if let Ok(text) = std::str::from_utf8(without_bom) {
        return Ok(text.to_string());
    }

    let (decoded, _, had_errors) = SHIFT_JIS.decode(&bytes);
    if !had_errors {
        return Ok(decoded.into_owned());
    }

    anyhow::bail!("no supported encoding decodes {}", path.display())
}

/// Whole-file plain-text loader; one chunk per file, no pagination.
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        let content = read_text_with_encodings(path)?;
        Ok(vec![DocumentChunk {
            content,
            metadata: DocumentMetadata {
                source: path.display().to_string(),
                page: None,
            },
        }])
    }
}

/// CSV loader producing one chunk per record, `header: value` pairs joined so
/// substring search sees both column names and cell values.
pub struct CsvLoader;

impl DocumentLoader for CsvLoader {
    fn load(&self, path: &Path) -> Result<Vec<DocumentChunk>> {
        let raw = read_text_with_encodings(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(raw.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .context("failed to parse csv headers")?
            .iter()
            .map(str::to_string)
            .collect();

        let source = path.display().to_string();
        let mut chunks = Vec::new();
        for record in reader.records() {
            let record = record.context("failed to parse csv record")?;
            let content = headers
                .iter()
                .zip(record.iter())
                .map(|(header, cell)| format!("{header}: {cell}"))
                .collect::<Vec<_>>()
                .join("\n");
            chunks.push(DocumentChunk {
                content,
                metadata: DocumentMetadata {
                    source: source.clone(),
                    page: None,
                },
            });
        }

        Ok(chunks)
    }
}
