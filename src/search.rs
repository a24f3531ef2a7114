use std::path::Path;

use walkdir::WalkDir;

use crate::loaders::LoaderRegistry;
use crate::models::SourceRef;
use crate::normalize::make_snippet;

/// Brute-force case-insensitive substring search over the document tree,
/// loading files through the same registry normal ingestion uses. A blank
/// query yields zero hits; a file whose loader fails is skipped. The scan
/// stops early once `max_hits` is reached, both per file and overall.
pub fn keyword_search(
    root: &Path,
    query: &str,
    registry: &LoaderRegistry,
    supported_extensions: &[String],
    max_hits: usize,
    snippet_limit: usize,
) -> Vec<SourceRef> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() || max_hits == 0 {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        let path = entry.path();
        let Some(extension) = LoaderRegistry::extension_of(path) else {
            continue;
        };
        if !supported_extensions
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(&extension))
        {
            continue;
        }
        let Some(loader) = registry.get(&extension) else {
            continue;
        };
        let chunks = match loader.load(path) {
            Ok(chunks) => chunks,
            Err(err) => {
                tracing::warn!("keyword search skipped {}: {err:#}", path.display());
                continue;
            }
        };

        for chunk in chunks {
            if chunk.content.to_lowercase().contains(&needle) {
                hits.push(SourceRef {
                    origin: chunk.metadata.source,
                    page: chunk.metadata.page,
                    snippet: make_snippet(&chunk.content, snippet_limit),
                });
                if hits.len() >= max_hits {
                    return hits;
                }
            }
        }
    }

    hits
}
