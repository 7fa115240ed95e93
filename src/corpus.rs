//! Corpus loader for the legal knowledge base.
//!
//! `corpus.path` is either a single UTF-8 text file or a directory walked
//! recursively. Directory entries are filtered with the configured include
//! and exclude globs; VCS and build directories are always skipped.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::CorpusDocument;

/// Load every corpus document, sorted by source.
pub fn load_corpus(config: &CorpusConfig) -> Result<Vec<CorpusDocument>> {
    let root = &config.path;
    if !root.exists() {
        bail!("Corpus path does not exist: {}", root.display());
    }

    if root.is_file() {
        let source = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        return Ok(vec![read_document(root, &source)?]);
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut docs = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        docs.push(read_document(path, &rel_str)?);
    }

    docs.sort_by(|a, b| a.source.cmp(&b.source));

    tracing::debug!(root = %root.display(), documents = docs.len(), "corpus scanned");
    Ok(docs)
}

fn read_document(path: &Path, source: &str) -> Result<CorpusDocument> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let body = String::from_utf8(bytes)
        .with_context(|| format!("Corpus file is not valid UTF-8: {}", path.display()))?;

    let title = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string());

    Ok(CorpusDocument {
        source: source.to_string(),
        title,
        body,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus_config(path: &Path) -> CorpusConfig {
        CorpusConfig {
            path: path.to_path_buf(),
            ..CorpusConfig::default()
        }
    }

    #[test]
    fn test_single_file_corpus() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("legal_knowledge_base.txt");
        std::fs::write(&file, "Section 27. Agreement in restraint of trade, void.").unwrap();

        let docs = load_corpus(&corpus_config(&file)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "legal_knowledge_base.txt");
        assert_eq!(docs[0].title.as_deref(), Some("legal_knowledge_base"));
    }

    #[test]
    fn test_directory_corpus_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("acts")).unwrap();
        std::fs::write(tmp.path().join("acts/contract_act.txt"), "Section 27").unwrap();
        std::fs::write(tmp.path().join("acts/notes.md"), "# Notes").unwrap();
        std::fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/HEAD.txt"), "ref").unwrap();

        let docs = load_corpus(&corpus_config(tmp.path())).unwrap();
        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["acts/contract_act.txt", "acts/notes.md"]);
    }

    #[test]
    fn test_exclude_globs_apply() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("keep.txt"), "a").unwrap();
        std::fs::write(tmp.path().join("draft.txt"), "b").unwrap();

        let mut config = corpus_config(tmp.path());
        config.exclude_globs = vec!["draft.txt".to_string()];
        let docs = load_corpus(&config).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "keep.txt");
    }

    #[test]
    fn test_missing_path_is_error() {
        let config = corpus_config(Path::new("/nonexistent/vakil/corpus"));
        assert!(load_corpus(&config).is_err());
    }

    #[test]
    fn test_non_utf8_file_is_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad.txt"), [0xffu8, 0xfe, 0xfd]).unwrap();
        let err = load_corpus(&corpus_config(tmp.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.txt"));
    }
}
