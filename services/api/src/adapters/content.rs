//! services/api/src/adapters/content.rs
//!
//! Loads the authored content directory into an immutable in-memory snapshot
//! that implements the `ContentStore` port.
//!
//! Layout: `scenarios/`, `vocab_sets/`, `quizzes/` and `chapters/`, one JSON document
//! per `*.json` file. Any unreadable, unparsable or invalid file aborts the load.

use serde::de::DeserializeOwned;
use sprachwelt_core::domain::{Chapter, Quiz, Scenario, VocabSet};
use sprachwelt_core::memory::InMemoryContent;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Content directory {0} does not exist")]
    MissingRoot(PathBuf),
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid content in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Reads every content file under `root`.
pub fn load_content(root: &Path) -> Result<InMemoryContent, ContentError> {
    if !root.is_dir() {
        return Err(ContentError::MissingRoot(root.to_path_buf()));
    }
    let mut content = InMemoryContent::new();

    for (path, scenario) in read_documents::<Scenario>(&root.join("scenarios"))? {
        content = content
            .with_scenario(scenario)
            .map_err(|reason| ContentError::Invalid { path, reason })?;
    }
    for (path, set) in read_documents::<VocabSet>(&root.join("vocab_sets"))? {
        content = content
            .with_vocab_set(set)
            .map_err(|reason| ContentError::Invalid { path, reason })?;
    }
    for (path, quiz) in read_documents::<Quiz>(&root.join("quizzes"))? {
        content = content
            .with_quiz(quiz)
            .map_err(|reason| ContentError::Invalid { path, reason })?;
    }
    for (path, chapter) in read_documents::<Chapter>(&root.join("chapters"))? {
        content = content
            .with_chapter(chapter)
            .map_err(|reason| ContentError::Invalid { path, reason })?;
    }

    info!(
        "Loaded {} scenarios from {}",
        content.scenario_count(),
        root.display()
    );
    Ok(content)
}

/// Parses each `*.json` file in `dir`, in file-name order. A missing directory is empty.
fn read_documents<T: DeserializeOwned>(dir: &Path) -> Result<Vec<(PathBuf, T)>, ContentError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ContentError::Io { path, source }
    };

    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(dir))?;
    paths.retain(|p| p.extension().is_some_and(|ext| ext == "json"));
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let raw = std::fs::read_to_string(&path).map_err(io_err(&path))?;
            let document = serde_json::from_str::<T>(&raw).map_err(|source| ContentError::Parse {
                path: path.clone(),
                source,
            })?;
            Ok((path, document))
        })
        .collect()
}
