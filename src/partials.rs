//! Partial loaders
//!
//! A loader turns a partial name into template source. Read failures are
//! never fatal at compile time: the inliner simply leaves the partial to
//! be resolved at render time, where a missing partial becomes a render
//! error.

use rustc_hash::FxHashMap;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("partial '{0}' not found")]
    NotFound(String),

    #[error("illegal partial name '{0}'")]
    IllegalName(String),

    #[error("error reading partial '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub trait PartialLoader: Send + Sync {
    fn read(&self, name: &str) -> Result<String, LoaderError>;
}

/// Reads `<root>/<name>.liquid`. Names are restricted to a safe
/// character set so a template cannot escape the partials directory.
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PartialLoader for FileSystemLoader {
    fn read(&self, name: &str) -> Result<String, LoaderError> {
        let legal = !name.is_empty()
            && !name.starts_with('/')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/'))
            && !name.split('/').any(|part| part.is_empty());
        if !legal {
            return Err(LoaderError::IllegalName(name.to_string()));
        }

        let path = self.root.join(format!("{name}.liquid"));
        match std::fs::read_to_string(&path) {
            Ok(source) => Ok(source),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(LoaderError::NotFound(name.to_string()))
            }
            Err(e) => Err(LoaderError::Io {
                name: name.to_string(),
                source: e,
            }),
        }
    }
}

/// In-memory loader for tests and embedders with templates of their own.
#[derive(Default)]
pub struct InMemoryLoader {
    templates: FxHashMap<String, String>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), source.into());
        self
    }
}

impl PartialLoader for InMemoryLoader {
    fn read(&self, name: &str) -> Result<String, LoaderError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound(name.to_string()))
    }
}
