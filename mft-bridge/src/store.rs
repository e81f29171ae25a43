//! Packaged model artifacts, mapped read-only.

use crate::error::StoreError;
use memmap2::{Mmap, MmapOptions};
use std::{
    fs::File,
    io,
    ops::Deref,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// An immutable mapped view of one compiled model graph.
pub struct ModelArtifact {
    path: String,
    mmap: Mmap,
}

impl ModelArtifact {
    /// Logical path the artifact was resolved from.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn byte_len(&self) -> usize {
        self.mmap.len()
    }
}

impl Deref for ModelArtifact {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

impl AsRef<[u8]> for ModelArtifact {
    fn as_ref(&self) -> &[u8] {
        &self.mmap
    }
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("path", &self.path)
            .field("byte_len", &self.byte_len())
            .finish()
    }
}

/// Resolves logical model paths below an asset root.
#[derive(Clone, Debug)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map the artifact at `path`. The whole file is addressable on success.
    pub fn load(&self, path: &str) -> Result<ModelArtifact, StoreError> {
        let logical = Path::new(path);
        if path.is_empty() || !logical.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StoreError::NotFound { path: path.to_string() });
        }
        let full = self.root.join(logical);
        let read_err = |source: io::Error| StoreError::Read {
            path: path.to_string(),
            source,
        };

        let file = File::open(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { path: path.to_string() },
            _ => read_err(e),
        })?;
        let meta = file.metadata().map_err(read_err)?;
        if !meta.is_file() {
            return Err(read_err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file")));
        }
        if meta.len() == 0 {
            return Err(read_err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty artifact")));
        }

        // SAFETY: packaged artifacts are read-only and never written through this mapping.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(read_err)?;
        debug!(path, bytes = mmap.len(), "mapped model artifact");
        Ok(ModelArtifact {
            path: path.to_string(),
            mmap,
        })
    }
}
