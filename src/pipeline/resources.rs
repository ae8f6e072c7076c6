//! Resource loading service handed to calculators.
//!
//! The graph never reads resources itself; it passes one [`Resources`]
//! object through to every calculator context.

use crate::error::{Error, Result, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a resource should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceOptions {
    /// Keep the bytes as-is instead of requiring UTF-8 text.
    pub read_as_binary: bool,
}

/// Immutable resource contents, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    data: Arc<[u8]>,
}

impl Resource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.data)
            .map_err(|e| Error::Serialization(format!("resource is not UTF-8: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Resources: Send + Sync {
    /// Load `resource_id`.
    fn get(&self, resource_id: &str, options: &ResourceOptions) -> Result<Resource>;

    /// Load `resource_id` into `output`, replacing its contents.
    fn read_contents(
        &self,
        resource_id: &str,
        output: &mut Vec<u8>,
        options: &ResourceOptions,
    ) -> Result<()> {
        let resource = self.get(resource_id, options)?;
        output.clear();
        output.extend_from_slice(resource.as_bytes());
        Ok(())
    }
}

/// Reads resources from files below a root directory.
#[derive(Debug, Clone)]
pub struct FileResources {
    root: PathBuf,
}

impl FileResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, resource_id: &str) -> Result<PathBuf> {
        let relative = Path::new(resource_id);
        if relative.is_absolute() {
            return Ok(relative.to_path_buf());
        }
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::NotFound(format!(
                "resource \"{}\" escapes {}",
                resource_id,
                self.root.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl Default for FileResources {
    fn default() -> Self {
        Self::new(".")
    }
}

impl Resources for FileResources {
    fn get(&self, resource_id: &str, options: &ResourceOptions) -> Result<Resource> {
        let path = self.resolve(resource_id)?;
        let data = std::fs::read(&path)
            .map_err(Error::from)
            .with_context(|| format!("reading resource {}", path.display()))?;
        let resource = Resource::new(data);
        if !options.read_as_binary {
            resource.as_str()?;
        }
        tracing::debug!("Loaded resource {} ({} bytes)", resource_id, resource.len());
        Ok(resource)
    }
}
