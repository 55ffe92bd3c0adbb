use std::path::PathBuf;

/// Configuration for the local directory blob store.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Directory holding payloads and their metadata sidecars. Created on
    /// open when missing.
    pub directory: PathBuf,

    /// Largest payload the store accepts, in bytes. `None` means no limit
    /// beyond what the upload path enforces.
    pub max_object_bytes: Option<u64>,
}

impl LocalConfig {
    /// Store files under `directory` with no size limit of its own.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_object_bytes: None,
        }
    }

    /// Reject payloads larger than `limit` bytes.
    #[must_use]
    pub fn with_max_object_bytes(mut self, limit: u64) -> Self {
        self.max_object_bytes = Some(limit);
        self
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self::new("uploads")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = LocalConfig::default();
        assert_eq!(cfg.directory, PathBuf::from("uploads"));
        assert!(cfg.max_object_bytes.is_none());
    }

    #[test]
    fn builder_sets_limit() {
        let cfg = LocalConfig::new("/tmp/x").with_max_object_bytes(10);
        assert_eq!(cfg.max_object_bytes, Some(10));
    }
}
