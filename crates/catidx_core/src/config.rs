//! Part store configuration.

/// Configuration for opening a part store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the part file if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether `flush` also syncs the backend to durable storage.
    pub sync_on_flush: bool,

    /// Maximum encoded size of a single part.
    pub max_part_size: usize,

    /// Whether parts read back are checked against their address.
    pub verify_identity_on_read: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_flush: true,
            max_part_size: 64 * 1024 * 1024, // 64 MB
            verify_identity_on_read: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the part file if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether flushing syncs the backend.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Sets the maximum encoded part size.
    #[must_use]
    pub const fn max_part_size(mut self, size: usize) -> Self {
        self.max_part_size = size;
        self
    }

    /// Sets whether identities are verified when parts are read.
    #[must_use]
    pub const fn verify_identity_on_read(mut self, value: bool) -> Self {
        self.verify_identity_on_read = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_flush);
        assert!(config.verify_identity_on_read);
        assert_eq!(config.max_part_size, 64 * 1024 * 1024);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_flush(false)
            .max_part_size(1024)
            .verify_identity_on_read(false);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_flush);
        assert_eq!(config.max_part_size, 1024);
        assert!(!config.verify_identity_on_read);
    }
}
