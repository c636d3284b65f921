//! Parser configuration types.

use std::path::{Path, PathBuf};

/// Default decode window for streaming bodies.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Smallest accepted decode window (one Base64 quantum).
const MIN_CHUNK_SIZE: usize = 4;

/// How attachment content is served.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Staging {
    /// Decode straight from the message source on every read.
    #[default]
    Stream,
    /// Decode once into a scoped temporary file on first read. The file is
    /// removed when the attachment record is dropped.
    TempFile {
        /// Directory for the temporary file; the system default when `None`.
        dir: Option<PathBuf>,
    },
}

/// Message parser configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Size of the raw windows read from the source while decoding.
    pub chunk_size: usize,
    /// Attachment staging policy.
    pub staging: Staging,
    /// Directory used to spool non-seekable readers before scanning.
    pub spool_dir: Option<PathBuf>,
}

impl ParserConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder::new()
    }

    /// Spool directory as a path, if one is configured.
    #[must_use]
    pub fn spool_dir(&self) -> Option<&Path> {
        self.spool_dir.as_deref()
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            staging: Staging::Stream,
            spool_dir: None,
        }
    }
}

/// Builder for parser configuration.
#[derive(Debug, Clone, Default)]
pub struct ParserConfigBuilder {
    chunk_size: Option<usize>,
    staging: Staging,
    spool_dir: Option<PathBuf>,
}

impl ParserConfigBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the decode window. Values below 4 are raised to 4.
    #[must_use]
    pub const fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Sets the attachment staging policy.
    #[must_use]
    pub fn staging(mut self, staging: Staging) -> Self {
        self.staging = staging;
        self
    }

    /// Stages attachments into temporary files in `dir`.
    #[must_use]
    pub fn stage_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging = Staging::TempFile {
            dir: Some(dir.into()),
        };
        self
    }

    /// Sets the spool directory for reader sources.
    #[must_use]
    pub fn spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ParserConfig {
        ParserConfig {
            chunk_size: self
                .chunk_size
                .unwrap_or(DEFAULT_CHUNK_SIZE)
                .max(MIN_CHUNK_SIZE),
            staging: self.staging,
            spool_dir: self.spool_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ParserConfig::default();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.staging, Staging::Stream);
        assert_eq!(config.spool_dir(), None);
        assert_eq!(ParserConfig::builder().build(), config);
    }

    #[test]
    fn test_builder() {
        let config = ParserConfig::builder()
            .chunk_size(1024)
            .stage_in("/var/tmp")
            .spool_dir("/srv/spool")
            .build();

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(
            config.staging,
            Staging::TempFile {
                dir: Some(PathBuf::from("/var/tmp"))
            }
        );
        assert_eq!(config.spool_dir(), Some(Path::new("/srv/spool")));
    }

    #[test]
    fn test_chunk_size_clamped() {
        let config = ParserConfig::builder().chunk_size(1).build();
        assert_eq!(config.chunk_size, 4);
    }
}
