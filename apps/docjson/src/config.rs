//! # Configuration Loading
//!
//! Reads a `DocjsonConfig` from TOML and opens the session it describes.
//! Command-line flags override file values.

use docjson_core::config::{BackendKind, DocjsonConfig};
use docjson_core::{DocjsonError, MemoryStore, RedbStore, Session, StorageBackend};
use std::path::{Path, PathBuf};

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Load configuration from a TOML file, or defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<DocjsonConfig, DocjsonError> {
    let Some(path) = path else {
        return Ok(DocjsonConfig::default());
    };

    let metadata = std::fs::metadata(path).map_err(|e| {
        DocjsonError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(DocjsonError::SerializationError(format!(
            "Config size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| DocjsonError::IoError(format!("Read config: {}", e)))?;
    parse_config(&text)
}

/// Parse configuration text.
pub fn parse_config(text: &str) -> Result<DocjsonConfig, DocjsonError> {
    toml::from_str(text).map_err(|e| DocjsonError::SerializationError(format!("Invalid config: {}", e)))
}

/// Apply `--database` and `--backend` over the file values.
pub fn apply_overrides(
    mut config: DocjsonConfig,
    database: Option<PathBuf>,
    backend: Option<&str>,
) -> Result<DocjsonConfig, DocjsonError> {
    if let Some(path) = database {
        config.storage.path = path;
    }
    if let Some(name) = backend {
        config.storage.backend = BackendKind::parse(name)?;
    }
    Ok(config)
}

/// Open the session a configuration describes.
pub fn open_session(config: &DocjsonConfig) -> Result<Session, DocjsonError> {
    let registry = config.schema.build()?;
    let backend = match config.storage.backend {
        BackendKind::Redb => StorageBackend::Persistent(RedbStore::open(&config.storage.path)?),
        BackendKind::Memory => StorageBackend::InMemory(MemoryStore::new()),
    };
    Ok(Session::with_backend(registry, backend))
}
