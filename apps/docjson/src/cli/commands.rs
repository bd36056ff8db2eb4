//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::open_session;
use docjson_core::config::{BackendKind, DocjsonConfig};
use docjson_core::primitives::MAX_INPUT_LENGTH;
use docjson_core::{DecodeOptions, DepthPolicy, DocId, DocjsonError, EncodeOptions};
use std::path::{Path, PathBuf};

/// Indent width used by `--pretty`.
const PRETTY_INDENT: usize = 2;

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), DocjsonError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| DocjsonError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(DocjsonError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and ensure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, DocjsonError> {
    let canonical = path.canonicalize().map_err(|e| {
        DocjsonError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(DocjsonError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, DocjsonError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        DocjsonError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(DocjsonError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| DocjsonError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json(value: &serde_json::Value) -> Result<(), DocjsonError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DocjsonError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn backend_name(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Redb => "redb",
        BackendKind::Memory => "memory",
    }
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(config: &DocjsonConfig, force: bool) -> Result<(), DocjsonError> {
    let db_path = &config.storage.path;

    if config.storage.backend == BackendKind::Memory {
        println!("Memory backend is volatile; nothing to initialize");
        return Ok(());
    }

    if db_path.exists() {
        if !force {
            return Err(DocjsonError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| DocjsonError::IoError(format!("Remove existing database: {}", e)))?;
    }

    let _session = open_session(config)?;
    println!("Initialized new redb database at {:?}", db_path);
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show collections and document counts.
pub fn cmd_status(config: &DocjsonConfig, json_mode: bool) -> Result<(), DocjsonError> {
    let session = open_session(config)?;

    let mut names: Vec<String> = session.registry().names().map(str::to_string).collect();
    for stored in session.collections()? {
        if !names.contains(&stored) {
            names.push(stored);
        }
    }
    names.sort();

    let mut counts = Vec::with_capacity(names.len());
    for name in &names {
        counts.push((name.as_str(), session.count(name)?));
    }

    if json_mode {
        let collections: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(name, count)| ((*name).to_string(), serde_json::json!(count)))
            .collect();
        return print_json(&serde_json::json!({
            "database": config.storage.path.to_string_lossy(),
            "backend": backend_name(config.storage.backend),
            "collections": collections,
        }));
    }

    println!("docjson Status");
    println!("==============");
    println!("Database: {:?}", config.storage.path);
    println!("Backend:  {}", backend_name(config.storage.backend));
    println!();
    if counts.is_empty() {
        println!("No collections");
    }
    for (name, count) in counts {
        let marker = if session.schema(name).is_ok() { "" } else { " (no schema)" };
        println!("{:<20} {}{}", name, count, marker);
    }

    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Decode documents from a file and cascade-save them.
pub fn cmd_import(
    config: &DocjsonConfig,
    json_mode: bool,
    verbose: bool,
    collection: &str,
    file: &Path,
) -> Result<(), DocjsonError> {
    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INPUT_LENGTH as u64)?;

    let text = std::fs::read_to_string(&validated_path)
        .map_err(|e| DocjsonError::IoError(format!("Read file: {}", e)))?;

    let mut session = open_session(config)?;
    let mut documents = if text.trim_start().starts_with('[') {
        session.objects_from_json(collection, &text)?
    } else {
        vec![session.from_json(collection, &text, &DecodeOptions::default())?]
    };

    let mut ids = Vec::with_capacity(documents.len());
    for doc in &mut documents {
        let id = session.save(doc)?;
        if verbose {
            println!("Saved {}/{}", collection, id);
        }
        ids.push(id);
    }
    tracing::info!(collection, count = ids.len(), "import complete");

    if json_mode {
        return print_json(&serde_json::json!({
            "collection": collection,
            "imported": ids.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }));
    }
    println!("Imported {} document(s) into '{}'", ids.len(), collection);
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Write a collection in its flat bulk form.
pub fn cmd_export(
    config: &DocjsonConfig,
    collection: &str,
    output: Option<&Path>,
) -> Result<(), DocjsonError> {
    let session = open_session(config)?;
    let options = config.encode.to_options()?;
    let json = session.objects(collection)?.to_json(&options)?;

    match output {
        Some(path) => {
            let validated_output = validate_output_path(path)?;
            std::fs::write(&validated_output, &json)
                .map_err(|e| DocjsonError::IoError(format!("Write file: {}", e)))?;
            println!("Exported {} bytes to {:?}", json.len(), validated_output);
        }
        None => println!("{}", json),
    }
    Ok(())
}

// =============================================================================
// SHOW COMMAND
// =============================================================================

/// Per-call overrides of the configured encode defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShowOptions {
    pub follow: bool,
    pub max_depth: Option<i64>,
    pub epoch: bool,
    pub raw: bool,
    pub pretty: bool,
}

impl ShowOptions {
    /// Layer these flags over `base`.
    pub fn apply(self, mut base: EncodeOptions) -> EncodeOptions {
        if self.follow {
            base.follow_reference = true;
        }
        if let Some(limit) = self.max_depth {
            base.max_depth = DepthPolicy::from_limit(limit);
        }
        if self.epoch {
            base.epoch_mode = true;
        }
        if self.raw {
            base.raw = true;
        }
        if self.pretty && base.format.indent.is_none() {
            base.format.indent = Some(PRETTY_INDENT);
        }
        base
    }
}

/// Render one document.
pub fn cmd_show(
    config: &DocjsonConfig,
    collection: &str,
    id: &str,
    flags: ShowOptions,
) -> Result<(), DocjsonError> {
    let session = open_session(config)?;
    let schema = session.schema(collection)?;
    let id = DocId::parse(schema.id_kind(), id)?;

    let doc = session
        .load(collection, &id)?
        .ok_or_else(|| DocjsonError::ReferenceTargetNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;

    let options = flags.apply(config.encode.to_options()?);
    println!("{}", session.to_json(&doc, &options)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn show_flags_layer_over_defaults() {
        let base = EncodeOptions::default().pretty(4);
        let options = ShowOptions {
            follow: true,
            max_depth: Some(1),
            pretty: true,
            ..ShowOptions::default()
        }
        .apply(base);

        assert!(options.follow_reference);
        assert!(matches!(options.max_depth, DepthPolicy::Limit(1)));
        assert_eq!(options.format.indent, Some(4));
        assert!(!options.raw);
    }

    #[test]
    fn output_path_without_parent_uses_cwd() {
        let path = validate_output_path(Path::new("out.json")).unwrap();
        assert!(path.ends_with("out.json"));
    }
}
