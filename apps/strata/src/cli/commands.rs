//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//! All file I/O lives here; the core stays pure.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strata_core::{
    snapshot_from_bytes, snapshot_to_bytes, Cache, CacheError, EntityKey, Snapshot, TypePolicies,
    MAGIC_BYTES,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for snapshots (500 MB).
///
/// This prevents memory exhaustion from malicious or accidental large
/// files; the limit is checked before the file is read.
const MAX_SNAPSHOT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Maximum file size for single response objects (10 MB).
const MAX_OBJECT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CacheError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CacheError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(CacheError::Io(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input file path: canonicalize (resolving symlinks and
/// ".."), require existence, require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CacheError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| CacheError::Io(format!("Invalid file path '{}': {}", path.display(), e)))?;

    if !canonical.is_file() {
        return Err(CacheError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate an output path: the parent directory must exist and be a
/// directory; the file itself may not exist yet.
fn validate_output_path(path: &Path) -> Result<PathBuf, CacheError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CacheError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(CacheError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| CacheError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SNAPSHOT I/O
// =============================================================================

/// Load a snapshot, detecting the format from the file contents: the
/// binary persistence magic wins, anything else must parse as the JSON
/// rendering.
pub fn load_snapshot(path: &Path) -> Result<Snapshot, CacheError> {
    let path = validate_file_path(path)?;
    validate_file_size(&path, MAX_SNAPSHOT_FILE_SIZE)?;

    let bytes = std::fs::read(&path)
        .map_err(|e| CacheError::Io(format!("Cannot read '{}': {}", path.display(), e)))?;

    if bytes.starts_with(MAGIC_BYTES) {
        return snapshot_from_bytes(&bytes);
    }

    let json: Value = serde_json::from_slice(&bytes)
        .map_err(|e| CacheError::Deserialization(format!("Invalid snapshot JSON: {}", e)))?;
    Snapshot::from_json(&json).ok_or_else(|| {
        CacheError::Deserialization("Snapshot JSON must be an object of entity records".to_string())
    })
}

/// Save a snapshot in the format implied by `binary`.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot, binary: bool) -> Result<(), CacheError> {
    let path = validate_output_path(path)?;
    let bytes = if binary {
        snapshot_to_bytes(snapshot)?
    } else {
        let rendered = serde_json::to_string_pretty(&snapshot.to_json())
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        rendered.into_bytes()
    };
    std::fs::write(&path, bytes)
        .map_err(|e| CacheError::Io(format!("Cannot write '{}': {}", path.display(), e)))
}

/// Whether a file currently holds the binary format (controls the
/// format used when writing it back).
fn is_binary_file(path: &Path) -> bool {
    std::fs::read(path)
        .map(|bytes| bytes.starts_with(MAGIC_BYTES))
        .unwrap_or(false)
}

// =============================================================================
// POLICY CONFIGURATION
// =============================================================================

/// TOML policy file: per-type key-field declarations.
///
/// ```toml
/// [types.Book]
/// key_fields = ["isbn"]
/// ```
#[derive(Debug, Default, Deserialize)]
struct PoliciesConfig {
    #[serde(default)]
    types: BTreeMap<String, TypeConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct TypeConfig {
    #[serde(default)]
    key_fields: Vec<String>,
}

/// Load type policies from a TOML file.
fn load_policies(path: &Path) -> Result<TypePolicies, CacheError> {
    let path = validate_file_path(path)?;
    validate_file_size(&path, MAX_OBJECT_FILE_SIZE)?;

    let text = std::fs::read_to_string(&path)
        .map_err(|e| CacheError::Io(format!("Cannot read '{}': {}", path.display(), e)))?;
    let config: PoliciesConfig = toml::from_str(&text)
        .map_err(|e| CacheError::Deserialization(format!("Invalid policy file: {}", e)))?;

    let mut policies = TypePolicies::new();
    for (type_name, type_config) in &config.types {
        let fields: Vec<&str> = type_config.key_fields.iter().map(String::as_str).collect();
        if !fields.is_empty() {
            policies.declare_key_fields(type_name.clone(), &fields);
        }
    }
    Ok(policies)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show snapshot statistics.
pub fn cmd_status(snapshot_path: &Path, json_mode: bool) -> Result<(), CacheError> {
    let snapshot = load_snapshot(snapshot_path)?;

    let entities = snapshot.entities.len();
    let fields: usize = snapshot.entities.values().map(|r| r.len()).sum();
    let references = snapshot.referenced_keys();
    let dangling: Vec<&EntityKey> = references
        .iter()
        .filter(|key| !snapshot.entities.contains_key(*key))
        .collect();

    if json_mode {
        let output = serde_json::json!({
            "snapshot": snapshot_path.to_string_lossy(),
            "entities": entities,
            "fields": fields,
            "references": references.len(),
            "dangling_references": dangling.len(),
            "extra_roots": snapshot.extra_roots.len(),
        });
        println!("{}", output);
    } else {
        println!("Snapshot: {}", snapshot_path.display());
        println!("  Entities:    {}", entities);
        println!("  Fields:      {}", fields);
        println!("  References:  {}", references.len());
        println!("  Dangling:    {}", dangling.len());
        println!("  Extra roots: {}", snapshot.extra_roots.len());
    }
    Ok(())
}

// =============================================================================
// ENTITIES / GET COMMANDS
// =============================================================================

/// List entity keys, optionally filtered by prefix.
pub fn cmd_entities(
    snapshot_path: &Path,
    json_mode: bool,
    prefix: Option<&str>,
    limit: usize,
) -> Result<(), CacheError> {
    let snapshot = load_snapshot(snapshot_path)?;

    let keys: Vec<&EntityKey> = snapshot
        .entities
        .keys()
        .filter(|key| prefix.is_none_or(|p| key.as_str().starts_with(p)))
        .take(limit)
        .collect();

    if json_mode {
        let listed: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        println!("{}", serde_json::json!({ "entities": listed }));
    } else {
        for key in &keys {
            println!("{}", key);
        }
        println!("({} listed)", keys.len());
    }
    Ok(())
}

/// Print one entity record as JSON.
pub fn cmd_get(snapshot_path: &Path, key: &str) -> Result<(), CacheError> {
    let snapshot = load_snapshot(snapshot_path)?;
    let rendered = snapshot.to_json();

    match rendered.get(key) {
        Some(record) => {
            println!(
                "{}",
                serde_json::to_string_pretty(record)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?
            );
            Ok(())
        }
        None => Err(CacheError::Io(format!("No entity '{}' in snapshot", key))),
    }
}

// =============================================================================
// GC / EVICT COMMANDS
// =============================================================================

/// Collect unreachable entities and write the snapshot back.
pub fn cmd_gc(
    snapshot_path: &Path,
    output: Option<&Path>,
    json_mode: bool,
) -> Result<(), CacheError> {
    let snapshot = load_snapshot(snapshot_path)?;
    let binary = is_binary_file(snapshot_path);

    let mut cache = Cache::new();
    cache.restore(snapshot);
    let removed = cache.gc();

    let target = output.unwrap_or(snapshot_path);
    save_snapshot(target, &cache.extract(), binary)?;

    if json_mode {
        println!(
            "{}",
            serde_json::json!({ "removed": removed, "remaining": cache.entity_count() })
        );
    } else {
        println!(
            "Removed {} unreachable entities ({} remaining)",
            removed,
            cache.entity_count()
        );
    }
    Ok(())
}

/// Remove an entity or one of its fields and write the snapshot back.
pub fn cmd_evict(
    snapshot_path: &Path,
    key: &str,
    field: Option<&str>,
    output: Option<&Path>,
    json_mode: bool,
) -> Result<(), CacheError> {
    let snapshot = load_snapshot(snapshot_path)?;
    let binary = is_binary_file(snapshot_path);

    let mut cache = Cache::new();
    cache.restore(snapshot);
    let removed = cache.evict(&EntityKey::new(key), field);

    let target = output.unwrap_or(snapshot_path);
    save_snapshot(target, &cache.extract(), binary)?;

    if json_mode {
        println!("{}", serde_json::json!({ "evicted": removed }));
    } else if removed {
        match field {
            Some(field) => println!("Evicted field '{}' of {}", field, key),
            None => println!("Evicted {}", key),
        }
    } else {
        println!("Nothing to evict for {}", key);
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Convert the snapshot to another format.
pub fn cmd_export(snapshot_path: &Path, output: &Path, format: &str) -> Result<(), CacheError> {
    let snapshot = load_snapshot(snapshot_path)?;

    let binary = match format {
        "binary" => true,
        "json" => false,
        other => {
            return Err(CacheError::Io(format!(
                "Unknown export format '{}' (expected 'json' or 'binary')",
                other
            )));
        }
    };

    save_snapshot(output, &snapshot, binary)?;
    println!(
        "Exported {} entities to {} ({})",
        snapshot.entities.len(),
        output.display(),
        format
    );
    Ok(())
}

/// Replace the working snapshot from a file in any supported format.
pub fn cmd_import(snapshot_path: &Path, input: &Path) -> Result<(), CacheError> {
    let snapshot = load_snapshot(input)?;
    let binary = is_binary_file(snapshot_path);

    save_snapshot(snapshot_path, &snapshot, binary)?;
    println!(
        "Imported {} entities from {}",
        snapshot.entities.len(),
        input.display()
    );
    Ok(())
}

// =============================================================================
// IDENTIFY COMMAND
// =============================================================================

/// Compute the entity key a response object normalizes to.
pub fn cmd_identify(
    file: &Path,
    policies_path: Option<&Path>,
    json_mode: bool,
) -> Result<(), CacheError> {
    let file = validate_file_path(file)?;
    validate_file_size(&file, MAX_OBJECT_FILE_SIZE)?;

    let bytes = std::fs::read(&file)
        .map_err(|e| CacheError::Io(format!("Cannot read '{}': {}", file.display(), e)))?;
    let object: Value = serde_json::from_slice(&bytes)
        .map_err(|e| CacheError::Deserialization(format!("Invalid object JSON: {}", e)))?;

    let policies = match policies_path {
        Some(path) => load_policies(path)?,
        None => TypePolicies::new(),
    };

    let cache = Cache::with_policies(policies);
    let key = cache.identify(&object)?;

    if json_mode {
        println!(
            "{}",
            serde_json::json!({ "key": key.as_ref().map(|k| k.as_str()) })
        );
    } else {
        match key {
            Some(key) => println!("{}", key),
            None => println!("(not identifiable)"),
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
