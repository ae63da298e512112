//! Error types for the CORECONF codec

use thiserror::Error;

/// Main error type for schema-building and codec operations
#[derive(Debug, Error)]
pub enum CoreconfError {
    /// Malformed YANG module or SID file (C1, C2)
    #[error("schema parse error in {file}: {reason}")]
    SchemaParse { file: String, reason: String },

    /// Cache format version mismatch, or cache older than a source file (C3)
    #[error("cache version mismatch: found {found}, expected {expected}")]
    CacheVersion { found: i64, expected: i64 },

    /// Malformed instance-identifier text (C4)
    #[error("invalid instance-identifier '{path}': {reason}")]
    InstanceIdParse { path: String, reason: String },

    /// No candidate path resolves the given segments (C5)
    #[error("path could not be resolved to a SID: {path}")]
    PathUnresolved { path: String },

    /// Enumeration value/name not present in the bijection (C6)
    #[error("unknown enumeration value '{value}' for type at {type_path}")]
    EnumUnknown { value: String, type_path: String },

    /// Identity name/SID not present in the bijection (C6)
    #[error("unknown identity '{identity}'")]
    IdentityUnknown { identity: String },

    /// Parent-relative CBOR map key does not resolve against any known node (C8)
    #[error("cannot resolve delta key {key} under parent SID {parent}")]
    DeltaResolve { key: i64, parent: i64 },

    /// SID not found for the given identifier path
    #[error("SID not found for identifier: {0}")]
    SidNotFound(String),

    /// Identifier not found for the given SID value
    #[error("identifier not found for SID: {0}")]
    IdentifierNotFound(i64),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error (SID files, cache)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing/serialization error (encoder/decoder boundary)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CBOR decoding error
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// CBOR encoding error
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// Type conversion error not otherwise covered above
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// Invalid SID file format
    #[error("invalid SID file: {0}")]
    InvalidSidFile(String),
}

/// Result type alias for coreconf operations
pub type Result<T> = std::result::Result<T, CoreconfError>;
