//! SID File Loader (C1, §4.1).
//!
//! Parses one SID file into a local, per-file view. Parent relations are
//! deliberately not computed here (augmentation may place a node's parent in
//! a different file entirely) -- that is the Schema Table Builder's job (C3).

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::types::TypeInfo;

/// Which of the four SID namespaces (§4.1) an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Data,
    Identity,
    Feature,
    Module,
}

impl Namespace {
    fn parse(s: Option<&str>) -> Self {
        match s {
            Some("identity") => Namespace::Identity,
            Some("feature") => Namespace::Feature,
            Some("module") => Namespace::Module,
            _ => Namespace::Data,
        }
    }
}

/// One item from a SID file, with its stripped/prefixed (or synthetic
/// identity/feature) path already derived.
#[derive(Debug, Clone)]
pub struct SidItem {
    pub sid: i64,
    pub namespace: Namespace,
    /// stripped path (data), or `identity:<bare>`/`feature:<bare>` (synthetic)
    pub stripped_path: String,
    /// prefixed path (data), or `identity:<module:bare>`/`feature:<module:bare>`
    pub prefixed_path: String,
    pub item_type: Option<TypeInfo>,
}

/// The local view produced by loading exactly one SID file.
#[derive(Debug, Clone, Default)]
pub struct SidFile {
    pub module_name: String,
    pub module_revision: String,
    pub module_prefix: String,
    pub items: Vec<SidItem>,
}

#[derive(Debug, Deserialize)]
struct RawSidFile {
    #[serde(rename = "module-name")]
    module_name: String,
    #[serde(rename = "module-revision", default)]
    module_revision: String,
    #[serde(alias = "items")]
    item: Vec<RawSidItem>,
}

#[derive(Debug, Deserialize)]
struct RawSidItem {
    identifier: String,
    sid: i64,
    #[serde(rename = "type")]
    item_type: Option<Value>,
    #[serde(default)]
    namespace: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    status: Option<String>,
}

/// Drop any `module:` prefix from a single path segment.
fn strip_segment_prefix(segment: &str) -> &str {
    segment.rsplit_once(':').map(|(_, name)| name).unwrap_or(segment)
}

/// Derive the `(stripped, prefixed)` path pair for a `data` namespace item.
fn derive_data_paths(identifier: &str) -> (String, String) {
    let trimmed = identifier.trim_start_matches('/');
    let prefixed = trimmed.to_string();
    let stripped = trimmed.split('/').map(strip_segment_prefix).collect::<Vec<_>>().join("/");
    (stripped, prefixed)
}

/// Derive the `(stripped, prefixed)` synthetic path pair for an `identity`
/// or `feature` item: `<kind>:<bare>` and `<kind>:<module:bare>`.
fn derive_synthetic_paths(kind: &str, identifier: &str, module_name: &str) -> (String, String) {
    let bare = strip_segment_prefix(identifier);
    let qualified = if identifier.contains(':') {
        identifier.to_string()
    } else {
        format!("{}:{}", module_name, identifier)
    };
    (format!("{}:{}", kind, bare), format!("{}:{}", kind, qualified))
}

/// Build a [`TypeInfo`] from a SID file's `type` field, which is either a
/// bare string (`"string"`), an object mapping enum values to names, or an
/// array of member type names (union).
fn type_info_from_sid_value(value: &Value) -> TypeInfo {
    match value {
        Value::String(s) => TypeInfo::from_builtin_name(s).unwrap_or_else(|| match s.as_str() {
            "identityref" => TypeInfo::Identityref { base: String::new() },
            "leafref" => TypeInfo::Leafref { target: String::new() },
            "decimal64" => TypeInfo::Decimal64 { fraction_digits: 0 },
            other => TypeInfo::Unknown(other.to_string()),
        }),
        Value::Object(map) => TypeInfo::enumeration(map.iter().filter_map(|(k, v)| {
            v.as_str().map(|name| (name.to_string(), k.parse().unwrap_or(0)))
        })),
        Value::Array(arr) => TypeInfo::Union {
            members: arr
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| TypeInfo::from_builtin_name(s).unwrap_or_else(|| TypeInfo::Unknown(s.to_string())))
                .collect(),
        },
        _ => TypeInfo::Unknown("invalid".to_string()),
    }
}

impl SidFile {
    /// Parse a SID file from the given path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse a SID file from a JSON string. Accepts both the plain
    /// `{module-name, item/items, ...}` shape and the RFC 9254 module-wrapped
    /// `{"ietf-sid-file:sid-file": {...}}` container.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw_value: Value = serde_json::from_str(content)?;
        let target = raw_value
            .get("ietf-sid-file:sid-file")
            .cloned()
            .unwrap_or(raw_value);
        let raw: RawSidFile = serde_json::from_value(target)?;

        let module_prefix = format!("/{}:", raw.module_name);
        let mut items = Vec::with_capacity(raw.item.len());

        for item in raw.item {
            let namespace = Namespace::parse(item.namespace.as_deref());
            let (stripped_path, prefixed_path) = match namespace {
                Namespace::Data => derive_data_paths(&item.identifier),
                Namespace::Identity => derive_synthetic_paths("identity", &item.identifier, &raw.module_name),
                Namespace::Feature => derive_synthetic_paths("feature", &item.identifier, &raw.module_name),
                Namespace::Module => (item.identifier.clone(), item.identifier.clone()),
            };
            let item_type = item.item_type.as_ref().map(type_info_from_sid_value);

            items.push(SidItem {
                sid: item.sid,
                namespace,
                stripped_path,
                prefixed_path,
                item_type,
            });
        }

        Ok(SidFile {
            module_name: raw.module_name,
            module_revision: raw.module_revision,
            module_prefix,
            items,
        })
    }

    /// Iterate only the `data` namespace items (the ones that feed `leafToPaths`).
    pub fn data_items(&self) -> impl Iterator<Item = &SidItem> {
        self.items.iter().filter(|i| i.namespace == Namespace::Data)
    }
}

impl std::str::FromStr for SidFile {
    type Err = crate::error::CoreconfError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SID: &str = r#"{
        "assignment-range": [{"entry-point": 60000, "size": 10}],
        "module-name": "example-1",
        "module-revision": "unknown",
        "item": [
            {"namespace": "module", "identifier": "example-1", "sid": 60000},
            {"namespace": "data", "identifier": "/example-1:greeting", "sid": 60001},
            {"namespace": "data", "identifier": "/example-1:greeting/author", "sid": 60002, "type": "string"},
            {"namespace": "data", "identifier": "/example-1:greeting/message", "sid": 60003, "type": "string"},
            {"namespace": "identity", "identifier": "example-1:ethernetCsmacd", "sid": 60010}
        ]
    }"#;

    #[test]
    fn parses_module_header() {
        let sid_file: SidFile = SAMPLE_SID.parse().unwrap();
        assert_eq!(sid_file.module_name, "example-1");
        assert_eq!(sid_file.module_revision, "unknown");
        assert_eq!(sid_file.module_prefix, "/example-1:");
    }

    #[test]
    fn derives_data_paths() {
        let sid_file: SidFile = SAMPLE_SID.parse().unwrap();
        let greeting = sid_file
            .data_items()
            .find(|i| i.sid == 60001)
            .expect("greeting item");
        assert_eq!(greeting.stripped_path, "greeting");
        assert_eq!(greeting.prefixed_path, "example-1:greeting");

        let author = sid_file.data_items().find(|i| i.sid == 60002).unwrap();
        assert_eq!(author.stripped_path, "greeting/author");
        assert_eq!(author.prefixed_path, "example-1:greeting/author");
        assert_eq!(author.item_type, Some(TypeInfo::String));
    }

    #[test]
    fn derives_identity_synthetic_paths() {
        let sid_file: SidFile = SAMPLE_SID.parse().unwrap();
        let identity = sid_file
            .items
            .iter()
            .find(|i| i.namespace == Namespace::Identity)
            .unwrap();
        assert_eq!(identity.stripped_path, "identity:ethernetCsmacd");
        assert_eq!(identity.prefixed_path, "identity:example-1:ethernetCsmacd");
    }

    #[test]
    fn accepts_items_alias() {
        let content = r#"{
            "module-name": "m",
            "module-revision": "unknown",
            "items": [{"namespace": "data", "identifier": "/m:a", "sid": 100}]
        }"#;
        let sid_file: SidFile = content.parse().unwrap();
        assert_eq!(sid_file.items.len(), 1);
    }

    #[test]
    fn accepts_rfc9254_module_wrapper() {
        let content = format!(r#"{{"ietf-sid-file:sid-file": {}}}"#, SAMPLE_SID);
        let sid_file: SidFile = content.parse().unwrap();
        assert_eq!(sid_file.module_name, "example-1");
    }
}
