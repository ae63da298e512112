//! Delta-SID Encoder (C7, §4.7).
//!
//! Builds a nested CBOR map from a set of `(instance-id, value)` entries (or
//! a hierarchical YAML document), applying RFC 9254 Delta-SID compression:
//! a child's key is written relative to its parent's SID whenever the two
//! are truly parent/child in the schema, and as an absolute SID otherwise
//! (the augmentation case). Also produces the SID-array query form used by
//! the device's fetch verb (§9 Open Questions: single-query by default,
//! `EncodeOptions::fetch_multi` opts into the CBOR-sequence form).

use std::collections::BTreeMap;

use ciborium::value::Value as Cbor;
use serde_yaml::Value as Yaml;

use crate::error::{CoreconfError, Result};
use crate::path::{self, Segment};
use crate::resolve::resolve_path;
use crate::schema::SchemaTables;
use crate::sid_tree::SidTree;
use crate::types::{self, TypeInfo};

/// Map key ordering within a container (§4.7 "Tie-break and ordering").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// `nodeOrders`-based declared child order, falling back to ascending
    /// SID -- the behavior this crate's predecessor always produced.
    #[default]
    Velocity,
    /// RFC 8949 §4.2.1 canonical ordering: shortest encoded key first, then
    /// bytewise among equal-length keys.
    Rfc8949,
}

/// Knobs for `encode_yaml_to_cbor` / `extract_sid_queries` (§6, §2.1).
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub sort_mode: SortMode,
    /// When `true`, `extract_sid_queries` emits every supplied instance-id
    /// as a CBOR sequence instead of silently keeping only the first.
    pub fetch_multi: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            sort_mode: SortMode::Velocity,
            fetch_multi: false,
        }
    }
}

/// One entry of the SID-array query form (§4.7, §6 `extractSidQueries`).
#[derive(Debug, Clone, PartialEq)]
pub enum SidQuery {
    /// A single leaf or container, addressed by its absolute SID.
    Leaf(i64),
    /// A specific list entry, addressed by the list's SID plus its ordered
    /// key values (`[listSid, key1, key2, ...]`).
    ListEntry(i64, Vec<String>),
}

/// The encoder's working accumulator. Keyed internally by absolute SID
/// throughout construction; delta-vs-absolute is decided once, in the final
/// emission pass, since only then do we know every node's true parent SID.
#[derive(Debug, Clone)]
enum Acc {
    Leaf(Cbor),
    Map(BTreeMap<i64, Acc>),
    /// Each element is always an `Acc::Map` -- one map per list entry.
    List(Vec<Acc>),
}

fn get_or_insert_map(parent: &mut BTreeMap<i64, Acc>, sid: i64) -> Result<&mut BTreeMap<i64, Acc>> {
    match parent.entry(sid).or_insert_with(|| Acc::Map(BTreeMap::new())) {
        Acc::Map(m) => Ok(m),
        _ => Err(CoreconfError::TypeConversion(format!(
            "SID {} addressed both as a container and as a list or leaf",
            sid
        ))),
    }
}

fn get_or_insert_list(parent: &mut BTreeMap<i64, Acc>, sid: i64) -> Result<&mut Vec<Acc>> {
    match parent.entry(sid).or_insert_with(|| Acc::List(Vec::new())) {
        Acc::List(l) => Ok(l),
        _ => Err(CoreconfError::TypeConversion(format!(
            "SID {} addressed both as a list and as a container or leaf",
            sid
        ))),
    }
}

fn type_info_for<'a>(table: &'a crate::sid_tree::TypeTable, stripped: &str) -> TypeInfo {
    table
        .types
        .get(stripped)
        .cloned()
        .unwrap_or_else(|| TypeInfo::Unknown("unspecified".to_string()))
}

/// Split a hierarchical-YAML mapping key (`prefix:name`, no path, no
/// predicates) into a [`Segment`] for reuse with [`resolve_path`].
fn hierarchical_key_segment(key: &Yaml, path: &str) -> Result<Segment> {
    let text = key.as_str().ok_or_else(|| CoreconfError::InstanceIdParse {
        path: path.to_string(),
        reason: "mapping key is not a string".to_string(),
    })?;
    path::parse_single_segment(text)
}

/// Find the list entry matching `predicates`, creating one (with its key
/// leaves populated) if none matches. `list_path` is the list node's own
/// stripped path.
fn find_or_create_list_entry(
    list: &mut Vec<Acc>,
    predicates: &[(String, String)],
    list_path: &str,
    tree: &SidTree,
    table: &crate::sid_tree::TypeTable,
    identity_lookup: &dyn Fn(&str) -> Option<i64>,
) -> Result<usize> {
    let mut key_values = Vec::with_capacity(predicates.len());
    for (key, raw_value) in predicates {
        let leaf_path = format!("{}/{}", list_path, key);
        let leaf_sid = tree
            .path_to_sid
            .get(&leaf_path)
            .copied()
            .ok_or_else(|| CoreconfError::PathUnresolved { path: leaf_path.clone() })?;
        let type_info = type_info_for(table, &leaf_path);
        let cbor_value = types::encode_value(
            &Yaml::String(raw_value.clone()),
            &type_info,
            &leaf_path,
            identity_lookup,
        )?;
        key_values.push((leaf_sid, cbor_value));
    }

    if !key_values.is_empty() {
        for (i, entry) in list.iter().enumerate() {
            if let Acc::Map(m) = entry {
                let matches = key_values
                    .iter()
                    .all(|(sid, value)| matches!(m.get(sid), Some(Acc::Leaf(v)) if v == value));
                if matches {
                    return Ok(i);
                }
            }
        }
    }

    let mut entry = BTreeMap::new();
    for (sid, value) in key_values {
        entry.insert(sid, Acc::Leaf(value));
    }
    list.push(Acc::Map(entry));
    Ok(list.len() - 1)
}

/// Recursively insert a hierarchical-YAML value (nested mappings / sequences
/// of mappings / scalars) under `parent_container`, keyed by the SID that
/// `segments` (ending at the node currently being inserted) resolves to.
fn insert_hierarchical(
    parent_container: &mut BTreeMap<i64, Acc>,
    segments: &[Segment],
    value: &Yaml,
    tree: &SidTree,
    table: &crate::sid_tree::TypeTable,
    identity_lookup: &dyn Fn(&str) -> Option<i64>,
) -> Result<()> {
    let sid = resolve_path(segments, tree)?;
    let stripped = tree.sid_to_path.get(&sid).cloned().unwrap_or_default();

    match value {
        Yaml::Mapping(map) => {
            let child = get_or_insert_map(parent_container, sid)?;
            for (k, v) in map {
                let seg = hierarchical_key_segment(k, &stripped)?;
                let mut next = segments.to_vec();
                next.push(seg);
                insert_hierarchical(child, &next, v, tree, table, identity_lookup)?;
            }
            Ok(())
        }
        Yaml::Sequence(items) => {
            let list = get_or_insert_list(parent_container, sid)?;
            for item in items {
                let mut entry = BTreeMap::new();
                if let Yaml::Mapping(map) = item {
                    for (k, v) in map {
                        let seg = hierarchical_key_segment(k, &stripped)?;
                        let mut next = segments.to_vec();
                        next.push(seg);
                        insert_hierarchical(&mut entry, &next, v, tree, table, identity_lookup)?;
                    }
                }
                list.push(Acc::Map(entry));
            }
            Ok(())
        }
        scalar => {
            let type_info = type_info_for(table, &stripped);
            let cbor = types::encode_value(scalar, &type_info, &stripped, identity_lookup)?;
            parent_container.insert(sid, Acc::Leaf(cbor));
            Ok(())
        }
    }
}

/// Recursively insert one instance-identifier `(path, value)` entry,
/// resolving one segment per recursion step and handling list-key
/// predicates along the way (§4.7 steps 1-4).
fn insert_instance_entry(
    container: &mut BTreeMap<i64, Acc>,
    segments: &[Segment],
    idx: usize,
    value: &Yaml,
    tree: &SidTree,
    table: &crate::sid_tree::TypeTable,
    identity_lookup: &dyn Fn(&str) -> Option<i64>,
) -> Result<()> {
    let sid = resolve_path(&segments[..=idx], tree)?;
    let stripped = tree.sid_to_path.get(&sid).cloned().unwrap_or_default();
    let is_list = table.is_list(&stripped);
    let is_last = idx + 1 == segments.len();

    if !is_last {
        let next_container = if is_list {
            let list = get_or_insert_list(container, sid)?;
            let entry_idx = find_or_create_list_entry(
                list,
                &segments[idx].predicates,
                &stripped,
                tree,
                table,
                identity_lookup,
            )?;
            match &mut list[entry_idx] {
                Acc::Map(m) => m,
                _ => unreachable!("list entries are always Acc::Map"),
            }
        } else {
            get_or_insert_map(container, sid)?
        };
        return insert_instance_entry(next_container, segments, idx + 1, value, tree, table, identity_lookup);
    }

    // Last segment.
    if is_list {
        let list = get_or_insert_list(container, sid)?;
        if segments[idx].predicates.is_empty() {
            // Whole-list form: `value` is a sequence of per-entry mappings.
            // An empty sequence still creates (and keeps) the list key,
            // satisfying the "empty list encodes to an empty sequence, not
            // omitted" boundary behavior.
            if let Yaml::Sequence(items) = value {
                for item in items {
                    let mut entry = BTreeMap::new();
                    if let Yaml::Mapping(map) = item {
                        for (k, v) in map {
                            let seg = hierarchical_key_segment(k, &stripped)?;
                            let mut next_segments = segments[..=idx].to_vec();
                            next_segments.push(seg);
                            let next_idx = next_segments.len() - 1;
                            insert_instance_entry(
                                &mut entry,
                                &next_segments,
                                next_idx,
                                v,
                                tree,
                                table,
                                identity_lookup,
                            )?;
                        }
                    }
                    list.push(Acc::Map(entry));
                }
            }
        } else {
            let entry_idx = find_or_create_list_entry(
                list,
                &segments[idx].predicates,
                &stripped,
                tree,
                table,
                identity_lookup,
            )?;
            let entry = match &mut list[entry_idx] {
                Acc::Map(m) => m,
                _ => unreachable!("list entries are always Acc::Map"),
            };
            if let Yaml::Mapping(map) = value {
                for (k, v) in map {
                    let seg = hierarchical_key_segment(k, &stripped)?;
                    let mut next_segments = segments[..=idx].to_vec();
                    next_segments.push(seg);
                    let next_idx = next_segments.len() - 1;
                    insert_instance_entry(entry, &next_segments, next_idx, v, tree, table, identity_lookup)?;
                }
            }
        }
        Ok(())
    } else {
        match value {
            Yaml::Mapping(map) => {
                let child = get_or_insert_map(container, sid)?;
                for (k, v) in map {
                    let seg = hierarchical_key_segment(k, &stripped)?;
                    insert_hierarchical(child, std::slice::from_ref(&seg), v, tree, table, identity_lookup)?;
                }
                Ok(())
            }
            scalar => {
                let type_info = type_info_for(table, &stripped);
                let cbor = types::encode_value(scalar, &type_info, &stripped, identity_lookup)?;
                container.insert(sid, Acc::Leaf(cbor));
                Ok(())
            }
        }
    }
}

/// `true` when `child`'s recorded parent in the schema is exactly `parent`
/// -- the condition under which Delta-SID compression applies (§4.7 step 3).
fn is_true_child(child: i64, parent: i64, tree: &SidTree) -> bool {
    tree.sid_to_path
        .get(&child)
        .and_then(|path| tree.node_info.get(path))
        .and_then(|info| info.parent)
        == Some(parent)
}

fn child_key(sid: i64, parent_sid: Option<i64>, tree: &SidTree) -> i64 {
    match parent_sid {
        Some(parent) if is_true_child(sid, parent, tree) => sid - parent,
        Some(_) | None => sid,
    }
}

/// Rank an integer the way RFC 8949 §4.2.1 orders its canonical CBOR
/// encoding: by encoded byte length, then by major type, then by magnitude.
fn rfc8949_rank(n: i64) -> (u8, u8, u64) {
    let (major, magnitude) = if n >= 0 { (0u8, n as u64) } else { (1u8, (-1 - n) as u64) };
    let length_class = match magnitude {
        0..=23 => 0u8,
        24..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xffff_ffff => 3,
        _ => 4,
    };
    (length_class, major, magnitude)
}

fn node_name_for_sort(sid: i64, tree: &SidTree) -> Option<String> {
    tree.sid_to_path.get(&sid).and_then(|p| p.rsplit('/').next()).map(str::to_string)
}

fn sort_entries(entries: &mut [(i64, i64, Cbor)], tree: &SidTree, table: &crate::sid_tree::TypeTable, sort_mode: SortMode) {
    match sort_mode {
        SortMode::Velocity => entries.sort_by_key(|(sid, _, _)| {
            let order = node_name_for_sort(*sid, tree).and_then(|name| table.node_orders.get(&name).copied());
            (order.unwrap_or(usize::MAX), *sid)
        }),
        SortMode::Rfc8949 => entries.sort_by_key(|(_, key, _)| rfc8949_rank(*key)),
    }
}

fn emit_map(
    map: &BTreeMap<i64, Acc>,
    parent_sid: Option<i64>,
    tree: &SidTree,
    table: &crate::sid_tree::TypeTable,
    sort_mode: SortMode,
) -> Cbor {
    let mut entries: Vec<(i64, i64, Cbor)> = map
        .iter()
        .map(|(&sid, child)| {
            let key = child_key(sid, parent_sid, tree);
            let value = match child {
                Acc::Leaf(v) => v.clone(),
                Acc::Map(inner) => emit_map(inner, Some(sid), tree, table, sort_mode),
                Acc::List(items) => Cbor::Array(
                    items
                        .iter()
                        .map(|entry| match entry {
                            Acc::Map(m) => emit_map(m, Some(sid), tree, table, sort_mode),
                            _ => unreachable!("list entries are always Acc::Map"),
                        })
                        .collect(),
                ),
            };
            (sid, key, value)
        })
        .collect();
    sort_entries(&mut entries, tree, table, sort_mode);
    Cbor::Map(entries.into_iter().map(|(_, key, value)| (Cbor::Integer(key.into()), value)).collect())
}

/// Every `(path, value)` entry at the top level of an instance-identifier or
/// hierarchical YAML document.
enum TopLevel {
    /// `- /path: value` / `- /path` (instance-identifier form).
    InstancePaths(Vec<(String, Yaml)>),
    /// A single hierarchical document rooted at a mapping.
    Hierarchical(serde_yaml::Mapping),
}

fn classify_top_level(doc: &Yaml) -> Result<TopLevel> {
    match doc {
        Yaml::Sequence(items) => {
            let mut paths = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Yaml::String(s) => paths.push((s.clone(), Yaml::Null)),
                    Yaml::Mapping(map) if map.len() == 1 => {
                        let (k, v) = map.iter().next().unwrap();
                        let key = k.as_str().ok_or_else(|| CoreconfError::InstanceIdParse {
                            path: format!("{:?}", k),
                            reason: "instance-identifier key is not a string".to_string(),
                        })?;
                        paths.push((key.to_string(), v.clone()));
                    }
                    other => {
                        return Err(CoreconfError::InstanceIdParse {
                            path: format!("{:?}", other),
                            reason: "expected a bare path string or a single-entry mapping".to_string(),
                        });
                    }
                }
            }
            Ok(TopLevel::InstancePaths(paths))
        }
        Yaml::Mapping(map) => Ok(TopLevel::Hierarchical(map.clone())),
        other => Err(CoreconfError::InstanceIdParse {
            path: format!("{:?}", other),
            reason: "document must be a sequence of instance-identifiers or a hierarchical mapping".to_string(),
        }),
    }
}

/// Encode a YAML document (instance-identifier list or hierarchical form)
/// into Delta-SID CBOR bytes (§6 `encodeYamlToCbor`).
pub fn encode_yaml_to_cbor(yaml_text: &str, tables: &SchemaTables, options: &EncodeOptions) -> Result<Vec<u8>> {
    let doc: Yaml = serde_yaml::from_str(yaml_text)?;
    let identity_lookup = |name: &str| tables.sid_tree.identity_to_sid.get(name).copied();
    let mut root: BTreeMap<i64, Acc> = BTreeMap::new();

    match classify_top_level(&doc)? {
        TopLevel::InstancePaths(entries) => {
            for (path_text, value) in entries {
                let segments = path::parse_instance_id(&path_text)?;
                insert_instance_entry(&mut root, &segments, 0, &value, &tables.sid_tree, &tables.type_table, &identity_lookup)?;
            }
        }
        TopLevel::Hierarchical(map) => {
            for (k, v) in &map {
                let seg = hierarchical_key_segment(k, "")?;
                insert_hierarchical(&mut root, std::slice::from_ref(&seg), v, &tables.sid_tree, &tables.type_table, &identity_lookup)?;
            }
        }
    }

    let cbor_map = emit_map(&root, None, &tables.sid_tree, &tables.type_table, options.sort_mode);
    let mut bytes = Vec::new();
    ciborium::into_writer(&cbor_map, &mut bytes).map_err(|e| CoreconfError::CborEncode(e.to_string()))?;
    Ok(bytes)
}

/// Extract the SID-array query form for the device's fetch verb (§6
/// `extractSidQueries`). By default only the first instance-id is kept
/// (with a warning when more were supplied); `options.fetch_multi` keeps
/// every entry.
pub fn extract_sid_queries(yaml_text: &str, tables: &SchemaTables, options: &EncodeOptions) -> Result<Vec<SidQuery>> {
    let doc: Yaml = serde_yaml::from_str(yaml_text)?;
    let paths = match classify_top_level(&doc)? {
        TopLevel::InstancePaths(entries) => entries.into_iter().map(|(p, _)| p).collect::<Vec<_>>(),
        TopLevel::Hierarchical(_) => {
            return Err(CoreconfError::InstanceIdParse {
                path: yaml_text.to_string(),
                reason: "fetch queries require instance-identifier paths, not a hierarchical document".to_string(),
            });
        }
    };

    if paths.is_empty() {
        return Ok(Vec::new());
    }

    let selected: Vec<&String> = if options.fetch_multi {
        paths.iter().collect()
    } else {
        if paths.len() > 1 {
            tracing::warn!(count = paths.len(), "multiple instance-ids supplied to fetch, sending only the first");
        }
        vec![&paths[0]]
    };

    selected
        .into_iter()
        .map(|path_text| {
            let segments = path::parse_instance_id(path_text)?;
            let sid = resolve_path(&segments, &tables.sid_tree)?;
            let stripped = tables.sid_tree.sid_to_path.get(&sid).cloned().unwrap_or_default();
            if tables.type_table.is_list(&stripped) {
                if let Some(last) = segments.last() {
                    if !last.predicates.is_empty() {
                        let keys: Vec<String> = last.predicates.iter().map(|(_, v)| v.clone()).collect();
                        return Ok(SidQuery::ListEntry(sid, keys));
                    }
                }
            }
            Ok(SidQuery::Leaf(sid))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sid_tree::{NodeInfo, TypeTable};

    fn interfaces_tables() -> SchemaTables {
        let mut tree = SidTree::new();
        tree.insert_data("interfaces".into(), "ietf-interfaces:interfaces".into(), 2033);
        tree.insert_data(
            "interfaces/interface".into(),
            "ietf-interfaces:interfaces/interface".into(),
            2034,
        );
        tree.insert_data(
            "interfaces/interface/name".into(),
            "ietf-interfaces:interfaces/interface/name".into(),
            2035,
        );
        tree.insert_data(
            "interfaces/interface/enabled".into(),
            "ietf-interfaces:interfaces/interface/enabled".into(),
            2036,
        );
        tree.node_info.insert("interfaces".into(), NodeInfo::root(2033, "ietf-interfaces:interfaces".into()));
        tree.node_info.insert(
            "interfaces/interface".into(),
            NodeInfo::child(2034, 2033, 1, "ietf-interfaces:interfaces/interface".into()),
        );
        tree.node_info.insert(
            "interfaces/interface/name".into(),
            NodeInfo::child(2035, 2034, 2, "ietf-interfaces:interfaces/interface/name".into()),
        );
        tree.node_info.insert(
            "interfaces/interface/enabled".into(),
            NodeInfo::child(2036, 2034, 2, "ietf-interfaces:interfaces/interface/enabled".into()),
        );

        let mut table = TypeTable::new();
        table.list_nodes.insert("interfaces/interface".into());
        table.list_keys.insert("interfaces/interface".into(), vec!["name".into()]);
        table.types.insert("interfaces/interface/name".into(), TypeInfo::String);
        table.types.insert("interfaces/interface/enabled".into(), TypeInfo::Boolean);

        SchemaTables { sid_tree: tree, type_table: table }
    }

    #[test]
    fn encodes_list_entry_with_delta_sids() {
        let tables = interfaces_tables();
        let yaml = "- /ietf-interfaces:interfaces/interface[name='1']/enabled: true\n";
        let cbor_bytes = encode_yaml_to_cbor(yaml, &tables, &EncodeOptions::default()).unwrap();

        let value: Cbor = ciborium::from_reader(cbor_bytes.as_slice()).unwrap();
        let root = value.as_map().unwrap();
        assert_eq!(root.len(), 1);
        let (root_key, root_value) = &root[0];
        assert_eq!(root_key, &Cbor::Integer(2033.into()));

        let interface_map = root_value.as_map().unwrap();
        let (iface_key, iface_value) = &interface_map[0];
        assert_eq!(iface_key, &Cbor::Integer(1.into()));

        let entries = iface_value.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        let entry_map = entries[0].as_map().unwrap();
        let as_pairs: Vec<(i64, &Cbor)> = entry_map
            .iter()
            .map(|(k, v)| (k.as_integer().unwrap().try_into().unwrap(), v))
            .collect();
        assert!(as_pairs.contains(&(1, &Cbor::Text("1".to_string()))));
        assert!(as_pairs.contains(&(2, &Cbor::Bool(true))));
    }

    #[test]
    fn empty_list_encodes_as_empty_sequence() {
        let tables = interfaces_tables();
        let yaml = "- /ietf-interfaces:interfaces/interface: []\n";
        let cbor_bytes = encode_yaml_to_cbor(yaml, &tables, &EncodeOptions::default()).unwrap();
        let value: Cbor = ciborium::from_reader(cbor_bytes.as_slice()).unwrap();
        let root = value.as_map().unwrap();
        let (_, interfaces_value) = &root[0];
        let interface_map = interfaces_value.as_map().unwrap();
        let (_, list_value) = &interface_map[0];
        assert_eq!(list_value, &Cbor::Array(Vec::new()));
    }

    #[test]
    fn extract_sid_queries_keeps_only_first_by_default() {
        let tables = interfaces_tables();
        let yaml = "- /ietf-interfaces:interfaces/interface[name='1']/enabled\n- /ietf-interfaces:interfaces\n";
        let queries = extract_sid_queries(yaml, &tables, &EncodeOptions::default()).unwrap();
        assert_eq!(queries, vec![SidQuery::Leaf(2036)]);
    }

    #[test]
    fn extract_sid_queries_list_entry_form() {
        let tables = interfaces_tables();
        let yaml = "- /ietf-interfaces:interfaces/interface[name='1']\n";
        let queries = extract_sid_queries(yaml, &tables, &EncodeOptions::default()).unwrap();
        assert_eq!(queries, vec![SidQuery::ListEntry(2034, vec!["1".to_string()])]);
    }

    #[test]
    fn hierarchical_document_encodes_same_as_instance_id() {
        let tables = interfaces_tables();
        let instance_yaml = "- /ietf-interfaces:interfaces/interface[name='1']/enabled: true\n";
        let hierarchical_yaml = "ietf-interfaces:interfaces:\n  interface:\n    - name: \"1\"\n      enabled: true\n";

        let a = encode_yaml_to_cbor(instance_yaml, &tables, &EncodeOptions::default()).unwrap();
        let b = encode_yaml_to_cbor(hierarchical_yaml, &tables, &EncodeOptions::default()).unwrap();
        assert_eq!(a, b);
    }
}
