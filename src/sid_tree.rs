//! Global cross-file schema tables (the SID tree and type table, §3).
//!
//! These are built once per run by the Schema Table Builder (C3) from the
//! per-file outputs of the SID File Loader (C1) and YANG Type Extractor
//! (C2), and are immutable for the lifetime of the build.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::TypeInfo;

/// Per data-node record describing a node's place in the SID hierarchy.
///
/// `delta_sid = sid - parent` when a parent exists, else `sid` itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub sid: i64,
    pub parent: Option<i64>,
    pub delta_sid: i64,
    pub depth: u32,
    pub prefixed_path: String,
}

impl NodeInfo {
    pub fn root(sid: i64, prefixed_path: String) -> Self {
        Self {
            sid,
            parent: None,
            delta_sid: sid,
            depth: 0,
            prefixed_path,
        }
    }

    pub fn child(sid: i64, parent: i64, depth: u32, prefixed_path: String) -> Self {
        Self {
            sid,
            parent: Some(parent),
            delta_sid: sid - parent,
            depth,
            prefixed_path,
        }
    }
}

/// The merged, global SID tree (§3 "SID Tree").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidTree {
    /// stripped path -> SID, bijective on data nodes
    pub path_to_sid: HashMap<String, i64>,
    /// SID -> stripped path
    pub sid_to_path: HashMap<i64, String>,
    /// prefixed path -> SID
    pub prefixed_path_to_sid: HashMap<String, i64>,
    /// SID -> prefixed path
    pub sid_to_prefixed_path: HashMap<i64, String>,
    /// stripped path -> prefixed path
    pub path_to_prefixed: HashMap<String, String>,
    /// identity name (bare or module:name) -> SID
    pub identity_to_sid: HashMap<String, i64>,
    /// SID -> identity name
    pub sid_to_identity: HashMap<i64, String>,
    /// stripped path -> NodeInfo
    pub node_info: HashMap<String, NodeInfo>,
    /// last path segment -> every full stripped path ending in it
    pub leaf_to_paths: HashMap<String, Vec<String>>,
    /// guards idempotent alias augmentation (C3 step 6)
    pub aliases_applied: bool,
}

impl SidTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a data node under both its stripped and prefixed paths.
    pub fn insert_data(&mut self, stripped: String, prefixed: String, sid: i64) {
        if let Some(last) = stripped.rsplit('/').next() {
            let entry = self.leaf_to_paths.entry(last.to_string()).or_default();
            if !entry.contains(&stripped) {
                entry.push(stripped.clone());
            }
        }
        self.path_to_sid.insert(stripped.clone(), sid);
        self.sid_to_path.insert(sid, stripped.clone());
        self.prefixed_path_to_sid.insert(prefixed.clone(), sid);
        self.sid_to_prefixed_path.insert(sid, prefixed.clone());
        self.path_to_prefixed.insert(stripped, prefixed);
    }

    /// Record an identity or feature under both its bare and qualified names.
    pub fn insert_identity(&mut self, bare: String, qualified: String, sid: i64) {
        self.identity_to_sid.insert(bare, sid);
        self.identity_to_sid.insert(qualified.clone(), sid);
        self.sid_to_identity.insert(sid, qualified);
    }
}

/// Base identities an identity derives from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub bases: HashSet<String>,
}

/// The merged, global type table (§3 "Type Table").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTable {
    /// stripped path -> TypeInfo
    pub types: HashMap<String, TypeInfo>,
    /// identity name -> IdentityInfo
    pub identities: HashMap<String, IdentityInfo>,
    /// typedef name -> TypeInfo
    pub typedefs: HashMap<String, TypeInfo>,
    /// node names declared via `choice`
    pub choice_names: HashSet<String>,
    /// node names declared via `case`
    pub case_names: HashSet<String>,
    /// node name -> declared child ordering index, for deterministic emission
    pub node_orders: HashMap<String, usize>,
    /// typedef names rewritten by vendor-prefix merging (C3 step 4)
    pub merged_typedefs: HashSet<String>,
    /// stripped path -> true when the node is a YANG `list`
    pub list_nodes: HashSet<String>,
    /// list stripped path -> ordered key leaf names (stripped, relative to the list entry)
    pub list_keys: HashMap<String, Vec<String>>,
    /// stripped leaf path -> typedef name it resolved through during C2
    /// (§4.2 `original`); drives the vendor-typedef merge rewrite in C3 step 5.
    pub type_origin: HashMap<String, String>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_list(&self, path: &str) -> bool {
        self.list_nodes.contains(path)
    }
}
