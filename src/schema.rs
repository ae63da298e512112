//! Schema Table Builder (C3, §4.3).
//!
//! Merges every `.sid` file (C1) and `.yang` module (C2) under a cache
//! directory into the global [`SidTree`] and [`TypeTable`], computing
//! cross-file `NodeInfo`, merging vendor-prefixed typedefs, and augmenting
//! choice/case-omitted path aliases. Results are cached to disk between runs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::Result;
use crate::sid_file::SidFile;
use crate::sid_tree::{NodeInfo, SidTree, TypeTable};
use crate::types::TypeInfo;
use crate::yang::{self, ModuleTypes};

/// Current schema cache format version. The loader refuses (falls back to a
/// rebuild, per §7) any cache file whose `version` field does not match.
pub const SCHEMA_CACHE_VERSION: i64 = 1;

/// Knobs exposed by `buildSchemaTables` (§6) plus the vendor-prefix list
/// left as an Open Question in §9, resolved there as a configurable field.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub no_cache: bool,
    pub vendor_prefixes: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            no_cache: false,
            vendor_prefixes: vec!["velocitysp-".to_string(), "mchp-".to_string()],
        }
    }
}

/// The merged, immutable schema: a [`SidTree`] paired with a [`TypeTable`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaTables {
    pub sid_tree: SidTree,
    pub type_table: TypeTable,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: i64,
    sid_tree: SidTree,
    type_table: TypeTable,
}

fn cache_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(".coreconf-schema-cache.json")
}

/// Walk `cache_dir` once, separating `.sid` and `.yang` files.
fn discover_files(cache_dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut sid_paths = Vec::new();
    let mut yang_paths = Vec::new();
    for entry in WalkDir::new(cache_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.path().extension().and_then(|e| e.to_str()) {
            Some("sid") => sid_paths.push(entry.path().to_path_buf()),
            Some("yang") => yang_paths.push(entry.path().to_path_buf()),
            _ => {}
        }
    }
    (sid_paths, yang_paths)
}

fn newest_mtime(paths: &[PathBuf]) -> Option<SystemTime> {
    paths.iter().filter_map(|p| fs::metadata(p).ok()?.modified().ok()).max()
}

/// Load a cached [`SchemaTables`], but only if it is readable, version-matched,
/// and not older than any source file (§7: stale/unreadable cache falls back
/// silently to a rebuild).
fn load_cache(cache_dir: &Path, source_files: &[PathBuf]) -> Option<SchemaTables> {
    let path = cache_path(cache_dir);
    let cache_mtime = fs::metadata(&path).ok()?.modified().ok()?;
    if let Some(newest_source) = newest_mtime(source_files) {
        if newest_source > cache_mtime {
            return None;
        }
    }
    let content = fs::read_to_string(&path).ok()?;
    let cache: CacheFile = serde_json::from_str(&content).ok()?;
    if cache.version != SCHEMA_CACHE_VERSION {
        return None;
    }
    Some(SchemaTables {
        sid_tree: cache.sid_tree,
        type_table: cache.type_table,
    })
}

/// Persist the merged tables atomically (write to a temp file, then rename).
/// Failure is non-fatal: a warning is logged and the build proceeds.
fn save_cache(cache_dir: &Path, tables: &SchemaTables) {
    let cache = CacheFile {
        version: SCHEMA_CACHE_VERSION,
        sid_tree: tables.sid_tree.clone(),
        type_table: tables.type_table.clone(),
    };
    let result = (|| -> Result<()> {
        let content = serde_json::to_string(&cache)?;
        let mut tmp = tempfile::NamedTempFile::new_in(cache_dir)?;
        use std::io::Write;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(cache_path(cache_dir)).map_err(|e| crate::error::CoreconfError::Io(e.error))?;
        Ok(())
    })();
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to save schema cache, continuing without it");
    }
}

fn load_sid_files(paths: &[PathBuf]) -> Result<Vec<SidFile>> {
    paths
        .par_iter()
        .map(|p| {
            tracing::trace!(file = %p.display(), "parsing SID file");
            SidFile::from_file(p)
        })
        .collect()
}

fn load_yang_modules(paths: &[PathBuf]) -> Result<Vec<ModuleTypes>> {
    paths
        .par_iter()
        .map(|p| {
            tracing::trace!(file = %p.display(), "parsing YANG module");
            let text = fs::read_to_string(p)?;
            yang::parse_and_extract(&text, &p.display().to_string())
        })
        .collect()
}

/// Merge every loaded SID file's items into the global tree, logging a
/// warning (not an error) on a stripped-path collision between files.
fn merge_sid_files(tree: &mut SidTree, files: Vec<SidFile>) {
    for file in files {
        for item in file.items {
            use crate::sid_file::Namespace;
            match item.namespace {
                Namespace::Data => {
                    if let Some(&existing) = tree.path_to_sid.get(&item.stripped_path) {
                        if existing != item.sid {
                            tracing::warn!(
                                path = %item.stripped_path,
                                existing,
                                incoming = item.sid,
                                "SID collision on merge, keeping first-seen"
                            );
                            continue;
                        }
                    }
                    tree.insert_data(item.stripped_path, item.prefixed_path, item.sid);
                }
                Namespace::Identity => {
                    let bare = item.stripped_path.trim_start_matches("identity:").to_string();
                    let qualified = item.prefixed_path.trim_start_matches("identity:").to_string();
                    tree.insert_identity(bare, qualified, item.sid);
                }
                Namespace::Feature | Namespace::Module => {}
            }
        }
    }
}

/// Merge every loaded module's partial type table, logging a warning on a
/// leaf-type collision between modules.
fn merge_module_types(table: &mut TypeTable, modules: Vec<ModuleTypes>) {
    for module in modules {
        for (path, ty) in module.types {
            if let Some(existing) = table.types.get(&path) {
                if *existing != ty {
                    tracing::warn!(path = %path, "leaf type collision on merge, keeping first-seen");
                    continue;
                }
            }
            table.types.insert(path, ty);
        }
        for (name, info) in module.identities {
            table.identities.entry(name).or_default().bases.extend(info.bases);
        }
        for (name, ty) in module.typedefs {
            table.typedefs.entry(name).or_insert(ty);
        }
        table.choice_names.extend(module.choice_names);
        table.case_names.extend(module.case_names);
        for (name, order) in module.node_orders {
            table.node_orders.entry(name).or_insert(order);
        }
        table.list_nodes.extend(module.list_nodes);
        for (path, keys) in module.list_keys {
            table.list_keys.entry(path).or_insert(keys);
        }
        for (path, typedef_name) in module.type_origin {
            table.type_origin.entry(path).or_insert(typedef_name);
        }
    }
}

/// Compute `NodeInfo` for every data path by walking up to the longest
/// registered proper-prefix ancestor (dropping trailing segments until a
/// match is found), so augmentation across module boundaries still resolves
/// the node's true parent.
fn compute_node_info(tree: &mut SidTree) {
    let paths: Vec<String> = tree.path_to_sid.keys().cloned().collect();
    for path in paths {
        let sid = tree.path_to_sid[&path];
        let prefixed = tree.path_to_prefixed.get(&path).cloned().unwrap_or_else(|| path.clone());
        let depth = path.matches('/').count() as u32;

        let mut ancestor = path.rsplit_once('/').map(|(parent, _)| parent.to_string());
        let mut found = None;
        while let Some(candidate) = ancestor {
            if let Some(&parent_sid) = tree.path_to_sid.get(&candidate) {
                found = Some(parent_sid);
                break;
            }
            ancestor = candidate.rsplit_once('/').map(|(parent, _)| parent.to_string());
        }

        let info = match found {
            Some(parent_sid) => NodeInfo::child(sid, parent_sid, depth, prefixed),
            None => NodeInfo::root(sid, prefixed),
        };
        tree.node_info.insert(path, info);
    }
}

/// Vendor-prefix typedef merging (§4.3 step 4-5, glossary "Typedef"). A
/// vendor-prefixed typedef (e.g. `velocitysp-link-status`) is treated as a
/// refinement of the base typedef with the prefix stripped (`link-status`):
/// its enum set is folded into the base's. Step 5 repoints every leaf whose
/// recorded `original` (§4.2, `type_origin`) names either the vendor typedef
/// or the base typedef at the merged enumeration.
fn merge_vendor_typedefs(table: &mut TypeTable, vendor_prefixes: &[String]) {
    let names: Vec<String> = table.typedefs.keys().cloned().collect();
    for name in names {
        let Some(prefix) = vendor_prefixes.iter().find(|p| name.starts_with(p.as_str())) else {
            continue;
        };
        let base_name = name[prefix.len()..].to_string();
        if base_name.is_empty() || !table.typedefs.contains_key(&base_name) {
            continue;
        }

        let vendor_ty = table.typedefs.get(&name).cloned();
        let base_ty = table.typedefs.get(&base_name).cloned();
        let (TypeInfo::Enumeration { name_to_value: vendor_pairs, .. }, TypeInfo::Enumeration { name_to_value: base_pairs, .. }) =
            (vendor_ty.clone(), base_ty.clone())
        else {
            continue;
        };

        let mut merged_pairs = base_pairs.clone();
        merged_pairs.extend(vendor_pairs);
        let merged = TypeInfo::enumeration(merged_pairs);

        let affected: Vec<String> = table
            .type_origin
            .iter()
            .filter(|(_, origin)| origin.as_str() == name || origin.as_str() == base_name)
            .map(|(path, _)| path.clone())
            .collect();
        for path in affected {
            if let Some(path_type) = table.types.get_mut(&path) {
                *path_type = merged.clone();
            }
        }

        table.typedefs.insert(base_name, merged.clone());
        table.typedefs.insert(name.clone(), merged);
        table.merged_typedefs.insert(name);
    }
}

/// Collapse consecutive equal segments, left to right.
fn dedup_adjacent<'a>(segs: Vec<&'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::with_capacity(segs.len());
    for seg in segs {
        if out.last() != Some(&seg) {
            out.push(seg);
        }
    }
    out
}

/// Choice/case alias augmentation (§4.3 step 6, glossary "Choice/case"):
/// clients may omit `choice`/`case` wrapper segments in instance-identifiers,
/// so register an additional path alias (same SID) with those segments
/// stripped out, then collapse any consecutive duplicate segments the
/// stripping exposed (a node wrapped in a choice/case named after its own
/// parent would otherwise produce a doubled segment). Idempotent via
/// `aliases_applied`.
fn apply_choice_case_aliases(tree: &mut SidTree, table: &TypeTable) {
    if tree.aliases_applied {
        return;
    }
    let skip: HashSet<&str> = table.choice_names.iter().chain(table.case_names.iter()).map(String::as_str).collect();
    if skip.is_empty() {
        tree.aliases_applied = true;
        return;
    }

    let entries: Vec<(String, String, i64)> = tree
        .path_to_sid
        .iter()
        .map(|(path, &sid)| {
            let prefixed = tree.path_to_prefixed.get(path).cloned().unwrap_or_else(|| path.clone());
            (path.clone(), prefixed, sid)
        })
        .collect();

    for (path, prefixed, sid) in entries {
        let filtered_stripped: Vec<&str> = path.split('/').filter(|seg| !skip.contains(seg)).collect();
        let alias_stripped = dedup_adjacent(filtered_stripped).join("/");
        if alias_stripped != path && !tree.path_to_sid.contains_key(&alias_stripped) {
            tree.path_to_sid.insert(alias_stripped.clone(), sid);
        }

        let prefixed_segs: Vec<&str> = prefixed.split('/').collect();
        let stripped_segs: Vec<&str> = path.split('/').collect();
        let filtered_prefixed: Vec<&str> = prefixed_segs
            .into_iter()
            .zip(stripped_segs)
            .filter(|(_, bare)| !skip.contains(bare))
            .map(|(full, _)| full)
            .collect();
        let alias_prefixed = dedup_adjacent(filtered_prefixed).join("/");
        if alias_prefixed != prefixed && !tree.prefixed_path_to_sid.contains_key(&alias_prefixed) {
            tree.prefixed_path_to_sid.insert(alias_prefixed, sid);
        }
    }

    tree.aliases_applied = true;
}

/// Load and merge every `.sid`/`.yang` file under `cache_dir` into a fresh
/// [`SchemaTables`], honoring `options.no_cache` and persisting the result.
pub fn build_schema_tables(cache_dir: impl AsRef<Path>, options: &BuildOptions) -> Result<SchemaTables> {
    let cache_dir = cache_dir.as_ref();
    let (sid_paths, yang_paths) = discover_files(cache_dir);
    let all_sources: Vec<PathBuf> = sid_paths.iter().cloned().chain(yang_paths.iter().cloned()).collect();

    if !options.no_cache {
        if let Some(tables) = load_cache(cache_dir, &all_sources) {
            tracing::debug!(cache_dir = %cache_dir.display(), "schema cache hit");
            return Ok(tables);
        }
    }

    let span =
        tracing::info_span!("build_schema_tables", sid_files = sid_paths.len(), yang_files = yang_paths.len());
    let _enter = span.enter();

    let sid_files = load_sid_files(&sid_paths)?;
    let modules = load_yang_modules(&yang_paths)?;

    let mut sid_tree = SidTree::new();
    merge_sid_files(&mut sid_tree, sid_files);

    let mut type_table = TypeTable::new();
    merge_module_types(&mut type_table, modules);

    compute_node_info(&mut sid_tree);
    merge_vendor_typedefs(&mut type_table, &options.vendor_prefixes);
    apply_choice_case_aliases(&mut sid_tree, &type_table);

    let tables = SchemaTables { sid_tree, type_table };

    if !options.no_cache {
        save_cache(cache_dir, &tables);
    }

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SID_A: &str = r#"{
        "module-name": "example-1",
        "module-revision": "unknown",
        "item": [
            {"namespace": "module", "identifier": "example-1", "sid": 60000},
            {"namespace": "data", "identifier": "/example-1:greeting", "sid": 60001},
            {"namespace": "data", "identifier": "/example-1:greeting/author", "sid": 60002, "type": "string"}
        ]
    }"#;

    const YANG_A: &str = r#"
        module example-1 {
            namespace "urn:example:example-1";
            prefix ex1;
            container greeting {
                leaf author { type string; }
            }
        }
    "#;

    fn write_fixture(dir: &Path) {
        fs::write(dir.join("example-1.sid"), SID_A).unwrap();
        fs::write(dir.join("example-1.yang"), YANG_A).unwrap();
    }

    #[test]
    fn builds_tables_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let tables = build_schema_tables(dir.path(), &BuildOptions { no_cache: true, ..Default::default() }).unwrap();
        assert_eq!(tables.sid_tree.path_to_sid.get("greeting/author"), Some(&60002));
        assert_eq!(tables.type_table.types.get("greeting/author"), Some(&TypeInfo::String));
    }

    #[test]
    fn computes_node_info_parent_relation() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let tables = build_schema_tables(dir.path(), &BuildOptions { no_cache: true, ..Default::default() }).unwrap();
        let info = tables.sid_tree.node_info.get("greeting/author").unwrap();
        assert_eq!(info.parent, Some(60001));
        assert_eq!(info.delta_sid, 1);
    }

    #[test]
    fn is_idempotent_across_two_builds() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let opts = BuildOptions { no_cache: true, ..Default::default() };

        let first = build_schema_tables(dir.path(), &opts).unwrap();
        let second = build_schema_tables(dir.path(), &opts).unwrap();
        assert_eq!(first.sid_tree.path_to_sid, second.sid_tree.path_to_sid);
        assert_eq!(first.type_table.types, second.type_table.types);
    }

    #[test]
    fn cache_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());

        let built = build_schema_tables(dir.path(), &BuildOptions::default()).unwrap();
        let cached = build_schema_tables(dir.path(), &BuildOptions::default()).unwrap();
        assert_eq!(built.sid_tree.path_to_sid, cached.sid_tree.path_to_sid);
    }

    const SID_CHOICE: &str = r#"{
        "module-name": "example-choice",
        "module-revision": "unknown",
        "item": [
            {"namespace": "module", "identifier": "example-choice", "sid": 61000},
            {"namespace": "data", "identifier": "/example-choice:outer", "sid": 61001},
            {"namespace": "data", "identifier": "/example-choice:outer/filter", "sid": 61002},
            {"namespace": "data", "identifier": "/example-choice:outer/filter/filter-type/vlan-case/filter", "sid": 61003},
            {"namespace": "data", "identifier": "/example-choice:outer/filter/filter-type/vlan-case/filter/id", "sid": 61004, "type": "uint16"}
        ]
    }"#;

    const YANG_CHOICE: &str = r#"
        module example-choice {
            namespace "urn:example:example-choice";
            prefix ech;
            container outer {
                container filter {
                    choice filter-type {
                        case vlan-case {
                            container filter {
                                leaf id { type uint16; }
                            }
                        }
                    }
                }
            }
        }
    "#;

    fn write_choice_fixture(dir: &Path) {
        fs::write(dir.join("example-choice.sid"), SID_CHOICE).unwrap();
        fs::write(dir.join("example-choice.yang"), YANG_CHOICE).unwrap();
    }

    #[test]
    fn choice_case_alias_collapses_duplicate_segment() {
        let dir = tempfile::tempdir().unwrap();
        write_choice_fixture(dir.path());

        let tables = build_schema_tables(dir.path(), &BuildOptions { no_cache: true, ..Default::default() }).unwrap();

        let full_path = "outer/filter/filter-type/vlan-case/filter/id";
        assert_eq!(tables.sid_tree.path_to_sid.get(full_path), Some(&61004));

        // Omitting the choice/case wrapper exposes two adjacent "filter"
        // segments, which must collapse to one in the alias.
        assert_eq!(tables.sid_tree.path_to_sid.get("outer/filter/id"), Some(&61004));
        assert_eq!(
            tables.sid_tree.prefixed_path_to_sid.get("example-choice:outer/filter/id"),
            Some(&61004)
        );
    }

    #[test]
    fn stale_cache_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        build_schema_tables(dir.path(), &BuildOptions::default()).unwrap();

        // Touch the source file so its mtime is newer than the cache.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut f = fs::OpenOptions::new().append(true).open(dir.path().join("example-1.sid")).unwrap();
        writeln!(f).unwrap();

        // The stale cache must not wedge the build; a fresh rebuild still succeeds.
        let rebuilt = build_schema_tables(dir.path(), &BuildOptions::default());
        assert!(rebuilt.is_ok());
    }
}
