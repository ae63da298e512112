//! tsn-coreconf-codec - a schema-driven codec between human-editable YANG
//! instance data and the compact Delta-SID CBOR wire form used by CORECONF
//! (RFC 9254) over CoAP (RFC 7252).
//!
//! This crate builds the SID tree and type table from a directory of
//! `.sid` and `.yang` files, then encodes YAML instance documents down to
//! Delta-SID CBOR and decodes them back. It does not speak CoAP, CBOR-over-UDP
//! framing, or serial transport, and it does not fetch `.sid` catalogs -- it
//! is the codec those layers sit on top of.
//!
//! # Example
//!
//! ```no_run
//! use tsn_coreconf_codec::{build_schema_tables, encode_yaml_to_cbor, decode_cbor_to_yaml};
//! use tsn_coreconf_codec::{BuildOptions, EncodeOptions, DecodeOptions};
//!
//! let tables = build_schema_tables("./yang-modules", &BuildOptions::default()).unwrap();
//!
//! let yaml = "- /ietf-interfaces:interfaces/interface[name='eth0']/enabled: true\n";
//! let cbor = encode_yaml_to_cbor(yaml, &tables, &EncodeOptions::default()).unwrap();
//!
//! let roundtrip = decode_cbor_to_yaml(&cbor, &tables, &DecodeOptions::default()).unwrap();
//! assert!(roundtrip.contains("enabled"));
//! ```

mod decode;
mod encode;
mod error;
mod path;
mod resolve;
mod schema;
mod sid_file;
mod sid_tree;
mod types;
mod yang;

pub use decode::{decode_cbor_to_yaml, DecodeOptions, OutputFormat};
pub use encode::{encode_yaml_to_cbor, extract_sid_queries, EncodeOptions, SidQuery, SortMode};
pub use error::{CoreconfError, Result};
pub use path::{parse_instance_id, parse_single_segment, segment_prefixed_name, Segment};
pub use resolve::resolve_path;
pub use schema::{build_schema_tables, BuildOptions, SchemaTables};
pub use sid_file::{Namespace, SidFile, SidItem};
pub use sid_tree::{IdentityInfo, NodeInfo, SidTree, TypeTable};
pub use types::TypeInfo;
pub use yang::{extract_module, ModuleTypes};
