//! YANG type representation (TypeInfo) and the Value Codec (C6, §4.6).

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ciborium::value::Value as Cbor;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

use crate::error::{CoreconfError, Result};

/// CBOR tag for a decimal fraction: `tag(4, [exponent, mantissa])` (RFC 8949 §3.4.4).
pub const TAG_DECIMAL_FRACTION: u64 = 4;
/// CBOR tag marking an identityref SID when disambiguating a union member.
pub const TAG_IDENTITYREF_IN_UNION: u64 = 44;
/// CBOR tag marking an enumeration value when disambiguating a union member.
pub const TAG_ENUM_IN_UNION: u64 = 45;

/// A YANG scalar type, resolved to a concrete base (typedef chains already
/// followed by the time this is built).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeInfo {
    Boolean,
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    /// `fraction-digits` from the YANG `decimal64` statement.
    Decimal64 { fraction_digits: u8 },
    Binary,
    Empty,
    Bits,
    Uri,
    /// Base identity this identityref may point at, qualified `module:identity`.
    Identityref { base: String },
    /// Target path of a `leafref`.
    Leafref { target: String },
    /// A full bijection between enum names and their assigned integer values.
    Enumeration {
        name_to_value: HashMap<String, i64>,
        value_to_name: HashMap<i64, String>,
    },
    /// Ordered member types of a `union`; first to succeed wins on encode.
    Union { members: Vec<TypeInfo> },
    /// Unrecognized type name; falls back to string encoding with a warning.
    Unknown(String),
}

impl TypeInfo {
    /// Build an `Enumeration` variant from name->value pairs, filling in the
    /// reverse direction so callers never reverse a HashMap ad hoc.
    pub fn enumeration(pairs: impl IntoIterator<Item = (String, i64)>) -> Self {
        let name_to_value: HashMap<String, i64> = pairs.into_iter().collect();
        let value_to_name = name_to_value.iter().map(|(k, v)| (*v, k.clone())).collect();
        TypeInfo::Enumeration {
            name_to_value,
            value_to_name,
        }
    }

    /// Parse a base type keyword as it appears in a YANG `type` statement
    /// argument, after typedef resolution has reduced it to a built-in name.
    pub fn from_builtin_name(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" => TypeInfo::Boolean,
            "string" => TypeInfo::String,
            "int8" => TypeInfo::Int8,
            "int16" => TypeInfo::Int16,
            "int32" => TypeInfo::Int32,
            "int64" => TypeInfo::Int64,
            "uint8" => TypeInfo::Uint8,
            "uint16" => TypeInfo::Uint16,
            "uint32" => TypeInfo::Uint32,
            "uint64" => TypeInfo::Uint64,
            "binary" => TypeInfo::Binary,
            "empty" => TypeInfo::Empty,
            "bits" => TypeInfo::Bits,
            "inet:uri" => TypeInfo::Uri,
            _ => return None,
        })
    }
}

fn yaml_as_i64(value: &Yaml, type_path: &str) -> Result<i64> {
    match value {
        Yaml::Number(n) => n.as_i64().ok_or_else(|| {
            CoreconfError::TypeConversion(format!("{} is not representable as i64", n))
        }),
        Yaml::String(s) => s
            .parse()
            .map_err(|_| CoreconfError::TypeConversion(format!("cannot parse '{}' as i64", s))),
        other => Err(CoreconfError::TypeConversion(format!(
            "expected integer at {}, found {:?}",
            type_path, other
        ))),
    }
}

fn yaml_as_f64(value: &Yaml, type_path: &str) -> Result<f64> {
    match value {
        Yaml::Number(n) => n.as_f64().ok_or_else(|| {
            CoreconfError::TypeConversion(format!("{} is not representable as f64", n))
        }),
        Yaml::String(s) => s
            .parse()
            .map_err(|_| CoreconfError::TypeConversion(format!("cannot parse '{}' as f64", s))),
        other => Err(CoreconfError::TypeConversion(format!(
            "expected number at {}, found {:?}",
            type_path, other
        ))),
    }
}

/// Encode a YAML scalar into its CBOR wire representation per the Value
/// Codec table (§4.6). `identity_lookup` resolves an identityref name
/// (bare or `module:name`) to its SID; `type_path` is used only for error
/// context.
pub fn encode_value(
    value: &Yaml,
    type_info: &TypeInfo,
    type_path: &str,
    identity_lookup: &dyn Fn(&str) -> Option<i64>,
) -> Result<Cbor> {
    match type_info {
        TypeInfo::Boolean => {
            let b = match value {
                Yaml::Bool(b) => *b,
                Yaml::String(s) => s == "true",
                other => {
                    return Err(CoreconfError::TypeConversion(format!(
                        "expected boolean at {}, found {:?}",
                        type_path, other
                    )));
                }
            };
            Ok(Cbor::Bool(b))
        }

        TypeInfo::String | TypeInfo::Uri => Ok(Cbor::Text(
            value
                .as_str()
                .ok_or_else(|| {
                    CoreconfError::TypeConversion(format!("expected string at {}", type_path))
                })?
                .to_string(),
        )),

        TypeInfo::Int8 | TypeInfo::Int16 | TypeInfo::Int32 | TypeInfo::Int64 => {
            Ok(Cbor::Integer(yaml_as_i64(value, type_path)?.into()))
        }

        TypeInfo::Uint8 | TypeInfo::Uint16 | TypeInfo::Uint32 | TypeInfo::Uint64 => {
            let n = yaml_as_i64(value, type_path)?;
            Ok(Cbor::Integer(n.into()))
        }

        TypeInfo::Decimal64 { fraction_digits } => {
            let f = yaml_as_f64(value, type_path)?;
            let mantissa = (f * 10f64.powi(*fraction_digits as i32)).round() as i64;
            let exponent = -(*fraction_digits as i64);
            Ok(Cbor::Tag(
                TAG_DECIMAL_FRACTION,
                Box::new(Cbor::Array(vec![
                    Cbor::Integer(exponent.into()),
                    Cbor::Integer(mantissa.into()),
                ])),
            ))
        }

        TypeInfo::Binary => {
            let s = value.as_str().ok_or_else(|| {
                CoreconfError::TypeConversion(format!("expected base64 string at {}", type_path))
            })?;
            let bytes = BASE64
                .decode(s)
                .map_err(|e| CoreconfError::TypeConversion(format!("base64 decode: {}", e)))?;
            Ok(Cbor::Bytes(bytes))
        }

        TypeInfo::Empty => Ok(Cbor::Null),

        TypeInfo::Bits => {
            let names: Vec<String> = match value {
                Yaml::Sequence(seq) => seq
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                Yaml::String(s) => s.split_whitespace().map(str::to_string).collect(),
                other => {
                    return Err(CoreconfError::TypeConversion(format!(
                        "expected bit-name list at {}, found {:?}",
                        type_path, other
                    )));
                }
            };
            Ok(Cbor::Array(names.into_iter().map(Cbor::Text).collect()))
        }

        TypeInfo::Identityref { base } => {
            let name = value.as_str().ok_or_else(|| {
                CoreconfError::TypeConversion(format!("expected identity name at {}", type_path))
            })?;
            let bare = name.rsplit(':').next().unwrap_or(name);
            identity_lookup(name)
                .or_else(|| identity_lookup(bare))
                .map(|sid| Cbor::Integer(sid.into()))
                .ok_or_else(|| CoreconfError::IdentityUnknown {
                    identity: format!("{} (base {})", name, base),
                })
        }

        TypeInfo::Leafref { .. } => Ok(yaml_to_cbor(value)),

        TypeInfo::Enumeration { name_to_value, .. } => {
            if let Some(s) = value.as_str() {
                return name_to_value
                    .get(s)
                    .map(|v| Cbor::Integer((*v).into()))
                    .ok_or_else(|| CoreconfError::EnumUnknown {
                        value: s.to_string(),
                        type_path: type_path.to_string(),
                    });
            }
            if let Some(n) = value.as_i64() {
                return Ok(Cbor::Integer(n.into()));
            }
            Err(CoreconfError::EnumUnknown {
                value: format!("{:?}", value),
                type_path: type_path.to_string(),
            })
        }

        TypeInfo::Union { members } => {
            for member in members {
                if let Ok(v) = encode_value(value, member, type_path, identity_lookup) {
                    return Ok(tag_union_member(v, member));
                }
            }
            Err(CoreconfError::TypeConversion(format!(
                "no union member at {} accepted {:?}",
                type_path, value
            )))
        }

        TypeInfo::Unknown(name) => {
            tracing::warn!(type_path, yang_type = name, "unknown type, falling back to string");
            Ok(Cbor::Text(yaml_scalar_to_string(value)))
        }
    }
}

/// Decode a CBOR wire value back into YAML per the Value Codec table.
pub fn decode_value(
    value: &Cbor,
    type_info: &TypeInfo,
    type_path: &str,
    identity_lookup: &dyn Fn(i64) -> Option<String>,
) -> Result<Yaml> {
    match type_info {
        TypeInfo::Boolean => match value {
            Cbor::Bool(b) => Ok(Yaml::Bool(*b)),
            other => Err(CoreconfError::TypeConversion(format!(
                "expected boolean at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::String | TypeInfo::Uri => match value {
            Cbor::Text(s) => Ok(Yaml::String(s.clone())),
            other => Err(CoreconfError::TypeConversion(format!(
                "expected string at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::Int8
        | TypeInfo::Int16
        | TypeInfo::Int32
        | TypeInfo::Int64
        | TypeInfo::Uint8
        | TypeInfo::Uint16
        | TypeInfo::Uint32
        | TypeInfo::Uint64 => match value {
            Cbor::Integer(n) => {
                let n: i128 = (*n).into();
                Ok(Yaml::Number((n as i64).into()))
            }
            other => Err(CoreconfError::TypeConversion(format!(
                "expected integer at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::Decimal64 { .. } => match value {
            Cbor::Tag(tag, inner) if *tag == TAG_DECIMAL_FRACTION => {
                let arr = inner.as_array().ok_or_else(|| {
                    CoreconfError::TypeConversion("decimal64 tag content is not an array".into())
                })?;
                let exponent = arr
                    .first()
                    .and_then(Cbor::as_integer)
                    .map(i128::from)
                    .ok_or_else(|| CoreconfError::TypeConversion("missing decimal exponent".into()))?;
                let mantissa = arr
                    .get(1)
                    .and_then(Cbor::as_integer)
                    .map(i128::from)
                    .ok_or_else(|| CoreconfError::TypeConversion("missing decimal mantissa".into()))?;
                let f = mantissa as f64 * 10f64.powi(exponent as i32);
                Ok(Yaml::Number(f.into()))
            }
            other => Err(CoreconfError::TypeConversion(format!(
                "expected decimal64 tag at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::Binary => match value {
            Cbor::Bytes(bytes) => Ok(Yaml::String(BASE64.encode(bytes))),
            other => Err(CoreconfError::TypeConversion(format!(
                "expected byte string at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::Empty => Ok(Yaml::Null),

        TypeInfo::Bits => match value {
            Cbor::Array(items) => Ok(Yaml::Sequence(
                items
                    .iter()
                    .filter_map(|v| v.as_text().map(|s| Yaml::String(s.to_string())))
                    .collect(),
            )),
            other => Err(CoreconfError::TypeConversion(format!(
                "expected bit list at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::Identityref { .. } => match value {
            Cbor::Integer(n) => {
                let sid: i128 = (*n).into();
                let sid = sid as i64;
                identity_lookup(sid)
                    .map(Yaml::String)
                    .ok_or_else(|| CoreconfError::IdentityUnknown {
                        identity: sid.to_string(),
                    })
            }
            other => Err(CoreconfError::TypeConversion(format!(
                "expected identity SID at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::Leafref { .. } => Ok(cbor_to_yaml(value)),

        TypeInfo::Enumeration { value_to_name, .. } => match value {
            Cbor::Integer(n) => {
                let n: i128 = (*n).into();
                let n = n as i64;
                value_to_name
                    .get(&n)
                    .cloned()
                    .map(Yaml::String)
                    .ok_or_else(|| CoreconfError::EnumUnknown {
                        value: n.to_string(),
                        type_path: type_path.to_string(),
                    })
            }
            other => Err(CoreconfError::TypeConversion(format!(
                "expected enum integer at {}, found {:?}",
                type_path, other
            ))),
        },

        TypeInfo::Union { members } => {
            if let Cbor::Tag(tag, inner) = value {
                match *tag {
                    TAG_ENUM_IN_UNION => {
                        if let Some(enum_member) =
                            members.iter().find(|m| matches!(m, TypeInfo::Enumeration { .. }))
                        {
                            return decode_value(inner, enum_member, type_path, identity_lookup);
                        }
                    }
                    TAG_IDENTITYREF_IN_UNION => {
                        if let Some(ident_member) =
                            members.iter().find(|m| matches!(m, TypeInfo::Identityref { .. }))
                        {
                            return decode_value(inner, ident_member, type_path, identity_lookup);
                        }
                    }
                    _ => {}
                }
            }
            for member in members {
                if let Ok(v) = decode_value(value, member, type_path, identity_lookup) {
                    return Ok(v);
                }
            }
            Err(CoreconfError::TypeConversion(format!(
                "no union member at {} accepted {:?}",
                type_path, value
            )))
        }

        TypeInfo::Unknown(name) => {
            tracing::warn!(type_path, yang_type = name, "unknown type, falling back to string");
            Ok(cbor_to_yaml(value))
        }
    }
}

/// Wrap a successfully-encoded union member in its disambiguation tag, when
/// the member type is one the decoder cannot distinguish from its neighbors
/// by CBOR major type alone (enumeration and identityref are both integers).
fn tag_union_member(encoded: Cbor, member: &TypeInfo) -> Cbor {
    match member {
        TypeInfo::Enumeration { .. } => Cbor::Tag(TAG_ENUM_IN_UNION, Box::new(encoded)),
        TypeInfo::Identityref { .. } => Cbor::Tag(TAG_IDENTITYREF_IN_UNION, Box::new(encoded)),
        _ => encoded,
    }
}

fn yaml_scalar_to_string(value: &Yaml) -> String {
    match value {
        Yaml::String(s) => s.clone(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        Yaml::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}

/// Structural (non-type-aware) conversion, used for `leafref`/`unknown`
/// pass-through values where no further interpretation is possible, and by
/// the encoder (C7) when a value arrives with no resolvable type info.
pub(crate) fn yaml_to_cbor(value: &Yaml) -> Cbor {
    match value {
        Yaml::Null => Cbor::Null,
        Yaml::Bool(b) => Cbor::Bool(*b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Cbor::Integer(i.into())
            } else if let Some(f) = n.as_f64() {
                Cbor::Float(f)
            } else {
                Cbor::Null
            }
        }
        Yaml::String(s) => Cbor::Text(s.clone()),
        Yaml::Sequence(seq) => Cbor::Array(seq.iter().map(yaml_to_cbor).collect()),
        Yaml::Mapping(map) => Cbor::Map(
            map.iter()
                .map(|(k, v)| (yaml_to_cbor(k), yaml_to_cbor(v)))
                .collect(),
        ),
        Yaml::Tagged(tagged) => yaml_to_cbor(&tagged.value),
    }
}

/// Structural (non-type-aware) conversion, the decode-direction counterpart
/// of [`yaml_to_cbor`].
pub(crate) fn cbor_to_yaml(value: &Cbor) -> Yaml {
    match value {
        Cbor::Null => Yaml::Null,
        Cbor::Bool(b) => Yaml::Bool(*b),
        Cbor::Integer(n) => {
            let n: i128 = (*n).into();
            Yaml::Number((n as i64).into())
        }
        Cbor::Float(f) => Yaml::Number((*f).into()),
        Cbor::Text(s) => Yaml::String(s.clone()),
        Cbor::Bytes(bytes) => Yaml::String(BASE64.encode(bytes)),
        Cbor::Array(arr) => Yaml::Sequence(arr.iter().map(cbor_to_yaml).collect()),
        Cbor::Map(map) => Yaml::Mapping(
            map.iter()
                .map(|(k, v)| (cbor_to_yaml(k), cbor_to_yaml(v)))
                .collect(),
        ),
        Cbor::Tag(_, inner) => cbor_to_yaml(inner),
        _ => Yaml::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_identity_lookup(_: &str) -> Option<i64> {
        None
    }

    fn no_identity_name(_: i64) -> Option<String> {
        None
    }

    #[test]
    fn encodes_string_passthrough() {
        let value = Yaml::String("hello".into());
        let result = encode_value(&value, &TypeInfo::String, "/t", &no_identity_lookup).unwrap();
        assert_eq!(result, Cbor::Text("hello".into()));
    }

    #[test]
    fn encodes_boolean_from_string() {
        let value = Yaml::String("true".into());
        let result = encode_value(&value, &TypeInfo::Boolean, "/t", &no_identity_lookup).unwrap();
        assert_eq!(result, Cbor::Bool(true));
    }

    #[test]
    fn enum_round_trips() {
        let t = TypeInfo::enumeration([("open".to_string(), 0), ("closed".to_string(), 1)]);
        let encoded =
            encode_value(&Yaml::String("open".into()), &t, "/t", &no_identity_lookup).unwrap();
        assert_eq!(encoded, Cbor::Integer(0.into()));
        let decoded = decode_value(&encoded, &t, "/t", &no_identity_name).unwrap();
        assert_eq!(decoded, Yaml::String("open".into()));
    }

    #[test]
    fn enum_unknown_value_fails() {
        let t = TypeInfo::enumeration([("open".to_string(), 0)]);
        let err = encode_value(&Yaml::String("bogus".into()), &t, "/t", &no_identity_lookup)
            .unwrap_err();
        assert!(matches!(err, CoreconfError::EnumUnknown { .. }));
    }

    #[test]
    fn decimal64_encodes_tag4() {
        let t = TypeInfo::Decimal64 { fraction_digits: 2 };
        let value = Yaml::Number(serde_yaml::Number::from(3.14));
        let encoded = encode_value(&value, &t, "/t", &no_identity_lookup).unwrap();
        match encoded {
            Cbor::Tag(4, inner) => {
                let arr = inner.as_array().unwrap();
                assert_eq!(arr[0], Cbor::Integer((-2i64).into()));
                assert_eq!(arr[1], Cbor::Integer(314i64.into()));
            }
            other => panic!("expected tag 4, got {:?}", other),
        }
    }

    #[test]
    fn binary_round_trips_base64() {
        let encoded_b64 = BASE64.encode([1u8, 2, 3]);
        let value = Yaml::String(encoded_b64.clone());
        let cbor = encode_value(&value, &TypeInfo::Binary, "/t", &no_identity_lookup).unwrap();
        assert_eq!(cbor, Cbor::Bytes(vec![1, 2, 3]));
        let back = decode_value(&cbor, &TypeInfo::Binary, "/t", &no_identity_name).unwrap();
        assert_eq!(back, Yaml::String(encoded_b64));
    }

    #[test]
    fn union_tries_members_in_order() {
        let t = TypeInfo::Union {
            members: vec![TypeInfo::Uint32, TypeInfo::String],
        };
        let encoded =
            encode_value(&Yaml::String("hello".into()), &t, "/t", &no_identity_lookup).unwrap();
        assert_eq!(encoded, Cbor::Text("hello".into()));
    }
}
