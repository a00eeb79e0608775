//! Parses a map file into a [`Catalogue`] of [`RegisterInfo`] keyed by [`RegisterPath`].
//!
//! The reader runs two passes, separating "is this syntactically valid" from "build the
//! typed structure it describes": first the JSON (with C-style comments stripped) is
//! parsed into an order-preserving, duplicate-detecting [`RawValue`] tree and validated
//! key-by-key; only once that passes is it converted into the typed [`Catalogue`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::{self, MapAccess, Visitor};
use serde::Deserialize;

use crate::checksum::ChecksumKind;
use crate::error::LogicError;
use crate::interaction::{Delimiter, InteractionBuilder, InteractionInfo, TransportLayerType};
use crate::register::{DataDescriptor, DataKind, RegisterInfo};

/// An absolute, slash-separated register identifier, e.g. `/ACC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterPath(Arc<str>);

impl RegisterPath {
    pub fn new(s: &str) -> Self {
        RegisterPath(Arc::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegisterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered map from register path to its frozen description, built once from the map
/// file. Cheaply cloneable: registers are reference-counted internally.
#[derive(Debug, Clone)]
pub struct Catalogue {
    registers: Arc<BTreeMap<RegisterPath, Arc<RegisterInfo>>>,
    pub default_recovery_register: Option<RegisterPath>,
    pub delimiter: String,
}

impl Catalogue {
    pub fn get(&self, path: &RegisterPath) -> Option<&Arc<RegisterInfo>> {
        self.registers.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &RegisterPath> {
        self.registers.keys()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Parses a map file's text content (JSON with optional C-style comments).
    pub fn parse(source: &str) -> Result<Catalogue, LogicError> {
        if source.contains('\u{0}') || source.contains("\\x00") {
            return Err(LogicError::LiteralNul);
        }

        let stripped = strip_comments(source);
        let raw: RawValue = serde_json::from_str(&stripped).map_err(|e| LogicError::BadPattern {
            path: RegisterPath::new("<map file>"),
            direction: "load",
            message: format!("invalid JSON: {e}"),
        })?;

        let top = raw.as_object().ok_or_else(|| LogicError::BadPattern {
            path: RegisterPath::new("<map file>"),
            direction: "load",
            message: "map file must be a JSON object".to_string(),
        })?;
        reject_null_values(top, "<map file>")?;
        validate_keys(
            top,
            &["mapFileFormatVersion", "metadata", "registers"],
            "<map file>",
        )?;

        let version = lookup(top, "mapFileFormatVersion")
            .and_then(RawValue::as_i64)
            .unwrap_or(0);
        if version != 2 {
            return Err(LogicError::UnsupportedMapVersion { found: version });
        }

        let metadata = lookup(top, "metadata").and_then(RawValue::as_object);
        let mut catalogue_delimiter = "\r\n".to_string();
        let mut default_recovery_register = None;
        if let Some(metadata) = metadata {
            validate_keys(metadata, &["defaultRecoveryRegister", "delimiter"], "metadata")?;
            if let Some(d) = lookup(metadata, "delimiter").and_then(RawValue::as_str) {
                catalogue_delimiter = d.to_string();
            }
            if let Some(r) = lookup(metadata, "defaultRecoveryRegister").and_then(RawValue::as_str)
            {
                default_recovery_register = Some(RegisterPath::new(r));
            }
        }

        let registers_obj = lookup(top, "registers")
            .and_then(RawValue::as_object)
            .ok_or_else(|| LogicError::BadPattern {
                path: RegisterPath::new("<map file>"),
                direction: "load",
                message: "map file must have a `registers` object".to_string(),
            })?;

        let mut registers = BTreeMap::new();
        for (path_str, value) in registers_obj {
            let path = RegisterPath::new(path_str);
            let register_obj = value.as_object().ok_or_else(|| LogicError::BadPattern {
                path: path.clone(),
                direction: "load",
                message: "register entry must be a JSON object".to_string(),
            })?;
            let info = parse_register(&path, register_obj, &catalogue_delimiter)?;
            registers.insert(path, Arc::new(info));
        }

        Ok(Catalogue {
            registers: Arc::new(registers),
            default_recovery_register,
            delimiter: catalogue_delimiter,
        })
    }
}

const REGISTER_KEYS: &[&str] = &[
    "type",
    "nElem",
    "delimiter",
    "cmdDelim",
    "respDelim",
    "characterWidth",
    "bitWidth",
    "fractionalBits",
    "signed",
    "checksums",
    "write",
    "read",
];
const INTERACTION_KEYS: &[&str] = &[
    "cmd",
    "resp",
    "nRespLines",
    "nRespBytes",
    "delimiter",
    "cmdDelim",
    "respDelim",
    "characterWidth",
    "bitWidth",
    "fractionalBits",
    "signed",
];

fn parse_register(
    path: &RegisterPath,
    obj: &[(String, RawValue)],
    catalogue_delimiter: &str,
) -> Result<RegisterInfo, LogicError> {
    validate_keys(obj, REGISTER_KEYS, path.as_str())?;

    let type_str = lookup(obj, "type").and_then(RawValue::as_str).unwrap_or("string");
    let transport = TransportLayerType::from_map_str(type_str).ok_or_else(|| {
        LogicError::BadPattern {
            path: path.clone(),
            direction: "load",
            message: format!("unknown register type `{type_str}`"),
        }
    })?;

    let n_elements = lookup(obj, "nElem")
        .and_then(RawValue::as_i64)
        .unwrap_or(1)
        .max(0) as usize;

    let register_delimiter = lookup(obj, "delimiter")
        .and_then(RawValue::as_str)
        .unwrap_or(catalogue_delimiter)
        .to_string();
    let register_cmd_delim = lookup(obj, "cmdDelim").and_then(RawValue::as_str);
    let register_resp_delim = lookup(obj, "respDelim").and_then(RawValue::as_str);

    let character_width = lookup(obj, "characterWidth").and_then(RawValue::as_i64).map(|v| v as usize);
    let bit_width = lookup(obj, "bitWidth").and_then(RawValue::as_i64).map(|v| v as usize);
    let fractional_bits = lookup(obj, "fractionalBits").and_then(RawValue::as_i64).map(|v| v as usize);
    let signed = lookup(obj, "signed").and_then(RawValue::as_bool).unwrap_or(true);

    let checksum_kinds: Vec<ChecksumKind> = lookup(obj, "checksums")
        .and_then(RawValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(RawValue::as_str)
                .map(parse_checksum_kind)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|message| LogicError::BadPattern {
            path: path.clone(),
            direction: "load",
            message,
        })?
        .unwrap_or_default();

    let write_obj = lookup(obj, "write").and_then(RawValue::as_object);
    let read_obj = lookup(obj, "read").and_then(RawValue::as_object);

    let write_info = parse_interaction(
        path,
        "write",
        write_obj,
        &register_cmd_delim,
        &register_resp_delim,
        &register_delimiter,
        transport,
        signed,
        character_width,
        n_elements,
        &checksum_kinds,
    )?;
    let read_info = parse_interaction(
        path,
        "read",
        read_obj,
        &register_cmd_delim,
        &register_resp_delim,
        &register_delimiter,
        transport,
        signed,
        character_width,
        n_elements,
        &checksum_kinds,
    )?;

    if !write_info.is_enabled() && !read_info.is_enabled() {
        return Err(LogicError::DirectionNotEnabled {
            path: path.clone(),
            direction: "read or write",
        });
    }

    Ok(RegisterInfo {
        path: path.clone(),
        n_elements,
        n_channels: 1,
        data_descriptor: DataDescriptor {
            kind: data_kind_for(transport),
            signed,
            character_width,
            bit_width,
            fractional_bits,
        },
        write_info,
        read_info,
        delimiter: register_delimiter,
    })
}

#[allow(clippy::too_many_arguments)]
fn parse_interaction(
    path: &RegisterPath,
    direction: &'static str,
    obj: Option<&[(String, RawValue)]>,
    register_cmd_delim: &Option<&str>,
    register_resp_delim: &Option<&str>,
    register_delimiter: &str,
    transport: TransportLayerType,
    register_signed: bool,
    register_char_width: Option<usize>,
    n_elements: usize,
    checksum_kinds: &[ChecksumKind],
) -> Result<InteractionInfo, LogicError> {
    let obj = match obj {
        Some(obj) => {
            validate_keys(obj, INTERACTION_KEYS, path.as_str())?;
            obj
        }
        None => &[],
    };

    let command_pattern = lookup(obj, "cmd").and_then(RawValue::as_str).unwrap_or("").to_string();
    let response_pattern = lookup(obj, "resp").and_then(RawValue::as_str).unwrap_or("").to_string();
    let n_resp_lines = lookup(obj, "nRespLines").and_then(RawValue::as_i64).map(|v| v as u32);
    let n_resp_bytes = lookup(obj, "nRespBytes").and_then(RawValue::as_i64).map(|v| v as u32);

    let is_binary = transport.is_binary();
    let cmd_delim = resolve_delimiter(
        lookup(obj, "cmdDelim").and_then(RawValue::as_str),
        lookup(obj, "delimiter").and_then(RawValue::as_str).or(*register_cmd_delim),
        if is_binary { "" } else { register_delimiter },
    );
    let resp_delim = resolve_delimiter(
        lookup(obj, "respDelim").and_then(RawValue::as_str),
        lookup(obj, "delimiter").and_then(RawValue::as_str).or(*register_resp_delim),
        if is_binary { "" } else { register_delimiter },
    );
    if is_binary && !resp_delim.is_empty() {
        return Err(LogicError::BadPattern {
            path: path.clone(),
            direction,
            message: "binary interactions must not set a response delimiter".to_string(),
        });
    }

    let is_signed = lookup(obj, "signed").and_then(RawValue::as_bool).unwrap_or(register_signed);
    let fixed_char_width = lookup(obj, "characterWidth")
        .and_then(RawValue::as_i64)
        .map(|v| v as usize)
        .or(register_char_width);

    InteractionBuilder {
        register_path: path.as_str(),
        direction,
        command_pattern,
        response_pattern,
        n_resp_lines,
        n_resp_bytes,
        cmd_delimiter: Delimiter::Explicit(cmd_delim),
        resp_delimiter: Delimiter::Explicit(resp_delim),
        transport,
        is_signed,
        fixed_char_width,
        n_elements,
        checksum_kinds: checksum_kinds.to_vec(),
    }
    .build()
}

fn resolve_delimiter(explicit: Option<&str>, inherited: Option<&str>, default: &str) -> String {
    explicit.or(inherited).unwrap_or(default).to_string()
}

fn data_kind_for(transport: TransportLayerType) -> DataKind {
    match transport {
        TransportLayerType::DecInt | TransportLayerType::HexInt | TransportLayerType::BinInt => {
            DataKind::Integer
        }
        TransportLayerType::BinFloat | TransportLayerType::DecFloat => DataKind::Floating,
        TransportLayerType::String => DataKind::String,
        TransportLayerType::Void => DataKind::Void,
    }
}

fn parse_checksum_kind(s: &str) -> Result<ChecksumKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "cs8" => Ok(ChecksumKind::Cs8),
        "cs32" => Ok(ChecksumKind::Cs32),
        "crc_ccitt_16" | "crcccitt16" => Ok(ChecksumKind::CrcCcitt16),
        "sha256" => Ok(ChecksumKind::Sha256),
        other => Err(format!("unknown checksum kind `{other}`")),
    }
}

/// Strips `//` and `/* */` comments from `source` so map files can carry commentary
/// despite being JSON underneath.
fn strip_comments(source: &str) -> String {
    use std::io::Read;
    let mut stripped = String::new();
    json_comments::StripComments::new(source.as_bytes())
        .read_to_string(&mut stripped)
        .expect("stripping comments from an in-memory string cannot fail");
    stripped
}

fn lookup<'a>(obj: &'a [(String, RawValue)], key: &str) -> Option<&'a RawValue> {
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Rejects `null` wherever it appears in `obj`, recursively, with `context` prefixed to
/// the offending key for a readable error. A map file has no field for which `null` is a
/// meaningful value distinct from "omit this key", so allowing it through would let a
/// typo'd `null` silently fall back to whatever default the field's accessor picks.
fn reject_null_values(obj: &[(String, RawValue)], context: &str) -> Result<(), LogicError> {
    for (key, value) in obj {
        let path = format!("{context}.{key}");
        match value {
            RawValue::Null => return Err(LogicError::NullValue { key: path }),
            RawValue::Object(inner) => reject_null_values(inner, &path)?,
            RawValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    match item {
                        RawValue::Null => {
                            return Err(LogicError::NullValue { key: format!("{path}[{i}]") })
                        }
                        RawValue::Object(inner) => reject_null_values(inner, &format!("{path}[{i}]"))?,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_keys(
    obj: &[(String, RawValue)],
    allowed: &[&str],
    context: &str,
) -> Result<(), LogicError> {
    let mut seen: HashMap<String, ()> = HashMap::new();
    for (key, _) in obj {
        let lower = key.to_ascii_lowercase();
        if seen.insert(lower.clone(), ()).is_some() {
            return Err(LogicError::DuplicateKey {
                key: format!("{context}.{key}"),
            });
        }
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(key)) {
            return Err(LogicError::UnknownKey {
                key: format!("{context}.{key}"),
            });
        }
    }
    Ok(())
}

/// A JSON value that preserves object key order and duplicate keys, so the loader can
/// reject what `serde_json::Value` would silently collapse.
#[derive(Debug, Clone)]
enum RawValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<RawValue>),
    Object(Vec<(String, RawValue)>),
}

impl RawValue {
    fn as_object(&self) -> Option<&[(String, RawValue)]> {
        match self {
            RawValue::Object(pairs) => Some(pairs),
            _ => None,
        }
    }
    fn as_array(&self) -> Option<&[RawValue]> {
        match self {
            RawValue::Array(items) => Some(items),
            _ => None,
        }
    }
    fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::String(s) => Some(s),
            _ => None,
        }
    }
    fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }
    fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for RawValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RawValueVisitor;

        impl<'de> Visitor<'de> for RawValueVisitor {
            type Value = RawValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
                Ok(RawValue::Bool(v))
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(RawValue::Number(v.into()))
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(RawValue::Number(v.into()))
            }
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(RawValue::Number(
                    serde_json::Number::from_f64(v).unwrap_or_else(|| 0.into()),
                ))
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
                Ok(RawValue::String(v.to_string()))
            }
            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(RawValue::String(v))
            }
            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(RawValue::Null)
            }
            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(RawValue::Null)
            }
            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(RawValue::Array(items))
            }
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, RawValue>()? {
                    pairs.push((key, value));
                }
                Ok(RawValue::Object(pairs))
            }
        }

        deserializer.deserialize_any(RawValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map_source() -> &'static str {
        r#"
        {
          // trailing comment allowed
          "mapFileFormatVersion": 2,
          "metadata": { "delimiter": "\r\n" },
          "registers": {
            "/cwFrequency": {
              "type": "decInt",
              "nElem": 1,
              "write": { "cmd": "SOUR:FREQ:CW {{x.0}}" },
              "read": { "cmd": "SOUR:FREQ:CW?", "resp": "{{x.0}}" }
            }
          }
        }
        "#
    }

    #[test]
    fn test_parse_minimal_catalogue() {
        let catalogue = Catalogue::parse(sample_map_source()).unwrap();
        assert_eq!(catalogue.len(), 1);
        let info = catalogue.get(&RegisterPath::new("/cwFrequency")).unwrap();
        assert!(info.is_readable());
        assert!(info.is_writable());
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let source = r#"{ "mapFileFormatVersion": 1, "registers": {} }"#;
        assert!(matches!(
            Catalogue::parse(source),
            Err(LogicError::UnsupportedMapVersion { found: 1 })
        ));
    }

    #[test]
    fn test_parse_rejects_duplicate_keys_case_insensitively() {
        let source = r#"{ "mapFileFormatVersion": 2, "mapfileformatversion": 2, "registers": {} }"#;
        assert!(matches!(
            Catalogue::parse(source),
            Err(LogicError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let source = r#"{ "mapFileFormatVersion": 2, "bogus": true, "registers": {} }"#;
        assert!(matches!(
            Catalogue::parse(source),
            Err(LogicError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_literal_nul() {
        let source = "{ \"mapFileFormatVersion\": 2, \"registers\": {\u{0}} }";
        assert!(matches!(Catalogue::parse(source), Err(LogicError::LiteralNul)));
    }

    #[test]
    fn test_parse_rejects_top_level_null() {
        let source = r#"{ "mapFileFormatVersion": 2, "metadata": null, "registers": {} }"#;
        assert!(matches!(
            Catalogue::parse(source),
            Err(LogicError::NullValue { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_nested_null() {
        let source = r#"
        {
          "mapFileFormatVersion": 2,
          "registers": {
            "/cwFrequency": {
              "type": "decInt",
              "nElem": null,
              "read": { "cmd": "SOUR:FREQ:CW?", "resp": "{{x.0}}" }
            }
          }
        }
        "#;
        assert!(matches!(
            Catalogue::parse(source),
            Err(LogicError::NullValue { .. })
        ));
    }
}
