//! The frozen, per-direction description of one register interaction: its patterns,
//! framing, delimiters, transport type, and checksum plan. Everything here is computed
//! once at catalogue load and never mutates afterwards.

use std::fmt;

use regex::Regex;

use crate::checksum::{ChannelKind, ChecksumKind, ChecksumTagPositions, Checksumer};
use crate::error::LogicError;
use crate::template;

/// The wire type of one interaction direction. Determines the regex class used to
/// capture values out of a response and the encoder used to format values into a
/// command, and whether the interaction exchanges raw bytes (`binInt`/`binFloat`) or
/// textual characters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLayerType {
    DecInt,
    HexInt,
    BinInt,
    BinFloat,
    DecFloat,
    String,
    Void,
}

impl TransportLayerType {
    pub fn from_map_str(s: &str) -> Option<Self> {
        Some(match s.to_ascii_lowercase().as_str() {
            "decint" => TransportLayerType::DecInt,
            "hexint" => TransportLayerType::HexInt,
            "binint" => TransportLayerType::BinInt,
            "binfloat" => TransportLayerType::BinFloat,
            "decfloat" => TransportLayerType::DecFloat,
            "string" => TransportLayerType::String,
            "void" => TransportLayerType::Void,
            _ => return None,
        })
    }

    pub fn is_binary(self) -> bool {
        matches!(self, TransportLayerType::BinInt | TransportLayerType::BinFloat)
    }

    /// The regex fragment (wrapped in a capturing group) matching one value of this
    /// type, optionally constrained to a fixed character width.
    pub fn value_regex_class(self, fixed_char_width: Option<usize>) -> String {
        let quant = match fixed_char_width {
            Some(w) => format!("{{{w}}}"),
            None => "+".to_string(),
        };
        match self {
            TransportLayerType::DecInt => match fixed_char_width {
                Some(w) => format!("([+-]?[0-9]{{{w}}})"),
                None => "([+-]?[0-9]+)".to_string(),
            },
            TransportLayerType::HexInt | TransportLayerType::BinFloat | TransportLayerType::BinInt => {
                format!("([0-9A-Fa-f]{quant})")
            }
            TransportLayerType::DecFloat => r"([+-]?[0-9]+\.?[0-9]*)".to_string(),
            TransportLayerType::String => match fixed_char_width {
                Some(w) => format!("(.{{{w}}})"),
                None => "(.*)".to_string(),
            },
            TransportLayerType::Void => String::new(),
        }
    }
}

impl fmt::Display for TransportLayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportLayerType::DecInt => "decInt",
            TransportLayerType::HexInt => "hexInt",
            TransportLayerType::BinInt => "binInt",
            TransportLayerType::BinFloat => "binFloat",
            TransportLayerType::DecFloat => "decFloat",
            TransportLayerType::String => "string",
            TransportLayerType::Void => "void",
        };
        f.write_str(s)
    }
}

/// How a response is delimited: a fixed number of delimiter-terminated lines, or a fixed
/// number of raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ReadLines(u32),
    ReadBytes(u32),
    None,
}

/// The delimiter used when a [`Delimiter::Default`] sentinel isn't overridden anywhere
/// in the four-level precedence chain (command/response pattern, interaction, register,
/// map file metadata).
pub const DEFAULT_DELIMITER: &str = "\r\n";

/// A delimiter sentinel as accepted by the command handler: use the handler's own
/// default, use no delimiter at all, or an explicit byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delimiter {
    Default,
    None,
    Explicit(String),
}

impl Delimiter {
    /// Resolves this sentinel against the handler's own default delimiter.
    pub fn resolve<'a>(&'a self, handler_default: &'a str) -> &'a str {
        match self {
            Delimiter::Default => handler_default,
            Delimiter::None => "",
            Delimiter::Explicit(s) => s,
        }
    }
}

/// A checksum descriptor bound into an interaction: its kind, its index in the pattern,
/// and the tag positions validated at load time.
#[derive(Debug, Clone)]
pub struct ChecksumSpec {
    pub index: usize,
    pub kind: ChecksumKind,
    pub positions: ChecksumTagPositions,
}

/// The frozen description of one direction (read or write) of one register.
#[derive(Debug, Clone)]
pub struct InteractionInfo {
    pub command_pattern: String,
    pub response_pattern: String,
    pub framing: Framing,
    pub cmd_delimiter: Delimiter,
    pub resp_delimiter: Delimiter,
    pub transport: TransportLayerType,
    pub is_signed: bool,
    pub fixed_char_width: Option<usize>,
    pub command_checksums: Vec<ChecksumSpec>,
    pub response_checksums: Vec<ChecksumSpec>,
    /// Response regex compiled once at load, with exactly one capture group per
    /// register element (checksum tags are non-capturing). `None` when there is no
    /// response to parse (write-only directions with a trivial response, or `framing =
    /// None`).
    pub response_regex: Option<Regex>,
    /// Which element index each capture group of `response_regex` belongs to, in group
    /// order. Empty when `response_regex` is `None`.
    pub captured_tags: Vec<usize>,
}

impl InteractionInfo {
    pub fn is_enabled(&self) -> bool {
        !self.command_pattern.is_empty()
    }

    pub fn is_binary(&self) -> bool {
        self.transport.is_binary()
    }

    /// Builds the channel kind ([`ChannelKind`]) checksums in this interaction should
    /// use, derived from whether the interaction is binary.
    pub fn channel_kind(&self) -> ChannelKind {
        if self.is_binary() {
            ChannelKind::Binary
        } else {
            ChannelKind::Textual
        }
    }
}

/// Builds a read or write [`InteractionInfo`] from already-resolved fields (the caller
/// resolves the delimiter precedence chain and type inheritance before constructing
/// this), validating checksum topology and response capture-group counts.
#[derive(Debug)]
pub struct InteractionBuilder<'a> {
    pub register_path: &'a str,
    pub direction: &'static str,
    pub command_pattern: String,
    pub response_pattern: String,
    pub n_resp_lines: Option<u32>,
    pub n_resp_bytes: Option<u32>,
    pub cmd_delimiter: Delimiter,
    pub resp_delimiter: Delimiter,
    pub transport: TransportLayerType,
    pub is_signed: bool,
    pub fixed_char_width: Option<usize>,
    pub n_elements: usize,
    /// Checksum kind per tag index, e.g. `["cs8"]` for a pattern using `cs.0`, taken
    /// from the map file's `checksums` field; defaults to `cs8` for every index left
    /// unspecified.
    pub checksum_kinds: Vec<ChecksumKind>,
}

impl<'a> InteractionBuilder<'a> {
    pub fn build(self) -> Result<InteractionInfo, LogicError> {
        let path = crate::catalogue::RegisterPath::new(self.register_path);

        if self.command_pattern.is_empty() {
            if !self.response_pattern.is_empty() {
                return Err(LogicError::ResponseWithoutCommand {
                    path,
                    direction: self.direction,
                });
            }
            return Ok(InteractionInfo {
                command_pattern: String::new(),
                response_pattern: String::new(),
                framing: Framing::None,
                cmd_delimiter: self.cmd_delimiter,
                resp_delimiter: self.resp_delimiter,
                transport: self.transport,
                is_signed: self.is_signed,
                fixed_char_width: self.fixed_char_width,
                command_checksums: Vec::new(),
                response_checksums: Vec::new(),
                response_regex: None,
                captured_tags: Vec::new(),
            });
        }

        if self.transport == TransportLayerType::Void
            && (!self.response_pattern.is_empty() || self.command_pattern.contains("{{x."))
        {
            return Err(LogicError::VoidWithPayload {
                path,
                direction: self.direction,
            });
        }

        // A void write (or any write/read with no response pattern) expects no response
        // frame at all, regardless of whether a command exists: `nRespLines`/`nRespBytes`
        // only take effect once `resp` names something to actually match.
        let framing = if self.response_pattern.is_empty() {
            Framing::None
        } else {
            match self.n_resp_bytes {
                Some(n) => Framing::ReadBytes(n),
                None => Framing::ReadLines(self.n_resp_lines.unwrap_or(1)),
            }
        };

        let command_checksums = build_checksum_specs(
            &self.command_pattern,
            path.clone(),
            self.direction,
            "command",
            &self.checksum_kinds,
        )?;
        let response_checksums = build_checksum_specs(
            &self.response_pattern,
            path.clone(),
            self.direction,
            "response",
            &self.checksum_kinds,
        )?;

        let (response_regex, captured_tags) = if self.response_pattern.is_empty() {
            (None, Vec::new())
        } else {
            let value_class = self.transport.value_regex_class(self.fixed_char_width);
            let checksum_classes: Vec<(usize, String)> = response_checksums
                .iter()
                .map(|c| (c.index, c.kind.regex_class()))
                .collect();
            let (regex, tags) = template::render_response_regex(
                &self.response_pattern,
                &value_class,
                self.n_elements,
                &checksum_classes,
            )
            .map_err(|message| LogicError::BadPattern {
                path: path.clone(),
                direction: self.direction,
                message,
            })?;
            // Checksum tags are non-capturing, so the regex's capture-group count must
            // equal the element count exactly, with no exception for checksums.
            let expected = self.n_elements;
            let found = regex.captures_len() - 1;
            if found != expected {
                return Err(LogicError::CaptureGroupMismatch {
                    path,
                    direction: self.direction,
                    found,
                    expected,
                });
            }
            (Some(regex), tags)
        };

        Ok(InteractionInfo {
            command_pattern: self.command_pattern,
            response_pattern: self.response_pattern,
            framing,
            cmd_delimiter: self.cmd_delimiter,
            resp_delimiter: self.resp_delimiter,
            transport: self.transport,
            is_signed: self.is_signed,
            fixed_char_width: self.fixed_char_width,
            command_checksums,
            response_checksums,
            response_regex,
            captured_tags,
        })
    }
}

fn build_checksum_specs(
    pattern: &str,
    path: crate::catalogue::RegisterPath,
    direction: &'static str,
    side: &'static str,
    checksum_kinds: &[ChecksumKind],
) -> Result<Vec<ChecksumSpec>, LogicError> {
    if crate::checksum::count_checksums(pattern) == 0 {
        return Ok(Vec::new());
    }
    let positions = crate::checksum::validate_pattern(pattern).map_err(|message| {
        LogicError::BadChecksumTopology {
            path: path.clone(),
            direction,
            message: format!("{side} pattern: {message}"),
        }
    })?;

    Ok(positions
        .into_iter()
        .enumerate()
        .map(|(index, positions)| ChecksumSpec {
            index,
            kind: checksum_kinds.get(index).copied().unwrap_or(ChecksumKind::Cs8),
            positions,
        })
        .collect())
}

/// Looks up a [`Checksumer`] for each checksum spec in an interaction, given the
/// interaction's channel kind.
pub fn checksumers_for(specs: &[ChecksumSpec], channel: ChannelKind) -> Vec<(usize, Checksumer)> {
    specs
        .iter()
        .map(|spec| (spec.index, Checksumer::new(spec.kind, channel)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_regex_class_dec_int() {
        assert_eq!(TransportLayerType::DecInt.value_regex_class(None), "([+-]?[0-9]+)");
        assert_eq!(
            TransportLayerType::DecInt.value_regex_class(Some(4)),
            "([+-]?[0-9]{4})"
        );
    }

    #[test]
    fn test_value_regex_class_string() {
        assert_eq!(TransportLayerType::String.value_regex_class(None), "(.*)");
        assert_eq!(TransportLayerType::String.value_regex_class(Some(3)), "(.{3})");
    }

    #[test]
    fn test_builder_rejects_response_without_command() {
        let builder = InteractionBuilder {
            register_path: "/REG",
            direction: "write",
            command_pattern: String::new(),
            response_pattern: "{{x.0}}".to_string(),
            n_resp_lines: None,
            n_resp_bytes: None,
            cmd_delimiter: Delimiter::Default,
            resp_delimiter: Delimiter::Default,
            transport: TransportLayerType::DecInt,
            is_signed: true,
            fixed_char_width: None,
            n_elements: 1,
            checksum_kinds: Vec::new(),
        };
        assert!(matches!(
            builder.build(),
            Err(LogicError::ResponseWithoutCommand { .. })
        ));
    }

    #[test]
    fn test_builder_void_write_with_command_has_no_framing() {
        let builder = InteractionBuilder {
            register_path: "/trigger",
            direction: "write",
            command_pattern: "FIRE".to_string(),
            response_pattern: String::new(),
            n_resp_lines: Some(3),
            n_resp_bytes: None,
            cmd_delimiter: Delimiter::Default,
            resp_delimiter: Delimiter::Default,
            transport: TransportLayerType::Void,
            is_signed: false,
            fixed_char_width: None,
            n_elements: 0,
            checksum_kinds: Vec::new(),
        };
        let info = builder.build().unwrap();
        assert_eq!(info.framing, Framing::None);
        assert!(info.response_regex.is_none());
    }

    #[test]
    fn test_builder_scalar_read() {
        let builder = InteractionBuilder {
            register_path: "/cwFrequency",
            direction: "read",
            command_pattern: "SOUR:FREQ:CW?".to_string(),
            response_pattern: "{{x.0}}".to_string(),
            n_resp_lines: Some(1),
            n_resp_bytes: None,
            cmd_delimiter: Delimiter::Default,
            resp_delimiter: Delimiter::Default,
            transport: TransportLayerType::DecInt,
            is_signed: true,
            fixed_char_width: None,
            n_elements: 1,
            checksum_kinds: Vec::new(),
        };
        let info = builder.build().unwrap();
        assert!(info.is_enabled());
        let regex = info.response_regex.unwrap();
        let caps = regex.captures("1300000000").unwrap();
        assert_eq!(&caps[1], "1300000000");
    }
}
