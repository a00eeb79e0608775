//! The four checksum algorithms registers can ask for, plus the tag-topology
//! validation that the catalogue loader runs over `{{csStart.i}}`/`{{cs.i}}`/`{{csEnd.i}}`
//! triples before a pattern is accepted.

use std::collections::HashMap;

use crc_any::CRCu16;
use sha2::{Digest, Sha256};

use crate::util::hex_from_bytes;

/// One of the four supported checksum algorithms. Each has a fixed hex output width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumKind {
    Cs8,
    Cs32,
    CrcCcitt16,
    Sha256,
}

impl ChecksumKind {
    /// Width of the algorithm's hex output, in characters.
    pub fn hex_width(self) -> usize {
        match self {
            ChecksumKind::Cs8 => 2,
            ChecksumKind::Cs32 => 8,
            ChecksumKind::CrcCcitt16 => 4,
            ChecksumKind::Sha256 => 64,
        }
    }

    /// The non-capturing regex class matching this checksum's hex output, used to build
    /// response regexes alongside value classes.
    pub fn regex_class(self) -> String {
        format!("[0-9A-Fa-f]{{{}}}", self.hex_width())
    }

    /// Runs the algorithm over `payload`, returning upper-case hex of exactly
    /// [`hex_width`](Self::hex_width) characters.
    pub fn digest(self, payload: &[u8]) -> String {
        match self {
            ChecksumKind::Cs8 => {
                let sum: u8 = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
                hex_from_bytes(&[sum])
            }
            ChecksumKind::Cs32 => {
                let sum: u32 = payload.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
                hex_from_bytes(&sum.to_be_bytes())
            }
            ChecksumKind::CrcCcitt16 => {
                let mut crc = CRCu16::crc16ccitt_false();
                crc.digest(payload);
                hex_from_bytes(&crc.get_crc().to_be_bytes())
            }
            ChecksumKind::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(payload);
                hex_from_bytes(&hasher.finalize())
            }
        }
    }
}

/// Whether the command/response channel this checksum lives in is binary (hex-on-wire
/// translated to/from raw bytes) or textual. Determines the input/output adapters
/// composed around the raw digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Binary,
    Textual,
}

/// A checksum bound to a channel kind, ready to consume a payload *as it appears in the
/// pattern* (hex string for binary interactions, raw text otherwise), run it through the
/// channel's input adapter, digest it, then run the output adapter and produce the
/// string to splice back into the pattern.
#[derive(Debug, Clone, Copy)]
pub struct Checksumer {
    pub kind: ChecksumKind,
    pub channel: ChannelKind,
}

impl Checksumer {
    pub fn new(kind: ChecksumKind, channel: ChannelKind) -> Self {
        Checksumer { kind, channel }
    }

    /// Computes the checksum of `payload` (as it appears textually in the rendered
    /// pattern) and returns the upper-case hex digest to insert at the `cs.i` tag. The
    /// channel only affects how `payload` itself is read: binary payloads are hex on the
    /// wire and must be decoded to raw bytes before digesting; textual payloads are
    /// digested as-is.
    pub fn compute(&self, payload: &str) -> Result<String, String> {
        let bytes = match self.channel {
            ChannelKind::Binary => crate::util::bytes_from_hex(payload)?,
            ChannelKind::Textual => payload.as_bytes().to_vec(),
        };
        Ok(self.kind.digest(&bytes))
    }
}

/// One checksum's position inside a pattern, in byte offsets of the raw (tag-containing)
/// pattern text: the point where `cs.i` will be substituted, and the `[start, end)` span
/// of the data it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumTagPositions {
    pub cs_point: usize,
    pub cs_start: usize,
    pub cs_end: usize,
}

/// Locates every `{{csStart.i}}` / `{{csEnd.i}}` / `{{cs.i}}` tag triple in `pattern` and
/// validates its topology:
///
/// 1. indices form `{0..k-1}` with no gaps;
/// 2. every used index has all three tags;
/// 3. `csEnd.i` comes strictly after `csStart.i`;
/// 4. `cs.i` is not inside `[csStart.i, csEnd.i]`;
/// 5. no two checksums' spans nest or overlap.
///
/// Returns the validated positions indexed by `i`, sorted by index.
pub fn validate_pattern(pattern: &str) -> Result<Vec<ChecksumTagPositions>, String> {
    let indices = discover_indices(pattern);
    if indices.is_empty() {
        return Ok(Vec::new());
    }

    let max_index = *indices.iter().max().unwrap();
    if indices.len() != max_index + 1 {
        return Err(format!(
            "checksum indices must form a gap-free range 0..{}, found {:?}",
            indices.len(),
            {
                let mut v: Vec<_> = indices.iter().copied().collect();
                v.sort_unstable();
                v
            }
        ));
    }

    let mut positions = Vec::with_capacity(indices.len());
    for i in 0..=max_index {
        let starts = find_tag_positions(pattern, &format!("{{{{csStart.{i}}}}}"));
        let ends = find_tag_positions(pattern, &format!("{{{{csEnd.{i}}}}}"));
        let points = find_tag_positions(pattern, &format!("{{{{cs.{i}}}}}"));

        if starts.is_empty() || ends.is_empty() || points.is_empty() {
            return Err(format!(
                "checksum {i} is missing one of csStart/csEnd/cs tags"
            ));
        }

        // csStart uses the last occurrence, csEnd/cs use the first: a payload region is
        // "as late as possible to start, as early as possible to end" so authors can
        // write descriptive prefixes before the actual covered bytes.
        let cs_start = *starts.iter().max().unwrap();
        let cs_end = *ends.iter().min().unwrap();
        let cs_point = *points.iter().min().unwrap();

        if cs_end <= cs_start {
            return Err(format!(
                "checksum {i}: csEnd must occur strictly after csStart"
            ));
        }
        if cs_point >= cs_start && cs_point <= cs_end {
            return Err(format!(
                "checksum {i}: cs tag must not lie inside its own [csStart, csEnd] span"
            ));
        }

        positions.push(ChecksumTagPositions {
            cs_point,
            cs_start,
            cs_end,
        });
    }

    for i in 0..positions.len() {
        for j in 0..positions.len() {
            if i == j {
                continue;
            }
            let (a, b) = (positions[i], positions[j]);
            let in_a = |pos: usize| pos >= a.cs_start && pos <= a.cs_end;
            if in_a(b.cs_point) || in_a(b.cs_start) || in_a(b.cs_end) {
                return Err(format!(
                    "checksum {j}'s tags overlap or nest inside checksum {i}'s span"
                ));
            }
        }
    }

    Ok(positions)
}

fn discover_indices(pattern: &str) -> std::collections::BTreeSet<usize> {
    let re = regex::Regex::new(r"\{\{cs(?:Start|End)?\.(\d+)\}\}").unwrap();
    re.captures_iter(pattern)
        .map(|c| c[1].parse::<usize>().unwrap())
        .collect()
}

fn find_tag_positions(pattern: &str, tag: &str) -> Vec<usize> {
    pattern.match_indices(tag).map(|(pos, _)| pos).collect()
}

/// The number of distinct checksum indices declared in `pattern`.
pub fn count_checksums(pattern: &str) -> usize {
    discover_indices(pattern).len()
}

/// For every checksum index whose `csStart.i`/`csEnd.i` tags are both still present in
/// `text`, the payload byte range `[csStart.i+1, csEnd.i)` it covers — the `+1` meaning
/// "right after the csStart tag's own text", not the tag's first byte. Unlike
/// [`validate_pattern`], indices need not be gap-free or have a matching `cs.i` tag: this
/// is a lighter introspection used by [`crate::template::render_command`] to locate a
/// checksum's payload directly in its own partially-rendered output, where earlier
/// checksums' tags have already been spliced away and so no longer appear here at all.
/// Sorted by index.
pub fn extract_payload_snippets(text: &str) -> Vec<(usize, std::ops::Range<usize>)> {
    let mut result: Vec<(usize, std::ops::Range<usize>)> = discover_indices(text)
        .into_iter()
        .filter_map(|idx| {
            let start_tag = format!("{{{{csStart.{idx}}}}}");
            let end_tag = format!("{{{{csEnd.{idx}}}}}");
            let start = text.rfind(&start_tag)?;
            let payload_start = start + start_tag.len();
            let end = text[payload_start..].find(&end_tag).map(|p| p + payload_start)?;
            Some((idx, payload_start..end))
        })
        .collect();
    result.sort_by_key(|(idx, _)| *idx);
    result
}

/// One checksum's payload and digest byte ranges within a response that has already been
/// matched against a compiled response regex whose checksum tags are non-capturing (so
/// their position can't be read off a capture group directly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRegion {
    pub index: usize,
    pub payload: std::ops::Range<usize>,
    pub digest: std::ops::Range<usize>,
}

/// Recovers every checksum's payload/digest ranges in a matched response by replaying
/// `pattern` left to right: `{{x.i}}` occurrences (in textual order) consume
/// `value_lengths[occurrence]` real bytes, `{{zero}}` consumes one byte, and `{{cs.i}}`
/// consumes `digest_widths[i]` real bytes (a checksum digest is always fixed-width hex,
/// so this is known without a capture group); `{{csStart.i}}`/`{{csEnd.i}}` consume no
/// bytes and just mark the offset they occur at. Checksum spans never nest (enforced by
/// [`validate_pattern`]), so no `{{cs.j}}`/`{{csStart.j}}`/`{{csEnd.j}}` tag ever appears
/// between another index's `csStart`/`csEnd` pair.
pub fn locate_checksum_regions(
    pattern: &str,
    value_lengths: &[usize],
    digest_widths: &[(usize, usize)],
) -> Result<Vec<ChecksumRegion>, String> {
    let tag_re = regex::Regex::new(r"^\{\{(csStart|csEnd|cs)\.(\d+)\}\}").unwrap();
    let mut pos = 0usize;
    let mut value_i = 0usize;
    let mut payload_start: HashMap<usize, usize> = HashMap::new();
    let mut regions: HashMap<usize, ChecksumRegion> = HashMap::new();
    let mut i = 0usize;
    while i < pattern.len() {
        if pattern[i..].starts_with("{{x.") {
            let end = pattern[i..]
                .find("}}")
                .map(|p| i + p + 2)
                .ok_or("unterminated {{x.i}} tag")?;
            let len = *value_lengths
                .get(value_i)
                .ok_or("not enough captured values to replay pattern")?;
            pos += len;
            value_i += 1;
            i = end;
            continue;
        }
        if pattern[i..].starts_with("{{zero}}") {
            pos += 1;
            i += "{{zero}}".len();
            continue;
        }
        if let Some(caps) = tag_re.captures(&pattern[i..]) {
            let whole = caps.get(0).unwrap().as_str();
            let idx: usize = caps[2].parse().unwrap();
            match &caps[1] {
                "csStart" => {
                    payload_start.insert(idx, pos);
                }
                "csEnd" => {
                    let start = *payload_start
                        .get(&idx)
                        .ok_or_else(|| format!("checksum {idx}: csEnd before csStart"))?;
                    regions
                        .entry(idx)
                        .or_insert(ChecksumRegion { index: idx, payload: 0..0, digest: 0..0 })
                        .payload = start..pos;
                }
                _ => {
                    let width = digest_widths
                        .iter()
                        .find(|(i2, _)| *i2 == idx)
                        .map(|(_, w)| *w)
                        .ok_or_else(|| format!("checksum {idx}: unknown digest width"))?;
                    let digest = pos..pos + width;
                    pos += width;
                    regions
                        .entry(idx)
                        .or_insert(ChecksumRegion { index: idx, payload: 0..0, digest: 0..0 })
                        .digest = digest;
                }
            }
            i += whole.len();
            continue;
        }
        let ch = pattern[i..].chars().next().unwrap();
        pos += ch.len_utf8();
        i += ch.len_utf8();
    }

    let mut result: Vec<_> = regions.into_values().collect();
    result.sort_by_key(|r| r.index);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cs8_known_vector() {
        // "DATA 42" -> sum of ASCII bytes mod 256.
        let sum: u32 = "DATA 42".bytes().map(|b| b as u32).sum();
        let expected = hex_from_bytes(&[(sum % 256) as u8]);
        assert_eq!(ChecksumKind::Cs8.digest(b"DATA 42"), expected);
    }

    #[test]
    fn test_cs32_width() {
        assert_eq!(ChecksumKind::Cs32.digest(b"x").len(), 8);
    }

    #[test]
    fn test_crc_ccitt_16_empty_input_is_init_value() {
        // CRC-16/CCITT-FALSE of an empty buffer is the unmodified init value 0xFFFF.
        assert_eq!(ChecksumKind::CrcCcitt16.digest(b""), "FFFF");
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            ChecksumKind::Sha256.digest(b"abc"),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn test_validate_pattern_simple() {
        let pattern = "{{csStart.0}}DATA {{x.0}}{{csEnd.0}} *{{cs.0}}\r\n";
        let positions = validate_pattern(pattern).unwrap();
        assert_eq!(positions.len(), 1);
        assert!(positions[0].cs_point > positions[0].cs_end);
    }

    #[test]
    fn test_validate_pattern_rejects_gap() {
        let pattern = "{{csStart.1}}x{{csEnd.1}}{{cs.1}}";
        assert!(validate_pattern(pattern).is_err());
    }

    #[test]
    fn test_validate_pattern_rejects_self_reference() {
        let pattern = "{{csStart.0}}{{cs.0}}{{csEnd.0}}";
        assert!(validate_pattern(pattern).is_err());
    }

    #[test]
    fn test_validate_pattern_rejects_overlap() {
        let pattern =
            "{{csStart.0}}a{{csStart.1}}b{{csEnd.0}}c{{csEnd.1}}{{cs.0}}{{cs.1}}";
        assert!(validate_pattern(pattern).is_err());
    }

    #[test]
    fn test_extract_payload_snippets_single_checksum() {
        let pattern = "{{csStart.0}}DATA {{x.0}}{{csEnd.0}} *{{cs.0}}\r\n";
        let snippets = extract_payload_snippets(pattern);
        assert_eq!(snippets.len(), 1);
        let (idx, range) = &snippets[0];
        assert_eq!(*idx, 0);
        assert_eq!(&pattern[range.clone()], "DATA {{x.0}}");
    }

    #[test]
    fn test_extract_payload_snippets_counts_k_declared_checksums() {
        let pattern = "{{csStart.0}}a{{csEnd.0}}{{cs.0}}{{csStart.1}}b{{csEnd.1}}{{cs.1}}";
        assert_eq!(extract_payload_snippets(pattern).len(), 2);
    }

    #[test]
    fn test_extract_payload_snippets_ignores_unpaired_tags() {
        // Only csStart.0 remains once csEnd.0/cs.0 have already been spliced away by an
        // earlier render_command pass.
        let text = "{{csStart.0}}DATA 42";
        assert!(extract_payload_snippets(text).is_empty());
    }

    #[test]
    fn test_locate_checksum_regions_recovers_matched_spans() {
        let pattern = "{{csStart.0}}{{x.0}}{{csEnd.0}} *{{cs.0}}";
        // Matched text: "7 *37" - value "7" (1 byte), then " *", then digest "37" (2 bytes).
        let regions = locate_checksum_regions(pattern, &[1], &[(0, 2)]).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].payload, 0..1);
        assert_eq!(regions[0].digest, 3..5);
    }

    #[test]
    fn test_locate_checksum_regions_variable_width_value() {
        let pattern = "{{csStart.0}}{{x.0}}{{csEnd.0}}{{cs.0}}";
        // A longer captured value shifts the digest's start accordingly.
        let regions = locate_checksum_regions(pattern, &[12], &[(0, 8)]).unwrap();
        assert_eq!(regions[0].payload, 0..12);
        assert_eq!(regions[0].digest, 12..20);
    }
}
