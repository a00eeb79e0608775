//! Renders a register's command/response pattern against a set of per-index values,
//! either into a concrete command (literal render) or into a compiled regex that
//! captures those values out of a response (regex render).
//!
//! Patterns use three placeholder families: `{{x.i}}` for the i-th element's value,
//! `{{zero}}` for a literal NUL byte, and the `{{csStart.i}}`/`{{csEnd.i}}`/`{{cs.i}}`
//! triple for checksum regions (handled by [`crate::checksum`]).

use regex::Regex;

use crate::checksum::Checksumer;

/// Renders `pattern` into a concrete command string, substituting `values[i]` for every
/// `{{x.i}}`, a NUL byte for every `{{zero}}`, and computing+splicing each checksum in
/// `checksums` (keyed by index, computed in index order since later checksums may cover
/// earlier ones' rendered output).
pub fn render_command(
    pattern: &str,
    values: &[String],
    checksums: &[(usize, Checksumer)],
) -> Result<String, String> {
    let mut out = substitute_values_and_zero(pattern, values)?;

    // Checksums are computed in ascending index order directly against the
    // byte range they cover in `out`, then the `cs.i` tag is replaced with the result.
    // Because `validate_pattern` already rejected overlapping/nested spans, splicing one
    // checksum's result never perturbs another's still-unprocessed span start, as long as
    // we always re-locate tags by index rather than caching byte offsets across splices.
    let mut sorted: Vec<_> = checksums.to_vec();
    sorted.sort_by_key(|(i, _)| *i);
    for (i, checksumer) in sorted {
        let snippets = crate::checksum::extract_payload_snippets(&out);
        let (_, range) = snippets
            .into_iter()
            .find(|(idx, _)| *idx == i)
            .ok_or_else(|| format!("checksum {i}: csStart/csEnd tag missing after substitution"))?;
        let payload = out[range].to_string();
        let digest = checksumer.compute(&payload)?;

        let start_tag = format!("{{{{csStart.{i}}}}}");
        let end_tag = format!("{{{{csEnd.{i}}}}}");
        let point_tag = format!("{{{{cs.{i}}}}}");
        out = out.replacen(&start_tag, "", 1);
        out = out.replacen(&end_tag, "", 1);
        out = out.replacen(&point_tag, &digest, 1);
    }

    Ok(out)
}

fn is_regex_meta_character(c: char) -> bool {
    matches!(
        c,
        '\\' | '.'
            | '+'
            | '*'
            | '?'
            | '('
            | ')'
            | '|'
            | '['
            | ']'
            | '{'
            | '}'
            | '^'
            | '$'
    )
}

fn substitute_values_and_zero(pattern: &str, values: &[String]) -> Result<String, String> {
    let mut out = pattern.to_string();
    for (i, value) in values.iter().enumerate() {
        let tag = format!("{{{{x.{i}}}}}");
        out = out.replace(&tag, value);
    }
    out = out.replace("{{zero}}", "\u{0}");
    Ok(out)
}

/// Renders `pattern` into a regex that captures one value-class group per `{{x.i}}`
/// occurrence and nothing else: `{{csStart.i}}`/`{{csEnd.i}}` are structural markers that
/// consume no wire bytes, and `{{cs.i}}` is matched with a non-capturing group, so a
/// checksummed response regex's capture-group count always equals the register's element
/// count — a checksum's payload/digest are recovered from the matched text afterwards via
/// [`crate::checksum::locate_checksum_regions`], not read off an extra capture group.
/// `value_class` is the regex fragment (already wrapped in a capturing group, e.g.
/// `"([+-]?[0-9]+)"`) used for every `{{x.i}}`; `n_elements` is the register's element
/// count, validated against the indices actually found. Returns the compiled regex
/// alongside the element index each capture group belongs to, in group order.
pub fn render_response_regex(
    pattern: &str,
    value_class: &str,
    n_elements: usize,
    checksum_classes: &[(usize, String)],
) -> Result<(Regex, Vec<usize>), String> {
    let mut escaped = String::with_capacity(pattern.len() * 2);
    let mut tags = Vec::new();
    let bytes = pattern.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if pattern[i..].starts_with("{{x.") {
            let end = pattern[i..]
                .find("}}")
                .map(|p| i + p + 2)
                .ok_or_else(|| "unterminated {{x.i}} tag".to_string())?;
            let idx_str = &pattern[i + 4..end - 2];
            let idx: usize = idx_str
                .parse()
                .map_err(|_| format!("bad index in tag `{}`", &pattern[i..end]))?;
            if idx >= n_elements {
                return Err(format!(
                    "pattern references index {idx} but register has {n_elements} element(s)"
                ));
            }
            escaped.push_str(value_class);
            tags.push(idx);
            i = end;
            continue;
        }
        if pattern[i..].starts_with("{{zero}}") {
            escaped.push_str("\u{0}");
            i += "{{zero}}".len();
            continue;
        }
        let mut matched_checksum = false;
        for (idx, class) in checksum_classes {
            for prefix in ["csStart", "csEnd", "cs"] {
                let tag = format!("{{{{{prefix}.{idx}}}}}");
                if pattern[i..].starts_with(&tag) {
                    if prefix == "cs" {
                        escaped.push_str("(?:");
                        escaped.push_str(class);
                        escaped.push(')');
                    }
                    // csStart/csEnd mark a boundary only; they add nothing to the regex.
                    i += tag.len();
                    matched_checksum = true;
                    break;
                }
            }
            if matched_checksum {
                break;
            }
        }
        if matched_checksum {
            continue;
        }

        let ch = pattern[i..].chars().next().unwrap();
        if is_regex_meta_character(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
        i += ch.len_utf8();
    }

    let full = format!("^{escaped}$");
    let compiled = Regex::new(&full).map_err(|e| format!("bad response regex: {e}"))?;
    let found = compiled.captures_len() - 1; // subtract whole-match group
    if found != tags.len() {
        return Err(format!(
            "compiled regex has {found} capture group(s), expected {}",
            tags.len()
        ));
    }
    Ok((compiled, tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{ChannelKind, ChecksumKind};

    #[test]
    fn test_render_command_simple_values() {
        let out = render_command("SOUR:FREQ:CW {{x.0}}", &["1300000000".into()], &[]).unwrap();
        assert_eq!(out, "SOUR:FREQ:CW 1300000000");
    }

    #[test]
    fn test_render_command_multi_value_semicolon() {
        let out = render_command(
            "ACC AXIS_1 {{x.0}};ACC AXIS_2 {{x.1}}",
            &["1.5".into(), "2.5".into()],
            &[],
        )
        .unwrap();
        assert_eq!(out, "ACC AXIS_1 1.5;ACC AXIS_2 2.5");
    }

    #[test]
    fn test_render_command_with_checksum() {
        let pattern = "{{csStart.0}}DATA {{x.0}}{{csEnd.0}} *{{cs.0}}\r\n";
        let out = render_command(
            pattern,
            &["42".into()],
            &[(0, Checksumer::new(ChecksumKind::Cs8, ChannelKind::Textual))],
        )
        .unwrap();
        let expected_cs = ChecksumKind::Cs8.digest(b"DATA 42");
        assert_eq!(out, format!("DATA 42 *{expected_cs}\r\n"));
    }

    #[test]
    fn test_render_response_regex_scalar() {
        let (re, tags) = render_response_regex("{{x.0}}", "([+-]?[0-9]+)", 1, &[]).unwrap();
        let caps = re.captures("1300000000").unwrap();
        assert_eq!(&caps[1], "1300000000");
        assert_eq!(tags, vec![0]);
    }

    #[test]
    fn test_render_response_regex_two_lines() {
        let (re, tags) = render_response_regex("{{x.0}}\r\n{{x.1}}", "(.*)", 2, &[]).unwrap();
        let caps = re.captures("AXIS_1\r\nAXIS_2").unwrap();
        assert_eq!(&caps[1], "AXIS_1");
        assert_eq!(&caps[2], "AXIS_2");
        assert_eq!(tags, vec![0, 1]);
    }

    #[test]
    fn test_render_response_regex_rejects_out_of_range_index() {
        assert!(render_response_regex("{{x.5}}", "(.*)", 1, &[]).is_err());
    }

    #[test]
    fn test_render_response_regex_checksum_adds_no_capture_group() {
        let pattern = "{{csStart.0}}{{x.0}}{{csEnd.0}} *{{cs.0}}";
        let classes = vec![(0, ChecksumKind::Cs8.regex_class())];
        let (re, tags) = render_response_regex(pattern, "([0-9]+)", 1, &classes).unwrap();
        assert_eq!(tags, vec![0]);
        assert_eq!(re.captures_len() - 1, 1);
        let caps = re.captures("7 *37").unwrap();
        assert_eq!(&caps[1], "7");
    }
}
