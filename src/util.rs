//! String and number primitives shared by the template renderer, checksum engine and
//! register accessor.
//!
//! Every function here is total and allocation-safe: none of them touch a transport or
//! the catalogue, so they can't raise [`crate::error::RuntimeError`] and only fail (where
//! they fail at all) with a plain `String` describing a malformed *argument*, which
//! callers turn into a [`crate::error::LogicError`] with the register/direction context
//! attached.

/// Splits `s` on `delim`, keeping empty leading/trailing segments.
///
/// ```
/// # use cmdbus::util::split_string;
/// assert_eq!(split_string("a,,b,", ","), vec!["a", "", "b", ""]);
/// assert_eq!(split_string("", ","), vec![""]);
/// ```
pub fn split_string<'a>(s: &'a str, delim: &str) -> Vec<&'a str> {
    if delim.is_empty() {
        return vec![s];
    }
    s.split(delim).collect()
}

/// Splits `s` on runs of ASCII whitespace. An empty or all-whitespace input yields an
/// empty list (unlike [`split_string`], which always yields at least one segment).
pub fn tokenise(s: &str) -> Vec<&str> {
    s.split_whitespace().collect()
}

pub fn to_lower_case(s: &str) -> String {
    s.to_ascii_lowercase()
}

pub fn case_insensitive_equals(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Replaces `\n` with the two characters `\N` and `\r` with `\R`, for putting raw wire
/// payloads into error messages and logs without control characters mangling the
/// terminal.
pub fn replace_control_chars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\N"),
            '\r' => out.push_str("\\R"),
            other => out.push(other),
        }
    }
    out
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Upper-case hex encoding; output length is always exactly `2 * bytes.len()`.
pub fn hex_from_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX_DIGITS[(b >> 4) as usize] as char);
        out.push(HEX_DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decodes a hex string into bytes. Case-insensitive. An odd-length input is treated as
/// having an implicit leading `0` nibble (i.e. `"fff"` decodes like `"0fff"`), matching
/// the wire convention the checksum engine and binary accessors both rely on.
pub fn bytes_from_hex(hex: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = hex
        .bytes()
        .map(|b| match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            other => Err(format!("non-hex character `{}` in `{hex}`", other as char)),
        })
        .collect::<Result<_, _>>()?;

    let mut nibbles = digits.as_slice();
    let mut out = Vec::with_capacity((nibbles.len() + 1) / 2);
    if nibbles.len() % 2 == 1 {
        out.push(nibbles[0]);
        nibbles = &nibbles[1..];
    }
    for pair in nibbles.chunks_exact(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    Ok(out)
}

/// Overflow handling for [`binary_str_from_int`] when a fixed width is requested but the
/// value's natural width doesn't fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Fail rather than lose bits.
    NullOpt,
    /// Ignore the requested width and use the value's natural width.
    Expand,
    /// Keep the requested width and drop the high-order bytes.
    Truncate,
}

/// Minimum number of bytes needed to represent `v` in two's complement while preserving
/// its sign, i.e. the width a `binary_str_from_int(v, None, _)` call would produce.
pub fn natural_width_int(v: i128) -> usize {
    if v == 0 {
        return 1;
    }
    let mut width = 0usize;
    let mut probe = v;
    loop {
        width += 1;
        // Fits iff sign-extending from `width` bytes reproduces `probe`.
        let bits = (width * 8) as u32;
        if bits >= 128 {
            break;
        }
        let shifted = probe >> (bits - 1);
        if shifted == 0 || shifted == -1 {
            break;
        }
    }
    width
}

/// Big-endian, sign-padded binary representation of `v`.
///
/// - No `fixed_width`: the result is exactly [`natural_width_int`] bytes.
/// - With `fixed_width` and `natural <= fixed`: sign-padded (0x00 or 0xFF lead bytes) up
///   to `fixed_width`.
/// - With `fixed_width` and `natural > fixed`: governed by `overflow`.
pub fn binary_str_from_int(
    v: i128,
    fixed_width: Option<usize>,
    overflow: OverflowPolicy,
) -> Result<Vec<u8>, String> {
    let natural = natural_width_int(v);
    let width = match fixed_width {
        None => natural,
        Some(fixed) if natural <= fixed => fixed,
        Some(fixed) => match overflow {
            OverflowPolicy::NullOpt => {
                return Err(format!(
                    "value {v} needs {natural} byte(s), does not fit in {fixed}"
                ))
            }
            OverflowPolicy::Expand => natural,
            OverflowPolicy::Truncate => fixed,
        },
    };

    let full = v.to_be_bytes(); // 16 bytes, sign-extended
    let taken = &full[full.len() - width.min(full.len())..];
    // Truncate (drop high bytes) if width > 16 is impossible here, but width may exceed
    // `taken.len()` only if width < 16 was requested with Truncate and natural > 16,
    // which can't happen since i128's max width is 16. So `taken` already has `width`
    // bytes once width <= 16; guard the pathological case defensively.
    let mut out = vec![if v < 0 { 0xFFu8 } else { 0x00u8 }; width.saturating_sub(taken.len())];
    out.extend_from_slice(taken);
    Ok(out)
}

/// Inverse of [`binary_str_from_int`]. The top bit of the first byte is the sign when
/// `signed` is true. If `bytes` is shorter than `T`'s width the value is sign-extended;
/// if longer, values that don't fit are an error unless `truncate_on_overflow` is set, in
/// which case the low-order bytes are kept.
pub fn int_from_binary_str(
    bytes: &[u8],
    signed: bool,
    truncate_on_overflow: bool,
) -> Result<i128, String> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let negative = signed && (bytes[0] & 0x80) != 0;
    let mut source = bytes;
    if source.len() > 16 {
        if !truncate_on_overflow {
            return Err(format!(
                "{} byte(s) do not fit in a 128-bit integer",
                source.len()
            ));
        }
        source = &source[source.len() - 16..];
    }
    let mut buf = [if negative { 0xFFu8 } else { 0x00u8 }; 16];
    buf[16 - source.len()..].copy_from_slice(source);
    Ok(i128::from_be_bytes(buf))
}

/// IEEE-754 big-endian encoding, 4 bytes for `f32` width or 8 for `f64` width.
pub fn binary_str_from_float(v: f64, width: usize) -> Result<Vec<u8>, String> {
    match width {
        4 => Ok((v as f32).to_be_bytes().to_vec()),
        8 => Ok(v.to_be_bytes().to_vec()),
        other => Err(format!("unsupported float width {other}, expected 4 or 8")),
    }
}

/// Inverse of [`binary_str_from_float`]. Accepts inputs shorter than the target width by
/// right-padding the mantissa tail with zero bits, so a device that only reports the
/// leading bytes of a float still decodes to a sensible (truncated-precision) value.
pub fn float_from_binary_str(bytes: &[u8], width: usize) -> Result<f64, String> {
    let mut buf = vec![0u8; width];
    let n = bytes.len().min(width);
    buf[..n].copy_from_slice(&bytes[..n]);
    match width {
        4 => {
            let arr: [u8; 4] = buf.try_into().unwrap();
            Ok(f32::from_be_bytes(arr) as f64)
        }
        8 => {
            let arr: [u8; 8] = buf.try_into().unwrap();
            Ok(f64::from_be_bytes(arr))
        }
        other => Err(format!("unsupported float width {other}, expected 4 or 8")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let tests: &[(&[u8], &str)] = &[
            (&[], ""),
            (&[0x00], "00"),
            (&[0xAB, 0xCD], "ABCD"),
            (&[0x01, 0x02, 0x03], "010203"),
        ];
        for (bytes, hex) in tests {
            assert_eq!(hex_from_bytes(bytes), *hex);
            assert_eq!(bytes_from_hex(hex).unwrap(), *bytes);
        }
    }

    #[test]
    fn test_odd_length_hex_has_implicit_leading_zero_nibble() {
        assert_eq!(bytes_from_hex("f").unwrap(), vec![0x0f]);
        assert_eq!(bytes_from_hex("fff").unwrap(), vec![0x0f, 0xff]);
        assert_eq!(bytes_from_hex("123").unwrap(), vec![0x01, 0x23]);
    }

    #[test]
    fn test_bytes_from_hex_rejects_non_hex() {
        assert!(bytes_from_hex("zz").is_err());
    }

    #[test]
    fn test_split_string_preserves_empty_segments() {
        assert_eq!(split_string("a,,b,", ","), vec!["a", "", "b", ""]);
        assert_eq!(split_string("", ","), vec![""]);
        assert_eq!(split_string("abc", ""), vec!["abc"]);
    }

    #[test]
    fn test_tokenise() {
        assert_eq!(tokenise("  a  b\tc\n"), vec!["a", "b", "c"]);
        assert_eq!(tokenise(""), Vec::<&str>::new());
    }

    #[test]
    fn test_replace_control_chars() {
        assert_eq!(replace_control_chars("a\r\nb"), "a\\R\\Nb");
    }

    #[test]
    fn test_int_roundtrip_natural_width() {
        for v in [0i128, 1, -1, 127, -128, 128, -129, 1_300_000_000, i64::MIN as i128] {
            let bytes = binary_str_from_int(v, None, OverflowPolicy::NullOpt).unwrap();
            assert_eq!(bytes.len(), natural_width_int(v));
            let back = int_from_binary_str(&bytes, true, false).unwrap();
            assert_eq!(back, v, "roundtrip failed for {v}");
        }
    }

    #[test]
    fn test_fixed_width_sign_pad() {
        let bytes = binary_str_from_int(42, Some(4), OverflowPolicy::NullOpt).unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x2a]);
        let bytes = binary_str_from_int(-1, Some(4), OverflowPolicy::NullOpt).unwrap();
        assert_eq!(bytes, vec![0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_overflow_policies() {
        // 300 needs 2 bytes, doesn't fit in a fixed width of 1.
        assert!(binary_str_from_int(300, Some(1), OverflowPolicy::NullOpt).is_err());
        assert_eq!(
            binary_str_from_int(300, Some(1), OverflowPolicy::Expand).unwrap(),
            vec![0x01, 0x2c]
        );
        assert_eq!(
            binary_str_from_int(300, Some(1), OverflowPolicy::Truncate).unwrap(),
            vec![0x2c]
        );
    }

    #[test]
    fn test_float_roundtrip_4_bytes() {
        let bytes = binary_str_from_float(2.5, 4).unwrap();
        assert_eq!(bytes, vec![0x40, 0x20, 0x00, 0x00]);
        assert_eq!(float_from_binary_str(&bytes, 4).unwrap(), 2.5);
    }

    #[test]
    fn test_float_from_binary_str_right_pads_short_input() {
        // Only the leading two bytes of the 4-byte encoding of 2.5 are available.
        let got = float_from_binary_str(&[0x40, 0x20], 4).unwrap();
        assert_eq!(got, 2.5);
    }
}
