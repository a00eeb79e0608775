//! Converts between a register's user-facing values and the wire dialogue that reads or
//! writes them: renders the command, runs it through the [`CommandHandler`], matches the
//! response against the interaction's pre-compiled regex, and decodes each capture back
//! into a [`Value`] (or, for writes, encodes `Value`s into the command's `{{x.i}}` slots).
//!
//! Windowed access (`[offset, offset+count)` onto a register's element count) is
//! supported for reads: the full dialogue always runs, since the wire command addresses
//! the whole register, but only the requested slice is returned. Writes require the full
//! element range, since a command pattern has no way to say "leave element 3 alone".

use crate::catalogue::RegisterPath;
use crate::checksum::Checksumer;
use crate::command_handler::CommandHandler;
use crate::error::{Error, LogicError, RuntimeError};
use crate::interaction::{checksumers_for, Framing, InteractionInfo};
use crate::register::{DataKind, RegisterInfo};
use crate::template::render_command;
use crate::util::{
    bytes_from_hex, float_from_binary_str, hex_from_bytes, int_from_binary_str, natural_width_int,
    OverflowPolicy,
};

/// One register element's decoded value, independent of its wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_i64(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(conversion_error(other, "integer")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(conversion_error(other, "float")),
        }
    }

    pub fn as_str(&self) -> Result<&str, RuntimeError> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(conversion_error(other, "string")),
        }
    }
}

fn conversion_error(value: &Value, wanted: &str) -> RuntimeError {
    RuntimeError::ConversionFailed {
        captured: format!("{value:?}"),
        message: format!("value is not a {wanted}"),
    }
}

fn default_int_width(info: &RegisterInfo) -> usize {
    info.data_descriptor.bit_width.map(|bits| bits.div_ceil(8)).unwrap_or(4)
}

fn default_float_width(info: &RegisterInfo) -> usize {
    info.data_descriptor.bit_width.map(|bits| bits.div_ceil(8)).unwrap_or(4)
}

/// Reads `count` elements starting at `offset` from `info`, running the full read
/// dialogue and slicing the result.
pub fn read(
    info: &RegisterInfo,
    offset: usize,
    count: usize,
    handler: &mut CommandHandler,
) -> Result<Vec<Value>, Error> {
    check_window(info, offset, count)?;
    if !info.is_readable() {
        return Err(LogicError::DirectionNotEnabled {
            path: info.path.clone(),
            direction: "read",
        }
        .into());
    }

    let all = run_read_dialogue(info, handler)?;
    Ok(all[offset..offset + count].to_vec())
}

/// Writes `values` (covering the register's entire element range) via `info`'s write
/// interaction.
pub fn write(info: &RegisterInfo, values: &[Value], handler: &mut CommandHandler) -> Result<(), Error> {
    if !info.is_writable() {
        return Err(LogicError::DirectionNotEnabled {
            path: info.path.clone(),
            direction: "write",
        }
        .into());
    }
    if values.len() != info.n_elements {
        return Err(LogicError::WindowOutOfBounds {
            path: info.path.clone(),
            offset: 0,
            count: values.len(),
            n_elements: info.n_elements,
        }
        .into());
    }

    let write_info = &info.write_info;
    let encoded: Vec<String> = values
        .iter()
        .map(|v| encode_value(v, info))
        .collect::<Result<_, LogicError>>()?;
    let checksumers = checksumers_for(&write_info.command_checksums, write_info.channel_kind());
    let rendered = render_command(&write_info.command_pattern, &encoded, &checksumers).map_err(|message| {
        LogicError::BadPattern {
            path: info.path.clone(),
            direction: "write",
            message,
        }
    })?;

    match write_info.framing {
        Framing::None => {
            let command = if write_info.is_binary() {
                return Err(RuntimeError::ConversionFailed {
                    captured: rendered,
                    message: "binary writes always expect a response frame".to_string(),
                }
                .into());
            } else {
                rendered
            };
            handler
                .send_command(&command, &write_info.cmd_delimiter)
                .map_err(Error::from)
        }
        // A non-trivial write response (`Framing::ReadLines`/`ReadBytes` only arise when
        // `response_pattern` is non-empty, see `InteractionBuilder::build`) is parsed
        // the same way a read response is: matched against `response_regex` and, if it
        // carries a checksum, verified.
        Framing::ReadLines(n) => {
            let lines = handler.send_command_and_read_lines(
                &rendered,
                &write_info.cmd_delimiter,
                n,
                &write_info.resp_delimiter,
            )?;
            let delim = write_info.resp_delimiter.resolve(crate::interaction::DEFAULT_DELIMITER);
            let captured_text = join_stripped_lines(&lines, delim);
            decode_response(info, write_info, &captured_text).map(|_| ())
        }
        Framing::ReadBytes(n) => {
            let bytes = bytes_from_hex(&rendered).map_err(|message| LogicError::BadPattern {
                path: info.path.clone(),
                direction: "write",
                message,
            })?;
            let response = handler.send_command_and_read_bytes(&bytes, &write_info.cmd_delimiter, n)?;
            let captured_text = hex_from_bytes(&response);
            decode_response(info, write_info, &captured_text).map(|_| ())
        }
    }
}

/// Re-issues the register's read dialogue and discards the result, used as the backend's
/// post-open functional probe.
pub fn probe(info: &RegisterInfo, handler: &mut CommandHandler) -> Result<(), Error> {
    run_read_dialogue(info, handler).map(|_| ())
}

fn check_window(info: &RegisterInfo, offset: usize, count: usize) -> Result<(), LogicError> {
    if offset.checked_add(count).map(|end| end > info.n_elements).unwrap_or(true) {
        return Err(LogicError::WindowOutOfBounds {
            path: info.path.clone(),
            offset,
            count,
            n_elements: info.n_elements,
        });
    }
    Ok(())
}

fn run_read_dialogue(info: &RegisterInfo, handler: &mut CommandHandler) -> Result<Vec<Value>, Error> {
    let read_info = &info.read_info;
    let rendered = render_command(&read_info.command_pattern, &[], &[]).map_err(|message| {
        LogicError::BadPattern {
            path: info.path.clone(),
            direction: "read",
            message,
        }
    })?;

    let captured_text = match read_info.framing {
        Framing::None => {
            handler.send_command(&rendered, &read_info.cmd_delimiter)?;
            return Ok(Vec::new());
        }
        Framing::ReadLines(n) => {
            let lines = handler.send_command_and_read_lines(
                &rendered,
                &read_info.cmd_delimiter,
                n,
                &read_info.resp_delimiter,
            )?;
            let delim = read_info.resp_delimiter.resolve(crate::interaction::DEFAULT_DELIMITER);
            join_stripped_lines(&lines, delim)
        }
        Framing::ReadBytes(n) => {
            let bytes = handler.send_command_and_read_bytes(rendered.as_bytes(), &read_info.cmd_delimiter, n)?;
            hex_from_bytes(&bytes)
        }
    };

    decode_response(info, read_info, &captured_text)
}

/// Joins delimiter-terminated `lines` back into one string, stripping each line's
/// trailing delimiter first (a response pattern's literal text has no way to spell
/// "and a delimiter" at its very end, so the delimiter itself must not survive into the
/// text matched against `response_regex`).
fn join_stripped_lines(lines: &[String], delim: &str) -> String {
    lines
        .iter()
        .map(|line| line.strip_suffix(delim).unwrap_or(line))
        .collect::<Vec<_>>()
        .join(delim)
}

fn decode_response(
    info: &RegisterInfo,
    interaction: &InteractionInfo,
    captured_text: &str,
) -> Result<Vec<Value>, Error> {
    let regex = interaction.response_regex.as_ref().ok_or_else(|| RuntimeError::ConversionFailed {
        captured: captured_text.to_string(),
        message: "register has no response pattern to match against".to_string(),
    })?;

    let captures = regex.captures(captured_text).ok_or_else(|| RuntimeError::ResponseMismatch {
        path: info.path.clone(),
        payload: crate::util::replace_control_chars(captured_text),
    })?;

    let mut values: Vec<Option<Value>> = vec![None; info.n_elements];
    let mut value_lengths = Vec::with_capacity(interaction.captured_tags.len());
    for (group_index, idx) in interaction.captured_tags.iter().enumerate() {
        let captured = &captures[group_index + 1];
        value_lengths.push(captured.len());
        values[*idx] = Some(decode_value(captured, info, interaction)?);
    }

    if !interaction.response_checksums.is_empty() {
        verify_response_checksums(info, interaction, captured_text, &value_lengths)?;
    }

    values
        .into_iter()
        .enumerate()
        .map(|(idx, v)| {
            v.ok_or_else(|| {
                RuntimeError::ConversionFailed {
                    captured: captured_text.to_string(),
                    message: format!("response pattern never captured element {idx}"),
                }
                .into()
            })
        })
        .collect()
}

/// Locates every checksum's payload/digest span in `captured_text` (whose checksum tags
/// are non-capturing in `response_regex`, so their position has to be recovered by
/// replaying `response_pattern` against the real per-group lengths already captured) and
/// verifies each digest.
fn verify_response_checksums(
    info: &RegisterInfo,
    interaction: &InteractionInfo,
    captured_text: &str,
    value_lengths: &[usize],
) -> Result<(), Error> {
    let digest_widths: Vec<(usize, usize)> = interaction
        .response_checksums
        .iter()
        .map(|c| (c.index, c.kind.hex_width()))
        .collect();
    let regions = crate::checksum::locate_checksum_regions(
        &interaction.response_pattern,
        value_lengths,
        &digest_widths,
    )
    .map_err(|message| RuntimeError::ConversionFailed {
        captured: captured_text.to_string(),
        message,
    })?;

    let checksumers = checksumers_for(&interaction.response_checksums, interaction.channel_kind());
    for region in regions {
        let payload = &captured_text[region.payload];
        let digest = &captured_text[region.digest];
        verify_checksum(region.index, digest, payload, &checksumers, &info.path)?;
    }
    Ok(())
}

/// Recomputes the checksum of `index` over `payload` and compares it against
/// `captured_digest`.
fn verify_checksum(
    index: usize,
    captured_digest: &str,
    payload: &str,
    checksumers: &[(usize, Checksumer)],
    path: &RegisterPath,
) -> Result<(), Error> {
    let (_, checksumer) = checksumers
        .iter()
        .find(|(i, _)| *i == index)
        .expect("checksum index located in the response pattern must have a checksumer");

    let expected = checksumer.compute(payload).unwrap_or_default();
    if captured_digest.eq_ignore_ascii_case(&expected) {
        return Ok(());
    }
    Err(RuntimeError::ResponseMismatch {
        path: path.clone(),
        payload: crate::util::replace_control_chars(payload),
    }
    .into())
}

fn encode_value(value: &Value, info: &RegisterInfo) -> Result<String, LogicError> {
    use crate::interaction::TransportLayerType as T;
    let write_info = &info.write_info;
    let bad_pattern = |message: String| LogicError::BadPattern {
        path: info.path.clone(),
        direction: "write",
        message,
    };

    match write_info.transport {
        T::DecInt => Ok(value.as_i64().map_err(|e| bad_pattern(e.to_string()))?.to_string()),
        T::DecFloat => Ok(value.as_f64().map_err(|e| bad_pattern(e.to_string()))?.to_string()),
        T::String => Ok(value.as_str().map_err(|e| bad_pattern(e.to_string()))?.to_string()),
        T::HexInt => {
            let v = value.as_i64().map_err(|e| bad_pattern(e.to_string()))? as i128;
            let width = write_info.fixed_char_width.map(|chars| chars.div_ceil(2));
            let bytes = crate::util::binary_str_from_int(v, width, OverflowPolicy::Expand)
                .map_err(bad_pattern)?;
            Ok(hex_from_bytes(&bytes))
        }
        T::BinInt => {
            let v = value.as_i64().map_err(|e| bad_pattern(e.to_string()))? as i128;
            let width = Some(default_int_width(info)).filter(|w| *w >= natural_width_int(v));
            let bytes = crate::util::binary_str_from_int(v, width, OverflowPolicy::Expand)
                .map_err(bad_pattern)?;
            Ok(hex_from_bytes(&bytes))
        }
        T::BinFloat => {
            let v = value.as_f64().map_err(|e| bad_pattern(e.to_string()))?;
            let bytes = crate::util::binary_str_from_float(v, default_float_width(info)).map_err(bad_pattern)?;
            Ok(hex_from_bytes(&bytes))
        }
        T::Void => Ok(String::new()),
    }
}

fn decode_value(captured: &str, info: &RegisterInfo, interaction: &InteractionInfo) -> Result<Value, Error> {
    use crate::interaction::TransportLayerType as T;
    let conversion_failed = |message: String| {
        Error::from(RuntimeError::ConversionFailed {
            captured: captured.to_string(),
            message,
        })
    };

    match (interaction.transport, info.data_descriptor.kind) {
        (T::DecInt, _) => captured
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| conversion_failed(e.to_string())),
        (T::DecFloat, _) => captured
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| conversion_failed(e.to_string())),
        (T::String, _) => Ok(Value::Str(captured.to_string())),
        (T::HexInt, _) => {
            let bytes = bytes_from_hex(captured).map_err(conversion_failed)?;
            let v = int_from_binary_str(&bytes, info.data_descriptor.signed, true).map_err(conversion_failed)?;
            Ok(Value::Int(v as i64))
        }
        (T::BinInt, _) => {
            let bytes = bytes_from_hex(captured).map_err(conversion_failed)?;
            let v = int_from_binary_str(&bytes, info.data_descriptor.signed, true).map_err(conversion_failed)?;
            Ok(Value::Int(v as i64))
        }
        (T::BinFloat, _) => {
            let bytes = bytes_from_hex(captured).map_err(conversion_failed)?;
            let v = float_from_binary_str(&bytes, default_float_width(info)).map_err(conversion_failed)?;
            Ok(Value::Float(v))
        }
        (T::Void, DataKind::Void) => Ok(Value::Str(String::new())),
        (T::Void, _) => Err(conversion_failed("void transport cannot decode a value".to_string())),
    }
}
