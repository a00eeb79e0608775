//! Error types.
//!
//! Every fallible operation in this crate returns either a [`LogicError`] or a
//! [`RuntimeError`], never a single catch-all type. Logic errors are raised before any
//! transport I/O is attempted (bad map file, bad pattern, precondition violation) and
//! never warrant a retry. Runtime errors come from the transport or from a response
//! that didn't match what the device promised and may be worth retrying at a higher
//! layer.

use thiserror::Error;

use crate::catalogue::RegisterPath;

/// A configuration or precondition fault, detected without touching the transport.
#[derive(Debug, Error)]
pub enum LogicError {
    #[error("register `{0}` is not present in the catalogue")]
    UnknownRegister(RegisterPath),

    #[error("register `{path}` has no {direction} interaction")]
    DirectionNotEnabled {
        path: RegisterPath,
        direction: &'static str,
    },

    #[error("window [{offset}, {offset}+{count}) exceeds register `{path}` with {n_elements} elements")]
    WindowOutOfBounds {
        path: RegisterPath,
        offset: usize,
        count: usize,
        n_elements: usize,
    },

    #[error("map file has mapFileFormatVersion={found}, only version 2 is supported")]
    UnsupportedMapVersion { found: i64 },

    #[error("map file key `{key}` is unknown")]
    UnknownKey { key: String },

    #[error("map file key `{key}` is duplicated (case-insensitively)")]
    DuplicateKey { key: String },

    #[error("map file contains a literal NUL byte; use {{{{zero}}}} instead")]
    LiteralNul,

    #[error("map file key `{key}` is `null`, which is rejected everywhere in a map file; omit the key instead")]
    NullValue { key: String },

    #[error("register `{path}`: {direction} pattern: {message}")]
    BadPattern {
        path: RegisterPath,
        direction: &'static str,
        message: String,
    },

    #[error("register `{path}`: {direction}: type=void forbids a non-empty response pattern or value placeholders")]
    VoidWithPayload {
        path: RegisterPath,
        direction: &'static str,
    },

    #[error("register `{path}`: {direction}: response pattern given without a command pattern")]
    ResponseWithoutCommand {
        path: RegisterPath,
        direction: &'static str,
    },

    #[error("register `{path}`: {direction}: checksum tag topology invalid: {message}")]
    BadChecksumTopology {
        path: RegisterPath,
        direction: &'static str,
        message: String,
    },

    #[error("register `{path}`: {direction}: response regex has {found} capture groups, expected {expected}")]
    CaptureGroupMismatch {
        path: RegisterPath,
        direction: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("access mode flags {0:?} are not supported by this backend")]
    UnsupportedAccessMode(String),

    #[error("value {value} does not fit in {width} byte(s) and overflow policy is `nullopt`")]
    IntegerOverflow { value: i128, width: usize },
}

/// A transient or environmental fault encountered while talking to the device.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to open transport: {0}")]
    Open(String),

    #[error("write was incomplete: wrote {wrote} of {expected} bytes")]
    PartialWrite { wrote: usize, expected: usize },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("read was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("response `{payload}` did not match the expected pattern for register `{path}`")]
    ResponseMismatch { path: RegisterPath, payload: String },

    #[error("could not convert captured value `{captured}` to the register's user type: {message}")]
    ConversionFailed { captured: String, message: String },

    #[error("backend is not open")]
    NotOpen,

    #[error("backend opened but recovery probe failed: {0}")]
    NotFunctional(String),

    #[error("timed out after reading {0} line(s); retrieved so far: {1:?}")]
    PartialLines(usize, Vec<String>),
}

/// Either kind of failure, for operations that can fail at either boundary (e.g.
/// opening a backend, which can fail on a bad map file or on a failed recovery probe).
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Logic(#[from] LogicError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
