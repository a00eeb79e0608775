//! A cancellable, polling transport layer shared by [`serial`] and [`tcp`].
//!
//! Both concrete transports are thin [`RawChannel`] implementations wrapped in the same
//! [`Transport`] polling engine, so timeout and cancellation behavior never drifts
//! between them. The engine favors a non-blocking-descriptor-plus-poll-loop model over
//! threads or async, mirroring how the two reference implementations this crate is
//! modeled on actually waited for input: a short-timeout read retried in a loop, with a
//! flag checked on every iteration to abort early.

pub mod loopback;
pub mod serial;
pub mod tcp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::RuntimeError;

/// How long a single non-blocking read attempt is allowed to wait for data before the
/// engine re-checks the deadline and cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A raw, non-blocking byte channel to a device.
///
/// `try_read` must never block longer than a small, bounded slice of time: returning
/// `Ok(0)` means "nothing available yet", not end-of-stream. [`Transport`] is the only
/// code that interprets framing and timeouts; implementors just move bytes.
pub trait RawChannel: Send + std::fmt::Debug {
    fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
}

/// Accumulates bytes pulled off a [`RawChannel`] and slices off complete lines or
/// fixed-size chunks as the command handler asks for them. Left-over bytes (the start of
/// the next response) are preserved across calls.
#[derive(Debug, Default)]
struct Framer {
    buffer: Vec<u8>,
}

impl Framer {
    fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn take_line(&mut self, delimiter: &[u8]) -> Option<Vec<u8>> {
        if delimiter.is_empty() {
            return None;
        }
        let pos = self.buffer.windows(delimiter.len()).position(|w| w == delimiter)?;
        let end = pos + delimiter.len();
        let line = self.buffer[..end].to_vec();
        self.buffer.drain(..end);
        Some(line)
    }

    fn take_bytes(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.buffer.len() < n {
            return None;
        }
        Some(self.buffer.drain(..n).collect())
    }
}

/// A handle that can abort a [`Transport`]'s in-progress read from another thread, e.g.
/// a watchdog that decided a dialogue has hung.
#[derive(Clone, Debug)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The cancellable, timeout-aware channel used by the command handler. Framing
/// (line-based vs fixed-byte-count) is chosen per call, not per transport, since the
/// same physical connection serves both textual and binary registers.
#[derive(Debug)]
pub struct Transport {
    channel: Box<dyn RawChannel>,
    framer: Framer,
    terminate: Arc<AtomicBool>,
}

impl Transport {
    pub fn new(channel: Box<dyn RawChannel>) -> Self {
        Transport {
            channel,
            framer: Framer::default(),
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle(self.terminate.clone())
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), RuntimeError> {
        trace!("sending {} byte(s)", payload.len());
        self.channel.write_all(payload).map_err(RuntimeError::Io)
    }

    /// Reads until `delimiter` is seen, returning the line including the delimiter.
    pub fn read_line(&mut self, delimiter: &str, timeout: Duration) -> Result<String, RuntimeError> {
        let delimiter = delimiter.as_bytes().to_vec();
        let bytes = self.read_until(timeout, move |framer| framer.take_line(&delimiter))?;
        String::from_utf8(bytes).map_err(|e| RuntimeError::ConversionFailed {
            captured: format!("{:?}", e.as_bytes()),
            message: "response was not valid UTF-8".to_string(),
        })
    }

    /// Reads exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, RuntimeError> {
        self.read_until(timeout, move |framer| framer.take_bytes(n))
    }

    /// Returns whatever has been buffered so far but not yet claimed, without blocking.
    /// Used to attach partial progress to a timeout error.
    pub fn pending(&self) -> &[u8] {
        &self.framer.buffer
    }

    fn read_until(
        &mut self,
        timeout: Duration,
        mut extract: impl FnMut(&mut Framer) -> Option<Vec<u8>>,
    ) -> Result<Vec<u8>, RuntimeError> {
        self.terminate.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        let mut scratch = [0u8; 4096];
        loop {
            if let Some(bytes) = extract(&mut self.framer) {
                return Ok(bytes);
            }
            if self.terminate.load(Ordering::SeqCst) {
                return Err(RuntimeError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::Timeout(timeout));
            }
            match self.channel.try_read(&mut scratch) {
                Ok(0) => std::thread::sleep(POLL_INTERVAL),
                Ok(n) => self.framer.feed(&scratch[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    std::thread::sleep(POLL_INTERVAL)
                }
                Err(e) => return Err(RuntimeError::Io(e)),
            }
        }
    }
}
