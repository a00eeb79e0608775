//! TCP channel: a plain `TcpStream` with a short read timeout, polled the same way the
//! serial channel is.
//!
//! The reference implementation raced a steady timer against an async read and
//! cancelled the socket on timer expiry; this module gets the same effect without a
//! reactor by giving the socket itself a short read timeout and letting
//! [`super::Transport::read_until`] own the real deadline and cancellation flag across
//! however many short reads it takes.

use std::net::TcpStream;
use std::time::Duration;

use crate::error::RuntimeError;
use crate::transport::{RawChannel, Transport};

const READ_TIMEOUT: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
}

impl RawChannel for TcpChannel {
    fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::io::Read;
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        std::io::Write::write_all(&mut self.stream, buf)
    }
}

/// Connects to `host:port` and wraps the socket in a [`Transport`].
pub fn connect(host: &str, port: u16) -> Result<Transport, RuntimeError> {
    let stream = TcpStream::connect((host, port)).map_err(|e| RuntimeError::Open(e.to_string()))?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| RuntimeError::Open(e.to_string()))?;
    stream.set_nodelay(true).ok();
    Ok(Transport::new(Box::new(TcpChannel { stream })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_to_closed_port_is_runtime_error() {
        // Port 0 never accepts connections; this should fail fast without hanging.
        let result = connect("127.0.0.1", 0);
        assert!(matches!(result, Err(RuntimeError::Open(_))));
    }
}
