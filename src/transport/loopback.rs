//! An in-process transport used only by tests: a pair of byte queues standing in for
//! the wire, with a [`LoopbackDevice`] handle the test drives to play the device's part.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use crate::transport::{RawChannel, Transport};

#[derive(Debug)]
struct LoopbackChannel {
    to_device: Arc<Mutex<VecDeque<u8>>>,
    from_device: Arc<Mutex<VecDeque<u8>>>,
}

impl RawChannel for LoopbackChannel {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.from_device.lock().unwrap();
        let n = buf.len().min(queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.to_device.lock().unwrap().extend(buf.iter().copied());
        Ok(())
    }
}

/// The test's view of the simulated device: inspect what was sent, queue what it should
/// answer with.
#[derive(Clone, Debug)]
pub struct LoopbackDevice {
    to_device: Arc<Mutex<VecDeque<u8>>>,
    from_device: Arc<Mutex<VecDeque<u8>>>,
}

impl LoopbackDevice {
    /// Drains and returns everything written to the transport since the last call.
    pub fn take_sent(&self) -> Vec<u8> {
        self.to_device.lock().unwrap().drain(..).collect()
    }

    /// Queues bytes for the transport's next read(s) to return.
    pub fn push_response(&self, bytes: &[u8]) {
        self.from_device.lock().unwrap().extend(bytes.iter().copied());
    }
}

/// Builds a connected [`Transport`]/[`LoopbackDevice`] pair.
pub fn pair() -> (Transport, LoopbackDevice) {
    let to_device = Arc::new(Mutex::new(VecDeque::new()));
    let from_device = Arc::new(Mutex::new(VecDeque::new()));
    let channel = LoopbackChannel {
        to_device: to_device.clone(),
        from_device: from_device.clone(),
    };
    let device = LoopbackDevice { to_device, from_device };
    (Transport::new(Box::new(channel)), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_loopback_echoes_command_and_delivers_response() {
        let (mut transport, device) = pair();
        transport.send(b"SOUR:FREQ:CW?\r\n").unwrap();
        assert_eq!(device.take_sent(), b"SOUR:FREQ:CW?\r\n");

        device.push_response(b"1300000000\r\n");
        let line = transport.read_line("\r\n", Duration::from_millis(200)).unwrap();
        assert_eq!(line, "1300000000\r\n");
    }

    #[test]
    fn test_loopback_read_times_out_without_response() {
        let (mut transport, _device) = pair();
        let result = transport.read_line("\r\n", Duration::from_millis(10));
        assert!(matches!(result, Err(crate::error::RuntimeError::Timeout(_))));
    }
}
