//! Serializes one command/response dialogue over a [`Transport`]: send a command with
//! its delimiter appended, then collect either a fixed number of delimited lines or a
//! fixed number of raw bytes.
//!
//! This is the layer that resolves [`Delimiter`] sentinels against the handler's own
//! default and turns a timeout mid-dialogue into a [`RuntimeError::PartialLines`] that
//! carries whatever was already read, the way a caller debugging a flaky device needs.

use std::time::Duration;

use crate::error::RuntimeError;
use crate::interaction::{Delimiter, DEFAULT_DELIMITER as HANDLER_DEFAULT_DELIMITER};
use crate::transport::Transport;

#[derive(Debug)]
pub struct CommandHandler {
    transport: Transport,
    timeout: Duration,
}

impl CommandHandler {
    pub fn new(transport: Transport, timeout: Duration) -> Self {
        CommandHandler { transport, timeout }
    }

    pub fn cancellation_handle(&self) -> crate::transport::CancellationHandle {
        self.transport.cancellation_handle()
    }

    /// Sends `command` terminated by `cmd_delimiter`, then reads `n_lines` lines each
    /// terminated by `resp_delimiter`.
    pub fn send_command_and_read_lines(
        &mut self,
        command: &str,
        cmd_delimiter: &Delimiter,
        n_lines: u32,
        resp_delimiter: &Delimiter,
    ) -> Result<Vec<String>, RuntimeError> {
        self.send(command, cmd_delimiter)?;

        let resp_delim = resp_delimiter.resolve(HANDLER_DEFAULT_DELIMITER);
        let mut lines = Vec::with_capacity(n_lines as usize);
        for _ in 0..n_lines {
            match self.transport.read_line(resp_delim, self.timeout) {
                Ok(line) => lines.push(line),
                Err(RuntimeError::Timeout(timeout)) => {
                    return Err(RuntimeError::PartialLines(timeout.as_millis() as usize, lines))
                }
                Err(other) => return Err(other),
            }
        }
        Ok(lines)
    }

    /// Sends `command` terminated by `cmd_delimiter`, then reads exactly `n_bytes` raw
    /// bytes with no delimiter involved.
    pub fn send_command_and_read_bytes(
        &mut self,
        command: &[u8],
        cmd_delimiter: &Delimiter,
        n_bytes: u32,
    ) -> Result<Vec<u8>, RuntimeError> {
        self.send_raw(command, cmd_delimiter)?;
        self.transport.read_bytes(n_bytes as usize, self.timeout)
    }

    /// Sends `command` with no response expected (`type=void` writes).
    pub fn send_command(&mut self, command: &str, cmd_delimiter: &Delimiter) -> Result<(), RuntimeError> {
        self.send(command, cmd_delimiter)
    }

    fn send(&mut self, command: &str, cmd_delimiter: &Delimiter) -> Result<(), RuntimeError> {
        let delim = cmd_delimiter.resolve(HANDLER_DEFAULT_DELIMITER);
        let mut payload = command.as_bytes().to_vec();
        payload.extend_from_slice(delim.as_bytes());
        self.transport.send(&payload)
    }

    fn send_raw(&mut self, command: &[u8], cmd_delimiter: &Delimiter) -> Result<(), RuntimeError> {
        let delim = cmd_delimiter.resolve(HANDLER_DEFAULT_DELIMITER);
        let mut payload = command.to_vec();
        payload.extend_from_slice(delim.as_bytes());
        self.transport.send(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;

    fn handler_with_device() -> (CommandHandler, loopback::LoopbackDevice) {
        let (transport, device) = loopback::pair();
        (CommandHandler::new(transport, Duration::from_millis(200)), device)
    }

    #[test]
    fn test_send_command_and_read_lines_appends_default_delimiter() {
        let (mut handler, device) = handler_with_device();
        device.push_response(b"1300000000\r\n");
        let lines = handler
            .send_command_and_read_lines("SOUR:FREQ:CW?", &Delimiter::Default, 1, &Delimiter::Default)
            .unwrap();
        assert_eq!(device.take_sent(), b"SOUR:FREQ:CW?\r\n");
        assert_eq!(lines, vec!["1300000000\r\n".to_string()]);
    }

    #[test]
    fn test_send_command_and_read_lines_honors_explicit_delimiter() {
        let (mut handler, device) = handler_with_device();
        device.push_response(b"ACK;");
        let lines = handler
            .send_command_and_read_lines(
                "DO",
                &Delimiter::Explicit(";".to_string()),
                1,
                &Delimiter::Explicit(";".to_string()),
            )
            .unwrap();
        assert_eq!(device.take_sent(), b"DO;");
        assert_eq!(lines, vec!["ACK;".to_string()]);
    }

    #[test]
    fn test_send_command_and_read_bytes() {
        let (mut handler, device) = handler_with_device();
        device.push_response(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let bytes = handler
            .send_command_and_read_bytes(b"READ", &Delimiter::None, 4)
            .unwrap();
        assert_eq!(device.take_sent(), b"READ");
        assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_timeout_reports_partial_lines() {
        let (mut handler, device) = handler_with_device();
        device.push_response(b"line one\r\n");
        let result = handler.send_command_and_read_lines("CMD", &Delimiter::Default, 2, &Delimiter::Default);
        match result {
            Err(RuntimeError::PartialLines(_, lines)) => {
                assert_eq!(lines, vec!["line one\r\n".to_string()])
            }
            other => panic!("expected PartialLines, got {other:?}"),
        }
    }
}
