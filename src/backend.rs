//! The backend: owns a loaded [`Catalogue`] plus the [`CommandHandler`] wrapping the
//! open transport, and serializes every dialogue through one mutex so that concurrent
//! accessors never interleave bytes on the wire.
//!
//! Construction takes a factory-style descriptor string, the way the reference backend
//! is instantiated from a URI-like `CommandBasedTTY:/dev/ttyUSB0;map=...` or
//! `CommandBasedTCP:host:port;map=...` key; parsing that key is `Descriptor::parse`.

use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};

use crate::accessor::{self, Value};
use crate::catalogue::{Catalogue, RegisterPath};
use crate::command_handler::CommandHandler;
use crate::error::{Error, LogicError, RuntimeError};
use crate::transport::{serial, tcp};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Where to connect and which map file describes the registers there.
#[derive(Clone, PartialEq, Eq)]
pub enum Descriptor {
    Serial { device_path: String, map_file: String },
    Tcp { host: String, port: u16, map_file: String },
}

impl Descriptor {
    /// Parses `CommandBasedTTY:<device>;map=<path>` or `CommandBasedTCP:<host>:<port>;map=<path>`.
    pub fn parse(key: &str) -> Result<Descriptor, LogicError> {
        let (scheme, rest) = key.split_once(':').ok_or_else(|| LogicError::UnsupportedAccessMode(key.to_string()))?;
        let mut parts = rest.split(';');
        let address = parts.next().unwrap_or_default();
        let map_file = parts
            .find_map(|p| p.strip_prefix("map="))
            .ok_or_else(|| LogicError::UnsupportedAccessMode(format!("{key}: missing `;map=` parameter")))?
            .to_string();

        match scheme {
            "CommandBasedTTY" => Ok(Descriptor::Serial {
                device_path: address.to_string(),
                map_file,
            }),
            "CommandBasedTCP" => {
                let (host, port) = address
                    .rsplit_once(':')
                    .ok_or_else(|| LogicError::UnsupportedAccessMode(format!("{key}: expected host:port")))?;
                let port: u16 = port
                    .parse()
                    .map_err(|_| LogicError::UnsupportedAccessMode(format!("{key}: bad port `{port}`")))?;
                Ok(Descriptor::Tcp {
                    host: host.to_string(),
                    port,
                    map_file,
                })
            }
            other => Err(LogicError::UnsupportedAccessMode(other.to_string())),
        }
    }

    fn map_file(&self) -> &str {
        match self {
            Descriptor::Serial { map_file, .. } => map_file,
            Descriptor::Tcp { map_file, .. } => map_file,
        }
    }
}

#[derive(Debug)]
struct OpenState {
    handler: CommandHandler,
}

/// A register-mapped command/response backend. `open`/`close` bracket the transport's
/// lifetime; every accessor call in between is serialized through `state`.
pub struct Backend {
    descriptor: Descriptor,
    catalogue: Catalogue,
    state: Mutex<Option<OpenState>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("descriptor", &self.descriptor)
            .field("is_open", &self.is_open())
            .finish()
    }
}

impl Backend {
    /// Loads the map file named by `descriptor` but does not open the transport yet,
    /// mirroring the reference backend's split between construction (cheap, can fail on
    /// a bad map file) and `open` (touches hardware).
    pub fn new(descriptor: Descriptor) -> Result<Backend, Error> {
        let source = fs::read_to_string(descriptor.map_file()).map_err(RuntimeError::Io)?;
        Backend::from_map_source(descriptor, &source)
    }

    /// Builds a backend from an already-loaded map file's text, skipping the filesystem
    /// read `new` does. Useful for an embedded map (`include_str!`) or for tests that
    /// drive the backend over a [`crate::transport::loopback`] pair instead of real
    /// hardware.
    pub fn from_map_source(descriptor: Descriptor, source: &str) -> Result<Backend, Error> {
        let catalogue = Catalogue::parse(source)?;
        Ok(Backend {
            descriptor,
            catalogue,
            state: Mutex::new(None),
        })
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    /// Opens the transport and runs the catalogue's recovery probe, if one is
    /// configured. A failed probe leaves the backend open (the transport connection
    /// itself succeeded) but returns `RuntimeError::NotFunctional`; a caller can retry
    /// the probe via [`Backend::recover`] without reopening the transport.
    pub fn open(&self) -> Result<(), Error> {
        let transport = match &self.descriptor {
            Descriptor::Serial { device_path, .. } => serial::open(device_path)?,
            Descriptor::Tcp { host, port, .. } => tcp::connect(host, *port)?,
        };
        info!("opened transport for {:?}", self.descriptor);

        let handler = CommandHandler::new(transport, DEFAULT_TIMEOUT);
        *self.state.lock().unwrap() = Some(OpenState { handler });

        self.recover()
    }

    /// Opens the backend against an already-constructed transport instead of dialing one
    /// from `descriptor`, then runs the recovery probe exactly like [`Backend::open`].
    /// Used by tests to drive a backend over a [`crate::transport::loopback`] pair.
    pub fn open_with_transport(&self, transport: crate::transport::Transport) -> Result<(), Error> {
        self.open_with_transport_and_timeout(transport, DEFAULT_TIMEOUT)
    }

    /// Same as [`Backend::open_with_transport`], with an explicit per-dialogue timeout
    /// instead of the default. Mainly useful for tests that want a silent device's
    /// timeout to resolve quickly.
    pub fn open_with_transport_and_timeout(
        &self,
        transport: crate::transport::Transport,
        timeout: Duration,
    ) -> Result<(), Error> {
        let handler = CommandHandler::new(transport, timeout);
        *self.state.lock().unwrap() = Some(OpenState { handler });
        self.recover()
    }

    pub fn close(&self) {
        *self.state.lock().unwrap() = None;
        debug!("closed transport");
    }

    /// Re-runs the catalogue's default recovery register's read dialogue, if one is
    /// configured. Not configuring one is not an error: some devices have no safe
    /// read-only probe command.
    pub fn recover(&self) -> Result<(), Error> {
        let Some(probe_path) = self.catalogue.default_recovery_register.clone() else {
            return Ok(());
        };
        let info = self
            .catalogue
            .get(&probe_path)
            .ok_or_else(|| LogicError::UnknownRegister(probe_path.clone()))?
            .clone();

        let mut guard = self.state.lock().unwrap();
        let state = guard.as_mut().ok_or(RuntimeError::NotOpen)?;
        match accessor::probe(&info, &mut state.handler) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("recovery probe on `{probe_path}` failed: {e}");
                Err(RuntimeError::NotFunctional(e.to_string()).into())
            }
        }
    }

    pub fn read(&self, path: &RegisterPath, offset: usize, count: usize) -> Result<Vec<Value>, Error> {
        let info = self.catalogue.get(path).ok_or_else(|| LogicError::UnknownRegister(path.clone()))?.clone();
        let mut guard = self.state.lock().unwrap();
        let state = guard.as_mut().ok_or(RuntimeError::NotOpen)?;
        accessor::read(&info, offset, count, &mut state.handler)
    }

    pub fn write(&self, path: &RegisterPath, values: &[Value]) -> Result<(), Error> {
        let info = self.catalogue.get(path).ok_or_else(|| LogicError::UnknownRegister(path.clone()))?.clone();
        let mut guard = self.state.lock().unwrap();
        let state = guard.as_mut().ok_or(RuntimeError::NotOpen)?;
        accessor::write(&info, values, &mut state.handler)
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Descriptor::Serial { device_path, .. } => write!(f, "CommandBasedTTY:{device_path}"),
            Descriptor::Tcp { host, port, .. } => write!(f, "CommandBasedTCP:{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_parse_serial() {
        let d = Descriptor::parse("CommandBasedTTY:/dev/ttyUSB0;map=/etc/device.map").unwrap();
        assert_eq!(
            d,
            Descriptor::Serial {
                device_path: "/dev/ttyUSB0".to_string(),
                map_file: "/etc/device.map".to_string(),
            }
        );
    }

    #[test]
    fn test_descriptor_parse_tcp() {
        let d = Descriptor::parse("CommandBasedTCP:192.168.0.5:5025;map=/etc/device.map").unwrap();
        assert_eq!(
            d,
            Descriptor::Tcp {
                host: "192.168.0.5".to_string(),
                port: 5025,
                map_file: "/etc/device.map".to_string(),
            }
        );
    }

    #[test]
    fn test_descriptor_parse_rejects_unknown_scheme() {
        assert!(matches!(
            Descriptor::parse("CommandBasedUSB:/dev/x;map=m"),
            Err(LogicError::UnsupportedAccessMode(_))
        ));
    }

    #[test]
    fn test_descriptor_parse_requires_map_parameter() {
        assert!(Descriptor::parse("CommandBasedTTY:/dev/ttyUSB0").is_err());
    }
}
