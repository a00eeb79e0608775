#![deny(missing_debug_implementations)]

//! Turns typed register reads and writes into command/response dialogues with a device
//! that only understands textual or binary commands over a serial line or TCP socket.
//!
//! A map file ([`catalogue`]) names each register and describes, per direction, the
//! command template to send and the response template to parse back into values
//! ([`template`], [`interaction`]). [`checksum`] implements the four checksum algorithms
//! a pattern's `{{cs.i}}` tags can ask for. [`transport`] is the cancellable, polling
//! byte channel underneath a [`command_handler::CommandHandler`], which serializes one
//! send-then-receive dialogue at a time; [`accessor`] turns that dialogue into typed
//! [`accessor::Value`]s. [`backend::Backend`] ties a loaded catalogue to an open
//! transport behind one mutex.
//!
//! ```no_run
//! use cmdbus::backend::{Backend, Descriptor};
//! use cmdbus::catalogue::RegisterPath;
//! use cmdbus::accessor::Value;
//!
//! let descriptor = Descriptor::parse("CommandBasedTCP:192.168.1.50:5025;map=signal_generator.map")?;
//! let backend = Backend::new(descriptor)?;
//! backend.open()?;
//!
//! backend.write(&RegisterPath::new("/cwFrequency"), &[Value::Int(1_300_000_000)])?;
//! let frequency = backend.read(&RegisterPath::new("/cwFrequency"), 0, 1)?;
//! println!("{frequency:?}");
//! # Ok::<(), cmdbus::error::Error>(())
//! ```

pub mod accessor;
pub mod backend;
pub mod catalogue;
pub mod checksum;
pub mod command_handler;
pub mod error;
pub mod interaction;
pub mod register;
pub mod template;
pub mod transport;
pub mod util;
