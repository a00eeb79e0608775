//! End-to-end dialogues against an in-process loopback transport, standing in for the
//! hardware a serial or TCP backend would otherwise need.

use cmdbus::accessor::Value;
use cmdbus::backend::{Backend, Descriptor};
use cmdbus::catalogue::RegisterPath;
use cmdbus::error::{Error, RuntimeError};
use cmdbus::transport::loopback;

fn open_backend(map_source: &str) -> (Backend, loopback::LoopbackDevice) {
    let _ = env_logger::try_init();
    let descriptor = Descriptor::parse("CommandBasedTCP:127.0.0.1:0;map=unused.map").unwrap();
    let backend = Backend::from_map_source(descriptor, map_source).unwrap();
    let (transport, device) = loopback::pair();
    backend.open_with_transport(transport).unwrap();
    (backend, device)
}

const SCALAR_MAP: &str = r#"{
    "mapFileFormatVersion": 2,
    "registers": {
        "/cwFrequency": {
            "type": "decInt",
            "nElem": 1,
            "write": { "cmd": "SOUR:FREQ:CW {{x.0}}" },
            "read": { "cmd": "SOUR:FREQ:CW?", "resp": "{{x.0}}" }
        }
    }
}"#;

#[test]
fn test_write_then_read_roundtrip() {
    let (backend, device) = open_backend(SCALAR_MAP);
    let path = RegisterPath::new("/cwFrequency");

    backend.write(&path, &[Value::Int(1_300_000_000)]).unwrap();
    assert_eq!(device.take_sent(), b"SOUR:FREQ:CW 1300000000\r\n");

    device.push_response(b"1300000000\r\n");
    let values = backend.read(&path, 0, 1).unwrap();
    assert_eq!(values, vec![Value::Int(1_300_000_000)]);
}

const VECTOR_MAP: &str = r#"{
    "mapFileFormatVersion": 2,
    "registers": {
        "/axisPositions": {
            "type": "decFloat",
            "nElem": 2,
            "write": { "cmd": "POS AXIS_1 {{x.0}};POS AXIS_2 {{x.1}}" },
            "read": {
                "cmd": "POS?",
                "resp": "{{x.0}}\r\n{{x.1}}",
                "nRespLines": 2
            }
        }
    }
}"#;

#[test]
fn test_multi_line_vector_response() {
    let (backend, device) = open_backend(VECTOR_MAP);
    let path = RegisterPath::new("/axisPositions");

    device.push_response(b"1.5\r\n2.5\r\n");
    let values = backend.read(&path, 0, 2).unwrap();
    assert_eq!(values, vec![Value::Float(1.5), Value::Float(2.5)]);

    // A window onto just the second element still runs the full dialogue.
    device.push_response(b"1.5\r\n2.5\r\n");
    let window = backend.read(&path, 1, 1).unwrap();
    assert_eq!(window, vec![Value::Float(2.5)]);
}

const CHECKSUM_MAP: &str = r#"{
    "mapFileFormatVersion": 2,
    "registers": {
        "/counter": {
            "type": "decInt",
            "nElem": 1,
            "checksums": ["cs8"],
            "read": {
                "cmd": "CNT?",
                "resp": "{{csStart.0}}{{x.0}}{{csEnd.0}} *{{cs.0}}"
            }
        }
    }
}"#;

#[test]
fn test_read_with_valid_checksum_succeeds() {
    let (backend, device) = open_backend(CHECKSUM_MAP);
    let path = RegisterPath::new("/counter");

    let payload = "7";
    let sum: u32 = payload.bytes().map(|b| b as u32).sum();
    let checksum = format!("{:02X}", sum % 256);
    device.push_response(format!("{payload} *{checksum}\r\n").as_bytes());

    let values = backend.read(&path, 0, 1).unwrap();
    assert_eq!(values, vec![Value::Int(7)]);
}

#[test]
fn test_read_with_invalid_checksum_is_rejected() {
    let (backend, device) = open_backend(CHECKSUM_MAP);
    let path = RegisterPath::new("/counter");

    device.push_response(b"7 *00\r\n");
    let result = backend.read(&path, 0, 1);
    assert!(matches!(result, Err(Error::Runtime(RuntimeError::ResponseMismatch { .. }))));
}

#[test]
fn test_read_times_out_when_device_is_silent() {
    let descriptor = Descriptor::parse("CommandBasedTCP:127.0.0.1:0;map=unused.map").unwrap();
    let backend = Backend::from_map_source(descriptor, SCALAR_MAP).unwrap();
    let (transport, _device) = loopback::pair();
    backend
        .open_with_transport_and_timeout(transport, std::time::Duration::from_millis(20))
        .unwrap();

    let path = RegisterPath::new("/cwFrequency");
    let result = backend.read(&path, 0, 1);
    assert!(matches!(result, Err(Error::Runtime(RuntimeError::PartialLines(_, _)))));
}

#[test]
fn test_window_out_of_bounds_is_rejected_before_any_io() {
    let (backend, device) = open_backend(SCALAR_MAP);
    let path = RegisterPath::new("/cwFrequency");

    let result = backend.read(&path, 0, 5);
    assert!(result.is_err());
    assert!(device.take_sent().is_empty(), "a logic error must not touch the transport");
}

#[test]
fn test_unknown_register_is_rejected() {
    let (backend, _device) = open_backend(SCALAR_MAP);
    let result = backend.read(&RegisterPath::new("/doesNotExist"), 0, 1);
    assert!(result.is_err());
}

const RECOVERY_MAP: &str = r#"{
    "mapFileFormatVersion": 2,
    "metadata": { "defaultRecoveryRegister": "/cwFrequency" },
    "registers": {
        "/cwFrequency": {
            "type": "decInt",
            "nElem": 1,
            "read": { "cmd": "SOUR:FREQ:CW?", "resp": "{{x.0}}" }
        }
    }
}"#;

#[test]
fn test_open_runs_recovery_probe_and_succeeds_when_device_answers() {
    let descriptor = Descriptor::parse("CommandBasedTCP:127.0.0.1:0;map=unused.map").unwrap();
    let backend = Backend::from_map_source(descriptor, RECOVERY_MAP).unwrap();
    let (transport, device) = loopback::pair();
    device.push_response(b"0\r\n");
    backend.open_with_transport(transport).unwrap();
    assert!(backend.is_open());
}

#[test]
fn test_recovery_probe_failure_is_reported_but_backend_stays_open() {
    let descriptor = Descriptor::parse("CommandBasedTCP:127.0.0.1:0;map=unused.map").unwrap();
    let backend = Backend::from_map_source(descriptor, RECOVERY_MAP).unwrap();
    let (transport, _device) = loopback::pair(); // never answers -> probe times out
    let result = backend.open_with_transport_and_timeout(transport, std::time::Duration::from_millis(20));
    assert!(matches!(result, Err(Error::Runtime(RuntimeError::NotFunctional(_)))));
    assert!(backend.is_open());
}
