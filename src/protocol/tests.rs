// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::io::{self, Cursor, Read};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::formatter::{CompressionFormatter, EncryptionFormatter, Formatter};
use crate::core::reducer::{Fields, Layout, Reducer};
use crate::core::value::{Value, ValueKind};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::network::{NetworkReader, NetworkWriter, Protocol};
use crate::protocol::packet::{AnyPacket, Disconnect, Packet};
use crate::protocol::registry::PacketRegistry;
use crate::utils::compression::CompressionKind;
use crate::utils::metrics::WireMetrics;

#[derive(Debug, Clone, PartialEq)]
struct Account {
    name: String,
    id: i32,
    is_admin: bool,
}

impl Reducer for Account {
    fn format() -> Layout {
        vec![ValueKind::Text, ValueKind::I32, ValueKind::Bool]
    }

    fn to_fields(&self) -> Vec<Value> {
        vec![
            self.name.clone().into(),
            self.id.into(),
            self.is_admin.into(),
        ]
    }

    fn from_fields(mut fields: Fields) -> Result<Self> {
        Ok(Account {
            name: fields.text()?,
            id: fields.i32()?,
            is_admin: fields.bool()?,
        })
    }
}

impl Packet for Account {}

/// Carries its own encryption, independent of the connection formatter.
#[derive(Debug, Clone, PartialEq)]
struct Secret {
    token: Vec<u8>,
}

const SECRET_KEY: [u8; 32] = [0x42; 32];
const SECRET_NONCE: [u8; 24] = [0x24; 24];

impl Reducer for Secret {
    fn format() -> Layout {
        vec![ValueKind::Bytes]
    }

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::Bytes(self.token.clone())]
    }

    fn from_fields(mut fields: Fields) -> Result<Self> {
        Ok(Secret {
            token: fields.bytes()?,
        })
    }
}

impl Packet for Secret {
    fn formatter() -> Option<Arc<dyn Formatter>> {
        Some(Arc::new(EncryptionFormatter::new(&SECRET_KEY, SECRET_NONCE)))
    }
}

static ENCODED: AtomicUsize = AtomicUsize::new(0);

/// Counts encodes and normalizes its label after decoding.
#[derive(Debug, PartialEq)]
struct Hooked {
    label: String,
}

impl Reducer for Hooked {
    fn format() -> Layout {
        vec![ValueKind::Text]
    }

    fn to_fields(&self) -> Vec<Value> {
        vec![self.label.clone().into()]
    }

    fn from_fields(mut fields: Fields) -> Result<Self> {
        Ok(Hooked {
            label: fields.text()?,
        })
    }
}

impl Packet for Hooked {
    fn before_encode(&self) {
        ENCODED.fetch_add(1, Ordering::SeqCst);
    }

    fn after_decode(&mut self) -> Result<()> {
        self.label = self.label.to_uppercase();
        Ok(())
    }
}

/// Declares one field but produces two.
#[derive(Debug)]
struct Lying;

impl Reducer for Lying {
    fn format() -> Layout {
        vec![ValueKind::U8]
    }

    fn to_fields(&self) -> Vec<Value> {
        vec![Value::U8(1), Value::U8(2)]
    }

    fn from_fields(_: Fields) -> Result<Self> {
        Ok(Lying)
    }
}

impl Packet for Lying {}

fn admin() -> Account {
    Account {
        name: "Admin".into(),
        id: 6,
        is_admin: true,
    }
}

fn registry() -> Arc<PacketRegistry> {
    let registry = PacketRegistry::new();
    registry.register::<Account>().unwrap();
    registry.register::<Secret>().unwrap();
    registry.register::<Hooked>().unwrap();
    registry.register::<Lying>().unwrap();
    Arc::new(registry)
}

fn send_all(protocol: &Protocol, packets: &[&dyn AnyPacket]) -> Vec<u8> {
    let mut writer = NetworkWriter::new(Vec::new(), protocol.clone(), false);
    for packet in packets {
        writer.send(*packet).unwrap();
    }
    writer.close().unwrap()
}

fn read_one(protocol: &Protocol, wire: Vec<u8>) -> Box<dyn AnyPacket> {
    let mut reader = NetworkReader::new(Cursor::new(wire), protocol.clone(), true);
    reader.read_packet().unwrap()
}

#[test]
fn test_packet_roundtrip_without_formatter() {
    let protocol = Protocol::new(registry());
    let wire = send_all(&protocol, &[&admin()]);

    // [len][id=1][text len=5]["Admin"][6i32][0x80]
    assert_eq!(&wire[4..8], &[1, 0, 0, 0]);
    assert_eq!(wire.len(), 4 + 4 + 4 + 5 + 4 + 1);

    let packet = read_one(&protocol, wire);
    assert_eq!(packet.downcast_ref::<Account>(), Some(&admin()));
}

#[test]
fn test_packet_roundtrip_with_global_encryption() {
    let formatter: Arc<dyn Formatter> = Arc::new(EncryptionFormatter::new(&[7u8; 32], [9u8; 24]));
    let protocol = Protocol::new(registry()).with_formatter(formatter);
    let wire = send_all(&protocol, &[&admin()]);

    let packet = read_one(&protocol, wire.clone());
    assert_eq!(packet.downcast_ref::<Account>(), Some(&admin()));

    // Without the connection formatter the frame body is ciphertext.
    let plain = Protocol::new(registry());
    let mut reader = NetworkReader::new(Cursor::new(wire), plain, true);
    assert!(reader.read_packet().is_err());
}

#[test]
fn test_per_packet_formatter_keeps_id_in_clear() {
    let protocol = Protocol::new(registry());
    let secret = Secret {
        token: b"hunter2".to_vec(),
    };
    let wire = send_all(&protocol, &[&secret]);

    assert_eq!(&wire[4..8], &[2, 0, 0, 0]);
    assert!(!wire.windows(7).any(|w| w == b"hunter2"));

    let packet = read_one(&protocol, wire);
    assert_eq!(packet.downcast_ref::<Secret>(), Some(&secret));
}

#[test]
fn test_both_formatting_layers() {
    let formatter: Arc<dyn Formatter> = Arc::new(CompressionFormatter::new(CompressionKind::Lz4));
    let protocol = Protocol::new(registry()).with_formatter(formatter);
    let secret = Secret {
        token: vec![0xAB; 256],
    };
    let wire = send_all(&protocol, &[&secret, &admin()]);

    let mut reader = NetworkReader::new(Cursor::new(wire), protocol, true);
    assert_eq!(
        reader.read_packet().unwrap().downcast_ref::<Secret>(),
        Some(&secret)
    );
    assert_eq!(
        reader.read_packet().unwrap().downcast_ref::<Account>(),
        Some(&admin())
    );
}

#[test]
fn test_hooks_run_on_both_sides() {
    let protocol = Protocol::new(registry());
    let before = ENCODED.load(Ordering::SeqCst);
    let wire = send_all(
        &protocol,
        &[&Hooked {
            label: "quiet".into(),
        }],
    );
    assert!(ENCODED.load(Ordering::SeqCst) > before);

    let packet = read_one(&protocol, wire);
    assert_eq!(packet.downcast_ref::<Hooked>().unwrap().label, "QUIET");
}

#[test]
fn test_unregistered_packet_is_configuration_error() {
    let protocol = Protocol::new(Arc::new(PacketRegistry::new()));
    let mut writer = NetworkWriter::new(Vec::new(), protocol, false);
    let err = writer.send(&admin()).unwrap_err();
    assert!(matches!(err, ProtocolError::Configuration(_)));
    assert!(writer.close().unwrap().is_empty());
}

#[test]
fn test_layout_mismatch_on_write() {
    let protocol = Protocol::new(registry());
    let mut writer = NetworkWriter::new(Vec::new(), protocol, false);
    assert!(matches!(
        writer.send(&Lying),
        Err(ProtocolError::Configuration(_))
    ));
    assert!(writer.close().unwrap().is_empty());
}

#[test]
fn test_unknown_identifier() {
    let sender = Protocol::new(registry());
    let wire = send_all(&sender, &[&admin()]);

    let receiver = Protocol::new(Arc::new(PacketRegistry::new()));
    let mut reader = NetworkReader::new(Cursor::new(wire), receiver, true);
    assert!(matches!(
        reader.read_packet(),
        Err(ProtocolError::UnknownPacketId(1))
    ));
}

#[test]
fn test_trailing_bytes_in_frame() {
    let protocol = Protocol::new(registry());
    let mut body = protocol.encode(&Disconnect::default()).unwrap();
    body.push(0xFF);
    assert!(matches!(
        protocol.decode(&body),
        Err(ProtocolError::TrailingBytes(1))
    ));
}

#[test]
fn test_registering_twice_keeps_wire_identity() {
    let registry = registry();
    let id = registry.id_of::<Account>().unwrap();
    let layout = registry.format_of(id).unwrap();
    assert_eq!(registry.register::<Account>().unwrap(), id);
    assert_eq!(registry.format_of(id).unwrap(), layout);
}

/// Reader that flips a flag when it runs dry, like a socket closed by a local
/// shutdown.
struct ClosingReader {
    inner: Cursor<Vec<u8>>,
    closed: Arc<AtomicBool>,
    close_on_eof: bool,
}

impl Read for ClosingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && self.close_on_eof {
            self.closed.store(true, Ordering::SeqCst);
        }
        Ok(n)
    }
}

fn truncated_wire(protocol: &Protocol) -> Vec<u8> {
    let mut wire = send_all(protocol, &[&admin(), &admin()]);
    wire.truncate(wire.len() - 3);
    wire
}

#[test]
fn test_truncation_while_open_fails() {
    let protocol = Protocol::new(registry()).with_metrics(Arc::new(WireMetrics::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = ClosingReader {
        inner: Cursor::new(truncated_wire(&protocol)),
        closed: closed.clone(),
        close_on_eof: false,
    };

    let mut received = 0;
    let mut reader = NetworkReader::new(transport, protocol.clone(), true);
    let ok = reader.run(
        || closed.load(Ordering::SeqCst),
        |_| {
            received += 1;
            Ok(ControlFlow::Continue(()))
        },
    );
    assert!(!ok);
    assert_eq!(received, 1);

    let snapshot = protocol.metrics().unwrap().snapshot();
    assert_eq!(snapshot.packets_received, 1);
    assert_eq!(snapshot.decode_failures, 1);
}

#[test]
fn test_truncation_after_close_succeeds() {
    let protocol = Protocol::new(registry()).with_metrics(Arc::new(WireMetrics::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = ClosingReader {
        inner: Cursor::new(truncated_wire(&protocol)),
        closed: closed.clone(),
        close_on_eof: true,
    };

    let mut reader = NetworkReader::new(transport, protocol.clone(), true);
    let ok = reader.run(|| closed.load(Ordering::SeqCst), |_| Ok(ControlFlow::Continue(())));
    assert!(ok);
    assert_eq!(protocol.metrics().unwrap().snapshot().expected_closes, 1);
}

#[test]
fn test_run_session_surfaces_error() {
    let protocol = Protocol::new(registry());
    let mut reader = NetworkReader::new(Cursor::new(truncated_wire(&protocol)), protocol, true);
    let err = reader
        .run_session(|| false, |_| Ok(ControlFlow::Continue(())))
        .unwrap_err();
    assert!(err.is_truncation());
}

#[test]
fn test_closed_before_first_read() {
    let protocol = Protocol::new(registry());
    let mut reader = NetworkReader::new(Cursor::new(Vec::new()), protocol, true);
    let mut called = false;
    assert!(reader.run(
        || true,
        |_| {
            called = true;
            Ok(ControlFlow::Continue(()))
        }
    ));
    assert!(!called);
}

#[test]
fn test_handler_break_and_dispatcher() {
    let protocol = Protocol::new(registry());
    let wire = send_all(
        &protocol,
        &[&admin(), &Disconnect::new(b"done".to_vec()), &admin()],
    );

    let admins = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new();
    let counter = admins.clone();
    dispatcher
        .on::<Account, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
    dispatcher
        .on::<Disconnect, _>(|_| Ok(ControlFlow::Break(())))
        .unwrap();

    let mut reader = NetworkReader::new(Cursor::new(wire), protocol, true);
    assert!(reader.run(|| false, dispatcher.handler()));
    assert_eq!(admins.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handler_error_ends_session() {
    let protocol = Protocol::new(registry());
    let wire = send_all(&protocol, &[&admin()]);
    let dispatcher = Dispatcher::new();

    let mut reader = NetworkReader::new(Cursor::new(wire), protocol, true);
    assert!(matches!(
        reader.run_session(|| false, dispatcher.handler()),
        Err(ProtocolError::UnexpectedPacket(_))
    ));
}
