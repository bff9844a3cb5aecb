#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions of the value codec, framing and blocking receive loop

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use wirekit::core::codec::FrameCodec;
use wirekit::core::formatter::{EncryptionFormatter, Formatter};
use wirekit::core::reducer::{Fields, Layout, Reducer};
use wirekit::core::stream::{StreamReader, StreamWriter};
use wirekit::core::value::{Flags, Value, ValueKind};
use wirekit::error::{ProtocolError, Result};
use wirekit::protocol::network::{NetworkReader, NetworkWriter, Protocol};
use wirekit::protocol::packet::{Disconnect, Packet};
use wirekit::protocol::registry::{PacketRegistry, DISCONNECT_ID};

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
        vec![self.name.as_str().into(), self.id.into(), self.is_admin.into()]
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

fn admin() -> Account {
    Account {
        name: "Admin".to_string(),
        id: 6,
        is_admin: true,
    }
}

fn protocol() -> Protocol {
    let registry = Arc::new(PacketRegistry::new());
    registry.register::<Account>().unwrap();
    Protocol::new(registry)
}

fn write_packets(protocol: &Protocol, packets: &[&dyn wirekit::protocol::packet::AnyPacket]) -> Vec<u8> {
    let mut writer = NetworkWriter::new(Vec::new(), protocol.clone(), false);
    for packet in packets {
        writer.send(*packet).unwrap();
    }
    writer.close().unwrap()
}

// ============================================================================
// END-TO-END PACKETS
// ============================================================================

#[test]
fn test_account_round_trip_plain_and_encrypted() {
    let plain = protocol();
    let (cipher, _, _) = EncryptionFormatter::generate().unwrap();
    let encrypted = protocol().with_formatter(Arc::new(cipher));

    for protocol in [plain, encrypted] {
        let wire = write_packets(&protocol, &[&admin()]);
        let mut reader = NetworkReader::new(Cursor::new(wire), protocol, true);
        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.downcast_ref::<Account>(), Some(&admin()));
    }
}

#[test]
fn test_disconnect_is_builtin() {
    let protocol = protocol();
    assert_eq!(protocol.registry().id_of::<Disconnect>().unwrap(), DISCONNECT_ID);
    assert_eq!(protocol.registry().id_of::<Account>().unwrap(), 1);

    let body = protocol.encode(&Disconnect::new(b"bye".to_vec())).unwrap();
    assert_eq!(&body[..4], &0u32.to_le_bytes());
    let packet = protocol.decode(&body).unwrap();
    assert_eq!(packet.downcast_ref::<Disconnect>().unwrap().reason, b"bye");
}

#[test]
fn test_register_twice_keeps_identifier() {
    let registry = PacketRegistry::empty();
    let first = registry.register::<Account>().unwrap();
    let layout = registry.format_of(first).unwrap();
    assert_eq!(registry.register::<Account>().unwrap(), first);
    assert_eq!(registry.format_of(first).unwrap(), layout);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_unregistered_packet_write_is_configuration_error() {
    let protocol = Protocol::new(Arc::new(PacketRegistry::empty()));
    assert!(matches!(
        protocol.encode(&admin()),
        Err(ProtocolError::Configuration(_))
    ));
}

// ============================================================================
// RECEIVE LOOP
// ============================================================================

#[test]
fn test_truncated_transport_fails_while_open() {
    let protocol = protocol();
    let mut wire = write_packets(&protocol, &[&admin(), &admin()]);
    wire.truncate(wire.len() - 3);

    let mut received = 0;
    let mut reader = NetworkReader::new(Cursor::new(wire), protocol, true);
    let ok = reader.run(
        || false,
        |_| {
            received += 1;
            Ok(std::ops::ControlFlow::Continue(()))
        },
    );
    assert!(!ok);
    assert_eq!(received, 1);
}

#[test]
fn test_truncated_transport_succeeds_once_closed() {
    let protocol = protocol();
    let mut wire = write_packets(&protocol, &[&admin()]);
    wire.truncate(wire.len() - 1);

    let closed = AtomicBool::new(false);
    let mut reader = NetworkReader::new(Cursor::new(wire), protocol, true);
    // The close lands while the read is in flight: the first check sees open,
    // the check after the failed read sees closed.
    let ok = reader.run(
        || closed.swap(true, Ordering::SeqCst),
        |_| Ok(std::ops::ControlFlow::Continue(())),
    );
    assert!(ok);
}

#[test]
fn test_clean_end_of_stream_is_failure_when_not_closed() {
    let protocol = protocol();
    let mut reader = NetworkReader::new(Cursor::new(Vec::new()), protocol, true);
    let err = reader
        .run_session(|| false, |_| Ok(std::ops::ControlFlow::Continue(())))
        .unwrap_err();
    assert!(err.is_truncation());
}

#[test]
fn test_oversized_frame_rejected_before_allocation() {
    let mut wire = u32::MAX.to_le_bytes().to_vec();
    wire.extend_from_slice(&[0u8; 8]);
    let mut reader =
        NetworkReader::new(Cursor::new(wire), protocol(), true).with_max_frame_size(1024);
    assert!(matches!(
        reader.read_packet(),
        Err(ProtocolError::OversizedFrame(n)) if n == u32::MAX as usize
    ));
}

#[test]
fn test_unknown_identifier() {
    let mut wire = 4u32.to_le_bytes().to_vec();
    wire.extend_from_slice(&99u32.to_le_bytes());
    let mut reader = NetworkReader::new(Cursor::new(wire), protocol(), true);
    assert!(matches!(
        reader.read_packet(),
        Err(ProtocolError::UnknownPacketId(99))
    ));
}

#[test]
fn test_wrong_key_is_format_error() {
    let (sender, _, _) = EncryptionFormatter::generate().unwrap();
    let (receiver, _, _) = EncryptionFormatter::generate().unwrap();
    let wire = write_packets(&protocol().with_formatter(Arc::new(sender)), &[&admin()]);

    let mut reader = NetworkReader::new(
        Cursor::new(wire),
        protocol().with_formatter(Arc::new(receiver)),
        true,
    );
    let err = reader.read_packet().unwrap_err();
    assert!(err.is_format());
    assert!(!err.is_truncation());
}

// ============================================================================
// VALUES AND STREAMS
// ============================================================================

#[test]
fn test_bool_and_flags_encoding() {
    assert_eq!(Value::Bool(true).encode().unwrap(), vec![0x80]);
    assert_eq!(Value::Bool(false).encode().unwrap(), vec![0x00]);

    let flags = Flags::new([true, false, false, false, false, false, false, true]);
    assert_eq!(Value::Flags(flags).encode().unwrap(), vec![0b1000_0001]);
    assert_eq!(
        ValueKind::Flags.decode(&[0b0100_0000]).unwrap(),
        Value::Flags(Flags::new([false, true, false, false, false, false, false, false]))
    );
}

#[test]
fn test_fixed_decode_length_must_match() {
    assert!(ValueKind::U32.decode(&[1, 2, 3]).unwrap_err().is_truncation());
    assert!(matches!(
        ValueKind::U16.decode(&[1, 2, 3]),
        Err(ProtocolError::TrailingBytes(1))
    ));
}

#[test]
fn test_invalid_utf8_text() {
    assert!(matches!(
        ValueKind::Text.decode(&[0xFF, 0xFE]),
        Err(ProtocolError::InvalidUtf8)
    ));
}

#[test]
fn test_writer_after_close() {
    let mut writer = StreamWriter::new(Vec::new(), false);
    writer.write_u32(1);
    assert!(writer.close().is_some());
    assert!(writer.close().is_none());
    assert!(matches!(
        writer.flush_frame(None),
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[test]
fn test_nested_block_with_formatter() {
    let cipher: Arc<dyn Formatter> = Arc::new(EncryptionFormatter::new(&[7u8; 32], [9u8; 24]));
    let mut writer = StreamWriter::new(Vec::new(), false);
    writer.write_u8(0xAA);
    writer
        .encode_block(Some(cipher.as_ref()), |w| w.write_text("hidden"))
        .unwrap();
    writer.flush_frame(None).unwrap();
    let wire = writer.close().unwrap();

    let mut reader = StreamReader::new(Cursor::new(wire), true);
    reader.read_frame(None).unwrap();
    assert_eq!(reader.read_u8().unwrap(), 0xAA);
    let text = reader
        .decode_block(Some(cipher.as_ref()), |r| r.read_text())
        .unwrap();
    assert_eq!(text, "hidden");
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn test_frame_codec_waits_for_whole_frame() {
    let mut codec = FrameCodec::new(64);
    let mut buf = BytesMut::from(&[3u8, 0, 0, 0, b'a'][..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(b"bc");
    assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"abc");
    assert!(buf.is_empty());

    let mut huge = BytesMut::from(&[65u8, 0, 0, 0][..]);
    assert!(matches!(
        codec.decode(&mut huge),
        Err(ProtocolError::OversizedFrame(65))
    ));
}
