//! Framing invariants exercised through the public API.

use std::io::Cursor;

use spokes_serve_core::{Packet, PacketError, PacketReader, PacketWriter};

#[test]
fn write_then_read_roundtrips_across_payload_sizes() {
    for size in [1usize, 2, 80, 999, 65516] {
        let payload = vec![b'p'; size];
        let mut wire = Vec::new();
        PacketWriter::new(&mut wire).write_packet(&payload).unwrap();

        let mut reader = PacketReader::new();
        let mut cursor = Cursor::new(wire);
        match reader.read(&mut cursor).unwrap() {
            Some(Packet::Data(data)) => assert_eq!(data, &payload[..], "size {size}"),
            other => panic!("size {size}: expected data, got {other:?}"),
        }
        assert!(reader.read(&mut cursor).unwrap().is_none());
    }
}

#[test]
fn a_session_of_packets_ends_at_the_flush() {
    let mut wire = Vec::new();
    {
        let mut writer = PacketWriter::new(&mut wire);
        writer.write_packet(b"first\n").unwrap();
        writer.write_packet(b"second\n").unwrap();
        writer.write_flush().unwrap();
    }

    let mut reader = PacketReader::new();
    let mut cursor = Cursor::new(wire);
    assert!(matches!(reader.read(&mut cursor).unwrap(), Some(Packet::Data(d)) if d == b"first\n"));
    assert!(matches!(reader.read(&mut cursor).unwrap(), Some(Packet::Data(d)) if d == b"second\n"));
    assert!(matches!(reader.read(&mut cursor).unwrap(), Some(Packet::Flush)));
    assert!(reader.read(&mut cursor).unwrap().is_none());
}

#[test]
fn error_taxonomy_matches_the_wire_contract() {
    let cases: &[(&str, fn(&PacketError) -> bool)] = &[
        ("01", |e| matches!(e, PacketError::UnexpectedEof)),
        ("0009sho", |e| matches!(e, PacketError::UnexpectedEof)),
        ("foob", |e| matches!(e, PacketError::MalformedLength(_))),
        ("0002", |e| matches!(e, PacketError::MalformedLength(_))),
        ("fff5payload", |e| matches!(e, PacketError::InvalidLength(_))),
    ];
    for (input, check) in cases {
        let mut reader = PacketReader::new();
        let mut cursor = Cursor::new(input.as_bytes().to_vec());
        let err = reader.read(&mut cursor).unwrap_err();
        assert!(check(&err), "{input:?} yielded {err:?}");
    }
}
