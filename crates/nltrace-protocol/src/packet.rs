//! Packet framing and parsing
//!
//! Every packet travels length-framed over the byte stream:
//! a 4-byte little-endian payload length, then the packet bytes.
//!
//! Inbound packet bytes (client -> engine) start with an 8-byte sequence
//! number and a 4-byte command code, followed by a command-specific payload.
//! Outbound query packets (engine -> client) carry no sequence number: just
//! the command code, the request id, and the queried address.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::event::{AllocationInfo, PointerData, TraceEvent};
use crate::wire::ensure_remaining;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum packet size (the original engine's read buffer size)
pub const MAX_PACKET_SIZE: usize = 65536;

/// Command codes carried in the packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CommandCode {
    /// Client recorded an allocation
    AddAllocation = 0,
    /// Client released an allocation
    RemoveAllocation = 1,
    /// Client answered an outstanding symbol query
    QueryResponse = 2,
    /// Engine asks the client to resolve a function symbol (outbound only)
    QueryPointerData = 3,
}

impl CommandCode {
    /// Convert to the wire representation
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Convert from the wire representation
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::AddAllocation),
            1 => Some(Self::RemoveAllocation),
            2 => Some(Self::QueryResponse),
            3 => Some(Self::QueryPointerData),
            _ => None,
        }
    }
}

/// A parsed inbound packet
#[derive(Debug, Clone)]
pub struct Packet {
    /// Sequence number embedded by the client
    pub sequence: i64,
    /// The decoded command payload
    pub body: PacketBody,
}

/// Command payload of an inbound packet
#[derive(Debug, Clone)]
pub enum PacketBody {
    /// An allocation event to enqueue for the consumer
    Event(TraceEvent),
    /// An out-of-band response to a previously issued query
    QueryResponse {
        /// Identifier assigned by the request correlator
        request_id: u64,
        /// Response-specific payload, handed to the correlator unparsed
        payload: Bytes,
    },
}

impl Packet {
    /// Parse a raw inbound packet, validating its sequence number.
    ///
    /// `expected_sequence` is the value of the per-connection packet counter
    /// after being incremented for this packet; any other embedded value
    /// means the stream is desynchronized, which is fatal for the
    /// connection.
    pub fn parse(mut bytes: Bytes, expected_sequence: i64) -> Result<Self, ProtocolError> {
        ensure_remaining(&bytes, 8 + 4)?;

        let sequence = bytes.get_i64_le();
        if sequence != expected_sequence {
            return Err(ProtocolError::SequenceMismatch {
                expected: expected_sequence,
                received: sequence,
            });
        }

        let command = bytes.get_i32_le();
        let body = match CommandCode::from_i32(command) {
            Some(CommandCode::AddAllocation) => {
                PacketBody::Event(TraceEvent::AllocationAdded(AllocationInfo::parse(
                    &mut bytes,
                )?))
            }
            Some(CommandCode::RemoveAllocation) => {
                ensure_remaining(&bytes, 8)?;
                PacketBody::Event(TraceEvent::AllocationRemoved {
                    address: bytes.get_u64_le(),
                })
            }
            Some(CommandCode::QueryResponse) => {
                ensure_remaining(&bytes, 8)?;
                let request_id = bytes.get_u64_le();
                PacketBody::QueryResponse {
                    request_id,
                    payload: bytes,
                }
            }
            // QueryPointerData is outbound-only; receiving it is a violation
            Some(CommandCode::QueryPointerData) | None => {
                return Err(ProtocolError::UnknownCommand(command));
            }
        };

        Ok(Self { sequence, body })
    }
}

/// Encode an outbound symbol query packet (without the length prefix)
pub fn encode_pointer_query(request_id: u64, address: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 8 + 8);
    buf.put_i32_le(CommandCode::QueryPointerData.as_i32());
    buf.put_u64_le(request_id);
    buf.put_u64_le(address);
    buf.freeze()
}

/// Encode an inbound AddAllocation packet, playing the client's role
/// (used by tests and tooling simulating a traced process)
pub fn encode_add_allocation(sequence: i64, info: &AllocationInfo) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(8 + 4 + AllocationInfo::WIRE_SIZE);
    buf.put_i64_le(sequence);
    buf.put_i32_le(CommandCode::AddAllocation.as_i32());
    info.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Encode an inbound RemoveAllocation packet, playing the client's role
pub fn encode_remove_allocation(sequence: i64, address: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + 4 + 8);
    buf.put_i64_le(sequence);
    buf.put_i32_le(CommandCode::RemoveAllocation.as_i32());
    buf.put_u64_le(address);
    buf.freeze()
}

/// Encode an inbound symbol query response packet, playing the client's role
pub fn encode_query_response(
    sequence: i64,
    request_id: u64,
    data: &PointerData,
) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(8 + 4 + 8 + 8 + crate::wire::SYMBOL_FIELD);
    buf.put_i64_le(sequence);
    buf.put_i32_le(CommandCode::QueryResponse.as_i32());
    buf.put_u64_le(request_id);
    data.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Codec for length-framed raw packets
///
/// Decoding yields the packet bytes with the length prefix stripped; parsing
/// of the packet header and payload is layered above in [`Packet::parse`] so
/// the connection manager can account for sequence numbers itself.
#[derive(Debug, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek the length without consuming, in case the payload is short
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size: len,
                max: MAX_PACKET_SIZE,
            });
        }

        if src.len() < LENGTH_PREFIX_SIZE + len {
            src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
            return Ok(None);
        }

        tracing::trace!(len, "Decoded packet frame");
        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if packet.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size: packet.len(),
                max: MAX_PACKET_SIZE,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + packet.len());
        dst.put_u32_le(packet.len() as u32);
        dst.extend_from_slice(&packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_allocation() -> AllocationInfo {
        AllocationInfo {
            time: 1.5,
            filename: "alloc.cpp".to_string(),
            line: 42,
            function: "operator new".to_string(),
            address: 0xDEAD_BEEF,
            size: 64,
            stack: vec![0x10, 0x20],
        }
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = PacketCodec::new();
        let packet = encode_remove_allocation(1, 0x1234);

        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + packet.len());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = PacketCodec::new();
        let packet = encode_remove_allocation(1, 0x1234);

        let mut full = BytesMut::new();
        codec.encode(packet.clone(), &mut full).unwrap();

        // Deliver everything but the last byte
        let mut partial = full.split_to(full.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_codec_oversized_packet() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32_le((MAX_PACKET_SIZE + 1) as u32);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn test_parse_add_allocation_packet() {
        let info = sample_allocation();
        let bytes = encode_add_allocation(7, &info).unwrap();

        let packet = Packet::parse(bytes, 7).unwrap();
        assert_eq!(packet.sequence, 7);
        match packet.body {
            PacketBody::Event(TraceEvent::AllocationAdded(parsed)) => assert_eq!(parsed, info),
            other => panic!("Expected AllocationAdded, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_remove_allocation_packet() {
        let bytes = encode_remove_allocation(2, 0xCCDA_23AF_38D9_040D);

        let packet = Packet::parse(bytes, 2).unwrap();
        match packet.body {
            PacketBody::Event(TraceEvent::AllocationRemoved { address }) => {
                assert_eq!(address, 0xCCDA_23AF_38D9_040D);
            }
            other => panic!("Expected AllocationRemoved, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_query_response_packet() {
        let data = PointerData {
            address: 0x1000,
            function: "main".to_string(),
        };
        let bytes = encode_query_response(3, 9, &data).unwrap();

        let packet = Packet::parse(bytes, 3).unwrap();
        match packet.body {
            PacketBody::QueryResponse {
                request_id,
                mut payload,
            } => {
                assert_eq!(request_id, 9);
                assert_eq!(PointerData::parse(&mut payload).unwrap(), data);
            }
            other => panic!("Expected QueryResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_sequence_mismatch() {
        let bytes = encode_remove_allocation(5, 0x1000);
        assert!(matches!(
            Packet::parse(bytes, 4),
            Err(ProtocolError::SequenceMismatch {
                expected: 4,
                received: 5
            })
        ));
    }

    #[test]
    fn test_parse_in_order_stream() {
        for seq in 1..=10 {
            let bytes = encode_remove_allocation(seq, 0x1000 + seq as u64);
            assert!(Packet::parse(bytes, seq).is_ok());
        }
    }

    #[test]
    fn test_parse_unknown_command() {
        let mut buf = BytesMut::new();
        buf.put_i64_le(1);
        buf.put_i32_le(99);
        assert!(matches!(
            Packet::parse(buf.freeze(), 1),
            Err(ProtocolError::UnknownCommand(99))
        ));
    }

    #[test]
    fn test_parse_outbound_command_rejected_inbound() {
        let mut buf = BytesMut::new();
        buf.put_i64_le(1);
        buf.put_i32_le(CommandCode::QueryPointerData.as_i32());
        buf.put_u64_le(9);
        buf.put_u64_le(0x1000);
        assert!(matches!(
            Packet::parse(buf.freeze(), 1),
            Err(ProtocolError::UnknownCommand(3))
        ));
    }

    #[test]
    fn test_command_code_roundtrip() {
        for code in [
            CommandCode::AddAllocation,
            CommandCode::RemoveAllocation,
            CommandCode::QueryResponse,
            CommandCode::QueryPointerData,
        ] {
            assert_eq!(CommandCode::from_i32(code.as_i32()), Some(code));
        }
        assert_eq!(CommandCode::from_i32(42), None);
    }

    #[test]
    fn test_pointer_query_layout() {
        let mut bytes = encode_pointer_query(11, 0xABCD);
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes.get_i32_le(), 3);
        assert_eq!(bytes.get_u64_le(), 11);
        assert_eq!(bytes.get_u64_le(), 0xABCD);
    }
}
