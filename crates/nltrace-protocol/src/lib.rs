//! nltrace-protocol: Wire protocol for the nltrace allocation tracer
//!
//! This crate defines the binary protocol spoken between an instrumented
//! native application and the trace engine over a local socket. Packets are
//! length-framed; the payload layouts are fixed-width packed structs dictated
//! by the native client, so all encoding here is done by hand with `bytes`
//! rather than through a serialization framework.

pub mod error;
pub mod event;
pub mod packet;
pub mod wire;

pub use error::ProtocolError;
pub use event::{AllocationInfo, PointerData, TraceEvent};
pub use packet::{CommandCode, Packet, PacketBody, PacketCodec, MAX_PACKET_SIZE};
pub use wire::{FUNCTION_FIELD, MAX_STACK_FRAMES, PATH_FIELD, SYMBOL_FIELD};
