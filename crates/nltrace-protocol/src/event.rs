//! Trace event model
//!
//! Inbound notifications from the traced application, parsed from packet
//! payloads. `Connected` and `Disconnected` are synthesized by the transport;
//! the allocation variants come off the wire.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::wire::{
    ensure_remaining, get_fixed_str, put_fixed_str, FUNCTION_FIELD, MAX_STACK_FRAMES, PATH_FIELD,
    SYMBOL_FIELD,
};

/// An event produced by the trace transport, consumed via the event queue
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A client connected to the endpoint
    Connected,
    /// The client disconnected (gracefully or after a fatal protocol error)
    Disconnected,
    /// The client recorded a new allocation
    AllocationAdded(AllocationInfo),
    /// The client released the allocation at `address`
    AllocationRemoved { address: u64 },
}

impl TraceEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::Connected => "connected",
            TraceEvent::Disconnected => "disconnected",
            TraceEvent::AllocationAdded(_) => "allocation-added",
            TraceEvent::AllocationRemoved { .. } => "allocation-removed",
        }
    }
}

/// One recorded allocation with its capture site and call stack
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationInfo {
    /// Seconds since the client's trace clock started
    pub time: f64,
    /// Source file of the allocation site
    pub filename: String,
    /// Source line of the allocation site
    pub line: i32,
    /// Function containing the allocation site
    pub function: String,
    /// Address of the allocated block, the identity key for removal
    pub address: u64,
    /// Size of the block in bytes
    pub size: u64,
    /// Return addresses of the capturing stack, outermost last
    pub stack: Vec<u64>,
}

impl AllocationInfo {
    /// Exact payload size on the wire: time, path, line, function, address,
    /// size, 32 stack slots, frame count.
    pub const WIRE_SIZE: usize =
        8 + PATH_FIELD + 4 + FUNCTION_FIELD + 8 + 8 + MAX_STACK_FRAMES * 8 + 2;

    /// Parse an AddAllocation payload.
    ///
    /// The layout is fixed-width by design: all 32 stack slots are always
    /// present and the trailing frame count says how many are meaningful, so
    /// the sender never has to compute variable offsets.
    pub fn parse(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure_remaining(&*buf, Self::WIRE_SIZE)?;

        let time = buf.get_f64_le();
        let filename = get_fixed_str(buf, PATH_FIELD)?;
        let line = buf.get_i32_le();
        let function = get_fixed_str(buf, FUNCTION_FIELD)?;
        let address = buf.get_u64_le();
        let size = buf.get_u64_le();

        let mut slots = [0u64; MAX_STACK_FRAMES];
        for slot in slots.iter_mut() {
            *slot = buf.get_u64_le();
        }

        let frames = buf.get_u16_le();
        if frames as usize > MAX_STACK_FRAMES {
            return Err(ProtocolError::InvalidFrameCount(frames));
        }

        Ok(Self {
            time,
            filename,
            line,
            function,
            address,
            size,
            stack: slots[..frames as usize].to_vec(),
        })
    }

    /// Encode this allocation as an AddAllocation payload (the client side of
    /// the wire; the engine uses it in tests to simulate a traced process).
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.stack.len() > MAX_STACK_FRAMES {
            return Err(ProtocolError::InvalidFrameCount(self.stack.len() as u16));
        }

        dst.reserve(Self::WIRE_SIZE);
        dst.put_f64_le(self.time);
        put_fixed_str(dst, &self.filename, PATH_FIELD)?;
        dst.put_i32_le(self.line);
        put_fixed_str(dst, &self.function, FUNCTION_FIELD)?;
        dst.put_u64_le(self.address);
        dst.put_u64_le(self.size);

        for i in 0..MAX_STACK_FRAMES {
            dst.put_u64_le(self.stack.get(i).copied().unwrap_or(0));
        }
        dst.put_u16_le(self.stack.len() as u16);
        Ok(())
    }
}

/// Resolved symbol information for an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerData {
    /// The queried address, echoed back by the client
    pub address: u64,
    /// Human-readable function name containing the address
    pub function: String,
}

impl PointerData {
    /// Parse a symbol query response payload: address echo, then a 256-byte
    /// null-terminated function name.
    pub fn parse(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure_remaining(&*buf, 8 + SYMBOL_FIELD)?;
        let address = buf.get_u64_le();
        let function = get_fixed_str(buf, SYMBOL_FIELD)?;
        Ok(Self { address, function })
    }

    /// Encode a symbol query response payload
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(8 + SYMBOL_FIELD);
        dst.put_u64_le(self.address);
        put_fixed_str(dst, &self.function, SYMBOL_FIELD)?;
        Ok(())
    }
}
