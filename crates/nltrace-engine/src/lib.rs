//! nltrace-engine: IPC transport and event engine for the nltrace tracer
//!
//! A long-lived `TraceServer` owns a loopback listening endpoint that an
//! instrumented native application connects to, streaming allocation events
//! and answering symbol queries. Parsed events accumulate in a thread-safe
//! queue that a single external consumer drains on its own poll cadence;
//! symbol queries go through a request correlator that matches out-of-band
//! responses back to waiting callers.

pub mod config;
pub mod correlator;
pub mod error;
pub mod queue;
pub mod server;
pub mod stats;

pub use config::EngineConfig;
pub use correlator::RequestCorrelator;
pub use error::EngineError;
pub use queue::EventQueue;
pub use server::{ConnectionState, EventHandler, TraceServer};
pub use stats::AllocationStats;
