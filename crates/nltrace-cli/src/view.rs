//! Headless trace view
//!
//! Consumes drained events: prints one line per allocation change, keeps
//! running totals, and resolves call-stack symbols through the engine's
//! query path. Symbols are cached per connection, since addresses only mean
//! something within one client process.

use std::collections::HashMap;

use nltrace_engine::stats::format_bytes;
use nltrace_engine::{AllocationStats, TraceServer};
use nltrace_protocol::{PointerData, TraceEvent};

pub struct TraceView {
    stats: AllocationStats,
    symbols: HashMap<u64, PointerData>,
}

impl TraceView {
    pub fn new() -> Self {
        Self {
            stats: AllocationStats::new(),
            symbols: HashMap::new(),
        }
    }

    /// Process one event from the drain cycle
    pub async fn handle_event(&mut self, server: &TraceServer, event: TraceEvent) {
        self.stats.apply(&event);

        match event {
            TraceEvent::Connected => {
                self.symbols.clear();
                println!("--- client connected ---");
            }
            TraceEvent::Disconnected => {
                println!("--- client disconnected ---");
            }
            TraceEvent::AllocationAdded(info) => {
                println!(
                    "{:>10.3}  {}:{}  {}  {:#018x} ({})",
                    info.time,
                    info.filename,
                    info.line,
                    info.function,
                    info.address,
                    format_bytes(info.size),
                );

                for (depth, frame) in info.stack.iter().enumerate() {
                    if let Some(symbol) = self.resolve(server, *frame).await {
                        tracing::debug!(
                            depth,
                            frame = format_args!("{:#x}", frame),
                            function = %symbol.function,
                            "Stack frame"
                        );
                    }
                }
                self.print_totals();
            }
            TraceEvent::AllocationRemoved { address } => {
                println!("{:>10}  freed {:#018x}", "", address);
                self.print_totals();
            }
        }
    }

    fn print_totals(&self) {
        println!(
            "{:>10}  {} live allocations, {}",
            "",
            self.stats.count(),
            format_bytes(self.stats.live_bytes()),
        );
    }

    /// Resolve a symbol via the cache, querying the client on a miss
    async fn resolve(&mut self, server: &TraceServer, address: u64) -> Option<PointerData> {
        if let Some(data) = self.symbols.get(&address) {
            return Some(data.clone());
        }

        match server.resolve_pointer(address).await {
            Ok(data) => {
                tracing::debug!(
                    address = format_args!("{:#x}", address),
                    function = %data.function,
                    "Resolved function pointer"
                );
                self.symbols.insert(address, data.clone());
                Some(data)
            }
            Err(e) => {
                tracing::warn!("Failed to resolve {:#x}: {}", address, e);
                None
            }
        }
    }
}
