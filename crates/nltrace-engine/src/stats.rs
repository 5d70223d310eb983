//! Running allocation statistics
//!
//! Mirrors the live allocations of the connected client: one entry per
//! outstanding block keyed by address, plus running totals. Reset whenever a
//! new client connects, since trace clocks and addresses are per-process.

use std::collections::HashMap;

use nltrace_protocol::TraceEvent;

/// Live allocation totals derived from the event stream
#[derive(Debug, Default)]
pub struct AllocationStats {
    live: HashMap<u64, u64>,
    live_bytes: u64,
}

impl AllocationStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the totals
    pub fn apply(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::Connected => {
                self.live.clear();
                self.live_bytes = 0;
            }
            TraceEvent::Disconnected => {}
            TraceEvent::AllocationAdded(info) => {
                if let Some(previous) = self.live.insert(info.address, info.size) {
                    // Same address allocated twice without a removal; keep
                    // the totals consistent with the map
                    tracing::warn!(address = format_args!("{:#x}", info.address),
                        "Allocation reported twice without removal");
                    self.live_bytes -= previous;
                }
                self.live_bytes += info.size;
            }
            TraceEvent::AllocationRemoved { address } => {
                if let Some(size) = self.live.remove(address) {
                    self.live_bytes -= size;
                }
            }
        }
    }

    /// Number of live allocations
    pub fn count(&self) -> usize {
        self.live.len()
    }

    /// Total bytes held by live allocations
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }
}

/// Format a byte count with a binary unit suffix
pub fn format_bytes(size: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", size)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nltrace_protocol::AllocationInfo;

    fn add(address: u64, size: u64) -> TraceEvent {
        TraceEvent::AllocationAdded(AllocationInfo {
            time: 0.0,
            filename: "test.cpp".to_string(),
            line: 1,
            function: "Alloc".to_string(),
            address,
            size,
            stack: vec![],
        })
    }

    #[test]
    fn test_add_remove_returns_to_zero() {
        let mut stats = AllocationStats::new();
        stats.apply(&add(0xCCDA_23AF_38D9_040D, 128));
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.live_bytes(), 128);

        stats.apply(&TraceEvent::AllocationRemoved {
            address: 0xCCDA_23AF_38D9_040D,
        });
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn test_connect_resets() {
        let mut stats = AllocationStats::new();
        stats.apply(&add(0x1, 64));
        stats.apply(&add(0x2, 32));
        assert_eq!(stats.live_bytes(), 96);

        stats.apply(&TraceEvent::Connected);
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn test_unknown_removal_ignored() {
        let mut stats = AllocationStats::new();
        stats.apply(&TraceEvent::AllocationRemoved { address: 0x99 });
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn test_duplicate_address_replaces() {
        let mut stats = AllocationStats::new();
        stats.apply(&add(0x1, 64));
        stats.apply(&add(0x1, 16));
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.live_bytes(), 16);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(1024 * 1024 * 3 / 2), "1.50 MB");
    }
}
