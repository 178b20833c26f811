//! Base port allocation for agent workloads.
//!
//! Candidates rotate through `[base, base + span)`. Each candidate block is
//! probed with a throwaway bind; nothing is reserved, so another process may
//! take a port between the probe and its use by the runtime.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use fleet_core::config::AgentConfig;

#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    span: u16,
    attempts: u32,
    cursor: AtomicU32,
}

impl PortAllocator {
    pub fn new(base: u16, span: u16, attempts: u32) -> Self {
        Self {
            base,
            span: span.max(1),
            attempts: attempts.max(1),
            cursor: AtomicU32::new(0),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.port_base, config.port_span, config.port_attempts)
    }

    /// Pick a base port for `block` consecutive ports.
    ///
    /// Falls back to the last candidate when every attempt finds a port in use.
    pub fn allocate(&self, block: u16) -> u16 {
        let block = block.max(1);
        let slots = u32::from(self.span.saturating_sub(block)) + 1;
        let mut candidate = self.base;

        for attempt in 0..self.attempts {
            let offset = self.cursor.fetch_add(u32::from(block), Ordering::Relaxed) % slots;
            // offset < span, so it fits in u16
            candidate = self.base.saturating_add(offset as u16);
            if block_is_free(candidate, block) {
                debug!(port = candidate, block, attempt, "allocated base port");
                return candidate;
            }
        }

        warn!(
            port = candidate,
            block,
            attempts = self.attempts,
            "no free port block found, using last candidate"
        );
        candidate
    }
}

fn block_is_free(start: u16, block: u16) -> bool {
    (0..block).all(|i| match start.checked_add(i) {
        Some(port) => TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok(),
        None => false,
    })
}
