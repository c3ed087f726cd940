//! Simulated device state machine
//!
//! [`SimDevice`] implements the peer side of the line protocol purely in
//! memory: a zero-seeded register bank, the armed flag toggled by writes to
//! the arm/disarm addresses, and the per-tick capture reports emitted while
//! armed. It is synchronous and single-threaded; the async plumbing lives in
//! [`crate::device_task`].

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tlu_protocol::{RegisterCatalog, Reply, Request};

/// Timestamp units advanced per sampling tick
const TICKS_PER_SAMPLE: u32 = 50;

/// How far a channel latch moves between captures
const SAMPLE_STRIDE: u32 = 0x25;

/// Timing configuration for a simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Delay before acknowledging a persist request
    pub save_delay: Duration,
    /// Delay before acknowledging a register write
    pub write_delay: Duration,
    /// Background sampling tick period
    pub tick_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            save_delay: Duration::from_millis(100),
            write_delay: Duration::from_millis(10),
            tick_interval: Duration::from_millis(100),
        }
    }
}

/// The peer side of the protocol, in memory
#[derive(Debug)]
pub struct SimDevice {
    catalog: RegisterCatalog,
    config: SimConfig,
    /// Address -> value; seeded to zero for every catalog address, entries
    /// are never removed
    bank: HashMap<u8, u16>,
    armed: bool,
    /// Remaining capture reports before self-disarm (time-gated arms only)
    gates_left: Option<u32>,
    /// Running sample counter, advanced once per armed tick
    ticks: u32,
    /// Per-channel 32-bit sample latches
    latches: [u32; 16],
    arm_addr: Option<u8>,
    disarm_addr: Option<u8>,
    bit_cap_addr: Option<u8>,
    gate_sel_addr: Option<u8>,
    ngate_lo_addr: Option<u8>,
    ngate_hi_addr: Option<u8>,
}

impl SimDevice {
    /// Create a device with default timing
    pub fn new(catalog: RegisterCatalog) -> Self {
        Self::with_config(catalog, SimConfig::default())
    }

    /// Create a device with explicit timing
    pub fn with_config(catalog: RegisterCatalog, config: SimConfig) -> Self {
        let bank = catalog.addresses().map(|addr| (addr, 0)).collect();
        Self {
            bank,
            armed: false,
            gates_left: None,
            ticks: 0,
            latches: [0; 16],
            arm_addr: catalog.address_of("PC_ARM").ok(),
            disarm_addr: catalog.address_of("PC_DISARM").ok(),
            bit_cap_addr: catalog.address_of("PC_BIT_CAP").ok(),
            gate_sel_addr: catalog.address_of("PC_GATE_SEL").ok(),
            ngate_lo_addr: catalog.address_of("PC_GATE_NGATELO").ok(),
            ngate_hi_addr: catalog.address_of("PC_GATE_NGATEHI").ok(),
            catalog,
            config,
        }
    }

    /// The catalog this device was built from
    pub fn catalog(&self) -> &RegisterCatalog {
        &self.catalog
    }

    /// Timing configuration
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Whether a capture cycle is running
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Current bank value of an address, if configured
    pub fn register_value(&self, addr: u8) -> Option<u16> {
        self.bank.get(&addr).copied()
    }

    /// Simulated reply latency for a request line
    pub fn reply_delay(&self, line: &str) -> Duration {
        match Request::parse(line) {
            Ok(Request::Save) => self.config.save_delay,
            Ok(Request::Write { .. }) => self.config.write_delay,
            _ => Duration::ZERO,
        }
    }

    /// Handle one request line, producing the replies to send in order
    pub fn handle_line(&mut self, line: &str) -> Vec<Reply> {
        match Request::parse(line) {
            Err(_) => vec![Reply::BadRequest],
            Ok(Request::Save) => vec![Reply::SaveOk],
            Ok(Request::Literal(_)) => vec![Reply::BadRequest],
            Ok(Request::Read { addr }) => match self.bank.get(&addr) {
                Some(&value) => vec![Reply::Value { addr, value }],
                None => vec![Reply::UnknownRead { addr }],
            },
            Ok(Request::Write { addr, value }) => {
                if !self.bank.contains_key(&addr) {
                    return vec![Reply::UnknownWrite { addr }];
                }
                self.bank.insert(addr, value);

                let mut replies = Vec::new();
                if Some(addr) == self.arm_addr {
                    self.arm();
                    replies.push(Reply::CaptureStart);
                } else if Some(addr) == self.disarm_addr {
                    self.armed = false;
                    self.gates_left = None;
                    replies.push(Reply::CaptureEnd);
                }
                replies.push(Reply::WriteOk { addr });
                replies
            }
        }
    }

    /// One background sampling tick.
    ///
    /// While armed, emits a capture report: 8-hex timestamp plus one 8-hex
    /// sample per set bit of the capture mask, ascending bit order. A
    /// time-gated arm disarms itself after its last report and appends the
    /// capture-end marker.
    pub fn tick(&mut self) -> Vec<Reply> {
        if !self.armed {
            return Vec::new();
        }

        let timestamp = self.ticks.wrapping_mul(TICKS_PER_SAMPLE);
        self.ticks = self.ticks.wrapping_add(1);

        let mask = self.bank_value(self.bit_cap_addr);
        let mut samples = Vec::new();
        for bit in 0..16 {
            if (mask >> bit) & 1 == 1 {
                samples.push(self.latches[bit]);
                self.latches[bit] = self.latches[bit].wrapping_add(SAMPLE_STRIDE * (bit + 1) as u32);
            }
        }

        let mut out = vec![Reply::Capture { timestamp, samples }];
        if let Some(left) = &mut self.gates_left {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.armed = false;
                self.gates_left = None;
                out.push(Reply::CaptureEnd);
            }
        }
        out
    }

    fn arm(&mut self) {
        self.armed = true;
        // A time-gated capture emits a bounded number of reports; any other
        // gate source runs until an explicit disarm.
        self.gates_left = if self.bank_value(self.gate_sel_addr) == 1 {
            let gates = u32::from(self.bank_value(self.ngate_lo_addr))
                | u32::from(self.bank_value(self.ngate_hi_addr)) << 16;
            Some(gates.max(1))
        } else {
            None
        };
    }

    fn bank_value(&self, addr: Option<u8>) -> u16 {
        addr.and_then(|a| self.bank.get(&a)).copied().unwrap_or(0)
    }
}
