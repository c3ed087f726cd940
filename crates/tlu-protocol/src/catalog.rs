//! Register catalog
//!
//! Static metadata for every addressable register on the unit, parsed from a
//! descriptor source in the firmware register-map format:
//!
//! ```text
//! /* comments are block-delimited and stripped before parsing */
//! { "PC_ARM",  0x8B, cmd },
//! { "SOFT_IN", 0x7F, rw },
//! ```
//!
//! The catalog provides bidirectional name/address lookup, value-kind
//! tagging, and the ordered system-bus signal table shared by multiplexer
//! encoding and status-bit lookup. Register and signal name lookups are
//! case-insensitive.

use std::collections::{BTreeMap, HashMap};

use crate::error::{ClientError, ParseError};

/// The embedded production register map
const STANDARD_MAP: &str = include_str!("../data/regmap.def");

/// How a register's 16-bit value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegKind {
    /// Plain read/write setting
    ReadWrite,
    /// Read-only status or version value
    ReadOnly,
    /// Write-triggered command (reads back nothing useful)
    Command,
    /// Selects a system-bus signal by index
    Mux,
}

impl RegKind {
    fn from_tag(tag: &str) -> Result<Self, ParseError> {
        match tag {
            "rw" => Ok(RegKind::ReadWrite),
            "ro" => Ok(RegKind::ReadOnly),
            "cmd" => Ok(RegKind::Command),
            "mux" => Ok(RegKind::Mux),
            other => Err(ParseError::UnknownKind(other.to_string())),
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDescriptor {
    /// Symbolic name, unique across the catalog
    pub name: String,
    /// Register address, unique across the catalog
    pub addr: u8,
    /// Value interpretation
    pub kind: RegKind,
}

/// The ordered system-bus signal table. Position is the bus index, shared by
/// multiplexer value encoding and status-word bit lookup.
pub const SYSTEM_BUS: [&str; 64] = [
    "DISCONNECT",
    "IN1_TTL",
    "IN1_NIM",
    "IN1_LVDS",
    "IN2_TTL",
    "IN2_NIM",
    "IN2_LVDS",
    "IN3_TTL",
    "IN3_OC",
    "IN3_LVDS",
    "IN4_TTL",
    "IN4_CMP",
    "IN4_PECL",
    "IN5_ENCA",
    "IN5_ENCB",
    "IN5_ENCZ",
    "IN5_CONN",
    "IN6_ENCA",
    "IN6_ENCB",
    "IN6_ENCZ",
    "IN6_CONN",
    "IN7_ENCA",
    "IN7_ENCB",
    "IN7_ENCZ",
    "IN7_CONN",
    "IN8_ENCA",
    "IN8_ENCB",
    "IN8_ENCZ",
    "IN8_CONN",
    "PC_ARM",
    "PC_GATE",
    "PC_PULSE",
    "AND1",
    "AND2",
    "AND3",
    "AND4",
    "OR1",
    "OR2",
    "OR3",
    "OR4",
    "GATE1",
    "GATE2",
    "GATE3",
    "GATE4",
    "DIV1_OUTD",
    "DIV2_OUTD",
    "DIV3_OUTD",
    "DIV4_OUTD",
    "DIV1_OUTN",
    "DIV2_OUTN",
    "DIV3_OUTN",
    "DIV4_OUTN",
    "PULSE1",
    "PULSE2",
    "PULSE3",
    "PULSE4",
    "QUAD_OUTA",
    "QUAD_OUTB",
    "CLOCK_1KHZ",
    "CLOCK_1MHZ",
    "SOFT_IN1",
    "SOFT_IN2",
    "SOFT_IN3",
    "SOFT_IN4",
];

/// Parsed register metadata with bidirectional lookup
#[derive(Debug, Clone)]
pub struct RegisterCatalog {
    by_addr: BTreeMap<u8, RegisterDescriptor>,
    /// Upper-cased name -> address
    by_name: HashMap<String, u8>,
}

impl RegisterCatalog {
    /// Parse a descriptor source.
    ///
    /// Block comments are stripped first; every remaining non-blank line must
    /// be a `{ "NAME", 0xNN, kind }` entry (trailing comma optional).
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let stripped = strip_block_comments(source)?;

        let mut by_addr = BTreeMap::new();
        let mut by_name = HashMap::new();
        for line in stripped.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry = parse_entry(line)?;
            let key = entry.name.to_ascii_uppercase();
            if by_name.contains_key(&key) {
                return Err(ParseError::DuplicateName(entry.name));
            }
            if by_addr.contains_key(&entry.addr) {
                return Err(ParseError::DuplicateAddress(entry.addr));
            }
            by_name.insert(key, entry.addr);
            by_addr.insert(entry.addr, entry);
        }
        Ok(Self { by_addr, by_name })
    }

    /// The built-in production register map
    pub fn standard() -> Self {
        // Validated by a unit test; the embedded map cannot fail to parse.
        Self::parse(STANDARD_MAP).expect("embedded register map is well-formed")
    }

    /// Address of a symbolic name (case-insensitive)
    pub fn address_of(&self, name: &str) -> Result<u8, ClientError> {
        self.by_name
            .get(&name.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| ClientError::UnknownRegister(name.to_string()))
    }

    /// Symbolic name of an address
    pub fn name_of(&self, addr: u8) -> Result<&str, ClientError> {
        self.by_addr
            .get(&addr)
            .map(|d| d.name.as_str())
            .ok_or_else(|| ClientError::UnknownRegister(format!("0x{addr:02X}")))
    }

    /// Value kind of an address
    pub fn kind_of(&self, addr: u8) -> Result<RegKind, ClientError> {
        self.by_addr
            .get(&addr)
            .map(|d| d.kind)
            .ok_or_else(|| ClientError::UnknownRegister(format!("0x{addr:02X}")))
    }

    /// Whether an address is present in the catalog
    pub fn contains(&self, addr: u8) -> bool {
        self.by_addr.contains_key(&addr)
    }

    /// Bus index of a signal name (case-insensitive)
    pub fn bus_index_of(&self, signal: &str) -> Result<u16, ClientError> {
        SYSTEM_BUS
            .iter()
            .position(|s| s.eq_ignore_ascii_case(signal))
            .map(|i| i as u16)
            .ok_or_else(|| ClientError::UnknownSignal(signal.to_string()))
    }

    /// Signal name at a bus index
    pub fn signal_at(&self, index: u16) -> Result<&'static str, ClientError> {
        SYSTEM_BUS
            .get(index as usize)
            .copied()
            .ok_or_else(|| ClientError::UnknownSignal(format!("bus index {index}")))
    }

    /// All catalog addresses in ascending order
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.by_addr.keys().copied()
    }

    /// All catalog entries in ascending address order
    pub fn descriptors(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.by_addr.values()
    }

    /// Number of registers in the catalog
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    /// Whether the catalog has no entries
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}

/// Remove `/* ... */` comments, preserving line structure outside them
fn strip_block_comments(source: &str) -> Result<String, ParseError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    loop {
        match rest.find("/*") {
            None => {
                out.push_str(rest);
                return Ok(out);
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                let end = after.find("*/").ok_or(ParseError::UnterminatedComment)?;
                // Keep newlines so entry line numbers stay meaningful
                out.extend(after[..end].chars().filter(|&c| c == '\n'));
                rest = &after[end + 2..];
            }
        }
    }
}

/// Parse one `{ "NAME", 0xNN, kind },` entry
fn parse_entry(line: &str) -> Result<RegisterDescriptor, ParseError> {
    let malformed = || ParseError::MalformedEntry(line.to_string());

    let body = line
        .strip_suffix(',')
        .unwrap_or(line)
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(malformed)?;

    let mut fields = body.split(',').map(str::trim);
    let (name, addr, kind) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(name), Some(addr), Some(kind), None) => (name, addr, kind),
        _ => return Err(malformed()),
    };

    let name = name
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|s| !s.is_empty())
        .ok_or_else(malformed)?;

    let addr = parse_address(addr)?;
    let kind = RegKind::from_tag(kind)?;

    Ok(RegisterDescriptor {
        name: name.to_string(),
        addr,
        kind,
    })
}

/// Parse a `0x`-hex or decimal address in u8 range
fn parse_address(text: &str) -> Result<u8, ParseError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    };
    parsed.map_err(|_| ParseError::InvalidAddress(text.to_string()))
}
