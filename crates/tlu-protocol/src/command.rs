//! Wire message model
//!
//! ASCII lines, newline-terminated. Addresses are two upper-case hex digits,
//! register values four, capture fields eight.
//!
//! | Direction     | Line              | Meaning                        |
//! |---------------|-------------------|--------------------------------|
//! | client → peer | `R<AA>`           | read register                  |
//! | client → peer | `W<AA><VVVV>`     | write register                 |
//! | client → peer | `S`               | persist configuration          |
//! | peer → client | `R<AA><VVVV>`     | read result                    |
//! | peer → client | `W<AA>OK`         | write acknowledged             |
//! | peer → client | `SOK`             | persist acknowledged           |
//! | peer → client | `E0`              | malformed request              |
//! | peer → client | `E1R<AA>`/`E1W<AA>` | unknown address              |
//! | peer → client | `PR` / `PX`       | capture started / ended        |
//! | peer → client | `P<hex>...`       | unsolicited capture report     |
//!
//! The protocol carries no transaction identifiers: the client correlates
//! replies purely on line prefixes, so requests must stay strictly
//! sequential on one transport.

use crate::error::ParseError;

/// A client-to-peer request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read one register: `R<AA>`
    Read { addr: u8 },
    /// Write one register: `W<AA><VVVV>`
    Write { addr: u8, value: u16 },
    /// Persist the current configuration: `S`
    Save,
    /// An arbitrary literal command line
    Literal(String),
}

impl Request {
    /// Encode to the wire line, without terminator
    pub fn encode(&self) -> String {
        match self {
            Request::Read { addr } => format!("R{addr:02X}"),
            Request::Write { addr, value } => format!("W{addr:02X}{value:04X}"),
            Request::Save => "S".to_string(),
            Request::Literal(line) => line.clone(),
        }
    }

    /// Parse a request line as the peer sees it.
    ///
    /// Anything that is not an exact-length `R`/`W`/`S` form is malformed;
    /// the peer answers those with `E0`.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::MalformedRequest(line.to_string());

        if line == "S" {
            return Ok(Request::Save);
        }
        // .get() rather than slicing: garbage input must never panic the peer
        match line.as_bytes().first() {
            Some(b'R') if line.len() == 3 => {
                let addr = line
                    .get(1..3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(malformed)?;
                Ok(Request::Read { addr })
            }
            Some(b'W') if line.len() == 7 => {
                let addr = line
                    .get(1..3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(malformed)?;
                let value = line
                    .get(3..7)
                    .and_then(|hex| u16::from_str_radix(hex, 16).ok())
                    .ok_or_else(malformed)?;
                Ok(Request::Write { addr, value })
            }
            _ => Err(malformed()),
        }
    }
}

/// A peer-to-client reply line, solicited or unsolicited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Read result: `R<AA><VVVV>`
    Value { addr: u8, value: u16 },
    /// Write acknowledgement: `W<AA>OK`
    WriteOk { addr: u8 },
    /// Persist acknowledgement: `SOK`
    SaveOk,
    /// Malformed request: `E0`
    BadRequest,
    /// Read of an address outside the bank: `E1R<AA>`
    UnknownRead { addr: u8 },
    /// Write to an address outside the bank: `E1W<AA>`
    UnknownWrite { addr: u8 },
    /// Unsolicited: capture cycle started (arm)
    CaptureStart,
    /// Unsolicited: capture cycle ended (disarm)
    CaptureEnd,
    /// Unsolicited capture report: `P` + 8-hex timestamp + one 8-hex
    /// field per monitored channel
    Capture { timestamp: u32, samples: Vec<u32> },
}

impl Reply {
    /// Encode to the wire line, without terminator
    pub fn encode(&self) -> String {
        match self {
            Reply::Value { addr, value } => format!("R{addr:02X}{value:04X}"),
            Reply::WriteOk { addr } => format!("W{addr:02X}OK"),
            Reply::SaveOk => "SOK".to_string(),
            Reply::BadRequest => "E0".to_string(),
            Reply::UnknownRead { addr } => format!("E1R{addr:02X}"),
            Reply::UnknownWrite { addr } => format!("E1W{addr:02X}"),
            Reply::CaptureStart => "PR".to_string(),
            Reply::CaptureEnd => "PX".to_string(),
            Reply::Capture { timestamp, samples } => {
                let mut line = format!("P{timestamp:08X}");
                for sample in samples {
                    line.push_str(&format!("{sample:08X}"));
                }
                line
            }
        }
    }
}
