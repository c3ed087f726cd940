//! Protocol client
//!
//! [`DeviceClient`] drives the line protocol over any byte-stream transport,
//! so the same client runs against a real serial port or an in-memory
//! simulated peer. The wire protocol carries no transaction identifiers:
//! every exchange is strictly sequential (send one line, correlate the reply
//! by its prefix), and the `&mut self` receivers make a second in-flight
//! request unrepresentable without external locking.
//!
//! Transaction lifecycle: idle → sent → awaiting response → completed,
//! timed out, or mismatched. A timeout is recoverable and may be retried; a
//! mismatch leaves the transport desynchronized until [`DeviceClient::drain_pending`]
//! or a reconnect.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::catalog::{RegKind, RegisterCatalog};
use crate::codec::LineCodec;
use crate::command::Request;
use crate::config::ConfigFile;
use crate::error::ClientError;

/// Default per-read response deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Quiet period that ends a [`DeviceClient::drain_pending`] sweep
const DRAIN_QUIET: Duration = Duration::from_millis(50);

/// The four status words covering the 64 bus indices, in bus order
const STATUS_WORDS: [&str; 4] = ["SYS_STAT1LO", "SYS_STAT1HI", "SYS_STAT2LO", "SYS_STAT2HI"];

/// A register named either symbolically or by raw address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterId {
    /// Symbolic name, resolved through the catalog (case-insensitive)
    Name(String),
    /// Raw register address
    Addr(u8),
}

impl From<&str> for RegisterId {
    fn from(name: &str) -> Self {
        RegisterId::Name(name.to_string())
    }
}

impl From<String> for RegisterId {
    fn from(name: String) -> Self {
        RegisterId::Name(name)
    }
}

impl From<u8> for RegisterId {
    fn from(addr: u8) -> Self {
        RegisterId::Addr(addr)
    }
}

/// A register value: a plain integer, or a bus signal selected by name
/// (multiplexer registers only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    /// Plain 16-bit value
    Raw(u16),
    /// Named system-bus signal
    Signal(String),
}

impl From<u16> for RegValue {
    fn from(value: u16) -> Self {
        RegValue::Raw(value)
    }
}

impl From<&str> for RegValue {
    fn from(signal: &str) -> Self {
        RegValue::Signal(signal.to_string())
    }
}

impl From<String> for RegValue {
    fn from(signal: String) -> Self {
        RegValue::Signal(signal)
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegValue::Raw(value) => write!(f, "{value}"),
            RegValue::Signal(signal) => f.write_str(signal),
        }
    }
}

/// Line-protocol client for one device on one transport
#[derive(Debug)]
pub struct DeviceClient<S> {
    stream: S,
    catalog: RegisterCatalog,
    codec: LineCodec,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> DeviceClient<S> {
    /// Create a client over a transport with the given catalog
    pub fn new(stream: S, catalog: RegisterCatalog) -> Self {
        Self {
            stream,
            catalog,
            codec: LineCodec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the response deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The catalog this client resolves names against
    pub fn catalog(&self) -> &RegisterCatalog {
        &self.catalog
    }

    /// Consume the client, returning the transport
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Read a register.
    ///
    /// Multiplexer registers come back as the selected signal's name, all
    /// others as the plain value.
    pub async fn read_register(&mut self, reg: impl Into<RegisterId>) -> Result<RegValue, ClientError> {
        let addr = self.resolve(reg.into())?;
        let value = self.read_raw(addr).await?;
        if self.catalog.kind_of(addr)? == RegKind::Mux {
            Ok(RegValue::Signal(self.catalog.signal_at(value)?.to_string()))
        } else {
            Ok(RegValue::Raw(value))
        }
    }

    /// Write a register.
    ///
    /// A [`RegValue::Signal`] value is translated through the bus table and
    /// is only valid for multiplexer registers.
    pub async fn write_register(
        &mut self,
        reg: impl Into<RegisterId>,
        value: impl Into<RegValue>,
    ) -> Result<(), ClientError> {
        let addr = self.resolve(reg.into())?;
        let raw = self.encode_value(addr, value.into())?;
        self.write_raw(addr, raw).await
    }

    /// Write a register only if its kind is writable (multiplexer or plain
    /// read/write); silently skips read-only and command registers.
    ///
    /// This is the path bulk upload takes, so a full configuration dump can
    /// be replayed without tripping on status registers.
    pub async fn write_register_if_writable(
        &mut self,
        reg: impl Into<RegisterId>,
        value: impl Into<RegValue>,
    ) -> Result<(), ClientError> {
        let addr = self.resolve(reg.into())?;
        if !matches!(self.catalog.kind_of(addr)?, RegKind::Mux | RegKind::ReadWrite) {
            let name = self.catalog.name_of(addr)?;
            debug!(register = name, "skipping non-writable register");
            return Ok(());
        }
        let raw = self.encode_value(addr, value.into())?;
        self.write_raw(addr, raw).await
    }

    /// Current logic level of a named system-bus signal (0 or 1)
    pub async fn get_status_bit(&mut self, signal: &str) -> Result<u8, ClientError> {
        let index = self.catalog.bus_index_of(signal)?;
        let word = STATUS_WORDS[(index / 16) as usize];
        let addr = self.catalog.address_of(word)?;
        let value = self.read_raw(addr).await?;
        Ok(((value >> (index % 16)) & 1) as u8)
    }

    /// Send a literal command line and await its `<cmd>OK` acknowledgement
    pub async fn write_command(&mut self, cmd: &str) -> Result<(), ClientError> {
        self.send_line(&Request::Literal(cmd.to_string()).encode())
            .await?;
        self.expect_exact(&format!("{cmd}OK")).await
    }

    /// Apply a bulk-configuration source (see [`crate::config`]).
    ///
    /// Entries naming unknown registers are skipped, as are non-writable
    /// registers; a structurally bad source fails with
    /// [`ClientError::Config`].
    pub async fn upload_config(&mut self, source: &str) -> Result<(), ClientError> {
        let config = ConfigFile::parse(source)?;
        for (name, value) in config.regs {
            match self.write_register_if_writable(name.as_str(), value).await {
                Ok(()) => {}
                Err(ClientError::UnknownRegister(name)) => {
                    debug!(register = %name, "skipping unknown register in upload");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Persist the device's current configuration to its flash
    pub async fn save(&mut self) -> Result<(), ClientError> {
        self.write_command("S").await
    }

    /// Reset the device
    pub async fn reset(&mut self) -> Result<(), ClientError> {
        self.write_register("SYS_RESET", 1u16).await
    }

    /// Read a live counter for `channel` via position compare.
    ///
    /// Disarms, selects the channel's capture bit, configures a one-cycle
    /// immediate time gate and a zero-delay pulse window, then arms and runs
    /// the capture handshake: an unsolicited `PR`, one `P` report carrying
    /// the count, then `PX`, with the arm acknowledgement accepted anywhere
    /// in between. Any other sequence fails with
    /// [`ClientError::Acquisition`].
    pub async fn acquire_encoder_count(&mut self, channel: u8) -> Result<u64, ClientError> {
        if channel >= 16 {
            return Err(ClientError::Acquisition(format!(
                "capture channel {channel} out of range"
            )));
        }

        // Disarm first. The peer prepends an unsolicited PX to the disarm
        // acknowledgement, so this write cannot go through the strict path.
        let disarm_addr = self.catalog.address_of("PC_DISARM")?;
        self.send_line(&Request::Write { addr: disarm_addr, value: 1 }.encode())
            .await?;
        let disarm_ack = format!("W{disarm_addr:02X}OK");
        let line = self.next_capture_line().await?;
        let line = if line.starts_with("PX") {
            self.next_capture_line().await?
        } else {
            line
        };
        if line != disarm_ack {
            return Err(ClientError::Acquisition(format!(
                "disarm not acknowledged: {line:?}"
            )));
        }
        // Capture reports queued before the disarm landed may still be in
        // flight; let the transport go quiet before reconfiguring.
        self.drain_pending().await?;

        self.write_register("PC_BIT_CAP", 1u16 << channel).await?;
        for (reg, value) in [
            // One-cycle time gate, immediate start
            ("PC_GATE_SEL", 1u16),
            ("PC_GATE_STARTLO", 0),
            ("PC_GATE_STARTHI", 0),
            ("PC_GATE_WIDLO", 1),
            ("PC_GATE_WIDHI", 0),
            ("PC_GATE_NGATELO", 1),
            ("PC_GATE_NGATEHI", 0),
            // Zero-delay pulse window
            ("PC_PULSE_SEL", 1),
            ("PC_PULSE_STARTLO", 0),
            ("PC_PULSE_STARTHI", 0),
            ("PC_PULSE_DLYLO", 0),
            ("PC_PULSE_DLYHI", 0),
        ] {
            self.write_register(reg, value).await?;
        }

        // Arm. Arming is asynchronous on the device: the write
        // acknowledgement interleaves with the unsolicited capture lines,
        // so all four lines are correlated by hand here.
        let arm_addr = self.catalog.address_of("PC_ARM")?;
        self.send_line(&Request::Write { addr: arm_addr, value: 1 }.encode())
            .await?;
        let ack = format!("W{arm_addr:02X}OK");

        let mut acked = false;
        let mut started = false;
        let mut ended = false;
        let mut count = None;
        loop {
            let line = self.next_capture_line().await?;

            if line == ack && !acked {
                acked = true;
            } else if ended {
                // Only the late arm acknowledgement may follow PX
                return Err(ClientError::Acquisition(format!(
                    "unexpected line {line:?} after capture end"
                )));
            } else if line.starts_with("PR") && !started {
                started = true;
            } else if line.starts_with("PX") {
                if count.is_none() {
                    return Err(ClientError::Acquisition(
                        "capture ended without a report".to_string(),
                    ));
                }
                ended = true;
            } else if let Some(payload) = line.strip_prefix('P') {
                if !started || count.is_some() {
                    return Err(ClientError::Acquisition(format!(
                        "unexpected capture report {line:?}"
                    )));
                }
                count = Some(u64::from_str_radix(payload, 16).map_err(|_| {
                    ClientError::Acquisition(format!("bad capture payload {line:?}"))
                })?);
            } else {
                return Err(ClientError::Acquisition(format!("unexpected line {line:?}")));
            }

            if acked && ended {
                if let Some(count) = count {
                    return Ok(count);
                }
            }
        }
    }

    /// Discard any buffered or still-arriving peer output.
    ///
    /// After an abandoned transaction (e.g. a timeout the caller gave up
    /// retrying) the peer's response may still be in flight; reusing the
    /// transport without draining it desynchronizes every later exchange.
    pub async fn drain_pending(&mut self) -> Result<(), ClientError> {
        self.codec.clear();
        let mut buf = [0u8; 256];
        loop {
            match timeout(DRAIN_QUIET, self.stream.read(&mut buf)).await {
                Err(_) => return Ok(()),
                Ok(Ok(0)) => return Err(ClientError::Disconnected),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Like [`Self::next_line`], but a deadline miss is an acquisition
    /// failure rather than a recoverable timeout
    async fn next_capture_line(&mut self) -> Result<String, ClientError> {
        match self.next_line().await {
            Err(ClientError::Timeout(deadline)) => Err(ClientError::Acquisition(format!(
                "no capture line within {deadline:?}"
            ))),
            other => other,
        }
    }

    fn resolve(&self, reg: RegisterId) -> Result<u8, ClientError> {
        match reg {
            RegisterId::Name(name) => self.catalog.address_of(&name),
            RegisterId::Addr(addr) if self.catalog.contains(addr) => Ok(addr),
            RegisterId::Addr(addr) => Err(ClientError::UnknownRegister(format!("0x{addr:02X}"))),
        }
    }

    fn encode_value(&self, addr: u8, value: RegValue) -> Result<u16, ClientError> {
        match value {
            RegValue::Raw(raw) => Ok(raw),
            RegValue::Signal(signal) => {
                if self.catalog.kind_of(addr)? == RegKind::Mux {
                    self.catalog.bus_index_of(&signal)
                } else {
                    Err(ClientError::UnknownSignal(format!(
                        "{signal} (register 0x{addr:02X} is not a multiplexer select)"
                    )))
                }
            }
        }
    }

    async fn read_raw(&mut self, addr: u8) -> Result<u16, ClientError> {
        let cmd = Request::Read { addr }.encode();
        self.send_line(&cmd).await?;
        let line = self.expect_prefix(&cmd).await?;
        line.get(cmd.len()..)
            .filter(|digits| digits.len() == 4)
            .and_then(|digits| u16::from_str_radix(digits, 16).ok())
            .ok_or_else(|| ClientError::UnexpectedReply {
                expected: format!("{cmd}<VVVV>"),
                got: line.clone(),
            })
    }

    async fn write_raw(&mut self, addr: u8, value: u16) -> Result<(), ClientError> {
        self.send_line(&Request::Write { addr, value }.encode())
            .await?;
        self.expect_exact(&format!("W{addr:02X}OK")).await
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        debug!(tx = %line);
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Pull the next complete line, reading more bytes under the deadline
    async fn next_line(&mut self) -> Result<String, ClientError> {
        loop {
            if let Some(line) = self.codec.next_line() {
                debug!(rx = %line);
                return Ok(line);
            }
            let mut buf = [0u8; 256];
            let n = timeout(self.timeout, self.stream.read(&mut buf))
                .await
                .map_err(|_| ClientError::Timeout(self.timeout))??;
            if n == 0 {
                return Err(ClientError::Disconnected);
            }
            self.codec.push_bytes(&buf[..n]);
        }
    }

    async fn expect_prefix(&mut self, prefix: &str) -> Result<String, ClientError> {
        let line = self.next_line().await?;
        if line.starts_with(prefix) {
            Ok(line)
        } else {
            Err(ClientError::UnexpectedReply {
                expected: prefix.to_string(),
                got: line,
            })
        }
    }

    async fn expect_exact(&mut self, expected: &str) -> Result<(), ClientError> {
        let line = self.next_line().await?;
        if line == expected {
            Ok(())
        } else {
            Err(ClientError::UnexpectedReply {
                expected: expected.to_string(),
                got: line,
            })
        }
    }
}
