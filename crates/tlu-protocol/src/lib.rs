//! TLU Protocol Library
//!
//! This crate talks to a register-addressed hardware timing/logic unit over
//! a serial line. It provides:
//!
//! - **Register catalog**: static metadata parsed from the firmware register
//!   map (name, address, and kind for every register), plus the ordered
//!   system-bus signal table shared by multiplexer encoding and status lookup
//! - **Wire model**: the ASCII line protocol (`R`/`W`/`S` requests, `E`
//!   errors, unsolicited `P` capture reports) with a streaming line codec
//! - **Client**: strictly sequential request/response exchanges with
//!   deadline-bounded reads, type-aware value translation, bulk
//!   configuration upload, and the multi-step encoder-count acquisition
//!
//! The client is generic over its transport (`AsyncRead + AsyncWrite`), so
//! it runs unmodified against a serial port or an in-memory simulated peer.
//!
//! # Example
//!
//! ```rust
//! use tlu_protocol::{RegisterCatalog, RegKind, Request};
//!
//! let catalog = RegisterCatalog::standard();
//! let addr = catalog.address_of("PC_ARM").unwrap();
//! assert_eq!(catalog.kind_of(addr).unwrap(), RegKind::Command);
//! assert_eq!(Request::Write { addr, value: 1 }.encode(), "W8B0001");
//! ```

pub mod catalog;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;

pub use catalog::{RegKind, RegisterCatalog, RegisterDescriptor, SYSTEM_BUS};
pub use client::{DeviceClient, RegValue, RegisterId, DEFAULT_TIMEOUT};
pub use codec::LineCodec;
pub use command::{Reply, Request};
pub use config::ConfigFile;
pub use error::{ClientError, ParseError};
