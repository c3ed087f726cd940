//! Bulk-configuration source
//!
//! A TOML document with a `[regs]` table mapping register names to integer
//! values, e.g.:
//!
//! ```toml
//! [regs]
//! and1_inv = 0
//! div1_divlo = 1000
//! out1_ttl = 52
//! ```
//!
//! Parsing validates structure and value range; which entries actually reach
//! the hardware is decided by the client's lenient write path.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ClientError;

#[derive(Debug, Deserialize)]
struct RawConfig {
    regs: Option<BTreeMap<String, i64>>,
}

/// A parsed bulk-configuration source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Register name/value pairs, in name order
    pub regs: Vec<(String, u16)>,
}

impl ConfigFile {
    /// Parse and validate a TOML configuration source
    pub fn parse(source: &str) -> Result<Self, ClientError> {
        let raw: RawConfig =
            toml::from_str(source).map_err(|e| ClientError::Config(e.to_string()))?;
        let regs = raw
            .regs
            .ok_or_else(|| ClientError::Config("missing [regs] table".to_string()))?;

        let mut out = Vec::with_capacity(regs.len());
        for (name, value) in regs {
            let value = u16::try_from(value).map_err(|_| {
                ClientError::Config(format!("value {value} for {name} is not a 16-bit integer"))
            })?;
            out.push((name, value));
        }
        Ok(Self { regs: out })
    }
}
