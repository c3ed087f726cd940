//! TLU command-line tool
//!
//! Drives a timing/logic unit over its serial line: register reads and
//! writes (by name or address), system-bus status lookup, bulk configuration
//! upload, persist/reset, and encoder-count acquisition via position
//! compare. `--simulate` swaps the serial port for an in-process simulated
//! device, which is handy for trying commands without hardware.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

use tlu_protocol::{DeviceClient, RegValue, RegisterCatalog, RegisterId, SYSTEM_BUS};
use tlu_sim::{spawn_sim, SimConfig};

#[derive(Parser)]
#[command(name = "tlu", about = "Configure and test a TLU timing/logic unit", version)]
struct Cli {
    /// Serial port of the device
    #[arg(short, long, default_value = "/dev/ttyS0")]
    port: String,

    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Response deadline in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Run against an in-process simulated device instead of hardware
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a register by name or address
    Read { reg: String },
    /// Write a register; the value is an integer or, for multiplexer
    /// registers, a bus signal name
    Write { reg: String, value: String },
    /// Show the logic level of a system-bus signal
    Status { signal: String },
    /// Upload a bulk-configuration file
    Upload { file: PathBuf },
    /// Persist the device configuration to flash
    Save,
    /// Reset the device
    Reset,
    /// Read an encoder count via position compare
    Enc { channel: u8 },
    /// Print the system-bus signal table
    Bus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tlu_cli=info,tlu_protocol=info,tlu_sim=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // No connection needed to print the bus table
    if matches!(cli.command, Command::Bus) {
        for (index, signal) in SYSTEM_BUS.iter().enumerate() {
            println!("{index:2}  {signal}");
        }
        return Ok(());
    }

    let catalog = RegisterCatalog::standard();
    let deadline = Duration::from_millis(cli.timeout_ms);

    if cli.simulate {
        let (transport, sim) = spawn_sim(catalog.clone(), SimConfig::default());
        let client = DeviceClient::new(transport, catalog).with_timeout(deadline);
        run(cli.command, client).await?;
        sim.shutdown().await;
    } else {
        info!(port = %cli.port, baud = cli.baud, "opening serial port");
        let stream = tokio_serial::new(&cli.port, cli.baud)
            .open_native_async()
            .with_context(|| format!("opening {}", cli.port))?;
        let client = DeviceClient::new(stream, catalog).with_timeout(deadline);
        run(cli.command, client).await?;
    }

    Ok(())
}

async fn run<S>(command: Command, mut client: DeviceClient<S>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match command {
        Command::Read { reg } => {
            let value = client.read_register(register_id(&reg)).await?;
            println!("{value}");
        }
        Command::Write { reg, value } => {
            client
                .write_register(register_id(&reg), parse_value(&value))
                .await?;
        }
        Command::Status { signal } => {
            println!("{}", client.get_status_bit(&signal).await?);
        }
        Command::Upload { file } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            client.upload_config(&source).await?;
            info!("configuration uploaded");
        }
        Command::Save => client.save().await?,
        Command::Reset => client.reset().await?,
        Command::Enc { channel } => {
            println!("{}", client.acquire_encoder_count(channel).await?);
        }
        Command::Bus => unreachable!("bus is handled before a connection is made"),
    }
    Ok(())
}

/// `0x` hex or decimal
fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Numbers in address range are raw addresses, everything else a name
fn register_id(text: &str) -> RegisterId {
    match parse_number(text) {
        Some(addr) if addr <= u64::from(u8::MAX) => RegisterId::Addr(addr as u8),
        _ => RegisterId::Name(text.to_string()),
    }
}

/// Numbers in value range are raw values, everything else a signal name
fn parse_value(text: &str) -> RegValue {
    match parse_number(text) {
        Some(value) if value <= u64::from(u16::MAX) => RegValue::Raw(value as u16),
        _ => RegValue::Signal(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_id_disambiguation() {
        assert_eq!(register_id("0x9F"), RegisterId::Addr(0x9F));
        assert_eq!(register_id("127"), RegisterId::Addr(127));
        assert_eq!(register_id("PC_ARM"), RegisterId::Name("PC_ARM".to_string()));
        // Out of address range falls back to a (bad) name
        assert_eq!(register_id("300"), RegisterId::Name("300".to_string()));
    }

    #[test]
    fn test_value_disambiguation() {
        assert_eq!(parse_value("0x1234"), RegValue::Raw(0x1234));
        assert_eq!(parse_value("42"), RegValue::Raw(42));
        assert_eq!(
            parse_value("SOFT_IN1"),
            RegValue::Signal("SOFT_IN1".to_string())
        );
    }
}
