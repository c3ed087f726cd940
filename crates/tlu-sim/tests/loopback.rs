//! End-to-end tests: protocol client against the simulated device
//!
//! Every test drives the real client over an in-memory duplex transport with
//! the simulated device task on the other end, covering:
//! - register write/read round trips, plain and multiplexer
//! - status-word bit extraction
//! - peer error replies for unknown addresses and malformed lines
//! - arm/disarm ordering and the background capture stream
//! - the full encoder-count acquisition handshake

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

use tlu_protocol::{DeviceClient, LineCodec, RegValue, RegisterCatalog};
use tlu_sim::{spawn_sim, SimConfig, SimHandle};

// ============================================================================
// Helpers
// ============================================================================

mod helpers {
    use super::*;

    /// Compressed timing so the suite stays fast
    pub fn fast_config() -> SimConfig {
        SimConfig {
            save_delay: Duration::from_millis(10),
            write_delay: Duration::from_millis(1),
            tick_interval: Duration::from_millis(20),
        }
    }

    /// Client and simulated device over a duplex transport
    pub fn connect() -> (DeviceClient<DuplexStream>, SimHandle) {
        let (transport, sim) = spawn_sim(RegisterCatalog::standard(), fast_config());
        let client = DeviceClient::new(transport, RegisterCatalog::standard())
            .with_timeout(Duration::from_millis(500));
        (client, sim)
    }

    /// Raw transport to a device built from `descriptor`, bypassing the
    /// client for wire-level assertions
    pub fn connect_raw(descriptor: &str) -> (DuplexStream, SimHandle) {
        let catalog = RegisterCatalog::parse(descriptor).unwrap();
        spawn_sim(catalog, fast_config())
    }

    /// Read one line from a raw transport
    pub async fn read_line(io: &mut DuplexStream, codec: &mut LineCodec) -> String {
        loop {
            if let Some(line) = codec.next_line() {
                return line;
            }
            let mut buf = [0u8; 64];
            let n = timeout(Duration::from_millis(500), io.read(&mut buf))
                .await
                .expect("peer went silent")
                .expect("read failed");
            assert!(n > 0, "peer closed the stream");
            codec.push_bytes(&buf[..n]);
        }
    }

    /// Collect every line the peer emits within `window`
    pub async fn read_lines_for(
        io: &mut DuplexStream,
        codec: &mut LineCodec,
        window: Duration,
    ) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + window;
        let mut lines = Vec::new();
        loop {
            while let Some(line) = codec.next_line() {
                lines.push(line);
            }
            let mut buf = [0u8; 64];
            match timeout_at_deadline(io, &mut buf, deadline).await {
                Some(n) if n > 0 => codec.push_bytes(&buf[..n]),
                _ => break,
            }
        }
        while let Some(line) = codec.next_line() {
            lines.push(line);
        }
        lines
    }

    async fn timeout_at_deadline(
        io: &mut DuplexStream,
        buf: &mut [u8],
        deadline: tokio::time::Instant,
    ) -> Option<usize> {
        match tokio::time::timeout_at(deadline, io.read(buf)).await {
            Ok(Ok(n)) => Some(n),
            _ => None,
        }
    }
}

// ============================================================================
// Register round trips
// ============================================================================

#[tokio::test]
async fn write_then_read_returns_written_value() {
    let (mut client, sim) = helpers::connect();

    for value in [0u16, 1, 0x1234, u16::MAX] {
        client.write_register("SOFT_IN", value).await.unwrap();
        assert_eq!(
            client.read_register("SOFT_IN").await.unwrap(),
            RegValue::Raw(value)
        );
    }

    // By raw address too
    client.write_register(0x00u8, 7u16).await.unwrap();
    assert_eq!(
        client.read_register("AND1_INV").await.unwrap(),
        RegValue::Raw(7)
    );

    sim.shutdown().await;
}

#[tokio::test]
async fn mux_register_round_trips_by_signal_name() {
    let (mut client, sim) = helpers::connect();

    client
        .write_register("AND1_INP1", "SOFT_IN1")
        .await
        .unwrap();
    assert_eq!(
        client.read_register("AND1_INP1").await.unwrap(),
        RegValue::Signal("SOFT_IN1".to_string())
    );

    sim.shutdown().await;
}

// ============================================================================
// Status bits
// ============================================================================

#[tokio::test]
async fn status_bits_follow_the_status_words() {
    let (mut client, sim) = helpers::connect();

    // All four words forced to zero, then to all-ones. One signal per word:
    // DISCONNECT (0), IN6_ENCA (17), AND1 (32), PULSE1 (52).
    for word in ["SYS_STAT1LO", "SYS_STAT1HI", "SYS_STAT2LO", "SYS_STAT2HI"] {
        client.write_register(word, 0u16).await.unwrap();
    }
    for signal in ["DISCONNECT", "IN6_ENCA", "AND1", "PULSE1"] {
        assert_eq!(client.get_status_bit(signal).await.unwrap(), 0);
    }

    for word in ["SYS_STAT1LO", "SYS_STAT1HI", "SYS_STAT2LO", "SYS_STAT2HI"] {
        client.write_register(word, 0xFFFFu16).await.unwrap();
    }
    for signal in ["DISCONNECT", "IN6_ENCA", "AND1", "PULSE1"] {
        assert_eq!(client.get_status_bit(signal).await.unwrap(), 1);
    }

    sim.shutdown().await;
}

#[tokio::test]
async fn status_bit_selects_the_right_bit() {
    let (mut client, sim) = helpers::connect();

    // IN6_ENCA is bus index 17: bit 1 of SYS_STAT1HI
    client.write_register("SYS_STAT1HI", 0b10u16).await.unwrap();
    assert_eq!(client.get_status_bit("IN6_ENCA").await.unwrap(), 1);
    client.write_register("SYS_STAT1HI", !0b10u16).await.unwrap();
    assert_eq!(client.get_status_bit("IN6_ENCA").await.unwrap(), 0);

    sim.shutdown().await;
}

// ============================================================================
// Peer error replies
// ============================================================================

#[tokio::test]
async fn unknown_address_and_malformed_lines_get_error_replies() {
    // A bank without address 0x99
    let (mut io, sim) = helpers::connect_raw(r#"{ "ONLY_REG", 0x01, rw },"#);
    let mut codec = LineCodec::new();

    io.write_all(b"R99\n").await.unwrap();
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "E1R99");

    io.write_all(b"W991234\n").await.unwrap();
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "E1W99");

    io.write_all(b"definitely not a request\n").await.unwrap();
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "E0");

    sim.shutdown().await;
}

// ============================================================================
// Arm / disarm and the capture stream
// ============================================================================

#[tokio::test]
async fn arm_and_disarm_bracket_the_acknowledgement() {
    let (mut io, sim) = helpers::connect_raw(
        r#"
        { "PC_ARM",    0x8B, cmd },
        { "PC_DISARM", 0x8C, cmd },
        "#,
    );
    let mut codec = LineCodec::new();

    io.write_all(b"W8B0001\n").await.unwrap();
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "PR");
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "W8BOK");
    assert!(sim.device.lock().await.armed());

    io.write_all(b"W8C0001\n").await.unwrap();
    // The armed interval may emit capture reports before the disarm lands
    loop {
        let line = helpers::read_line(&mut io, &mut codec).await;
        if line == "PX" {
            break;
        }
        assert!(line.starts_with('P'), "unexpected line {line:?}");
    }
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "W8COK");
    assert!(!sim.device.lock().await.armed());

    sim.shutdown().await;
}

#[tokio::test]
async fn capture_stream_runs_only_while_armed() {
    let (mut io, sim) = helpers::connect_raw(
        r#"
        { "PC_ARM",    0x8B, cmd },
        { "PC_DISARM", 0x8C, cmd },
        { "PC_BIT_CAP", 0x9F, rw },
        "#,
    );
    let mut codec = LineCodec::new();

    // Nothing arrives while disarmed
    let quiet = helpers::read_lines_for(&mut io, &mut codec, Duration::from_millis(60)).await;
    assert!(quiet.is_empty(), "unexpected lines while disarmed: {quiet:?}");

    // Arm with one monitored channel; reports at every tick
    io.write_all(b"W9F0001\n").await.unwrap();
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "W9FOK");
    io.write_all(b"W8B0001\n").await.unwrap();
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "PR");
    assert_eq!(helpers::read_line(&mut io, &mut codec).await, "W8BOK");

    let captures = helpers::read_lines_for(&mut io, &mut codec, Duration::from_millis(90)).await;
    assert!(
        captures.len() >= 2,
        "expected at least two capture reports, got {captures:?}"
    );
    for line in &captures {
        assert!(line.starts_with('P'), "unexpected line {line:?}");
        // P + 8-hex timestamp + one 8-hex sample for the single channel
        assert_eq!(line.len(), 17, "unexpected report shape {line:?}");
    }

    // Disarm; the stream stops
    io.write_all(b"W8C0001\n").await.unwrap();
    let mut tail = helpers::read_lines_for(&mut io, &mut codec, Duration::from_millis(80)).await;
    // Swallow reports queued before the disarm landed, then PX + ack
    while let Some(first) = tail.first() {
        if first == "PX" {
            break;
        }
        assert!(first.starts_with('P'), "unexpected line {first:?}");
        tail.remove(0);
    }
    assert_eq!(tail.first().map(String::as_str), Some("PX"));
    assert_eq!(tail.get(1).map(String::as_str), Some("W8COK"));
    assert!(
        tail.len() <= 2,
        "capture reports after disarm: {tail:?}"
    );

    sim.shutdown().await;
}

// ============================================================================
// Bulk upload, save, reset
// ============================================================================

#[tokio::test]
async fn upload_applies_writable_entries_and_skips_the_rest() {
    let (mut client, sim) = helpers::connect();

    client
        .upload_config(
            r#"
            [regs]
            and1_inv = 5
            out1_ttl = 60
            sys_ver = 9
            no_such_reg = 1
            "#,
        )
        .await
        .unwrap();

    let device = sim.device.lock().await;
    assert_eq!(device.register_value(0x00), Some(5)); // AND1_INV applied
    assert_eq!(device.register_value(0x60), Some(60)); // OUT1_TTL applied
    assert_eq!(device.register_value(0xF0), Some(0)); // SYS_VER untouched
    drop(device);

    sim.shutdown().await;
}

#[tokio::test]
async fn save_and_reset_are_acknowledged() {
    let (mut client, sim) = helpers::connect();

    client.save().await.unwrap();
    client.reset().await.unwrap();
    assert_eq!(
        sim.device.lock().await.register_value(0x7E),
        Some(1),
        "reset register written"
    );

    sim.shutdown().await;
}

// ============================================================================
// Encoder-count acquisition
// ============================================================================

#[tokio::test]
async fn acquisition_on_fresh_device_returns_zero() {
    let (mut client, sim) = helpers::connect();

    let count = client.acquire_encoder_count(2).await.unwrap();
    assert_eq!(count, 0);

    let device = sim.device.lock().await;
    assert!(!device.armed(), "device disarms itself after the gate");
    assert_eq!(device.register_value(0x9F), Some(1 << 2)); // capture mask
    assert_eq!(device.register_value(0x8D), Some(1)); // time gate selected
    drop(device);

    sim.shutdown().await;
}

#[tokio::test]
async fn acquisition_leaves_the_transport_reusable() {
    let (mut client, sim) = helpers::connect();

    client.acquire_encoder_count(0).await.unwrap();

    // Ordinary exchanges still correlate afterwards
    client.write_register("SOFT_IN", 0xABCDu16).await.unwrap();
    assert_eq!(
        client.read_register("SOFT_IN").await.unwrap(),
        RegValue::Raw(0xABCD)
    );

    sim.shutdown().await;
}
