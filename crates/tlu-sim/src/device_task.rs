//! Async driver for the simulated device
//!
//! Runs the peer side of the protocol over any byte stream. Two cooperating
//! tasks share the device behind a short-held lock:
//!
//! - the request loop reads inbound lines, applies the simulated reply
//!   latency, and queues replies
//! - a background sampling tick fires on its own interval and queues capture
//!   reports while the device is armed, never blocking on request handling
//!
//! All outbound lines funnel through one queue so their order on the wire is
//! well defined.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use tlu_protocol::{LineCodec, RegisterCatalog};

use crate::device::{SimConfig, SimDevice};

/// Commands that can be sent to a running simulated device task
#[derive(Debug, Clone)]
pub enum SimCommand {
    /// Shut the task down
    Shutdown,
}

/// Outbound line queue depth
const OUTBOUND_QUEUE: usize = 256;

/// Run the simulated device over `stream` until shutdown or stream close
pub async fn run_sim_task<S>(
    mut stream: S,
    device: Arc<Mutex<SimDevice>>,
    mut cmd_rx: mpsc::Receiver<SimCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let tick_interval = device.lock().await.config().tick_interval;
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    info!("starting simulated device task");

    // Background sampling tick, independent of request handling
    let tick_device = Arc::clone(&device);
    let tick_tx = out_tx.clone();
    let tick_task: JoinHandle<()> = tokio::spawn(async move {
        let mut ticker = interval(tick_interval);
        loop {
            ticker.tick().await;
            // Queue while holding the lock: a capture report must never
            // overtake the arm acknowledgement that enabled it
            let mut dev = tick_device.lock().await;
            for reply in dev.tick() {
                if tick_tx.send(reply.encode()).await.is_err() {
                    return;
                }
            }
        }
    });

    let mut codec = LineCodec::new();
    let mut buf = [0u8; 256];
    let result = loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!("peer stream closed");
                        break Ok(());
                    }
                    Ok(n) => {
                        codec.push_bytes(&buf[..n]);
                        while let Some(line) = codec.next_line() {
                            debug!(rx = %line);
                            let delay = device.lock().await.reply_delay(&line);
                            if !delay.is_zero() {
                                sleep(delay).await;
                            }
                            // Same lock discipline as the tick task: state
                            // change and queueing are one atomic step
                            let mut dev = device.lock().await;
                            for reply in dev.handle_line(&line) {
                                if out_tx.send(reply.encode()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("stream error: {e}");
                        break Err(e);
                    }
                }
            }

            maybe_line = out_rx.recv() => {
                match maybe_line {
                    Some(line) => {
                        debug!(tx = %line);
                        if let Err(e) = write_line(&mut stream, &line).await {
                            warn!("write error: {e}");
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SimCommand::Shutdown) | None => {
                        debug!("shutdown requested");
                        break Ok(());
                    }
                }
            }
        }
    };

    tick_task.abort();
    info!("simulated device task ended");
    result
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, line: &str) -> io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}

/// A running simulated device: shared state plus task controls
pub struct SimHandle {
    /// The device, shared with the running task
    pub device: Arc<Mutex<SimDevice>>,
    /// The task itself
    pub task: JoinHandle<io::Result<()>>,
    /// Command channel into the task
    pub commands: mpsc::Sender<SimCommand>,
}

impl SimHandle {
    /// Request shutdown and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.commands.send(SimCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Spawn a simulated device on an in-memory transport.
///
/// Returns the client end of the transport and a handle to the running
/// device.
pub fn spawn_sim(catalog: RegisterCatalog, config: SimConfig) -> (DuplexStream, SimHandle) {
    let (client_io, sim_io) = tokio::io::duplex(4096);
    let device = Arc::new(Mutex::new(SimDevice::with_config(catalog, config)));
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let task = tokio::spawn(run_sim_task(sim_io, Arc::clone(&device), cmd_rx));
    (
        client_io,
        SimHandle {
            device,
            task,
            commands: cmd_tx,
        },
    )
}
