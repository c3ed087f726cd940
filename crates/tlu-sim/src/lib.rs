//! TLU Simulation Library
//!
//! An in-memory peer implementing the same line protocol as the hardware, so
//! the protocol client can be exercised end-to-end without a device on the
//! bench. It includes:
//!
//! - **SimDevice**: the synchronous peer state machine (register bank,
//!   arm/disarm side effects, per-tick capture reports)
//! - **run_sim_task / spawn_sim**: the async driver pairing a request loop
//!   with a concurrent background sampling tick over one outbound queue
//!
//! # Example
//!
//! ```rust
//! use tlu_protocol::{DeviceClient, RegValue, RegisterCatalog};
//! use tlu_sim::{spawn_sim, SimConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (transport, sim) = spawn_sim(RegisterCatalog::standard(), SimConfig::default());
//! let mut client = DeviceClient::new(transport, RegisterCatalog::standard());
//!
//! client.write_register("SOFT_IN", 0x000Fu16).await.unwrap();
//! assert_eq!(
//!     client.read_register("SOFT_IN").await.unwrap(),
//!     RegValue::Raw(0x000F)
//! );
//! sim.shutdown().await;
//! # }
//! ```

pub mod device;
pub mod device_task;

pub use device::{SimConfig, SimDevice};
pub use device_task::{run_sim_task, spawn_sim, SimCommand, SimHandle};
