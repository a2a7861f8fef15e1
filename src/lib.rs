//! Unattended, concurrent flashing of Amlogic SoC boards over USB.
//!
//! Boards drop off the bus and come back at a new address every time the
//! bootstrap sequence resets them. This crate tracks each board by the chip
//! id burnt into its silicon and drives it through its bootstrap on its own
//! thread, while a single discovery loop watches the bus for everyone.
//!
//! - **Discovery** - bus polling, chip id resolution, engine supervision
//! - **Device sessions** - one board's identity and its current bus address
//! - **Engine** - the per-board phase state machine
//! - **Image** - unpacked upgrade image, partition table, platform addresses
//! - **Executor** - the seam to the vendor `update` and packer binaries
//!
//! # Architecture
//!
//! ```text
//! aml-flasher (binary)
//!     │
//!     ├── config, preflight, logging
//!     └── discovery::Orchestrator ─── polls ───► executor (update scan / chipid)
//!             │
//!             ├── DeviceSession (chip id A) ◄── mark_reconnected
//!             │       └── BootstrapEngine thread ──► device::UpdateClient ──► executor
//!             │
//!             └── DeviceSession (chip id B)
//!                     └── BootstrapEngine thread
//!
//! every engine reads the same image::ImageDescriptor and soc::SocProfile
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use aml_flasher::engine::{EngineContext, FlashOptions, PartScope};
//! use aml_flasher::discovery::Orchestrator;
//!
//! let options = FlashOptions::new(SocFamily::Gxl, PartScope::All);
//! let ctx = EngineContext { image, options: Arc::new(options), timing, executor, clock };
//! let mut orchestrator = Orchestrator::new(ctx, Some(devices_dir));
//! orchestrator.run(&cancel);
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod executor;
pub mod image;
pub mod logging;
pub mod preflight;
pub mod soc;

pub use error::{FlashError, FlashResult};
pub use executor::{CommandExecutor, CommandOutput, ProcessExecutor};
