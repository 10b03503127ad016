//! # Cozylocal
//!
//! Asynchronous local discovery and control of CozyLife-compatible
//! smart-home devices (switches and lights) speaking the vendor's
//! JSON-over-UDP/TCP protocol, without cloud dependencies.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cozylocal::Scanner;
//!
//! # async fn run() -> cozylocal::Result<()> {
//! let mut discovery = Scanner::new().start().await?;
//! while let Some(announcement) = discovery.next().await {
//!     println!("found {} at {}", announcement.mac, announcement.addr);
//! }
//! # Ok(())
//! # }
//! ```
//!
pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod products;
pub mod protocol;
pub mod registry;
pub mod scanner;

pub use channel::CommandChannel;
pub use config::{DeviceConfig, PlatformConfig};
pub use device::Device;
pub use error::{CozyError, Result};
pub use products::{ProductTable, TypeCode};
pub use protocol::{Attribute, CommandType, Envelope, Payload, Response};
pub use registry::{NullPlatform, Platform, Registry};
pub use scanner::{Announcement, Discovery, Scanner};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
