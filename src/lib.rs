//! Configuration-driven BLE peripheral simulator.
//!
//! The goal of this library is to make integration testing of
//! BLE-scanning clients easy: it advertises a configurable set of
//! characteristics and periodically pushes synthetic telemetry values to
//! any subscriber, driven entirely by a declarative JSON document.
//!
//! ## Usage
//!
//! Here is an example that loads a configuration document, starts the
//! simulator over an in-memory transport and watches the first payloads
//! go out:
//!
//! ```rust,no_run
//! use blesim::{DeviceConfiguration, Error, Simulator, transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     pretty_env_logger::init();
//!
//!     // Parse and validate the configuration document
//!     let bytes = std::fs::read("device.json").expect("config file");
//!     let config = DeviceConfiguration::parse(&bytes)?;
//!
//!     // Start advertising over the loopback transport
//!     let (adapter, mut central) = transport::loopback();
//!     let mut simulator = Simulator::new();
//!     simulator.start(config, adapter).await?;
//!
//!     // Receive a few telemetry payloads
//!     for _ in 0..3 {
//!         let (uuid, payload) = central.next_notification().await.unwrap();
//!         println!("{}: {} bytes", uuid, payload.len());
//!     }
//!
//!     simulator.stop().await;
//!     Ok(())
//! }
//!```

#![warn(clippy::all, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub use config::{
    BleConfig, CharacteristicConfig, ConfigError, DataConfig, DataStream, DeviceConfiguration,
    DeviceIdentity, Permission, Property, StreamData,
};
pub use encoder::{EncodeError, Encoding};
pub use service::{CharacteristicDescriptor, ServiceDescriptor};
pub use simulator::{EngineEvent, Error, Simulator};
pub use transport::{ReadResponse, TransportAdapter, TransportError, TransportEvent};
pub use value::{Record, Value};

mod config;
mod simulator;

mod encoder;
mod randomize;
mod resolver;
mod service;
mod session;
pub mod transport;
mod value;
