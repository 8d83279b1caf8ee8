//! Hardware Simulation Library
//!
//! This crate provides serial-line stand-ins for the devices the telemetry
//! services talk to, so they can be developed without the hardware attached:
//!
//! - **Stn1110Simulator**: an STN1110/ELM327 OBD adapter answering AT/ST
//!   commands and streaming canned CAN traffic in monitoring mode
//! - **UbloxSimulator**: a u-blox receiver that emits noise until it receives
//!   a CFG-VALSET, then reports a fixed NAV-POSLLH solution
//!
//! Both simulators run over any `AsyncRead + AsyncWrite` stream, so tests can
//! drive them through `tokio::io::duplex` while the binaries use a serial port.
//!
//! # Example
//!
//! ```rust,no_run
//! use hwsim::config::SimulatorConfig;
//! use hwsim::transport::{open_serial, split_framed};
//! use hwsim::Stn1110Simulator;
//! use hwsim_protocol::StnCodec;
//! use tokio::sync::watch;
//!
//! # async fn example() -> Result<(), hwsim::SimError> {
//! let mut config = SimulatorConfig::default();
//! config.serial.port = "/dev/pts/3".into();
//!
//! let stream = open_serial(&config.serial)?;
//! let (mut reader, writer) = split_framed(stream, StnCodec::new(), config.serial.read_timeout());
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! let mut sim = Stn1110Simulator::new(config.stn);
//! sim.run(&mut reader, writer, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod stn1110;
pub mod transport;
pub mod ublox;

pub use hwsim_protocol as protocol;

pub use config::{SerialConfig, SimulatorConfig, StnConfig, UbloxConfig};
pub use error::SimError;
pub use stn1110::{FilterSet, SimulatorMode, Stn1110Simulator, StnState};
pub use ublox::{ConfigState, UbloxSimulator, UbloxState};
