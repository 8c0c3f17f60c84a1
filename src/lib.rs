//! Multi-transport client layer for hybrid solar inverters.
//!
//! Telemetry and control parameters can reach an inverter three ways: the
//! vendor's authenticated cloud API, the proprietary binary protocol spoken
//! by the WiFi relay ("dongle"), or raw Modbus over TCP/serial. This crate
//! normalizes their divergent register layouts, bit widths and scaling
//! conventions into one data model, rejects telemetry that is physically
//! implausible, and fails over between channels behind a single
//! [`transport::Transport`] surface.

// Module declarations for the crate's core components
pub mod config;     // Transport configuration
pub mod data;       // Normalized domain snapshots
pub mod discovery;  // Device classification and parallel grouping
pub mod dongle;     // WiFi relay binary protocol and transport
pub mod error;      // Error taxonomy
pub mod hybrid;     // Local/cloud failover orchestrator
pub mod integrity;  // Corruption canaries and counter validators
pub mod modbus;     // Modbus TCP/RTU transport
pub mod prelude;    // Common imports and types
pub mod registers;  // Per-family register maps
pub mod scaling;    // Raw to physical unit conversion
pub mod transport;  // Transport contract and capabilities

// Get the package version from Cargo.toml
pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use crate::config::{TransportConfig, TransportType};
pub use crate::data::{
    BatteryBankData, BatteryData, DeviceDiscoveryInfo, InverterEnergyData, InverterRuntimeData,
    MidboxRuntimeData, Serial,
};
pub use crate::dongle::DongleTransport;
pub use crate::error::{Error, Result};
pub use crate::hybrid::HybridTransport;
pub use crate::integrity::{Canary, CounterValidator, Verdict};
pub use crate::modbus::ModbusTransport;
pub use crate::registers::ModelFamily;
pub use crate::transport::{CloudApi, CloudTransport, Transport, TransportCapabilities};
