use crate::data::{
    BatteryBankData, InverterEnergyData, InverterRuntimeData, MidboxRuntimeData, Serial,
};
use crate::error::{Error, Result};
use crate::registers::{lookup_param, ParamTarget};

use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;

// TransportCapabilities {{{
/// Immutable capability flags attached 1:1 to a transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransportCapabilities {
    pub can_read_runtime: bool,
    pub can_read_energy: bool,
    pub can_read_battery: bool,
    pub can_read_parameters: bool,
    pub can_write_parameters: bool,
    pub can_discover_devices: bool,
    pub is_local: bool,
    pub requires_authentication: bool,
    pub supports_concurrent_reads: bool,
}

/// Half-duplex relay: everything readable but strictly one request in flight.
pub const DONGLE_CAPABILITIES: TransportCapabilities = TransportCapabilities {
    can_read_runtime: true,
    can_read_energy: true,
    can_read_battery: true,
    can_read_parameters: true,
    can_write_parameters: true,
    can_discover_devices: true,
    is_local: true,
    requires_authentication: false,
    supports_concurrent_reads: false,
};

pub const MODBUS_CAPABILITIES: TransportCapabilities = TransportCapabilities {
    can_read_runtime: true,
    can_read_energy: true,
    can_read_battery: true,
    can_read_parameters: true,
    can_write_parameters: true,
    can_discover_devices: true,
    is_local: true,
    requires_authentication: false,
    supports_concurrent_reads: false,
};

pub const CLOUD_CAPABILITIES: TransportCapabilities = TransportCapabilities {
    can_read_runtime: true,
    can_read_energy: true,
    can_read_battery: true,
    can_read_parameters: true,
    can_write_parameters: true,
    can_discover_devices: false,
    is_local: false,
    requires_authentication: true,
    supports_concurrent_reads: true,
};

pub const HYBRID_CAPABILITIES: TransportCapabilities = TransportCapabilities {
    can_read_runtime: true,
    can_read_energy: true,
    can_read_battery: true,
    can_read_parameters: true,
    can_write_parameters: true,
    can_discover_devices: true,
    is_local: false,
    requires_authentication: true,
    supports_concurrent_reads: false,
};
// }}}

/// The single polymorphic surface every channel implements.
///
/// Operations take `&mut self`: exactly one request may be outstanding per
/// transport, so callers serialize by construction. Snapshot reads return
/// `Ok(None)` when the channel cannot produce that snapshot kind.
#[async_trait]
pub trait Transport: Send {
    /// Establish the channel. A failed connect must leave
    /// `is_connected() == false`.
    async fn connect(&mut self) -> Result<()>;

    /// Release the channel. Safe to call when already disconnected.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn capabilities(&self) -> &'static TransportCapabilities;

    async fn read_runtime(&mut self) -> Result<Option<InverterRuntimeData>>;

    async fn read_energy(&mut self) -> Result<Option<InverterEnergyData>>;

    async fn read_battery(&mut self) -> Result<Option<BatteryBankData>>;

    /// GridBOSS/MID runtime block; `None` on non-midbox devices.
    async fn read_midbox(&mut self) -> Result<Option<MidboxRuntimeData>> {
        Ok(None)
    }

    /// Raw holding-register window.
    async fn read_parameters(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Raw holding-register writes, one register per map entry.
    async fn write_parameters(&mut self, values: &HashMap<u16, u16>) -> Result<()>;

    /// One holding register, with a short-response guard.
    async fn read_single_parameter(&mut self, register: u16) -> Result<u16> {
        let values = self.read_parameters(register, 1).await?;
        values
            .first()
            .copied()
            .ok_or_else(|| Error::read(format!("empty response for register {register}")))
    }

    /// Resolve a symbolic name to its register(s) and read it, scaled.
    /// Flags come back as 0.0 / 1.0.
    async fn read_named_parameter(&mut self, name: &str) -> Result<f64> {
        match lookup_param(name)
            .ok_or_else(|| Error::read(format!("unknown parameter {name:?}")))?
        {
            ParamTarget::Scalar { register, scale } => {
                let raw = self.read_single_parameter(register).await?;
                Ok(f64::from(raw) / scale)
            }
            ParamTarget::Flag { register, mask } => {
                let raw = self.read_single_parameter(register).await?;
                Ok(if raw & mask != 0 { 1.0 } else { 0.0 })
            }
        }
    }

    /// Resolve a symbolic name and write it. A flag write performs
    /// read-modify-write on the host control word so sibling bits are never
    /// clobbered.
    async fn write_named_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match lookup_param(name)
            .ok_or_else(|| Error::write(format!("unknown parameter {name:?}")))?
        {
            ParamTarget::Scalar { register, scale } => {
                let raw = (value * scale).round();
                if !(0.0..=f64::from(u16::MAX)).contains(&raw) {
                    return Err(Error::write(format!(
                        "value {value} out of range for parameter {name:?}"
                    )));
                }
                let mut values = HashMap::new();
                values.insert(register, raw as u16);
                self.write_parameters(&values).await
            }
            ParamTarget::Flag { register, mask } => {
                let current = self.read_single_parameter(register).await?;
                let next = if value != 0.0 {
                    current | mask
                } else {
                    current & !mask
                };
                debug!(
                    "flag write {name}: register {register} {current:#06x} -> {next:#06x}"
                );
                let mut values = HashMap::new();
                values.insert(register, next);
                self.write_parameters(&values).await
            }
        }
    }
}

// CloudApi {{{
/// Contract the external cloud client satisfies. Session, caching and
/// response-schema mechanics live behind it; data comes back already shaped
/// as the domain snapshots local transports produce.
#[async_trait]
pub trait CloudApi: Send {
    async fn authenticate(&mut self) -> Result<()>;

    async fn get_runtime(&mut self, serial: Serial) -> Result<Option<InverterRuntimeData>>;

    async fn get_energy(&mut self, serial: Serial) -> Result<Option<InverterEnergyData>>;

    async fn get_battery(&mut self, serial: Serial) -> Result<Option<BatteryBankData>>;

    async fn read_parameters(&mut self, serial: Serial, start: u16, count: u16)
        -> Result<Vec<u16>>;

    async fn write_parameters(
        &mut self,
        serial: Serial,
        values: &HashMap<u16, u16>,
    ) -> Result<()>;
}

/// Adapts any `CloudApi` implementation to the `Transport` surface.
pub struct CloudTransport<C: CloudApi> {
    api: C,
    serial: Serial,
    connected: bool,
}

impl<C: CloudApi> CloudTransport<C> {
    pub fn new(api: C, serial: Serial) -> Self {
        Self {
            api,
            serial,
            connected: false,
        }
    }
}

#[async_trait]
impl<C: CloudApi> Transport for CloudTransport<C> {
    async fn connect(&mut self) -> Result<()> {
        self.connected = false;
        self.api.authenticate().await?;
        self.connected = true;
        info!("cloud session established for {}", self.serial);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn capabilities(&self) -> &'static TransportCapabilities {
        &CLOUD_CAPABILITIES
    }

    async fn read_runtime(&mut self) -> Result<Option<InverterRuntimeData>> {
        self.api.get_runtime(self.serial).await
    }

    async fn read_energy(&mut self) -> Result<Option<InverterEnergyData>> {
        self.api.get_energy(self.serial).await
    }

    async fn read_battery(&mut self) -> Result<Option<BatteryBankData>> {
        self.api.get_battery(self.serial).await
    }

    async fn read_parameters(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.api.read_parameters(self.serial, start, count).await
    }

    async fn write_parameters(&mut self, values: &HashMap<u16, u16>) -> Result<()> {
        self.api.write_parameters(self.serial, values).await
    }
}
// }}}
