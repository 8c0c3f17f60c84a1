//! Modbus register transport, TCP or serial RTU.
//!
//! The wire protocol itself comes from `tokio-modbus`; this module owns the
//! family-aware translation between raw registers and domain snapshots.

use crate::config::{Parity, TransportConfig, TransportType};
use crate::data::{
    BatteryBankData, InverterEnergyData, InverterRuntimeData, MidboxRuntimeData, Serial,
};
use crate::error::{Error, Result};
use crate::registers::{ModelFamily, RegisterWindow, MAX_MODULE_SLOTS};
use crate::transport::{Transport, TransportCapabilities, MODBUS_CAPABILITIES};

use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Client, Reader, Writer};
use tokio_modbus::Slave;

/// Snapshot blocks are read in windows of this many registers.
const WINDOW_SIZE: u16 = 40;

#[derive(Clone, Debug)]
enum Target {
    Tcp {
        host: String,
        port: u16,
    },
    Serial {
        port: String,
        baudrate: u32,
        parity: Parity,
        stopbits: u8,
    },
}

/// Register transport over Modbus TCP or RTU.
pub struct ModbusTransport {
    target: Target,
    unit_id: Slave,
    inverter: Serial,
    family: ModelFamily,
    rated_power_w: Option<f64>,
    read_timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusTransport {
    pub fn tcp(host: impl Into<String>, port: u16, unit_id: u8, inverter: Serial) -> Self {
        Self {
            target: Target::Tcp {
                host: host.into(),
                port,
            },
            unit_id: Slave(unit_id),
            inverter,
            family: ModelFamily::Unknown,
            rated_power_w: None,
            read_timeout: Duration::from_secs(10),
            ctx: None,
        }
    }

    pub fn serial(
        port: impl Into<String>,
        baudrate: u32,
        parity: Parity,
        stopbits: u8,
        unit_id: u8,
        inverter: Serial,
    ) -> Self {
        Self {
            target: Target::Serial {
                port: port.into(),
                baudrate,
                parity,
                stopbits,
            },
            unit_id: Slave(unit_id),
            inverter,
            family: ModelFamily::Unknown,
            rated_power_w: None,
            read_timeout: Duration::from_secs(10),
            ctx: None,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        let inverter = config.serial().unwrap_or_default();
        let mut transport = match config.transport_type() {
            TransportType::ModbusTcp => {
                Self::tcp(config.host(), config.port(), config.unit_id(), inverter)
            }
            TransportType::ModbusSerial => Self::serial(
                config.serial_port(),
                config.baudrate(),
                config.parity(),
                config.stopbits(),
                config.unit_id(),
                inverter,
            ),
            other => {
                return Err(Error::connection(format!(
                    "transport type {other:?} is not a modbus channel"
                )))
            }
        };
        transport.rated_power_w = config.rated_power_w();
        transport.read_timeout = config.read_timeout();
        Ok(transport)
    }

    pub fn set_family(&mut self, family: ModelFamily) {
        self.family = family;
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn set_rated_power_w(&mut self, rated: Option<f64>) {
        self.rated_power_w = rated;
    }

    /// Flatten the nested tokio-modbus result: outer errors are transport
    /// failures, inner ones are device exceptions.
    fn flatten_read<T>(result: tokio_modbus::Result<T>) -> Result<T> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(exception)) => Err(Error::read(format!("device exception: {exception}"))),
            Err(err) => Err(Error::connection(format!("modbus error: {err}"))),
        }
    }

    fn flatten_write<T>(result: tokio_modbus::Result<T>) -> Result<T> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(exception)) => Err(Error::write(format!("device exception: {exception}"))),
            Err(err) => Err(Error::connection(format!("modbus error: {err}"))),
        }
    }

    async fn read_input_window(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let deadline = self.read_timeout;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| Error::connection("modbus transport is not connected"))?;
        match timeout(deadline, ctx.read_input_registers(start, count)).await {
            Ok(result) => Self::flatten_read(result),
            Err(_) => Err(Error::timeout(format!(
                "input registers {start}+{count} gave no response within {deadline:?}"
            ))),
        }
    }

    async fn read_holding_window(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let deadline = self.read_timeout;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| Error::connection("modbus transport is not connected"))?;
        match timeout(deadline, ctx.read_holding_registers(start, count)).await {
            Ok(result) => Self::flatten_read(result),
            Err(_) => Err(Error::timeout(format!(
                "holding registers {start}+{count} gave no response within {deadline:?}"
            ))),
        }
    }
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn connect(&mut self) -> Result<()> {
        self.ctx = None;

        let ctx = match &self.target {
            Target::Tcp { host, port } => {
                let mut addrs = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| Error::connection(format!("cannot resolve {host}: {e}")))?;
                let addr = addrs
                    .next()
                    .ok_or_else(|| Error::connection(format!("no address for {host}")))?;
                let connect = tokio_modbus::client::tcp::connect_slave(addr, self.unit_id);
                match timeout(self.read_timeout, connect).await {
                    Ok(Ok(ctx)) => ctx,
                    Ok(Err(e)) => {
                        return Err(Error::connection(format!(
                            "failed to connect to {host}:{port}: {e}"
                        )))
                    }
                    Err(_) => {
                        return Err(Error::connection(format!(
                            "connection to {host}:{port} timed out"
                        )))
                    }
                }
            }
            Target::Serial {
                port,
                baudrate,
                parity,
                stopbits,
            } => {
                let builder = tokio_serial::new(port, *baudrate)
                    .parity(match parity {
                        Parity::None => tokio_serial::Parity::None,
                        Parity::Even => tokio_serial::Parity::Even,
                        Parity::Odd => tokio_serial::Parity::Odd,
                    })
                    .stop_bits(match stopbits {
                        2 => tokio_serial::StopBits::Two,
                        _ => tokio_serial::StopBits::One,
                    })
                    .data_bits(tokio_serial::DataBits::Eight)
                    .flow_control(tokio_serial::FlowControl::None);
                let stream = tokio_serial::SerialStream::open(&builder)
                    .map_err(|e| Error::connection(format!("cannot open {port}: {e}")))?;
                tokio_modbus::client::rtu::attach_slave(stream, self.unit_id)
            }
        };

        self.ctx = Some(ctx);
        info!("modbus link to {} established", self.inverter);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                warn!("modbus disconnect for {}: {e}", self.inverter);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn capabilities(&self) -> &'static TransportCapabilities {
        &MODBUS_CAPABILITIES
    }

    async fn read_runtime(&mut self) -> Result<Option<InverterRuntimeData>> {
        let Some(map) = self.family.runtime_map() else {
            return Ok(None);
        };
        let values = self.read_input_window(0, WINDOW_SIZE).await?;
        let window = RegisterWindow::new(0, &values);
        let mut data = map.decode(self.inverter, &window);
        data.rated_power_w = self.rated_power_w;
        Ok(Some(data))
    }

    async fn read_energy(&mut self) -> Result<Option<InverterEnergyData>> {
        let Some(map) = self.family.energy_map() else {
            return Ok(None);
        };
        let values = self.read_input_window(WINDOW_SIZE, WINDOW_SIZE).await?;
        let window = RegisterWindow::new(WINDOW_SIZE, &values);
        Ok(Some(map.decode(self.inverter, &window)))
    }

    async fn read_battery(&mut self) -> Result<Option<BatteryBankData>> {
        let Some(map) = self.family.battery_map() else {
            return Ok(None);
        };

        let mut values = self.read_input_window(80, WINDOW_SIZE).await?;
        let count = {
            let window = RegisterWindow::new(80, &values);
            window
                .raw_or_default(map.module_count.as_ref())
                .min(MAX_MODULE_SLOTS)
        };

        let needed_end = map.module_base + count * map.module_stride;
        let mut have_end = 80 + WINDOW_SIZE;
        while have_end < needed_end {
            values.extend(self.read_input_window(have_end, WINDOW_SIZE).await?);
            have_end += WINDOW_SIZE;
        }

        let window = RegisterWindow::new(80, &values);
        Ok(Some(map.decode(self.inverter, &window)))
    }

    async fn read_midbox(&mut self) -> Result<Option<MidboxRuntimeData>> {
        let Some(map) = self.family.midbox_map() else {
            return Ok(None);
        };
        let values = self.read_input_window(0, WINDOW_SIZE).await?;
        let window = RegisterWindow::new(0, &values);
        Ok(Some(map.decode(self.inverter, &window)))
    }

    async fn read_parameters(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.read_holding_window(start, count).await
    }

    async fn write_parameters(&mut self, values: &HashMap<u16, u16>) -> Result<()> {
        let mut writes: Vec<(u16, u16)> = values.iter().map(|(k, v)| (*k, *v)).collect();
        writes.sort_unstable();

        // contiguous runs go out as one multi-register write (0x10),
        // singletons as 0x06
        let deadline = self.read_timeout;
        let mut i = 0;
        while i < writes.len() {
            let mut j = i + 1;
            while j < writes.len() && writes[j].0 == writes[j - 1].0 + 1 {
                j += 1;
            }
            let start = writes[i].0;
            let run: Vec<u16> = writes[i..j].iter().map(|(_, v)| *v).collect();

            let ctx = self
                .ctx
                .as_mut()
                .ok_or_else(|| Error::connection("modbus transport is not connected"))?;
            let result = if run.len() == 1 {
                timeout(deadline, ctx.write_single_register(start, run[0])).await
            } else {
                timeout(deadline, ctx.write_multiple_registers(start, &run)).await
            };
            match result {
                Ok(result) => Self::flatten_write(result)?,
                Err(_) => {
                    return Err(Error::timeout(format!(
                        "write to register {start} gave no response within {deadline:?}"
                    )))
                }
            }
            i = j;
        }
        Ok(())
    }
}
