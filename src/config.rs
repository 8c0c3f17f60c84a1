use crate::data::Serial;
use crate::error::{Error, Result};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::time::Duration;

/// Which channel a `TransportConfig` describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    ModbusTcp,
    ModbusSerial,
    WifiDongle,
    Http,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

// TransportConfig {{{
/// One transport's connection settings. Immutable after construction;
/// accessors apply the documented defaults.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct TransportConfig {
    pub transport_type: TransportType,

    /// Device (inverter) serial.
    pub serial: Option<Serial>,
    /// WiFi relay unit serial; distinct from the inverter's.
    pub dongle_serial: Option<Serial>,

    pub host: Option<String>,
    pub port: Option<u16>,

    pub serial_port: Option<String>,
    pub baudrate: Option<u32>,
    #[serde(default)]
    pub parity: Parity,
    pub stopbits: Option<u8>,

    pub unit_id: Option<u8>,

    /// Credential reference for the cloud channel.
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_url: Option<String>,

    /// Nameplate rating in watts, when known. Gates the overflow canary and
    /// the daily energy caps.
    pub rated_power_w: Option<f64>,

    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub read_timeout: Option<Duration>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub delay_ms: Option<Duration>,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub local_retry_interval: Option<Duration>,
}

impl TransportConfig {
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|err| Error::connection(format!("error parsing config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::connection(format!("error reading config {path}: {err}")))?;
        Self::from_str(&content)
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    pub fn serial(&self) -> Option<Serial> {
        self.serial
    }

    pub fn dongle_serial(&self) -> Option<Serial> {
        self.dongle_serial
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.transport_type {
            TransportType::WifiDongle => crate::dongle::transport::DEFAULT_PORT,
            TransportType::Http => 443,
            _ => 502,
        })
    }

    pub fn serial_port(&self) -> &str {
        self.serial_port.as_deref().unwrap_or("/dev/ttyUSB0")
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate.unwrap_or(19200)
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn stopbits(&self) -> u8 {
        self.stopbits.unwrap_or(1)
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id.unwrap_or(1)
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn base_url(&self) -> &Option<String> {
        &self.base_url
    }

    pub fn rated_power_w(&self) -> Option<f64> {
        self.rated_power_w
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout.unwrap_or(Duration::from_secs(10))
    }

    /// Settling delay between consecutive dongle register-group reads.
    pub fn delay(&self) -> Duration {
        self.delay_ms.unwrap_or(Duration::from_millis(250))
    }

    pub fn local_retry_interval(&self) -> Duration {
        self.local_retry_interval.unwrap_or(Duration::from_secs(60))
    }

    pub fn validate(&self) -> Result<()> {
        match self.transport_type {
            TransportType::ModbusTcp => {
                if self.host.is_none() {
                    return Err(Error::connection("modbus_tcp requires a host"));
                }
            }
            TransportType::ModbusSerial => {
                if self.serial_port.is_none() {
                    return Err(Error::connection("modbus_serial requires a serial_port"));
                }
                if !matches!(self.stopbits(), 1 | 2) {
                    return Err(Error::connection("stopbits must be 1 or 2"));
                }
            }
            TransportType::WifiDongle => {
                if self.host.is_none() {
                    return Err(Error::connection("wifi_dongle requires a host"));
                }
                if self.dongle_serial.is_none() {
                    return Err(Error::connection(
                        "wifi_dongle requires the dongle unit serial",
                    ));
                }
                if self.serial.is_none() {
                    return Err(Error::connection("wifi_dongle requires the inverter serial"));
                }
            }
            TransportType::Http => {
                if self.username.is_none() || self.password.is_none() {
                    return Err(Error::connection("http requires credentials"));
                }
                if self.serial.is_none() {
                    return Err(Error::connection("http requires the inverter serial"));
                }
            }
        }
        Ok(())
    }
}
// }}}

impl<'de> Deserialize<'de> for Serial {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
