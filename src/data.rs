use crate::registers::ModelFamily;
use crate::scaling;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

// Serial {{{
/// Fixed 10-byte ASCII serial, null-padded. Used for both inverters and
/// dongle units.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Serial([u8; 10]);

impl Serial {
    pub fn data(&self) -> [u8; 10] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 10] {
        &self.0
    }
}

impl From<[u8; 10]> for Serial {
    fn from(bytes: [u8; 10]) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Serial {
    fn from(s: &str) -> Self {
        let mut result = [0u8; 10];
        let bytes = s.as_bytes();
        let n = std::cmp::min(bytes.len(), 10);
        result[..n].copy_from_slice(&bytes[..n]);
        Self(result)
    }
}

impl TryFrom<&[u8]> for Serial {
    type Error = crate::error::Error;

    fn try_from(bytes: &[u8]) -> crate::error::Result<Self> {
        let data: [u8; 10] = bytes
            .try_into()
            .map_err(|_| crate::error::Error::read("serial must be exactly 10 bytes"))?;
        Ok(Self(data))
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0).trim_end_matches('\0'))
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl Serialize for Serial {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::str::FromStr for Serial {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 10 {
            return Err(crate::error::Error::read(format!(
                "serial {s:?} must be 1 to 10 characters"
            )));
        }
        Ok(Self::from(s))
    }
}
// }}}

/// Clamp a raw percentage register into the public 0..=100 range.
///
/// The raw value is preserved next to the clamped one: anything above 100 is
/// itself the corruption signal the canaries look for.
pub fn clamp_pct(raw: u16) -> u8 {
    raw.min(100) as u8
}

// InverterRuntimeData {{{
/// Normalized, already-scaled runtime snapshot. Any transport produces this
/// shape, regardless of the register layout it came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InverterRuntimeData {
    pub serial: Serial,
    pub status: u16,

    /// Per-string PV voltage (V); absent strings read 0.
    pub v_pv: [f64; 3],
    /// Per-string PV power (W).
    pub p_pv: [f64; 3],
    /// Sum of the string powers (W), derived.
    pub p_pv_total: f64,

    pub v_bat: f64,
    pub soc: u8,
    /// Pre-clamp raw SOC register value.
    pub soc_raw: u16,
    pub soh: u8,
    pub soh_raw: u16,

    pub p_charge: f64,
    pub p_discharge: f64,
    /// Charge minus discharge (W), derived.
    pub p_battery: f64,

    /// Per-phase grid voltage (V).
    pub v_grid: [f64; 2],
    pub f_grid: f64,
    pub p_inv: f64,
    pub p_to_grid: f64,
    pub p_to_user: f64,
    /// Import minus export (W), derived.
    pub p_grid: f64,

    pub v_eps: [f64; 2],
    pub f_eps: f64,
    pub p_eps: f64,

    pub t_inner: f64,
    pub t_radiator: f64,

    /// Nameplate rating (W) when the caller knows it; gates the overflow
    /// canary.
    pub rated_power_w: Option<f64>,

    pub time: DateTime<Utc>,
}

impl InverterRuntimeData {
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            status: 0,
            v_pv: [0.0; 3],
            p_pv: [0.0; 3],
            p_pv_total: 0.0,
            v_bat: 0.0,
            soc: 0,
            soc_raw: 0,
            soh: 0,
            soh_raw: 0,
            p_charge: 0.0,
            p_discharge: 0.0,
            p_battery: 0.0,
            v_grid: [0.0; 2],
            f_grid: 0.0,
            p_inv: 0.0,
            p_to_grid: 0.0,
            p_to_user: 0.0,
            p_grid: 0.0,
            v_eps: [0.0; 2],
            f_eps: 0.0,
            p_eps: 0.0,
            t_inner: 0.0,
            t_radiator: 0.0,
            rated_power_w: None,
            time: Utc::now(),
        }
    }

    pub fn set_soc_raw(&mut self, raw: u16) {
        self.soc_raw = raw;
        self.soc = clamp_pct(raw);
    }

    pub fn set_soh_raw(&mut self, raw: u16) {
        self.soh_raw = raw;
        self.soh = clamp_pct(raw);
    }

    /// Fill in the sums the registers don't carry directly.
    pub fn calculate_derived_values(&mut self) {
        self.p_pv_total = self.p_pv.iter().sum();
        self.p_battery = self.p_charge - self.p_discharge;
        self.p_grid = self.p_to_user - self.p_to_grid;
    }

    /// Every power field, for the rated-power overflow canary.
    pub fn power_fields(&self) -> impl Iterator<Item = f64> + '_ {
        self.p_pv
            .iter()
            .copied()
            .chain([
                self.p_charge,
                self.p_discharge,
                self.p_inv,
                self.p_to_grid,
                self.p_to_user,
                self.p_eps,
            ])
    }
}
// }}}

// InverterEnergyData {{{
/// Daily and lifetime energy counters (kWh).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InverterEnergyData {
    pub serial: Serial,

    pub e_pv_day: [f64; 3],
    pub e_pv_day_total: f64,
    pub e_chg_day: f64,
    pub e_dischg_day: f64,
    pub e_to_grid_day: f64,
    pub e_to_user_day: f64,
    pub e_eps_day: f64,

    pub e_pv_all: [f64; 3],
    pub e_pv_all_total: f64,
    pub e_chg_all: f64,
    pub e_dischg_all: f64,
    pub e_to_grid_all: f64,
    pub e_to_user_all: f64,
    pub e_eps_all: f64,

    #[serde(skip)]
    pub time: Option<DateTime<Utc>>,
}

impl InverterEnergyData {
    pub fn calculate_derived_values(&mut self) {
        self.e_pv_day_total = scaling::round1(self.e_pv_day.iter().sum());
        self.e_pv_all_total = scaling::round1(self.e_pv_all.iter().sum());
    }

    /// Lifetime counters by name, in the order validators walk them.
    pub fn lifetime_fields(&self) -> [(&'static str, f64); 5] {
        [
            ("e_pv_all", self.e_pv_all_total),
            ("e_chg_all", self.e_chg_all),
            ("e_dischg_all", self.e_dischg_all),
            ("e_to_grid_all", self.e_to_grid_all),
            ("e_to_user_all", self.e_to_user_all),
        ]
    }

    /// Daily counters by name.
    pub fn daily_fields(&self) -> [(&'static str, f64); 5] {
        [
            ("e_pv_day", self.e_pv_day_total),
            ("e_chg_day", self.e_chg_day),
            ("e_dischg_day", self.e_dischg_day),
            ("e_to_grid_day", self.e_to_grid_day),
            ("e_to_user_day", self.e_to_user_day),
        ]
    }
}
// }}}

// BatteryData / BatteryBankData {{{
/// One battery module in the bank.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatteryData {
    pub slot: u16,
    pub voltage: f64,
    pub current: f64,
    pub soc: u8,
    pub soc_raw: u16,
    pub soh: u8,
    pub soh_raw: u16,
    pub max_cell_voltage: f64,
    pub min_cell_voltage: f64,
}

impl BatteryData {
    /// A ghost module is an unpopulated slot the BMS still reports: all-zero
    /// voltage and SOC. Ghosts are excluded from corruption cascades.
    pub fn is_ghost(&self) -> bool {
        self.voltage == 0.0 && self.soc_raw == 0
    }
}

/// The whole battery bank: aggregates plus zero-or-more modules.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatteryBankData {
    pub serial: Serial,
    pub module_count: u16,
    pub capacity_ah: f64,
    pub voltage: f64,
    pub current: f64,
    pub soc: u8,
    pub soc_raw: u16,
    pub max_cell_voltage: f64,
    pub min_cell_voltage: f64,
    pub max_cell_temp: f64,
    pub min_cell_temp: f64,
    pub cycle_count: u16,
    pub modules: Vec<BatteryData>,
}
// }}}

// MidboxRuntimeData {{{
/// GridBOSS/MID runtime snapshot: shared grid/load/generator legs and the
/// smart-port states.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MidboxRuntimeData {
    pub serial: Serial,
    pub status: u16,
    pub v_grid: [f64; 2],
    pub v_load: [f64; 2],
    pub v_gen: [f64; 2],
    pub f_grid: f64,
    /// Per-port status code; valid codes are 0, 1 and 2.
    pub smart_ports: Vec<u16>,
}

impl MidboxRuntimeData {
    /// Every per-leg voltage, for the impossible-band canary.
    pub fn leg_voltages(&self) -> impl Iterator<Item = f64> + '_ {
        self.v_grid
            .iter()
            .chain(self.v_load.iter())
            .chain(self.v_gen.iter())
            .copied()
    }
}
// }}}

/// Result of one discovery probe. Produced once per device and immutable.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceDiscoveryInfo {
    pub serial: Serial,
    pub device_type_code: u16,
    pub is_gridboss: bool,
    pub is_inverter: bool,
    pub model_family: ModelFamily,
    pub parallel_number: Option<u16>,
    pub parallel_phase: Option<u16>,
    pub firmware_version: Option<String>,
}

impl DeviceDiscoveryInfo {
    /// Conservative fallback when the probe cannot read the device.
    pub fn unknown(serial: Serial) -> Self {
        Self {
            serial,
            device_type_code: 0,
            is_gridboss: false,
            is_inverter: false,
            model_family: ModelFamily::Unknown,
            parallel_number: None,
            parallel_phase: None,
            firmware_version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_roundtrip() {
        let serial: Serial = "AB12345678".parse().unwrap();
        assert_eq!(serial.to_string(), "AB12345678");
        assert_eq!(serial.data().len(), 10);
    }

    #[test]
    fn short_serial_is_null_padded() {
        let serial: Serial = "AB12".parse().unwrap();
        assert_eq!(serial.data()[4..], [0u8; 6]);
        assert_eq!(serial.to_string(), "AB12");
    }

    #[test]
    fn soc_clamps_but_keeps_raw() {
        let mut data = InverterRuntimeData::new(Serial::default());
        data.set_soc_raw(144);
        assert_eq!(data.soc, 100);
        assert_eq!(data.soc_raw, 144);
    }

    #[test]
    fn derived_power_values() {
        let mut data = InverterRuntimeData::new(Serial::default());
        data.p_pv = [1000.0, 2000.0, 500.0];
        data.p_charge = 1200.0;
        data.p_discharge = 200.0;
        data.p_to_user = 800.0;
        data.p_to_grid = 300.0;
        data.calculate_derived_values();
        assert_eq!(data.p_pv_total, 3500.0);
        assert_eq!(data.p_battery, 1000.0);
        assert_eq!(data.p_grid, 500.0);
    }

    #[test]
    fn ghost_module_detection() {
        let ghost = BatteryData::default();
        assert!(ghost.is_ghost());

        let live = BatteryData {
            voltage: 51.2,
            soc_raw: 80,
            soc: 80,
            ..BatteryData::default()
        };
        assert!(!live.is_ghost());
    }
}
