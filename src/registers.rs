use crate::data::{
    BatteryBankData, BatteryData, InverterEnergyData, InverterRuntimeData, MidboxRuntimeData,
    Serial,
};
use crate::scaling;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

/// Most module slots a BMS will report; reads beyond this are clamped.
pub const MAX_MODULE_SLOTS: u16 = 20;

/// Register width. 32-bit quantities occupy two consecutive registers,
/// low word first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum BitWidth {
    Bits16,
    Bits32,
}

/// Where a logical quantity lives and how to turn it into physical units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RegisterField {
    pub address: u16,
    pub bit_width: BitWidth,
    pub scale: f64,
    pub signed: bool,
}

impl RegisterField {
    pub const fn u16(address: u16, scale: f64) -> Self {
        Self {
            address,
            bit_width: BitWidth::Bits16,
            scale,
            signed: false,
        }
    }

    pub const fn i16(address: u16, scale: f64) -> Self {
        Self {
            address,
            bit_width: BitWidth::Bits16,
            scale,
            signed: true,
        }
    }

    pub const fn u32(address: u16, scale: f64) -> Self {
        Self {
            address,
            bit_width: BitWidth::Bits32,
            scale,
            signed: false,
        }
    }

    /// Number of registers the field occupies.
    pub const fn span(&self) -> u16 {
        match self.bit_width {
            BitWidth::Bits16 => 1,
            BitWidth::Bits32 => 2,
        }
    }
}

// ModelFamily {{{

/// Closed set of register-layout families, keyed by the device type code.
///
/// Unknown codes degrade to `Unknown` rather than failing; an `Unknown`
/// device exposes no register maps and reads come back as absent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub enum ModelFamily {
    /// 12 kW hybrid: 16-bit PV string powers at 7/8/9, grid voltage from 12.
    Hybrid12k,
    /// 18 kW hybrid: 32-bit PV string powers at 6/8/10, grid voltage from 16.
    Hybrid18k,
    /// Off-grid 6000XP: two PV strings, no grid export registers.
    Xp6000,
    /// GridBOSS/MID cluster controller; speaks the midbox layout instead.
    GridBoss,
    #[default]
    Unknown,
}

/// Device type codes as reported in holding register 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum DeviceTypeCode {
    Hybrid12k = 0x0002,
    Hybrid18k = 0x0003,
    Xp6000 = 0x0010,
    GridBoss = 0x0032,
}

impl ModelFamily {
    pub fn from_type_code(code: u16) -> Self {
        match DeviceTypeCode::try_from(code) {
            Ok(DeviceTypeCode::Hybrid12k) => Self::Hybrid12k,
            Ok(DeviceTypeCode::Hybrid18k) => Self::Hybrid18k,
            Ok(DeviceTypeCode::Xp6000) => Self::Xp6000,
            Ok(DeviceTypeCode::GridBoss) => Self::GridBoss,
            Err(_) => Self::Unknown,
        }
    }

    pub fn is_gridboss(&self) -> bool {
        *self == Self::GridBoss
    }

    pub fn is_inverter(&self) -> bool {
        matches!(self, Self::Hybrid12k | Self::Hybrid18k | Self::Xp6000)
    }

    pub fn runtime_map(&self) -> Option<&'static RuntimeRegisterMap> {
        match self {
            Self::Hybrid12k => Some(&HYBRID_12K_RUNTIME),
            Self::Hybrid18k => Some(&HYBRID_18K_RUNTIME),
            Self::Xp6000 => Some(&XP6000_RUNTIME),
            Self::GridBoss | Self::Unknown => None,
        }
    }

    pub fn energy_map(&self) -> Option<&'static EnergyRegisterMap> {
        match self {
            Self::Hybrid12k => Some(&HYBRID_ENERGY),
            Self::Hybrid18k => Some(&HYBRID_ENERGY),
            Self::Xp6000 => Some(&XP6000_ENERGY),
            Self::GridBoss | Self::Unknown => None,
        }
    }

    pub fn battery_map(&self) -> Option<&'static BatteryRegisterMap> {
        match self {
            Self::Hybrid12k | Self::Hybrid18k | Self::Xp6000 => Some(&HYBRID_BATTERY),
            Self::GridBoss | Self::Unknown => None,
        }
    }

    pub fn midbox_map(&self) -> Option<&'static MidboxRegisterMap> {
        match self {
            Self::GridBoss => Some(&GRIDBOSS_MIDBOX),
            _ => None,
        }
    }
}
// }}}

// RuntimeRegisterMap {{{

/// Input-register layout for one family's runtime block.
///
/// Every entry is optional; `None` means the family does not expose that
/// quantity and readers substitute the zero default.
#[derive(Clone, Debug)]
pub struct RuntimeRegisterMap {
    pub status: Option<RegisterField>,
    pub v_pv: [Option<RegisterField>; 3],
    pub p_pv: [Option<RegisterField>; 3],
    pub v_bat: Option<RegisterField>,
    pub soc: Option<RegisterField>,
    pub soh: Option<RegisterField>,
    pub p_charge: Option<RegisterField>,
    pub p_discharge: Option<RegisterField>,
    pub v_grid: [Option<RegisterField>; 2],
    pub f_grid: Option<RegisterField>,
    pub p_inv: Option<RegisterField>,
    pub p_to_grid: Option<RegisterField>,
    pub p_to_user: Option<RegisterField>,
    pub v_eps: [Option<RegisterField>; 2],
    pub f_eps: Option<RegisterField>,
    pub p_eps: Option<RegisterField>,
    pub t_inner: Option<RegisterField>,
    pub t_radiator: Option<RegisterField>,
}

pub static HYBRID_18K_RUNTIME: RuntimeRegisterMap = RuntimeRegisterMap {
    status: Some(RegisterField::u16(0, 1.0)),
    v_pv: [
        Some(RegisterField::u16(1, 10.0)),
        Some(RegisterField::u16(2, 10.0)),
        Some(RegisterField::u16(3, 10.0)),
    ],
    v_bat: Some(RegisterField::u16(4, 10.0)),
    soc: Some(RegisterField::u16(5, 1.0)),
    // PV string powers are 32-bit pairs on this family
    p_pv: [
        Some(RegisterField::u32(6, 1.0)),
        Some(RegisterField::u32(8, 1.0)),
        Some(RegisterField::u32(10, 1.0)),
    ],
    p_charge: Some(RegisterField::u16(12, 1.0)),
    p_discharge: Some(RegisterField::u16(13, 1.0)),
    soh: Some(RegisterField::u16(14, 1.0)),
    v_grid: [
        Some(RegisterField::u16(16, 10.0)),
        Some(RegisterField::u16(17, 10.0)),
    ],
    f_grid: Some(RegisterField::u16(18, 100.0)),
    p_inv: Some(RegisterField::u16(19, 1.0)),
    p_to_grid: Some(RegisterField::u16(20, 1.0)),
    p_to_user: Some(RegisterField::u16(21, 1.0)),
    v_eps: [
        Some(RegisterField::u16(22, 10.0)),
        Some(RegisterField::u16(23, 10.0)),
    ],
    f_eps: Some(RegisterField::u16(24, 100.0)),
    p_eps: Some(RegisterField::u16(25, 1.0)),
    t_inner: Some(RegisterField::i16(26, 10.0)),
    t_radiator: Some(RegisterField::i16(27, 10.0)),
};

pub static HYBRID_12K_RUNTIME: RuntimeRegisterMap = RuntimeRegisterMap {
    status: Some(RegisterField::u16(0, 1.0)),
    v_pv: [
        Some(RegisterField::u16(1, 10.0)),
        Some(RegisterField::u16(2, 10.0)),
        Some(RegisterField::u16(3, 10.0)),
    ],
    v_bat: Some(RegisterField::u16(4, 10.0)),
    soc: Some(RegisterField::u16(5, 1.0)),
    soh: Some(RegisterField::u16(6, 1.0)),
    // same quantities as the 18k but 16-bit, one register each
    p_pv: [
        Some(RegisterField::u16(7, 1.0)),
        Some(RegisterField::u16(8, 1.0)),
        Some(RegisterField::u16(9, 1.0)),
    ],
    p_charge: Some(RegisterField::u16(10, 1.0)),
    p_discharge: Some(RegisterField::u16(11, 1.0)),
    v_grid: [
        Some(RegisterField::u16(12, 10.0)),
        Some(RegisterField::u16(13, 10.0)),
    ],
    f_grid: Some(RegisterField::u16(14, 100.0)),
    p_inv: Some(RegisterField::u16(15, 1.0)),
    p_to_grid: Some(RegisterField::u16(16, 1.0)),
    p_to_user: Some(RegisterField::u16(17, 1.0)),
    v_eps: [
        Some(RegisterField::u16(18, 10.0)),
        Some(RegisterField::u16(19, 10.0)),
    ],
    f_eps: Some(RegisterField::u16(20, 100.0)),
    p_eps: Some(RegisterField::u16(21, 1.0)),
    t_inner: Some(RegisterField::i16(22, 10.0)),
    t_radiator: Some(RegisterField::i16(23, 10.0)),
};

/// Off-grid layout: two PV strings and no grid export path.
pub static XP6000_RUNTIME: RuntimeRegisterMap = RuntimeRegisterMap {
    status: Some(RegisterField::u16(0, 1.0)),
    v_pv: [
        Some(RegisterField::u16(1, 10.0)),
        Some(RegisterField::u16(2, 10.0)),
        None,
    ],
    v_bat: Some(RegisterField::u16(4, 10.0)),
    soc: Some(RegisterField::u16(5, 1.0)),
    soh: Some(RegisterField::u16(6, 1.0)),
    p_pv: [
        Some(RegisterField::u16(7, 1.0)),
        Some(RegisterField::u16(8, 1.0)),
        None,
    ],
    p_charge: Some(RegisterField::u16(10, 1.0)),
    p_discharge: Some(RegisterField::u16(11, 1.0)),
    v_grid: [Some(RegisterField::u16(12, 10.0)), None],
    f_grid: Some(RegisterField::u16(14, 100.0)),
    p_inv: Some(RegisterField::u16(15, 1.0)),
    p_to_grid: None,
    p_to_user: Some(RegisterField::u16(17, 1.0)),
    v_eps: [
        Some(RegisterField::u16(18, 10.0)),
        Some(RegisterField::u16(19, 10.0)),
    ],
    f_eps: Some(RegisterField::u16(20, 100.0)),
    p_eps: Some(RegisterField::u16(21, 1.0)),
    t_inner: Some(RegisterField::i16(22, 10.0)),
    t_radiator: Some(RegisterField::i16(23, 10.0)),
};
// }}}

// EnergyRegisterMap {{{

/// Input-register layout for the energy counter block. Daily counters are
/// 16-bit tenths of a kWh; lifetime counters are 32-bit pairs.
#[derive(Clone, Debug)]
pub struct EnergyRegisterMap {
    pub e_pv_day: [Option<RegisterField>; 3],
    pub e_chg_day: Option<RegisterField>,
    pub e_dischg_day: Option<RegisterField>,
    pub e_to_grid_day: Option<RegisterField>,
    pub e_to_user_day: Option<RegisterField>,
    pub e_eps_day: Option<RegisterField>,
    pub e_pv_all: [Option<RegisterField>; 3],
    pub e_chg_all: Option<RegisterField>,
    pub e_dischg_all: Option<RegisterField>,
    pub e_to_grid_all: Option<RegisterField>,
    pub e_to_user_all: Option<RegisterField>,
    pub e_eps_all: Option<RegisterField>,
}

pub static HYBRID_ENERGY: EnergyRegisterMap = EnergyRegisterMap {
    e_pv_day: [
        Some(RegisterField::u16(40, 10.0)),
        Some(RegisterField::u16(41, 10.0)),
        Some(RegisterField::u16(42, 10.0)),
    ],
    e_chg_day: Some(RegisterField::u16(43, 10.0)),
    e_dischg_day: Some(RegisterField::u16(44, 10.0)),
    e_to_grid_day: Some(RegisterField::u16(45, 10.0)),
    e_to_user_day: Some(RegisterField::u16(46, 10.0)),
    e_eps_day: Some(RegisterField::u16(47, 10.0)),
    e_pv_all: [
        Some(RegisterField::u32(48, 10.0)),
        Some(RegisterField::u32(50, 10.0)),
        Some(RegisterField::u32(52, 10.0)),
    ],
    e_chg_all: Some(RegisterField::u32(54, 10.0)),
    e_dischg_all: Some(RegisterField::u32(56, 10.0)),
    e_to_grid_all: Some(RegisterField::u32(58, 10.0)),
    e_to_user_all: Some(RegisterField::u32(60, 10.0)),
    e_eps_all: Some(RegisterField::u32(62, 10.0)),
};

pub static XP6000_ENERGY: EnergyRegisterMap = EnergyRegisterMap {
    e_pv_day: [
        Some(RegisterField::u16(40, 10.0)),
        Some(RegisterField::u16(41, 10.0)),
        None,
    ],
    e_chg_day: Some(RegisterField::u16(43, 10.0)),
    e_dischg_day: Some(RegisterField::u16(44, 10.0)),
    e_to_grid_day: None,
    e_to_user_day: Some(RegisterField::u16(46, 10.0)),
    e_eps_day: Some(RegisterField::u16(47, 10.0)),
    e_pv_all: [
        Some(RegisterField::u32(48, 10.0)),
        Some(RegisterField::u32(50, 10.0)),
        None,
    ],
    e_chg_all: Some(RegisterField::u32(54, 10.0)),
    e_dischg_all: Some(RegisterField::u32(56, 10.0)),
    e_to_grid_all: None,
    e_to_user_all: Some(RegisterField::u32(60, 10.0)),
    e_eps_all: Some(RegisterField::u32(62, 10.0)),
};
// }}}

// BatteryRegisterMap {{{

/// Input-register layout for the battery bank block plus per-module slots.
#[derive(Clone, Debug)]
pub struct BatteryRegisterMap {
    pub module_count: Option<RegisterField>,
    pub capacity_ah: Option<RegisterField>,
    pub bank_voltage: Option<RegisterField>,
    pub bank_current: Option<RegisterField>,
    pub bank_soc: Option<RegisterField>,
    pub max_cell_voltage: Option<RegisterField>,
    pub min_cell_voltage: Option<RegisterField>,
    pub max_cell_temp: Option<RegisterField>,
    pub min_cell_temp: Option<RegisterField>,
    pub cycle_count: Option<RegisterField>,
    /// First register of module slot 0.
    pub module_base: u16,
    /// Registers per module slot.
    pub module_stride: u16,
}

impl BatteryRegisterMap {
    pub fn module_voltage(&self, slot: u16) -> RegisterField {
        RegisterField::u16(self.module_base + slot * self.module_stride, 10.0)
    }

    pub fn module_current(&self, slot: u16) -> RegisterField {
        RegisterField::i16(self.module_base + slot * self.module_stride + 1, 100.0)
    }

    pub fn module_soc(&self, slot: u16) -> RegisterField {
        RegisterField::u16(self.module_base + slot * self.module_stride + 2, 1.0)
    }

    pub fn module_soh(&self, slot: u16) -> RegisterField {
        RegisterField::u16(self.module_base + slot * self.module_stride + 3, 1.0)
    }

    pub fn module_max_cell_voltage(&self, slot: u16) -> RegisterField {
        RegisterField::u16(self.module_base + slot * self.module_stride + 4, 1000.0)
    }

    pub fn module_min_cell_voltage(&self, slot: u16) -> RegisterField {
        RegisterField::u16(self.module_base + slot * self.module_stride + 5, 1000.0)
    }
}

pub static HYBRID_BATTERY: BatteryRegisterMap = BatteryRegisterMap {
    module_count: Some(RegisterField::u16(80, 1.0)),
    capacity_ah: Some(RegisterField::u16(81, 1.0)),
    bank_voltage: Some(RegisterField::u16(88, 10.0)),
    bank_current: Some(RegisterField::i16(82, 100.0)),
    bank_soc: Some(RegisterField::u16(89, 1.0)),
    max_cell_voltage: Some(RegisterField::u16(83, 1000.0)),
    min_cell_voltage: Some(RegisterField::u16(84, 1000.0)),
    max_cell_temp: Some(RegisterField::i16(85, 10.0)),
    min_cell_temp: Some(RegisterField::i16(86, 10.0)),
    cycle_count: Some(RegisterField::u16(87, 1.0)),
    module_base: 90,
    module_stride: 6,
};
// }}}

// MidboxRegisterMap {{{

/// GridBOSS/MID runtime layout: per-leg voltages for the shared grid, load
/// and generator connections, plus the smart-port status codes.
#[derive(Clone, Debug)]
pub struct MidboxRegisterMap {
    pub status: Option<RegisterField>,
    pub v_grid: [Option<RegisterField>; 2],
    pub v_load: [Option<RegisterField>; 2],
    pub v_gen: [Option<RegisterField>; 2],
    pub f_grid: Option<RegisterField>,
    pub smart_ports: [Option<RegisterField>; 4],
}

pub static GRIDBOSS_MIDBOX: MidboxRegisterMap = MidboxRegisterMap {
    status: Some(RegisterField::u16(0, 1.0)),
    v_grid: [
        Some(RegisterField::u16(1, 10.0)),
        Some(RegisterField::u16(2, 10.0)),
    ],
    v_load: [
        Some(RegisterField::u16(3, 10.0)),
        Some(RegisterField::u16(4, 10.0)),
    ],
    v_gen: [
        Some(RegisterField::u16(5, 10.0)),
        Some(RegisterField::u16(6, 10.0)),
    ],
    f_grid: Some(RegisterField::u16(7, 100.0)),
    smart_ports: [
        Some(RegisterField::u16(8, 1.0)),
        Some(RegisterField::u16(9, 1.0)),
        Some(RegisterField::u16(10, 1.0)),
        Some(RegisterField::u16(11, 1.0)),
    ],
};
// }}}

// Holding registers {{{

/// Holding registers shared by every inverter family.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum HoldRegister {
    DeviceTypeCode = 0,
    FirmwareCode0 = 7,
    FirmwareCode1 = 8,
    FirmwareCode2 = 9,
    SystemFunction = 21, // bit-packed control word
    ChargePowerPercentCmd = 64,  // System Charge Rate (%)
    DischgPowerPercentCmd = 65,  // System Discharge Rate (%)
    AcChargePowerCmd = 66,       // Grid Charge Power Rate (%)
    AcChargeSocLimit = 67,       // AC Charge SOC Limit (%)
    ChargePrioritySocLimit = 75, // Charge Priority SOC Limit (%)
    DischgCutOffSocEod = 105,    // Discharge cut-off SOC (%)
    ParallelNumber = 113,
    ParallelPhase = 114,
}

/// Single-bit flags packed in the SystemFunction control word.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ParamBit {
    AcChargeEnable = 1 << 7,
    ForcedDischargeEnable = 1 << 10,
    ChargePriorityEnable = 1 << 11,
}

/// Where a symbolic parameter name resolves to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamTarget {
    /// Whole-register value with a scale factor.
    Scalar { register: u16, scale: f64 },
    /// One bit inside a shared control word. Writes must read-modify-write
    /// the host register so sibling bits survive.
    Flag { register: u16, mask: u16 },
}

/// Symbolic parameter names exposed through `read_named_parameter` /
/// `write_named_parameter` on every transport.
pub fn lookup_param(name: &str) -> Option<ParamTarget> {
    let scalar = |register: HoldRegister, scale| ParamTarget::Scalar {
        register: register.into(),
        scale,
    };
    let flag = |bit: ParamBit| ParamTarget::Flag {
        register: HoldRegister::SystemFunction.into(),
        mask: bit.into(),
    };

    Some(match name {
        "system_charge_rate" => scalar(HoldRegister::ChargePowerPercentCmd, 1.0),
        "system_discharge_rate" => scalar(HoldRegister::DischgPowerPercentCmd, 1.0),
        "ac_charge_power" => scalar(HoldRegister::AcChargePowerCmd, 1.0),
        "ac_charge_soc_limit" => scalar(HoldRegister::AcChargeSocLimit, 1.0),
        "charge_priority_soc_limit" => scalar(HoldRegister::ChargePrioritySocLimit, 1.0),
        "discharge_cutoff_soc" => scalar(HoldRegister::DischgCutOffSocEod, 1.0),
        "ac_charge_enable" => flag(ParamBit::AcChargeEnable),
        "forced_discharge_enable" => flag(ParamBit::ForcedDischargeEnable),
        "charge_priority_enable" => flag(ParamBit::ChargePriorityEnable),
        _ => return None,
    })
}
// }}}

// RegisterWindow {{{

/// A contiguous run of register values read off a transport, addressed by
/// register number rather than slice index.
pub struct RegisterWindow<'a> {
    start: u16,
    values: &'a [u16],
}

impl<'a> RegisterWindow<'a> {
    pub fn new(start: u16, values: &'a [u16]) -> Self {
        Self { start, values }
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        let idx = address.checked_sub(self.start)? as usize;
        self.values.get(idx).copied()
    }

    /// Assemble, sign-reinterpret and scale one field. `None` when the
    /// window does not cover it.
    pub fn field(&self, field: &RegisterField) -> Option<f64> {
        let lo = self.get(field.address)?;
        let raw = match field.bit_width {
            BitWidth::Bits16 => u32::from(lo),
            BitWidth::Bits32 => scaling::u32_from_words(lo, self.get(field.address + 1)?),
        };
        Some(scaling::apply_scale(raw, field))
    }

    /// An absent field yields the zero default, never an error.
    pub fn field_or_default(&self, field: Option<&RegisterField>) -> f64 {
        field.and_then(|f| self.field(f)).unwrap_or(0.0)
    }

    pub fn raw_or_default(&self, field: Option<&RegisterField>) -> u16 {
        field.and_then(|f| self.get(f.address)).unwrap_or(0)
    }
}
// }}}

// decoding {{{

impl RuntimeRegisterMap {
    /// Translate a raw register window into the normalized runtime snapshot.
    pub fn decode(&self, serial: Serial, window: &RegisterWindow) -> InverterRuntimeData {
        let mut data = InverterRuntimeData::new(serial);
        data.status = window.raw_or_default(self.status.as_ref());
        for i in 0..3 {
            data.v_pv[i] = window.field_or_default(self.v_pv[i].as_ref());
            data.p_pv[i] = window.field_or_default(self.p_pv[i].as_ref());
        }
        data.v_bat = window.field_or_default(self.v_bat.as_ref());
        data.set_soc_raw(window.raw_or_default(self.soc.as_ref()));
        data.set_soh_raw(window.raw_or_default(self.soh.as_ref()));
        data.p_charge = window.field_or_default(self.p_charge.as_ref());
        data.p_discharge = window.field_or_default(self.p_discharge.as_ref());
        for i in 0..2 {
            data.v_grid[i] = window.field_or_default(self.v_grid[i].as_ref());
            data.v_eps[i] = window.field_or_default(self.v_eps[i].as_ref());
        }
        data.f_grid = window.field_or_default(self.f_grid.as_ref());
        data.p_inv = window.field_or_default(self.p_inv.as_ref());
        data.p_to_grid = window.field_or_default(self.p_to_grid.as_ref());
        data.p_to_user = window.field_or_default(self.p_to_user.as_ref());
        data.f_eps = window.field_or_default(self.f_eps.as_ref());
        data.p_eps = window.field_or_default(self.p_eps.as_ref());
        data.t_inner = window.field_or_default(self.t_inner.as_ref());
        data.t_radiator = window.field_or_default(self.t_radiator.as_ref());
        data.calculate_derived_values();
        data
    }
}

impl EnergyRegisterMap {
    pub fn decode(&self, serial: Serial, window: &RegisterWindow) -> InverterEnergyData {
        let mut data = InverterEnergyData {
            serial,
            time: Some(chrono::Utc::now()),
            ..InverterEnergyData::default()
        };
        for i in 0..3 {
            data.e_pv_day[i] = window.field_or_default(self.e_pv_day[i].as_ref());
            data.e_pv_all[i] = window.field_or_default(self.e_pv_all[i].as_ref());
        }
        data.e_chg_day = window.field_or_default(self.e_chg_day.as_ref());
        data.e_dischg_day = window.field_or_default(self.e_dischg_day.as_ref());
        data.e_to_grid_day = window.field_or_default(self.e_to_grid_day.as_ref());
        data.e_to_user_day = window.field_or_default(self.e_to_user_day.as_ref());
        data.e_eps_day = window.field_or_default(self.e_eps_day.as_ref());
        data.e_chg_all = window.field_or_default(self.e_chg_all.as_ref());
        data.e_dischg_all = window.field_or_default(self.e_dischg_all.as_ref());
        data.e_to_grid_all = window.field_or_default(self.e_to_grid_all.as_ref());
        data.e_to_user_all = window.field_or_default(self.e_to_user_all.as_ref());
        data.e_eps_all = window.field_or_default(self.e_eps_all.as_ref());
        data.calculate_derived_values();
        data
    }
}

impl BatteryRegisterMap {
    pub fn decode(&self, serial: Serial, window: &RegisterWindow) -> BatteryBankData {
        let bank_soc_raw = window.raw_or_default(self.bank_soc.as_ref());
        let mut bank = BatteryBankData {
            serial,
            module_count: window
                .raw_or_default(self.module_count.as_ref())
                .min(MAX_MODULE_SLOTS),
            capacity_ah: window.field_or_default(self.capacity_ah.as_ref()),
            voltage: window.field_or_default(self.bank_voltage.as_ref()),
            current: window.field_or_default(self.bank_current.as_ref()),
            soc: crate::data::clamp_pct(bank_soc_raw),
            soc_raw: bank_soc_raw,
            max_cell_voltage: window.field_or_default(self.max_cell_voltage.as_ref()),
            min_cell_voltage: window.field_or_default(self.min_cell_voltage.as_ref()),
            max_cell_temp: window.field_or_default(self.max_cell_temp.as_ref()),
            min_cell_temp: window.field_or_default(self.min_cell_temp.as_ref()),
            cycle_count: window.raw_or_default(self.cycle_count.as_ref()),
            modules: Vec::new(),
        };

        for slot in 0..bank.module_count {
            let soc_raw = window.raw_or_default(Some(&self.module_soc(slot)));
            let soh_raw = window.raw_or_default(Some(&self.module_soh(slot)));
            bank.modules.push(BatteryData {
                slot,
                voltage: window.field_or_default(Some(&self.module_voltage(slot))),
                current: window.field_or_default(Some(&self.module_current(slot))),
                soc: crate::data::clamp_pct(soc_raw),
                soc_raw,
                soh: crate::data::clamp_pct(soh_raw),
                soh_raw,
                max_cell_voltage: window
                    .field_or_default(Some(&self.module_max_cell_voltage(slot))),
                min_cell_voltage: window
                    .field_or_default(Some(&self.module_min_cell_voltage(slot))),
            });
        }
        bank
    }
}

impl MidboxRegisterMap {
    pub fn decode(&self, serial: Serial, window: &RegisterWindow) -> MidboxRuntimeData {
        let mut data = MidboxRuntimeData {
            serial,
            status: window.raw_or_default(self.status.as_ref()),
            f_grid: window.field_or_default(self.f_grid.as_ref()),
            ..MidboxRuntimeData::default()
        };
        for i in 0..2 {
            data.v_grid[i] = window.field_or_default(self.v_grid[i].as_ref());
            data.v_load[i] = window.field_or_default(self.v_load[i].as_ref());
            data.v_gen[i] = window.field_or_default(self.v_gen[i].as_ref());
        }
        data.smart_ports = self
            .smart_ports
            .iter()
            .flatten()
            .filter_map(|f| window.get(f.address))
            .collect();
        data
    }
}
// }}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_map_to_families() {
        assert_eq!(ModelFamily::from_type_code(0x0002), ModelFamily::Hybrid12k);
        assert_eq!(ModelFamily::from_type_code(0x0003), ModelFamily::Hybrid18k);
        assert_eq!(ModelFamily::from_type_code(0x0010), ModelFamily::Xp6000);
        assert_eq!(ModelFamily::from_type_code(0x0032), ModelFamily::GridBoss);
        assert_eq!(ModelFamily::from_type_code(0xbeef), ModelFamily::Unknown);
    }

    #[test]
    fn families_disagree_on_pv_power_layout() {
        let wide = HYBRID_18K_RUNTIME.p_pv[0].unwrap();
        let narrow = HYBRID_12K_RUNTIME.p_pv[0].unwrap();
        assert_eq!(wide.bit_width, BitWidth::Bits32);
        assert_eq!(wide.address, 6);
        assert_eq!(narrow.bit_width, BitWidth::Bits16);
        assert_eq!(narrow.address, 7);
        // grid voltage sits 4 registers lower on the 16-bit family
        assert_eq!(HYBRID_18K_RUNTIME.v_grid[0].unwrap().address, 16);
        assert_eq!(HYBRID_12K_RUNTIME.v_grid[0].unwrap().address, 12);
    }

    #[test]
    fn xp6000_has_no_third_string_or_export() {
        assert!(XP6000_RUNTIME.v_pv[2].is_none());
        assert!(XP6000_RUNTIME.p_to_grid.is_none());
        assert!(XP6000_ENERGY.e_to_grid_all.is_none());
    }

    #[test]
    fn named_params_resolve() {
        assert_eq!(
            lookup_param("system_charge_rate"),
            Some(ParamTarget::Scalar {
                register: 64,
                scale: 1.0
            })
        );
        assert_eq!(
            lookup_param("ac_charge_enable"),
            Some(ParamTarget::Flag {
                register: 21,
                mask: 1 << 7
            })
        );
        assert_eq!(lookup_param("flux_capacitor"), None);
    }
}
