//! Data integrity: corruption canaries and counter validators.
//!
//! A half-duplex relay that loses sync returns registers shifted by a word
//! or padded with 0xFFFF; the cheap physical-plausibility checks here catch
//! that before a bad sample reaches consumers or pollutes a long-lived
//! energy counter. Verdicts are data, never errors: disposal is the
//! caller's business.

use crate::data::{
    BatteryBankData, BatteryData, InverterEnergyData, InverterRuntimeData, MidboxRuntimeData,
};

use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Largest believable lifetime-counter increase in one polling interval.
pub const MAX_LIFETIME_DELTA_KWH: f64 = 100.0;

/// Consecutive downward rejections before a decrease is taken as a genuine
/// meter reset.
pub const SELF_HEAL_THRESHOLD: u32 = 5;

/// A healed baseline below this is not believable for a machine that has
/// ever produced energy.
pub const MIN_LIFETIME_KWH: f64 = 1.0;

/// Headroom multiplier on the daily-energy caps.
pub const DAILY_MARGIN: f64 = 1.25;

// canaries {{{

/// Cheap physical-plausibility check on one sample.
pub trait Canary {
    /// The first implausibility found, for logging. `None` means clean.
    fn corruption(&self) -> Option<String>;

    fn is_corrupt(&self) -> bool {
        self.corruption().is_some()
    }
}

/// Zero is legitimate off-grid operation; anything else far from mains
/// frequency is a decode gone wrong.
fn frequency_implausible(hz: f64) -> bool {
    hz != 0.0 && !(30.0..=90.0).contains(&hz)
}

/// A non-zero cell outside [1, 5] V cannot be lithium chemistry.
fn cell_voltage_implausible(v: f64) -> bool {
    v != 0.0 && !(1.0..=5.0).contains(&v)
}

impl Canary for InverterRuntimeData {
    fn corruption(&self) -> Option<String> {
        if self.soc_raw > 100 {
            return Some(format!("raw SOC {} above 100%", self.soc_raw));
        }
        if self.soh_raw > 100 {
            return Some(format!("raw SOH {} above 100%", self.soh_raw));
        }
        if frequency_implausible(self.f_grid) {
            return Some(format!("grid frequency {} Hz outside [30, 90]", self.f_grid));
        }
        if frequency_implausible(self.f_eps) {
            return Some(format!("EPS frequency {} Hz outside [30, 90]", self.f_eps));
        }
        if self.v_bat > 100.0 {
            return Some(format!("battery voltage {} V above 100", self.v_bat));
        }
        // only when the rating is known; a 0xFFFF overflow sentinel dwarfs
        // any real power figure
        if let Some(rated) = self.rated_power_w {
            for p in self.power_fields() {
                if p.abs() > 2.0 * rated {
                    return Some(format!("power {} W above twice rated {} W", p, rated));
                }
            }
        }
        None
    }
}

impl Canary for BatteryData {
    fn corruption(&self) -> Option<String> {
        if self.soc_raw > 100 {
            return Some(format!("module {}: raw SOC {} above 100%", self.slot, self.soc_raw));
        }
        if self.soh_raw > 100 {
            return Some(format!("module {}: raw SOH {} above 100%", self.slot, self.soh_raw));
        }
        if self.voltage > 100.0 {
            return Some(format!(
                "module {}: voltage {} V above 100",
                self.slot, self.voltage
            ));
        }
        if self.current.abs() > 500.0 {
            return Some(format!(
                "module {}: current {} A beyond 500",
                self.slot, self.current
            ));
        }
        if cell_voltage_implausible(self.max_cell_voltage)
            || cell_voltage_implausible(self.min_cell_voltage)
        {
            return Some(format!(
                "module {}: cell voltage outside [1, 5] V",
                self.slot
            ));
        }
        if self.min_cell_voltage > self.max_cell_voltage
            && self.min_cell_voltage != 0.0
            && self.max_cell_voltage != 0.0
        {
            return Some(format!(
                "module {}: min cell {} V above max cell {} V",
                self.slot, self.min_cell_voltage, self.max_cell_voltage
            ));
        }
        None
    }
}

impl Canary for BatteryBankData {
    fn corruption(&self) -> Option<String> {
        if self.soc_raw > 100 {
            return Some(format!("raw bank SOC {} above 100%", self.soc_raw));
        }
        if self.module_count > 20 {
            return Some(format!("module count {} above 20", self.module_count));
        }
        if self.current.abs() > 500.0 {
            return Some(format!("bank current {} A beyond 500", self.current));
        }
        if self.voltage > 100.0 {
            return Some(format!("bank voltage {} V above 100", self.voltage));
        }
        if cell_voltage_implausible(self.max_cell_voltage)
            || cell_voltage_implausible(self.min_cell_voltage)
        {
            return Some("bank cell voltage outside [1, 5] V".to_string());
        }
        if self.min_cell_voltage > self.max_cell_voltage
            && self.min_cell_voltage != 0.0
            && self.max_cell_voltage != 0.0
        {
            return Some(format!(
                "bank min cell {} V above max cell {} V",
                self.min_cell_voltage, self.max_cell_voltage
            ));
        }
        // a corrupt module poisons the bank; ghost slots don't
        for module in &self.modules {
            if module.is_ghost() {
                continue;
            }
            if let Some(reason) = module.corruption() {
                return Some(reason);
            }
        }
        None
    }
}

impl Canary for MidboxRuntimeData {
    fn corruption(&self) -> Option<String> {
        if frequency_implausible(self.f_grid) {
            return Some(format!("grid frequency {} Hz outside [30, 90]", self.f_grid));
        }
        for (port, code) in self.smart_ports.iter().enumerate() {
            if *code > 2 {
                return Some(format!("smart port {port} code {code} outside {{0,1,2}}"));
            }
        }
        // below 5 V is CT leakage on a dead leg; 5-50 V is nothing a real
        // service leg can float at; above 300 V is a 16-bit overflow
        for v in self.leg_voltages() {
            if (5.0..50.0).contains(&v) || v > 300.0 {
                return Some(format!("leg voltage {v} V in impossible band"));
            }
        }
        None
    }
}
// }}}

// counter validators {{{

/// Verdict on one candidate counter value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Verdict {
    Valid,
    Rejected,
    SelfHealed,
}

impl Verdict {
    pub fn accepted(&self) -> bool {
        matches!(self, Verdict::Valid | Verdict::SelfHealed)
    }
}

/// Per-field validator state: the last accepted value and the current run
/// of downward rejections.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ValidationState {
    pub previous_value: Option<f64>,
    pub reject_count: u32,
}

/// Per-device counter validator.
///
/// Owned by whatever tracks the device's session and passed in by handle;
/// state is never process-global, so concurrent devices and tests cannot
/// interfere. Single-writer discipline is assumed.
#[derive(Clone, Debug, Default)]
pub struct CounterValidator {
    fields: HashMap<String, ValidationState>,
}

impl CounterValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, field: &str) -> Option<&ValidationState> {
        self.fields.get(field)
    }

    /// Validate a lifetime (monotonic) counter.
    ///
    /// Decreases are rejected until they persist long enough to look like a
    /// genuine meter/firmware reset, at which point a plausible value is
    /// adopted as the new baseline. An upward spike beyond the per-poll
    /// delta is rejected too, but it is not a decrease event: the downward
    /// streak resets.
    pub fn validate_lifetime_counter(&mut self, field: &str, value: f64) -> Verdict {
        let state = self.fields.entry(field.to_string()).or_default();

        let Some(previous) = state.previous_value else {
            state.previous_value = Some(value);
            state.reject_count = 0;
            return Verdict::Valid;
        };

        if value >= previous {
            if value - previous <= MAX_LIFETIME_DELTA_KWH {
                state.previous_value = Some(value);
                state.reject_count = 0;
                return Verdict::Valid;
            }
            warn!(
                "{field}: rejecting jump {previous} -> {value} kWh (over {MAX_LIFETIME_DELTA_KWH} per poll)"
            );
            state.reject_count = 0;
            return Verdict::Rejected;
        }

        state.reject_count += 1;
        if state.reject_count >= SELF_HEAL_THRESHOLD && value >= MIN_LIFETIME_KWH {
            warn!(
                "{field}: accepting persistent decrease {previous} -> {value} kWh as a counter reset"
            );
            state.previous_value = Some(value);
            state.reject_count = 0;
            return Verdict::SelfHealed;
        }

        debug!(
            "{field}: rejecting decrease {previous} -> {value} kWh (streak {})",
            state.reject_count
        );
        Verdict::Rejected
    }

    /// Validate a daily counter against what the machine could physically
    /// have produced.
    ///
    /// Decreases always pass: midnight resets them. With no prior sample
    /// the cap is a full day at rated power; with one, the cap shrinks to
    /// the elapsed interval (clamped to 24 h), both with margin.
    pub fn validate_daily_energy_bounds(
        &mut self,
        field: &str,
        value: f64,
        rated_kw: f64,
        elapsed: Duration,
    ) -> Verdict {
        let state = self.fields.entry(field.to_string()).or_default();

        match state.previous_value {
            Some(previous) if value < previous => {
                state.previous_value = Some(value);
                state.reject_count = 0;
                Verdict::Valid
            }
            Some(previous) => {
                let elapsed_h = (elapsed.as_secs_f64() / 3600.0).min(24.0);
                let cap = rated_kw * elapsed_h * DAILY_MARGIN;
                if value - previous <= cap {
                    state.previous_value = Some(value);
                    state.reject_count = 0;
                    Verdict::Valid
                } else {
                    warn!(
                        "{field}: rejecting increase {previous} -> {value} kWh in {elapsed:?} (cap {cap:.3})"
                    );
                    Verdict::Rejected
                }
            }
            None => {
                let cap = rated_kw * 24.0 * DAILY_MARGIN;
                if value <= cap {
                    state.previous_value = Some(value);
                    Verdict::Valid
                } else {
                    warn!("{field}: rejecting first reading {value} kWh (day cap {cap:.3})");
                    Verdict::Rejected
                }
            }
        }
    }

    /// Validate a whole energy snapshot at once.
    ///
    /// A desynced transaction corrupts every field together, so one
    /// implausible field rejects the read wholesale and no per-field state
    /// advances. Daily caps are skipped when the rating is unknown.
    pub fn validate_energy_snapshot(
        &mut self,
        data: &InverterEnergyData,
        rated_kw: Option<f64>,
        elapsed: Duration,
    ) -> Verdict {
        let mut trial = self.clone();
        let mut healed = false;
        let mut rejected: Vec<&'static str> = Vec::new();

        for (field, value) in data.lifetime_fields() {
            match trial.validate_lifetime_counter(field, value) {
                Verdict::Rejected => rejected.push(field),
                Verdict::SelfHealed => healed = true,
                Verdict::Valid => {}
            }
        }

        if let Some(rated_kw) = rated_kw {
            for (field, value) in data.daily_fields() {
                if trial.validate_daily_energy_bounds(field, value, rated_kw, elapsed)
                    == Verdict::Rejected
                {
                    rejected.push(field);
                }
            }
        }

        if !rejected.is_empty() {
            // No accepted value is committed, but the rejection bookkeeping
            // on the offending fields is: a persistent counter reset still
            // builds its streak toward self-healing.
            for field in rejected {
                if let Some(state) = trial.fields.get(field) {
                    self.fields.insert(field.to_string(), *state);
                }
            }
            return Verdict::Rejected;
        }

        self.fields = trial.fields;
        if healed {
            Verdict::SelfHealed
        } else {
            Verdict::Valid
        }
    }
}
// }}}
