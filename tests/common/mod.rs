#![allow(dead_code)]

use solarlink::data::{
    BatteryBankData, BatteryData, InverterEnergyData, InverterRuntimeData, MidboxRuntimeData,
    Serial,
};
use solarlink::error::{Error, Result};
use solarlink::transport::{Transport, TransportCapabilities, MODBUS_CAPABILITIES};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub fn common_setup() {
    let _ = env_logger::try_init();
}

/// Inspectable state behind a [`FakeTransport`]. Tests keep a handle so
/// they can count attempts after the transport moves into an orchestrator.
#[derive(Default)]
pub struct FakeState {
    pub connected: bool,
    pub fail_connect: bool,
    /// Inject this error kind into every snapshot read.
    pub fail_reads: Option<FailKind>,
    /// Inject failures into holding-register access too.
    pub fail_holding: bool,
    pub connect_attempts: usize,
    pub read_attempts: usize,
    pub runtime: Option<InverterRuntimeData>,
    pub holding: HashMap<u16, u16>,
    pub writes: Vec<(u16, u16)>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailKind {
    Read,
    Write,
    Timeout,
    Connection,
}

impl FailKind {
    fn to_error(self) -> Error {
        match self {
            FailKind::Read => Error::read("injected read failure"),
            FailKind::Write => Error::write("injected write failure"),
            FailKind::Timeout => Error::timeout("injected timeout"),
            FailKind::Connection => Error::connection("injected connection failure"),
        }
    }
}

pub struct FakeTransport {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> (Self, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }

    pub fn healthy_with_runtime(runtime: InverterRuntimeData) -> (Self, Arc<Mutex<FakeState>>) {
        let (transport, state) = Self::new();
        state.lock().unwrap().runtime = Some(runtime);
        (transport, state)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.fail_connect {
            state.connected = false;
            return Err(Error::connection("injected connect failure"));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.state.lock().unwrap().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn capabilities(&self) -> &'static TransportCapabilities {
        &MODBUS_CAPABILITIES
    }

    async fn read_runtime(&mut self) -> Result<Option<InverterRuntimeData>> {
        let mut state = self.state.lock().unwrap();
        state.read_attempts += 1;
        if let Some(kind) = state.fail_reads {
            return Err(kind.to_error());
        }
        Ok(state.runtime.clone())
    }

    async fn read_energy(&mut self) -> Result<Option<InverterEnergyData>> {
        let mut state = self.state.lock().unwrap();
        state.read_attempts += 1;
        if let Some(kind) = state.fail_reads {
            return Err(kind.to_error());
        }
        Ok(None)
    }

    async fn read_battery(&mut self) -> Result<Option<BatteryBankData>> {
        let mut state = self.state.lock().unwrap();
        state.read_attempts += 1;
        if let Some(kind) = state.fail_reads {
            return Err(kind.to_error());
        }
        Ok(None)
    }

    async fn read_parameters(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let state = self.state.lock().unwrap();
        if state.fail_holding {
            return Err(Error::read("injected holding-register failure"));
        }
        Ok((start..start + count)
            .map(|r| state.holding.get(&r).copied().unwrap_or(0))
            .collect())
    }

    async fn write_parameters(&mut self, values: &HashMap<u16, u16>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_holding {
            return Err(Error::write("injected holding-register failure"));
        }
        let mut writes: Vec<(u16, u16)> = values.iter().map(|(k, v)| (*k, *v)).collect();
        writes.sort_unstable();
        for (register, value) in writes {
            state.holding.insert(register, value);
            state.writes.push((register, value));
        }
        Ok(())
    }
}

/// Sample data builders.
pub struct Factory;

impl Factory {
    pub fn serial() -> Serial {
        "CC12345678".into()
    }

    /// A clean runtime sample: grid-tied, mid-day production.
    pub fn runtime() -> InverterRuntimeData {
        let mut data = InverterRuntimeData::new(Self::serial());
        data.status = 16;
        data.v_pv = [321.5, 318.0, 0.0];
        data.p_pv = [2100.0, 1900.0, 0.0];
        data.v_bat = 52.4;
        data.set_soc_raw(85);
        data.set_soh_raw(99);
        data.p_charge = 1500.0;
        data.p_discharge = 0.0;
        data.v_grid = [241.2, 240.8];
        data.f_grid = 60.0;
        data.p_inv = 2400.0;
        data.p_to_grid = 100.0;
        data.p_to_user = 0.0;
        data.v_eps = [240.0, 240.0];
        data.f_eps = 60.0;
        data.p_eps = 0.0;
        data.t_inner = 41.5;
        data.t_radiator = 38.0;
        data.rated_power_w = Some(12_000.0);
        data.calculate_derived_values();
        data
    }

    pub fn energy() -> InverterEnergyData {
        let mut data = InverterEnergyData {
            serial: Self::serial(),
            e_pv_day: [8.4, 7.9, 0.0],
            e_chg_day: 5.1,
            e_dischg_day: 3.2,
            e_to_grid_day: 2.0,
            e_to_user_day: 6.3,
            e_eps_day: 0.4,
            e_pv_all: [1500.2, 1480.8, 0.0],
            e_chg_all: 900.0,
            e_dischg_all: 860.5,
            e_to_grid_all: 410.0,
            e_to_user_all: 1200.7,
            e_eps_all: 55.1,
            ..InverterEnergyData::default()
        };
        data.calculate_derived_values();
        data
    }

    pub fn battery_module(slot: u16) -> BatteryData {
        BatteryData {
            slot,
            voltage: 51.8,
            current: 12.5,
            soc: 85,
            soc_raw: 85,
            soh: 98,
            soh_raw: 98,
            max_cell_voltage: 3.345,
            min_cell_voltage: 3.31,
        }
    }

    pub fn battery_bank() -> BatteryBankData {
        BatteryBankData {
            serial: Self::serial(),
            module_count: 2,
            capacity_ah: 200.0,
            voltage: 51.9,
            current: 25.0,
            soc: 85,
            soc_raw: 85,
            max_cell_voltage: 3.345,
            min_cell_voltage: 3.30,
            max_cell_temp: 28.5,
            min_cell_temp: 24.0,
            cycle_count: 120,
            modules: vec![Self::battery_module(0), Self::battery_module(1)],
        }
    }

    pub fn midbox() -> MidboxRuntimeData {
        MidboxRuntimeData {
            serial: "GB00000001".into(),
            status: 1,
            v_grid: [240.5, 240.1],
            v_load: [239.8, 240.0],
            v_gen: [0.0, 0.0],
            f_grid: 60.0,
            smart_ports: vec![0, 1, 2, 0],
        }
    }
}
