mod common;
use common::*;

use solarlink::data::Serial;
use solarlink::registers::{
    lookup_param, ParamTarget, RegisterField, RegisterWindow, HYBRID_12K_RUNTIME, HYBRID_18K_RUNTIME,
    HYBRID_BATTERY, HYBRID_ENERGY, XP6000_RUNTIME,
};
use solarlink::transport::Transport;

fn serial() -> Serial {
    "CC12345678".into()
}

#[test]
fn thirty_two_bit_assembly() {
    let field = RegisterField::u32(0, 1.0);
    for (lo, hi) in [
        (0u16, 0u16),
        (1, 0),
        (0, 1),
        (0xffff, 0),
        (0, 0xffff),
        (0xffff, 0xffff),
        (0x5678, 0x1234),
    ] {
        let values = [lo, hi];
        let window = RegisterWindow::new(0, &values);
        let expected = f64::from(lo) + f64::from(hi) * 65536.0;
        assert_eq!(window.field(&field), Some(expected), "lo={lo} hi={hi}");
    }
}

#[test]
fn scale_divisors() {
    for (scale, expected) in [(1.0, 1234.0), (10.0, 123.4), (100.0, 12.34), (1000.0, 1.234)] {
        let field = RegisterField::u16(0, scale);
        let values = [1234u16];
        let window = RegisterWindow::new(0, &values);
        assert_eq!(window.field(&field), Some(expected));
    }
}

#[test]
fn signed_temperature_decode() {
    // -5.0 degrees as two's-complement tenths
    let raw = (-50i16) as u16;
    let field = RegisterField::i16(0, 10.0);
    let values = [raw];
    let window = RegisterWindow::new(0, &values);
    assert_eq!(window.field(&field), Some(-5.0));
}

/// Build a 40-register runtime block for the 18k layout.
fn runtime_regs_18k() -> Vec<u16> {
    let mut regs = vec![0u16; 40];
    regs[0] = 16; // status
    regs[1] = 3215; // v_pv_1 = 321.5
    regs[4] = 524; // v_bat = 52.4
    regs[5] = 85; // soc
    regs[6] = 0x0001; // p_pv_1 low word
    regs[7] = 0x0002; // p_pv_1 high word -> 131073 W
    regs[12] = 1500; // p_charge
    regs[14] = 99; // soh
    regs[16] = 2412; // v_grid_l1 = 241.2
    regs[18] = 6001; // f_grid = 60.01
    regs[21] = 350; // p_to_user
    regs[20] = 100; // p_to_grid
    regs
}

#[test]
fn runtime_decode_18k() {
    let regs = runtime_regs_18k();
    let window = RegisterWindow::new(0, &regs);
    let data = HYBRID_18K_RUNTIME.decode(serial(), &window);

    assert_eq!(data.status, 16);
    assert_eq!(data.v_pv[0], 321.5);
    assert_eq!(data.v_bat, 52.4);
    assert_eq!(data.soc, 85);
    assert_eq!(data.soc_raw, 85);
    assert_eq!(data.soh, 99);
    assert_eq!(data.p_pv[0], 131073.0);
    assert_eq!(data.p_charge, 1500.0);
    assert_eq!(data.v_grid[0], 241.2);
    assert_eq!(data.f_grid, 60.01);
    assert_eq!(data.p_grid, 250.0);
}

#[test]
fn runtime_decode_12k_same_quantities_different_registers() {
    let mut regs = vec![0u16; 40];
    regs[5] = 85; // soc
    regs[7] = 4100; // p_pv_1 as a single 16-bit register
    regs[12] = 2412; // grid voltage 4 registers lower than the 18k
    regs[14] = 6000;
    let window = RegisterWindow::new(0, &regs);
    let data = HYBRID_12K_RUNTIME.decode(serial(), &window);

    assert_eq!(data.soc, 85);
    assert_eq!(data.p_pv[0], 4100.0);
    assert_eq!(data.v_grid[0], 241.2);
    assert_eq!(data.f_grid, 60.0);
}

#[test]
fn absent_field_yields_default_not_error() {
    let mut regs = vec![0u16; 40];
    regs[16] = 9999; // where the 18k keeps grid voltage; xp6000 export slot
    let window = RegisterWindow::new(0, &regs);
    let data = XP6000_RUNTIME.decode(serial(), &window);

    // third string and export are absent on this family
    assert_eq!(data.v_pv[2], 0.0);
    assert_eq!(data.p_pv[2], 0.0);
    assert_eq!(data.p_to_grid, 0.0);
}

#[test]
fn clamped_soc_keeps_raw_value() {
    let mut regs = vec![0u16; 40];
    regs[5] = 144;
    let window = RegisterWindow::new(0, &regs);
    let data = HYBRID_18K_RUNTIME.decode(serial(), &window);
    assert_eq!(data.soc, 100);
    assert_eq!(data.soc_raw, 144);
}

#[test]
fn energy_decode_with_lifetime_pairs() {
    let mut regs = vec![0u16; 40];
    regs[0] = 84; // e_pv_day_1 = 8.4 (window starts at register 40)
    regs[1] = 79;
    // e_pv_all_1 = 150002 tenths = 15000.2 kWh across registers 48/49
    let raw = 150_002u32;
    regs[8] = (raw & 0xffff) as u16;
    regs[9] = (raw >> 16) as u16;
    let window = RegisterWindow::new(40, &regs);
    let data = HYBRID_ENERGY.decode(serial(), &window);

    assert_eq!(data.e_pv_day[0], 8.4);
    assert_eq!(data.e_pv_day[1], 7.9);
    assert_eq!(data.e_pv_day_total, 16.3);
    assert_eq!(data.e_pv_all[0], 15000.2);
}

#[test]
fn battery_decode_with_ghost_slot() {
    let mut regs = vec![0u16; 40];
    regs[0] = 2; // module count (register 80)
    regs[8] = 519; // bank voltage 51.9 (register 88)
    regs[9] = 85; // bank soc (register 89)
    // module 0 at registers 90..96
    regs[10] = 518; // voltage 51.8
    regs[11] = 1250; // current 12.50
    regs[12] = 85; // soc
    regs[13] = 98; // soh
    regs[14] = 3345; // max cell 3.345
    regs[15] = 3310; // min cell 3.310
    // module 1 left all-zero: a ghost slot
    let window = RegisterWindow::new(80, &regs);
    let bank = HYBRID_BATTERY.decode(serial(), &window);

    assert_eq!(bank.module_count, 2);
    assert_eq!(bank.modules.len(), 2);
    assert_eq!(bank.voltage, 51.9);
    assert_eq!(bank.soc, 85);
    assert_eq!(bank.modules[0].voltage, 51.8);
    assert_eq!(bank.modules[0].current, 12.5);
    assert_eq!(bank.modules[0].max_cell_voltage, 3.345);
    assert!(!bank.modules[0].is_ghost());
    assert!(bank.modules[1].is_ghost());
}

#[tokio::test]
async fn named_flag_write_preserves_sibling_bits() {
    let (mut transport, state) = FakeTransport::new();
    state.lock().unwrap().holding.insert(21, 0b0000_0100_0000_0001);

    transport
        .write_named_parameter("ac_charge_enable", 1.0)
        .await
        .unwrap();

    let word = state.lock().unwrap().holding[&21];
    assert_eq!(word, 0b0000_0100_1000_0001); // bit 7 set, bits 0 and 10 intact

    transport
        .write_named_parameter("ac_charge_enable", 0.0)
        .await
        .unwrap();
    let word = state.lock().unwrap().holding[&21];
    assert_eq!(word, 0b0000_0100_0000_0001);
}

#[tokio::test]
async fn named_scalar_roundtrip() {
    let (mut transport, state) = FakeTransport::new();
    state.lock().unwrap().holding.insert(64, 80);

    assert_eq!(
        transport.read_named_parameter("system_charge_rate").await.unwrap(),
        80.0
    );

    transport
        .write_named_parameter("system_charge_rate", 55.0)
        .await
        .unwrap();
    assert_eq!(state.lock().unwrap().holding[&64], 55);
}

#[tokio::test]
async fn unknown_parameter_name_is_an_error() {
    let (mut transport, _state) = FakeTransport::new();
    assert!(transport.read_named_parameter("warp_drive").await.is_err());
    assert!(transport
        .write_named_parameter("warp_drive", 1.0)
        .await
        .is_err());
}

#[test]
fn flag_params_share_the_control_word() {
    for name in [
        "ac_charge_enable",
        "forced_discharge_enable",
        "charge_priority_enable",
    ] {
        match lookup_param(name) {
            Some(ParamTarget::Flag { register, .. }) => assert_eq!(register, 21),
            other => panic!("{name} resolved to {other:?}"),
        }
    }
}
