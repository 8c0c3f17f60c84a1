//! Device discovery and parallel grouping.
//!
//! Discovery probes speculative register addresses on whatever transport is
//! connected; a device that answers nothing is still a device, so every
//! read failure degrades to conservative defaults instead of raising.

use crate::data::{DeviceDiscoveryInfo, Serial};
use crate::registers::{HoldRegister, ModelFamily};
use crate::transport::Transport;

use log::{debug, warn};
use serde::Serialize;

/// One physical cluster of devices sharing a parallel number.
///
/// A GridBOSS/MID unit coordinates the cluster's shared grid/load/generator
/// connections; it is attached as `controller`, never counted among the
/// producing members.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ParallelGroup {
    pub parallel_number: Option<u16>,
    pub members: Vec<DeviceDiscoveryInfo>,
    pub controller: Option<DeviceDiscoveryInfo>,
}

impl ParallelGroup {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn has_controller(&self) -> bool {
        self.controller.is_some()
    }
}

/// Probe a connected transport and classify the device behind it.
///
/// Never fails: any register error collapses into `ModelFamily::Unknown`
/// with no parallel key.
pub async fn probe(transport: &mut dyn Transport, serial: Serial) -> DeviceDiscoveryInfo {
    let type_code = match transport
        .read_parameters(HoldRegister::DeviceTypeCode.into(), 1)
        .await
    {
        Ok(values) if !values.is_empty() => values[0],
        Ok(_) => {
            warn!("{serial}: empty device type response, classifying as unknown");
            return DeviceDiscoveryInfo::unknown(serial);
        }
        Err(e) => {
            warn!("{serial}: device type probe failed ({e}), classifying as unknown");
            return DeviceDiscoveryInfo::unknown(serial);
        }
    };

    let family = ModelFamily::from_type_code(type_code);
    if family == ModelFamily::Unknown {
        debug!("{serial}: unrecognised device type code {type_code:#06x}");
    }

    let firmware_version = match transport
        .read_parameters(HoldRegister::FirmwareCode0.into(), 3)
        .await
    {
        Ok(values) => decode_firmware(&values),
        Err(e) => {
            debug!("{serial}: firmware probe failed: {e}");
            None
        }
    };

    let (parallel_number, parallel_phase) = match transport
        .read_parameters(HoldRegister::ParallelNumber.into(), 2)
        .await
    {
        // parallel number 0 means the device runs standalone
        Ok(values) if values.len() == 2 && values[0] != 0 => {
            (Some(values[0]), Some(values[1]))
        }
        Ok(_) => (None, None),
        Err(e) => {
            debug!("{serial}: parallel group probe failed: {e}");
            (None, None)
        }
    };

    DeviceDiscoveryInfo {
        serial,
        device_type_code: type_code,
        is_gridboss: family.is_gridboss(),
        is_inverter: family.is_inverter(),
        model_family: family,
        parallel_number,
        parallel_phase,
        firmware_version,
    }
}

/// Firmware registers pack two ASCII characters each, high byte first.
fn decode_firmware(values: &[u16]) -> Option<String> {
    let chars: Vec<u8> = values
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .filter(|b| *b != 0)
        .collect();
    if chars.is_empty() || !chars.iter().all(|b| b.is_ascii_graphic()) {
        return None;
    }
    Some(String::from_utf8_lossy(&chars).into_owned())
}

/// Merge discovered devices into physical clusters.
///
/// Clustering is by parallel number alone; phase identifies a member's leg
/// within the cluster but never splits one. Devices with no parallel key
/// stand alone. At most one GridBOSS per cluster becomes the controller;
/// any further coordinator is kept as a plain entry so nothing is dropped.
pub fn group_devices(devices: Vec<DeviceDiscoveryInfo>) -> Vec<ParallelGroup> {
    let mut groups: Vec<ParallelGroup> = Vec::new();

    for device in devices {
        match device.parallel_number {
            None => {
                // standalone: its own group, controller slot if it is a MID
                let mut group = ParallelGroup {
                    parallel_number: None,
                    ..ParallelGroup::default()
                };
                if device.is_gridboss {
                    group.controller = Some(device);
                } else {
                    group.members.push(device);
                }
                groups.push(group);
            }
            Some(number) => {
                let group = match groups
                    .iter_mut()
                    .find(|g| g.parallel_number == Some(number))
                {
                    Some(group) => group,
                    None => {
                        groups.push(ParallelGroup {
                            parallel_number: Some(number),
                            ..ParallelGroup::default()
                        });
                        groups.last_mut().expect("just pushed")
                    }
                };

                if device.is_gridboss {
                    if group.controller.is_none() {
                        group.controller = Some(device);
                    } else {
                        warn!(
                            "cluster {number} already has a controller, keeping {} as member",
                            device.serial
                        );
                        group.members.push(device);
                    }
                } else {
                    group.members.push(device);
                }
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inverter(serial: &str, number: Option<u16>, phase: Option<u16>) -> DeviceDiscoveryInfo {
        DeviceDiscoveryInfo {
            serial: serial.into(),
            device_type_code: 0x0003,
            is_gridboss: false,
            is_inverter: true,
            model_family: ModelFamily::Hybrid18k,
            parallel_number: number,
            parallel_phase: phase,
            firmware_version: None,
        }
    }

    fn gridboss(serial: &str, number: Option<u16>) -> DeviceDiscoveryInfo {
        DeviceDiscoveryInfo {
            serial: serial.into(),
            device_type_code: 0x0032,
            is_gridboss: true,
            is_inverter: false,
            model_family: ModelFamily::GridBoss,
            parallel_number: number,
            parallel_phase: None,
            firmware_version: None,
        }
    }

    #[test]
    fn equal_numbers_cluster_regardless_of_phase() {
        let groups = group_devices(vec![
            inverter("AA00000001", Some(1), Some(1)),
            inverter("AA00000002", Some(1), Some(2)),
            inverter("AA00000003", Some(2), Some(1)),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].member_count(), 2);
        assert_eq!(groups[1].member_count(), 1);
    }

    #[test]
    fn gridboss_attaches_as_controller_not_member() {
        let groups = group_devices(vec![
            inverter("AA00000001", Some(1), Some(1)),
            gridboss("GB00000001", Some(1)),
            inverter("AA00000002", Some(1), Some(2)),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].member_count(), 2);
        assert!(groups[0].has_controller());
        assert_eq!(
            groups[0].controller.as_ref().unwrap().serial.to_string(),
            "GB00000001"
        );
    }

    #[test]
    fn standalone_devices_get_their_own_groups() {
        let groups = group_devices(vec![
            inverter("AA00000001", None, None),
            gridboss("GB00000001", None),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].member_count(), 1);
        assert!(groups[1].has_controller());
        assert_eq!(groups[1].member_count(), 0);
    }

    #[test]
    fn second_controller_is_not_silently_dropped() {
        let groups = group_devices(vec![
            gridboss("GB00000001", Some(3)),
            gridboss("GB00000002", Some(3)),
        ]);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].has_controller());
        assert_eq!(groups[0].member_count(), 1);
    }

    #[test]
    fn firmware_decoding() {
        assert_eq!(
            decode_firmware(&[0x4641, 0x4142, 0x3132]),
            Some("FAAB12".to_string())
        );
        assert_eq!(decode_firmware(&[0, 0, 0]), None);
    }
}
