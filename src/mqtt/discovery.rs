//! Home Assistant MQTT Discovery payload construction (spec.md §4.5).

use serde::Serialize;

use crate::config::Config;
use crate::panel::{Partition, Zone};

use super::topics;

/// Device card shared (by value) across every discovery payload for this
/// panel, so Home Assistant groups every entity under one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

impl DeviceInfo {
    pub fn new(panel_id: &str, panel_name: &str) -> Self {
        Self {
            identifiers: vec![panel_id.to_string()],
            name: panel_name.to_string(),
            manufacturer: "Interlogix",
            model: "NX-584",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmPanelDiscovery {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub command_topic: String,
    pub availability_topic: String,
    pub payload_disarm: &'static str,
    pub payload_arm_home: &'static str,
    pub payload_arm_away: &'static str,
    pub code_disarm_required: bool,
    pub supported_features: Vec<&'static str>,
    pub device: DeviceInfo,
}

pub fn build_partition_discovery(
    cfg: &Config,
    partition: &Partition,
    device: &DeviceInfo,
) -> AlarmPanelDiscovery {
    let root = &cfg.topic_root;
    let panel_id = &cfg.panel_unique_id;
    let uid = &partition.unique_id;
    AlarmPanelDiscovery {
        name: format!("Partition {}", partition.index),
        unique_id: uid.clone(),
        state_topic: topics::partition_state_topic(root, panel_id, uid),
        command_topic: topics::partition_command_topic(root, panel_id, uid),
        availability_topic: topics::availability_topic(root, panel_id),
        payload_disarm: "DISARM",
        payload_arm_home: "ARM_HOME",
        payload_arm_away: "ARM_AWAY",
        code_disarm_required: false,
        supported_features: vec!["arm_home", "arm_away"],
        device: device.clone(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BinarySensorDiscovery {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub device_class: &'static str,
    pub payload_on: &'static str,
    pub payload_off: &'static str,
    pub device: DeviceInfo,
}

/// Home Assistant `device_class` for one of the three per-zone binary
/// sensors. `faulted` has no single canonical class for an arbitrary sensor
/// type, so it defaults to `motion` (spec.md §4.5: "a single default is
/// acceptable").
fn device_class_for_kind(kind: &str) -> &'static str {
    match kind {
        "trouble" => "tamper",
        "bypassed" => "safety",
        _ => "motion",
    }
}

pub fn build_zone_discovery(
    cfg: &Config,
    zone: &Zone,
    kind: &str,
    device: &DeviceInfo,
) -> BinarySensorDiscovery {
    let root = &cfg.topic_root;
    let panel_id = &cfg.panel_unique_id;
    let uid = &zone.unique_id;
    BinarySensorDiscovery {
        name: format!("{} {kind}", zone.name),
        unique_id: format!("{uid}_{kind}"),
        state_topic: topics::zone_state_topic(root, panel_id, uid, kind),
        availability_topic: topics::availability_topic(root, panel_id),
        device_class: device_class_for_kind(kind),
        payload_on: "ON",
        payload_off: "OFF",
        device: device.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::partition::Partition;
    use crate::panel::zone::Zone;

    fn cfg() -> Config {
        Config {
            serial: "/dev/ttyUSB0".into(),
            baud: 38_400,
            mqtt_host: "localhost".into(),
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_password: None,
            qos: 1,
            topic_root: "homeassistant".into(),
            panel_unique_id: "caddx_panel".into(),
            panel_name: "Caddx Alarm Panel".into(),
            max_zones: 8,
            ignored_zones: vec![],
            code: Some("1234".into()),
            user: None,
            log_level: "INFO".into(),
            log_file: None,
            zone_discovery_spacing_ms: 1000,
        }
    }

    #[test]
    fn partition_discovery_carries_required_fields() {
        let cfg = cfg();
        let device = DeviceInfo::new(&cfg.panel_unique_id, &cfg.panel_name);
        let partition = Partition::new(&cfg.panel_unique_id, 1);
        let disc = build_partition_discovery(&cfg, &partition, &device);
        assert_eq!(disc.unique_id, "caddx_panel_partition_1");
        assert!(disc.command_topic.ends_with("/set"));
        assert!(!disc.code_disarm_required);
    }

    #[test]
    fn zone_discovery_device_class_varies_by_kind() {
        let cfg = cfg();
        let device = DeviceInfo::new(&cfg.panel_unique_id, &cfg.panel_name);
        let zone = Zone::new(&cfg.panel_unique_id, 1, "Front Door".into());
        assert_eq!(build_zone_discovery(&cfg, &zone, "trouble", &device).device_class, "tamper");
        assert_eq!(build_zone_discovery(&cfg, &zone, "bypassed", &device).device_class, "safety");
        assert_eq!(build_zone_discovery(&cfg, &zone, "faulted", &device).device_class, "motion");
    }
}
