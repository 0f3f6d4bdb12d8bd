//! MQTT client wrapper: discovery/state publication, command intake,
//! availability, and Home Assistant restart handling (spec.md §4.5).
//!
//! The background network I/O lives entirely inside `rumqttc`'s
//! [`Connection`]; [`spawn_event_loop`] just drains its notifications on a
//! dedicated thread and turns inbound publishes into either a command
//! pushed onto the controller's inbox or a restart signal — it never
//! touches panel state directly (SPEC_FULL.md §5).

use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use rumqttc::{Client, Connection, Event, Incoming, LastWill, MqttOptions, QoS};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::KeypadFunction;
use crate::config::Config;
use crate::controller::{ArmDisarmRequest, PanelEvent};
use crate::panel::partition::Partition;
use crate::panel::registry::PanelModel;
use crate::panel::zone::Zone;

use super::discovery::{self, DeviceInfo};
use super::topics;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to encode discovery payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The publish/subscribe surface [`MqttBridge`] needs from an MQTT client,
/// factored out so the discovery/state/republish logic can be driven in
/// tests by a recording double instead of a real broker connection.
pub trait PublishSink {
    fn publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), MqttError>;
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError>;
}

impl PublishSink for Client {
    fn publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), MqttError> {
        Client::publish(self, topic, qos, retain, payload)?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        Client::subscribe(self, topic, qos)?;
        Ok(())
    }
}

/// Owns the publish/subscribe handle and the fixed bits of topic state
/// (topic root, panel id, device card). The matching [`Connection`] is
/// handed to [`run_event_loop`] separately, mirroring how `rumqttc` splits a
/// client in two. Generic over the publish sink so tests can drive the same
/// discovery/state/republish logic over a recording double.
pub struct MqttBridge<S: PublishSink = Client> {
    client: S,
    topic_root: String,
    panel_id: String,
    qos: QoS,
    device: DeviceInfo,
}

impl MqttBridge<Client> {
    /// Connect to the broker configured in `cfg`. Does not block waiting for
    /// the connection to establish — `rumqttc` connects lazily on first use.
    pub fn connect(cfg: &Config) -> (Self, Connection) {
        let client_id = format!("{}-bridge", cfg.panel_unique_id);
        let mut opts = MqttOptions::new(client_id, cfg.mqtt_host.clone(), cfg.mqtt_port);
        opts.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&cfg.mqtt_user, &cfg.mqtt_password) {
            opts.set_credentials(user.clone(), pass.clone());
        }
        let availability = topics::availability_topic(&cfg.topic_root, &cfg.panel_unique_id);
        opts.set_last_will(LastWill::new(availability, "offline", QoS::AtLeastOnce, true));

        let (client, connection) = Client::new(opts, 256);
        let bridge = Self::new(client, cfg);
        (bridge, connection)
    }
}

impl<S: PublishSink> MqttBridge<S> {
    /// Build a bridge directly over an already-constructed sink. Production
    /// code reaches this via [`MqttBridge::connect`]; tests construct a
    /// recording sink and call this directly, bypassing the network entirely.
    pub fn new(client: S, cfg: &Config) -> Self {
        Self {
            client,
            topic_root: cfg.topic_root.clone(),
            panel_id: cfg.panel_unique_id.clone(),
            qos: cfg.qos(),
            device: DeviceInfo::new(&cfg.panel_unique_id, &cfg.panel_name),
        }
    }

    pub fn ha_status_topic(&self) -> String {
        topics::ha_status_topic(&self.topic_root)
    }

    pub fn subscribe_ha_status(&mut self) -> Result<(), MqttError> {
        let topic = self.ha_status_topic();
        self.client.subscribe(&topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    pub fn publish_online(&mut self) -> Result<(), MqttError> {
        let topic = topics::availability_topic(&self.topic_root, &self.panel_id);
        self.client.publish(&topic, self.qos, true, b"online")?;
        Ok(())
    }

    pub fn publish_offline(&mut self) -> Result<(), MqttError> {
        let topic = topics::availability_topic(&self.topic_root, &self.panel_id);
        self.client.publish(&topic, self.qos, true, b"offline")?;
        Ok(())
    }

    /// Publish discovery configs and an initial state for every known
    /// partition and zone, subscribing to each partition's command topic.
    /// Also invoked, unchanged, on Home Assistant restart (spec.md §4.5) —
    /// it never re-syncs the panel, only republishes.
    pub fn publish_full_discovery(&mut self, cfg: &Config, model: &PanelModel) -> Result<(), MqttError> {
        for partition in model.partitions() {
            self.publish_partition_discovery(cfg, partition)?;
            self.publish_partition_state(partition)?;
        }
        for zone in model.zones() {
            self.publish_zone_discovery(cfg, zone)?;
            self.publish_zone_state(zone)?;
            // Spacing between zones only — discovery + its own state publish
            // goes out back-to-back, matching spec.md §8 scenario 1's count.
            thread::sleep(cfg.zone_discovery_spacing());
        }
        Ok(())
    }

    fn publish_partition_discovery(&mut self, cfg: &Config, partition: &Partition) -> Result<(), MqttError> {
        let disc = discovery::build_partition_discovery(cfg, partition, &self.device);
        let topic = topics::partition_config_topic(&self.topic_root, &self.panel_id, &partition.unique_id);
        let payload = serde_json::to_vec(&disc)?;
        self.client.publish(&topic, self.qos, true, &payload)?;
        self.client.subscribe(&disc.command_topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn publish_partition_state(&mut self, partition: &Partition) -> Result<(), MqttError> {
        let topic = topics::partition_state_topic(&self.topic_root, &self.panel_id, &partition.unique_id);
        let payload = partition.state().as_str();
        self.client.publish(&topic, self.qos, true, payload.as_bytes())?;
        Ok(())
    }

    fn publish_zone_discovery(&mut self, cfg: &Config, zone: &Zone) -> Result<(), MqttError> {
        for kind in topics::ZONE_KINDS {
            let disc = discovery::build_zone_discovery(cfg, zone, kind, &self.device);
            let topic = topics::zone_config_topic(&self.topic_root, &self.panel_id, &zone.unique_id, kind);
            let payload = serde_json::to_vec(&disc)?;
            self.client.publish(&topic, self.qos, true, &payload)?;
        }
        Ok(())
    }

    fn publish_zone_state(&mut self, zone: &Zone) -> Result<(), MqttError> {
        for (kind, on) in [
            ("faulted", zone.faulted()),
            ("bypassed", zone.bypassed()),
            ("trouble", zone.trouble()),
        ] {
            let topic = topics::zone_state_topic(&self.topic_root, &self.panel_id, &zone.unique_id, kind);
            let payload = if on { "ON" } else { "OFF" };
            self.client.publish(&topic, self.qos, true, payload.as_bytes())?;
        }
        Ok(())
    }

    /// Publish whatever state a [`PanelEvent`] implies. `ZoneRecentlyUpdated`
    /// is advisory-only (spec.md §9 Open Question) and never published.
    pub fn handle_event(
        &mut self,
        event: &PanelEvent,
        cfg: &Config,
        model: &PanelModel,
    ) -> Result<(), MqttError> {
        match event {
            PanelEvent::SyncComplete => self.publish_full_discovery(cfg, model),
            PanelEvent::PartitionChanged(index) => match model.partition(*index) {
                Some(p) => self.publish_partition_state(p),
                None => Ok(()),
            },
            PanelEvent::ZoneChanged(index) => match model.zone(*index) {
                Some(z) => self.publish_zone_state(z),
                None => Ok(()),
            },
            PanelEvent::ZoneRecentlyUpdated(_) => Ok(()),
        }
    }
}

/// Extract a partition index from a partition command topic by parsing the
/// `..._partition_<n>` unique-id segment, rather than keeping a separate
/// topic→index table in sync with discovery publication.
fn parse_partition_index_from_topic(topic: &str) -> Option<u8> {
    if !topic.contains("/alarm_control_panel/") {
        return None;
    }
    let marker = "_partition_";
    let start = topic.find(marker)? + marker.len();
    let rest = &topic[start..];
    let end = rest.find('/').unwrap_or(rest.len());
    rest[..end].parse().ok()
}

fn parse_keypad_function(payload: &[u8]) -> Option<KeypadFunction> {
    match std::str::from_utf8(payload).ok()?.trim() {
        "DISARM" => Some(KeypadFunction::Disarm),
        "ARM_HOME" => Some(KeypadFunction::ArmHome),
        "ARM_AWAY" => Some(KeypadFunction::ArmAway),
        _ => None,
    }
}

/// Drain `connection`'s notifications on the calling thread until the
/// connection is closed for good. Routes arm/disarm command-topic publishes
/// into `inbox` and Home Assistant `<topic_root>/status` = `"online"`
/// messages into `restart`. Never touches panel state directly.
pub fn run_event_loop(
    mut connection: Connection,
    ha_status_topic: String,
    inbox: Sender<ArmDisarmRequest>,
    restart: Sender<()>,
) {
    // rumqttc's blocking `Connection` iterator reconnects with its own
    // internal backoff on disconnect and keeps yielding events indefinitely
    // (spec.md §7 BrokerDisconnected) — we only need to keep iterating.
    for notification in connection.iter() {
        let event = match notification {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "mqtt connection error, rumqttc will retry");
                continue;
            }
        };
        let Event::Incoming(Incoming::Publish(publish)) = event else {
            continue;
        };
        if publish.topic == ha_status_topic {
            if publish.payload.as_ref() == b"online" {
                info!("home assistant restart detected, scheduling republish");
                let _ = restart.send(());
            }
            continue;
        }
        let Some(partition) = parse_partition_index_from_topic(&publish.topic) else {
            debug!(topic = %publish.topic, "ignoring publish on unrecognized topic");
            continue;
        };
        let Some(action) = parse_keypad_function(&publish.payload) else {
            warn!(topic = %publish.topic, "ignoring command with unrecognized payload");
            continue;
        };
        let _ = inbox.send(ArmDisarmRequest { partition, action });
    }
    info!("mqtt event loop thread exiting");
}

/// Records every publish/subscribe call instead of sending anything over the
/// network, so discovery/state/republish behavior can be asserted directly.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub published: Vec<(String, Vec<u8>, bool)>,
    pub subscribed: Vec<String>,
}

#[cfg(test)]
impl PublishSink for RecordingSink {
    fn publish(&mut self, topic: &str, _qos: QoS, retain: bool, payload: &[u8]) -> Result<(), MqttError> {
        self.published.push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), MqttError> {
        self.subscribed.push(topic.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::partition::Partition;
    use crate::panel::registry::PanelModel;
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
            zone_discovery_spacing_ms: 0,
        }
    }

    fn one_partition_one_zone_model() -> PanelModel {
        let mut model = PanelModel::new();
        model.register_partition(Partition::new("caddx_panel", 1)).unwrap();
        model
            .register_zone(Zone::new("caddx_panel", 1, "Front Door".into()))
            .unwrap();
        model
    }

    /// spec.md §8 scenario 1: a single-partition, single-zone sync publishes
    /// exactly 1 + 3 discovery messages (one alarm_control_panel config, three
    /// binary_sensor configs — faulted/bypassed/trouble).
    #[test]
    fn full_discovery_publishes_one_plus_three_config_topics() {
        let cfg = cfg();
        let model = one_partition_one_zone_model();
        let mut bridge = MqttBridge::new(RecordingSink::default(), &cfg);
        bridge.publish_full_discovery(&cfg, &model).unwrap();

        let config_topics: Vec<_> = bridge
            .client
            .published
            .iter()
            .filter(|(topic, _, _)| topic.ends_with("/config"))
            .collect();
        assert_eq!(config_topics.len(), 4);
        assert!(config_topics
            .iter()
            .any(|(t, _, _)| t.contains("/alarm_control_panel/")));
        assert_eq!(
            config_topics
                .iter()
                .filter(|(t, _, _)| t.contains("/binary_sensor/"))
                .count(),
            3
        );
        // Every publish in the discovery flush is retained, per spec.md §4.5.
        assert!(bridge.client.published.iter().all(|(_, _, retain)| *retain));
        assert_eq!(
            bridge.client.subscribed,
            vec!["homeassistant/alarm_control_panel/caddx_panel/caddx_panel_partition_1/set".to_string()]
        );
    }

    /// spec.md §8 scenario 5: on a Home Assistant restart, every discovery
    /// topic and every state topic is republished, with no new panel
    /// commands issued — `publish_full_discovery` only touches the sink, so
    /// calling it twice (sync, then "online") is idempotent in shape.
    #[test]
    fn ha_restart_republishes_every_discovery_and_state_topic() {
        let cfg = cfg();
        let model = one_partition_one_zone_model();
        let mut bridge = MqttBridge::new(RecordingSink::default(), &cfg);

        bridge.publish_full_discovery(&cfg, &model).unwrap();
        let first_pass = bridge.client.published.len();
        assert!(first_pass > 0);

        bridge.publish_full_discovery(&cfg, &model).unwrap();
        let second_pass = bridge.client.published.len() - first_pass;

        assert_eq!(
            first_pass, second_pass,
            "the restart republish must emit the same set of topics as the initial flush"
        );
        let first_topics: std::collections::HashSet<_> =
            bridge.client.published[..first_pass].iter().map(|(t, _, _)| t.clone()).collect();
        let second_topics: std::collections::HashSet<_> =
            bridge.client.published[first_pass..].iter().map(|(t, _, _)| t.clone()).collect();
        assert_eq!(first_topics, second_topics);
    }

    #[test]
    fn handle_event_publishes_single_partition_state_on_change() {
        let cfg = cfg();
        let model = one_partition_one_zone_model();
        let mut bridge = MqttBridge::new(RecordingSink::default(), &cfg);

        bridge
            .handle_event(&PanelEvent::PartitionChanged(1), &cfg, &model)
            .unwrap();

        assert_eq!(bridge.client.published.len(), 1);
        let (topic, payload, retain) = &bridge.client.published[0];
        assert!(topic.ends_with("/caddx_panel_partition_1/state"));
        assert_eq!(payload, b"disarmed");
        assert!(retain);
    }

    #[test]
    fn handle_event_zone_recently_updated_publishes_nothing() {
        let cfg = cfg();
        let model = one_partition_one_zone_model();
        let mut bridge = MqttBridge::new(RecordingSink::default(), &cfg);

        bridge
            .handle_event(&PanelEvent::ZoneRecentlyUpdated(1), &cfg, &model)
            .unwrap();

        assert!(bridge.client.published.is_empty());
    }

    #[test]
    fn parses_partition_index_from_command_topic() {
        let topic = "homeassistant/alarm_control_panel/caddx_panel/caddx_panel_partition_2/set";
        assert_eq!(parse_partition_index_from_topic(topic), Some(2));
    }

    #[test]
    fn rejects_topic_without_partition_segment() {
        let topic = "homeassistant/binary_sensor/caddx_panel/caddx_panel_zone_1_faulted/state";
        assert_eq!(parse_partition_index_from_topic(topic), None);
    }

    #[test]
    fn parses_known_keypad_payloads() {
        assert_eq!(parse_keypad_function(b"ARM_AWAY"), Some(KeypadFunction::ArmAway));
        assert_eq!(parse_keypad_function(b"ARM_HOME"), Some(KeypadFunction::ArmHome));
        assert_eq!(parse_keypad_function(b"DISARM"), Some(KeypadFunction::Disarm));
        assert_eq!(parse_keypad_function(b"NONSENSE"), None);
    }
}
