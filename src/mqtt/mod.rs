//! # MQTT bridge
//!
//! Home Assistant MQTT Discovery publication, state publication, command
//! intake, and availability/LWT handling (spec.md §4.5).

pub mod bridge;
pub mod discovery;
pub mod topics;

pub use bridge::{run_event_loop, MqttBridge, MqttError, PublishSink};
