//! Bridge daemon library: NX-584 frame codec, message catalog, panel model,
//! controller, and MQTT bridge. `main.rs` wires these into the running
//! daemon; everything here is free of process-level concerns (signal
//! handling, CLI parsing) so it can be exercised directly in tests.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod frame;
pub mod mqtt;
pub mod panel;
pub mod serial;
