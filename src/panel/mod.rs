//! # Panel model
//!
//! Partition and zone entities, their condition/type flag decoding, and the
//! registries that own them. Entities are created only during startup
//! synchronization (see the controller's `sync` module) and never after.

pub mod partition;
pub mod registry;
pub mod zone;

pub use partition::{Partition, PartitionConditionFlags, PartitionState, PartitionTrouble};
pub use registry::PanelModel;
pub use zone::{Zone, ZoneConditionFlags, ZoneTypeFlags};
