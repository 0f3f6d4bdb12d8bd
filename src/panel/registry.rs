//! Process-wide partition/zone registries.
//!
//! Entities self-register through [`PanelModel::register_partition`] and
//! [`PanelModel::register_zone`]; both are only ever called from the
//! startup synchronization sequence. Once [`PanelModel::mark_synced`] has
//! been called, any attempt to register a new entity is rejected and the
//! caller must log-and-drop instead (see the controller's dispatch code).

use std::collections::HashMap;

use super::partition::Partition;
use super::zone::Zone;

/// Owns every known [`Partition`] and [`Zone`], indexed both by panel index
/// and by unique id. A single instance lives inside the Controller rather
/// than behind module-level statics, so tests can run multiple independent
/// panels in one process.
#[derive(Debug, Default)]
pub struct PanelModel {
    partition_by_index: HashMap<u8, Partition>,
    zone_by_index: HashMap<u8, Zone>,
    synced: bool,
}

/// Returned when an entity would be created after sync has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadySynced;

impl PanelModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Declare synchronization complete. Irreversible for the life of the process.
    pub fn mark_synced(&mut self) {
        self.synced = true;
    }

    /// Register a new partition. Fails if sync has already completed.
    pub fn register_partition(&mut self, partition: Partition) -> Result<(), AlreadySynced> {
        if self.synced {
            return Err(AlreadySynced);
        }
        self.partition_by_index.insert(partition.index, partition);
        Ok(())
    }

    /// Register a new zone. Fails if sync has already completed.
    pub fn register_zone(&mut self, zone: Zone) -> Result<(), AlreadySynced> {
        if self.synced {
            return Err(AlreadySynced);
        }
        self.zone_by_index.insert(zone.index, zone);
        Ok(())
    }

    pub fn partition(&self, index: u8) -> Option<&Partition> {
        self.partition_by_index.get(&index)
    }

    pub fn partition_mut(&mut self, index: u8) -> Option<&mut Partition> {
        self.partition_by_index.get_mut(&index)
    }

    pub fn zone(&self, index: u8) -> Option<&Zone> {
        self.zone_by_index.get(&index)
    }

    pub fn zone_mut(&mut self, index: u8) -> Option<&mut Zone> {
        self.zone_by_index.get_mut(&index)
    }

    pub fn partition_by_unique_id(&self, unique_id: &str) -> Option<&Partition> {
        self.partition_by_index
            .values()
            .find(|p| p.unique_id == unique_id)
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partition_by_index.values()
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zone_by_index.values()
    }

    pub fn partition_count(&self) -> usize {
        self.partition_by_index.len()
    }

    pub fn zone_count(&self) -> usize {
        self.zone_by_index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_by_index_and_unique_id() {
        let mut model = PanelModel::new();
        model
            .register_partition(Partition::new("caddx", 1))
            .unwrap();
        assert!(model.partition(1).is_some());
        assert!(model
            .partition_by_unique_id("caddx_partition_1")
            .is_some());
        assert_eq!(model.partition_count(), 1);
    }

    #[test]
    fn registration_rejected_after_sync() {
        let mut model = PanelModel::new();
        model.mark_synced();
        let err = model.register_partition(Partition::new("caddx", 1));
        assert_eq!(err, Err(AlreadySynced));
        assert_eq!(model.partition_count(), 0);

        let err = model.register_zone(Zone::new("caddx", 1, "Front Door".into()));
        assert_eq!(err, Err(AlreadySynced));
        assert_eq!(model.zone_count(), 0);
    }

    #[test]
    fn exactly_one_partition_per_index() {
        let mut model = PanelModel::new();
        model
            .register_partition(Partition::new("caddx", 1))
            .unwrap();
        model
            .register_partition(Partition::new("caddx", 1))
            .unwrap();
        assert_eq!(model.partition_count(), 1);
    }
}
