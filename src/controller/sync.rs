//! Startup synchronization sequence (spec.md §4.3).
//!
//! Runs once, before the main loop starts and before any MQTT discovery is
//! published: interface config check → system status → per-partition
//! status → per-zone name + status. Registry growth is only ever possible
//! while this sequence runs (spec.md §3).

use std::io::Write;

use tracing::info_span;

use crate::catalog;
use crate::frame::ByteSource;
use crate::panel::partition::Partition;
use crate::panel::zone::{decode_zone_name, Zone};

use super::{Controller, ControllerError, PanelEvent};

impl<T> Controller<T>
where
    T: ByteSource + Write,
{
    /// Run the full startup synchronization sequence. Returns
    /// [`ControllerError::PanelMisconfigured`] if the panel's Interface
    /// Configuration Response does not declare the broadcasts the bridge
    /// depends on.
    pub fn run_sync(&mut self) -> Result<(), ControllerError> {
        let _span = info_span!("sync").entered();
        self.check_interface_config()?;
        let partition_indices = self.sync_system_status()?;
        for index in partition_indices {
            self.sync_partition_status(index)?;
        }
        self.sync_zones()?;
        self.model.mark_synced();
        let _ = self.events.send(PanelEvent::SyncComplete);
        Ok(())
    }

    fn check_interface_config(&mut self) -> Result<(), ControllerError> {
        let body = self.request(
            catalog::INTERFACE_CONFIGURATION_REQUEST,
            &[],
            catalog::INTERFACE_CONFIGURATION_RESPONSE,
        )?;
        let enabled_mask = decode_enabled_mask(&body);
        for &code in catalog::REQUIRED_BROADCAST_CODES {
            if enabled_mask & (1u64 << code) == 0 {
                return Err(ControllerError::PanelMisconfigured(code));
            }
        }
        Ok(())
    }

    fn sync_system_status(&mut self) -> Result<Vec<u8>, ControllerError> {
        let body = self.request(
            catalog::SYSTEM_STATUS_REQUEST,
            &[],
            catalog::SYSTEM_STATUS_RESPONSE,
        )?;
        let active_mask = body.first().copied().unwrap_or(0);
        let mut created = Vec::new();
        for bit in 0..8u8 {
            if active_mask & (1 << bit) != 0 {
                let index = bit + 1;
                let _ = self.model.register_partition(Partition::new(&self.panel_id, index));
                created.push(index);
            }
        }
        Ok(created)
    }

    fn sync_partition_status(&mut self, index: u8) -> Result<(), ControllerError> {
        // `request` already dispatches the matching response internally
        // (`Controller::await_response`), which populates the condition
        // flags for the partition registered in `sync_system_status`.
        self.request(
            catalog::PARTITION_STATUS_REQUEST,
            &[index],
            catalog::PARTITION_STATUS_RESPONSE,
        )?;
        Ok(())
    }

    fn sync_zones(&mut self) -> Result<(), ControllerError> {
        for index in 1..=self.max_zones {
            if self.ignored_zones.contains(&index) {
                continue;
            }
            let name_body = self.request(
                catalog::ZONE_NAME_REQUEST,
                &[index],
                catalog::ZONE_NAME_RESPONSE,
            )?;
            // Body is `[zone_index, name[16]]`; an all-zero/blank name
            // means the zone is inactive and must not be registered.
            let name = name_body.get(1..).and_then(decode_zone_name);
            let Some(name) = name else {
                continue;
            };
            let _ = self.model.register_zone(Zone::new(&self.panel_id, index, name));

            // `request` dispatches the matching response internally, which
            // populates the type/condition flags for the zone just registered.
            self.request(
                catalog::ZONE_STATUS_REQUEST,
                &[index],
                catalog::ZONE_STATUS_RESPONSE,
            )?;
        }
        Ok(())
    }
}

/// Decode an Interface Configuration Response body into a bitmask keyed by
/// message code: bit `n` set means the panel will broadcast message `n`.
/// The response carries this as consecutive little-endian bytes.
fn decode_enabled_mask(body: &[u8]) -> u64 {
    let mut mask: u64 = 0;
    for (i, &b) in body.iter().take(8).enumerate() {
        mask |= (b as u64) << (8 * i);
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_enabled_mask_reads_little_endian_bytes() {
        let body = [0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mask = decode_enabled_mask(&body);
        assert_eq!(mask & 0xFF, 0xFF);
    }
}
