//! # Message catalog
//!
//! Static per-message-type metadata: whether a frame of this type expects an
//! ACK from the panel, its valid body length, and which handler it binds to.
//! Keyed by the 6-bit message code (the low 6 bits of `msg_type`).

/// Which controller routine a catalog entry is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerId {
    InterfaceConfigResponse,
    ZoneNameResponse,
    ZoneStatusResponse,
    ZoneSnapshotResponse,
    PartitionStatusResponse,
    SystemStatusResponse,
    LogEventResponse,
    Ack,
    Nack,
    /// Catalog entry exists (to avoid `UnknownType`) but there is nothing to do.
    Ignore,
}

/// Static metadata for one NX-584 message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSpec {
    pub code: u8,
    pub name: &'static str,
    /// `true` if the panel is expected to ACK this message when we send it.
    pub expects_ack_from_panel: bool,
    /// Exact valid body length in bytes, or `None` if the catalog does not
    /// pin a fixed length (variable-length or not yet decoded in v1).
    pub valid_body_length: Option<u8>,
    pub handler: HandlerId,
}

macro_rules! spec {
    ($code:expr, $name:expr, $ack:expr, $len:expr, $handler:expr) => {
        MessageSpec {
            code: $code,
            name: $name,
            expects_ack_from_panel: $ack,
            valid_body_length: $len,
            handler: $handler,
        }
    };
}

pub const INTERFACE_CONFIGURATION_RESPONSE: u8 = 0x01;
pub const ZONE_NAME_RESPONSE: u8 = 0x03;
pub const ZONE_STATUS_RESPONSE: u8 = 0x04;
pub const ZONE_SNAPSHOT_RESPONSE: u8 = 0x05;
pub const PARTITION_STATUS_RESPONSE: u8 = 0x06;
pub const LOG_EVENT_RESPONSE: u8 = 0x02;
pub const SYSTEM_STATUS_RESPONSE: u8 = 0x08;
pub const ZONE_NAME_REQUEST: u8 = 0x23;
pub const ZONE_STATUS_REQUEST: u8 = 0x24;
pub const PARTITION_STATUS_REQUEST: u8 = 0x26;
pub const SYSTEM_STATUS_REQUEST: u8 = 0x28;
pub const LOG_EVENT_REQUEST: u8 = 0x22;
pub const INTERFACE_CONFIGURATION_REQUEST: u8 = 0x21;
pub const PRIMARY_KEYPAD_PIN: u8 = 0x3C;
pub const PRIMARY_KEYPAD_USER: u8 = 0x3D;
pub const ACK: u8 = 0x1D;
pub const NACK: u8 = 0x1E;

/// The full static catalog, indexed by scanning (small and fixed: a lookup
/// table keyed by 64 possible 6-bit codes would cost more than it saves).
pub const CATALOG: &[MessageSpec] = &[
    spec!(
        INTERFACE_CONFIGURATION_RESPONSE,
        "Interface Configuration Response",
        false,
        None,
        HandlerId::InterfaceConfigResponse
    ),
    spec!(
        INTERFACE_CONFIGURATION_REQUEST,
        "Interface Configuration Request",
        true,
        Some(0),
        HandlerId::Ignore
    ),
    spec!(
        LOG_EVENT_RESPONSE,
        "Log Event Response",
        false,
        None,
        HandlerId::LogEventResponse
    ),
    spec!(
        LOG_EVENT_REQUEST,
        "Log Event Request",
        true,
        Some(0),
        HandlerId::Ignore
    ),
    spec!(
        ZONE_NAME_RESPONSE,
        "Zone Name Response",
        false,
        Some(17),
        HandlerId::ZoneNameResponse
    ),
    spec!(
        ZONE_NAME_REQUEST,
        "Zone Name Request",
        true,
        Some(1),
        HandlerId::Ignore
    ),
    spec!(
        ZONE_STATUS_RESPONSE,
        "Zone Status Response",
        false,
        Some(6),
        HandlerId::ZoneStatusResponse
    ),
    spec!(
        ZONE_STATUS_REQUEST,
        "Zone Status Request",
        true,
        Some(1),
        HandlerId::Ignore
    ),
    spec!(
        ZONE_SNAPSHOT_RESPONSE,
        "Zone Snapshot Response",
        false,
        None,
        HandlerId::ZoneSnapshotResponse
    ),
    spec!(
        PARTITION_STATUS_RESPONSE,
        "Partition Status Response",
        false,
        Some(7),
        HandlerId::PartitionStatusResponse
    ),
    spec!(
        PARTITION_STATUS_REQUEST,
        "Partition Status Request",
        true,
        Some(1),
        HandlerId::Ignore
    ),
    spec!(
        SYSTEM_STATUS_RESPONSE,
        "System Status Response",
        false,
        None,
        HandlerId::SystemStatusResponse
    ),
    spec!(
        SYSTEM_STATUS_REQUEST,
        "System Status Request",
        true,
        Some(0),
        HandlerId::Ignore
    ),
    // Keypad commands never set the ACK-request bit and never wait on an ACK
    // (spec.md §8 scenario 3 pins the exact transmitted bytes with bit 7
    // clear) — every other outbound request in this catalog does both.
    spec!(
        PRIMARY_KEYPAD_PIN,
        "Primary Keypad Function (PIN)",
        false,
        Some(5),
        HandlerId::Ignore
    ),
    spec!(
        PRIMARY_KEYPAD_USER,
        "Primary Keypad Function (User#)",
        false,
        Some(3),
        HandlerId::Ignore
    ),
    spec!(ACK, "ACK", false, Some(0), HandlerId::Ack),
    spec!(NACK, "NACK", false, Some(0), HandlerId::Nack),
];

/// Look up a message's catalog entry by its 6-bit code.
pub fn lookup(code: u8) -> Option<&'static MessageSpec> {
    CATALOG.iter().find(|m| m.code == code)
}

/// Message types the panel must declare it will broadcast for the bridge to
/// work at all: the response types for Zone Status, Zone Name, Partition
/// Status, System Status, plus unsolicited transition broadcasts for
/// partition and zone status/snapshot.
pub const REQUIRED_BROADCAST_CODES: &[u8] = &[
    ZONE_NAME_RESPONSE,
    ZONE_STATUS_RESPONSE,
    PARTITION_STATUS_RESPONSE,
    SYSTEM_STATUS_RESPONSE,
    ZONE_SNAPSHOT_RESPONSE,
];

/// Transition broadcasts: unsolicited messages dispatched regardless of
/// whether a command is currently awaiting a response.
pub fn is_transition_broadcast(code: u8) -> bool {
    matches!(
        code,
        PARTITION_STATUS_RESPONSE
            | ZONE_STATUS_RESPONSE
            | ZONE_SNAPSHOT_RESPONSE
            | SYSTEM_STATUS_RESPONSE
    )
}

/// Keypad function codes used in Primary Keypad Function messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypadFunction {
    Disarm = 0x00,
    ArmAway = 0x02,
    ArmHome = 0x03,
}

impl KeypadFunction {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Bitmask selecting which partitions a keypad function targets
/// (bit 0 = partition 1).
pub fn partition_mask(partition: u8) -> u8 {
    1u8 << (partition - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_codes() {
        assert_eq!(lookup(ZONE_STATUS_RESPONSE).unwrap().code, ZONE_STATUS_RESPONSE);
        assert_eq!(lookup(ACK).unwrap().handler, HandlerId::Ack);
    }

    #[test]
    fn lookup_rejects_unknown_code() {
        assert!(lookup(0x3F).is_none());
    }

    #[test]
    fn partition_mask_bit_zero_is_partition_one() {
        assert_eq!(partition_mask(1), 0b0000_0001);
        assert_eq!(partition_mask(3), 0b0000_0100);
    }

    #[test]
    fn transition_broadcasts_are_recognized() {
        assert!(is_transition_broadcast(PARTITION_STATUS_RESPONSE));
        assert!(is_transition_broadcast(ZONE_STATUS_RESPONSE));
        assert!(!is_transition_broadcast(ZONE_NAME_RESPONSE));
        assert!(!is_transition_broadcast(ACK));
    }
}
