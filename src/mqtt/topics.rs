//! Topic construction and identifier sanitization (spec.md §4.5).

/// Reduce `input` to `[A-Za-z0-9_-]`, replacing every other character with
/// `_`. Idempotent: `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// The three binary_sensor discovery/state kinds published per zone.
pub const ZONE_KINDS: [&str; 3] = ["faulted", "bypassed", "trouble"];

pub fn availability_topic(root: &str, panel_id: &str) -> String {
    format!("{root}/alarm_control_panel/{panel_id}/availability")
}

pub fn ha_status_topic(root: &str) -> String {
    format!("{root}/status")
}

pub fn partition_config_topic(root: &str, panel_id: &str, partition_uid: &str) -> String {
    format!("{root}/alarm_control_panel/{panel_id}/{partition_uid}/config")
}

pub fn partition_state_topic(root: &str, panel_id: &str, partition_uid: &str) -> String {
    format!("{root}/alarm_control_panel/{panel_id}/{partition_uid}/state")
}

pub fn partition_command_topic(root: &str, panel_id: &str, partition_uid: &str) -> String {
    format!("{root}/alarm_control_panel/{panel_id}/{partition_uid}/set")
}

pub fn zone_config_topic(root: &str, panel_id: &str, zone_uid: &str, kind: &str) -> String {
    format!("{root}/binary_sensor/{panel_id}/{zone_uid}_{kind}/config")
}

pub fn zone_state_topic(root: &str, panel_id: &str, zone_uid: &str, kind: &str) -> String {
    format!("{root}/binary_sensor/{panel_id}/{zone_uid}_{kind}/state")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize("Caddx Panel #1"), "Caddx_Panel__1");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let s = "Caddx Panel #1";
        assert_eq!(sanitize(&sanitize(s)), sanitize(s));
    }

    #[test]
    fn sanitize_output_matches_allowed_charset() {
        let out = sanitize("weird!!chars??here");
        assert!(out.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn partition_topics_have_expected_shape() {
        assert_eq!(
            partition_state_topic("homeassistant", "caddx_panel", "caddx_panel_partition_1"),
            "homeassistant/alarm_control_panel/caddx_panel/caddx_panel_partition_1/state"
        );
        assert_eq!(
            partition_command_topic("homeassistant", "caddx_panel", "caddx_panel_partition_1"),
            "homeassistant/alarm_control_panel/caddx_panel/caddx_panel_partition_1/set"
        );
    }

    #[test]
    fn zone_topics_carry_the_kind_suffix() {
        assert_eq!(
            zone_state_topic("homeassistant", "caddx_panel", "caddx_panel_zone_1", "faulted"),
            "homeassistant/binary_sensor/caddx_panel/caddx_panel_zone_1_faulted/state"
        );
    }
}
