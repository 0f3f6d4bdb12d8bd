//! Partition entity and condition-flag decoding.
//!
//! The 48-bit partition condition field arrives MSB-first as six bytes in a
//! Partition Status Response. Bit numbering below is the bridge's own
//! canonical numbering (bit 0 = least significant bit of the last byte);
//! [`PartitionConditionFlags::from_bytes`] is the single place that maps
//! wire bytes onto it.

/// Partition is ready to arm.
pub const COND_READY_TO_ARM: u64 = 1 << 0;
/// Partition is armed (home or away — see [`PartitionConditionFlags::stay_mode`]).
pub const COND_ARMED: u64 = 1 << 1;
/// Armed in stay (home) mode rather than away mode.
pub const COND_STAY_MODE: u64 = 1 << 2;
/// Chime mode enabled.
pub const COND_CHIME_MODE: u64 = 1 << 3;
/// Entry delay in progress.
pub const COND_ENTRY_DELAY: u64 = 1 << 4;
/// Exit delay 1 in progress.
pub const COND_EXIT_DELAY_1: u64 = 1 << 5;
/// Exit delay 2 in progress.
pub const COND_EXIT_DELAY_2: u64 = 1 << 6;
/// A previous alarm condition is latched.
pub const COND_PREVIOUS_ALARM: u64 = 1 << 7;
/// Siren is currently sounding.
pub const COND_SIREN_ON: u64 = 1 << 8;
/// Instant arming mode (no entry delay).
pub const COND_INSTANT_MODE: u64 = 1 << 9;

/// AC power failure.
pub const COND_AC_FAIL: u64 = 1 << 16;
/// Low battery.
pub const COND_LOW_BATTERY: u64 = 1 << 17;
/// System tamper.
pub const COND_SYSTEM_TAMPER: u64 = 1 << 18;
/// Telephone line fault.
pub const COND_TELCO_FAULT: u64 = 1 << 19;
/// Communication failure with the central station.
pub const COND_COMM_FAILURE: u64 = 1 << 20;
/// Buzzer is currently sounding.
pub const COND_BUZZER_ON: u64 = 1 << 21;

/// Derived alarm state for a partition, computed from its condition flags by
/// the priority cascade documented on [`derive_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Disarmed,
    ArmedHome,
    ArmedAway,
    Pending,
    Triggered,
    Arming,
    Disarming,
    Unknown,
}

impl PartitionState {
    /// The MQTT state-topic payload string for this state (matches Home
    /// Assistant's `alarm_control_panel` state vocabulary where applicable).
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionState::Disarmed => "disarmed",
            PartitionState::ArmedHome => "armed_home",
            PartitionState::ArmedAway => "armed_away",
            PartitionState::Pending => "pending",
            PartitionState::Triggered => "triggered",
            PartitionState::Arming => "arming",
            PartitionState::Disarming => "disarming",
            PartitionState::Unknown => "unknown",
        }
    }
}

/// The 48-bit partition condition bitfield, plus the trouble bits the
/// panel reports but which v1 does not yet surface over MQTT.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConditionFlags(u64);

impl PartitionConditionFlags {
    /// Decode six condition bytes as they arrive in a Partition Status
    /// Response, MSB-first.
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut v: u64 = 0;
        for &b in &bytes {
            v = (v << 8) | b as u64;
        }
        Self(v)
    }

    fn has(&self, mask: u64) -> bool {
        self.0 & mask != 0
    }

    pub fn ready_to_arm(&self) -> bool {
        self.has(COND_READY_TO_ARM)
    }
    pub fn armed(&self) -> bool {
        self.has(COND_ARMED)
    }
    pub fn stay_mode(&self) -> bool {
        self.has(COND_STAY_MODE)
    }
    pub fn chime_mode(&self) -> bool {
        self.has(COND_CHIME_MODE)
    }
    pub fn entry_delay(&self) -> bool {
        self.has(COND_ENTRY_DELAY)
    }
    pub fn exit_delay(&self) -> bool {
        self.has(COND_EXIT_DELAY_1) || self.has(COND_EXIT_DELAY_2)
    }
    pub fn previous_alarm(&self) -> bool {
        self.has(COND_PREVIOUS_ALARM)
    }
    pub fn siren_on(&self) -> bool {
        self.has(COND_SIREN_ON)
    }
    pub fn instant_mode(&self) -> bool {
        self.has(COND_INSTANT_MODE)
    }

    /// Raw trouble bits, decoded but (per spec) not yet surfaced over MQTT.
    pub fn trouble(&self) -> PartitionTrouble {
        PartitionTrouble {
            ac_fail: self.has(COND_AC_FAIL),
            low_battery: self.has(COND_LOW_BATTERY),
            system_tamper: self.has(COND_SYSTEM_TAMPER),
            telco_fault: self.has(COND_TELCO_FAULT),
            comm_failure: self.has(COND_COMM_FAILURE),
            buzzer_on: self.has(COND_BUZZER_ON),
        }
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Trouble bits decoded from the condition field. Not yet published to MQTT
/// in v1 (see SPEC_FULL.md §3) — kept so a later discovery entity doesn't
/// need to re-derive the bit layout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTrouble {
    pub ac_fail: bool,
    pub low_battery: bool,
    pub system_tamper: bool,
    pub telco_fault: bool,
    pub comm_failure: bool,
    pub buzzer_on: bool,
}

/// Derive a partition's alarm state from its condition flags.
///
/// Priority (first match wins):
/// 1. `SirenOn` or `PreviousAlarm` → Triggered
/// 2. `EntryDelay` → Pending
/// 3. `ExitDelay1`/`ExitDelay2` (not yet armed) → Arming
/// 4. `Armed` and `StayMode` → ArmedHome
/// 5. `Armed` and not `StayMode` → ArmedAway
/// 6. otherwise → Disarmed
///
/// Pure function: no I/O, referentially transparent.
pub fn derive_state(flags: &PartitionConditionFlags) -> PartitionState {
    if flags.siren_on() || flags.previous_alarm() {
        PartitionState::Triggered
    } else if flags.entry_delay() {
        PartitionState::Pending
    } else if flags.exit_delay() && !flags.armed() {
        PartitionState::Arming
    } else if flags.armed() && flags.stay_mode() {
        PartitionState::ArmedHome
    } else if flags.armed() {
        PartitionState::ArmedAway
    } else {
        PartitionState::Disarmed
    }
}

/// A partition (index 1..=8).
#[derive(Debug, Clone)]
pub struct Partition {
    pub index: u8,
    pub unique_id: String,
    pub condition: PartitionConditionFlags,
    /// Set once the panel confirms this partition exists (System Status
    /// reported its bit set). Partitions are only ever constructed once
    /// that's true, so this is always `true` in practice, but kept
    /// explicit to mirror the data model in SPEC_FULL.md §3.
    pub valid: bool,
}

impl Partition {
    pub fn new(panel_id: &str, index: u8) -> Self {
        Self {
            index,
            unique_id: format!("{panel_id}_partition_{index}"),
            condition: PartitionConditionFlags::default(),
            valid: true,
        }
    }

    pub fn state(&self) -> PartitionState {
        derive_state(&self.condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(mask: u64) -> PartitionConditionFlags {
        PartitionConditionFlags(mask)
    }

    #[test]
    fn siren_overrides_armed() {
        let f = flags(COND_ARMED | COND_SIREN_ON);
        assert_eq!(derive_state(&f), PartitionState::Triggered);
    }

    #[test]
    fn previous_alarm_overrides_armed_stay() {
        let f = flags(COND_ARMED | COND_STAY_MODE | COND_PREVIOUS_ALARM);
        assert_eq!(derive_state(&f), PartitionState::Triggered);
    }

    #[test]
    fn entry_delay_is_pending_not_armed_home() {
        let f = flags(COND_ARMED | COND_STAY_MODE | COND_ENTRY_DELAY);
        assert_eq!(derive_state(&f), PartitionState::Pending);
    }

    #[test]
    fn exit_delay_before_armed_is_arming() {
        let f = flags(COND_EXIT_DELAY_1);
        assert_eq!(derive_state(&f), PartitionState::Arming);
    }

    #[test]
    fn exit_delay_while_already_armed_is_not_arming() {
        let f = flags(COND_ARMED | COND_EXIT_DELAY_1);
        assert_eq!(derive_state(&f), PartitionState::ArmedAway);
    }

    #[test]
    fn armed_stay_is_armed_home() {
        let f = flags(COND_ARMED | COND_STAY_MODE);
        assert_eq!(derive_state(&f), PartitionState::ArmedHome);
    }

    #[test]
    fn armed_without_stay_is_armed_away() {
        let f = flags(COND_ARMED);
        assert_eq!(derive_state(&f), PartitionState::ArmedAway);
    }

    #[test]
    fn no_flags_is_disarmed() {
        let f = flags(0);
        assert_eq!(derive_state(&f), PartitionState::Disarmed);
    }

    #[test]
    fn from_bytes_is_msb_first() {
        let f = PartitionConditionFlags::from_bytes([0, 0, 0, 0, 0, 0b0000_0011]);
        assert!(f.armed());
        assert!(f.ready_to_arm());
    }

    #[test]
    fn trouble_bits_are_decoded_but_independent_of_state() {
        let f = flags(COND_AC_FAIL | COND_LOW_BATTERY);
        assert_eq!(derive_state(&f), PartitionState::Disarmed);
        let trouble = f.trouble();
        assert!(trouble.ac_fail);
        assert!(trouble.low_battery);
        assert!(!trouble.system_tamper);
    }

    #[test]
    fn state_is_deterministic_for_all_condition_fields() {
        // Sweep every combination of the bits the cascade inspects;
        // derive_state must be a pure function of the flags.
        for mask in 0u64..(1 << 10) {
            let f = flags(mask);
            assert_eq!(derive_state(&f), derive_state(&f));
        }
    }
}
