//! # Controller
//!
//! Owns the serial transport and the command queue exclusively, drives
//! startup synchronization, dispatches transition broadcasts, and emits
//! arm/disarm keypad commands. See SPEC_FULL.md §4.3 / §5.

pub mod error;
pub mod queue;
pub mod sync;

use std::io::Write;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::catalog::{self, HandlerId, KeypadFunction};
use crate::frame::{self, ByteSource, DecodedFrame, FrameError, FrameReader};
use crate::panel::partition::PartitionConditionFlags;
use crate::panel::registry::PanelModel;
use crate::panel::zone::{ZoneConditionFlags, ZoneTypeFlags};

pub use error::{ControllerError, IndexKind};
pub use queue::{CommandQueue, Completion, QueuedCommand};

/// Interval at which the main loop republishes every partition/zone state
/// for broker-restart resilience (spec.md §4.3).
pub const REPUBLISH_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Timeout used for the non-blocking poll of the reader in the main loop.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Notifications the Controller pushes out for the MQTT bridge to react to.
/// The Controller never calls into the bridge directly (SPEC_FULL.md §5) —
/// it only produces these events; a channel carries them across threads.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// Startup synchronization has completed; safe to publish discovery.
    SyncComplete,
    /// A partition's condition flags changed (or were (re)published wholesale).
    PartitionChanged(u8),
    /// A zone's condition/type flags changed (or were (re)published wholesale).
    ZoneChanged(u8),
    /// A Zone Snapshot broadcast referenced this zone; advisory only, the
    /// bit layout is not decoded (spec.md §9 Open Question).
    ZoneRecentlyUpdated(u8),
}

/// What the main loop should do after one [`Controller::tick`].
#[derive(Debug)]
pub enum TickOutcome {
    /// Keep iterating.
    Continue,
    /// The MQTT command inbox was disconnected (its sender thread is gone);
    /// stop iterating without treating it as a failure.
    StopClean,
    /// A fatal runtime error (spec.md §7: `SerialClosed`). The caller should
    /// publish offline availability and exit with a nonzero status.
    Fatal(ControllerError),
}

/// A command request handed off from the MQTT bridge's command-topic
/// subscription into the Controller's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmDisarmRequest {
    pub partition: u8,
    pub action: KeypadFunction,
}

/// Either a PIN or a user number, used to build Primary Keypad Function frames.
#[derive(Debug, Clone)]
pub enum Credential {
    Pin(String),
    User(u8),
}

/// Pack decimal PIN digits two-per-byte, low nibble first: `"1234"` becomes
/// `[0x21, 0x43, 0x00]` (SPEC_FULL.md / spec.md §4.3, testable property #8).
pub fn pack_pin(digits: &str) -> Vec<u8> {
    let nibbles: Vec<u8> = digits
        .bytes()
        .map(|b| b - b'0')
        .collect();
    let mut bytes = Vec::with_capacity(nibbles.len().div_ceil(2).max(3));
    for chunk in nibbles.chunks(2) {
        let lo = chunk[0];
        let hi = chunk.get(1).copied().unwrap_or(0);
        bytes.push(lo | (hi << 4));
    }
    while bytes.len() < 3 {
        bytes.push(0);
    }
    bytes
}

/// Owns the serial transport, the command queue, and the panel model.
///
/// Generic over the transport so tests can run the whole controller over an
/// in-memory byte source instead of a real serial device.
pub struct Controller<T> {
    reader: FrameReader<T>,
    model: PanelModel,
    queue: CommandQueue,
    panel_id: String,
    max_zones: u8,
    ignored_zones: Vec<u8>,
    credential: Credential,
    events: std::sync::mpsc::Sender<PanelEvent>,
    last_republish: Instant,
}

impl<T> Controller<T>
where
    T: ByteSource + Write,
{
    pub fn new(
        transport: T,
        panel_id: String,
        max_zones: u8,
        ignored_zones: Vec<u8>,
        credential: Credential,
        events: std::sync::mpsc::Sender<PanelEvent>,
    ) -> Self {
        Self {
            reader: FrameReader::new(transport),
            model: PanelModel::new(),
            queue: CommandQueue::new(),
            panel_id,
            max_zones,
            ignored_zones,
            credential,
            events,
            last_republish: Instant::now(),
        }
    }

    pub fn model(&self) -> &PanelModel {
        &self.model
    }

    /// The underlying transport, e.g. for tests driving it directly instead
    /// of through a real serial device.
    pub fn transport_mut(&mut self) -> &mut T {
        self.reader.source_mut()
    }

    /// Run one iteration of the main loop: drain arm/disarm requests the
    /// MQTT bridge's command-topic handler pushed into `inbox`, poll for an
    /// unsolicited transition broadcast, and periodically republish every
    /// partition/zone for broker-restart resilience (spec.md §5).
    pub fn tick(&mut self, inbox: &Receiver<ArmDisarmRequest>) -> TickOutcome {
        loop {
            match inbox.try_recv() {
                Ok(req) => {
                    if let Err(e) = self.arm_disarm(req) {
                        warn!(error = %e, "arm/disarm request failed");
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("mqtt command inbox disconnected, stopping main loop");
                    return TickOutcome::StopClean;
                }
            }
        }

        match self.reader.read_frame(POLL_TIMEOUT, false) {
            Ok(frame) => self.dispatch(&frame),
            Err(FrameError::Timeout) => {}
            // Per spec.md §7, a closed serial stream is fatal in v1 (recovery
            // is left to the process supervisor); every other FrameError is
            // local recovery (flush-and-continue already happened in
            // `FrameReader::read_frame`).
            Err(FrameError::Closed) => {
                return TickOutcome::Fatal(ControllerError::Frame(FrameError::Closed));
            }
            Err(e) => debug!(error = %e, "discarding malformed frame"),
        }

        if self.last_republish.elapsed() >= REPUBLISH_INTERVAL {
            info!("periodic full-state republish");
            self.republish_all();
            self.last_republish = Instant::now();
        }
        TickOutcome::Continue
    }

    /// Re-emit a `*Changed` event for every known partition and zone, used
    /// both by the periodic republish and right after sync completes so the
    /// bridge's very first state publish has something to send.
    pub fn republish_all(&mut self) {
        let partitions: Vec<u8> = self.model.partitions().map(|p| p.index).collect();
        for index in partitions {
            let _ = self.events.send(PanelEvent::PartitionChanged(index));
        }
        let zones: Vec<u8> = self.model.zones().map(|z| z.index).collect();
        for index in zones {
            let _ = self.events.send(PanelEvent::ZoneChanged(index));
        }
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), ControllerError> {
        self.reader
            .source_mut()
            .write_all(frame)
            .map_err(ControllerError::SerialIo)
    }

    /// Enqueue an arm/disarm command and run it to completion (blocking,
    /// following the send-and-wait protocol of spec.md §4.3). No state
    /// publish happens here on failure, by design (spec.md §7).
    pub fn arm_disarm(&mut self, req: ArmDisarmRequest) -> Result<(), ControllerError> {
        let body = self.build_keypad_frame(req.partition, req.action);
        let msg_type = match &self.credential {
            Credential::Pin(_) => catalog::PRIMARY_KEYPAD_PIN,
            Credential::User(_) => catalog::PRIMARY_KEYPAD_USER,
        };
        let expects_ack = catalog::lookup(msg_type).is_some_and(|s| s.expects_ack_from_panel);
        let wire_type = if expects_ack { msg_type | frame::ACK_REQUEST_BIT } else { msg_type };
        let cmd = QueuedCommand::new(frame::encode_frame(wire_type, &body), msg_type, expects_ack, None);
        self.queue.push(cmd);
        self.process_all_queued()
    }

    fn build_keypad_frame(&self, partition: u8, action: KeypadFunction) -> Vec<u8> {
        let mask = catalog::partition_mask(partition);
        match &self.credential {
            Credential::Pin(pin) => {
                let mut body = pack_pin(pin);
                body.push(mask);
                body.push(action.code());
                body
            }
            Credential::User(user) => vec![*user, mask, action.code()],
        }
    }

    /// Drain and run every queued command to completion, in order.
    pub fn process_all_queued(&mut self) -> Result<(), ControllerError> {
        while let Some(cmd) = self.queue.pop_front() {
            self.run_command(cmd)?;
        }
        Ok(())
    }

    /// Run one queued command to completion and feed its continuation.
    /// Per spec.md §7, a failed command is logged and dropped — it is never
    /// surfaced as an error to the main loop.
    fn run_command(&mut self, cmd: QueuedCommand) -> Result<(), ControllerError> {
        let result = self.send_and_wait(
            &cmd.frame,
            cmd.msg_type,
            cmd.expects_ack,
            cmd.expected_response,
            cmd.max_attempts,
        );
        if let Completion::Oneshot(tx) = &cmd.completion {
            let _ = tx.send(result);
        }
        Ok(())
    }

    /// Convenience used by the sync sequence: run a single request to
    /// completion and return its response body directly. Whether the frame
    /// is sent with the ACK-request bit set (and an ACK awaited) is driven
    /// entirely by the catalog entry for `msg_type` (spec.md §4.1) rather
    /// than by the caller, so the wire bit and the wait behavior can never
    /// drift apart.
    pub fn request(
        &mut self,
        msg_type: u8,
        data: &[u8],
        expected_response: u8,
    ) -> Result<Vec<u8>, ControllerError> {
        let expects_ack = catalog::lookup(msg_type).is_some_and(|s| s.expects_ack_from_panel);
        let wire_type = if expects_ack { msg_type | frame::ACK_REQUEST_BIT } else { msg_type };
        let frame = frame::encode_frame(wire_type, data);
        self.send_and_wait(
            &frame,
            msg_type,
            expects_ack,
            Some(expected_response),
            queue::DEFAULT_MAX_ATTEMPTS,
        )
    }

    /// The send-and-wait protocol itself (spec.md §4.3): transmit, await
    /// ACK if requested (retrying on NACK/timeout up to `max_attempts`),
    /// then await the expected response, dispatching any intervening
    /// transition broadcast normally. Returns the response body on success.
    fn send_and_wait(
        &mut self,
        frame_bytes: &[u8],
        msg_type: u8,
        expects_ack: bool,
        expected_response: Option<u8>,
        max_attempts: u8,
    ) -> Result<Vec<u8>, ControllerError> {
        let mut attempts_left = max_attempts;
        loop {
            attempts_left -= 1;
            self.transmit(frame_bytes)?;

            if expects_ack {
                match self.await_ack(queue::RESPONSE_TIMEOUT) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => {
                        if attempts_left == 0 {
                            error!(msg_type = %format!("{msg_type:#04x}"), "command failed after all attempts (ACK)");
                            return Err(ControllerError::CommandFailed { msg_type, attempts: max_attempts });
                        }
                        std::thread::sleep(queue::RETRY_BACKOFF);
                        continue;
                    }
                }
            }

            match expected_response {
                None => return Ok(Vec::new()),
                Some(expected) => match self.await_response(expected, queue::RESPONSE_TIMEOUT) {
                    Ok(body) => return Ok(body),
                    Err(_) => {
                        if attempts_left == 0 {
                            error!(msg_type = %format!("{msg_type:#04x}"), "command failed after all attempts (response)");
                            return Err(ControllerError::CommandFailed { msg_type, attempts: max_attempts });
                        }
                        std::thread::sleep(queue::RETRY_BACKOFF);
                        continue;
                    }
                },
            }
        }
    }

    /// Wait for an ACK (`true`)/NACK (`false`) frame, dispatching any
    /// transition broadcast encountered along the way.
    fn await_ack(&mut self, timeout: Duration) -> Result<bool, FrameError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::Timeout);
            }
            let frame = self.reader.read_frame(remaining, true)?;
            match frame.code() {
                catalog::ACK => return Ok(true),
                catalog::NACK => return Ok(false),
                code if catalog::is_transition_broadcast(code) => {
                    self.dispatch(&frame);
                }
                _ => {}
            }
        }
    }

    /// Wait for the expected response type, dispatching any transition
    /// broadcast encountered along the way. A response of the wrong type
    /// (that isn't itself a transition broadcast) fails the command.
    fn await_response(&mut self, expected: u8, timeout: Duration) -> Result<Vec<u8>, FrameError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FrameError::Timeout);
            }
            let frame = self.reader.read_frame(remaining, true)?;
            if frame.code() == expected {
                self.dispatch(&frame);
                return Ok(frame.data);
            } else if catalog::is_transition_broadcast(frame.code()) {
                self.dispatch(&frame);
            } else {
                return Err(FrameError::UnknownType(frame.msg_type));
            }
        }
    }

    /// Dispatch one decoded frame to its catalog handler. Called both for
    /// transition broadcasts arriving unsolicited and for responses that
    /// also update panel state as a side effect.
    pub fn dispatch(&mut self, frame: &DecodedFrame) {
        let code = frame.code();
        let Some(spec) = catalog::lookup(code) else {
            warn!(code = %format!("{code:#04x}"), "dropping frame with unknown message type");
            return;
        };
        if let Some(expected_len) = spec.valid_body_length {
            if frame.data.len() != expected_len as usize {
                warn!(
                    code = %format!("{code:#04x}"),
                    expected = expected_len,
                    actual = frame.data.len(),
                    "dropping frame with bad body length"
                );
                return;
            }
        }
        match spec.handler {
            HandlerId::PartitionStatusResponse => self.handle_partition_status(&frame.data),
            HandlerId::ZoneStatusResponse => self.handle_zone_status(&frame.data),
            HandlerId::ZoneNameResponse => self.handle_zone_name(&frame.data),
            HandlerId::ZoneSnapshotResponse => self.handle_zone_snapshot(&frame.data),
            HandlerId::SystemStatusResponse => self.handle_system_status(&frame.data),
            HandlerId::InterfaceConfigResponse
            | HandlerId::LogEventResponse
            | HandlerId::Ack
            | HandlerId::Nack
            | HandlerId::Ignore => {
                debug!(code = %format!("{code:#04x}"), "no panel-state handler for this message");
            }
        }
    }

    fn handle_partition_status(&mut self, data: &[u8]) {
        if data.len() != 7 {
            return;
        }
        let index = data[0];
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&data[1..7]);
        let flags = PartitionConditionFlags::from_bytes(bytes);
        let synced = self.model.is_synced();
        if synced && self.model.partition(index).is_none() {
            let err = ControllerError::UnknownIndex { kind: IndexKind::Partition, index };
            error!(error = %err);
            return;
        }
        match self.model.partition_mut(index) {
            Some(p) => {
                p.condition = flags;
                // Suppressed during sync itself: the sync sequence's own
                // SyncComplete event (sent once, at the end) is what triggers
                // the bridge's discovery+state publish, so discovery always
                // precedes the first state message (spec.md §5).
                if synced {
                    let _ = self.events.send(PanelEvent::PartitionChanged(index));
                }
            }
            None => {
                // Only reachable before sync if System Status somehow
                // didn't announce the partition; log and drop, don't create.
                error!(index, "partition status for unregistered index before sync");
            }
        }
    }

    fn handle_zone_status(&mut self, data: &[u8]) {
        if data.len() != 6 {
            return;
        }
        let index = data[0];
        let type_flags = ZoneTypeFlags::from_bits(
            (data[1] as u32) | ((data[2] as u32) << 8) | ((data[3] as u32) << 16),
        );
        let cond = ZoneConditionFlags::from_bits((data[4] as u16) | ((data[5] as u16) << 8));
        let synced = self.model.is_synced();
        if synced && self.model.zone(index).is_none() {
            let err = ControllerError::UnknownIndex { kind: IndexKind::Zone, index };
            error!(error = %err);
            return;
        }
        if let Some(z) = self.model.zone_mut(index) {
            z.type_flags = type_flags;
            z.condition = cond;
            if synced {
                let _ = self.events.send(PanelEvent::ZoneChanged(index));
            }
        }
    }

    fn handle_zone_name(&mut self, _data: &[u8]) {
        // Handled synchronously during sync via `request_zone_name`; an
        // unsolicited Zone Name Response outside sync has nothing to update.
    }

    fn handle_zone_snapshot(&mut self, data: &[u8]) {
        // Advisory only (spec.md §9 Open Question): mark referenced zones
        // as recently updated without decoding the bit layout.
        for (byte_index, &b) in data.iter().enumerate() {
            if b == 0 {
                continue;
            }
            for bit in 0..8u8 {
                if b & (1 << bit) != 0 {
                    let zone_index = (byte_index as u8) * 8 + bit + 1;
                    let _ = self.events.send(PanelEvent::ZoneRecentlyUpdated(zone_index));
                }
            }
        }
    }

    fn handle_system_status(&mut self, _data: &[u8]) {
        // Handled synchronously during sync via `request_system_status`;
        // an unsolicited broadcast here carries no new partitions to create
        // post-sync (registry growth is sync-only, spec.md §3).
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_pin_packs_four_digits_low_nibble_first() {
        assert_eq!(pack_pin("1234"), vec![0x21, 0x43, 0x00]);
    }

    #[test]
    fn pack_pin_packs_six_digits() {
        assert_eq!(pack_pin("123456"), vec![0x21, 0x43, 0x65]);
    }
}
