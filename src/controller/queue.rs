//! Outbound command queue.
//!
//! Queue processing is strictly sequential (SPEC_FULL.md §4.3 / spec.md
//! §4.3): at most one outstanding request at a time. Each entry carries
//! everything [`super::Controller::process_next_command`] needs to run the
//! send-and-wait protocol without the queue itself knowing about I/O.

use std::collections::VecDeque;
use std::time::Duration;

/// Default number of attempts (including the first) before a command is
/// abandoned as [`crate::controller::error::ControllerError::CommandFailed`].
pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;
/// Backoff between retry attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(250);
/// Bound on how long to wait for an ACK or an expected response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// How the completion of a queued command is reported back to whoever
/// enqueued it — an explicit continuation rather than a boxed callback
/// (SPEC_FULL.md §9 / spec.md Design Notes).
pub enum Completion {
    /// Nobody is waiting; fire-and-forget (e.g. transition-triggered
    /// re-requests, or commands issued by the sync sequence whose result is
    /// observed via the registry instead).
    None,
    /// A one-shot channel a caller is blocked on (e.g. a future synchronous
    /// API), fed the final `Result`.
    Oneshot(std::sync::mpsc::Sender<Result<Vec<u8>, super::error::ControllerError>>),
}

/// One outbound request waiting to be sent.
pub struct QueuedCommand {
    /// Fully encoded, byte-stuffed, checksummed frame ready to transmit.
    pub frame: Vec<u8>,
    /// The message type code as sent, 6-bit (catalog code, no ACK bit).
    pub msg_type: u8,
    /// Whether the panel is expected to ACK this message (catalog-driven,
    /// independent of the wire's bit-7 ACK-request flag — see
    /// `Controller::arm_disarm` for why the two are not conflated).
    pub expects_ack: bool,
    /// Expected response message code, if the command is not fire-and-forget.
    pub expected_response: Option<u8>,
    pub max_attempts: u8,
    pub completion: Completion,
}

impl QueuedCommand {
    /// A request that expects `expected_response` back and retries up to
    /// [`DEFAULT_MAX_ATTEMPTS`] times.
    pub fn new(frame: Vec<u8>, msg_type: u8, expects_ack: bool, expected_response: Option<u8>) -> Self {
        Self {
            frame,
            msg_type,
            expects_ack,
            expected_response,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            completion: Completion::None,
        }
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }
}

/// FIFO queue of pending outbound commands.
#[derive(Default)]
pub struct CommandQueue {
    pending: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmd: QueuedCommand) {
        self.pending.push_back(cmd);
    }

    pub fn pop_front(&mut self) -> Option<QueuedCommand> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let mut q = CommandQueue::new();
        q.push(QueuedCommand::new(vec![1], 0x01, true, None));
        q.push(QueuedCommand::new(vec![2], 0x02, true, None));
        assert_eq!(q.pop_front().unwrap().msg_type, 0x01);
        assert_eq!(q.pop_front().unwrap().msg_type, 0x02);
        assert!(q.pop_front().is_none());
    }
}
