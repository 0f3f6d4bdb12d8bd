use thiserror::Error;

use crate::frame::FrameError;

/// Which registry an [`ControllerError::UnknownIndex`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Partition,
    Zone,
}

/// Controller-level error taxonomy (SPEC_FULL.md §7).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("command {msg_type:#04x} failed after {attempts} attempt(s)")]
    CommandFailed { msg_type: u8, attempts: u8 },

    #[error("panel failed interface configuration check: missing broadcast code {0:#04x}")]
    PanelMisconfigured(u8),

    #[error("serial I/O error: {0}")]
    SerialIo(#[from] std::io::Error),

    #[error("message referenced unknown {kind:?} index {index}")]
    UnknownIndex { kind: IndexKind, index: u8 },
}
