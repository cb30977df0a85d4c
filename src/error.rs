use thiserror::Error;

/// Crate-wide error taxonomy. The bio path recovers locally where it can
/// (auto-remap on a main-device failure); everything surfaced here has no
/// local recovery.
#[derive(Debug, Error)]
pub enum RemapError {
    /// Invalid attach arguments, impossibly small spare, overlapping
    /// reservations. Attach fails immediately.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Main or spare device I/O failed during attach.
    #[error("device i/o error: {0}")]
    Device(#[from] std::io::Error),

    /// Every metadata copy failed validation and the spare is not zeroed.
    #[error("no valid metadata copy found on a non-empty spare device")]
    Integrity,

    /// Device identification fell below the fuzzy-match threshold.
    #[error("device fingerprint mismatch (confidence {confidence})")]
    FingerprintMismatch { confidence: u32 },

    /// A remap entry already exists for this main sector.
    #[error("remap entry already exists for sector {0}")]
    Duplicate(u64),

    /// The allocator found no free spare unit.
    #[error("spare device has no free capacity")]
    NoCapacity,

    /// No metadata copy location accepted the new image.
    #[error("failed to persist metadata to any copy location")]
    Persist,

    /// The target is detaching; new bios are rejected.
    #[error("target is shutting down")]
    SystemShutdown,

    /// Unknown administrative command.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Recognized command with a malformed or out-of-range argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, RemapError>;
