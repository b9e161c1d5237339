use thiserror::Error;

use crate::imageop::FilterKind;

/// Errors surfaced by the batching core and its backends.
///
/// Only flush-on-capacity and flush-on-state-change are recovered locally;
/// everything here propagates to the owner of the context.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Buffer, uniform or texture allocation failed. The frame is abandoned.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Programming error: illegal enable/disable sequence or out-of-range request.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(#[from] UsageError),

    /// The device is unusable; every backend object must be recreated.
    #[error("graphics device lost")]
    DeviceLost,

    /// Cache or buffer allocation failed during initialization.
    #[error("rendering backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("malformed command stream: {0}")]
    MalformedCommand(String),
}

impl RenderError {
    /// Returns `true` for failures that abandon the current frame.
    #[inline]
    pub fn abandons_frame(&self) -> bool {
        matches!(self, RenderError::ResourceExhausted(_) | RenderError::DeviceLost)
    }
}

/// Usage errors reported as [`RenderError::InvalidStateTransition`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("cannot enable {requested:?} while {active:?} is active")]
    ImageOpActive {
        active: FilterKind,
        requested: FilterKind,
    },

    #[error("cannot disable {expected:?}: active image op is {active:?}")]
    ImageOpNotActive {
        expected: FilterKind,
        active: FilterKind,
    },

    #[error("antialiased parallelogram program is already enabled")]
    AaProgramActive,

    #[error("antialiased parallelogram program is not enabled")]
    AaProgramInactive,

    #[error("mask cache is not enabled")]
    MaskCacheDisabled,

    #[error("mask {width}x{height} exceeds the 32x32 tile")]
    MaskTooLarge { width: u32, height: u32 },

    #[error("mask buffer holds {len} bytes but {needed} are addressed")]
    MaskBufferTooSmall { len: usize, needed: usize },

    #[error("no vertex batch is open")]
    NoOpenBatch,

    #[error("vertex group of {len} exceeds batch capacity {capacity}")]
    GroupTooLarge { len: usize, capacity: usize },

    #[error("no drawing target is bound")]
    NoTarget,

    #[error("invalid {width}x{height} kernel with {values} values")]
    InvalidKernel {
        width: u32,
        height: u32,
        values: usize,
    },

    #[error("{bands} bands given; 1, 3 or 4 expected")]
    InvalidBandCount { bands: usize },

    #[error("invalid lookup table: {0}")]
    InvalidLookupTable(&'static str),

    #[error("blit source does not match the active image op source")]
    SourceMismatch,

    #[error("{0} still enabled at teardown")]
    UnpairedAtTeardown(&'static str),

    #[error("image data holds {len} bytes but {needed} are required")]
    ImageSizeMismatch { len: usize, needed: usize },
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
