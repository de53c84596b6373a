use crate::{
    display::DisplayMode,
    frame::{CameraType, PixelFormat},
    pipeline::State,
};
use thiserror::Error;

/// Session-fatal failures while opening a camera. The core never
/// retries these; the caller decides whether to reconnect.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no camera device found")]
    DeviceNotFound,
    #[error("camera device is busy: {0}")]
    DeviceBusy(String),
    #[error("device fault while opening: {0}")]
    Device(String),
    #[error("device reports pixel format {format:?} which maps to no supported camera class")]
    UnsupportedCamera { format: PixelFormat },
}

/// Per-request capture failures. The session stays connected and the
/// caller may retry.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("driver fault: {0}")]
    Driver(String),
}

/// Per-frame decode failures. The pipeline drops the offending frame
/// and keeps streaming.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("pixel format {format:?} is not a recognized mosaic layout")]
    UnsupportedFormat { format: PixelFormat },
    #[error("dimensions {width}x{height} do not tile the {format:?} mosaic")]
    InvalidDimensions {
        width: usize,
        height: usize,
        format: PixelFormat,
    },
}

/// Caller-input error from display mode resolution; returned
/// synchronously with no side effects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("display mode {mode:?} is unavailable on {camera:?} cameras")]
    Unavailable {
        mode: DisplayMode,
        camera: CameraType,
    },
}

/// Failure while processing one frame through decode and compute.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// Errors surfaced by [`AcquisitionPipeline`] operations.
///
/// [`AcquisitionPipeline`]: crate::pipeline::AcquisitionPipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{op} is not valid in state {state:?}")]
    InvalidState { op: &'static str, state: State },
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}
