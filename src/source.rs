use crate::{
    error::{CaptureError, ConnectError},
    frame::{CameraType, RawFrame},
};

/// A device-side parameter forwarded to the driver at a frame
/// boundary. Range validation is the driver's responsibility; the core
/// only applies already-validated values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceParameter {
    /// Sensor integration time in microseconds.
    ExposureUs(f64),
    /// Analog/digital gain in decibels.
    GainDb(f64),
}

/// A live or single-shot camera feed.
///
/// Implementations wrap a vendor driver. The original frame-ready
/// callback is modeled as the blocking [`next_frame`] poll: after
/// [`start`], the stream is lazy, infinite, and non-restartable until
/// [`stop`] or an unrecoverable device error.
///
/// Frames carry a monotonically increasing sequence id for the
/// session.
///
/// [`next_frame`]: FrameSource::next_frame
/// [`start`]: FrameSource::start
/// [`stop`]: FrameSource::stop
pub trait FrameSource: Send {
    /// Open the device and report its camera class, detected from the
    /// SDK-reported pixel format.
    fn open(&mut self) -> Result<CameraType, ConnectError>;

    /// Begin continuous delivery.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Block until the next frame of the continuous stream arrives.
    ///
    /// Implementations should return [`CaptureError::Timeout`]
    /// periodically rather than blocking forever, so a stopped
    /// acquisition can wind down promptly.
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError>;

    /// Capture exactly one frame outside the continuous stream.
    fn capture_single(&mut self) -> Result<RawFrame, CaptureError>;

    /// End continuous delivery. The connection stays open.
    fn stop(&mut self);

    /// Apply a device parameter.
    fn set_parameter(&mut self, param: SourceParameter) -> Result<(), CaptureError>;
}
