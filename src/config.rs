use crate::display::DisplayMode;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lower and upper clamp applied to white balance gains, matching the
/// gain range the capture devices accept.
pub const WB_GAIN_RANGE: (f32, f32) = (0.1, 3.0);

/// A sub-rectangle of a rendered frame selected for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    /// Clamp the region to an image extent. Returns `None` when nothing
    /// of the region falls inside `width` x `height`.
    pub fn clamped(self, width: usize, height: usize) -> Option<Roi> {
        if self.x >= width || self.y >= height || self.width == 0 || self.height == 0 {
            return None;
        }

        Some(Roi {
            x: self.x,
            y: self.y,
            width: self.width.min(width - self.x),
            height: self.height.min(height - self.y),
        })
    }
}

/// Processing and device parameters read by the pipeline at the start
/// of each frame.
///
/// Updates are applied under a snapshot-copy discipline: the worker
/// clones the current config when it takes a frame, so an update issued
/// while frame N is in flight is first observed at frame N+1. Exposure
/// and gain are also forwarded to the device at the next frame
/// boundary; their range validation is the driver's responsibility.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// Sensor integration time in microseconds.
    pub exposure_us: f64,
    /// Analog/digital gain in decibels; also applied as a digital
    /// scale at the 8-bit render boundary.
    pub gain_db: f64,
    /// Per-channel white balance gains in R, G, B order.
    pub white_balance: [f32; 3],
    /// Target display mode for continuous capture.
    pub mode: DisplayMode,
    /// Optional crop applied to the renderable image, after all
    /// processing.
    pub roi: Option<Roi>,
}

impl PipelineConfig {
    /// Digital scale factor derived from `gain_db`.
    pub fn gain_scale(&self) -> f32 {
        10f32.powf(self.gain_db as f32 / 20.0)
    }

    /// White balance gains clamped to [`WB_GAIN_RANGE`].
    pub fn clamped_white_balance(&self) -> [f32; 3] {
        self.white_balance
            .map(|g| g.clamp(WB_GAIN_RANGE.0, WB_GAIN_RANGE.1))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            exposure_us: 10_000.0,
            gain_db: 0.0,
            white_balance: [1.0, 1.0, 1.0],
            mode: DisplayMode::Raw,
            roi: None,
        }
    }
}
