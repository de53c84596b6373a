use crate::error::DecodeError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sample layout reported by the device for a raw frame.
///
/// Samples are always carried as `u16` regardless of depth; the `*12`
/// variants hold 12 significant bits per sample.
///
/// The polarization mosaics repeat every 2x2 pixels. `PolarBayerRg*` is
/// the quad layout used by color DoFP sensors: an RGGB Bayer pattern at
/// the 2x2-block level where each block is itself a 2x2 polarization
/// mosaic, so the full pattern repeats every 4x4 pixels and each angle
/// sub-image is a uniform RGGB grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PixelFormat {
    Mono8,
    Mono12,
    BayerRg8,
    BayerRg12,
    PolarMono8,
    PolarMono12,
    PolarBayerRg8,
    PolarBayerRg12,
}

impl PixelFormat {
    /// Significant bits per sample.
    pub fn bit_depth(self) -> u8 {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRg8
            | PixelFormat::PolarMono8
            | PixelFormat::PolarBayerRg8 => 8,
            PixelFormat::Mono12
            | PixelFormat::BayerRg12
            | PixelFormat::PolarMono12
            | PixelFormat::PolarBayerRg12 => 12,
        }
    }

    /// Largest representable sample value at this depth.
    pub fn max_value(self) -> u16 {
        (1u16 << self.bit_depth()) - 1
    }

    pub fn is_polarization_mosaic(self) -> bool {
        matches!(
            self,
            PixelFormat::PolarMono8
                | PixelFormat::PolarMono12
                | PixelFormat::PolarBayerRg8
                | PixelFormat::PolarBayerRg12
        )
    }

    pub fn is_bayer(self) -> bool {
        matches!(self, PixelFormat::BayerRg8 | PixelFormat::BayerRg12)
    }

    fn has_color_filter(self) -> bool {
        matches!(
            self,
            PixelFormat::BayerRg8
                | PixelFormat::BayerRg12
                | PixelFormat::PolarBayerRg8
                | PixelFormat::PolarBayerRg12
        )
    }
}

/// The class of camera behind a connection, detected once at `open()`
/// and latched for the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CameraType {
    /// Color DoFP sensor: polarization mosaic over a Bayer filter.
    PolarizationColor,
    /// Monochrome DoFP sensor: polarization mosaic only.
    PolarizationMono,
    /// Ordinary color camera with no polarizer array.
    NormalColor,
}

impl CameraType {
    /// Classify a camera from its reported pixel format.
    ///
    /// Plain mono formats map to no supported camera class and return
    /// `None`; sources surface that as a connect failure.
    pub fn from_pixel_format(format: PixelFormat) -> Option<Self> {
        match format {
            PixelFormat::PolarBayerRg8 | PixelFormat::PolarBayerRg12 => {
                Some(CameraType::PolarizationColor)
            }
            PixelFormat::PolarMono8 | PixelFormat::PolarMono12 => {
                Some(CameraType::PolarizationMono)
            }
            PixelFormat::BayerRg8 | PixelFormat::BayerRg12 => Some(CameraType::NormalColor),
            PixelFormat::Mono8 | PixelFormat::Mono12 => None,
        }
    }

    /// Returns true if `format` is a layout this camera class delivers.
    pub fn accepts(self, format: PixelFormat) -> bool {
        match self {
            CameraType::PolarizationColor => {
                format.is_polarization_mosaic() && format.has_color_filter()
            }
            CameraType::PolarizationMono => {
                format.is_polarization_mosaic() && !format.has_color_filter()
            }
            CameraType::NormalColor => format.is_bayer(),
        }
    }
}

/// One raw sensor frame as delivered by a [`FrameSource`].
///
/// Owned exclusively by the stage currently processing it and moved,
/// never copied, between stages. `seq` increases monotonically over a
/// capture session.
///
/// [`FrameSource`]: crate::source::FrameSource
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    width: usize,
    height: usize,
    format: PixelFormat,
    seq: u64,
    samples: Vec<u16>,
}

impl RawFrame {
    /// Create a frame from a row-major sample buffer.
    ///
    /// Fails with [`DecodeError::InvalidDimensions`] if the buffer
    /// length does not match `width * height`.
    pub fn new(
        width: usize,
        height: usize,
        format: PixelFormat,
        seq: u64,
        samples: Vec<u16>,
    ) -> Result<Self, DecodeError> {
        if samples.len() != width * height {
            return Err(DecodeError::InvalidDimensions {
                width,
                height,
                format,
            });
        }

        Ok(Self {
            width,
            height,
            format,
            seq,
            samples,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn samples(&self) -> &[u16] {
        self.samples.as_slice()
    }

    /// Sample at `(x, y)`; callers stay within `dimensions()`.
    pub(crate) fn sample(&self, x: usize, y: usize) -> u16 {
        self.samples[y * self.width + x]
    }
}
