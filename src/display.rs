use crate::{error::SelectorError, frame::CameraType};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A requested way of presenting processed frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DisplayMode {
    /// The raw mosaic, scaled for display but otherwise untouched.
    Raw,
    /// Debayered color rendering.
    Color,
    /// Intensity rendering; the plain average of the four angle
    /// channels on polarization cameras.
    Grayscale,
    /// Degree-of-polarization pseudo-color with DoP and AoP maps.
    Polarization,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 4] = [
        DisplayMode::Raw,
        DisplayMode::Color,
        DisplayMode::Grayscale,
        DisplayMode::Polarization,
    ];
}

/// The display modes a camera class can serve.
pub fn available_modes(camera: CameraType) -> &'static [DisplayMode] {
    match camera {
        CameraType::NormalColor => &[DisplayMode::Raw, DisplayMode::Color, DisplayMode::Grayscale],
        CameraType::PolarizationMono => &[
            DisplayMode::Raw,
            DisplayMode::Grayscale,
            DisplayMode::Polarization,
        ],
        CameraType::PolarizationColor => &[
            DisplayMode::Raw,
            DisplayMode::Color,
            DisplayMode::Grayscale,
            DisplayMode::Polarization,
        ],
    }
}

/// Resolve a requested mode against a camera class.
///
/// Total and stateless: every `(mode, camera)` pair has a defined
/// outcome, and an illegal pair is reported rather than substituted.
/// Falling back (for example to `Grayscale`) is the caller's decision.
pub fn resolve(mode: DisplayMode, camera: CameraType) -> Result<DisplayMode, SelectorError> {
    if available_modes(camera).contains(&mode) {
        Ok(mode)
    } else {
        Err(SelectorError::Unavailable { mode, camera })
    }
}
