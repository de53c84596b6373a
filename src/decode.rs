//! Polarization mosaic decoding.
//!
//! A division of focal plane (DoFP) polarized camera has a
//! micro-polarizer array in front of the sensor, so adjacent pixels
//! measure intensity through different linear polarizing filters. The
//! repeating 2x2 cell is:
//!
//! ```text
//! +-----+-----+-----+-----+
//! | 090 | 135 | 090 | ... |
//! +-----+-----+-----+-----+
//! | 045 | 000 | 045 | ... |
//! +-----+-----+-----+-----+
//! | 090 | 135 | ... |
//! ```
//!
//! Decoding selects the fixed per-angle offsets out of each cell, so
//! the four channel images are exactly half the raw width and height.
//! On color DoFP sensors each angle sub-image is itself a uniform RGGB
//! Bayer grid; the angle split always happens first and Bayer
//! interpolation runs per sub-image afterwards, since the interpolation
//! kernel assumes a uniform Bayer grid.

use crate::{
    bayer,
    error::DecodeError,
    frame::{CameraType, RawFrame},
    plane::{Plane, RgbPlane},
};
use rayon::prelude::*;

/// The four angle channels decoded from one raw frame, in
/// 0, 45, 90, 135 degree order.
///
/// All-or-nothing: a `ChannelSet` always holds four same-dimension
/// intensity planes. For color DoFP frames it additionally holds the
/// four debayered per-angle RGB planes, and the intensity planes are
/// their Rec.601 luma.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSet {
    angles: [Plane<u16>; 4],
    color: Option<[RgbPlane; 4]>,
    bit_depth: u8,
    seq: u64,
}

impl ChannelSet {
    /// Assemble a channel set from four intensity planes, for callers
    /// that produce channels by other means (tests, file import).
    ///
    /// Returns `None` if the planes do not share one dimension.
    pub fn from_planes(angles: [Plane<u16>; 4], bit_depth: u8, seq: u64) -> Option<Self> {
        let dims = angles[0].dimensions();
        if angles.iter().any(|p| p.dimensions() != dims) {
            return None;
        }

        Some(Self {
            angles,
            color: None,
            bit_depth,
            seq,
        })
    }

    /// Intensity planes in I0, I45, I90, I135 order.
    pub fn intensities(&self) -> &[Plane<u16>; 4] {
        &self.angles
    }

    /// Per-angle debayered RGB planes; present only for color DoFP
    /// frames.
    pub fn color(&self) -> Option<&[RgbPlane; 4]> {
        self.color.as_ref()
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.angles[0].dimensions()
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Largest representable intensity at this bit depth.
    pub fn max_value(&self) -> u16 {
        (1u16 << self.bit_depth) - 1
    }

    /// Sequence id of the raw frame this set was decoded from.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Demosaic a raw polarization mosaic frame into its four angle
/// channels.
///
/// Pure: the same frame and camera type always yield a bit-identical
/// `ChannelSet`. Odd dimensions are rejected rather than truncated so
/// the half-size output is reproducible.
pub fn decode(frame: RawFrame, camera: CameraType) -> Result<ChannelSet, DecodeError> {
    let format = frame.format();
    if !format.is_polarization_mosaic() || !camera.accepts(format) {
        return Err(DecodeError::UnsupportedFormat { format });
    }

    // Color DoFP cells span 4x4 pixels (2x2 polarization blocks in an
    // RGGB arrangement); mono cells span 2x2.
    let tile = match camera {
        CameraType::PolarizationColor => 4,
        _ => 2,
    };
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 || width % tile != 0 || height % tile != 0 {
        return Err(DecodeError::InvalidDimensions {
            width,
            height,
            format,
        });
    }

    let angles = split_mosaic(&frame);
    let set = match camera {
        CameraType::PolarizationMono => ChannelSet {
            angles,
            color: None,
            bit_depth: format.bit_depth(),
            seq: frame.seq(),
        },
        CameraType::PolarizationColor => {
            let color = [
                bayer::demosaic_rggb(&angles[0]),
                bayer::demosaic_rggb(&angles[1]),
                bayer::demosaic_rggb(&angles[2]),
                bayer::demosaic_rggb(&angles[3]),
            ];
            let angles = [
                bayer::luma(&color[0]),
                bayer::luma(&color[1]),
                bayer::luma(&color[2]),
                bayer::luma(&color[3]),
            ];
            ChannelSet {
                angles,
                color: Some(color),
                bit_depth: format.bit_depth(),
                seq: frame.seq(),
            }
        }
        CameraType::NormalColor => {
            return Err(DecodeError::UnsupportedFormat { format });
        }
    };

    Ok(set)
}

/// Extract the four half-size angle planes out of the 2x2 mosaic.
fn split_mosaic(frame: &RawFrame) -> [Plane<u16>; 4] {
    let (width, height) = frame.dimensions();
    let (out_w, out_h) = (width / 2, height / 2);

    let metapixels: Vec<[u16; 4]> = (0..out_h)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..out_w).map(move |x| {
                [
                    frame.sample(x * 2 + 1, y * 2 + 1),
                    frame.sample(x * 2, y * 2 + 1),
                    frame.sample(x * 2, y * 2),
                    frame.sample(x * 2 + 1, y * 2),
                ]
            })
        })
        .collect();

    let mut channels: [Vec<u16>; 4] = std::array::from_fn(|_| Vec::with_capacity(out_w * out_h));
    for mp in &metapixels {
        for (channel, &value) in channels.iter_mut().zip(mp.iter()) {
            channel.push(value);
        }
    }

    channels
        .map(|data| Plane::from_vec(out_w, out_h, data).expect("channel covers every mosaic cell"))
}
