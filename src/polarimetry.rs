//! Polarimetric quantities and display renderings derived from decoded
//! channel sets.
//!
//! Stokes parameters follow the four-angle intensity equations:
//!
//! ```text
//! S_0 = I_0 + I_90
//! S_1 = I_0 - I_90
//! S_2 = I_45 - I_135
//! ```
//!
//! Intensities keep their source bit depth until the 8-bit conversion
//! at the render boundary; DoP and AoP maps are emitted as normalized
//! floating point.

use crate::{
    bayer,
    config::{PipelineConfig, Roi},
    decode::ChannelSet,
    display::DisplayMode,
    error::{DecodeError, SelectorError},
    frame::{CameraType, RawFrame},
    plane::{Plane, RgbPlane},
};
use rayon::prelude::*;
use std::time::Duration;

/// Per-pixel linear Stokes vectors computed from a channel set.
#[derive(Clone, Debug, PartialEq)]
pub struct StokesMap {
    dims: (usize, usize),
    pixels: Vec<[f32; 3]>,
}

impl StokesMap {
    pub fn from_channels(set: &ChannelSet) -> Self {
        let [i0, i45, i90, i135] = set.intensities();
        let (i0, i45, i90, i135) = (
            i0.as_slice(),
            i45.as_slice(),
            i90.as_slice(),
            i135.as_slice(),
        );

        let pixels: Vec<[f32; 3]> = (0..i0.len())
            .into_par_iter()
            .map(|i| {
                let (a, b, c, d) = (
                    i0[i] as f32,
                    i45[i] as f32,
                    i90[i] as f32,
                    i135[i] as f32,
                );
                [a + c, a - c, b - d]
            })
            .collect();

        Self {
            dims: set.dimensions(),
            pixels,
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.dims
    }

    /// DoP of one Stokes vector, clamped to [0, 1].
    ///
    /// Unilluminated pixels (S_0 == 0) have no defined polarization
    /// ratio; they report 0 by policy rather than NaN.
    fn sv_to_dop(sv: &[f32; 3]) -> f32 {
        if sv[0] == 0.0 {
            return 0.0;
        }
        ((sv[1].powi(2) + sv[2].powi(2)).sqrt() / sv[0]).clamp(0.0, 1.0)
    }

    /// AoP of one Stokes vector in degrees on (0, 180]; vertical
    /// polarization reads exactly 180.
    fn sv_to_aop_deg(sv: &[f32; 3]) -> f32 {
        (sv[2].atan2(sv[1]) / 2.0).to_degrees() + 90.0
    }

    /// Degree-of-polarization map, every pixel in [0, 1].
    pub fn dop_map(&self) -> Plane<f32> {
        let data: Vec<f32> = self.pixels.par_iter().map(StokesMap::sv_to_dop).collect();
        Plane::from_vec(self.dims.0, self.dims.1, data)
            .expect("one DoP sample per Stokes vector")
    }

    /// Angle-of-polarization map in degrees on (0, 180].
    pub fn aop_map(&self) -> Plane<f32> {
        let data: Vec<f32> = self
            .pixels
            .par_iter()
            .map(StokesMap::sv_to_aop_deg)
            .collect();
        Plane::from_vec(self.dims.0, self.dims.1, data)
            .expect("one AoP sample per Stokes vector")
    }
}

/// Pixel layout of a renderable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderFormat {
    Gray,
    Rgb,
}

impl RenderFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            RenderFormat::Gray => 1,
            RenderFormat::Rgb => 3,
        }
    }
}

/// An 8-bit-per-channel image ready for the renderer.
///
/// This is the only place intensities leave their source bit depth.
#[derive(Clone, Debug, PartialEq)]
pub struct Render {
    width: usize,
    height: usize,
    format: RenderFormat,
    pixels: Vec<u8>,
}

impl Render {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> RenderFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_slice()
    }

    /// Crop to `roi`, clamped to the image extent. A region entirely
    /// outside the image leaves the render unchanged.
    fn apply_roi(self, roi: Option<Roi>) -> Render {
        let Some(roi) = roi.and_then(|r| r.clamped(self.width, self.height)) else {
            return self;
        };

        let bpp = self.format.bytes_per_pixel();
        let stride = self.width * bpp;
        let mut pixels = Vec::with_capacity(roi.width * roi.height * bpp);
        for y in roi.y..roi.y + roi.height {
            let start = y * stride + roi.x * bpp;
            pixels.extend_from_slice(&self.pixels[start..start + roi.width * bpp]);
        }

        Render {
            width: roi.width,
            height: roi.height,
            format: self.format,
            pixels,
        }
    }
}

/// A processed frame handed to the renderer, tagged with the display
/// mode that produced it and the source frame's sequence id.
#[derive(Clone, Debug, PartialEq)]
pub struct PolarimetricProduct {
    mode: DisplayMode,
    seq: u64,
    render: Render,
    dop: Option<Plane<f32>>,
    aop: Option<Plane<f32>>,
    elapsed: Duration,
}

impl PolarimetricProduct {
    fn new(mode: DisplayMode, seq: u64, render: Render) -> Self {
        Self {
            mode,
            seq,
            render,
            dop: None,
            aop: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn render(&self) -> &Render {
        &self.render
    }

    /// DoP map in [0, 1]; present for `Polarization` products.
    pub fn dop(&self) -> Option<&Plane<f32>> {
        self.dop.as_ref()
    }

    /// AoP map in degrees on (0, 180]; present for `Polarization`
    /// products.
    pub fn aop(&self) -> Option<&Plane<f32>> {
        self.aop.as_ref()
    }

    /// Decode and compute time spent on this frame.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }
}

/// Convert an intensity to an 8-bit level, applying the digital gain.
fn to_level(value: f32, max: f32, gain: f32) -> u8 {
    (value * gain / max * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Jet-style colormap over [0, 1], dark blue through dark red.
fn jet(x: f32) -> [u8; 3] {
    let x = x.clamp(0.0, 1.0);
    let channel = |center: f32| ((1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0) * 255.0) as u8;
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Map an AoP in degrees on (0, 180] to a fully saturated HSV hue.
fn aop_hue(deg: f32) -> [u8; 3] {
    let h = (deg.clamp(0.0, 180.0) * 2.0) % 360.0;
    let x = 1.0 - ((h / 60.0) % 2.0 - 1.0).abs();
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// Render the raw mosaic unchanged, scaled for display.
pub fn raw_product(frame: &RawFrame, config: &PipelineConfig) -> PolarimetricProduct {
    let max = frame.format().max_value() as f32;
    let gain = config.gain_scale();
    let pixels: Vec<u8> = frame
        .samples()
        .par_iter()
        .map(|&v| to_level(v as f32, max, gain))
        .collect();

    let render = Render {
        width: frame.width(),
        height: frame.height(),
        format: RenderFormat::Gray,
        pixels,
    }
    .apply_roi(config.roi);

    PolarimetricProduct::new(DisplayMode::Raw, frame.seq(), render)
}

/// Grayscale rendering: the plain average of the four angle channels.
pub fn grayscale_product(set: &ChannelSet, config: &PipelineConfig) -> PolarimetricProduct {
    let planes = set.intensities();
    let max = set.max_value() as f32;
    let gain = config.gain_scale();

    let pixels: Vec<u8> = (0..planes[0].as_slice().len())
        .into_par_iter()
        .map(|i| {
            let sum: f32 = planes.iter().map(|p| p.as_slice()[i] as f32).sum();
            to_level(sum / 4.0, max, gain)
        })
        .collect();

    let (width, height) = set.dimensions();
    let render = Render {
        width,
        height,
        format: RenderFormat::Gray,
        pixels,
    }
    .apply_roi(config.roi);

    PolarimetricProduct::new(DisplayMode::Grayscale, set.seq(), render)
}

/// Color rendering: the per-pixel average of the four debayered angle
/// images with white balance gains applied.
///
/// Fails when the set has no color planes, which only happens for mono
/// DoFP frames; the selector keeps that pairing out of the pipeline.
pub fn color_product(
    set: &ChannelSet,
    config: &PipelineConfig,
) -> Result<PolarimetricProduct, SelectorError> {
    let color = set.color().ok_or(SelectorError::Unavailable {
        mode: DisplayMode::Color,
        camera: CameraType::PolarizationMono,
    })?;

    let max = set.max_value() as f32;
    let gain = config.gain_scale();
    let wb = config.clamped_white_balance();

    let pixels: Vec<u8> = (0..color[0].as_slice().len())
        .into_par_iter()
        .flat_map_iter(|i| {
            (0..3).map(move |c| {
                let sum: f32 = color.iter().map(|p| p.as_slice()[i][c] as f32).sum();
                to_level(sum / 4.0 * wb[c], max, gain)
            })
        })
        .collect();

    let (width, height) = set.dimensions();
    let render = Render {
        width,
        height,
        format: RenderFormat::Rgb,
        pixels,
    }
    .apply_roi(config.roi);

    Ok(PolarimetricProduct::new(
        DisplayMode::Color,
        set.seq(),
        render,
    ))
}

/// Polarization rendering: DoP pseudo-color plus the DoP and AoP maps.
pub fn polarization_product(set: &ChannelSet, config: &PipelineConfig) -> PolarimetricProduct {
    let stokes = StokesMap::from_channels(set);
    let dop = stokes.dop_map();
    let aop = stokes.aop_map();

    let pixels: Vec<u8> = dop
        .as_slice()
        .par_iter()
        .flat_map_iter(|&d| jet(d))
        .collect();

    let (width, height) = set.dimensions();
    let render = Render {
        width,
        height,
        format: RenderFormat::Rgb,
        pixels,
    }
    .apply_roi(config.roi);

    let mut product = PolarimetricProduct::new(DisplayMode::Polarization, set.seq(), render);
    product.dop = Some(dop);
    product.aop = Some(aop);
    product
}

/// AoP hue rendering for callers that present the angle map directly.
pub fn aop_render(aop: &Plane<f32>) -> Render {
    let pixels: Vec<u8> = aop
        .as_slice()
        .par_iter()
        .flat_map_iter(|&deg| aop_hue(deg))
        .collect();

    Render {
        width: aop.width(),
        height: aop.height(),
        format: RenderFormat::Rgb,
        pixels,
    }
}

/// Color and grayscale pass-through for ordinary Bayer cameras: full
/// frame demosaic, no polarization stage.
///
/// `Raw` is served by [`raw_product`]; `Polarization` requests never
/// reach this path (the selector rejects them) and report the frame
/// format as unsupported if called directly.
pub fn passthrough_product(
    frame: &RawFrame,
    mode: DisplayMode,
    config: &PipelineConfig,
) -> Result<PolarimetricProduct, DecodeError> {
    let format = frame.format();
    if !format.is_bayer() {
        return Err(DecodeError::UnsupportedFormat { format });
    }

    let plane = Plane::from_vec(frame.width(), frame.height(), frame.samples().to_vec())
        .expect("frame buffer matches its dimensions");
    let rgb = bayer::demosaic_rggb(&plane);
    let max = format.max_value() as f32;
    let gain = config.gain_scale();

    let render = match mode {
        DisplayMode::Color => {
            let wb = config.clamped_white_balance();
            let pixels: Vec<u8> = rgb
                .as_slice()
                .par_iter()
                .flat_map_iter(|px| {
                    (0..3).map(move |c| to_level(px[c] as f32 * wb[c], max, gain))
                })
                .collect();
            Render {
                width: frame.width(),
                height: frame.height(),
                format: RenderFormat::Rgb,
                pixels,
            }
        }
        DisplayMode::Grayscale => {
            let gray = bayer::luma(&rgb);
            let pixels: Vec<u8> = gray
                .as_slice()
                .par_iter()
                .map(|&v| to_level(v as f32, max, gain))
                .collect();
            Render {
                width: frame.width(),
                height: frame.height(),
                format: RenderFormat::Gray,
                pixels,
            }
        }
        DisplayMode::Raw | DisplayMode::Polarization => {
            return Err(DecodeError::UnsupportedFormat { format });
        }
    };

    Ok(PolarimetricProduct::new(
        mode,
        frame.seq(),
        render.apply_roi(config.roi),
    ))
}

/// Gray-world white balance gains estimated from a debayered image,
/// with green as the reference channel. Gains are clamped to the
/// device range; a black image yields neutral gains.
pub fn auto_white_balance(rgb: &RgbPlane) -> [f32; 3] {
    let n = rgb.as_slice().len().max(1) as f64;
    let mut sums = [0f64; 3];
    for px in rgb.as_slice() {
        for (sum, &v) in sums.iter_mut().zip(px.iter()) {
            *sum += v as f64;
        }
    }

    let [r, g, b] = sums.map(|s| s / n);
    if g == 0.0 {
        return [1.0, 1.0, 1.0];
    }

    let gain = |channel: f64| {
        if channel > 0.0 {
            (g / channel) as f32
        } else {
            1.0
        }
    };
    [gain(r), 1.0, gain(b)].map(|v| v.clamp(crate::config::WB_GAIN_RANGE.0, crate::config::WB_GAIN_RANGE.1))
}
