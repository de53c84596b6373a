//! Processing core for division-of-focal-plane (DoFP) polarization
//! cameras.
//!
//! A DoFP camera carries a micro-polarizer array in front of the
//! sensor, so each raw frame is a mosaic of intensities measured
//! through four linear polarizing filter orientations. This crate
//! turns those raw mosaic frames into displayable products in real
//! time: demosaiced angle channels ([`decode`]), Stokes-derived
//! degree- and angle-of-polarization maps and pseudo-color renderings
//! ([`polarimetry`]), display mode gating per camera class
//! ([`display`]), and the bounded, latest-frame-wins acquisition
//! pipeline that feeds frames from a live camera without blocking the
//! consumer or backing up hardware delivery ([`pipeline`]).
//!
//! The GUI, vendor driver binding, and presentation concerns live
//! outside this crate; the [`source::FrameSource`] trait is the
//! capture boundary and [`polarimetry::PolarimetricProduct`] is the
//! render boundary.

pub mod bayer;
pub mod config;
pub mod decode;
pub mod display;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod plane;
pub mod polarimetry;
pub mod source;

pub mod prelude {
    pub use crate::config::{PipelineConfig, Roi};
    pub use crate::decode::{ChannelSet, decode};
    pub use crate::display::{DisplayMode, available_modes, resolve};
    pub use crate::error::{
        CaptureError, ConnectError, DecodeError, PipelineError, ProcessError, SelectorError,
    };
    pub use crate::frame::{CameraType, PixelFormat, RawFrame};
    pub use crate::pipeline::{AcquisitionPipeline, State, process_frame};
    pub use crate::plane::{Plane, RgbPlane};
    pub use crate::polarimetry::{PolarimetricProduct, Render, RenderFormat, StokesMap};
    pub use crate::source::{FrameSource, SourceParameter};
}
