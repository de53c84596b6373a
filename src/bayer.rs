//! Bilinear Bayer interpolation for RGGB color filter arrays.
//!
//! The kernel is plain bilinear: missing color samples are the average
//! of the nearest neighbors of that color, with mirrored borders.
//! Intermediates are f32 and are rounded back to the source bit depth,
//! so the interpolation is deterministic for a given input.

use crate::plane::{Plane, RgbPlane};
use rayon::prelude::*;

/// Reflect an index into `[0, len)` at the image border.
fn mirror(i: isize, len: usize) -> usize {
    let last = (len - 1) as isize;
    let i = if i < 0 { -i } else { i };
    let i = if i > last { 2 * last - i } else { i };
    i.clamp(0, last) as usize
}

fn sample(plane: &Plane<u16>, x: isize, y: isize) -> f32 {
    let x = mirror(x, plane.width());
    let y = mirror(y, plane.height());
    *plane
        .get(x, y)
        .expect("mirrored coordinates are within bounds") as f32
}

/// Demosaic an RGGB mosaic into an interleaved RGB plane.
///
/// The CFA phase is fixed: `(0, 0)` is red, `(1, 1)` is blue, the other
/// two sites are green.
pub fn demosaic_rggb(plane: &Plane<u16>) -> RgbPlane {
    let (width, height) = plane.dimensions();

    let data: Vec<[u16; 3]> = (0..height)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..width).map(move |x| {
                let (xi, yi) = (x as isize, y as isize);
                let v = sample(plane, xi, yi);

                let cross = (sample(plane, xi - 1, yi)
                    + sample(plane, xi + 1, yi)
                    + sample(plane, xi, yi - 1)
                    + sample(plane, xi, yi + 1))
                    / 4.0;
                let diag = (sample(plane, xi - 1, yi - 1)
                    + sample(plane, xi + 1, yi - 1)
                    + sample(plane, xi - 1, yi + 1)
                    + sample(plane, xi + 1, yi + 1))
                    / 4.0;
                let horiz = (sample(plane, xi - 1, yi) + sample(plane, xi + 1, yi)) / 2.0;
                let vert = (sample(plane, xi, yi - 1) + sample(plane, xi, yi + 1)) / 2.0;

                let [r, g, b] = match (y & 1, x & 1) {
                    // Red site.
                    (0, 0) => [v, cross, diag],
                    // Green site in a red row.
                    (0, 1) => [horiz, v, vert],
                    // Green site in a blue row.
                    (1, 0) => [vert, v, horiz],
                    // Blue site.
                    _ => [diag, cross, v],
                };

                [r.round() as u16, g.round() as u16, b.round() as u16]
            })
        })
        .collect();

    Plane::from_vec(width, height, data).expect("demosaic output covers every input pixel")
}

/// Rec.601 luma of an RGB plane, rounded to the nearest integer level.
pub fn luma(rgb: &RgbPlane) -> Plane<u16> {
    rgb.map(|&[r, g, b]| {
        (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u16
    })
}
