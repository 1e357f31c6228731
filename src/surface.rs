//! Raster surface primitive — the engine's stand-in for the host 2D
//! rasterization API.
//!
//! A [`Surface`] is a capped RGBA buffer plus the native composite-operator
//! draw ([`Surface::draw_op`]).  The operator set is the classic 2D-canvas
//! subset; anything outside it goes through the compositor's exact
//! per-pixel path instead.  Operators with cheap integer forms run on
//! `u8` arithmetic; division-bearing operators share the float channel
//! formulas with [`crate::blend`] so the two paths agree within 1/255.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::blend::{self, CompositeOp};
use crate::error::EngineError;

/// Allocation sanity cap (~256 megapixels).  Anything larger is rejected as
/// resource exhaustion rather than attempted.
pub const MAX_SURFACE_PIXELS: u64 = 256_000_000;

pub struct Surface {
    pixels: RgbaImage,
}

impl Surface {
    /// Allocate a transparent surface.  Zero dimensions are invalid; sizes
    /// over [`MAX_SURFACE_PIXELS`] are rejected so callers can retry with a
    /// smaller tile size or resolution.
    pub fn new(width: u32, height: u32) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDimension(format!(
                "surface dimensions must be positive, got {}×{}",
                width, height
            )));
        }
        if (width as u64) * (height as u64) > MAX_SURFACE_PIXELS {
            return Err(EngineError::ResourceExhaustion { width, height });
        }
        Ok(Self {
            pixels: RgbaImage::new(width, height),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Fill every pixel with `color`.
    pub fn fill(&mut self, color: Rgba<u8>) {
        for px in self.pixels.pixels_mut() {
            *px = color;
        }
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    /// Composite `src` over the whole surface with a native operator.
    /// Buffer dimensions must match — a mismatch is a programming error.
    pub fn draw_op(&mut self, src: &RgbaImage, op: CompositeOp, opacity: f32) {
        assert_eq!(
            self.pixels.dimensions(),
            src.dimensions(),
            "draw_op source must match surface dimensions"
        );
        let opacity = opacity.clamp(0.0, 1.0);
        let op255 = (opacity * 255.0).round() as u16;
        if op255 == 0 {
            return;
        }

        let width = self.pixels.width() as usize;
        let src_raw = src.as_raw();
        self.pixels
            .par_chunks_mut(width * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let src_row = &src_raw[y * width * 4..(y + 1) * width * 4];
                for x in 0..width {
                    let o = x * 4;
                    let top = [src_row[o], src_row[o + 1], src_row[o + 2], src_row[o + 3]];
                    if top[3] == 0 {
                        continue;
                    }
                    let eff = mul255(top[3] as u16, op255);
                    if eff == 0 {
                        continue;
                    }
                    let base = [row[o], row[o + 1], row[o + 2], row[o + 3]];
                    let out = op_pixel(op, base, top, eff);
                    row[o..o + 4].copy_from_slice(&out);
                }
            });
    }

    /// Copy `src` into the surface at `(dst_x, dst_y)` with plain row
    /// copies (no blending).  Used to stitch rendered tiles into an export
    /// target; the tile partition guarantees no overlap.
    pub fn blit(&mut self, src: &RgbaImage, dst_x: u32, dst_y: u32) {
        let sw = src.width().min(self.width().saturating_sub(dst_x));
        let sh = src.height().min(self.height().saturating_sub(dst_y));
        if sw == 0 || sh == 0 {
            return;
        }
        let dst_stride = self.width() as usize * 4;
        let src_stride = src.width() as usize * 4;
        let dst_raw = self.pixels.as_mut();
        let src_raw = src.as_raw();
        for y in 0..sh as usize {
            let d = (dst_y as usize + y) * dst_stride + dst_x as usize * 4;
            let s = y * src_stride;
            let len = sw as usize * 4;
            dst_raw[d..d + len].copy_from_slice(&src_raw[s..s + len]);
        }
    }
}

/// `round(a·b / 255)` on byte-scaled values (half-down rounding).
#[inline(always)]
fn mul255(a: u16, b: u16) -> u8 {
    ((a * b + 127) / 255) as u8
}

/// Linear mix `base·(1−eff) + f·eff` on byte-scaled values.
#[inline(always)]
fn mix255(base: u8, f: u8, eff: u8) -> u8 {
    let e = eff as u32;
    ((base as u32 * (255 - e) + f as u32 * e + 127) / 255) as u8
}

/// One native-operator pixel: compute the operator's blended color, then
/// apply the standard opacity mix and additive alpha rule.
#[inline]
fn op_pixel(op: CompositeOp, base: [u8; 4], top: [u8; 4], eff: u8) -> [u8; 4] {
    let f = match op {
        CompositeOp::SourceOver => [top[0], top[1], top[2]],
        CompositeOp::Lighter => [
            base[0].saturating_add(top[0]),
            base[1].saturating_add(top[1]),
            base[2].saturating_add(top[2]),
        ],
        CompositeOp::Multiply => [
            mul255(base[0] as u16, top[0] as u16),
            mul255(base[1] as u16, top[1] as u16),
            mul255(base[2] as u16, top[2] as u16),
        ],
        CompositeOp::Screen => [
            screen_u8(base[0], top[0]),
            screen_u8(base[1], top[1]),
            screen_u8(base[2], top[2]),
        ],
        CompositeOp::Overlay => [
            overlay_u8(base[0], top[0]),
            overlay_u8(base[1], top[1]),
            overlay_u8(base[2], top[2]),
        ],
        CompositeOp::HardLight => [
            overlay_u8(top[0], base[0]),
            overlay_u8(top[1], base[1]),
            overlay_u8(top[2], base[2]),
        ],
        CompositeOp::Darken => [
            base[0].min(top[0]),
            base[1].min(top[1]),
            base[2].min(top[2]),
        ],
        CompositeOp::Lighten => [
            base[0].max(top[0]),
            base[1].max(top[1]),
            base[2].max(top[2]),
        ],
        CompositeOp::Difference => [
            base[0].abs_diff(top[0]),
            base[1].abs_diff(top[1]),
            base[2].abs_diff(top[2]),
        ],
        CompositeOp::Exclusion => [
            exclusion_u8(base[0], top[0]),
            exclusion_u8(base[1], top[1]),
            exclusion_u8(base[2], top[2]),
        ],
        // Division and HSL operators share the exact float formulas, and
        // mix in float so both paths round once.
        CompositeOp::ColorDodge
        | CompositeOp::ColorBurn
        | CompositeOp::SoftLight
        | CompositeOp::Hue
        | CompositeOp::Saturation
        | CompositeOp::Color
        | CompositeOp::Luminosity => {
            let b = [
                base[0] as f32 / 255.0,
                base[1] as f32 / 255.0,
                base[2] as f32 / 255.0,
            ];
            let t = [
                top[0] as f32 / 255.0,
                top[1] as f32 / 255.0,
                top[2] as f32 / 255.0,
            ];
            let f = blend::blend_rgb(op.blend_mode(), b, t);
            let e = eff as f32 / 255.0;
            let mut out = [0u8; 4];
            for c in 0..3 {
                let v = b[c] * (1.0 - e) + f[c] * e;
                out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
            }
            out[3] = base[3].saturating_add(eff);
            return out;
        }
    };
    [
        mix255(base[0], f[0], eff),
        mix255(base[1], f[1], eff),
        mix255(base[2], f[2], eff),
        base[3].saturating_add(eff),
    ]
}

#[inline(always)]
fn screen_u8(b: u8, t: u8) -> u8 {
    255 - mul255(255 - b as u16, 255 - t as u16)
}

#[inline(always)]
fn overlay_u8(b: u8, t: u8) -> u8 {
    if b < 128 {
        mul255(2 * b as u16, t as u16)
    } else {
        255 - mul255(2 * (255 - b as u16), 255 - t as u16)
    }
}

#[inline(always)]
fn exclusion_u8(b: u8, t: u8) -> u8 {
    let v = b as i32 + t as i32 - 2 * mul255(b as u16, t as u16) as i32;
    v.clamp(0, 255) as u8
}
