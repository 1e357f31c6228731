//! Compositor — walks a layer stack back-to-front and produces the final
//! pixel buffer.
//!
//! Each layer is classified against the closed blend-mode table: modes the
//! surface implements natively always take the fast operator path; CUSTOM
//! modes take the exact per-pixel formula path at [`RenderQuality::Accurate`]
//! and their fixed nearest-native approximation at [`RenderQuality::Fast`].
//! The branch happens inline per layer in a single pass — there is no
//! post-render patching step, so authored z-order is preserved by
//! construction.
//!
//! A [`RenderContext`] is caller-owned; independent contexts can run
//! concurrent export jobs.  The scratch buffer used to isolate CUSTOM
//! layers is reused across layers within a context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;

use crate::blend::{self, BlendMode};
use crate::error::EngineError;
use crate::layer::{Scene, SourceRect};
use crate::scaler::ScaleMapping;
use crate::surface::Surface;

/// Rendering fidelity for one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderQuality {
    /// Interactive draft: CUSTOM modes composite via their nearest native
    /// operator.  Never surfaces per-layer errors.
    Fast,
    /// Exact: CUSTOM modes run the per-pixel formula path.  Used for
    /// export and for the settle pass after an interaction ends.
    Accurate,
}

/// Cooperative cancellation flag, checked between tile iterations.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Caller-owned render state: dissolve seed and the reusable scratch
/// buffer for isolating CUSTOM layers.
pub struct RenderContext {
    dissolve_seed: u64,
    scratch: Option<RgbaImage>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            dissolve_seed: 0,
            scratch: None,
        }
    }

    /// Fix the dissolve pattern for reproducible output.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            dissolve_seed: seed,
            scratch: None,
        }
    }

    pub fn set_dissolve_seed(&mut self, seed: u64) {
        self.dissolve_seed = seed;
    }

    /// Composite the whole scene at working resolution.
    pub fn composite_frame(
        &mut self,
        scene: &Scene,
        mapping: &ScaleMapping,
        quality: RenderQuality,
    ) -> Result<RgbaImage, EngineError> {
        self.composite_region(
            scene,
            scene.full_rect(),
            mapping.working_w,
            mapping.working_h,
            (0, 0),
            quality,
        )
    }

    /// Composite the logical-space `region` of the scene into an
    /// `out_w`×`out_h` buffer.  `origin` is the buffer's offset in
    /// target-space pixels — it anchors the dissolve pattern so that tiled
    /// and untiled renders of the same target agree.
    ///
    /// Per-layer render failures substitute transparency and the pass
    /// continues; only allocation failures reject the call.
    pub fn composite_region(
        &mut self,
        scene: &Scene,
        region: SourceRect,
        out_w: u32,
        out_h: u32,
        origin: (u32, u32),
        quality: RenderQuality,
    ) -> Result<RgbaImage, EngineError> {
        let mut surface = Surface::new(out_w, out_h)?;
        if let Some(bg) = scene.background {
            surface.fill(bg);
        }

        let mut scratch = self.take_scratch(out_w, out_h);

        for layer in scene.layers() {
            if !layer.visible || layer.opacity <= 0.0 {
                continue;
            }

            clear(&mut scratch);
            layer.render_region(region, &mut scratch);

            match (quality, layer.blend_mode.native_op()) {
                // NATIVE modes use the fast operator at every quality
                (_, Some(op)) => surface.draw_op(&scratch, op, layer.opacity),
                (RenderQuality::Fast, None) => {
                    surface.draw_op(&scratch, layer.blend_mode.fallback_op(), layer.opacity)
                }
                (RenderQuality::Accurate, None) => blend_exact(
                    surface.image_mut(),
                    &scratch,
                    layer.blend_mode,
                    layer.opacity,
                    origin,
                    self.dissolve_seed,
                ),
            }
        }

        self.scratch = Some(scratch);
        Ok(surface.into_image())
    }

    fn take_scratch(&mut self, w: u32, h: u32) -> RgbaImage {
        match self.scratch.take() {
            Some(buf) if buf.dimensions() == (w, h) => buf,
            _ => RgbaImage::new(w, h),
        }
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

fn clear(buf: &mut RgbaImage) {
    buf.as_mut().fill(0);
}

/// Exact per-pixel blend of an isolated layer buffer onto the accumulator.
/// Mismatched dimensions are a fatal programming error, not a recoverable
/// condition.
fn blend_exact(
    acc: &mut RgbaImage,
    top: &RgbaImage,
    mode: BlendMode,
    opacity: f32,
    origin: (u32, u32),
    seed: u64,
) {
    assert_eq!(
        acc.dimensions(),
        top.dimensions(),
        "scratch/accumulator dimension mismatch"
    );
    let width = acc.width() as usize;
    let top_raw = top.as_raw();
    acc.par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let ty = origin.1 + y as u32;
            let top_row = &top_raw[y * width * 4..(y + 1) * width * 4];
            for x in 0..width {
                let o = x * 4;
                let t = image::Rgba([
                    top_row[o],
                    top_row[o + 1],
                    top_row[o + 2],
                    top_row[o + 3],
                ]);
                if t[3] == 0 {
                    continue;
                }
                let b = image::Rgba([row[o], row[o + 1], row[o + 2], row[o + 3]]);
                let out = blend::blend_pixel(b, t, mode, opacity, origin.0 + x as u32, ty, seed);
                row[o..o + 4].copy_from_slice(&out.0);
            }
        });
}

// ============================================================================
// INTERACTION GATE
// ============================================================================

/// Explicit drag/refresh state machine.
///
/// While an interactive transform is in progress, renders run at
/// [`RenderQuality::Fast`] and are rate-limited to one per
/// `refresh_interval` ticks.  Releasing the interaction queues exactly one
/// accurate settle pass.  No wall-clock time is involved, so the policy is
/// fully testable.
#[derive(Debug)]
pub struct InteractionGate {
    dragging: bool,
    refresh_interval: u32,
    ticks_since_refresh: u32,
    accurate_pending: bool,
}

impl InteractionGate {
    pub fn new(refresh_interval: u32) -> Self {
        Self {
            dragging: false,
            refresh_interval: refresh_interval.max(1),
            ticks_since_refresh: 0,
            accurate_pending: false,
        }
    }

    pub fn begin_interaction(&mut self) {
        self.dragging = true;
        self.ticks_since_refresh = 0;
    }

    pub fn end_interaction(&mut self) {
        if self.dragging {
            self.dragging = false;
            self.accurate_pending = true;
        }
    }

    pub fn is_interacting(&self) -> bool {
        self.dragging
    }

    /// Quality for the next render.
    pub fn quality(&self) -> RenderQuality {
        if self.dragging {
            RenderQuality::Fast
        } else {
            RenderQuality::Accurate
        }
    }

    /// Advance one update tick.  Returns true when a draft re-render is
    /// due; outside an interaction every tick may render.
    pub fn tick(&mut self) -> bool {
        if !self.dragging {
            return true;
        }
        self.ticks_since_refresh += 1;
        if self.ticks_since_refresh >= self.refresh_interval {
            self.ticks_since_refresh = 0;
            true
        } else {
            false
        }
    }

    /// Consume the one queued accurate pass, if any.
    pub fn take_accurate_request(&mut self) -> bool {
        std::mem::take(&mut self.accurate_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;
    use crate::scaler::compute_working_dimensions;
    use image::Rgba;

    fn solid(w: u32, h: u32, c: [u8; 4]) -> RgbaImage {
        let mut img = RgbaImage::new(w, h);
        for px in img.pixels_mut() {
            *px = Rgba(c);
        }
        img
    }

    #[test]
    fn opaque_normal_layer_reproduces_its_pixels() {
        let mut scene = Scene::new(16, 16).unwrap();
        scene.background = Some(Rgba([40, 90, 200, 255]));
        let mut img = RgbaImage::new(16, 16);
        for (i, px) in img.pixels_mut().enumerate() {
            *px = Rgba([(i % 251) as u8, (i * 7 % 255) as u8, 9, 255]);
        }
        scene.push_layer(Layer::new_bitmap("top".into(), img.clone()));

        let mapping = compute_working_dimensions(16, 16, 2500).unwrap();
        let mut ctx = RenderContext::new();
        let out = ctx
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn custom_mode_matches_per_pixel_formula() {
        let mut scene = Scene::new(8, 8).unwrap();
        scene.push_layer(Layer::new_fill("base".into(), Rgba([180, 90, 30, 255])));
        let mut top = Layer::new_fill("top".into(), Rgba([70, 200, 120, 255]));
        top.blend_mode = BlendMode::LinearBurn;
        top.opacity = 0.7;
        scene.push_layer(top);

        let mapping = compute_working_dimensions(8, 8, 2500).unwrap();
        let mut ctx = RenderContext::new();
        let out = ctx
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();
        let expected = blend::blend_pixel(
            Rgba([180, 90, 30, 255]),
            Rgba([70, 200, 120, 255]),
            BlendMode::LinearBurn,
            0.7,
            0,
            0,
            0,
        );
        assert_eq!(out.get_pixel(3, 5), &expected);
    }

    #[test]
    fn fast_quality_substitutes_fallback_operator() {
        let mut scene = Scene::new(4, 4).unwrap();
        scene.push_layer(Layer::new_fill("base".into(), Rgba([200, 200, 200, 255])));
        let mut top = Layer::new_fill("top".into(), Rgba([100, 100, 100, 255]));
        top.blend_mode = BlendMode::LinearBurn; // fallback: Multiply
        scene.push_layer(top);

        let mapping = compute_working_dimensions(4, 4, 2500).unwrap();
        let mut ctx = RenderContext::new();
        let fast = ctx
            .composite_frame(&scene, &mapping, RenderQuality::Fast)
            .unwrap();
        let accurate = ctx
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();

        // multiply: 200·100/255 ≈ 78; linear burn: 200+100−255 = 45
        assert_eq!(fast.get_pixel(0, 0)[0], 78);
        assert_eq!(accurate.get_pixel(0, 0)[0], 45);
    }

    #[test]
    fn invisible_and_zero_opacity_layers_are_skipped() {
        let mut scene = Scene::new(4, 4).unwrap();
        scene.background = Some(Rgba([7, 7, 7, 255]));
        let mut hidden = Layer::new_fill("hidden".into(), Rgba([255, 0, 0, 255]));
        hidden.visible = false;
        scene.push_layer(hidden);
        let mut ghost = Layer::new_fill("ghost".into(), Rgba([0, 255, 0, 255]));
        ghost.opacity = 0.0;
        scene.push_layer(ghost);

        let mapping = compute_working_dimensions(4, 4, 2500).unwrap();
        let out = RenderContext::new()
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgba([7, 7, 7, 255]));
    }

    #[test]
    fn z_order_is_preserved() {
        let mut scene = Scene::new(2, 2).unwrap();
        scene.push_layer(Layer::new_fill("red".into(), Rgba([255, 0, 0, 255])));
        scene.push_layer(Layer::new_fill("blue".into(), Rgba([0, 0, 255, 255])));
        let mapping = compute_working_dimensions(2, 2, 2500).unwrap();
        let out = RenderContext::new()
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn dissolve_is_reproducible_for_a_seed() {
        let mut scene = Scene::new(32, 32).unwrap();
        scene.push_layer(Layer::new_fill("base".into(), Rgba([0, 0, 0, 255])));
        let mut top = Layer::new_fill("noise".into(), Rgba([255, 255, 255, 255]));
        top.blend_mode = BlendMode::Dissolve;
        top.opacity = 0.5;
        scene.push_layer(top);

        let mapping = compute_working_dimensions(32, 32, 2500).unwrap();
        let a = RenderContext::with_seed(99)
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();
        let b = RenderContext::with_seed(99)
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();
        let c = RenderContext::with_seed(100)
            .composite_frame(&scene, &mapping, RenderQuality::Accurate)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    #[should_panic(expected = "dimension mismatch")]
    fn mismatched_blend_buffers_panic() {
        let mut acc = solid(4, 4, [0, 0, 0, 255]);
        let top = solid(4, 5, [255, 255, 255, 255]);
        blend_exact(&mut acc, &top, BlendMode::Subtract, 1.0, (0, 0), 0);
    }

    #[test]
    fn gate_rate_limits_and_queues_one_settle_pass() {
        let mut gate = InteractionGate::new(3);
        assert_eq!(gate.quality(), RenderQuality::Accurate);
        assert!(gate.tick());

        gate.begin_interaction();
        assert_eq!(gate.quality(), RenderQuality::Fast);
        assert!(!gate.tick());
        assert!(!gate.tick());
        assert!(gate.tick()); // every 3rd tick refreshes
        assert!(!gate.tick());
        assert!(!gate.take_accurate_request());

        gate.end_interaction();
        assert_eq!(gate.quality(), RenderQuality::Accurate);
        assert!(gate.take_accurate_request());
        assert!(!gate.take_accurate_request()); // exactly one
        gate.end_interaction(); // no-op outside a drag
        assert!(!gate.take_accurate_request());
    }

    #[test]
    fn cancel_token_flags_across_clones() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!shared.is_cancelled());
        token.cancel();
        assert!(shared.is_cancelled());
    }
}
