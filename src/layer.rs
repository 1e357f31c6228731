//! Render-input scene snapshot — the ordered layer stack the compositor
//! consumes.
//!
//! The authoring object model (shapes, text, stickers and their catalogs)
//! lives outside the engine; what arrives here is the flattened render
//! form: per layer an id, visibility, opacity, blend mode and a drawable
//! content that can render any logical-space region into a pixel buffer.
//! Callers must treat an in-flight render or export as holding a read lock
//! on the scene — the compositor takes one consistent snapshot per pass.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use uuid::Uuid;

use crate::blend::BlendMode;
use crate::error::EngineError;

/// Asset-load bound: a layer whose backing asset is not ready within this
/// window renders transparent for the pass instead of hanging it.
pub const DEFAULT_ASSET_TIMEOUT: Duration = Duration::from_secs(15);

/// An axis-aligned rectangle in logical canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl SourceRect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

/// A decode still running on a worker thread.  Until resolved the layer
/// contributes nothing to a pass.
pub struct PendingAsset {
    pub(crate) rx: Receiver<Result<RgbaImage, String>>,
    pub(crate) placement: Option<SourceRect>,
    pub(crate) requested: Instant,
}

pub enum LayerContent {
    /// Solid color covering any sampled region.
    Fill(Rgba<u8>),
    /// Bitmap placed at a rect in logical coordinates.
    Bitmap {
        image: Arc<RgbaImage>,
        placement: SourceRect,
    },
    /// Asset still decoding; transparent until [`Scene::resolve_assets`]
    /// swaps it for a bitmap.
    Deferred(PendingAsset),
}

pub struct Layer {
    pub id: Uuid,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub content: LayerContent,
}

impl Layer {
    pub fn new(name: String, content: LayerContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            content,
        }
    }

    pub fn new_fill(name: String, color: Rgba<u8>) -> Self {
        Self::new(name, LayerContent::Fill(color))
    }

    /// Bitmap layer placed at its natural size at the origin.
    pub fn new_bitmap(name: String, image: RgbaImage) -> Self {
        let placement = SourceRect::new(0.0, 0.0, image.width() as f32, image.height() as f32);
        Self::new_bitmap_at(name, image, placement)
    }

    pub fn new_bitmap_at(name: String, image: RgbaImage, placement: SourceRect) -> Self {
        Self::new(
            name,
            LayerContent::Bitmap {
                image: Arc::new(image),
                placement,
            },
        )
    }

    /// Render the logical-space `region` of this layer into `out` at
    /// Normal/full-opacity — the layer's own mode and opacity are applied
    /// by the compositor.  Sampling outside the content is transparent,
    /// never an error.
    pub fn render_region(&self, region: SourceRect, out: &mut RgbaImage) {
        match &self.content {
            LayerContent::Fill(color) => {
                for px in out.pixels_mut() {
                    *px = *color;
                }
            }
            LayerContent::Bitmap { image, placement } => {
                sample_bitmap_region(image, *placement, region, out);
            }
            // Not resolved yet — contributes nothing this pass.
            LayerContent::Deferred(_) => {}
        }
    }
}

/// Map each output pixel to a logical point in `region`, then bilinearly
/// sample the bitmap through its placement rect.  Pixels that land outside
/// the placement stay transparent.
fn sample_bitmap_region(
    image: &RgbaImage,
    placement: SourceRect,
    region: SourceRect,
    out: &mut RgbaImage,
) {
    if placement.w <= 0.0 || placement.h <= 0.0 {
        return;
    }
    let out_w = out.width() as usize;
    let step_x = region.w / out_w as f32;
    let step_y = region.h / out.height() as f32;
    let img_w = image.width() as f32;
    let img_h = image.height() as f32;

    out.par_chunks_mut(out_w * 4)
        .enumerate()
        .for_each(|(py, row)| {
            let ly = region.y + (py as f32 + 0.5) * step_y;
            // placement-space v, then bitmap pixel space
            let v = (ly - placement.y) / placement.h * img_h - 0.5;
            if v <= -1.0 || v >= img_h {
                return;
            }
            for px in 0..out_w {
                let lx = region.x + (px as f32 + 0.5) * step_x;
                let u = (lx - placement.x) / placement.w * img_w - 0.5;
                if u <= -1.0 || u >= img_w {
                    continue;
                }
                let sampled = bilinear_sample(image, u, v);
                let o = px * 4;
                row[o..o + 4].copy_from_slice(&sampled.0);
            }
        });
}

/// Bilinear fetch with transparent borders.
fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let w = img.width() as i32;
    let h = img.height() as i32;
    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= w || sy >= h {
            [0.0; 4]
        } else {
            let p = img.get_pixel(sx as u32, sy as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
        }
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = tl[c] + (tr[c] - tl[c]) * fx;
        let bot = bl[c] + (br[c] - bl[c]) * fx;
        out[c] = (top + (bot - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

// ============================================================================
// SCENE
// ============================================================================

/// The ordered stack (index 0 = bottom-most) plus the logical canvas size.
pub struct Scene {
    pub logical_w: u32,
    pub logical_h: u32,
    /// Optional opaque backdrop under the stack.
    pub background: Option<Rgba<u8>>,
    layers: Vec<Layer>,
}

impl Scene {
    pub fn new(logical_w: u32, logical_h: u32) -> Result<Self, EngineError> {
        if logical_w == 0 || logical_h == 0 {
            return Err(EngineError::InvalidDimension(format!(
                "scene dimensions must be positive, got {}×{}",
                logical_w, logical_h
            )));
        }
        Ok(Self {
            logical_w,
            logical_h,
            background: None,
            layers: Vec::new(),
        })
    }

    /// Append a layer on top of the stack; returns its id.
    pub fn push_layer(&mut self, layer: Layer) -> Uuid {
        let id = layer.id;
        self.layers.push(layer);
        id
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_mut(&mut self, id: Uuid) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn remove_layer(&mut self, id: Uuid) -> Option<Layer> {
        let idx = self.layers.iter().position(|l| l.id == id)?;
        Some(self.layers.remove(idx))
    }

    pub fn set_blend_mode(&mut self, id: Uuid, mode: BlendMode) -> Result<(), EngineError> {
        let layer = self
            .layer_mut(id)
            .ok_or_else(|| EngineError::InvalidFormat(format!("no layer with id {}", id)))?;
        layer.blend_mode = mode;
        Ok(())
    }

    pub fn set_opacity(&mut self, id: Uuid, opacity: f32) -> Result<(), EngineError> {
        let layer = self
            .layer_mut(id)
            .ok_or_else(|| EngineError::InvalidFormat(format!("no layer with id {}", id)))?;
        layer.opacity = opacity.clamp(0.0, 1.0);
        Ok(())
    }

    /// The whole logical canvas as a sampling rect.
    pub fn full_rect(&self) -> SourceRect {
        SourceRect::new(0.0, 0.0, self.logical_w as f32, self.logical_h as f32)
    }

    /// Wait (bounded) for deferred assets and swap them in.  A load that
    /// fails or exceeds `timeout` leaves its layer transparent; the
    /// failures are returned for reporting but never abort a pass.
    pub fn resolve_assets(&mut self, timeout: Duration) -> Vec<EngineError> {
        let mut failures = Vec::new();
        for layer in &mut self.layers {
            let LayerContent::Deferred(pending) = &layer.content else {
                continue;
            };
            match pending.rx.recv_timeout(timeout) {
                Ok(Ok(image)) => {
                    let placement = pending.placement.unwrap_or_else(|| {
                        SourceRect::new(0.0, 0.0, image.width() as f32, image.height() as f32)
                    });
                    layer.content = LayerContent::Bitmap {
                        image: Arc::new(image),
                        placement,
                    };
                }
                Ok(Err(e)) => {
                    log_warn!("layer '{}' failed to load: {}", layer.name, e);
                    failures.push(EngineError::InvalidFormat(e));
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    let waited_ms = pending.requested.elapsed().as_millis() as u64;
                    log_warn!(
                        "layer '{}' not ready after {}ms, rendering transparent",
                        layer.name,
                        waited_ms
                    );
                    failures.push(EngineError::LoadTimeout {
                        name: layer.name.clone(),
                        waited_ms,
                    });
                }
            }
        }
        failures
    }
}
