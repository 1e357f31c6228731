//! Tiled exporter — renders targets far larger than the safe working
//! surface by partitioning them into tiles, rendering each tile's logical
//! region independently, and stitching the results into one output buffer.
//!
//! The tile set exactly partitions the target raster: no gaps, no
//! overlapping writes at seams.  Tiles are independent and order-agnostic;
//! only the layer order inside each tile render matters.  A cancel token,
//! when provided, is honored between tile iterations.

use image::RgbaImage;

use crate::compositor::{CancelToken, RenderContext, RenderQuality};
use crate::error::EngineError;
use crate::io::{self, SaveFormat};
use crate::layer::{Scene, SourceRect};
use crate::surface::Surface;

/// Default maximum tile edge, comfortably under typical surface limits.
pub const DEFAULT_TILE_SIZE: u32 = 2048;

/// One export tile: an integer rect in the target raster plus the logical
/// region it samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tile {
    pub target_x: u32,
    pub target_y: u32,
    pub width: u32,
    pub height: u32,
    pub source: SourceRect,
}

/// Partition a `target_w`×`target_h` raster into tiles of at most
/// `tile_size` per edge; edge tiles shrink to cover the remainder exactly.
/// Each tile's source rect is its target rect divided by the target/logical
/// ratio.
pub fn tile_grid(
    target_w: u32,
    target_h: u32,
    tile_size: u32,
    logical_w: u32,
    logical_h: u32,
) -> Vec<Tile> {
    let tile_size = tile_size.max(1);
    // logical units per target pixel
    let sx = logical_w as f32 / target_w as f32;
    let sy = logical_h as f32 / target_h as f32;

    let cols = (target_w + tile_size - 1) / tile_size;
    let rows = (target_h + tile_size - 1) / tile_size;
    let mut tiles = Vec::with_capacity((cols * rows) as usize);

    for ty in 0..rows {
        let y = ty * tile_size;
        let h = tile_size.min(target_h - y);
        for tx in 0..cols {
            let x = tx * tile_size;
            let w = tile_size.min(target_w - x);
            tiles.push(Tile {
                target_x: x,
                target_y: y,
                width: w,
                height: h,
                source: SourceRect::new(
                    x as f32 * sx,
                    y as f32 * sy,
                    w as f32 * sx,
                    h as f32 * sy,
                ),
            });
        }
    }
    tiles
}

pub struct ExportParams {
    pub target_w: u32,
    pub target_h: u32,
    pub tile_size: u32,
    pub format: SaveFormat,
    /// Lossy-codec quality, 1–100.
    pub quality: u8,
}

impl ExportParams {
    pub fn new(target_w: u32, target_h: u32) -> Self {
        Self {
            target_w,
            target_h,
            tile_size: DEFAULT_TILE_SIZE,
            format: SaveFormat::Png,
            quality: 90,
        }
    }
}

/// Render the scene at the requested target resolution and encode it.
///
/// Exports always run at [`RenderQuality::Accurate`].  The whole-operation
/// failure modes — output allocation over the surface cap, cancellation,
/// encode errors — reject the call and discard any partial result.
/// Per-layer failures inside a tile render are isolated as usual.
pub fn render_export(
    ctx: &mut RenderContext,
    scene: &Scene,
    params: &ExportParams,
    cancel: Option<&CancelToken>,
) -> Result<Vec<u8>, EngineError> {
    let raster = render_export_raster(ctx, scene, params, cancel)?;
    io::encode_bytes(&raster, params.format, params.quality)
}

/// [`render_export`] without the encode step — the stitched raster itself.
pub fn render_export_raster(
    ctx: &mut RenderContext,
    scene: &Scene,
    params: &ExportParams,
    cancel: Option<&CancelToken>,
) -> Result<RgbaImage, EngineError> {
    if params.target_w == 0 || params.target_h == 0 {
        return Err(EngineError::InvalidDimension(format!(
            "export target must be positive, got {}×{}",
            params.target_w, params.target_h
        )));
    }

    // The output allocation is the export's one big commitment; everything
    // after renders in tile-sized pieces.
    let mut out = Surface::new(params.target_w, params.target_h)?;

    let tiles = tile_grid(
        params.target_w,
        params.target_h,
        params.tile_size,
        scene.logical_w,
        scene.logical_h,
    );
    log_info!(
        "export {}×{} as {} tiles (tile size {})",
        params.target_w,
        params.target_h,
        tiles.len(),
        params.tile_size
    );

    for tile in &tiles {
        if let Some(token) = cancel
            && token.is_cancelled()
        {
            return Err(EngineError::Cancelled);
        }
        let rendered = ctx.composite_region(
            scene,
            tile.source,
            tile.width,
            tile.height,
            (tile.target_x, tile.target_y),
            RenderQuality::Accurate,
        )?;
        out.blit(&rendered, tile.target_x, tile.target_y);
    }

    Ok(out.into_image())
}
