// ============================================================================
// RasterFE CLI — headless compositing and export via command-line arguments
// ============================================================================
//
// Usage examples:
//   rasterfe -i bg.png photo.png -o out.png
//   rasterfe -i bg.png fg.png --blend multiply --opacity 0.8 -o out.png
//   rasterfe -i "layers/*.png" --blend screen overlay -o out.jpg -q 85
//   rasterfe -i bg.png fg.png --width 8000 --height 6000 -o poster.png
//   rasterfe --stack design.rfs -o flat.png
//
// Layers stack bottom-most first. All processing runs on the current
// process; exports are tiled automatically when the target exceeds the
// working-surface cap.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use image::Rgba;

use crate::blend::BlendMode;
use crate::compositor::RenderContext;
use crate::error::EngineError;
use crate::export::{self, render_export, ExportParams};
use crate::io::{self, SaveFormat};
use crate::layer::{LayerContent, Scene};
use crate::scaler::{self, compute_working_dimensions};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// RasterFE headless compositor.
///
/// Stack input images as layers, blend them, and export at any resolution
/// — no GUI required.
#[derive(Parser, Debug)]
#[command(
    name = "rasterfe",
    about = "RasterFE headless layer compositor and exporter",
    long_about = "Composite image layers with blend modes and export the result,\n\
                  tiling automatically for targets beyond the safe surface size.\n\n\
                  Example:\n  \
                  rasterfe -i bg.png fg.png --blend multiply -o out.png\n  \
                  rasterfe -i base.png glow.png --blend screen --width 8000 --height 6000 -o poster.png"
)]
pub struct CliArgs {
    /// Input layer image(s), bottom-most first. Glob patterns accepted.
    #[arg(short, long, num_args = 1.., value_name = "FILE")]
    pub input: Vec<String>,

    /// Load a .rfs stack file instead of building a stack from --input.
    #[arg(long, value_name = "FILE.rfs", conflicts_with = "input")]
    pub stack: Option<PathBuf>,

    /// Output image path.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Blend mode for each layer after the first, in stack order
    /// (normal, multiply, screen, color-burn, …). Unlisted layers stay normal.
    #[arg(short, long, num_args = 1..)]
    pub blend: Vec<String>,

    /// Opacity (0.0–1.0) for each layer after the first, in stack order.
    #[arg(long, num_args = 1..)]
    pub opacity: Vec<f32>,

    /// Background color as R,G,B bytes (default: transparent).
    #[arg(long, value_name = "R,G,B")]
    pub background: Option<String>,

    /// Export width in pixels. Defaults to the logical canvas width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Export height in pixels. Defaults to the logical canvas height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Longest safe working-surface edge.
    #[arg(long, default_value_t = scaler::DEFAULT_MAX_SURFACE)]
    pub max_surface: u32,

    /// Maximum export tile edge.
    #[arg(long, default_value_t = export::DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Output format: png, jpeg, bmp.
    /// When omitted, inferred from the output extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100, default 90).
    #[arg(short, long, default_value_t = 90, value_name = "1-100")]
    pub quality: u8,

    /// Dissolve-mode seed for reproducible exports.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Per-asset decode timeout in seconds.
    #[arg(long, default_value_t = crate::layer::DEFAULT_ASSET_TIMEOUT.as_secs(), value_name = "SECS")]
    pub load_timeout: u64,

    /// Also save the composed stack as a .rfs file.
    #[arg(long, value_name = "FILE.rfs")]
    pub save_stack: Option<PathBuf>,

    /// Print scaling and per-stage timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the export and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    match run_inner(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_inner(args: &CliArgs) -> Result<(), EngineError> {
    if args.output.is_none() && args.save_stack.is_none() {
        return Err(EngineError::InvalidFormat(
            "nothing to do: pass --output and/or --save-stack".to_string(),
        ));
    }

    let load_start = Instant::now();
    let mut scene = build_scene(args)?;
    if args.verbose {
        println!(
            "loaded {} layer(s) in {:.0}ms ({}×{} logical)",
            scene.layers().len(),
            load_start.elapsed().as_secs_f64() * 1000.0,
            scene.logical_w,
            scene.logical_h
        );
    }

    let mapping = compute_working_dimensions(scene.logical_w, scene.logical_h, args.max_surface)?;
    if args.verbose && mapping.is_capped() {
        println!(
            "working surface {}×{} (scale {:.4})",
            mapping.working_w, mapping.working_h, mapping.scale
        );
    }

    if let Some(stack_path) = &args.save_stack {
        io::save_stack(&scene, stack_path)?;
        if args.verbose {
            println!("stack → {}", stack_path.display());
        }
    }

    let Some(output) = &args.output else {
        return Ok(());
    };

    // Export target: explicit size, or one axis scaled by the canvas
    // aspect, or the logical size as-is.
    let (target_w, target_h) = match (args.width, args.height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale_axis(w, scene.logical_w, scene.logical_h)),
        (None, Some(h)) => (scale_axis(h, scene.logical_h, scene.logical_w), h),
        (None, None) => (scene.logical_w, scene.logical_h),
    };

    let format = match &args.format {
        Some(f) => SaveFormat::parse(f).ok_or_else(|| {
            EngineError::InvalidFormat(format!("unknown format '{}'", f))
        })?,
        None => SaveFormat::from_path(output),
    };

    let params = ExportParams {
        target_w,
        target_h,
        tile_size: args.tile_size,
        format,
        quality: args.quality,
    };

    let render_start = Instant::now();
    let mut ctx = RenderContext::with_seed(args.seed);
    let bytes = render_export(&mut ctx, &scene, &params, None)?;
    std::fs::write(output, &bytes)?;

    if args.verbose {
        println!(
            "→ {} ({}×{}, {:.0}ms)",
            output.display(),
            target_w,
            target_h,
            render_start.elapsed().as_secs_f64() * 1000.0
        );
    }

    Ok(())
}

// ============================================================================
// Scene assembly
// ============================================================================

fn build_scene(args: &CliArgs) -> Result<Scene, EngineError> {
    if let Some(stack_path) = &args.stack {
        return io::load_stack(stack_path);
    }

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        return Err(EngineError::InvalidFormat(
            "no input files matched the given pattern(s)".to_string(),
        ));
    }

    // Kick off all decodes in parallel, then wait with the load bound.
    let layers: Vec<_> = inputs
        .iter()
        .map(|p| io::load_layer_async(p, None))
        .collect();

    // Logical size comes from the bottom layer, so build a provisional
    // scene and fix the dimensions after resolution.
    let mut scene = Scene::new(1, 1)?;
    for layer in layers {
        scene.push_layer(layer);
    }
    let failures = scene.resolve_assets(Duration::from_secs(args.load_timeout));
    for f in &failures {
        eprintln!("warning: {}", f);
    }

    let bottom_dims = match scene.layers().first().map(|l| &l.content) {
        Some(LayerContent::Bitmap { image, .. }) => Some(image.dimensions()),
        _ => None,
    };
    let Some((w, h)) = bottom_dims else {
        return Err(EngineError::InvalidFormat(format!(
            "bottom layer '{}' failed to load, cannot size the canvas",
            inputs[0].display()
        )));
    };
    scene.logical_w = w;
    scene.logical_h = h;

    if let Some(bg) = &args.background {
        scene.background = Some(parse_background(bg)?);
    }

    // Per-layer blend/opacity flags apply above the bottom layer.
    let ids: Vec<_> = scene.layers().iter().skip(1).map(|l| l.id).collect();
    for (i, id) in ids.iter().enumerate() {
        if let Some(spec) = args.blend.get(i) {
            let mode = BlendMode::parse(spec).unwrap_or_else(|| {
                eprintln!("warning: unknown blend mode '{}', using normal", spec);
                log_warn!("unknown blend mode '{}', using normal", spec);
                BlendMode::Normal
            });
            scene.set_blend_mode(*id, mode)?;
        }
        if let Some(&op) = args.opacity.get(i) {
            scene.set_opacity(*id, op)?;
        }
    }

    Ok(scene)
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            // Literal path — use directly
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

fn parse_background(spec: &str) -> Result<Rgba<u8>, EngineError> {
    let parts: Vec<_> = spec.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(EngineError::InvalidFormat(format!(
            "background must be R,G,B (got '{}')",
            spec
        )));
    }
    let mut rgb = [0u8; 3];
    for (slot, part) in rgb.iter_mut().zip(&parts) {
        *slot = part.parse::<u8>().map_err(|_| {
            EngineError::InvalidFormat(format!("bad background channel '{}'", part))
        })?;
    }
    Ok(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

/// Scale the other axis to preserve the canvas aspect ratio.
fn scale_axis(given: u32, given_logical: u32, other_logical: u32) -> u32 {
    let ratio = given as f64 / given_logical as f64;
    ((other_logical as f64 * ratio).round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_parsing() {
        assert_eq!(
            parse_background("255, 128,0").unwrap(),
            Rgba([255, 128, 0, 255])
        );
        assert!(parse_background("255,128").is_err());
        assert!(parse_background("a,b,c").is_err());
    }

    #[test]
    fn aspect_axis_scaling() {
        assert_eq!(scale_axis(8000, 4000, 3000), 6000);
        assert_eq!(scale_axis(100, 1000, 1), 1);
    }
}
