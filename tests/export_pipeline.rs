//! End-to-end pipeline coverage: scene → compositor → tiled export.

use image::{Rgba, RgbaImage};
use rasterfe::compositor::{RenderContext, RenderQuality};
use rasterfe::export::{render_export, render_export_raster, ExportParams};
use rasterfe::io::SaveFormat;
use rasterfe::layer::{Layer, Scene};
use rasterfe::scaler::compute_working_dimensions;
use rasterfe::BlendMode;

/// Diagonal gradient with some structure in every channel.
fn gradient(w: u32, h: u32) -> RgbaImage {
    let mut img = RgbaImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            img.put_pixel(
                x,
                y,
                Rgba([
                    (x * 255 / w.max(1)) as u8,
                    (y * 255 / h.max(1)) as u8,
                    ((x + y) % 256) as u8,
                    255,
                ]),
            );
        }
    }
    img
}

fn test_scene(w: u32, h: u32) -> Scene {
    let mut scene = Scene::new(w, h).unwrap();
    scene.background = Some(Rgba([250, 250, 250, 255]));
    scene.push_layer(Layer::new_bitmap("base".into(), gradient(w, h)));

    // one NATIVE mode and one CUSTOM mode above it
    let mut tint = Layer::new_fill("tint".into(), Rgba([40, 120, 220, 255]));
    tint.blend_mode = BlendMode::Multiply;
    tint.opacity = 0.6;
    scene.push_layer(tint);

    let mut burn = Layer::new_fill("burn".into(), Rgba([230, 200, 90, 255]));
    burn.blend_mode = BlendMode::LinearBurn;
    burn.opacity = 0.4;
    scene.push_layer(burn);

    scene
}

fn max_channel_diff(a: &RgbaImage, b: &RgbaImage) -> u8 {
    assert_eq!(a.dimensions(), b.dimensions());
    a.pixels()
        .zip(b.pixels())
        .flat_map(|(pa, pb)| (0..4).map(move |c| pa[c].abs_diff(pb[c])))
        .max()
        .unwrap_or(0)
}

#[test]
fn tiled_export_matches_untiled_render() {
    let scene = test_scene(300, 200);

    let mut tiled_params = ExportParams::new(300, 200);
    tiled_params.tile_size = 64;
    let mut untiled_params = ExportParams::new(300, 200);
    untiled_params.tile_size = 4096; // single tile

    let tiled =
        render_export_raster(&mut RenderContext::new(), &scene, &tiled_params, None).unwrap();
    let untiled =
        render_export_raster(&mut RenderContext::new(), &scene, &untiled_params, None).unwrap();

    assert!(
        max_channel_diff(&tiled, &untiled) <= 1,
        "tile seams diverge from the untiled render"
    );
}

#[test]
fn tiled_export_with_dissolve_is_seed_stable_across_tilings() {
    let mut scene = test_scene(128, 128);
    let mut noise = Layer::new_fill("noise".into(), Rgba([255, 0, 255, 255]));
    noise.blend_mode = BlendMode::Dissolve;
    noise.opacity = 0.35;
    scene.push_layer(noise);

    let mut small_tiles = ExportParams::new(128, 128);
    small_tiles.tile_size = 32;
    let mut one_tile = ExportParams::new(128, 128);
    one_tile.tile_size = 1024;

    let a = render_export_raster(&mut RenderContext::with_seed(7), &scene, &small_tiles, None)
        .unwrap();
    let b =
        render_export_raster(&mut RenderContext::with_seed(7), &scene, &one_tile, None).unwrap();

    // the dissolve pattern is anchored in target space, so tiling must not move it
    assert!(max_channel_diff(&a, &b) <= 1);
}

#[test]
fn upscaled_export_has_target_dimensions() {
    let scene = test_scene(400, 250);
    let mut params = ExportParams::new(1600, 1000);
    params.tile_size = 512;
    let out = render_export_raster(&mut RenderContext::new(), &scene, &params, None).unwrap();
    assert_eq!(out.dimensions(), (1600, 1000));

    // corners land on the same scene content as a working-size render
    let frame = RenderContext::new()
        .composite_frame(
            &scene,
            &compute_working_dimensions(400, 250, 2500).unwrap(),
            RenderQuality::Accurate,
        )
        .unwrap();
    let up = out.get_pixel(800, 500);
    let reference = frame.get_pixel(200, 125);
    for c in 0..3 {
        assert!(
            up[c].abs_diff(reference[c]) <= 3,
            "center drifted: {:?} vs {:?}",
            up,
            reference
        );
    }
}

#[test]
fn capped_canvas_renders_at_working_size() {
    let mut scene = Scene::new(8000, 4000).unwrap();
    scene.background = Some(Rgba([20, 20, 20, 255]));
    scene.push_layer(Layer::new_fill("wash".into(), Rgba([200, 64, 64, 128])));
    let mapping = compute_working_dimensions(8000, 4000, 2500).unwrap();
    let frame = RenderContext::new()
        .composite_frame(&scene, &mapping, RenderQuality::Fast)
        .unwrap();
    assert_eq!(frame.dimensions(), (2500, 1250));
}

#[test]
fn export_bytes_decode_to_target_size() {
    let scene = test_scene(200, 150);
    let mut params = ExportParams::new(600, 450);
    params.tile_size = 256;
    params.format = SaveFormat::Png;
    let bytes = render_export(&mut RenderContext::new(), &scene, &params, None).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap().into_rgba8();
    assert_eq!(decoded.dimensions(), (600, 450));
}

#[test]
fn fast_and_accurate_agree_when_all_modes_are_native() {
    let mut scene = Scene::new(64, 64).unwrap();
    scene.background = Some(Rgba([255, 255, 255, 255]));
    scene.push_layer(Layer::new_bitmap("base".into(), gradient(64, 64)));
    let mut screen = Layer::new_fill("screen".into(), Rgba([30, 30, 30, 255]));
    screen.blend_mode = BlendMode::Screen;
    scene.push_layer(screen);

    let mapping = compute_working_dimensions(64, 64, 2500).unwrap();
    let mut ctx = RenderContext::new();
    let fast = ctx
        .composite_frame(&scene, &mapping, RenderQuality::Fast)
        .unwrap();
    let accurate = ctx
        .composite_frame(&scene, &mapping, RenderQuality::Accurate)
        .unwrap();
    assert_eq!(max_channel_diff(&fast, &accurate), 0);
}
