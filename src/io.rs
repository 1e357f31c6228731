//! Image decode/encode plus the `.rfs` layer-stack file format.
//!
//! Encoding goes through explicit `image::codecs` encoders behind a
//! [`SaveFormat`] enum; JPEG flattens alpha away since the codec has no
//! alpha channel.  Stack files are magic-tagged bincode (`RFS1`) so future
//! revisions can coexist with old files.

use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;
use std::sync::mpsc;
use std::time::Instant;

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::error::EngineError;
use crate::layer::{Layer, LayerContent, PendingAsset, Scene, SourceRect};

// ============================================================================
// FORMATS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveFormat {
    Png,
    Jpeg,
    Bmp,
}

impl SaveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
        }
    }

    pub fn parse(s: &str) -> Option<SaveFormat> {
        match s.to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpeg" | "jpg" => Some(SaveFormat::Jpeg),
            "bmp" => Some(SaveFormat::Bmp),
            _ => None,
        }
    }

    /// Infer from a file extension, defaulting to PNG.
    pub fn from_path(path: &Path) -> SaveFormat {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(SaveFormat::parse)
            .unwrap_or(SaveFormat::Png)
    }
}

// ============================================================================
// DECODE
// ============================================================================

/// Decode an image file to RGBA on the current thread.
pub fn decode_image(path: &Path) -> Result<RgbaImage, EngineError> {
    Ok(image::open(path)?.into_rgba8())
}

/// Start decoding on a worker thread and return a layer that stays
/// transparent until [`Scene::resolve_assets`] swaps the bitmap in (or the
/// load bound expires).
pub fn load_layer_async(path: &Path, placement: Option<SourceRect>) -> Layer {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let (tx, rx) = mpsc::channel();
    let owned = path.to_path_buf();
    std::thread::spawn(move || {
        let result = image::open(&owned)
            .map(|img| img.into_rgba8())
            .map_err(|e| format!("{}: {}", owned.display(), e));
        // Receiver may be gone if the scene was dropped — fine either way.
        let _ = tx.send(result);
    });

    Layer::new(
        name,
        LayerContent::Deferred(PendingAsset {
            rx,
            placement,
            requested: Instant::now(),
        }),
    )
}

// ============================================================================
// ENCODE
// ============================================================================

/// Encode to in-memory bytes — the export pipeline's terminal step.
pub fn encode_bytes(
    img: &RgbaImage,
    format: SaveFormat,
    quality: u8,
) -> Result<Vec<u8>, EngineError> {
    let mut buf = Cursor::new(Vec::new());
    encode_into(img, &mut buf, format, quality)?;
    Ok(buf.into_inner())
}

/// Encode straight to a file.
pub fn encode_and_write(
    img: &RgbaImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
) -> Result<(), EngineError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    encode_into(img, &mut writer, format, quality)
}

fn encode_into<W: std::io::Write>(
    img: &RgbaImage,
    writer: &mut W,
    format: SaveFormat,
    quality: u8,
) -> Result<(), EngineError> {
    let (w, h) = img.dimensions();
    match format {
        SaveFormat::Png => {
            let encoder = PngEncoder::new(writer);
            #[allow(deprecated)]
            encoder.encode(img.as_raw(), w, h, image::ColorType::Rgba8)?;
        }
        SaveFormat::Jpeg => {
            // JPEG carries no alpha — flatten to RGB
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
            encoder.encode(rgb.as_raw(), w, h, image::ColorType::Rgb8)?;
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(writer);
            encoder.encode(img.as_raw(), w, h, image::ColorType::Rgba8)?;
        }
    }
    Ok(())
}

// ============================================================================
// STACK FILE FORMAT (.rfs)
// ============================================================================

/// Magic header for the v1 stack format.
const STACK_MAGIC_V1: &str = "RFS1";

#[derive(Serialize, Deserialize)]
struct StackFileV1 {
    magic: String,
    logical_w: u32,
    logical_h: u32,
    background: Option<[u8; 4]>,
    layers: Vec<LayerDataV1>,
}

#[derive(Serialize, Deserialize)]
struct LayerDataV1 {
    name: String,
    visible: bool,
    opacity: f32,
    blend_mode: u8,
    content: LayerDataContentV1,
}

#[derive(Serialize, Deserialize)]
enum LayerDataContentV1 {
    Fill([u8; 4]),
    Bitmap {
        width: u32,
        height: u32,
        placement: [f32; 4],
        pixels: Vec<u8>,
    },
}

/// Save a scene as a `.rfs` stack file.  Layers whose assets never
/// resolved are skipped with a warning — there is nothing to store.
pub fn save_stack(scene: &Scene, path: &Path) -> Result<(), EngineError> {
    let mut layers = Vec::with_capacity(scene.layers().len());
    for layer in scene.layers() {
        let content = match &layer.content {
            LayerContent::Fill(c) => LayerDataContentV1::Fill(c.0),
            LayerContent::Bitmap { image, placement } => LayerDataContentV1::Bitmap {
                width: image.width(),
                height: image.height(),
                placement: [placement.x, placement.y, placement.w, placement.h],
                pixels: image.as_raw().clone(),
            },
            LayerContent::Deferred(_) => {
                log_warn!("layer '{}' is still loading, not saved", layer.name);
                continue;
            }
        };
        layers.push(LayerDataV1 {
            name: layer.name.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode.to_u8(),
            content,
        });
    }

    let file = StackFileV1 {
        magic: STACK_MAGIC_V1.to_string(),
        logical_w: scene.logical_w,
        logical_h: scene.logical_h,
        background: scene.background.map(|c| c.0),
        layers,
    };

    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &file)?;
    Ok(())
}

/// Load a `.rfs` stack file back into a scene.
pub fn load_stack(path: &Path) -> Result<Scene, EngineError> {
    let raw = std::fs::read(path)?;
    let parsed: StackFileV1 = bincode::deserialize(&raw)?;
    if parsed.magic != STACK_MAGIC_V1 {
        return Err(EngineError::InvalidFormat(format!(
            "not a stack file (magic '{}')",
            parsed.magic
        )));
    }

    let mut scene = Scene::new(parsed.logical_w, parsed.logical_h)?;
    scene.background = parsed.background.map(image::Rgba);

    for data in parsed.layers {
        let content = match data.content {
            LayerDataContentV1::Fill(c) => LayerContent::Fill(image::Rgba(c)),
            LayerDataContentV1::Bitmap {
                width,
                height,
                placement,
                pixels,
            } => {
                let image = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
                    EngineError::InvalidFormat(format!(
                        "layer '{}' pixel data does not match {}×{}",
                        data.name, width, height
                    ))
                })?;
                LayerContent::Bitmap {
                    image: std::sync::Arc::new(image),
                    placement: SourceRect::new(
                        placement[0],
                        placement[1],
                        placement[2],
                        placement[3],
                    ),
                }
            }
        };
        let mut layer = Layer::new(data.name, content);
        layer.visible = data.visible;
        layer.opacity = data.opacity;
        layer.blend_mode = BlendMode::from_u8(data.blend_mode);
        scene.push_layer(layer);
    }
    Ok(scene)
}
