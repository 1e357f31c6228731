//! Engine error taxonomy.
//!
//! Per-layer failures (decode errors, load timeouts) are isolated by the
//! compositor — the layer renders transparent and the pass continues.  The
//! variants here surface whole-operation failures: invalid inputs at the
//! scaler/surface boundary, allocation over the raster cap, cancelled
//! exports, and I/O plumbing.

use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// Non-positive logical/working size or cap, rejected at the boundary.
    InvalidDimension(String),
    /// Raster allocation would exceed the safe pixel cap.  The export call
    /// is rejected and any partial result discarded; the caller may retry
    /// with a smaller tile size or resolution.
    ResourceExhaustion { width: u32, height: u32 },
    /// An asset backing a layer was not ready within the load bound.
    LoadTimeout { name: String, waited_ms: u64 },
    /// Export cancelled via its cancel token between tile iterations.
    Cancelled,
    Io(std::io::Error),
    Encode(image::ImageError),
    Serialize(String),
    InvalidFormat(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidDimension(e) => write!(f, "Invalid dimension: {}", e),
            EngineError::ResourceExhaustion { width, height } => write!(
                f,
                "Raster allocation {}×{} exceeds the safe surface cap",
                width, height
            ),
            EngineError::LoadTimeout { name, waited_ms } => {
                write!(f, "Layer '{}' not ready after {}ms", name, waited_ms)
            }
            EngineError::Cancelled => write!(f, "Export cancelled"),
            EngineError::Io(e) => write!(f, "I/O error: {}", e),
            EngineError::Encode(e) => write!(f, "Image codec error: {}", e),
            EngineError::Serialize(e) => write!(f, "Serialization error: {}", e),
            EngineError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<image::ImageError> for EngineError {
    fn from(e: image::ImageError) -> Self {
        EngineError::Encode(e)
    }
}

impl From<Box<bincode::ErrorKind>> for EngineError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        EngineError::Serialize(e.to_string())
    }
}
