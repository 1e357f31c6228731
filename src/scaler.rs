//! Working-surface scaler — maps unbounded *logical* canvas dimensions to
//! the capped *working* raster the engine actually allocates.
//!
//! All object placement and transform math stays in logical coordinates;
//! the single `scale` factor is applied exactly once as the global render
//! transform, so individual layers never need per-object correction.

use crate::error::EngineError;

/// Default longest-edge cap for the working surface.
pub const DEFAULT_MAX_SURFACE: u32 = 2500;

/// The logical↔working mapping for one canvas size.
///
/// Invariants: `scale = min(1, max_safe / max(logical_w, logical_h))`,
/// working dims = `round(logical × scale)`, and the longest working edge
/// never exceeds the cap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleMapping {
    pub logical_w: u32,
    pub logical_h: u32,
    pub working_w: u32,
    pub working_h: u32,
    pub scale: f32,
}

impl ScaleMapping {
    /// True when the canvas is larger than the cap and rendering is
    /// downscaled.
    pub fn is_capped(&self) -> bool {
        self.scale < 1.0
    }

    pub fn to_working(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale, y * self.scale)
    }

    pub fn to_logical(&self, x: f32, y: f32) -> (f32, f32) {
        (x / self.scale, y / self.scale)
    }
}

/// Compute the working-surface mapping for a logical canvas size.
/// Pure and idempotent — call it on every logical resize.
pub fn compute_working_dimensions(
    logical_w: u32,
    logical_h: u32,
    max_safe: u32,
) -> Result<ScaleMapping, EngineError> {
    if logical_w == 0 || logical_h == 0 {
        return Err(EngineError::InvalidDimension(format!(
            "logical canvas must be positive, got {}×{}",
            logical_w, logical_h
        )));
    }
    if max_safe == 0 {
        return Err(EngineError::InvalidDimension(
            "max safe dimension must be positive".to_string(),
        ));
    }

    let longest = logical_w.max(logical_h);
    let scale = (max_safe as f32 / longest as f32).min(1.0);
    let working_w = ((logical_w as f32 * scale).round() as u32).clamp(1, max_safe);
    let working_h = ((logical_h as f32 * scale).round() as u32).clamp(1, max_safe);

    Ok(ScaleMapping {
        logical_w,
        logical_h,
        working_w,
        working_h,
        scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_canvas_is_capped() {
        let m = compute_working_dimensions(8000, 4000, 2500).unwrap();
        assert_eq!(m.working_w, 2500);
        assert_eq!(m.working_h, 1250);
        assert!((m.scale - 0.3125).abs() < 1e-9);
        assert!(m.is_capped());
    }

    #[test]
    fn small_canvas_is_identity() {
        let m = compute_working_dimensions(800, 600, 2500).unwrap();
        assert_eq!(m.scale, 1.0);
        assert_eq!((m.working_w, m.working_h), (800, 600));
        assert!(!m.is_capped());
    }

    #[test]
    fn idempotent_and_cap_respected() {
        for (w, h) in [(1, 1), (2500, 2500), (2501, 99), (16_000, 9_000), (30, 99_999)] {
            let a = compute_working_dimensions(w, h, 2500).unwrap();
            let b = compute_working_dimensions(w, h, 2500).unwrap();
            assert_eq!(a, b);
            assert!(a.working_w.max(a.working_h) <= 2500, "{w}×{h}");
            assert!(a.working_w >= 1 && a.working_h >= 1);
        }
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert!(compute_working_dimensions(0, 100, 2500).is_err());
        assert!(compute_working_dimensions(100, 0, 2500).is_err());
        assert!(compute_working_dimensions(100, 100, 0).is_err());
    }

    #[test]
    fn point_mapping_roundtrip() {
        let m = compute_working_dimensions(8000, 4000, 2500).unwrap();
        let (wx, wy) = m.to_working(4000.0, 2000.0);
        assert_eq!((wx, wy), (1250.0, 625.0));
        let (lx, ly) = m.to_logical(wx, wy);
        assert!((lx - 4000.0).abs() < 1e-3 && (ly - 2000.0).abs() < 1e-3);
    }
}
