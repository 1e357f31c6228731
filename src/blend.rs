//! Blend formula library — pure per-channel/per-pixel math for every
//! supported layer blend mode.
//!
//! All formulas operate on normalized channel values in `[0, 1]` with
//! `base` = the pixel underneath (B) and `top` = the incoming layer pixel
//! (T), and return a clamped `[0, 1]` result.  Division-bearing modes
//! (ColorBurn, ColorDodge, Divide, VividLight) resolve their degenerate
//! denominators by explicit branch — no NaN or infinity ever escapes.
//!
//! The mode set is closed and partitioned: modes with a 1:1 native operator
//! on the raster surface report it via [`BlendMode::native_op`]; the rest
//! are CUSTOM and carry a fixed nearest-native fallback
//! ([`BlendMode::fallback_op`]) used for interactive draft rendering.

use image::Rgba;

// ============================================================================
// NATIVE OPERATOR SET
// ============================================================================

/// A blend operator the raster surface implements natively (the classic
/// 2D-canvas operator subset).  Every [`BlendMode`] maps to exactly one of
/// these, either as its exact equivalent or as its draft approximation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeOp {
    SourceOver,
    Lighter,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl CompositeOp {
    /// The blend mode this operator is the exact implementation of.
    /// Used by the surface to share one formula table with the exact path.
    pub fn blend_mode(&self) -> BlendMode {
        match self {
            CompositeOp::SourceOver => BlendMode::Normal,
            CompositeOp::Lighter => BlendMode::LinearDodge,
            CompositeOp::Multiply => BlendMode::Multiply,
            CompositeOp::Screen => BlendMode::Screen,
            CompositeOp::Overlay => BlendMode::Overlay,
            CompositeOp::Darken => BlendMode::Darken,
            CompositeOp::Lighten => BlendMode::Lighten,
            CompositeOp::ColorDodge => BlendMode::ColorDodge,
            CompositeOp::ColorBurn => BlendMode::ColorBurn,
            CompositeOp::HardLight => BlendMode::HardLight,
            CompositeOp::SoftLight => BlendMode::SoftLight,
            CompositeOp::Difference => BlendMode::Difference,
            CompositeOp::Exclusion => BlendMode::Exclusion,
            CompositeOp::Hue => BlendMode::Hue,
            CompositeOp::Saturation => BlendMode::Saturation,
            CompositeOp::Color => BlendMode::Color,
            CompositeOp::Luminosity => BlendMode::Luminosity,
        }
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Dissolve,
    // Darken group
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,
    // Lighten group
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,
    // Contrast group
    Overlay,
    SoftLight,
    HardLight,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
    // Inversion group
    Difference,
    Exclusion,
    Subtract,
    Divide,
    // Color group (HSL decomposition)
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// Returns all blend modes in picker order.
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Dissolve,
            BlendMode::Darken,
            BlendMode::Multiply,
            BlendMode::ColorBurn,
            BlendMode::LinearBurn,
            BlendMode::DarkerColor,
            BlendMode::Lighten,
            BlendMode::Screen,
            BlendMode::ColorDodge,
            BlendMode::LinearDodge,
            BlendMode::LighterColor,
            BlendMode::Overlay,
            BlendMode::SoftLight,
            BlendMode::HardLight,
            BlendMode::VividLight,
            BlendMode::LinearLight,
            BlendMode::PinLight,
            BlendMode::HardMix,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Subtract,
            BlendMode::Divide,
            BlendMode::Hue,
            BlendMode::Saturation,
            BlendMode::Color,
            BlendMode::Luminosity,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Dissolve => "Dissolve",
            BlendMode::Darken => "Darken",
            BlendMode::Multiply => "Multiply",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::LinearBurn => "Linear Burn",
            BlendMode::DarkerColor => "Darker Color",
            BlendMode::Lighten => "Lighten",
            BlendMode::Screen => "Screen",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::LinearDodge => "Linear Dodge",
            BlendMode::LighterColor => "Lighter Color",
            BlendMode::Overlay => "Overlay",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::HardLight => "Hard Light",
            BlendMode::VividLight => "Vivid Light",
            BlendMode::LinearLight => "Linear Light",
            BlendMode::PinLight => "Pin Light",
            BlendMode::HardMix => "Hard Mix",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Subtract => "Subtract",
            BlendMode::Divide => "Divide",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Luminosity => "Luminosity",
        }
    }

    /// Parse a CLI/config spelling ("color-burn", "color_burn", "colorburn").
    pub fn parse(s: &str) -> Option<BlendMode> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        BlendMode::all()
            .iter()
            .copied()
            .find(|m| m.name().replace(' ', "").to_lowercase() == key)
    }

    /// Convert to a stable u8 for binary serialization.
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Dissolve => 1,
            BlendMode::Darken => 2,
            BlendMode::Multiply => 3,
            BlendMode::ColorBurn => 4,
            BlendMode::LinearBurn => 5,
            BlendMode::DarkerColor => 6,
            BlendMode::Lighten => 7,
            BlendMode::Screen => 8,
            BlendMode::ColorDodge => 9,
            BlendMode::LinearDodge => 10,
            BlendMode::LighterColor => 11,
            BlendMode::Overlay => 12,
            BlendMode::SoftLight => 13,
            BlendMode::HardLight => 14,
            BlendMode::VividLight => 15,
            BlendMode::LinearLight => 16,
            BlendMode::PinLight => 17,
            BlendMode::HardMix => 18,
            BlendMode::Difference => 19,
            BlendMode::Exclusion => 20,
            BlendMode::Subtract => 21,
            BlendMode::Divide => 22,
            BlendMode::Hue => 23,
            BlendMode::Saturation => 24,
            BlendMode::Color => 25,
            BlendMode::Luminosity => 26,
        }
    }

    /// Reconstruct from a u8.  Unknown values fall back to Normal — logged,
    /// never fatal.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => BlendMode::Normal,
            1 => BlendMode::Dissolve,
            2 => BlendMode::Darken,
            3 => BlendMode::Multiply,
            4 => BlendMode::ColorBurn,
            5 => BlendMode::LinearBurn,
            6 => BlendMode::DarkerColor,
            7 => BlendMode::Lighten,
            8 => BlendMode::Screen,
            9 => BlendMode::ColorDodge,
            10 => BlendMode::LinearDodge,
            11 => BlendMode::LighterColor,
            12 => BlendMode::Overlay,
            13 => BlendMode::SoftLight,
            14 => BlendMode::HardLight,
            15 => BlendMode::VividLight,
            16 => BlendMode::LinearLight,
            17 => BlendMode::PinLight,
            18 => BlendMode::HardMix,
            19 => BlendMode::Difference,
            20 => BlendMode::Exclusion,
            21 => BlendMode::Subtract,
            22 => BlendMode::Divide,
            23 => BlendMode::Hue,
            24 => BlendMode::Saturation,
            25 => BlendMode::Color,
            26 => BlendMode::Luminosity,
            _ => {
                log_warn!("Unknown blend mode byte {}, falling back to Normal", v);
                BlendMode::Normal
            }
        }
    }

    /// The 1:1 native operator, if the surface implements this mode directly.
    pub fn native_op(&self) -> Option<CompositeOp> {
        match self {
            BlendMode::Normal => Some(CompositeOp::SourceOver),
            BlendMode::LinearDodge => Some(CompositeOp::Lighter),
            BlendMode::Multiply => Some(CompositeOp::Multiply),
            BlendMode::Screen => Some(CompositeOp::Screen),
            BlendMode::Overlay => Some(CompositeOp::Overlay),
            BlendMode::Darken => Some(CompositeOp::Darken),
            BlendMode::Lighten => Some(CompositeOp::Lighten),
            BlendMode::ColorDodge => Some(CompositeOp::ColorDodge),
            BlendMode::ColorBurn => Some(CompositeOp::ColorBurn),
            BlendMode::HardLight => Some(CompositeOp::HardLight),
            BlendMode::SoftLight => Some(CompositeOp::SoftLight),
            BlendMode::Difference => Some(CompositeOp::Difference),
            BlendMode::Exclusion => Some(CompositeOp::Exclusion),
            BlendMode::Hue => Some(CompositeOp::Hue),
            BlendMode::Saturation => Some(CompositeOp::Saturation),
            BlendMode::Color => Some(CompositeOp::Color),
            BlendMode::Luminosity => Some(CompositeOp::Luminosity),
            _ => None,
        }
    }

    /// True when the surface can composite this mode without the per-pixel
    /// formula path.
    pub fn is_native(&self) -> bool {
        self.native_op().is_some()
    }

    /// The nearest native operator, used for draft rendering of CUSTOM
    /// modes during interaction.  NATIVE modes return their own operator.
    pub fn fallback_op(&self) -> CompositeOp {
        if let Some(op) = self.native_op() {
            return op;
        }
        match self {
            BlendMode::Dissolve => CompositeOp::SourceOver,
            BlendMode::LinearBurn => CompositeOp::Multiply,
            BlendMode::DarkerColor => CompositeOp::Darken,
            BlendMode::LighterColor => CompositeOp::Lighten,
            BlendMode::VividLight
            | BlendMode::LinearLight
            | BlendMode::PinLight
            | BlendMode::HardMix => CompositeOp::HardLight,
            BlendMode::Subtract => CompositeOp::Difference,
            BlendMode::Divide => CompositeOp::ColorDodge,
            // NATIVE modes handled above
            _ => unreachable!(),
        }
    }
}

// ============================================================================
// PER-CHANNEL FORMULAS
// ============================================================================

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if top <= 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - base) / top).max(0.0)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

fn soft_light_channel(base: f32, top: f32) -> f32 {
    ((1.0 - 2.0 * top) * base * base + 2.0 * top * base).clamp(0.0, 1.0)
}

fn linear_light_channel(base: f32, top: f32) -> f32 {
    (base + 2.0 * top - 1.0).clamp(0.0, 1.0)
}

fn vivid_light_channel(base: f32, top: f32) -> f32 {
    if top < 0.5 {
        // Color Burn against a doubled top
        let t2 = 2.0 * top;
        if t2 <= 0.0 { 0.0 } else { (1.0 - (1.0 - base) / t2).max(0.0) }
    } else {
        // Color Dodge against the doubled remainder
        let d = 2.0 * (1.0 - top);
        if d <= 0.0 { 1.0 } else { (base / d).min(1.0) }
    }
}

fn pin_light_channel(base: f32, top: f32) -> f32 {
    if top < 0.5 {
        base.min(2.0 * top)
    } else {
        base.max(2.0 * top - 1.0)
    }
}

fn divide_channel(base: f32, top: f32) -> f32 {
    if top <= 0.0 { 1.0 } else { (base / top).min(1.0) }
}

/// Rec.601 luma, used to pick the darker/lighter of two RGB triples.
pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

// ============================================================================
// RGB ↔ HSL
// ============================================================================

/// RGB `[0,1]` → `[hue, saturation, lightness]`, all in `[0,1]`.
/// Achromatic inputs report hue 0.
pub fn rgb_to_hsl(rgb: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if max == min {
        return [0.0, 0.0, l];
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };

    [h / 6.0, s, l]
}

/// `[hue, saturation, lightness]` → RGB, all in `[0,1]`.
pub fn hsl_to_rgb(hsl: [f32; 3]) -> [f32; 3] {
    let [h, s, l] = hsl;
    if s <= 0.0 {
        return [l, l, l];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        hue_to_channel(p, q, h + 1.0 / 3.0),
        hue_to_channel(p, q, h),
        hue_to_channel(p, q, h - 1.0 / 3.0),
    ]
}

fn hue_to_channel(p: f32, q: f32, t: f32) -> f32 {
    let mut t = t;
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

// ============================================================================
// EXACT FORMULA DISPATCH
// ============================================================================

/// Evaluate the exact blend formula for `mode` over normalized RGB triples.
/// Dissolve has no continuous formula and behaves as Normal here; its
/// stochastic selection happens in [`blend_pixel`].
pub fn blend_rgb(mode: BlendMode, base: [f32; 3], top: [f32; 3]) -> [f32; 3] {
    let per_channel = |f: fn(f32, f32) -> f32| -> [f32; 3] {
        [f(base[0], top[0]), f(base[1], top[1]), f(base[2], top[2])]
    };

    match mode {
        BlendMode::Normal | BlendMode::Dissolve => top,
        BlendMode::Darken => per_channel(|b, t| b.min(t)),
        BlendMode::Multiply => per_channel(|b, t| b * t),
        BlendMode::ColorBurn => per_channel(color_burn_channel),
        BlendMode::LinearBurn => per_channel(|b, t| (b + t - 1.0).max(0.0)),
        BlendMode::DarkerColor => {
            if luminance(top) < luminance(base) { top } else { base }
        }
        BlendMode::Lighten => per_channel(|b, t| b.max(t)),
        BlendMode::Screen => per_channel(|b, t| 1.0 - (1.0 - b) * (1.0 - t)),
        BlendMode::ColorDodge => per_channel(color_dodge_channel),
        BlendMode::LinearDodge => per_channel(|b, t| (b + t).min(1.0)),
        BlendMode::LighterColor => {
            if luminance(top) > luminance(base) { top } else { base }
        }
        BlendMode::Overlay => per_channel(overlay_channel),
        BlendMode::SoftLight => per_channel(soft_light_channel),
        // Hard Light is Overlay with the roles swapped
        BlendMode::HardLight => per_channel(|b, t| overlay_channel(t, b)),
        BlendMode::VividLight => per_channel(vivid_light_channel),
        BlendMode::LinearLight => per_channel(linear_light_channel),
        BlendMode::PinLight => per_channel(pin_light_channel),
        BlendMode::HardMix => {
            per_channel(|b, t| if linear_light_channel(b, t) < 0.5 { 0.0 } else { 1.0 })
        }
        BlendMode::Difference => per_channel(|b, t| (b - t).abs()),
        BlendMode::Exclusion => per_channel(|b, t| b + t - 2.0 * b * t),
        BlendMode::Subtract => per_channel(|b, t| (b - t).max(0.0)),
        BlendMode::Divide => per_channel(divide_channel),
        BlendMode::Hue => {
            let th = rgb_to_hsl(top);
            let bh = rgb_to_hsl(base);
            hsl_to_rgb([th[0], bh[1], bh[2]])
        }
        BlendMode::Saturation => {
            let th = rgb_to_hsl(top);
            let bh = rgb_to_hsl(base);
            hsl_to_rgb([bh[0], th[1], bh[2]])
        }
        BlendMode::Color => {
            let th = rgb_to_hsl(top);
            let bh = rgb_to_hsl(base);
            hsl_to_rgb([th[0], th[1], bh[2]])
        }
        BlendMode::Luminosity => {
            let th = rgb_to_hsl(top);
            let bh = rgb_to_hsl(base);
            hsl_to_rgb([bh[0], bh[1], th[2]])
        }
    }
}

// ============================================================================
// DISSOLVE
// ============================================================================

/// Deterministic per-pixel dissolve decision: a hash of (x, y, seed)
/// compared against the effective opacity.  Boundaries are exact — an
/// effective opacity of 1 always keeps the top pixel, 0 never does — so
/// dissolve output is reproducible and golden-testable for a fixed seed.
pub fn dissolve_keeps_top(x: u32, y: u32, seed: u64, eff: f32) -> bool {
    if eff >= 1.0 {
        return true;
    }
    if eff <= 0.0 {
        return false;
    }
    let mut h = seed ^ (((x as u64) << 32) | y as u64);
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    // 24 high-quality bits → uniform float in [0, 1)
    ((h >> 40) as f32 / (1u64 << 24) as f32) < eff
}

// ============================================================================
// PER-PIXEL COMPOSITING
// ============================================================================

/// Blend one layer pixel onto the accumulator pixel.
///
/// `opacity` is the layer opacity; the top pixel's own alpha folds into the
/// effective opacity, so `eff = top_alpha × opacity`.  Every mode then
/// composites as `base·(1−eff) + formula(top, base)·eff` on straight RGB,
/// with `alpha = min(1, base_alpha + eff)`.  A fully transparent top pixel
/// leaves the accumulator untouched.
///
/// `(x, y)` are target-space pixel coordinates and `seed` the context's
/// dissolve seed; only Dissolve reads them.
pub fn blend_pixel(
    base: Rgba<u8>,
    top: Rgba<u8>,
    mode: BlendMode,
    opacity: f32,
    x: u32,
    y: u32,
    seed: u64,
) -> Rgba<u8> {
    if top[3] == 0 {
        return base;
    }
    let opacity = opacity.clamp(0.0, 1.0);
    let top_a = top[3] as f32 / 255.0;
    let eff = top_a * opacity;
    if eff <= 0.0 {
        return base;
    }

    // Fast path: opaque Normal overwrite
    if mode == BlendMode::Normal && eff >= 1.0 {
        return Rgba([top[0], top[1], top[2], 255]);
    }

    if mode == BlendMode::Dissolve {
        // All-or-nothing: a picked pixel shows the top at full strength.
        return if dissolve_keeps_top(x, y, seed, eff) {
            Rgba([top[0], top[1], top[2], base[3].max(top[3])])
        } else {
            base
        };
    }

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
    let f = blend_rgb(mode, b, t);

    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = b[c] * (1.0 - eff) + f[c] * eff;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    let base_a = base[3] as f32 / 255.0;
    out[3] = ((base_a + eff).min(1.0) * 255.0).round() as u8;
    Rgba(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<f32> {
        (0..=16).map(|i| i as f32 / 16.0).collect()
    }

    #[test]
    fn multiply_min_screen_monotonicity() {
        for &t in &grid() {
            for &b in &grid() {
                let mul = blend_rgb(BlendMode::Multiply, [b; 3], [t; 3])[0];
                let min = b.min(t);
                let scr = blend_rgb(BlendMode::Screen, [b; 3], [t; 3])[0];
                assert!(mul <= min + 1e-6, "multiply({t},{b}) > min");
                assert!(min <= scr + 1e-6, "min({t},{b}) > screen");
            }
        }
    }

    #[test]
    fn division_guards() {
        for &b in &grid() {
            assert_eq!(blend_rgb(BlendMode::ColorBurn, [b; 3], [0.0; 3])[0], 0.0);
            assert_eq!(blend_rgb(BlendMode::Divide, [b; 3], [0.0; 3])[0], 1.0);
            assert_eq!(blend_rgb(BlendMode::ColorDodge, [b; 3], [1.0; 3])[0], 1.0);
        }
    }

    #[test]
    fn all_formulas_stay_clamped_and_finite() {
        for mode in BlendMode::all() {
            for &t in &grid() {
                for &b in &grid() {
                    let out = blend_rgb(*mode, [b, 1.0 - b, b], [t, t, 1.0 - t]);
                    for (i, v) in out.iter().enumerate() {
                        assert!(
                            v.is_finite() && (-1e-6..=1.0 + 1e-6).contains(v),
                            "{:?} channel {} out of range: {} (t={}, b={})",
                            mode,
                            i,
                            v,
                            t,
                            b
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn hard_light_is_swapped_overlay() {
        for &t in &grid() {
            for &b in &grid() {
                let hl = blend_rgb(BlendMode::HardLight, [b; 3], [t; 3])[0];
                let ov = blend_rgb(BlendMode::Overlay, [t; 3], [b; 3])[0];
                assert!((hl - ov).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn vivid_light_continuous_at_half() {
        for &b in &grid() {
            let below = vivid_light_channel(b, 0.5 - 1e-4);
            let above = vivid_light_channel(b, 0.5 + 1e-4);
            assert!((below - above).abs() < 0.01, "b={b}: {below} vs {above}");
        }
    }

    #[test]
    fn hsl_roundtrip() {
        for &r in &grid() {
            for &g in &[0.0, 0.25, 0.5, 0.75, 1.0] {
                for &b in &[0.0, 0.5, 1.0] {
                    let rgb = [r, g, b];
                    let back = hsl_to_rgb(rgb_to_hsl(rgb));
                    for c in 0..3 {
                        assert!(
                            (back[c] - rgb[c]).abs() < 1e-4,
                            "roundtrip {:?} → {:?}",
                            rgb,
                            back
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn luminosity_transfers_lightness() {
        let base = [0.8, 0.2, 0.2];
        let top = [0.1, 0.1, 0.1];
        let out = blend_rgb(BlendMode::Luminosity, base, top);
        let expected_l = rgb_to_hsl(top)[2];
        assert!((rgb_to_hsl(out)[2] - expected_l).abs() < 1e-3);
    }

    #[test]
    fn opacity_zero_keeps_bottom() {
        let base = Rgba([10, 200, 30, 255]);
        let top = Rgba([250, 5, 120, 255]);
        for mode in BlendMode::all() {
            assert_eq!(blend_pixel(base, top, *mode, 0.0, 3, 7, 0), base);
        }
    }

    #[test]
    fn opacity_one_is_pure_formula() {
        let base = Rgba([40, 80, 160, 255]);
        let top = Rgba([200, 100, 50, 255]);
        for mode in BlendMode::all() {
            if *mode == BlendMode::Dissolve {
                continue;
            }
            let out = blend_pixel(base, top, *mode, 1.0, 0, 0, 0);
            let f = blend_rgb(
                *mode,
                [40.0 / 255.0, 80.0 / 255.0, 160.0 / 255.0],
                [200.0 / 255.0, 100.0 / 255.0, 50.0 / 255.0],
            );
            for c in 0..3 {
                let expected = (f[c] * 255.0).round() as i32;
                assert!(
                    (out[c] as i32 - expected).abs() <= 1,
                    "{:?} channel {}: {} vs {}",
                    mode,
                    c,
                    out[c],
                    expected
                );
            }
            assert_eq!(out[3], 255);
        }
    }

    #[test]
    fn transparent_top_is_identity() {
        let base = Rgba([12, 34, 56, 78]);
        let top = Rgba([200, 200, 200, 0]);
        for mode in BlendMode::all() {
            assert_eq!(blend_pixel(base, top, *mode, 1.0, 0, 0, 0), base);
        }
    }

    #[test]
    fn normal_half_mix() {
        let out = blend_pixel(
            Rgba([255, 0, 0, 255]),
            Rgba([0, 0, 255, 255]),
            BlendMode::Normal,
            0.5,
            0,
            0,
            0,
        );
        assert_eq!(out, Rgba([128, 0, 128, 255]));
    }

    #[test]
    fn dissolve_deterministic_boundaries() {
        let base = Rgba([1, 2, 3, 255]);
        let top = Rgba([200, 100, 50, 255]);
        for y in 0..32 {
            for x in 0..32 {
                let kept = blend_pixel(base, top, BlendMode::Dissolve, 1.0, x, y, 42);
                assert_eq!(&kept.0[..3], &[200, 100, 50]);
                assert_eq!(blend_pixel(base, top, BlendMode::Dissolve, 0.0, x, y, 42), base);
            }
        }
    }

    #[test]
    fn dissolve_rate_tracks_opacity() {
        let base = Rgba([0, 0, 0, 255]);
        let top = Rgba([255, 255, 255, 255]);
        let mut kept = 0u32;
        let total = 256 * 256;
        for y in 0..256 {
            for x in 0..256 {
                if blend_pixel(base, top, BlendMode::Dissolve, 0.3, x, y, 7)[0] == 255 {
                    kept += 1;
                }
            }
        }
        let rate = kept as f32 / total as f32;
        assert!((rate - 0.3).abs() < 0.02, "dissolve rate {rate}");
    }

    #[test]
    fn darker_lighter_color_pick_whole_triples() {
        let base = [0.9, 0.1, 0.1]; // luma ≈ 0.339
        let top = [0.0, 0.6, 0.0]; // luma ≈ 0.352
        assert_eq!(blend_rgb(BlendMode::DarkerColor, base, top), base);
        assert_eq!(blend_rgb(BlendMode::LighterColor, base, top), top);
    }

    #[test]
    fn mode_byte_roundtrip_and_fallbacks_total() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::from_u8(mode.to_u8()), *mode);
            // every mode resolves to exactly one draft operator
            let _ = mode.fallback_op();
            if let Some(op) = mode.native_op() {
                assert_eq!(op.blend_mode(), *mode);
                assert_eq!(mode.fallback_op(), op);
            }
        }
        assert_eq!(BlendMode::all().len(), 27);
        assert_eq!(BlendMode::from_u8(255), BlendMode::Normal);
    }

    #[test]
    fn parse_accepts_cli_spellings() {
        assert_eq!(BlendMode::parse("multiply"), Some(BlendMode::Multiply));
        assert_eq!(BlendMode::parse("color-burn"), Some(BlendMode::ColorBurn));
        assert_eq!(BlendMode::parse("Linear_Dodge"), Some(BlendMode::LinearDodge));
        assert_eq!(BlendMode::parse("nonsense"), None);
    }
}
