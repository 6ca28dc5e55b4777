//! CIE chromaticity to hex RGB conversion.
//!
//! Wireless lights report color as CIE 1931 x/y coordinates plus a 0-255
//! brightness. The generic model wants a `#RRGGBB` string.

use serde_json::Value;

/// Default wire brightness when the payload carries none.
pub const DEFAULT_BRIGHTNESS: f64 = 254.0;

/// Fallback color when the payload lacks chromaticity coordinates.
pub const FALLBACK_HEX: &str = "#FFFFFF";

/// Division guard for zero-valued inputs.
const EPSILON: f64 = 1e-6;

/// Convert CIE x/y chromaticity and a wire brightness (0-255) to a
/// `#RRGGBB` string.
///
/// Applies the standard CIE XYZ to linear-sRGB matrix, gamma-corrects each
/// channel, normalizes by the largest channel when any would leave range,
/// and clips to [0,255].
pub fn xy_to_hex(x: f64, y: f64, brightness: f64) -> String {
    let x = x.max(EPSILON);
    let y = y.max(EPSILON);
    let z = 1.0 - x - y;

    let luminance = (brightness / 254.0).max(EPSILON);
    let big_x = (luminance / y) * x;
    let big_z = (luminance / y) * z;

    // XYZ -> linear sRGB (D65)
    let r = big_x * 3.2406 - luminance * 1.5372 - big_z * 0.4986;
    let g = -big_x * 0.9689 + luminance * 1.8758 + big_z * 0.0415;
    let b = big_x * 0.0557 - luminance * 0.2040 + big_z * 1.0570;

    let mut r = gamma_correct(r.max(0.0));
    let mut g = gamma_correct(g.max(0.0));
    let mut b = gamma_correct(b.max(0.0));

    let peak = r.max(g).max(b);
    if peak > 1.0 {
        r /= peak;
        g /= peak;
        b /= peak;
    }

    format!(
        "#{:02X}{:02X}{:02X}",
        to_channel_byte(r),
        to_channel_byte(g),
        to_channel_byte(b)
    )
}

/// Convert an inbound color payload (`{"x": .., "y": ..}`) to hex, falling
/// back to white when either coordinate is missing.
pub fn color_payload_to_hex(color: &Value, brightness: Option<f64>) -> String {
    let x = color.get("x").and_then(Value::as_f64);
    let y = color.get("y").and_then(Value::as_f64);
    match (x, y) {
        (Some(x), Some(y)) => xy_to_hex(x, y, brightness.unwrap_or(DEFAULT_BRIGHTNESS)),
        _ => FALLBACK_HEX.to_string(),
    }
}

fn gamma_correct(channel: f64) -> f64 {
    if channel <= 0.0031308 {
        12.92 * channel
    } else {
        1.055 * channel.powf(1.0 / 2.4) - 0.055
    }
}

fn to_channel_byte(channel: f64) -> u8 {
    (channel * 255.0).round().clamp(0.0, 255.0) as u8
}
