//! Background layer rendering.
//!
//! Wallpapers come in three forms: solid colors and linear gradients parsed
//! from CSS-like strings, and images scaled to cover the output. The layer is
//! static for the whole export, so it is rendered exactly once and reused for
//! every frame.

use image::GenericImageView;

use crate::error::{ExportError, ExportResult};
use crate::project::WallpaperSpec;

/// Parsed background paint.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundPaint {
    /// Plain black.
    None,
    Solid([u8; 4]),
    Gradient {
        start: [u8; 4],
        end: [u8; 4],
        /// CSS gradient angle in degrees (0 = bottom-to-top).
        angle_deg: f32,
    },
    Image {
        path: String,
    },
}

/// Parse a CSS-like color: `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(r, g, b)`,
/// `rgba(r, g, b, a)`.
pub fn parse_color(input: &str) -> Option<[u8; 4]> {
    let input = input.trim();
    if let Some(hex) = input.strip_prefix('#') {
        return match hex.len() {
            3 => {
                let expand = |c: char| {
                    c.to_digit(16).map(|d| (d * 17) as u8)
                };
                let mut chars = hex.chars();
                let r = expand(chars.next()?)?;
                let g = expand(chars.next()?)?;
                let b = expand(chars.next()?)?;
                Some([r, g, b, 255])
            }
            6 | 8 => {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                let a = if hex.len() == 8 {
                    u8::from_str_radix(&hex[6..8], 16).ok()?
                } else {
                    255
                };
                Some([r, g, b, a])
            }
            _ => None,
        };
    }

    let (body, has_alpha) = if let Some(rest) = input.strip_prefix("rgba(") {
        (rest.strip_suffix(')')?, true)
    } else if let Some(rest) = input.strip_prefix("rgb(") {
        (rest.strip_suffix(')')?, false)
    } else {
        return None;
    };

    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() != if has_alpha { 4 } else { 3 } {
        return None;
    }
    let r = parts[0].parse::<f32>().ok()?;
    let g = parts[1].parse::<f32>().ok()?;
    let b = parts[2].parse::<f32>().ok()?;
    let a = if has_alpha {
        (parts[3].parse::<f32>().ok()? * 255.0).round()
    } else {
        255.0
    };
    Some([
        r.clamp(0.0, 255.0) as u8,
        g.clamp(0.0, 255.0) as u8,
        b.clamp(0.0, 255.0) as u8,
        a.clamp(0.0, 255.0) as u8,
    ])
}

/// Parse `linear-gradient(135deg, #667eea, #764ba2)`. The angle is optional
/// and defaults to 180deg (top-to-bottom).
fn parse_linear_gradient(input: &str) -> Option<BackgroundPaint> {
    let body = input
        .trim()
        .strip_prefix("linear-gradient(")?
        .strip_suffix(')')?;
    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return None;
    }

    let (angle_deg, color_parts) = if let Some(angle) = parts[0].strip_suffix("deg") {
        (angle.trim().parse::<f32>().ok()?, &parts[1..])
    } else {
        (180.0, &parts[..])
    };
    if color_parts.len() != 2 {
        return None;
    }
    Some(BackgroundPaint::Gradient {
        start: parse_color(color_parts[0])?,
        end: parse_color(color_parts[1])?,
        angle_deg,
    })
}

impl BackgroundPaint {
    /// Resolve a wallpaper spec into a paint, rejecting unparseable strings.
    pub fn from_spec(spec: &WallpaperSpec) -> ExportResult<BackgroundPaint> {
        match spec {
            WallpaperSpec::None => Ok(BackgroundPaint::None),
            WallpaperSpec::Image { path } => Ok(BackgroundPaint::Image { path: path.clone() }),
            WallpaperSpec::Css { value } => {
                if let Some(gradient) = parse_linear_gradient(value) {
                    return Ok(gradient);
                }
                if let Some(color) = parse_color(value) {
                    return Ok(BackgroundPaint::Solid(color));
                }
                Err(ExportError::InvalidConfig(format!(
                    "unparseable wallpaper value: '{}'",
                    value
                )))
            }
        }
    }
}

/// Render the background layer once for the whole export.
///
/// Returns an opaque RGBA buffer of `out_w * out_h * 4` bytes.
pub fn render_background(
    paint: &BackgroundPaint,
    out_w: u32,
    out_h: u32,
    blur_radius_px: f32,
) -> ExportResult<Vec<u8>> {
    let mut buffer = match paint {
        BackgroundPaint::None => vec![0u8; (out_w * out_h * 4) as usize],
        BackgroundPaint::Solid(color) => {
            let mut buffer = Vec::with_capacity((out_w * out_h * 4) as usize);
            for _ in 0..(out_w * out_h) {
                buffer.extend_from_slice(color);
            }
            buffer
        }
        BackgroundPaint::Gradient {
            start,
            end,
            angle_deg,
        } => render_gradient(*start, *end, *angle_deg, out_w, out_h),
        BackgroundPaint::Image { path } => render_image_cover(path, out_w, out_h)?,
    };

    // Opaque output: the background is the bottom layer.
    for px in buffer.chunks_exact_mut(4) {
        px[3] = 255;
    }

    if blur_radius_px >= 0.5 && !matches!(paint, BackgroundPaint::None | BackgroundPaint::Solid(_))
    {
        gaussian_blur(&mut buffer, out_w, out_h, blur_radius_px);
    }

    Ok(buffer)
}

/// CSS linear gradient: angle 0deg points up, 90deg points right; color
/// stops are projected onto the gradient line through the center.
fn render_gradient(start: [u8; 4], end: [u8; 4], angle_deg: f32, out_w: u32, out_h: u32) -> Vec<u8> {
    let rad = angle_deg.to_radians();
    let (dir_x, dir_y) = (rad.sin(), -rad.cos());
    let cx = out_w as f32 * 0.5;
    let cy = out_h as f32 * 0.5;
    // Half-length of the gradient line across the whole frame.
    let half_len = (out_w as f32 * dir_x.abs() + out_h as f32 * dir_y.abs()) * 0.5;

    let mut buffer = vec![0u8; (out_w * out_h * 4) as usize];
    for y in 0..out_h {
        for x in 0..out_w {
            let proj = (x as f32 - cx) * dir_x + (y as f32 - cy) * dir_y;
            let t = ((proj / half_len.max(1.0)) * 0.5 + 0.5).clamp(0.0, 1.0);
            let idx = ((y * out_w + x) * 4) as usize;
            for c in 0..4 {
                buffer[idx + c] =
                    (start[c] as f32 + (end[c] as f32 - start[c] as f32) * t).round() as u8;
            }
        }
    }
    buffer
}

/// Decode an image and scale it to cover the output (center-cropped).
fn render_image_cover(path: &str, out_w: u32, out_h: u32) -> ExportResult<Vec<u8>> {
    let img = image::open(path).map_err(|e| {
        ExportError::InvalidConfig(format!("failed to load wallpaper image '{}': {}", path, e))
    })?;
    let (src_w, src_h) = img.dimensions();
    let rgba = img.to_rgba8();

    let scale = (out_w as f32 / src_w as f32).max(out_h as f32 / src_h as f32);
    let crop_w = out_w as f32 / scale;
    let crop_h = out_h as f32 / scale;
    let crop_x = (src_w as f32 - crop_w) * 0.5;
    let crop_y = (src_h as f32 - crop_h) * 0.5;

    let mut buffer = vec![0u8; (out_w * out_h * 4) as usize];
    for y in 0..out_h {
        for x in 0..out_w {
            let sx = (crop_x + (x as f32 + 0.5) / scale) as u32;
            let sy = (crop_y + (y as f32 + 0.5) / scale) as u32;
            let sx = sx.min(src_w - 1);
            let sy = sy.min(src_h - 1);
            let px = rgba.get_pixel(sx, sy);
            let idx = ((y * out_w + x) * 4) as usize;
            buffer[idx..idx + 4].copy_from_slice(&px.0);
        }
    }
    Ok(buffer)
}

/// Separable box-approximated gaussian blur, three passes per axis.
///
/// Three box blurs converge on a gaussian closely enough for a wallpaper and
/// run in O(n) per pass independent of the radius.
pub fn gaussian_blur(buffer: &mut [u8], width: u32, height: u32, sigma: f32) {
    let boxes = boxes_for_gauss(sigma, 3);
    let mut scratch = buffer.to_vec();
    for radius in boxes {
        box_blur_horizontal(buffer, &mut scratch, width, height, radius);
        box_blur_vertical(&scratch, buffer, width, height, radius);
    }
}

/// Ideal box sizes approximating a gaussian of the given sigma.
fn boxes_for_gauss(sigma: f32, n: usize) -> Vec<usize> {
    let w_ideal = ((12.0 * sigma * sigma / n as f32) + 1.0).sqrt();
    let mut wl = w_ideal.floor() as i32;
    if wl % 2 == 0 {
        wl -= 1;
    }
    let wu = wl + 2;
    let m_ideal =
        (12.0 * sigma * sigma - (n as f32) * (wl * wl) as f32 - 4.0 * n as f32 * wl as f32
            - 3.0 * n as f32)
            / (-4.0 * wl as f32 - 4.0);
    let m = m_ideal.round() as usize;
    (0..n)
        .map(|i| {
            let size = if i < m { wl } else { wu };
            ((size - 1) / 2).max(0) as usize
        })
        .collect()
}

fn box_blur_horizontal(src: &[u8], dst: &mut [u8], width: u32, height: u32, radius: usize) {
    let w = width as usize;
    let norm = 1.0 / (2 * radius + 1) as f32;
    for y in 0..height as usize {
        let row = y * w * 4;
        let mut acc = [0.0f32; 4];
        for i in -(radius as i32)..=(radius as i32) {
            let xi = i.clamp(0, w as i32 - 1) as usize;
            for c in 0..4 {
                acc[c] += src[row + xi * 4 + c] as f32;
            }
        }
        for x in 0..w {
            for c in 0..4 {
                dst[row + x * 4 + c] = (acc[c] * norm).round().clamp(0.0, 255.0) as u8;
            }
            let add = ((x + radius + 1).min(w - 1)) * 4;
            let sub = (x.saturating_sub(radius)) * 4;
            for c in 0..4 {
                acc[c] += src[row + add + c] as f32 - src[row + sub + c] as f32;
            }
        }
    }
}

fn box_blur_vertical(src: &[u8], dst: &mut [u8], width: u32, height: u32, radius: usize) {
    let w = width as usize;
    let h = height as usize;
    let norm = 1.0 / (2 * radius + 1) as f32;
    for x in 0..w {
        let mut acc = [0.0f32; 4];
        for i in -(radius as i32)..=(radius as i32) {
            let yi = i.clamp(0, h as i32 - 1) as usize;
            for c in 0..4 {
                acc[c] += src[(yi * w + x) * 4 + c] as f32;
            }
        }
        for y in 0..h {
            for c in 0..4 {
                dst[(y * w + x) * 4 + c] = (acc[c] * norm).round().clamp(0.0, 255.0) as u8;
            }
            let add = (y + radius + 1).min(h - 1);
            let sub = y.saturating_sub(radius);
            for c in 0..4 {
                acc[c] += src[(add * w + x) * 4 + c] as f32 - src[(sub * w + x) * 4 + c] as f32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_colors() {
        assert_eq!(parse_color("#ffffff"), Some([255, 255, 255, 255]));
        assert_eq!(parse_color("#1e1e2e"), Some([30, 30, 46, 255]));
        assert_eq!(parse_color("#ff000080"), Some([255, 0, 0, 128]));
        assert_eq!(parse_color("#f0a"), Some([255, 0, 170, 255]));
    }

    #[test]
    fn test_parse_rgb_functional() {
        assert_eq!(parse_color("rgb(30, 30, 46)"), Some([30, 30, 46, 255]));
        assert_eq!(parse_color("rgba(255, 0, 0, 0.5)"), Some([255, 0, 0, 128]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_color("#zzz"), None);
        assert_eq!(parse_color("blue"), None);
        assert_eq!(parse_color("rgb(1,2)"), None);
        assert_eq!(parse_color(""), None);
    }

    #[test]
    fn test_parse_gradient() {
        let paint = BackgroundPaint::from_spec(&WallpaperSpec::Css {
            value: "linear-gradient(135deg, #667eea, #764ba2)".to_string(),
        })
        .unwrap();
        match paint {
            BackgroundPaint::Gradient {
                start,
                end,
                angle_deg,
            } => {
                assert_eq!(start, [0x66, 0x7e, 0xea, 255]);
                assert_eq!(end, [0x76, 0x4b, 0xa2, 255]);
                assert!((angle_deg - 135.0).abs() < f32::EPSILON);
            }
            other => panic!("expected gradient, got {:?}", other),
        }
    }

    #[test]
    fn test_gradient_without_angle_defaults_top_down() {
        let paint = BackgroundPaint::from_spec(&WallpaperSpec::Css {
            value: "linear-gradient(#000000, #ffffff)".to_string(),
        })
        .unwrap();
        assert!(matches!(
            paint,
            BackgroundPaint::Gradient { angle_deg, .. } if (angle_deg - 180.0).abs() < f32::EPSILON
        ));
    }

    #[test]
    fn test_invalid_wallpaper_rejected() {
        let err = BackgroundPaint::from_spec(&WallpaperSpec::Css {
            value: "conic-gradient(red, blue)".to_string(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("unparseable"));
    }

    #[test]
    fn test_solid_background_fills_buffer() {
        let buffer =
            render_background(&BackgroundPaint::Solid([10, 20, 30, 255]), 8, 4, 0.0).unwrap();
        assert_eq!(buffer.len(), 8 * 4 * 4);
        assert_eq!(&buffer[0..4], &[10, 20, 30, 255]);
        assert_eq!(&buffer[buffer.len() - 4..], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_gradient_endpoints_180deg() {
        // 180deg: top row near the start color, bottom row near the end.
        let buffer = render_gradient([0, 0, 0, 255], [200, 200, 200, 255], 180.0, 4, 64);
        let top = buffer[0];
        let bottom = buffer[(63 * 4) * 4];
        assert!(top < 20, "top should be near start, got {}", top);
        assert!(bottom > 180, "bottom should be near end, got {}", bottom);
    }

    #[test]
    fn test_gradient_90deg_runs_left_to_right() {
        let buffer = render_gradient([0, 0, 0, 255], [200, 200, 200, 255], 90.0, 64, 4);
        let left = buffer[0];
        let right = buffer[63 * 4];
        assert!(left < 20 && right > 180);
    }

    #[test]
    fn test_blur_averages_neighbors() {
        // A white pixel on black bleeds into its neighborhood.
        let mut buffer = vec![0u8; 16 * 16 * 4];
        let center = (8 * 16 + 8) * 4;
        buffer[center] = 255;
        buffer[center + 1] = 255;
        buffer[center + 2] = 255;
        buffer[center + 3] = 255;
        gaussian_blur(&mut buffer, 16, 16, 2.0);
        let neighbor = ((8 * 16 + 9) * 4) as usize;
        assert!(buffer[neighbor] > 0, "blur should spread energy");
        assert!(buffer[center] < 255, "blur should reduce the peak");
    }
}
