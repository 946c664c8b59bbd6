//! Dominant hue extraction
//!
//! A frame is shrunk to a small square, converted to HSV with the 8-bit
//! hue convention (degrees halved, 0-179) and the most common hue is
//! rescaled to the Hue bridge range.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::HueSample;

/// Number of distinct 8-bit hue values (0-179)
pub const HUE_BINS: usize = 180;

/// Upper end of the bridge hue scale that an 8-bit hue of 179 maps onto.
/// The conversion ratio is 179 / 65280.
const BRIDGE_HUE_SPAN: u32 = 65280;
const MAX_HUE: u32 = 179;

/// Find the dominant hue of `frame` after resizing it to
/// `target_size` x `target_size`.
///
/// Returns `None` if the resized image has no pixels.
pub fn extract(frame: &RgbImage, target_size: u32) -> Option<HueSample> {
    if target_size == 0 || frame.width() == 0 || frame.height() == 0 {
        return None;
    }
    let small = imageops::resize(frame, target_size, target_size, FilterType::Nearest);
    let hues = small.pixels().map(|p| rgb_to_hue(p[0], p[1], p[2]));
    dominant_hue(hues).map(to_bridge_hue)
}

/// Hue channel of an RGB pixel, OpenCV 8-bit convention (0-179).
///
/// Grey pixels (no chroma) have hue 0.
pub fn rgb_to_hue(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta == 0 {
        return 0;
    }

    let delta = delta as f32;
    let degrees = if max == r {
        60.0 * (g - b) as f32 / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) as f32 / delta
    } else {
        240.0 + 60.0 * (r - g) as f32 / delta
    };
    let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };

    // 359.x degrees rounds up to 180, which is red again
    ((degrees / 2.0).round() as u32 % HUE_BINS as u32) as u8
}

/// Most frequent value of an 8-bit hue channel. Ties go to the lowest hue.
pub fn dominant_hue(hues: impl IntoIterator<Item = u8>) -> Option<u8> {
    let mut histogram = [0u32; HUE_BINS];
    let mut total = 0usize;
    for hue in hues {
        histogram[usize::from(hue).min(HUE_BINS - 1)] += 1;
        total += 1;
    }
    if total == 0 {
        return None;
    }

    let mut best = 0usize;
    for (hue, &count) in histogram.iter().enumerate() {
        if count > histogram[best] {
            best = hue;
        }
    }
    Some(best as u8)
}

/// Rescale an 8-bit hue to the bridge range: `floor(hue / (179 / 65280))`.
pub fn to_bridge_hue(hue: u8) -> HueSample {
    let hue = u32::from(hue).min(MAX_HUE);
    // at most 65280, fits in u16
    (hue * BRIDGE_HUE_SPAN / MAX_HUE) as HueSample
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Pure-green-dominant pixel whose 8-bit hue is exactly 42 (84 degrees)
    const HUE_42: Rgb<u8> = Rgb([153, 255, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    fn uniform(width: u32, height: u32, color: Rgb<u8>) -> RgbImage {
        RgbImage::from_pixel(width, height, color)
    }

    #[test]
    fn test_rgb_to_hue_primaries() {
        assert_eq!(rgb_to_hue(255, 0, 0), 0);
        assert_eq!(rgb_to_hue(255, 255, 0), 30);
        assert_eq!(rgb_to_hue(0, 255, 0), 60);
        assert_eq!(rgb_to_hue(0, 255, 255), 90);
        assert_eq!(rgb_to_hue(0, 0, 255), 120);
        assert_eq!(rgb_to_hue(255, 0, 255), 150);
        assert_eq!(rgb_to_hue(153, 255, 0), 42);
    }

    #[test]
    fn test_rgb_to_hue_grey_is_zero() {
        assert_eq!(rgb_to_hue(0, 0, 0), 0);
        assert_eq!(rgb_to_hue(128, 128, 128), 0);
        assert_eq!(rgb_to_hue(255, 255, 255), 0);
    }

    #[test]
    fn test_rgb_to_hue_stays_in_range() {
        // Almost-red with a hint of blue sits just below 360 degrees
        assert_eq!(rgb_to_hue(255, 0, 1), 0);
        for r in (0..=255u16).step_by(15) {
            for g in (0..=255u16).step_by(15) {
                for b in (0..=255u16).step_by(15) {
                    assert!(rgb_to_hue(r as u8, g as u8, b as u8) < 180);
                }
            }
        }
    }

    #[test]
    fn test_to_bridge_hue_matches_ratio() {
        for hue in 0..=179u8 {
            let expected = (f64::from(hue) * 65280.0 / 179.0).floor() as u16;
            assert_eq!(to_bridge_hue(hue), expected, "hue {}", hue);
        }
        assert_eq!(to_bridge_hue(0), 0);
        assert_eq!(to_bridge_hue(42), 15317);
        assert_eq!(to_bridge_hue(179), 65280);
    }

    #[test]
    fn test_dominant_hue_tie_goes_to_lowest() {
        assert_eq!(dominant_hue([90, 10, 90, 10]), Some(10));
        assert_eq!(dominant_hue([170, 3, 3, 170, 170]), Some(170));
        assert_eq!(dominant_hue(std::iter::empty()), None);
    }

    #[test]
    fn test_uniform_image_yields_scaled_hue() {
        let colors = [
            Rgb([255, 0, 0]),
            Rgb([255, 255, 0]),
            Rgb([0, 255, 0]),
            Rgb([0, 0, 255]),
            Rgb([200, 40, 120]),
            HUE_42,
        ];
        for color in colors {
            let frame = uniform(64, 48, color);
            let hue = rgb_to_hue(color[0], color[1], color[2]);
            let expected = (u32::from(hue) * 65280 / 179) as u16;
            for size in [1, 2, 10, 100] {
                assert_eq!(extract(&frame, size), Some(expected));
            }
        }
    }

    #[test]
    fn test_dominant_region_wins_for_any_target_size() {
        // 52 of 64 columns carry hue 42, the rest are blue
        let frame = RgbImage::from_fn(64, 64, |x, _| if x < 52 { HUE_42 } else { BLUE });
        for size in 2..=32 {
            assert_eq!(extract(&frame, size), Some(to_bridge_hue(42)), "size {}", size);
        }
    }

    #[test]
    fn test_extract_empty_input() {
        assert_eq!(extract(&uniform(8, 8, BLUE), 0), None);
        assert_eq!(extract(&RgbImage::new(0, 0), 10), None);
    }
}
