//! Display stretch for 16-bit guide frames.
//!
//! Raw guide frames use a tiny fraction of the 16-bit range, so a linear conversion to
//! 8 bits renders almost black. The stretch clips the shadows at a fraction of the
//! frame's median background and then applies a midtone transfer function (MTF),
//! the same family of curve used by most astro-imaging "screen stretch" tools.
//!
//! The whole mapping is evaluated once per request into a 65536-entry lookup table,
//! so per-pixel cost is a single indexed load.

use super::{CodecError, RawFrame};
use image::GrayImage;

/// 8-bit grayscale image ready for encoding.
pub type RenderedImage = GrayImage;

const MAX_ADU: f64 = u16::MAX as f64;

// Keeps the MTF away from its degenerate endpoints (m = 0 or m = 1).
const MIN_BALANCE: f64 = 1e-6;

/// Parameters of the display stretch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchParameters {
    /// Fraction (0..=1) of the median background clipped to black.
    /// Values outside the range are clamped.
    pub black_point: f64,
    /// Midtone bias in stops. 0 is neutral, positive values brighten the midtones,
    /// negative values darken them.
    pub midtone: f64,
}

impl StretchParameters {
    /// Fixed parameters for the live preview, which offers no per-request tuning.
    pub const LIVE_PREVIEW: Self = Self {
        black_point: 0.25,
        midtone: 2.8,
    };

    pub fn new(black_point: Option<f64>, midtone: Option<f64>) -> Self {
        let defaults = Self::default();
        Self {
            black_point: black_point.unwrap_or(defaults.black_point),
            midtone: midtone.unwrap_or(defaults.midtone),
        }
    }

    fn shadows(&self, median: u16) -> f64 {
        let black_point = if self.black_point.is_nan() {
            0.0
        } else {
            self.black_point.clamp(0.0, 1.0)
        };
        black_point * (median as f64 / MAX_ADU)
    }

    fn midtone_balance(&self) -> f64 {
        let midtone = if self.midtone.is_nan() {
            0.0
        } else {
            self.midtone
        };
        // exp2 saturates to 0 or inf for extreme biases; the clamp absorbs both.
        (1.0 / (1.0 + midtone.exp2())).clamp(MIN_BALANCE, 1.0 - MIN_BALANCE)
    }

    fn lookup_table(&self, median: u16) -> Vec<u8> {
        let shadows = self.shadows(median);
        let balance = self.midtone_balance();
        let span = (1.0 - shadows).max(f64::EPSILON);

        (0..=u16::MAX)
            .map(|value| {
                let x = ((value as f64 / MAX_ADU - shadows) / span).clamp(0.0, 1.0);
                (midtone_transfer(balance, x) * 255.0)
                    .round()
                    .clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

impl Default for StretchParameters {
    fn default() -> Self {
        Self {
            black_point: 0.25,
            midtone: 2.0,
        }
    }
}

/// Maps a raw frame onto an 8-bit display image.
///
/// The curve is monotonic non-decreasing in the input sample, and the output is
/// always inside 0..=255 whatever the parameters are.
pub fn stretch(frame: &RawFrame, params: StretchParameters) -> Result<RenderedImage, CodecError> {
    let lut = params.lookup_table(median(frame.pixels()));
    let data = frame
        .pixels()
        .iter()
        .map(|&value| lut[value as usize])
        .collect::<Vec<u8>>();

    GrayImage::from_raw(frame.width(), frame.height(), data).ok_or_else(|| {
        CodecError::InvalidImage(format!(
            "pixel buffer does not fill {}x{}",
            frame.width(),
            frame.height()
        ))
    })
}

// MTF(m, x) = (m - 1) x / ((2m - 1) x - m); identity at m = 0.5.
fn midtone_transfer(balance: f64, x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else if x >= 1.0 {
        1.0
    } else {
        (balance - 1.0) * x / ((2.0 * balance - 1.0) * x - balance)
    }
}

// Lower median via a histogram, linear in the pixel count.
fn median(pixels: &[u16]) -> u16 {
    if pixels.is_empty() {
        return 0;
    }

    let mut histogram = vec![0usize; u16::MAX as usize + 1];
    for &value in pixels {
        histogram[value as usize] += 1;
    }

    let target = (pixels.len() - 1) / 2;
    let mut seen = 0;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > target {
            return value as u16;
        }
    }
    u16::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> RawFrame {
        let count = (width * height) as usize;
        let pixels = (0..count)
            .map(|i| ((i as u64 * u16::MAX as u64) / (count as u64 - 1)) as u16)
            .collect();
        RawFrame::new(width, height, pixels).unwrap()
    }

    fn sky_frame() -> RawFrame {
        // Mostly faint background with a few bright stars.
        let mut pixels = vec![1200u16; 64];
        pixels[10] = 40000;
        pixels[27] = 65535;
        pixels[50] = 9000;
        pixels[5] = 800;
        RawFrame::new(8, 8, pixels).unwrap()
    }

    #[test]
    fn test_output_keeps_dimensions() {
        let frame = ramp(7, 3);
        let image = stretch(&frame, StretchParameters::default()).unwrap();
        assert_eq!(image.dimensions(), (7, 3));
    }

    #[test]
    fn test_zero_frame_renders_black() {
        let frame = RawFrame::new(4, 4, vec![0; 16]).unwrap();
        let image = stretch(&frame, StretchParameters::default()).unwrap();
        assert!(image.as_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_neutral_midtone_is_linear_without_clipping() {
        let params = StretchParameters {
            black_point: 0.0,
            midtone: 0.0,
        };
        let frame = RawFrame::new(3, 1, vec![0, 32768, 65535]).unwrap();
        let image = stretch(&frame, params).unwrap();
        assert_eq!(image.as_raw(), &vec![0, 128, 255]);
    }

    #[test]
    fn test_curve_is_monotonic() {
        for params in [
            StretchParameters::default(),
            StretchParameters::LIVE_PREVIEW,
            StretchParameters {
                black_point: 0.9,
                midtone: -3.0,
            },
        ] {
            let lut = params.lookup_table(4000);
            assert!(lut.windows(2).all(|w| w[0] <= w[1]), "{:?}", params);
        }
    }

    #[test]
    fn test_higher_black_point_darkens() {
        let frame = sky_frame();
        let low = stretch(
            &frame,
            StretchParameters {
                black_point: 0.1,
                midtone: 2.0,
            },
        )
        .unwrap();
        let high = stretch(
            &frame,
            StretchParameters {
                black_point: 1.0,
                midtone: 2.0,
            },
        )
        .unwrap();

        for (l, h) in low.as_raw().iter().zip(high.as_raw()) {
            assert!(h <= l);
        }
        // The background itself is clipped at black_point = 1.
        assert_eq!(high.get_pixel(0, 0).0[0], 0);
        assert!(low.get_pixel(0, 0).0[0] > 0);
    }

    #[test]
    fn test_positive_midtone_brightens() {
        let frame = sky_frame();
        let neutral = stretch(
            &frame,
            StretchParameters {
                black_point: 0.0,
                midtone: 0.0,
            },
        )
        .unwrap();
        let bright = stretch(
            &frame,
            StretchParameters {
                black_point: 0.0,
                midtone: 3.0,
            },
        )
        .unwrap();
        assert!(bright.get_pixel(0, 0).0[0] > neutral.get_pixel(0, 0).0[0]);
    }

    #[test]
    fn test_extreme_parameters_stay_in_range() {
        let frame = ramp(16, 16);
        for params in [
            StretchParameters {
                black_point: 1.5,
                midtone: -100.0,
            },
            StretchParameters {
                black_point: -3.0,
                midtone: 100.0,
            },
            StretchParameters {
                black_point: f64::NAN,
                midtone: f64::INFINITY,
            },
            StretchParameters {
                black_point: f64::INFINITY,
                midtone: f64::NEG_INFINITY,
            },
            StretchParameters {
                black_point: 0.5,
                midtone: f64::NAN,
            },
        ] {
            let image = stretch(&frame, params).unwrap();
            assert_eq!(image.dimensions(), (16, 16));
            // Saturated input must still map to a valid, ordered output.
            let raw = image.as_raw();
            assert!(raw.windows(2).all(|w| w[0] <= w[1]), "{:?}", params);
        }
    }

    #[test]
    fn test_new_fills_missing_parameters() {
        assert_eq!(StretchParameters::new(None, None), StretchParameters::default());
        let params = StretchParameters::new(Some(0.5), None);
        assert_eq!(params.black_point, 0.5);
        assert_eq!(params.midtone, 2.0);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), 0);
        assert_eq!(median(&[5]), 5);
        assert_eq!(median(&[9, 1, 5]), 5);
        assert_eq!(median(&[4, 1, 3, 2]), 2);
    }
}
