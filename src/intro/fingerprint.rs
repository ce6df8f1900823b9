use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::source::Frame;

// Side of the low-frequency DCT block kept in the fingerprint.
const BLOCK_SIZE: usize = 8;

/// Perceptual fingerprint of a single frame.
///
/// Bit `row * 8 + col` is set when DCT coefficient `(row, col)` of the downscaled luma
/// image is above the median of the 8x8 low-frequency block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Number of bits in a fingerprint. Independent of the hash size.
    pub const LEN: u32 = (BLOCK_SIZE * BLOCK_SIZE) as u32;

    /// Number of differing bits.
    #[inline]
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        u64::count_ones(self.0 ^ other.0)
    }

    /// Returns `1 - distance / LEN`, in `[0, 1]`.
    #[inline]
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        1.0 - self.distance(other) as f64 / Self::LEN as f64
    }
}

/// Computes DCT-based perceptual fingerprints for frames.
#[derive(Copy, Clone, Debug)]
pub struct Fingerprinter {
    hash_size: u32,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(super::DEFAULT_HASH_SIZE)
    }
}

impl Fingerprinter {
    /// `hash_size` is clamped to `[8, MAX_HASH_SIZE]`; 8 is the size of the kept DCT block.
    pub fn new(hash_size: u32) -> Self {
        Self {
            hash_size: hash_size.clamp(BLOCK_SIZE as u32, super::MAX_HASH_SIZE),
        }
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    /// Fingerprints a frame. Returns `None` for an empty frame.
    pub fn fingerprint(&self, frame: &Frame) -> Option<Fingerprint> {
        if frame.width() == 0 || frame.height() == 0 {
            return None;
        }

        let n = self.hash_size;
        let luma = imageops::grayscale(frame);
        let small = imageops::resize(&luma, n, n, FilterType::Triangle);
        let pixels: Vec<f64> = small.as_raw().iter().map(|&p| p as f64).collect();

        let block = dct_low_frequencies(&pixels, n as usize, BLOCK_SIZE);
        let med = median(&block);

        let mut hash = 0u64;
        for (idx, coefficient) in block.iter().enumerate() {
            if *coefficient > med {
                hash |= 1u64 << idx;
            }
        }

        Some(Fingerprint(hash))
    }
}

// Orthonormal 2-D DCT-II of an `n x n` row-major image, returning only the top-left
// `keep x keep` coefficients (row-major).
fn dct_low_frequencies(pixels: &[f64], n: usize, keep: usize) -> Vec<f64> {
    debug_assert_eq!(pixels.len(), n * n);
    let keep = keep.min(n);

    let scale = |k: usize| {
        if k == 0 {
            (1.0 / n as f64).sqrt()
        } else {
            (2.0 / n as f64).sqrt()
        }
    };
    let basis = |k: usize, x: usize| {
        (std::f64::consts::PI * (2 * x + 1) as f64 * k as f64 / (2 * n) as f64).cos()
    };

    // Transform rows first, keeping only the low horizontal frequencies.
    let mut rows = vec![0.0; n * keep];
    for y in 0..n {
        for u in 0..keep {
            let sum: f64 = (0..n).map(|x| pixels[y * n + x] * basis(u, x)).sum();
            rows[y * keep + u] = scale(u) * sum;
        }
    }

    let mut out = vec![0.0; keep * keep];
    for v in 0..keep {
        for u in 0..keep {
            let sum: f64 = (0..n).map(|y| rows[y * keep + u] * basis(v, y)).sum();
            out[v * keep + u] = scale(v) * sum;
        }
    }

    out
}

// Median of the values; the mean of the two middle values for even lengths.
fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // Smooth, non-symmetric test pattern with plenty of low-frequency energy.
    fn pattern(width: u32, height: u32) -> Frame {
        Frame::from_fn(width, height, |x, y| {
            let (fx, fy) = (x as f64 / width as f64, y as f64 / height as f64);
            let v = 128.0
                + 90.0 * (fx * 5.0).sin() * (fy * 3.0 + 0.4).cos()
                + 30.0 * ((fx + 2.0 * fy) * 4.0).sin();
            let v = v.clamp(0.0, 255.0) as u8;
            image::Rgb([v, v / 2, 255 - v])
        })
    }

    fn inverted(frame: &Frame) -> Frame {
        let mut out = frame.clone();
        imageops::invert(&mut out);
        out
    }

    #[test]
    fn test_similarity_identity_and_distance() {
        let a = Fingerprint(0xDEAD_BEEF_0123_4567);
        let b = Fingerprint(a.0 ^ 0xFFFF);
        assert_eq!(a.similarity(&a), 1.0);
        assert_eq!(a.distance(&b), 16);
        assert_eq!(a.similarity(&b), 0.75);
        assert_eq!(b.similarity(&a), a.similarity(&b));
        assert_eq!(Fingerprint(0).similarity(&Fingerprint(u64::MAX)), 0.0);
    }

    #[test]
    fn test_identical_frames_match() {
        let fingerprinter = Fingerprinter::default();
        let a = fingerprinter.fingerprint(&pattern(64, 48)).unwrap();
        let b = fingerprinter.fingerprint(&pattern(64, 48)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.similarity(&b), 1.0);
    }

    #[test]
    fn test_inverted_frame_differs() {
        let fingerprinter = Fingerprinter::default();
        let frame = pattern(64, 48);
        let a = fingerprinter.fingerprint(&frame).unwrap();
        let b = fingerprinter.fingerprint(&inverted(&frame)).unwrap();
        assert!(a.similarity(&b) < 0.5, "similarity = {}", a.similarity(&b));
    }

    #[test]
    fn test_hash_size_does_not_change_length() {
        let frame = pattern(80, 60);
        for hash_size in [8, 16, 32] {
            let fingerprinter = Fingerprinter::new(hash_size);
            assert!(fingerprinter.fingerprint(&frame).is_some());
        }
        assert_eq!(Fingerprint::LEN, 64);
        assert_eq!(Fingerprinter::new(4).hash_size(), 8);
        assert_eq!(Fingerprinter::new(100_000).hash_size(), crate::intro::MAX_HASH_SIZE);
    }

    #[test]
    fn test_empty_frame_has_no_fingerprint() {
        let fingerprinter = Fingerprinter::default();
        assert!(fingerprinter.fingerprint(&Frame::new(0, 0)).is_none());
    }

    #[test]
    fn test_dct_of_constant_block() {
        let n = 16;
        let pixels = vec![100.0; n * n];
        let block = dct_low_frequencies(&pixels, n, 8);
        assert_eq!(block.len(), 64);
        // DC term of an orthonormal DCT is mean * n.
        assert!((block[0] - 1600.0).abs() < 1e-9);
        assert!(block[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }
}
