//! Perceptual hashing
//!
//! Images are fingerprinted with a 64-bit difference hash: the image is
//! reduced to a 9x8 luminance grid and each bit records whether a sample is
//! brighter than its right-hand neighbour. Re-encoding, rescaling and small
//! overlays move only a few bits, so visually identical images stay within a
//! small Hamming distance of each other.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use std::fmt;
use std::str::FromStr;

/// Grid width sampled by the difference hash (one extra column for the comparisons)
const GRID_WIDTH: u32 = 9;

/// Grid height sampled by the difference hash
const GRID_HEIGHT: u32 = 8;

/// A 64-bit perceptual fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Number of differing bit positions
    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Returns true if `other` is within `threshold` bits of this fingerprint
    pub fn is_near(&self, other: &Fingerprint, threshold: u32) -> bool {
        self.hamming_distance(other) <= threshold
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(format!("fingerprint must be 16 hex digits, got '{}'", s));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| format!("invalid fingerprint '{}': {}", s, e))
    }
}

/// Computes the difference hash of a decoded image
pub fn dhash(image: &DynamicImage) -> Fingerprint {
    let luma = image.to_luma8();
    let grid = imageops::resize(&luma, GRID_WIDTH, GRID_HEIGHT, FilterType::Triangle);

    let mut bits = 0u64;
    for y in 0..GRID_HEIGHT {
        for x in 0..GRID_WIDTH - 1 {
            let left = grid.get_pixel(x, y)[0];
            let right = grid.get_pixel(x + 1, y)[0];
            bits <<= 1;
            if left > right {
                bits |= 1;
            }
        }
    }

    Fingerprint(bits)
}

/// Decodes raw image bytes and computes their fingerprint
pub fn fingerprint_bytes(bytes: &[u8]) -> Result<Fingerprint, image::ImageError> {
    let image = image::load_from_memory(bytes)?;
    Ok(dhash(&image))
}
