//! Exposure code generation
//!
//! A coded exposure opens and closes the shutter during a single exposure
//! according to a binary sequence ("chips"). The sequence shapes the blur
//! kernel; broadband codes keep the kernel's Fourier magnitude away from zero
//! so the blur can be inverted.
//!
//! # Code kinds
//!
//! - **Box** - shutter open the whole time (conventional camera)
//! - **Random** - 50% duty cycle at seeded random positions
//! - **MURA** - quadratic residues modulo the nearest prime >= length
//! - **Optimal** - maximizes the minimum zero-padded DFT magnitude at a
//!   50% duty cycle

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::debug;

use crate::types::{ExposureError, Result};

// ============================================================
// Constants
// ============================================================

/// Near-optimal 52-chip code from Raskar, Agrawal & Tumblin (2006)
pub const RASKAR_CODE_52: &str = "1010000111000001010000110011110111010111001001100111";

/// Lengths up to this value are searched exhaustively for the optimal table
pub const MAX_SEARCH_LENGTH: usize = 14;

/// Seed used for random codes when the caller does not provide one
pub const DEFAULT_RANDOM_SEED: u64 = 0;

/// Tolerance used when comparing candidate scores during the search
const SCORE_EPSILON: f64 = 1e-12;

// ============================================================
// Types
// ============================================================

/// Exposure code family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    /// Shutter open for the whole exposure
    Box,
    /// Seeded pseudo-random chips with a 50% duty cycle
    Random,
    /// Modified Uniformly Redundant Array
    Mura,
    /// Search/table optimum of the minimum DFT magnitude
    #[default]
    Optimal,
}

impl CodeKind {
    /// All supported kinds, in display order
    pub const ALL: [CodeKind; 4] = [
        CodeKind::Box,
        CodeKind::Random,
        CodeKind::Mura,
        CodeKind::Optimal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CodeKind::Box => "box",
            CodeKind::Random => "random",
            CodeKind::Mura => "mura",
            CodeKind::Optimal => "optimal",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodeKind {
    type Err = ExposureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "box" => Ok(CodeKind::Box),
            "random" => Ok(CodeKind::Random),
            "mura" => Ok(CodeKind::Mura),
            "optimal" => Ok(CodeKind::Optimal),
            other => {
                let hint = CodeKind::ALL
                    .iter()
                    .map(|k| (k.name(), strsim::jaro_winkler(other, k.name())))
                    .filter(|(_, score)| *score > 0.8)
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(name, _)| format!(", did you mean '{}'?", name))
                    .unwrap_or_default();
                Err(ExposureError::InvalidParameter(format!(
                    "unknown code kind '{}' (expected box, random, mura or optimal){}",
                    other, hint
                )))
            }
        }
    }
}

/// Binary shutter sequence with at least one open chip
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExposureCode {
    chips: Vec<u8>,
}

impl ExposureCode {
    /// Wrap a chip sequence, validating that it is binary and non-degenerate
    pub fn new(chips: Vec<u8>) -> Result<Self> {
        if chips.is_empty() {
            return Err(ExposureError::InvalidParameter(
                "exposure code must have at least one chip".to_string(),
            ));
        }
        if let Some(bad) = chips.iter().find(|&&c| c > 1) {
            return Err(ExposureError::InvalidParameter(format!(
                "exposure code chips must be 0 or 1, found {}",
                bad
            )));
        }
        if !chips.contains(&1) {
            return Err(ExposureError::InvalidParameter(
                "exposure code must open the shutter at least once".to_string(),
            ));
        }
        Ok(Self { chips })
    }

    /// Parse a string of `0`/`1` characters
    pub fn parse(bits: &str) -> Result<Self> {
        let chips = bits
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| match c {
                '0' => Ok(0),
                '1' => Ok(1),
                other => Err(ExposureError::InvalidParameter(format!(
                    "invalid chip character '{}'",
                    other
                ))),
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::new(chips)
    }

    pub fn chips(&self) -> &[u8] {
        &self.chips
    }

    pub fn len(&self) -> usize {
        self.chips.len()
    }

    /// Always false; a valid code has at least one chip
    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    /// Number of open-shutter chips
    pub fn open_count(&self) -> usize {
        self.chips.iter().filter(|&&c| c == 1).count()
    }

    /// Magnitude of the DFT of the mass-normalized code, zero-padded to
    /// `pad_len` samples (`pad_len` is raised to the code length if smaller).
    pub fn spectrum(&self, pad_len: usize) -> Vec<f64> {
        let weights: Vec<f64> = self.chips.iter().map(|&c| c as f64).collect();
        dft_magnitudes(&weights, pad_len.max(self.len()))
    }

    /// Minimum magnitude of the zero-padded (linear convolution) spectrum
    pub fn min_dft_magnitude(&self) -> f64 {
        self.spectrum(2 * self.len())
            .into_iter()
            .fold(f64::INFINITY, f64::min)
    }
}

impl fmt::Display for ExposureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in &self.chips {
            f.write_str(if c == 1 { "1" } else { "0" })?;
        }
        Ok(())
    }
}

// ============================================================
// Code Generator
// ============================================================

/// Exposure code generator
pub struct CodeGenerator;

impl CodeGenerator {
    /// Generate a code of `length` chips.
    ///
    /// `seed` is only used by [`CodeKind::Random`]; when omitted the
    /// [`DEFAULT_RANDOM_SEED`] is used so results stay reproducible.
    pub fn generate(kind: CodeKind, length: usize, seed: Option<u64>) -> Result<ExposureCode> {
        if length < 1 {
            return Err(ExposureError::InvalidParameter(format!(
                "code length must be >= 1, got {}",
                length
            )));
        }

        let chips = match kind {
            CodeKind::Box => vec![1; length],
            CodeKind::Random => random_chips(length, seed.unwrap_or(DEFAULT_RANDOM_SEED)),
            CodeKind::Mura => mura_chips(length),
            CodeKind::Optimal => optimal_chips(length),
        };

        let code = ExposureCode::new(chips)?;
        debug!(kind = %kind, length, open = code.open_count(), "generated exposure code");
        Ok(code)
    }

    /// Generate from a kind name such as `"mura"`
    pub fn generate_named(kind: &str, length: usize, seed: Option<u64>) -> Result<ExposureCode> {
        Self::generate(kind.parse()?, length, seed)
    }
}

fn random_chips(length: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let open = (length / 2).max(1);
    let mut chips = vec![0; length];
    for i in rand::seq::index::sample(&mut rng, length, open) {
        chips[i] = 1;
    }
    chips
}

/// Linear MURA: chip `i` is open when `i` is a nonzero quadratic residue
/// modulo the smallest prime `p >= length`; the sequence is truncated to
/// `length`.
fn mura_chips(length: usize) -> Vec<u8> {
    let p = next_prime(length.max(2));
    let mut residue = vec![false; p];
    for k in 1..p {
        residue[(k * k) % p] = true;
    }
    let mut chips: Vec<u8> = (0..length).map(|i| u8::from(i != 0 && residue[i])).collect();
    // Only a single-chip MURA truncates to all-closed.
    if !chips.contains(&1) {
        chips[0] = 1;
    }
    chips
}

fn optimal_chips(length: usize) -> Vec<u8> {
    if length == RASKAR_CODE_52.len() {
        return RASKAR_CODE_52.bytes().map(|b| b - b'0').collect();
    }
    match optimal_table().get(length) {
        Some(chips) if !chips.is_empty() => chips.clone(),
        _ => mura_chips(length),
    }
}

/// Exhaustive-search optima indexed by length (index 0 is unused).
///
/// Built once on first use and read-only afterwards.
pub fn optimal_table() -> &'static [Vec<u8>] {
    static TABLE: OnceLock<Vec<Vec<u8>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![Vec::new()];
        table.extend((1..=MAX_SEARCH_LENGTH).map(search_optimal));
        table
    })
}

/// Find the code of `length` chips whose zero-padded DFT has the largest
/// minimum magnitude. Ties go to the lower magnitude variance, then to the
/// first candidate in bit order.
///
/// Candidates keep half the chips open (light throughput) and open the first
/// and last chip so the blur spans the full length.
fn search_optimal(length: usize) -> Vec<u8> {
    let open_target = length.div_ceil(2).max(length.min(2)) as u32;
    let ends = if length >= 2 { 1u32 | (1u32 << (length - 1)) } else { 1 };
    let pad = 2 * length;
    let bins = pad / 2 + 1;
    let twiddles: Vec<Vec<(f64, f64)>> = (0..bins)
        .map(|k| {
            (0..length)
                .map(|n| {
                    let phase = -2.0 * PI * (k * n) as f64 / pad as f64;
                    (phase.cos(), phase.sin())
                })
                .collect()
        })
        .collect();

    let mut best_mask = (1u32 << length) - 1;
    let mut best_min = f64::NEG_INFINITY;
    let mut best_var = f64::INFINITY;

    for mask in 1u32..(1u32 << length) {
        if mask.count_ones() != open_target || mask & ends != ends {
            continue;
        }
        let open = mask.count_ones() as f64;
        let mut min_mag = f64::INFINITY;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for row in &twiddles {
            let (mut re, mut im) = (0.0, 0.0);
            for (n, &(c, s)) in row.iter().enumerate() {
                if mask & (1 << n) != 0 {
                    re += c;
                    im += s;
                }
            }
            let mag = (re * re + im * im).sqrt() / open;
            min_mag = min_mag.min(mag);
            sum += mag;
            sum_sq += mag * mag;
        }
        let mean = sum / bins as f64;
        let var = sum_sq / bins as f64 - mean * mean;

        let better = min_mag > best_min + SCORE_EPSILON
            || ((min_mag - best_min).abs() <= SCORE_EPSILON && var < best_var - SCORE_EPSILON);
        if better {
            best_mask = mask;
            best_min = min_mag;
            best_var = var;
        }
    }

    (0..length).map(|n| ((best_mask >> n) & 1) as u8).collect()
}

fn dft_magnitudes(weights: &[f64], pad_len: usize) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    let norm = if total.abs() > 0.0 { total } else { 1.0 };
    (0..pad_len)
        .map(|k| {
            let (mut re, mut im) = (0.0, 0.0);
            for (n, &w) in weights.iter().enumerate() {
                let phase = -2.0 * PI * ((k * n) % pad_len) as f64 / pad_len as f64;
                re += w * phase.cos();
                im += w * phase.sin();
            }
            (re * re + im * im).sqrt() / norm
        })
        .collect()
}

fn next_prime(n: usize) -> usize {
    (n.max(2)..).find(|&k| is_prime(k)).unwrap_or(2)
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

// ============================================================
// Tests
// ============================================================
