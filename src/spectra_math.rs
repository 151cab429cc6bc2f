//! Dark/bright normalization of raw spectra.
//!
//! The normalization state is an immutable snapshot: replacing a reference
//! produces a new [`NormalizationState`] rather than mutating one shared by
//! concurrent readers (live plot, recorder). References are stored behind
//! `Arc` so snapshots are cheap to clone across tasks.

use std::sync::Arc;

/// Immutable snapshot of the dark/bright references used for normalization.
///
/// A deleted reference keeps an all-ones vector with its flag cleared, so the
/// bright-only division can never hit a hard zero from an uninitialized
/// buffer. With both references present the output is the absorbance
/// `-ln((frame - dark) / (bright - dark))`; the linear transmittance form
/// `1 - (frame - dark) / (bright - dark)` used by earlier revisions of the
/// instrument software was dropped in favor of this one.
#[derive(Debug, Clone)]
pub struct NormalizationState {
    array_size: usize,
    has_dark: bool,
    has_bright: bool,
    dark: Arc<Vec<f64>>,
    bright: Arc<Vec<f64>>,
}

impl NormalizationState {
    /// A state with no references: normalization is the identity.
    pub fn identity(array_size: usize) -> Self {
        let ones = Arc::new(vec![1.0; array_size]);
        Self {
            array_size,
            has_dark: false,
            has_bright: false,
            dark: Arc::clone(&ones),
            bright: ones,
        }
    }

    /// Snapshot with the dark reference replaced.
    pub fn with_dark(&self, dark: Arc<Vec<f64>>) -> Self {
        debug_assert_eq!(dark.len(), self.array_size);
        Self {
            has_dark: true,
            dark,
            ..self.clone()
        }
    }

    /// Snapshot with the bright reference replaced.
    pub fn with_bright(&self, bright: Arc<Vec<f64>>) -> Self {
        debug_assert_eq!(bright.len(), self.array_size);
        Self {
            has_bright: true,
            bright,
            ..self.clone()
        }
    }

    /// Snapshot with the dark reference deleted (reset to ones).
    pub fn without_dark(&self) -> Self {
        Self {
            has_dark: false,
            dark: Arc::new(vec![1.0; self.array_size]),
            ..self.clone()
        }
    }

    /// Snapshot with the bright reference deleted (reset to ones).
    pub fn without_bright(&self) -> Self {
        Self {
            has_bright: false,
            bright: Arc::new(vec![1.0; self.array_size]),
            ..self.clone()
        }
    }

    /// Whether a dark reference is applied.
    pub fn has_dark(&self) -> bool {
        self.has_dark
    }

    /// Whether a bright reference is applied.
    pub fn has_bright(&self) -> bool {
        self.has_bright
    }

    /// The dark reference vector.
    pub fn dark(&self) -> &[f64] {
        &self.dark
    }

    /// The bright reference vector.
    pub fn bright(&self) -> &[f64] {
        &self.bright
    }

    /// Expected sample count per frame.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Apply the normalization to one raw frame.
    ///
    /// - no reference: the input, unchanged
    /// - dark only: `frame - dark`
    /// - bright only: `frame / bright`
    /// - both: absorbance `-ln((frame - dark) / (bright - dark))`
    ///
    /// Division by zero and negative logarithms follow IEEE semantics
    /// (inf/NaN); downstream consumers mask invalid values before display
    /// or persistence.
    pub fn normalize(&self, samples: &[f64]) -> Vec<f64> {
        match (self.has_dark, self.has_bright) {
            (false, false) => samples.to_vec(),
            (true, false) => samples
                .iter()
                .zip(self.dark.iter())
                .map(|(y, d)| y - d)
                .collect(),
            (false, true) => samples
                .iter()
                .zip(self.bright.iter())
                .map(|(y, b)| y / b)
                .collect(),
            (true, true) => samples
                .iter()
                .zip(self.dark.iter().zip(self.bright.iter()))
                .map(|(y, (d, b))| -(((y - d) / (b - d)).ln()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn identity_when_no_references() {
        let state = NormalizationState::identity(4);
        let frame = [1.0, 2.5, 3.0, 4.5];
        assert_eq!(state.normalize(&frame), frame.to_vec());
    }

    #[test]
    fn dark_only_subtracts() {
        let state = NormalizationState::identity(3).with_dark(Arc::new(vec![1.0, 1.0, 2.0]));
        let out = state.normalize(&[3.0, 4.0, 5.0]);
        assert_eq!(out, vec![2.0, 3.0, 3.0]);
    }

    #[test]
    fn bright_only_divides() {
        let state = NormalizationState::identity(3).with_bright(Arc::new(vec![2.0, 4.0, 8.0]));
        let out = state.normalize(&[1.0, 1.0, 1.0]);
        assert_eq!(out, vec![0.5, 0.25, 0.125]);
    }

    #[test]
    fn dark_and_bright_is_absorbance() {
        // With dark = 0 and bright = 1, absorbance reduces to -ln(frame).
        let state = NormalizationState::identity(3)
            .with_dark(Arc::new(vec![0.0; 3]))
            .with_bright(Arc::new(vec![1.0; 3]));
        let out = state.normalize(&[1.0, std::f64::consts::E, 0.5]);
        assert!(approx_eq(out[0], 0.0));
        assert!(approx_eq(out[1], -1.0));
        assert!(approx_eq(out[2], std::f64::consts::LN_2));
    }

    #[test]
    fn division_by_zero_yields_ieee_values() {
        // bright == dark makes the denominator zero; no panic, inf/NaN out.
        let state = NormalizationState::identity(2)
            .with_dark(Arc::new(vec![1.0, 1.0]))
            .with_bright(Arc::new(vec![1.0, 1.0]));
        let out = state.normalize(&[2.0, 1.0]);
        assert!(out.iter().all(|v| !v.is_finite()));
    }

    #[test]
    fn deleting_reference_restores_identity_flags() {
        let state = NormalizationState::identity(2)
            .with_dark(Arc::new(vec![5.0, 5.0]))
            .without_dark();
        assert!(!state.has_dark());
        assert_eq!(state.dark(), &[1.0, 1.0]);
        // Identity again because both flags are off.
        assert_eq!(state.normalize(&[7.0, 8.0]), vec![7.0, 8.0]);
    }
}
