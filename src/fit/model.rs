//! Mixture model composition.
//!
//! A [`FitModelSpec`] is the user-facing description: an ordered list of
//! named terms, each a background or peak shape with optional initial
//! values. [`MixtureModel::compile`] turns it into a flat parameter vector
//! with qualified names (`prefix` + parameter), data-driven initial guesses
//! where none were given, and box bounds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppResult, SpectraError};

/// Highest polynomial degree accepted for a background term.
pub const MAX_POLY_DEGREE: usize = 7;

/// Peak line shapes. `amplitude` is the integrated area, not the height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakShape {
    /// `A / (sigma sqrt(2 pi)) * exp(-(x-c)^2 / (2 sigma^2))`
    Gaussian,
    /// `A / pi * sigma / ((x-c)^2 + sigma^2)`
    Lorentzian,
    /// Weighted Gaussian/Lorentzian sum with a `fraction` parameter in
    /// `[0, 1]`.
    PseudoVoigt,
}

/// Kind of one model term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `slope * x + intercept`
    Linear,
    /// `c0 + c1 x + ... + c<degree> x^degree`
    Polynomial {
        /// Degree, capped at [`MAX_POLY_DEGREE`].
        degree: usize,
    },
    /// `amplitude * exp(-x / decay)`
    Exponential,
    /// A peak shape with amplitude/center/sigma parameters.
    Peak(PeakShape),
}

impl ModelKind {
    /// Unqualified parameter names of this kind, in evaluation order.
    pub fn parameter_names(&self) -> Vec<String> {
        match self {
            ModelKind::Linear => vec!["slope".into(), "intercept".into()],
            ModelKind::Polynomial { degree } => {
                (0..=*degree).map(|d| format!("c{d}")).collect()
            }
            ModelKind::Exponential => vec!["amplitude".into(), "decay".into()],
            ModelKind::Peak(shape) => {
                let mut names = vec!["amplitude".into(), "center".into(), "sigma".into()];
                if *shape == PeakShape::PseudoVoigt {
                    names.push("fraction".into());
                }
                names
            }
        }
    }
}

/// One term of the mixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTerm {
    /// Unique name prefix; qualified parameter names are `prefix` +
    /// parameter (e.g. `g1_center`).
    pub prefix: String,
    /// Term kind.
    pub kind: ModelKind,
    /// Initial values by unqualified parameter name. Missing entries are
    /// guessed from the data at compile time.
    #[serde(default)]
    pub initial: BTreeMap<String, f64>,
    /// Hold the peak center at its initial value (peak kinds only).
    #[serde(default)]
    pub center_fixed: bool,
}

/// Ordered, additive composition of model terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitModelSpec {
    /// Terms, summed in order.
    pub terms: Vec<ModelTerm>,
}

impl FitModelSpec {
    /// Qualified parameter names in evaluation order. Independent of any
    /// data column, so callers can build table headers before fitting.
    pub fn qualified_names(&self) -> Vec<String> {
        self.terms
            .iter()
            .flat_map(|term| {
                term.kind
                    .parameter_names()
                    .into_iter()
                    .map(move |name| format!("{}{}", term.prefix, name))
            })
            .collect()
    }
}

/// One scalar parameter of a compiled model.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Qualified name (`prefix` + parameter).
    pub name: String,
    /// Initial value.
    pub init: f64,
    /// Lower box bound.
    pub min: f64,
    /// Upper box bound.
    pub max: f64,
    /// Whether the optimizer may move this parameter.
    pub vary: bool,
}

struct CompiledTerm {
    kind: ModelKind,
    /// Index of this term's first parameter in the flat vector.
    offset: usize,
}

/// A compiled mixture: flat parameter vector plus per-term evaluators.
pub struct MixtureModel {
    terms: Vec<CompiledTerm>,
    params: Vec<Parameter>,
}

impl MixtureModel {
    /// Compile a spec against one column of data. Guesses fill in any
    /// parameter without an explicit initial value.
    pub fn compile(spec: &FitModelSpec, x: &[f64], y: &[f64]) -> AppResult<Self> {
        if spec.terms.is_empty() {
            return Err(SpectraError::Fit("model spec has no terms".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for term in &spec.terms {
            if !seen.insert(term.prefix.as_str()) {
                return Err(SpectraError::Fit(format!(
                    "duplicate term prefix '{}'",
                    term.prefix
                )));
            }
            if let ModelKind::Polynomial { degree } = term.kind {
                if degree > MAX_POLY_DEGREE {
                    return Err(SpectraError::Fit(format!(
                        "polynomial degree {degree} exceeds the maximum of {MAX_POLY_DEGREE}"
                    )));
                }
            }
        }

        let mut terms = Vec::with_capacity(spec.terms.len());
        let mut params = Vec::new();
        for term in &spec.terms {
            let offset = params.len();
            terms.push(CompiledTerm {
                kind: term.kind,
                offset,
            });
            push_parameters(term, x, y, &mut params);
        }
        Ok(Self { terms, params })
    }

    /// The compiled parameters, in evaluation order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Qualified parameter names, in evaluation order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    /// Initial value vector.
    pub fn initial_values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.init).collect()
    }

    /// Evaluate the mixture at `x` with the given parameter values.
    pub fn eval(&self, x: f64, values: &[f64]) -> f64 {
        debug_assert_eq!(values.len(), self.params.len());
        self.terms
            .iter()
            .map(|term| eval_term(term, x, values))
            .sum()
    }

    /// Clamp a value vector into each parameter's box bounds, restoring
    /// fixed parameters to their initial values.
    pub fn clamp(&self, values: &mut [f64]) {
        for (v, p) in values.iter_mut().zip(&self.params) {
            if p.vary {
                *v = v.clamp(p.min, p.max);
            } else {
                *v = p.init;
            }
        }
    }
}

fn eval_term(term: &CompiledTerm, x: f64, values: &[f64]) -> f64 {
    let p = &values[term.offset..];
    match term.kind {
        ModelKind::Linear => p[0] * x + p[1],
        ModelKind::Polynomial { degree } => {
            // Horner, highest coefficient first.
            let mut acc = p[degree];
            for d in (0..degree).rev() {
                acc = acc * x + p[d];
            }
            acc
        }
        ModelKind::Exponential => p[0] * (-x / p[1]).exp(),
        ModelKind::Peak(shape) => eval_peak(shape, x, p),
    }
}

fn eval_peak(shape: PeakShape, x: f64, p: &[f64]) -> f64 {
    let (amplitude, center, sigma) = (p[0], p[1], p[2]);
    match shape {
        PeakShape::Gaussian => gaussian(x, amplitude, center, sigma),
        PeakShape::Lorentzian => lorentzian(x, amplitude, center, sigma),
        PeakShape::PseudoVoigt => {
            let fraction = p[3];
            // The Gaussian component shares the Lorentzian half-width.
            let sigma_g = sigma / (2.0 * std::f64::consts::LN_2).sqrt();
            (1.0 - fraction) * gaussian(x, amplitude, center, sigma_g)
                + fraction * lorentzian(x, amplitude, center, sigma)
        }
    }
}

fn gaussian(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
    let s = sigma.abs().max(f64::EPSILON);
    amplitude / (s * (2.0 * std::f64::consts::PI).sqrt())
        * (-(x - center).powi(2) / (2.0 * s * s)).exp()
}

fn lorentzian(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
    let s = sigma.abs().max(f64::EPSILON);
    amplitude / std::f64::consts::PI * s / ((x - center).powi(2) + s * s)
}

/// Append one term's parameters: guess from data, then apply explicit
/// initial values and the bound rules.
fn push_parameters(term: &ModelTerm, x: &[f64], y: &[f64], params: &mut Vec<Parameter>) {
    let span = x_span(x);
    for name in term.kind.parameter_names() {
        let guessed = guess(&term.kind, &name, x, y, span);
        let explicit = term.initial.get(&name).copied();
        let init = explicit.unwrap_or(guessed);

        let mut min = f64::NEG_INFINITY;
        let mut max = f64::INFINITY;
        let mut vary = true;

        if matches!(term.kind, ModelKind::Peak(_)) {
            match name.as_str() {
                "amplitude" => min = 0.0,
                "fraction" => {
                    min = 0.0;
                    max = 1.0;
                }
                "center" => {
                    if term.center_fixed {
                        vary = false;
                    } else if explicit.is_some() {
                        // A user-supplied center pins the search window.
                        let (lo, hi) = scaled_window(init);
                        min = lo;
                        max = hi;
                    }
                }
                "sigma" => {
                    min = 0.0;
                    if explicit.is_some() {
                        let (lo, hi) = scaled_window(init);
                        min = lo;
                        max = hi;
                    }
                }
                _ => {}
            }
        }

        params.push(Parameter {
            name: format!("{}{}", term.prefix, name),
            init,
            min,
            max,
            vary,
        });
    }
}

/// `value/3 .. value*3`, orientation-corrected for negative values.
fn scaled_window(value: f64) -> (f64, f64) {
    let (a, b) = (value / 3.0, value * 3.0);
    (a.min(b), a.max(b))
}

fn x_span(x: &[f64]) -> f64 {
    match (x.first(), x.last()) {
        (Some(first), Some(last)) => (last - first).abs(),
        _ => 1.0,
    }
}

fn guess(kind: &ModelKind, name: &str, x: &[f64], y: &[f64], span: f64) -> f64 {
    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    match kind {
        ModelKind::Linear => {
            let (x0, xn) = (x.first().copied().unwrap_or(0.0), x.last().copied().unwrap_or(1.0));
            let (y0, yn) = (y.first().copied().unwrap_or(0.0), y.last().copied().unwrap_or(0.0));
            let slope = if (xn - x0).abs() > f64::EPSILON {
                (yn - y0) / (xn - x0)
            } else {
                0.0
            };
            match name {
                "slope" => finite(slope),
                _ => finite(y0 - slope * x0),
            }
        }
        ModelKind::Polynomial { .. } => match name {
            // Mean level for the constant term, zero for the rest.
            "c0" => finite(mean(y)),
            _ => 0.0,
        },
        ModelKind::Exponential => match name {
            "amplitude" => finite(y.first().copied().unwrap_or(1.0)).max(f64::EPSILON),
            _ => (span / 2.0).max(f64::EPSILON),
        },
        ModelKind::Peak(_) => {
            let (peak_x, peak_y) = arg_max(x, y);
            let sigma = (span / 10.0).max(f64::EPSILON);
            match name {
                "center" => finite(peak_x),
                "sigma" => sigma,
                "fraction" => 0.5,
                // Area estimate from the peak height.
                _ => finite(peak_y * sigma * (2.0 * std::f64::consts::PI).sqrt()).max(0.0),
            }
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| v.is_finite()).sum::<f64>() / values.len() as f64
}

fn arg_max(x: &[f64], y: &[f64]) -> (f64, f64) {
    y.iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, v)| (x.get(i).copied().unwrap_or(0.0), *v))
        .unwrap_or((0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    fn gaussian_data(x: &[f64], a: f64, c: f64, s: f64) -> Vec<f64> {
        x.iter().map(|&v| gaussian(v, a, c, s)).collect()
    }

    #[test]
    fn qualified_names_follow_prefix_order() {
        let spec = FitModelSpec {
            terms: vec![
                ModelTerm {
                    prefix: "bg_".into(),
                    kind: ModelKind::Linear,
                    initial: BTreeMap::new(),
                    center_fixed: false,
                },
                ModelTerm {
                    prefix: "g1_".into(),
                    kind: ModelKind::Peak(PeakShape::Gaussian),
                    initial: BTreeMap::new(),
                    center_fixed: false,
                },
            ],
        };
        let x = axis(16);
        let y = vec![1.0; 16];
        let model = MixtureModel::compile(&spec, &x, &y).expect("compile");
        assert_eq!(
            model.parameter_names(),
            vec!["bg_slope", "bg_intercept", "g1_amplitude", "g1_center", "g1_sigma"]
        );
    }

    #[test]
    fn duplicate_prefix_is_rejected() {
        let term = ModelTerm {
            prefix: "g1_".into(),
            kind: ModelKind::Linear,
            initial: BTreeMap::new(),
            center_fixed: false,
        };
        let spec = FitModelSpec {
            terms: vec![term.clone(), term],
        };
        let result = MixtureModel::compile(&spec, &axis(4), &[0.0; 4]);
        assert!(matches!(result, Err(SpectraError::Fit(_))));
    }

    #[test]
    fn polynomial_degree_is_capped() {
        let spec = FitModelSpec {
            terms: vec![ModelTerm {
                prefix: "p_".into(),
                kind: ModelKind::Polynomial { degree: 8 },
                initial: BTreeMap::new(),
                center_fixed: false,
            }],
        };
        let result = MixtureModel::compile(&spec, &axis(4), &[0.0; 4]);
        assert!(matches!(result, Err(SpectraError::Fit(_))));
    }

    #[test]
    fn peak_guess_centers_on_the_maximum() {
        let x = axis(100);
        let y = gaussian_data(&x, 500.0, 60.0, 5.0);
        let spec = FitModelSpec {
            terms: vec![ModelTerm {
                prefix: "g1_".into(),
                kind: ModelKind::Peak(PeakShape::Gaussian),
                initial: BTreeMap::new(),
                center_fixed: false,
            }],
        };
        let model = MixtureModel::compile(&spec, &x, &y).expect("compile");
        let center = &model.parameters()[1];
        assert_eq!(center.name, "g1_center");
        assert_eq!(center.init, 60.0);
        // Amplitude is non-negative by construction.
        assert_eq!(model.parameters()[0].min, 0.0);
    }

    #[test]
    fn fixed_center_does_not_vary() {
        let mut initial = BTreeMap::new();
        initial.insert("center".to_string(), 42.0);
        let spec = FitModelSpec {
            terms: vec![ModelTerm {
                prefix: "g1_".into(),
                kind: ModelKind::Peak(PeakShape::Gaussian),
                initial,
                center_fixed: true,
            }],
        };
        let model = MixtureModel::compile(&spec, &axis(10), &[1.0; 10]).expect("compile");
        let center = &model.parameters()[1];
        assert!(!center.vary);
        assert_eq!(center.init, 42.0);

        // clamp() restores fixed parameters.
        let mut values = model.initial_values();
        values[1] = 99.0;
        model.clamp(&mut values);
        assert_eq!(values[1], 42.0);
    }

    #[test]
    fn explicit_center_gets_a_windowed_bound() {
        let mut initial = BTreeMap::new();
        initial.insert("center".to_string(), 600.0);
        let spec = FitModelSpec {
            terms: vec![ModelTerm {
                prefix: "g1_".into(),
                kind: ModelKind::Peak(PeakShape::Gaussian),
                initial,
                center_fixed: false,
            }],
        };
        let model = MixtureModel::compile(&spec, &axis(10), &[1.0; 10]).expect("compile");
        let center = &model.parameters()[1];
        assert_eq!(center.min, 200.0);
        assert_eq!(center.max, 1800.0);
    }

    #[test]
    fn mixture_is_additive() {
        let spec = FitModelSpec {
            terms: vec![
                ModelTerm {
                    prefix: "bg_".into(),
                    kind: ModelKind::Linear,
                    initial: BTreeMap::new(),
                    center_fixed: false,
                },
                ModelTerm {
                    prefix: "g1_".into(),
                    kind: ModelKind::Peak(PeakShape::Gaussian),
                    initial: BTreeMap::new(),
                    center_fixed: false,
                },
            ],
        };
        let x = axis(8);
        let y = vec![0.0; 8];
        let model = MixtureModel::compile(&spec, &x, &y).expect("compile");
        // slope 2, intercept 1, peak amplitude 0: y = 2x + 1.
        let values = vec![2.0, 1.0, 0.0, 4.0, 1.0];
        assert_eq!(model.eval(3.0, &values), 7.0);
    }

    #[test]
    fn spec_loads_from_toml() {
        let spec: FitModelSpec = toml::from_str(
            r#"
            [[terms]]
            prefix = "bg_"
            kind = "linear"

            [[terms]]
            prefix = "g1_"
            kind = { peak = "gaussian" }
            initial = { center = 830.0, sigma = 20.0 }
            center_fixed = true

            [[terms]]
            prefix = "p_"
            kind = { polynomial = { degree = 2 } }
            "#,
        )
        .expect("parse");

        assert_eq!(spec.terms.len(), 3);
        assert_eq!(spec.terms[1].initial["center"], 830.0);
        assert!(spec.terms[1].center_fixed);
        assert_eq!(spec.terms[2].kind, ModelKind::Polynomial { degree: 2 });
        assert_eq!(
            spec.qualified_names(),
            vec![
                "bg_slope",
                "bg_intercept",
                "g1_amplitude",
                "g1_center",
                "g1_sigma",
                "p_c0",
                "p_c1",
                "p_c2"
            ]
        );
    }

    #[test]
    fn pseudo_voigt_interpolates_between_shapes() {
        let p_g = [1.0, 0.0, 2.0, 0.0]; // fraction 0: pure Gaussian part
        let p_l = [1.0, 0.0, 2.0, 1.0]; // fraction 1: pure Lorentzian
        let sigma_g = 2.0 / (2.0 * std::f64::consts::LN_2).sqrt();
        assert!(
            (eval_peak(PeakShape::PseudoVoigt, 0.5, &p_g)
                - gaussian(0.5, 1.0, 0.0, sigma_g))
            .abs()
                < 1e-12
        );
        assert!(
            (eval_peak(PeakShape::PseudoVoigt, 0.5, &p_l) - lorentzian(0.5, 1.0, 0.0, 2.0)).abs()
                < 1e-12
        );
    }
}
