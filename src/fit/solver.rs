//! Nonlinear least-squares solver.
//!
//! Levenberg-Marquardt with a forward-difference Jacobian over the free
//! parameters, box-bound clamping after each accepted step, and a damping
//! factor adjusted on step acceptance. The parameter vector always carries
//! every parameter; fixed ones are simply excluded from the free set.

use tracing::trace;

use crate::error::{AppResult, SpectraError};
use crate::fit::model::MixtureModel;

const MAX_ITERATIONS: usize = 200;
const INITIAL_LAMBDA: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.3;
const COST_TOLERANCE: f64 = 1e-12;

/// Result of one least-squares fit.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// Final value per parameter, in the model's parameter order.
    pub values: Vec<f64>,
    /// Reduced chi-square: residual sum of squares over the degrees of
    /// freedom.
    pub redchi: f64,
    /// Goodness of fit, `1 - redchi / var(y)` with the variance computed
    /// over the same degrees of freedom.
    pub r_squared: f64,
    /// Iterations spent.
    pub iterations: usize,
}

/// Fit `model` to `(x, y)` starting from the model's initial values.
pub fn fit(model: &MixtureModel, x: &[f64], y: &[f64]) -> AppResult<FitOutcome> {
    if x.len() != y.len() {
        return Err(SpectraError::Fit(format!(
            "axis length {} does not match data length {}",
            x.len(),
            y.len()
        )));
    }
    let n_points = x.len();
    let free: Vec<usize> = model
        .parameters()
        .iter()
        .enumerate()
        .filter(|(_, p)| p.vary)
        .map(|(i, _)| i)
        .collect();
    if n_points <= free.len() + 2 {
        return Err(SpectraError::Fit(format!(
            "{n_points} points cannot constrain {} free parameters",
            free.len()
        )));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(SpectraError::Fit("data contains non-finite values".into()));
    }

    let mut values = model.initial_values();
    model.clamp(&mut values);
    let mut residuals = compute_residuals(model, x, y, &values)?;
    let mut cost = sum_squares(&residuals);
    let mut lambda = INITIAL_LAMBDA;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < MAX_ITERATIONS && !converged {
        iterations += 1;

        let jacobian = numeric_jacobian(model, x, &values, &free, &residuals, y)?;
        let (jtj, jtr) = normal_equations(&jacobian, &residuals, free.len());

        let mut accepted = false;
        // A failed step only raises the damping; the same Jacobian is
        // reused until a step is accepted or the damping saturates.
        for _ in 0..16 {
            let mut damped = jtj.clone();
            for k in 0..free.len() {
                damped[k * free.len() + k] += lambda * jtj[k * free.len() + k].max(1e-12);
            }
            let Some(step) = solve_linear(&damped, &jtr, free.len()) else {
                lambda *= LAMBDA_UP;
                continue;
            };

            let mut trial = values.clone();
            for (k, &idx) in free.iter().enumerate() {
                trial[idx] -= step[k];
            }
            model.clamp(&mut trial);

            let Ok(trial_residuals) = compute_residuals(model, x, y, &trial) else {
                lambda *= LAMBDA_UP;
                continue;
            };
            let trial_cost = sum_squares(&trial_residuals);
            if trial_cost < cost {
                let improvement = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
                values = trial;
                residuals = trial_residuals;
                cost = trial_cost;
                lambda = (lambda * LAMBDA_DOWN).max(1e-12);
                accepted = true;
                converged = improvement < COST_TOLERANCE;
                break;
            }
            lambda *= LAMBDA_UP;
        }

        if !accepted {
            trace!(iterations, cost, "no acceptable step, stopping");
            break;
        }
    }

    let dof = (n_points - free.len()).max(1);
    let redchi = cost / dof as f64;
    let r_squared = 1.0 - redchi / sample_variance(y);
    if !r_squared.is_finite() {
        return Err(SpectraError::Fit("fit produced a non-finite result".into()));
    }
    Ok(FitOutcome {
        values,
        redchi,
        r_squared,
        iterations,
    })
}

fn compute_residuals(
    model: &MixtureModel,
    x: &[f64],
    y: &[f64],
    values: &[f64],
) -> AppResult<Vec<f64>> {
    let mut residuals = Vec::with_capacity(x.len());
    for (&xi, &yi) in x.iter().zip(y) {
        let r = model.eval(xi, values) - yi;
        if !r.is_finite() {
            return Err(SpectraError::Fit(
                "model evaluated to a non-finite value".into(),
            ));
        }
        residuals.push(r);
    }
    Ok(residuals)
}

fn sum_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Sample variance with two delta degrees of freedom.
fn sample_variance(y: &[f64]) -> f64 {
    let n = y.len();
    if n <= 2 {
        return f64::MAX;
    }
    let mean = y.iter().sum::<f64>() / n as f64;
    y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 2) as f64
}

/// Forward-difference Jacobian of the residual vector, one column per free
/// parameter, stored row-major `n_points x n_free`.
fn numeric_jacobian(
    model: &MixtureModel,
    x: &[f64],
    values: &[f64],
    free: &[usize],
    residuals: &[f64],
    y: &[f64],
) -> AppResult<Vec<f64>> {
    let n_free = free.len();
    let mut jacobian = vec![0.0; x.len() * n_free];
    let mut perturbed = values.to_vec();
    for (k, &idx) in free.iter().enumerate() {
        let step = (values[idx].abs() * 1e-7).max(1e-9);
        perturbed[idx] = values[idx] + step;
        for (i, (&xi, &yi)) in x.iter().zip(y).enumerate() {
            let r = model.eval(xi, &perturbed) - yi;
            if !r.is_finite() {
                return Err(SpectraError::Fit(
                    "model evaluated to a non-finite value".into(),
                ));
            }
            jacobian[i * n_free + k] = (r - residuals[i]) / step;
        }
        perturbed[idx] = values[idx];
    }
    Ok(jacobian)
}

/// `J^T J` (row-major `n_free x n_free`) and `J^T r`.
fn normal_equations(jacobian: &[f64], residuals: &[f64], n_free: usize) -> (Vec<f64>, Vec<f64>) {
    let n_points = residuals.len();
    let mut jtj = vec![0.0; n_free * n_free];
    let mut jtr = vec![0.0; n_free];
    for i in 0..n_points {
        let row = &jacobian[i * n_free..(i + 1) * n_free];
        for a in 0..n_free {
            jtr[a] += row[a] * residuals[i];
            for b in a..n_free {
                jtj[a * n_free + b] += row[a] * row[b];
            }
        }
    }
    // Mirror the upper triangle.
    for a in 0..n_free {
        for b in 0..a {
            jtj[a * n_free + b] = jtj[b * n_free + a];
        }
    }
    (jtj, jtr)
}

/// Solve `A s = b` by Gaussian elimination with partial pivoting. Returns
/// `None` for a singular system.
fn solve_linear(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut m = a.to_vec();
    let mut rhs = b.to_vec();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| m[r1 * n + col].abs().total_cmp(&m[r2 * n + col].abs()))?;
        if m[pivot_row * n + col].abs() < 1e-300 {
            return None;
        }
        if pivot_row != col {
            for c in 0..n {
                m.swap(col * n + c, pivot_row * n + c);
            }
            rhs.swap(col, pivot_row);
        }
        for row in (col + 1)..n {
            let factor = m[row * n + col] / m[col * n + col];
            for c in col..n {
                m[row * n + c] -= factor * m[col * n + c];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = rhs[row];
        for c in (row + 1)..n {
            acc -= m[row * n + c] * solution[c];
        }
        solution[row] = acc / m[row * n + row];
    }
    solution.iter().all(|v| v.is_finite()).then_some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::model::{FitModelSpec, ModelKind, ModelTerm, PeakShape};
    use std::collections::BTreeMap;

    fn gaussian(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
        amplitude / (sigma * (2.0 * std::f64::consts::PI).sqrt())
            * (-(x - center).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    fn peak_spec(prefix: &str) -> ModelTerm {
        ModelTerm {
            prefix: prefix.into(),
            kind: ModelKind::Peak(PeakShape::Gaussian),
            initial: BTreeMap::new(),
            center_fixed: false,
        }
    }

    #[test]
    fn solves_a_small_linear_system() {
        // [2 1; 1 3] s = [3; 5] has the solution [0.8, 1.4].
        let a = vec![2.0, 1.0, 1.0, 3.0];
        let b = vec![3.0, 5.0];
        let s = solve_linear(&a, &b, 2).expect("solvable");
        assert!((s[0] - 0.8).abs() < 1e-12);
        assert!((s[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn singular_system_is_rejected() {
        let a = vec![1.0, 2.0, 2.0, 4.0];
        assert!(solve_linear(&a, &[1.0, 2.0], 2).is_none());
    }

    #[test]
    fn recovers_a_noise_free_gaussian() {
        let x: Vec<f64> = (0..400).map(|i| 400.0 + i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| gaussian(v, 8_000.0, 620.0, 25.0)).collect();

        let spec = FitModelSpec {
            terms: vec![peak_spec("g1_")],
        };
        let model = crate::fit::model::MixtureModel::compile(&spec, &x, &y).expect("compile");
        let outcome = fit(&model, &x, &y).expect("fit");

        assert!((outcome.values[0] - 8_000.0).abs() / 8_000.0 < 1e-3, "amplitude");
        assert!((outcome.values[1] - 620.0).abs() < 0.1, "center");
        assert!((outcome.values[2].abs() - 25.0).abs() < 0.1, "sigma");
        assert!(outcome.r_squared > 0.999);
    }

    #[test]
    fn recovers_a_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 3.5 * v - 7.0).collect();

        let spec = FitModelSpec {
            terms: vec![ModelTerm {
                prefix: "bg_".into(),
                kind: ModelKind::Linear,
                initial: BTreeMap::new(),
                center_fixed: false,
            }],
        };
        let model = crate::fit::model::MixtureModel::compile(&spec, &x, &y).expect("compile");
        let outcome = fit(&model, &x, &y).expect("fit");
        assert!((outcome.values[0] - 3.5).abs() < 1e-6);
        assert!((outcome.values[1] + 7.0).abs() < 1e-4);
    }

    #[test]
    fn fixed_center_stays_put() {
        let x: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| gaussian(v, 1_000.0, 100.0, 10.0)).collect();

        let mut initial = BTreeMap::new();
        initial.insert("center".to_string(), 100.0);
        let spec = FitModelSpec {
            terms: vec![ModelTerm {
                prefix: "g1_".into(),
                kind: ModelKind::Peak(PeakShape::Gaussian),
                initial,
                center_fixed: true,
            }],
        };
        let model = crate::fit::model::MixtureModel::compile(&spec, &x, &y).expect("compile");
        let outcome = fit(&model, &x, &y).expect("fit");
        assert_eq!(outcome.values[1], 100.0);
        assert!(outcome.r_squared > 0.99);
    }

    #[test]
    fn non_finite_data_is_an_error() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let mut y = vec![1.0; 50];
        y[10] = f64::NAN;
        let spec = FitModelSpec {
            terms: vec![peak_spec("g1_")],
        };
        let model = crate::fit::model::MixtureModel::compile(&spec, &x, &y).expect("compile");
        assert!(matches!(fit(&model, &x, &y), Err(SpectraError::Fit(_))));
    }

    #[test]
    fn too_few_points_is_an_error() {
        let x = vec![0.0, 1.0, 2.0];
        let y = vec![0.0, 1.0, 2.0];
        let spec = FitModelSpec {
            terms: vec![peak_spec("g1_")],
        };
        let model = crate::fit::model::MixtureModel::compile(&spec, &x, &y).expect("compile");
        assert!(matches!(fit(&model, &x, &y), Err(SpectraError::Fit(_))));
    }
}
