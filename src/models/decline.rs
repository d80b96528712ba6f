//! Flux decline model: `flux(t) = a0 + a1 * exp(-t / t0)`.
//!
//! The model is fitted to the average flux against elapsed minutes since the
//! first event with a bounded Levenberg–Marquardt solver. Both amplitudes are
//! kept non-negative and `t0` is fitted through its logarithm.

use crate::config::ConfigError;
use crate::core::table::FluxTable;
use crate::core::timestamps::parse_event_time;
use crate::models::{write_csv_rows, OutputError};
use chrono::NaiveTime;
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Sub-directory of the output directory for decline results.
pub const DECLINE_DIR: &str = "flux_decline";

/// Points in the exported model curve.
pub const MODEL_CURVE_POINTS: usize = 100;

const MIN_POINTS: usize = 3;
const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;
/// Log-spaced `t0` candidates tried before refinement
const SCAN_POINTS: usize = 64;
const T0_RANGE_FACTOR: f64 = 10.0;
/// Share of the distance to a bound a shortened step may cover
const BOUNDARY_FRACTION: f64 = 0.9;
/// Amplitudes below this fraction of the largest flux count as zero
const BOUND_TOLERANCE: f64 = 1e-6;
const GRADIENT_TOLERANCE: f64 = 1e-8;
const STALL_GRADIENT_TOLERANCE: f64 = 1e-4;
/// Cost relative to the sum of squared fluxes treated as an exact fit
const ROUNDOFF_COST: f64 = 1e-16;
const SECONDS_PER_DAY: i64 = 86_400;

/// Initial guesses and limits for the decline fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclineFitOptions {
    /// Plateau flux guess (LMH)
    pub initial_a0: f64,
    /// Decaying amplitude guess (LMH)
    pub initial_a1: f64,
    /// Time constant guess (min)
    pub initial_t0: f64,
    pub max_iterations: usize,
    /// Relative cost decrease below which the fit is converged
    pub tolerance: f64,
}

impl Default for DeclineFitOptions {
    fn default() -> Self {
        Self {
            initial_a0: 2500.0,
            initial_a1: 1500.0,
            initial_t0: 100.0,
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

impl DeclineFitOptions {
    /// Initial guesses must be strictly positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (parameter, value) in [
            ("initial_a0", self.initial_a0),
            ("initial_a1", self.initial_a1),
            ("initial_t0", self.initial_t0),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositiveInitialGuess { parameter, value });
            }
        }
        Ok(())
    }

    fn initial_params(&self) -> ExponentialParams {
        ExponentialParams {
            a0: self.initial_a0,
            a1: self.initial_a1,
            t0: self.initial_t0,
        }
    }
}

/// Fitted decline parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExponentialParams {
    /// Long-term plateau flux (LMH)
    pub a0: f64,
    /// Initial excess flux that decays away (LMH)
    pub a1: f64,
    /// Decay time constant (min)
    pub t0: f64,
}

impl ExponentialParams {
    pub fn evaluate(&self, t: f64) -> f64 {
        self.a0 + self.a1 * (-t / self.t0).exp()
    }

    /// Solver coordinates `(a0, a1, ln t0)`.
    fn to_coords(self) -> Vector3<f64> {
        Vector3::new(self.a0, self.a1, self.t0.ln())
    }

    fn from_coords(v: &Vector3<f64>) -> Self {
        Self {
            a0: v[0],
            a1: v[1],
            t0: v[2].exp(),
        }
    }
}

/// Outcome of a decline fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExponentialFitResult {
    pub params: ExponentialParams,
    /// Elapsed minutes since the first event
    pub time_minutes: Vec<f64>,
    /// Average flux the model was fitted to
    pub observed: Vec<f64>,
    /// Standard deviation of the flux at each time
    pub std_flux: Vec<f64>,
    /// Observed minus model
    pub residuals: Vec<f64>,
    pub r_squared: f64,
    pub iterations: usize,
}

impl ExponentialFitResult {
    pub fn evaluate(&self, t: f64) -> f64 {
        self.params.evaluate(t)
    }

    /// Evenly spaced `(t, flux)` points across the fitted time span.
    pub fn model_curve(&self, points: usize) -> Vec<(f64, f64)> {
        let start = self.time_minutes.iter().copied().fold(f64::INFINITY, f64::min);
        let end = self
            .time_minutes
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if points == 0 || !start.is_finite() {
            return Vec::new();
        }

        let step = if points > 1 {
            (end - start) / (points - 1) as f64
        } else {
            0.0
        };
        (0..points)
            .map(|i| {
                let t = start + step * i as f64;
                (t, self.evaluate(t))
            })
            .collect()
    }

    /// Write `model_parameters.csv`, `residuals.csv` and `model_curve.csv` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), OutputError> {
        let parameters = [
            ("a0", self.params.a0),
            ("a1", self.params.a1),
            ("t0", self.params.t0),
            ("R2", self.r_squared),
        ];
        write_csv_rows(
            &dir.join("model_parameters.csv"),
            &["Model Parameters", "Parameter Values"],
            parameters
                .iter()
                .map(|(name, value)| vec![name.to_string(), value.to_string()]),
        )?;

        write_csv_rows(
            &dir.join("residuals.csv"),
            &["Time (min)", "Residual (LMH)"],
            self.time_minutes
                .iter()
                .zip(&self.residuals)
                .map(|(t, r)| vec![t.to_string(), r.to_string()]),
        )?;

        write_csv_rows(
            &dir.join("model_curve.csv"),
            &["Time (min)", "Model Flux (LMH)"],
            self.model_curve(MODEL_CURVE_POINTS)
                .into_iter()
                .map(|(t, flux)| vec![t.to_string(), flux.to_string()]),
        )?;

        info!(dir = %dir.display(), "Saved flux decline outputs");
        Ok(())
    }
}

/// Elapsed minutes of each `HH:MM:SS` label since the first one.
///
/// A label earlier than its predecessor is taken to be on the following day.
pub fn elapsed_minutes(labels: &[&str]) -> Result<Vec<f64>, FitError> {
    let mut elapsed = Vec::with_capacity(labels.len());
    let mut first: Option<NaiveTime> = None;
    let mut previous: Option<NaiveTime> = None;
    let mut days = 0;

    for (index, label) in labels.iter().enumerate() {
        let time = parse_event_time(label).ok_or_else(|| FitError::InvalidTimeLabel {
            index,
            label: label.to_string(),
        })?;

        if previous.is_some_and(|prev| time < prev) {
            days += 1;
        }
        let origin = *first.get_or_insert(time);
        let seconds = (time - origin).num_seconds() + days * SECONDS_PER_DAY;
        elapsed.push(seconds as f64 / 60.0);
        previous = Some(time);
    }

    Ok(elapsed)
}

fn sum_squared_residuals(t: &[f64], y: &[f64], params: &ExponentialParams) -> f64 {
    t.iter()
        .zip(y)
        .map(|(&ti, &yi)| (yi - params.evaluate(ti)).powi(2))
        .sum()
}

/// Range of time constants the sampling can resolve: from a tenth of the
/// closest spacing to ten times the span.
fn resolvable_time_constants(t: &[f64]) -> Result<(f64, f64), FitError> {
    let mut sorted = t.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    if sorted.len() < MIN_POINTS {
        return Err(FitError::InsufficientData {
            points: sorted.len(),
            required: MIN_POINTS,
        });
    }

    let spacing = sorted
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .fold(f64::INFINITY, f64::min);
    let span = sorted[sorted.len() - 1] - sorted[0];
    Ok((spacing / T0_RANGE_FACTOR, span * T0_RANGE_FACTOR))
}

/// Best non-negative `(a0, a1)` for a fixed `t0`, with its cost.
fn linear_amplitudes(t: &[f64], y: &[f64], t0: f64) -> (ExponentialParams, f64) {
    let n = t.len() as f64;
    let (mut se, mut see, mut sy, mut sey) = (0.0, 0.0, 0.0, 0.0);
    for (&ti, &yi) in t.iter().zip(y) {
        let e = (-ti / t0).exp();
        se += e;
        see += e * e;
        sy += yi;
        sey += e * yi;
    }

    let unconstrained = Matrix2::new(n, se, se, see)
        .lu()
        .solve(&Vector2::new(sy, sey))
        .filter(|a| a[0] >= 0.0 && a[1] >= 0.0)
        .map(|a| (a[0], a[1]));
    let plateau_only = Some(((sy / n).max(0.0), 0.0));
    let decay_only = (see > 0.0).then(|| (0.0, (sey / see).max(0.0)));

    [unconstrained, plateau_only, decay_only]
        .into_iter()
        .flatten()
        .map(|(a0, a1)| {
            let params = ExponentialParams { a0, a1, t0 };
            (params, sum_squared_residuals(t, y, &params))
        })
        .fold(
            (ExponentialParams { a0: 0.0, a1: 0.0, t0 }, f64::INFINITY),
            |best, candidate| if candidate.1 < best.1 { candidate } else { best },
        )
}

/// Coarse log-spaced scan over `t0` with the amplitudes solved exactly.
fn scan_time_constant(t: &[f64], y: &[f64], (low, high): (f64, f64)) -> (ExponentialParams, f64) {
    let (ln_low, ln_high) = (low.ln(), high.ln());
    (0..SCAN_POINTS)
        .map(|i| {
            let u = ln_low + (ln_high - ln_low) * i as f64 / (SCAN_POINTS - 1) as f64;
            linear_amplitudes(t, y, u.exp())
        })
        .fold(
            (ExponentialParams { a0: 0.0, a1: 0.0, t0: high }, f64::INFINITY),
            |best, candidate| if candidate.1 < best.1 { candidate } else { best },
        )
}

/// Take `step` from `coords` without leaving the feasible region.
///
/// Amplitudes already on their bound stay there; otherwise the whole step is
/// shortened to stop short of the first bound it would cross. Returns the new
/// coordinates and whether the step was shortened.
fn feasible_step(coords: &Vector3<f64>, mut step: Vector3<f64>) -> (Vector3<f64>, bool) {
    let mut scale: f64 = 1.0;
    for k in 0..2 {
        if coords[k] + step[k] < 0.0 {
            if coords[k] <= 0.0 {
                step[k] = 0.0;
            } else {
                scale = scale.min(BOUNDARY_FRACTION * coords[k] / -step[k]);
            }
        }
    }
    (coords + step * scale, scale < 1.0)
}

/// Largest cosine between the residual vector and a free Jacobian column.
///
/// An amplitude resting on its bound with the gradient pushing it further
/// out is not free.
fn gradient_cosine(
    jtj: &Matrix3<f64>,
    jtr: &Vector3<f64>,
    cost: f64,
    coords: &Vector3<f64>,
    y_scale: f64,
) -> f64 {
    if cost == 0.0 {
        return 0.0;
    }
    (0..3)
        .filter(|&k| !(k < 2 && jtr[k] < 0.0 && coords[k] <= BOUND_TOLERANCE * y_scale))
        .map(|k| jtr[k].abs() / (jtj[(k, k)].max(f64::MIN_POSITIVE) * cost).sqrt())
        .fold(0.0, f64::max)
}

/// Reject fits whose decay is not pinned down by the data.
fn ensure_resolved(
    params: ExponentialParams,
    (low, high): (f64, f64),
    y_scale: f64,
) -> Result<ExponentialParams, FitError> {
    if params.a1 <= BOUND_TOLERANCE * y_scale || params.t0 < low || params.t0 > high {
        return Err(FitError::Unresolved {
            a1: params.a1,
            t0: params.t0,
            min_t0: low,
            max_t0: high,
        });
    }
    Ok(params)
}

/// Fit `a0 + a1 * exp(-t / t0)` to `(t, y)`.
///
/// The solver works on `(a0, a1, ln t0)`, so `t0` stays positive, and keeps
/// both amplitudes non-negative. It starts from the configured guesses or from
/// a coarse scan over `t0`, whichever fits better, and refines with
/// Levenberg–Marquardt.
///
/// Returns the parameters and the number of iterations used. A fit is
/// accepted when the residual is orthogonal to the free Jacobian columns,
/// when a full step lowers the cost by less than `tolerance * cost`, or when
/// no step lowers a cost already at round-off level. A fit whose decay
/// amplitude vanishes or whose time constant is outside what the sampling
/// resolves is rejected.
pub fn fit_exponential_decay(
    t: &[f64],
    y: &[f64],
    options: &DeclineFitOptions,
) -> Result<(ExponentialParams, usize), FitError> {
    if t.len() != y.len() {
        return Err(FitError::LengthMismatch {
            times: t.len(),
            values: y.len(),
        });
    }
    if t.len() < MIN_POINTS {
        return Err(FitError::InsufficientData {
            points: t.len(),
            required: MIN_POINTS,
        });
    }
    if t.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }

    let range = resolvable_time_constants(t)?;
    let y_scale = y.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let y_energy: f64 = y.iter().map(|v| v * v).sum();

    let mut params = options.initial_params();
    let mut cost = sum_squared_residuals(t, y, &params);
    let (seed, seed_cost) = scan_time_constant(t, y, range);
    if seed_cost <= cost || !cost.is_finite() {
        debug!(t0 = seed.t0, seed_cost, "Starting decline fit from scanned time constant");
        params = seed;
        cost = seed_cost;
    }
    if !cost.is_finite() {
        return Err(FitError::NonFinite);
    }

    let mut coords = params.to_coords();
    let mut damping = INITIAL_DAMPING;

    for iteration in 1..=options.max_iterations {
        let mut jtj = Matrix3::<f64>::zeros();
        let mut jtr = Vector3::<f64>::zeros();
        for (&ti, &yi) in t.iter().zip(y) {
            let decay = (-ti / params.t0).exp();
            let jacobian = Vector3::new(1.0, decay, params.a1 * decay * ti / params.t0);
            let residual = yi - params.evaluate(ti);
            jtj += jacobian * jacobian.transpose();
            jtr += jacobian * residual;
        }

        let cosine = gradient_cosine(&jtj, &jtr, cost, &coords, y_scale);
        if cosine <= GRADIENT_TOLERANCE {
            return ensure_resolved(params, range, y_scale).map(|p| (p, iteration));
        }

        let mut damped = jtj;
        for k in 0..3 {
            damped[(k, k)] += damping * jtj[(k, k)].max(MIN_DAMPING);
        }

        let accepted = damped.lu().solve(&jtr).and_then(|step| {
            let (candidate_coords, shortened) = feasible_step(&coords, step);
            let candidate = ExponentialParams::from_coords(&candidate_coords);
            let candidate_cost = sum_squared_residuals(t, y, &candidate);
            (candidate_cost.is_finite() && candidate_cost < cost)
                .then_some((candidate_coords, candidate, candidate_cost, shortened))
        });

        match accepted {
            Some((candidate_coords, candidate, candidate_cost, shortened)) => {
                let converged = !shortened && cost - candidate_cost <= options.tolerance * cost;
                coords = candidate_coords;
                params = candidate;
                cost = candidate_cost;
                damping = (damping / 10.0).max(MIN_DAMPING);
                debug!(iteration, cost, damping, shortened, "Accepted decline fit step");

                if converged {
                    return ensure_resolved(params, range, y_scale).map(|p| (p, iteration));
                }
            }
            None => {
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    if cosine <= STALL_GRADIENT_TOLERANCE || cost <= ROUNDOFF_COST * y_energy {
                        return ensure_resolved(params, range, y_scale).map(|p| (p, iteration));
                    }
                    return Err(FitError::Stalled {
                        iterations: iteration,
                        cosine,
                    });
                }
            }
        }
    }

    Err(FitError::DidNotConverge {
        iterations: options.max_iterations,
    })
}

/// `1 - SS_res / SS_tot`; NaN for constant data.
fn r_squared(observed: &[f64], residuals: &[f64]) -> f64 {
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    if ss_tot == 0.0 {
        return f64::NAN;
    }
    1.0 - ss_res / ss_tot
}

/// Fits the decline model to a flux table.
#[derive(Debug, Clone, Default)]
pub struct FluxDeclineModel {
    options: DeclineFitOptions,
}

impl FluxDeclineModel {
    pub fn new(options: DeclineFitOptions) -> Self {
        Self { options }
    }

    /// Fit the average flux of `table` against elapsed time.
    pub fn fit(&self, table: &FluxTable) -> Result<ExponentialFitResult, FitError> {
        let time_minutes = elapsed_minutes(&table.start_times())?;
        let observed = table.average_flux();

        let (params, iterations) = fit_exponential_decay(&time_minutes, &observed, &self.options)?;

        let residuals: Vec<f64> = time_minutes
            .iter()
            .zip(&observed)
            .map(|(&t, &y)| y - params.evaluate(t))
            .collect();
        let r_squared = r_squared(&observed, &residuals);

        info!(
            a0 = params.a0,
            a1 = params.a1,
            t0 = params.t0,
            r_squared,
            iterations,
            "Fitted flux decline model"
        );

        Ok(ExponentialFitResult {
            params,
            time_minutes,
            observed,
            std_flux: table.std_flux(),
            residuals,
            r_squared,
            iterations,
        })
    }
}

/// Errors raised by the decline fit. They stop only this model.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("flux decline fit needs at least {required} events, got {points}")]
    InsufficientData { points: usize, required: usize },

    #[error("event {index} has start time '{label}', expected HH:MM:SS")]
    InvalidTimeLabel { index: usize, label: String },

    #[error("flux decline fit did not converge within {iterations} iterations")]
    DidNotConverge { iterations: usize },

    #[error(
        "flux decline fit stalled after {iterations} iterations away from a minimum \
         (gradient cosine {cosine:.2e})"
    )]
    Stalled { iterations: usize, cosine: f64 },

    #[error(
        "flux decline is not resolved by the data: a1 = {a1} LMH, t0 = {t0} min \
         (resolvable t0 {min_t0}..{max_t0} min)"
    )]
    Unresolved {
        a1: f64,
        t0: f64,
        min_t0: f64,
        max_t0: f64,
    },

    #[error("flux decline data or cost is not finite")]
    NonFinite,

    #[error("{times} time points but {values} flux values")]
    LengthMismatch { times: usize, values: usize },
}
