use log::trace;

use super::errors::{ModelCheckingError, Result};

/// Truncated Poisson distribution: `weights[i - left]` is the probability of
/// `i` events, for `left <= i <= right`.
#[derive(Debug, Clone, PartialEq)]
pub struct FoxGlynnResult {
    pub left: usize,
    pub right: usize,
    pub weights: Vec<f64>,
    pub total_weight: f64,
}

impl FoxGlynnResult {
    pub fn weight(&self, i: usize) -> f64 {
        if i < self.left || i > self.right {
            0.0
        } else {
            self.weights[i - self.left]
        }
    }

    /// Scales the weights so they sum up to one.
    pub fn normalize(&mut self) {
        if self.total_weight > 0.0 {
            for w in self.weights.iter_mut() {
                *w /= self.total_weight;
            }
            self.total_weight = 1.0;
        }
    }
}

/// Poisson weights for rate `lambda` whose truncated mass on either side is
/// below `epsilon / 2`.
///
/// Weights are computed outward from the mode `floor(lambda)`, whose weight is
/// evaluated in log space, so neither side underflows before the tails are cut.
pub fn fox_glynn(lambda: f64, epsilon: f64) -> Result<FoxGlynnResult> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(ModelCheckingError::InvalidModel(format!(
            "Poisson rate must be finite and non-negative, got {}",
            lambda
        )));
    }
    if !(epsilon > 0.0 && epsilon < 1.0) {
        return Err(ModelCheckingError::InvalidSettings(format!(
            "Fox-Glynn accuracy must lie in (0, 1), got {}",
            epsilon
        )));
    }
    if lambda == 0.0 {
        return Ok(FoxGlynnResult { left: 0, right: 0, weights: vec![1.0], total_weight: 1.0 });
    }

    let half = epsilon / 2.0;
    let mode = lambda.floor() as usize;
    let log_factorial: f64 = (1..=mode).map(|j| (j as f64).ln()).sum();
    let mode_weight = (-lambda + mode as f64 * lambda.ln() - log_factorial).exp();

    // right tail: sum_{i > r} p(i) <= p(r + 1) / (1 - lambda / (r + 2))
    let mut right_weights = Vec::new();
    let mut right = mode;
    let mut p = mode_weight;
    loop {
        let next = p * lambda / (right + 1) as f64;
        let ratio = lambda / (right + 2) as f64;
        if ratio < 1.0 && next / (1.0 - ratio) < half {
            break;
        }
        right_weights.push(next);
        p = next;
        right += 1;
    }

    // left tail: sum_{i < l} p(i) <= p(l - 1) / (1 - (l - 1) / lambda)
    let mut left_weights = Vec::new();
    let mut left = mode;
    let mut p = mode_weight;
    while left > 0 {
        let previous = p * left as f64 / lambda;
        let ratio = (left - 1) as f64 / lambda;
        if ratio < 1.0 && previous / (1.0 - ratio) < half {
            break;
        }
        left_weights.push(previous);
        p = previous;
        left -= 1;
    }

    let mut weights: Vec<f64> = left_weights.into_iter().rev().collect();
    weights.push(mode_weight);
    weights.extend(right_weights);
    let total_weight = weights.iter().sum();
    trace!("Fox-Glynn for lambda {}: window [{}, {}], total weight {}", lambda, left, right, total_weight);

    Ok(FoxGlynnResult { left, right, weights, total_weight })
}
