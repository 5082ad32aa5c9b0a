//! UnifPlus: time-bounded reachability by adaptive uniformization.
//!
//! All Markovian states are uniformized to a common rate `lambda`; the number
//! of uniformization jumps within the horizon is Poisson distributed and is
//! truncated at `N`. Three tables indexed by the jump count `k` and the state
//! are filled, from `k = N` down to 0:
//!
//! * `vd`: probability of reaching the goal within the horizon when
//!   scheduler decisions may depend on `k`,
//! * `wu`: probability of reaching the goal within `N - k` jumps,
//! * `vu`: derived from `wu` by summing over the Poisson weights.
//!
//! `max |vd[0] - vu[0]|` bounds the error due to the uniformization rate; while
//! it is too large, `lambda` is doubled.
use log::{debug, info, trace, warn};

use super::bit_vector::BitVector;
use super::errors::{ConvergenceWarning, ModelCheckingError, Result};
use super::fox_glynn::fox_glynn;
use super::helper_methods::{filter_vector, max_if};
use super::min_max_solver::{MinMaxLinearEquationSolver, MinMaxSolverFactory, OptimizationDirection};
use super::settings::Settings;
use super::sparse_matrix::SparseMatrix;
use super::value_type::{exp, ln, require_exponential, ValueType};

const OPERATION: &str = "computing bounded reachability probabilities with UnifPlus";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnifPlusParameters {
    pub epsilon: f64,
    pub kappa: f64,
    pub max_rounds: u32,
    pub stall_tolerance: f64,
}

impl UnifPlusParameters {
    pub fn from_settings(settings: &Settings) -> Self {
        UnifPlusParameters {
            epsilon: settings.precision,
            kappa: settings.unif_plus_kappa,
            max_rounds: settings.unif_plus_max_rounds,
            stall_tolerance: settings.unif_plus_stall_tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnifPlusOutcome<V> {
    /// `vd[0]`, the reachability probability per state.
    pub values: Vec<V>,
    pub max_norm: V,
    pub rounds: u32,
    /// Truncation point `N` of the last round.
    pub truncation: usize,
    pub lambda: V,
    pub warnings: Vec<ConvergenceWarning>,
}

/// Rescales every non-goal Markovian row to rate `lambda`; the self loop
/// takes up the difference.
fn uniformize<V: ValueType>(
    full: &mut SparseMatrix<V>,
    rates: &mut [V],
    markovian_non_goal: &BitVector,
    lambda: V,
) {
    for state in markovian_non_goal.iter() {
        let old = rates[state];
        if old == lambda {
            continue;
        }
        let row = full.row_group(state).start;
        for entry in full.row_mut(row) {
            if entry.column == state {
                entry.value = (lambda - old + entry.value * old) / lambda;
            } else {
                entry.value = entry.value * old / lambda;
            }
        }
        rates[state] = lambda;
    }
}

struct Layering<'a, V: ValueType, S> {
    direction: OptimizationDirection,
    full: &'a SparseMatrix<V>,
    goal: &'a BitVector,
    markovian: &'a BitVector,
    probabilistic: &'a BitVector,
    probabilistic_to_markovian: &'a SparseMatrix<V>,
    solver: Option<&'a mut S>,
    last_warning: Option<ConvergenceWarning>,
}

impl<'a, V: ValueType, S: MinMaxLinearEquationSolver<V>> Layering<'a, V, S> {
    /// Fills `current` (layer `k`) from `next` (layer `k + 1`). Goal states
    /// get `goal_value`, Markovian states the expectation over `next`, and
    /// probabilistic states are solved together against the Markovian values
    /// of `current`.
    fn fill(&mut self, current: &mut [V], next: &[V], goal_value: V) -> Result<()> {
        for state in 0..current.len() {
            if self.goal.get(state) {
                current[state] = goal_value;
            } else if self.markovian.get(state) {
                let row = self.full.row_group(state).start;
                current[state] = self.full.multiply_row_with_vector(row, next).min_value(V::one());
            }
        }
        if let Some(solver) = self.solver.as_mut() {
            let markovian_values = filter_vector(current, self.markovian);
            let mut b = vec![V::zero(); self.probabilistic_to_markovian.row_count()];
            self.probabilistic_to_markovian.multiply_with_vector(&markovian_values, &mut b);
            let mut x = vec![V::zero(); self.probabilistic.number_of_set_bits()];
            let status = solver.solve_equations(self.direction, &mut x, &b)?;
            if let Some(w) = status.warning() {
                self.last_warning = Some(w);
            }
            for (i, state) in self.probabilistic.iter().enumerate() {
                current[state] = x[i];
            }
        }
        Ok(())
    }
}

fn max_abs_difference<V: ValueType>(a: &[V], b: &[V]) -> V {
    a.iter()
        .zip(b.iter())
        .fold(V::zero(), |m, (x, y)| m.max_value((*x - *y).abs()))
}

/// Bounded reachability of `psi_states` within `[0, upper]`.
#[allow(clippy::too_many_arguments)]
pub fn unif_plus<V, F>(
    direction: OptimizationDirection,
    upper: V,
    exit_rates: &[V],
    matrix: &SparseMatrix<V>,
    markovian_states: &BitVector,
    psi_states: &BitVector,
    parameters: &UnifPlusParameters,
    factory: &F,
) -> Result<UnifPlusOutcome<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    require_exponential::<V>(OPERATION)?;
    let state_count = matrix.row_group_count();
    let all = BitVector::new(state_count, true);

    // goal states count as Markovian, their transitions are never used
    let markovian = markovian_states | psi_states;
    let probabilistic = !&markovian;
    let markovian_non_goal = markovian_states.and_not(psi_states);

    let mut full = matrix.submatrix(true, &all, &all, true);
    let mut rates = exit_rates.to_vec();
    let probabilistic_to_markovian = full.submatrix(true, &probabilistic, &markovian, false);

    let mut requirements = factory.requirements(Some(direction), true);
    requirements.clear_bounds();
    if !requirements.is_empty() {
        return Err(ModelCheckingError::UncheckedRequirement(requirements));
    }
    let mut solver = if probabilistic.is_empty() {
        None
    } else {
        let mut s = factory.create(full.submatrix(true, &probabilistic, &probabilistic, true));
        s.set_has_unique_solution(true);
        s.set_bounds(V::zero(), V::one());
        s.set_requirements_checked(true);
        s.set_caching_enabled(true);
        Some(s)
    };

    let epsilon = V::from_f64(parameters.epsilon);
    let kappa = V::from_f64(parameters.kappa);
    let threshold = epsilon * (V::one() - kappa);
    let e_squared = exp(V::from_f64(2.0), OPERATION)?;
    let log_kappa_epsilon = ln(kappa * epsilon, OPERATION)?;
    let mut lambda = max_if(exit_rates, &all);
    if lambda <= V::zero() {
        lambda = V::one();
    }

    let mut warnings = Vec::new();
    let mut first_norm: Option<V> = None;
    let mut previous_norm: Option<V> = None;
    let mut round: u32 = 0;
    loop {
        round += 1;
        let n = (lambda * upper * e_squared - log_kappa_epsilon).to_f64().ceil().max(1.0) as usize;
        uniformize(&mut full, &mut rates, &markovian_non_goal, lambda);

        let mut poisson = fox_glynn((lambda * upper).to_f64(), parameters.epsilon * parameters.kappa / 100.0)?;
        poisson.normalize();
        let weight = |i: usize| V::from_f64(poisson.weight(i));

        // tail[k] = sum_{i = k}^{N - 1} weight(i), a probability despite rounding
        let whole_window = n > poisson.right;
        let mut tail = vec![V::zero(); n + 1];
        for k in (0..n).rev() {
            tail[k] = if whole_window && k <= poisson.left {
                V::one()
            } else {
                (tail[k + 1] + weight(k)).min_value(V::one())
            };
        }

        let mut vd = vec![vec![V::zero(); state_count]; n + 1];
        let mut wu = vec![vec![V::zero(); state_count]; n + 1];
        let mut layering = Layering {
            direction,
            full: &full,
            goal: psi_states,
            markovian: &markovian,
            probabilistic: &probabilistic,
            probabilistic_to_markovian: &probabilistic_to_markovian,
            solver: solver.as_mut(),
            last_warning: None,
        };
        for k in (0..n).rev() {
            let (head, rest) = vd.split_at_mut(k + 1);
            layering.fill(&mut head[k], &rest[0], tail[k])?;
            let (head, rest) = wu.split_at_mut(k + 1);
            layering.fill(&mut head[k], &rest[0], V::one())?;
        }
        if let Some(w) = layering.last_warning.take() {
            warn!("{}", w);
            warnings.push(w);
        }

        // vu[0][s] = sum_{i = 0}^{N - 1} weight(i) * wu[N - 1 - i][s]
        let mut vu0 = vec![V::zero(); state_count];
        for i in 0..n {
            let w = weight(i);
            if w.is_zero() {
                continue;
            }
            for (s, v) in vu0.iter_mut().enumerate() {
                *v += w * wu[n - 1 - i][s];
            }
        }
        trace!("vd[0] = {:?}", vd[0]);
        trace!("vu[0] = {:?}", vu0);
        trace!("wu[0] = {:?}", wu[0]);

        let max_norm = max_abs_difference(&vd[0], &vu0);
        debug!("UnifPlus round {}: N = {}, lambda = {}, max norm {}", round, n, lambda, max_norm);

        let finish = |warnings: Vec<ConvergenceWarning>, vd: Vec<Vec<V>>| {
            let values = vd.into_iter().next().unwrap_or_default();
            UnifPlusOutcome { values, max_norm, rounds: round, truncation: n, lambda, warnings }
        };

        if max_norm <= threshold {
            info!("UnifPlus converged after {} rounds (N = {}, lambda = {})", round, n, lambda);
            return Ok(finish(warnings, vd));
        }
        if let Some(previous) = previous_norm {
            let scale = previous.abs().max_value(max_norm.abs()).to_f64();
            if (previous - max_norm).abs().to_f64() <= parameters.stall_tolerance * scale {
                let w = ConvergenceWarning::UnifPlusStalled {
                    round,
                    max_norm: max_norm.to_f64(),
                    previous_max_norm: previous.to_f64(),
                };
                warn!("{}", w);
                warnings.push(w);
                return Ok(finish(warnings, vd));
            }
        }
        if round >= parameters.max_rounds {
            let w = ConvergenceWarning::UnifPlusRoundLimit { rounds: round, max_norm: max_norm.to_f64() };
            warn!("{}", w);
            warnings.push(w);
            return Ok(finish(warnings, vd));
        }

        lambda = lambda + lambda;
        if round == 1 {
            first_norm = Some(max_norm);
        }
        if round == 2 {
            if let Some(diff0) = first_norm {
                let (d0, d1) = (diff0.to_f64(), max_norm.to_f64());
                if d0 > 0.0 && d1 > 0.0 && d1 < d0 {
                    let jump = ((threshold.to_f64() / d0).ln() / (d1 / d0).ln()).ceil() as i64 - 2;
                    if jump > 0 {
                        debug!("UnifPlus accelerating lambda by 2^{}", jump);
                        lambda = lambda * V::from_f64(2f64.powi(jump.min(64) as i32));
                    }
                }
            }
        }
        previous_norm = Some(max_norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_checking::generator::{random_markov_automaton, GeneratorSettings};
    use crate::model_checking::min_max_solver::GeneralMinMaxSolverFactory;
    use crate::model_checking::value_type::testing::Exact;

    fn parameters(epsilon: f64) -> UnifPlusParameters {
        UnifPlusParameters::from_settings(&Settings::default().with_precision(epsilon))
    }

    fn choice_model() -> (SparseMatrix<f64>, Vec<f64>, BitVector, BitVector) {
        let m = SparseMatrix::from_row_groups(vec![
            vec![vec![(1, 1.0)], vec![(2, 1.0)]],
            vec![vec![(3, 1.0)]],
            vec![vec![(3, 1.0)]],
            vec![vec![(3, 1.0)]],
        ]);
        (m, vec![0.0, 1.0, 2.0, 1.0], BitVector::from_indices(4, vec![1, 2, 3]), BitVector::from_indices(4, vec![3]))
    }

    #[test]
    fn exponential_distribution() {
        let m = SparseMatrix::from_row_groups(vec![vec![vec![(1, 1.0)]], vec![vec![(1, 1.0)]]]);
        let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
        let outcome = unif_plus(
            OptimizationDirection::Maximize,
            1.0,
            &[1.0, 1.0],
            &m,
            &BitVector::new(2, true),
            &BitVector::from_indices(2, vec![1]),
            &parameters(1e-6),
            &factory,
        )
        .unwrap();
        assert!((outcome.values[0] - (1.0 - (-1.0f64).exp())).abs() < 1e-6);
        assert_eq!(outcome.values[1], 1.0);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn nondeterministic_choice() {
        let (m, rates, markovian, psi) = choice_model();
        let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
        let max = unif_plus(OptimizationDirection::Maximize, 1.0, &rates, &m, &markovian, &psi, &parameters(1e-6), &factory).unwrap();
        let min = unif_plus(OptimizationDirection::Minimize, 1.0, &rates, &m, &markovian, &psi, &parameters(1e-6), &factory).unwrap();
        assert!((max.values[0] - (1.0 - (-2.0f64).exp())).abs() < 1e-6);
        assert!((min.values[0] - (1.0 - (-1.0f64).exp())).abs() < 1e-6);
    }

    #[test]
    fn tighter_precision_does_not_loosen_the_norm() {
        let (m, rates, markovian, psi) = choice_model();
        let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
        let loose = unif_plus(OptimizationDirection::Maximize, 1.0, &rates, &m, &markovian, &psi, &parameters(1e-3), &factory).unwrap();
        let tight = unif_plus(OptimizationDirection::Maximize, 1.0, &rates, &m, &markovian, &psi, &parameters(1e-6), &factory).unwrap();
        let tight_threshold = 1e-6 * (1.0 - 0.1);
        assert!(tight.max_norm <= tight_threshold);
        assert!(tight.max_norm <= loose.max_norm.max(tight_threshold));
        assert!(tight.truncation >= loose.truncation);
    }

    #[test]
    fn round_limit_is_reported() {
        // the slow single step wins only when exactly one jump is left, so
        // deciding per remaining jump count overestimates the maximum
        let m = SparseMatrix::from_row_groups(vec![
            vec![vec![(1, 1.0)], vec![(2, 1.0)]],
            vec![vec![(4, 1.0)]],
            vec![vec![(3, 1.0)]],
            vec![vec![(4, 1.0)]],
            vec![vec![(4, 1.0)]],
        ]);
        let rates = [0.0, 1.0, 3.0, 3.0, 1.0];
        let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
        let params = UnifPlusParameters { epsilon: 1e-9, kappa: 0.1, max_rounds: 1, stall_tolerance: 1e-9 };
        let outcome = unif_plus(
            OptimizationDirection::Maximize,
            1.0,
            &rates,
            &m,
            &BitVector::from_indices(5, vec![1, 2, 3, 4]),
            &BitVector::from_indices(5, vec![4]),
            &params,
            &factory,
        )
        .unwrap();
        assert_eq!(outcome.rounds, 1);
        assert!(outcome.max_norm > 1e-3);
        assert!(matches!(outcome.warnings[0], ConvergenceWarning::UnifPlusRoundLimit { rounds: 1, .. }));
        // vd[0] chooses once and is already the true maximum for lambda = 3
        let erlang = 1.0 - (-3.0f64).exp() * 4.0;
        assert!((outcome.values[0] - erlang).abs() < 1e-6);
    }

    #[test]
    fn values_are_probabilities() {
        let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
        for seed in 0..4 {
            let model = random_markov_automaton(&GeneratorSettings::default(), seed).unwrap();
            let ma = &model.automaton;
            for direction in [OptimizationDirection::Maximize, OptimizationDirection::Minimize].iter() {
                let outcome = unif_plus(
                    *direction,
                    2.0,
                    ma.exit_rates(),
                    ma.transition_matrix(),
                    ma.markovian_states(),
                    &model.goal_states,
                    &parameters(1e-6),
                    &factory,
                )
                .unwrap();
                assert!(outcome.values.iter().all(|v| (0.0..=1.0).contains(v)), "{:?}", outcome.values);
                for goal in model.goal_states.iter() {
                    assert_eq!(outcome.values[goal], 1.0);
                }
            }
        }
    }

    #[test]
    fn exact_values_are_rejected() {
        let m = SparseMatrix::from_row_groups(vec![vec![vec![(0, Exact(1.0))]]]);
        let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
        let r = unif_plus(
            OptimizationDirection::Maximize,
            Exact(1.0),
            &[Exact(1.0)],
            &m,
            &BitVector::new(1, true),
            &BitVector::new(1, false),
            &parameters(1e-6),
            &factory,
        );
        assert!(matches!(r, Err(ModelCheckingError::UnsupportedValueType { .. })));
    }
}
