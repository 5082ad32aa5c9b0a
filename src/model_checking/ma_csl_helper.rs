//! Entry points for CSL queries on Markov automata. Timed queries go to one
//! of the two bounded reachability engines, untimed ones to the discrete-time
//! helper, long-run averages to the MEC reduction.
use log::info;

use super::bit_vector::BitVector;
use super::digitization::compute_bounded_until_probabilities_imca;
use super::errors::{CheckResult, ModelCheckingError, Result};
use super::long_run_average;
use super::mdp_helper;
use super::min_max_solver::{MinMaxSolverFactory, OptimizationDirection};
use super::reward_model::RewardModel;
use super::settings::{BoundedReachabilityTechnique, Settings};
use super::sparse_matrix::SparseMatrix;
use super::unif_plus::{unif_plus, UnifPlusParameters};
use super::value_type::{require_exponential, ValueType};

fn check_bounds<V: ValueType>(lower: V, upper: V) -> Result<()> {
    let (l, u) = (lower.to_f64(), upper.to_f64());
    if l >= 0.0 && u >= l && u.is_finite() {
        Ok(())
    } else {
        Err(ModelCheckingError::InvalidBounds { lower: l, upper: u })
    }
}

/// Probability of reaching `psi_states` at some time within `bounds`.
#[allow(clippy::too_many_arguments)]
pub fn compute_bounded_until_probabilities<V, F>(
    settings: &Settings,
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    psi_states: &BitVector,
    bounds: (V, V),
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    require_exponential::<V>("computing bounded until probabilities")?;
    settings.validate()?;
    let (lower, upper) = bounds;
    check_bounds(lower, upper)?;
    let precision = V::from_f64(settings.precision);

    match settings.bounded_reachability_technique {
        BoundedReachabilityTechnique::Imca => compute_bounded_until_probabilities_imca(
            direction,
            matrix,
            exit_rates,
            markovian_states,
            psi_states,
            bounds,
            precision,
            factory,
        ),
        BoundedReachabilityTechnique::UnifPlus if lower > V::zero() => {
            info!("UnifPlus handles intervals starting at 0 only, using digitization for [{}, {}]", lower, upper);
            compute_bounded_until_probabilities_imca(
                direction,
                matrix,
                exit_rates,
                markovian_states,
                psi_states,
                bounds,
                precision,
                factory,
            )
        }
        BoundedReachabilityTechnique::UnifPlus => {
            let outcome = unif_plus(
                direction,
                upper,
                exit_rates,
                matrix,
                markovian_states,
                psi_states,
                &UnifPlusParameters::from_settings(settings),
                factory,
            )?;
            Ok(CheckResult::new(outcome.values, outcome.warnings))
        }
    }
}

/// Time plays no role for unbounded until, so the embedded discrete model
/// answers it.
pub fn compute_until_probabilities<V, F>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi_states: &BitVector,
    psi_states: &BitVector,
    qualitative: bool,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    mdp_helper::compute_until_probabilities(direction, matrix, backward, phi_states, psi_states, qualitative, factory)
}

/// State rewards are earned per time unit in Markovian states and weighted by
/// the expected sojourn time `1 / exit_rate`; probabilistic states are left
/// instantly.
#[allow(clippy::too_many_arguments)]
pub fn compute_reachability_rewards<V, F>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    reward_model: &RewardModel<V>,
    psi_states: &BitVector,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    reward_model.validate(matrix)?;
    let state_weights: Vec<V> = (0..matrix.row_group_count())
        .map(|s| if markovian_states.get(s) { V::one() / exit_rates[s] } else { V::zero() })
        .collect();
    let action_rewards = reward_model.total_action_reward_vector(matrix, &state_weights);
    mdp_helper::compute_reachability_rewards(direction, matrix, backward, &action_rewards, psi_states, factory)
}

/// Expected time until reaching `psi_states`.
pub fn compute_reachability_times<V, F>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    psi_states: &BitVector,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    let mut rewards = vec![V::zero(); matrix.row_count()];
    for state in markovian_states.iter() {
        rewards[matrix.row_group(state).start] = V::one() / exit_rates[state];
    }
    mdp_helper::compute_reachability_rewards(direction, matrix, backward, &rewards, psi_states, factory)
}

#[allow(clippy::too_many_arguments)]
pub fn compute_long_run_average_probabilities<V, F>(
    settings: &Settings,
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    psi_states: &BitVector,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    settings.validate()?;
    long_run_average::compute_long_run_average_probabilities(
        settings,
        direction,
        matrix,
        backward,
        exit_rates,
        markovian_states,
        psi_states,
        factory,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn compute_long_run_average_rewards<V, F>(
    settings: &Settings,
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    reward_model: &RewardModel<V>,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    settings.validate()?;
    reward_model.validate(matrix)?;
    long_run_average::compute_long_run_average_rewards(
        settings,
        direction,
        matrix,
        backward,
        exit_rates,
        markovian_states,
        reward_model,
        factory,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_checking::generator::{random_markov_automaton, GeneratorSettings, REWARD_MODEL};
    use crate::model_checking::min_max_solver::GeneralMinMaxSolverFactory;
    use crate::model_checking::value_type::testing::Exact;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn chain() -> (SparseMatrix<f64>, BitVector, BitVector) {
        let m = SparseMatrix::from_row_groups(vec![vec![vec![(1, 1.0)]], vec![vec![(1, 1.0)]]]);
        (m, BitVector::new(2, true), BitVector::from_indices(2, vec![1]))
    }

    #[test]
    fn exponential_chain_with_both_techniques() {
        init();
        let (m, markovian, psi) = chain();
        let expected = 1.0 - (-1.0f64).exp();
        for technique in [BoundedReachabilityTechnique::Imca, BoundedReachabilityTechnique::UnifPlus].iter() {
            let settings = Settings::default().with_technique(*technique);
            let factory = GeneralMinMaxSolverFactory::new(&settings);
            let r = compute_bounded_until_probabilities(
                &settings,
                OptimizationDirection::Maximize,
                &m,
                &[1.0, 1.0],
                &markovian,
                &psi,
                (0.0, 1.0),
                &factory,
            )
            .unwrap();
            assert!((r.values[0] - expected).abs() < 1e-6, "{:?}: {}", technique, r.values[0]);
            assert_eq!(r.values[1], 1.0);
        }
    }

    #[test]
    fn unif_plus_with_lower_bound_uses_digitization() {
        init();
        let (m, markovian, psi) = chain();
        let imca = Settings::default().with_precision(1e-4);
        let unif = imca.clone().with_technique(BoundedReachabilityTechnique::UnifPlus);
        let factory = GeneralMinMaxSolverFactory::new(&imca);
        let a = compute_bounded_until_probabilities(&imca, OptimizationDirection::Maximize, &m, &[1.0, 1.0], &markovian, &psi, (0.5, 1.0), &factory).unwrap();
        let b = compute_bounded_until_probabilities(&unif, OptimizationDirection::Maximize, &m, &[1.0, 1.0], &markovian, &psi, (0.5, 1.0), &factory).unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn invalid_bounds_and_value_types() {
        let (m, markovian, psi) = chain();
        let settings = Settings::default();
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        for bounds in [(-1.0, 1.0), (2.0, 1.0), (0.0, f64::INFINITY), (f64::NAN, 1.0)].iter() {
            let r = compute_bounded_until_probabilities(&settings, OptimizationDirection::Maximize, &m, &[1.0, 1.0], &markovian, &psi, *bounds, &factory);
            assert!(matches!(r, Err(ModelCheckingError::InvalidBounds { .. })));
        }

        let exact = SparseMatrix::from_row_groups(vec![vec![vec![(1, Exact(1.0))]], vec![vec![(1, Exact(1.0))]]]);
        for technique in [BoundedReachabilityTechnique::Imca, BoundedReachabilityTechnique::UnifPlus].iter() {
            let settings = Settings::default().with_technique(*technique);
            let r = compute_bounded_until_probabilities(
                &settings,
                OptimizationDirection::Maximize,
                &exact,
                &[Exact(1.0), Exact(1.0)],
                &markovian,
                &psi,
                (Exact(0.0), Exact(1.0)),
                &factory,
            );
            assert!(matches!(r, Err(ModelCheckingError::UnsupportedValueType { .. })));
        }
    }

    #[test]
    fn techniques_agree_on_random_models() {
        init();
        let precision = 1e-3;
        let generator = GeneratorSettings { states: 8, max_rate: 2.0, ..Default::default() };
        for seed in 0..3 {
            let model = random_markov_automaton(&generator, seed).unwrap();
            let ma = &model.automaton;
            for direction in [OptimizationDirection::Maximize, OptimizationDirection::Minimize].iter() {
                let imca = Settings::default().with_precision(precision);
                let unif = imca.clone().with_technique(BoundedReachabilityTechnique::UnifPlus);
                let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
                let a = ma.bounded_until(&imca, *direction, &model.goal_states, (0.0, 1.0), &factory).unwrap();
                let b = ma.bounded_until(&unif, *direction, &model.goal_states, (0.0, 1.0), &factory).unwrap();
                for (x, y) in a.values.iter().zip(b.values.iter()) {
                    assert!((x - y).abs() <= 2.0 * precision, "seed {}: {} vs {}", seed, x, y);
                }
            }
        }
    }

    #[test]
    fn repeated_queries_give_identical_results() {
        let model = random_markov_automaton(&GeneratorSettings::default(), 11).unwrap();
        let ma = &model.automaton;
        let settings = Settings::default().with_precision(1e-3);
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        let goal = &model.goal_states;
        let d = OptimizationDirection::Maximize;
        assert_eq!(
            ma.bounded_until(&settings, d, goal, (0.0, 0.5), &factory).unwrap(),
            ma.bounded_until(&settings, d, goal, (0.0, 0.5), &factory).unwrap()
        );
        let lra = ma.long_run_average_rewards(&settings, d, REWARD_MODEL, &factory).unwrap();
        assert!(lra.converged());
        assert!(lra.values.iter().all(|v| v.is_finite()), "{:?}", lra.values);
        assert_eq!(lra, ma.long_run_average_rewards(&settings, d, REWARD_MODEL, &factory).unwrap());
        assert_eq!(
            ma.reachability_times(d, goal, &factory).unwrap(),
            ma.reachability_times(d, goal, &factory).unwrap()
        );
    }

    #[test]
    fn rewards_are_weighted_by_sojourn_time() {
        // 0: Markovian (rate 2, reward 3) -> 1 (goal)
        let m = SparseMatrix::from_row_groups(vec![vec![vec![(1, 1.0)]], vec![vec![(1, 1.0)]]]);
        let markovian = BitVector::new(2, true);
        let goal = BitVector::from_indices(2, vec![1]);
        let factory = GeneralMinMaxSolverFactory::new(&Settings::default());
        let rewards = RewardModel::new()
            .with_state_rewards(vec![3.0, 0.0])
            .with_state_action_rewards(vec![1.0, 0.0]);
        let b = m.transpose();
        let r = compute_reachability_rewards(OptimizationDirection::Minimize, &m, &b, &[2.0, 1.0], &markovian, &rewards, &goal, &factory).unwrap();
        assert!((r.values[0] - 2.5).abs() < 1e-9);
        let t = compute_reachability_times(OptimizationDirection::Minimize, &m, &b, &[2.0, 1.0], &markovian, &goal, &factory).unwrap();
        assert!((t.values[0] - 0.5).abs() < 1e-9);
        let u = compute_until_probabilities(OptimizationDirection::Minimize, &m, &b, &markovian, &goal, false, &factory).unwrap();
        assert_eq!(u.values, vec![1.0, 1.0]);
    }
}
