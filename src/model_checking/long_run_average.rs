use std::collections::BTreeMap;

use log::{debug, info, warn};

use super::bit_vector::BitVector;
use super::errors::{CheckResult, ConvergenceWarning, ModelCheckingError, Result};
use super::lp_solver::{LpSolver, LpVariable, Relation};
use super::mec::{MaximalEndComponent, MaximalEndComponentDecomposition};
use super::min_max_solver::{MinMaxLinearEquationSolver, MinMaxSolverFactory, OptimizationDirection};
use super::reward_model::RewardModel;
use super::settings::{LraMethod, Settings};
use super::sparse_matrix::{SparseMatrix, SparseMatrixBuilder};
use super::value_type::ValueType;

/// Long-run fraction of time spent in `psi_states`.
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
    let state_count = matrix.row_group_count();
    if psi_states.is_empty() {
        return Ok(CheckResult::exact(vec![V::zero(); state_count]));
    }
    if psi_states.is_full() {
        return Ok(CheckResult::exact(vec![V::one(); state_count]));
    }
    let goal = psi_states & markovian_states;
    let state_rewards = (0..state_count)
        .map(|s| if goal.get(s) { V::one() } else { V::zero() })
        .collect();
    let reward_model = RewardModel::new().with_state_rewards(state_rewards);
    compute_long_run_average_rewards(
        settings,
        direction,
        matrix,
        backward,
        exit_rates,
        markovian_states,
        &reward_model,
        factory,
    )
}

/// Long-run average reward: one value per MEC, then an expected total reward
/// problem over the states outside MECs and one auxiliary state per MEC.
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
    let state_count = matrix.row_group_count();
    let decomposition = MaximalEndComponentDecomposition::new(matrix, backward);
    info!("long-run average over {} maximal end components", decomposition.len());

    let mut warnings = Vec::new();
    let mut lra_values: Vec<V> = Vec::with_capacity(decomposition.len());
    let mut mec_of: Vec<Option<usize>> = vec![None; state_count];
    for (index, mec) in decomposition.iter().enumerate() {
        for state in mec.states() {
            mec_of[state] = Some(index);
        }
        let (value, warning) = compute_lra_for_maximal_end_component(
            settings,
            direction,
            matrix,
            exit_rates,
            markovian_states,
            reward_model,
            mec,
            index,
            factory,
        )?;
        debug!("MEC {} ({} states): long-run average {}", index, mec.size(), value);
        warnings.extend(warning);
        lra_values.push(value);
    }

    let not_in_mec = BitVector::from_indices(state_count, (0..state_count).filter(|s| mec_of[*s].is_none()));
    let compressed = not_in_mec.compressed_indices();
    let first_auxiliary = not_in_mec.number_of_set_bits();
    let target = |column: usize| match mec_of[column] {
        Some(index) => first_auxiliary + index,
        None => compressed[column].unwrap_or_default(),
    };

    let mut builder = SparseMatrixBuilder::new();
    let mut b: Vec<V> = Vec::new();
    let mut row: usize = 0;
    for state in not_in_mec.iter() {
        builder.new_row_group(row);
        for choice in matrix.row_group(state) {
            for entry in matrix.row(choice) {
                builder.add_next_value(row, target(entry.column), entry.value);
            }
            b.push(V::zero());
            row += 1;
        }
    }
    for (index, mec) in decomposition.iter().enumerate() {
        builder.new_row_group(row);
        for (state, choices) in mec.iter() {
            for choice in matrix.row_group(state).filter(|c| !choices.contains(c)) {
                for entry in matrix.row(choice) {
                    builder.add_next_value(row, target(entry.column), entry.value);
                }
                b.push(V::zero());
                row += 1;
            }
        }
        // staying forever earns the MEC's value
        b.push(lra_values[index]);
        row += 1;
    }
    let group_count = first_auxiliary + decomposition.len();
    let ssp_matrix = builder.build(row, group_count, group_count);

    let mut requirements = factory.requirements(Some(direction), true);
    requirements.clear_bounds();
    if !requirements.is_empty() {
        return Err(ModelCheckingError::UncheckedRequirement(requirements));
    }
    let lower = lra_values.iter().fold(V::zero(), |m, v| m.min_value(*v));
    let upper = lra_values.iter().fold(V::zero(), |m, v| m.max_value(*v));
    let mut solver = factory.create(ssp_matrix);
    solver.set_has_unique_solution(true);
    solver.set_bounds(lower, upper);
    solver.set_requirements_checked(true);
    let mut x = vec![V::zero(); group_count];
    let status = solver.solve_equations(direction, &mut x, &b)?;
    if let Some(w) = status.warning() {
        warn!("{}", w);
        warnings.push(w);
    }

    let values = (0..state_count).map(|s| x[target(s)]).collect();
    Ok(CheckResult::new(values, warnings))
}

/// Long-run average of one MEC with the configured method.
#[allow(clippy::too_many_arguments)]
pub fn compute_lra_for_maximal_end_component<V, F>(
    settings: &Settings,
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    reward_model: &RewardModel<V>,
    mec: &MaximalEndComponent,
    mec_index: usize,
    factory: &F,
) -> Result<(V, Option<ConvergenceWarning>)>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    if !mec.states().any(|s| markovian_states.get(s)) {
        return Err(ModelCheckingError::ZenoBehaviour { mec: mec_index });
    }
    if mec.size() == 1 {
        if let Some((state, choices)) = mec.iter().next() {
            let choice = choices.iter().next().copied().unwrap_or_else(|| matrix.row_group(state).start);
            let value = reward_model.state_reward(state)
                + exit_rates[state] * reward_model.total_state_action_reward(state, choice, matrix, V::zero(), V::one());
            return Ok((value, None));
        }
    }
    match settings.lra_method {
        LraMethod::LinearProgramming => {
            let value = compute_lra_for_maximal_end_component_lp(direction, matrix, exit_rates, markovian_states, reward_model, mec)?;
            Ok((value, None))
        }
        LraMethod::ValueIteration => compute_lra_for_maximal_end_component_vi(
            settings,
            direction,
            matrix,
            exit_rates,
            markovian_states,
            reward_model,
            mec,
            factory,
        ),
        LraMethod::LinearEquations => Err(ModelCheckingError::UnsupportedTechnique(format!(
            "{:?} for long-run averages of Markov automata",
            settings.lra_method
        ))),
    }
}

/// Exact long-run average of a MEC as the optimal `k` of the dual LP.
pub fn compute_lra_for_maximal_end_component_lp<V: ValueType>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    reward_model: &RewardModel<V>,
    mec: &MaximalEndComponent,
) -> Result<V> {
    let mut lp = LpSolver::new("LRA for MEC", direction.invert());
    let k = lp.add_unbounded_continuous_variable("k", 1.0);
    let mut variables: BTreeMap<usize, LpVariable> = BTreeMap::new();
    for state in mec.states() {
        let var = lp.add_unbounded_continuous_variable(&format!("x{}", state), 0.0);
        variables.insert(state, var);
    }
    let relation = match direction {
        OptimizationDirection::Minimize => Relation::LessOrEqual,
        OptimizationDirection::Maximize => Relation::GreaterOrEqual,
    };

    for (state, choices) in mec.iter() {
        let x_state = variables[&state];
        if markovian_states.get(state) {
            let choice = matrix.row_group(state).start;
            let inverse_rate = V::one() / exit_rates[state];
            let mut terms = vec![(x_state, 1.0), (k, inverse_rate.to_f64())];
            for entry in matrix.row(choice) {
                if let Some(var) = variables.get(&entry.column) {
                    terms.push((*var, -entry.value.to_f64()));
                }
            }
            let rhs = reward_model.total_state_action_reward(state, choice, matrix, inverse_rate, V::one());
            lp.add_constraint(&format!("state{}", state), &terms, relation, rhs.to_f64());
        } else {
            for choice in choices.iter().copied() {
                let mut terms = vec![(x_state, 1.0)];
                for entry in matrix.row(choice) {
                    if let Some(var) = variables.get(&entry.column) {
                        terms.push((*var, -entry.value.to_f64()));
                    }
                }
                let rhs = reward_model.total_state_action_reward(state, choice, matrix, V::zero(), V::one());
                lp.add_constraint(&format!("state{}", state), &terms, relation, rhs.to_f64());
            }
        }
    }

    let solution = lp.optimize()?;
    Ok(V::from_f64(solution.continuous_value(k)))
}

/// Approximate long-run average of a MEC by relative value iteration on the
/// uniformized MEC.
#[allow(clippy::too_many_arguments)]
pub fn compute_lra_for_maximal_end_component_vi<V, F>(
    settings: &Settings,
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    reward_model: &RewardModel<V>,
    mec: &MaximalEndComponent,
    factory: &F,
) -> Result<(V, Option<ConvergenceWarning>)>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    let state_count = matrix.row_group_count();
    let mec_markovian = BitVector::from_indices(state_count, mec.states().filter(|s| markovian_states.get(*s)));
    let mec_probabilistic = BitVector::from_indices(state_count, mec.states().filter(|s| !markovian_states.get(*s)));
    let probabilistic_choices = BitVector::from_indices(
        matrix.row_count(),
        mec.iter()
            .filter(|(s, _)| !markovian_states.get(*s))
            .flat_map(|(_, choices)| choices.iter().copied()),
    );
    if mec_markovian.is_empty() {
        return Err(ModelCheckingError::InvalidModel(
            "relative value iteration needs a Markovian state in the end component".to_string(),
        ));
    }

    // the extra 1 leaves every Markovian state a self loop
    let uniformization_rate = mec_markovian
        .iter()
        .fold(V::zero(), |m, s| m.max_value(exit_rates[s]))
        + V::one();

    let mut a_markovian = matrix.submatrix(true, &mec_markovian, &mec_markovian, true);
    let mut a_markovian_to_probabilistic = matrix.submatrix(true, &mec_markovian, &mec_probabilistic, false);
    let mut markovian_rewards = Vec::with_capacity(mec_markovian.number_of_set_bits());
    for (row, state) in mec_markovian.iter().enumerate() {
        let factor = exit_rates[state] / uniformization_rate;
        for entry in a_markovian.row_mut(row) {
            entry.value = if entry.column == row {
                V::one() - factor * (V::one() - entry.value)
            } else {
                entry.value * factor
            };
        }
        for entry in a_markovian_to_probabilistic.row_mut(row) {
            entry.value = entry.value * factor;
        }
        let choice = matrix.row_group(state).start;
        markovian_rewards.push(reward_model.total_state_action_reward(
            state,
            choice,
            matrix,
            V::one() / uniformization_rate,
            factor,
        ));
    }

    let a_probabilistic = matrix.submatrix(false, &probabilistic_choices, &mec_probabilistic, false);
    let a_probabilistic_to_markovian = matrix.submatrix(false, &probabilistic_choices, &mec_markovian, false);
    let probabilistic_rewards: Vec<V> = mec_probabilistic
        .iter()
        .flat_map(|state| {
            mec.choices(state)
                .into_iter()
                .flatten()
                .map(move |choice| reward_model.total_state_action_reward(state, *choice, matrix, V::zero(), V::one()))
        })
        .collect();

    let mut requirements = factory.requirements(Some(direction), true);
    requirements.clear_lower_bounds();
    if !requirements.is_empty() {
        return Err(ModelCheckingError::UncheckedRequirement(requirements));
    }
    let mut solver = factory.create(a_probabilistic);
    solver.set_lower_bound(V::zero());
    solver.set_has_unique_solution(true);
    solver.set_requirements_checked(true);
    solver.set_caching_enabled(true);

    let markovian_count = mec_markovian.number_of_set_bits();
    let precision = V::from_f64(settings.precision) / uniformization_rate;
    let mut w = vec![V::zero(); markovian_count];
    let mut v = vec![V::zero(); markovian_count];
    let mut x = vec![V::zero(); mec_probabilistic.number_of_set_bits()];
    let mut b = probabilistic_rewards.clone();
    let mut scratch_m2p = vec![V::zero(); markovian_count];
    let mut scratch_m = vec![V::zero(); markovian_count];
    let mut scratch_p2m = vec![V::zero(); probabilistic_rewards.len()];
    let mut last_warning = None;
    let mut span = V::infinity();
    let mut iterations: u64 = 0;
    while iterations < settings.max_iterations {
        iterations += 1;
        let status = solver.solve_equations(direction, &mut x, &b)?;
        if let Some(warning) = status.warning() {
            last_warning = Some(warning);
        }

        a_markovian_to_probabilistic.multiply_with_vector(&x, &mut scratch_m2p);
        a_markovian.multiply_with_vector(&w, &mut scratch_m);
        for i in 0..markovian_count {
            v[i] = markovian_rewards[i] + scratch_m2p[i] + scratch_m[i];
        }

        let mut max_diff = v[0] - w[0];
        let mut min_diff = max_diff;
        for (vi, wi) in v.iter().zip(w.iter()).skip(1) {
            let diff = *vi - *wi;
            max_diff = max_diff.max_value(diff);
            min_diff = min_diff.min_value(diff);
        }
        span = max_diff - min_diff;
        if span < precision {
            break;
        }

        let reference = v[0];
        for (wi, vi) in w.iter_mut().zip(v.iter()) {
            *wi = *vi - reference;
        }
        a_probabilistic_to_markovian.multiply_with_vector(&w, &mut scratch_p2m);
        for (bi, (p, r)) in b.iter_mut().zip(scratch_p2m.iter().zip(probabilistic_rewards.iter())) {
            *bi = *p + *r;
        }
    }
    debug!("relative value iteration finished after {} iterations (span {})", iterations, span);

    let mut warning = last_warning;
    if span >= precision {
        let limit = ConvergenceWarning::RelativeValueIterationLimit { iterations, span: span.to_f64() };
        warn!("{}", limit);
        warning = Some(limit);
    }
    Ok((v[0] * uniformization_rate, warning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_checking::generator::{random_markov_automaton, GeneratorSettings, REWARD_MODEL};
    use crate::model_checking::min_max_solver::GeneralMinMaxSolverFactory;
    use crate::model_checking::settings::MinMaxMethod;

    // 0: Markovian, rate 1, reward 1, -> 1
    // 1: probabilistic, a -> 0, b -> 2
    // 2: Markovian, rate 4, -> 1
    fn cycle() -> (SparseMatrix<f64>, Vec<f64>, BitVector, RewardModel<f64>) {
        let m = SparseMatrix::from_row_groups(vec![
            vec![vec![(1, 1.0)]],
            vec![vec![(0, 1.0)], vec![(2, 1.0)]],
            vec![vec![(1, 1.0)]],
        ]);
        let rewards = RewardModel::new().with_state_rewards(vec![1.0, 0.0, 0.0]);
        (m, vec![1.0, 0.0, 4.0], BitVector::from_indices(3, vec![0, 2]), rewards)
    }

    fn lra(settings: &Settings, direction: OptimizationDirection) -> CheckResult<f64> {
        let (m, rates, markovian, rewards) = cycle();
        let factory = GeneralMinMaxSolverFactory::new(settings);
        compute_long_run_average_rewards(settings, direction, &m, &m.transpose(), &rates, &markovian, &rewards, &factory)
            .unwrap()
    }

    #[test]
    fn singleton_mec_yields_its_reward() {
        let m = SparseMatrix::from_row_groups(vec![vec![vec![(0, 1.0)]]]);
        let rewards = RewardModel::new().with_state_rewards(vec![2.5]);
        let settings = Settings::default();
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        for rate in [0.5, 3.0].iter() {
            let r = compute_long_run_average_rewards(
                &settings,
                OptimizationDirection::Maximize,
                &m,
                &m.transpose(),
                &[*rate],
                &BitVector::new(1, true),
                &rewards,
                &factory,
            )
            .unwrap();
            assert_eq!(r.values, vec![2.5]);
        }
    }

    #[test]
    fn linear_programming_and_value_iteration_agree() {
        let lp = Settings::default();
        let vi = Settings::default().with_lra_method(LraMethod::ValueIteration);
        for direction in [OptimizationDirection::Maximize, OptimizationDirection::Minimize].iter() {
            let a = lra(&lp, *direction);
            let b = lra(&vi, *direction);
            let expected = if direction.is_minimize() { 0.0 } else { 1.0 };
            for (x, y) in a.values.iter().zip(b.values.iter()) {
                assert!((x - expected).abs() < 1e-6);
                assert!((x - y).abs() < 1e-5);
            }
            assert!(b.converged());
        }
    }

    #[test]
    fn transient_states_take_the_best_mec() {
        // 0 -> a: 1 (reward 3 forever), b: 2 (reward 1 forever)
        let m = SparseMatrix::from_row_groups(vec![
            vec![vec![(1, 1.0)], vec![(2, 1.0)]],
            vec![vec![(1, 1.0)]],
            vec![vec![(2, 1.0)]],
        ]);
        let rewards = RewardModel::new().with_state_rewards(vec![0.0, 3.0, 1.0]);
        let settings = Settings::default();
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        let markovian = BitVector::from_indices(3, vec![1, 2]);
        let rates = [0.0, 2.0, 5.0];
        let max = compute_long_run_average_rewards(&settings, OptimizationDirection::Maximize, &m, &m.transpose(), &rates, &markovian, &rewards, &factory).unwrap();
        let min = compute_long_run_average_rewards(&settings, OptimizationDirection::Minimize, &m, &m.transpose(), &rates, &markovian, &rewards, &factory).unwrap();
        assert!((max.values[0] - 3.0).abs() < 1e-6);
        assert!((min.values[0] - 1.0).abs() < 1e-6);
        assert_eq!(max.values[1], 3.0);
        assert_eq!(min.values[2], 1.0);
    }

    #[test]
    fn probabilities_shortcuts_and_fraction() {
        let (m, rates, markovian, _) = cycle();
        let settings = Settings::default();
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        let b = m.transpose();
        let none = compute_long_run_average_probabilities(&settings, OptimizationDirection::Maximize, &m, &b, &rates, &markovian, &BitVector::new(3, false), &factory).unwrap();
        assert_eq!(none.values, vec![0.0; 3]);
        let all = compute_long_run_average_probabilities(&settings, OptimizationDirection::Maximize, &m, &b, &rates, &markovian, &BitVector::new(3, true), &factory).unwrap();
        assert_eq!(all.values, vec![1.0; 3]);
        let goal = BitVector::from_indices(3, vec![2]);
        let max = compute_long_run_average_probabilities(&settings, OptimizationDirection::Maximize, &m, &b, &rates, &markovian, &goal, &factory).unwrap();
        assert!(max.values.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn methods_agree_on_every_mec_of_random_models() {
        let lp = Settings::default();
        let vi = Settings::default().with_lra_method(LraMethod::ValueIteration);
        let factory = GeneralMinMaxSolverFactory::new(&lp);
        let generator = GeneratorSettings { states: 12, markovian_fraction: 0.4, ..Default::default() };
        for seed in [3, 7, 11, 19].iter() {
            let model = random_markov_automaton(&generator, *seed).unwrap();
            let ma = &model.automaton;
            let rewards = ma.reward_model(REWARD_MODEL).unwrap();
            let reward_range = (0..ma.number_of_states())
                .map(|s| rewards.state_reward(s))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| (lo.min(r), hi.max(r)));
            let mecs = MaximalEndComponentDecomposition::new(ma.transition_matrix(), ma.backward_transitions());
            assert!(!mecs.is_empty());
            for direction in [OptimizationDirection::Maximize, OptimizationDirection::Minimize].iter() {
                for (index, mec) in mecs.iter().enumerate() {
                    let compute = |settings: &Settings| {
                        compute_lra_for_maximal_end_component(
                            settings,
                            *direction,
                            ma.transition_matrix(),
                            ma.exit_rates(),
                            ma.markovian_states(),
                            rewards,
                            mec,
                            index,
                            &factory,
                        )
                        .unwrap()
                    };
                    let (by_lp, _) = compute(&lp);
                    let (by_vi, warning) = compute(&vi);
                    assert!(by_lp.is_finite() && by_vi.is_finite(), "seed {} mec {}", seed, index);
                    assert!(warning.is_none());
                    assert!(by_lp >= reward_range.0 - 1e-9 && by_lp <= reward_range.1 + 1e-9);
                    assert!((by_lp - by_vi).abs() < 1e-4, "seed {} mec {}: {} vs {}", seed, index, by_lp, by_vi);
                }
                let all = compute_long_run_average_rewards(
                    &lp,
                    *direction,
                    ma.transition_matrix(),
                    ma.backward_transitions(),
                    ma.exit_rates(),
                    ma.markovian_states(),
                    rewards,
                    &factory,
                )
                .unwrap();
                assert!(all.converged());
                assert!(all.values.iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn probabilistic_only_mec_is_zeno() {
        let m = SparseMatrix::from_row_groups(vec![vec![vec![(1, 1.0)]], vec![vec![(0, 1.0)]]]);
        let settings = Settings::default();
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        let rewards = RewardModel::new().with_state_rewards(vec![1.0, 1.0]);
        let r = compute_long_run_average_rewards(
            &settings,
            OptimizationDirection::Maximize,
            &m,
            &m.transpose(),
            &[0.0, 0.0],
            &BitVector::new(2, false),
            &rewards,
            &factory,
        );
        assert!(matches!(r, Err(ModelCheckingError::ZenoBehaviour { mec: 0 })));
    }

    #[test]
    fn unsupported_method_and_requirements() {
        let (m, rates, markovian, rewards) = cycle();
        let b = m.transpose();
        let settings = Settings::default().with_lra_method(LraMethod::LinearEquations);
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        let r = compute_long_run_average_rewards(&settings, OptimizationDirection::Maximize, &m, &b, &rates, &markovian, &rewards, &factory);
        assert!(matches!(r, Err(ModelCheckingError::UnsupportedTechnique(_))));

        let settings = Settings::default()
            .with_lra_method(LraMethod::ValueIteration)
            .with_min_max_method(MinMaxMethod::IntervalIteration);
        let factory = GeneralMinMaxSolverFactory::new(&settings);
        let r = compute_long_run_average_rewards(&settings, OptimizationDirection::Maximize, &m, &b, &rates, &markovian, &rewards, &factory);
        assert!(matches!(r, Err(ModelCheckingError::UncheckedRequirement(_))));
    }
}
