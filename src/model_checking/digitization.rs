//! Time-bounded reachability by digitization: time is cut into steps of
//! length `delta`, short enough that at most one Markovian jump per step is
//! a good approximation.
use log::{info, warn};

use super::bit_vector::BitVector;
use super::errors::{CheckResult, ConvergenceWarning, ModelCheckingError, Result};
use super::helper_methods::{max_if, set_vector_values};
use super::min_max_solver::{MinMaxLinearEquationSolver, MinMaxSolverFactory, OptimizationDirection};
use super::sparse_matrix::SparseMatrix;
use super::value_type::{exp, require_exponential, ValueType};

const OPERATION: &str = "computing bounded reachability probabilities";

/// Replaces each entry `p` of a Markovian row by `(1 - e^{-rate delta}) p`,
/// adding `e^{-rate delta}` to the self loop when `self_loops` is set.
fn digitize<V: ValueType>(
    matrix: &mut SparseMatrix<V>,
    states: &BitVector,
    exit_rates: &[V],
    delta: V,
    self_loops: bool,
) -> Result<()> {
    for (row, state) in states.iter().enumerate() {
        let e_term = exp(-exit_rates[state] * delta, OPERATION)?;
        for entry in matrix.row_mut(row) {
            if self_loops && entry.column == row {
                entry.value = (V::one() - e_term) * entry.value + e_term;
            } else {
                entry.value = (V::one() - e_term) * entry.value;
            }
        }
    }
    Ok(())
}

/// Runs `number_of_steps` digitized steps followed by one final solve of the
/// probabilistic states. The value vectors are compressed to
/// `markovian_non_goal` and `probabilistic_non_goal` respectively and hold the
/// starting values on entry.
#[allow(clippy::too_many_arguments)]
pub fn compute_bounded_reachability_probabilities<V, F>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    exit_rates: &[V],
    goal_states: &BitVector,
    markovian_non_goal: &BitVector,
    probabilistic_non_goal: &BitVector,
    markovian_values: &mut Vec<V>,
    probabilistic_values: &mut Vec<V>,
    delta: V,
    number_of_steps: u64,
    factory: &F,
) -> Result<Vec<ConvergenceWarning>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    require_exponential::<V>(OPERATION)?;

    let mut a_markovian = matrix.submatrix(true, markovian_non_goal, markovian_non_goal, true);
    let has_probabilistic = !probabilistic_non_goal.is_empty();
    let mut a_markovian_to_probabilistic = matrix.submatrix(true, markovian_non_goal, probabilistic_non_goal, false);
    let a_probabilistic = matrix.submatrix(true, probabilistic_non_goal, probabilistic_non_goal, false);
    let a_probabilistic_to_markovian = matrix.submatrix(true, probabilistic_non_goal, markovian_non_goal, false);

    digitize(&mut a_markovian, markovian_non_goal, exit_rates, delta, true)?;
    digitize(&mut a_markovian_to_probabilistic, markovian_non_goal, exit_rates, delta, false)?;

    // one-step mass into the goal states
    let b_probabilistic_fixed = matrix.constrained_row_group_sum_vector(probabilistic_non_goal, goal_states);
    let mut b_markovian_fixed = Vec::with_capacity(markovian_non_goal.number_of_set_bits());
    for state in markovian_non_goal.iter() {
        let e_term = exp(-exit_rates[state] * delta, OPERATION)?;
        let mut mass = V::zero();
        for row in matrix.row_group(state) {
            mass += (V::one() - e_term) * matrix.constrained_row_sum(row, goal_states);
        }
        b_markovian_fixed.push(mass);
    }

    let mut requirements = factory.requirements(Some(direction), true);
    requirements.clear_bounds();
    if !requirements.is_empty() {
        return Err(ModelCheckingError::UncheckedRequirement(requirements));
    }
    let mut solver = factory.create(a_probabilistic);
    solver.set_has_unique_solution(true);
    solver.set_bounds(V::zero(), V::one());
    solver.set_requirements_checked(true);
    solver.set_caching_enabled(true);

    let mut b_probabilistic = vec![V::zero(); b_probabilistic_fixed.len()];
    let mut b_markovian = vec![V::zero(); b_markovian_fixed.len()];
    let mut markovian_swap = markovian_values.clone();
    let mut last_warning: Option<ConvergenceWarning> = None;
    let mut unconverged_solves: u64 = 0;

    for _ in 0..number_of_steps {
        if has_probabilistic {
            a_probabilistic_to_markovian.multiply_with_vector(markovian_values, &mut b_probabilistic);
            for (b, fixed) in b_probabilistic.iter_mut().zip(b_probabilistic_fixed.iter()) {
                *b += *fixed;
            }
            let status = solver.solve_equations(direction, probabilistic_values, &b_probabilistic)?;
            if let Some(w) = status.warning() {
                unconverged_solves += 1;
                last_warning = Some(w);
            }
            a_markovian_to_probabilistic.multiply_with_vector(probabilistic_values, &mut b_markovian);
            for (b, fixed) in b_markovian.iter_mut().zip(b_markovian_fixed.iter()) {
                *b += *fixed;
            }
        }

        a_markovian.multiply_with_vector(markovian_values, &mut markovian_swap);
        std::mem::swap(markovian_values, &mut markovian_swap);
        let offset = if has_probabilistic { &b_markovian } else { &b_markovian_fixed };
        for (v, b) in markovian_values.iter_mut().zip(offset.iter()) {
            *v += *b;
        }
    }

    if has_probabilistic {
        a_probabilistic_to_markovian.multiply_with_vector(markovian_values, &mut b_probabilistic);
        for (b, fixed) in b_probabilistic.iter_mut().zip(b_probabilistic_fixed.iter()) {
            *b += *fixed;
        }
        let status = solver.solve_equations(direction, probabilistic_values, &b_probabilistic)?;
        if let Some(w) = status.warning() {
            unconverged_solves += 1;
            last_warning = Some(w);
        }
    }

    let mut warnings = Vec::new();
    if let Some(w) = last_warning {
        warn!("{} of the probabilistic solves did not converge, last: {}", unconverged_solves, w);
        warnings.push(w);
    }
    Ok(warnings)
}

/// Step length keeping the discretization error below `precision`; `None`
/// when no time can pass (zero horizon or no positive rate).
pub fn digitization_step<V: ValueType>(precision: V, upper: V, max_exit_rate: V) -> Option<V> {
    if upper <= V::zero() || max_exit_rate <= V::zero() {
        None
    } else {
        let two = V::one() + V::one();
        Some(two * precision / (upper * max_exit_rate * max_exit_rate))
    }
}

fn number_of_steps<V: ValueType>(length: V, delta: Option<V>) -> u64 {
    match delta {
        Some(d) if length > V::zero() => (length / d).to_f64().ceil() as u64,
        _ => 0,
    }
}

/// Bounded until over `[lower, upper]` by digitization. For a positive lower
/// bound, the values for `[0, upper - lower]` seed a second run over all
/// states for `lower` more time units.
#[allow(clippy::too_many_arguments)]
pub fn compute_bounded_until_probabilities_imca<V, F>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    exit_rates: &[V],
    markovian_states: &BitVector,
    psi_states: &BitVector,
    bounds: (V, V),
    precision: V,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    require_exponential::<V>(OPERATION)?;
    let (lower, upper) = bounds;
    let state_count = matrix.row_group_count();

    let all = BitVector::new(state_count, true);
    let max_exit_rate = max_if(exit_rates, &all);
    let delta = digitization_step(precision, upper, max_exit_rate);
    let steps = number_of_steps(upper - lower, delta);
    let delta = delta.unwrap_or_else(V::zero);
    info!(
        "performing {} iterations (delta={}) for interval [{}, {}]",
        steps, delta, lower, upper
    );

    let markovian_non_goal = markovian_states.and_not(psi_states);
    let probabilistic_non_goal = (!markovian_states).and_not(psi_states);
    let mut v_probabilistic = vec![V::zero(); probabilistic_non_goal.number_of_set_bits()];
    let mut v_markovian = vec![V::zero(); markovian_non_goal.number_of_set_bits()];

    let mut warnings = compute_bounded_reachability_probabilities(
        direction,
        matrix,
        exit_rates,
        psi_states,
        &markovian_non_goal,
        &probabilistic_non_goal,
        &mut v_markovian,
        &mut v_probabilistic,
        delta,
        steps,
        factory,
    )?;

    let mut result = vec![V::zero(); state_count];
    if lower > V::zero() {
        let probabilistic_states = !markovian_states;
        let mut seed = vec![V::zero(); state_count];
        for state in psi_states.iter() {
            seed[state] = V::one();
        }
        set_vector_values(&mut seed, &probabilistic_non_goal, &v_probabilistic);
        set_vector_values(&mut seed, &markovian_non_goal, &v_markovian);
        let mut v_all_probabilistic: Vec<V> = probabilistic_states.iter().map(|s| seed[s]).collect();
        let mut v_all_markovian: Vec<V> = markovian_states.iter().map(|s| seed[s]).collect();

        let steps = number_of_steps(lower, Some(delta).filter(|d| *d > V::zero()));
        info!("performing {} iterations (delta={}) for interval [0, {}]", steps, delta, lower);
        warnings.extend(compute_bounded_reachability_probabilities(
            direction,
            matrix,
            exit_rates,
            &BitVector::new(state_count, false),
            markovian_states,
            &probabilistic_states,
            &mut v_all_markovian,
            &mut v_all_probabilistic,
            delta,
            steps,
            factory,
        )?);

        set_vector_values(&mut result, &probabilistic_states, &v_all_probabilistic);
        set_vector_values(&mut result, markovian_states, &v_all_markovian);
    } else {
        for state in psi_states.iter() {
            result[state] = V::one();
        }
        set_vector_values(&mut result, &probabilistic_non_goal, &v_probabilistic);
        set_vector_values(&mut result, &markovian_non_goal, &v_markovian);
    }
    Ok(CheckResult::new(result, warnings))
}
