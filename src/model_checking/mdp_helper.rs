use log::{debug, warn};

use super::bit_vector::BitVector;
use super::errors::{CheckResult, ConvergenceWarning, ModelCheckingError, Result};
use super::graph::{perform_prob01_max, perform_prob01_min, perform_prob1a, perform_prob1e};
use super::helper_methods::set_vector_values;
use super::mec::MaximalEndComponentDecomposition;
use super::min_max_solver::{
    MinMaxLinearEquationSolver, MinMaxSolverFactory, OptimizationDirection, SolverStatus,
};
use super::sparse_matrix::SparseMatrix;
use super::value_type::ValueType;

fn record_status(status: &SolverStatus, warnings: &mut Vec<ConvergenceWarning>) {
    if let Some(w) = status.warning() {
        warn!("{}", w);
        warnings.push(w);
    }
}

/// Rows of the selected groups whose successors all lie in `targets`.
fn rows_staying_in<V: ValueType>(matrix: &SparseMatrix<V>, groups: &BitVector, targets: &BitVector) -> BitVector {
    let mut rows = BitVector::new(matrix.row_count(), false);
    for state in groups.iter() {
        for row in matrix.row_group(state) {
            if matrix.row(row).iter().all(|e| targets.get(e.column)) {
                rows.set(row, true);
            }
        }
    }
    rows
}

/// Unbounded `phi U psi` in the embedded discrete-time model.
pub fn compute_until_probabilities<V, F>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitVector,
    psi: &BitVector,
    qualitative: bool,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    let (prob0, prob1) = match direction {
        OptimizationDirection::Maximize => perform_prob01_max(matrix, backward, phi, psi),
        OptimizationDirection::Minimize => perform_prob01_min(matrix, backward, phi, psi),
    };
    let maybe = !&(&prob0 | &prob1);
    debug!(
        "until probabilities: {} states with probability 0, {} with probability 1, {} maybe",
        prob0.number_of_set_bits(),
        prob1.number_of_set_bits(),
        maybe.number_of_set_bits()
    );

    let mut result = vec![V::zero(); matrix.row_group_count()];
    for state in prob1.iter() {
        result[state] = V::one();
    }
    let mut warnings = Vec::new();
    if maybe.is_empty() {
        return Ok(CheckResult::new(result, warnings));
    }
    if qualitative {
        let half = V::one() / (V::one() + V::one());
        for state in maybe.iter() {
            result[state] = half;
        }
        return Ok(CheckResult::new(result, warnings));
    }

    // states that cannot avoid psi forever leave no end component among the
    // maybe states for minimisation; for maximisation there may be some
    let has_unique_solution = direction.is_minimize() || {
        let choices = rows_staying_in(matrix, &maybe, &maybe);
        MaximalEndComponentDecomposition::with_restriction(matrix, backward, &maybe, &choices).is_empty()
    };
    let mut requirements = factory.requirements(Some(direction), has_unique_solution);
    requirements.clear_bounds();
    if !requirements.is_empty() {
        return Err(ModelCheckingError::UncheckedRequirement(requirements));
    }

    let submatrix = matrix.submatrix(true, &maybe, &maybe, false);
    let b = matrix.constrained_row_group_sum_vector(&maybe, &prob1);
    let mut x = vec![V::zero(); maybe.number_of_set_bits()];
    let mut solver = factory.create(submatrix);
    solver.set_has_unique_solution(has_unique_solution);
    solver.set_bounds(V::zero(), V::one());
    solver.set_requirements_checked(true);
    let status = solver.solve_equations(direction, &mut x, &b)?;
    record_status(&status, &mut warnings);

    set_vector_values(&mut result, &maybe, &x);
    Ok(CheckResult::new(result, warnings))
}

/// Expected reward accumulated until reaching `psi`; `action_rewards` holds one
/// value per row. States that do not reach `psi` almost surely get infinity.
pub fn compute_reachability_rewards<V, F>(
    direction: OptimizationDirection,
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    action_rewards: &[V],
    psi: &BitVector,
    factory: &F,
) -> Result<CheckResult<V>>
where
    V: ValueType,
    F: MinMaxSolverFactory<V>,
{
    let all = BitVector::new(matrix.row_group_count(), true);
    let infinity_states = match direction {
        OptimizationDirection::Minimize => !perform_prob1e(matrix, backward, &all, psi),
        OptimizationDirection::Maximize => !perform_prob1a(matrix, backward, &all, psi),
    };
    let maybe = !&(psi | &infinity_states);
    debug!(
        "reachability rewards: {} goal states, {} infinity states, {} maybe",
        psi.number_of_set_bits(),
        infinity_states.number_of_set_bits(),
        maybe.number_of_set_bits()
    );

    let mut result = vec![V::zero(); matrix.row_group_count()];
    for state in infinity_states.iter() {
        result[state] = V::infinity();
    }
    let mut warnings = Vec::new();
    if maybe.is_empty() {
        return Ok(CheckResult::new(result, warnings));
    }

    // minimising schedulers must not pick choices that risk infinite reward
    let rows = match direction {
        OptimizationDirection::Minimize => rows_staying_in(matrix, &maybe, &(&maybe | psi)),
        OptimizationDirection::Maximize => matrix.row_filter(&maybe),
    };
    // every maximising scheduler reaches psi from a maybe state, so only
    // minimisation can meet end components, and those of positive reward
    // are never chosen forever
    let quotient = if direction.is_minimize() {
        collapse_zero_reward_end_components(matrix, backward, action_rewards, &maybe, &rows)
    } else {
        Quotient::identity(matrix, action_rewards, &maybe, &rows)
    };
    let mut requirements = factory.requirements(Some(direction), true);
    requirements.clear_lower_bounds();
    if !requirements.is_empty() {
        return Err(ModelCheckingError::UncheckedRequirement(requirements));
    }

    let mut x = vec![V::zero(); quotient.matrix.row_group_count()];
    let mut solver = factory.create(quotient.matrix);
    solver.set_has_unique_solution(true);
    solver.set_lower_bound(V::zero());
    solver.set_requirements_checked(true);
    let status = solver.solve_equations(direction, &mut x, &quotient.rewards)?;
    record_status(&status, &mut warnings);

    for (state, index) in maybe.iter().zip(quotient.state_of.iter()) {
        result[state] = x[*index];
    }
    Ok(CheckResult::new(result, warnings))
}

/// Reward system over the maybe states with some of them merged.
/// `state_of[i]` is the merged state of the i-th maybe state.
struct Quotient<V> {
    matrix: SparseMatrix<V>,
    rewards: Vec<V>,
    state_of: Vec<usize>,
}

impl<V: ValueType> Quotient<V> {
    fn identity(matrix: &SparseMatrix<V>, action_rewards: &[V], maybe: &BitVector, rows: &BitVector) -> Quotient<V> {
        let members: Vec<Vec<usize>> = maybe.iter().map(|s| vec![s]).collect();
        let state_of = (0..members.len()).collect();
        Quotient::build(matrix, action_rewards, maybe, rows, &members, state_of, &BitVector::new(matrix.row_count(), false))
    }

    /// Rows of the merged states over `members`; `internal` rows are dropped
    /// and successors outside `maybe` carry no further reward.
    fn build(
        matrix: &SparseMatrix<V>,
        action_rewards: &[V],
        maybe: &BitVector,
        rows: &BitVector,
        members: &[Vec<usize>],
        state_of: Vec<usize>,
        internal: &BitVector,
    ) -> Quotient<V> {
        let compressed = maybe.compressed_indices();
        let mut groups: Vec<Vec<Vec<(usize, V)>>> = Vec::with_capacity(members.len());
        let mut rewards = Vec::new();
        for states in members.iter() {
            let mut choices = Vec::new();
            for state in states.iter() {
                for row in matrix.row_group(*state).filter(|r| rows.get(*r) && !internal.get(*r)) {
                    let successors: Vec<(usize, V)> = matrix
                        .row(row)
                        .iter()
                        .filter_map(|e| compressed[e.column].map(|i| (state_of[i], e.value)))
                        .collect();
                    choices.push(successors);
                    rewards.push(action_rewards[row]);
                }
            }
            if choices.is_empty() {
                choices.push(Vec::new());
                rewards.push(V::zero());
            }
            groups.push(choices);
        }
        Quotient { matrix: SparseMatrix::from_row_groups(groups), rewards, state_of }
    }
}

/// Merges each end component of zero-reward rows among `maybe` into one
/// state that keeps the component's exits. The remaining system has a unique
/// fixed point.
fn collapse_zero_reward_end_components<V: ValueType>(
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    action_rewards: &[V],
    maybe: &BitVector,
    rows: &BitVector,
) -> Quotient<V> {
    let zero_reward_rows = BitVector::from_indices(
        matrix.row_count(),
        rows.iter().filter(|r| action_rewards[*r].is_zero()),
    );
    let staying = &zero_reward_rows & &rows_staying_in(matrix, maybe, maybe);
    let components = MaximalEndComponentDecomposition::with_restriction(matrix, backward, maybe, &staying);
    if components.is_empty() {
        return Quotient::identity(matrix, action_rewards, maybe, rows);
    }
    debug!("collapsing {} zero-reward end components", components.len());

    let mut component_of = vec![None; matrix.row_group_count()];
    let mut internal = BitVector::new(matrix.row_count(), false);
    for (index, component) in components.iter().enumerate() {
        for (state, choices) in component.iter() {
            component_of[state] = Some(index);
            for choice in choices.iter() {
                internal.set(*choice, true);
            }
        }
    }

    let mut members: Vec<Vec<usize>> = Vec::new();
    let mut merged_index: Vec<Option<usize>> = vec![None; components.len()];
    let mut state_of = Vec::with_capacity(maybe.number_of_set_bits());
    for state in maybe.iter() {
        let index = match component_of[state] {
            Some(component) => match merged_index[component] {
                Some(index) => {
                    members[index].push(state);
                    index
                }
                None => {
                    merged_index[component] = Some(members.len());
                    members.push(vec![state]);
                    members.len() - 1
                }
            },
            None => {
                members.push(vec![state]);
                members.len() - 1
            }
        };
        state_of.push(index);
    }
    Quotient::build(matrix, action_rewards, maybe, rows, &members, state_of, &internal)
}
