use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use ordered_float::NotNan;

use super::bit_vector::BitVector;
use super::errors::{CheckResult, ModelCheckingError, Result};
use super::ma_csl_helper;
use super::min_max_solver::{MinMaxSolverFactory, OptimizationDirection};
use super::reward_model::RewardModel;
use super::settings::Settings;
use super::sparse_matrix::SparseMatrix;
use super::value_type::ValueType;

const STOCHASTIC_TOLERANCE: f64 = 1e-6;

/// A validated Markov automaton: the transition matrix with one row group per
/// state, exit rates of the Markovian states and named reward models.
#[derive(Debug, Clone)]
pub struct MarkovAutomaton<V> {
    transition_matrix: SparseMatrix<V>,
    backward_transitions: SparseMatrix<V>,
    exit_rates: Vec<V>,
    markovian_states: BitVector,
    reward_models: BTreeMap<String, RewardModel<V>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelStatistics {
    pub states: usize,
    pub choices: usize,
    pub transitions: usize,
    pub markovian_states: usize,
    pub probabilistic_states: usize,
    /// probabilistic states with more than one choice
    pub nondeterministic_states: usize,
    /// transitions from a Markovian into a probabilistic state
    pub alternating_transitions: usize,
    /// choices of probabilistic states with more than one successor
    pub branching_choices: usize,
}

impl fmt::Display for ModelStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} states ({} Markovian, {} probabilistic, {} nondeterministic), {} choices, {} transitions, \
             {} Markovian-to-probabilistic transitions, {} branching probabilistic choices",
            self.states,
            self.markovian_states,
            self.probabilistic_states,
            self.nondeterministic_states,
            self.choices,
            self.transitions,
            self.alternating_transitions,
            self.branching_choices
        )
    }
}

fn not_nan<V: ValueType>(value: V, what: &str) -> Result<NotNan<f64>> {
    NotNan::new(value.to_f64()).map_err(|_| ModelCheckingError::InvalidModel(format!("{} is NaN", what)))
}

impl<V: ValueType> MarkovAutomaton<V> {
    pub fn new(transition_matrix: SparseMatrix<V>, exit_rates: Vec<V>, markovian_states: BitVector) -> Result<Self> {
        validate(&transition_matrix, &exit_rates, &markovian_states)?;
        let backward_transitions = transition_matrix.transpose();
        let ma = MarkovAutomaton {
            transition_matrix,
            backward_transitions,
            exit_rates,
            markovian_states,
            reward_models: BTreeMap::new(),
        };
        debug!("built Markov automaton: {}", ma.statistics());
        Ok(ma)
    }

    pub fn with_reward_model(mut self, name: &str, reward_model: RewardModel<V>) -> Result<Self> {
        reward_model.validate(&self.transition_matrix)?;
        self.reward_models.insert(name.to_string(), reward_model);
        Ok(self)
    }

    pub fn reward_model(&self, name: &str) -> Result<&RewardModel<V>> {
        self.reward_models
            .get(name)
            .ok_or_else(|| ModelCheckingError::InvalidModel(format!("no reward model named '{}'", name)))
    }

    pub fn number_of_states(&self) -> usize {
        self.transition_matrix.row_group_count()
    }

    pub fn transition_matrix(&self) -> &SparseMatrix<V> {
        &self.transition_matrix
    }

    pub fn backward_transitions(&self) -> &SparseMatrix<V> {
        &self.backward_transitions
    }

    pub fn exit_rates(&self) -> &[V] {
        &self.exit_rates
    }

    pub fn markovian_states(&self) -> &BitVector {
        &self.markovian_states
    }

    pub fn probabilistic_states(&self) -> BitVector {
        !&self.markovian_states
    }

    pub fn is_markovian(&self, state: usize) -> bool {
        self.markovian_states.get(state)
    }

    pub fn max_exit_rate(&self) -> V {
        self.markovian_states
            .iter()
            .fold(V::zero(), |m, s| m.max_value(self.exit_rates[s]))
    }

    pub fn statistics(&self) -> ModelStatistics {
        let m = &self.transition_matrix;
        let probabilistic = self.probabilistic_states();
        let mut stats = ModelStatistics {
            states: m.row_group_count(),
            choices: m.row_count(),
            transitions: m.entry_count(),
            markovian_states: self.markovian_states.number_of_set_bits(),
            probabilistic_states: probabilistic.number_of_set_bits(),
            nondeterministic_states: 0,
            alternating_transitions: 0,
            branching_choices: 0,
        };
        for state in self.markovian_states.iter() {
            for row in m.row_group(state) {
                stats.alternating_transitions += m.row(row).iter().filter(|e| probabilistic.get(e.column)).count();
            }
        }
        for state in probabilistic.iter() {
            if m.row_group_size(state) > 1 {
                stats.nondeterministic_states += 1;
            }
            stats.branching_choices += m.row_group(state).filter(|r| m.row(*r).len() > 1).count();
        }
        stats
    }

    pub fn bounded_until<F: MinMaxSolverFactory<V>>(
        &self,
        settings: &Settings,
        direction: OptimizationDirection,
        psi_states: &BitVector,
        bounds: (V, V),
        factory: &F,
    ) -> Result<CheckResult<V>> {
        debug!("bounded until on {}", self.statistics());
        ma_csl_helper::compute_bounded_until_probabilities(
            settings,
            direction,
            &self.transition_matrix,
            &self.exit_rates,
            &self.markovian_states,
            psi_states,
            bounds,
            factory,
        )
    }

    pub fn until<F: MinMaxSolverFactory<V>>(
        &self,
        direction: OptimizationDirection,
        phi_states: &BitVector,
        psi_states: &BitVector,
        qualitative: bool,
        factory: &F,
    ) -> Result<CheckResult<V>> {
        ma_csl_helper::compute_until_probabilities(
            direction,
            &self.transition_matrix,
            &self.backward_transitions,
            phi_states,
            psi_states,
            qualitative,
            factory,
        )
    }

    pub fn reachability_rewards<F: MinMaxSolverFactory<V>>(
        &self,
        direction: OptimizationDirection,
        reward_model: &str,
        psi_states: &BitVector,
        factory: &F,
    ) -> Result<CheckResult<V>> {
        ma_csl_helper::compute_reachability_rewards(
            direction,
            &self.transition_matrix,
            &self.backward_transitions,
            &self.exit_rates,
            &self.markovian_states,
            self.reward_model(reward_model)?,
            psi_states,
            factory,
        )
    }

    pub fn reachability_times<F: MinMaxSolverFactory<V>>(
        &self,
        direction: OptimizationDirection,
        psi_states: &BitVector,
        factory: &F,
    ) -> Result<CheckResult<V>> {
        ma_csl_helper::compute_reachability_times(
            direction,
            &self.transition_matrix,
            &self.backward_transitions,
            &self.exit_rates,
            &self.markovian_states,
            psi_states,
            factory,
        )
    }

    pub fn long_run_average_probabilities<F: MinMaxSolverFactory<V>>(
        &self,
        settings: &Settings,
        direction: OptimizationDirection,
        psi_states: &BitVector,
        factory: &F,
    ) -> Result<CheckResult<V>> {
        ma_csl_helper::compute_long_run_average_probabilities(
            settings,
            direction,
            &self.transition_matrix,
            &self.backward_transitions,
            &self.exit_rates,
            &self.markovian_states,
            psi_states,
            factory,
        )
    }

    pub fn long_run_average_rewards<F: MinMaxSolverFactory<V>>(
        &self,
        settings: &Settings,
        direction: OptimizationDirection,
        reward_model: &str,
        factory: &F,
    ) -> Result<CheckResult<V>> {
        ma_csl_helper::compute_long_run_average_rewards(
            settings,
            direction,
            &self.transition_matrix,
            &self.backward_transitions,
            &self.exit_rates,
            &self.markovian_states,
            self.reward_model(reward_model)?,
            factory,
        )
    }
}

fn validate<V: ValueType>(matrix: &SparseMatrix<V>, exit_rates: &[V], markovian_states: &BitVector) -> Result<()> {
    let states = matrix.row_group_count();
    if matrix.column_count() != states {
        return Err(ModelCheckingError::InvalidModel(format!(
            "transition matrix has {} columns for {} states",
            matrix.column_count(),
            states
        )));
    }
    if exit_rates.len() != states || markovian_states.size() != states {
        return Err(ModelCheckingError::InvalidModel(format!(
            "{} states but {} exit rates and {} Markovian flags",
            states,
            exit_rates.len(),
            markovian_states.size()
        )));
    }
    for state in 0..states {
        if matrix.row_group_size(state) == 0 {
            return Err(ModelCheckingError::InvalidModel(format!("state {} has no choice", state)));
        }
        if markovian_states.get(state) {
            if matrix.row_group_size(state) != 1 {
                return Err(ModelCheckingError::InvalidModel(format!(
                    "Markovian state {} has {} choices",
                    state,
                    matrix.row_group_size(state)
                )));
            }
            let rate = not_nan(exit_rates[state], "exit rate")?;
            if *rate <= 0.0 || rate.is_infinite() {
                return Err(ModelCheckingError::InvalidModel(format!(
                    "Markovian state {} has exit rate {}",
                    state, rate
                )));
            }
        }
        for row in matrix.row_group(state) {
            let mut sum = 0.0;
            for entry in matrix.row(row) {
                let p = not_nan(entry.value, "transition probability")?;
                if *p < 0.0 {
                    return Err(ModelCheckingError::InvalidModel(format!(
                        "negative probability {} in choice {}",
                        p, row
                    )));
                }
                sum += *p;
            }
            if (sum - 1.0f64).abs() > STOCHASTIC_TOLERANCE {
                return Err(ModelCheckingError::InvalidModel(format!(
                    "choice {} of state {} sums to {}",
                    row, state, sum
                )));
            }
        }
    }
    Ok(())
}
