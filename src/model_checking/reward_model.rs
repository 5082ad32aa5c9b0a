use serde::{Deserialize, Serialize};

use super::errors::{ModelCheckingError, Result};
use super::sparse_matrix::SparseMatrix;
use super::value_type::ValueType;

/// Rewards attached to states, to choices (indexed by global row) and to
/// transitions (`(successor, reward)` pairs per row).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RewardModel<V> {
    pub state_rewards: Option<Vec<V>>,
    pub state_action_rewards: Option<Vec<V>>,
    pub transition_rewards: Option<Vec<Vec<(usize, V)>>>,
}

impl<V: ValueType> RewardModel<V> {
    pub fn new() -> Self {
        RewardModel { state_rewards: None, state_action_rewards: None, transition_rewards: None }
    }

    pub fn with_state_rewards(mut self, rewards: Vec<V>) -> Self {
        self.state_rewards = Some(rewards);
        self
    }

    pub fn with_state_action_rewards(mut self, rewards: Vec<V>) -> Self {
        self.state_action_rewards = Some(rewards);
        self
    }

    pub fn with_transition_rewards(mut self, rewards: Vec<Vec<(usize, V)>>) -> Self {
        self.transition_rewards = Some(rewards);
        self
    }

    pub fn has_state_rewards(&self) -> bool {
        self.state_rewards.is_some()
    }

    pub fn has_state_action_rewards(&self) -> bool {
        self.state_action_rewards.is_some()
    }

    pub fn has_transition_rewards(&self) -> bool {
        self.transition_rewards.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_state_rewards() && !self.has_state_action_rewards() && !self.has_transition_rewards()
    }

    pub fn state_reward(&self, state: usize) -> V {
        self.state_rewards.as_ref().map_or(V::zero(), |r| r[state])
    }

    /// Checks that every present reward vector fits the matrix.
    pub fn validate(&self, matrix: &SparseMatrix<V>) -> Result<()> {
        if let Some(r) = &self.state_rewards {
            if r.len() != matrix.row_group_count() {
                return Err(ModelCheckingError::InvalidModel(format!(
                    "{} state rewards for {} states",
                    r.len(),
                    matrix.row_group_count()
                )));
            }
        }
        if let Some(r) = &self.state_action_rewards {
            if r.len() != matrix.row_count() {
                return Err(ModelCheckingError::InvalidModel(format!(
                    "{} state-action rewards for {} choices",
                    r.len(),
                    matrix.row_count()
                )));
            }
        }
        if let Some(r) = &self.transition_rewards {
            if r.len() != matrix.row_count() {
                return Err(ModelCheckingError::InvalidModel(format!(
                    "{} transition reward rows for {} choices",
                    r.len(),
                    matrix.row_count()
                )));
            }
        }
        Ok(())
    }

    /// Expected transition reward of a row: `sum_s' P(row, s') * R(row, s')`.
    fn transition_reward(&self, row: usize, matrix: &SparseMatrix<V>) -> V {
        match &self.transition_rewards {
            None => V::zero(),
            Some(rewards) => {
                let entries = matrix.row(row);
                rewards[row]
                    .iter()
                    .filter_map(|(column, reward)| {
                        entries
                            .binary_search_by_key(column, |e| e.column)
                            .ok()
                            .map(|i| entries[i].value * *reward)
                    })
                    .sum()
            }
        }
    }

    /// `(state_action(choice) + transition(choice)) * action_weight + state(state) * state_weight`
    pub fn total_state_action_reward(
        &self,
        state: usize,
        choice: usize,
        matrix: &SparseMatrix<V>,
        state_weight: V,
        action_weight: V,
    ) -> V {
        let mut result = self.state_action_rewards.as_ref().map_or(V::zero(), |r| r[choice]);
        result += self.transition_reward(choice, matrix);
        result *= action_weight;
        if let Some(r) = &self.state_rewards {
            result += r[state] * state_weight;
        }
        result
    }

    /// One entry per row; the state reward of each row's group is scaled by
    /// `state_weights[group]`.
    pub fn total_action_reward_vector(&self, matrix: &SparseMatrix<V>, state_weights: &[V]) -> Vec<V> {
        let mut result = Vec::with_capacity(matrix.row_count());
        for state in 0..matrix.row_group_count() {
            for choice in matrix.row_group(state) {
                result.push(self.total_state_action_reward(state, choice, matrix, state_weights[state], V::one()));
            }
        }
        result
    }
}
