//! Seeded random Markov automata for tests and benchmarks.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::bit_vector::BitVector;
use super::errors::Result;
use super::markov_automaton::MarkovAutomaton;
use super::reward_model::RewardModel;
use super::sparse_matrix::SparseMatrix;

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub states: usize,
    pub markovian_fraction: f64,
    pub max_choices: usize,
    pub max_successors: usize,
    pub max_rate: f64,
    pub goal_fraction: f64,
    pub max_reward: f64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings {
            states: 10,
            markovian_fraction: 0.5,
            max_choices: 3,
            max_successors: 3,
            max_rate: 4.0,
            goal_fraction: 0.2,
            max_reward: 5.0,
        }
    }
}

pub struct RandomModel {
    pub automaton: MarkovAutomaton<f64>,
    pub goal_states: BitVector,
}

/// The reward model of every generated automaton is registered under this name.
pub const REWARD_MODEL: &str = "random";

fn distribution(rng: &mut StdRng, candidates: &[usize], max_successors: usize) -> Vec<(usize, f64)> {
    let count = rng.gen_range(1, max_successors.min(candidates.len()) + 1);
    let successors: Vec<usize> = candidates.choose_multiple(rng, count).copied().collect();
    let weights: Vec<f64> = successors.iter().map(|_| rng.gen_range(1.0, 10.0)).collect();
    let total: f64 = weights.iter().sum();
    successors.into_iter().zip(weights.into_iter()).map(|(s, w)| (s, w / total)).collect()
}

/// State 0 is always Markovian and the last state always a goal state.
/// Probabilistic states only move to Markovian states or to probabilistic
/// states with a higher index, so every end component holds a Markovian
/// state.
pub fn random_markov_automaton(settings: &GeneratorSettings, seed: u64) -> Result<RandomModel> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = settings.states.max(1);
    let markovian = BitVector::from_indices(
        n,
        (0..n).filter(|s| *s == 0 || rng.gen::<f64>() < settings.markovian_fraction).collect::<Vec<_>>(),
    );
    let all: Vec<usize> = (0..n).collect();

    let mut groups: Vec<Vec<Vec<(usize, f64)>>> = Vec::with_capacity(n);
    let mut exit_rates = vec![0.0; n];
    for state in 0..n {
        if markovian.get(state) {
            exit_rates[state] = rng.gen_range(0.5, settings.max_rate.max(1.0));
            groups.push(vec![distribution(&mut rng, &all, settings.max_successors.max(1))]);
        } else {
            let candidates: Vec<usize> = (0..n).filter(|t| markovian.get(*t) || *t > state).collect();
            let choices = rng.gen_range(1, settings.max_choices.max(1) + 1);
            groups.push(
                (0..choices)
                    .map(|_| distribution(&mut rng, &candidates, settings.max_successors.max(1)))
                    .collect(),
            );
        }
    }

    let mut goal_states = BitVector::new(n, false);
    for state in 0..n {
        if state == n - 1 || rng.gen::<f64>() < settings.goal_fraction {
            goal_states.set(state, true);
        }
    }
    let state_rewards = (0..n).map(|_| rng.gen_range(0.0, settings.max_reward.max(1.0))).collect();

    let matrix = SparseMatrix::from_row_groups(groups);
    let automaton = MarkovAutomaton::new(matrix, exit_rates, markovian)?
        .with_reward_model(REWARD_MODEL, RewardModel::new().with_state_rewards(state_rewards))?;
    Ok(RandomModel { automaton, goal_states })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_checking::mec::MaximalEndComponentDecomposition;

    #[test]
    fn same_seed_same_model() {
        let settings = GeneratorSettings::default();
        let a = random_markov_automaton(&settings, 7).unwrap();
        let b = random_markov_automaton(&settings, 7).unwrap();
        assert_eq!(a.automaton.transition_matrix(), b.automaton.transition_matrix());
        assert_eq!(a.automaton.exit_rates(), b.automaton.exit_rates());
        assert_eq!(a.goal_states, b.goal_states);
    }

    #[test]
    fn every_end_component_has_a_markovian_state() {
        let settings = GeneratorSettings { states: 15, markovian_fraction: 0.3, ..Default::default() };
        for seed in 0..10 {
            let model = random_markov_automaton(&settings, seed).unwrap();
            let ma = &model.automaton;
            assert!(ma.is_markovian(0));
            assert!(model.goal_states.get(14));
            let mecs = MaximalEndComponentDecomposition::new(ma.transition_matrix(), ma.backward_transitions());
            assert!(mecs.iter().all(|mec| mec.states().any(|s| ma.is_markovian(s))));
        }
    }
}
