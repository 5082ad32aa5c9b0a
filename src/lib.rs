//! Continuous stochastic logic on Markov automata: time-bounded reachability
//! by digitization or UnifPlus, expected rewards and times, and long-run
//! averages via maximal end components.
pub mod model_checking;

pub use model_checking::bit_vector::BitVector;
pub use model_checking::errors::{CheckResult, ConvergenceWarning, ModelCheckingError, Result};
pub use model_checking::ma_csl_helper::{
    compute_bounded_until_probabilities, compute_long_run_average_probabilities,
    compute_long_run_average_rewards, compute_reachability_rewards, compute_reachability_times,
    compute_until_probabilities,
};
pub use model_checking::markov_automaton::{MarkovAutomaton, ModelStatistics};
pub use model_checking::min_max_solver::{GeneralMinMaxSolverFactory, MinMaxSolverFactory, OptimizationDirection};
pub use model_checking::reward_model::RewardModel;
pub use model_checking::settings::{BoundedReachabilityTechnique, LraMethod, MinMaxMethod, Settings};
pub use model_checking::sparse_matrix::{SparseMatrix, SparseMatrixBuilder};
pub use model_checking::value_type::ValueType;
