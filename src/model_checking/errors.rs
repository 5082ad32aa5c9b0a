use std::fmt;

use thiserror::Error;

use super::min_max_solver::SolverRequirements;

/// Fatal conditions. Any of these aborts the top-level computation and no
/// partial result is returned.
#[derive(Debug, Error)]
pub enum ModelCheckingError {
    #[error("{operation} is unsupported for this value type")]
    UnsupportedValueType { operation: &'static str },
    #[error("Markov automaton has Zeno behaviour: end component {mec} contains no Markovian state, long-run average values are undefined")]
    ZenoBehaviour { mec: usize },
    #[error("cannot establish requirements for solver: {0}")]
    UncheckedRequirement(SolverRequirements),
    #[error("unsupported technique {0}")]
    UnsupportedTechnique(String),
    #[error("linear program '{name}' could not be solved: {reason}")]
    LpSolver { name: String, reason: String },
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("invalid time bounds [{lower}, {upper}]")]
    InvalidBounds { lower: f64, upper: f64 },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelCheckingError>;

/// Quality problems of iterative schemes. The value that comes with one of
/// these is the best estimate that was available when iterating stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceWarning {
    UnifPlusStalled { round: u32, max_norm: f64, previous_max_norm: f64 },
    UnifPlusRoundLimit { rounds: u32, max_norm: f64 },
    SolverIterationLimit { iterations: u64, max_difference: f64 },
    RelativeValueIterationLimit { iterations: u64, span: f64 },
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceWarning::UnifPlusStalled { round, max_norm, previous_max_norm } => write!(
                f,
                "UnifPlus is not coming closer to the solution in round {} (max norm {} after {})",
                round, max_norm, previous_max_norm
            ),
            ConvergenceWarning::UnifPlusRoundLimit { rounds, max_norm } => write!(
                f,
                "UnifPlus stopped after {} rounds with max norm {}",
                rounds, max_norm
            ),
            ConvergenceWarning::SolverIterationLimit { iterations, max_difference } => write!(
                f,
                "min/max solver did not converge within {} iterations (last difference {})",
                iterations, max_difference
            ),
            ConvergenceWarning::RelativeValueIterationLimit { iterations, span } => write!(
                f,
                "relative value iteration did not converge within {} iterations (span {})",
                iterations, span
            ),
        }
    }
}

/// Values for every state plus whatever the iterative parts had to report.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult<V> {
    pub values: Vec<V>,
    pub warnings: Vec<ConvergenceWarning>,
}

impl<V> CheckResult<V> {
    pub fn new(values: Vec<V>, warnings: Vec<ConvergenceWarning>) -> Self {
        CheckResult { values, warnings }
    }

    pub fn exact(values: Vec<V>) -> Self {
        CheckResult { values, warnings: Vec::new() }
    }

    pub fn converged(&self) -> bool {
        self.warnings.is_empty()
    }
}
