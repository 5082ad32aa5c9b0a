use std::fmt;

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use super::errors::{ConvergenceWarning, ModelCheckingError, Result};
use super::helper_methods::max_difference;
use super::settings::{MinMaxMethod, Settings};
use super::sparse_matrix::SparseMatrix;
use super::value_type::ValueType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizationDirection {
    Minimize,
    Maximize,
}

impl OptimizationDirection {
    pub fn invert(self) -> Self {
        match self {
            OptimizationDirection::Minimize => OptimizationDirection::Maximize,
            OptimizationDirection::Maximize => OptimizationDirection::Minimize,
        }
    }

    pub fn is_minimize(self) -> bool {
        self == OptimizationDirection::Minimize
    }

    /// The better of two values in this direction.
    pub fn select<V: ValueType>(self, current: V, candidate: V) -> V {
        match self {
            OptimizationDirection::Minimize => current.min_value(candidate),
            OptimizationDirection::Maximize => current.max_value(candidate),
        }
    }
}

/// What a solver needs to be told before it can be trusted on a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SolverRequirements {
    pub unique_solution: bool,
    pub lower_bounds: bool,
    pub upper_bounds: bool,
}

impl SolverRequirements {
    pub fn clear_bounds(&mut self) {
        self.lower_bounds = false;
        self.upper_bounds = false;
    }

    pub fn clear_lower_bounds(&mut self) {
        self.lower_bounds = false;
    }

    pub fn clear_upper_bounds(&mut self) {
        self.upper_bounds = false;
    }

    pub fn clear_unique_solution(&mut self) {
        self.unique_solution = false;
    }

    pub fn is_empty(&self) -> bool {
        !self.unique_solution && !self.lower_bounds && !self.upper_bounds
    }
}

impl fmt::Display for SolverRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.unique_solution {
            names.push("unique solution");
        }
        if self.lower_bounds {
            names.push("lower bounds");
        }
        if self.upper_bounds {
            names.push("upper bounds");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverStatus {
    pub iterations: u64,
    pub converged: bool,
    pub max_difference: f64,
}

impl SolverStatus {
    pub fn warning(&self) -> Option<ConvergenceWarning> {
        if self.converged {
            None
        } else {
            Some(ConvergenceWarning::SolverIterationLimit {
                iterations: self.iterations,
                max_difference: self.max_difference,
            })
        }
    }
}

/// Solves `x = opt_{rows of group} (A x + b)` where `A` has one row per
/// choice, grouped by state.
pub trait MinMaxLinearEquationSolver<V: ValueType> {
    fn solve_equations(
        &mut self,
        direction: OptimizationDirection,
        x: &mut [V],
        b: &[V],
    ) -> Result<SolverStatus>;

    fn set_lower_bound(&mut self, bound: V);
    fn set_upper_bound(&mut self, bound: V);
    fn set_has_unique_solution(&mut self, unique: bool);
    fn set_requirements_checked(&mut self, checked: bool);
    fn set_caching_enabled(&mut self, enabled: bool);

    fn set_bounds(&mut self, lower: V, upper: V) {
        self.set_lower_bound(lower);
        self.set_upper_bound(upper);
    }
}

pub trait MinMaxSolverFactory<V: ValueType> {
    type Solver: MinMaxLinearEquationSolver<V>;

    /// Requirements for solving in `direction` (`None`: either direction).
    fn requirements(
        &self,
        direction: Option<OptimizationDirection>,
        has_unique_solution: bool,
    ) -> SolverRequirements;

    fn create(&self, matrix: SparseMatrix<V>) -> Self::Solver;
}

fn method_requirements(
    method: MinMaxMethod,
    direction: Option<OptimizationDirection>,
    has_unique_solution: bool,
) -> SolverRequirements {
    let mut requirements = SolverRequirements::default();
    match method {
        MinMaxMethod::ValueIteration => {
            // iterating from below reaches the least fixed point, which is
            // only the right one for minimisation if it is the only one
            if !has_unique_solution && direction != Some(OptimizationDirection::Maximize) {
                requirements.unique_solution = true;
            }
        }
        MinMaxMethod::IntervalIteration => {
            requirements.lower_bounds = true;
            requirements.upper_bounds = true;
            requirements.unique_solution = !has_unique_solution;
        }
    }
    requirements
}

#[derive(Debug, Clone)]
pub struct GeneralMinMaxSolverFactory {
    pub method: MinMaxMethod,
    pub precision: f64,
    pub relative: bool,
    pub max_iterations: u64,
}

impl GeneralMinMaxSolverFactory {
    pub fn new(settings: &Settings) -> Self {
        GeneralMinMaxSolverFactory {
            method: settings.min_max_method,
            precision: settings.precision,
            relative: settings.relative_precision,
            max_iterations: settings.max_iterations,
        }
    }
}

impl<V: ValueType> MinMaxSolverFactory<V> for GeneralMinMaxSolverFactory {
    type Solver = IterativeMinMaxSolver<V>;

    fn requirements(
        &self,
        direction: Option<OptimizationDirection>,
        has_unique_solution: bool,
    ) -> SolverRequirements {
        method_requirements(self.method, direction, has_unique_solution)
    }

    fn create(&self, matrix: SparseMatrix<V>) -> IterativeMinMaxSolver<V> {
        IterativeMinMaxSolver {
            matrix,
            method: self.method,
            precision: self.precision,
            relative: self.relative,
            max_iterations: self.max_iterations,
            lower_bound: None,
            upper_bound: None,
            has_unique_solution: false,
            requirements_checked: false,
            caching_enabled: false,
            cached_lower: None,
            cached_upper: None,
        }
    }
}

/// Jacobi-style value iteration, or interval iteration sandwiching the
/// solution between a lower and an upper sequence.
#[derive(Debug, Clone)]
pub struct IterativeMinMaxSolver<V> {
    matrix: SparseMatrix<V>,
    method: MinMaxMethod,
    precision: f64,
    relative: bool,
    max_iterations: u64,
    lower_bound: Option<V>,
    upper_bound: Option<V>,
    has_unique_solution: bool,
    requirements_checked: bool,
    caching_enabled: bool,
    cached_lower: Option<Vec<V>>,
    cached_upper: Option<Vec<V>>,
}

impl<V: ValueType> IterativeMinMaxSolver<V> {
    pub fn matrix(&self) -> &SparseMatrix<V> {
        &self.matrix
    }

    fn bellman_step(&self, direction: OptimizationDirection, x: &[V], b: &[V], result: &mut [V]) {
        for group in 0..self.matrix.row_group_count() {
            let best = self.matrix.row_group(group).fold(None, |best: Option<V>, row| {
                let value = b[row] + self.matrix.multiply_row_with_vector(row, x);
                Some(match best {
                    None => value,
                    Some(current) => direction.select(current, value),
                })
            });
            result[group] = best.unwrap_or(x[group]);
        }
    }

    fn take_scratch(cache: &mut Option<Vec<V>>, len: usize) -> Vec<V> {
        let mut scratch = cache.take().unwrap_or_default();
        scratch.clear();
        scratch.resize(len, V::zero());
        scratch
    }

    fn value_iteration(&mut self, direction: OptimizationDirection, x: &mut [V], b: &[V]) -> SolverStatus {
        let mut next = Self::take_scratch(&mut self.cached_lower, x.len());
        let mut iterations: u64 = 0;
        let mut difference = f64::INFINITY;
        let mut converged = false;
        while iterations < self.max_iterations {
            self.bellman_step(direction, x, b, &mut next);
            iterations += 1;
            difference = max_difference(x, &next, self.relative);
            x.copy_from_slice(&next);
            if difference <= self.precision {
                converged = true;
                break;
            }
        }
        self.cached_lower = Some(next);
        SolverStatus { iterations, converged, max_difference: difference }
    }

    fn interval_iteration(
        &mut self,
        direction: OptimizationDirection,
        x: &mut [V],
        b: &[V],
    ) -> Result<SolverStatus> {
        let (lower_bound, upper_bound) = match (self.lower_bound, self.upper_bound) {
            (Some(l), Some(u)) => (l, u),
            _ => {
                return Err(ModelCheckingError::UncheckedRequirement(SolverRequirements {
                    unique_solution: false,
                    lower_bounds: self.lower_bound.is_none(),
                    upper_bounds: self.upper_bound.is_none(),
                }))
            }
        };
        let n = x.len();
        let mut lower = vec![lower_bound; n];
        let mut upper = vec![upper_bound; n];
        let mut next = Self::take_scratch(&mut self.cached_upper, n);
        let mut iterations: u64 = 0;
        let mut gap = f64::INFINITY;
        let mut converged = false;
        let two = V::one() + V::one();
        while iterations < self.max_iterations {
            self.bellman_step(direction, &lower, b, &mut next);
            lower.copy_from_slice(&next);
            self.bellman_step(direction, &upper, b, &mut next);
            upper.copy_from_slice(&next);
            iterations += 1;
            gap = max_difference(&lower, &upper, self.relative);
            if gap <= 2.0 * self.precision {
                converged = true;
                break;
            }
        }
        for ((xi, l), u) in x.iter_mut().zip(lower.iter()).zip(upper.iter()) {
            *xi = (*l + *u) / two;
        }
        self.cached_upper = Some(next);
        Ok(SolverStatus { iterations, converged, max_difference: gap })
    }
}

impl<V: ValueType> MinMaxLinearEquationSolver<V> for IterativeMinMaxSolver<V> {
    fn solve_equations(
        &mut self,
        direction: OptimizationDirection,
        x: &mut [V],
        b: &[V],
    ) -> Result<SolverStatus> {
        if !self.requirements_checked {
            let mut requirements =
                method_requirements(self.method, Some(direction), self.has_unique_solution);
            if self.lower_bound.is_some() {
                requirements.clear_lower_bounds();
            }
            if self.upper_bound.is_some() {
                requirements.clear_upper_bounds();
            }
            if !requirements.is_empty() {
                return Err(ModelCheckingError::UncheckedRequirement(requirements));
            }
        }
        if x.is_empty() {
            return Ok(SolverStatus { iterations: 0, converged: true, max_difference: 0.0 });
        }

        let status = match self.method {
            MinMaxMethod::ValueIteration => self.value_iteration(direction, x, b),
            MinMaxMethod::IntervalIteration => self.interval_iteration(direction, x, b)?,
        };
        trace!("min/max solver finished after {} iterations", status.iterations);
        if !status.converged {
            warn!(
                "min/max solver did not converge within {} iterations (difference {})",
                status.iterations, status.max_difference
            );
        }
        if !self.caching_enabled {
            self.cached_lower = None;
            self.cached_upper = None;
        }
        Ok(status)
    }

    fn set_lower_bound(&mut self, bound: V) {
        self.lower_bound = Some(bound);
    }

    fn set_upper_bound(&mut self, bound: V) {
        self.upper_bound = Some(bound);
    }

    fn set_has_unique_solution(&mut self, unique: bool) {
        self.has_unique_solution = unique;
    }

    fn set_requirements_checked(&mut self, checked: bool) {
        self.requirements_checked = checked;
    }

    fn set_caching_enabled(&mut self, enabled: bool) {
        self.caching_enabled = enabled;
        if !enabled {
            self.cached_lower = None;
            self.cached_upper = None;
        }
    }
}
