use std::collections::BTreeMap;

use log::debug;
use minilp::{ComparisonOp, LinearExpr, Problem, Variable};

use super::errors::{ModelCheckingError, Result};
use super::min_max_solver::OptimizationDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    LessOrEqual,
    GreaterOrEqual,
}

impl From<Relation> for ComparisonOp {
    fn from(r: Relation) -> ComparisonOp {
        match r {
            Relation::LessOrEqual => ComparisonOp::Le,
            Relation::GreaterOrEqual => ComparisonOp::Ge,
        }
    }
}

/// Handle for a variable of one `LpSolver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LpVariable(usize);

/// A free variable is held as `positive - negative`, both parts >= 0.
/// minilp yields NaN for columns without a finite bound.
#[derive(Debug, Clone, Copy)]
struct FreeColumn {
    positive: Variable,
    negative: Variable,
}

/// Thin wrapper over a `minilp` problem with named variables and
/// constraints.
pub struct LpSolver {
    name: String,
    problem: Problem,
    variables: Vec<(String, FreeColumn)>,
    constraint_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    values: Vec<f64>,
}

impl LpSolution {
    pub fn continuous_value(&self, var: LpVariable) -> f64 {
        self.values[var.0]
    }
}

impl LpSolver {
    pub fn new(name: &str, direction: OptimizationDirection) -> LpSolver {
        let dir = match direction {
            OptimizationDirection::Minimize => minilp::OptimizationDirection::Minimize,
            OptimizationDirection::Maximize => minilp::OptimizationDirection::Maximize,
        };
        LpSolver {
            name: name.to_string(),
            problem: Problem::new(dir),
            variables: Vec::new(),
            constraint_count: 0,
        }
    }

    pub fn add_unbounded_continuous_variable(&mut self, name: &str, objective_coefficient: f64) -> LpVariable {
        let positive = self.problem.add_var(objective_coefficient, (0.0, f64::INFINITY));
        let negative = self.problem.add_var(-objective_coefficient, (0.0, f64::INFINITY));
        self.variables.push((name.to_string(), FreeColumn { positive, negative }));
        LpVariable(self.variables.len() - 1)
    }

    pub fn variable_name(&self, var: LpVariable) -> &str {
        &self.variables[var.0].0
    }

    /// Adds `sum coefficient * variable {relation} rhs`. A variable listed
    /// more than once gets the sum of its coefficients.
    pub fn add_constraint(&mut self, name: &str, terms: &[(LpVariable, f64)], relation: Relation, rhs: f64) {
        let mut aggregated: BTreeMap<LpVariable, f64> = BTreeMap::new();
        for (var, coefficient) in terms.iter() {
            *aggregated.entry(*var).or_insert(0.0) += *coefficient;
        }
        let mut expr = LinearExpr::empty();
        for (var, coefficient) in aggregated.into_iter() {
            if coefficient != 0.0 {
                let column = self.variables[var.0].1;
                expr.add(column.positive, coefficient);
                expr.add(column.negative, -coefficient);
            }
        }
        self.problem.add_constraint(expr, relation.into(), rhs);
        self.constraint_count += 1;
        debug!("{}: added constraint {}", self.name, name);
    }

    pub fn optimize(&self) -> Result<LpSolution> {
        debug!(
            "solving linear program '{}' with {} variables and {} constraints",
            self.name,
            self.variables.len(),
            self.constraint_count
        );
        let solution = self
            .problem
            .solve()
            .map_err(|e| ModelCheckingError::LpSolver { name: self.name.clone(), reason: e.to_string() })?;
        if !solution.objective().is_finite() {
            return Err(ModelCheckingError::LpSolver {
                name: self.name.clone(),
                reason: format!("objective value {} is not finite", solution.objective()),
            });
        }
        let mut values = Vec::with_capacity(self.variables.len());
        for (index, (_, column)) in self.variables.iter().enumerate() {
            let value = solution[column.positive] - solution[column.negative];
            if !value.is_finite() {
                return Err(ModelCheckingError::LpSolver {
                    name: self.name.clone(),
                    reason: format!("variable {} has value {}", self.variable_name(LpVariable(index)), value),
                });
            }
            values.push(value);
        }
        Ok(LpSolution { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_maximisation() {
        // max x + y s.t. x + 2y <= 4, 3x + y <= 6, x, y >= 0
        let mut lp = LpSolver::new("test", OptimizationDirection::Maximize);
        let x = lp.add_unbounded_continuous_variable("x", 1.0);
        let y = lp.add_unbounded_continuous_variable("y", 1.0);
        lp.add_constraint("x", &[(x, 1.0)], Relation::GreaterOrEqual, 0.0);
        lp.add_constraint("y", &[(y, 1.0)], Relation::GreaterOrEqual, 0.0);
        lp.add_constraint("c0", &[(x, 1.0), (y, 2.0)], Relation::LessOrEqual, 4.0);
        lp.add_constraint("c1", &[(x, 3.0), (y, 1.0)], Relation::LessOrEqual, 6.0);
        let solution = lp.optimize().unwrap();
        assert!((solution.continuous_value(x) - 1.6).abs() < 1e-9);
        assert!((solution.continuous_value(y) - 1.2).abs() < 1e-9);
        assert_eq!(lp.variable_name(y), "y");
    }

    #[test]
    fn negative_optimum_of_a_free_variable() {
        // min k s.t. k >= -3, k - x >= -5, x <= 1
        let mut lp = LpSolver::new("negative", OptimizationDirection::Minimize);
        let k = lp.add_unbounded_continuous_variable("k", 1.0);
        let x = lp.add_unbounded_continuous_variable("x", 0.0);
        lp.add_constraint("k", &[(k, 1.0)], Relation::GreaterOrEqual, -3.0);
        lp.add_constraint("kx", &[(k, 1.0), (x, -1.0)], Relation::GreaterOrEqual, -5.0);
        lp.add_constraint("x", &[(x, 1.0)], Relation::LessOrEqual, 1.0);
        let solution = lp.optimize().unwrap();
        assert!((solution.continuous_value(k) + 3.0).abs() < 1e-9);
    }

    #[test]
    fn duplicate_terms_are_summed() {
        // min k s.t. k - 0.5k >= 1 written with k twice
        let mut lp = LpSolver::new("dup", OptimizationDirection::Minimize);
        let k = lp.add_unbounded_continuous_variable("k", 1.0);
        lp.add_constraint("c", &[(k, 1.0), (k, -0.5)], Relation::GreaterOrEqual, 1.0);
        let solution = lp.optimize().unwrap();
        assert!((solution.continuous_value(k) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn free_variables_in_a_cycle_have_finite_values() {
        // max-direction LRA shape: min k s.t. x0 - x1 + k >= 1, x1 - x0 + k >= 0
        let mut lp = LpSolver::new("cycle", OptimizationDirection::Minimize);
        let k = lp.add_unbounded_continuous_variable("k", 1.0);
        let x0 = lp.add_unbounded_continuous_variable("x0", 0.0);
        let x1 = lp.add_unbounded_continuous_variable("x1", 0.0);
        lp.add_constraint("state0", &[(x0, 1.0), (x1, -1.0), (k, 1.0)], Relation::GreaterOrEqual, 1.0);
        lp.add_constraint("state1", &[(x1, 1.0), (x0, -1.0), (k, 1.0)], Relation::GreaterOrEqual, 0.0);
        let solution = lp.optimize().unwrap();
        assert!((solution.continuous_value(k) - 0.5).abs() < 1e-9);
        assert!(solution.continuous_value(x0).is_finite());
    }

    #[test]
    fn unbounded_problem_is_an_error() {
        let mut lp = LpSolver::new("unbounded", OptimizationDirection::Maximize);
        let k = lp.add_unbounded_continuous_variable("k", 1.0);
        lp.add_constraint("c", &[(k, 1.0)], Relation::GreaterOrEqual, 0.0);
        assert!(matches!(lp.optimize(), Err(ModelCheckingError::LpSolver { .. })));
    }
}
