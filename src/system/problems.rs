//! # Problem adapters
//!
//! ## Purpose
//! Thin adapters between a finished system and the numerical solvers. Each one
//! picks a generator combination, validates the preparatory steps up front and
//! carries the generated artifacts plus the metadata a solver wants (initial
//! guess, unknown names, brackets). The staged variant is assembled in the
//! decomposition module and only dispatched here.
//!
//! ## Main Structures
//! - `NonlinearProblem` - whole-system residual + Jacobian for rootfinding
//! - `LeastSquaresProblem` - rectangular residual handed off unsquared
//! - `IntervalProblem` - bracketing metadata over a single scalar unknown
//! - `ProblemKind` - one enum over every adapter, trait-dispatched
//!
//! ## Usage
//! ```rust, ignore
//! let mut sys = NonlinearSystem::new("plant", eqs, unknowns, ps)?.complete();
//! let problem = NonlinearProblem::new(&mut sys, &parameter_values, true)?;
//! let r0 = problem.residual_at(&problem.initial_guess);
//! ```

use crate::system::equation_system::NonlinearSystem;
use crate::system::generators::{JacobianArtifact, ResidualArtifact};
use crate::system::scc_decomposition::SCCNonlinearProblem;
use crate::system::system_errors::{AssemblyError, PreconditionError};
use enum_dispatch::enum_dispatch;
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

////////////////////////////////////////////////////////////////
//  PROBLEM KIND - every adapter the solver layer accepts
////////////////////////////////////////////////////////////////

#[enum_dispatch]
pub enum ProblemKind {
    Nonlinear(NonlinearProblem),
    LeastSquares(LeastSquaresProblem),
    Interval(IntervalProblem),
    Staged(SCCNonlinearProblem),
}

#[enum_dispatch(ProblemKind)]
pub trait ProblemOps {
    fn system_name(&self) -> String;
    fn n_unknowns(&self) -> usize;
    fn describe(&self) -> String; // one line for progress logs
}

////////////////////////////////////////////////////////////////
//  NONLINEAR PROBLEM
////////////////////////////////////////////////////////////////

/// Whole-system rootfinding problem: square residual plus its Jacobian.
pub struct NonlinearProblem {
    pub name: String,
    pub unknowns: Vec<String>,
    pub initial_guess: DVector<f64>,
    pub residual: ResidualArtifact,
    pub jacobian: JacobianArtifact,
}

impl NonlinearProblem {
    pub fn new(
        sys: &mut NonlinearSystem,
        parameter_values: &HashMap<String, f64>,
        simplify: bool,
    ) -> Result<NonlinearProblem, AssemblyError> {
        if !sys.is_complete {
            return Err(PreconditionError::NotComplete {
                system: sys.name.clone(),
                requested: "a Jacobian-based nonlinear problem".to_string(),
            }
            .into());
        }
        let residual = sys.generate_residual(parameter_values)?;
        let jacobian = sys.generate_jacobian(parameter_values, simplify)?;
        Ok(NonlinearProblem {
            name: sys.name.clone(),
            unknowns: sys.unknown_names(),
            initial_guess: sys.initial_vector(),
            residual,
            jacobian,
        })
    }

    /// Replaces the initial guess taken from the system.
    pub fn with_initial_guess(
        mut self,
        guess: DVector<f64>,
    ) -> Result<NonlinearProblem, PreconditionError> {
        if guess.len() != self.unknowns.len() {
            return Err(PreconditionError::GuessLengthMismatch {
                system: self.name.clone(),
                expected: self.unknowns.len(),
                got: guess.len(),
            });
        }
        self.initial_guess = guess;
        Ok(self)
    }

    pub fn residual_at(&self, u: &DVector<f64>) -> DVector<f64> {
        (self.residual.function)(u)
    }

    /// In-place variant writing into a caller-owned output vector.
    pub fn residual_into(&self, out: &mut DVector<f64>, u: &DVector<f64>) {
        (self.residual.function_into)(u, out);
    }

    pub fn jacobian_at(&self, u: &DVector<f64>) -> DMatrix<f64> {
        (self.jacobian.dense)(u)
    }
}

impl ProblemOps for NonlinearProblem {
    fn system_name(&self) -> String {
        self.name.clone()
    }

    fn n_unknowns(&self) -> usize {
        self.unknowns.len()
    }

    fn describe(&self) -> String {
        format!(
            "nonlinear problem '{}': {} equations over {} unknowns, bandwidth {:?}",
            self.name,
            self.residual.symbolic.len(),
            self.unknowns.len(),
            self.jacobian.bandwidth
        )
    }
}

////////////////////////////////////////////////////////////////
//  LEAST SQUARES PROBLEM
////////////////////////////////////////////////////////////////

/// Rectangular residual for minimization; the vector is handed off unsquared,
/// the objective and gradient helpers do the squaring.
pub struct LeastSquaresProblem {
    pub name: String,
    pub unknowns: Vec<String>,
    pub initial_guess: DVector<f64>,
    pub residual: ResidualArtifact,
    pub jacobian: JacobianArtifact,
}

impl LeastSquaresProblem {
    pub fn new(
        sys: &mut NonlinearSystem,
        parameter_values: &HashMap<String, f64>,
        simplify: bool,
    ) -> Result<LeastSquaresProblem, AssemblyError> {
        if !sys.is_complete {
            return Err(PreconditionError::NotComplete {
                system: sys.name.clone(),
                requested: "a least-squares problem".to_string(),
            }
            .into());
        }
        let residual = sys.generate_residual(parameter_values)?;
        let jacobian = sys.generate_jacobian(parameter_values, simplify)?;
        Ok(LeastSquaresProblem {
            name: sys.name.clone(),
            unknowns: sys.unknown_names(),
            initial_guess: sys.initial_vector(),
            residual,
            jacobian,
        })
    }

    pub fn residual_at(&self, u: &DVector<f64>) -> DVector<f64> {
        (self.residual.function)(u)
    }

    /// Half the squared residual norm.
    pub fn objective(&self, u: &DVector<f64>) -> f64 {
        0.5 * self.residual_at(u).norm_squared()
    }

    /// Gradient of the objective, `J^T r`.
    pub fn gradient(&self, u: &DVector<f64>) -> DVector<f64> {
        let r = self.residual_at(u);
        (self.jacobian.dense)(u).transpose() * r
    }
}

impl ProblemOps for LeastSquaresProblem {
    fn system_name(&self) -> String {
        self.name.clone()
    }

    fn n_unknowns(&self) -> usize {
        self.unknowns.len()
    }

    fn describe(&self) -> String {
        format!(
            "least-squares problem '{}': {} residuals over {} unknowns",
            self.name,
            self.residual.symbolic.len(),
            self.unknowns.len()
        )
    }
}

////////////////////////////////////////////////////////////////
//  INTERVAL PROBLEM
////////////////////////////////////////////////////////////////

/// Bracketing metadata over a scalar system, consumed by interval methods.
pub struct IntervalProblem {
    pub name: String,
    pub unknown: String,
    pub bracket: (f64, f64),
    pub residual: ResidualArtifact,
}

impl IntervalProblem {
    pub fn new(
        sys: &NonlinearSystem,
        parameter_values: &HashMap<String, f64>,
        bracket: (f64, f64),
    ) -> Result<IntervalProblem, AssemblyError> {
        if !sys.is_complete {
            return Err(PreconditionError::NotComplete {
                system: sys.name.clone(),
                requested: "an interval problem".to_string(),
            }
            .into());
        }
        let unknowns = sys.unknown_names();
        if unknowns.len() != 1 {
            return Err(PreconditionError::NotScalar {
                system: sys.name.clone(),
                n_unknowns: unknowns.len(),
            }
            .into());
        }
        if bracket.0 >= bracket.1 {
            return Err(PreconditionError::InvalidBracket {
                system: sys.name.clone(),
                lo: bracket.0,
                hi: bracket.1,
            }
            .into());
        }
        let residual = sys.generate_residual(parameter_values)?;
        Ok(IntervalProblem {
            name: sys.name.clone(),
            unknown: unknowns.into_iter().next().unwrap_or_default(),
            bracket,
            residual,
        })
    }

    pub fn eval(&self, x: f64) -> f64 {
        (self.residual.function)(&DVector::from_vec(vec![x]))[0]
    }

    /// True when the residual changes sign over the bracket.
    pub fn is_bracketing(&self) -> bool {
        self.eval(self.bracket.0) * self.eval(self.bracket.1) <= 0.0
    }
}

impl ProblemOps for IntervalProblem {
    fn system_name(&self) -> String {
        self.name.clone()
    }

    fn n_unknowns(&self) -> usize {
        1
    }

    fn describe(&self) -> String {
        format!(
            "interval problem '{}': '{}' bracketed by [{}, {}]",
            self.name, self.unknown, self.bracket.0, self.bracket.1
        )
    }
}

impl ProblemOps for SCCNonlinearProblem {
    fn system_name(&self) -> String {
        self.system_name.clone()
    }

    fn n_unknowns(&self) -> usize {
        self.stages.iter().map(|s| s.n_vars()).sum()
    }

    fn describe(&self) -> String {
        format!(
            "staged problem '{}': {} stages, cache plan {} real / {} integer slots",
            self.system_name,
            self.stages.len(),
            self.plan.real_len,
            self.plan.int_len
        )
    }
}

//___________________________________TESTS____________________________________

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::symbolic_engine::Expr;
    use crate::symbols;
    use crate::system::equation_system::Equation;
    use approx::assert_abs_diff_eq;

    fn square_system() -> NonlinearSystem {
        let (x, y) = symbols!(x, y);
        NonlinearSystem::new(
            "plant",
            vec![
                Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
                Equation::from_residual(y.clone() - x.clone()),
            ],
            vec![x.clone(), y.clone()],
            vec![],
        )
        .unwrap()
        .with_guesses(vec![(x, 2.0), (y, 2.0)])
        .complete()
    }

    #[test]
    fn test_nonlinear_problem_carries_artifacts() {
        let mut sys = square_system();
        let problem = NonlinearProblem::new(&mut sys, &HashMap::new(), true).unwrap();
        assert_eq!(problem.unknowns, vec!["x", "y"]);
        assert_eq!(problem.initial_guess.as_slice(), &[2.0, 2.0]);
        let r = problem.residual_at(&DVector::from_vec(vec![2.0, 5.0]));
        assert_eq!(r.as_slice(), &[3.0, 3.0]);
        let j = problem.jacobian_at(&DVector::from_vec(vec![3.0, 0.0]));
        assert_eq!(j[(0, 0)], 6.0);
        assert!(problem.describe().contains("plant"));
    }

    #[test]
    fn test_residual_into_fills_the_buffer() {
        let mut sys = square_system();
        let problem = NonlinearProblem::new(&mut sys, &HashMap::new(), true).unwrap();
        let mut out = DVector::zeros(2);
        problem.residual_into(&mut out, &DVector::from_vec(vec![2.0, 5.0]));
        assert_eq!(out.as_slice(), &[3.0, 3.0]);
        problem.residual_into(&mut out, &DVector::from_vec(vec![1.0, 1.0]));
        assert_eq!(out.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_incomplete_system_is_rejected() {
        let x = Expr::Var("x".to_string());
        let mut sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(x.clone() - Expr::Const(1.0))],
            vec![x],
            vec![],
        )
        .unwrap();
        assert!(matches!(
            NonlinearProblem::new(&mut sys, &HashMap::new(), true),
            Err(AssemblyError::Precondition(PreconditionError::NotComplete { .. }))
        ));
    }

    #[test]
    fn test_guess_length_is_validated() {
        let mut sys = square_system();
        let problem = NonlinearProblem::new(&mut sys, &HashMap::new(), true).unwrap();
        let result = problem.with_initial_guess(DVector::from_vec(vec![1.0]));
        assert!(matches!(
            result,
            Err(PreconditionError::GuessLengthMismatch {
                expected: 2,
                got: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_least_squares_objective_and_gradient() {
        let x = Expr::Var("x".to_string());
        let mut sys = NonlinearSystem::new(
            "fit",
            vec![
                Equation::from_residual(x.clone() - Expr::Const(1.0)),
                Equation::from_residual(Expr::Const(2.0) * x.clone() - Expr::Const(2.0)),
            ],
            vec![x],
            vec![],
        )
        .unwrap()
        .complete();
        let problem = LeastSquaresProblem::new(&mut sys, &HashMap::new(), true).unwrap();
        assert_abs_diff_eq!(problem.objective(&DVector::from_vec(vec![1.0])), 0.0);
        assert_abs_diff_eq!(problem.objective(&DVector::from_vec(vec![2.0])), 2.5);
        let g = problem.gradient(&DVector::from_vec(vec![2.0]));
        assert_abs_diff_eq!(g[0], 5.0);
    }

    #[test]
    fn test_interval_problem_brackets_a_scalar() {
        let x = Expr::Var("x".to_string());
        let sys = NonlinearSystem::new(
            "root",
            vec![Equation::from_residual(
                x.clone() * x.clone() - Expr::Const(4.0),
            )],
            vec![x],
            vec![],
        )
        .unwrap()
        .complete();
        let problem = IntervalProblem::new(&sys, &HashMap::new(), (0.0, 3.0)).unwrap();
        assert!(problem.is_bracketing());
        assert_abs_diff_eq!(problem.eval(2.0), 0.0);
    }

    #[test]
    fn test_interval_problem_rejects_non_scalar_systems() {
        let sys = square_system();
        assert!(matches!(
            IntervalProblem::new(&sys, &HashMap::new(), (0.0, 3.0)),
            Err(AssemblyError::Precondition(PreconditionError::NotScalar {
                n_unknowns: 2,
                ..
            }))
        ));
    }

    #[test]
    fn test_interval_problem_rejects_unordered_brackets() {
        let x = Expr::Var("x".to_string());
        let sys = NonlinearSystem::new(
            "root",
            vec![Equation::from_residual(
                x.clone() * x.clone() - Expr::Const(4.0),
            )],
            vec![x],
            vec![],
        )
        .unwrap()
        .complete();
        match IntervalProblem::new(&sys, &HashMap::new(), (3.0, 3.0)) {
            Err(AssemblyError::Precondition(PreconditionError::InvalidBracket {
                lo, hi, ..
            })) => assert_eq!((lo, hi), (3.0, 3.0)),
            _ => panic!("expected a bracket failure"),
        }
    }

    #[test]
    fn test_problem_kind_dispatch() {
        let mut sys = square_system();
        let nonlinear = NonlinearProblem::new(&mut sys, &HashMap::new(), true).unwrap();
        let kind: ProblemKind = nonlinear.into();
        assert_eq!(kind.n_unknowns(), 2);
        assert_eq!(kind.system_name(), "plant");
    }
}
