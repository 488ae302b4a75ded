///____________________________________________________________________________________________________________________________
/// # Equation-system construction and code generation
/// a module
/// 1) collects symbolic equations, unknowns and parameters into system containers
/// 2) analyses their structure (tearing, strongly connected components)
/// 3) generates callable numeric residuals, Jacobians and Hessians for solvers
///# Example#
/// ```
/// use RustedModelKit::symbolic::symbolic_engine::Expr;
/// use RustedModelKit::system::equation_system::{Equation, NonlinearSystem};
/// let vars = Expr::Symbols("x, y");
/// let (x, y) = (vars[0].clone(), vars[1].clone());
/// let eqs = vec![
///     Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
///     Equation::from_residual(y.clone() - x.clone()),
/// ];
/// let mut sys = NonlinearSystem::new("plant", eqs, vec![x, y], vec![])
///     .unwrap()
///     .complete();
/// let jac = sys.calculate_jacobian(false, true);
/// assert_eq!(jac[1][1], Expr::Const(1.0));
/// ```
/// Example2#
/// ```
/// use RustedModelKit::symbolic::symbolic_engine::Expr;
/// use RustedModelKit::system::equation_system::{Equation, NonlinearSystem};
/// let vars = Expr::Symbols("x, y");
/// let (x, y) = (vars[0].clone(), vars[1].clone());
/// let sys = NonlinearSystem::new(
///     "plant",
///     vec![
///         Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
///         Equation::from_residual(y.clone() - x.clone()),
///     ],
///     vec![x, y],
///     vec![],
/// )
/// .unwrap()
/// .with_split_parameters()
/// .complete()
/// .structural_simplify()
/// .unwrap();
/// // block lower-triangular structure splits into two solve stages
/// let staged = sys.scc_problem().unwrap();
/// assert_eq!(staged.n_stages(), 2);
/// ```
/// ________________________________________________________________________________________________________________________________________________
pub mod equation_system;
pub mod equation_system_ODE;
pub mod system_errors;
///________________________________________________________________________________________________________________________________________________
/// structural analysis: incidence graph, matching, tearing state
/// ________________________________________________________________________________________________________________________________________________
pub mod tearing;
///________________________________________________________________________________________________________________________________________________
/// code generation: assignment planning, calling-convention wrapping, numeric
/// artifacts, staged assembly and the problem adapters consumed by solvers
/// ________________________________________________________________________________________________________________________________________________
pub mod assignment_planner;
pub mod build_function;
pub mod generators;
pub mod problems;
pub mod scc_decomposition;
#[cfg(test)]
pub mod system_tests;
