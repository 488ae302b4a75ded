///____________________________________________________________________________________________________________________________
/// # Numerical solvers
/// consumers of the generated problem adapters
/// # Example#
/// ```
/// use RustedModelKit::numerical::NR::NR;
/// use RustedModelKit::symbolic::symbolic_engine::Expr;
/// use RustedModelKit::system::equation_system::{Equation, NonlinearSystem};
/// use RustedModelKit::system::scc_decomposition::SplitParams;
/// use nalgebra::DVector;
/// // stage-by-stage Newton over an SCC decomposition
/// let x = Expr::Var("x".to_string());
/// let y = Expr::Var("y".to_string());
/// let sys = NonlinearSystem::new(
///     "cascade",
///     vec![
///         Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
///         Equation::from_residual(y.clone() - x.clone()),
///     ],
///     vec![x.clone(), y.clone()],
///     vec![],
/// )
/// .unwrap()
/// .with_guesses(vec![(x, 2.0), (y, 2.0)])
/// .with_split_parameters()
/// .complete()
/// .structural_simplify()
/// .unwrap();
/// let staged = sys.scc_problem().unwrap();
/// let mut solver = NR::new();
/// let solution = solver.solve_staged(&staged, &SplitParams::empty()).unwrap();
/// assert!((solution - DVector::from_vec(vec![1.0, 1.0])).norm() < 1e-6);
/// ```
/// ________________________________________________________________________________________________________________________________________________
pub mod NR;
