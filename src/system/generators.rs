//! # Numeric artifact generation
//!
//! ## Purpose
//! Turns a system into the executable artifacts a solver consumes: residual
//! vector functions, dense and sparse Jacobian functions with bandwidths, and
//! per-equation Hessian functions. Parameter values are bound at generation
//! time; the produced closures run over the unknown vector alone, so the
//! solver loop never touches symbolic code.
//!
//! Symbolic derivative matrices come from the system's memoized caches; the
//! artifacts share them, so repeated generation with the same flags costs one
//! differentiation.

use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_lambdify::Lambda;
use crate::system::assignment_planner::AssignmentPlan;
use crate::system::build_function::FunctionBuilder;
use crate::system::equation_system::NonlinearSystem;
use crate::system::equation_system_ODE::ODESystem;
use crate::system::system_errors::{AssemblyError, PreconditionError, ResolutionError};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

//________________________________ARTIFACTS_____________________________________

/// Residual vector of a system, symbolic and executable. The executable form
/// is a pair: an allocating function and an in-place companion writing into a
/// caller buffer.
pub struct ResidualArtifact {
    pub symbolic: Vec<Expr>,
    pub function: Box<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>,
    pub function_into: Box<dyn Fn(&DVector<f64>, &mut DVector<f64>) + Send + Sync>,
}

/// Jacobian of a system: the shared symbolic matrix, a dense and a sparse
/// evaluator and the band structure. The sparse evaluator keeps the pattern
/// fixed at the symbolic nonzeros.
pub struct JacobianArtifact {
    pub symbolic: Rc<Vec<Vec<Expr>>>,
    pub dense: Box<dyn Fn(&DVector<f64>) -> DMatrix<f64> + Send + Sync>,
    pub sparse: Box<dyn Fn(&DVector<f64>) -> CsMat<f64> + Send + Sync>,
    pub bandwidth: (usize, usize), // (kl, ku)
}

/// Second derivatives, one matrix function per equation.
pub struct HessianArtifact {
    pub symbolic: Rc<Vec<Vec<Vec<Expr>>>>,
    pub functions: Vec<Box<dyn Fn(&DVector<f64>) -> DMatrix<f64> + Send + Sync>>,
}

/// Lower and upper bandwidth of a symbolic matrix, rows scanned in parallel.
pub fn find_bandwidths(jac: &[Vec<Expr>]) -> (usize, usize) {
    jac.par_iter()
        .enumerate()
        .map(|(i, row)| {
            let mut kl = 0usize;
            let mut ku = 0usize;
            for (j, entry) in row.iter().enumerate() {
                if !entry.is_zero() {
                    if j < i {
                        kl = kl.max(i - j);
                    } else {
                        ku = ku.max(j - i);
                    }
                }
            }
            (kl, ku)
        })
        .reduce(|| (0, 0), |a, b| (a.0.max(b.0), a.1.max(b.1)))
} // end of find_bandwidths

//______________________________GENERATION______________________________________

impl NonlinearSystem {
    /// Inlines the assignment closure and binds parameter values; anything
    /// left over besides the unknowns is a resolution error naming the symbol.
    fn bind_expressions(
        &self,
        targets: &[Expr],
        parameter_values: &HashMap<String, f64>,
    ) -> Result<Vec<Expr>, ResolutionError> {
        let plan = AssignmentPlan::for_targets(self, targets)?;
        let unknown_set: HashSet<String> = self.unknown_names().into_iter().collect();
        // the closure must not capture self, the derivative caches hold Rc
        let system_name = self.name.clone();
        targets
            .par_iter()
            .map(|target| {
                let bound = plan.inline(target).set_variable_from_map(parameter_values);
                for sym in bound.all_arguments_are_variables() {
                    if !unknown_set.contains(&sym) {
                        return Err(ResolutionError::UnknownSymbol {
                            symbol: sym,
                            system: system_name.clone(),
                        });
                    }
                }
                Ok(bound)
            })
            .collect()
    }

    /// Residual artifact over the observed-substituted equations.
    pub fn generate_residual(
        &self,
        parameter_values: &HashMap<String, f64>,
    ) -> Result<ResidualArtifact, ResolutionError> {
        let symbolic = self.full_equations();
        let bound = self.bind_expressions(&symbolic, parameter_values)?;
        let names = self.unknown_names();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let lambdas: Arc<Vec<Lambda>> = Arc::new(bound.iter().map(|e| e.compile(&refs)).collect());
        let n = lambdas.len();
        let function = {
            let lambdas = Arc::clone(&lambdas);
            Box::new(move |u: &DVector<f64>| {
                let args = u.as_slice();
                DVector::from_iterator(n, lambdas.iter().map(|l| l.eval(args)))
            })
        };
        let function_into = Box::new(move |u: &DVector<f64>, out: &mut DVector<f64>| {
            assert_eq!(
                out.len(),
                n,
                "residual buffer holds {} values, the system has {} equations",
                out.len(),
                n
            );
            let args = u.as_slice();
            for (slot, lambda) in out.iter_mut().zip(lambdas.iter()) {
                *slot = lambda.eval(args);
            }
        });
        Ok(ResidualArtifact {
            symbolic,
            function,
            function_into,
        })
    }

    /// Jacobian artifact; the symbolic matrix comes from the memoized cache.
    pub fn generate_jacobian(
        &mut self,
        parameter_values: &HashMap<String, f64>,
        simplify: bool,
    ) -> Result<JacobianArtifact, ResolutionError> {
        let symbolic = self.calculate_jacobian(false, simplify);
        let bandwidth = find_bandwidths(&symbolic);
        let names = self.unknown_names();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let n_eqs = symbolic.len();
        let n_vars = names.len();

        let flat: Vec<Expr> = symbolic.iter().flatten().cloned().collect();
        let bound = self.bind_expressions(&flat, parameter_values)?;
        let lambdas: Vec<Lambda> = bound.iter().map(|e| e.compile(&refs)).collect();

        // structural nonzeros, pattern fixed once
        let nonzeros: Vec<(usize, usize, Lambda)> = bound
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_zero())
            .map(|(k, e)| (k / n_vars, k % n_vars, e.compile(&refs)))
            .collect();

        let dense = Box::new(move |u: &DVector<f64>| {
            let args = u.as_slice();
            DMatrix::from_fn(n_eqs, n_vars, |i, j| lambdas[i * n_vars + j].eval(args))
        });
        let sparse = Box::new(move |u: &DVector<f64>| {
            let args = u.as_slice();
            let mut tri = TriMat::new((n_eqs, n_vars));
            for (i, j, lambda) in &nonzeros {
                tri.add_triplet(*i, *j, lambda.eval(args));
            }
            tri.to_csr()
        });
        Ok(JacobianArtifact {
            symbolic,
            dense,
            sparse,
            bandwidth,
        })
    } // end of generate_jacobian

    /// Hessian artifact, one matrix function per equation.
    pub fn generate_hessian(
        &mut self,
        parameter_values: &HashMap<String, f64>,
        simplify: bool,
    ) -> Result<HessianArtifact, ResolutionError> {
        let symbolic = self.calculate_hessian(false, simplify);
        let names = self.unknown_names();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let n_vars = names.len();

        let mut functions: Vec<Box<dyn Fn(&DVector<f64>) -> DMatrix<f64> + Send + Sync>> =
            Vec::with_capacity(symbolic.len());
        for matrix in symbolic.iter() {
            let flat: Vec<Expr> = matrix.iter().flatten().cloned().collect();
            let bound = self.bind_expressions(&flat, parameter_values)?;
            let lambdas: Vec<Lambda> = bound.iter().map(|e| e.compile(&refs)).collect();
            functions.push(Box::new(move |u: &DVector<f64>| {
                let args = u.as_slice();
                DMatrix::from_fn(n_vars, n_vars, |i, j| lambdas[i * n_vars + j].eval(args))
            }));
        }
        Ok(HessianArtifact {
            symbolic,
            functions,
        })
    }
}

impl ODESystem {
    /// Right-hand side function f(t, u) of the differential equations.
    /// Parameter values are bound now; a missing one is a resolution error,
    /// a delay-bearing system a precondition error since f(t, u) carries no
    /// history argument.
    pub fn generate_rhs(
        &self,
        parameter_values: &HashMap<String, f64>,
    ) -> Result<Box<dyn Fn(f64, &DVector<f64>) -> DVector<f64> + Send + Sync>, AssemblyError>
    {
        let (differential, _) = self.split_equations();
        let targets: Vec<Expr> = differential.into_iter().map(|(_, rhs)| rhs).collect();
        self.generate_ivp_function(targets, parameter_values)
    }

    /// Jacobian d f / d u of the right-hand side as f(t, u) -> matrix.
    pub fn generate_rhs_jacobian(
        &self,
        parameter_values: &HashMap<String, f64>,
    ) -> Result<Box<dyn Fn(f64, &DVector<f64>) -> DMatrix<f64> + Send + Sync>, AssemblyError>
    {
        let (differential, _) = self.split_equations();
        let names = self.sys.unknown_names();
        let n = names.len();
        let entries: Vec<Expr> = differential
            .par_iter()
            .flat_map(|(_, rhs)| {
                names
                    .par_iter()
                    .map(move |name| rhs.diff(name).simplify_())
            })
            .collect();
        let n_rows = differential.len();
        let rows = self.generate_ivp_function(entries, parameter_values)?;
        Ok(Box::new(move |t: f64, u: &DVector<f64>| {
            let values = rows(t, u);
            DMatrix::from_row_slice(n_rows, n, values.as_slice())
        }))
    }

    fn generate_ivp_function(
        &self,
        targets: Vec<Expr>,
        parameter_values: &HashMap<String, f64>,
    ) -> Result<Box<dyn Fn(f64, &DVector<f64>) -> DVector<f64> + Send + Sync>, AssemblyError>
    {
        let built = FunctionBuilder::for_ode(self).build(&targets)?;
        if built.has_delays() {
            return Err(PreconditionError::DelaysPresent {
                system: self.sys.name.clone(),
                requested: "an f(t, u) right-hand side".to_string(),
            }
            .into());
        }
        // parameter buckets follow the unknowns group; fill them from the map
        let unknown_group = built
            .signature
            .groups
            .iter()
            .position(|g| g.name == "unknowns")
            .unwrap_or(0);
        let mut buckets: Vec<Vec<f64>> = Vec::new();
        for group in &built.signature.groups[unknown_group + 1..] {
            let mut values = Vec::with_capacity(group.layout.len());
            for name in &group.layout {
                match parameter_values.get(name) {
                    Some(v) => values.push(*v),
                    None => {
                        return Err(ResolutionError::UnknownSymbol {
                            symbol: name.clone(),
                            system: self.sys.name.clone(),
                        }
                        .into());
                    }
                }
            }
            buckets.push(values);
        }
        Ok(Box::new(move |t: f64, u: &DVector<f64>| {
            let t_buf = [t];
            let mut groups: Vec<&[f64]> = Vec::with_capacity(2 + buckets.len());
            groups.push(&t_buf);
            groups.push(u.as_slice());
            for bucket in &buckets {
                groups.push(bucket.as_slice());
            }
            DVector::from_vec(built.call(&groups))
        }))
    } // end of generate_ivp_function
}

//___________________________________TESTS____________________________________

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols;
    use crate::system::equation_system::Equation;

    fn two_stage() -> NonlinearSystem {
        let (x, y) = symbols!(x, y);
        NonlinearSystem::new(
            "plant",
            vec![
                Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
                Equation::from_residual(y.clone() - x.clone()),
            ],
            vec![x, y],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_residual_artifact() {
        let sys = two_stage();
        let artifact = sys.generate_residual(&HashMap::new()).unwrap();
        assert_eq!(artifact.symbolic.len(), 2);
        let r = (artifact.function)(&DVector::from_vec(vec![2.0, 5.0]));
        assert_eq!(r.as_slice(), &[3.0, 3.0]);
    }

    #[test]
    fn test_residual_evaluates_into_a_buffer() {
        let sys = two_stage();
        let artifact = sys.generate_residual(&HashMap::new()).unwrap();
        let mut out = DVector::zeros(2);
        (artifact.function_into)(&DVector::from_vec(vec![2.0, 5.0]), &mut out);
        assert_eq!(out.as_slice(), &[3.0, 3.0]);
        (artifact.function_into)(&DVector::from_vec(vec![1.0, 1.0]), &mut out);
        assert_eq!(out.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_residual_reports_missing_parameter() {
        let (x, k) = symbols!(x, k);
        let sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(x.clone() - k.clone())],
            vec![x],
            vec![k],
        )
        .unwrap();
        let result = sys.generate_residual(&HashMap::new());
        match result {
            Err(ResolutionError::UnknownSymbol { symbol, .. }) => assert_eq!(symbol, "k"),
            _ => panic!("expected a missing parameter failure"),
        }
    }

    #[test]
    fn test_binding_runs_with_populated_caches() {
        let (x, k) = symbols!(x, k);
        let mut sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(k.clone() * x.clone() - Expr::Const(6.0))],
            vec![x],
            vec![k],
        )
        .unwrap();
        let params = HashMap::from([("k".to_string(), 2.0)]);
        // the jacobian call leaves a shared symbolic matrix in the cache
        let _ = sys.generate_jacobian(&params, true).unwrap();
        let artifact = sys.generate_residual(&params).unwrap();
        let r = (artifact.function)(&DVector::from_vec(vec![3.0]));
        assert_eq!(r.as_slice(), &[0.0]);
        match sys.generate_residual(&HashMap::new()) {
            Err(ResolutionError::UnknownSymbol { symbol, system }) => {
                assert_eq!(symbol, "k");
                assert_eq!(system, "plant");
            }
            _ => panic!("expected a missing parameter failure"),
        }
    }

    #[test]
    fn test_parameters_bound_through_dependencies() {
        let (x, k, c) = symbols!(x, k, c);
        let sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(k.clone() * x.clone() - Expr::Const(6.0))],
            vec![x],
            vec![],
        )
        .unwrap()
        .with_parameter_dependencies(vec![Equation::new(k, c.clone() * Expr::Const(2.0))])
        .unwrap()
        .with_defaults(vec![(c, Expr::Const(1.5))]);
        let artifact = sys.generate_residual(&HashMap::new()).unwrap();
        // k resolves to 3 through its dependency on the bound constant c
        let r = (artifact.function)(&DVector::from_vec(vec![2.0]));
        assert_eq!(r.as_slice(), &[0.0]);
    }

    #[test]
    fn test_jacobian_artifact_dense_sparse_bandwidth() {
        let mut sys = two_stage();
        let artifact = sys.generate_jacobian(&HashMap::new(), true).unwrap();
        assert_eq!(artifact.bandwidth, (1, 0));

        let u = DVector::from_vec(vec![3.0, 0.0]);
        let dense = (artifact.dense)(&u);
        assert_eq!(dense[(0, 0)], 6.0);
        assert_eq!(dense[(0, 1)], 0.0);
        assert_eq!(dense[(1, 0)], -1.0);
        assert_eq!(dense[(1, 1)], 1.0);

        let sparse = (artifact.sparse)(&u);
        assert_eq!(sparse.nnz(), 3);
        assert_eq!(sparse.get(0, 0), Some(&6.0));
        assert_eq!(sparse.get(0, 1), None);
    }

    #[test]
    fn test_jacobian_shares_the_memoized_matrix() {
        let mut sys = two_stage();
        let artifact = sys.generate_jacobian(&HashMap::new(), true).unwrap();
        let again = sys.calculate_jacobian(false, true);
        assert!(Rc::ptr_eq(&artifact.symbolic, &again));
    }

    #[test]
    fn test_hessian_artifact() {
        let mut sys = two_stage();
        let artifact = sys.generate_hessian(&HashMap::new(), true).unwrap();
        let u = DVector::from_vec(vec![3.0, 0.0]);
        let h0 = (artifact.functions[0])(&u);
        assert_eq!(h0[(0, 0)], 2.0);
        assert_eq!(h0[(1, 1)], 0.0);
        let h1 = (artifact.functions[1])(&u);
        assert_eq!(h1[(0, 0)], 0.0);
    }

    #[test]
    fn test_ode_rhs_and_jacobian() {
        let (x, k, t) = symbols!(x, k, t);
        let ode = ODESystem::new(
            "decay",
            t,
            vec![Equation::new(x.clone().dt(), -(k.clone() * x.clone()))],
            vec![x],
            vec![k],
        )
        .unwrap();
        let params = HashMap::from([("k".to_string(), 2.0)]);
        let rhs = ode.generate_rhs(&params).unwrap();
        let u = DVector::from_vec(vec![5.0]);
        assert_eq!(rhs(0.0, &u).as_slice(), &[-10.0]);

        let jac = ode.generate_rhs_jacobian(&params).unwrap();
        let j = jac(0.0, &u);
        assert_eq!(j[(0, 0)], -2.0);
    }

    #[test]
    fn test_ode_rhs_missing_parameter() {
        let (x, k, t) = symbols!(x, k, t);
        let ode = ODESystem::new(
            "decay",
            t,
            vec![Equation::new(x.clone().dt(), -(k.clone() * x.clone()))],
            vec![x],
            vec![k],
        )
        .unwrap();
        let result = ode.generate_rhs(&HashMap::new());
        assert!(matches!(
            result,
            Err(AssemblyError::Resolution(ResolutionError::UnknownSymbol { .. }))
        ));
    }

    #[test]
    fn test_ode_rhs_rejects_delay_systems() {
        let (x, t) = symbols!(x, t);
        let ode = ODESystem::new(
            "lag",
            t,
            vec![Equation::new(
                x.clone().dt(),
                -x.clone().delay(Expr::Const(1.0)),
            )],
            vec![x],
            vec![],
        )
        .unwrap();
        let result = ode.generate_rhs(&HashMap::new());
        match result {
            Err(AssemblyError::Precondition(PreconditionError::DelaysPresent {
                system, ..
            })) => assert_eq!(system, "lag"),
            _ => panic!("expected a delay precondition failure"),
        }
    }
}
