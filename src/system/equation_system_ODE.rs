//! # ODE system container
//!
//! ## Purpose
//! Wraps a `NonlinearSystem` with an independent (time) variable: equations
//! may now carry differential terms `D(x)`, and construction validates that
//! every differential wraps a declared unknown and never the time variable
//! itself. The time variable is registered globally scoped, so flatten leaves
//! it alone while namespacing everything else.
//!
//! ## Usage
//! ```rust, ignore
//! let (x, k, t) = symbols!(x, k, t);
//! let eqs = vec![Equation::new(x.clone().dt(), -k.clone() * x.clone())];
//! let ode = ODESystem::new("decay", t, eqs, vec![x], vec![k])?;
//! let (diff_eqs, alg_eqs) = ode.split_equations();
//! ```

use crate::symbolic::symbolic_engine::{Expr, Op};
use crate::system::equation_system::{Equation, NonlinearSystem, TagGenerator, Variable};
use crate::system::system_errors::ConstructionError;
use std::collections::HashSet;

/// A system of differential and algebraic equations over one independent
/// variable. Structure and caches live in the inner `NonlinearSystem`.
#[derive(Debug, Clone)]
pub struct ODESystem {
    pub sys: NonlinearSystem,
    pub iv: Expr, // independent variable, a plain symbol
    pub tspan: Option<(f64, f64)>,
}

impl ODESystem {
    ////////////////////////////CONSTRUCTION///////////////////////////////////

    pub fn new(
        name: &str,
        iv: Expr,
        eqs: Vec<Equation>,
        unknowns: Vec<Expr>,
        ps: Vec<Expr>,
    ) -> Result<Self, ConstructionError> {
        Self::new_with_tags(
            name,
            iv,
            eqs,
            unknowns,
            ps,
            &crate::system::equation_system::PROCESS_TAGS,
        )
    }

    pub fn new_with_tags(
        name: &str,
        iv: Expr,
        eqs: Vec<Equation>,
        unknowns: Vec<Expr>,
        ps: Vec<Expr>,
        tags: &TagGenerator,
    ) -> Result<Self, ConstructionError> {
        let iv_name = match iv.canonical_name() {
            Some(n) if matches!(iv, Expr::Var(_)) => n,
            _ => {
                return Err(ConstructionError::MalformedIndependentVariable {
                    iv: iv.to_string(),
                    system: name.to_string(),
                    reason: "not a single symbol".to_string(),
                });
            }
        };
        let unknown_names: HashSet<String> = unknowns
            .iter()
            .filter_map(|u| u.canonical_name())
            .collect();
        if unknown_names.contains(&iv_name) {
            return Err(ConstructionError::MalformedIndependentVariable {
                iv: iv_name,
                system: name.to_string(),
                reason: "listed among the unknowns".to_string(),
            });
        }
        Self::check_differentials(name, &iv_name, &eqs, &unknown_names)?;
        let sys = NonlinearSystem::new_with_tags(name, eqs, unknowns, ps, tags)?
            .with_variables(vec![Variable::new(&iv_name).global_scope()]);
        Ok(ODESystem {
            sys,
            iv,
            tspan: None,
        })
    }

    /// Construction with parameter inference: free symbols that are neither
    /// unknowns, differentials nor the time variable become parameters,
    /// ordered by first referencing equation.
    pub fn from_equations(
        name: &str,
        iv: Expr,
        eqs: Vec<Equation>,
        unknowns: Vec<Expr>,
    ) -> Result<Self, ConstructionError> {
        let iv_name = iv.canonical_name().unwrap_or_default();
        let unknown_names: HashSet<String> = unknowns
            .iter()
            .filter_map(|u| u.canonical_name())
            .collect();
        let mut ps: Vec<Expr> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for eq in &eqs {
            for side in [&eq.lhs, &eq.rhs] {
                for sym in side.all_arguments_are_variables() {
                    if sym == iv_name || sym.starts_with("D(") || unknown_names.contains(&sym) {
                        continue;
                    }
                    if seen.insert(sym.clone()) {
                        ps.push(Expr::from_canonical_name(&sym));
                    }
                }
            }
        }
        Self::new(name, iv, eqs, unknowns, ps)
    }

    /// Every D(..) must wrap a declared unknown; wrapping the time variable or
    /// an undeclared symbol is a construction error naming the term.
    fn check_differentials(
        name: &str,
        iv_name: &str,
        eqs: &[Equation],
        unknown_names: &HashSet<String>,
    ) -> Result<(), ConstructionError> {
        for eq in eqs {
            for side in [&eq.lhs, &eq.rhs] {
                let mut bad: Option<String> = None;
                side.visit(&mut |node| {
                    if let Expr::Call(Op::Dt, args) = node {
                        let inner_ok = args[0]
                            .canonical_name()
                            .map(|inner| inner != iv_name && unknown_names.contains(&inner))
                            .unwrap_or(false);
                        if !inner_ok && bad.is_none() {
                            bad = Some(node.to_string());
                        }
                    }
                });
                if let Some(term) = bad {
                    return Err(ConstructionError::MalformedDifferential {
                        term,
                        system: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    ////////////////////////////BUILDERS///////////////////////////////////////

    pub fn with_tspan(mut self, t0: f64, tf: f64) -> Self {
        self.tspan = Some((t0, tf));
        self
    }

    /// Attaches nested ODE sub-systems; all children must share the time
    /// variable of the parent.
    pub fn with_systems(mut self, systems: Vec<ODESystem>) -> Result<Self, ConstructionError> {
        let iv_name = self.iv_name();
        let mut inner = Vec::with_capacity(systems.len());
        for child in systems {
            if child.iv_name() != iv_name {
                return Err(ConstructionError::MalformedIndependentVariable {
                    iv: child.iv_name(),
                    system: child.sys.name.clone(),
                    reason: format!("not the time variable '{}' of the parent", iv_name),
                });
            }
            inner.push(child.sys);
        }
        self.sys = self.sys.with_systems(inner)?;
        Ok(self)
    }

    pub fn with_observed(mut self, observed: Vec<Equation>) -> Result<Self, ConstructionError> {
        self.sys = self.sys.with_observed(observed)?;
        Ok(self)
    }

    pub fn with_defaults(mut self, defaults: Vec<(Expr, Expr)>) -> Self {
        self.sys = self.sys.with_defaults(defaults);
        self
    }

    pub fn with_guesses(mut self, guesses: Vec<(Expr, f64)>) -> Self {
        self.sys = self.sys.with_guesses(guesses);
        self
    }

    pub fn with_parameter_dependencies(
        mut self,
        deps: Vec<Equation>,
    ) -> Result<Self, ConstructionError> {
        self.sys = self.sys.with_parameter_dependencies(deps)?;
        Ok(self)
    }

    pub fn with_variables(mut self, variables: Vec<Variable>) -> Self {
        self.sys = self.sys.with_variables(variables);
        self
    }

    pub fn with_split_parameters(mut self) -> Self {
        self.sys = self.sys.with_split_parameters();
        self
    }

    pub fn complete(mut self) -> Self {
        self.sys = self.sys.complete();
        self
    }

    /// Absorbs all sub-systems; the globally scoped time variable keeps its
    /// bare name in every absorbed equation.
    pub fn flatten(mut self) -> Self {
        self.sys = self.sys.flatten();
        self
    }

    ////////////////////////////QUERIES////////////////////////////////////////

    pub fn iv_name(&self) -> String {
        self.iv.canonical_name().unwrap_or_default()
    }

    /// True when any equation carries a delayed reference; such systems need
    /// history-aware solvers.
    pub fn has_delay(&self) -> bool {
        self.sys.has_delay()
    }

    /// Splits the equations into differential pairs (state name, right side)
    /// and algebraic residuals, observed variables substituted away in both.
    pub fn split_equations(&self) -> (Vec<(String, Expr)>, Vec<Expr>) {
        let mut differential: Vec<(String, Expr)> = Vec::new();
        let mut algebraic: Vec<Expr> = Vec::new();
        for eq in &self.sys.eqs {
            if let Expr::Call(Op::Dt, args) = &eq.lhs {
                if let Some(state) = args[0].canonical_name() {
                    differential.push((state, self.sys.substitute_observed(&eq.rhs)));
                }
            } else {
                for r in eq.residuals() {
                    algebraic.push(self.sys.substitute_observed(&r));
                }
            }
        }
        (differential, algebraic)
    }
}

/// Equality of the inner system plus the time variable; the advisory time
/// span is excluded.
impl PartialEq for ODESystem {
    fn eq(&self, other: &Self) -> bool {
        self.sys == other.sys && self.iv_name() == other.iv_name()
    }
}

//___________________________________TESTS____________________________________

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols;

    fn decay() -> (Expr, Expr, Expr, Vec<Equation>) {
        let (x, k, t) = symbols!(x, k, t);
        let eqs = vec![Equation::new(x.clone().dt(), -(k.clone() * x.clone()))];
        (x, k, t, eqs)
    }

    #[test]
    fn test_construction_registers_global_time_variable() {
        let (x, k, t, eqs) = decay();
        let ode = ODESystem::new("decay", t, eqs, vec![x], vec![k]).unwrap();
        assert_eq!(ode.iv_name(), "t");
        let registered = ode.sys.variables.get("t").unwrap();
        assert_eq!(
            registered.scope,
            crate::system::equation_system::VarScope::Global
        );
    }

    #[test]
    fn test_differential_on_undeclared_symbol_rejected() {
        let (x, y, t) = symbols!(x, y, t);
        let eqs = vec![Equation::new(y.clone().dt(), -x.clone())];
        let result = ODESystem::new("decay", t, eqs, vec![x], vec![]);
        match result {
            Err(ConstructionError::MalformedDifferential { term, system }) => {
                assert_eq!(term, "D(y)");
                assert_eq!(system, "decay");
            }
            other => panic!("expected differential error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_differential_on_time_variable_rejected() {
        let (x, t) = symbols!(x, t);
        let eqs = vec![Equation::new(x.clone().dt(), t.clone().dt())];
        let result = ODESystem::new("decay", t, eqs, vec![x], vec![]);
        assert!(matches!(
            result,
            Err(ConstructionError::MalformedDifferential { .. })
        ));
    }

    #[test]
    fn test_time_variable_cannot_be_unknown() {
        let (x, t) = symbols!(x, t);
        let eqs = vec![Equation::new(x.clone().dt(), -x.clone())];
        let result = ODESystem::new("decay", t.clone(), eqs, vec![x, t], vec![]);
        match result {
            Err(ConstructionError::MalformedIndependentVariable { iv, reason, .. }) => {
                assert_eq!(iv, "t");
                assert!(reason.contains("unknowns"));
            }
            other => panic!("expected iv error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_time_variable_must_be_a_symbol() {
        let (x, t) = symbols!(x, t);
        let eqs = vec![Equation::new(x.clone().dt(), -x.clone())];
        let result = ODESystem::new("decay", t + x.clone(), eqs, vec![x], vec![]);
        assert!(matches!(
            result,
            Err(ConstructionError::MalformedIndependentVariable { .. })
        ));
    }

    #[test]
    fn test_parameter_inference_skips_time_and_differentials() {
        let (x, k, t) = symbols!(x, k, t);
        let eqs = vec![Equation::new(
            x.clone().dt(),
            -(k.clone() * x.clone()) + t.clone(),
        )];
        let ode = ODESystem::from_equations("decay", t, eqs, vec![x]).unwrap();
        assert_eq!(ode.sys.parameter_names(), vec!["k"]);
    }

    #[test]
    fn test_split_equations() {
        let (x, y, k, t) = symbols!(x, y, k, t);
        let eqs = vec![
            Equation::new(x.clone().dt(), -(k.clone() * x.clone())),
            Equation::from_residual(y.clone() - x.clone()),
        ];
        let ode = ODESystem::new("plant", t, eqs, vec![x.clone(), y.clone()], vec![k]).unwrap();
        let (differential, algebraic) = ode.split_equations();
        assert_eq!(differential.len(), 1);
        assert_eq!(differential[0].0, "x");
        assert_eq!(algebraic.len(), 1);
        assert_eq!(algebraic[0], y - x);
    }

    #[test]
    fn test_split_equations_substitutes_observed() {
        let (x, v, t) = symbols!(x, v, t);
        let ode = ODESystem::new(
            "plant",
            t,
            vec![Equation::new(x.clone().dt(), v.clone())],
            vec![x.clone()],
            vec![],
        )
        .unwrap()
        .with_observed(vec![Equation::new(v, x.clone() * Expr::Const(2.0))])
        .unwrap();
        let (differential, _) = ode.split_equations();
        assert!(!differential[0].1.contains_variable("v"));
        assert_eq!(
            differential[0].1.eval_expression(vec!["x"], &[3.0]),
            6.0
        );
    }

    #[test]
    fn test_flatten_keeps_time_variable_unprefixed() {
        let (x, y, t) = symbols!(x, y, t);
        let child = ODESystem::new(
            "tank",
            t.clone(),
            vec![Equation::new(y.clone().dt(), t.clone() - y.clone())],
            vec![y],
            vec![],
        )
        .unwrap();
        let parent = ODESystem::new(
            "plant",
            t,
            vec![Equation::new(x.clone().dt(), -x.clone())],
            vec![x],
            vec![],
        )
        .unwrap()
        .with_systems(vec![child])
        .unwrap();
        let flat = parent.flatten();
        assert_eq!(flat.sys.unknown_names(), vec!["x", "tank.y"]);
        let absorbed = &flat.sys.eqs[1];
        assert!(absorbed.rhs.contains_variable("t"));
        assert!(!absorbed.rhs.contains_variable("tank.t"));
        assert!(absorbed.lhs.contains_variable("D(tank.y)"));
    }

    #[test]
    fn test_child_with_different_time_variable_rejected() {
        let (x, y, t, s) = symbols!(x, y, t, s);
        let child = ODESystem::new(
            "tank",
            s,
            vec![Equation::new(y.clone().dt(), -y.clone())],
            vec![y],
            vec![],
        )
        .unwrap();
        let parent = ODESystem::new(
            "plant",
            t,
            vec![Equation::new(x.clone().dt(), -x.clone())],
            vec![x],
            vec![],
        )
        .unwrap();
        assert!(matches!(
            parent.with_systems(vec![child]),
            Err(ConstructionError::MalformedIndependentVariable { .. })
        ));
    }

    #[test]
    fn test_delay_detection() {
        let (x, tau, t) = symbols!(x, tau, t);
        let plain = ODESystem::new(
            "plain",
            t.clone(),
            vec![Equation::new(x.clone().dt(), -x.clone())],
            vec![x.clone()],
            vec![],
        )
        .unwrap();
        assert!(!plain.has_delay());
        let delayed = ODESystem::new(
            "delayed",
            t,
            vec![Equation::new(
                x.clone().dt(),
                x.clone().delay(tau.clone()) - x.clone(),
            )],
            vec![x],
            vec![tau],
        )
        .unwrap();
        assert!(delayed.has_delay());
    }

    #[test]
    fn test_equality_includes_time_variable_but_not_tspan() {
        let (x, t, s) = symbols!(x, t, s);
        let make = |iv: Expr| {
            ODESystem::new(
                "decay",
                iv,
                vec![Equation::new(x.clone().dt(), -x.clone())],
                vec![x.clone()],
                vec![],
            )
            .unwrap()
        };
        let a = make(t.clone());
        let b = make(t).with_tspan(0.0, 10.0);
        let c = make(s);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_jacobian_treats_differential_as_leaf() {
        let (x, k, t, eqs) = decay();
        let mut ode = ODESystem::new("decay", t, eqs, vec![x], vec![k]).unwrap();
        let jac = ode.sys.calculate_jacobian(false, true);
        // residual is -(k*x) - D(x); only the algebraic part differentiates
        assert_eq!(jac[0][0].eval_expression(vec!["k"], &[2.0]), -2.0);
    }
}
