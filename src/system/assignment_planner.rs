//! # Assignment planning
//!
//! ## Purpose
//! Two small planners feeding the function builder:
//!
//! 1. `AssignmentPlan` - the ordered list of intermediate assignments
//!    (observed variables, derived parameters, bound constants) that must run
//!    before a set of target expressions can be evaluated. The plan is the
//!    dependency closure of the targets, definitions before uses.
//! 2. `plan_destructure` - segmentation of an argument slot list into runs:
//!    consecutive elements of one array base become a single run copy
//!    (forward or reversed), anything else falls back to element-by-element
//!    gathering.

use crate::symbolic::symbolic_engine::Expr;
use crate::system::equation_system::{NonlinearSystem, SymbolClass};
use crate::system::system_errors::ResolutionError;
use std::collections::HashSet;
use std::ops::Range;

//______________________________ASSIGNMENT PLAN_________________________________

/// One intermediate assignment of the plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// `name` is bound to a numeric value before any evaluation
    Constant { name: String, value: f64 },
    /// `name` is a derived parameter computed from other parameters
    ParameterDependency { name: String, rhs: Expr },
    /// `name` is an observed variable computed from unknowns and parameters
    Observed { name: String, rhs: Expr },
}

impl Assignment {
    pub fn name(&self) -> &str {
        match self {
            Assignment::Constant { name, .. }
            | Assignment::ParameterDependency { name, .. }
            | Assignment::Observed { name, .. } => name,
        }
    }
}

/// Ordered assignments covering the dependency closure of a target set.
/// Evaluating them top to bottom makes every target expression computable
/// from unknowns and parameters alone.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentPlan {
    pub assignments: Vec<Assignment>,
}

impl AssignmentPlan {
    /// Plans the closure for `targets` against `sys`. Unknowns, parameters
    /// and differential leaves are runtime inputs and get no assignment; an
    /// unclassifiable symbol is a resolution error.
    pub fn for_targets(
        sys: &NonlinearSystem,
        targets: &[Expr],
    ) -> Result<Self, ResolutionError> {
        Self::for_targets_with_inputs(sys, targets, &HashSet::new())
    }

    /// Like `for_targets` with additional names treated as runtime inputs,
    /// for wrapper-introduced slots (time, delay values).
    pub fn for_targets_with_inputs(
        sys: &NonlinearSystem,
        targets: &[Expr],
        extra_inputs: &HashSet<String>,
    ) -> Result<Self, ResolutionError> {
        let mut assignments: Vec<Assignment> = Vec::new();
        let mut emitted: HashSet<String> = extra_inputs.clone();
        let mut in_progress: Vec<String> = Vec::new();
        for target in targets {
            for sym in target.all_arguments_are_variables() {
                emit(sys, &sym, &mut emitted, &mut in_progress, &mut assignments)?;
            }
        }
        Ok(AssignmentPlan { assignments })
    }

    pub fn names(&self) -> Vec<&str> {
        self.assignments.iter().map(|a| a.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Symbolically inlines the whole plan into `expr`, leaving only runtime
    /// inputs. Substitution runs bottom-up through the plan, so chained
    /// definitions dissolve completely.
    pub fn inline(&self, expr: &Expr) -> Expr {
        let mut current = expr.clone();
        for assignment in self.assignments.iter().rev() {
            match assignment {
                Assignment::Constant { name, value } => {
                    current = current.substitute_variable(name, &Expr::Const(*value));
                }
                Assignment::ParameterDependency { name, rhs }
                | Assignment::Observed { name, rhs } => {
                    current = current.substitute_variable(name, rhs);
                }
            }
        }
        current
    }
}

/// Depth-first emit of one symbol's closure, definitions before uses.
fn emit(
    sys: &NonlinearSystem,
    sym: &str,
    emitted: &mut HashSet<String>,
    in_progress: &mut Vec<String>,
    assignments: &mut Vec<Assignment>,
) -> Result<(), ResolutionError> {
    if emitted.contains(sym) {
        return Ok(());
    }
    let class = sys.classify_symbol(sym);
    let rhs = match class {
        Some(SymbolClass::Unknown) | Some(SymbolClass::Parameter) => {
            emitted.insert(sym.to_string());
            return Ok(());
        }
        Some(SymbolClass::Observed) => sys
            .try_get_observed(sym)
            .map(|eq| eq.rhs.clone()),
        Some(SymbolClass::DerivedParameter) => sys
            .parameter_dependencies
            .iter()
            .find(|eq| eq.lhs_name().as_deref() == Some(sym))
            .map(|eq| eq.rhs.clone()),
        None => None,
    };
    let rhs = match rhs {
        Some(rhs) => rhs,
        None => {
            // differential leaves are runtime inputs like unknowns
            if sym.starts_with("D(") {
                emitted.insert(sym.to_string());
                return Ok(());
            }
            if let Some(value) = sys.default_value(sym) {
                assignments.push(Assignment::Constant {
                    name: sym.to_string(),
                    value,
                });
                emitted.insert(sym.to_string());
                return Ok(());
            }
            return Err(ResolutionError::UnknownSymbol {
                symbol: sym.to_string(),
                system: sys.name.clone(),
            });
        }
    };

    if in_progress.iter().any(|s| s == sym) {
        let mut participants = in_progress.clone();
        participants.sort();
        return Err(ResolutionError::CircularDefinitions {
            system: sys.name.clone(),
            participants,
        });
    }
    in_progress.push(sym.to_string());
    for dep in rhs.all_arguments_are_variables() {
        emit(sys, &dep, emitted, in_progress, assignments)?;
    }
    in_progress.pop();

    let assignment = match class {
        Some(SymbolClass::DerivedParameter) => Assignment::ParameterDependency {
            name: sym.to_string(),
            rhs,
        },
        _ => Assignment::Observed {
            name: sym.to_string(),
            rhs,
        },
    };
    assignments.push(assignment);
    emitted.insert(sym.to_string());
    Ok(())
} // end of emit

//______________________________DESTRUCTURE RUNS________________________________

/// Shape of an element run in a slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructureKind {
    /// ascending consecutive indices, a single forward copy
    Contiguous,
    /// descending consecutive indices, a single backward copy
    Reversed,
    /// anything else, gathered element by element
    Scattered,
}

/// A maximal run of element handles of one array base.
#[derive(Debug, Clone, PartialEq)]
pub struct Destructure {
    pub base: String,
    pub start_slot: usize,
    pub indices: Vec<usize>, // 1-based element indices in slot order
    pub kind: DestructureKind,
}

impl Destructure {
    /// 0-based index range covered in the source bucket.
    pub fn source_range(&self) -> Range<usize> {
        let lo = self.indices.iter().min().copied().unwrap_or(1);
        let hi = self.indices.iter().max().copied().unwrap_or(0);
        lo.saturating_sub(1)..hi
    }
}

/// One segment of a slot list: either plain named slots or an element run.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotRun {
    Scalars { start_slot: usize, names: Vec<String> },
    Elements(Destructure),
}

/// Segments `slot_names` into maximal runs. Element handles of one base are
/// grouped as long as they stay adjacent; the run kind decides whether the
/// builder may use a block copy or must gather.
pub fn plan_destructure(slot_names: &[String]) -> Vec<SlotRun> {
    let mut runs: Vec<SlotRun> = Vec::new();
    let mut i = 0;
    while i < slot_names.len() {
        match Expr::parse_indexed_name(&slot_names[i]) {
            Some((base, first)) => {
                let start_slot = i;
                let mut indices = vec![first];
                i += 1;
                while i < slot_names.len() {
                    match Expr::parse_indexed_name(&slot_names[i]) {
                        Some((b, idx)) if b == base => {
                            indices.push(idx);
                            i += 1;
                        }
                        _ => break,
                    }
                }
                let kind = classify_run(&indices);
                runs.push(SlotRun::Elements(Destructure {
                    base,
                    start_slot,
                    indices,
                    kind,
                }));
            }
            None => {
                let start_slot = i;
                let mut names = vec![slot_names[i].clone()];
                i += 1;
                while i < slot_names.len() && Expr::parse_indexed_name(&slot_names[i]).is_none() {
                    names.push(slot_names[i].clone());
                    i += 1;
                }
                runs.push(SlotRun::Scalars { start_slot, names });
            }
        }
    }
    runs
} // end of plan_destructure

fn classify_run(indices: &[usize]) -> DestructureKind {
    if indices.len() <= 1 || indices.windows(2).all(|w| w[1] == w[0] + 1) {
        DestructureKind::Contiguous
    } else if indices.windows(2).all(|w| w[0] == w[1] + 1) {
        DestructureKind::Reversed
    } else {
        DestructureKind::Scattered
    }
}

//___________________________________TESTS____________________________________

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols;
    use crate::system::equation_system::Equation;

    fn observed_chain() -> NonlinearSystem {
        let (x, y, z) = symbols!(x, y, z);
        NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(z.clone() * Expr::Const(3.0))],
            vec![x.clone()],
            vec![],
        )
        .unwrap()
        .with_observed(vec![
            Equation::new(z.clone(), y.clone() * y.clone()),
            Equation::new(y, x + Expr::Const(1.0)),
        ])
        .unwrap()
    }

    #[test]
    fn test_plan_orders_definitions_before_uses() {
        let sys = observed_chain();
        let target = Expr::Var("z".to_string()) * Expr::Const(3.0);
        let plan = AssignmentPlan::for_targets(&sys, &[target]).unwrap();
        assert_eq!(plan.names(), vec!["y", "z"]);
    }

    #[test]
    fn test_plan_inline_dissolves_the_chain() {
        let sys = observed_chain();
        let target = Expr::Var("z".to_string()) * Expr::Const(3.0);
        let plan = AssignmentPlan::for_targets(&sys, &[target.clone()]).unwrap();
        let inlined = plan.inline(&target);
        assert!(!inlined.contains_variable("y"));
        assert!(!inlined.contains_variable("z"));
        // (x+1)^2 * 3 at x = 2
        assert_eq!(inlined.eval_expression(vec!["x"], &[2.0]), 27.0);
    }

    #[test]
    fn test_plan_mixes_dependencies_constants_and_observed() {
        let (x, y, k, c) = symbols!(x, y, k, c);
        let sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(x.clone() - y.clone())],
            vec![x.clone()],
            vec![],
        )
        .unwrap()
        .with_observed(vec![Equation::new(y.clone(), k.clone() * x + c.clone())])
        .unwrap()
        .with_parameter_dependencies(vec![Equation::new(k, c.clone() * Expr::Const(2.0))])
        .unwrap()
        .with_defaults(vec![(c, Expr::Const(0.5))]);
        let plan = AssignmentPlan::for_targets(&sys, &[y]).unwrap();
        assert_eq!(plan.names(), vec!["c", "k", "y"]);
        assert_eq!(
            plan.assignments[0],
            Assignment::Constant {
                name: "c".to_string(),
                value: 0.5
            }
        );
        assert!(matches!(
            plan.assignments[1],
            Assignment::ParameterDependency { .. }
        ));
        assert!(matches!(plan.assignments[2], Assignment::Observed { .. }));
    }

    #[test]
    fn test_unresolvable_symbol_is_an_error() {
        let sys = observed_chain();
        let target = Expr::Var("ghost".to_string());
        let result = AssignmentPlan::for_targets(&sys, &[target]);
        match result {
            Err(ResolutionError::UnknownSymbol { symbol, .. }) => assert_eq!(symbol, "ghost"),
            other => panic!("expected resolution failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_circular_observed_definitions_rejected() {
        let (x, a, b) = symbols!(x, a, b);
        let sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(x.clone())],
            vec![x],
            vec![],
        )
        .unwrap()
        .with_observed(vec![
            Equation::new(a.clone(), b.clone() + Expr::Const(1.0)),
            Equation::new(b, a.clone() + Expr::Const(1.0)),
        ])
        .unwrap();
        let result = AssignmentPlan::for_targets(&sys, &[a]);
        match result {
            Err(ResolutionError::CircularDefinitions { participants, .. }) => {
                assert_eq!(participants, vec!["a", "b"]);
            }
            other => panic!("expected cycle failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_differential_leaves_are_runtime_inputs() {
        let (x, t) = symbols!(x, t);
        let ode = crate::system::equation_system_ODE::ODESystem::new(
            "decay",
            t,
            vec![Equation::new(x.clone().dt(), -x.clone())],
            vec![x.clone()],
            vec![],
        )
        .unwrap();
        // residual carries the differential leaf D(x)
        let target = ode.sys.full_equations()[0].clone();
        let plan = AssignmentPlan::for_targets(&ode.sys, &[target]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_destructure_contiguous_run() {
        let slots: Vec<String> = vec!["p[1]".into(), "p[2]".into(), "p[3]".into()];
        let runs = plan_destructure(&slots);
        assert_eq!(runs.len(), 1);
        match &runs[0] {
            SlotRun::Elements(run) => {
                assert_eq!(run.base, "p");
                assert_eq!(run.kind, DestructureKind::Contiguous);
                assert_eq!(run.source_range(), 0..3);
            }
            other => panic!("expected element run, got {:?}", other),
        }
    }

    #[test]
    fn test_destructure_out_of_order_falls_back_to_gather() {
        let slots: Vec<String> = vec!["p[3]".into(), "p[1]".into()];
        let runs = plan_destructure(&slots);
        assert_eq!(runs.len(), 1);
        match &runs[0] {
            SlotRun::Elements(run) => {
                assert_eq!(run.kind, DestructureKind::Scattered);
                assert_eq!(run.indices, vec![3, 1]);
            }
            other => panic!("expected element run, got {:?}", other),
        }
    }

    #[test]
    fn test_destructure_reversed_run() {
        let slots: Vec<String> = vec!["p[3]".into(), "p[2]".into(), "p[1]".into()];
        let runs = plan_destructure(&slots);
        match &runs[0] {
            SlotRun::Elements(run) => {
                assert_eq!(run.kind, DestructureKind::Reversed);
                assert_eq!(run.source_range(), 0..3);
            }
            other => panic!("expected element run, got {:?}", other),
        }
    }

    #[test]
    fn test_destructure_segments_mixed_slots() {
        let slots: Vec<String> = vec![
            "a".into(),
            "p[1]".into(),
            "p[2]".into(),
            "q[1]".into(),
            "b".into(),
        ];
        let runs = plan_destructure(&slots);
        assert_eq!(runs.len(), 4);
        assert!(matches!(&runs[0], SlotRun::Scalars { names, .. } if names == &["a"]));
        assert!(
            matches!(&runs[1], SlotRun::Elements(run) if run.base == "p" && run.start_slot == 1)
        );
        assert!(matches!(&runs[2], SlotRun::Elements(run) if run.base == "q"));
        assert!(matches!(&runs[3], SlotRun::Scalars { names, .. } if names == &["b"]));
    }
}
