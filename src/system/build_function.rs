//! # Function building
//!
//! ## Purpose
//! Turns target expressions of a system into one executable function with a
//! uniform calling convention. The wrapper is assembled in a fixed order:
//!
//! 1. delay wrapping - every distinct `delay(..)` term becomes a fresh input
//!    slot, supplied by the caller as a history group placed right before the
//!    parameter groups
//! 2. inlining - observed variables, derived parameters and bound constants
//!    dissolve into the targets via the assignment plan
//! 3. destructuring - element references are pulled out of incoming array
//!    buckets with run copies where the layout allows, gathers otherwise
//! 4. time coercion - in a time-dependent context the function always accepts
//!    a leading time group, referenced or not
//! 5. parameter buckets - with the split representation parameters arrive as
//!    one bucket per numeric type instead of one flat bucket
//! 6. output shaping - any number of targets, evaluated into one vector or a
//!    caller-supplied buffer
//!
//! The caller sees the result as `ArgGroup`s: pass one `&[f64]` per group,
//! laid out as the group's `layout` names say.

use crate::symbolic::symbolic_engine::{Expr, Op};
use crate::symbolic::symbolic_lambdify::Lambda;
use crate::system::assignment_planner::{
    plan_destructure, AssignmentPlan, DestructureKind, SlotRun,
};
use crate::system::equation_system::{NonlinearSystem, SymbolClass, VarType};
use crate::system::equation_system_ODE::ODESystem;
use crate::system::system_errors::ResolutionError;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

//_____________________________CALLING CONVENTION_______________________________

/// One argument group of a built function. The caller passes a `&[f64]` whose
/// positions follow `layout`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgGroup {
    pub name: String,
    pub layout: Vec<String>,
}

/// Ordered argument groups of a built function: time (when time-dependent),
/// unknowns, delayed values (when delays occur), then parameter bucket(s).
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub groups: Vec<ArgGroup>,
}

impl Signature {
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }
}

/// A single move of values from an incoming bucket into the evaluation
/// buffer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FillStep {
    CopyRun {
        group: usize,
        source: Range<usize>,
        dest: usize,
    },
    CopyRunReversed {
        group: usize,
        source: Range<usize>,
        dest: usize,
    },
    Gather {
        group: usize,
        source_positions: Vec<usize>,
        dest: usize,
    },
}

//_______________________________BUILT FUNCTION_________________________________

/// An executable function over argument groups. Thread safe; evaluation fills
/// one internal slot buffer per call, the outputs land in a fresh vector or a
/// caller-supplied buffer.
pub struct BuiltFunction {
    pub signature: Signature,
    /// fresh slot name -> the delayed expression it stands for
    pub delay_terms: Vec<(String, Expr)>,
    pub(crate) slot_names: Vec<String>,
    pub(crate) fill_steps: Vec<FillStep>,
    n_outputs: usize,
    func: Box<dyn Fn(&[&[f64]], &mut [f64]) + Send + Sync>,
}

impl BuiltFunction {
    /// Evaluates all outputs. One slice per signature group, in order.
    pub fn call(&self, groups: &[&[f64]]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_outputs];
        self.call_into(groups, &mut out);
        out
    }

    /// Evaluates all outputs into `out`, which must hold `n_outputs` values.
    pub fn call_into(&self, groups: &[&[f64]], out: &mut [f64]) {
        assert_eq!(
            groups.len(),
            self.signature.groups.len(),
            "expected {} argument groups ({:?}), got {}",
            self.signature.groups.len(),
            self.signature.group_names(),
            groups.len()
        );
        assert_eq!(
            out.len(),
            self.n_outputs,
            "output buffer holds {} values, the function produces {}",
            out.len(),
            self.n_outputs
        );
        (self.func)(groups, out);
    }

    /// Single-output convenience.
    pub fn call_scalar(&self, groups: &[&[f64]]) -> f64 {
        assert_eq!(
            self.n_outputs, 1,
            "call_scalar on a function with {} outputs",
            self.n_outputs
        );
        self.call(groups)[0]
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn has_delays(&self) -> bool {
        !self.delay_terms.is_empty()
    }
}

//_________________________________BUILDER______________________________________

/// Builds executable functions for one system. Holding the builder borrows
/// the system immutably; built functions are owned and independent.
pub struct FunctionBuilder<'a> {
    sys: &'a NonlinearSystem,
    time_name: Option<String>,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(sys: &'a NonlinearSystem) -> Self {
        FunctionBuilder {
            sys,
            time_name: None,
        }
    }

    /// Time-dependent context: built functions take the time variable as a
    /// leading group whether or not the targets reference it.
    pub fn for_ode(ode: &'a ODESystem) -> Self {
        FunctionBuilder {
            sys: &ode.sys,
            time_name: Some(ode.iv_name()),
        }
    }

    pub fn build(&self, targets: &[Expr]) -> Result<BuiltFunction, ResolutionError> {
        // 1. delay wrapping
        let (rewritten, delay_terms) = wrap_delays(targets);

        // 2. inlining
        let mut runtime_inputs: HashSet<String> =
            delay_terms.iter().map(|(name, _)| name.clone()).collect();
        if let Some(tn) = &self.time_name {
            runtime_inputs.insert(tn.clone());
        }
        let plan = AssignmentPlan::for_targets_with_inputs(self.sys, &rewritten, &runtime_inputs)?;
        let inlined: Vec<Expr> = rewritten.iter().map(|t| plan.inline(t)).collect();

        // 3..5. slot layout and fill plan
        let mut groups: Vec<ArgGroup> = Vec::new();
        let mut fill: Vec<FillStep> = Vec::new();
        let mut slot_names: Vec<String> = Vec::new();

        if let Some(tn) = &self.time_name {
            let group = groups.len();
            groups.push(ArgGroup {
                name: tn.clone(),
                layout: vec![tn.clone()],
            });
            // a time slot only when the targets reference time; the group is
            // accepted and ignored otherwise
            if inlined.iter().any(|e| e.contains_variable(tn)) {
                fill.push(FillStep::CopyRun {
                    group,
                    source: 0..1,
                    dest: slot_names.len(),
                });
                slot_names.push(tn.clone());
            }
        }

        let unknown_names = self.sys.unknown_names();
        {
            let group = groups.len();
            fill.push(FillStep::CopyRun {
                group,
                source: 0..unknown_names.len(),
                dest: slot_names.len(),
            });
            slot_names.extend(unknown_names.iter().cloned());
            groups.push(ArgGroup {
                name: "unknowns".to_string(),
                layout: unknown_names,
            });
        }

        // the history group sits right before the parameter buckets
        if !delay_terms.is_empty() {
            let group = groups.len();
            let layout: Vec<String> = delay_terms.iter().map(|(name, _)| name.clone()).collect();
            fill.push(FillStep::CopyRun {
                group,
                source: 0..layout.len(),
                dest: slot_names.len(),
            });
            slot_names.extend(layout.iter().cloned());
            groups.push(ArgGroup {
                name: "delays".to_string(),
                layout,
            });
        }

        for (group_name, slots) in self.parameter_slot_groups(&inlined) {
            let group = groups.len();
            let (layout, positions) = self.dense_layout(&slots);
            let dest_base = slot_names.len();
            for run in plan_destructure(&slots) {
                match run {
                    SlotRun::Scalars { start_slot, names } => {
                        let source_positions: Vec<usize> =
                            names.iter().map(|n| positions[n]).collect();
                        fill.push(FillStep::Gather {
                            group,
                            source_positions,
                            dest: dest_base + start_slot,
                        });
                    }
                    SlotRun::Elements(run) => {
                        let base_start = positions[&format!("{}[1]", run.base)];
                        let span = run.source_range();
                        match run.kind {
                            DestructureKind::Contiguous => fill.push(FillStep::CopyRun {
                                group,
                                source: base_start + span.start..base_start + span.end,
                                dest: dest_base + run.start_slot,
                            }),
                            DestructureKind::Reversed => fill.push(FillStep::CopyRunReversed {
                                group,
                                source: base_start + span.start..base_start + span.end,
                                dest: dest_base + run.start_slot,
                            }),
                            DestructureKind::Scattered => {
                                let source_positions: Vec<usize> = run
                                    .indices
                                    .iter()
                                    .map(|&i| base_start + i.saturating_sub(1))
                                    .collect();
                                fill.push(FillStep::Gather {
                                    group,
                                    source_positions,
                                    dest: dest_base + run.start_slot,
                                });
                            }
                        }
                    }
                }
            }
            slot_names.extend(slots.iter().cloned());
            groups.push(ArgGroup {
                name: group_name,
                layout,
            });
        }

        // 6. compile outputs against the final slot layout
        let slot_refs: Vec<&str> = slot_names.iter().map(|s| s.as_str()).collect();
        let outputs: Vec<Lambda> = inlined.iter().map(|e| e.compile(&slot_refs)).collect();
        let n_outputs = outputs.len();

        let n_slots = slot_names.len();
        let steps = fill.clone();
        let func = Box::new(move |args: &[&[f64]], out: &mut [f64]| {
            let mut values = vec![0.0; n_slots];
            for step in &steps {
                match step {
                    FillStep::CopyRun {
                        group,
                        source,
                        dest,
                    } => {
                        values[*dest..*dest + source.len()]
                            .copy_from_slice(&args[*group][source.clone()]);
                    }
                    FillStep::CopyRunReversed {
                        group,
                        source,
                        dest,
                    } => {
                        for (k, v) in args[*group][source.clone()].iter().rev().enumerate() {
                            values[*dest + k] = *v;
                        }
                    }
                    FillStep::Gather {
                        group,
                        source_positions,
                        dest,
                    } => {
                        for (k, &pos) in source_positions.iter().enumerate() {
                            values[*dest + k] = args[*group][pos];
                        }
                    }
                }
            } // end of fill
            for (slot, lambda) in out.iter_mut().zip(outputs.iter()) {
                *slot = lambda.eval(&values);
            }
        });

        Ok(BuiltFunction {
            signature: Signature { groups },
            delay_terms,
            slot_names,
            fill_steps: fill,
            n_outputs,
            func,
        })
    } // end of build

    /// Parameter slots in first-reference order, partitioned into buckets:
    /// one flat bucket, or one per numeric type under the split
    /// representation.
    fn parameter_slot_groups(&self, inlined: &[Expr]) -> Vec<(String, Vec<String>)> {
        let mut param_slots: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for expr in inlined {
            for sym in expr.all_arguments_are_variables() {
                if self.sys.classify_symbol(&sym) == Some(SymbolClass::Parameter)
                    && seen.insert(sym.clone())
                {
                    param_slots.push(sym);
                }
            }
        }
        if self.sys.split {
            let mut real: Vec<String> = Vec::new();
            let mut integer: Vec<String> = Vec::new();
            for slot in param_slots {
                match self.sys.var_type(&slot) {
                    VarType::Real => real.push(slot),
                    VarType::Integer => integer.push(slot),
                }
            }
            vec![
                ("p_real".to_string(), real),
                ("p_int".to_string(), integer),
            ]
        } else {
            vec![("p".to_string(), param_slots)]
        }
    }

    /// Dense bucket layout for a slot set: array bases expand to their full
    /// element range (declared shape, or the largest referenced index),
    /// scalars keep one position.
    fn dense_layout(&self, slots: &[String]) -> (Vec<String>, HashMap<String, usize>) {
        let mut layout: Vec<String> = Vec::new();
        let mut seen_bases: HashSet<String> = HashSet::new();
        for slot in slots {
            match Expr::parse_indexed_name(slot) {
                Some((base, _)) => {
                    if seen_bases.insert(base.clone()) {
                        let extent = self.sys.array_shape(&base).unwrap_or_else(|| {
                            slots
                                .iter()
                                .filter_map(|s| Expr::parse_indexed_name(s))
                                .filter(|(b, _)| *b == base)
                                .map(|(_, i)| i)
                                .max()
                                .unwrap_or(0)
                        });
                        for i in 1..=extent {
                            layout.push(format!("{}[{}]", base, i));
                        }
                    }
                }
                None => {
                    if seen_bases.insert(slot.clone()) {
                        layout.push(slot.clone());
                    }
                }
            }
        }
        let positions = layout
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        (layout, positions)
    }
}

/// Replaces every distinct delay term with a fresh input symbol and records
/// the pairing. Identical terms share one slot.
fn wrap_delays(targets: &[Expr]) -> (Vec<Expr>, Vec<(String, Expr)>) {
    let found: RefCell<Vec<(String, Expr)>> = RefCell::new(Vec::new());
    let rewritten: Vec<Expr> = targets
        .iter()
        .map(|target| {
            target.transform(&|node| {
                if node.call_op() != Some(Op::Delay) {
                    return None;
                }
                let mut terms = found.borrow_mut();
                let display = node.to_string();
                let name = match terms.iter().find(|(_, t)| t.to_string() == display) {
                    Some((name, _)) => name.clone(),
                    None => {
                        let name = format!("__delay_{}", terms.len() + 1);
                        terms.push((name.clone(), node.clone()));
                        name
                    }
                };
                Some(Expr::Var(name))
            })
        })
        .collect();
    (rewritten, found.into_inner())
} // end of wrap_delays

//___________________________________TESTS____________________________________
