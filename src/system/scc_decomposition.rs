//! # SCC decomposition and staged problem assembly
//!
//! ## Purpose
//! Partitions a structurally simplified system into strongly connected
//! components of its equation dependency graph, orders the components so each
//! one depends only on earlier ones, and assembles one independently solvable
//! sub-problem per component. Values crossing stage boundaries (solutions of
//! earlier stages and subexpressions free of a stage's own unknowns) are
//! precomputed by per-stage cache writers into shared scratch buffers sized
//! once, per numeric type, for the whole run.
//!
//! ## Main Structures
//! - `SCCNonlinearProblem` - the staged assembly: sub-problems, writers,
//!   buffer plan and parameter layout
//! - `StageProblem` - one component's residual and Jacobian over its subset
//!   of unknowns
//! - `CacheWriter` - fills the stage's cache slots from earlier solutions and
//!   parameters; writer *i* must run before stage *i* is solved
//! - `SplitLayout`/`SplitParams` - segmented parameter buckets grouped by
//!   numeric type
//!
//! ## Usage
//! ```rust, ignore
//! let sys = NonlinearSystem::new("plant", eqs, unknowns, ps)?
//!     .with_split_parameters()
//!     .complete()
//!     .structural_simplify()?;
//! let staged = sys.scc_problem()?;
//! let params = SplitParams::from_map(&staged.layout, &values, "plant")?;
//! let caches = staged.fresh_caches();
//! let mut solutions = Vec::new();
//! for (writer, stage) in staged.writers.iter().zip(&staged.stages) {
//!     writer.write(&solutions, &params, &caches);
//!     solutions.push(solve(stage, &params, &caches));
//! }
//! ```

use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_lambdify::Lambda;
use crate::system::assignment_planner::AssignmentPlan;
use crate::system::equation_system::{NonlinearSystem, VarType};
use crate::system::system_errors::{AssemblyError, PreconditionError, ResolutionError};
use crate::system::tearing::{BipartiteGraph, Matching};
use log::warn;
use nalgebra::{DMatrix, DVector};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

//_____________________________PARAMETER BUCKETS_______________________________

/// Parameter names segmented by numeric type, array bases expanded to their
/// elements. The staged path always works against this layout.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitLayout {
    pub reals: Vec<String>,
    pub integers: Vec<String>,
}

impl SplitLayout {
    pub fn for_system(sys: &NonlinearSystem) -> SplitLayout {
        let mut reals = Vec::new();
        let mut integers = Vec::new();
        for base in sys.parameter_names() {
            let elements: Vec<String> = match sys.array_shape(&base) {
                Some(shape) => (1..=shape).map(|i| format!("{}[{}]", base, i)).collect(),
                None => vec![base.clone()],
            };
            for name in elements {
                match sys.var_type(&name) {
                    VarType::Real => reals.push(name),
                    VarType::Integer => integers.push(name),
                }
            }
        }
        SplitLayout { reals, integers }
    }

    /// Bucket and position of a parameter name.
    pub fn position(&self, name: &str) -> Option<(VarType, usize)> {
        if let Some(i) = self.reals.iter().position(|n| n == name) {
            return Some((VarType::Real, i));
        }
        self.integers
            .iter()
            .position(|n| n == name)
            .map(|i| (VarType::Integer, i))
    }

    pub fn len(&self) -> usize {
        self.reals.len() + self.integers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reals.is_empty() && self.integers.is_empty()
    }
}

/// Parameter values filled in layout order.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitParams {
    pub reals: Vec<f64>,
    pub integers: Vec<f64>,
}

impl SplitParams {
    pub fn empty() -> SplitParams {
        SplitParams {
            reals: vec![],
            integers: vec![],
        }
    }

    pub fn from_map(
        layout: &SplitLayout,
        values: &HashMap<String, f64>,
        system: &str,
    ) -> Result<SplitParams, ResolutionError> {
        let fill = |names: &[String]| -> Result<Vec<f64>, ResolutionError> {
            names
                .iter()
                .map(|name| {
                    values
                        .get(name)
                        .copied()
                        .ok_or_else(|| ResolutionError::UnknownSymbol {
                            symbol: name.clone(),
                            system: system.to_string(),
                        })
                })
                .collect()
        };
        Ok(SplitParams {
            reals: fill(&layout.reals)?,
            integers: fill(&layout.integers)?,
        })
    }
}

//_______________________________CACHE BUFFERS_________________________________

/// Buffer sizes per numeric type: the total slots allocated over all stages,
/// each value keeps its slot for the life of the staged solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheBufferPlan {
    pub real_len: usize,
    pub int_len: usize,
}

/// One precomputed value: its slot symbol and its place in the typed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSlot {
    pub name: String,
    pub vartype: VarType,
    pub index: usize,
}

/// The shared scratch region. Layout is fixed by the plan; stages sharing one
/// instance must respect the writer-before-solve order.
#[derive(Debug)]
pub struct CacheBuffers {
    pub reals: RefCell<Vec<f64>>,
    pub ints: RefCell<Vec<f64>>,
}

impl CacheBuffers {
    pub fn for_plan(plan: &CacheBufferPlan) -> CacheBuffers {
        CacheBuffers {
            reals: RefCell::new(vec![0.0; plan.real_len]),
            ints: RefCell::new(vec![0.0; plan.int_len]),
        }
    }
}

//________________________________STAGE PIECES_________________________________

/// Where one compiled argument slot reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgSource {
    Unknown(usize), // position within the stage's own unknowns
    CacheReal(usize),
    CacheInt(usize),
    ParamReal(usize),
    ParamInt(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterSource {
    Prior { stage: usize, local: usize },
    ParamReal(usize),
    ParamInt(usize),
}

enum WriterValue {
    CopyPrior { stage: usize, local: usize },
    Eval { lambda: Lambda, sources: Vec<WriterSource> },
}

/// Fills stage *i*'s cache slots from earlier solutions and the parameter
/// buckets. `solutions[j]` is the solved vector of stage *j* < *i*.
pub struct CacheWriter {
    pub stage: usize,
    pub slots: Vec<CacheSlot>,
    values: Vec<WriterValue>,
}

impl CacheWriter {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn write(&self, solutions: &[DVector<f64>], params: &SplitParams, caches: &CacheBuffers) {
        let mut reals = caches.reals.borrow_mut();
        let mut ints = caches.ints.borrow_mut();
        for (slot, value) in self.slots.iter().zip(&self.values) {
            let v = match value {
                WriterValue::CopyPrior { stage, local } => solutions[*stage][*local],
                WriterValue::Eval { lambda, sources } => {
                    let args: Vec<f64> = sources
                        .iter()
                        .map(|source| match source {
                            WriterSource::Prior { stage, local } => solutions[*stage][*local],
                            WriterSource::ParamReal(i) => params.reals[*i],
                            WriterSource::ParamInt(i) => params.integers[*i],
                        })
                        .collect();
                    lambda.eval(&args)
                }
            };
            match slot.vartype {
                VarType::Real => reals[slot.index] = v,
                VarType::Integer => ints[slot.index] = v,
            }
        } // end of slot loop
    }
}

/// One component's sub-problem: residual and Jacobian over the stage's subset
/// of unknowns, reading earlier results through the cache.
pub struct StageProblem {
    pub name: String,
    pub eq_indices: Vec<usize>,  // into the flattened residual list
    pub var_indices: Vec<usize>, // into the whole-system unknown order
    pub unknown_names: Vec<String>,
    pub initial_guess: DVector<f64>, // slice of the whole-system initial vector
    pub symbolic: Vec<Expr>,         // residuals with cache slots substituted in
    residual_lambdas: Vec<Lambda>,
    jacobian_lambdas: Vec<Vec<Lambda>>,
    arg_sources: Vec<ArgSource>,
}

impl StageProblem {
    pub fn n_eqs(&self) -> usize {
        self.eq_indices.len()
    }

    pub fn n_vars(&self) -> usize {
        self.var_indices.len()
    }

    fn gather_args(&self, u: &DVector<f64>, params: &SplitParams, caches: &CacheBuffers) -> Vec<f64> {
        let reals = caches.reals.borrow();
        let ints = caches.ints.borrow();
        self.arg_sources
            .iter()
            .map(|source| match source {
                ArgSource::Unknown(i) => u[*i],
                ArgSource::CacheReal(i) => reals[*i],
                ArgSource::CacheInt(i) => ints[*i],
                ArgSource::ParamReal(i) => params.reals[*i],
                ArgSource::ParamInt(i) => params.integers[*i],
            })
            .collect()
    }

    pub fn residual(
        &self,
        u: &DVector<f64>,
        params: &SplitParams,
        caches: &CacheBuffers,
    ) -> DVector<f64> {
        let args = self.gather_args(u, params, caches);
        DVector::from_iterator(
            self.residual_lambdas.len(),
            self.residual_lambdas.iter().map(|l| l.eval(&args)),
        )
    }

    /// In-place variant writing into a caller-owned output vector.
    pub fn residual_into(
        &self,
        out: &mut DVector<f64>,
        u: &DVector<f64>,
        params: &SplitParams,
        caches: &CacheBuffers,
    ) {
        assert_eq!(
            out.len(),
            self.residual_lambdas.len(),
            "output length must match the stage equation count"
        );
        let args = self.gather_args(u, params, caches);
        for (slot, lambda) in out.iter_mut().zip(&self.residual_lambdas) {
            *slot = lambda.eval(&args);
        }
    }

    pub fn jacobian(
        &self,
        u: &DVector<f64>,
        params: &SplitParams,
        caches: &CacheBuffers,
    ) -> DMatrix<f64> {
        let args = self.gather_args(u, params, caches);
        DMatrix::from_fn(self.n_eqs(), self.n_vars(), |i, j| {
            self.jacobian_lambdas[i][j].eval(&args)
        })
    }

    /// In-place variant writing into a caller-owned matrix.
    pub fn jacobian_into(
        &self,
        out: &mut DMatrix<f64>,
        u: &DVector<f64>,
        params: &SplitParams,
        caches: &CacheBuffers,
    ) {
        assert_eq!(
            (out.nrows(), out.ncols()),
            (self.n_eqs(), self.n_vars()),
            "output shape must match the stage dimensions"
        );
        let args = self.gather_args(u, params, caches);
        for i in 0..self.n_eqs() {
            for j in 0..self.n_vars() {
                out[(i, j)] = self.jacobian_lambdas[i][j].eval(&args);
            }
        }
    }
}

/// The staged assembly. The solve invariant is: run `writers[i]`, then solve
/// `stages[i]`, in order; stage *i* reads only earlier outputs through the
/// cache and its own unknowns.
pub struct SCCNonlinearProblem {
    pub system_name: String,
    pub stages: Vec<StageProblem>,
    pub writers: Vec<CacheWriter>,
    pub plan: CacheBufferPlan,
    pub layout: SplitLayout,
}

impl SCCNonlinearProblem {
    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    /// A zeroed buffer set matching the plan. Concurrent solves need one
    /// instance each; the plan itself is shared read-only.
    pub fn fresh_caches(&self) -> CacheBuffers {
        CacheBuffers::for_plan(&self.plan)
    }
}

//_______________________________GRAPH ANALYSIS________________________________

/// Directed dependency graph between equations: an edge f -> e means equation
/// e references the variable matched to f, so f must be solved first.
fn equation_dependency_graph(graph: &BipartiteGraph, matching: &Matching) -> Vec<Vec<usize>> {
    let n = graph.n_eqs();
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    for e in 0..n {
        for &v in &graph.fadjlist[e] {
            if let Some(f) = matching.var_to_eq[v] {
                if f != e && !adj[f].contains(&e) {
                    adj[f].push(e);
                }
            }
        }
    }
    adj
}

/// Iterative Tarjan over an adjacency list; members of each component are
/// returned sorted ascending.
fn strongly_connected_components(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut work: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != usize::MAX {
            continue;
        }
        work.push((root, 0));
        while let Some(frame) = work.last_mut() {
            let v = frame.0;
            if frame.1 == 0 {
                index[v] = next_index;
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if frame.1 < adj[v].len() {
                let w = adj[v][frame.1];
                frame.1 += 1;
                if index[w] == usize::MAX {
                    work.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                work.pop();
                if let Some(parent) = work.last() {
                    let p = parent.0;
                    lowlink[p] = lowlink[p].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
    }
    components
} // end of strongly_connected_components

/// Topological order of the condensation, smallest equation index first among
/// ready components so the stage order is deterministic.
fn condensation_order(components: &[Vec<usize>], adj: &[Vec<usize>]) -> Vec<usize> {
    let n_eqs = adj.len();
    let mut comp_of = vec![0usize; n_eqs];
    for (c, members) in components.iter().enumerate() {
        for &e in members {
            comp_of[e] = c;
        }
    }
    let mut indegree = vec![0usize; components.len()];
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    for (f, targets) in adj.iter().enumerate() {
        for &e in targets {
            let (cf, ce) = (comp_of[f], comp_of[e]);
            if cf != ce && seen.insert((cf, ce)) {
                indegree[ce] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..components.len()).filter(|&c| indegree[c] == 0).collect();
    let mut order = Vec::with_capacity(components.len());
    while !ready.is_empty() {
        ready.sort_by_key(|&c| components[c][0]);
        let c = ready.remove(0);
        order.push(c);
        for &(cf, ce) in &seen {
            if cf == c {
                indegree[ce] -= 1;
                if indegree[ce] == 0 {
                    ready.push(ce);
                }
            }
        }
    }
    order
} // end of condensation_order

//_________________________________ASSEMBLY____________________________________

/// Running allocation of cache slots, shared across stages so a value cached
/// once is reused by every later stage needing it.
struct SlotAllocator {
    by_display: HashMap<String, String>,
    slot_info: HashMap<String, (VarType, usize)>,
    real_len: usize,
    int_len: usize,
}

impl SlotAllocator {
    fn new() -> SlotAllocator {
        SlotAllocator {
            by_display: HashMap::new(),
            slot_info: HashMap::new(),
            real_len: 0,
            int_len: 0,
        }
    }

    /// Slot name for a cached value keyed by its display form; the bool says
    /// whether the slot is fresh and needs a writer entry.
    fn allocate(&mut self, display: &str, vartype: VarType) -> (String, bool) {
        if let Some(name) = self.by_display.get(display) {
            return (name.clone(), false);
        }
        let (name, index) = match vartype {
            VarType::Real => {
                let i = self.real_len;
                self.real_len += 1;
                (format!("__cache_r_{}", i), i)
            }
            VarType::Integer => {
                let i = self.int_len;
                self.int_len += 1;
                (format!("__cache_i_{}", i), i)
            }
        };
        self.by_display.insert(display.to_string(), name.clone());
        self.slot_info.insert(name.clone(), (vartype, index));
        (name, true)
    }
}

impl NonlinearSystem {
    /// Assembles the staged problem described by the tearing state. Degenerate
    /// decompositions (one component, or no perfect matching) fall back to a
    /// single joint stage with a warning rather than an error.
    pub fn scc_problem(&self) -> Result<SCCNonlinearProblem, AssemblyError> {
        let requested = "an SCC-staged problem".to_string();
        if !self.is_complete {
            return Err(PreconditionError::NotComplete {
                system: self.name.clone(),
                requested,
            }
            .into());
        }
        let Some(state) = self.tearing_state() else {
            return Err(PreconditionError::NotSimplified {
                system: self.name.clone(),
                requested,
            }
            .into());
        };
        if !self.split {
            return Err(PreconditionError::NotSplit {
                system: self.name.clone(),
                requested,
            }
            .into());
        }

        let names = self.unknown_names();
        let targets = self.full_equations();
        let plan = AssignmentPlan::for_targets(self, &targets)?;
        let inlined: Vec<Expr> = targets.iter().map(|t| plan.inline(t)).collect();
        let layout = SplitLayout::for_system(self);
        let n_eqs = inlined.len();

        let stages: Vec<(Vec<usize>, Vec<usize>)> = if !state.matching.is_perfect() {
            warn!(
                "system '{}' has no perfect equation/variable matching, staged decomposition degenerates to the joint problem",
                self.name
            );
            vec![((0..n_eqs).collect(), (0..names.len()).collect())]
        } else {
            let adj = equation_dependency_graph(&state.graph, &state.matching);
            let components = strongly_connected_components(&adj);
            if components.len() <= 1 {
                warn!(
                    "system '{}' forms a single strongly connected component, staged decomposition degenerates to the joint problem",
                    self.name
                );
                vec![((0..n_eqs).collect(), (0..names.len()).collect())]
            } else {
                let order = condensation_order(&components, &adj);
                order
                    .into_iter()
                    .map(|c| {
                        let eqs = components[c].clone();
                        let mut vars: Vec<usize> = Vec::with_capacity(eqs.len());
                        for &e in &eqs {
                            if let Some(v) = state.matching.eq_to_var[e] {
                                vars.push(v);
                            }
                        }
                        vars.sort_unstable();
                        (eqs, vars)
                    })
                    .collect()
            }
        };

        self.assemble_stages(stages, &names, &inlined, layout)
    } // end of scc_problem

    fn assemble_stages(
        &self,
        stage_indices: Vec<(Vec<usize>, Vec<usize>)>,
        names: &[String],
        inlined: &[Expr],
        layout: SplitLayout,
    ) -> Result<SCCNonlinearProblem, AssemblyError> {
        let init = self.initial_vector();
        let allocator = RefCell::new(SlotAllocator::new());
        // prior unknown name -> (stage, position within that stage)
        let mut prior: HashMap<String, (usize, usize)> = HashMap::new();
        let mut stages: Vec<StageProblem> = Vec::with_capacity(stage_indices.len());
        let mut writers: Vec<CacheWriter> = Vec::with_capacity(stage_indices.len());

        for (stage_no, (eq_indices, var_indices)) in stage_indices.into_iter().enumerate() {
            let unknown_names: Vec<String> =
                var_indices.iter().map(|&v| names[v].clone()).collect();
            let own: HashSet<String> = unknown_names.iter().cloned().collect();
            let writer_state: RefCell<(Vec<CacheSlot>, Vec<WriterValue>)> =
                RefCell::new((Vec::new(), Vec::new()));
            let failure: RefCell<Option<ResolutionError>> = RefCell::new(None);

            let writer_sources = |free: &[String]| -> Result<Vec<WriterSource>, ResolutionError> {
                free.iter()
                    .map(|sym| {
                        if let Some(&(stage, local)) = prior.get(sym) {
                            return Ok(WriterSource::Prior { stage, local });
                        }
                        match layout.position(sym) {
                            Some((VarType::Real, i)) => Ok(WriterSource::ParamReal(i)),
                            Some((VarType::Integer, i)) => Ok(WriterSource::ParamInt(i)),
                            None => Err(ResolutionError::UnknownSymbol {
                                symbol: sym.clone(),
                                system: self.name.clone(),
                            }),
                        }
                    })
                    .collect()
            };

            let symbolic: Vec<Expr> = eq_indices
                .iter()
                .map(|&e| {
                    inlined[e].transform(&|node| {
                        if failure.borrow().is_some() {
                            return None;
                        }
                        // earlier solutions enter through the cache
                        if let Some(name) = node.canonical_name() {
                            if let Some(&(stage, local)) = prior.get(&name) {
                                let vartype = self.var_type(&name);
                                let (slot, fresh) =
                                    allocator.borrow_mut().allocate(&name, vartype);
                                if fresh {
                                    let index = allocator.borrow().slot_info[&slot].1;
                                    let mut w = writer_state.borrow_mut();
                                    w.0.push(CacheSlot {
                                        name: slot.clone(),
                                        vartype,
                                        index,
                                    });
                                    w.1.push(WriterValue::CopyPrior { stage, local });
                                }
                                return Some(Expr::Var(slot));
                            }
                            return None;
                        }
                        // subexpressions free of the stage's own unknowns are
                        // precomputable, the outermost qualifying node wins
                        if let Expr::Call(_, _) = node {
                            let free = node.all_arguments_are_variables();
                            let cacheable = !free.is_empty()
                                && free.iter().all(|s| {
                                    !own.contains(s)
                                        && (prior.contains_key(s)
                                            || layout.position(s).is_some())
                                });
                            if cacheable {
                                let display = node.to_string();
                                let (slot, fresh) =
                                    allocator.borrow_mut().allocate(&display, VarType::Real);
                                if fresh {
                                    match writer_sources(&free) {
                                        Ok(sources) => {
                                            let refs: Vec<&str> =
                                                free.iter().map(|s| s.as_str()).collect();
                                            let index =
                                                allocator.borrow().slot_info[&slot].1;
                                            let mut w = writer_state.borrow_mut();
                                            w.0.push(CacheSlot {
                                                name: slot.clone(),
                                                vartype: VarType::Real,
                                                index,
                                            });
                                            w.1.push(WriterValue::Eval {
                                                lambda: node.compile(&refs),
                                                sources,
                                            });
                                        }
                                        Err(err) => {
                                            *failure.borrow_mut() = Some(err);
                                            return None;
                                        }
                                    }
                                }
                                return Some(Expr::Var(slot));
                            }
                        }
                        None
                    })
                })
                .collect();
            if let Some(err) = failure.into_inner() {
                return Err(err.into());
            }
            let (slots, values) = writer_state.into_inner();

            // argument order: own unknowns, then cache slots, then parameters
            let mut referenced: HashSet<String> = HashSet::new();
            for expr in &symbolic {
                referenced.extend(expr.all_arguments_are_variables());
            }
            let mut slot_names: Vec<String> = unknown_names.clone();
            let mut arg_sources: Vec<ArgSource> =
                (0..unknown_names.len()).map(ArgSource::Unknown).collect();
            {
                let alloc = allocator.borrow();
                let mut cached: Vec<(&String, &(VarType, usize))> = alloc
                    .slot_info
                    .iter()
                    .filter(|(name, _)| referenced.contains(*name))
                    .collect();
                cached.sort_by_key(|entry| *entry.1);
                for (name, &(vartype, index)) in cached {
                    slot_names.push(name.clone());
                    arg_sources.push(match vartype {
                        VarType::Real => ArgSource::CacheReal(index),
                        VarType::Integer => ArgSource::CacheInt(index),
                    });
                }
            }
            for (i, name) in layout.reals.iter().enumerate() {
                if referenced.contains(name) {
                    slot_names.push(name.clone());
                    arg_sources.push(ArgSource::ParamReal(i));
                }
            }
            for (i, name) in layout.integers.iter().enumerate() {
                if referenced.contains(name) {
                    slot_names.push(name.clone());
                    arg_sources.push(ArgSource::ParamInt(i));
                }
            }
            let refs: Vec<&str> = slot_names.iter().map(|s| s.as_str()).collect();

            let residual_lambdas: Vec<Lambda> =
                symbolic.iter().map(|e| e.compile(&refs)).collect();
            let jacobian_lambdas: Vec<Vec<Lambda>> = symbolic
                .iter()
                .map(|e| {
                    unknown_names
                        .iter()
                        .map(|name| e.diff(name).simplify_().compile(&refs))
                        .collect()
                })
                .collect();

            let initial_guess =
                DVector::from_iterator(var_indices.len(), var_indices.iter().map(|&v| init[v]));

            for (local, &v) in var_indices.iter().enumerate() {
                prior.insert(names[v].clone(), (stage_no, local));
            }
            writers.push(CacheWriter {
                stage: stage_no,
                slots,
                values,
            });
            stages.push(StageProblem {
                name: format!("{}.stage_{}", self.name, stage_no + 1),
                eq_indices,
                var_indices,
                unknown_names,
                initial_guess,
                symbolic,
                residual_lambdas,
                jacobian_lambdas,
                arg_sources,
            });
        } // end of stage loop

        let alloc = allocator.into_inner();
        Ok(SCCNonlinearProblem {
            system_name: self.name.clone(),
            stages,
            writers,
            plan: CacheBufferPlan {
                real_len: alloc.real_len,
                int_len: alloc.int_len,
            },
            layout,
        })
    } // end of assemble_stages
}

//___________________________________TESTS____________________________________

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols;
    use crate::system::equation_system::{Equation, Variable};
    use approx::assert_abs_diff_eq;

    fn staged_ready(
        eqs: Vec<Equation>,
        unknowns: Vec<Expr>,
        ps: Vec<Expr>,
    ) -> NonlinearSystem {
        NonlinearSystem::new("plant", eqs, unknowns, ps)
            .unwrap()
            .with_split_parameters()
            .complete()
            .structural_simplify()
            .unwrap()
    }

    fn newton(stage: &StageProblem, params: &SplitParams, caches: &CacheBuffers) -> DVector<f64> {
        let mut u = stage.initial_guess.clone();
        for _ in 0..50 {
            let r = stage.residual(&u, params, caches);
            let j = stage.jacobian(&u, params, caches);
            let delta = j.lu().solve(&r).unwrap();
            u -= delta;
        }
        u
    }

    #[test]
    fn test_tarjan_finds_the_cycle() {
        // 0 <-> 1 form a component, 2 is alone downstream
        let adj = vec![vec![1], vec![0, 2], vec![]];
        let mut components = strongly_connected_components(&adj);
        components.sort_by_key(|c| c[0]);
        assert_eq!(components, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_condensation_order_is_deterministic() {
        let adj = vec![vec![1, 2], vec![], vec![]];
        let components = vec![vec![0], vec![1], vec![2]];
        assert_eq!(condensation_order(&components, &adj), vec![0, 1, 2]);
    }

    #[test]
    fn test_two_stage_decomposition() {
        let (x, y) = symbols!(x, y);
        let sys = staged_ready(
            vec![
                Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
                Equation::from_residual(y.clone() - x.clone()),
            ],
            vec![x, y],
            vec![],
        );
        let staged = sys.scc_problem().unwrap();
        assert_eq!(staged.n_stages(), 2);
        assert_eq!(staged.stages[0].unknown_names, vec!["x"]);
        assert_eq!(staged.stages[1].unknown_names, vec!["y"]);
        assert_eq!(staged.stages[0].eq_indices, vec![0]);
        assert_eq!(staged.stages[1].eq_indices, vec![1]);
        // the second stage reads x through the cache
        assert!(staged.writers[0].is_empty());
        assert_eq!(staged.writers[1].slots.len(), 1);
        assert_eq!(staged.writers[1].slots[0].name, "__cache_r_0");
        assert!(staged.stages[1].symbolic[0].to_string().contains("__cache_r_0"));
        assert_eq!(staged.plan.real_len, 1);
        assert_eq!(staged.plan.int_len, 0);
    }

    #[test]
    fn test_staged_solve_matches_the_joint_solve() {
        let (x, y) = symbols!(x, y);
        let eqs = vec![
            Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
            Equation::from_residual(y.clone() - x.clone()),
        ];
        let sys = staged_ready(eqs.clone(), vec![x.clone(), y.clone()], vec![])
            .with_guesses(vec![(x.clone(), 2.0), (y.clone(), 2.0)]);
        let staged = sys.scc_problem().unwrap();

        let params = SplitParams::empty();
        let caches = staged.fresh_caches();
        let mut solutions: Vec<DVector<f64>> = Vec::new();
        for (writer, stage) in staged.writers.iter().zip(&staged.stages) {
            writer.write(&solutions, &params, &caches);
            solutions.push(newton(stage, &params, &caches));
        }
        let mut full = vec![0.0; 2];
        for (stage, solution) in staged.stages.iter().zip(&solutions) {
            for (&v, value) in stage.var_indices.iter().zip(solution.iter()) {
                full[v] = *value;
            }
        }

        // joint solve of the same system
        let mut joint_sys = NonlinearSystem::new("joint", eqs, vec![x.clone(), y.clone()], vec![])
            .unwrap()
            .with_guesses(vec![(x, 2.0), (y, 2.0)]);
        let residual = joint_sys.generate_residual(&HashMap::new()).unwrap();
        let jacobian = joint_sys.generate_jacobian(&HashMap::new(), true).unwrap();
        let mut u = joint_sys.initial_vector();
        for _ in 0..50 {
            let r = (residual.function)(&u);
            let j = (jacobian.dense)(&u);
            let delta = j.lu().solve(&r).unwrap();
            u -= delta;
        }

        assert_abs_diff_eq!(full[0], u[0], epsilon = 1e-10);
        assert_abs_diff_eq!(full[1], u[1], epsilon = 1e-10);
        assert_abs_diff_eq!(full[0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(full[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_single_component_degenerates_with_one_stage() {
        let (x, y) = symbols!(x, y);
        let sys = staged_ready(
            vec![
                Equation::from_residual(x.clone() + y.clone() - Expr::Const(3.0)),
                Equation::from_residual(x.clone() - y.clone() - Expr::Const(1.0)),
            ],
            vec![x, y],
            vec![],
        );
        let staged = sys.scc_problem().unwrap();
        assert_eq!(staged.n_stages(), 1);
        assert_eq!(staged.stages[0].unknown_names, vec!["x", "y"]);
        assert!(staged.writers[0].is_empty());
        assert_eq!(staged.plan, CacheBufferPlan::default());

        // the joint residual is the plain one
        let params = SplitParams::empty();
        let caches = staged.fresh_caches();
        let u = DVector::from_vec(vec![2.0, 1.0]);
        let r = staged.stages[0].residual(&u, &params, &caches);
        assert_eq!(r.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_precondition_gates() {
        let x = Expr::Var("x".to_string());
        let eq = Equation::from_residual(x.clone() * x.clone() - Expr::Const(4.0));

        let not_simplified = NonlinearSystem::new("plant", vec![eq.clone()], vec![x.clone()], vec![])
            .unwrap()
            .with_split_parameters()
            .complete();
        assert!(matches!(
            not_simplified.scc_problem(),
            Err(AssemblyError::Precondition(PreconditionError::NotSimplified { .. }))
        ));

        let not_split = NonlinearSystem::new("plant", vec![eq.clone()], vec![x.clone()], vec![])
            .unwrap()
            .complete()
            .structural_simplify()
            .unwrap();
        assert!(matches!(
            not_split.scc_problem(),
            Err(AssemblyError::Precondition(PreconditionError::NotSplit { .. }))
        ));

        let not_complete = NonlinearSystem::new("plant", vec![eq], vec![x], vec![]).unwrap();
        assert!(matches!(
            not_complete.scc_problem(),
            Err(AssemblyError::Precondition(PreconditionError::NotComplete { .. }))
        ));
    }

    #[test]
    fn test_integer_unknowns_use_the_integer_buffer() {
        let (n, y) = symbols!(n, y);
        let sys = NonlinearSystem::new(
            "plant",
            vec![
                Equation::from_residual(n.clone() - Expr::Const(2.0)),
                Equation::from_residual(y.clone() - n.clone()),
            ],
            vec![n, y],
            vec![],
        )
        .unwrap()
        .with_variables(vec![Variable::new("n").integer()])
        .with_split_parameters()
        .complete()
        .structural_simplify()
        .unwrap();
        let staged = sys.scc_problem().unwrap();
        assert_eq!(staged.n_stages(), 2);
        assert_eq!(staged.plan.int_len, 1);
        assert_eq!(staged.plan.real_len, 0);
        assert_eq!(staged.writers[1].slots[0].name, "__cache_i_0");
        assert_eq!(staged.writers[1].slots[0].vartype, VarType::Integer);
    }

    #[test]
    fn test_parameter_subexpressions_are_precomputed_once() {
        let (x, y, z, k) = symbols!(x, y, z, k);
        let shared = Expr::exp(k.clone()) * x.clone();
        let sys = staged_ready(
            vec![
                Equation::from_residual(x.clone() - Expr::Const(2.0)),
                Equation::from_residual(y.clone() - shared.clone()),
                Equation::from_residual(z.clone() - shared),
            ],
            vec![x, y, z],
            vec![k],
        );
        let staged = sys.scc_problem().unwrap();
        assert_eq!(staged.n_stages(), 3);
        assert_eq!(staged.layout.reals, vec!["k"]);

        // exp(k)*x is free of stage 2's unknowns, cached once, reused by stage 3
        assert_eq!(staged.writers[1].slots.len(), 1);
        assert!(staged.writers[2].is_empty());
        assert_eq!(staged.plan.real_len, 1);
        assert!(staged.stages[1].symbolic[0].to_string().contains("__cache_r_0"));
        assert!(staged.stages[2].symbolic[0].to_string().contains("__cache_r_0"));

        let params =
            SplitParams::from_map(&staged.layout, &HashMap::from([("k".to_string(), 1.0)]), "plant")
                .unwrap();
        let caches = staged.fresh_caches();
        let mut solutions: Vec<DVector<f64>> = Vec::new();
        for (writer, stage) in staged.writers.iter().zip(&staged.stages) {
            writer.write(&solutions, &params, &caches);
            solutions.push(newton(stage, &params, &caches));
        }
        let expected = 2.0 * std::f64::consts::E;
        assert_abs_diff_eq!(solutions[1][0], expected, epsilon = 1e-9);
        assert_abs_diff_eq!(solutions[2][0], expected, epsilon = 1e-9);
    }

    #[test]
    fn test_split_params_from_map_reports_missing_names() {
        let layout = SplitLayout {
            reals: vec!["k".to_string()],
            integers: vec![],
        };
        let err = SplitParams::from_map(&layout, &HashMap::new(), "plant").unwrap_err();
        assert!(err.to_string().contains("k"));
    }

    #[test]
    fn test_in_place_variants_match() {
        let (x, y) = symbols!(x, y);
        let sys = staged_ready(
            vec![
                Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
                Equation::from_residual(y.clone() - x.clone()),
            ],
            vec![x, y],
            vec![],
        );
        let staged = sys.scc_problem().unwrap();
        let params = SplitParams::empty();
        let caches = staged.fresh_caches();
        let stage = &staged.stages[0];
        let u = DVector::from_vec(vec![3.0]);

        let r = stage.residual(&u, &params, &caches);
        let mut r_out = DVector::zeros(1);
        stage.residual_into(&mut r_out, &u, &params, &caches);
        assert_eq!(r, r_out);

        let j = stage.jacobian(&u, &params, &caches);
        let mut j_out = DMatrix::zeros(1, 1);
        stage.jacobian_into(&mut j_out, &u, &params, &caches);
        assert_eq!(j, j_out);
    }
}
