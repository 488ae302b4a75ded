//! # Equation system container
//!
//! ## Purpose
//! The central data structure of the modeling layer: a named, identity-tagged
//! collection of symbolic equations, unknowns and parameters, together with
//! everything a solver needs around them - observed (eliminated) variables,
//! defaults and initial guesses, derived-parameter equations, nested
//! sub-systems and lazily computed symbolic Jacobians/Hessians.
//!
//! ## Main Structures
//! - `Equation` - an `lhs = rhs` pair with residual normalization
//! - `Variable` - a registry entry carrying shape, defaults, guess, type
//!   annotation and scope for one symbolic handle
//! - `TagGenerator` - atomic counter handing out system identity tags
//! - `NonlinearSystem` - the container itself; construction validates, later
//!   phases only fill the designated cache fields
//!
//! ## Usage
//! ```rust, ignore
//! let (x, y) = symbols!(x, y);
//! let eqs = vec![
//!     Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
//!     Equation::from_residual(y.clone() - x.clone()),
//! ];
//! let sys = NonlinearSystem::new("plant", eqs, vec![x, y], vec![])?.complete();
//! let jac = sys.calculate_jacobian(false, true);
//! ```

use crate::symbolic::symbolic_engine::Expr;
use crate::symbolic::symbolic_engine::Op;
use crate::system::system_errors::{ConstructionError, ResolutionError};
use crate::system::tearing::TearingState;
use itertools::Itertools;
use nalgebra::DVector;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

//_________________________________EQUATION_____________________________________

/// An ordered pair of symbolic expressions, read `lhs = rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Equation {
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        if let (Expr::Array(l), Expr::Array(r)) = (&lhs, &rhs) {
            assert_eq!(
                l.len(),
                r.len(),
                "array equation sides must have the same length"
            );
        }
        Equation { lhs, rhs }
    }

    /// Residual-form equation `0 = rhs`.
    pub fn from_residual(rhs: Expr) -> Self {
        Equation {
            lhs: Expr::Const(0.0),
            rhs,
        }
    }

    /// Scalar residual expressions of this equation.
    ///
    /// Normalized to `rhs - lhs`, except a zero left side keeps `rhs` as is
    /// and a whole-array equation keeps its elementwise pairing.
    pub fn residuals(&self) -> Vec<Expr> {
        match (&self.lhs, &self.rhs) {
            (Expr::Array(l), Expr::Array(r)) => l
                .iter()
                .zip(r.iter())
                .map(|(li, ri)| {
                    if li.is_zero() {
                        ri.clone()
                    } else {
                        ri.clone() - li.clone()
                    }
                })
                .collect(),
            (l, _) if l.is_zero() => vec![self.rhs.clone()],
            _ => vec![self.rhs.clone() - self.lhs.clone()],
        }
    }

    /// Canonical name on the left side, for observed and dependency equations.
    pub fn lhs_name(&self) -> Option<String> {
        self.lhs.canonical_name()
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.lhs, self.rhs)
    }
}

//_________________________________VARIABLE_____________________________________

/// Numeric element type of a variable, drives cache-buffer grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarType {
    Real,
    Integer,
}

/// Namespacing behaviour under flatten: Local names get the `child.` prefix,
/// Global names never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarScope {
    Local,
    Global,
}

/// Registry entry for one symbolic handle. Compared and hashed by canonical
/// name, so a handle built twice is the same variable.
#[derive(Debug, Clone)]
pub struct Variable {
    pub symbol: Expr,
    pub name: String,
    pub shape: Option<usize>, // array length for aggregate handles
    pub default: Option<Expr>,
    pub guess: Option<f64>,
    pub vartype: VarType,
    pub scope: VarScope,
}

impl Variable {
    pub fn new(name: &str) -> Self {
        Variable {
            symbol: Expr::from_canonical_name(name),
            name: name.to_string(),
            shape: None,
            default: None,
            guess: None,
            vartype: VarType::Real,
            scope: VarScope::Local,
        }
    }

    /// Aggregate array handle; elements are addressed as `name[1]..name[len]`.
    pub fn array(name: &str, len: usize) -> Self {
        let mut var = Variable::new(name);
        var.shape = Some(len);
        var
    }

    pub fn with_default(mut self, value: f64) -> Self {
        self.default = Some(Expr::Const(value));
        self
    }

    pub fn with_symbolic_default(mut self, value: Expr) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_guess(mut self, guess: f64) -> Self {
        self.guess = Some(guess);
        self
    }

    pub fn integer(mut self) -> Self {
        self.vartype = VarType::Integer;
        self
    }

    pub fn global_scope(mut self) -> Self {
        self.scope = VarScope::Global;
        self
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Variable {}
impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// How a symbol participates in a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    Unknown,
    Parameter,
    Observed,
    DerivedParameter,
}

//_______________________________IDENTITY TAGS__________________________________

/// Monotonic counter for system identity tags. The process-wide instance
/// backs ordinary construction; tests inject their own for determinism.
#[derive(Debug)]
pub struct TagGenerator {
    counter: AtomicUsize,
}

impl TagGenerator {
    pub const fn new() -> Self {
        TagGenerator {
            counter: AtomicUsize::new(1),
        }
    }

    pub fn next_tag(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// The process-wide tag counter. Tags are read-only after assignment, so the
/// atomic increment is the only synchronization needed.
pub static PROCESS_TAGS: TagGenerator = TagGenerator::new();

//_____________________________SYSTEM CONTAINER_________________________________

#[derive(Debug, Clone)]
pub(crate) struct MatrixCache {
    pub key: (bool, bool), // (sparse, simplify)
    pub matrix: Rc<Vec<Vec<Expr>>>,
}

#[derive(Debug, Clone)]
pub(crate) struct TensorCache {
    pub key: (bool, bool),
    pub tensors: Rc<Vec<Vec<Vec<Expr>>>>,
}

/// A named system of nonlinear equations.
///
/// Core fields (`eqs`, `unknowns`, `ps`, `observed`, ...) are fixed at
/// construction; `calculate_jacobian`/`calculate_hessian` fill only the cache
/// cells, and structural changes (flatten, tearing, split parameters) hand
/// back a new value instead of mutating in place.
#[derive(Debug, Clone)]
pub struct NonlinearSystem {
    pub name: String,
    pub tag: usize, // identity tag, unique per construction
    pub eqs: Vec<Equation>,
    pub unknowns: Vec<Expr>, // ordered, unique by canonical name
    pub ps: Vec<Expr>,       // ordered parameters
    pub observed: Vec<Equation>, // eliminated variables, lhs is a single non-unknown variable
    pub defaults: HashMap<String, Expr>,
    pub guesses: HashMap<String, f64>,
    pub parameter_dependencies: Vec<Equation>, // topologically ordered
    pub systems: Vec<NonlinearSystem>,         // nested sub-systems
    pub is_complete: bool,
    pub split: bool, // segmented parameter representation requested
    pub(crate) name_index: HashMap<String, Expr>,
    pub(crate) variables: HashMap<String, Variable>,
    pub(crate) jacobian_cache: Option<MatrixCache>,
    pub(crate) hessian_cache: Option<TensorCache>,
    pub(crate) tearing: Option<TearingState>,
}

impl NonlinearSystem {
    ////////////////////////////CONSTRUCTION///////////////////////////////////

    pub fn new(
        name: &str,
        eqs: Vec<Equation>,
        unknowns: Vec<Expr>,
        ps: Vec<Expr>,
    ) -> Result<Self, ConstructionError> {
        Self::new_with_tags(name, eqs, unknowns, ps, &PROCESS_TAGS)
    }

    /// Construction with an injected tag generator, for deterministic tests.
    pub fn new_with_tags(
        name: &str,
        eqs: Vec<Equation>,
        unknowns: Vec<Expr>,
        ps: Vec<Expr>,
        tags: &TagGenerator,
    ) -> Result<Self, ConstructionError> {
        if name.trim().is_empty() {
            return Err(ConstructionError::MissingName);
        }
        let unknowns: Vec<Expr> = unknowns
            .into_iter()
            .unique_by(|u| Self::handle_name(u))
            .collect();
        Self::check_array_parameter_coverage(name, &eqs, &unknowns, &ps)?;
        let mut sys = NonlinearSystem {
            name: name.to_string(),
            tag: tags.next_tag(),
            eqs,
            unknowns,
            ps,
            observed: Vec::new(),
            defaults: HashMap::new(),
            guesses: HashMap::new(),
            parameter_dependencies: Vec::new(),
            systems: Vec::new(),
            is_complete: false,
            split: false,
            name_index: HashMap::new(),
            variables: HashMap::new(),
            jacobian_cache: None,
            hessian_cache: None,
            tearing: None,
        };
        sys.build_name_index();
        Ok(sys)
    }

    /// Construction with automatic parameter inference: every symbol referenced
    /// by the equations that is not a declared unknown becomes a parameter,
    /// ordered by first referencing equation.
    pub fn from_equations(
        name: &str,
        eqs: Vec<Equation>,
        unknowns: Vec<Expr>,
    ) -> Result<Self, ConstructionError> {
        let unknown_names: HashSet<String> =
            unknowns.iter().map(|u| Self::handle_name(u)).collect();
        let mut ps: Vec<Expr> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for eq in &eqs {
            for side in [&eq.lhs, &eq.rhs] {
                for sym in side.all_arguments_are_variables() {
                    if !unknown_names.contains(&sym) && seen.insert(sym.clone()) {
                        ps.push(Expr::from_canonical_name(&sym));
                    }
                }
            }
        }
        Self::new(name, eqs, unknowns, ps)
    }

    fn handle_name(handle: &Expr) -> String {
        handle
            .canonical_name()
            .unwrap_or_else(|| handle.to_string())
    }

    /// Element references of array parameters must be covered wholly: if some
    /// referenced elements of a base are declared parameters and others are
    /// not, membership of the base is ambiguous.
    fn check_array_parameter_coverage(
        name: &str,
        eqs: &[Equation],
        unknowns: &[Expr],
        ps: &[Expr],
    ) -> Result<(), ConstructionError> {
        let unknown_names: HashSet<String> =
            unknowns.iter().map(|u| Self::handle_name(u)).collect();
        let ps_names: HashSet<String> = ps.iter().map(|p| Self::handle_name(p)).collect();

        let mut referenced: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for eq in eqs {
            for side in [&eq.lhs, &eq.rhs] {
                side.visit(&mut |node| {
                    if let Some((base, index)) = node.as_index() {
                        referenced.entry(base).or_default().insert(index);
                    }
                });
            }
        }

        for (base, indices) in referenced {
            // the whole array declared as one aggregate handle covers everything
            if ps_names.contains(&base) {
                continue;
            }
            let candidates: Vec<usize> = indices
                .iter()
                .copied()
                .filter(|i| !unknown_names.contains(&format!("{}[{}]", base, i)))
                .collect();
            let present: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|i| ps_names.contains(&format!("{}[{}]", base, i)))
                .collect();
            if !present.is_empty() && present.len() != candidates.len() {
                let missing: Vec<usize> = candidates
                    .iter()
                    .copied()
                    .filter(|i| !ps_names.contains(&format!("{}[{}]", base, i)))
                    .collect();
                return Err(ConstructionError::PartialArrayParameter {
                    base,
                    system: name.to_string(),
                    present,
                    missing,
                });
            }
        }
        Ok(())
    }

    fn build_name_index(&mut self) {
        let mut index: HashMap<String, Expr> = HashMap::new();
        let handles = self
            .unknowns
            .iter()
            .chain(self.ps.iter())
            .cloned()
            .chain(self.observed.iter().map(|eq| eq.lhs.clone()))
            .chain(self.parameter_dependencies.iter().map(|eq| eq.lhs.clone()));
        for handle in handles {
            let name = Self::handle_name(&handle);
            // element handles also register their aggregate base
            if let Some((base, _)) = handle.as_index() {
                index
                    .entry(base.clone())
                    .or_insert_with(|| Expr::Var(base));
            }
            index.insert(name, handle);
        }
        self.name_index = index;
    }

    ////////////////////////////BUILDERS///////////////////////////////////////

    /// Attaches nested sub-systems; names must be pairwise unique.
    pub fn with_systems(
        mut self,
        systems: Vec<NonlinearSystem>,
    ) -> Result<Self, ConstructionError> {
        let mut seen: HashSet<String> = self.systems.iter().map(|s| s.name.clone()).collect();
        for sub in &systems {
            if !seen.insert(sub.name.clone()) {
                return Err(ConstructionError::DuplicateSubsystemName {
                    name: sub.name.clone(),
                    parent: self.name.clone(),
                });
            }
        }
        self.systems.extend(systems);
        Ok(self)
    }

    /// Attaches observed equations: explicit definitions of eliminated
    /// variables, each left side a single variable that is not an unknown.
    pub fn with_observed(mut self, observed: Vec<Equation>) -> Result<Self, ConstructionError> {
        let unknown_names: HashSet<String> = self.unknown_names().into_iter().collect();
        for eq in &observed {
            let lhs_name = eq.lhs_name().ok_or_else(|| {
                ConstructionError::ObservedLhsNotVariable {
                    lhs: eq.lhs.to_string(),
                    system: self.name.clone(),
                }
            })?;
            if unknown_names.contains(&lhs_name) {
                return Err(ConstructionError::ObservedLhsIsUnknown {
                    lhs: lhs_name,
                    system: self.name.clone(),
                });
            }
        }
        self.observed.extend(observed);
        self.build_name_index();
        Ok(self)
    }

    pub fn with_defaults(mut self, defaults: Vec<(Expr, Expr)>) -> Self {
        for (var, value) in defaults {
            self.defaults.insert(Self::handle_name(&var), value);
        }
        self
    }

    pub fn with_guesses(mut self, guesses: Vec<(Expr, f64)>) -> Self {
        for (var, value) in guesses {
            self.guesses.insert(Self::handle_name(&var), value);
        }
        self
    }

    /// Registers variable metadata and merges its default/guess entries.
    pub fn with_variables(mut self, variables: Vec<Variable>) -> Self {
        for var in variables {
            if let Some(default) = &var.default {
                self.defaults.insert(var.name.clone(), default.clone());
            }
            if let Some(guess) = var.guess {
                self.guesses.insert(var.name.clone(), guess);
            }
            self.variables.insert(var.name.clone(), var);
        }
        self
    }

    /// Attaches derived-parameter equations and orders them topologically;
    /// a dependency cycle is a construction error naming the participants.
    pub fn with_parameter_dependencies(
        mut self,
        deps: Vec<Equation>,
    ) -> Result<Self, ConstructionError> {
        let mut lhs_names: Vec<String> = Vec::with_capacity(deps.len());
        for eq in &deps {
            let lhs = eq.lhs_name().ok_or_else(|| {
                ConstructionError::MalformedParameterDependency {
                    lhs: eq.lhs.to_string(),
                    system: self.name.clone(),
                    reason: "not a single parameter".to_string(),
                }
            })?;
            if lhs_names.contains(&lhs) {
                return Err(ConstructionError::MalformedParameterDependency {
                    lhs,
                    system: self.name.clone(),
                    reason: "defined twice".to_string(),
                });
            }
            if eq.rhs.contains_variable(&lhs) {
                return Err(ConstructionError::CyclicParameterDependencies {
                    system: self.name.clone(),
                    participants: vec![lhs],
                });
            }
            lhs_names.push(lhs);
        }

        let ordered = Self::toposort_dependencies(&self.name, deps, &lhs_names)?;
        self.parameter_dependencies.extend(ordered);
        self.build_name_index();
        Ok(self)
    }

    /// Kahn ordering over the dependency graph; ready nodes are taken in
    /// declaration order so the result is deterministic.
    fn toposort_dependencies(
        sys_name: &str,
        deps: Vec<Equation>,
        lhs_names: &[String],
    ) -> Result<Vec<Equation>, ConstructionError> {
        let n = deps.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for j in 0..n {
            for i in 0..n {
                if i != j && deps[j].rhs.contains_variable(&lhs_names[i]) {
                    dependents[i].push(j);
                    indegree[j] += 1;
                }
            }
        }
        let mut ready: Vec<usize> = (0..n).filter(|&k| indegree[k] == 0).collect();
        let mut order: Vec<usize> = Vec::with_capacity(n);
        while !ready.is_empty() {
            let k = ready.remove(0);
            order.push(k);
            for &d in &dependents[k] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.push(d);
                }
            }
            ready.sort_unstable();
        }
        if order.len() != n {
            let stuck: Vec<String> = (0..n)
                .filter(|k| !order.contains(k))
                .map(|k| lhs_names[k].clone())
                .collect();
            return Err(ConstructionError::CyclicParameterDependencies {
                system: sys_name.to_string(),
                participants: stuck,
            });
        }
        Ok(order.into_iter().map(|k| deps[k].clone()).collect())
    }

    /// Requests the segmented parameter representation.
    pub fn with_split_parameters(mut self) -> Self {
        self.split = true;
        self
    }

    pub(crate) fn with_tearing_state(mut self, state: TearingState) -> Self {
        self.tearing = Some(state);
        self
    }

    /// Finalizes the system. Derived problem constructors demand this first.
    pub fn complete(mut self) -> Self {
        self.is_complete = true;
        self
    }

    ////////////////////////////STRUCTURAL QUERIES/////////////////////////////

    /// Scalar residual expressions, array equations flattened elementwise.
    pub fn residuals(&self) -> Vec<Expr> {
        self.eqs.iter().flat_map(|eq| eq.residuals()).collect()
    }

    /// Residuals with every observed variable substituted away (fixpoint).
    pub fn full_equations(&self) -> Vec<Expr> {
        self.residuals()
            .iter()
            .map(|r| self.substitute_observed(r))
            .collect()
    }

    /// Repeated substitution of observed definitions until no observed name
    /// remains or the chain bound is hit.
    pub fn substitute_observed(&self, expr: &Expr) -> Expr {
        if self.observed.is_empty() {
            return expr.clone();
        }
        let map: HashMap<String, Expr> = self
            .observed
            .iter()
            .filter_map(|eq| eq.lhs_name().map(|n| (n, eq.rhs.clone())))
            .collect();
        let mut current = expr.clone();
        for _ in 0..=self.observed.len() {
            if !map.keys().any(|k| current.contains_variable(k)) {
                break;
            }
            current = current.substitute_map(&map);
        }
        current
    }

    pub fn unknown_names(&self) -> Vec<String> {
        self.unknowns.iter().map(|u| Self::handle_name(u)).collect()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.ps.iter().map(|p| Self::handle_name(p)).collect()
    }

    pub fn observed_names(&self) -> Vec<String> {
        self.observed
            .iter()
            .filter_map(|eq| eq.lhs_name())
            .collect()
    }

    /// Symbolic indexing into the name index built at construction.
    pub fn get_var(&self, name: &str) -> Option<&Expr> {
        self.name_index.get(name)
    }

    /// Soft-fail observed lookup.
    pub fn try_get_observed(&self, name: &str) -> Option<&Equation> {
        self.observed
            .iter()
            .find(|eq| eq.lhs_name().as_deref() == Some(name))
    }

    /// Fatal observed lookup, names the symbol and system on failure.
    pub fn get_observed(&self, name: &str) -> Result<&Equation, ResolutionError> {
        self.try_get_observed(name)
            .ok_or_else(|| ResolutionError::UnknownSymbol {
                symbol: name.to_string(),
                system: self.name.clone(),
            })
    }

    pub fn classify_symbol(&self, name: &str) -> Option<SymbolClass> {
        if self.unknown_names().iter().any(|n| n == name) {
            return Some(SymbolClass::Unknown);
        }
        if self
            .parameter_dependencies
            .iter()
            .any(|eq| eq.lhs_name().as_deref() == Some(name))
        {
            return Some(SymbolClass::DerivedParameter);
        }
        if self.try_get_observed(name).is_some() {
            return Some(SymbolClass::Observed);
        }
        let is_parameter = self.parameter_names().iter().any(|n| n == name)
            || Expr::parse_indexed_name(name)
                .map(|(base, _)| self.parameter_names().iter().any(|n| *n == base))
                .unwrap_or(false);
        if is_parameter {
            return Some(SymbolClass::Parameter);
        }
        None
    }

    /// Declared array length of a registered variable.
    pub fn array_shape(&self, base: &str) -> Option<usize> {
        self.variables.get(base).and_then(|v| v.shape)
    }

    /// Type annotation of a variable; elements inherit the base annotation.
    pub fn var_type(&self, name: &str) -> VarType {
        if let Some(var) = self.variables.get(name) {
            return var.vartype;
        }
        if let Some((base, _)) = Expr::parse_indexed_name(name) {
            if let Some(var) = self.variables.get(&base) {
                return var.vartype;
            }
        }
        VarType::Real
    }

    /// Numeric value of a default, resolving symbolic defaults through other
    /// defaults with a bounded fixpoint.
    pub fn default_value(&self, name: &str) -> Option<f64> {
        let expr = self.defaults.get(name)?;
        let mut current = expr.clone();
        for _ in 0..=self.defaults.len() {
            if let Some(value) = current.eval_constant() {
                return Some(value);
            }
            current = current.substitute_map(&self.defaults);
        }
        current.eval_constant()
    }

    /// Initial vector for the solver: guess, else default, else zero,
    /// one entry per unknown in order.
    pub fn initial_vector(&self) -> DVector<f64> {
        let values: Vec<f64> = self
            .unknown_names()
            .iter()
            .map(|name| {
                self.guesses
                    .get(name)
                    .copied()
                    .or_else(|| self.default_value(name))
                    .unwrap_or(0.0)
            })
            .collect();
        DVector::from_vec(values)
    }

    /// Two systems are structurally identical iff they share a tag.
    pub fn structurally_identical(&self, other: &Self) -> bool {
        self.tag == other.tag
    }

    pub fn tearing_state(&self) -> Option<&TearingState> {
        self.tearing.as_ref()
    }

    ////////////////////////////DERIVATIVE CACHES//////////////////////////////

    /// Symbolic Jacobian of the observed-substituted residuals with respect to
    /// the unknowns, rows differentiated in parallel.
    ///
    /// Memoized by `(sparse, simplify)`: a repeated request hands back the same
    /// shared matrix, a request with different flags recomputes and overwrites
    /// the cache.
    pub fn calculate_jacobian(&mut self, sparse: bool, simplify: bool) -> Rc<Vec<Vec<Expr>>> {
        if let Some(cache) = &self.jacobian_cache {
            if cache.key == (sparse, simplify) {
                return Rc::clone(&cache.matrix);
            }
        }
        let eqs = self.full_equations();
        let names = self.unknown_names();
        let num_vars = names.len();
        let jac: Vec<Vec<Expr>> = eqs
            .par_iter()
            .map(|eq| {
                (0..num_vars)
                    .into_par_iter()
                    .map(|j| {
                        let partial = eq.diff(&names[j]);
                        if simplify {
                            partial.simplify_()
                        } else {
                            partial
                        }
                    })
                    .collect()
            })
            .collect();
        let matrix = Rc::new(jac);
        self.jacobian_cache = Some(MatrixCache {
            key: (sparse, simplify),
            matrix: Rc::clone(&matrix),
        });
        matrix
    }

    /// Per-equation matrices of second derivatives, memoized like the
    /// Jacobian under a separate cache key.
    pub fn calculate_hessian(&mut self, sparse: bool, simplify: bool) -> Rc<Vec<Vec<Vec<Expr>>>> {
        if let Some(cache) = &self.hessian_cache {
            if cache.key == (sparse, simplify) {
                return Rc::clone(&cache.tensors);
            }
        }
        let eqs = self.full_equations();
        let names = self.unknown_names();
        let num_vars = names.len();
        let tensors: Vec<Vec<Vec<Expr>>> = eqs
            .par_iter()
            .map(|eq| {
                (0..num_vars)
                    .into_par_iter()
                    .map(|i| {
                        let first = eq.diff(&names[i]);
                        (0..num_vars)
                            .map(|j| {
                                let second = first.diff(&names[j]);
                                if simplify {
                                    second.simplify_()
                                } else {
                                    second
                                }
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let tensors = Rc::new(tensors);
        self.hessian_cache = Some(TensorCache {
            key: (sparse, simplify),
            tensors: Rc::clone(&tensors),
        });
        tensors
    }

    ////////////////////////////FLATTEN////////////////////////////////////////

    /// Recursively absorbs all sub-systems into a single flat system. Member
    /// names of an incomplete child gain the `child.` prefix; a system with no
    /// children returns itself unchanged.
    pub fn flatten(self) -> Self {
        if self.systems.is_empty() {
            return self;
        }
        let mut flat = self;
        let children = std::mem::take(&mut flat.systems);
        for child in children {
            let child = child.flatten().into_namespaced();
            flat.eqs.extend(child.eqs);
            flat.unknowns.extend(child.unknowns);
            flat.ps.extend(child.ps);
            flat.observed.extend(child.observed);
            flat.defaults.extend(child.defaults);
            flat.guesses.extend(child.guesses);
            flat.parameter_dependencies
                .extend(child.parameter_dependencies);
            flat.variables.extend(child.variables);
        }
        flat.unknowns = std::mem::take(&mut flat.unknowns)
            .into_iter()
            .unique_by(|u| Self::handle_name(u))
            .collect();
        flat.jacobian_cache = None;
        flat.hessian_cache = None;
        flat.tearing = None;
        flat.build_name_index();
        flat
    }

    /// Applies the `name.` prefix to every Local member of this system.
    /// A complete system is exempt: completion stops name-prefixing.
    fn into_namespaced(self) -> Self {
        if self.is_complete {
            return self;
        }
        let prefix = format!("{}.", self.name);
        let mut rename: HashMap<String, String> = HashMap::new();
        let mut add = |name: &str, variables: &HashMap<String, Variable>| {
            let target = if let Some(inner) = name
                .strip_prefix("D(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                inner.to_string()
            } else {
                name.to_string()
            };
            let base = Expr::parse_indexed_name(&target)
                .map(|(base, _)| base)
                .unwrap_or_else(|| target.clone());
            let global = variables
                .get(&base)
                .map(|v| v.scope == VarScope::Global)
                .unwrap_or(false);
            if global {
                return;
            }
            let renamed = if target == name {
                format!("{}{}", prefix, name)
            } else {
                format!("D({}{})", prefix, target)
            };
            rename.entry(name.to_string()).or_insert(renamed);
        };

        for handle in self.unknowns.iter().chain(self.ps.iter()) {
            add(&Self::handle_name(handle), &self.variables);
        }
        for eq in self
            .eqs
            .iter()
            .chain(self.observed.iter())
            .chain(self.parameter_dependencies.iter())
        {
            for side in [&eq.lhs, &eq.rhs] {
                for sym in side.all_arguments_are_variables() {
                    add(&sym, &self.variables);
                }
            }
        }
        for name in self.defaults.keys().chain(self.guesses.keys()) {
            add(name, &self.variables);
        }
        drop(add);

        let rename_eq = |eq: &Equation| Equation {
            lhs: eq.lhs.rename_variables(&rename),
            rhs: eq.rhs.rename_variables(&rename),
        };
        let rename_key = |key: &String| rename.get(key).cloned().unwrap_or_else(|| key.clone());

        let mut namespaced = self;
        namespaced.eqs = namespaced.eqs.iter().map(rename_eq).collect();
        namespaced.observed = namespaced.observed.iter().map(rename_eq).collect();
        namespaced.parameter_dependencies = namespaced
            .parameter_dependencies
            .iter()
            .map(rename_eq)
            .collect();
        namespaced.unknowns = namespaced
            .unknowns
            .iter()
            .map(|u| u.rename_variables(&rename))
            .collect();
        namespaced.ps = namespaced
            .ps
            .iter()
            .map(|p| p.rename_variables(&rename))
            .collect();
        namespaced.defaults = namespaced
            .defaults
            .iter()
            .map(|(k, v)| (rename_key(k), v.rename_variables(&rename)))
            .collect();
        namespaced.guesses = namespaced
            .guesses
            .iter()
            .map(|(k, v)| (rename_key(k), *v))
            .collect();
        namespaced.variables = namespaced
            .variables
            .iter()
            .map(|(k, v)| {
                let new_name = rename_key(k);
                let mut var = v.clone();
                var.name = new_name.clone();
                var.symbol = Expr::from_canonical_name(&new_name);
                (new_name, var)
            })
            .collect();
        namespaced
    }

    /// True when any equation carries a delay term.
    pub fn has_delay(&self) -> bool {
        self.eqs.iter().chain(self.observed.iter()).any(|eq| {
            let mut found = false;
            for side in [&eq.lhs, &eq.rhs] {
                side.visit(&mut |node| {
                    if node.call_op() == Some(Op::Delay) {
                        found = true;
                    }
                });
            }
            found
        })
    }
}

/// Equality up to reordering: names match, equations/unknowns/parameters match
/// as multisets, sub-systems match pairwise in declared order. Identity tags
/// and caches are excluded.
impl PartialEq for NonlinearSystem {
    fn eq(&self, other: &Self) -> bool {
        fn sorted<T: fmt::Display>(items: &[T]) -> Vec<String> {
            let mut strings: Vec<String> = items.iter().map(|i| i.to_string()).collect();
            strings.sort();
            strings
        }
        self.name == other.name
            && sorted(&self.eqs) == sorted(&other.eqs)
            && sorted(&self.unknowns) == sorted(&other.unknowns)
            && sorted(&self.ps) == sorted(&other.ps)
            && self.systems == other.systems
    }
}

impl fmt::Display for NonlinearSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "NonlinearSystem '{}' (tag {})", self.name, self.tag)?;
        writeln!(
            f,
            "  unknowns: [{}]",
            self.unknown_names().join(", ")
        )?;
        writeln!(
            f,
            "  parameters: [{}]",
            self.parameter_names().join(", ")
        )?;
        for eq in &self.eqs {
            writeln!(f, "  {}", eq)?;
        }
        for eq in &self.observed {
            writeln!(f, "  observed: {}", eq)?;
        }
        for sub in &self.systems {
            writeln!(f, "  subsystem: {}", sub.name)?;
        }
        Ok(())
    }
}

//___________________________________TESTS____________________________________
