//! # Structural analysis: incidence graph, matching, tearing state
//!
//! ## Purpose
//! Builds the bipartite equation/variable incidence graph of a system and a
//! maximum matching on it. The matching pairs each equation with the variable
//! it is responsible for; the pairing is what the component decomposition
//! later runs on. Everything here is arena-style: nodes are indices into the
//! system's own equation and unknown orderings, no graph node owns another.
//!
//! ## Main Structures
//! - `BipartiteGraph` - forward and backward adjacency between equations and
//!   variables
//! - `Matching` - equation/variable pairing, kept in both directions
//! - `TearingState` - graph + matching + eligibility mask, stored on the
//!   system by `structural_simplify`

use crate::symbolic::symbolic_engine::{Expr, Op};
use crate::system::equation_system::NonlinearSystem;
use crate::system::equation_system_ODE::ODESystem;
use crate::system::system_errors::PreconditionError;
use std::collections::{HashMap, HashSet};

//______________________________BIPARTITE GRAPH_________________________________

/// Equation/variable incidence as index adjacency lists. Equations are the
/// source side, variables the destination side.
#[derive(Debug, Clone, PartialEq)]
pub struct BipartiteGraph {
    pub fadjlist: Vec<Vec<usize>>, // equation index -> variable indices
    pub badjlist: Vec<Vec<usize>>, // variable index -> equation indices
}

impl BipartiteGraph {
    pub fn new(n_eqs: usize, n_vars: usize) -> Self {
        BipartiteGraph {
            fadjlist: vec![Vec::new(); n_eqs],
            badjlist: vec![Vec::new(); n_vars],
        }
    }

    pub fn add_edge(&mut self, eq: usize, var: usize) {
        if !self.fadjlist[eq].contains(&var) {
            self.fadjlist[eq].push(var);
            self.badjlist[var].push(eq);
        }
    }

    pub fn n_eqs(&self) -> usize {
        self.fadjlist.len()
    }

    pub fn n_vars(&self) -> usize {
        self.badjlist.len()
    }

    /// Incidence of the observed-substituted residuals on the unknowns.
    pub fn from_system(sys: &NonlinearSystem) -> Self {
        let names = sys.unknown_names();
        let positions: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let residuals = sys.full_equations();
        let mut graph = BipartiteGraph::new(residuals.len(), names.len());
        for (eq, residual) in residuals.iter().enumerate() {
            for sym in residual.all_arguments_are_variables() {
                if let Some(&var) = positions.get(sym.as_str()) {
                    graph.add_edge(eq, var);
                }
            }
        }
        graph
    }

    /// Grows `matching` to a maximum one over the eligible variables, by
    /// augmenting paths. Already matched equations are left in place.
    pub fn augment_matching(&self, eligible: &[bool], matching: &mut Matching) {
        for eq in 0..self.n_eqs() {
            if matching.eq_to_var[eq].is_some() {
                continue;
            }
            let mut visited = vec![false; self.n_vars()];
            self.try_augment(eq, eligible, &mut visited, matching);
        }
    }

    pub fn maximal_matching(&self, eligible: &[bool]) -> Matching {
        let mut matching = Matching::empty(self.n_eqs(), self.n_vars());
        self.augment_matching(eligible, &mut matching);
        matching
    }

    fn try_augment(
        &self,
        eq: usize,
        eligible: &[bool],
        visited: &mut [bool],
        matching: &mut Matching,
    ) -> bool {
        for &var in &self.fadjlist[eq] {
            if !eligible[var] || visited[var] {
                continue;
            }
            visited[var] = true;
            let free = match matching.var_to_eq[var] {
                None => true,
                Some(owner) => self.try_augment(owner, eligible, visited, matching),
            };
            if free {
                matching.assign(eq, var);
                return true;
            }
        }
        false
    } // end of try_augment
}

//_________________________________MATCHING_____________________________________

/// Equation/variable pairing held in both directions so lookups from either
/// side are O(1).
#[derive(Debug, Clone, PartialEq)]
pub struct Matching {
    pub eq_to_var: Vec<Option<usize>>,
    pub var_to_eq: Vec<Option<usize>>,
}

impl Matching {
    pub fn empty(n_eqs: usize, n_vars: usize) -> Self {
        Matching {
            eq_to_var: vec![None; n_eqs],
            var_to_eq: vec![None; n_vars],
        }
    }

    /// Pairs `eq` with `var`, unpairing whatever either was paired to.
    pub fn assign(&mut self, eq: usize, var: usize) {
        if let Some(old_var) = self.eq_to_var[eq] {
            self.var_to_eq[old_var] = None;
        }
        if let Some(old_eq) = self.var_to_eq[var] {
            self.eq_to_var[old_eq] = None;
        }
        self.eq_to_var[eq] = Some(var);
        self.var_to_eq[var] = Some(eq);
    }

    pub fn len(&self) -> usize {
        self.eq_to_var.iter().filter(|m| m.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every equation found a variable.
    pub fn is_perfect(&self) -> bool {
        self.eq_to_var.iter().all(|m| m.is_some())
    }
}

//_______________________________TEARING STATE__________________________________

/// Result of structural simplification: the incidence graph, the maximum
/// matching on it and the eligibility mask that restricted the matching.
/// Variable indices refer to the system's unknown ordering at the time of
/// analysis, captured in `var_names`.
#[derive(Debug, Clone)]
pub struct TearingState {
    pub graph: BipartiteGraph,
    pub matching: Matching,
    pub var_names: Vec<String>,
    pub eligible: Vec<bool>, // algebraic variables, the only matching targets
}

impl TearingState {
    /// Indices of variables the matching may pair equations with.
    pub fn algebraic_vars(&self) -> Vec<usize> {
        (0..self.eligible.len())
            .filter(|&v| self.eligible[v])
            .collect()
    }
}

impl NonlinearSystem {
    /// Structural analysis pass: builds the incidence graph of the
    /// observed-substituted residuals, matches every equation to an unknown
    /// and stores the result on the system. All unknowns are algebraic here,
    /// so all are eligible.
    pub fn structural_simplify(self) -> Result<Self, PreconditionError> {
        if !self.is_complete {
            return Err(PreconditionError::NotComplete {
                system: self.name.clone(),
                requested: "structural simplification".to_string(),
            });
        }
        let graph = BipartiteGraph::from_system(&self);
        let eligible = vec![true; graph.n_vars()];
        let matching = graph.maximal_matching(&eligible);
        let var_names = self.unknown_names();
        Ok(self.with_tearing_state(TearingState {
            graph,
            matching,
            var_names,
            eligible,
        }))
    }
}

impl ODESystem {
    /// Structural analysis for the differential case. States under D(..) are
    /// integrated, not solved, so they are ineligible for the matching; their
    /// defining equations are pre-paired with them and only the algebraic
    /// remainder is augmented.
    pub fn structural_simplify(mut self) -> Result<Self, PreconditionError> {
        if !self.sys.is_complete {
            return Err(PreconditionError::NotComplete {
                system: self.sys.name.clone(),
                requested: "structural simplification".to_string(),
            });
        }
        let var_names = self.sys.unknown_names();
        let positions: HashMap<&str, usize> = var_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        // differentiated states, collected from every D(..) occurrence
        let mut states: HashSet<String> = HashSet::new();
        for eq in &self.sys.eqs {
            for side in [&eq.lhs, &eq.rhs] {
                side.visit(&mut |node| {
                    if let Expr::Call(Op::Dt, args) = node {
                        if let Some(inner) = args[0].canonical_name() {
                            states.insert(inner);
                        }
                    }
                });
            }
        }
        let eligible: Vec<bool> = var_names.iter().map(|n| !states.contains(n)).collect();

        let graph = BipartiteGraph::from_system(&self.sys);
        let mut matching = Matching::empty(graph.n_eqs(), graph.n_vars());
        for (eq_idx, eq) in self.sys.eqs.iter().enumerate() {
            if let Expr::Call(Op::Dt, args) = &eq.lhs {
                if let Some(var) = args[0].canonical_name().and_then(|n| {
                    positions.get(n.as_str()).copied()
                }) {
                    matching.assign(eq_idx, var);
                }
            }
        }
        graph.augment_matching(&eligible, &mut matching);

        self.sys = self.sys.with_tearing_state(TearingState {
            graph,
            matching,
            var_names,
            eligible,
        });
        Ok(self)
    }
}

//___________________________________TESTS____________________________________
