//! Error types for the modeling core.
//!
//! Three families, matching the three ways system handling fails:
//!
//! - `ConstructionError`: validation failures raised by system constructors,
//!   fatal to the call
//! - `PreconditionError`: a derived artifact (problem, decomposition) was
//!   requested from a system that skipped a preparatory step or with inputs
//!   the artifact cannot take; the message names what to change
//! - `ResolutionError`: a symbol could not be classified while building
//!   observed/dependency closures
//!
//! Every message names the offending symbols or systems. Degenerate but valid
//! conditions (a single-component system requested as staged) are not errors
//! and never appear here.

use thiserror::Error;

/// Validation failures raised immediately by system constructors.
#[derive(Error, Debug)]
pub enum ConstructionError {
    /// Every system must carry a non-empty name
    #[error("system name is missing: construct the system with a non-empty name")]
    MissingName,
    /// Sub-system names must be pairwise unique within a parent
    #[error("duplicate subsystem name '{name}' inside system '{parent}'")]
    DuplicateSubsystemName { name: String, parent: String },
    /// D(..) may wrap only a declared unknown
    #[error("malformed differential term '{term}' in system '{system}': D(..) may be applied only to a declared unknown")]
    MalformedDifferential { term: String, system: String },
    /// An observed equation must define a single variable
    #[error("observed equation left side '{lhs}' in system '{system}' is not a single variable")]
    ObservedLhsNotVariable { lhs: String, system: String },
    /// Observed variables are eliminated, they cannot double as unknowns
    #[error("observed equation defines '{lhs}' which is already an unknown of system '{system}'")]
    ObservedLhsIsUnknown { lhs: String, system: String },
    /// Array-indexed parameters must be declared wholly or not at all
    #[error("array parameter '{base}' in system '{system}' is ambiguous: elements {present:?} are declared parameters but {missing:?} are not; declare every referenced element or none")]
    PartialArrayParameter {
        base: String,
        system: String,
        present: Vec<usize>,
        missing: Vec<usize>,
    },
    /// Parameter dependencies must form a DAG
    #[error("cyclic parameter dependencies in system '{system}' among {participants:?}")]
    CyclicParameterDependencies {
        system: String,
        participants: Vec<String>,
    },
    /// A parameter dependency must define a single distinct parameter
    #[error("parameter dependency left side '{lhs}' in system '{system}' is {reason}")]
    MalformedParameterDependency {
        lhs: String,
        system: String,
        reason: String,
    },
    /// The independent variable must be a single symbol outside the unknowns
    #[error("independent variable '{iv}' of system '{system}' is {reason}")]
    MalformedIndependentVariable {
        iv: String,
        system: String,
        reason: String,
    },
}

/// A derived artifact was requested from a system missing a preparatory step
/// or with inputs the artifact cannot take. The message tells the caller what
/// to change.
#[derive(Error, Debug)]
pub enum PreconditionError {
    #[error("system '{system}' is not complete: call complete() before requesting {requested}")]
    NotComplete { system: String, requested: String },
    #[error("system '{system}' has no tearing state: call structural_simplify() before requesting {requested}")]
    NotSimplified { system: String, requested: String },
    #[error("system '{system}' does not use the split parameter representation: call with_split_parameters() before requesting {requested}")]
    NotSplit { system: String, requested: String },
    #[error("initial guess for system '{system}' has length {got}, expected {expected} (one entry per unknown)")]
    GuessLengthMismatch {
        system: String,
        expected: usize,
        got: usize,
    },
    #[error("system '{system}' has {n_unknowns} unknowns: an interval problem brackets exactly one scalar unknown")]
    NotScalar { system: String, n_unknowns: usize },
    #[error("system '{system}' carries delay terms: {requested} takes no history argument, build the function through FunctionBuilder to route delayed values")]
    DelaysPresent { system: String, requested: String },
    #[error("bracket [{lo}, {hi}] for system '{system}' is not ordered: the lower endpoint must lie strictly below the upper")]
    InvalidBracket { system: String, lo: f64, hi: f64 },
}

/// A symbol could not be classified during dependency resolution. Callers that
/// prefer soft failure use the `try_*` lookups returning `Option` instead.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("symbol '{symbol}' in system '{system}' is neither an unknown, a parameter, an observed variable nor a derived parameter")]
    UnknownSymbol { symbol: String, system: String },
    #[error("circular definitions among {participants:?} in system '{system}': assignments cannot be ordered")]
    CircularDefinitions {
        system: String,
        participants: Vec<String>,
    },
}

/// Staged assembly touches both families: precondition gates on entry and
/// symbol resolution while inlining stage residuals.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

//___________________________________TESTS____________________________________

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = ConstructionError::DuplicateSubsystemName {
            name: "foo".to_string(),
            parent: "plant".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("foo"));
        assert!(msg.contains("plant"));

        let err = PreconditionError::NotSimplified {
            system: "plant".to_string(),
            requested: "an SCC-staged problem".to_string(),
        };
        assert!(err.to_string().contains("structural_simplify"));

        let err = ResolutionError::UnknownSymbol {
            symbol: "ghost".to_string(),
            system: "plant".to_string(),
        };
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_partial_array_parameter_lists_indices() {
        let err = ConstructionError::PartialArrayParameter {
            base: "p".to_string(),
            system: "plant".to_string(),
            present: vec![1, 3],
            missing: vec![2],
        };
        let msg = err.to_string();
        assert!(msg.contains("p"));
        assert!(msg.contains("[1, 3]"));
        assert!(msg.contains("[2]"));
    }
}
