//! # Symbolic Engine Module
//!
//! This module provides the symbolic expression core for building, manipulating
//! and evaluating mathematical expressions. It is the foundation the system
//! containers and the code generation pipeline of RustedModelKit are built on:
//! equations are Expr trees, derivatives are Expr trees, generated functions are
//! compiled Expr trees.
//!
//! ## Purpose
//!
//! The symbolic engine allows users to:
//! - Create symbolic variables, constants and array element handles
//! - Combine them with natural operator syntax: `x + y * z`
//! - Substitute, rename and query variables
//! - Differentiate analytically (see symbolic_engine_derivatives)
//! - Compile expressions into executable Rust closures (see symbolic_lambdify)
//!
//! ## Main Structures and Methods
//!
//! ### `Expr` Enum
//! A closed tagged-variant expression type with four shapes:
//! - **Variables**: `Var(String)` - symbolic variables like "x", "y"
//! - **Constants**: `Const(f64)` - numerical constants
//! - **Calls**: `Call(Op, Vec<Expr>)` - an operation applied to arguments
//! - **Arrays**: `Array(Vec<Expr>)` - array literals
//!
//! All structural dispatch is pattern matching over these four shapes; every
//! operation (arithmetic, elementary functions, element access, differentials,
//! delays) is a variant of the closed `Op` enum rather than a separate tree
//! node, so recursive passes are written once against `Call(op, args)`.
//!
//! ### Key Methods
//! - `Symbols(symbols: &str)` - Create multiple variables from comma-separated string
//! - `IndexedVar(index, var_name)` - Create an array element handle `name[index]`
//! - `canonical_name()` - The string identity a variable handle is compared by
//! - `transform()` / `visit()` - The shared recursion all passes are built on
//! - `set_variable()` / `substitute_variable()` - Substitution by canonical name
//! - `eval_constant()` - Fold a constant expression to a number
//!
//! ## Interesting Code Features
//!
//! 1. **Closed operation enum**: adding an operation means touching `Op`, the
//!    arity table, `diff` and the evaluator - the compiler finds every match
//!    that must learn about it.
//!
//! 2. **Atomic handles**: element access `p[2]` and differentials `D(x)` are
//!    `Call` nodes but behave as leaves under substitution and traversal; they
//!    are addressed by canonical name, never rewritten from the inside.
//!
//! 3. **Operator Overloading**: std::ops traits (Add, Sub, Mul, Div, Neg) give
//!    natural mathematical syntax for building equation systems.
//!
//! 4. **Macro System**: `symbols!(x, y, z)` for ergonomic variable creation.

#![allow(non_camel_case_types)]

use regex::Regex;
use std::collections::HashMap;
use std::f64;
use std::fmt;
use std::sync::LazyLock;
use strum_macros::{Display as OpName, EnumIter};

/// Closed set of operations an expression node can apply.
///
/// Binary arithmetic and `Pow` print infix; the elementary functions print as
/// calls. `Index` is array element access (`p[2]`), `Dt` is the time
/// differential (`D(x)`), `Delay` is a delayed variable reference
/// (`delay(x, tau)`). Lowercase trigonometric names follow the mathematical
/// notation used across the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, OpName, EnumIter)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    #[strum(serialize = "exp")]
    Exp,
    #[strum(serialize = "ln")]
    Ln,
    #[strum(serialize = "sqrt")]
    Sqrt,
    sin,
    cos,
    tg,
    Index,
    #[strum(serialize = "D")]
    Dt,
    #[strum(serialize = "delay")]
    Delay,
}

impl Op {
    /// Number of arguments the operation takes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow | Op::Index | Op::Delay => 2,
            Op::Neg | Op::Exp | Op::Ln | Op::Sqrt | Op::sin | Op::cos | Op::tg | Op::Dt => 1,
        }
    }

    /// Infix symbol for the arithmetic operations, None for call-style ops.
    pub fn infix_symbol(&self) -> Option<&'static str> {
        match self {
            Op::Add => Some("+"),
            Op::Sub => Some("-"),
            Op::Mul => Some("*"),
            Op::Div => Some("/"),
            Op::Pow => Some("^"),
            _ => None,
        }
    }
}

/// Core symbolic expression enum representing mathematical expressions as an
/// abstract syntax tree.
///
/// Four shapes cover every expression: a named variable, a numeric constant,
/// an operation applied to arguments, and an array literal. Recursive passes
/// (substitution, differentiation, compilation) pattern-match these shapes.
///
/// # Examples
/// ```rust, ignore
/// let x = Expr::Var("x".to_string());
/// let expr = x.clone() * x + Expr::Const(2.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Symbolic variable with a name (e.g., "x", "y", "velocity")
    Var(String),
    /// Numerical constant value
    Const(f64),
    /// Operation applied to an argument list; length must match `op.arity()`
    Call(Op, Vec<Expr>),
    /// Array literal of expressions
    Array(Vec<Expr>),
}

static INDEXED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)\[(\d+)\]$").unwrap());

/// Display implementation for pretty printing symbolic expressions.
///
/// Infix arithmetic keeps full parenthesization; element access prints as
/// `name[i]`, differentials as `D(x)`, everything else as `op(args...)`.
/// The printed form of a variable handle is its canonical name, so Display
/// doubles as the identity used by the system containers.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Const(val) => write!(f, "{}", val),
            Expr::Call(op, args) => match op {
                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
                    let symbol = op.infix_symbol().unwrap();
                    write!(f, "({} {} {})", args[0], symbol, args[1])
                }
                Op::Neg => write!(f, "(-{})", args[0]),
                Op::Index => write!(f, "{}[{}]", args[0], args[1]),
                Op::Dt => write!(f, "D({})", args[0]),
                Op::Delay => write!(f, "delay({}, {})", args[0], args[1]),
                _ => {
                    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "{}({})", op, rendered.join(", "))
                }
            },
            Expr::Array(items) => {
                let rendered: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Expr::Call(Op::Add, vec![self, rhs])
    }
}

impl std::ops::Sub for Expr {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Expr::Call(Op::Sub, vec![self, rhs])
    }
}

impl std::ops::Mul for Expr {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Expr::Call(Op::Mul, vec![self, rhs])
    }
}

impl std::ops::Div for Expr {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Expr::Call(Op::Div, vec![self, rhs])
    }
}

impl std::ops::AddAssign for Expr {
    fn add_assign(&mut self, rhs: Self) {
        *self = Expr::Call(Op::Add, vec![self.clone(), rhs]);
    }
}

impl std::ops::SubAssign for Expr {
    fn sub_assign(&mut self, rhs: Self) {
        *self = Expr::Call(Op::Sub, vec![self.clone(), rhs]);
    }
}

impl std::ops::MulAssign for Expr {
    fn mul_assign(&mut self, rhs: Self) {
        *self = Expr::Call(Op::Mul, vec![self.clone(), rhs]);
    }
}

impl std::ops::Neg for Expr {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Expr::Call(Op::Neg, vec![self])
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl Expr {
    /// BASIC FEATURES

    /// Creates multiple symbolic variables from a comma-separated string.
    ///
    /// Parses a string containing variable names separated by commas and returns
    /// a vector of Expr::Var instances. Whitespace is automatically trimmed.
    ///
    /// # Arguments
    /// * `symbols` - Comma-separated string of variable names (e.g., "x, y, z")
    ///
    /// # Returns
    /// Vector of Expr::Var instances for each variable name
    ///
    /// # Examples
    /// ```rust, ignore
    /// let vars = Expr::Symbols("x, y, z");
    /// assert_eq!(vars.len(), 3);
    /// ```
    pub fn Symbols(symbols: &str) -> Vec<Expr> {
        let symbols = symbols.to_string();
        let vec_trimmed: Vec<String> = symbols.split(',').map(|s| s.trim().to_string()).collect();
        let vector_of_symbolic_vars: Vec<Expr> = vec_trimmed
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| Expr::Var(s.to_string()))
            .collect();
        vector_of_symbolic_vars
    }

    /// The string identity of a variable handle.
    ///
    /// Plain variables answer their name, element handles answer `name[i]`,
    /// differentials answer `D(name)`. Compound expressions answer None.
    /// All substitution and system bookkeeping compares canonical names, so a
    /// handle built twice is the same variable.
    pub fn canonical_name(&self) -> Option<String> {
        match self {
            Expr::Var(name) => Some(name.clone()),
            Expr::Call(Op::Index, args) => match (&args[0], &args[1]) {
                (Expr::Var(base), Expr::Const(i)) => Some(format!("{}[{}]", base, i)),
                _ => None,
            },
            Expr::Call(Op::Dt, args) => args[0].canonical_name().map(|n| format!("D({})", n)),
            _ => None,
        }
    }

    /// Splits an element handle into (array name, index).
    ///
    /// Answers None for anything that is not a literal element access.
    pub fn as_index(&self) -> Option<(String, usize)> {
        match self {
            Expr::Call(Op::Index, args) => match (&args[0], &args[1]) {
                (Expr::Var(base), Expr::Const(i)) => Some((base.clone(), *i as usize)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parses a canonical element name like "p[2]" into (array name, index).
    pub fn parse_indexed_name(name: &str) -> Option<(String, usize)> {
        let caps = INDEXED_NAME.captures(name)?;
        let base = caps.get(1)?.as_str().to_string();
        let index: usize = caps.get(2)?.as_str().parse().ok()?;
        Some((base, index))
    }

    /// Shared pre-order rewrite: `f` is offered every node, outermost first;
    /// the first Some wins and that subtree is replaced wholesale.
    ///
    /// Element handles and differentials are atomic - their internals are
    /// never rewritten, they are either replaced as a whole by `f` or kept.
    pub fn transform(&self, f: &impl Fn(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => self.clone(),
            Expr::Call(op, args) => Expr::Call(*op, args.iter().map(|a| a.transform(f)).collect()),
            Expr::Array(items) => Expr::Array(items.iter().map(|i| i.transform(f)).collect()),
            _ => self.clone(),
        }
    }

    /// Shared read-only walk over every node, outermost first.
    ///
    /// Element handles and differentials are visited but not entered.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => {}
            Expr::Call(_, args) => {
                for a in args {
                    a.visit(f);
                }
            }
            Expr::Array(items) => {
                for i in items {
                    i.visit(f);
                }
            }
            _ => {}
        }
    }

    /// Substitutes a variable with a constant value throughout the expression.
    ///
    /// # Arguments
    /// * `var` - Canonical name of the variable to substitute
    /// * `value` - Numerical value to substitute for the variable
    ///
    /// # Returns
    /// New expression with the variable substituted
    pub fn set_variable(&self, var: &str, value: f64) -> Expr {
        self.transform(&|node| match node.canonical_name() {
            Some(name) if name == var => Some(Expr::Const(value)),
            _ => None,
        })
    }

    /// Substitutes multiple variables with constant values using a HashMap.
    ///
    /// More efficient than repeated set_variable calls when substituting many
    /// variables. Only variables present in the map are substituted.
    ///
    /// # Arguments
    /// * `var_map` - HashMap mapping canonical variable names to values
    ///
    /// # Returns
    /// New expression with all mapped variables substituted
    pub fn set_variable_from_map(&self, var_map: &HashMap<String, f64>) -> Expr {
        self.transform(&|node| {
            node.canonical_name()
                .and_then(|name| var_map.get(&name))
                .map(|value| Expr::Const(*value))
        })
    }

    /// Substitutes a variable with an arbitrary expression.
    ///
    /// # Arguments
    /// * `var` - Canonical name of the variable to replace
    /// * `replacement` - Expression substituted in its place
    pub fn substitute_variable(&self, var: &str, replacement: &Expr) -> Expr {
        self.transform(&|node| match node.canonical_name() {
            Some(name) if name == var => Some(replacement.clone()),
            _ => None,
        })
    }

    /// Simultaneous substitution of several variables by expression.
    ///
    /// All replacements refer to the original expression; a replacement is
    /// never re-substituted into another.
    pub fn substitute_map(&self, map: &HashMap<String, Expr>) -> Expr {
        self.transform(&|node| {
            node.canonical_name()
                .and_then(|name| map.get(&name))
                .cloned()
        })
    }

    /// Renames a variable throughout the expression.
    ///
    /// # Arguments
    /// * `old_var` - Current canonical variable name to replace
    /// * `new_var` - New variable name
    pub fn rename_variable(&self, old_var: &str, new_var: &str) -> Expr {
        self.substitute_variable(old_var, &Expr::from_canonical_name(new_var))
    }

    /// Renames variables from a map of old name -> new name. Element handles
    /// and differentials are rebuilt structurally, so renaming "p[2]" to
    /// "tank.p[2]" yields an element handle again, not a plain symbol.
    pub fn rename_variables(&self, var_map: &HashMap<String, String>) -> Expr {
        self.transform(&|node| {
            node.canonical_name()
                .and_then(|name| var_map.get(&name))
                .map(|new_name| Expr::from_canonical_name(new_name))
        })
    }

    /// Rebuilds a structured handle from a canonical name: "D(x)" becomes a
    /// differential, "p[2]" an element handle, anything else a plain symbol.
    pub fn from_canonical_name(name: &str) -> Expr {
        if let Some(inner) = name.strip_prefix("D(").and_then(|rest| rest.strip_suffix(')')) {
            return Expr::Var(inner.to_string()).dt();
        }
        if let Some((base, index)) = Expr::parse_indexed_name(name) {
            return Expr::IndexedVar(index, &base);
        }
        Expr::Var(name.to_string())
    }

    /// Checks whether the expression references a variable by canonical name.
    pub fn contains_variable(&self, var: &str) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if node.canonical_name().as_deref() == Some(var) {
                found = true;
            }
        });
        found
    }

    /// STRUCTURAL QUERIES

    /// True for a Call node.
    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call(_, _))
    }

    /// The operation of a Call node.
    pub fn call_op(&self) -> Option<Op> {
        match self {
            Expr::Call(op, _) => Some(*op),
            _ => None,
        }
    }

    /// The argument list of a Call node.
    pub fn call_args(&self) -> Option<&[Expr]> {
        match self {
            Expr::Call(_, args) => Some(args),
            _ => None,
        }
    }

    /// True for an array literal.
    pub fn is_array(&self) -> bool {
        matches!(self, Expr::Array(_))
    }

    /// The items of an array literal.
    pub fn as_array(&self) -> Option<&[Expr]> {
        match self {
            Expr::Array(items) => Some(items),
            _ => None,
        }
    }

    /// True for a numeric constant.
    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }

    /// Checks if expression is exactly zero (constant 0.0).
    pub fn is_zero(&self) -> bool {
        match self {
            Expr::Const(val) => val == &0.0,
            _ => false,
        }
    }

    /// Evaluates a fully constant expression to a number.
    ///
    /// Answers None as soon as a variable, element handle, differential or
    /// delay is encountered.
    pub fn eval_constant(&self) -> Option<f64> {
        match self {
            Expr::Const(val) => Some(*val),
            Expr::Call(op, args) => {
                let vals: Option<Vec<f64>> = args.iter().map(|a| a.eval_constant()).collect();
                let vals = vals?;
                match op {
                    Op::Add => Some(vals[0] + vals[1]),
                    Op::Sub => Some(vals[0] - vals[1]),
                    Op::Mul => Some(vals[0] * vals[1]),
                    Op::Div => Some(vals[0] / vals[1]),
                    Op::Pow => Some(vals[0].powf(vals[1])),
                    Op::Neg => Some(-vals[0]),
                    Op::Exp => Some(vals[0].exp()),
                    Op::Ln => Some(vals[0].ln()),
                    Op::Sqrt => Some(vals[0].sqrt()),
                    Op::sin => Some(vals[0].sin()),
                    Op::cos => Some(vals[0].cos()),
                    Op::tg => Some(vals[0].tan()),
                    Op::Index | Op::Dt | Op::Delay => None,
                }
            }
            _ => None,
        }
    }

    /// FUNCTION CONSTRUCTORS

    /// Creates power expression self^rhs.
    pub fn pow(self, rhs: Expr) -> Expr {
        Expr::Call(Op::Pow, vec![self, rhs])
    }

    /// Exponential function e^self.
    pub fn exp(self) -> Expr {
        Expr::Call(Op::Exp, vec![self])
    }

    /// Natural logarithm ln(self).
    pub fn ln(self) -> Expr {
        Expr::Call(Op::Ln, vec![self])
    }

    /// Square root of self.
    pub fn sqrt(self) -> Expr {
        Expr::Call(Op::Sqrt, vec![self])
    }

    /// Sine of self.
    pub fn sin(self) -> Expr {
        Expr::Call(Op::sin, vec![self])
    }

    /// Cosine of self.
    pub fn cos(self) -> Expr {
        Expr::Call(Op::cos, vec![self])
    }

    /// Tangent of self (mathematical notation tg).
    pub fn tg(self) -> Expr {
        Expr::Call(Op::tg, vec![self])
    }

    /// Time differential D(self). Valid only on variable handles; the ODE
    /// container rejects anything else at construction.
    pub fn dt(self) -> Expr {
        Expr::Call(Op::Dt, vec![self])
    }

    /// Delayed reference delay(self, lag).
    pub fn delay(self, lag: Expr) -> Expr {
        Expr::Call(Op::Delay, vec![self, lag])
    }

    //__________________________________INDEXED VARIABLES____________________________________

    /// Creates a single array element handle `var_name[index]`.
    ///
    /// Element handles are individually addressable variables: they carry the
    /// canonical name `name[i]` and may appear as standalone unknowns or
    /// parameters. Elements are numbered from 1.
    ///
    /// # Arguments
    /// * `index` - Element index (1-based)
    /// * `var_name` - Array variable name
    ///
    /// # Returns
    /// Element-access Call with canonical name "var_name[index]"
    pub fn IndexedVar(index: usize, var_name: &str) -> Expr {
        Expr::Call(
            Op::Index,
            vec![Expr::Var(var_name.to_string()), Expr::Const(index as f64)],
        )
    }

    /// Creates the full element family of an array variable and their
    /// canonical names.
    ///
    /// Generates `name[1]` ... `name[len]`. Returns both the Expr handles and
    /// their names for convenience.
    ///
    /// # Arguments
    /// * `len` - Array length
    /// * `var_name` - Array variable name
    ///
    /// # Returns
    /// Tuple of (Vec<Expr>, Vec<String>) containing handles and names
    pub fn IndexedVars(len: usize, var_name: &str) -> (Vec<Expr>, Vec<String>) {
        let vec_of_expr: Vec<Expr> = (1..=len).map(|i| Expr::IndexedVar(i, var_name)).collect();
        let vec_of_names: Vec<String> =
            (1..=len).map(|i| format!("{}[{}]", var_name, i)).collect();
        (vec_of_expr, vec_of_names)
    }
}

//___________________________________MACROS____________________________________

/// Macro to create symbolic variables from a comma-separated list
/// Usage: symbols!(x, y, z) -> creates variables x, y, z
#[macro_export]
macro_rules! symbols {
    ($($var:ident),+ $(,)?) => {
        {
            let var_names = stringify!($($var),+);
            let vars = Expr::Symbols(var_names);
            let mut iter = vars.into_iter();
            ($(
                {
                    let $var = iter.next().unwrap();
                    $var
                }
            ),+)
        }
    };
}

/// Macro to create a single array element handle
/// Usage: indexed_var!(5, "x") -> creates x[5]
#[macro_export]
macro_rules! indexed_var {
    ($index:expr, $name:expr) => {
        Expr::IndexedVar($index, $name)
    };
}

/// Macro to create the element family of an array variable
/// Usage: indexed_vars!(5, "x") -> creates x[1] ... x[5]
#[macro_export]
macro_rules! indexed_vars {
    ($count:expr, $name:expr) => {
        Expr::IndexedVars($count, $name)
    };
}
