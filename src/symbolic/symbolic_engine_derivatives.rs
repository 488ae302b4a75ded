//! # Symbolic Engine Derivatives Module
//!
//! This module extends the symbolic engine with analytical differentiation,
//! light algebraic simplification, variable extraction and direct evaluation.
//! It is the computational backbone of the Jacobian/Hessian generators: every
//! derivative matrix the code generation pipeline emits starts as a `diff`
//! call here.
//!
//! ## Purpose
//!
//! This module enables:
//! - **Analytical Differentiation**: symbolic differentiation using calculus rules
//! - **Simplification**: constant folding and identity elimination on Expr trees
//! - **Variable Extraction**: collecting every canonical variable name referenced
//! - **Direct Evaluation**: evaluating an expression against a variable/value list
//!   without creating a closure (the compiled path lives in symbolic_lambdify)
//!
//! ## Key Methods
//!
//! - `diff(var: &str)` - Analytical partial derivative by canonical name
//! - `simplify_()` - Algebraic cleanup: x+0, x*1, x*0, constant folding
//! - `all_arguments_are_variables()` - Sorted, deduplicated canonical variable names
//! - `eval_expression(vars, values)` - Direct recursive evaluation
//!
//! ## Interesting Code Features
//!
//! 1. **Recursive Differentiation Rules**: product rule, quotient rule, chain
//!    rule for every operation of the closed `Op` enum; the general power rule
//!    splits on whether the exponent is constant
//!
//! 2. **Leaf Semantics for Handles**: element accesses `p[2]` and differentials
//!    `D(x)` differentiate as atomic variables - the derivative is 1 exactly
//!    when the canonical name matches, 0 otherwise
//!
//! 3. **Delay Opacity**: `delay(x, tau)` differentiates to zero with respect to
//!    current-time unknowns; delayed values are supplied by the history argument
//!    at evaluation time

use crate::symbolic::symbolic_engine::{Expr, Op};

impl Expr {
    /// DIFFERENTIATION

    /// Computes the analytical derivative of the expression with respect to a variable.
    ///
    /// Implements the standard differentiation rules from calculus:
    /// - Power rule: d/dx(x^n) = n*x^(n-1)
    /// - Product rule: d/dx(f*g) = f'*g + f*g'
    /// - Quotient rule: d/dx(f/g) = (f'*g - f*g')/g^2
    /// - Chain rule: d/dx(f(g(x))) = f'(g(x))*g'(x)
    ///
    /// For multivariable functions, computes partial derivatives. The variable
    /// is matched by canonical name, so element handles (`var = "p[2]"`) and
    /// differentials (`var = "D(x)"`) differentiate as atomic leaves.
    ///
    /// # Arguments
    /// * `var` - Canonical variable name to differentiate with respect to
    ///
    /// # Returns
    /// New symbolic expression representing the derivative
    ///
    /// # Examples
    /// ```rust, ignore
    /// let x = Expr::Var("x".to_string());
    /// let f = x.clone().pow(Expr::Const(2.0)); // x^2
    /// let df_dx = f.diff("x"); // 2*x
    /// ```
    pub fn diff(&self, var: &str) -> Expr {
        match self {
            Expr::Var(name) => {
                if name == var {
                    Expr::Const(1.0)
                } else {
                    Expr::Const(0.0)
                }
            }
            Expr::Const(_) => Expr::Const(0.0),
            Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => {
                if self.canonical_name().as_deref() == Some(var) {
                    Expr::Const(1.0)
                } else {
                    Expr::Const(0.0)
                }
            }
            Expr::Call(op, args) => match op {
                Op::Add => args[0].diff(var) + args[1].diff(var),
                Op::Sub => args[0].diff(var) - args[1].diff(var),
                Op::Mul => {
                    args[0].diff(var) * args[1].clone() + args[0].clone() * args[1].diff(var)
                }
                Op::Div => {
                    (args[0].diff(var) * args[1].clone()
                        - args[1].diff(var) * args[0].clone())
                        / (args[1].clone() * args[1].clone())
                }
                Op::Pow => {
                    let base = args[0].clone();
                    let exponent = args[1].clone();
                    match &exponent {
                        // n * base^(n-1) * base'
                        Expr::Const(_) => {
                            exponent.clone()
                                * base
                                    .clone()
                                    .pow(exponent.clone() - Expr::Const(1.0))
                                * args[0].diff(var)
                        }
                        // base^exp * (exp' * ln(base) + exp * base' / base)
                        _ => {
                            base.clone().pow(exponent.clone())
                                * (args[1].diff(var) * base.clone().ln()
                                    + exponent * args[0].diff(var) / base)
                        }
                    }
                }
                Op::Neg => -args[0].diff(var),
                Op::Exp => args[0].clone().exp() * args[0].diff(var),
                Op::Ln => args[0].diff(var) / args[0].clone(),
                Op::Sqrt => {
                    args[0].diff(var)
                        / (Expr::Const(2.0) * args[0].clone().sqrt())
                }
                Op::sin => args[0].clone().cos() * args[0].diff(var),
                Op::cos => -(args[0].clone().sin()) * args[0].diff(var),
                Op::tg => {
                    args[0].diff(var)
                        / (args[0].clone().cos() * args[0].clone().cos())
                }
                // delayed values carry no dependence on current unknowns
                Op::Delay => Expr::Const(0.0),
                Op::Index | Op::Dt => unreachable!("handled above"),
            },
            Expr::Array(items) => Expr::Array(items.iter().map(|i| i.diff(var)).collect()),
        } // end of match
    } // end of diff

    /// SIMPLIFICATION

    /// Algebraic cleanup of the expression tree.
    ///
    /// Applies constant folding and identity rules recursively, bottom up.
    /// Deliberately light: it removes the noise differentiation leaves behind
    /// (x*1, x+0, 0*f(x)) without attempting polynomial collection.
    pub fn simplify_(&self) -> Expr {
        match self {
            Expr::Var(_) | Expr::Const(_) => self.clone(),
            Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => self.clone(),
            Expr::Call(op, args) => {
                let args: Vec<Expr> = args.iter().map(|a| a.simplify_()).collect();
                match op {
                    Op::Add => match (&args[0], &args[1]) {
                        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a + b),
                        (Expr::Const(0.0), _) => args[1].clone(), // 0 + x = x
                        (_, Expr::Const(0.0)) => args[0].clone(), // x + 0 = x
                        _ => Expr::Call(Op::Add, args),
                    },
                    Op::Sub => match (&args[0], &args[1]) {
                        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a - b),
                        (_, Expr::Const(0.0)) => args[0].clone(), // x - 0 = x
                        _ if args[0] == args[1] => Expr::Const(0.0), // x - x = 0
                        _ => Expr::Call(Op::Sub, args),
                    },
                    Op::Mul => match (&args[0], &args[1]) {
                        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a * b),
                        (Expr::Const(0.0), _) | (_, Expr::Const(0.0)) => Expr::Const(0.0), // 0 * x = 0
                        (Expr::Const(1.0), _) => args[1].clone(), // 1 * x = x
                        (_, Expr::Const(1.0)) => args[0].clone(), // x * 1 = x
                        _ => Expr::Call(Op::Mul, args),
                    },
                    Op::Div => match (&args[0], &args[1]) {
                        (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Expr::Const(a / b),
                        (Expr::Const(0.0), _) => Expr::Const(0.0), // 0 / x = 0
                        (_, Expr::Const(1.0)) => args[0].clone(),  // x / 1 = x
                        _ => Expr::Call(Op::Div, args),
                    },
                    Op::Pow => match (&args[0], &args[1]) {
                        (Expr::Const(a), Expr::Const(b)) => Expr::Const(a.powf(*b)),
                        (_, Expr::Const(1.0)) => args[0].clone(), // x ^ 1 = x
                        (_, Expr::Const(0.0)) => Expr::Const(1.0), // x ^ 0 = 1
                        _ => Expr::Call(Op::Pow, args),
                    },
                    Op::Neg => match &args[0] {
                        Expr::Const(a) => Expr::Const(-a),
                        Expr::Call(Op::Neg, inner) => inner[0].clone(), // -(-x) = x
                        _ => Expr::Call(Op::Neg, args),
                    },
                    Op::Exp | Op::Ln | Op::Sqrt | Op::sin | Op::cos | Op::tg => {
                        let folded = Expr::Call(*op, args.clone());
                        match folded.eval_constant() {
                            Some(val) => Expr::Const(val),
                            None => folded,
                        }
                    }
                    Op::Delay => Expr::Call(Op::Delay, args),
                    Op::Index | Op::Dt => unreachable!("handled above"),
                }
            }
            Expr::Array(items) => Expr::Array(items.iter().map(|i| i.simplify_()).collect()),
        } // end of match
    } // end of simplify_

    /// Public interface for expression simplification.
    ///
    /// Delegates to simplify_() but provides a stable API for future
    /// enhancements.
    pub fn simplify(&self) -> Expr {
        self.simplify_()
    }

    /// VARIABLE EXTRACTION

    /// Collects every canonical variable name referenced by the expression.
    ///
    /// Walks the tree and records plain variables, element handles and
    /// differentials by canonical name, sorted with duplicates removed.
    pub fn all_arguments_are_variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.visit(&mut |node| match node {
            Expr::Var(name) => vars.push(name.clone()),
            Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => {
                if let Some(name) = node.canonical_name() {
                    vars.push(name);
                }
            }
            _ => {}
        });
        vars.sort();
        vars.dedup();
        vars
    } // end of all_arguments_are_variables

    /// DIRECT EVALUATION

    /// Evaluates the expression against parallel variable/value lists.
    ///
    /// Straightforward recursive evaluation without closure creation - used
    /// for control checks and by tests to validate the compiled path. Panics
    /// when a referenced variable is missing from `vars`; production code paths
    /// validate coverage before evaluating.
    ///
    /// # Arguments
    /// * `vars` - Canonical variable names, one per value
    /// * `values` - Numeric values in the same order
    ///
    /// # Returns
    /// The numeric value of the expression
    pub fn eval_expression(&self, vars: Vec<&str>, values: &[f64]) -> f64 {
        match self {
            Expr::Var(_) | Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => {
                let name = self
                    .canonical_name()
                    .unwrap_or_else(|| panic!("not a variable handle: {}", self));
                let index = vars
                    .iter()
                    .position(|&v| v == name)
                    .unwrap_or_else(|| panic!("variable {} not found among {:?}", name, vars));
                values[index]
            }
            Expr::Const(val) => *val,
            Expr::Call(op, args) => {
                let evaluated: Vec<f64> = args
                    .iter()
                    .map(|a| a.eval_expression(vars.clone(), values))
                    .collect();
                match op {
                    Op::Add => evaluated[0] + evaluated[1],
                    Op::Sub => evaluated[0] - evaluated[1],
                    Op::Mul => evaluated[0] * evaluated[1],
                    Op::Div => evaluated[0] / evaluated[1],
                    Op::Pow => evaluated[0].powf(evaluated[1]),
                    Op::Neg => -evaluated[0],
                    Op::Exp => evaluated[0].exp(),
                    Op::Ln => evaluated[0].ln(),
                    Op::Sqrt => evaluated[0].sqrt(),
                    Op::sin => evaluated[0].sin(),
                    Op::cos => evaluated[0].cos(),
                    Op::tg => evaluated[0].tan(),
                    Op::Delay => panic!("delay terms require a history argument, not direct evaluation"),
                    Op::Index | Op::Dt => unreachable!("handled above"),
                }
            }
            Expr::Array(_) => panic!("eval_expression is scalar; evaluate array items separately"),
        } // end of match
    } // end of eval_expression
}
