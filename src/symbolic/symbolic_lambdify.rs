use crate::symbolic::symbolic_engine::{Expr, Op};
const LAMBDIFY_METHOD: usize = 0;

impl Expr {
    /// LAMBDIFICATION - Converting Symbolic Expressions to Executable Functions

    /// Converts a single-variable symbolic expression into an executable Rust closure.
    ///
    /// This is the core method for numerical computation, transforming symbolic math
    /// into executable code. The resulting closure can be called repeatedly with
    /// different input values.
    ///
    /// # Returns
    /// Boxed closure that takes f64 input and returns f64 output
    ///
    /// # Examples
    /// ```rust, ignore
    /// let x = Expr::Var("x".to_string());
    /// let f = x.pow(Expr::Const(2.0)); // x^2
    /// let func = f.lambdify1D();
    /// assert_eq!(func(3.0), 9.0);
    /// ```
    pub fn lambdify1D(&self) -> Box<dyn Fn(f64) -> f64> {
        let vars = self.all_arguments_are_variables();
        if vars.len() == 1 {
            let var_name = &vars[0];
            let compiled_func = self.lambdify_borrowed_thread_safe(&[var_name]);
            Box::new(move |x| compiled_func(&[x]))
        } else if vars.is_empty() {
            // Constant expression
            let compiled_func = self.lambdify_borrowed_thread_safe(&[]);
            Box::new(move |_| compiled_func(&[]))
        } else {
            panic!(
                "lambdify1D can only be used with expressions containing exactly one variable, found: {:?}",
                vars
            );
        }
    } // end of lambdify1D

    #[inline(always)]
    pub fn lambdify_borrowed_thread_safe(
        &self,
        vars: &[&str],
    ) -> Box<dyn Fn(&[f64]) -> f64 + Send + Sync> {
        match LAMBDIFY_METHOD {
            0 => self.lambdify1(vars),

            _ => self.lambdify2(vars),
        }
    }

    /// Nested-closure strategy: each tree node becomes its own boxed closure.
    #[inline(always)]
    pub fn lambdify1(&self, vars: &[&str]) -> Box<dyn Fn(&[f64]) -> f64 + Send + Sync> {
        match self {
            Expr::Var(_) | Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => {
                let name = self
                    .canonical_name()
                    .unwrap_or_else(|| panic!("cannot lambdify non-variable handle: {}", self));
                let index = vars
                    .iter()
                    .position(|&v| v == name)
                    .unwrap_or_else(|| panic!("variable {} not found among {:?}", name, vars));
                Box::new(move |args| args[index])
            }
            Expr::Const(val) => {
                let val = *val;
                Box::new(move |_| val)
            }
            Expr::Call(op, args) => match op.arity() {
                2 => {
                    let lf = args[0].lambdify_borrowed_thread_safe(vars);
                    let rf = args[1].lambdify_borrowed_thread_safe(vars);
                    match op {
                        Op::Add => Box::new(move |a| lf(a) + rf(a)),
                        Op::Sub => Box::new(move |a| lf(a) - rf(a)),
                        Op::Mul => Box::new(move |a| lf(a) * rf(a)),
                        Op::Div => Box::new(move |a| lf(a) / rf(a)),
                        Op::Pow => Box::new(move |a| lf(a).powf(rf(a))),
                        Op::Delay => {
                            panic!("delay terms must be routed through a history argument before lambdification")
                        }
                        _ => unreachable!("binary op {:?}", op),
                    }
                }
                _ => {
                    let f = args[0].lambdify_borrowed_thread_safe(vars);
                    match op {
                        Op::Neg => Box::new(move |a| -f(a)),
                        Op::Exp => Box::new(move |a| f(a).exp()),
                        Op::Ln => Box::new(move |a| f(a).ln()),
                        Op::Sqrt => Box::new(move |a| f(a).sqrt()),
                        Op::sin => Box::new(move |a| f(a).sin()),
                        Op::cos => Box::new(move |a| f(a).cos()),
                        Op::tg => Box::new(move |a| f(a).tan()),
                        _ => unreachable!("unary op {:?}", op),
                    }
                }
            },
            Expr::Array(_) => panic!("lambdify is scalar; lambdify array items separately"),
        }
    } // end of lambdify1

    /// Convenience method that automatically detects variables and creates a closure.
    ///
    /// Extracts all variables from the expression and creates a lambdified function
    /// with variables ordered alphabetically. Eliminates need to manually specify
    /// variable names.
    ///
    /// # Returns
    /// Boxed closure where input vector positions correspond to alphabetically
    /// sorted variable names
    pub fn lambdify_wrapped(&self) -> Box<dyn Fn(Vec<f64>) -> f64 + '_> {
        let vars_ = self.all_arguments_are_variables();
        let vars = vars_.iter().map(|x| x.as_str()).collect::<Vec<&str>>();
        let clo = self.lambdify_borrowed_thread_safe(vars.as_slice());
        let y = Box::new(move |x: Vec<f64>| clo(x.as_slice()));
        y
    }

    /// Compiled-form strategy: lower to the slot-indexed Lambda IR, then close over it.
    #[inline(always)]
    pub fn lambdify2(&self, vars: &[&str]) -> Box<dyn Fn(&[f64]) -> f64 + Send + Sync> {
        let compiled = self.compile(vars);
        let closure = compiled.as_closure();
        Box::new(closure)
    } // end of lambdify2
}

/// Compiled form of a scalar expression: variables are slot indices into the
/// argument buffer, operations carry their children directly. One allocation
/// pass at compile time, no name lookups at evaluation time.
///
/// The code generation pipeline compiles every residual, Jacobian entry and
/// intermediate assignment to a Lambda; the argument buffer layout (inputs
/// first, then intermediate slots) is decided by the function builder.
#[derive(Clone, Debug)]
pub enum Lambda {
    Var(usize),
    Const(f64),
    Unary(Op, Box<Lambda>),
    Binary(Op, Box<Lambda>, Box<Lambda>),
}

impl Expr {
    /// Lowers the expression to the Lambda IR against a slot layout.
    ///
    /// Every variable handle (plain, element, differential) must appear in
    /// `vars` by canonical name; its position becomes the slot index. Panics
    /// naming the symbol otherwise - callers in the system layer validate
    /// coverage beforehand and report typed errors.
    pub fn compile(&self, vars: &[&str]) -> Lambda {
        match self {
            Expr::Var(_) | Expr::Call(Op::Index, _) | Expr::Call(Op::Dt, _) => {
                let name = self
                    .canonical_name()
                    .unwrap_or_else(|| panic!("cannot compile non-variable handle: {}", self));
                let idx = vars
                    .iter()
                    .position(|&v| v == name)
                    .unwrap_or_else(|| panic!("variable {} not found among {:?}", name, vars));
                Lambda::Var(idx)
            }
            Expr::Const(v) => Lambda::Const(*v),
            Expr::Call(Op::Delay, _) => {
                panic!("delay terms must be routed through a history argument before compilation")
            }
            Expr::Call(op, args) => match op.arity() {
                2 => Lambda::Binary(
                    *op,
                    Box::new(args[0].compile(vars)),
                    Box::new(args[1].compile(vars)),
                ),
                _ => Lambda::Unary(*op, Box::new(args[0].compile(vars))),
            },
            Expr::Array(_) => panic!("compile is scalar; compile array items separately"),
        }
    }
}

impl Lambda {
    #[inline(always)]
    pub fn eval(&self, args: &[f64]) -> f64 {
        match self {
            Lambda::Var(i) => args[*i],
            Lambda::Const(v) => *v,
            Lambda::Binary(op, a, b) => {
                let a = a.eval(args);
                let b = b.eval(args);
                match op {
                    Op::Add => a + b,
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    Op::Div => a / b,
                    Op::Pow => a.powf(b),
                    _ => unreachable!("binary op {:?}", op),
                }
            }
            Lambda::Unary(op, e) => {
                let e = e.eval(args);
                match op {
                    Op::Neg => -e,
                    Op::Exp => e.exp(),
                    Op::Ln => e.ln(),
                    Op::Sqrt => e.sqrt(),
                    Op::sin => e.sin(),
                    Op::cos => e.cos(),
                    Op::tg => e.tan(),
                    _ => unreachable!("unary op {:?}", op),
                }
            }
        }
    }

    /// Optional API for compatibility with previous closure-based code
    pub fn as_closure(self) -> impl Fn(&[f64]) -> f64 + Send + Sync {
        move |args| self.eval(args)
    }

    /// Number of argument slots the compiled form reads (max index + 1).
    pub fn slot_count(&self) -> usize {
        match self {
            Lambda::Var(i) => i + 1,
            Lambda::Const(_) => 0,
            Lambda::Binary(_, a, b) => a.slot_count().max(b.slot_count()),
            Lambda::Unary(_, e) => e.slot_count(),
        }
    }
}

impl Expr {
    //____________________________________________________________________________________________________________________________
    //                    INITIAL VALUE PROBLEM (IVP) SPECIALIZATION
    //____________________________________________________________________________________________________________________________

    /// Creates closure specialized for Initial Value Problems with time-dependent functions.
    ///
    /// In IVPs, functions typically have the form f(t, y1, y2, ...) where t is the
    /// independent variable (time) and y1, y2, ... are state variables. This method
    /// creates a closure that separates the time argument from state variables.
    ///
    /// # Arguments
    /// * `arg` - Independent variable name (typically time "t")
    /// * `vars` - State variable names in order
    ///
    /// # Returns
    /// Closure taking (time_value, state_vector) and returning f64
    ///
    /// # Usage
    /// Essential for ODE solvers where dy/dt = f(t, y)
    pub fn lambdify_IVP(
        &self,
        arg: &str,
        vars: Vec<&str>,
    ) -> Box<dyn Fn(f64, Vec<f64>) -> f64 + '_> {
        let mut x = vec![arg];
        x.extend(vars);

        let f = self.lambdify_borrowed_thread_safe(&x);

        let f_closure: Box<dyn Fn(f64, Vec<f64>) -> f64> = Box::new(move |x, y_vec| {
            let mut x_y_vec = vec![x];
            x_y_vec.extend(y_vec);

            f(x_y_vec.as_slice())
        });
        f_closure
    }
}
