#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
///____________________________________________________________________________________________________________________________
/// # Symbolic engine
/// a module
/// 1) builds symbolic expressions from variables, constants and operations
/// 2) differentiates and simplifies them analytically
/// 3) turns a symbolic expression into a Rust function
///# Example#
/// ```
/// use RustedModelKit::symbolic::symbolic_engine::Expr;
/// let vars = Expr::Symbols("x, y");
/// let (x, y) = (vars[0].clone(), vars[1].clone());
/// let f = x.clone() * x.clone() + y.clone();
/// // differentiate with respect to x and y
/// let df_dx = f.diff("x").simplify_();
/// let df_dy = f.diff("y").simplify_();
/// println!("df_dx = {}, df_dy = {}", df_dx, df_dy);
/// // convert symbolic expression to a Rust function and evaluate the function
/// let function_of_x_and_y = f.lambdify_borrowed_thread_safe(&["x", "y"]);
/// let f_res = function_of_x_and_y(&[2.0, 1.0]);
/// assert_eq!(f_res, 5.0);
/// // return vec of all arguments
/// let all = f.all_arguments_are_variables();
/// println!("all arguments are variables {:?}", all);
/// ```
/// Example2#
/// ```
/// use RustedModelKit::symbolic::symbolic_engine::Expr;
/// // array element handles are individually addressable variables
/// let (p_elements, p_names) = Expr::IndexedVars(3, "p");
/// let expr = p_elements[0].clone() + p_elements[2].clone();
/// assert_eq!(p_names[0], "p[1]");
/// let func = expr.lambdify_borrowed_thread_safe(&["p[1]", "p[2]", "p[3]"]);
/// assert_eq!(func(&[10.0, 20.0, 30.0]), 40.0);
/// ```
/// ________________________________________________________________________________________________________________________________________________
pub mod symbolic_engine;
pub mod symbolic_engine_derivatives;
///________________________________________________________________________________________________________________________________________________
/// compiled slot-indexed form of symbolic expressions and closure generation
/// ________________________________________________________________________________________________________________________________________________
pub mod symbolic_lambdify;
#[cfg(test)]
pub mod symbolic_engine_tests;
