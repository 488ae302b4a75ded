use crate::symbolic::symbolic_engine::{Expr, Op};
use crate::{indexed_var, symbols};
//___________________________________TESTS____________________________________

mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_add_assign() {
        let mut expr = Expr::Var("x".to_string());
        expr += Expr::Const(2.0);
        let expected = Expr::Call(
            Op::Add,
            vec![Expr::Var("x".to_string()), Expr::Const(2.0)],
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_sub_assign() {
        let mut expr = Expr::Var("x".to_string());
        expr -= Expr::Const(2.0);
        let expected = Expr::Call(
            Op::Sub,
            vec![Expr::Var("x".to_string()), Expr::Const(2.0)],
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_mul_assign() {
        let mut expr = Expr::Var("x".to_string());
        expr *= Expr::Const(3.0);
        let expected = Expr::Call(
            Op::Mul,
            vec![Expr::Var("x".to_string()), Expr::Const(3.0)],
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_neg() {
        let expr = Expr::Var("x".to_string());
        let neg_expr = -expr;
        let expected = Expr::Call(Op::Neg, vec![Expr::Var("x".to_string())]);
        assert_eq!(neg_expr, expected);
    }

    #[test]
    fn test_symbols_macro() {
        let (x, y, z) = symbols!(x, y, z);
        assert_eq!(x, Expr::Var("x".to_string()));
        assert_eq!(y, Expr::Var("y".to_string()));
        assert_eq!(z, Expr::Var("z".to_string()));
    }

    #[test]
    fn test_symbols_from_string() {
        let vars = Expr::Symbols("a, b , c");
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[1], Expr::Var("b".to_string()));
    }

    #[test]
    fn test_display_forms() {
        let (x, y) = symbols!(x, y);
        let expr = (x.clone() + y.clone()) * x.clone();
        assert_eq!(format!("{}", expr), "((x + y) * x)");
        let p2 = indexed_var!(2, "p");
        assert_eq!(format!("{}", p2), "p[2]");
        let dx = x.clone().dt();
        assert_eq!(format!("{}", dx), "D(x)");
        let f = y.exp();
        assert_eq!(format!("{}", f), "exp(y)");
    }

    #[test]
    fn test_canonical_names() {
        let x = Expr::Var("x".to_string());
        assert_eq!(x.canonical_name().as_deref(), Some("x"));
        let p2 = Expr::IndexedVar(2, "p");
        assert_eq!(p2.canonical_name().as_deref(), Some("p[2]"));
        let dx = x.clone().dt();
        assert_eq!(dx.canonical_name().as_deref(), Some("D(x)"));
        let compound = x.clone() + Expr::Const(1.0);
        assert!(compound.canonical_name().is_none());
    }

    #[test]
    fn test_parse_indexed_name() {
        assert_eq!(
            Expr::parse_indexed_name("p[3]"),
            Some(("p".to_string(), 3))
        );
        assert_eq!(
            Expr::parse_indexed_name("tank.level[12]"),
            Some(("tank.level".to_string(), 12))
        );
        assert_eq!(Expr::parse_indexed_name("plain"), None);
        assert_eq!(Expr::parse_indexed_name("p[x]"), None);
    }

    #[test]
    fn test_indexed_vars_family() {
        let (handles, names) = Expr::IndexedVars(3, "u");
        assert_eq!(handles.len(), 3);
        assert_eq!(names, vec!["u[1]", "u[2]", "u[3]"]);
        assert_eq!(handles[2].as_index(), Some(("u".to_string(), 3)));
    }

    #[test]
    fn test_set_variable() {
        let (x, y) = symbols!(x, y);
        let expr = x.clone() * y.clone() + x.clone();
        let substituted = expr.set_variable("x", 2.0);
        assert_eq!(substituted.set_variable("y", 3.0).eval_constant(), Some(8.0));
    }

    #[test]
    fn test_set_variable_does_not_enter_element_handles() {
        // substituting the array name must not corrupt p[2]
        let p2 = Expr::IndexedVar(2, "p");
        let expr = p2.clone() + Expr::Var("p".to_string());
        let substituted = expr.set_variable("p", 5.0);
        let args = substituted.call_args().unwrap();
        assert_eq!(args[0], p2);
        assert_eq!(args[1], Expr::Const(5.0));
    }

    #[test]
    fn test_substitute_map_is_simultaneous() {
        let (x, y) = symbols!(x, y);
        let expr = x.clone() + y.clone();
        let mut map = std::collections::HashMap::new();
        map.insert("x".to_string(), y.clone());
        map.insert("y".to_string(), x.clone());
        let swapped = expr.substitute_map(&map);
        // x+y with x->y, y->x must give y+x, not x+x
        assert_eq!(swapped, y + x);
    }

    #[test]
    fn test_rename_variable() {
        let x = Expr::Var("x".to_string());
        let renamed = (x.clone() * x).rename_variable("x", "z");
        assert!(renamed.contains_variable("z"));
        assert!(!renamed.contains_variable("x"));
    }

    #[test]
    fn test_contains_variable_indexed() {
        let p1 = Expr::IndexedVar(1, "p");
        let expr = p1 * Expr::Var("x".to_string());
        assert!(expr.contains_variable("p[1]"));
        assert!(!expr.contains_variable("p[2]"));
        assert!(expr.contains_variable("x"));
    }

    #[test]
    fn test_eval_constant() {
        let expr = (Expr::Const(2.0) + Expr::Const(3.0)) * Expr::Const(4.0);
        assert_eq!(expr.eval_constant(), Some(20.0));
        let with_var = Expr::Const(2.0) + Expr::Var("x".to_string());
        assert_eq!(with_var.eval_constant(), None);
    }

    #[test]
    fn test_op_arity_covers_every_operation() {
        for op in Op::iter() {
            let arity = op.arity();
            assert!(arity == 1 || arity == 2, "unexpected arity for {:?}", op);
            if op.infix_symbol().is_some() {
                assert_eq!(arity, 2);
            }
        }
    }

    //___________________________________DIFFERENTIATION____________________________________

    #[test]
    fn test_diff_power_rule() {
        let x = Expr::Var("x".to_string());
        let f = x.clone().pow(Expr::Const(3.0)); // x^3
        let df = f.diff("x");
        let func = df.lambdify1D();
        assert_eq!(func(2.0), 12.0); // 3 * 2^2
    }

    #[test]
    fn test_diff_product_rule() {
        let (x, y) = symbols!(x, y);
        let f = x.clone() * y.clone();
        let df_dx = f.diff("x").simplify_();
        assert_eq!(df_dx, y);
    }

    #[test]
    fn test_diff_quotient_rule() {
        let x = Expr::Var("x".to_string());
        let f = Expr::Const(1.0) / x.clone(); // 1/x
        let df = f.diff("x");
        let func = df.lambdify1D();
        assert!((func(2.0) - (-0.25)).abs() < 1e-12); // -1/x^2
    }

    #[test]
    fn test_diff_chain_rule_exp() {
        let x = Expr::Var("x".to_string());
        let f = (x.clone() * Expr::Const(2.0)).exp(); // exp(2x)
        let df = f.diff("x");
        let func = df.lambdify1D();
        assert!((func(0.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_diff_trig() {
        let x = Expr::Var("x".to_string());
        let f = x.clone().sin();
        let df = f.diff("x");
        let func = df.lambdify1D();
        assert!((func(0.0) - 1.0).abs() < 1e-12); // cos(0)
        let g = x.clone().cos();
        let dg = g.diff("x");
        let func = dg.lambdify1D();
        assert!((func(std::f64::consts::PI / 2.0) - (-1.0)).abs() < 1e-12); // -sin(pi/2)
    }

    #[test]
    fn test_diff_sqrt() {
        let x = Expr::Var("x".to_string());
        let f = x.clone().sqrt();
        let df = f.diff("x");
        let func = df.lambdify1D();
        assert!((func(4.0) - 0.25).abs() < 1e-12); // 1/(2*sqrt(4))
    }

    #[test]
    fn test_diff_variable_exponent() {
        let x = Expr::Var("x".to_string());
        let f = Expr::Const(2.0).pow(x.clone()); // 2^x
        let df = f.diff("x");
        let func = df.lambdify1D();
        assert!((func(1.0) - 2.0 * 2.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_diff_indexed_leaf() {
        let p1 = Expr::IndexedVar(1, "p");
        let p2 = Expr::IndexedVar(2, "p");
        let f = p1.clone() * p2.clone();
        assert_eq!(f.diff("p[1]").simplify_(), p2);
        assert_eq!(f.diff("q[1]").simplify_(), Expr::Const(0.0));
    }

    #[test]
    fn test_diff_delay_is_opaque() {
        let (x, tau) = symbols!(x, tau);
        let f = x.clone().delay(tau) + x.clone();
        assert_eq!(f.diff("x").simplify_(), Expr::Const(1.0));
    }

    //___________________________________SIMPLIFICATION____________________________________

    #[test]
    fn test_simplify_identities() {
        let x = Expr::Var("x".to_string());
        assert_eq!((x.clone() + Expr::Const(0.0)).simplify_(), x);
        assert_eq!((x.clone() * Expr::Const(1.0)).simplify_(), x);
        assert_eq!((x.clone() * Expr::Const(0.0)).simplify_(), Expr::Const(0.0));
        assert_eq!((x.clone() - x.clone()).simplify_(), Expr::Const(0.0));
        assert_eq!((x.clone() / Expr::Const(1.0)).simplify_(), x);
        assert_eq!(x.clone().pow(Expr::Const(1.0)).simplify_(), x);
        assert_eq!(x.clone().pow(Expr::Const(0.0)).simplify_(), Expr::Const(1.0));
    }

    #[test]
    fn test_simplify_constant_folding() {
        let expr = (Expr::Const(2.0) * Expr::Const(3.0) + Expr::Const(4.0)).simplify_();
        assert_eq!(expr, Expr::Const(10.0));
        let folded_fn = Expr::Const(0.0).exp().simplify_();
        assert_eq!(folded_fn, Expr::Const(1.0));
    }

    #[test]
    fn test_simplify_double_negation() {
        let x = Expr::Var("x".to_string());
        assert_eq!((-(-x.clone())).simplify_(), x);
    }

    #[test]
    fn test_eval_expression_matches_lambdify() {
        let (x, y) = symbols!(x, y);
        let expr = x.clone().pow(Expr::Const(2.0)) * y.clone().sin() + y.clone() / x.clone();
        let direct = expr.eval_expression(vec!["x", "y"], &[1.5, 0.7]);
        let func = expr.lambdify_borrowed_thread_safe(&["x", "y"]);
        let compiled = func(&[1.5, 0.7]);
        assert!((direct - compiled).abs() < 1e-14);
    }
}
