use crate::symbolic::symbolic_engine::Expr;
use crate::symbols;
use crate::system::build_function::FunctionBuilder;
use crate::system::equation_system::{Equation, NonlinearSystem, Variable};
use crate::system::equation_system_ODE::ODESystem;
use crate::system::scc_decomposition::{CacheBuffers, SplitParams, StageProblem};
//___________________________________TESTS____________________________________

mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;
    use std::collections::HashMap;

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
    fn test_inferred_parameters_flow_into_generated_functions() {
        let (x, k) = symbols!(x, k);
        let sys = NonlinearSystem::from_equations(
            "plant",
            vec![Equation::from_residual(k.clone() * x.clone() - Expr::Const(6.0))],
            vec![x],
        )
        .unwrap()
        .complete();
        assert_eq!(sys.parameter_names(), vec!["k"]);
        let artifact = sys
            .generate_residual(&HashMap::from([("k".to_string(), 2.0)]))
            .unwrap();
        let r = (artifact.function)(&DVector::from_vec(vec![3.0]));
        assert_eq!(r.as_slice(), &[0.0]);
    }

    #[test]
    fn test_observed_chain_dissolves_in_generated_residual() {
        let (x, y) = symbols!(x, y);
        let sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(
                y.clone() * y.clone() - Expr::Const(9.0),
            )],
            vec![x.clone()],
            vec![],
        )
        .unwrap()
        .with_observed(vec![Equation::new(y, x + Expr::Const(1.0))])
        .unwrap()
        .complete();
        let artifact = sys.generate_residual(&HashMap::new()).unwrap();
        // (x + 1)^2 - 9 vanishes exactly at x = 2
        let r = (artifact.function)(&DVector::from_vec(vec![2.0]));
        assert_eq!(r.as_slice(), &[0.0]);
    }

    #[test]
    fn test_flattened_hierarchy_solves_in_stages() {
        let (x, y) = symbols!(x, y);
        let tank = NonlinearSystem::new(
            "tank",
            vec![Equation::from_residual(y.clone() - x.clone())],
            vec![y],
            vec![],
        )
        .unwrap()
        .with_variables(vec![Variable::new("x").global_scope()]);
        let plant = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(
                x.clone() * x.clone() - Expr::Const(1.0),
            )],
            vec![x.clone()],
            vec![],
        )
        .unwrap()
        .with_systems(vec![tank])
        .unwrap()
        .flatten()
        .with_guesses(vec![
            (x, 2.0),
            (Expr::Var("tank.y".to_string()), 2.0),
        ])
        .with_split_parameters()
        .complete()
        .structural_simplify()
        .unwrap();
        assert_eq!(plant.unknown_names(), vec!["x", "tank.y"]);

        let staged = plant.scc_problem().unwrap();
        assert_eq!(staged.n_stages(), 2);
        assert_eq!(staged.stages[1].unknown_names, vec!["tank.y"]);
        assert!(staged.stages[1].symbolic[0].to_string().contains("__cache_r_0"));

        let params = SplitParams::empty();
        let caches = staged.fresh_caches();
        let mut solutions: Vec<DVector<f64>> = Vec::new();
        for (writer, stage) in staged.writers.iter().zip(&staged.stages) {
            writer.write(&solutions, &params, &caches);
            solutions.push(newton(stage, &params, &caches));
        }
        assert_abs_diff_eq!(solutions[0][0], 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(solutions[1][0], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_ode_rhs_with_observed_and_defaulted_parameters() {
        let (h, q_in, q_out, k, t) = symbols!(h, q_in, q_out, k, t);
        let area = Expr::Var("A".to_string());
        let ode = ODESystem::new(
            "drain",
            t,
            vec![Equation::new(
                h.clone().dt(),
                (q_in.clone() - q_out.clone()) / area.clone(),
            )],
            vec![h.clone()],
            vec![q_in, k.clone()],
        )
        .unwrap()
        .with_observed(vec![Equation::new(q_out, k * h)])
        .unwrap()
        .with_defaults(vec![(area, Expr::Const(2.0))]);

        let params = HashMap::from([("q_in".to_string(), 4.0), ("k".to_string(), 2.0)]);
        let rhs = ode.generate_rhs(&params).unwrap();
        let u = DVector::from_vec(vec![1.0]);
        assert_abs_diff_eq!(rhs(0.0, &u)[0], 1.0, epsilon = 1e-12);

        let jac = ode.generate_rhs_jacobian(&params).unwrap();
        assert_abs_diff_eq!(jac(0.0, &u)[(0, 0)], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_delay_terms_route_through_the_history_group() {
        let (x, k, t) = symbols!(x, k, t);
        let ode = ODESystem::new(
            "lag",
            t,
            vec![Equation::new(
                x.clone().dt(),
                -(k.clone() * x.clone().delay(Expr::Const(1.0))),
            )],
            vec![x],
            vec![k],
        )
        .unwrap();
        assert!(ode.has_delay());

        let (differential, _) = ode.split_equations();
        let targets: Vec<Expr> = differential.into_iter().map(|(_, rhs)| rhs).collect();
        let built = FunctionBuilder::for_ode(&ode).build(&targets).unwrap();
        assert!(built.has_delays());
        assert_eq!(built.delay_terms.len(), 1);
        assert_eq!(built.delay_terms[0].0, "__delay_1");
        assert_eq!(
            built.signature.group_names(),
            vec!["t", "unknowns", "delays", "p"]
        );

        // history value 5.0 enters through the delay group
        let out = built.call(&[&[0.0], &[0.0], &[5.0], &[2.0]]);
        assert_eq!(out, vec![-10.0]);
    }

    #[test]
    fn test_array_parameters_bind_elementwise() {
        let x = Expr::Var("x".to_string());
        let (p_elements, _) = Expr::IndexedVars(3, "p");
        let weighted = p_elements[0].clone()
            + Expr::Const(2.0) * p_elements[1].clone()
            + Expr::Const(3.0) * p_elements[2].clone();
        let sys = NonlinearSystem::new(
            "plant",
            vec![Equation::from_residual(x.clone() - weighted)],
            vec![x],
            vec![Expr::Var("p".to_string())],
        )
        .unwrap()
        .with_variables(vec![Variable::array("p", 3)])
        .complete();

        let params = HashMap::from([
            ("p[1]".to_string(), 1.0),
            ("p[2]".to_string(), 2.0),
            ("p[3]".to_string(), 3.0),
        ]);
        let artifact = sys.generate_residual(&params).unwrap();
        let r = (artifact.function)(&DVector::from_vec(vec![14.0]));
        assert_eq!(r.as_slice(), &[0.0]);
    }

    #[test]
    fn test_identical_declarations_build_interchangeable_problems() {
        let build = || {
            let (x, y) = symbols!(x, y);
            NonlinearSystem::new(
                "plant",
                vec![
                    Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
                    Equation::from_residual(y.clone() - x.clone()),
                ],
                vec![x, y],
                vec![],
            )
            .unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first, second);
        assert!(!first.structurally_identical(&second));

        let prep = |sys: NonlinearSystem| {
            sys.with_split_parameters()
                .complete()
                .structural_simplify()
                .unwrap()
                .scc_problem()
                .unwrap()
        };
        let staged_a = prep(first);
        let staged_b = prep(second);
        assert_eq!(staged_a.n_stages(), staged_b.n_stages());
        let params = SplitParams::empty();
        let (ca, cb) = (staged_a.fresh_caches(), staged_b.fresh_caches());
        let u = DVector::from_vec(vec![3.0]);
        assert_eq!(
            staged_a.stages[0].residual(&u, &params, &ca),
            staged_b.stages[0].residual(&u, &params, &cb)
        );
    }
}
