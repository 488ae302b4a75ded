// Copyright (c)  by Gleb E. Zaslavkiy
//MIT License
#![allow(non_snake_case)]

use crate::numerical::NR::NR;
use crate::symbolic::symbolic_engine::Expr;
use crate::symbols;
use crate::system::build_function::FunctionBuilder;
use crate::system::equation_system::{Equation, NonlinearSystem, Variable};
use crate::system::equation_system_ODE::ODESystem;
use crate::system::problems::{NonlinearProblem, ProblemOps};
use crate::system::scc_decomposition::SplitParams;
use nalgebra::DVector;
use std::collections::HashMap;

#[allow(dead_code)]
pub fn sys_examples(example: usize) {
    match example {
        0 => {
            //use the shortest way to solve a declared system of equations
            // first declare unknowns and equations
            let (x, y) = symbols!(x, y);
            let sys = NonlinearSystem::new(
                "circle_line",
                vec![
                    Equation::from_residual(
                        x.clone() * x.clone() + y.clone() * y.clone() - Expr::Const(10.0),
                    ),
                    Equation::from_residual(x.clone() - y.clone() - Expr::Const(4.0)),
                ],
                vec![x.clone(), y.clone()],
                vec![],
            )
            .unwrap()
            .complete();
            // hand it to the solver and solve
            let mut NR_instanse = NR::new();
            NR_instanse.set_system(sys, HashMap::new(), vec![1.0, 1.0], 1e-6, 100);
            NR_instanse.solve();
            println!("result = {:?} \n", NR_instanse.get_result().unwrap());
            // or more verbose way...
            // generate the problem artifacts yourself and inspect them first
            let mut sys = NonlinearSystem::new(
                "circle_line",
                vec![
                    Equation::from_residual(
                        x.clone() * x.clone() + y.clone() * y.clone() - Expr::Const(10.0),
                    ),
                    Equation::from_residual(x.clone() - y.clone() - Expr::Const(4.0)),
                ],
                vec![x, y],
                vec![],
            )
            .unwrap()
            .complete();
            let problem = NonlinearProblem::new(&mut sys, &HashMap::new(), true).unwrap();
            println!("{}", problem.describe());
            for (i, row) in problem.jacobian.symbolic.iter().enumerate() {
                for (j, entry) in row.iter().enumerate() {
                    println!("J[{}][{}] = {}", i, j, entry);
                }
            }
            // in case you are interested in the Jacobian value at the initial guess
            let guess_jacobian = problem.jacobian_at(&DVector::from_vec(vec![1.0, 1.0]));
            println!("guess Jacobian = {:?} \n", guess_jacobian.try_inverse());
            // defining NR method instance and solving
            let mut NR_instanse = NR::new();
            NR_instanse.set_problem(problem);
            NR_instanse.main_loop();
            println!("result = {:?} \n", NR_instanse.get_result().unwrap());
        }

        1 => {
            // OBSERVED VARIABLES AND DERIVED PARAMETERS
            // w is eliminated through its observed definition, k is derived
            // from the bound constant c at generation time
            let (x, w, k, c) = symbols!(x, w, k, c);
            let mut sys = NonlinearSystem::new(
                "plant",
                vec![Equation::from_residual(
                    k.clone() * w.clone() * w.clone() - Expr::Const(27.0),
                )],
                vec![x.clone()],
                vec![],
            )
            .unwrap()
            .with_observed(vec![Equation::new(w, x + Expr::Const(1.0))])
            .unwrap()
            .with_parameter_dependencies(vec![Equation::new(k, c.clone() * Expr::Const(2.0))])
            .unwrap()
            .with_defaults(vec![(c, Expr::Const(1.5))])
            .complete();
            println!("unknowns  {:?}", sys.unknown_names());
            println!("observed  {:?}", sys.observed_names());
            println!("parameters {:?}", sys.parameter_names());

            // residual artifact: 3 * (x + 1)^2 - 27 vanishes at x = 2
            let residual = sys.generate_residual(&HashMap::new()).unwrap();
            let r = (residual.function)(&DVector::from_vec(vec![2.0]));
            println!("residual at x = 2: {:?}", r.as_slice());

            // jacobian artifact carries dense and sparse closures plus the bandwidth
            let jacobian = sys.generate_jacobian(&HashMap::new(), true).unwrap();
            println!("bandwidth = {:?}", jacobian.bandwidth);
            let u = DVector::from_vec(vec![2.0]);
            println!("dense J  = {}", (jacobian.dense)(&u));
            println!("sparse J has {} stored entries", (jacobian.sparse)(&u).nnz());

            // second derivatives, one matrix per equation
            let hessian = sys.generate_hessian(&HashMap::new(), true).unwrap();
            println!("H_0 = {}", (hessian.functions[0])(&u));
        }

        2 => {
            // ODE SYSTEM: dh/dt = (q_in - q_out) / A with observed q_out = k * h
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
            .with_defaults(vec![(area, Expr::Const(2.0))])
            .with_tspan(0.0, 0.5);

            let params = HashMap::from([("q_in".to_string(), 4.0), ("k".to_string(), 2.0)]);
            let rhs = ode.generate_rhs(&params).unwrap();
            let jac = ode.generate_rhs_jacobian(&params).unwrap();
            let u0 = DVector::from_vec(vec![1.0]);
            println!("f(0, h=1)  = {:?}", rhs(0.0, &u0).as_slice());
            println!("df/dh      = {}", jac(0.0, &u0));

            // march the tank level with explicit Euler just to see it move
            let mut u = u0;
            let mut time = 0.0;
            let dt = 0.1;
            for _ in 0..5 {
                let du = rhs(time, &u);
                u = &u + dt * du;
                time += dt;
                println!("t = {:.1}, h = {:.4}", time, u[0]);
            }
        }

        3 => {
            // HIERARCHY AND STAGED SOLVING
            // a child system referencing the parent unknown through a global
            // scope marker; after flattening the decomposition solves the
            // parent equation first and feeds the child stage through a cache
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
            .with_guesses(vec![(x, 2.0), (Expr::Var("tank.y".to_string()), 2.0)])
            .with_split_parameters()
            .complete()
            .structural_simplify()
            .unwrap();
            println!("flattened unknowns: {:?}", plant.unknown_names());

            let staged = plant.scc_problem().unwrap();
            println!("{}", staged.describe());
            for stage in &staged.stages {
                println!("stage '{}' over {:?}", stage.name, stage.unknown_names);
                for eq in &stage.symbolic {
                    println!("    0 = {}", eq);
                }
            }
            let mut NR_instanse = NR::new();
            let solution = NR_instanse
                .solve_staged(&staged, &SplitParams::empty())
                .unwrap();
            println!("staged solution = {:?} \n", solution.as_slice());
        }

        4 => {
            // CALLING CONVENTION OF GENERATED FUNCTIONS
            // grouped argument slices: unknowns first, then parameter buckets;
            // array parameters are laid out element by element
            let (p_elements, _p_names) = Expr::IndexedVars(3, "p");
            let x = Expr::Var("x".to_string());
            let total =
                p_elements[0].clone() + p_elements[1].clone() + p_elements[2].clone();
            let sys = NonlinearSystem::new(
                "summing",
                vec![Equation::from_residual(x.clone() - total)],
                vec![x],
                vec![Expr::Var("p".to_string())],
            )
            .unwrap()
            .with_variables(vec![Variable::array("p", 3)]);
            let built = FunctionBuilder::new(&sys).build(&sys.residuals()).unwrap();
            for group in &built.signature.groups {
                println!("group '{}': {:?}", group.name, group.layout);
            }
            let r = built.call(&[&[14.0], &[2.0, 4.0, 8.0]]);
            println!("residual = {:?}", r);

            // lagged unknowns are routed through a dedicated history group
            let (z, k, t) = symbols!(z, k, t);
            let lag = ODESystem::new(
                "lag",
                t,
                vec![Equation::new(
                    z.clone().dt(),
                    -(k.clone() * z.clone().delay(Expr::Const(1.0))),
                )],
                vec![z],
                vec![k],
            )
            .unwrap();
            let (differential, _) = lag.split_equations();
            let targets: Vec<Expr> = differential.into_iter().map(|(_, rhs)| rhs).collect();
            let built = FunctionBuilder::for_ode(&lag).build(&targets).unwrap();
            println!("groups with delays: {:?}", built.signature.group_names());
            for (slot, expr) in &built.delay_terms {
                println!("history slot {} <- {}", slot, expr);
            }
            let r = built.call(&[&[0.0], &[0.0], &[5.0], &[2.0]]);
            println!("rhs with delayed z = 5: {:?}", r);
        }

        _ => {
            println!("example not found");
        }
    }
    //_________________________________________________
}
