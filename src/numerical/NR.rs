use crate::Utils::solver_utils::{CustomTimer, elapsed_time};
use crate::system::equation_system::NonlinearSystem;
use crate::system::problems::NonlinearProblem;
use crate::system::scc_decomposition::{SCCNonlinearProblem, SplitParams};
use log::{error, info, warn};
use nalgebra::{DMatrix, DVector, Matrix};
use simplelog::*;
use std::collections::HashMap;
use std::error::Error;
use std::time::Instant;
use tabled::{builder::Builder, settings::Style};

/// Damped Newton-Raphson solver over the generated residual and Jacobian
/// artifacts of a [`NonlinearSystem`].
///
///  Example#1
/// ```
/// use RustedModelKit::numerical::NR::NR;
/// use RustedModelKit::symbolic::symbolic_engine::Expr;
/// use RustedModelKit::system::equation_system::{Equation, NonlinearSystem};
/// use nalgebra::DVector;
/// use std::collections::HashMap;
/// // the shortest way: declare the system, hand it to the solver
/// let x = Expr::Var("x".to_string());
/// let y = Expr::Var("y".to_string());
/// let sys = NonlinearSystem::new(
///     "circle_line",
///     vec![
///         Equation::from_residual(
///             x.clone() * x.clone() + y.clone() * y.clone() - Expr::Const(10.0),
///         ),
///         Equation::from_residual(x.clone() - y.clone() - Expr::Const(4.0)),
///     ],
///     vec![x, y],
///     vec![],
/// )
/// .unwrap()
/// .complete();
/// let mut NR_instanse = NR::new();
/// NR_instanse.set_system(sys, HashMap::new(), vec![1.0, 1.0], 1e-6, 100);
/// NR_instanse.eq_generate();
/// NR_instanse.main_loop();
/// let solution = NR_instanse.get_result().unwrap();
/// assert!((solution - DVector::from_vec(vec![3.0, -1.0])).norm() < 1e-6);
/// println!("result = {:?} \n", NR_instanse.get_result().unwrap());
/// ```
/// Example#2
/// ```
/// // or more verbose way...
/// use RustedModelKit::numerical::NR::NR;
/// use RustedModelKit::symbolic::symbolic_engine::Expr;
/// use RustedModelKit::system::equation_system::{Equation, NonlinearSystem};
/// use nalgebra::DVector;
/// use std::collections::HashMap;
/// let x = Expr::Var("x".to_string());
/// let y = Expr::Var("y".to_string());
/// let sys = NonlinearSystem::new(
///     "circle_line",
///     vec![
///         Equation::from_residual(
///             x.clone() * x.clone() + y.clone() * y.clone() - Expr::Const(10.0),
///         ),
///         Equation::from_residual(x.clone() - y.clone() - Expr::Const(4.0)),
///     ],
///     vec![x.clone(), y.clone()],
///     vec![],
/// )
/// .unwrap()
/// .with_guesses(vec![(x, 1.0), (y, 1.0)])
/// .complete();
/// let mut NR_instanse = NR::new();
/// // empty guess falls back to the guesses declared on the system
/// NR_instanse.set_system(sys, HashMap::new(), vec![], 1e-6, 100);
/// NR_instanse.set_solver_params(Some("error".to_string()), Some("lu".to_string()), None);
/// let solution = NR_instanse.solve().unwrap();
/// assert!((solution - DVector::from_vec(vec![3.0, -1.0])).norm() < 1e-6);
/// ```
pub struct NR {
    pub problem: Option<NonlinearProblem>, // generated residual + jacobian artifacts
    pub system: Option<NonlinearSystem>, // declarative model the artifacts are generated from
    pub parameter_values: HashMap<String, f64>, // numeric values for the system parameters
    pub values: Vec<String>,             // vector of unknowns
    pub initial_guess: Vec<f64>,         // initial guess
    pub tolerance: f64,                  // tolerance
    pub max_iterations: usize,           // max number of iterations

    max_error: f64, // max error
    pub dumping_factor: f64,
    pub i: usize,                     // iteration counter
    pub jac: DMatrix<f64>,            // jacobian matrix
    pub fun_vector: DVector<f64>,     // vector of functions
    pub result: Option<DVector<f64>>, // result of the iteration

    pub loglevel: Option<String>,
    pub linear_sys_method: Option<String>, // method for solving linear system
    pub custom_timer: CustomTimer,
    calc_statistics: HashMap<String, usize>,
}

impl NR {
    pub fn new() -> NR {
        NR {
            problem: None,
            system: None,
            parameter_values: HashMap::new(),
            values: Vec::new(),
            initial_guess: Vec::new(),
            tolerance: 1e-6,
            max_iterations: 100,
            max_error: 0.0,
            dumping_factor: 1.0,
            i: 0,
            jac: DMatrix::zeros(0, 0),
            fun_vector: DVector::zeros(0),
            result: None,
            loglevel: Some("info".to_string()),
            linear_sys_method: Some("lu".to_string()),
            custom_timer: CustomTimer::new(),
            calc_statistics: HashMap::new(),
        }
    }
    ////////////////////////////SETTERS///////////////////////////////////////////////////////////////////
    /// Basic method to hand a declared system to the solver. An empty initial
    /// guess falls back to the guesses declared on the system itself.
    pub fn set_system(
        &mut self,
        system: NonlinearSystem,
        parameter_values: HashMap<String, f64>,
        initial_guess: Vec<f64>,
        tolerance: f64,
        max_iterations: usize,
    ) {
        self.values = system.unknown_names();
        self.system = Some(system);
        self.parameter_values = parameter_values;
        self.initial_guess = initial_guess;
        self.tolerance = tolerance;
        self.max_iterations = max_iterations;
        assert!(
            !self.values.is_empty(),
            "No unknowns found in the equations."
        );
        assert!(
            tolerance >= 0.0,
            "Tolerance should be a non-negative number."
        );
        assert!(
            max_iterations > 0,
            "Max iterations should be a positive number."
        );
    }

    /// Injects ready-made artifacts, skipping generation inside the solver.
    pub fn set_problem(&mut self, problem: NonlinearProblem) {
        self.values = problem.unknowns.clone();
        if self.initial_guess.is_empty() {
            self.initial_guess = problem.initial_guess.as_slice().to_vec();
        }
        self.problem = Some(problem);
    }

    pub fn set_solver_params(
        &mut self,
        loglevel: Option<String>,
        linear_sys_method: Option<String>,
        damping_factor: Option<f64>,
    ) {
        self.loglevel = if let Some(level) = loglevel {
            assert!(
                level == "debug"
                    || level == "info"
                    || level == "warn"
                    || level == "error"
                    || level == "off"
                    || level == "none",
                "loglevel must be debug/info, warn or error"
            );
            Some(level.to_string())
        } else {
            self.loglevel.clone()
        };
        self.linear_sys_method = if let Some(method) = linear_sys_method {
            let method = method.to_lowercase();
            assert!(
                method == "lu" || method == "inv",
                "linear_sys_method must be lu or inv"
            );

            Some(method.to_string())
        } else {
            self.linear_sys_method.clone()
        };
        self.dumping_factor = if let Some(dumping_factor) = damping_factor {
            assert!(
                dumping_factor >= 0.0 && dumping_factor <= 1.0,
                "Dumping factor should be between 0.0 and 1.0."
            );
            dumping_factor
        } else {
            self.dumping_factor
        };
    }
    pub fn set_tolerance(&mut self, tolerance: f64) {
        assert!(
            tolerance >= 0.0,
            "Tolerance should be a non-negative number."
        );
        self.tolerance = tolerance;
    }
    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        assert!(
            max_iterations > 0,
            "Max iterations should be a positive number."
        );
        self.max_iterations = max_iterations;
    }
    pub fn set_initial_guess(&mut self, initial_guess: Vec<f64>) {
        assert!(
            !initial_guess.is_empty(),
            "Initial guess should not be empty."
        );
        self.initial_guess = initial_guess;
    }
    /// Generates the residual and Jacobian artifacts from the stored system.
    pub fn eq_generate(&mut self) {
        let sys = self
            .system
            .as_mut()
            .expect("a system must be set before eq_generate");
        let problem = NonlinearProblem::new(sys, &self.parameter_values, true)
            .unwrap_or_else(|err| panic!("{}", err));
        if self.initial_guess.is_empty() {
            self.initial_guess = problem.initial_guess.as_slice().to_vec();
        }
        assert_eq!(
            problem.unknowns.len(),
            self.initial_guess.len(),
            "Initial guess and vector of unknowns should have the same length."
        );
        self.values = problem.unknowns.clone();
        self.problem = Some(problem);
    }
    /////////////////////////////////////////////////////////////////////////////////////////////
    //                ITERATIONS
    /////////////////////////////////////////////////////////////////////////////////////////////
    // Newton-Raphson method
    /// realize iteration of Newton-Raphson - calculate new iteration vector by using Jacobian matrix
    pub fn iteration(&mut self, x: DVector<f64>) -> DVector<f64> {
        let method = self.linear_sys_method.clone().unwrap();
        let problem = self
            .problem
            .as_ref()
            .expect("eq_generate must be called before iterating");
        // evaluate jacobian and residual functions
        self.custom_timer.jac_tic();
        let new_j = problem.jacobian_at(&x);
        self.custom_timer.jac_tac();
        self.custom_timer.fun_tic();
        let new_f = problem.residual_at(&x);
        self.custom_timer.fun_tac();
        assert!(!new_j.is_empty(), "Jacobian should not be empty.");
        assert!(!new_f.is_empty(), "Functions should not be empty.");
        self.custom_timer.linear_system_tic();
        self.jac = new_j.clone();
        self.fun_vector = new_f.clone();
        let delta = Self::solve_linear_system(method, &new_j, &new_f).unwrap();

        let lambda = self.dumping_factor;
        let new_x: DVector<f64> = x - lambda * delta;

        self.custom_timer.linear_system_tac();

        new_x
    }
    /// main function to solve the system of equations
    pub fn main_loop(&mut self) -> Option<DVector<f64>> {
        let x = self.initial_guess.clone();
        let mut x = DVector::from_vec(x);
        self.result = Some(x.clone()); // save into result in case the very first iteration
        while self.i < self.max_iterations {
            let new_x = self.iteration(x.clone());

            let dx: DVector<f64> = new_x.clone() - x;
            let error = Matrix::norm(&dx);
            if (error > self.max_error) && (self.i > 0) {
                warn!("Error is increasing");
            }
            self.max_error = error;
            if error < self.tolerance {
                self.result = Some(new_x.clone());
                self.max_error = error;
                return Some(new_x);
            } else {
                x = new_x;
                self.i += 1;
                info!("iteration = {}, error = {}", self.i, error)
            }
        }
        error!("Maximum number of iterations reached. No solution found.");
        None
    }
    ////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
    //                                       main functions to start the solver and caclulate statistics
    ////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
    //

    pub fn solver(&mut self) -> Option<DVector<f64>> {
        self.custom_timer.start();
        self.custom_timer.symbolic_operations_tic();
        if self.system.is_some() {
            self.eq_generate();
        }
        assert!(
            self.problem.is_some(),
            "set_system or set_problem must be called before solving"
        );
        self.custom_timer.symbolic_operations_tac();
        let begin = Instant::now();
        let res = self.main_loop();
        self.custom_timer.get_all();
        let end = begin.elapsed();
        elapsed_time(end);
        let time = end.as_secs_f64() as usize;

        self.calc_statistics
            .insert("time elapsed, s".to_string(), time);
        self.calc_statistics();

        self.result = res;
        self.result.clone()
    }
    // wrapper around solver function to implement logging
    pub fn solve(&mut self) -> Option<DVector<f64>> {
        let is_logging_disabled = self
            .loglevel
            .as_ref()
            .map(|level| level == "off" || level == "none")
            .unwrap_or(false);

        if is_logging_disabled {
            let res = self.solver();
            res
        } else {
            let loglevel = self.loglevel.clone();
            let log_option = if let Some(level) = loglevel {
                match level.as_str() {
                    "debug" => LevelFilter::Debug,
                    "info" => LevelFilter::Info,
                    "warn" => LevelFilter::Warn,
                    "error" => LevelFilter::Error,
                    _ => panic!("loglevel must be debug, info, warn or error"),
                }
            } else {
                LevelFilter::Info
            };
            println!(" \n \n Program started with loglevel: {}", log_option);
            let logger_instance = CombinedLogger::init(vec![TermLogger::new(
                log_option,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            )]);

            match logger_instance {
                Ok(()) => {
                    let res = self.solver();
                    info!(" \n \n Program ended");
                    res
                }
                Err(_) => {
                    let res = self.solver();
                    res
                } //end Error
            } // end match
        }
    }
    ////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
    //                                       staged solve over an SCC decomposition
    ////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

    /// Solves a staged decomposition honoring the stage order: run the cache
    /// writer for stage i, then Newton-iterate stage i over its own unknowns.
    /// Returns the whole-system solution assembled in declaration order.
    pub fn solve_staged(
        &mut self,
        staged: &SCCNonlinearProblem,
        params: &SplitParams,
    ) -> Option<DVector<f64>> {
        let method = self.linear_sys_method.clone().unwrap();
        self.custom_timer.start();
        let begin = Instant::now();
        let caches = staged.fresh_caches();
        let n_total: usize = staged.stages.iter().map(|s| s.n_vars()).sum();
        let mut full = DVector::zeros(n_total);
        let mut names: Vec<String> = vec![String::new(); n_total];
        let mut solutions: Vec<DVector<f64>> = Vec::with_capacity(staged.n_stages());
        for (stage_index, stage) in staged.stages.iter().enumerate() {
            self.custom_timer.staging_tic();
            staged.writers[stage_index].write(&solutions, params, &caches);
            self.custom_timer.staging_tac();

            let mut x = stage.initial_guess.clone();
            let mut converged = false;
            for iter in 0..self.max_iterations {
                self.custom_timer.jac_tic();
                let new_j = stage.jacobian(&x, params, &caches);
                self.custom_timer.jac_tac();
                self.custom_timer.fun_tic();
                let new_f = stage.residual(&x, params, &caches);
                self.custom_timer.fun_tac();
                self.jac = new_j.clone();
                self.fun_vector = new_f.clone();
                self.custom_timer.linear_system_tic();
                let delta = match Self::solve_linear_system(method.clone(), &new_j, &new_f) {
                    Ok(delta) => delta,
                    Err(err) => {
                        error!("stage '{}': linear solve failed: {}", stage.name, err);
                        return None;
                    }
                };
                let lambda = self.dumping_factor;
                let new_x: DVector<f64> = x.clone() - lambda * delta;
                self.custom_timer.linear_system_tac();
                let dx = new_x.clone() - x;
                let error = Matrix::norm(&dx);
                x = new_x;
                self.i += 1;
                if error < self.tolerance {
                    info!(
                        "stage '{}' converged after {} iterations, error = {}",
                        stage.name,
                        iter + 1,
                        error
                    );
                    converged = true;
                    break;
                }
            }
            if !converged {
                error!(
                    "stage '{}' did not converge in {} iterations",
                    stage.name, self.max_iterations
                );
                return None;
            }
            for (local, global) in stage.var_indices.iter().enumerate() {
                full[*global] = x[local];
                names[*global] = stage.unknown_names[local].clone();
            }
            solutions.push(x);
        }
        self.values = names;
        self.custom_timer.get_all();
        let end = begin.elapsed();
        elapsed_time(end);
        let time = end.as_secs_f64() as usize;
        self.calc_statistics
            .insert("time elapsed, s".to_string(), time);
        self.calc_statistics();
        self.result = Some(full.clone());
        Some(full)
    } // end of solve_staged

    pub fn get_result(&self) -> Option<DVector<f64>> {
        self.result.clone()
    }
    fn calc_statistics(&self) {
        let mut stats = self.calc_statistics.clone();
        let jac = &self.jac;
        let jac_shape = jac.shape();
        stats.insert(
            "number of jacobian elements".to_string(),
            jac_shape.0 * jac_shape.1,
        );

        stats.insert("length of y vector".to_string(), self.values.len() as usize);
        stats.insert("number of iterations".to_string(), self.i as usize);
        let mut table = Builder::from(stats).build();
        table.with(Style::modern_rounded());
        info!("\n \n CALC STATISTICS \n \n {}", table.to_string());
    }
    //////////////////////////////////////////////////////////////////////////////////////////////
    //                 LINEAR SYSTEM SOLVERS
    //////////////////////////////////////////////////////////////////////////////////////////////

    pub fn solve_linear_system(
        solver: String,
        A: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> Result<DVector<f64>, Box<dyn Error>> {
        match solver.as_str() {
            "lu" => {
                let lu = A.clone().lu();
                let x = lu.solve(&b);
                match x {
                    Some(x) => Ok(x),
                    None => Err(Box::new(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "Failed to solve the system",
                    ))),
                }
            }
            "inv" => {
                let A_inv = A.clone().try_inverse().unwrap();
                let f = A_inv * b;
                Ok(f)
            }
            _ => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Failed to solve the system",
            ))),
        } // match solver.as_str()
    }
}

impl Default for NR {
    fn default() -> Self {
        NR::new()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////////////////////
//                                     TESTS
////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
#[test]
fn test_NR_set_system() {
    use crate::symbolic::symbolic_engine::Expr;
    use crate::system::equation_system::{Equation, NonlinearSystem};
    let x = Expr::Var("x".to_string());
    let y = Expr::Var("y".to_string());
    let sys = NonlinearSystem::new(
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
    let initial_guess = vec![1.0, 1.0];
    let mut NR_instanse = NR::new();
    NR_instanse.set_system(sys, HashMap::new(), initial_guess, 1e-6, 100);
    NR_instanse.eq_generate();
    NR_instanse.main_loop();
    let solution = NR_instanse.get_result().unwrap();
    assert!((solution - DVector::from_vec(vec![3.0, -1.0])).norm() < 1e-6);
}

#[test]
fn test_NR_guess_from_declarations() {
    use crate::symbolic::symbolic_engine::Expr;
    use crate::system::equation_system::{Equation, NonlinearSystem};
    let x = Expr::Var("x".to_string());
    let y = Expr::Var("y".to_string());
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
    .with_guesses(vec![(x, 1.0), (y, 1.0)])
    .complete();
    let mut NR_instanse = NR::new();
    // empty guess falls back to the guesses declared on the system
    NR_instanse.set_system(sys, HashMap::new(), vec![], 1e-6, 100);
    NR_instanse.eq_generate();
    assert_eq!(NR_instanse.initial_guess, vec![1.0, 1.0]);
    NR_instanse.main_loop();
    let solution = NR_instanse.get_result().unwrap();
    assert!((solution - DVector::from_vec(vec![3.0, -1.0])).norm() < 1e-6);
}

#[test]
fn test_NR_with_parameters() {
    use crate::symbolic::symbolic_engine::Expr;
    use crate::system::equation_system::{Equation, NonlinearSystem};
    let x = Expr::Var("x".to_string());
    let a = Expr::Var("a".to_string());
    let sys = NonlinearSystem::new(
        "shifted_root",
        vec![Equation::from_residual(x.clone() - a.clone())],
        vec![x],
        vec![a],
    )
    .unwrap()
    .complete();
    let mut NR_instanse = NR::new();
    let parameter_values = HashMap::from([("a".to_string(), 3.0)]);
    NR_instanse.set_system(sys, parameter_values, vec![0.0], 1e-6, 100);
    NR_instanse.eq_generate();
    NR_instanse.main_loop();
    let solution = NR_instanse.get_result().unwrap();
    assert!((solution[0] - 3.0).abs() < 1e-6);
}

#[test]
fn test_NR_set_problem() {
    use crate::symbolic::symbolic_engine::Expr;
    use crate::system::equation_system::{Equation, NonlinearSystem};
    let x = Expr::Var("x".to_string());
    let mut sys = NonlinearSystem::new(
        "cube",
        vec![Equation::from_residual(
            x.clone() * x.clone() * x.clone() - Expr::Const(8.0),
        )],
        vec![x.clone()],
        vec![],
    )
    .unwrap()
    .with_guesses(vec![(x, 3.0)])
    .complete();
    let problem = NonlinearProblem::new(&mut sys, &HashMap::new(), true).unwrap();
    let mut NR_instanse = NR::new();
    NR_instanse.set_problem(problem);
    assert_eq!(NR_instanse.initial_guess, vec![3.0]);
    NR_instanse.main_loop();
    let solution = NR_instanse.get_result().unwrap();
    assert!((solution[0] - 2.0).abs() < 1e-6);
}

#[test]
fn test_NR_set_system_with_features() {
    use crate::symbolic::symbolic_engine::Expr;
    use crate::system::equation_system::{Equation, NonlinearSystem};
    let x = Expr::Var("x".to_string());
    let y = Expr::Var("y".to_string());
    let sys = NonlinearSystem::new(
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
    let initial_guess = vec![1.0, 1.0];
    let mut NR_instanse = NR::new();
    NR_instanse.set_system(sys, HashMap::new(), initial_guess, 1e-6, 100);
    NR_instanse.set_solver_params(Some("info".to_string()), Some("inv".to_string()), Some(1.0));
    NR_instanse.solve();
    let solution = NR_instanse.get_result().unwrap();
    println!("solution: {:?}", solution);

    assert!((solution - DVector::from_vec(vec![3.0, -1.0])).norm() < 1e-6);
}

#[test]
fn test_NR_solve_staged() {
    use crate::symbolic::symbolic_engine::Expr;
    use crate::system::equation_system::{Equation, NonlinearSystem};
    let x = Expr::Var("x".to_string());
    let y = Expr::Var("y".to_string());
    let sys = NonlinearSystem::new(
        "cascade",
        vec![
            Equation::from_residual(x.clone() * x.clone() - Expr::Const(1.0)),
            Equation::from_residual(y.clone() - x.clone()),
        ],
        vec![x.clone(), y.clone()],
        vec![],
    )
    .unwrap()
    .with_guesses(vec![(x, 2.0), (y, 2.0)])
    .with_split_parameters()
    .complete()
    .structural_simplify()
    .unwrap();
    let staged = sys.scc_problem().unwrap();
    assert_eq!(staged.n_stages(), 2);
    let mut NR_instanse = NR::new();
    let solution = NR_instanse
        .solve_staged(&staged, &SplitParams::empty())
        .unwrap();
    assert!((solution - DVector::from_vec(vec![1.0, 1.0])).norm() < 1e-6);
    assert_eq!(NR_instanse.values, vec!["x", "y"]);
}

#[test]
fn test_NR_sqrt_two() {
    use crate::symbolic::symbolic_engine::Expr;
    use crate::system::equation_system::{Equation, NonlinearSystem};
    let x = Expr::Var("x".to_string());
    let sys = NonlinearSystem::new(
        "sqrt2",
        vec![Equation::from_residual(
            x.clone() * x.clone() - Expr::Const(2.0),
        )],
        vec![x],
        vec![],
    )
    .unwrap()
    .complete();
    let mut NR_instanse = NR::new();
    NR_instanse.set_system(sys, HashMap::new(), vec![1.0], 1e-6, 100);
    NR_instanse.set_tolerance(1e-10);
    NR_instanse.set_max_iterations(50);
    NR_instanse.set_initial_guess(vec![1.5]);
    NR_instanse.eq_generate();
    let solution = NR_instanse.main_loop().unwrap();
    assert!((solution[0] - 2.0_f64.sqrt()).abs() < 1e-9);
}
