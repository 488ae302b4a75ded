use log::info;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tabled::{builder::Builder, settings::Style};

pub fn elapsed_time(elapsed: Duration) -> (String, f64) {
    let time = elapsed.as_millis();
    if time < 1000 {
        info!("Elapsed {} ms", time);
        (" ms ".to_string(), time as f64)
    } else if time >= 1000 && time < 60_000 {
        info!("Elapsed {} s", elapsed.as_secs());
        (" s".to_string(), elapsed.as_secs() as f64)
    } else if time >= 60_000 && time < 3600_000 {
        info!("Elapsed {} min", elapsed.as_secs() / 60);
        (" min".to_string(), elapsed.as_secs() as f64 / 60.0)
    } else {
        info!("Elapsed {} h", elapsed.as_secs() / 3600);
        (" h".to_string(), elapsed.as_secs() as f64 / 3600.0)
    }
}

/// accumulates wall time per solver phase, tic/tac pairs bracket each phase
#[derive(Debug, Clone)]
pub struct CustomTimer {
    pub start: Instant,
    pub jac_time: Instant,
    pub jac: Duration,
    pub fun_time: Instant,
    pub fun: Duration,
    pub linear_system_time: Instant,
    pub linear_system: Duration,
    pub symbolic_operations_time: Instant,
    pub symbolic_operations: Duration,
    pub staging_time: Instant,
    pub staging: Duration,
}

impl CustomTimer {
    pub fn new() -> CustomTimer {
        CustomTimer {
            start: Instant::now(),
            jac_time: Instant::now(),
            jac: Duration::from_secs(0),
            fun_time: Instant::now(),
            fun: Duration::from_secs(0),
            linear_system_time: Instant::now(),
            linear_system: Duration::from_secs(0),
            symbolic_operations_time: Instant::now(),
            symbolic_operations: Duration::from_secs(0),
            staging_time: Instant::now(),
            staging: Duration::from_secs(0),
        }
    }
    pub fn start(&mut self) {
        self.start = Instant::now();
        self.jac_time = Instant::now();
        self.jac = Duration::from_secs(0);
        self.fun_time = Instant::now();
        self.fun = Duration::from_secs(0);
        self.linear_system_time = Instant::now();
        self.linear_system = Duration::from_secs(0);
        self.symbolic_operations_time = Instant::now();
        self.symbolic_operations = Duration::from_secs(0);
        self.staging_time = Instant::now();
        self.staging = Duration::from_secs(0);
    }
    pub fn jac_tic(&mut self) {
        self.jac_time = Instant::now();
    }

    pub fn jac_tac(&mut self) {
        let jac = self.jac_time.elapsed();
        self.jac += jac;
    }

    pub fn fun_tic(&mut self) {
        self.fun_time = Instant::now();
    }
    pub fn fun_tac(&mut self) {
        let fun = self.fun_time.elapsed();
        self.fun += fun;
    }
    pub fn append_to_fun_time(&mut self, fun: Duration) {
        self.fun += fun;
    }
    pub fn linear_system_tic(&mut self) {
        self.linear_system_time = Instant::now();
    }
    pub fn linear_system_tac(&mut self) {
        let linear_system = self.linear_system_time.elapsed();
        self.linear_system += linear_system;
    }
    pub fn append_to_linear_sys_time(&mut self, linear_system: Duration) {
        self.linear_system += linear_system;
    }
    pub fn symbolic_operations_tic(&mut self) {
        self.symbolic_operations_time = Instant::now();
    }
    pub fn symbolic_operations_tac(&mut self) {
        let symbolic_operations = self.symbolic_operations_time.elapsed();
        self.symbolic_operations += symbolic_operations;
    }
    pub fn staging_tic(&mut self) {
        self.staging_time = Instant::now();
    }
    pub fn staging_tac(&mut self) {
        let staging = self.staging_time.elapsed();
        self.staging += staging;
    }
    pub fn get_all(&self) -> HashMap<String, String> {
        let mut timer_data: HashMap<String, String> = HashMap::new();

        let total_time = self.start.elapsed().as_nanos() as f64;
        let total_time_string = elapsed_time(self.start.elapsed());

        let jac_total_string = elapsed_time(self.jac);
        let jac_total = self.jac.as_nanos() as f64;
        let jac_time_percent = 100.0 * jac_total / total_time;

        let fun_total = self.fun.as_nanos() as f64;
        let fun_time_percent = 100.0 * fun_total / total_time;
        let fun_total_string = elapsed_time(self.fun);

        let linear_system_total = self.linear_system.as_nanos() as f64;
        let linear_system_time_percent = 100.0 * linear_system_total / total_time;
        let linear_system_total_string = elapsed_time(self.linear_system);

        let symbolic_operations_total = self.symbolic_operations.as_nanos() as f64;
        let symbolic_operations_time_percent = 100.0 * symbolic_operations_total / total_time;
        let symbolic_operations_total_string = elapsed_time(self.symbolic_operations);

        let staging_total = self.staging.as_nanos() as f64;
        let staging_time_percent = 100.0 * staging_total / total_time;
        let staging_total_string = elapsed_time(self.staging);

        let other = total_time
            - jac_total
            - fun_total
            - linear_system_total
            - symbolic_operations_total
            - staging_total;

        let other_percent = 100.0 * other / total_time;

        if other_percent > 0.5 {
            timer_data.insert(
                "other %".to_string(),
                format!("{} ", (other_percent * 1000.0).round() / 1000.0),
            );
        }
        timer_data.insert(
            "time elapsed, ".to_string() + total_time_string.0.as_str(),
            format!("{}", total_time_string.1),
        );

        if staging_time_percent > 0.5 {
            timer_data.insert(
                "Staging (%, ".to_string() + staging_total_string.0.as_str() + ")",
                format!(
                    "{}, {}",
                    (staging_time_percent * 1000.0).round() / 1000.0,
                    staging_total_string.1
                ),
            );
        }
        if jac_time_percent > 0.5 {
            timer_data.insert(
                "Jacobian (%, ".to_string() + jac_total_string.0.as_str() + ")",
                format!(
                    "{}, {}",
                    (jac_time_percent * 1000.0).round() / 1000.0,
                    jac_total_string.1
                ),
            );
        }
        if fun_time_percent > 0.5 {
            timer_data.insert(
                "Function (%, ".to_string() + fun_total_string.0.as_str() + ")",
                format!(
                    "{}, {}",
                    (fun_time_percent * 1000.0).round() / 1000.0,
                    fun_total_string.1
                ),
            );
        }
        if linear_system_time_percent > 0.5 {
            timer_data.insert(
                "Linear System (%, ".to_string() + linear_system_total_string.0.as_str() + ")",
                format!(
                    "{}, {}",
                    (linear_system_time_percent * 1000.0).round() / 1000.0,
                    linear_system_total_string.1
                ),
            );
        }
        if symbolic_operations_time_percent > 0.5 {
            timer_data.insert(
                "Symbolic Operations (%, ".to_string()
                    + symbolic_operations_total_string.0.as_str()
                    + ")",
                format!(
                    "{}, {}",
                    (symbolic_operations_time_percent * 1000.0).round() / 1000.0,
                    symbolic_operations_total_string.1
                ),
            );
        }
        let mut table = Builder::from(timer_data.clone()).build();
        table.with(Style::modern_rounded());
        info!("\n \n TIMER DATA \n \n {}", table.to_string());
        timer_data
    }
}

impl Default for CustomTimer {
    fn default() -> Self {
        CustomTimer::new()
    }
}

//___________________________________TESTS____________________________________
