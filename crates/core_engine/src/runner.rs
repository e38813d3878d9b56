//! Run-type orchestration
//!
//! Builds the problem from parsed settings and executes one of the four run
//! types: a forward simulation with time-series output, a single
//! forward+adjoint gradient evaluation, a full optimization, or nothing.

use crate::config::{RunType, Settings};
use crate::error::{EngineError, Result};
use crate::log_info;
use crate::optim_driver::{OptimStatus, OptimizerDriver};
use crate::optim_problem::OptimProblem;
use crate::output::Output;
use crate::runtime::Runtime;
use ndarray::Array1;
use serde::Serialize;
use std::cell::RefCell;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub runtype: String,
    pub objective: f64,
    pub fidelity: f64,
    pub gnorm: f64,
    pub iterations: usize,
    pub status: Option<OptimStatus>,
}

pub fn run(settings: &Settings) -> Result<RunSummary> {
    let runtime = Runtime::new(settings.np_init, settings.np_braid)?;
    let mut output = Output::new(settings, &runtime)?;
    let mut problem = OptimProblem::new(settings, runtime)?;

    match settings.runtype {
        RunType::Nothing => Ok(RunSummary {
            runtype: "nothing".into(),
            objective: 0.0,
            fidelity: 0.0,
            gnorm: 0.0,
            iterations: 0,
            status: None,
        }),
        RunType::Simulation => run_simulation(settings, &mut problem, &mut output),
        RunType::Gradient => run_gradient(settings, &mut problem, &mut output),
        RunType::Optimization => run_optimization(settings, &mut problem, output),
    }
}

fn run_simulation(
    settings: &Settings,
    problem: &mut OptimProblem,
    output: &mut Output,
) -> Result<RunSummary> {
    let x0 = problem.get_starting_point()?;
    let dt = problem.stepper.dt();
    output.write_controls(&problem.meq, settings.ntime, dt, "init")?;
    output.write_params(&x0, "param_init.dat")?;

    let ninit = problem.initconds.ninit();
    let mut contributions = Vec::with_capacity(ninit);
    let mut rho0 = Array1::zeros(problem.meq.state_len());
    for iinit in 0..ninit {
        problem.initconds.assemble(iinit, &mut rho0)?;
        output.open_data_files(&problem.meq, problem.initconds.init_id(iinit), ninit)?;
        problem.stepper.solve(&mut problem.meq, rho0.clone())?;
        for (step, state) in problem.stepper.trajectory().iter().enumerate() {
            output.write_data_line(&problem.meq, step, step as f64 * dt, state)?;
        }
        output.close_data_files();
        let final_state = problem
            .stepper
            .final_state()
            .ok_or_else(|| EngineError::Internal("no final state after solve".into()))?;
        contributions.push(problem.target.eval(&problem.meq, final_state, &rho0));
    }
    let favg = Runtime::tree_sum(&contributions) / ninit as f64;
    log_info!("runner", "simulation finished: objective {:1.8e}", favg);

    Ok(RunSummary {
        runtype: "simulation".into(),
        objective: favg,
        fidelity: 1.0 - favg,
        gnorm: 0.0,
        iterations: 0,
        status: None,
    })
}

fn run_gradient(
    settings: &Settings,
    problem: &mut OptimProblem,
    output: &mut Output,
) -> Result<RunSummary> {
    let x0 = problem.get_starting_point()?;
    let dt = problem.stepper.dt();
    output.write_controls(&problem.meq, settings.ntime, dt, "init")?;

    let (n, _) = problem.get_prob_sizes();
    let mut grad = vec![0.0; n];
    let objective = problem.eval_grad_f(&x0, &mut grad)?;
    output.write_gradient(&grad)?;
    let gnorm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
    log_info!(
        "runner",
        "gradient finished: objective {:1.8e}, ||grad|| {:1.8e}",
        objective,
        gnorm
    );

    Ok(RunSummary {
        runtype: "gradient".into(),
        objective,
        fidelity: problem.fidelity(),
        gnorm,
        iterations: 0,
        status: None,
    })
}

fn run_optimization(
    settings: &Settings,
    problem: &mut OptimProblem,
    mut output: Output,
) -> Result<RunSummary> {
    let x0 = problem.get_starting_point()?;
    let ntime = settings.ntime;
    let dt = problem.stepper.dt();
    output.open_optim_file()?;
    output.write_controls(&problem.meq, ntime, dt, "init")?;
    output.write_params(&x0, "param_init.dat")?;

    let monitor = output.optim_monitor_freq;
    let printlevel = settings.optim_printlevel;
    let output = RefCell::new(output);

    let driver = OptimizerDriver::new(settings.optim_maxiter, settings.optim_tol);
    let result = driver.run(
        problem,
        x0,
        |prob, info| {
            if printlevel > 0 {
                log_info!(
                    "optimizer",
                    "iter {:4}: obj {:1.8e}, fidelity {:1.6}, ||grad|| {:1.4e}",
                    info.iter,
                    info.objective,
                    info.fidelity,
                    info.gnorm
                );
            }
            let mut out = output.borrow_mut();
            out.write_optim_line(
                info.iter,
                info.objective,
                info.fidelity,
                info.gnorm,
                info.inf_du,
                info.ls_trials,
            );
            if info.iter > 0 && info.iter % monitor == 0 {
                let tag = format!("iter{:04}", info.iter);
                if let Err(e) = out.write_controls(&prob.meq, ntime, dt, &tag) {
                    crate::logging::warn("runner", format!("skipping control dump: {}", e));
                }
                if let Err(e) = out.write_params(&info.x, &format!("param_{}.dat", tag)) {
                    crate::logging::warn("runner", format!("skipping parameter dump: {}", e));
                }
            }
            true
        },
        |prob, res| {
            let out = output.borrow_mut();
            if let Err(e) = out.write_params(&res.x, "param_optimized.dat") {
                crate::logging::warn("runner", format!("skipping parameter dump: {}", e));
            }
            if let Err(e) = out.write_controls(&prob.meq, ntime, dt, "optimized") {
                crate::logging::warn("runner", format!("skipping control dump: {}", e));
            }
        },
    )?;

    log_info!(
        "runner",
        "optimization finished after {} iterations: objective {:1.8e}, fidelity {:1.6}",
        result.iterations,
        result.objective,
        result.fidelity
    );

    Ok(RunSummary {
        runtype: "optimization".into(),
        objective: result.objective,
        fidelity: result.fidelity,
        gnorm: result.gnorm,
        iterations: result.iterations,
        status: Some(result.status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn settings(dir: &str, runtype: &str) -> Settings {
        let content = format!(
            "
            ntime = 20
            total_time = 1.0
            noscillators = 1
            nspline = 5
            nlevels_0 = 2
            ground_freq_0 = 4.1
            carrier_frequencies_0 = 0.0
            initialcondition_type = pure
            optim_initialcondition = 0
            optim_objective = gate, xgate
            optim_maxiter = 3
            runtype = {}
            datadir = {}
            ",
            runtype, dir
        );
        Settings::from_config(&Config::parse(&content).unwrap()).unwrap()
    }

    #[test]
    fn test_simulation_run_writes_series() {
        let dir = std::env::temp_dir().join("qce_runner_sim");
        let _ = std::fs::remove_dir_all(&dir);
        let s = settings(dir.to_str().unwrap(), "simulation");
        let summary = run(&s).unwrap();
        assert_eq!(summary.runtype, "simulation");
        assert!((summary.objective - 1.0).abs() < 1e-9);
        assert!(dir.join("expected_0.dat").exists());
        assert!(dir.join("control_init_00.dat").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_gradient_run_writes_gradient() {
        let dir = std::env::temp_dir().join("qce_runner_grad");
        let _ = std::fs::remove_dir_all(&dir);
        let s = settings(dir.to_str().unwrap(), "gradient");
        let summary = run(&s).unwrap();
        assert_eq!(summary.runtype, "gradient");
        assert!(dir.join("grad.dat").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_optimization_run_writes_history() {
        let dir = std::env::temp_dir().join("qce_runner_opt");
        let _ = std::fs::remove_dir_all(&dir);
        let s = settings(dir.to_str().unwrap(), "optimization");
        let summary = run(&s).unwrap();
        assert_eq!(summary.runtype, "optimization");
        assert!(summary.status.is_some());
        assert!(dir.join("optim.dat").exists());
        assert!(dir.join("param_optimized.dat").exists());
        assert!(dir.join("control_optimized_00.dat").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_nothing_run() {
        let s = settings("/tmp/qce_runner_nothing", "nothing");
        let summary = run(&s).unwrap();
        assert_eq!(summary.runtype, "nothing");
    }
}
