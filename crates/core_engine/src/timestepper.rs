//! Implicit midpoint time integration, forward and adjoint
//!
//! One forward step solves
//!
//!   (I - dt/2 M(t_{n+1/2})) rho_{n+1} = (I + dt/2 M(t_{n+1/2})) rho_n
//!
//! and records rho_{n+1} as a dense checkpoint. The adjoint step is the
//! exact discrete adjoint of that solve: with (I - dt/2 M^T) w = rho_bar_{n+1},
//!
//!   rho_bar_n = (I + dt/2 M^T) w
//!   theta_bar += dt/2 * w^T (dM/dtheta)(rho_n + rho_{n+1})

use crate::error::{EngineError, Result};
use crate::linsolve::{gmres, neumann, LinearSolverConfig, LinearSolverType};
use crate::log_warn;
use crate::mastereq::MasterEq;
use ndarray::Array1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperPhase {
    Ready,
    Stepping,
    Done,
    AdjointReady,
    AdjointStepping,
    AdjointDone,
}

pub struct TimeStepper {
    ntime: usize,
    total_time: f64,
    dt: f64,
    solver: LinearSolverConfig,
    trajectory: Vec<Array1<f64>>,
    phase: StepperPhase,
}

impl TimeStepper {
    pub fn new(ntime: usize, total_time: f64, solver: LinearSolverConfig) -> Result<Self> {
        if ntime == 0 {
            return Err(EngineError::config("ntime must be positive"));
        }
        if total_time <= 0.0 {
            return Err(EngineError::config("total_time must be positive"));
        }
        Ok(TimeStepper {
            ntime,
            total_time,
            dt: total_time / ntime as f64,
            solver,
            trajectory: Vec::new(),
            phase: StepperPhase::Ready,
        })
    }

    pub fn ntime(&self) -> usize {
        self.ntime
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    pub fn phase(&self) -> StepperPhase {
        self.phase
    }

    /// Checkpointed states rho_0 .. rho_n of the last forward solve.
    pub fn trajectory(&self) -> &[Array1<f64>] {
        &self.trajectory
    }

    pub fn final_state(&self) -> Option<&Array1<f64>> {
        match self.phase {
            StepperPhase::Ready => None,
            _ => self.trajectory.last(),
        }
    }

    /// Cancellation from any state: free the checkpoint buffer.
    pub fn reset(&mut self) {
        self.trajectory = Vec::new();
        self.phase = StepperPhase::Ready;
    }

    /// Integrate from rho0 to the final time, recording checkpoints.
    pub fn solve(&mut self, meq: &mut MasterEq, rho0: Array1<f64>) -> Result<&Array1<f64>> {
        self.solve_observed(meq, rho0, |_, _, _| Ok(()))
    }

    /// Like `solve`, calling the observer with (step index, time, state) for
    /// every recorded state including the initial one.
    pub fn solve_observed<F>(
        &mut self,
        meq: &mut MasterEq,
        rho0: Array1<f64>,
        mut observer: F,
    ) -> Result<&Array1<f64>>
    where
        F: FnMut(usize, f64, &Array1<f64>) -> Result<()>,
    {
        self.reset();
        self.phase = StepperPhase::Stepping;
        self.trajectory.reserve(self.ntime + 1);
        observer(0, 0.0, &rho0)?;
        self.trajectory.push(rho0);

        for n in 0..self.ntime {
            let t_half = (n as f64 + 0.5) * self.dt;
            let next = self.step_forward(meq, t_half, &self.trajectory[n])?;
            observer(n + 1, (n + 1) as f64 * self.dt, &next)?;
            self.trajectory.push(next);
        }
        self.phase = StepperPhase::Done;
        self.trajectory
            .last()
            .ok_or_else(|| EngineError::Internal("empty trajectory after forward solve".into()))
    }

    fn step_forward(&self, meq: &mut MasterEq, t_half: f64, state: &Array1<f64>) -> Result<Array1<f64>> {
        meq.assemble(t_half)?;
        let gamma = 0.5 * self.dt;
        let mut mx = Array1::zeros(state.len());
        meq.apply(state, &mut mx);
        let mut rhs = state.clone();
        rhs.scaled_add(gamma, &mx);
        self.solve_implicit(meq, &rhs, false)
    }

    /// Solve (I - dt/2 M) x = rhs, or the transposed system.
    fn solve_implicit(&self, meq: &MasterEq, rhs: &Array1<f64>, transpose: bool) -> Result<Array1<f64>> {
        let gamma = 0.5 * self.dt;
        let len = rhs.len();
        let implicit = |x: &Array1<f64>| {
            let mut out = Array1::zeros(len);
            if transpose {
                meq.apply_implicit_transpose(x, &mut out, gamma);
            } else {
                meq.apply_implicit(x, &mut out, gamma);
            }
            out
        };

        match self.solver.solver {
            LinearSolverType::Neumann => {
                let scaled = |x: &Array1<f64>| {
                    let mut out = Array1::zeros(len);
                    if transpose {
                        meq.apply_transpose(x, &mut out);
                    } else {
                        meq.apply(x, &mut out);
                    }
                    out * gamma
                };
                match neumann(scaled, rhs, self.solver.maxiter, self.solver.tol) {
                    Ok(x) => Ok(x),
                    Err(EngineError::SolverDiverged(reason)) => {
                        log_warn!("timestepper", "Neumann series rejected ({}), falling back to GMRES", reason);
                        gmres(implicit, rhs, self.solver.restart, self.solver.maxiter.max(200), self.solver.tol)
                    }
                    Err(e) => Err(e),
                }
            }
            LinearSolverType::Gmres => {
                match gmres(&implicit, rhs, self.solver.restart, self.solver.maxiter, self.solver.tol) {
                    Ok(x) => Ok(x),
                    Err(EngineError::SolverDiverged(reason)) => {
                        // One retry with an enlarged Krylov space, then give up.
                        log_warn!("timestepper", "GMRES diverged ({}), retrying with restart {}", reason, 2 * self.solver.restart);
                        gmres(implicit, rhs, 2 * self.solver.restart, 2 * self.solver.maxiter, self.solver.tol)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Transition Done -> AdjointReady; the trajectory stays available for replay.
    pub fn begin_adjoint(&mut self) -> Result<()> {
        if self.phase != StepperPhase::Done {
            return Err(EngineError::Internal(format!(
                "begin_adjoint in phase {:?}",
                self.phase
            )));
        }
        self.phase = StepperPhase::AdjointReady;
        Ok(())
    }

    /// One reverse step n+1 -> n. Consumes rho_bar_{n+1}, produces rho_bar_n
    /// and accumulates this step's parameter gradient contribution.
    pub fn adjoint_step(
        &mut self,
        meq: &mut MasterEq,
        n: usize,
        rho_bar_next: &Array1<f64>,
        grad: &mut [f64],
    ) -> Result<Array1<f64>> {
        match self.phase {
            StepperPhase::AdjointReady | StepperPhase::AdjointStepping => {}
            other => {
                return Err(EngineError::Internal(format!(
                    "adjoint_step in phase {:?}",
                    other
                )))
            }
        }
        self.phase = StepperPhase::AdjointStepping;

        let t_half = (n as f64 + 0.5) * self.dt;
        meq.assemble(t_half)?;
        let gamma = 0.5 * self.dt;

        let w = self.solve_implicit(meq, rho_bar_next, true)?;

        let mut mtw = Array1::zeros(w.len());
        meq.apply_transpose(&w, &mut mtw);
        let mut rho_bar = w.clone();
        rho_bar.scaled_add(gamma, &mtw);

        let y = &self.trajectory[n] + &self.trajectory[n + 1];
        meq.apply_param_deriv(&y, &w, t_half, gamma, grad)?;

        Ok(rho_bar)
    }

    pub fn finish_adjoint(&mut self) -> Result<()> {
        match self.phase {
            StepperPhase::AdjointReady | StepperPhase::AdjointStepping => {
                self.phase = StepperPhase::AdjointDone;
                Ok(())
            }
            other => Err(EngineError::Internal(format!(
                "finish_adjoint in phase {:?}",
                other
            ))),
        }
    }
}
