//! Box-constrained quasi-Newton driver
//!
//! L-BFGS two-loop recursion with gradient projection onto the box and a
//! backtracking Armijo line search along the projected path. Progress is
//! reported through the iterate callback (returning false stops the run);
//! the solution callback fires once at the end.

use crate::error::Result;
use crate::log_info;
use crate::optim_problem::OptimProblem;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptimStatus {
    Converged,
    MaxIter,
    UserStop,
    LineSearchFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimResult {
    pub x: Vec<f64>,
    pub objective: f64,
    pub fidelity: f64,
    pub gnorm: f64,
    pub iterations: usize,
    pub status: OptimStatus,
}

/// Per-iteration report passed to the iterate callback.
#[derive(Debug, Clone, Serialize)]
pub struct IterInfo {
    pub iter: usize,
    pub objective: f64,
    pub fidelity: f64,
    pub gnorm: f64,
    /// Infinity norm of the projected gradient step, the stationarity measure
    pub inf_du: f64,
    pub ls_trials: usize,
    pub x: Vec<f64>,
}

pub struct OptimizerDriver {
    pub maxiter: usize,
    pub gtol: f64,
    /// L-BFGS history length
    pub history: usize,
}

impl OptimizerDriver {
    pub fn new(maxiter: usize, gtol: f64) -> Self {
        OptimizerDriver {
            maxiter,
            gtol,
            history: 10,
        }
    }

    pub fn run<C, S>(
        &self,
        problem: &mut OptimProblem,
        x0: Vec<f64>,
        mut iterate_cb: C,
        mut solution_cb: S,
    ) -> Result<OptimResult>
    where
        C: FnMut(&OptimProblem, &IterInfo) -> bool,
        S: FnMut(&OptimProblem, &OptimResult),
    {
        let (lower, upper) = problem.get_vars_info();
        let n = x0.len();
        let clip = |x: &mut Vec<f64>| {
            for i in 0..n {
                x[i] = x[i].clamp(lower[i], upper[i]);
            }
        };

        let mut x = x0;
        clip(&mut x);
        let mut g = vec![0.0; n];
        let mut f = problem.eval_grad_f(&x, &mut g)?;

        let mut s_hist: VecDeque<Vec<f64>> = VecDeque::with_capacity(self.history);
        let mut y_hist: VecDeque<Vec<f64>> = VecDeque::with_capacity(self.history);

        let mut status = OptimStatus::MaxIter;
        let mut iter = 0;
        let mut ls_trials = 0;

        loop {
            let inf_du = projected_gradient_norm(&x, &g, &lower, &upper);
            let info = IterInfo {
                iter,
                objective: f,
                fidelity: problem.fidelity(),
                gnorm: norm2(&g),
                inf_du,
                ls_trials,
                x: x.clone(),
            };
            if !iterate_cb(problem, &info) {
                status = OptimStatus::UserStop;
                break;
            }
            if inf_du <= self.gtol {
                status = OptimStatus::Converged;
                break;
            }
            if iter >= self.maxiter {
                status = OptimStatus::MaxIter;
                break;
            }

            let mut d = two_loop_direction(&g, &s_hist, &y_hist);
            if dot(&d, &g) >= 0.0 {
                // Not a descent direction: restart from steepest descent
                s_hist.clear();
                y_hist.clear();
                d = g.iter().map(|gi| -gi).collect();
            }

            // Backtracking Armijo search along the projected path
            let c1 = 1e-4;
            let mut alpha = 1.0;
            let mut accepted = None;
            ls_trials = 0;
            for _ in 0..30 {
                ls_trials += 1;
                let mut x_new: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + alpha * di).collect();
                clip(&mut x_new);
                let step: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
                let gs = dot(&g, &step);
                if gs < 0.0 {
                    let f_new = problem.eval_f(&x_new)?;
                    if f_new <= f + c1 * gs {
                        accepted = Some(x_new);
                        break;
                    }
                }
                alpha *= 0.5;
            }
            let x_new = match accepted {
                Some(x_new) => x_new,
                None => {
                    log_info!("optimizer", "line search failed at iteration {}", iter);
                    status = OptimStatus::LineSearchFailed;
                    break;
                }
            };

            let mut g_new = vec![0.0; n];
            let f_new = problem.eval_grad_f(&x_new, &mut g_new)?;

            let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
            let sy = dot(&s, &y);
            if sy > 1e-10 * norm2(&s) * norm2(&y) {
                if s_hist.len() == self.history {
                    s_hist.pop_front();
                    y_hist.pop_front();
                }
                s_hist.push_back(s);
                y_hist.push_back(y);
            }

            x = x_new;
            g = g_new;
            f = f_new;
            iter += 1;
        }

        // A rejected line-search trial may have left its design in the
        // oscillators; re-align them with the returned iterate.
        problem.set_design(&x);
        let result = OptimResult {
            objective: f,
            fidelity: problem.fidelity(),
            gnorm: norm2(&g),
            iterations: iter,
            status,
            x,
        };
        solution_cb(problem, &result);
        Ok(result)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// || P(x - g) - x ||_inf, zero exactly at a box-constrained stationary point
fn projected_gradient_norm(x: &[f64], g: &[f64], lower: &[f64], upper: &[f64]) -> f64 {
    x.iter()
        .zip(g)
        .zip(lower.iter().zip(upper))
        .map(|((xi, gi), (lo, up))| ((xi - gi).clamp(*lo, *up) - xi).abs())
        .fold(0.0, f64::max)
}

/// L-BFGS two-loop recursion: returns -H g
fn two_loop_direction(g: &[f64], s_hist: &VecDeque<Vec<f64>>, y_hist: &VecDeque<Vec<f64>>) -> Vec<f64> {
    let mut q = g.to_vec();
    let m = s_hist.len();
    if m == 0 {
        return q.iter().map(|qi| -qi).collect();
    }

    let mut alpha = vec![0.0; m];
    let mut rho = vec![0.0; m];
    for i in (0..m).rev() {
        rho[i] = 1.0 / dot(&y_hist[i], &s_hist[i]);
        alpha[i] = rho[i] * dot(&s_hist[i], &q);
        for (qj, yj) in q.iter_mut().zip(&y_hist[i]) {
            *qj -= alpha[i] * yj;
        }
    }

    let gamma = dot(&s_hist[m - 1], &y_hist[m - 1]) / dot(&y_hist[m - 1], &y_hist[m - 1]);
    let mut r: Vec<f64> = q.iter().map(|qi| gamma * qi).collect();

    for i in 0..m {
        let beta = rho[i] * dot(&y_hist[i], &r);
        for (rj, sj) in r.iter_mut().zip(&s_hist[i]) {
            *rj += (alpha[i] - beta) * sj;
        }
    }
    r.iter().map(|ri| -ri).collect()
}
