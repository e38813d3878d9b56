//! Linear solvers for the implicit midpoint system
//!
//! The left-hand side (I - gamma M) is never materialized; both solvers work
//! against a matvec closure. GMRES is the default; the Neumann series is an
//! option when gamma ||M|| is small, with a residual check that hands back to
//! GMRES on failure.

use crate::error::{EngineError, Result};
use ndarray::{Array1, Array2};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    Gmres,
    Neumann,
}

impl FromStr for LinearSolverType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gmres" => Ok(LinearSolverType::Gmres),
            "neumann" => Ok(LinearSolverType::Neumann),
            other => Err(EngineError::config_value(
                "linearsolver_type",
                format!("unknown value '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearSolverConfig {
    pub solver: LinearSolverType,
    /// For GMRES: total matvec budget. For Neumann: number of series terms.
    pub maxiter: usize,
    pub tol: f64,
    pub restart: usize,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        LinearSolverConfig {
            solver: LinearSolverType::Gmres,
            maxiter: 500,
            tol: 1e-12,
            restart: 30,
        }
    }
}

fn l2(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

/// Restarted GMRES with Givens rotations. `apply` computes y = A x.
pub fn gmres<F>(
    mut apply: F,
    b: &Array1<f64>,
    restart: usize,
    maxiter: usize,
    tol: f64,
) -> Result<Array1<f64>>
where
    F: FnMut(&Array1<f64>) -> Array1<f64>,
{
    let n = b.len();
    let bnorm = l2(b);
    let mut x = Array1::zeros(n);
    if bnorm == 0.0 {
        return Ok(x);
    }
    let m = restart.max(1).min(n);
    let mut matvecs = 0;

    while matvecs < maxiter {
        let ax = apply(&x);
        matvecs += 1;
        let r = b - &ax;
        let beta = l2(&r);
        let relres = beta / bnorm;
        if !relres.is_finite() {
            return Err(EngineError::numeric("NaN in GMRES residual"));
        }
        if relres <= tol {
            return Ok(x);
        }

        // Arnoldi with incremental Givens QR of the Hessenberg matrix
        let mut basis: Vec<Array1<f64>> = Vec::with_capacity(m + 1);
        basis.push(&r / beta);
        let mut h = Array2::<f64>::zeros((m + 1, m));
        let mut cs = vec![0.0; m];
        let mut sn = vec![0.0; m];
        let mut g = vec![0.0; m + 1];
        g[0] = beta;
        let mut k_used = 0;

        for j in 0..m {
            if matvecs >= maxiter {
                break;
            }
            let mut w = apply(&basis[j]);
            matvecs += 1;
            for i in 0..=j {
                let hij = w.dot(&basis[i]);
                h[[i, j]] = hij;
                w.scaled_add(-hij, &basis[i]);
            }
            let hnext = l2(&w);
            h[[j + 1, j]] = hnext;

            for i in 0..j {
                let tmp = cs[i] * h[[i, j]] + sn[i] * h[[i + 1, j]];
                h[[i + 1, j]] = -sn[i] * h[[i, j]] + cs[i] * h[[i + 1, j]];
                h[[i, j]] = tmp;
            }
            let denom = (h[[j, j]] * h[[j, j]] + h[[j + 1, j]] * h[[j + 1, j]]).sqrt();
            if denom == 0.0 || !denom.is_finite() {
                break;
            }
            cs[j] = h[[j, j]] / denom;
            sn[j] = h[[j + 1, j]] / denom;
            h[[j, j]] = denom;
            h[[j + 1, j]] = 0.0;
            g[j + 1] = -sn[j] * g[j];
            g[j] *= cs[j];
            k_used = j + 1;

            let inner_res = g[j + 1].abs() / bnorm;
            if !inner_res.is_finite() {
                return Err(EngineError::numeric("NaN in GMRES residual"));
            }
            if inner_res <= tol || hnext == 0.0 {
                break;
            }
            basis.push(&w / hnext);
        }

        // Back substitution and solution update
        let mut y = vec![0.0; k_used];
        for i in (0..k_used).rev() {
            let mut s = g[i];
            for l in (i + 1)..k_used {
                s -= h[[i, l]] * y[l];
            }
            y[i] = s / h[[i, i]];
        }
        for (i, &yi) in y.iter().enumerate() {
            x.scaled_add(yi, &basis[i]);
        }
    }

    let ax = apply(&x);
    let relres = l2(&(b - &ax)) / bnorm;
    if relres <= tol {
        Ok(x)
    } else {
        Err(EngineError::SolverDiverged(format!(
            "GMRES: relative residual {:.3e} after {} matvecs (tol {:.1e})",
            relres, maxiter, tol
        )))
    }
}

/// Truncated Neumann series for (I - gamma M)^{-1} b. `apply_scaled`
/// computes gamma M x. Returns SolverDiverged when the residual after the
/// final term exceeds tol, so the caller can fall back to GMRES.
pub fn neumann<F>(mut apply_scaled: F, b: &Array1<f64>, terms: usize, tol: f64) -> Result<Array1<f64>>
where
    F: FnMut(&Array1<f64>) -> Array1<f64>,
{
    let bnorm = l2(b);
    if bnorm == 0.0 {
        return Ok(Array1::zeros(b.len()));
    }
    let mut x = b.clone();
    let mut term = b.clone();
    for _ in 0..terms {
        term = apply_scaled(&term);
        x += &term;
    }
    // residual of (I - gamma M) x = b
    let gmx = apply_scaled(&x);
    let mut r = b - &x;
    r += &gmx;
    let relres = l2(&r) / bnorm;
    if !relres.is_finite() {
        return Err(EngineError::numeric("NaN in Neumann residual"));
    }
    if relres <= tol {
        Ok(x)
    } else {
        Err(EngineError::SolverDiverged(format!(
            "Neumann: relative residual {:.3e} after {} terms (tol {:.1e})",
            relres, terms, tol
        )))
    }
}
