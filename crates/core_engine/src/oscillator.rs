//! Per-oscillator operators and control evaluation
//!
//! Each oscillator carries its sparse number and lowering operators on the
//! full Hilbert space, built with the I_pre (x) op (x) I_post Kronecker
//! structure, plus its spline coefficients and optional pi-pulse windows.

use crate::basis::{ControlBasis, ControlType, PiPulse};
use crate::error::{EngineError, Result};
use ndarray::Array1;
use sprs::{CsMat, TriMat};

pub struct Oscillator {
    id: usize,
    nlevels: usize,
    dim_pre: usize,
    dim_post: usize,
    ground_freq: f64,
    rotation_freq: f64,
    selfkerr: f64,
    decay_rate: f64,
    dephase_rate: f64,
    params: Vec<f64>,
    basis: ControlBasis,
    number_op: CsMat<f64>,
    lowering_op: CsMat<f64>,
    pipulses: Vec<PiPulse>,
}

impl Oscillator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        nlevels_all: &[usize],
        nspline: usize,
        carrier_freqs: &[f64],
        ground_freq: f64,
        rotation_freq: f64,
        selfkerr: f64,
        decay_rate: f64,
        dephase_rate: f64,
        total_time: f64,
    ) -> Result<Self> {
        let nlevels = nlevels_all[id];
        if nlevels < 2 {
            return Err(EngineError::config(format!(
                "oscillator {} needs at least 2 levels, got {}",
                id, nlevels
            )));
        }
        let mut dim_pre = 1;
        let mut dim_post = 1;
        for (j, &n) in nlevels_all.iter().enumerate() {
            if j < id {
                dim_pre *= n;
            }
            if j > id {
                dim_post *= n;
            }
        }

        let basis = ControlBasis::new(nspline, total_time, carrier_freqs)?;
        let nparams = basis.nparams();

        Ok(Oscillator {
            id,
            nlevels,
            dim_pre,
            dim_post,
            ground_freq,
            rotation_freq,
            selfkerr,
            decay_rate,
            dephase_rate,
            params: vec![0.0; nparams],
            basis,
            number_op: build_number_op(dim_pre, nlevels, dim_post),
            lowering_op: build_lowering_op(dim_pre, nlevels, dim_post),
            pipulses: Vec::new(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn nlevels(&self) -> usize {
        self.nlevels
    }

    /// Full system dimension N
    pub fn system_dim(&self) -> usize {
        self.dim_pre * self.nlevels * self.dim_post
    }

    pub fn ground_freq(&self) -> f64 {
        self.ground_freq
    }

    pub fn rotation_freq(&self) -> f64 {
        self.rotation_freq
    }

    pub fn selfkerr(&self) -> f64 {
        self.selfkerr
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn dephase_rate(&self) -> f64 {
        self.dephase_rate
    }

    pub fn number_op(&self) -> &CsMat<f64> {
        &self.number_op
    }

    pub fn lowering_op(&self) -> &CsMat<f64> {
        &self.lowering_op
    }

    /// Level occupied by this oscillator in the composite basis state `index`.
    pub fn level_of(&self, index: usize) -> usize {
        (index / self.dim_post) % self.nlevels
    }

    pub fn nparams(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn set_params(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.params.len());
        self.params.copy_from_slice(x);
    }

    pub fn add_pipulse(&mut self, pulse: PiPulse) {
        self.pipulses.push(pulse);
    }

    fn pipulse_at(&self, t: f64) -> Option<&PiPulse> {
        self.pipulses
            .iter()
            .find(|p| p.tstart <= t && t <= p.tstop)
    }

    /// Rotating-frame control quadratures (p, q) at time t.
    pub fn eval_control(&self, t: f64) -> Result<(f64, f64)> {
        let p = self.basis.evaluate(t, &self.params, self.ground_freq, ControlType::Re)?;
        let q = self.basis.evaluate(t, &self.params, self.ground_freq, ControlType::Im)?;
        if let Some(pulse) = self.pipulse_at(t) {
            let amp = pulse.amp / std::f64::consts::SQRT_2;
            return Ok((amp, amp));
        }
        Ok((p, q))
    }

    /// Chain seed values pbar, qbar back onto the spline coefficients.
    /// Inside a pi-pulse window the controls are not a function of the
    /// coefficients and the request is a fatal error.
    pub fn eval_control_diff(&self, t: f64, grad: &mut [f64], pbar: f64, qbar: f64) -> Result<()> {
        if self.pipulse_at(t).is_some() {
            return Err(EngineError::PiPulseDerivative { t });
        }
        self.basis.derivative(t, grad, pbar, ControlType::Re)?;
        self.basis.derivative(t, grad, qbar, ControlType::Im)?;
        Ok(())
    }

    /// Lab-frame pulse f(t) = 2 p cos(2 pi w0 t) - 2 q sin(2 pi w0 t).
    pub fn eval_control_labframe(&self, t: f64) -> Result<f64> {
        if let Some(pulse) = self.pipulse_at(t) {
            let amp = pulse.amp / std::f64::consts::SQRT_2;
            let arg = 2.0 * std::f64::consts::PI * self.ground_freq * t;
            return Ok(2.0 * amp * arg.cos() - 2.0 * amp * arg.sin());
        }
        self.basis
            .evaluate(t, &self.params, self.ground_freq, ControlType::Lab)
    }

    /// Expected energy level <N_k> = sum_i (N_k)_ii Re rho_ii.
    pub fn expected_energy(&self, state: &Array1<f64>) -> f64 {
        let dim = self.system_dim();
        debug_assert_eq!(state.len(), 2 * dim * dim);
        let mut expected = 0.0;
        for (&val, (i, j)) in self.number_op.iter() {
            if i == j {
                expected += val * state[2 * (i * dim + i)];
            }
        }
        expected
    }

    /// Adjoint of `expected_energy`: scatter obj_bar onto the real diagonal.
    pub fn expected_energy_diff(&self, state_bar: &mut Array1<f64>, obj_bar: f64) {
        let dim = self.system_dim();
        debug_assert_eq!(state_bar.len(), 2 * dim * dim);
        for (&val, (i, j)) in self.number_op.iter() {
            if i == j {
                state_bar[2 * (i * dim + i)] += val * obj_bar;
            }
        }
    }

    /// Diagonal of the reduced density matrix over this oscillator.
    pub fn population(&self, state: &Array1<f64>) -> Vec<f64> {
        let dim = self.system_dim();
        debug_assert_eq!(state.len(), 2 * dim * dim);
        let mut pop = vec![0.0; self.nlevels];
        for (i, p) in pop.iter_mut().enumerate() {
            let mut sum = 0.0;
            for j in 0..self.dim_pre {
                let blockstart = j * self.nlevels * self.dim_post + i * self.dim_post;
                for l in 0..self.dim_post {
                    let rho_id = blockstart + l;
                    sum += state[2 * (rho_id * dim + rho_id)];
                }
            }
            *p = sum;
        }
        pop
    }
}

/// N_k = I_pre (x) diag(0..n-1) (x) I_post
fn build_number_op(dim_pre: usize, nlevels: usize, dim_post: usize) -> CsMat<f64> {
    let dim = dim_pre * nlevels * dim_post;
    let mut tri = TriMat::new((dim, dim));
    for i in 0..dim_pre {
        for j in 1..nlevels {
            for k in 0..dim_post {
                let row = i * nlevels * dim_post + j * dim_post + k;
                tri.add_triplet(row, row, j as f64);
            }
        }
    }
    tri.to_csr()
}

/// a_k = I_pre (x) lower (x) I_post with lower[j, j+1] = sqrt(j+1)
fn build_lowering_op(dim_pre: usize, nlevels: usize, dim_post: usize) -> CsMat<f64> {
    let dim = dim_pre * nlevels * dim_post;
    let mut tri = TriMat::new((dim, dim));
    for i in 0..dim_pre {
        for j in 0..nlevels - 1 {
            for k in 0..dim_post {
                let row = i * nlevels * dim_post + j * dim_post + k;
                tri.add_triplet(row, row + dim_post, ((j + 1) as f64).sqrt());
            }
        }
    }
    tri.to_csr()
}
