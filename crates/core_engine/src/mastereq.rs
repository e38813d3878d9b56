//! Vectorized Lindblad master equation
//!
//! The density matrix rho = U + iV is flattened row-major and stored as
//! 2N^2 interleaved reals [Re, Im] per entry. With the Hamiltonian split
//! H = H_re + i H_im (H_re symmetric, H_im antisymmetric) the generator acts
//! as
//!
//!   dU/dt =  H_im U - U H_im + H_re V - V H_re + D(U)
//!   dV/dt = -(H_re U - U H_re) + H_im V - V H_im + D(V)
//!
//! where D is the (real) Lindblad dissipator. The Hamiltonian part of the
//! resulting real operator is antisymmetric; the Lindblad corrections sit on
//! the block diagonal.

use crate::error::{EngineError, Result};
use crate::oscillator::Oscillator;
use ndarray::{Array1, Array2};
use sprs::CsMat;
use std::f64::consts::PI;
use std::str::FromStr;

/// Which collapse operators enter the dissipator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LindbladType {
    None,
    Decay,
    Dephase,
    Both,
}

impl FromStr for LindbladType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(LindbladType::None),
            "decay" => Ok(LindbladType::Decay),
            "dephase" => Ok(LindbladType::Dephase),
            "both" => Ok(LindbladType::Both),
            other => Err(EngineError::config_value(
                "lindblad_type",
                format!("unknown value '{}'", other),
            )),
        }
    }
}

pub struct MasterEq {
    dim: usize,
    oscillators: Vec<Oscillator>,
    /// Diagonal system Hamiltonian: detuning, self-Kerr, cross-Kerr (angular units)
    hsys_diag: Array1<f64>,
    /// a_k + a_k^T per oscillator
    ac_ops: Vec<CsMat<f64>>,
    /// a_k - a_k^T per oscillator
    bc_ops: Vec<CsMat<f64>>,
    lindblad: LindbladType,
    /// Unscaled collapse operators with their rates gamma
    collapse: Vec<(CsMat<f64>, f64)>,
    /// sum_j gamma_j diag(L_j^T L_j); both collapse kinds have diagonal L^T L
    anti_diag: Array1<f64>,
    ctrl_p: Vec<f64>,
    ctrl_q: Vec<f64>,
    time: Option<f64>,
}

impl MasterEq {
    pub fn new(
        oscillators: Vec<Oscillator>,
        crosskerr: &[f64],
        lindblad: LindbladType,
    ) -> Result<Self> {
        if oscillators.is_empty() {
            return Err(EngineError::config("at least one oscillator is required"));
        }
        let dim = oscillators[0].system_dim();
        let nosc = oscillators.len();
        let npairs = nosc * (nosc - 1) / 2;
        if crosskerr.len() != npairs && !crosskerr.is_empty() {
            return Err(EngineError::config_value(
                "crosskerr",
                format!("expected {} entries, got {}", npairs, crosskerr.len()),
            ));
        }

        let mut hsys_diag = Array1::zeros(dim);
        for i in 0..dim {
            let mut h = 0.0;
            for osc in &oscillators {
                let d = osc.level_of(i) as f64;
                h += 2.0 * PI * (osc.ground_freq() - osc.rotation_freq()) * d;
                h -= PI * osc.selfkerr() * d * (d - 1.0);
            }
            if !crosskerr.is_empty() {
                let mut pair = 0;
                for j in 0..nosc {
                    for k in (j + 1)..nosc {
                        let dj = oscillators[j].level_of(i) as f64;
                        let dk = oscillators[k].level_of(i) as f64;
                        h -= 2.0 * PI * crosskerr[pair] * dj * dk;
                        pair += 1;
                    }
                }
            }
            hsys_diag[i] = h;
        }

        let mut ac_ops = Vec::with_capacity(nosc);
        let mut bc_ops = Vec::with_capacity(nosc);
        for osc in &oscillators {
            let mut tri_a = sprs::TriMat::new((dim, dim));
            let mut tri_b = sprs::TriMat::new((dim, dim));
            for (&val, (r, c)) in osc.lowering_op().iter() {
                tri_a.add_triplet(r, c, val);
                tri_a.add_triplet(c, r, val);
                tri_b.add_triplet(r, c, val);
                tri_b.add_triplet(c, r, -val);
            }
            ac_ops.push(tri_a.to_csr());
            bc_ops.push(tri_b.to_csr());
        }

        let mut collapse = Vec::new();
        let mut anti_diag = Array1::zeros(dim);
        let with_decay = matches!(lindblad, LindbladType::Decay | LindbladType::Both);
        let with_dephase = matches!(lindblad, LindbladType::Dephase | LindbladType::Both);
        for osc in &oscillators {
            if with_decay && osc.decay_rate() > 0.0 {
                collapse.push((osc.lowering_op().clone(), osc.decay_rate()));
                for i in 0..dim {
                    anti_diag[i] += osc.decay_rate() * osc.level_of(i) as f64;
                }
            }
            if with_dephase && osc.dephase_rate() > 0.0 {
                collapse.push((osc.number_op().clone(), osc.dephase_rate()));
                for i in 0..dim {
                    let d = osc.level_of(i) as f64;
                    anti_diag[i] += osc.dephase_rate() * d * d;
                }
            }
        }

        Ok(MasterEq {
            dim,
            ctrl_p: vec![0.0; nosc],
            ctrl_q: vec![0.0; nosc],
            oscillators,
            hsys_diag,
            ac_ops,
            bc_ops,
            lindblad,
            collapse,
            anti_diag,
            time: None,
        })
    }

    /// Hilbert space dimension N; the state vector has length 2 N^2.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn state_len(&self) -> usize {
        2 * self.dim * self.dim
    }

    pub fn noscillators(&self) -> usize {
        self.oscillators.len()
    }

    pub fn oscillators(&self) -> &[Oscillator] {
        &self.oscillators
    }

    pub fn oscillators_mut(&mut self) -> &mut [Oscillator] {
        &mut self.oscillators
    }

    pub fn lindblad_type(&self) -> LindbladType {
        self.lindblad
    }

    /// Total number of spline coefficients across all oscillators.
    pub fn nparams(&self) -> usize {
        self.oscillators.iter().map(|o| o.nparams()).sum()
    }

    pub fn assembled_time(&self) -> Option<f64> {
        self.time
    }

    /// Re-evaluate the controls at time t. Must be called before apply.
    pub fn assemble(&mut self, t: f64) -> Result<()> {
        for (k, osc) in self.oscillators.iter().enumerate() {
            let (p, q) = osc.eval_control(t)?;
            self.ctrl_p[k] = p;
            self.ctrl_q[k] = q;
        }
        self.time = Some(t);
        Ok(())
    }

    /// out += sign * (H_re X - X H_re) with H_re = diag(hsys) + sum_k p_k A_k
    fn commutator_hre(&self, x: &Array2<f64>, out: &mut Array2<f64>, sign: f64) {
        let n = self.dim;
        for i in 0..n {
            for j in 0..n {
                out[[i, j]] += sign * (self.hsys_diag[i] - self.hsys_diag[j]) * x[[i, j]];
            }
        }
        for (k, a) in self.ac_ops.iter().enumerate() {
            let p = self.ctrl_p[k];
            if p != 0.0 {
                sp_left_acc(a, x, out, sign * p);
                sp_right_acc(a, x, out, -sign * p);
            }
        }
    }

    /// out += sign * (H_im X - X H_im) with H_im = sum_k q_k B_k
    fn commutator_him(&self, x: &Array2<f64>, out: &mut Array2<f64>, sign: f64) {
        for (k, b) in self.bc_ops.iter().enumerate() {
            let q = self.ctrl_q[k];
            if q != 0.0 {
                sp_left_acc(b, x, out, sign * q);
                sp_right_acc(b, x, out, -sign * q);
            }
        }
    }

    /// out += D(X) = sum_j gamma_j (L X L^T - 1/2 {L^T L, X})
    fn dissipator(&self, x: &Array2<f64>, out: &mut Array2<f64>) {
        let n = self.dim;
        for (op, gamma) in &self.collapse {
            let mut tmp = Array2::zeros((n, n));
            sp_left_acc(op, x, &mut tmp, 1.0);
            sp_right_t_acc(op, &tmp, out, *gamma);
        }
        for i in 0..n {
            for j in 0..n {
                out[[i, j]] -= 0.5 * (self.anti_diag[i] + self.anti_diag[j]) * x[[i, j]];
            }
        }
    }

    /// out += D^T(X) = sum_j gamma_j (L^T X L - 1/2 {L^T L, X})
    fn dissipator_t(&self, x: &Array2<f64>, out: &mut Array2<f64>) {
        let n = self.dim;
        for (op, gamma) in &self.collapse {
            let mut tmp = Array2::zeros((n, n));
            sp_left_t_acc(op, x, &mut tmp, 1.0);
            sp_right_acc(op, &tmp, out, *gamma);
        }
        for i in 0..n {
            for j in 0..n {
                out[[i, j]] -= 0.5 * (self.anti_diag[i] + self.anti_diag[j]) * x[[i, j]];
            }
        }
    }

    fn has_dissipator(&self) -> bool {
        !self.collapse.is_empty()
    }

    /// out = M(t) x on the interleaved layout.
    pub fn apply(&self, x: &Array1<f64>, out: &mut Array1<f64>) {
        debug_assert!(self.time.is_some(), "apply before assemble");
        let n = self.dim;
        let (u, v) = split_state(x, n);
        let mut du = Array2::zeros((n, n));
        let mut dv = Array2::zeros((n, n));

        self.commutator_him(&u, &mut du, 1.0);
        self.commutator_hre(&v, &mut du, 1.0);
        self.commutator_hre(&u, &mut dv, -1.0);
        self.commutator_him(&v, &mut dv, 1.0);
        if self.has_dissipator() {
            self.dissipator(&u, &mut du);
            self.dissipator(&v, &mut dv);
        }
        merge_state(&du, &dv, out);
    }

    /// out = M(t)^T x on the interleaved layout.
    pub fn apply_transpose(&self, x: &Array1<f64>, out: &mut Array1<f64>) {
        debug_assert!(self.time.is_some(), "apply_transpose before assemble");
        let n = self.dim;
        let (p, q) = split_state(x, n);
        let mut du = Array2::zeros((n, n));
        let mut dv = Array2::zeros((n, n));

        self.commutator_him(&p, &mut du, -1.0);
        self.commutator_hre(&q, &mut du, -1.0);
        self.commutator_hre(&p, &mut dv, 1.0);
        self.commutator_him(&q, &mut dv, -1.0);
        if self.has_dissipator() {
            self.dissipator_t(&p, &mut du);
            self.dissipator_t(&q, &mut dv);
        }
        merge_state(&du, &dv, out);
    }

    /// out = (I - gamma M(t)) x, the left-hand side of the midpoint solve.
    pub fn apply_implicit(&self, x: &Array1<f64>, out: &mut Array1<f64>, gamma: f64) {
        self.apply(x, out);
        for (o, &xi) in out.iter_mut().zip(x.iter()) {
            *o = xi - gamma * *o;
        }
    }

    /// out = (I - gamma M(t)^T) x.
    pub fn apply_implicit_transpose(&self, x: &Array1<f64>, out: &mut Array1<f64>, gamma: f64) {
        self.apply_transpose(x, out);
        for (o, &xi) in out.iter_mut().zip(x.iter()) {
            *o = xi - gamma * *o;
        }
    }

    /// Accumulate scale * w^T (dM/dtheta) y into the reduced gradient.
    ///
    /// The derivative of M with respect to the control p_k is the commutator
    /// with A_k = a_k + a_k^T routed through the Hamiltonian real part; for
    /// q_k it is the commutator with B_k = a_k - a_k^T routed through the
    /// imaginary part. The spline chain rule is delegated per oscillator.
    pub fn apply_param_deriv(
        &self,
        y: &Array1<f64>,
        w: &Array1<f64>,
        t: f64,
        scale: f64,
        grad: &mut [f64],
    ) -> Result<()> {
        debug_assert_eq!(grad.len(), self.nparams());
        let n = self.dim;
        let (yu, yv) = split_state(y, n);
        let (wp, wq) = split_state(w, n);

        let mut offset = 0;
        for (k, osc) in self.oscillators.iter().enumerate() {
            let a = &self.ac_ops[k];
            let b = &self.bc_ops[k];
            // <w, M_A y>: dU picks A V - V A, dV picks -(A U - U A)
            let pbar = comm_trace(a, &yv, &wp) - comm_trace(a, &yu, &wq);
            // <w, M_B y>: dU picks B U - U B, dV picks B V - V B
            let qbar = comm_trace(b, &yu, &wp) + comm_trace(b, &yv, &wq);

            let np = osc.nparams();
            osc.eval_control_diff(t, &mut grad[offset..offset + np], scale * pbar, scale * qbar)?;
            offset += np;
        }
        Ok(())
    }

    /// Partial trace over all oscillators not in keep_ids, returned in the
    /// interleaved layout of dimension m^2 with m the kept subsystem size.
    pub fn reduced_density(&self, state: &Array1<f64>, keep_ids: &[usize]) -> Array1<f64> {
        let n = self.dim;
        let m = self.reduced_dim(keep_ids);
        let mut red = Array1::zeros(2 * m * m);
        for i in 0..n {
            let (a, ti) = self.split_index(i, keep_ids);
            for j in 0..n {
                let (b, tj) = self.split_index(j, keep_ids);
                if ti == tj {
                    red[2 * (a * m + b)] += state[2 * (i * n + j)];
                    red[2 * (a * m + b) + 1] += state[2 * (i * n + j) + 1];
                }
            }
        }
        red
    }

    /// Adjoint of `reduced_density`: scatter red_bar back onto the full state.
    pub fn reduced_density_diff(
        &self,
        state_bar: &mut Array1<f64>,
        red_bar: &Array1<f64>,
        keep_ids: &[usize],
    ) {
        let n = self.dim;
        let m = self.reduced_dim(keep_ids);
        debug_assert_eq!(red_bar.len(), 2 * m * m);
        for i in 0..n {
            let (a, ti) = self.split_index(i, keep_ids);
            for j in 0..n {
                let (b, tj) = self.split_index(j, keep_ids);
                if ti == tj {
                    state_bar[2 * (i * n + j)] += red_bar[2 * (a * m + b)];
                    state_bar[2 * (i * n + j) + 1] += red_bar[2 * (a * m + b) + 1];
                }
            }
        }
    }

    /// Dimension of the subsystem spanned by keep_ids.
    pub fn reduced_dim(&self, keep_ids: &[usize]) -> usize {
        keep_ids.iter().map(|&k| self.oscillators[k].nlevels()).product()
    }

    /// Decompose a composite index into (kept subsystem index, traced index).
    fn split_index(&self, index: usize, keep_ids: &[usize]) -> (usize, usize) {
        let mut kept = 0;
        let mut traced = 0;
        for (k, osc) in self.oscillators.iter().enumerate() {
            let d = osc.level_of(index);
            if keep_ids.contains(&k) {
                kept = kept * osc.nlevels() + d;
            } else {
                traced = traced * osc.nlevels() + d;
            }
        }
        (kept, traced)
    }
}

/// Copy the interleaved state into dense real and imaginary parts.
pub fn split_state(x: &Array1<f64>, n: usize) -> (Array2<f64>, Array2<f64>) {
    debug_assert_eq!(x.len(), 2 * n * n);
    let mut u = Array2::zeros((n, n));
    let mut v = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            let k = 2 * (i * n + j);
            u[[i, j]] = x[k];
            v[[i, j]] = x[k + 1];
        }
    }
    (u, v)
}

/// Write dense real and imaginary parts back into the interleaved layout.
pub fn merge_state(u: &Array2<f64>, v: &Array2<f64>, out: &mut Array1<f64>) {
    let n = u.nrows();
    debug_assert_eq!(out.len(), 2 * n * n);
    for i in 0..n {
        for j in 0..n {
            let k = 2 * (i * n + j);
            out[k] = u[[i, j]];
            out[k + 1] = v[[i, j]];
        }
    }
}

/// out += alpha * A x
fn sp_left_acc(a: &CsMat<f64>, x: &Array2<f64>, out: &mut Array2<f64>, alpha: f64) {
    let ncols = x.ncols();
    for (&val, (r, c)) in a.iter() {
        let av = alpha * val;
        for j in 0..ncols {
            out[[r, j]] += av * x[[c, j]];
        }
    }
}

/// out += alpha * A^T x
fn sp_left_t_acc(a: &CsMat<f64>, x: &Array2<f64>, out: &mut Array2<f64>, alpha: f64) {
    let ncols = x.ncols();
    for (&val, (r, c)) in a.iter() {
        let av = alpha * val;
        for j in 0..ncols {
            out[[c, j]] += av * x[[r, j]];
        }
    }
}

/// out += alpha * x A
fn sp_right_acc(a: &CsMat<f64>, x: &Array2<f64>, out: &mut Array2<f64>, alpha: f64) {
    let nrows = x.nrows();
    for (&val, (r, c)) in a.iter() {
        let av = alpha * val;
        for i in 0..nrows {
            out[[i, c]] += av * x[[i, r]];
        }
    }
}

/// out += alpha * x A^T
fn sp_right_t_acc(a: &CsMat<f64>, x: &Array2<f64>, out: &mut Array2<f64>, alpha: f64) {
    let nrows = x.nrows();
    for (&val, (r, c)) in a.iter() {
        let av = alpha * val;
        for i in 0..nrows {
            out[[i, r]] += av * x[[i, c]];
        }
    }
}

/// tr(P^T (A X - X A)) for sparse A and dense X, P
fn comm_trace(a: &CsMat<f64>, x: &Array2<f64>, p: &Array2<f64>) -> f64 {
    let n = x.nrows();
    let mut acc = 0.0;
    for (&val, (r, c)) in a.iter() {
        let mut row_dot = 0.0;
        let mut col_dot = 0.0;
        for j in 0..n {
            row_dot += p[[r, j]] * x[[c, j]];
            col_dot += p[[j, c]] * x[[j, r]];
        }
        acc += val * (row_dot - col_dot);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oscillator::Oscillator;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_meq(nlevels: &[usize], lindblad: LindbladType, decay: f64, dephase: f64) -> MasterEq {
        let oscillators: Vec<Oscillator> = (0..nlevels.len())
            .map(|id| {
                Oscillator::new(
                    id, nlevels, 5, &[0.0, 0.8], 4.1, 4.0, 0.2, decay, dephase, 2.0,
                )
                .unwrap()
            })
            .collect();
        MasterEq::new(oscillators, &[], lindblad).unwrap()
    }

    fn random_state(len: usize, seed: u64) -> Array1<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array1::from_iter((0..len).map(|_| rng.gen_range(-1.0..1.0)))
    }

    fn randomize_controls(meq: &mut MasterEq, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for osc in meq.oscillators_mut() {
            let params: Vec<f64> = (0..osc.nparams()).map(|_| rng.gen_range(-0.5..0.5)).collect();
            osc.set_params(&params);
        }
    }

    #[test]
    fn test_transpose_is_adjoint() {
        let mut meq = make_meq(&[3], LindbladType::Both, 0.1, 0.05);
        randomize_controls(&mut meq, 7);
        meq.assemble(0.63).unwrap();

        let len = meq.state_len();
        let x = random_state(len, 1);
        let y = random_state(len, 2);
        let mut mx = Array1::zeros(len);
        let mut mty = Array1::zeros(len);
        meq.apply(&x, &mut mx);
        meq.apply_transpose(&y, &mut mty);
        assert_relative_eq!(mx.dot(&y), x.dot(&mty), epsilon = 1e-11, max_relative = 1e-11);
    }

    #[test]
    fn test_hermiticity_is_preserved_by_generator() {
        // If rho is Hermitian (U symmetric, V antisymmetric), so is M rho.
        let mut meq = make_meq(&[2, 2], LindbladType::Decay, 0.2, 0.0);
        randomize_controls(&mut meq, 3);
        meq.assemble(0.41).unwrap();

        let n = meq.dim();
        let raw = random_state(meq.state_len(), 5);
        let (mut u, mut v) = split_state(&raw, n);
        u = &u + &u.t();
        v = &v - &v.t();
        let mut x = Array1::zeros(meq.state_len());
        merge_state(&u, &v, &mut x);

        let mut mx = Array1::zeros(meq.state_len());
        meq.apply(&x, &mut mx);
        let (du, dv) = split_state(&mx, n);
        for i in 0..n {
            for j in 0..n {
                assert_relative_eq!(du[[i, j]], du[[j, i]], epsilon = 1e-12);
                assert_relative_eq!(dv[[i, j]], -dv[[j, i]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_trace_is_conserved() {
        // d/dt tr(rho) = 0, with and without dissipation.
        for lindblad in [LindbladType::None, LindbladType::Both] {
            let mut meq = make_meq(&[3], lindblad, 0.1, 0.07);
            randomize_controls(&mut meq, 11);
            meq.assemble(1.21).unwrap();

            let x = random_state(meq.state_len(), 9);
            let mut mx = Array1::zeros(meq.state_len());
            meq.apply(&x, &mut mx);
            let n = meq.dim();
            let trace_re: f64 = (0..n).map(|i| mx[2 * (i * n + i)]).sum();
            assert_relative_eq!(trace_re, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_param_deriv_matches_finite_differences() {
        let mut meq = make_meq(&[3], LindbladType::Decay, 0.1, 0.0);
        randomize_controls(&mut meq, 13);
        let t = 0.77;

        let len = meq.state_len();
        let y = random_state(len, 21);
        let w = random_state(len, 22);

        let nparams = meq.nparams();
        let mut grad = vec![0.0; nparams];
        meq.assemble(t).unwrap();
        meq.apply_param_deriv(&y, &w, t, 1.0, &mut grad).unwrap();

        let eps = 1e-6;
        let base: Vec<f64> = meq.oscillators()[0].params().to_vec();
        for i in 0..nparams {
            let mut plus = base.clone();
            plus[i] += eps;
            meq.oscillators_mut()[0].set_params(&plus);
            meq.assemble(t).unwrap();
            let mut mp = Array1::zeros(len);
            meq.apply(&y, &mut mp);

            let mut minus = base.clone();
            minus[i] -= eps;
            meq.oscillators_mut()[0].set_params(&minus);
            meq.assemble(t).unwrap();
            let mut mm = Array1::zeros(len);
            meq.apply(&y, &mut mm);

            let fd = (mp.dot(&w) - mm.dot(&w)) / (2.0 * eps);
            assert_relative_eq!(grad[i], fd, epsilon = 1e-7, max_relative = 1e-7);
        }
        meq.oscillators_mut()[0].set_params(&base);
    }

    #[test]
    fn test_reduced_density_roundtrip() {
        let meq = make_meq(&[2, 3], LindbladType::None, 0.0, 0.0);
        let n = meq.dim();
        assert_eq!(n, 6);

        // rho = |0,1><0,1|: reduced over oscillator 1 keeps |1><1| of dim 3
        let mut state = Array1::zeros(meq.state_len());
        let idx = 1; // level 0 on osc 0, level 1 on osc 1
        state[2 * (idx * n + idx)] = 1.0;

        let red = meq.reduced_density(&state, &[1]);
        assert_eq!(red.len(), 2 * 9);
        assert_relative_eq!(red[2 * (1 * 3 + 1)], 1.0);
        let trace: f64 = (0..3).map(|i| red[2 * (i * 3 + i)]).sum();
        assert_relative_eq!(trace, 1.0);

        // Adjoint consistency: <reduce(x), r> == <x, scatter(r)>
        let x = random_state(meq.state_len(), 31);
        let r = random_state(2 * 9, 32);
        let red_x = meq.reduced_density(&x, &[1]);
        let mut scattered = Array1::zeros(meq.state_len());
        meq.reduced_density_diff(&mut scattered, &r, &[1]);
        assert_relative_eq!(red_x.dot(&r), x.dot(&scattered), epsilon = 1e-12);
    }
}
