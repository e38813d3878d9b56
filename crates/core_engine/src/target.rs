//! Optimization targets and objective functions
//!
//! Three families: gate targets comparing rho(T) against V rho(0) V^dagger,
//! pure-state targets comparing (a subsystem of) rho(T) against a projector,
//! and diagonal measurement objectives on the final expected energies. Each
//! target evaluates its objective and writes the analytic derivative with
//! respect to the final state into the adjoint seed vector.

use crate::error::{EngineError, Result};
use crate::mastereq::MasterEq;
use ndarray::{Array1, Array2};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    None,
    X,
    Y,
    Z,
    Hadamard,
    Cnot,
}

impl FromStr for GateKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(GateKind::None),
            "xgate" => Ok(GateKind::X),
            "ygate" => Ok(GateKind::Y),
            "zgate" => Ok(GateKind::Z),
            "hadamard" => Ok(GateKind::Hadamard),
            "cnot" => Ok(GateKind::Cnot),
            other => Err(EngineError::config_value(
                "optim_objective",
                format!("unknown gate '{}'", other),
            )),
        }
    }
}

impl GateKind {
    pub fn dim(&self) -> usize {
        match self {
            GateKind::Cnot => 4,
            _ => 2,
        }
    }

    /// Real and imaginary parts Va, Vb of the unitary V = Va + i Vb.
    fn matrices(&self) -> (Array2<f64>, Array2<f64>) {
        let d = self.dim();
        let mut va = Array2::zeros((d, d));
        let mut vb = Array2::zeros((d, d));
        match self {
            GateKind::None => {
                for i in 0..d {
                    va[[i, i]] = 1.0;
                }
            }
            GateKind::X => {
                va[[0, 1]] = 1.0;
                va[[1, 0]] = 1.0;
            }
            GateKind::Y => {
                vb[[0, 1]] = -1.0;
                vb[[1, 0]] = 1.0;
            }
            GateKind::Z => {
                va[[0, 0]] = 1.0;
                va[[1, 1]] = -1.0;
            }
            GateKind::Hadamard => {
                let h = 1.0 / 2.0_f64.sqrt();
                va[[0, 0]] = h;
                va[[0, 1]] = h;
                va[[1, 0]] = h;
                va[[1, 1]] = -h;
            }
            GateKind::Cnot => {
                va[[0, 0]] = 1.0;
                va[[1, 1]] = 1.0;
                va[[2, 3]] = 1.0;
                va[[3, 2]] = 1.0;
            }
        }
        (va, vb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMetric {
    /// J = 1/2 || rho(T) - V rho(0) V^dagger ||_F^2
    Frobenius,
    /// J = 1 - Tr(rho_target^dagger rho(T)) / purity
    Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyVariant {
    /// Square of the average expected energy
    SquareOfAverage,
    /// Average of the squared expected energies
    AverageOfSquare,
    /// Plain average
    Average,
    /// Diagonal distance-from-level-one measure
    ZeroToOne,
}

#[derive(Debug)]
pub struct GateTarget {
    dim: usize,
    re_g: Array2<f64>,
    im_g: Array2<f64>,
    metric: GateMetric,
}

pub struct PureTarget {
    level: usize,
    osc_ids: Vec<usize>,
    reduced_dim: usize,
    full_dim: usize,
}

pub struct EnergyTarget {
    variant: EnergyVariant,
    osc_ids: Vec<usize>,
}

pub enum Target {
    Gate(GateTarget),
    Pure(PureTarget),
    Energy(EnergyTarget),
}

/// Kronecker product of two real matrices
fn kron(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let (na, ma) = a.dim();
    let (nb, mb) = b.dim();
    let mut out = Array2::zeros((na * nb, ma * mb));
    for i in 0..na {
        for j in 0..ma {
            for k in 0..nb {
                for l in 0..mb {
                    out[[i * nb + k, j * mb + l]] = a[[i, j]] * b[[k, l]];
                }
            }
        }
    }
    out
}

impl GateTarget {
    pub fn new(kind: GateKind, metric: GateMetric, system_dim: usize) -> Result<Self> {
        let dim = kind.dim();
        if dim != system_dim {
            return Err(EngineError::dimension_mismatch(
                format!("gate dimension {}", dim),
                format!("system dimension {}", system_dim),
            ));
        }
        let (va, vb) = kind.matrices();
        // Row-major vectorization: vec(V rho V^dagger) = (V (x) conj(V)) vec(rho)
        let re_g = &kron(&va, &va) + &kron(&vb, &vb);
        let im_g = &kron(&vb, &va) - &kron(&va, &vb);
        Ok(GateTarget {
            dim,
            re_g,
            im_g,
            metric,
        })
    }

    /// Split an interleaved state into u = Re vec(rho), v = Im vec(rho).
    fn quadratures(state: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let m = state.len() / 2;
        let mut u = Array1::zeros(m);
        let mut v = Array1::zeros(m);
        for i in 0..m {
            u[i] = state[2 * i];
            v[i] = state[2 * i + 1];
        }
        (u, v)
    }

    /// Vectorized target state (u_t, v_t) = G vec(rho0).
    fn target_state(&self, rho0: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let (u0, v0) = Self::quadratures(rho0);
        let ut = &self.re_g.dot(&u0) - &self.im_g.dot(&v0);
        let vt = &self.re_g.dot(&v0) + &self.im_g.dot(&u0);
        (ut, vt)
    }

    pub fn eval(&self, final_state: &Array1<f64>, rho0: &Array1<f64>) -> f64 {
        let (u, v) = Self::quadratures(final_state);
        let (ut, vt) = self.target_state(rho0);
        match self.metric {
            GateMetric::Frobenius => {
                let du = &u - &ut;
                let dv = &v - &vt;
                0.5 * (du.dot(&du) + dv.dot(&dv))
            }
            GateMetric::Trace => {
                let purity = ut.dot(&ut) + vt.dot(&vt);
                1.0 - (ut.dot(&u) + vt.dot(&v)) / purity
            }
        }
    }

    pub fn eval_diff(
        &self,
        final_state: &Array1<f64>,
        rho0: &Array1<f64>,
        obj_bar: f64,
        bar_final: &mut Array1<f64>,
    ) {
        let (u, v) = Self::quadratures(final_state);
        let (ut, vt) = self.target_state(rho0);
        let m = u.len();
        match self.metric {
            GateMetric::Frobenius => {
                for i in 0..m {
                    bar_final[2 * i] += (u[i] - ut[i]) * obj_bar;
                    bar_final[2 * i + 1] += (v[i] - vt[i]) * obj_bar;
                }
            }
            GateMetric::Trace => {
                let purity = ut.dot(&ut) + vt.dot(&vt);
                for i in 0..m {
                    bar_final[2 * i] -= ut[i] / purity * obj_bar;
                    bar_final[2 * i + 1] -= vt[i] / purity * obj_bar;
                }
            }
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl PureTarget {
    pub fn new(level: usize, osc_ids: Vec<usize>, meq: &MasterEq) -> Result<Self> {
        for &k in &osc_ids {
            if k >= meq.noscillators() {
                return Err(EngineError::config_value(
                    "optim_objective",
                    format!("oscillator id {} out of range", k),
                ));
            }
        }
        let reduced_dim = meq.reduced_dim(&osc_ids);
        if level >= reduced_dim {
            return Err(EngineError::config_value(
                "optim_objective",
                format!("target level {} outside subsystem dimension {}", level, reduced_dim),
            ));
        }
        Ok(PureTarget {
            level,
            osc_ids,
            reduced_dim,
            full_dim: meq.dim(),
        })
    }

    fn is_full_system(&self) -> bool {
        self.reduced_dim == self.full_dim
    }

    /// J = 1/2 || rho_cmp - e_m e_m^T ||_F^2 on the compared (sub)system.
    pub fn eval(&self, meq: &MasterEq, final_state: &Array1<f64>) -> f64 {
        let cmp = if self.is_full_system() {
            final_state.clone()
        } else {
            meq.reduced_density(final_state, &self.osc_ids)
        };
        let m = self.reduced_dim;
        let mut j = 0.0;
        for a in 0..m {
            for b in 0..m {
                let tgt = if a == self.level && b == self.level { 1.0 } else { 0.0 };
                let re = cmp[2 * (a * m + b)] - tgt;
                let im = cmp[2 * (a * m + b) + 1];
                j += re * re + im * im;
            }
        }
        0.5 * j
    }

    pub fn eval_diff(
        &self,
        meq: &MasterEq,
        final_state: &Array1<f64>,
        obj_bar: f64,
        bar_final: &mut Array1<f64>,
    ) {
        let cmp = if self.is_full_system() {
            final_state.clone()
        } else {
            meq.reduced_density(final_state, &self.osc_ids)
        };
        let m = self.reduced_dim;
        let mut red_bar = Array1::zeros(2 * m * m);
        for a in 0..m {
            for b in 0..m {
                let tgt = if a == self.level && b == self.level { 1.0 } else { 0.0 };
                red_bar[2 * (a * m + b)] = (cmp[2 * (a * m + b)] - tgt) * obj_bar;
                red_bar[2 * (a * m + b) + 1] = cmp[2 * (a * m + b) + 1] * obj_bar;
            }
        }
        if self.is_full_system() {
            *bar_final += &red_bar;
        } else {
            meq.reduced_density_diff(bar_final, &red_bar, &self.osc_ids);
        }
    }
}

impl EnergyTarget {
    pub fn new(variant: EnergyVariant, osc_ids: Vec<usize>, meq: &MasterEq) -> Result<Self> {
        for &k in &osc_ids {
            if k >= meq.noscillators() {
                return Err(EngineError::config_value(
                    "optim_objective",
                    format!("oscillator id {} out of range", k),
                ));
            }
        }
        if osc_ids.is_empty() {
            return Err(EngineError::config_value(
                "optim_objective",
                "expected at least one oscillator id",
            ));
        }
        Ok(EnergyTarget { variant, osc_ids })
    }

    pub fn eval(&self, meq: &MasterEq, final_state: &Array1<f64>) -> f64 {
        let m = self.osc_ids.len() as f64;
        match self.variant {
            EnergyVariant::ZeroToOne => {
                let dim = meq.dim();
                let mut j = 0.0;
                for &k in &self.osc_ids {
                    let osc = &meq.oscillators()[k];
                    for i in 0..dim {
                        let weight = (osc.level_of(i) as f64 - 1.0).abs();
                        j += weight * final_state[2 * (i * dim + i)];
                    }
                }
                j
            }
            _ => {
                let energies: Vec<f64> = self
                    .osc_ids
                    .iter()
                    .map(|&k| meq.oscillators()[k].expected_energy(final_state))
                    .collect();
                match self.variant {
                    EnergyVariant::SquareOfAverage => {
                        let avg = energies.iter().sum::<f64>() / m;
                        avg * avg
                    }
                    EnergyVariant::AverageOfSquare => {
                        energies.iter().map(|e| e * e).sum::<f64>() / m
                    }
                    EnergyVariant::Average => energies.iter().sum::<f64>() / m,
                    EnergyVariant::ZeroToOne => unreachable!(),
                }
            }
        }
    }

    pub fn eval_diff(
        &self,
        meq: &MasterEq,
        final_state: &Array1<f64>,
        obj_bar: f64,
        bar_final: &mut Array1<f64>,
    ) {
        let m = self.osc_ids.len() as f64;
        match self.variant {
            EnergyVariant::ZeroToOne => {
                let dim = meq.dim();
                for &k in &self.osc_ids {
                    let osc = &meq.oscillators()[k];
                    for i in 0..dim {
                        let weight = (osc.level_of(i) as f64 - 1.0).abs();
                        bar_final[2 * (i * dim + i)] += weight * obj_bar;
                    }
                }
            }
            _ => {
                for &k in &self.osc_ids {
                    let osc = &meq.oscillators()[k];
                    let seed = match self.variant {
                        EnergyVariant::SquareOfAverage => {
                            let avg = self
                                .osc_ids
                                .iter()
                                .map(|&l| meq.oscillators()[l].expected_energy(final_state))
                                .sum::<f64>()
                                / m;
                            2.0 * avg / m
                        }
                        EnergyVariant::AverageOfSquare => {
                            2.0 * osc.expected_energy(final_state) / m
                        }
                        EnergyVariant::Average => 1.0 / m,
                        EnergyVariant::ZeroToOne => unreachable!(),
                    };
                    osc.expected_energy_diff(bar_final, seed * obj_bar);
                }
            }
        }
    }
}

impl Target {
    /// Objective value for one initial condition.
    pub fn eval(&self, meq: &MasterEq, final_state: &Array1<f64>, rho0: &Array1<f64>) -> f64 {
        match self {
            Target::Gate(g) => g.eval(final_state, rho0),
            Target::Pure(p) => p.eval(meq, final_state),
            Target::Energy(e) => e.eval(meq, final_state),
        }
    }

    /// Accumulate obj_bar * dJ/d(rho(T)) into the adjoint seed.
    pub fn eval_diff(
        &self,
        meq: &MasterEq,
        final_state: &Array1<f64>,
        rho0: &Array1<f64>,
        obj_bar: f64,
        bar_final: &mut Array1<f64>,
    ) {
        match self {
            Target::Gate(g) => g.eval_diff(final_state, rho0, obj_bar, bar_final),
            Target::Pure(p) => p.eval_diff(meq, final_state, obj_bar, bar_final),
            Target::Energy(e) => e.eval_diff(meq, final_state, obj_bar, bar_final),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mastereq::LindbladType;
    use crate::oscillator::Oscillator;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_meq(nlevels: &[usize]) -> MasterEq {
        let oscillators: Vec<Oscillator> = (0..nlevels.len())
            .map(|id| {
                Oscillator::new(id, nlevels, 5, &[0.0], 4.1, 4.1, 0.0, 0.0, 0.0, 1.0).unwrap()
            })
            .collect();
        MasterEq::new(oscillators, &[], LindbladType::None).unwrap()
    }

    fn pure_state(dim: usize, level: usize) -> Array1<f64> {
        let mut state = Array1::zeros(2 * dim * dim);
        state[2 * (level * dim + level)] = 1.0;
        state
    }

    fn random_state(len: usize, seed: u64) -> Array1<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array1::from_iter((0..len).map(|_| rng.gen_range(-1.0..1.0)))
    }

    #[test]
    fn test_xgate_frobenius_analytic_value() {
        // Final state |0><0| vs target X|0><0|X = |1><1|: J = 1/2 * 2 = 1
        let gate = GateTarget::new(GateKind::X, GateMetric::Frobenius, 2).unwrap();
        let rho0 = pure_state(2, 0);
        let j = gate.eval(&rho0, &rho0);
        assert_relative_eq!(j, 1.0, epsilon = 1e-14);

        // Perfect transfer: rho(T) = |1><1| gives J = 0
        let rho1 = pure_state(2, 1);
        assert_relative_eq!(gate.eval(&rho1, &rho0), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_xgate_trace_overlap() {
        let gate = GateTarget::new(GateKind::X, GateMetric::Trace, 2).unwrap();
        let rho0 = pure_state(2, 0);
        assert_relative_eq!(gate.eval(&rho0, &rho0), 1.0, epsilon = 1e-14);
        assert_relative_eq!(gate.eval(&pure_state(2, 1), &rho0), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_hadamard_maps_ground_to_plus() {
        let gate = GateTarget::new(GateKind::Hadamard, GateMetric::Frobenius, 2).unwrap();
        let rho0 = pure_state(2, 0);
        // |+><+| in the interleaved layout: all Re entries 1/2
        let mut plus = Array1::zeros(8);
        for i in 0..2 {
            for j in 0..2 {
                plus[2 * (i * 2 + j)] = 0.5;
            }
        }
        assert_relative_eq!(gate.eval(&plus, &rho0), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_ygate_preserves_hermiticity_of_target() {
        // Y = [[0,-i],[i,0]]: Y|0><0|Y^dagger = |1><1|
        let gate = GateTarget::new(GateKind::Y, GateMetric::Frobenius, 2).unwrap();
        let rho0 = pure_state(2, 0);
        assert_relative_eq!(gate.eval(&pure_state(2, 1), &rho0), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_cnot_truth_table() {
        let gate = GateTarget::new(GateKind::Cnot, GateMetric::Frobenius, 4).unwrap();
        // |10> (index 2) maps to |11> (index 3)
        assert_relative_eq!(gate.eval(&pure_state(4, 3), &pure_state(4, 2)), 0.0, epsilon = 1e-14);
        // |01> (index 1) stays
        assert_relative_eq!(gate.eval(&pure_state(4, 1), &pure_state(4, 1)), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_gate_dimension_mismatch_is_config_error() {
        let err = GateTarget::new(GateKind::Cnot, GateMetric::Frobenius, 2).unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_gate_diff_matches_finite_differences() {
        for metric in [GateMetric::Frobenius, GateMetric::Trace] {
            let gate = GateTarget::new(GateKind::Hadamard, metric, 2).unwrap();
            let rho0 = pure_state(2, 0);
            let state = random_state(8, 3);
            let mut bar = Array1::zeros(8);
            gate.eval_diff(&state, &rho0, 1.0, &mut bar);

            let eps = 1e-6;
            for i in 0..8 {
                let mut sp = state.clone();
                sp[i] += eps;
                let mut sm = state.clone();
                sm[i] -= eps;
                let fd = (gate.eval(&sp, &rho0) - gate.eval(&sm, &rho0)) / (2.0 * eps);
                assert_relative_eq!(bar[i], fd, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_pure_target_on_subsystem() {
        let meq = make_meq(&[2, 2]);
        let target = PureTarget::new(1, vec![1], &meq).unwrap();
        // Full state |01><01|: subsystem 1 is exactly |1><1|
        let state = pure_state(4, 1);
        assert_relative_eq!(target.eval(&meq, &state), 0.0, epsilon = 1e-14);
        // |00><00| has the subsystem in |0><0|: J = 1/2 (1 + 1) = 1
        assert_relative_eq!(target.eval(&meq, &pure_state(4, 0)), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_pure_target_diff_matches_finite_differences() {
        let meq = make_meq(&[2, 2]);
        let target = PureTarget::new(1, vec![0], &meq).unwrap();
        let state = random_state(32, 5);
        let mut bar = Array1::zeros(32);
        target.eval_diff(&meq, &state, 1.0, &mut bar);

        let eps = 1e-6;
        for i in 0..32 {
            let mut sp = state.clone();
            sp[i] += eps;
            let mut sm = state.clone();
            sm[i] -= eps;
            let fd = (target.eval(&meq, &sp) - target.eval(&meq, &sm)) / (2.0 * eps);
            assert_relative_eq!(bar[i], fd, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_energy_variants_and_diffs() {
        let meq = make_meq(&[3]);
        let state = pure_state(3, 2);
        for variant in [
            EnergyVariant::Average,
            EnergyVariant::SquareOfAverage,
            EnergyVariant::AverageOfSquare,
            EnergyVariant::ZeroToOne,
        ] {
            let target = EnergyTarget::new(variant, vec![0], &meq).unwrap();
            let j = target.eval(&meq, &state);
            match variant {
                EnergyVariant::Average => assert_relative_eq!(j, 2.0),
                EnergyVariant::SquareOfAverage | EnergyVariant::AverageOfSquare => {
                    assert_relative_eq!(j, 4.0)
                }
                EnergyVariant::ZeroToOne => assert_relative_eq!(j, 1.0),
            }

            let probe = random_state(18, 7);
            let mut bar = Array1::zeros(18);
            target.eval_diff(&meq, &probe, 1.0, &mut bar);
            let eps = 1e-6;
            for i in 0..18 {
                let mut sp = probe.clone();
                sp[i] += eps;
                let mut sm = probe.clone();
                sm[i] -= eps;
                let fd = (target.eval(&meq, &sp) - target.eval(&meq, &sm)) / (2.0 * eps);
                assert_relative_eq!(bar[i], fd, epsilon = 1e-7);
            }
        }
    }
}
