//! Optimizer-facing problem: design vector, objective and gradient
//!
//! The design vector x is the concatenation of the per-oscillator spline
//! coefficients. eval_f runs a forward solve per initial condition and
//! averages the per-condition objectives; eval_grad_f additionally runs the
//! adjoint sweep per condition. Contributions are combined with deterministic
//! tree reductions in global ensemble order, so the result does not depend on
//! the logical partition of the init group.

use crate::adjoint::AdjointEngine;
use crate::config::{ObjectiveSpec, Settings, StartingPointKind};
use crate::error::{EngineError, Result};
use crate::initcond::InitialConditions;
use crate::mastereq::MasterEq;
use crate::oscillator::Oscillator;
use crate::runtime::Runtime;
use crate::target::{EnergyTarget, GateTarget, PureTarget, Target};
use crate::timestepper::TimeStepper;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct OptimProblem {
    pub meq: MasterEq,
    pub stepper: TimeStepper,
    pub target: Target,
    pub initconds: InitialConditions,
    adjoint: AdjointEngine,
    runtime: Runtime,
    ndesign: usize,
    gamma_tik: f64,
    bounds: Vec<f64>,
    start: StartingPointKind,
    init_consts: Vec<f64>,
    /// 1 - average objective of the last evaluation, before regularization
    fidelity: f64,
}

impl OptimProblem {
    pub fn new(settings: &Settings, runtime: Runtime) -> Result<Self> {
        let nlevels: Vec<usize> = settings.oscillators.iter().map(|o| o.nlevels).collect();
        let mut oscillators = Vec::with_capacity(nlevels.len());
        for (id, osc) in settings.oscillators.iter().enumerate() {
            let mut o = Oscillator::new(
                id,
                &nlevels,
                settings.nspline,
                &osc.carrier_freqs,
                osc.ground_freq,
                osc.rotation_freq,
                osc.selfkerr,
                osc.decay_rate,
                osc.dephase_rate,
                settings.total_time,
            )?;
            for pulse in &osc.pipulses {
                o.add_pipulse(pulse.clone());
            }
            oscillators.push(o);
        }

        let meq = MasterEq::new(oscillators, &settings.crosskerr, settings.lindblad)?;
        let stepper = TimeStepper::new(settings.ntime, settings.total_time, settings.linsolve.clone())?;
        let target = Self::build_target(&settings.objective, &meq)?;
        let initconds = InitialConditions::new(&settings.initcond, &meq)?;
        runtime.ninit_local(initconds.ninit())?;

        let ndesign = meq.nparams();
        let mut bounds = Vec::with_capacity(ndesign);
        for (osc, cfg) in meq.oscillators().iter().zip(&settings.oscillators) {
            bounds.extend(std::iter::repeat(cfg.bound.abs()).take(osc.nparams()));
        }
        let init_consts = settings.oscillators.iter().map(|o| o.init_const).collect();

        Ok(OptimProblem {
            adjoint: AdjointEngine::new(ndesign),
            meq,
            stepper,
            target,
            initconds,
            runtime,
            ndesign,
            gamma_tik: settings.regul,
            bounds,
            start: settings.optim_init.clone(),
            init_consts,
            fidelity: 0.0,
        })
    }

    fn build_target(spec: &ObjectiveSpec, meq: &MasterEq) -> Result<Target> {
        let all_ids = |ids: &Vec<usize>| -> Vec<usize> {
            if ids.is_empty() {
                (0..meq.noscillators()).collect()
            } else {
                ids.clone()
            }
        };
        Ok(match spec {
            ObjectiveSpec::Gate { kind, metric } => {
                Target::Gate(GateTarget::new(*kind, *metric, meq.dim())?)
            }
            ObjectiveSpec::PureM { level, osc_ids } => {
                Target::Pure(PureTarget::new(*level, all_ids(osc_ids), meq)?)
            }
            ObjectiveSpec::GroundState { osc_ids } => {
                Target::Pure(PureTarget::new(0, all_ids(osc_ids), meq)?)
            }
            ObjectiveSpec::ExpectedEnergy { variant, osc_ids } => {
                Target::Energy(EnergyTarget::new(*variant, all_ids(osc_ids), meq)?)
            }
            ObjectiveSpec::ZeroToOne { osc_ids } => Target::Energy(EnergyTarget::new(
                crate::target::EnergyVariant::ZeroToOne,
                all_ids(osc_ids),
                meq,
            )?),
        })
    }

    /// (number of design variables, number of constraints)
    pub fn get_prob_sizes(&self) -> (usize, usize) {
        (self.ndesign, 0)
    }

    /// Box bounds per design variable: [-bound_k, +bound_k].
    pub fn get_vars_info(&self) -> (Vec<f64>, Vec<f64>) {
        let lower: Vec<f64> = self.bounds.iter().map(|b| -b).collect();
        (lower, self.bounds.clone())
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Scatter the design vector into the oscillators.
    pub fn set_design(&mut self, x: &[f64]) {
        debug_assert_eq!(x.len(), self.ndesign);
        let mut offset = 0;
        for osc in self.meq.oscillators_mut() {
            let np = osc.nparams();
            osc.set_params(&x[offset..offset + np]);
            offset += np;
        }
    }

    /// Gather the current oscillator parameters into a design vector.
    pub fn get_design(&self) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.ndesign);
        for osc in self.meq.oscillators() {
            x.extend_from_slice(osc.params());
        }
        x
    }

    /// Fidelity 1 - J_avg of the last objective evaluation.
    pub fn fidelity(&self) -> f64 {
        self.fidelity
    }

    /// Objective: ensemble average plus Tikhonov term gamma/(2n) ||x||^2.
    pub fn eval_f(&mut self, x: &[f64]) -> Result<f64> {
        self.set_design(x);
        let ninit = self.initconds.ninit();
        let mut contributions = Vec::with_capacity(ninit);

        let mut rho0 = Array1::zeros(self.meq.state_len());
        for iinit in 0..ninit {
            self.initconds.assemble(iinit, &mut rho0)?;
            let final_state = self.stepper.solve(&mut self.meq, rho0.clone())?;
            contributions.push(self.target.eval(&self.meq, final_state, &rho0));
        }

        let favg = Runtime::tree_sum(&contributions) / ninit as f64;
        self.fidelity = 1.0 - favg;
        Ok(favg + self.tikhonov(x))
    }

    /// Objective and reduced gradient via the discrete adjoint.
    pub fn eval_grad_f(&mut self, x: &[f64], grad: &mut [f64]) -> Result<f64> {
        debug_assert_eq!(grad.len(), self.ndesign);
        self.set_design(x);
        let ninit = self.initconds.ninit();
        let obj_bar = 1.0 / ninit as f64;

        let mut contributions = Vec::with_capacity(ninit);
        let mut grad_contributions: Vec<Vec<f64>> = Vec::with_capacity(ninit);

        let mut rho0 = Array1::zeros(self.meq.state_len());
        for iinit in 0..ninit {
            self.initconds.assemble(iinit, &mut rho0)?;
            let final_state = self.stepper.solve(&mut self.meq, rho0.clone())?.clone();
            contributions.push(self.target.eval(&self.meq, &final_state, &rho0));

            let mut seed = Array1::zeros(self.meq.state_len());
            self.target
                .eval_diff(&self.meq, &final_state, &rho0, obj_bar, &mut seed);

            self.adjoint.reset_gradient();
            self.adjoint.sweep(&mut self.stepper, &mut self.meq, seed)?;
            grad_contributions.push(self.adjoint.reduced_gradient().to_vec());
        }

        let favg = Runtime::tree_sum(&contributions) / ninit as f64;
        self.fidelity = 1.0 - favg;

        let summed = Runtime::tree_sum_vectors(&grad_contributions);
        let n = self.ndesign as f64;
        for (i, g) in grad.iter_mut().enumerate() {
            // The Tikhonov term is added once, then shared by the reduction
            *g = summed[i] + self.gamma_tik / n * x[i];
        }
        Ok(favg + self.tikhonov(x))
    }

    fn tikhonov(&self, x: &[f64]) -> f64 {
        let norm_sq: f64 = x.iter().map(|xi| xi * xi).sum();
        self.gamma_tik / (2.0 * self.ndesign as f64) * norm_sq
    }

    /// Initial design vector: zero, per-oscillator constants, seeded random
    /// in [-1, 1], or a parameter file. Always clipped to the box.
    pub fn get_starting_point(&mut self) -> Result<Vec<f64>> {
        let mut x0 = match &self.start {
            StartingPointKind::Zero => vec![0.0; self.ndesign],
            StartingPointKind::Constant => {
                let mut x = Vec::with_capacity(self.ndesign);
                for (osc, &amp) in self.meq.oscillators().iter().zip(&self.init_consts) {
                    x.extend(std::iter::repeat(amp).take(osc.nparams()));
                }
                x
            }
            StartingPointKind::Random { seed } => {
                let mut rng = StdRng::seed_from_u64(*seed);
                (0..self.ndesign).map(|_| rng.gen_range(-1.0..1.0)).collect()
            }
            StartingPointKind::FromFile(path) => {
                let content = std::fs::read_to_string(path)?;
                let values: Vec<f64> = content
                    .lines()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(|l| {
                        l.parse().map_err(|_| {
                            EngineError::config_value(
                                "optim_init",
                                format!("invalid parameter value '{}'", l),
                            )
                        })
                    })
                    .collect::<Result<_>>()?;
                if values.len() != self.ndesign {
                    return Err(EngineError::dimension_mismatch(
                        format!("{} parameters", self.ndesign),
                        format!("{}", values.len()),
                    ));
                }
                values
            }
        };
        // Out-of-bounds entries are clipped silently
        for (xi, &b) in x0.iter_mut().zip(&self.bounds) {
            *xi = xi.clamp(-b, b);
        }
        self.set_design(&x0);
        Ok(x0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Settings};

    fn settings(extra: &str) -> Settings {
        let base = format!(
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
            optim_bounds = 2.0
            {}
            ",
            extra
        );
        Settings::from_config(&Config::parse(&base).unwrap()).unwrap()
    }

    fn problem(extra: &str) -> OptimProblem {
        let s = settings(extra);
        OptimProblem::new(&s, Runtime::new(s.np_init, s.np_braid).unwrap()).unwrap()
    }

    #[test]
    fn test_prob_sizes_and_bounds() {
        let p = problem("");
        let (n, m) = p.get_prob_sizes();
        assert_eq!(n, 2 * 5);
        assert_eq!(m, 0);
        let (lower, upper) = p.get_vars_info();
        assert!(lower.iter().all(|&l| l == -2.0));
        assert!(upper.iter().all(|&u| u == 2.0));
    }

    #[test]
    fn test_design_roundtrip() {
        let mut p = problem("");
        let x: Vec<f64> = (0..10).map(|i| 0.1 * i as f64).collect();
        p.set_design(&x);
        assert_eq!(p.get_design(), x);
    }

    #[test]
    fn test_zero_control_xgate_objective() {
        // Identity evolution against the X gate from |0><0|: J = 1 exactly
        let mut p = problem("");
        let x = vec![0.0; 10];
        let j = p.eval_f(&x).unwrap();
        assert!((j - 1.0).abs() < 1e-9, "J = {}", j);
        assert!(p.fidelity().abs() < 1e-9);
    }

    #[test]
    fn test_basis_ensemble_average() {
        // The four Hermitian basis elements give {1, 1, 0, 1}: average 0.75
        let mut p = problem("initialcondition_type = basis\noptim_initialcondition =");
        assert_eq!(p.initconds.ninit(), 4);
        let j = p.eval_f(&vec![0.0; 10]).unwrap();
        assert!((j - 0.75).abs() < 1e-9, "J = {}", j);
    }

    #[test]
    fn test_regularization_law() {
        // J(x) - J_unreg(x) = gamma/(2n) ||x||^2 to machine precision
        let mut p_reg = problem("optim_regul = 0.01");
        let mut p_unreg = problem("");
        let x: Vec<f64> = (0..10).map(|i| 0.05 * (i as f64 + 1.0)).collect();
        let j_reg = p_reg.eval_f(&x).unwrap();
        let j_unreg = p_unreg.eval_f(&x).unwrap();
        let norm_sq: f64 = x.iter().map(|v| v * v).sum();
        let expected = 0.01 / (2.0 * 10.0) * norm_sq;
        assert!((j_reg - j_unreg - expected).abs() < 1e-15);
    }

    #[test]
    fn test_determinism_bitwise() {
        let mut p = problem("");
        let x: Vec<f64> = (0..10).map(|i| 0.07 * i as f64 - 0.2).collect();
        let j1 = p.eval_f(&x).unwrap();
        let j2 = p.eval_f(&x).unwrap();
        assert_eq!(j1.to_bits(), j2.to_bits());
    }

    #[test]
    fn test_partition_equivalence() {
        // Same ensemble evaluated under different logical init-group sizes
        let extra = "initialcondition_type = basis\noptim_initialcondition =";
        let s = settings(extra);
        let mut objs = Vec::new();
        for np_init in [1, 2, 4] {
            let mut p = OptimProblem::new(&s, Runtime::new(np_init, 1).unwrap()).unwrap();
            objs.push(p.eval_f(&vec![0.02; 10]).unwrap());
        }
        assert_eq!(objs[0].to_bits(), objs[1].to_bits());
        assert_eq!(objs[0].to_bits(), objs[2].to_bits());
    }

    #[test]
    fn test_starting_point_within_bounds() {
        for extra in [
            "optim_init = zero",
            "optim_init = constant\noptim_init_const = 5.0",
            "optim_init = random_seed\noptim_init_seed = 3",
        ] {
            let mut p = problem(extra);
            let x0 = p.get_starting_point().unwrap();
            let (lower, upper) = p.get_vars_info();
            for ((xi, lo), up) in x0.iter().zip(&lower).zip(&upper) {
                assert!(*xi >= *lo && *xi <= *up);
            }
        }
    }

    #[test]
    fn test_random_start_is_reproducible() {
        let mut p1 = problem("optim_init = random_seed\noptim_init_seed = 5");
        let mut p2 = problem("optim_init = random_seed\noptim_init_seed = 5");
        assert_eq!(p1.get_starting_point().unwrap(), p2.get_starting_point().unwrap());
    }

    #[test]
    fn test_gradient_matches_objective_differences() {
        let mut p = problem("");
        let x: Vec<f64> = (0..10).map(|i| 0.03 * i as f64 - 0.1).collect();
        let mut grad = vec![0.0; 10];
        let j0 = p.eval_grad_f(&x, &mut grad).unwrap();
        assert!(j0.is_finite());

        let eps = 1e-4;
        for i in 0..10 {
            let mut xp = x.clone();
            xp[i] += eps;
            let mut xm = x.clone();
            xm[i] -= eps;
            let fd = (p.eval_f(&xp).unwrap() - p.eval_f(&xm).unwrap()) / (2.0 * eps);
            assert!(
                (grad[i] - fd).abs() <= 1e-7 + 1e-4 * fd.abs(),
                "component {}: adjoint {} vs fd {}",
                i,
                grad[i],
                fd
            );
        }
    }
}
