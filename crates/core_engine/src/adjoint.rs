//! Reverse sweep over a forward trajectory
//!
//! The engine owns the reduced-gradient buffer keyed by design-vector index.
//! Zeroing the buffer before a new accumulation is the caller's
//! responsibility via `reset_gradient`; the result is exposed as a borrow
//! valid until the next sweep begins or the engine is dropped.

use crate::error::Result;
use crate::mastereq::MasterEq;
use crate::timestepper::TimeStepper;
use ndarray::Array1;

pub struct AdjointEngine {
    grad: Vec<f64>,
}

impl AdjointEngine {
    pub fn new(ndesign: usize) -> Self {
        AdjointEngine {
            grad: vec![0.0; ndesign],
        }
    }

    pub fn reset_gradient(&mut self) {
        self.grad.iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn reduced_gradient(&self) -> &[f64] {
        &self.grad
    }

    /// Drive the stepper backwards through its recorded trajectory, seeded by
    /// the target derivative rho_bar(T). Gradient contributions accumulate on
    /// top of whatever the buffer already holds.
    pub fn sweep(
        &mut self,
        stepper: &mut TimeStepper,
        meq: &mut MasterEq,
        rho_bar_final: Array1<f64>,
    ) -> Result<()> {
        stepper.begin_adjoint()?;
        let mut rho_bar = rho_bar_final;
        for n in (0..stepper.ntime()).rev() {
            rho_bar = stepper.adjoint_step(meq, n, &rho_bar, &mut self.grad)?;
        }
        stepper.finish_adjoint()?;
        Ok(())
    }
}
