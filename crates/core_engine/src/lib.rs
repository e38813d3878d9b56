//! Quantum Control Engine - Core Library
//!
//! Optimizes time-dependent control pulses driving coupled quantum
//! oscillators so that the resulting Lindblad evolution realizes a requested
//! target: a unitary gate, a pure state, or an expected-energy profile.
//!
//! # Architecture
//!
//! The evaluation of one design vector flows through a fixed graph:
//! 1. **Oscillator / ControlBasis**: spline coefficients → controls p(t), q(t)
//! 2. **MasterEq**: controls → vectorized Lindblad operator M(t)
//! 3. **TimeStepper**: implicit-midpoint integration of d rho/dt = M(t) rho
//! 4. **Target**: final state → objective value per initial condition
//! 5. **AdjointEngine**: exact discrete adjoint of 2-4 → reduced gradient
//! 6. **OptimizerDriver**: box-constrained L-BFGS over the design vector
//!
//! # Example
//!
//! ```rust,ignore
//! use quantum_control_engine::{config::Settings, runner};
//!
//! let settings = Settings::from_file(std::path::Path::new("cnot.cfg"))?;
//! let summary = runner::run(&settings)?;
//! println!("fidelity: {}", summary.fidelity);
//! ```

pub mod adjoint;
pub mod basis;
pub mod config;
pub mod error;
pub mod initcond;
pub mod linsolve;
pub mod logging;
pub mod mastereq;
pub mod optim_driver;
pub mod optim_problem;
pub mod oscillator;
pub mod output;
pub mod runner;
pub mod runtime;
pub mod target;
pub mod timestepper;

// Re-exports for convenience
pub use adjoint::AdjointEngine;
pub use basis::{ControlBasis, ControlType, PiPulse};
pub use config::{Config, ObjectiveSpec, RunType, Settings, StartingPointKind};
pub use error::{EngineError, Result};
pub use initcond::{InitialConditionType, InitialConditions};
pub use linsolve::{LinearSolverConfig, LinearSolverType};
pub use logging::{set_log_level, LogLevel, Timer};
pub use mastereq::{LindbladType, MasterEq};
pub use optim_driver::{IterInfo, OptimResult, OptimStatus, OptimizerDriver};
pub use optim_problem::OptimProblem;
pub use oscillator::Oscillator;
pub use output::Output;
pub use runner::{run, RunSummary};
pub use runtime::Runtime;
pub use target::{EnergyVariant, GateKind, GateMetric, Target};
pub use timestepper::{StepperPhase, TimeStepper};

/// Version of the quantum control engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Numerical tolerance for validation checks
pub const VALIDATION_TOL: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
