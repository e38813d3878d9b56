//! Benchmarks for the integrator hot path

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array1;
use quantum_control_engine::linsolve::{LinearSolverConfig, LinearSolverType};
use quantum_control_engine::mastereq::{LindbladType, MasterEq};
use quantum_control_engine::oscillator::Oscillator;
use quantum_control_engine::timestepper::TimeStepper;

fn two_qubit_system() -> MasterEq {
    let nlevels = [2, 2];
    let oscillators: Vec<Oscillator> = (0..2)
        .map(|id| {
            let mut osc = Oscillator::new(
                id,
                &nlevels,
                10,
                &[0.0, 0.1],
                4.1 + id as f64,
                4.0 + id as f64,
                0.2,
                0.01,
                0.005,
                4.0,
            )
            .unwrap();
            let params: Vec<f64> = (0..osc.nparams()).map(|i| (i as f64 * 0.37).sin() * 0.2).collect();
            osc.set_params(&params);
            osc
        })
        .collect();
    MasterEq::new(oscillators, &[0.02], LindbladType::Both).unwrap()
}

fn benchmark_apply(c: &mut Criterion) {
    let mut meq = two_qubit_system();
    meq.assemble(1.3).unwrap();
    let x = Array1::from_iter((0..meq.state_len()).map(|i| (i as f64 * 0.71).cos()));
    let mut out = Array1::zeros(meq.state_len());

    c.bench_function("mastereq_apply", |b| {
        b.iter(|| {
            meq.apply(black_box(&x), &mut out);
        });
    });
}

fn benchmark_forward_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("timestepper");
    for solver in [LinearSolverType::Gmres, LinearSolverType::Neumann] {
        group.bench_function(format!("forward_{:?}", solver), |b| {
            let mut meq = two_qubit_system();
            let cfg = LinearSolverConfig {
                solver,
                maxiter: 50,
                ..LinearSolverConfig::default()
            };
            let mut stepper = TimeStepper::new(100, 4.0, cfg).unwrap();
            let mut rho0 = Array1::zeros(meq.state_len());
            rho0[0] = 1.0;
            b.iter(|| {
                stepper.solve(&mut meq, black_box(rho0.clone())).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_apply, benchmark_forward_solve);
criterion_main!(benches);
