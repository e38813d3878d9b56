//! File output: optimization history, controls, parameters and time series
//!
//! All file writing is concentrated here and driven from the run functions
//! and optimizer callbacks; the numerical components never touch the
//! filesystem. Write failures during iteration logging degrade to warnings
//! so a full optimization is not lost to a transient disk problem.

use crate::config::Settings;
use crate::error::Result;
use crate::log_warn;
use crate::mastereq::MasterEq;
use crate::runtime::Runtime;
use ndarray::Array1;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub struct Output {
    datadir: PathBuf,
    enabled: bool,
    optimfile: Option<BufWriter<File>>,
    pub output_frequency: usize,
    pub optim_monitor_freq: usize,
    writefullstate: bool,
    ufile: Option<BufWriter<File>>,
    vfile: Option<BufWriter<File>>,
    expectedfiles: Vec<BufWriter<File>>,
    populationfiles: Vec<BufWriter<File>>,
}

impl Output {
    pub fn new(settings: &Settings, runtime: &Runtime) -> Result<Self> {
        let enabled = runtime.is_output_rank();
        if enabled {
            std::fs::create_dir_all(&settings.datadir)?;
        }
        Ok(Output {
            datadir: settings.datadir.clone(),
            enabled,
            optimfile: None,
            output_frequency: settings.output_frequency.max(1),
            optim_monitor_freq: settings.optim_monitor_freq.max(1),
            writefullstate: settings.writefullstate,
            ufile: None,
            vfile: None,
            expectedfiles: Vec::new(),
            populationfiles: Vec::new(),
        })
    }

    pub fn datadir(&self) -> &PathBuf {
        &self.datadir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.datadir.join(name)
    }

    /// Open optim.dat and write its header line.
    pub fn open_optim_file(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut file = BufWriter::new(File::create(self.path("optim.dat"))?);
        writeln!(
            file,
            "# Optimization history, started {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(file, "# iter obj_value fidelity ||grad|| inf_du ls_trials")?;
        self.optimfile = Some(file);
        Ok(())
    }

    /// Append one optimization-history row. Failures are warnings only.
    pub fn write_optim_line(
        &mut self,
        iter: usize,
        objective: f64,
        fidelity: f64,
        gnorm: f64,
        inf_du: f64,
        ls_trials: usize,
    ) {
        if let Some(file) = self.optimfile.as_mut() {
            let row = writeln!(
                file,
                "{} {:1.14e} {:1.14e} {:1.14e} {:1.14e} {}",
                iter, objective, fidelity, gnorm, inf_du, ls_trials
            )
            .and_then(|_| file.flush());
            if let Err(e) = row {
                log_warn!("output", "skipping optim.dat row: {}", e);
            }
        }
    }

    /// Write one control file per oscillator: columns t p(t) q(t) f_lab(t).
    pub fn write_controls(&self, meq: &MasterEq, ntime: usize, dt: f64, tag: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for (k, osc) in meq.oscillators().iter().enumerate() {
            let name = format!("control_{}_{:02}.dat", tag, k);
            let mut file = BufWriter::new(File::create(self.path(&name))?);
            writeln!(file, "# t  p(t)  q(t)  f(t)")?;
            for n in 0..=ntime {
                let t = n as f64 * dt;
                let (p, q) = osc.eval_control(t)?;
                let f = osc.eval_control_labframe(t)?;
                writeln!(file, "{:1.8e}  {:1.14e}  {:1.14e}  {:1.14e}", t, p, q, f)?;
            }
        }
        Ok(())
    }

    /// One coefficient per line.
    pub fn write_params(&self, x: &[f64], name: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut file = BufWriter::new(File::create(self.path(name))?);
        for xi in x {
            writeln!(file, "{:1.14e}", xi)?;
        }
        Ok(())
    }

    pub fn write_gradient(&self, grad: &[f64]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut file = BufWriter::new(File::create(self.path("grad.dat"))?);
        for g in grad {
            writeln!(file, "{:1.14e}", g)?;
        }
        Ok(())
    }

    /// Open the per-timestep data files for one initial condition. With a
    /// single ensemble member the literal names rho_Re.dat etc. are used;
    /// otherwise the init id is infixed.
    pub fn open_data_files(&mut self, meq: &MasterEq, init_id: usize, ninit: usize) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.close_data_files();
        let infix = if ninit == 1 {
            String::new()
        } else {
            format!("_init{:04}", init_id)
        };
        if self.writefullstate {
            self.ufile = Some(BufWriter::new(File::create(
                self.path(&format!("rho_Re{}.dat", infix)),
            )?));
            self.vfile = Some(BufWriter::new(File::create(
                self.path(&format!("rho_Im{}.dat", infix)),
            )?));
        }
        for k in 0..meq.noscillators() {
            self.expectedfiles.push(BufWriter::new(File::create(
                self.path(&format!("expected_{}{}.dat", k, infix)),
            )?));
            self.populationfiles.push(BufWriter::new(File::create(
                self.path(&format!("population_{}{}.dat", k, infix)),
            )?));
        }
        Ok(())
    }

    /// Append one row per open data file for the state at (step, t).
    pub fn write_data_line(
        &mut self,
        meq: &MasterEq,
        step: usize,
        t: f64,
        state: &Array1<f64>,
    ) -> Result<()> {
        if !self.enabled || step % self.output_frequency != 0 {
            return Ok(());
        }
        if let (Some(uf), Some(vf)) = (self.ufile.as_mut(), self.vfile.as_mut()) {
            write!(uf, "{:.4}", t)?;
            write!(vf, "{:.4}", t)?;
            for i in 0..state.len() / 2 {
                write!(uf, "  {:1.10e}", state[2 * i])?;
                write!(vf, "  {:1.10e}", state[2 * i + 1])?;
            }
            writeln!(uf)?;
            writeln!(vf)?;
        }
        for (k, osc) in meq.oscillators().iter().enumerate() {
            let file = &mut self.expectedfiles[k];
            writeln!(file, "{:.4}  {:1.14e}", t, osc.expected_energy(state))?;
            let pfile = &mut self.populationfiles[k];
            write!(pfile, "{:.4}", t)?;
            for p in osc.population(state) {
                write!(pfile, "  {:1.14e}", p)?;
            }
            writeln!(pfile)?;
        }
        Ok(())
    }

    pub fn close_data_files(&mut self) {
        self.ufile = None;
        self.vfile = None;
        self.expectedfiles.clear();
        self.populationfiles.clear();
    }
}
