//! Configuration file parsing
//!
//! The configuration is a flat `key = value` text file. Lines starting with
//! `#` or `//` are comments; list values are comma separated. Per-oscillator
//! keys carry the oscillator index as a suffix, e.g. `nlevels_0`.

use crate::basis::PiPulse;
use crate::error::{EngineError, Result};
use crate::initcond::{InitialConditionSpec, InitialConditionType};
use crate::linsolve::{LinearSolverConfig, LinearSolverType};
use crate::mastereq::LindbladType;
use crate::target::{EnergyVariant, GateKind, GateMetric};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    Simulation,
    Gradient,
    Optimization,
    Nothing,
}

impl FromStr for RunType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simulation" => Ok(RunType::Simulation),
            "gradient" => Ok(RunType::Gradient),
            "optimization" => Ok(RunType::Optimization),
            "nothing" => Ok(RunType::Nothing),
            other => Err(EngineError::config_value(
                "runtype",
                format!("unknown value '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartingPointKind {
    Zero,
    Constant,
    Random { seed: u64 },
    FromFile(PathBuf),
}

/// Parsed `optim_objective`.
#[derive(Debug, Clone)]
pub enum ObjectiveSpec {
    Gate { kind: GateKind, metric: GateMetric },
    PureM { level: usize, osc_ids: Vec<usize> },
    GroundState { osc_ids: Vec<usize> },
    ExpectedEnergy { variant: EnergyVariant, osc_ids: Vec<usize> },
    ZeroToOne { osc_ids: Vec<usize> },
}

#[derive(Debug, Clone)]
pub struct OscillatorSettings {
    pub nlevels: usize,
    pub ground_freq: f64,
    pub rotation_freq: f64,
    pub selfkerr: f64,
    pub carrier_freqs: Vec<f64>,
    pub decay_rate: f64,
    pub dephase_rate: f64,
    pub bound: f64,
    pub init_const: f64,
    pub pipulses: Vec<PiPulse>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ntime: usize,
    pub total_time: f64,
    pub nspline: usize,
    pub oscillators: Vec<OscillatorSettings>,
    pub crosskerr: Vec<f64>,
    pub lindblad: LindbladType,
    pub initcond: InitialConditionSpec,
    pub objective: ObjectiveSpec,
    pub regul: f64,
    pub optim_init: StartingPointKind,
    pub optim_maxiter: usize,
    pub optim_tol: f64,
    pub linsolve: LinearSolverConfig,
    pub runtype: RunType,
    pub np_init: usize,
    pub np_braid: usize,
    pub datadir: PathBuf,
    pub output_frequency: usize,
    pub optim_monitor_freq: usize,
    pub optim_printlevel: usize,
    pub writefullstate: bool,
}

/// Raw key = value map
pub struct Config {
    map: HashMap<String, String>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut map = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
                continue;
            }
            let (key, value) = trimmed.split_once('=').ok_or_else(|| {
                EngineError::config(format!("line {}: expected 'key = value'", lineno + 1))
            })?;
            map.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
        Ok(Config { map })
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.raw(key)
            .ok_or_else(|| EngineError::config(format!("missing required key '{}'", key)))
    }

    pub fn get_usize(&self, key: &str) -> Result<usize> {
        self.require(key)?
            .parse()
            .map_err(|_| EngineError::config_value(key, "expected a non-negative integer"))
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| EngineError::config_value(key, "expected a non-negative integer")),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.require(key)?
            .parse()
            .map_err(|_| EngineError::config_value(key, "expected a number"))
    }

    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| EngineError::config_value(key, "expected a number")),
        }
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => match v.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(EngineError::config_value(key, "expected a boolean")),
            },
        }
    }

    pub fn get_f64_list(&self, key: &str) -> Result<Vec<f64>> {
        parse_f64_list(key, self.require(key)?)
    }

    pub fn get_f64_list_or(&self, key: &str, default: Vec<f64>) -> Result<Vec<f64>> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => parse_f64_list(key, v),
        }
    }

    pub fn get_tokens(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .require(key)?
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }
}

fn parse_f64_list(key: &str, value: &str) -> Result<Vec<f64>> {
    value
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse()
                .map_err(|_| EngineError::config_value(key, format!("invalid number '{}'", t)))
        })
        .collect()
}

fn parse_usize_list(key: &str, tokens: &[String]) -> Result<Vec<usize>> {
    tokens
        .iter()
        .map(|t| {
            t.parse()
                .map_err(|_| EngineError::config_value(key, format!("invalid index '{}'", t)))
        })
        .collect()
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_config(&Config::from_file(path)?)
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let ntime = cfg.get_usize("ntime")?;
        let total_time = cfg.get_f64("total_time")?;
        let noscillators = cfg.get_usize("noscillators")?;
        if noscillators == 0 {
            return Err(EngineError::config_value("noscillators", "must be positive"));
        }
        let nspline = cfg.get_usize("nspline")?;

        let bounds = cfg.get_f64_list_or("optim_bounds", vec![1e20; noscillators])?;
        if bounds.len() != noscillators {
            return Err(EngineError::config_value(
                "optim_bounds",
                format!("expected {} entries, got {}", noscillators, bounds.len()),
            ));
        }
        let init_consts = cfg.get_f64_list_or("optim_init_const", vec![0.0; noscillators])?;
        if init_consts.len() != noscillators {
            return Err(EngineError::config_value(
                "optim_init_const",
                format!("expected {} entries, got {}", noscillators, init_consts.len()),
            ));
        }

        let mut oscillators = Vec::with_capacity(noscillators);
        for k in 0..noscillators {
            let ground_freq = cfg.get_f64(&format!("ground_freq_{}", k))?;
            oscillators.push(OscillatorSettings {
                nlevels: cfg.get_usize(&format!("nlevels_{}", k))?,
                ground_freq,
                rotation_freq: cfg.get_f64_or(&format!("rotation_freq_{}", k), ground_freq)?,
                selfkerr: cfg.get_f64_or(&format!("selfkerr_{}", k), 0.0)?,
                carrier_freqs: cfg.get_f64_list(&format!("carrier_frequencies_{}", k))?,
                decay_rate: cfg.get_f64_or(&format!("decay_rate_{}", k), 0.0)?,
                dephase_rate: cfg.get_f64_or(&format!("dephase_rate_{}", k), 0.0)?,
                bound: bounds[k],
                init_const: init_consts[k],
                pipulses: Vec::new(),
            });
        }

        // apply_pipulse = <osc>, <tstart>, <tstop>, <amp>
        if let Some(raw) = cfg.raw("apply_pipulse") {
            let vals = parse_f64_list("apply_pipulse", raw)?;
            if vals.len() != 4 {
                return Err(EngineError::config_value(
                    "apply_pipulse",
                    "expected <oscillator>, <tstart>, <tstop>, <amp>",
                ));
            }
            let osc = vals[0] as usize;
            if osc >= noscillators {
                return Err(EngineError::config_value(
                    "apply_pipulse",
                    format!("oscillator id {} out of range", osc),
                ));
            }
            oscillators[osc].pipulses.push(PiPulse {
                tstart: vals[1],
                tstop: vals[2],
                amp: vals[3],
            });
        }

        let npairs = noscillators * (noscillators - 1) / 2;
        let crosskerr = cfg.get_f64_list_or("crosskerr", vec![0.0; npairs])?;

        let lindblad: LindbladType = cfg.raw("lindblad_type").unwrap_or("none").parse()?;

        let initcond = Self::parse_initcond(cfg)?;
        let objective = Self::parse_objective(cfg)?;

        let optim_init = Self::parse_optim_init(cfg)?;

        let linsolve = LinearSolverConfig {
            solver: cfg.raw("linearsolver_type").unwrap_or("gmres").parse()?,
            maxiter: cfg.get_usize_or("linearsolver_maxiter", 500)?,
            tol: cfg.get_f64_or("linearsolver_tol", 1e-12)?,
            restart: cfg.get_usize_or("gmres_restart", 30)?,
        };

        let runtype: RunType = cfg.raw("runtype").unwrap_or("simulation").parse()?;

        Ok(Settings {
            ntime,
            total_time,
            nspline,
            oscillators,
            crosskerr,
            lindblad,
            initcond,
            objective,
            regul: cfg.get_f64_or("optim_regul", 0.0)?,
            optim_init,
            optim_maxiter: cfg.get_usize_or("optim_maxiter", 500)?,
            optim_tol: cfg.get_f64_or("optim_tol", 1e-8)?,
            linsolve,
            runtype,
            np_init: cfg.get_usize_or("np_init", 1)?,
            np_braid: cfg.get_usize_or("np_braid", 1)?,
            datadir: PathBuf::from(cfg.raw("datadir").unwrap_or("./data_out")),
            output_frequency: cfg.get_usize_or("output_frequency", 1)?,
            optim_monitor_freq: cfg.get_usize_or("optim_monitor_freq", 10)?,
            optim_printlevel: cfg.get_usize_or("optim_printlevel", 1)?,
            writefullstate: cfg.get_bool_or("writefullstate", false)?,
        })
    }

    fn parse_initcond(cfg: &Config) -> Result<InitialConditionSpec> {
        let kind: InitialConditionType = cfg
            .raw("initialcondition_type")
            .unwrap_or("basis")
            .parse()?;
        let tokens = match cfg.raw("optim_initialcondition") {
            None => Vec::new(),
            Some(_) => cfg.get_tokens("optim_initialcondition")?,
        };
        let mut spec = InitialConditionSpec {
            kind,
            levels: Vec::new(),
            osc_ids: Vec::new(),
            file: None,
        };
        match kind {
            InitialConditionType::Pure => {
                spec.levels = parse_usize_list("optim_initialcondition", &tokens)?;
            }
            InitialConditionType::FromFile => {
                let path = tokens.first().ok_or_else(|| {
                    EngineError::config_value("optim_initialcondition", "missing input file path")
                })?;
                spec.file = Some(PathBuf::from(path));
            }
            _ => {
                spec.osc_ids = parse_usize_list("optim_initialcondition", &tokens)?;
            }
        }
        Ok(spec)
    }

    fn parse_objective(cfg: &Config) -> Result<ObjectiveSpec> {
        let tokens = cfg.get_tokens("optim_objective")?;
        let head = tokens
            .first()
            .ok_or_else(|| EngineError::config_value("optim_objective", "empty value"))?
            .to_lowercase();
        let rest = &tokens[1..];
        match head.as_str() {
            "gate" => {
                let kind: GateKind = rest
                    .first()
                    .ok_or_else(|| {
                        EngineError::config_value("optim_objective", "missing gate name")
                    })?
                    .parse()?;
                let metric = match rest.get(1).map(|s| s.to_lowercase()) {
                    None => GateMetric::Frobenius,
                    Some(m) if m == "frobenius" => GateMetric::Frobenius,
                    Some(m) if m == "trace" => GateMetric::Trace,
                    Some(m) => {
                        return Err(EngineError::config_value(
                            "optim_objective",
                            format!("unknown gate metric '{}'", m),
                        ))
                    }
                };
                Ok(ObjectiveSpec::Gate { kind, metric })
            }
            "purem" => {
                let level = rest
                    .first()
                    .ok_or_else(|| {
                        EngineError::config_value("optim_objective", "missing target level")
                    })?
                    .parse()
                    .map_err(|_| EngineError::config_value("optim_objective", "invalid level"))?;
                Ok(ObjectiveSpec::PureM {
                    level,
                    osc_ids: parse_usize_list("optim_objective", &rest[1..].to_vec())?,
                })
            }
            "groundstate" => Ok(ObjectiveSpec::GroundState {
                osc_ids: parse_usize_list("optim_objective", &rest.to_vec())?,
            }),
            "expectedenergy" | "expectedenergyc" => Ok(ObjectiveSpec::ExpectedEnergy {
                variant: EnergyVariant::Average,
                osc_ids: parse_usize_list("optim_objective", &rest.to_vec())?,
            }),
            "expectedenergya" => Ok(ObjectiveSpec::ExpectedEnergy {
                variant: EnergyVariant::SquareOfAverage,
                osc_ids: parse_usize_list("optim_objective", &rest.to_vec())?,
            }),
            "expectedenergyb" => Ok(ObjectiveSpec::ExpectedEnergy {
                variant: EnergyVariant::AverageOfSquare,
                osc_ids: parse_usize_list("optim_objective", &rest.to_vec())?,
            }),
            "zerotoone" => Ok(ObjectiveSpec::ZeroToOne {
                osc_ids: parse_usize_list("optim_objective", &rest.to_vec())?,
            }),
            other => Err(EngineError::config_value(
                "optim_objective",
                format!("unknown objective kind '{}'", other),
            )),
        }
    }

    fn parse_optim_init(cfg: &Config) -> Result<StartingPointKind> {
        let value = cfg.raw("optim_init").unwrap_or("zero");
        match value.to_lowercase().as_str() {
            "zero" => Ok(StartingPointKind::Zero),
            "constant" => Ok(StartingPointKind::Constant),
            "random" | "random_seed" => Ok(StartingPointKind::Random {
                seed: cfg.get_usize_or("optim_init_seed", 1)? as u64,
            }),
            _ => Ok(StartingPointKind::FromFile(PathBuf::from(value))),
        }
    }
}
