//! Initial-condition ensembles
//!
//! Supplies the ninit deterministic initial density matrices that are
//! averaged into one objective, and a canonical integer id per element used
//! for file naming.

use crate::error::{EngineError, Result};
use crate::mastereq::MasterEq;
use ndarray::Array1;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialConditionType {
    FromFile,
    Pure,
    Ensemble,
    Diagonal,
    Basis,
    ThreeStates,
    NPlusOne,
}

impl FromStr for InitialConditionType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fromfile" => Ok(InitialConditionType::FromFile),
            "pure" => Ok(InitialConditionType::Pure),
            "ensemble" => Ok(InitialConditionType::Ensemble),
            "diagonal" => Ok(InitialConditionType::Diagonal),
            "basis" => Ok(InitialConditionType::Basis),
            "threestates" => Ok(InitialConditionType::ThreeStates),
            "nplusone" => Ok(InitialConditionType::NPlusOne),
            other => Err(EngineError::config_value(
                "initialcondition_type",
                format!("unknown value '{}'", other),
            )),
        }
    }
}

/// Parsed `initialcondition_type` + `optim_initialcondition` pair.
#[derive(Debug, Clone)]
pub struct InitialConditionSpec {
    pub kind: InitialConditionType,
    /// For PURE: the level of each oscillator
    pub levels: Vec<usize>,
    /// For the ensemble kinds: targeted oscillator ids (empty = all)
    pub osc_ids: Vec<usize>,
    /// For FROMFILE: path to the state vector
    pub file: Option<PathBuf>,
}

pub struct InitialConditions {
    kind: InitialConditionType,
    ninit: usize,
    dim: usize,
    /// Subsystem spanned by the targeted oscillators
    sub_dim: usize,
    /// Map from a subsystem row index to the full-system row index with all
    /// untargeted oscillators in their ground state.
    sub_to_full: Vec<usize>,
    pure_index: usize,
    file_state: Option<Array1<f64>>,
}

impl InitialConditions {
    pub fn new(spec: &InitialConditionSpec, meq: &MasterEq) -> Result<Self> {
        let dim = meq.dim();
        let nosc = meq.noscillators();

        let osc_ids: Vec<usize> = if spec.osc_ids.is_empty() {
            (0..nosc).collect()
        } else {
            spec.osc_ids.clone()
        };
        for &k in &osc_ids {
            if k >= nosc {
                return Err(EngineError::config_value(
                    "optim_initialcondition",
                    format!("oscillator id {} out of range", k),
                ));
            }
        }

        // Enumerate the subsystem and its embedding into the full index space
        let sub_dim = meq.reduced_dim(&osc_ids);
        let mut sub_to_full = vec![0usize; sub_dim];
        for i in 0..dim {
            let mut sub_index = 0;
            let mut embedded = true;
            for (k, osc) in meq.oscillators().iter().enumerate() {
                let d = osc.level_of(i);
                if osc_ids.contains(&k) {
                    sub_index = sub_index * osc.nlevels() + d;
                } else if d != 0 {
                    embedded = false;
                    break;
                }
            }
            if embedded {
                sub_to_full[sub_index] = i;
            }
        }

        let mut pure_index = 0;
        if spec.kind == InitialConditionType::Pure {
            if spec.levels.len() != nosc {
                return Err(EngineError::config_value(
                    "optim_initialcondition",
                    format!("expected {} levels, got {}", nosc, spec.levels.len()),
                ));
            }
            for (k, (&lvl, osc)) in spec.levels.iter().zip(meq.oscillators()).enumerate() {
                if lvl >= osc.nlevels() {
                    return Err(EngineError::config_value(
                        "optim_initialcondition",
                        format!("level {} exceeds oscillator {} with {} levels", lvl, k, osc.nlevels()),
                    ));
                }
                pure_index = pure_index * osc.nlevels() + lvl;
            }
        }

        let file_state = if spec.kind == InitialConditionType::FromFile {
            let path = spec.file.as_ref().ok_or_else(|| {
                EngineError::config_value("optim_initialcondition", "missing input file path")
            })?;
            Some(read_state_file(path, dim)?)
        } else {
            None
        };

        let ninit = match spec.kind {
            InitialConditionType::Pure
            | InitialConditionType::FromFile
            | InitialConditionType::Ensemble => 1,
            InitialConditionType::Diagonal => sub_dim,
            InitialConditionType::Basis => sub_dim * sub_dim,
            InitialConditionType::ThreeStates => 3,
            InitialConditionType::NPlusOne => sub_dim + 1,
        };

        Ok(InitialConditions {
            kind: spec.kind,
            ninit,
            dim,
            sub_dim,
            sub_to_full,
            pure_index,
            file_state,
        })
    }

    pub fn ninit(&self) -> usize {
        self.ninit
    }

    pub fn kind(&self) -> InitialConditionType {
        self.kind
    }

    /// Canonical id for file naming.
    pub fn init_id(&self, iinit: usize) -> usize {
        match self.kind {
            InitialConditionType::Pure => self.pure_index,
            _ => iinit,
        }
    }

    /// Assemble the iinit-th initial density matrix into `state`.
    pub fn assemble(&self, iinit: usize, state: &mut Array1<f64>) -> Result<()> {
        if iinit >= self.ninit {
            return Err(EngineError::Internal(format!(
                "initial condition index {} out of {}",
                iinit, self.ninit
            )));
        }
        debug_assert_eq!(state.len(), 2 * self.dim * self.dim);
        state.fill(0.0);
        let n = self.dim;

        match self.kind {
            InitialConditionType::Pure => {
                let s = self.pure_index;
                state[2 * (s * n + s)] = 1.0;
            }
            InitialConditionType::FromFile => match &self.file_state {
                Some(file_state) => state.assign(file_state),
                None => {
                    return Err(EngineError::Internal(
                        "fromfile initial condition without a loaded state".into(),
                    ))
                }
            },
            InitialConditionType::Diagonal => {
                let s = self.sub_to_full[iinit];
                state[2 * (s * n + s)] = 1.0;
            }
            InitialConditionType::Basis => {
                // iinit = k + j * sub_dim picks the Hermitian basis element (k, j)
                let k = iinit % self.sub_dim;
                let j = iinit / self.sub_dim;
                let fk = self.sub_to_full[k];
                let fj = self.sub_to_full[j];
                match k.cmp(&j) {
                    std::cmp::Ordering::Equal => {
                        state[2 * (fk * n + fk)] = 1.0;
                    }
                    std::cmp::Ordering::Less => {
                        // (E_kj + E_jk) / 2
                        state[2 * (fk * n + fj)] = 0.5;
                        state[2 * (fj * n + fk)] = 0.5;
                    }
                    std::cmp::Ordering::Greater => {
                        // i (E_jk - E_kj) / 2
                        state[2 * (fj * n + fk) + 1] = 0.5;
                        state[2 * (fk * n + fj) + 1] = -0.5;
                    }
                }
            }
            InitialConditionType::Ensemble => {
                // Uniform superposition projector over the subsystem
                let w = 1.0 / self.sub_dim as f64;
                for &fi in &self.sub_to_full {
                    for &fj in &self.sub_to_full {
                        state[2 * (fi * n + fj)] = w;
                    }
                }
            }
            InitialConditionType::ThreeStates => match iinit {
                0 => state[0] = 1.0,
                1 => {
                    let s = self.sub_to_full[self.sub_dim - 1];
                    state[2 * (s * n + s)] = 1.0;
                }
                _ => {
                    let w = 1.0 / self.sub_dim as f64;
                    for &fi in &self.sub_to_full {
                        state[2 * (fi * n + fi)] = w;
                    }
                }
            },
            InitialConditionType::NPlusOne => {
                if iinit < self.sub_dim {
                    let s = self.sub_to_full[iinit];
                    state[2 * (s * n + s)] = 1.0;
                } else {
                    let w = 1.0 / self.sub_dim as f64;
                    for &fi in &self.sub_to_full {
                        for &fj in &self.sub_to_full {
                            state[2 * (fi * n + fj)] = w;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Read a full state vector (2 N^2 reals, one per line) from a text file.
fn read_state_file(path: &PathBuf, dim: usize) -> Result<Array1<f64>> {
    let content = std::fs::read_to_string(path)?;
    let mut values = Vec::with_capacity(2 * dim * dim);
    for (lineno, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        for tok in trimmed.split_whitespace() {
            let v: f64 = tok.parse().map_err(|_| {
                EngineError::config_value(
                    "optim_initialcondition",
                    format!("invalid number '{}' on line {}", tok, lineno + 1),
                )
            })?;
            values.push(v);
        }
    }
    if values.len() != 2 * dim * dim {
        return Err(EngineError::dimension_mismatch(
            format!("{} state entries", 2 * dim * dim),
            format!("{}", values.len()),
        ));
    }
    Ok(Array1::from_vec(values))
}
