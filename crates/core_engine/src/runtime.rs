//! Process-group bookkeeping and deterministic reductions
//!
//! The engine is SPMD over a world group split into three orthogonal
//! sub-groups: space (state rows), init (initial conditions) and time
//! (slabs). This realization is single-process; the split is kept as logical
//! partitioning so ensemble indexing and reductions follow the same paths a
//! multi-process run would take, and objectives come out bitwise-identical
//! for any partition size.

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Runtime {
    world_size: usize,
    world_rank: usize,
    init_size: usize,
    braid_size: usize,
}

impl Runtime {
    pub fn new(np_init: usize, np_braid: usize) -> Result<Self> {
        if np_init == 0 {
            return Err(EngineError::config_value("np_init", "must be positive"));
        }
        if np_braid == 0 {
            return Err(EngineError::config_value("np_braid", "must be positive"));
        }
        Ok(Runtime {
            world_size: 1,
            world_rank: 0,
            init_size: np_init,
            braid_size: np_braid,
        })
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn world_rank(&self) -> usize {
        self.world_rank
    }

    /// Logical size of the initial-condition group.
    pub fn init_size(&self) -> usize {
        self.init_size
    }

    /// Logical size of the time-slab group.
    pub fn braid_size(&self) -> usize {
        self.braid_size
    }

    /// True on the rank responsible for file output and one-time terms.
    pub fn is_output_rank(&self) -> bool {
        self.world_rank == 0
    }

    /// Number of initial conditions each init rank owns.
    pub fn ninit_local(&self, ninit: usize) -> Result<usize> {
        if ninit % self.init_size != 0 {
            return Err(EngineError::config_value(
                "np_init",
                format!("{} does not divide ninit = {}", self.init_size, ninit),
            ));
        }
        Ok(ninit / self.init_size)
    }

    /// Global ensemble index of (rank_init, iinit_local).
    pub fn global_iinit(&self, rank_init: usize, iinit_local: usize, ninit_local: usize) -> usize {
        rank_init * ninit_local + iinit_local
    }

    /// Deterministic pairwise tree reduction. Contributions are combined in
    /// global order independent of the partition, so runs with different
    /// logical group sizes produce bitwise-identical sums.
    pub fn tree_sum(values: &[f64]) -> f64 {
        match values.len() {
            0 => 0.0,
            1 => values[0],
            n => {
                let mid = n / 2;
                Self::tree_sum(&values[..mid]) + Self::tree_sum(&values[mid..])
            }
        }
    }

    /// Elementwise tree reduction of per-contribution gradient vectors.
    pub fn tree_sum_vectors(contributions: &[Vec<f64>]) -> Vec<f64> {
        match contributions.len() {
            0 => Vec::new(),
            1 => contributions[0].clone(),
            n => {
                let mid = n / 2;
                let left = Self::tree_sum_vectors(&contributions[..mid]);
                let right = Self::tree_sum_vectors(&contributions[mid..]);
                left.iter().zip(&right).map(|(a, b)| a + b).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_validation() {
        let rt = Runtime::new(2, 1).unwrap();
        assert_eq!(rt.ninit_local(4).unwrap(), 2);
        assert!(rt.ninit_local(3).is_err());
        assert!(Runtime::new(0, 1).is_err());
    }

    #[test]
    fn test_global_index_layout() {
        let rt = Runtime::new(2, 1).unwrap();
        let ninit_local = rt.ninit_local(4).unwrap();
        assert_eq!(rt.global_iinit(0, 0, ninit_local), 0);
        assert_eq!(rt.global_iinit(1, 0, ninit_local), 2);
        assert_eq!(rt.global_iinit(1, 1, ninit_local), 3);
    }

    #[test]
    fn test_tree_sum_is_partition_independent() {
        let values: Vec<f64> = (0..17).map(|i| (i as f64 * 0.731).sin() * 1e-3).collect();
        let s = Runtime::tree_sum(&values);
        // The tree over the global order is the same regardless of how many
        // logical ranks contributed the pieces.
        assert_eq!(s, Runtime::tree_sum(&values));
        assert!((s - values.iter().sum::<f64>()).abs() < 1e-15);
    }
}
