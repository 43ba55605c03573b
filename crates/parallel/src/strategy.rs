//! Parallel processing strategies

use rayon::prelude::*;
use tracing::warn;

/// Processing mode for per-row and per-chunk work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Single-threaded processing
    Sequential,
    /// Parallel processing using all available cores
    #[default]
    Parallel,
    /// Parallel with specified number of threads
    ParallelWith(usize),
}

impl ProcessingMode {
    /// Mode for a worker count: 0 means all cores, 1 means sequential
    pub fn from_workers(workers: usize) -> Self {
        match workers {
            0 => ProcessingMode::Parallel,
            1 => ProcessingMode::Sequential,
            n => ProcessingMode::ParallelWith(n),
        }
    }

    /// Threads this mode will use
    pub fn threads(&self) -> usize {
        match self {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Parallel => num_cpus(),
            ProcessingMode::ParallelWith(n) => *n,
        }
    }

    fn pool(threads: usize) -> Option<rayon::ThreadPool> {
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(threads, error = %e, "could not build thread pool, using global pool");
                None
            }
        }
    }
}

/// Strategy for parallel execution
pub trait ParallelStrategy {
    /// Map a function over indices and collect results in index order
    fn par_map<T, F>(&self, range: std::ops::Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;
}

impl ParallelStrategy for ProcessingMode {
    fn par_map<T, F>(&self, range: std::ops::Range<usize>, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            ProcessingMode::Sequential => range.map(f).collect(),
            ProcessingMode::Parallel => range.into_par_iter().map(f).collect(),
            ProcessingMode::ParallelWith(threads) => match Self::pool(*threads) {
                Some(pool) => pool.install(|| range.into_par_iter().map(f).collect()),
                None => range.into_par_iter().map(f).collect(),
            },
        }
    }
}

/// Get the number of available CPU cores
pub fn num_cpus() -> usize {
    rayon::current_num_threads()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_agree() {
        let modes = [
            ProcessingMode::Sequential,
            ProcessingMode::Parallel,
            ProcessingMode::ParallelWith(2),
        ];
        for mode in modes {
            let out = mode.par_map(0..50, |i| i * i);
            assert_eq!(out.len(), 50);
            assert_eq!(out[7], 49);
        }
    }

    #[test]
    fn test_from_workers() {
        assert_eq!(ProcessingMode::from_workers(0), ProcessingMode::Parallel);
        assert_eq!(ProcessingMode::from_workers(1), ProcessingMode::Sequential);
        assert_eq!(ProcessingMode::from_workers(4), ProcessingMode::ParallelWith(4));
        assert_eq!(ProcessingMode::from_workers(4).threads(), 4);
        assert_eq!(ProcessingMode::Sequential.threads(), 1);
    }
}
