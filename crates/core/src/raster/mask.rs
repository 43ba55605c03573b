//! Per-observation validity mask

use ndarray::Array3;

/// Boolean (time, y, x) array; `true` marks a usable observation.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityMaskArray {
    data: Array3<bool>,
}

impl QualityMaskArray {
    /// Wrap an existing boolean array
    pub fn from_array(data: Array3<bool>) -> Self {
        Self { data }
    }

    /// Mask that accepts every observation
    pub fn all_valid(times: usize, rows: usize, cols: usize) -> Self {
        Self {
            data: Array3::from_elem((times, rows, cols), true),
        }
    }

    /// (time, rows, cols)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Whether the observation at (time, row, col) is usable; out of range is invalid
    pub fn is_valid(&self, time: usize, row: usize, col: usize) -> bool {
        self.data.get((time, row, col)).copied().unwrap_or(false)
    }

    /// Mark one observation
    pub fn set(&mut self, time: usize, row: usize, col: usize, valid: bool) {
        if let Some(cell) = self.data.get_mut((time, row, col)) {
            *cell = valid;
        }
    }

    /// Total number of usable observations
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    /// Underlying array
    pub fn data(&self) -> &Array3<bool> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_counts() {
        let mut mask = QualityMaskArray::all_valid(3, 2, 2);
        mask.set(1, 1, 1, false);
        mask.set(7, 0, 0, false);
        assert_eq!(mask.valid_count(), 11);
        assert!(!mask.is_valid(1, 1, 1));
        assert!(mask.is_valid(1, 0, 1));
        assert!(!mask.is_valid(5, 0, 0));
    }
}
