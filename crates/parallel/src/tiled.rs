//! Spatial chunking of a raster grid

use chronocube_core::{Error, Result};

/// A rectangular block of the spatial grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in iteration order
    pub index: usize,
    /// Row offset in the full grid
    pub row_offset: usize,
    /// Column offset in the full grid
    pub col_offset: usize,
    /// Number of rows in this chunk
    pub rows: usize,
    /// Number of columns in this chunk
    pub cols: usize,
}

impl Chunk {
    /// Number of cells in the chunk
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterator over non-overlapping chunks covering a grid, row-major.
/// Edge chunks are clipped to the grid.
#[derive(Debug, Clone)]
pub struct ChunkIterator {
    total_rows: usize,
    total_cols: usize,
    chunk_rows: usize,
    chunk_cols: usize,
    current_row: usize,
    current_col: usize,
    index: usize,
}

impl ChunkIterator {
    /// Create a new chunk iterator; chunk sizes must be positive
    pub fn new(
        total_rows: usize,
        total_cols: usize,
        chunk_rows: usize,
        chunk_cols: usize,
    ) -> Result<Self> {
        if chunk_rows == 0 || chunk_cols == 0 {
            return Err(Error::InvalidParameter {
                name: "chunks",
                value: format!("{}x{}", chunk_rows, chunk_cols),
                reason: "chunk sizes must be positive".into(),
            });
        }
        Ok(Self {
            total_rows,
            total_cols,
            chunk_rows,
            chunk_cols,
            current_row: 0,
            current_col: 0,
            index: 0,
        })
    }
}

impl Iterator for ChunkIterator {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.total_rows || self.total_cols == 0 {
            return None;
        }

        let rows = self.chunk_rows.min(self.total_rows - self.current_row);
        let cols = self.chunk_cols.min(self.total_cols - self.current_col);
        let chunk = Chunk {
            index: self.index,
            row_offset: self.current_row,
            col_offset: self.current_col,
            rows,
            cols,
        };

        self.index += 1;
        self.current_col += self.chunk_cols;
        if self.current_col >= self.total_cols {
            self.current_col = 0;
            self.current_row += self.chunk_rows;
        }

        Some(chunk)
    }
}
