//! Count matrix representations consumed and produced by the normalization engine.
//!
//! Matrices are features (rows) × samples (columns). The backing can be dense, sparse
//! (CSR) or deferred; only the deferred backing supports lazy evaluation.

use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use single_utilities::traits::FloatOpsTS;

pub mod deferred;

pub use deferred::{DeferredMatrix, DeferredOp, RowSource};

#[derive(Clone)]
pub enum MatrixData<T> {
    Dense(Array2<T>),
    Sparse(CsrMatrix<T>),
    Deferred(DeferredMatrix<T>),
}

/// A matrix together with optional feature (row) and sample (column) labels.
#[derive(Clone)]
pub struct ExpressionMatrix<T> {
    data: MatrixData<T>,
    row_names: Option<Vec<String>>,
    col_names: Option<Vec<String>>,
}

impl<T> ExpressionMatrix<T>
where
    T: FloatOpsTS,
{
    pub fn new(data: MatrixData<T>) -> Self {
        ExpressionMatrix {
            data,
            row_names: None,
            col_names: None,
        }
    }

    pub fn dense(data: Array2<T>) -> Self {
        Self::new(MatrixData::Dense(data))
    }

    pub fn sparse(data: CsrMatrix<T>) -> Self {
        Self::new(MatrixData::Sparse(data))
    }

    pub fn deferred(data: DeferredMatrix<T>) -> Self {
        Self::new(MatrixData::Deferred(data))
    }

    pub fn with_row_names(mut self, names: Vec<String>) -> anyhow::Result<Self> {
        if names.len() != self.nrows() {
            return Err(anyhow!(
                "Got {} row names for a matrix with {} rows",
                names.len(),
                self.nrows()
            ));
        }
        self.row_names = Some(names);
        Ok(self)
    }

    pub fn with_col_names(mut self, names: Vec<String>) -> anyhow::Result<Self> {
        if names.len() != self.ncols() {
            return Err(anyhow!(
                "Got {} column names for a matrix with {} columns",
                names.len(),
                self.ncols()
            ));
        }
        self.col_names = Some(names);
        Ok(self)
    }

    pub fn data(&self) -> &MatrixData<T> {
        &self.data
    }

    pub fn row_names(&self) -> Option<&[String]> {
        self.row_names.as_deref()
    }

    pub fn col_names(&self) -> Option<&[String]> {
        self.col_names.as_deref()
    }

    pub fn nrows(&self) -> usize {
        match &self.data {
            MatrixData::Dense(m) => m.nrows(),
            MatrixData::Sparse(m) => m.nrows(),
            MatrixData::Deferred(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match &self.data {
            MatrixData::Dense(m) => m.ncols(),
            MatrixData::Sparse(m) => m.ncols(),
            MatrixData::Deferred(m) => m.ncols(),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    /// Whether elementwise arithmetic on this matrix can be deferred instead of
    /// materialized.
    pub fn is_lazy_capable(&self) -> bool {
        matches!(self.data, MatrixData::Deferred(_))
    }

    /// New matrix with the given data and this matrix's labels.
    pub(crate) fn relabel(&self, data: MatrixData<T>) -> Self {
        ExpressionMatrix {
            data,
            row_names: self.row_names.clone(),
            col_names: self.col_names.clone(),
        }
    }

    /// Materialize as a dense array. Forces deferred matrices.
    pub fn to_dense(&self) -> anyhow::Result<Array2<T>> {
        match &self.data {
            MatrixData::Dense(m) => Ok(m.clone()),
            MatrixData::Sparse(m) => {
                let mut dense = Array2::zeros((m.nrows(), m.ncols()));
                for (row, col, &value) in m.triplet_iter() {
                    dense[[row, col]] = value;
                }
                Ok(dense)
            }
            MatrixData::Deferred(m) => m.realize(),
        }
    }

    /// Per-sample totals (library sizes). Deferred matrices are streamed in row chunks.
    pub fn col_sums(&self) -> anyhow::Result<Vec<T>> {
        let mut sums = vec![T::zero(); self.ncols()];
        match &self.data {
            MatrixData::Dense(m) => {
                for row in m.rows() {
                    for (total, &value) in sums.iter_mut().zip(row.iter()) {
                        *total += value;
                    }
                }
            }
            MatrixData::Sparse(m) => {
                for (_, col, &value) in m.triplet_iter() {
                    sums[col] += value;
                }
            }
            MatrixData::Deferred(m) => {
                for chunk in m.row_chunks() {
                    let (_, block) = chunk?;
                    for row in block.rows() {
                        for (total, &value) in sums.iter_mut().zip(row.iter()) {
                            *total += value;
                        }
                    }
                }
            }
        }
        Ok(sums)
    }
}
