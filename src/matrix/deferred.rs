//! Deferred (lazily evaluated) count matrices.
//!
//! A [`DeferredMatrix`] pairs a [`RowSource`], which can hand out blocks of rows on
//! demand, with a list of pending elementwise operations. Nothing is computed until
//! the matrix is forced, either completely ([`DeferredMatrix::realize`]), for a single
//! row range ([`DeferredMatrix::realize_rows`]) or chunk by chunk
//! ([`DeferredMatrix::row_chunks`]). This keeps memory bounded for matrices that are
//! too large to hold twice.

use std::ops::Range;
use std::sync::Arc;

use anyhow::anyhow;
use nalgebra_sparse::CsrMatrix;
use ndarray::{Array2, ArrayView2, Axis, s};
use rayon::prelude::*;
use single_utilities::traits::{FloatOps, FloatOpsTS};

/// Backing store that can read contiguous row blocks of a features × samples matrix.
///
/// Implementations may read from memory, disk or anything else; each call must
/// return a dense block of shape `(rows.len(), ncols())`.
pub trait RowSource<T>: Send + Sync {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    fn read_rows(&self, rows: Range<usize>) -> anyhow::Result<Array2<T>>;
}

fn check_row_range(rows: &Range<usize>, nrows: usize) -> anyhow::Result<()> {
    if rows.start > rows.end || rows.end > nrows {
        return Err(anyhow!(
            "Row range {}..{} is out of bounds for a matrix with {} rows",
            rows.start,
            rows.end,
            nrows
        ));
    }
    Ok(())
}

impl<T> RowSource<T> for Array2<T>
where
    T: FloatOpsTS,
{
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn read_rows(&self, rows: Range<usize>) -> anyhow::Result<Array2<T>> {
        check_row_range(&rows, self.nrows())?;
        Ok(self.slice(s![rows.start..rows.end, ..]).to_owned())
    }
}

impl<T> RowSource<T> for CsrMatrix<T>
where
    T: FloatOpsTS,
{
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn read_rows(&self, rows: Range<usize>) -> anyhow::Result<Array2<T>> {
        check_row_range(&rows, self.nrows())?;
        let mut block = Array2::zeros((rows.len(), self.ncols()));
        for (local, row_idx) in rows.enumerate() {
            let row = self.row(row_idx);
            for (&col, &value) in row.col_indices().iter().zip(row.values()) {
                block[[local, col]] = value;
            }
        }
        Ok(block)
    }
}

/// A pending elementwise operation on a deferred matrix.
#[derive(Debug, Clone)]
pub enum DeferredOp<T> {
    /// Divide every entry of column `j` by `factors[j]`.
    DivideColumns(Arc<[T]>),
    /// Add a constant to every entry.
    AddScalar(T),
    /// Take the base-2 logarithm of every entry.
    Log2,
}

impl<T> DeferredOp<T>
where
    T: FloatOps,
{
    fn apply(&self, block: &mut Array2<T>) {
        match self {
            DeferredOp::DivideColumns(factors) => {
                for mut row in block.rows_mut() {
                    for (value, &factor) in row.iter_mut().zip(factors.iter()) {
                        *value = *value / factor;
                    }
                }
            }
            DeferredOp::AddScalar(offset) => {
                let offset = *offset;
                block.mapv_inplace(|v| v + offset);
            }
            DeferredOp::Log2 => block.mapv_inplace(|v| num_traits::Float::log2(v)),
        }
    }
}

/// Row-chunk size used when none is configured, scaled to the rayon pool.
fn default_chunk_size(nrows: usize, ncols: usize) -> usize {
    let n_threads = rayon::current_num_threads().max(1);

    let base_chunk_size = if ncols > 20000 {
        200
    } else if ncols > 10000 {
        500
    } else {
        1000
    };

    let max_chunk_size = nrows.div_ceil(n_threads);
    base_chunk_size.min(max_chunk_size).max(1)
}

/// Stack row blocks produced in order back into one matrix.
pub(crate) fn stack_row_blocks<T>(blocks: &[Array2<T>], ncols: usize) -> anyhow::Result<Array2<T>>
where
    T: FloatOps,
{
    if blocks.is_empty() {
        return Ok(Array2::zeros((0, ncols)));
    }
    let views: Vec<ArrayView2<T>> = blocks.iter().map(|b| b.view()).collect();
    Ok(ndarray::concatenate(Axis(0), &views)?)
}

/// An unevaluated elementwise composition over a [`RowSource`].
#[derive(Clone)]
pub struct DeferredMatrix<T> {
    source: Arc<dyn RowSource<T>>,
    ops: Vec<DeferredOp<T>>,
    chunk_size: Option<usize>,
}

impl<T> DeferredMatrix<T>
where
    T: FloatOpsTS,
{
    pub fn new(source: Arc<dyn RowSource<T>>) -> Self {
        DeferredMatrix {
            source,
            ops: Vec::new(),
            chunk_size: None,
        }
    }

    pub fn from_source<S>(source: S) -> Self
    where
        S: RowSource<T> + 'static,
    {
        Self::new(Arc::new(source))
    }

    /// Set the number of rows read per chunk when forcing the matrix.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    pub fn nrows(&self) -> usize {
        self.source.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.source.ncols()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
            .unwrap_or_else(|| default_chunk_size(self.nrows(), self.ncols()))
    }

    /// Operations that will run when the matrix is forced, in order.
    pub fn pending_ops(&self) -> &[DeferredOp<T>] {
        &self.ops
    }

    fn push(&self, op: DeferredOp<T>) -> Self {
        let mut next = self.clone();
        next.ops.push(op);
        next
    }

    /// Defer a division of every column by its per-sample factor.
    pub fn divide_columns(&self, factors: &[T]) -> anyhow::Result<Self> {
        if factors.len() != self.ncols() {
            return Err(anyhow!(
                "Expected {} column factors, got {}",
                self.ncols(),
                factors.len()
            ));
        }
        Ok(self.push(DeferredOp::DivideColumns(Arc::from(factors))))
    }

    pub fn add_scalar(&self, value: T) -> Self {
        self.push(DeferredOp::AddScalar(value))
    }

    pub fn log2(&self) -> Self {
        self.push(DeferredOp::Log2)
    }

    pub(crate) fn chunk_ranges(&self) -> Vec<Range<usize>> {
        let nrows = self.nrows();
        let step = self.chunk_size();
        (0..nrows)
            .step_by(step)
            .map(|start| start..(start + step).min(nrows))
            .collect()
    }

    /// Evaluate a contiguous range of rows.
    pub fn realize_rows(&self, rows: Range<usize>) -> anyhow::Result<Array2<T>> {
        check_row_range(&rows, self.nrows())?;
        let expected = (rows.len(), self.ncols());
        let mut block = self.source.read_rows(rows)?;
        if block.dim() != expected {
            return Err(anyhow!(
                "Row source returned a {}x{} block, expected {}x{}",
                block.nrows(),
                block.ncols(),
                expected.0,
                expected.1
            ));
        }
        for op in &self.ops {
            op.apply(&mut block);
        }
        Ok(block)
    }

    /// Stream the evaluated matrix in row chunks, one chunk in memory at a time.
    pub fn row_chunks(
        &self,
    ) -> impl Iterator<Item = anyhow::Result<(Range<usize>, Array2<T>)>> + '_ {
        self.chunk_ranges()
            .into_iter()
            .map(move |rows| self.realize_rows(rows.clone()).map(|block| (rows, block)))
    }

    /// Evaluate the whole matrix, chunks in parallel.
    pub fn realize(&self) -> anyhow::Result<Array2<T>> {
        let blocks = self
            .chunk_ranges()
            .into_par_iter()
            .map(|rows| self.realize_rows(rows))
            .collect::<anyhow::Result<Vec<_>>>()?;
        stack_row_blocks(&blocks, self.ncols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;
    use ndarray::array;

    #[test]
    fn nothing_runs_until_forced() {
        let deferred = DeferredMatrix::from_source(array![[1.0f64, 2.0], [3.0, 4.0]]);
        let scaled = deferred.divide_columns(&[1.0, 2.0]).unwrap().add_scalar(1.0).log2();

        assert_eq!(scaled.pending_ops().len(), 3);
        assert!(deferred.pending_ops().is_empty());

        let forced = scaled.realize().unwrap();
        assert_abs_diff_eq!(forced[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(forced[[1, 1]], 3.0f64.log2(), epsilon = 1e-12);
    }

    #[test]
    fn chunked_streaming_matches_full_realization() {
        let data = Array2::from_shape_fn((7, 3), |(i, j)| (i * 3 + j) as f64);
        let deferred = DeferredMatrix::from_source(data)
            .with_chunk_size(2)
            .divide_columns(&[1.0, 2.0, 4.0])
            .unwrap();

        let full = deferred.realize().unwrap();
        let mut seen = 0;
        for chunk in deferred.row_chunks() {
            let (rows, block) = chunk.unwrap();
            assert!(block.nrows() <= 2);
            assert_eq!(block, full.slice(s![rows.start..rows.end, ..]).to_owned());
            seen += block.nrows();
        }
        assert_eq!(seen, 7);
    }

    #[test]
    fn sparse_source_reads_dense_blocks() {
        let mut coo = CooMatrix::new(3, 2);
        coo.push(0, 1, 5.0f64);
        coo.push(2, 0, 7.0);
        let csr = CsrMatrix::from(&coo);

        let block = RowSource::read_rows(&csr, 1..3).unwrap();
        assert_eq!(block, array![[0.0, 0.0], [7.0, 0.0]]);
    }

    #[test]
    fn rejects_out_of_bounds_rows() {
        let deferred = DeferredMatrix::from_source(Array2::<f64>::zeros((2, 2)));
        assert!(deferred.realize_rows(1..4).is_err());
    }

    #[test]
    fn rejects_wrong_factor_count() {
        let deferred = DeferredMatrix::from_source(Array2::<f64>::zeros((2, 3)));
        assert!(deferred.divide_columns(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn empty_matrix_realizes_to_empty() {
        let deferred = DeferredMatrix::from_source(Array2::<f64>::zeros((0, 4)));
        let forced = deferred.realize().unwrap();
        assert_eq!(forced.dim(), (0, 4));
    }
}
