//! Global tensor backends.
//!
//! Assemblers only talk to global tensors through [`GlobalTensor`]. Local values are passed
//! as dense row-major buffers whose extents are the lengths of the per-argument dof lists.
//!
//! The backends in this module store the full global index space on every process. Each
//! process accumulates the contributions of its own cells; combining them across processes
//! is left to the caller.
use crate::error::{form_mismatch, AssemblyError};
use crate::Real;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use std::ops::Range;

/// How values added since the last finalization are combined with existing ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ApplyMode {
    #[default]
    Add,
    Insert,
}

/// Global size, ownership and nonzero structure of a tensor to be allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorLayout {
    pub global_dimensions: Vec<usize>,
    pub local_ranges: Vec<Range<usize>>,
    /// Nonzero structure over the full global index space (rank 2 only).
    pub sparsity: Option<SparsityPattern>,
}

impl TensorLayout {
    pub fn rank(&self) -> usize {
        self.global_dimensions.len()
    }
}

pub trait GlobalTensor<T> {
    fn rank(&self) -> usize;

    /// Whether the tensor has been allocated with [`init`](Self::init).
    fn is_initialized(&self) -> bool;

    /// The global size along dimension `dim`.
    fn size(&self, dim: usize) -> usize;

    /// The range of indices along dimension `dim` owned by this process.
    fn local_range(&self, dim: usize) -> Range<usize>;

    /// Whether [`init`](Self::init) needs a sparsity pattern in the layout.
    fn requires_sparsity_pattern(&self) -> bool {
        false
    }

    /// Allocates storage for the given layout. All entries are zero afterwards.
    fn init(&mut self, layout: &TensorLayout) -> Result<(), AssemblyError>;

    /// Adds the dense local tensor `values` at the outer product of `dofs`.
    fn add(&mut self, values: &[T], dofs: &[&[usize]]) -> Result<(), AssemblyError>;

    /// Sets all entries to zero, keeping the allocated structure.
    fn zero(&mut self);

    /// Finalizes the tensor after a sequence of additions.
    fn apply(&mut self, mode: ApplyMode);

    /// Whether no values were added since the last call to [`apply`](Self::apply).
    fn is_finalized(&self) -> bool;
}

pub trait GlobalMatrix<T>: GlobalTensor<T> {
    /// Sets the diagonal entry of every locally owned row without nonzero entries to one.
    ///
    /// Returns the indices of the rows that were changed.
    fn ident_zeros(&mut self) -> Result<Vec<usize>, AssemblyError>;

    fn get(&self, row: usize, col: usize) -> T;
}

fn check_local_size<T>(values: &[T], dofs: &[&[usize]], rank: usize) -> Result<(), AssemblyError> {
    if dofs.len() != rank {
        return Err(form_mismatch(format!(
            "cannot add local tensor with {} dof lists to a global tensor of rank {rank}",
            dofs.len()
        )));
    }
    let expected: usize = dofs.iter().map(|d| d.len()).product();
    if values.len() != expected {
        return Err(form_mismatch(format!(
            "local tensor has {} values, but the dof lists span {expected} entries",
            values.len()
        )));
    }
    Ok(())
}

fn check_index(index: usize, size: usize) -> Result<(), AssemblyError> {
    if index >= size {
        Err(form_mismatch(format!("dof {index} is out of bounds for dimension {size}")))
    } else {
        Ok(())
    }
}

/// A rank 0 tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarTensor<T> {
    value: T,
    initialized: bool,
    finalized: bool,
}

impl<T: Real> Default for ScalarTensor<T> {
    fn default() -> Self {
        Self {
            value: T::zero(),
            initialized: false,
            finalized: true,
        }
    }
}

impl<T: Real> ScalarTensor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: Real> GlobalTensor<T> for ScalarTensor<T> {
    fn rank(&self) -> usize {
        0
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn size(&self, _dim: usize) -> usize {
        1
    }

    fn local_range(&self, _dim: usize) -> Range<usize> {
        0..1
    }

    fn init(&mut self, layout: &TensorLayout) -> Result<(), AssemblyError> {
        if layout.rank() != 0 {
            return Err(form_mismatch(format!("cannot initialize a scalar with a rank {} layout", layout.rank())));
        }
        self.value = T::zero();
        self.initialized = true;
        Ok(())
    }

    fn add(&mut self, values: &[T], dofs: &[&[usize]]) -> Result<(), AssemblyError> {
        check_local_size(values, dofs, 0)?;
        self.value += values[0];
        self.finalized = false;
        Ok(())
    }

    fn zero(&mut self) {
        self.value = T::zero();
    }

    fn apply(&mut self, _mode: ApplyMode) {
        self.finalized = true;
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// A dense rank 1 tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorTensor<T: Real> {
    vector: Option<DVector<T>>,
    local_range: Range<usize>,
    finalized: bool,
}

impl<T: Real> Default for VectorTensor<T> {
    fn default() -> Self {
        Self {
            vector: None,
            local_range: 0..0,
            finalized: true,
        }
    }
}

impl<T: Real> VectorTensor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the tensor has not been initialized.
    pub fn vector(&self) -> &DVector<T> {
        self.vector
            .as_ref()
            .expect("Vector tensor must be initialized before use")
    }

    pub fn into_vector(self) -> Option<DVector<T>> {
        self.vector
    }
}

impl<T: Real> GlobalTensor<T> for VectorTensor<T> {
    fn rank(&self) -> usize {
        1
    }

    fn is_initialized(&self) -> bool {
        self.vector.is_some()
    }

    fn size(&self, _dim: usize) -> usize {
        self.vector.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    fn local_range(&self, _dim: usize) -> Range<usize> {
        self.local_range.clone()
    }

    fn init(&mut self, layout: &TensorLayout) -> Result<(), AssemblyError> {
        if layout.rank() != 1 {
            return Err(form_mismatch(format!("cannot initialize a vector with a rank {} layout", layout.rank())));
        }
        self.vector = Some(DVector::zeros(layout.global_dimensions[0]));
        self.local_range = layout.local_ranges[0].clone();
        Ok(())
    }

    fn add(&mut self, values: &[T], dofs: &[&[usize]]) -> Result<(), AssemblyError> {
        check_local_size(values, dofs, 1)?;
        let vector = self
            .vector
            .as_mut()
            .ok_or_else(|| form_mismatch("vector tensor is not initialized"))?;
        for (&dof, &value) in dofs[0].iter().zip(values) {
            check_index(dof, vector.len())?;
            vector[dof] += value;
        }
        self.finalized = false;
        Ok(())
    }

    fn zero(&mut self) {
        if let Some(vector) = &mut self.vector {
            vector.fill(T::zero());
        }
    }

    fn apply(&mut self, _mode: ApplyMode) {
        self.finalized = true;
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// A dense rank 2 tensor, mainly useful for small problems and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrixTensor<T: Real> {
    matrix: Option<DMatrix<T>>,
    local_ranges: [Range<usize>; 2],
    finalized: bool,
}

impl<T: Real> Default for DenseMatrixTensor<T> {
    fn default() -> Self {
        Self {
            matrix: None,
            local_ranges: [0..0, 0..0],
            finalized: true,
        }
    }
}

impl<T: Real> DenseMatrixTensor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the tensor has not been initialized.
    pub fn matrix(&self) -> &DMatrix<T> {
        self.matrix
            .as_ref()
            .expect("Matrix tensor must be initialized before use")
    }

    pub fn into_matrix(self) -> Option<DMatrix<T>> {
        self.matrix
    }
}

impl<T: Real> GlobalTensor<T> for DenseMatrixTensor<T> {
    fn rank(&self) -> usize {
        2
    }

    fn is_initialized(&self) -> bool {
        self.matrix.is_some()
    }

    fn size(&self, dim: usize) -> usize {
        match (&self.matrix, dim) {
            (Some(matrix), 0) => matrix.nrows(),
            (Some(matrix), 1) => matrix.ncols(),
            _ => 0,
        }
    }

    fn local_range(&self, dim: usize) -> Range<usize> {
        self.local_ranges[dim].clone()
    }

    fn init(&mut self, layout: &TensorLayout) -> Result<(), AssemblyError> {
        if layout.rank() != 2 {
            return Err(form_mismatch(format!("cannot initialize a matrix with a rank {} layout", layout.rank())));
        }
        let (nrows, ncols) = (layout.global_dimensions[0], layout.global_dimensions[1]);
        self.matrix = Some(DMatrix::zeros(nrows, ncols));
        self.local_ranges = [layout.local_ranges[0].clone(), layout.local_ranges[1].clone()];
        Ok(())
    }

    fn add(&mut self, values: &[T], dofs: &[&[usize]]) -> Result<(), AssemblyError> {
        check_local_size(values, dofs, 2)?;
        let matrix = self
            .matrix
            .as_mut()
            .ok_or_else(|| form_mismatch("matrix tensor is not initialized"))?;
        let (rows, cols) = (dofs[0], dofs[1]);
        for (local_row, &row) in rows.iter().enumerate() {
            check_index(row, matrix.nrows())?;
            for (local_col, &col) in cols.iter().enumerate() {
                check_index(col, matrix.ncols())?;
                matrix[(row, col)] += values[local_row * cols.len() + local_col];
            }
        }
        self.finalized = false;
        Ok(())
    }

    fn zero(&mut self) {
        if let Some(matrix) = &mut self.matrix {
            matrix.fill(T::zero());
        }
    }

    fn apply(&mut self, _mode: ApplyMode) {
        self.finalized = true;
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl<T: Real> GlobalMatrix<T> for DenseMatrixTensor<T> {
    fn ident_zeros(&mut self) -> Result<Vec<usize>, AssemblyError> {
        let owned_rows = self.local_ranges[0].clone();
        let matrix = self
            .matrix
            .as_mut()
            .ok_or_else(|| form_mismatch("matrix tensor is not initialized"))?;
        let n = matrix.nrows().min(matrix.ncols());
        let zero_rows: Vec<usize> = owned_rows
            .filter(|&i| i < n)
            .filter(|&i| matrix.row(i).iter().all(|v| *v == T::zero()))
            .collect();
        for &i in &zero_rows {
            matrix[(i, i)] = T::one();
        }
        Ok(zero_rows)
    }

    fn get(&self, row: usize, col: usize) -> T {
        self.matrix()[(row, col)]
    }
}

/// A sparse rank 2 tensor in CSR format with a fixed sparsity pattern.
///
/// Adding to an entry outside of the pattern is an error rather than a reallocation.
#[derive(Debug, Clone)]
pub struct CsrTensor<T: Real> {
    matrix: Option<CsrMatrix<T>>,
    local_ranges: [Range<usize>; 2],
    finalized: bool,
    // Buffer for the local columns in order of increasing global column
    col_permutation: Vec<usize>,
}

impl<T: Real> Default for CsrTensor<T> {
    fn default() -> Self {
        Self {
            matrix: None,
            local_ranges: [0..0, 0..0],
            finalized: true,
            col_permutation: Vec::new(),
        }
    }
}

impl<T: Real> CsrTensor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the tensor has not been initialized.
    pub fn matrix(&self) -> &CsrMatrix<T> {
        self.matrix
            .as_ref()
            .expect("CSR tensor must be initialized before use")
    }

    pub fn into_matrix(self) -> Option<CsrMatrix<T>> {
        self.matrix
    }

    fn matrix_mut(&mut self) -> Result<&mut CsrMatrix<T>, AssemblyError> {
        self.matrix
            .as_mut()
            .ok_or_else(|| form_mismatch("CSR tensor is not initialized"))
    }
}

impl<T: Real> GlobalTensor<T> for CsrTensor<T> {
    fn rank(&self) -> usize {
        2
    }

    fn is_initialized(&self) -> bool {
        self.matrix.is_some()
    }

    fn size(&self, dim: usize) -> usize {
        match (&self.matrix, dim) {
            (Some(matrix), 0) => matrix.nrows(),
            (Some(matrix), 1) => matrix.ncols(),
            _ => 0,
        }
    }

    fn local_range(&self, dim: usize) -> Range<usize> {
        self.local_ranges[dim].clone()
    }

    fn requires_sparsity_pattern(&self) -> bool {
        true
    }

    fn init(&mut self, layout: &TensorLayout) -> Result<(), AssemblyError> {
        if layout.rank() != 2 {
            return Err(form_mismatch(format!("cannot initialize a matrix with a rank {} layout", layout.rank())));
        }
        let pattern = layout
            .sparsity
            .clone()
            .ok_or_else(|| form_mismatch("CSR tensor needs a sparsity pattern"))?;
        if pattern.major_dim() != layout.global_dimensions[0] || pattern.minor_dim() != layout.global_dimensions[1] {
            return Err(form_mismatch(format!(
                "sparsity pattern of size {}x{} does not match tensor size {}x{}",
                pattern.major_dim(),
                pattern.minor_dim(),
                layout.global_dimensions[0],
                layout.global_dimensions[1]
            )));
        }
        let values = vec![T::zero(); pattern.nnz()];
        let matrix = CsrMatrix::try_from_pattern_and_values(pattern, values)
            .expect("Internal error: Values must match the pattern");
        self.matrix = Some(matrix);
        self.local_ranges = [layout.local_ranges[0].clone(), layout.local_ranges[1].clone()];
        Ok(())
    }

    fn add(&mut self, values: &[T], dofs: &[&[usize]]) -> Result<(), AssemblyError> {
        check_local_size(values, dofs, 2)?;
        let (rows, cols) = (dofs[0], dofs[1]);

        let mut col_permutation = std::mem::take(&mut self.col_permutation);
        col_permutation.clear();
        col_permutation.extend(0..cols.len());
        col_permutation.sort_unstable_by_key(|&j| cols[j]);

        let result = self.matrix_mut().and_then(|matrix| {
            for (local_row, &row) in rows.iter().enumerate() {
                if row >= matrix.nrows() {
                    return Err(AssemblyError::SparsityViolation { row, col: cols.first().copied().unwrap_or(0) });
                }
                let local_values = &values[local_row * cols.len()..(local_row + 1) * cols.len()];
                let mut csr_row = matrix.row_mut(row);
                add_local_row_to_csr_row(&mut csr_row, row, cols, &col_permutation, local_values)?;
            }
            Ok(())
        });

        self.col_permutation = col_permutation;
        if result.is_ok() {
            self.finalized = false;
        }
        result
    }

    fn zero(&mut self) {
        if let Some(matrix) = &mut self.matrix {
            matrix.values_mut().fill(T::zero());
        }
    }

    fn apply(&mut self, _mode: ApplyMode) {
        self.finalized = true;
    }

    fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl<T: Real> GlobalMatrix<T> for CsrTensor<T> {
    fn ident_zeros(&mut self) -> Result<Vec<usize>, AssemblyError> {
        let owned_rows = self.local_ranges[0].clone();
        let matrix = self.matrix_mut()?;
        let mut zero_rows = Vec::new();
        for (i, mut row) in matrix.row_iter_mut().enumerate() {
            if !owned_rows.contains(&i) {
                continue;
            }
            let (cols, values) = row.cols_and_values_mut();
            if values.iter().all(|v| *v == T::zero()) {
                let diagonal = cols
                    .binary_search(&i)
                    .map_err(|_| AssemblyError::SparsityViolation { row: i, col: i })?;
                values[diagonal] = T::one();
                zero_rows.push(i);
            }
        }
        Ok(zero_rows)
    }

    fn get(&self, row: usize, col: usize) -> T {
        self.matrix()
            .get_entry(row, col)
            .map(|entry| entry.into_value())
            .unwrap_or_else(T::zero)
    }
}

/// Adds one row of a local matrix to a CSR row.
///
/// `sorted_permutation` lists the local columns such that the corresponding global columns
/// are sorted, so the CSR row is scanned only once. Local columns may map to the same
/// global column.
fn add_local_row_to_csr_row<T: Real>(
    csr_row: &mut nalgebra_sparse::csr::CsrRowMut<T>,
    row: usize,
    cols: &[usize],
    sorted_permutation: &[usize],
    local_row: &[T],
) -> Result<(), AssemblyError> {
    let (csr_cols, csr_values) = csr_row.cols_and_values_mut();
    let mut csr_idx = 0;
    for &local_col in sorted_permutation {
        let col = cols[local_col];
        while csr_idx < csr_cols.len() && csr_cols[csr_idx] < col {
            csr_idx += 1;
        }
        if csr_idx == csr_cols.len() || csr_cols[csr_idx] != col {
            return Err(AssemblyError::SparsityViolation { row, col });
        }
        csr_values[csr_idx] += local_row[local_col];
    }
    Ok(())
}
