//! Nonzero structure of global matrices.
use crate::assembly::MultiMeshForm;
use crate::dofmap::DofMap;
use crate::error::AssemblyError;
use crate::form::{Form, IntegralKind};
use crate::mesh::Mesh;
use crate::Real;
use nalgebra::Scalar;
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::slice::ParallelSliceMut;
use std::ops::Range;

/// Which kinds of integrals a form has.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct IntegralFlags {
    pub cells: bool,
    pub exterior_facets: bool,
    pub interior_facets: bool,
}

impl IntegralFlags {
    pub fn of<T: Real>(form: &Form<T>) -> Self {
        Self {
            cells: form.has_integrals(IntegralKind::Cell),
            exterior_facets: form.has_integrals(IntegralKind::ExteriorFacet),
            interior_facets: form.has_integrals(IntegralKind::InteriorFacet),
        }
    }
}

/// The nonzero structure of a matrix over the full global index space, together with the
/// rows owned by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sparsity {
    pub pattern: SparsityPattern,
    pub owned_rows: Range<usize>,
}

/// Collects matrix entries and compresses them into a sparsity pattern.
#[derive(Debug, Clone)]
pub struct SparsityPatternBuilder {
    num_rows: usize,
    num_cols: usize,
    entries: Vec<(usize, usize)>,
}

impl SparsityPatternBuilder {
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self {
            num_rows,
            num_cols,
            entries: Vec::new(),
        }
    }

    /// Declares every entry of the outer product of `rows` and `cols`.
    pub fn insert_outer(&mut self, rows: &[usize], cols: &[usize]) {
        for &i in rows {
            for &j in cols {
                self.entries.push((i, j));
            }
        }
    }

    /// Declares the diagonal entries of the given rows that lie inside the matrix.
    pub fn insert_diagonal(&mut self, rows: Range<usize>) {
        let end = rows.end.min(self.num_cols);
        self.entries.extend((rows.start..end).map(|i| (i, i)));
    }

    pub fn build(mut self) -> SparsityPattern {
        self.entries.par_sort_unstable();
        self.entries.dedup();

        let num_rows = self.num_rows;
        let mut row_offsets = Vec::with_capacity(num_rows + 1);
        let mut column_indices = Vec::with_capacity(self.entries.len());
        row_offsets.push(0);

        let mut current_row = 0;
        for (i, j) in self.entries {
            assert!(i < num_rows && j < self.num_cols, "Entries must be in bounds");
            while i > current_row {
                row_offsets.push(column_indices.len());
                current_row += 1;
            }
            column_indices.push(j);
        }

        // Fill out offsets for remaining empty rows
        while row_offsets.len() < num_rows + 1 {
            row_offsets.push(column_indices.len());
        }

        SparsityPattern::try_from_offsets_and_indices(num_rows, self.num_cols, row_offsets, column_indices)
            .expect("Internal error: Sorted entries must form a valid sparsity pattern")
    }

    /// Computes the sparsity of a rank 2 form with test and trial dof maps `dofmaps`.
    ///
    /// Returns `None` for forms of lower rank, which have no sparsity pattern.
    pub fn build_for_mesh<T: Scalar>(
        mesh: &Mesh<T>,
        dofmaps: &[&DofMap],
        integrals: IntegralFlags,
        keep_diagonal: bool,
    ) -> Result<Option<Sparsity>, AssemblyError> {
        let [rows, cols] = match dofmaps {
            [rows, cols] => [*rows, *cols],
            _ => return Ok(None),
        };
        if integrals.interior_facets && !mesh.ordered() {
            return Err(AssemblyError::MeshNotOrdered);
        }

        let mut builder = Self::new(rows.global_dimension(), cols.global_dimension());

        if integrals.cells {
            for cell in 0..mesh.num_cells() {
                builder.insert_outer(rows.cell_dofs(cell), cols.cell_dofs(cell));
            }
        } else if integrals.exterior_facets {
            for facet in (0..mesh.num_facets()).filter(|&f| mesh.is_exterior_facet(f)) {
                let cell = mesh.facet_cells(facet)[0];
                builder.insert_outer(rows.cell_dofs(cell), cols.cell_dofs(cell));
            }
        }

        if integrals.interior_facets {
            let mut macro_rows = Vec::new();
            let mut macro_cols = Vec::new();
            for facet in (0..mesh.num_facets()).filter(|&f| mesh.is_interior_facet(f)) {
                let cells = mesh.facet_cells(facet);
                macro_dofs_into(&mut macro_rows, rows, cells);
                macro_dofs_into(&mut macro_cols, cols, cells);
                builder.insert_outer(&macro_rows, &macro_cols);
            }
        }

        let owned_rows = rows.ownership_range();
        if keep_diagonal {
            builder.insert_diagonal(owned_rows.clone());
        }

        Ok(Some(Sparsity {
            pattern: builder.build(),
            owned_rows,
        }))
    }
}

impl SparsityPatternBuilder {
    /// Computes the sparsity of a bilinear multimesh form.
    ///
    /// The pattern covers the cells of every part, the couplings between cut cells and their
    /// cutting cells and the full diagonal, so that inactive rows can be locked after
    /// assembly.
    pub fn build_for_multimesh<T: Real>(form: &MultiMeshForm<T>) -> Option<Sparsity> {
        let [rows, cols] = match form.arguments() {
            [rows, cols] => [*rows, *cols],
            _ => return None,
        };
        let multimesh = form.multimesh();
        let mut builder = Self::new(rows.global_dimension(), cols.global_dimension());

        for (p, part) in multimesh.parts().iter().enumerate() {
            let (part_rows, part_cols) = (rows.part(p), cols.part(p));
            for cell in 0..part.mesh().num_cells() {
                builder.insert_outer(part_rows.cell_dofs(cell), part_cols.cell_dofs(cell));
            }

            let mut macro_rows = Vec::new();
            let mut macro_cols = Vec::new();
            for (cut_cell, cutting_cells) in part.collisions() {
                for cutting in cutting_cells {
                    macro_rows.clear();
                    macro_rows.extend_from_slice(part_rows.cell_dofs(cut_cell));
                    macro_rows.extend_from_slice(rows.part(cutting.part).cell_dofs(cutting.cell));
                    macro_cols.clear();
                    macro_cols.extend_from_slice(part_cols.cell_dofs(cut_cell));
                    macro_cols.extend_from_slice(cols.part(cutting.part).cell_dofs(cutting.cell));
                    builder.insert_outer(&macro_rows, &macro_cols);
                }
            }
        }

        let owned_rows = 0..rows.global_dimension();
        builder.insert_diagonal(owned_rows.clone());
        Some(Sparsity {
            pattern: builder.build(),
            owned_rows,
        })
    }
}

/// Replaces the contents of `output` by the concatenated dofs of the given cells.
pub(crate) fn macro_dofs_into(output: &mut Vec<usize>, dofmap: &DofMap, cells: &[usize]) {
    output.clear();
    for &cell in cells {
        output.extend_from_slice(dofmap.cell_dofs(cell));
    }
}
