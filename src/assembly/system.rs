use crate::assembly::assembler::{cell_geometry, check_interior_facet_support, reset_local_tensor, AssemblerWorkspace};
use crate::assembly::{check, init_global_tensor, AssemblerOptions};
use crate::dofmap::DofMap;
use crate::error::{form_mismatch, AssemblyError};
use crate::form::{CellKernel, Form, IntegralKind};
use crate::mesh::Mesh;
use crate::sparsity::macro_dofs_into;
use crate::tensor::{ApplyMode, GlobalTensor};
use crate::Real;
use log::{info, trace};
use nalgebra::DVector;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Range;

pub const BOUNDARY_FACET_CELLS: &str = "boundary_facet_cells";
pub const BOUNDARY_FACET_NUMBERS: &str = "boundary_facet_numbers";
pub const BOUNDARY_INDICATORS: &str = "boundary_indicators";

/// Prescribed values for a set of dofs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirichletBC<T> {
    values: BTreeMap<usize, T>,
}

impl<T: Real> DirichletBC<T> {
    pub fn from_values(values: impl IntoIterator<Item = (usize, T)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Prescribes `value(dof)` for all dofs in the closure of the facets marked with `marker`.
    ///
    /// `facet_markers` holds one marker per facet of the mesh.
    pub fn from_facet_markers<F>(
        mesh: &Mesh<T>,
        dofmap: &DofMap,
        facet_markers: &[usize],
        marker: usize,
        value: F,
    ) -> Result<Self, AssemblyError>
    where
        F: Fn(usize) -> T,
    {
        if facet_markers.len() != mesh.num_facets() {
            return Err(form_mismatch(format!(
                "got {} facet markers for a mesh with {} facets",
                facet_markers.len(),
                mesh.num_facets()
            )));
        }
        let mut values = BTreeMap::new();
        for facet in (0..mesh.num_facets()).filter(|&f| facet_markers[f] == marker) {
            for &cell in mesh.facet_cells(facet) {
                let local_facet = mesh
                    .local_facet_index(cell, facet)
                    .expect("Internal error: Facet must be a facet of its incident cells");
                insert_facet_dofs(&mut values, dofmap, cell, local_facet, &value);
            }
        }
        Ok(Self { values })
    }

    /// Prescribes `value(dof)` on the boundary facets recorded in the mesh data arrays
    /// `boundary_facet_cells`, `boundary_facet_numbers` and `boundary_indicators` whose
    /// indicator equals `marker`.
    pub fn from_mesh_boundary_data<F>(mesh: &Mesh<T>, dofmap: &DofMap, marker: usize, value: F) -> Result<Self, AssemblyError>
    where
        F: Fn(usize) -> T,
    {
        let data = mesh.data();
        let array = |name: &str| {
            data.array(name)
                .ok_or_else(|| AssemblyError::MissingBoundaryData(format!("mesh data array '{name}' is missing")))
        };
        let cells = array(BOUNDARY_FACET_CELLS)?;
        let local_facets = array(BOUNDARY_FACET_NUMBERS)?;
        let indicators = array(BOUNDARY_INDICATORS)?;
        if cells.len() != local_facets.len() || cells.len() != indicators.len() {
            return Err(AssemblyError::MissingBoundaryData(format!(
                "boundary arrays have different lengths ({}, {} and {})",
                cells.len(),
                local_facets.len(),
                indicators.len()
            )));
        }

        let num_facets = mesh.cell_type().num_facets();
        let mut values = BTreeMap::new();
        for ((&cell, &local_facet), _) in cells
            .iter()
            .zip(local_facets)
            .zip(indicators)
            .filter(|(_, indicator)| **indicator == marker)
        {
            if cell >= mesh.num_cells() || local_facet >= num_facets {
                return Err(AssemblyError::MissingBoundaryData(format!(
                    "boundary data refers to non-existent local facet {local_facet} of cell {cell}"
                )));
            }
            insert_facet_dofs(&mut values, dofmap, cell, local_facet, &value);
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &BTreeMap<usize, T> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The prescribed values of several conditions. Later conditions override earlier ones.
    pub fn merge(bcs: &[&DirichletBC<T>]) -> BTreeMap<usize, T> {
        let mut merged = BTreeMap::new();
        for bc in bcs {
            merged.extend(bc.values.iter().map(|(&dof, &value)| (dof, value)));
        }
        merged
    }
}

fn insert_facet_dofs<T, F>(values: &mut BTreeMap<usize, T>, dofmap: &DofMap, cell: usize, local_facet: usize, value: &F)
where
    F: Fn(usize) -> T,
{
    let cell_dofs = dofmap.cell_dofs(cell);
    if cell_dofs.is_empty() {
        return;
    }
    for position in dofmap.tabulate_facet_dofs(local_facet) {
        let dof = cell_dofs[position];
        values.entry(dof).or_insert_with(|| value(dof));
    }
}

/// Boundary values as seen during assembly, with bookkeeping for constrained diagonals.
struct BoundaryValues<'a, T> {
    values: BTreeMap<usize, T>,
    dofmap: &'a DofMap,
    /// Constrained dofs whose diagonal entry has been set.
    diagonal_set: FxHashSet<usize>,
}

impl<'a, T: Real> BoundaryValues<'a, T> {
    /// Eliminates the constrained dofs from a local system.
    ///
    /// `a` is a square row-major matrix over `dofs` and `b` a vector over the same dofs.
    /// Constrained rows and columns of `a` are zeroed and the column contributions moved to
    /// `b`. The diagonal entry and the value in `b` are set only once per constrained dof on
    /// the process owning it, so that constrained rows of the global matrix become
    /// identity rows.
    fn apply(&mut self, a: &mut [T], b: &mut [T], dofs: &[usize]) {
        let n = dofs.len();
        for (i, dof) in dofs.iter().enumerate() {
            let Some(&value) = self.values.get(dof) else {
                continue;
            };
            for k in 0..n {
                a[i * n + k] = T::zero();
            }
            for j in 0..n {
                b[j] -= a[j * n + i] * value;
                a[j * n + i] = T::zero();
            }
            if self.dofmap.is_owned(*dof) && self.diagonal_set.insert(*dof) {
                a[i * n + i] = T::one();
                b[i] = value;
            } else {
                b[i] = T::zero();
            }
        }
    }
}

#[derive(Debug)]
struct SystemWorkspace<T> {
    a: AssemblerWorkspace<T>,
    l: AssemblerWorkspace<T>,
    a_local: Vec<T>,
    b_local: Vec<T>,
    dofs: Vec<usize>,
}

impl<T> Default for SystemWorkspace<T> {
    fn default() -> Self {
        Self {
            a: AssemblerWorkspace::default(),
            l: AssemblerWorkspace::default(),
            a_local: Vec::new(),
            b_local: Vec::new(),
            dofs: Vec::new(),
        }
    }
}

/// Assembles a bilinear and a linear form together, eliminating Dirichlet boundary values
/// symmetrically on each cell before its contributions are added.
///
/// Both forms must share one space: the test and trial dofs of the bilinear form must equal
/// the test dofs of the linear form on every cell.
#[derive(Debug)]
pub struct SystemAssembler<T: Real> {
    options: AssemblerOptions,
    workspace: RefCell<SystemWorkspace<T>>,
}

impl<T: Real> Default for SystemAssembler<T> {
    fn default() -> Self {
        Self::new(AssemblerOptions::default())
    }
}

/// Which of the global tensors receive contributions.
struct Targets<'t, T> {
    matrix: Option<&'t mut dyn GlobalTensor<T>>,
    vector: Option<&'t mut dyn GlobalTensor<T>>,
}

impl<'t, T: Real> Targets<'t, T> {
    fn add(&mut self, a: &[T], b: &[T], dofs: &[usize]) -> Result<(), AssemblyError> {
        if let Some(matrix) = &mut self.matrix {
            matrix.add(a, &[dofs, dofs])?;
        }
        if let Some(vector) = &mut self.vector {
            vector.add(b, &[dofs])?;
        }
        Ok(())
    }
}

impl<T: Real> SystemAssembler<T> {
    pub fn new(options: AssemblerOptions) -> Self {
        Self {
            options,
            workspace: RefCell::new(SystemWorkspace::default()),
        }
    }

    /// Assembles the matrix of `a` and the vector of `l` with the given boundary conditions.
    pub fn assemble(
        &self,
        matrix: &mut dyn GlobalTensor<T>,
        vector: &mut dyn GlobalTensor<T>,
        a: &Form<T>,
        l: &Form<T>,
        bcs: &[&DirichletBC<T>],
    ) -> Result<(), AssemblyError> {
        let targets = Targets {
            matrix: Some(matrix),
            vector: Some(vector),
        };
        self.assemble_system(targets, a, Some(l), bcs, None)
    }

    /// Assembles only the matrix of `a`.
    pub fn assemble_matrix(
        &self,
        matrix: &mut dyn GlobalTensor<T>,
        a: &Form<T>,
        bcs: &[&DirichletBC<T>],
    ) -> Result<(), AssemblyError> {
        let targets = Targets {
            matrix: Some(matrix),
            vector: None,
        };
        self.assemble_system(targets, a, None, bcs, None)
    }

    /// Assembles only the vector of `l`, lifted by the columns of `a` at constrained dofs.
    pub fn assemble_vector(
        &self,
        vector: &mut dyn GlobalTensor<T>,
        a: &Form<T>,
        l: &Form<T>,
        bcs: &[&DirichletBC<T>],
    ) -> Result<(), AssemblyError> {
        let targets = Targets {
            matrix: None,
            vector: Some(vector),
        };
        self.assemble_system(targets, a, Some(l), bcs, None)
    }

    /// Assembles the system for an increment of the current iterate `x0`.
    ///
    /// The prescribed value of each constrained dof becomes `x0[dof] - g`.
    pub fn assemble_incremental(
        &self,
        matrix: &mut dyn GlobalTensor<T>,
        vector: &mut dyn GlobalTensor<T>,
        a: &Form<T>,
        l: &Form<T>,
        bcs: &[&DirichletBC<T>],
        x0: &DVector<T>,
    ) -> Result<(), AssemblyError> {
        let targets = Targets {
            matrix: Some(matrix),
            vector: Some(vector),
        };
        self.assemble_system(targets, a, Some(l), bcs, Some(x0))
    }

    fn assemble_system(
        &self,
        mut targets: Targets<T>,
        a: &Form<T>,
        l: Option<&Form<T>>,
        bcs: &[&DirichletBC<T>],
        x0: Option<&DVector<T>>,
    ) -> Result<(), AssemblyError> {
        check_system_forms(a, l)?;
        check_interior_facet_support(a)?;
        if let Some(l) = l {
            check_interior_facet_support(l)?;
        }
        if let Some(matrix) = targets.matrix.as_deref_mut() {
            init_global_tensor(matrix, a, &self.options)?;
        }
        if let (Some(vector), Some(l)) = (targets.vector.as_deref_mut(), l) {
            init_global_tensor(vector, l, &self.options)?;
        }

        let space = a.arguments()[0];
        let mut values = DirichletBC::merge(bcs);
        if let Some(x0) = x0 {
            if x0.len() != space.global_dimension() {
                return Err(form_mismatch(format!(
                    "current iterate has {} entries, but the space has dimension {}",
                    x0.len(),
                    space.global_dimension()
                )));
            }
            for (&dof, value) in values.iter_mut() {
                *value = x0[dof] - *value;
            }
        }
        let mut boundary_values = BoundaryValues {
            values,
            dofmap: space,
            diagonal_set: FxHashSet::default(),
        };

        let has_interior_facets = a.has_integrals(IntegralKind::InteriorFacet)
            || l.map_or(false, |l| l.has_integrals(IntegralKind::InteriorFacet));
        if has_interior_facets {
            info!("Assembling linear system and applying boundary conditions facet-wise");
            self.facet_wise_assembly(&mut targets, a, l, &mut boundary_values)?;
        } else {
            info!("Assembling linear system and applying boundary conditions cell-wise");
            self.cell_wise_assembly(&mut targets, a, l, &mut boundary_values)?;
        }

        if self.options.finalize_tensor {
            if let Some(matrix) = targets.matrix {
                matrix.apply(ApplyMode::Add);
            }
            if let Some(vector) = targets.vector {
                vector.apply(ApplyMode::Add);
            }
        }
        Ok(())
    }

    fn cell_wise_assembly(
        &self,
        targets: &mut Targets<T>,
        a: &Form<T>,
        l: Option<&Form<T>>,
        boundary_values: &mut BoundaryValues<T>,
    ) -> Result<(), AssemblyError> {
        let mesh = a.mesh();
        let space = a.arguments()[0];
        let ws = &mut *self.workspace.borrow_mut();

        for cell in 0..mesh.num_cells() {
            let dofs = space.cell_dofs(cell);
            if dofs.is_empty() {
                trace!("Empty dof list on cell {cell}, skipping.");
                continue;
            }
            let n = dofs.len();
            reset_local_tensor(&mut ws.a_local, &[dofs, dofs]);
            reset_local_tensor(&mut ws.b_local, &[dofs]);

            add_cell_tensor(&mut ws.a_local, &mut ws.a, a, cell)?;
            if let Some(l) = l {
                add_cell_tensor(&mut ws.b_local, &mut ws.l, l, cell)?;
            }

            for (local_facet, &facet) in mesh.cell_facets(cell).iter().enumerate() {
                if !mesh.is_exterior_facet(facet) {
                    continue;
                }
                add_exterior_facet_tensor(&mut ws.a_local, &mut ws.a, a, cell, facet, local_facet)?;
                if let Some(l) = l {
                    add_exterior_facet_tensor(&mut ws.b_local, &mut ws.l, l, cell, facet, local_facet)?;
                }
            }

            debug_assert_eq!(ws.a_local.len(), n * n);
            boundary_values.apply(&mut ws.a_local, &mut ws.b_local, dofs);
            targets.add(&ws.a_local, &ws.b_local, dofs)?;
        }
        Ok(())
    }

    fn facet_wise_assembly(
        &self,
        targets: &mut Targets<T>,
        a: &Form<T>,
        l: Option<&Form<T>>,
        boundary_values: &mut BoundaryValues<T>,
    ) -> Result<(), AssemblyError> {
        let mesh = a.mesh();
        let space = a.arguments()[0];
        let ws = &mut *self.workspace.borrow_mut();

        for facet in 0..mesh.num_facets() {
            let cells = mesh.facet_cells(facet);
            if cells.iter().any(|&cell| space.cell_dofs(cell).is_empty()) {
                trace!("Empty dof list next to facet {facet}, skipping.");
                continue;
            }

            if mesh.is_interior_facet(facet) {
                let (cell0, cell1) = (cells[0], cells[1]);
                macro_dofs_into(&mut ws.dofs, space, cells);
                let n0 = space.cell_dofs(cell0).len();
                reset_local_tensor(&mut ws.a_local, &[ws.dofs.as_slice(), ws.dofs.as_slice()]);
                reset_local_tensor(&mut ws.b_local, &[ws.dofs.as_slice()]);

                add_interior_facet_tensor(&mut ws.a_local, &mut ws.a, a, facet)?;
                if let Some(l) = l {
                    add_interior_facet_tensor(&mut ws.b_local, &mut ws.l, l, facet)?;
                }

                // A cell integral is added together with local facet 0 of its cell
                let n = ws.dofs.len();
                for (block, cell) in [(0..n0, cell0), (n0..n, cell1)] {
                    if mesh.local_facet_index(cell, facet) != Some(0) {
                        continue;
                    }
                    add_cell_tensor_to_block(&mut ws.a_local, &mut ws.a, a, cell, block.clone(), n)?;
                    if let Some(l) = l {
                        add_cell_tensor_to_block(&mut ws.b_local, &mut ws.l, l, cell, block, n)?;
                    }
                }

                boundary_values.apply(&mut ws.a_local, &mut ws.b_local, &ws.dofs);
                targets.add(&ws.a_local, &ws.b_local, &ws.dofs)?;
            } else if mesh.is_exterior_facet(facet) {
                let cell = cells[0];
                let local_facet = mesh
                    .local_facet_index(cell, facet)
                    .expect("Internal error: Facet must be a facet of its incident cell");
                let dofs = space.cell_dofs(cell);
                reset_local_tensor(&mut ws.a_local, &[dofs, dofs]);
                reset_local_tensor(&mut ws.b_local, &[dofs]);

                add_exterior_facet_tensor(&mut ws.a_local, &mut ws.a, a, cell, facet, local_facet)?;
                if let Some(l) = l {
                    add_exterior_facet_tensor(&mut ws.b_local, &mut ws.l, l, cell, facet, local_facet)?;
                }
                if local_facet == 0 {
                    add_cell_tensor(&mut ws.a_local, &mut ws.a, a, cell)?;
                    if let Some(l) = l {
                        add_cell_tensor(&mut ws.b_local, &mut ws.l, l, cell)?;
                    }
                }

                boundary_values.apply(&mut ws.a_local, &mut ws.b_local, dofs);
                targets.add(&ws.a_local, &ws.b_local, dofs)?;
            }
        }
        Ok(())
    }
}

/// Checks the forms of a system and that they are defined on a single space.
fn check_system_forms<T: Real>(a: &Form<T>, l: Option<&Form<T>>) -> Result<(), AssemblyError> {
    if a.rank() != 2 {
        return Err(form_mismatch(format!("expected a bilinear form, got a rank {} form", a.rank())));
    }
    check(a)?;
    let [test, trial] = [a.arguments()[0], a.arguments()[1]];
    let mesh = a.mesh();
    for cell in 0..mesh.num_cells() {
        if test.cell_dofs(cell) != trial.cell_dofs(cell) {
            return Err(form_mismatch(format!(
                "test and trial dofs of the bilinear form differ on cell {cell}"
            )));
        }
    }

    if let Some(l) = l {
        if l.rank() != 1 {
            return Err(form_mismatch(format!("expected a linear form, got a rank {} form", l.rank())));
        }
        check(l)?;
        if !std::ptr::eq(l.mesh(), mesh) && l.mesh().topology_hash() != mesh.topology_hash() {
            return Err(form_mismatch("the bilinear and linear forms are defined on different meshes"));
        }
        let l_test = l.arguments()[0];
        for cell in 0..mesh.num_cells() {
            if l_test.cell_dofs(cell) != trial.cell_dofs(cell) {
                return Err(form_mismatch(format!(
                    "test dofs of the linear form differ from the trial dofs of the bilinear form on cell {cell}"
                )));
            }
        }
    }
    Ok(())
}

/// Adds the cell integral of `form` on `cell` to `output`.
fn add_cell_tensor<T: Real>(
    output: &mut [T],
    ws: &mut AssemblerWorkspace<T>,
    form: &Form<T>,
    cell: usize,
) -> Result<(), AssemblyError> {
    let marker = form.domain_marker(IntegralKind::Cell, cell);
    let Some(kernel) = form.cell_integrals().select(marker) else {
        return Ok(());
    };
    tabulate_cell(kernel, ws, form, cell, output.len())?;
    for (out, value) in output.iter_mut().zip(&ws.local_tensor) {
        *out += *value;
    }
    Ok(())
}

/// Adds the cell integral of `form` on `cell` to the diagonal block `block` of a macro
/// element tensor over `n` dofs.
fn add_cell_tensor_to_block<T: Real>(
    output: &mut [T],
    ws: &mut AssemblerWorkspace<T>,
    form: &Form<T>,
    cell: usize,
    block: Range<usize>,
    n: usize,
) -> Result<(), AssemblyError> {
    let marker = form.domain_marker(IntegralKind::Cell, cell);
    let Some(kernel) = form.cell_integrals().select(marker) else {
        return Ok(());
    };
    let m = block.len();
    if form.rank() == 2 {
        tabulate_cell(kernel, ws, form, cell, m * m)?;
        for i in 0..m {
            let row = &mut output[(block.start + i) * n..(block.start + i + 1) * n];
            for (out, value) in row[block.clone()].iter_mut().zip(&ws.local_tensor[i * m..(i + 1) * m]) {
                *out += *value;
            }
        }
    } else {
        tabulate_cell(kernel, ws, form, cell, m)?;
        for (out, value) in output[block].iter_mut().zip(&ws.local_tensor) {
            *out += *value;
        }
    }
    Ok(())
}

fn tabulate_cell<T: Real>(
    kernel: &dyn CellKernel<T>,
    ws: &mut AssemblerWorkspace<T>,
    form: &Form<T>,
    cell: usize,
    size: usize,
) -> Result<(), AssemblyError> {
    let mesh = form.mesh();
    mesh.cell_coordinates_into(cell, &mut ws.coordinates[0]);
    let geometry = cell_geometry(mesh, cell, &ws.coordinates[0]);
    form.restrict_coefficients(&mut ws.coefficients, &geometry);
    ws.local_tensor.clear();
    ws.local_tensor.resize(size, T::zero());
    kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, &geometry)?;
    Ok(())
}

fn add_exterior_facet_tensor<T: Real>(
    output: &mut [T],
    ws: &mut AssemblerWorkspace<T>,
    form: &Form<T>,
    cell: usize,
    facet: usize,
    local_facet: usize,
) -> Result<(), AssemblyError> {
    let marker = form.domain_marker(IntegralKind::ExteriorFacet, facet);
    let Some(kernel) = form.exterior_facet_integrals().select(marker) else {
        return Ok(());
    };
    let mesh = form.mesh();
    mesh.cell_coordinates_into(cell, &mut ws.coordinates[0]);
    let geometry = cell_geometry(mesh, cell, &ws.coordinates[0]);
    form.restrict_coefficients(&mut ws.coefficients, &geometry);
    ws.local_tensor.clear();
    ws.local_tensor.resize(output.len(), T::zero());
    kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, &geometry, local_facet)?;
    for (out, value) in output.iter_mut().zip(&ws.local_tensor) {
        *out += *value;
    }
    Ok(())
}

fn add_interior_facet_tensor<T: Real>(
    output: &mut [T],
    ws: &mut AssemblerWorkspace<T>,
    form: &Form<T>,
    facet: usize,
) -> Result<(), AssemblyError> {
    let marker = form.domain_marker(IntegralKind::InteriorFacet, facet);
    let Some(kernel) = form.interior_facet_integrals().select(marker) else {
        return Ok(());
    };
    let mesh = form.mesh();
    let cells = mesh.facet_cells(facet);
    let local_facets = [
        mesh.local_facet_index(cells[0], facet)
            .expect("Internal error: Facet must be a facet of its incident cells"),
        mesh.local_facet_index(cells[1], facet)
            .expect("Internal error: Facet must be a facet of its incident cells"),
    ];
    let [coordinates0, coordinates1] = &mut ws.coordinates;
    mesh.cell_coordinates_into(cells[0], coordinates0);
    mesh.cell_coordinates_into(cells[1], coordinates1);
    let geometry0 = cell_geometry(mesh, cells[0], coordinates0);
    let geometry1 = cell_geometry(mesh, cells[1], coordinates1);
    form.restrict_coefficients_macro(&mut ws.coefficients, [&geometry0, &geometry1]);
    ws.local_tensor.clear();
    ws.local_tensor.resize(output.len(), T::zero());
    kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, [&geometry0, &geometry1], local_facets)?;
    for (out, value) in output.iter_mut().zip(&ws.local_tensor) {
        *out += *value;
    }
    Ok(())
}
