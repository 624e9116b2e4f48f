use crate::assembly::{check, init_global_tensor, progress_message, AssemblerOptions};
use crate::dofmap::DofMap;
use crate::error::{form_mismatch, AssemblyError};
use crate::form::{CellGeometry, CoefficientValues, Form, IntegralKind};
use crate::mesh::Mesh;
use crate::sparsity::macro_dofs_into;
use crate::tensor::{ApplyMode, GlobalTensor};
use crate::Real;
use log::{info, trace};
use std::cell::RefCell;

/// Assembles forms of rank 0, 1 and 2 into global tensors.
#[derive(Debug)]
pub struct Assembler<T: Real> {
    options: AssemblerOptions,
    // Buffers reused across entities and across calls
    workspace: RefCell<AssemblerWorkspace<T>>,
}

#[derive(Debug)]
pub(crate) struct AssemblerWorkspace<T> {
    pub local_tensor: Vec<T>,
    pub coefficients: CoefficientValues<T>,
    pub coordinates: [Vec<T>; 2],
    pub macro_dofs: [Vec<usize>; 2],
}

impl<T> Default for AssemblerWorkspace<T> {
    fn default() -> Self {
        Self {
            local_tensor: Vec::new(),
            coefficients: CoefficientValues::new(),
            coordinates: [Vec::new(), Vec::new()],
            macro_dofs: [Vec::new(), Vec::new()],
        }
    }
}

impl<T: Real> Default for Assembler<T> {
    fn default() -> Self {
        Self::new(AssemblerOptions::default())
    }
}

pub(crate) fn cell_geometry<'a, T: Real>(mesh: &Mesh<T>, cell: usize, coordinates: &'a [T]) -> CellGeometry<'a, T> {
    CellGeometry {
        index: cell,
        cell_type: mesh.cell_type(),
        geometric_dim: mesh.gdim(),
        coordinates,
    }
}

/// Returns the local dof lists of `cell` for every argument, or `None` if any of them is empty.
pub(crate) fn cell_dof_lists<'d>(arguments: &[&'d DofMap], cell: usize) -> Option<[&'d [usize]; 2]> {
    let mut dofs: [&[usize]; 2] = [&[], &[]];
    for (list, &dofmap) in dofs.iter_mut().zip(arguments) {
        *list = dofmap.cell_dofs(cell);
        if list.is_empty() {
            return None;
        }
    }
    Some(dofs)
}

/// Zeroes `buffer` and resizes it to hold a local tensor for the given dof lists.
pub(crate) fn reset_local_tensor<T: Real>(buffer: &mut Vec<T>, dofs: &[&[usize]]) {
    let size = dofs.iter().map(|d| d.len()).product();
    buffer.clear();
    buffer.resize(size, T::zero());
}

/// Fails if the form has interior facet integrals but its mesh is distributed.
pub(crate) fn check_interior_facet_support<T: Real>(form: &Form<T>) -> Result<(), AssemblyError> {
    let num_processes = form.mesh().num_processes();
    if form.has_integrals(IntegralKind::InteriorFacet) && num_processes > 1 {
        Err(AssemblyError::UnsupportedParallelInteriorFacets { num_processes })
    } else {
        Ok(())
    }
}

impl<T: Real> Assembler<T> {
    pub fn new(options: AssemblerOptions) -> Self {
        Self {
            options,
            workspace: RefCell::new(AssemblerWorkspace::default()),
        }
    }

    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Assembles `form` into `tensor`.
    ///
    /// Cells, exterior facets and interior facets are visited in that order, each only if
    /// the form has integrals of that kind. Interior facet integrals are not supported on
    /// distributed meshes.
    pub fn assemble<A>(&self, tensor: &mut A, form: &Form<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        check(form)?;
        check_interior_facet_support(form)?;
        init_global_tensor(tensor, form, &self.options)?;

        for kind in IntegralKind::ALL {
            if !form.has_integrals(kind) {
                continue;
            }
            info!("{}", progress_message(form.rank(), kind));
            match kind {
                IntegralKind::Cell => self.assemble_cells(tensor, form)?,
                IntegralKind::ExteriorFacet => self.assemble_exterior_facets(tensor, form)?,
                IntegralKind::InteriorFacet => self.assemble_interior_facets(tensor, form)?,
            }
        }

        if self.options.finalize_tensor {
            tensor.apply(ApplyMode::Add);
        }
        Ok(())
    }

    /// Evaluates the cell integrals of a rank 0 form on each cell separately.
    ///
    /// Cells without a selected integral get the value zero.
    pub fn assemble_cell_values(&self, form: &Form<T>) -> Result<Vec<T>, AssemblyError> {
        if form.rank() != 0 {
            return Err(form_mismatch(format!(
                "cell values can only be computed for rank 0 forms, not rank {}",
                form.rank()
            )));
        }
        check(form)?;

        let mesh = form.mesh();
        let ws = &mut *self.workspace.borrow_mut();
        let mut values = vec![T::zero(); mesh.num_cells()];
        for (cell, value) in values.iter_mut().enumerate() {
            let marker = form.domain_marker(IntegralKind::Cell, cell);
            let Some(kernel) = form.cell_integrals().select(marker) else {
                continue;
            };
            mesh.cell_coordinates_into(cell, &mut ws.coordinates[0]);
            let geometry = cell_geometry(mesh, cell, &ws.coordinates[0]);
            form.restrict_coefficients(&mut ws.coefficients, &geometry);
            reset_local_tensor(&mut ws.local_tensor, &[]);
            kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, &geometry)?;
            *value = ws.local_tensor[0];
        }
        Ok(values)
    }

    fn assemble_cells<A>(&self, tensor: &mut A, form: &Form<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        let mesh = form.mesh();
        let rank = form.rank();
        let ws = &mut *self.workspace.borrow_mut();

        for cell in 0..mesh.num_cells() {
            let marker = form.domain_marker(IntegralKind::Cell, cell);
            let Some(kernel) = form.cell_integrals().select(marker) else {
                trace!("No cell integral selected for cell {cell}, skipping.");
                continue;
            };
            let Some(dofs) = cell_dof_lists(form.arguments(), cell) else {
                trace!("Empty dof list on cell {cell}, skipping.");
                continue;
            };
            let dofs = &dofs[..rank];

            mesh.cell_coordinates_into(cell, &mut ws.coordinates[0]);
            let geometry = cell_geometry(mesh, cell, &ws.coordinates[0]);
            form.restrict_coefficients(&mut ws.coefficients, &geometry);

            reset_local_tensor(&mut ws.local_tensor, dofs);
            kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, &geometry)?;
            tensor.add(&ws.local_tensor, dofs)?;
        }
        Ok(())
    }

    fn assemble_exterior_facets<A>(&self, tensor: &mut A, form: &Form<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        let mesh = form.mesh();
        let rank = form.rank();
        let ws = &mut *self.workspace.borrow_mut();

        for facet in (0..mesh.num_facets()).filter(|&f| mesh.is_exterior_facet(f)) {
            let marker = form.domain_marker(IntegralKind::ExteriorFacet, facet);
            let Some(kernel) = form.exterior_facet_integrals().select(marker) else {
                trace!("No exterior facet integral selected for facet {facet}, skipping.");
                continue;
            };
            let cell = mesh.facet_cells(facet)[0];
            let local_facet = mesh
                .local_facet_index(cell, facet)
                .expect("Internal error: Facet must be a facet of its incident cell");
            let Some(dofs) = cell_dof_lists(form.arguments(), cell) else {
                trace!("Empty dof list on cell {cell}, skipping facet {facet}.");
                continue;
            };
            let dofs = &dofs[..rank];

            mesh.cell_coordinates_into(cell, &mut ws.coordinates[0]);
            let geometry = cell_geometry(mesh, cell, &ws.coordinates[0]);
            form.restrict_coefficients(&mut ws.coefficients, &geometry);

            reset_local_tensor(&mut ws.local_tensor, dofs);
            kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, &geometry, local_facet)?;
            tensor.add(&ws.local_tensor, dofs)?;
        }
        Ok(())
    }

    fn assemble_interior_facets<A>(&self, tensor: &mut A, form: &Form<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        let mesh = form.mesh();
        let rank = form.rank();
        let arguments = form.arguments();
        let AssemblerWorkspace {
            local_tensor,
            coefficients,
            coordinates: [coordinates0, coordinates1],
            macro_dofs,
        } = &mut *self.workspace.borrow_mut();

        for facet in (0..mesh.num_facets()).filter(|&f| mesh.is_interior_facet(f)) {
            let marker = form.domain_marker(IntegralKind::InteriorFacet, facet);
            let Some(kernel) = form.interior_facet_integrals().select(marker) else {
                trace!("No interior facet integral selected for facet {facet}, skipping.");
                continue;
            };
            let cells = mesh.facet_cells(facet);
            let (cell0, cell1) = (cells[0], cells[1]);
            if cell_dof_lists(arguments, cell0).is_none() || cell_dof_lists(arguments, cell1).is_none() {
                trace!("Empty dof list next to facet {facet}, skipping.");
                continue;
            }
            let local_facets = [
                mesh.local_facet_index(cell0, facet)
                    .expect("Internal error: Facet must be a facet of its incident cells"),
                mesh.local_facet_index(cell1, facet)
                    .expect("Internal error: Facet must be a facet of its incident cells"),
            ];

            for (macro_list, dofmap) in macro_dofs.iter_mut().zip(arguments) {
                macro_dofs_into(macro_list, dofmap, cells);
            }
            let dofs: [&[usize]; 2] = [&macro_dofs[0], &macro_dofs[1]];
            let dofs = &dofs[..rank];

            mesh.cell_coordinates_into(cell0, coordinates0);
            mesh.cell_coordinates_into(cell1, coordinates1);
            let geometry0 = cell_geometry(mesh, cell0, coordinates0);
            let geometry1 = cell_geometry(mesh, cell1, coordinates1);
            form.restrict_coefficients_macro(coefficients, [&geometry0, &geometry1]);

            reset_local_tensor(local_tensor, dofs);
            kernel.tabulate_tensor(local_tensor, coefficients, [&geometry0, &geometry1], local_facets)?;
            tensor.add(local_tensor, dofs)?;
        }
        Ok(())
    }
}
