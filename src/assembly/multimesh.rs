//! Assembly over several overlapping meshes ("parts").
//!
//! Every cell of a part is either uncut, cut by a part with higher precedence or completely
//! covered by one. Uncut cells are integrated as usual, cut cells with a quadrature rule for
//! their visible region. Each cut cell additionally couples to the cells cutting it through
//! an interface integral (with facet normals) and an overlap integral.
use crate::assembly::assembler::{cell_dof_lists, cell_geometry, reset_local_tensor, AssemblerWorkspace};
use crate::assembly::{check, AssemblerOptions};
use crate::dofmap::DofMap;
use crate::error::{form_mismatch, AssemblyError};
use crate::form::{CellGeometry, CellKernel, Coefficient, CoefficientSpec, CoefficientValues, Form, QuadratureKernel, QuadratureRule};
use crate::mesh::Mesh;
use crate::sparsity::SparsityPatternBuilder;
use crate::tensor::{ApplyMode, GlobalMatrix, GlobalTensor, TensorLayout};
use crate::Real;
use log::{info, trace};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Range;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStatus {
    Uncut,
    Cut,
    Covered,
}

/// A cell of another part that cuts a cut cell, with the quadrature rules of their
/// intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct CuttingCell<T> {
    pub part: usize,
    pub cell: usize,
    /// Rule on the part of the cutting cell's boundary inside the cut cell.
    pub interface: QuadratureRule<T>,
    /// Unit normals of the interface, one per interface quadrature point.
    pub normals: Vec<T>,
    /// Rule on the intersection of the two cells.
    pub overlap: QuadratureRule<T>,
}

/// One mesh of a multimesh together with its cut information.
#[derive(Debug, Clone)]
pub struct MultiMeshPart<'a, T> {
    mesh: &'a Mesh<T>,
    status: Vec<CellStatus>,
    cut_cell_rules: BTreeMap<usize, QuadratureRule<T>>,
    collisions: BTreeMap<usize, Vec<CuttingCell<T>>>,
}

impl<'a, T: Real> MultiMeshPart<'a, T> {
    /// A part in which all cells are uncut.
    pub fn new(mesh: &'a Mesh<T>) -> Self {
        Self {
            mesh,
            status: vec![CellStatus::Uncut; mesh.num_cells()],
            cut_cell_rules: BTreeMap::new(),
            collisions: BTreeMap::new(),
        }
    }

    /// Marks `cell` as cut, with `rule` integrating over its visible region.
    pub fn with_cut_cell(mut self, cell: usize, rule: QuadratureRule<T>) -> Self {
        assert!(cell < self.status.len(), "Cell index out of bounds.");
        self.status[cell] = CellStatus::Cut;
        self.cut_cell_rules.insert(cell, rule);
        self
    }

    pub fn with_covered_cell(mut self, cell: usize) -> Self {
        assert!(cell < self.status.len(), "Cell index out of bounds.");
        self.status[cell] = CellStatus::Covered;
        self.cut_cell_rules.remove(&cell);
        self.collisions.remove(&cell);
        self
    }

    /// Records a cell of another part cutting `cut_cell`.
    pub fn with_cutting_cell(mut self, cut_cell: usize, cutting_cell: CuttingCell<T>) -> Self {
        self.collisions
            .entry(cut_cell)
            .or_default()
            .push(cutting_cell);
        self
    }

    pub fn mesh(&self) -> &'a Mesh<T> {
        self.mesh
    }

    pub fn cell_status(&self, cell: usize) -> CellStatus {
        self.status[cell]
    }

    fn cells_with_status(&self, status: CellStatus) -> impl '_ + Iterator<Item = usize> {
        self.status
            .iter()
            .enumerate()
            .filter(move |(_, s)| **s == status)
            .map(|(cell, _)| cell)
    }

    pub fn uncut_cells(&self) -> impl '_ + Iterator<Item = usize> {
        self.cells_with_status(CellStatus::Uncut)
    }

    pub fn cut_cells(&self) -> impl '_ + Iterator<Item = usize> {
        self.cells_with_status(CellStatus::Cut)
    }

    pub fn covered_cells(&self) -> impl '_ + Iterator<Item = usize> {
        self.cells_with_status(CellStatus::Covered)
    }

    pub fn cut_cell_rule(&self, cell: usize) -> Option<&QuadratureRule<T>> {
        self.cut_cell_rules.get(&cell)
    }

    pub fn cutting_cells(&self, cut_cell: usize) -> &[CuttingCell<T>] {
        self.collisions
            .get(&cut_cell)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Cut cells with the cells cutting them, by increasing cut cell index.
    pub fn collisions(&self) -> impl '_ + Iterator<Item = (usize, &[CuttingCell<T>])> {
        self.collisions
            .iter()
            .map(|(&cell, cutting)| (cell, cutting.as_slice()))
    }
}

/// A collection of overlapping meshes of the same cell type.
#[derive(Debug, Clone)]
pub struct MultiMesh<'a, T> {
    parts: Vec<MultiMeshPart<'a, T>>,
}

impl<'a, T: Real> MultiMesh<'a, T> {
    /// Checks the cut information of the parts against each other.
    pub fn new(parts: Vec<MultiMeshPart<'a, T>>) -> Result<Self, AssemblyError> {
        let Some(first) = parts.first() else {
            return Err(form_mismatch("a multimesh needs at least one part"));
        };
        let (cell_type, gdim) = (first.mesh.cell_type(), first.mesh.gdim());

        for (p, part) in parts.iter().enumerate() {
            if part.mesh.cell_type() != cell_type || part.mesh.gdim() != gdim {
                return Err(form_mismatch(format!(
                    "part {p} consists of {:?} cells in {}D, but part 0 of {cell_type:?} cells in {gdim}D",
                    part.mesh.cell_type(),
                    part.mesh.gdim()
                )));
            }
            if let Some((cell, _)) = part
                .cut_cell_rules
                .iter()
                .find(|(_, rule)| rule.dim() != gdim)
            {
                return Err(form_mismatch(format!(
                    "quadrature rule of cut cell {cell} on part {p} is not {gdim}-dimensional"
                )));
            }
            for (&cut_cell, cutting_cells) in &part.collisions {
                if part.status.get(cut_cell) != Some(&CellStatus::Cut) {
                    return Err(form_mismatch(format!(
                        "cell {cut_cell} of part {p} has cutting cells, but is not cut"
                    )));
                }
                for cutting in cutting_cells {
                    let valid_cell = parts
                        .get(cutting.part)
                        .map_or(false, |other| cutting.part != p && cutting.cell < other.mesh.num_cells());
                    if !valid_cell {
                        return Err(form_mismatch(format!(
                            "cell {cut_cell} of part {p} is cut by non-existent cell {} of part {}",
                            cutting.cell, cutting.part
                        )));
                    }
                    if cutting.interface.dim() != gdim
                        || cutting.overlap.dim() != gdim
                        || cutting.normals.len() != gdim * cutting.interface.num_points()
                    {
                        return Err(form_mismatch(format!(
                            "interface data of cell {cut_cell} of part {p} does not match the geometric dimension {gdim}"
                        )));
                    }
                }
            }
        }
        Ok(Self { parts })
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, part: usize) -> &MultiMeshPart<'a, T> {
        &self.parts[part]
    }

    pub fn parts(&self) -> &[MultiMeshPart<'a, T>] {
        &self.parts
    }
}

/// Dof maps of all parts, numbered consecutively part by part.
#[derive(Debug, Clone)]
pub struct MultiMeshDofMap {
    parts: Vec<DofMap>,
    offsets: Vec<usize>,
}

impl MultiMeshDofMap {
    /// Combines serial dof maps of the parts. The dofs of part `i` are shifted by the total
    /// dimension of the parts before it.
    pub fn new(part_dofmaps: &[&DofMap]) -> Result<Self, AssemblyError> {
        let mut offsets = Vec::with_capacity(part_dofmaps.len() + 1);
        let mut parts = Vec::with_capacity(part_dofmaps.len());
        offsets.push(0);
        for (p, dofmap) in part_dofmaps.iter().enumerate() {
            let num_processes = dofmap.ownership().num_processes();
            if num_processes > 1 {
                return Err(form_mismatch(format!(
                    "dof map of part {p} is distributed over {num_processes} processes, \
                     but multimesh dof maps must be serial"
                )));
            }
            let offset = *offsets.last().expect("Internal error: Offsets are never empty");
            parts.push(dofmap.shifted(offset));
            offsets.push(offset + dofmap.global_dimension());
        }
        Ok(Self { parts, offsets })
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    /// The dof map of a part in the multimesh numbering.
    pub fn part(&self, part: usize) -> &DofMap {
        &self.parts[part]
    }

    /// The dofs belonging to a part.
    pub fn part_range(&self, part: usize) -> Range<usize> {
        self.offsets[part]..self.offsets[part + 1]
    }

    pub fn global_dimension(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }
}

struct MultiMeshFormPart<'a, T> {
    form: Form<'a, T>,
    cut_cell_integral: Option<Box<dyn QuadratureKernel<T> + 'a>>,
    interface_integral: Option<Box<dyn QuadratureKernel<T> + 'a>>,
    overlap_integral: Option<Box<dyn QuadratureKernel<T> + 'a>>,
}

/// A form over a multimesh: one [`Form`] per part for uncut cells and coefficients, plus
/// quadrature kernels for cut cells, interfaces and overlaps.
pub struct MultiMeshForm<'a, T> {
    multimesh: &'a MultiMesh<'a, T>,
    arguments: Vec<&'a MultiMeshDofMap>,
    parts: Vec<MultiMeshFormPart<'a, T>>,
}

impl<'a, T: Real> MultiMeshForm<'a, T> {
    pub fn new(multimesh: &'a MultiMesh<'a, T>, arguments: Vec<&'a MultiMeshDofMap>) -> Result<Self, AssemblyError> {
        if arguments.len() > 2 {
            return Err(form_mismatch(format!(
                "forms have at most two arguments, got {}",
                arguments.len()
            )));
        }
        if let Some(dofmap) = arguments
            .iter()
            .find(|d| d.num_parts() != multimesh.num_parts())
        {
            return Err(form_mismatch(format!(
                "multimesh has {} parts, but a dof map of the form has {}",
                multimesh.num_parts(),
                dofmap.num_parts()
            )));
        }

        let parts = multimesh
            .parts()
            .iter()
            .enumerate()
            .map(|(p, part)| {
                let part_arguments = arguments.iter().map(|dofmap| dofmap.part(p)).collect();
                MultiMeshFormPart {
                    form: Form::new(part.mesh(), part_arguments),
                    cut_cell_integral: None,
                    interface_integral: None,
                    overlap_integral: None,
                }
            })
            .collect();
        Ok(Self {
            multimesh,
            arguments,
            parts,
        })
    }

    fn map_part_form(mut self, part: usize, f: impl FnOnce(Form<'a, T>) -> Form<'a, T>) -> Self {
        assert!(part < self.parts.len(), "Part index out of bounds.");
        let mut parts = std::mem::take(&mut self.parts);
        let tail = parts.split_off(part + 1);
        let current = parts
            .pop()
            .expect("Internal error: Part was checked to exist");
        parts.push(MultiMeshFormPart {
            form: f(current.form),
            ..current
        });
        parts.extend(tail);
        self.parts = parts;
        self
    }

    /// Declares the coefficient slots of the form on every part.
    pub fn with_coefficient_specs(mut self, specs: Vec<CoefficientSpec>) -> Self {
        for part in 0..self.parts.len() {
            let specs = specs.clone();
            self = self.map_part_form(part, |form| form.with_coefficient_specs(specs));
        }
        self
    }

    /// Sets a coefficient on one part. The coefficient is restricted to cells of that part.
    pub fn with_coefficient(self, part: usize, index: usize, coefficient: &'a dyn Coefficient<T>) -> Self {
        self.map_part_form(part, |form| form.with_coefficient(index, coefficient))
    }

    /// The integral over uncut cells of a part.
    pub fn with_cell_integral(self, part: usize, kernel: impl CellKernel<T> + 'a) -> Self {
        self.map_part_form(part, |form| form.with_cell_integral(None, kernel))
    }

    pub fn with_cut_cell_integral(mut self, part: usize, kernel: impl QuadratureKernel<T> + 'a) -> Self {
        self.parts[part].cut_cell_integral = Some(Box::new(kernel));
        self
    }

    pub fn with_interface_integral(mut self, part: usize, kernel: impl QuadratureKernel<T> + 'a) -> Self {
        self.parts[part].interface_integral = Some(Box::new(kernel));
        self
    }

    pub fn with_overlap_integral(mut self, part: usize, kernel: impl QuadratureKernel<T> + 'a) -> Self {
        self.parts[part].overlap_integral = Some(Box::new(kernel));
        self
    }

    pub fn multimesh(&self) -> &'a MultiMesh<'a, T> {
        self.multimesh
    }

    pub fn rank(&self) -> usize {
        self.arguments.len()
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn arguments(&self) -> &[&'a MultiMeshDofMap] {
        &self.arguments
    }

    /// The ordinary form of a part, holding its cell integral and coefficients.
    pub fn part(&self, part: usize) -> &Form<'a, T> {
        &self.parts[part].form
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiMeshAssemblerOptions {
    /// Integrate cut cells only over the quadrature points with positive weight.
    pub extend_cut_cell_integration: bool,
}

/// Assembles multimesh forms.
///
/// Rows of a matrix that receive no contribution at all, such as the dofs of covered cells,
/// are set to identity rows after assembly.
#[derive(Debug)]
pub struct MultiMeshAssembler<T: Real> {
    options: AssemblerOptions,
    multimesh_options: MultiMeshAssemblerOptions,
    workspace: RefCell<AssemblerWorkspace<T>>,
}

impl<T: Real> Default for MultiMeshAssembler<T> {
    fn default() -> Self {
        Self::new(AssemblerOptions::default(), MultiMeshAssemblerOptions::default())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Coupling {
    Interface,
    Overlap,
}

impl<T: Real> MultiMeshAssembler<T> {
    pub fn new(options: AssemblerOptions, multimesh_options: MultiMeshAssemblerOptions) -> Self {
        Self {
            options,
            multimesh_options,
            workspace: RefCell::new(AssemblerWorkspace::default()),
        }
    }

    pub fn multimesh_options(&self) -> &MultiMeshAssemblerOptions {
        &self.multimesh_options
    }

    /// Assembles a multimesh form of rank 0 or 1.
    pub fn assemble<A>(&self, tensor: &mut A, form: &MultiMeshForm<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        if form.rank() == 2 {
            return Err(form_mismatch(
                "bilinear multimesh forms must be assembled into a matrix with `assemble_matrix`",
            ));
        }
        self.assemble_parts(tensor, form)
    }

    /// Assembles a bilinear multimesh form and sets the rows of inactive dofs to identity rows.
    ///
    /// Returns the rows that were set.
    pub fn assemble_matrix<A>(&self, matrix: &mut A, form: &MultiMeshForm<T>) -> Result<Vec<usize>, AssemblyError>
    where
        A: ?Sized + GlobalMatrix<T>,
    {
        if form.rank() != 2 {
            return Err(form_mismatch(format!(
                "expected a bilinear multimesh form, got a rank {} form",
                form.rank()
            )));
        }
        self.assemble_parts(matrix, form)?;
        let inactive = matrix.ident_zeros()?;
        if !inactive.is_empty() {
            info!("Locked {} inactive multimesh dofs", inactive.len());
        }
        Ok(inactive)
    }

    fn assemble_parts<A>(&self, tensor: &mut A, form: &MultiMeshForm<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        for part in &form.parts {
            check(&part.form)?;
        }
        self.init_global_tensor(tensor, form)?;

        self.assemble_uncut_cells(tensor, form)?;
        self.assemble_cut_cells(tensor, form)?;
        self.assemble_coupling(tensor, form, Coupling::Interface)?;
        self.assemble_coupling(tensor, form, Coupling::Overlap)?;

        if self.options.finalize_tensor {
            tensor.apply(ApplyMode::Add);
        }
        Ok(())
    }

    fn init_global_tensor<A>(&self, tensor: &mut A, form: &MultiMeshForm<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        let rank = form.rank();
        if tensor.rank() != rank {
            return Err(form_mismatch(format!(
                "cannot assemble a rank {rank} form into a rank {} tensor",
                tensor.rank()
            )));
        }
        if !tensor.is_initialized() {
            info!("Initializing multimesh tensor");
            let sparsity = if rank == 2 && tensor.requires_sparsity_pattern() {
                SparsityPatternBuilder::build_for_multimesh(form).map(|sparsity| sparsity.pattern)
            } else {
                None
            };
            let layout = TensorLayout {
                global_dimensions: form.arguments().iter().map(|d| d.global_dimension()).collect(),
                local_ranges: form.arguments().iter().map(|d| 0..d.global_dimension()).collect(),
                sparsity,
            };
            tensor.init(&layout)?;
        } else {
            for (dim, dofmap) in form.arguments().iter().enumerate() {
                if tensor.size(dim) != dofmap.global_dimension() {
                    return Err(form_mismatch(format!(
                        "tensor has size {} along dimension {dim}, but the form needs {}",
                        tensor.size(dim),
                        dofmap.global_dimension()
                    )));
                }
            }
        }
        if !self.options.add_values {
            tensor.zero();
        }
        Ok(())
    }

    fn assemble_uncut_cells<A>(&self, tensor: &mut A, form: &MultiMeshForm<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        let rank = form.rank();
        let ws = &mut *self.workspace.borrow_mut();

        for (p, part) in form.parts.iter().enumerate() {
            let Some(kernel) = part.form.cell_integrals().select(None) else {
                continue;
            };
            info!("Assembling multimesh form over uncut cells on part {p}");
            let mesh = part.form.mesh();
            for cell in form.multimesh.part(p).uncut_cells() {
                let Some(dofs) = cell_dof_lists(part.form.arguments(), cell) else {
                    trace!("Empty dof list on cell {cell} of part {p}, skipping.");
                    continue;
                };
                let dofs = &dofs[..rank];

                mesh.cell_coordinates_into(cell, &mut ws.coordinates[0]);
                let geometry = cell_geometry(mesh, cell, &ws.coordinates[0]);
                part.form.restrict_coefficients(&mut ws.coefficients, &geometry);

                reset_local_tensor(&mut ws.local_tensor, dofs);
                kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, &geometry)?;
                tensor.add(&ws.local_tensor, dofs)?;
            }
        }
        Ok(())
    }

    fn assemble_cut_cells<A>(&self, tensor: &mut A, form: &MultiMeshForm<T>) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        let rank = form.rank();
        let ws = &mut *self.workspace.borrow_mut();

        for (p, part) in form.parts.iter().enumerate() {
            let Some(kernel) = part.cut_cell_integral.as_deref() else {
                continue;
            };
            info!("Assembling multimesh form over cut cells on part {p}");
            let mesh_part = form.multimesh.part(p);
            let mesh = mesh_part.mesh();
            for cell in mesh_part.cut_cells() {
                let rule = match mesh_part.cut_cell_rule(cell) {
                    Some(rule) if !rule.is_empty() => rule,
                    _ => {
                        trace!("No quadrature points on cut cell {cell} of part {p}, skipping.");
                        continue;
                    }
                };
                let Some(dofs) = cell_dof_lists(part.form.arguments(), cell) else {
                    trace!("Empty dof list on cell {cell} of part {p}, skipping.");
                    continue;
                };
                let dofs = &dofs[..rank];

                let positive_rule;
                let rule = if self.multimesh_options.extend_cut_cell_integration {
                    positive_rule = rule.positive_part();
                    &positive_rule
                } else {
                    rule
                };

                mesh.cell_coordinates_into(cell, &mut ws.coordinates[0]);
                let geometry = cell_geometry(mesh, cell, &ws.coordinates[0]);
                part.form.restrict_coefficients(&mut ws.coefficients, &geometry);

                reset_local_tensor(&mut ws.local_tensor, dofs);
                kernel.tabulate_tensor(&mut ws.local_tensor, &ws.coefficients, &[geometry], rule, None)?;
                tensor.add(&ws.local_tensor, dofs)?;
            }
        }
        Ok(())
    }

    /// Assembles the interface or overlap integrals between cut cells and their cutting cells.
    fn assemble_coupling<A>(&self, tensor: &mut A, form: &MultiMeshForm<T>, coupling: Coupling) -> Result<(), AssemblyError>
    where
        A: ?Sized + GlobalTensor<T>,
    {
        let rank = form.rank();
        let AssemblerWorkspace {
            local_tensor,
            coefficients,
            coordinates: [coordinates0, coordinates1],
            macro_dofs,
        } = &mut *self.workspace.borrow_mut();

        for (p, part) in form.parts.iter().enumerate() {
            let kernel = match coupling {
                Coupling::Interface => part.interface_integral.as_deref(),
                Coupling::Overlap => part.overlap_integral.as_deref(),
            };
            let Some(kernel) = kernel else {
                continue;
            };
            match coupling {
                Coupling::Interface => info!("Assembling multimesh form over interface on part {p}"),
                Coupling::Overlap => info!("Assembling multimesh form over overlap on part {p}"),
            }

            let mesh_part = form.multimesh.part(p);
            let mesh0 = mesh_part.mesh();
            for (cut_cell, cutting_cells) in mesh_part.collisions() {
                for cutting in cutting_cells {
                    let (rule, normals) = match coupling {
                        Coupling::Interface => (&cutting.interface, Some(cutting.normals.as_slice())),
                        Coupling::Overlap => (&cutting.overlap, None),
                    };
                    if rule.is_empty() {
                        continue;
                    }
                    let other = &form.parts[cutting.part].form;
                    let mesh1 = other.mesh();

                    let mut empty = false;
                    for (macro_list, dofmap) in macro_dofs.iter_mut().zip(form.arguments()) {
                        let dofs0 = dofmap.part(p).cell_dofs(cut_cell);
                        let dofs1 = dofmap.part(cutting.part).cell_dofs(cutting.cell);
                        empty |= dofs0.is_empty() || dofs1.is_empty();
                        macro_list.clear();
                        macro_list.extend_from_slice(dofs0);
                        macro_list.extend_from_slice(dofs1);
                    }
                    if empty {
                        trace!(
                            "Empty dof list on cell {cut_cell} of part {p} or cell {} of part {}, skipping.",
                            cutting.cell,
                            cutting.part
                        );
                        continue;
                    }
                    let dofs: [&[usize]; 2] = [&macro_dofs[0], &macro_dofs[1]];
                    let dofs = &dofs[..rank];

                    mesh0.cell_coordinates_into(cut_cell, coordinates0);
                    mesh1.cell_coordinates_into(cutting.cell, coordinates1);
                    let geometries = [
                        cell_geometry(mesh0, cut_cell, coordinates0),
                        cell_geometry(mesh1, cutting.cell, coordinates1),
                    ];
                    restrict_coefficients_pair(coefficients, [&part.form, other], &geometries);

                    reset_local_tensor(local_tensor, dofs);
                    kernel.tabulate_tensor(local_tensor, coefficients, &geometries, rule, normals)?;
                    tensor.add(local_tensor, dofs)?;
                }
            }
        }
        Ok(())
    }
}

/// Restricts the coefficients of two forms to a cell of each, pairing them slot by slot.
fn restrict_coefficients_pair<T: Real>(w: &mut CoefficientValues<T>, forms: [&Form<T>; 2], cells: &[CellGeometry<T>; 2]) {
    w.clear();
    let coefficients0 = forms[0].coefficients().iter().flatten();
    let coefficients1 = forms[1].coefficients().iter().flatten();
    for (c0, c1) in coefficients0.zip(coefficients1) {
        w.push_with(|values| {
            c0.restrict_into(values, &cells[0]);
            c1.restrict_into(values, &cells[1]);
        });
    }
}
