//! Variational forms: arguments, coefficients and local tensor kernels.
//!
//! A [`Form`] of rank `r` has `r` arguments (the dof maps of its test and trial spaces), a
//! number of coefficient slots and integrals of three kinds. Each integral is a local tensor
//! kernel that fills a dense row-major buffer with extents given by the local dimensions of
//! the arguments on the entity (twice those for interior facets).
use crate::dofmap::DofMap;
use crate::mesh::{CellType, Mesh};
use crate::Real;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntegralKind {
    Cell,
    ExteriorFacet,
    InteriorFacet,
}

impl IntegralKind {
    /// All kinds, in the order in which assemblers visit them.
    pub const ALL: [IntegralKind; 3] = [IntegralKind::Cell, IntegralKind::ExteriorFacet, IntegralKind::InteriorFacet];
}

impl fmt::Display for IntegralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegralKind::Cell => write!(f, "cells"),
            IntegralKind::ExteriorFacet => write!(f, "exterior facets"),
            IntegralKind::InteriorFacet => write!(f, "interior facets"),
        }
    }
}

/// The geometry of a single cell as seen by a kernel.
#[derive(Debug, Clone, Copy)]
pub struct CellGeometry<'a, T> {
    pub index: usize,
    pub cell_type: CellType,
    pub geometric_dim: usize,
    /// Vertex coordinates, `geometric_dim` entries per vertex in cell vertex order.
    pub coordinates: &'a [T],
}

impl<'a, T> CellGeometry<'a, T> {
    pub fn num_vertices(&self) -> usize {
        self.coordinates.len() / self.geometric_dim
    }

    pub fn vertex(&self, local_vertex: usize) -> &'a [T] {
        let d = self.geometric_dim;
        &self.coordinates[d * local_vertex..d * (local_vertex + 1)]
    }
}

/// Coefficient values restricted to an entity, one contiguous block per coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientValues<T> {
    data: Vec<T>,
    offsets: Vec<usize>,
}

impl<T> Default for CoefficientValues<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            offsets: vec![0],
        }
    }
}

impl<T> CoefficientValues<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The values of coefficient `i`.
    ///
    /// # Panics
    ///
    /// Panics if there is no coefficient `i`.
    pub fn get(&self, i: usize) -> &[T] {
        &self.data[self.offsets[i]..self.offsets[i + 1]]
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.offsets.truncate(1);
    }

    /// Appends the values of one coefficient, written by `f` to the end of the given buffer.
    pub fn push_with(&mut self, f: impl FnOnce(&mut Vec<T>)) {
        f(&mut self.data);
        self.offsets.push(self.data.len());
    }
}

/// A function that can be restricted to the cells of a mesh.
pub trait Coefficient<T> {
    fn value_shape(&self) -> &[usize];

    /// Appends the local values of the coefficient on `cell` to `output`.
    fn restrict_into(&self, output: &mut Vec<T>, cell: &CellGeometry<T>);
}

/// A finite element function given by its dof values.
#[derive(Debug, Clone)]
pub struct DiscreteFunction<T: Real> {
    dofmap: Arc<DofMap>,
    values: DVector<T>,
}

impl<T: Real> DiscreteFunction<T> {
    /// # Panics
    ///
    /// Panics if the number of values does not equal the global dimension of the dof map.
    pub fn new(dofmap: Arc<DofMap>, values: DVector<T>) -> Self {
        assert_eq!(
            values.len(),
            dofmap.global_dimension(),
            "Need one value per dof."
        );
        Self { dofmap, values }
    }

    pub fn zeros(dofmap: Arc<DofMap>) -> Self {
        let values = DVector::zeros(dofmap.global_dimension());
        Self { dofmap, values }
    }

    pub fn dofmap(&self) -> &DofMap {
        &self.dofmap
    }

    pub fn values(&self) -> &DVector<T> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut DVector<T> {
        &mut self.values
    }
}

impl<T: Real> Coefficient<T> for DiscreteFunction<T> {
    fn value_shape(&self) -> &[usize] {
        self.dofmap.layout().value_shape()
    }

    fn restrict_into(&self, output: &mut Vec<T>, cell: &CellGeometry<T>) {
        output.extend(
            self.dofmap
                .cell_dofs(cell.index)
                .iter()
                .map(|&dof| self.values[dof]),
        );
    }
}

/// A coefficient with the same values on every cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant<T> {
    values: Vec<T>,
    value_shape: Vec<usize>,
}

impl<T: Real> Constant<T> {
    pub fn scalar(value: T) -> Self {
        Self {
            values: vec![value],
            value_shape: Vec::new(),
        }
    }

    pub fn vector(values: Vec<T>) -> Self {
        let value_shape = vec![values.len()];
        Self { values, value_shape }
    }
}

impl<T: Real> Coefficient<T> for Constant<T> {
    fn value_shape(&self) -> &[usize] {
        &self.value_shape
    }

    fn restrict_into(&self, output: &mut Vec<T>, _cell: &CellGeometry<T>) {
        output.extend_from_slice(&self.values);
    }
}

/// What a form expects in one of its coefficient slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoefficientSpec {
    pub name: String,
    pub value_shape: Vec<usize>,
}

impl CoefficientSpec {
    pub fn new(name: impl Into<String>, value_shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            value_shape,
        }
    }
}

pub trait CellKernel<T> {
    fn tabulate_tensor(&self, output: &mut [T], w: &CoefficientValues<T>, cell: &CellGeometry<T>) -> eyre::Result<()>;
}

pub trait ExteriorFacetKernel<T> {
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        w: &CoefficientValues<T>,
        cell: &CellGeometry<T>,
        local_facet: usize,
    ) -> eyre::Result<()>;
}

/// A kernel over the macro element formed by the two cells sharing an interior facet.
///
/// Coefficient values hold the values on the first cell followed by those on the second.
pub trait InteriorFacetKernel<T> {
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        w: &CoefficientValues<T>,
        cells: [&CellGeometry<T>; 2],
        local_facets: [usize; 2],
    ) -> eyre::Result<()>;
}

/// Points and weights of a quadrature rule in physical coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadratureRule<T> {
    dim: usize,
    points: Vec<T>,
    weights: Vec<T>,
}

impl<T: Real> QuadratureRule<T> {
    /// A rule with `weights.len()` points of dimension `dim`, stored contiguously in `points`.
    ///
    /// # Panics
    ///
    /// Panics if `points` does not hold `dim` coordinates per weight.
    pub fn new(dim: usize, points: Vec<T>, weights: Vec<T>) -> Self {
        assert_eq!(points.len(), dim * weights.len(), "Need dim coordinates per quadrature point.");
        Self { dim, points, weights }
    }

    pub fn empty(dim: usize) -> Self {
        Self::new(dim, Vec::new(), Vec::new())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn point(&self, i: usize) -> &[T] {
        &self.points[self.dim * i..self.dim * (i + 1)]
    }

    pub fn points(&self) -> &[T] {
        &self.points
    }

    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    /// The rule restricted to the points with positive weight.
    pub fn positive_part(&self) -> Self {
        let mut points = Vec::new();
        let mut weights = Vec::new();
        for (i, &w) in self.weights.iter().enumerate() {
            if w > T::zero() {
                points.extend_from_slice(self.point(i));
                weights.push(w);
            }
        }
        Self::new(self.dim, points, weights)
    }
}

/// A kernel evaluated with a given quadrature rule over one cell, or over a pair of cells
/// taken from different meshes.
///
/// For a pair of cells the coefficient values hold the values on the first cell followed by
/// those on the second. Interface kernels also receive one unit normal per quadrature point.
pub trait QuadratureKernel<T> {
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        w: &CoefficientValues<T>,
        cells: &[CellGeometry<T>],
        rule: &QuadratureRule<T>,
        normals: Option<&[T]>,
    ) -> eyre::Result<()>;
}

pub struct FnKernel<F>(F);

impl<F> fmt::Debug for FnKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnKernel")
    }
}

/// Wraps a closure as a [`CellKernel`].
pub fn cell_kernel<T, F>(f: F) -> FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, &CellGeometry<T>) -> eyre::Result<()>,
{
    FnKernel(f)
}

/// Wraps a closure as an [`ExteriorFacetKernel`].
pub fn exterior_facet_kernel<T, F>(f: F) -> FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, &CellGeometry<T>, usize) -> eyre::Result<()>,
{
    FnKernel(f)
}

/// Wraps a closure as an [`InteriorFacetKernel`].
pub fn interior_facet_kernel<T, F>(f: F) -> FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, [&CellGeometry<T>; 2], [usize; 2]) -> eyre::Result<()>,
{
    FnKernel(f)
}

/// Wraps a closure as a [`QuadratureKernel`].
pub fn quadrature_kernel<T, F>(f: F) -> FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, &[CellGeometry<T>], &QuadratureRule<T>, Option<&[T]>) -> eyre::Result<()>,
{
    FnKernel(f)
}

impl<T, F> CellKernel<T> for FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, &CellGeometry<T>) -> eyre::Result<()>,
{
    fn tabulate_tensor(&self, output: &mut [T], w: &CoefficientValues<T>, cell: &CellGeometry<T>) -> eyre::Result<()> {
        (self.0)(output, w, cell)
    }
}

impl<T, F> ExteriorFacetKernel<T> for FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, &CellGeometry<T>, usize) -> eyre::Result<()>,
{
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        w: &CoefficientValues<T>,
        cell: &CellGeometry<T>,
        local_facet: usize,
    ) -> eyre::Result<()> {
        (self.0)(output, w, cell, local_facet)
    }
}

impl<T, F> InteriorFacetKernel<T> for FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, [&CellGeometry<T>; 2], [usize; 2]) -> eyre::Result<()>,
{
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        w: &CoefficientValues<T>,
        cells: [&CellGeometry<T>; 2],
        local_facets: [usize; 2],
    ) -> eyre::Result<()> {
        (self.0)(output, w, cells, local_facets)
    }
}

impl<T, F> QuadratureKernel<T> for FnKernel<F>
where
    F: Fn(&mut [T], &CoefficientValues<T>, &[CellGeometry<T>], &QuadratureRule<T>, Option<&[T]>) -> eyre::Result<()>,
{
    fn tabulate_tensor(
        &self,
        output: &mut [T],
        w: &CoefficientValues<T>,
        cells: &[CellGeometry<T>],
        rule: &QuadratureRule<T>,
        normals: Option<&[T]>,
    ) -> eyre::Result<()> {
        (self.0)(output, w, cells, rule, normals)
    }
}

/// The integrals of one kind: a default integral and integrals over marked subdomains.
pub struct IntegralSet<K: ?Sized> {
    default: Option<Box<K>>,
    by_domain: BTreeMap<usize, Box<K>>,
}

impl<K: ?Sized> Default for IntegralSet<K> {
    fn default() -> Self {
        Self {
            default: None,
            by_domain: BTreeMap::new(),
        }
    }
}

impl<K: ?Sized> IntegralSet<K> {
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_domain.is_empty()
    }

    pub fn insert(&mut self, domain: Option<usize>, kernel: Box<K>) {
        match domain {
            Some(domain) => {
                self.by_domain.insert(domain, kernel);
            }
            None => self.default = Some(kernel),
        }
    }

    /// The integral over the subdomain with the given marker, or the default integral if
    /// there is no marker or no integral over that subdomain.
    pub fn select(&self, marker: Option<usize>) -> Option<&K> {
        marker
            .and_then(|marker| self.by_domain.get(&marker))
            .or(self.default.as_ref())
            .map(|kernel| &**kernel)
    }
}

/// A rank 0, 1 or 2 form over a mesh.
pub struct Form<'a, T> {
    mesh: &'a Mesh<T>,
    arguments: Vec<&'a DofMap>,
    cell_type: CellType,
    coefficient_specs: Vec<CoefficientSpec>,
    coefficients: Vec<Option<&'a dyn Coefficient<T>>>,
    cell_integrals: IntegralSet<dyn CellKernel<T> + 'a>,
    exterior_facet_integrals: IntegralSet<dyn ExteriorFacetKernel<T> + 'a>,
    interior_facet_integrals: IntegralSet<dyn InteriorFacetKernel<T> + 'a>,
    cell_domains: Option<&'a [usize]>,
    exterior_facet_domains: Option<&'a [usize]>,
    interior_facet_domains: Option<&'a [usize]>,
}

impl<'a, T: Real> Form<'a, T> {
    /// A form whose arguments are given test (and trial) dof maps.
    ///
    /// The expected cell type is the cell type of the mesh; see
    /// [`with_cell_type`](Self::with_cell_type).
    ///
    /// # Panics
    ///
    /// Panics if more than two arguments are given.
    pub fn new(mesh: &'a Mesh<T>, arguments: Vec<&'a DofMap>) -> Self {
        assert!(arguments.len() <= 2, "Forms have at most two arguments.");
        Self {
            mesh,
            arguments,
            cell_type: mesh.cell_type(),
            coefficient_specs: Vec::new(),
            coefficients: Vec::new(),
            cell_integrals: IntegralSet::default(),
            exterior_facet_integrals: IntegralSet::default(),
            interior_facet_integrals: IntegralSet::default(),
            cell_domains: None,
            exterior_facet_domains: None,
            interior_facet_domains: None,
        }
    }

    pub fn with_cell_type(self, cell_type: CellType) -> Self {
        Self { cell_type, ..self }
    }

    /// Declares the coefficient slots of the form. All slots start out unset.
    pub fn with_coefficient_specs(self, coefficient_specs: Vec<CoefficientSpec>) -> Self {
        let coefficients = vec![None; coefficient_specs.len()];
        Self {
            coefficient_specs,
            coefficients,
            ..self
        }
    }

    /// Sets the coefficient in slot `index`, declaring further (unnamed, unset) slots if needed.
    pub fn with_coefficient(mut self, index: usize, coefficient: &'a dyn Coefficient<T>) -> Self {
        if index >= self.coefficients.len() {
            self.coefficients.resize(index + 1, None);
        }
        self.coefficients[index] = Some(coefficient);
        self
    }

    pub fn with_cell_integral(mut self, domain: Option<usize>, kernel: impl CellKernel<T> + 'a) -> Self {
        self.cell_integrals.insert(domain, Box::new(kernel));
        self
    }

    pub fn with_exterior_facet_integral(mut self, domain: Option<usize>, kernel: impl ExteriorFacetKernel<T> + 'a) -> Self {
        self.exterior_facet_integrals
            .insert(domain, Box::new(kernel));
        self
    }

    pub fn with_interior_facet_integral(mut self, domain: Option<usize>, kernel: impl InteriorFacetKernel<T> + 'a) -> Self {
        self.interior_facet_integrals
            .insert(domain, Box::new(kernel));
        self
    }

    /// Subdomain markers, one per cell.
    pub fn with_cell_domains(self, markers: &'a [usize]) -> Self {
        Self {
            cell_domains: Some(markers),
            ..self
        }
    }

    /// Subdomain markers for exterior facet integrals, one per facet.
    pub fn with_exterior_facet_domains(self, markers: &'a [usize]) -> Self {
        Self {
            exterior_facet_domains: Some(markers),
            ..self
        }
    }

    /// Subdomain markers for interior facet integrals, one per facet.
    pub fn with_interior_facet_domains(self, markers: &'a [usize]) -> Self {
        Self {
            interior_facet_domains: Some(markers),
            ..self
        }
    }

    pub fn mesh(&self) -> &'a Mesh<T> {
        self.mesh
    }

    pub fn rank(&self) -> usize {
        self.arguments.len()
    }

    pub fn arguments(&self) -> &[&'a DofMap] {
        &self.arguments
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn coefficient_specs(&self) -> &[CoefficientSpec] {
        &self.coefficient_specs
    }

    pub fn coefficients(&self) -> &[Option<&'a dyn Coefficient<T>>] {
        &self.coefficients
    }

    pub fn has_integrals(&self, kind: IntegralKind) -> bool {
        match kind {
            IntegralKind::Cell => !self.cell_integrals.is_empty(),
            IntegralKind::ExteriorFacet => !self.exterior_facet_integrals.is_empty(),
            IntegralKind::InteriorFacet => !self.interior_facet_integrals.is_empty(),
        }
    }

    pub fn cell_integrals(&self) -> &IntegralSet<dyn CellKernel<T> + 'a> {
        &self.cell_integrals
    }

    pub fn exterior_facet_integrals(&self) -> &IntegralSet<dyn ExteriorFacetKernel<T> + 'a> {
        &self.exterior_facet_integrals
    }

    pub fn interior_facet_integrals(&self) -> &IntegralSet<dyn InteriorFacetKernel<T> + 'a> {
        &self.interior_facet_integrals
    }

    /// The subdomain marker of an entity of the given integral kind, if markers are attached.
    pub fn domain_marker(&self, kind: IntegralKind, entity: usize) -> Option<usize> {
        let markers = match kind {
            IntegralKind::Cell => self.cell_domains,
            IntegralKind::ExteriorFacet => self.exterior_facet_domains,
            IntegralKind::InteriorFacet => self.interior_facet_domains,
        };
        markers.and_then(|markers| markers.get(entity).copied())
    }

    /// Restricts all coefficients to `cell`, replacing the contents of `w`.
    ///
    /// Unset coefficients are skipped; [`check`](crate::assembly::check) rejects them before
    /// assembly.
    pub fn restrict_coefficients(&self, w: &mut CoefficientValues<T>, cell: &CellGeometry<T>) {
        w.clear();
        for coefficient in self.coefficients.iter().flatten() {
            w.push_with(|values| coefficient.restrict_into(values, cell));
        }
    }

    /// Restricts all coefficients to the macro element of two cells.
    pub fn restrict_coefficients_macro(&self, w: &mut CoefficientValues<T>, cells: [&CellGeometry<T>; 2]) {
        w.clear();
        for coefficient in self.coefficients.iter().flatten() {
            w.push_with(|values| {
                coefficient.restrict_into(values, cells[0]);
                coefficient.restrict_into(values, cells[1]);
            });
        }
    }
}
