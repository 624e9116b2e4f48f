//! Simplicial meshes with full entity numbering.
//!
//! Local entity numbering follows the UFC reference cells: facet `i` of a triangle or
//! tetrahedron is the facet opposite to vertex `i`, and edges of a tetrahedron are
//! `(2,3), (1,3), (1,2), (0,3), (0,2), (0,1)`. Local tensor layouts computed by kernels
//! are only consistent between neighboring cells if every cell lists its vertices in
//! ascending global order, see [`Mesh::ordered`].
use crate::connectivity::Connectivity;
use log::warn;
use nalgebra::Scalar;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

pub mod distribute;
pub mod procedural;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    Interval,
    Triangle,
    Tetrahedron,
}

const INTERVAL_ENTITIES: &[&[&[usize]]] = &[&[&[0], &[1]], &[&[0, 1]]];

const TRIANGLE_ENTITIES: &[&[&[usize]]] = &[
    &[&[0], &[1], &[2]],
    &[&[1, 2], &[0, 2], &[0, 1]],
    &[&[0, 1, 2]],
];

const TETRAHEDRON_ENTITIES: &[&[&[usize]]] = &[
    &[&[0], &[1], &[2], &[3]],
    &[&[2, 3], &[1, 3], &[1, 2], &[0, 3], &[0, 2], &[0, 1]],
    &[&[1, 2, 3], &[0, 2, 3], &[0, 1, 3], &[0, 1, 2]],
    &[&[0, 1, 2, 3]],
];

impl CellType {
    /// The topological dimension of the cell.
    pub fn dim(&self) -> usize {
        match self {
            CellType::Interval => 1,
            CellType::Triangle => 2,
            CellType::Tetrahedron => 3,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.dim() + 1
    }

    pub fn num_facets(&self) -> usize {
        self.num_entities(self.dim() - 1)
    }

    /// The number of entities of dimension `dim` in a single cell.
    pub fn num_entities(&self, dim: usize) -> usize {
        self.reference_entities(dim).len()
    }

    /// The local vertices of each entity of dimension `dim` on the reference cell.
    ///
    /// # Panics
    ///
    /// Panics if `dim` exceeds the cell dimension.
    pub fn reference_entities(&self, dim: usize) -> &'static [&'static [usize]] {
        let table = match self {
            CellType::Interval => INTERVAL_ENTITIES,
            CellType::Triangle => TRIANGLE_ENTITIES,
            CellType::Tetrahedron => TETRAHEDRON_ENTITIES,
        };
        table[dim]
    }

    /// Local indices `(dim, entity)` of all entities of dimension less than the cell dimension
    /// that lie in the closure of local facet `facet`, ordered by dimension.
    pub fn facet_closure(&self, facet: usize) -> Vec<(usize, usize)> {
        let tdim = self.dim();
        let facet_vertices = self.reference_entities(tdim - 1)[facet];
        let mut closure = Vec::new();
        for dim in 0..tdim {
            for (entity, vertices) in self.reference_entities(dim).iter().enumerate() {
                if vertices.iter().all(|v| facet_vertices.contains(v)) {
                    closure.push((dim, entity));
                }
            }
        }
        closure
    }
}

/// Entity numbering and incidence of a mesh, derived from its cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Topology {
    /// `entities[d]`: the (sorted) vertices of every entity of dimension `d`.
    entities: Vec<Connectivity>,
    /// `cell_entities[d]`: the entities of dimension `d` of every cell, in reference order.
    cell_entities: Vec<Connectivity>,
    /// The cells incident to each facet.
    facet_cells: Connectivity,
}

impl Topology {
    fn compute(cell_type: CellType, num_vertices: usize, cells: &Connectivity) -> Self {
        let tdim = cell_type.dim();
        let mut entities = Vec::with_capacity(tdim + 1);
        let mut cell_entities = Vec::with_capacity(tdim + 1);

        entities.push(Connectivity::from_uniform(1, (0..num_vertices).collect()));
        cell_entities.push(cells.clone());

        for dim in 1..tdim {
            let mut numbering = FxHashMap::default();
            let mut dim_entities = Connectivity::new();
            let mut dim_cell_entities = Connectivity::new();
            let mut key = Vec::new();
            for cell_vertices in cells.iter() {
                dim_cell_entities.push_with(|indices| {
                    for local_vertices in cell_type.reference_entities(dim) {
                        key.clear();
                        key.extend(local_vertices.iter().map(|&v| cell_vertices[v]));
                        key.sort_unstable();
                        let next_index = numbering.len();
                        let index = *numbering.entry(key.clone()).or_insert_with(|| {
                            dim_entities.push(&key);
                            next_index
                        });
                        indices.push(index);
                    }
                });
            }
            entities.push(dim_entities);
            cell_entities.push(dim_cell_entities);
        }

        let mut sorted_cells = Connectivity::new();
        for vertices in cells.iter() {
            sorted_cells.push_with(|indices| {
                indices.extend_from_slice(vertices);
                let begin = indices.len() - vertices.len();
                indices[begin..].sort_unstable();
            });
        }
        entities.push(sorted_cells);
        cell_entities.push(Connectivity::from_uniform(1, (0..cells.len()).collect()));

        let facet_dim = tdim - 1;
        let num_facets = entities[facet_dim].len();
        let mut incident = vec![Vec::with_capacity(2); num_facets];
        for (cell, facets) in cell_entities[facet_dim].iter().enumerate() {
            for &facet in facets {
                incident[facet].push(cell);
            }
        }
        let facet_cells = Connectivity::from(incident);

        Self {
            entities,
            cell_entities,
            facet_cells,
        }
    }
}

/// Named integer arrays attached to a mesh, e.g. boundary indicators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshData {
    arrays: BTreeMap<String, Vec<usize>>,
}

impl MeshData {
    pub fn array(&self, name: &str) -> Option<&[usize]> {
        self.arrays.get(name).map(Vec::as_slice)
    }

    pub fn insert_array(&mut self, name: impl Into<String>, values: Vec<usize>) {
        self.arrays.insert(name.into(), values);
    }

    pub fn remove_array(&mut self, name: &str) -> Option<Vec<usize>> {
        self.arrays.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

/// Information about how a local mesh relates to a mesh distributed over several processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelData {
    rank: usize,
    num_processes: usize,
    global_vertex_indices: Vec<usize>,
    /// Facets (as sorted global vertex indices) whose other incident cell lives on another process.
    shared_facets: BTreeSet<Vec<usize>>,
}

impl ParallelData {
    pub fn new(
        rank: usize,
        num_processes: usize,
        global_vertex_indices: Vec<usize>,
        shared_facets: BTreeSet<Vec<usize>>,
    ) -> Self {
        assert!(rank < num_processes, "Rank must be smaller than the number of processes.");
        Self {
            rank,
            num_processes,
            global_vertex_indices,
            shared_facets,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_processes(&self) -> usize {
        self.num_processes
    }

    pub fn global_vertex_indices(&self) -> &[usize] {
        &self.global_vertex_indices
    }

    pub fn shared_facets(&self) -> &BTreeSet<Vec<usize>> {
        &self.shared_facets
    }
}

/// A mesh of simplices of a single cell type.
///
/// Vertex coordinates are stored contiguously, `geometric_dim` values per vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh<T> {
    cell_type: CellType,
    geometric_dim: usize,
    coordinates: Vec<T>,
    cells: Connectivity,
    topology: Topology,
    data: MeshData,
    parallel: Option<ParallelData>,
}

impl<T: Scalar> Mesh<T> {
    /// Creates a mesh from vertex coordinates and cell vertex lists.
    ///
    /// # Panics
    ///
    /// Panics if the number of coordinates is not a multiple of `geometric_dim`, if a cell does
    /// not have the number of vertices of `cell_type` or if a cell references a non-existent vertex.
    pub fn from_vertices_and_cells(
        cell_type: CellType,
        geometric_dim: usize,
        coordinates: Vec<T>,
        cells: Vec<Vec<usize>>,
    ) -> Self {
        assert!(geometric_dim >= cell_type.dim(), "Geometric dimension must be at least the cell dimension.");
        assert_eq!(coordinates.len() % geometric_dim, 0, "Coordinates must have geometric_dim entries per vertex.");
        let num_vertices = coordinates.len() / geometric_dim;
        for cell in &cells {
            assert_eq!(cell.len(), cell_type.num_vertices(), "Cell has wrong number of vertices.");
            assert!(cell.iter().all(|&v| v < num_vertices), "Cell references non-existent vertex.");
        }
        let cells = Connectivity::from(cells);
        let topology = Topology::compute(cell_type, num_vertices, &cells);
        Self {
            cell_type,
            geometric_dim,
            coordinates,
            cells,
            topology,
            data: MeshData::default(),
            parallel: None,
        }
    }

    /// Marks this mesh as the local part of a distributed mesh.
    ///
    /// # Panics
    ///
    /// Panics if the number of global vertex indices does not match the number of vertices.
    pub fn with_parallel_data(mut self, parallel: ParallelData) -> Self {
        assert_eq!(
            parallel.global_vertex_indices.len(),
            self.num_vertices(),
            "Need exactly one global index per vertex."
        );
        self.parallel = Some(parallel);
        self
    }

    pub fn with_data(mut self, data: MeshData) -> Self {
        self.data = data;
        self
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// The topological dimension.
    pub fn tdim(&self) -> usize {
        self.cell_type.dim()
    }

    pub fn gdim(&self) -> usize {
        self.geometric_dim
    }

    pub fn num_vertices(&self) -> usize {
        self.coordinates.len() / self.geometric_dim
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_facets(&self) -> usize {
        self.num_entities(self.tdim() - 1)
    }

    pub fn num_entities(&self, dim: usize) -> usize {
        self.topology.entities[dim].len()
    }

    pub fn cell_vertices(&self, cell: usize) -> &[usize] {
        self.cells.list(cell)
    }

    /// The entities of dimension `dim` of the given cell, in reference-cell order.
    pub fn cell_entities(&self, dim: usize, cell: usize) -> &[usize] {
        self.topology.cell_entities[dim].list(cell)
    }

    pub fn cell_facets(&self, cell: usize) -> &[usize] {
        self.cell_entities(self.tdim() - 1, cell)
    }

    /// The vertices of the given entity, sorted by local vertex index.
    pub fn entity_vertices(&self, dim: usize, entity: usize) -> &[usize] {
        self.topology.entities[dim].list(entity)
    }

    /// The local cells incident to the given facet.
    pub fn facet_cells(&self, facet: usize) -> &[usize] {
        self.topology.facet_cells.list(facet)
    }

    /// The position of `facet` among the facets of `cell`.
    pub fn local_facet_index(&self, cell: usize, facet: usize) -> Option<usize> {
        self.cell_facets(cell).iter().position(|&f| f == facet)
    }

    /// Whether the facet lies on the boundary of the global domain.
    pub fn is_exterior_facet(&self, facet: usize) -> bool {
        self.facet_cells(facet).len() == 1 && !self.is_shared_facet(facet)
    }

    pub fn is_interior_facet(&self, facet: usize) -> bool {
        self.facet_cells(facet).len() == 2
    }

    /// Whether the facet lies on the boundary between this process and another one.
    pub fn is_shared_facet(&self, facet: usize) -> bool {
        match &self.parallel {
            Some(parallel) => {
                !parallel.shared_facets.is_empty()
                    && parallel
                        .shared_facets
                        .contains(&self.entity_key(self.tdim() - 1, facet))
            }
            None => false,
        }
    }

    pub fn vertex_coordinates(&self, vertex: usize) -> &[T] {
        let d = self.geometric_dim;
        &self.coordinates[d * vertex..d * (vertex + 1)]
    }

    /// Replaces the contents of `output` by the coordinates of the cell's vertices, in cell order.
    pub fn cell_coordinates_into(&self, cell: usize, output: &mut Vec<T>) {
        output.clear();
        for &v in self.cell_vertices(cell) {
            output.extend_from_slice(self.vertex_coordinates(v));
        }
    }

    pub fn global_vertex_index(&self, vertex: usize) -> usize {
        match &self.parallel {
            Some(parallel) => parallel.global_vertex_indices[vertex],
            None => vertex,
        }
    }

    /// Identifies an entity across processes by its sorted global vertex indices.
    pub fn entity_key(&self, dim: usize, entity: usize) -> Vec<usize> {
        let mut key: Vec<_> = self
            .entity_vertices(dim, entity)
            .iter()
            .map(|&v| self.global_vertex_index(v))
            .collect();
        key.sort_unstable();
        key
    }

    pub fn data(&self) -> &MeshData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut MeshData {
        &mut self.data
    }

    pub fn parallel_data(&self) -> Option<&ParallelData> {
        self.parallel.as_ref()
    }

    pub fn rank(&self) -> usize {
        self.parallel.as_ref().map(|p| p.rank).unwrap_or(0)
    }

    pub fn num_processes(&self) -> usize {
        self.parallel.as_ref().map(|p| p.num_processes).unwrap_or(1)
    }

    pub fn is_distributed(&self) -> bool {
        self.num_processes() > 1
    }

    /// Whether every cell lists its vertices in strictly ascending global order.
    pub fn ordered(&self) -> bool {
        self.cells.iter().all(|vertices| {
            vertices
                .windows(2)
                .all(|w| self.global_vertex_index(w[0]) < self.global_vertex_index(w[1]))
        })
    }

    /// Sorts the vertices of every cell by global index and renumbers all entities.
    ///
    /// Anything indexed by the previous entity numbering is invalidated, including
    /// attached mesh data that refers to facets.
    pub fn order(&mut self) {
        if self.ordered() {
            return;
        }
        let mut cells = Connectivity::new();
        for vertices in self.cells.iter() {
            let mut sorted = vertices.to_vec();
            sorted.sort_unstable_by_key(|&v| self.global_vertex_index(v));
            cells.push(&sorted);
        }
        self.cells = cells;
        self.topology = Topology::compute(self.cell_type, self.num_vertices(), &self.cells);
        if !self.data.is_empty() {
            warn!("Mesh data may refer to entities of the mesh before it was ordered.");
        }
    }

    /// A hash of the mesh topology, including its parallel distribution.
    ///
    /// Meshes with equal topology hashes produce equal dof maps for the same element.
    pub fn topology_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.cell_type.hash(&mut hasher);
        self.num_vertices().hash(&mut hasher);
        self.cells.hash(&mut hasher);
        if let Some(parallel) = &self.parallel {
            parallel.rank.hash(&mut hasher);
            parallel.num_processes.hash(&mut hasher);
            parallel.global_vertex_indices.hash(&mut hasher);
            parallel.shared_facets.hash(&mut hasher);
        }
        hasher.finish()
    }
}
