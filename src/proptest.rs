//! Strategies for property-based tests of dof maps and assembly.
use crate::mesh::procedural::{create_unit_interval_mesh, create_unit_square_mesh};
use crate::mesh::Mesh;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use nalgebra_sparse::pattern::SparsityPattern;
use std::cmp::max;

/// Unit square meshes with between 1 and `max_cells_per_dim` cells along each axis.
pub fn unit_square_mesh(max_cells_per_dim: usize) -> impl Strategy<Value = Mesh<f64>> {
    (1..=max(1, max_cells_per_dim)).prop_map(create_unit_square_mesh::<f64>)
}

/// Unit interval meshes with between 1 and `max_cells` cells.
pub fn unit_interval_mesh(max_cells: usize) -> impl Strategy<Value = Mesh<f64>> {
    (1..=max(1, max_cells)).prop_map(create_unit_interval_mesh::<f64>)
}

/// Assignments of `num_cells` cells to `num_parts` parts in which every part gets at least
/// one cell.
///
/// # Panics
///
/// Panics if there are fewer cells than parts.
pub fn cell_partition(num_cells: usize, num_parts: usize) -> impl Strategy<Value = Vec<usize>> {
    assert!(num_parts > 0 && num_cells >= num_parts, "Need at least one cell per part.");
    vec(0..num_parts, num_cells).prop_map(move |mut partition| {
        // Make sure no part ends up empty
        for part in 0..num_parts {
            partition[part] = part;
        }
        partition
    })
}

/// A unit square mesh together with a partition of its cells into `2..=max_parts` parts.
///
/// The number of parts never exceeds the number of cells.
pub fn partitioned_unit_square_mesh(
    max_cells_per_dim: usize,
    max_parts: usize,
) -> impl Strategy<Value = (Mesh<f64>, usize, Vec<usize>)> {
    (unit_square_mesh(max_cells_per_dim), 2..=max(2, max_parts)).prop_flat_map(|(mesh, num_parts)| {
        let num_cells = mesh.num_cells();
        let num_parts = num_parts.min(num_cells);
        (Just(mesh), Just(num_parts), cell_partition(num_cells, num_parts))
    })
}

/// Symmetric graphs without self-loops on up to `max_nodes` nodes.
pub fn symmetric_graph(max_nodes: usize) -> impl Strategy<Value = SparsityPattern> {
    (0..=max_nodes).prop_flat_map(|n| {
        let max_edges = n * n;
        vec((0..max(n, 1), 0..max(n, 1)), 0..=max_edges).prop_map(move |edges| {
            let mut adjacency = vec![Vec::new(); n];
            for (i, j) in edges.into_iter().filter(|(i, j)| i != j && *i < n && *j < n) {
                adjacency[i].push(j);
                adjacency[j].push(i);
            }
            let mut offsets = Vec::with_capacity(n + 1);
            let mut indices = Vec::new();
            offsets.push(0);
            for mut neighbors in adjacency {
                neighbors.sort_unstable();
                neighbors.dedup();
                indices.extend(neighbors);
                offsets.push(indices.len());
            }
            SparsityPattern::try_from_offsets_and_indices(n, n, offsets, indices)
                .expect("Sorted, deduplicated adjacency lists form a valid pattern")
        })
    })
}
