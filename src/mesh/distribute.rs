//! Splitting a serial mesh into the local meshes of a distributed mesh.
use crate::mesh::{Mesh, ParallelData};
use nalgebra::Scalar;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Extracts the local mesh of process `rank` given a partition of the cells of `global`.
///
/// Local vertices keep the relative order of their global indices, so an ordered global
/// mesh yields ordered local meshes.
///
/// # Panics
///
/// Panics if `cell_partition` does not have one entry per cell, or if an entry is not a valid rank.
pub fn distribute_mesh<T: Scalar>(
    global: &Mesh<T>,
    cell_partition: &[usize],
    rank: usize,
    num_processes: usize,
) -> Mesh<T> {
    assert_eq!(cell_partition.len(), global.num_cells(), "Need one part per cell.");
    assert!(
        cell_partition.iter().all(|&p| p < num_processes),
        "Part index out of range."
    );

    let local_cells: Vec<usize> = (0..global.num_cells())
        .filter(|&c| cell_partition[c] == rank)
        .collect();

    let global_vertices: BTreeSet<usize> = local_cells
        .iter()
        .flat_map(|&c| global.cell_vertices(c).iter().copied())
        .collect();
    let global_vertex_indices: Vec<usize> = global_vertices
        .iter()
        .map(|&v| global.global_vertex_index(v))
        .collect();

    let mut coordinates = Vec::with_capacity(global_vertices.len() * global.gdim());
    for &v in &global_vertices {
        coordinates.extend_from_slice(global.vertex_coordinates(v));
    }

    let local_index: FxHashMap<usize, usize> = global_vertices
        .iter()
        .enumerate()
        .map(|(local, &v)| (v, local))
        .collect();
    let cells = local_cells
        .iter()
        .map(|&c| global.cell_vertices(c).iter().map(|v| local_index[v]).collect())
        .collect();

    let facet_dim = global.tdim() - 1;
    let shared_facets = (0..global.num_facets())
        .filter(|&f| {
            let cells = global.facet_cells(f);
            cells.len() == 2
                && (cell_partition[cells[0]] == rank) != (cell_partition[cells[1]] == rank)
        })
        .map(|f| global.entity_key(facet_dim, f))
        .collect();

    Mesh::from_vertices_and_cells(global.cell_type(), global.gdim(), coordinates, cells)
        .with_parallel_data(ParallelData::new(
            rank,
            num_processes,
            global_vertex_indices,
            shared_facets,
        ))
}
