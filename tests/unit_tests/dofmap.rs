use crate::global_vertex_dofs;
use fenris_forms::comm::SerialCommunicator;
use fenris_forms::dofmap::{DofMap, DofMapBuilder, DofMapCache};
use fenris_forms::element::ElementDofLayout;
use fenris_forms::error::AssemblyError;
use fenris_forms::mesh::distribute::distribute_mesh;
use fenris_forms::mesh::procedural::{create_unit_interval_mesh, create_unit_square_mesh};
use fenris_forms::mesh::{CellType, Mesh};
use fenris_forms::proptest::unit_square_mesh;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use util::is_permutation;

fn build_without_reordering(layout: &ElementDofLayout, mesh: &Mesh<f64>) -> DofMap {
    DofMapBuilder::new()
        .with_reordering(false)
        .build(layout, mesh, &SerialCommunicator)
        .unwrap()
}

fn vertex_to_dof(dofmap: &DofMap, mesh: &Mesh<f64>) -> Vec<usize> {
    global_vertex_dofs(mesh, dofmap).into_values().collect()
}

#[test]
fn serial_p1_without_reordering_numbers_dofs_by_vertex() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = build_without_reordering(&ElementDofLayout::lagrange(CellType::Triangle, 1), &mesh);

    assert_eq!(dofmap.global_dimension(), 4);
    assert_eq!(dofmap.num_cells(), 2);
    assert_eq!(dofmap.cell_dofs(0), &[0, 1, 3]);
    assert_eq!(dofmap.cell_dofs(1), &[0, 2, 3]);
    assert_eq!(dofmap.ownership_range(), 0..4);
    assert!(dofmap.off_process_owner().is_empty());
    assert!(dofmap.shared_dofs().is_empty());
    assert!(dofmap.ghosts().is_empty());
    assert!((0..4).all(|dof| dofmap.is_owned(dof) && dofmap.owner(dof) == Some(0)));
    assert!(!dofmap.is_view());
    dofmap.validate().unwrap();
}

#[test]
fn serial_p1_with_reordering_relabels_vertices() {
    let mesh = create_unit_square_mesh::<f64>(4);
    let layout = ElementDofLayout::lagrange(CellType::Triangle, 1);
    let dofmap = DofMapBuilder::new()
        .build(&layout, &mesh, &SerialCommunicator)
        .unwrap();

    assert_eq!(dofmap.global_dimension(), mesh.num_vertices());
    assert!(is_permutation(&vertex_to_dof(&dofmap, &mesh)));
    dofmap.validate().unwrap();
}

#[test]
fn serial_p2_places_edge_dofs_after_vertex_dofs() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = build_without_reordering(&ElementDofLayout::lagrange(CellType::Triangle, 2), &mesh);

    assert_eq!(dofmap.global_dimension(), 9);
    for cell in 0..mesh.num_cells() {
        let dofs = dofmap.cell_dofs(cell);
        assert_eq!(&dofs[..3], mesh.cell_vertices(cell));
        let edge_dofs: Vec<usize> = mesh.cell_entities(1, cell).iter().map(|e| 4 + e).collect();
        assert_eq!(&dofs[3..], edge_dofs.as_slice());
    }

    // Both cells agree on the dof of the shared diagonal
    let diagonal = (0..mesh.num_facets())
        .find(|&f| mesh.is_interior_facet(f))
        .unwrap();
    assert!(dofmap.cell_dofs(0).contains(&(4 + diagonal)));
    assert!(dofmap.cell_dofs(1).contains(&(4 + diagonal)));
}

#[test]
fn discontinuous_dofs_are_not_shared() {
    let mesh = create_unit_square_mesh::<f64>(2);
    let dofmap = build_without_reordering(&ElementDofLayout::discontinuous_lagrange(CellType::Triangle, 1), &mesh);
    assert_eq!(dofmap.global_dimension(), 3 * mesh.num_cells());
    for cell in 0..mesh.num_cells() {
        assert_eq!(dofmap.cell_dofs(cell), &[3 * cell, 3 * cell + 1, 3 * cell + 2]);
    }
}

#[test]
fn global_dofs_are_shared_by_all_cells() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let layout = ElementDofLayout::mixed(vec![
        ElementDofLayout::lagrange(CellType::Triangle, 1),
        ElementDofLayout::real(CellType::Triangle),
    ]);
    let dofmap = build_without_reordering(&layout, &mesh);
    assert_eq!(dofmap.global_dimension(), 5);
    assert_eq!(dofmap.cell_dofs(0), &[0, 1, 3, 4]);
    assert_eq!(dofmap.cell_dofs(1), &[0, 2, 3, 4]);
}

#[test]
fn extract_and_collapse_sub_dofmap() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let scalar = ElementDofLayout::lagrange(CellType::Triangle, 1);
    let dofmap = build_without_reordering(&ElementDofLayout::vector(scalar.clone(), 2), &mesh);
    assert_eq!(dofmap.global_dimension(), 8);
    assert_eq!(dofmap.cell_dofs(0), &[0, 1, 3, 4, 5, 7]);

    let y = dofmap.extract_sub_dofmap(&[1]).unwrap();
    assert!(y.is_view());
    assert_eq!(y.layout(), &scalar);
    assert_eq!(y.global_dimension(), 4);
    assert_eq!(y.cell_dofs(0), &[4, 5, 7]);
    assert_eq!(y.cell_dofs(1), &[4, 6, 7]);
    assert!(Arc::ptr_eq(y.ownership(), dofmap.ownership()));

    let builder = DofMapBuilder::new().with_reordering(false);
    let (collapsed, collapsed_to_parent) = y.collapse(&mesh, &SerialCommunicator, &builder).unwrap();
    assert!(!collapsed.is_view());
    assert_eq!(collapsed.cell_dofs(0), &[0, 1, 3]);
    assert_eq!(collapsed_to_parent, BTreeMap::from([(0, 4), (1, 5), (2, 6), (3, 7)]));

    assert!(matches!(dofmap.extract_sub_dofmap(&[2]), Err(AssemblyError::FormMismatch(_))));
}

#[test]
fn layout_must_match_mesh_cell_type() {
    let mesh = create_unit_interval_mesh::<f64>(3);
    let result = DofMapBuilder::new().build(
        &ElementDofLayout::lagrange(CellType::Triangle, 1),
        &mesh,
        &SerialCommunicator,
    );
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));
}

#[test]
fn distributed_mesh_needs_matching_communicator() {
    let global = create_unit_interval_mesh::<f64>(2);
    let local = distribute_mesh(&global, &[0, 1], 0, 2);
    let result = DofMapBuilder::new().build(
        &ElementDofLayout::lagrange(CellType::Interval, 1),
        &local,
        &SerialCommunicator,
    );
    assert!(matches!(result, Err(AssemblyError::Communication(_))));
}

#[test]
fn dofmap_display_summarizes_numbering() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = build_without_reordering(&ElementDofLayout::lagrange(CellType::Triangle, 1), &mesh);
    let summary = dofmap.to_string();
    assert!(summary.contains("global dimension 4"));
    assert!(summary.contains("owning [0, 4)"));
}

#[test]
fn dofmap_survives_json_round_trip() {
    let mesh = create_unit_square_mesh::<f64>(2);
    let layout = ElementDofLayout::lagrange(CellType::Triangle, 2);
    let dofmap = DofMapBuilder::new().build(&layout, &mesh, &SerialCommunicator).unwrap();
    let json = serde_json::to_string(&dofmap).unwrap();
    let restored: DofMap = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.layout(), dofmap.layout());
    assert_eq!(restored.global_dimension(), dofmap.global_dimension());
    assert_eq!(restored.ownership(), dofmap.ownership());
    for cell in 0..mesh.num_cells() {
        assert_eq!(restored.cell_dofs(cell), dofmap.cell_dofs(cell));
    }
}

#[test]
fn cache_reuses_dofmaps_for_same_layout_and_topology() {
    let mesh = create_unit_square_mesh::<f64>(2);
    let same_topology = mesh.clone();
    let p1 = ElementDofLayout::lagrange(CellType::Triangle, 1);
    let p2 = ElementDofLayout::lagrange(CellType::Triangle, 2);

    let mut cache = DofMapCache::new(DofMapBuilder::new());
    assert!(cache.is_empty());
    assert!(cache.get(&p1, &mesh).is_none());

    let first = cache.get_or_build(&p1, &mesh, &SerialCommunicator).unwrap();
    let second = cache
        .get_or_build(&p1, &same_topology, &SerialCommunicator)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);

    let p2_dofmap = cache.get_or_build(&p2, &mesh, &SerialCommunicator).unwrap();
    assert!(!Arc::ptr_eq(&first, &p2_dofmap));
    assert_eq!(cache.len(), 2);

    let refined = create_unit_square_mesh::<f64>(3);
    cache
        .get_or_build(&p1, &refined, &SerialCommunicator)
        .unwrap();
    assert_eq!(cache.len(), 3);

    cache.clear();
    assert!(cache.is_empty());
}

proptest! {
    #[test]
    fn reordered_serial_p1_dofs_are_a_vertex_permutation(mesh in unit_square_mesh(5)) {
        let layout = ElementDofLayout::lagrange(CellType::Triangle, 1);
        let dofmap = DofMapBuilder::new().build(&layout, &mesh, &SerialCommunicator).unwrap();
        let unordered = build_without_reordering(&layout, &mesh);

        prop_assert_eq!(dofmap.global_dimension(), unordered.global_dimension());
        prop_assert!(is_permutation(&vertex_to_dof(&dofmap, &mesh)));
        prop_assert_eq!(dofmap.ownership_range(), 0..mesh.num_vertices());
    }
}
