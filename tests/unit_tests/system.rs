use crate::{laplace_kernel, load_kernel, p1_dofmap};
use fenris_forms::assembly::{
    Assembler, DirichletBC, SystemAssembler, BOUNDARY_FACET_CELLS, BOUNDARY_FACET_NUMBERS, BOUNDARY_INDICATORS,
};
use fenris_forms::dofmap::DofMap;
use fenris_forms::error::AssemblyError;
use fenris_forms::form::{interior_facet_kernel, CellGeometry, CoefficientValues, Form};
use fenris_forms::mesh::procedural::create_unit_square_mesh;
use fenris_forms::mesh::Mesh;
use fenris_forms::tensor::{CsrTensor, DenseMatrixTensor, VectorTensor};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;
use util::assert_approx_matrix_eq;

fn boundary_markers(mesh: &Mesh<f64>) -> Vec<usize> {
    (0..mesh.num_facets())
        .map(|f| usize::from(mesh.is_exterior_facet(f)))
        .collect()
}

/// Dirichlet values of the linear function `x + 2y` on the whole boundary.
fn linear_boundary_values(mesh: &Mesh<f64>, dofmap: &DofMap) -> DirichletBC<f64> {
    let markers = boundary_markers(mesh);
    DirichletBC::from_facet_markers(mesh, dofmap, &markers, 1, |dof| linear_function(mesh, dof)).unwrap()
}

fn linear_function(mesh: &Mesh<f64>, vertex: usize) -> f64 {
    let x = mesh.vertex_coordinates(vertex);
    x[0] + 2.0 * x[1]
}

fn assemble_poisson(mesh: &Mesh<f64>, dofmap: &DofMap, bcs: &[&DirichletBC<f64>]) -> (DMatrix<f64>, DVector<f64>) {
    let a = Form::new(mesh, vec![dofmap, dofmap]).with_cell_integral(None, laplace_kernel());
    let l = Form::new(mesh, vec![dofmap]).with_cell_integral(None, load_kernel(0.0));
    let mut matrix = DenseMatrixTensor::new();
    let mut vector = VectorTensor::new();
    SystemAssembler::default()
        .assemble(&mut matrix, &mut vector, &a, &l, bcs)
        .unwrap();
    (matrix.into_matrix().unwrap(), vector.into_vector().unwrap())
}

#[test]
fn constrained_rows_become_identity_rows() {
    let mesh = create_unit_square_mesh::<f64>(3);
    let dofmap = p1_dofmap(&mesh);
    let bc = linear_boundary_values(&mesh, &dofmap);
    // All vertices but the four interior ones lie on the boundary
    assert_eq!(bc.len(), 12);

    let (matrix, vector) = assemble_poisson(&mesh, &dofmap, &[&bc]);
    assert!(util::is_symmetric(&matrix, 1e-12));
    for (&dof, &value) in bc.values() {
        for j in 0..matrix.ncols() {
            let expected = if j == dof { 1.0 } else { 0.0 };
            assert_eq!(matrix[(dof, j)], expected);
            assert_eq!(matrix[(j, dof)], expected);
        }
        assert_eq!(vector[dof], value);
    }
}

#[test]
fn linear_boundary_data_gives_exact_solution() {
    let mesh = create_unit_square_mesh::<f64>(4);
    let dofmap = p1_dofmap(&mesh);
    let bc = linear_boundary_values(&mesh, &dofmap);
    let (matrix, vector) = assemble_poisson(&mesh, &dofmap, &[&bc]);

    let solution = matrix.lu().solve(&vector).unwrap();
    let exact = DVector::from_fn(mesh.num_vertices(), |v, _| linear_function(&mesh, v));
    assert_approx_matrix_eq!(&solution, &exact, abstol = 1e-12);
}

#[test]
fn facet_wise_assembly_matches_cell_wise_assembly() {
    let mesh = create_unit_square_mesh::<f64>(3);
    let dofmap = p1_dofmap(&mesh);
    let bc = linear_boundary_values(&mesh, &dofmap);
    let (expected_matrix, expected_vector) = assemble_poisson(&mesh, &dofmap, &[&bc]);

    // A vanishing interior facet integral switches to facet-wise assembly
    let no_jump = interior_facet_kernel(
        |_: &mut [f64], _: &CoefficientValues<f64>, _: [&CellGeometry<f64>; 2], _: [usize; 2]| Ok(()),
    );
    let a = Form::new(&mesh, vec![&dofmap, &dofmap])
        .with_cell_integral(None, laplace_kernel())
        .with_interior_facet_integral(None, no_jump);
    let l = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(0.0));
    let mut matrix = DenseMatrixTensor::new();
    let mut vector = VectorTensor::new();
    SystemAssembler::default()
        .assemble(&mut matrix, &mut vector, &a, &l, &[&bc])
        .unwrap();

    assert_approx_matrix_eq!(matrix.matrix(), &expected_matrix, abstol = 1e-12);
    assert_approx_matrix_eq!(vector.vector(), &expected_vector, abstol = 1e-12);
}

#[test]
fn without_conditions_system_matches_plain_assembly() {
    let mesh = create_unit_square_mesh::<f64>(2);
    let dofmap = p1_dofmap(&mesh);
    let a = Form::new(&mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());
    let l = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(3.0));

    let mut expected_matrix = DenseMatrixTensor::new();
    let mut expected_vector = VectorTensor::new();
    let assembler = Assembler::default();
    assembler.assemble(&mut expected_matrix, &a).unwrap();
    assembler.assemble(&mut expected_vector, &l).unwrap();

    let mut matrix = CsrTensor::new();
    let mut vector = VectorTensor::new();
    SystemAssembler::default()
        .assemble(&mut matrix, &mut vector, &a, &l, &[])
        .unwrap();
    assert_approx_matrix_eq!(&DMatrix::from(matrix.matrix()), expected_matrix.matrix(), abstol = 1e-12);
    assert_approx_matrix_eq!(vector.vector(), expected_vector.vector(), abstol = 1e-12);
}

#[test]
fn matrix_and_vector_can_be_assembled_separately() {
    let mesh = create_unit_square_mesh::<f64>(3);
    let dofmap = p1_dofmap(&mesh);
    let bc = linear_boundary_values(&mesh, &dofmap);
    let (expected_matrix, expected_vector) = assemble_poisson(&mesh, &dofmap, &[&bc]);

    let a = Form::new(&mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());
    let l = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(0.0));
    let assembler = SystemAssembler::default();

    let mut matrix = DenseMatrixTensor::new();
    assembler.assemble_matrix(&mut matrix, &a, &[&bc]).unwrap();
    assert_eq!(matrix.matrix(), &expected_matrix);

    let mut vector = VectorTensor::new();
    assembler
        .assemble_vector(&mut vector, &a, &l, &[&bc])
        .unwrap();
    assert_eq!(vector.vector(), &expected_vector);
}

#[test]
fn incremental_assembly_prescribes_difference_to_current_iterate() {
    let mesh = create_unit_square_mesh::<f64>(2);
    let dofmap = p1_dofmap(&mesh);
    let bc = linear_boundary_values(&mesh, &dofmap);
    let a = Form::new(&mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());
    let l = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(0.0));
    let assembler = SystemAssembler::default();

    // An iterate that already satisfies the conditions needs no boundary correction
    let x0 = DVector::from_fn(mesh.num_vertices(), |v, _| linear_function(&mesh, v));
    let mut matrix = DenseMatrixTensor::new();
    let mut vector = VectorTensor::new();
    assembler
        .assemble_incremental(&mut matrix, &mut vector, &a, &l, &[&bc], &x0)
        .unwrap();
    for &dof in bc.values().keys() {
        assert_eq!(vector.vector()[dof], 0.0);
        assert_eq!(matrix.matrix()[(dof, dof)], 1.0);
    }

    let zero = DVector::zeros(mesh.num_vertices());
    assembler
        .assemble_incremental(&mut matrix, &mut vector, &a, &l, &[&bc], &zero)
        .unwrap();
    for (&dof, &value) in bc.values() {
        assert_eq!(vector.vector()[dof], -value);
    }

    let too_short = DVector::zeros(3);
    let result = assembler.assemble_incremental(&mut matrix, &mut vector, &a, &l, &[&bc], &too_short);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));
}

#[test]
fn later_conditions_override_earlier_ones() {
    let first = DirichletBC::from_values([(0, 1.0), (1, 2.0)]);
    let second = DirichletBC::from_values([(1, 5.0)]);
    assert_eq!(DirichletBC::merge(&[&first, &second]), BTreeMap::from([(0, 1.0), (1, 5.0)]));
    assert_eq!(DirichletBC::merge(&[&second, &first]), BTreeMap::from([(0, 1.0), (1, 2.0)]));
    assert!(DirichletBC::<f64>::default().is_empty());
}

#[test]
fn boundary_conditions_from_mesh_data() {
    let mut mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let result = DirichletBC::from_mesh_boundary_data(&mesh, &dofmap, 7, |_| 0.0);
    assert!(matches!(result, Err(AssemblyError::MissingBoundaryData(_))));

    // Local facet 0 of cell 0 is opposite to vertex 0, i.e. the edge between vertices 1 and 3
    let data = mesh.data_mut();
    data.insert_array(BOUNDARY_FACET_CELLS, vec![0, 1]);
    data.insert_array(BOUNDARY_FACET_NUMBERS, vec![0, 0]);
    data.insert_array(BOUNDARY_INDICATORS, vec![7, 8]);
    let bc = DirichletBC::from_mesh_boundary_data(&mesh, &dofmap, 7, |dof| dof as f64).unwrap();
    assert_eq!(bc.values(), &BTreeMap::from([(1, 1.0), (3, 3.0)]));

    mesh.data_mut()
        .insert_array(BOUNDARY_FACET_NUMBERS, vec![0]);
    let result = DirichletBC::from_mesh_boundary_data(&mesh, &dofmap, 7, |_| 0.0);
    assert!(matches!(result, Err(AssemblyError::MissingBoundaryData(_))));

    mesh.data_mut()
        .insert_array(BOUNDARY_FACET_NUMBERS, vec![3, 0]);
    let result = DirichletBC::from_mesh_boundary_data(&mesh, &dofmap, 7, |_| 0.0);
    assert!(matches!(result, Err(AssemblyError::MissingBoundaryData(_))));
}

#[test]
fn facet_markers_must_cover_all_facets() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let result = DirichletBC::from_facet_markers(&mesh, &dofmap, &[1, 1], 1, |_| 0.0);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));
}

#[test]
fn system_needs_bilinear_and_linear_form() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let a = Form::new(&mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());
    let l = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(1.0));
    let assembler = SystemAssembler::default();
    let mut matrix = DenseMatrixTensor::new();
    let mut vector = VectorTensor::new();

    let result = assembler.assemble(&mut matrix, &mut vector, &l, &l, &[]);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));
    let result = assembler.assemble(&mut matrix, &mut vector, &a, &a, &[]);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));
}
