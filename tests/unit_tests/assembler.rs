use crate::{constant_kernel, global_vertex_dofs, laplace_kernel, load_kernel, p1_dofmap, p1_gradients};
use eyre::eyre;
use fenris_forms::assembly::{Assembler, AssemblerOptions};
use fenris_forms::comm::{run_in_threads, Communicator};
use fenris_forms::dofmap::DofMapBuilder;
use fenris_forms::element::ElementDofLayout;
use fenris_forms::error::AssemblyError;
use fenris_forms::form::{
    cell_kernel, exterior_facet_kernel, interior_facet_kernel, CellGeometry, CellKernel, CoefficientSpec,
    CoefficientValues, Constant, DiscreteFunction, Form,
};
use fenris_forms::mesh::distribute::distribute_mesh;
use fenris_forms::mesh::procedural::{create_unit_interval_mesh, create_unit_square_mesh};
use fenris_forms::mesh::{CellType, Mesh};
use fenris_forms::tensor::{
    CsrTensor, DenseMatrixTensor, GlobalTensor, ScalarTensor, TensorLayout, VectorTensor,
};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;
use util::assert_approx_matrix_eq;

fn area_kernel() -> impl CellKernel<f64> {
    cell_kernel(|output: &mut [f64], _: &CoefficientValues<f64>, cell: &CellGeometry<f64>| {
        output[0] = p1_gradients(cell).0;
        Ok(())
    })
}

#[test]
fn single_cell_matrix_equals_local_tensor() {
    let mesh = Mesh::from_vertices_and_cells(CellType::Triangle, 2, vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0], vec![vec![0, 1, 2]]);
    let dofmap = p1_dofmap(&mesh);
    let local = vec![2.0, -1.0, -1.0, -1.0, 2.0, -1.0, -1.0, -1.0, 2.0];
    let form = Form::new(&mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, constant_kernel(local.clone()));

    let mut matrix = DenseMatrixTensor::new();
    Assembler::default().assemble(&mut matrix, &form).unwrap();
    assert!(matrix.is_finalized());
    assert_eq!(matrix.matrix(), &DMatrix::from_row_slice(3, 3, &local));
}

#[test]
fn interior_facet_contributions_accumulate_on_shared_dofs() {
    // Two intervals with cell dofs [0, 1] and [1, 2]; the macro element has dofs [0, 1, 1, 2]
    let mesh = create_unit_interval_mesh::<f64>(2);
    let dofmap = p1_dofmap(&mesh);
    let cell_values = vec![1.0, -1.0, -1.0, 1.0];
    let facet_values: Vec<f64> = (1..=16).map(|v| v as f64).collect();
    let facet_kernel = {
        let facet_values = facet_values.clone();
        interior_facet_kernel(
            move |output: &mut [f64], _: &CoefficientValues<f64>, _: [&CellGeometry<f64>; 2], local_facets: [usize; 2]| {
                // The shared vertex is the end of the first cell and the start of the second
                assert_eq!(local_facets, [1, 0]);
                output.copy_from_slice(&facet_values);
                Ok(())
            },
        )
    };
    let form = Form::new(&mesh, vec![&dofmap, &dofmap])
        .with_cell_integral(None, constant_kernel(cell_values))
        .with_interior_facet_integral(None, facet_kernel);

    let mut expected = DMatrix::from_row_slice(3, 3, &[1.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 1.0]);
    let macro_dofs = [0, 1, 1, 2];
    for (a, &i) in macro_dofs.iter().enumerate() {
        for (b, &j) in macro_dofs.iter().enumerate() {
            expected[(i, j)] += facet_values[4 * a + b];
        }
    }

    let assembler = Assembler::default();
    let mut dense = DenseMatrixTensor::new();
    assembler.assemble(&mut dense, &form).unwrap();
    assert_eq!(dense.matrix(), &expected);

    let mut csr = CsrTensor::new();
    assembler.assemble(&mut csr, &form).unwrap();
    assert_eq!(DMatrix::from(csr.matrix()), expected);
}

#[test]
fn exterior_facet_integrals_see_local_facet_index() {
    let mesh = create_unit_interval_mesh::<f64>(2);
    let dofmap = p1_dofmap(&mesh);
    let kernel = exterior_facet_kernel(
        |output: &mut [f64], _: &CoefficientValues<f64>, _: &CellGeometry<f64>, local_facet: usize| {
            output[local_facet] += 1.0;
            Ok(())
        },
    );
    let form = Form::new(&mesh, vec![&dofmap]).with_exterior_facet_integral(None, kernel);

    let mut vector = VectorTensor::new();
    Assembler::default().assemble(&mut vector, &form).unwrap();
    assert_eq!(vector.vector(), &DVector::from_vec(vec![1.0, 0.0, 1.0]));
}

#[test]
fn laplace_matrix_is_symmetric_with_zero_row_sums() {
    let mesh = create_unit_square_mesh::<f64>(3);
    let dofmap = p1_dofmap(&mesh);
    let form = Form::new(&mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());

    let assembler = Assembler::default();
    let mut dense = DenseMatrixTensor::new();
    assembler.assemble(&mut dense, &form).unwrap();
    let matrix = dense.matrix();
    assert!(util::is_symmetric(matrix, 1e-12));
    for i in 0..matrix.nrows() {
        assert_scalar_eq!(matrix.row(i).sum(), 0.0, comp = abs, tol = 1e-12);
    }
    // Center vertices of a uniform right-triangle mesh carry the five-point stencil
    assert_scalar_eq!(matrix[(5, 5)], 4.0, comp = abs, tol = 1e-12);

    let mut csr = CsrTensor::new();
    assembler.assemble(&mut csr, &form).unwrap();
    assert_approx_matrix_eq!(&DMatrix::from(csr.matrix()), matrix, abstol = 1e-12);
}

#[test]
fn load_vector_integrates_source() {
    let mesh = create_unit_square_mesh::<f64>(4);
    let dofmap = p1_dofmap(&mesh);
    let form = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(2.0));

    let mut vector = VectorTensor::new();
    Assembler::default().assemble(&mut vector, &form).unwrap();
    assert_scalar_eq!(vector.vector().sum(), 2.0, comp = abs, tol = 1e-12);
}

#[test]
fn functional_and_cell_values() {
    let mesh = create_unit_square_mesh::<f64>(2);
    let form = Form::new(&mesh, vec![]).with_cell_integral(None, area_kernel());
    let assembler = Assembler::default();

    let mut area = ScalarTensor::new();
    assembler.assemble(&mut area, &form).unwrap();
    assert_scalar_eq!(area.value(), 1.0, comp = abs, tol = 1e-12);

    let values = assembler.assemble_cell_values(&form).unwrap();
    assert_eq!(values.len(), 8);
    for value in values {
        assert_scalar_eq!(value, 0.125, comp = abs, tol = 1e-12);
    }
}

#[test]
fn cell_values_need_rank_zero_form() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let form = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(1.0));
    let result = Assembler::default().assemble_cell_values(&form);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));
}

#[test]
fn add_values_accumulates_across_calls() {
    let mesh = create_unit_square_mesh::<f64>(2);
    let dofmap = p1_dofmap(&mesh);
    let form = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(1.0));

    let mut once = VectorTensor::new();
    Assembler::default().assemble(&mut once, &form).unwrap();

    let accumulating = Assembler::new(AssemblerOptions::default().with_add_values(true));
    let mut twice = VectorTensor::new();
    accumulating.assemble(&mut twice, &form).unwrap();
    accumulating.assemble(&mut twice, &form).unwrap();
    assert_approx_matrix_eq!(twice.vector(), &(once.vector() * 2.0), abstol = 1e-14);

    // Without add_values the tensor is zeroed first
    Assembler::default().assemble(&mut twice, &form).unwrap();
    assert_eq!(twice.vector(), once.vector());
}

#[test]
fn finalize_can_be_deferred() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let form = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, load_kernel(1.0));
    let assembler = Assembler::new(AssemblerOptions::default().with_finalize_tensor(false));
    let mut vector = VectorTensor::new();
    assembler.assemble(&mut vector, &form).unwrap();
    assert!(!vector.is_finalized());
}

#[test]
fn subdomain_markers_select_integrals() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let markers = [0, 1];

    // Only cell 1 (vertices 0, 2, 3) has an integral
    let form = Form::new(&mesh, vec![&dofmap])
        .with_cell_integral(Some(1), constant_kernel(vec![1.0; 3]))
        .with_cell_domains(&markers);
    let mut vector = VectorTensor::new();
    Assembler::default().assemble(&mut vector, &form).unwrap();
    assert_eq!(vector.vector(), &DVector::from_vec(vec![1.0, 0.0, 1.0, 1.0]));

    // The default integral covers markers without their own integral
    let form = Form::new(&mesh, vec![&dofmap])
        .with_cell_integral(None, constant_kernel(vec![10.0; 3]))
        .with_cell_integral(Some(1), constant_kernel(vec![1.0; 3]))
        .with_cell_domains(&markers);
    Assembler::default().assemble(&mut vector, &form).unwrap();
    assert_eq!(vector.vector(), &DVector::from_vec(vec![11.0, 10.0, 1.0, 11.0]));
}

#[test]
fn coefficients_are_restricted_to_cells() {
    let mesh = create_unit_interval_mesh::<f64>(2);
    let dofmap = Arc::new(p1_dofmap(&mesh));
    let u = DiscreteFunction::new(dofmap, DVector::from_vec(vec![1.0, 2.0, 4.0]));
    let scale = Constant::scalar(10.0);
    let kernel = cell_kernel(|output: &mut [f64], w: &CoefficientValues<f64>, _: &CellGeometry<f64>| {
        output[0] = w.get(1)[0] * w.get(0).iter().sum::<f64>();
        Ok(())
    });
    let form = Form::new(&mesh, vec![])
        .with_coefficient_specs(vec![CoefficientSpec::new("u", vec![]), CoefficientSpec::new("scale", vec![])])
        .with_coefficient(0, &u)
        .with_coefficient(1, &scale)
        .with_cell_integral(None, kernel);

    let values = Assembler::default().assemble_cell_values(&form).unwrap();
    assert_eq!(values, vec![30.0, 60.0]);
}

#[test]
fn missing_or_mismatched_coefficients_are_rejected() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let spec = vec![CoefficientSpec::new("f", vec![])];

    let form = Form::new(&mesh, vec![])
        .with_coefficient_specs(spec.clone())
        .with_cell_integral(None, area_kernel());
    let mut scalar = ScalarTensor::new();
    let result = Assembler::default().assemble(&mut scalar, &form);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));

    let vector_constant = Constant::vector(vec![1.0, 2.0]);
    let form = Form::new(&mesh, vec![])
        .with_coefficient_specs(spec)
        .with_coefficient(0, &vector_constant)
        .with_cell_integral(None, area_kernel());
    let result = Assembler::default().assemble(&mut scalar, &form);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));

    // More coefficients than declared slots
    let scalar_constant = Constant::scalar(1.0);
    let form = Form::new(&mesh, vec![])
        .with_coefficient(0, &scalar_constant)
        .with_cell_integral(None, area_kernel());
    let result = Assembler::default().assemble(&mut scalar, &form);
    assert!(matches!(result, Err(AssemblyError::FormMismatch(_))));
}

#[test]
fn mismatched_tensor_or_mesh_is_rejected() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let form = Form::new(&mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());
    let assembler = Assembler::default();

    let mut vector = VectorTensor::new();
    assert!(matches!(assembler.assemble(&mut vector, &form), Err(AssemblyError::FormMismatch(_))));

    let mut too_large = DenseMatrixTensor::new();
    too_large
        .init(&TensorLayout {
            global_dimensions: vec![5, 5],
            local_ranges: vec![0..5, 0..5],
            sparsity: None,
        })
        .unwrap();
    assert!(matches!(assembler.assemble(&mut too_large, &form), Err(AssemblyError::FormMismatch(_))));

    let form = Form::new(&mesh, vec![&dofmap, &dofmap])
        .with_cell_type(CellType::Tetrahedron)
        .with_cell_integral(None, laplace_kernel());
    let mut matrix = DenseMatrixTensor::new();
    assert!(matches!(assembler.assemble(&mut matrix, &form), Err(AssemblyError::FormMismatch(_))));

    let other_mesh = create_unit_square_mesh::<f64>(2);
    let form = Form::new(&other_mesh, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());
    assert!(matches!(assembler.assemble(&mut matrix, &form), Err(AssemblyError::FormMismatch(_))));
}

#[test]
fn unordered_mesh_is_rejected() {
    let ordered = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&ordered);
    let coordinates = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let unordered = Mesh::from_vertices_and_cells(CellType::Triangle, 2, coordinates, vec![vec![1, 0, 3], vec![3, 2, 0]]);
    let form = Form::new(&unordered, vec![&dofmap]).with_cell_integral(None, load_kernel(1.0));
    let mut vector = VectorTensor::new();
    let result = Assembler::default().assemble(&mut vector, &form);
    assert!(matches!(result, Err(AssemblyError::MeshNotOrdered)));
}

#[test]
fn kernel_errors_abort_assembly() {
    let mesh = create_unit_square_mesh::<f64>(1);
    let dofmap = p1_dofmap(&mesh);
    let failing = cell_kernel(|_: &mut [f64], _: &CoefficientValues<f64>, cell: &CellGeometry<f64>| {
        if cell.index == 1 {
            Err(eyre!("degenerate cell"))
        } else {
            Ok(())
        }
    });
    let form = Form::new(&mesh, vec![&dofmap]).with_cell_integral(None, failing);
    let mut vector = VectorTensor::new();
    let result = Assembler::default().assemble(&mut vector, &form);
    match result {
        Err(AssemblyError::Kernel(report)) => assert!(report.to_string().contains("degenerate cell")),
        other => panic!("Expected kernel error, got {other:?}"),
    }
}

#[test]
fn distributed_assembly_sums_to_serial_matrix() {
    let global = create_unit_square_mesh::<f64>(3);
    let partition: Vec<usize> = (0..global.num_cells()).map(|c| c % 3).collect();
    let serial_dofmap = p1_dofmap(&global);
    let serial_form = Form::new(&global, vec![&serial_dofmap, &serial_dofmap]).with_cell_integral(None, laplace_kernel());
    let mut serial = DenseMatrixTensor::new();
    Assembler::default().assemble(&mut serial, &serial_form).unwrap();

    let layout = ElementDofLayout::lagrange(CellType::Triangle, 1);
    let contributions = run_in_threads(3, |comm| {
        let local = distribute_mesh(&global, &partition, comm.rank(), comm.size());
        let dofmap = DofMapBuilder::new().build(&layout, &local, &comm).unwrap();
        let form = Form::new(&local, vec![&dofmap, &dofmap]).with_cell_integral(None, laplace_kernel());
        let mut matrix = DenseMatrixTensor::new();
        Assembler::default().assemble(&mut matrix, &form).unwrap();
        (global_vertex_dofs(&local, &dofmap), matrix.into_matrix().unwrap())
    });

    let n = global.num_vertices();
    let mut vertex_of_dof = vec![usize::MAX; n];
    for (vertex_dofs, _) in &contributions {
        for (&vertex, &dof) in vertex_dofs {
            vertex_of_dof[dof] = vertex;
        }
    }
    let mut distributed = DMatrix::<f64>::zeros(n, n);
    for (_, matrix) in &contributions {
        for i in 0..n {
            for j in 0..n {
                distributed[(vertex_of_dof[i], vertex_of_dof[j])] += matrix[(i, j)];
            }
        }
    }
    assert_approx_matrix_eq!(&distributed, serial.matrix(), abstol = 1e-12);
}

#[test]
fn interior_facets_are_unsupported_on_distributed_meshes() {
    let global = create_unit_square_mesh::<f64>(2);
    let partition = [0, 0, 0, 0, 1, 1, 1, 1];
    let layout = ElementDofLayout::lagrange(CellType::Triangle, 1);
    let results = run_in_threads(2, |comm| {
        let local = distribute_mesh(&global, &partition, comm.rank(), comm.size());
        let dofmap = DofMapBuilder::new().build(&layout, &local, &comm).unwrap();
        let kernel = interior_facet_kernel(
            |_: &mut [f64], _: &CoefficientValues<f64>, _: [&CellGeometry<f64>; 2], _: [usize; 2]| Ok(()),
        );
        let form = Form::new(&local, vec![&dofmap]).with_interior_facet_integral(None, kernel);
        let mut vector = VectorTensor::new();
        Assembler::default().assemble(&mut vector, &form)
    });
    for result in results {
        assert!(matches!(result, Err(AssemblyError::UnsupportedParallelInteriorFacets { num_processes: 2 })));
    }
}
