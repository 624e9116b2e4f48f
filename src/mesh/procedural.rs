//! Structured simplicial meshes of the unit interval, square and cube.
//!
//! All meshes produced here are ordered: every cell lists its vertices in ascending order.
use crate::mesh::{CellType, Mesh};
use crate::Real;

fn unit_coordinate<T: Real>(i: usize, cells_per_dim: usize) -> T {
    let i = T::from_usize(i).expect("Must be able to fit usize in T");
    let n = T::from_usize(cells_per_dim).expect("Must be able to fit usize in T");
    i / n
}

pub fn create_unit_interval_mesh<T: Real>(cells_per_dim: usize) -> Mesh<T> {
    let n = cells_per_dim;
    let coordinates = (0..=n).map(|i| unit_coordinate(i, n)).collect();
    let cells = (0..n).map(|i| vec![i, i + 1]).collect();
    Mesh::from_vertices_and_cells(CellType::Interval, 1, coordinates, cells)
}

/// Each square is split into two triangles along the diagonal from its lower left corner.
pub fn create_unit_square_mesh<T: Real>(cells_per_dim: usize) -> Mesh<T> {
    let n = cells_per_dim;
    let vertex_index = |i: usize, j: usize| (n + 1) * j + i;

    let mut coordinates = Vec::with_capacity(2 * (n + 1) * (n + 1));
    for j in 0..=n {
        for i in 0..=n {
            coordinates.push(unit_coordinate(i, n));
            coordinates.push(unit_coordinate(j, n));
        }
    }

    let mut cells = Vec::with_capacity(2 * n * n);
    for j in 0..n {
        for i in 0..n {
            let v00 = vertex_index(i, j);
            let v10 = vertex_index(i + 1, j);
            let v01 = vertex_index(i, j + 1);
            let v11 = vertex_index(i + 1, j + 1);
            cells.push(vec![v00, v10, v11]);
            cells.push(vec![v00, v01, v11]);
        }
    }

    Mesh::from_vertices_and_cells(CellType::Triangle, 2, coordinates, cells)
}

/// Each cube is split into six tetrahedra sharing the diagonal from its lowest to its
/// highest corner.
pub fn create_unit_cube_mesh<T: Real>(cells_per_dim: usize) -> Mesh<T> {
    let n = cells_per_dim;
    let vertex_index = |[i, j, k]: [usize; 3]| (n + 1) * ((n + 1) * k + j) + i;

    let mut coordinates = Vec::with_capacity(3 * (n + 1) * (n + 1) * (n + 1));
    for k in 0..=n {
        for j in 0..=n {
            for i in 0..=n {
                coordinates.push(unit_coordinate(i, n));
                coordinates.push(unit_coordinate(j, n));
                coordinates.push(unit_coordinate(k, n));
            }
        }
    }

    const AXIS_ORDERS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let mut cells = Vec::with_capacity(6 * n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                for axes in AXIS_ORDERS {
                    let mut corner = [i, j, k];
                    let mut tet = Vec::with_capacity(4);
                    tet.push(vertex_index(corner));
                    for axis in axes {
                        corner[axis] += 1;
                        tet.push(vertex_index(corner));
                    }
                    cells.push(tet);
                }
            }
        }
    }

    Mesh::from_vertices_and_cells(CellType::Tetrahedron, 3, coordinates, cells)
}
