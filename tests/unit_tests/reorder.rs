use fenris_forms::proptest::symmetric_graph;
use fenris_forms::reorder::{cuthill_mckee, dof_graph, reverse_cuthill_mckee, Permutation};
use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;
use proptest::prelude::*;
use util::is_permutation;

#[test]
fn cuthill_mckee_basic_examples() {
    // Basic example
    {
        let matrix = DMatrix::from_row_slice(4, 4, &[1, 0, 1, 1, 0, 1, 0, 1, 1, 0, 1, 0, 1, 1, 0, 1]);
        let pattern = CsrMatrix::from(&matrix).pattern().clone();
        let perm = cuthill_mckee(&pattern);

        assert_eq!(perm.perm(), &[1, 3, 0, 2]);

        let mut rcm_expected_perm = perm.clone();
        rcm_expected_perm.reverse();
        assert_eq!(&reverse_cuthill_mckee(&pattern), &rcm_expected_perm);
    }

    // Diagonal pattern
    {
        let matrix = DMatrix::from_row_slice(4, 4, &[1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1]);
        let pattern = CsrMatrix::from(&matrix).pattern().clone();
        let perm = cuthill_mckee(&pattern);
        assert_eq!(perm.perm(), &[0, 1, 2, 3]);
    }
}

#[test]
fn permutation_inverse_and_application() {
    let perm = Permutation::from_vec(vec![2, 0, 1]).unwrap();
    assert_eq!(perm.apply_to_slice(&['a', 'b', 'c']), vec!['c', 'a', 'b']);

    let inverse = perm.inverse();
    assert_eq!(inverse.perm(), &[1, 2, 0]);
    for i in 0..3 {
        assert_eq!(inverse.source_index(perm.source_index(i)), i);
    }

    assert!(Permutation::from_vec(vec![0, 0, 1]).is_err());
    assert!(Permutation::from_vec(vec![0, 3, 1]).is_err());
    assert_eq!(Permutation::identity(3).perm(), &[0, 1, 2]);
}

#[test]
fn dof_graph_connects_dofs_sharing_a_cell() {
    let cells: Vec<&[usize]> = vec![&[0, 1][..], &[1, 2][..]];
    let graph = dof_graph(4, cells.iter().copied(), Some);
    assert_eq!(graph.lane(0), &[0, 1]);
    assert_eq!(graph.lane(1), &[0, 1, 2]);
    assert_eq!(graph.lane(2), &[1, 2]);
    // Isolated nodes are still adjacent to themselves
    assert_eq!(graph.lane(3), &[3]);

    // Restricting to the even dofs
    let restricted = dof_graph(2, cells.iter().copied(), |dof| (dof % 2 == 0).then_some(dof / 2));
    assert_eq!(restricted.lane(0), &[0]);
    assert_eq!(restricted.lane(1), &[1]);
}

#[test]
fn rcm_reduces_bandwidth_of_shuffled_path() {
    // A path graph 0 - 3 - 1 - 4 - 2 labelled in a scattered order
    let path = [0, 3, 1, 4, 2];
    let edges: Vec<[usize; 2]> = path.windows(2).map(|w| [w[0], w[1]]).collect();
    let graph = dof_graph(5, edges.iter().map(|e| e.as_slice()), Some);
    let new_index = reverse_cuthill_mckee(&graph).inverse();

    for edge in &edges {
        let (a, b) = (new_index.source_index(edge[0]), new_index.source_index(edge[1]));
        assert_eq!(a.abs_diff(b), 1);
    }
}

proptest! {
    #[test]
    fn rcm_is_a_bijection_preserving_adjacency(graph in symmetric_graph(12)) {
        let perm = reverse_cuthill_mckee(&graph);
        prop_assert_eq!(perm.len(), graph.major_dim());
        prop_assert!(is_permutation(perm.perm()));

        // Relabelling and mapping back recovers every edge
        let new_index = perm.inverse();
        for i in 0..graph.major_dim() {
            for &j in graph.lane(i) {
                let (new_i, new_j) = (new_index.source_index(i), new_index.source_index(j));
                prop_assert_eq!(perm.source_index(new_i), i);
                prop_assert_eq!(perm.source_index(new_j), j);
            }
        }
    }
}
