//! Bandwidth-reducing permutations of dof graphs.
use core::fmt;
use nalgebra_sparse::pattern::SparsityPattern;
use std::collections::{BTreeSet, VecDeque};
use std::error::Error;
use std::marker::PhantomData;

/// A representation of an index permutation.
///
/// More precisely, given `n` objects stored contiguously, the permutation internally
/// stores a permutation array `perm` such that for *target index* `i` in `0 .. n`,
/// the corresponding *source index* is given by
///
/// ```ignore
/// target[i] = source[perm[i]]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    perm: Vec<usize>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidPermutation {
    marker: PhantomData<()>,
}

impl fmt::Display for InvalidPermutation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid permutation")
    }
}

impl Error for InvalidPermutation {}

impl Permutation {
    pub fn from_vec(perm: Vec<usize>) -> Result<Self, InvalidPermutation> {
        let mut visited = vec![false; perm.len()];
        for &index in &perm {
            if index >= perm.len() || visited[index] {
                return Err(InvalidPermutation { marker: PhantomData });
            } else {
                visited[index] = true;
            }
        }
        Ok(Self { perm })
    }

    pub fn identity(n: usize) -> Self {
        Self { perm: (0..n).collect() }
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    pub fn reverse(&mut self) {
        self.perm.reverse()
    }

    pub fn source_index(&self, target_index: usize) -> usize {
        self.perm[target_index]
    }

    pub fn inverse(&self) -> Permutation {
        let mut inverse_perm = vec![usize::MAX; self.len()];
        for (target_idx, &source_idx) in self.perm().iter().enumerate() {
            inverse_perm[source_idx] = target_idx;
        }
        Self { perm: inverse_perm }
    }

    pub fn apply_to_slice<T: Clone>(&self, slice: &[T]) -> Vec<T> {
        assert_eq!(slice.len(), self.len(), "Slice and permutation must have the same size.");
        self.perm()
            .iter()
            .map(|source_idx| slice[*source_idx].clone())
            .collect()
    }
}

/// Builds the symmetric graph on `num_nodes` nodes in which two nodes are adjacent if they
/// appear together in one of the given lists.
///
/// Every node is adjacent to itself. Entries of a list for which `node_index` returns
/// `None` are ignored, which restricts the graph to a subset of the indices.
pub fn dof_graph<'a, I, F>(num_nodes: usize, lists: I, node_index: F) -> SparsityPattern
where
    I: IntoIterator<Item = &'a [usize]>,
    F: Fn(usize) -> Option<usize>,
{
    let mut adjacency = vec![BTreeSet::new(); num_nodes];
    let mut nodes = Vec::new();
    for list in lists {
        nodes.clear();
        nodes.extend(list.iter().filter_map(|&index| node_index(index)));
        for &i in &nodes {
            adjacency[i].extend(nodes.iter().copied());
        }
    }
    for (i, neighbors) in adjacency.iter_mut().enumerate() {
        neighbors.insert(i);
    }

    let mut offsets = Vec::with_capacity(num_nodes + 1);
    let mut indices = Vec::new();
    offsets.push(0);
    for neighbors in adjacency {
        indices.extend(neighbors);
        offsets.push(indices.len());
    }
    SparsityPattern::try_from_offsets_and_indices(num_nodes, num_nodes, offsets, indices)
        .expect("Internal error: Dof graph must be a valid sparsity pattern")
}

/// Create a vertex permutation for a sparse symmetric matrix using the Cuthill-McKee algorithm.
pub fn cuthill_mckee(sparsity_pattern: &SparsityPattern) -> Permutation {
    assert_eq!(
        sparsity_pattern.major_dim(),
        sparsity_pattern.minor_dim(),
        "Matrix must be square."
    );
    let n = sparsity_pattern.major_dim();

    let adjacent_vertices = |vertex_idx| sparsity_pattern.lane(vertex_idx);
    let vertex_degree = |vertex_idx| adjacent_vertices(vertex_idx).len();

    let mut queue = VecDeque::new();
    let mut permutation = Vec::with_capacity(n);
    let mut visited = vec![false; n];

    let mut adjacency_workspace = Vec::new();

    // Graphs with several connected components are handled by restarting the search from the
    // unvisited vertex of least degree. Candidates are visited in order of degree, so each
    // restart finds its start vertex without rescanning the whole graph.
    let mut start_candidates: Vec<usize> = (0..n).collect();
    start_candidates.sort_by_key(|&vertex_idx| vertex_degree(vertex_idx));

    for start_vertex in start_candidates {
        if visited[start_vertex] {
            continue;
        }
        queue.push_back(start_vertex);
        visited[start_vertex] = true;

        while let Some(vertex) = queue.pop_front() {
            adjacency_workspace.clear();
            adjacency_workspace.extend(adjacent_vertices(vertex));
            adjacency_workspace.sort_by_key(|idx| vertex_degree(*idx));

            permutation.push(vertex);

            // Cuthill-McKee is essentially just a breadth-first search in which
            // the neighbors are visited in sorted order from lowest to highest
            // vertex degree
            for &adjacent_vertex in &adjacency_workspace {
                if !visited[adjacent_vertex] {
                    visited[adjacent_vertex] = true;
                    queue.push_back(adjacent_vertex);
                }
            }
        }
    }

    assert_eq!(permutation.len(), n, "Internal error: Permutation has invalid length");
    Permutation::from_vec(permutation).expect("Internal error: Constructed permutation is invalid")
}

/// Create a vertex permutation for a sparse symmetric matrix using the Reverse Cuthill-McKee (RCM)
/// algorithm.
pub fn reverse_cuthill_mckee(sparsity_pattern: &SparsityPattern) -> Permutation {
    let mut perm = cuthill_mckee(sparsity_pattern);
    perm.reverse();
    perm
}
