//! Graph partitioning of meshes across processes.
use crate::error::AssemblyError;
use crate::mesh::Mesh;
use crate::reorder::{dof_graph, reverse_cuthill_mckee};
use log::warn;
use nalgebra::Scalar;
use nalgebra_sparse::pattern::SparsityPattern;

/// Assigns each node of a graph to one of `num_parts` parts.
pub trait GraphPartitioner {
    fn name(&self) -> &'static str;

    /// Whether the partitioner fails on a process that holds no graph nodes.
    fn requires_local_nodes(&self) -> bool {
        false
    }

    fn partition(&self, graph: &SparsityPattern, num_parts: usize) -> Result<Vec<usize>, AssemblyError>;
}

/// Splits the reverse Cuthill-McKee ordering of the graph into contiguous blocks of
/// (almost) equal size.
///
/// Neighboring nodes are close in the ordering, so most blocks are connected.
#[derive(Debug, Clone, Default)]
pub struct RcmBlockPartitioner {
    require_local_nodes: bool,
}

impl RcmBlockPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the partitioner refuse empty graphs, as partitioners for distributed graphs do.
    pub fn requiring_local_nodes(self, require_local_nodes: bool) -> Self {
        Self { require_local_nodes }
    }
}

impl GraphPartitioner for RcmBlockPartitioner {
    fn name(&self) -> &'static str {
        "rcm-block"
    }

    fn requires_local_nodes(&self) -> bool {
        self.require_local_nodes
    }

    fn partition(&self, graph: &SparsityPattern, num_parts: usize) -> Result<Vec<usize>, AssemblyError> {
        assert!(num_parts > 0, "Need at least one part.");
        let n = graph.major_dim();
        let order = reverse_cuthill_mckee(graph);
        let mut parts = vec![0; n];
        for (position, &node) in order.perm().iter().enumerate() {
            parts[node] = position * num_parts / n.max(1);
        }
        Ok(parts)
    }
}

/// Deals the nodes out to the parts in turn. Works for any graph, including empty ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinPartitioner;

impl GraphPartitioner for RoundRobinPartitioner {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn partition(&self, graph: &SparsityPattern, num_parts: usize) -> Result<Vec<usize>, AssemblyError> {
        assert!(num_parts > 0, "Need at least one part.");
        Ok((0..graph.major_dim()).map(|node| node % num_parts).collect())
    }
}

/// A primary partitioner with an optional fallback for processes without local graph nodes.
pub struct PartitionerChain {
    primary: Box<dyn GraphPartitioner + Send + Sync>,
    fallback: Option<Box<dyn GraphPartitioner + Send + Sync>>,
}

impl PartitionerChain {
    pub fn new(primary: impl GraphPartitioner + Send + Sync + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: None,
        }
    }

    pub fn with_fallback(self, fallback: impl GraphPartitioner + Send + Sync + 'static) -> Self {
        Self {
            fallback: Some(Box::new(fallback)),
            ..self
        }
    }

    /// Partitions the local graph of process `rank`.
    ///
    /// Falls back to the secondary partitioner if the primary one cannot run because the
    /// graph is empty, and fails with [`AssemblyError::GraphPartitionInfeasible`] if there is
    /// no fallback.
    pub fn partition(&self, graph: &SparsityPattern, num_parts: usize, rank: usize) -> Result<Vec<usize>, AssemblyError> {
        if graph.major_dim() > 0 || !self.primary.requires_local_nodes() {
            return self.primary.partition(graph, num_parts);
        }
        match &self.fallback {
            Some(fallback) => {
                warn!(
                    "Process {rank} has no graph nodes, falling back from partitioner '{}' to '{}'.",
                    self.primary.name(),
                    fallback.name()
                );
                fallback.partition(graph, num_parts)
            }
            None => Err(AssemblyError::GraphPartitionInfeasible {
                partitioner: self.primary.name(),
                rank,
            }),
        }
    }
}

/// The graph whose nodes are the cells of the mesh, with cells adjacent if they share a facet.
///
/// As with dof graphs, every node is adjacent to itself.
pub fn cell_dual_graph<T: Scalar>(mesh: &Mesh<T>) -> SparsityPattern {
    let facet_cells: Vec<&[usize]> = (0..mesh.num_facets())
        .map(|facet| mesh.facet_cells(facet))
        .collect();
    dof_graph(mesh.num_cells(), facet_cells, Some)
}

/// Computes a cell partition of `mesh` into `num_parts` parts on process `rank`.
pub fn partition_mesh<T: Scalar>(
    mesh: &Mesh<T>,
    partitioner: &PartitionerChain,
    num_parts: usize,
    rank: usize,
) -> Result<Vec<usize>, AssemblyError> {
    partitioner.partition(&cell_dual_graph(mesh), num_parts, rank)
}
