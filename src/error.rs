//! Errors reported by dof map construction and assembly.
use thiserror::Error;

/// Errors that abort dof map construction or assembly.
///
/// Per-entity anomalies (no integral selected for a subdomain, an empty local dof list)
/// are not errors: the affected entity is skipped.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The form, its arguments, its coefficients, the mesh or a pre-existing tensor disagree.
    #[error("form mismatch: {0}")]
    FormMismatch(String),
    #[error("mesh is not correctly ordered, consider calling Mesh::order()")]
    MeshNotOrdered,
    #[error("assembly over interior facets is not supported when running on {num_processes} processes")]
    UnsupportedParallelInteriorFacets { num_processes: usize },
    #[error("missing boundary data: {0}")]
    MissingBoundaryData(String),
    #[error("graph partitioner '{partitioner}' requires at least one local graph node, but process {rank} has none")]
    GraphPartitionInfeasible { partitioner: &'static str, rank: usize },
    /// The backend was asked to add to an entry that was never declared in its sparsity pattern.
    #[error("entry ({row}, {col}) is not part of the sparsity pattern")]
    SparsityViolation { row: usize, col: usize },
    #[error("communication failure: {0}")]
    Communication(String),
    #[error("inconsistent dof ownership: {0}")]
    InconsistentOwnership(String),
    #[error("local tensor kernel failed: {0}")]
    Kernel(eyre::Report),
}

impl From<eyre::Report> for AssemblyError {
    fn from(report: eyre::Report) -> Self {
        AssemblyError::Kernel(report)
    }
}

pub(crate) fn form_mismatch(message: impl Into<String>) -> AssemblyError {
    AssemblyError::FormMismatch(message.into())
}
