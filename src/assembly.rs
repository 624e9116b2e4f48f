//! Assembly of global tensors from forms.
//!
//! [`Assembler`] visits the cells, exterior facets and interior facets of a mesh and
//! scatters local tensors into a [`GlobalTensor`](crate::tensor::GlobalTensor).
//! [`SystemAssembler`] assembles a matrix and a vector together while eliminating Dirichlet
//! boundary values cell by cell, and [`MultiMeshAssembler`] assembles over several
//! overlapping meshes.
mod assembler;
mod base;
mod multimesh;
mod system;

pub use assembler::*;
pub use base::*;
pub use multimesh::*;
pub use system::*;
