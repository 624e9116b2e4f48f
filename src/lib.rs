use nalgebra::RealField;

pub mod assembly;
pub mod comm;
pub mod connectivity;
pub mod dofmap;
pub mod element;
pub mod error;
pub mod form;
pub mod mesh;
pub mod partition;
pub mod reorder;
pub mod sparsity;
pub mod tensor;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// A real scalar type.
///
/// Used as a trait alias for the traits needed by numeric routines in this crate.
pub trait Real: RealField + Copy {}

impl<T> Real for T where T: RealField + Copy {}
