use crate::error::{form_mismatch, AssemblyError};
use crate::form::{Form, IntegralKind};
use crate::sparsity::{IntegralFlags, SparsityPatternBuilder};
use crate::tensor::{GlobalTensor, TensorLayout};
use crate::Real;
use serde::{Deserialize, Serialize};

/// Settings shared by all assemblers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerOptions {
    /// Add to the existing values of the global tensor instead of zeroing it first.
    pub add_values: bool,
    /// Call [`apply`](GlobalTensor::apply) on the global tensor after assembly.
    pub finalize_tensor: bool,
    /// Declare the diagonal of newly allocated matrices even where no integral contributes.
    pub keep_diagonal: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            add_values: false,
            finalize_tensor: true,
            keep_diagonal: false,
        }
    }
}

impl AssemblerOptions {
    pub fn with_add_values(self, add_values: bool) -> Self {
        Self { add_values, ..self }
    }

    pub fn with_finalize_tensor(self, finalize_tensor: bool) -> Self {
        Self {
            finalize_tensor,
            ..self
        }
    }

    pub fn with_keep_diagonal(self, keep_diagonal: bool) -> Self {
        Self { keep_diagonal, ..self }
    }
}

/// Checks that a form is ready to be assembled on its mesh.
pub fn check<T: Real>(form: &Form<T>) -> Result<(), AssemblyError> {
    let specs = form.coefficient_specs();
    let coefficients = form.coefficients();
    if coefficients.len() != specs.len() {
        return Err(form_mismatch(format!(
            "form expects {} coefficients, but {} were supplied",
            specs.len(),
            coefficients.len()
        )));
    }
    for (i, (spec, coefficient)) in specs.iter().zip(coefficients.iter().copied()).enumerate() {
        let coefficient = coefficient.ok_or_else(|| form_mismatch(format!("coefficient {i} ('{}') is not set", spec.name)))?;
        let shape = coefficient.value_shape();
        if shape.len() != spec.value_shape.len() {
            return Err(form_mismatch(format!(
                "coefficient {i} ('{}') has value rank {}, but the form expects rank {}",
                spec.name,
                shape.len(),
                spec.value_shape.len()
            )));
        }
        if shape != spec.value_shape.as_slice() {
            return Err(form_mismatch(format!(
                "coefficient {i} ('{}') has value shape {:?}, but the form expects {:?}",
                spec.name, shape, spec.value_shape
            )));
        }
    }

    let mesh = form.mesh();
    if mesh.cell_type() != form.cell_type() {
        return Err(form_mismatch(format!(
            "form expects {:?} cells, but the mesh consists of {:?} cells",
            form.cell_type(),
            mesh.cell_type()
        )));
    }
    for (i, dofmap) in form.arguments().iter().enumerate() {
        if dofmap.num_cells() != mesh.num_cells() {
            return Err(form_mismatch(format!(
                "dof map of argument {i} is defined on {} cells, but the mesh has {} cells",
                dofmap.num_cells(),
                mesh.num_cells()
            )));
        }
    }

    if !mesh.ordered() {
        return Err(AssemblyError::MeshNotOrdered);
    }
    Ok(())
}

/// Prepares the global tensor for assembling `form`.
///
/// An uninitialized tensor is allocated from the sizes and ownership ranges of the form's
/// arguments (and the sparsity pattern of the form, if the backend needs it). An initialized
/// tensor must already have the right size. Unless `options.add_values` is set, the tensor is
/// zeroed.
pub fn init_global_tensor<T, A>(tensor: &mut A, form: &Form<T>, options: &AssemblerOptions) -> Result<(), AssemblyError>
where
    T: Real,
    A: ?Sized + GlobalTensor<T>,
{
    let rank = form.rank();
    if tensor.rank() != rank {
        return Err(form_mismatch(format!(
            "cannot assemble a rank {rank} form into a rank {} tensor",
            tensor.rank()
        )));
    }

    if !tensor.is_initialized() {
        let arguments = form.arguments();
        let sparsity = if rank == 2 && tensor.requires_sparsity_pattern() {
            SparsityPatternBuilder::build_for_mesh(
                form.mesh(),
                arguments,
                IntegralFlags::of(form),
                options.keep_diagonal,
            )?
            .map(|sparsity| sparsity.pattern)
        } else {
            None
        };
        let layout = TensorLayout {
            global_dimensions: arguments.iter().map(|d| d.global_dimension()).collect(),
            local_ranges: arguments.iter().map(|d| d.ownership_range()).collect(),
            sparsity,
        };
        tensor.init(&layout)?;
    } else {
        for (dim, dofmap) in form.arguments().iter().enumerate() {
            if tensor.size(dim) != dofmap.global_dimension() {
                return Err(form_mismatch(format!(
                    "tensor has size {} along dimension {dim}, but the form needs {}",
                    tensor.size(dim),
                    dofmap.global_dimension()
                )));
            }
        }
    }

    if !options.add_values {
        tensor.zero();
    }
    Ok(())
}

/// A progress message such as "Assembling matrix over cells".
pub fn progress_message(rank: usize, kind: IntegralKind) -> String {
    let tensor = match rank {
        0 => "scalar value".to_string(),
        1 => "vector".to_string(),
        2 => "matrix".to_string(),
        r => format!("rank {r} tensor"),
    };
    format!("Assembling {tensor} over {kind}")
}
