//! Global numbering of mesh entities.
use crate::comm::Communicator;
use crate::element::ElementDofLayout;
use crate::error::AssemblyError;
use crate::mesh::Mesh;
use nalgebra::Scalar;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Global indices of the local entities of every dimension that carries dofs.
#[derive(Debug, Clone)]
pub(crate) struct EntityNumbering {
    /// `global_indices[d][e]`: the global index of local entity `e` of dimension `d`.
    /// Empty for dimensions without dofs.
    pub global_indices: Vec<Vec<usize>>,
    /// The global number of entities of each dimension (zero for dimensions without dofs).
    pub counts: Vec<usize>,
    /// `sharing[d]`: for local entities of dimension `d` that also exist on other
    /// processes, the ranks of those processes.
    pub sharing: Vec<FxHashMap<usize, Vec<usize>>>,
}

impl EntityNumbering {
    /// Entities of a mesh that is not distributed are numbered as in the mesh.
    pub fn serial<T: Scalar>(mesh: &Mesh<T>, layout: &ElementDofLayout) -> Self {
        let tdim = mesh.tdim();
        let mut global_indices = vec![Vec::new(); tdim + 1];
        let mut counts = vec![0; tdim + 1];
        for d in 0..=tdim {
            if layout.needs_mesh_entities(d) {
                global_indices[d] = (0..mesh.num_entities(d)).collect();
                counts[d] = mesh.num_entities(d);
            }
        }
        Self {
            global_indices,
            counts,
            sharing: vec![FxHashMap::default(); tdim + 1],
        }
    }

    /// Numbers the entities of a distributed mesh consistently across all processes.
    ///
    /// Entities are identified by their sorted global vertex indices. Every process gathers
    /// the keys of all processes; the position of a key in the sorted union of keys is the
    /// global index of the entity, and the processes contributing the same key share it.
    pub fn distributed<T, C>(mesh: &Mesh<T>, layout: &ElementDofLayout, comm: &C) -> Result<Self, AssemblyError>
    where
        T: Scalar,
        C: Communicator,
    {
        let tdim = mesh.tdim();
        let rank = comm.rank();
        let mut numbering = Self {
            global_indices: vec![Vec::new(); tdim + 1],
            counts: vec![0; tdim + 1],
            sharing: vec![FxHashMap::default(); tdim + 1],
        };

        for d in 0..=tdim {
            if !layout.needs_mesh_entities(d) {
                continue;
            }

            let local_keys: Vec<Vec<usize>> = (0..mesh.num_entities(d))
                .map(|e| mesh.entity_key(d, e))
                .collect();
            let send: Vec<u64> = local_keys.iter().flatten().map(|&v| v as u64).collect();
            let gathered = comm.all_gather(&send)?;

            let key_len = d + 1;
            let mut holders: BTreeMap<Vec<usize>, BTreeSet<usize>> = BTreeMap::new();
            for (process, keys) in gathered.iter().enumerate() {
                if keys.len() % key_len != 0 {
                    return Err(AssemblyError::Communication(format!(
                        "received malformed entity keys of dimension {d} from process {process}"
                    )));
                }
                for key in keys.chunks_exact(key_len) {
                    let key = key.iter().map(|&v| v as usize).collect();
                    holders.entry(key).or_default().insert(process);
                }
            }

            let global_index: FxHashMap<&[usize], usize> = holders
                .keys()
                .enumerate()
                .map(|(index, key)| (key.as_slice(), index))
                .collect();

            let mut indices = Vec::with_capacity(local_keys.len());
            for (e, key) in local_keys.iter().enumerate() {
                indices.push(global_index[key.as_slice()]);
                let processes = &holders[key];
                if processes.len() > 1 {
                    let others = processes.iter().copied().filter(|&p| p != rank).collect();
                    numbering.sharing[d].insert(e, others);
                }
            }

            numbering.global_indices[d] = indices;
            numbering.counts[d] = holders.len();
        }

        Ok(numbering)
    }

    /// The global indices of the entities of dimension `dim` of `cell`, in reference order.
    pub fn cell_entity_indices_into<T: Scalar>(&self, mesh: &Mesh<T>, dim: usize, cell: usize, output: &mut Vec<usize>) {
        output.clear();
        let global = &self.global_indices[dim];
        if !global.is_empty() {
            output.extend(mesh.cell_entities(dim, cell).iter().map(|&e| global[e]));
        }
    }
}
