use crate::comm::Communicator;
use crate::connectivity::Connectivity;
use crate::dofmap::numbering::EntityNumbering;
use crate::dofmap::{DofMap, DofOwnership};
use crate::element::ElementDofLayout;
use crate::error::{form_mismatch, AssemblyError};
use crate::mesh::Mesh;
use crate::reorder::{dof_graph, reverse_cuthill_mckee, Permutation};
use log::{debug, info};
use nalgebra::Scalar;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// How a process draws its ownership votes for dofs on inter-process boundaries.
#[derive(Clone, Default)]
pub enum VoteSource {
    /// Pseudo-random votes from a generator seeded with the process rank.
    #[default]
    Seeded,
    /// Votes computed from `(rank, dof)`, where `dof` is the index before renumbering.
    Custom(Arc<dyn Fn(usize, usize) -> u64 + Send + Sync>),
}

impl fmt::Debug for VoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteSource::Seeded => write!(f, "Seeded"),
            VoteSource::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Builds dof maps from a dof layout and a (possibly distributed) mesh.
#[derive(Debug, Clone)]
pub struct DofMapBuilder {
    reorder: bool,
    votes: VoteSource,
}

impl Default for DofMapBuilder {
    fn default() -> Self {
        Self {
            reorder: true,
            votes: VoteSource::Seeded,
        }
    }
}

/// Dof sets computed while resolving ownership on a distributed mesh.
#[derive(Debug, Default)]
struct OwnershipSets {
    owned: BTreeSet<usize>,
    shared_owned: BTreeSet<usize>,
    shared_unowned: BTreeSet<usize>,
    /// Other processes referencing each shared dof.
    sharing: BTreeMap<usize, BTreeSet<usize>>,
}

impl DofMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether dofs are relabeled with reverse Cuthill-McKee for locality (default: true).
    pub fn with_reordering(self, reorder: bool) -> Self {
        Self { reorder, ..self }
    }

    pub fn with_votes(self, votes: VoteSource) -> Self {
        Self { votes, ..self }
    }

    pub fn reorders(&self) -> bool {
        self.reorder
    }

    /// Builds the dof map of `layout` on the local part of `mesh`.
    ///
    /// On more than one process this is a collective operation: every process of `comm` must
    /// call it with the same layout.
    pub fn build<T, C>(&self, layout: &ElementDofLayout, mesh: &Mesh<T>, comm: &C) -> Result<DofMap, AssemblyError>
    where
        T: Scalar,
        C: Communicator,
    {
        if layout.cell_type() != mesh.cell_type() {
            return Err(form_mismatch(format!(
                "dof layout is defined on {:?} cells, but the mesh consists of {:?} cells",
                layout.cell_type(),
                mesh.cell_type()
            )));
        }
        if mesh.num_processes() != comm.size() {
            return Err(AssemblyError::Communication(format!(
                "mesh is distributed over {} processes, but the communicator has {}",
                mesh.num_processes(),
                comm.size()
            )));
        }

        let dofmap = if comm.size() == 1 {
            self.build_serial(layout, mesh)
        } else {
            self.build_distributed(layout, mesh, comm)?
        };
        info!("Built {}", dofmap);
        Ok(dofmap)
    }

    fn build_serial<T: Scalar>(&self, layout: &ElementDofLayout, mesh: &Mesh<T>) -> DofMap {
        let numbering = EntityNumbering::serial(mesh, layout);
        let mut cell_dofs = tabulate_cell_dofs(layout, mesh, &numbering);
        let global_dimension = layout.global_dimension(&numbering.counts);

        if self.reorder {
            let graph = dof_graph(global_dimension, cell_dofs.iter(), Some);
            // perm maps new indices to old ones, its inverse maps old to new
            let old_to_new = reverse_cuthill_mckee(&graph).inverse();
            cell_dofs.map_indices(|dof| old_to_new.source_index(dof));
        }

        DofMap::new(
            layout.clone(),
            numbering.counts,
            cell_dofs,
            global_dimension,
            DofOwnership::serial(global_dimension),
        )
    }

    fn build_distributed<T, C>(&self, layout: &ElementDofLayout, mesh: &Mesh<T>, comm: &C) -> Result<DofMap, AssemblyError>
    where
        T: Scalar,
        C: Communicator,
    {
        let numbering = EntityNumbering::distributed(mesh, layout, comm)?;
        let mut cell_dofs = tabulate_cell_dofs(layout, mesh, &numbering);
        let global_dimension = layout.global_dimension(&numbering.counts);

        let sets = self.compute_ownership(layout, mesh, &numbering, &cell_dofs, comm)?;

        let num_owned_total = comm.all_reduce_sum(sets.owned.len() as u64)? as usize;
        if num_owned_total != global_dimension {
            return Err(AssemblyError::InconsistentOwnership(format!(
                "processes own {num_owned_total} dofs in total, but the global dimension is {global_dimension}"
            )));
        }

        let (old_to_new, ownership) = self.parallel_renumber(&sets, &cell_dofs, comm)?;
        cell_dofs.map_indices(|dof| old_to_new[&dof]);

        Ok(DofMap::new(
            layout.clone(),
            numbering.counts,
            cell_dofs,
            global_dimension,
            ownership,
        ))
    }

    /// Decides which process owns each dof referenced by more than one process.
    ///
    /// Dofs not associated with any entity belong to process 0. Every other shared dof goes
    /// to the sharing process with the smallest `(vote, rank)` pair: a process gives up a dof
    /// as soon as it receives a smaller pair for it. The smallest pair is unique because ranks
    /// are, so all processes agree on the owner however many of them share the dof.
    fn compute_ownership<T, C>(
        &self,
        layout: &ElementDofLayout,
        mesh: &Mesh<T>,
        numbering: &EntityNumbering,
        cell_dofs: &Connectivity,
        comm: &C,
    ) -> Result<OwnershipSets, AssemblyError>
    where
        T: Scalar,
        C: Communicator,
    {
        let rank = comm.rank();
        let size = comm.size();
        let tdim = mesh.tdim();
        let mut sets = OwnershipSets::default();

        // Dofs on entities that other processes also hold
        let entity_dof_positions: Vec<Vec<Vec<usize>>> = (0..=tdim)
            .map(|d| {
                (0..mesh.cell_type().num_entities(d))
                    .map(|e| layout.tabulate_entity_dofs(d, e))
                    .collect()
            })
            .collect();
        for cell in 0..mesh.num_cells() {
            let dofs = cell_dofs.list(cell);
            for d in (0..=tdim).filter(|&d| layout.needs_mesh_entities(d)) {
                for (local_entity, entity) in mesh.cell_entities(d, cell).iter().enumerate() {
                    if let Some(processes) = numbering.sharing[d].get(entity) {
                        for &position in &entity_dof_positions[d][local_entity] {
                            sets.sharing
                                .entry(dofs[position])
                                .or_default()
                                .extend(processes.iter().copied());
                        }
                    }
                }
            }
        }

        let global_dofs = layout.global_dofs(&numbering.counts);
        let others: BTreeSet<usize> = (0..size).filter(|&p| p != rank).collect();
        if rank == 0 {
            sets.owned.extend(global_dofs.iter().copied());
            sets.shared_owned.extend(global_dofs.iter().copied());
        } else if mesh.num_cells() > 0 {
            sets.shared_unowned.extend(global_dofs.iter().copied());
        }
        for &dof in &global_dofs {
            sets.sharing.insert(dof, others.clone());
        }

        let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);
        let mut votes = BTreeMap::new();
        for &dof in sets.sharing.keys() {
            if global_dofs.contains(&dof) {
                continue;
            }
            let vote = match &self.votes {
                VoteSource::Seeded => rng.gen::<u64>(),
                VoteSource::Custom(vote) => vote(rank, dof),
            };
            votes.insert(dof, vote);
            sets.shared_owned.insert(dof);
        }

        let send: Vec<u64> = votes
            .iter()
            .flat_map(|(&dof, &vote)| [dof as u64, vote])
            .collect();
        comm.exchange_round_robin(&send, |source, received| {
            for pair in received.chunks_exact(2) {
                let dof = pair[0] as usize;
                let remote_vote = pair[1];
                if let Some(&local_vote) = votes.get(&dof) {
                    sets.sharing.entry(dof).or_default().insert(source);
                    if (remote_vote, source) < (local_vote, rank) && sets.shared_owned.remove(&dof) {
                        sets.shared_unowned.insert(dof);
                    }
                }
            }
            Ok(())
        })?;

        for &dof in cell_dofs.indices() {
            if !sets.shared_unowned.contains(&dof) {
                sets.owned.insert(dof);
            }
        }

        debug!(
            "Process {rank}: {} owned dofs, {} shared and owned, {} shared and not owned",
            sets.owned.len(),
            sets.shared_owned.len(),
            sets.shared_unowned.len()
        );
        Ok(sets)
    }

    /// Numbers the owned dofs of each process contiguously and tells the sharing processes
    /// the new indices of their shared dofs.
    ///
    /// Returns the map from old to new dof indices of every locally referenced dof.
    fn parallel_renumber<C: Communicator>(
        &self,
        sets: &OwnershipSets,
        cell_dofs: &Connectivity,
        comm: &C,
    ) -> Result<(FxHashMap<usize, usize>, DofOwnership), AssemblyError> {
        let rank = comm.rank();
        let owned: Vec<usize> = sets.owned.iter().copied().collect();
        let position: FxHashMap<usize, usize> = owned
            .iter()
            .enumerate()
            .map(|(position, &dof)| (dof, position))
            .collect();

        let old_to_new_local = if self.reorder {
            let graph = dof_graph(owned.len(), cell_dofs.iter(), |dof| position.get(&dof).copied());
            reverse_cuthill_mckee(&graph).inverse()
        } else {
            Permutation::identity(owned.len())
        };

        let offset = comm.exclusive_prefix_sum(owned.len() as u64)? as usize;
        let mut old_to_new = FxHashMap::default();
        for (position, &dof) in owned.iter().enumerate() {
            old_to_new.insert(dof, offset + old_to_new_local.source_index(position));
        }

        let send: Vec<u64> = sets
            .shared_owned
            .iter()
            .flat_map(|dof| [*dof as u64, old_to_new[dof] as u64])
            .collect();
        let mut off_process_owner = BTreeMap::new();
        comm.exchange_round_robin(&send, |source, received| {
            for pair in received.chunks_exact(2) {
                let (old, new) = (pair[0] as usize, pair[1] as usize);
                if sets.shared_unowned.contains(&old) {
                    old_to_new.insert(old, new);
                    off_process_owner.insert(new, source);
                }
            }
            Ok(())
        })?;

        if let Some(dof) = sets
            .shared_unowned
            .iter()
            .find(|dof| !old_to_new.contains_key(dof))
        {
            return Err(AssemblyError::InconsistentOwnership(format!(
                "process {rank} received no new index for dof {dof} owned by another process"
            )));
        }

        let shared_dofs = sets
            .sharing
            .iter()
            .filter_map(|(old, processes)| Some((*old_to_new.get(old)?, processes.clone())))
            .collect();

        debug!(
            "Process {rank}: owns dofs [{offset}, {}), {} ghosts",
            offset + owned.len(),
            off_process_owner.len()
        );
        let ownership = DofOwnership::distributed(
            rank,
            comm.size(),
            offset..offset + owned.len(),
            off_process_owner,
            shared_dofs,
        );
        Ok((old_to_new, ownership))
    }
}

/// Tabulates the dofs of every cell from the global entity numbering.
fn tabulate_cell_dofs<T: Scalar>(layout: &ElementDofLayout, mesh: &Mesh<T>, numbering: &EntityNumbering) -> Connectivity {
    let tdim = mesh.tdim();
    let mut entity_buffers = vec![Vec::new(); tdim + 1];
    let mut cell_dofs = Connectivity::new();
    for cell in 0..mesh.num_cells() {
        for (d, buffer) in entity_buffers.iter_mut().enumerate() {
            numbering.cell_entity_indices_into(mesh, d, cell, buffer);
        }
        let entity_indices: Vec<&[usize]> = entity_buffers.iter().map(Vec::as_slice).collect();
        cell_dofs.push_with(|dofs| layout.tabulate_dofs(dofs, &entity_indices, &numbering.counts));
    }
    cell_dofs
}
