//! Degree-of-freedom maps.
//!
//! A [`DofMap`] maps the local dofs of every cell to global dof indices. On a distributed
//! mesh each process holds the dofs of its own cells; the global indices are numbered so
//! that each process owns one contiguous range, and dofs that appear locally but belong
//! to another process record their owner.
use crate::comm::Communicator;
use crate::connectivity::Connectivity;
use crate::element::ElementDofLayout;
use crate::error::{form_mismatch, AssemblyError};
use crate::mesh::Mesh;
use itertools::izip;
use nalgebra::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

mod builder;
mod cache;
mod numbering;

pub use builder::*;
pub use cache::*;

/// Which process owns which dofs, and which dofs are shared with other processes.
///
/// Shared between a dof map and all sub-dofmap views extracted from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofOwnership {
    rank: usize,
    num_processes: usize,
    ownership_range: Range<usize>,
    off_process_owner: BTreeMap<usize, usize>,
    shared_dofs: BTreeMap<usize, BTreeSet<usize>>,
}

impl DofOwnership {
    pub(crate) fn serial(global_dimension: usize) -> Self {
        Self {
            rank: 0,
            num_processes: 1,
            ownership_range: 0..global_dimension,
            off_process_owner: BTreeMap::new(),
            shared_dofs: BTreeMap::new(),
        }
    }

    pub(crate) fn distributed(
        rank: usize,
        num_processes: usize,
        ownership_range: Range<usize>,
        off_process_owner: BTreeMap<usize, usize>,
        shared_dofs: BTreeMap<usize, BTreeSet<usize>>,
    ) -> Self {
        Self {
            rank,
            num_processes,
            ownership_range,
            off_process_owner,
            shared_dofs,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_processes(&self) -> usize {
        self.num_processes
    }

    pub fn ownership_range(&self) -> Range<usize> {
        self.ownership_range.clone()
    }

    pub fn off_process_owner(&self) -> &BTreeMap<usize, usize> {
        &self.off_process_owner
    }

    pub fn shared_dofs(&self) -> &BTreeMap<usize, BTreeSet<usize>> {
        &self.shared_dofs
    }

    /// Shifts every dof index by `offset`.
    fn shifted(&self, offset: usize) -> Self {
        Self {
            rank: self.rank,
            num_processes: self.num_processes,
            ownership_range: self.ownership_range.start + offset..self.ownership_range.end + offset,
            off_process_owner: self
                .off_process_owner
                .iter()
                .map(|(&dof, &owner)| (dof + offset, owner))
                .collect(),
            shared_dofs: self
                .shared_dofs
                .iter()
                .map(|(&dof, processes)| (dof + offset, processes.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DofMap {
    layout: ElementDofLayout,
    entity_counts: Vec<usize>,
    cell_dofs: Connectivity,
    global_dimension: usize,
    ownership: Arc<DofOwnership>,
    is_view: bool,
}

impl DofMap {
    pub(crate) fn new(
        layout: ElementDofLayout,
        entity_counts: Vec<usize>,
        cell_dofs: Connectivity,
        global_dimension: usize,
        ownership: DofOwnership,
    ) -> Self {
        Self {
            layout,
            entity_counts,
            cell_dofs,
            global_dimension,
            ownership: Arc::new(ownership),
            is_view: false,
        }
    }

    pub fn layout(&self) -> &ElementDofLayout {
        &self.layout
    }

    /// The global number of entities of each dimension the dofs were tabulated from.
    pub fn entity_counts(&self) -> &[usize] {
        &self.entity_counts
    }

    pub fn num_cells(&self) -> usize {
        self.cell_dofs.len()
    }

    /// The global dofs of `cell`, in local dof order.
    pub fn cell_dofs(&self, cell: usize) -> &[usize] {
        self.cell_dofs.list(cell)
    }

    pub fn cell_dofs_iter(&self) -> impl '_ + ExactSizeIterator<Item = &[usize]> {
        self.cell_dofs.iter()
    }

    pub fn max_cell_dimension(&self) -> usize {
        self.cell_dofs.max_list_len()
    }

    /// The total number of dofs across all processes.
    pub fn global_dimension(&self) -> usize {
        self.global_dimension
    }

    pub fn ownership(&self) -> &Arc<DofOwnership> {
        &self.ownership
    }

    pub fn ownership_range(&self) -> Range<usize> {
        self.ownership.ownership_range()
    }

    pub fn off_process_owner(&self) -> &BTreeMap<usize, usize> {
        self.ownership.off_process_owner()
    }

    pub fn shared_dofs(&self) -> &BTreeMap<usize, BTreeSet<usize>> {
        self.ownership.shared_dofs()
    }

    pub fn is_owned(&self, dof: usize) -> bool {
        self.ownership.ownership_range.contains(&dof)
    }

    /// The rank of the process owning `dof`, if the dof is known to this process.
    pub fn owner(&self, dof: usize) -> Option<usize> {
        if self.is_owned(dof) {
            Some(self.ownership.rank)
        } else {
            self.off_process_owner().get(&dof).copied()
        }
    }

    /// Non-owned dofs referenced by local cells, sorted.
    pub fn ghosts(&self) -> Vec<usize> {
        self.off_process_owner().keys().copied().collect()
    }

    /// Whether this dof map aliases the numbering of a parent dof map.
    pub fn is_view(&self) -> bool {
        self.is_view
    }

    /// Local positions of the dofs on a local entity of a cell.
    pub fn tabulate_entity_dofs(&self, dim: usize, local_entity: usize) -> Vec<usize> {
        self.layout.tabulate_entity_dofs(dim, local_entity)
    }

    /// Local positions of the dofs in the closure of a local facet of a cell.
    pub fn tabulate_facet_dofs(&self, local_facet: usize) -> Vec<usize> {
        self.layout.tabulate_facet_dofs(local_facet)
    }

    /// Extracts the dofs of a (possibly nested) sub-element as a view.
    ///
    /// The view keeps the global numbering of this dof map and shares its ownership data.
    pub fn extract_sub_dofmap(&self, component: &[usize]) -> Result<DofMap, AssemblyError> {
        let (offset, sub_layout) = self
            .layout
            .sub_layout(component)
            .ok_or_else(|| form_mismatch(format!("dof layout has no sub-element {component:?}")))?;
        let n = sub_layout.local_dimension();
        let cell_dofs = self
            .cell_dofs
            .iter()
            .map(|dofs| &dofs[offset..offset + n])
            .collect();
        Ok(DofMap {
            layout: sub_layout.clone(),
            entity_counts: self.entity_counts.clone(),
            cell_dofs,
            global_dimension: sub_layout.global_dimension(&self.entity_counts),
            ownership: Arc::clone(&self.ownership),
            is_view: true,
        })
    }

    /// Builds a dof map with contiguous numbering for the layout of this (view) dof map.
    ///
    /// Returns the new dof map together with the map from its dofs to the dofs of `self`
    /// for all locally referenced dofs.
    pub fn collapse<T, C>(
        &self,
        mesh: &Mesh<T>,
        comm: &C,
        builder: &DofMapBuilder,
    ) -> Result<(DofMap, BTreeMap<usize, usize>), AssemblyError>
    where
        T: Scalar,
        C: Communicator,
    {
        let collapsed = builder.build(&self.layout, mesh, comm)?;
        if collapsed.num_cells() != self.num_cells() {
            return Err(form_mismatch(format!(
                "cannot collapse a dof map with {} cells on a mesh with {} cells",
                self.num_cells(),
                collapsed.num_cells()
            )));
        }
        let mut collapsed_to_parent = BTreeMap::new();
        for (new_dofs, old_dofs) in izip!(collapsed.cell_dofs_iter(), self.cell_dofs_iter()) {
            for (&new, &old) in izip!(new_dofs, old_dofs) {
                collapsed_to_parent.insert(new, old);
            }
        }
        Ok((collapsed, collapsed_to_parent))
    }

    /// A copy of this dof map in which every dof index is shifted by `offset`.
    pub(crate) fn shifted(&self, offset: usize) -> DofMap {
        let mut cell_dofs = self.cell_dofs.clone();
        cell_dofs.map_indices(|dof| dof + offset);
        DofMap {
            layout: self.layout.clone(),
            entity_counts: self.entity_counts.clone(),
            cell_dofs,
            global_dimension: self.global_dimension,
            ownership: Arc::new(self.ownership.shifted(offset)),
            is_view: self.is_view,
        }
    }

    /// Checks that every cell has the local dimension of the layout and that every dof
    /// referenced locally is either owned or has a known owner.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let local_dimension = self.layout.local_dimension();
        for (cell, dofs) in self.cell_dofs.iter().enumerate() {
            if dofs.len() != local_dimension {
                return Err(AssemblyError::InconsistentOwnership(format!(
                    "cell {cell} has {} dofs, expected {local_dimension}",
                    dofs.len()
                )));
            }
            if let Some(dof) = dofs.iter().find(|&&dof| self.owner(dof).is_none()) {
                return Err(AssemblyError::InconsistentOwnership(format!(
                    "dof {dof} on cell {cell} is neither owned nor has a known owner"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DofMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = self.ownership_range();
        write!(
            f,
            "DofMap of global dimension {} on {} cells, owning [{}, {}) on process {} of {}, \
             {} ghosts, {} shared dofs{}",
            self.global_dimension,
            self.num_cells(),
            range.start,
            range.end,
            self.ownership.rank,
            self.ownership.num_processes,
            self.off_process_owner().len(),
            self.shared_dofs().len(),
            if self.is_view { " (view)" } else { "" }
        )
    }
}
