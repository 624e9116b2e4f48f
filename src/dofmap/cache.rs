use crate::comm::Communicator;
use crate::dofmap::{DofMap, DofMapBuilder};
use crate::element::ElementDofLayout;
use crate::error::AssemblyError;
use crate::mesh::Mesh;
use log::debug;
use nalgebra::Scalar;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifies a dof map by the hash of its dof layout and the hash of the mesh topology.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DofMapKey {
    pub layout_hash: u64,
    pub mesh_hash: u64,
}

impl DofMapKey {
    pub fn new<T: Scalar>(layout: &ElementDofLayout, mesh: &Mesh<T>) -> Self {
        let mut hasher = FxHasher::default();
        layout.hash(&mut hasher);
        Self {
            layout_hash: hasher.finish(),
            mesh_hash: mesh.topology_hash(),
        }
    }
}

/// Reuses dof maps built for the same layout on the same mesh.
///
/// All entries are built by the same [`DofMapBuilder`], so a key determines the dof map.
#[derive(Debug, Default)]
pub struct DofMapCache {
    builder: DofMapBuilder,
    entries: FxHashMap<DofMapKey, Arc<DofMap>>,
}

impl DofMapCache {
    pub fn new(builder: DofMapBuilder) -> Self {
        Self {
            builder,
            entries: FxHashMap::default(),
        }
    }

    pub fn builder(&self) -> &DofMapBuilder {
        &self.builder
    }

    pub fn get<T: Scalar>(&self, layout: &ElementDofLayout, mesh: &Mesh<T>) -> Option<Arc<DofMap>> {
        self.entries.get(&DofMapKey::new(layout, mesh)).cloned()
    }

    /// Returns the cached dof map of `layout` on `mesh`, building it first if necessary.
    ///
    /// Collective on `comm` whenever the dof map is not cached yet. Since every process
    /// caches the same keys, either all processes build or none do.
    pub fn get_or_build<T, C>(
        &mut self,
        layout: &ElementDofLayout,
        mesh: &Mesh<T>,
        comm: &C,
    ) -> Result<Arc<DofMap>, AssemblyError>
    where
        T: Scalar,
        C: Communicator,
    {
        let key = DofMapKey::new(layout, mesh);
        if let Some(dofmap) = self.entries.get(&key) {
            debug!("Reusing cached dof map for {:?}", key);
            return Ok(Arc::clone(dofmap));
        }
        let dofmap = Arc::new(self.builder.build(layout, mesh, comm)?);
        self.entries.insert(key, Arc::clone(&dofmap));
        Ok(dofmap)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
