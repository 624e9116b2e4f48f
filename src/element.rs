//! Dof layouts of finite elements.
//!
//! An [`ElementDofLayout`] describes how many degrees of freedom an element places on each
//! topological entity of a cell and how the dofs of a cell are tabulated from global
//! entity indices. It carries no basis functions; local tensor kernels own those.
//!
//! Dofs of a single (non-mixed) layout are numbered by entity dimension first: all vertex
//! dofs, then all edge dofs and so on, followed by dofs that are not attached to any
//! entity. Within one dimension, entity `e` owns the contiguous block
//! `offset_d + k_d * e .. offset_d + k_d * (e + 1)`. The local dofs of a cell follow the same
//! order: entity dimension, then local entity index, then position on the entity.
//! Mixed layouts concatenate the numbering of their sub-layouts.
use crate::mesh::CellType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementDofLayout {
    cell_type: CellType,
    /// Number of dofs on each entity, indexed by entity dimension.
    entity_dofs: Vec<usize>,
    /// Dofs that are not associated with any mesh entity.
    num_global_dofs: usize,
    value_shape: Vec<usize>,
    sub_layouts: Vec<ElementDofLayout>,
}

fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

impl ElementDofLayout {
    /// A scalar layout with `entity_dofs[d]` dofs on every entity of dimension `d`.
    ///
    /// # Panics
    ///
    /// Panics if `entity_dofs` does not have an entry for every dimension of the cell.
    pub fn new(cell_type: CellType, entity_dofs: Vec<usize>) -> Self {
        assert_eq!(
            entity_dofs.len(),
            cell_type.dim() + 1,
            "Need dof count for every entity dimension."
        );
        Self {
            cell_type,
            entity_dofs,
            num_global_dofs: 0,
            value_shape: Vec::new(),
            sub_layouts: Vec::new(),
        }
    }

    /// Continuous Lagrange elements of the given degree.
    pub fn lagrange(cell_type: CellType, degree: usize) -> Self {
        assert!(degree >= 1, "Continuous Lagrange elements need degree at least 1.");
        // Interior lattice points of a d-simplex of the given degree
        let entity_dofs = (0..=cell_type.dim())
            .map(|d| binomial(degree - 1, d))
            .collect();
        Self::new(cell_type, entity_dofs)
    }

    /// Discontinuous Lagrange elements: all dofs belong to the cell interior.
    pub fn discontinuous_lagrange(cell_type: CellType, degree: usize) -> Self {
        let tdim = cell_type.dim();
        let mut entity_dofs = vec![0; tdim + 1];
        entity_dofs[tdim] = binomial(degree + tdim, tdim);
        Self::new(cell_type, entity_dofs)
    }

    /// A single global dof, e.g. a Lagrange multiplier for a mean value constraint.
    pub fn real(cell_type: CellType) -> Self {
        Self {
            num_global_dofs: 1,
            ..Self::new(cell_type, vec![0; cell_type.dim() + 1])
        }
    }

    /// A mixed layout whose dofs are the concatenation of the dofs of `sub_layouts`.
    ///
    /// # Panics
    ///
    /// Panics if there are no sub-layouts or if their cell types differ.
    pub fn mixed(sub_layouts: Vec<ElementDofLayout>) -> Self {
        let first = sub_layouts
            .first()
            .expect("Mixed layout needs at least one sub-layout.");
        let cell_type = first.cell_type;
        assert!(
            sub_layouts.iter().all(|sub| sub.cell_type == cell_type),
            "All sub-layouts must have the same cell type."
        );
        let mut entity_dofs = vec![0; cell_type.dim() + 1];
        for sub in &sub_layouts {
            for (total, k) in entity_dofs.iter_mut().zip(&sub.entity_dofs) {
                *total += k;
            }
        }
        let value_size = sub_layouts.iter().map(|sub| sub.value_size()).sum();
        Self {
            cell_type,
            entity_dofs,
            num_global_dofs: sub_layouts.iter().map(|sub| sub.num_global_dofs).sum(),
            value_shape: vec![value_size],
            sub_layouts,
        }
    }

    /// A vector-valued layout with `dim` copies of a scalar layout.
    pub fn vector(scalar: ElementDofLayout, dim: usize) -> Self {
        let mut layout = Self::mixed(vec![scalar; dim]);
        layout.value_shape = vec![dim];
        layout
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn value_shape(&self) -> &[usize] {
        &self.value_shape
    }

    pub fn value_rank(&self) -> usize {
        self.value_shape.len()
    }

    pub fn value_size(&self) -> usize {
        self.value_shape.iter().product()
    }

    pub fn needs_mesh_entities(&self, dim: usize) -> bool {
        self.num_entity_dofs(dim) > 0
    }

    /// The number of dofs on a single entity of dimension `dim`.
    pub fn num_entity_dofs(&self, dim: usize) -> usize {
        self.entity_dofs.get(dim).copied().unwrap_or(0)
    }

    /// The number of dofs not associated with any mesh entity.
    pub fn num_global_dofs(&self) -> usize {
        self.num_global_dofs
    }

    /// The number of dofs on a single cell.
    pub fn local_dimension(&self) -> usize {
        let entity_dofs: usize = self
            .entity_dofs
            .iter()
            .enumerate()
            .map(|(d, k)| k * self.cell_type.num_entities(d))
            .sum();
        entity_dofs + self.num_global_dofs
    }

    /// The total number of dofs given the number of entities of each dimension.
    pub fn global_dimension(&self, entity_counts: &[usize]) -> usize {
        let entity_dofs: usize = self
            .entity_dofs
            .iter()
            .enumerate()
            .map(|(d, k)| if *k > 0 { k * entity_counts[d] } else { 0 })
            .sum();
        entity_dofs + self.num_global_dofs
    }

    pub fn num_sub_elements(&self) -> usize {
        self.sub_layouts.len()
    }

    pub fn sub_element(&self, index: usize) -> Option<&ElementDofLayout> {
        self.sub_layouts.get(index)
    }

    /// Resolves a (possibly nested) component to its layout and the local offset of its
    /// dofs within the dofs of a cell of this layout.
    pub fn sub_layout(&self, component: &[usize]) -> Option<(usize, &ElementDofLayout)> {
        let mut layout = self;
        let mut offset = 0;
        for &c in component {
            let subs = &layout.sub_layouts;
            if c >= subs.len() {
                return None;
            }
            offset += subs[..c].iter().map(|sub| sub.local_dimension()).sum::<usize>();
            layout = &subs[c];
        }
        Some((offset, layout))
    }

    /// Appends the global dofs of a cell to `dofs`.
    ///
    /// `entity_indices[d]` holds the global indices of the cell's entities of dimension `d`
    /// in reference order. It may be empty for dimensions without dofs.
    pub fn tabulate_dofs(&self, dofs: &mut Vec<usize>, entity_indices: &[&[usize]], entity_counts: &[usize]) {
        self.tabulate_dofs_with_offset(dofs, entity_indices, entity_counts, 0);
    }

    fn tabulate_dofs_with_offset(
        &self,
        dofs: &mut Vec<usize>,
        entity_indices: &[&[usize]],
        entity_counts: &[usize],
        offset: usize,
    ) {
        if self.sub_layouts.is_empty() {
            let mut offset = offset;
            for (d, &k) in self.entity_dofs.iter().enumerate() {
                if k == 0 {
                    continue;
                }
                for &entity in entity_indices[d] {
                    dofs.extend((0..k).map(|j| offset + k * entity + j));
                }
                offset += k * entity_counts[d];
            }
            dofs.extend(offset..offset + self.num_global_dofs);
        } else {
            let mut offset = offset;
            for sub in &self.sub_layouts {
                sub.tabulate_dofs_with_offset(dofs, entity_indices, entity_counts, offset);
                offset += sub.global_dimension(entity_counts);
            }
        }
    }

    /// Global indices of all dofs that are not associated with a mesh entity.
    pub fn global_dofs(&self, entity_counts: &[usize]) -> Vec<usize> {
        let mut dofs = Vec::new();
        self.collect_global_dofs(&mut dofs, entity_counts, 0);
        dofs
    }

    fn collect_global_dofs(&self, dofs: &mut Vec<usize>, entity_counts: &[usize], offset: usize) {
        if self.sub_layouts.is_empty() {
            let entity_dofs = self.global_dimension(entity_counts) - self.num_global_dofs;
            let begin = offset + entity_dofs;
            dofs.extend(begin..begin + self.num_global_dofs);
        } else {
            let mut offset = offset;
            for sub in &self.sub_layouts {
                sub.collect_global_dofs(dofs, entity_counts, offset);
                offset += sub.global_dimension(entity_counts);
            }
        }
    }

    /// Local positions (within a cell's dof list) of the dofs on a single local entity.
    pub fn tabulate_entity_dofs(&self, dim: usize, local_entity: usize) -> Vec<usize> {
        let mut positions = Vec::new();
        self.collect_entity_dofs(&mut positions, dim, local_entity, 0);
        positions
    }

    fn collect_entity_dofs(&self, positions: &mut Vec<usize>, dim: usize, local_entity: usize, offset: usize) {
        if self.sub_layouts.is_empty() {
            let k = self.num_entity_dofs(dim);
            let dim_offset: usize = (0..dim)
                .map(|d| self.num_entity_dofs(d) * self.cell_type.num_entities(d))
                .sum();
            let begin = offset + dim_offset + k * local_entity;
            positions.extend(begin..begin + k);
        } else {
            let mut offset = offset;
            for sub in &self.sub_layouts {
                sub.collect_entity_dofs(positions, dim, local_entity, offset);
                offset += sub.local_dimension();
            }
        }
    }

    /// Local positions of all dofs in the closure of a local facet.
    pub fn tabulate_facet_dofs(&self, local_facet: usize) -> Vec<usize> {
        let mut positions: Vec<usize> = self
            .cell_type
            .facet_closure(local_facet)
            .into_iter()
            .flat_map(|(dim, entity)| self.tabulate_entity_dofs(dim, entity))
            .collect();
        positions.sort_unstable();
        positions
    }
}
