//! Compact storage for ragged lists of indices.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

/// A sequence of index lists stored back-to-back in a single array.
///
/// Used for cell-to-dof maps, entity-to-vertex lists and facet-to-cell incidence.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connectivity {
    offsets: Vec<usize>,
    indices: Vec<usize>,
}

impl Debug for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            indices: Vec::new(),
        }
    }
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connectivity in which every list has the same length `stride`.
    ///
    /// # Panics
    ///
    /// Panics if `stride` is zero and `indices` is not empty, or if the number of indices
    /// is not a multiple of `stride`.
    pub fn from_uniform(stride: usize, indices: Vec<usize>) -> Self {
        if stride == 0 {
            assert!(indices.is_empty(), "Zero stride requires empty indices.");
            return Self::default();
        }
        assert_eq!(indices.len() % stride, 0, "Number of indices must be a multiple of stride.");
        let offsets = (0..=indices.len() / stride).map(|i| i * stride).collect();
        Self { offsets, indices }
    }

    pub fn push(&mut self, list: &[usize]) {
        self.indices.extend_from_slice(list);
        self.offsets.push(self.indices.len());
    }

    /// Appends a list produced by `f`, which pushes indices onto the provided buffer.
    pub fn push_with(&mut self, f: impl FnOnce(&mut Vec<usize>)) {
        f(&mut self.indices);
        self.offsets.push(self.indices.len());
    }

    /// The number of lists.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The total number of indices across all lists.
    pub fn num_indices(&self) -> usize {
        self.indices.len()
    }

    pub fn get(&self, index: usize) -> Option<&[usize]> {
        let begin = *self.offsets.get(index)?;
        let end = *self.offsets.get(index + 1)?;
        Some(&self.indices[begin..end])
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn list(&self, index: usize) -> &[usize] {
        &self.indices[self.offsets[index]..self.offsets[index + 1]]
    }

    pub fn iter(&self) -> impl '_ + ExactSizeIterator<Item = &[usize]> {
        self.offsets
            .windows(2)
            .map(move |w| &self.indices[w[0]..w[1]])
    }

    /// All indices of all lists, back-to-back.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Replaces every stored index `i` with `f(i)`.
    pub fn map_indices(&mut self, mut f: impl FnMut(usize) -> usize) {
        for index in &mut self.indices {
            *index = f(*index);
        }
    }

    /// The largest list length, or zero if there are no lists.
    pub fn max_list_len(&self) -> usize {
        self.offsets
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap_or(0)
    }
}

impl<'a> FromIterator<&'a [usize]> for Connectivity {
    fn from_iter<I: IntoIterator<Item = &'a [usize]>>(iter: I) -> Self {
        let mut connectivity = Connectivity::new();
        for list in iter {
            connectivity.push(list);
        }
        connectivity
    }
}

impl From<Vec<Vec<usize>>> for Connectivity {
    fn from(lists: Vec<Vec<usize>>) -> Self {
        lists.iter().map(Vec::as_slice).collect()
    }
}
