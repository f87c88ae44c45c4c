use std::collections::HashMap;
use uuid::Uuid;

/// Bidirectional mapping between entity ids and dense matrix indices
///
/// Indices follow first-insertion order and are only meaningful for the
/// training run that built the mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexMapping {
    to_index: HashMap<Uuid, usize>,
    to_id: Vec<Uuid>,
}

impl IndexMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `id`, assigning the next free one if it is new
    pub fn insert(&mut self, id: Uuid) -> usize {
        if let Some(&idx) = self.to_index.get(&id) {
            return idx;
        }
        let idx = self.to_id.len();
        self.to_index.insert(id, idx);
        self.to_id.push(id);
        idx
    }

    pub fn index_of(&self, id: &Uuid) -> Option<usize> {
        self.to_index.get(id).copied()
    }

    pub fn id_of(&self, idx: usize) -> Option<Uuid> {
        self.to_id.get(idx).copied()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.to_index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_id.is_empty()
    }

    /// Ids in index order
    pub fn ids(&self) -> &[Uuid] {
        &self.to_id
    }
}

impl FromIterator<Uuid> for IndexMapping {
    fn from_iter<T: IntoIterator<Item = Uuid>>(iter: T) -> Self {
        let mut mapping = IndexMapping::new();
        for id in iter {
            mapping.insert(id);
        }
        mapping
    }
}
