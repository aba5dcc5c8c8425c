use super::Analysis;
use crate::element::{ColumnElement, DistinctKey};
use crate::error::ConversionError;
use crate::metadata::{keys, MetaData};
use indexmap::IndexMap;
use std::marker::PhantomData;

/// Assigns each distinct value a stable index in first-seen order.
#[derive(Clone, Debug)]
pub struct DistinctIndexer<T> {
    indices: IndexMap<DistinctKey, String>,
    _element: PhantomData<fn(&T)>,
}

impl<T> Default for DistinctIndexer<T> {
    fn default() -> Self {
        Self {
            indices: IndexMap::new(),
            _element: PhantomData,
        }
    }
}

impl<T: ColumnElement> DistinctIndexer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every value of `items`.
    pub fn from_values<'a>(items: impl IntoIterator<Item = &'a T>) -> Self {
        let mut indexer = Self::new();
        for item in items {
            indexer.insert(item);
        }
        indexer
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn get(&self, item: &T) -> Option<u32> {
        self.indices
            .get_index_of(&item.distinct_key())
            .map(|i| i as u32)
    }

    /// Index of `item`, assigning the next index if it has not been seen.
    pub fn insert(&mut self, item: &T) -> u32 {
        let entry = self.indices.entry(item.distinct_key());
        let index = entry.index();
        entry.or_insert_with(|| item.to_display_string());
        index as u32
    }

    /// Like [`insert`](Self::insert), but refuses to grow past `limit` values.
    pub fn insert_bounded(&mut self, item: &T, limit: usize) -> Result<u32, ConversionError> {
        let key = item.distinct_key();
        if let Some(index) = self.indices.get_index_of(&key) {
            return Ok(index as u32);
        }
        if self.indices.len() >= limit {
            return Err(ConversionError::IndexerCapacity { limit });
        }
        let (index, _) = self.indices.insert_full(key, item.to_display_string());
        Ok(index as u32)
    }

    /// Labels in index order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.indices.values().map(String::as_str)
    }
}

impl<T: ColumnElement> Analysis<T> for DistinctIndexer<T> {
    fn add(&mut self, item: &T) {
        self.insert(item);
    }

    fn write_to(&self, metadata: &mut MetaData) {
        metadata.set(keys::NUM_DISTINCT, self.len());
        for (index, label) in self.labels().enumerate() {
            metadata.set(format!("{}{index}", keys::CATEGORY_PREFIX), label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn indices_follow_first_appearance() {
        let mut indexer = DistinctIndexer::<String>::new();
        let values = ["b", "a", "b", "c", "a"].map(String::from);
        let assigned: Vec<u32> = values.iter().map(|v| indexer.insert(v)).collect();
        assert_eq!(assigned, vec![0, 1, 0, 2, 1]);
        assert_eq!(indexer.labels().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(indexer.get(&"c".to_string()), Some(2));
        assert_eq!(indexer.get(&"z".to_string()), None);
    }

    #[test]
    fn bounded_insert_reports_the_limit() {
        let mut indexer = DistinctIndexer::<i32>::new();
        assert_eq!(indexer.insert_bounded(&5, 2), Ok(0));
        assert_eq!(indexer.insert_bounded(&6, 2), Ok(1));
        assert_eq!(indexer.insert_bounded(&5, 2), Ok(0));
        let err = indexer.insert_bounded(&7, 2).unwrap_err();
        assert_eq!(err, ConversionError::IndexerCapacity { limit: 2 });
        assert_eq!(err.to_string(), "indexer limit of 2 distinct values exceeded");
        assert_eq!(indexer.len(), 2);
    }

    #[test]
    fn writes_count_and_category_labels() {
        let values = [3i64, 1, 3];
        let indexer = DistinctIndexer::from_values(&values);
        let mut metadata = MetaData::new();
        indexer.write_to(&mut metadata);
        assert_eq!(metadata.get_i64(keys::NUM_DISTINCT), Some(2));
        assert_eq!(metadata.category_labels(), vec![(0, "3"), (1, "1")]);
    }
}
