use super::Conversion;
use crate::analysis::{Analysis, DistinctIndexer};
use crate::element::{ColumnElement, FloatVector};
use crate::error::ConversionError;
use crate::metadata::MetaData;

/// Maps each categorical value to a fixed-length indicator vector.
///
/// The vector length is fixed up front, usually from a distinct-indexing pass
/// over the same column. Values not already known to the indexer are assigned
/// the next free position; once every position is taken, a further new value
/// fails with [`ConversionError::IndexerCapacity`].
#[derive(Clone, Debug)]
pub struct OneHotConversion<T> {
    indexer: DistinctIndexer<T>,
    size: usize,
}

impl<T: ColumnElement> OneHotConversion<T> {
    /// Start with an empty indexer and room for `size` categories.
    pub fn new(size: usize) -> Self {
        Self {
            indexer: DistinctIndexer::new(),
            size,
        }
    }

    /// Reuse a pre-built indexer; the vector length is its category count.
    pub fn from_indexer(indexer: DistinctIndexer<T>) -> Self {
        let size = indexer.len();
        Self { indexer, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn indexer(&self) -> &DistinctIndexer<T> {
        &self.indexer
    }
}

impl<T: ColumnElement> Conversion<T> for OneHotConversion<T> {
    type Output = FloatVector;

    fn convert(&mut self, item: &T) -> Result<FloatVector, ConversionError> {
        let index = self.indexer.insert_bounded(item, self.size)?;
        let mut vector = FloatVector::zeros(self.size);
        vector.values[index as usize] = 1.0;
        Ok(vector)
    }

    fn write_metadata(&self, metadata: &mut MetaData) {
        self.indexer.write_to(metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::keys;
    use pretty_assertions::assert_eq;

    #[test]
    fn pre_built_indexer_fixes_positions() {
        let words = ["a", "b", "a", "c"].map(String::from);
        let mut one_hot = OneHotConversion::from_indexer(DistinctIndexer::from_values(&words));
        let vectors: Vec<Vec<f32>> = words
            .iter()
            .map(|w| one_hot.convert(w).unwrap().values)
            .collect();
        assert_eq!(
            vectors,
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![1.0, 0.0, 0.0],
                vec![0.0, 0.0, 1.0],
            ]
        );
    }

    #[test]
    fn unseen_value_past_capacity_is_an_error() {
        let mut one_hot = OneHotConversion::<i32>::new(2);
        one_hot.convert(&10).unwrap();
        one_hot.convert(&20).unwrap();
        let err = one_hot.convert(&30).unwrap_err();
        assert_eq!(err, ConversionError::IndexerCapacity { limit: 2 });
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn labels_land_in_metadata() {
        let mut one_hot = OneHotConversion::<bool>::new(2);
        one_hot.convert(&true).unwrap();
        one_hot.convert(&false).unwrap();
        let mut metadata = MetaData::new();
        one_hot.write_metadata(&mut metadata);
        assert_eq!(metadata.get_i64(keys::NUM_DISTINCT), Some(2));
        assert_eq!(metadata.category_labels(), vec![(0, "true"), (1, "false")]);
    }
}
