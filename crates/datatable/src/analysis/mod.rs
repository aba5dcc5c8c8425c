//! Single-pass column statistics written back into column metadata.

mod indexer;
mod numeric;

pub use indexer::DistinctIndexer;
pub use numeric::{CastToNumericAnalysis, NumericAnalysis};

use crate::error::ScanError;
use crate::metadata::MetaData;
use crate::read_buffer::ReadOnlyBuffer;
use crate::scan::{for_each_block, ScanOptions, ScanStatus};

pub trait Analysis<T> {
    fn add(&mut self, item: &T);

    fn write_to(&self, metadata: &mut MetaData);
}

/// Feed every element of `buffer` to `analysis`.
///
/// On completion the results are written to `metadata` and the column is
/// marked as analysed. A cancelled scan leaves `metadata` untouched; the
/// partial state stays in `analysis`.
pub async fn analyse_buffer<T, B, A>(
    buffer: &mut B,
    analysis: &mut A,
    metadata: &mut MetaData,
    scan: ScanOptions<'_>,
) -> Result<ScanStatus, ScanError>
where
    B: ReadOnlyBuffer<T> + ?Sized,
    A: Analysis<T>,
{
    let status = for_each_block(
        buffer,
        |block: &[T]| {
            for item in block {
                analysis.add(item);
            }
            Ok::<_, ScanError>(())
        },
        scan,
    )
    .await?;

    if status == ScanStatus::Completed {
        analysis.write_to(metadata);
        metadata.set_analysed();
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::keys;
    use crate::read_buffer::MemoryBuffer;
    use crate::scan::CancellationToken;

    #[tokio::test]
    async fn completed_scan_marks_metadata_analysed() {
        let mut buffer = MemoryBuffer::new(vec![1.0, 2.5, f64::NAN, f64::INFINITY, 3.0], 2);
        let mut analysis = CastToNumericAnalysis::new();
        let mut metadata = MetaData::new();
        let status = analyse_buffer(&mut buffer, &mut analysis, &mut metadata, ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(status, ScanStatus::Completed);
        assert!(metadata.has_been_analysed());
        assert_eq!(metadata.get_i64(keys::NAN_COUNT), Some(1));
        assert_eq!(metadata.get_f64(keys::MAX_VALUE), Some(3.0));
    }

    #[tokio::test]
    async fn cancelled_scan_leaves_metadata_alone() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut buffer = MemoryBuffer::new(vec![1i32, 2, 3], 1);
        let mut analysis = NumericAnalysis::new();
        let mut metadata = MetaData::new();
        let status = analyse_buffer(
            &mut buffer,
            &mut analysis,
            &mut metadata,
            ScanOptions::default().with_cancel(&cancel),
        )
        .await
        .unwrap();
        assert_eq!(status, ScanStatus::Cancelled);
        assert!(metadata.is_empty());
        assert_eq!(analysis.count(), 0);
    }
}
