//! Streaming element conversions into new composite buffers.

mod normalize;
mod numeric;
mod one_hot;

pub use normalize::{
    NormalizationAnalysis, NormalizationKind, NormalizationParameters, NormalizeConversion,
};
pub use numeric::{ConverterTable, Converter, NumericCast};
pub use one_hot::OneHotConversion;

use crate::composite::{CompositeBuffer, CompositeBufferOptions};
use crate::element::{ColumnElement, NumericElement};
use crate::error::{ConversionError, ScanError};
use crate::metadata::MetaData;
use crate::read_buffer::ReadOnlyBuffer;
use crate::scan::{for_each_block, ScanOptions, ScanStatus};
use datatable_fs::TempStreamProvider;
use std::marker::PhantomData;
use std::sync::Arc;

/// One-in, one-out element conversion.
pub trait Conversion<T> {
    type Output: ColumnElement;

    fn convert(&mut self, item: &T) -> Result<Self::Output, ConversionError>;

    /// Record whatever the conversion learned in the output column's metadata.
    fn write_metadata(&self, _metadata: &mut MetaData) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<T: ColumnElement> Conversion<T> for Identity {
    type Output = T;

    fn convert(&mut self, item: &T) -> Result<T, ConversionError> {
        Ok(item.clone())
    }
}

/// Conversion backed by a closure.
pub struct CustomConversion<F, O> {
    convert: F,
    _output: PhantomData<fn() -> O>,
}

impl<F, O> CustomConversion<F, O> {
    pub fn new(convert: F) -> Self {
        Self {
            convert,
            _output: PhantomData,
        }
    }
}

impl<T, O, F> Conversion<T> for CustomConversion<F, O>
where
    O: ColumnElement,
    F: FnMut(&T) -> Result<O, ConversionError>,
{
    type Output = O;

    fn convert(&mut self, item: &T) -> Result<O, ConversionError> {
        (self.convert)(item)
    }
}

/// Text form of any element.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToStringConversion;

impl<T: ColumnElement> Conversion<T> for ToStringConversion {
    type Output = String;

    fn convert(&mut self, item: &T) -> Result<String, ConversionError> {
        Ok(item.to_display_string())
    }
}

/// Numeric cast looked up in a [`ConverterTable`].
pub struct NumericConversion<S, D> {
    convert: Converter<S, D>,
}

impl<S: NumericElement, D: NumericElement> NumericConversion<S, D> {
    pub fn new(table: &ConverterTable) -> Result<Self, ConversionError> {
        Ok(Self {
            convert: table.get::<S, D>()?,
        })
    }
}

impl<S: NumericElement, D: NumericElement> Conversion<S> for NumericConversion<S, D> {
    type Output = D;

    fn convert(&mut self, item: &S) -> Result<D, ConversionError> {
        (self.convert)(*item)
    }
}

/// Scan `source` and append one converted element per input element to a new
/// composite buffer.
///
/// The first failing element aborts the scan. A cancelled scan returns the
/// partially filled buffer with [`ScanStatus::Cancelled`].
pub async fn convert_buffer<T, B, C>(
    source: &mut B,
    conversion: &mut C,
    provider: Arc<dyn TempStreamProvider>,
    options: CompositeBufferOptions,
    scan: ScanOptions<'_>,
) -> Result<(CompositeBuffer<C::Output>, ScanStatus), ScanError>
where
    B: ReadOnlyBuffer<T> + ?Sized,
    C: Conversion<T>,
{
    let mut output = CompositeBuffer::new(provider, options);
    let status = for_each_block(
        source,
        |block: &[T]| {
            for item in block {
                output.add(conversion.convert(item)?)?;
            }
            Ok::<_, ScanError>(())
        },
        scan,
    )
    .await?;

    output.metadata_mut().set_column_type(<C::Output as ColumnElement>::COLUMN_TYPE);
    conversion.write_metadata(output.metadata_mut());
    Ok((output, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_buffer::MemoryBuffer;
    use datatable_fs::TempFileManager;
    use pretty_assertions::assert_eq;

    fn small_options() -> CompositeBufferOptions {
        CompositeBufferOptions {
            block_size: 3,
            max_in_memory_blocks: 1,
            max_distinct: None,
        }
    }

    async fn run<T, C>(input: Vec<T>, conversion: &mut C) -> Vec<C::Output>
    where
        T: Clone + Send + Sync + 'static,
        C: Conversion<T>,
    {
        let mut source = MemoryBuffer::new(input, 3);
        let (mut output, status) = convert_buffer(
            &mut source,
            conversion,
            Arc::new(TempFileManager::new()),
            small_options(),
            ScanOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(status, ScanStatus::Completed);
        output.to_vec().unwrap()
    }

    #[tokio::test]
    async fn output_length_matches_input_length() {
        for len in [0usize, 1, 10] {
            let input: Vec<i32> = (0..len as i32).collect();
            assert_eq!(run(input.clone(), &mut Identity).await.len(), len);
            assert_eq!(run(input.clone(), &mut ToStringConversion).await.len(), len);
            let mut numeric = NumericConversion::<i32, f64>::new(&ConverterTable::default()).unwrap();
            assert_eq!(run(input, &mut numeric).await.len(), len);
        }
    }

    #[tokio::test]
    async fn custom_and_string_conversions() {
        let mut doubled = CustomConversion::new(|v: &i64| -> Result<i64, ConversionError> { Ok(v * 2) });
        assert_eq!(run(vec![1i64, 2, 3], &mut doubled).await, vec![2, 4, 6]);

        let strings = run(vec![true, false], &mut ToStringConversion).await;
        assert_eq!(strings, vec!["true".to_string(), "false".to_string()]);
    }

    #[tokio::test]
    async fn first_failure_aborts_the_scan() {
        let mut narrow = NumericConversion::<i32, i8>::new(&ConverterTable::default()).unwrap();
        let mut source = MemoryBuffer::new(vec![1i32, 2, 1000, 4], 2);
        let err = convert_buffer(
            &mut source,
            &mut narrow,
            Arc::new(TempFileManager::new()),
            small_options(),
            ScanOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ScanError::Conversion(ConversionError::OutOfRange { .. })
        ));
    }
}
