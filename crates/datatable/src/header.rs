//! Binary table header: orientation, row/column counts and per-column descriptors.

use crate::error::FormatError;
use crate::metadata::MetaData;
use crate::types::ColumnType;
use std::io::{self, Write};

/// Orientation tag of a column-oriented table.
pub const COLUMN_ORIENTED: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDescriptor {
    pub column_type: ColumnType,
    pub metadata: MetaData,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableHeader {
    pub row_count: u32,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableHeader {
    /// Serialize the header including the trailing data offset marker.
    /// Returns the offset at which column data starts.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<u64> {
        let mut buf = Vec::new();
        buf.push(COLUMN_ORIENTED);
        buf.extend_from_slice(&self.row_count.to_le_bytes());
        buf.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        for column in &self.columns {
            buf.push(column.column_type.tag());
            column.metadata.write_to(&mut buf)?;
        }
        let data_offset = buf.len() as u64 + 8;
        buf.extend_from_slice(&data_offset.to_le_bytes());
        out.write_all(&buf)?;
        Ok(data_offset)
    }

    /// Parse a header from the start of `bytes`.
    ///
    /// Returns the header and the data offset. `bytes` may extend past the
    /// header; [`FormatError::Truncated`] means more bytes are needed.
    pub fn parse(bytes: &[u8]) -> Result<(Self, u64), FormatError> {
        let mut cursor = bytes;
        let orientation = take(&mut cursor, 1, "orientation")?[0];
        if orientation != COLUMN_ORIENTED {
            return Err(FormatError::UnknownOrientation(orientation));
        }
        let row_count = read_u32(&mut cursor, "row count")?;
        let column_count = read_u32(&mut cursor, "column count")?;

        let mut columns = Vec::with_capacity(column_count.min(4096) as usize);
        for column in 0..column_count {
            let tag = take(&mut cursor, 1, "column type")?[0];
            let column_type =
                ColumnType::from_tag(tag).ok_or(FormatError::UnknownColumnType { column, tag })?;
            let metadata = MetaData::read_from(&mut cursor)?;
            columns.push(ColumnDescriptor {
                column_type,
                metadata,
            });
        }

        let raw = take(&mut cursor, 8, "data offset")?;
        let mut marker = [0u8; 8];
        marker.copy_from_slice(raw);
        let marker = u64::from_le_bytes(marker);
        let actual = (bytes.len() - cursor.len()) as u64;
        if marker != actual {
            return Err(FormatError::DataOffsetMismatch { marker, actual });
        }

        Ok((Self { row_count, columns }, actual))
    }
}

fn take<'a>(bytes: &mut &'a [u8], len: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
    if bytes.len() < len {
        return Err(FormatError::Truncated(what));
    }
    let (head, rest) = bytes.split_at(len);
    *bytes = rest;
    Ok(head)
}

fn read_u32(bytes: &mut &[u8], what: &'static str) -> Result<u32, FormatError> {
    let raw = take(bytes, 4, what)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
