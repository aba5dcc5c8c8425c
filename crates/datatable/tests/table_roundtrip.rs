use datatable::{
    chrono::{NaiveDate, NaiveDateTime}, ColumnOrientedTable, ColumnType, CompositeBufferOptions, FloatMatrix,
    FloatVector, IndexList, ReadOnlyBuffer, ScanOptions, ScanStatus, TableBuilder, TableError,
    TableOptions, TempFileManager, Value, WeightedIndexList,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn builder(block_size: usize) -> TableBuilder {
    TableBuilder::new(
        Arc::new(TempFileManager::new()),
        CompositeBufferOptions {
            block_size,
            max_in_memory_blocks: 2,
            max_distinct: Some(64),
        },
    )
}

async fn read_all<T: Clone>(buffer: &mut dyn ReadOnlyBuffer<T>) -> Vec<T> {
    let mut out = Vec::new();
    for i in 0..buffer.block_count() {
        out.extend_from_slice(&buffer.get_typed_block(i).await.unwrap());
    }
    out
}

#[tokio::test]
async fn two_column_table_reads_back_first_row() {
    let mut builder = builder(16);
    builder.add_column::<i32>("number").extend([6, 7]).unwrap();
    builder
        .add_column::<String>("text")
        .extend(["test".to_string(), "test 2".to_string()])
        .unwrap();
    let table = builder.finish(TableOptions::default()).unwrap();

    assert_eq!(table.row_count(), 2);
    assert_eq!(table.column_count(), 2);
    assert_eq!(table.column_types(), vec![ColumnType::Int, ColumnType::String]);
    assert_eq!(
        table.row(0).await.unwrap(),
        vec![Value::Int(6), Value::String("test".to_string())]
    );
    assert_eq!(
        table.row(1).await.unwrap(),
        vec![Value::Int(7), Value::String("test 2".to_string())]
    );
    assert!(matches!(
        table.row(2).await,
        Err(TableError::RowOutOfRange { index: 2, count: 2 })
    ));
}

#[tokio::test]
async fn every_element_type_survives_a_file_round_trip() {
    let date = NaiveDate::from_ymd_opt(2024, 2, 29)
        .unwrap()
        .and_hms_micro_opt(13, 45, 7, 250)
        .unwrap();
    let matrix = FloatMatrix::new([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();

    let mut builder = builder(2);
    builder.add_column::<bool>("bool").extend([true, false, true]).unwrap();
    builder.add_column::<i8>("sbyte").extend([-1, 0, 127]).unwrap();
    builder.add_column::<i64>("long").extend([i64::MIN, 0, i64::MAX]).unwrap();
    builder.add_column::<f32>("float").extend([0.5, -0.0, f32::INFINITY]).unwrap();
    builder
        .add_column::<NaiveDateTime>("date")
        .extend([date, date, date])
        .unwrap();
    builder
        .add_column::<IndexList>("indices")
        .extend([
            IndexList::new(vec![1u32, 2]),
            IndexList::new(Vec::<u32>::new()),
            IndexList::new(vec![9u32]),
        ])
        .unwrap();
    builder
        .add_column::<WeightedIndexList>("weighted")
        .extend([
            WeightedIndexList::new([(0, 0.5)]),
            WeightedIndexList::new([]),
            WeightedIndexList::new([(3, 1.0), (4, 2.0)]),
        ])
        .unwrap();
    builder
        .add_column::<FloatVector>("vector")
        .extend([FloatVector::new(vec![1.0f32]), FloatVector::zeros(3), FloatVector::new(Vec::<f32>::new())])
        .unwrap();
    builder
        .add_column::<FloatMatrix>("matrix")
        .extend([matrix.clone(), matrix.clone(), matrix.clone()])
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("all_types.dt");
    let written = builder.write_to_path(&path).unwrap();
    assert_eq!(written, std::fs::metadata(&path).unwrap().len());

    let table = ColumnOrientedTable::open_path(&path, TableOptions { block_size: 2, cache_blocks: 1 }).unwrap();
    assert_eq!(table.row_count(), 3);
    assert_eq!(
        read_all(table.column::<i64>(2).unwrap().as_mut()).await,
        vec![i64::MIN, 0, i64::MAX]
    );
    assert_eq!(
        read_all(table.column::<NaiveDateTime>(4).unwrap().as_mut()).await,
        vec![date; 3]
    );
    assert_eq!(
        read_all(table.column::<WeightedIndexList>(6).unwrap().as_mut()).await[2],
        WeightedIndexList::new([(3, 1.0), (4, 2.0)])
    );
    assert_eq!(
        read_all(table.column::<FloatVector>(7).unwrap().as_mut()).await,
        vec![FloatVector::new(vec![1.0f32]), FloatVector::zeros(3), FloatVector::new(Vec::<f32>::new())]
    );
    assert_eq!(
        table.row(2).await.unwrap(),
        vec![
            Value::Boolean(true),
            Value::SByte(127),
            Value::Long(i64::MAX),
            Value::Float(f32::INFINITY),
            Value::Date(date),
            Value::IndexList(IndexList::new(vec![9u32])),
            Value::WeightedIndexList(WeightedIndexList::new([(3, 1.0), (4, 2.0)])),
            Value::Vector(FloatVector::new(Vec::<f32>::new())),
            Value::Matrix(matrix),
        ]
    );
}

#[test]
fn unknown_type_tag_fails_the_open() {
    let mut builder = builder(4);
    builder.add_column::<i32>("a").add(1).unwrap();
    let mut bytes = Vec::new();
    builder.write_to(&mut bytes).unwrap();

    bytes[9] = 42;
    let err = ColumnOrientedTable::from_bytes(bytes, TableOptions::default()).unwrap_err();
    assert_eq!(err.to_string(), "invalid table: column 0: unknown element type tag 42");
}

#[test]
fn empty_source_is_a_format_error() {
    let err = ColumnOrientedTable::from_bytes(Vec::new(), TableOptions::default()).unwrap_err();
    assert!(matches!(err, TableError::Format(_)));
}

#[tokio::test]
async fn for_each_row_visits_rows_in_order() {
    let mut builder = builder(3);
    builder.add_column::<i16>("n").extend(0..7).unwrap();
    builder
        .add_column::<String>("s")
        .extend((0..7).map(|i| format!("row {i}")))
        .unwrap();
    let table = builder.finish(TableOptions { block_size: 3, cache_blocks: 1 }).unwrap();

    let mut seen = Vec::new();
    let status = table
        .for_each_row(
            |index, row| {
                seen.push((index, row[0].clone(), row[1].to_string()));
                Ok::<_, TableError>(())
            },
            ScanOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(status, ScanStatus::Completed);
    assert_eq!(seen.len(), 7);
    assert_eq!(seen[6], (6, Value::Short(6), "row 6".to_string()));
}

#[tokio::test]
async fn empty_table_has_no_blocks() {
    let mut builder = builder(4);
    builder.add_column::<f64>("x");
    builder.add_column::<String>("y");
    let table = builder.finish(TableOptions::default()).unwrap();
    assert_eq!(table.row_count(), 0);

    let mut strings = table.column::<String>(1).unwrap();
    assert_eq!(strings.block_count(), 0);
    assert!(strings.get_typed_block(0).await.unwrap().is_empty());
}

async fn round_trip(ints: Vec<i32>, block_size: usize) {
    let strings: Vec<String> = ints.iter().map(|i| "s".repeat((*i as usize) % 5)).collect();
    let mut builder = TableBuilder::new(
        Arc::new(TempFileManager::new()),
        CompositeBufferOptions {
            block_size,
            max_in_memory_blocks: 1,
            max_distinct: None,
        },
    );
    builder.add_column::<i32>("ints").extend(ints.iter().copied()).unwrap();
    builder.add_column::<String>("strings").extend(strings.iter().cloned()).unwrap();
    let table = builder
        .finish(TableOptions {
            block_size,
            cache_blocks: 1,
        })
        .unwrap();

    assert_eq!(read_all(table.column::<i32>(0).unwrap().as_mut()).await, ints);
    assert_eq!(read_all(table.column::<String>(1).unwrap().as_mut()).await, strings);
}

#[tokio::test]
async fn composite_buffers_round_trip_at_block_boundaries() {
    let block = 4;
    for len in [0, 1, block, 3 * block + 1] {
        round_trip((0..len as i32).collect(), block).await;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn composite_buffers_round_trip(ints in proptest::collection::vec(0i32..1000, 0..64), block_size in 1usize..9) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(round_trip(ints, block_size));
    }
}
