use std::fs;
use std::sync::Arc;

use arrow::array::{BooleanBuilder, Float64Builder, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use tempfile::tempdir;

use findcont::data::loader::load_file;
use findcont::data::model::MetadataValue;

#[test]
fn json_records_with_optional_columns() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("spectra.json");
    fs::write(
        &path,
        r#"[
            { "y": [1.0, 2.0, null, 4.0], "mask": [true, false, true, true], "source": "Orion_KL", "tdm": true },
            { "y": [5.0, 6.0], "x": [100.5, 101.5], "spw": 25 }
        ]"#,
    )
    .unwrap();

    let ds = load_file(&path).unwrap();
    assert_eq!(ds.len(), 2);
    assert_eq!(ds.column_names, vec!["source", "spw", "tdm"]);

    let first = &ds.spectra[0];
    assert_eq!(first.x, vec![0.0, 1.0, 2.0, 3.0]);
    assert!(first.y[2].is_nan());
    assert!(first.flag("tdm"));
    let sp = first.to_spectrum().unwrap();
    assert_eq!(sp.valid_channels(), vec![0, 3]);

    let second = &ds.spectra[1];
    assert_eq!(second.x, vec![100.5, 101.5]);
    assert_eq!(second.mask, None);
    assert_eq!(second.metadata.get("spw"), Some(&MetadataValue::Integer(25)));
    assert!(!second.flag("tdm"));
}

#[test]
fn json_length_mismatch_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, r#"[{ "y": [1.0, 2.0], "mask": [true] }]"#).unwrap();
    assert!(load_file(&path).is_err());
}

#[test]
fn csv_with_semicolon_lists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("spectra.csv");
    fs::write(&path, "source,y,mask,tdm\nNGC253,1;2;3;nan,1;1;0;1,false\n").unwrap();

    let ds = load_file(&path).unwrap();
    assert_eq!(ds.len(), 1);
    let rec = &ds.spectra[0];
    assert_eq!(rec.x, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(rec.mask, Some(vec![true, true, false, true]));
    assert_eq!(rec.metadata.get("source"), Some(&MetadataValue::String("NGC253".into())));
    assert_eq!(rec.to_spectrum().unwrap().valid_channels(), vec![0, 1]);
}

#[test]
fn csv_without_y_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("no_y.csv");
    fs::write(&path, "source,x\nA,1;2\n").unwrap();
    assert!(load_file(&path).is_err());
}

#[test]
fn parquet_list_columns() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("spectra.parquet");

    let mut y = ListBuilder::new(Float64Builder::new());
    y.values().append_slice(&[1.0, 2.0, 3.0]);
    y.append(true);
    y.values().append_slice(&[4.0, 5.0]);
    y.append(true);

    let mut mask = ListBuilder::new(BooleanBuilder::new());
    mask.values().append_slice(&[true, false, true]);
    mask.append(true);
    mask.append(false);

    let schema = Arc::new(Schema::new(vec![
        Field::new("y", DataType::List(Arc::new(Field::new("item", DataType::Float64, true))), false),
        Field::new("mask", DataType::List(Arc::new(Field::new("item", DataType::Boolean, true))), true),
        Field::new("source", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(y.finish()),
            Arc::new(mask.finish()),
            Arc::new(StringArray::from(vec!["IRAS16293", "J1337-1257"])),
        ],
    )
    .unwrap();

    let file = fs::File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let ds = load_file(&path).unwrap();
    assert_eq!(ds.len(), 2);
    assert_eq!(ds.column_names, vec!["source"]);
    assert_eq!(ds.spectra[0].mask, Some(vec![true, false, true]));
    assert_eq!(ds.spectra[0].x, vec![0.0, 1.0, 2.0]);
    assert_eq!(ds.spectra[1].y, vec![4.0, 5.0]);
    assert_eq!(ds.spectra[1].mask, None);
    assert_eq!(
        ds.spectra[1].metadata.get("source"),
        Some(&MetadataValue::String("J1337-1257".into()))
    );
}
