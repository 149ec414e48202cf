
// File schemas for the tables written by output.rs

use arrow::datatypes::{DataType, Field, Schema};
use clap::ValueEnum;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    Infer,
    Csv,
    CsvGz,
    Parquet,
}

pub fn vertex_schema() -> Schema {
    Schema::new(vec![
        Field::new("frame", DataType::UInt32, false),
        Field::new("mask_id", DataType::UInt32, false),
        Field::new("area", DataType::UInt64, false),
    ])
}

pub fn edge_schema() -> Schema {
    Schema::new(vec![
        Field::new("frame_source", DataType::UInt32, false),
        Field::new("frame_target", DataType::UInt32, false),
        Field::new("mask_id_source", DataType::UInt32, false),
        Field::new("mask_id_target", DataType::UInt32, false),
        Field::new("overlap_area", DataType::UInt64, false),
        Field::new("overlap_fraction_source", DataType::Float32, false),
        Field::new("overlap_fraction_target", DataType::Float32, false),
    ])
}

pub fn track_stats_schema() -> Schema {
    Schema::new(vec![
        Field::new("mask_id", DataType::UInt32, false),
        Field::new("first_frame", DataType::UInt32, false),
        Field::new("last_frame", DataType::UInt32, false),
        Field::new("frames_present", DataType::UInt32, false),
        Field::new("missing", DataType::UInt32, false),
        Field::new("divisions", DataType::UInt32, false),
        Field::new("fusions", DataType::UInt32, false),
    ])
}
