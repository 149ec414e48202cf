use anyhow::{bail, Context};
use arrow::array::{Float32Array, RecordBatch, UInt32Array, UInt64Array};
use arrow::csv;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression::ZSTD, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::sync::Arc;

use celltrack::tracking::{TrackStats, WorkingGraph};

use crate::schemas::{edge_schema, track_stats_schema, vertex_schema, OutputFormat};

pub fn write_table(filename: &str, fmt: OutputFormat, batch: &RecordBatch) -> anyhow::Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let file = File::create(filename).with_context(|| format!("creating {}", filename))?;

    match fmt {
        OutputFormat::Csv => write_table_csv(file, batch),
        OutputFormat::CsvGz => {
            let mut encoder = GzEncoder::new(file, Compression::default());
            write_table_csv(&mut encoder, batch)?;
            encoder.finish()?;
            Ok(())
        }
        OutputFormat::Parquet => write_table_parquet(file, batch),
        OutputFormat::Infer => bail!("Unable to infer file format for: {}", filename),
    }
    .with_context(|| format!("writing {}", filename))
}

fn write_table_csv<W>(output: W, batch: &RecordBatch) -> anyhow::Result<()>
where
    W: std::io::Write,
{
    let mut writer = csv::WriterBuilder::new().with_header(true).build(output);
    writer.write(batch)?;
    Ok(())
}

fn write_table_parquet<W>(output: W, batch: &RecordBatch) -> anyhow::Result<()>
where
    W: std::io::Write + Send,
{
    let props = WriterProperties::builder()
        .set_compression(ZSTD(ZstdLevel::try_new(3)?))
        .build();
    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

pub fn determine_format(filename: &str, fmt: OutputFormat) -> anyhow::Result<OutputFormat> {
    if fmt != OutputFormat::Infer {
        return Ok(fmt);
    }

    if filename.ends_with(".csv.gz") {
        Ok(OutputFormat::CsvGz)
    } else if filename.ends_with(".csv") {
        Ok(OutputFormat::Csv)
    } else if filename.ends_with(".parquet") {
        Ok(OutputFormat::Parquet)
    } else {
        bail!("Unknown file format for: {}", filename)
    }
}

pub fn write_vertices(
    output_vertices: &Option<String>,
    output_fmt: OutputFormat,
    working: &WorkingGraph,
) -> anyhow::Result<()> {
    if let Some(output_vertices) = output_vertices {
        let mut vertices: Vec<_> = working.graph().node_weights().copied().collect();
        vertices.sort_by_key(|v| (v.frame, v.mask_id));

        let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(vertices.iter().map(|v| v.frame as u32).collect::<UInt32Array>()),
            Arc::new(vertices.iter().map(|v| v.mask_id).collect::<UInt32Array>()),
            Arc::new(vertices.iter().map(|v| v.area).collect::<UInt64Array>()),
        ];
        let batch = RecordBatch::try_new(Arc::new(vertex_schema()), columns)?;
        write_table(output_vertices, output_fmt, &batch)?;
        info!("wrote {} vertices to {}", vertices.len(), output_vertices);
    }
    Ok(())
}

pub fn write_edges(
    output_edges: &Option<String>,
    output_fmt: OutputFormat,
    working: &WorkingGraph,
) -> anyhow::Result<()> {
    if let Some(output_edges) = output_edges {
        let mut edges: Vec<_> = working.graph().edge_weights().copied().collect();
        edges.sort_by_key(|e| (e.frame_source, e.mask_id_source, e.frame_target, e.mask_id_target));

        let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(edges.iter().map(|e| e.frame_source as u32).collect::<UInt32Array>()),
            Arc::new(edges.iter().map(|e| e.frame_target as u32).collect::<UInt32Array>()),
            Arc::new(edges.iter().map(|e| e.mask_id_source).collect::<UInt32Array>()),
            Arc::new(edges.iter().map(|e| e.mask_id_target).collect::<UInt32Array>()),
            Arc::new(edges.iter().map(|e| e.overlap_area).collect::<UInt64Array>()),
            Arc::new(
                edges
                    .iter()
                    .map(|e| e.overlap_fraction_source)
                    .collect::<Float32Array>(),
            ),
            Arc::new(
                edges
                    .iter()
                    .map(|e| e.overlap_fraction_target)
                    .collect::<Float32Array>(),
            ),
        ];
        let batch = RecordBatch::try_new(Arc::new(edge_schema()), columns)?;
        write_table(output_edges, output_fmt, &batch)?;
        info!("wrote {} edges to {}", edges.len(), output_edges);
    }
    Ok(())
}

pub fn write_track_stats(
    output_tracks: &Option<String>,
    output_fmt: OutputFormat,
    stats: &[TrackStats],
) -> anyhow::Result<()> {
    if let Some(output_tracks) = output_tracks {
        let column = |f: fn(&TrackStats) -> usize| -> Arc<dyn arrow::array::Array> {
            Arc::new(stats.iter().map(|s| f(s) as u32).collect::<UInt32Array>())
        };
        let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(stats.iter().map(|s| s.mask_id).collect::<UInt32Array>()),
            column(|s| s.first_frame),
            column(|s| s.last_frame),
            column(|s| s.frames_present),
            column(|s| s.missing),
            column(|s| s.divisions),
            column(|s| s.fusions),
        ];
        let batch = RecordBatch::try_new(Arc::new(track_stats_schema()), columns)?;
        write_table(output_tracks, output_fmt, &batch)?;
    }
    Ok(())
}
