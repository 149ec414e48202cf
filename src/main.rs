use anyhow::Context;
use clap::Parser;
use log::info;
use rayon::current_num_threads;
use std::fs::File;
use std::io::Write;
use std::time::Instant;

mod maskio;
mod output;
mod schemas;

use celltrack::tracking::{CellTracker, Diagnostics, TrackingParams};
use maskio::{read_mask, write_mask};
use output::{write_edges, write_track_stats, write_vertices};
use schemas::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "celltrack")]
#[command(about = "Track cells through a time-lapse segmentation mask, relabeling them into consistent tracks and repairing short gaps.")]
struct Args {
    // [T, Y, X] label volume in .npy format
    mask: String,

    #[arg(short, long, default_value = "celltrack-mask.npy")]
    output_mask: String,

    #[arg(long, default_value = None)]
    output_vertices: Option<String>,

    #[arg(long, default_value = None)]
    output_edges: Option<String>,

    #[arg(long, default_value = None)]
    output_tracks: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_fmt: OutputFormat,

    // Write the collected diagnostics to this file.
    #[arg(long, default_value = None)]
    output_diagnostics: Option<String>,

    // Relabel only, without the clean-up passes.
    #[arg(long, default_value_t = false)]
    no_clean: bool,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    params: TrackingParams,
}

fn set_up_bar(npasses: usize) -> anyhow::Result<indicatif::ProgressBar> {
    const TEMPLATE: &str = "{spinner} [{elapsed_precise}] clean-up pass {pos}/{len} {bar:40} {msg}";
    let bar = indicatif::ProgressBar::new(npasses as u64);
    bar.set_style(indicatif::ProgressStyle::with_template(TEMPLATE)?);
    Ok(bar)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .parse_default_env()
        .init();

    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()
            .context("configuring thread pool")?;
    }
    info!("Using {} threads", current_num_threads());

    args.params.validate()?;

    let t0 = Instant::now();
    let mut mask = read_mask(&args.mask)?;
    let (nframes, height, width) = mask.dim();
    info!(
        "Read {} frames of {}x{} from {} in {:?}",
        nframes,
        height,
        width,
        args.mask,
        t0.elapsed()
    );

    let mut diag = Diagnostics::new();
    let mut tracker = CellTracker::build(mask.view_mut(), args.params.clone(), &mut diag)?;
    let summary = tracker.relabel(mask.view_mut(), &mut diag)?;
    info!(
        "Relabeled into {} tracks ({} matched, {} new)",
        summary.ntracks, summary.matched, summary.fresh
    );

    if !args.no_clean && args.params.clean_passes > 0 {
        let bar = set_up_bar(args.params.clean_passes)?;
        let mut total = 0;
        for _ in 0..args.params.clean_passes {
            let repaired = tracker.clean_pass(mask.view_mut(), &mut diag)?;
            bar.inc(1);
            if repaired == 0 {
                break;
            }
            total += repaired;
            bar.set_message(format!("{} repaired", total));
        }
        bar.finish_and_clear();
        info!("Repaired {} defects", total);
    }

    write_mask(&args.output_mask, &mask)?;

    let stats = tracker.track_statistics();
    let working = tracker.working_graph();
    info!(
        "Working graph: {} vertices, {} edges, {} tracks",
        working.graph().node_count(),
        working.graph().edge_count(),
        stats.len()
    );
    write_vertices(&args.output_vertices, args.output_fmt, working)?;
    write_edges(&args.output_edges, args.output_fmt, working)?;
    write_track_stats(&args.output_tracks, args.output_fmt, &stats)?;

    if let Some(path) = &args.output_diagnostics {
        let mut file =
            File::create(path).with_context(|| format!("creating {}", path))?;
        for message in diag.messages() {
            writeln!(file, "{}", message)?;
        }
    }

    Ok(())
}
