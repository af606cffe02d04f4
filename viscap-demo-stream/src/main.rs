//! Demo correlator stream.
//!
//! Simulates the output side of a correlator: one thread per frequency
//! chunk, each delivering visibility samples at a fixed cadence into its
//! own [`FileBundle`], with a configurable lag between frequencies to
//! exercise the out-of-order tolerance of the sliding file window.
//!
//! Run with: `cargo run -p viscap-demo-stream -- --output ./demo_acq`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use viscap::axes::{Complex32, FreqChannel, InputDesc, Product, TimeSample};
use viscap::{BundleConfig, FileBundle, SamplePayload, WriterKind};

/// Command-line arguments for the demo stream.
#[derive(Parser)]
#[command(name = "viscap-demo-stream", version, about)]
struct Args {
    /// Directory to write the acquisition into (created if missing).
    #[arg(long, default_value = "./demo_acq")]
    output: PathBuf,

    /// Number of frequency chunks (one bundle and one thread each).
    #[arg(long, default_value = "2")]
    chunks: u32,

    /// Frequency channels per chunk.
    #[arg(long, default_value = "4")]
    freqs_per_chunk: u32,

    /// Number of correlator inputs (products are the full triangle).
    #[arg(long, default_value = "4")]
    inputs: u16,

    /// Number of time samples to stream.
    #[arg(long, default_value = "64")]
    samples: u64,

    /// Logical samples per file.
    #[arg(long, default_value = "16")]
    rollover: u32,

    /// Maximum simultaneously open files per bundle.
    #[arg(long, default_value = "4")]
    window: usize,

    /// How many samples the last frequency of a chunk lags behind the first.
    #[arg(long, default_value = "2")]
    lag: u64,

    /// Write strategy ("structured" or "raw").
    #[arg(long, default_value = "raw")]
    writer: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        tracing::error!("demo stream failed: {e}");
        std::process::exit(1);
    }
    tracing::info!("demo stream finished");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let kind: WriterKind = args.writer.parse()?;
    std::fs::create_dir_all(&args.output)?;

    let nprod = usize::from(args.inputs) * (usize::from(args.inputs) + 1) / 2;
    tracing::info!(
        chunks = args.chunks,
        samples = args.samples,
        products = nprod,
        "starting demo correlator stream"
    );

    let mut workers = Vec::new();
    for chunk in 0..args.chunks {
        let output = args.output.clone();
        let args = StreamArgs {
            chunk,
            freqs_per_chunk: args.freqs_per_chunk,
            inputs: args.inputs,
            samples: args.samples,
            rollover: args.rollover,
            window: args.window,
            lag: args.lag,
            kind,
        };
        workers.push(thread::spawn(move || stream_chunk(&output, &args)));
    }

    for worker in workers {
        match worker.join() {
            Ok(Ok(stats)) => {
                tracing::info!(
                    chunk = stats.chunk,
                    files = stats.files,
                    dropped = stats.dropped,
                    "chunk stream complete"
                );
            }
            Ok(Err(e)) => return Err(e.to_string().into()),
            Err(_) => return Err("chunk worker panicked".into()),
        }
    }

    Ok(())
}

/// Per-chunk stream parameters.
#[derive(Clone, Copy)]
struct StreamArgs {
    chunk: u32,
    freqs_per_chunk: u32,
    inputs: u16,
    samples: u64,
    rollover: u32,
    window: usize,
    lag: u64,
    kind: WriterKind,
}

/// Summary of one chunk's stream.
struct StreamStats {
    chunk: u32,
    files: u64,
    dropped: u64,
}

/// Streams one frequency chunk into its own bundle.
///
/// Frequencies within the chunk are delivered staggered: frequency `f`
/// runs `lag * f / nfreq` samples behind frequency 0, which keeps several
/// time rows of each file open at once.
#[allow(clippy::cast_precision_loss)] // synthetic payload values
fn stream_chunk(output: &PathBuf, args: &StreamArgs) -> viscap::Result<StreamStats> {
    let freqs: Vec<FreqChannel> = (0..args.freqs_per_chunk)
        .map(|i| FreqChannel {
            centre: 800.0 - f64::from(args.chunk * args.freqs_per_chunk + i) * 0.4,
            width: 0.4,
        })
        .collect();
    let inputs: Vec<InputDesc> = (0..args.inputs)
        .map(|i| InputDesc::new(i, &format!("demo{i:03}")))
        .collect();
    let mut prods = Vec::new();
    for a in 0..args.inputs {
        for b in a..args.inputs {
            prods.push(Product {
                input_a: a,
                input_b: b,
            });
        }
    }
    let nprod = prods.len();
    let ninput = inputs.len();

    let mut metadata = BTreeMap::new();
    metadata.insert("weight_type".to_string(), "inverse_var".to_string());
    metadata.insert("instrument_name".to_string(), "demo".to_string());
    metadata.insert("notes".to_string(), "simulated stream".to_string());

    let config = BundleConfig {
        acq_name: "demo_acq".to_string(),
        freq_chunk: args.chunk,
        writer: args.kind,
        rollover: args.rollover,
        window_size: args.window,
        seq_stride: 1,
    };
    let mut bundle = FileBundle::new(
        output.clone(),
        config,
        metadata,
        freqs,
        inputs,
        prods,
        0,
    )?;

    let nfreq = u64::from(args.freqs_per_chunk);
    let total_steps = args.samples + args.lag;

    // Deliver column-by-column with a per-frequency lag: at step s,
    // frequency f emits its sample for seq = s - lag(f), once available.
    for step in 0..total_steps {
        for f in 0..args.freqs_per_chunk {
            let lag = args.lag * u64::from(f) / nfreq.max(1);
            let Some(seq) = step.checked_sub(lag) else {
                continue;
            };
            if seq >= args.samples {
                continue;
            }

            let vis: Vec<Complex32> = (0..nprod)
                .map(|p| Complex32::new(seq as f32, p as f32))
                .collect();
            let weight = vec![1.0f32; nprod];
            let gain_coeff = vec![Complex32::new(1.0, 0.0); ninput];
            let gain_exp = vec![0i32; ninput];

            bundle.add_sample(
                TimeSample {
                    seq,
                    ctime: seq as f64 * 10.0,
                },
                f,
                &SamplePayload {
                    vis: &vis,
                    weight: &weight,
                    gain_coeff: &gain_coeff,
                    gain_exp: &gain_exp,
                    eigen: None,
                },
            )?;
        }
    }

    Ok(StreamStats {
        chunk: args.chunk,
        files: bundle.files_created(),
        dropped: bundle.samples_dropped(),
    })
}
