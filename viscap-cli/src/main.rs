//! CLI for the viscap visibility capture engine.
//!
//! Provides commands for inspecting capture files, dumping dataset cells
//! and benchmarking the capture path.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use viscap::axes::{decode_vec, Complex32, FreqChannel, InputDesc, Product, TimeSample};
use viscap::container::{Container, DatasetDef, Dtype};
use viscap::{BundleConfig, FileBundle, SamplePayload, WriterKind};

/// viscap — visibility capture engine CLI.
#[derive(Parser)]
#[command(name = "viscap", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display a capture file's attributes, axes and dataset table.
    Info {
        /// Path to the capture file.
        file: PathBuf,
    },

    /// Dump dataset cells from a capture file.
    Dump {
        /// Path to the capture file.
        file: PathBuf,

        /// Dataset name (e.g. "vis", "index_map/freq", "flags/vis_weight").
        dataset: String,

        /// Time index to dump; time-indexed datasets default to all written rows.
        #[arg(long)]
        time: Option<u32>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run a capture-path benchmark through a file bundle.
    Bench {
        /// Number of time samples to write.
        #[arg(long, default_value = "4096")]
        samples: u64,

        /// Number of correlator inputs (products are the full triangle).
        #[arg(long, default_value = "16")]
        inputs: u16,

        /// Number of frequency channels per chunk.
        #[arg(long, default_value = "8")]
        freqs: u32,

        /// Write strategy ("structured" or "raw").
        #[arg(long, default_value = "raw")]
        writer: String,
    },
}

/// Output format for dump results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { file } => cmd_info(&file),
        Commands::Dump {
            file,
            dataset,
            time,
            format,
        } => cmd_dump(&file, &dataset, time, &format),
        Commands::Bench {
            samples,
            inputs,
            freqs,
            writer,
        } => cmd_bench(samples, inputs, freqs, &writer),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `viscap info <file>`.
fn cmd_info(file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let container = Container::open(file)?;
    let schema = container.schema();

    println!("File: {}", file.display());
    let size = std::fs::metadata(file)?.len();
    println!("Size: {} ({size} bytes)", format_bytes(size));

    let base = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lock_path = file.with_file_name(format!(".{base}.lock"));
    if lock_path.exists() {
        let pid = std::fs::read_to_string(&lock_path).unwrap_or_default();
        println!("Lock: held by pid {}", pid.trim());
    } else {
        println!("Lock: none (file closed cleanly)");
    }
    println!();

    println!(
        "Time: {} of {} samples written",
        schema.num_time, schema.time_capacity
    );
    println!(
        "Axes: freq={}, input={}, prod={}, ev={}",
        schema.axes.freq, schema.axes.input, schema.axes.prod, schema.axes.ev
    );
    println!();

    println!("Attributes: {}", schema.attributes.len());
    for (key, value) in &schema.attributes {
        println!("  {key} = \"{value}\"");
    }
    println!();

    println!("Datasets: {}", schema.datasets.len());
    for ds in &schema.datasets {
        let bytes = ds.capacity * ds.dtype.elem_size();
        println!(
            "  {} [{}] {:?}: {} elements, {} at offset {}",
            ds.name,
            ds.axes.join(","),
            ds.dtype,
            ds.capacity,
            format_bytes(bytes),
            ds.offset
        );
        for (key, value) in &ds.attributes {
            println!("    {key} = \"{value}\"");
        }
    }

    Ok(())
}

/// Implements `viscap dump <file> <dataset>`.
fn cmd_dump(
    file: &PathBuf,
    dataset: &str,
    time: Option<u32>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let container = Container::open(file)?;
    let schema = container.schema();

    let index = container
        .dataset_index(dataset)
        .ok_or_else(|| format!("Dataset '{dataset}' not found in '{}'", file.display()))?;
    let def = container.dataset(index).clone();

    // Time-indexed datasets dump per logical row; fixed axes dump whole.
    let (start, count) = if def.axes.first().is_some_and(|a| a == "time") {
        let per_row = def.capacity / u64::from(schema.time_capacity);
        match time {
            Some(t) => {
                if t >= schema.num_time {
                    return Err(format!(
                        "time index {t} out of range (file has {} samples)",
                        schema.num_time
                    )
                    .into());
                }
                (u64::from(t) * per_row, per_row)
            }
            None => (0, u64::from(schema.num_time) * per_row),
        }
    } else {
        (0, def.capacity)
    };

    let raw = container.read_cells(index, start, count)?;

    match format {
        OutputFormat::Csv => {
            println!("# file={}, dataset={dataset}, elements={count}", file.display());
            println!("{}", csv_header(def.dtype));
            for row in csv_rows(&def, &raw) {
                println!("{row}");
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "file": file.display().to_string(),
                "dataset": dataset,
                "start": start,
                "count": count,
                "data": decode_rows(&def, &raw),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn csv_header(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::Freq => "centre,width",
        Dtype::Time => "seq,ctime",
        Dtype::Input => "chan_id,label",
        Dtype::Prod => "input_a,input_b",
        Dtype::Complex32 => "re,im",
        Dtype::Float32 | Dtype::Int32 | Dtype::Uint32 => "value",
    }
}

fn csv_rows(def: &DatasetDef, raw: &[u8]) -> Vec<String> {
    match def.dtype {
        Dtype::Freq => decode_vec::<FreqChannel>(raw)
            .iter()
            .map(|f| format!("{},{}", f.centre, f.width))
            .collect(),
        Dtype::Time => decode_vec::<TimeSample>(raw)
            .iter()
            .map(|t| format!("{},{}", t.seq, t.ctime))
            .collect(),
        Dtype::Input => decode_vec::<InputDesc>(raw)
            .iter()
            .map(|i| format!("{},{}", i.chan_id, i.label()))
            .collect(),
        Dtype::Prod => decode_vec::<Product>(raw)
            .iter()
            .map(|p| format!("{},{}", p.input_a, p.input_b))
            .collect(),
        Dtype::Complex32 => decode_vec::<Complex32>(raw)
            .iter()
            .map(|c| format!("{},{}", c.re, c.im))
            .collect(),
        Dtype::Float32 => decode_vec::<f32>(raw).iter().map(f32::to_string).collect(),
        Dtype::Int32 => decode_vec::<i32>(raw).iter().map(i32::to_string).collect(),
        Dtype::Uint32 => decode_vec::<u32>(raw).iter().map(u32::to_string).collect(),
    }
}

fn decode_rows(def: &DatasetDef, raw: &[u8]) -> Vec<serde_json::Value> {
    match def.dtype {
        Dtype::Freq => decode_vec::<FreqChannel>(raw)
            .iter()
            .map(|f| serde_json::json!({ "centre": f.centre, "width": f.width }))
            .collect(),
        Dtype::Time => decode_vec::<TimeSample>(raw)
            .iter()
            .map(|t| serde_json::json!({ "seq": t.seq, "ctime": t.ctime }))
            .collect(),
        Dtype::Input => decode_vec::<InputDesc>(raw)
            .iter()
            .map(|i| serde_json::json!({ "chan_id": i.chan_id, "label": i.label() }))
            .collect(),
        Dtype::Prod => decode_vec::<Product>(raw)
            .iter()
            .map(|p| serde_json::json!({ "input_a": p.input_a, "input_b": p.input_b }))
            .collect(),
        Dtype::Complex32 => decode_vec::<Complex32>(raw)
            .iter()
            .map(|c| serde_json::json!({ "re": c.re, "im": c.im }))
            .collect(),
        Dtype::Float32 => decode_vec::<f32>(raw)
            .iter()
            .map(|v| serde_json::json!({ "value": v }))
            .collect(),
        Dtype::Int32 => decode_vec::<i32>(raw)
            .iter()
            .map(|v| serde_json::json!({ "value": v }))
            .collect(),
        Dtype::Uint32 => decode_vec::<u32>(raw)
            .iter()
            .map(|v| serde_json::json!({ "value": v }))
            .collect(),
    }
}

/// Implements `viscap bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(
    samples: u64,
    num_inputs: u16,
    num_freqs: u32,
    writer: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind: WriterKind = writer.parse()?;
    let nprod = usize::from(num_inputs) * (usize::from(num_inputs) + 1) / 2;

    println!("viscap capture-path benchmark");
    println!("  Samples: {samples}");
    println!("  Inputs: {num_inputs} ({nprod} products)");
    println!("  Frequencies: {num_freqs}");
    println!("  Writer: {}", kind.as_str());
    println!();

    let temp_dir = std::env::temp_dir().join("viscap_bench");
    let _ = std::fs::remove_dir_all(&temp_dir);
    std::fs::create_dir_all(&temp_dir)?;

    let freqs: Vec<FreqChannel> = (0..num_freqs)
        .map(|i| FreqChannel {
            centre: 800.0 - f64::from(i) * 0.4,
            width: 0.4,
        })
        .collect();
    let inputs: Vec<InputDesc> = (0..num_inputs)
        .map(|i| InputDesc::new(i, &format!("inp{i:04}")))
        .collect();
    let mut prods = Vec::with_capacity(nprod);
    for a in 0..num_inputs {
        for b in a..num_inputs {
            prods.push(Product {
                input_a: a,
                input_b: b,
            });
        }
    }

    let mut metadata = BTreeMap::new();
    metadata.insert("weight_type".to_string(), "inverse_var".to_string());
    metadata.insert("instrument_name".to_string(), "bench".to_string());

    let mut config = BundleConfig::new("bench", 0);
    config.writer = kind;
    let mut bundle = FileBundle::new(&temp_dir, config, metadata, freqs, inputs, prods, 0)?;

    let vis = vec![Complex32::new(1.5, -0.5); nprod];
    let weight = vec![1.0f32; nprod];
    let gain_coeff = vec![Complex32::new(1.0, 0.0); usize::from(num_inputs)];
    let gain_exp = vec![0i32; usize::from(num_inputs)];

    println!("Writing {samples} samples x {num_freqs} frequencies...");
    let start = Instant::now();

    for seq in 0..samples {
        for f in 0..num_freqs {
            bundle.add_sample(
                TimeSample {
                    seq,
                    ctime: seq as f64,
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

    let elapsed = start.elapsed();
    let total_writes = samples * u64::from(num_freqs);
    let us_per_write = elapsed.as_micros() as f64 / total_writes as f64;
    let writes_per_sec = total_writes as f64 / elapsed.as_secs_f64();
    let files = bundle.files_created();
    drop(bundle);

    println!();
    println!("Results:");
    println!("  Cell writes: {total_writes}");
    println!("  Files: {files}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {us_per_write:.2} us/sample");
    println!("  Throughput: {writes_per_sec:.0} samples/sec");

    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(())
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
