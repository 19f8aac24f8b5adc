use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use pgnet_codec::estimate::{progressive_rmse, uniform_quantize, UNIFORM_BITS};
use pgnet_codec::packing::packed_len;
use pgnet_codec::BitWidthInterface;
use pgnet_core::ops::top_k;
use pgnet_core::{NamedTensors, Tensor};
use pgnet_loader::loader::MANIFEST_FILE;
use pgnet_loader::source::read_model_dir;
use pgnet_loader::{
    AnyFetcher, BoxError, Fetch, LoaderConfig, ModelHandle, PartitionManifest, PartitionWriter,
    ProgressiveLoader, StepInfo,
};
use pgnet_serve::ServeConfig;

const BANNER: &str = r#"
                         _
 _ __   __ _ _ __   ___| |_
| '_ \ / _` | '_ \ / _ \ __|
| |_) | (_| | | | |  __/ |_
| .__/ \__, |_| |_|\___|\__|
|_|    |___/"#;

const DEFAULT_INTERFACE: &str = "2,2,2,2,2,2,2,2";

#[derive(Parser)]
#[command(
    name = "pgnet",
    about = "Progressive model delivery",
    long_about = "Convert models into bit-width partitions, host them, and load them\nprogressively so a coarse model is usable after the first partition.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show a progressive model's layout, or build info when no model is given
    Info {
        /// Model directory or URL holding progressive.json
        model: Option<String>,
    },
    /// Convert a model directory into progressive partitions
    Convert {
        /// Directory with model.json plus weight shards or .safetensors files
        #[arg(long)]
        input: PathBuf,
        /// Output directory
        #[arg(long)]
        output: PathBuf,
        /// Bit widths per partition (comma-separated, summing to at most 32)
        #[arg(long, default_value = DEFAULT_INTERFACE)]
        interface: BitWidthInterface,
        /// Overwrite a non-empty output directory
        #[arg(long)]
        force: bool,
    },
    /// Compare uniform quantization error against progressive levels
    Estimate {
        /// Directory with model.json plus weight shards or .safetensors files
        #[arg(long)]
        input: PathBuf,
        /// Uniform quantization width: 4, 8 or 16
        #[arg(long, default_value = "8")]
        bits: u32,
        /// Bit widths per partition
        #[arg(long, default_value = DEFAULT_INTERFACE)]
        interface: BitWidthInterface,
    },
    /// Load a progressive model step by step
    Load {
        /// Model directory or URL holding progressive.json
        model: String,
        /// Stop after this many steps
        #[arg(long)]
        steps: Option<usize>,
        /// Fetch each partition only after the previous step finished
        #[arg(long)]
        sequential: bool,
        /// JSON file of inputs: {"<name>": {"shape": [...], "data": [...]}}
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Host converted models over HTTP
    Serve {
        /// Directory whose subdirectories are converted models
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { model } => match model {
            Some(model) => runtime()?.block_on(cmd_info_model(&model)),
            None => {
                cmd_info();
                Ok(())
            }
        },
        Commands::Convert { input, output, interface, force } => {
            cmd_convert(&input, &output, interface, force)
        }
        Commands::Estimate { input, bits, interface } => cmd_estimate(&input, bits, &interface),
        Commands::Load { model, steps, sequential, input } => {
            runtime()?.block_on(cmd_load(&model, steps, sequential, input.as_deref()))
        }
        Commands::Serve { root, addr } => {
            runtime()?.block_on(pgnet_serve::serve(ServeConfig::new(root).with_addr(addr)))
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to create tokio runtime")
}

fn cmd_info() {
    println!("{}", BANNER);
    println!("  v{}  progressive model delivery\n", env!("CARGO_PKG_VERSION"));

    println!("Wire format");
    println!("  model.json        model shell (layers-model | graph-model)");
    println!("  progressive.json  layers, byteSizes, dividingInterface");
    println!("  part-<i>.bin      level i of every layer, manifest order");
    println!("  default interface {}", DEFAULT_INTERFACE);

    println!("\nCrates");
    let crates = [
        ("core", "Tensor, DType, Shape, model shell ops"),
        ("codec", "Bit packing, progressive quantization, error estimates"),
        ("loader", "Manifest, fetchers, model shells, progressive loader"),
        ("serve", "Static model host"),
        ("cli", "This CLI"),
    ];
    for (name, desc) in crates {
        println!("  pgnet-{:<8} {}", name, desc);
    }
}

/// Normalize a directory argument into a location the fetchers accept.
fn model_location(model: &str) -> String {
    if AnyFetcher::is_remote(model) {
        model.to_string()
    } else {
        model.trim_end_matches('/').to_string()
    }
}

async fn cmd_info_model(model: &str) -> Result<()> {
    let config = LoaderConfig::new(model_location(model));
    let location = config.location(MANIFEST_FILE);
    let json = AnyFetcher::new()
        .fetch_json(&location)
        .await
        .with_context(|| format!("failed to fetch {location}"))?;
    let manifest = PartitionManifest::from_json(json)?;

    println!("Model:     {}", config.base_url());
    println!("Interface: {} ({} bits)", manifest.interface(), manifest.interface().total_bits());
    println!("Layers:    {}", manifest.layers.len());
    println!("Bytes:     {}\n", manifest.total_bytes());

    println!("{:<6} {:<14} {:>12} {:>12}", "Step", "File", "Bytes", "Cumulative");
    println!("{}", "-".repeat(47));
    let mut cumulative = 0;
    for (k, file) in manifest.files.iter().enumerate() {
        let len = manifest.step_len(k);
        cumulative += len;
        println!("{:<6} {:<14} {:>12} {:>12}", k, file, len, cumulative);
    }

    println!("\n{:<32} {:<8} {:<16} {:>10}", "Layer", "DType", "Shape", "Bytes");
    println!("{}", "-".repeat(69));
    for layer in &manifest.layers {
        println!(
            "{:<32} {:<8} {:<16} {:>10}",
            layer.name,
            layer.dtype.as_str(),
            format!("{:?}", layer.shape),
            layer.total_bytes()
        );
    }
    Ok(())
}

fn cmd_convert(input: &Path, output: &Path, interface: BitWidthInterface, force: bool) -> Result<()> {
    println!("=== pgnet convert ===");
    println!("Input:     {}", input.display());
    println!("Output:    {}", output.display());
    println!("Interface: {}\n", interface);

    let source = read_model_dir(input)
        .with_context(|| format!("failed to read model from {}", input.display()))?;

    let started = Instant::now();
    let mut writer = PartitionWriter::new(interface);
    for (name, tensor) in &source.tensors {
        writer.add_tensor(name, tensor)?;
    }
    let summary = writer
        .write_to(output, &source.descriptor, force)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Converted {} tensors ({} float32, {} int32) in {:.1}ms",
        summary.layers,
        summary.float_layers,
        summary.int_layers,
        started.elapsed().as_secs_f64() * 1e3
    );
    for (k, bytes) in summary.part_bytes.iter().enumerate() {
        println!("  part-{k}.bin  {bytes:>12} bytes");
    }
    println!("  total       {:>12} bytes", summary.total_bytes());
    Ok(())
}

fn cmd_estimate(input: &Path, bits: u32, interface: &BitWidthInterface) -> Result<()> {
    if !UNIFORM_BITS.contains(&bits) {
        bail!("--bits must be one of {:?}, got {}", UNIFORM_BITS, bits);
    }
    let source = read_model_dir(input)
        .with_context(|| format!("failed to read model from {}", input.display()))?;

    println!("=== pgnet estimate ===");
    println!("Uniform: {} bits    Progressive: {}\n", bits, interface);

    let mut header = format!("{:<32} {:>10} {:>12}", "Tensor", "Elements", "Uniform");
    for k in 0..interface.len() {
        header.push_str(&format!(" {:>11}", format!("L0..{k}")));
    }
    println!("{}", header);
    println!("{}", "-".repeat(header.len()));

    let mut uniform_bytes = 0usize;
    let mut progressive_bytes = 0usize;
    for (name, tensor) in &source.tensors {
        let Some(data) = tensor.as_f32_slice() else {
            continue;
        };
        let uniform = uniform_quantize(data, bits)?;
        let uniform_rmse = pgnet_codec::estimate::rmse(data, &uniform.dequantize())?;
        let levels = progressive_rmse(data, interface)?;

        uniform_bytes += packed_len(data.len(), bits);
        progressive_bytes += interface
            .levels()
            .iter()
            .map(|&w| packed_len(data.len(), w))
            .sum::<usize>();

        let mut row = format!("{:<32} {:>10} {:>12.3e}", name, data.len(), uniform_rmse);
        for err in levels {
            row.push_str(&format!(" {:>11.3e}", err));
        }
        println!("{}", row);
    }

    println!("\nBytes: uniform {} / progressive {}", uniform_bytes, progressive_bytes);
    Ok(())
}

#[derive(Deserialize)]
struct InputSpec {
    shape: Vec<usize>,
    data: Vec<f32>,
}

fn read_inputs(path: &Path) -> Result<NamedTensors> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let specs: BTreeMap<String, InputSpec> = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let mut inputs = NamedTensors::new();
    for (name, spec) in specs {
        let tensor = Tensor::from_f32(spec.data, &spec.shape)
            .with_context(|| format!("input '{name}'"))?;
        inputs.insert(name, tensor);
    }
    Ok(inputs)
}

/// Top-5 of the first row of the first output, by output name.
fn top5(model: &ModelHandle, inputs: &NamedTensors) -> Result<Vec<(usize, f32)>, BoxError> {
    let outputs = model.predict(inputs)?;
    let mut names: Vec<&String> = outputs.keys().collect();
    names.sort();
    let Some(first) = names.first() else {
        return Ok(Vec::new());
    };
    let tensor = &outputs[*first];
    let values = tensor.to_f32_vec();
    let row = tensor.shape().last_dim().min(values.len());
    Ok(top_k(&values[..row], 5))
}

async fn cmd_load(model: &str, steps: Option<usize>, sequential: bool, input: Option<&Path>) -> Result<()> {
    let inputs = input.map(read_inputs).transpose()?;

    let mut config = LoaderConfig::new(model_location(model)).with_logging(true);
    config.num_progress_steps = steps;
    if sequential {
        config = config.sequential();
    }
    config.validate()?;

    let mut loader = ProgressiveLoader::new(config, AnyFetcher::new());
    let started = Instant::now();
    loader.init().await?;
    println!(
        "Initialized in {:.1}ms: {} steps",
        started.elapsed().as_secs_f64() * 1e3,
        loader.num_steps()
    );

    let mut last = Instant::now();
    loader
        .drive(move |model: &ModelHandle, info: StepInfo| -> Result<(), BoxError> {
            let step_ms = last.elapsed().as_secs_f64() * 1e3;
            last = Instant::now();
            print!("step {}/{}  {:>8.1}ms", info.step + 1, info.num_steps, step_ms);
            match &inputs {
                Some(inputs) => {
                    let top = top5(model, inputs)?;
                    let shown: Vec<String> = top.iter().map(|(i, v)| format!("{i}:{v:.4}")).collect();
                    println!("  top-5 [{}]", shown.join(", "));
                }
                None => println!(),
            }
            Ok(())
        })
        .await?;

    println!("Loaded in {:.1}ms", started.elapsed().as_secs_f64() * 1e3);
    Ok(())
}
