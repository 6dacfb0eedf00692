//! retex - texture container converter
//!
//! Turns DDS/VTF textures into editable PNG + JSON pairs and back.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use retex::config::ConverterConfig;
use retex::paths;
use retex::pipeline::{self, BatchJob, Identity, ImageTransform, Resize};
use retex::textures::{ContainerKind, ContainerMetadata, TextureCodec, TextureInfo};

#[derive(Parser)]
#[command(name = "retex")]
#[command(version)]
#[command(about = "Convert DDS/VTF textures to editable PNG + metadata and back")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to VTFCmd (searched on PATH otherwise)
    #[arg(long, env = "VTFCMD_PATH", global = true)]
    vtf_tool: Option<PathBuf>,

    /// Directory for editable PNG/JSON pairs
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Seconds before a VTFCmd call is killed
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container metadata for textures
    Info {
        /// Texture files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Print the full metadata record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode textures into <stem>.png + <stem>.json in the work directory,
    /// mirroring the folders of directory inputs
    Decode {
        /// Texture files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Encode an edited PNG back into a texture container
    Encode {
        /// Edited image
        image: PathBuf,

        /// Metadata side-car (defaults to <stem>.json next to the image)
        #[arg(short, long)]
        meta: Option<PathBuf>,

        /// Target container: dds or vtf
        #[arg(short, long)]
        format: Option<String>,

        /// Output path (defaults to <stem>.<format> next to the image)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode, resize and re-encode textures
    Process {
        /// Texture files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory; directory inputs keep their layout
        #[arg(short, long)]
        output: PathBuf,

        /// Scale factor applied to width and height
        #[arg(long, conflicts_with_all = ["width", "height"])]
        scale: Option<f32>,

        /// Exact output width
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Exact output height
        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// Target container (defaults to each input's own)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the settings file
        #[arg(long)]
        save: bool,
    },
}

fn parse_container(name: &str) -> Result<ContainerKind> {
    ContainerKind::from_name(name)
        .with_context(|| format!("Unknown container format: {} (expected dds or vtf)", name))
}

/// Expand directories into the texture files under them, paired with their root
fn collect_textures(inputs: &[PathBuf]) -> Vec<(PathBuf, PathBuf)> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(
                walkdir::WalkDir::new(input)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && paths::is_texture_path(e.path()))
                    .map(|e| (input.clone(), e.into_path())),
            );
        } else {
            let root = input.parent().map(Path::to_path_buf).unwrap_or_default();
            files.push((root, input.clone()));
        }
    }
    files
}

fn progress_bar(len: usize, label: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] {} \
                 [{{bar:40.cyan/blue}}] {{pos}}/{{len}} | {{msg}}",
                label
            ))?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        let level = if cli.verbose { "retex=debug" } else { "retex=warn" };
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
            .init();
    }

    let mut config = ConverterConfig::load();
    if let Some(tool) = cli.vtf_tool {
        config.vtf_tool = Some(tool);
    }
    if let Some(dir) = cli.work_dir {
        config.work_dir = dir;
    }
    if let Some(secs) = cli.timeout {
        config.tool_timeout_secs = secs;
    }
    config.validate()?;

    let codec = TextureCodec::from_config(&config);

    match cli.command {
        Commands::Info { inputs, json } => {
            let files = collect_textures(&inputs);
            let mut failed = 0;
            for (_, file) in &files {
                match codec.inspect(file) {
                    Ok(meta) if json => println!("{}", serde_json::to_string_pretty(&meta)?),
                    Ok(meta) => println!("{}: {}", file.display(), TextureInfo::from(&meta)),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", file.display(), e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} textures could not be read", failed, files.len());
            }
        }

        Commands::Decode { inputs } => {
            let files = collect_textures(&inputs);
            if files.is_empty() {
                bail!("No DDS or VTF files found");
            }

            // Directory layouts are mirrored; anything still sharing a name would overwrite
            let targets: Vec<_> = files
                .iter()
                .map(|(root, file)| paths::editable_paths(file, Some(root), codec.work_dir()))
                .collect();
            let collisions = paths::colliding_paths(targets.iter().map(|t| t.image_path.as_path()));
            if !collisions.is_empty() {
                for path in &collisions {
                    eprintln!("More than one input would write {}", path.display());
                }
                bail!(
                    "{} editable outputs collide; decode those inputs separately",
                    collisions.len()
                );
            }

            let pb = progress_bar(files.len(), "Decoding")?;
            let results: Vec<_> = files
                .par_iter()
                .map(|(root, file)| {
                    let result = codec.convert_to_editable_under(file, root);
                    pb.inc(1);
                    if let Some(name) = file.file_name() {
                        pb.set_message(name.to_string_lossy().into_owned());
                    }
                    (file, result)
                })
                .collect();
            pb.finish_and_clear();

            let mut failed = 0;
            for (file, result) in results {
                match result {
                    Ok(asset) => println!("{} -> {}", file.display(), asset.image_path.display()),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", file.display(), e);
                    }
                }
            }
            println!(
                "\nDecoded {} textures into {}",
                files.len() - failed,
                codec.work_dir().display()
            );
            if failed > 0 {
                bail!("{} textures failed to decode", failed);
            }
        }

        Commands::Encode {
            image,
            meta,
            format,
            output,
        } => {
            let meta = meta.or_else(|| paths::find_sidecar(&image));
            let target = match (&format, &output) {
                (Some(name), _) => parse_container(name)?,
                (None, Some(out)) => paths::extension(out)
                    .and_then(|ext| ContainerKind::from_extension(&ext))
                    .with_context(|| format!("Cannot infer container from {}", out.display()))?,
                (None, None) => meta
                    .as_deref()
                    .and_then(|m| ContainerMetadata::load(m).ok())
                    .and_then(|m| m.container)
                    .unwrap_or(ContainerKind::Dds),
            };

            let written = codec
                .convert_from_editable(&image, meta.as_deref(), target, output.as_deref())
                .with_context(|| format!("Failed to encode {}", image.display()))?;
            println!("{} -> {}", image.display(), written.display());
        }

        Commands::Process {
            inputs,
            output,
            scale,
            width,
            height,
            format,
        } => {
            let transform: Box<dyn ImageTransform> = match (scale, width, height) {
                (Some(factor), _, _) if factor > 0.0 => Box::new(Resize::scale(factor)),
                (Some(factor), _, _) => bail!("Scale must be positive, got {}", factor),
                (None, Some(w), Some(h)) => Box::new(Resize::exact(w, h)),
                _ => Box::new(Identity),
            };
            let forced = format.as_deref().map(parse_container).transpose()?;

            let jobs: Vec<BatchJob> = collect_textures(&inputs)
                .into_iter()
                .filter_map(|(root, input)| {
                    let target = forced.or_else(|| retex::textures::container_for(&input).ok())?;
                    let output = paths::mirrored_output(&input, &root, &output, target.extension());
                    Some(BatchJob { input, output, target })
                })
                .collect();
            if jobs.is_empty() {
                bail!("No DDS or VTF files found");
            }
            let collisions = paths::colliding_paths(jobs.iter().map(|j| j.output.as_path()));
            if !collisions.is_empty() {
                for path in &collisions {
                    eprintln!("More than one input would write {}", path.display());
                }
                bail!("{} outputs collide; process those inputs separately", collisions.len());
            }

            let pb = progress_bar(jobs.len(), "Processing")?;
            let results = pipeline::process_batch(&codec, transform.as_ref(), &jobs, |done| {
                pb.set_position(done as u64);
            });
            pb.finish_and_clear();

            let failed: Vec<_> = jobs
                .iter()
                .zip(&results)
                .filter_map(|(job, r)| r.as_ref().err().map(|e| (job, e)))
                .collect();
            for (job, e) in &failed {
                eprintln!("{}: {:#}", job.input.display(), e);
            }
            println!(
                "\nProcessed {} textures into {}",
                jobs.len() - failed.len(),
                output.display()
            );
            if !failed.is_empty() {
                bail!("{} textures failed", failed.len());
            }
        }

        Commands::Config { save } => {
            let path = ConverterConfig::settings_path()?;
            println!("Settings file: {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            match retex::textures::locate_vtfcmd(config.vtf_tool.as_deref()) {
                Some(tool) => println!("VTFCmd:        {}", tool.display()),
                None => println!("VTFCmd:        not found (VTF conversion disabled)"),
            }
            if save {
                config.save(&path)?;
                println!("Saved.");
            }
        }
    }

    Ok(())
}
