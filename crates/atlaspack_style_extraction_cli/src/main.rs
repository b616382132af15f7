mod extract;

use std::path::{Path, PathBuf};

use anyhow::Context;
use atlaspack_style_extraction::StyleExtractionConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Moves style definitions of JavaScript and TypeScript sources into extracted
/// modules
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
  /// Source file, or directory of sources, to extract styles from
  input: PathBuf,
  /// Directory the rewritten sources and extracted modules are written to.
  /// When omitted, the result for a single file is printed as JSON
  #[arg(short, long)]
  out_dir: Option<PathBuf>,
  /// JSON configuration file
  #[arg(short, long, env = "STYLE_EXTRACTION_CONFIG")]
  config: Option<PathBuf>,
  /// Package the extraction APIs are imported from
  #[arg(long, env = "STYLE_EXTRACTION_PACKAGE")]
  package: Option<String>,
  /// Extraction API, may be repeated. Replaces the configured list
  #[arg(long = "api")]
  apis: Vec<String>,
  /// Keep relocated declarations in the rewritten sources
  #[arg(long)]
  no_prune: bool,
}

impl Args {
  fn load_config(&self) -> anyhow::Result<StyleExtractionConfig> {
    let mut config = match &self.config {
      Some(path) => {
        let contents = std::fs::read_to_string(path)
          .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
          .with_context(|| format!("Invalid config {}", path.display()))?
      }
      None => StyleExtractionConfig::default(),
    };

    if let Some(package) = &self.package {
      config.package = package.clone();
    }
    if !self.apis.is_empty() {
      config.extraction_apis = self.apis.clone();
    }
    if self.no_prune {
      config.prune_relocated_bindings = false;
    }

    Ok(config)
  }
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = args.load_config()?;
  tracing::debug!(?config, "Loaded configuration");

  if args.input.is_dir() {
    let Some(out_dir) = &args.out_dir else {
      anyhow::bail!("--out-dir is required to extract a directory");
    };

    let start = std::time::Instant::now();
    let summary = extract::extract_directory(&config, &args.input, out_dir)?;
    tracing::info!(
      "processed {} files, extracted {}, errors {} in {:?}",
      summary.processed,
      summary.extracted,
      summary.failed,
      start.elapsed()
    );

    if summary.failed > 0 {
      anyhow::bail!("Failed to extract styles of {} files", summary.failed);
    }
    return Ok(());
  }

  let filename = args.input.to_string_lossy().to_string();
  let output = extract::extract_file(&config, &args.input, &filename)?;

  match &args.out_dir {
    Some(out_dir) => {
      let relative = args
        .input
        .file_name()
        .context("Input is not a file")?;
      extract::write_output(&output, Path::new(relative), out_dir)?;
    }
    None => {
      let json = serde_json::json!({
        "code": output.code,
        "auxiliary": output.auxiliary.map(|auxiliary| serde_json::json!({
          "path": auxiliary.path,
          "code": auxiliary.code,
        })),
      });
      println!("{}", serde_json::to_string_pretty(&json)?);
    }
  }

  Ok(())
}
