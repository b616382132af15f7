use std::path::Path;

use anyhow::Context;
use atlaspack_style_extraction::extract_styles;
use atlaspack_style_extraction::{ExtractionOutput, StyleExtractionConfig};
use rayon::iter::{ParallelBridge, ParallelIterator};

const SOURCE_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "mts", "cts", "mjs", "cjs"];

#[derive(Debug, Default, PartialEq)]
pub struct Summary {
  pub processed: usize,
  pub extracted: usize,
  pub failed: usize,
}

/// Sources worth extracting, skipping dependencies and extracted modules
fn is_source(path: &Path) -> bool {
  if path
    .components()
    .any(|component| component.as_os_str() == "node_modules")
  {
    return false;
  }

  let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
    return false;
  };
  if name.starts_with("extracted_") && name.ends_with(".css.ts") {
    return false;
  }

  path
    .extension()
    .and_then(|extension| extension.to_str())
    .is_some_and(|extension| SOURCE_EXTENSIONS.contains(&extension))
}

/// Extracts the styles of the file at `path`, registered as `filename`
pub fn extract_file(
  config: &StyleExtractionConfig,
  path: &Path,
  filename: &str,
) -> anyhow::Result<ExtractionOutput> {
  let code = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read {}", path.display()))?;
  let output = extract_styles(config, filename, &code)
    .with_context(|| format!("Failed to extract styles of {}", path.display()))?;

  Ok(output)
}

/// Writes the rewritten source to `out_dir/relative`, and the extracted module
/// next to it
pub fn write_output(output: &ExtractionOutput, relative: &Path, out_dir: &Path) -> anyhow::Result<()> {
  let target = out_dir.join(relative);
  if let Some(parent) = target.parent() {
    std::fs::create_dir_all(parent)?;
  }

  std::fs::write(&target, &output.code)
    .with_context(|| format!("Failed to write {}", target.display()))?;

  if let Some(auxiliary) = &output.auxiliary {
    let auxiliary_target = target.with_file_name(&auxiliary.path);
    std::fs::write(&auxiliary_target, &auxiliary.code)
      .with_context(|| format!("Failed to write {}", auxiliary_target.display()))?;
  }

  Ok(())
}

/// Extracts every source under `root` in parallel, mirroring the directory
/// structure into `out_dir`
pub fn extract_directory(
  config: &StyleExtractionConfig,
  root: &Path,
  out_dir: &Path,
) -> anyhow::Result<Summary> {
  let results: Vec<anyhow::Result<bool>> = jwalk::WalkDir::new(root)
    .into_iter()
    .par_bridge()
    .filter_map(|entry| -> Option<anyhow::Result<bool>> {
      let entry = match entry {
        Ok(entry) => entry,
        Err(err) => return Some(Err(err.into())),
      };

      let path = entry.path();
      if !entry.file_type().is_file() || !is_source(&path) {
        return None;
      }

      let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
      let filename = relative.to_string_lossy().to_string();

      Some(
        extract_file(config, &path, &filename).and_then(|output| {
          write_output(&output, &relative, out_dir)?;
          Ok(output.auxiliary.is_some())
        }),
      )
    })
    .inspect(|result| {
      if let Err(err) = result {
        tracing::error!("Error: {:#}", err);
      }
    })
    .collect();

  let mut summary = Summary::default();
  for result in results {
    summary.processed += 1;
    match result {
      Ok(true) => summary.extracted += 1,
      Ok(false) => {}
      Err(_) => summary.failed += 1,
    }
  }

  Ok(summary)
}
