use anyhow::{Context, Result};
use clap::Parser;
use closure_corrector::core::{ClosureMetric, CorrectionConfig, CorrectionMode, UnwrapErrorCorrector};
use closure_corrector::io::read_template;
use std::path::PathBuf;

/// Unwrapping error correction based on the consistency of triplets of interferograms
#[derive(Parser, Debug)]
#[command(name = "closure-corrector", version, about)]
struct Args {
    /// Interferogram stack to correct
    ifgram_file: PathBuf,

    /// Template file with pysar.unwrapError.* options
    #[arg(short = 't', long = "template")]
    template: Option<PathBuf>,

    /// Mask of pixels to correct
    #[arg(short = 'm', long = "mask")]
    mask_file: Option<PathBuf>,

    /// Dataset to correct
    #[arg(short = 'i', long = "in-dataset", default_value = "unwrapPhase")]
    dataset_in: String,

    /// Dataset to write [default: <in-dataset>_closure]
    #[arg(short = 'o', long = "out-dataset")]
    dataset_out: Option<String>,

    /// Skip the zero jump constraint and solve all pixels in one batch
    #[arg(long)]
    fast: bool,

    /// Skip if the output dataset already exists
    #[arg(long)]
    update: bool,

    /// Threshold of non-zero phase closure
    #[arg(long)]
    threshold: Option<f32>,

    /// Regularization factor
    #[arg(long)]
    alpha: Option<f64>,

    /// Relative singular value cut-off of the pseudo-inverse
    #[arg(long)]
    rcond: Option<f64>,

    /// Memory budget per block in bytes
    #[arg(long)]
    memory: Option<usize>,

    /// Closure residual: cycles or wrapped
    #[arg(long = "closure-metric")]
    closure_metric: Option<ClosureMetric>,

    /// Output store for the non-zero closure counts
    #[arg(long = "closure-count-file")]
    closure_count_file: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Result<CorrectionConfig> {
        let mut config = CorrectionConfig {
            dataset_in: self.dataset_in.clone(),
            dataset_out: self.dataset_out.clone(),
            ..CorrectionConfig::default()
        };

        if let Some(template) = &self.template {
            let options = read_template(template)
                .with_context(|| format!("Failed to read template {}", template.display()))?;
            config.update_from_template(&options)?;
        }

        if self.mask_file.is_some() {
            config.mask_file = self.mask_file.clone();
        }
        if self.fast {
            config.mode = CorrectionMode::Fast;
        }
        config.update = self.update;
        if let Some(threshold) = self.threshold {
            config.params.threshold = threshold;
        }
        if let Some(alpha) = self.alpha {
            config.params.alpha = alpha;
        }
        if let Some(rcond) = self.rcond {
            config.params.rcond = rcond;
        }
        if let Some(metric) = self.closure_metric {
            config.params.closure_metric = metric;
        }
        if let Some(memory) = self.memory {
            config.memory_budget = memory;
        }
        if self.closure_count_file.is_some() {
            config.closure_count_file = self.closure_count_file.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config()?;
    log::debug!("Correction config: {:?}", config);

    let summary = UnwrapErrorCorrector::new(config)
        .run(&args.ifgram_file)
        .with_context(|| format!("Failed to correct {}", args.ifgram_file.display()))?;

    if summary.skipped_run {
        println!("{} already contains /{}, nothing done", summary.stack_path.display(), summary.dataset_out);
        return Ok(());
    }

    println!("Corrected stack: {} (/{})", summary.stack_path.display(), summary.dataset_out);
    println!(
        "  {} interferograms, {} triangles, {} blocks",
        summary.num_ifgrams, summary.num_triangles, summary.num_blocks
    );
    println!(
        "  pixels: {} read, {} masked out, {} flagged, {} corrected, {} skipped",
        summary.stats.pixels,
        summary.stats.masked_out,
        summary.stats.flagged,
        summary.stats.corrected,
        summary.stats.skipped
    );
    if let Some(path) = &summary.closure_count_path {
        println!("  closure counts: {}", path.display());
    }
    println!("  time used: {:.1} secs", summary.elapsed.as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from([
            "closure-corrector",
            "INPUTS/ifgramStack",
            "--fast",
            "--threshold",
            "0.3",
            "--closure-metric",
            "wrapped",
            "-m",
            "waterMask",
        ]);
        let config = args.config().unwrap();
        assert_eq!(config.mode, CorrectionMode::Fast);
        assert_eq!(config.params.threshold, 0.3);
        assert_eq!(config.params.closure_metric, ClosureMetric::Wrapped);
        assert_eq!(config.mask_file, Some(PathBuf::from("waterMask")));
        assert_eq!(config.output_dataset(), "unwrapPhase_closure");
    }
}
