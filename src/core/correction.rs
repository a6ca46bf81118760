use crate::core::blocks::{split_into_blocks, DEFAULT_MEMORY_BUDGET};
use crate::core::network::{NetworkTriangles, TriangleDesignMatrix};
use crate::core::solver::{CorrectionMode, CorrectionParams, JumpSolver};
use crate::io::mask::{open_mask, MaskSource};
use crate::io::patch_writer::PatchWriter;
use crate::io::stack::{IfgramStack, UNWRAP_PHASE};
use crate::io::store::{DataType, RasterStore, StoreMetadata};
use crate::io::template::{non_auto, parse_flag};
use crate::types::{BlockBox, ClosureError, ClosureResult, DesignMatrix, PhaseCube};
use ndarray::{Array1, Array2, Array3, Axis};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const TWO_PI: f32 = 2.0 * std::f32::consts::PI;

/// Dataset name of the non-zero closure count output
pub const CLOSURE_COUNT_DATASET: &str = "numNonzeroClosure";

/// File type of the closure count store
pub const CLOSURE_COUNT_FILE_TYPE: &str = "mask";

const TEMPLATE_PREFIX: &str = "pysar.unwrapError.";

/// Options of an unwrapping error correction run
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    /// Dataset to correct
    pub dataset_in: String,
    /// Dataset to write, `<dataset_in>_closure` when unset
    pub dataset_out: Option<String>,
    /// Mask of pixels to analyse
    pub mask_file: Option<PathBuf>,
    pub mode: CorrectionMode,
    /// Skip the run when the output dataset already exists
    pub update: bool,
    /// Bytes of phase data read per block
    pub memory_budget: usize,
    /// Output store of the non-zero closure counts, next to the stack when unset
    pub closure_count_file: Option<PathBuf>,
    pub params: CorrectionParams,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            dataset_in: UNWRAP_PHASE.to_string(),
            dataset_out: None,
            mask_file: None,
            mode: CorrectionMode::Full,
            update: false,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            closure_count_file: None,
            params: CorrectionParams::default(),
        }
    }
}

impl CorrectionConfig {
    pub fn output_dataset(&self) -> String {
        self.dataset_out
            .clone()
            .unwrap_or_else(|| format!("{}_closure", self.dataset_in))
    }

    pub fn closure_count_path(&self, stack_path: &Path) -> PathBuf {
        self.closure_count_file.clone().unwrap_or_else(|| {
            let name = format!("{}_{}", CLOSURE_COUNT_DATASET, self.dataset_in);
            match stack_path.parent() {
                Some(parent) => parent.join(name),
                None => PathBuf::from(name),
            }
        })
    }

    /// Apply `pysar.unwrapError.*` template options; `auto` keeps the current value
    pub fn update_from_template(&mut self, options: &BTreeMap<String, String>) -> ClosureResult<()> {
        let key = |name: &str| format!("{}{}", TEMPLATE_PREFIX, name);

        if let Some(value) = non_auto(options, &key("maskFile")) {
            self.mask_file = if value.eq_ignore_ascii_case("no") {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        if let Some(value) = non_auto(options, &key("fast")) {
            self.mode = if parse_flag(value)? {
                CorrectionMode::Fast
            } else {
                CorrectionMode::Full
            };
        }
        if let Some(value) = non_auto(options, &key("threshold")) {
            self.params.threshold = parse_number(&key("threshold"), value)?;
        }
        if let Some(value) = non_auto(options, &key("alpha")) {
            self.params.alpha = parse_number(&key("alpha"), value)?;
        }
        Ok(())
    }
}

/// Whether two paths name the same file, resolving links when both exist
fn same_path(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ClosureResult<T> {
    value
        .parse()
        .map_err(|_| ClosureError::InvalidFormat(format!("Invalid number for {}: {}", key, value)))
}

/// Pixel counters of one or more blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    /// Pixels read
    pub pixels: usize,
    /// Pixels excluded by the mask
    pub masked_out: usize,
    /// Pixels with non-zero closure sent to the solver
    pub flagged: usize,
    /// Pixels with at least one non-zero jump
    pub corrected: usize,
    /// Pixels whose system could not be solved
    pub skipped: usize,
}

impl BlockStats {
    pub fn merge(&mut self, other: &BlockStats) {
        self.pixels += other.pixels;
        self.masked_out += other.masked_out;
        self.flagged += other.flagged;
        self.corrected += other.corrected;
        self.skipped += other.skipped;
    }
}

/// Corrected phase and closure counts of one block
#[derive(Debug, Clone)]
pub struct BlockCorrection {
    pub corrected: PhaseCube,
    pub closure_count: Array2<i32>,
    pub stats: BlockStats,
}

/// Full extent map of non-zero closure triangle counts, filled block by block
#[derive(Debug, Clone)]
pub struct ClosureCountMap {
    counts: Array2<i32>,
}

impl ClosureCountMap {
    pub fn new(length: usize, width: usize) -> Self {
        Self {
            counts: Array2::zeros((length, width)),
        }
    }

    /// Copy the counts of one block to its place in the map
    pub fn accumulate(&mut self, block: &BlockBox, counts: &Array2<i32>) -> ClosureResult<()> {
        let (length, width) = self.counts.dim();
        if !block.fits_within(length, width) || counts.dim() != (block.rows(), block.cols()) {
            return Err(ClosureError::InvalidInput(format!(
                "Closure counts of size {:?} do not fit box {} of map ({}, {})",
                counts.dim(),
                block,
                length,
                width
            )));
        }
        self.counts
            .slice_mut(ndarray::s![block.y0..block.y1, block.x0..block.x1])
            .assign(counts);
        Ok(())
    }

    pub fn counts(&self) -> &Array2<i32> {
        &self.counts
    }

    pub fn into_inner(self) -> Array2<i32> {
        self.counts
    }

    /// Persist the map as a standalone single dataset store.
    ///
    /// The header carries the attributes of `reference` (the stack), with the
    /// file type set to `mask` and the unit to `1`.
    pub fn write<P: AsRef<Path>>(&self, path: P, reference: &StoreMetadata) -> ClosureResult<()> {
        let (length, width) = self.counts.dim();
        let mut metadata = reference.clone();
        metadata.file_type = CLOSURE_COUNT_FILE_TYPE.to_string();
        metadata.length = length;
        metadata.width = width;
        metadata.unit = Some("1".to_string());
        metadata.ifgrams.clear();

        let mut store = RasterStore::create(path.as_ref(), metadata)?;
        store.create_dataset(CLOSURE_COUNT_DATASET, DataType::Int32, 1, length, width)?;
        let data = self.counts.clone().insert_axis(Axis(0));
        store.write_box(CLOSURE_COUNT_DATASET, &data, &BlockBox::full(length, width))?;
        log::info!("writing >>> {}", path.as_ref().display());
        Ok(())
    }
}

/// Outcome of a correction run
#[derive(Debug, Clone)]
pub struct CorrectionSummary {
    pub stack_path: PathBuf,
    pub dataset_out: String,
    /// True when update mode found the output dataset and nothing was done
    pub skipped_run: bool,
    pub closure_count_path: Option<PathBuf>,
    pub num_ifgrams: usize,
    pub num_triangles: usize,
    pub num_blocks: usize,
    pub stats: BlockStats,
    pub elapsed: Duration,
}

/// Unwrapping error correction of an interferogram stack based on phase closure.
///
/// The stack is processed in row blocks bounded by the memory budget. In each
/// block only pixels inside the mask with at least one non-zero closure triangle
/// reach the solver; all other pixels are written back unchanged.
pub struct UnwrapErrorCorrector {
    config: CorrectionConfig,
    solver: Box<dyn JumpSolver>,
    design_provider: Box<dyn TriangleDesignMatrix>,
}

impl UnwrapErrorCorrector {
    pub fn new(config: CorrectionConfig) -> Self {
        let solver = config.mode.solver(&config.params);
        Self {
            config,
            solver,
            design_provider: Box::new(NetworkTriangles),
        }
    }

    /// Replace the source of the triangle design matrix
    pub fn with_design_provider(mut self, provider: Box<dyn TriangleDesignMatrix>) -> Self {
        self.design_provider = provider;
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Correct the stack at `stack_path` in place and write the closure count map
    pub fn run<P: AsRef<Path>>(&self, stack_path: P) -> ClosureResult<CorrectionSummary> {
        let stack_path = stack_path.as_ref();
        let dataset_out = self.config.output_dataset();
        log::info!("{}", "-".repeat(50));
        log::info!("Unwrapping Error Correction based on Phase Closure Consistency ...");
        if self.config.mode == CorrectionMode::Fast {
            log::info!("fast mode: ON, the following assumption is ignored for fast processing");
            log::info!("\tzero phase jump constraint on ifgrams without unwrap error");
        }
        log::info!("{}", "-".repeat(50));

        let mut stack = IfgramStack::open(stack_path)?;
        if self.config.update && stack.has_dataset(&dataset_out) {
            log::info!(
                "update mode is enabled AND /{} exists, skip this step.",
                dataset_out
            );
            return Ok(CorrectionSummary {
                stack_path: stack_path.to_path_buf(),
                dataset_out,
                skipped_run: true,
                closure_count_path: None,
                num_ifgrams: stack.num_ifgrams(),
                num_triangles: 0,
                num_blocks: 0,
                stats: BlockStats::default(),
                elapsed: Duration::ZERO,
            });
        }

        let count_path = self.config.closure_count_path(stack_path);
        let mut inputs = vec![(stack_path, "interferogram stack")];
        if let Some(mask_file) = &self.config.mask_file {
            inputs.push((mask_file.as_path(), "mask file"));
        }
        for (input, role) in inputs {
            if same_path(&count_path, input) {
                return Err(ClosureError::InvalidInput(format!(
                    "Closure count file {} would overwrite the {}",
                    count_path.display(),
                    role
                )));
            }
        }
        if RasterStore::is_store(&count_path) {
            let existing = RasterStore::open(&count_path)?;
            if existing.file_type() != CLOSURE_COUNT_FILE_TYPE {
                return Err(ClosureError::InvalidInput(format!(
                    "Closure count file {} is an existing {} store",
                    count_path.display(),
                    existing.file_type()
                )));
            }
        }

        let start = Instant::now();
        let design = self.design_provider.design_matrix(stack.network())?;
        log::info!("number of interferograms: {}", design.ncols());
        log::info!("number of triangles: {}", design.nrows());

        let mask = match &self.config.mask_file {
            Some(path) => {
                let mask = open_mask(path)?;
                if mask.extent() != (stack.length(), stack.width()) {
                    return Err(ClosureError::InvalidInput(format!(
                        "Mask in size of {:?} does not match stack in size of ({}, {})",
                        mask.extent(),
                        stack.length(),
                        stack.width()
                    )));
                }
                Some(mask)
            }
            None => None,
        };

        let mut counts = ClosureCountMap::new(stack.length(), stack.width());
        let (num_blocks, stats) = self.correct_stack(&mut stack, &design, mask.as_deref(), &mut counts)?;

        counts.write(&count_path, stack.store().metadata())?;

        let elapsed = start.elapsed();
        let secs = elapsed.as_secs_f64();
        log::info!(
            "time used: {:02.0} mins {:02.1} secs",
            (secs / 60.0).floor(),
            secs % 60.0
        );

        Ok(CorrectionSummary {
            stack_path: stack_path.to_path_buf(),
            dataset_out,
            skipped_run: false,
            closure_count_path: Some(count_path),
            num_ifgrams: design.ncols(),
            num_triangles: design.nrows(),
            num_blocks,
            stats,
            elapsed,
        })
    }

    /// Correct every block of the input dataset and write it to the output dataset.
    /// Returns the number of blocks and the accumulated pixel counters.
    pub fn correct_stack(
        &self,
        stack: &mut IfgramStack,
        design: &DesignMatrix,
        mask: Option<&dyn MaskSource>,
        counts: &mut ClosureCountMap,
    ) -> ClosureResult<(usize, BlockStats)> {
        let dataset_in = &self.config.dataset_in;
        let dataset_out = self.config.output_dataset();
        if design.ncols() != stack.num_ifgrams() {
            return Err(ClosureError::InvalidInput(format!(
                "Design matrix covers {} interferograms, stack has {}",
                design.ncols(),
                stack.num_ifgrams()
            )));
        }

        let ref_phase = stack.reference_phase(dataset_in)?;
        let blocks = split_into_blocks(
            stack.num_ifgrams(),
            stack.length(),
            stack.width(),
            self.config.memory_budget,
        )?;

        let mut total = BlockStats::default();
        for (i, block) in blocks.iter().enumerate() {
            if blocks.len() > 1 {
                log::info!("------- Processing block {} out of {} --------------", i + 1, blocks.len());
            }
            let phase = stack.read_phase(dataset_in, block)?;
            let block_mask = match mask {
                Some(mask) => Some(mask.read_mask(block)?),
                None => None,
            };

            let result = self.correct_block(phase, &ref_phase, block_mask.as_ref(), design)?;
            counts.accumulate(block, &result.closure_count)?;
            stack.write_patch(&dataset_out, &result.corrected, block)?;
            total.merge(&result.stats);
        }

        log::info!(
            "corrected {} out of {} pixels with non-zero closure, {} solves skipped",
            total.corrected,
            total.flagged,
            total.skipped
        );
        Ok((blocks.len(), total))
    }

    /// Correct one block of phase, (num_ifgram, rows, cols), not yet referenced.
    ///
    /// Closure is evaluated on phase relative to `ref_phase`; the output keeps the
    /// input referencing, with 2*pi*U added to the corrected pixels only.
    pub fn correct_block(
        &self,
        phase: PhaseCube,
        ref_phase: &Array1<f32>,
        mask: Option<&Array2<bool>>,
        design: &DesignMatrix,
    ) -> ClosureResult<BlockCorrection> {
        let (num_ifgram, rows, cols) = phase.dim();
        let num_pixel = rows * cols;
        if ref_phase.len() != num_ifgram {
            return Err(ClosureError::InvalidInput(format!(
                "Reference phase has {} values for {} interferograms",
                ref_phase.len(),
                num_ifgram
            )));
        }

        let mut stats = BlockStats {
            pixels: num_pixel,
            ..BlockStats::default()
        };
        log::debug!("number of pixels read: {}", num_pixel);

        let mut corrected = phase
            .as_standard_layout()
            .into_owned()
            .into_shape((num_ifgram, num_pixel))
            .map_err(|e| ClosureError::Processing(format!("Failed to reshape phase block: {}", e)))?;
        let referenced = &corrected - &ref_phase.view().insert_axis(Axis(1));

        let keep: Vec<bool> = match mask {
            Some(mask) => {
                if mask.dim() != (rows, cols) {
                    return Err(ClosureError::InvalidInput(format!(
                        "Mask block in size of {:?} does not match phase block ({}, {})",
                        mask.dim(),
                        rows,
                        cols
                    )));
                }
                mask.iter().copied().collect()
            }
            None => vec![true; num_pixel],
        };
        stats.masked_out = keep.iter().filter(|&&k| !k).count();
        if mask.is_some() {
            log::debug!("number of pixels left after mask: {}", num_pixel - stats.masked_out);
        }

        let estimator = self.config.params.estimator();
        let closure_count = estimator.nonzero_closure_count(design, referenced.view())?;
        let flagged: Vec<usize> = (0..num_pixel)
            .filter(|&p| keep[p] && closure_count[p] > 0)
            .collect();
        stats.flagged = flagged.len();
        log::info!(
            "number of pixels to process: {} out of {} ({:.2}%)",
            flagged.len(),
            num_pixel,
            flagged.len() as f64 / num_pixel.max(1) as f64 * 100.0
        );

        if !flagged.is_empty() {
            log::info!("correcting unwrapping error with {} solver ...", self.solver.name());
            let subset = referenced.select(Axis(1), &flagged);
            let estimate = self.solver.estimate(subset.view(), design)?;
            stats.corrected = estimate.num_corrected();
            stats.skipped = estimate.num_skipped();

            for (k, &p) in flagged.iter().enumerate() {
                for i in 0..num_ifgram {
                    let u = estimate.jumps[[i, k]];
                    if u != 0.0 {
                        corrected[[i, p]] += u * TWO_PI;
                    }
                }
            }
        }

        let corrected: Array3<f32> = corrected
            .into_shape((num_ifgram, rows, cols))
            .map_err(|e| ClosureError::Processing(format!("Failed to reshape phase block: {}", e)))?;
        let closure_count = closure_count
            .into_shape((rows, cols))
            .map_err(|e| ClosureError::Processing(format!("Failed to reshape closure counts: {}", e)))?;

        Ok(BlockCorrection {
            corrected,
            closure_count,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::template::parse_template;
    use ndarray::{array, Array3};

    #[test]
    fn test_default_config() {
        let config = CorrectionConfig::default();
        assert_eq!(config.dataset_in, "unwrapPhase");
        assert_eq!(config.output_dataset(), "unwrapPhase_closure");
        assert_eq!(config.mode, CorrectionMode::Full);
        assert_eq!(config.memory_budget, 100_000_000);
        assert_eq!(
            config.closure_count_path(Path::new("/data/INPUTS/ifgramStack")),
            PathBuf::from("/data/INPUTS/numNonzeroClosure_unwrapPhase")
        );
    }

    #[test]
    fn test_template_updates_config() {
        let options = parse_template(
            "pysar.unwrapError.maskFile = waterMask\n\
             pysar.unwrapError.fast = yes\n\
             pysar.unwrapError.threshold = 0.2\n\
             pysar.unwrapError.alpha = auto\n",
        )
        .unwrap();
        let mut config = CorrectionConfig::default();
        config.update_from_template(&options).unwrap();
        assert_eq!(config.mask_file, Some(PathBuf::from("waterMask")));
        assert_eq!(config.mode, CorrectionMode::Fast);
        assert_eq!(config.params.threshold, 0.2);
        assert_eq!(config.params.alpha, 0.25);

        let options = parse_template("pysar.unwrapError.maskFile = no\n").unwrap();
        config.update_from_template(&options).unwrap();
        assert_eq!(config.mask_file, None);

        let options = parse_template("pysar.unwrapError.threshold = high\n").unwrap();
        assert!(config.update_from_template(&options).is_err());
    }

    #[test]
    fn test_closure_count_map_accumulate() {
        let mut map = ClosureCountMap::new(3, 2);
        map.accumulate(&BlockBox::new(0, 1, 2, 3), &array![[1, 2], [3, 4]]).unwrap();
        assert_eq!(map.counts(), &array![[0, 0], [1, 2], [3, 4]]);
        assert!(map.accumulate(&BlockBox::new(0, 2, 2, 4), &array![[1, 2], [3, 4]]).is_err());
        assert!(map.accumulate(&BlockBox::new(0, 0, 2, 1), &array![[1, 2], [3, 4]]).is_err());
    }

    #[test]
    fn test_closure_count_map_keeps_stack_attributes() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut stack = StoreMetadata::new("ifgramStack", 2, 2);
        stack.ref_y = Some(1);
        stack.ref_x = Some(0);
        stack.unit = Some("radian".to_string());
        stack.set_attribute("PLATFORM", "Sen");
        stack.set_attribute("WAVELENGTH", "0.05546576");
        stack.ifgrams.push(crate::io::store::IfgramRecord {
            date1: "20200101".to_string(),
            date2: "20200113".to_string(),
            drop_ifgram: false,
        });

        let mut map = ClosureCountMap::new(2, 2);
        map.accumulate(&BlockBox::full(2, 2), &array![[0, 3], [1, 0]]).unwrap();
        let path = dir.path().join("numNonzeroClosure_unwrapPhase");
        map.write(&path, &stack).unwrap();

        let store = RasterStore::open(&path).unwrap();
        let metadata = store.metadata();
        assert_eq!(metadata.file_type, "mask");
        assert_eq!(metadata.unit.as_deref(), Some("1"));
        assert_eq!((metadata.ref_y, metadata.ref_x), (Some(1), Some(0)));
        assert_eq!(metadata.attribute("PLATFORM"), Some("Sen"));
        assert_eq!(metadata.attribute("WAVELENGTH"), Some("0.05546576"));
        assert!(metadata.ifgrams.is_empty());
        assert_eq!(store.dataset_names(), vec![CLOSURE_COUNT_DATASET]);
        let counts = store.read_box::<i32>(CLOSURE_COUNT_DATASET, &BlockBox::full(2, 2)).unwrap();
        assert_eq!(counts.into_raw_vec(), vec![0, 3, 1, 0]);
    }

    #[test]
    fn test_block_with_single_triangle() {
        // edges AB, BC, AC over a 1x2 block; second pixel off by one cycle on AC
        let design: DesignMatrix = array![[1.0, 1.0, -1.0]];
        let phase = Array3::from_shape_vec(
            (3, 1, 2),
            vec![0.5, 0.5, 0.25, 0.25, 0.75, 0.75 + TWO_PI],
        )
        .unwrap();
        let ref_phase = Array1::zeros(3);
        let corrector = UnwrapErrorCorrector::new(CorrectionConfig::default());

        let result = corrector.correct_block(phase.clone(), &ref_phase, None, &design).unwrap();
        assert_eq!(result.closure_count, array![[0, 1]]);
        assert_eq!(result.stats.flagged, 1);
        // a single triangle cannot tell which edge is wrong
        assert_eq!(result.stats.corrected, 0);
        assert_eq!(result.corrected, phase);
    }

    #[test]
    fn test_masked_pixels_pass_through() {
        let design: DesignMatrix = array![[1.0, 1.0, -1.0]];
        let phase = Array3::from_shape_vec((3, 1, 2), vec![0.5, 0.5, 0.25, 0.25, 0.75 + TWO_PI, 0.75 + TWO_PI])
            .unwrap();
        let mask = array![[false, true]];
        let corrector = UnwrapErrorCorrector::new(CorrectionConfig::default());

        let result = corrector
            .correct_block(phase.clone(), &Array1::zeros(3), Some(&mask), &design)
            .unwrap();
        assert_eq!(result.stats.masked_out, 1);
        assert_eq!(result.stats.flagged, 1);
        // closure is still counted under the mask
        assert_eq!(result.closure_count, array![[1, 1]]);
        assert_eq!(result.corrected, phase);
    }
}
