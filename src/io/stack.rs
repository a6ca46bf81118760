use crate::core::network::{parse_date, Ifgram, IfgramNetwork};
use crate::io::patch_writer::PatchWriter;
use crate::io::store::{DataType, IfgramRecord, RasterStore, StoreMetadata};
use crate::types::{BlockBox, ClosureError, ClosureResult, PhaseCube};
use ndarray::Array1;
use std::path::Path;

/// File type tag of interferogram stacks
pub const IFGRAM_STACK_TYPE: &str = "ifgramStack";

/// Default dataset holding unwrapped phase
pub const UNWRAP_PHASE: &str = "unwrapPhase";

/// Stack of unwrapped interferograms sharing one raster grid
#[derive(Debug)]
pub struct IfgramStack {
    store: RasterStore,
    network: IfgramNetwork,
}

impl IfgramStack {
    /// Open a stack, rejecting stores of any other file type
    pub fn open<P: AsRef<Path>>(path: P) -> ClosureResult<Self> {
        let store = RasterStore::open(path)?;
        Self::from_store(store)
    }

    /// Create an empty stack with the given network and reference pixel
    pub fn create<P: AsRef<Path>>(
        path: P,
        length: usize,
        width: usize,
        ifgrams: &[Ifgram],
        ref_pixel: Option<(usize, usize)>,
    ) -> ClosureResult<Self> {
        let mut metadata = StoreMetadata::new(IFGRAM_STACK_TYPE, length, width);
        metadata.ref_y = ref_pixel.map(|(y, _)| y);
        metadata.ref_x = ref_pixel.map(|(_, x)| x);
        metadata.unit = Some("radian".to_string());
        metadata.ifgrams = ifgrams
            .iter()
            .map(|i| IfgramRecord {
                date1: i.date1.format("%Y%m%d").to_string(),
                date2: i.date2.format("%Y%m%d").to_string(),
                drop_ifgram: i.dropped,
            })
            .collect();
        Self::from_store(RasterStore::create(path, metadata)?)
    }

    fn from_store(store: RasterStore) -> ClosureResult<Self> {
        if store.file_type() != IFGRAM_STACK_TYPE {
            return Err(ClosureError::InvalidFormat(format!(
                "input file type: {} is not {}",
                store.file_type(),
                IFGRAM_STACK_TYPE
            )));
        }

        let ifgrams = store
            .metadata()
            .ifgrams
            .iter()
            .map(|r| {
                Ok(Ifgram {
                    date1: parse_date(&r.date1)?,
                    date2: parse_date(&r.date2)?,
                    dropped: r.drop_ifgram,
                })
            })
            .collect::<ClosureResult<Vec<_>>>()?;
        let network = IfgramNetwork::new(ifgrams)?;

        Ok(Self { store, network })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn store(&self) -> &RasterStore {
        &self.store
    }

    pub fn network(&self) -> &IfgramNetwork {
        &self.network
    }

    pub fn num_ifgrams(&self) -> usize {
        self.network.num_ifgrams()
    }

    pub fn length(&self) -> usize {
        self.store.metadata().length
    }

    pub fn width(&self) -> usize {
        self.store.metadata().width
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        self.store.dataset_names()
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.store.has_dataset(name)
    }

    /// Reference pixel as (y, x)
    pub fn reference_pixel(&self) -> ClosureResult<(usize, usize)> {
        let metadata = self.store.metadata();
        match (metadata.ref_y, metadata.ref_x) {
            (Some(y), Some(x)) if y < metadata.length && x < metadata.width => Ok((y, x)),
            (Some(y), Some(x)) => Err(ClosureError::Metadata(format!(
                "Reference pixel ({}, {}) outside of raster ({}, {})",
                y, x, metadata.length, metadata.width
            ))),
            _ => Err(ClosureError::Metadata(format!(
                "No reference pixel (refY/refX) in {}",
                self.path().display()
            ))),
        }
    }

    /// Phase of every interferogram at the reference pixel
    pub fn reference_phase(&self, dataset: &str) -> ClosureResult<Array1<f32>> {
        self.check_phase_dataset(dataset)?;
        let (y, x) = self.reference_pixel()?;
        self.store.read_pixel(dataset, y, x)
    }

    /// Phase of all interferograms inside `block`, (num_ifgram, rows, cols)
    pub fn read_phase(&self, dataset: &str, block: &BlockBox) -> ClosureResult<PhaseCube> {
        self.check_phase_dataset(dataset)?;
        self.store.read_box::<f32>(dataset, block)
    }

    /// Write a full phase dataset, used to build stacks
    pub fn write_phase(&mut self, dataset: &str, data: &PhaseCube) -> ClosureResult<()> {
        let (length, width) = (self.length(), self.width());
        if data.dim() != (self.num_ifgrams(), length, width) {
            return Err(ClosureError::InvalidInput(format!(
                "Phase of size {:?} does not match stack ({}, {}, {})",
                data.dim(),
                self.num_ifgrams(),
                length,
                width
            )));
        }
        if !self.store.has_dataset(dataset) {
            self.store
                .create_dataset(dataset, DataType::Float32, self.num_ifgrams(), length, width)?;
        }
        self.store.write_box(dataset, data, &BlockBox::full(length, width))
    }

    fn check_phase_dataset(&self, dataset: &str) -> ClosureResult<()> {
        let info = self.store.dataset(dataset)?;
        if info.bands != self.num_ifgrams() || (info.length, info.width) != self.store.extent() {
            return Err(ClosureError::InvalidFormat(format!(
                "Dataset /{} in size of {:?} does not match stack of {} interferograms in size of {:?}",
                dataset,
                info.shape(),
                self.num_ifgrams(),
                self.store.extent()
            )));
        }
        Ok(())
    }
}

impl PatchWriter for IfgramStack {
    fn write_patch(&mut self, dataset: &str, data: &PhaseCube, block: &BlockBox) -> ClosureResult<()> {
        if data.dim().0 != self.num_ifgrams() {
            return Err(ClosureError::InvalidInput(format!(
                "Patch holds {} interferograms, stack has {}",
                data.dim().0,
                self.num_ifgrams()
            )));
        }
        self.store.write_patch(dataset, data, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::StoreMetadata;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn network() -> Vec<Ifgram> {
        ["20200101_20200113", "20200113_20200125", "20200101_20200125"]
            .iter()
            .map(|l| Ifgram::parse(l).unwrap())
            .collect()
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ifgramStack");
        let mut stack = IfgramStack::create(&path, 3, 4, &network(), Some((1, 2))).unwrap();
        let phase = Array3::from_shape_fn((3, 3, 4), |(i, r, c)| (i + r * c) as f32);
        stack.write_phase(UNWRAP_PHASE, &phase).unwrap();

        let stack = IfgramStack::open(&path).unwrap();
        assert_eq!(stack.num_ifgrams(), 3);
        assert_eq!((stack.length(), stack.width()), (3, 4));
        assert_eq!(stack.reference_pixel().unwrap(), (1, 2));
        assert_eq!(stack.reference_phase(UNWRAP_PHASE).unwrap().to_vec(), vec![2.0, 3.0, 4.0]);

        let block = BlockBox::new(1, 1, 4, 3);
        let read = stack.read_phase(UNWRAP_PHASE, &block).unwrap();
        assert_eq!(read.dim(), (3, 2, 3));
        assert_eq!(read[[2, 1, 2]], phase[[2, 2, 3]]);
    }

    #[test]
    fn test_wrong_file_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timeseries");
        RasterStore::create(&path, StoreMetadata::new("timeseries", 2, 2)).unwrap();
        assert!(matches!(IfgramStack::open(&path), Err(ClosureError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_reference_pixel() {
        let dir = TempDir::new().unwrap();
        let mut stack = IfgramStack::create(dir.path().join("s"), 2, 2, &network(), None).unwrap();
        stack.write_phase(UNWRAP_PHASE, &Array3::zeros((3, 2, 2))).unwrap();
        assert!(matches!(
            stack.reference_phase(UNWRAP_PHASE),
            Err(ClosureError::Metadata(_))
        ));
        assert!(matches!(
            stack.reference_phase("unwrapPhase_bridging"),
            Err(ClosureError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn test_patch_must_cover_all_ifgrams() {
        let dir = TempDir::new().unwrap();
        let mut stack = IfgramStack::create(dir.path().join("s"), 2, 2, &network(), Some((0, 0))).unwrap();
        let data = Array3::zeros((2, 2, 2));
        assert!(stack.write_patch("unwrapPhase_closure", &data, &BlockBox::full(2, 2)).is_err());
    }
}
