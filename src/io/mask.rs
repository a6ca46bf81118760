use crate::io::gdal_mask::GdalMask;
use crate::io::store::RasterStore;
use crate::types::{BlockBox, ClosureError, ClosureResult};
use ndarray::{Array2, Axis};
use std::path::Path;

/// Dataset names recognised as validity masks, in order of preference
pub const MASK_DATASETS: [&str; 2] = ["waterMask", "mask"];

/// Read-only source of a boolean pixel mask (true = analyse the pixel)
pub trait MaskSource {
    /// Mask extent as (length, width)
    fn extent(&self) -> (usize, usize);

    fn read_mask(&self, block: &BlockBox) -> ClosureResult<Array2<bool>>;
}

/// Mask stored as a `waterMask` or `mask` dataset of a raster store
#[derive(Debug)]
pub struct MaskFile {
    store: RasterStore,
    dataset: String,
}

impl MaskFile {
    pub fn open<P: AsRef<Path>>(path: P) -> ClosureResult<Self> {
        let store = RasterStore::open(path)?;
        let dataset = MASK_DATASETS
            .iter()
            .find(|name| store.has_dataset(name))
            .map(|name| name.to_string())
            .ok_or_else(|| {
                ClosureError::DatasetNotFound(format!(
                    "none of {:?} in mask file {}",
                    MASK_DATASETS,
                    store.path().display()
                ))
            })?;
        log::debug!("Using /{} from mask file {}", dataset, store.path().display());
        Ok(Self { store, dataset })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }
}

impl MaskSource for MaskFile {
    fn extent(&self) -> (usize, usize) {
        self.store.extent()
    }

    fn read_mask(&self, block: &BlockBox) -> ClosureResult<Array2<bool>> {
        let values = self.store.read_box_f32(&self.dataset, block)?;
        Ok(values.index_axis(Axis(0), 0).mapv(|v| v != 0.0 && !v.is_nan()))
    }
}

/// Open a mask from a raster store, or from any single-band raster GDAL reads
pub fn open_mask<P: AsRef<Path>>(path: P) -> ClosureResult<Box<dyn MaskSource>> {
    let path = path.as_ref();
    if RasterStore::is_store(path) {
        return Ok(Box::new(MaskFile::open(path)?));
    }
    Ok(Box::new(GdalMask::open(path)?))
}
