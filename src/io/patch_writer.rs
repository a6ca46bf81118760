use crate::io::store::{DataType, RasterStore};
use crate::types::{BlockBox, ClosureResult, PhaseCube};

/// Destination of corrected phase, written one block at a time
pub trait PatchWriter {
    /// Write `data` (bands, rows, cols) into the region `block` of `dataset`.
    ///
    /// The dataset is created at full raster extent when absent and resized
    /// when its extent differs; other datasets are left untouched.
    fn write_patch(&mut self, dataset: &str, data: &PhaseCube, block: &BlockBox) -> ClosureResult<()>;
}

impl PatchWriter for RasterStore {
    fn write_patch(&mut self, dataset: &str, data: &PhaseCube, block: &BlockBox) -> ClosureResult<()> {
        let (length, width) = self.extent();
        let bands = data.dim().0;
        let shape = (bands, length, width);

        if !self.has_dataset(dataset) {
            log::info!("create dataset /{} of float32 in size of {:?}", dataset, shape);
            self.create_dataset(dataset, DataType::Float32, bands, length, width)?;
        } else {
            let existing = self.dataset(dataset)?.shape();
            if existing != shape {
                log::info!("resize dataset /{} from {:?} to {:?}", dataset, existing, shape);
                self.resize_dataset(dataset, bands, length, width)?;
            } else {
                log::debug!("update dataset /{} in box {}", dataset, block);
            }
        }

        self.write_box(dataset, data, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::StoreMetadata;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn test_patches_fill_new_dataset() {
        let dir = TempDir::new().unwrap();
        let mut store = RasterStore::create(dir.path().join("stack"), StoreMetadata::new("ifgramStack", 4, 3)).unwrap();

        let top = Array3::from_elem((2, 2, 3), 1.5f32);
        let bottom = Array3::from_elem((2, 2, 3), -2.5f32);
        store.write_patch("unwrapPhase_closure", &top, &BlockBox::new(0, 0, 3, 2)).unwrap();
        store.write_patch("unwrapPhase_closure", &bottom, &BlockBox::new(0, 2, 3, 4)).unwrap();

        assert_eq!(store.dataset("unwrapPhase_closure").unwrap().shape(), (2, 4, 3));
        let full = store.read_box::<f32>("unwrapPhase_closure", &BlockBox::full(4, 3)).unwrap();
        assert_eq!(full[[1, 1, 2]], 1.5);
        assert_eq!(full[[0, 3, 0]], -2.5);
    }

    #[test]
    fn test_patch_resizes_mismatched_dataset() {
        let dir = TempDir::new().unwrap();
        let mut store = RasterStore::create(dir.path().join("stack"), StoreMetadata::new("ifgramStack", 4, 3)).unwrap();
        store.create_dataset("unwrapPhase_closure", DataType::Float32, 2, 2, 3).unwrap();
        store.create_dataset("unwrapPhase", DataType::Float32, 2, 4, 3).unwrap();

        let data = Array3::from_elem((2, 1, 3), 7.0f32);
        store.write_patch("unwrapPhase_closure", &data, &BlockBox::new(0, 3, 3, 4)).unwrap();
        assert_eq!(store.dataset("unwrapPhase_closure").unwrap().shape(), (2, 4, 3));
        assert_eq!(store.dataset("unwrapPhase").unwrap().shape(), (2, 4, 3));
        let row = store.read_box::<f32>("unwrapPhase_closure", &BlockBox::new(0, 3, 3, 4)).unwrap();
        assert_eq!(row, data);
    }
}
