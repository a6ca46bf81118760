use crate::io::mask::MaskSource;
use crate::types::{BlockBox, ClosureError, ClosureResult};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Single-band mask readable through GDAL (GeoTIFF, ENVI, ...)
pub struct GdalMask {
    dataset: Dataset,
    length: usize,
    width: usize,
}

impl GdalMask {
    pub fn open<P: AsRef<Path>>(path: P) -> ClosureResult<Self> {
        log::info!("Reading mask with GDAL from: {}", path.as_ref().display());
        let dataset = Dataset::open(path.as_ref())?;
        let (width, length) = dataset.raster_size();
        log::debug!("Mask size: {}x{}", length, width);
        Ok(Self {
            dataset,
            length,
            width,
        })
    }
}

impl MaskSource for GdalMask {
    fn extent(&self) -> (usize, usize) {
        (self.length, self.width)
    }

    fn read_mask(&self, block: &BlockBox) -> ClosureResult<Array2<bool>> {
        if !block.fits_within(self.length, self.width) {
            return Err(ClosureError::InvalidInput(format!(
                "Box {} outside of mask in size of ({}, {})",
                block, self.length, self.width
            )));
        }
        let band = self.dataset.rasterband(1)?;
        let window = (block.x0 as isize, block.y0 as isize);
        let size = (block.cols(), block.rows());
        let buffer = band.read_as::<f32>(window, size, size, None)?;

        let mask = Array2::from_shape_vec((block.rows(), block.cols()), buffer.data)
            .map_err(|e| ClosureError::Processing(format!("Failed to reshape mask data: {}", e)))?;
        Ok(mask.mapv(|v| v != 0.0 && !v.is_nan()))
    }
}
