//! Directory backed raster store.
//!
//! A store is a directory with a `metadata.xml` header and one GeoTIFF per
//! dataset (`<name>.tif`) holding one band per layer, e.g. one band per
//! interferogram. All raster access goes through GDAL with windowed reads and
//! writes, so datasets can be updated in place one box at a time and opened
//! by any GDAL tool.

use crate::types::{BlockBox, ClosureError, ClosureResult};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use ndarray::{Array1, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.xml";

/// GDAL driver of dataset files
const RASTER_DRIVER: &str = "GTiff";

/// Element type of a stored dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float32,
    Int16,
    Int32,
    UInt8,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::UInt8 => "uint8",
        }
    }

    pub fn parse(name: &str) -> ClosureResult<Self> {
        match name.to_lowercase().as_str() {
            "float32" => Ok(DataType::Float32),
            "int16" => Ok(DataType::Int16),
            "int32" => Ok(DataType::Int32),
            "uint8" | "bool" => Ok(DataType::UInt8),
            other => Err(ClosureError::InvalidFormat(format!("Unsupported data type: {}", other))),
        }
    }
}

/// Sample types that can be moved between memory and a dataset file
pub trait Element: GdalType + Copy + Default + Send + Sync + 'static {
    const DTYPE: DataType;

    fn to_f32(self) -> f32;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::Float32;

    fn to_f32(self) -> f32 {
        self
    }
}

impl Element for i16 {
    const DTYPE: DataType = DataType::Int16;

    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Element for i32 {
    const DTYPE: DataType = DataType::Int32;

    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Element for u8 {
    const DTYPE: DataType = DataType::UInt8;

    fn to_f32(self) -> f32 {
        self as f32
    }
}

/// Dataset description in the store header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub dtype: String,
    pub bands: usize,
    pub length: usize,
    pub width: usize,
}

impl DatasetInfo {
    pub fn data_type(&self) -> ClosureResult<DataType> {
        DataType::parse(&self.dtype)
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.bands, self.length, self.width)
    }
}

/// Free-form header attribute, e.g. PLATFORM or WAVELENGTH
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

/// Interferogram record in the store header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfgramRecord {
    pub date1: String,
    pub date2: String,
    #[serde(rename = "dropIfgram", default)]
    pub drop_ifgram: bool,
}

/// Store header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "store")]
pub struct StoreMetadata {
    #[serde(rename = "fileType")]
    pub file_type: String,
    pub length: usize,
    pub width: usize,
    #[serde(rename = "refY", default, skip_serializing_if = "Option::is_none")]
    pub ref_y: Option<usize>,
    #[serde(rename = "refX", default, skip_serializing_if = "Option::is_none")]
    pub ref_x: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "attribute", default)]
    pub attributes: Vec<Attribute>,
    #[serde(rename = "ifgram", default)]
    pub ifgrams: Vec<IfgramRecord>,
    #[serde(rename = "dataset", default)]
    pub datasets: Vec<DatasetInfo>,
}

impl StoreMetadata {
    pub fn new(file_type: &str, length: usize, width: usize) -> Self {
        Self {
            file_type: file_type.to_string(),
            length,
            width,
            ref_y: None,
            ref_x: None,
            unit: None,
            attributes: Vec::new(),
            ifgrams: Vec::new(),
            datasets: Vec::new(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Add or overwrite an attribute
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|a| a.key == key) {
            Some(attribute) => attribute.value = value.to_string(),
            None => self.attributes.push(Attribute {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn from_xml(xml: &str) -> ClosureResult<Self> {
        quick_xml::de::from_str(xml)
            .map_err(|e| ClosureError::XmlParsing(format!("Failed to parse store metadata: {}", e)))
    }

    pub fn to_xml(&self) -> ClosureResult<String> {
        quick_xml::se::to_string(self)
            .map_err(|e| ClosureError::XmlParsing(format!("Failed to write store metadata: {}", e)))
    }
}

/// Raster store rooted at a directory
#[derive(Debug)]
pub struct RasterStore {
    root: PathBuf,
    metadata: StoreMetadata,
}

impl RasterStore {
    /// Create a new store. An existing store at `path` is replaced only when it
    /// has the same file type; any other store is left alone and an error returned.
    /// Datasets listed in `metadata` are ignored, add them with `create_dataset`.
    pub fn create<P: AsRef<Path>>(path: P, mut metadata: StoreMetadata) -> ClosureResult<Self> {
        let root = path.as_ref().to_path_buf();
        if Self::is_store(&root) {
            let existing = Self::open(&root)?;
            if existing.file_type() != metadata.file_type {
                return Err(ClosureError::InvalidInput(format!(
                    "Refusing to replace {} store {} with a {} store",
                    existing.file_type(),
                    root.display(),
                    metadata.file_type
                )));
            }
            log::info!("Replacing existing {} store: {}", existing.file_type(), root.display());
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;
        metadata.datasets.clear();

        let store = Self { root, metadata };
        store.save_metadata()?;
        log::debug!("Created {} store: {}", store.metadata.file_type, store.root.display());
        Ok(store)
    }

    /// Open an existing store
    pub fn open<P: AsRef<Path>>(path: P) -> ClosureResult<Self> {
        let root = path.as_ref().to_path_buf();
        let header = root.join(METADATA_FILE);
        if !header.is_file() {
            return Err(ClosureError::InvalidFormat(format!(
                "Not a raster store (missing {}): {}",
                METADATA_FILE,
                root.display()
            )));
        }
        let metadata = StoreMetadata::from_xml(&fs::read_to_string(&header)?)?;
        Ok(Self { root, metadata })
    }

    /// Check whether `path` looks like a store directory
    pub fn is_store<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().join(METADATA_FILE).is_file()
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    pub fn file_type(&self) -> &str {
        &self.metadata.file_type
    }

    /// Raster extent as (length, width)
    pub fn extent(&self) -> (usize, usize) {
        (self.metadata.length, self.metadata.width)
    }

    pub fn dataset_names(&self) -> Vec<&str> {
        self.metadata.datasets.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.metadata.datasets.iter().any(|d| d.name == name)
    }

    pub fn dataset(&self, name: &str) -> ClosureResult<&DatasetInfo> {
        self.metadata
            .datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| {
                ClosureError::DatasetNotFound(format!("/{} in {}", name, self.root.display()))
            })
    }

    /// GeoTIFF file backing a dataset
    pub fn dataset_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.tif", name))
    }

    /// Update the header attributes, keeping the dataset list
    pub fn update_metadata<F: FnOnce(&mut StoreMetadata)>(&mut self, update: F) -> ClosureResult<()> {
        let datasets = self.metadata.datasets.clone();
        update(&mut self.metadata);
        self.metadata.datasets = datasets;
        self.save_metadata()
    }

    /// Create a zero-filled dataset
    pub fn create_dataset(
        &mut self,
        name: &str,
        dtype: DataType,
        bands: usize,
        length: usize,
        width: usize,
    ) -> ClosureResult<()> {
        if self.has_dataset(name) {
            return Err(ClosureError::InvalidInput(format!(
                "Dataset /{} already exists in {}",
                name,
                self.root.display()
            )));
        }
        create_raster(dtype, &self.dataset_path(name), bands, length, width)?;

        self.metadata.datasets.push(DatasetInfo {
            name: name.to_string(),
            dtype: dtype.as_str().to_string(),
            bands,
            length,
            width,
        });
        self.save_metadata()
    }

    /// Resize a dataset, keeping the values of the overlapping region
    pub fn resize_dataset(&mut self, name: &str, bands: usize, length: usize, width: usize) -> ClosureResult<()> {
        let info = self.dataset(name)?.clone();
        let dtype = info.data_type()?;

        let tmp_path = self.root.join(format!("{}.resize.tif", name));
        {
            let src = Dataset::open(self.dataset_path(name))?;
            let dst = create_raster(dtype, &tmp_path, bands, length, width)?;
            let size = (info.width.min(width), info.length.min(length));
            if size.0 > 0 && size.1 > 0 {
                for band in 1..=info.bands.min(bands) {
                    match dtype {
                        DataType::Float32 => copy_window::<f32>(&src, &dst, band, size)?,
                        DataType::Int16 => copy_window::<i16>(&src, &dst, band, size)?,
                        DataType::Int32 => copy_window::<i32>(&src, &dst, band, size)?,
                        DataType::UInt8 => copy_window::<u8>(&src, &dst, band, size)?,
                    }
                }
            }
        }
        fs::rename(&tmp_path, self.dataset_path(name))?;

        if let Some(entry) = self.metadata.datasets.iter_mut().find(|d| d.name == name) {
            entry.bands = bands;
            entry.length = length;
            entry.width = width;
        }
        self.save_metadata()
    }

    /// Read all bands of a box, in size of (bands, rows, cols)
    pub fn read_box<T: Element>(&self, name: &str, block: &BlockBox) -> ClosureResult<Array3<T>> {
        let info = self.checked_dataset(name, block, T::DTYPE)?;
        let (rows, cols) = (block.rows(), block.cols());
        let mut data = Vec::with_capacity(info.bands * rows * cols);

        if rows > 0 && cols > 0 {
            let dataset = Dataset::open(self.dataset_path(name))?;
            let window = (block.x0 as isize, block.y0 as isize);
            for band in 1..=info.bands {
                let buffer = dataset
                    .rasterband(band as _)?
                    .read_as::<T>(window, (cols, rows), (cols, rows), None)?;
                data.extend(buffer.data);
            }
        }

        Array3::from_shape_vec((info.bands, rows, cols), data)
            .map_err(|e| ClosureError::Processing(format!("Failed to shape block: {}", e)))
    }

    /// Read all bands of a box converted to f32, whatever the stored type
    pub fn read_box_f32(&self, name: &str, block: &BlockBox) -> ClosureResult<Array3<f32>> {
        match self.dataset(name)?.data_type()? {
            DataType::Float32 => self.read_box::<f32>(name, block),
            DataType::Int16 => Ok(self.read_box::<i16>(name, block)?.mapv(|v| v.to_f32())),
            DataType::Int32 => Ok(self.read_box::<i32>(name, block)?.mapv(|v| v.to_f32())),
            DataType::UInt8 => Ok(self.read_box::<u8>(name, block)?.mapv(|v| v.to_f32())),
        }
    }

    /// Values of all bands at one pixel of a float32 dataset
    pub fn read_pixel(&self, name: &str, y: usize, x: usize) -> ClosureResult<Array1<f32>> {
        let values = self.read_box::<f32>(name, &BlockBox::new(x, y, x + 1, y + 1))?;
        Ok(Array1::from(values.into_raw_vec()))
    }

    /// Write all bands of a box in place
    pub fn write_box<T: Element>(&mut self, name: &str, data: &Array3<T>, block: &BlockBox) -> ClosureResult<()> {
        let info = self.checked_dataset(name, block, T::DTYPE)?;
        let (bands, rows, cols) = data.dim();
        if bands != info.bands || rows != block.rows() || cols != block.cols() {
            return Err(ClosureError::InvalidInput(format!(
                "Data of size {:?} does not match box {} with {} bands",
                data.dim(),
                block,
                info.bands
            )));
        }
        if rows == 0 || cols == 0 {
            return Ok(());
        }

        let dataset = Dataset::open_ex(
            self.dataset_path(name),
            DatasetOptions {
                open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
                ..DatasetOptions::default()
            },
        )?;
        let window = (block.x0 as isize, block.y0 as isize);
        for (b, layer) in data.axis_iter(Axis(0)).enumerate() {
            let mut band = dataset.rasterband((b + 1) as _)?;
            let values: Vec<T> = layer.iter().copied().collect();
            let buffer = Buffer::new((cols, rows), values);
            band.write(window, (cols, rows), &buffer)?;
        }
        Ok(())
    }

    fn checked_dataset(&self, name: &str, block: &BlockBox, dtype: DataType) -> ClosureResult<DatasetInfo> {
        let info = self.dataset(name)?.clone();
        let stored = info.data_type()?;
        if stored != dtype {
            return Err(ClosureError::InvalidInput(format!(
                "Dataset /{} holds {} samples, not {}",
                name,
                stored.as_str(),
                dtype.as_str()
            )));
        }
        if !block.fits_within(info.length, info.width) {
            return Err(ClosureError::InvalidInput(format!(
                "Box {} outside of dataset /{} in size of ({}, {})",
                block, name, info.length, info.width
            )));
        }
        Ok(info)
    }

    fn save_metadata(&self) -> ClosureResult<()> {
        let xml = self.metadata.to_xml()?;
        let tmp = self.root.join(format!("{}.tmp", METADATA_FILE));
        fs::write(&tmp, xml)?;
        fs::rename(&tmp, self.root.join(METADATA_FILE))?;
        Ok(())
    }
}

/// Create a GeoTIFF of `bands` layers; unwritten blocks read back as zero
fn create_raster(dtype: DataType, path: &Path, bands: usize, length: usize, width: usize) -> ClosureResult<Dataset> {
    let driver = DriverManager::get_driver_by_name(RASTER_DRIVER)?;
    let (x, y, b) = (width as isize, length as isize, bands as isize);
    let dataset = match dtype {
        DataType::Float32 => driver.create_with_band_type::<f32, _>(path, x, y, b)?,
        DataType::Int16 => driver.create_with_band_type::<i16, _>(path, x, y, b)?,
        DataType::Int32 => driver.create_with_band_type::<i32, _>(path, x, y, b)?,
        DataType::UInt8 => driver.create_with_band_type::<u8, _>(path, x, y, b)?,
    };
    log::debug!(
        "create {} GeoTIFF {} with {} bands in size of ({}, {})",
        dtype.as_str(),
        path.display(),
        bands,
        length,
        width
    );
    Ok(dataset)
}

fn copy_window<T: GdalType + Copy>(src: &Dataset, dst: &Dataset, band: usize, size: (usize, usize)) -> ClosureResult<()> {
    let buffer = src.rasterband(band as _)?.read_as::<T>((0, 0), size, size, None)?;
    dst.rasterband(band as _)?.write((0, 0), size, &buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    fn sample_metadata() -> StoreMetadata {
        let mut metadata = StoreMetadata::new("ifgramStack", 4, 5);
        metadata.ref_y = Some(1);
        metadata.ref_x = Some(2);
        metadata.set_attribute("PLATFORM", "Sen");
        metadata.ifgrams.push(IfgramRecord {
            date1: "20200101".to_string(),
            date2: "20200113".to_string(),
            drop_ifgram: false,
        });
        metadata.ifgrams.push(IfgramRecord {
            date1: "20200113".to_string(),
            date2: "20200125".to_string(),
            drop_ifgram: true,
        });
        metadata
    }

    #[test]
    fn test_metadata_xml_round_trip() {
        let mut metadata = sample_metadata();
        metadata.datasets.push(DatasetInfo {
            name: "unwrapPhase".to_string(),
            dtype: "float32".to_string(),
            bands: 2,
            length: 4,
            width: 5,
        });
        let xml = metadata.to_xml().unwrap();
        assert!(xml.starts_with("<store>"));
        let parsed = StoreMetadata::from_xml(&xml).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(parsed.attribute("PLATFORM"), Some("Sen"));

        let bare = StoreMetadata::new("mask", 3, 3);
        assert_eq!(StoreMetadata::from_xml(&bare.to_xml().unwrap()).unwrap(), bare);
    }

    #[test]
    fn test_set_attribute_overwrites() {
        let mut metadata = StoreMetadata::new("mask", 1, 1);
        metadata.set_attribute("UNIT", "radian");
        metadata.set_attribute("UNIT", "1");
        assert_eq!(metadata.attributes.len(), 1);
        assert_eq!(metadata.attribute("UNIT"), Some("1"));
        assert_eq!(metadata.attribute("WAVELENGTH"), None);
    }

    #[test]
    fn test_create_write_read_box() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stack");
        let mut store = RasterStore::create(&path, sample_metadata()).unwrap();
        store.create_dataset("unwrapPhase", DataType::Float32, 2, 4, 5).unwrap();
        assert!(store.dataset_path("unwrapPhase").is_file());

        let data = Array3::from_shape_fn((2, 2, 3), |(b, r, c)| (b * 100 + r * 10 + c) as f32);
        let block = BlockBox::new(1, 2, 4, 4);
        store.write_box("unwrapPhase", &data, &block).unwrap();

        let reopened = RasterStore::open(&path).unwrap();
        assert_eq!(reopened.dataset_names(), vec!["unwrapPhase"]);
        assert_eq!(reopened.read_box::<f32>("unwrapPhase", &block).unwrap(), data);

        let full = reopened.read_box::<f32>("unwrapPhase", &BlockBox::full(4, 5)).unwrap();
        // box starts at (y0, x0) = (2, 1): full[[b, 3, 2]] is data[[b, 1, 1]]
        assert_eq!(full[[1, 3, 2]], 111.0);
        assert_eq!(full[[1, 3, 3]], 112.0);
        assert_eq!(full[[0, 0, 0]], 0.0);

        let pixel = reopened.read_pixel("unwrapPhase", 2, 1).unwrap();
        assert_eq!(pixel.to_vec(), vec![0.0, 100.0]);
    }

    #[test]
    fn test_dataset_is_readable_with_gdal() {
        let dir = TempDir::new().unwrap();
        let mut store = RasterStore::create(dir.path().join("stack"), sample_metadata()).unwrap();
        store.create_dataset("unwrapPhase", DataType::Float32, 2, 4, 5).unwrap();
        let data = Array3::from_shape_fn((2, 4, 5), |(b, r, c)| (b * 100 + r * 10 + c) as f32);
        store.write_box("unwrapPhase", &data, &BlockBox::full(4, 5)).unwrap();

        let dataset = Dataset::open(store.dataset_path("unwrapPhase")).unwrap();
        assert_eq!(dataset.raster_size(), (5, 4));
        assert_eq!(dataset.raster_count(), 2);
        let band = dataset.rasterband(2).unwrap();
        let buffer = band.read_as::<f32>((4, 3), (1, 1), (1, 1), None).unwrap();
        assert_eq!(buffer.data, vec![134.0]);
    }

    #[test]
    fn test_resize_keeps_overlap() {
        let dir = TempDir::new().unwrap();
        let mut store = RasterStore::create(dir.path().join("s"), StoreMetadata::new("mask", 3, 3)).unwrap();
        store.create_dataset("count", DataType::Int32, 1, 2, 2).unwrap();
        let data = Array3::from_shape_vec((1, 2, 2), vec![1, 2, 3, 4]).unwrap();
        store.write_box("count", &data, &BlockBox::full(2, 2)).unwrap();

        store.resize_dataset("count", 1, 3, 3).unwrap();
        assert_eq!(store.dataset("count").unwrap().shape(), (1, 3, 3));
        let resized = store.read_box::<i32>("count", &BlockBox::full(3, 3)).unwrap();
        assert_eq!(
            resized.into_raw_vec(),
            vec![1, 2, 0, 3, 4, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_read_box_f32_converts() {
        let dir = TempDir::new().unwrap();
        let mut store = RasterStore::create(dir.path().join("m"), StoreMetadata::new("mask", 2, 2)).unwrap();
        store.create_dataset("mask", DataType::UInt8, 1, 2, 2).unwrap();
        let data = Array3::from_shape_vec((1, 2, 2), vec![1u8, 0, 0, 1]).unwrap();
        store.write_box("mask", &data, &BlockBox::full(2, 2)).unwrap();
        let values = store.read_box_f32("mask", &BlockBox::new(0, 1, 2, 2)).unwrap();
        assert_eq!(values.into_raw_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_create_keeps_store_of_other_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stack");
        let mut stack = RasterStore::create(&path, sample_metadata()).unwrap();
        stack.create_dataset("unwrapPhase", DataType::Float32, 2, 4, 5).unwrap();

        let replaced = RasterStore::create(&path, StoreMetadata::new("mask", 4, 5));
        assert!(matches!(replaced, Err(ClosureError::InvalidInput(_))));
        let reopened = RasterStore::open(&path).unwrap();
        assert_eq!(reopened.file_type(), "ifgramStack");
        assert!(reopened.has_dataset("unwrapPhase"));
        assert!(reopened.dataset_path("unwrapPhase").is_file());

        // a store of the same type is replaced
        let mut mask = RasterStore::create(dir.path().join("mask"), StoreMetadata::new("mask", 2, 2)).unwrap();
        mask.create_dataset("mask", DataType::UInt8, 1, 2, 2).unwrap();
        let fresh = RasterStore::create(dir.path().join("mask"), StoreMetadata::new("mask", 3, 3)).unwrap();
        assert!(fresh.dataset_names().is_empty());
        assert_eq!(fresh.extent(), (3, 3));
    }

    #[test]
    fn test_errors() {
        let dir = TempDir::new().unwrap();
        assert!(RasterStore::open(dir.path()).is_err());

        let mut store = RasterStore::create(dir.path().join("s"), StoreMetadata::new("mask", 2, 2)).unwrap();
        store.create_dataset("mask", DataType::UInt8, 1, 2, 2).unwrap();
        assert!(store.create_dataset("mask", DataType::UInt8, 1, 2, 2).is_err());
        assert!(matches!(
            store.read_box::<u8>("other", &BlockBox::full(2, 2)),
            Err(ClosureError::DatasetNotFound(_))
        ));
        assert!(store.read_box::<f32>("mask", &BlockBox::full(2, 2)).is_err());
        assert!(store.read_box::<u8>("mask", &BlockBox::full(3, 2)).is_err());
    }
}
