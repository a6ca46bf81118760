//! Store, mask and template I/O

pub mod store;
pub mod patch_writer;
pub mod stack;
pub mod mask;
pub mod template;
pub mod gdal_mask;

pub use store::{Attribute, DataType, DatasetInfo, IfgramRecord, RasterStore, StoreMetadata};
pub use patch_writer::PatchWriter;
pub use stack::{IfgramStack, IFGRAM_STACK_TYPE, UNWRAP_PHASE};
pub use mask::{open_mask, MaskFile, MaskSource};
pub use template::read_template;
pub use gdal_mask::GdalMask;
