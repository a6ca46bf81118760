use ndarray::{Array2, Array3};

/// Unwrapped interferometric phase in radians
pub type Phase = f32;

/// Phase stack of one block (ifgram x row x col)
pub type PhaseCube = Array3<Phase>;

/// Phase matrix with one column per pixel (ifgram x pixel)
pub type PhaseMatrix = Array2<Phase>;

/// Triangle design matrix (triangle x ifgram), entries in {-1, 0, +1}
pub type DesignMatrix = Array2<f32>;

/// Rectangular raster region as (x0, y0, x1, y1), end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockBox {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl BlockBox {
    pub fn new(x0: usize, y0: usize, x1: usize, y1: usize) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Box covering a whole raster of the given size
    pub fn full(length: usize, width: usize) -> Self {
        Self::new(0, 0, width, length)
    }

    pub fn rows(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    pub fn cols(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn num_pixels(&self) -> usize {
        self.rows() * self.cols()
    }

    /// Check that the box lies inside a raster of `length` rows and `width` columns
    pub fn fits_within(&self, length: usize, width: usize) -> bool {
        self.x0 <= self.x1 && self.y0 <= self.y1 && self.x1 <= width && self.y1 <= length
    }
}

impl std::fmt::Display for BlockBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x0, self.y0, self.x1, self.y1)
    }
}

/// Error types for closure based unwrapping error correction
#[derive(Debug, thiserror::Error)]
pub enum ClosureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for closure correction operations
pub type ClosureResult<T> = Result<T, ClosureError>;
