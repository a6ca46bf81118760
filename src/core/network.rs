use crate::types::{ClosureError, ClosureResult, DesignMatrix};
use chrono::NaiveDate;
use ndarray::Array2;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const DATE_FORMAT: &str = "%Y%m%d";

fn date12_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{8})[_-](\d{8})$").expect("valid date12 pattern"))
}

/// Parse a YYYYMMDD date
pub fn parse_date(text: &str) -> ClosureResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|e| ClosureError::InvalidFormat(format!("Invalid date '{}': {}", text, e)))
}

/// Interferogram between two acquisition dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ifgram {
    pub date1: NaiveDate,
    pub date2: NaiveDate,
    /// Excluded from the time-series inversion, still used for closure constraints
    pub dropped: bool,
}

impl Ifgram {
    pub fn new(date1: NaiveDate, date2: NaiveDate) -> Self {
        Self {
            date1,
            date2,
            dropped: false,
        }
    }

    /// Parse a `YYYYMMDD_YYYYMMDD` label
    pub fn parse(label: &str) -> ClosureResult<Self> {
        let caps = date12_regex().captures(label.trim()).ok_or_else(|| {
            ClosureError::InvalidFormat(format!("Invalid interferogram label: {}", label))
        })?;
        Ok(Self::new(parse_date(&caps[1])?, parse_date(&caps[2])?))
    }

    pub fn label(&self) -> String {
        format!(
            "{}_{}",
            self.date1.format(DATE_FORMAT),
            self.date2.format(DATE_FORMAT)
        )
    }
}

impl std::fmt::Display for Ifgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Network of interferograms in stack order
#[derive(Debug, Clone, Default)]
pub struct IfgramNetwork {
    ifgrams: Vec<Ifgram>,
}

impl IfgramNetwork {
    pub fn new(ifgrams: Vec<Ifgram>) -> ClosureResult<Self> {
        let mut seen = HashMap::new();
        for (i, ifgram) in ifgrams.iter().enumerate() {
            if ifgram.date1 == ifgram.date2 {
                return Err(ClosureError::InvalidInput(format!(
                    "Interferogram {} pairs a date with itself",
                    ifgram
                )));
            }
            let key = ordered_pair(ifgram);
            if let Some(j) = seen.insert(key, i) {
                return Err(ClosureError::InvalidInput(format!(
                    "Interferograms {} and {} connect the same dates",
                    j, i
                )));
            }
        }
        Ok(Self { ifgrams })
    }

    pub fn ifgrams(&self) -> &[Ifgram] {
        &self.ifgrams
    }

    pub fn num_ifgrams(&self) -> usize {
        self.ifgrams.len()
    }

    pub fn num_dropped(&self) -> usize {
        self.ifgrams.iter().filter(|i| i.dropped).count()
    }

    /// Sorted unique acquisition dates
    pub fn date_list(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self
            .ifgrams
            .iter()
            .flat_map(|i| [i.date1, i.date2])
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }
}

fn ordered_pair(ifgram: &Ifgram) -> (NaiveDate, NaiveDate) {
    if ifgram.date1 < ifgram.date2 {
        (ifgram.date1, ifgram.date2)
    } else {
        (ifgram.date2, ifgram.date1)
    }
}

/// Source of the signed triangle-to-interferogram incidence matrix
pub trait TriangleDesignMatrix {
    /// Design matrix in size of (num_triangle, num_ifgram)
    fn design_matrix(&self, network: &IfgramNetwork) -> ClosureResult<DesignMatrix>;
}

/// All closed triangles of the network: dates i < j < k with all three pairs present,
/// row = (ij) + (jk) - (ik). Interferograms stored with reversed dates enter with
/// the opposite sign. Dropped interferograms are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkTriangles;

impl TriangleDesignMatrix for NetworkTriangles {
    fn design_matrix(&self, network: &IfgramNetwork) -> ClosureResult<DesignMatrix> {
        let dates = network.date_list();
        let num_ifgram = network.num_ifgrams();

        let mut edges: HashMap<(NaiveDate, NaiveDate), (usize, f32)> = HashMap::new();
        for (idx, ifgram) in network.ifgrams().iter().enumerate() {
            let sign = if ifgram.date1 < ifgram.date2 { 1.0 } else { -1.0 };
            edges.insert(ordered_pair(ifgram), (idx, sign));
        }

        let mut rows: Vec<f32> = Vec::new();
        let mut num_tri = 0;
        for (i, &d1) in dates.iter().enumerate() {
            for (j, &d2) in dates.iter().enumerate().skip(i + 1) {
                let Some(&(e12, s12)) = edges.get(&(d1, d2)) else {
                    continue;
                };
                for &d3 in dates.iter().skip(j + 1) {
                    let (Some(&(e23, s23)), Some(&(e13, s13))) =
                        (edges.get(&(d2, d3)), edges.get(&(d1, d3)))
                    else {
                        continue;
                    };
                    let mut row = vec![0.0f32; num_ifgram];
                    row[e12] = s12;
                    row[e23] = s23;
                    row[e13] = -s13;
                    rows.extend(row);
                    num_tri += 1;
                }
            }
        }

        Array2::from_shape_vec((num_tri, num_ifgram), rows)
            .map_err(|e| ClosureError::Processing(format!("Failed to build design matrix: {}", e)))
    }
}
