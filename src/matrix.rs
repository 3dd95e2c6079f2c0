use crate::config::files_handling::{read_input, save_output};
use crate::error::{Error, Result};
use crate::events::Index;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};


const MARKER_VERSION: u32 = 1;

/// `<matrix file>.key.json`
pub fn marker_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(".key.json");
    PathBuf::from(name)
}

/// Fingerprint of the activity index a matrix was trained for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheMarker {
    pub version: u32,
    pub activity_index_sha256: String,
    pub rows: usize,
    pub dims: usize,
}

impl CacheMarker {

    pub fn new(index_ac: &Index, dims: usize) -> CacheMarker {
        Self {
            version: MARKER_VERSION,
            activity_index_sha256: CacheMarker::index_digest(index_ac),
            rows: index_ac.len(),
            dims,
        }
    }

    /// sha256 over `id\tlabel\n` lines in ascending id order.
    pub fn index_digest(index_ac: &Index) -> String {
        let mut hasher = Sha256::new();
        for (i, label) in index_ac.iter_by_id() {
            hasher.update(format!("{}\t{}\n", i, label).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn matches(&self, index_ac: &Index) -> bool {
        self.version == MARKER_VERSION
            && self.rows == index_ac.len()
            && self.activity_index_sha256 == CacheMarker::index_digest(index_ac)
    }
}

pub struct MatrixCodec {}

impl MatrixCodec {

    /// One row per activity id, ascending: `[id, label, w_0, .., w_k-1]`.
    pub fn reformat_matrix(index_ac: &Index, weights: &Array2<f32>) -> Result<Vec<Vec<String>>> {

        if weights.nrows() != index_ac.len() {
            return Err(Error::Consistency(format!(
                "{} weight rows for {} activities", weights.nrows(), index_ac.len()
            )));
        }

        let mut matrix: Vec<Vec<String>> = Vec::with_capacity(index_ac.len());
        for (i, label) in index_ac.iter_by_id() {
            let mut data = vec![i.to_string(), label.to_owned()];
            data.extend(weights.row(i).iter().map(|w| w.to_string()));
            matrix.push(data);
        }
        Ok(matrix)
    }

    /// Writes the matrix file and its cache marker.
    pub fn write(file_path: &Path, index_ac: &Index, weights: &Array2<f32>) -> Result<()> {

        let matrix = MatrixCodec::reformat_matrix(index_ac, weights)?;
        save_output::<Vec<Vec<String>>>(file_path, &matrix)?;
        save_output::<CacheMarker>(&marker_path(file_path), &CacheMarker::new(index_ac, weights.ncols()))?;

        info!("saved {}x{} activity embedding to {}", weights.nrows(), weights.ncols(), file_path.display());
        Ok(())
    }

    /// Marker written alongside `file_path`, `None` for matrices without one.
    pub fn read_marker(file_path: &Path) -> Result<Option<CacheMarker>> {
        let path = marker_path(file_path);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_input::<CacheMarker>(&path)?))
    }

    // labels and weights of every row, in file order
    fn parse(file_path: &Path) -> Result<(Vec<String>, Array2<f32>)> {

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(file_path)?;

        let mut labels: Vec<String> = Vec::new();
        let mut values: Vec<f32> = Vec::new();
        let mut dims: Option<usize> = None;

        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() < 2 {
                return Err(Error::Parse(format!("line {} of {} has {} fields", line + 1, file_path.display(), record.len())));
            }
            dims.get_or_insert(record.len() - 2);
            labels.push(record[1].trim().to_owned());
            for field in record.iter().skip(2) {
                let value = field.trim().parse::<f32>().map_err(|e| {
                    Error::Parse(format!("line {} of {}: '{}' {}", line + 1, file_path.display(), field, e))
                })?;
                values.push(value);
            }
        }

        let weights = Array2::from_shape_vec((labels.len(), dims.unwrap_or(0)), values)?;
        Ok((labels, weights))
    }

    // the set of labels in the file must equal the set of index labels
    fn check_labels(index_ac: &Index, labels: &[String], file_path: &Path) -> Result<()> {

        let expected: HashSet<&str> = index_ac.iter_by_id().map(|(_, t)| t).collect();
        let found: HashSet<&str> = labels.iter().map(String::as_str).collect();
        if expected != found {
            let missing = expected.difference(&found).count();
            let unexpected = found.difference(&expected).count();
            return Err(Error::Consistency(format!(
                "{} activities missing from {} and {} unknown ones in it",
                missing, file_path.display(), unexpected
            )));
        }
        Ok(())
    }

    /// Loads the weights, the labels in the file must be exactly the labels of `index_ac`.
    /// Rows keep file order.
    pub fn read(index_ac: &Index, file_path: &Path) -> Result<Array2<f32>> {

        let (labels, weights) = MatrixCodec::parse(file_path)?;
        MatrixCodec::check_labels(index_ac, &labels, file_path)?;

        debug!("read {:?} matrix from {}", weights.dim(), file_path.display());
        Ok(weights)
    }

    /// Like `read`, but row i is moved to the id `index_ac` gives its label.
    pub fn read_aligned(index_ac: &Index, file_path: &Path) -> Result<Array2<f32>> {

        let (labels, weights) = MatrixCodec::parse(file_path)?;
        MatrixCodec::check_labels(index_ac, &labels, file_path)?;
        if labels.len() != index_ac.len() {
            return Err(Error::Consistency(format!(
                "{} rows in {} for {} activities", labels.len(), file_path.display(), index_ac.len()
            )));
        }

        let mut aligned = Array2::zeros(weights.raw_dim());
        for (row, label) in labels.iter().enumerate() {
            let i = index_ac.lookup("activity", label)?;
            aligned.row_mut(i).assign(&weights.row(row));
        }

        debug!("read {:?} matrix from {} in index order", aligned.dim(), file_path.display());
        Ok(aligned)
    }
}
