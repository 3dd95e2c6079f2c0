use crate::error::{Error, Result};
use crate::events::Index;

use ndarray::prelude::*;


/// Cosine neighbourhoods over a loaded activity embedding.
pub struct Similarity {
    w: Array2<f32>,
    index_ac: Index,
}

impl Similarity {

    /// Rows of `w` are activity ids, each is normalized to unit l2 norm.
    pub fn new(mut w: Array2<f32>, index_ac: Index) -> Result<Similarity> {

        if w.nrows() != index_ac.len() {
            return Err(Error::Consistency(format!("{} rows for {} activities", w.nrows(), index_ac.len())));
        }

        // zero rows stay zero
        for mut row in w.axis_iter_mut(Axis(0)) {
            let norm = row.mapv(|a| a.powi(2)).sum().sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|a| a / norm);
            }
        }

        Ok(Self { w, index_ac })
    }

    pub fn extract_vec_from_label(&self, label: &str) -> Result<Array1<f32>> {
        let i = self.index_ac.lookup("activity", label)?;
        Ok(self.w.row(i).to_owned())
    }

    pub fn find_k_most_similar(&self, vec: &Array1<f32>, k: usize) -> Vec<(String, f32)> {

        // rows are unit length, the dot product ranks by cosine
        let scores = self.w.dot(vec);
        let mut indexed_scores: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();

        // sort by most similar in descending order
        indexed_scores.sort_by(|(_i, s), (_j, t)| t.total_cmp(s));

        indexed_scores
            .into_iter()
            .take(k)
            .filter_map(|(i, score)| self.index_ac.label(i).map(|t| (t.to_owned(), score)))
            .collect()
    }

    /// The k nearest other activities of `label`.
    pub fn most_similar_to(&self, label: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let vec = self.extract_vec_from_label(label)?;
        Ok(self
            .find_k_most_similar(&vec, k + 1)
            .into_iter()
            .filter(|(t, _)| t != label)
            .take(k)
            .collect())
    }
}
