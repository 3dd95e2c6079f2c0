use crate::error::{Error, Result};
use crate::optim::Adam;
use crate::sampler::{TrainingBatch, Triple, VocabSizes};

use ndarray::prelude::*;
use ndarray::Array;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};


// squared norms are clamped before the square root, as an l2 normalization would
const NORM_EPSILON: f32 = 1e-12;

/// Three independent lookup tables scored as the product of their pairwise cosines.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimilarityModel {
    ac_embedding: Array2<f32>,
    usr_embedding: Array2<f32>,
    time_embedding: Array2<f32>,
}

/// Gradients of the batch loss, same shapes as the tables.
pub struct Gradients {
    pub activity: Array2<f32>,
    pub user: Array2<f32>,
    pub time: Array2<f32>,
}

/// Adam state for each table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Optimizers {
    pub activity: Adam,
    pub user: Adam,
    pub time: Adam,
}

/// Everything written to the checkpoint file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelState {
    pub model: SimilarityModel,
    pub optimizers: Optimizers,
    pub epoch: usize,
    pub val_loss: f32,
}

struct Cosine {
    value: f32,
    d_x: Array1<f32>,
    d_y: Array1<f32>,
}

// cos(x, y) and its partial derivatives
fn cosine(x: ArrayView1<f32>, y: ArrayView1<f32>) -> Cosine {

    let nx = x.dot(&x).max(NORM_EPSILON).sqrt();
    let ny = y.dot(&y).max(NORM_EPSILON).sqrt();
    let value = x.dot(&y) / (nx * ny);

    // d cos / dx = y / (|x||y|) - cos * x / |x|^2
    let d_x = &y / (nx * ny) - &x * (value / (nx * nx));
    let d_y = &x / (nx * ny) - &y * (value / (ny * ny));

    Cosine { value, d_x, d_y }
}

impl SimilarityModel {

    pub fn new<R: Rng>(vocab: VocabSizes, embedding_dim: usize, rng: &mut R) -> SimilarityModel {

        let init = Uniform::new(-0.05, 0.05);
        Self {
            ac_embedding: Array::random_using((vocab.activities, embedding_dim), init, rng),
            usr_embedding: Array::random_using((vocab.users, embedding_dim), init, rng),
            time_embedding: Array::random_using((vocab.times, embedding_dim), init, rng),
        }
    }

    pub fn from_tables(ac_embedding: Array2<f32>, usr_embedding: Array2<f32>, time_embedding: Array2<f32>) -> Result<SimilarityModel> {

        let dim = ac_embedding.ncols();
        if usr_embedding.ncols() != dim || time_embedding.ncols() != dim {
            return Err(Error::DegenerateInput(format!(
                "embedding widths differ: {}, {}, {}", dim, usr_embedding.ncols(), time_embedding.ncols()
            )));
        }
        Ok(Self { ac_embedding, usr_embedding, time_embedding })
    }

    /// Dimension heuristic: ceil((|activities| * |users|) ^ 0.25), at least 1.
    pub fn embedding_dim_for(n_activities: usize, n_users: usize) -> usize {
        let joint = (n_activities * n_users) as f64;
        (joint.powf(0.25).ceil() as usize).max(1)
    }

    pub fn embedding_dim(&self) -> usize {
        self.ac_embedding.ncols()
    }

    pub fn vocab(&self) -> VocabSizes {
        VocabSizes {
            activities: self.ac_embedding.nrows(),
            users: self.usr_embedding.nrows(),
            times: self.time_embedding.nrows(),
        }
    }

    pub fn n_params(&self) -> usize {
        self.ac_embedding.len() + self.usr_embedding.len() + self.time_embedding.len()
    }

    pub fn optimizers(&self) -> Optimizers {
        Optimizers {
            activity: Adam::new(self.ac_embedding.dim()),
            user: Adam::new(self.usr_embedding.dim()),
            time: Adam::new(self.time_embedding.dim()),
        }
    }

    /// cos(a, u) * cos(u, t) * cos(a, t), always within [-1, 1].
    pub fn score(&self, triple: Triple) -> f32 {
        let e_a = self.ac_embedding.row(triple.activity);
        let e_u = self.usr_embedding.row(triple.user);
        let e_t = self.time_embedding.row(triple.time);
        let s_au = cosine(e_a, e_u).value;
        let s_ut = cosine(e_u, e_t).value;
        let s_at = cosine(e_a, e_t).value;
        (s_au * s_ut * s_at).clamp(-1.0, 1.0)
    }

    pub fn predict(&self, batch: &TrainingBatch) -> Array1<f32> {
        let scores: Vec<f32> = (0..batch.len())
            .into_par_iter()
            .map(|i| self.score(batch.triple(i)))
            .collect();
        Array1::from(scores)
    }

    /// Mean squared error between scores and labels.
    pub fn loss(&self, batch: &TrainingBatch) -> f32 {
        if batch.is_empty() {
            return 0.0;
        }
        let labels = ArrayView1::from(&batch.labels[..]);
        let diff = self.predict(batch) - labels;
        diff.mapv(|x| x.powi(2)).mean().unwrap_or(0.0)
    }

    /// Loss and gradients over the batch rows in `rows`.
    pub fn gradients(&self, batch: &TrainingBatch, rows: &[usize]) -> (f32, Gradients) {

        let mut grads = Gradients {
            activity: Array2::zeros(self.ac_embedding.raw_dim()),
            user: Array2::zeros(self.usr_embedding.raw_dim()),
            time: Array2::zeros(self.time_embedding.raw_dim()),
        };
        if rows.is_empty() {
            return (0.0, grads);
        }

        let n = rows.len() as f32;
        let mut loss = 0.0;
        for &i in rows {

            let Triple { activity: a, user: u, time: t } = batch.triple(i);
            let e_a = self.ac_embedding.row(a);
            let e_u = self.usr_embedding.row(u);
            let e_t = self.time_embedding.row(t);

            let au = cosine(e_a, e_u);
            let ut = cosine(e_u, e_t);
            let at = cosine(e_a, e_t);

            let score = au.value * ut.value * at.value;
            let diff = score - batch.labels[i];
            loss += diff * diff / n;

            // d loss / d score for the mean over rows
            let g = 2.0 * diff / n;

            let mut row = grads.activity.row_mut(a);
            row.scaled_add(g * ut.value * at.value, &au.d_x);
            row.scaled_add(g * au.value * ut.value, &at.d_x);

            let mut row = grads.user.row_mut(u);
            row.scaled_add(g * ut.value * at.value, &au.d_y);
            row.scaled_add(g * au.value * at.value, &ut.d_x);

            let mut row = grads.time.row_mut(t);
            row.scaled_add(g * au.value * at.value, &ut.d_y);
            row.scaled_add(g * au.value * ut.value, &at.d_y);
        }

        (loss, grads)
    }

    pub fn apply(&mut self, grads: &Gradients, optimizers: &mut Optimizers, learning_rate: f32) -> Result<()> {
        optimizers.activity.step(&mut self.ac_embedding, &grads.activity, learning_rate)?;
        optimizers.user.step(&mut self.usr_embedding, &grads.user, learning_rate)?;
        optimizers.time.step(&mut self.time_embedding, &grads.time, learning_rate)
    }

    /// The learned activity table, row i is activity id i.
    pub fn ac_weights(&self) -> Array2<f32> {
        self.ac_embedding.clone()
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const VOCAB: VocabSizes = VocabSizes { activities: 4, users: 3, times: 2 };

    fn batch() -> TrainingBatch {
        let mut batch = TrainingBatch::default();
        batch.push(Triple::new(0, 0, 0), 1.0);
        batch.push(Triple::new(1, 2, 1), 0.0);
        batch.push(Triple::new(3, 1, 0), 1.0);
        batch.push(Triple::new(0, 2, 1), 0.0);
        batch
    }

    #[test]
    fn dimension_heuristic() {
        assert_eq!(SimilarityModel::embedding_dim_for(2, 2), 2);
        assert_eq!(SimilarityModel::embedding_dim_for(3, 3), 2);
        assert_eq!(SimilarityModel::embedding_dim_for(5, 4), 3);
        assert_eq!(SimilarityModel::embedding_dim_for(1, 1), 1);
        assert_eq!(SimilarityModel::embedding_dim_for(0, 3), 1);
    }

    #[test]
    fn scores_stay_in_unit_range() {
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let model = SimilarityModel::new(VOCAB, 3, &mut rng);
            for a in 0..4 {
                for u in 0..3 {
                    for t in 0..2 {
                        let score = model.score(Triple::new(a, u, t));
                        assert!((-1.0..=1.0).contains(&score));
                    }
                }
            }
        }
    }

    #[test]
    fn aligned_vectors_score_one() {
        let ac = array![[1.0, 0.0], [0.0, 1.0]];
        let usr = array![[2.0, 0.0]];
        let time = array![[0.5, 0.0], [-1.0, 0.0]];
        let model = SimilarityModel::from_tables(ac, usr, time).unwrap();
        assert!((model.score(Triple::new(0, 0, 0)) - 1.0).abs() < 1e-6);
        // cos(a,u) = 1 paired with cos(u,t) = -1 and cos(a,t) = -1
        assert!((model.score(Triple::new(0, 0, 1)) - 1.0).abs() < 1e-6);
        assert!(model.score(Triple::new(1, 0, 0)).abs() < 1e-6);
    }

    #[test]
    fn mismatched_widths_are_rejected() {
        let result = SimilarityModel::from_tables(Array2::zeros((2, 3)), Array2::zeros((2, 2)), Array2::zeros((1, 3)));
        assert!(matches!(result, Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn gradients_match_finite_differences() {
        // unit-scale vectors keep the curvature of the cosines small
        let mut rng = StdRng::seed_from_u64(3);
        let init = Uniform::new(-1.0, 1.0);
        let model = SimilarityModel::from_tables(
            Array::random_using((4, 3), init, &mut rng),
            Array::random_using((3, 3), init, &mut rng),
            Array::random_using((2, 3), init, &mut rng),
        ).unwrap();
        let batch = batch();
        let rows: Vec<usize> = (0..batch.len()).collect();
        let (loss, grads) = model.gradients(&batch, &rows);
        assert!((loss - model.loss(&batch)).abs() < 1e-5);

        let h = 1e-3;
        let numeric = |table: usize, r: usize, c: usize| -> f32 {
            let mut plus = model.clone();
            let mut minus = model.clone();
            let (p, m) = match table {
                0 => (&mut plus.ac_embedding, &mut minus.ac_embedding),
                1 => (&mut plus.usr_embedding, &mut minus.usr_embedding),
                _ => (&mut plus.time_embedding, &mut minus.time_embedding),
            };
            p[[r, c]] += h;
            m[[r, c]] -= h;
            (plus.loss(&batch) - minus.loss(&batch)) / (2.0 * h)
        };

        for c in 0..3 {
            assert!((grads.activity[[0, c]] - numeric(0, 0, c)).abs() < 5e-3);
            assert!((grads.user[[2, c]] - numeric(1, 2, c)).abs() < 5e-3);
            assert!((grads.time[[1, c]] - numeric(2, 1, c)).abs() < 5e-3);
        }
        // activity 2 never appears in the batch
        assert!(grads.activity.row(2).iter().all(|g| *g == 0.0));
    }

    #[test]
    fn apply_changes_only_touched_rows_on_first_step() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = SimilarityModel::new(VOCAB, 2, &mut rng);
        let before = model.ac_weights();
        let mut optimizers = model.optimizers();
        let batch = batch();
        let (_, grads) = model.gradients(&batch, &[0, 1]);
        model.apply(&grads, &mut optimizers, 0.01).unwrap();
        let after = model.ac_weights();
        assert_ne!(before.row(0), after.row(0));
        assert_eq!(before.row(3), after.row(3));
        assert_eq!(model.n_params(), (4 + 3 + 2) * 2);
    }

    #[test]
    fn optimizers_of_another_model_are_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = SimilarityModel::new(VOCAB, 2, &mut rng);
        let mut other = SimilarityModel::new(VOCAB, 3, &mut rng).optimizers();
        let (_, grads) = model.gradients(&batch(), &[0, 1]);
        assert!(matches!(model.apply(&grads, &mut other, 0.01), Err(Error::Consistency(_))));
    }
}
