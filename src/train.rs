use crate::config::files_handling::save_output;
use crate::config::JsonTrain;
use crate::error::{Error, Result};
use crate::model::{ModelState, Optimizers, SimilarityModel};
use crate::sampler::{TrainingBatch, VocabSizes};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::ThreadPoolBuilder;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};


/// What fitting hands back to the caller.
#[derive(Clone, Debug)]
pub struct TrainReport {
    pub ac_weights: Array2<f32>,     // activity table after the last epoch
    pub epochs: usize,
    pub best_epoch: Option<usize>,   // epoch of the checkpoint on disk
    pub best_loss: f32,
}

/// Fits a similarity model on a batch and returns the activity weights.
pub trait Fit {
    fn fit(&mut self, batch: &TrainingBatch, vocab: VocabSizes, embedding_dim: usize, checkpoint_path: &Path) -> Result<TrainReport>;
}

pub struct Train {
    params: JsonTrain,
    rng: StdRng,
}

struct DisplayProgress {
    epoch_loss: f32,     // sum of mini-batch losses in the epoch
    total_batches: f32,  // number of mini-batches in the epoch
    best_loss: f32,
    best_epoch: Option<usize>,
}

impl DisplayProgress {

    fn new() -> Self {
        Self {
            epoch_loss: 0.0,
            total_batches: 0.0,
            best_loss: f32::INFINITY,
            best_epoch: None,
        }
    }

    fn reset_epoch(&mut self) {
        self.epoch_loss = 0.0;
        self.total_batches = 0.0;
    }

    fn add_batch(&mut self, loss: f32) {
        self.epoch_loss += loss;
        self.total_batches += 1.0;
    }

    fn mean_loss(&self) -> f32 {
        if self.total_batches == 0.0 {
            return 0.0;
        }
        self.epoch_loss / self.total_batches
    }

    // true if `loss` beats every previous epoch
    fn improved(&mut self, epoch: usize, loss: f32) -> bool {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = Some(epoch);
            return true;
        }
        false
    }
}

impl Train {

    pub fn new(params: &JsonTrain, rng: StdRng) -> Train {
        Self { params: params.clone(), rng }
    }

    /// Seeded from `params.seed` when given, from entropy otherwise.
    pub fn from_params(params: &JsonTrain) -> Train {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Train::new(params, rng)
    }

    /// The first `floor(n * (1 - validation_split))` rows train, the rest validate.
    fn split(&self, batch: &TrainingBatch) -> (TrainingBatch, TrainingBatch) {
        let n = batch.len();
        // the epsilon absorbs the f32 representation error of the split fraction
        let n_train = ((n as f64) * (1.0 - self.params.validation_split as f64) + 1e-6).floor() as usize;
        batch.split_at(n_train.min(n))
    }

    fn run_epoch(&mut self, model: &mut SimilarityModel, optimizers: &mut Optimizers, train: &TrainingBatch, progress: &mut DisplayProgress) -> Result<()> {

        // shuffle the training rows every epoch, then walk them in mini-batches
        let mut order = (0..train.len()).collect::<Vec<usize>>();
        order.shuffle(&mut self.rng);

        for chunk in order.chunks(self.params.batch_size) {
            let (loss, grads) = model.gradients(train, chunk);
            model.apply(&grads, optimizers, self.params.learning_rate)?;
            progress.add_batch(loss);
        }
        Ok(())
    }
}

impl Fit for Train {

    fn fit(&mut self, batch: &TrainingBatch, vocab: VocabSizes, embedding_dim: usize, checkpoint_path: &Path) -> Result<TrainReport> {

        let (train, validation) = self.split(batch);
        if train.is_empty() {
            return Err(Error::DegenerateInput("no training examples after the validation split".to_string()));
        }
        if validation.is_empty() {
            info!("validation split is empty, monitoring training loss for checkpoints");
        }

        let mut model = SimilarityModel::new(vocab, embedding_dim, &mut self.rng);
        let mut optimizers = model.optimizers();
        info!(
            "model: activity_embedding {}x{}, user_embedding {}x{}, time_embedding {}x{}, {} trainable params",
            vocab.activities, embedding_dim, vocab.users, embedding_dim, vocab.times, embedding_dim, model.n_params()
        );
        info!("train on {} samples, validate on {} samples", train.len(), validation.len());

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.params.num_threads_training)
            .build()
            .map_err(|e| Error::Config(format!("cannot build training thread pool: {}", e)))?;

        let mut progress = DisplayProgress::new();
        for epoch in 0..self.params.max_iter {

            let timer = Instant::now();
            progress.reset_epoch();
            self.run_epoch(&mut model, &mut optimizers, &train, &mut progress)?;

            let loss = progress.mean_loss();
            let val_loss = if validation.is_empty() {
                loss
            } else {
                pool.install(|| model.loss(&validation))
            };
            if !loss.is_finite() || !val_loss.is_finite() {
                return Err(Error::DegenerateInput(format!("loss diverged at epoch {} (loss {}, val_loss {})", epoch + 1, loss, val_loss)));
            }

            info!(
                "epoch {}/{} - {}s - loss: {:.4} - val_loss: {:.4}",
                epoch + 1, self.params.max_iter, timer.elapsed().as_secs(), loss, val_loss
            );

            // only improving epochs overwrite the checkpoint
            if progress.improved(epoch, val_loss) {
                let state = ModelState {
                    model: model.clone(),
                    optimizers: optimizers.clone(),
                    epoch,
                    val_loss,
                };
                save_output::<ModelState>(checkpoint_path, &state)?;
                debug!("val_loss improved to {:.5}, saved model to {}", val_loss, checkpoint_path.display());
            }
        }

        Ok(TrainReport {
            ac_weights: model.ac_weights(),
            epochs: self.params.max_iter,
            best_epoch: progress.best_epoch,
            best_loss: progress.best_loss,
        })
    }
}
