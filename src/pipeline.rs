use crate::buckets::TimeBucketizer;
use crate::config::files_handling::read_input;
use crate::config::{Config, JsonOutput, JsonTrain};
use crate::error::Result;
use crate::events::{EventLog, Index};
use crate::matrix::MatrixCodec;
use crate::model::SimilarityModel;
use crate::sampler::{TripletSampler, VocabSizes};
use crate::train::{Fit, Train};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::time::Instant;
use tracing::{info, warn};


/// Trains, or reloads, the activity embedding of one event log.
pub struct EmbeddingTrainer {
    log: EventLog,
    ac_index: Index,
    usr_index: Index,
    json_output: JsonOutput,
    json_train: JsonTrain,
}

impl EmbeddingTrainer {

    pub fn new(log: EventLog, ac_index: Index, usr_index: Index, json_output: JsonOutput, json_train: JsonTrain) -> EmbeddingTrainer {
        Self { log, ac_index, usr_index, json_output, json_train }
    }

    pub fn load_embeddings(&self) -> Result<Array2<f32>> {
        let mut trainer = Train::from_params(&self.json_train);
        self.load_embeddings_with(&mut trainer)
    }

    /// Reads the persisted matrix when it is current, otherwise trains with `fitter`
    /// and persists the result. Row i is activity id i.
    pub fn load_embeddings_with<F: Fit>(&self, fitter: &mut F) -> Result<Array2<f32>> {

        let embedding_path = self.json_output.embedding_path();
        if embedding_path.exists() {
            match MatrixCodec::read_marker(&embedding_path)? {
                Some(marker) if !marker.matches(&self.ac_index) => {
                    warn!("{} was trained for another activity index, retraining", embedding_path.display());
                }
                _ => {
                    info!("loading embedded matrix from {}", embedding_path.display());
                    return MatrixCodec::read(&self.ac_index, &embedding_path);
                }
            }
        }

        self.train_embeddings(fitter)
    }

    fn train_embeddings<F: Fit>(&self, fitter: &mut F) -> Result<Array2<f32>> {

        // every user must be known before anything is derived from the log
        for event in self.log.iter() {
            self.usr_index.lookup("user", &event.user)?;
        }

        let buckets = TimeBucketizer::run(&self.log)?;
        let pairs = TripletSampler::encode(&self.log, &self.ac_index, &self.usr_index, &buckets)?;
        let vocab = VocabSizes {
            activities: self.ac_index.len(),
            users: self.usr_index.len(),
            times: buckets.time_index.len(),
        };

        let embedding_dim = SimilarityModel::embedding_dim_for(self.ac_index.len(), self.usr_index.len());
        info!("embedding dimension: {}, vocabularies: {:?}", embedding_dim, vocab);

        let mut rng = match self.json_train.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let batch = TripletSampler::build_batch(
            &pairs,
            vocab,
            self.json_train.negative_ratio,
            self.json_train.max_rejections_per_negative,
            &mut rng,
        )?;

        fs::create_dir_all(&self.json_output.output_dir)?;
        let report = fitter.fit(&batch, vocab, embedding_dim, &self.json_output.model_path())?;
        if let Some(best_epoch) = report.best_epoch {
            info!("best checkpoint at epoch {} with loss {:.5}", best_epoch + 1, report.best_loss);
        }

        MatrixCodec::write(&self.json_output.embedding_path(), &self.ac_index, &report.ac_weights)?;
        Ok(report.ac_weights)
    }
}

pub struct Pipeline {}

impl Pipeline {

    // runs the main procedure of 3 steps -
    // -> configuration of arguments
    // -> loading of the log and the indexes
    // -> training, or reloading, of the activity embedding

    pub fn run(args: &[String]) -> Result<Array2<f32>> {

        info!("building parameters...");
        let params = Config::new(args)?.get_params();
        info!("{}", params);

        let log = read_input::<EventLog>(&params.event_log_file)?;
        let ac_index = read_input::<Index>(&params.activity_index_file)?;
        let usr_index = read_input::<Index>(&params.user_index_file)?;
        info!("loaded {} events, {} activities, {} users", log.len(), ac_index.len(), usr_index.len());

        let timer = Instant::now();
        let trainer = EmbeddingTrainer::new(log, ac_index, usr_index, params.json_output, params.json_train);
        let weights = trainer.load_embeddings()?;

        info!("activity embedding of shape {:?} ready, took {} seconds", weights.dim(), timer.elapsed().as_secs());
        Ok(weights)
    }
}
