pub mod buckets;
pub mod config;
pub mod error;
pub mod events;
pub mod matrix;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod sampler;
pub mod similarity;
pub mod train;

pub use config::files_handling;
pub use error::{Error, Result};
pub use events::{Event, EventLog, Index};
pub use matrix::MatrixCodec;
pub use pipeline::{EmbeddingTrainer, Pipeline};
pub use similarity::Similarity;
