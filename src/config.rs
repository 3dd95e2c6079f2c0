use crate::error::{Error, Result};

use serde_json::Value;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};


#[derive(Clone, Debug)]
pub struct JsonTrain {
    pub max_iter: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub validation_split: f32,
    pub negative_ratio: usize,
    pub max_rejections_per_negative: usize,
    pub seed: Option<u64>,
    pub num_threads_training: usize,
}

impl Default for JsonTrain {
    fn default() -> Self {
        Self {
            max_iter: 100,
            learning_rate: 0.001,
            batch_size: 32,
            validation_split: 0.2,
            negative_ratio: 2,
            max_rejections_per_negative: 1000,
            seed: None,
            num_threads_training: 1,
        }
    }
}

impl Display for JsonTrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "training hyper parameters:
        max_iter: {},
        learning_rate: {},
        batch_size: {},
        validation_split: {},
        negative_ratio: {},
        max_rejections_per_negative: {},
        seed: {:?},
        num_threads_training: {}",
        self.max_iter, self.learning_rate, self.batch_size, self.validation_split, self.negative_ratio,
        self.max_rejections_per_negative, self.seed, self.num_threads_training
        )
    }
}

/// Where the trained artifacts live.
#[derive(Clone, Debug)]
pub struct JsonOutput {
    pub output_dir: PathBuf,
    pub embedding_file_name: String,
    pub model_file_name: String,
}

impl JsonOutput {

    pub fn new(output_dir: &Path) -> JsonOutput {
        Self {
            output_dir: output_dir.to_path_buf(),
            embedding_file_name: "ac_embedding.emb".to_string(),
            model_file_name: "ac_embedding_model.bin.gz".to_string(),
        }
    }

    pub fn embedding_path(&self) -> PathBuf {
        self.output_dir.join(&self.embedding_file_name)
    }

    pub fn model_path(&self) -> PathBuf {
        self.output_dir.join(&self.model_file_name)
    }

    /// Cache marker written next to the matrix file.
    pub fn marker_path(&self) -> PathBuf {
        crate::matrix::marker_path(&self.embedding_path())
    }
}

#[derive(Clone, Debug)]
pub struct JsonTypes {
    pub event_log_file: PathBuf,
    pub activity_index_file: PathBuf,
    pub user_index_file: PathBuf,
    pub json_output: JsonOutput,
    pub json_train: JsonTrain,
}

impl Display for JsonTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        event_log_file: {}
        activity_index_file: {}
        user_index_file: {}
        output_dir: {}
        embedding_file_name: {}
        model_file_name: {}
        Using training hyper-params: {}",
        self.event_log_file.display(), self.activity_index_file.display(), self.user_index_file.display(),
        self.json_output.output_dir.display(), self.json_output.embedding_file_name, self.json_output.model_file_name,
        self.json_train)
    }
}

pub struct Config {
    params: JsonTypes
}

fn required_str<'a>(json: &'a Value, key: &str) -> Result<&'a str> {
    match json.get(key) {
        Some(value) => value.as_str().ok_or_else(|| Error::Config(format!("{} should be a string", key))),
        None => Err(Error::Config(format!("{} was not supplied through json", key))),
    }
}

fn optional_str(json: &Value, key: &str, default: &str) -> Result<String> {
    match json.get(key) {
        Some(value) => Ok(value.as_str().ok_or_else(|| Error::Config(format!("{} should be a string", key)))?.to_owned()),
        None => Ok(default.to_owned()),
    }
}

fn optional_usize(json: &Value, key: &str, default: usize) -> Result<usize> {
    match json.get(key) {
        Some(value) => Ok(value.as_u64().ok_or_else(|| Error::Config(format!("{} should be a non-negative integer", key)))? as usize),
        None => Ok(default),
    }
}

fn optional_f32(json: &Value, key: &str, default: f32) -> Result<f32> {
    match json.get(key) {
        Some(value) => Ok(value.as_f64().ok_or_else(|| Error::Config(format!("{} should be numeric", key)))? as f32),
        None => Ok(default),
    }
}

impl Config {

    pub fn get_params(&self) -> JsonTypes {
        self.params.clone()
    }

    /// Expects the program name followed by the path to a json file.
    pub fn new(args: &[String]) -> Result<Config> {

        if args.len() != 2 {
            return Err(Error::Config("input should be a path to json file only".to_string()));
        }

        let f = fs::File::open(&args[1])?;
        let json: Value = serde_json::from_reader(f)?;
        Config::from_json(&json)
    }

    pub fn from_json(json: &Value) -> Result<Config> {

        // inputs and output folder are mandatory
        let event_log_file = required_str(json, "event_log_file")?;
        let activity_index_file = required_str(json, "activity_index_file")?;
        let user_index_file = required_str(json, "user_index_file")?;
        let output_dir = required_str(json, "output_dir")?;

        let mut json_output = JsonOutput::new(Path::new(output_dir));
        json_output.embedding_file_name = optional_str(json, "embedding_file_name", &json_output.embedding_file_name)?;
        json_output.model_file_name = optional_str(json, "model_file_name", &json_output.model_file_name)?;

        // handle default vs input parameters
        let defaults = JsonTrain::default();
        let seed = match json.get("seed") {
            Some(seed) => Some(seed.as_u64().ok_or_else(|| Error::Config("seed should be a non-negative integer".to_string()))?),
            None => None,
        };
        let json_train = JsonTrain {
            max_iter: optional_usize(json, "max_iter", defaults.max_iter)?,
            learning_rate: optional_f32(json, "learning_rate", defaults.learning_rate)?,
            batch_size: optional_usize(json, "batch_size", defaults.batch_size)?,
            validation_split: optional_f32(json, "validation_split", defaults.validation_split)?,
            negative_ratio: optional_usize(json, "negative_ratio", defaults.negative_ratio)?,
            max_rejections_per_negative: optional_usize(json, "max_rejections_per_negative", defaults.max_rejections_per_negative)?,
            seed,
            num_threads_training: optional_usize(json, "num_threads_training", defaults.num_threads_training)?,
        };
        Config::validate(&json_train)?;

        let params = JsonTypes {
            event_log_file: PathBuf::from(event_log_file),
            activity_index_file: PathBuf::from(activity_index_file),
            user_index_file: PathBuf::from(user_index_file),
            json_output,
            json_train,
        };

        Ok(Self { params })
    }

    pub fn validate(json_train: &JsonTrain) -> Result<()> {

        if json_train.max_iter == 0 {
            return Err(Error::Config("max_iter must be positive".to_string()));
        }
        if !json_train.learning_rate.is_finite() || json_train.learning_rate <= 0.0 {
            return Err(Error::Config(format!("learning_rate must be positive, got {}", json_train.learning_rate)));
        }
        if json_train.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&json_train.validation_split) {
            return Err(Error::Config(format!("validation_split must be in [0, 1), got {}", json_train.validation_split)));
        }
        if json_train.max_rejections_per_negative == 0 {
            return Err(Error::Config("max_rejections_per_negative must be positive".to_string()));
        }
        if json_train.num_threads_training == 0 {
            return Err(Error::Config("num_threads_training must be positive".to_string()));
        }
        Ok(())
    }
}


pub mod files_handling {

    use crate::error::Result;
    use crate::events::{EventLog, Index};
    use crate::matrix::CacheMarker;
    use crate::model::ModelState;

    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::{BufReader, BufWriter, Write};
    use std::path::Path;

    pub fn read_input<R: ReadFile>(file_path: &Path) -> Result<<R as ReadFile>::Item> {
        <R as ReadFile>::read_file(file_path)
    }

    pub fn save_output<S: SaveFile>(file_path: &Path, item: &S) -> Result<()> {

        // create output folder
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        item.save_file(file_path)
    }

    pub trait ReadFile {
        type Item;
        fn read_file(file_path: &Path) -> Result<Self::Item>;
    }

    impl ReadFile for Index {
        type Item = Self;
        fn read_file(file_path: &Path) -> Result<Self::Item> {
            let f = BufReader::new(File::open(file_path)?);
            let t2i: HashMap<String, usize> = serde_json::from_reader(f)?;
            Index::from_t2i(t2i)
        }
    }

    impl ReadFile for EventLog {
        type Item = Self;
        fn read_file(file_path: &Path) -> Result<Self::Item> {
            EventLog::from_csv(file_path)
        }
    }

    impl ReadFile for ModelState {
        type Item = Self;
        fn read_file(file_path: &Path) -> Result<Self::Item> {
            let f = BufReader::new(File::open(file_path)?);
            let reader = GzDecoder::new(f);
            let state: ModelState = bincode::deserialize_from(reader)?;
            Ok(state)
        }
    }

    impl ReadFile for CacheMarker {
        type Item = Self;
        fn read_file(file_path: &Path) -> Result<Self::Item> {
            let f = BufReader::new(File::open(file_path)?);
            let marker: CacheMarker = serde_json::from_reader(f)?;
            Ok(marker)
        }
    }

    pub trait SaveFile {
        fn save_file(&self, file_path: &Path) -> Result<()>;
    }

    // plain comma-delimited rows, no header
    impl SaveFile for Vec<Vec<String>> {
        fn save_file(&self, file_path: &Path) -> Result<()> {
            let mut wrt = csv::WriterBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(file_path)?;
            for row in self {
                wrt.write_record(row)?;
            }
            wrt.flush()?;
            Ok(())
        }
    }

    impl SaveFile for ModelState {
        fn save_file(&self, file_path: &Path) -> Result<()> {
            let f = BufWriter::new(File::create(file_path)?);
            let mut writer = GzEncoder::new(f, Compression::default());
            bincode::serialize_into(&mut writer, self)?;
            writer.finish()?.flush()?;
            Ok(())
        }
    }

    impl SaveFile for CacheMarker {
        fn save_file(&self, file_path: &Path) -> Result<()> {
            let mut f = BufWriter::new(File::create(file_path)?);
            serde_json::to_writer_pretty(&mut f, self)?;
            f.flush()?;
            Ok(())
        }
    }
}
