use std::error::Error;
use std::fs;
use std::path::Path;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use triplet_trainer::files_handling::read_input;
use triplet_trainer::{Index, MatrixCodec, Similarity};


// checks on trained activity vectors: the K most similar activities to each
// label of an input file (one label per line).
// treated as binary executable so it can be ran independently from main
//
// example: ... Output/ac_embedding.emb Input/ac_index.json Input/labels.txt 5

fn main() {

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 && args.len() != 5 {
        error!("usage: inspect <matrix file> <activity index json> <labels file> [k]");
        process::exit(2);
    }

    if let Err(e) = run(&args) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {

    let k = match args.get(4) {
        Some(k) => k.parse::<usize>()?,
        None => 5,
    };

    let index_ac = read_input::<Index>(Path::new(&args[2]))?;
    // rows are placed by their label, whatever order the file has
    let w = MatrixCodec::read_aligned(&index_ac, Path::new(&args[1]))?;
    let similarity = Similarity::new(w, index_ac)?;

    let inputs = fs::read_to_string(&args[3])?;
    for label in inputs.lines().map(str::trim).filter(|l| !l.is_empty()) {

        info!("searching {} most similar activities to {}", k, label);
        for (i, (similar, score)) in similarity.most_similar_to(label, k)?.iter().enumerate() {
            println!("{} : {} ? {} = {}", i, label, similar, score);
        }
        println!();
    }

    Ok(())
}
