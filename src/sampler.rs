use crate::buckets::TimeBuckets;
use crate::error::{Error, Result};
use crate::events::{EventLog, Index};

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, info};


/// (activity, user, time bucket) ids of one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub activity: usize,
    pub user: usize,
    pub time: usize,
}

impl Triple {
    pub fn new(activity: usize, user: usize, time: usize) -> Triple {
        Self { activity, user, time }
    }
}

/// Number of ids in each of the three vocabularies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VocabSizes {
    pub activities: usize,
    pub users: usize,
    pub times: usize,
}

impl VocabSizes {

    pub fn joint(&self) -> usize {
        self.activities.saturating_mul(self.users).saturating_mul(self.times)
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        triple.activity < self.activities && triple.user < self.users && triple.time < self.times
    }
}

/// Parallel columns of a labeled batch, label 1.0 for observed triples and 0.0 otherwise.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingBatch {
    pub activities: Vec<usize>,
    pub users: Vec<usize>,
    pub times: Vec<usize>,
    pub labels: Vec<f32>,
}

impl TrainingBatch {

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn push(&mut self, triple: Triple, label: f32) {
        self.activities.push(triple.activity);
        self.users.push(triple.user);
        self.times.push(triple.time);
        self.labels.push(label);
    }

    pub fn triple(&self, i: usize) -> Triple {
        Triple::new(self.activities[i], self.users[i], self.times[i])
    }

    /// Rows `..at` and `at..` as two batches, order kept.
    pub fn split_at(&self, at: usize) -> (TrainingBatch, TrainingBatch) {
        let at = at.min(self.len());
        let head = TrainingBatch {
            activities: self.activities[..at].to_vec(),
            users: self.users[..at].to_vec(),
            times: self.times[..at].to_vec(),
            labels: self.labels[..at].to_vec(),
        };
        let tail = TrainingBatch {
            activities: self.activities[at..].to_vec(),
            users: self.users[at..].to_vec(),
            times: self.times[at..].to_vec(),
            labels: self.labels[at..].to_vec(),
        };
        (head, tail)
    }

    pub fn n_positive(&self) -> usize {
        self.labels.iter().filter(|l| **l > 0.5).count()
    }
}

pub struct TripletSampler {}

impl TripletSampler {

    /// Maps every log row to its triple of ids, in log order.
    pub fn encode(log: &EventLog, ac_index: &Index, usr_index: &Index, buckets: &TimeBuckets) -> Result<Vec<Triple>> {

        if buckets.labels.len() != log.len() {
            return Err(Error::DegenerateInput(format!(
                "{} time labels for {} events", buckets.labels.len(), log.len()
            )));
        }

        let time_ids = buckets.time_ids()?;
        log.iter().zip(time_ids).map(|(event, time)| {
            Ok(Triple::new(
                ac_index.lookup("activity", &event.task)?,
                usr_index.lookup("user", &event.user)?,
                time,
            ))
        }).collect()
    }

    pub fn n_positive(n_events: usize) -> usize {
        (n_events + 1) / 2
    }

    pub fn batch_size(n_events: usize, negative_ratio: usize) -> usize {
        TripletSampler::n_positive(n_events) * (1 + negative_ratio)
    }

    /// Samples half of the observed triples as positives and fills the rest of the
    /// batch with random triples that never occur in `pairs`. Rows come back shuffled.
    pub fn build_batch<R: Rng>(
        pairs: &[Triple],
        vocab: VocabSizes,
        negative_ratio: usize,
        max_rejections_per_negative: usize,
        rng: &mut R,
    ) -> Result<TrainingBatch> {

        if pairs.len() < 2 {
            return Err(Error::DegenerateInput(format!("{} events, at least 2 are needed to sample a batch", pairs.len())));
        }
        if vocab.activities == 0 || vocab.users == 0 || vocab.times == 0 {
            return Err(Error::DegenerateInput(format!("empty vocabulary {:?}", vocab)));
        }
        if let Some(outside) = pairs.iter().find(|p| !vocab.contains(p)) {
            return Err(Error::DegenerateInput(format!("triple {:?} is outside vocabulary {:?}", outside, vocab)));
        }

        let n_positive = TripletSampler::n_positive(pairs.len());
        let batch_size = TripletSampler::batch_size(pairs.len(), negative_ratio);
        let n_negative = batch_size - n_positive;

        // membership is checked against every observed triple, not only the sampled ones
        let pairs_set: HashSet<Triple> = pairs.iter().copied().collect();
        if n_negative > 0 && pairs_set.len() >= vocab.joint() {
            return Err(Error::DegenerateInput(format!(
                "all {} triples of the joint space are observed, no negatives to sample", vocab.joint()
            )));
        }

        let mut rows: Vec<(Triple, f32)> = Vec::with_capacity(batch_size);
        rows.extend(pairs.choose_multiple(rng, n_positive).map(|p| (*p, 1.0)));

        let max_draws = max_rejections_per_negative.saturating_mul(n_negative);
        let mut draws = 0usize;
        while rows.len() < batch_size {

            if draws >= max_draws {
                return Err(Error::DegenerateInput(format!(
                    "found {} of {} negatives within {} draws, the joint space is nearly saturated",
                    rows.len() - n_positive, n_negative, max_draws
                )));
            }
            draws += 1;

            let candidate = Triple::new(
                rng.gen_range(0..vocab.activities),
                rng.gen_range(0..vocab.users),
                rng.gen_range(0..vocab.times),
            );
            if !pairs_set.contains(&candidate) {
                rows.push((candidate, 0.0));
            }
        }
        debug!("negative sampling took {} draws for {} negatives", draws, n_negative);

        rows.shuffle(rng);

        let mut batch = TrainingBatch::default();
        for (triple, label) in rows {
            batch.push(triple, label);
        }

        info!("built batch of {} examples ({} positive, {} negative)", batch.len(), n_positive, n_negative);
        Ok(batch)
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn observed() -> Vec<Triple> {
        vec![
            Triple::new(0, 0, 0),
            Triple::new(1, 1, 0),
            Triple::new(2, 0, 1),
            Triple::new(0, 2, 1),
            Triple::new(1, 1, 0),
        ]
    }

    const VOCAB: VocabSizes = VocabSizes { activities: 3, users: 3, times: 2 };

    #[test]
    fn batch_size_matches_ratio() {
        let mut rng = StdRng::seed_from_u64(7);
        for negative_ratio in 0..5 {
            let batch = TripletSampler::build_batch(&observed(), VOCAB, negative_ratio, 1000, &mut rng).unwrap();
            // ceil(5 / 2) = 3 positives
            assert_eq!(batch.len(), 3 * (1 + negative_ratio));
            assert_eq!(batch.n_positive(), 3);
            assert_eq!(batch.activities.len(), batch.len());
            assert_eq!(batch.users.len(), batch.len());
            assert_eq!(batch.times.len(), batch.len());
        }
    }

    #[test]
    fn negatives_are_never_observed() {
        let pairs = observed();
        let pairs_set: HashSet<Triple> = pairs.iter().copied().collect();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let batch = TripletSampler::build_batch(&pairs, VOCAB, 3, 1000, &mut rng).unwrap();
            for i in 0..batch.len() {
                let triple = batch.triple(i);
                if batch.labels[i] == 0.0 {
                    assert!(!pairs_set.contains(&triple), "{:?} labeled negative", triple);
                } else {
                    assert!(pairs_set.contains(&triple));
                }
            }
        }
    }

    #[test]
    fn too_few_events() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = TripletSampler::build_batch(&[Triple::new(0, 0, 0)], VOCAB, 1, 10, &mut rng);
        assert!(matches!(result, Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn saturated_space_fails_fast() {
        let vocab = VocabSizes { activities: 1, users: 2, times: 1 };
        let pairs = vec![Triple::new(0, 0, 0), Triple::new(0, 1, 0)];
        let mut rng = StdRng::seed_from_u64(0);
        let result = TripletSampler::build_batch(&pairs, vocab, 1, 1000, &mut rng);
        assert!(matches!(result, Err(Error::DegenerateInput(_))));

        // no negatives asked, nothing to saturate
        let batch = TripletSampler::build_batch(&pairs, vocab, 0, 1000, &mut rng).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn draw_budget_is_enforced() {
        let mut rng = StdRng::seed_from_u64(0);
        let result = TripletSampler::build_batch(&observed(), VOCAB, 2, 0, &mut rng);
        assert!(matches!(result, Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn ids_outside_vocabulary_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let pairs = vec![Triple::new(0, 0, 0), Triple::new(0, 0, 5)];
        let result = TripletSampler::build_batch(&pairs, VOCAB, 1, 10, &mut rng);
        assert!(matches!(result, Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn split_keeps_order() {
        let mut batch = TrainingBatch::default();
        for i in 0..5 {
            batch.push(Triple::new(i, i, 0), (i % 2) as f32);
        }
        let (train, validation) = batch.split_at(4);
        assert_eq!(train.activities, vec![0, 1, 2, 3]);
        assert_eq!(validation.activities, vec![4]);
        assert_eq!(validation.labels, vec![0.0]);
    }
}
