use crate::error::{Error, Result};
use crate::events::{EventLog, Index};

use ndarray::Array1;
use ndarray_stats::QuantileExt;
use tracing::{debug, info, warn};


/// Quantile discretization of the event durations of one log.
#[derive(Clone, Debug)]
pub struct TimeBuckets {
    pub n_bins: usize,           // number of bins asked for (at least 1)
    pub edges: Vec<f64>,         // distinct quantile edges, ascending
    pub durations: Array1<f64>,  // seconds, one per event
    pub labels: Vec<String>,     // bucket ordinal as string, one per event
    pub time_index: Index,       // realized labels, first-occurrence order
}

impl TimeBuckets {

    /// Number of buckets that actually received events.
    pub fn n_realized(&self) -> usize {
        self.time_index.len()
    }

    /// Per event time id, parallel to the log rows.
    pub fn time_ids(&self) -> Result<Vec<usize>> {
        self.labels.iter().map(|label| self.time_index.lookup("time bucket", label)).collect()
    }
}

pub struct TimeBucketizer {}

impl TimeBucketizer {

    fn count_bins(durations: &Array1<f64>) -> Result<usize> {

        // n_bins = floor((max - min) / mean), never below one bin
        let max = *durations.max().map_err(|e| Error::DegenerateInput(format!("durations: {}", e)))?;
        let min = *durations.min().map_err(|e| Error::DegenerateInput(format!("durations: {}", e)))?;
        let mean = durations.mean().ok_or_else(|| Error::DegenerateInput("no durations to bucket".to_string()))?;

        if !max.is_finite() || !min.is_finite() || !mean.is_finite() {
            return Err(Error::DegenerateInput("durations are not finite".to_string()));
        }

        if mean <= 0.0 || max == min {
            warn!("durations have no spread (mean {}, range {}), using a single interval", mean, max - min);
            return Ok(1);
        }

        let n_bins = ((max - min) / mean).floor();
        if n_bins < 1.0 {
            return Ok(1);
        }

        // more intervals than events only adds duplicate edges
        let n_events = durations.len();
        if n_bins > n_events as f64 {
            warn!("{} intervals for {} events, capping at {}", n_bins, n_events, n_events);
            return Ok(n_events);
        }
        Ok(n_bins as usize)
    }

    fn quantile_edges(durations: &Array1<f64>, n_bins: usize) -> Vec<f64> {

        // linear interpolation between closest ranks, equal edges collapse into one
        let mut sorted = durations.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let last = (sorted.len() - 1) as f64;

        let mut edges: Vec<f64> = (0..=n_bins).map(|i| {
            let position = last * i as f64 / n_bins as f64;
            let lo = position.floor() as usize;
            let hi = position.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (position - lo as f64)
        }).collect();
        edges.dedup();
        edges
    }

    fn assign(duration: f64, edges: &[f64]) -> usize {

        // intervals are (e_i, e_i+1], the first one also holds its lower edge
        if edges.len() < 2 {
            return 0;
        }
        let n_intervals = edges.len() - 1;
        edges[1..].partition_point(|edge| *edge < duration).min(n_intervals - 1)
    }

    pub fn run(log: &EventLog) -> Result<TimeBuckets> {

        if log.is_empty() {
            return Err(Error::DegenerateInput("event log is empty".to_string()));
        }

        let durations = log.durations();
        let n_bins = TimeBucketizer::count_bins(&durations)?;
        info!("the number of intervals is: {}", n_bins);

        let edges = TimeBucketizer::quantile_edges(&durations, n_bins);
        debug!("quantile edges: {:?}", edges);

        let labels: Vec<String> = durations
            .iter()
            .map(|d| TimeBucketizer::assign(*d, &edges).to_string())
            .collect();
        let time_index = Index::from_labels(&labels);

        if time_index.len() < n_bins {
            info!("{} of {} intervals realized after collapsing duplicate edges", time_index.len(), n_bins);
        }

        Ok(TimeBuckets { n_bins, edges, durations, labels, time_index })
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::events::{parse_timestamp, Event};
    use chrono::Duration;

    fn log_with_durations(seconds: &[i64]) -> EventLog {
        let start = parse_timestamp("2021-06-01 00:00:00").unwrap();
        let events = seconds.iter().enumerate().map(|(i, s)| {
            let begin = start + Duration::hours(i as i64);
            Event::new(&format!("u{}", i % 2), &format!("a{}", i % 2), begin, begin + Duration::seconds(*s))
        }).collect();
        EventLog::new(events)
    }

    #[test]
    fn short_range_collapses_to_one_bucket() {
        // mean 17.5, range 30 -> one interval
        let buckets = TimeBucketizer::run(&log_with_durations(&[10, 10, 10, 40])).unwrap();
        assert_eq!(buckets.n_bins, 1);
        assert_eq!(buckets.n_realized(), 1);
        assert!(buckets.labels.iter().all(|l| l == "0"));
        assert_eq!(buckets.time_ids().unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn equal_durations_are_guarded() {
        let buckets = TimeBucketizer::run(&log_with_durations(&[5, 5, 5])).unwrap();
        assert_eq!(buckets.n_bins, 1);
        assert_eq!(buckets.time_index.len(), 1);

        let zeros = TimeBucketizer::run(&log_with_durations(&[0, 0])).unwrap();
        assert_eq!(zeros.n_bins, 1);
        assert_eq!(zeros.labels, vec!["0", "0"]);
    }

    #[test]
    fn quantile_buckets_follow_ranks() {
        // mean 9.6, range 60 -> six intervals
        let buckets = TimeBucketizer::run(&log_with_durations(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 60])).unwrap();
        assert_eq!(buckets.n_bins, 6);
        assert_eq!(buckets.edges, vec![0.0, 1.5, 3.0, 4.5, 6.0, 7.5, 60.0]);
        assert_eq!(buckets.labels, vec!["0", "0", "1", "1", "2", "3", "3", "4", "5", "5"]);
        assert_eq!(buckets.n_realized(), 6);
    }

    #[test]
    fn time_index_in_first_occurrence_order() {
        let buckets = TimeBucketizer::run(&log_with_durations(&[60, 8, 7, 6, 5, 4, 3, 2, 1, 0])).unwrap();
        assert_eq!(buckets.time_index.id("5"), Some(0));
        assert_eq!(buckets.time_index.id("4"), Some(1));
        let ids = buckets.time_ids().unwrap();
        assert_eq!(&ids[..3], &[0, 0, 1]);
    }

    #[test]
    fn duplicate_edges_collapse() {
        // mean 1.9, range 9 -> four intervals asked, most edges coincide
        let buckets = TimeBucketizer::run(&log_with_durations(&[1, 1, 1, 1, 1, 1, 1, 1, 1, 10])).unwrap();
        assert_eq!(buckets.n_bins, 4);
        assert!(buckets.n_realized() < buckets.n_bins);
        assert_eq!(buckets.edges.len(), buckets.n_realized() + 1);
    }

    #[test]
    fn mixed_sign_durations_cap_at_event_count() {
        // mean 0.5, range 1001 would ask for 2002 intervals
        let buckets = TimeBucketizer::run(&log_with_durations(&[-500, 501])).unwrap();
        assert_eq!(buckets.n_bins, 2);
        assert_eq!(buckets.edges, vec![-500.0, 0.5, 501.0]);
        assert_eq!(buckets.labels, vec!["0", "1"]);

        let wide = TimeBucketizer::run(&log_with_durations(&[-500_000, 500_000, 1])).unwrap();
        assert_eq!(wide.n_bins, 3);
        assert!(wide.edges.len() <= 4);
    }

    #[test]
    fn empty_log_is_degenerate() {
        assert!(matches!(TimeBucketizer::run(&EventLog::default()), Err(Error::DegenerateInput(_))));
    }
}
