use crate::error::{Error, Result};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use ndarray::Array1;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One row of the event log.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub user: String,
    pub task: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

impl Event {

    pub fn new(user: &str, task: &str, start_timestamp: DateTime<Utc>, end_timestamp: DateTime<Utc>) -> Event {
        Self {
            user: user.to_owned(),
            task: task.to_owned(),
            start_timestamp,
            end_timestamp,
        }
    }

    /// Elapsed seconds between start and end, negative if the pair is inverted.
    pub fn duration(&self) -> f64 {
        let elapsed = self.end_timestamp - self.start_timestamp;
        match elapsed.num_microseconds() {
            Some(us) => us as f64 / 1e6,
            None => elapsed.num_milliseconds() as f64 / 1e3,
        }
    }
}

// row layout of the input csv, timestamps are parsed afterwards
#[derive(Debug, Deserialize)]
struct RawEvent {
    user: String,
    start_timestamp: String,
    end_timestamp: String,
    task: String,
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {

    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(Error::Parse(format!("unrecognized timestamp '{}'", raw)))
}

#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {

    pub fn new(events: Vec<Event>) -> EventLog {
        Self { events }
    }

    /// Reads a headered csv with `user,start_timestamp,end_timestamp,task` columns.
    pub fn from_csv(file_path: &Path) -> Result<EventLog> {

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(file_path)?;

        let mut events = Vec::new();
        for record in reader.deserialize::<RawEvent>() {
            let raw = record?;
            events.push(Event {
                start_timestamp: parse_timestamp(&raw.start_timestamp)?,
                end_timestamp: parse_timestamp(&raw.end_timestamp)?,
                user: raw.user,
                task: raw.task,
            });
        }

        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn durations(&self) -> Array1<f64> {
        self.events.iter().map(Event::duration).collect()
    }
}

/// Bidirectional mapping between a categorical label and a dense id in `0..len`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Index {
    t2i: HashMap<String, usize>,
    i2t: HashMap<usize, String>,
}

impl Index {

    pub fn new() -> Index {
        Self::default()
    }

    /// Builds the index from a label -> id map, ids must be exactly `0..len`.
    pub fn from_t2i(t2i: HashMap<String, usize>) -> Result<Index> {

        let mut i2t: HashMap<usize, String> = HashMap::new();
        for (t, i) in &t2i {
            if *i >= t2i.len() {
                return Err(Error::Config(format!("id {} of '{}' is outside 0..{}", i, t, t2i.len())));
            }
            if let Some(other) = i2t.insert(*i, t.to_owned()) {
                return Err(Error::Config(format!("id {} is shared by '{}' and '{}'", i, other, t)));
            }
        }

        Ok(Self { t2i, i2t })
    }

    /// Ids are handed out in first-occurrence order, repeated labels are skipped.
    pub fn from_labels<I, S>(labels: I) -> Index
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Index::new();
        for label in labels {
            index.insert(label.as_ref());
        }
        index
    }

    pub fn insert(&mut self, label: &str) -> usize {
        if let Some(i) = self.t2i.get(label) {
            return *i;
        }
        let i = self.t2i.len();
        self.t2i.insert(label.to_owned(), i);
        self.i2t.insert(i, label.to_owned());
        i
    }

    pub fn id(&self, label: &str) -> Option<usize> {
        self.t2i.get(label).copied()
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.i2t.get(&id).map(String::as_str)
    }

    /// Like `id` but a missing label is an error naming the index `kind`.
    pub fn lookup(&self, kind: &'static str, label: &str) -> Result<usize> {
        self.id(label).ok_or_else(|| Error::Lookup { kind, key: label.to_owned() })
    }

    pub fn len(&self) -> usize {
        self.t2i.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t2i.is_empty()
    }

    /// (id, label) pairs in ascending id order.
    pub fn iter_by_id(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        (0..self.i2t.len()).filter_map(move |i| self.label(i).map(|t| (i, t)))
    }

    pub fn t2i(&self) -> &HashMap<String, usize> {
        &self.t2i
    }
}
