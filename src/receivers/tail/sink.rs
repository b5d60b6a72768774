// SPDX-License-Identifier: Apache-2.0

//! Destinations for records and per-file errors.
//!
//! A sink is shared by every consumer task of a manager, so it is the point
//! where records from different files are serialised.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::bounded_channel::BoundedSender;
use crate::receivers::tail::error::Error;
use crate::receivers::tail::record::{PATH_TAG, Record};

pub trait Sink: Send + Sync + 'static {
    /// Accept one record. May wait when the destination applies backpressure.
    fn add_record(&self, record: Record) -> impl Future<Output = ()> + Send;

    /// Accept a non-fatal error.
    fn add_error(&self, err: Error) -> impl Future<Output = ()> + Send;
}

/// Keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
    errors: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records whose `path` tag equals `path`, in arrival order
    pub fn records_for(&self, path: &str) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.tag(PATH_TAG) == Some(path))
            .cloned()
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Error messages in arrival order
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sink for MemorySink {
    async fn add_record(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    async fn add_error(&self, err: Error) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err.to_string());
    }
}

/// What a [`ChannelSink`] forwards
#[derive(Debug)]
pub enum SinkMessage {
    Record(Record),
    Error(Error),
}

/// Forwards records and errors over a bounded channel. A full channel
/// makes the consumer tasks wait.
#[derive(Clone)]
pub struct ChannelSink {
    tx: BoundedSender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(tx: BoundedSender<SinkMessage>) -> Self {
        Self { tx }
    }
}

impl Sink for ChannelSink {
    async fn add_record(&self, record: Record) {
        if self.tx.send(SinkMessage::Record(record)).await.is_err() {
            debug!("Sink receiver dropped, discarding record");
        }
    }

    async fn add_error(&self, err: Error) {
        if self.tx.send(SinkMessage::Error(err)).await.is_err() {
            debug!("Sink receiver dropped, discarding error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(path: &str) -> Record {
        Record::new("tail", BTreeMap::new(), BTreeMap::new(), Utc::now()).with_tag(PATH_TAG, path)
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.add_record(record("/a.log")).await;
        sink.add_record(record("/b.log")).await;
        sink.add_error(Error::Stopped).await;

        assert_eq!(sink.record_count(), 2);
        assert_eq!(sink.records_for("/a.log").len(), 1);
        assert_eq!(sink.errors(), vec!["tail manager is stopped".to_string()]);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (tx, mut rx) = bounded(4);
        let sink = ChannelSink::new(tx);
        sink.add_record(record("/a.log")).await;
        sink.add_error(Error::Stopped).await;

        assert!(matches!(rx.next().await, Some(SinkMessage::Record(_))));
        assert!(matches!(rx.next().await, Some(SinkMessage::Error(Error::Stopped))));
    }

    #[tokio::test]
    async fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let sink = ChannelSink::new(tx);
        sink.add_record(record("/a.log")).await;
    }
}
