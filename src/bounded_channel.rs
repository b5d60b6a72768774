// SPDX-License-Identifier: Apache-2.0

//! Bounded MPSC channel shared by the blocking follower threads and the async
//! consumers. Senders on OS threads use [`BoundedSender::send_timeout`] so they
//! can notice a stop request while the channel is full.

use flume::{Receiver, SendTimeoutError as FlumeSendTimeoutError, Sender};
use std::fmt;
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

/// A timed out item is handed back to the caller
#[derive(Debug, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    Timeout(T),
    Disconnected,
}

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

impl<T> BoundedSender<T> {
    /// Wait for capacity, failing once the receiver is gone
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Blocking send from a non-async thread, giving up after `timeout`
    pub fn send_timeout(&self, item: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            FlumeSendTimeoutError::Timeout(item) => SendTimeoutError::Timeout(item),
            FlumeSendTimeoutError::Disconnected(_) => SendTimeoutError::Disconnected,
        })
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Next item, or `None` once every sender is dropped and the queue is empty
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, SendTimeoutError, bounded};
    use std::time::Duration;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn queued_items_survive_sender_drop() {
        let (tx, mut rx) = bounded(3);
        tx.send("a").await.unwrap();
        tx.send("b").await.unwrap();
        drop(tx);

        assert_eq!(Some("a"), rx.next().await);
        assert_eq!(Some("b"), rx.next().await);
        assert_eq!(None, rx.next().await);
    }

    #[tokio::test]
    async fn async_send_waits_for_capacity() {
        let (tx, mut rx) = bounded(1);
        assert_ok!(tx.send(1).await);

        let mut pending = spawn(async { tx.send(2).await });
        assert_pending!(pending.poll());

        assert_eq!(Some(1), rx.next().await);
        assert_ok!(assert_ready!(pending.poll()));
    }

    #[tokio::test]
    async fn async_send_fails_without_receiver() {
        let (tx, rx) = bounded::<u8>(1);
        drop(rx);
        assert_eq!(Err(SendError::Disconnected), tx.send(1).await);
    }

    #[test]
    fn blocking_send_times_out_when_full() {
        let (tx, rx) = bounded(1);

        assert_eq!(Ok(()), tx.send_timeout(1, Duration::from_millis(10)));
        assert_eq!(
            Err(SendTimeoutError::Timeout(2)),
            tx.send_timeout(2, Duration::from_millis(10))
        );

        drop(rx);
        assert_eq!(
            Err(SendTimeoutError::Disconnected),
            tx.send_timeout(3, Duration::from_millis(10))
        );
    }

    #[tokio::test]
    async fn blocking_sender_on_thread_feeds_async_receiver() {
        let (tx, mut rx) = bounded(2);
        let producer = std::thread::spawn(move || {
            for i in 0..10 {
                while let Err(SendTimeoutError::Timeout(_)) =
                    tx.send_timeout(i, Duration::from_millis(10))
                {}
            }
        });

        let mut received = Vec::new();
        while let Some(i) = rx.next().await {
            received.push(i);
        }
        producer.join().unwrap();
        assert_eq!((0..10).collect::<Vec<_>>(), received);
    }
}
