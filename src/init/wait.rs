// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

/// Wait for the first task of the set to finish and return its result
pub async fn wait_for_any_task(tasks: &mut JoinSet<Result<(), BoxError>>) -> Result<(), BoxError> {
    match tasks.join_next().await {
        None => Ok(()),
        Some(res) => res?,
    }
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<Result<(), BoxError>>,
    timeout: Duration,
) -> Result<(), BoxError> {
    wait_for_tasks_with_deadline(tasks, Instant::now() + timeout).await
}

/// Wait for every task, returning the last task error. Tasks still running
/// at `stop_at` are left to be aborted when the set is dropped.
pub async fn wait_for_tasks_with_deadline(
    tasks: &mut JoinSet<Result<(), BoxError>>,
    stop_at: Instant,
) -> Result<(), BoxError> {
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                result = Err("timed out waiting for tasks to complete".into());
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => error!("Failed to join with task: {:?}", e),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_any_task_returns_error() {
        let mut tasks: JoinSet<Result<(), BoxError>> = JoinSet::new();
        tasks.spawn(async { Err("printer failed".into()) });
        let err = wait_for_any_task(&mut tasks).await.unwrap_err();
        assert_eq!(err.to_string(), "printer failed");
    }

    #[tokio::test]
    async fn test_wait_for_tasks_with_timeout() {
        let mut tasks: JoinSet<Result<(), BoxError>> = JoinSet::new();
        tasks.spawn(async { Ok(()) });
        assert!(
            wait_for_tasks_with_timeout(&mut tasks, Duration::from_secs(1))
                .await
                .is_ok()
        );

        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        assert!(
            wait_for_tasks_with_timeout(&mut tasks, Duration::from_millis(20))
                .await
                .is_err()
        );
    }
}
