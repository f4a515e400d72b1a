pub mod process;

pub use process::{AuthMessageProcessor, Collaborators};

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};

use crate::{
    config::{Config, NetworkConfig},
    repository::CrossChainMessageRepository,
    types::AuthMsgWrapper,
    Result,
};

/// Drives the processor over pending AMs with a bounded worker pool.
pub struct Relayer {
    processor: Arc<AuthMessageProcessor>,
    message_repository: Arc<dyn CrossChainMessageRepository>,
    batch_size: usize,
    worker_threads: usize,
    poll_interval: Duration,
}

impl Relayer {
    pub fn new(
        processor: Arc<AuthMessageProcessor>,
        message_repository: Arc<dyn CrossChainMessageRepository>,
        config: &NetworkConfig,
    ) -> Self {
        Self {
            processor,
            message_repository,
            batch_size: config.batch_size,
            worker_threads: config.worker_threads,
            poll_interval: config.poll_interval(),
        }
    }

    pub fn from_config(config: &Config, deps: Collaborators) -> Self {
        let message_repository = deps.message_repository.clone();
        let processor = AuthMessageProcessor::new(deps, config.process.clone(), config.network.rpc_timeout());
        Self::new(Arc::new(processor), message_repository, &config.network)
    }

    pub fn processor(&self) -> &Arc<AuthMessageProcessor> {
        &self.processor
    }

    /// Polls until `shutdown` turns true or its sender goes away. In-flight
    /// batches always run to completion.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting relayer: batch size {}, {} workers, poll every {:?}",
            self.batch_size, self.worker_threads, self.poll_interval
        );

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            match self.poll_once().await {
                Ok(0) => debug!("No pending auth messages"),
                Ok(n) => info!("Processed batch of {} auth messages", n),
                Err(e) => error!("Failed to fetch pending auth messages: {}", e),
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Relayer stopped");
        Ok(())
    }

    /// Fetches one batch and processes it. Returns the batch size.
    pub async fn poll_once(&self) -> Result<usize> {
        let batch = self
            .message_repository
            .peek_pending_auth_messages(self.batch_size)
            .await?;
        let n = batch.len();
        if n > 0 {
            self.process_batch(batch).await;
        }
        Ok(n)
    }

    /// Processes `batch` with at most `worker_threads` messages in flight and
    /// waits for all of them. Results come back in completion order.
    pub async fn process_batch(&self, batch: Vec<AuthMsgWrapper>) -> Vec<(u64, Result<bool>)> {
        let permits = Arc::new(Semaphore::new(self.worker_threads));
        let mut tasks = JoinSet::new();

        for mut am in batch {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Worker pool closed: {}", e);
                    break;
                }
            };
            let processor = self.processor.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = processor.process(&mut am).await;
                (am.auth_msg_id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((am_id, result)) => {
                    match &result {
                        Ok(true) => {}
                        Ok(false) => warn!("Auth message {} left for a later round", am_id),
                        Err(e) => error!("Failed to process auth message {}: {}", am_id, e),
                    }
                    results.push((am_id, result));
                }
                Err(e) => error!("Auth message worker panicked: {}", e),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::process::tests::{sdp_am, Mocks};
    use super::*;
    use crate::config::ProcessConfig;
    use crate::repository::MockCrossChainMessageRepository;
    use crate::Error;

    fn network_config(batch_size: usize, worker_threads: usize) -> NetworkConfig {
        NetworkConfig {
            batch_size,
            worker_threads,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    /// Processor for which AMs with an empty receiver domain go through cleanly.
    fn illegal_message_processor(expected: usize) -> Arc<AuthMessageProcessor> {
        let mut mocks = Mocks::new().expect_am_update(expected);
        mocks.repo.expect_put_sdp_message().times(expected).returning(|_| Ok(()));
        Arc::new(mocks.processor(ProcessConfig::default()))
    }

    #[tokio::test]
    async fn test_process_batch_handles_every_message() {
        let relayer = Relayer::new(
            illegal_message_processor(5),
            Arc::new(MockCrossChainMessageRepository::new()),
            &network_config(5, 2),
        );

        let batch = (1..=5).map(|id| sdp_am(id, "", true)).collect();
        let mut results = relayer.process_batch(batch).await;
        results.sort_by_key(|(id, _)| *id);

        assert_eq!(results.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert!(results.iter().all(|(_, r)| matches!(r, Ok(true))));
    }

    #[tokio::test]
    async fn test_failing_message_does_not_stop_batch() {
        let relayer = Relayer::new(
            illegal_message_processor(2),
            Arc::new(MockCrossChainMessageRepository::new()),
            &network_config(3, 1),
        );

        let mut broken = sdp_am(2, "", true);
        broken.auth_message.upper_protocol = 42;
        let batch = vec![sdp_am(1, "", true), broken, sdp_am(3, "", true)];

        let results = relayer.process_batch(batch).await;
        assert_eq!(results.len(), 3);
        let failed: Vec<_> = results.iter().filter(|(_, r)| r.is_err()).map(|(id, _)| *id).collect();
        assert_eq!(failed, vec![2]);
    }

    #[tokio::test]
    async fn test_poll_once_respects_batch_size() {
        let mut repo = MockCrossChainMessageRepository::new();
        repo.expect_peek_pending_auth_messages()
            .withf(|limit| *limit == 3)
            .times(1)
            .returning(|_| Ok(vec![sdp_am(1, "", true), sdp_am(2, "", true)]));
        let relayer = Relayer::new(illegal_message_processor(2), Arc::new(repo), &network_config(3, 4));

        assert_eq!(relayer.poll_once().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_poll_once_surfaces_repository_error() {
        let mut repo = MockCrossChainMessageRepository::new();
        repo.expect_peek_pending_auth_messages()
            .returning(|_| Err(Error::Repository("db down".to_string())));
        let relayer = Relayer::new(illegal_message_processor(0), Arc::new(repo), &network_config(3, 4));

        assert!(matches!(relayer.poll_once().await, Err(Error::Repository(_))));
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown() {
        let mut repo = MockCrossChainMessageRepository::new();
        repo.expect_peek_pending_auth_messages().returning(|_| Ok(vec![]));
        let relayer = Arc::new(Relayer::new(
            illegal_message_processor(0),
            Arc::new(repo),
            &network_config(8, 2),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let relayer = relayer.clone();
            async move { relayer.start(rx).await }
        });
        sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(stopped, Ok(Ok(Ok(())))));
    }
}
