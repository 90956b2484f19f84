//! A worker pool with separate processing and polling task groups,
//! panic recovery, and a bounded internal channel.
//!
//! "Goroutines" map to `tokio::task`s here: each job and each polling
//! tick runs in its own spawned task so a panic inside `process`/`poll`
//! is caught via `JoinHandle` instead of killing the loop that drives
//! the channel.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{error, warn};

pub const PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait JobProcessor<M>: Send + Sync {
    async fn process(&self, message: M) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self, idx: usize) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub num_process: usize,
    pub num_polling: usize,
    pub polling_backoff: Duration,
    pub channel_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_process: 4,
            num_polling: 0,
            polling_backoff: Duration::from_secs(5),
            channel_capacity: 256,
        }
    }
}

pub struct WorkerPool<M> {
    job_tx: mpsc::Sender<M>,
    job_rx: Mutex<Option<mpsc::Receiver<M>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    config: WorkerPoolConfig,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<M: Send + 'static> WorkerPool<M> {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            job_tx,
            job_rx: Mutex::new(Some(job_rx)),
            shutdown_tx,
            shutdown_rx,
            config,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Enqueues a job; blocks (awaits) if the internal channel is full.
    pub async fn send_job(&self, message: M) -> anyhow::Result<()> {
        self.job_tx
            .send(message)
            .await
            .map_err(|_| anyhow::anyhow!("worker pool channel closed"))
    }

    /// Spawns `num_process` processing tasks and `num_polling` ticker
    /// tasks.
    pub async fn start(
        &self,
        processor: Arc<dyn JobProcessor<M>>,
        poller: Option<Arc<dyn Poller>>,
    ) {
        let mut handles = self.handles.lock().await;

        let job_rx = self
            .job_rx
            .lock()
            .await
            .take()
            .expect("worker pool started twice");
        let job_rx = Arc::new(Mutex::new(job_rx));

        for _ in 0..self.config.num_process.max(1) {
            let job_rx = job_rx.clone();
            let processor = processor.clone();
            let mut shutdown_rx = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let message = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.changed() => None,
                            m = rx.recv() => m,
                        }
                    };
                    let Some(message) = message else {
                        break;
                    };
                    run_guarded({
                        let processor = processor.clone();
                        move || async move { processor.process(message).await }
                    })
                    .await;
                }
            }));
        }

        if let Some(poller) = poller {
            for idx in 0..self.config.num_polling {
                let poller = poller.clone();
                let mut shutdown_rx = self.shutdown_rx.clone();
                let backoff = self.config.polling_backoff;
                handles.push(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(backoff);
                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.changed() => break,
                            _ = ticker.tick() => {
                                run_guarded({
                                    let poller = poller.clone();
                                    move || async move { poller.poll(idx).await }
                                })
                                .await;
                            }
                        }
                    }
                }));
            }
        }
    }

    /// Closes the quit channel and waits for every spawned task to
    /// drain and exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "worker pool task join failed");
            }
        }
    }
}

/// Runs a processing/polling future under the 30-second deadline,
/// logging timeouts and panics instead of propagating them.
async fn run_guarded<F, Fut>(make_fut: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(async move { timeout(PROCESS_TIMEOUT, make_fut()).await });
    match handle.await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "worker pool job returned an error"),
        Ok(Err(_elapsed)) => warn!("worker pool job exceeded the 30s processing deadline"),
        Err(join_err) => error!(error = %join_err, "worker pool job panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProcessor {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobProcessor<u32> for CountingProcessor {
        async fn process(&self, message: u32) -> anyhow::Result<()> {
            if message == 13 {
                panic!("unlucky job");
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn processes_jobs_and_survives_a_panicking_job() {
        let count = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(WorkerPoolConfig {
            num_process: 2,
            num_polling: 0,
            ..Default::default()
        });
        pool.start(
            Arc::new(CountingProcessor {
                count: count.clone(),
            }),
            None,
        )
        .await;

        for i in 0..20u32 {
            pool.send_job(i).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.stop().await;

        // All jobs but the panicking one (13) were processed.
        assert_eq!(count.load(Ordering::SeqCst), 19);
    }

    struct CountingPoller {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Poller for CountingPoller {
        async fn poll(&self, _idx: usize) -> anyhow::Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn polling_tasks_tick_on_schedule() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let pool: WorkerPool<()> = WorkerPool::new(WorkerPoolConfig {
            num_process: 0,
            num_polling: 2,
            polling_backoff: Duration::from_millis(20),
            ..Default::default()
        });
        pool.start(
            Arc::new(NoopProcessor),
            Some(Arc::new(CountingPoller { ticks: ticks.clone() })),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        pool.stop().await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    struct NoopProcessor;
    #[async_trait]
    impl JobProcessor<()> for NoopProcessor {
        async fn process(&self, _message: ()) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
