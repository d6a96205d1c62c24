//! PeriodicTask — a named action run on a fixed interval until stopped.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Future returned by one tick of a periodic action.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Handle to a running periodic task.
///
/// Dropping the handle without calling [`PeriodicTask::stop`] also ends the
/// loop, at its next wake-up.
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `action` every `interval`, first after one full interval.
    ///
    /// Each tick runs in its own tokio task so a panic is caught and
    /// logged instead of killing the loop.
    pub fn start<F>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        let name = name.into();
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(name.clone(), interval, action, rx));
        Self {
            name,
            interval,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to exit and wait for it. A tick already in flight
    /// finishes first.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = %self.name, error = %e, "periodic task ended abnormally");
            }
        }
    }
}

async fn run_loop<F>(name: String, interval: Duration, action: F, mut shutdown: watch::Receiver<bool>)
where
    F: Fn() -> TaskFuture + Send + Sync + 'static,
{
    info!(task = %name, interval_secs = interval.as_secs(), "periodic task started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match tokio::spawn(action()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(task = %name, error = %e, "periodic task tick failed"),
                    Err(e) if e.is_panic() => error!(task = %name, "periodic task tick panicked"),
                    Err(e) => warn!(task = %name, error = %e, "periodic task tick cancelled"),
                }
            }
            _ = shutdown.changed() => {
                info!(task = %name, "periodic task stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(counter: Arc<AtomicUsize>) -> impl Fn() -> TaskFuture + Send + Sync + 'static {
        move || -> TaskFuture {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = PeriodicTask::start("count", Duration::from_secs(10), counting(counter.clone()));
        assert_eq!(task.name(), "count");
        assert!(task.is_running());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        task.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_and_panics_do_not_stop_the_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ticks = counter.clone();
        let task = PeriodicTask::start("flaky", Duration::from_secs(1), move || -> TaskFuture {
            let ticks = ticks.clone();
            Box::pin(async move {
                match ticks.fetch_add(1, Ordering::SeqCst) {
                    0 => panic!("first tick explodes"),
                    1 => anyhow::bail!("second tick fails"),
                    _ => Ok(()),
                }
            })
        });

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert!(counter.load(Ordering::SeqCst) >= 4);
        assert!(task.is_running());
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_are_independent() {
        let fast = Arc::new(AtomicUsize::new(0));
        let slow = Arc::new(AtomicUsize::new(0));
        let a = PeriodicTask::start("fast", Duration::from_secs(1), counting(fast.clone()));
        let b = PeriodicTask::start("slow", Duration::from_secs(5), counting(slow.clone()));

        tokio::time::sleep(Duration::from_millis(5500)).await;
        a.stop().await;
        assert_eq!(fast.load(Ordering::SeqCst), 5);
        assert_eq!(slow.load(Ordering::SeqCst), 1);
        assert!(b.is_running());
        b.stop().await;
    }
}
