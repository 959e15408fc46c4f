use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runs an async executor on a fixed period, but can be woken early via
/// [`Periodic::poke`] and stopped cleanly via [`Periodic::stop`].
///
/// Mirrors the `Periodic` helper in the system this proxy was modeled on:
/// a single background task sleeps for `period`, or less if poked, then
/// runs `executor` again. The executor's errors are logged and never
/// propagated — a single bad tick must not kill the loop.
pub struct Periodic<F> {
    name: String,
    period: Duration,
    executor: Arc<F>,
    wake: Arc<Notify>,
    stopping: Arc<std::sync::atomic::AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<F, Fut> Periodic<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, period: Duration, executor: F) -> Self {
        Self {
            name: name.into(),
            period,
            executor: Arc::new(executor),
            wake: Arc::new(Notify::new()),
            stopping: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Wakes the loop immediately instead of waiting out the rest of the
    /// current period. Used to trigger an out-of-band reconciliation pass.
    pub fn poke(&self) {
        self.wake.notify_one();
    }

    pub async fn start(&self) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return;
        }
        self.stopping.store(false, std::sync::atomic::Ordering::SeqCst);
        let name = self.name.clone();
        let period = self.period;
        let executor = self.executor.clone();
        let wake = self.wake.clone();
        let stopping = self.stopping.clone();
        let task = tokio::spawn(async move {
            loop {
                if stopping.load(std::sync::atomic::Ordering::SeqCst) {
                    debug!(target: "periodic", %name, "stopping");
                    return;
                }
                let started = tokio::time::Instant::now();
                if let Err(err) = (executor)().await {
                    warn!(target: "periodic", %name, error = %err, "tick failed");
                }
                if stopping.load(std::sync::atomic::Ordering::SeqCst) {
                    return;
                }
                let elapsed = started.elapsed();
                let remaining = period.saturating_sub(elapsed);
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
        });
        *guard = Some(task);
    }

    pub async fn stop(&self) {
        self.stopping.store(true, std::sync::atomic::Ordering::SeqCst);
        self.wake.notify_one();
        let task = self.handle.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_on_poke_without_waiting_out_the_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let periodic = Periodic::new("test", Duration::from_secs(3600), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        periodic.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        periodic.poke();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        periodic.stop().await;
    }

    #[tokio::test]
    async fn executor_errors_do_not_kill_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let periodic = Periodic::new("test-err", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }
        });
        periodic.start().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        periodic.stop().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
