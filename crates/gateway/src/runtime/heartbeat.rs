//! Per-channel watchdog.
//!
//! After `reset` a fresh timer begins; expiry fires the health callback
//! (fire-and-forget) and re-arms while the monitor is running. `stop`
//! cancels the timer and drops further callbacks.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use ag_domain::trace::TraceEvent;

pub type HealthCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct HeartbeatMonitor {
    channel_id: String,
    timeout: Duration,
    callback: HealthCallback,
    running: Arc<AtomicBool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("channel_id", &self.channel_id)
            .field("timeout", &self.timeout)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl HeartbeatMonitor {
    pub fn new(channel_id: impl Into<String>, timeout: Duration, callback: HealthCallback) -> Self {
        Self {
            channel_id: channel_id.into(),
            timeout,
            callback,
            running: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.arm();
        tracing::info!(
            channel = %self.channel_id,
            timeout_secs = self.timeout.as_secs(),
            "heartbeat monitor started"
        );
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        tracing::info!(channel = %self.channel_id, "heartbeat monitor stopped");
    }

    /// Restart the watchdog window. Call on every inbound message.
    pub fn reset(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        self.arm();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn arm(&self) {
        let channel = self.channel_id.clone();
        let timeout = self.timeout;
        let callback = self.callback.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(timeout).await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                tracing::warn!(
                    channel = %channel,
                    timeout_secs = timeout.as_secs(),
                    "heartbeat timeout — no traffic seen"
                );
                TraceEvent::HeartbeatTimeout {
                    channel: channel.clone(),
                }
                .emit();

                // Fire-and-forget: a slow probe must not delay re-arming.
                let probe = (callback)(channel.clone());
                tokio::spawn(probe);
            }
        });

        *self.timer.lock() = Some(handle);
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback() -> (Arc<AtomicUsize>, HealthCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let cb: HealthCallback = Arc::new(move |_channel| {
            let count = count2.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });
        (count, cb)
    }

    #[tokio::test]
    async fn fires_after_timeout_and_rearms() {
        let (count, cb) = counting_callback();
        let monitor = HeartbeatMonitor::new("telegram", Duration::from_millis(30), cb);
        monitor.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(count.load(Ordering::SeqCst) >= 2, "timer should re-arm");
        monitor.stop();
    }

    #[tokio::test]
    async fn reset_defers_firing() {
        let (count, cb) = counting_callback();
        let monitor = HeartbeatMonitor::new("telegram", Duration::from_millis(60), cb);
        monitor.start();

        // Keep resetting inside the window: never fires.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            monitor.reset();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        monitor.stop();
    }

    #[tokio::test]
    async fn stop_drops_further_callbacks() {
        let (count, cb) = counting_callback();
        let monitor = HeartbeatMonitor::new("telegram", Duration::from_millis(30), cb);
        monitor.start();
        assert!(monitor.is_running());

        monitor.stop();
        assert!(!monitor.is_running());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (_count, cb) = counting_callback();
        let monitor = HeartbeatMonitor::new("telegram", Duration::from_secs(60), cb);
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
    }

    #[tokio::test]
    async fn reset_before_start_is_a_noop() {
        let (count, cb) = counting_callback();
        let monitor = HeartbeatMonitor::new("telegram", Duration::from_millis(20), cb);
        monitor.reset();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
