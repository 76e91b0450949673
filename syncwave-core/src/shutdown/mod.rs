//! Graceful shutdown coordinator
//!
//! Components register through `ShutdownHandler::run`; `shutdown()` signals
//! them and waits until they have all returned or the timeout elapses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Graceful shutdown coordinator
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    active: AtomicUsize,
    drained: Notify,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: RwLock::new(ShutdownState::Running),
            shutdown_tx,
            active: AtomicUsize::new(0),
            drained: Notify::new(),
            timeout,
        }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Signal all components and wait for them to drain, bounded by the timeout.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                warn!("Shutdown already in progress");
                return;
            }
            *state = ShutdownState::ShuttingDown;
        }
        info!(active = self.active_components(), "Initiating graceful shutdown");

        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            info!("No components subscribed to shutdown");
        }

        let drained = tokio::time::timeout(self.timeout, async {
            loop {
                let notified = self.drained.notified();
                if self.active.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await;
        if drained.is_err() {
            error!(
                remaining = self.active_components(),
                "Shutdown timeout elapsed with components still running"
            );
        }

        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    /// Signal all components without waiting
    pub async fn shutdown_immediately(&self) {
        warn!("Initiating immediate shutdown");
        *self.state.write().await = ShutdownState::Shutdown;
        let _ = self.shutdown_tx.send(ShutdownSignal::Immediate);
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    pub fn active_components(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolves once a shutdown signal has been sent.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        if self.is_shutting_down().await {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Count a component as active until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, component_name: impl Into<String>) -> ComponentGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ComponentGuard {
            coordinator: Arc::clone(self),
            component_name: component_name.into(),
        }
    }

    fn leave(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Keeps a component counted as active
pub struct ComponentGuard {
    coordinator: Arc<ShutdownCoordinator>,
    component_name: String,
}

impl ComponentGuard {
    pub fn component_name(&self) -> &str {
        &self.component_name
    }
}

impl Drop for ComponentGuard {
    fn drop(&mut self) {
        debug!(component = %self.component_name, "component released");
        self.coordinator.leave();
    }
}

/// Runs one component under the coordinator
pub struct ShutdownHandler {
    coordinator: Arc<ShutdownCoordinator>,
    component_name: String,
}

impl ShutdownHandler {
    pub fn new(coordinator: Arc<ShutdownCoordinator>, component_name: impl Into<String>) -> Self {
        Self {
            coordinator,
            component_name: component_name.into(),
        }
    }

    /// Run `f` until it completes or a shutdown signal arrives. The component
    /// counts as active until this returns.
    pub async fn run<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let _guard = self.coordinator.register(self.component_name.clone());
        info!(component = %self.component_name, "Starting component");

        let mut shutdown_rx = self.coordinator.subscribe();

        tokio::select! {
            _ = f() => {
                info!(component = %self.component_name, "Component completed normally");
            }
            signal = shutdown_rx.recv() => {
                match signal {
                    Ok(ShutdownSignal::Graceful) => {
                        info!(component = %self.component_name, "Graceful shutdown signal received");
                    }
                    Ok(ShutdownSignal::Immediate) => {
                        warn!(component = %self.component_name, "Immediate shutdown signal received");
                    }
                    Err(e) => {
                        error!(component = %self.component_name, error = %e, "Shutdown channel error");
                    }
                }
            }
        }
    }
}

/// Install signal handlers for graceful shutdown
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        coordinator.shutdown().await;
    });
    Ok(())
}

/// Install signal handlers for graceful shutdown (Windows)
#[cfg(windows)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
            coordinator.shutdown().await;
        }
    });
    Ok(())
}
