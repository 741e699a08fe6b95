//! Fault injection.
//!
//! A [`FaultInjector`] performs the destructive action that the fault
//! window brackets. It is invoked by the orchestrator only; pools and
//! drivers never see it.

use async_trait::async_trait;
use faultline_types::FaultError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::sink::{HarnessEvent, ReportSink};
use crate::storage::InMemoryStore;
use crate::window::FaultWindow;

/// What an injection did, with whatever `restore` needs to undo it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Affected component (pod name, node, disk).
    pub component: String,
    /// Injector-specific details.
    pub metadata: BTreeMap<String, String>,
}

impl FaultRecord {
    /// Record for `component` with no metadata.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one metadata entry.
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Destroys and restores a component of the system under test.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    /// Name used in logs and events.
    fn name(&self) -> &str;

    /// Perform the destructive action. Returns once the system has reached
    /// its degraded steady state.
    async fn inject(&self) -> std::result::Result<FaultRecord, FaultError>;

    /// Undo a previous injection.
    async fn restore(&self, record: &FaultRecord) -> std::result::Result<(), FaultError>;
}

/// Simulated pod deletion against an [`InMemoryStore`].
///
/// While the pod terminates every request fails; afterwards the store
/// serves requests again with the pod listed as degraded.
#[derive(Debug, Clone)]
pub struct SimulatedPodFailure {
    store: InMemoryStore,
    component: String,
    transition: Duration,
}

impl SimulatedPodFailure {
    /// Fail `component` of `store` for `transition`.
    pub fn new(store: InMemoryStore, component: &str, transition: Duration) -> Self {
        Self {
            store,
            component: component.to_string(),
            transition,
        }
    }
}

#[async_trait]
impl FaultInjector for SimulatedPodFailure {
    fn name(&self) -> &str {
        "simulated-pod-failure"
    }

    async fn inject(&self) -> std::result::Result<FaultRecord, FaultError> {
        if self.store.degraded_components().contains(&self.component) {
            return Err(FaultError::InjectFailed {
                component: self.component.clone(),
                reason: "already degraded".to_string(),
            });
        }

        tracing::info!("Deleting {}", self.component);
        self.store
            .disrupt(&format!("{} terminating", self.component));
        tokio::time::sleep(self.transition).await;
        self.store.end_disruption();
        self.store.mark_degraded(&self.component);
        tracing::info!("{} deleted; store degraded", self.component);

        Ok(FaultRecord::new(self.component.as_str())
            .with("transition_ms", self.transition.as_millis()))
    }

    async fn restore(&self, record: &FaultRecord) -> std::result::Result<(), FaultError> {
        if self.store.restore_component(&record.component) {
            tracing::info!("{} restored", record.component);
            Ok(())
        } else {
            Err(FaultError::RestoreFailed {
                component: record.component.clone(),
                reason: "component is not degraded".to_string(),
            })
        }
    }
}

/// Open `window`, run `injector`, close `window`.
///
/// The window is closed even if the injection fails, so drivers stopping on
/// window close always stop.
///
/// # Errors
///
/// Window usage errors, or the injector's error wrapped in
/// `HarnessError::Fault` once the window has been closed.
pub async fn run_fault_window(
    window: &FaultWindow,
    injector: &dyn FaultInjector,
    sink: &dyn ReportSink,
) -> Result<FaultRecord> {
    window.signal_open()?;
    sink.emit(&HarnessEvent::WindowOpened {
        at_ms: window.opened_at().unwrap_or_default().as_millis() as u64,
    });

    let injected = injector.inject().await;
    match &injected {
        Ok(record) => sink.emit(&HarnessEvent::FaultInjected {
            component: record.component.clone(),
        }),
        Err(e) => sink.emit(&HarnessEvent::FaultFailed {
            injector: injector.name().to_string(),
            reason: e.to_string(),
        }),
    }

    window.signal_close()?;
    sink.emit(&HarnessEvent::WindowClosed {
        at_ms: window.closed_at().unwrap_or_default().as_millis() as u64,
    });

    Ok(injected?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use crate::sink::MemorySink;
    use faultline_types::WindowPhase;

    struct FailingInjector;

    #[async_trait]
    impl FaultInjector for FailingInjector {
        fn name(&self) -> &str {
            "failing"
        }

        async fn inject(&self) -> std::result::Result<FaultRecord, FaultError> {
            Err(FaultError::InjectFailed {
                component: "data-pod-9".into(),
                reason: "pod not found".into(),
            })
        }

        async fn restore(&self, _record: &FaultRecord) -> std::result::Result<(), FaultError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pod_failure_disrupts_then_degrades() {
        let store = InMemoryStore::new();
        let injector = SimulatedPodFailure::new(store.clone(), "data-pod-0", Duration::from_millis(30));

        let observer = store.clone();
        let inject = tokio::spawn(async move { injector.inject().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(observer.is_disrupted());

        let record = inject.await.unwrap().unwrap();
        assert_eq!(record.component, "data-pod-0");
        assert_eq!(record.metadata.get("transition_ms").map(String::as_str), Some("30"));
        assert!(!store.is_disrupted());
        assert_eq!(store.degraded_components(), vec!["data-pod-0".to_string()]);
    }

    #[tokio::test]
    async fn restore_clears_degraded_component() {
        let store = InMemoryStore::new();
        let injector = SimulatedPodFailure::new(store.clone(), "data-pod-1", Duration::ZERO);

        let record = injector.inject().await.unwrap();
        injector.restore(&record).await.unwrap();
        assert!(store.degraded_components().is_empty());
        assert!(matches!(
            injector.restore(&record).await,
            Err(FaultError::RestoreFailed { .. })
        ));
    }

    #[tokio::test]
    async fn double_injection_is_refused() {
        let store = InMemoryStore::new();
        let injector = SimulatedPodFailure::new(store, "data-pod-2", Duration::ZERO);
        injector.inject().await.unwrap();
        assert!(matches!(
            injector.inject().await,
            Err(FaultError::InjectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn fault_window_brackets_injection() {
        let store = InMemoryStore::new();
        let injector = SimulatedPodFailure::new(store, "data-pod-0", Duration::from_millis(5));
        let window = FaultWindow::new();
        let sink = MemorySink::new();

        let record = run_fault_window(&window, &injector, &sink).await.unwrap();
        assert_eq!(record.component, "data-pod-0");
        assert_eq!(window.phase(), WindowPhase::PostFault);

        let bounds = window.bounds().unwrap();
        assert!(bounds.closed_at.unwrap() - bounds.opened_at >= Duration::from_millis(5));

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], HarnessEvent::WindowOpened { .. }));
        assert!(matches!(events[1], HarnessEvent::FaultInjected { .. }));
        assert!(matches!(events[2], HarnessEvent::WindowClosed { .. }));
    }

    #[tokio::test]
    async fn failed_injection_still_closes_window() {
        let window = FaultWindow::new();
        let sink = MemorySink::new();

        let err = run_fault_window(&window, &FailingInjector, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Fault(FaultError::InjectFailed { .. })));
        assert_eq!(window.phase(), WindowPhase::PostFault);
        assert!(matches!(
            sink.events()[1],
            HarnessEvent::FaultFailed { .. }
        ));
    }

    #[tokio::test]
    async fn reused_window_is_usage_error() {
        let window = FaultWindow::new();
        window.signal_open().unwrap();
        let sink = MemorySink::new();

        let err = run_fault_window(&window, &FailingInjector, &sink)
            .await
            .unwrap_err();
        assert!(err.is_usage_error());
        assert!(sink.events().is_empty());
    }
}
