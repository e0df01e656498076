//! Uncaught fault capture
//!
//! Observers are kept in an explicit ordered list owned by the telemetry
//! context. The process panic hook only holds a weak reference to that list
//! and always hands the panic on to whatever hook was installed before it, so
//! a context that has been dropped or shut down stops observing without
//! unhooking anything.

use std::panic::PanicHookInfo;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use serde_json::json;

use crate::record::Metadata;

/// Details of an uncaught fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub message: String,
    /// `file:line:column` of the fault, when known
    pub location: Option<String>,
    pub thread: Option<String>,
}

impl FaultReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            thread: None,
        }
    }

    fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        Self {
            message,
            location: info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
            thread: std::thread::current().name().map(str::to_string),
        }
    }

    /// Metadata attached to the fatal record
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(location) = &self.location {
            metadata.insert("location".to_string(), json!(location));
        }
        if let Some(thread) = &self.thread {
            metadata.insert("thread".to_string(), json!(thread));
        }
        metadata
    }
}

/// Something that wants to hear about uncaught faults
///
/// Called synchronously on the faulting thread before the previous panic hook
/// runs; keep it short and never panic inside it.
pub trait FaultObserver: Send + Sync {
    fn on_fault(&self, report: &FaultReport);
}

impl<F> FaultObserver for F
where
    F: Fn(&FaultReport) + Send + Sync,
{
    fn on_fault(&self, report: &FaultReport) {
        self(report)
    }
}

/// Ordered chain of fault observers
#[derive(Default)]
pub struct FaultObservers {
    observers: RwLock<Vec<Arc<dyn FaultObserver>>>,
}

impl FaultObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer to the end of the chain
    pub fn register(&self, observer: Arc<dyn FaultObserver>) {
        self.write().push(observer);
    }

    /// Invoke every observer in registration order
    pub fn notify(&self, report: &FaultReport) {
        // Clone out so an observer can register others without deadlocking
        let observers = self.read().clone();
        for observer in observers {
            observer.on_fault(report);
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // A poisoned lock still guards a valid list
    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn FaultObserver>>> {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn FaultObserver>>> {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for FaultObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultObservers")
            .field("observers", &self.len())
            .finish()
    }
}

/// Chain a panic hook that reports to `observers` in front of the current hook
pub fn install_panic_hook(observers: Weak<FaultObservers>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(observers) = observers.upgrade() {
            observers.notify(&FaultReport::from_panic(info));
        }
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_observers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observers = FaultObservers::new();
        for name in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            observers.register(Arc::new(move |report: &FaultReport| {
                seen.lock().unwrap().push(format!("{name}:{}", report.message));
            }));
        }

        observers.notify(&FaultReport::new("boom"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:boom", "second:boom", "third:boom"]
        );
    }

    #[test]
    fn test_clear_detaches_observers() {
        let observers = FaultObservers::new();
        observers.register(Arc::new(|_: &FaultReport| panic!("must not run")));
        assert_eq!(observers.len(), 1);

        observers.clear();
        assert!(observers.is_empty());
        observers.notify(&FaultReport::new("ignored"));
    }

    #[test]
    fn test_poisoned_chain_still_registers_and_clears() {
        let observers = Arc::new(FaultObservers::new());
        let poisoner = Arc::clone(&observers);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.observers.write().unwrap();
            panic!("poison the observer lock");
        })
        .join();
        assert!(observers.observers.is_poisoned());

        let seen = Arc::new(Mutex::new(0));
        {
            let seen = Arc::clone(&seen);
            observers.register(Arc::new(move |_: &FaultReport| {
                *seen.lock().unwrap() += 1;
            }));
        }
        assert_eq!(observers.len(), 1);
        observers.notify(&FaultReport::new("after poison"));
        assert_eq!(*seen.lock().unwrap(), 1);

        observers.clear();
        assert!(observers.is_empty());
    }

    #[test]
    fn test_metadata_includes_location_and_thread() {
        let report = FaultReport {
            message: "index out of bounds".to_string(),
            location: Some("src/main.rs:10:5".to_string()),
            thread: Some("worker-1".to_string()),
        };
        let metadata = report.metadata();
        assert_eq!(metadata["location"], json!("src/main.rs:10:5"));
        assert_eq!(metadata["thread"], json!("worker-1"));
        assert!(FaultReport::new("x").metadata().is_empty());
    }

    #[test]
    fn test_panic_hook_reports_and_chains() {
        let seen = Arc::new(Mutex::new(Vec::<FaultReport>::new()));
        let observers = Arc::new(FaultObservers::new());
        {
            let seen = Arc::clone(&seen);
            observers.register(Arc::new(move |report: &FaultReport| {
                if report.message.starts_with("fault-hook-test") {
                    seen.lock().unwrap().push(report.clone());
                }
            }));
        }
        install_panic_hook(Arc::downgrade(&observers));

        let result = std::thread::Builder::new()
            .name("faulty".to_string())
            .spawn(|| panic!("fault-hook-test {}", 42))
            .unwrap()
            .join();
        assert!(result.is_err());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "fault-hook-test 42");
        assert_eq!(seen[0].thread.as_deref(), Some("faulty"));
        assert!(seen[0].location.as_deref().unwrap().contains("fault.rs"));
    }
}
