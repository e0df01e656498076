//! Telemetry context
//!
//! Owns everything that used to be process-global in a mobile SDK: the logger
//! registry, the channel stores, the delivery coordinator and the fault
//! observer chain. Build one at startup with [`Telemetry::init`] (or the
//! builder) and call [`Telemetry::shutdown`] when done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::delivery::{
    Authorizer, DeliveryCoordinator, HttpTransport, NoAuthorization, SendOutcome, StaticToken,
    Transport,
};
use crate::error::{Result, TelemetryError};
use crate::fault::{install_panic_hook, FaultObserver, FaultObservers, FaultReport};
use crate::logger::{Logger, LoggerRegistry, Pipeline};
use crate::settings::Settings;
use crate::store::{Channel, ChannelStatus, ChannelStore};

/// Name of the logger fatal fault records are attributed to
pub const FAULT_LOGGER_NAME: &str = "uncaught";

/// Builder for a [`Telemetry`] context
pub struct TelemetryBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    capture_faults: bool,
    persist_settings: bool,
}

impl TelemetryBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport: None,
            authorizer: None,
            capture_faults: true,
            persist_settings: true,
        }
    }

    /// Use a custom transport instead of HTTP to `collector_url`
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom authorizer instead of the configured `api_token`
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Whether the first logger installs the panic hook (default: true)
    pub fn capture_faults(mut self, enabled: bool) -> Self {
        self.capture_faults = enabled;
        self
    }

    /// Whether runtime settings are read from and written to disk (default: true)
    pub fn persist_settings(mut self, enabled: bool) -> Self {
        self.persist_settings = enabled;
        self
    }

    pub fn build(self) -> Result<Arc<Telemetry>> {
        let config = self.config;
        let settings = Arc::new(if self.persist_settings {
            Settings::load(&config)
        } else {
            Settings::in_memory(&config)
        });
        let previous_run_faulted = settings.fault_pending();

        let logs = Arc::new(ChannelStore::open(
            Channel::Logs,
            &config.storage_dir,
            Arc::clone(&settings),
        )?);
        let analytics = Arc::new(ChannelStore::open(
            Channel::Analytics,
            &config.storage_dir,
            Arc::clone(&settings),
        )?);

        // Missing collector configuration only matters once something is sent
        let transport = match self.transport {
            Some(transport) => Ok(transport),
            None => HttpTransport::from_config(&config)
                .map(|t| Arc::new(t) as Arc<dyn Transport>)
                .map_err(|e| match e {
                    TelemetryError::ClientNotInitialized(reason) => reason,
                    other => other.to_string(),
                }),
        };
        let authorizer = self.authorizer.unwrap_or_else(|| match &config.api_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())) as Arc<dyn Authorizer>,
            None => Arc::new(NoAuthorization),
        });

        let delivery = transport.map(|transport| {
            DeliveryCoordinator::new(
                Arc::clone(&logs),
                Arc::clone(&analytics),
                transport,
                authorizer,
                Arc::clone(&settings),
            )
        });
        if let Err(reason) = &delivery {
            debug!(%reason, "Delivery disabled until the client is configured");
        }

        info!(
            storage_dir = %config.storage_dir.display(),
            previous_run_faulted,
            "Telemetry initialized"
        );

        Ok(Arc::new(Telemetry {
            pipeline: Arc::new(Pipeline::new(Arc::clone(&settings), logs, analytics)),
            settings,
            registry: LoggerRegistry::new(),
            faults: Arc::new(FaultObservers::new()),
            fault_hook: Once::new(),
            capture_faults: self.capture_faults,
            delivery,
            previous_run_faulted,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Process-wide telemetry context
pub struct Telemetry {
    settings: Arc<Settings>,
    pipeline: Arc<Pipeline>,
    registry: LoggerRegistry,
    faults: Arc<FaultObservers>,
    fault_hook: Once,
    capture_faults: bool,
    /// Coordinator, or why the client cannot send yet
    delivery: std::result::Result<DeliveryCoordinator, String>,
    previous_run_faulted: bool,
    closed: AtomicBool,
}

impl Telemetry {
    /// Build a context with the default HTTP transport and fault capture
    pub fn init(config: Config) -> Result<Arc<Self>> {
        TelemetryBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> TelemetryBuilder {
        TelemetryBuilder::new(config)
    }

    /// The logger for `name`, created on first use
    ///
    /// The first call installs fault capture for this context. After
    /// [`shutdown`](Self::shutdown) the returned logger captures nothing.
    pub fn logger(&self, name: &str) -> Arc<Logger> {
        self.install_fault_capture();
        self.registry
            .get_or_create(name, || Logger::new(name, Arc::clone(&self.pipeline)))
    }

    fn install_fault_capture(&self) {
        if !self.capture_faults {
            return;
        }
        self.fault_hook.call_once(|| {
            let pipeline = Arc::downgrade(&self.pipeline);
            self.faults
                .register(Arc::new(move |report: &FaultReport| {
                    if let Some(pipeline) = pipeline.upgrade() {
                        pipeline.capture_fault(FAULT_LOGGER_NAME, report);
                    }
                }));
            install_panic_hook(Arc::downgrade(&self.faults));
            debug!("Fault capture installed");
        });
    }

    /// Append an observer to the fault chain; runs after the ones already registered
    pub fn add_fault_observer(&self, observer: Arc<dyn FaultObserver>) {
        self.faults.register(observer);
    }

    /// Run the fault chain as if an uncaught fault had happened
    pub fn report_fault(&self, report: &FaultReport) {
        self.faults.notify(report);
    }

    /// Runtime settings (level filter, quota, channel switches)
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether the previous process recorded a fault that was never delivered
    pub fn previous_run_faulted(&self) -> bool {
        self.previous_run_faulted
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn coordinator(&self) -> Result<&DeliveryCoordinator> {
        if self.is_closed() {
            return Err(TelemetryError::ContextClosed);
        }
        self.delivery
            .as_ref()
            .map_err(|reason| TelemetryError::ClientNotInitialized(reason.clone()))
    }

    /// Deliver buffered log records
    pub async fn send(&self) -> Result<SendOutcome> {
        self.coordinator()?.send(Channel::Logs).await
    }

    /// Deliver buffered analytics records
    pub(crate) async fn send_analytics(&self) -> Result<SendOutcome> {
        self.coordinator()?.send(Channel::Analytics).await
    }

    /// Deliver log records in the background and report to `completion`
    pub fn send_with<F>(self: &Arc<Self>, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<SendOutcome>) + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move { completion(this.send().await) })
    }

    /// Deliver both channels concurrently
    pub async fn flush(&self) -> Vec<(Channel, Result<SendOutcome>)> {
        let (logs, analytics) = tokio::join!(self.send(), self.send_analytics());
        vec![(Channel::Logs, logs), (Channel::Analytics, analytics)]
    }

    /// File sizes and pending state of both channels
    pub fn status(&self) -> Vec<ChannelStatus> {
        Channel::ALL
            .iter()
            .map(|&channel| self.pipeline.store(channel).status())
            .collect()
    }

    /// Stop capturing, forget all loggers and detach fault observers
    ///
    /// Buffered files stay on disk for the next context; sends fail with
    /// [`TelemetryError::ContextClosed`] from now on.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pipeline.close();
        self.registry.clear();
        self.faults.clear();
        info!("Telemetry shut down");
    }
}
