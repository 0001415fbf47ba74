//! The initialization gate.
//!
//! A freshly started gateway refuses API traffic until a caller sends the
//! [`INIT_ACTION`] request. That request carries the settings of the
//! signing validator and proxy clients (see [`settings`]). Once they are
//! applied the gate opens for good and the registered post-init callbacks
//! run once, in registration order, off the request path. They are handed
//! back as [`PendingCallbacks`] and start only once the initialization
//! response has been written (or abandoned).
//!
//! ```text
//!              ┌─────────┐  APIBox.Init  ┌──────────────┐  settings applied  ┌─────────────┐
//!  start ────► │ Waiting │ ────────────► │ Initializing │ ─────────────────► │ Initialized │
//!              └─────────┘               └──────────────┘                    └─────────────┘
//!               rejects other actions     rejects other actions               passes everything
//! ```
//!
//! A disabled gate passes everything from the start.
//!
//! # Callback failures
//!
//! Callbacks run on a blocking task tracked by the gate's `TaskTracker`. A
//! panicking callback is caught, logged at `error` level and counted; the
//! remaining callbacks still run. Nothing is reported back to the caller of
//! the initialization action, which has already received its response.

pub mod settings;

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::GateError;
use crate::metrics;
use crate::targets::{APIPROXY, APISIGN, MiddlewareRegistry};

use self::settings::{ApplyReport, RoutedSettings, apply_proxy_settings, apply_sign_settings, route_params};

/// Action name of the initialization request.
pub const INIT_ACTION: &str = "APIBox.Init";

/// Procedure run once after initialization.
pub type InitCallback = Box<dyn FnOnce() + Send + 'static>;

const WAITING: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;

/// What the gate does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Hand the request to the rest of the pipeline.
    PassThrough,
    /// Run the initialization action.
    HandleInit,
    /// Answer with `ModuleInitWaiting`.
    Reject,
}

impl Decision {
    /// Label used for logging and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::PassThrough => "pass_through",
            Decision::HandleInit => "init",
            Decision::Reject => "reject",
        }
    }
}

/// Settings accounting of one initialization.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    pub sign: ApplyReport,
    pub proxy: ApplyReport,
    /// Callbacks handed to the background task
    pub callbacks: usize,
}

/// Result of the initialization that opened the gate.
#[derive(Debug)]
pub struct Initialized {
    pub report: InitReport,
    /// Callbacks to start once the caller has been answered
    pub callbacks: PendingCallbacks,
}

/// Post-init callbacks taken from the gate but not started yet.
///
/// They start on [`dispatch`](Self::dispatch) or when this value is
/// dropped, whichever comes first, and never more than once.
#[must_use = "callbacks start when this is dispatched or dropped"]
pub struct PendingCallbacks {
    callbacks: Vec<InitCallback>,
    tasks: TaskTracker,
}

impl PendingCallbacks {
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Start the callbacks on a background task.
    pub fn dispatch(mut self) {
        self.start();
    }

    fn start(&mut self) {
        let callbacks = std::mem::take(&mut self.callbacks);
        dispatch_callbacks(&self.tasks, callbacks);
    }
}

impl Drop for PendingCallbacks {
    fn drop(&mut self) {
        self.start();
    }
}

impl std::fmt::Debug for PendingCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallbacks")
            .field("len", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

/// Gate blocking API traffic until the initialization action has run.
///
/// Construct once at startup and share it behind an `Arc` between the
/// [`InitGateLayer`](crate::middleware::InitGateLayer) and any component that
/// registers callbacks.
pub struct InitGate {
    disabled: bool,
    phase: AtomicU8,
    /// `None` once the initialization has taken the list
    callbacks: Mutex<Option<Vec<InitCallback>>>,
    middlewares: MiddlewareRegistry,
    tasks: TaskTracker,
}

impl InitGate {
    /// Create a gate configuring the middlewares in `middlewares`.
    pub fn new(disabled: bool, middlewares: MiddlewareRegistry) -> Self {
        metrics::set_gate_open(disabled);
        Self {
            disabled,
            phase: AtomicU8::new(WAITING),
            callbacks: Mutex::new(Some(Vec::new())),
            middlewares,
            tasks: TaskTracker::new(),
        }
    }

    /// Create a gate honoring `apiinit.disabled` from `config`.
    pub fn from_config(config: &Config, middlewares: MiddlewareRegistry) -> Self {
        if config.init_disabled {
            info!("Initialization gate disabled (APIINIT_DISABLED=true)");
        }
        Self::new(config.init_disabled, middlewares)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_initialized(&self) -> bool {
        self.phase.load(Ordering::Acquire) == INITIALIZED
    }

    /// True when every request passes without inspection.
    pub fn is_open(&self) -> bool {
        self.disabled || self.is_initialized()
    }

    pub fn middlewares(&self) -> &MiddlewareRegistry {
        &self.middlewares
    }

    /// Register `callback` to run once after initialization.
    ///
    /// Callbacks run in registration order on a background task.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::AlreadyInitialized`] once an initialization has
    /// taken the callback list; `callback` is dropped without running.
    pub fn add_callback<F>(&self, callback: F) -> Result<(), GateError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        match callbacks.as_mut() {
            Some(list) => {
                list.push(Box::new(callback));
                Ok(())
            }
            None => {
                warn!("Post-init callback registered after initialization, dropping it");
                Err(GateError::AlreadyInitialized)
            }
        }
    }

    /// Decide what to do with a request carrying `action`.
    pub fn decide(&self, action: Option<&str>) -> Decision {
        if self.is_open() {
            Decision::PassThrough
        } else if action == Some(INIT_ACTION) {
            Decision::HandleInit
        } else {
            Decision::Reject
        }
    }

    /// Run the initialization action with the request's parameters.
    ///
    /// Applies the `apisign.*` and `apiproxy.*` settings best-effort, opens
    /// the gate and takes the callbacks. Only the first caller does any of
    /// this. The callbacks are handed back unstarted so the caller can
    /// answer the request first; dropping them starts them.
    ///
    /// # Errors
    ///
    /// - [`GateError::InitInProgress`] while another call is applying settings
    /// - [`GateError::AlreadyInitialized`] after a call has completed
    pub fn initialize(&self, params: &HashMap<String, String>) -> Result<Initialized, GateError> {
        if let Err(phase) =
            self.phase
                .compare_exchange(WAITING, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
        {
            return Err(if phase == INITIALIZED {
                GateError::AlreadyInitialized
            } else {
                GateError::InitInProgress
            });
        }

        let routed = route_params(params);
        let mut report = self.apply(&routed);

        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        report.callbacks = callbacks.len();

        self.phase.store(INITIALIZED, Ordering::Release);
        metrics::set_gate_open(true);
        metrics::record_initialized();
        info!(
            sign_applied = report.sign.applied,
            sign_ignored = report.sign.ignored,
            proxy_applied = report.proxy.applied,
            proxy_ignored = report.proxy.ignored,
            callbacks = report.callbacks,
            "Gateway initialized, opening traffic"
        );

        Ok(Initialized {
            report,
            callbacks: PendingCallbacks {
                callbacks,
                tasks: self.tasks.clone(),
            },
        })
    }

    /// Wait for dispatched callbacks to finish.
    ///
    /// Callbacks dispatched after this returns (a late initialization) are
    /// still run, but are no longer awaited.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        debug!("Post-init callback tasks drained");
    }

    fn apply(&self, routed: &RoutedSettings) -> InitReport {
        let mut report = InitReport::default();

        if !routed.sign.is_empty() {
            match self.middlewares.sign() {
                Some(sign) => report.sign = apply_sign_settings(&sign, &routed.sign),
                None => {
                    debug!(key = APISIGN, "No signing validator registered, ignoring its settings");
                    report.sign.ignored = routed.sign.len();
                }
            }
        }

        if !routed.proxy.is_empty() {
            match self.middlewares.proxy() {
                Some(proxy) => report.proxy = apply_proxy_settings(&proxy, &routed.proxy),
                None => {
                    debug!(key = APIPROXY, "No proxy registered, ignoring its settings");
                    report.proxy.ignored = routed.proxy_len();
                }
            }
        }

        metrics::record_settings_ignored(APISIGN, report.sign.ignored as u64);
        metrics::record_settings_ignored(APIPROXY, report.proxy.ignored as u64);
        report
    }

}

impl std::fmt::Debug for InitGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitGate")
            .field("disabled", &self.disabled)
            .field("initialized", &self.is_initialized())
            .field("middlewares", &self.middlewares)
            .finish_non_exhaustive()
    }
}

fn dispatch_callbacks(tasks: &TaskTracker, callbacks: Vec<InitCallback>) {
    if callbacks.is_empty() {
        return;
    }

    if tokio::runtime::Handle::try_current().is_ok() {
        tasks.spawn_blocking(move || run_callbacks(callbacks));
        return;
    }

    // Outside a runtime: a plain thread, not awaited by `shutdown`
    if let Err(e) = std::thread::Builder::new()
        .name("apiinit-callbacks".to_string())
        .spawn(move || run_callbacks(callbacks))
    {
        error!(error = %e, "Failed to spawn post-init callback thread, callbacks will not run");
    }
}

fn run_callbacks(callbacks: Vec<InitCallback>) {
    let total = callbacks.len();
    for (index, callback) in callbacks.into_iter().enumerate() {
        match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(()) => metrics::record_callback("ok"),
            Err(payload) => {
                error!(
                    index,
                    total,
                    panic = panic_message(payload.as_ref()),
                    "Post-init callback panicked, continuing with the remaining callbacks"
                );
                metrics::record_callback("panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    use super::*;
    use crate::targets::{ProxyRegistry, SignValidator};

    fn registry() -> (MiddlewareRegistry, Arc<SignValidator>, Arc<ProxyRegistry>) {
        let sign = Arc::new(SignValidator::new("", true));
        let proxy = Arc::new(ProxyRegistry::with_aliases(["b1"]));
        let registry = MiddlewareRegistry::new()
            .with(APISIGN, Arc::clone(&sign))
            .with(APIPROXY, Arc::clone(&proxy));
        (registry, sign, proxy)
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_disabled_gate_always_passes() {
        let gate = InitGate::new(true, MiddlewareRegistry::new());

        assert_eq!(gate.decide(None), Decision::PassThrough);
        assert_eq!(gate.decide(Some("User.List")), Decision::PassThrough);
        assert_eq!(gate.decide(Some(INIT_ACTION)), Decision::PassThrough);
    }

    #[test]
    fn test_waiting_gate_rejects_everything_but_init() {
        let gate = InitGate::new(false, MiddlewareRegistry::new());

        assert_eq!(gate.decide(None), Decision::Reject);
        assert_eq!(gate.decide(Some("User.List")), Decision::Reject);
        assert_eq!(gate.decide(Some("apibox.init")), Decision::Reject);
        assert_eq!(gate.decide(Some("APIBox.Init ")), Decision::Reject);
        assert_eq!(gate.decide(Some(INIT_ACTION)), Decision::HandleInit);
    }

    #[tokio::test]
    async fn test_initialized_gate_passes_everything() {
        let (registry, _, _) = registry();
        let gate = InitGate::new(false, registry);

        gate.initialize(&HashMap::new()).unwrap();

        assert!(gate.is_initialized());
        assert_eq!(gate.decide(None), Decision::PassThrough);
        assert_eq!(gate.decide(Some("User.List")), Decision::PassThrough);
        assert_eq!(gate.decide(Some(INIT_ACTION)), Decision::PassThrough);
    }

    #[tokio::test]
    async fn test_initialize_applies_settings() {
        let (registry, sign, proxy) = registry();
        let gate = InitGate::new(false, registry);

        let report = gate
            .initialize(&params(&[
                ("api_action", INIT_ACTION),
                ("apisign.sign_key", "abc"),
                ("apisign.disabled", "Y"),
                ("apiproxy.b1.gwurl", "http://x"),
                ("apiproxy.ghost.gwurl", "http://y"),
                ("foo.bar", "z"),
            ]))
            .unwrap()
            .report;

        assert_eq!(sign.sign_key(), "abc");
        assert!(!sign.is_enabled());
        assert_eq!(proxy.client("b1").unwrap().gw_url, "http://x");
        assert_eq!(report.sign, ApplyReport { applied: 2, ignored: 0 });
        assert_eq!(report.proxy, ApplyReport { applied: 1, ignored: 1 });
    }

    #[tokio::test]
    async fn test_initialize_without_registered_middlewares() {
        let gate = InitGate::new(false, MiddlewareRegistry::new());

        let report = gate
            .initialize(&params(&[("apisign.sign_key", "abc"), ("apiproxy.b1.gwurl", "x")]))
            .unwrap()
            .report;

        assert!(gate.is_initialized());
        assert_eq!(report.sign.ignored, 1);
        assert_eq!(report.proxy.ignored, 1);
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let (registry, sign, _) = registry();
        let gate = InitGate::new(false, registry);

        gate.initialize(&params(&[("apisign.sign_key", "first")]))
            .unwrap();
        let second = gate.initialize(&params(&[("apisign.sign_key", "second")]));

        assert!(matches!(second, Err(GateError::AlreadyInitialized)));
        assert_eq!(sign.sign_key(), "first");
    }

    #[tokio::test]
    async fn test_callbacks_run_once_in_order() {
        let gate = InitGate::new(false, MiddlewareRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            gate.add_callback(move || order.lock().unwrap().push(i))
                .unwrap();
        }

        let report = gate.initialize(&HashMap::new()).unwrap().report;
        gate.shutdown().await;

        assert_eq!(report.callbacks, 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_callbacks_wait_for_dispatch() {
        let gate = InitGate::new(false, MiddlewareRegistry::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        gate.add_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let initialized = gate.initialize(&HashMap::new()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(gate.is_initialized());
        assert_eq!(initialized.callbacks.len(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        initialized.callbacks.dispatch();
        gate.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_after_initialize_is_refused() {
        let gate = InitGate::new(false, MiddlewareRegistry::new());
        gate.initialize(&HashMap::new()).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        let result = gate.add_callback(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        gate.shutdown().await;

        assert_eq!(result, Err(GateError::AlreadyInitialized));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_the_rest() {
        let gate = InitGate::new(false, MiddlewareRegistry::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&ran);
        gate.add_callback(move || {
            first.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        gate.add_callback(|| panic!("cache warmup failed")).unwrap();
        let last = Arc::clone(&ran);
        gate.add_callback(move || {
            last.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        gate.initialize(&HashMap::new()).unwrap();
        gate.shutdown().await;

        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callbacks_run_without_runtime() {
        let gate = InitGate::new(false, MiddlewareRegistry::new());
        let (tx, rx) = std::sync::mpsc::channel();
        gate.add_callback(move || tx.send(()).unwrap()).unwrap();

        gate.initialize(&HashMap::new()).unwrap();

        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_runs_once() {
        const RACERS: usize = 16;

        let (registry, _, proxy) = registry();
        let gate = Arc::new(InitGate::new(false, registry));
        let callback_runs = Arc::new(AtomicUsize::new(0));
        let runs = Arc::clone(&callback_runs);
        gate.add_callback(move || {
            runs.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let runtime = tokio::runtime::Handle::current();
        let barrier = Arc::new(Barrier::new(RACERS));
        let handles: Vec<_> = (0..RACERS)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                let runtime = runtime.clone();
                std::thread::spawn(move || {
                    let _guard = runtime.enter();
                    let value = format!("default-{i}");
                    barrier.wait();
                    gate.initialize(&params(&[("apiproxy.b1.default_params.k", value.as_str())]))
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();
        gate.shutdown().await;

        assert_eq!(winners, 1);
        assert_eq!(callback_runs.load(Ordering::SeqCst), 1);
        assert!(gate.is_initialized());
        assert!(proxy.client("b1").unwrap().default_params.contains_key("k"));
    }
}
