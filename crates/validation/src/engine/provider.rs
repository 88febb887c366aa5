//! Lazily-constructed, process-wide validation engine.
//!
//! [`EngineProvider`] guarantees that at most one construction attempt runs at
//! a time and that once an engine exists every caller receives that same
//! instance. Construction runs on its own task while holding the
//! initialization lock, so a request that gives up waiting (client disconnect,
//! timeout) does not abort a half-finished construction.
//!
//! A failed attempt is remembered together with the number of completed
//! attempts at that point:
//!
//! - callers that were already waiting on the failed attempt receive its error;
//! - callers arriving later retry, unless the retry back-off window since the
//!   failure has not elapsed, in which case the cached error is returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{EngineFactory, EngineSettings, ValidationEngine};
use crate::config::ValidatorConfig;
use crate::error::EngineError;

/// Observable lifecycle state of the shared engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// No construction attempt has been made.
    Uninitialized,
    /// A construction attempt is in progress.
    Initializing,
    /// The engine is built and shared.
    Ready,
    /// The last construction attempt failed.
    Failed {
        /// The construction error.
        message: String,
    },
}

impl EngineState {
    /// Short label for health output.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Failed { .. } => "failed",
        }
    }
}

enum Slot {
    Empty,
    Failed {
        error: EngineError,
        completed: u64,
        at: Instant,
    },
}

struct Inner {
    factory: Arc<dyn EngineFactory>,
    settings: EngineSettings,
    init_timeout: Duration,
    retry_backoff: Duration,
    engine: OnceLock<Arc<dyn ValidationEngine>>,
    slot: Arc<Mutex<Slot>>,
    started: AtomicU64,
    completed: AtomicU64,
}

/// Creates the validation engine on first use and shares it afterwards.
///
/// Cloning is cheap; clones share the same engine.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use helios_validation::conformance::ConformanceEngineFactory;
/// use helios_validation::engine::{EngineProvider, EngineSettings};
///
/// let provider = EngineProvider::new(
///     Arc::new(ConformanceEngineFactory::new()),
///     EngineSettings::default(),
///     Duration::from_secs(300),
///     Duration::from_secs(5),
/// );
/// let engine = provider.get().await?;
/// ```
#[derive(Clone)]
pub struct EngineProvider {
    inner: Arc<Inner>,
}

impl EngineProvider {
    /// Creates a provider. No engine is built until [`get`](Self::get) is called.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        settings: EngineSettings,
        init_timeout: Duration,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                settings,
                init_timeout,
                retry_backoff,
                engine: OnceLock::new(),
                slot: Arc::new(Mutex::new(Slot::Empty)),
                started: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a provider using the timeouts and package cache from `config`.
    pub fn from_config(factory: Arc<dyn EngineFactory>, config: &ValidatorConfig) -> Self {
        Self::new(
            factory,
            EngineSettings::from_config(config),
            config.engine_init_timeout(),
            config.engine_retry_backoff(),
        )
    }

    /// Returns the shared engine, constructing it if necessary.
    pub async fn get(&self) -> Result<Arc<dyn ValidationEngine>, EngineError> {
        if let Some(engine) = self.inner.engine.get() {
            return Ok(Arc::clone(engine));
        }

        let seen = self.inner.completed.load(Ordering::Acquire);
        let guard = Arc::clone(&self.inner.slot).lock_owned().await;

        if let Some(engine) = self.inner.engine.get() {
            return Ok(Arc::clone(engine));
        }

        if let Slot::Failed {
            error,
            completed,
            at,
        } = &*guard
        {
            if *completed > seen {
                debug!(error = %error, "Sharing failure of the attempt this caller waited on");
                return Err(error.clone());
            }
            if at.elapsed() < self.inner.retry_backoff {
                debug!(error = %error, "Engine construction in back-off window");
                return Err(error.clone());
            }
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.initialize(guard))
            .await
            .map_err(|e| EngineError::Construction(format!("construction task aborted: {}", e)))?
    }

    /// Reports the lifecycle state without triggering construction.
    pub fn state(&self) -> EngineState {
        if self.inner.engine.get().is_some() {
            return EngineState::Ready;
        }
        match self.inner.slot.try_lock() {
            Ok(slot) => match &*slot {
                Slot::Empty => EngineState::Uninitialized,
                Slot::Failed { error, .. } => EngineState::Failed {
                    message: error.to_string(),
                },
            },
            Err(_) => EngineState::Initializing,
        }
    }

    /// Returns true once the engine has been built.
    pub fn is_ready(&self) -> bool {
        self.inner.engine.get().is_some()
    }

    /// Number of construction attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Starts construction in the background and keeps retrying, at least one
    /// back-off window (and never less than a second) apart, until an engine
    /// is built.
    ///
    /// Requests arriving before it finishes wait on the same attempt.
    pub fn warm_up(&self) -> JoinHandle<()> {
        let provider = self.clone();
        let delay = self.inner.retry_backoff.max(Duration::from_secs(1));
        tokio::spawn(async move {
            loop {
                match provider.get().await {
                    Ok(engine) => {
                        info!(engine = engine.name(), "Validation engine pre-warmed");
                        return;
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            retry_in_secs = delay.as_secs(),
                            "Validation engine pre-warm failed"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}

impl Inner {
    async fn initialize(
        self: Arc<Self>,
        mut slot: OwnedMutexGuard<Slot>,
    ) -> Result<Arc<dyn ValidationEngine>, EngineError> {
        let attempt = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            attempt,
            core = %self.settings.core_package,
            implementation_guide = %self.settings.implementation_guide,
            terminology_server = %self.settings.terminology_server,
            "Constructing validation engine"
        );

        let started_at = Instant::now();
        let result =
            match tokio::time::timeout(self.init_timeout, self.factory.construct(&self.settings))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(EngineError::InitTimeout {
                    seconds: self.init_timeout.as_secs(),
                }),
            };
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;

        match result {
            Ok(engine) => {
                let engine = Arc::clone(self.engine.get_or_init(|| engine));
                *slot = Slot::Empty;
                info!(
                    attempt,
                    engine = engine.name(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Validation engine ready"
                );
                Ok(engine)
            }
            Err(err) => {
                error!(attempt, error = %err, "Validation engine construction failed");
                *slot = Slot::Failed {
                    error: err.clone(),
                    completed,
                    at: Instant::now(),
                };
                Err(err)
            }
        }
    }
}
