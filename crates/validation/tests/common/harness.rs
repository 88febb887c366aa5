//! Validation service test harness.
//!
//! Provides a [`TestServer`] wired to scripted engines and factories, so the
//! request and lifecycle behavior can be tested without loading packages.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use helios_validation::engine::{
    EngineFactory, EngineProvider, EngineSettings, FhirFormat, ValidationEngine,
};
use helios_validation::outcome::{Issue, IssueType, OperationOutcome};
use helios_validation::{EngineError, ValidatorConfig, create_app_with_config};
use parking_lot::Mutex;

/// What a [`MockEngine`] does when asked to validate.
#[derive(Clone)]
pub enum Behavior {
    /// Return this outcome.
    Outcome(OperationOutcome),
    /// Fail with this error.
    Fail(EngineError),
    /// Sleep this long, then return an empty outcome.
    Hang(Duration),
}

/// Engine that records every call and answers with a scripted behavior.
pub struct MockEngine {
    behavior: Behavior,
    calls: Mutex<Vec<(Vec<u8>, FhirFormat, Vec<String>)>>,
}

impl MockEngine {
    /// Engine returning `outcome` for every document.
    pub fn returning(outcome: OperationOutcome) -> Self {
        Self::with_behavior(Behavior::Outcome(outcome))
    }

    /// Engine returning no issues.
    pub fn clean() -> Self {
        Self::returning(OperationOutcome::new(Vec::new()))
    }

    /// Engine with an arbitrary behavior.
    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of validate calls received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Profile lists received, one per call.
    pub fn profiles_seen(&self) -> Vec<Vec<String>> {
        self.calls.lock().iter().map(|(_, _, p)| p.clone()).collect()
    }

    /// Formats received, one per call.
    pub fn formats_seen(&self) -> Vec<FhirFormat> {
        self.calls.lock().iter().map(|(_, f, _)| *f).collect()
    }

    /// Documents received, one per call.
    pub fn documents_seen(&self) -> Vec<Vec<u8>> {
        self.calls.lock().iter().map(|(d, _, _)| d.clone()).collect()
    }
}

#[async_trait]
impl ValidationEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn validate(
        &self,
        document: &[u8],
        format: FhirFormat,
        profiles: &[String],
    ) -> Result<OperationOutcome, EngineError> {
        self.calls
            .lock()
            .push((document.to_vec(), format, profiles.to_vec()));
        match &self.behavior {
            Behavior::Outcome(outcome) => Ok(outcome.clone()),
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Hang(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(OperationOutcome::new(Vec::new()))
            }
        }
    }
}

/// Factory handing out one shared [`MockEngine`], optionally failing first.
pub struct MockFactory {
    engine: Arc<MockEngine>,
    failures: AtomicUsize,
    constructions: AtomicUsize,
    delay: Duration,
}

impl MockFactory {
    /// Factory that succeeds immediately.
    pub fn new(engine: Arc<MockEngine>) -> Self {
        Self {
            engine,
            failures: AtomicUsize::new(0),
            constructions: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Fails the first `count` constructions.
    pub fn failing_first(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Sleeps before each construction completes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of construction attempts.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for MockFactory {
    async fn construct(
        &self,
        settings: &EngineSettings,
    ) -> Result<Arc<dyn ValidationEngine>, EngineError> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(EngineError::TerminologyUnavailable {
                url: settings.terminology_server.clone(),
                message: "connection refused".to_string(),
            });
        }
        let engine: Arc<dyn ValidationEngine> = self.engine.clone();
        Ok(engine)
    }
}

/// Test harness for the validation service.
///
/// # Example
///
/// ```rust,ignore
/// let harness = ValidatorTestHarness::new(MockEngine::clean());
/// let response = harness.server.post("/validate").json(&minimal_patient()).await;
/// response.assert_status_ok();
/// ```
pub struct ValidatorTestHarness {
    /// The test server instance.
    pub server: TestServer,
    /// The provider shared with the server.
    pub provider: EngineProvider,
    /// The factory behind the provider.
    pub factory: Arc<MockFactory>,
    /// The engine the factory hands out.
    pub engine: Arc<MockEngine>,
    /// Server configuration.
    pub config: ValidatorConfig,
}

impl ValidatorTestHarness {
    /// Harness whose factory always succeeds with `engine`.
    pub fn new(engine: MockEngine) -> Self {
        let engine = Arc::new(engine);
        Self::with_factory(
            MockFactory::new(engine.clone()),
            engine,
            ValidatorConfig::for_testing(),
        )
    }

    /// Harness with a custom factory and configuration.
    pub fn with_factory(
        factory: MockFactory,
        engine: Arc<MockEngine>,
        config: ValidatorConfig,
    ) -> Self {
        let factory = Arc::new(factory);
        let provider = EngineProvider::from_config(factory.clone(), &config);
        let app = create_app_with_config(provider.clone(), config.clone());
        let server = TestServer::new(app).expect("Failed to create test server");

        Self {
            server,
            provider,
            factory,
            engine,
            config,
        }
    }
}

/// Outcome with one issue of each severity, in a fixed order.
pub fn mixed_outcome() -> OperationOutcome {
    OperationOutcome::new(vec![
        Issue::error(IssueType::Required, "Patient.name: minimum required = 1")
            .with_expression("Patient"),
        Issue::warning(IssueType::CodeInvalid, "Unknown code in extensible binding")
            .with_expression("Patient.maritalStatus"),
        Issue::information(IssueType::Informational, "Profile applied"),
    ])
}
