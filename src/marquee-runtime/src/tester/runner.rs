use super::cases::{run_case, CaseState, TestCase};
use super::result::{ProviderTestCaseResult, ProviderTestResult, TestStatus};
use super::stage::{TestJobState, TestStage};
use crate::directory::ProviderApiDirectory;
use crate::guard::guarded;
use marquee_core::{ProviderApi, ProviderError, ProviderMetadata, ProviderResult, TesterConfig};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const RESOLUTION_CASE: &str = "Provider resolution";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TesterError {
    #[error("a test run is already in progress")]
    AlreadyRunning,
}

struct ActiveRun {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct TesterInner {
    directory: Arc<ProviderApiDirectory>,
    config: TesterConfig,
    stage: watch::Sender<TestStage>,
    job_state: watch::Sender<TestJobState>,
    results: watch::Sender<Vec<ProviderTestResult>>,
    film_on_test: watch::Sender<Option<String>>,
    active: Mutex<Option<ActiveRun>>,
}

/// Pausable, resumable, cancelable conformance runner.
///
/// One run at a time. All progress is published through watch channels so
/// observers always see a complete snapshot.
#[derive(Clone)]
pub struct ProviderTester {
    inner: Arc<TesterInner>,
}

impl ProviderTester {
    pub fn new(directory: Arc<ProviderApiDirectory>, config: TesterConfig) -> Self {
        let (stage, _) = watch::channel(TestStage::Idle);
        let (job_state, _) = watch::channel(TestJobState::Idle);
        let (results, _) = watch::channel(Vec::new());
        let (film_on_test, _) = watch::channel(None);
        Self {
            inner: Arc::new(TesterInner {
                directory,
                config,
                stage,
                job_state,
                results,
                film_on_test,
                active: Mutex::new(None),
            }),
        }
    }

    /// Starts testing `providers` in order, replacing the previous run's
    /// results. Rejected unless the tester is idle.
    pub fn start(&self, providers: Vec<ProviderMetadata>) -> Result<(), TesterError> {
        let claimed = self.inner.job_state.send_if_modified(|state| {
            if *state == TestJobState::Idle {
                *state = TestJobState::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(TesterError::AlreadyRunning);
        }

        self.inner
            .results
            .send_replace(Vec::with_capacity(providers.len()));
        self.inner.film_on_test.send_replace(None);

        let token = CancellationToken::new();
        tracing::info!(providers = providers.len(), "starting provider test run");
        let handle = tokio::spawn(self.inner.clone().run(providers, token.clone()));
        let previous = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(ActiveRun {
                token,
                handle: Some(handle),
            });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        Ok(())
    }

    /// Holds the run at the next checkpoint between test cases.
    pub fn pause(&self) -> bool {
        self.transition(TestJobState::Running, TestJobState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(TestJobState::Paused, TestJobState::Running)
    }

    fn transition(&self, from: TestJobState, to: TestJobState) -> bool {
        self.inner.job_state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Cancels the run. Results collected so far are kept.
    pub fn stop(&self) {
        let active = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(active) = active {
            active.token.cancel();
            tracing::info!("provider test run stopped");
        }
        self.inner.job_state.send_replace(TestJobState::Idle);
        self.inner.stage.send_replace(TestStage::Idle);
    }

    /// Stops any active run and empties the results.
    pub fn clear(&self) {
        self.stop();
        self.inner.results.send_replace(Vec::new());
        self.inner.film_on_test.send_replace(None);
    }

    /// Resolves once the worker of the current run has exited.
    pub async fn join(&self) {
        let handle = self
            .inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_mut()
            .and_then(|active| active.handle.take());
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "provider test worker failed");
            }
        }
    }

    pub fn directory(&self) -> &Arc<ProviderApiDirectory> {
        &self.inner.directory
    }

    pub fn stage(&self) -> TestStage {
        self.inner.stage.borrow().clone()
    }

    pub fn job_state(&self) -> TestJobState {
        *self.inner.job_state.borrow()
    }

    pub fn results(&self) -> Vec<ProviderTestResult> {
        self.inner.results.borrow().clone()
    }

    /// Thumbnail of the film currently on test.
    pub fn film_on_test(&self) -> Option<String> {
        self.inner.film_on_test.borrow().clone()
    }

    pub fn observe_stage(&self) -> watch::Receiver<TestStage> {
        self.inner.stage.subscribe()
    }

    pub fn observe_job_state(&self) -> watch::Receiver<TestJobState> {
        self.inner.job_state.subscribe()
    }

    pub fn observe_results(&self) -> watch::Receiver<Vec<ProviderTestResult>> {
        self.inner.results.subscribe()
    }

    pub fn observe_film_on_test(&self) -> watch::Receiver<Option<String>> {
        self.inner.film_on_test.subscribe()
    }
}

impl TesterInner {
    async fn run(self: Arc<Self>, providers: Vec<ProviderMetadata>, token: CancellationToken) {
        for (index, provider) in providers.into_iter().enumerate() {
            if !self.checkpoint(&token).await {
                return;
            }
            publish(&token, &self.stage, |s| *s = TestStage::Stage1(Some(provider.clone())));
            publish(&token, &self.results, |r| r.push(ProviderTestResult::new(provider.clone())));

            let started = Instant::now();
            let api = tokio::select! {
                _ = token.cancelled() => return,
                api = self.resolve(&provider) => api,
            };
            let api = match api {
                Ok(api) => api,
                Err(err) => {
                    tracing::warn!(provider_id = %provider.id, error = %err, "provider resolution failed");
                    let mut case =
                        ProviderTestCaseResult::from_error(RESOLUTION_CASE, started.elapsed(), &err);
                    case.status = TestStatus::Failure;
                    publish(&token, &self.results, |r| {
                        if let Some(result) = r.get_mut(index) {
                            result.outputs.push(case);
                        }
                    });
                    continue;
                }
            };

            publish(&token, &self.stage, |s| *s = TestStage::Stage2(Some(provider.clone())));
            if !self.run_cases(index, &provider, &api, &token).await {
                return;
            }
        }

        if publish(&token, &self.stage, |s| *s = TestStage::Idle) {
            publish(&token, &self.job_state, |s| *s = TestJobState::Idle);
            tracing::info!("provider test run finished");
        }
    }

    /// Uses the directory's live instance, or a throwaway one for providers
    /// that are installed but disabled.
    async fn resolve(&self, provider: &ProviderMetadata) -> ProviderResult<Arc<dyn ProviderApi>> {
        if let Some(api) = self.directory.get_api(&provider.id).await {
            return Ok(api);
        }
        let installed = self
            .directory
            .registry()
            .get_provider(&provider.id)
            .await
            .ok_or_else(|| ProviderError::NotFound {
                entity: format!("installed provider {}", provider.id),
            })?;
        guarded("instantiate", installed.instantiate(self.directory.context())).await
    }

    /// Returns false when the run was cancelled part way.
    async fn run_cases(
        &self,
        index: usize,
        provider: &ProviderMetadata,
        api: &Arc<dyn ProviderApi>,
        token: &CancellationToken,
    ) -> bool {
        let mut state = CaseState::default();
        let timeout = self.config.test_timeout();

        for case in TestCase::script() {
            if !self.checkpoint(token).await {
                return false;
            }

            let mut slot = None;
            publish(token, &self.results, |r| {
                if let Some(result) = r.get_mut(index) {
                    slot = Some(result.outputs.len());
                    result.outputs.push(ProviderTestCaseResult::running(case.name()));
                }
            });

            let started = Instant::now();
            let outcome = tokio::select! {
                _ = token.cancelled() => return false,
                outcome = run_case(case, api, &mut state, timeout) => outcome,
            };
            let elapsed = started.elapsed();
            let finished = match &outcome {
                Ok(log) => ProviderTestCaseResult::success(case.name(), elapsed, log.clone()),
                Err(err) => ProviderTestCaseResult::from_error(case.name(), elapsed, err),
            };
            tracing::debug!(
                provider_id = %provider.id,
                case = case.name(),
                status = ?finished.status,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "test case finished"
            );
            let passed = finished.is_success();

            publish(token, &self.results, |r| {
                let outputs = r.get_mut(index).map(|result| &mut result.outputs);
                if let (Some(outputs), Some(slot)) = (outputs, slot) {
                    if let Some(entry) = outputs.get_mut(slot) {
                        *entry = finished;
                    }
                }
            });

            if case == TestCase::TestFilm {
                if let Some(film) = &state.film {
                    let image = film.film.preview_image().map(str::to_string);
                    publish(token, &self.film_on_test, |f| *f = image);
                }
            }
            if case.stops_on_failure() && !passed {
                tracing::info!(provider_id = %provider.id, case = case.name(), "skipping remaining cases");
                break;
            }
        }
        true
    }

    /// Blocks while paused. Returns false once the run is cancelled.
    async fn checkpoint(&self, token: &CancellationToken) -> bool {
        let mut state = self.job_state.subscribe();
        loop {
            if token.is_cancelled() {
                return false;
            }
            match *state.borrow_and_update() {
                TestJobState::Running => return true,
                TestJobState::Idle => return false,
                TestJobState::Paused => {}
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                changed = state.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Applies `update` unless the run owning `token` was cancelled, so a
/// stopped worker can never overwrite a newer run's state.
fn publish<T>(token: &CancellationToken, sender: &watch::Sender<T>, update: impl FnOnce(&mut T)) -> bool {
    sender.send_if_modified(|value| {
        if token.is_cancelled() {
            return false;
        }
        update(value);
        true
    })
}
