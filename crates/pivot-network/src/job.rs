//! Submission and polling state machine for one analysis job at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{stream::BoxStream, StreamExt};
use pivot_types::{
    config::PollingConfig,
    events::JobUpdate,
    failure::{Failure, RetryAction},
    job::{parse_acknowledgment, AnalysisParameters, JobId, JobState, StatusPayload},
    PivotError, Result,
};
use tokio::{
    sync::{broadcast, watch},
    time::{sleep, Instant},
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::{exchange, ApiRequest, HttpTransport};

/// Cancellation signal for one poll loop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Receipt for an accepted submission.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: JobId,
    parameters: AnalysisParameters,
    cancel: CancelToken,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn parameters(&self) -> &AnalysisParameters {
        &self.parameters
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Done,
    Cancelled,
}

#[derive(Default)]
struct Shared {
    state: JobState,
    handle: Option<JobHandle>,
    /// Token of a submission still waiting for its acknowledgment.
    pending: Option<CancelToken>,
    /// Generation and handle token of the running poll loop.
    active_loop: Option<(u64, CancelToken)>,
    loops_started: u64,
}

impl Shared {
    fn owns(&self, handle: &JobHandle) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|current| current.job_id == handle.job_id)
    }

    /// Clears the pending submission if it is still `token` and was not
    /// cancelled. Returns whether the submission may take effect.
    fn settle(&mut self, token: &CancelToken) -> bool {
        let current = !token.is_cancelled()
            && self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.same_as(token));
        if current {
            self.pending = None;
        }
        current
    }

    fn is_polling(&self, handle: &JobHandle) -> bool {
        self.active_loop
            .as_ref()
            .is_some_and(|(_, token)| token.same_as(&handle.cancel))
    }
}

/// Clears the active-loop marker however the loop ends.
struct ActiveLoop<'a> {
    client: &'a JobClient,
    generation: u64,
}

impl Drop for ActiveLoop<'_> {
    fn drop(&mut self) {
        let mut shared = self.client.shared();
        if shared
            .active_loop
            .as_ref()
            .is_some_and(|(generation, _)| *generation == self.generation)
        {
            shared.active_loop = None;
        }
    }
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    polling: PollingConfig,
    shared: Mutex<Shared>,
    updates: broadcast::Sender<JobUpdate>,
}

/// Drives `Idle → Queued → Running → {Done | Failed | TimedOut}`.
///
/// Cloning is cheap and every clone observes the same job, so one task can
/// poll while another resets or submits.
#[derive(Clone)]
pub struct JobClient {
    inner: Arc<Inner>,
}

impl JobClient {
    pub fn new(transport: Arc<dyn HttpTransport>, polling: PollingConfig) -> Self {
        let (updates, _) = broadcast::channel(polling.update_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                transport,
                polling,
                shared: Mutex::new(Shared::default()),
                updates,
            }),
        }
    }

    pub fn state(&self) -> JobState {
        self.shared().state.clone()
    }

    pub fn current_handle(&self) -> Option<JobHandle> {
        self.shared().handle.clone()
    }

    /// Stream of updates, one per state-affecting response.
    pub fn subscribe(&self) -> BoxStream<'static, JobUpdate> {
        BroadcastStream::new(self.inner.updates.subscribe())
            .filter_map(|update| async move { update.ok() })
            .boxed()
    }

    /// Validates `parameters`, sends them to the backend and captures the job id.
    pub async fn submit(&self, parameters: AnalysisParameters) -> Result<JobHandle, Failure> {
        parameters.validate().map_err(Failure::terminal)?;
        let token = CancelToken::new();
        {
            let mut shared = self.shared();
            if !shared.state.accepts_submit() {
                return Err(Failure::terminal(PivotError::Usage(format!(
                    "a job is already {:?}; wait for it to finish or reset",
                    shared.state
                ))));
            }
            if let Some(previous) = shared.handle.take() {
                previous.cancel.cancel();
            }
            if let Some(previous) = shared.pending.replace(token.clone()) {
                previous.cancel();
            }
            shared.state = JobState::Queued;
        }

        info!(
            "Submitting analysis: depth={} max_pivots={} threshold={}cp gap={} multipv={}",
            parameters.depth,
            parameters.max_pivots,
            parameters.swing_threshold_cp,
            parameters.min_ply_gap,
            parameters.multipv
        );
        let request = ApiRequest::Submit(parameters.clone());
        let acknowledged = exchange(self.inner.transport.as_ref(), &request)
            .await
            .and_then(|body| parse_acknowledgment(&body));
        let job_id = match acknowledged {
            Ok(job_id) => job_id,
            Err(err) => {
                warn!("Submission failed: {err}");
                let failed = JobState::Failed {
                    reason: err.to_string(),
                };
                let current = {
                    let mut shared = self.shared();
                    let current = shared.settle(&token);
                    if current {
                        shared.state = failed.clone();
                    }
                    current
                };
                if current {
                    self.publish(None, failed, 0);
                }
                return Err(Failure::new(err, Some(RetryAction::Submit(parameters))));
            }
        };

        if !job_id.is_canonical() {
            warn!("Job id {} does not look like a backend job id", job_id);
        }
        let handle = JobHandle {
            job_id: job_id.clone(),
            parameters,
            cancel: token,
        };
        {
            let mut shared = self.shared();
            if !shared.settle(&handle.cancel) {
                info!("Job {} was abandoned before it was acknowledged", job_id);
                return Err(Failure::terminal(PivotError::Usage(format!(
                    "job {job_id} was abandoned before it was acknowledged"
                ))));
            }
            shared.handle = Some(handle.clone());
            shared.state = JobState::Queued;
        }
        self.publish(Some(job_id.clone()), JobState::Queued, 0);
        info!("Job {} queued", job_id);
        Ok(handle)
    }

    /// Polls until the job finishes, the attempt bound is hit, or the handle is cancelled.
    ///
    /// Only one loop runs per handle; a second call while one is active is a
    /// usage error.
    pub async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome, Failure> {
        let generation = {
            let mut shared = self.shared();
            if !shared.owns(handle) {
                return Err(Failure::terminal(PivotError::Usage(format!(
                    "job {} is no longer the active job",
                    handle.job_id
                ))));
            }
            if !matches!(
                shared.state,
                JobState::Queued | JobState::Running { .. } | JobState::TimedOut
            ) {
                return Err(Failure::terminal(PivotError::Usage(format!(
                    "job {} is {:?}; nothing to poll",
                    handle.job_id, shared.state
                ))));
            }
            if shared.is_polling(handle) {
                return Err(Failure::terminal(PivotError::Usage(format!(
                    "job {} is already being polled",
                    handle.job_id
                ))));
            }
            shared.loops_started += 1;
            shared.active_loop = Some((shared.loops_started, handle.cancel.clone()));
            shared.loops_started
        };
        let _active = ActiveLoop {
            client: self,
            generation,
        };

        let polling = &self.inner.polling;
        let started = Instant::now();
        let resume = || Some(RetryAction::ResumePolling(handle.job_id.clone()));
        let request = ApiRequest::Status(handle.job_id.clone());
        let mut attempts = 0;

        while attempts < polling.max_attempts {
            if handle.cancel.is_cancelled() {
                info!("Polling for job {} cancelled", handle.job_id);
                return Ok(PollOutcome::Cancelled);
            }
            if polling
                .wall_clock_limit()
                .is_some_and(|limit| started.elapsed() >= limit)
            {
                warn!("Polling for job {} hit the wall-clock limit", handle.job_id);
                break;
            }

            attempts += 1;
            let payload = exchange(self.inner.transport.as_ref(), &request)
                .await
                .and_then(|body| StatusPayload::parse(&body))
                .map_err(|err| {
                    warn!("Status request for job {} failed: {err}", handle.job_id);
                    Failure::new(err, resume())
                })?;
            let state = payload.to_state();
            debug!(
                "Job {} attempt {}/{}: {:?}",
                handle.job_id, attempts, polling.max_attempts, state
            );
            if !self.record(handle, state.clone(), attempts) {
                return Ok(PollOutcome::Cancelled);
            }

            match state {
                JobState::Done => {
                    info!("Job {} done after {} polls", handle.job_id, attempts);
                    return Ok(PollOutcome::Done);
                }
                JobState::Failed { reason } => {
                    warn!("Job {} failed: {}", handle.job_id, reason);
                    return Err(Failure::new(
                        PivotError::Application(reason),
                        Some(RetryAction::Submit(handle.parameters.clone())),
                    ));
                }
                _ => {}
            }

            if attempts < polling.max_attempts {
                tokio::select! {
                    _ = sleep(polling.interval()) => {}
                    _ = handle.cancel.cancelled() => {
                        info!("Polling for job {} cancelled", handle.job_id);
                        return Ok(PollOutcome::Cancelled);
                    }
                }
            }
        }

        if !self.record(handle, JobState::TimedOut, attempts) {
            return Ok(PollOutcome::Cancelled);
        }
        warn!(
            "Job {} still running after {} polls; giving up",
            handle.job_id, attempts
        );
        Err(Failure::new(PivotError::Timeout { attempts }, resume()))
    }

    /// Restarts polling of the active job from attempt zero.
    pub async fn resume(&self, job_id: &JobId) -> Result<PollOutcome, Failure> {
        let handle = self
            .current_handle()
            .filter(|handle| &handle.job_id == job_id)
            .ok_or_else(|| {
                Failure::terminal(PivotError::Usage(format!(
                    "job {job_id} is no longer the active job"
                )))
            })?;
        self.poll(&handle).await
    }

    /// Stops any poll loop and forgets the current job.
    pub fn reset(&self) {
        {
            let mut shared = self.shared();
            if let Some(handle) = shared.handle.take() {
                handle.cancel.cancel();
                info!("Abandoning job {}", handle.job_id);
            }
            if let Some(pending) = shared.pending.take() {
                pending.cancel();
                info!("Abandoning unacknowledged submission");
            }
        }
        self.set_state(None, JobState::Idle, 0);
    }

    /// Applies a poll result unless the handle was superseded meanwhile.
    fn record(&self, handle: &JobHandle, state: JobState, attempt: u32) -> bool {
        {
            let mut shared = self.shared();
            if handle.cancel.is_cancelled() || !shared.owns(handle) {
                return false;
            }
            shared.state = state.clone();
        }
        self.publish(Some(handle.job_id.clone()), state, attempt);
        true
    }

    fn set_state(&self, job_id: Option<JobId>, state: JobState, attempt: u32) {
        self.shared().state = state.clone();
        self.publish(job_id, state, attempt);
    }

    fn publish(&self, job_id: Option<JobId>, state: JobState, attempt: u32) {
        let _ = self
            .inner
            .updates
            .send(JobUpdate::new(job_id, state, attempt));
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pivot_types::failure::FailureKind;

    use super::*;
    use crate::{ApiResponse, ScriptedReply, ScriptedTransport};

    const JOB: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    fn fast_polling(max_attempts: u32) -> PollingConfig {
        PollingConfig {
            interval_ms: 0,
            max_attempts,
            wall_clock_limit_ms: None,
            update_capacity: 512,
        }
    }

    fn client(transport: &ScriptedTransport, max_attempts: u32) -> JobClient {
        JobClient::new(Arc::new(transport.clone()), fast_polling(max_attempts))
    }

    fn ack() -> ScriptedReply {
        ScriptedReply::ok(format!(r#"{{"db_job_id":"{JOB}","rq_job_id":"rq-1"}}"#))
    }

    fn running(progress: u8) -> ScriptedReply {
        ScriptedReply::ok(format!(r#"{{"status":"running","progress":{progress}}}"#))
    }

    fn done() -> ScriptedReply {
        ScriptedReply::ok(r#"{"status":"done","progress":100}"#)
    }

    fn params() -> AnalysisParameters {
        AnalysisParameters::new("1. e4 e5 2. Nf3 Nc6 *")
    }

    /// Delays every exchange so tests can act while a request is in flight.
    struct SlowTransport {
        inner: ScriptedTransport,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl HttpTransport for SlowTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
            tokio::time::sleep(self.delay).await;
            self.inner.send(request).await
        }
    }

    async fn drain(client: JobClient, updates: BoxStream<'static, JobUpdate>) -> Vec<JobUpdate> {
        drop(client);
        updates.collect().await
    }

    #[tokio::test]
    async fn empty_game_record_never_leaves_idle() {
        let transport = ScriptedTransport::new();
        let client = client(&transport, 10);
        let failure = client
            .submit(AnalysisParameters::new("  \n"))
            .await
            .expect_err("empty record rejected");
        assert_eq!(failure.kind, FailureKind::Usage);
        assert!(failure.retry.is_none());
        assert_eq!(client.state(), JobState::Idle);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn progress_then_single_terminal_transition() {
        let transport = ScriptedTransport::new();
        transport.push(ack()).push(running(10)).push(running(55)).push(done());
        let client = client(&transport, 10);
        let updates = client.subscribe();

        let handle = client.submit(params()).await.expect("submitted");
        assert_eq!(handle.job_id().as_str(), JOB);
        let outcome = client.poll(&handle).await.expect("poll completes");
        assert_eq!(outcome, PollOutcome::Done);
        assert_eq!(client.state(), JobState::Done);

        let states: Vec<JobState> = drain(client, updates)
            .await
            .into_iter()
            .map(|update| update.state)
            .collect();
        assert_eq!(
            states,
            vec![
                JobState::Queued,
                JobState::Running { progress: 10 },
                JobState::Running { progress: 55 },
                JobState::Done,
            ]
        );
        assert_eq!(states.iter().filter(|s| s.is_terminal()).count(), 1);
        assert_eq!(transport.requests().len(), 4);
    }

    #[tokio::test]
    async fn exhausting_attempts_times_out_and_resume_starts_over() {
        let transport = ScriptedTransport::new();
        transport.push(ack()).push_repeated(running(40), 200);
        let client = client(&transport, 200);

        let handle = client.submit(params()).await.expect("submitted");
        let failure = client.poll(&handle).await.expect_err("times out");
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.message.contains("200"));
        assert_eq!(client.state(), JobState::TimedOut);
        assert_eq!(transport.remaining(), 0);

        let Some(RetryAction::ResumePolling(job_id)) = failure.retry else {
            panic!("timeout should offer to resume polling");
        };
        transport.push(running(90)).push(done());
        let outcome = client.resume(&job_id).await.expect("resumed");
        assert_eq!(outcome, PollOutcome::Done);
        // 1 submission, 200 polls, then a fresh count of 2
        assert_eq!(transport.requests().len(), 203);
    }

    #[tokio::test]
    async fn application_error_fails_with_resubmit() {
        let transport = ScriptedTransport::new();
        transport
            .push(ack())
            .push(running(20))
            .push(ScriptedReply::ok(
                r#"{"status":"error","progress":100,"error_message":"Illegal PGN"}"#,
            ));
        let client = client(&transport, 10);

        let handle = client.submit(params()).await.expect("submitted");
        let failure = client.poll(&handle).await.expect_err("job failed");
        assert_eq!(failure.kind, FailureKind::ApplicationError);
        assert!(failure.message.contains("Illegal PGN"));
        assert_eq!(failure.retry, Some(RetryAction::Submit(params())));
        assert_eq!(
            client.state(),
            JobState::Failed {
                reason: "Illegal PGN".into()
            }
        );
    }

    #[tokio::test]
    async fn failure_kinds_are_distinguished() {
        let transport = ScriptedTransport::new();
        transport.push(ScriptedReply::status(500, "enqueue failed"));
        let client = client(&transport, 10);
        let rejected = client.submit(params()).await.expect_err("rejected");
        assert_eq!(rejected.kind, FailureKind::ServerRejected);
        assert_eq!(rejected.retry, Some(RetryAction::Submit(params())));
        assert!(client.state().accepts_submit());

        transport.push(ScriptedReply::Drop("connection refused".into()));
        let dropped = client.submit(params()).await.expect_err("no response");
        assert_eq!(dropped.kind, FailureKind::TransportFailure);

        transport.push(ScriptedReply::ok(r#"{"rq_job_id":"rq-9"}"#));
        let malformed = client.submit(params()).await.expect_err("no job id");
        assert_eq!(malformed.kind, FailureKind::MalformedPayload);
    }

    #[tokio::test]
    async fn status_failure_keeps_job_resumable() {
        let transport = ScriptedTransport::new();
        transport
            .push(ack())
            .push(running(30))
            .push(ScriptedReply::status(502, "bad gateway"));
        let client = client(&transport, 10);

        let handle = client.submit(params()).await.expect("submitted");
        let failure = client.poll(&handle).await.expect_err("gateway error");
        assert_eq!(failure.kind, FailureKind::ServerRejected);
        assert_eq!(
            failure.retry,
            Some(RetryAction::ResumePolling(JobId::new(JOB)))
        );
        assert_eq!(client.state(), JobState::Running { progress: 30 });
    }

    #[tokio::test]
    async fn submit_while_queued_is_a_usage_error() {
        let transport = ScriptedTransport::new();
        transport.push(ack());
        let busy = client(&transport, 1);
        let _handle = busy.submit(params()).await.expect("submitted");

        let failure = busy.submit(params()).await.expect_err("queued job blocks submit");
        assert_eq!(failure.kind, FailureKind::Usage);
        assert_eq!(busy.state(), JobState::Queued);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn timed_out_job_can_be_replaced() {
        let transport = ScriptedTransport::new();
        transport.push(ack()).push(running(5));
        let client = client(&transport, 1);
        let first = client.submit(params()).await.expect("submitted");
        assert!(client.poll(&first).await.is_err());
        assert_eq!(client.state(), JobState::TimedOut);

        transport
            .push(ScriptedReply::ok(r#"{"db_job_id":"a4b6c2d0-1111-4222-8333-944455556666"}"#))
            .push(done());
        let second = client.submit(params()).await.expect("replacement accepted");
        assert!(first.cancel_token().is_cancelled());
        assert!(client.poll(&first).await.is_err());
        assert_eq!(client.poll(&second).await, Ok(PollOutcome::Done));
    }

    #[tokio::test]
    async fn reset_cancels_active_polling() {
        let transport = ScriptedTransport::new();
        transport.push(ack()).push_repeated(running(50), 1000);
        let client = JobClient::new(
            Arc::new(transport.clone()),
            PollingConfig {
                interval_ms: 20,
                ..fast_polling(1000)
            },
        );

        let handle = client.submit(params()).await.expect("submitted");
        let poller = {
            let client = client.clone();
            let handle = handle.clone();
            tokio::spawn(async move { client.poll(&handle).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.reset();

        let outcome = poller.await.expect("poll task joins").expect("cancelled cleanly");
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(client.state(), JobState::Idle);
        assert!(handle.cancel_token().is_cancelled());
        assert!(client.resume(handle.job_id()).await.is_err());
    }

    #[tokio::test]
    async fn one_poll_loop_per_handle() {
        let transport = ScriptedTransport::new();
        transport.push(ack()).push_repeated(running(25), 20);
        let client = JobClient::new(
            Arc::new(transport.clone()),
            PollingConfig {
                interval_ms: 1,
                ..fast_polling(20)
            },
        );
        let handle = client.submit(params()).await.expect("submitted");

        let (first, second) = tokio::join!(client.poll(&handle), client.resume(handle.job_id()));
        assert_eq!(first.expect_err("runs out of attempts").kind, FailureKind::Timeout);
        let rejected = second.expect_err("second loop refused");
        assert_eq!(rejected.kind, FailureKind::Usage);
        assert!(rejected.retry.is_none());
        assert_eq!(transport.requests().len(), 21);

        transport.push(done());
        assert_eq!(client.resume(handle.job_id()).await, Ok(PollOutcome::Done));
    }

    #[tokio::test]
    async fn reset_during_submission_abandons_the_job() {
        let transport = ScriptedTransport::new();
        transport.push(ack());
        let client = JobClient::new(
            Arc::new(SlowTransport {
                inner: transport.clone(),
                delay: Duration::from_millis(50),
            }),
            fast_polling(10),
        );

        let submitting = {
            let client = client.clone();
            tokio::spawn(async move { client.submit(params()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.state(), JobState::Queued);
        client.reset();
        assert_eq!(client.state(), JobState::Idle);

        let failure = submitting
            .await
            .expect("submit task joins")
            .expect_err("abandoned submission");
        assert_eq!(failure.kind, FailureKind::Usage);
        assert_eq!(client.state(), JobState::Idle);
        assert!(client.current_handle().is_none());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn wall_clock_limit_times_out_early() {
        let transport = ScriptedTransport::new();
        transport.push(ack()).push_repeated(running(1), 1000);
        let client = JobClient::new(
            Arc::new(transport.clone()),
            PollingConfig {
                interval_ms: 10,
                wall_clock_limit_ms: Some(30),
                ..fast_polling(1000)
            },
        );
        let handle = client.submit(params()).await.expect("submitted");
        let failure = client.poll(&handle).await.expect_err("wall clock");
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(transport.requests().len() < 100);
    }

    #[tokio::test]
    async fn non_canonical_job_id_is_accepted() {
        let transport = ScriptedTransport::new();
        transport.push(ScriptedReply::ok(r#"{"db_job_id":"legacy-42"}"#));
        let client = client(&transport, 1);
        let handle = client.submit(params()).await.expect("accepted with warning");
        assert_eq!(handle.job_id().as_str(), "legacy-42");
        assert_eq!(client.state(), JobState::Queued);
    }
}
