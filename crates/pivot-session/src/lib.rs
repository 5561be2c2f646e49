//! End-to-end coordination: submit, poll, fetch the report, and hand out navigators.

use std::{future::Future, sync::Arc};

use futures::{stream::BoxStream, FutureExt, StreamExt};
use pivot_board::{MoveApplier, VariationNavigator};
use pivot_network::{HttpTransport, JobClient, PollOutcome, ReportFetch, ReportFetcher};
use pivot_ops::UpdateLog;
use pivot_types::{
    config::PollingConfig,
    events::JobUpdate,
    failure::{Failure, RetryAction},
    job::{AnalysisParameters, JobId, JobState},
    report::Report,
    PivotError,
};
use tracing::{info, warn};

/// A fetched report plus one navigator per reported moment.
pub struct ReportView {
    report: Arc<Report>,
    navigators: Vec<VariationNavigator>,
}

impl ReportView {
    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn navigators(&self) -> &[VariationNavigator] {
        &self.navigators
    }

    pub fn navigator_mut(&mut self, index: usize) -> Option<&mut VariationNavigator> {
        self.navigators.get_mut(index)
    }
}

pub enum SessionOutcome {
    Ready(ReportView),
    /// The job is done but its report is not available yet; fetch again later.
    NotReady(JobId),
    Cancelled,
}

pub struct AnalysisSession {
    jobs: JobClient,
    reports: ReportFetcher,
    applier: Arc<dyn MoveApplier>,
    log: UpdateLog,
}

impl AnalysisSession {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        polling: PollingConfig,
        applier: Arc<dyn MoveApplier>,
    ) -> Self {
        Self {
            jobs: JobClient::new(transport.clone(), polling),
            reports: ReportFetcher::new(transport),
            applier,
            log: UpdateLog::new(),
        }
    }

    pub fn jobs(&self) -> &JobClient {
        &self.jobs
    }

    pub fn log(&self) -> &UpdateLog {
        &self.log
    }

    /// Runs one analysis from submission to report.
    pub async fn run(&self, parameters: AnalysisParameters) -> Result<SessionOutcome, Failure> {
        self.log.clear().await;
        let mut updates = self.jobs.subscribe();
        let polled = self
            .observe(&mut updates, async move {
                match self.jobs.submit(parameters).await {
                    Ok(handle) => self.jobs.poll(&handle).await,
                    Err(failure) => Err(failure),
                }
            })
            .await;
        self.after_poll(polled?).await
    }

    /// Fetches the report of the job that just finished.
    pub async fn fetch_report(&self) -> Result<SessionOutcome, Failure> {
        let state = self.jobs.state();
        let handle = match (state, self.jobs.current_handle()) {
            (JobState::Done, Some(handle)) => handle,
            (state, _) => {
                return Err(Failure::terminal(PivotError::Usage(format!(
                    "report requested while job is {state:?}"
                ))))
            }
        };
        let params = handle.parameters();
        self.fetch(handle.job_id(), params.depth, params.max_pivots)
            .await
    }

    /// Re-runs the operation described by a failure's retry action.
    pub async fn retry(&self, action: &RetryAction) -> Result<SessionOutcome, Failure> {
        info!("Retrying {:?}", action);
        match action {
            RetryAction::Submit(parameters) => self.run(parameters.clone()).await,
            RetryAction::ResumePolling(job_id) => {
                let mut updates = self.jobs.subscribe();
                let polled = self
                    .observe(&mut updates, self.jobs.resume(job_id))
                    .await;
                self.after_poll(polled?).await
            }
            RetryAction::FetchReport {
                job_id,
                depth,
                max_items,
            } => {
                if self.jobs.state() != JobState::Done {
                    return Err(Failure::terminal(PivotError::Usage(
                        "report requested before the job finished".into(),
                    )));
                }
                self.fetch(job_id, *depth, *max_items).await
            }
        }
    }

    /// Abandons the current job, stopping any poll loop.
    pub fn reset(&self) {
        self.jobs.reset();
    }

    async fn after_poll(&self, outcome: PollOutcome) -> Result<SessionOutcome, Failure> {
        match outcome {
            PollOutcome::Done => self.fetch_report().await,
            PollOutcome::Cancelled => Ok(SessionOutcome::Cancelled),
        }
    }

    async fn fetch(
        &self,
        job_id: &JobId,
        depth: u32,
        max_items: u32,
    ) -> Result<SessionOutcome, Failure> {
        match self.reports.fetch(job_id, depth, max_items).await? {
            ReportFetch::NotReady => Ok(SessionOutcome::NotReady(job_id.clone())),
            ReportFetch::Ready(report) => {
                if let Some(handle) = self.jobs.current_handle() {
                    if handle.job_id() == job_id {
                        for issue in report.conformance_issues(handle.parameters()) {
                            warn!("Report for job {}: {}", job_id, issue);
                        }
                    }
                }
                Ok(SessionOutcome::Ready(self.build_view(report)))
            }
        }
    }

    fn build_view(&self, report: Report) -> ReportView {
        let navigators = report
            .moments
            .iter()
            .map(|moment| VariationNavigator::new(Arc::new(moment.clone()), self.applier.clone()))
            .collect();
        ReportView {
            report: Arc::new(report),
            navigators,
        }
    }

    /// Runs `work` while recording each update as it is emitted, so a long
    /// poll never overruns the update channel.
    async fn observe<T>(
        &self,
        updates: &mut BoxStream<'static, JobUpdate>,
        work: impl Future<Output = T>,
    ) -> T {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                Some(update) = updates.next() => self.log.record(update).await,
                out = &mut work => {
                    self.drain(updates).await;
                    return out;
                }
            }
        }
    }

    /// Moves every update already emitted into the session log.
    async fn drain(&self, updates: &mut BoxStream<'static, JobUpdate>) {
        while let Some(Some(update)) = updates.next().now_or_never() {
            self.log.record(update).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use pivot_board::PlacementApplier;
    use pivot_network::{ApiRequest, ScriptedReply, ScriptedTransport};
    use pivot_types::{board::Position, failure::FailureKind, game::LineSelector};

    use super::*;

    const JOB: &str = "6f1c3e9a-2b7d-4c48-9a0e-5d3b8f7a1c24";
    const PGN: &str = "[White \"Ana\"]\n[Black \"Ben\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bc4 Nd4 4. Nxe5 Qg5 *";
    const BEFORE_NXE5: &str = "r1bqkbnr/pppp1ppp/8/4p3/2BnP3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4";
    const SECOND_FEN: &str = "r1bqkbnr/pppp1ppp/8/4N3/2BnP3/8/PPPP1PPP/RNBQK2R b KQkq - 0 4";

    fn params() -> AnalysisParameters {
        AnalysisParameters {
            pgn: PGN.into(),
            depth: 14,
            max_pivots: 10,
            swing_threshold_cp: 80,
            min_ply_gap: 2,
            multipv: 2,
        }
    }

    fn report_body() -> String {
        serde_json::json!({
            "job_id": JOB,
            "headers": {"White": "Ana", "Black": "Ben", "Result": "*"},
            "pivotal_moments": [
                {
                    "ply": 7,
                    "side_to_move": "White",
                    "fen_before": BEFORE_NXE5,
                    "uci_played": "f3e5",
                    "san_played": "Nxe5",
                    "uci_best": "f3d4",
                    "san_best": "Nxd4",
                    "eval_before_cp": 40,
                    "eval_after_played_cp": -150,
                    "pv_best": [
                        {"uci": "f3d4", "san": "Nxd4",
                         "fen_after": "r1bqkbnr/pppp1ppp/8/4p3/2BNP3/8/PPPP1PPP/RNBQK2R b KQkq - 0 4"},
                        {"uci": "e5d4", "san": "exd4",
                         "fen_after": "r1bqkbnr/pppp1ppp/8/8/2BpP3/8/PPPP1PPP/RNBQK2R w KQkq - 0 5"}
                    ],
                    "pv_played": [
                        {"uci": "f3e5", "san": "Nxe5"},
                        {"uci": "d8g5", "san": "Qg5"},
                        {"uci": "e5f7", "san": "Nxf7"}
                    ],
                    "candidates": [
                        {"uci": "f3d4", "san": "Nxd4", "eval_cp": 35,
                         "pv": [{"uci": "f3d4", "san": "Nxd4"}, {"uci": "e5d4", "san": "exd4"}]},
                        {"uci": "c2c3", "san": "c3", "eval_cp": 10, "pv": []}
                    ]
                },
                {
                    "ply": 10,
                    "side_to_move": "Black",
                    "fen_before": SECOND_FEN,
                    "uci_played": "d8g5",
                    "san_played": "Qg5",
                    "delta_cp": 95,
                    "severity": "inaccuracy"
                }
            ],
            "coach_report": {"summary": "Sharp opening", "themes": ["loose pieces"]}
        })
        .to_string()
    }

    fn session(transport: &ScriptedTransport) -> AnalysisSession {
        session_with(
            transport,
            PollingConfig {
                interval_ms: 0,
                max_attempts: 200,
                wall_clock_limit_ms: None,
                update_capacity: 512,
            },
        )
    }

    fn session_with(transport: &ScriptedTransport, polling: PollingConfig) -> AnalysisSession {
        AnalysisSession::new(
            Arc::new(transport.clone()),
            polling,
            Arc::new(PlacementApplier::new()),
        )
    }

    fn ack() -> ScriptedReply {
        ScriptedReply::ok(format!(r#"{{"db_job_id":"{JOB}"}}"#))
    }

    fn running(progress: u8) -> ScriptedReply {
        ScriptedReply::ok(format!(r#"{{"status":"running","progress":{progress}}}"#))
    }

    fn done() -> ScriptedReply {
        ScriptedReply::ok(r#"{"status":"done","progress":100}"#)
    }

    fn expect_view(outcome: SessionOutcome) -> ReportView {
        match outcome {
            SessionOutcome::Ready(view) => view,
            SessionOutcome::NotReady(_) => panic!("report not ready"),
            SessionOutcome::Cancelled => panic!("session cancelled"),
        }
    }

    #[tokio::test]
    async fn submit_poll_fetch_and_navigate() {
        let transport = ScriptedTransport::new();
        transport
            .push(ack())
            .push(running(10))
            .push(running(55))
            .push(done())
            .push(ScriptedReply::ok(report_body()));
        let session = session(&transport);

        let mut view = expect_view(session.run(params()).await.expect("analysis succeeds"));
        let parameters = params();
        let report = view.report();
        assert!(report.moments.len() <= parameters.max_pivots as usize);
        assert!(report.conformance_issues(&parameters).is_empty());
        for pair in report.moments.windows(2) {
            assert!(pair[1].ply - pair[0].ply >= parameters.min_ply_gap);
        }
        for moment in &report.moments {
            assert!(moment.delta_cp.unsigned_abs() >= parameters.swing_threshold_cp);
        }
        assert_eq!(session.log().progress_trail().await, vec![10, 55]);

        let requests = transport.requests();
        assert_eq!(requests[0], ApiRequest::Submit(parameters.clone()));
        assert_eq!(
            requests.last(),
            Some(&ApiRequest::Report {
                job_id: pivot_types::job::JobId::new(JOB),
                depth: 14,
                max_items: 10
            })
        );

        assert_eq!(view.navigators().len(), 2);
        let nav = view.navigator_mut(0).expect("first moment");
        // candidate line has no precomputed positions, so it is replayed
        assert_eq!(nav.step(5), 2);
        assert_eq!(
            nav.current_position(),
            &Position::new("r1bqkbnr/pppp1ppp/8/8/2BpP3/8/PPPP1PPP/RNBQK2R w KQkq - 0 5")
        );

        nav.select_line(LineSelector::Played);
        assert_eq!(nav.current_position(), &Position::new(BEFORE_NXE5));
        assert_eq!(nav.step(3), 3);
        assert_eq!(nav.current_move_label().to_string(), "Nxf7");
        assert!(!nav.is_truncated());
    }

    #[tokio::test]
    async fn long_jobs_keep_every_update_with_a_small_channel() {
        let transport = ScriptedTransport::new();
        transport.push(ack());
        for progress in 1..=10 {
            transport.push(running(progress));
        }
        transport.push(done()).push(ScriptedReply::ok(report_body()));
        let session = session_with(
            &transport,
            PollingConfig {
                interval_ms: 1,
                max_attempts: 200,
                wall_clock_limit_ms: None,
                update_capacity: 4,
            },
        );

        expect_view(session.run(params()).await.expect("analysis succeeds"));
        assert_eq!(
            session.log().progress_trail().await,
            (1..=10).collect::<Vec<u8>>()
        );
        let states: Vec<JobState> = session
            .log()
            .snapshot()
            .await
            .into_iter()
            .map(|update| update.state)
            .collect();
        assert_eq!(states.first(), Some(&JobState::Queued));
        assert_eq!(states.last(), Some(&JobState::Done));
        assert_eq!(states.len(), 12);
    }

    #[tokio::test]
    async fn empty_record_is_rejected_before_any_request() {
        let transport = ScriptedTransport::new();
        let session = session(&transport);
        let failure = session
            .run(AnalysisParameters::new(""))
            .await
            .err()
            .expect("rejected");
        assert_eq!(failure.kind, FailureKind::Usage);
        assert!(transport.requests().is_empty());
        assert_eq!(session.jobs().state(), JobState::Idle);
    }

    #[tokio::test]
    async fn report_before_completion_is_a_usage_error() {
        let transport = ScriptedTransport::new();
        let session = session(&transport);
        let failure = session.fetch_report().await.err().expect("not done");
        assert_eq!(failure.kind, FailureKind::Usage);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn retries_follow_the_failed_operation() {
        let transport = ScriptedTransport::new();
        transport
            .push(ack())
            .push(running(20))
            .push(ScriptedReply::Drop("connection reset".into()));
        let session = session(&transport);

        let failure = session.run(params()).await.err().expect("status lost");
        assert_eq!(failure.kind, FailureKind::TransportFailure);
        let retry = failure.retry.expect("resumable");
        assert_eq!(retry, RetryAction::ResumePolling(JobId::new(JOB)));

        transport
            .push(done())
            .push(ScriptedReply::status(404, r#"{"detail":"Report not found"}"#));
        let outcome = session.retry(&retry).await.expect("resumed");
        assert!(matches!(outcome, SessionOutcome::NotReady(ref id) if id.as_str() == JOB));

        transport.push(ScriptedReply::status(503, "busy"));
        let failure = session.fetch_report().await.err().expect("fetch failed");
        assert_eq!(failure.kind, FailureKind::ReportFetchFailed);

        transport.push(ScriptedReply::ok(report_body()));
        let view = expect_view(
            session
                .retry(&failure.retry.expect("fetch retry"))
                .await
                .expect("fetched"),
        );
        assert_eq!(view.report().narrative.summary, "Sharp opening");
    }

    #[tokio::test]
    async fn application_error_offers_resubmission() {
        let transport = ScriptedTransport::new();
        transport
            .push(ack())
            .push(ScriptedReply::ok(r#"{"status":"error","error":"engine crashed"}"#));
        let session = session(&transport);

        let failure = session.run(params()).await.err().expect("job failed");
        assert_eq!(failure.kind, FailureKind::ApplicationError);
        assert_eq!(failure.title, "Analysis failed");

        transport
            .push(ack())
            .push(done())
            .push(ScriptedReply::ok(report_body()));
        let retry = failure.retry.expect("resubmit");
        let view = expect_view(session.retry(&retry).await.expect("second run"));
        assert_eq!(view.navigators().len(), 2);
    }
}
