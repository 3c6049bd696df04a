//! Run lifecycle controller.
//!
//! Owns the live stream resource for one query execution, applies inbound
//! stream events to the stage tracker, and captures the terminal result or
//! error. Presentation layers read state through the accessors and never
//! mutate it directly.

use crate::api::ApiClient;
use crate::model::{
    AskRequest, FinalResult, RunId, RunMessage, RunPhase, Stage, StageState, StreamEvent,
};
use crate::orchestrator::stream;
use crate::orchestrator::tracker::StageTracker;
use crate::storage;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Pre-flight request validation failures. Surfaced to the caller directly;
/// they never enter run state because no run was started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("question must not be empty")]
    EmptyQuestion,
    #[error("no document selected")]
    NoDocument,
    #[error("top_k_sources must be between 0 and 50")]
    TopKOutOfRange,
}

/// The exclusively owned live stream: its id, the request that opened it,
/// and the transport task handle. Released on every exit path.
struct LiveStream {
    id: RunId,
    request: AskRequest,
    task: Option<tokio::task::JoinHandle<()>>,
}

pub struct RunController {
    client: ApiClient,
    runtime: tokio::runtime::Handle,
    stream_timeout: Option<Duration>,
    event_tx: UnboundedSender<RunMessage>,
    tracker: StageTracker,
    phase: RunPhase,
    error_message: Option<String>,
    result: Option<FinalResult>,
    live: Option<LiveStream>,
    next_run: u64,
    events_dropped: u64,
}

impl RunController {
    /// Create a controller and the receiver its stream tasks will feed.
    /// The owner loop is expected to pass every received message back into
    /// [`RunController::handle`].
    pub fn new(
        client: ApiClient,
        runtime: tokio::runtime::Handle,
        stream_timeout: Option<Duration>,
    ) -> (Self, UnboundedReceiver<RunMessage>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                client,
                runtime,
                stream_timeout,
                event_tx,
                tracker: StageTracker::new(),
                phase: RunPhase::Idle,
                error_message: None,
                result: None,
                live: None,
                next_run: 0,
                events_dropped: 0,
            },
            event_rx,
        )
    }

    /// Validate the request and start a new run, superseding any live one.
    /// On validation failure nothing changes and no stream is opened.
    pub fn start(&mut self, request: &AskRequest) -> Result<RunId, ValidationError> {
        let request = validate(request)?;
        let id = self.begin(request.clone());
        let task = self.runtime.spawn(stream::run_stream(
            self.client.clone(),
            request,
            id,
            self.event_tx.clone(),
            self.stream_timeout,
        ));
        if let Some(live) = self.live.as_mut() {
            live.task = Some(task);
        }
        Ok(id)
    }

    /// Reset run state and register a new live run. Transport attachment is
    /// left to the caller; tests drive the state machine through this plus
    /// [`RunController::handle`] without any network.
    fn begin(&mut self, request: AskRequest) -> RunId {
        self.release_stream();
        self.tracker.reset();
        // The server opens every run with a relevance event; mark it running
        // now so the trace shows activity during connect latency.
        self.tracker.mark_running(Stage::Relevance);
        self.phase = RunPhase::Running;
        self.error_message = None;
        self.result = None;
        self.events_dropped = 0;
        self.next_run += 1;
        let id = RunId(self.next_run);
        self.live = Some(LiveStream {
            id,
            request,
            task: None,
        });
        id
    }

    /// Dispatch one inbound stream message. Messages from a superseded or
    /// cancelled run are discarded; their stream handle no longer matches.
    pub fn handle(&mut self, msg: RunMessage) {
        match &self.live {
            Some(live) if live.id == msg.run => {}
            _ => return,
        }
        if self.phase != RunPhase::Running {
            return;
        }

        match msg.event {
            StreamEvent::Stage(event) => {
                if !self.tracker.apply(&event) {
                    self.events_dropped += 1;
                }
            }
            StreamEvent::Malformed { .. } => {
                // One corrupt frame must not abort an otherwise healthy run.
                self.events_dropped += 1;
            }
            StreamEvent::Final(mut frame) => {
                if let Some(error) = frame.error.take() {
                    self.fail(error);
                } else if let Some(live) = self.live.as_ref() {
                    self.result = Some(FinalResult::from_frame(
                        *frame,
                        &live.request,
                        storage::now_rfc3339(),
                    ));
                    self.phase = RunPhase::Done;
                    self.release_stream();
                }
            }
            StreamEvent::TransportFailed { reason } => {
                // The pipeline terminated abnormally: verification never
                // completed unless we already saw it finish.
                if let Some(&last) = Stage::ALL.last() {
                    self.tracker.mark_error_unless_done(last);
                }
                self.fail(reason);
            }
        }
    }

    /// Abort the live stream. Returns the phase to idle unless the run
    /// already reached a terminal state; result and tracker are untouched.
    pub fn cancel(&mut self) {
        self.release_stream();
        if self.phase == RunPhase::Running {
            self.phase = RunPhase::Idle;
        }
    }

    /// Cancel plus full state wipe back to idle. Safe mid-run.
    pub fn reset(&mut self) {
        self.release_stream();
        self.tracker.reset();
        self.phase = RunPhase::Idle;
        self.error_message = None;
        self.result = None;
        self.events_dropped = 0;
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn result(&self) -> Option<&FinalResult> {
        self.result.as_ref()
    }

    /// Count of frames dropped this run: malformed stage events plus events
    /// naming stages this client does not know.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped
    }

    pub fn snapshot(&self) -> Vec<(Stage, StageState)> {
        self.tracker.snapshot()
    }

    fn fail(&mut self, message: String) {
        self.error_message = Some(message);
        self.phase = RunPhase::Error;
        self.release_stream();
    }

    fn release_stream(&mut self) {
        if let Some(live) = self.live.take() {
            if let Some(task) = live.task {
                task.abort();
            }
        }
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        self.release_stream();
    }
}

fn validate(request: &AskRequest) -> Result<AskRequest, ValidationError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ValidationError::EmptyQuestion);
    }
    let doc_id = request.doc_id.trim();
    if doc_id.is_empty() {
        return Err(ValidationError::NoDocument);
    }
    if request.top_k_sources > 50 {
        return Err(ValidationError::TopKOutOfRange);
    }
    Ok(AskRequest {
        question: question.to_string(),
        doc_id: doc_id.to_string(),
        top_k_sources: request.top_k_sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FinalFrame, StageEvent, StageStatus};
    use serde_json::json;

    fn controller() -> RunController {
        // Port 9 (discard) is never served; nothing in these tests connects.
        let client = ApiClient::new("http://127.0.0.1:9", "docchat-trace-test").unwrap();
        let (controller, _rx) = RunController::new(client, tokio::runtime::Handle::current(), None);
        controller
    }

    fn request() -> AskRequest {
        AskRequest {
            question: "What is the refund policy?".into(),
            doc_id: "policy.pdf".into(),
            top_k_sources: 5,
        }
    }

    fn stage_msg(run: RunId, agent: &str, status: StageStatus, summary: Option<&str>) -> RunMessage {
        RunMessage {
            run,
            event: StreamEvent::Stage(StageEvent {
                agent: agent.to_string(),
                status,
                summary: summary.map(str::to_string),
                ms: None,
                raw: json!({"agent": agent}),
            }),
        }
    }

    fn final_msg(run: RunId, frame: FinalFrame) -> RunMessage {
        RunMessage {
            run,
            event: StreamEvent::Final(Box::new(frame)),
        }
    }

    #[tokio::test]
    async fn start_rejects_blank_question_without_touching_state() {
        let mut c = controller();
        let err = c
            .start(&AskRequest {
                question: "   ".into(),
                ..request()
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyQuestion);
        assert_eq!(c.phase(), RunPhase::Idle);
        assert!(c
            .snapshot()
            .iter()
            .all(|(_, s)| s.status == StageStatus::Idle));
    }

    #[tokio::test]
    async fn start_rejects_missing_document() {
        let mut c = controller();
        let err = c
            .start(&AskRequest {
                doc_id: "".into(),
                ..request()
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::NoDocument);
        assert_eq!(c.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn start_rejects_out_of_range_top_k() {
        let mut c = controller();
        let err = c
            .start(&AskRequest {
                top_k_sources: 51,
                ..request()
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::TopKOutOfRange);
    }

    #[tokio::test]
    async fn begin_marks_first_stage_running() {
        let mut c = controller();
        c.begin(request());
        assert_eq!(c.phase(), RunPhase::Running);
        let snapshot = c.snapshot();
        assert_eq!(snapshot[0].1.status, StageStatus::Running);
        assert!(snapshot[1..]
            .iter()
            .all(|(_, s)| s.status == StageStatus::Idle));
    }

    #[tokio::test]
    async fn successful_run_captures_result() {
        let mut c = controller();
        let run = c.begin(request());

        c.handle(stage_msg(
            run,
            "relevance",
            StageStatus::Done,
            Some("Found relevant content"),
        ));
        c.handle(final_msg(
            run,
            FinalFrame {
                question: Some("What is the refund policy?".into()),
                is_relevant: Some(true),
                draft_answer: Some("Refunds within 30 days.".into()),
                ..FinalFrame::default()
            },
        ));

        assert_eq!(c.phase(), RunPhase::Done);
        let snapshot = c.snapshot();
        assert_eq!(snapshot[0].1.status, StageStatus::Done);
        assert_eq!(snapshot[0].1.summary.as_deref(), Some("Found relevant content"));
        let result = c.result().unwrap();
        assert_eq!(result.draft_answer.as_deref(), Some("Refunds within 30 days."));
        assert_eq!(result.doc_id, "policy.pdf");
        assert!(c.error_message().is_none());
    }

    #[tokio::test]
    async fn pipeline_error_sets_message_and_leaves_result_unset() {
        let mut c = controller();
        let run = c.begin(request());

        c.handle(final_msg(
            run,
            FinalFrame {
                error: Some("LLM quota exceeded".into()),
                ..FinalFrame::default()
            },
        ));

        assert_eq!(c.phase(), RunPhase::Error);
        assert_eq!(c.error_message(), Some("LLM quota exceeded"));
        assert!(c.result().is_none());
    }

    #[tokio::test]
    async fn transport_failure_marks_last_stage_error() {
        let mut c = controller();
        let run = c.begin(request());
        c.handle(stage_msg(run, "relevance", StageStatus::Done, None));

        c.handle(RunMessage {
            run,
            event: StreamEvent::TransportFailed {
                reason: "stream dropped".into(),
            },
        });

        assert_eq!(c.phase(), RunPhase::Error);
        assert_eq!(c.error_message(), Some("stream dropped"));
        let snapshot = c.snapshot();
        assert_eq!(snapshot.last().unwrap().1.status, StageStatus::Error);
        // Completed stages keep their state.
        assert_eq!(snapshot[0].1.status, StageStatus::Done);
    }

    #[tokio::test]
    async fn transport_failure_spares_a_completed_last_stage() {
        let mut c = controller();
        let run = c.begin(request());
        c.handle(stage_msg(run, "verify", StageStatus::Done, None));

        c.handle(RunMessage {
            run,
            event: StreamEvent::TransportFailed {
                reason: "stream dropped".into(),
            },
        });

        assert_eq!(c.snapshot().last().unwrap().1.status, StageStatus::Done);
        assert_eq!(c.phase(), RunPhase::Error);
    }

    #[tokio::test]
    async fn only_the_first_failure_is_surfaced() {
        let mut c = controller();
        let run = c.begin(request());

        c.handle(RunMessage {
            run,
            event: StreamEvent::TransportFailed {
                reason: "first".into(),
            },
        });
        c.handle(RunMessage {
            run,
            event: StreamEvent::TransportFailed {
                reason: "second".into(),
            },
        });

        assert_eq!(c.error_message(), Some("first"));
    }

    #[tokio::test]
    async fn malformed_and_unknown_events_are_dropped_and_counted() {
        let mut c = controller();
        let run = c.begin(request());
        let before = c.snapshot();

        c.handle(RunMessage {
            run,
            event: StreamEvent::Malformed {
                reason: "bad agent frame".into(),
            },
        });
        c.handle(stage_msg(run, "summarize", StageStatus::Done, None));

        assert_eq!(c.events_dropped(), 2);
        assert_eq!(c.phase(), RunPhase::Running);
        let after = c.snapshot();
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.1.status, a.1.status);
        }
    }

    #[tokio::test]
    async fn late_events_after_cancel_are_discarded() {
        let mut c = controller();
        let run = c.begin(request());
        c.cancel();
        assert_eq!(c.phase(), RunPhase::Idle);

        c.handle(stage_msg(run, "retrieval", StageStatus::Done, Some("late")));

        assert!(c.snapshot().iter().all(|(_, s)| s.summary.is_none()));
        assert_eq!(c.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn events_from_a_superseded_run_are_discarded() {
        let mut c = controller();
        let old = c.begin(request());
        let new = c.begin(request());
        assert_ne!(old, new);

        c.handle(stage_msg(old, "retrieval", StageStatus::Done, Some("stale")));
        assert!(c.snapshot().iter().all(|(_, s)| s.summary.is_none()));

        c.handle(stage_msg(new, "retrieval", StageStatus::Done, Some("live")));
        assert_eq!(
            c.snapshot()[1].1.summary.as_deref(),
            Some("live")
        );
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let mut c = controller();
        let run = c.begin(request());
        c.handle(final_msg(run, FinalFrame::default()));
        assert_eq!(c.phase(), RunPhase::Done);

        c.cancel();

        assert_eq!(c.phase(), RunPhase::Done);
        assert!(c.result().is_some());
    }

    #[tokio::test]
    async fn reset_returns_everything_to_idle() {
        let mut c = controller();
        let run = c.begin(request());
        c.handle(stage_msg(run, "relevance", StageStatus::Done, Some("ok")));
        c.handle(final_msg(
            run,
            FinalFrame {
                error: Some("boom".into()),
                ..FinalFrame::default()
            },
        ));

        c.reset();

        assert_eq!(c.phase(), RunPhase::Idle);
        assert!(c.error_message().is_none());
        assert!(c.result().is_none());
        assert_eq!(c.events_dropped(), 0);
        assert!(c
            .snapshot()
            .iter()
            .all(|(_, s)| s.status == StageStatus::Idle));
    }

    #[tokio::test]
    async fn start_with_unreachable_server_reports_transport_failure() {
        let client = ApiClient::new("http://127.0.0.1:9", "docchat-trace-test").unwrap();
        let (mut c, mut rx) = RunController::new(client, tokio::runtime::Handle::current(), None);

        c.start(&request()).unwrap();
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg.event, StreamEvent::TransportFailed { .. }));
        c.handle(msg);

        assert_eq!(c.phase(), RunPhase::Error);
        assert!(c.error_message().is_some());
    }
}
