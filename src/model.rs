use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named step of the remote pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Relevance,
    Retrieval,
    Research,
    Verify,
}

impl Stage {
    /// All stages in pipeline order; also the render order for the trace panel.
    pub const ALL: [Stage; 4] = [
        Stage::Relevance,
        Stage::Retrieval,
        Stage::Research,
        Stage::Verify,
    ];

    /// Wire name used in the `agent` field of stream frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Relevance => "relevance",
            Stage::Retrieval => "retrieval",
            Stage::Research => "research",
            Stage::Verify => "verify",
        }
    }

    /// Parse a wire stage name. Unknown names return `None` so events from
    /// newer server stages are ignored rather than rejected.
    pub fn from_wire(s: &str) -> Option<Stage> {
        match s {
            "relevance" => Some(Stage::Relevance),
            "retrieval" => Some(Stage::Retrieval),
            "research" => Some(Stage::Research),
            "verify" => Some(Stage::Verify),
            _ => None,
        }
    }

    /// Human-readable label for UI layers.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Relevance => "Relevance check",
            Stage::Retrieval => "Retrieval",
            Stage::Research => "Research",
            Stage::Verify => "Verification",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Idle,
    Running,
    Done,
    Error,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Idle => "idle",
            StageStatus::Running => "running",
            StageStatus::Done => "done",
            StageStatus::Error => "error",
        }
    }
}

/// Latest known state of one stage. Each inbound event overwrites the
/// previous state wholesale; no per-stage history is kept.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageState {
    pub status: StageStatus,
    pub summary: Option<String>,
    pub elapsed_ms: Option<u64>,
    /// Last raw frame received for this stage, retained for diagnostics.
    pub raw_event: Option<Value>,
}

/// One `agent` frame from the stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StageEvent {
    pub agent: String,
    pub status: StageStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub ms: Option<u64>,
    /// Full frame as received, including fields we do not model (`preview`, ...).
    #[serde(skip)]
    pub raw: Value,
}

/// One source chunk backing the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

/// The `final` frame as it appears on the wire. Everything is optional:
/// a pipeline failure arrives as a bare `{"error": "..."}` object.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinalFrame {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub is_relevant: Option<bool>,
    #[serde(default)]
    pub draft_answer: Option<String>,
    #[serde(default)]
    pub verification_report: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceItem>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Terminal payload of a successful run, stamped with request context for
/// saving and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    #[serde(default)]
    pub timestamp_utc: String,
    pub question: String,
    #[serde(default)]
    pub doc_id: String,
    pub is_relevant: Option<bool>,
    pub draft_answer: Option<String>,
    pub verification_report: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceItem>,
}

impl FinalResult {
    /// Build a result from a successful final frame. The frame's question
    /// wins when present; otherwise the originating query is used.
    pub fn from_frame(frame: FinalFrame, request: &AskRequest, timestamp_utc: String) -> Self {
        Self {
            timestamp_utc,
            question: frame.question.unwrap_or_else(|| request.question.clone()),
            doc_id: request.doc_id.clone(),
            is_relevant: frame.is_relevant,
            draft_answer: frame.draft_answer,
            verification_report: frame.verification_report,
            sources: frame.sources,
        }
    }
}

/// Per-run input supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub doc_id: String,
    pub top_k_sources: u32,
}

/// Lifecycle phase of the live run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Idle,
    Running,
    Done,
    Error,
}

/// Identity of one run. Stream messages carry the id of the run that
/// produced them; messages from a superseded run are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunId(pub(crate) u64);

/// Discriminated union of everything the transport can deliver.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Stage(StageEvent),
    /// A stage frame that failed to decode. Dropped by the controller;
    /// a single corrupt frame must not abort the run.
    Malformed { reason: String },
    // Box to keep StreamEvent small; FinalFrame carries the sources vector.
    Final(Box<FinalFrame>),
    /// Connection failed or the stream ended without a terminal frame.
    TransportFailed { reason: String },
}

/// Envelope pairing a stream event with the run that produced it.
#[derive(Debug, Clone)]
pub struct RunMessage {
    pub run: RunId,
    pub event: StreamEvent,
}
