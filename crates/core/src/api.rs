//! JSON request/response surface over an [`Orchestrator`].
//!
//! Transport-agnostic: the CLI feeds it one JSON object per line, but any
//! front end can deserialize an [`ApiRequest`] and call [`dispatch`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    chunk::plan,
    error::ValidationError,
    orchestrator::{JobRequest, Orchestrator},
    registry::{ProgressRecord, TaskId},
    stages::StageKind,
    types::Languages,
    vocabulary::KnownWordSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOperation {
    Pipeline,
    Transcribe,
    Filter,
    Translate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRequest {
    pub start_seconds: f64,
    pub end_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub operation: SubmitOperation,
    pub video_ref: PathBuf,
    #[serde(default)]
    pub range: Option<RangeRequest>,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub known_words: Vec<String>,
}

impl SubmitRequest {
    fn languages(&self) -> Languages {
        let defaults = Languages::default();
        Languages::new(
            self.source_lang.clone().unwrap_or(defaults.source),
            self.target_lang.clone().unwrap_or(defaults.target),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ApiRequest {
    Submit(SubmitRequest),
    Progress { task_id: String },
    Cancel { task_id: String },
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ApiResponse {
    Submitted { task_id: TaskId },
    Progress { record: ProgressRecord },
    Cancel { accepted: bool },
    Tasks { records: Vec<ProgressRecord> },
    Error { kind: String, message: String },
}

impl From<ValidationError> for ApiResponse {
    fn from(e: ValidationError) -> Self {
        ApiResponse::Error {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

async fn submit(orch: &Orchestrator, request: SubmitRequest) -> Result<TaskId, ValidationError> {
    let languages = request.languages();
    let known: KnownWordSet = request.known_words.iter().collect();

    if let Some(range) = request.range {
        if request.operation != SubmitOperation::Pipeline {
            return Err(ValidationError::UnsupportedOperation(format!(
                "a range can only be combined with the pipeline operation, got {:?}",
                request.operation
            )));
        }
        let chunk = plan(&request.video_ref, range.start_seconds, range.end_seconds)?;
        return orch.submit_chunk(chunk, languages, known).await;
    }

    let job = JobRequest::new(request.video_ref, languages, known);
    match request.operation {
        SubmitOperation::Pipeline => orch.submit_full_pipeline(job).await,
        SubmitOperation::Transcribe => orch.submit_stage(StageKind::Transcribe, job).await,
        SubmitOperation::Filter => orch.submit_stage(StageKind::Filter, job).await,
        SubmitOperation::Translate => orch.apply_selective_translation(job).await,
    }
}

pub async fn dispatch(orch: &Orchestrator, request: ApiRequest) -> ApiResponse {
    match request {
        ApiRequest::Submit(request) => match submit(orch, request).await {
            Ok(task_id) => ApiResponse::Submitted { task_id },
            Err(e) => {
                tracing::debug!(error = %e, "submission rejected");
                e.into()
            }
        },
        ApiRequest::Progress { task_id } => ApiResponse::Progress {
            record: orch.poll_progress(&task_id),
        },
        ApiRequest::Cancel { task_id } => ApiResponse::Cancel {
            accepted: orch.cancel(&task_id),
        },
        ApiRequest::List => ApiResponse::Tasks {
            records: orch.registry().snapshot(),
        },
    }
}

/// Parse one JSON request line and dispatch it. Parse failures become an
/// `error` response of kind `bad_request`.
pub async fn dispatch_line(orch: &Orchestrator, line: &str) -> ApiResponse {
    match serde_json::from_str::<ApiRequest>(line) {
        Ok(request) => dispatch(orch, request).await,
        Err(e) => ApiResponse::Error {
            kind: "bad_request".to_string(),
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        capabilities::Capabilities,
        config::PipelineConfig,
        registry::{MISSING_TASK_MESSAGE, TaskRegistry, TaskStatus},
        testing::{MockSpeech, MockTranslator},
    };

    fn orchestrator() -> Orchestrator {
        let capabilities = Capabilities::new(
            Arc::new(MockSpeech::new("")),
            Arc::new(MockTranslator::default()),
        );
        Orchestrator::new(TaskRegistry::new(), capabilities, PipelineConfig::default())
    }

    #[test]
    fn test_submit_request_json_shape() {
        let req: ApiRequest = serde_json::from_value(json!({
            "type": "submit",
            "operation": "pipeline",
            "videoRef": "/v/folge.mp4",
            "range": {"startSeconds": 0.0, "endSeconds": 60.0},
            "targetLang": "fr",
            "knownWords": ["hallo"]
        }))
        .unwrap();

        let ApiRequest::Submit(submit) = req else {
            panic!("expected submit");
        };
        assert_eq!(submit.operation, SubmitOperation::Pipeline);
        assert_eq!(submit.range.unwrap().end_seconds, 60.0);
        assert_eq!(submit.languages(), Languages::new("de", "fr"));
        assert_eq!(submit.known_words, vec!["hallo"]);
    }

    #[test]
    fn test_progress_request_uses_camel_case_id() {
        let req: ApiRequest =
            serde_json::from_str(r#"{"type":"progress","taskId":"abc"}"#).unwrap();
        assert_eq!(
            req,
            ApiRequest::Progress {
                task_id: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_response_json_shape() {
        let resp = ApiResponse::Submitted {
            task_id: TaskId::new("pipeline_x_none_1"),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"type": "submitted", "taskId": "pipeline_x_none_1"})
        );

        let resp = ApiResponse::Cancel { accepted: false };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"type": "cancel", "accepted": false})
        );
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected() {
        let orch = orchestrator();
        let resp = dispatch_line(
            &orch,
            r#"{"type":"submit","operation":"pipeline","videoRef":"/v.mp4","range":{"startSeconds":120,"endSeconds":60}}"#,
        )
        .await;

        match resp {
            ApiResponse::Error { kind, .. } => assert_eq!(kind, "invalid_range"),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_range_with_single_stage_is_unsupported() {
        let orch = orchestrator();
        let resp = dispatch_line(
            &orch,
            r#"{"type":"submit","operation":"filter","videoRef":"/v.mp4","range":{"startSeconds":0,"endSeconds":60}}"#,
        )
        .await;

        assert!(matches!(resp, ApiResponse::Error { ref kind, .. } if kind == "unsupported_operation"));
    }

    #[tokio::test]
    async fn test_progress_for_unknown_task_is_completed() {
        let orch = orchestrator();
        let resp = dispatch(
            &orch,
            ApiRequest::Progress {
                task_id: "anything".to_string(),
            },
        )
        .await;

        let ApiResponse::Progress { record } = resp else {
            panic!("expected progress");
        };
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.percent, 100.0);
        assert_eq!(record.message, MISSING_TASK_MESSAGE);
    }

    #[tokio::test]
    async fn test_list_returns_every_known_task() {
        let orch = orchestrator();
        orch.registry().create(TaskId::new("b_task"), "filter").unwrap();
        orch.registry().create(TaskId::new("a_task"), "pipeline").unwrap();

        let resp = dispatch_line(&orch, r#"{"type":"list"}"#).await;

        let ApiResponse::Tasks { records } = resp else {
            panic!("expected tasks");
        };
        let ids: Vec<&str> = records.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a_task", "b_task"]);
        assert_eq!(records[0].status, TaskStatus::Queued);

        let empty = dispatch(&orchestrator(), ApiRequest::List).await;
        assert_eq!(
            serde_json::to_value(&empty).unwrap(),
            json!({"type": "tasks", "records": []})
        );
    }

    #[tokio::test]
    async fn test_garbage_line_is_bad_request() {
        let orch = orchestrator();
        let resp = dispatch_line(&orch, "{not json").await;
        assert!(matches!(resp, ApiResponse::Error { ref kind, .. } if kind == "bad_request"));
    }
}
