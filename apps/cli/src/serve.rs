use anyhow::Result;
use sublingo_core::{Orchestrator, dispatch_line};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::broadcast,
};

/// Answer JSON requests from stdin, one per line, on stdout.
///
/// The sweeps run in the background until stdin closes.
pub async fn serve(orch: Orchestrator) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let supervisor = orch.spawn_supervisor(shutdown_rx);
    tracing::info!("serving JSON lines on stdio");

    let outcome = serve_lines(
        &orch,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;

    let _ = shutdown_tx.send(());
    supervisor.await?;
    outcome
}

pub async fn serve_lines<R, W>(orch: &Orchestrator, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch_line(orch, &line).await;
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;
    use sublingo_core::{
        Capabilities, PipelineConfig, SpeechToText, TaskRegistry, TranscribeRequest, Translator,
    };

    use super::*;

    struct Silent;

    #[async_trait]
    impl SpeechToText for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn transcribe(&self, _request: &TranscribeRequest) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    #[async_trait]
    impl Translator for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn translate(&self, text: &str, _source: &str, _target: &str) -> anyhow::Result<String> {
            Ok(text.to_string())
        }
    }

    async fn run(input: &str) -> Vec<Value> {
        let orch = Orchestrator::new(
            TaskRegistry::new(),
            Capabilities::new(Arc::new(Silent), Arc::new(Silent)),
            PipelineConfig::default(),
        );
        let mut out = Vec::new();
        serve_lines(&orch, input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_request_line() {
        let responses = run(concat!(
            r#"{"type":"progress","taskId":"gone"}"#,
            "\n\n",
            r#"{"type":"cancel","taskId":"gone"}"#,
            "\n",
            "nonsense\n",
            r#"{"type":"list"}"#,
            "\n",
        ))
        .await;

        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0]["type"], "progress");
        assert_eq!(responses[0]["record"]["status"], "completed");
        assert_eq!(responses[1], serde_json::json!({"type": "cancel", "accepted": false}));
        assert_eq!(responses[2]["kind"], "bad_request");
        assert_eq!(responses[3], serde_json::json!({"type": "tasks", "records": []}));
    }

    #[tokio::test]
    async fn test_submitted_task_shows_up_in_list() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("folge.mp4");
        std::fs::write(&video, b"video").unwrap();
        let submit = serde_json::json!({
            "type": "submit",
            "operation": "pipeline",
            "videoRef": video,
        });

        let responses = run(&format!("{}\n{}\n", submit, r#"{"type":"list"}"#)).await;

        assert_eq!(responses[0]["type"], "submitted");
        let task_id = responses[0]["taskId"].as_str().unwrap();
        assert!(task_id.starts_with("pipeline_"));
        assert_eq!(responses[1]["records"][0]["taskId"], task_id);
    }
}
