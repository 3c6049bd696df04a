//! Live stream transport task.
//!
//! One task per run: opens the ask stream, decodes SSE frames, and forwards
//! them to the controller's owner loop. The task ends as soon as a terminal
//! frame is seen or the transport fails; dropping the response body closes
//! the connection.

use crate::api::ApiClient;
use crate::model::{AskRequest, RunId, RunMessage, StreamEvent};
use crate::sse::{decode_frame, SseParser};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub(crate) async fn run_stream(
    client: ApiClient,
    request: AskRequest,
    run: RunId,
    event_tx: UnboundedSender<RunMessage>,
    idle_timeout: Option<Duration>,
) {
    // The receiver may be gone if the controller was dropped mid-run.
    let send = |event: StreamEvent| {
        let _ = event_tx.send(RunMessage { run, event });
    };

    let response = match client.open_stream(&request).await {
        Ok(r) => r,
        Err(e) => {
            send(StreamEvent::TransportFailed {
                reason: format!("stream connect failed: {e:#}"),
            });
            return;
        }
    };

    let mut body = response.bytes_stream();
    let mut parser = SseParser::new();

    loop {
        let chunk = match idle_timeout {
            Some(window) => match tokio::time::timeout(window, body.next()).await {
                Ok(chunk) => chunk,
                Err(_) => {
                    send(StreamEvent::TransportFailed {
                        reason: format!(
                            "no event within {}",
                            humantime::format_duration(window)
                        ),
                    });
                    return;
                }
            },
            None => body.next().await,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in parser.feed(bytes) {
                    if let Some(event) = decode_frame(&frame) {
                        let terminal = matches!(
                            event,
                            StreamEvent::Final(_) | StreamEvent::TransportFailed { .. }
                        );
                        send(event);
                        if terminal {
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                send(StreamEvent::TransportFailed {
                    reason: format!("stream dropped: {e:#}"),
                });
                return;
            }
            None => {
                send(StreamEvent::TransportFailed {
                    reason: "stream ended without a final event".into(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::ApiClient;
    use crate::model::{AskRequest, RunPhase, StageStatus};
    use crate::orchestrator::RunController;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a fresh local port.
    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    fn request() -> AskRequest {
        AskRequest {
            question: "What is the refund policy?".into(),
            doc_id: "policy.pdf".into(),
            top_k_sources: 5,
        }
    }

    async fn drive(base: &str) -> RunController {
        let client = ApiClient::new(base, "docchat-trace-test").unwrap();
        let (mut controller, mut rx) =
            RunController::new(client, tokio::runtime::Handle::current(), None);
        controller.start(&request()).unwrap();
        while let Some(msg) = rx.recv().await {
            controller.handle(msg);
            if controller.phase() != RunPhase::Running {
                break;
            }
        }
        controller
    }

    #[tokio::test]
    async fn full_stream_drives_controller_to_done() {
        let body = "event: agent\ndata: {\"agent\":\"relevance\",\"status\":\"done\",\"summary\":\"Found relevant content\"}\n\nevent: final\ndata: {\"question\":\"What is the refund policy?\",\"is_relevant\":true,\"draft_answer\":\"Refunds within 30 days.\",\"sources\":[]}\n\n";
        let base = serve_once(body).await;

        let controller = drive(&base).await;

        assert_eq!(controller.phase(), RunPhase::Done);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot[0].1.status, StageStatus::Done);
        assert_eq!(
            snapshot[0].1.summary.as_deref(),
            Some("Found relevant content")
        );
        let result = controller.result().unwrap();
        assert_eq!(
            result.draft_answer.as_deref(),
            Some("Refunds within 30 days.")
        );
    }

    #[tokio::test]
    async fn stream_ending_without_final_is_a_transport_failure() {
        let body =
            "event: agent\ndata: {\"agent\":\"relevance\",\"status\":\"running\"}\n\n";
        let base = serve_once(body).await;

        let controller = drive(&base).await;

        assert_eq!(controller.phase(), RunPhase::Error);
        assert!(controller.error_message().is_some());
        assert_eq!(
            controller.snapshot().last().unwrap().1.status,
            StageStatus::Error
        );
    }

    #[tokio::test]
    async fn pipeline_error_final_frame_fails_the_run() {
        let body = "event: final\ndata: {\"error\":\"LLM quota exceeded\"}\n\n";
        let base = serve_once(body).await;

        let controller = drive(&base).await;

        assert_eq!(controller.phase(), RunPhase::Error);
        assert_eq!(controller.error_message(), Some("LLM quota exceeded"));
        assert!(controller.result().is_none());
    }
}
