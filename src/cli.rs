use crate::api::ApiClient;
use crate::model::{AskRequest, FinalResult, RunPhase, Stage, StreamEvent};
use crate::orchestrator::RunController;
use crate::{report, storage};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::sync::mpsc;

/// Text-mode output routing: the final report goes to stdout so it can be
/// piped, stage progress and diagnostics go to stderr.
enum Printed {
    Report(String),
    Progress(String),
}

/// Print through a blocking task so slow terminal writes never stall the
/// event loop. Dropping the sender flushes and ends the task.
fn spawn_printer() -> (mpsc::UnboundedSender<Printed>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Printed>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                Printed::Report(msg) => {
                    let _ = writeln!(out, "{msg}");
                }
                Printed::Progress(msg) => {
                    let _ = writeln!(err, "{msg}");
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "docchat-trace",
    version,
    about = "Ask questions about a document and watch the agent pipeline live"
)]
pub struct Cli {
    /// Base URL of the DocChat service
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Question to ask
    #[arg(short, long)]
    pub question: Option<String>,

    /// Document to ask about (a filename from /api/docs; defaults to the
    /// first document the server lists)
    #[arg(short, long)]
    pub doc: Option<String>,

    /// How many source chunks to request
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(0..=50))]
    pub top_k_sources: u32,

    /// Print the final result as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print stage progress and a text report, then exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// List available documents and exit
    #[arg(long)]
    pub list_docs: bool,

    /// Abort the run if the stream goes quiet for this long (e.g. "90s")
    #[arg(long)]
    pub stream_timeout: Option<humantime::Duration>,

    /// Export the final result as JSON to this path
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Save completed runs under the data directory
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Ask immediately when the TUI launches
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub ask_on_launch: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    let client = ApiClient::new(
        &args.base_url,
        &format!("docchat-trace/{}", env!("CARGO_PKG_VERSION")),
    )?;

    client
        .health()
        .await
        .with_context(|| format!("cannot reach DocChat service at {}", client.base_url()))?;

    if args.list_docs {
        let docs = client.list_docs().await?;
        if docs.is_empty() {
            eprintln!("no documents available on {}", client.base_url());
        } else {
            for doc in docs {
                println!("{doc}");
            }
        }
        return Ok(());
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, client).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args, client).await;
        }
    }

    if args.json {
        return run_json(args, client).await;
    }

    run_text(args, client).await
}

/// Resolve the per-run request from CLI arguments, filling the document from
/// the server listing when none was given.
pub(crate) async fn resolve_request(args: &Cli, client: &ApiClient) -> Result<AskRequest> {
    let question = args
        .question
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    anyhow::ensure!(
        !question.is_empty(),
        "--question is required unless --list-docs is set"
    );

    let doc_id = match args.doc.as_deref().map(str::trim) {
        Some(doc) if !doc.is_empty() => doc.to_string(),
        _ => client
            .list_docs()
            .await?
            .into_iter()
            .next()
            .context("no documents available on the server")?,
    };

    Ok(AskRequest {
        question,
        doc_id,
        top_k_sources: args.top_k_sources,
    })
}

/// One-shot ask over the non-streaming endpoint; prints the result as JSON.
async fn run_json(args: Cli, client: ApiClient) -> Result<()> {
    let request = resolve_request(&args, &client).await?;
    let mut frame = client.ask(&request).await?;
    if let Some(error) = frame.error.take() {
        anyhow::bail!("pipeline failed: {error}");
    }
    let result = FinalResult::from_frame(frame, &request, storage::now_rfc3339());

    handle_exports(&args, &result)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if args.auto_save {
        if let Ok(path) = storage::save_run(&result) {
            eprintln!("Saved: {}", path.display());
        }
    }
    Ok(())
}

/// Streamed run with stage progress on stderr and the report on stdout.
async fn run_text(args: Cli, client: ApiClient) -> Result<()> {
    let request = resolve_request(&args, &client).await?;
    let (out_tx, out_handle) = spawn_printer();

    let (mut controller, mut event_rx) = RunController::new(
        client,
        tokio::runtime::Handle::current(),
        args.stream_timeout.map(Into::into),
    );
    controller.start(&request)?;
    let _ = out_tx.send(Printed::Progress(format!(
        "Asking about {} (top {} sources)",
        request.doc_id, request.top_k_sources
    )));

    while let Some(msg) = event_rx.recv().await {
        if let StreamEvent::Stage(ev) = &msg.event {
            if let Some(stage) = Stage::from_wire(&ev.agent) {
                let mut line = format!("[{}] {}", stage.as_str(), ev.status.as_str());
                if let Some(summary) = ev.summary.as_deref() {
                    line.push_str(&format!(" - {summary}"));
                }
                if let Some(ms) = ev.ms {
                    line.push_str(&format!(" ({ms} ms)"));
                }
                let _ = out_tx.send(Printed::Progress(line));
            }
        }
        controller.handle(msg);
        if controller.phase() != RunPhase::Running {
            break;
        }
    }

    if controller.events_dropped() > 0 {
        let _ = out_tx.send(Printed::Progress(format!(
            "{} unrecognized or malformed event(s) dropped",
            controller.events_dropped()
        )));
    }

    let outcome = match controller.phase() {
        RunPhase::Done => {
            let result = controller
                .result()
                .cloned()
                .context("run finished without a result")?;
            handle_exports(&args, &result)?;
            for line in report::build_report(&result).lines {
                let _ = out_tx.send(Printed::Report(line));
            }
            if args.auto_save {
                if let Ok(path) = storage::save_run(&result) {
                    let _ = out_tx.send(Printed::Progress(format!("Saved: {}", path.display())));
                }
            }
            Ok(())
        }
        RunPhase::Error => {
            let message = controller
                .error_message()
                .unwrap_or("run failed")
                .to_string();
            Err(anyhow::anyhow!(message))
        }
        _ => Err(anyhow::anyhow!("stream closed before the run finished")),
    };

    drop(out_tx);
    let _ = out_handle.await;
    outcome
}

/// Handle export operations for text and JSON modes.
fn handle_exports(args: &Cli, result: &FinalResult) -> Result<()> {
    if let Some(path) = args.export_json.as_deref() {
        storage::export_json(path, result)?;
    }
    Ok(())
}
