#![forbid(unsafe_code)]

//! `agent-comm`: terminal front end for the agent message channel.
//!
//! Reads user input from stdin, sends it through the correlator, and prints
//! the correlator's log stream and any watched tool events to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_comm::adapter::{render_log_line, Command};
use agent_comm::correlator::result_event_name;
use agent_comm::listeners::Handler;
use agent_comm::models::log::{LogEntry, Severity};
use agent_comm::transport::DefaultConnector;
use agent_comm::{AppError, ClientConfig, Correlator, Result, TransportRegistry};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-comm", about = "Agent message channel client", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, conflicts_with = "url")]
    config: Option<PathBuf>,

    /// Peer address (ws://, wss:// or tcp://) when no config file is given.
    #[arg(long)]
    url: Option<String>,

    /// Thread id for the conversation.
    #[arg(long)]
    thread_id: Option<String>,

    /// Print `<op>` and `<op>_result` events for this operation (repeatable).
    #[arg(long = "watch")]
    watch: Vec<String>,

    /// Diagnostic log format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-comm bootstrap");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match (&args.config, &args.url) {
        (Some(path), _) => ClientConfig::load_from_path(path)?,
        (None, Some(url)) => ClientConfig::for_url(url.clone())?,
        (None, None) => {
            return Err(AppError::Config(
                "either --config or --url must be given".into(),
            ))
        }
    };
    info!(url = %config.url, "configuration loaded");

    // ── Build the channel ───────────────────────────────
    let registry = TransportRegistry::new(
        Arc::new(DefaultConnector::default()),
        config.reconnect_policy(),
    );
    let correlator = Correlator::from_config(&registry, &config);

    correlator.on_log(Arc::new(|entry: &LogEntry| println!("{}", render_log_line(entry))));
    for tool_func in &args.watch {
        watch_tool(&correlator, tool_func);
    }

    // ── Input loop ──────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let thread_id = args.thread_id.as_deref();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => handle_line(&correlator, &line, thread_id),
                    None => {
                        info!("stdin closed");
                        break;
                    }
                }
            }
        }
    }

    info!("agent-comm shut down");
    Ok(())
}

fn handle_line(correlator: &Correlator, line: &str, thread_id: Option<&str>) {
    match Command::parse(line) {
        Ok(None) => {}
        Ok(Some(Command::Say(text))) => {
            println!("you: {text}");
            correlator.send_message(Value::String(text), thread_id);
        }
        Ok(Some(Command::Call { tool_func, payload })) => {
            let reply = correlator.invoke_with_future(&tool_func, &payload);
            let correlator = correlator.clone();
            tokio::spawn(async move {
                let result = reply.await;
                correlator.emit_log(
                    format!("[future] {tool_func} result: {result}"),
                    Severity::Tool,
                );
            });
        }
        Err(err) => {
            error!(%err, "invalid input line");
            correlator.emit_log(err.to_string(), Severity::Error);
        }
    }
}

fn watch_tool(correlator: &Correlator, tool_func: &str) {
    let name = tool_func.to_owned();
    let on_call: Handler<Value> = Arc::new(move |detail: &Value| {
        println!("[event] {name} called: {detail}");
    });
    correlator.register_tool_event(tool_func, on_call);

    let name = tool_func.to_owned();
    let on_result: Handler<Value> = Arc::new(move |detail: &Value| {
        println!("[event] {name} result: {detail}");
    });
    correlator.register_tool_event(&result_event_name(tool_func), on_result);
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
