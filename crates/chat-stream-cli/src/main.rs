//! `chat-stream`: decode captured chat response bodies or chat against a
//! live workflow endpoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chat_stream::http::{
    APPROVE, ChatClientConfig, HttpChatTransport, HttpFeedbackClient, HttpFunctionHandler, REJECT,
};
use chat_stream::{
    ChatError, ChatMessage, Conversation, Framing, StreamDecoder, TurnEvent, TurnStatus,
};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "chat-stream", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a captured response body and print each snapshot as JSON.
    Decode {
        file: PathBuf,
        #[arg(long, default_value_t = Framing::LengthPrefixed)]
        framing: Framing,
        /// Bytes fed to the decoder per chunk.
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
    },
    /// Send one message to a live endpoint and stream the reply.
    Chat {
        #[arg(long, short)]
        message: String,
        #[arg(long, env = "CHAT_STREAM_ENDPOINT")]
        endpoint: String,
        #[arg(long, env = "CHAT_STREAM_DEPLOYMENT_ID")]
        deployment: String,
        #[arg(long, env = "CHAT_STREAM_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, env = "CHAT_STREAM_FRAMING", default_value_t = Framing::LengthPrefixed)]
        framing: Framing,
        #[arg(long, env = "CHAT_STREAM_FUNCTION_ENDPOINT")]
        function_endpoint: Option<String>,
        #[arg(long, env = "CHAT_STREAM_TIMEOUT_SECS", default_value_t = 120)]
        timeout_secs: u64,
    },
    /// Record feedback for a message's workflow execution.
    Feedback {
        /// The message `source` the execution was recorded under.
        #[arg(long)]
        message_id: String,
        /// `approve`, `reject`, or a number between 0 and 1.
        #[arg(long, value_parser = parse_quality)]
        quality: f64,
        #[arg(long, env = "CHAT_STREAM_FEEDBACK_ENDPOINT")]
        endpoint: String,
        #[arg(long, env = "CHAT_STREAM_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    chat_stream::init_observability();

    match Cli::parse().command {
        Command::Decode {
            file,
            framing,
            chunk_size,
        } => {
            let stdout = std::io::stdout();
            decode_file(&file, framing, chunk_size, &mut stdout.lock())?;
        }
        Command::Chat {
            message,
            endpoint,
            deployment,
            api_key,
            framing,
            function_endpoint,
            timeout_secs,
        } => {
            let mut config = ChatClientConfig::new(endpoint)
                .framing(framing)
                .timeout(Duration::from_secs(timeout_secs));
            config.api_key = api_key;
            config.function_endpoint = function_endpoint;
            chat(config, deployment, message).await?;
        }
        Command::Feedback {
            message_id,
            quality,
            endpoint,
            api_key,
        } => {
            let mut client = HttpFeedbackClient::new(endpoint, Duration::from_secs(30))?;
            if let Some(api_key) = api_key {
                client = client.api_key(api_key);
            }
            client.submit(message_id, quality).await?;
        }
    }
    Ok(())
}

/// Feeds `path` through a decoder `chunk_size` bytes at a time.
///
/// Writes one `{"seq", "message"}` line per snapshot and a final
/// `{"final"}` line. Returns the final message.
fn decode_file(
    path: &Path,
    framing: Framing,
    chunk_size: usize,
    out: &mut impl Write,
) -> anyhow::Result<Option<ChatMessage>> {
    let body = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut decoder = StreamDecoder::new(framing);
    let mut seq = 0u64;

    for chunk in body.chunks(chunk_size.max(1)) {
        let snapshots = decoder.feed(chunk).map_err(ChatError::from)?;
        write_snapshots(out, &mut seq, snapshots)?;
    }
    let snapshots = decoder.finish().map_err(ChatError::from)?;
    write_snapshots(out, &mut seq, snapshots)?;

    let message = decoder.message();
    writeln!(out, "{}", serde_json::json!({ "final": message }))?;
    Ok(message)
}

fn write_snapshots(
    out: &mut impl Write,
    seq: &mut u64,
    snapshots: Vec<ChatMessage>,
) -> anyhow::Result<()> {
    for message in snapshots {
        *seq += 1;
        writeln!(out, "{}", serde_json::json!({ "seq": *seq, "message": message }))?;
    }
    Ok(())
}

async fn chat(config: ChatClientConfig, deployment: String, text: String) -> anyhow::Result<()> {
    let options = config.turn_options();
    let function_handler = match &config.function_endpoint {
        Some(endpoint) => Some(Arc::new(HttpFunctionHandler::new(
            endpoint.clone(),
            config.timeout,
        )?)),
        None => None,
    };
    let transport = Arc::new(HttpChatTransport::new(config)?);

    let (event_tx, mut event_rx) = mpsc::channel(options.stream_buffer_capacity);
    let mut builder = Conversation::builder(transport)
        .workflow_deployment_id(deployment)
        .options(options)
        .event_sink(event_tx);
    if let Some(handler) = function_handler {
        builder = builder.function_handler(handler);
    }
    let mut conversation = builder.build()?;

    let stop = conversation.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let aborted = stop.stop();
            tracing::info!(aborted, "stop requested");
        }
    });

    let printer = tokio::spawn(async move {
        let mut printed = String::new();
        let stdout = std::io::stdout();
        while let Some(event) = event_rx.recv().await {
            match event {
                TurnEvent::Started { .. } => printed.clear(),
                TurnEvent::MessageUpdated { message, .. } => {
                    let text = message.content.text();
                    let mut out = stdout.lock();
                    let _ = out.write_all(text_suffix(&printed, &text).as_bytes());
                    let _ = out.flush();
                    printed = text;
                }
                TurnEvent::Completed { .. }
                | TurnEvent::Cancelled { .. }
                | TurnEvent::Failed { .. } => {
                    if !printed.is_empty() {
                        println!();
                    }
                }
            }
        }
    });

    let result = conversation.append(text).await;
    drop(conversation);
    ctrl_c.abort();
    let _ = printer.await;

    let report = result?;
    if report.status == TurnStatus::Cancelled {
        eprintln!("(stopped)");
    }
    Ok(())
}

fn parse_quality(raw: &str) -> Result<f64, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "approve" | "up" => Ok(APPROVE),
        "reject" | "down" => Ok(REJECT),
        other => other
            .parse::<f64>()
            .map_err(|e| format!("invalid quality `{raw}`: {e}")),
    }
}

/// Part of `next` not yet printed. A snapshot that rewrites earlier text
/// (a function call replacing streamed text) starts a fresh line.
fn text_suffix(printed: &str, next: &str) -> String {
    match next.strip_prefix(printed) {
        Some(rest) => rest.to_string(),
        None => format!("\n{next}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_stream::frame::encode_length_prefixed;

    fn length_prefixed(records: &[&str]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|r| encode_length_prefixed(r.as_bytes()).expect("frame").to_vec())
            .collect()
    }

    fn decode_to_lines(
        body: &[u8],
        framing: Framing,
        chunk_size: usize,
    ) -> (anyhow::Result<Option<ChatMessage>>, Vec<String>) {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(body).expect("write body");
        let mut out = Vec::new();
        let result = decode_file(file.path(), framing, chunk_size, &mut out);
        let lines = String::from_utf8(out)
            .expect("utf8 output")
            .lines()
            .map(str::to_string)
            .collect();
        (result, lines)
    }

    #[test]
    fn decodes_length_prefixed_capture_one_byte_at_a_time() {
        let body = length_prefixed(&[
            r#"{"id":"a","state":"INITIATED","type":"STRING"}"#,
            r#"{"id":"a","state":"STREAMING","type":"STRING","delta":"Hel"}"#,
            r#"{"id":"a","state":"STREAMING","type":"STRING","delta":"lo"}"#,
            r#"{"id":"a","state":"FULFILLED","type":"STRING","value":"Hello"}"#,
        ]);

        let (result, lines) = decode_to_lines(&body, Framing::LengthPrefixed, 1);
        let message = result.expect("decode").expect("message");
        assert_eq!(message.content.text(), "Hello");
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains(r#""seq":1"#));
        assert!(lines[1].contains("Hello"));
        assert!(lines[2].starts_with(r#"{"final":"#));
    }

    #[test]
    fn decodes_newline_capture() {
        let body = b"{\"id\":\"x\",\"state\":\"STREAMING\",\"delta\":\"hi\"}\n";
        let (result, lines) = decode_to_lines(body, Framing::NewlineDelimited, 7);
        let message = result.expect("decode").expect("message");
        assert_eq!(message.content.text(), "hi");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn truncated_capture_fails() {
        let mut body = length_prefixed(&[r#"{"id":"a","state":"STREAMING","delta":"x"}"#]);
        body.truncate(body.len() - 2);
        let (result, _) = decode_to_lines(&body, Framing::LengthPrefixed, 4096);
        let err = result.expect_err("truncated");
        assert!(err.to_string().contains("truncated"), "{err}");
    }

    #[test]
    fn missing_file_reports_path() {
        let mut out = Vec::new();
        let err = decode_file(
            Path::new("/definitely/not/here.bin"),
            Framing::LengthPrefixed,
            16,
            &mut out,
        )
        .expect_err("missing file");
        assert!(err.to_string().contains("here.bin"));
    }

    #[test]
    fn suffix_only_prints_new_text() {
        assert_eq!(text_suffix("Hel", "Hello"), "lo");
        assert_eq!(text_suffix("", "Hi"), "Hi");
        assert_eq!(text_suffix("Hel", "{\"a\":1}"), "\n{\"a\":1}");
    }

    #[test]
    fn parses_decode_arguments() {
        let cli = Cli::try_parse_from([
            "chat-stream",
            "decode",
            "body.bin",
            "--framing",
            "ndjson",
            "--chunk-size",
            "3",
        ])
        .expect("parse");
        match cli.command {
            Command::Decode {
                file,
                framing,
                chunk_size,
            } => {
                assert_eq!(file, PathBuf::from("body.bin"));
                assert_eq!(framing, Framing::NewlineDelimited);
                assert_eq!(chunk_size, 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_feedback_quality_words_and_numbers() {
        assert_eq!(parse_quality("Approve"), Ok(APPROVE));
        assert_eq!(parse_quality("reject"), Ok(REJECT));
        assert_eq!(parse_quality("0.5"), Ok(0.5));
        assert!(parse_quality("great").is_err());

        let cli = Cli::try_parse_from([
            "chat-stream",
            "feedback",
            "--message-id",
            "exec-42",
            "--quality",
            "approve",
            "--endpoint",
            "http://localhost:3000/api/feedback",
        ])
        .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Feedback { quality, .. } if quality == APPROVE
        ));
    }

    #[test]
    fn rejects_unknown_framing() {
        let result = Cli::try_parse_from(["chat-stream", "decode", "x", "--framing", "xml"]);
        assert!(result.is_err());
    }
}
