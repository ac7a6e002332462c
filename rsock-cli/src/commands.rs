//! Command execution.

use crate::Commands;
use bytes::Bytes;
use colored::Colorize;
use rsock_client::{Client, ClientError};
use rsock_protocol::{Frame, Payload};
use serde_json::Value;

/// Executes a command, printing responses as they arrive.
pub async fn execute(client: &Client, cmd: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Commands::Request { data, metadata } => {
            let payload = build_payload(data.as_deref(), metadata)?;
            let frame = client.request_response(payload).await?;
            println!("{}", format_frame(&frame));
            Ok(())
        }

        Commands::Stream {
            data,
            metadata,
            initial_n,
            limit,
        } => {
            let payload = build_payload(data.as_deref(), metadata)?;
            let mut stream = client.request_stream_with(payload, initial_n).await?;

            let mut received = 0usize;
            let mut bytes = 0u64;
            while let Some(frame) = stream.next().await {
                let frame = frame?;
                received += 1;
                bytes += frame.data().map_or(0, |d| d.len() as u64);
                println!("{}", format_frame(&frame));

                if limit.is_some_and(|limit| received >= limit) && !frame.is_completed() {
                    eprintln!("{}", "Limit reached, cancelling stream".dimmed());
                    stream.cancel()?;
                    break;
                }
            }

            eprintln!(
                "{} {} responses ({})",
                "Received".green(),
                received,
                format_bytes(bytes)
            );
            Ok(())
        }
    }
}

fn build_payload(
    data: Option<&str>,
    metadata: Option<String>,
) -> Result<Payload, Box<dyn std::error::Error>> {
    let mut payload = Payload::new();
    if let Some(data) = data {
        payload = payload.with_data(read_data_arg(data)?);
    }
    if let Some(metadata) = metadata {
        payload = payload.with_metadata(metadata);
    }
    Ok(payload)
}

/// Reads a data argument (either inline or @file).
fn read_data_arg(arg: &str) -> Result<Bytes, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        Ok(Bytes::from(std::fs::read(path)?))
    } else {
        Ok(Bytes::from(arg.to_string()))
    }
}

/// Returns whether the error is a transient client failure worth retrying.
pub fn is_retryable(err: &(dyn std::error::Error + 'static)) -> bool {
    err.downcast_ref::<ClientError>()
        .is_some_and(ClientError::is_retryable)
}

/// Formats one response frame for display.
fn format_frame(frame: &Frame) -> String {
    let mut out = String::new();
    if let Some(metadata) = frame.metadata() {
        out.push_str(&format!(
            "{} {}\n",
            "metadata:".dimmed(),
            String::from_utf8_lossy(metadata)
        ));
    }
    match frame.data() {
        Some(data) => out.push_str(&format_data(data)),
        None => out.push_str(&"(empty)".dimmed().to_string()),
    }
    out
}

/// Pretty-prints JSON data; anything else is shown as text.
fn format_data(data: &[u8]) -> String {
    match serde_json::from_slice::<Value>(data) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
        Err(_) => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Formats bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
