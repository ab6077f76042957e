use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use packetcomms_frame::Message;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    type_id: u32,
    type_name: &'a str,
    payload_size: usize,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_message(message: &Message, type_name: &str, peer: &str, format: OutputFormat) {
    let payload = message.payload().as_ref();
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                type_id: message.type_id().get(),
                type_name,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "ID", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    type_name.to_string(),
                    message.type_id().to_string(),
                    payload.len().to_string(),
                    peer.to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "type={} ({}) size={} peer={} payload={}",
                message.type_id(),
                type_name,
                payload.len(),
                peer,
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

#[derive(Serialize)]
pub struct SendSummary<'a> {
    pub peer: &'a str,
    pub type_name: &'a str,
    pub messages: u64,
    pub bytes: u64,
    pub flushed: bool,
}

pub fn print_send_summary(summary: &SendSummary<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PEER", "TYPE", "MESSAGES", "BYTES", "FLUSHED"])
                .add_row(vec![
                    summary.peer.to_string(),
                    summary.type_name.to_string(),
                    summary.messages.to_string(),
                    summary.bytes.to_string(),
                    summary.flushed.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "sent {} message(s), {} bytes of {} to {} (flushed={})",
                summary.messages, summary.bytes, summary.type_name, summary.peer, summary.flushed
            );
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
