use std::fs;

use bytes::Bytes;
use packetcomms_frame::TypeId;
use packetcomms_mux::Muxer;
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, mux_error, CliError, CliResult, SUCCESS, TIMEOUT, TRANSPORT_ERROR, USAGE};
use crate::output::{print_send_summary, OutputFormat, SendSummary};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = args.link.registry()?;
    let config = args.link.connection_config()?;
    let timeout = parse_duration(&args.timeout)?;
    let type_id = registry.to_id(&args.type_name);
    if !registry.contains(type_id) || type_id == TypeId::CONTROL {
        return Err(CliError::new(
            USAGE,
            format!("--type: unknown type '{}'", args.type_name),
        ));
    }
    if args.chunk_size == Some(0) {
        return Err(CliError::new(USAGE, "--chunk-size must be greater than zero"));
    }

    let payload = resolve_payload(&args)?;
    let chunks = split_payload(&payload, args.chunk_size);

    let connection = args.link.addr.connect(registry, config)?;
    if !connection.demuxer().wait_for_hello(timeout) {
        return Err(CliError::new(
            TIMEOUT,
            format!("peer {} did not say hello within {timeout:?}", connection.peer()),
        ));
    }

    let (messages, bytes) = post_all(connection.muxer(), type_id, &chunks, args.repeat)
        .map_err(|err| mux_error("send failed", err))?;
    let flushed = connection.muxer().flush(timeout);
    debug!(stats = ?connection.muxer().stats(), "send queue drained");

    print_send_summary(
        &SendSummary {
            peer: connection.peer(),
            type_name: &args.type_name,
            messages,
            bytes,
            flushed,
        },
        format,
    );

    if flushed {
        Ok(SUCCESS)
    } else if !connection.muxer().ok() {
        Err(CliError::new(
            TRANSPORT_ERROR,
            "connection failed before all messages were sent",
        ))
    } else {
        Err(CliError::new(
            TIMEOUT,
            format!("send queue did not drain within {timeout:?}"),
        ))
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Bytes::from)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Bytes::new())
}

/// Slice the payload into messages without copying. An empty payload still
/// yields one (empty) message.
fn split_payload(payload: &Bytes, chunk_size: Option<usize>) -> Vec<Bytes> {
    match chunk_size {
        Some(size) if payload.len() > size => (0..payload.len())
            .step_by(size)
            .map(|start| payload.slice(start..(start + size).min(payload.len())))
            .collect(),
        _ => vec![payload.clone()],
    }
}

fn post_all(
    muxer: &Muxer,
    type_id: TypeId,
    chunks: &[Bytes],
    repeat: usize,
) -> packetcomms_mux::Result<(u64, u64)> {
    let mut messages = 0u64;
    let mut bytes = 0u64;
    for _ in 0..repeat {
        for chunk in chunks {
            muxer.post(type_id, chunk.clone())?;
            messages += 1;
            bytes += chunk.len() as u64;
        }
    }
    Ok((messages, bytes))
}
