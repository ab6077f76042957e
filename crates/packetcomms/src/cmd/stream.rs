use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use packetcomms_frame::TypeId;
use packetcomms_mux::{Reassembler, ReassemblerConfig};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, StreamArgs};
use crate::exit::{io_error, stream_error, CliError, CliResult, SUCCESS, USAGE};

const READ_CHUNK: usize = 64 * 1024;
const WAIT_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: StreamArgs) -> CliResult<i32> {
    let registry = args.link.registry()?;
    let config = args.link.connection_config()?;
    let stall_timeout = parse_duration(&args.stall_timeout)?;
    let type_id = registry.to_id(&args.type_name);
    if !registry.contains(type_id) || type_id == TypeId::CONTROL {
        return Err(CliError::new(
            USAGE,
            format!("--type: unknown type '{}'", args.type_name),
        ));
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let reassembler_config = ReassemblerConfig {
        wait_interval: WAIT_INTERVAL.min(stall_timeout),
        stall_timeout,
    };
    let accepted = args.link.addr.accept_one(registry, config, &running, |demuxer| {
        Reassembler::with_config(demuxer, type_id, reassembler_config)
    })?;
    let Some((connection, mut reassembler)) = accepted else {
        return Ok(SUCCESS);
    };

    let mut stdout = std::io::stdout().lock();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    while running.load(Ordering::SeqCst) {
        let n = reassembler
            .read(&mut buf)
            .map_err(|err| stream_error("stream read failed", err))?;
        if n == 0 {
            break;
        }
        stdout
            .write_all(&buf[..n])
            .map_err(|err| io_error("stdout write failed", err))?;
        total += n as u64;
    }
    stdout
        .flush()
        .map_err(|err| io_error("stdout flush failed", err))?;

    info!(
        peer = connection.peer(),
        bytes = total,
        received = reassembler.bytes_received(),
        "stream finished"
    );
    Ok(SUCCESS)
}
