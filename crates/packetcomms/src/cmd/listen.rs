use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use packetcomms_frame::{Message, TypeId, TypeRegistry};
use packetcomms_mux::Subscription;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, ListenArgs};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_message, OutputFormat};

const RECV_POLL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = args.link.registry()?;
    let config = args.link.connection_config()?;
    let wanted = selected_types(&registry, args.only.as_deref())?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (tx, rx) = mpsc::channel::<Message>();
    let accepted = args.link.addr.accept_one(Arc::clone(&registry), config, &running, |demuxer| {
        wanted
            .iter()
            .map(|&type_id| {
                let tx = tx.clone();
                demuxer.subscribe(type_id, move |message| {
                    let _ = tx.send(message.clone());
                })
            })
            .collect::<Vec<Subscription>>()
    })?;
    drop(tx);
    let Some((connection, _subscriptions)) = accepted else {
        return Ok(SUCCESS);
    };

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let message = match rx.recv_timeout(RECV_POLL) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            // Every sender lives in a subscriber callback, and callbacks are
            // released when the demuxer stops.
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let type_name = registry.to_name(message.type_id());
        print_message(&message, type_name, connection.peer(), format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                return Ok(SUCCESS);
            }
        }
    }

    info!(peer = connection.peer(), messages = printed, stats = ?connection.demuxer().stats(), "listen finished");
    Ok(SUCCESS)
}

fn selected_types(registry: &TypeRegistry, only: Option<&[String]>) -> CliResult<Vec<TypeId>> {
    let Some(names) = only else {
        return Ok(registry.ids().filter(|&id| id != TypeId::CONTROL).collect());
    };
    names
        .iter()
        .map(|name| {
            let type_id = registry.to_id(name);
            if type_id.is_invalid() || type_id == TypeId::CONTROL {
                return Err(CliError::new(USAGE, format!("--only: unknown type '{name}'")));
            }
            Ok(type_id)
        })
        .collect()
}
