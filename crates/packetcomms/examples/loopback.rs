//! Two connections over a socket pair: telemetry and commands in both
//! directions, plus a chunked byte stream reassembled on the far side.
//!
//! Run with: `cargo run -p packetcomms --example loopback`

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use packetcomms::frame::TypeRegistry;
use packetcomms::mux::{Connection, Reassembler, ReassemblerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(TypeRegistry::new(["Telemetry", "Command", "AvData"]));
    let (left, right) = UnixStream::pair()?;
    let controller = Connection::new(left, Arc::clone(&registry))?;
    let device = Connection::new(right, Arc::clone(&registry))?;

    let _commands = device.demuxer().subscribe_named("Command", |msg| {
        println!("device <- command {:?}", String::from_utf8_lossy(msg.payload()));
    })?;
    let _telemetry = controller.demuxer().subscribe_named("Telemetry", |msg| {
        println!("controller <- telemetry {:02x?}", msg.payload().as_ref());
    })?;
    let mut video = Reassembler::named(
        controller.demuxer(),
        "AvData",
        ReassemblerConfig::default(),
    )?;

    controller.muxer().post_named("Command", b"arm".to_vec())?;
    device.muxer().post_named("Telemetry", vec![0x01, 0x02])?;

    let frame: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    for chunk in frame.chunks(1500) {
        device.muxer().post_named("AvData", chunk.to_vec())?;
    }
    device.muxer().flush(Duration::from_secs(2));

    let mut rebuilt = vec![0u8; frame.len()];
    video.read_exact(&mut rebuilt)?;
    println!(
        "controller <- {} stream bytes, intact: {}",
        rebuilt.len(),
        rebuilt == frame
    );

    std::thread::sleep(Duration::from_millis(100));
    Ok(())
}
