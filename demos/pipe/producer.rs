use std::{error::Error, process::Command};

use shmpipe::Pipe;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const PIPE: &str = "shmpipe-demo";

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let n = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<u64>()?,
        None => 10_000,
    };

    // Clear out leftovers of an earlier run that did not finish.
    if !Pipe::unlink_name(PIPE) {
        debug!(pipe = PIPE, "no leftovers to remove");
    }
    let pipe = Pipe::new(PIPE, 4096)?;

    #[cfg(debug_assertions)]
    let target = "target/debug/examples/consumer";
    #[cfg(not(debug_assertions))]
    let target = "target/release/examples/consumer";

    let mut peer = Command::new(target).arg(PIPE).spawn()?;

    for seq in 0..n {
        if !pipe.write_value(&seq)? {
            break;
        }
    }
    pipe.close_write()?;
    info!(records = n, "producer done");

    let status = peer.wait()?;
    if !pipe.unlink() {
        warn!(pipe = PIPE, "failed to remove every pipe object");
    }

    if !status.success() {
        return Err(format!("consumer exited with {status}").into());
    }
    Ok(())
}
