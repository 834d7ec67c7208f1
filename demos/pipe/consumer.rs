use std::error::Error;

use shmpipe::Pipe;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let name = std::env::args()
        .nth(1)
        .ok_or("usage: consumer <pipe name>")?;
    let pipe = Pipe::open(&name)?;

    let mut expected = 0u64;
    let mut seq = 0u64;
    while pipe.read_value(&mut seq)? {
        if seq != expected {
            return Err(format!("expected record {expected}, got {seq}").into());
        }
        expected += 1;
    }

    info!(records = expected, capacity = pipe.capacity(), "consumer reached end of stream");
    Ok(())
}
