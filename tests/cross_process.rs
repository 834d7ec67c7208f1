//! Two-process test: the same test binary is spawned again as a writer child
//! and a reader child, and both attach to one named pipe.
//!
//! ```text
//! [parent]  --[create pipe]--[spawn writer]--[spawn reader]------[wait]--[unlink]
//! [writer]                     --[attach]--[write chunks...]--[close_write]
//! [reader]                                   --[attach]--[read until end]--[verify]
//! ```
//!
//! The ring is far smaller than the stream, so both children have to block
//! on each other repeatedly.

mod common;

use std::env;
use std::io::Read;
use std::process::{Command, Stdio};

use common::{init_tracing, unique_name};
use shmpipe::Pipe;

const ENV_ROLE: &str = "SHMPIPE_E2E_ROLE";
const ENV_NAME: &str = "SHMPIPE_E2E_NAME";
const ROLE_WRITER: &str = "writer";
const ROLE_READER: &str = "reader";

const STREAM_LEN: usize = 64 * 1024;
const CAPACITY: usize = 256;

fn stream_byte(i: usize) -> u8 {
    (i % 253) as u8
}

fn run_writer(name: &str) {
    let pipe = Pipe::new(name, CAPACITY).expect("writer: failed to attach");
    let stream: Vec<u8> = (0..STREAM_LEN).map(stream_byte).collect();
    for chunk in stream.chunks(1000) {
        assert!(pipe.write(chunk).expect("writer: write failed"));
    }
    pipe.close_write().expect("writer: close failed");
}

fn run_reader(name: &str) {
    let pipe = Pipe::new(name, CAPACITY).expect("reader: failed to attach");
    let mut received = Vec::with_capacity(STREAM_LEN);
    (&pipe)
        .read_to_end(&mut received)
        .expect("reader: read failed");

    assert_eq!(received.len(), STREAM_LEN);
    for (i, &b) in received.iter().enumerate() {
        assert_eq!(b, stream_byte(i), "byte {i} corrupted");
    }
}

#[test]
fn two_processes_share_one_pipe() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let name = env::var(ENV_NAME).expect("SHMPIPE_E2E_NAME not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&name),
            ROLE_READER => run_reader(&name),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    init_tracing();
    let name = unique_name("e2e");
    let exe = env::current_exe().expect("failed to get current executable path");

    // Create it here so the children's order does not matter.
    let pipe = Pipe::new(&name, CAPACITY).unwrap();

    let spawn = |role: &str| {
        Command::new(&exe)
            .arg("--exact")
            .arg("two_processes_share_one_pipe")
            .env(ENV_ROLE, role)
            .env(ENV_NAME, &name)
            .stderr(Stdio::inherit())
            .spawn()
            .expect("failed to spawn child")
    };
    let mut writer = spawn(ROLE_WRITER);
    let mut reader = spawn(ROLE_READER);

    let writer_status = writer.wait().unwrap();
    let reader_status = reader.wait().unwrap();

    assert!(pipe.is_write_closed().unwrap());
    assert!(pipe.unlink());

    assert!(writer_status.success(), "writer failed: {writer_status}");
    assert!(reader_status.success(), "reader failed: {reader_status}");
}
