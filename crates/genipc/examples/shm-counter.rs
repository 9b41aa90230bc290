//! Shared counter: every run attaches to the same segment and bumps a value.
//!
//! Run with:
//!   cargo run -p genipc --example shm-counter --features logging -- /tmp 42
//!
//! Start several copies at once to watch them share the segment. The last
//! copy to exit removes the segment. There is no locking, so concurrent
//! increments may be lost.

use std::thread;
use std::time::Duration;

use genipc::logging::init_logging_from_env;
use genipc::{SegmentId, SharedMemorySegment};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "/tmp".to_string());
    let id: u32 = match args.next() {
        Some(arg) => arg.parse()?,
        None => 1,
    };

    let segment = SharedMemorySegment::create(&SegmentId::new(&path, id), 64)?;
    eprintln!(
        "Attached to segment key={:#x} shmid={}",
        segment.key(),
        segment.shmid()
    );

    let counter = segment.attach::<u64>()?;
    for _ in 0..5 {
        let next = counter.read().wrapping_add(1);
        counter.write(next);
        eprintln!("counter = {next}");
        thread::sleep(Duration::from_secs(1));
    }

    Ok(())
}
