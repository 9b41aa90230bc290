#![cfg(unix)]

use std::thread;

use genipc::{SegmentId, SharedMemorySegment};

fn identity(id: u32) -> (tempfile::NamedTempFile, SegmentId) {
    let file = tempfile::NamedTempFile::new().expect("temp file should be creatable");
    let seg = SegmentId::new(file.path(), id);
    (file, seg)
}

#[test]
fn independent_handles_share_memory() {
    let (_file, id) = identity(7);
    let owner = SharedMemorySegment::create(&id, 64).expect("segment should be created");
    let mapping = owner.attach::<u8>().expect("owner should attach");
    mapping
        .write_bytes(0, b"written by owner")
        .expect("write should fit");

    // A second handle derived from the same identity, as a cooperating
    // process would build it.
    let reader_id = id.clone();
    let seen = thread::spawn(move || {
        let other = SharedMemorySegment::create(&reader_id, 64).expect("lookup should succeed");
        let view = other.attach::<u8>().expect("reader should attach");
        let mut buf = [0u8; 16];
        view.read_bytes(0, &mut buf).expect("read should fit");
        (other.shmid(), buf)
    })
    .join()
    .expect("reader thread should finish");

    assert_eq!(seen.0, owner.shmid());
    assert_eq!(&seen.1, b"written by owner");
}

/// Drop the owning handle while a mapping is still attached, then look the
/// identity up again.
///
/// Removal waits until no mapping is attached anywhere, so the new handle
/// finds the same segment and its contents. Attaching to a segment that has
/// already been marked for removal is OS dependent (Linux allows it, other
/// systems refuse), so that case is deliberately not exercised here.
#[test]
fn removal_waits_for_outstanding_mappings() {
    let (_file, id) = identity(7);

    let first = SharedMemorySegment::create(&id, 64).expect("segment should be created");
    let original_shmid = first.shmid();
    let held = first.attach::<u32>().expect("first attach should succeed");
    held.write(0x1234_5678);
    drop(first);

    let second = SharedMemorySegment::create(&id, 64).expect("lookup should succeed");
    assert_eq!(second.shmid(), original_shmid);
    let again = second.attach::<u32>().expect("second attach should succeed");
    assert_eq!(again.read(), 0x1234_5678);

    // The first handle's last owner goes away while `again` is attached, so
    // the segment stays reachable by its identity.
    drop(held);
    assert_eq!(again.read(), 0x1234_5678);
    let lookup = SharedMemorySegment::create(&id, 64).expect("lookup should succeed");
    assert_eq!(lookup.shmid(), original_shmid);
    drop(lookup);

    drop(again);
    drop(second);

    let fresh = SharedMemorySegment::create(&id, 64).expect("new segment should be created");
    let mapping = fresh.attach::<u32>().expect("fresh attach should succeed");
    assert_eq!(mapping.read(), 0, "a new segment starts zero-filled");
}

#[test]
fn mapping_covers_requested_size() {
    let (_file, id) = identity(21);
    let segment = SharedMemorySegment::create(&id, 4096).expect("segment should be created");
    let mapping = segment.attach::<u8>().expect("attach should succeed");
    assert_eq!(mapping.len(), segment.size());

    let pattern: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
    mapping.write_bytes(0, &pattern).expect("write should fit");

    let mut copy = vec![0u8; 4096];
    mapping.read_bytes(0, &mut copy).expect("read should fit");
    assert_eq!(copy, pattern);
}

#[test]
fn larger_size_than_existing_segment_is_rejected() {
    let (_file, id) = identity(23);
    let _small = SharedMemorySegment::create(&id, 64).expect("segment should be created");

    let err = SharedMemorySegment::create(&id, 1 << 20).unwrap_err();
    assert!(matches!(err, genipc::IpcError::SegmentCreation { .. }));
}
