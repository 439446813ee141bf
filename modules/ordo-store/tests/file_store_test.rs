//! Durability tests for the file-backed store.

use std::fs::OpenOptions;
use std::io::Write;

use ordo_store::{FileStore, FileStoreOptions, MessageStore, PollResult, StoreError, StoreMode};

fn collect(store: &FileStore) -> Vec<Vec<u8>> {
    let mut poller = store.poller();
    let mut seen = Vec::new();
    while poller
        .poll(&mut |m| {
            seen.push(m.to_vec());
            PollResult::Poll
        })
        .unwrap()
        == 1
    {}
    seen
}

#[test]
fn messages_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");

    {
        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        let mut appender = store.appender();
        appender.append(b"one").unwrap();
        appender.append(b"two").unwrap();
        appender.append(b"").unwrap();
    }

    let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
    assert_eq!(store.mode(), StoreMode::KeepOnPoll);
    assert_eq!(store.size(), 3);
    assert_eq!(store.truncated_bytes(), 0);
    assert_eq!(collect(&store), vec![b"one".to_vec(), b"two".to_vec(), Vec::new()]);
    assert_eq!(store.last_message().unwrap(), Some(Vec::new()));
}

#[test]
fn torn_tail_is_truncated_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("commands.log");

    let intact_len = {
        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        let mut appender = store.appender();
        appender.append(b"complete").unwrap();
        store.committed_len()
    };

    // Half-written frame: header claims 100 bytes, only 3 follow.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&100u32.to_le_bytes()).unwrap();
    file.write_all(&0u32.to_le_bytes()).unwrap();
    file.write_all(b"abc").unwrap();
    drop(file);

    let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
    assert_eq!(store.truncated_bytes(), 11);
    assert_eq!(store.committed_len(), intact_len);
    assert_eq!(collect(&store), vec![b"complete".to_vec()]);

    store.appender().append(b"after repair").unwrap();
    assert_eq!(
        collect(&store),
        vec![b"complete".to_vec(), b"after repair".to_vec()]
    );
}

#[test]
fn checksum_failure_on_the_last_frame_is_a_torn_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");

    {
        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        let mut appender = store.appender();
        appender.append(b"good").unwrap();
        appender.append(b"flipped").unwrap();
    }

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
    assert_eq!(store.size(), 1);
    assert_eq!(store.last_message().unwrap(), Some(b"good".to_vec()));
}

#[test]
fn checksum_failure_before_the_tail_fails_the_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");

    let second_frame = {
        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        let mut appender = store.appender();
        appender.append(b"first").unwrap();
        let offset = store.committed_len();
        appender.append(b"second").unwrap();
        appender.append(b"third").unwrap();
        appender.append(b"fourth").unwrap();
        offset
    };
    let len_before = std::fs::metadata(&path).unwrap().len();

    // Flip one payload byte of the second frame (8-byte header precedes it).
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[second_frame as usize + 8] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let err = FileStore::open(&path, FileStoreOptions::default()).err().unwrap();
    assert!(matches!(err, StoreError::Corrupt { offset, .. } if offset == second_frame));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);
}

#[test]
fn reopening_with_a_smaller_message_limit_keeps_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");

    {
        let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
        let mut appender = store.appender();
        appender.append(&[7u8; 64]).unwrap();
        appender.append(b"small").unwrap();
    }
    let len_before = std::fs::metadata(&path).unwrap().len();

    let narrow = FileStoreOptions {
        sync_on_commit: false,
        max_message_bytes: 32,
    };
    let err = FileStore::open(&path, narrow).err().unwrap();
    assert!(matches!(err, StoreError::Corrupt { offset: 0, .. }));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);

    let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
    assert_eq!(store.size(), 2);
    assert_eq!(store.truncated_bytes(), 0);
}

#[test]
fn poller_sees_appends_made_after_it_was_created() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("log"), FileStoreOptions::default()).unwrap();
    let mut poller = store.poller();
    assert_eq!(poller.poll(&mut |_| PollResult::Poll).unwrap(), 0);

    let mut appender = store.appender();
    let mut context = appender.appending().unwrap();
    context.buffer().extend_from_slice(b"late");
    context.commit(4).unwrap();

    let mut seen = Vec::new();
    assert_eq!(
        poller
            .poll(&mut |m| {
                seen.extend_from_slice(m);
                PollResult::Poll
            })
            .unwrap(),
        1
    );
    assert_eq!(seen, b"late");
    assert_eq!(poller.position(), 1);
}

#[test]
fn dropped_context_writes_nothing_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log");
    let store = FileStore::open(&path, FileStoreOptions::default()).unwrap();
    let mut appender = store.appender();

    {
        let mut context = appender.appending().unwrap();
        context.buffer().extend_from_slice(b"never committed");
    }

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    assert!(store.is_empty());
}
