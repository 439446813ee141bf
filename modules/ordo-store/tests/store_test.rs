//! Behavioural tests for the in-memory store.

use ordo_store::{InMemoryStore, MessageStore, PollResult, StoreMode};

fn payloads(store: &InMemoryStore, count: usize) -> Vec<Vec<u8>> {
    let mut appender = store.appender();
    let messages: Vec<Vec<u8>> = (0..count).map(|i| format!("msg-{i}").into_bytes()).collect();
    for message in &messages {
        appender.append(message).unwrap();
    }
    messages
}

fn drain(poller: &mut dyn ordo_store::Poller) -> Vec<Vec<u8>> {
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

// =========================================================================
// Ordering
// =========================================================================

#[test]
fn remove_on_poll_delivers_one_per_call_in_append_order() {
    let store = InMemoryStore::new(StoreMode::RemoveOnPoll);
    let expected = payloads(&store, 5);
    let mut poller = store.poller();

    for message in &expected {
        let mut seen = None;
        let consumed = poller
            .poll(&mut |m| {
                seen = Some(m.to_vec());
                PollResult::Poll
            })
            .unwrap();
        assert_eq!(consumed, 1);
        assert_eq!(seen.as_ref(), Some(message));
    }

    for _ in 0..3 {
        assert_eq!(poller.poll(&mut |_| PollResult::Poll).unwrap(), 0);
    }
    assert!(store.is_empty());
}

#[test]
fn keep_on_poll_replays_for_every_new_poller() {
    let store = InMemoryStore::new(StoreMode::KeepOnPoll);
    let expected = payloads(&store, 4);

    let mut first = store.poller();
    assert_eq!(drain(first.as_mut()), expected);
    assert_eq!(drain(first.as_mut()), Vec::<Vec<u8>>::new());

    let mut second = store.poller();
    assert_eq!(drain(second.as_mut()), expected);

    assert!(first.move_to_start());
    assert_eq!(drain(first.as_mut()), expected);
    assert_eq!(store.size(), 4);
}

#[test]
fn pollers_advance_independently() {
    let store = InMemoryStore::new(StoreMode::KeepOnPoll);
    payloads(&store, 3);

    let mut fast = store.poller();
    let mut slow = store.poller();
    drain(fast.as_mut());
    assert_eq!(fast.position(), 3);
    assert_eq!(slow.position(), 0);

    slow.poll(&mut |_| PollResult::Poll).unwrap();
    assert_eq!(slow.position(), 1);
}

#[test]
fn peek_leaves_message_in_place() {
    let store = InMemoryStore::new(StoreMode::RemoveOnPoll);
    payloads(&store, 2);
    let mut poller = store.poller();

    let mut peeked = 0;
    let consumed = poller
        .poll(&mut |_| {
            peeked += 1;
            PollResult::Peek
        })
        .unwrap();
    assert_eq!(consumed, 0);
    assert_eq!(peeked, 1);
    assert_eq!(store.size(), 2);

    let mut seen = Vec::new();
    poller
        .poll(&mut |m| {
            seen.push(m.to_vec());
            PollResult::Poll
        })
        .unwrap();
    assert_eq!(seen, vec![b"msg-0".to_vec()]);
}

#[test]
fn poll_batch_stops_at_first_peek() {
    let store = InMemoryStore::new(StoreMode::KeepOnPoll);
    payloads(&store, 5);
    let mut poller = store.poller();

    let mut calls = 0;
    let consumed = poller
        .poll_batch(10, &mut |_| {
            calls += 1;
            if calls == 3 {
                PollResult::Peek
            } else {
                PollResult::Poll
            }
        })
        .unwrap();

    assert_eq!(consumed, 2);
    assert_eq!(poller.position(), 2);
}

// =========================================================================
// Appending contexts
// =========================================================================

#[test]
fn abort_has_no_observable_effect() {
    let store = InMemoryStore::new(StoreMode::KeepOnPoll);
    let mut appender = store.appender();

    {
        let mut context = appender.appending().unwrap();
        context.buffer().extend_from_slice(b"explicitly aborted");
        context.abort();
    }
    {
        let mut context = appender.appending().unwrap();
        context.buffer().extend_from_slice(b"dropped without commit");
    }

    assert_eq!(store.size(), 0);
    let mut poller = store.poller();
    assert_eq!(poller.poll(&mut |_| PollResult::Poll).unwrap(), 0);
}

#[test]
fn only_committed_contexts_are_visible() {
    let store = InMemoryStore::new(StoreMode::RemoveOnPoll);
    let mut appender = store.appender();

    for i in 0..5 {
        let payload = format!("payload-{i}");
        let mut context = appender.appending().unwrap();
        context.buffer().extend_from_slice(payload.as_bytes());
        if i % 2 == 0 {
            context.commit(payload.len()).unwrap();
        }
    }

    assert_eq!(store.size(), 3);
    let mut poller = store.poller();
    assert_eq!(
        drain(poller.as_mut()),
        vec![
            b"payload-0".to_vec(),
            b"payload-2".to_vec(),
            b"payload-4".to_vec()
        ]
    );
}

#[test]
fn commit_publishes_only_the_requested_prefix() {
    let store = InMemoryStore::new(StoreMode::KeepOnPoll);
    let mut appender = store.appender();

    let mut context = appender.appending().unwrap();
    context.buffer().extend_from_slice(b"keep|scratch");
    context.commit(4).unwrap();

    assert_eq!(store.last_message().unwrap(), Some(b"keep".to_vec()));
}

#[test]
fn commit_beyond_buffer_fails_without_publishing() {
    let store = InMemoryStore::new(StoreMode::KeepOnPoll);
    let mut appender = store.appender();

    let mut context = appender.appending().unwrap();
    context.buffer().extend_from_slice(b"abc");
    assert!(context.commit(10).is_err());
    assert!(store.is_empty());
}

// =========================================================================
// Capacity
// =========================================================================

#[test]
fn bounded_store_reports_full_and_recovers_after_consumption() {
    let store = InMemoryStore::bounded(StoreMode::RemoveOnPoll, 2).unwrap();
    let mut appender = store.appender();
    appender.append(b"a").unwrap();
    appender.append(b"b").unwrap();

    let err = appender.append(b"c").unwrap_err();
    assert!(err.is_backpressure());

    let mut poller = store.poller();
    poller.poll(&mut |_| PollResult::Poll).unwrap();
    appender.append(b"c").unwrap();
    assert_eq!(store.messages(), vec![b"b".to_vec(), b"c".to_vec()]);
}
