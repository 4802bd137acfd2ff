#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use common::{drain, next, sh};
use linemux::io::{Backend, PollBackend, StreamState, ThreadBackend};
use linemux::{FatalError, ProcessChannel, Ready, Selector, StreamKind, Timeout};

fn mixed_terminators<B: Backend>() {
    let mut channel = sh::<B>("printf 'one\\rtwo\\n\\rthree\\r\\n\\r\\nfive'");
    {
        let mut selector = Selector::<B>::new();
        selector.add(&channel).unwrap();
        assert_eq!(
            drain(&mut selector, &channel, StreamKind::Stdout),
            ["one", "two", "three", "", "five"]
        );
        assert_eq!(next(&mut selector, &channel, StreamKind::Stderr), Ready::Eof);
    }
    channel.close().unwrap();
}

#[test]
fn test_mixed_terminators_poll() {
    mixed_terminators::<PollBackend>();
}

#[test]
fn test_mixed_terminators_thread() {
    mixed_terminators::<ThreadBackend>();
}

fn many_channels<B: Backend>() {
    let mut channels: Vec<ProcessChannel<B>> = (0..8)
        .map(|i| sh::<B>(&format!("for n in 1 2 3; do echo c{i}-$n; echo e{i}-$n >&2; done")))
        .collect();
    {
        let mut selector = Selector::<B>::new();
        for channel in &channels {
            selector.add(channel).unwrap();
        }
        for (i, channel) in channels.iter().enumerate() {
            let out = drain(&mut selector, channel, StreamKind::Stdout);
            assert_eq!(out, [format!("c{i}-1"), format!("c{i}-2"), format!("c{i}-3")]);
            let err = drain(&mut selector, channel, StreamKind::Stderr);
            assert_eq!(err, [format!("e{i}-1"), format!("e{i}-2"), format!("e{i}-3")]);
        }
    }
    for channel in &mut channels {
        assert!(channel.close().unwrap().unwrap().success());
    }
}

#[test]
fn test_many_channels_poll() {
    many_channels::<PollBackend>();
}

#[test]
fn test_many_channels_thread() {
    many_channels::<ThreadBackend>();
}

fn eof_reported_once<B: Backend>() {
    let mut channel = sh::<B>("exit 0");
    {
        let mut selector = Selector::<B>::new();
        selector.add(&channel).unwrap();
        assert_eq!(next(&mut selector, &channel, StreamKind::Stdout), Ready::Eof);
        assert_eq!(next(&mut selector, &channel, StreamKind::Stderr), Ready::Eof);
        for _ in 0..3 {
            selector.wait(Timeout::from_millis(5)).unwrap();
            assert_eq!(selector.try_getline_in(&channel), None);
            assert_eq!(selector.try_getline_err(&channel), None);
        }
        assert_eq!(selector.stream_state(&channel, StreamKind::Stdout), StreamState::Done);
    }
    channel.close().unwrap();
}

#[test]
fn test_eof_reported_once_poll() {
    eof_reported_once::<PollBackend>();
}

#[test]
fn test_eof_reported_once_thread() {
    eof_reported_once::<ThreadBackend>();
}

#[test]
fn test_blocked_stream_does_not_starve_ready_one() {
    let quiet = sh::<PollBackend>("sleep 5");
    let chatty = sh::<PollBackend>("while :; do echo tick; sleep 0.05; done");
    let mut selector = Selector::<PollBackend>::new();
    selector.add(&quiet).unwrap();
    selector.add(&chatty).unwrap();

    let start = Instant::now();
    for _ in 0..3 {
        assert_eq!(
            next(&mut selector, &chatty, StreamKind::Stdout),
            Ready::Line("tick".into())
        );
    }
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(selector.stream_state(&quiet, StreamKind::Stdout), StreamState::Pending);
}

#[test]
fn test_overrun_surfaces_through_selector() {
    // One line of 70000 bytes, past the 65536-byte cap
    let channel = sh::<PollBackend>("head -c 70000 /dev/zero | tr '\\0' x; echo");
    let mut selector = Selector::<PollBackend>::new();
    selector.add(&channel).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let err = loop {
        match selector.wait(Timeout::from_millis(200)) {
            Err(e) => break e,
            Ok(()) => assert!(Instant::now() < deadline, "overrun not detected"),
        }
    };
    assert!(matches!(err, FatalError::LineOverrun { limit: 65536 }));
}

#[test]
fn test_write_after_child_exit_is_fatal() {
    let channel = sh::<PollBackend>("exec 0<&-; exit 0");
    let mut selector = Selector::<PollBackend>::new();
    selector.add(&channel).unwrap();
    assert_eq!(next(&mut selector, &channel, StreamKind::Stdout), Ready::Eof);

    // The child is gone; the pipe has no reader
    let big = vec![b'x'; 1 << 20];
    assert!(matches!(
        channel.write_all(&big),
        Err(FatalError::Os { op: "write", .. })
    ));
}
