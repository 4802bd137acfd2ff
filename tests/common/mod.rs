#![allow(dead_code)]

use std::time::{Duration, Instant};

use linemux::io::Backend;
use linemux::{ProcessChannel, Ready, Selector, StreamKind, Timeout};

/// Spawn `/bin/sh -c <script>`
pub fn sh<B: Backend>(script: &str) -> ProcessChannel<B> {
    ProcessChannel::open("/bin/sh", &["sh", "-c", script]).expect("spawn /bin/sh")
}

/// Wait until `kind` of `channel` reports something, failing after 10s
pub fn next<B: Backend>(
    selector: &mut Selector<'_, B>,
    channel: &ProcessChannel<B>,
    kind: StreamKind,
) -> Ready {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(ready) = selector.try_getline(channel, kind) {
            return ready;
        }
        assert!(Instant::now() < deadline, "no {kind} activity within 10s");
        selector.wait(Timeout::from_millis(200)).expect("selector wait");
    }
}

/// Every line of `kind` up to end of stream
pub fn drain<B: Backend>(
    selector: &mut Selector<'_, B>,
    channel: &ProcessChannel<B>,
    kind: StreamKind,
) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ready::Line(line) = next(selector, channel, kind) {
        lines.push(line.to_string_lossy().into_owned());
    }
    lines
}
