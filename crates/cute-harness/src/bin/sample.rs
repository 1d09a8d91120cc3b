//! Sample test binary exercising every outcome the harness classifies.
//!
//! `cute-sample run --filter healthy` runs only the passing part.

use std::process::ExitCode;
use std::time::Duration;

use cute_harness::prelude::*;

// ---------------------------------------------------------------------------
// Code under test
// ---------------------------------------------------------------------------

fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.rotate_left(5) ^ u32::from(b))
}

/// Collaborator the tests replace with a mock.
fn send(channel: i32, payload: &[u8]) -> isize {
    let payload = Mem(payload);
    mock!(send, channel, payload => isize)
}

fn close(channel: i32) {
    mock!(close, channel)
}

fn publish(channel: i32, message: &str) -> bool {
    let sent = send(channel, message.as_bytes());
    close(channel);
    sent == message.len() as isize
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

fn checksum_is_stable() {
    check_that!(checksum(b""), equal(0u32));
    check_that!(checksum(b"abc"), unequal(checksum(b"acb")));
    ensure!(checksum(b"cute") == checksum(b"cute"));
}

fn names_look_right() {
    let name = "cute-sample";
    check_that!(name, begin("cute"));
    check_that!(name, contain("-"));
    check_that!(name.len(), in_range(4, 32));
    check_that!(7, in_set([3, 5, 7, 11]));
}

fn publish_sends_then_closes() {
    expect_call!(send, channel: equal(4), payload: equal(Mem(b"hello")) => 5isize);
    expect_call!(close, channel: equal(4));
    check!(publish(4, "hello"));
}

fn publish_notices_short_write() {
    expect_call!(send, channel: equal(9), payload: unequal(Mem(b"")) => 2isize);
    expect_call!(close, channel: greater(0));
    check!(!publish(9, "hello"));
}

fn counts_wrong() {
    let total = [1, 2, 3].iter().sum::<i32>();
    check_that!(total, equal(7));
}

fn forgets_a_call() {
    expect_call!(close, channel: equal(1));
}

fn needs_network() {
    skip!("network access disabled");
}

fn unwraps_nothing() {
    let configured: Option<&str> = std::hint::black_box(None);
    let host = configured.unwrap();
    check_that!(host, end(".local"));
}

fn refuses_to_continue() {
    fail!("fixture {} is missing", "sample.db");
}

fn spins_forever() {
    loop {
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn gives_up() {
    std::process::abort();
}

fn build() -> Result<SuiteTree, cute_core::RegistryError> {
    Registry::new()
        .suite(Suite::new("sample"))
        .suite(Suite::new("healthy").within("sample"))
        .test(Test::new("checksum", checksum_is_stable).within("healthy"))
        .test(Test::new("names", names_look_right).within("healthy"))
        .test(Test::new("publish", publish_sends_then_closes).within("healthy"))
        .test(Test::new("short_write", publish_notices_short_write).within("healthy"))
        .suite(
            Suite::new("broken")
                .within("sample")
                .timeout(Timeout::After(Duration::from_millis(200))),
        )
        .test(Test::new("arithmetic", counts_wrong).within("broken"))
        .test(Test::new("mock_left_over", forgets_a_call).within("broken"))
        .test(Test::new("offline", needs_network).within("broken"))
        .test(Test::new("unwrap", unwraps_nothing).within("broken"))
        .test(Test::new("explicit", refuses_to_continue).within("broken"))
        .test(Test::new("hang", spins_forever).within("broken"))
        .test(Test::new("abort", gives_up).within("broken"))
        .build()
}

fn main() -> ExitCode {
    match build() {
        Ok(tree) => cute_harness::main(tree),
        Err(err) => {
            eprintln!("invalid suite tree: {err}");
            ExitCode::from(2)
        }
    }
}
