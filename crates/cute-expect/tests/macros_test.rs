//! Macro surface driven through `run_unit` with an in-memory outcome sink.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use cute_core::{FailureRecord, Record, RecordDecoder, Verdict};
use cute_expect::{
    UnitPlan, check, check_that, ensure, ensure_that, expect_call, fail, mock, mock_call,
    mock_parm, run_unit, skip,
};

#[derive(Clone, Default)]
struct Capture(Rc<RefCell<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_body(body: fn()) -> (Verdict, Vec<Record>) {
    let capture = Capture::default();
    let plan = UnitPlan {
        body: Some(body),
        ..UnitPlan::default()
    };
    let verdict = run_unit(plan, Box::new(capture.clone()));
    let bytes = capture.0.borrow().clone();
    (verdict, RecordDecoder::new().feed(&bytes).unwrap())
}

fn failures(records: &[Record]) -> Vec<FailureRecord> {
    records
        .iter()
        .filter_map(|r| match r {
            Record::Failure(f) => Some(f.clone()),
            _ => None,
        })
        .collect()
}

// Mocked collaborators.

fn write_block(fd: i32, len: usize) -> isize {
    mock!(write_block, fd, len => isize)
}

fn flush_all(fd: i32) {
    mock!(flush_all, fd)
}

fn open_path(path: &str) -> i32 {
    let mut call = mock_call!(open_path);
    mock_parm!(call, path);
    call.retval(cute_expect::here!())
}

// Code under test.

fn save(fd: i32, payload: &[u8]) -> bool {
    let written = write_block(fd, payload.len());
    flush_all(fd);
    written == payload.len() as isize
}

#[test]
fn passing_checks_record_nothing() {
    let (verdict, records) = run_body(|| {
        check!(2 + 2 == 4);
        check_that!(7u8, in_range(1, 10));
        check_that!("/tmp/cute.log", begin("/tmp"));
        ensure!(true);
        ensure_that!(-3i64, lower(0));
    });
    assert_eq!(verdict, Verdict::Pass);
    assert!(failures(&records).is_empty());
}

#[test]
fn failed_check_carries_expression_and_location() {
    let (verdict, records) = run_body(|| {
        let width = 3;
        check!(width > 4);
        check_that!(width, equal(4));
    });
    assert_eq!(verdict, Verdict::Fail);
    let f = failures(&records);
    assert_eq!(f.len(), 2);
    assert_eq!(f[0].expression, "width > 4");
    assert!(f[0].file.ends_with("macros_test.rs"));
    assert!(f[0].line > 0);
    assert!(!f[0].fatal);
    assert_eq!(f[1].message, "`width` expected equal 4, found 3");
}

#[test]
fn fail_macro_formats_reason() {
    let (verdict, records) = run_body(|| {
        fail!("code {}", 12);
    });
    assert_eq!(verdict, Verdict::Fail);
    let f = failures(&records);
    assert_eq!(f[0].message, "explicit fail requested: code 12");
    assert!(f[0].fatal);
}

#[test]
fn skip_macro_ends_with_skip() {
    let (verdict, records) = run_body(|| {
        skip!("no network");
    });
    assert_eq!(verdict, Verdict::Skip);
    let notice = records.iter().find_map(|r| match r {
        Record::Skip(n) => Some(n.clone()),
        _ => None,
    });
    assert_eq!(notice.unwrap().reason.as_deref(), Some("no network"));
}

#[test]
fn mocked_calls_in_order_pass() {
    let (verdict, records) = run_body(|| {
        expect_call!(write_block, fd: equal(3), len: in_range(1, 64) => 5isize);
        expect_call!(flush_all, fd: equal(3));
        check!(save(3, b"hello"));
    });
    assert_eq!(failures(&records), Vec::new());
    assert_eq!(verdict, Verdict::Pass);
}

#[test]
fn parameter_mismatch_fails_the_test() {
    let (verdict, records) = run_body(|| {
        expect_call!(write_block, fd: equal(1), len: greater(0) => 5isize);
        write_block(2, 5);
    });
    assert_eq!(verdict, Verdict::Fail);
    let f = failures(&records);
    assert_eq!(f.len(), 1);
    assert!(f[0].message.contains("parameter `fd` of `write_block`"), "{}", f[0].message);
}

#[test]
fn unexpected_call_is_reported() {
    let (verdict, records) = run_body(|| {
        flush_all(1);
    });
    assert_eq!(verdict, Verdict::Fail);
    assert!(failures(&records)[0].message.starts_with("missing expectation"));
}

#[test]
fn leftover_expectation_fails_at_end_of_test() {
    let (verdict, records) = run_body(|| {
        expect_call!(flush_all, fd: equal(1));
    });
    assert_eq!(verdict, Verdict::Fail);
    let f = failures(&records);
    assert!(f[0].message.starts_with("expected calls not consumed"), "{}", f[0].message);
    assert!(f[0].file.ends_with("macros_test.rs"));
}

fn open_path_carelessly(path: &str) {
    let mut call = mock_call!(open_path);
    mock_parm!(call, path);
}

#[test]
fn unfinished_mock_call_is_a_failure() {
    let (verdict, records) = run_body(|| {
        expect_call!(open_path, path: equal("/etc/hosts") => 3);
        open_path_carelessly("/etc/hosts");
    });
    assert_eq!(verdict, Verdict::Fail);
    let f = failures(&records);
    assert_eq!(f.len(), 1, "{f:?}");
    assert_eq!(f[0].message, "call to `open_path` dropped without `finish` or `retval`");
    assert!(f[0].fatal);
    assert!(f[0].file.ends_with("macros_test.rs"));
}

#[test]
fn string_parameters_and_return_values() {
    let (verdict, records) = run_body(|| {
        expect_call!(open_path, path: end(".conf") => 9);
        let fd = open_path("/etc/cute.conf");
        check_that!(fd, equal(9));
    });
    assert_eq!(failures(&records), Vec::new());
    assert_eq!(verdict, Verdict::Pass);
}
