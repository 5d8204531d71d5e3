//! Burst draining keeps enqueue order across bursts.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use pgasync::inbox::{Inbox, InboxKind};
use pgasync::ProgressLevel;
use std::sync::Arc;

fn recording(log: &Arc<Mutex<Vec<char>>>, tag: char) -> pgasync::inbox::Lpc {
    let log = Arc::clone(log);
    Box::new(move || log.lock().push(tag))
}

#[test]
fn bursts_resume_where_the_last_one_stopped() {
    init_test_logging();
    test_phase!("bursts_resume_where_the_last_one_stopped");
    for kind in [InboxKind::Sharded, InboxKind::LockFree] {
        test_section!(format!("{kind:?}"));
        let inbox = Inbox::new(kind);
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ['A', 'B', 'C', 'D'] {
            inbox.enqueue(ProgressLevel::User, recording(&log, tag));
        }

        assert_eq!(inbox.burst(ProgressLevel::User, 2), 2);
        assert_eq!(*log.lock(), vec!['A', 'B']);
        assert_eq!(inbox.len(ProgressLevel::User), 2);

        assert_eq!(inbox.burst(ProgressLevel::User, 2), 2);
        assert_eq!(*log.lock(), vec!['A', 'B', 'C', 'D']);
        assert!(inbox.is_empty());
    }
    test_complete!("bursts_resume_where_the_last_one_stopped");
}

#[test]
fn work_enqueued_during_a_burst_runs_after_older_items() {
    init_test_logging();
    for kind in [InboxKind::Sharded, InboxKind::LockFree] {
        let inbox = Arc::new(Inbox::new(kind));
        let log = Arc::new(Mutex::new(Vec::new()));

        let again = Arc::clone(&inbox);
        let late = recording(&log, 'Z');
        let first_log = Arc::clone(&log);
        inbox.enqueue(
            ProgressLevel::User,
            Box::new(move || {
                first_log.lock().push('A');
                again.enqueue(ProgressLevel::User, late);
            }),
        );
        inbox.enqueue(ProgressLevel::User, recording(&log, 'B'));

        let mut ran = 0;
        while !inbox.is_empty() {
            ran += inbox.burst(ProgressLevel::User, 1);
        }
        assert_eq!(ran, 3);
        assert_eq!(*log.lock(), vec!['A', 'B', 'Z'], "{kind:?}");
    }
}

#[test]
fn levels_are_drained_independently() {
    init_test_logging();
    let inbox = Inbox::new(InboxKind::Sharded);
    let log = Arc::new(Mutex::new(Vec::new()));
    inbox.enqueue(ProgressLevel::User, recording(&log, 'u'));
    inbox.enqueue(ProgressLevel::Internal, recording(&log, 'i'));

    assert_eq!(inbox.burst(ProgressLevel::Internal, 10), 1);
    assert_eq!(*log.lock(), vec!['i']);
    assert_eq!(inbox.len(ProgressLevel::User), 1);
}
