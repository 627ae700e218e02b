use super::*;
use crate::services::ports::config::SearchConfig;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;
use tempfile::tempdir;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn write_matches(root: &Path, count: usize) {
    let body: String = (0..count).map(|i| format!("search {}\n", i)).collect();
    fs::write(root.join("a.txt"), body).unwrap();
}

fn session(rt: &tokio::runtime::Runtime) -> (SearchSession, Receiver<SessionMessage>) {
    let (tx, rx) = mpsc::channel();
    let scheduler = SearchScheduler::new(rt.handle().clone());
    (SearchSession::new(scheduler, tx), rx)
}

fn recv(rx: &Receiver<SessionMessage>) -> SessionMessage {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("Timeout waiting for session message")
}

#[test]
fn test_one_batch_in_flight_until_load_more() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);
    let (session, rx) = session(&rt);

    assert!(session.search(dir.path(), "search", false));

    let mut total = 0;
    loop {
        match recv(&rx) {
            SessionMessage::Results { query, results } => {
                assert_eq!(query, "search");
                assert!(results.len() <= 40);
                total += results.len();

                std::thread::sleep(Duration::from_millis(50));
                assert!(rx.try_recv().is_err());
                assert!(session.load_more());
            }
            SessionMessage::End { query, reason } => {
                assert_eq!(query, "search");
                assert_eq!(reason, ExitReason::Completed(0));
                break;
            }
        }
    }
    assert_eq!(total, 100);
    assert!(!session.load_more());
}

#[test]
fn test_load_more_right_after_batch_resumes() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 400);

    let (tx, rx) = mpsc::channel();
    let config = SearchConfig::default().with_pause_timeout(Duration::from_millis(300));
    let scheduler = SearchScheduler::with_config(rt.handle().clone(), config);
    let session = SearchSession::new(scheduler, tx);
    assert!(session.search(dir.path(), "search", false));

    let mut total = 0;
    let mut batches = 0;
    loop {
        match recv(&rx) {
            SessionMessage::Results { results, .. } => {
                batches += 1;
                total += results.len();
                assert!(session.load_more(), "batch {} was not resumable", batches);
            }
            SessionMessage::End { reason, .. } => {
                assert_eq!(reason, ExitReason::Completed(0));
                break;
            }
        }
    }
    assert_eq!(total, 400);
    assert!(batches >= 10);
}

#[test]
fn test_empty_pattern_is_ignored() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    let (session, rx) = session(&rt);

    assert!(!session.search(dir.path(), "", false));
    assert_eq!(session.current_query(), None);
    assert!(!session.load_more());
    std::thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_new_search_supersedes_previous() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);
    fs::write(dir.path().join("b.txt"), "other\n").unwrap();
    let (session, rx) = session(&rt);

    session.search(dir.path(), "search", false);
    match recv(&rx) {
        SessionMessage::Results { query, .. } => assert_eq!(query, "search"),
        other => panic!("unexpected message: {:?}", other),
    }

    session.search(dir.path(), "OTHER", true);
    let mut ended = false;
    let mut found = Vec::new();
    for _ in 0..2 {
        match recv(&rx) {
            SessionMessage::End { query, reason } => {
                assert_eq!(query, "search");
                assert_eq!(reason, ExitReason::Terminated);
                ended = true;
            }
            SessionMessage::Results { query, results } => {
                assert_eq!(query, "OTHER");
                found.extend(results);
            }
        }
    }
    assert!(ended);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].line, "other");
    assert!(session.current_query().is_some_and(|q| q.ignore_case));
}

#[test]
fn test_close_kills_running_search() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);
    let (session, rx) = session(&rt);

    session.search(dir.path(), "search", false);
    assert!(matches!(recv(&rx), SessionMessage::Results { .. }));

    session.close();
    assert_eq!(
        recv(&rx),
        SessionMessage::End {
            query: "search".to_string(),
            reason: ExitReason::Terminated,
        }
    );
    assert!(!session.load_more());
    session.close();
}

#[test]
fn test_drop_kills_running_search() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);
    let (session, rx) = session(&rt);

    session.search(dir.path(), "search", false);
    assert!(matches!(recv(&rx), SessionMessage::Results { .. }));
    drop(session);

    assert!(matches!(
        recv(&rx),
        SessionMessage::End {
            reason: ExitReason::Terminated,
            ..
        }
    ));
}
