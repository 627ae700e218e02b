use super::*;
use crate::services::ports::search::Query;
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use tempfile::tempdir;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Writes `count` matching lines spread over a few files.
fn write_matches(root: &Path, count: usize) {
    let per_file = 50;
    for (file, chunk) in (0..count).collect::<Vec<_>>().chunks(per_file).enumerate() {
        let body: String = chunk
            .iter()
            .map(|i| format!("line {} has search in it\nfiller\n", i))
            .collect();
        fs::write(root.join(format!("f{}.txt", file)), body).unwrap();
    }
}

fn spawn_buffered(
    rt: &tokio::runtime::Runtime,
    root: &Path,
    config: &SearchConfig,
    listener: Listener<BufferedSearch>,
) -> BufferedSearch {
    let (process, events) =
        ProcessSearch::spawn(rt.handle(), &Query::new(root, "search"), &config.program);
    BufferedSearch::spawn(rt.handle(), process, events, config, listener)
}

fn forward(tx: mpsc::Sender<SearchEvent>) -> Listener<BufferedSearch> {
    Box::new(move |_: &BufferedSearch, event: SearchEvent| {
        let _ = tx.send(event);
    })
}

fn drain_until_exit(rx: &mpsc::Receiver<SearchEvent>) -> (Vec<Vec<Match>>, ExitReason) {
    let mut batches = Vec::new();
    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(SearchEvent::Results(batch)) => batches.push(batch),
            Ok(SearchEvent::Stderr(text)) => panic!("unexpected stderr: {}", text),
            Ok(SearchEvent::Exit(reason)) => return (batches, reason),
            Err(_) => panic!("Timeout waiting for exit"),
        }
    }
}

#[test]
fn test_batches_are_capped_and_complete() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 230);

    let (tx, rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), forward(tx));

    let (batches, reason) = drain_until_exit(&rx);
    assert_eq!(reason, ExitReason::Completed(0));
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 40));
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 230);
    assert!(search.exited());
    assert!(!search.paused());
    assert_eq!(search.exit_reason(), Some(ExitReason::Completed(0)));
}

#[test]
fn test_can_be_paused_immediately_after_creation() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);

    let (tx, rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), forward(tx));
    assert!(!search.paused());
    search.pause();
    assert!(search.paused());

    std::thread::sleep(Duration::from_millis(200));
    assert!(rx.try_recv().is_err());
    assert!(search.paused());

    search.resume();
    assert!(!search.paused());

    let (batches, reason) = drain_until_exit(&rx);
    assert_eq!(reason, ExitReason::Completed(0));
    assert!(batches.len() > 1);
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 100);
}

#[test]
fn test_can_be_paused_from_results_then_killed() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);

    let (tx, rx) = mpsc::channel();
    let listener: Listener<BufferedSearch> =
        Box::new(move |search: &BufferedSearch, event: SearchEvent| {
            if let SearchEvent::Results(_) = &event {
                assert!(!search.paused());
                search.pause();
                assert!(search.paused());
            }
            let _ = tx.send(event);
        });
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), listener);

    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(first, SearchEvent::Results(_)));
    std::thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());

    search.kill();
    let (batches, reason) = drain_until_exit(&rx);
    assert!(batches.is_empty());
    assert_eq!(reason, ExitReason::Terminated);
    assert!(!search.paused());
}

#[test]
fn test_pause_from_other_thread_lets_at_most_one_batch_through() {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 1000);

    let after_pause = Arc::new(AtomicBool::new(false));
    let late = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let listener: Listener<BufferedSearch> = {
        let after_pause = after_pause.clone();
        let late = late.clone();
        Box::new(move |_: &BufferedSearch, event: SearchEvent| {
            if let SearchEvent::Results(_) = &event {
                if after_pause.load(Ordering::SeqCst) {
                    late.fetch_add(1, Ordering::SeqCst);
                }
                // Slow consumer, so the search is still running when paused.
                std::thread::sleep(Duration::from_millis(5));
            }
            let _ = tx.send(event);
        })
    };
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), listener);

    let first = match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
        SearchEvent::Results(batch) => batch,
        other => panic!("unexpected event: {:?}", other),
    };
    search.pause();
    after_pause.store(true, Ordering::SeqCst);

    std::thread::sleep(Duration::from_millis(200));
    assert!(late.load(Ordering::SeqCst) <= 1);
    assert!(search.paused());

    search.resume();
    let (batches, reason) = drain_until_exit(&rx);
    assert_eq!(reason, ExitReason::Completed(0));
    assert_eq!(first.len() + batches.iter().map(Vec::len).sum::<usize>(), 1000);
}

#[test]
fn test_can_be_killed_immediately_after_creation() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);

    let (tx, rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), forward(tx));
    search.kill();

    let (batches, reason) = drain_until_exit(&rx);
    assert!(batches.is_empty());
    assert!(reason.is_terminated());
    assert_eq!(reason.code(), None);

    std::thread::sleep(Duration::from_millis(100));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_can_be_killed_from_results() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);

    let (tx, rx) = mpsc::channel();
    let listener: Listener<BufferedSearch> =
        Box::new(move |search: &BufferedSearch, event: SearchEvent| {
            if let SearchEvent::Results(_) = &event {
                search.kill();
            }
            let _ = tx.send(event);
        });
    let _search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), listener);

    let (batches, reason) = drain_until_exit(&rx);
    assert_eq!(batches.len(), 1);
    assert_eq!(reason, ExitReason::Terminated);
}

#[test]
fn test_failsafe_kills_paused_search() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 10);

    let config = SearchConfig::default().with_pause_timeout(Duration::from_millis(200));
    let (tx, rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &config, forward(tx));
    search.pause();

    let (batches, reason) = drain_until_exit(&rx);
    assert!(batches.is_empty());
    assert_eq!(reason, ExitReason::Terminated);
    assert!(search.exited());
    assert!(!search.paused());
}

#[test]
fn test_resume_before_failsafe_completes_normally() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 10);

    let config = SearchConfig::default().with_pause_timeout(Duration::from_millis(400));
    let (tx, rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &config, forward(tx));

    search.pause();
    std::thread::sleep(Duration::from_millis(150));
    search.resume();
    std::thread::sleep(Duration::from_millis(400));

    let (batches, reason) = drain_until_exit(&rx);
    assert_eq!(reason, ExitReason::Completed(0));
    assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 10);
}

#[test]
fn test_kill_while_paused_drops_buffered_matches() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 10);

    let config = SearchConfig {
        batch_size: 4,
        ..SearchConfig::default()
    };
    let (tx, rx) = mpsc::channel();
    let listener: Listener<BufferedSearch> =
        Box::new(move |search: &BufferedSearch, event: SearchEvent| {
            if let SearchEvent::Results(_) = &event {
                search.try_pause();
            }
            let _ = tx.send(event);
        });
    let search = spawn_buffered(&rt, dir.path(), &config, listener);

    let (first, reason) = {
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert!(rx.try_recv().is_err());
        assert!(search.paused());
        search.kill();
        let (rest, reason) = drain_until_exit(&rx);
        assert!(rest.is_empty());
        (first, reason)
    };

    match first {
        SearchEvent::Results(batch) => assert!(batch.len() <= 4),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(reason, ExitReason::Terminated);
}

#[test]
fn test_try_variants_do_not_panic() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 10);

    let (tx, rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), forward(tx));

    assert!(!search.try_resume());
    assert!(search.try_pause());
    assert!(!search.try_pause());
    assert!(search.try_kill());
    assert!(!search.try_kill());
    assert!(!search.try_resume());

    let (_, reason) = drain_until_exit(&rx);
    assert_eq!(reason, ExitReason::Terminated);
    assert!(!search.try_pause());
}

#[test]
#[should_panic(expected = "pause: search is not running")]
fn test_double_pause_panics() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 100);
    let (tx, _rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), forward(tx));
    search.pause();
    search.pause();
}

#[test]
#[should_panic(expected = "resume: search is not paused")]
fn test_resume_without_pause_panics() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    let (tx, _rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), forward(tx));
    search.resume();
}

#[test]
#[should_panic(expected = "Not running")]
fn test_kill_after_exit_panics() {
    let rt = create_runtime();
    let dir = tempdir().unwrap();
    write_matches(dir.path(), 3);

    let (tx, rx) = mpsc::channel();
    let search = spawn_buffered(&rt, dir.path(), &SearchConfig::default(), forward(tx));
    let _ = drain_until_exit(&rx);
    search.kill();
}
