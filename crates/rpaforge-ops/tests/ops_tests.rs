use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use rpaforge_core::{
    EngineReport, ForgeConfig, OperationStatus, ProgressRecord, DEFAULT_FORMAT_VERSION,
    DEFAULT_KEY,
};
use rpaforge_ops::{
    ArchiveEngine, BatchRunner, DispatchError, OperationDispatcher, ProgressChannel,
};

/// Scripted engine recording every invocation.
struct MockEngine {
    responses: Mutex<VecDeque<Option<EngineReport>>>,
    calls: Mutex<Vec<EngineCall>>,
}

#[derive(Debug, Clone)]
struct EngineCall {
    source: PathBuf,
    dest: PathBuf,
    /// Entry names under the source directory at call time (create only).
    staged: Vec<String>,
    /// Channel content at call time.
    observed: Option<ProgressRecord>,
}

impl MockEngine {
    fn with_responses(responses: Vec<Option<EngineReport>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_response(&self) -> Option<EngineReport> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Some(EngineReport::ok(Vec::new())))
    }
}

impl ArchiveEngine for MockEngine {
    fn extract(
        &self,
        archive: &Path,
        dest_dir: &Path,
        progress_path: &Path,
    ) -> Option<EngineReport> {
        self.calls.lock().unwrap().push(EngineCall {
            source: archive.to_path_buf(),
            dest: dest_dir.to_path_buf(),
            staged: Vec::new(),
            observed: ProgressChannel::new(progress_path).read(),
        });
        self.next_response()
    }

    fn create(
        &self,
        source_dir: &Path,
        output: &Path,
        _format_version: u32,
        _key: u32,
        progress_path: &Path,
    ) -> Option<EngineReport> {
        let mut staged: Vec<String> = fs::read_dir(source_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        staged.sort();

        self.calls.lock().unwrap().push(EngineCall {
            source: source_dir.to_path_buf(),
            dest: output.to_path_buf(),
            staged,
            observed: ProgressChannel::new(progress_path).read(),
        });
        self.next_response()
    }
}

fn make_runner(engine: Arc<MockEngine>, work: &TempDir) -> (BatchRunner, ProgressChannel) {
    let channel = ProgressChannel::new(work.path().join("operation_progress.json"));
    let runner = BatchRunner::new(engine, channel.clone(), work.path().join("staging"));
    (runner, channel)
}

fn staging_entries(work: &TempDir) -> usize {
    match fs::read_dir(work.path().join("staging")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn test_extract_batch_completes() {
    let work = tempfile::tempdir().unwrap();
    let engine = MockEngine::with_responses(Vec::new());
    let (runner, channel) = make_runner(engine.clone(), &work);

    let archives = vec![
        work.path().join("one.rpa"),
        work.path().join("two.rpa"),
        work.path().join("three.rpa"),
    ];
    let outcome = runner.extract_batch(&archives, &work.path().join("out"));

    assert!(outcome.is_success());
    assert_eq!(outcome.summary, "Extracted 3 archives");
    assert_eq!(engine.calls().len(), 3);

    let record = channel.read().unwrap();
    assert!(record.is_completed());
    assert_eq!(record.current_batch_index, 3);
    assert_eq!(record.total_batch_count, 3);
    assert_eq!(record.current_file, "Complete");
    assert!(record.last_update_time >= record.start_time);
}

#[test]
fn test_extract_batch_stops_at_first_unit_failure() {
    let work = tempfile::tempdir().unwrap();
    let engine = MockEngine::with_responses(vec![
        Some(EngineReport::ok(Vec::new())),
        Some(EngineReport::failed("archive is corrupt")),
        Some(EngineReport::ok(Vec::new())),
    ]);
    let (runner, channel) = make_runner(engine.clone(), &work);

    let archives = vec![
        work.path().join("one.rpa"),
        work.path().join("two.rpa"),
        work.path().join("three.rpa"),
    ];
    let outcome = runner.extract_batch(&archives, &work.path().join("out"));

    assert!(!outcome.is_success());
    // The third archive is never handed to the engine.
    assert_eq!(engine.calls().len(), 2);

    let record = channel.read().unwrap();
    assert!(record.is_failed());
    assert_eq!(record.current_batch_index, 2);
    assert_eq!(record.total_batch_count, 3);
    assert!(record.error_message.contains("Error on file 2/3"));
    assert!(record.error_message.contains("archive is corrupt"));
}

#[test]
fn test_extract_batch_absent_engine_result_is_fatal() {
    let work = tempfile::tempdir().unwrap();
    let engine =
        MockEngine::with_responses(vec![Some(EngineReport::ok(Vec::new())), None, None]);
    let (runner, channel) = make_runner(engine.clone(), &work);

    let archives = vec![
        work.path().join("one.rpa"),
        work.path().join("two.rpa"),
        work.path().join("three.rpa"),
    ];
    let outcome = runner.extract_batch(&archives, &work.path().join("out"));

    assert!(!outcome.is_success());
    assert_eq!(engine.calls().len(), 2);

    let record = channel.read().unwrap();
    assert!(record.is_failed());
    assert_eq!(record.current_batch_index, 2);
    assert_eq!(record.total_batch_count, 3);
    assert!(record.error_message.contains("engine returned no result"));
}

#[test]
fn test_single_extract_keeps_batch_fields_zero() {
    let work = tempfile::tempdir().unwrap();
    let engine = MockEngine::with_responses(vec![Some(EngineReport::ok(vec![
        "scripts/start.rpy".into(),
        "images/title.png".into(),
    ]))]);
    let (runner, channel) = make_runner(engine.clone(), &work);

    let outcome = runner.extract_single(&work.path().join("game.rpa"), &work.path().join("out"));

    assert!(outcome.is_success());
    assert_eq!(outcome.summary, "Extracted 2 files");

    // Both mid-run (as seen by the engine) and terminal records stay
    // outside batch mode.
    let calls = engine.calls();
    let observed = calls[0].observed.as_ref().unwrap();
    assert_eq!(observed.total_batch_count, 0);
    assert_eq!(observed.current_batch_index, 0);
    assert_eq!(observed.status, OperationStatus::InProgress);
    assert_eq!(observed.current_file, "Starting extraction...");

    let record = channel.read().unwrap();
    assert!(record.is_completed());
    assert_eq!(record.total_batch_count, 0);
    assert_eq!(record.current_batch_index, 0);
    assert_eq!(record.total_files, 2);
}

#[test]
fn test_batch_record_resets_unit_counters_between_units() {
    let work = tempfile::tempdir().unwrap();
    let engine = MockEngine::with_responses(Vec::new());
    let (runner, _channel) = make_runner(engine.clone(), &work);

    let archives = vec![work.path().join("one.rpa"), work.path().join("two.rpa")];
    runner.extract_batch(&archives, &work.path().join("out"));

    for (i, call) in engine.calls().iter().enumerate() {
        let observed = call.observed.as_ref().unwrap();
        assert_eq!(observed.total_files, 0);
        assert_eq!(observed.processed_files, 0);
        assert_eq!(observed.current_batch_index, i as u32 + 1);
        assert_eq!(observed.current_file, "Starting extraction...");
    }
}

#[test]
fn test_create_batch_stages_sources_then_cleans_up() {
    let work = tempfile::tempdir().unwrap();
    let source_a = work.path().join("chapter_one");
    let source_b = work.path().join("chapter_two");
    fs::create_dir_all(&source_a).unwrap();
    fs::create_dir_all(&source_b).unwrap();
    fs::write(source_a.join("script.rpy"), b"one").unwrap();
    fs::write(source_b.join("script.rpy"), b"two").unwrap();

    let engine = MockEngine::with_responses(vec![Some(EngineReport::ok(vec![
        "chapter_one/script.rpy".into(),
        "chapter_two/script.rpy".into(),
    ]))]);
    let (runner, channel) = make_runner(engine.clone(), &work);

    let outcome = runner.create_batch(
        &[source_a, source_b],
        &work.path().join("archive.rpa"),
        DEFAULT_FORMAT_VERSION,
        DEFAULT_KEY,
    );

    assert!(outcome.is_success());
    assert_eq!(outcome.summary, "Created archive with 2 files from 2 sources");

    // The engine saw both items staged under an isolated directory.
    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].staged, vec!["chapter_one", "chapter_two"]);
    assert!(calls[0].source.starts_with(work.path().join("staging")));

    let observed = calls[0].observed.as_ref().unwrap();
    assert_eq!(observed.current_batch_file_name, "Creating final archive...");
    assert_eq!(observed.current_file, "Building archive from 2 items");

    // Staging is gone once the run returns.
    assert_eq!(staging_entries(&work), 0);

    let record = channel.read().unwrap();
    assert!(record.is_completed());
    assert_eq!(record.current_batch_index, 2);
    assert_eq!(record.total_batch_count, 2);
}

#[test]
fn test_create_batch_cleans_up_on_engine_failure() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("game");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("script.rpy"), b"x").unwrap();
    let other = work.path().join("patch");
    fs::create_dir_all(&other).unwrap();
    fs::write(other.join("fix.rpy"), b"y").unwrap();

    let engine =
        MockEngine::with_responses(vec![Some(EngineReport::failed("output disk full"))]);
    let (runner, channel) = make_runner(engine.clone(), &work);

    let outcome = runner.create_batch(
        &[source, other],
        &work.path().join("archive.rpa"),
        DEFAULT_FORMAT_VERSION,
        DEFAULT_KEY,
    );

    assert!(!outcome.is_success());
    assert_eq!(engine.calls().len(), 1);
    assert_eq!(staging_entries(&work), 0);

    let record = channel.read().unwrap();
    assert!(record.is_failed());
    assert!(record.error_message.contains("output disk full"));
}

#[test]
fn test_create_batch_cleans_up_on_copy_failure() {
    let work = tempfile::tempdir().unwrap();
    let good = work.path().join("game");
    fs::create_dir_all(&good).unwrap();
    fs::write(good.join("script.rpy"), b"x").unwrap();
    let missing = work.path().join("does_not_exist");

    let engine = MockEngine::with_responses(Vec::new());
    let (runner, channel) = make_runner(engine.clone(), &work);

    let outcome = runner.create_batch(
        &[good, missing],
        &work.path().join("archive.rpa"),
        DEFAULT_FORMAT_VERSION,
        DEFAULT_KEY,
    );

    assert!(!outcome.is_success());
    // The engine is never reached and staging is gone.
    assert!(engine.calls().is_empty());
    assert_eq!(staging_entries(&work), 0);

    let record = channel.read().unwrap();
    assert!(record.is_failed());
    assert_eq!(record.current_batch_index, 2);
    assert_eq!(record.total_batch_count, 2);
    assert!(record.error_message.starts_with("Error:"));
}

#[test]
fn test_create_single_skips_staging() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("game");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("script.rpy"), b"x").unwrap();

    let engine = MockEngine::with_responses(vec![Some(EngineReport::ok(vec![
        "script.rpy".into(),
    ]))]);
    let (runner, channel) = make_runner(engine.clone(), &work);

    let outcome = runner.create_single(
        &source,
        &work.path().join("archive.rpa"),
        DEFAULT_FORMAT_VERSION,
        DEFAULT_KEY,
    );

    assert!(outcome.is_success());
    assert_eq!(outcome.summary, "Created archive with 1 files");

    // The engine receives the source directly; no staging dir was made.
    let calls = engine.calls();
    assert_eq!(calls[0].source, source);
    assert!(!work.path().join("staging").exists());

    let record = channel.read().unwrap();
    assert_eq!(record.total_batch_count, 0);
}

#[test]
fn test_cancelled_run_never_reaches_engine() {
    let work = tempfile::tempdir().unwrap();
    let engine = MockEngine::with_responses(Vec::new());
    let channel = ProgressChannel::new(work.path().join("operation_progress.json"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let runner = BatchRunner::new(engine.clone(), channel.clone(), work.path().join("staging"))
        .with_cancellation(cancel);

    let archives = vec![work.path().join("one.rpa"), work.path().join("two.rpa")];
    let outcome = runner.extract_batch(&archives, &work.path().join("out"));

    assert!(!outcome.is_success());
    assert!(engine.calls().is_empty());

    let record = channel.read().unwrap();
    assert!(record.is_failed());
    assert!(record.error_message.contains("cancelled"));
}

#[test]
fn test_new_run_clears_previous_terminal_record() {
    let work = tempfile::tempdir().unwrap();
    let engine = MockEngine::with_responses(vec![Some(EngineReport::failed("bad key")), None]);
    let (runner, channel) = make_runner(engine.clone(), &work);

    runner.extract_single(&work.path().join("one.rpa"), &work.path().join("out"));
    assert!(channel.read().unwrap().is_failed());

    // The next run resets the channel before publishing; the engine in
    // the second run must not observe the first run's failure.
    let archives = vec![work.path().join("two.rpa")];
    runner.extract_batch(&archives, &work.path().join("out"));

    let calls = engine.calls();
    let observed = calls[1].observed.as_ref().unwrap();
    assert_eq!(observed.status, OperationStatus::InProgress);
    assert!(observed.error_message.is_empty());
}

/// Engine that blocks inside the call until the test releases it.
struct GateEngine {
    entered: tokio::sync::mpsc::Sender<()>,
    release: Mutex<std::sync::mpsc::Receiver<()>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ArchiveEngine for GateEngine {
    fn extract(
        &self,
        archive: &Path,
        _dest_dir: &Path,
        _progress_path: &Path,
    ) -> Option<EngineReport> {
        self.calls.lock().unwrap().push(archive.to_path_buf());
        let _ = self.entered.blocking_send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
        Some(EngineReport::ok(Vec::new()))
    }

    fn create(
        &self,
        _source_dir: &Path,
        _output: &Path,
        _format_version: u32,
        _key: u32,
        _progress_path: &Path,
    ) -> Option<EngineReport> {
        Some(EngineReport::ok(Vec::new()))
    }
}

#[tokio::test]
async fn test_dispatch_delivers_outcome_and_terminal_record() {
    let work = tempfile::tempdir().unwrap();
    let config = ForgeConfig::new(work.path());
    let channel = ProgressChannel::new(config.progress_path());
    let engine = MockEngine::with_responses(vec![Some(EngineReport::ok(vec![
        "a.png".into(),
        "b.png".into(),
    ]))]);
    let dispatcher = OperationDispatcher::new(engine, &config);

    let outcome = dispatcher
        .run_extract(vec![work.path().join("one.rpa")], work.path().join("out"))
        .unwrap()
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.summary, "Extracted 2 files");

    let record = channel.read().unwrap();
    assert!(record.is_completed());
    assert_eq!(record.total_batch_count, 0);
}

#[tokio::test]
async fn test_dispatch_rejects_empty_request() {
    let work = tempfile::tempdir().unwrap();
    let config = ForgeConfig::new(work.path());
    let engine = MockEngine::with_responses(Vec::new());
    let dispatcher = OperationDispatcher::new(engine, &config);

    let err = dispatcher
        .run_extract(Vec::new(), work.path().join("out"))
        .unwrap_err();
    assert_eq!(err, DispatchError::EmptyRequest);
}

#[tokio::test]
async fn test_dispatch_serializes_runs_and_rejects_overflow() {
    let work = tempfile::tempdir().unwrap();
    let config = ForgeConfig::new(work.path());

    let (entered_tx, mut entered_rx) = tokio::sync::mpsc::channel(8);
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let engine = Arc::new(GateEngine {
        entered: entered_tx,
        release: Mutex::new(release_rx),
        calls: Mutex::new(Vec::new()),
    });
    let dispatcher = OperationDispatcher::new(engine.clone(), &config);

    let dest = work.path().join("out");
    let mut first = dispatcher
        .run_extract(vec![work.path().join("one.rpa")], dest.clone())
        .unwrap();

    // The worker is now inside the first engine call; dispatch returned
    // long before completion.
    entered_rx.recv().await.unwrap();
    assert!(first.try_recv().is_err());

    // One request fits in the queue behind the running one; a third is
    // rejected.
    let second = dispatcher
        .run_extract(vec![work.path().join("two.rpa")], dest.clone())
        .unwrap();
    let err = dispatcher
        .run_extract(vec![work.path().join("three.rpa")], dest.clone())
        .unwrap_err();
    assert_eq!(err, DispatchError::Busy);

    release_tx.send(()).unwrap();
    entered_rx.recv().await.unwrap();
    release_tx.send(()).unwrap();

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert!(first.is_success());
    assert!(second.is_success());

    // Strictly sequential: the second run only started after the first
    // finished.
    let calls = engine.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![work.path().join("one.rpa"), work.path().join("two.rpa")]
    );
}
