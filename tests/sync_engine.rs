mod common;

use chrono::NaiveDate;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use common::{
    ndjson_lines, stage_comments, stage_submission, FakeSink, RecordingSleeper, Reply,
};
use thread_sync::artifact::ArtifactTarget;
use thread_sync::executor::ExecutorSettings;
use thread_sync::models::{ContentKind, StagedFile};
use thread_sync::progress::NoProgress;
use thread_sync::run::{run_sync, survey, RunOptions, RunReport, StopReason};
use thread_sync::scanner::scan_window_at;
use thread_sync::staged::ParquetReader;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

/// Two threads in r/rust: 2 submissions and 5 comments, 7 items in total.
fn stage_tree(root: &Path) {
    let day = today();
    let yesterday = day.pred_opt().unwrap();
    stage_submission(root, "rust", day, "t1", "Borrow checker", "Why does this fail?");
    stage_comments(
        root,
        "rust",
        day,
        "t1",
        &[
            ("c1", "t3_t1", "Use a reference."),
            ("c2", "t1_c1", "Or clone it."),
            ("c3", "t3_t1", "   "),
        ],
    );
    stage_submission(root, "rust", yesterday, "t2", "Async traits", "");
    stage_comments(
        root,
        "rust",
        yesterday,
        "t2",
        &[
            ("c4", "t3_t2", "They are stable now."),
            ("c5", "t3_t2", "Mostly."),
            ("c6", "t1_c5", "With caveats."),
        ],
    );
}

const TOTAL_ITEMS: u64 = 7;

fn candidates(root: &Path) -> Vec<StagedFile> {
    scan_window_at(root, &["rust".to_string()], &ContentKind::ALL, 7, today()).unwrap()
}

fn settings(write_batch_size: usize, retry_max: u32) -> ExecutorSettings {
    ExecutorSettings {
        write_batch_size,
        retry_max,
        retry_backoff: Duration::from_millis(100),
        pace: Duration::ZERO,
        jitter_ms: 0,
    }
}

fn options(out: &Path, max_per_run: u64, flush_size: usize, executor: ExecutorSettings) -> RunOptions {
    RunOptions {
        max_per_run,
        flush_size,
        probe_batch_size: 20,
        max_chars: 2000,
        executor,
        artifact: ArtifactTarget::new(out, "test"),
    }
}

async fn run(
    root: &Path,
    sink: &FakeSink,
    opts: &RunOptions,
    sleeper: &RecordingSleeper,
) -> RunReport {
    run_sync(&candidates(root), &ParquetReader, sink, opts, sleeper, &NoProgress)
        .await
        .unwrap()
}

#[tokio::test]
async fn second_run_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let out = tmp.path().join("out");
    let sink = FakeSink::new();
    let sleeper = RecordingSleeper::default();
    let opts = options(&out, 100, 4, settings(2, 5));

    let first = run(tmp.path(), &sink, &opts, &sleeper).await;
    assert_eq!(first.state.total_written, TOTAL_ITEMS);
    assert_eq!(first.state.items_seen, TOTAL_ITEMS);
    assert_eq!(first.state.stop, Some(StopReason::InputExhausted));
    assert_eq!(sink.stored(), TOTAL_ITEMS as usize);

    let second = run(tmp.path(), &sink, &opts, &sleeper).await;
    assert_eq!(second.state.total_written, 0);
    assert_eq!(second.state.skipped_unchanged, TOTAL_ITEMS);
    assert!(second.state.artifacts.is_empty());
    assert_eq!(sink.accepted_writes(), TOTAL_ITEMS as usize);
}

#[tokio::test]
async fn budget_is_never_exceeded() {
    for budget in [1u64, 2, 3, 5, 7, 50] {
        for flush_size in [1usize, 3, 20] {
            for write_batch in [1usize, 2, 4] {
                let tmp = TempDir::new().unwrap();
                stage_tree(tmp.path());
                let sink = FakeSink::new();
                let sleeper = RecordingSleeper::default();
                let opts = options(
                    &tmp.path().join("out"),
                    budget,
                    flush_size,
                    settings(write_batch, 5),
                );

                let report = run(tmp.path(), &sink, &opts, &sleeper).await;
                let expected = budget.min(TOTAL_ITEMS);
                assert_eq!(
                    report.state.total_written, expected,
                    "budget={} flush={} batch={}",
                    budget, flush_size, write_batch
                );
                assert_eq!(sink.accepted_writes() as u64, expected);
                if budget < TOTAL_ITEMS {
                    assert_eq!(report.state.stop, Some(StopReason::BudgetExhausted));
                }
            }
        }
    }
}

#[tokio::test]
async fn budget_truncation_keeps_smallest_ids() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let sink = FakeSink::new();
    let sleeper = RecordingSleeper::default();
    // One flush holds everything; budget of three.
    let opts = options(&tmp.path().join("out"), 3, 100, settings(10, 5));

    let report = run(tmp.path(), &sink, &opts, &sleeper).await;
    assert_eq!(report.state.total_written, 3);
    assert_eq!(report.state.deferred, TOTAL_ITEMS - 3);

    let calls = sink.write_calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![vec![
            "r:c:rust:c1".to_string(),
            "r:c:rust:c2".to_string(),
            "r:c:rust:c4".to_string(),
        ]]
    );
}

#[tokio::test]
async fn rate_limits_back_off_exponentially() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let sink = FakeSink::scripted(
        vec![Reply::RateLimit, Reply::RateLimit, Reply::RateLimit],
        Reply::Accept,
    );
    let sleeper = RecordingSleeper::default();
    let opts = options(&tmp.path().join("out"), 100, 100, settings(100, 5));

    let report = run(tmp.path(), &sink, &opts, &sleeper).await;
    assert_eq!(report.state.total_written, TOTAL_ITEMS);
    assert_eq!(report.state.stop, Some(StopReason::InputExhausted));
    assert_eq!(
        sleeper.calls(),
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
}

#[tokio::test]
async fn exhausted_retries_stop_cleanly_and_keep_prior_chunk() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let out = tmp.path().join("out");
    let sink = FakeSink::scripted(vec![Reply::Accept], Reply::RateLimit);
    let sleeper = RecordingSleeper::default();
    let opts = options(&out, 100, 100, settings(2, 2));

    let report = run(tmp.path(), &sink, &opts, &sleeper).await;
    assert_eq!(report.state.stop, Some(StopReason::RateLimited));
    assert_eq!(report.state.total_written, 2);
    assert_eq!(
        sleeper.calls(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );

    assert_eq!(report.state.artifacts.len(), 1);
    let lines = ndjson_lines(&report.state.artifacts[0]);
    let ids: Vec<_> = lines.iter().map(|l| l["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["r:c:rust:c1", "r:c:rust:c2"]);
}

#[tokio::test]
async fn fatal_write_error_aborts_but_keeps_artifact() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let out = tmp.path().join("out");
    let sink = FakeSink::scripted(vec![Reply::Accept, Reply::Fail], Reply::Accept);
    let sleeper = RecordingSleeper::default();
    let opts = options(&out, 100, 100, settings(3, 5));

    let err = run_sync(
        &candidates(tmp.path()),
        &ParquetReader,
        &sink,
        &opts,
        &sleeper,
        &NoProgress,
    )
    .await
    .unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("HTTP 500"));
    assert!(sleeper.calls().is_empty());

    let artifacts: Vec<_> = std::fs::read_dir(&out).unwrap().collect();
    assert_eq!(artifacts.len(), 1);
    let path = artifacts[0].as_ref().unwrap().path();
    assert_eq!(ndjson_lines(&path).len(), 3);
    assert!(message.contains(&path.display().to_string()), "{}", message);
}

#[tokio::test]
async fn pacing_sleeps_between_chunks_only() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let sink = FakeSink::new();
    let sleeper = RecordingSleeper::default();
    let mut executor = settings(3, 5);
    executor.pace = Duration::from_millis(10);
    let opts = options(&tmp.path().join("out"), 100, 100, executor);

    let report = run(tmp.path(), &sink, &opts, &sleeper).await;
    assert_eq!(report.state.total_written, TOTAL_ITEMS);
    // Seven items in chunks of three: two pauses, none after the last chunk.
    assert_eq!(
        sleeper.calls(),
        vec![Duration::from_millis(10), Duration::from_millis(10)]
    );
}

#[tokio::test]
async fn changed_text_is_rewritten() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let sink = FakeSink::new();
    let sleeper = RecordingSleeper::default();
    let opts = options(&tmp.path().join("out"), 100, 20, settings(4, 5));

    run(tmp.path(), &sink, &opts, &sleeper).await;

    stage_comments(
        tmp.path(),
        "rust",
        today(),
        "t1",
        &[
            ("c1", "t3_t1", "Use a reference."),
            ("c2", "t1_c1", "Or clone it, edited."),
            ("c3", "t3_t1", "   "),
        ],
    );

    let report = run(tmp.path(), &sink, &opts, &sleeper).await;
    assert_eq!(report.state.total_written, 1);
    assert_eq!(report.state.skipped_unchanged, TOTAL_ITEMS - 1);
    let lines = ndjson_lines(&report.state.artifacts[0]);
    assert_eq!(lines[0]["id"], "r:c:rust:c2");
    assert_eq!(lines[0]["body"], "Or clone it, edited.");
}

#[tokio::test]
async fn probes_stay_within_lookup_limit() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let sink = FakeSink::new();
    let sleeper = RecordingSleeper::default();
    let mut opts = options(&tmp.path().join("out"), 100, 100, settings(10, 5));
    opts.probe_batch_size = 3;

    run(tmp.path(), &sink, &opts, &sleeper).await;
    let probes = sink.probe_calls.lock().unwrap().clone();
    assert_eq!(probes, vec![3, 3, 1]);
}

#[test]
fn survey_counts_without_a_sink() {
    let tmp = TempDir::new().unwrap();
    stage_tree(tmp.path());
    let report = survey("fake", &candidates(tmp.path()), &ParquetReader, 2000, 10);
    assert!(report.dry_run);
    assert_eq!(report.candidates, 4);
    assert_eq!(report.state.files_parsed, 4);
    assert_eq!(report.state.items_seen, TOTAL_ITEMS);
    assert_eq!(report.state.total_written, 0);
}
