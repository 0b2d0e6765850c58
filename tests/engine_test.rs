mod common;

use backup_jobs::backup::{BackupType, JobDefinition, RunState};
use backup_jobs::storage::StateStore;
use common::{write_file, write_many, Engine};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_full_then_differential_runs() {
    let mut settings = HashMap::new();
    settings.insert("LargeFileThresholdKb".to_string(), "100".to_string());
    let engine = Engine::new(settings, Duration::ZERO);

    let source = TempDir::new().unwrap();
    let (full_target, diff_target) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    write_file(source.path(), "one.txt", 1024);
    write_file(source.path(), "docs/two.txt", 2048);
    write_file(source.path(), "docs/deep/three.bin", 500 * 1024);

    engine.add(JobDefinition::new("Full", source.path(), full_target.path(), BackupType::Full));
    engine.add(JobDefinition::new(
        "Diff",
        source.path(),
        diff_target.path(),
        BackupType::Differential,
    ));

    let outcomes = engine.manager.execute_jobs(&["Full".to_string(), "Diff".to_string()]).unwrap();
    assert!(outcomes.iter().all(|o| o.state == RunState::Completed));

    let full = engine.manager.job("Full").unwrap().status();
    assert_eq!(full.total_files, 3);
    assert_eq!(full.total_size, 503 * 1024);
    assert_eq!(full.remaining_size, 0);
    assert_eq!(full.progress_percentage(), 100.0);

    // Unchanged source: nothing to copy
    engine.manager.execute_jobs(&["Diff".to_string()]).unwrap();
    assert_eq!(engine.manager.job("Diff").unwrap().status().total_files, 0);

    // One changed byte: exactly that file
    let mut bytes = std::fs::read(source.path().join("docs/two.txt")).unwrap();
    bytes[0] = b'!';
    std::fs::write(source.path().join("docs/two.txt"), bytes).unwrap();
    engine.manager.execute_jobs(&["Diff".to_string()]).unwrap();
    let diff = engine.manager.job("Diff").unwrap().status();
    assert_eq!(diff.total_files, 1);
    assert_eq!(diff.processed_files, vec![source.path().join("docs/two.txt")]);

    // The state file reproduces what the jobs reported
    let persisted = StateStore::open(engine.data.path().join("state.json"));
    let full_state = persisted.get("Full").unwrap();
    assert_eq!(full_state.state, RunState::Completed);
    assert_eq!(full_state.total_files, 3);
    assert_eq!(full_state.total_size, 503 * 1024);
}

#[test]
fn test_paused_job_survives_restart() {
    let engine = Engine::new(HashMap::new(), Duration::from_millis(20));
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write_many(source.path(), 40);
    engine.add(JobDefinition::new("Job1", source.path(), target.path(), BackupType::Full));

    assert!(engine.manager.start_jobs(&["Job1".to_string()]).is_empty());
    let job = engine.manager.job("Job1").unwrap();
    assert!(wait_for(|| job.status().processed_files.len() >= 3));

    engine.manager.shutdown();
    assert!(engine.manager.executor().wait_idle(Duration::from_secs(10)));
    assert_eq!(job.state(), RunState::Paused);
    let copied_before = job.status().processed_files.len();
    assert!(copied_before < 40);

    let Engine { data, logs, .. } = engine;
    let restarted = Engine::open(data, HashMap::new(), Duration::ZERO);
    let job = restarted.manager.job("Job1").unwrap();
    assert_eq!(job.state(), RunState::Paused);
    assert_eq!(job.status().processed_files.len(), copied_before);

    assert!(restarted.manager.resume_jobs(&["Job1".to_string()]).is_empty());
    assert!(restarted.manager.executor().wait_idle(Duration::from_secs(10)));
    assert_eq!(job.state(), RunState::Completed);
    assert_eq!(job.status().processed_files.len(), 40);

    // No file was copied by both runs
    let second_run = restarted.logs.for_job("Job1").len();
    assert_eq!(logs.for_job("Job1").len() + second_run, 40);
}

#[test]
fn test_removing_running_job_drops_its_state() {
    let engine = Engine::new(HashMap::new(), Duration::from_millis(100));
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write_many(source.path(), 20);
    engine.add(JobDefinition::new("Job1", source.path(), target.path(), BackupType::Full));

    engine.manager.start_jobs(&["Job1".to_string()]);
    let job = engine.manager.job("Job1").unwrap();
    assert!(wait_for(|| !engine.logs.for_job("Job1").is_empty()));

    engine.manager.remove_job("Job1").unwrap();
    assert!(engine.manager.executor().wait_idle(Duration::from_secs(10)));
    assert_eq!(job.state(), RunState::Error);
    assert!(engine.manager.job("Job1").is_none());

    let persisted = StateStore::open(engine.data.path().join("state.json"));
    assert!(persisted.get("Job1").is_none());
    assert!(engine.manager.job_states().is_empty());
}

#[test]
fn test_stop_while_paused_ends_in_error() {
    let engine = Engine::new(HashMap::new(), Duration::from_millis(20));
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    write_many(source.path(), 30);
    engine.add(JobDefinition::new("Job1", source.path(), target.path(), BackupType::Full));

    engine.manager.start_jobs(&["Job1".to_string()]);
    let job = engine.manager.job("Job1").unwrap();
    assert!(wait_for(|| job.state() == RunState::Running));

    engine.manager.pause_jobs(&["Job1".to_string()]);
    assert!(engine.manager.executor().wait_idle(Duration::from_secs(10)));
    assert_eq!(job.state(), RunState::Paused);
    let copied = engine.logs.for_job("Job1").len();

    engine.manager.stop_jobs(&["Job1".to_string()]);
    assert_eq!(job.state(), RunState::Error);
    assert_eq!(job.status().error_message.as_deref(), Some("Stopped by user"));

    engine.manager.resume_jobs(&["Job1".to_string()]);
    assert!(engine.manager.executor().wait_idle(Duration::from_secs(10)));
    assert_eq!(engine.logs.for_job("Job1").len(), copied);
}
