use super::helpers::{at, sample, scripted_keys, ticking_keys};
use crate::*;
use anyhow::Result;
use stddev::BenchParams;
use tempfile::tempdir;

fn quick_bench() -> BenchParams {
    BenchParams {
        sizes: vec![8, 16],
        repeats: 2,
    }
}

fn config(file: &std::path::Path, iterations: Iterations) -> WorkerConfig {
    WorkerConfig {
        filename: file.to_path_buf(),
        group_path: "result".to_string(),
        iterations,
        save: SaveOptions::default().with_sync(false),
        bench: quick_bench(),
        seed: 1,
        verbose: false,
    }
}

#[test]
fn zero_iterations_is_invalid() -> Result<()> {
    let dir = tempdir()?;
    let err = Worker::new(config(&dir.path().join("out.bsc"), Iterations::Bounded(0))).unwrap_err();
    assert!(matches!(err, StoreError::InvalidConfiguration(_)));
    Ok(())
}

#[test]
fn truncate_collective_worker_is_invalid() -> Result<()> {
    let dir = tempdir()?;
    let mut cfg = config(&dir.path().join("out.bsc"), Iterations::Bounded(1));
    cfg.save = SaveOptions::collective().with_write_mode(WriteMode::Truncate);
    assert!(matches!(
        Worker::new(cfg),
        Err(StoreError::InvalidConfiguration(_))
    ));
    Ok(())
}

#[test]
fn bounded_run_writes_and_reads_back() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    let mut worker = Worker::new(config(&file, Iterations::Bounded(3)))?.with_key_builder(ticking_keys());
    assert_eq!(worker.state(), WorkerState::Idle);

    let mut out = Vec::new();
    let report = worker.run(&mut out)?;
    assert_eq!(
        report,
        WorkerReport {
            iterations: 3,
            written: 3,
            collisions: 0,
            items: 3,
        }
    );
    assert_eq!(worker.state(), WorkerState::Idle);

    let text = String::from_utf8(out)?;
    let status: Vec<&str> = text.lines().collect();
    assert_eq!(status.len(), 3);
    assert!(status[0].ends_with("has 1 items"));
    assert!(status[2].ends_with("has 3 items"));

    let paths: Vec<String> = traverse(&file)?.collect();
    assert_eq!(
        paths,
        vec![
            "result/2024.01.01.0000.00.000",
            "result/2024.01.01.0000.00.001",
            "result/2024.01.01.0000.00.002",
        ]
    );
    let ds = read_dataset(&file, &paths[0])?;
    assert_eq!(ds.shape(), &[2, 2]);
    Ok(())
}

#[test]
fn existing_key_counts_collision_and_continues() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    let opts = SaveOptions::default().with_sync(false);
    save(&sample(0.0), &file, "result", "2024.01.01.0000.00.005", &opts)?;

    let keys = scripted_keys(vec![at(0, 0, 0, 5), at(0, 0, 0, 9)]);
    let mut worker = Worker::new(config(&file, Iterations::Bounded(2)))?.with_key_builder(keys);

    let report = worker.run(&mut std::io::sink())?;
    assert_eq!(report.written, 1);
    assert_eq!(report.collisions, 1);
    assert_eq!(report.items, 2);
    Ok(())
}

#[test]
fn clock_stepping_back_loses_no_results() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    // one hour back, as on a DST fall-back
    let keys = scripted_keys(vec![
        at(2, 30, 0, 0),
        at(1, 30, 0, 0),
        at(1, 30, 1, 0),
        at(1, 30, 2, 0),
        at(1, 31, 0, 0),
    ]);
    let mut worker = Worker::new(config(&file, Iterations::Bounded(5)))?.with_key_builder(keys);

    let report = worker.run(&mut std::io::sink())?;
    assert_eq!(report.written, 5);
    assert_eq!(report.collisions, 0);
    assert_eq!(report.items, 5);

    let paths: Vec<String> = traverse(&file)?.collect();
    assert_eq!(paths[0], "result/2024.01.01.0230.00.000");
    assert_eq!(paths[4], "result/2024.01.01.0230.00.004");
    Ok(())
}

#[test]
fn verbose_worker_lists_paths() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    let mut cfg = config(&file, Iterations::Bounded(1));
    cfg.verbose = true;
    let mut worker = Worker::new(cfg)?.with_key_builder(ticking_keys());

    let mut out = Vec::new();
    worker.run(&mut out)?;
    let text = String::from_utf8(out)?;
    assert!(text.starts_with("result/2024.01.01.0000.00.000\n"));
    Ok(())
}

#[test]
fn failing_save_stops_the_loop() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    std::fs::write(&file, b"garbage")?;

    let mut worker = Worker::new(config(&file, Iterations::Bounded(5)))?;
    let err = worker.run(&mut std::io::sink()).unwrap_err();
    assert!(matches!(err, StoreError::Container(_)));
    assert_eq!(worker.state(), WorkerState::Writing);
    assert!(!lockfile::lock_path_for(&file).exists());
    Ok(())
}

#[test]
fn collective_worker_writes_under_rank_group() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    let writer = CollectiveWriter::new(&file, "result", Participant::new(1, 2)?, true)?.with_base_seed(7);
    let cfg = WorkerConfig::collective(&writer, Iterations::Bounded(2), quick_bench());
    assert_eq!(cfg.seed, 8);
    assert!(!cfg.save.lock_enabled);

    let mut worker = Worker::new(cfg)?.with_key_builder(ticking_keys());
    let report = worker.run(&mut std::io::sink())?;
    assert_eq!(report.written, 2);

    let paths: Vec<String> = traverse(&file)?.collect();
    assert!(paths.iter().all(|p| p.starts_with("result/rank-1/")));
    Ok(())
}

#[test]
fn config_from_settings() {
    let settings = Settings {
        address: "bench".to_string(),
        iterations: Iterations::Unbounded,
        repeats: 3,
        seed: 99,
        ..Settings::default()
    };
    let cfg = WorkerConfig::from_settings(&settings);
    assert_eq!(cfg.group_path, "bench");
    assert_eq!(cfg.iterations, Iterations::Unbounded);
    assert_eq!(cfg.bench.repeats, 3);
    assert_eq!(cfg.bench.sizes.len(), 19);
    assert_eq!(cfg.seed, 99);
    assert!(cfg.save.lock_enabled);
}
