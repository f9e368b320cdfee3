use super::helpers::{fast_locked, lock_exists, sample};
use crate::*;
use anyhow::Result;
use dataset::{DType, Dataset};
use lockfile::{LockError, LockOptions};
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const K0: &str = "2024.01.01.0000.00.000";
const K1: &str = "2024.01.01.0000.00.001";

fn count(file: &std::path::Path) -> usize {
    traverse(file).unwrap().count()
}

// --------------------- Basic save / traverse ---------------------

#[test]
fn locked_save_is_traversed_once() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    let outcome = save(&sample(1.0), &file, "result", K0, &fast_locked())?;
    assert_eq!(outcome, SaveOutcome::Written);

    let paths: Vec<String> = traverse(&file)?.collect();
    assert_eq!(paths, vec![format!("result/{K0}")]);
    Ok(())
}

#[test]
fn unlocked_save_is_traversed_once() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    save(&sample(1.0), &file, "result", K0, &SaveOptions::unlocked())?;
    let paths: Vec<String> = traverse(&file)?.collect();
    assert_eq!(paths, vec![format!("result/{K0}")]);
    Ok(())
}

#[test]
fn nested_group_is_created() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    save(&sample(1.0), &file, "/bench/std/", K0, &fast_locked())?;
    let paths: Vec<String> = traverse(&file)?.collect();
    assert_eq!(paths, vec![format!("bench/std/{K0}")]);
    Ok(())
}

#[test]
fn element_type_and_shape_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    let ints = Dataset::new(vec![3, 1], &[-1i64, 0, 1])?;

    save(&sample(4.0), &file, "result", K0, &fast_locked())?;
    save(&ints, &file, "result", K1, &fast_locked())?;

    let back = read_dataset(&file, &format!("result/{K0}"))?;
    assert_eq!(back.dtype(), DType::F64);
    assert_eq!(back.shape(), &[2, 3]);
    assert_eq!(back, sample(4.0));

    let back = read_dataset(&file, &format!("result/{K1}"))?;
    assert_eq!(back.dtype(), DType::I64);
    assert_eq!(back.shape(), &[3, 1]);
    assert_eq!(back.to_vec::<i64>()?, vec![-1, 0, 1]);
    Ok(())
}

// --------------------- Collisions ---------------------

#[test]
fn same_address_twice_is_skipped() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    assert_eq!(save(&sample(1.0), &file, "result", K0, &fast_locked())?, SaveOutcome::Written);
    let len = fs::metadata(&file)?.len();

    assert_eq!(
        save(&sample(2.0), &file, "result", K0, &fast_locked())?,
        SaveOutcome::Collision
    );
    assert_eq!(count(&file), 1);
    assert_eq!(fs::metadata(&file)?.len(), len);
    // first value kept
    assert_eq!(read_dataset(&file, &format!("result/{K0}"))?, sample(1.0));
    Ok(())
}

#[test]
fn distinct_keys_are_both_kept() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    save(&sample(1.0), &file, "result", K0, &fast_locked())?;
    save(&sample(2.0), &file, "result", K1, &fast_locked())?;
    assert_eq!(count(&file), 2);
    Ok(())
}

#[test]
fn three_saves_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    let opts = fast_locked();

    assert_eq!(save(&sample(1.0), &file, "result", K0, &opts)?, SaveOutcome::Written);
    assert_eq!(save(&sample(2.0), &file, "result", K1, &opts)?, SaveOutcome::Written);
    assert_eq!(save(&sample(3.0), &file, "result", K0, &opts)?, SaveOutcome::Collision);

    let paths: Vec<String> = traverse(&file)?.collect();
    assert_eq!(
        paths,
        vec![
            "result/2024.01.01.0000.00.000".to_string(),
            "result/2024.01.01.0000.00.001".to_string(),
        ]
    );
    assert!(!lock_exists(&file));
    Ok(())
}

// --------------------- Write modes ---------------------

#[test]
fn truncate_replaces_contents() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    save(&sample(1.0), &file, "old", K0, &fast_locked())?;
    save(&sample(2.0), &file, "old", K1, &fast_locked())?;

    let truncating = fast_locked().with_write_mode(WriteMode::Truncate);
    save(&sample(3.0), &file, "new", K0, &truncating)?;

    let paths: Vec<String> = traverse(&file)?.collect();
    assert_eq!(paths, vec![format!("new/{K0}")]);
    Ok(())
}

#[test]
fn unknown_write_mode_is_invalid_configuration() {
    let err = "r+".parse::<WriteMode>().map_err(StoreError::from).unwrap_err();
    assert!(matches!(err, StoreError::InvalidConfiguration(_)));
}

#[test]
fn truncate_with_collective_open_is_rejected_before_io() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    let opts = SaveOptions::collective().with_write_mode(WriteMode::Truncate);
    let err = save(&sample(1.0), &file, "result", K0, &opts).unwrap_err();
    assert!(matches!(err, StoreError::InvalidConfiguration(_)));
    assert!(!file.exists());
    Ok(())
}

#[test]
fn bad_leaf_key_is_rejected_before_io() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    for leaf in ["", "a/b", ".."] {
        let err = save(&sample(1.0), &file, "result", leaf, &fast_locked()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfiguration(_)), "{leaf:?}");
    }
    assert!(!file.exists());
    assert!(!lock_exists(&file));
    Ok(())
}

// --------------------- Lock lifecycle ---------------------

#[test]
fn lock_is_released_after_success_and_collision() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    save(&sample(1.0), &file, "result", K0, &fast_locked())?;
    assert!(!lock_exists(&file));
    save(&sample(1.0), &file, "result", K0, &fast_locked())?;
    assert!(!lock_exists(&file));
    Ok(())
}

#[test]
fn lock_is_released_when_open_fails() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    fs::write(&file, b"definitely not a container")?;

    let err = save(&sample(1.0), &file, "result", K0, &fast_locked()).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Container(container::ContainerError::BadHeader)
    ));
    assert!(!lock_exists(&file));
    Ok(())
}

#[test]
fn lock_is_released_when_serialization_fails() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    // more dimensions than a record can describe
    let too_many_dims = Dataset::new(vec![1; 300], &[7u8])?;

    let err = save(&too_many_dims, &file, "result", K0, &fast_locked()).unwrap_err();
    match err {
        StoreError::Serialization { dtype, preview, .. } => {
            assert_eq!(dtype, DType::U8);
            assert!(preview.ends_with("[7]"), "{preview}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!lock_exists(&file));
    // the group record made it, the dataset did not
    assert_eq!(count(&file), 0);
    Ok(())
}

#[test]
fn lock_is_released_when_group_conflicts() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");

    save(&sample(1.0), &file, "result", K0, &fast_locked())?;
    // K0 is a dataset, it cannot become a group
    let err = save(&sample(1.0), &file, &format!("result/{K0}"), K1, &fast_locked()).unwrap_err();
    assert!(matches!(err, StoreError::Container(_)));
    assert!(!lock_exists(&file));
    Ok(())
}

#[test]
fn held_lock_times_out_when_limited() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    let _held = lockfile::acquire(&file, &LockOptions::default())?;

    let lock = LockOptions::default()
        .with_probe_interval(std::time::Duration::from_millis(1))
        .with_max_attempts(3);
    let opts = fast_locked().with_lock_options(lock);

    let err = save(&sample(1.0), &file, "result", K0, &opts).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Lock(LockError::Timeout { attempts: 3, .. })
    ));
    // the other holder's marker is untouched and nothing was written
    assert!(lock_exists(&file));
    assert!(!file.exists());
    Ok(())
}

#[test]
fn disabled_lock_ignores_held_marker() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    let _held = lockfile::acquire(&file, &LockOptions::default())?;

    save(&sample(1.0), &file, "result", K0, &SaveOptions::unlocked())?;
    assert_eq!(count(&file), 1);
    Ok(())
}

#[test]
fn unlocked_save_leaves_in_flight_tail_alone() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    save(&sample(1.0), &file, "result", K0, &SaveOptions::unlocked())?;

    // first bytes of another writer's record, not yet complete
    let good_len = fs::metadata(&file)?.len();
    let partial = [0x40u8, 0x00, 0x00];
    fs::OpenOptions::new().append(true).open(&file)?.write_all(&partial)?;

    save(&sample(2.0), &file, "result", K1, &SaveOptions::unlocked())?;
    let bytes = fs::read(&file)?;
    assert!(bytes.len() as u64 > good_len + partial.len() as u64);
    assert_eq!(&bytes[good_len as usize..good_len as usize + partial.len()], &partial);
    Ok(())
}

#[test]
fn locked_save_cuts_torn_tail() -> Result<()> {
    let dir = tempdir()?;
    let file = dir.path().join("out.bsc");
    save(&sample(1.0), &file, "result", K0, &fast_locked())?;

    let good_len = fs::metadata(&file)?.len();
    fs::OpenOptions::new().append(true).open(&file)?.write_all(&[0x40, 0x00, 0x00])?;

    save(&sample(2.0), &file, "result", K1, &fast_locked())?;
    assert_eq!(count(&file), 2);
    assert!(fs::read(&file)?.len() as u64 > good_len);
    Ok(())
}

#[test]
fn open_is_shared_only_without_lock() {
    assert!(!SaveOptions::default().effective_open_options().shared);
    assert!(SaveOptions::unlocked().effective_open_options().shared);
    assert!(SaveOptions::collective().effective_open_options().shared);
}

// --------------------- Concurrency ---------------------

#[test]
fn racing_locked_writers_keep_every_write() -> Result<()> {
    let dir = tempdir()?;
    let file = Arc::new(dir.path().join("out.bsc"));
    let threads = 6;
    let per_thread = 5;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let file = Arc::clone(&file);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let leaf = format!("2024.01.01.0000.{t:02}.{i:03}");
                    let outcome = save(&sample(i as f64), &file, "result", &leaf, &fast_locked())
                        .expect("save");
                    assert_eq!(outcome, SaveOutcome::Written);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    assert_eq!(count(&file), threads * per_thread);
    assert!(!lock_exists(&file));
    for path in traverse(&file)? {
        let ds = read_dataset(&file, &path)?;
        assert_eq!(ds.shape(), &[2, 3]);
    }
    Ok(())
}

#[test]
fn racing_writers_on_one_key_write_it_once() -> Result<()> {
    let dir = tempdir()?;
    let file = Arc::new(dir.path().join("out.bsc"));

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let file = Arc::clone(&file);
            thread::spawn(move || {
                save(&sample(t as f64), &file, "result", K0, &fast_locked()).expect("save")
            })
        })
        .collect();
    let outcomes: Vec<SaveOutcome> = handles
        .into_iter()
        .map(|h| h.join().expect("writer thread panicked"))
        .collect();

    let written = outcomes.iter().filter(|o| **o == SaveOutcome::Written).count();
    assert_eq!(written, 1);
    assert_eq!(count(&file), 1);
    Ok(())
}

#[test]
fn settings_become_save_options() {
    let settings = Settings {
        lock: false,
        write_mode: WriteMode::Truncate,
        sync: false,
        lock_attempts: Some(4),
        stale_after: Some(std::time::Duration::from_secs(30)),
        ..Settings::default()
    };
    let opts = SaveOptions::from_settings(&settings);
    assert!(!opts.lock_enabled);
    assert_eq!(opts.write_mode, WriteMode::Truncate);
    assert!(!opts.open_options.sync);
    assert!(!opts.open_options.collective);
    assert_eq!(opts.lock_options.max_attempts, Some(4));
    assert_eq!(
        opts.lock_options.stale,
        lockfile::StalePolicy::MaxAge(std::time::Duration::from_secs(30))
    );
}
