use chrono::{NaiveDate, NaiveDateTime};
use dataset::Dataset;
use lockfile::lock_path_for;
use std::path::Path;
use std::time::Duration;

use crate::{KeyBuilder, SaveOptions};

pub fn sample(seed: f64) -> Dataset {
    Dataset::new(vec![2, 3], &[seed, seed + 1.0, seed + 2.0, 0.5, 0.25, 0.125]).unwrap()
}

/// Locked, no fsync, fast probing.
pub fn fast_locked() -> SaveOptions {
    let opts = SaveOptions::default().with_sync(false);
    let lock = opts
        .lock_options
        .clone()
        .with_probe_interval(Duration::from_millis(2));
    opts.with_lock_options(lock)
}

pub fn lock_exists(file: &Path) -> bool {
    lock_path_for(file).exists()
}

pub fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_milli_opt(h, m, s, ms)
        .unwrap()
}

/// A key builder that replays `times`, repeating the last one.
pub fn scripted_keys(times: Vec<NaiveDateTime>) -> KeyBuilder {
    let mut times = times.into_iter();
    let mut last = at(0, 0, 0, 0);
    KeyBuilder::with_clock(move || {
        if let Some(t) = times.next() {
            last = t;
        }
        last
    })
}

/// A key builder that advances one millisecond per key.
pub fn ticking_keys() -> KeyBuilder {
    let mut now = at(0, 0, 0, 0);
    KeyBuilder::with_clock(move || {
        let t = now;
        now += chrono::Duration::milliseconds(1);
        t
    })
}
