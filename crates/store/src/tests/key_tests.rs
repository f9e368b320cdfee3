use super::helpers::{at, scripted_keys, ticking_keys};
use crate::*;
use chrono::{FixedOffset, TimeZone};

// --------------------- Leaf key format ---------------------

#[test]
fn key_at_formats_millisecond_timestamp() {
    let tz = FixedOffset::east_opt(0).unwrap();
    let t = tz.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap() + chrono::Duration::milliseconds(42);
    assert_eq!(key_at(&t), "2024.03.09.0705.02.042");
}

#[test]
fn builder_keys_match_the_format() {
    let mut keys = scripted_keys(vec![at(13, 45, 59, 999)]);
    let key = keys.next_key();
    assert_eq!(key, "2024.01.01.1345.59.999");
    assert!(is_valid_leaf_key(&key));
}

#[test]
fn wall_clock_key_is_valid() {
    let key = KeyBuilder::new().next_key();
    assert_eq!(key.len(), 22);
    assert!(is_valid_leaf_key(&key), "{key}");
}

#[test]
fn sub_millisecond_part_is_truncated() {
    let t = at(0, 0, 0, 7) + chrono::Duration::microseconds(999);
    let mut keys = scripted_keys(vec![t]);
    assert_eq!(keys.next_key(), "2024.01.01.0000.00.007");
}

#[test]
fn leaf_key_validation() {
    assert!(is_valid_leaf_key("2024.01.01.0000.00.000"));
    assert!(is_valid_leaf_key("1999.12.31.2359.59.999"));

    assert!(!is_valid_leaf_key(""));
    assert!(!is_valid_leaf_key("2024.01.01.0000.00"));
    assert!(!is_valid_leaf_key("2024.1.01.0000.00.000"));
    assert!(!is_valid_leaf_key("2024.01.01.0000.00.00a"));
    assert!(!is_valid_leaf_key("2024.02.30.0000.00.000"));
    assert!(!is_valid_leaf_key("2024.01.01.2460.00.000"));
    assert!(!is_valid_leaf_key("2024/01/01.0000.00.000"));
}

// --------------------- Ordering ---------------------

#[test]
fn keys_sort_chronologically() {
    let mut keys = ticking_keys();
    let issued: Vec<String> = (0..1500).map(|_| keys.next_key()).collect();
    let mut sorted = issued.clone();
    sorted.sort();
    assert_eq!(issued, sorted);
    assert_eq!(issued[1000], "2024.01.01.0000.01.000");
}

#[test]
fn clock_stepping_back_keeps_keys_increasing() {
    let mut keys = scripted_keys(vec![at(10, 0, 0, 500), at(9, 59, 59, 0), at(10, 0, 0, 503)]);
    assert_eq!(keys.next_key(), "2024.01.01.1000.00.500");
    assert_eq!(keys.next_key(), "2024.01.01.1000.00.501");
    assert_eq!(keys.next_key(), "2024.01.01.1000.00.503");
}

#[test]
fn repeated_millisecond_gets_next_key() {
    let mut keys = scripted_keys(vec![at(0, 0, 0, 5), at(0, 0, 0, 5), at(0, 0, 0, 5)]);
    assert_eq!(keys.next_key(), "2024.01.01.0000.00.005");
    assert_eq!(keys.next_key(), "2024.01.01.0000.00.006");
    assert_eq!(keys.next_key(), "2024.01.01.0000.00.007");
}

#[test]
fn key_carries_into_next_second() {
    let mut keys = scripted_keys(vec![at(23, 59, 59, 999), at(23, 59, 59, 999)]);
    assert_eq!(keys.next_key(), "2024.01.01.2359.59.999");
    assert_eq!(keys.next_key(), "2024.01.02.0000.00.000");
}

// --------------------- Address ---------------------

#[test]
fn address_parse_splits_on_last_separator() {
    let a = Address::parse("result/rank-3/2024.01.01.0000.00.000").unwrap();
    assert_eq!(a.group(), "result/rank-3");
    assert_eq!(a.leaf(), "2024.01.01.0000.00.000");
    assert_eq!(a.path(), "result/rank-3/2024.01.01.0000.00.000");
    assert_eq!(a.to_string(), a.path());
}

#[test]
fn address_without_group_lives_at_root() {
    let a = Address::parse("leaf").unwrap();
    assert_eq!(a.group(), "");
    assert_eq!(a.path(), "leaf");
}

#[test]
fn address_normalizes_group_separators() {
    let a = Address::new("/result/", "k").unwrap();
    assert_eq!(a.group(), "result");
    assert_eq!(a.path(), "result/k");
}

#[test]
fn bad_addresses_are_rejected() {
    assert!(matches!(
        Address::new("result", ""),
        Err(StoreError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        Address::new("result", "a/b"),
        Err(StoreError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        Address::new("a//b", "k"),
        Err(StoreError::InvalidConfiguration(_))
    ));
}

#[test]
fn builder_address_uses_group() {
    let mut keys = scripted_keys(vec![at(0, 0, 0, 1)]);
    let a = keys.address("/result");
    assert_eq!(a.path(), "result/2024.01.01.0000.00.001");
}
