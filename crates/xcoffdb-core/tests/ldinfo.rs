//! Tests for the loader-info codec and the live query loop

mod common;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use common::*;
use xcoffdb_core::config::SessionConfig;
use xcoffdb_core::error::XcoffError;
use xcoffdb_core::ldinfo::{query_snapshot, LoaderSnapshot, LD_INFO_SIZE};
use xcoffdb_core::target::LoaderQueryError;
use xcoffdb_core::types::{Address, ProcessId};

const PID: ProcessId = ProcessId(311);

fn quick_config() -> SessionConfig
{
    SessionConfig {
        settle_delay: Duration::ZERO,
        ..SessionConfig::default()
    }
}

fn two_records() -> Vec<u8>
{
    encode_ldinfo(&[
        LdRecord::new(3, EXEC_PATH, "", 0x1000_0000, 0x2000_0000),
        LdRecord::new(4, LIBC_PATH, LIBC_MEMBER, 0xd000_0000, 0xf000_0000),
    ])
}

#[test]
fn test_parse_walks_the_chain()
{
    let snapshot = LoaderSnapshot::parse(&two_records()).unwrap();

    assert_eq!(snapshot.len(), 2);
    let libc = &snapshot.entries()[1];
    assert_eq!(libc.fd, 4);
    assert_eq!(libc.path, PathBuf::from(LIBC_PATH));
    assert_eq!(libc.member_name(), Some(LIBC_MEMBER));
    assert_eq!(libc.text_origin, Address::new(0xd000_0000));
    assert_eq!(libc.text_size, 0x2000);
    assert!(libc.is_last());
    assert!(!snapshot.entries()[0].is_last());
}

#[test]
fn test_parse_rejects_next_outside_buffer()
{
    let mut bytes = two_records();
    bytes[0..4].copy_from_slice(&0x1000u32.to_be_bytes());

    let err = LoaderSnapshot::parse(&bytes).unwrap_err();
    assert!(matches!(err, XcoffError::LoaderInfoDecode { offset: 0, .. }));
}

#[test]
fn test_query_doubles_buffer_until_it_fits()
{
    let mut query = MockLoaderQuery::default();
    query.script.push_back(Err(LoaderQueryError::BufferTooSmall));
    query.script.push_back(Err(LoaderQueryError::BufferTooSmall));
    query.script.push_back(Ok(two_records()));

    let snapshot = query_snapshot(&mut query, PID, &quick_config()).unwrap();

    assert_eq!(snapshot.len(), 2);
    assert_eq!(query.sizes, vec![64 * LD_INFO_SIZE, 128 * LD_INFO_SIZE, 256 * LD_INFO_SIZE]);
}

#[test]
fn test_query_enomem_counts_as_too_small()
{
    let mut query = MockLoaderQuery::default();
    query
        .script
        .push_back(Err(LoaderQueryError::from(io::Error::from_raw_os_error(libc::ENOMEM))));
    query.script.push_back(Ok(two_records()));
    let config = SessionConfig {
        initial_load_segments: 2,
        ..quick_config()
    };

    query_snapshot(&mut query, PID, &config).unwrap();
    assert_eq!(query.sizes, vec![2 * LD_INFO_SIZE, 4 * LD_INFO_SIZE]);
}

#[test]
fn test_query_failure_is_fatal()
{
    let mut query = MockLoaderQuery::default();
    query
        .script
        .push_back(Err(LoaderQueryError::Failed(io::Error::from_raw_os_error(libc::ESRCH))));

    let err = query_snapshot(&mut query, PID, &quick_config()).unwrap_err();

    match err {
        XcoffError::LoaderQueryFailed { pid, ref source } => {
            assert_eq!(pid, 311);
            assert_eq!(source.raw_os_error(), Some(libc::ESRCH));
        }
        other => panic!("Expected LoaderQueryFailed, got {other:?}"),
    }
    assert_eq!(query.sizes.len(), 1);
}

#[test]
fn test_query_buffer_that_cannot_be_sized_is_an_error()
{
    let mut query = MockLoaderQuery::default();
    query.script.push_back(Ok(two_records()));
    let config = SessionConfig {
        initial_load_segments: usize::MAX,
        ..quick_config()
    };

    let err = query_snapshot(&mut query, PID, &config).unwrap_err();

    assert!(matches!(
        err,
        XcoffError::LoaderBufferOverflow { pid: 311, segments } if segments == usize::MAX
    ));
    assert!(query.sizes.is_empty());
}

#[test]
fn test_query_waits_before_asking()
{
    let mut query = MockLoaderQuery::default();
    query.script.push_back(Ok(two_records()));
    let config = SessionConfig {
        settle_delay: Duration::from_millis(5),
        ..SessionConfig::default()
    };

    let started = std::time::Instant::now();
    query_snapshot(&mut query, PID, &config).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(5));
}
