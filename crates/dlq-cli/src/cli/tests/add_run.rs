//! Tests for add, run and sync.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use dlq_core::store::{OutputFormat, Priority};

#[test]
fn cli_parse_add_defaults() {
    match parse(&["dlq", "add", "https://example.com/track"]) {
        CliCommand::Add {
            url,
            format,
            priority,
            key,
        } => {
            assert_eq!(url, "https://example.com/track");
            assert_eq!(format, OutputFormat::Mp3);
            assert_eq!(priority, Priority::Normal);
            assert!(key.is_none());
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_all_options() {
    match parse(&[
        "dlq",
        "add",
        "https://example.com/track",
        "--format",
        "m4a",
        "--priority",
        "high",
        "--key",
        "abc-1",
    ]) {
        CliCommand::Add {
            format,
            priority,
            key,
            ..
        } => {
            assert_eq!(format, OutputFormat::M4a);
            assert_eq!(priority, Priority::High);
            assert_eq!(key.as_deref(), Some("abc-1"));
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_rejects_unknown_format() {
    assert!(Cli::try_parse_from(["dlq", "add", "https://x", "--format", "flac"]).is_err());
}

#[test]
fn cli_parse_run() {
    match parse(&["dlq", "run"]) {
        CliCommand::Run { max_concurrent } => assert!(max_concurrent.is_none()),
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_max_concurrent() {
    match parse(&["dlq", "run", "--max-concurrent", "5"]) {
        CliCommand::Run { max_concurrent } => assert_eq!(max_concurrent, Some(5)),
        _ => panic!("expected Run with --max-concurrent"),
    }
}

#[test]
fn cli_parse_sync() {
    match parse(&["dlq", "sync"]) {
        CliCommand::Sync { once } => assert!(!once),
        _ => panic!("expected Sync"),
    }
    match parse(&["dlq", "sync", "--once"]) {
        CliCommand::Sync { once } => assert!(once),
        _ => panic!("expected Sync --once"),
    }
}
