//! Multiplexer injector driven against stand-in `screen` scripts.
#![cfg(unix)]

mod common;

use common::temp_dir;
use logrelay::inject::{InjectionError, Injector, Multiplexer, MultiplexerInjector};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

#[tokio::test]
async fn screen_receives_command_with_carriage_return() {
    let dir = temp_dir("logrelay-inject-test");
    let args_file = dir.join("args");
    let fake = script(
        &dir,
        "screen",
        &format!("printf '%s\\n' \"$@\" > '{}'", args_file.display()),
    );
    let injector = MultiplexerInjector::new(Multiplexer::Screen, 0, Duration::from_secs(5))
        .with_program(fake.display().to_string());

    injector.inject("mc", "say hello").await.expect("inject");

    let args = std::fs::read_to_string(&args_file).expect("args recorded");
    assert_eq!(args, "-S\nmc\n-p\n0\n-X\nstuff\nsay hello\r\n");
}

#[tokio::test]
async fn empty_command_still_sends_terminator() {
    let dir = temp_dir("logrelay-inject-test");
    let args_file = dir.join("args");
    let fake = script(
        &dir,
        "tmux",
        &format!("printf '%s\\n' \"$@\" > '{}'", args_file.display()),
    );
    let injector = MultiplexerInjector::new(Multiplexer::Tmux, 1, Duration::from_secs(5))
        .with_program(fake.display().to_string());

    injector.inject("mc", "").await.expect("inject");

    let args = std::fs::read_to_string(&args_file).expect("args recorded");
    assert_eq!(args, "send-keys\n-t\nmc:.1\n-l\n\r\n");
}

#[tokio::test]
async fn failure_carries_combined_output() {
    let dir = temp_dir("logrelay-inject-test");
    let fake = script(
        &dir,
        "screen",
        "echo 'No screen session found.'; echo 'try screen -ls' >&2; exit 1",
    );
    let injector = MultiplexerInjector::new(Multiplexer::Screen, 0, Duration::from_secs(5))
        .with_program(fake.display().to_string());

    let err = injector.inject("mc", "list").await.unwrap_err();

    let InjectionError::Failed { output, .. } = &err else {
        panic!("expected Failed, got {err:?}");
    };
    assert_eq!(output, "No screen session found.\ntry screen -ls");
    assert!(err.to_string().contains("No screen session found."));
}

#[tokio::test]
async fn slow_delivery_times_out() {
    let dir = temp_dir("logrelay-inject-test");
    let fake = script(&dir, "screen", "sleep 5");
    let injector = MultiplexerInjector::new(Multiplexer::Screen, 0, Duration::from_millis(200))
        .with_program(fake.display().to_string());

    let started = std::time::Instant::now();
    let err = injector.inject("mc", "list").await.unwrap_err();

    assert!(matches!(err, InjectionError::Timeout { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn timeout_keeps_output_written_before_it() {
    let dir = temp_dir("logrelay-inject-test");
    let fake = script(
        &dir,
        "screen",
        "echo 'attaching to mc'; echo 'session busy' >&2; sleep 5",
    );
    let injector = MultiplexerInjector::new(Multiplexer::Screen, 0, Duration::from_millis(500))
        .with_program(fake.display().to_string());

    let started = std::time::Instant::now();
    let err = injector.inject("mc", "list").await.unwrap_err();

    let InjectionError::Timeout { output, .. } = &err else {
        panic!("expected Timeout, got {err:?}");
    };
    assert_eq!(output, "attaching to mc\nsession busy");
    assert!(err.to_string().contains("session busy"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(4));
}
