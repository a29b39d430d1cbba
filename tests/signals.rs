//! Real SIGINT delivery ends the group cleanly. Kept in its own test binary
//! because the signal is sent to the whole process.

#![cfg(unix)]

use std::time::Duration;

use service_harness::lifecycle::{RunGroup, SignalWatcher};

mod common;
use common::blocking;

#[tokio::test]
async fn test_sigint_interrupts_every_actor() {
    let worker = blocking("worker");

    let mut group = RunGroup::new();
    group.add(SignalWatcher::new()).add(worker.clone());
    let run = tokio::spawn(group.run());

    // Give the watcher time to install its handlers.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = tokio::process::Command::new("kill")
        .args(["-INT", &std::process::id().to_string()])
        .status()
        .await
        .unwrap();
    assert!(status.success());

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("signal must end the group")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(worker.interrupts(), 1);
}
