//! Tests for asynchronous sync
#![cfg(unix)]

mod common;

use common::{Lines, quick_options};
use exec_util::{Charset, PoolConfig, Process, WorkerPool, run_cmd};
use std::time::Duration;

#[smol_potat::test]
async fn test_sync_async_collects_output() {
    let out = Lines::new();
    let process = run_cmd(["sh", "-c", "echo async; exit 7"], |_| {})
        .unwrap()
        .sync_async_with(&quick_options(), |syncer| {
            syncer.on_stdout_each_line(Charset::utf_8(), out.collector());
        })
        .await
        .unwrap();

    assert_eq!(out.get(), vec!["async"]);
    assert_eq!(process.exit_status().unwrap().code, Some(7));
}

#[smol_potat::test]
async fn test_sync_async_default_options() {
    let process = run_cmd(["true"], |_| {})
        .unwrap()
        .sync_async(|_| {})
        .await
        .unwrap();

    assert!(process.exit_status().unwrap().success());
}

#[smol_potat::test]
async fn test_concurrent_processes_share_a_pool() {
    // Room for both processes' drains even before any worker picks one up
    let pool = WorkerPool::with_config(&PoolConfig {
        size: 6,
        queue_capacity: 6,
        thread_name: "shared".to_string(),
    })
    .unwrap();
    let options = quick_options();

    let first = Lines::new();
    let second = Lines::new();
    let a = run_cmd(["sh", "-c", "sleep 0.2; echo a"], |_| {}).unwrap();
    let b = run_cmd(["sh", "-c", "echo b"], |_| {}).unwrap();

    let (a, b) = futures_lite::future::zip(
        a.sync_async_on(&pool, &options, |syncer| {
            syncer.on_stdout_each_line(Charset::utf_8(), first.collector());
        }),
        b.sync_async_on(&pool, &options, |syncer| {
            syncer.on_stdout_each_line(Charset::utf_8(), second.collector());
        }),
    )
    .await;

    assert!(a.unwrap().exit_status().unwrap().success());
    assert!(b.unwrap().exit_status().unwrap().success());
    assert_eq!(first.get(), vec!["a"]);
    assert_eq!(second.get(), vec!["b"]);

    assert!(!pool.is_shutdown());
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)).await);
}

#[smol_potat::test]
async fn test_wait_timeout() {
    let mut process: Process = run_cmd(["sleep", "5"], |_| {}).unwrap();
    assert!(
        process
            .wait_timeout(Duration::from_millis(50))
            .await
            .unwrap()
            .is_none()
    );

    process.terminate().unwrap();
    let status = process.wait().await.unwrap();
    assert_eq!(status.signal, Some(15));
    assert_eq!(process.exit_status(), Some(&status));
}
