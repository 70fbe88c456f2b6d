//! End-to-end client/worker scenarios against the mock job server.

mod common;

use std::time::Duration;

use common::MockServer;
use gearman_client::protocol::{Packet, PacketType};
use gearman_client::worker::{FunctionResult, JobContext};
use gearman_client::{Client, ClientConfig, Job, JobResult, Worker};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn reverse(ctx: &JobContext) -> FunctionResult {
    let mut data = ctx.data().to_vec();
    data.reverse();
    Ok(JobResult::success(data))
}

/// Connect a worker to `server` and run its loop in the background.
async fn start_worker(
    server: &MockServer,
    register: impl FnOnce(&mut Worker),
) -> (CancellationToken, JoinHandle<Worker>) {
    let mut worker = Worker::new();
    register(&mut worker);
    worker.add_server(server.address()).await.unwrap();

    let stop = worker.stop_token();
    let running = tokio::spawn(async move {
        worker.work().await.unwrap();
        worker
    });
    (stop, running)
}

async fn stop_worker(stop: CancellationToken, running: JoinHandle<Worker>) {
    stop.cancel();
    let mut worker = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("worker loop did not stop")
        .unwrap();
    worker.shutdown().await;
}

fn client_for(server: &MockServer) -> Client {
    let mut client = Client::with_config(
        ClientConfig::default().with_submit_timeout(Duration::from_secs(5)),
    );
    assert!(client.add_server(server.address()).unwrap());
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reverse_hello_world() {
    let server = MockServer::start().await;
    let (stop, running) = start_worker(&server, |worker| {
        worker.register_function("reverse", reverse).unwrap();
    })
    .await;

    let mut client = client_for(&server);
    let result = client
        .execute(&Job::new("reverse", "Hello World"))
        .await
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(result.results(), b"dlroW olleH");
    assert_eq!(client.active_job_count(), 0);

    assert!(client.shutdown(Some(Duration::from_secs(1))).await);
    assert!(client.is_terminated());
    stop_worker(stop, running).await;
}

#[tokio::test]
async fn test_echo_round_trip() {
    let server = MockServer::start().await;
    let mut client = client_for(&server);

    let echoed = client.echo("DEADBEEF").await.unwrap();
    assert_eq!(echoed.as_ref(), b"DEADBEEF");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_updates_reach_client() {
    let server = MockServer::start().await;
    let (stop, running) = start_worker(&server, |worker| {
        worker
            .register_function("count", |ctx: &JobContext| -> FunctionResult {
                for i in 1..=3u64 {
                    ctx.send_status(i, 3)?;
                    ctx.send_data(i.to_string())?;
                }
                ctx.send_warning("almost done")?;
                Ok(JobResult::success("!"))
            })
            .unwrap();
    })
    .await;

    let mut client = client_for(&server);
    let handle = client.submit(&Job::new("count", "")).await.unwrap();

    let events = tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        while !events
            .iter()
            .any(|p: &Packet| p.packet_type() == PacketType::WorkComplete)
        {
            events.extend(client.drain_job_events());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        events
    })
    .await
    .unwrap();
    let statuses = events
        .iter()
        .filter(|p| p.packet_type() == PacketType::WorkStatus)
        .count();
    assert_eq!(statuses, 3);

    let result = client.wait_for_job(&handle, None).await.unwrap();
    assert!(result.succeeded());
    assert_eq!(result.results(), b"123!");
    assert_eq!(result.warnings(), b"almost done");
    assert_eq!((result.numerator(), result.denominator()), (3, 3));
    assert_eq!(client.pending_event_count(), 0);

    stop_worker(stop, running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_background_job_status() {
    let server = MockServer::start().await;
    let (stop, running) = start_worker(&server, |worker| {
        worker
            .register_function("slow", |_: &JobContext| -> FunctionResult {
                std::thread::sleep(Duration::from_millis(500));
                Ok(JobResult::success("done"))
            })
            .unwrap();
    })
    .await;

    let mut client = client_for(&server);
    let handle = client
        .submit(&Job::new("slow", "payload").background(true))
        .await
        .unwrap();
    assert_eq!(client.active_job_count(), 0);

    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = client.job_status(&handle).await.unwrap();
            if status.running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(status.known);

    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = client.job_status(&handle).await.unwrap();
            if !status.known {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(!status.running);

    stop_worker(stop, running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_function_fails_without_stopping_worker() {
    let server = MockServer::start_ignoring_abilities().await;
    let (stop, running) = start_worker(&server, |worker| {
        worker.register_function("reverse", reverse).unwrap();
    })
    .await;

    let mut client = client_for(&server);
    let result = client
        .execute(&Job::new("missing", "anything"))
        .await
        .unwrap();
    assert!(!result.succeeded());

    let result = client.execute(&Job::new("reverse", "abc")).await.unwrap();
    assert!(result.succeeded());
    assert_eq!(result.results(), b"cba");

    stop_worker(stop, running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_function_error_becomes_failure() {
    let server = MockServer::start().await;
    let (stop, running) = start_worker(&server, |worker| {
        worker
            .register_function("explode", |_: &JobContext| -> FunctionResult {
                Err("kaboom".into())
            })
            .unwrap();
        worker
            .register_function("panic", |_: &JobContext| -> FunctionResult {
                panic!("function panicked on purpose")
            })
            .unwrap();
    })
    .await;

    let mut client = client_for(&server);
    let result = client.execute(&Job::new("explode", "")).await.unwrap();
    assert!(!result.succeeded());
    assert_eq!(result.exceptions(), b"kaboom");

    let result = client.execute(&Job::new("panic", "")).await.unwrap();
    assert!(!result.succeeded());
    assert_eq!(result.exceptions(), b"function panicked on purpose");

    stop_worker(stop, running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thousand_jobs_release_state() {
    let server = MockServer::start().await;
    let (stop, running) = start_worker(&server, |worker| {
        worker.register_function("reverse", reverse).unwrap();
    })
    .await;

    let mut client = client_for(&server);
    let mut handles = Vec::with_capacity(1000);
    for i in 0..1000 {
        let handle = client
            .submit(&Job::new("reverse", format!("job-{i}")))
            .await
            .unwrap();
        handles.push((i, handle));
    }

    for (i, handle) in handles {
        let result = client
            .wait_for_job(&handle, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(result.succeeded());
        let expected: Vec<u8> = format!("job-{i}").bytes().rev().collect();
        assert_eq!(result.results(), expected.as_slice());
    }

    assert_eq!(client.active_job_count(), 0);
    assert_eq!(client.pending_event_count(), 0);
    assert_eq!(server.known_jobs(), 0);

    stop_worker(stop, running).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_id_reaches_server() {
    let server = MockServer::start().await;
    let mut worker = Worker::new();
    worker.set_worker_id("reverse-worker-1");
    worker.add_server(server.address()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.worker_ids().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(server.worker_ids(), vec!["reverse-worker-1".to_string()]);
    worker.shutdown().await;
}
