//! Coordinator and workers talking over loopback.

#![cfg(all(feature = "coordinator", feature = "worker"))]

use std::{net::SocketAddr, time::Duration};

use quadrature::{
    coordinator::{Coordinator, CoordinatorConfig, IntegrationRequest},
    net::wire::{
        read_record, write_record, Assignment, Capacity, PartialSum, Record, RecordKind,
    },
    worker::{Worker, WorkerConfig},
    Error, FunctionId,
};
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    task::JoinHandle,
    time::{sleep, timeout},
};

async fn coordinator(num_nodes: usize, max_time: Duration) -> Coordinator {
    let config = CoordinatorConfig::builder()
        .listen_addr("127.0.0.1:0".parse().unwrap())
        .max_time(max_time)
        .num_nodes(num_nodes)
        .build();
    Coordinator::bind(config).await.unwrap()
}

fn spawn_worker(addr: SocketAddr, cores: u32, seconds: u64) -> JoinHandle<Result<f64, Error>> {
    let config = WorkerConfig::builder()
        .coordinator(addr)
        .cores(cores)
        .max_time(Duration::from_secs(seconds))
        .retry_delay(Duration::from_millis(20))
        .build();
    tokio::spawn(async move { Worker::new(config).run().await })
}

/// Connects and sends `capacity` like a worker would, leaving the rest of the
/// protocol to the test.
async fn registered_peer(addr: SocketAddr, capacity: Capacity) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_record(&mut stream, &capacity).await.unwrap();
    stream
}

fn request(function: FunctionId, left: f64, right: f64) -> IntegrationRequest {
    IntegrationRequest::builder()
        .function(function)
        .left(left)
        .right(right)
        .tolerance(0.01)
        .build()
}

/// The tolerance bounds the error of each step, not of the whole sum. Tests
/// that compare against a closed form with a fixed margin ask for fine steps.
fn fine_request(function: FunctionId, left: f64, right: f64) -> IntegrationRequest {
    IntegrationRequest {
        tolerance: 1e-6,
        ..request(function, left, right)
    }
}

#[tokio::test]
async fn two_workers_integrate_sqr() {
    let mut coordinator = coordinator(2, Duration::from_secs(10)).await;
    let addr = coordinator.local_addr();
    let workers = [spawn_worker(addr, 1, 1), spawn_worker(addr, 1, 1)];

    let value = coordinator
        .integrate(request(FunctionId::Sqr, 0., 1.))
        .await
        .unwrap();
    assert!((value - 1. / 3.).abs() < 0.01, "got {value}");

    let mut reported = 0.;
    for worker in workers {
        reported += worker.await.unwrap().unwrap();
    }
    assert_eq!(reported, value);
}

#[tokio::test]
async fn uneven_workers_integrate_exp() {
    let mut coordinator = coordinator(3, Duration::from_secs(10)).await;
    let addr = coordinator.local_addr();
    let _workers = [
        spawn_worker(addr, 1, 5),
        spawn_worker(addr, 2, 5),
        spawn_worker(addr, 3, 1),
    ];

    let value = coordinator
        .integrate(request(FunctionId::Exp, 1., 2.))
        .await
        .unwrap();
    let exact = 2f64.exp() - 1f64.exp();
    assert!((value - exact).abs() < 0.01, "got {value}, want {exact}");
}

#[tokio::test]
async fn integrates_sin_over_a_period() {
    let mut coordinator = coordinator(2, Duration::from_secs(10)).await;
    let addr = coordinator.local_addr();
    let _workers = [spawn_worker(addr, 2, 3), spawn_worker(addr, 1, 3)];

    let value = coordinator
        .integrate(fine_request(FunctionId::Sin, 0., std::f64::consts::PI))
        .await
        .unwrap();
    assert!((value - 2.).abs() < 0.01, "got {value}");
}

#[tokio::test]
async fn assignments_tile_the_interval() {
    let mut coordinator = coordinator(2, Duration::from_secs(2)).await;
    let addr = coordinator.local_addr();

    let peers = tokio::spawn(async move {
        let mut streams = Vec::new();
        for cores in [1, 3] {
            let stream = registered_peer(
                addr,
                Capacity {
                    max_compute_seconds: 1,
                    core_count: cores,
                },
            )
            .await;
            // registration order decides link order, wait until this one is in
            sleep(Duration::from_millis(50)).await;
            streams.push(stream);
        }
        let mut received = Vec::new();
        for stream in streams.iter_mut() {
            let assignment: Assignment = read_record(stream).await.unwrap();
            received.push(assignment);
        }
        for stream in streams.iter_mut() {
            write_record(stream, &PartialSum { value: 1. })
                .await
                .unwrap();
        }
        received
    });

    let value = coordinator
        .integrate(request(FunctionId::Sqr, 0., 1.))
        .await
        .unwrap();
    assert_eq!(value, 2.);

    let received = peers.await.unwrap();
    // four steps of 0.25, split 1:3
    assert_eq!(received[0].interval_start, 0.);
    assert_eq!(received[0].step_count, 1);
    assert_eq!(received[1].interval_start, 0.25);
    assert_eq!(received[1].step_count, 3);
    assert_eq!(received[1].interval_end(), 1.);
}

#[tokio::test]
async fn hang_up_before_result_is_fatal() {
    let mut coordinator = coordinator(1, Duration::from_secs(5)).await;
    let addr = coordinator.local_addr();

    tokio::spawn(async move {
        let mut stream = registered_peer(
            addr,
            Capacity {
                max_compute_seconds: 1,
                core_count: 1,
            },
        )
        .await;
        let _: Assignment = read_record(&mut stream).await.unwrap();
        drop(stream);
    });

    let err = coordinator
        .integrate(request(FunctionId::Sqr, 0., 1.))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Disconnected(RecordKind::Result)), "{err}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn hang_up_before_capacity_is_fatal() {
    let mut coordinator = coordinator(1, Duration::from_secs(5)).await;
    let addr = coordinator.local_addr();

    tokio::spawn(async move {
        drop(TcpStream::connect(addr).await.unwrap());
    });

    let err = coordinator
        .integrate(request(FunctionId::Exp, 0., 1.))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Disconnected(RecordKind::Capacity)), "{err}");
}

#[tokio::test]
async fn partial_capacity_is_fatal() {
    let config = CoordinatorConfig::builder()
        .listen_addr("127.0.0.1:0".parse().unwrap())
        .max_time(Duration::from_secs(1))
        .num_nodes(1)
        .registration_timeout(Duration::from_millis(200))
        .build();
    let mut coordinator = Coordinator::bind(config).await.unwrap();
    let addr = coordinator.local_addr();

    let peer = tokio::spawn(async move {
        let buf = Capacity {
            max_compute_seconds: 1,
            core_count: 1,
        }
        .encode();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&buf[..5]).await.unwrap();
        // keep the socket open so the record is never completed
        sleep(Duration::from_secs(5)).await;
    });

    let err = timeout(
        Duration::from_secs(3),
        coordinator.integrate(request(FunctionId::Sqr, 0., 1.)),
    )
    .await
    .expect("a partial record must not stall registration")
    .unwrap_err();
    assert!(
        matches!(
            err,
            Error::ShortRecord {
                kind: RecordKind::Capacity,
                expected: 13,
                received: 5,
            }
        ),
        "{err}"
    );
    assert!(err.is_fatal());
    peer.abort();
}

#[tokio::test]
async fn hang_up_during_registration_is_fatal() {
    // two workers are needed but only one ever shows up, and then leaves
    let mut coordinator = coordinator(2, Duration::from_secs(5)).await;
    let addr = coordinator.local_addr();

    tokio::spawn(async move {
        let stream = registered_peer(
            addr,
            Capacity {
                max_compute_seconds: 1,
                core_count: 1,
            },
        )
        .await;
        sleep(Duration::from_millis(100)).await;
        drop(stream);
    });

    let err = timeout(
        Duration::from_secs(3),
        coordinator.integrate(request(FunctionId::Sqr, 0., 1.)),
    )
    .await
    .expect("registration should fail as soon as the worker leaves")
    .unwrap_err();
    assert!(matches!(err, Error::Disconnected(RecordKind::Result)), "{err}");
}

#[tokio::test]
async fn silent_worker_times_out() {
    let mut coordinator = coordinator(1, Duration::from_millis(200)).await;
    let addr = coordinator.local_addr();

    tokio::spawn(async move {
        let mut stream = registered_peer(
            addr,
            Capacity {
                max_compute_seconds: 1,
                core_count: 1,
            },
        )
        .await;
        let _: Assignment = read_record(&mut stream).await.unwrap();
        sleep(Duration::from_secs(5)).await;
    });

    let err = coordinator
        .integrate(request(FunctionId::Sqr, 0., 1.))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TimedOut(_)), "{err}");
}

#[tokio::test]
async fn workers_without_capacity() {
    let mut coordinator = coordinator(2, Duration::from_secs(5)).await;
    let addr = coordinator.local_addr();

    for _ in 0..2 {
        tokio::spawn(async move {
            let _stream = registered_peer(
                addr,
                Capacity {
                    max_compute_seconds: 10,
                    core_count: 0,
                },
            )
            .await;
            sleep(Duration::from_secs(5)).await;
        });
    }

    let err = coordinator
        .integrate(request(FunctionId::Sqr, 0., 1.))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoCapacity), "{err}");
}

#[tokio::test]
async fn worker_waits_for_the_coordinator() {
    let addr = {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        reserved.local_addr().unwrap()
    };
    let worker = spawn_worker(addr, 1, 1);
    sleep(Duration::from_millis(100)).await;

    let config = CoordinatorConfig::builder()
        .listen_addr(addr)
        .max_time(Duration::from_secs(10))
        .num_nodes(1)
        .build();
    let mut coordinator = Coordinator::bind(config).await.unwrap();
    let value = coordinator
        .integrate(fine_request(FunctionId::Sqr, -1., 1.))
        .await
        .unwrap();
    assert!((value - 2. / 3.).abs() < 0.01);
    assert_eq!(worker.await.unwrap().unwrap(), value);
}

#[tokio::test]
async fn worker_gives_up_when_asked_to() {
    let addr = {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        reserved.local_addr().unwrap()
    };
    let config = WorkerConfig::builder()
        .coordinator(addr)
        .retry_delay(Duration::from_millis(10))
        .max_connect_attempts(2)
        .build();
    let err = Worker::new(config).run().await.unwrap_err();
    assert!(
        matches!(err, Error::ConnectAttemptsExhausted { attempts: 2, .. }),
        "{err}"
    );
}

#[tokio::test]
async fn serves_consecutive_requests() {
    let mut coordinator = coordinator(1, Duration::from_secs(10)).await;
    let addr = coordinator.local_addr();

    let _first = spawn_worker(addr, 1, 1);
    let first = coordinator
        .integrate(request(FunctionId::Sqr, 0., 1.))
        .await
        .unwrap();

    // the listener is closed between requests, so this one retries until the
    // second request rebinds
    let _second = spawn_worker(addr, 2, 1);
    let second = coordinator
        .integrate(request(FunctionId::Sqr, 1., 2.))
        .await
        .unwrap();

    assert!((first - 1. / 3.).abs() < 0.01);
    assert!((second - 7. / 3.).abs() < 0.01);
}
