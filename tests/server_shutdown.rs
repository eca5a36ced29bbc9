mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use hermes::consent::{ConsentGate, SensorKind, StaticConsent};
use hermes::server::serve;
use hermes::{Config, CONFIG};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_during_session_hangs_up_and_returns() {
    // Endless paced synthetic stream
    let mut config = Config::default();
    config.sensor = sensor(WIDTH, HEIGHT);
    config.sensor.frame_limit = None;
    config.encoder = encoder_config();
    CONFIG.store(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gate = Arc::new(ConsentGate::start(SensorKind::Camera, StaticConsent(true)).unwrap());

    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, gate, async {
        let _ = stopped.await;
    }));

    let (streaming, first_sample) = std::sync::mpsc::channel();
    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(&[0]).unwrap();
        stream.write_all(&descriptor()).unwrap();
        let mut header = [0u8; 12];
        stream.read_exact(&mut header).unwrap();
        streaming.send(()).unwrap();
        // Whatever was in flight, then EOF or reset
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    });

    tokio::task::spawn_blocking(move || first_sample.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("session never started streaming");

    stop.send(()).unwrap();
    let served = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server kept running after shutdown");
    assert!(matches!(served, Ok(Ok(()))));

    tokio::task::spawn_blocking(move || client.join())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_while_idle_returns() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gate = Arc::new(ConsentGate::start(SensorKind::Camera, StaticConsent(true)).unwrap());

    let served = tokio::time::timeout(
        Duration::from_secs(5),
        serve(listener, gate, std::future::ready(())),
    )
    .await
    .expect("idle server ignored shutdown");
    assert!(served.is_ok());
}
