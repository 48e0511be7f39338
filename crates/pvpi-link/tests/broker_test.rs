//! Broker behaviour with several clients sharing one simulated device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pvpi_link::{
    Broker, BrokerConfig, BrokerThread, Frame, FrameCodec, FrameKind, LinkError, LinkResult,
    RemoteClient, RemoteConfig, SimulatedDevice, Transport,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

fn local_config() -> BrokerConfig {
    BrokerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    }
}

fn client(broker: &BrokerThread, identity: &str) -> RemoteClient {
    RemoteClient::connect(RemoteConfig {
        addr: broker.addr().to_string(),
        identity: Some(identity.to_string()),
        ..Default::default()
    })
    .unwrap()
}

/// Records when each exchange starts and ends, and any exchange that starts
/// while another is still running.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
    busy: Arc<AtomicBool>,
    latency: Duration,
}

impl Recorder {
    fn with_latency(latency: Duration) -> Self {
        Recorder {
            latency,
            ..Default::default()
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl Transport for Recorder {
    fn exchange(&mut self, command: &str) -> LinkResult<String> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.events.lock().push(format!("overlap:{}", command));
        }
        self.events.lock().push(format!("enter:{}", command));
        thread::sleep(self.latency);
        self.events.lock().push(format!("exit:{}", command));
        self.busy.store(false, Ordering::SeqCst);
        Ok(format!("{},OK", command))
    }

    fn close(&mut self) {
        self.events.lock().push("close".to_string());
    }

    fn describe(&self) -> String {
        "recorder".to_string()
    }
}

#[test]
fn test_probe_does_not_touch_device() {
    let sim = SimulatedDevice::new();
    let broker = BrokerThread::spawn(sim.clone(), local_config()).unwrap();

    let mut stub = client(&broker, "probe-only");
    assert_eq!(stub.send(&[]).unwrap(), Vec::<u8>::new());
    assert!(sim.commands().is_empty());
}

#[test]
fn test_concurrent_identities_get_their_own_replies() {
    let sim = SimulatedDevice::new();
    sim.state().latency = Duration::from_millis(2);
    let broker = BrokerThread::spawn(sim.clone(), local_config()).unwrap();

    let workers: Vec<_> = [("GET_BAT_V", "MILLIVOLTS,12800"), ("GET_TEMP", "TEMP,25"), ("GET_ALIVE", "ALIVE")]
        .into_iter()
        .enumerate()
        .map(|(i, (command, expected))| {
            let mut stub = client(&broker, &format!("worker-{}", i));
            thread::spawn(move || {
                for _ in 0..20 {
                    assert_eq!(stub.exchange(command).unwrap(), expected);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(sim.commands().len(), 60);
}

#[test]
fn test_device_timeout_is_isolated_to_its_request() {
    let sim = SimulatedDevice::new();
    sim.state().timeout = Duration::from_millis(100);
    sim.silence("GET_PV_V");
    let broker = BrokerThread::spawn(sim.clone(), local_config()).unwrap();

    let mut a = client(&broker, "a");
    let mut b = client(&broker, "b");

    let slow = thread::spawn(move || {
        let result = a.exchange("GET_PV_V");
        (a, result)
    });
    thread::sleep(Duration::from_millis(20));
    assert_eq!(b.exchange("GET_ALIVE").unwrap(), "ALIVE");

    let (mut a, result) = slow.join().unwrap();
    assert!(matches!(result, Err(LinkError::TransportTimeout)));
    assert_eq!(a.exchange("GET_PV_C").unwrap(), "MILLIAMPS,1200");
}

#[test]
fn test_late_reply_is_discarded_after_no_response() {
    let sim = SimulatedDevice::new();
    sim.state().latency = Duration::from_millis(300);
    let broker = BrokerThread::spawn(sim.clone(), local_config()).unwrap();

    let mut stub = RemoteClient::connect(RemoteConfig {
        addr: broker.addr().to_string(),
        reply_timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .unwrap();

    assert!(matches!(stub.exchange("GET_BAT_V"), Err(LinkError::NoResponse(_))));

    sim.state().latency = Duration::ZERO;
    thread::sleep(Duration::from_millis(300));
    assert_eq!(stub.exchange("GET_TEMP").unwrap(), "TEMP,25");
}

#[test]
fn test_malformed_request_gets_sentinel() {
    let sim = SimulatedDevice::new();
    let broker = BrokerThread::spawn(sim.clone(), local_config()).unwrap();

    let mut stub = client(&broker, "sloppy");
    match stub.exchange("GET_BAT_V\nGET_TEMP") {
        Err(LinkError::Relay(msg)) => assert!(msg.starts_with("ERROR: malformed request")),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(sim.commands().is_empty());
    assert_eq!(stub.exchange("GET_ALIVE").unwrap(), "ALIVE");
}

#[test]
fn test_shutdown_releases_device() {
    let sim = SimulatedDevice::new();
    let broker = BrokerThread::spawn(sim.clone(), local_config()).unwrap();
    let addr = broker.addr();
    broker.shutdown().unwrap();

    assert!(sim.state().closed);
    let result = RemoteClient::connect(RemoteConfig {
        addr: addr.to_string(),
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    });
    assert!(matches!(result, Err(LinkError::BrokerUnreachable(_))));
}

#[test]
fn test_requests_served_in_arrival_order() {
    let recorder = Recorder::with_latency(Duration::from_millis(150));
    let broker = BrokerThread::spawn(recorder.clone(), local_config()).unwrap();

    let mut senders = Vec::new();
    for name in ["FIRST", "SECOND", "THIRD"] {
        let mut stub = client(&broker, &name.to_lowercase());
        senders.push(thread::spawn(move || stub.exchange(name)));
        thread::sleep(Duration::from_millis(40));
    }
    let replies: Vec<String> = senders
        .into_iter()
        .map(|s| s.join().unwrap().unwrap())
        .collect();

    assert_eq!(replies, vec!["FIRST,OK", "SECOND,OK", "THIRD,OK"]);
    assert_eq!(
        recorder.events(),
        vec![
            "enter:FIRST",
            "exit:FIRST",
            "enter:SECOND",
            "exit:SECOND",
            "enter:THIRD",
            "exit:THIRD",
        ]
    );
}

#[test]
fn test_one_exchange_at_a_time() {
    let recorder = Recorder::with_latency(Duration::from_millis(2));
    let broker = BrokerThread::spawn(recorder.clone(), local_config()).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|c| {
            let mut stub = client(&broker, &format!("busy-{}", c));
            thread::spawn(move || {
                for n in 0..10 {
                    let command = format!("C{}_{}", c, n);
                    assert_eq!(stub.exchange(&command).unwrap(), format!("{},OK", command));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let events = recorder.events();
    assert_eq!(events.len(), 80);
    assert!(events.iter().all(|e| !e.starts_with("overlap")));
    for pair in events.chunks(2) {
        let command = pair[0].strip_prefix("enter:").unwrap();
        assert_eq!(pair[1], format!("exit:{}", command));
    }
    // Each client's own requests keep their order.
    for c in 0..4 {
        let served: Vec<&String> = events
            .iter()
            .filter(|e| e.starts_with(&format!("enter:C{}_", c)))
            .collect();
        let expected: Vec<String> = (0..10).map(|n| format!("enter:C{}_{}", c, n)).collect();
        assert_eq!(served, expected.iter().collect::<Vec<_>>());
    }
}

#[test]
fn test_shutdown_finishes_in_flight_exchange() {
    let recorder = Recorder::with_latency(Duration::from_millis(300));
    let broker = BrokerThread::spawn(recorder.clone(), local_config()).unwrap();

    let mut stub = client(&broker, "last-word");
    let sender = thread::spawn(move || stub.exchange("POWER_OFF,20"));

    let deadline = Instant::now() + Duration::from_secs(2);
    while !recorder.events().contains(&"enter:POWER_OFF,20".to_string()) {
        assert!(Instant::now() < deadline, "exchange never started");
        thread::sleep(Duration::from_millis(5));
    }
    broker.shutdown().unwrap();

    assert_eq!(
        recorder.events(),
        vec!["enter:POWER_OFF,20", "exit:POWER_OFF,20", "close"]
    );
    // Whether the reply made it out before the connection closed is not
    // part of the contract.
    let _ = sender.join().unwrap();
}

async fn read_frame(stream: &mut TcpStream, codec: &mut FrameCodec) -> Frame {
    let mut buf = [0u8; 256];
    loop {
        if let Some(frame) = codec.decode().unwrap() {
            return frame;
        }
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "broker closed the connection");
        codec.push(&buf[..n]);
    }
}

#[tokio::test]
async fn test_raw_frames() {
    let sim = SimulatedDevice::new();
    let broker = Broker::bind(sim.clone(), local_config()).await.unwrap();
    let addr = broker.local_addr().unwrap();
    let (stop, stop_rx) = watch::channel(false);
    let server = tokio::spawn(broker.run(stop_rx));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut codec = FrameCodec::new();

    // Request before identity
    stream
        .write_all(&Frame::request(1, b"GET_ALIVE").encode().unwrap())
        .await
        .unwrap();
    let reply = read_frame(&mut stream, &mut codec).await;
    assert_eq!(reply.kind, FrameKind::Reply);
    assert_eq!(reply.seq, 1);
    assert!(reply.payload.starts_with(b"ERROR: malformed request"));

    // Unknown kind
    stream.write_all(&[b'?', 2, 0, 0, 0]).await.unwrap();
    let reply = read_frame(&mut stream, &mut codec).await;
    assert_eq!(reply.seq, 2);
    assert!(reply.payload.starts_with(b"ERROR: malformed request"));

    // Identity then a real request
    stream
        .write_all(&Frame::identity("raw").encode().unwrap())
        .await
        .unwrap();
    stream
        .write_all(&Frame::request(3, b"GET_CHARGE_STATE").encode().unwrap())
        .await
        .unwrap();
    let reply = read_frame(&mut stream, &mut codec).await;
    assert_eq!(reply, Frame::reply(3, b"CHARGE_STATE,3"));

    stop.send(true).unwrap();
    server.await.unwrap().unwrap();
    let mut sim = sim;
    assert!(matches!(sim.exchange("GET_ALIVE"), Err(LinkError::TransportClosed)));
}
