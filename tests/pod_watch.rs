use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use podwatch::kube::{ClusterConfig, KubeClient, PodWatcher, WatchConfig};
use podwatch::{
    shutdown, BroadcastHub, Error, EventRelay, LocalSubscriber, SubscriberId, SubscriberRegistry,
    WireMessage,
};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

enum WatchReply {
    Stream(Vec<String>),
    Fail(u16, String),
}

/// Canned API server: LIST answers are consumed in order (the last one
/// repeats), WATCH answers either stream their lines and close or fail with a
/// status; once they run out a watch is held open with no events.
#[derive(Clone, Default)]
struct Script {
    lists: Arc<Mutex<VecDeque<(u16, String)>>>,
    watches: Arc<Mutex<VecDeque<WatchReply>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Script {
    fn list(self, status: u16, body: Value) -> Self {
        self.lists.lock().unwrap().push_back((status, body.to_string()));
        self
    }

    fn watch(self, events: Vec<Value>) -> Self {
        let lines = events.iter().map(Value::to_string).collect();
        self.watches.lock().unwrap().push_back(WatchReply::Stream(lines));
        self
    }

    fn fail_watch(self, status: u16, body: Value) -> Self {
        self.watches
            .lock()
            .unwrap()
            .push_back(WatchReply::Fail(status, body.to_string()));
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    async fn start(self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = self.clone();
                tokio::spawn(async move {
                    let _ = script.handle(stream).await;
                });
            }
        });
        format!("http://{addr}")
    }

    async fn handle(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            head.extend_from_slice(&buf[..n]);
        }
        let target = String::from_utf8_lossy(&head)
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();
        self.requests.lock().unwrap().push(target.clone());

        if target.contains("watch=true") {
            let next = self.watches.lock().unwrap().pop_front();
            if let Some(WatchReply::Fail(status, body)) = next {
                return respond(&mut stream, status, &body).await;
            }
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n")
                .await?;
            match next {
                Some(WatchReply::Stream(lines)) => {
                    for line in lines {
                        stream.write_all(line.as_bytes()).await?;
                        stream.write_all(b"\n").await?;
                    }
                    stream.shutdown().await?;
                }
                _ => std::future::pending::<()>().await,
            }
        } else {
            let (status, body) = {
                let mut lists = self.lists.lock().unwrap();
                if lists.len() > 1 {
                    lists.pop_front()
                } else {
                    lists.front().cloned()
                }
            }
            .unwrap_or((200, json!({"items": []}).to_string()));
            respond(&mut stream, status, &body).await?;
        }
        Ok(())
    }
}

async fn respond(stream: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn pod(name: &str, rv: &str) -> Value {
    json!({
        "metadata": {"name": name, "namespace": "default", "resourceVersion": rv},
        "status": {"phase": "Running"}
    })
}

fn pod_list(rv: &str, items: Vec<Value>) -> Value {
    json!({"kind": "PodList", "metadata": {"resourceVersion": rv}, "items": items})
}

fn watch_event(kind: &str, object: Value) -> Value {
    json!({"type": kind, "object": object})
}

fn watcher(server: &str, shutdown: shutdown::Shutdown) -> PodWatcher {
    let cluster = ClusterConfig::from_parts(server, None, None).expect("config");
    let client = KubeClient::new(&cluster).expect("client");
    let config = WatchConfig {
        namespace: None,
        watch_timeout: Duration::from_secs(30),
        retry_delay: Duration::from_millis(50),
    };
    PodWatcher::new(client, config, shutdown)
}

fn relay_with_subscriber() -> (EventRelay, Receiver<WireMessage>) {
    let registry = Arc::new(SubscriberRegistry::new());
    let (sub, rx) = LocalSubscriber::channel(64);
    registry.register(SubscriberId::next(), Arc::new(sub));
    (EventRelay::new(Arc::new(BroadcastHub::new(registry))), rx)
}

async fn next_message(rx: &Receiver<WireMessage>) -> String {
    for _ in 0..400 {
        if let Ok(msg) = rx.try_recv() {
            return msg.to_string();
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("no message received");
}

async fn wait_for_requests(script: &Script, count: usize) -> Vec<String> {
    for _ in 0..400 {
        let requests = script.requests();
        if requests.len() >= count {
            return requests;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} requests, saw {:?}", script.requests());
}

fn wire(kind: &str, name: &str) -> String {
    format!(r#"{{"event":"{kind}","pod":"{name}","namespace":"default"}}"#)
}

#[tokio::test]
async fn list_then_watch_events_reach_subscribers() {
    let script = Script::default()
        .list(200, pod_list("100", vec![pod("p1", "100")]))
        .watch(vec![
            watch_event("ADDED", pod("p2", "101")),
            watch_event("MODIFIED", pod("p1", "102")),
            watch_event("DELETED", pod("p2", "103")),
            watch_event("BOOKMARK", json!({"metadata": {"resourceVersion": "104"}})),
        ]);
    let server = script.clone().start().await;
    let (trigger, shutdown) = shutdown::channel();
    let (relay, rx) = relay_with_subscriber();

    let handle = relay
        .subscribe(watcher(&server, shutdown))
        .await
        .expect("subscribe");

    assert_eq!(next_message(&rx).await, wire("ADDED", "p1"));
    assert_eq!(next_message(&rx).await, wire("ADDED", "p2"));
    assert_eq!(next_message(&rx).await, wire("UPDATED", "p1"));
    assert_eq!(next_message(&rx).await, wire("DELETED", "p2"));

    let requests = wait_for_requests(&script, 3).await;
    assert_eq!(requests[0], "/api/v1/pods");
    assert!(requests[1].contains("resourceVersion=100"), "{}", requests[1]);
    assert!(requests[2].contains("resourceVersion=104"), "{}", requests[2]);

    trigger.trigger();
    timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("watch stops on shutdown");
}

#[tokio::test]
async fn initial_list_failure_is_fatal() {
    let script = Script::default().list(
        403,
        json!({"kind": "Status", "code": 403, "message": "pods is forbidden"}),
    );
    let server = script.start().await;
    let (_trigger, shutdown) = shutdown::channel();
    let (relay, _rx) = relay_with_subscriber();

    match relay.subscribe(watcher(&server, shutdown)).await {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 403);
            assert!(message.contains("forbidden"));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("subscribe should fail"),
    }
}

#[tokio::test]
async fn expired_version_triggers_relist() {
    let script = Script::default()
        .list(200, pod_list("10", vec![pod("p1", "5"), pod("p2", "6")]))
        .list(200, pod_list("20", vec![pod("p1", "15"), pod("p3", "18")]))
        .watch(vec![watch_event(
            "ERROR",
            json!({"kind": "Status", "code": 410, "reason": "Expired", "message": "too old resource version"}),
        )]);
    let server = script.clone().start().await;
    let (trigger, shutdown) = shutdown::channel();
    let (relay, rx) = relay_with_subscriber();

    let handle = relay
        .subscribe(watcher(&server, shutdown))
        .await
        .expect("subscribe");

    assert_eq!(next_message(&rx).await, wire("ADDED", "p1"));
    assert_eq!(next_message(&rx).await, wire("ADDED", "p2"));
    assert_eq!(next_message(&rx).await, wire("UPDATED", "p1"));
    assert_eq!(next_message(&rx).await, wire("ADDED", "p3"));
    assert_eq!(next_message(&rx).await, wire("DELETED", "p2"));

    let requests = wait_for_requests(&script, 4).await;
    assert_eq!(requests[2], "/api/v1/pods");
    assert!(requests[3].contains("resourceVersion=20"), "{}", requests[3]);

    trigger.trigger();
    timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("watch stops on shutdown");
}

#[tokio::test]
async fn malformed_watch_lines_are_skipped() {
    let script = Script::default()
        .list(200, pod_list("1", vec![]))
        .watch(vec![
            json!({"type": "ADDED"}),
            watch_event("ADDED", json!({"metadata": {"name": "orphan"}})),
            watch_event("ADDED", pod("ok", "2")),
        ]);
    let server = script.clone().start().await;
    let (trigger, shutdown) = shutdown::channel();
    let (relay, rx) = relay_with_subscriber();

    let handle = relay
        .subscribe(watcher(&server, shutdown))
        .await
        .expect("subscribe");

    assert_eq!(next_message(&rx).await, wire("ADDED", "ok"));
    assert!(rx.try_recv().is_err());

    trigger.trigger();
    timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("watch stops on shutdown");
}

#[tokio::test]
async fn failed_watch_retries_with_relist() {
    let script = Script::default()
        .list(200, pod_list("1", vec![pod("p1", "1"), pod("p2", "1")]))
        .list(200, pod_list("2", vec![pod("p1", "5")]))
        .fail_watch(
            500,
            json!({"kind": "Status", "code": 500, "message": "etcd unavailable"}),
        );
    let server = script.clone().start().await;
    let (trigger, shutdown) = shutdown::channel();
    let (relay, rx) = relay_with_subscriber();

    let handle = relay
        .subscribe(watcher(&server, shutdown))
        .await
        .expect("subscribe");

    assert_eq!(next_message(&rx).await, wire("ADDED", "p1"));
    assert_eq!(next_message(&rx).await, wire("ADDED", "p2"));
    assert_eq!(next_message(&rx).await, wire("UPDATED", "p1"));
    assert_eq!(next_message(&rx).await, wire("DELETED", "p2"));

    let requests = wait_for_requests(&script, 4).await;
    assert_eq!(requests[0], "/api/v1/pods");
    assert!(requests[1].contains("resourceVersion=1"), "{}", requests[1]);
    assert_eq!(requests[2], "/api/v1/pods");
    assert!(requests[3].contains("resourceVersion=2"), "{}", requests[3]);

    trigger.trigger();
    timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("watch stops on shutdown");
}

#[tokio::test]
async fn ended_stream_rewatches_from_last_version() {
    let script = Script::default()
        .list(200, pod_list("1", vec![pod("p1", "1")]))
        .watch(vec![watch_event("MODIFIED", pod("p1", "7"))]);
    let server = script.clone().start().await;
    let (trigger, shutdown) = shutdown::channel();
    let (relay, rx) = relay_with_subscriber();

    let handle = relay
        .subscribe(watcher(&server, shutdown))
        .await
        .expect("subscribe");

    assert_eq!(next_message(&rx).await, wire("ADDED", "p1"));
    assert_eq!(next_message(&rx).await, wire("UPDATED", "p1"));

    let requests = wait_for_requests(&script, 3).await;
    assert!(requests[1].contains("resourceVersion=1"), "{}", requests[1]);
    assert!(requests[2].contains("watch=true"), "{}", requests[2]);
    assert!(requests[2].contains("resourceVersion=7"), "{}", requests[2]);

    // A clean end of stream resumes the watch without listing again.
    sleep(Duration::from_millis(100)).await;
    let lists = script
        .requests()
        .iter()
        .filter(|target| !target.contains("watch=true"))
        .count();
    assert_eq!(lists, 1);
    assert!(rx.try_recv().is_err());

    trigger.trigger();
    timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("watch stops on shutdown");
}
