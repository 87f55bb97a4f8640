//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use farmlink::command::{BrokerLink, CommandPublisher, LinkError, LinkEvent};
use farmlink::relay::{StreamConnection, StreamSource};
use farmlink::{RelayError, TelemetryError, TelemetrySink};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A PNG of random-looking pixels so it never compresses below the size floor.
pub fn noisy_png(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed ^ 0x2545_f491;
    let img = image::RgbImage::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [r, g, b, _] = state.to_le_bytes();
        image::Rgb([r, g, b])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Base64 text of a valid frame, as the camera bridge would send it.
pub fn frame_payload(width: u32, height: u32, seed: u32) -> Vec<u8> {
    STANDARD.encode(noisy_png(width, height, seed)).into_bytes()
}

/// Base64 text that decodes to `len` bytes, too small to be an image.
pub fn undersized_payload(len: usize) -> Vec<u8> {
    STANDARD.encode(vec![0xAB; len]).into_bytes()
}

// ---------------------------------------------------------------------------
// Relay stream source
// ---------------------------------------------------------------------------

/// One scripted step of a stream connection.
#[derive(Debug, Clone)]
pub enum Step {
    Payload(Vec<u8>),
    /// Peer closes the connection
    Close,
    /// Transport error
    Fail,
}

/// Serves one scripted session per successful connect. Connect attempts
/// beyond the script fail. Every attempt's instant is recorded.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    sessions: Arc<Mutex<VecDeque<Vec<Step>>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedSource {
    pub fn new(sessions: Vec<Vec<Step>>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(sessions.into())),
            attempts: Arc::default(),
        }
    }

    /// Source whose every connect attempt fails.
    pub fn unreachable() -> Self {
        Self::new(Vec::new())
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    fn address(&self) -> &str {
        "scripted://camera"
    }

    async fn connect(&self) -> Result<Box<dyn StreamConnection>, RelayError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let session = self.sessions.lock().unwrap().pop_front();
        match session {
            Some(steps) => Ok(Box::new(ScriptedConnection {
                steps: steps.into(),
            })),
            None => Err(RelayError::Transport("connection refused".to_string())),
        }
    }
}

/// Plays back steps, then stays silent forever.
pub struct ScriptedConnection {
    steps: VecDeque<Step>,
}

#[async_trait]
impl StreamConnection for ScriptedConnection {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        match self.steps.pop_front() {
            Some(Step::Payload(payload)) => Ok(Some(payload)),
            Some(Step::Close) => Ok(None),
            Some(Step::Fail) => Err(RelayError::Transport("connection reset".to_string())),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Serves one connection that signals right before handing out `payload`,
/// then stays silent. Lets a test act while the relay is mid-decode.
pub struct GatedSource {
    payload: Mutex<Option<Vec<u8>>>,
    handed_out: Mutex<Option<oneshot::Sender<()>>>,
}

impl GatedSource {
    pub fn new(payload: Vec<u8>) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let source = Self {
            payload: Mutex::new(Some(payload)),
            handed_out: Mutex::new(Some(tx)),
        };
        (Arc::new(source), rx)
    }
}

#[async_trait]
impl StreamSource for GatedSource {
    fn address(&self) -> &str {
        "gated://camera"
    }

    async fn connect(&self) -> Result<Box<dyn StreamConnection>, RelayError> {
        let payload = self.payload.lock().unwrap().take();
        let signal = self.handed_out.lock().unwrap().take();
        Ok(Box::new(GatedConnection { payload, signal }))
    }
}

struct GatedConnection {
    payload: Option<Vec<u8>>,
    signal: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl StreamConnection for GatedConnection {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        match self.payload.take() {
            Some(payload) => {
                if let Some(signal) = self.signal.take() {
                    let _ = signal.send(());
                }
                Ok(Some(payload))
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Differences between consecutive instants, in whole seconds.
pub fn gaps_secs(instants: &[Instant]) -> Vec<u64> {
    instants
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect()
}

// ---------------------------------------------------------------------------
// Broker transport
// ---------------------------------------------------------------------------

/// Broker link that replays scripted events, recording when each poll starts.
/// Once the script is exhausted `poll` never completes.
#[derive(Clone, Default)]
pub struct ScriptedLink {
    events: Arc<Mutex<VecDeque<Result<LinkEvent, LinkError>>>>,
    polls: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedLink {
    pub fn new(events: Vec<Result<LinkEvent, LinkError>>) -> Self {
        Self {
            events: Arc::new(Mutex::new(events.into())),
            polls: Arc::default(),
        }
    }

    pub fn push(&self, event: Result<LinkEvent, LinkError>) {
        self.events.lock().unwrap().push_back(event);
    }

    pub fn polls(&self) -> Vec<Instant> {
        self.polls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerLink for ScriptedLink {
    async fn poll(&mut self) -> Result<LinkEvent, LinkError> {
        self.polls.lock().unwrap().push(Instant::now());
        let next = self.events.lock().unwrap().pop_front();
        match next {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

pub fn connection_lost() -> Result<LinkEvent, LinkError> {
    Err(LinkError::Connection("connection reset by peer".to_string()))
}

/// Records publishes instead of sending them.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Value)>>,
    disconnects: Mutex<u32>,
    reject: bool,
}

impl RecordingPublisher {
    /// Publisher whose request queue is always full.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> u32 {
        *self.disconnects.lock().unwrap()
    }
}

impl CommandPublisher for RecordingPublisher {
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        if self.reject {
            return Err(LinkError::Publish("request queue full".to_string()));
        }
        let payload = serde_json::from_slice(&payload).unwrap();
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    fn disconnect(&self) {
        *self.disconnects.lock().unwrap() += 1;
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Forwards every reading to a channel; optionally fails after recording
/// or takes a while to answer first.
pub struct RecordingSink {
    tx: mpsc::UnboundedSender<Value>,
    fail: bool,
    latency: Duration,
}

impl RecordingSink {
    fn build(fail: bool, latency: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, fail, latency }), rx)
    }

    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        Self::build(false, Duration::ZERO)
    }

    pub fn failing() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        Self::build(true, Duration::ZERO)
    }

    /// Records each reading only after `latency` has passed.
    pub fn slow(latency: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        Self::build(false, latency)
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn send(&self, values: Value) -> Result<(), TelemetryError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let _ = self.tx.send(values);
        if self.fail {
            return Err(TelemetryError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP stub
// ---------------------------------------------------------------------------

/// One request seen by the stub server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Minimal HTTP/1.1 server answering every request with the same response.
pub struct HttpStub {
    pub address: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpStub {
    pub async fn start(status: u16, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let body = body.to_string();

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let Some(request) = read_request(&mut socket).await else {
                    continue;
                };
                recorded.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { address, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.address)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until at least `count` requests arrived.
    pub async fn wait_for(&self, count: usize) -> Vec<RecordedRequest> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let requests = self.requests();
            if requests.len() >= count || Instant::now() > deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&chunk[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while data.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&data[head_end..]).to_string();

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}
