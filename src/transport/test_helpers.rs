//! Test doubles for the transport's collaborators
// (c) 2025 Ross Younger

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use super::{
    AuthDelegate, AuthObserver, AuthState, ChangedReason, Collaborators, EventTracer,
    MessageConsumer, PostConnect, PostConnectFactory, PostConnectHandle, Transport, TransportObserver,
    TransportState,
};
use crate::{
    config::Configuration,
    message::{
        pipe, AttachmentReader as _, AttachmentWriter, MessageRequest, MessageRequestObserver,
        MessageStatus, PipeReader, ReadStatus,
    },
    stream::{
        Connection, FinishedStatus, ReceiveStatus, RequestConfig, RequestHandle, RequestId,
        RequestKind, RequestSource, ResponseSink, SendStatus,
    },
};

/// Lets the transport task run until it has nothing left to do, without moving the clock
pub(super) async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub(super) fn test_config() -> Configuration {
    Configuration {
        endpoint: "https://test.invalid".into(),
        ..Configuration::system_default().clone()
    }
}

pub(super) const TOKEN: &str = "T0KEN";

// CONNECTION ///////////////////////////////////////////////////////////////////////////

/// One request the transport asked the connection to make
pub(super) struct MockRequest {
    pub(super) id: RequestId,
    pub(super) kind: RequestKind,
    pub(super) url: String,
    pub(super) headers: Vec<String>,
    pub(super) connection_timeout: Option<Duration>,
    pub(super) transfer_timeout: Option<Duration>,
    pub(super) activity_timeout: Option<Duration>,
    source: Mutex<Box<dyn RequestSource>>,
    sink: Mutex<Box<dyn ResponseSink>>,
    body: Mutex<Vec<u8>>,
    finished: AtomicBool,
    cancelled: AtomicBool,
}

impl MockRequest {
    pub(super) fn respond(&self, code: i32) -> bool {
        self.sink.lock().unwrap().on_receive_response_code(code)
    }

    pub(super) fn header(&self, line: &str) -> bool {
        self.sink.lock().unwrap().on_receive_header_line(line)
    }

    pub(super) fn data(&self, data: &[u8]) -> ReceiveStatus {
        self.sink.lock().unwrap().on_receive_data(data)
    }

    /// Ends the request. Only the first call has any effect, as with a real connection.
    pub(super) fn finish(&self, status: FinishedStatus) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.sink.lock().unwrap().on_response_finished(status);
        }
    }

    /// Response code and a complete, empty body
    pub(super) fn reply(&self, code: i32) {
        let _ = self.respond(code);
        self.finish(FinishedStatus::Complete);
    }

    pub(super) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub(super) fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Pulls from the request source until it stops producing data.
    /// Returns why it stopped; the bytes accumulate in [`body`](Self::body).
    pub(super) fn pump_body(&self) -> SendStatus {
        let mut source = self.source.lock().unwrap();
        let mut buf = [0u8; 7];
        loop {
            let result = source.on_send_data(&mut buf);
            if result.status != SendStatus::Continue {
                return result.status;
            }
            assert!(result.size > 0, "zero-length CONTINUE");
            self.body
                .lock()
                .unwrap()
                .extend_from_slice(&buf[..result.size]);
        }
    }

    pub(super) fn body(&self) -> String {
        String::from_utf8_lossy(&self.body.lock().unwrap()).into_owned()
    }

    pub(super) fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find_map(|h| h.strip_prefix("Content-Type: "))
    }
}

impl RequestHandle for MockRequest {
    fn id(&self) -> &RequestId {
        &self.id
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.finish(FinishedStatus::Cancelled);
    }
}

#[derive(Default)]
pub(super) struct MockConnection {
    requests: Mutex<Vec<Arc<MockRequest>>>,
    disconnects: AtomicUsize,
    refuse: AtomicBool,
}

impl MockConnection {
    pub(super) fn requests_of(&self, kind: RequestKind) -> Vec<Arc<MockRequest>> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub(super) fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The `nth` request of this kind (zero-based). Panics if there is none.
    pub(super) fn request(&self, kind: RequestKind, nth: usize) -> Arc<MockRequest> {
        self.requests_of(kind)
            .get(nth)
            .cloned()
            .unwrap_or_else(|| panic!("no {kind} request #{nth}"))
    }

    /// Requests of this kind that have not yet finished
    pub(super) fn open(&self, kind: RequestKind) -> usize {
        self.requests_of(kind)
            .iter()
            .filter(|r| !r.is_finished())
            .count()
    }

    pub(super) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(super) fn refuse_requests(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connection for MockConnection {
    fn create_and_send_request(&self, config: RequestConfig) -> Option<Arc<dyn RequestHandle>> {
        if self.refuse.load(Ordering::SeqCst) {
            return None;
        }
        let RequestConfig {
            id,
            kind,
            url,
            mut source,
            sink,
            connection_timeout,
            transfer_timeout,
            activity_timeout,
        } = config;
        let request = Arc::new(MockRequest {
            id,
            kind,
            url,
            headers: source.header_lines(),
            connection_timeout,
            transfer_timeout,
            activity_timeout,
            source: Mutex::new(source),
            sink: Mutex::new(sink),
            body: Mutex::default(),
            finished: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        });
        self.requests.lock().unwrap().push(request.clone());
        Some(request)
    }

    fn disconnect(&self) {
        let _ = self.disconnects.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.requests.lock().unwrap().clone();
        for request in outstanding {
            request.finish(FinishedStatus::Cancelled);
        }
    }
}

// AUTH /////////////////////////////////////////////////////////////////////////////////

pub(super) struct MockAuth {
    current: Mutex<(AuthState, String)>,
    observers: Mutex<Vec<Arc<dyn AuthObserver>>>,
    failures: Mutex<Vec<String>>,
}

impl MockAuth {
    pub(super) fn new(state: AuthState, token: &str) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new((state, token.to_owned())),
            observers: Mutex::default(),
            failures: Mutex::default(),
        })
    }

    pub(super) fn refreshed() -> Arc<Self> {
        Self::new(AuthState::Refreshed, TOKEN)
    }

    /// Changes the credential and tells every observer
    pub(super) fn set(&self, state: AuthState, token: &str) {
        *self.current.lock().unwrap() = (state, token.to_owned());
        let observers = self.observers.lock().unwrap().clone();
        for o in observers {
            o.on_auth_state_change(state);
        }
    }

    pub(super) fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    pub(super) fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

impl AuthDelegate for MockAuth {
    fn add_auth_observer(&self, observer: Arc<dyn AuthObserver>) {
        let state = self.current.lock().unwrap().0;
        self.observers.lock().unwrap().push(observer.clone());
        observer.on_auth_state_change(state);
    }

    fn remove_auth_observer(&self, observer: &Arc<dyn AuthObserver>) {
        self.observers
            .lock()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    fn auth_token(&self) -> String {
        self.current.lock().unwrap().1.clone()
    }

    fn on_auth_failure(&self, token: &str) {
        self.failures.lock().unwrap().push(token.to_owned());
    }
}

// OBSERVERS ////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
pub(super) struct RecordingObserver(Mutex<Vec<String>>);

impl RecordingObserver {
    pub(super) fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl TransportObserver for RecordingObserver {
    fn on_connected(&self) {
        self.0.lock().unwrap().push("connected".into());
    }
    fn on_disconnected(&self, reason: ChangedReason) {
        self.0.lock().unwrap().push(format!("disconnected:{reason}"));
    }
    fn on_server_side_disconnect(&self) {
        self.0.lock().unwrap().push("server_side_disconnect".into());
    }
}

/// Records everything a message's observer is told
#[derive(Default)]
pub(super) struct Outcome {
    statuses: Mutex<Vec<MessageStatus>>,
    log: Mutex<Vec<String>>,
}

impl Outcome {
    pub(super) fn statuses(&self) -> Vec<MessageStatus> {
        self.statuses.lock().unwrap().clone()
    }

    /// The single terminal status. Panics unless exactly one was reported.
    pub(super) fn status(&self) -> MessageStatus {
        let statuses = self.statuses();
        assert_eq!(statuses.len(), 1, "expected exactly one status: {statuses:?}");
        statuses[0]
    }

    pub(super) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl MessageRequestObserver for Outcome {
    fn on_send_completed(&self, status: MessageStatus) {
        self.statuses.lock().unwrap().push(status);
        self.log.lock().unwrap().push(status.to_string());
    }
    fn on_exception_received(&self, message: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("exception:{message}"));
    }
}

pub(super) fn message(json: &str) -> (MessageRequest, Arc<Outcome>) {
    let outcome = Arc::new(Outcome::default());
    (
        MessageRequest::new(json).with_observer(outcome.clone()),
        outcome,
    )
}

#[derive(Default)]
pub(super) struct RecordingConsumer {
    messages: Mutex<Vec<(String, String)>>,
    attachments: Mutex<Vec<(String, String, PipeReader)>>,
}

impl RecordingConsumer {
    pub(super) fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    /// Every attachment begun so far, with whatever has been written to it.
    /// The flag says whether the attachment was closed cleanly.
    pub(super) fn attachments(&self) -> Vec<(String, String, Vec<u8>, bool)> {
        let mut attachments = self.attachments.lock().unwrap();
        attachments
            .iter_mut()
            .map(|(context_id, content_id, reader)| {
                let mut data = Vec::new();
                let mut buf = [0u8; 64];
                let closed = loop {
                    match reader.read(&mut buf) {
                        ReadStatus::Data(n) => data.extend_from_slice(&buf[..n]),
                        ReadStatus::Closed => break true,
                        ReadStatus::WouldBlock | ReadStatus::Error(_) => break false,
                    }
                };
                (context_id.clone(), content_id.clone(), data, closed)
            })
            .collect()
    }
}

impl MessageConsumer for RecordingConsumer {
    fn consume_message(&self, context_id: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((context_id.to_owned(), message.to_owned()));
    }
    fn begin_attachment(&self, context_id: &str, content_id: &str) -> Option<AttachmentWriter> {
        let (writer, reader) = pipe();
        self.attachments
            .lock()
            .unwrap()
            .push((context_id.to_owned(), content_id.to_owned(), reader));
        Some(writer)
    }
}

#[derive(Default)]
pub(super) struct RecordingTracer {
    traced: Mutex<Vec<String>>,
}

impl RecordingTracer {
    pub(super) fn traced(&self) -> Vec<String> {
        self.traced.lock().unwrap().clone()
    }
}

impl EventTracer for RecordingTracer {
    fn trace_event(&self, json: &str) {
        self.traced.lock().unwrap().push(json.to_owned());
    }
}

// POST-CONNECT /////////////////////////////////////////////////////////////////////////

/// What each post-connect handshake does when started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Script {
    /// Reports success straight away
    Succeed,
    /// Waits for the test to drive its handle
    Hold,
    /// `do_post_connect` returns false
    Refuse,
    /// The factory cannot create a handshake
    Unavailable,
}

#[derive(Default)]
pub(super) struct PostConnectLog {
    handles: Mutex<Vec<PostConnectHandle>>,
    disconnects: AtomicUsize,
}

pub(super) struct ScriptedFactory {
    script: Script,
    log: Arc<PostConnectLog>,
}

impl ScriptedFactory {
    pub(super) fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            log: Arc::default(),
        })
    }

    /// The handle given to the `nth` handshake
    pub(super) fn handle(&self, nth: usize) -> PostConnectHandle {
        self.log.handles.lock().unwrap()[nth].clone()
    }

    pub(super) fn started(&self) -> usize {
        self.log.handles.lock().unwrap().len()
    }

    pub(super) fn disconnects(&self) -> usize {
        self.log.disconnects.load(Ordering::SeqCst)
    }
}

struct ScriptedPostConnect {
    script: Script,
    log: Arc<PostConnectLog>,
}

impl PostConnect for ScriptedPostConnect {
    fn do_post_connect(&mut self, transport: PostConnectHandle) -> bool {
        self.log.handles.lock().unwrap().push(transport.clone());
        match self.script {
            Script::Succeed => {
                transport.on_post_connected();
                true
            }
            Script::Hold => true,
            Script::Refuse | Script::Unavailable => false,
        }
    }

    fn on_disconnect(&mut self) {
        let _ = self.log.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl PostConnectFactory for ScriptedFactory {
    fn create_post_connect(&self) -> Option<Box<dyn PostConnect>> {
        if self.script == Script::Unavailable {
            return None;
        }
        Some(Box::new(ScriptedPostConnect {
            script: self.script,
            log: self.log.clone(),
        }))
    }
}

// HARNESS //////////////////////////////////////////////////////////////////////////////

pub(super) struct Harness {
    pub(super) transport: Transport,
    pub(super) connection: Arc<MockConnection>,
    pub(super) auth: Arc<MockAuth>,
    pub(super) consumer: Arc<RecordingConsumer>,
    pub(super) tracer: Arc<RecordingTracer>,
    pub(super) post_connect: Arc<ScriptedFactory>,
    pub(super) observer: Arc<RecordingObserver>,
}

impl Harness {
    pub(super) fn new(config: &Configuration, auth: Arc<MockAuth>, script: Script) -> Self {
        let connection = Arc::new(MockConnection::default());
        let consumer = Arc::new(RecordingConsumer::default());
        let tracer = Arc::new(RecordingTracer::default());
        let post_connect = ScriptedFactory::new(script);
        let transport = Transport::create(
            config,
            Collaborators {
                connection: connection.clone(),
                auth: auth.clone(),
                consumer: consumer.clone(),
                post_connect: post_connect.clone(),
                event_tracer: Some(tracer.clone()),
            },
        )
        .unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let _ = transport.add_observer(observer.clone());
        Self {
            transport,
            connection,
            auth,
            consumer,
            tracer,
            post_connect,
            observer,
        }
    }

    pub(super) fn with_config(config: &Configuration) -> Self {
        Self::new(config, MockAuth::refreshed(), Script::Succeed)
    }

    pub(super) fn standard() -> Self {
        Self::with_config(&test_config())
    }

    /// Connects, answers the downchannel with 200 and returns it
    pub(super) async fn connected(&self) -> Arc<MockRequest> {
        self.transport.connect().unwrap();
        settle().await;
        let downchannel = self
            .connection
            .requests_of(RequestKind::Downchannel)
            .last()
            .cloned()
            .expect("downchannel requested");
        assert!(downchannel.respond(200));
        settle().await;
        assert_eq!(self.transport.state(), TransportState::Connected);
        downchannel
    }
}
