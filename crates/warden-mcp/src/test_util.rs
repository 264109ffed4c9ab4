//! In-process mock transport for client and manager tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RpcErrorBody};
use crate::transport::Transport;

type MakeResult = Arc<dyn Fn(&JsonRpcRequest) -> Value + Send + Sync>;

enum Mode {
    /// Never answer; callers stay parked.
    Hold,
    /// Answer each request immediately.
    Respond(MakeResult),
    /// Answer each request with a JSON-RPC error.
    Fail { code: i64, message: String },
    /// Buffer `expect` requests, then answer them in reverse order.
    ReverseBatch {
        expect: usize,
        buffered: Vec<JsonRpcRequest>,
        make: MakeResult,
    },
}

struct Inner {
    mode: Mode,
    sent: Vec<JsonRpcMessage>,
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
}

/// Control half of the mock: scripts responses, inspects sent frames.
#[derive(Clone)]
pub(crate) struct MockServer {
    inner: Arc<Mutex<Inner>>,
}

/// Transport half handed to the client under test.
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Inner>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
    closed: std::sync::atomic::AtomicBool,
}

impl MockServer {
    pub(crate) fn start() -> (Self, Arc<dyn Transport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(Inner {
            mode: Mode::Hold,
            sent: Vec::new(),
            outbound: tx,
        }));
        let server = Self {
            inner: Arc::clone(&inner),
        };
        let transport = MockTransport {
            inner,
            receiver: tokio::sync::Mutex::new(rx),
            closed: std::sync::atomic::AtomicBool::new(false),
        };
        (server, Arc::new(transport))
    }

    pub(crate) fn respond_with(
        &self,
        make: impl Fn(&JsonRpcRequest) -> Value + Send + Sync + 'static,
    ) {
        self.lock().mode = Mode::Respond(Arc::new(make));
    }

    pub(crate) fn respond_reversed(
        &self,
        expect: usize,
        make: impl Fn(&JsonRpcRequest) -> Value + Send + Sync + 'static,
    ) {
        self.lock().mode = Mode::ReverseBatch {
            expect,
            buffered: Vec::new(),
            make: Arc::new(make),
        };
    }

    pub(crate) fn fail_with(&self, code: i64, message: &str) {
        self.lock().mode = Mode::Fail {
            code,
            message: message.to_string(),
        };
    }

    pub(crate) fn hold_responses(&self) {
        self.lock().mode = Mode::Hold;
    }

    pub(crate) fn sent_frames(&self) -> Vec<JsonRpcMessage> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn response_for(request: &JsonRpcRequest, make: &MakeResult) -> JsonRpcMessage {
    JsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: crate::protocol::JSONRPC_VERSION.to_string(),
        id: request.id,
        result: Some(make(request)),
        error: None,
    })
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, message: &JsonRpcMessage) -> McpResult<()> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(McpError::Closed);
        }
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let inner = &mut *guard;
        inner.sent.push(message.clone());

        let JsonRpcMessage::Request(request) = message else {
            return Ok(());
        };

        match &mut inner.mode {
            Mode::Hold => {},
            Mode::Respond(make) => {
                let frame = response_for(request, &Arc::clone(make));
                let _ = inner.outbound.send(frame);
            },
            Mode::Fail { code, message } => {
                let frame = JsonRpcMessage::Response(JsonRpcResponse {
                    jsonrpc: crate::protocol::JSONRPC_VERSION.to_string(),
                    id: request.id,
                    result: None,
                    error: Some(RpcErrorBody {
                        code: *code,
                        message: message.clone(),
                        data: None,
                    }),
                });
                let _ = inner.outbound.send(frame);
            },
            Mode::ReverseBatch {
                expect,
                buffered,
                make,
            } => {
                buffered.push(request.clone());
                if buffered.len() == *expect {
                    let make = Arc::clone(make);
                    let batch: Vec<JsonRpcRequest> = buffered.drain(..).rev().collect();
                    for buffered_request in &batch {
                        let frame = response_for(buffered_request, &make);
                        let _ = inner.outbound.send(frame);
                    }
                }
            },
        }
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> McpResult<JsonRpcMessage> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            () = cancel.cancelled() => Err(McpError::Canceled),
            frame = receiver.recv() => frame.ok_or(McpError::Closed),
        }
    }

    async fn close(&self) {
        self.closed
            .store(true, std::sync::atomic::Ordering::Release);
    }
}
