//! Call state machine and caller-side handles.
//!
//! Every streaming call tracks a shared three-state machine:
//!
//! ```text
//! Open ──close_send──▶ SendHalfClosed ──outcome──▶ Terminal
//!   └────────────────────outcome────────────────────▲
//! ```
//!
//! The machine only moves forward. Sends are rejected outside `Open`,
//! receives replay the terminal outcome once it is known, and a forced
//! abort (deadline, cancellation) jumps straight to `Terminal` from
//! either live state.
use crate::deadline::CallMonitor;
use crate::error::RpcError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tonic::{Code, Status, Streaming};

/// Capacity of the outbound request channel per call.
pub(crate) const OUTBOUND_BUFFER: usize = 16;

/// Lifecycle state of one call, shared by every handle onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Both directions live.
    Open = 0,
    /// The caller finished sending; responses may still arrive.
    SendHalfClosed = 1,
    /// The call is over; its outcome never changes afterwards.
    Terminal = 2,
}

/// How a call ended.
#[derive(Debug, Clone)]
pub enum TerminalOutcome {
    /// The callee completed the response stream normally.
    Success,
    /// The callee failed the call with a status.
    Error(Status),
    Cancelled,
    DeadlineExceeded,
}

impl TerminalOutcome {
    pub(crate) fn from_status(status: Status) -> Self {
        match status.code() {
            Code::Cancelled => TerminalOutcome::Cancelled,
            Code::DeadlineExceeded => TerminalOutcome::DeadlineExceeded,
            _ => TerminalOutcome::Error(status),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminalOutcome::Success)
    }

    /// The error this outcome carries, if any.
    pub fn into_error(self) -> Option<RpcError> {
        match self {
            TerminalOutcome::Success => None,
            TerminalOutcome::Error(status) => Some(RpcError::from(status)),
            TerminalOutcome::Cancelled => Some(RpcError::Cancelled),
            TerminalOutcome::DeadlineExceeded => Some(RpcError::DeadlineExceeded),
        }
    }
}

/// One receive step on a streaming call.
#[derive(Debug)]
pub enum Received<T> {
    /// The next response message.
    Message(T),
    /// The call is over. Repeated receives keep returning this.
    Terminal(TerminalOutcome),
}

/// The state word shared by every handle onto one call.
#[derive(Debug)]
pub(crate) struct CallShared {
    state: AtomicU8,
}

impl CallShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(CallState::Open as u8),
        })
    }

    pub(crate) fn state(&self) -> CallState {
        match self.state.load(Ordering::SeqCst) {
            0 => CallState::Open,
            1 => CallState::SendHalfClosed,
            _ => CallState::Terminal,
        }
    }

    /// Advances the machine; it never moves backwards, so a stale handle
    /// cannot reopen a finished call.
    pub(crate) fn advance(&self, to: CallState) {
        self.state.fetch_max(to as u8, Ordering::SeqCst);
    }
}

/// Caller-side sending half of a streaming call.
///
/// Clones share the same state machine: half-closing through any clone
/// rejects sends on all of them, while the transport-level end-of-stream
/// is signalled once the last clone drops its channel slot.
#[derive(Debug)]
pub struct CallSender<Req> {
    tx: Option<mpsc::Sender<Req>>,
    shared: Arc<CallShared>,
    monitor: CallMonitor,
}

impl<Req> Clone for CallSender<Req> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
            monitor: self.monitor.clone(),
        }
    }
}

impl<Req> CallSender<Req> {
    pub(crate) fn new(
        tx: mpsc::Sender<Req>,
        shared: Arc<CallShared>,
        monitor: CallMonitor,
    ) -> Self {
        Self {
            tx: Some(tx),
            shared,
            monitor,
        }
    }

    /// Queues one request message. Applies backpressure when the outbound
    /// buffer is full; a send blocked that way still aborts when the call's
    /// deadline expires or its cancel signal fires.
    pub async fn send(&self, request: Req) -> Result<(), RpcError> {
        match self.shared.state() {
            CallState::Open => {}
            CallState::SendHalfClosed => {
                return Err(RpcError::InvalidCallState("send after half-close"));
            }
            CallState::Terminal => {
                return Err(RpcError::InvalidCallState("send on terminated call"));
            }
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or(RpcError::InvalidCallState("send after half-close"))?;
        let mut monitor = self.monitor.clone();
        tokio::select! {
            forced = monitor.aborted() => {
                self.shared.advance(CallState::Terminal);
                match forced {
                    TerminalOutcome::DeadlineExceeded => Err(RpcError::DeadlineExceeded),
                    _ => Err(RpcError::Cancelled),
                }
            }
            sent = tx.send(request) => sent
                .map_err(|_| RpcError::Channel("outbound direction closed by transport".into())),
        }
    }

    /// Declares the request stream finished. Idempotent. The callee sees
    /// end-of-stream once every clone has half-closed or dropped.
    pub fn close_send(&mut self) {
        self.shared.advance(CallState::SendHalfClosed);
        self.tx = None;
    }

    pub fn state(&self) -> CallState {
        self.shared.state()
    }
}

/// Caller-side receiving half of a streaming call.
pub struct CallReceiver<Res> {
    inbound: Streaming<Res>,
    monitor: CallMonitor,
    shared: Arc<CallShared>,
    terminal: Option<TerminalOutcome>,
}

impl<Res> CallReceiver<Res> {
    pub(crate) fn new(inbound: Streaming<Res>, monitor: CallMonitor, shared: Arc<CallShared>) -> Self {
        Self {
            inbound,
            monitor,
            shared,
            terminal: None,
        }
    }

    /// Waits for the next response or the end of the call.
    ///
    /// Once terminal, every further call replays the same outcome.
    pub async fn recv(&mut self) -> Received<Res> {
        if let Some(outcome) = &self.terminal {
            return Received::Terminal(outcome.clone());
        }
        let outcome = tokio::select! {
            forced = self.monitor.aborted() => forced,
            next = self.inbound.message() => match next {
                Ok(Some(message)) => return Received::Message(message),
                Ok(None) => TerminalOutcome::Success,
                Err(status) => TerminalOutcome::from_status(status),
            },
        };
        self.shared.advance(CallState::Terminal);
        self.terminal = Some(outcome.clone());
        Received::Terminal(outcome)
    }

    /// Drains the stream to completion.
    pub async fn collect(mut self) -> (Vec<Res>, TerminalOutcome) {
        let mut messages = Vec::new();
        loop {
            match self.recv().await {
                Received::Message(message) => messages.push(message),
                Received::Terminal(outcome) => return (messages, outcome),
            }
        }
    }

    /// The terminal outcome, once observed through [`recv`](Self::recv).
    pub fn terminal(&self) -> Option<&TerminalOutcome> {
        self.terminal.as_ref()
    }
}

/// A bidirectional streaming call: both halves in one handle.
pub struct BidiCall<Req, Res> {
    sender: CallSender<Req>,
    receiver: CallReceiver<Res>,
}

impl<Req, Res> BidiCall<Req, Res> {
    pub(crate) fn new(sender: CallSender<Req>, receiver: CallReceiver<Res>) -> Self {
        Self { sender, receiver }
    }

    pub async fn send(&self, request: Req) -> Result<(), RpcError> {
        self.sender.send(request).await
    }

    pub fn close_send(&mut self) {
        self.sender.close_send();
    }

    pub async fn recv(&mut self) -> Received<Res> {
        self.receiver.recv().await
    }

    pub fn state(&self) -> CallState {
        self.sender.state()
    }

    /// Splits into independent halves so sends and receives can proceed
    /// from different tasks.
    pub fn split(self) -> (CallSender<Req>, CallReceiver<Res>) {
        (self.sender, self.receiver)
    }
}

pub(crate) type ResponseFuture<Res> =
    Pin<Box<dyn Future<Output = Result<Res, RpcError>> + Send>>;

/// A client-streaming call: many requests in, one response out.
pub struct ClientStreamCall<Req, Res> {
    sender: CallSender<Req>,
    response: ResponseFuture<Res>,
    monitor: CallMonitor,
}

impl<Req, Res> ClientStreamCall<Req, Res> {
    pub(crate) fn new(
        sender: CallSender<Req>,
        response: ResponseFuture<Res>,
        monitor: CallMonitor,
    ) -> Self {
        Self {
            sender,
            response,
            monitor,
        }
    }

    pub async fn send(&self, request: Req) -> Result<(), RpcError> {
        self.sender.send(request).await
    }

    /// A cloned sending handle, for fanning sends out across tasks.
    pub fn sender(&self) -> CallSender<Req> {
        self.sender.clone()
    }

    pub fn state(&self) -> CallState {
        self.sender.state()
    }

    /// Half-closes and waits for the aggregate response.
    pub async fn close_and_recv(mut self) -> Result<Res, RpcError> {
        self.sender.close_send();
        tokio::select! {
            forced = self.monitor.aborted() => match forced {
                TerminalOutcome::DeadlineExceeded => Err(RpcError::DeadlineExceeded),
                _ => Err(RpcError::Cancelled),
            },
            response = &mut self.response => response,
        }
    }
}
