//! # rill-core
//!
//! Call-shape primitives for bidirectional message streaming over gRPC
//! framing, without protobuf: plain serde types on the wire, a shared call
//! state machine on both streaming halves, deadline and cancellation
//! monitoring on every await point, and batch drivers that fan sends out
//! across tasks.
//!
//! The four call shapes:
//! - [`RpcClient::unary`]: one request, one response.
//! - [`RpcClient::server_streaming`]: one request, a stream of responses.
//! - [`RpcClient::client_streaming`]: a stream of requests, one response.
//! - [`RpcClient::bidi_streaming`]: both directions independently paced.
//!
//! Callees register plain async handlers in a [`ServiceRegistry`]; the
//! resulting [`RegistryService`] is a tower service, so a client can run
//! over it in-process or behind any HTTP/2 server stack.
pub mod aggregate;
pub mod call;
pub mod client;
pub mod codec;
pub mod deadline;
pub mod driver;
pub mod error;
pub mod method;
pub mod server;

pub use call::{BidiCall, CallReceiver, CallSender, CallState, ClientStreamCall, Received, TerminalOutcome};
pub use client::RpcClient;
pub use codec::SerdeCodec;
pub use deadline::{CallOptions, CancelHandle, CancelSignal, Deadline};
pub use driver::{BidiReport, ClientStreamReport, SendFailure, drive_bidi, drive_client_stream};
pub use error::{BoxError, RpcError};
pub use method::{CallShape, MethodDescriptor};
pub use server::{RegistryService, ResponseStream, ServiceRegistry};

pub use tonic;
