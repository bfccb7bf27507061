//! The caller-side entry point.
//!
//! [`RpcClient`] wraps `tonic::client::Grpc` over any tower service that
//! speaks gRPC-framed HTTP, so the same client runs over a real connection
//! or directly over an in-process [`RegistryService`](crate::server::RegistryService).
//! One method per call shape; each checks the descriptor's shape up front,
//! attaches metadata and the `grpc-timeout` entry, and wires the deadline
//! and cancellation monitor into every await point.
use crate::call::{
    BidiCall, CallReceiver, CallSender, CallShared, CallState, ClientStreamCall, OUTBOUND_BUFFER,
    TerminalOutcome,
};
use crate::codec::SerdeCodec;
use crate::deadline::{CallOptions, GRPC_TIMEOUT_METADATA, format_grpc_timeout};
use crate::error::{BoxError, RpcError};
use crate::method::{CallShape, MethodDescriptor};
use http_body::Body as HttpBody;
use serde::{Serialize, de::DeserializeOwned};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::GrpcService;
use tonic::metadata::{MetadataKey, MetadataValue};

/// A shape-aware RPC client over any gRPC-capable tower service.
#[derive(Clone)]
pub struct RpcClient<S> {
    inner: tonic::client::Grpc<S>,
}

impl<S> RpcClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            inner: tonic::client::Grpc::new(service),
        }
    }

    /// Issues a unary call: one request, one response.
    pub async fn unary<Req, Res>(
        &mut self,
        method: &MethodDescriptor,
        message: Req,
        options: CallOptions,
    ) -> Result<Res, RpcError>
    where
        Req: Serialize + Send + Sync + 'static,
        Res: DeserializeOwned + Send + Sync + 'static,
    {
        check_shape(method, CallShape::Unary)?;
        let request = build_request(message, &options)?;
        let mut monitor = options.monitor();

        self.inner
            .ready()
            .await
            .map_err(|e| RpcError::Channel(e.into()))?;
        tracing::debug!(path = %method.path(), "issuing unary call");

        tokio::select! {
            forced = monitor.aborted() => match forced {
                TerminalOutcome::DeadlineExceeded => Err(RpcError::DeadlineExceeded),
                _ => Err(RpcError::Cancelled),
            },
            response = self.inner.unary(request, method.path(), SerdeCodec::<Req, Res>::default()) => {
                match response {
                    Ok(response) => Ok(response.into_inner()),
                    Err(status) => Err(RpcError::from(status)),
                }
            }
        }
    }

    /// Issues a server-streaming call: one request, a stream of responses.
    ///
    /// The returned receiver starts in `SendHalfClosed` since the single
    /// request has already been sent.
    pub async fn server_streaming<Req, Res>(
        &mut self,
        method: &MethodDescriptor,
        message: Req,
        options: CallOptions,
    ) -> Result<CallReceiver<Res>, RpcError>
    where
        Req: Serialize + Send + Sync + 'static,
        Res: DeserializeOwned + Send + Sync + 'static,
    {
        check_shape(method, CallShape::ServerStreaming)?;
        let request = build_request(message, &options)?;
        let mut monitor = options.monitor();
        let shared = CallShared::new();
        shared.advance(CallState::SendHalfClosed);

        self.inner
            .ready()
            .await
            .map_err(|e| RpcError::Channel(e.into()))?;
        tracing::debug!(path = %method.path(), "issuing server-streaming call");

        let inbound = tokio::select! {
            forced = monitor.aborted() => {
                return match forced {
                    TerminalOutcome::DeadlineExceeded => Err(RpcError::DeadlineExceeded),
                    _ => Err(RpcError::Cancelled),
                };
            }
            response = self.inner.server_streaming(
                request,
                method.path(),
                SerdeCodec::<Req, Res>::default(),
            ) => match response {
                Ok(response) => response.into_inner(),
                Err(status) => return Err(RpcError::from(status)),
            },
        };
        Ok(CallReceiver::new(inbound, monitor, shared))
    }

    /// Opens a client-streaming call: a stream of requests, one response.
    pub fn client_streaming<Req, Res>(
        &self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<ClientStreamCall<Req, Res>, RpcError>
    where
        Req: Serialize + Send + Sync + 'static,
        Res: DeserializeOwned + Send + Sync + 'static,
    {
        check_shape(method, CallShape::ClientStreaming)?;
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let request = build_request(ReceiverStream::new(rx), &options)?;
        let monitor = options.monitor();
        let shared = CallShared::new();
        let sender = CallSender::new(tx, shared.clone(), monitor.clone());
        tracing::debug!(path = %method.path(), "opening client-streaming call");

        let path = method.path();
        let mut grpc = self.inner.clone();
        // The exchange runs on its own task from the start, so the callee
        // drains queued requests even before the response is awaited.
        let exchange = tokio::spawn(async move {
            grpc.ready().await.map_err(|e| RpcError::Channel(e.into()))?;
            let result = grpc
                .client_streaming(request, path, SerdeCodec::<Req, Res>::default())
                .await;
            shared.advance(CallState::Terminal);
            match result {
                Ok(response) => Ok(response.into_inner()),
                Err(status) => Err(RpcError::from(status)),
            }
        });
        let response = Box::pin(async move {
            match exchange.await {
                Ok(result) => result,
                Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
            }
        });
        Ok(ClientStreamCall::new(sender, response, monitor))
    }

    /// Opens a bidirectional streaming call: both directions independently
    /// paced.
    pub async fn bidi_streaming<Req, Res>(
        &mut self,
        method: &MethodDescriptor,
        options: CallOptions,
    ) -> Result<BidiCall<Req, Res>, RpcError>
    where
        Req: Serialize + Send + Sync + 'static,
        Res: DeserializeOwned + Send + Sync + 'static,
    {
        check_shape(method, CallShape::BidiStreaming)?;
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let request = build_request(ReceiverStream::new(rx), &options)?;
        let mut monitor = options.monitor();
        let shared = CallShared::new();
        let sender = CallSender::new(tx, shared.clone(), monitor.clone());

        self.inner
            .ready()
            .await
            .map_err(|e| RpcError::Channel(e.into()))?;
        tracing::debug!(path = %method.path(), "opening bidi-streaming call");

        let inbound = tokio::select! {
            forced = monitor.aborted() => {
                return match forced {
                    TerminalOutcome::DeadlineExceeded => Err(RpcError::DeadlineExceeded),
                    _ => Err(RpcError::Cancelled),
                };
            }
            response = self.inner.streaming(
                request,
                method.path(),
                SerdeCodec::<Req, Res>::default(),
            ) => match response {
                Ok(response) => response.into_inner(),
                Err(status) => return Err(RpcError::from(status)),
            },
        };
        Ok(BidiCall::new(
            sender,
            CallReceiver::new(inbound, monitor, shared),
        ))
    }
}

fn check_shape(method: &MethodDescriptor, expected: CallShape) -> Result<(), RpcError> {
    if method.shape() == expected {
        Ok(())
    } else {
        Err(RpcError::InvalidArgument(format!(
            "method {} is {}, not {expected}",
            method.path(),
            method.shape(),
        )))
    }
}

fn build_request<T>(payload: T, options: &CallOptions) -> Result<tonic::Request<T>, RpcError> {
    let mut request = tonic::Request::new(payload);
    for (key, value) in &options.metadata {
        let key = MetadataKey::from_str(key)
            .map_err(|e| RpcError::InvalidArgument(format!("invalid metadata key {key:?}: {e}")))?;
        let value = MetadataValue::from_str(value).map_err(|e| {
            RpcError::InvalidArgument(format!("invalid metadata value {value:?}: {e}"))
        })?;
        request.metadata_mut().insert(key, value);
    }
    if let Some(timeout) = options.deadline {
        let value = MetadataValue::from_str(&format_grpc_timeout(timeout))
            .map_err(|e| RpcError::InvalidArgument(format!("invalid timeout: {e}")))?;
        request.metadata_mut().insert(GRPC_TIMEOUT_METADATA, value);
    }
    Ok(request)
}
