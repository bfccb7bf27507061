//! Callee-side method registry and router.
//!
//! Handlers for each call shape register against a [`MethodDescriptor`];
//! the registry erases their types once, at registration, and builds a
//! tower service that routes incoming requests by path. Per-message
//! decoding, trailers and end-of-stream handling are delegated to
//! `tonic::server::Grpc` with the same JSON codec the client uses.
use crate::codec::SerdeCodec;
use crate::method::{CallShape, MethodDescriptor};
use futures_util::stream::BoxStream;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::Body;
use tonic::server::{
    ClientStreamingService, Grpc, ServerStreamingService, StreamingService, UnaryService,
};
use tonic::{Request, Response, Status, Streaming};

/// Boxed response stream produced by streaming handlers.
pub type ResponseStream<Res> = BoxStream<'static, Result<Res, Status>>;

type HandlerFuture = Pin<Box<dyn Future<Output = http::Response<Body>> + Send>>;
type ErasedHandler = Arc<dyn Fn(http::Request<Body>) -> HandlerFuture + Send + Sync>;

enum Route {
    Unary(ErasedHandler),
    ServerStreaming(ErasedHandler),
    ClientStreaming(ErasedHandler),
    BidiStreaming(ErasedHandler),
}

impl Route {
    fn handler(&self) -> &ErasedHandler {
        match self {
            Route::Unary(h)
            | Route::ServerStreaming(h)
            | Route::ClientStreaming(h)
            | Route::BidiStreaming(h) => h,
        }
    }

    fn shape(&self) -> CallShape {
        match self {
            Route::Unary(_) => CallShape::Unary,
            Route::ServerStreaming(_) => CallShape::ServerStreaming,
            Route::ClientStreaming(_) => CallShape::ClientStreaming,
            Route::BidiStreaming(_) => CallShape::BidiStreaming,
        }
    }
}

/// Builder collecting the handlers of one or more services.
#[derive(Default)]
pub struct ServiceRegistry {
    routes: HashMap<String, Route>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unary handler.
    pub fn unary<Req, Res, F, Fut>(self, method: MethodDescriptor, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Request<Req>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Response<Res>, Status>> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |req| {
            let handler = handler.clone();
            Box::pin(async move {
                let mut grpc = Grpc::new(SerdeCodec::<Res, Req>::default());
                grpc.unary(FnUnary(handler), req).await
            })
        });
        self.register(method, Route::Unary(erased))
    }

    /// Registers a server-streaming handler.
    pub fn server_streaming<Req, Res, F, Fut>(self, method: MethodDescriptor, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Request<Req>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Response<ResponseStream<Res>>, Status>> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |req| {
            let handler = handler.clone();
            Box::pin(async move {
                let mut grpc = Grpc::new(SerdeCodec::<Res, Req>::default());
                grpc.server_streaming(FnServerStreaming(handler), req).await
            })
        });
        self.register(method, Route::ServerStreaming(erased))
    }

    /// Registers a client-streaming handler.
    pub fn client_streaming<Req, Res, F, Fut>(self, method: MethodDescriptor, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Request<Streaming<Req>>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Response<Res>, Status>> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |req| {
            let handler = handler.clone();
            Box::pin(async move {
                let mut grpc = Grpc::new(SerdeCodec::<Res, Req>::default());
                grpc.client_streaming(FnClientStreaming(handler), req).await
            })
        });
        self.register(method, Route::ClientStreaming(erased))
    }

    /// Registers a bidirectional streaming handler.
    pub fn bidi_streaming<Req, Res, F, Fut>(self, method: MethodDescriptor, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Request<Streaming<Req>>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Response<ResponseStream<Res>>, Status>> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |req| {
            let handler = handler.clone();
            Box::pin(async move {
                let mut grpc = Grpc::new(SerdeCodec::<Res, Req>::default());
                grpc.streaming(FnBidiStreaming(handler), req).await
            })
        });
        self.register(method, Route::BidiStreaming(erased))
    }

    // Registration mistakes are startup configuration errors, so they panic
    // instead of surfacing per-request.
    fn register(mut self, method: MethodDescriptor, route: Route) -> Self {
        assert_eq!(
            method.shape(),
            route.shape(),
            "handler shape does not match the descriptor of {}",
            method.path(),
        );
        let path = method.path().to_string();
        let previous = self.routes.insert(path.clone(), route);
        assert!(previous.is_none(), "duplicate handler for {path}");
        self
    }

    pub fn build(self) -> RegistryService {
        RegistryService {
            routes: Arc::new(self.routes),
        }
    }
}

/// The routing tower service built from a [`ServiceRegistry`].
///
/// Unknown paths are answered with `Unimplemented` trailers, matching what
/// generated gRPC servers do for methods they do not expose.
#[derive(Clone)]
pub struct RegistryService {
    routes: Arc<HashMap<String, Route>>,
}

impl tonic::codegen::Service<http::Request<Body>> for RegistryService {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        match self.routes.get(req.uri().path()) {
            Some(route) => {
                tracing::debug!(path = req.uri().path(), shape = %route.shape(), "dispatching call");
                let handler = route.handler().clone();
                Box::pin(async move { Ok(handler(req).await) })
            }
            None => {
                tracing::warn!(path = req.uri().path(), "no handler registered");
                Box::pin(async move { Ok(unimplemented_response()) })
            }
        }
    }
}

fn unimplemented_response() -> http::Response<Body> {
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header("grpc-status", tonic::Code::Unimplemented as i32)
        .header("content-type", "application/grpc")
        .body(Body::empty())
        .expect("static response parts are valid")
}

struct FnUnary<F>(F);

impl<Req, Res, F, Fut> UnaryService<Req> for FnUnary<F>
where
    F: Fn(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Response<Res>, Status>> + Send + 'static,
{
    type Response = Res;
    type Future = Fut;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        (self.0)(request)
    }
}

struct FnServerStreaming<F>(F);

impl<Req, Res, F, Fut> ServerStreamingService<Req> for FnServerStreaming<F>
where
    F: Fn(Request<Req>) -> Fut,
    Fut: Future<Output = Result<Response<ResponseStream<Res>>, Status>> + Send + 'static,
{
    type Response = Res;
    type ResponseStream = ResponseStream<Res>;
    type Future = Fut;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        (self.0)(request)
    }
}

struct FnClientStreaming<F>(F);

impl<Req, Res, F, Fut> ClientStreamingService<Req> for FnClientStreaming<F>
where
    F: Fn(Request<Streaming<Req>>) -> Fut,
    Fut: Future<Output = Result<Response<Res>, Status>> + Send + 'static,
{
    type Response = Res;
    type Future = Fut;

    fn call(&mut self, request: Request<Streaming<Req>>) -> Self::Future {
        (self.0)(request)
    }
}

struct FnBidiStreaming<F>(F);

impl<Req, Res, F, Fut> StreamingService<Req> for FnBidiStreaming<F>
where
    F: Fn(Request<Streaming<Req>>) -> Fut,
    Fut: Future<Output = Result<Response<ResponseStream<Res>>, Status>> + Send + 'static,
{
    type Response = Res;
    type ResponseStream = ResponseStream<Res>;
    type Future = Fut;

    fn call(&mut self, request: Request<Streaming<Req>>) -> Self::Future {
        (self.0)(request)
    }
}
