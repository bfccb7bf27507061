//! Method descriptors.
//!
//! A [`MethodDescriptor`] identifies one RPC: the fully qualified service
//! name, the method name and the call shape. Callers resolve it once when a
//! call is issued; it never changes afterwards.
use std::fmt;
use std::str::FromStr;

/// Cardinality of requests and responses for one RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Exactly one request, exactly one response.
    Unary,
    /// One request, a finite stream of responses.
    ServerStreaming,
    /// A stream of requests, one aggregate response.
    ClientStreaming,
    /// Independently paced request and response streams.
    BidiStreaming,
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallShape::Unary => "unary",
            CallShape::ServerStreaming => "server-streaming",
            CallShape::ClientStreaming => "client-streaming",
            CallShape::BidiStreaming => "bidi-streaming",
        };
        f.write_str(name)
    }
}

/// Identifies an RPC method and the shape of its exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    service: String,
    method: String,
    shape: CallShape,
}

impl MethodDescriptor {
    /// # Arguments
    /// * `service` - Fully qualified service name (e.g. `calc.Calculator`).
    /// * `method` - Method name (e.g. `FindMaximum`).
    /// * `shape` - The call shape both peers must agree on.
    pub fn new(service: impl Into<String>, method: impl Into<String>, shape: CallShape) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            shape,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// The HTTP/2 path this method is routed by (e.g. `/calc.Calculator/FindMaximum`).
    pub fn path(&self) -> http::uri::PathAndQuery {
        let path = format!("/{}/{}", self.service, self.method);
        http::uri::PathAndQuery::from_str(&path).expect("valid gRPC path")
    }
}
