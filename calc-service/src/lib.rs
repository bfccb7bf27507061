//! Calculator and greeter services, one handler per call shape.
//!
//! The calculator covers arithmetic over streams: a unary square root,
//! server-streamed prime decomposition, a client-streamed average and a
//! bidi running maximum. The greeter covers deadline behavior: a unary
//! greeting that polls the caller deadline between units of work, and a
//! bidi echo greeting.
use futures_util::StreamExt;
use rill_core::aggregate::{MeanAccumulator, RunningMax, prime_factors};
use rill_core::{
    CallShape, Deadline, MethodDescriptor, RegistryService, ResponseStream, ServiceRegistry,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

pub const CALCULATOR_SERVICE: &str = "calc.Calculator";
pub const GREETER_SERVICE: &str = "greet.Greeter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareRootRequest {
    pub number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareRootResponse {
    pub number_root: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimeDecompositionRequest {
    pub number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimeDecompositionResponse {
    pub prime_factor: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeAverageRequest {
    pub number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeAverageResponse {
    pub average: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindMaximumRequest {
    pub number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindMaximumResponse {
    pub maximum: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreetRequest {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreetResponse {
    pub result: String,
}

pub fn square_root() -> MethodDescriptor {
    MethodDescriptor::new(CALCULATOR_SERVICE, "SquareRoot", CallShape::Unary)
}

pub fn prime_decomposition() -> MethodDescriptor {
    MethodDescriptor::new(
        CALCULATOR_SERVICE,
        "PrimeDecomposition",
        CallShape::ServerStreaming,
    )
}

pub fn compute_average() -> MethodDescriptor {
    MethodDescriptor::new(
        CALCULATOR_SERVICE,
        "ComputeAverage",
        CallShape::ClientStreaming,
    )
}

pub fn find_maximum() -> MethodDescriptor {
    MethodDescriptor::new(CALCULATOR_SERVICE, "FindMaximum", CallShape::BidiStreaming)
}

pub fn greet_with_deadline() -> MethodDescriptor {
    MethodDescriptor::new(GREETER_SERVICE, "GreetWithDeadline", CallShape::Unary)
}

pub fn greet_everyone() -> MethodDescriptor {
    MethodDescriptor::new(GREETER_SERVICE, "GreetEveryone", CallShape::BidiStreaming)
}

/// Builds the routing service with every handler registered.
///
/// `work_unit` is how long one unit of greeting work takes; the deadline
/// handler performs three of them, polling the caller deadline in between.
pub fn service(work_unit: Duration) -> RegistryService {
    ServiceRegistry::new()
        .unary(square_root(), handle_square_root)
        .server_streaming(prime_decomposition(), handle_prime_decomposition)
        .client_streaming(compute_average(), handle_compute_average)
        .bidi_streaming(find_maximum(), handle_find_maximum)
        .unary(greet_with_deadline(), move |request| {
            handle_greet_with_deadline(request, work_unit)
        })
        .bidi_streaming(greet_everyone(), handle_greet_everyone)
        .build()
}

async fn handle_square_root(
    request: Request<SquareRootRequest>,
) -> Result<Response<SquareRootResponse>, Status> {
    let number = request.into_inner().number;
    tracing::info!(number, "SquareRoot invoked");
    if number < 0 {
        return Err(Status::invalid_argument(format!(
            "received a negative number {number}"
        )));
    }
    Ok(Response::new(SquareRootResponse {
        number_root: (number as f64).sqrt(),
    }))
}

async fn handle_prime_decomposition(
    request: Request<PrimeDecompositionRequest>,
) -> Result<Response<ResponseStream<PrimeDecompositionResponse>>, Status> {
    let number = request.into_inner().number;
    tracing::info!(number, "PrimeDecomposition invoked");
    let factors = tokio_stream::iter(
        prime_factors(number).map(|prime_factor| Ok(PrimeDecompositionResponse { prime_factor })),
    );
    Ok(Response::new(factors.boxed()))
}

async fn handle_compute_average(
    request: Request<Streaming<ComputeAverageRequest>>,
) -> Result<Response<ComputeAverageResponse>, Status> {
    tracing::info!("ComputeAverage invoked");
    let mut inbound = request.into_inner();
    let mut mean = MeanAccumulator::new();
    while let Some(message) = inbound.message().await? {
        mean.observe(message.number);
    }
    let average = mean.finish().map_err(Status::from)?;
    Ok(Response::new(ComputeAverageResponse { average }))
}

async fn handle_find_maximum(
    request: Request<Streaming<FindMaximumRequest>>,
) -> Result<Response<ResponseStream<FindMaximumResponse>>, Status> {
    tracing::info!("FindMaximum invoked");
    let mut inbound = request.into_inner();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut max = RunningMax::new();
        loop {
            match inbound.message().await {
                Ok(Some(message)) => {
                    if let Some(maximum) = max.observe(message.number)
                        && tx.send(Ok(FindMaximumResponse { maximum })).await.is_err()
                    {
                        // Caller went away; nothing left to report to.
                        return;
                    }
                }
                Ok(None) => return,
                Err(status) => {
                    let _ = tx.send(Err(status)).await;
                    return;
                }
            }
        }
    });
    Ok(Response::new(ReceiverStream::new(rx).boxed()))
}

async fn handle_greet_everyone(
    request: Request<Streaming<GreetRequest>>,
) -> Result<Response<ResponseStream<GreetResponse>>, Status> {
    tracing::info!("GreetEveryone invoked");
    let mut inbound = request.into_inner();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            match inbound.message().await {
                Ok(Some(message)) => {
                    let result = format!("Hello {}! ", message.first_name);
                    if tx.send(Ok(GreetResponse { result })).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(status) => {
                    let _ = tx.send(Err(status)).await;
                    return;
                }
            }
        }
    });
    Ok(Response::new(ReceiverStream::new(rx).boxed()))
}

/// Greets after three units of work, checking the caller deadline between
/// units so an expired call aborts instead of finishing wasted work.
async fn handle_greet_with_deadline(
    request: Request<GreetRequest>,
    work_unit: Duration,
) -> Result<Response<GreetResponse>, Status> {
    let deadline = Deadline::from_metadata(request.metadata());
    let message = request.into_inner();
    tracing::info!(first_name = %message.first_name, "GreetWithDeadline invoked");
    for _ in 0..3 {
        if let Some(deadline) = &deadline {
            deadline.check()?;
        }
        tokio::time::sleep(work_unit).await;
    }
    Ok(Response::new(GreetResponse {
        result: format!("Hello {} {}", message.first_name, message.last_name),
    }))
}
