//! Deadline and cancellation behavior across both sides of a call.
use calc_service::*;
use futures_util::StreamExt;
use rill_core::{
    BidiCall, CallOptions, CancelHandle, Received, RegistryService, ResponseStream, RpcClient,
    RpcError, ServiceRegistry, TerminalOutcome,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

fn client(work_unit: Duration) -> RpcClient<RegistryService> {
    RpcClient::new(service(work_unit))
}

fn greet_request() -> GreetRequest {
    GreetRequest {
        first_name: "Jinsu".to_string(),
        last_name: "Sang".to_string(),
    }
}

#[tokio::test]
async fn greeting_completes_within_a_generous_deadline() {
    let mut client = client(Duration::from_millis(5));
    let response: GreetResponse = client
        .unary(
            &greet_with_deadline(),
            greet_request(),
            CallOptions::new().with_deadline(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    assert_eq!(response.result, "Hello Jinsu Sang");
}

#[tokio::test]
async fn caller_deadline_aborts_a_slow_greeting() {
    // Three work units of 300ms against a 50ms deadline.
    let mut client = client(Duration::from_millis(300));
    let started = Instant::now();
    let err = client
        .unary::<_, GreetResponse>(
            &greet_with_deadline(),
            greet_request(),
            CallOptions::new().with_deadline(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::DeadlineExceeded));
    // The monitor fires at the deadline, well before the handler finishes.
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn callee_aborts_cooperatively_when_the_propagated_deadline_expires() {
    // No caller-side monitor: the deadline travels as raw metadata and only
    // the handler's own checkpoints can honor it.
    let mut client = client(Duration::from_millis(100));
    let started = Instant::now();
    let err = client
        .unary::<_, GreetResponse>(
            &greet_with_deadline(),
            greet_request(),
            CallOptions::new().with_metadata("grpc-timeout", "110m"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::DeadlineExceeded));
    // The handler aborts at the checkpoint after the second work unit
    // instead of completing all three.
    assert!(started.elapsed() < Duration::from_millis(290));
}

#[tokio::test]
async fn cancellation_terminates_a_live_bidi_call() {
    let mut client = client(Duration::from_millis(5));
    let (handle, signal) = CancelHandle::new();
    let mut call: BidiCall<FindMaximumRequest, FindMaximumResponse> = client
        .bidi_streaming(&find_maximum(), CallOptions::new().with_cancel(signal))
        .await
        .unwrap();

    call.send(FindMaximumRequest { number: 7 }).await.unwrap();
    assert!(matches!(
        call.recv().await,
        Received::Message(FindMaximumResponse { maximum: 7 })
    ));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    assert!(matches!(
        call.recv().await,
        Received::Terminal(TerminalOutcome::Cancelled)
    ));
    // Cancellation is sticky: receives replay it, sends are rejected.
    assert!(matches!(
        call.recv().await,
        Received::Terminal(TerminalOutcome::Cancelled)
    ));
    let err = call.send(FindMaximumRequest { number: 9 }).await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidCallState(_)));
}

/// Accepts the call but never reads a single request, so the caller's
/// outbound buffer fills up and stays full.
async fn handle_without_draining(
    request: Request<Streaming<FindMaximumRequest>>,
) -> Result<Response<ResponseStream<FindMaximumResponse>>, Status> {
    let inbound = request.into_inner();
    let (tx, rx) = mpsc::channel::<Result<FindMaximumResponse, Status>>(1);
    tokio::spawn(async move {
        let _inbound = inbound;
        let _tx = tx;
        std::future::pending::<()>().await;
    });
    Ok(Response::new(ReceiverStream::new(rx).boxed()))
}

#[tokio::test]
async fn deadline_aborts_a_send_blocked_on_a_full_buffer() {
    let stalled = ServiceRegistry::new()
        .bidi_streaming(find_maximum(), handle_without_draining)
        .build();
    let mut client = RpcClient::new(stalled);
    let call: BidiCall<FindMaximumRequest, FindMaximumResponse> = client
        .bidi_streaming(
            &find_maximum(),
            CallOptions::new().with_deadline(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    let started = Instant::now();
    let outcome = loop {
        match call.send(FindMaximumRequest { number: 1 }).await {
            Ok(()) => continue,
            Err(err) => break err,
        }
    };
    assert!(matches!(outcome, RpcError::DeadlineExceeded));
    // The blocked send resolves at the deadline instead of waiting on a
    // drain that never comes.
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn deadline_fires_on_a_receive_with_no_pending_responses() {
    let mut client = client(Duration::from_millis(5));
    let mut call: BidiCall<FindMaximumRequest, FindMaximumResponse> = client
        .bidi_streaming(
            &find_maximum(),
            CallOptions::new().with_deadline(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    // Nothing sent, so the callee has nothing to say; only the deadline can
    // resolve this receive.
    assert!(matches!(
        call.recv().await,
        Received::Terminal(TerminalOutcome::DeadlineExceeded)
    ));
}
