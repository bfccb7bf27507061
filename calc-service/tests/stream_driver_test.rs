//! Batch driver tests: concurrent sends, single half-close, full reports.
use calc_service::*;
use rill_core::{
    BidiCall, CallOptions, ClientStreamCall, RegistryService, RpcClient, RpcError,
    drive_bidi, drive_client_stream,
};
use std::time::Duration;

fn client() -> RpcClient<RegistryService> {
    RpcClient::new(service(Duration::from_millis(5)))
}

fn greet(first_name: &str) -> GreetRequest {
    GreetRequest {
        first_name: first_name.to_string(),
        last_name: String::new(),
    }
}

#[tokio::test]
async fn drive_bidi_greets_everyone_exactly_once() {
    let mut client = client();
    let call: BidiCall<GreetRequest, GreetResponse> = client
        .bidi_streaming(&greet_everyone(), CallOptions::new())
        .await
        .unwrap();

    let names = ["Kurt", "Abel", "Nina", "Iris", "Owen"];
    let requests = names.iter().map(|name| greet(name)).collect();
    let report = drive_bidi(call, requests).await;

    assert!(report.send_failures.is_empty());
    assert!(report.outcome.is_success());
    assert_eq!(report.responses.len(), names.len());

    // Sends race, so responses may arrive in any order.
    let mut greetings: Vec<String> = report.responses.into_iter().map(|r| r.result).collect();
    greetings.sort();
    let mut expected: Vec<String> = names.iter().map(|name| format!("Hello {name}! ")).collect();
    expected.sort();
    assert_eq!(greetings, expected);
}

#[tokio::test]
async fn drive_bidi_handles_batches_larger_than_the_outbound_buffer() {
    let mut client = client();
    let call: BidiCall<GreetRequest, GreetResponse> = client
        .bidi_streaming(&greet_everyone(), CallOptions::new())
        .await
        .unwrap();

    let requests: Vec<GreetRequest> = (0..40).map(|i| greet(&format!("guest-{i}"))).collect();
    let report = drive_bidi(call, requests).await;

    assert!(report.send_failures.is_empty());
    assert!(report.outcome.is_success());
    assert_eq!(report.responses.len(), 40);
}

#[tokio::test]
async fn drive_bidi_reports_failures_without_aborting_the_batch() {
    let mut client = client();
    let mut call: BidiCall<GreetRequest, GreetResponse> = client
        .bidi_streaming(&greet_everyone(), CallOptions::new())
        .await
        .unwrap();
    // Half-close up front: every queued send must fail, the call itself
    // still terminates cleanly.
    call.close_send();

    let requests = vec![greet("Kurt"), greet("Abel"), greet("Nina")];
    let report = drive_bidi(call, requests).await;

    assert!(report.responses.is_empty());
    assert!(report.outcome.is_success());
    assert_eq!(report.send_failures.len(), 3);
    let indices: Vec<usize> = report.send_failures.iter().map(|f| f.index).collect();
    assert_eq!(indices, [0, 1, 2]);
    for failure in &report.send_failures {
        assert!(matches!(failure.error, RpcError::InvalidCallState(_)));
    }
}

#[tokio::test]
async fn drive_client_stream_averages_the_batch() {
    let client = client();
    let call: ClientStreamCall<ComputeAverageRequest, ComputeAverageResponse> = client
        .client_streaming(&compute_average(), CallOptions::new())
        .unwrap();

    let requests = [10, 15, 15, 19, 21]
        .into_iter()
        .map(|number| ComputeAverageRequest { number })
        .collect();
    let report = drive_client_stream(call, requests).await;

    assert!(report.send_failures.is_empty());
    assert_eq!(report.response.unwrap().average, 16.0);
}

#[tokio::test]
async fn drive_client_stream_handles_batches_larger_than_the_outbound_buffer() {
    let client = client();
    let call: ClientStreamCall<ComputeAverageRequest, ComputeAverageResponse> = client
        .client_streaming(&compute_average(), CallOptions::new())
        .unwrap();

    let requests = (0..40).map(|number| ComputeAverageRequest { number }).collect();
    let report = drive_client_stream(call, requests).await;

    assert!(report.send_failures.is_empty());
    assert_eq!(report.response.unwrap().average, 19.5);
}
