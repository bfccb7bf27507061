//! End-to-end call-shape tests, client running directly over the service.
use calc_service::*;
use rill_core::{
    BidiCall, CallOptions, CallReceiver, CallState, ClientStreamCall, Received, RegistryService,
    RpcClient, RpcError, TerminalOutcome,
};
use std::time::Duration;

fn client() -> RpcClient<RegistryService> {
    RpcClient::new(service(Duration::from_millis(5)))
}

#[tokio::test]
async fn square_root_of_sixteen_is_four() {
    let mut client = client();
    let response: SquareRootResponse = client
        .unary(
            &square_root(),
            SquareRootRequest { number: 16 },
            CallOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(response.number_root, 4.0);
}

#[tokio::test]
async fn negative_square_root_is_rejected() {
    let mut client = client();
    let err = client
        .unary::<_, SquareRootResponse>(
            &square_root(),
            SquareRootRequest { number: -4 },
            CallOptions::new(),
        )
        .await
        .unwrap_err();
    match err {
        RpcError::InvalidArgument(message) => {
            assert!(message.contains("negative number -4"), "{message}");
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

#[tokio::test]
async fn twelve_decomposes_into_two_two_three() {
    let mut client = client();
    let receiver: CallReceiver<PrimeDecompositionResponse> = client
        .server_streaming(
            &prime_decomposition(),
            PrimeDecompositionRequest { number: 12 },
            CallOptions::new(),
        )
        .await
        .unwrap();
    let (responses, outcome) = receiver.collect().await;
    let factors: Vec<i64> = responses.iter().map(|r| r.prime_factor).collect();
    assert_eq!(factors, [2, 2, 3]);
    assert!(outcome.is_success());
}

#[tokio::test]
async fn one_decomposes_into_an_empty_stream() {
    let mut client = client();
    let receiver: CallReceiver<PrimeDecompositionResponse> = client
        .server_streaming(
            &prime_decomposition(),
            PrimeDecompositionRequest { number: 1 },
            CallOptions::new(),
        )
        .await
        .unwrap();
    let (responses, outcome) = receiver.collect().await;
    assert!(responses.is_empty());
    assert!(outcome.is_success());
}

#[tokio::test]
async fn streamed_factors_multiply_back_to_the_input() {
    let mut client = client();
    let receiver: CallReceiver<PrimeDecompositionResponse> = client
        .server_streaming(
            &prime_decomposition(),
            PrimeDecompositionRequest { number: 360 },
            CallOptions::new(),
        )
        .await
        .unwrap();
    let (responses, outcome) = receiver.collect().await;
    let product: i64 = responses.iter().map(|r| r.prime_factor).product();
    assert_eq!(product, 360);
    assert!(outcome.is_success());
}

#[tokio::test]
async fn average_of_the_first_four_integers() {
    let client = client();
    let call: ClientStreamCall<ComputeAverageRequest, ComputeAverageResponse> = client
        .client_streaming(&compute_average(), CallOptions::new())
        .unwrap();
    assert_eq!(call.state(), CallState::Open);
    for number in 1..=4 {
        call.send(ComputeAverageRequest { number }).await.unwrap();
    }
    let response = call.close_and_recv().await.unwrap();
    assert_eq!(response.average, 2.5);
}

#[tokio::test]
async fn averaging_nothing_is_an_empty_aggregation() {
    let client = client();
    let call: ClientStreamCall<ComputeAverageRequest, ComputeAverageResponse> = client
        .client_streaming(&compute_average(), CallOptions::new())
        .unwrap();
    let err = call.close_and_recv().await.unwrap_err();
    match err {
        RpcError::EmptyAggregation(message) => {
            assert!(message.contains("zero values"), "{message}");
        }
        other => panic!("expected EmptyAggregation, got {other:?}"),
    }
}

#[tokio::test]
async fn find_maximum_reports_only_strict_improvements() {
    let mut client = client();
    let mut call: BidiCall<FindMaximumRequest, FindMaximumResponse> = client
        .bidi_streaming(&find_maximum(), CallOptions::new())
        .await
        .unwrap();
    for number in [10, 15, 15, 19, 21] {
        call.send(FindMaximumRequest { number }).await.unwrap();
    }
    call.close_send();

    let mut maxima = Vec::new();
    let outcome = loop {
        match call.recv().await {
            Received::Message(response) => maxima.push(response.maximum),
            Received::Terminal(outcome) => break outcome,
        }
    };
    assert_eq!(maxima, [10, 15, 19, 21]);
    assert!(outcome.is_success());
}

#[tokio::test]
async fn terminal_outcome_replays_on_repeated_receives() {
    let mut client = client();
    let mut call: BidiCall<FindMaximumRequest, FindMaximumResponse> = client
        .bidi_streaming(&find_maximum(), CallOptions::new())
        .await
        .unwrap();
    call.send(FindMaximumRequest { number: 7 }).await.unwrap();
    call.close_send();
    let (_, mut receiver) = call.split();
    assert!(receiver.terminal().is_none());

    assert!(matches!(
        receiver.recv().await,
        Received::Message(FindMaximumResponse { maximum: 7 })
    ));
    assert!(matches!(
        receiver.recv().await,
        Received::Terminal(TerminalOutcome::Success)
    ));
    // The outcome is sticky and observable without another receive.
    assert!(receiver.terminal().is_some_and(TerminalOutcome::is_success));
    assert!(matches!(
        receiver.recv().await,
        Received::Terminal(TerminalOutcome::Success)
    ));
}

#[tokio::test]
async fn sends_are_rejected_after_half_close_and_after_terminal() {
    let mut client = client();
    let mut call: BidiCall<FindMaximumRequest, FindMaximumResponse> = client
        .bidi_streaming(&find_maximum(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(call.state(), CallState::Open);
    call.send(FindMaximumRequest { number: 3 }).await.unwrap();
    call.close_send();
    assert_eq!(call.state(), CallState::SendHalfClosed);

    let err = call.send(FindMaximumRequest { number: 4 }).await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidCallState(_)));

    // Drain to terminal, then try again.
    loop {
        if let Received::Terminal(outcome) = call.recv().await {
            assert!(outcome.is_success());
            break;
        }
    }
    assert_eq!(call.state(), CallState::Terminal);
    let err = call.send(FindMaximumRequest { number: 5 }).await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidCallState(_)));
}

#[tokio::test]
async fn calling_a_method_with_the_wrong_shape_is_rejected() {
    let mut client = client();
    let err = client
        .unary::<_, FindMaximumResponse>(
            &find_maximum(),
            FindMaximumRequest { number: 1 },
            CallOptions::new(),
        )
        .await
        .unwrap_err();
    match err {
        RpcError::InvalidArgument(message) => {
            assert!(message.contains("bidi-streaming"), "{message}");
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}
