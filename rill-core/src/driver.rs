//! Caller-side stream drivers.
//!
//! Given a batch of request messages and an open streaming call, the
//! drivers fan the sends out across tasks, half-close exactly once after
//! every send has settled, and hand back everything the call produced.
//! Responses are drained concurrently with the sends so a full outbound
//! buffer never deadlocks against a callee waiting to be read.
use crate::call::{BidiCall, ClientStreamCall, Received, TerminalOutcome};
use crate::error::RpcError;
use tokio::task::JoinSet;

/// A request that could not be queued, with its position in the batch.
#[derive(Debug)]
pub struct SendFailure {
    pub index: usize,
    pub error: RpcError,
}

/// Everything a driven bidi call produced.
#[derive(Debug)]
pub struct BidiReport<Res> {
    pub responses: Vec<Res>,
    pub send_failures: Vec<SendFailure>,
    pub outcome: TerminalOutcome,
}

/// Sends `requests` over a bidi call from one task each, then half-closes
/// and drains the responses to completion.
///
/// Sends run concurrently, so the callee may observe them in any order. A
/// failed send never aborts the batch; it is reported in
/// [`BidiReport::send_failures`], ordered by batch index.
pub async fn drive_bidi<Req, Res>(call: BidiCall<Req, Res>, requests: Vec<Req>) -> BidiReport<Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    let (sender, mut receiver) = call.split();

    // Drain responses from the start; sends block on the outbound buffer
    // otherwise once the callee stops reading.
    let drain = tokio::spawn(async move {
        let mut responses = Vec::new();
        loop {
            match receiver.recv().await {
                Received::Message(message) => responses.push(message),
                Received::Terminal(outcome) => return (responses, outcome),
            }
        }
    });

    let mut tasks = JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
        let sender = sender.clone();
        tasks.spawn(async move {
            sender
                .send(request)
                .await
                .map_err(|error| SendFailure { index, error })
        });
    }

    let mut send_failures = Vec::new();
    while let Some(settled) = tasks.join_next().await {
        match settled {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => send_failures.push(failure),
            // Send tasks are never aborted; a join error can only be a panic.
            Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
        }
    }
    // Every send has settled; dropping the last sender half-closes the call.
    drop(sender);

    let (responses, outcome) = drain.await.unwrap_or_else(|join_error| {
        std::panic::resume_unwind(join_error.into_panic())
    });
    send_failures.sort_by_key(|failure| failure.index);

    BidiReport {
        responses,
        send_failures,
        outcome,
    }
}

/// Everything a driven client-streaming call produced.
#[derive(Debug)]
pub struct ClientStreamReport<Res> {
    pub response: Result<Res, RpcError>,
    pub send_failures: Vec<SendFailure>,
}

/// Sends `requests` over a client-streaming call from one task each, then
/// half-closes and waits for the aggregate response.
///
/// The exchange task behind the call drains the outbound buffer while the
/// sends run, so batches larger than the buffer make progress.
pub async fn drive_client_stream<Req, Res>(
    call: ClientStreamCall<Req, Res>,
    requests: Vec<Req>,
) -> ClientStreamReport<Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    let mut tasks = JoinSet::new();
    for (index, request) in requests.into_iter().enumerate() {
        let sender = call.sender();
        tasks.spawn(async move {
            sender
                .send(request)
                .await
                .map_err(|error| SendFailure { index, error })
        });
    }

    let mut send_failures = Vec::new();
    while let Some(settled) = tasks.join_next().await {
        match settled {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => send_failures.push(failure),
            Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
        }
    }
    send_failures.sort_by_key(|failure| failure.index);

    let response = call.close_and_recv().await;
    ClientStreamReport {
        response,
        send_failures,
    }
}
