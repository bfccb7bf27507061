//! Deadlines and cancellation.
//!
//! A caller attaches a deadline and/or a [`CancelSignal`] to a call through
//! [`CallOptions`]. The resulting monitor races every pending send/receive
//! and forces the call into `Terminal(DeadlineExceeded)` or
//! `Terminal(Cancelled)` the moment it fires. The deadline also travels to
//! the callee in the standard `grpc-timeout` metadata entry, where handlers
//! poll it cooperatively at each unit of work via [`Deadline`].
use crate::call::TerminalOutcome;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tonic::Status;
use tonic::metadata::MetadataMap;

/// Metadata entry carrying the caller deadline, gRPC ASCII timeout format.
pub const GRPC_TIMEOUT_METADATA: &str = "grpc-timeout";

/// Caller-side knobs for one call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub(crate) deadline: Option<Duration>,
    pub(crate) cancel: Option<CancelSignal>,
    pub(crate) metadata: Vec<(String, String)>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts the call with `DeadlineExceeded` once `timeout` has elapsed,
    /// counted from the moment the call is issued.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(timeout);
        self
    }

    /// Aborts the call with `Cancelled` when the paired
    /// [`CancelHandle`] fires.
    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Attaches a custom metadata (header) entry to the request.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub(crate) fn monitor(&self) -> CallMonitor {
        CallMonitor {
            deadline: self.deadline.map(|timeout| Instant::now() + timeout),
            cancel: self.cancel.clone(),
        }
    }
}

/// Caller-held handle that cancels every call watching its signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// Requests cancellation. Idempotent; pending waits observe it promptly.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cloneable receiving side of a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Observes one call and resolves when it must abort.
#[derive(Debug, Clone)]
pub(crate) struct CallMonitor {
    deadline: Option<Instant>,
    cancel: Option<CancelSignal>,
}

impl CallMonitor {
    /// Resolves with the forced terminal outcome. Pends forever when neither
    /// a deadline nor a cancel signal was supplied.
    pub(crate) async fn aborted(&mut self) -> TerminalOutcome {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => futures_util::future::pending().await,
            }
        };
        let cancel = self.cancel.as_mut();
        let cancelled = async move {
            match cancel {
                Some(signal) => {
                    // A dropped handle can never fire; keep waiting on the
                    // deadline instead of misreading the closed channel.
                    if signal.rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        futures_util::future::pending::<()>().await;
                    }
                }
                None => futures_util::future::pending().await,
            }
        };
        tokio::select! {
            _ = expired => TerminalOutcome::DeadlineExceeded,
            _ = cancelled => TerminalOutcome::Cancelled,
        }
    }
}

/// Callee-side view of the caller deadline.
///
/// Long-running handlers are expected to call [`Deadline::check`] at each
/// unit of work and abort early instead of completing wasted work.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Reads the `grpc-timeout` entry, if present. Malformed values are
    /// treated as absent rather than failing the call.
    pub fn from_metadata(metadata: &MetadataMap) -> Option<Self> {
        let raw = metadata.get(GRPC_TIMEOUT_METADATA)?.to_str().ok()?;
        let timeout = parse_grpc_timeout(raw)?;
        Some(Self {
            at: Instant::now() + timeout,
        })
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Cooperative checkpoint for handlers.
    pub fn check(&self) -> Result<(), Status> {
        if self.expired() {
            Err(Status::deadline_exceeded(
                "caller deadline elapsed mid-computation",
            ))
        } else {
            Ok(())
        }
    }
}

/// Formats a timeout in the gRPC ASCII format (value of at most 8 digits
/// followed by a unit). Millisecond precision unless the timeout is finer.
pub(crate) fn format_grpc_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() % 1_000_000 == 0 {
        format!("{}m", timeout.as_millis().min(99_999_999))
    } else {
        format!("{}u", timeout.as_micros().min(99_999_999))
    }
}

pub(crate) fn parse_grpc_timeout(raw: &str) -> Option<Duration> {
    if !raw.is_ascii() || raw.len() < 2 || raw.len() > 9 {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        "M" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "S" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_millis(value)),
        "u" => Some(Duration::from_micros(value)),
        "n" => Some(Duration::from_nanos(value)),
        _ => None,
    }
}
