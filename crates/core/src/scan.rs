//! Scan-and-resolve pipeline.
//!
//! ```text
//! Idle ──start──> Scanning ──decoded──> Authenticating ──lookup──> Success
//!  ^   <─retry─ CameraUnavailable          │                       Error
//!  └──────────────────────── reset ────────┴───────────────────────────┘
//! ```
//!
//! Frame polling is cooperative: one frame is awaited at a time, and the loop
//! stops as soon as a payload decodes or the cancellation token fires. At most
//! one lookup runs per session.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::VerifyError;
use crate::store::{StoreError, TicketStore};
use crate::ticket::{Event, Ticket};
use crate::types::TicketId;

// ---------------------------------------------------------------------------
// Payload resolution
// ---------------------------------------------------------------------------

/// Extract the ticket ID from a scanned payload.
///
/// A payload that parses as a URL with a host yields its final path segment
/// (query and fragment ignored); anything else is taken verbatim.
pub fn resolve_payload(raw: &str) -> Result<TicketId, VerifyError> {
    let trimmed = raw.trim();
    let candidate = match Url::parse(trimmed) {
        Ok(url) if url.has_host() => url
            .path_segments()
            .and_then(|segments| segments.last())
            .unwrap_or_default()
            .to_string(),
        _ => trimmed.to_string(),
    };

    if candidate.is_empty() {
        Err(VerifyError::UnresolvableId {
            payload: raw.to_string(),
        })
    } else {
        Ok(candidate)
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// A scanned ticket together with its event.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub ticket: Ticket,
    pub event: Event,
}

/// Load a ticket and then its event.
///
/// A ticket whose event is missing reports [`VerifyError::EventNotFound`],
/// distinct from an unknown ticket.
pub async fn load_ticket_and_event(
    store: &dyn TicketStore,
    ticket_id: &str,
) -> Result<Resolved, VerifyError> {
    let ticket = store
        .get_ticket(ticket_id)
        .await
        .map_err(lookup_failed)?
        .ok_or_else(|| VerifyError::TicketNotFound {
            ticket_id: ticket_id.to_string(),
        })?;

    let event = store
        .get_event(&ticket.event_id)
        .await
        .map_err(lookup_failed)?
        .ok_or_else(|| VerifyError::EventNotFound {
            ticket_id: ticket.id.clone(),
            event_id: ticket.event_id.clone(),
        })?;

    Ok(Resolved { ticket, event })
}

fn lookup_failed(err: StoreError) -> VerifyError {
    VerifyError::LookupFailed(err.to_string())
}

// ---------------------------------------------------------------------------
// Camera collaborators
// ---------------------------------------------------------------------------

/// One image frame from the device camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera available")]
    NotFound,

    #[error("camera stream ended")]
    StreamEnded,
}

#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame.
    async fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

pub trait QrDecoder: Send + Sync {
    /// Decoded text, or `None` if the frame holds no readable code.
    fn decode(&self, frame: &Frame) -> Option<String>;
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    /// Permission denied or no hardware. Not an error of the pipeline.
    CameraUnavailable { reason: String },
    Scanning,
    Authenticating { ticket_id: TicketId },
    Success(Box<Resolved>),
    Error(VerifyError),
}

impl ScanState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CameraUnavailable { .. } => "camera_unavailable",
            Self::Scanning => "scanning",
            Self::Authenticating { .. } => "authenticating",
            Self::Success(_) => "success",
            Self::Error(_) => "error",
        }
    }
}

/// Scan state for one operator device.
#[derive(Debug)]
pub struct ScanSession {
    state: ScanState,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// `Idle | CameraUnavailable -> Scanning`. The latter is the manual retry.
    pub fn start_scanning(&mut self) -> Result<(), VerifyError> {
        match self.state {
            ScanState::Idle | ScanState::CameraUnavailable { .. } => {
                self.state = ScanState::Scanning;
                Ok(())
            }
            _ => Err(self.invalid("start scanning")),
        }
    }

    /// `Scanning -> CameraUnavailable`.
    pub fn camera_failed(&mut self, err: &CameraError) -> Result<(), VerifyError> {
        match self.state {
            ScanState::Scanning => {
                self.state = ScanState::CameraUnavailable {
                    reason: err.to_string(),
                };
                Ok(())
            }
            _ => Err(self.invalid("report a camera failure")),
        }
    }

    /// `Scanning -> Authenticating`, or `Scanning -> Error` when the payload
    /// carries no ticket ID.
    pub fn payload_decoded(&mut self, raw: &str) -> Result<TicketId, VerifyError> {
        if !matches!(self.state, ScanState::Scanning) {
            return Err(self.invalid("accept a scanned payload"));
        }
        match resolve_payload(raw) {
            Ok(ticket_id) => {
                self.state = ScanState::Authenticating {
                    ticket_id: ticket_id.clone(),
                };
                Ok(ticket_id)
            }
            Err(err) => {
                self.state = ScanState::Error(err.clone());
                Err(err)
            }
        }
    }

    /// `Authenticating -> Success | Error`.
    pub fn lookup_finished(
        &mut self,
        result: Result<Resolved, VerifyError>,
    ) -> Result<(), VerifyError> {
        if !matches!(self.state, ScanState::Authenticating { .. }) {
            return Err(self.invalid("finish a lookup"));
        }
        self.state = match result {
            Ok(resolved) => ScanState::Success(Box::new(resolved)),
            Err(err) => ScanState::Error(err),
        };
        Ok(())
    }

    /// Any state back to `Idle` ("scan next").
    pub fn reset(&mut self) {
        self.state = ScanState::Idle;
    }

    /// Hand over a settled scan and return to `Idle`.
    ///
    /// `None` while the scan has not settled (`Idle`, `Scanning`,
    /// `Authenticating`); the state is left as it is in that case.
    pub fn take_outcome(&mut self) -> Option<Result<Resolved, VerifyError>> {
        let outcome = match std::mem::replace(&mut self.state, ScanState::Idle) {
            ScanState::Success(resolved) => Ok(*resolved),
            ScanState::Error(err) => Err(err),
            ScanState::CameraUnavailable { reason } => Err(VerifyError::CameraUnavailable(reason)),
            pending => {
                self.state = pending;
                return None;
            }
        };
        Some(outcome)
    }

    fn invalid(&self, action: &'static str) -> VerifyError {
        VerifyError::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run one scan from `Idle` (or `CameraUnavailable`) to a settled state.
///
/// Polls `frames` until `decoder` yields a payload, then resolves and loads
/// the ticket. Cancelling `cancel` while frames are being polled returns the
/// session to `Idle`. The lookup itself is not cancelled once started.
pub async fn run_scan<'s, F, D>(
    session: &'s mut ScanSession,
    frames: &mut F,
    decoder: &D,
    store: &dyn TicketStore,
    cancel: &CancellationToken,
) -> Result<&'s ScanState, VerifyError>
where
    F: FrameSource + ?Sized,
    D: QrDecoder + ?Sized,
{
    session.start_scanning()?;
    tracing::debug!("Scan started");

    let raw = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                session.reset();
                tracing::debug!("Scan cancelled");
                return Ok(session.state());
            }
            next = frames.next_frame() => next,
        };

        match next {
            Ok(frame) => {
                if let Some(raw) = decoder.decode(&frame) {
                    break raw;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "Camera unavailable");
                session.camera_failed(&err)?;
                return Ok(session.state());
            }
        }
    };

    let ticket_id = match session.payload_decoded(&raw) {
        Ok(ticket_id) => ticket_id,
        Err(err) => {
            tracing::info!(error = %err, "Scanned payload did not resolve");
            return Ok(session.state());
        }
    };

    let result = load_ticket_and_event(store, &ticket_id).await;
    match &result {
        Ok(_) => tracing::info!(%ticket_id, "Ticket resolved"),
        Err(err) => tracing::info!(%ticket_id, error = %err, "Ticket lookup failed"),
    }
    session.lookup_finished(result)?;
    Ok(session.state())
}
