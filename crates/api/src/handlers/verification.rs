//! Handlers for the staff verification flow.
//!
//! A verification is opened by submitting a scanned payload, unlocked with
//! the holder's PIN and then used to redeem benefits or toggle the ticket
//! status. Benefit details are only returned once the session is unlocked.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, Utc};
use entrypass_core::pin::GuardState;
use entrypass_core::redemption::VerificationSession;
use entrypass_core::scan::{load_ticket_and_event, ScanSession};
use entrypass_core::schedule::{BenefitView, DayOverview};
use entrypass_core::ticket::{Benefit, Holder, TicketStatus};
use entrypass_core::types::{BenefitId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::RequireStaff;
use crate::response::DataResponse;
use crate::sessions::SessionEntry;
use crate::state::AppState;

/// Longest scan payload accepted. QR codes top out well below this.
const MAX_PAYLOAD_LEN: usize = 4096;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// Decoded QR text: a ticket URL or a bare ticket ID.
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pin: String,
}

#[derive(Debug, Serialize)]
pub struct TicketView {
    pub id: String,
    pub event_id: String,
    pub status: TicketStatus,
    pub holder: Holder,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct EventView {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct VerificationView {
    pub id: Uuid,
    pub authorized: bool,
    pub failed_pin_attempts: u32,
    pub pin_locked_until: Option<Timestamp>,
    pub ticket: TicketView,
    pub event: EventView,
    /// Local calendar date at the venue.
    pub today: NaiveDate,
    /// Event day number of `today`, absent before the event starts.
    pub day: Option<u32>,
    /// Today's benefits. Present once authorized.
    pub benefits: Option<Vec<BenefitView>>,
    /// Every event day. Present once authorized.
    pub schedule: Option<Vec<DayOverview>>,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub benefit: Benefit,
    pub verification: VerificationView,
}

#[derive(Debug, Serialize)]
pub struct BulkRedeemResponse {
    /// Benefits marked by this request. Empty if nothing was eligible.
    pub marked: Vec<BenefitId>,
    pub verification: VerificationView,
}

fn view(id: Uuid, session: &VerificationSession, now: Timestamp) -> VerificationView {
    let ticket = session.ticket();
    let event = session.event();
    let today = session.today(now);
    let authorized = session.is_authorized();

    let (failed_pin_attempts, pin_locked_until) = match session.guard_state() {
        GuardState::Unauthorized {
            failed_attempts,
            locked_until,
        } => (*failed_attempts, locked_until.filter(|until| *until > now)),
        GuardState::Authorized(_) => (0, None),
    };

    VerificationView {
        id,
        authorized,
        failed_pin_attempts,
        pin_locked_until,
        ticket: TicketView {
            id: ticket.id.clone(),
            event_id: ticket.event_id.clone(),
            status: ticket.status,
            holder: ticket.holder.clone(),
            version: ticket.version,
        },
        event: EventView {
            id: event.id.clone(),
            name: event.name.clone(),
            start_date: event.start_date,
            end_date: event.end_date,
        },
        today: today.date,
        day: today.offset,
        benefits: authorized.then(|| session.today_overview(now)),
        schedule: authorized.then(|| session.schedule_overview(now)),
    }
}

/// Look up a session and check the caller may use it.
async fn open_entry(state: &AppState, id: Uuid, user: &AuthUser) -> AppResult<Arc<SessionEntry>> {
    let entry = state.sessions.get(id).await?;
    entry.ensure_access(user)?;
    Ok(entry)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// POST /api/v1/verifications
///
/// Resolve a scanned payload, load the ticket and its event, and open a
/// verification session for them.
pub async fn create_verification(
    RequireStaff(user): RequireStaff,
    State(state): State<AppState>,
    Json(input): Json<ScanRequest>,
) -> AppResult<impl IntoResponse> {
    if input.payload.len() > MAX_PAYLOAD_LEN {
        return Err(AppError::BadRequest(format!(
            "payload exceeds {MAX_PAYLOAD_LEN} bytes"
        )));
    }

    let mut scan = ScanSession::new();
    scan.start_scanning()?;
    if let Ok(ticket_id) = scan.payload_decoded(&input.payload) {
        let result = load_ticket_and_event(state.store.as_ref(), &ticket_id).await;
        scan.lookup_finished(result)?;
    }
    let resolved = scan
        .take_outcome()
        .ok_or_else(|| AppError::InternalError("scan did not settle".into()))??;

    let ticket_id = resolved.ticket.id.clone();
    let now = Utc::now();
    let session = VerificationSession::new(resolved, state.config.pin_policy);
    let id = state.sessions.open(&user.user_id, session, now).await;

    tracing::info!(
        verification_id = %id,
        %ticket_id,
        user_id = %user.user_id,
        "Verification opened",
    );

    let entry = state.sessions.get(id).await?;
    let slot = entry.try_acquire()?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: view(id, &slot.session, now),
        }),
    ))
}

/// GET /api/v1/verifications/{id}
pub async fn get_verification(
    RequireStaff(user): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let entry = open_entry(&state, id, &user).await?;
    let mut slot = entry.try_acquire()?;
    let now = Utc::now();
    slot.last_active = now;
    Ok(Json(DataResponse {
        data: view(id, &slot.session, now),
    }))
}

/// DELETE /api/v1/verifications/{id}
///
/// "Scan next": discard the session. Returns 204.
pub async fn close_verification(
    RequireStaff(user): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    open_entry(&state, id, &user).await?;
    state.sessions.close(id).await;
    tracing::info!(verification_id = %id, user_id = %user.user_id, "Verification closed");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// PIN
// ---------------------------------------------------------------------------

/// POST /api/v1/verifications/{id}/authorize
pub async fn authorize(
    RequireStaff(user): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PinRequest>,
) -> AppResult<impl IntoResponse> {
    let entry = open_entry(&state, id, &user).await?;
    let mut slot = entry.try_acquire()?;
    let now = Utc::now();
    slot.last_active = now;

    slot.session.authorize(&input.pin, now)?;
    Ok(Json(DataResponse {
        data: view(id, &slot.session, now),
    }))
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// POST /api/v1/verifications/{id}/benefits/{benefit_id}/redeem
pub async fn redeem_benefit(
    RequireStaff(user): RequireStaff,
    State(state): State<AppState>,
    Path((id, benefit_id)): Path<(Uuid, String)>,
) -> AppResult<impl IntoResponse> {
    let entry = open_entry(&state, id, &user).await?;
    let mut slot = entry.try_acquire()?;
    let now = Utc::now();
    slot.last_active = now;

    let benefit = slot
        .session
        .redeem(state.store.as_ref(), &benefit_id, now)
        .await?;

    Ok(Json(DataResponse {
        data: RedeemResponse {
            benefit,
            verification: view(id, &slot.session, now),
        },
    }))
}

/// POST /api/v1/verifications/{id}/redeem-all
///
/// Requires the PIN again, even on an authorized session.
pub async fn redeem_all(
    RequireStaff(user): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PinRequest>,
) -> AppResult<impl IntoResponse> {
    let entry = open_entry(&state, id, &user).await?;
    let mut slot = entry.try_acquire()?;
    let now = Utc::now();
    slot.last_active = now;

    let confirmation = slot.session.confirm_bulk(&input.pin, now)?;
    let marked = slot
        .session
        .redeem_all_today(state.store.as_ref(), confirmation, now)
        .await?;

    Ok(Json(DataResponse {
        data: BulkRedeemResponse {
            marked,
            verification: view(id, &slot.session, now),
        },
    }))
}

/// POST /api/v1/verifications/{id}/status/toggle
pub async fn toggle_status(
    RequireStaff(user): RequireStaff,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let entry = open_entry(&state, id, &user).await?;
    let mut slot = entry.try_acquire()?;
    let now = Utc::now();
    slot.last_active = now;

    let status = slot.session.toggle_status(state.store.as_ref()).await?;
    tracing::info!(verification_id = %id, user_id = %user.user_id, %status, "Ticket status toggled");

    Ok(Json(DataResponse {
        data: view(id, &slot.session, now),
    }))
}
