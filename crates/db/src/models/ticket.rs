use entrypass_core::ticket::{Benefit, Holder, Ticket, TicketStatus};
use entrypass_core::types::Timestamp;
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `tickets` table.
#[derive(Debug, Clone, FromRow)]
pub struct TicketRow {
    pub id: String,
    pub event_id: String,
    pub pin: String,
    pub holder_name: String,
    pub holder_email: Option<String>,
    pub holder_phone: Option<String>,
    pub holder_photo_url: Option<String>,
    pub holder_title: Option<String>,
    pub status: String,
    pub benefits: Json<Vec<Benefit>>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = String;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = TicketStatus::parse(&row.status)
            .ok_or_else(|| format!("ticket {} has unknown status '{}'", row.id, row.status))?;
        Ok(Ticket {
            id: row.id,
            event_id: row.event_id,
            pin: row.pin,
            holder: Holder {
                name: row.holder_name,
                email: row.holder_email,
                phone: row.holder_phone,
                photo_url: row.holder_photo_url,
                title: row.holder_title,
            },
            status,
            benefits: row.benefits.0,
            version: row.version,
        })
    }
}

/// Insert DTO for seeding and administration.
#[derive(Debug, Clone)]
pub struct CreateTicket {
    pub id: String,
    pub event_id: String,
    pub pin: String,
    pub holder: Holder,
    pub benefits: Vec<Benefit>,
}
