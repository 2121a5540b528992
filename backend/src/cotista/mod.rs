//! Cotista registration, availability and dashboard

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    Actor, AuditEntityType, AvailabilitySlot, Cotista, CotistaStatus, Reservation,
};
use crate::store::{NewAuditNote, ReservationStore, COTISTA_COLUMNS, RESERVATION_COLUMNS};

const AVAILABILITY_COLUMNS: &str = "a.id, a.cotista_id, a.development_id, a.start_date, \
    a.end_date, a.price_per_night, a.is_published, a.is_booked, c.status AS cotista_status";

/// POST /api/cotista/register
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterCotistaRequest {
    pub development_id: Uuid,
    pub personal_data: Option<serde_json::Value>,
    #[validate(length(max = 2048))]
    pub ownership_proof: Option<String>,
    pub bank_details: Option<serde_json::Value>,
    #[validate(length(max = 2048))]
    pub address_proof: Option<String>,
    pub identity_documents: Option<serde_json::Value>,
    pub terms_accepted: bool,
}

/// POST /api/cotista/availability
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAvailabilityRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[validate(range(min = 1))]
    pub price_per_night: i64,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetPublishedRequest {
    pub is_published: bool,
}

#[derive(Debug, Serialize, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct CotistaDashboard {
    pub total_reservations: i64,
    pub pending_vouchers: i64,
    pub active_reservations: i64,
}

#[derive(Clone)]
pub struct CotistaService {
    db_pool: PgPool,
    store: Arc<dyn ReservationStore>,
}

impl CotistaService {
    pub fn new(db_pool: PgPool, store: Arc<dyn ReservationStore>) -> Self {
        Self { db_pool, store }
    }

    /// Creates the caller's cotista profile in `under_review`
    pub async fn register(
        &self,
        actor: Actor,
        request: RegisterCotistaRequest,
    ) -> ApiResult<Cotista> {
        let user_id = actor
            .user_id()
            .ok_or_else(|| ApiError::Forbidden("A user is required".to_string()))?;
        if !request.terms_accepted {
            return Err(ApiError::BadRequest(
                "Terms must be accepted to register".to_string(),
            ));
        }

        match self.store.get_development(request.development_id).await? {
            Some(development) if development.is_active => {}
            _ => {
                return Err(ApiError::NotFound(format!(
                    "Development {}",
                    request.development_id
                )))
            }
        }

        let sql = format!(
            r#"
            INSERT INTO cotistas (id, user_id, development_id, status, personal_data,
                                  ownership_proof, bank_details, address_proof,
                                  identity_documents, terms_accepted, terms_accepted_at)
            VALUES ($1, $2, $3, 'under_review', $4, $5, $6, $7, $8, TRUE, $9)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {}
            "#,
            COTISTA_COLUMNS
        );
        let cotista = sqlx::query_as::<_, Cotista>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(request.development_id)
            .bind(request.personal_data)
            .bind(request.ownership_proof)
            .bind(request.bank_details)
            .bind(request.address_proof)
            .bind(request.identity_documents)
            .bind(Utc::now())
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| {
                ApiError::Conflict("A cotista profile already exists for this user".to_string())
            })?;

        self.store
            .insert_audit_note(
                NewAuditNote::new(
                    AuditEntityType::Cotista,
                    cotista.id,
                    actor,
                    "cotista_registered",
                )
                .with_metadata(json!({ "development_id": cotista.development_id })),
            )
            .await?;

        tracing::info!(cotista_id = %cotista.id, user_id = %user_id, "Cotista registered");
        Ok(cotista)
    }

    pub async fn reservations(&self, cotista: &Cotista) -> ApiResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {} FROM reservations WHERE cotista_id = $1 ORDER BY created_at DESC",
            RESERVATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(cotista.id)
            .fetch_all(&self.db_pool)
            .await?)
    }

    pub async fn dashboard(&self, cotista: &Cotista) -> ApiResult<CotistaDashboard> {
        Ok(sqlx::query_as::<_, CotistaDashboard>(
            r#"
            SELECT COUNT(*) AS total_reservations,
                   COUNT(*) FILTER (WHERE status IN ('voucher_pending', 'approved'))
                       AS pending_vouchers,
                   COUNT(*) FILTER (WHERE status NOT IN ('completed', 'cancelled', 'refunded'))
                       AS active_reservations
            FROM reservations
            WHERE cotista_id = $1
            "#,
        )
        .bind(cotista.id)
        .fetch_one(&self.db_pool)
        .await?)
    }

    pub async fn availability(&self, cotista: &Cotista) -> ApiResult<Vec<AvailabilitySlot>> {
        let sql = format!(
            "SELECT {} FROM cotista_availability a JOIN cotistas c ON c.id = a.cotista_id \
             WHERE a.cotista_id = $1 ORDER BY a.start_date",
            AVAILABILITY_COLUMNS
        );
        Ok(sqlx::query_as::<_, AvailabilitySlot>(&sql)
            .bind(cotista.id)
            .fetch_all(&self.db_pool)
            .await?)
    }

    /// Adds a date range for the cotista's development. Only approved
    /// cotistas can offer nights.
    pub async fn create_availability(
        &self,
        cotista: &Cotista,
        request: CreateAvailabilityRequest,
    ) -> ApiResult<AvailabilitySlot> {
        if cotista.status != CotistaStatus::Approved {
            return Err(ApiError::Forbidden(
                "Cotista profile is not approved".to_string(),
            ));
        }
        if request.end_date <= request.start_date {
            return Err(ApiError::BadRequest(
                "End date must be after start date".to_string(),
            ));
        }

        let overlapping: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM cotista_availability
                WHERE cotista_id = $1 AND start_date < $3 AND end_date > $2
            )
            "#,
        )
        .bind(cotista.id)
        .bind(request.start_date)
        .bind(request.end_date)
        .fetch_one(&self.db_pool)
        .await?;
        if overlapping {
            return Err(ApiError::Conflict(
                "Availability overlaps an existing range".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO cotista_availability
                (id, cotista_id, development_id, start_date, end_date, price_per_night, is_published)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(cotista.id)
        .bind(cotista.development_id)
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(request.price_per_night)
        .bind(request.is_published)
        .execute(&self.db_pool)
        .await?;

        tracing::info!(
            cotista_id = %cotista.id,
            availability_id = %id,
            start = %request.start_date,
            end = %request.end_date,
            "Availability created"
        );

        self.store
            .get_availability(id)
            .await?
            .ok_or_else(|| ApiError::InternalError("Availability vanished after insert".to_string()))
    }

    /// Booked ranges stay as they are
    pub async fn set_published(
        &self,
        cotista: &Cotista,
        availability_id: Uuid,
        is_published: bool,
    ) -> ApiResult<AvailabilitySlot> {
        let result = sqlx::query(
            r#"
            UPDATE cotista_availability
            SET is_published = $3, updated_at = NOW()
            WHERE id = $1 AND cotista_id = $2 AND is_booked = FALSE
            "#,
        )
        .bind(availability_id)
        .bind(cotista.id)
        .bind(is_published)
        .execute(&self.db_pool)
        .await?;

        let slot = self
            .store
            .get_availability(availability_id)
            .await?
            .filter(|slot| slot.cotista_id == cotista.id)
            .ok_or_else(|| ApiError::NotFound(format!("Availability {}", availability_id)))?;

        if result.rows_affected() == 0 {
            return Err(ApiError::Conflict(
                "Booked availability cannot be changed".to_string(),
            ));
        }
        Ok(slot)
    }
}
