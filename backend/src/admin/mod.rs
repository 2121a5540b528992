//! Back-office review queues and interventions

use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::lifecycle::{
    ensure_can_apply, LifecycleEvent, LifecycleManager, ReservationStatus, TransitionRequest,
};
use crate::models::{
    Actor, AdminDashboard, AuditEntityType, AuditNote, CancelReservationRequest, Cotista,
    CreateFraudFlagRequest, Dispute, DisputeOutcome, DisputeStatus, Document, FraudFlag,
    FraudStatus, RefundReservationRequest, Reservation, ResolveDisputeRequest, ReviewDecision,
    StatusCount, Voucher,
};
use crate::store::{
    DisputePatch, NewAuditNote, NewFraudFlag, ReservationStore, COTISTA_COLUMNS,
    DISPUTE_COLUMNS, DOCUMENT_COLUMNS, FRAUD_FLAG_COLUMNS, VOUCHER_COLUMNS,
};

/// Document awaiting review, with its reservation and customer
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PendingDocument {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub document: Document,
    pub reservation_status: ReservationStatus,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PendingCotista {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub cotista: Cotista,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub development_slug: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PendingVoucher {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub voucher: Voucher,
    pub reservation_status: ReservationStatus,
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    pub cotista_name: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ActiveFraudFlag {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub flag: FraudFlag,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn admin_id(admin: &Actor) -> ApiResult<Uuid> {
    match admin.user_id() {
        Some(id) if admin.is_admin() => Ok(id),
        _ => Err(ApiError::Forbidden("Admin access required".to_string())),
    }
}

#[derive(Clone)]
pub struct AdminService {
    db_pool: PgPool,
    store: Arc<dyn ReservationStore>,
    lifecycle: LifecycleManager,
}

impl AdminService {
    pub fn new(db_pool: PgPool, store: Arc<dyn ReservationStore>, lifecycle: LifecycleManager) -> Self {
        Self {
            db_pool,
            store,
            lifecycle,
        }
    }

    async fn reservation(&self, id: Uuid) -> ApiResult<Reservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Reservation {}", id)))
    }

    async fn note(&self, note: NewAuditNote) -> ApiResult<()> {
        self.store.insert_audit_note(note).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------

    pub async fn dashboard(&self) -> ApiResult<AdminDashboard> {
        let (pending_documents, pending_cotistas, pending_vouchers, open_disputes, active_fraud_flags): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents WHERE status = 'under_review'),
                (SELECT COUNT(*) FROM cotistas WHERE status = 'under_review'),
                (SELECT COUNT(*) FROM vouchers WHERE status IN ('sent', 'under_review')),
                (SELECT COUNT(*) FROM disputes WHERE status IN ('open', 'under_review', 'escalated')),
                (SELECT COUNT(*) FROM fraud_flags WHERE status IN ('open', 'investigating'))
            "#,
        )
        .fetch_one(&self.db_pool)
        .await?;

        let reservations_by_status = sqlx::query_as::<_, StatusCount>(
            "SELECT status::text AS status, COUNT(*) AS count FROM reservations \
             GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.db_pool)
        .await?;

        Ok(AdminDashboard {
            pending_documents,
            pending_cotistas,
            pending_vouchers,
            open_disputes,
            active_fraud_flags,
            reservations_by_status,
        })
    }

    pub async fn pending_documents(&self) -> ApiResult<Vec<PendingDocument>> {
        let sql = format!(
            r#"
            SELECT {}, r.status AS reservation_status,
                   u.name AS customer_name, u.email AS customer_email
            FROM documents d
            JOIN reservations r ON r.id = d.reservation_id
            JOIN users u ON u.id = d.customer_id
            WHERE d.status = 'under_review'
            ORDER BY d.created_at DESC
            "#,
            prefixed(DOCUMENT_COLUMNS, "d")
        );
        Ok(sqlx::query_as::<_, PendingDocument>(&sql)
            .fetch_all(&self.db_pool)
            .await?)
    }

    pub async fn pending_cotistas(&self) -> ApiResult<Vec<PendingCotista>> {
        let sql = format!(
            r#"
            SELECT {}, u.name AS user_name, u.email AS user_email, d.slug AS development_slug
            FROM cotistas c
            JOIN users u ON u.id = c.user_id
            JOIN developments d ON d.id = c.development_id
            WHERE c.status = 'under_review'
            ORDER BY c.created_at DESC
            "#,
            prefixed(COTISTA_COLUMNS, "c")
        );
        Ok(sqlx::query_as::<_, PendingCotista>(&sql)
            .fetch_all(&self.db_pool)
            .await?)
    }

    /// Vouchers sent by a cotista and not yet decided
    pub async fn pending_vouchers(&self) -> ApiResult<Vec<PendingVoucher>> {
        let sql = format!(
            r#"
            SELECT {}, r.status AS reservation_status, r.start_date, r.end_date,
                   u.name AS cotista_name
            FROM vouchers v
            JOIN reservations r ON r.id = v.reservation_id
            JOIN cotistas c ON c.id = v.cotista_id
            JOIN users u ON u.id = c.user_id
            WHERE v.status IN ('sent', 'under_review')
            ORDER BY v.created_at DESC
            "#,
            prefixed(VOUCHER_COLUMNS, "v")
        );
        Ok(sqlx::query_as::<_, PendingVoucher>(&sql)
            .fetch_all(&self.db_pool)
            .await?)
    }

    pub async fn open_disputes(&self) -> ApiResult<Vec<Dispute>> {
        let sql = format!(
            "SELECT {} FROM disputes WHERE status = ANY($1) ORDER BY created_at DESC",
            DISPUTE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Dispute>(&sql)
            .bind(DisputeStatus::ACTIVE.to_vec())
            .fetch_all(&self.db_pool)
            .await?)
    }

    /// Most severe first
    pub async fn active_fraud_flags(&self) -> ApiResult<Vec<ActiveFraudFlag>> {
        let sql = format!(
            r#"
            SELECT {}, u.name AS user_name, u.email AS user_email
            FROM fraud_flags f
            LEFT JOIN users u ON u.id = f.user_id
            WHERE f.status IN ('open', 'investigating')
            ORDER BY f.severity DESC, f.created_at DESC
            "#,
            prefixed(FRAUD_FLAG_COLUMNS, "f")
        );
        Ok(sqlx::query_as::<_, ActiveFraudFlag>(&sql)
            .fetch_all(&self.db_pool)
            .await?)
    }

    // ------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------

    /// Approving a cotista also grants the user the cotista role
    pub async fn review_cotista(
        &self,
        admin: Actor,
        cotista_id: Uuid,
        decision: ReviewDecision,
    ) -> ApiResult<Cotista> {
        admin_id(&admin)?;
        let (status, reason) = match &decision {
            ReviewDecision::Approve => ("approved", None),
            ReviewDecision::Reject { reason } if reason.trim().is_empty() => {
                return Err(ApiError::BadRequest(
                    "A rejection reason is required".to_string(),
                ))
            }
            ReviewDecision::Reject { reason } => ("rejected", Some(reason.clone())),
        };

        let mut tx = self.db_pool.begin().await?;
        let sql = format!(
            r#"
            UPDATE cotistas
            SET status = $2::cotista_status, rejection_reason = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'under_review'
            RETURNING {}
            "#,
            COTISTA_COLUMNS
        );
        let cotista = sqlx::query_as::<_, Cotista>(&sql)
            .bind(cotista_id)
            .bind(status)
            .bind(&reason)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(cotista) = cotista else {
            tx.rollback().await?;
            return match self.store.get_cotista(cotista_id).await? {
                Some(_) => Err(ApiError::Conflict(
                    "Cotista is not awaiting review".to_string(),
                )),
                None => Err(ApiError::NotFound(format!("Cotista {}", cotista_id))),
            };
        };

        if decision == ReviewDecision::Approve {
            sqlx::query(
                "UPDATE users SET role = 'cotista', updated_at = NOW() \
                 WHERE id = $1 AND role = 'user'",
            )
            .bind(cotista.user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.note(
            NewAuditNote::new(
                AuditEntityType::Cotista,
                cotista.id,
                admin,
                if reason.is_some() {
                    "cotista_rejected"
                } else {
                    "cotista_approved"
                },
            )
            .with_notes(reason),
        )
        .await?;

        tracing::info!(cotista_id = %cotista.id, status, "Cotista reviewed");
        Ok(cotista)
    }

    /// Closes an active dispute and moves the reservation on
    pub async fn resolve_dispute(
        &self,
        admin: Actor,
        dispute_id: Uuid,
        request: ResolveDisputeRequest,
    ) -> ApiResult<Dispute> {
        let admin_user = admin_id(&admin)?;
        let dispute = self
            .store
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Dispute {}", dispute_id)))?;
        if !DisputeStatus::ACTIVE.contains(&dispute.status) {
            return Err(ApiError::Conflict("Dispute is already closed".to_string()));
        }

        let reservation = self.reservation(dispute.reservation_id).await?;
        let transition = match request.outcome {
            DisputeOutcome::Resume => {
                TransitionRequest::new(LifecycleEvent::DisputeResolved, admin)
                    .reason(request.resolution.clone())
            }
            DisputeOutcome::Cancel => TransitionRequest::new(LifecycleEvent::AdminCancel, admin)
                .cancellation(request.resolution.clone()),
            DisputeOutcome::Refund => {
                let amount = request.refund_amount.unwrap_or(reservation.total_price);
                if amount > reservation.total_price {
                    return Err(ApiError::BadRequest(
                        "Refund exceeds the reservation total".to_string(),
                    ));
                }
                TransitionRequest::new(LifecycleEvent::RefundIssued, admin)
                    .reason(request.resolution.clone())
                    .refund(amount)
            }
        };
        // A reservation that already ended only needs the dispute closed
        let moves_reservation = !reservation.status.is_terminal();
        if moves_reservation {
            ensure_can_apply(reservation.status, &transition.event)?;
        }

        let resolved = self
            .store
            .update_dispute(
                dispute_id,
                &DisputeStatus::ACTIVE,
                DisputePatch {
                    status: DisputeStatus::Resolved,
                    resolution: Some(request.resolution.clone()),
                    resolved_by: Some(admin_user),
                },
            )
            .await?
            .ok_or_else(|| ApiError::Conflict("Dispute is already closed".to_string()))?;

        self.note(
            NewAuditNote::new(AuditEntityType::Dispute, dispute_id, admin, "dispute_resolved")
                .with_notes(Some(request.resolution))
                .with_metadata(json!({ "outcome": format!("{:?}", request.outcome).to_lowercase() })),
        )
        .await?;

        if moves_reservation {
            self.lifecycle
                .transition(dispute.reservation_id, transition)
                .await?;
        }

        Ok(resolved)
    }

    pub async fn escalate_dispute(&self, admin: Actor, dispute_id: Uuid) -> ApiResult<Dispute> {
        admin_id(&admin)?;
        let dispute = self
            .store
            .update_dispute(
                dispute_id,
                &[DisputeStatus::Open, DisputeStatus::UnderReview],
                DisputePatch {
                    status: DisputeStatus::Escalated,
                    resolution: None,
                    resolved_by: None,
                },
            )
            .await?;

        let Some(dispute) = dispute else {
            return match self.store.get_dispute(dispute_id).await? {
                Some(_) => Err(ApiError::Conflict("Dispute cannot be escalated".to_string())),
                None => Err(ApiError::NotFound(format!("Dispute {}", dispute_id))),
            };
        };

        self.note(NewAuditNote::new(
            AuditEntityType::Dispute,
            dispute_id,
            admin,
            "dispute_escalated",
        ))
        .await?;
        Ok(dispute)
    }

    pub async fn create_fraud_flag(
        &self,
        admin: Actor,
        request: CreateFraudFlagRequest,
    ) -> ApiResult<FraudFlag> {
        admin_id(&admin)?;
        let (entity_type, entity_id) = match (request.reservation_id, request.user_id) {
            (Some(reservation_id), _) => {
                self.reservation(reservation_id).await?;
                (AuditEntityType::Reservation, reservation_id)
            }
            (None, Some(user_id)) => (AuditEntityType::User, user_id),
            (None, None) => {
                return Err(ApiError::BadRequest(
                    "A fraud flag needs a user or a reservation".to_string(),
                ))
            }
        };

        let flag = self
            .store
            .insert_fraud_flag(NewFraudFlag {
                user_id: request.user_id,
                reservation_id: request.reservation_id,
                flag_type: request.flag_type,
                severity: request.severity,
                description: request.description,
            })
            .await?;

        self.note(
            NewAuditNote::new(entity_type, entity_id, admin, "fraud_flag_created").with_metadata(
                json!({ "flag_id": flag.id, "flag_type": flag.flag_type, "severity": flag.severity }),
            ),
        )
        .await?;

        tracing::warn!(flag_id = %flag.id, flag_type = %flag.flag_type, "Fraud flag raised");
        Ok(flag)
    }

    /// Moves an active flag to investigating, resolved or false positive
    pub async fn resolve_fraud_flag(
        &self,
        admin: Actor,
        flag_id: Uuid,
        next: FraudStatus,
    ) -> ApiResult<FraudFlag> {
        let admin_user = admin_id(&admin)?;
        let expected: &[FraudStatus] = match next {
            FraudStatus::Investigating => &[FraudStatus::Open],
            FraudStatus::Resolved | FraudStatus::FalsePositive => {
                &[FraudStatus::Open, FraudStatus::Investigating]
            }
            FraudStatus::Open => {
                return Err(ApiError::BadRequest(
                    "A fraud flag cannot be reopened".to_string(),
                ))
            }
        };

        let flag = self
            .store
            .update_fraud_flag(flag_id, expected, next, admin_user)
            .await?
            .ok_or_else(|| ApiError::Conflict("Fraud flag is not active".to_string()))?;

        let (entity_type, entity_id) = match (flag.reservation_id, flag.user_id) {
            (Some(id), _) => (AuditEntityType::Reservation, id),
            (None, Some(id)) => (AuditEntityType::User, id),
            (None, None) => (AuditEntityType::User, admin_user),
        };
        self.note(
            NewAuditNote::new(entity_type, entity_id, admin, "fraud_flag_updated")
                .with_metadata(json!({ "flag_id": flag.id, "status": flag.status })),
        )
        .await?;
        Ok(flag)
    }

    pub async fn cancel_reservation(
        &self,
        admin: Actor,
        reservation_id: Uuid,
        request: CancelReservationRequest,
    ) -> ApiResult<Reservation> {
        admin_id(&admin)?;
        let outcome = self
            .lifecycle
            .transition(
                reservation_id,
                TransitionRequest::new(LifecycleEvent::AdminCancel, admin)
                    .cancellation(request.reason),
            )
            .await?;
        Ok(outcome.reservation)
    }

    /// Records a refund executed in the processor dashboard
    pub async fn refund_reservation(
        &self,
        admin: Actor,
        reservation_id: Uuid,
        request: RefundReservationRequest,
    ) -> ApiResult<Reservation> {
        admin_id(&admin)?;
        let reservation = self.reservation(reservation_id).await?;
        let amount = request.amount.unwrap_or(reservation.total_price);
        if amount > reservation.total_price {
            return Err(ApiError::BadRequest(
                "Refund exceeds the reservation total".to_string(),
            ));
        }

        let mut transition =
            TransitionRequest::new(LifecycleEvent::RefundIssued, admin).refund(amount);
        if let Some(reason) = request.reason {
            transition = transition.reason(reason);
        }
        let outcome = self.lifecycle.transition(reservation_id, transition).await?;
        Ok(outcome.reservation)
    }

    pub async fn audit_trail(
        &self,
        entity_type: AuditEntityType,
        entity_id: Uuid,
    ) -> ApiResult<Vec<AuditNote>> {
        Ok(self.store.list_audit_notes(entity_type, entity_id).await?)
    }
}
