//! Periodic background pass over time-driven transitions

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::{LifecycleEvent, LifecycleManager, TransitionRequest};
use crate::error::ApiResult;
use crate::models::{Actor, AuditEntityType, FraudSeverity, Voucher};
use crate::store::{NewAuditNote, NewFraudFlag, ReservationStore};
use crate::voucher::VoucherService;

pub const VOUCHER_OVERDUE_FLAG: &str = "voucher_deadline_missed";

/// What one pass changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub delivered: usize,
    pub flagged: usize,
    pub completed: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn ReservationStore>,
    lifecycle: LifecycleManager,
    vouchers: VoucherService,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        lifecycle: LifecycleManager,
        vouchers: VoucherService,
    ) -> Self {
        Self {
            store,
            lifecycle,
            vouchers,
        }
    }

    /// Runs every step once. A failing item is logged and skipped so one bad
    /// record cannot stall the rest.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> ApiResult<SweepReport> {
        let mut report = SweepReport::default();

        for voucher in self.store.list_vouchers_awaiting_delivery().await? {
            match self.vouchers.deliver_voucher(voucher.id, Actor::System).await {
                Ok(_) => report.delivered += 1,
                Err(e) => tracing::warn!(voucher_id = %voucher.id, error = %e, "Voucher delivery retry failed"),
            }
        }

        for voucher in self.store.list_overdue_vouchers(now).await? {
            match self.flag_overdue(&voucher).await {
                Ok(true) => report.flagged += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(voucher_id = %voucher.id, error = %e, "Failed to flag overdue voucher"),
            }
        }

        let today = now.date_naive();
        for reservation in self.store.list_reservations_due_for_completion(today).await? {
            let request = TransitionRequest::new(LifecycleEvent::StayCompleted, Actor::System);
            match self.lifecycle.transition(reservation.id, request).await {
                Ok(outcome) if outcome.changed => report.completed += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(reservation_id = %reservation.id, error = %e, "Failed to complete stay"),
            }
        }

        Ok(report)
    }

    async fn flag_overdue(&self, voucher: &Voucher) -> ApiResult<bool> {
        if !self.store.mark_voucher_overdue_flagged(voucher.id).await? {
            return Ok(false);
        }

        let cotista_user = self
            .store
            .get_cotista(voucher.cotista_id)
            .await?
            .map(|c| c.user_id);

        self.store
            .insert_fraud_flag(NewFraudFlag {
                user_id: cotista_user,
                reservation_id: Some(voucher.reservation_id),
                flag_type: VOUCHER_OVERDUE_FLAG.to_string(),
                severity: FraudSeverity::Medium,
                description: format!(
                    "Voucher for reservation {} was not uploaded before {}",
                    voucher.reservation_id, voucher.deadline
                ),
            })
            .await?;

        self.store
            .insert_audit_note(
                NewAuditNote::new(
                    AuditEntityType::Voucher,
                    voucher.id,
                    Actor::System,
                    "voucher_overdue",
                )
                .with_metadata(json!({
                    "reservation_id": voucher.reservation_id,
                    "deadline": voucher.deadline,
                    "status": voucher.status,
                })),
            )
            .await?;

        tracing::warn!(
            voucher_id = %voucher.id,
            reservation_id = %voucher.reservation_id,
            "Voucher deadline missed"
        );
        Ok(true)
    }
}

/// Background loop, one sweep per `interval`
pub async fn run_sweeper(sweeper: Sweeper, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Starting lifecycle sweeper");

    loop {
        tokio::time::sleep(interval).await;

        match sweeper.sweep_once(Utc::now()).await {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(
                    delivered = report.delivered,
                    flagged = report.flagged,
                    completed = report.completed,
                    "Sweep finished"
                );
            }
            Ok(_) => tracing::debug!("Sweep finished with nothing to do"),
            Err(e) => tracing::error!("Sweep failed: {}", e),
        }
    }
}
