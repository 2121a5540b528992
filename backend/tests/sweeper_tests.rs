//! Background sweeper: overdue vouchers, delivery retries, stay completion

mod common;

use chrono::{Duration, Utc};
use common::*;

use temporada_server::lifecycle::sweeper::VOUCHER_OVERDUE_FLAG;
use temporada_server::lifecycle::{ReservationStatus, SweepReport};
use temporada_server::models::{DocumentType, FraudSeverity, ReviewDecision};
use temporada_server::store::ReservationStore;

/// Paid, documents approved, voucher requested
async fn awaiting_voucher(h: &Harness) -> Booking {
    let booking = paid_booking(h).await;
    let reservation_id = booking.reservation.id;
    for document_type in DocumentType::REQUIRED {
        h.state
            .documents
            .upload_customer_document(booking.customer.id, customer_upload(reservation_id, document_type))
            .await
            .unwrap();
    }
    for document in h.store.list_documents(reservation_id).await.unwrap() {
        h.state
            .documents
            .review_document(admin(), document.id, ReviewDecision::Approve)
            .await
            .unwrap();
    }
    assert_eq!(status_of(h, reservation_id).await, ReservationStatus::VoucherPending);
    booking
}

#[tokio::test]
async fn test_idle_sweep_reports_nothing() {
    let h = harness();
    let report = h.state.sweeper().sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report, SweepReport::default());
}

#[tokio::test]
async fn test_overdue_voucher_is_flagged_once() {
    let h = harness();
    let booking = awaiting_voucher(&h).await;
    let voucher = h
        .store
        .get_voucher_by_reservation(booking.reservation.id)
        .await
        .unwrap()
        .unwrap();

    let report = h.state.sweeper().sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.flagged, 0, "deadline not reached yet");

    h.store
        .set_voucher_deadline(voucher.id, Utc::now() - Duration::hours(1))
        .await;

    let report = h.state.sweeper().sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.flagged, 1);
    let report = h.state.sweeper().sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.flagged, 0);

    let flags = h.store.fraud_flags().await;
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].flag_type, VOUCHER_OVERDUE_FLAG);
    assert_eq!(flags[0].severity, FraudSeverity::Medium);
    assert_eq!(flags[0].user_id, Some(booking.cotista_user_id));
    assert_eq!(flags[0].reservation_id, Some(booking.reservation.id));

    // Flagging does not move the reservation
    assert_eq!(
        status_of(&h, booking.reservation.id).await,
        ReservationStatus::VoucherPending
    );
}

#[tokio::test]
async fn test_stay_is_not_completed_before_voucher_delivery() {
    let h = harness();
    let booking = awaiting_voucher(&h).await;

    let voucher = h
        .store
        .get_voucher_by_reservation(booking.reservation.id)
        .await
        .unwrap()
        .unwrap();
    let long_after = date(12, 1).and_hms_opt(0, 0, 0).unwrap().and_utc();
    h.store
        .set_voucher_deadline(voucher.id, long_after + Duration::days(1))
        .await;

    let report = h.state.sweeper().sweep_once(long_after).await.unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(
        status_of(&h, booking.reservation.id).await,
        ReservationStatus::VoucherPending
    );
}
