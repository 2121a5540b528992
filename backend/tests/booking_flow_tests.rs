//! End-to-end reservation lifecycle over the in-memory store

mod common;

use common::*;
use serde_json::json;

use temporada_server::error::ApiError;
use temporada_server::lifecycle::ReservationStatus;
use temporada_server::models::{
    Actor, CheckoutSessionRequest, DisputeOutcome, DocumentStatus, DocumentType, OpenDisputeRequest,
    PaymentStatus, RefundReservationRequest, ResolveDisputeRequest, ReviewDecision, UserRole,
    VoucherStatus, VoucherUpload,
};
use temporada_server::payment::WebhookAck;
use temporada_server::store::ReservationStore;

#[tokio::test]
async fn test_reservation_runs_from_booking_to_completed_stay() {
    let h = harness();
    let booking = book(&h).await;
    let reservation_id = booking.reservation.id;
    assert_eq!(booking.reservation.status, ReservationStatus::Created);
    assert_eq!(booking.reservation.total_price, 35_000);

    let checkout = h
        .state
        .payments
        .create_checkout_session(
            &booking.customer,
            CheckoutSessionRequest {
                reservation_id,
                development_id: booking.seeded.development_id,
            },
            None,
        )
        .await
        .unwrap();
    assert!(checkout.url.is_some());
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::PaymentPending);
    {
        let checkouts = h.gateway.checkouts.lock().await;
        assert_eq!(checkouts.len(), 1);
        assert_eq!(checkouts[0].amount, 35_000);
        assert!(checkouts[0]
            .success_url
            .starts_with("http://localhost:3000/reservations/"));
    }

    let paid = checkout_completed("evt_paid_1", reservation_id, 35_000);
    assert_eq!(deliver(&h, &paid).await, WebhookAck::Received);
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::Paid);

    let customer_id = booking.customer.id;
    h.state
        .documents
        .upload_customer_document(customer_id, customer_upload(reservation_id, DocumentType::Identity))
        .await
        .unwrap();
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::DocumentsPending);
    h.state
        .documents
        .upload_customer_document(
            customer_id,
            customer_upload(reservation_id, DocumentType::AddressProof),
        )
        .await
        .unwrap();
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::DocumentsUnderReview
    );

    let documents = h.store.list_documents(reservation_id).await.unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().all(|d| d.status == DocumentStatus::UnderReview));

    let reviewer = admin();
    h.state
        .documents
        .review_document(reviewer, documents[0].id, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::DocumentsUnderReview
    );
    h.state
        .documents
        .review_document(reviewer, documents[1].id, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::VoucherPending);

    let voucher = h
        .store
        .get_voucher_by_reservation(reservation_id)
        .await
        .unwrap()
        .expect("voucher requested on approval");
    assert_eq!(voucher.status, VoucherStatus::Pending);

    h.state
        .vouchers
        .upload_voucher(
            &booking.seeded.cotista,
            VoucherUpload {
                reservation_id,
                notes: Some("Check-in after 3pm".to_string()),
                file: pdf(),
            },
        )
        .await
        .unwrap();
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::VoucherSent);

    h.state.vouchers.start_review(reviewer, voucher.id).await.unwrap();
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::VoucherUnderReview
    );

    let delivered = h
        .state
        .vouchers
        .review_voucher(reviewer, voucher.id, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(delivered.status, VoucherStatus::Delivered);
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::VoucherDelivered
    );

    let before_checkout = date(7, 8).and_hms_opt(9, 0, 0).unwrap().and_utc();
    let report = h.state.sweeper().sweep_once(before_checkout).await.unwrap();
    assert_eq!(report.completed, 0);

    let after_stay = date(7, 9).and_hms_opt(12, 0, 0).unwrap().and_utc();
    let report = h.state.sweeper().sweep_once(after_stay).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::Completed);
}

#[tokio::test]
async fn test_redelivered_webhook_is_applied_once() {
    let h = harness();
    let booking = book(&h).await;
    let event = checkout_completed("evt_dup", booking.reservation.id, 35_000);

    assert_eq!(deliver(&h, &event).await, WebhookAck::Received);
    assert_eq!(deliver(&h, &event).await, WebhookAck::Duplicate);

    let payments = h.store.list_payments(booking.reservation.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, 35_000);
    assert_eq!(payments[0].status, PaymentStatus::Completed);
    assert_eq!(status_of(&h, booking.reservation.id).await, ReservationStatus::Paid);
}

#[tokio::test]
async fn test_unsettled_checkout_waits_for_async_payment() {
    let h = harness();
    let booking = book(&h).await;
    let reservation_id = booking.reservation.id;

    let mut pending = checkout_completed("evt_async_1", reservation_id, 35_000);
    pending["data"]["object"]["payment_status"] = json!("unpaid");
    assert_eq!(deliver(&h, &pending).await, WebhookAck::Received);
    assert!(h.store.list_payments(reservation_id).await.unwrap().is_empty());
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::Created);

    let mut settled = checkout_completed("evt_async_2", reservation_id, 35_000);
    settled["type"] = json!("checkout.session.async_payment_succeeded");
    assert_eq!(deliver(&h, &settled).await, WebhookAck::Received);
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::Paid);
}

#[tokio::test]
async fn test_checkout_without_currency_uses_reservation_currency() {
    let h = harness();
    let booking = book(&h).await;

    let mut event = checkout_completed("evt_no_currency", booking.reservation.id, 35_000);
    event["data"]["object"]
        .as_object_mut()
        .unwrap()
        .remove("currency");
    assert_eq!(deliver(&h, &event).await, WebhookAck::Received);

    let payments = h.store.list_payments(booking.reservation.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].currency, booking.reservation.currency);
}

#[tokio::test]
async fn test_failed_payment_can_be_retried() {
    let h = harness();
    let booking = book(&h).await;
    let reservation_id = booking.reservation.id;

    let failed = json!({
        "id": "evt_failed",
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": "pi_declined",
            "amount": 35_000,
            "currency": "usd",
            "metadata": { "reservation_id": reservation_id.to_string() },
            "last_payment_error": { "message": "Your card was declined." }
        }}
    });
    assert_eq!(deliver(&h, &failed).await, WebhookAck::Received);
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::AwaitingPayment
    );

    let paid = checkout_completed("evt_retry", reservation_id, 35_000);
    assert_eq!(deliver(&h, &paid).await, WebhookAck::Received);
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::Paid);
}

#[tokio::test]
async fn test_dashboard_test_events_are_only_verified() {
    let h = harness();
    let booking = book(&h).await;
    let event = checkout_completed("evt_test_ping", booking.reservation.id, 35_000);

    assert_eq!(deliver(&h, &event).await, WebhookAck::Verified);
    assert!(h.store.webhook_result("evt_test_ping").await.is_none());
    assert_eq!(
        status_of(&h, booking.reservation.id).await,
        ReservationStatus::Created
    );
}

#[tokio::test]
async fn test_unknown_event_types_are_acknowledged() {
    let h = harness();
    let event = json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    });
    assert_eq!(deliver(&h, &event).await, WebhookAck::Received);
}

#[tokio::test]
async fn test_rejected_documents_can_be_replaced() {
    let h = harness();
    let booking = paid_booking(&h).await;
    let reservation_id = booking.reservation.id;
    let customer_id = booking.customer.id;

    for document_type in DocumentType::REQUIRED {
        h.state
            .documents
            .upload_customer_document(customer_id, customer_upload(reservation_id, document_type))
            .await
            .unwrap();
    }
    let documents = h.store.list_documents(reservation_id).await.unwrap();
    let identity = documents
        .iter()
        .find(|d| d.document_type == DocumentType::Identity)
        .unwrap();

    let err = h
        .state
        .documents
        .review_document(
            admin(),
            identity.id,
            ReviewDecision::Reject {
                reason: "  ".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    h.state
        .documents
        .review_document(
            admin(),
            identity.id,
            ReviewDecision::Reject {
                reason: "Photo is blurred".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::DocumentsRejected
    );

    h.state
        .documents
        .upload_customer_document(customer_id, customer_upload(reservation_id, DocumentType::Identity))
        .await
        .unwrap();
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::DocumentsUnderReview
    );
}

#[tokio::test]
async fn test_dispute_resumes_previous_status() {
    let h = harness();
    let booking = paid_booking(&h).await;
    let reservation_id = booking.reservation.id;
    let customer = Actor::user(booking.customer.id, UserRole::User);

    let dispute = h
        .state
        .reservations
        .open_dispute(
            customer,
            None,
            reservation_id,
            OpenDisputeRequest {
                reason: "Listing mismatch".to_string(),
                description: "The unit size differs from the listing".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(dispute.reported_against, Some(booking.cotista_user_id));
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::InDispute);

    let again = h
        .state
        .reservations
        .open_dispute(
            customer,
            None,
            reservation_id,
            OpenDisputeRequest {
                reason: "Second report".to_string(),
                description: "Opening another dispute while one is open".to_string(),
            },
        )
        .await;
    assert!(matches!(again, Err(ApiError::InvalidTransition(_))));

    h.state
        .admin
        .resolve_dispute(
            admin(),
            dispute.id,
            ResolveDisputeRequest {
                outcome: DisputeOutcome::Resume,
                resolution: "Confirmed with the cotista".to_string(),
                refund_amount: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::Paid);
}

#[tokio::test]
async fn test_refund_requires_a_completed_payment() {
    let h = harness();
    let unpaid = book(&h).await;
    let err = h
        .state
        .admin
        .refund_reservation(
            admin(),
            unpaid.reservation.id,
            RefundReservationRequest {
                amount: None,
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidTransition(_)));

    let paid = paid_booking(&h).await;
    let too_much = h
        .state
        .admin
        .refund_reservation(
            admin(),
            paid.reservation.id,
            RefundReservationRequest {
                amount: Some(paid.reservation.total_price + 1),
                reason: None,
            },
        )
        .await;
    assert!(matches!(too_much, Err(ApiError::BadRequest(_))));

    let refunded = h
        .state
        .admin
        .refund_reservation(
            admin(),
            paid.reservation.id,
            RefundReservationRequest {
                amount: Some(10_000),
                reason: Some("Partial refund agreed".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(refunded.status, ReservationStatus::Refunded);
    assert_eq!(refunded.refund_amount, Some(10_000));
}

#[tokio::test]
async fn test_late_document_holds_approval_until_reviewed() {
    let h = harness();
    let booking = paid_booking(&h).await;
    let reservation_id = booking.reservation.id;
    let customer_id = booking.customer.id;

    for document_type in [DocumentType::Identity, DocumentType::AddressProof, DocumentType::Identity] {
        h.state
            .documents
            .upload_customer_document(customer_id, customer_upload(reservation_id, document_type))
            .await
            .unwrap();
    }
    let documents = h.store.list_documents(reservation_id).await.unwrap();
    assert_eq!(documents.len(), 3);

    for document in &documents[..2] {
        h.state
            .documents
            .review_document(admin(), document.id, ReviewDecision::Approve)
            .await
            .unwrap();
    }
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::DocumentsUnderReview
    );

    h.state
        .documents
        .review_document(admin(), documents[2].id, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::VoucherPending);
    let statuses: Vec<_> = h
        .store
        .list_documents(reservation_id)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.status)
        .collect();
    assert!(statuses.iter().all(|s| *s == DocumentStatus::Approved));
}

#[tokio::test]
async fn test_document_review_is_undone_when_reservation_does_not_move() {
    let h = harness();
    let booking = paid_booking(&h).await;
    let reservation_id = booking.reservation.id;

    for document_type in DocumentType::REQUIRED {
        h.state
            .documents
            .upload_customer_document(booking.customer.id, customer_upload(reservation_id, document_type))
            .await
            .unwrap();
    }
    let documents = h.store.list_documents(reservation_id).await.unwrap();
    h.state
        .documents
        .review_document(admin(), documents[0].id, ReviewDecision::Approve)
        .await
        .unwrap();

    h.store.lose_next_transition();
    let err = h
        .state
        .documents
        .review_document(admin(), documents[1].id, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)), "{:?}", err);

    let last = h.store.get_document(documents[1].id).await.unwrap().unwrap();
    assert_eq!(last.status, DocumentStatus::UnderReview);
    assert!(last.reviewed_by.is_none());
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::DocumentsUnderReview
    );

    h.state
        .documents
        .review_document(admin(), documents[1].id, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::VoucherPending);
}

#[tokio::test]
async fn test_voucher_changes_are_undone_when_reservation_does_not_move() {
    let h = harness();
    let booking = paid_booking(&h).await;
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
    let voucher = h
        .store
        .get_voucher_by_reservation(reservation_id)
        .await
        .unwrap()
        .unwrap();
    let upload = || VoucherUpload {
        reservation_id,
        notes: None,
        file: pdf(),
    };

    let stored_before = h.objects.len().await;
    h.store.lose_next_transition();
    assert!(h
        .state
        .vouchers
        .upload_voucher(&booking.seeded.cotista, upload())
        .await
        .is_err());
    let restored = h.store.get_voucher(voucher.id).await.unwrap().unwrap();
    assert_eq!(restored.status, VoucherStatus::Pending);
    assert!(restored.file_key.is_none());
    assert_eq!(h.objects.len().await, stored_before);
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::VoucherPending);

    h.state
        .vouchers
        .upload_voucher(&booking.seeded.cotista, upload())
        .await
        .unwrap();

    h.store.lose_next_transition();
    assert!(h.state.vouchers.start_review(admin(), voucher.id).await.is_err());
    let restored = h.store.get_voucher(voucher.id).await.unwrap().unwrap();
    assert_eq!(restored.status, VoucherStatus::Sent);
    assert_eq!(status_of(&h, reservation_id).await, ReservationStatus::VoucherSent);

    h.state.vouchers.start_review(admin(), voucher.id).await.unwrap();
    assert_eq!(
        status_of(&h, reservation_id).await,
        ReservationStatus::VoucherUnderReview
    );
}
