//! Reservation status table.
//!
//! Every status change a reservation can undergo is listed in [`next_status`].
//! Pairs missing from the table are rejected; guarded edges consult a
//! [`TransitionContext`] the caller fills from the store.

use serde::{Deserialize, Serialize};

/// Reservation status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Created,
    AwaitingPayment,
    PaymentPending,
    Paid,
    DocumentsPending,
    DocumentsUnderReview,
    DocumentsRejected,
    Approved,
    VoucherPending,
    VoucherSent,
    VoucherUnderReview,
    VoucherRejected,
    VoucherDelivered,
    Completed,
    Refunded,
    Cancelled,
    InDispute,
}

use ReservationStatus::*;

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 17] = [
        Created,
        AwaitingPayment,
        PaymentPending,
        Paid,
        DocumentsPending,
        DocumentsUnderReview,
        DocumentsRejected,
        Approved,
        VoucherPending,
        VoucherSent,
        VoucherUnderReview,
        VoucherRejected,
        VoucherDelivered,
        Completed,
        Refunded,
        Cancelled,
        InDispute,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Completed | Refunded | Cancelled)
    }

    /// Still waiting for money
    pub fn is_awaiting_payment(&self) -> bool {
        matches!(self, Created | AwaitingPayment | PaymentPending)
    }

    /// Money has been received and the stay is still in progress
    pub fn is_post_payment(&self) -> bool {
        matches!(
            self,
            Paid | DocumentsPending
                | DocumentsUnderReview
                | DocumentsRejected
                | Approved
                | VoucherPending
                | VoucherSent
                | VoucherUnderReview
                | VoucherRejected
                | VoucherDelivered
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Created => "created",
            AwaitingPayment => "awaiting_payment",
            PaymentPending => "payment_pending",
            Paid => "paid",
            DocumentsPending => "documents_pending",
            DocumentsUnderReview => "documents_under_review",
            DocumentsRejected => "documents_rejected",
            Approved => "approved",
            VoucherPending => "voucher_pending",
            VoucherSent => "voucher_sent",
            VoucherUnderReview => "voucher_under_review",
            VoucherRejected => "voucher_rejected",
            VoucherDelivered => "voucher_delivered",
            Completed => "completed",
            Refunded => "refunded",
            Cancelled => "cancelled",
            InDispute => "in_dispute",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    CheckoutStarted,
    PaymentSucceeded { external_payment_id: String },
    PaymentFailed { external_payment_id: String },
    DocumentUploaded,
    DocumentsSubmitted,
    DocumentApproved,
    DocumentRejected,
    VoucherRequested,
    VoucherUploaded,
    VoucherReviewStarted,
    VoucherApproved,
    VoucherRejected,
    VoucherDelivered,
    StayCompleted,
    DisputeOpened,
    DisputeResolved,
    AdminCancel,
    RefundIssued,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::CheckoutStarted => "checkout_started",
            LifecycleEvent::PaymentSucceeded { .. } => "payment_succeeded",
            LifecycleEvent::PaymentFailed { .. } => "payment_failed",
            LifecycleEvent::DocumentUploaded => "document_uploaded",
            LifecycleEvent::DocumentsSubmitted => "documents_submitted",
            LifecycleEvent::DocumentApproved => "document_approved",
            LifecycleEvent::DocumentRejected => "document_rejected",
            LifecycleEvent::VoucherRequested => "voucher_requested",
            LifecycleEvent::VoucherUploaded => "voucher_uploaded",
            LifecycleEvent::VoucherReviewStarted => "voucher_review_started",
            LifecycleEvent::VoucherApproved => "voucher_approved",
            LifecycleEvent::VoucherRejected => "voucher_rejected",
            LifecycleEvent::VoucherDelivered => "voucher_delivered",
            LifecycleEvent::StayCompleted => "stay_completed",
            LifecycleEvent::DisputeOpened => "dispute_opened",
            LifecycleEvent::DisputeResolved => "dispute_resolved",
            LifecycleEvent::AdminCancel => "admin_cancel",
            LifecycleEvent::RefundIssued => "refund_issued",
        }
    }
}

/// Facts read from the store that guarded edges depend on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionContext {
    /// A completed payment backs the event (the event's external id for
    /// `PaymentSucceeded`, any completed payment for `RefundIssued`)
    pub payment_recorded: bool,
    /// Every required document type has an approved row
    pub required_documents_approved: bool,
    /// The reservation's voucher is in `delivered`
    pub voucher_delivered: bool,
    pub pre_dispute_status: Option<ReservationStatus>,
}

impl TransitionContext {
    /// Context with every guard satisfied. Used to ask whether an event is
    /// acceptable from a status at all.
    pub fn permissive() -> Self {
        Self {
            payment_recorded: true,
            required_documents_approved: true,
            voucher_delivered: true,
            pre_dispute_status: Some(Created),
        }
    }
}

/// Why an event was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No edge for this (status, event) pair
    Undefined,
    /// The edge exists but its guard does not hold
    Guard(&'static str),
}

fn guard(ok: bool, next: ReservationStatus, reason: &'static str) -> Result<ReservationStatus, Rejection> {
    if ok {
        Ok(next)
    } else {
        Err(Rejection::Guard(reason))
    }
}

/// The transition table.
///
/// Returns the status the reservation moves to, which may equal `from` for
/// events that are accepted without a status change.
pub fn next_status(
    from: ReservationStatus,
    event: &LifecycleEvent,
    ctx: &TransitionContext,
) -> Result<ReservationStatus, Rejection> {
    use LifecycleEvent as E;

    match (from, event) {
        (Created | AwaitingPayment | PaymentPending, E::CheckoutStarted) => Ok(PaymentPending),
        (Created | AwaitingPayment | PaymentPending, E::PaymentSucceeded { .. }) => guard(
            ctx.payment_recorded,
            Paid,
            "no completed payment is recorded for this transaction",
        ),
        (Created | AwaitingPayment | PaymentPending, E::PaymentFailed { .. }) => {
            Ok(AwaitingPayment)
        }

        (Paid | DocumentsPending | DocumentsRejected, E::DocumentUploaded) => Ok(DocumentsPending),
        (
            Paid | DocumentsPending | DocumentsRejected | DocumentsUnderReview,
            E::DocumentsSubmitted,
        ) => Ok(DocumentsUnderReview),
        (DocumentsUnderReview, E::DocumentApproved) => {
            if ctx.required_documents_approved {
                Ok(Approved)
            } else {
                Ok(DocumentsUnderReview)
            }
        }
        (DocumentsPending | DocumentsRejected, E::DocumentApproved) => Ok(from),
        (DocumentsPending | DocumentsUnderReview | DocumentsRejected, E::DocumentRejected) => {
            Ok(DocumentsRejected)
        }

        (Approved, E::VoucherRequested) => Ok(VoucherPending),
        (VoucherPending | VoucherRejected, E::VoucherUploaded) => Ok(VoucherSent),
        (VoucherSent, E::VoucherReviewStarted) => Ok(VoucherUnderReview),
        (VoucherSent | VoucherUnderReview, E::VoucherApproved) => Ok(VoucherUnderReview),
        (VoucherSent | VoucherUnderReview, E::VoucherRejected) => Ok(VoucherRejected),
        (VoucherUnderReview, E::VoucherDelivered) => guard(
            ctx.voucher_delivered,
            VoucherDelivered,
            "the voucher has not been delivered",
        ),

        (VoucherDelivered, E::StayCompleted) => Ok(Completed),

        (InDispute, E::DisputeOpened) => Err(Rejection::Undefined),
        (status, E::DisputeOpened) if !status.is_terminal() => Ok(InDispute),
        (InDispute, E::DisputeResolved) => match ctx.pre_dispute_status {
            Some(previous) if !previous.is_terminal() && previous != InDispute => Ok(previous),
            _ => Err(Rejection::Guard("the status before the dispute is unknown")),
        },

        (status, E::AdminCancel) if !status.is_terminal() => Ok(Cancelled),
        (status, E::RefundIssued) if status.is_post_payment() || status == InDispute => guard(
            ctx.payment_recorded,
            Refunded,
            "the reservation has no completed payment to refund",
        ),

        _ => Err(Rejection::Undefined),
    }
}

/// Whether `event` is acceptable from `from` when its guards hold
pub fn can_apply(from: ReservationStatus, event: &LifecycleEvent) -> bool {
    next_status(from, event, &TransitionContext::permissive()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    fn all_events() -> Vec<LifecycleEvent> {
        vec![
            LifecycleEvent::CheckoutStarted,
            LifecycleEvent::PaymentSucceeded {
                external_payment_id: "pi_1".to_string(),
            },
            LifecycleEvent::PaymentFailed {
                external_payment_id: "pi_1".to_string(),
            },
            LifecycleEvent::DocumentUploaded,
            LifecycleEvent::DocumentsSubmitted,
            LifecycleEvent::DocumentApproved,
            LifecycleEvent::DocumentRejected,
            LifecycleEvent::VoucherRequested,
            LifecycleEvent::VoucherUploaded,
            LifecycleEvent::VoucherReviewStarted,
            LifecycleEvent::VoucherApproved,
            LifecycleEvent::VoucherRejected,
            LifecycleEvent::VoucherDelivered,
            LifecycleEvent::StayCompleted,
            LifecycleEvent::DisputeOpened,
            LifecycleEvent::DisputeResolved,
            LifecycleEvent::AdminCancel,
            LifecycleEvent::RefundIssued,
        ]
    }

    fn contexts(pre_dispute: Option<ReservationStatus>) -> Vec<TransitionContext> {
        let mut out = Vec::new();
        for payment_recorded in [false, true] {
            for required_documents_approved in [false, true] {
                for voucher_delivered in [false, true] {
                    out.push(TransitionContext {
                        payment_recorded,
                        required_documents_approved,
                        voucher_delivered,
                        pre_dispute_status: pre_dispute,
                    });
                }
            }
        }
        out
    }

    #[test]
    fn test_happy_path() {
        let ctx = TransitionContext::permissive();
        let steps = [
            (LifecycleEvent::CheckoutStarted, PaymentPending),
            (
                LifecycleEvent::PaymentSucceeded {
                    external_payment_id: "pi_1".to_string(),
                },
                Paid,
            ),
            (LifecycleEvent::DocumentUploaded, DocumentsPending),
            (LifecycleEvent::DocumentsSubmitted, DocumentsUnderReview),
            (LifecycleEvent::DocumentApproved, Approved),
            (LifecycleEvent::VoucherRequested, VoucherPending),
            (LifecycleEvent::VoucherUploaded, VoucherSent),
            (LifecycleEvent::VoucherReviewStarted, VoucherUnderReview),
            (LifecycleEvent::VoucherApproved, VoucherUnderReview),
            (LifecycleEvent::VoucherDelivered, VoucherDelivered),
            (LifecycleEvent::StayCompleted, Completed),
        ];

        let mut status = Created;
        for (event, expected) in steps {
            status = next_status(status, &event, &ctx).unwrap();
            assert_eq!(status, expected, "after {}", event.name());
        }
    }

    #[test]
    fn test_payment_requires_recorded_payment() {
        let event = LifecycleEvent::PaymentSucceeded {
            external_payment_id: "pi_1".to_string(),
        };
        let ctx = TransitionContext::default();
        assert!(matches!(
            next_status(PaymentPending, &event, &ctx),
            Err(Rejection::Guard(_))
        ));
    }

    #[test]
    fn test_payment_failure_returns_to_awaiting_payment() {
        let event = LifecycleEvent::PaymentFailed {
            external_payment_id: "pi_1".to_string(),
        };
        let ctx = TransitionContext::default();
        assert_eq!(next_status(PaymentPending, &event, &ctx), Ok(AwaitingPayment));
        assert_eq!(next_status(Paid, &event, &ctx), Err(Rejection::Undefined));
    }

    #[test]
    fn test_documents_wait_for_every_required_approval() {
        let mut ctx = TransitionContext::default();
        assert_eq!(
            next_status(DocumentsUnderReview, &LifecycleEvent::DocumentApproved, &ctx),
            Ok(DocumentsUnderReview)
        );
        ctx.required_documents_approved = true;
        assert_eq!(
            next_status(DocumentsUnderReview, &LifecycleEvent::DocumentApproved, &ctx),
            Ok(Approved)
        );
        assert_eq!(
            next_status(DocumentsRejected, &LifecycleEvent::DocumentApproved, &ctx),
            Ok(DocumentsRejected)
        );
    }

    #[test]
    fn test_voucher_delivery_requires_delivered_voucher() {
        let ctx = TransitionContext::default();
        assert!(matches!(
            next_status(VoucherUnderReview, &LifecycleEvent::VoucherDelivered, &ctx),
            Err(Rejection::Guard(_))
        ));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let ctx = TransitionContext::permissive();
        for status in [Completed, Refunded, Cancelled] {
            for event in all_events() {
                assert_eq!(
                    next_status(status, &event, &ctx),
                    Err(Rejection::Undefined),
                    "{} accepted {}",
                    status,
                    event.name()
                );
            }
        }
    }

    #[test]
    fn test_dispute_resumes_previous_status() {
        let ctx = TransitionContext {
            pre_dispute_status: Some(VoucherSent),
            ..TransitionContext::default()
        };
        assert_eq!(
            next_status(VoucherSent, &LifecycleEvent::DisputeOpened, &ctx),
            Ok(InDispute)
        );
        assert_eq!(
            next_status(InDispute, &LifecycleEvent::DisputeResolved, &ctx),
            Ok(VoucherSent)
        );
        assert_eq!(
            next_status(InDispute, &LifecycleEvent::DisputeOpened, &ctx),
            Err(Rejection::Undefined)
        );
    }

    #[test]
    fn test_refund_only_after_payment() {
        let ctx = TransitionContext::permissive();
        assert_eq!(
            next_status(Created, &LifecycleEvent::RefundIssued, &ctx),
            Err(Rejection::Undefined)
        );
        assert_eq!(
            next_status(VoucherDelivered, &LifecycleEvent::RefundIssued, &ctx),
            Ok(Refunded)
        );
        assert_eq!(
            next_status(InDispute, &LifecycleEvent::RefundIssued, &ctx),
            Ok(Refunded)
        );
    }

    #[test]
    fn test_completed_is_unreachable_without_paid() {
        // Explore (status, pre-dispute status, passed through paid) over every
        // event and every guard combination.
        type Node = (ReservationStatus, Option<ReservationStatus>, bool);
        let start: Node = (Created, None, false);
        let mut seen: HashSet<Node> = HashSet::new();
        let mut queue: VecDeque<Node> = VecDeque::from([start]);

        while let Some(node @ (status, pre_dispute, paid_seen)) = queue.pop_front() {
            if !seen.insert(node) {
                continue;
            }
            if status == Completed {
                assert!(paid_seen, "completed reached without passing through paid");
            }
            for ctx in contexts(pre_dispute) {
                for event in all_events() {
                    if let Ok(next) = next_status(status, &event, &ctx) {
                        let next_pre = match next {
                            InDispute if status != InDispute => Some(status),
                            InDispute => pre_dispute,
                            _ => None,
                        };
                        queue.push_back((next, next_pre, paid_seen || next == Paid));
                    }
                }
            }
        }

        assert!(seen.iter().any(|(s, _, _)| *s == Completed));
    }

    #[test]
    fn test_can_apply_ignores_guards() {
        assert!(can_apply(
            PaymentPending,
            &LifecycleEvent::PaymentSucceeded {
                external_payment_id: "pi_1".to_string()
            }
        ));
        assert!(!can_apply(Completed, &LifecycleEvent::AdminCancel));
    }
}
