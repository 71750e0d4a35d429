//! Append-only audit trail of every state-changing action on an order
use std::fmt;

use crate::error::StateError;
use crate::order::{self, OrderStatus};
use crate::types::{Actor, Role, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    #[n(0)]
    EnquiryCreated,
    #[n(1)]
    QuoteSent,
    #[n(2)]
    CounterOffered,
    #[n(3)]
    BuyerAgreed,
    #[n(4)]
    SellerAgreed,
    #[n(5)]
    AgreementLocked,
    #[n(6)]
    QuoteExpired,
    #[n(7)]
    PaymentRequested,
    #[n(8)]
    PaymentProofSubmitted,
    #[n(9)]
    PaymentVerified,
    #[n(10)]
    PaymentRejected,
    #[n(11)]
    PaymentExpired,
    #[n(12)]
    EvidenceUploaded,
    #[n(13)]
    EvidenceVerified,
    #[n(14)]
    DeliveryOtpGenerated,
    #[n(15)]
    DeliveryOtpFailed,
    #[n(16)]
    DeliveryConfirmed,
    #[n(17)]
    BalanceCollected,
    #[n(18)]
    DisputeRaised,
    #[n(19)]
    DisputeUnderReview,
    #[n(20)]
    DisputeEscalated,
    #[n(21)]
    DisputeResolved,
    #[n(22)]
    StatusChanged,
    #[n(23)]
    OrderCancelled,
    #[n(24)]
    OrderExpired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::EnquiryCreated => "ENQUIRY_CREATED",
            AuditAction::QuoteSent => "QUOTE_SENT",
            AuditAction::CounterOffered => "COUNTER_OFFERED",
            AuditAction::BuyerAgreed => "BUYER_AGREED",
            AuditAction::SellerAgreed => "SELLER_AGREED",
            AuditAction::AgreementLocked => "AGREEMENT_LOCKED",
            AuditAction::QuoteExpired => "QUOTE_EXPIRED",
            AuditAction::PaymentRequested => "PAYMENT_REQUESTED",
            AuditAction::PaymentProofSubmitted => "PAYMENT_PROOF_SUBMITTED",
            AuditAction::PaymentVerified => "PAYMENT_VERIFIED",
            AuditAction::PaymentRejected => "PAYMENT_REJECTED",
            AuditAction::PaymentExpired => "PAYMENT_EXPIRED",
            AuditAction::EvidenceUploaded => "EVIDENCE_UPLOADED",
            AuditAction::EvidenceVerified => "EVIDENCE_VERIFIED",
            AuditAction::DeliveryOtpGenerated => "DELIVERY_OTP_GENERATED",
            AuditAction::DeliveryOtpFailed => "DELIVERY_OTP_FAILED",
            AuditAction::DeliveryConfirmed => "DELIVERY_CONFIRMED",
            AuditAction::BalanceCollected => "BALANCE_COLLECTED",
            AuditAction::DisputeRaised => "DISPUTE_RAISED",
            AuditAction::DisputeUnderReview => "DISPUTE_UNDER_REVIEW",
            AuditAction::DisputeEscalated => "DISPUTE_ESCALATED",
            AuditAction::DisputeResolved => "DISPUTE_RESOLVED",
            AuditAction::StatusChanged => "STATUS_CHANGED",
            AuditAction::OrderCancelled => "ORDER_CANCELLED",
            AuditAction::OrderExpired => "ORDER_EXPIRED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line of the trail. `from_state` is `None` only for the entry that created the order;
/// actions that change nothing about the order carry `from_state == Some(to_state)`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    #[n(0)]
    pub log_id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub action: AuditAction,
    #[n(3)]
    pub from_state: Option<OrderStatus>,
    #[n(4)]
    pub to_state: OrderStatus,
    #[n(5)]
    pub performed_by: String,
    #[n(6)]
    pub performed_by_role: Role,
    #[n(7)]
    pub description: String,
    #[n(8)]
    pub timestamp: TimeStamp,
}

impl AuditLogEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log_id: String,
        order_id: String,
        action: AuditAction,
        from_state: Option<OrderStatus>,
        to_state: OrderStatus,
        actor: &Actor,
        description: String,
        timestamp: TimeStamp,
    ) -> Self {
        Self {
            log_id,
            order_id,
            action,
            from_state,
            to_state,
            performed_by: actor.user_id.clone(),
            performed_by_role: actor.role,
            description,
            timestamp,
        }
    }

    pub fn changes_state(&self) -> bool {
        self.from_state != Some(self.to_state)
    }
}

/// Rebuilds an order's status from its trail, checking that every entry continues from the
/// previous one and that every state change is a legal edge.
pub fn replay_status(entries: &[AuditLogEntry]) -> Result<Option<OrderStatus>, StateError> {
    let mut current: Option<OrderStatus> = None;
    for entry in entries {
        if entry.from_state != current {
            return Err(StateError::AuditDiscontinuity(entry.log_id.clone()));
        }
        if let Some(from) = entry.from_state {
            if entry.changes_state() {
                order::validate_transition(from, entry.to_state)?;
            }
        }
        current = Some(entry.to_state);
    }
    Ok(current)
}

/// Human-readable history, oldest first.
pub fn render_history(entries: &[AuditLogEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let from = e.from_state.map(|s| s.as_str()).unwrap_or("-");
            format!(
                "{} {} {} -> {} by {} ({}): {}",
                e.timestamp, e.action, from, e.to_state, e.performed_by, e.performed_by_role, e.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
