//! The order aggregate and its transition graph
//!
//! ```text
//! ENQUIRY -> QUOTE_SENT -> AGREEMENT_LOCKED -> ADVANCE_PENDING -> PAYMENT_PROOF_SUBMITTED
//!                                |                                        |
//!                                +----------> DELIVERED <- PAYMENT_VERIFIED <-+
//!                                                 |
//!                                             COMPLETED
//!
//! any non-terminal -> DISPUTE -> ESCALATED -> COMPLETED | CANCELLED
//! ```
use std::fmt;

use crate::error::{StateError, ValidationError};
use crate::quote::PaymentType;
use crate::types::{GeoPoint, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderStatus {
    #[n(0)]
    Enquiry,
    #[n(1)]
    QuoteSent,
    #[n(2)]
    AgreementLocked,
    #[n(3)]
    AdvancePending,
    #[n(4)]
    PaymentProofSubmitted,
    #[n(5)]
    PaymentVerified,
    #[n(6)]
    Delivered,
    #[n(7)]
    Completed,
    #[n(8)]
    Dispute,
    #[n(9)]
    Escalated,
    #[n(10)]
    Cancelled,
    #[n(11)]
    Expired,
}

use OrderStatus::*;

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        Enquiry,
        QuoteSent,
        AgreementLocked,
        AdvancePending,
        PaymentProofSubmitted,
        PaymentVerified,
        Delivered,
        Completed,
        Dispute,
        Escalated,
        Cancelled,
        Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Enquiry => "ENQUIRY",
            QuoteSent => "QUOTE_SENT",
            AgreementLocked => "AGREEMENT_LOCKED",
            AdvancePending => "ADVANCE_PENDING",
            PaymentProofSubmitted => "PAYMENT_PROOF_SUBMITTED",
            PaymentVerified => "PAYMENT_VERIFIED",
            Delivered => "DELIVERED",
            Completed => "COMPLETED",
            Dispute => "DISPUTE",
            Escalated => "ESCALATED",
            Cancelled => "CANCELLED",
            Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Completed | Cancelled | Expired)
    }

    pub fn is_disputed(&self) -> bool {
        matches!(self, Dispute | Escalated)
    }

    /// The legality table. Every edge of the workflow lives here and nowhere else.
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            Enquiry => &[QuoteSent, Cancelled, Expired, Dispute, Escalated],
            QuoteSent => &[AgreementLocked, Cancelled, Expired, Dispute, Escalated],
            AgreementLocked => &[
                AdvancePending,
                PaymentProofSubmitted,
                Delivered,
                Cancelled,
                Dispute,
                Escalated,
            ],
            AdvancePending => &[PaymentProofSubmitted, Cancelled, Expired, Dispute, Escalated],
            PaymentProofSubmitted => &[PaymentVerified, Cancelled, Dispute, Escalated],
            PaymentVerified => &[Delivered, Cancelled, Dispute, Escalated],
            Delivered => &[Completed, Dispute, Escalated],
            Dispute => &[Escalated, Completed, Cancelled],
            Escalated => &[Completed, Cancelled],
            Completed | Cancelled | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// The operation that owns entry into this status. Those edges carry records of their own
    /// (a locked quote, a verified payment, a dispute) and are never taken directly.
    pub fn owning_operation(&self) -> Option<&'static str> {
        match self {
            QuoteSent => Some("send_quote"),
            AgreementLocked => Some("buyer_agree/seller_agree"),
            AdvancePending => Some("create_payment_request"),
            PaymentProofSubmitted => Some("submit_payment_proof"),
            PaymentVerified => Some("verify_payment"),
            Delivered => Some("verify_delivery_otp/confirm_delivery_with_photo"),
            Completed => Some("mark_balance_collected/resolve_dispute"),
            Dispute => Some("raise_dispute"),
            Escalated => Some("escalate_dispute"),
            Cancelled => Some("cancel_order"),
            Enquiry | Expired => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), StateError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StateError::InvalidTransition { from, to })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq)]
pub struct DeliveryInfo {
    #[n(0)]
    pub address: Option<String>,
    #[n(1)]
    pub location: Option<GeoPoint>, // geofence target for OTP confirmation
}

impl DeliveryInfo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
    pub fn set_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

/// A buyer's request to trade, the seed of every order.
#[derive(Debug, Clone, PartialEq)]
pub struct Enquiry {
    pub buyer_id: String,
    pub seller_id: String,
    pub product_ref: String,
    pub quantity: f64,
    pub unit: String,
    pub delivery: DeliveryInfo,
    pub payment_preference: PaymentType,
    pub notes: Option<String>,
}

impl Enquiry {
    pub fn new(
        buyer_id: impl Into<String>,
        seller_id: impl Into<String>,
        product_ref: impl Into<String>,
        quantity: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            seller_id: seller_id.into(),
            product_ref: product_ref.into(),
            quantity,
            unit: unit.into(),
            delivery: DeliveryInfo::default(),
            payment_preference: PaymentType::Cod,
            notes: None,
        }
    }
    pub fn set_delivery(mut self, delivery: DeliveryInfo) -> Self {
        self.delivery = delivery;
        self
    }
    pub fn set_payment_preference(mut self, payment_type: PaymentType) -> Self {
        self.payment_preference = payment_type;
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    // Checks fields, then builds the order in its initial state
    pub fn validate_and_finalise(self, order_id: String, now: TimeStamp) -> Result<Order, ValidationError> {
        if self.buyer_id.is_empty() {
            return Err(ValidationError::MissingField("Buyer"));
        }
        if self.seller_id.is_empty() {
            return Err(ValidationError::MissingField("Seller"));
        }
        if self.product_ref.is_empty() {
            return Err(ValidationError::MissingField("Product"));
        }
        if self.buyer_id == self.seller_id {
            return Err(ValidationError::SelfTrade);
        }
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(ValidationError::NonPositiveQuantity);
        }

        Ok(Order {
            order_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            product_ref: self.product_ref,
            quantity: self.quantity,
            unit: self.unit,
            delivery: self.delivery,
            payment_preference: self.payment_preference,
            notes: self.notes,
            status: OrderStatus::Enquiry,
            created_at: now,
            updated_at: now,
            dirty: false,
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Order {
    #[n(0)]
    pub order_id: String,
    #[n(1)]
    pub buyer_id: String,
    #[n(2)]
    pub seller_id: String,
    #[n(3)]
    pub product_ref: String,
    #[n(4)]
    pub quantity: f64,
    #[n(5)]
    pub unit: String,
    #[n(6)]
    pub delivery: DeliveryInfo,
    #[n(7)]
    pub payment_preference: PaymentType,
    #[n(8)]
    pub notes: Option<String>,
    #[n(9)]
    pub status: OrderStatus,
    #[n(10)]
    pub created_at: TimeStamp,
    #[n(11)]
    pub updated_at: TimeStamp,
    #[n(12)]
    pub dirty: bool, // pending offline sync, owned by the client
}

impl Order {
    pub fn is_party(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The party opposite `user_id`, if `user_id` is a party at all.
    pub fn counterparty_of(&self, user_id: &str) -> Option<&str> {
        if user_id == self.buyer_id {
            Some(&self.seller_id)
        } else if user_id == self.seller_id {
            Some(&self.buyer_id)
        } else {
            None
        }
    }

    pub fn ensure_open(&self) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::OrderClosed {
                order_id: self.order_id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Moves to `to` if the table allows it, returning the previous status.
    pub fn apply_transition(&mut self, to: OrderStatus, now: TimeStamp) -> Result<OrderStatus, StateError> {
        validate_transition(self.status, to)?;
        let from = self.status;
        self.status = to;
        self.updated_at = now;
        Ok(from)
    }
}
