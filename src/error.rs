//! Error types for the order workflow
use crate::order::OrderStatus;

/// Input rejected before any state was touched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("{0} cannot be negative")]
    NegativeAmount(&'static str),
    #[error("Final total cannot be negative")]
    NegativeTotal,
    #[error("Payment amount must be greater than zero")]
    NonPositivePaymentAmount,
    #[error("At least one payment type must be allowed")]
    NoPaymentTypes,
    #[error("Expiry window must be greater than zero hours")]
    ZeroExpiry,
    #[error("User {0} is not a party to this order")]
    NotAParty(String),
    #[error("Evidence {evidence_id} does not belong to order {order_id}")]
    ForeignEvidence {
        evidence_id: String,
        order_id: String,
    },
    #[error("Evidence {0} is not a photo")]
    NotAPhoto(String),
    #[error("Only the {0} may {1}")]
    RoleNotPermitted(&'static str, &'static str),
    #[error("Buyer and seller must be different users")]
    SelfTrade,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Price computation overflowed")]
    Overflow,
    #[error("Invalid configuration: {0}")]
    Config(&'static str),
}

/// The operation conflicts with the current state of an entity.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Order can only move to {to} through {operation}")]
    TransitionOwned { to: OrderStatus, operation: &'static str },
    #[error("Order {order_id} is {status} and no longer accepts changes")]
    OrderClosed { order_id: String, status: OrderStatus },
    #[error("Quote is already locked")]
    QuoteAlreadyLocked,
    #[error("Quote is {0} and cannot be {1}")]
    QuoteNotActionable(String, &'static str),
    #[error("Payment is {actual}, expected {expected}")]
    PaymentStatus {
        expected: &'static str,
        actual: String,
    },
    #[error("No delivery OTP has been generated for this order")]
    OtpNotGenerated,
    #[error("OTP has expired")]
    OtpExpired,
    #[error("Maximum OTP attempts exceeded")]
    OtpAttemptsExceeded,
    #[error("Invalid OTP")]
    InvalidOtp,
    #[error("Location verification failed: you are {distance_km:.2} km away from the delivery location")]
    OutsideGeofence { distance_km: f64 },
    #[error("Delivery has already been confirmed")]
    AlreadyConfirmed,
    #[error("Delivery has not been confirmed yet")]
    NotDelivered,
    #[error("Balance has already been collected")]
    BalanceAlreadyCollected,
    #[error("Advance payment must be verified before delivery")]
    AdvanceNotVerified,
    #[error("Order already has an active dispute")]
    DisputeAlreadyOpen,
    #[error("Dispute is already resolved")]
    DisputeAlreadyResolved,
    #[error("Dispute is {0} and cannot be {1}")]
    DisputeNotActionable(String, &'static str),
    #[error("Evidence chain broken at {0}")]
    EvidenceChainBroken(String),
    #[error("Audit log is discontinuous at entry {0}")]
    AuditDiscontinuity(String),
}

/// An id did not resolve to a stored record.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Order {0} not found")]
    Order(String),
    #[error("Quote {0} not found")]
    Quote(String),
    #[error("Payment {0} not found")]
    Payment(String),
    #[error("Evidence {0} not found")]
    Evidence(String),
    #[error("No delivery record for order {0}")]
    Delivery(String),
    #[error("Dispute {0} not found")]
    Dispute(String),
}
