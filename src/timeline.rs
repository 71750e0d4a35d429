//! One chronological view over every record attached to an order
use crate::audit::AuditLogEntry;
use crate::delivery::DeliveryConfirmation;
use crate::dispute::Dispute;
use crate::evidence::Evidence;
use crate::payment::Payment;
use crate::quote::Quote;
use crate::types::TimeStamp;

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    Audit(AuditLogEntry),
    Quote(Quote),
    Payment(Payment),
    Evidence(Evidence),
    Delivery(DeliveryConfirmation),
    Dispute(Dispute),
}

impl TimelineEvent {
    /// When the record came into being.
    pub fn timestamp(&self) -> TimeStamp {
        match self {
            TimelineEvent::Audit(entry) => entry.timestamp,
            TimelineEvent::Quote(quote) => quote.created_at,
            TimelineEvent::Payment(payment) => payment.created_at,
            TimelineEvent::Evidence(evidence) => evidence.record.uploaded_at,
            TimelineEvent::Delivery(delivery) => delivery.created_at,
            TimelineEvent::Dispute(dispute) => dispute.created_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TimelineEvent::Audit(_) => "audit",
            TimelineEvent::Quote(_) => "quote",
            TimelineEvent::Payment(_) => "payment",
            TimelineEvent::Evidence(_) => "evidence",
            TimelineEvent::Delivery(_) => "delivery",
            TimelineEvent::Dispute(_) => "dispute",
        }
    }
}

/// Stable: events sharing a timestamp keep the order they were given in.
pub fn merge(mut events: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
    events.sort_by_key(TimelineEvent::timestamp);
    events
}
