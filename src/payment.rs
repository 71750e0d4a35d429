//! Phased payment requests settled outside the system and reconciled against proof
use std::fmt;

use crate::error::{StateError, ValidationError};
use crate::types::{Money, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentPhase {
    #[n(0)]
    Advance,
    #[n(1)]
    Balance,
    #[n(2)]
    Full,
}

impl PaymentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPhase::Advance => "ADVANCE",
            PaymentPhase::Balance => "BALANCE",
            PaymentPhase::Full => "FULL",
        }
    }

    /// Advance and full payments gate fulfilment; a balance does not.
    pub fn gates_fulfilment(&self) -> bool {
        matches!(self, PaymentPhase::Advance | PaymentPhase::Full)
    }
}

impl fmt::Display for PaymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    #[n(0)]
    Unspecified,
    #[n(1)]
    Cash,
    #[n(2)]
    Upi,
    #[n(3)]
    BankTransfer,
    #[n(4)]
    Cheque,
    #[n(5)]
    Other,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    ProofSubmitted,
    #[n(2)]
    Verified,
    #[n(3)]
    Rejected,
    #[n(4)]
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::ProofSubmitted => "PROOF_SUBMITTED",
            PaymentStatus::Verified => "VERIFIED",
            PaymentStatus::Rejected => "REJECTED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Payment {
    #[n(0)]
    pub payment_id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub quote_id: String,
    #[n(3)]
    pub payer_id: String,
    #[n(4)]
    pub receiver_id: String,
    #[n(5)]
    pub phase: PaymentPhase,
    #[n(6)]
    pub amount: Money,
    #[n(7)]
    pub method: PaymentMethod,
    #[n(8)]
    pub status: PaymentStatus,
    #[n(9)]
    pub due_at: TimeStamp,
    #[n(10)]
    pub proof_evidence_id: Option<String>,
    #[n(11)]
    pub transaction_ref: Option<String>,
    #[n(12)]
    pub proof_submitted_at: Option<TimeStamp>,
    #[n(13)]
    pub verified_by: Option<String>,
    #[n(14)]
    pub verified_at: Option<TimeStamp>,
    #[n(15)]
    pub notes: Option<String>,
    #[n(16)]
    pub rejection_reason: Option<String>,
    #[n(17)]
    pub created_at: TimeStamp,
    #[n(18)]
    pub updated_at: TimeStamp,
}

/// Everything needed to raise a payment request.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub phase: PaymentPhase,
    pub amount: Money,
    pub method: PaymentMethod,
    pub due_in_hours: u32,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        payment_id: String,
        order_id: String,
        quote_id: String,
        payer_id: String,
        receiver_id: String,
        request: &PaymentRequest,
        now: TimeStamp,
    ) -> Result<Self, ValidationError> {
        if !request.amount.is_positive() {
            return Err(ValidationError::NonPositivePaymentAmount);
        }
        if request.due_in_hours == 0 {
            return Err(ValidationError::ZeroExpiry);
        }
        Ok(Self {
            payment_id,
            order_id,
            quote_id,
            payer_id,
            receiver_id,
            phase: request.phase,
            amount: request.amount,
            method: request.method,
            status: PaymentStatus::Pending,
            due_at: now.plus_hours(request.due_in_hours),
            proof_evidence_id: None,
            transaction_ref: None,
            proof_submitted_at: None,
            verified_by: None,
            verified_at: None,
            notes: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn expect_status(&self, allowed: &[PaymentStatus], expected: &'static str) -> Result<(), StateError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(StateError::PaymentStatus {
                expected,
                actual: self.status.to_string(),
            })
        }
    }

    /// Legal from PENDING, and from REJECTED so the payer can try again.
    pub fn submit_proof(
        &mut self,
        evidence_id: String,
        transaction_ref: Option<String>,
        now: TimeStamp,
    ) -> Result<(), StateError> {
        self.expect_status(&[PaymentStatus::Pending, PaymentStatus::Rejected], "PENDING or REJECTED")?;
        self.status = PaymentStatus::ProofSubmitted;
        self.proof_evidence_id = Some(evidence_id);
        self.transaction_ref = transaction_ref;
        self.proof_submitted_at = Some(now);
        self.rejection_reason = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn verify(&mut self, verified_by: String, notes: Option<String>, now: TimeStamp) -> Result<(), StateError> {
        self.expect_status(&[PaymentStatus::ProofSubmitted], "PROOF_SUBMITTED")?;
        self.status = PaymentStatus::Verified;
        self.verified_by = Some(verified_by);
        self.verified_at = Some(now);
        self.notes = notes;
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, reason: String, now: TimeStamp) -> Result<(), StateError> {
        self.expect_status(&[PaymentStatus::ProofSubmitted], "PROOF_SUBMITTED")?;
        self.status = PaymentStatus::Rejected;
        self.rejection_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }

    pub fn is_overdue_at(&self, now: TimeStamp) -> bool {
        self.status == PaymentStatus::Pending && now > self.due_at
    }

    pub fn expire(&mut self, now: TimeStamp) {
        self.status = PaymentStatus::Expired;
        self.updated_at = now;
    }
}
