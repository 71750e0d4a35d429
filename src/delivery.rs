//! Proof of delivery by OTP or photo, with geofencing
use chrono::Duration;

use crate::error::StateError;
use crate::geo;
use crate::order::Order;
use crate::types::{GeoPoint, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmationMethod {
    #[n(0)]
    Otp,
    #[n(1)]
    Photo,
}

/// PENDING -> CONFIRMED -> BALANCE_COLLECTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Pending,
    Confirmed,
    BalanceCollected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct DeliveryConfirmation {
    #[n(0)]
    pub confirmation_id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub buyer_id: String,
    #[n(3)]
    pub seller_id: String,
    #[n(4)]
    pub delivery_otp: Option<String>,
    #[n(5)]
    pub otp_generated_at: Option<TimeStamp>,
    #[n(6)]
    pub otp_expires_at: Option<TimeStamp>,
    #[n(7)]
    pub otp_attempts: u32,
    #[n(8)]
    pub max_otp_attempts: u32,
    #[n(9)]
    pub method: Option<ConfirmationMethod>,
    #[n(10)]
    pub delivery_photo_id: Option<String>,
    #[n(11)]
    pub buyer_photo_id: Option<String>,
    #[n(12)]
    pub confirmed_by: Option<String>,
    #[n(13)]
    pub confirmed_at: Option<TimeStamp>,
    #[n(14)]
    pub verifier_location: Option<GeoPoint>,
    #[n(15)]
    pub distance_km: Option<f64>,
    #[n(16)]
    pub balance_collected: bool,
    #[n(17)]
    pub balance_evidence_id: Option<String>,
    #[n(18)]
    pub balance_collected_at: Option<TimeStamp>,
    #[n(19)]
    pub created_at: TimeStamp,
    #[n(20)]
    pub updated_at: TimeStamp,
}

impl DeliveryConfirmation {
    pub fn new(confirmation_id: String, order: &Order, max_otp_attempts: u32, now: TimeStamp) -> Self {
        Self {
            confirmation_id,
            order_id: order.order_id.clone(),
            buyer_id: order.buyer_id.clone(),
            seller_id: order.seller_id.clone(),
            delivery_otp: None,
            otp_generated_at: None,
            otp_expires_at: None,
            otp_attempts: 0,
            max_otp_attempts,
            method: None,
            delivery_photo_id: None,
            buyer_photo_id: None,
            confirmed_by: None,
            confirmed_at: None,
            verifier_location: None,
            distance_km: None,
            balance_collected: false,
            balance_evidence_id: None,
            balance_collected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> DeliveryState {
        if self.balance_collected {
            DeliveryState::BalanceCollected
        } else if self.confirmed_at.is_some() {
            DeliveryState::Confirmed
        } else {
            DeliveryState::Pending
        }
    }

    fn ensure_pending(&self) -> Result<(), StateError> {
        if self.state() != DeliveryState::Pending {
            return Err(StateError::AlreadyConfirmed);
        }
        Ok(())
    }

    /// Issues a fresh code. Any earlier code and its attempt count are discarded.
    pub fn issue_otp(&mut self, otp: String, ttl: Duration, max_attempts: u32, now: TimeStamp) -> Result<(), StateError> {
        self.ensure_pending()?;
        self.delivery_otp = Some(otp);
        self.otp_generated_at = Some(now);
        self.otp_expires_at = Some(now.plus(ttl));
        self.otp_attempts = 0;
        self.max_otp_attempts = max_attempts;
        self.updated_at = now;
        Ok(())
    }

    /// Expiry first, then the attempt cap, then the code itself. A wrong code consumes an
    /// attempt, and the attempt that reaches the cap reports the cap.
    pub fn check_otp(&mut self, otp: &str, now: TimeStamp) -> Result<(), StateError> {
        self.ensure_pending()?;
        let (Some(expected), Some(expires_at)) = (self.delivery_otp.as_deref(), self.otp_expires_at) else {
            return Err(StateError::OtpNotGenerated);
        };
        if now > expires_at {
            return Err(StateError::OtpExpired);
        }
        if self.otp_attempts >= self.max_otp_attempts {
            return Err(StateError::OtpAttemptsExceeded);
        }
        if otp != expected {
            self.otp_attempts += 1;
            self.updated_at = now;
            if self.otp_attempts >= self.max_otp_attempts {
                return Err(StateError::OtpAttemptsExceeded);
            }
            return Err(StateError::InvalidOtp);
        }
        Ok(())
    }

    pub fn confirm_by_otp(&mut self, confirmed_by: String, verifier_location: Option<GeoPoint>, distance_km: Option<f64>, now: TimeStamp) {
        self.method = Some(ConfirmationMethod::Otp);
        self.confirmed_by = Some(confirmed_by);
        self.confirmed_at = Some(now);
        self.verifier_location = verifier_location;
        self.distance_km = distance_km;
        self.updated_at = now;
    }

    pub fn confirm_by_photo(
        &mut self,
        delivery_photo_id: String,
        buyer_photo_id: Option<String>,
        confirmed_by: String,
        now: TimeStamp,
    ) -> Result<(), StateError> {
        self.ensure_pending()?;
        self.method = Some(ConfirmationMethod::Photo);
        self.delivery_photo_id = Some(delivery_photo_id);
        self.buyer_photo_id = buyer_photo_id;
        self.confirmed_by = Some(confirmed_by);
        self.confirmed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// The only mutation allowed once delivery is confirmed.
    pub fn collect_balance(&mut self, evidence_id: Option<String>, now: TimeStamp) -> Result<(), StateError> {
        match self.state() {
            DeliveryState::Pending => Err(StateError::NotDelivered),
            DeliveryState::BalanceCollected => Err(StateError::BalanceAlreadyCollected),
            DeliveryState::Confirmed => {
                self.balance_collected = true;
                self.balance_evidence_id = evidence_id;
                self.balance_collected_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
        }
    }
}

/// Distance between verifier and delivery point, when both are known. Fails outside the radius.
pub fn check_geofence(
    delivery_location: Option<GeoPoint>,
    verifier_location: Option<GeoPoint>,
    radius_km: f64,
) -> Result<Option<f64>, StateError> {
    let (Some(target), Some(verifier)) = (delivery_location, verifier_location) else {
        return Ok(None);
    };
    let distance_km = geo::distance_km(target, verifier);
    if !geo::within_geofence(distance_km, radius_km) {
        return Err(StateError::OutsideGeofence { distance_km });
    }
    Ok(Some(distance_km))
}
