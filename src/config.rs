//! Tunables for the workflow engine
use chrono::Duration;

use crate::error::ValidationError;

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub otp_ttl: Duration,
    pub max_otp_attempts: u32,
    pub otp_digits: u32,
    pub geofence_radius_km: f64,
    /// Expiry applied to counter-offers, which carry no expiry of their own
    pub default_quote_expiry_hours: u32,
    /// Due window for the advance request created when a quote locks
    pub default_payment_due_hours: u32,
    pub dispute_auto_escalation: Duration,
    pub sweep_interval: std::time::Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            otp_ttl: Duration::hours(4),
            max_otp_attempts: 3,
            otp_digits: 6,
            geofence_radius_km: 0.5,
            default_quote_expiry_hours: 48,
            default_payment_due_hours: 24,
            dispute_auto_escalation: Duration::days(3),
            sweep_interval: std::time::Duration::from_secs(15 * 60),
        }
    }
}

impl WorkflowConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_otp_ttl(mut self, ttl: Duration) -> Self {
        self.otp_ttl = ttl;
        self
    }
    pub fn set_max_otp_attempts(mut self, attempts: u32) -> Self {
        self.max_otp_attempts = attempts;
        self
    }
    pub fn set_otp_digits(mut self, digits: u32) -> Self {
        self.otp_digits = digits;
        self
    }
    pub fn set_geofence_radius_km(mut self, radius: f64) -> Self {
        self.geofence_radius_km = radius;
        self
    }
    pub fn set_default_quote_expiry_hours(mut self, hours: u32) -> Self {
        self.default_quote_expiry_hours = hours;
        self
    }
    pub fn set_default_payment_due_hours(mut self, hours: u32) -> Self {
        self.default_payment_due_hours = hours;
        self
    }
    pub fn set_dispute_auto_escalation(mut self, after: Duration) -> Self {
        self.dispute_auto_escalation = after;
        self
    }
    pub fn set_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.otp_ttl <= Duration::zero() {
            return Err(ValidationError::Config("otp_ttl must be positive"));
        }
        if self.max_otp_attempts == 0 {
            return Err(ValidationError::Config("max_otp_attempts must be at least 1"));
        }
        if !(4..=10).contains(&self.otp_digits) {
            return Err(ValidationError::Config("otp_digits must be between 4 and 10"));
        }
        if !(self.geofence_radius_km.is_finite() && self.geofence_radius_km > 0.0) {
            return Err(ValidationError::Config("geofence_radius_km must be positive"));
        }
        if self.default_quote_expiry_hours == 0 || self.default_payment_due_hours == 0 {
            return Err(ValidationError::Config("default expiry windows must be positive"));
        }
        if self.dispute_auto_escalation <= Duration::zero() {
            return Err(ValidationError::Config("dispute_auto_escalation must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ValidationError::Config("sweep_interval must be positive"));
        }
        Ok(())
    }
}
