//! Shared fixtures: a workflow service over a throwaway sled database, driven by a manual clock
#![allow(dead_code)]

use std::sync::Arc;

use order_workflow::OrderWorkflowService;
use order_workflow::clock::ManualClock;
use order_workflow::config::WorkflowConfig;
use order_workflow::evidence::EvidenceUpload;
use order_workflow::geo::EARTH_RADIUS_KM;
use order_workflow::order::{DeliveryInfo, Enquiry, Order};
use order_workflow::quote::{PaymentType, Quote, QuoteTerms};
use order_workflow::service::Agreement;
use order_workflow::types::{Actor, GeoPoint, Money, TimeStamp};
use tempfile::{TempDir, tempdir};

pub const BUYER: &str = "buyer_asha";
pub const SELLER: &str = "seller_ravi";
pub const ADMIN: &str = "admin_meera";

pub fn buyer() -> Actor {
    Actor::buyer(BUYER)
}

pub fn seller() -> Actor {
    Actor::seller(SELLER)
}

pub fn admin() -> Actor {
    Actor::admin(ADMIN)
}

/// Market yard, Pune.
pub fn delivery_point() -> GeoPoint {
    GeoPoint::new(18.5204, 73.8567)
}

/// About 0.33 km north of the delivery point.
pub fn near_delivery_point() -> GeoPoint {
    GeoPoint::new(18.5234, 73.8567)
}

/// About 1.1 km north of the delivery point.
pub fn far_from_delivery_point() -> GeoPoint {
    GeoPoint::new(18.5304, 73.8567)
}

/// Due north of the delivery point by `km` along the meridian.
pub fn north_of_delivery_point(km: f64) -> GeoPoint {
    let origin = delivery_point();
    GeoPoint::new(origin.lat + (km / EARTH_RADIUS_KM).to_degrees(), origin.lng)
}

pub fn start_time() -> TimeStamp {
    TimeStamp::new_with(2025, 3, 1, 9, 0, 0).unwrap()
}

/// base 100.00/kg, delivery 20.00, packing 5.00
pub fn standard_terms(payment_type: PaymentType) -> QuoteTerms {
    QuoteTerms::new(Money::from_major(100))
        .set_delivery_charge(Money::from_major(20))
        .set_packing_charge(Money::from_major(5))
        .allow_payment_type(payment_type)
}

pub struct Harness {
    pub service: Arc<OrderWorkflowService>,
    pub clock: Arc<ManualClock>,
    pub db: Arc<sled::Db>,
    // declared last so the database is removed after the service is dropped
    _temp_dir: TempDir,
}

impl Harness {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(WorkflowConfig::default())
    }

    pub fn with_config(config: WorkflowConfig) -> anyhow::Result<Self> {
        // Sled locks its database file, so every test gets its own directory.
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("orders.db"))?);
        let clock = Arc::new(ManualClock::new(start_time()));
        let service = OrderWorkflowService::with_config(db.clone(), config, clock.clone())?;

        Ok(Self {
            service: Arc::new(service),
            clock,
            db,
            _temp_dir: temp_dir,
        })
    }

    /// 10 kg of onions from SELLER to BUYER, delivered to the market yard.
    pub fn enquiry(&self, payment_type: PaymentType) -> anyhow::Result<(Order, Quote)> {
        let enquiry = Enquiry::new(BUYER, SELLER, "onion-red-grade-a", 10.0, "kg")
            .set_payment_preference(payment_type)
            .set_delivery(
                DeliveryInfo::new()
                    .set_address("Gate 3, Market Yard, Pune")
                    .set_location(delivery_point()),
            );
        self.service.create_enquiry(enquiry)
    }

    pub fn sent_quote(&self, payment_type: PaymentType) -> anyhow::Result<(Order, Quote)> {
        let (order, draft) = self.enquiry(payment_type)?;
        let quote = self
            .service
            .send_quote(&draft.quote_id, &standard_terms(payment_type), &seller())?;
        Ok((self.service.order(&order.order_id)?, quote))
    }

    /// Both parties agreed, buyer first.
    pub fn locked(&self, payment_type: PaymentType) -> anyhow::Result<Agreement> {
        let (_, quote) = self.sent_quote(payment_type)?;
        self.service.buyer_agree(&quote.quote_id, &buyer())?;
        self.service.seller_agree(&quote.quote_id, &seller())
    }

    pub fn upload_photo(&self, order_id: &str, actor: &Actor, media_ref: &str) -> anyhow::Result<String> {
        let evidence = self.service.upload_evidence(
            order_id,
            EvidenceUpload::photo(media_ref).set_geo(delivery_point()),
            actor,
        )?;
        Ok(evidence.evidence_id().to_string())
    }

    /// Split order with its advance proven and verified, ready for delivery.
    pub fn advance_verified(&self) -> anyhow::Result<Agreement> {
        let agreement = self.locked(PaymentType::Split5050)?;
        let order_id = agreement.order.order_id.clone();
        let advance = agreement.advance_payment.clone().unwrap();

        let receipt = self.upload_photo(&order_id, &buyer(), "media://upi-receipt-advance")?;
        self.service
            .submit_payment_proof(&advance.payment_id, &receipt, Some("UTR-ADV-1".into()), &buyer())?;
        self.service.verify_payment(&advance.payment_id, &seller(), None)?;
        Ok(agreement)
    }

    /// COD order delivered by OTP.
    pub fn delivered(&self) -> anyhow::Result<Order> {
        let agreement = self.locked(PaymentType::Cod)?;
        let order_id = agreement.order.order_id;
        let delivery = self.service.generate_delivery_otp(&order_id, &seller())?;
        let otp = delivery.delivery_otp.unwrap();
        self.service
            .verify_delivery_otp(&order_id, &otp, &seller(), Some(near_delivery_point()))?;
        self.service.order(&order_id)
    }
}
