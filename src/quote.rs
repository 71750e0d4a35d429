//! Versioned, negotiable price offers
use std::fmt;

use crate::error::{StateError, ValidationError};
use crate::order::Order;
use crate::types::{GeoPoint, Money, Role, TimeStamp};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentType {
    #[n(0)]
    FullAdvance,
    #[n(1)]
    Split5050,
    #[n(2)]
    Cod,
    #[n(3)]
    BuyerPickup, // settled in person, nothing tracked
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::FullAdvance => "FULL_ADVANCE",
            PaymentType::Split5050 => "SPLIT_50_50",
            PaymentType::Cod => "COD",
            PaymentType::BuyerPickup => "BUYER_PICKUP",
        }
    }

    pub fn requires_advance(&self) -> bool {
        matches!(self, PaymentType::FullAdvance | PaymentType::Split5050)
    }

    /// (advance, balance) owed under this payment type
    pub fn split(&self, total: Money) -> (Money, Money) {
        match self {
            PaymentType::FullAdvance => (total, Money::ZERO),
            PaymentType::Split5050 => total.halves(),
            PaymentType::Cod => (Money::ZERO, total),
            PaymentType::BuyerPickup => (Money::ZERO, Money::ZERO),
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Sent,
    #[n(2)]
    Negotiating,
    #[n(3)]
    Locked,
    #[n(4)]
    Superseded,
    #[n(5)]
    Expired,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "DRAFT",
            QuoteStatus::Sent => "SENT",
            QuoteStatus::Negotiating => "NEGOTIATING",
            QuoteStatus::Locked => "LOCKED",
            QuoteStatus::Superseded => "SUPERSEDED",
            QuoteStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived money fields of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub total_product_price: Money,
    pub final_total: Money,
    pub advance_amount: Money,
    pub balance_amount: Money,
}

/// totalProductPrice = base × qty; finalTotal = totalProductPrice + delivery + packing − discount
pub fn compute_pricing(
    base_price: Money,
    quantity: f64,
    delivery_charge: Money,
    packing_charge: Money,
    discount: Money,
    payment_type: PaymentType,
) -> Result<Pricing, ValidationError> {
    for (field, amount) in [
        ("Base price", base_price),
        ("Delivery charge", delivery_charge),
        ("Packing charge", packing_charge),
        ("Discount", discount),
    ] {
        if amount.is_negative() {
            return Err(ValidationError::NegativeAmount(field));
        }
    }
    if !(quantity.is_finite() && quantity > 0.0) {
        return Err(ValidationError::NonPositiveQuantity);
    }

    let total_product_price = base_price
        .times_quantity(quantity)
        .ok_or(ValidationError::Overflow)?;
    let final_total = total_product_price
        .checked_add(delivery_charge)
        .and_then(|t| t.checked_add(packing_charge))
        .and_then(|t| t.checked_sub(discount))
        .ok_or(ValidationError::Overflow)?;
    if final_total.is_negative() {
        return Err(ValidationError::NegativeTotal);
    }

    let (advance_amount, balance_amount) = payment_type.split(final_total);

    Ok(Pricing {
        total_product_price,
        final_total,
        advance_amount,
        balance_amount,
    })
}

/// Seller's terms for turning a draft into a sent quote.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteTerms {
    pub base_price: Money,
    pub delivery_charge: Money,
    pub packing_charge: Money,
    pub discount: Money,
    pub allowed_payment_types: Vec<PaymentType>,
    pub notes: Option<String>,
    pub expires_in_hours: u32,
}

impl QuoteTerms {
    pub fn new(base_price: Money) -> Self {
        Self {
            base_price,
            delivery_charge: Money::ZERO,
            packing_charge: Money::ZERO,
            discount: Money::ZERO,
            allowed_payment_types: Vec::new(),
            notes: None,
            expires_in_hours: 48,
        }
    }
    pub fn set_delivery_charge(mut self, amount: Money) -> Self {
        self.delivery_charge = amount;
        self
    }
    pub fn set_packing_charge(mut self, amount: Money) -> Self {
        self.packing_charge = amount;
        self
    }
    pub fn set_discount(mut self, amount: Money) -> Self {
        self.discount = amount;
        self
    }
    pub fn allow_payment_type(mut self, payment_type: PaymentType) -> Self {
        if !self.allowed_payment_types.contains(&payment_type) {
            self.allowed_payment_types.push(payment_type);
        }
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
    pub fn set_expires_in_hours(mut self, hours: u32) -> Self {
        self.expires_in_hours = hours;
        self
    }

    /// The buyer's preference wins when the seller allows it.
    pub fn choose_payment_type(&self, preference: PaymentType) -> Option<PaymentType> {
        if self.allowed_payment_types.contains(&preference) {
            Some(preference)
        } else {
            self.allowed_payment_types.first().copied()
        }
    }
}

/// Fields a party may override when countering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterOffer {
    pub new_price: Option<Money>,
    pub new_delivery_charge: Option<Money>,
    pub notes: Option<String>,
}

impl CounterOffer {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_price(mut self, price: Money) -> Self {
        self.new_price = Some(price);
        self
    }
    pub fn set_delivery_charge(mut self, amount: Money) -> Self {
        self.new_delivery_charge = Some(amount);
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Quote {
    #[n(0)]
    pub quote_id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub buyer_id: String,
    #[n(3)]
    pub seller_id: String,
    #[n(4)]
    pub product_ref: String,
    #[n(5)]
    pub quantity: f64,
    #[n(6)]
    pub unit: String,
    #[n(7)]
    pub delivery_location: Option<GeoPoint>,
    #[n(8)]
    pub base_price: Money,
    #[n(9)]
    pub delivery_charge: Money,
    #[n(10)]
    pub packing_charge: Money,
    #[n(11)]
    pub discount: Money,
    #[n(12)]
    pub total_product_price: Money,
    #[n(13)]
    pub final_total: Money,
    #[n(14)]
    pub payment_type: PaymentType,
    #[n(15)]
    pub allowed_payment_types: Vec<PaymentType>,
    #[n(16)]
    pub advance_amount: Money,
    #[n(17)]
    pub balance_amount: Money,
    #[n(18)]
    pub status: QuoteStatus,
    #[n(19)]
    pub version: u32,
    #[n(20)]
    pub previous_quote_id: Option<String>,
    #[n(21)]
    pub notes: Option<String>,
    #[n(22)]
    pub buyer_agreed_at: Option<TimeStamp>,
    #[n(23)]
    pub seller_agreed_at: Option<TimeStamp>,
    #[n(24)]
    pub locked_at: Option<TimeStamp>,
    #[n(25)]
    pub expires_at: Option<TimeStamp>,
    #[n(26)]
    pub created_at: TimeStamp,
    #[n(27)]
    pub updated_at: TimeStamp,
}

impl Quote {
    /// Version 1 of the chain, no prices yet.
    pub fn draft(quote_id: String, order: &Order, notes: Option<String>, now: TimeStamp) -> Self {
        Self {
            quote_id,
            order_id: order.order_id.clone(),
            buyer_id: order.buyer_id.clone(),
            seller_id: order.seller_id.clone(),
            product_ref: order.product_ref.clone(),
            quantity: order.quantity,
            unit: order.unit.clone(),
            delivery_location: order.delivery.location,
            base_price: Money::ZERO,
            delivery_charge: Money::ZERO,
            packing_charge: Money::ZERO,
            discount: Money::ZERO,
            total_product_price: Money::ZERO,
            final_total: Money::ZERO,
            payment_type: order.payment_preference,
            allowed_payment_types: vec![order.payment_preference],
            advance_amount: Money::ZERO,
            balance_amount: Money::ZERO,
            status: QuoteStatus::Draft,
            version: 1,
            previous_quote_id: None,
            notes,
            buyer_agreed_at: None,
            seller_agreed_at: None,
            locked_at: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sent or negotiating: still open for agreement or counter-offers.
    pub fn is_live(&self) -> bool {
        matches!(self.status, QuoteStatus::Sent | QuoteStatus::Negotiating)
    }

    pub fn is_expired_at(&self, now: TimeStamp) -> bool {
        self.is_live() && self.expires_at.is_some_and(|at| now > at)
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            total_product_price: self.total_product_price,
            final_total: self.final_total,
            advance_amount: self.advance_amount,
            balance_amount: self.balance_amount,
        }
    }

    fn apply_pricing(&mut self, pricing: Pricing) {
        self.total_product_price = pricing.total_product_price;
        self.final_total = pricing.final_total;
        self.advance_amount = pricing.advance_amount;
        self.balance_amount = pricing.balance_amount;
    }

    pub fn send(&mut self, terms: &QuoteTerms, preference: PaymentType, now: TimeStamp) -> anyhow::Result<()> {
        if self.status != QuoteStatus::Draft {
            return Err(StateError::QuoteNotActionable(self.status.to_string(), "sent").into());
        }
        if terms.expires_in_hours == 0 {
            return Err(ValidationError::ZeroExpiry.into());
        }
        let payment_type = terms
            .choose_payment_type(preference)
            .ok_or(ValidationError::NoPaymentTypes)?;
        let pricing = compute_pricing(
            terms.base_price,
            self.quantity,
            terms.delivery_charge,
            terms.packing_charge,
            terms.discount,
            payment_type,
        )?;

        self.base_price = terms.base_price;
        self.delivery_charge = terms.delivery_charge;
        self.packing_charge = terms.packing_charge;
        self.discount = terms.discount;
        self.payment_type = payment_type;
        self.allowed_payment_types = terms.allowed_payment_types.clone();
        self.apply_pricing(pricing);
        if terms.notes.is_some() {
            self.notes = terms.notes.clone();
        }
        self.status = QuoteStatus::Sent;
        self.expires_at = Some(now.plus_hours(terms.expires_in_hours));
        self.updated_at = now;

        Ok(())
    }

    /// The next version of this quote with `offer` applied. `self` is left untouched;
    /// the caller supersedes it.
    pub fn counter(
        &self,
        quote_id: String,
        offer: &CounterOffer,
        expires_in_hours: u32,
        now: TimeStamp,
    ) -> anyhow::Result<Quote> {
        if self.status == QuoteStatus::Locked {
            return Err(StateError::QuoteAlreadyLocked.into());
        }
        if !self.is_live() {
            return Err(StateError::QuoteNotActionable(self.status.to_string(), "countered").into());
        }
        let base_price = offer.new_price.unwrap_or(self.base_price);
        let delivery_charge = offer.new_delivery_charge.unwrap_or(self.delivery_charge);
        let pricing = compute_pricing(
            base_price,
            self.quantity,
            delivery_charge,
            self.packing_charge,
            self.discount,
            self.payment_type,
        )?;

        let mut next = self.clone();
        next.quote_id = quote_id;
        next.base_price = base_price;
        next.delivery_charge = delivery_charge;
        next.apply_pricing(pricing);
        next.status = QuoteStatus::Negotiating;
        next.version = self.version + 1;
        next.previous_quote_id = Some(self.quote_id.clone());
        next.notes = offer.notes.clone();
        next.buyer_agreed_at = None;
        next.seller_agreed_at = None;
        next.locked_at = None;
        next.expires_at = Some(now.plus_hours(expires_in_hours));
        next.created_at = now;
        next.updated_at = now;

        Ok(next)
    }

    pub fn supersede(&mut self, now: TimeStamp) {
        self.status = QuoteStatus::Superseded;
        self.updated_at = now;
    }

    pub fn expire(&mut self, now: TimeStamp) {
        self.status = QuoteStatus::Expired;
        self.updated_at = now;
    }

    /// Stamps the party's agreement. Returns true when this call locked the quote.
    pub fn agree(&mut self, role: Role, now: TimeStamp) -> anyhow::Result<bool> {
        if self.status == QuoteStatus::Locked {
            return Err(StateError::QuoteAlreadyLocked.into());
        }
        if !self.is_live() {
            return Err(StateError::QuoteNotActionable(self.status.to_string(), "agreed").into());
        }
        match role {
            Role::Buyer => self.buyer_agreed_at = Some(now),
            Role::Seller => self.seller_agreed_at = Some(now),
            other => return Err(ValidationError::NotAParty(other.to_string()).into()),
        }
        self.updated_at = now;

        if self.buyer_agreed_at.is_some() && self.seller_agreed_at.is_some() {
            self.status = QuoteStatus::Locked;
            self.locked_at = Some(now);
            return Ok(true);
        }
        Ok(false)
    }
}
