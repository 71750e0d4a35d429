//! Racing writers on the same order
mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{Harness, buyer, seller};
use order_workflow::order::OrderStatus;
use order_workflow::quote::{CounterOffer, PaymentType, QuoteStatus};
use order_workflow::types::Money;

/// Buyer and seller agreeing at the same instant lock the quote exactly once
#[test]
fn simultaneous_agreement_locks_once() -> anyhow::Result<()> {
    for _ in 0..10 {
        let h = Harness::new()?;
        let (order, quote) = h.sent_quote(PaymentType::Split5050)?;
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [true, false]
            .into_iter()
            .map(|as_buyer| {
                let service = h.service.clone();
                let barrier = barrier.clone();
                let quote_id = quote.quote_id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if as_buyer {
                        service.buyer_agree(&quote_id, &buyer())
                    } else {
                        service.seller_agree(&quote_id, &seller())
                    }
                })
            })
            .collect();

        let agreements: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect();

        assert_eq!(agreements.iter().filter(|a| a.is_locked()).count(), 1);
        assert_eq!(agreements.iter().filter(|a| a.advance_payment.is_some()).count(), 1);
        assert_eq!(h.service.quote(&quote.quote_id)?.status, QuoteStatus::Locked);
        assert_eq!(h.service.order(&order.order_id)?.status, OrderStatus::AgreementLocked);
        assert_eq!(h.service.list_payments(&order.order_id)?.len(), 1);
        assert_eq!(
            h.service.replay_order_status(&order.order_id)?,
            Some(OrderStatus::AgreementLocked)
        );
    }
    Ok(())
}

/// Two counter-offers against the same version: one wins, the other finds it superseded
#[test]
fn competing_counter_offers_yield_one_version() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let (order, quote) = h.sent_quote(PaymentType::Cod)?;
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [(true, 95), (false, 105)]
        .into_iter()
        .map(|(as_buyer, price)| {
            let service = h.service.clone();
            let barrier = barrier.clone();
            let quote_id = quote.quote_id.clone();
            thread::spawn(move || {
                let offer = CounterOffer::new().set_price(Money::from_major(price));
                let actor = if as_buyer { buyer() } else { seller() };
                barrier.wait();
                service.counter_offer(&quote_id, &offer, &actor)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let versions = h.service.quotes_for_order(&order.order_id)?;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].status, QuoteStatus::Superseded);
    assert_eq!(versions[1].version, 2);
    Ok(())
}

/// Writers on different orders proceed independently and keep their own trails intact
#[test]
fn independent_orders_do_not_interfere() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let quotes: Vec<_> = (0..8)
        .map(|_| h.sent_quote(PaymentType::Cod))
        .collect::<anyhow::Result<_>>()?;

    let handles: Vec<_> = quotes
        .iter()
        .map(|(_, quote)| {
            let service = h.service.clone();
            let quote_id = quote.quote_id.clone();
            thread::spawn(move || -> anyhow::Result<()> {
                service.buyer_agree(&quote_id, &buyer())?;
                service.seller_agree(&quote_id, &seller())?;
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap()?;
    }

    for (order, _) in &quotes {
        assert_eq!(h.service.order(&order.order_id)?.status, OrderStatus::AgreementLocked);
        assert_eq!(
            h.service.replay_order_status(&order.order_id)?,
            Some(OrderStatus::AgreementLocked)
        );
    }
    Ok(())
}
