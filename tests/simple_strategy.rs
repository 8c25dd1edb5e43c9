mod common;

use bot_core::strategies::{SimpleConfig, SimpleStrategy};
use bot_core::*;
use common::*;
use rust_decimal_macros::dec;

fn config() -> SimpleConfig {
    SimpleConfig {
        strategy_id: StrategyId::new("simple-btc"),
        environment: Environment::Testnet,
        market: Market {
            exchange: "hyperliquid".to_string(),
            base: AssetId::new("BTC"),
            quote: AssetId::new("USDC"),
            kind: InstrumentKind::Derivative,
        },
        buy_price: dec!(85000),
        sell_price: dec!(86000),
        order_size: dec!(0.01),
    }
}

fn add_simple(engine: &mut Engine, config: SimpleConfig) -> StrategyId {
    let id = config.strategy_id.clone();
    let subscription = StrategySubscription::for_exchange(&id, hl()).with_instrument(btc());
    engine
        .add_strategy(Box::new(SimpleStrategy::new(config)), subscription)
        .unwrap();
    id
}

fn only_place(requests: &[AdapterRequest]) -> &OrderRequest {
    match requests {
        [AdapterRequest::Place { order }] => order,
        other => panic!("expected a single placement, got {other:?}"),
    }
}

#[test]
fn buy_then_sell_round_trip_realizes_the_spread() {
    let (mut engine, mut rx) = engine();
    add_simple(&mut engine, config());
    engine.start(0).unwrap();

    let requests = drain(&mut rx);
    let buy = only_place(&requests);
    assert_eq!(buy.side, OrderSide::Buy);
    assert_eq!(buy.price, Some(Price::new(dec!(85000))));
    assert_eq!(buy.qty, Qty::new(dec!(0.01)));
    let buy_id = buy.client_id.to_string();

    for envelope in [
        at(10, accepted(&buy_id)),
        at(20, filled(&buy_id, OrderSide::Buy, dec!(85000), dec!(0.01))),
        at(30, completed(&buy_id, dec!(0.01), dec!(85000))),
    ] {
        engine.ingest(envelope);
    }
    engine.advance_to(30);

    let requests = drain(&mut rx);
    let sell = only_place(&requests);
    assert_eq!(sell.side, OrderSide::Sell);
    assert_eq!(sell.price, Some(Price::new(dec!(86000))));
    let sell_id = sell.client_id.to_string();
    assert_ne!(sell_id, buy_id);
    assert_eq!(engine.position(&hl(), &btc()).unwrap().qty, dec!(0.01));

    for envelope in [
        at(40, accepted(&sell_id)),
        at(50, filled(&sell_id, OrderSide::Sell, dec!(86000), dec!(0.01))),
        at(60, completed(&sell_id, dec!(0.01), dec!(86000))),
    ] {
        engine.ingest(envelope);
    }
    engine.advance_to(60);

    // the next cycle starts right away
    let requests = drain(&mut rx);
    let rebuy = only_place(&requests);
    assert_eq!(rebuy.side, OrderSide::Buy);

    let usdc = AssetId::new("USDC");
    let position = engine.position(&hl(), &btc()).unwrap();
    assert!(position.is_flat());
    assert_eq!(position.realized_pnl, dec!(10));
    assert_eq!(engine.balance(&hl(), &usdc).unwrap().total, dec!(10010));

    engine.shutdown();
    match drain(&mut rx).as_slice() {
        [AdapterRequest::Cancel { cancel }] => assert_eq!(cancel.client_id, rebuy.client_id),
        other => panic!("expected the open buy to be canceled, got {other:?}"),
    }
}

#[test]
fn rejected_buy_is_placed_again() {
    let (mut engine, mut rx) = engine();
    add_simple(&mut engine, config());
    engine.start(0).unwrap();
    let first = placed_ids(&drain(&mut rx));

    engine.ingest(at(
        10,
        Event::OrderRejected(OrderRejected {
            client_id: first[0].clone(),
            reason: "insufficient margin".to_string(),
        }),
    ));
    engine.advance_to(10);

    let second = placed_ids(&drain(&mut rx));
    assert_eq!(second.len(), 1);
    assert_ne!(second[0], first[0]);
    assert_eq!(engine.order(&first[0]).unwrap().status, OrderStatus::Rejected);
}

#[test]
fn invalid_config_stops_on_start() {
    let (mut engine, mut rx) = engine();
    let mut bad = config();
    bad.sell_price = dec!(80000);
    let id = add_simple(&mut engine, bad);
    engine.start(0).unwrap();

    assert_eq!(engine.runtime_state(&id), Some(RuntimeState::Stopped));
    assert_eq!(engine.stop_reason(&id), Some("buy_price must be < sell_price"));
    assert!(placed_ids(&drain(&mut rx)).is_empty());
}

#[test]
fn order_refused_before_submission_stops_the_strategy() {
    let (mut engine, mut rx) = engine();
    let mut tiny = config();
    // rounds to zero on a 0.001 lot
    tiny.order_size = dec!(0.0004);
    let id = add_simple(&mut engine, tiny);
    engine.start(0).unwrap();

    assert!(placed_ids(&drain(&mut rx)).is_empty());
    assert_eq!(engine.runtime_state(&id), Some(RuntimeState::Stopped));
    assert!(engine
        .stop_reason(&id)
        .unwrap()
        .starts_with("quantity must be positive"));
    assert_eq!(engine.dispatch_stats().orders_rejected, 1);
}
