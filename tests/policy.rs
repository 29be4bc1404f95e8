//! Copy-policy transform, risk gate, backoff, and percentile math.

mod common;

use std::time::Duration;

use common::*;
use copytrade_core::broker::PositionSnapshot;
use copytrade_core::config::CoreConfig;
use copytrade_core::engine::BackoffPolicy;
use copytrade_core::engine::metrics::{percentile_ms, summarize};
use copytrade_core::policy::{self, Transformed};
use copytrade_core::types::*;

fn instrument(lot_size: u32) -> InstrumentCode {
    InstrumentCode {
        symbol: "RELIANCE".into(),
        exchange: Exchange::NSE,
        segment: ExchangeSegment::CASH,
        scrip_code: 2885,
        lot_size,
        active: true,
    }
}

fn master(quantity: u32, price: Option<f64>) -> Order {
    Order {
        id: OrderId::generate(),
        account: "MA".into(),
        strategy_id: None,
        parent_id: None,
        side: Side::BUY,
        order_type: if price.is_some() {
            OrderType::LIMIT
        } else {
            OrderType::MARKET
        },
        symbol: "RELIANCE".into(),
        exchange: Exchange::NSE,
        quantity,
        price,
        trigger_price: None,
        product: ProductType::INTRADAY,
        validity: Validity::DAY,
        created_at: chrono::Utc::now(),
        submitted_at: None,
        terminal_at: None,
        status: OrderStatus::SUBMITTED,
        broker_order_id: None,
        exchange_order_id: None,
        last_message: None,
        traded_qty: 0,
        avg_trade_price: None,
        status_revision: 1,
    }
}

fn link(policy: CopyPolicy) -> FollowerLink {
    FollowerLink::new("MA", "F1", policy).expect("valid policy")
}

// ===================================================================
// Quantity derivation
// ===================================================================

#[test]
fn fixed_ratio_rounds() {
    let m = master(100, None);
    assert_eq!(
        policy::raw_quantity(&m, &link(CopyPolicy::FixedRatio { ratio: 1.0 }), None, None),
        100
    );
    assert_eq!(
        policy::raw_quantity(&m, &link(CopyPolicy::FixedRatio { ratio: 0.5 }), None, None),
        50
    );
    // 100 × 0.255 = 25.5 rounds half-up.
    assert_eq!(
        policy::raw_quantity(&m, &link(CopyPolicy::FixedRatio { ratio: 0.255 }), None, None),
        26
    );
    // 100 × 0.0049 = 0.49 rounds to zero.
    assert_eq!(
        policy::raw_quantity(&m, &link(CopyPolicy::FixedRatio { ratio: 0.0049 }), None, None),
        0
    );
}

#[test]
fn percentage_floors_against_balance() {
    let m = master(100, Some(2500.0));
    let l = link(CopyPolicy::Percentage { percent: 50.0 });
    // floor(100000 × 0.5 / 2500) = 20
    assert_eq!(policy::raw_quantity(&m, &l, Some(100_000.0), Some(2500.0)), 20);
    // No balance → zero.
    assert_eq!(policy::raw_quantity(&m, &l, None, Some(2500.0)), 0);
    // No reference price → zero.
    assert_eq!(policy::raw_quantity(&m, &l, Some(100_000.0), None), 0);
}

#[test]
fn fixed_quantity_ignores_master_quantity() {
    let m = master(1_000_000, None);
    let l = link(CopyPolicy::FixedQuantity { quantity: 7 });
    assert_eq!(policy::raw_quantity(&m, &l, None, None), 7);
}

// ===================================================================
// Full transform
// ===================================================================

#[test]
fn transform_floors_to_lot_size() {
    let m = master(100, Some(2500.0));
    let l = link(CopyPolicy::FixedRatio { ratio: 0.12 });
    // raw = 12, lot 5 → 10.
    match policy::transform(&m, &l, &instrument(5), None, Some(2500.0)) {
        Transformed::Order(draft) => assert_eq!(draft.quantity, 10),
        other => panic!("expected order, got {other:?}"),
    }
    // raw = 12, lot 25 → 0 → skip.
    match policy::transform(&m, &l, &instrument(25), None, Some(2500.0)) {
        Transformed::Skip(SkipReason::TooSmall) => {}
        other => panic!("expected TooSmall, got {other:?}"),
    }
}

#[test]
fn transform_enforces_link_notional_cap() {
    let m = master(100, Some(2500.0));
    let l = link(CopyPolicy::FixedRatio { ratio: 1.0 }).with_max_order_notional(100_000.0);
    // 100 × 2500 = 250000 > 100000.
    match policy::transform(&m, &l, &instrument(1), None, Some(2500.0)) {
        Transformed::Skip(SkipReason::LinkNotionalCap) => {}
        other => panic!("expected LinkNotionalCap, got {other:?}"),
    }
}

#[test]
fn transform_preserves_master_shape() {
    let m = master(100, Some(2500.0));
    let l = link(CopyPolicy::FixedRatio { ratio: 0.5 });
    let Transformed::Order(draft) = policy::transform(&m, &l, &instrument(1), None, None) else {
        panic!("expected order");
    };
    assert_eq!(draft.side, m.side);
    assert_eq!(draft.order_type, m.order_type);
    assert_eq!(draft.symbol, m.symbol);
    assert_eq!(draft.exchange, m.exchange);
    assert_eq!(draft.price, m.price);
    assert_eq!(draft.product, m.product);
    assert_eq!(draft.validity, m.validity);
    assert_eq!(draft.parent_id.as_ref(), Some(&m.id));
    assert_eq!(draft.account, "F1");
}

#[test]
fn transform_is_deterministic() {
    let m = master(37, Some(1234.5));
    let l = link(CopyPolicy::Percentage { percent: 33.0 });
    let a = policy::transform(&m, &l, &instrument(5), Some(250_000.0), Some(1234.5));
    let b = policy::transform(&m, &l, &instrument(5), Some(250_000.0), Some(1234.5));
    match (a, b) {
        (Transformed::Order(x), Transformed::Order(y)) => assert_eq!(x.quantity, y.quantity),
        other => panic!("expected two orders, got {other:?}"),
    }
}

#[test]
fn policy_parameters_are_validated() {
    assert!(CopyPolicy::FixedRatio { ratio: 0.0 }.validate().is_err());
    assert!(CopyPolicy::FixedRatio { ratio: -1.0 }.validate().is_err());
    assert!(CopyPolicy::Percentage { percent: 0.0 }.validate().is_err());
    assert!(CopyPolicy::Percentage { percent: 101.0 }.validate().is_err());
    assert!(CopyPolicy::FixedQuantity { quantity: 0 }.validate().is_err());
    assert!(CopyPolicy::FixedRatio { ratio: 2.5 }.validate().is_ok());
}

// ===================================================================
// Risk envelope precedence
// ===================================================================

#[test]
fn link_overrides_narrow_the_envelope() {
    let base = RiskEnvelope::default();
    let l = link(CopyPolicy::FixedRatio { ratio: 1.0 })
        .with_max_daily_loss(10_000.0)
        .with_max_order_notional(50_000.0);
    let narrowed = base.narrowed_by(&l);
    assert_eq!(narrowed.max_daily_loss, 10_000.0);
    assert_eq!(narrowed.max_position_notional, 50_000.0);

    // A looser link bound never widens the account envelope.
    let loose = link(CopyPolicy::FixedRatio { ratio: 1.0 }).with_max_daily_loss(9_000_000.0);
    assert_eq!(base.narrowed_by(&loose).max_daily_loss, base.max_daily_loss);
}

// ===================================================================
// Risk gate decisions
// ===================================================================

#[tokio::test]
async fn gate_denies_insufficient_balance_for_buys() {
    let core = build_core(CoreConfig::default()).await;
    core.portfolio.set_balance("F1", 1_000.0);
    let m = master(100, Some(2500.0));
    let l = link(CopyPolicy::FixedRatio { ratio: 1.0 });
    let draft = OrderDraft::follower_of(&m, "F1", 100);
    let envelope = core.gate.envelope_for("F1", &l);

    let decision = core.gate.check("F1", &draft, &envelope, Some(2500.0)).await.unwrap();
    assert_eq!(decision, RiskDecision::Deny(DenyReason::InsufficientBalance));
}

#[tokio::test]
async fn gate_denies_exposure_breach() {
    let core = build_core(CoreConfig::default()).await;
    core.portfolio.set_balance("F1", 10_000_000.0);
    core.portfolio.set_positions(
        "F1",
        vec![PositionSnapshot {
            symbol: "TCS".into(),
            exchange: Exchange::NSE,
            net_qty: 500,
            last_price: 3_900.0, // 1.95M of exposure against a 2M cap
        }],
    );
    let m = master(100, Some(2500.0));
    let l = link(CopyPolicy::FixedRatio { ratio: 1.0 });
    let draft = OrderDraft::follower_of(&m, "F1", 100);
    let envelope = core.gate.envelope_for("F1", &l);

    let decision = core.gate.check("F1", &draft, &envelope, Some(2500.0)).await.unwrap();
    assert_eq!(decision, RiskDecision::Deny(DenyReason::ExposureBreached));
}

#[tokio::test]
async fn gate_denies_position_count_breach() {
    let core = build_core(CoreConfig::default()).await;
    let mut envelope = RiskEnvelope::default();
    envelope.max_open_positions = 1;
    core.portfolio.set_positions(
        "F1",
        vec![PositionSnapshot {
            symbol: "TCS".into(),
            exchange: Exchange::NSE,
            net_qty: 10,
            last_price: 100.0,
        }],
    );
    let m = master(10, Some(100.0));
    let draft = OrderDraft::follower_of(&m, "F1", 10);

    let decision = core.gate.check("F1", &draft, &envelope, Some(100.0)).await.unwrap();
    assert_eq!(decision, RiskDecision::Deny(DenyReason::PositionCountBreached));
}

#[tokio::test]
async fn gate_denies_drawdown_breach() {
    let core = build_core(CoreConfig::default()).await;
    let m = master(1, Some(100.0));
    let l = link(CopyPolicy::FixedRatio { ratio: 1.0 });
    let draft = OrderDraft::follower_of(&m, "F1", 1);
    let envelope = core.gate.envelope_for("F1", &l);

    // Establish a peak, then crater the balance past the 20% default.
    core.portfolio.set_balance("F1", 1_000_000.0);
    assert_eq!(
        core.gate.check("F1", &draft, &envelope, Some(100.0)).await.unwrap(),
        RiskDecision::Allow
    );
    core.portfolio.set_balance("F1", 700_000.0);
    assert_eq!(
        core.gate.check("F1", &draft, &envelope, Some(100.0)).await.unwrap(),
        RiskDecision::Deny(DenyReason::DrawdownBreached)
    );
}

#[tokio::test]
async fn gate_checks_warm_the_mark_cache() {
    let core = build_core(CoreConfig::default()).await;
    core.portfolio.set_positions(
        "F1",
        vec![PositionSnapshot {
            symbol: "TCS".into(),
            exchange: Exchange::NSE,
            net_qty: 10,
            last_price: 3_850.0,
        }],
    );
    let m = master(1, Some(100.0));
    let l = link(CopyPolicy::FixedRatio { ratio: 1.0 });
    let draft = OrderDraft::follower_of(&m, "F1", 1);
    let envelope = core.gate.envelope_for("F1", &l);

    assert!(core.marks.get("TCS", Exchange::NSE).is_none());
    core.gate.check("F1", &draft, &envelope, Some(100.0)).await.unwrap();
    assert_eq!(core.marks.get("TCS", Exchange::NSE), Some(3_850.0));
}

// ===================================================================
// Backoff curve
// ===================================================================

#[test]
fn backoff_doubles_within_jitter_bounds() {
    let cfg = CoreConfig::default(); // base 100 ms, cap 2 s, jitter 25%
    let policy = BackoffPolicy::from_config(&cfg);
    for (attempt, nominal) in [(0u32, 100u64), (1, 200), (2, 400), (3, 800)] {
        for _ in 0..50 {
            let d = policy.delay_for(attempt).as_millis() as u64;
            let lo = nominal * 75 / 100;
            let hi = nominal * 125 / 100;
            assert!(
                (lo..=hi).contains(&d),
                "attempt {attempt}: {d} ms outside [{lo}, {hi}]"
            );
        }
    }
}

#[test]
fn backoff_caps_at_the_ceiling() {
    let cfg = CoreConfig::default();
    let policy = BackoffPolicy::from_config(&cfg);
    for attempt in 5..40 {
        let d = policy.delay_for(attempt);
        assert!(d <= Duration::from_millis(2_500), "{d:?} exceeds cap + jitter");
    }
}

// ===================================================================
// Percentiles & summaries
// ===================================================================

#[test]
fn nearest_rank_percentiles() {
    let sorted: Vec<u64> = (1..=100).collect();
    assert_eq!(percentile_ms(&sorted, 50.0), 50);
    assert_eq!(percentile_ms(&sorted, 95.0), 95);
    assert_eq!(percentile_ms(&sorted, 99.0), 99);
    assert_eq!(percentile_ms(&[], 95.0), 0);
    assert_eq!(percentile_ms(&[42], 50.0), 42);
    assert_eq!(percentile_ms(&[42], 99.0), 42);
}

#[test]
fn summary_counts_every_outcome_class() {
    let records = vec![
        FollowerRecord {
            follower_account: "A".into(),
            outcome: FollowerOutcome::Dispatched,
            latency: Duration::from_millis(120),
            message: None,
        },
        FollowerRecord {
            follower_account: "B".into(),
            outcome: FollowerOutcome::PolicySkipped(SkipReason::TooSmall),
            latency: Duration::from_millis(1),
            message: None,
        },
        FollowerRecord {
            follower_account: "C".into(),
            outcome: FollowerOutcome::Unmapped,
            latency: Duration::from_millis(1),
            message: None,
        },
        FollowerRecord {
            follower_account: "D".into(),
            outcome: FollowerOutcome::RiskDenied(DenyReason::ExposureBreached),
            latency: Duration::from_millis(2),
            message: None,
        },
        FollowerRecord {
            follower_account: "E".into(),
            outcome: FollowerOutcome::BrokerErrored,
            latency: Duration::from_millis(300),
            message: None,
        },
        FollowerRecord {
            follower_account: "F".into(),
            outcome: FollowerOutcome::TimedOut,
            latency: Duration::from_millis(5000),
            message: None,
        },
    ];
    let summary = summarize(&records);
    assert_eq!(summary.total, 6);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.policy_skipped, 1);
    assert_eq!(summary.unmapped, 1);
    assert_eq!(summary.risk_denied, 1);
    assert_eq!(summary.broker_errored, 1);
    assert_eq!(summary.timed_out, 1);
    assert!(summary.is_consistent());
    // Latency percentiles come from dispatched followers only.
    assert_eq!(summary.p50_ms, 120);
    assert_eq!(summary.p99_ms, 120);
}
