use chrono::{DateTime, Utc};
use decision_core::{Action, ContextSnapshot, Proposal, Side, Signal, SignalIntent, Sizing};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk thresholds applied to aggregated intents before anything reaches the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Intents from producers below this conviction are dropped.
    pub min_conviction: f64,
    /// Largest single buy as a fraction of portfolio value.
    pub max_position_pct: Decimal,
    /// Fraction of portfolio value kept in cash.
    pub min_cash_pct: Decimal,
    /// Buys smaller than this after capping are skipped.
    pub min_trade_size: Decimal,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_conviction: 0.3,
            max_position_pct: Decimal::new(10, 2),
            min_cash_pct: Decimal::new(5, 2),
            min_trade_size: Decimal::new(50, 0),
        }
    }
}

/// An intent tagged with the producer it came from and that producer's conviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedIntent {
    pub producer: String,
    pub conviction: f64,
    #[serde(flatten)]
    pub intent: SignalIntent,
}

/// Flatten every proposal's intents, in producer order.
pub fn aggregate(proposals: &[Proposal]) -> Vec<AggregatedIntent> {
    proposals
        .iter()
        .flat_map(|p| {
            p.intents.iter().map(move |intent| AggregatedIntent {
                producer: p.producer.clone(),
                conviction: p.conviction,
                intent: intent.clone(),
            })
        })
        .collect()
}

/// Apply conviction, position-size and cash-reserve limits.
///
/// Buys come out sized in dollars. Each accepted buy draws down a running
/// cash counter, so later buys in the same cycle see what earlier ones used.
pub fn gate(
    intents: Vec<AggregatedIntent>,
    snapshot: &ContextSnapshot,
    config: &GateConfig,
) -> Vec<AggregatedIntent> {
    let portfolio_value = snapshot.portfolio_value;
    let position_cap = portfolio_value * config.max_position_pct;
    let mut available = (snapshot.cash - portfolio_value * config.min_cash_pct).max(Decimal::ZERO);

    let mut accepted = Vec::with_capacity(intents.len());
    for mut item in intents {
        if item.conviction < config.min_conviction {
            tracing::debug!(
                "Gate: dropping {:?} {} from {} (conviction {:.2} < {:.2})",
                item.intent.action,
                item.intent.symbol,
                item.producer,
                item.conviction,
                config.min_conviction
            );
            continue;
        }

        if item.intent.action != Action::Buy {
            accepted.push(item);
            continue;
        }

        let requested = match item.intent.sizing {
            Some(Sizing::Amount(amount)) => amount,
            Some(Sizing::Quantity(quantity)) => match snapshot.price(&item.intent.symbol) {
                Some(price) if price > Decimal::ZERO => match quantity.checked_mul(price) {
                    Some(amount) => amount,
                    None => {
                        tracing::debug!(
                            "Gate: buy {} of {} @ {} overflows, dropping",
                            quantity,
                            item.intent.symbol,
                            price
                        );
                        continue;
                    }
                },
                _ => {
                    tracing::debug!("Gate: no price for {}, dropping quantity buy", item.intent.symbol);
                    continue;
                }
            },
            None => {
                tracing::debug!("Gate: buy {} has no size, dropping", item.intent.symbol);
                continue;
            }
        };

        let sized = requested.min(position_cap).min(available);
        if sized < config.min_trade_size {
            tracing::debug!(
                "Gate: buy {} reduced to {} below minimum {}, skipping",
                item.intent.symbol,
                sized,
                config.min_trade_size
            );
            continue;
        }
        if sized < requested {
            tracing::debug!("Gate: buy {} reduced from {} to {}", item.intent.symbol, requested, sized);
        }

        available -= sized;
        item.intent.sizing = Some(Sizing::Amount(sized));
        accepted.push(item);
    }
    accepted
}

/// Turn gated intents into executable signals. Holds and unsized intents are discarded.
pub fn materialize(gated: &[AggregatedIntent], timestamp: DateTime<Utc>) -> Vec<Signal> {
    gated
        .iter()
        .filter_map(|item| {
            let side = Side::from_action(item.intent.action)?;
            let sizing = item.intent.sizing?;
            Some(Signal {
                symbol: item.intent.symbol.clone(),
                side,
                sizing,
                reason: format!("[{}] {}", item.producer, item.intent.reason),
                confidence: item.conviction,
                timestamp,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(cash: Decimal, value: Decimal) -> ContextSnapshot {
        let mut snap = ContextSnapshot::new(Utc::now(), cash);
        snap.portfolio_value = value;
        snap.prices.insert("AAPL".to_string(), dec!(200));
        snap
    }

    fn tagged(conviction: f64, intent: SignalIntent) -> AggregatedIntent {
        AggregatedIntent {
            producer: "test".to_string(),
            conviction,
            intent,
        }
    }

    fn amount_of(item: &AggregatedIntent) -> Decimal {
        match item.intent.sizing {
            Some(Sizing::Amount(a)) => a,
            other => panic!("expected amount sizing, got {:?}", other),
        }
    }

    #[test]
    fn test_cap_equals_max_position_pct_of_value() {
        let snap = snapshot(dec!(10000), dec!(10000));
        let out = gate(
            vec![tagged(0.9, SignalIntent::buy_amount("AAPL", dec!(5000), "big"))],
            &snap,
            &GateConfig::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(amount_of(&out[0]), dec!(10000) * dec!(0.10));
    }

    #[test]
    fn test_low_conviction_dropped_for_all_actions() {
        let snap = snapshot(dec!(10000), dec!(10000));
        let out = gate(
            vec![
                tagged(0.29, SignalIntent::buy_amount("AAPL", dec!(100), "weak")),
                tagged(0.1, SignalIntent::sell_quantity("AAPL", dec!(1), "weak")),
            ],
            &snap,
            &GateConfig::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_running_cash_counter_limits_later_buys() {
        // 1000 cash, 10000 value: reserve 500, so 500 available; cap 1000
        let snap = snapshot(dec!(1000), dec!(10000));
        let out = gate(
            vec![
                tagged(0.8, SignalIntent::buy_amount("A", dec!(300), "first")),
                tagged(0.8, SignalIntent::buy_amount("B", dec!(300), "second")),
                tagged(0.8, SignalIntent::buy_amount("C", dec!(300), "third")),
            ],
            &snap,
            &GateConfig::default(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(amount_of(&out[0]), dec!(300));
        assert_eq!(amount_of(&out[1]), dec!(200));
    }

    #[test]
    fn test_sells_pass_through_unmodified() {
        let snap = snapshot(dec!(0), dec!(10000));
        let sell = SignalIntent::sell_quantity("AAPL", dec!(1000), "exit");
        let out = gate(vec![tagged(0.5, sell.clone())], &snap, &GateConfig::default());
        assert_eq!(out[0].intent, sell);
    }

    #[test]
    fn test_quantity_buy_converted_with_snapshot_price() {
        let snap = snapshot(dec!(10000), dec!(10000));
        let out = gate(
            vec![
                tagged(0.8, SignalIntent::buy_quantity("AAPL", dec!(2), "priced")),
                tagged(0.8, SignalIntent::buy_quantity("MSFT", dec!(2), "unpriced")),
            ],
            &snap,
            &GateConfig::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(amount_of(&out[0]), dec!(400));
    }

    #[test]
    fn test_oversized_quantity_buy_dropped_without_stopping_the_rest() {
        let snap = snapshot(dec!(10000), dec!(10000));
        let huge = Decimal::from_str_exact("70000000000000000000000000000").unwrap();
        let out = gate(
            vec![
                tagged(0.9, SignalIntent::buy_quantity("AAPL", huge, "absurd")),
                tagged(0.9, SignalIntent::buy_amount("AAPL", dec!(100), "sane")),
            ],
            &snap,
            &GateConfig::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(amount_of(&out[0]), dec!(100));
    }

    #[test]
    fn test_materialize_discards_hold_and_unsized() {
        let mut unsized_sell = SignalIntent::sell_quantity("X", dec!(1), "no size");
        unsized_sell.sizing = None;
        let gated = vec![
            tagged(0.8, SignalIntent::hold("AAPL", "wait")),
            tagged(0.8, unsized_sell),
            tagged(0.8, SignalIntent::buy_amount("AAPL", dec!(100), "go")),
        ];
        let signals = materialize(&gated, Utc::now());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, Side::Buy);
        assert_eq!(signals[0].amount(), Some(dec!(100)));
        assert_eq!(signals[0].confidence, 0.8);
    }

    #[test]
    fn test_aggregate_tags_source_and_conviction() {
        let mut a = Proposal::empty("momentum", Utc::now());
        a.conviction = 0.7;
        a.intents.push(SignalIntent::buy_amount("A", dec!(100), "up"));
        let mut b = Proposal::empty("value", Utc::now());
        b.conviction = 0.4;
        b.intents.push(SignalIntent::sell_quantity("B", dec!(3), "rich"));
        b.intents.push(SignalIntent::hold("C", "meh"));

        let flat = aggregate(&[a, b]);
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].producer, "momentum");
        assert_eq!(flat[2].producer, "value");
        assert_eq!(flat[2].conviction, 0.4);
    }
}
