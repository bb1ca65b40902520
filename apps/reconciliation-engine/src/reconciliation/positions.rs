//! Position reconciliation: broker positions are authoritative.
//!
//! Local snapshots diverging from the broker in quantity or entry price are
//! overwritten; local symbols the broker no longer holds are flattened to
//! zero rather than deleted, preserving the row for audit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::broker::BrokerPort;
use crate::error::EngineError;
use crate::models::PositionSnapshot;
use crate::store::OrderStore;

/// Compare local position snapshots against the broker and persist the
/// broker's view wherever they differ. Returns the number of corrections.
///
/// # Errors
///
/// Returns an error when the broker query or a snapshot write fails.
pub async fn reconcile_positions<S, B>(
    store: &S,
    broker: &B,
    now: DateTime<Utc>,
) -> Result<usize, EngineError>
where
    S: OrderStore + ?Sized,
    B: BrokerPort + ?Sized,
{
    let broker_positions = broker.get_positions().await.map_err(EngineError::from)?;
    let local = store.get_position_snapshots().await?;
    let mut corrected = 0;

    for bp in &broker_positions {
        let matches = local
            .iter()
            .find(|l| l.symbol == bp.symbol)
            .is_some_and(|l| l.qty == bp.qty && l.avg_entry_price == bp.avg_entry_price);
        if matches {
            continue;
        }
        store
            .upsert_position_snapshot(PositionSnapshot {
                symbol: bp.symbol.clone(),
                qty: bp.qty,
                avg_entry_price: bp.avg_entry_price,
                updated_at: now,
            })
            .await?;
        corrected += 1;
        info!(
            symbol = %bp.symbol,
            qty = %bp.qty,
            avg_entry_price = %bp.avg_entry_price,
            "Position snapshot corrected to broker state"
        );
    }

    for lp in &local {
        if lp.qty == Decimal::ZERO {
            continue;
        }
        if broker_positions.iter().any(|bp| bp.symbol == lp.symbol) {
            continue;
        }
        store
            .upsert_position_snapshot(PositionSnapshot {
                symbol: lp.symbol.clone(),
                qty: Decimal::ZERO,
                avg_entry_price: Decimal::ZERO,
                updated_at: now,
            })
            .await?;
        corrected += 1;
        info!(
            symbol = %lp.symbol,
            prior_qty = %lp.qty,
            "Local position flattened, broker reports no holding"
        );
    }

    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::broker::{BrokerError, OrderQueryStatus};
    use crate::models::{ActivityPage, BrokerOrder, BrokerPosition};
    use crate::store::test_fixtures::base_time;
    use crate::store::InMemoryOrderStore;

    struct PositionBroker {
        positions: Vec<BrokerPosition>,
    }

    #[async_trait::async_trait]
    impl BrokerPort for PositionBroker {
        async fn get_orders(
            &self,
            _status: OrderQueryStatus,
            _limit: usize,
            _after: Option<DateTime<Utc>>,
        ) -> Result<Vec<BrokerOrder>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_order_by_client_id(
            &self,
            _client_order_id: &str,
        ) -> Result<Option<BrokerOrder>, BrokerError> {
            Ok(None)
        }

        async fn get_account_activities(
            &self,
            _activity_type: &str,
            _after: DateTime<Utc>,
            _until: DateTime<Utc>,
            _page_size: usize,
            _page_token: Option<String>,
        ) -> Result<ActivityPage, BrokerError> {
            Ok(ActivityPage::default())
        }

        async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(self.positions.clone())
        }
    }

    #[tokio::test]
    async fn test_divergent_position_overwritten() {
        let store = InMemoryOrderStore::new();
        store
            .upsert_position_snapshot(PositionSnapshot {
                symbol: "AAPL".to_string(),
                qty: dec!(50),
                avg_entry_price: dec!(10),
                updated_at: base_time(),
            })
            .await
            .unwrap();

        let broker = PositionBroker {
            positions: vec![BrokerPosition {
                symbol: "AAPL".to_string(),
                qty: dec!(100),
                avg_entry_price: dec!(11),
            }],
        };

        let corrected = reconcile_positions(&store, &broker, base_time())
            .await
            .unwrap();
        assert_eq!(corrected, 1);

        let snapshots = store.get_position_snapshots().await.unwrap();
        let aapl = snapshots.iter().find(|s| s.symbol == "AAPL").unwrap();
        assert_eq!(aapl.qty, dec!(100));
        assert_eq!(aapl.avg_entry_price, dec!(11));
    }

    #[tokio::test]
    async fn test_matching_position_untouched() {
        let store = InMemoryOrderStore::new();
        store
            .upsert_position_snapshot(PositionSnapshot {
                symbol: "AAPL".to_string(),
                qty: dec!(100),
                avg_entry_price: dec!(11),
                updated_at: base_time(),
            })
            .await
            .unwrap();

        let broker = PositionBroker {
            positions: vec![BrokerPosition {
                symbol: "AAPL".to_string(),
                qty: dec!(100),
                avg_entry_price: dec!(11),
            }],
        };

        let corrected = reconcile_positions(&store, &broker, base_time())
            .await
            .unwrap();
        assert_eq!(corrected, 0);
    }

    #[tokio::test]
    async fn test_local_only_position_flattened() {
        let store = InMemoryOrderStore::new();
        store
            .upsert_position_snapshot(PositionSnapshot {
                symbol: "TSLA".to_string(),
                qty: dec!(25),
                avg_entry_price: dec!(200),
                updated_at: base_time(),
            })
            .await
            .unwrap();

        let broker = PositionBroker {
            positions: Vec::new(),
        };

        let corrected = reconcile_positions(&store, &broker, base_time())
            .await
            .unwrap();
        assert_eq!(corrected, 1);

        let snapshots = store.get_position_snapshots().await.unwrap();
        let tsla = snapshots.iter().find(|s| s.symbol == "TSLA").unwrap();
        assert_eq!(tsla.qty, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_broker_only_position_created() {
        let store = InMemoryOrderStore::new();
        let broker = PositionBroker {
            positions: vec![BrokerPosition {
                symbol: "MSFT".to_string(),
                qty: dec!(10),
                avg_entry_price: dec!(400),
            }],
        };

        let corrected = reconcile_positions(&store, &broker, base_time())
            .await
            .unwrap();
        assert_eq!(corrected, 1);
        assert_eq!(store.get_position_snapshots().await.unwrap().len(), 1);
    }
}
