use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use apotheca_core::{BranchId, ProductId};
use apotheca_events::EventEnvelope;
use apotheca_stock::{StockLedgerEvent, StockStatusLabel, TransactionKind};

use crate::pagination::{Page, PageRequest, paginate};
use crate::read_model::BranchStore;

use super::ProjectionError;
use super::cursor::StreamCursors;

/// Stream type published by the stock ledger aggregate.
pub const STOCK_AGGREGATE_TYPE: &str = "stock.ledger";

/// Materialized stock position for one (branch, product) key.
///
/// A cache over the transaction log, rebuildable at any time; the clamped
/// quantity here can exceed the signed log total for over-drawn histories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPositionReadModel {
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
}

impl StockPositionReadModel {
    pub fn status_label(&self) -> StockStatusLabel {
        StockStatusLabel::for_quantity(self.quantity)
    }
}

/// One row of the transaction history view. `position` is assigned by the
/// projection in arrival order and acts as the immutable pagination
/// tiebreaker under concurrent appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransactionView {
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub product_name: String,
    pub magnitude: u32,
    pub kind: TransactionKind,
    pub occurred_at: DateTime<Utc>,
    pub position: u64,
}

/// Summary list filter.
#[derive(Debug, Clone, Default)]
pub struct StockSummaryFilter {
    /// Case-insensitive substring match on the product name.
    pub keyword: Option<String>,
    pub status: Option<StockStatusLabel>,
}

/// History list filter.
#[derive(Debug, Clone, Default)]
pub struct StockHistoryFilter {
    pub product_id: Option<ProductId>,
    pub kind: Option<TransactionKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Per-day aggregate for the statistics endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStockStat {
    pub date: NaiveDate,
    pub kind: TransactionKind,
    pub total_magnitude: u64,
}

/// Stock position + history projection.
#[derive(Debug)]
pub struct StockPositionsProjection<S>
where
    S: BranchStore<ProductId, StockPositionReadModel>,
{
    positions: S,
    history: RwLock<Vec<StockTransactionView>>,
    cursors: StreamCursors,
}

impl<S> StockPositionsProjection<S>
where
    S: BranchStore<ProductId, StockPositionReadModel>,
{
    pub fn new(positions: S) -> Self {
        Self {
            positions,
            history: RwLock::new(Vec::new()),
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, branch_id: BranchId, product_id: ProductId) -> Option<StockPositionReadModel> {
        self.positions.get(branch_id, &product_id)
    }

    /// Branch stock summary, filtered and paginated, product name ascending.
    pub fn summary(
        &self,
        branch_id: BranchId,
        filter: &StockSummaryFilter,
        page: PageRequest,
    ) -> Page<StockPositionReadModel> {
        let mut rows: Vec<StockPositionReadModel> = self
            .positions
            .list(branch_id)
            .into_iter()
            .filter(|rm| {
                if let Some(keyword) = &filter.keyword {
                    if !rm
                        .product_name
                        .to_lowercase()
                        .contains(&keyword.to_lowercase())
                    {
                        return false;
                    }
                }
                filter.status.is_none_or(|s| rm.status_label() == s)
            })
            .collect();

        rows.sort_by(|a, b| {
            a.product_name
                .cmp(&b.product_name)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        paginate(rows, page)
    }

    /// Transaction history, newest first, stable under concurrent appends
    /// (ordered by occurred_at desc with the arrival position as tiebreaker).
    pub fn history(
        &self,
        branch_id: BranchId,
        filter: &StockHistoryFilter,
        page: PageRequest,
    ) -> Page<StockTransactionView> {
        // A poisoned lock still holds every recorded row; serve them rather
        // than an empty page.
        let rows = self
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut rows: Vec<StockTransactionView> = rows
            .into_iter()
            .filter(|t| t.branch_id == branch_id)
            .filter(|t| filter.product_id.is_none_or(|p| t.product_id == p))
            .filter(|t| filter.kind.is_none_or(|k| t.kind == k))
            .filter(|t| filter.from.is_none_or(|from| t.occurred_at >= from))
            .filter(|t| filter.to.is_none_or(|to| t.occurred_at <= to))
            .collect();

        rows.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.position.cmp(&a.position))
        });
        paginate(rows, page)
    }

    /// Total moved magnitude per (calendar day, kind), bucketed in `tz`.
    pub fn statistics(
        &self,
        branch_id: BranchId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        tz: Tz,
    ) -> Vec<DailyStockStat> {
        let rows = self
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut buckets: BTreeMap<(NaiveDate, TransactionKind), u64> = BTreeMap::new();
        for t in rows.into_iter().filter(|t| t.branch_id == branch_id) {
            if from.is_some_and(|f| t.occurred_at < f) || to.is_some_and(|u| t.occurred_at > u) {
                continue;
            }
            let date = t.occurred_at.with_timezone(&tz).date_naive();
            *buckets.entry((date, t.kind)).or_insert(0) += u64::from(t.magnitude);
        }

        buckets
            .into_iter()
            .map(|((date, kind), total_magnitude)| DailyStockStat {
                date,
                kind,
                total_magnitude,
            })
            .collect()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != STOCK_AGGREGATE_TYPE {
            return Ok(());
        }

        let branch_id = envelope.branch_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if !self.cursors.should_apply(branch_id, aggregate_id, seq)? {
            return Ok(());
        }

        let event: StockLedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let StockLedgerEvent::StockTransactionRecorded(e) = event;

        if e.branch_id != branch_id {
            return Err(ProjectionError::BranchIsolation(
                "event branch_id does not match envelope branch_id".to_string(),
            ));
        }

        let mut rm = self
            .positions
            .get(branch_id, &e.product_id)
            .unwrap_or(StockPositionReadModel {
                branch_id,
                product_id: e.product_id,
                product_name: String::new(),
                quantity: 0,
                last_inbound_at: None,
                last_outbound_at: None,
            });
        rm.product_name = e.product_name.clone();
        match e.kind {
            TransactionKind::Inbound => {
                rm.quantity += i64::from(e.magnitude);
                rm.last_inbound_at = Some(e.occurred_at);
            }
            TransactionKind::Outbound => {
                rm.quantity = (rm.quantity - i64::from(e.magnitude)).max(0);
                rm.last_outbound_at = Some(e.occurred_at);
            }
        }
        self.positions.upsert(branch_id, e.product_id, rm);

        // The push must land before the cursor advances, or the row would be
        // lost to the dedup on redelivery.
        {
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
            let position = history.len() as u64 + 1;
            history.push(StockTransactionView {
                branch_id: e.branch_id,
                product_id: e.product_id,
                product_name: e.product_name,
                magnitude: e.magnitude,
                kind: e.kind,
                occurred_at: e.occurred_at,
                position,
            });
        }

        self.cursors.advance(branch_id, aggregate_id, seq);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use apotheca_core::AggregateId;
    use apotheca_stock::StockTransactionRecorded;

    use crate::read_model::InMemoryBranchStore;

    use super::*;

    fn transaction_envelope(
        branch: BranchId,
        stream: AggregateId,
        seq: u64,
        product: ProductId,
        magnitude: u32,
        kind: TransactionKind,
        occurred_at: DateTime<Utc>,
    ) -> EventEnvelope<JsonValue> {
        let event = StockLedgerEvent::StockTransactionRecorded(StockTransactionRecorded {
            branch_id: branch,
            product_id: product,
            product_name: "Aspirin 100mg".to_string(),
            magnitude,
            kind,
            occurred_at,
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            branch,
            stream,
            STOCK_AGGREGATE_TYPE,
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn inbound_envelope(
        branch: BranchId,
        stream: AggregateId,
        seq: u64,
        product: ProductId,
        magnitude: u32,
    ) -> EventEnvelope<JsonValue> {
        transaction_envelope(
            branch,
            stream,
            seq,
            product,
            magnitude,
            TransactionKind::Inbound,
            Utc::now(),
        )
    }

    #[test]
    fn statistics_buckets_by_calendar_day_and_kind() {
        use chrono::TimeZone;

        let projection = StockPositionsProjection::new(Arc::new(InMemoryBranchStore::new()));
        let branch = BranchId::new();
        let product = ProductId::new();
        let stream = AggregateId::new();

        // 23:30 UTC on Mar 1 is already Mar 2 in Seoul.
        let late_mar_1 = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        let noon_mar_1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let morning_mar_2 = Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap();

        for (seq, magnitude, kind, at) in [
            (1, 10, TransactionKind::Inbound, noon_mar_1),
            (2, 4, TransactionKind::Outbound, noon_mar_1),
            (3, 7, TransactionKind::Inbound, late_mar_1),
            (4, 2, TransactionKind::Inbound, morning_mar_2),
        ] {
            projection
                .apply_envelope(&transaction_envelope(
                    branch, stream, seq, product, magnitude, kind, at,
                ))
                .unwrap();
        }

        let stats = projection.statistics(branch, None, None, chrono_tz::UTC);
        let rows: Vec<_> = stats
            .iter()
            .map(|s| (s.date.to_string(), s.kind, s.total_magnitude))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("2026-03-01".to_string(), TransactionKind::Inbound, 17),
                ("2026-03-01".to_string(), TransactionKind::Outbound, 4),
                ("2026-03-02".to_string(), TransactionKind::Inbound, 2),
            ]
        );

        // Bucketed in Seoul, the 23:30 UTC movement shifts to Mar 2.
        let stats = projection.statistics(branch, None, None, chrono_tz::Asia::Seoul);
        let seoul_mar_2: u64 = stats
            .iter()
            .filter(|s| s.date.to_string() == "2026-03-02" && s.kind == TransactionKind::Inbound)
            .map(|s| s.total_magnitude)
            .sum();
        assert_eq!(seoul_mar_2, 9);
    }

    #[test]
    fn history_survives_a_poisoned_lock() {
        let projection = StockPositionsProjection::new(Arc::new(InMemoryBranchStore::new()));
        let branch = BranchId::new();
        let product = ProductId::new();
        let stream = AggregateId::new();

        projection
            .apply_envelope(&inbound_envelope(branch, stream, 1, product, 5))
            .unwrap();

        // Poison the history lock with a panicking writer.
        let writer = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = projection.history.write().unwrap();
            panic!("writer died");
        }));
        assert!(writer.is_err());

        // Reads still see the recorded rows and later applies still land.
        projection
            .apply_envelope(&inbound_envelope(branch, stream, 2, product, 3))
            .unwrap();
        let page = projection.history(
            branch,
            &StockHistoryFilter::default(),
            crate::pagination::PageRequest::default(),
        );
        assert_eq!(page.total_elements, 2);
        assert_eq!(projection.get(branch, product).unwrap().quantity, 8);
    }
}
