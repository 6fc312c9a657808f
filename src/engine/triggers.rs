//! Side-table of untriggered stop and take-profit orders.
//!
//! Orders wait here until a trade price crosses their stop, then get
//! rewritten into regular market/limit orders and re-submitted through the
//! book. Evaluation within a batch follows insertion order.

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::models::{Order, OrderStatus, OrderType};

#[derive(Debug, Default)]
pub struct TriggerTable {
    pending: Vec<Order>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn insert(&mut self, order: Order) {
        info!(
            order_id = %order.id,
            order_type = %order.order_type,
            stop_price = %order.stop_price.unwrap_or_default(),
            "pending trigger order added"
        );
        self.pending.push(order);
    }

    /// Remove and cancel a pending order by id.
    pub fn cancel(&mut self, order_id: Uuid) -> Option<Order> {
        let pos = self.pending.iter().position(|o| o.id == order_id)?;
        let mut order = self.pending.remove(pos);
        order.status = OrderStatus::Canceled;
        info!(%order_id, "pending trigger order canceled");
        Some(order)
    }

    /// Drain every order activated by the given trade price, rewritten for
    /// re-submission: stops and take-profits become market orders, stop-limits
    /// become limit orders at their post-trigger cap.
    pub fn take_triggered(&mut self, last_price: Decimal) -> Vec<Order> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let mut triggered = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending.len());
        for order in self.pending.drain(..) {
            if order.is_triggered(last_price) {
                triggered.push(promote(order));
            } else {
                remaining.push(order);
            }
        }
        self.pending = remaining;

        triggered
    }

    /// Pending orders in insertion order, for bulk persistence.
    pub fn orders(&self) -> &[Order] {
        &self.pending
    }
}

fn promote(mut order: Order) -> Order {
    match order.order_type {
        OrderType::StopLoss | OrderType::TakeProfit => {
            order.order_type = OrderType::Market;
        }
        OrderType::StopLimit => {
            order.order_type = OrderType::Limit;
            order.price = order.limit_price;
        }
        _ => unreachable!("only conditional orders rest in the trigger table"),
    }
    order.status = OrderStatus::Open;
    info!(
        order_id = %order.id,
        order_type = %order.order_type,
        "trigger order promoted"
    );
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderDraft, Side};
    use rust_decimal_macros::dec;

    fn pending(order_type: OrderType, side: Side, stop: Decimal) -> Order {
        Order::from_draft(OrderDraft {
            symbol: "BTC-USDT".to_string(),
            order_type,
            side,
            quantity: dec!(1.0),
            price: None,
            stop_price: Some(stop),
            limit_price: Some(dec!(48900)),
        })
    }

    #[test]
    fn test_take_triggered_partitions_by_price() {
        let mut table = TriggerTable::new();
        table.insert(pending(OrderType::StopLoss, Side::Sell, dec!(49000)));
        table.insert(pending(OrderType::StopLoss, Side::Sell, dec!(47000)));

        let triggered = table.take_triggered(dec!(48000));
        assert_eq!(triggered.len(), 1);
        assert_eq!(table.len(), 1);

        // Untriggered orders stay put.
        let triggered = table.take_triggered(dec!(48000));
        assert!(triggered.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_promotion_rewrites() {
        let mut table = TriggerTable::new();
        table.insert(pending(OrderType::StopLoss, Side::Sell, dec!(49000)));
        table.insert(pending(OrderType::StopLimit, Side::Sell, dec!(49000)));

        let triggered = table.take_triggered(dec!(48500));
        assert_eq!(triggered.len(), 2);

        assert_eq!(triggered[0].order_type, OrderType::Market);
        assert_eq!(triggered[0].status, OrderStatus::Open);

        assert_eq!(triggered[1].order_type, OrderType::Limit);
        assert_eq!(triggered[1].price, Some(dec!(48900)));
        assert_eq!(triggered[1].status, OrderStatus::Open);
    }

    #[test]
    fn test_evaluation_follows_insertion_order() {
        let mut table = TriggerTable::new();
        let first = pending(OrderType::StopLoss, Side::Sell, dec!(49000));
        let second = pending(OrderType::StopLoss, Side::Sell, dec!(49000));
        let (first_id, second_id) = (first.id, second.id);
        table.insert(first);
        table.insert(second);

        let triggered = table.take_triggered(dec!(48000));
        assert_eq!(triggered[0].id, first_id);
        assert_eq!(triggered[1].id, second_id);
    }

    #[test]
    fn test_cancel_pending() {
        let mut table = TriggerTable::new();
        let order = pending(OrderType::TakeProfit, Side::Buy, dec!(45000));
        let id = order.id;
        table.insert(order);

        let canceled = table.cancel(id).unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(table.is_empty());
        assert!(table.cancel(id).is_none());
    }
}
