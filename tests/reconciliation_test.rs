//! Reconciliation flow tests over an in-memory order store.
//!
//! The gateway trait is the seam the reconciler writes through in
//! production; these tests drive the same service against a hash map to
//! verify idempotency, ordering, and the exactly-once confirmation side
//! effect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use aurea_api::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::CouponGateway,
    services::orders::{OrderGateway, PaymentTransition},
    services::reconciliation::{
        PaymentNotification, PaymentReconciliationService, ReconcileOutcome,
    },
};

#[derive(Default)]
struct InMemoryOrderStore {
    orders: Mutex<HashMap<Uuid, order::Model>>,
}

impl InMemoryOrderStore {
    fn insert(&self, order: order::Model) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    fn get(&self, order_id: Uuid) -> order::Model {
        self.orders.lock().unwrap().get(&order_id).unwrap().clone()
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrderStore {
    async fn find_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| o.external_reference == external_reference)
            .cloned())
    }

    async fn apply_payment_transition(
        &self,
        order_id: Uuid,
        expected_payment_status: &str,
        transition: &PaymentTransition,
    ) -> Result<bool, ServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if order.payment_status != expected_payment_status {
            return Ok(false);
        }
        order.payment_status = transition.payment_status.clone();
        order.status = transition.order_status;
        order.payment_id = transition.payment_id.clone();
        order.updated_at = transition.updated_at;
        Ok(true)
    }

    async fn mark_approval_notified(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if order.approval_notified_at.is_some() {
            return Ok(false);
        }
        order.approval_notified_at = Some(at);
        Ok(true)
    }
}

#[derive(Default)]
struct RecordingCouponStore {
    redemptions: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl CouponGateway for RecordingCouponStore {
    async fn redeem(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        self.redemptions.lock().unwrap().push(coupon_id);
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryOrderStore>,
    coupons: Arc<RecordingCouponStore>,
    service: PaymentReconciliationService,
    events: mpsc::Receiver<Event>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryOrderStore::default());
    let coupons = Arc::new(RecordingCouponStore::default());
    let (tx, rx) = mpsc::channel(64);
    let service = PaymentReconciliationService::new(
        store.clone(),
        coupons.clone(),
        EventSender::new(tx),
    );
    Harness {
        store,
        coupons,
        service,
        events: rx,
    }
}

fn pending_order(external_reference: &str, coupon_id: Option<Uuid>) -> order::Model {
    let id = Uuid::new_v4();
    let now = Utc::now();
    order::Model {
        id,
        order_number: format!("ORD-{}", &id.to_string()[..8]),
        external_reference: external_reference.to_string(),
        subtotal_cents: 28000,
        shipping_cost_cents: 0,
        discount_cents: 0,
        total_cents: 28000,
        currency: "BRL".to_string(),
        status: OrderStatus::Pending,
        payment_status: "pending".to_string(),
        payment_id: None,
        coupon_id,
        approval_notified_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn notification(external_reference: &str, provider_status: &str) -> PaymentNotification {
    PaymentNotification {
        provider_payment_id: "90210".to_string(),
        provider_status: provider_status.to_string(),
        external_reference: external_reference.to_string(),
        amount_cents: 28000,
        payer_email: Some("ana@example.com".to_string()),
        occurred_at: Utc::now(),
    }
}

fn count_confirmations(events: &mut mpsc::Receiver<Event>) -> usize {
    let mut count = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::OrderConfirmed { .. }) {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn approved_notification_confirms_order() {
    let mut h = harness();
    let order = pending_order("ref-1", None);
    let order_id = order.id;
    h.store.insert(order);

    let outcome = h.service.reconcile(&notification("ref-1", "approved")).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            payment_status: "approved".to_string(),
            order_status: OrderStatus::Confirmed,
        }
    );

    let stored = h.store.get(order_id);
    assert_eq!(stored.payment_status, "approved");
    assert_eq!(stored.status, OrderStatus::Confirmed);
    assert_eq!(stored.payment_id.as_deref(), Some("90210"));
    assert!(stored.approval_notified_at.is_some());
    assert_eq!(count_confirmations(&mut h.events), 1);
}

#[tokio::test]
async fn redelivered_approval_is_a_noop() {
    let mut h = harness();
    let order = pending_order("ref-2", None);
    let order_id = order.id;
    h.store.insert(order);

    let first = h.service.reconcile(&notification("ref-2", "approved")).await.unwrap();
    assert!(matches!(first, ReconcileOutcome::Applied { .. }));
    let after_first = h.store.get(order_id);

    let second = h.service.reconcile(&notification("ref-2", "approved")).await.unwrap();
    assert_eq!(second, ReconcileOutcome::Unchanged);

    let after_second = h.store.get(order_id);
    assert_eq!(after_first.payment_status, after_second.payment_status);
    assert_eq!(after_first.status, after_second.status);
    // the confirmation side effect fired exactly once across both deliveries
    assert_eq!(count_confirmations(&mut h.events), 1);
}

#[tokio::test]
async fn stale_notification_never_regresses_a_terminal_payment() {
    let mut h = harness();
    let order = pending_order("ref-3", None);
    let order_id = order.id;
    h.store.insert(order);

    h.service.reconcile(&notification("ref-3", "refunded")).await.unwrap();

    for stale in ["pending", "approved", "in_process"] {
        let outcome = h.service.reconcile(&notification("ref-3", stale)).await.unwrap();
        assert!(
            matches!(outcome, ReconcileOutcome::Stale { .. }),
            "{} should be stale after refunded",
            stale
        );
    }

    let stored = h.store.get(order_id);
    assert_eq!(stored.payment_status, "refunded");
    assert_eq!(stored.status, OrderStatus::Refunded);
    assert_eq!(count_confirmations(&mut h.events), 0);
}

#[tokio::test]
async fn refund_after_approval_applies() {
    let mut h = harness();
    let order = pending_order("ref-4", None);
    let order_id = order.id;
    h.store.insert(order);

    h.service.reconcile(&notification("ref-4", "approved")).await.unwrap();
    let outcome = h.service.reconcile(&notification("ref-4", "charged_back")).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));

    let stored = h.store.get(order_id);
    assert_eq!(stored.payment_status, "charged_back");
    assert_eq!(stored.status, OrderStatus::Refunded);
}

#[tokio::test]
async fn delivered_order_keeps_its_fulfillment_status() {
    let mut h = harness();
    let mut order = pending_order("ref-5", None);
    order.payment_status = "approved".to_string();
    order.status = OrderStatus::Delivered;
    let order_id = order.id;
    h.store.insert(order);

    let outcome = h.service.reconcile(&notification("ref-5", "refunded")).await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            payment_status: "refunded".to_string(),
            order_status: OrderStatus::Delivered,
        }
    );

    let stored = h.store.get(order_id);
    assert_eq!(stored.payment_status, "refunded");
    assert_eq!(stored.status, OrderStatus::Delivered);
}

#[tokio::test]
async fn unknown_provider_status_passes_through_raw() {
    let mut h = harness();
    let order = pending_order("ref-6", None);
    let order_id = order.id;
    h.store.insert(order);

    let outcome = h
        .service
        .reconcile(&notification("ref-6", "partially_refunded"))
        .await
        .unwrap();
    // rank 0 equals rank 0, but the status text differs, so it is written
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            payment_status: "partially_refunded".to_string(),
            order_status: OrderStatus::Pending,
        }
    );
    let stored = h.store.get(order_id);
    assert_eq!(stored.payment_status, "partially_refunded");
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(count_confirmations(&mut h.events), 0);
}

#[tokio::test]
async fn missing_order_is_reported_not_raised() {
    let h = harness();
    let outcome = h
        .service
        .reconcile(&notification("no-such-ref", "approved"))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::OrderNotFound);
}

#[tokio::test]
async fn coupon_redeemed_once_on_first_approval() {
    let mut h = harness();
    let coupon_id = Uuid::new_v4();
    let order = pending_order("ref-7", Some(coupon_id));
    h.store.insert(order);

    h.service.reconcile(&notification("ref-7", "approved")).await.unwrap();
    h.service.reconcile(&notification("ref-7", "approved")).await.unwrap();

    let redemptions = h.coupons.redemptions.lock().unwrap().clone();
    assert_eq!(redemptions, vec![coupon_id]);
    assert_eq!(count_confirmations(&mut h.events), 1);
}

#[tokio::test]
async fn authorized_confirms_without_firing_the_approved_side_effect() {
    let mut h = harness();
    let coupon_id = Uuid::new_v4();
    let order = pending_order("ref-8", Some(coupon_id));
    let order_id = order.id;
    h.store.insert(order);

    let outcome = h.service.reconcile(&notification("ref-8", "authorized")).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));

    let stored = h.store.get(order_id);
    assert_eq!(stored.status, OrderStatus::Confirmed);
    assert!(stored.approval_notified_at.is_none());
    assert!(h.coupons.redemptions.lock().unwrap().is_empty());
    assert_eq!(count_confirmations(&mut h.events), 0);

    // the later capture fires it exactly once
    h.service.reconcile(&notification("ref-8", "approved")).await.unwrap();
    assert_eq!(count_confirmations(&mut h.events), 1);
    assert_eq!(h.coupons.redemptions.lock().unwrap().len(), 1);
}
