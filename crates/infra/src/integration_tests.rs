//! Integration tests for the full checkout pipeline.
//!
//! Tests: Cart → Pricing → Order → Reservation (exclusive scope) → Ledger
//!
//! Verifies:
//! - Stock is never oversold under concurrent reservations
//! - A failed reservation writes nothing
//! - Partial checkouts are reported with their compensation log
//! - Stock always equals the fold of the ledger

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use stockwise_core::{AddressId, ItemId, OrderId, UserId};
    use stockwise_inventory::{Direction, ReferenceType};
    use stockwise_sales::{
        Cart, CatalogItem, CheckoutStage, CompensationLog, NewOrder, OrderLine, OrderStatus,
        ShippingAddress,
    };

    use crate::checkout::{CheckoutError, CheckoutOrchestrator, CheckoutRequest, CompensationPolicy};
    use crate::collaborators::{
        CatalogCollaborator, CollaboratorError, InMemoryAddressBook, InMemoryCatalog,
        InMemoryOrderBook, OrderCollaborator,
    };
    use crate::config::InventoryConfig;
    use crate::ledger::{InMemoryLedger, LedgerError, MovementLedger};
    use crate::reservation::{ReservationEngine, ReservationError};
    use crate::retry::RetryPolicy;
    use crate::services::InventoryServices;

    type Services = InventoryServices<Arc<InMemoryLedger>>;

    struct Shop {
        services: Services,
        catalog: Arc<InMemoryCatalog>,
        orders: Arc<InMemoryOrderBook>,
        addresses: Arc<InMemoryAddressBook>,
        user_id: UserId,
        address_id: AddressId,
    }

    impl Shop {
        fn new(config: InventoryConfig) -> Self {
            stockwise_observability::init_for_tests();

            let user_id = UserId::new();
            let address = ShippingAddress {
                id: AddressId::new(),
                user_id,
                recipient: "Grace Hopper".to_string(),
                line1: "1 Navy Yard".to_string(),
                line2: None,
                city: "Arlington".to_string(),
                postal_code: "22202".to_string(),
                country: "US".to_string(),
            };
            let addresses = Arc::new(InMemoryAddressBook::new());
            addresses.insert(address.clone());

            Self {
                services: InventoryServices::in_memory(config),
                catalog: Arc::new(InMemoryCatalog::new()),
                orders: Arc::new(InMemoryOrderBook::new()),
                addresses,
                user_id,
                address_id: address.id,
            }
        }

        fn default_config() -> InventoryConfig {
            InventoryConfig {
                lock_timeout: Duration::from_millis(200),
                reserve_retry: RetryPolicy::fixed(3, Duration::from_millis(5)),
                ..InventoryConfig::default()
            }
        }

        /// Catalog entry plus initial stock.
        async fn stocked_item(&self, name: &str, unit_price: u64, stock: i64) -> ItemId {
            let id = ItemId::new();
            self.catalog.insert(CatalogItem {
                id,
                name: name.to_string(),
                unit_price,
            });
            if stock > 0 {
                self.services
                    .replenishment
                    .restock(id, stock, "initial stock")
                    .await
                    .unwrap();
            }
            id
        }

        fn orchestrator(&self) -> CheckoutOrchestrator<Arc<InMemoryLedger>> {
            self.services
                .checkout(self.catalog.clone(), self.orders.clone(), self.addresses.clone())
        }

        fn orchestrator_with_orders(
            &self,
            orders: Arc<dyn OrderCollaborator>,
        ) -> CheckoutOrchestrator<Arc<InMemoryLedger>> {
            self.services
                .checkout(self.catalog.clone(), orders, self.addresses.clone())
        }

        fn request(&self, cart: Cart) -> CheckoutRequest {
            CheckoutRequest {
                user_id: self.user_id,
                cart,
                address_id: Some(self.address_id),
            }
        }

        async fn stock(&self, item: ItemId) -> i64 {
            self.services.stock.current_stock(item).await.unwrap()
        }
    }

    /// Order collaborator that lets a competing shopper drain an item right
    /// after the order is created, i.e. between the advisory stock check and
    /// the reservations.
    struct DrainAfterCreate {
        inner: Arc<InMemoryOrderBook>,
        engine: ReservationEngine<Arc<InMemoryLedger>>,
        item: ItemId,
        quantity: i64,
    }

    #[async_trait]
    impl OrderCollaborator for DrainAfterCreate {
        async fn create_order(&self, order: NewOrder) -> Result<OrderId, CollaboratorError> {
            let order_id = self.inner.create_order(order).await?;
            self.engine
                .reserve(self.item, self.quantity, OrderId::new())
                .await
                .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
            Ok(order_id)
        }

        async fn create_order_line(&self, line: OrderLine) -> Result<(), CollaboratorError> {
            self.inner.create_order_line(line).await
        }

        async fn flag_for_compensation(
            &self,
            order_id: OrderId,
            log: &CompensationLog,
        ) -> Result<(), CollaboratorError> {
            self.inner.flag_for_compensation(order_id, log).await
        }
    }

    /// Order collaborator that changes an item's catalog price mid-checkout.
    struct RepriceAfterCreate {
        inner: Arc<InMemoryOrderBook>,
        catalog: Arc<InMemoryCatalog>,
        item: ItemId,
        new_price: u64,
    }

    #[async_trait]
    impl OrderCollaborator for RepriceAfterCreate {
        async fn create_order(&self, order: NewOrder) -> Result<OrderId, CollaboratorError> {
            let order_id = self.inner.create_order(order).await?;
            self.catalog.update_price(self.item, self.new_price).await?;
            Ok(order_id)
        }

        async fn create_order_line(&self, line: OrderLine) -> Result<(), CollaboratorError> {
            self.inner.create_order_line(line).await
        }

        async fn flag_for_compensation(
            &self,
            order_id: OrderId,
            log: &CompensationLog,
        ) -> Result<(), CollaboratorError> {
            self.inner.flag_for_compensation(order_id, log).await
        }
    }

    /// Order collaborator whose line recording is down.
    struct LinesUnavailable {
        inner: Arc<InMemoryOrderBook>,
    }

    #[async_trait]
    impl OrderCollaborator for LinesUnavailable {
        async fn create_order(&self, order: NewOrder) -> Result<OrderId, CollaboratorError> {
            self.inner.create_order(order).await
        }

        async fn create_order_line(&self, _line: OrderLine) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Unavailable("order lines offline".to_string()))
        }

        async fn flag_for_compensation(
            &self,
            order_id: OrderId,
            log: &CompensationLog,
        ) -> Result<(), CollaboratorError> {
            self.inner.flag_for_compensation(order_id, log).await
        }
    }

    // --- Scenario 1: happy path ---

    #[tokio::test]
    async fn checkout_reserves_stock_and_records_order() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 1_500, 10).await;
        let b = shop.stocked_item("Bucket", 300, 5).await;

        let receipt = shop
            .orchestrator()
            .checkout(shop.request(Cart::default().with_line(a, 2).with_line(b, 1)))
            .await
            .unwrap();

        assert_eq!(receipt.total, 2 * 1_500 + 300);
        assert_eq!(shop.stock(a).await, 8);
        assert_eq!(shop.stock(b).await, 4);

        let stored = shop.orders.get(receipt.order_id).unwrap();
        assert_eq!(stored.order.status, OrderStatus::Pending);
        assert_eq!(stored.order.total, receipt.total);
        assert_eq!(stored.order.user_id, shop.user_id);
        assert!(stored.order.address.contains("Arlington"));
        assert_eq!(stored.lines.len(), 2);
        assert_eq!(stored.lines[0].item_id, a);
        assert_eq!(stored.lines[0].quantity, 2);
        assert_eq!(stored.lines[0].unit_price, 1_500);
        assert!(stored.flagged.is_none());

        let reserved = shop
            .services
            .ledger
            .query_by_reference(ReferenceType::Order, receipt.order_id.into())
            .await
            .unwrap();
        assert_eq!(reserved.len(), 2);
        assert!(reserved.iter().all(|m| m.direction == Direction::Out));
    }

    #[tokio::test]
    async fn checkout_falls_back_to_default_address() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 100, 1).await;

        let request = CheckoutRequest {
            address_id: None,
            ..shop.request(Cart::default().with_line(a, 1))
        };
        let receipt = shop.orchestrator().checkout(request).await.unwrap();
        assert!(shop.orders.get(receipt.order_id).unwrap().order.address.contains("Navy Yard"));
    }

    #[tokio::test]
    async fn unit_price_is_frozen_at_pricing_time() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 1_000, 3).await;
        let orders = Arc::new(RepriceAfterCreate {
            inner: shop.orders.clone(),
            catalog: shop.catalog.clone(),
            item: a,
            new_price: 9_999,
        });

        let receipt = shop
            .orchestrator_with_orders(orders)
            .checkout(shop.request(Cart::default().with_line(a, 1)))
            .await
            .unwrap();

        let stored = shop.orders.get(receipt.order_id).unwrap();
        assert_eq!(stored.lines[0].unit_price, 1_000);
        assert_eq!(receipt.total, 1_000);
    }

    // --- Scenario 2: concurrent reservations never oversell ---

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_oversell() {
        let shop = Shop::new(InventoryConfig {
            lock_timeout: Duration::from_secs(5),
            ..Shop::default_config()
        });
        let item = shop.stocked_item("Widget", 100, 10).await;

        let mut handles = Vec::new();
        for _ in 0..25 {
            let engine = shop.services.reservations.clone();
            handles.push(tokio::spawn(async move { engine.reserve(item, 1, OrderId::new()).await }));
        }

        let mut succeeded = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(ReservationError::InsufficientStock(short)) => {
                    assert_eq!(short.available, 0);
                    insufficient += 1;
                }
                Err(other) => panic!("unexpected reservation failure: {other}"),
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(insufficient, 15);
        assert_eq!(shop.stock(item).await, 0);
        assert_eq!(shop.services.stock.rederive_stock(item).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_for_last_unit_have_one_winner() {
        let shop = Arc::new(Shop::new(InventoryConfig {
            lock_timeout: Duration::from_secs(5),
            ..Shop::default_config()
        }));
        let item = shop.stocked_item("Last one", 100, 1).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shop = Arc::clone(&shop);
            handles.push(tokio::spawn(async move {
                shop.orchestrator()
                    .checkout(shop.request(Cart::default().with_line(item, 1)))
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(CheckoutError::InsufficientStock { available, .. }) => assert_eq!(available, 0),
                Err(other) => panic!("unexpected checkout failure: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(shop.stock(item).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn held_lock_on_one_item_does_not_block_another() {
        let shop = Shop::new(InventoryConfig {
            lock_timeout: Duration::from_millis(50),
            reserve_retry: RetryPolicy::no_retry(),
            ..Shop::default_config()
        });
        let busy = shop.stocked_item("Busy", 100, 5).await;
        let free = shop.stocked_item("Free", 100, 5).await;

        let _held = shop.services.ledger.begin_exclusive(busy).await.unwrap();

        shop.services
            .reservations
            .reserve(free, 2, OrderId::new())
            .await
            .unwrap();
        assert_eq!(shop.stock(free).await, 3);
    }

    // --- Scenario 3: insufficient stock at the advisory check ---

    #[tokio::test]
    async fn insufficient_stock_fails_before_any_write() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 100, 10).await;
        let b = shop.stocked_item("Bucket", 100, 1).await;
        let movements_before = shop.services.ledger.len();

        let err = shop
            .orchestrator()
            .checkout(shop.request(Cart::default().with_line(a, 1).with_line(b, 2)))
            .await
            .unwrap_err();

        match err {
            CheckoutError::InsufficientStock {
                item_id,
                item_name,
                requested,
                available,
            } => {
                assert_eq!(item_id, b);
                assert_eq!(item_name, "Bucket");
                assert_eq!(requested, 2);
                assert_eq!(available, 1);
            }
            other => panic!("expected insufficient stock, got {other}"),
        }
        assert!(shop.orders.is_empty());
        assert_eq!(shop.services.ledger.len(), movements_before);
        assert_eq!(shop.stock(a).await, 10);
    }

    #[tokio::test]
    async fn invalid_carts_are_rejected() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 100, 10).await;
        let orchestrator = shop.orchestrator();

        for cart in [
            Cart::default(),
            Cart::default().with_line(a, 0),
            Cart::default().with_line(a, -2),
            Cart::default().with_line(a, 1).with_line(a, 2),
        ] {
            let err = orchestrator.checkout(shop.request(cart)).await.unwrap_err();
            assert!(matches!(err, CheckoutError::InvalidCart(_)), "got {err}");
        }
        assert!(shop.orders.is_empty());
    }

    #[tokio::test]
    async fn unknown_item_and_foreign_address_are_not_found() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 100, 10).await;
        let orchestrator = shop.orchestrator();

        let err = orchestrator
            .checkout(shop.request(Cart::default().with_line(ItemId::new(), 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound(_)));

        let foreign = CheckoutRequest {
            address_id: Some(AddressId::new()),
            ..shop.request(Cart::default().with_line(a, 1))
        };
        let err = orchestrator.checkout(foreign).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound(_)));

        let no_default = CheckoutRequest {
            user_id: UserId::new(),
            cart: Cart::default().with_line(a, 1),
            address_id: None,
        };
        let err = orchestrator.checkout(no_default).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound(_)));

        assert_eq!(shop.stock(a).await, 10);
        assert!(shop.orders.is_empty());
    }

    // --- Scenario 4: stock drained between the check and the reservation ---

    async fn drained_checkout(policy: CompensationPolicy) -> (Shop, ItemId, ItemId, CheckoutError) {
        let shop = Shop::new(InventoryConfig {
            compensation: policy,
            ..Shop::default_config()
        });
        let a = shop.stocked_item("Anvil", 100, 5).await;
        let b = shop.stocked_item("Bucket", 100, 2).await;

        let orders = Arc::new(DrainAfterCreate {
            inner: shop.orders.clone(),
            engine: shop.services.reservations.clone(),
            item: b,
            quantity: 2,
        });
        let err = shop
            .orchestrator_with_orders(orders)
            .checkout(shop.request(Cart::default().with_line(a, 3).with_line(b, 1)))
            .await
            .unwrap_err();
        (shop, a, b, err)
    }

    #[tokio::test]
    async fn drained_line_leaves_earlier_reservations_by_default() {
        let (shop, a, b, err) = drained_checkout(CompensationPolicy::LeaveReserved).await;

        let CheckoutError::PartialCheckout {
            order_id,
            stage,
            failed_line,
            failed_item,
            reserved,
            compensated,
            ..
        } = &err
        else {
            panic!("expected partial checkout, got {err}");
        };
        assert_eq!(*stage, CheckoutStage::Reserving);
        assert_eq!(*failed_line, Some(1));
        assert_eq!(*failed_item, Some(b));
        assert_eq!(reserved.entries.len(), 1);
        assert_eq!(reserved.units_for(a), 3);
        assert!(!compensated);
        assert!(matches!(
            err.root_cause(),
            CheckoutError::InsufficientStock { available: 0, .. }
        ));

        // The gap: A stays decremented until someone compensates.
        assert_eq!(shop.stock(a).await, 2);
        assert_eq!(shop.stock(b).await, 0);

        let stored = shop.orders.get(*order_id).unwrap();
        assert!(stored.lines.is_empty());
        assert_eq!(stored.flagged.as_ref(), Some(reserved));
    }

    #[tokio::test]
    async fn drained_line_is_compensated_when_configured() {
        let (shop, a, _b, err) = drained_checkout(CompensationPolicy::ReleaseReserved).await;

        let CheckoutError::PartialCheckout {
            order_id,
            compensated,
            ..
        } = &err
        else {
            panic!("expected partial checkout, got {err}");
        };
        assert!(*compensated);
        assert_eq!(shop.stock(a).await, 5);

        let releases = shop
            .services
            .ledger
            .query_by_reference(ReferenceType::Adjustment, (*order_id).into())
            .await
            .unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].quantity, 3);
        assert!(shop.orders.get(*order_id).unwrap().flagged.is_some());

        // Compensation is idempotent.
        let again = shop
            .services
            .reservations
            .release_order(*order_id, "retry compensation")
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(shop.stock(a).await, 5);
    }

    #[tokio::test]
    async fn failure_while_recording_lines_is_partial() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 100, 5).await;
        let orders = Arc::new(LinesUnavailable {
            inner: shop.orders.clone(),
        });

        let err = shop
            .orchestrator_with_orders(orders)
            .checkout(shop.request(Cart::default().with_line(a, 2)))
            .await
            .unwrap_err();

        match &err {
            CheckoutError::PartialCheckout {
                stage,
                failed_line,
                reserved,
                ..
            } => {
                assert_eq!(*stage, CheckoutStage::Reserving);
                assert_eq!(*failed_line, None);
                assert_eq!(reserved.units_for(a), 2);
            }
            other => panic!("expected partial checkout, got {other}"),
        }
        assert!(matches!(err.root_cause(), CheckoutError::Collaborator(_)));
        assert_eq!(shop.stock(a).await, 3);
    }

    // --- Lock timeouts ---

    #[tokio::test]
    async fn lock_timeout_is_not_reported_as_insufficient_stock() {
        let shop = Shop::new(InventoryConfig {
            lock_timeout: Duration::from_millis(20),
            reserve_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
            ..Shop::default_config()
        });
        let a = shop.stocked_item("Anvil", 100, 5).await;
        let _held = shop.services.ledger.begin_exclusive(a).await.unwrap();

        let err = shop
            .orchestrator()
            .checkout(shop.request(Cart::default().with_line(a, 1)))
            .await
            .unwrap_err();

        assert!(
            matches!(err, CheckoutError::LockTimeout { item_id, timeout_ms: 20 } if item_id == a),
            "got {err}"
        );
        assert!(err.is_retryable());
        assert_eq!(shop.stock(a).await, 5);
    }

    #[tokio::test]
    async fn direct_reserve_times_out_with_ledger_error() {
        let shop = Shop::new(InventoryConfig {
            lock_timeout: Duration::from_millis(10),
            reserve_retry: RetryPolicy::no_retry(),
            ..Shop::default_config()
        });
        let a = shop.stocked_item("Anvil", 100, 5).await;
        let held = shop.services.ledger.begin_exclusive(a).await.unwrap();

        let err = shop
            .services
            .reservations
            .reserve(a, 1, OrderId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::Ledger(LedgerError::LockTimeout { .. })
        ));

        held.rollback().await.unwrap();
        shop.services
            .reservations
            .reserve(a, 1, OrderId::new())
            .await
            .unwrap();
        assert_eq!(shop.stock(a).await, 4);
    }

    // --- Order release ---

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_release_order_releases_exactly_once() {
        let shop = Shop::new(InventoryConfig {
            lock_timeout: Duration::from_secs(5),
            ..Shop::default_config()
        });
        let a = shop.stocked_item("Anvil", 100, 10).await;
        let order = OrderId::new();
        shop.services.reservations.reserve(a, 4, order).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let engine = shop.services.reservations.clone();
            handles.push(tokio::spawn(async move { engine.release_order(order, "cancelled").await }));
        }
        let mut released = 0;
        for handle in handles {
            released += handle.await.unwrap().unwrap().len();
        }

        assert_eq!(released, 1);
        assert_eq!(shop.stock(a).await, 10);
    }

    #[tokio::test]
    async fn history_and_batch_reads_reflect_the_ledger() {
        let shop = Shop::new(Shop::default_config());
        let a = shop.stocked_item("Anvil", 100, 10).await;
        let b = shop.stocked_item("Bucket", 100, 0).await;
        shop.services.reservations.reserve(a, 3, OrderId::new()).await.unwrap();
        shop.services.replenishment.adjust_up(a, 1, "cycle count").await.unwrap();

        let levels = shop.services.stock.current_stock_batch(&[a, b]).await.unwrap();
        assert_eq!(levels[&a], 8);
        assert_eq!(levels[&b], 0);

        let history = shop
            .services
            .stock
            .stock_history(a, shop.services.config().history_limit)
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].reason, "cycle count");
        assert_eq!(history[2].reason, "initial stock");
    }

    // --- Properties ---

    #[derive(Debug, Clone)]
    enum Op {
        Restock(i64),
        Reserve(i64),
        Release(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::Restock),
            (1i64..50).prop_map(Op::Reserve),
            (1i64..20).prop_map(Op::Release),
        ]
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: stock always equals Σ IN − Σ OUT and never goes negative
        /// when every OUT goes through the reservation engine.
        #[test]
        fn stock_is_conserved_and_non_negative(ops in prop::collection::vec(op_strategy(), 1..40)) {
            runtime().block_on(async {
                let services = InventoryServices::in_memory(InventoryConfig::default());
                let item = ItemId::new();
                let mut model = 0i64;

                for op in ops {
                    match op {
                        Op::Restock(n) => {
                            services.replenishment.restock(item, n, "restock").await.unwrap();
                            model += n;
                        }
                        Op::Reserve(n) => {
                            match services.reservations.reserve(item, n, OrderId::new()).await {
                                Ok(_) => model -= n,
                                Err(ReservationError::InsufficientStock(short)) => {
                                    prop_assert!(n > model);
                                    prop_assert_eq!(short.available, model);
                                }
                                Err(other) => prop_assert!(false, "unexpected error: {}", other),
                            }
                        }
                        Op::Release(n) => {
                            services.reservations.release(item, n, "release").await.unwrap();
                            model += n;
                        }
                    }

                    let current = services.stock.current_stock(item).await.unwrap();
                    prop_assert!(current >= 0);
                    prop_assert_eq!(current, model);
                }

                prop_assert_eq!(
                    services.stock.rederive_stock(item).await.unwrap(),
                    services.stock.current_stock(item).await.unwrap()
                );
                Ok(())
            })?;
        }

        /// Property: a failed checkout never changes stock unless it reports
        /// the reserved lines in a partial checkout.
        #[test]
        fn failed_checkouts_account_for_every_reserved_unit(
            stocks in prop::collection::vec(0i64..5, 1..5),
            wants in prop::collection::vec(1i64..5, 1..5),
        ) {
            runtime().block_on(async {
                let shop = Shop::new(Shop::default_config());
                let mut lines = Vec::new();
                for (idx, stock) in stocks.iter().enumerate() {
                    let id = shop.stocked_item(&format!("item-{idx}"), 10, *stock).await;
                    lines.push((id, *stock));
                }

                let mut cart = Cart::default();
                for ((id, _), want) in lines.iter().zip(wants.iter()) {
                    cart = cart.with_line(*id, *want);
                }

                let outcome = shop.orchestrator().checkout(shop.request(cart.clone())).await;
                for (id, initial) in &lines {
                    let now = shop.stock(*id).await;
                    prop_assert!(now >= 0);
                    let requested = cart
                        .lines
                        .iter()
                        .find(|l| l.item_id == *id)
                        .map(|l| l.quantity)
                        .unwrap_or(0);
                    match &outcome {
                        Ok(_) => prop_assert_eq!(now, initial - requested),
                        Err(CheckoutError::PartialCheckout { reserved, .. }) => {
                            prop_assert_eq!(now, initial - reserved.units_for(*id));
                        }
                        Err(_) => prop_assert_eq!(now, *initial),
                    }
                }
                Ok(())
            })?;
        }
    }
}
