use std::sync::{
    atomic::{AtomicI32, Ordering},
    Arc,
};

use log::*;
use settlement_engine::{
    db_types::{Container, LineTarget},
    events::{EventHandlers, EventHooks},
    test_utils::{
        fakes::{FakeGateway, RecordingNotifier},
        fixtures::*,
        prepare_env::prepare_test_store,
    },
    EngineConfig,
    SettlementApi,
};
use tokio::{runtime::Runtime, time::sleep};

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }
}

#[test]
fn settlement_hooks_fire() {
    let rt = Runtime::new().unwrap();
    let payments = HookCalled::default();
    let orders = HookCalled::default();
    let (p, o) = (payments.clone(), orders.clone());
    rt.block_on(async move {
        let store = prepare_test_store().await;
        let mut hooks = EventHooks::default();
        hooks
            .on_payment_settled(move |ev| {
                info!("🪝️ Payment settled on {}: {:?}", ev.order_id, ev.lines);
                p.called();
                Box::pin(async {})
            })
            .on_order_settled(move |ev| {
                info!("🪝️ Order {} settled", ev.order.id);
                o.called();
                Box::pin(async {})
            });
        let handlers = EventHandlers::new(10, hooks);
        let producers = handlers.producers();
        handlers.start_handlers().await;

        let gateway = FakeGateway::default();
        let notifier = RecordingNotifier::default();
        let api = SettlementApi::new(store, gateway.clone(), notifier, EngineConfig::default(), producers);
        seed(api.store(), Container::Vendors, &vendor("M1", "m1@example.com", Some("acct_m1")), "M1").await;
        seed(api.store(), Container::Vendors, &vendor("M2", "m2@example.com", Some("acct_m2")), "M2").await;
        let lines = vec![
            line("L1", "M1", LineTarget::CaseInvoiceLine, 1000, 1),
            line("L2", "M2", LineTarget::CaseInvoiceLine, 2000, 1),
        ];
        seed(api.store(), Container::Orders, &order("O1", "buyer@example.com", lines), "O1").await;
        gateway.add_charge(charge_details("ch_1", 1200, 40, 0));
        gateway.add_charge(charge_details("ch_2", 2300, 70, 0));

        let first = api.settle_capture(&captured("evt_1", "ch_1", "O1", "M1", 0)).await.unwrap();
        assert!(!first.fully_settled);
        let second = api.settle_capture(&captured("evt_2", "ch_2", "O1", "M2", 0)).await.unwrap();
        assert!(second.fully_settled);
        // A replay fires nothing
        api.settle_capture(&captured("evt_2", "ch_2", "O1", "M2", 0)).await.unwrap();
        sleep(std::time::Duration::from_millis(100)).await;
    });
    assert_eq!(payments.count(), 2);
    assert_eq!(orders.count(), 1);
    info!("🪝️ test complete");
}
