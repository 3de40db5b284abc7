//! The gateway delivers at least once, and sometimes several copies of an event arrive together. However the copies
//! interleave, a capture must be applied exactly once. A copy that overlaps the one doing the work is refused, and
//! its redelivery finds the event processed.
use futures_util::future::join_all;
use log::*;
use settlement_engine::{
    db_types::{Container, LineTarget, OrderId, PaidStatus, VariantId},
    test_utils::{
        fakes::{FakeGateway, RecordingNotifier},
        fixtures::*,
        prepare_env::prepare_test_store,
    },
    traits::DocumentStore,
    EngineConfig,
    EngineError,
    SettlementApi,
};
use tokio::runtime::Runtime;

const COPIES: usize = 8;

#[test]
fn burst_of_duplicate_captures() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let store = prepare_test_store().await;
        let gateway = FakeGateway::default();
        let config = EngineConfig { patch_retries: COPIES, ..EngineConfig::default() };
        let api = SettlementApi::new(store, gateway.clone(), RecordingNotifier::default(), config, Default::default());
        seed(api.store(), Container::Vendors, &vendor("M1", "m1@example.com", Some("acct_m1")), "M1").await;
        seed_inventory(api.store(), "V1", 20, 4).await;
        let target = LineTarget::ProductPurchase { variant_id: Some(VariantId::from("V1")) };
        let o = order("O1", "buyer@example.com", vec![line("L1", "M1", target, 4000, 4)]);
        seed(api.store(), Container::Orders, &o, "O1").await;
        gateway.add_charge(charge_details("ch_1", 4500, 120, 0));

        let event = captured("evt_1", "ch_1", "O1", "M1", 0);
        info!("🚀️ Delivering {COPIES} copies of {}", event.event_id);
        let results = join_all((0..COPIES).map(|_| api.settle_capture(&event))).await;
        let mut receipts = vec![];
        for result in results {
            match result {
                Ok(receipt) => receipts.push(receipt),
                Err(EngineError::FollowUpInProgress { .. }) => {
                    let redelivery = api.settle_capture(&event).await.expect("redelivery failed");
                    assert!(redelivery.duplicate);
                },
                Err(e) => panic!("delivery failed. {e}"),
            }
        }
        let with_payment = receipts.iter().filter(|r| r.payment.is_some()).count();
        assert_eq!(with_payment, 1);
        assert!(api.settle_capture(&event).await.unwrap().duplicate);

        let doc = api.store().get_by_id(Container::Orders, "O1", "O1").await.unwrap().unwrap();
        let order = doc.parse::<settlement_engine::db_types::Order>().unwrap();
        assert_eq!(order.id, OrderId::from("O1"));
        assert_eq!(order.payments.len(), 1);
        assert!(order.effects_pending.is_empty());
        let line = &order.lines[0];
        assert_eq!(line.paid_status_log.len(), 1);
        assert_eq!(line.current_paid_status(), Some(PaidStatus::Paid));
        let levels = inventory_levels(api.store(), "V1").await;
        assert_eq!((levels.qty_on_hand, levels.qty_committed), (16, 0));
    });
}
