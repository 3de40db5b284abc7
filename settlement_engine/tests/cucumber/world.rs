use cucumber::World;
use log::*;
use settlement_engine::{
    engine_api::receipts::{RefundReceipt, SettlementReceipt},
    events::EventProducers,
    test_utils::{
        fakes::{FakeGateway, RecordingNotifier},
        prepare_env::prepare_test_store,
    },
    traits::DocumentStore,
    EngineConfig,
    RefundApi,
    SettlementApi,
    SqliteDocumentStore,
};

pub type Settlements = SettlementApi<SqliteDocumentStore, FakeGateway, RecordingNotifier>;
pub type Refunds = RefundApi<SqliteDocumentStore, FakeGateway, RecordingNotifier>;

#[derive(Default, Debug, World)]
pub struct MarketplaceWorld {
    pub system: Option<Marketplace>,
}

#[derive(Debug)]
pub struct Marketplace {
    pub db_path: String,
    pub store: SqliteDocumentStore,
    pub gateway: FakeGateway,
    pub notifier: RecordingNotifier,
    pub settlements: Settlements,
    pub refunds: Refunds,
    pub last_settlement: Option<SettlementReceipt>,
    pub last_refund: Option<RefundReceipt>,
}

impl MarketplaceWorld {
    pub fn system(&mut self) -> &mut Marketplace {
        self.system.as_mut().expect("Marketplace not initialised")
    }

    pub fn store(&self) -> &SqliteDocumentStore {
        &self.system.as_ref().expect("Marketplace not initialised").store
    }
}

impl Marketplace {
    pub async fn new() -> Self {
        let store = prepare_test_store().await;
        let db_path = store.url().to_string();
        debug!("🚀️ Created store: {db_path}");
        let gateway = FakeGateway::default();
        let notifier = RecordingNotifier::default();
        let config = EngineConfig::default();
        let settlements = SettlementApi::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            config.clone(),
            EventProducers::default(),
        );
        let refunds =
            RefundApi::new(store.clone(), gateway.clone(), notifier.clone(), config, EventProducers::default());
        Self { db_path, store, gateway, notifier, settlements, refunds, last_settlement: None, last_refund: None }
    }
}
