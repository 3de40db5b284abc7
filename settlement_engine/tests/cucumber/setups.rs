use cucumber::given;

use crate::cucumber::{world::Marketplace, MarketplaceWorld};

#[given("a fresh install")]
async fn fresh_store(world: &mut MarketplaceWorld) {
    let system = Marketplace::new().await;
    world.system = Some(system);
}
