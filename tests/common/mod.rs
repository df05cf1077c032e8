#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use tailor_inventory::{
    config::AllocationConfig,
    db::{self, DbConfig},
    events::{self, Event},
    models::FabricRoll,
    repositories::{InMemoryInventoryStore, SeaOrmInventoryStore},
    services::{AllocateInventoryRequest, AllocationOutcome, ReceiveRollRequest},
    FabricRollService, InventoryAllocationService, ServiceError,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Services for one tenant with one registered fabric.
pub struct Harness {
    pub rolls: FabricRollService,
    pub allocations: InventoryAllocationService,
    pub tenant_id: Uuid,
    pub fabric_id: Uuid,
    pub events: mpsc::Receiver<Event>,
    /// Set for in-memory harnesses so tests can open raw transactions.
    pub memory: Option<InMemoryInventoryStore>,
    _dir: Option<TempDir>,
}

impl Harness {
    pub async fn in_memory() -> Self {
        Self::in_memory_with(AllocationConfig::default()).await
    }

    pub async fn in_memory_with(settings: AllocationConfig) -> Self {
        let store = InMemoryInventoryStore::new();
        let (sender, events) = events::channel(256);
        let sender = Arc::new(sender);
        let rolls = FabricRollService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            sender.clone(),
        );
        let allocations = InventoryAllocationService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            sender,
            settings,
        );
        Self::finish(rolls, allocations, events, Some(store), None).await
    }

    /// File-backed SQLite with migrations applied.
    pub async fn sqlite() -> Self {
        Self::sqlite_with(AllocationConfig::default()).await
    }

    pub async fn sqlite_with(settings: AllocationConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let config = DbConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("inventory.db").display()),
            max_connections: 2,
            min_connections: 1,
            statement_timeout: None,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&config).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let store = Arc::new(SeaOrmInventoryStore::new(Arc::new(pool)));
        let (sender, events) = events::channel(256);
        let sender = Arc::new(sender);
        let rolls = FabricRollService::new(store.clone(), store.clone(), sender.clone());
        let allocations =
            InventoryAllocationService::new(store.clone(), store, sender, settings);
        Self::finish(rolls, allocations, events, None, Some(dir)).await
    }

    async fn finish(
        rolls: FabricRollService,
        allocations: InventoryAllocationService,
        events: mpsc::Receiver<Event>,
        memory: Option<InMemoryInventoryStore>,
        dir: Option<TempDir>,
    ) -> Self {
        let tenant_id = Uuid::new_v4();
        let fabric_id = rolls
            .register_fabric(tenant_id, "Charcoal flannel", Some("FL-310".to_string()))
            .await
            .unwrap();
        Self {
            rolls,
            allocations,
            tenant_id,
            fabric_id,
            events,
            memory,
            _dir: dir,
        }
    }

    pub fn memory(&self) -> &InMemoryInventoryStore {
        self.memory.as_ref().expect("in-memory harness")
    }

    pub async fn receive(&self, roll_number: &str, length: Decimal) -> FabricRoll {
        self.rolls
            .receive_roll(ReceiveRollRequest::new(
                self.tenant_id,
                self.fabric_id,
                roll_number,
                length,
            ))
            .await
            .unwrap()
    }

    pub async fn roll(&self, roll_id: Uuid) -> FabricRoll {
        self.rolls.get_roll(self.tenant_id, roll_id).await.unwrap()
    }

    pub fn request(&self, length: Decimal, strategy: Option<&str>) -> AllocateInventoryRequest {
        let mut request =
            AllocateInventoryRequest::new(self.tenant_id, Uuid::new_v4(), self.fabric_id, length);
        request.strategy = strategy.map(str::to_string);
        request
    }

    pub async fn allocate(
        &self,
        length: Decimal,
        strategy: Option<&str>,
    ) -> Result<AllocationOutcome, ServiceError> {
        self.allocations
            .allocate_inventory(self.request(length, strategy))
            .await
    }

    /// Events emitted so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
