//! Tailor inventory library
//!
//! Roll-level fabric inventory for multi-tenant tailoring backends: receipt of
//! physical rolls, strategy-driven allocation of lengths to orders under
//! skip-locked row locking, and release of those allocations.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod migrator;
pub mod models;
pub mod repositories;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub use errors::{ErrorResponse, ServiceError};
pub use models::{AllocationStatus, FabricAllocation, FabricRoll, RollStatus};
pub use services::{
    AllocateInventoryRequest, AllocationOutcome, AllocationStrategy, FabricRollService,
    InventoryAllocationService, ReceiveRollRequest,
};

/// Services wired against one database connection.
#[derive(Clone)]
pub struct InventoryServices {
    pub db: Arc<DatabaseConnection>,
    pub rolls: FabricRollService,
    pub allocations: InventoryAllocationService,
}

impl InventoryServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &config::AppConfig,
        event_sender: Arc<events::EventSender>,
    ) -> Self {
        let store = Arc::new(
            repositories::SeaOrmInventoryStore::new(db.clone()).with_statement_timeout(
                config
                    .db_statement_timeout_secs
                    .map(std::time::Duration::from_secs),
            ),
        );
        let rolls = FabricRollService::new(store.clone(), store.clone(), event_sender.clone());
        let allocations = InventoryAllocationService::new(
            store.clone(),
            store,
            event_sender,
            config.allocation.clone(),
        );
        Self {
            db,
            rolls,
            allocations,
        }
    }
}
