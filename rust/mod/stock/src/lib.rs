//! Pond stock ledger.
//!
//! An append-only record of fish population changes per pond and seeding
//! cycle, with the cycle lifecycle that governs which changes are legal.
//! [`SeedingCycleManager`] is the single write path; [`BalanceCalculator`]
//! serves reads.

pub mod api;
pub mod balance;
pub mod config;
pub mod locks;
pub mod manager;
pub mod model;
pub mod schema;
pub mod store;
pub mod validator;

use std::sync::Arc;

use axum::Router;
use aquafarm_core::{Authenticator, Module, ServiceError};
use aquafarm_sql::SQLStore;

pub use balance::BalanceCalculator;
pub use config::LedgerConfig;
pub use manager::SeedingCycleManager;
pub use store::LedgerStore;
pub use validator::{MovementValidator, ProposedMovement};

/// The stock module: ponds, seeding cycles and the movement ledger.
pub struct StockModule {
    manager: Arc<SeedingCycleManager>,
    auth: Arc<dyn Authenticator>,
}

impl StockModule {
    /// Create the module and initialise its schema.
    pub fn new(
        db: Arc<dyn SQLStore>,
        config: LedgerConfig,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self, ServiceError> {
        let manager = Arc::new(SeedingCycleManager::new(db, config)?);
        Ok(Self { manager, auth })
    }

    /// Direct access for in-process callers that bypass HTTP.
    pub fn manager(&self) -> &Arc<SeedingCycleManager> {
        &self.manager
    }
}

impl Module for StockModule {
    fn name(&self) -> &str {
        "stock"
    }

    fn routes(&self) -> Router {
        api::router(Arc::clone(&self.manager), Arc::clone(&self.auth))
    }

    fn permissions(&self) -> &'static [&'static str] {
        &[
            api::PERM_LEDGER_READ,
            api::PERM_LEDGER_WRITE,
            api::PERM_POND_WRITE,
        ]
    }
}
