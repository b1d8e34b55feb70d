use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::contracts::Contract;
use crate::directory::JsonFileDirectory;
use crate::engine::{Collaborators, Engine, EngineSettings};
use crate::expenses::Expense;
use crate::json_store::JsonCollection;
use crate::limits::*;

pub const JOURNAL_FILE: &str = "bookings.journal";
pub const VEHICLES_FILE: &str = "vehicles.json";
pub const EMPLOYEES_FILE: &str = "employees.json";
pub const CONTRACTS_FILE: &str = "contracts.json";
pub const EXPENSES_FILE: &str = "expenses.json";

/// Manages per-tenant engines. Each tenant gets its own directory holding the
/// booking journal and the JSON files of its collaborators.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    settings: EngineSettings,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, settings: EngineSettings) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            settings,
        }
    }

    /// Get or lazily create an engine for the given tenant. Names that
    /// sanitise to the same directory share one engine.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let tenant_dir = self.data_dir.join(&safe_name);
        std::fs::create_dir_all(&tenant_dir)?;
        let engine = match self.engines.entry(safe_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let engine = Arc::new(Engine::new(
                    tenant_dir.join(JOURNAL_FILE),
                    tenant_collaborators(&tenant_dir),
                    self.settings,
                )?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        tracing::info!(tenant = %safe_name, "tenant opened at {}", tenant_dir.display());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

fn tenant_collaborators(dir: &Path) -> Collaborators {
    let directory = Arc::new(JsonFileDirectory::new(
        dir.join(VEHICLES_FILE),
        dir.join(EMPLOYEES_FILE),
    ));
    Collaborators {
        vehicles: directory.clone(),
        employees: directory,
        contracts: Arc::new(JsonCollection::<Contract>::file(dir.join(CONTRACTS_FILE))),
        expenses: Arc::new(JsonCollection::<Expense>::file(dir.join(EXPENSES_FILE))),
    }
}
