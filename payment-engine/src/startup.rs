//! Engine wiring.

use crate::config::{EngineConfig, StorageBackend};
use crate::services::store::StorageUsage;
use crate::services::views::{client_balance, ClientBalance, LiveSummary, PaymentSummary};
use crate::services::{
    ClientRepository, ConsistencyValidator, FileStore, IdGenerator, InMemoryStore,
    InvoiceRepository, KeyValueStore, NotificationBus, PaymentRecordingService, PersistentStore,
    PortalLinkRepository, PortalService, RandomIdGenerator, Reconciler,
};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One view's handle on the shared data. Clones share everything; engines
/// built over the same backend and bus behave like tabs of one app.
#[derive(Clone)]
pub struct Engine {
    pub store: PersistentStore,
    pub clients: ClientRepository,
    pub invoices: InvoiceRepository,
    pub links: PortalLinkRepository,
    pub bus: NotificationBus,
    pub payments: PaymentRecordingService,
    pub validator: ConsistencyValidator,
    pub reconciler: Reconciler,
    pub portal: PortalService,
}

impl Engine {
    /// Open the configured backend and wire the services over it.
    pub fn build(config: &EngineConfig) -> Result<Self, AppError> {
        let backend: Arc<dyn KeyValueStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(match config.storage.quota_bytes {
                Some(quota) => InMemoryStore::with_quota(quota),
                None => InMemoryStore::new(),
            }),
            StorageBackend::File => Arc::new(FileStore::open(
                &config.storage.data_dir,
                config.storage.quota_bytes,
            )?),
        };

        info!(
            backend = ?config.storage.backend,
            quota_bytes = ?config.storage.quota_bytes,
            "Storage backend ready"
        );

        Ok(Self::with_backend(backend, NotificationBus::new(), config))
    }

    pub fn with_backend(
        backend: Arc<dyn KeyValueStore>,
        bus: NotificationBus,
        config: &EngineConfig,
    ) -> Self {
        Self::with_ids(backend, bus, Arc::new(RandomIdGenerator), config)
    }

    pub fn with_ids(
        backend: Arc<dyn KeyValueStore>,
        bus: NotificationBus,
        ids: Arc<dyn IdGenerator>,
        config: &EngineConfig,
    ) -> Self {
        let store = PersistentStore::new(backend, config.storage.cas_attempts);
        let clients = ClientRepository::new(store.clone(), ids.clone());
        let invoices = InvoiceRepository::new(store.clone(), ids.clone());
        let links = PortalLinkRepository::new(store.clone());

        let payments = PaymentRecordingService::new(
            clients.clone(),
            invoices.clone(),
            bus.clone(),
            ids.clone(),
            config.payments.settings(),
        );
        let validator = ConsistencyValidator::new(clients.clone(), invoices.clone());
        let reconciler = Reconciler::new(
            clients.clone(),
            invoices.clone(),
            validator.clone(),
            bus.clone(),
        );
        let portal = PortalService::new(clients.clone(), links.clone(), ids);

        Self {
            store,
            clients,
            invoices,
            links,
            bus,
            payments,
            validator,
            reconciler,
            portal,
        }
    }

    pub fn summary(&self) -> Result<PaymentSummary, AppError> {
        PaymentSummary::compute(&self.clients)
    }

    pub fn client_balance(&self, client_id: Uuid) -> Result<ClientBalance, AppError> {
        client_balance(&self.clients, &self.invoices, client_id)
    }

    /// Balance page for a public token holder.
    pub fn public_balance(&self, token: &str) -> Result<ClientBalance, AppError> {
        let client = self.portal.get_client_by_portal_token(token)?;
        Ok(ClientBalance::new(
            &client,
            self.invoices.list_by_client(client.id)?,
        ))
    }

    pub fn storage_usage(&self) -> Result<StorageUsage, AppError> {
        self.store.usage()
    }

    /// Subscribed until the returned summary is dropped or detached.
    pub fn live_summary(&self) -> Result<LiveSummary, AppError> {
        LiveSummary::attach(&self.bus, self.clients.clone())
    }
}
