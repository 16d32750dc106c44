//! Typed repositories over the persistent store.

use crate::models::{
    Client, ClientPatch, CreateClient, CreateInvoice, Invoice, InvoicePatch, InvoiceSequence,
    PaymentStatus, PublicClientLink,
};
use crate::services::ids::IdGenerator;
use crate::services::store::{Collection, PersistentStore};
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use service_core::error::AppError;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// A record stored in one of the engine's collections.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const COLLECTION: Collection;
    const NAME: &'static str;

    fn id(&self) -> Uuid;
    fn version(&self) -> u64;
    /// Bump the version and any modification timestamp after an update.
    fn touch(&mut self);
}

impl Record for Client {
    const COLLECTION: Collection = Collection::Clients;
    const NAME: &'static str = "Client";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_utc = Utc::now();
    }
}

impl Record for Invoice {
    const COLLECTION: Collection = Collection::Invoices;
    const NAME: &'static str = "Invoice";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

impl Record for PublicClientLink {
    const COLLECTION: Collection = Collection::PublicClientLinks;
    const NAME: &'static str = "Public client link";

    fn id(&self) -> Uuid {
        self.link_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

/// Generic CRUD over one collection.
pub struct Records<T> {
    store: PersistentStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Records<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

fn not_found(name: &str, id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", name, id))
}

impl<T: Record> Records<T> {
    pub fn new(store: PersistentStore) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub fn list(&self) -> Result<Vec<T>, AppError> {
        self.store.get(T::COLLECTION)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<T>, AppError> {
        Ok(self.list()?.into_iter().find(|r| r.id() == id))
    }

    pub fn require(&self, id: Uuid) -> Result<T, AppError> {
        self.get_by_id(id)?.ok_or_else(|| not_found(T::NAME, id))
    }

    pub fn insert(&self, record: T) -> Result<T, AppError> {
        self.store.modify(T::COLLECTION, |records: &mut Vec<T>| {
            if records.iter().any(|r| r.id() == record.id()) {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "{} {} already exists",
                    T::NAME,
                    record.id()
                )));
            }
            records.push(record.clone());
            Ok(record.clone())
        })
    }

    /// Apply `change` to the record, rejecting the write when the stored
    /// version no longer matches `expected_version`.
    pub fn update<F>(&self, id: Uuid, expected_version: Option<u64>, mut change: F) -> Result<T, AppError>
    where
        F: FnMut(&mut T) -> Result<(), AppError>,
    {
        self.store.modify(T::COLLECTION, |records: &mut Vec<T>| {
            let record = records
                .iter_mut()
                .find(|r| r.id() == id)
                .ok_or_else(|| not_found(T::NAME, id))?;

            if let Some(expected) = expected_version {
                if record.version() != expected {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "{} {} is at version {}, expected {}",
                        T::NAME,
                        id,
                        record.version(),
                        expected
                    )));
                }
            }

            change(&mut *record)?;
            record.touch();
            Ok(record.clone())
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<T, AppError> {
        self.store.modify(T::COLLECTION, |records: &mut Vec<T>| {
            let index = records
                .iter()
                .position(|r| r.id() == id)
                .ok_or_else(|| not_found(T::NAME, id))?;
            Ok(records.remove(index))
        })
    }
}

// =============================================================================
// Clients
// =============================================================================

#[derive(Clone)]
pub struct ClientRepository {
    records: Records<Client>,
    ids: Arc<dyn IdGenerator>,
}

impl ClientRepository {
    pub fn new(store: PersistentStore, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            records: Records::new(store),
            ids,
        }
    }

    pub fn list(&self) -> Result<Vec<Client>, AppError> {
        self.records.list()
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Client>, AppError> {
        self.records.get_by_id(id)
    }

    /// Like `get_by_id`, but a missing client is an error.
    pub fn require(&self, id: Uuid) -> Result<Client, AppError> {
        self.records.require(id)
    }

    /// Create a client with an empty payment history.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub fn create(&self, input: CreateClient) -> Result<Client, AppError> {
        input.validate()?;

        let now = Utc::now();
        let client = Client {
            id: self.ids.record_id(),
            name: input.name,
            email: input.email,
            phone: input.phone,
            payment_status: PaymentStatus::derive(Decimal::ZERO, input.total_amount),
            total_amount: input.total_amount,
            payment_history: Vec::new(),
            portal_token: None,
            version: 1,
            created_utc: now,
            updated_utc: now,
        };

        let client = self.records.insert(client)?;
        info!(client_id = %client.id, total_amount = %client.total_amount, "Client created");
        Ok(client)
    }

    /// Shallow-merge `patch` into the stored client.
    #[instrument(skip(self, patch), fields(client_id = %id))]
    pub fn update(&self, id: Uuid, patch: ClientPatch) -> Result<Client, AppError> {
        let expected = patch.expected_version;
        self.records.update(id, expected, |client| {
            patch.clone().apply_to(client);
            Ok(())
        })
    }

    #[instrument(skip(self), fields(client_id = %id))]
    pub fn delete(&self, id: Uuid) -> Result<Client, AppError> {
        let client = self.records.delete(id)?;
        info!("Client deleted");
        Ok(client)
    }
}

// =============================================================================
// Invoices
// =============================================================================

#[derive(Clone)]
pub struct InvoiceRepository {
    store: PersistentStore,
    records: Records<Invoice>,
    ids: Arc<dyn IdGenerator>,
}

impl InvoiceRepository {
    pub fn new(store: PersistentStore, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            records: Records::new(store.clone()),
            store,
            ids,
        }
    }

    pub fn list(&self) -> Result<Vec<Invoice>, AppError> {
        self.records.list()
    }

    pub fn list_by_client(&self, client_id: Uuid) -> Result<Vec<Invoice>, AppError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|i| i.client_id == client_id)
            .collect())
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.records.get_by_id(id)
    }

    /// Allocate the next invoice number. Numbers are never handed out twice.
    pub fn next_invoice_number(&self) -> Result<String, AppError> {
        let year = Utc::now().year();
        self.store
            .modify_document(Collection::InvoiceSequence, |seq: &mut InvoiceSequence| {
                Ok(seq.next_number(year))
            })
    }

    /// Create an invoice, computing its totals.
    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub fn create(&self, input: CreateInvoice) -> Result<Invoice, AppError> {
        if input.items.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoice needs at least one line item"
            )));
        }
        if input.items.iter().any(|i| i.quantity <= Decimal::ZERO) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Line item quantity must be greater than zero"
            )));
        }
        if input.items.iter().any(|i| i.unit_amount < Decimal::ZERO) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Line item amount cannot be negative"
            )));
        }
        if input.tax < Decimal::ZERO || input.discount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Tax and discount cannot be negative"
            )));
        }

        let overflow = || AppError::BadRequest(anyhow::anyhow!("Invoice totals are too large"));
        let subtotal = input
            .items
            .iter()
            .try_fold(Decimal::ZERO, |acc, item| {
                item.line_total().and_then(|line| acc.checked_add(line))
            })
            .ok_or_else(overflow)?;
        let taxed = subtotal.checked_add(input.tax).ok_or_else(overflow)?;
        let grand_total = taxed.checked_sub(input.discount).ok_or_else(overflow)?;
        if grand_total < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Discount {} exceeds subtotal plus tax {}",
                input.discount,
                taxed
            )));
        }

        let invoice = Invoice {
            id: self.ids.record_id(),
            invoice_number: self.next_invoice_number()?,
            client_id: input.client_id,
            items: input.items,
            subtotal,
            tax: input.tax,
            discount: input.discount,
            grand_total,
            status: input.status,
            commit_state: input.commit_state,
            payment_method: input.payment_method,
            payment_reference: input.payment_reference,
            date: input.date,
            due_date: input.due_date,
            version: 1,
            created_utc: Utc::now(),
        };

        let invoice = self.records.insert(invoice)?;
        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            grand_total = %invoice.grand_total,
            status = invoice.status.as_str(),
            commit_state = invoice.commit_state.as_str(),
            "Invoice created"
        );
        Ok(invoice)
    }

    #[instrument(skip(self, patch), fields(invoice_id = %id))]
    pub fn update(&self, id: Uuid, patch: InvoicePatch) -> Result<Invoice, AppError> {
        let expected = patch.expected_version;
        self.records.update(id, expected, |invoice| {
            patch.clone().apply_to(invoice);
            Ok(())
        })
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    pub fn delete(&self, id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self.records.delete(id)?;
        info!(invoice_number = %invoice.invoice_number, "Invoice deleted");
        Ok(invoice)
    }
}

// =============================================================================
// Public client links
// =============================================================================

#[derive(Clone)]
pub struct PortalLinkRepository {
    records: Records<PublicClientLink>,
}

impl PortalLinkRepository {
    pub fn new(store: PersistentStore) -> Self {
        Self {
            records: Records::new(store),
        }
    }

    pub fn list(&self) -> Result<Vec<PublicClientLink>, AppError> {
        self.records.list()
    }

    pub fn get_by_id(&self, link_id: Uuid) -> Result<Option<PublicClientLink>, AppError> {
        self.records.get_by_id(link_id)
    }

    pub fn find_by_client(&self, client_id: Uuid) -> Result<Option<PublicClientLink>, AppError> {
        Ok(self.list()?.into_iter().find(|l| l.client_id == client_id))
    }

    pub fn create(&self, link: PublicClientLink) -> Result<PublicClientLink, AppError> {
        self.records.insert(link)
    }

    pub fn update<F>(&self, link_id: Uuid, change: F) -> Result<PublicClientLink, AppError>
    where
        F: FnMut(&mut PublicClientLink) -> Result<(), AppError>,
    {
        self.records.update(link_id, None, change)
    }

    pub fn delete(&self, link_id: Uuid) -> Result<PublicClientLink, AppError> {
        self.records.delete(link_id)
    }
}
