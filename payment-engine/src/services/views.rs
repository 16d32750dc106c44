//! Read models rendered by the dashboard and the public client page.
//!
//! Totals are always re-derived from payment histories; stored statuses are
//! never trusted here.

use crate::models::{Client, CommitState, Invoice, PaymentStatus};
use crate::services::bus::{NotificationBus, Subscription, Topic};
use crate::services::repository::{ClientRepository, InvoiceRepository};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentSummary {
    pub clients: usize,
    pub contracted: Decimal,
    pub collected: Decimal,
    pub outstanding: Decimal,
    pub pending: usize,
    pub partial: usize,
    pub paid: usize,
}

impl PaymentSummary {
    pub fn from_clients(clients: &[Client]) -> Self {
        let mut summary = PaymentSummary::default();
        for client in clients {
            summary.clients += 1;
            summary.contracted = summary.contracted.saturating_add(client.total_amount);
            summary.collected = summary.collected.saturating_add(client.total_paid());
            summary.outstanding = summary.outstanding.saturating_add(client.remaining());
            match client.expected_status() {
                PaymentStatus::Pending => summary.pending += 1,
                PaymentStatus::Partial => summary.partial += 1,
                PaymentStatus::Paid => summary.paid += 1,
            }
        }
        summary
    }

    pub fn compute(clients: &ClientRepository) -> Result<Self, AppError> {
        Ok(Self::from_clients(&clients.list()?))
    }
}

/// What the public client page shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientBalance {
    pub client_id: Uuid,
    pub name: String,
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub remaining: Decimal,
    pub status: PaymentStatus,
    pub invoices: Vec<Invoice>,
}

impl ClientBalance {
    pub fn new(client: &Client, invoices: Vec<Invoice>) -> Self {
        let mut invoices: Vec<Invoice> = invoices
            .into_iter()
            .filter(|i| i.client_id == client.id && i.commit_state == CommitState::Committed)
            .collect();
        invoices.sort_by(|a, b| a.invoice_number.cmp(&b.invoice_number));

        Self {
            client_id: client.id,
            name: client.name.clone(),
            total_amount: client.total_amount,
            total_paid: client.total_paid(),
            remaining: client.remaining(),
            status: client.expected_status(),
            invoices,
        }
    }
}

pub fn client_balance(
    clients: &ClientRepository,
    invoices: &InvoiceRepository,
    client_id: Uuid,
) -> Result<ClientBalance, AppError> {
    let client = clients.require(client_id)?;
    Ok(ClientBalance::new(&client, invoices.list_by_client(client_id)?))
}

/// Summary kept current by bus events. Every event triggers a full re-read,
/// so a payment recorded by another engine on the same backend shows up.
///
/// Dropping it ends the subscriptions, same as [`LiveSummary::detach`].
pub struct LiveSummary {
    current: Arc<RwLock<PaymentSummary>>,
    subscriptions: Vec<Subscription>,
}

impl LiveSummary {
    pub fn attach(bus: &NotificationBus, clients: ClientRepository) -> Result<Self, AppError> {
        let current = Arc::new(RwLock::new(PaymentSummary::compute(&clients)?));

        let subscriptions = Topic::all()
            .into_iter()
            .map(|topic| {
                let current = current.clone();
                let clients = clients.clone();
                bus.subscribe(topic, move |event| match PaymentSummary::compute(&clients) {
                    Ok(summary) => {
                        if let Ok(mut slot) = current.write() {
                            *slot = summary;
                        }
                        debug!(topic = event.topic().as_str(), "Summary refreshed");
                    }
                    Err(e) => warn!(error = %e, "Failed to refresh summary, keeping last value"),
                })
            })
            .collect();

        Ok(Self {
            current,
            subscriptions,
        })
    }

    pub fn snapshot(&self) -> PaymentSummary {
        self.current
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for LiveSummary {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}
