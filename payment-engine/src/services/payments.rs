//! Payment recording: the engine's write path.
//!
//! A payment touches two collections. The invoice is written first in the
//! `pending` commit state, then the client's history; the invoice is only
//! marked `committed` once the client write has landed. A failed client
//! write removes the invoice again.

use crate::models::{
    validate_non_negative_amount, validate_positive_amount, Client, ClientPatch, CommitState,
    CreateInvoice, Invoice, InvoiceItem, InvoicePatch, InvoiceStatus, PaymentEntry,
    PaymentMethod, PaymentStatus,
};
use crate::services::bus::{BusEvent, NotificationBus};
use crate::services::ids::IdGenerator;
use crate::services::metrics::{record_compensation, record_correction, record_error, record_payment};
use crate::services::repository::{ClientRepository, InvoiceRepository};
use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_SERVICE_DESCRIPTION: &str = "Payment received";

/// Input for recording a payment.
#[derive(Debug, Clone, Validate)]
pub struct RecordPayment {
    pub client_id: Uuid,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[validate(length(min = 1, max = 200, message = "Reference must be 1-200 characters"))]
    pub reference: Option<String>,
    pub date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 200, message = "Description must be 1-200 characters"))]
    pub service_description: Option<String>,
}

/// Input for correcting a previously recorded payment.
#[derive(Debug, Clone, Validate)]
pub struct CorrectPayment {
    pub client_id: Uuid,
    pub entry_id: Uuid,
    /// Replacement amount; zero voids the corrected payment.
    #[validate(custom(function = "validate_non_negative_amount"))]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 200, message = "A correction needs a reason"))]
    pub reason: String,
    pub date: Option<NaiveDate>,
}

/// Result of a successful `record_payment`.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub invoice: Invoice,
    pub client: Client,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub max_write_attempts: u32,
    pub default_service_description: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
            default_service_description: DEFAULT_SERVICE_DESCRIPTION.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct PaymentRecordingService {
    clients: ClientRepository,
    invoices: InvoiceRepository,
    bus: NotificationBus,
    ids: Arc<dyn IdGenerator>,
    settings: PaymentSettings,
}

fn overpayment(amount: Decimal, remaining: Decimal) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(
        "Payment amount {} exceeds remaining balance {}",
        amount,
        remaining
    ))
}

impl PaymentRecordingService {
    pub fn new(
        clients: ClientRepository,
        invoices: InvoiceRepository,
        bus: NotificationBus,
        ids: Arc<dyn IdGenerator>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            clients,
            invoices,
            bus,
            ids,
            settings,
        }
    }

    /// Record a payment: issue a paid invoice, append the history entry,
    /// re-derive the status and notify subscribers.
    #[instrument(skip(self, input), fields(client_id = %input.client_id, amount = %input.amount))]
    pub fn record_payment(&self, input: RecordPayment) -> Result<PaymentReceipt, AppError> {
        let result = self.try_record_payment(input);
        if let Err(e) = &result {
            record_error(e.error_type());
        }
        result
    }

    fn try_record_payment(&self, input: RecordPayment) -> Result<PaymentReceipt, AppError> {
        input.validate()?;

        let client = self.clients.require(input.client_id)?;
        let remaining = client.remaining();
        if input.amount > remaining {
            return Err(overpayment(input.amount, remaining));
        }

        let date = input.date.unwrap_or_else(|| Utc::now().date_naive());
        let description = input
            .service_description
            .clone()
            .unwrap_or_else(|| self.settings.default_service_description.clone());

        let invoice = self.invoices.create(CreateInvoice {
            client_id: client.id,
            items: vec![InvoiceItem {
                description: description.clone(),
                quantity: Decimal::ONE,
                unit_amount: input.amount,
            }],
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            status: InvoiceStatus::Paid,
            commit_state: CommitState::Pending,
            payment_method: Some(input.method),
            payment_reference: input.reference.clone(),
            date,
            due_date: date,
        })?;

        let entry = PaymentEntry {
            entry_id: self.ids.record_id(),
            date,
            amount: input.amount,
            description,
            method: input.method,
            reference: input.reference.clone(),
            invoice_id: Some(invoice.id),
            corrects: None,
            recorded_utc: Utc::now(),
        };

        let client = match self.append_entry(client.id, entry, |current, entry| {
            let remaining = current.remaining();
            if entry.amount > remaining {
                return Err(overpayment(entry.amount, remaining));
            }
            Ok(())
        }) {
            Ok(client) => client,
            Err(e) => {
                self.compensate(&invoice, &e);
                return Err(e);
            }
        };

        let invoice = match self.invoices.update(
            invoice.id,
            InvoicePatch {
                commit_state: Some(CommitState::Committed),
                ..Default::default()
            },
        ) {
            Ok(committed) => committed,
            Err(e) => {
                warn!(
                    invoice_id = %invoice.id,
                    error = %e,
                    "Payment recorded but invoice left pending; reconcile will commit it"
                );
                invoice
            }
        };

        record_payment(input.method.as_str(), input.amount.to_f64().unwrap_or(0.0));
        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            payment_status = %client.payment_status,
            remaining = %client.remaining(),
            "Payment recorded"
        );

        self.bus.publish(&BusEvent::PaymentRecorded {
            client_id: client.id,
            amount: input.amount,
            invoice_id: invoice.id,
        });

        Ok(PaymentReceipt { invoice, client })
    }

    /// Append a correction that supersedes an earlier entry. Invoices are
    /// left untouched.
    #[instrument(skip(self, input), fields(client_id = %input.client_id, entry_id = %input.entry_id))]
    pub fn record_correction(&self, input: CorrectPayment) -> Result<Client, AppError> {
        let result = self.try_record_correction(input);
        if let Err(e) = &result {
            record_error(e.error_type());
        }
        result
    }

    fn try_record_correction(&self, input: CorrectPayment) -> Result<Client, AppError> {
        input.validate()?;

        let client = self.clients.require(input.client_id)?;
        let original = client.find_entry(input.entry_id).cloned().ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Payment entry {} not found for client {}",
                input.entry_id,
                input.client_id
            ))
        })?;

        let correction = PaymentEntry {
            entry_id: self.ids.record_id(),
            date: input.date.unwrap_or_else(|| Utc::now().date_naive()),
            amount: input.amount,
            description: input.reason.clone(),
            method: original.method,
            reference: original.reference.clone(),
            invoice_id: None,
            corrects: Some(original.entry_id),
            recorded_utc: Utc::now(),
        };
        let correction_id = correction.entry_id;

        let client = self.append_entry(client.id, correction, |current, entry| {
            let target = current.find_entry(input.entry_id).ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Payment entry {} not found", input.entry_id))
            })?;
            if current.is_superseded(target.entry_id) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Payment entry {} has already been corrected",
                    target.entry_id
                )));
            }
            let corrected_total = current
                .total_paid()
                .checked_sub(target.amount)
                .and_then(|t| t.checked_add(entry.amount))
                .ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!(
                        "Correction amount {} is out of range",
                        entry.amount
                    ))
                })?;
            if corrected_total > current.total_amount {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Correction would bring total paid to {} above contracted total {}",
                    corrected_total,
                    current.total_amount
                )));
            }
            Ok(())
        })?;

        let kind = if input.amount.is_zero() { "void" } else { "amend" };
        record_correction(kind);
        info!(
            correction_id = %correction_id,
            kind = kind,
            payment_status = %client.payment_status,
            "Payment corrected"
        );

        self.bus.publish(&BusEvent::PaymentCorrected {
            client_id: client.id,
            entry_id: correction_id,
            corrects: input.entry_id,
        });

        Ok(client)
    }

    /// Append `entry` to a fresh read of the client's history and write it
    /// back with the derived status. `check` runs against each fresh read;
    /// a version conflict re-reads and retries.
    fn append_entry<F>(&self, client_id: Uuid, entry: PaymentEntry, check: F) -> Result<Client, AppError>
    where
        F: Fn(&Client, &PaymentEntry) -> Result<(), AppError>,
    {
        let attempts = self.settings.max_write_attempts.max(1);
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let current = self.clients.require(client_id)?;
            check(&current, &entry)?;

            let mut history = current.payment_history.clone();
            history.push(entry.clone());
            let mut next = current.clone();
            next.payment_history = history.clone();
            let status = PaymentStatus::derive(next.total_paid(), next.total_amount);

            match self.clients.update(
                client_id,
                ClientPatch {
                    payment_history: Some(history),
                    payment_status: Some(status),
                    expected_version: Some(current.version),
                    ..Default::default()
                },
            ) {
                Ok(client) => return Ok(client),
                Err(e) if e.is_conflict() => {
                    warn!(attempt = attempt, error = %e, "Client changed concurrently, retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| {
            AppError::Conflict(anyhow::anyhow!("Client {} kept changing concurrently", client_id))
        }))
    }

    /// Remove an invoice whose paired client write failed.
    fn compensate(&self, invoice: &Invoice, cause: &AppError) {
        match self.invoices.delete(invoice.id) {
            Ok(_) => {
                record_compensation("succeeded");
                warn!(
                    invoice_id = %invoice.id,
                    cause = %cause,
                    "Client write failed; invoice removed"
                );
            }
            Err(e) => {
                record_compensation("failed");
                error!(
                    invoice_id = %invoice.id,
                    cause = %cause,
                    error = %e,
                    "Client write failed and invoice could not be removed; it stays pending until reconciled"
                );
            }
        }
    }
}
