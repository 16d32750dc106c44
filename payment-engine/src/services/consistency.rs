//! Consistency checks between a client's stored status, its payment history
//! and the invoices issued for it. Findings are reported, never repaired here.

use crate::models::{Client, CommitState, Invoice, PaymentStatus};
use crate::services::metrics::record_violation;
use crate::services::repository::{ClientRepository, InvoiceRepository};
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Stored status differs from the one the history derives.
    StatusMismatch {
        expected: PaymentStatus,
        actual: PaymentStatus,
    },
    /// Committed paid invoices do not pair one-to-one with payment entries.
    /// Needs a human to decide which side is right.
    InvoiceHistoryMismatch {
        paid_invoices: usize,
        history_entries: usize,
    },
    /// Invoice whose paired client write was never confirmed.
    PendingInvoice {
        invoice_id: Uuid,
        referenced_by_history: bool,
    },
}

impl Violation {
    pub fn kind(&self) -> &'static str {
        match self {
            Violation::StatusMismatch { .. } => "status_mismatch",
            Violation::InvoiceHistoryMismatch { .. } => "invoice_history_mismatch",
            Violation::PendingInvoice { .. } => "pending_invoice",
        }
    }

    pub fn is_auto_repairable(&self) -> bool {
        !matches!(self, Violation::InvoiceHistoryMismatch { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub client_id: Uuid,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has_status_mismatch(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, Violation::StatusMismatch { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub clients_checked: usize,
    pub reports: Vec<ValidationReport>,
}

impl AuditReport {
    pub fn inconsistent_clients(&self) -> impl Iterator<Item = &ValidationReport> {
        self.reports.iter().filter(|r| !r.is_valid())
    }

    pub fn summary(&self) -> String {
        match self.inconsistent_clients().count() {
            0 => format!("All {} clients are consistent", self.clients_checked),
            1 => "1 client has inconsistent payment data".to_string(),
            n => format!("{} clients have inconsistent payment data", n),
        }
    }
}

/// Pure check of one client against its invoices.
pub fn check_client(client: &Client, invoices: &[Invoice]) -> Vec<Violation> {
    let mut violations = Vec::new();

    let expected = client.expected_status();
    if expected != client.payment_status {
        violations.push(Violation::StatusMismatch {
            expected,
            actual: client.payment_status,
        });
    }

    let paid_invoices = invoices
        .iter()
        .filter(|i| i.client_id == client.id && i.counts_as_paid())
        .count();
    let history_entries = client.payment_count();
    if paid_invoices != history_entries {
        violations.push(Violation::InvoiceHistoryMismatch {
            paid_invoices,
            history_entries,
        });
    }

    for invoice in invoices
        .iter()
        .filter(|i| i.client_id == client.id && i.commit_state == CommitState::Pending)
    {
        let referenced_by_history = client
            .payment_history
            .iter()
            .any(|e| e.invoice_id == Some(invoice.id));
        violations.push(Violation::PendingInvoice {
            invoice_id: invoice.id,
            referenced_by_history,
        });
    }

    violations
}

#[derive(Clone)]
pub struct ConsistencyValidator {
    clients: ClientRepository,
    invoices: InvoiceRepository,
}

impl ConsistencyValidator {
    pub fn new(clients: ClientRepository, invoices: InvoiceRepository) -> Self {
        Self { clients, invoices }
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    pub fn validate(&self, client_id: Uuid) -> Result<ValidationReport, AppError> {
        let client = self.clients.require(client_id)?;
        let invoices = self.invoices.list_by_client(client_id)?;
        let report = ValidationReport {
            client_id,
            violations: check_client(&client, &invoices),
        };
        log_findings(&report);
        Ok(report)
    }

    /// Validate every stored client against one read of the invoices.
    #[instrument(skip(self))]
    pub fn validate_all(&self) -> Result<AuditReport, AppError> {
        let clients = self.clients.list()?;
        let invoices = self.invoices.list()?;

        let reports: Vec<ValidationReport> = clients
            .iter()
            .map(|client| ValidationReport {
                client_id: client.id,
                violations: check_client(client, &invoices),
            })
            .collect();
        reports.iter().for_each(log_findings);

        let audit = AuditReport {
            clients_checked: clients.len(),
            reports,
        };
        info!(
            clients_checked = audit.clients_checked,
            inconsistent = audit.inconsistent_clients().count(),
            "{}",
            audit.summary()
        );
        Ok(audit)
    }
}

fn log_findings(report: &ValidationReport) {
    for violation in &report.violations {
        record_violation(violation.kind());
        warn!(
            client_id = %report.client_id,
            kind = violation.kind(),
            auto_repairable = violation.is_auto_repairable(),
            "Consistency violation"
        );
    }
}
