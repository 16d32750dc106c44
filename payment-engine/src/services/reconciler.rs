//! Explicit repair of auto-repairable violations.

use crate::models::{ClientPatch, CommitState, InvoicePatch};
use crate::services::bus::{BusEvent, NotificationBus};
use crate::services::consistency::{ConsistencyValidator, Violation};
use crate::services::metrics::record_reconciliation;
use crate::services::repository::{ClientRepository, InvoiceRepository};
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub client_id: Uuid,
    pub fixed: bool,
    /// Violations left after repair; only those needing manual resolution.
    pub remaining_violations: Vec<Violation>,
}

#[derive(Clone)]
pub struct Reconciler {
    clients: ClientRepository,
    invoices: InvoiceRepository,
    validator: ConsistencyValidator,
    bus: NotificationBus,
}

impl Reconciler {
    pub fn new(
        clients: ClientRepository,
        invoices: InvoiceRepository,
        validator: ConsistencyValidator,
        bus: NotificationBus,
    ) -> Self {
        Self {
            clients,
            invoices,
            validator,
            bus,
        }
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    pub fn reconcile(&self, client_id: Uuid) -> Result<ReconcileOutcome, AppError> {
        let report = self.validator.validate(client_id)?;
        let mut fixed = false;

        // Invoices first: committing one can resolve a count mismatch.
        for violation in &report.violations {
            if let Violation::PendingInvoice {
                invoice_id,
                referenced_by_history,
            } = violation
            {
                fixed |= self.settle_pending_invoice(*invoice_id, *referenced_by_history)?;
            }
        }

        if report.has_status_mismatch() {
            fixed |= self.repair_status(client_id)?;
        }

        let after = self.validator.validate(client_id)?;
        let outcome = ReconcileOutcome {
            client_id,
            fixed,
            remaining_violations: after.violations,
        };

        if fixed {
            record_reconciliation("fixed");
            self.bus.publish(&BusEvent::ClientReconciled { client_id });
        } else if outcome.remaining_violations.is_empty() {
            record_reconciliation("clean");
        }
        if !outcome.remaining_violations.is_empty() {
            record_reconciliation("unresolved");
            warn!(
                remaining = outcome.remaining_violations.len(),
                "Violations need manual resolution"
            );
        }

        info!(fixed = outcome.fixed, "Client reconciled");
        Ok(outcome)
    }

    /// Reconcile every client whose audit report is not clean.
    #[instrument(skip(self))]
    pub fn reconcile_all(&self) -> Result<Vec<ReconcileOutcome>, AppError> {
        let audit = self.validator.validate_all()?;
        let targets: Vec<Uuid> = audit.inconsistent_clients().map(|r| r.client_id).collect();

        let mut outcomes = Vec::with_capacity(targets.len());
        for client_id in targets {
            match self.reconcile(client_id) {
                Ok(outcome) => outcomes.push(outcome),
                Err(AppError::NotFound(e)) => {
                    warn!(
                        client_id = %client_id,
                        error = %e,
                        "Client disappeared before repair, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            reconciled = outcomes.len(),
            fixed = outcomes.iter().filter(|o| o.fixed).count(),
            "Reconciliation run finished"
        );
        Ok(outcomes)
    }

    /// Rewrite the stored status from a fresh read, guarded by its version.
    fn repair_status(&self, client_id: Uuid) -> Result<bool, AppError> {
        let client = self.clients.require(client_id)?;
        let expected = client.expected_status();
        if expected == client.payment_status {
            return Ok(false);
        }

        self.clients.update(
            client_id,
            ClientPatch {
                payment_status: Some(expected),
                expected_version: Some(client.version),
                ..Default::default()
            },
        )?;
        info!(
            from = client.payment_status.as_str(),
            to = expected.as_str(),
            "Payment status repaired"
        );
        Ok(true)
    }

    /// Commit an invoice the history references; remove one it does not,
    /// since its client write never landed.
    fn settle_pending_invoice(&self, invoice_id: Uuid, referenced: bool) -> Result<bool, AppError> {
        let Some(invoice) = self.invoices.get_by_id(invoice_id)? else {
            return Ok(false);
        };
        if invoice.commit_state != CommitState::Pending {
            return Ok(false);
        }

        if referenced {
            self.invoices.update(
                invoice_id,
                InvoicePatch {
                    commit_state: Some(CommitState::Committed),
                    expected_version: Some(invoice.version),
                    ..Default::default()
                },
            )?;
            info!(invoice_id = %invoice_id, "Pending invoice committed");
        } else {
            self.invoices.delete(invoice_id)?;
            info!(
                invoice_id = %invoice_id,
                invoice_number = %invoice.invoice_number,
                "Orphaned pending invoice removed"
            );
        }
        Ok(true)
    }
}
