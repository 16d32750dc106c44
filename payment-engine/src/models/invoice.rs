//! Invoice model for payment-engine.

use crate::models::PaymentMethod;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }
}

/// Whether the client write paired with this invoice is known to have landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Pending,
    #[default]
    Committed,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Committed => "committed",
        }
    }
}

/// Line item on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_amount: Decimal,
}

impl InvoiceItem {
    /// `None` when the product overflows.
    pub fn line_total(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_amount)
    }
}

/// Billing document. Totals are fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub items: Vec<InvoiceItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub grand_total: Decimal,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub commit_state: CommitState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    pub date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub version: u64,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    /// Paid and committed: the invoices that pair with payment entries.
    pub fn counts_as_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid && self.commit_state == CommitState::Committed
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub client_id: Uuid,
    pub items: Vec<InvoiceItem>,
    pub tax: Decimal,
    pub discount: Decimal,
    pub status: InvoiceStatus,
    pub commit_state: CommitState,
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<String>,
    pub date: NaiveDate,
    pub due_date: NaiveDate,
}

/// Input for updating an invoice.
#[derive(Debug, Clone, Default)]
pub struct InvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub commit_state: Option<CommitState>,
    pub expected_version: Option<u64>,
}

impl InvoicePatch {
    pub fn apply_to(self, invoice: &mut Invoice) {
        if let Some(status) = self.status {
            invoice.status = status;
        }
        if let Some(commit_state) = self.commit_state {
            invoice.commit_state = commit_state;
        }
    }
}

/// Singleton document backing invoice numbers. Never decremented.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceSequence {
    pub last_number: u32,
    pub last_year: i32,
}

impl Default for InvoiceSequence {
    fn default() -> Self {
        use chrono::Datelike;
        Self {
            last_number: 0,
            last_year: Utc::now().year(),
        }
    }
}

impl InvoiceSequence {
    /// Advance the sequence. The year prefix only moves forward, so a
    /// skewed clock cannot bring back numbers already handed out.
    pub fn next_number(&mut self, year: i32) -> String {
        if year > self.last_year {
            self.last_year = year;
            self.last_number = 0;
        }
        self.last_number += 1;
        format!("INV-{}-{:05}", self.last_year, self.last_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_commit_state_reads_as_committed() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "invoice_number": "INV-2024-00001",
            "client_id": Uuid::new_v4(),
            "items": [{"description": "Photo session", "quantity": "1", "unit_amount": "250"}],
            "subtotal": "250",
            "tax": "0",
            "discount": "0",
            "grand_total": "250",
            "status": "paid",
            "date": "2024-05-01",
            "due_date": "2024-05-01",
            "created_utc": "2024-05-01T10:00:00Z"
        });
        let invoice: Invoice = serde_json::from_value(json).unwrap();
        assert_eq!(invoice.commit_state, CommitState::Committed);
        assert!(invoice.counts_as_paid());
        assert_eq!(invoice.version, 0);
    }

    #[test]
    fn line_total_overflow_is_none() {
        let item = InvoiceItem {
            description: "Canvas print".to_string(),
            quantity: Decimal::from(3),
            unit_amount: Decimal::from(40),
        };
        assert_eq!(item.line_total(), Some(Decimal::from(120)));

        let huge = InvoiceItem {
            quantity: Decimal::from(2),
            unit_amount: Decimal::MAX,
            ..item
        };
        assert_eq!(huge.line_total(), None);
    }

    #[test]
    fn sequence_restarts_numbering_each_year() {
        let mut seq = InvoiceSequence {
            last_number: 41,
            last_year: 2023,
        };
        assert_eq!(seq.next_number(2023), "INV-2023-00042");
        assert_eq!(seq.next_number(2024), "INV-2024-00001");
        assert_eq!(seq.next_number(2024), "INV-2024-00002");
        assert_eq!(seq.next_number(2023), "INV-2024-00003");
    }
}
