//! Client model for payment-engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use validator::Validate;

use super::amounts::validate_non_negative_amount;

/// Payment method recorded on a payment entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    EWallet,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::EWallet => "e_wallet",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }
}

/// Payment status derived from the payment history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }

    /// Rules are checked in order, so a zero contract counts as paid.
    pub fn derive(total_paid: Decimal, total_amount: Decimal) -> Self {
        if total_paid >= total_amount {
            PaymentStatus::Paid
        } else if total_paid > Decimal::ZERO {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Pending
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded payment against a client's contracted total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub entry_id: Uuid,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Invoice issued for this payment. Corrections carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<Uuid>,
    /// Entry superseded by this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects: Option<Uuid>,
    pub recorded_utc: DateTime<Utc>,
}

impl PaymentEntry {
    pub fn is_correction(&self) -> bool {
        self.corrects.is_some()
    }
}

/// Customer record with a contracted total and its payment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub total_amount: Decimal,
    #[serde(default)]
    pub payment_history: Vec<PaymentEntry>,
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_token: Option<String>,
    #[serde(default)]
    pub version: u64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Client {
    /// Entries not superseded by a later correction.
    pub fn effective_entries(&self) -> impl Iterator<Item = &PaymentEntry> {
        let superseded: HashSet<Uuid> = self
            .payment_history
            .iter()
            .filter_map(|e| e.corrects)
            .collect();
        self.payment_history
            .iter()
            .filter(move |e| !superseded.contains(&e.entry_id))
    }

    pub fn find_entry(&self, entry_id: Uuid) -> Option<&PaymentEntry> {
        self.payment_history.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn is_superseded(&self, entry_id: Uuid) -> bool {
        self.payment_history
            .iter()
            .any(|e| e.corrects == Some(entry_id))
    }

    pub fn total_paid(&self) -> Decimal {
        self.effective_entries().map(|e| e.amount).sum()
    }

    pub fn remaining(&self) -> Decimal {
        (self.total_amount - self.total_paid()).max(Decimal::ZERO)
    }

    /// Status the stored history implies, regardless of the stored value.
    pub fn expected_status(&self) -> PaymentStatus {
        PaymentStatus::derive(self.total_paid(), self.total_amount)
    }

    /// Entries that were issued an invoice (every non-correction entry).
    pub fn payment_count(&self) -> usize {
        self.payment_history
            .iter()
            .filter(|e| !e.is_correction())
            .count()
    }
}

/// Input for creating a client.
#[derive(Debug, Clone, Validate)]
pub struct CreateClient {
    #[validate(length(min = 1, max = 200, message = "Client name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    #[validate(custom(function = "validate_non_negative_amount"))]
    pub total_amount: Decimal,
}

/// Shallow patch applied by `ClientRepository::update`.
///
/// A supplied `payment_history` replaces the stored one wholesale.
#[derive(Debug, Clone, Default)]
pub struct ClientPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub total_amount: Option<Decimal>,
    pub payment_history: Option<Vec<PaymentEntry>>,
    pub payment_status: Option<PaymentStatus>,
    pub portal_token: Option<Option<String>>,
    pub expected_version: Option<u64>,
}

impl ClientPatch {
    pub fn apply_to(self, client: &mut Client) {
        if let Some(name) = self.name {
            client.name = name;
        }
        if let Some(email) = self.email {
            client.email = Some(email);
        }
        if let Some(phone) = self.phone {
            client.phone = Some(phone);
        }
        if let Some(total_amount) = self.total_amount {
            client.total_amount = total_amount;
        }
        if let Some(history) = self.payment_history {
            client.payment_history = history;
        }
        if let Some(status) = self.payment_status {
            client.payment_status = status;
        }
        if let Some(token) = self.portal_token {
            client.portal_token = token;
        }
    }
}
