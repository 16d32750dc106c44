//! Domain models for payment-engine.

mod amounts;
mod client;
mod invoice;
mod portal;

pub use amounts::{validate_non_negative_amount, validate_positive_amount};
pub use client::{Client, ClientPatch, CreateClient, PaymentEntry, PaymentMethod, PaymentStatus};
pub use invoice::{
    CommitState, CreateInvoice, Invoice, InvoiceItem, InvoicePatch, InvoiceSequence,
    InvoiceStatus,
};
pub use portal::PublicClientLink;
