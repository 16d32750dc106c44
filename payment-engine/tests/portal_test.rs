//! Integration tests for public client links.

mod common;

use common::{engine_on, payment, seed_client, spawn_engine, FailingStore};
use payment_engine::models::PaymentStatus;
use payment_engine::services::NotificationBus;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[test]
fn create_link_is_idempotent_and_stamps_client() {
    let engine = spawn_engine();
    let client = seed_client(&engine, 1_000);

    let first = engine.portal.create_link(client.id).unwrap();
    let second = engine.portal.create_link(client.id).unwrap();

    assert_eq!(first.link_id, second.link_id);
    assert_eq!(first.public_token.len(), 64);
    assert_eq!(engine.links.list().unwrap().len(), 1);
    assert_eq!(
        engine.clients.require(client.id).unwrap().portal_token,
        Some(first.public_token)
    );
}

#[test]
fn lookup_counts_accesses() {
    let engine = spawn_engine();
    let client = seed_client(&engine, 1_000);
    let link = engine.portal.create_link(client.id).unwrap();

    for _ in 0..3 {
        let found = engine
            .portal
            .get_client_by_portal_token(&link.public_token)
            .unwrap();
        assert_eq!(found.id, client.id);
    }

    let stored = engine.links.get_by_id(link.link_id).unwrap().unwrap();
    assert_eq!(stored.access_count, 3);
    assert!(stored.last_accessed_at.is_some());
}

#[test]
fn unknown_token_is_not_found() {
    let engine = spawn_engine();
    let client = seed_client(&engine, 1_000);
    let link = engine.portal.create_link(client.id).unwrap();

    let flipped = if link.public_token.starts_with('a') { "b" } else { "a" };
    let tampered = format!("{}{}", flipped, &link.public_token[1..]);

    for token in ["", "not-a-token", tampered.as_str()] {
        assert!(matches!(
            engine.portal.get_client_by_portal_token(token),
            Err(AppError::NotFound(_))
        ));
    }
    assert_eq!(
        engine.links.find_by_client(client.id).unwrap().unwrap().access_count,
        0
    );
}

#[test]
fn revoked_link_stops_working() {
    let engine = spawn_engine();
    let client = seed_client(&engine, 1_000);
    let link = engine.portal.create_link(client.id).unwrap();

    engine.portal.revoke_link(client.id).unwrap();

    assert!(matches!(
        engine.portal.get_client_by_portal_token(&link.public_token),
        Err(AppError::NotFound(_))
    ));
    assert_eq!(engine.clients.require(client.id).unwrap().portal_token, None);
    assert!(matches!(
        engine.portal.revoke_link(client.id),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn link_for_unknown_client_is_not_found() {
    let engine = spawn_engine();
    assert!(matches!(
        engine.portal.create_link(Uuid::new_v4()),
        Err(AppError::NotFound(_))
    ));
    assert!(engine.links.list().unwrap().is_empty());
}

#[test]
fn public_balance_shows_derived_totals_and_invoices() {
    let engine = spawn_engine();
    let client = seed_client(&engine, 5_000_000);
    engine
        .payments
        .record_payment(payment(client.id, 2_000_000))
        .unwrap();
    let link = engine.portal.create_link(client.id).unwrap();

    let balance = engine.public_balance(&link.public_token).unwrap();

    assert_eq!(balance.client_id, client.id);
    assert_eq!(balance.total_paid, Decimal::from(2_000_000));
    assert_eq!(balance.remaining, Decimal::from(3_000_000));
    assert_eq!(balance.status, PaymentStatus::Partial);
    assert_eq!(balance.invoices.len(), 1);
    assert_eq!(balance, engine.client_balance(client.id).unwrap());
}

#[test]
fn failed_client_write_removes_the_new_link() {
    let backend = Arc::new(FailingStore::new());
    let engine = engine_on(backend.clone(), NotificationBus::new());
    let client = seed_client(&engine, 1_000);

    backend.fail_writes_to("clients");
    let err = engine.portal.create_link(client.id).unwrap_err();
    backend.heal();

    assert!(err.is_storage_full(), "unexpected error: {err:?}");
    assert!(engine.links.list().unwrap().is_empty());
    assert_eq!(engine.clients.require(client.id).unwrap().portal_token, None);

    let link = engine.portal.create_link(client.id).unwrap();
    assert_eq!(
        engine.portal.get_client_by_portal_token(&link.public_token).unwrap().id,
        client.id
    );
}
