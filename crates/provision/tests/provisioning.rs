//! Provisioning workflow against a mock DESFire card.

mod common;

use cardsmith_core::{ApplicationId, Config, ErrorKind, OwnerFileConfig, ReaderEvent};
use cardsmith_desfire::{CommandError, TransportError};
use cardsmith_provision::{ProvisioningStatus, PAYLOAD_HEX_LEN};
use common::{within, Harness, MockCard};

const UID: &[u8] = &[0x04, 0x52, 0x6A, 0x82, 0x1B, 0x5C, 0x80];

#[tokio::test]
async fn test_provision_issues_key_and_secret() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    h.tap_desfire(&reader, &card).await;

    let payload = within(h.registry.provision(&reader, None)).await.unwrap();

    let hex = payload.to_hex();
    assert_eq!(hex.len(), PAYLOAD_HEX_LEN);
    assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(&hex[..32], hex::encode(card.app_key()));
    assert_eq!(&hex[32..], hex::encode(card.file(1).unwrap()));
    assert_eq!(
        card.applications(),
        vec![ApplicationId::new(0x1984AC).unwrap()]
    );

    let started = h.next_event().await;
    assert!(matches!(started, ReaderEvent::ProvisioningStarted { .. }));
    match h.next_event().await {
        ReaderEvent::ProvisioningSucceeded {
            reader: r,
            uid,
            payload: p,
            owner,
        } => {
            assert_eq!(r, reader);
            assert_eq!(uid.as_bytes(), UID);
            assert_eq!(p, hex);
            assert_eq!(owner, None);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let snapshot = h.registry.reader(&reader).await.unwrap().snapshot();
    let status = snapshot.card.unwrap().status;
    assert_eq!(status, ProvisioningStatus::Succeeded(payload));
    assert_eq!(snapshot.active, None);
}

#[tokio::test]
async fn test_steps_run_in_order() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    h.tap_desfire(&reader, &card).await;

    within(h.registry.provision(&reader, None)).await.unwrap();

    assert_eq!(
        card.calls(),
        vec![
            "select_application",
            "authenticate_legacy",
            "format_picc",
            "get_card_uid",
            "create_application",
            "select_application",
            "authenticate_aes",
            "change_key_aes",
            "authenticate_aes",
            "create_standard_data_file",
            "write_data_encrypted",
            "read_data_encrypted",
        ]
    );
}

#[tokio::test]
async fn test_payloads_differ_between_runs() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    h.tap_desfire(&reader, &card).await;

    let first = within(h.registry.provision(&reader, None)).await.unwrap();
    let second = within(h.registry.provision(&reader, None)).await.unwrap();
    assert_ne!(first.to_hex(), second.to_hex());
    assert_ne!(first.key(), first.secret());
}

#[tokio::test]
async fn test_randomized_uid_mismatch() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(&[0x08, 0x11, 0x22, 0x33]).with_secure_uid(UID);
    h.tap_desfire(&reader, &card).await;

    let err = within(h.registry.provision(&reader, None)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RandomizedIdentityMismatch);
    assert!(card.called("format_picc"));
    assert!(!card.called("create_application"));
    assert!(!card.called("write_data_encrypted"));

    let events = h.drain();
    assert!(events
        .iter()
        .all(|e| !matches!(e, ReaderEvent::ProvisioningSucceeded { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ReaderEvent::CardError { kind: ErrorKind::RandomizedIdentityMismatch, .. }
    )));
}

#[tokio::test]
async fn test_readback_mismatch() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    card.corrupt_readback();
    h.tap_desfire(&reader, &card).await;

    let err = within(h.registry.provision(&reader, None)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::PayloadVerificationFailed);
    assert!(h.credentials.records.lock().unwrap().is_empty());

    let events = h.drain();
    assert!(events
        .iter()
        .all(|e| !matches!(e, ReaderEvent::ProvisioningSucceeded { .. })));

    let snapshot = h.registry.reader(&reader).await.unwrap().snapshot();
    match snapshot.card.unwrap().status {
        ProvisioningStatus::Failed(failure) => {
            assert_eq!(failure.kind, ErrorKind::PayloadVerificationFailed)
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn test_picc_authentication_failure() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    card.reject_picc_key();
    h.tap_desfire(&reader, &card).await;

    let err = within(h.registry.provision(&reader, None)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthenticationFailure);
    assert!(!card.called("format_picc"));
}

#[tokio::test]
async fn test_application_authentication_failure() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    card.reject_default_app_key();
    h.tap_desfire(&reader, &card).await;

    let err = within(h.registry.provision(&reader, None)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthenticationFailure);
    assert!(err.message.contains("authenticate-application"));
    assert!(card.called("create_application"));
    assert!(!card.called("change_key_aes"));
    assert!(h.credentials.records.lock().unwrap().is_empty());

    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        ReaderEvent::CardError { kind: ErrorKind::AuthenticationFailure, .. }
    )));
    assert!(events
        .iter()
        .all(|e| !matches!(e, ReaderEvent::ProvisioningSucceeded { .. })));
}

#[tokio::test]
async fn test_key_rotation_not_verified() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    card.ignore_key_change();
    h.tap_desfire(&reader, &card).await;

    let err = within(h.registry.provision(&reader, None)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::KeyRotationVerificationFailed);
    assert!(!card.called("create_standard_data_file"));
}

#[tokio::test]
async fn test_transport_failure_mid_workflow() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    card.fail(
        "create_application",
        CommandError::Transport(TransportError::CardRemoved),
    );
    h.tap_desfire(&reader, &card).await;

    let err = within(h.registry.provision(&reader, None)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransportError);
    assert_eq!(err.uid.as_bytes(), UID);
    assert!(err.message.contains("create-application"));
    // Earlier steps are not rolled back.
    assert!(card.called("format_picc"));
}

#[tokio::test]
async fn test_owner_file_written_when_configured() {
    let config = Config {
        owner_file: Some(OwnerFileConfig { file_id: 2 }),
        ..Config::default()
    };
    let mut h = Harness::with_config(config);
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    h.tap_desfire(&reader, &card).await;

    within(h.registry.provision(&reader, Some("alice".into())))
        .await
        .unwrap();

    let owner = card.file(2).unwrap();
    assert_eq!(&owner[..5], b"alice");
    assert!(owner[5..].iter().all(|b| *b == 0));

    let succeeded = h
        .expect_event(|e| matches!(e, ReaderEvent::ProvisioningSucceeded { .. }))
        .await;
    match succeeded {
        ReaderEvent::ProvisioningSucceeded { owner, .. } => {
            assert_eq!(owner.as_deref(), Some("alice"))
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_owner_file_skipped_by_default() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    h.tap_desfire(&reader, &card).await;

    within(h.registry.provision(&reader, Some("alice".into())))
        .await
        .unwrap();
    assert!(card.file(2).is_none());
}

#[tokio::test]
async fn test_credential_recorded_once() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID);
    h.tap_desfire(&reader, &card).await;

    let payload = within(h.registry.provision(&reader, Some("bob".into())))
        .await
        .unwrap();

    let records = h.credentials.records.lock().unwrap().clone();
    assert_eq!(
        records,
        vec![(
            "bob".to_string(),
            hex::encode(UID),
            payload.to_hex()
        )]
    );
}

#[tokio::test]
async fn test_provisioned_application_is_listed() {
    let mut h = Harness::new();
    let reader = h.attach("reader-a").await;
    let card = MockCard::new(UID).with_applications(&[0x000001, 0x000002]);
    h.tap_desfire(&reader, &card).await;

    within(h.registry.provision(&reader, None)).await.unwrap();
    let aids = within(h.registry.list_applications(&reader)).await.unwrap();
    assert_eq!(aids, vec![ApplicationId::new(0x1984AC).unwrap()]);
}
