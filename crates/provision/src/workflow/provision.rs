use super::CardContext;
use crate::payload::{random_material, ProvisioningPayload, MATERIAL_LEN};
use crate::sink::CredentialSink;
use cardsmith_core::{Config, ErrorKind, EventSink, ProvisioningError, ReaderEvent};
use cardsmith_desfire::{AesKey, KeySettings, KeyType, StandardFile};
use tracing::{info, warn};

/// Bytes reserved for the owner label on the card.
pub const OWNER_FIELD_LEN: usize = 16;

/// Everything a provisioning run needs besides the card.
#[derive(Clone, Copy)]
pub struct ProvisionOptions<'a> {
    pub config: &'a Config,
    /// Label written to the owner file and handed to the credential sink
    pub owner: Option<&'a str>,
    pub credentials: Option<&'a dyn CredentialSink>,
}

/// Issue a fresh application key and secret to the card.
///
/// The card is formatted first, so whatever it held before is lost even when
/// a later step fails. Success is reported only after the new key has
/// authenticated and every written file has read back identically.
pub async fn provision(
    ctx: &CardContext<'_>,
    sink: &dyn EventSink,
    options: &ProvisionOptions<'_>,
) -> Result<ProvisioningPayload, ProvisioningError> {
    sink.publish(ReaderEvent::ProvisioningStarted {
        reader: ctx.reader.clone(),
        uid: ctx.uid.clone(),
    });

    let result = issue(ctx, options).await;

    match &result {
        Ok(payload) => {
            info!(
                reader = %ctx.reader,
                uid = %ctx.uid,
                fingerprint = %payload.fingerprint(),
                "Card provisioned"
            );
            if let Some(credentials) = options.credentials {
                credentials.record_issued_credential(
                    options.owner.unwrap_or_default(),
                    &ctx.uid.to_hex(),
                    &payload.to_hex(),
                );
            }
            sink.publish(ReaderEvent::ProvisioningSucceeded {
                reader: ctx.reader.clone(),
                uid: ctx.uid.clone(),
                payload: payload.to_hex(),
                owner: options.owner.map(str::to_string),
            });
        }
        Err(err) => {
            warn!(reader = %ctx.reader, uid = %ctx.uid, kind = %err.kind, "Provisioning aborted");
            sink.publish(err.clone().into());
        }
    }
    result
}

async fn issue(
    ctx: &CardContext<'_>,
    options: &ProvisionOptions<'_>,
) -> Result<ProvisioningPayload, ProvisioningError> {
    let app = &options.config.application;
    let cmd = ctx.commands;

    ctx.open_picc().await?;
    ctx.erase().await?;

    // Cards with random UIDs answer the anticollision UID with a fresh value
    // per session; only the authenticated read returns the real one.
    let real_uid = ctx
        .step("get-card-uid", ErrorKind::TransportError, cmd.get_card_uid())
        .await?;
    if real_uid.as_slice() != ctx.uid.as_bytes() {
        return Err(ctx.error(
            ErrorKind::RandomizedIdentityMismatch,
            format!(
                "card reports uid {} but {} was seen at tap time",
                hex::encode(&real_uid),
                ctx.uid
            ),
        ));
    }

    ctx.step(
        "create-application",
        ErrorKind::TransportError,
        cmd.create_application(app.aid, KeySettings::factory_default(), 1, KeyType::Aes),
    )
    .await?;
    ctx.step(
        "select-application",
        ErrorKind::TransportError,
        cmd.select_application(app.aid),
    )
    .await?;

    let default_key = AesKey::application_default();
    ctx.step(
        "authenticate-application",
        ErrorKind::AuthenticationFailure,
        cmd.authenticate_aes(0, &default_key),
    )
    .await?;

    let key = random_material();
    let new_key = AesKey::new(key);
    ctx.step(
        "change-key",
        ErrorKind::TransportError,
        cmd.change_key_aes(0, app.key_version, &new_key, &default_key),
    )
    .await?;
    ctx.step(
        "verify-key",
        ErrorKind::KeyRotationVerificationFailed,
        cmd.authenticate_aes(0, &new_key),
    )
    .await?;

    let secret = random_material();
    write_verified(ctx, app.secret_file_id, &secret).await?;

    if let (Some(owner_file), Some(owner)) = (&options.config.owner_file, options.owner) {
        write_verified(ctx, owner_file.file_id, &owner_field(owner)).await?;
    }

    Ok(ProvisioningPayload::new(key, secret))
}

/// Create an encrypted file, write `data`, and compare the read-back.
async fn write_verified(
    ctx: &CardContext<'_>,
    file_id: u8,
    data: &[u8; MATERIAL_LEN],
) -> Result<(), ProvisioningError> {
    let cmd = ctx.commands;
    ctx.step(
        "create-file",
        ErrorKind::TransportError,
        cmd.create_standard_data_file(StandardFile::encrypted(file_id, MATERIAL_LEN as u32)),
    )
    .await?;
    ctx.step(
        "write-file",
        ErrorKind::TransportError,
        cmd.write_data_encrypted(file_id, 0, data),
    )
    .await?;
    let readback = ctx
        .step(
            "read-file",
            ErrorKind::TransportError,
            cmd.read_data_encrypted(file_id, 0, MATERIAL_LEN as u32),
        )
        .await?;

    if readback.as_slice() != data.as_slice() {
        return Err(ctx.error(
            ErrorKind::PayloadVerificationFailed,
            format!("file {file_id} read back differs from the written data"),
        ));
    }
    Ok(())
}

/// Owner label as stored on the card: UTF-8, cut or zero-padded to 16 bytes.
pub(crate) fn owner_field(owner: &str) -> [u8; OWNER_FIELD_LEN] {
    let mut field = [0u8; OWNER_FIELD_LEN];
    let bytes = owner.as_bytes();
    let len = bytes.len().min(OWNER_FIELD_LEN);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}
