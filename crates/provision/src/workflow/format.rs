use super::CardContext;
use cardsmith_core::{EventSink, ProvisioningError, ReaderEvent};
use tracing::info;

/// Erase every application on the card (select PICC, authenticate, format).
pub async fn format(ctx: &CardContext<'_>, sink: &dyn EventSink) -> Result<(), ProvisioningError> {
    sink.publish(ReaderEvent::FormattingStarted {
        reader: ctx.reader.clone(),
        uid: ctx.uid.clone(),
    });

    let result = async {
        ctx.open_picc().await?;
        ctx.erase().await
    }
    .await;

    match &result {
        Ok(()) => {
            info!(reader = %ctx.reader, uid = %ctx.uid, "Card formatted");
            sink.publish(ReaderEvent::FormattingSucceeded {
                reader: ctx.reader.clone(),
                uid: ctx.uid.clone(),
            });
        }
        Err(err) => sink.publish(err.clone().into()),
    }
    result
}
