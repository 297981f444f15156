use super::CardContext;
use cardsmith_core::{ApplicationId, ErrorKind, EventSink, ProvisioningError, ReaderEvent};

/// Enumerate the application identifiers on the card.
///
/// The list is passed on verbatim, in the order the card reports it.
pub async fn list_applications(
    ctx: &CardContext<'_>,
    sink: &dyn EventSink,
) -> Result<Vec<ApplicationId>, ProvisioningError> {
    let result = async {
        ctx.open_picc().await?;
        ctx.step(
            "get-application-ids",
            ErrorKind::TransportError,
            ctx.commands.get_application_ids(),
        )
        .await
    }
    .await;

    match &result {
        Ok(applications) => sink.publish(ReaderEvent::ApplicationsListed {
            reader: ctx.reader.clone(),
            uid: ctx.uid.clone(),
            applications: applications.clone(),
        }),
        Err(err) => sink.publish(err.clone().into()),
    }
    result
}
