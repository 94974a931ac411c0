//! Cross-host transfers over a secure-shell session.
//!
//! For a push the local store exports and the remote engine runs `load`
//! with the session's input as its archive; for a pull the remote engine
//! runs `save` and the local store imports the session's output.

use super::{TransportContext, pipe_image};
use crate::engine::EngineCli;
use crate::error::Result;
use crate::plan::{RemoteTarget, TransferPlan};
use crate::users::UserIdentity;

pub(super) async fn push(
    plan: &TransferPlan,
    from: &UserIdentity,
    target: &RemoteTarget,
    context: &TransportContext<'_>,
) -> Result<String> {
    let session = context.shell.connect(target, context.deadline).await?;
    let remote = EngineCli::remote(context.launcher, session);
    let producer = context.local_store(from);
    pipe_image(
        producer.as_store(),
        &plan.source.image,
        &remote,
        &plan.destination.image,
    )
    .await
}

pub(super) async fn pull(
    plan: &TransferPlan,
    target: &RemoteTarget,
    to: &UserIdentity,
    context: &TransportContext<'_>,
) -> Result<String> {
    let session = context.shell.connect(target, context.deadline).await?;
    let remote = EngineCli::remote(context.launcher, session);
    let consumer = context.local_store(to);
    pipe_image(
        &remote,
        &plan.source.image,
        consumer.as_store(),
        &plan.destination.image,
    )
    .await
}
