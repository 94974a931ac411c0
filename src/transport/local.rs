//! Same-host transfers between two local accounts.

use super::{TransportContext, pipe_image};
use crate::error::Result;
use crate::plan::TransferPlan;
use crate::users::UserIdentity;

/// Exports from `from`'s store and imports into `to`'s store, each run as
/// its own account.
pub(super) async fn run(
    plan: &TransferPlan,
    from: &UserIdentity,
    to: &UserIdentity,
    context: &TransportContext<'_>,
) -> Result<String> {
    tracing::debug!(
        event = "transfer.privilege_switch",
        from_uid = from.uid,
        to_uid = to.uid,
        invoker_uid = context.invoker.uid,
    );

    let producer = context.local_store(from);
    let consumer = context.local_store(to);
    pipe_image(
        producer.as_store(),
        &plan.source.image,
        consumer.as_store(),
        &plan.destination.image,
    )
    .await
}
