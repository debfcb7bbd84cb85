use log::warn;

use crate::event::CtEvent;
use crate::handle::Handle;
use crate::initiator::{self, OpArgs};
use crate::ni::NiInner;

/// An operation deferred until its trigger counting event crosses a
/// threshold.
///
/// Records live on the trigger object's pending list, ordered by
/// ascending threshold, and are extracted by the scheduler walk that
/// every counting-event mutation runs. Extraction happens under the
/// counting-event locks; execution happens after they are released, so
/// a fired operation may itself mutate counting events.
#[derive(Debug)]
pub(crate) struct TriggeredOp {
    pub threshold: u64,
    pub action: TriggeredAction,
}

#[derive(Debug)]
pub(crate) enum TriggeredAction {
    /// A deferred data-movement operation, replayed through the normal
    /// initiator path.
    Op(OpArgs),
    /// A deferred increment of another counting event.
    CtInc { ct: Handle, increment: CtEvent },
    /// A deferred overwrite of another counting event.
    CtSet { ct: Handle, value: CtEvent },
}

/// Hands a fired record to its execution path. Failures cannot surface
/// to the submitter any more; they are logged and dropped.
pub(crate) fn execute(ni: &NiInner, action: TriggeredAction) {
    match action {
        TriggeredAction::Op(args) => {
            if let Err(err) = initiator::start_op(ni, args) {
                warn!("triggered operation failed to start: {}", err);
            }
        }
        TriggeredAction::CtInc { ct, increment } => match ni.cts.get(ct) {
            Ok(ct) => ni.ct_mutate(&ct, |event| {
                event.success += increment.success;
                event.failure += increment.failure;
            }),
            Err(err) => warn!("triggered ct increment on dead handle: {}", err),
        },
        TriggeredAction::CtSet { ct, value } => match ni.cts.get(ct) {
            Ok(ct) => ni.ct_mutate(&ct, |event| *event = value),
            Err(err) => warn!("triggered ct set on dead handle: {}", err),
        },
    }
}
