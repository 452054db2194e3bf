//! Channels and flags connecting the auth handler to its consumers.
//!
//! - Credentials flow from the handler through one bounded channel per
//!   consumer server (see [`AuthHandler::subscribe`](crate::auth::AuthHandler::subscribe)).
//! - Invalidity signals flow from consumers into the handler through one
//!   shared channel ([`InvalidSignalSender`]).
//! - The [`AuthGate`] is written only by the handler and read by consumers.
//! - Every worker reports its terminal result as a [`WorkerExit`].

mod gate;
mod signal;

pub use gate::{AuthGate, GateReader};
pub use signal::{
    DEFAULT_SIGNAL_CAPACITY, InvalidCredential, InvalidSignalSender, invalid_signal_channel,
};

use tokio::sync::mpsc;

use crate::auth::Credential;

/// Skip to the newest credential already queued behind `credential`.
pub(crate) fn skip_superseded(
    mut credential: Credential,
    incoming: &mut mpsc::Receiver<Credential>,
) -> Credential {
    while let Ok(next) = incoming.try_recv() {
        tracing::debug!(
            skipped = credential.generation(),
            generation = next.generation(),
            "skipping superseded credential"
        );
        credential = next;
    }
    credential
}

/// Terminal result of a worker task, reported on the completion channel.
#[derive(Debug)]
pub struct WorkerExit {
    pub worker: &'static str,
    pub result: crate::Result<()>,
}

impl WorkerExit {
    pub fn new(worker: &'static str, result: crate::Result<()>) -> Self {
        Self { worker, result }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}
