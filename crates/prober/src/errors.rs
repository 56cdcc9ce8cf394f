use thiserror::Error;

/// Failure taxonomy of the remote clone action. Every variant is caught at
/// the prober boundary and converted to an overlay message plus a
/// structured result; nothing propagates across a context boundary.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloneError {
    #[error("missing source keys")]
    MissingSourceKeys,
    #[error("not on a valid destination page")]
    NotOnValidDestination,
    #[error("destination unresolvable")]
    DestinationUnresolvable,
    #[error("user unresolvable")]
    UserUnresolvable,
    #[error("clone request failed: status {status}")]
    CloneRequestFailed { status: u16 },
}
