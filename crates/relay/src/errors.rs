use thiserror::Error;

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum RelayError {
    #[error("prober injection failed")]
    InjectionFailed,
}
