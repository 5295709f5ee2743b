use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorWrapper {
    #[error("Zenoh error {0:?}")]
    ZenohError(zenoh::Error),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotError {
    #[error("robot context used before initialize was called")]
    NotInitialized,
    #[error("robot context initialized twice")]
    AlreadyInitialized,
    #[error("unknown command {0}")]
    UnknownCommand(usize),
}
