use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Dispatcher is not running")]
    DispatcherClosed,
}

pub type Result<T> = std::result::Result<T, FlowError>;
