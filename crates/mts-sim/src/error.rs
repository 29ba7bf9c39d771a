use thiserror::Error;

use mts_core::MtsError;
use mts_entity::KernelFault;
use mts_net::NetError;
use mts_output::OutputError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] MtsError),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("kernel fault: {0}")]
    Kernel(KernelFault),

    #[error("output error: {0}")]
    Output(#[from] OutputError),
}

pub type SimResult<T> = Result<T, SimError>;
