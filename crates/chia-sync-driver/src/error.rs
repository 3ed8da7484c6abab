use clvm_traits::{FromClvmError, ToClvmError};
use clvmr::reduction::EvalErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize clvm value: {0}")]
    ToClvm(#[from] ToClvmError),

    #[error("failed to deserialize clvm value: {0}")]
    FromClvm(#[from] FromClvmError),

    #[error("clvm eval error: {0}")]
    Eval(#[from] EvalErr),

    #[error("non-standard inner puzzle")]
    NonStandardPuzzle,

    #[error("cannot build a CAT spend without any coins")]
    EmptyRing,

    #[error("issuing or melting requires the TAIL program reveal")]
    MissingTail,

    #[error("infinity public key")]
    InfinityPublicKey,

    #[error("amount overflow")]
    AmountOverflow,
}
