//! IR validation errors.

use thiserror::Error;

use crate::op::IrOp;
use crate::reg::IrReg;

/// Malformed IR.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("{op:?} at {index}: register {reg} has the wrong class")]
    BadRegClass { index: usize, op: IrOp, reg: IrReg },

    #[error("{op:?} at {index}: writes the zero register")]
    WritesZero { index: usize, op: IrOp },

    #[error("block does not end with an unconditional exit")]
    MissingExit,
}
