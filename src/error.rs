use thiserror::Error;

use crate::shader_nodes::SocketValueType;

/// Index into one of the fixed-capacity descriptor tables.
pub type SlotIndex = u32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{table} table is full (capacity {capacity})")]
    CapacityExhausted { table: &'static str, capacity: u32 },

    #[error("slot {index} released twice")]
    DoubleRelease { index: SlotIndex },

    #[error("slot {index} out of range (capacity {capacity})")]
    OutOfRange { index: SlotIndex, capacity: u32 },

    #[error("socket expects {expected:?}, got {actual:?}")]
    TypeMismatch {
        expected: SocketValueType,
        actual: SocketValueType,
    },

    #[error("{kind} node has no socket named {socket}")]
    NoSuchSocket {
        kind: &'static str,
        socket: &'static str,
    },

    #[error("handle refers to a destroyed object")]
    StaleHandle,

    #[error("object is still referenced by {referrers} other object(s)")]
    DanglingReference { referrers: usize },

    #[error("descriptor needs {words} words, record holds {capacity}")]
    DescriptorOverflow { words: usize, capacity: usize },

    #[error("node is not a child of this parent")]
    NotAChild,

    #[error("node is already a child of this parent")]
    AlreadyAChild,

    #[error("operation not supported on a {actual} node")]
    WrongNodeKind { actual: &'static str },

    #[error("sub-material index {index} exceeds {max}")]
    SubMaterialIndex { index: u32, max: u32 },

    #[error("sub-material assignment would embed the material in itself")]
    MaterialCycle,

    #[error("surface node has no vertex buffer")]
    NoVertexBuffer,

    #[error("no output buffer is bound")]
    NoOutputBuffer,
}

pub type Result<T> = std::result::Result<T, Error>;
