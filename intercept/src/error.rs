use thiserror::Error;

use crate::types::ObjectRef;

/// Failures reported by the managed runtime through [`crate::runtime::ManagedRuntime`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("managed exception {0:?} pending")]
    Exception(ObjectRef),

    #[error("out of memory while allocating {0}")]
    OutOfMemory(&'static str),

    #[error("initialization of class {class} failed")]
    ClassInitFailed { class: String },

    #[error("no method {name}{signature} in {class} or its superclasses")]
    NoSuchMethod {
        class: String,
        name: String,
        signature: String,
    },
}

/// Disagreement between the runtime's method descriptor layout and the one compiled in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("descriptor layout version {found} is not supported (expected {expected})")]
    Version { expected: u32, found: u32 },

    #[error("descriptor field `{field}` is at offset {found}, expected {expected}")]
    FieldOffset {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("descriptor size {found} is smaller than the {required} bytes accessed")]
    TooSmall { required: usize, found: usize },
}

/// Errors raised while installing a hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("cannot resolve method {class}.{name}{signature}")]
    Unresolvable {
        class: String,
        name: String,
        signature: String,
    },

    #[error("cannot hook abstract method {0}")]
    AbstractMethod(String),

    #[error("invalid shorty `{0}`")]
    InvalidShorty(String),

    #[error("unsupported architecture `{0}`")]
    UnsupportedArchitecture(String),

    #[error("concurrent install of {0} detected")]
    InstallRace(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Errors raised on the hooked, original and super call paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("wrong number of arguments; expected {expected}, got {actual}")]
    ArgumentCountMismatch { expected: usize, actual: usize },

    #[error("method {method} argument {index} has type {expected}, got {actual}")]
    ArgumentTypeMismatch {
        method: String,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("null receiver for instance method {0}")]
    NullReceiver(String),

    #[error("expected receiver of type {expected}, got {actual}")]
    ReceiverMismatch { expected: String, actual: String },

    #[error("invalid primitive conversion from {actual} to {expected}")]
    ReturnTypeMismatch { expected: String, actual: String },

    #[error("null result where primitive {0} was expected")]
    NullResult(&'static str),

    #[error("handler threw {0:?}")]
    Handler(ObjectRef),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, HookError>;
pub type InvokeResult<T> = std::result::Result<T, InvokeError>;
