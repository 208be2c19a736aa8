use crate::ffi::Cell;
use std::ffi::c_int;
use thiserror::Error;

pub type AmxResult<T> = std::result::Result<T, AmxError>;

/// Non-zero status code returned by the host's export table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AmxError {
    #[error("Forced exit")]
    Exit,
    #[error("Assertion failed")]
    Assert,
    #[error("Stack/heap collision (insufficient stack size)")]
    StackErr,
    #[error("Array index out of bounds")]
    Bounds,
    #[error("Invalid memory access")]
    MemAccess,
    #[error("Invalid instruction")]
    InvInstr,
    #[error("Stack underflow")]
    StackLow,
    #[error("Heap underflow")]
    HeapLow,
    #[error("No (valid) native function callback")]
    Callback,
    #[error("Native function failed")]
    Native,
    #[error("Divide by zero")]
    Divide,
    #[error("(sleep mode)")]
    Sleep,
    #[error("Invalid state for this access")]
    InvState,
    #[error("(reserved)")]
    Reserved(c_int),
    #[error("Out of memory")]
    Memory,
    #[error("Invalid/unsupported P-code file format")]
    Format,
    #[error("File is for a newer version of the AMX")]
    Version,
    #[error("File or function is not found")]
    NotFound,
    #[error("Invalid index parameter (bad entry point)")]
    Index,
    #[error("Debugger cannot run")]
    Debug,
    #[error("AMX not initialized (or doubly initialized)")]
    Init,
    #[error("Unable to set user data field (table full)")]
    UserData,
    #[error("Cannot initialize the JIT")]
    InitJit,
    #[error("Parameter error")]
    Params,
    #[error("(unknown error, {0})")]
    Unknown(c_int),
}

impl AmxError {
    /// Maps a raw status to an error; `None` for success.
    pub fn from_code(code: c_int) -> Option<Self> {
        let err = match code {
            0 => return None,
            1 => Self::Exit,
            2 => Self::Assert,
            3 => Self::StackErr,
            4 => Self::Bounds,
            5 => Self::MemAccess,
            6 => Self::InvInstr,
            7 => Self::StackLow,
            8 => Self::HeapLow,
            9 => Self::Callback,
            10 => Self::Native,
            11 => Self::Divide,
            12 => Self::Sleep,
            13 => Self::InvState,
            14 | 15 => Self::Reserved(code),
            16 => Self::Memory,
            17 => Self::Format,
            18 => Self::Version,
            19 => Self::NotFound,
            20 => Self::Index,
            21 => Self::Debug,
            22 => Self::Init,
            23 => Self::UserData,
            24 => Self::InitJit,
            25 => Self::Params,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    pub fn check(code: c_int) -> AmxResult<()> {
        match Self::from_code(code) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The host's raw status code.
    pub fn code(self) -> c_int {
        match self {
            Self::Exit => 1,
            Self::Assert => 2,
            Self::StackErr => 3,
            Self::Bounds => 4,
            Self::MemAccess => 5,
            Self::InvInstr => 6,
            Self::StackLow => 7,
            Self::HeapLow => 8,
            Self::Callback => 9,
            Self::Native => 10,
            Self::Divide => 11,
            Self::Sleep => 12,
            Self::InvState => 13,
            Self::Reserved(code) | Self::Unknown(code) => code,
            Self::Memory => 16,
            Self::Format => 17,
            Self::Version => 18,
            Self::NotFound => 19,
            Self::Index => 20,
            Self::Debug => 21,
            Self::Init => 22,
            Self::UserData => 23,
            Self::InitJit => 24,
            Self::Params => 25,
        }
    }
}

/// Marshalling and script-admission failures.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Number of parameters must be equal to {expected}")]
    ParamCount { expected: usize, actual: usize },
    #[error("Number of parameters must be >= {min}")]
    MinParamCount { min: usize, actual: usize },
    #[error("native called without a parameter array")]
    MissingParams,
    #[error("invalid script address {addr:#x}")]
    InvalidAddress { addr: Cell, source: AmxError },
    #[error("reading string at {addr:#x} failed")]
    StringRead { addr: Cell, source: AmxError },
    #[error("Script not found")]
    ScriptNotFound,
    #[error("public variable '{name}' not found")]
    PubVarNotFound { name: String },
    #[error("Mismatch between the plugin ({plugin}) and include ({include}) versions")]
    VersionMismatch { plugin: String, include: String },
    #[error("plugin is not loaded")]
    NotLoaded,
    #[error("plugin state is already in use further up the call stack")]
    PluginBusy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_variants() {
        for code in 1..=30 {
            let err = AmxError::from_code(code).expect("non-zero status is an error");
            assert_eq!(err.code(), code, "code {code} survives the mapping");
        }
        assert!(AmxError::from_code(0).is_none(), "zero means success");
    }

    #[test]
    fn messages_render_like_the_host() {
        assert_eq!(AmxError::NotFound.to_string(), "File or function is not found");
        assert_eq!(AmxError::Reserved(14).to_string(), "(reserved)");
        assert_eq!(AmxError::Unknown(42).to_string(), "(unknown error, 42)");
        assert_eq!(
            BridgeError::ParamCount { expected: 2, actual: 3 }.to_string(),
            "Number of parameters must be equal to 2"
        );
    }
}
