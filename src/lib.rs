pub mod config;
pub mod error;
pub mod exports;
pub mod ffi;
pub mod log;
pub mod native;
pub mod param;
pub mod plugin;
pub mod public;
pub mod script;

pub use config::BridgeConfig;
pub use error::{AmxError, AmxResult, BridgeError};
pub use exports::{ExportTable, Exports, Report};
pub use ffi::{AmxHandle, AmxNative, Cell, Export, Supports};
pub use log::{LogSink, Logger};
pub use native::{NativeHandler, Params, RawNativeHandler};
pub use param::{AmxRef, CellRef, FloatRef, FromParam, NativeParam};
pub use plugin::{pack_version, version_string, version_tuple, Plugin, PluginContext, PluginData, PluginState, Registry};
pub use public::{Public, PublicArgs, PushArg};
pub use script::{DefaultScript, Script, ScriptBase};
