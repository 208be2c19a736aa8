use crate::error::{AmxError, AmxResult, BridgeError};
use crate::exports::{Exports, Report};
use crate::ffi::{AmxHandle, AmxNative, Cell};
use crate::native::Params;
use crate::param::{CellRef, NativeParam};
use crate::public::Public;
use anyhow::Result;
use std::ffi::CStr;
use std::rc::Rc;

/// Per-instance state a plugin keeps for every loaded script module.
///
/// Implementors wrap a [`ScriptBase`] and may add their own fields. Native handlers
/// receive `&Self`, so mutable per-script state belongs in `Cell`/`RefCell` fields.
pub trait Script: Sized + 'static {
    /// Public variable holding the include version the script was compiled against.
    const VERSION_VAR: Option<&'static str> = None;
    /// Public variable that is non-zero in the primary (gamemode) script.
    const GAMEMODE_VAR: Option<&'static str> = None;

    fn new(base: ScriptBase) -> Self;

    fn base(&self) -> &ScriptBase;

    /// Runs after natives are registered. `Ok(false)` discards the script without a log line.
    fn on_load(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Script type for plugins that keep no per-script state.
#[derive(Debug)]
pub struct DefaultScript {
    base: ScriptBase,
}

impl Script for DefaultScript {
    fn new(base: ScriptBase) -> Self {
        Self { base }
    }

    fn base(&self) -> &ScriptBase {
        &self.base
    }
}

#[derive(Debug)]
pub struct ScriptBase {
    exports: Rc<Exports>,
    is_gamemode: bool,
}

impl ScriptBase {
    /// Binds to `exports` and reads the gamemode flag once, if `gamemode_var` is declared
    /// and present in the script.
    pub fn new(exports: Rc<Exports>, gamemode_var: Option<&str>) -> Self {
        let mut base = Self { exports, is_gamemode: false };
        if let Ok(Some(value)) = base.declared_var(gamemode_var) {
            base.is_gamemode = value != 0;
        }
        base
    }

    pub fn handle(&self) -> AmxHandle {
        self.exports.amx()
    }

    pub fn exports(&self) -> &Rc<Exports> {
        &self.exports
    }

    pub fn is_gamemode(&self) -> bool {
        self.is_gamemode
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.exports.log(message);
    }

    pub fn public_name(&self, index: i32) -> String {
        self.exports.public_name(index)
    }

    pub fn public_var_exists(&self, name: &str) -> bool {
        self.exports.find_pub_var(name, Report::Silent).is_ok()
    }

    /// Current value of the public variable `name`.
    pub fn public_var(&self, name: &str) -> Result<Cell, BridgeError> {
        let amx_addr = self
            .exports
            .find_pub_var(name, Report::Log)
            .map_err(|_| BridgeError::PubVarNotFound { name: name.to_string() })?;
        Ok(self.cell_ref(amx_addr)?.get())
    }

    /// Value of an optional, optionally present public variable.
    pub fn declared_var(&self, name: Option<&str>) -> Result<Option<Cell>, BridgeError> {
        match name {
            Some(name) if self.public_var_exists(name) => self.public_var(name).map(Some),
            _ => Ok(None),
        }
    }

    /// Translates a script address into a reference to the cell it names.
    pub fn cell_ref(&self, amx_addr: Cell) -> Result<CellRef, BridgeError> {
        self.exports
            .get_addr(amx_addr, Report::Log)
            .map(CellRef::new)
            .map_err(|source| BridgeError::InvalidAddress { addr: amx_addr, source })
    }

    /// Decodes the script string stored at `amx_addr`.
    pub fn string(&self, amx_addr: Cell) -> Result<String, BridgeError> {
        let phys = self.cell_ref(amx_addr)?.as_mut_ptr();
        let read_err = |source| BridgeError::StringRead { addr: amx_addr, source };
        // SAFETY: `phys` was translated by the host for this instance.
        let bytes = unsafe {
            let len = self.exports.str_len(phys, Report::Log).map_err(read_err)?;
            self.exports.get_string(phys, len + 1, Report::Log).map_err(read_err)?
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Encodes `text` as an unpacked string into the script array at `dest`,
    /// writing at most `size` cells including the terminator.
    ///
    /// `size` is the script's own claim about its array and is trusted as the host trusts it.
    pub fn set_string(&self, dest: CellRef, text: &str, size: usize) -> AmxResult<()> {
        // SAFETY: `dest` was translated by the host; `size` is bounded by the host itself.
        unsafe { self.exports.set_string(dest.as_mut_ptr(), text, false, size, Report::Log) }
    }

    /// Registers one native on this instance.
    ///
    /// `NotFound` is the host's answer whenever the script still references other
    /// natives nobody has registered yet, so it is not reported.
    pub fn register_native(&self, name: &CStr, func: AmxNative) -> AmxResult<()> {
        let info = self.exports.native_info(name, func);
        if info.is_null() {
            return Err(AmxError::Callback);
        }
        // SAFETY: the host returned one record whose name outlives this call.
        match unsafe { self.exports.register(info, 1, Report::Silent) } {
            Ok(()) | Err(AmxError::NotFound) => Ok(()),
            Err(err) => {
                if self.exports.log_errors() {
                    self.log(format!("{err} in amx_Register({})", name.to_string_lossy()));
                }
                Err(err)
            }
        }
    }

    pub fn make_public(&self, name: impl Into<String>, use_caching: bool) -> Rc<Public> {
        Rc::new(Public::new(name, self.exports.clone(), use_caching))
    }

    /// Wraps a raw argument for conversion into a handler's declared type.
    pub fn param(&self, raw: Cell) -> NativeParam<'_> {
        NativeParam::new(raw, self)
    }

    pub fn assert_params(&self, count: usize, params: &Params<'_>) -> Result<(), BridgeError> {
        params.expect_exact(count)
    }

    pub fn assert_min_params(&self, min: usize, params: &Params<'_>) -> Result<(), BridgeError> {
        params.expect_at_least(min)
    }
}

impl PartialEq<AmxHandle> for ScriptBase {
    fn eq(&self, other: &AmxHandle) -> bool {
        self.handle() == *other
    }
}
