use crate::error::BridgeError;
use crate::ffi::{AmxHandle, AmxNative, Cell, RawAmx, UCell};
use crate::param::{FromParam, NativeParam};
use crate::plugin::{Plugin, Registry};
use crate::script::{Script, ScriptBase};
use anyhow::{ensure, Context, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::slice;

const CELL_BYTES: usize = mem::size_of::<Cell>();

/// The argument array the VM passes to a native. The first raw cell holds the
/// argument size in bytes and is not part of `values`.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    bytes: UCell,
    values: &'a [Cell],
}

impl<'a> Params<'a> {
    /// # Safety
    /// `params` must be null or point at a VM argument array whose first cell is
    /// the byte size of the cells that follow, valid for `'a`.
    pub unsafe fn from_raw(params: *const Cell) -> Result<Self, BridgeError> {
        if params.is_null() {
            return Err(BridgeError::MissingParams);
        }
        let bytes = *params as UCell;
        let count = bytes as usize / CELL_BYTES;
        Ok(Self { bytes, values: slice::from_raw_parts(params.add(1), count) })
    }

    pub fn from_slice(values: &'a [Cell]) -> Self {
        Self { bytes: (values.len() * CELL_BYTES) as UCell, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Cell> {
        self.values.get(index).copied()
    }

    pub fn values(&self) -> &'a [Cell] {
        self.values
    }

    pub fn expect_exact(&self, count: usize) -> Result<(), BridgeError> {
        if self.bytes as usize != count * CELL_BYTES {
            return Err(BridgeError::ParamCount { expected: count, actual: self.len() });
        }
        Ok(())
    }

    pub fn expect_at_least(&self, min: usize) -> Result<(), BridgeError> {
        if (self.bytes as usize) < min * CELL_BYTES {
            return Err(BridgeError::MinParamCount { min, actual: self.len() });
        }
        Ok(())
    }

    /// Converts the argument at `index` (zero-based) into `T`.
    pub fn arg<T: FromParam>(&self, index: usize, script: &ScriptBase) -> Result<T, BridgeError> {
        let raw = self.get(index).ok_or(BridgeError::MinParamCount { min: index + 1, actual: self.len() })?;
        NativeParam::new(raw, script).get()
    }
}

/// A typed native body. Implemented for every `Fn(&S, A1, .., An) -> Result<Cell>`
/// whose arguments implement [`FromParam`]; the argument count is checked before
/// any conversion happens.
pub trait NativeHandler<S, Args>: 'static {
    const ARITY: usize;

    fn invoke(&self, script: &S, params: Params<'_>) -> Result<Cell>;
}

macro_rules! impl_native_handler {
    ($arity:literal $(; $($arg:ident $index:tt),*)?) => {
        impl<S, F, $($($arg,)*)?> NativeHandler<S, ($($($arg,)*)?)> for F
        where
            S: Script,
            F: Fn(&S $($(, $arg)*)?) -> Result<Cell> + 'static,
            $($($arg: FromParam,)*)?
        {
            const ARITY: usize = $arity;

            #[allow(unused_variables)]
            fn invoke(&self, script: &S, params: Params<'_>) -> Result<Cell> {
                params.expect_exact(Self::ARITY)?;
                let base = script.base();
                (self)(script $($(, params.arg::<$arg>($index, base)?)*)?)
            }
        }
    };
}

impl_native_handler!(0);
impl_native_handler!(1; A 0);
impl_native_handler!(2; A 0, B 1);
impl_native_handler!(3; A 0, B 1, C 2);
impl_native_handler!(4; A 0, B 1, C 2, D 3);
impl_native_handler!(5; A 0, B 1, C 2, D 3, E 4);
impl_native_handler!(6; A 0, B 1, C 2, D 3, E 4, G 5);
impl_native_handler!(7; A 0, B 1, C 2, D 3, E 4, G 5, H 6);
impl_native_handler!(8; A 0, B 1, C 2, D 3, E 4, G 5, H 6, I 7);
impl_native_handler!(9; A 0, B 1, C 2, D 3, E 4, G 5, H 6, I 7, J 8);
impl_native_handler!(10; A 0, B 1, C 2, D 3, E 4, G 5, H 6, I 7, J 8, K 9);

/// A native that parses its own argument array, for variadic signatures.
pub trait RawNativeHandler<S>: 'static {
    fn invoke(&self, script: &S, params: Params<'_>) -> Result<Cell>;
}

impl<S, F> RawNativeHandler<S> for F
where
    S: Script,
    F: Fn(&S, Params<'_>) -> Result<Cell> + 'static,
{
    fn invoke(&self, script: &S, params: Params<'_>) -> Result<Cell> {
        (self)(script, params)
    }
}

#[derive(Debug, Clone)]
pub struct NativeEntry {
    name: CString,
    func: AmxNative,
}

impl NativeEntry {
    pub fn name(&self) -> &CStr {
        &self.name
    }

    pub fn func(&self) -> AmxNative {
        self.func
    }
}

/// Name to trampoline table, filled while the plugin loads and registered on every script.
pub struct NativeTable<P> {
    entries: BTreeMap<String, NativeEntry>,
    _plugin: PhantomData<fn() -> P>,
}

impl<P> Default for NativeTable<P> {
    fn default() -> Self {
        Self { entries: BTreeMap::new(), _plugin: PhantomData }
    }
}

impl<P: Plugin> NativeTable<P> {
    /// Registers a typed handler under `name`; a later registration of the same name wins.
    ///
    /// The handler must be a function item or a closure that captures nothing: the
    /// trampoline recreates it from its type alone.
    pub fn register<Args, H>(&mut self, name: &str, _handler: H) -> Result<()>
    where
        Args: 'static,
        H: NativeHandler<P::Script, Args>,
    {
        ensure!(mem::size_of::<H>() == 0, "native '{name}' must be a function or a closure without captures");
        self.insert(name, native_trampoline::<P, H, Args>)
    }

    /// Registers a handler that validates and converts its own arguments.
    pub fn register_raw<H>(&mut self, name: &str, _handler: H) -> Result<()>
    where
        H: RawNativeHandler<P::Script>,
    {
        ensure!(mem::size_of::<H>() == 0, "native '{name}' must be a function or a closure without captures");
        self.insert(name, raw_native_trampoline::<P, H>)
    }

    fn insert(&mut self, name: &str, func: AmxNative) -> Result<()> {
        let c_name = CString::new(name).with_context(|| format!("native name '{name}' contains a NUL byte"))?;
        self.entries.insert(name.to_string(), NativeEntry { name: c_name, func });
        Ok(())
    }
}

impl<P> NativeTable<P> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &NativeEntry> {
        self.entries.values()
    }

    pub fn get(&self, name: &str) -> Option<AmxNative> {
        self.entries.get(name).map(NativeEntry::func)
    }

    /// Reverse lookup from trampoline to registered name.
    pub fn name_of(&self, func: AmxNative) -> Option<&str> {
        self.entries.iter().find(|(_, entry)| entry.func as usize == func as usize).map(|(name, _)| name.as_str())
    }
}

/// Recreates a zero-sized handler from its type.
///
/// # Safety
/// `H` must be zero-sized, which `NativeTable` checks before handing out a trampoline.
unsafe fn conjure<H>() -> H {
    debug_assert_eq!(mem::size_of::<H>(), 0);
    mem::zeroed()
}

extern "C" fn native_trampoline<P, H, Args>(amx: *mut RawAmx, params: *mut Cell) -> Cell
where
    P: Plugin,
    H: NativeHandler<P::Script, Args>,
    Args: 'static,
{
    contain::<P>(native_trampoline::<P, H, Args>, || {
        let script = Registry::<P>::script(AmxHandle::from_raw(amx))?;
        // SAFETY: the VM passes its argument array for this call.
        let params = unsafe { Params::from_raw(params) }?;
        // SAFETY: registration only accepts zero-sized handlers.
        let handler = unsafe { conjure::<H>() };
        handler.invoke(&script, params)
    })
}

extern "C" fn raw_native_trampoline<P, H>(amx: *mut RawAmx, params: *mut Cell) -> Cell
where
    P: Plugin,
    H: RawNativeHandler<P::Script>,
{
    contain::<P>(raw_native_trampoline::<P, H>, || {
        let script = Registry::<P>::script(AmxHandle::from_raw(amx))?;
        // SAFETY: the VM passes its argument array for this call.
        let params = unsafe { Params::from_raw(params) }?;
        // SAFETY: registration only accepts zero-sized handlers.
        let handler = unsafe { conjure::<H>() };
        handler.invoke(&script, params)
    })
}

/// Runs a native body, turning errors and panics into one log line and the `0` sentinel.
fn contain<P: Plugin>(func: AmxNative, body: impl FnOnce() -> Result<Cell>) -> Cell {
    let message = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => return value,
        Ok(Err(err)) => format!("{err:#}"),
        Err(payload) => panic_message(payload.as_ref()),
    };
    Registry::<P>::log(format!("{}: {message}", Registry::<P>::native_name(func)));
    0
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_count_comes_from_the_byte_header() {
        let raw: [Cell; 4] = [12, 7, 8, 9];
        let params = unsafe { Params::from_raw(raw.as_ptr()) }.expect("non-null params");
        assert_eq!(params.len(), 3);
        assert_eq!(params.values(), &[7, 8, 9]);
        assert!(params.expect_exact(3).is_ok());
        assert!(params.expect_at_least(2).is_ok());
    }

    #[test]
    fn count_mismatch_names_the_expected_count() {
        let params = Params::from_slice(&[1, 2]);
        let err = params.expect_exact(3).expect_err("two is not three");
        assert_eq!(err.to_string(), "Number of parameters must be equal to 3");
        let err = params.expect_at_least(4).expect_err("two is below four");
        assert_eq!(err.to_string(), "Number of parameters must be >= 4");
    }

    #[test]
    fn misaligned_byte_count_fails_exact_check() {
        let raw: [Cell; 2] = [5, 1];
        let params = unsafe { Params::from_raw(raw.as_ptr()) }.expect("non-null params");
        assert_eq!(params.len(), 1);
        assert!(params.expect_exact(1).is_err(), "5 bytes is not one cell");
    }

    #[test]
    fn null_params_are_rejected() {
        let err = unsafe { Params::from_raw(std::ptr::null()) }.expect_err("null array");
        assert!(matches!(err, BridgeError::MissingParams));
    }

    #[test]
    fn panic_payloads_render_their_message() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).expect_err("closure panics");
        assert_eq!(panic_message(payload.as_ref()), "panicked: boom 1");
    }
}
