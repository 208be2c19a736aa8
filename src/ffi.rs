use bitflags::bitflags;
use std::ffi::{c_char, c_int, c_long, c_void};
use std::fmt;

/// The VM's fixed-width value unit.
pub type Cell = i32;
pub type UCell = u32;

/// Opaque VM instance as seen through the host ABI. Never dereferenced here.
#[repr(C)]
pub struct RawAmx {
    _private: [u8; 0],
}

/// Identity token for one loaded script module. Compared by address only.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AmxHandle(*mut RawAmx);

impl AmxHandle {
    pub const fn from_raw(raw: *mut RawAmx) -> Self {
        Self(raw)
    }

    pub const fn as_ptr(self) -> *mut RawAmx {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Debug for AmxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmxHandle({:p})", self.0)
    }
}

impl fmt::Display for AmxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0)
    }
}

/// Calling convention of every native the VM can invoke.
pub type AmxNative = extern "C" fn(amx: *mut RawAmx, params: *mut Cell) -> Cell;
pub type AmxCallback =
    extern "C" fn(amx: *mut RawAmx, index: Cell, result: *mut Cell, params: *const Cell) -> c_int;
pub type AmxDebug = extern "C" fn(amx: *mut RawAmx) -> c_int;

/// Printf-style sink handed over in the plugin data table.
pub type LogPrintf = unsafe extern "C" fn(format: *const c_char, ...);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NativeInfo {
    pub name: *const c_char,
    pub func: AmxNative,
}

pub const PLUGIN_DATA_LOGPRINTF: usize = 0x00;
pub const PLUGIN_DATA_AMX_EXPORTS: usize = 0x10;
pub const PLUGIN_DATA_CALLPUBLIC_FS: usize = 0x11;
pub const PLUGIN_DATA_CALLPUBLIC_GM: usize = 0x12;

pub const AMX_ERR_NONE: c_int = 0;

bitflags! {
    /// Capability bitmask answered from the `Supports` entry point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Supports: u32 {
        const VERSION = 0x0200;
        const AMX_NATIVES = 0x1_0000;
        const PROCESS_TICK = 0x2_0000;
    }
}

impl Supports {
    pub const VERSION_MASK: u32 = 0xffff;

    pub const fn natives() -> Self {
        Self::VERSION.union(Self::AMX_NATIVES)
    }
}

macro_rules! exports {
    ($($variant:ident = $ordinal:literal),* $(,)?) => {
        /// Ordinal of an entry in the host's exported-function table.
        #[repr(usize)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Export {
            $($variant = $ordinal,)*
        }

        impl Export {
            pub const ALL: &'static [Export] = &[$(Export::$variant,)*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(Export::$variant => stringify!($variant),)*
                }
            }

            pub fn from_ordinal(ordinal: usize) -> Option<Self> {
                Self::ALL.get(ordinal).copied()
            }
        }
    };
}

exports! {
    Align16 = 0,
    Align32 = 1,
    Align64 = 2,
    Allot = 3,
    Callback = 4,
    Cleanup = 5,
    Clone = 6,
    Exec = 7,
    FindNative = 8,
    FindPublic = 9,
    FindPubVar = 10,
    FindTagId = 11,
    Flags = 12,
    GetAddr = 13,
    GetNative = 14,
    GetPublic = 15,
    GetPubVar = 16,
    GetString = 17,
    GetTag = 18,
    GetUserData = 19,
    Init = 20,
    InitJIT = 21,
    MemInfo = 22,
    NameLength = 23,
    NativeInfo = 24,
    NumNatives = 25,
    NumPublics = 26,
    NumPubVars = 27,
    NumTags = 28,
    Push = 29,
    PushArray = 30,
    PushString = 31,
    RaiseError = 32,
    Register = 33,
    Release = 34,
    SetCallback = 35,
    SetDebugHook = 36,
    SetString = 37,
    SetUserData = 38,
    StrLen = 39,
    UTF8Check = 40,
    UTF8Get = 41,
    UTF8Len = 42,
    UTF8Put = 43,
}

impl Export {
    /// Name of an arbitrary ordinal, tolerating values outside the table.
    pub fn describe(ordinal: usize) -> String {
        match Self::from_ordinal(ordinal) {
            Some(export) => export.name().to_string(),
            None => format!("(unknown function, {ordinal})"),
        }
    }
}

impl fmt::Display for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Signatures of the exported functions, indexed by `Export`.
pub type Align16Fn = extern "C" fn(v: *mut u16) -> *mut u16;
pub type Align32Fn = extern "C" fn(v: *mut u32) -> *mut u32;
pub type Align64Fn = extern "C" fn(v: *mut u64) -> *mut u64;
pub type AllotFn =
    extern "C" fn(amx: *mut RawAmx, cells: c_int, amx_addr: *mut Cell, phys_addr: *mut *mut Cell) -> c_int;
pub type CallbackFn =
    extern "C" fn(amx: *mut RawAmx, index: Cell, result: *mut Cell, params: *const Cell) -> c_int;
pub type CleanupFn = extern "C" fn(amx: *mut RawAmx) -> c_int;
pub type CloneFn = extern "C" fn(clone: *mut RawAmx, amx: *mut RawAmx, data: *mut c_void) -> c_int;
pub type ExecFn = extern "C" fn(amx: *mut RawAmx, retval: *mut Cell, index: c_int) -> c_int;
pub type FindNativeFn = extern "C" fn(amx: *mut RawAmx, name: *const c_char, index: *mut c_int) -> c_int;
pub type FindPublicFn = extern "C" fn(amx: *mut RawAmx, name: *const c_char, index: *mut c_int) -> c_int;
pub type FindPubVarFn = extern "C" fn(amx: *mut RawAmx, name: *const c_char, amx_addr: *mut Cell) -> c_int;
pub type FindTagIdFn = extern "C" fn(amx: *mut RawAmx, tag_id: Cell, tag_name: *mut c_char) -> c_int;
pub type FlagsFn = extern "C" fn(amx: *mut RawAmx, flags: *mut u16) -> c_int;
pub type GetAddrFn = extern "C" fn(amx: *mut RawAmx, amx_addr: Cell, phys_addr: *mut *mut Cell) -> c_int;
pub type GetNativeFn = extern "C" fn(amx: *mut RawAmx, index: c_int, name: *mut c_char) -> c_int;
pub type GetPublicFn = extern "C" fn(amx: *mut RawAmx, index: c_int, name: *mut c_char) -> c_int;
pub type GetPubVarFn =
    extern "C" fn(amx: *mut RawAmx, index: c_int, name: *mut c_char, amx_addr: *mut Cell) -> c_int;
pub type GetStringFn =
    extern "C" fn(dest: *mut c_char, source: *const Cell, use_wchar: c_int, size: usize) -> c_int;
pub type GetTagFn =
    extern "C" fn(amx: *mut RawAmx, index: c_int, tag_name: *mut c_char, tag_id: *mut Cell) -> c_int;
pub type GetUserDataFn = extern "C" fn(amx: *mut RawAmx, tag: c_long, ptr: *mut *mut c_void) -> c_int;
pub type InitFn = extern "C" fn(amx: *mut RawAmx, program: *mut c_void) -> c_int;
pub type InitJitFn = extern "C" fn(amx: *mut RawAmx, reloc_table: *mut c_void, native_code: *mut c_void) -> c_int;
pub type MemInfoFn = extern "C" fn(
    amx: *mut RawAmx,
    code_size: *mut c_long,
    data_size: *mut c_long,
    stack_heap: *mut c_long,
) -> c_int;
pub type NameLengthFn = extern "C" fn(amx: *mut RawAmx, length: *mut c_int) -> c_int;
pub type NativeInfoFn = extern "C" fn(name: *const c_char, func: AmxNative) -> *mut NativeInfo;
pub type CountFn = extern "C" fn(amx: *mut RawAmx, number: *mut c_int) -> c_int;
pub type PushFn = extern "C" fn(amx: *mut RawAmx, value: Cell) -> c_int;
pub type PushArrayFn = extern "C" fn(
    amx: *mut RawAmx,
    amx_addr: *mut Cell,
    phys_addr: *mut *mut Cell,
    array: *const Cell,
    num_cells: c_int,
) -> c_int;
pub type PushStringFn = extern "C" fn(
    amx: *mut RawAmx,
    amx_addr: *mut Cell,
    phys_addr: *mut *mut Cell,
    string: *const c_char,
    pack: c_int,
    use_wchar: c_int,
) -> c_int;
pub type RaiseErrorFn = extern "C" fn(amx: *mut RawAmx, error: c_int) -> c_int;
pub type RegisterFn = extern "C" fn(amx: *mut RawAmx, list: *const NativeInfo, number: c_int) -> c_int;
pub type ReleaseFn = extern "C" fn(amx: *mut RawAmx, amx_addr: Cell) -> c_int;
pub type SetCallbackFn = extern "C" fn(amx: *mut RawAmx, callback: AmxCallback) -> c_int;
pub type SetDebugHookFn = extern "C" fn(amx: *mut RawAmx, debug: AmxDebug) -> c_int;
pub type SetStringFn = extern "C" fn(
    dest: *mut Cell,
    source: *const c_char,
    pack: c_int,
    use_wchar: c_int,
    size: usize,
) -> c_int;
pub type SetUserDataFn = extern "C" fn(amx: *mut RawAmx, tag: c_long, ptr: *mut c_void) -> c_int;
pub type StrLenFn = extern "C" fn(cstring: *const Cell, length: *mut c_int) -> c_int;
pub type Utf8CheckFn = extern "C" fn(string: *const c_char, length: *mut c_int) -> c_int;
pub type Utf8GetFn = extern "C" fn(string: *const c_char, end: *mut *const c_char, value: *mut Cell) -> c_int;
pub type Utf8LenFn = extern "C" fn(cstring: *const Cell, length: *mut c_int) -> c_int;
pub type Utf8PutFn =
    extern "C" fn(string: *mut c_char, end: *mut *mut c_char, max_chars: c_int, value: Cell) -> c_int;

/// Bit-reinterprets a float into the VM's cell encoding.
pub fn f32_to_cell(value: f32) -> Cell {
    value.to_bits() as Cell
}

pub fn cell_to_f32(value: Cell) -> f32 {
    f32::from_bits(value as UCell)
}
