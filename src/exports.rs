use crate::error::{AmxError, AmxResult};
use crate::ffi::*;
use crate::log::Logger;
use std::ffi::{c_char, c_int, c_long, c_void, CStr, CString};
use std::mem;
use std::ptr::{self, NonNull};

/// The host's ordinal-indexed table of exported functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportTable(*const *const c_void);

impl ExportTable {
    /// # Safety
    /// `table` must point to an array holding at least one entry per `Export` ordinal,
    /// each either null or a function of the matching signature, alive for as long as
    /// the returned value is used.
    pub unsafe fn from_raw(table: *const *const c_void) -> Option<Self> {
        (!table.is_null()).then_some(Self(table))
    }

    pub fn as_ptr(self) -> *const *const c_void {
        self.0
    }

    fn entry(self, export: Export) -> *const c_void {
        // SAFETY: `from_raw` guarantees one slot per ordinal.
        unsafe { *self.0.add(export as usize) }
    }
}

/// Whether a failing call writes a log line. `Log` is the default policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Report {
    #[default]
    Log,
    Silent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub code_size: c_long,
    pub data_size: c_long,
    pub stack_heap: c_long,
}

/// Rendering of call arguments for diagnostics: strings quoted, pointers as hex.
pub trait DumpArg {
    fn dump(&self) -> String;
}

macro_rules! dump_display {
    ($($ty:ty),*) => {
        $(impl DumpArg for $ty {
            fn dump(&self) -> String {
                self.to_string()
            }
        })*
    };
}

dump_display!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, bool);

impl DumpArg for str {
    fn dump(&self) -> String {
        format!("\"{self}\"")
    }
}

impl DumpArg for String {
    fn dump(&self) -> String {
        self.as_str().dump()
    }
}

impl DumpArg for CStr {
    fn dump(&self) -> String {
        format!("\"{}\"", self.to_string_lossy())
    }
}

impl<T: ?Sized> DumpArg for *const T {
    fn dump(&self) -> String {
        format!("{:p}", *self)
    }
}

impl<T: ?Sized> DumpArg for *mut T {
    fn dump(&self) -> String {
        format!("{:p}", *self)
    }
}

impl DumpArg for AmxHandle {
    fn dump(&self) -> String {
        self.to_string()
    }
}

impl DumpArg for AmxNative {
    fn dump(&self) -> String {
        format!("{:p}", *self as *const ())
    }
}

impl<T: DumpArg + ?Sized> DumpArg for &T {
    fn dump(&self) -> String {
        (**self).dump()
    }
}

macro_rules! dump_args {
    ($($arg:expr),* $(,)?) => {{
        let parts: Vec<String> = vec![$(DumpArg::dump(&$arg)),*];
        parts.join(", ")
    }};
}

/// Converts text for the host, cutting it at the first interior NUL.
pub(crate) fn c_string(text: &str) -> CString {
    let bytes = text.as_bytes();
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    CString::new(&bytes[..end]).unwrap_or_default()
}

fn buffer_to_string(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

/// Synchronous proxy bound to one VM instance. Every host call goes through here.
#[derive(Debug)]
pub struct Exports {
    amx: AmxHandle,
    table: ExportTable,
    log_errors: bool,
    logger: Logger,
}

impl Exports {
    pub fn new(amx: AmxHandle, table: ExportTable, log_errors: bool, logger: Logger) -> Self {
        Self { amx, table, log_errors, logger }
    }

    pub fn amx(&self) -> AmxHandle {
        self.amx
    }

    pub fn table(&self) -> ExportTable {
        self.table
    }

    pub fn log_errors(&self) -> bool {
        self.log_errors
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.logger.log(message);
    }

    /// # Safety
    /// `F` must be the function-pointer type matching `export`'s signature.
    unsafe fn resolve<F: Copy>(&self, export: Export) -> Option<F> {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*const c_void>());
        let entry = self.table.entry(export);
        if entry.is_null() {
            return None;
        }
        Some(mem::transmute_copy::<*const c_void, F>(&entry))
    }

    fn status(&self, export: Export, code: c_int, report: Report, args: impl FnOnce() -> String) -> AmxResult<()> {
        let result = AmxError::check(code);
        if let Err(err) = result {
            if report == Report::Log && self.log_errors {
                self.log(format!("{err} in amx_{export}({})", args()));
            }
        }
        result
    }

    /// Resolves `export` as `F`, calls it and interprets the returned status.
    ///
    /// # Safety
    /// `F` must match `export`'s signature.
    unsafe fn invoke<F: Copy>(
        &self,
        export: Export,
        report: Report,
        args: impl FnOnce() -> String,
        call: impl FnOnce(F) -> c_int,
    ) -> AmxResult<()> {
        let code = match self.resolve::<F>(export) {
            Some(func) => call(func),
            None => AmxError::Callback.code(),
        };
        self.status(export, code, report, args)
    }

    /// # Safety
    /// `v` must be valid for reads and writes.
    pub unsafe fn align16(&self, v: *mut u16) -> *mut u16 {
        match self.resolve::<Align16Fn>(Export::Align16) {
            Some(func) => func(v),
            None => v,
        }
    }

    /// # Safety
    /// `v` must be valid for reads and writes.
    pub unsafe fn align32(&self, v: *mut u32) -> *mut u32 {
        match self.resolve::<Align32Fn>(Export::Align32) {
            Some(func) => func(v),
            None => v,
        }
    }

    /// # Safety
    /// `v` must be valid for reads and writes.
    pub unsafe fn align64(&self, v: *mut u64) -> *mut u64 {
        match self.resolve::<Align64Fn>(Export::Align64) {
            Some(func) => func(v),
            None => v,
        }
    }

    /// Reserves `cells` cells on the VM heap.
    pub fn allot(&self, cells: usize, report: Report) -> AmxResult<(Cell, *mut Cell)> {
        let mut amx_addr: Cell = 0;
        let mut phys_addr: *mut Cell = ptr::null_mut();
        let (addr_out, phys_out) = (ptr::addr_of_mut!(amx_addr), ptr::addr_of_mut!(phys_addr));
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<AllotFn>(
                Export::Allot,
                report,
                || dump_args!(self.amx, cells, addr_out, phys_out),
                |func| func(amx, cells as c_int, addr_out, phys_out),
            )?;
        }
        Ok((amx_addr, phys_addr))
    }

    /// # Safety
    /// `params` must be a VM parameter array for the native at `index`.
    pub unsafe fn callback(&self, index: Cell, params: *const Cell, report: Report) -> AmxResult<Cell> {
        let mut result: Cell = 0;
        let result_out = ptr::addr_of_mut!(result);
        let amx = self.amx.as_ptr();
        self.invoke::<CallbackFn>(
            Export::Callback,
            report,
            || dump_args!(self.amx, index, result_out, params),
            |func| func(amx, index, result_out, params),
        )?;
        Ok(result)
    }

    pub fn cleanup(&self, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        unsafe { self.invoke::<CleanupFn>(Export::Cleanup, report, || dump_args!(self.amx), |func| func(amx)) }
    }

    /// # Safety
    /// `clone` must be an uninitialised VM instance and `data` a data segment sized for it.
    pub unsafe fn clone_into(&self, clone: AmxHandle, data: *mut c_void, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        self.invoke::<CloneFn>(
            Export::Clone,
            report,
            || dump_args!(clone, self.amx, data),
            |func| func(clone.as_ptr(), amx, data),
        )
    }

    /// Runs the public at `index`. Failures name the public and the rendered arguments.
    pub fn exec(&self, index: i32, debug_args: &str, report: Report) -> AmxResult<Cell> {
        let mut retval: Cell = 0;
        let amx = self.amx.as_ptr();
        // SAFETY: `ExecFn` is the signature of the Exec ordinal.
        let code = match unsafe { self.resolve::<ExecFn>(Export::Exec) } {
            Some(func) => func(amx, &mut retval, index),
            None => AmxError::Callback.code(),
        };
        if let Err(err) = AmxError::check(code) {
            if report == Report::Log && self.log_errors {
                self.log(format!(
                    "{err} in public {}({debug_args}) - please note that the AMX error is not related with the plugin, but your script",
                    self.public_name(index)
                ));
            }
            return Err(err);
        }
        Ok(retval)
    }

    pub fn find_native(&self, name: &str, report: Report) -> AmxResult<i32> {
        self.find_index(Export::FindNative, name, report)
    }

    pub fn find_public(&self, name: &str, report: Report) -> AmxResult<i32> {
        self.find_index(Export::FindPublic, name, report)
    }

    fn find_index(&self, export: Export, name: &str, report: Report) -> AmxResult<i32> {
        let c_name = c_string(name);
        let mut index: c_int = 0;
        let index_out = ptr::addr_of_mut!(index);
        let amx = self.amx.as_ptr();
        // SAFETY: FindNative and FindPublic share the lookup signature.
        unsafe {
            self.invoke::<FindPublicFn>(
                export,
                report,
                || dump_args!(self.amx, name, index_out),
                |func| func(amx, c_name.as_ptr(), index_out),
            )?;
        }
        Ok(index)
    }

    /// Returns the VM address of the public variable `name`.
    pub fn find_pub_var(&self, name: &str, report: Report) -> AmxResult<Cell> {
        let c_name = c_string(name);
        let mut amx_addr: Cell = 0;
        let addr_out = ptr::addr_of_mut!(amx_addr);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<FindPubVarFn>(
                Export::FindPubVar,
                report,
                || dump_args!(self.amx, name, addr_out),
                |func| func(amx, c_name.as_ptr(), addr_out),
            )?;
        }
        Ok(amx_addr)
    }

    pub fn find_tag_id(&self, tag_id: Cell, report: Report) -> AmxResult<String> {
        let mut buffer = self.name_buffer();
        let name_out = buffer.as_mut_ptr() as *mut c_char;
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<FindTagIdFn>(
                Export::FindTagId,
                report,
                || dump_args!(self.amx, tag_id, name_out),
                |func| func(amx, tag_id, name_out),
            )?;
        }
        Ok(buffer_to_string(&buffer))
    }

    pub fn flags(&self, report: Report) -> AmxResult<u16> {
        let mut flags: u16 = 0;
        let flags_out = ptr::addr_of_mut!(flags);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<FlagsFn>(
                Export::Flags,
                report,
                || dump_args!(self.amx, flags_out),
                |func| func(amx, flags_out),
            )?;
        }
        Ok(flags)
    }

    /// Translates a VM data address into a native pointer.
    pub fn get_addr(&self, amx_addr: Cell, report: Report) -> AmxResult<NonNull<Cell>> {
        let mut phys_addr: *mut Cell = ptr::null_mut();
        let phys_out = ptr::addr_of_mut!(phys_addr);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<GetAddrFn>(
                Export::GetAddr,
                report,
                || dump_args!(self.amx, amx_addr, phys_out),
                |func| func(amx, amx_addr, phys_out),
            )?;
        }
        NonNull::new(phys_addr).ok_or(AmxError::MemAccess)
    }

    pub fn get_native(&self, index: i32, report: Report) -> AmxResult<String> {
        self.get_name(Export::GetNative, index, report)
    }

    pub fn get_public(&self, index: i32, report: Report) -> AmxResult<String> {
        self.get_name(Export::GetPublic, index, report)
    }

    fn get_name(&self, export: Export, index: i32, report: Report) -> AmxResult<String> {
        let mut buffer = self.name_buffer();
        let name_out = buffer.as_mut_ptr() as *mut c_char;
        let amx = self.amx.as_ptr();
        // SAFETY: GetNative and GetPublic share the by-index name signature.
        unsafe {
            self.invoke::<GetPublicFn>(
                export,
                report,
                || dump_args!(self.amx, index, name_out),
                |func| func(amx, index, name_out),
            )?;
        }
        Ok(buffer_to_string(&buffer))
    }

    /// Name and VM address of the public variable at `index`.
    pub fn get_pub_var(&self, index: i32, report: Report) -> AmxResult<(String, Cell)> {
        let mut buffer = self.name_buffer();
        let name_out = buffer.as_mut_ptr() as *mut c_char;
        let mut amx_addr: Cell = 0;
        let addr_out = ptr::addr_of_mut!(amx_addr);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<GetPubVarFn>(
                Export::GetPubVar,
                report,
                || dump_args!(self.amx, index, name_out, addr_out),
                |func| func(amx, index, name_out, addr_out),
            )?;
        }
        Ok((buffer_to_string(&buffer), amx_addr))
    }

    /// Decodes up to `size - 1` characters of the VM string at `source`.
    ///
    /// # Safety
    /// `source` must point at a VM string, typically obtained from `get_addr`.
    pub unsafe fn get_string(&self, source: *const Cell, size: usize, report: Report) -> AmxResult<Vec<u8>> {
        let mut buffer = vec![0u8; size.max(1)];
        let len = buffer.len();
        let dest = buffer.as_mut_ptr() as *mut c_char;
        self.invoke::<GetStringFn>(
            Export::GetString,
            report,
            || dump_args!(dest, source, 0, len),
            |func| func(dest, source, 0, len),
        )?;
        let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
        buffer.truncate(end);
        Ok(buffer)
    }

    /// Name and id of the tag at `index`.
    pub fn get_tag(&self, index: i32, report: Report) -> AmxResult<(String, Cell)> {
        let mut buffer = self.name_buffer();
        let name_out = buffer.as_mut_ptr() as *mut c_char;
        let mut tag_id: Cell = 0;
        let tag_out = ptr::addr_of_mut!(tag_id);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<GetTagFn>(
                Export::GetTag,
                report,
                || dump_args!(self.amx, index, name_out, tag_out),
                |func| func(amx, index, name_out, tag_out),
            )?;
        }
        Ok((buffer_to_string(&buffer), tag_id))
    }

    pub fn get_user_data(&self, tag: c_long, report: Report) -> AmxResult<*mut c_void> {
        let mut data: *mut c_void = ptr::null_mut();
        let data_out = ptr::addr_of_mut!(data);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<GetUserDataFn>(
                Export::GetUserData,
                report,
                || dump_args!(self.amx, tag as i64, data_out),
                |func| func(amx, tag, data_out),
            )?;
        }
        Ok(data)
    }

    /// # Safety
    /// `program` must point at a complete compiled script image.
    pub unsafe fn init(&self, program: *mut c_void, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        self.invoke::<InitFn>(Export::Init, report, || dump_args!(self.amx, program), |func| func(amx, program))
    }

    /// # Safety
    /// Both buffers must be sized as the host requires for this instance.
    pub unsafe fn init_jit(&self, reloc_table: *mut c_void, native_code: *mut c_void, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        self.invoke::<InitJitFn>(
            Export::InitJIT,
            report,
            || dump_args!(self.amx, reloc_table, native_code),
            |func| func(amx, reloc_table, native_code),
        )
    }

    pub fn mem_info(&self, report: Report) -> AmxResult<MemInfo> {
        let mut info = MemInfo::default();
        let code_out = ptr::addr_of_mut!(info.code_size);
        let data_out = ptr::addr_of_mut!(info.data_size);
        let heap_out = ptr::addr_of_mut!(info.stack_heap);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<MemInfoFn>(
                Export::MemInfo,
                report,
                || dump_args!(self.amx, code_out, data_out, heap_out),
                |func| func(amx, code_out, data_out, heap_out),
            )?;
        }
        Ok(info)
    }

    /// Longest symbol name the instance can hold.
    pub fn name_length(&self, report: Report) -> AmxResult<usize> {
        self.count(Export::NameLength, report)
    }

    /// Builds the host's registration record for one native. Null when the entry is missing.
    pub fn native_info(&self, name: &CStr, func: AmxNative) -> *mut NativeInfo {
        // SAFETY: `NativeInfoFn` is the signature of the NativeInfo ordinal.
        match unsafe { self.resolve::<NativeInfoFn>(Export::NativeInfo) } {
            Some(native_info) => native_info(name.as_ptr(), func),
            None => ptr::null_mut(),
        }
    }

    /// Shared shape of NameLength and the Num* exports.
    fn count(&self, export: Export, report: Report) -> AmxResult<usize> {
        let mut number: c_int = 0;
        let number_out = ptr::addr_of_mut!(number);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<CountFn>(
                export,
                report,
                || dump_args!(self.amx, number_out),
                |func| func(amx, number_out),
            )?;
        }
        Ok(number.max(0) as usize)
    }

    pub fn num_natives(&self, report: Report) -> AmxResult<usize> {
        self.count(Export::NumNatives, report)
    }

    pub fn num_publics(&self, report: Report) -> AmxResult<usize> {
        self.count(Export::NumPublics, report)
    }

    pub fn num_pub_vars(&self, report: Report) -> AmxResult<usize> {
        self.count(Export::NumPubVars, report)
    }

    pub fn num_tags(&self, report: Report) -> AmxResult<usize> {
        self.count(Export::NumTags, report)
    }

    pub fn push(&self, value: Cell, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<PushFn>(Export::Push, report, || dump_args!(self.amx, value), |func| func(amx, value))
        }
    }

    /// Copies `array` onto the VM heap and pushes its address.
    pub fn push_array(&self, array: &[Cell], report: Report) -> AmxResult<(Cell, *mut Cell)> {
        let mut amx_addr: Cell = 0;
        let mut phys_addr: *mut Cell = ptr::null_mut();
        let (addr_out, phys_out) = (ptr::addr_of_mut!(amx_addr), ptr::addr_of_mut!(phys_addr));
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<PushArrayFn>(
                Export::PushArray,
                report,
                || dump_args!(self.amx, addr_out, phys_out, array.as_ptr(), array.len()),
                |func| func(amx, addr_out, phys_out, array.as_ptr(), array.len() as c_int),
            )?;
        }
        Ok((amx_addr, phys_addr))
    }

    /// Copies `text` onto the VM heap as an unpacked string and pushes its address.
    /// The returned address must be handed to `release` once the call completes.
    pub fn push_string(&self, text: &str, report: Report) -> AmxResult<Cell> {
        let c_text = c_string(text);
        let mut amx_addr: Cell = 0;
        let addr_out = ptr::addr_of_mut!(amx_addr);
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<PushStringFn>(
                Export::PushString,
                report,
                || dump_args!(self.amx, addr_out, ptr::null::<Cell>(), text, 0, 0),
                |func| func(amx, addr_out, ptr::null_mut(), c_text.as_ptr(), 0, 0),
            )?;
        }
        Ok(amx_addr)
    }

    pub fn raise_error(&self, error: AmxError, report: Report) -> AmxResult<()> {
        let code = error.code();
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<RaiseErrorFn>(Export::RaiseError, report, || dump_args!(self.amx, code), |func| func(amx, code))
        }
    }

    /// # Safety
    /// `list` must point at `number` records whose names stay valid for the call.
    pub unsafe fn register(&self, list: *const NativeInfo, number: i32, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        self.invoke::<RegisterFn>(
            Export::Register,
            report,
            || dump_args!(self.amx, list, number),
            |func| func(amx, list, number),
        )
    }

    /// Frees heap space reserved by `allot`, `push_array` or `push_string`.
    pub fn release(&self, amx_addr: Cell, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<ReleaseFn>(Export::Release, report, || dump_args!(self.amx, amx_addr), |func| {
                func(amx, amx_addr)
            })
        }
    }

    pub fn set_callback(&self, callback: AmxCallback, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<SetCallbackFn>(
                Export::SetCallback,
                report,
                || dump_args!(self.amx, callback as *const ()),
                |func| func(amx, callback),
            )
        }
    }

    pub fn set_debug_hook(&self, debug: AmxDebug, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<SetDebugHookFn>(
                Export::SetDebugHook,
                report,
                || dump_args!(self.amx, debug as *const ()),
                |func| func(amx, debug),
            )
        }
    }

    /// Encodes `source` into VM memory at `dest`, writing at most `size` cells.
    ///
    /// # Safety
    /// `dest` must be writable for `size` cells.
    pub unsafe fn set_string(
        &self,
        dest: *mut Cell,
        source: &str,
        pack: bool,
        size: usize,
        report: Report,
    ) -> AmxResult<()> {
        let c_source = c_string(source);
        let pack = c_int::from(pack);
        self.invoke::<SetStringFn>(
            Export::SetString,
            report,
            || dump_args!(dest, source, pack, 0, size),
            |func| func(dest, c_source.as_ptr(), pack, 0, size),
        )
    }

    pub fn set_user_data(&self, tag: c_long, data: *mut c_void, report: Report) -> AmxResult<()> {
        let amx = self.amx.as_ptr();
        unsafe {
            self.invoke::<SetUserDataFn>(
                Export::SetUserData,
                report,
                || dump_args!(self.amx, tag as i64, data),
                |func| func(amx, tag, data),
            )
        }
    }

    /// # Safety
    /// `cstring` must point at a VM string.
    pub unsafe fn str_len(&self, cstring: *const Cell, report: Report) -> AmxResult<usize> {
        self.string_length(Export::StrLen, cstring, report)
    }

    /// # Safety
    /// `cstring` must point at a VM string.
    pub unsafe fn utf8_len(&self, cstring: *const Cell, report: Report) -> AmxResult<usize> {
        self.string_length(Export::UTF8Len, cstring, report)
    }

    // StrLen and UTF8Len share the length signature.
    unsafe fn string_length(&self, export: Export, cstring: *const Cell, report: Report) -> AmxResult<usize> {
        let mut length: c_int = 0;
        let length_out = ptr::addr_of_mut!(length);
        self.invoke::<StrLenFn>(export, report, || dump_args!(cstring, length_out), |func| func(cstring, length_out))?;
        Ok(length.max(0) as usize)
    }

    /// Validates `text` as UTF-8 the way the VM does, returning its length in characters.
    pub fn utf8_check(&self, text: &str, report: Report) -> AmxResult<usize> {
        let c_text = c_string(text);
        let mut length: c_int = 0;
        let length_out = ptr::addr_of_mut!(length);
        unsafe {
            self.invoke::<Utf8CheckFn>(
                Export::UTF8Check,
                report,
                || dump_args!(text, length_out),
                |func| func(c_text.as_ptr(), length_out),
            )?;
        }
        Ok(length.max(0) as usize)
    }

    /// Decodes the first character of `text`; returns it with the bytes consumed.
    pub fn utf8_get(&self, text: &CStr, report: Report) -> AmxResult<(Cell, usize)> {
        let start = text.as_ptr();
        let mut end: *const c_char = start;
        let mut value: Cell = 0;
        let (end_out, value_out) = (ptr::addr_of_mut!(end), ptr::addr_of_mut!(value));
        unsafe {
            self.invoke::<Utf8GetFn>(
                Export::UTF8Get,
                report,
                || dump_args!(text, end_out, value_out),
                |func| func(start, end_out, value_out),
            )?;
        }
        let consumed = (end as usize).saturating_sub(start as usize);
        Ok((value, consumed))
    }

    /// Encodes `value` as UTF-8 into a buffer of `max_chars` bytes.
    pub fn utf8_put(&self, value: Cell, max_chars: usize, report: Report) -> AmxResult<Vec<u8>> {
        let mut buffer = vec![0u8; max_chars];
        let start = buffer.as_mut_ptr() as *mut c_char;
        let mut end: *mut c_char = start;
        let end_out = ptr::addr_of_mut!(end);
        unsafe {
            self.invoke::<Utf8PutFn>(
                Export::UTF8Put,
                report,
                || dump_args!(start, end_out, max_chars, value),
                |func| func(start, end_out, max_chars as c_int, value),
            )?;
        }
        let written = (end as usize).saturating_sub(start as usize).min(buffer.len());
        buffer.truncate(written);
        Ok(buffer)
    }

    /// Name of the public at `index`, for diagnostics.
    pub fn public_name(&self, index: i32) -> String {
        self.get_public(index, Report::Log).unwrap_or_default()
    }

    fn name_buffer(&self) -> Vec<u8> {
        let length = self.name_length(Report::Log).unwrap_or(0);
        vec![0u8; length + 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_render_with_quoted_strings() {
        let rendered = dump_args!("OnGameModeInit", 3, 1.5f32);
        assert_eq!(rendered, "\"OnGameModeInit\", 3, 1.5");
        let null: *const Cell = ptr::null();
        assert_eq!(null.dump(), "0x0");
    }

    #[test]
    fn host_strings_stop_at_interior_nul() {
        assert_eq!(c_string("abc\0def").as_bytes(), b"abc");
        assert_eq!(buffer_to_string(b"name\0\0\0"), "name");
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(unsafe { ExportTable::from_raw(ptr::null()) }.is_none());
    }
}
