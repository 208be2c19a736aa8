#![allow(dead_code)]

//! In-process stand-in for the host: an export table backed by thread-local VMs.

use amx_bridge::ffi::*;
use amx_bridge::{AmxError, AmxHandle, ExportTable, LogSink, Plugin, PluginData, Registry};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::mem;
use std::ptr;
use std::rc::Rc;

const MEMORY_CELLS: usize = 4096;
const NAME_LENGTH: c_int = 31;
const CELL_BYTES: Cell = mem::size_of::<Cell>() as Cell;

pub type PublicBody = Rc<dyn Fn(AmxHandle, &[Cell]) -> Cell>;

struct FakeVm {
    memory: Box<[Cell]>,
    next_free: usize,
    stack: Vec<Cell>,
    publics: Vec<(String, PublicBody)>,
    pub_vars: BTreeMap<String, Cell>,
    required_natives: Vec<String>,
    natives: Vec<(String, AmxNative)>,
    releases: Vec<Cell>,
    executed: Vec<(String, Vec<Cell>)>,
    find_public_calls: usize,
}

impl FakeVm {
    fn alloc(&mut self, cells: usize) -> usize {
        let index = self.next_free;
        self.next_free += cells;
        assert!(self.next_free <= self.memory.len(), "fake VM memory exhausted");
        index
    }

    fn store_string(&mut self, bytes: &[u8]) -> Cell {
        let index = self.alloc(bytes.len() + 1);
        for (offset, byte) in bytes.iter().enumerate() {
            self.memory[index + offset] = Cell::from(*byte);
        }
        self.memory[index + bytes.len()] = 0;
        index as Cell * CELL_BYTES
    }

    fn phys(&mut self, amx_addr: Cell) -> Option<*mut Cell> {
        if amx_addr < 0 || amx_addr % CELL_BYTES != 0 {
            return None;
        }
        let index = (amx_addr / CELL_BYTES) as usize;
        (index < self.memory.len()).then(|| unsafe { self.memory.as_mut_ptr().add(index) })
    }
}

thread_local! {
    static VMS: RefCell<HashMap<usize, FakeVm>> = RefCell::new(HashMap::new());
    static NEXT_HANDLE: RefCell<usize> = const { RefCell::new(0x1000) };
}

fn with_vm<R>(amx: *mut RawAmx, f: impl FnOnce(&mut FakeVm) -> R) -> Option<R> {
    VMS.with(|vms| vms.borrow_mut().get_mut(&(amx as usize)).map(f))
}

fn vm_of<R>(amx: AmxHandle, f: impl FnOnce(&mut FakeVm) -> R) -> R {
    with_vm(amx.as_ptr(), f).expect("handle belongs to a fake VM")
}

pub struct VmBuilder {
    publics: Vec<(String, PublicBody)>,
    vars: Vec<(String, Cell)>,
    required_natives: Vec<String>,
}

pub fn vm() -> VmBuilder {
    VmBuilder { publics: Vec::new(), vars: Vec::new(), required_natives: Vec::new() }
}

impl VmBuilder {
    pub fn public(mut self, name: &str, body: impl Fn(AmxHandle, &[Cell]) -> Cell + 'static) -> Self {
        self.publics.push((name.to_string(), Rc::new(body)));
        self
    }

    pub fn var(mut self, name: &str, value: Cell) -> Self {
        self.vars.push((name.to_string(), value));
        self
    }

    /// A native the script references; registration answers `NotFound` until it is bound.
    pub fn requires(mut self, native: &str) -> Self {
        self.required_natives.push(native.to_string());
        self
    }

    pub fn build(self) -> AmxHandle {
        let id = NEXT_HANDLE.with(|next| {
            let mut next = next.borrow_mut();
            *next += 0x100;
            *next
        });
        let mut vm = FakeVm {
            memory: vec![0; MEMORY_CELLS].into_boxed_slice(),
            next_free: 1,
            stack: Vec::new(),
            publics: self.publics,
            pub_vars: BTreeMap::new(),
            required_natives: self.required_natives,
            natives: Vec::new(),
            releases: Vec::new(),
            executed: Vec::new(),
            find_public_calls: 0,
        };
        for (name, value) in self.vars {
            let index = vm.alloc(1);
            vm.memory[index] = value;
            vm.pub_vars.insert(name, index as Cell * CELL_BYTES);
        }
        VMS.with(|vms| vms.borrow_mut().insert(id, vm));
        AmxHandle::from_raw(id as *mut RawAmx)
    }
}

/// Copies `text` into script memory as an unpacked string and returns its address.
pub fn alloc_string(amx: AmxHandle, text: &str) -> Cell {
    vm_of(amx, |vm| vm.store_string(text.as_bytes()))
}

pub fn alloc_cells(amx: AmxHandle, values: &[Cell]) -> Cell {
    vm_of(amx, |vm| {
        let index = vm.alloc(values.len());
        vm.memory[index..index + values.len()].copy_from_slice(values);
        index as Cell * CELL_BYTES
    })
}

pub fn read_cell(amx: AmxHandle, amx_addr: Cell) -> Cell {
    vm_of(amx, |vm| vm.memory[(amx_addr / CELL_BYTES) as usize])
}

pub fn read_string(amx: AmxHandle, amx_addr: Cell) -> String {
    vm_of(amx, |vm| {
        let start = (amx_addr / CELL_BYTES) as usize;
        let bytes: Vec<u8> = vm.memory[start..].iter().take_while(|cell| **cell != 0).map(|cell| *cell as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

pub fn set_var(amx: AmxHandle, name: &str, value: Cell) {
    vm_of(amx, |vm| {
        let addr = *vm.pub_vars.get(name).expect("public variable declared");
        vm.memory[(addr / CELL_BYTES) as usize] = value;
    })
}

/// Publics executed so far, with arguments in declared order.
pub fn executed(amx: AmxHandle) -> Vec<(String, Vec<Cell>)> {
    vm_of(amx, |vm| vm.executed.clone())
}

pub fn releases(amx: AmxHandle) -> Vec<Cell> {
    vm_of(amx, |vm| vm.releases.clone())
}

pub fn registered_natives(amx: AmxHandle) -> Vec<String> {
    vm_of(amx, |vm| vm.natives.iter().map(|(name, _)| name.clone()).collect())
}

pub fn find_public_calls(amx: AmxHandle) -> usize {
    vm_of(amx, |vm| vm.find_public_calls)
}

/// Inserts a public at `index`, shifting the ones after it as a code reload would.
pub fn insert_public(amx: AmxHandle, index: usize, name: &str, body: impl Fn(AmxHandle, &[Cell]) -> Cell + 'static) {
    vm_of(amx, |vm| vm.publics.insert(index, (name.to_string(), Rc::new(body))));
}

pub fn native(amx: AmxHandle, name: &str) -> AmxNative {
    vm_of(amx, |vm| vm.natives.iter().find(|(native, _)| native == name).map(|(_, func)| *func))
        .unwrap_or_else(|| panic!("native '{name}' registered"))
}

/// Invokes a registered native the way the VM does, with a byte-size header.
pub fn call_native(amx: AmxHandle, name: &str, args: &[Cell]) -> Cell {
    call_native_on(amx, native(amx, name), args)
}

pub fn call_native_on(amx: AmxHandle, func: AmxNative, args: &[Cell]) -> Cell {
    let mut params = Vec::with_capacity(args.len() + 1);
    params.push(args.len() as Cell * CELL_BYTES);
    params.extend_from_slice(args);
    func(amx.as_ptr(), params.as_mut_ptr())
}

pub type Lines = Rc<RefCell<Vec<String>>>;

pub fn capture() -> (LogSink, Lines) {
    let lines: Lines = Rc::new(RefCell::new(Vec::new()));
    let sink_lines = lines.clone();
    (LogSink::capture(move |line| sink_lines.borrow_mut().push(line.to_string())), lines)
}

pub fn try_load<P: Plugin>() -> (bool, Lines) {
    let (sink, lines) = capture();
    let loaded = Registry::<P>::load(PluginData::new(sink, Some(export_table())));
    (loaded, lines)
}

pub fn load<P: Plugin>() -> Lines {
    let (loaded, lines) = try_load::<P>();
    assert!(loaded, "plugin loads: {:?}", lines.borrow());
    lines
}

pub fn export_table() -> ExportTable {
    let mut table = vec![ptr::null::<c_void>(); Export::ALL.len()].into_boxed_slice();
    let mut set = |export: Export, func: *const c_void| table[export as usize] = func;
    set(Export::Exec, exec as ExecFn as *const c_void);
    set(Export::FindPublic, find_public as FindPublicFn as *const c_void);
    set(Export::FindPubVar, find_pub_var as FindPubVarFn as *const c_void);
    set(Export::GetAddr, get_addr as GetAddrFn as *const c_void);
    set(Export::GetPublic, get_public as GetPublicFn as *const c_void);
    set(Export::GetString, get_string as GetStringFn as *const c_void);
    set(Export::NameLength, name_length as NameLengthFn as *const c_void);
    set(Export::NativeInfo, native_info as NativeInfoFn as *const c_void);
    set(Export::Push, push as PushFn as *const c_void);
    set(Export::PushString, push_string as PushStringFn as *const c_void);
    set(Export::Register, register as RegisterFn as *const c_void);
    set(Export::Release, release as ReleaseFn as *const c_void);
    set(Export::SetString, set_string as SetStringFn as *const c_void);
    set(Export::StrLen, str_len as StrLenFn as *const c_void);
    let raw = Box::leak(table).as_ptr();
    unsafe { ExportTable::from_raw(raw) }.expect("table is non-null")
}

fn unknown_vm() -> c_int {
    AmxError::Init.code()
}

extern "C" fn exec(amx: *mut RawAmx, retval: *mut Cell, index: c_int) -> c_int {
    let call = with_vm(amx, |vm| {
        let mut args = mem::take(&mut vm.stack);
        args.reverse();
        let (name, body) = usize::try_from(index).ok().and_then(|index| vm.publics.get(index))?.clone();
        vm.executed.push((name, args.clone()));
        Some((body, args))
    });
    match call {
        None => unknown_vm(),
        Some(None) => AmxError::Index.code(),
        Some(Some((body, args))) => {
            let value = body(AmxHandle::from_raw(amx), &args);
            unsafe { *retval = value };
            AMX_ERR_NONE
        }
    }
}

extern "C" fn find_public(amx: *mut RawAmx, name: *const c_char, index: *mut c_int) -> c_int {
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    let found = with_vm(amx, |vm| {
        vm.find_public_calls += 1;
        vm.publics.iter().position(|(public, _)| *public == name)
    });
    match found {
        None => unknown_vm(),
        Some(Some(position)) => {
            unsafe { *index = position as c_int };
            AMX_ERR_NONE
        }
        Some(None) => {
            unsafe { *index = c_int::MAX };
            AmxError::NotFound.code()
        }
    }
}

extern "C" fn find_pub_var(amx: *mut RawAmx, name: *const c_char, amx_addr: *mut Cell) -> c_int {
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    match with_vm(amx, |vm| vm.pub_vars.get(&name).copied()) {
        None => unknown_vm(),
        Some(Some(addr)) => {
            unsafe { *amx_addr = addr };
            AMX_ERR_NONE
        }
        Some(None) => AmxError::NotFound.code(),
    }
}

extern "C" fn get_addr(amx: *mut RawAmx, amx_addr: Cell, phys_addr: *mut *mut Cell) -> c_int {
    match with_vm(amx, |vm| vm.phys(amx_addr)) {
        None => unknown_vm(),
        Some(Some(phys)) => {
            unsafe { *phys_addr = phys };
            AMX_ERR_NONE
        }
        Some(None) => {
            unsafe { *phys_addr = ptr::null_mut() };
            AmxError::MemAccess.code()
        }
    }
}

extern "C" fn get_public(amx: *mut RawAmx, index: c_int, name: *mut c_char) -> c_int {
    let found = with_vm(amx, |vm| usize::try_from(index).ok().and_then(|index| vm.publics.get(index)).map(|p| p.0.clone()));
    match found {
        None => unknown_vm(),
        Some(None) => AmxError::Index.code(),
        Some(Some(public)) => {
            let bytes = &public.as_bytes()[..public.len().min(NAME_LENGTH as usize)];
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, name, bytes.len());
                *name.add(bytes.len()) = 0;
            }
            AMX_ERR_NONE
        }
    }
}

extern "C" fn get_string(dest: *mut c_char, source: *const Cell, _use_wchar: c_int, size: usize) -> c_int {
    let mut written = 0;
    unsafe {
        while written + 1 < size {
            let cell = *source.add(written);
            if cell == 0 {
                break;
            }
            *dest.add(written) = cell as u8 as c_char;
            written += 1;
        }
        if size > 0 {
            *dest.add(written) = 0;
        }
    }
    AMX_ERR_NONE
}

extern "C" fn name_length(_amx: *mut RawAmx, length: *mut c_int) -> c_int {
    unsafe { *length = NAME_LENGTH };
    AMX_ERR_NONE
}

extern "C" fn native_info(name: *const c_char, func: AmxNative) -> *mut NativeInfo {
    Box::into_raw(Box::new(NativeInfo { name, func }))
}

extern "C" fn push(amx: *mut RawAmx, value: Cell) -> c_int {
    with_vm(amx, |vm| vm.stack.push(value)).map_or_else(unknown_vm, |_| AMX_ERR_NONE)
}

extern "C" fn push_string(
    amx: *mut RawAmx,
    amx_addr: *mut Cell,
    phys_addr: *mut *mut Cell,
    string: *const c_char,
    _pack: c_int,
    _use_wchar: c_int,
) -> c_int {
    let bytes = unsafe { CStr::from_ptr(string) }.to_bytes().to_vec();
    let stored = with_vm(amx, |vm| {
        let addr = vm.store_string(&bytes);
        vm.stack.push(addr);
        (addr, vm.phys(addr))
    });
    match stored {
        None => unknown_vm(),
        Some((addr, phys)) => {
            unsafe {
                *amx_addr = addr;
                if !phys_addr.is_null() {
                    *phys_addr = phys.unwrap_or(ptr::null_mut());
                }
            }
            AMX_ERR_NONE
        }
    }
}

extern "C" fn register(amx: *mut RawAmx, list: *const NativeInfo, number: c_int) -> c_int {
    let infos: Vec<(String, AmxNative)> = (0..number.max(0) as usize)
        .map(|i| unsafe {
            let info = *list.add(i);
            (CStr::from_ptr(info.name).to_string_lossy().into_owned(), info.func)
        })
        .collect();
    let complete = with_vm(amx, |vm| {
        for (name, func) in infos {
            vm.natives.retain(|(existing, _)| *existing != name);
            vm.natives.push((name, func));
        }
        vm.required_natives.iter().all(|required| vm.natives.iter().any(|(name, _)| name == required))
    });
    match complete {
        None => unknown_vm(),
        Some(true) => AMX_ERR_NONE,
        Some(false) => AmxError::NotFound.code(),
    }
}

extern "C" fn release(amx: *mut RawAmx, amx_addr: Cell) -> c_int {
    with_vm(amx, |vm| vm.releases.push(amx_addr)).map_or_else(unknown_vm, |_| AMX_ERR_NONE)
}

extern "C" fn set_string(dest: *mut Cell, source: *const c_char, _pack: c_int, _use_wchar: c_int, size: usize) -> c_int {
    let bytes = unsafe { CStr::from_ptr(source) }.to_bytes();
    let mut written = 0;
    unsafe {
        while written + 1 < size && written < bytes.len() {
            *dest.add(written) = Cell::from(bytes[written]);
            written += 1;
        }
        if size > 0 {
            *dest.add(written) = 0;
        }
    }
    AMX_ERR_NONE
}

extern "C" fn str_len(cstring: *const Cell, length: *mut c_int) -> c_int {
    let mut len = 0;
    unsafe {
        while *cstring.add(len) != 0 {
            len += 1;
        }
        *length = len as c_int;
    }
    AMX_ERR_NONE
}
