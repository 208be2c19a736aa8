use crate::error::BridgeError;
use crate::ffi::{cell_to_f32, f32_to_cell, Cell};
use crate::script::ScriptBase;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// One raw argument of a native call, bound to the script that produced it.
#[derive(Clone, Copy)]
pub struct NativeParam<'a> {
    raw: Cell,
    script: &'a ScriptBase,
}

impl<'a> NativeParam<'a> {
    pub fn new(raw: Cell, script: &'a ScriptBase) -> Self {
        Self { raw, script }
    }

    pub fn raw(&self) -> Cell {
        self.raw
    }

    pub fn script(&self) -> &'a ScriptBase {
        self.script
    }

    pub fn get<T: FromParam>(self) -> Result<T, BridgeError> {
        T::from_param(self)
    }
}

/// Target representation of a native argument, chosen by the handler's declared type.
pub trait FromParam: Sized {
    fn from_param(param: NativeParam<'_>) -> Result<Self, BridgeError>;
}

impl FromParam for Cell {
    fn from_param(param: NativeParam<'_>) -> Result<Self, BridgeError> {
        Ok(param.raw)
    }
}

impl FromParam for bool {
    fn from_param(param: NativeParam<'_>) -> Result<Self, BridgeError> {
        Ok(param.raw != 0)
    }
}

impl FromParam for f32 {
    fn from_param(param: NativeParam<'_>) -> Result<Self, BridgeError> {
        Ok(cell_to_f32(param.raw))
    }
}

impl<T: CellRepr> FromParam for AmxRef<T> {
    fn from_param(param: NativeParam<'_>) -> Result<Self, BridgeError> {
        param.script.cell_ref(param.raw).map(AmxRef::cast)
    }
}

impl FromParam for String {
    fn from_param(param: NativeParam<'_>) -> Result<Self, BridgeError> {
        param.script.string(param.raw)
    }
}

/// Native values stored in a single cell.
pub trait CellRepr: Copy {
    fn from_cell(cell: Cell) -> Self;
    fn into_cell(self) -> Cell;
}

impl CellRepr for Cell {
    fn from_cell(cell: Cell) -> Self {
        cell
    }

    fn into_cell(self) -> Cell {
        self
    }
}

impl CellRepr for f32 {
    fn from_cell(cell: Cell) -> Self {
        cell_to_f32(cell)
    }

    fn into_cell(self) -> Cell {
        f32_to_cell(self)
    }
}

/// A cell in the script's data segment, reached through host address translation.
///
/// Only produced from addresses the host translated successfully; the host keeps
/// the segment alive for the duration of the native call.
pub struct AmxRef<T> {
    ptr: NonNull<Cell>,
    _marker: PhantomData<T>,
}

pub type CellRef = AmxRef<Cell>;
pub type FloatRef = AmxRef<f32>;

impl<T> Clone for AmxRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AmxRef<T> {}

impl<T: CellRepr> AmxRef<T> {
    pub(crate) fn new(ptr: NonNull<Cell>) -> Self {
        Self { ptr, _marker: PhantomData }
    }

    fn cast<U: CellRepr>(self) -> AmxRef<U> {
        AmxRef::new(self.ptr)
    }

    pub fn get(&self) -> T {
        // SAFETY: translated by the host for the current call.
        T::from_cell(unsafe { self.ptr.as_ptr().read() })
    }

    pub fn set(&self, value: T) {
        // SAFETY: translated by the host for the current call.
        unsafe { self.ptr.as_ptr().write(value.into_cell()) }
    }

    /// Reference `count` cells further into the same array.
    ///
    /// # Safety
    /// The script array must extend at least `count` cells past this one.
    pub unsafe fn offset(&self, count: usize) -> Self {
        Self::new(NonNull::new_unchecked(self.ptr.as_ptr().add(count)))
    }

    pub fn as_mut_ptr(&self) -> *mut Cell {
        self.ptr.as_ptr()
    }
}

impl<T> fmt::Debug for AmxRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmxRef({:p})", self.ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_convert_through_cell_encoding() {
        let mut cell: Cell = 0;
        let int_ref = CellRef::new(NonNull::from(&mut cell));
        int_ref.set(41);
        assert_eq!(int_ref.get(), 41);

        let float_ref: FloatRef = int_ref.cast();
        float_ref.set(2.5);
        assert_eq!(cell, f32_to_cell(2.5), "float stored as its bit pattern");
        assert_eq!(float_ref.get(), 2.5);
    }

    #[test]
    fn offsets_walk_an_array() {
        let mut cells: [Cell; 3] = [1, 2, 3];
        let first = CellRef::new(NonNull::new(cells.as_mut_ptr()).expect("array pointer"));
        let third = unsafe { first.offset(2) };
        third.set(30);
        assert_eq!(cells, [1, 2, 30]);
    }
}
