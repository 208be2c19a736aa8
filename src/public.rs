use crate::error::AmxResult;
use crate::exports::{DumpArg, Exports, Report};
use crate::ffi::{f32_to_cell, Cell};
use std::cell::Cell as Slot;
use std::rc::Rc;

/// Index the host reports for a public that could not be resolved; executing it fails.
pub const INVALID_PUBLIC_INDEX: i32 = i32::MAX;

/// A value that can be pushed onto the VM stack before executing a public.
pub trait PushArg {
    /// Pushes the value. Text values allocate VM heap space; the first such address
    /// is recorded in `release` so the caller can free it after execution.
    fn push(&self, exports: &Exports, release: &mut Option<Cell>) -> AmxResult<()>;

    fn dump(&self) -> String;
}

macro_rules! push_as_cell {
    ($($ty:ty),*) => {
        $(impl PushArg for $ty {
            fn push(&self, exports: &Exports, _release: &mut Option<Cell>) -> AmxResult<()> {
                exports.push(*self as Cell, Report::Log)
            }

            fn dump(&self) -> String {
                DumpArg::dump(self)
            }
        })*
    };
}

push_as_cell!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);

impl PushArg for bool {
    fn push(&self, exports: &Exports, _release: &mut Option<Cell>) -> AmxResult<()> {
        exports.push(Cell::from(*self), Report::Log)
    }

    fn dump(&self) -> String {
        DumpArg::dump(self)
    }
}

impl PushArg for f32 {
    fn push(&self, exports: &Exports, _release: &mut Option<Cell>) -> AmxResult<()> {
        exports.push(f32_to_cell(*self), Report::Log)
    }

    fn dump(&self) -> String {
        DumpArg::dump(self)
    }
}

impl PushArg for f64 {
    fn push(&self, exports: &Exports, release: &mut Option<Cell>) -> AmxResult<()> {
        (*self as f32).push(exports, release)
    }

    fn dump(&self) -> String {
        DumpArg::dump(self)
    }
}

impl PushArg for str {
    fn push(&self, exports: &Exports, release: &mut Option<Cell>) -> AmxResult<()> {
        let amx_addr = exports.push_string(self, Report::Log)?;
        // Single slot: later temporaries of the same call are left to the VM heap reset.
        if release.is_none() {
            *release = Some(amx_addr);
        }
        Ok(())
    }

    fn dump(&self) -> String {
        DumpArg::dump(self)
    }
}

impl PushArg for String {
    fn push(&self, exports: &Exports, release: &mut Option<Cell>) -> AmxResult<()> {
        self.as_str().push(exports, release)
    }

    fn dump(&self) -> String {
        PushArg::dump(self.as_str())
    }
}

impl<T: PushArg + ?Sized> PushArg for &T {
    fn push(&self, exports: &Exports, release: &mut Option<Cell>) -> AmxResult<()> {
        (**self).push(exports, release)
    }

    fn dump(&self) -> String {
        PushArg::dump(&**self)
    }
}

/// An argument list for a public, given in the public's declared order.
pub trait PublicArgs {
    /// Pushes every argument, last declared first.
    fn push_all(&self, exports: &Exports, release: &mut Option<Cell>);

    fn dump(&self) -> String;
}

macro_rules! impl_public_args {
    ($($arg:ident),*) => {
        impl<$($arg: PushArg),*> PublicArgs for ($($arg,)*) {
            #[allow(non_snake_case, unused_variables)]
            fn push_all(&self, exports: &Exports, release: &mut Option<Cell>) {
                let ($($arg,)*) = self;
                let args: &[&dyn PushArg] = &[$($arg),*];
                for arg in args.iter().rev() {
                    // Push failures are logged by the proxy; execution still happens.
                    let _ = arg.push(exports, release);
                }
            }

            #[allow(non_snake_case)]
            fn dump(&self) -> String {
                let ($($arg,)*) = self;
                let parts: Vec<String> = vec![$(PushArg::dump($arg)),*];
                parts.join(", ")
            }
        }
    };
}

impl_public_args!();
impl_public_args!(A);
impl_public_args!(A, B);
impl_public_args!(A, B, C);
impl_public_args!(A, B, C, D);
impl_public_args!(A, B, C, D, E);
impl_public_args!(A, B, C, D, E, F);
impl_public_args!(A, B, C, D, E, F, G);
impl_public_args!(A, B, C, D, E, F, G, H);
impl_public_args!(A, B, C, D, E, F, G, H, I);
impl_public_args!(A, B, C, D, E, F, G, H, I, J);
impl_public_args!(A, B, C, D, E, F, G, H, I, J, K);
impl_public_args!(A, B, C, D, E, F, G, H, I, J, K, L);

/// Named handle to a script-side callback.
pub struct Public {
    exports: Rc<Exports>,
    name: String,
    index: Slot<i32>,
    exists: bool,
    use_caching: bool,
    cached: Slot<bool>,
}

impl Public {
    pub fn new(name: impl Into<String>, exports: Rc<Exports>, use_caching: bool) -> Self {
        let name = name.into();
        let (index, exists) = match exports.find_public(&name, Report::Silent) {
            Ok(index) => (index, index >= 0),
            Err(_) => (INVALID_PUBLIC_INDEX, false),
        };
        Self { exports, name, index: Slot::new(index), exists, use_caching, cached: Slot::new(false) }
    }

    /// Whether the public resolved when the handle was created.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uses_caching(&self) -> bool {
        self.use_caching
    }

    /// Index used by the most recent execution.
    pub fn index(&self) -> i32 {
        self.index.get()
    }

    /// Executes the public with `args` in declared order and returns its result.
    pub fn exec<A: PublicArgs>(&self, args: A) -> AmxResult<Cell> {
        if !self.use_caching || !self.cached.get() {
            self.refresh_index();
            self.cached.set(true);
        }

        let mut release = None;
        args.push_all(&self.exports, &mut release);
        let debug_args = args.dump();

        let result = self.exports.exec(self.index.get(), &debug_args, Report::Log);

        if let Some(amx_addr) = release {
            let _ = self.exports.release(amx_addr, Report::Log);
        }

        result
    }

    fn refresh_index(&self) {
        let index = self.exports.find_public(&self.name, Report::Log).unwrap_or(INVALID_PUBLIC_INDEX);
        self.index.set(index);
    }
}

impl std::fmt::Debug for Public {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Public")
            .field("name", &self.name)
            .field("index", &self.index.get())
            .field("exists", &self.exists)
            .field("use_caching", &self.use_caching)
            .finish()
    }
}
