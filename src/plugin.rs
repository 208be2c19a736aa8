use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::exports::{ExportTable, Exports};
use crate::ffi::{AmxHandle, AmxNative, Cell, LogPrintf, Supports, PLUGIN_DATA_AMX_EXPORTS, PLUGIN_DATA_LOGPRINTF};
use crate::log::{LogSink, Logger};
use crate::native::{panic_message, NativeHandler, NativeTable, RawNativeHandler};
use crate::script::{Script, ScriptBase};
use anyhow::{anyhow, bail, Result};
use std::any::{type_name, Any};
use std::cell::{Cell as Slot, RefCell};
use std::ffi::c_void;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::rc::Rc;

const DUPLICATE_GAMEMODE_WARNING: &str =
    "Warning! You probably forgot to define FILTERSCRIPT in one of your filterscripts";

/// Packs a semantic version the way scripts declare it: one byte per component.
pub const fn pack_version(major: u8, minor: u8, patch: u8) -> i32 {
    ((major as i32) << 16) | ((minor as i32) << 8) | patch as i32
}

pub fn version_tuple(version: i32) -> (i32, i32, i32) {
    ((version >> 16) & 0xff, (version >> 8) & 0xff, version & 0xff)
}

pub fn version_string(version: i32) -> String {
    let (major, minor, patch) = version_tuple(version);
    format!("{major}.{minor}.{patch}")
}

/// A native-code plugin loaded by the host.
///
/// The plugin value is created with `Default` when the host calls `Load` and lives
/// until `Unload`. Every hook runs on the host thread; errors and panics are logged
/// and never reach the host.
pub trait Plugin: Default + 'static {
    type Script: Script;

    const SUPPORTS: Supports = Supports::natives();

    fn name(&self) -> &'static str {
        let full = type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    fn version(&self) -> i32 {
        pack_version(1, 0, 0)
    }

    fn log_amx_errors(&self) -> bool {
        true
    }

    /// JSON file read before `on_load`; see [`BridgeConfig`].
    fn config_path(&self) -> Option<PathBuf> {
        None
    }

    /// Registers natives and prepares plugin state. `Ok(false)` rejects the load.
    fn on_load(&mut self, ctx: &mut PluginContext<'_, Self>) -> Result<bool> {
        ctx.log(format!("plugin v{} loaded", ctx.version_string()));
        Ok(true)
    }

    fn on_unload(&mut self, ctx: &mut PluginContext<'_, Self>) -> Result<()> {
        ctx.log("plugin unloaded");
        Ok(())
    }

    fn on_process_tick(&mut self, _ctx: &mut PluginContext<'_, Self>) -> Result<()> {
        Ok(())
    }
}

/// What plugin hooks can reach while they run.
pub struct PluginContext<'a, P: Plugin> {
    natives: Option<&'a mut NativeTable<P>>,
    logger: &'a Logger,
    version: i32,
}

impl<'a, P: Plugin> PluginContext<'a, P> {
    /// Adds a typed native. Only available from `Plugin::on_load`.
    pub fn register_native<Args, H>(&mut self, name: &str, handler: H) -> Result<()>
    where
        Args: 'static,
        H: NativeHandler<P::Script, Args>,
    {
        self.natives_mut(name)?.register(name, handler)
    }

    /// Adds a native that validates its own argument array. Only available from `Plugin::on_load`.
    pub fn register_raw_native<H>(&mut self, name: &str, handler: H) -> Result<()>
    where
        H: RawNativeHandler<P::Script>,
    {
        self.natives_mut(name)?.register_raw(name, handler)
    }

    fn natives_mut(&mut self, name: &str) -> Result<&mut NativeTable<P>> {
        match self.natives.as_deref_mut() {
            Some(natives) => Ok(natives),
            None => bail!("native '{name}' registered outside of on_load"),
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.logger.log(message);
    }

    pub fn logger(&self) -> &Logger {
        self.logger
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn version_string(&self) -> String {
        version_string(self.version)
    }
}

/// The pieces of the host's plugin data table this bridge uses.
#[derive(Debug, Clone)]
pub struct PluginData {
    sink: LogSink,
    exports: Option<ExportTable>,
}

impl PluginData {
    pub fn new(sink: LogSink, exports: Option<ExportTable>) -> Self {
        Self { sink, exports }
    }

    /// Reads the log sink and export table slots of the host's data table.
    ///
    /// # Safety
    /// `data` must be null or the table the host passes to `Load`, with a printf-style
    /// function (or null) at `PLUGIN_DATA_LOGPRINTF` and the export table (or null) at
    /// `PLUGIN_DATA_AMX_EXPORTS`.
    pub unsafe fn from_raw(data: *const *const c_void) -> Self {
        if data.is_null() {
            return Self::new(LogSink::Stderr, None);
        }
        let printf = *data.add(PLUGIN_DATA_LOGPRINTF);
        let sink = if printf.is_null() {
            LogSink::Stderr
        } else {
            LogSink::Host(mem::transmute::<*const c_void, LogPrintf>(printf))
        };
        let exports = ExportTable::from_raw(*data.add(PLUGIN_DATA_AMX_EXPORTS) as *const *const c_void);
        Self::new(sink, exports)
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn exports(&self) -> Option<ExportTable> {
        self.exports
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
        };
        f.write_str(label)
    }
}

thread_local! {
    static REGISTRY: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

/// Plugin state: the plugin value, its natives and the active scripts.
///
/// Installed by [`Registry::load`] and removed by [`Registry::unload`]. The host
/// drives every entry point from one thread, which is the only synchronisation
/// this type relies on. State lives in a thread-local slot owned by the thread
/// that called `Load`; entry points reached from any other thread find no plugin
/// (`NotLoaded`) rather than sharing it. Fields are borrowed briefly so natives can re-enter the
/// registry while a hook or a public is running.
pub struct Registry<P: Plugin> {
    plugin: RefCell<P>,
    state: Slot<PluginState>,
    logger: Logger,
    config: BridgeConfig,
    table: ExportTable,
    version: i32,
    log_amx_errors: Slot<bool>,
    natives: RefCell<NativeTable<P>>,
    scripts: RefCell<Vec<Rc<P::Script>>>,
}

impl<P: Plugin> Registry<P> {
    pub fn supports() -> Supports {
        P::SUPPORTS
    }

    /// Handles the host's `Load`. Returns whether the plugin accepted the load.
    pub fn load(data: PluginData) -> bool {
        let Some(table) = data.exports else {
            Logger::unprefixed(data.sink).log("load: host data carries no export table");
            return false;
        };

        let sink = data.sink.clone();
        let registry = match panic::catch_unwind(AssertUnwindSafe(|| Self::prepare(data.sink, table))) {
            Ok(registry) => registry,
            Err(payload) => {
                Logger::unprefixed(sink).log(format!("load: {}", panic_message(payload.as_ref())));
                return false;
            }
        };
        Self::install(Some(registry.clone()));

        registry.log_line(format!("plugin v{} loading...", version_string(registry.version)));

        let loaded = registry.contain("load", || {
            let mut plugin = registry.plugin.borrow_mut();
            let mut natives = registry.natives.borrow_mut();
            let mut ctx = registry.context(Some(&mut *natives));
            let loaded = plugin.on_load(&mut ctx)?;
            registry.log_amx_errors.set(registry.config.log_amx_errors_or(plugin.log_amx_errors()));
            Ok(loaded)
        });

        if loaded == Some(true) {
            registry.state.set(PluginState::Loaded);
            true
        } else {
            registry.state.set(PluginState::Unloaded);
            Self::install(None);
            false
        }
    }

    /// Handles the host's `Unload`: runs `on_unload`, drops every script and uninstalls.
    pub fn unload() {
        let Some(registry) = Self::current() else {
            return;
        };
        registry.contain("unload", || {
            let mut plugin = registry.plugin.try_borrow_mut().map_err(|_| BridgeError::PluginBusy)?;
            plugin.on_unload(&mut registry.context(None))
        });
        let scripts = mem::take(&mut *registry.scripts.borrow_mut());
        registry.contain("unload", || {
            drop(scripts);
            Ok(())
        });
        registry.state.set(PluginState::Unloaded);
        Self::install(None);
    }

    /// Handles the host's `AmxLoad`. Failures discard the script and are logged.
    pub fn amx_load(amx: AmxHandle) {
        if let Some(registry) = Self::current() {
            registry.contain("amx_load", || registry.admit(amx));
        }
    }

    /// Handles the host's `AmxUnload`.
    pub fn amx_unload(amx: AmxHandle) {
        if let Some(registry) = Self::current() {
            // Dropped after the borrow ends so a script's `Drop` can still look up the registry.
            let removed: Vec<_> = {
                let mut scripts = registry.scripts.borrow_mut();
                let (removed, kept): (Vec<_>, Vec<_>) =
                    mem::take(&mut *scripts).into_iter().partition(|script| *script.base() == amx);
                *scripts = kept;
                removed
            };
            registry.contain("amx_unload", || {
                drop(removed);
                Ok(())
            });
        }
    }

    pub fn process_tick() {
        if let Some(registry) = Self::current() {
            registry.contain("process_tick", || {
                let mut plugin = registry.plugin.try_borrow_mut().map_err(|_| BridgeError::PluginBusy)?;
                plugin.on_process_tick(&mut registry.context(None))
            });
        }
    }

    /// The script bound to `amx`.
    pub fn script(amx: AmxHandle) -> Result<Rc<P::Script>, BridgeError> {
        let registry = Self::current().ok_or(BridgeError::NotLoaded)?;
        let scripts = registry.scripts.borrow();
        scripts.iter().find(|script| *script.base() == amx).cloned().ok_or(BridgeError::ScriptNotFound)
    }

    /// Visits scripts in order until `visit` returns `Ok(false)`, which makes the
    /// result `false`. Errors from one script are logged and the walk continues.
    pub fn every_script(mut visit: impl FnMut(&Rc<P::Script>) -> Result<bool>) -> bool {
        let Some(registry) = Self::current() else {
            return true;
        };
        let scripts = registry.scripts.borrow().clone();
        for script in &scripts {
            if registry.contain("every_script", || visit(script)) == Some(false) {
                return false;
            }
        }
        true
    }

    pub fn native_name(func: AmxNative) -> String {
        const UNKNOWN: &str = "(unknown native)";
        let Some(registry) = Self::current() else {
            return UNKNOWN.to_string();
        };
        let natives = match registry.natives.try_borrow() {
            Ok(natives) => natives,
            Err(_) => return UNKNOWN.to_string(),
        };
        natives.name_of(func).unwrap_or(UNKNOWN).to_string()
    }

    /// Logs through the plugin's sink, or stderr when no plugin is loaded.
    pub fn log(message: impl AsRef<str>) {
        match Self::current() {
            Some(registry) => registry.log_line(message),
            None => Logger::stderr().log(message),
        }
    }

    /// Runs `f` with the plugin value. Fails while a hook already holds it.
    pub fn with_plugin<R>(f: impl FnOnce(&mut P) -> R) -> Result<R, BridgeError> {
        let registry = Self::current().ok_or(BridgeError::NotLoaded)?;
        let mut plugin = registry.plugin.try_borrow_mut().map_err(|_| BridgeError::PluginBusy)?;
        Ok(f(&mut plugin))
    }

    pub fn state() -> PluginState {
        Self::current().map_or(PluginState::Unloaded, |registry| registry.state.get())
    }

    pub fn script_count() -> usize {
        Self::current().map_or(0, |registry| registry.scripts.borrow().len())
    }

    /// Handles of the active scripts in iteration order.
    pub fn handles() -> Vec<AmxHandle> {
        Self::current()
            .map(|registry| registry.scripts.borrow().iter().map(|script| script.base().handle()).collect())
            .unwrap_or_default()
    }

    /// Public variable value the plugin version is compared against, if the script declares one.
    pub fn declared_version(script: &P::Script) -> Result<Option<Cell>, BridgeError> {
        script.base().declared_var(<P::Script as Script>::VERSION_VAR)
    }

    fn current() -> Option<Rc<Self>> {
        let any = REGISTRY.with(|slot| slot.borrow().clone())?;
        any.downcast::<Self>().ok()
    }

    /// Creates the plugin value and everything derived from its hooks before
    /// the registry becomes visible.
    fn prepare(sink: LogSink, table: ExportTable) -> Rc<Self> {
        let plugin = P::default();
        let name = plugin.name();
        let mut config_error = None;
        let config = match plugin.config_path().map(BridgeConfig::load).transpose() {
            Ok(config) => config.flatten().unwrap_or_default(),
            Err(err) => {
                config_error = Some(err);
                BridgeConfig::default()
            }
        };
        let logger = if config.prefix_log_lines { Logger::new(sink, name) } else { Logger::unprefixed(sink) };
        if let Some(err) = config_error {
            logger.log(format!("load: {err:#}"));
        }

        let version = plugin.version();
        Rc::new(Self {
            plugin: RefCell::new(plugin),
            state: Slot::new(PluginState::Loading),
            logger,
            config,
            table,
            version,
            log_amx_errors: Slot::new(true),
            natives: RefCell::new(NativeTable::default()),
            scripts: RefCell::new(Vec::new()),
        })
    }

    fn install(registry: Option<Rc<Self>>) {
        let registry = registry.map(|registry| registry as Rc<dyn Any>);
        let previous = REGISTRY.with(|slot| slot.replace(registry));
        drop(previous);
    }

    fn context<'a>(&'a self, natives: Option<&'a mut NativeTable<P>>) -> PluginContext<'a, P> {
        PluginContext { natives, logger: &self.logger, version: self.version }
    }

    fn log_line(&self, message: impl AsRef<str>) {
        self.logger.log(message);
    }

    fn admit(&self, amx: AmxHandle) -> Result<()> {
        let exports = Rc::new(Exports::new(amx, self.table, self.log_amx_errors.get(), self.logger.clone()));
        let script = P::Script::new(ScriptBase::new(exports, <P::Script as Script>::GAMEMODE_VAR));

        if let Some(include) = Self::declared_version(&script)? {
            if include != self.version {
                return Err(BridgeError::VersionMismatch {
                    plugin: version_string(self.version),
                    include: version_string(include),
                }
                .into());
            }
        }

        let natives: Vec<_> = self.natives.borrow().entries().cloned().collect();
        for native in &natives {
            let _ = script.base().register_native(native.name(), native.func());
        }

        if !script.on_load()? {
            return Ok(());
        }

        let is_gamemode = script.base().is_gamemode();
        let mut scripts = self.scripts.borrow_mut();
        let gamemode_exists = scripts.iter().any(|script| script.base().is_gamemode());
        let script = Rc::new(script);
        if is_gamemode {
            scripts.push(script);
            if gamemode_exists {
                return Err(anyhow!(DUPLICATE_GAMEMODE_WARNING));
            }
        } else if gamemode_exists {
            let last = scripts.len() - 1;
            scripts.insert(last, script);
        } else {
            scripts.push(script);
        }
        Ok(())
    }

    /// Runs a hook body, turning errors and panics into one `<boundary>: <message>` line.
    fn contain<T>(&self, boundary: &str, body: impl FnOnce() -> Result<T>) -> Option<T> {
        let message = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => panic_message(payload.as_ref()),
        };
        self.log_line(format!("{boundary}: {message}"));
        None
    }
}

/// Emits the host entry points (`Supports`, `Load`, `Unload`, `AmxLoad`, `AmxUnload`,
/// `ProcessTick`) for a plugin type.
#[macro_export]
macro_rules! export_plugin {
    ($plugin:ty) => {
        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "system" fn Supports() -> ::std::ffi::c_uint {
            $crate::plugin::Registry::<$plugin>::supports().bits()
        }

        /// # Safety
        /// Called by the host with its plugin data table.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn Load(data: *mut *mut ::std::ffi::c_void) -> bool {
            let data = $crate::plugin::PluginData::from_raw(data as *const *const ::std::ffi::c_void);
            $crate::plugin::Registry::<$plugin>::load(data)
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "system" fn Unload() {
            $crate::plugin::Registry::<$plugin>::unload();
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "system" fn AmxLoad(amx: *mut $crate::ffi::RawAmx) -> ::std::ffi::c_int {
            $crate::plugin::Registry::<$plugin>::amx_load($crate::ffi::AmxHandle::from_raw(amx));
            $crate::ffi::AMX_ERR_NONE
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "system" fn AmxUnload(amx: *mut $crate::ffi::RawAmx) -> ::std::ffi::c_int {
            $crate::plugin::Registry::<$plugin>::amx_unload($crate::ffi::AmxHandle::from_raw(amx));
            $crate::ffi::AMX_ERR_NONE
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "system" fn ProcessTick() {
            $crate::plugin::Registry::<$plugin>::process_tick();
        }
    };
}
