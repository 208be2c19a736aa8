use amx_bridge::{
    export_plugin, pack_version, Cell, CellRef, FloatRef, Params, Plugin, PluginContext, Public, Registry, Script,
    ScriptBase,
};
use anyhow::{bail, Result};
use std::cell::Cell as Counter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

struct ExampleScript {
    base: ScriptBase,
    on_greeted: Rc<Public>,
    greetings: Counter<u32>,
}

impl Script for ExampleScript {
    const VERSION_VAR: Option<&'static str> = Some("_example_version");
    const GAMEMODE_VAR: Option<&'static str> = Some("_example_is_gamemode");

    fn new(base: ScriptBase) -> Self {
        let on_greeted = base.make_public("OnGreeted", true);
        Self { base, on_greeted, greetings: Counter::new(0) }
    }

    fn base(&self) -> &ScriptBase {
        &self.base
    }
}

impl ExampleScript {
    fn greet(&self, name: String, out: CellRef, size: Cell) -> Result<Cell> {
        let greeting = format!("Hello, {name}!");
        self.base.set_string(out, &greeting, size.max(0) as usize)?;
        self.greetings.set(self.greetings.get() + 1);
        if self.on_greeted.exists() {
            self.on_greeted.exec((name.as_str(), self.greetings.get()))?;
        }
        Ok(greeting.len() as Cell)
    }
}

#[derive(Default)]
struct ExamplePlugin {
    tags: HashMap<String, Cell>,
}

impl Plugin for ExamplePlugin {
    type Script = ExampleScript;

    fn name(&self) -> &'static str {
        "Example"
    }

    fn version(&self) -> i32 {
        pack_version(1, 0, 0)
    }

    fn config_path(&self) -> Option<PathBuf> {
        Some(PathBuf::from("plugins/example.json"))
    }

    fn on_load(&mut self, ctx: &mut PluginContext<'_, Self>) -> Result<bool> {
        ctx.register_native("Example_Greet", ExampleScript::greet)?;
        ctx.register_native("Example_Lerp", lerp)?;
        ctx.register_native("Example_SetTag", set_tag)?;
        ctx.register_native("Example_GetTag", get_tag)?;
        ctx.register_raw_native("Example_Max", max)?;
        ctx.log(format!("plugin v{} loaded", ctx.version_string()));
        Ok(true)
    }
}

fn lerp(_script: &ExampleScript, from: f32, to: f32, t: f32, out: FloatRef) -> Result<Cell> {
    out.set(from + (to - from) * t.clamp(0.0, 1.0));
    Ok(1)
}

fn set_tag(_script: &ExampleScript, key: String, value: Cell) -> Result<Cell> {
    if key.is_empty() {
        bail!("tag name must not be empty");
    }
    Registry::<ExamplePlugin>::with_plugin(|plugin| plugin.tags.insert(key, value))?;
    Ok(1)
}

fn get_tag(_script: &ExampleScript, key: String) -> Result<Cell> {
    let value = Registry::<ExamplePlugin>::with_plugin(|plugin| plugin.tags.get(&key).copied())?;
    Ok(value.unwrap_or(0))
}

fn max(script: &ExampleScript, params: Params<'_>) -> Result<Cell> {
    script.base().assert_min_params(1, &params)?;
    Ok(params.values().iter().copied().max().unwrap_or(0))
}

export_plugin!(ExamplePlugin);
