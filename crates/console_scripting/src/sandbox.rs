use anyhow::Result;
use mlua::{Function, Lua, LuaSerdeExt, Table, Value};
use std::collections::HashMap;

/// Sandboxed Lua state for game scripts.
///
/// Engine scripts (boot/engine, names starting with `_`) evaluate directly
/// into the shared whitelisted base environment, so the globals they define
/// are visible to every game script. Each game script gets its own
/// environment whose `__index` points at the base; the environment of the
/// current script is swapped only after a successful evaluation, so a
/// failed reload keeps the last good state running.
pub struct LuaSandbox {
    lua: Lua,
}

impl LuaSandbox {
    pub fn new() -> Result<Self> {
        let lua = Lua::new();
        let sandbox = Self { lua };
        sandbox.setup_safe_environment()?;
        Ok(sandbox)
    }

    fn setup_safe_environment(&self) -> Result<()> {
        let globals = self.lua.globals();

        // Whitelisted base environment.
        let safe = self
            .lua
            .create_table()
            .map_err(|e| anyhow::anyhow!("create_table failed: {e}"))?;
        for name in [
            "assert", "pairs", "ipairs", "next", "tonumber", "tostring", "type", "select",
            "error", "pcall",
        ] {
            if let Ok(v) = globals.get::<Value>(name) {
                safe.set(name, v)
                    .map_err(|e| anyhow::anyhow!("safe.set {name} failed: {e}"))?;
            }
        }
        for lib in ["math", "table", "string", "utf8"] {
            if let Ok(v) = globals.get::<Value>(lib) {
                safe.set(lib, v)
                    .map_err(|e| anyhow::anyhow!("safe.set {lib} failed: {e}"))?;
            }
        }

        // Lock the package system: no module loading inside the sandbox.
        let package = self
            .lua
            .create_table()
            .map_err(|e| anyhow::anyhow!("create package failed: {e}"))?;
        package
            .set("path", "")
            .and_then(|_| package.set("cpath", ""))
            .map_err(|e| anyhow::anyhow!("package lock failed: {e}"))?;
        globals
            .set("package", package)
            .map_err(|e| anyhow::anyhow!("set package failed: {e}"))?;
        let require = self
            .lua
            .create_function(|_, module: String| -> mlua::Result<()> {
                Err(mlua::Error::RuntimeError(format!(
                    "module loading disabled in sandbox: {module}"
                )))
            })
            .map_err(|e| anyhow::anyhow!("create require failed: {e}"))?;
        globals
            .set("require", require)
            .map_err(|e| anyhow::anyhow!("set require failed: {e}"))?;

        self.lua
            .set_named_registry_value("safe_base", safe)
            .map_err(|e| anyhow::anyhow!("store safe_base failed: {e}"))?;
        Ok(())
    }

    fn safe_base(&self) -> Result<Table> {
        self.lua
            .named_registry_value("safe_base")
            .map_err(|e| anyhow::anyhow!("get safe_base failed: {e}"))
    }

    /// Expose a host-built table (the console API) to every script.
    pub fn install_global(&self, name: &str, table: Table) -> Result<()> {
        self.safe_base()?
            .set(name, table)
            .map_err(|e| anyhow::anyhow!("install {name} failed: {e}"))
    }

    pub fn install_function(&self, name: &str, func: Function) -> Result<()> {
        self.safe_base()?
            .set(name, func)
            .map_err(|e| anyhow::anyhow!("install {name} failed: {e}"))
    }

    /// Evaluate an engine-owned script straight into the base environment.
    pub fn load_engine_script(&self, source: &str, name: &str) -> Result<()> {
        let safe = self.safe_base()?;
        let chunk = self.lua.load(source).set_name(name).set_environment(safe);
        chunk.exec().map_err(|e| anyhow::anyhow!("{e}"))
    }

    fn build_env(&self) -> Result<Table> {
        let safe = self.safe_base()?;
        let env = self
            .lua
            .create_table()
            .map_err(|e| anyhow::anyhow!("create env failed: {e}"))?;
        let mt = self
            .lua
            .create_table()
            .map_err(|e| anyhow::anyhow!("create env mt failed: {e}"))?;
        mt.set("__index", safe)
            .map_err(|e| anyhow::anyhow!("set __index failed: {e}"))?;
        env.set_metatable(Some(mt));
        Ok(env)
    }

    /// Evaluate a game script in a fresh environment. The environment is
    /// registered under the script's name and becomes current only if
    /// `make_current` is set and evaluation succeeded.
    pub fn load_game_script(&self, source: &str, name: &str, make_current: bool) -> Result<()> {
        let env = self.build_env()?;
        let chunk = self
            .lua
            .load(source)
            .set_name(name)
            .set_environment(env.clone());
        chunk.exec().map_err(|e| anyhow::anyhow!("{e}"))?;

        self.lua
            .set_named_registry_value(&format!("env:{name}"), env.clone())
            .map_err(|e| anyhow::anyhow!("register env failed: {e}"))?;
        if make_current {
            self.lua
                .set_named_registry_value("current_env", env)
                .map_err(|e| anyhow::anyhow!("set current_env failed: {e}"))?;
        }
        Ok(())
    }

    /// Promote a previously evaluated script's environment to current.
    pub fn make_current(&self, name: &str) -> Result<()> {
        let env: Table = self
            .lua
            .named_registry_value(&format!("env:{name}"))
            .map_err(|e| anyhow::anyhow!("no environment for '{name}': {e}"))?;
        self.lua
            .set_named_registry_value("current_env", env)
            .map_err(|e| anyhow::anyhow!("set current_env failed: {e}"))
    }

    pub fn has_current(&self) -> bool {
        self.lua.named_registry_value::<Table>("current_env").is_ok()
    }

    fn current_env(&self) -> Result<Table> {
        self.lua
            .named_registry_value("current_env")
            .map_err(|e| anyhow::anyhow!("no current script environment: {e}"))
    }

    /// Call a lifecycle function on the current script if it defines one.
    pub fn call_if_present<A>(&self, func_name: &str, args: A) -> Result<()>
    where
        A: mlua::IntoLuaMulti,
    {
        let env = self.current_env()?;
        let Ok(func) = env.get::<Function>(func_name) else {
            return Ok(());
        };
        func.call::<()>(args).map_err(|e| anyhow::anyhow!("{e}"))
    }

    /// Serializable key/value snapshot of the current script's globals.
    /// Functions, userdata and other non-data values are skipped.
    pub fn snapshot_globals(&self) -> HashMap<String, serde_json::Value> {
        let mut snapshot = HashMap::new();
        let Ok(env) = self.current_env() else {
            return snapshot;
        };
        for pair in env.pairs::<Value, Value>() {
            let Ok((key, value)) = pair else { continue };
            let Value::String(key) = key else { continue };
            let Ok(key) = key.to_str() else { continue };
            match value {
                Value::Nil | Value::Function(_) | Value::Thread(_) | Value::UserData(_) => continue,
                other => {
                    if let Ok(json) = self.lua.from_value::<serde_json::Value>(other) {
                        snapshot.insert(key.to_string(), json);
                    }
                }
            }
        }
        snapshot
    }

    /// Write snapshot values back into the current script's globals.
    pub fn restore_globals(&self, snapshot: &HashMap<String, serde_json::Value>) {
        let Ok(env) = self.current_env() else { return };
        for (key, value) in snapshot {
            match self.lua.to_value(value) {
                Ok(v) => {
                    if let Err(e) = env.set(key.as_str(), v) {
                        tracing::warn!("restore of '{key}' failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("restore of '{key}' failed: {e}"),
            }
        }
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn memory_usage_mb(&self) -> f64 {
        self.lua.used_memory() as f64 / 1024.0 / 1024.0
    }
}
