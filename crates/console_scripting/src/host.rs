use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use console_core::engine::{ScriptHost, ScriptSnapshot, VirtualConsole};
use console_core::error::ConsoleError;
use console_core::input::InputState;

use crate::api::{setup_console_api, ConsoleHandles};
use crate::sandbox::LuaSandbox;

/// Lifecycle callbacks a game script may define.
const INIT_FN: &str = "_init";
const UPDATE_FN: &str = "_update";
const DRAW_FN: &str = "_draw";

/// Lua-backed [`ScriptHost`]: owns the sandbox, wires the console API into
/// it, and adapts lifecycle calls and reload snapshots.
pub struct LuaHost {
    sandbox: LuaSandbox,
    sources: HashMap<String, String>,
    current: Option<String>,
    exit_request: Rc<RefCell<Option<usize>>>,
}

impl LuaHost {
    pub fn new(
        console: Rc<RefCell<VirtualConsole>>,
        input: Rc<RefCell<InputState>>,
    ) -> anyhow::Result<Self> {
        let sandbox = LuaSandbox::new()?;
        let exit_request = Rc::new(RefCell::new(None));
        let handles = ConsoleHandles {
            console,
            input,
            exit_request: exit_request.clone(),
        };
        setup_console_api(&sandbox, &handles)?;
        Ok(Self {
            sandbox,
            sources: HashMap::new(),
            current: None,
            exit_request,
        })
    }

    pub fn sandbox(&self) -> &LuaSandbox {
        &self.sandbox
    }

    fn script_error(&self, name: &str, error: &anyhow::Error) -> ConsoleError {
        let source = self.sources.get(name).map(String::as_str).unwrap_or("");
        ConsoleError::from_script_failure(name, source, &error.to_string())
    }

    fn call(&mut self, func: &str, args: impl mlua::IntoLuaMulti) -> Result<(), ConsoleError> {
        if !self.sandbox.has_current() {
            return Ok(());
        }
        let name = self.current.clone().unwrap_or_default();
        self.sandbox
            .call_if_present(func, args)
            .map_err(|e| self.script_error(&name, &e))
    }
}

impl ScriptHost for LuaHost {
    fn eval(&mut self, name: &str, source: &str) -> Result<(), ConsoleError> {
        self.sources.insert(name.to_string(), source.to_string());
        let result = if name.starts_with('_') {
            // Engine-owned script: globals land in the shared base env.
            self.sandbox.load_engine_script(source, name)
        } else {
            // First game script evaluated becomes current; re-evaluating
            // the current script (reload) swaps its environment in place.
            let make_current =
                self.current.is_none() || self.current.as_deref() == Some(name);
            let result = self.sandbox.load_game_script(source, name, make_current);
            if result.is_ok() && make_current {
                self.current = Some(name.to_string());
            }
            result
        };
        result.map_err(|e| self.script_error(name, &e))
    }

    fn set_current(&mut self, name: &str) {
        self.current = Some(name.to_string());
        if let Err(e) = self.sandbox.make_current(name) {
            // The script may not be evaluated yet; eval() will promote it.
            tracing::debug!("set_current deferred: {e}");
        }
    }

    fn call_init(&mut self) -> Result<(), ConsoleError> {
        self.call(INIT_FN, ())
    }

    fn call_update(&mut self, dt: f64) -> Result<(), ConsoleError> {
        self.call(UPDATE_FN, dt)
    }

    fn call_draw(&mut self) -> Result<(), ConsoleError> {
        self.call(DRAW_FN, ())
    }

    fn snapshot(&mut self) -> ScriptSnapshot {
        self.sandbox.snapshot_globals()
    }

    fn restore(&mut self, snapshot: &ScriptSnapshot) {
        self.sandbox.restore_globals(snapshot);
    }

    fn exited(&mut self) -> Option<usize> {
        self.exit_request.borrow_mut().take()
    }
}
