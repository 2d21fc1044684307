//! Luau runtime of one render context: sandboxed, memory-limited, with a deadline interrupt.
//!
//! Scripts see a `dom` table of read-only accessors keyed by element index, `alert`, `print`,
//! `console`, and `set_timeout`/`clear_timeout`. Deferred callbacks live in a Lua-side table
//! and are drained by the host on every frame tick and after every handler.

use crate::dom::DomIndex;
use a11ylab_markup::{accname, selector, selector_for};
use mlua::{Function, IntoLua, Lua, MultiValue, Table, Value, VmState};
use scraper::ElementRef;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const BLOCKED_GLOBALS: &[&str] = &[
    "io", "os", "file", "require", "loadfile", "dofile", "coroutine", "debug",
];

pub(crate) const BUDGET_EXCEEDED: &str = "script exceeded its time budget";

/// Longest `dom.html` excerpt handed to scripts.
const HTML_EXCERPT_CHARS: usize = 250;

const PRELUDE: &str = r#"
local timers = {}
local next_timer = 0

function set_timeout(callback, delay)
  if type(callback) ~= "function" then
    error("set_timeout expects a function", 2)
  end
  next_timer = next_timer + 1
  timers[next_timer] = { due = __now() + (tonumber(delay) or 0), callback = callback }
  return next_timer
end

function clear_timeout(id)
  timers[id] = nil
end

function __pending_timers()
  local count = 0
  for _ in pairs(timers) do
    count = count + 1
  end
  return count
end

function __run_due_timers()
  local now = __now()
  local due = {}
  for id, timer in pairs(timers) do
    if timer.due <= now then
      table.insert(due, id)
    end
  end
  table.sort(due)
  local failures = {}
  for _, id in ipairs(due) do
    local timer = timers[id]
    timers[id] = nil
    if timer then
      local ok, err = pcall(timer.callback)
      if not ok then
        table.insert(failures, tostring(err))
      end
    end
  end
  return failures
end
"#;

pub(crate) struct Sandbox {
    lua: Lua,
    deadline: Rc<Cell<Option<Instant>>>,
    dialogs: Rc<RefCell<Vec<String>>>,
}

impl Sandbox {
    pub fn new(dom: Rc<DomIndex>, memory_limit: usize) -> mlua::Result<Self> {
        let lua = Lua::new();
        lua.sandbox(true)?;
        let globals = lua.globals();

        for name in BLOCKED_GLOBALS {
            let message = format!("{} is not available in preview scripts", name);
            globals.set(
                *name,
                lua.create_function(move |_, _: MultiValue| {
                    Err::<(), _>(mlua::Error::RuntimeError(message.clone()))
                })?,
            )?;
        }
        lua.set_memory_limit(memory_limit)?;

        let deadline = Rc::new(Cell::new(None::<Instant>));
        let limit = Rc::clone(&deadline);
        lua.set_interrupt(move |_| match limit.get() {
            Some(at) if Instant::now() >= at => {
                Err(mlua::Error::RuntimeError(BUDGET_EXCEEDED.to_string()))
            }
            _ => Ok(VmState::Continue),
        });

        let dialogs = Rc::new(RefCell::new(Vec::new()));
        register_host(&lua, &globals, Rc::clone(&dialogs))?;
        register_dom(&lua, &globals, dom)?;
        lua.load(PRELUDE).set_name("=prelude").exec()?;

        Ok(Self {
            lua,
            deadline,
            dialogs,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Runs `run` with the interrupt armed to fail once `deadline` passes.
    pub fn with_deadline<R>(
        &self,
        deadline: Instant,
        run: impl FnOnce(&Lua) -> mlua::Result<R>,
    ) -> mlua::Result<R> {
        self.deadline.set(Some(deadline));
        let result = run(&self.lua);
        self.deadline.set(None);
        result
    }

    pub fn with_budget<R>(
        &self,
        budget: Duration,
        run: impl FnOnce(&Lua) -> mlua::Result<R>,
    ) -> mlua::Result<R> {
        self.with_deadline(Instant::now() + budget, run)
    }

    pub fn exec(&self, source: &str, chunk: &str, budget: Duration) -> mlua::Result<()> {
        self.with_budget(budget, |lua| lua.load(source).set_name(chunk).exec())
    }

    /// Exposes the event being dispatched as the `event` global.
    pub fn set_event(&self, kind: &str, target: Option<usize>) -> mlua::Result<()> {
        let event = self.lua.create_table()?;
        event.set("type", kind)?;
        event.set("target", target)?;
        self.lua.globals().set("event", event)
    }

    /// Runs every deferred callback whose delay has elapsed; returns the messages of those
    /// that raised.
    pub fn run_due_timers(&self, budget: Duration) -> mlua::Result<Vec<String>> {
        self.with_budget(budget, |lua| {
            let run: Function = lua.globals().get("__run_due_timers")?;
            run.call::<Vec<String>>(())
        })
    }

    pub fn pending_timers(&self) -> usize {
        self.lua
            .globals()
            .get::<Function>("__pending_timers")
            .and_then(|f| f.call::<usize>(()))
            .unwrap_or(0)
    }

    pub fn take_dialogs(&self) -> Vec<String> {
        std::mem::take(&mut *self.dialogs.borrow_mut())
    }
}

fn display(values: &MultiValue) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.to_string_lossy().to_string(),
            other => other.type_name().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn register_host(lua: &Lua, globals: &Table, dialogs: Rc<RefCell<Vec<String>>>) -> mlua::Result<()> {
    let started = Instant::now();
    globals.set(
        "__now",
        lua.create_function(move |_, ()| Ok(started.elapsed().as_secs_f64() * 1000.0))?,
    )?;

    globals.set(
        "alert",
        lua.create_function(move |_, values: MultiValue| {
            let message = display(&values);
            info!(target: "a11ylab::console", dialog = %message, "alert");
            dialogs.borrow_mut().push(message);
            Ok(())
        })?,
    )?;

    globals.set(
        "print",
        lua.create_function(|_, values: MultiValue| {
            debug!(target: "a11ylab::console", "{}", self::display(&values));
            Ok(())
        })?,
    )?;

    let console = lua.create_table()?;
    console.set(
        "log",
        lua.create_function(|_, values: MultiValue| {
            debug!(target: "a11ylab::console", "{}", self::display(&values));
            Ok(())
        })?,
    )?;
    console.set(
        "warn",
        lua.create_function(|_, values: MultiValue| {
            warn!(target: "a11ylab::console", "{}", self::display(&values));
            Ok(())
        })?,
    )?;
    console.set(
        "error",
        lua.create_function(|_, values: MultiValue| {
            warn!(target: "a11ylab::console", level = "error", "{}", self::display(&values));
            Ok(())
        })?,
    )?;
    globals.set("console", console)
}

fn query(dom: &DomIndex, pattern: &str) -> mlua::Result<Vec<usize>> {
    let parsed =
        selector::parse(pattern).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
    Ok(dom
        .html
        .select(&parsed)
        .filter_map(|e| dom.index_of(e.id()))
        .collect())
}

/// Registers `dom.<name>(index)`, returning nil for unknown indexes.
fn accessor<R, F>(lua: &Lua, api: &Table, name: &str, dom: &Rc<DomIndex>, read: F) -> mlua::Result<()>
where
    R: IntoLua + 'static,
    F: Fn(&DomIndex, ElementRef<'_>) -> R + 'static,
{
    let dom = Rc::clone(dom);
    api.set(
        name,
        lua.create_function(move |_, index: usize| {
            Ok(dom.element(index).map(|element| read(&dom, element)))
        })?,
    )
}

fn register_dom(lua: &Lua, globals: &Table, dom: Rc<DomIndex>) -> mlua::Result<()> {
    let api = lua.create_table()?;

    let d = Rc::clone(&dom);
    api.set(
        "all",
        lua.create_function(move |_, ()| Ok((0..d.len()).collect::<Vec<usize>>()))?,
    )?;

    let d = Rc::clone(&dom);
    api.set(
        "query_all",
        lua.create_function(move |_, pattern: String| query(&d, &pattern))?,
    )?;

    let d = Rc::clone(&dom);
    api.set(
        "query",
        lua.create_function(move |_, pattern: String| {
            Ok(query(&d, &pattern)?.into_iter().next())
        })?,
    )?;

    let d = Rc::clone(&dom);
    api.set(
        "by_id",
        lua.create_function(move |_, id: String| {
            Ok(accname::element_by_id(&d.html, &id).and_then(|e| d.index_of(e.id())))
        })?,
    )?;

    let d = Rc::clone(&dom);
    api.set(
        "attr",
        lua.create_function(move |_, (index, name): (usize, String)| {
            Ok(d.element(index)
                .and_then(|e| e.value().attr(&name).map(str::to_string)))
        })?,
    )?;

    accessor(lua, &api, "tag", &dom, |_, e| e.value().name().to_string())?;
    accessor(lua, &api, "attributes", &dom, |_, e| {
        e.value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<String, String>>()
    })?;
    accessor(lua, &api, "text", &dom, |_, e| accname::text_content(e, None))?;
    accessor(lua, &api, "html", &dom, |_, e| {
        e.html().chars().take(HTML_EXCERPT_CHARS).collect::<String>()
    })?;
    accessor(lua, &api, "selector", &dom, |d, e| selector_for(&d.html, e))?;
    accessor(lua, &api, "name", &dom, |d, e| accname::accessible_name(&d.html, e))?;
    accessor(lua, &api, "description", &dom, |d, e| {
        accname::accessible_description(&d.html, e)
    })?;
    accessor(lua, &api, "role", &dom, |_, e| accname::role(e))?;
    accessor(lua, &api, "explicit_role", &dom, |_, e| accname::explicit_role(e))?;
    accessor(lua, &api, "focusable", &dom, |_, e| accname::is_focusable(e))?;
    accessor(lua, &api, "interactive", &dom, |_, e| {
        accname::is_native_interactive(e)
    })?;
    accessor(lua, &api, "parent", &dom, |d, e| {
        e.parent()
            .and_then(ElementRef::wrap)
            .and_then(|p| d.index_of(p.id()))
    })?;

    globals.set("dom", api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn sandbox(body: &str) -> Sandbox {
        let page = format!("<html lang=\"en\"><head><title>t</title></head><body>{}</body></html>", body);
        let dom = Rc::new(DomIndex::new(Html::parse_document(&page)));
        Sandbox::new(dom, 4 * 1024 * 1024).unwrap()
    }

    const BUDGET: Duration = Duration::from_millis(200);

    #[test]
    fn test_dom_accessors_read_the_document() {
        let sandbox = sandbox(r#"<button id="go" aria-label="Start">›</button>"#);
        sandbox
            .exec(
                r##"
                local button = dom.by_id("go")
                assert(dom.tag(button) == "button")
                assert(dom.name(button) == "Start")
                assert(dom.role(button) == "button")
                assert(dom.focusable(button))
                assert(dom.selector(button) == "#go")
                assert(dom.tag(dom.parent(button)) == "body")
                assert(dom.attr(button, "missing") == nil)
                assert(#dom.query_all("button") == 1)
                "##,
                "=test",
                BUDGET,
            )
            .unwrap();
    }

    #[test]
    fn test_blocked_globals_raise() {
        let sandbox = sandbox("");
        let err = sandbox.exec("require('x')", "=test", BUDGET).unwrap_err();
        assert!(err.to_string().contains("require is not available"));
        assert!(sandbox.exec("os.exit()", "=test", BUDGET).is_err());
    }

    #[test]
    fn test_runaway_script_hits_the_deadline() {
        let sandbox = sandbox("");
        let started = Instant::now();
        let err = sandbox
            .exec("while true do end", "=test", Duration::from_millis(50))
            .unwrap_err();
        assert!(err.to_string().contains(BUDGET_EXCEEDED));
        assert!(started.elapsed() < Duration::from_secs(5));
        // The interrupt is disarmed afterwards.
        sandbox.exec("local x = 1", "=test", BUDGET).unwrap();
    }

    #[test]
    fn test_due_timers_run_and_report_failures() {
        let sandbox = sandbox("");
        sandbox
            .exec(
                r#"
                set_timeout(function() alert("later") end, 0)
                set_timeout(function() error("deferred boom") end, 0)
                set_timeout(function() alert("never") end, 60000)
                "#,
                "=test",
                BUDGET,
            )
            .unwrap();
        let failures = sandbox.run_due_timers(BUDGET).unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("deferred boom"));
        assert_eq!(sandbox.take_dialogs(), vec!["later".to_string()]);
        assert_eq!(sandbox.pending_timers(), 1);
    }
}
