use anyhow::Result;
use mlua::{Lua, Table, Variadic};
use std::cell::RefCell;
use std::rc::Rc;

use console_core::batch::{DrawingMode, SpriteQuad};
use console_core::engine::VirtualConsole;
use console_core::input::InputState;

use crate::sandbox::LuaSandbox;

/// Handle bundle the bindings close over. Everything lives on the single
/// game thread, so plain `Rc<RefCell<_>>` sharing is enough.
#[derive(Clone)]
pub struct ConsoleHandles {
    pub console: Rc<RefCell<VirtualConsole>>,
    pub input: Rc<RefCell<InputState>>,
    pub exit_request: Rc<RefCell<Option<usize>>>,
}

/// Install the console API into the sandbox's base environment: `gfx`,
/// `shape`, `spr`, `map`, `sfx`, `ctrl`, `keys`, and the global helpers
/// `print`, `exit`, `t`, `rnd`.
///
/// This layer is a thin adapter: every function translates a dynamic Lua
/// call into one typed call on [`VirtualConsole`] and returns.
pub fn setup_console_api(sandbox: &LuaSandbox, handles: &ConsoleHandles) -> Result<()> {
    let lua = sandbox.lua();
    sandbox.install_global("gfx", gfx_table(lua, handles)?)?;
    sandbox.install_global("shape", shape_table(lua, handles)?)?;
    sandbox.install_global("spr", spr_table(lua, handles)?)?;
    sandbox.install_global("map", map_table(lua, handles)?)?;
    sandbox.install_global("sfx", sfx_table(lua, handles)?)?;
    sandbox.install_global("ctrl", ctrl_table(lua, handles)?)?;
    sandbox.install_global("keys", keys_table(lua)?)?;
    install_globals(sandbox, handles)?;
    Ok(())
}

fn err(e: mlua::Error) -> anyhow::Error {
    anyhow::anyhow!(e.to_string())
}

fn gfx_table(lua: &Lua, handles: &ConsoleHandles) -> Result<Table> {
    let gfx = lua.create_table().map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "cls",
        lua.create_function(move |_, color: Option<i64>| {
            console.borrow_mut().cls(color.unwrap_or(0) as u8);
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "pset",
        lua.create_function(move |_, (x, y, color): (i64, i64, i64)| {
            console.borrow_mut().pset(x as i32, y as i32, color as u8);
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "pget",
        lua.create_function(move |_, (x, y): (i64, i64)| {
            Ok(console.borrow().pget(x as i32, y as i32) as i64)
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    // pal(from, to) remaps one index; pal() resets the whole table.
    let console = handles.console.clone();
    gfx.set(
        "pal",
        lua.create_function(move |_, args: Variadic<i64>| {
            let mut c = console.borrow_mut();
            match (args.first(), args.get(1)) {
                (Some(&from), Some(&to)) => c.pal(from as u8, to as u8),
                _ => c.pal_reset(),
            }
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "dither",
        lua.create_function(move |_, pattern: Option<i64>| {
            console
                .borrow_mut()
                .dither(pattern.unwrap_or(0xFFFF) as u16);
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "camera",
        lua.create_function(move |_, (x, y): (Option<i64>, Option<i64>)| {
            console
                .borrow_mut()
                .camera(x.unwrap_or(0) as i32, y.unwrap_or(0) as i32);
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "clip",
        lua.create_function(move |_, args: Variadic<i64>| {
            let mut c = console.borrow_mut();
            if args.len() >= 4 {
                c.clip(
                    args[0] as i32,
                    args[1] as i32,
                    args[2] as i32,
                    args[3] as i32,
                );
            } else {
                c.clip_reset();
            }
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "mode",
        lua.create_function(move |_, name: String| {
            let mode = match name.as_str() {
                "default" => DrawingMode::Default,
                "alpha" => DrawingMode::AlphaBlend,
                "stencil_write" => DrawingMode::StencilWrite,
                "stencil_test" => DrawingMode::StencilTest,
                "stencil_not_test" => DrawingMode::StencilNotTest,
                other => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "unknown drawing mode '{other}'"
                    )))
                }
            };
            console.borrow_mut().set_mode(mode);
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "save",
        lua.create_function(move |_, ()| {
            console.borrow_mut().save_state();
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "restore",
        lua.create_function(move |_, ()| {
            console.borrow_mut().restore_state();
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let console = handles.console.clone();
    gfx.set(
        "reset",
        lua.create_function(move |_, ()| {
            console.borrow_mut().reset_state();
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    Ok(gfx)
}

fn shape_table(lua: &Lua, handles: &ConsoleHandles) -> Result<Table> {
    let shape = lua.create_table().map_err(err)?;

    let console = handles.console.clone();
    shape
        .set(
            "line",
            lua.create_function(
                move |_, (x0, y0, x1, y1, color): (i64, i64, i64, i64, i64)| {
                    console.borrow_mut().line(
                        x0 as i32,
                        y0 as i32,
                        x1 as i32,
                        y1 as i32,
                        color as u8,
                    );
                    Ok(())
                },
            )
            .map_err(err)?,
        )
        .map_err(err)?;

    let console = handles.console.clone();
    shape
        .set(
            "rect",
            lua.create_function(move |_, (x, y, w, h, color): (i64, i64, i64, i64, i64)| {
                console
                    .borrow_mut()
                    .rect(x as i32, y as i32, w as i32, h as i32, color as u8);
                Ok(())
            })
            .map_err(err)?,
        )
        .map_err(err)?;

    let console = handles.console.clone();
    shape
        .set(
            "rectf",
            lua.create_function(move |_, (x, y, w, h, color): (i64, i64, i64, i64, i64)| {
                console
                    .borrow_mut()
                    .rectf(x as i32, y as i32, w as i32, h as i32, color as u8);
                Ok(())
            })
            .map_err(err)?,
        )
        .map_err(err)?;

    let console = handles.console.clone();
    shape
        .set(
            "circle",
            lua.create_function(move |_, (cx, cy, r, color): (i64, i64, i64, i64)| {
                console
                    .borrow_mut()
                    .circ(cx as i32, cy as i32, r as i32, color as u8);
                Ok(())
            })
            .map_err(err)?,
        )
        .map_err(err)?;

    let console = handles.console.clone();
    shape
        .set(
            "circlef",
            lua.create_function(move |_, (cx, cy, r, color): (i64, i64, i64, i64)| {
                console
                    .borrow_mut()
                    .circf(cx as i32, cy as i32, r as i32, color as u8);
                Ok(())
            })
            .map_err(err)?,
        )
        .map_err(err)?;

    let console = handles.console.clone();
    shape
        .set(
            "oval",
            lua.create_function(move |_, (cx, cy, rx, ry, color): (i64, i64, i64, i64, i64)| {
                console
                    .borrow_mut()
                    .oval(cx as i32, cy as i32, rx as i32, ry as i32, color as u8);
                Ok(())
            })
            .map_err(err)?,
        )
        .map_err(err)?;

    let console = handles.console.clone();
    shape
        .set(
            "ovalf",
            lua.create_function(move |_, (cx, cy, rx, ry, color): (i64, i64, i64, i64, i64)| {
                console
                    .borrow_mut()
                    .ovalf(cx as i32, cy as i32, rx as i32, ry as i32, color as u8);
                Ok(())
            })
            .map_err(err)?,
        )
        .map_err(err)?;

    Ok(shape)
}

#[allow(clippy::type_complexity)]
fn spr_table(lua: &Lua, handles: &ConsoleHandles) -> Result<Table> {
    let spr = lua.create_table().map_err(err)?;

    let console = handles.console.clone();
    spr.set(
        "draw",
        lua.create_function(
            move |_,
                  (index, x, y, flip_x, flip_y, sheet): (
                i64,
                i64,
                i64,
                Option<bool>,
                Option<bool>,
                Option<i64>,
            )| {
                console.borrow_mut().spr(
                    sheet.unwrap_or(0) as usize,
                    index as i32,
                    x as i32,
                    y as i32,
                    flip_x.unwrap_or(false),
                    flip_y.unwrap_or(false),
                );
                Ok(())
            },
        )
        .map_err(err)?,
    )
    .map_err(err)?;

    // Arbitrary source rectangle blit.
    let console = handles.console.clone();
    spr.set(
        "sdraw",
        lua.create_function(
            move |_,
                  (dst_x, dst_y, src_x, src_y, w, h, flip_x, flip_y, sheet): (
                i64,
                i64,
                i64,
                i64,
                i64,
                i64,
                Option<bool>,
                Option<bool>,
                Option<i64>,
            )| {
                console.borrow_mut().draw_sprite(
                    sheet.unwrap_or(0) as usize,
                    SpriteQuad {
                        src_x: src_x as i32,
                        src_y: src_y as i32,
                        src_w: w as i32,
                        src_h: h as i32,
                        dst_x: dst_x as i32,
                        dst_y: dst_y as i32,
                        dst_w: w as i32,
                        dst_h: h as i32,
                        flip_x: flip_x.unwrap_or(false),
                        flip_y: flip_y.unwrap_or(false),
                    },
                );
                Ok(())
            },
        )
        .map_err(err)?,
    )
    .map_err(err)?;

    Ok(spr)
}

fn map_table(lua: &Lua, handles: &ConsoleHandles) -> Result<Table> {
    let map = lua.create_table().map_err(err)?;

    let console = handles.console.clone();
    map.set(
        "draw",
        lua.create_function(
            move |_,
                  (level, sheet, ox, oy): (
                Option<i64>,
                Option<i64>,
                Option<i64>,
                Option<i64>,
            )| {
                console.borrow_mut().draw_level(
                    level.unwrap_or(0) as usize,
                    sheet.unwrap_or(0) as usize,
                    ox.unwrap_or(0) as i32,
                    oy.unwrap_or(0) as i32,
                );
                Ok(())
            },
        )
        .map_err(err)?,
    )
    .map_err(err)?;

    Ok(map)
}

fn sfx_table(lua: &Lua, handles: &ConsoleHandles) -> Result<Table> {
    let sfx = lua.create_table().map_err(err)?;

    let console = handles.console.clone();
    sfx.set(
        "play",
        lua.create_function(move |_, (sound, bar): (Option<i64>, Option<i64>)| {
            console
                .borrow_mut()
                .sfx(sound.unwrap_or(0) as usize, bar.unwrap_or(0) as usize);
            Ok(())
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    Ok(sfx)
}

fn ctrl_table(lua: &Lua, handles: &ConsoleHandles) -> Result<Table> {
    let ctrl = lua.create_table().map_err(err)?;

    let input = handles.input.clone();
    ctrl.set(
        "down",
        lua.create_function(move |_, key: u32| Ok(input.borrow().key_down(key)))
            .map_err(err)?,
    )
    .map_err(err)?;

    let input = handles.input.clone();
    ctrl.set(
        "pressed",
        lua.create_function(move |_, key: u32| Ok(input.borrow().key_pressed(key)))
            .map_err(err)?,
    )
    .map_err(err)?;

    let input = handles.input.clone();
    ctrl.set(
        "released",
        lua.create_function(move |_, key: u32| Ok(input.borrow().key_released(key)))
            .map_err(err)?,
    )
    .map_err(err)?;

    let input = handles.input.clone();
    ctrl.set(
        "mouse",
        lua.create_function(move |_, ()| {
            let i = input.borrow();
            Ok((i.mouse_x, i.mouse_y))
        })
        .map_err(err)?,
    )
    .map_err(err)?;

    let input = handles.input.clone();
    ctrl.set(
        "mdown",
        lua.create_function(move |_, button: u8| Ok(input.borrow().mouse_down(button)))
            .map_err(err)?,
    )
    .map_err(err)?;

    let input = handles.input.clone();
    ctrl.set(
        "mpressed",
        lua.create_function(move |_, button: u8| Ok(input.borrow().mouse_pressed(button)))
            .map_err(err)?,
    )
    .map_err(err)?;

    Ok(ctrl)
}

fn keys_table(lua: &Lua) -> Result<Table> {
    use winit::keyboard::KeyCode;
    let keys = lua.create_table().map_err(err)?;
    let entries: &[(&str, KeyCode)] = &[
        ("up", KeyCode::ArrowUp),
        ("down", KeyCode::ArrowDown),
        ("left", KeyCode::ArrowLeft),
        ("right", KeyCode::ArrowRight),
        ("space", KeyCode::Space),
        ("enter", KeyCode::Enter),
        ("escape", KeyCode::Escape),
        ("tab", KeyCode::Tab),
        ("shift", KeyCode::ShiftLeft),
        ("ctrl", KeyCode::ControlLeft),
        ("a", KeyCode::KeyA),
        ("b", KeyCode::KeyB),
        ("c", KeyCode::KeyC),
        ("d", KeyCode::KeyD),
        ("e", KeyCode::KeyE),
        ("f", KeyCode::KeyF),
        ("g", KeyCode::KeyG),
        ("h", KeyCode::KeyH),
        ("i", KeyCode::KeyI),
        ("j", KeyCode::KeyJ),
        ("k", KeyCode::KeyK),
        ("l", KeyCode::KeyL),
        ("m", KeyCode::KeyM),
        ("n", KeyCode::KeyN),
        ("o", KeyCode::KeyO),
        ("p", KeyCode::KeyP),
        ("q", KeyCode::KeyQ),
        ("r", KeyCode::KeyR),
        ("s", KeyCode::KeyS),
        ("t", KeyCode::KeyT),
        ("u", KeyCode::KeyU),
        ("v", KeyCode::KeyV),
        ("w", KeyCode::KeyW),
        ("x", KeyCode::KeyX),
        ("y", KeyCode::KeyY),
        ("z", KeyCode::KeyZ),
    ];
    for (name, code) in entries {
        keys.set(*name, *code as u32).map_err(err)?;
    }
    Ok(keys)
}

fn install_globals(sandbox: &LuaSandbox, handles: &ConsoleHandles) -> Result<()> {
    let lua = sandbox.lua();

    let console = handles.console.clone();
    sandbox.install_function(
        "print",
        lua.create_function(
            move |_, (text, x, y, color): (String, Option<i64>, Option<i64>, Option<i64>)| {
                console.borrow_mut().print(
                    &text,
                    x.unwrap_or(0) as i32,
                    y.unwrap_or(0) as i32,
                    color.unwrap_or(7) as u8,
                );
                Ok(())
            },
        )
        .map_err(err)?,
    )?;

    let exit_request = handles.exit_request.clone();
    sandbox.install_function(
        "exit",
        lua.create_function(move |_, target: i64| {
            if target >= 0 {
                *exit_request.borrow_mut() = Some(target as usize);
            }
            Ok(())
        })
        .map_err(err)?,
    )?;

    let console = handles.console.clone();
    sandbox.install_function(
        "t",
        lua.create_function(move |_, ()| Ok(console.borrow().time()))
            .map_err(err)?,
    )?;

    let console = handles.console.clone();
    sandbox.install_function(
        "rnd",
        lua.create_function(move |_, ()| Ok(console.borrow_mut().random()))
            .map_err(err)?,
    )?;

    Ok(())
}
