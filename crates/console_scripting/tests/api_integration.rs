use std::cell::RefCell;
use std::rc::Rc;

use console_core::batch::DrawCommand;
use console_core::engine::{ScriptHost, VirtualConsole};
use console_core::input::InputState;
use console_core::pixels::PixelArray;
use console_core::resources::{ResourceDecl, ResourceKind, ResourcePayload};
use console_scripting::host::LuaHost;

fn setup() -> (Rc<RefCell<VirtualConsole>>, Rc<RefCell<InputState>>, LuaHost) {
    let console = Rc::new(RefCell::new(VirtualConsole::new(128, 128, (8, 8), 1)));
    let input = Rc::new(RefCell::new(InputState::new()));
    let host = LuaHost::new(console.clone(), input.clone()).unwrap();
    (console, input, host)
}

fn install_sheet(console: &Rc<RefCell<VirtualConsole>>) {
    let decl = ResourceDecl {
        kind: ResourceKind::SpriteSheet,
        index: 0,
        name: "tiles.png".to_string(),
        declaration: 3,
    };
    console
        .borrow_mut()
        .registry
        .register(&decl, ResourcePayload::Sheet(PixelArray::from_pixels(16, 16, vec![1; 256])));
}

#[test]
fn script_draw_calls_land_in_the_framebuffer() {
    let (console, _input, mut host) = setup();
    host.eval(
        "game.lua",
        r#"
            function _init()
                gfx.pset(3, 4, 9)
                shape.line(0, 0, 4, 0, 5)
            end
        "#,
    )
    .unwrap();
    host.call_init().unwrap();

    let c = console.borrow();
    assert_eq!(c.pget(3, 4), 9);
    assert_eq!(c.pget(2, 0), 5);
}

#[test]
fn script_sprite_calls_queue_batches() {
    let (console, _input, mut host) = setup();
    install_sheet(&console);
    host.eval(
        "game.lua",
        r#"
            function _draw()
                spr.draw(3, 16, 24)
                spr.sdraw(0, 0, 8, 8, 4, 4)
            end
        "#,
    )
    .unwrap();
    host.call_draw().unwrap();

    let commands = console.borrow_mut().batches.drain();
    let quads: usize = commands
        .iter()
        .map(|c| match c {
            DrawCommand::Sprites(b) => b.quads.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(quads, 2);
}

#[test]
fn blend_state_calls_are_visible_to_later_draws() {
    let (console, _input, mut host) = setup();
    host.eval(
        "game.lua",
        r#"
            function _init()
                gfx.pal(1, 12)
                gfx.dither(0x00FF)
                gfx.camera(8, 8)
            end
        "#,
    )
    .unwrap();
    host.call_init().unwrap();
    let c = console.borrow();
    assert_eq!(c.fb.blender.dither_pattern(), 0x00FF);
    assert_eq!(c.fb.blender.apply(1), 12);
    assert_eq!(c.fb.camera, (8, 8));
}

#[test]
fn update_receives_fixed_dt_and_time_advances() {
    let (console, _input, mut host) = setup();
    host.eval(
        "game.lua",
        r#"
            seen_dt = 0
            function _update(dt)
                seen_dt = dt
            end
        "#,
    )
    .unwrap();
    console.borrow_mut().advance_time(1.0 / 60.0);
    host.call_update(1.0 / 60.0).unwrap();
    let snapshot = host.snapshot();
    let dt = snapshot.get("seen_dt").unwrap().as_f64().unwrap();
    assert!((dt - 1.0 / 60.0).abs() < 1e-9);
}

#[test]
fn sfx_and_exit_route_through_handles() {
    let (console, _input, mut host) = setup();
    host.eval(
        "game.lua",
        r#"
            function _init()
                sfx.play(2, 1)
                exit(3)
            end
        "#,
    )
    .unwrap();
    host.call_init().unwrap();

    let commands = console.borrow_mut().take_sound_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!((commands[0].sound, commands[0].bar), (2, 1));
    assert_eq!(host.exited(), Some(3));
    assert_eq!(host.exited(), None, "sentinel drains on read");
}

#[test]
fn ctrl_reads_the_shared_input_state() {
    let (_console, input, mut host) = setup();
    host.eval(
        "game.lua",
        r#"
            was_down = false
            function _update(dt)
                was_down = ctrl.down(keys.z)
            end
        "#,
    )
    .unwrap();
    input
        .borrow_mut()
        .set_key(winit::keyboard::KeyCode::KeyZ as u32, true);
    host.call_update(1.0 / 60.0).unwrap();
    let snapshot = host.snapshot();
    assert_eq!(snapshot.get("was_down").unwrap(), &serde_json::json!(true));
}

#[test]
fn runtime_errors_carry_script_and_line() {
    let (_console, _input, mut host) = setup();
    host.eval(
        "game.lua",
        "function _init()\n    error('boom')\nend",
    )
    .unwrap();
    let err = host.call_init().unwrap_err();
    let text = err.to_string();
    assert!(text.contains("game.lua"), "missing script name: {text}");
    assert!(text.contains("boom"), "missing message: {text}");
}

#[test]
fn syntax_errors_fail_eval_without_poisoning_the_host() {
    let (_console, _input, mut host) = setup();
    host.eval("game.lua", "function _init()").unwrap_err();
    // A valid script afterwards still works.
    host.eval("game.lua", "function _init() end").unwrap();
    host.call_init().unwrap();
}

#[test]
fn engine_scripts_share_globals_with_game_scripts() {
    let (_console, _input, mut host) = setup();
    host.eval("_boot.lua", "function double(x) return x * 2 end")
        .unwrap();
    host.eval(
        "game.lua",
        r#"
            result = 0
            function _init()
                result = double(21)
            end
        "#,
    )
    .unwrap();
    host.call_init().unwrap();
    let snapshot = host.snapshot();
    assert_eq!(snapshot.get("result").unwrap(), &serde_json::json!(42));
}

#[test]
fn sandbox_blocks_module_loading_and_io() {
    let (_console, _input, mut host) = setup();
    host.eval(
        "game.lua",
        r#"
            io_gone = true
            function _init()
                io_gone = (io == nil) and (os == nil)
                local ok = pcall(function() return require("socket") end)
                require_blocked = not ok
            end
        "#,
    )
    .unwrap();
    host.call_init().unwrap();
    let snapshot = host.snapshot();
    assert_eq!(snapshot.get("io_gone").unwrap(), &serde_json::json!(true));
    assert_eq!(
        snapshot.get("require_blocked").unwrap(),
        &serde_json::json!(true)
    );
}
