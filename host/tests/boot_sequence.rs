use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use console_core::audio::{RecordingSoundBoard, VirtualSoundBoard};
use console_core::config::{GameParameters, GameParametersV1, Size};
use console_core::engine::{EngineMode, GameEngine};
use console_core::platform::MemoryPlatform;
use console_core::score::MusicalBar;
use console_scripting::host::LuaHost;

/// Test sound board that shares its recordings with the test body.
#[derive(Clone, Default)]
struct SharedBoard(Rc<RefCell<RecordingSoundBoard>>);

impl VirtualSoundBoard for SharedBoard {
    fn play_bar(&mut self, bar: &MusicalBar) {
        self.0.borrow_mut().play_bar(bar);
    }

    fn play_pcm(&mut self, samples: Vec<f32>) {
        self.0.borrow_mut().play_pcm(samples);
    }
}

fn test_params() -> GameParameters {
    GameParameters::V1(GameParametersV1 {
        name: "boot test".to_string(),
        resolution: Size {
            width: 128,
            height: 128,
        },
        sprites: Size {
            width: 8,
            height: 8,
        },
        zoom: 1,
        colors: vec!["#000000".to_string(), "#FFFFFF".to_string()],
        scripts: vec!["game.lua".to_string()],
        spritesheets: vec![],
        levels: vec![],
        sounds: vec!["theme.sfx".to_string()],
        libraries: vec![],
        hide_mouse_cursor: false,
    })
}

fn test_platform() -> Arc<MemoryPlatform> {
    let platform = Arc::new(MemoryPlatform::new());
    platform.insert_text("_boot.lua", "function helper() return 7 end");
    platform.insert_text("_engine.lua", "-- engine runtime");
    platform.insert_text(
        "game.lua",
        r#"
            booted = false
            function _init()
                booted = helper() == 7
                sfx.play(0, 0)
            end
            function _update(dt) end
        "#,
    );
    platform.insert_text(
        "theme.sfx",
        r#"{"bars": [{"tempo": 120.0, "instrument": {"wave": "sine", "attack": 0.0, "decay": 0.0, "sustain": 1.0, "release": 0.0, "harmonics": [1.0]}, "notes": [{"pitch": 60, "start_beat": 0.0, "duration_beats": 1.0, "volume": 1.0, "instrument": null}]}]}"#,
    );
    platform
}

fn advance_until<F: Fn(&GameEngine) -> bool>(engine: &mut GameEngine, cond: F, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond(engine) {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        engine.advance().unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn boot_ordering_reaches_running_and_init_sees_engine_globals() {
    let board = SharedBoard::default();
    let mut engine = GameEngine::new(
        test_params(),
        test_platform(),
        |console, input| Ok(Box::new(LuaHost::new(console, input)?)),
        Box::new(board.clone()),
    )
    .unwrap();
    assert_eq!(engine.mode(), EngineMode::Idle);

    engine.start();
    assert_eq!(engine.mode(), EngineMode::Loading);
    advance_until(&mut engine, |e| e.mode() == EngineMode::Running, "Running");

    // _init ran with the boot script's globals available and played a bar.
    let recorded = board.0.borrow();
    assert_eq!(recorded.bars.len(), 1);
    assert_eq!(recorded.bars[0].tempo, 120.0);
}

#[test]
fn hot_reload_bumps_version_and_reports_a_popup() {
    let platform = test_platform();
    let mut engine = GameEngine::new(
        test_params(),
        platform.clone(),
        |console, input| Ok(Box::new(LuaHost::new(console, input)?)),
        Box::new(SharedBoard::default()),
    )
    .unwrap();
    engine.start();
    advance_until(&mut engine, |e| e.mode() == EngineMode::Running, "Running");

    platform.insert_text(
        "game.lua",
        r#"
            booted = false
            function _init() end
            function _update(dt) end
        "#,
    );
    engine.request_reload("game.lua");
    advance_until(
        &mut engine,
        |e| {
            e.console()
                .borrow()
                .registry
                .game_script(0)
                .is_some_and(|s| s.version == 2)
        },
        "version 2",
    );
    let console = engine.console();
    let console = console.borrow();
    let script = console.registry.game_script(0).unwrap();
    assert!(script.reload);
    drop(console);
    assert!(engine
        .popups()
        .iter()
        .any(|p| p.message.contains("RELOADED")));
}

#[test]
fn missing_game_script_leaves_slot_null_and_engine_degrades() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.insert_text("_boot.lua", "-- boot");
    platform.insert_text("_engine.lua", "-- engine");
    // game.lua and theme.sfx intentionally absent.
    let mut engine = GameEngine::new(
        test_params(),
        platform,
        |console, input| Ok(Box::new(LuaHost::new(console, input)?)),
        Box::new(SharedBoard::default()),
    )
    .unwrap();
    engine.start();
    advance_until(&mut engine, |e| e.mode() == EngineMode::Running, "Running");
    assert!(engine.console().borrow().registry.game_script(0).is_none());
    // The loop keeps ticking without a current script.
    for _ in 0..5 {
        engine.advance().unwrap();
    }
}
