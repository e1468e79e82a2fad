use std::cell::RefCell;
use std::rc::Rc;

use console_core::engine::{ScriptHost, VirtualConsole};
use console_core::input::InputState;
use console_scripting::host::LuaHost;

fn host() -> LuaHost {
    let console = Rc::new(RefCell::new(VirtualConsole::new(64, 64, (8, 8), 1)));
    let input = Rc::new(RefCell::new(InputState::new()));
    LuaHost::new(console, input).unwrap()
}

const V1: &str = r#"
    score = 0
    lives = 3
    player = { x = 10, y = 20, name = "pip" }
    function _update(dt)
        score = score + 1
    end
"#;

const V2: &str = r#"
    score = 0
    lives = 3
    player = { x = 0, y = 0, name = "pip" }
    speedup = 2
    function _update(dt)
        score = score + speedup
    end
"#;

#[test]
fn snapshot_captures_serializable_globals_only() {
    let mut h = host();
    h.eval("game.lua", V1).unwrap();
    let snapshot = h.snapshot();
    assert_eq!(snapshot.get("score").unwrap(), &serde_json::json!(0));
    assert_eq!(snapshot.get("lives").unwrap(), &serde_json::json!(3));
    assert_eq!(
        snapshot.get("player").unwrap().get("name").unwrap(),
        &serde_json::json!("pip")
    );
    // Functions are not data.
    assert!(!snapshot.contains_key("_update"));
}

#[test]
fn reload_restores_snapshotted_state() {
    let mut h = host();
    h.eval("game.lua", V1).unwrap();
    for _ in 0..5 {
        h.call_update(1.0 / 60.0).unwrap();
    }
    let snapshot = h.snapshot();
    assert_eq!(snapshot.get("score").unwrap(), &serde_json::json!(5));

    // New version resets globals at load; restore puts progress back.
    h.eval("game.lua", V2).unwrap();
    assert_eq!(h.snapshot().get("score").unwrap(), &serde_json::json!(0));
    h.restore(&snapshot);
    let restored = h.snapshot();
    assert_eq!(restored.get("score").unwrap(), &serde_json::json!(5));
    // Values only the new version defines survive the restore.
    assert_eq!(restored.get("speedup").unwrap(), &serde_json::json!(2));

    // The new behavior runs against the restored state.
    h.call_update(1.0 / 60.0).unwrap();
    assert_eq!(h.snapshot().get("score").unwrap(), &serde_json::json!(7));
}

#[test]
fn failed_reload_keeps_last_good_environment() {
    let mut h = host();
    h.eval("game.lua", V1).unwrap();
    for _ in 0..3 {
        h.call_update(1.0 / 60.0).unwrap();
    }
    // Broken new version: eval fails, old env must stay current.
    assert!(h.eval("game.lua", "score = ][").is_err());
    assert_eq!(h.snapshot().get("score").unwrap(), &serde_json::json!(3));
    h.call_update(1.0 / 60.0).unwrap();
    assert_eq!(h.snapshot().get("score").unwrap(), &serde_json::json!(4));
}

#[test]
fn switching_scripts_changes_the_callback_target() {
    let mut h = host();
    h.eval("game.lua", "tag = 'game'\nfunction _init() end").unwrap();
    h.eval("title.lua", "tag = 'title'\nfunction _init() end")
        .unwrap();
    // First evaluated game script owns the callbacks.
    assert_eq!(h.snapshot().get("tag").unwrap(), &serde_json::json!("game"));

    h.set_current("title.lua");
    assert_eq!(
        h.snapshot().get("tag").unwrap(),
        &serde_json::json!("title")
    );

    h.set_current("game.lua");
    assert_eq!(h.snapshot().get("tag").unwrap(), &serde_json::json!("game"));
}

#[test]
fn engine_scripts_do_not_steal_the_current_environment() {
    let mut h = host();
    h.eval("game.lua", "tag = 'game'").unwrap();
    h.eval("_engine.lua", "shared = 1").unwrap();
    assert_eq!(h.snapshot().get("tag").unwrap(), &serde_json::json!("game"));
}

#[test]
fn snapshot_is_json_serializable_end_to_end() {
    let mut h = host();
    h.eval(
        "game.lua",
        r#"inventory = { "sword", "herb" } flags = { cave = true, depth = 2.5 }"#,
    )
    .unwrap();
    let snapshot = h.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let back: std::collections::HashMap<String, serde_json::Value> =
        serde_json::from_str(&json).unwrap();
    assert_eq!(back.get("flags").unwrap().get("depth").unwrap(), &serde_json::json!(2.5));
    assert_eq!(
        back.get("inventory").unwrap().get(0).unwrap(),
        &serde_json::json!("sword")
    );
}
