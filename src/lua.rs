// src/lua.rs - Lua scripts for atomic store transitions
use redis::Script;

pub struct LuaScripts {
    pub move_delayed: Script,
}

impl LuaScripts {
    pub fn new() -> Self {
        let move_delayed = Script::new(include_str!("./lua/move_delayed.lua"));
        move_delayed.prepare_invoke();

        Self { move_delayed }
    }
}

impl Default for LuaScripts {
    fn default() -> Self {
        Self::new()
    }
}
