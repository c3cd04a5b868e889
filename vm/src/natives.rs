use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use compiler::chunk::table::HashTable;
use compiler::chunk::value::{Native, NativeFn, QString, Value};

fn clock(_args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

fn register(globals: &mut HashTable<Value>, name: &'static str, arity: u8, function: NativeFn) {
    let native = Native::new(name, arity, function);
    let key = Rc::new(QString::new(name));
    globals.insert(key, Value::from(native));
}

/// Populates a fresh globals table with every host-provided function.
pub fn install(globals: &mut HashTable<Value>) {
    register(globals, "clock", 0, clock);
}
