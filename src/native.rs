//! Built-in native functions: the minimal `clock`/`readln` pair the
//! specification calls out as the only natives in scope, registered into
//! the VM's globals the same way a user `fun` would be, via the shared
//! `NativeFn` calling convention (see `object::NativeFn`).

use std::io::{self, BufRead};
use std::time::Instant;

use crate::gc::Gc;
use crate::value::Value;

/// `clock() -> number`. Seconds since the process started; monotonic, not
/// wall-clock, which is explicitly acceptable per the specification.
pub fn clock(_gc: &mut Gc, _args: &[Value]) -> Result<Value, String> {
    thread_local! {
        static START: Instant = Instant::now();
    }
    let elapsed = START.with(|start| start.elapsed());
    Ok(Value::Number(elapsed.as_secs_f64()))
}

/// `readln() -> string`. One line from stdin, without its trailing newline;
/// an empty string at EOF.
pub fn readln(gc: &mut Gc, _args: &[Value]) -> Result<Value, String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| format!("Could not read from stdin: {}", e))?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Value::Object(gc.intern(&line)))
}

/// `(name, arity, function)` triples consumed by `vm::Vm::register_natives`
/// to populate the globals table at startup.
pub const NATIVES: &[(&str, u8, crate::object::NativeFn)] = &[("clock", 0, clock), ("readln", 0, readln)];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clock_is_non_negative() {
        let mut gc = Gc::new();
        match clock(&mut gc, &[]) {
            Ok(Value::Number(n)) => assert!(n >= 0.0),
            other => panic!("expected a non-negative number, got {:?}", other.is_ok()),
        }
    }
}
