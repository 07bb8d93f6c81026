// Built-in natives: `clock`, `input`, `num`, registered into globals at VM
// construction (spec.md 6, "Native-function registry"). Grounded in the
// teacher's `load_standard_library` shape, which installs its one builtin
// (`print`) the same way at VM init rather than special-casing it in the
// dispatch loop.

use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Instant;

use crate::common::intern::Interner;
use crate::common::value::Value;

static PROGRAM_START: OnceLock<Instant> = OnceLock::new();

fn program_start() -> Instant {
    *PROGRAM_START.get_or_init(Instant::now)
}

pub fn clock(_interner: &mut Interner, _args: &[Value]) -> Value {
    Value::Number(program_start().elapsed().as_secs_f64())
}

/// Prints `args[0]` (no trailing newline) then reads one line from stdin.
/// The returned string retains its trailing newline, per spec.
pub fn input(interner: &mut Interner, args: &[Value]) -> Value {
    if let Some(prompt) = args.first().and_then(Value::as_string) {
        print!("{}", prompt.chars);
        let _ = io::stdout().flush();
    }

    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        line.clear();
    }
    Value::Obj(crate::common::value::Obj::Str(interner.intern(line)))
}

/// Best-effort numeric prefix parse: leading whitespace, optional sign,
/// digits, optional fractional part. A non-numeric prefix yields 0.
pub fn num(_interner: &mut Interner, args: &[Value]) -> Value {
    let Some(s) = args.first().and_then(Value::as_string) else {
        return Value::Number(0.0);
    };

    let bytes = s.chars.as_bytes();
    let mut i = 0;
    while i < bytes.len() && (bytes[i] as char).is_whitespace() {
        i += 1;
    }
    let start = i;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let mut saw_digit = false;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        saw_digit = true;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        let mut saw_frac_digit = false;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
            saw_frac_digit = true;
        }
        if saw_frac_digit {
            i = j;
            saw_digit = true;
        }
    }

    if !saw_digit {
        return Value::Number(0.0);
    }
    s.chars[start..i].parse::<f64>().map(Value::Number).unwrap_or(Value::Number(0.0))
}
