// The stack-based virtual machine: value stack, call-frame stack, open
// upvalues, globals, and the single dispatch loop (spec.md 4.5). Grounded
// in the teacher's `VirtualMachine` — same `LogLevel`-gated trace texture,
// same "format a message, walk frames, reset stacks" runtime-error shape —
// but a different execution model entirely: the teacher's VM is a register
// machine interpreting pre-decoded `OpCode` structs, this one is a stack
// machine interpreting a raw byte stream, per spec.md's Chunk encoding.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::backend::disassembler::{disassemble_instruction, disassemble_program};
use crate::backend::natives;
use crate::common::chunk::OpCode;
use crate::common::intern::Interner;
use crate::common::table::Table;
use crate::common::value::{NativeFn, Obj, ObjClosure, ObjNative, ObjUpvalue, Value};
use crate::frontend::compile;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    #[default]
    Release,
    Debug,
    Trace,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

struct CallFrame {
    closure: Rc<ObjClosure>,
    ip: usize,
    slots_base: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    interner: Interner,
    open_upvalues: Vec<Rc<RefCell<ObjUpvalue>>>,
    log_level: LogLevel,
    output: Box<dyn Write>,
}

impl Vm {
    pub fn new(log_level: LogLevel) -> Vm {
        Vm::with_output(log_level, Box::new(io::stdout()))
    }

    /// Same as `new`, but `print` writes to `output` instead of stdout —
    /// what lets tests assert on a program's printed output without
    /// shelling out or capturing the real stdout handle.
    pub fn with_output(log_level: LogLevel, output: Box<dyn Write>) -> Vm {
        let mut vm = Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            interner: Interner::new(),
            open_upvalues: Vec::new(),
            log_level,
            output,
        };
        vm.define_native("clock", natives::clock);
        vm.define_native("input", natives::input);
        vm.define_native("num", natives::num);
        vm
    }

    fn define_native(&mut self, name: &'static str, func: NativeFn) {
        let interned = self.interner.intern(name.to_string());
        let native = Rc::new(ObjNative { name, func });
        self.globals.set(interned, Value::Obj(Obj::Native(native)));
    }

    /// Resets the stacks between REPL entries without discarding globals or
    /// the interning pool (spec_full 6: "globals and the interning pool
    /// survive across REPL entries").
    pub fn reset_stacks(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match compile(source, &mut self.interner) {
            Ok(function) => function,
            Err(()) => return InterpretResult::CompileError,
        };

        if self.log_level == LogLevel::Trace {
            disassemble_program(&function);
        }

        let closure = Rc::new(ObjClosure { function, upvalues: Vec::new() });
        self.push(Value::Obj(Obj::Closure(closure.clone())));
        if let Some(result) = self.call(closure, 0) {
            return result;
        }

        self.run()
    }

    // ---- stack helpers ----

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("the compiler guarantees stack-neutral bytecode")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().unwrap()
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().unwrap()
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.current_frame_mut();
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        self.current_frame().closure.function.chunk.constants[idx as usize].clone()
    }

    fn read_string(&mut self) -> Rc<crate::common::value::ObjString> {
        match self.read_constant() {
            Value::Obj(Obj::Str(s)) => s,
            _ => unreachable!("compiler only ever loads a String constant here"),
        }
    }

    // ---- upvalues ----

    fn capture_upvalue(&mut self, location: usize) -> Rc<RefCell<ObjUpvalue>> {
        if let Some(existing) = self.open_upvalues.iter().find(|uv| {
            matches!(&*uv.borrow(), ObjUpvalue::Open(loc) if *loc == location)
        }) {
            return existing.clone();
        }

        let upvalue = Rc::new(RefCell::new(ObjUpvalue::Open(location)));
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|uv| matches!(&*uv.borrow(), ObjUpvalue::Open(loc) if *loc < location))
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, upvalue.clone());
        upvalue
    }

    /// Closes every open upvalue whose stack location is at or above
    /// `from`. The list is kept sorted descending by location, so those are
    /// always at the front.
    fn close_upvalues(&mut self, from: usize) {
        loop {
            let should_close = match self.open_upvalues.first() {
                Some(uv) => matches!(&*uv.borrow(), ObjUpvalue::Open(loc) if *loc >= from),
                None => false,
            };
            if !should_close {
                break;
            }
            let upvalue = self.open_upvalues.remove(0);
            let location = match &*upvalue.borrow() {
                ObjUpvalue::Open(loc) => *loc,
                ObjUpvalue::Closed(_) => unreachable!(),
            };
            let value = self.stack[location].clone();
            *upvalue.borrow_mut() = ObjUpvalue::Closed(value);
        }
    }

    fn read_upvalue(&self, upvalue: &Rc<RefCell<ObjUpvalue>>) -> Value {
        match &*upvalue.borrow() {
            ObjUpvalue::Open(loc) => self.stack[*loc].clone(),
            ObjUpvalue::Closed(v) => v.clone(),
        }
    }

    fn write_upvalue(&mut self, upvalue: &Rc<RefCell<ObjUpvalue>>, value: Value) {
        let open_location = match &*upvalue.borrow() {
            ObjUpvalue::Open(loc) => Some(*loc),
            ObjUpvalue::Closed(_) => None,
        };
        match open_location {
            Some(loc) => self.stack[loc] = value,
            None => *upvalue.borrow_mut() = ObjUpvalue::Closed(value),
        }
    }

    // ---- calls ----

    fn call(&mut self, closure: Rc<ObjClosure>, arg_count: u8) -> Option<InterpretResult> {
        if arg_count as usize != closure.function.arity as usize {
            return Some(self.runtime_error(&format!(
                "Expected {} arguments but got {}.",
                closure.function.arity, arg_count
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Some(self.runtime_error("Stack overflow."));
        }
        let slots_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slots_base });
        None
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Option<InterpretResult> {
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call(closure, arg_count),
            Value::Obj(Obj::Native(native)) => {
                let start = self.stack.len() - arg_count as usize;
                let args: Vec<Value> = self.stack[start..].to_vec();
                let result = (native.func)(&mut self.interner, &args);
                self.stack.truncate(start - 1);
                self.push(result);
                None
            }
            _ => Some(self.runtime_error("Can only call functions and classes.")),
        }
    }

    // ---- arithmetic helpers ----

    fn numeric_binary<F>(&mut self, f: F) -> Option<InterpretResult>
    where
        F: FnOnce(f64, f64) -> Value,
    {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(f(a, b));
                None
            }
            _ => Some(self.runtime_error("Operands must be numbers.")),
        }
    }

    // ---- tracing ----

    fn trace_instruction(&self) {
        print!("          ");
        for value in &self.stack {
            print!("[ {value} ]");
        }
        println!();
        let frame = self.current_frame();
        disassemble_instruction(&frame.closure.function.chunk, frame.ip);
    }

    fn runtime_error(&mut self, message: &str) -> InterpretResult {
        eprintln!("{message}");
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            let line = function.chunk.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(0);
            match &function.name {
                Some(name) => eprintln!("[line {line}] in {}()", name.chars),
                None => eprintln!("[line {line}] in script"),
            }
        }
        self.reset_stacks();
        InterpretResult::RuntimeError
    }

    // ---- dispatch loop ----

    fn run(&mut self) -> InterpretResult {
        loop {
            if self.log_level == LogLevel::Trace {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = match OpCode::from_byte(byte) {
                Some(op) => op,
                None => return self.runtime_error(&format!("Unknown opcode {byte}.")),
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots_base;
                    let value = self.stack[base + slot].clone();
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots_base;
                    let value = self.peek(0).clone();
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => return self.runtime_error(&format!("Undefined variable '{}'.", name.chars)),
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.pop();
                    self.globals.set(name, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0).clone();
                    if self.globals.set(name.clone(), value) {
                        self.globals.delete(&name);
                        return self.runtime_error(&format!("Undefined variable '{}'.", name.chars));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.current_frame().closure.upvalues[slot].clone();
                    let value = self.read_upvalue(&upvalue);
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.current_frame().closure.upvalues[slot].clone();
                    let value = self.peek(0).clone();
                    self.write_upvalue(&upvalue, value);
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => {
                    if let Some(result) = self.numeric_binary(|a, b| Value::Bool(a > b)) {
                        return result;
                    }
                }
                OpCode::Less => {
                    if let Some(result) = self.numeric_binary(|a, b| Value::Bool(a < b)) {
                        return result;
                    }
                }
                OpCode::Add => {
                    let b = self.peek(0).clone();
                    let a = self.peek(1).clone();
                    match (&a, &b) {
                        (Value::Obj(Obj::Str(sa)), Value::Obj(Obj::Str(sb))) => {
                            self.pop();
                            self.pop();
                            let concatenated = format!("{}{}", sa.chars, sb.chars);
                            let interned = self.interner.intern(concatenated);
                            self.push(Value::Obj(Obj::Str(interned)));
                        }
                        (Value::Number(na), Value::Number(nb)) => {
                            let sum = na + nb;
                            self.pop();
                            self.pop();
                            self.push(Value::Number(sum));
                        }
                        _ => return self.runtime_error("Operands must be two numbers or two strings."),
                    }
                }
                OpCode::Subtract => {
                    if let Some(result) = self.numeric_binary(|a, b| Value::Number(a - b)) {
                        return result;
                    }
                }
                OpCode::Multiply => {
                    if let Some(result) = self.numeric_binary(|a, b| Value::Number(a * b)) {
                        return result;
                    }
                }
                OpCode::Divide => {
                    if let Some(result) = self.numeric_binary(|a, b| Value::Number(a / b)) {
                        return result;
                    }
                }
                OpCode::IntDivide => {
                    if let Some(result) = self.numeric_binary(|a, b| {
                        let quotient = (a.trunc()) / (b.trunc());
                        Value::Number(quotient.trunc())
                    }) {
                        return result;
                    }
                }
                OpCode::Modulus => {
                    if let Some(result) = self.numeric_binary(|a, b| {
                        let quotient = (a / b).trunc();
                        Value::Number(a - quotient * b)
                    }) {
                        return result;
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => match self.peek(0).as_number() {
                    Some(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    None => return self.runtime_error("Operand must be a number."),
                },
                OpCode::Print => {
                    let value = self.pop();
                    let _ = writeln!(self.output, "{value}");
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.current_frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.current_frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.current_frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize).clone();
                    if let Some(result) = self.call_value(callee, arg_count) {
                        return result;
                    }
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Obj(Obj::Function(f)) => f,
                        _ => unreachable!("compiler only ever targets OP_CLOSURE at a Function constant"),
                    };
                    let mut upvalues = Vec::with_capacity(function.upvalue_count);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte();
                        if is_local {
                            let base = self.current_frame().slots_base;
                            let location = base + index as usize;
                            upvalues.push(self.capture_upvalue(location));
                        } else {
                            let upvalue = self.current_frame().closure.upvalues[index as usize].clone();
                            upvalues.push(upvalue);
                        }
                    }
                    let closure = ObjClosure { function, upvalues };
                    self.push(Value::Obj(Obj::Closure(Rc::new(closure))));
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.slots_base);
                    if self.frames.is_empty() {
                        self.pop();
                        return InterpretResult::Ok;
                    }
                    self.stack.truncate(frame.slots_base);
                    self.push(result);
                }
            }

            if self.stack.len() > STACK_MAX {
                return self.runtime_error("Stack overflow.");
            }
        }
    }
}
