//! Executor for compiled macro code
//!
//! A small operand-stack interpreter for the instruction text produced by
//! `macro_core::Compiler`. Every call runs against one [`MacroInstance`]:
//! `aload_1` stands for its slot table, `aload_2` for the output buffer and
//! `aload_3` for the string pool that came with the code.

use std::collections::HashMap;
use std::fmt;

use macro_core::ast::{arith_double, arith_long, ArithOp};
use macro_core::types::conversion::{parse_bool, parse_double, parse_long};
use macro_core::types::render_real;
use macro_core::{CompiledMacro, Error, MacroInstance, Value};
use tracing::{debug, trace, warn};

use crate::error::{RuntimeError, RuntimeResult};

/// One instruction line: opcode and the rest of the line
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: String,
    pub operand: Option<String>,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Some(operand) => write!(f, "{} {}", self.opcode, operand),
            None => write!(f, "{}", self.opcode),
        }
    }
}

/// Instruction text with labels resolved to instruction indices
#[derive(Debug, Clone, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
}

impl Program {
    /// Parse instruction text. Blank lines and lines starting with `.` or `;`
    /// are skipped; `name:` on its own line defines a label.
    pub fn parse(code: &str) -> RuntimeResult<Self> {
        let mut program = Program::default();

        for (line_no, line) in code.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('.') || line.starts_with(';') {
                continue;
            }

            if let Some(label) = line.strip_suffix(':') {
                if !label.is_empty() && !label.contains(char::is_whitespace) {
                    let target = program.instructions.len();
                    if program.labels.insert(label.to_string(), target).is_some() {
                        return Err(RuntimeError::InvalidFormat(format!(
                            "label '{}' defined twice (line {})",
                            label,
                            line_no + 1
                        )));
                    }
                    continue;
                }
            }

            let instruction = match line.split_once(char::is_whitespace) {
                Some((opcode, rest)) => Instruction {
                    opcode: opcode.to_string(),
                    operand: Some(rest.trim().to_string()),
                },
                None => Instruction { opcode: line.to_string(), operand: None },
            };
            program.instructions.push(instruction);
        }

        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction index a label points at
    pub fn target(&self, label: &str) -> RuntimeResult<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| RuntimeError::InvalidFormat(format!("undefined label '{}'", label)))
    }
}

/// Operand stack cell
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Long(i64),
    Double(f64),
    Int(i64),
    Str(String),
    Array(Value),
    Builder(String),
    Slots,
    Out,
    Pool,
    Slot(usize),
}

impl Operand {
    fn is_wide(&self) -> bool {
        matches!(self, Operand::Long(_) | Operand::Double(_))
    }

    fn describe(&self) -> &'static str {
        match self {
            Operand::Long(_) => "long",
            Operand::Double(_) => "double",
            Operand::Int(_) => "int",
            Operand::Str(_) => "string",
            Operand::Array(_) => "array",
            Operand::Builder(_) => "string builder",
            Operand::Slots => "slot table",
            Operand::Out => "output",
            Operand::Pool => "string pool",
            Operand::Slot(_) => "slot",
        }
    }
}

enum Flow {
    Next,
    Return,
}

/// Operand-stack interpreter
pub struct Executor {
    max_steps: u64,
    stack: Vec<Operand>,
    locals: HashMap<String, Operand>,
    output: String,
    pc: usize,
    steps: u64,
}

impl Executor {
    pub fn new(max_steps: u64) -> Self {
        Self {
            max_steps,
            stack: Vec::new(),
            locals: HashMap::new(),
            output: String::new(),
            pc: 0,
            steps: 0,
        }
    }

    /// Parse and run compiled code against `instance`, returning the expansion
    pub fn execute(&mut self, compiled: &CompiledMacro, instance: &mut MacroInstance) -> RuntimeResult<String> {
        let program = Program::parse(&compiled.code)?;
        self.run(&program, &compiled.strings, instance)
    }

    /// Run an already parsed program
    pub fn run(&mut self, program: &Program, pool: &str, instance: &mut MacroInstance) -> RuntimeResult<String> {
        self.stack.clear();
        self.locals.clear();
        self.output.clear();
        self.pc = 0;
        self.steps = 0;

        while self.pc < program.len() {
            if self.steps >= self.max_steps {
                return Err(RuntimeError::StepLimit(self.max_steps));
            }
            self.steps += 1;

            let instruction = &program.instructions[self.pc];
            trace!(pc = self.pc, depth = self.stack.len(), op = %instruction, "step");
            self.pc += 1;

            if let Flow::Return = self.step(instruction, program, pool, instance)? {
                break;
            }
        }

        if !self.stack.is_empty() {
            warn!(depth = self.stack.len(), "operand stack not empty at return");
        }
        debug!(steps = self.steps, bytes = self.output.len(), "expansion finished");
        Ok(std::mem::take(&mut self.output))
    }

    /// Instructions executed by the last run
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn step(
        &mut self,
        instruction: &Instruction,
        program: &Program,
        pool: &str,
        instance: &mut MacroInstance,
    ) -> RuntimeResult<Flow> {
        let operand = instruction.operand.as_deref().unwrap_or("");

        match instruction.opcode.as_str() {
            "aload_1" => self.push(Operand::Slots),
            "aload_2" => self.push(Operand::Out),
            "aload_3" => self.push(Operand::Pool),

            "ldc" => {
                let value = operand
                    .parse::<i64>()
                    .map_err(|_| self.fault(format!("bad ldc operand '{}'", operand)))?;
                self.push(Operand::Int(value));
            }
            "ldc2_w" => {
                let value = self.constant(operand)?;
                self.push(value);
            }
            "iconst_0" => self.push(Operand::Int(0)),
            "iconst_1" => self.push(Operand::Int(1)),

            "aaload" => {
                let index = self.pop_int()?;
                match self.pop()? {
                    Operand::Slots => {
                        let slot = usize::try_from(index)
                            .ok()
                            .filter(|&i| i < instance.len())
                            .ok_or_else(|| self.fault(format!("slot {} out of range", index)))?;
                        self.push(Operand::Slot(slot));
                    }
                    Operand::Array(array) => {
                        let element = array.element(index)?;
                        self.push(Operand::Str(element.as_str()?.to_string()));
                    }
                    other => return Err(self.fault(format!("aaload on {}", other.describe()))),
                }
            }

            "astore" => {
                let value = self.pop()?;
                self.locals.insert(operand.to_string(), value);
            }
            "istore" => {
                let value = self.pop_int()?;
                self.locals.insert(operand.to_string(), Operand::Int(value));
            }
            "aload" | "iload" => {
                let value = self
                    .locals
                    .get(operand)
                    .cloned()
                    .ok_or_else(|| self.fault(format!("local '{}' is not set", operand)))?;
                self.push(value);
            }
            "iinc" => {
                let mut parts = operand.split_whitespace();
                let name = parts.next().unwrap_or("");
                let delta = parts
                    .next()
                    .and_then(|d| d.parse::<i64>().ok())
                    .ok_or_else(|| self.fault(format!("bad iinc operand '{}'", operand)))?;
                match self.locals.get_mut(name) {
                    Some(Operand::Int(v)) => *v = v.wrapping_add(delta),
                    _ => return Err(self.fault(format!("int local '{}' is not set", name))),
                }
            }

            "arraylength" => {
                let array = self.pop_array()?;
                self.push(Operand::Int(array.len()? as i64));
            }
            "if_icmpge" => {
                let right = self.pop_int()?;
                let left = self.pop_int()?;
                if left >= right {
                    self.pc = program.target(operand)?;
                }
            }

            "l2i" => {
                let v = self.pop_long()?;
                self.push(Operand::Int(v));
            }
            "i2l" => {
                let v = self.pop_int()?;
                self.push(Operand::Long(v));
            }
            "l2d" => {
                let v = self.pop_long()?;
                self.push(Operand::Double(v as f64));
            }
            "d2l" => {
                let v = self.pop_double()?;
                self.push(Operand::Long(v.trunc() as i64));
            }

            "ladd" | "lsub" | "lmul" | "ldiv" | "lrem" => {
                let op = arith_op(&instruction.opcode[1..]).ok_or_else(|| self.fault("bad opcode"))?;
                let right = self.pop_long()?;
                let left = self.pop_long()?;
                self.push(Operand::Long(arith_long(op, left, right)?));
            }
            "dadd" | "dsub" | "dmul" | "ddiv" | "drem" => {
                let op = arith_op(&instruction.opcode[1..]).ok_or_else(|| self.fault("bad opcode"))?;
                let right = self.pop_double()?;
                let left = self.pop_double()?;
                self.push(Operand::Double(arith_double(op, left, right)));
            }
            "lneg" => {
                let v = self.pop_long()?;
                self.push(Operand::Long(v.wrapping_neg()));
            }
            "dneg" => {
                let v = self.pop_double()?;
                self.push(Operand::Double(-v));
            }

            "lcmp" => {
                let right = self.pop_long()?;
                let left = self.pop_long()?;
                self.push(Operand::Int(left.cmp(&right) as i64));
            }
            "dcmpg" => {
                let right = self.pop_double()?;
                let left = self.pop_double()?;
                let result = left.partial_cmp(&right).map_or(1, |o| o as i64);
                self.push(Operand::Int(result));
            }
            "isub" => {
                let right = self.pop_int()?;
                let left = self.pop_int()?;
                self.push(Operand::Int(left.wrapping_sub(right)));
            }
            "ixor" => {
                let right = self.pop_int()?;
                let left = self.pop_int()?;
                self.push(Operand::Int(left ^ right));
            }

            "ifeq" | "ifne" | "iflt" | "ifle" | "ifgt" | "ifge" => {
                let v = self.pop_int()?;
                let taken = match instruction.opcode.as_str() {
                    "ifeq" => v == 0,
                    "ifne" => v != 0,
                    "iflt" => v < 0,
                    "ifle" => v <= 0,
                    "ifgt" => v > 0,
                    _ => v >= 0,
                };
                if taken {
                    self.pc = program.target(operand)?;
                }
            }
            "goto" => self.pc = program.target(operand)?,

            "dup" => {
                let top = self.peek()?.clone();
                self.push(top);
            }
            "dup2" => {
                let top = self.peek()?.clone();
                if top.is_wide() {
                    self.push(top);
                } else {
                    let below = self.stack.len().checked_sub(2).ok_or_else(|| self.fault("stack underflow"))?;
                    let pair = self.stack[below..].to_vec();
                    self.stack.extend(pair);
                }
            }
            "pop" => {
                self.pop()?;
            }
            "pop2" => {
                if !self.pop()?.is_wide() {
                    self.pop()?;
                }
            }

            "new" => match operand {
                "StringBuilder" => self.push(Operand::Builder(String::new())),
                other => return Err(self.fault(format!("cannot create '{}'", other))),
            },
            "invokevirtual" => self.virtual_call(operand)?,
            "invokeinterface" => self.slot_call(operand, instance)?,
            "invokestatic" => self.static_call(operand, pool, instance)?,

            "return" => return Ok(Flow::Return),

            other => return Err(RuntimeError::InvalidFormat(format!("unknown opcode '{}'", other))),
        }

        Ok(Flow::Next)
    }

    fn virtual_call(&mut self, method: &str) -> RuntimeResult<()> {
        match method {
            "StringBuilder.append" => {
                let text = self.pop_str()?;
                match self.pop()? {
                    Operand::Builder(mut builder) => {
                        builder.push_str(&text);
                        self.push(Operand::Builder(builder));
                    }
                    other => return Err(self.fault(format!("append on {}", other.describe()))),
                }
            }
            "StringBuilder.toString" => match self.pop()? {
                Operand::Builder(builder) => self.push(Operand::Str(builder)),
                other => return Err(self.fault(format!("toString on {}", other.describe()))),
            },
            "Out.append" => {
                let text = self.pop_str()?;
                match self.pop()? {
                    Operand::Out => self.output.push_str(&text),
                    other => return Err(self.fault(format!("output append on {}", other.describe()))),
                }
            }
            other => return Err(RuntimeError::InvalidFormat(format!("unknown method '{}'", other))),
        }
        Ok(())
    }

    /// Slot getters and setters
    fn slot_call(&mut self, method: &str, instance: &mut MacroInstance) -> RuntimeResult<()> {
        match method {
            "Slot.getLong" | "Slot.getDouble" | "Slot.getString" | "Slot.getBoolean" => {
                let slot = self.pop_slot()?;
                let value = instance.value(slot)?;
                let cell = scalar_operand(&method[8..], value)?;
                self.push(cell);
            }
            "Slot.getArray" => {
                let slot = self.pop_slot()?;
                let value = instance.value(slot)?;
                if !value.kind().is_array() {
                    return Err(Error::calculation(format!("value of kind {} read as array", value.kind())).into());
                }
                self.push(Operand::Array(value.clone()));
            }
            "Slot.getLongAt" | "Slot.getDoubleAt" | "Slot.getStringAt" | "Slot.getBooleanAt" => {
                let index = self.pop_int()?;
                let slot = self.pop_slot()?;
                let element = instance.value(slot)?.element(index)?;
                let accessor = &method[8..method.len() - 2];
                let cell = scalar_operand(accessor, &element)?;
                self.push(cell);
            }
            "Slot.size" => {
                let slot = self.pop_slot()?;
                let len = instance.value(slot)?.len()?;
                self.push(Operand::Int(len as i64));
            }

            "Slot.setLong" | "Slot.setDouble" | "Slot.setString" | "Slot.setBoolean" | "Slot.setArray" => {
                let value = self.pop_value(&method[8..])?;
                let slot = self.pop_slot()?;
                instance.set(slot, value)?;
            }
            "Slot.setLongAt" | "Slot.setDoubleAt" | "Slot.setStringAt" | "Slot.setBooleanAt" => {
                let value = self.pop_value(&method[8..method.len() - 2])?;
                let index = self.pop_int()?;
                let slot = self.pop_slot()?;
                instance.set_index(slot, index, value)?;
            }

            other => return Err(RuntimeError::InvalidFormat(format!("unknown slot method '{}'", other))),
        }
        Ok(())
    }

    /// Runtime support calls
    fn static_call(&mut self, operand: &str, pool: &str, instance: &mut MacroInstance) -> RuntimeResult<()> {
        let (method, args) = match operand.split_once(char::is_whitespace) {
            Some((method, args)) => (method, args.trim()),
            None => (operand, ""),
        };

        match method {
            "MacroExecutor.validate" => {
                let slot = self.pop_slot()?;
                instance.value(slot)?;
                self.push(Operand::Slot(slot));
            }
            "MacroExecutor.valueExists" => {
                let slot = self.pop_slot()?;
                self.push(Operand::Int(instance.exists(slot) as i64));
            }
            "MacroExecutor.length" => {
                let text = self.pop_str()?;
                self.push(Operand::Long(text.chars().count() as i64));
            }
            "MacroExecutor.split" => {
                let separator = self.pop_str()?;
                let source = self.pop_str()?;
                self.push(Operand::Array(Value::StrArray(split(&source, &separator))));
            }
            "MacroExecutor.extract" => {
                let to = self.pop_int()?;
                let from = self.pop_int()?;
                match self.pop()? {
                    Operand::Pool => {}
                    other => return Err(self.fault(format!("extract from {}", other.describe()))),
                }
                let text = usize::try_from(from)
                    .ok()
                    .zip(usize::try_from(to).ok())
                    .and_then(|(from, to)| pool.get(from..to))
                    .ok_or_else(|| self.fault(format!("pool range {}..{} is invalid", from, to)))?;
                self.push(Operand::Str(text.to_string()));
            }
            "MacroExecutor.compareStrings" => {
                let right = self.pop_str()?;
                let left = self.pop_str()?;
                self.push(Operand::Int(left.cmp(&right) as i64));
            }

            "MacroExecutor.toStringLong" => {
                let v = self.pop_long()?;
                self.push(Operand::Str(v.to_string()));
            }
            "MacroExecutor.toStringDouble" => {
                let v = self.pop_double()?;
                self.push(Operand::Str(render_real(v)));
            }
            "MacroExecutor.toStringBoolean" => {
                let v = self.pop_int()?;
                self.push(Operand::Str((v != 0).to_string()));
            }
            "MacroExecutor.toStringList" => {
                let array = self.pop_array()?;
                self.push(Operand::Str(array.to_string()));
            }
            "MacroExecutor.toBoolean" => {
                let text = self.pop_str()?;
                self.push(Operand::Int(parse_bool(&text)? as i64));
            }
            "MacroExecutor.parseLong" => {
                let text = self.pop_str()?;
                self.push(Operand::Long(parse_long(&text)?));
            }
            "MacroExecutor.parseDouble" => {
                let text = self.pop_str()?;
                self.push(Operand::Double(parse_double(&text)?));
            }

            "MacroExecutor.uniqueL" => self.push(Operand::Long(instance.next_unique_l() as i64)),
            "MacroExecutor.uniqueG" => self.push(Operand::Long(instance.unique_g() as i64)),
            "MacroExecutor.environment" => {
                let name = self.pop_str()?;
                self.push(Operand::Str(std::env::var(&name).unwrap_or_default()));
            }

            "MacroExecutor.error" => {
                let message = self.pop_str()?;
                let (line, col) = args
                    .split_once(',')
                    .and_then(|(l, c)| Some((l.trim().parse::<usize>().ok()?, c.trim().parse::<usize>().ok()?)))
                    .ok_or_else(|| self.fault(format!("bad error position '{}'", args)))?;
                return Err(Error::syntax(message, line, col).into());
            }

            other => return Err(RuntimeError::InvalidFormat(format!("unknown static method '{}'", other))),
        }
        Ok(())
    }

    // ===== Operand stack =====

    fn push(&mut self, operand: Operand) {
        self.stack.push(operand);
    }

    fn pop(&mut self) -> RuntimeResult<Operand> {
        self.stack.pop().ok_or_else(|| self.fault("stack underflow"))
    }

    fn peek(&self) -> RuntimeResult<&Operand> {
        self.stack.last().ok_or_else(|| self.fault("stack underflow"))
    }

    fn pop_long(&mut self) -> RuntimeResult<i64> {
        match self.pop()? {
            Operand::Long(v) => Ok(v),
            other => Err(self.mismatch("long", &other)),
        }
    }

    fn pop_double(&mut self) -> RuntimeResult<f64> {
        match self.pop()? {
            Operand::Double(v) => Ok(v),
            other => Err(self.mismatch("double", &other)),
        }
    }

    fn pop_int(&mut self) -> RuntimeResult<i64> {
        match self.pop()? {
            Operand::Int(v) => Ok(v),
            other => Err(self.mismatch("int", &other)),
        }
    }

    fn pop_str(&mut self) -> RuntimeResult<String> {
        match self.pop()? {
            Operand::Str(v) => Ok(v),
            other => Err(self.mismatch("string", &other)),
        }
    }

    fn pop_array(&mut self) -> RuntimeResult<Value> {
        match self.pop()? {
            Operand::Array(v) => Ok(v),
            other => Err(self.mismatch("array", &other)),
        }
    }

    fn pop_slot(&mut self) -> RuntimeResult<usize> {
        match self.pop()? {
            Operand::Slot(v) => Ok(v),
            other => Err(self.mismatch("slot", &other)),
        }
    }

    /// Pop the value a setter with accessor `accessor` stores
    fn pop_value(&mut self, accessor: &str) -> RuntimeResult<Value> {
        Ok(match accessor {
            "Long" => Value::Int(self.pop_long()?),
            "Double" => Value::Real(self.pop_double()?),
            "String" => Value::Str(self.pop_str()?),
            "Boolean" => Value::Bool(self.pop_int()? != 0),
            "Array" => self.pop_array()?,
            other => return Err(self.fault(format!("unknown accessor '{}'", other))),
        })
    }

    /// Parse an `ldc2_w` operand: `5L` is a long, anything else a double
    fn constant(&self, text: &str) -> RuntimeResult<Operand> {
        let parsed = match text.strip_suffix('L') {
            Some(long) => long.parse::<i64>().ok().map(Operand::Long),
            None => text.parse::<f64>().ok().map(Operand::Double),
        };
        parsed.ok_or_else(|| self.fault(format!("bad ldc2_w operand '{}'", text)))
    }

    fn fault(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::ExecutionError { pc: self.pc.saturating_sub(1), message: message.into() }
    }

    fn mismatch(&self, wanted: &str, found: &Operand) -> RuntimeError {
        self.fault(format!("expected {} on the stack, found {}", wanted, found.describe()))
    }
}

fn arith_op(name: &str) -> Option<ArithOp> {
    match name {
        "add" => Some(ArithOp::Add),
        "sub" => Some(ArithOp::Sub),
        "mul" => Some(ArithOp::Mul),
        "div" => Some(ArithOp::Div),
        "rem" => Some(ArithOp::Rem),
        _ => None,
    }
}

/// Stack cell for a scalar read through accessor `accessor`
fn scalar_operand(accessor: &str, value: &Value) -> RuntimeResult<Operand> {
    Ok(match accessor {
        "Long" => Operand::Long(value.as_int()?),
        "Double" => Operand::Double(value.as_real()?),
        "String" => Operand::Str(value.as_str()?.to_string()),
        _ => Operand::Int(value.as_bool()? as i64),
    })
}

/// Split `source` on `separator`. An empty source has no parts and an empty
/// separator leaves the source whole.
pub fn split(source: &str, separator: &str) -> Vec<String> {
    if source.is_empty() {
        Vec::new()
    } else if separator.is_empty() {
        vec![source.to_string()]
    } else {
        source.split(separator).map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macro_core::{build, MacroTemplate};

    fn instance(header: &str) -> MacroInstance {
        let def = build(&format!("m .macro {}\ntext\n\t.mend\n", header)).unwrap();
        MacroTemplate::new(def).instantiate()
    }

    fn run(code: &str, pool: &str, instance: &mut MacroInstance) -> RuntimeResult<String> {
        let program = Program::parse(code)?;
        Executor::new(10_000).run(&program, pool, instance)
    }

    #[test]
    fn test_program_skips_directives_and_resolves_labels() {
        let program = Program::parse("\t.class\tC\n; note\nstart:\n\tgoto\tstart\nend:\n\treturn\n").unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.target("start").unwrap(), 0);
        assert_eq!(program.target("end").unwrap(), 1);
        assert_eq!(program.instructions()[0].operand.as_deref(), Some("start"));
        assert!(program.target("missing").is_err());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        assert!(matches!(Program::parse("a:\na:\n"), Err(RuntimeError::InvalidFormat(_))));
    }

    #[test]
    fn test_pool_text_reaches_output() {
        let mut inst = instance("");
        let code = "\taload_2\n\taload_3\n\tldc\t0\n\tldc\t5\n\tinvokestatic\tMacroExecutor.extract\n\tinvokevirtual\tOut.append\n\treturn\n";
        assert_eq!(run(code, "hello world", &mut inst).unwrap(), "hello");
    }

    #[test]
    fn test_slot_store_and_load() {
        let mut inst = instance("x:int");
        let code = "\
\taload_1\n\tldc\t0\n\taaload\n\tldc2_w\t41L\n\tldc2_w\t1L\n\tladd\n\tinvokeinterface\tSlot.setLong\n\
\taload_2\n\taload_1\n\tldc\t0\n\taaload\n\tinvokestatic\tMacroExecutor.validate\n\
\tinvokeinterface\tSlot.getLong\n\tinvokestatic\tMacroExecutor.toStringLong\n\tinvokevirtual\tOut.append\n\treturn\n";
        assert_eq!(run(code, "", &mut inst).unwrap(), "42");
        assert_eq!(inst.get(0), Some(&Value::Int(42)));
    }

    #[test]
    fn test_validate_unset_slot() {
        let mut inst = instance("x:int=");
        let code = "\taload_1\n\tldc\t0\n\taaload\n\tinvokestatic\tMacroExecutor.validate\n\treturn\n";
        let err = run(code, "", &mut inst).unwrap_err();
        match err.as_macro() {
            Some(Error::CalculationError { message }) => assert!(message.contains("'x' has no value")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_division_by_zero() {
        let mut inst = instance("");
        let err = run("\tldc2_w\t1L\n\tldc2_w\t0L\n\tldiv\n\tpop2\n\treturn\n", "", &mut inst).unwrap_err();
        assert!(matches!(err.as_macro(), Some(Error::CalculationError { .. })));
    }

    #[test]
    fn test_dcmpg_treats_nan_as_greater() {
        let mut inst = instance("");
        let code = "\tldc2_w\tNaN\n\tldc2_w\t1.0\n\tdcmpg\n\tifgt\tyes\n\treturn\nyes:\n\taload_2\n\taload_3\n\tldc\t0\n\tldc\t1\n\tinvokestatic\tMacroExecutor.extract\n\tinvokevirtual\tOut.append\n\treturn\n";
        assert_eq!(run(code, "Y", &mut inst).unwrap(), "Y");
    }

    #[test]
    fn test_wide_dup_and_pop() {
        let mut inst = instance("");
        let code = "\tldc2_w\t7L\n\tdup2\n\tlcmp\n\tifne\tbad\n\ticonst_1\n\ticonst_0\n\tdup2\n\tpop2\n\tpop2\n\treturn\nbad:\n\tnew\tMissing\n";
        assert_eq!(run(code, "", &mut inst).unwrap(), "");
    }

    #[test]
    fn test_step_limit() {
        let mut inst = instance("");
        let program = Program::parse("spin:\n\tgoto\tspin\n").unwrap();
        let err = Executor::new(50).run(&program, "", &mut inst).unwrap_err();
        assert!(matches!(err, RuntimeError::StepLimit(50)));
    }

    #[test]
    fn test_error_call_carries_position() {
        let mut inst = instance("");
        let code = "\taload_3\n\tldc\t0\n\tldc\t4\n\tinvokestatic\tMacroExecutor.extract\n\tinvokestatic\tMacroExecutor.error\t3,7\n";
        let err = run(code, "boom", &mut inst).unwrap_err();
        assert_eq!(
            err.as_macro(),
            Some(&Error::SyntaxError { message: "boom".to_string(), line: 3, col: 7 })
        );
    }

    #[test]
    fn test_stack_type_mismatch_is_execution_error() {
        let mut inst = instance("");
        let err = run("\ticonst_1\n\tlneg\n", "", &mut inst).unwrap_err();
        assert!(matches!(err, RuntimeError::ExecutionError { pc: 1, .. }));
    }

    #[test]
    fn test_split_edges() {
        assert!(split("", ",").is_empty());
        assert_eq!(split("a,b", ""), vec!["a,b"]);
        assert_eq!(split("a,,b", ","), vec!["a", "", "b"]);
    }
}
