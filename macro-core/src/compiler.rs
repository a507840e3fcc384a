//! Code generator
//!
//! Lowers a [`MacroDef`] to stack-machine instruction text. Fixed fragments
//! come from the [`TemplateRepo`]; control flow uses numbered labels
//! (`label1`, `label2`, ...). Boolean expressions are compiled against a
//! branch context: a pair of optional jump targets for the true and false
//! outcomes. When both are absent the value is materialized as `0`/`1`.
//!
//! String constants are not inlined: they live in a pool emitted next to the
//! code and are referenced by byte range.

use std::collections::HashMap;
use std::fmt::Display;

use tracing::debug;

use crate::ast::{
    ArithOp, Branch, Case, Command, CompareOp, Expr, LogicalOp, MacroDef, SlotRef, UnaryOp,
};
use crate::error::{Error, Result};
use crate::template::{NameKeeper, TemplateRepo};
use crate::types::intrinsics::Intrinsic;
use crate::types::{render_real, Value, ValueKind};

/// Output of one compilation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMacro {
    pub name: String,
    /// Instruction text, one instruction or label per line
    pub code: String,
    /// String pool referenced by `extract` ranges
    pub strings: String,
}

impl CompiledMacro {
    /// Number of instruction lines (labels and directives excluded)
    pub fn instruction_count(&self) -> usize {
        self.code.lines().filter(|l| l.starts_with('\t') && !l.trim_start().starts_with('.')).count()
    }

    pub fn label_count(&self) -> usize {
        self.code.lines().filter(|l| l.ends_with(':')).count()
    }
}

/// Break/continue targets of an enclosing loop, linked to the loop outside it
#[derive(Debug)]
struct JumpFrame<'p> {
    parent: Option<&'p JumpFrame<'p>>,
    label: Option<&'p str>,
    break_label: String,
    continue_label: String,
    /// Choice selectors already on the operand stack when the loop was entered
    choice_depth: usize,
}

impl<'p> JumpFrame<'p> {
    fn find(&self, label: Option<&str>) -> Option<&JumpFrame<'p>> {
        match label {
            None => Some(self),
            Some(name) if self.label == Some(name) => Some(self),
            Some(_) => self.parent.and_then(|p| p.find(label)),
        }
    }
}

/// Where control goes for each outcome of a condition; `None` falls through
#[derive(Debug, Clone, Default)]
struct BranchCtx {
    on_true: Option<String>,
    on_false: Option<String>,
}

impl BranchCtx {
    fn value() -> Self {
        Self::default()
    }

    fn when_true(label: &str) -> Self {
        Self { on_true: Some(label.to_string()), on_false: None }
    }

    fn when_false(label: &str) -> Self {
        Self { on_true: None, on_false: Some(label.to_string()) }
    }

    fn is_value(&self) -> bool {
        self.on_true.is_none() && self.on_false.is_none()
    }

    fn swapped(&self) -> Self {
        Self { on_true: self.on_false.clone(), on_false: self.on_true.clone() }
    }
}

pub struct Compiler<'t> {
    templates: &'t TemplateRepo,
    class_name: String,
    fold: bool,

    /// Root scope: names visible to every part
    names: NameKeeper<'static>,

    /// Label counter for control flow
    next_label: usize,

    /// Counter for `.forall` iteration locals
    next_each: usize,

    /// Generated code
    code: String,

    /// String pool and its index
    strings: String,
    pooled: HashMap<String, (usize, usize)>,

    /// Kinds of the `.choise` selectors currently on the operand stack
    choices: Vec<ValueKind>,

    /// Some `.exit` jumps to `macroExit`
    need_mark_exit: bool,
}

impl<'t> Compiler<'t> {
    pub fn new(templates: &'t TemplateRepo) -> Self {
        Self {
            templates,
            class_name: "MacroClass".to_string(),
            fold: true,
            names: NameKeeper::new(),
            next_label: 1,
            next_each: 1,
            code: String::new(),
            strings: String::new(),
            pooled: HashMap::new(),
            choices: Vec::new(),
            need_mark_exit: false,
        }
    }

    pub fn with_class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    /// Enable or disable constant folding
    pub fn with_folding(mut self, fold: bool) -> Self {
        self.fold = fold;
        self
    }

    pub fn compile(&mut self, def: &MacroDef) -> Result<CompiledMacro> {
        self.reset();
        self.names.put("className", &self.class_name).put("macroName", &def.name);

        self.part("start", &[])?;
        self.compile_block(&def.body, None)?;
        if self.need_mark_exit {
            self.part("markedFinish", &[])?;
        } else {
            self.part("finish", &[])?;
        }

        let compiled = CompiledMacro {
            name: def.name.clone(),
            code: std::mem::take(&mut self.code),
            strings: std::mem::take(&mut self.strings),
        };
        debug!(
            name = %compiled.name,
            instructions = compiled.instruction_count(),
            labels = self.next_label - 1,
            pool = compiled.strings.len(),
            "macro compiled"
        );
        Ok(compiled)
    }

    fn reset(&mut self) {
        self.names = NameKeeper::new();
        self.next_label = 1;
        self.next_each = 1;
        self.code.clear();
        self.strings.clear();
        self.pooled.clear();
        self.choices.clear();
        self.need_mark_exit = false;
    }

    // ===== Commands =====

    fn compile_block(&mut self, commands: &[Command], frame: Option<&JumpFrame<'_>>) -> Result<()> {
        for command in commands {
            self.compile_command(command, frame)?;
        }
        Ok(())
    }

    fn compile_command(&mut self, command: &Command, frame: Option<&JumpFrame<'_>>) -> Result<()> {
        match command {
            Command::Set { target, value, .. } => {
                self.prepare(target)?;
                self.gen_value(value)?;
                self.part(store_part(target.kind), &[])
            }

            Command::SetIndexed { target, index, value, .. } => {
                self.prepare(target)?;
                self.gen_value(index)?;
                self.op0("l2i");
                self.gen_value(value)?;
                self.part(store_index_part(target.kind), &[])
            }

            Command::If { branches, otherwise, .. } => self.compile_if(branches, otherwise.as_deref(), frame),

            Command::While { label, condition, body, .. } => {
                let again = self.fresh_label();
                let brk = self.fresh_label();
                self.label(&again);
                self.gen_condition(condition, BranchCtx::when_false(&brk))?;
                let inner = self.loop_frame(frame, label.as_deref(), &brk, &again);
                self.compile_block(body, Some(&inner))?;
                self.op("goto", &again);
                self.label(&brk);
                Ok(())
            }

            Command::For { label, var, init, limit, step, body, .. } => {
                let again = self.fresh_label();
                let cont = self.fresh_label();
                let brk = self.fresh_label();

                self.prepare(var)?;
                self.gen_value(init)?;
                self.part(store_part(var.kind), &[])?;

                self.label(&again);
                let var_expr = Expr::Slot(var.clone());
                self.gen_value(&var_expr)?;
                self.gen_value(limit)?;
                let test = if is_negative_constant(step) { CompareOp::Ge } else { CompareOp::Le };
                self.compare(test, var.kind, BranchCtx::when_false(&brk))?;

                let inner = self.loop_frame(frame, label.as_deref(), &brk, &cont);
                self.compile_block(body, Some(&inner))?;

                self.label(&cont);
                self.prepare(var)?;
                self.gen_value(&var_expr)?;
                self.gen_value(step)?;
                self.op0(if var.kind == ValueKind::Real { "dadd" } else { "ladd" });
                self.part(store_part(var.kind), &[])?;
                self.op("goto", &again);
                self.label(&brk);
                Ok(())
            }

            Command::ForEach { label, var, source, separator, body, .. } => {
                let array = format!("eachArray{}", self.next_each);
                let index = format!("eachIndex{}", self.next_each);
                self.next_each += 1;
                let again = self.fresh_label();
                let cont = self.fresh_label();
                let brk = self.fresh_label();

                self.gen_value(source)?;
                self.gen_value(separator)?;
                self.op("invokestatic", "MacroExecutor.split");
                self.op("astore", &array);
                self.op0("iconst_0");
                self.op("istore", &index);

                self.label(&again);
                self.op("iload", &index);
                self.op("aload", &array);
                self.op0("arraylength");
                self.op("if_icmpge", &brk);
                self.prepare(var)?;
                self.op("aload", &array);
                self.op("iload", &index);
                self.op0("aaload");
                self.part("storeString", &[])?;

                let inner = self.loop_frame(frame, label.as_deref(), &brk, &cont);
                self.compile_block(body, Some(&inner))?;

                self.label(&cont);
                self.op("iinc", format!("{} 1", index));
                self.op("goto", &again);
                self.label(&brk);
                Ok(())
            }

            Command::Break { label, .. } => self.jump(frame, label.as_deref(), true),
            Command::Continue { label, .. } => self.jump(frame, label.as_deref(), false),

            Command::Choice { selector, cases, otherwise, .. } => {
                self.compile_choice(selector, cases, otherwise.as_deref(), frame)
            }

            Command::MError { message, line, col } => {
                self.gen_value(message)?;
                self.part("merror", &[("line", line), ("col", col)])
            }

            Command::Exit { .. } => {
                self.pop_choices(0);
                self.op("goto", "macroExit");
                self.need_mark_exit = true;
                Ok(())
            }

            Command::Substitution { parts, .. } => {
                for part in parts {
                    match part {
                        Expr::Constant(Value::Str(text)) if text.is_empty() => {}
                        Expr::Constant(Value::Str(text)) => {
                            let (from, to) = self.pool(text);
                            self.part("substitutionConst", &[("fromIndex", &from), ("toIndex", &to)])?;
                        }
                        other => {
                            self.op0("aload_2");
                            self.gen_value(other)?;
                            self.op("invokevirtual", "Out.append");
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn compile_if(
        &mut self,
        branches: &[Branch],
        otherwise: Option<&[Command]>,
        frame: Option<&JumpFrame<'_>>,
    ) -> Result<()> {
        let end = self.fresh_label();
        for branch in branches {
            let next = self.fresh_label();
            self.gen_condition(&branch.condition, BranchCtx::when_false(&next))?;
            self.compile_block(&branch.body, frame)?;
            if !ends_terminal(&branch.body) {
                self.op("goto", &end);
            }
            self.label(&next);
        }
        if let Some(body) = otherwise {
            self.compile_block(body, frame)?;
        }
        self.label(&end);
        Ok(())
    }

    /// The selector stays on the operand stack for the whole command; every
    /// `.of` compares a duplicate and the single copy is dropped at the end
    fn compile_choice(
        &mut self,
        selector: &Expr,
        cases: &[Case],
        otherwise: Option<&[Command]>,
        frame: Option<&JumpFrame<'_>>,
    ) -> Result<()> {
        let kind = selector.kind();
        let end = self.fresh_label();
        self.gen_value(selector)?;
        self.choices.push(kind);

        for case in cases {
            let next = self.fresh_label();
            self.op0(if kind.is_wide() { "dup2" } else { "dup" });
            self.gen_value(&case.value)?;
            self.compare(CompareOp::Eq, kind, BranchCtx::when_false(&next))?;
            self.compile_block(&case.body, frame)?;
            if !ends_terminal(&case.body) {
                self.op("goto", &end);
            }
            self.label(&next);
        }
        if let Some(body) = otherwise {
            self.compile_block(body, frame)?;
        }
        self.label(&end);
        self.choices.pop();
        self.op0(if kind.is_wide() { "pop2" } else { "pop" });
        Ok(())
    }

    fn loop_frame<'p>(
        &self,
        parent: Option<&'p JumpFrame<'p>>,
        label: Option<&'p str>,
        break_label: &str,
        continue_label: &str,
    ) -> JumpFrame<'p> {
        JumpFrame {
            parent,
            label,
            break_label: break_label.to_string(),
            continue_label: continue_label.to_string(),
            choice_depth: self.choices.len(),
        }
    }

    fn jump(&mut self, frame: Option<&JumpFrame<'_>>, label: Option<&str>, is_break: bool) -> Result<()> {
        let target = frame.and_then(|f| f.find(label)).ok_or_else(|| {
            Error::internal(format!(
                "unresolved jump target {}",
                label.unwrap_or("(nearest loop)")
            ))
        })?;
        self.pop_choices(target.choice_depth);
        let destination = if is_break { &target.break_label } else { &target.continue_label };
        self.op("goto", destination);
        Ok(())
    }

    /// Drop selectors above `depth`, innermost first, without forgetting them:
    /// code after the jump still belongs to the enclosing choices
    fn pop_choices(&mut self, depth: usize) {
        let drops: Vec<&'static str> = self.choices[depth.min(self.choices.len())..]
            .iter()
            .rev()
            .map(|k| if k.is_wide() { "pop2" } else { "pop" })
            .collect();
        for drop in drops {
            self.op0(drop);
        }
    }

    // ===== Values =====

    /// Constant value of `expr`, when it is a literal or folding applies
    fn folded(&self, expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Constant(value) => Some(value.clone()),
            e if self.fold && e.is_constant() => e.evaluate_constant().ok(),
            _ => None,
        }
    }

    fn gen_constant(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Int(v) => self.op("ldc2_w", format!("{}L", v)),
            Value::Real(v) => self.op("ldc2_w", render_real(*v)),
            Value::Bool(v) => self.op0(if *v { "iconst_1" } else { "iconst_0" }),
            Value::Str(text) => {
                let (from, to) = self.pool(text);
                return self.part("extractCharConst", &[("fromIndex", &from), ("toIndex", &to)]);
            }
            array => {
                return Err(Error::internal(format!("array constant of kind {} in code", array.kind())));
            }
        }
        Ok(())
    }

    /// Push the value of `expr`
    fn gen_value(&mut self, expr: &Expr) -> Result<()> {
        if let Some(value) = self.folded(expr) {
            return self.gen_constant(&value);
        }
        match expr {
            Expr::Constant(value) => self.gen_constant(value),

            Expr::Slot(slot) => {
                self.prepare(slot)?;
                self.part("validateVarValue", &[])?;
                let getter = if slot.kind.is_array() {
                    "Slot.getArray".to_string()
                } else {
                    format!("Slot.get{}", slot.kind.accessor())
                };
                self.op("invokeinterface", getter);
                Ok(())
            }

            Expr::Index { slot, index } => {
                self.prepare(slot)?;
                self.part("validateVarValue", &[])?;
                self.gen_value(index)?;
                self.op0("l2i");
                self.op("invokeinterface", format!("Slot.get{}At", slot.kind.accessor()));
                Ok(())
            }

            Expr::Unary { op: UnaryOp::Neg, operand } => {
                self.gen_value(operand)?;
                self.op0(if operand.kind() == ValueKind::Real { "dneg" } else { "lneg" });
                Ok(())
            }

            Expr::Unary { op: UnaryOp::Not, operand } => {
                self.gen_value(operand)?;
                self.op0("iconst_1");
                self.op0("ixor");
                Ok(())
            }

            Expr::Arithmetic { op, kind, left, right } => {
                self.gen_value(left)?;
                self.gen_value(right)?;
                self.op0(arith_opcode(*op, *kind));
                Ok(())
            }

            Expr::Compare { op, left, right } => {
                self.gen_value(left)?;
                self.gen_value(right)?;
                self.compare(*op, left.kind(), BranchCtx::value())
            }

            Expr::Logical { op, operands } => {
                let jump = self.fresh_label();
                let after = self.fresh_label();
                let (ctx, fall_value, jump_value) = match op {
                    LogicalOp::And => (BranchCtx::when_false(&jump), "iconst_1", "iconst_0"),
                    LogicalOp::Or => (BranchCtx::when_true(&jump), "iconst_0", "iconst_1"),
                };
                for operand in operands {
                    self.gen_condition(operand, ctx.clone())?;
                }
                self.part(
                    "materializeBoolean",
                    &[
                        ("fallValue", &fall_value),
                        ("labelAfter", &after),
                        ("labelJump", &jump),
                        ("jumpValue", &jump_value),
                    ],
                )
            }

            Expr::Ternary { condition, then_branch, else_branch } => {
                let else_label = self.fresh_label();
                let after = self.fresh_label();
                self.gen_condition(condition, BranchCtx::when_false(&else_label))?;
                self.gen_value(then_branch)?;
                self.part("ternaryElse", &[("labelAfter", &after), ("labelElse", &else_label)])?;
                self.gen_value(else_branch)?;
                self.part("ternaryAfter", &[("labelAfter", &after)])
            }

            Expr::Concat(operands) => {
                self.part("concatBefore", &[])?;
                for operand in operands {
                    self.gen_value(operand)?;
                    self.part("concatAppend", &[])?;
                }
                self.part("concatAfter", &[])
            }

            Expr::Call { function, args } => self.gen_call(*function, args),
        }
    }

    fn gen_call(&mut self, function: Intrinsic, args: &[Expr]) -> Result<()> {
        let arg = args.first();
        let arg_kind = arg.map(Expr::kind);
        match (function, arg) {
            (Intrinsic::UniqueL, _) => self.op("invokestatic", "MacroExecutor.uniqueL"),
            (Intrinsic::UniqueG, _) => self.op("invokestatic", "MacroExecutor.uniqueG"),

            (Intrinsic::Exists, Some(Expr::Slot(slot))) => {
                self.prepare(slot)?;
                self.op("invokestatic", "MacroExecutor.valueExists");
            }

            (Intrinsic::Len, Some(Expr::Slot(slot))) if slot.kind.is_array() => {
                self.prepare(slot)?;
                self.part("validateVarValue", &[])?;
                self.op("invokeinterface", "Slot.size");
                self.op0("i2l");
            }
            (Intrinsic::Len, Some(value)) if value.kind() == ValueKind::String => {
                self.gen_value(value)?;
                self.op("invokestatic", "MacroExecutor.length");
            }

            (Intrinsic::Environment, Some(name)) => {
                self.gen_value(name)?;
                self.op("invokestatic", "MacroExecutor.environment");
            }

            (Intrinsic::Int | Intrinsic::Real | Intrinsic::Str | Intrinsic::Bool, Some(value)) => {
                self.gen_value(value)?;
                let dest = function.result_kind();
                match (dest, value.kind()) {
                    (d, s) if d == s => {}
                    (ValueKind::Integer, ValueKind::Real) => self.op0("d2l"),
                    (ValueKind::Integer, ValueKind::String) => self.op("invokestatic", "MacroExecutor.parseLong"),
                    (ValueKind::Real, ValueKind::Integer) => self.op0("l2d"),
                    (ValueKind::Real, ValueKind::String) => self.op("invokestatic", "MacroExecutor.parseDouble"),
                    (ValueKind::String, ValueKind::Integer) => self.op("invokestatic", "MacroExecutor.toStringLong"),
                    (ValueKind::String, ValueKind::Real) => self.op("invokestatic", "MacroExecutor.toStringDouble"),
                    (ValueKind::String, ValueKind::Boolean) => {
                        self.op("invokestatic", "MacroExecutor.toStringBoolean")
                    }
                    (ValueKind::String, s) if s.is_array() => self.op("invokestatic", "MacroExecutor.toStringList"),
                    (ValueKind::Boolean, ValueKind::String) => self.op("invokestatic", "MacroExecutor.toBoolean"),
                    (d, s) => {
                        return Err(Error::internal(format!("no conversion code from {} to {}", s, d)));
                    }
                }
            }

            (function, _) => {
                return Err(Error::internal(format!(
                    "{}() with argument kind {:?} reached the generator",
                    function, arg_kind
                )));
            }
        }
        Ok(())
    }

    // ===== Conditions =====

    /// Compile a boolean expression against `ctx`; a value context pushes 0/1
    fn gen_condition(&mut self, expr: &Expr, ctx: BranchCtx) -> Result<()> {
        if ctx.is_value() {
            return self.gen_value(expr);
        }
        if let Some(value) = self.folded(expr) {
            let target = if value.as_bool()? { ctx.on_true } else { ctx.on_false };
            if let Some(label) = target {
                self.op("goto", &label);
            }
            return Ok(());
        }
        match expr {
            Expr::Compare { op, left, right } => {
                self.gen_value(left)?;
                self.gen_value(right)?;
                self.compare(*op, left.kind(), ctx)
            }

            Expr::Unary { op: UnaryOp::Not, operand } => self.gen_condition(operand, ctx.swapped()),

            Expr::Logical { op: LogicalOp::And, operands } => {
                let (exit, placed) = match &ctx.on_false {
                    Some(label) => (label.clone(), false),
                    None => (self.fresh_label(), true),
                };
                self.chain(operands, BranchCtx::when_false(&exit), ctx)?;
                if placed {
                    self.label(&exit);
                }
                Ok(())
            }

            Expr::Logical { op: LogicalOp::Or, operands } => {
                let (exit, placed) = match &ctx.on_true {
                    Some(label) => (label.clone(), false),
                    None => (self.fresh_label(), true),
                };
                self.chain(operands, BranchCtx::when_true(&exit), ctx)?;
                if placed {
                    self.label(&exit);
                }
                Ok(())
            }

            other => {
                self.gen_value(other)?;
                self.branch_on_int("ifne", "ifeq", &ctx);
                Ok(())
            }
        }
    }

    /// Short-circuit chain: every operand but the last uses `early`
    fn chain(&mut self, operands: &[Expr], early: BranchCtx, last: BranchCtx) -> Result<()> {
        let Some((tail, head)) = operands.split_last() else {
            return Err(Error::internal("logical operator without operands"));
        };
        for operand in head {
            self.gen_condition(operand, early.clone())?;
        }
        self.gen_condition(tail, last)
    }

    /// Compare the two values on top of the stack and branch or materialize
    fn compare(&mut self, op: CompareOp, kind: ValueKind, ctx: BranchCtx) -> Result<()> {
        match kind {
            ValueKind::Integer => self.op0("lcmp"),
            ValueKind::Real => self.op0("dcmpg"),
            ValueKind::String => self.op("invokestatic", "MacroExecutor.compareStrings"),
            ValueKind::Boolean => self.op0("isub"),
            array => return Err(Error::internal(format!("comparison of {} reached the generator", array))),
        }
        if ctx.is_value() {
            let label_false = self.fresh_label();
            let label_true = self.fresh_label();
            let skip = op.inverse().branch();
            return self.part(
                "comparison",
                &[("skipCommand", &skip), ("labelFalse", &label_false), ("labelTrue", &label_true)],
            );
        }
        self.branch_on_int(op.branch(), op.inverse().branch(), &ctx);
        Ok(())
    }

    /// Emit the jumps for a context given the branch taken when the test holds
    /// and the one taken when it fails
    fn branch_on_int(&mut self, holds: &str, fails: &str, ctx: &BranchCtx) {
        match (&ctx.on_true, &ctx.on_false) {
            (Some(t), None) => self.op(holds, t),
            (None, Some(f)) => self.op(fails, f),
            (Some(t), Some(f)) => {
                self.op(holds, t);
                self.op("goto", f);
            }
            (None, None) => {}
        }
    }

    // ===== Helper Methods =====

    fn prepare(&mut self, slot: &SlotRef) -> Result<()> {
        self.part("prepareWrapper", &[("varIndex", &slot.index)])
    }

    /// Append template part `name` with part-local names layered over the root scope
    fn part(&mut self, name: &str, values: &[(&str, &dyn Display)]) -> Result<()> {
        let mut scope = self.names.push();
        for (key, value) in values {
            scope.put(key, value);
        }
        self.templates.append(&mut self.code, name, &scope)
    }

    fn op(&mut self, opcode: &str, operand: impl Display) {
        self.code.push_str(&format!("\t{}\t{}\n", opcode, operand));
    }

    fn op0(&mut self, opcode: &str) {
        self.code.push('\t');
        self.code.push_str(opcode);
        self.code.push('\n');
    }

    fn label(&mut self, label: &str) {
        self.code.push_str(label);
        self.code.push_str(":\n");
    }

    fn fresh_label(&mut self) -> String {
        let label = format!("label{}", self.next_label);
        self.next_label += 1;
        label
    }

    /// Byte range of `text` in the pool, reusing any earlier occurrence
    fn pool(&mut self, text: &str) -> (usize, usize) {
        if let Some(&range) = self.pooled.get(text) {
            return range;
        }
        let from = match self.strings.find(text) {
            Some(at) => at,
            None => {
                let at = self.strings.len();
                self.strings.push_str(text);
                at
            }
        };
        let range = (from, from + text.len());
        self.pooled.insert(text.to_string(), range);
        range
    }
}

fn store_part(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Integer => "storeInt",
        ValueKind::Real => "storeReal",
        ValueKind::String => "storeString",
        ValueKind::Boolean => "storeBoolean",
        _ => "storeArray",
    }
}

fn store_index_part(kind: ValueKind) -> &'static str {
    match kind.element_kind() {
        ValueKind::Integer => "storeIntIndex",
        ValueKind::Real => "storeRealIndex",
        ValueKind::String => "storeStringIndex",
        _ => "storeBooleanIndex",
    }
}

fn arith_opcode(op: ArithOp, kind: ValueKind) -> &'static str {
    let real = kind == ValueKind::Real;
    match (op, real) {
        (ArithOp::Add, false) => "ladd",
        (ArithOp::Sub, false) => "lsub",
        (ArithOp::Mul, false) => "lmul",
        (ArithOp::Div, false) => "ldiv",
        (ArithOp::Rem, false) => "lrem",
        (ArithOp::Add, true) => "dadd",
        (ArithOp::Sub, true) => "dsub",
        (ArithOp::Mul, true) => "dmul",
        (ArithOp::Div, true) => "ddiv",
        (ArithOp::Rem, true) => "drem",
    }
}

fn ends_terminal(body: &[Command]) -> bool {
    body.last().is_some_and(Command::is_terminal)
}

/// A `.for` step known to be below zero counts down; any other step tests `<=`
fn is_negative_constant(step: &Expr) -> bool {
    match step.evaluate_constant() {
        Ok(Value::Int(v)) => step.is_constant() && v < 0,
        Ok(Value::Real(v)) => step.is_constant() && v < 0.0,
        _ => false,
    }
}
