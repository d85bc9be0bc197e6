//! Expression and statement lowering to Wasm text.
//!
//! The right-hand-side compiler produces i64 expression snippets in one of
//! two access modes: `Curr` reads a signal's committed value from the slot
//! memory, `Next` reads the per-statement staged local. Width discipline is
//! uniform: every operand is masked to its declared width before use, and
//! signed operands are additionally sign-extended through the `$sign`
//! helper.
//!
//! Left-hand sides are lowered by a recursive sink: given the snippet for
//! the value being assigned, each lvalue node emits the code that stores it,
//! with read-modify-write on the staged local for partial targets.

use std::collections::HashSet;

use hdlsim_common::{unsigned, Shape, SignalRef, SimError, SimResult};

use crate::ast::{BinaryOp, Statement, UnaryOp, Value};
use crate::emitter::WatBuilder;

/// Allocator of dense slot indices keyed by signal identity.
///
/// The simulation state implements this; compiler tests use a local
/// implementation. Slot indices become immediate constants in the emitted
/// module, so allocation must be stable for a module's lifetime.
pub trait SignalMap {
    /// Index of `signal`'s slot, allocating one on first sight.
    fn slot_index(&mut self, signal: &SignalRef) -> usize;
}

/// Access mode for signal reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read the committed value from slot memory.
    Curr,
    /// Read the staged `$next_<index>` local.
    Next,
}

/// How a unit's staged output locals are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStyle {
    /// Combinational: start from the signal's reset constant.
    Reset,
    /// Synchronous (and coroutine statements): start from the slot's stored
    /// `next` value in memory.
    StoredNext,
}

/// A compiled unit: module text plus the signals it reads and writes.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// Complete Wasm text module exporting `run`.
    pub wat: String,
    /// Signals read in `Curr` mode.
    pub inputs: HashSet<SignalRef>,
    /// Signals driven by the unit, in declaration order.
    pub outputs: Vec<SignalRef>,
}

/// Compute a node's shape, rejecting widths a slot cannot hold.
fn checked_shape(value: &Value) -> SimResult<Shape> {
    let shape = value.shape();
    if shape.width > Shape::MAX_WIDTH {
        return Err(SimError::OversizeValue {
            loc: value.to_string(),
            width: shape.width,
        });
    }
    Ok(shape)
}

fn parse_pattern(pattern: &str) -> SimResult<(u64, u64, bool)> {
    let mut mask = 0u64;
    let mut value = 0u64;
    let mut wildcard = false;
    for ch in pattern.chars() {
        if ch == '_' {
            continue;
        }
        mask <<= 1;
        value <<= 1;
        match ch {
            '-' => wildcard = true,
            '0' => mask |= 1,
            '1' => {
                mask |= 1;
                value |= 1;
            }
            _ => {
                return Err(SimError::Compile(format!(
                    "invalid character {ch:?} in switch pattern {pattern:?}"
                )))
            }
        }
    }
    Ok((mask, value, wildcard))
}

struct CodeGen<'a, M: SignalMap> {
    map: &'a mut M,
    builder: WatBuilder,
    inputs: HashSet<SignalRef>,
}

impl<'a, M: SignalMap> CodeGen<'a, M> {
    fn new(map: &'a mut M) -> Self {
        CodeGen {
            map,
            builder: WatBuilder::new(),
            inputs: HashSet::new(),
        }
    }

    /// Raw expression snippet; bits above the declared width are undefined
    /// and must be masked off by the consumer.
    fn rhs(&mut self, value: &Value, mode: AccessMode) -> SimResult<String> {
        checked_shape(value)?;
        match value {
            Value::Const { value, .. } => Ok(format!("(i64.const {value})")),
            Value::Signal(sig) => {
                let index = self.map.slot_index(sig);
                match mode {
                    AccessMode::Curr => {
                        self.inputs.insert(sig.clone());
                        Ok(format!("(i64.load (i32.const {}))", index * 16))
                    }
                    AccessMode::Next => Ok(format!("(local.get $next_{index})")),
                }
            }
            Value::Unary { op, arg } => self.rhs_unary(*op, arg, mode),
            Value::Binary { op, lhs, rhs } => self.rhs_binary(*op, lhs, rhs, mode),
            Value::Mux {
                sel,
                on_true,
                on_false,
            } => {
                let sel = self.umask(sel, mode)?;
                let on_true = self.smask(on_true, mode)?;
                let on_false = self.smask(on_false, mode)?;
                Ok(format!(
                    "(if (result i64) (i64.ne {sel} (i64.const 0)) (then {on_true}) (else {on_false}))"
                ))
            }
            Value::Slice {
                value: inner,
                start,
                stop,
            } => {
                let inner = self.umask(inner, mode)?;
                let mask = unsigned(stop.saturating_sub(*start)).mask() as i64;
                Ok(format!(
                    "(i64.and (i64.shr_u {inner} (i64.const {start})) (i64.const {mask}))"
                ))
            }
            Value::Part {
                value: inner,
                offset,
                width,
                stride,
            } => {
                let inner = self.umask(inner, mode)?;
                let offset = self.umask(offset, mode)?;
                let mask = unsigned(*width).mask() as i64;
                Ok(format!(
                    "(i64.and (i64.shr_u {inner} (i64.mul (i64.const {stride}) {offset})) \
                     (i64.const {mask}))"
                ))
            }
            Value::Cat(parts) => {
                if parts.is_empty() {
                    return Ok("(i64.const 0)".to_string());
                }
                let mut exprs = Vec::with_capacity(parts.len());
                let mut offset = 0u64;
                for part in parts {
                    let width = checked_shape(part)?.width;
                    let masked = self.umask(part, mode)?;
                    if offset == 0 {
                        exprs.push(masked);
                    } else {
                        exprs.push(format!("(i64.shl {masked} (i64.const {offset}))"));
                    }
                    offset += width;
                }
                let mut acc = exprs.pop().unwrap_or_else(|| "(i64.const 0)".to_string());
                while let Some(expr) = exprs.pop() {
                    acc = format!("(i64.or {expr} {acc})");
                }
                Ok(acc)
            }
            Value::ArrayProxy { elems, index } => {
                if elems.is_empty() {
                    return Err(SimError::Compile(format!(
                        "array proxy {value} has no elements"
                    )));
                }
                if elems.len() == 1 {
                    return self.smask(&elems[0], mode);
                }
                let idx_local = self.builder.alloc_local("idx");
                let idx = self.umask(index, mode)?;
                // the last element doubles as the out-of-range arm
                let mut acc = self.smask(&elems[elems.len() - 1], mode)?;
                for (pos, elem) in elems.iter().enumerate().take(elems.len() - 1).rev() {
                    let arm = self.smask(elem, mode)?;
                    let cond = if pos == 0 {
                        format!("(i64.eq (local.tee {idx_local} {idx}) (i64.const 0))")
                    } else {
                        format!("(i64.eq (local.get {idx_local}) (i64.const {pos}))")
                    };
                    acc = format!("(if (result i64) {cond} (then {arm}) (else {acc}))");
                }
                Ok(acc)
            }
        }
    }

    /// Expression masked to its declared width.
    fn umask(&mut self, value: &Value, mode: AccessMode) -> SimResult<String> {
        let shape = checked_shape(value)?;
        let raw = self.rhs(value, mode)?;
        Ok(format!(
            "(i64.and {raw} (i64.const {}))",
            shape.mask() as i64
        ))
    }

    /// Expression masked to its width and sign-extended if its shape is
    /// signed.
    fn smask(&mut self, value: &Value, mode: AccessMode) -> SimResult<String> {
        let shape = checked_shape(value)?;
        let masked = self.umask(value, mode)?;
        if shape.signed && shape.width > 0 {
            Ok(format!(
                "(call $sign {masked} (i64.const {}))",
                shape.sign_bit() as i64
            ))
        } else {
            Ok(masked)
        }
    }

    fn rhs_unary(&mut self, op: UnaryOp, arg: &Value, mode: AccessMode) -> SimResult<String> {
        match op {
            UnaryOp::Not => {
                let masked = self.umask(arg, mode)?;
                Ok(format!("(i64.xor {masked} (i64.const -1))"))
            }
            UnaryOp::Neg => {
                let extended = self.smask(arg, mode)?;
                Ok(format!("(i64.mul {extended} (i64.const -1))"))
            }
            UnaryOp::Bool | UnaryOp::Any => {
                let masked = self.umask(arg, mode)?;
                Ok(format!(
                    "(i64.extend_i32_u (i64.ne {masked} (i64.const 0)))"
                ))
            }
            UnaryOp::All => {
                let shape = checked_shape(arg)?;
                let masked = self.umask(arg, mode)?;
                Ok(format!(
                    "(i64.extend_i32_u (i64.eq {masked} (i64.const {})))",
                    shape.mask() as i64
                ))
            }
            UnaryOp::Xor => {
                let masked = self.umask(arg, mode)?;
                Ok(format!("(i64.and (i64.popcnt {masked}) (i64.const 1))"))
            }
            UnaryOp::AsUnsigned | UnaryOp::AsSigned => self.rhs(arg, mode),
        }
    }

    fn rhs_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Value,
        rhs: &Value,
        mode: AccessMode,
    ) -> SimResult<String> {
        let instr = match op {
            BinaryOp::Add => "i64.add",
            BinaryOp::Sub => "i64.sub",
            BinaryOp::Mul => "i64.mul",
            BinaryOp::And => "i64.and",
            BinaryOp::Or => "i64.or",
            BinaryOp::Xor => "i64.xor",
            BinaryOp::FloorDiv => {
                let l = self.smask(lhs, mode)?;
                let r = self.smask(rhs, mode)?;
                return Ok(format!("(call $zdiv {l} {r})"));
            }
            BinaryOp::Mod => {
                let l = self.smask(lhs, mode)?;
                let r = self.smask(rhs, mode)?;
                return Ok(format!("(call $zmod {l} {r})"));
            }
            BinaryOp::Shl => {
                let l = self.smask(lhs, mode)?;
                let r = self.umask(rhs, mode)?;
                return Ok(format!("(i64.shl {l} {r})"));
            }
            BinaryOp::Shr => {
                let l = self.umask(lhs, mode)?;
                let r = self.umask(rhs, mode)?;
                return Ok(format!("(i64.shr_u {l} {r})"));
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                let cmp = match op {
                    BinaryOp::Eq => "i64.eq",
                    BinaryOp::Ne => "i64.ne",
                    BinaryOp::Lt => "i64.lt_s",
                    BinaryOp::Le => "i64.le_s",
                    BinaryOp::Gt => "i64.gt_s",
                    _ => "i64.ge_s",
                };
                let l = self.smask(lhs, mode)?;
                let r = self.smask(rhs, mode)?;
                return Ok(format!("(i64.extend_i32_u ({cmp} {l} {r}))"));
            }
        };
        let l = self.smask(lhs, mode)?;
        let r = self.smask(rhs, mode)?;
        Ok(format!("({instr} {l} {r})"))
    }

    /// Emit the store of `expr` into `lvalue`.
    ///
    /// Rvalues appearing syntactically inside the lvalue (a part's offset,
    /// an array index) are compiled in `Curr` mode; staged values read back
    /// for read-modify-write use `Next` mode.
    fn emit_assign(&mut self, lvalue: &Value, expr: &str) -> SimResult<()> {
        checked_shape(lvalue)?;
        match lvalue {
            Value::Signal(sig) => {
                let index = self.map.slot_index(sig);
                let shape = sig.shape();
                let mut staged = format!("(i64.and {expr} (i64.const {}))", shape.mask() as i64);
                if shape.signed && shape.width > 0 {
                    staged = format!(
                        "(call $sign {staged} (i64.const {}))",
                        shape.sign_bit() as i64
                    );
                }
                self.builder
                    .line(format!("(local.set $next_{index} {staged})"));
                Ok(())
            }
            Value::Unary {
                op: UnaryOp::AsUnsigned | UnaryOp::AsSigned,
                arg,
            } => self.emit_assign(arg, expr),
            Value::Slice {
                value: inner,
                start,
                stop,
            } => {
                let mask = unsigned(stop.saturating_sub(*start)).mask();
                let keep = !(mask << start) as i64;
                let staged = self.rhs(inner, AccessMode::Next)?;
                let merged = format!(
                    "(i64.or (i64.and {staged} (i64.const {keep})) \
                     (i64.shl (i64.and {expr} (i64.const {})) (i64.const {start})))",
                    mask as i64
                );
                self.emit_assign(inner, &merged)
            }
            Value::Part {
                value: inner,
                offset,
                width,
                stride,
            } => {
                let mask = unsigned(*width).mask() as i64;
                let offset = self.umask(offset, AccessMode::Curr)?;
                let shift = self.builder.alloc_local("off");
                self.builder.line(format!(
                    "(local.set {shift} (i64.mul (i64.const {stride}) {offset}))"
                ));
                let staged = self.rhs(inner, AccessMode::Next)?;
                let merged = format!(
                    "(i64.or (i64.and {staged} (i64.xor (i64.shl (i64.const {mask}) \
                     (local.get {shift})) (i64.const -1))) \
                     (i64.shl (i64.and {expr} (i64.const {mask})) (local.get {shift})))"
                );
                self.emit_assign(inner, &merged)
            }
            Value::Cat(parts) => {
                let staged = self.builder.alloc_local("cat");
                self.builder.line(format!("(local.set {staged} {expr})"));
                let mut offset = 0u64;
                for part in parts {
                    let width = checked_shape(part)?.width;
                    let mask = unsigned(width).mask() as i64;
                    let sub = format!(
                        "(i64.and (i64.shr_u (local.get {staged}) (i64.const {offset})) \
                         (i64.const {mask}))"
                    );
                    self.emit_assign(part, &sub)?;
                    offset += width;
                }
                Ok(())
            }
            Value::ArrayProxy { elems, index } => {
                if elems.is_empty() {
                    return Ok(());
                }
                let staged = self.builder.alloc_local("val");
                self.builder.line(format!("(local.set {staged} {expr})"));
                if elems.len() == 1 {
                    return self.emit_assign(&elems[0], &format!("(local.get {staged})"));
                }
                let idx = self.umask(index, AccessMode::Curr)?;
                let idx_local = self.builder.alloc_local("idx");
                self.builder.line(format!("(local.set {idx_local} {idx})"));
                let value = format!("(local.get {staged})");
                let mut opened = 0usize;
                for (pos, elem) in elems.iter().enumerate().take(elems.len() - 1) {
                    self.builder.open(format!(
                        "(if (i64.eq (local.get {idx_local}) (i64.const {pos}))"
                    ));
                    self.builder.open("(then");
                    self.emit_assign(elem, &value)?;
                    self.builder.close();
                    self.builder.open("(else");
                    opened += 1;
                }
                // out-of-range indices land on the last element
                self.emit_assign(&elems[elems.len() - 1], &value)?;
                for _ in 0..opened {
                    self.builder.close();
                    self.builder.close();
                }
                Ok(())
            }
            _ => Err(SimError::Compile(format!(
                "value {lvalue} is not a valid assignment target"
            ))),
        }
    }

    fn emit_statement(&mut self, stmt: &Statement) -> SimResult<()> {
        match stmt {
            Statement::Assign { lhs, rhs } => {
                let lhs_shape = checked_shape(lhs)?;
                let rhs_shape = checked_shape(rhs)?;
                let value = self.rhs(rhs, AccessMode::Curr)?;
                let mut result =
                    format!("(i64.and {value} (i64.const {}))", lhs_shape.mask() as i64);
                if rhs_shape.signed && lhs_shape.width > 0 {
                    result = format!(
                        "(call $sign {result} (i64.const {}))",
                        lhs_shape.sign_bit() as i64
                    );
                }
                self.emit_assign(lhs, &result)
            }
            Statement::Switch { test, cases } => {
                let value = self.umask(test, AccessMode::Curr)?;
                let test_local = self.builder.alloc_local("test");
                self.builder
                    .line(format!("(local.set {test_local} {value})"));

                let mut opened = 0usize;
                for case in cases {
                    let Some(patterns) = &case.patterns else {
                        // default arm: emitted in the innermost else
                        for stmt in &case.stmts {
                            self.emit_statement(stmt)?;
                        }
                        break;
                    };
                    let cond = case_condition(&test_local, patterns)?;
                    self.builder.open(format!("(if {cond}"));
                    self.builder.open("(then");
                    for stmt in &case.stmts {
                        self.emit_statement(stmt)?;
                    }
                    self.builder.close();
                    self.builder.open("(else");
                    opened += 1;
                }
                for _ in 0..opened {
                    self.builder.close();
                    self.builder.close();
                }
                Ok(())
            }
        }
    }

}

fn case_condition(test_local: &str, patterns: &[String]) -> SimResult<String> {
    if patterns.is_empty() {
        return Ok("(i32.const 1)".to_string());
    }
    let mut conds = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        if pattern.is_empty() {
            return Ok("(i32.const 1)".to_string());
        }
        let (mask, value, wildcard) = parse_pattern(pattern)?;
        if wildcard {
            conds.push(format!(
                "(i64.eq (i64.and (local.get {test_local}) (i64.const {})) (i64.const {}))",
                mask as i64, value as i64
            ));
        } else {
            conds.push(format!(
                "(i64.eq (local.get {test_local}) (i64.const {}))",
                value as i64
            ));
        }
    }
    let mut acc = conds.pop().unwrap_or_else(|| "(i32.const 0)".to_string());
    while let Some(cond) = conds.pop() {
        acc = format!("(i32.or {cond} {acc})");
    }
    Ok(acc)
}

/// Compile a value expression in `Curr` mode.
///
/// The module's `run` export returns the expression masked to its declared
/// width; the host normalizes the sign per the compile-time shape.
pub fn compile_value<M: SignalMap>(map: &mut M, value: &Value) -> SimResult<CompiledUnit> {
    let mut gen = CodeGen::new(map);
    let expr = gen.umask(value, AccessMode::Curr)?;
    gen.builder.push_result(&expr);
    Ok(CompiledUnit {
        wat: gen.builder.finish(),
        inputs: gen.inputs,
        outputs: Vec::new(),
    })
}

/// Compile a statement list driving `outputs`.
///
/// The preamble stages one `$next_<index>` local per output — initialized
/// from the reset constant for combinational units and from the stored
/// `next` in slot memory for synchronous ones — and the epilogue publishes
/// every staged value through `$slots_set`.
pub fn compile_statements<M: SignalMap>(
    map: &mut M,
    stmts: &[&Statement],
    outputs: &[SignalRef],
    init: InitStyle,
) -> SimResult<CompiledUnit> {
    let mut gen = CodeGen::new(map);
    for sig in outputs {
        let index = gen.map.slot_index(sig);
        gen.builder.declare_local(&format!("$next_{index}"));
        match init {
            InitStyle::Reset => {
                let reset = sig.reset();
                gen.builder
                    .line(format!("(local.set $next_{index} (i64.const {reset}))"));
            }
            InitStyle::StoredNext => {
                gen.builder.line(format!(
                    "(local.set $next_{index} (i64.load (i32.const {})))",
                    index * 16 + 8
                ));
            }
        }
    }
    for stmt in stmts {
        gen.emit_statement(stmt)?;
    }
    for sig in outputs {
        let index = gen.map.slot_index(sig);
        gen.builder.line(format!(
            "(call $slots_set (i64.const {index}) (local.get $next_{index}))"
        ));
    }
    Ok(CompiledUnit {
        wat: gen.builder.finish(),
        inputs: gen.inputs,
        outputs: outputs.to_vec(),
    })
}
