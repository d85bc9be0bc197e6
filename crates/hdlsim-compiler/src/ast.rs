//! Elaborated expression and statement tree.
//!
//! This is the input contract of the compiler: the HDL frontend hands over
//! fully elaborated values over fixed-width integer signals. Shape inference
//! follows the source value system: mixed-signedness operands promote the
//! unsigned side to `signed(width + 1)` before the operator rule applies,
//! and inferred widths saturate rather than wrap so that pathological
//! expressions (a wide dynamic left shift, for instance) are diagnosed
//! instead of silently truncated.

use std::collections::HashSet;
use std::fmt;

use hdlsim_common::{signed, unsigned, Shape, SignalRef};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Bitwise complement (`~`).
    Not,
    /// Arithmetic negation (`-`).
    Neg,
    /// Truth value (`b`): 1 iff any bit set.
    Bool,
    /// Reduction OR (`r|`).
    Any,
    /// Reduction AND (`r&`).
    All,
    /// Reduction XOR (`r^`): parity.
    Xor,
    /// Reinterpret as unsigned (`u`).
    AsUnsigned,
    /// Reinterpret as signed (`s`).
    AsSigned,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Flooring division (`//`): rounds toward negative infinity, `/0 -> 0`.
    FloorDiv,
    /// Modulo (`%`): result takes the divisor's sign, `/0 -> 0`.
    Mod,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Or,
    /// Bitwise XOR.
    Xor,
    /// Logical shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less-than (signed compare over promoted operands).
    Lt,
    /// Less-or-equal.
    Le,
    /// Greater-than.
    Gt,
    /// Greater-or-equal.
    Ge,
}

/// An elaborated expression yielding a fixed-width integer.
#[derive(Debug, Clone)]
pub enum Value {
    /// Integer constant with an explicit shape.
    Const {
        /// Constant value, normalized to `shape`.
        value: i64,
        /// Width and signedness.
        shape: Shape,
    },
    /// Read of a signal.
    Signal(SignalRef),
    /// Unary operator application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        arg: Box<Value>,
    },
    /// Binary operator application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Value>,
        /// Right operand.
        rhs: Box<Value>,
    },
    /// Two-way multiplexer: `on_true` when `sel` is non-zero.
    Mux {
        /// Select value.
        sel: Box<Value>,
        /// Value when `sel != 0`.
        on_true: Box<Value>,
        /// Value when `sel == 0`.
        on_false: Box<Value>,
    },
    /// Static bit slice `[start..stop)`.
    Slice {
        /// Sliced value.
        value: Box<Value>,
        /// First bit, inclusive.
        start: u64,
        /// Last bit, exclusive.
        stop: u64,
    },
    /// Dynamic part select: `width` bits at `stride * offset`.
    Part {
        /// Selected value.
        value: Box<Value>,
        /// Dynamic offset, masked to its own width.
        offset: Box<Value>,
        /// Number of bits selected.
        width: u64,
        /// Offset multiplier (1 for bit select, `width` for word select).
        stride: u64,
    },
    /// Concatenation, first part in the least significant bits.
    Cat(Vec<Value>),
    /// Indexed choice between elaborated elements; an out-of-range index
    /// resolves to the last element.
    ArrayProxy {
        /// Element values.
        elems: Vec<Value>,
        /// Dynamic index.
        index: Box<Value>,
    },
}

fn promote_mixed(a: Shape, b: Shape) -> (Shape, Shape) {
    match (a.signed, b.signed) {
        (false, true) => (signed(a.width.saturating_add(1)), b),
        (true, false) => (a, signed(b.width.saturating_add(1))),
        _ => (a, b),
    }
}

fn bitwise_shape(a: Shape, b: Shape) -> Shape {
    let (a, b) = promote_mixed(a, b);
    Shape {
        width: a.width.max(b.width),
        signed: a.signed || b.signed,
    }
}

impl Value {
    /// Constant with the minimal shape able to represent `value`.
    pub fn int(value: i64) -> Value {
        Value::Const {
            value,
            shape: Shape::for_value(value),
        }
    }

    /// Constant with an explicit width; negative values become signed, as in
    /// the source value system.
    pub fn bits(value: i64, width: u64) -> Value {
        let shape = Shape {
            width,
            signed: value < 0,
        };
        Value::Const {
            value: shape.normalize(value),
            shape,
        }
    }

    /// Constant with an explicit shape.
    pub fn shaped(value: i64, shape: Shape) -> Value {
        Value::Const {
            value: shape.normalize(value),
            shape,
        }
    }

    /// Width and signedness of this expression.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Const { shape, .. } => *shape,
            Value::Signal(sig) => sig.shape(),
            Value::Unary { op, arg } => {
                let a = arg.shape();
                match op {
                    UnaryOp::Not => a,
                    UnaryOp::Neg => signed(a.width.saturating_add(1)),
                    UnaryOp::Bool | UnaryOp::Any | UnaryOp::All | UnaryOp::Xor => unsigned(1),
                    UnaryOp::AsUnsigned => unsigned(a.width),
                    UnaryOp::AsSigned => signed(a.width),
                }
            }
            Value::Binary { op, lhs, rhs } => {
                let a = lhs.shape();
                let b = rhs.shape();
                match op {
                    BinaryOp::Add | BinaryOp::Sub => {
                        let s = bitwise_shape(a, b);
                        Shape {
                            width: s.width.saturating_add(1),
                            signed: s.signed,
                        }
                    }
                    BinaryOp::Mul => Shape {
                        width: a.width.saturating_add(b.width),
                        signed: a.signed || b.signed,
                    },
                    BinaryOp::FloorDiv => Shape {
                        width: a.width.saturating_add(u64::from(b.signed)),
                        signed: a.signed,
                    },
                    BinaryOp::Mod => b,
                    BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => bitwise_shape(a, b),
                    BinaryOp::Shl => {
                        let reach = if b.width >= 64 {
                            u64::MAX
                        } else {
                            (1u64 << b.width) - 1
                        };
                        Shape {
                            width: a.width.saturating_add(reach),
                            signed: a.signed,
                        }
                    }
                    BinaryOp::Shr => a,
                    BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge => unsigned(1),
                }
            }
            Value::Mux {
                on_true, on_false, ..
            } => bitwise_shape(on_true.shape(), on_false.shape()),
            Value::Slice { start, stop, .. } => unsigned(stop.saturating_sub(*start)),
            Value::Part { width, .. } => unsigned(*width),
            Value::Cat(parts) => unsigned(
                parts
                    .iter()
                    .fold(0u64, |acc, p| acc.saturating_add(p.shape().width)),
            ),
            Value::ArrayProxy { elems, .. } => {
                let mut unsigned_width = 0u64;
                let mut signed_width = 0u64;
                let (mut has_unsigned, mut has_signed) = (false, false);
                for elem in elems {
                    let s = elem.shape();
                    if s.signed {
                        has_signed = true;
                        signed_width = signed_width.max(s.width);
                    } else {
                        has_unsigned = true;
                        unsigned_width = unsigned_width.max(s.width);
                    }
                }
                if has_signed && has_unsigned {
                    signed(signed_width.max(unsigned_width.saturating_add(1)))
                } else {
                    Shape {
                        width: signed_width.max(unsigned_width),
                        signed: has_signed,
                    }
                }
            }
        }
    }

    fn unary(op: UnaryOp, arg: Value) -> Value {
        Value::Unary {
            op,
            arg: Box::new(arg),
        }
    }

    fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        Value::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Bitwise complement.
    pub fn not_(self) -> Value {
        Value::unary(UnaryOp::Not, self)
    }

    /// Arithmetic negation.
    pub fn neg(self) -> Value {
        Value::unary(UnaryOp::Neg, self)
    }

    /// Truth value: 1 iff any bit set.
    pub fn bool_(self) -> Value {
        Value::unary(UnaryOp::Bool, self)
    }

    /// Reduction OR.
    pub fn any(self) -> Value {
        Value::unary(UnaryOp::Any, self)
    }

    /// Reduction AND.
    pub fn all(self) -> Value {
        Value::unary(UnaryOp::All, self)
    }

    /// Reduction XOR (parity).
    pub fn xor_reduce(self) -> Value {
        Value::unary(UnaryOp::Xor, self)
    }

    /// Reinterpret as unsigned.
    pub fn as_unsigned(self) -> Value {
        Value::unary(UnaryOp::AsUnsigned, self)
    }

    /// Reinterpret as signed.
    pub fn as_signed(self) -> Value {
        Value::unary(UnaryOp::AsSigned, self)
    }

    /// Absolute value, lowered to `Mux(self >= 0, self, -self)` for signed
    /// values and the identity for unsigned ones.
    pub fn abs(self) -> Value {
        if self.shape().signed {
            mux(self.clone().ge(Value::int(0)), self.clone(), self.neg())
        } else {
            self
        }
    }

    /// Addition.
    pub fn add(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Add, self, rhs)
    }

    /// Subtraction.
    pub fn sub(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Sub, self, rhs)
    }

    /// Multiplication.
    pub fn mul(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Mul, self, rhs)
    }

    /// Flooring division.
    pub fn floor_div(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::FloorDiv, self, rhs)
    }

    /// Modulo with the divisor's sign.
    pub fn modulo(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Mod, self, rhs)
    }

    /// Bitwise AND.
    pub fn and_(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::And, self, rhs)
    }

    /// Bitwise OR.
    pub fn or_(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Or, self, rhs)
    }

    /// Bitwise XOR.
    pub fn xor_(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Xor, self, rhs)
    }

    /// Logical shift left.
    pub fn shl(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Shl, self, rhs)
    }

    /// Logical shift right.
    pub fn shr(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Shr, self, rhs)
    }

    /// Shift left by a constant amount.
    pub fn shift_left(self, amount: u64) -> Value {
        self.shl(Value::int(amount as i64))
    }

    /// Shift right by a constant amount.
    pub fn shift_right(self, amount: u64) -> Value {
        self.shr(Value::int(amount as i64))
    }

    /// Rotate left by a constant amount (negative rotates right).
    pub fn rotate_left(self, amount: i64) -> Value {
        let width = self.shape().width;
        if width == 0 {
            return self;
        }
        let amount = amount.rem_euclid(width as i64) as u64;
        if amount == 0 {
            return self;
        }
        // low part moves up, high part wraps down
        cat(vec![
            self.clone().slice(width - amount, width),
            self.slice(0, width - amount),
        ])
    }

    /// Rotate right by a constant amount (negative rotates left).
    pub fn rotate_right(self, amount: i64) -> Value {
        self.rotate_left(-amount)
    }

    /// Equality compare.
    pub fn eq(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Eq, self, rhs)
    }

    /// Inequality compare.
    pub fn ne(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Ne, self, rhs)
    }

    /// Less-than compare.
    pub fn lt(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Lt, self, rhs)
    }

    /// Less-or-equal compare.
    pub fn le(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Le, self, rhs)
    }

    /// Greater-than compare.
    pub fn gt(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Gt, self, rhs)
    }

    /// Greater-or-equal compare.
    pub fn ge(self, rhs: Value) -> Value {
        Value::binary(BinaryOp::Ge, self, rhs)
    }

    /// Static bit slice `[start..stop)`.
    pub fn slice(self, start: u64, stop: u64) -> Value {
        Value::Slice {
            value: Box::new(self),
            start,
            stop,
        }
    }

    /// Single-bit slice.
    pub fn bit(self, index: u64) -> Value {
        self.slice(index, index + 1)
    }

    /// Dynamic bit select: `width` bits starting at bit `offset`.
    pub fn bit_select(self, offset: Value, width: u64) -> Value {
        Value::Part {
            value: Box::new(self),
            offset: Box::new(offset),
            width,
            stride: 1,
        }
    }

    /// Dynamic word select: word `index` of `width` bits.
    pub fn word_select(self, index: Value, width: u64) -> Value {
        Value::Part {
            value: Box::new(self),
            offset: Box::new(index),
            width,
            stride: width,
        }
    }

    /// Concatenate `count` copies of this value.
    pub fn replicate(self, count: usize) -> Value {
        cat(std::iter::repeat(self).take(count).collect())
    }

    /// Assignment statement with this value as the target.
    pub fn assign(self, rhs: Value) -> Statement {
        Statement::Assign { lhs: self, rhs }
    }

    /// Signals read by this expression.
    pub fn signals(&self) -> HashSet<SignalRef> {
        let mut out = HashSet::new();
        self.collect_signals(&mut out);
        out
    }

    fn collect_signals(&self, out: &mut HashSet<SignalRef>) {
        match self {
            Value::Const { .. } => {}
            Value::Signal(sig) => {
                out.insert(sig.clone());
            }
            Value::Unary { arg, .. } => arg.collect_signals(out),
            Value::Binary { lhs, rhs, .. } => {
                lhs.collect_signals(out);
                rhs.collect_signals(out);
            }
            Value::Mux {
                sel,
                on_true,
                on_false,
            } => {
                sel.collect_signals(out);
                on_true.collect_signals(out);
                on_false.collect_signals(out);
            }
            Value::Slice { value, .. } => value.collect_signals(out),
            Value::Part { value, offset, .. } => {
                value.collect_signals(out);
                offset.collect_signals(out);
            }
            Value::Cat(parts) => {
                for p in parts {
                    p.collect_signals(out);
                }
            }
            Value::ArrayProxy { elems, index } => {
                for e in elems {
                    e.collect_signals(out);
                }
                index.collect_signals(out);
            }
        }
    }
}

impl From<&SignalRef> for Value {
    fn from(sig: &SignalRef) -> Value {
        Value::Signal(sig.clone())
    }
}

/// Concatenation, first part in the least significant bits.
pub fn cat(parts: Vec<Value>) -> Value {
    Value::Cat(parts)
}

/// Two-way multiplexer.
pub fn mux(sel: Value, on_true: Value, on_false: Value) -> Value {
    Value::Mux {
        sel: Box::new(sel),
        on_true: Box::new(on_true),
        on_false: Box::new(on_false),
    }
}

/// Indexed choice between elements.
pub fn array(elems: Vec<Value>, index: Value) -> Value {
    Value::ArrayProxy {
        elems,
        index: Box::new(index),
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Not => "~",
            UnaryOp::Neg => "-",
            UnaryOp::Bool => "b",
            UnaryOp::Any => "r|",
            UnaryOp::All => "r&",
            UnaryOp::Xor => "r^",
            UnaryOp::AsUnsigned => "u",
            UnaryOp::AsSigned => "s",
        };
        f.write_str(s)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const { value, shape } => write!(f, "(const {value}'{})", shape.width),
            Value::Signal(sig) => write!(f, "{sig}"),
            Value::Unary { op, arg } => write!(f, "({op} {arg})"),
            Value::Binary { op, lhs, rhs } => write!(f, "({op} {lhs} {rhs})"),
            Value::Mux {
                sel,
                on_true,
                on_false,
            } => write!(f, "(m {sel} {on_true} {on_false})"),
            Value::Slice { value, start, stop } => write!(f, "(slice {value} {start}:{stop})"),
            Value::Part {
                value,
                offset,
                width,
                stride,
            } => write!(f, "(part {value} {offset} {width} {stride})"),
            Value::Cat(parts) => {
                write!(f, "(cat")?;
                for p in parts {
                    write!(f, " {p}")?;
                }
                write!(f, ")")
            }
            Value::ArrayProxy { elems, index } => {
                write!(f, "(proxy {index}")?;
                for e in elems {
                    write!(f, " {e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One arm of a [`Statement::Switch`].
#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Match patterns; `None` is the default arm, an empty list or an empty
    /// pattern string matches anything. Patterns are MSB-first strings of
    /// `0`, `1`, and `-` (don't care).
    pub patterns: Option<Vec<String>>,
    /// Statements of this arm.
    pub stmts: Vec<Statement>,
}

impl SwitchCase {
    /// Arm matching the given patterns.
    pub fn new(patterns: Vec<&str>, stmts: Vec<Statement>) -> Self {
        SwitchCase {
            patterns: Some(patterns.into_iter().map(String::from).collect()),
            stmts,
        }
    }

    /// Default arm.
    pub fn default_case(stmts: Vec<Statement>) -> Self {
        SwitchCase {
            patterns: None,
            stmts,
        }
    }
}

/// An elaborated statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// Assignment of `rhs` to the lvalue `lhs`.
    Assign {
        /// Target (signal, slice, part, cat, or array proxy).
        lhs: Value,
        /// Source expression.
        rhs: Value,
    },
    /// First-match-wins case dispatch over `test`.
    Switch {
        /// Dispatch value.
        test: Value,
        /// Arms in priority order.
        cases: Vec<SwitchCase>,
    },
}

impl Statement {
    /// Case dispatch statement.
    pub fn switch(test: Value, cases: Vec<SwitchCase>) -> Statement {
        Statement::Switch { test, cases }
    }

    /// Signals written by this statement.
    pub fn lhs_signals(&self) -> HashSet<SignalRef> {
        let mut out = HashSet::new();
        self.collect_lhs_signals(&mut out);
        out
    }

    fn collect_lhs_signals(&self, out: &mut HashSet<SignalRef>) {
        match self {
            Statement::Assign { lhs, .. } => lhs.collect_signals(out),
            Statement::Switch { cases, .. } => {
                for case in cases {
                    for stmt in &case.stmts {
                        stmt.collect_lhs_signals(out);
                    }
                }
            }
        }
    }

    /// Signals read by this statement.
    pub fn rhs_signals(&self) -> HashSet<SignalRef> {
        let mut out = HashSet::new();
        self.collect_rhs_signals(&mut out);
        out
    }

    fn collect_rhs_signals(&self, out: &mut HashSet<SignalRef>) {
        match self {
            Statement::Assign { rhs, .. } => rhs.collect_signals(out),
            Statement::Switch { test, cases } => {
                test.collect_signals(out);
                for case in cases {
                    for stmt in &case.stmts {
                        stmt.collect_rhs_signals(out);
                    }
                }
            }
        }
    }
}
