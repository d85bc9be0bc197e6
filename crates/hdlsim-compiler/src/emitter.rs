//! Textual Wasm module builder.
//!
//! Each compiled unit becomes one Wasm text module with a fixed prolog: the
//! shared slot memory import, the host notification import, and the helper
//! functions every lowering relies on. The body of the exported `run`
//! function is accumulated line by line with indentation tracked for
//! readability; locals are allocated with unique suffixes so nested
//! lowerings never collide.

use std::fmt::Write;

/// Builder for one Wasm text module.
#[derive(Debug, Default)]
pub struct WatBuilder {
    locals: Vec<String>,
    body: Vec<String>,
    indent: usize,
    next_tmp: u64,
    has_result: bool,
}

impl WatBuilder {
    /// Fresh builder with an empty `run` body.
    pub fn new() -> Self {
        WatBuilder::default()
    }

    /// Append one instruction line at the current depth.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let mut s = String::new();
        for _ in 0..self.indent {
            s.push_str("  ");
        }
        s.push_str(text.as_ref());
        self.body.push(s);
    }

    /// Append a line and deepen nesting (an opened s-expression).
    pub fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    /// Close the innermost s-expression.
    pub fn close(&mut self) {
        debug_assert!(self.indent > 0);
        self.indent -= 1;
        self.line(")");
    }

    /// Allocate a fresh local with a unique suffix; returns its `$name`.
    pub fn alloc_local(&mut self, prefix: &str) -> String {
        let name = format!("${prefix}_{}", self.next_tmp);
        self.next_tmp += 1;
        self.locals.push(name.clone());
        name
    }

    /// Declare a local with an explicit name (e.g. a staged `next` value).
    pub fn declare_local(&mut self, name: &str) {
        self.locals.push(name.to_string());
    }

    /// Append the module's trailing result expression.
    pub fn push_result(&mut self, expr: &str) {
        self.line(expr);
        self.has_result = true;
    }

    /// Assemble the complete module text.
    pub fn finish(self) -> String {
        let mut out = String::new();
        out.push_str("(module\n");
        out.push_str("  (import \"\" \"gmem\" (memory 0 2))\n");
        out.push_str(
            "  (import \"\" \"slots_set_host\" (func $slots_set_host (param i64 i64)))\n\n",
        );
        out.push_str(HELPERS);
        out.push_str("\n  (func (export \"run\") (result i64)\n");
        for local in &self.locals {
            let _ = writeln!(out, "    (local {local} i64)");
        }
        for line in &self.body {
            let _ = writeln!(out, "    {line}");
        }
        if !self.has_result {
            out.push_str("    (i64.const 0)\n");
        }
        out.push_str("  )\n)\n");
        out
    }
}

/// Helper functions prepended to every module.
///
/// - `$slots_set` stages a slot's `next` value and notifies the host when it
///   changed, so the host can maintain the pending set.
/// - `$sign` sign-extends a width-masked value when its sign bit is set.
/// - `$zdiv` is flooring division with `/0 -> 0`.
/// - `$zmod` is modulo following the divisor's sign, with `/0 -> 0`.
const HELPERS: &str = r#"  (func $slots_set (param $index i64) (param $value i64)
    (local $addr i32)
    (local.set $addr (i32.wrap_i64 (i64.shl (local.get $index) (i64.const 4))))
    (if (i64.ne (i64.load offset=8 (local.get $addr)) (local.get $value))
      (then
        (i64.store offset=8 (local.get $addr) (local.get $value))
        (call $slots_set_host (local.get $index) (local.get $value))
      )
    )
  )

  (func $sign (param $value i64) (param $sign_bit i64) (result i64)
    (if (result i64) (i64.eqz (i64.and (local.get $value) (local.get $sign_bit)))
      (then (local.get $value))
      (else (i64.or (local.get $value) (i64.mul (local.get $sign_bit) (i64.const -2))))
    )
  )

  (func $zdiv (param $lhs i64) (param $rhs i64) (result i64)
    (local $quot i64)
    (if (result i64) (i64.eqz (local.get $rhs))
      (then (i64.const 0))
      (else
        (local.set $quot (i64.div_s (local.get $lhs) (local.get $rhs)))
        (if (result i64)
          (i32.and
            (i64.ne (i64.rem_s (local.get $lhs) (local.get $rhs)) (i64.const 0))
            (i64.lt_s (i64.xor (local.get $lhs) (local.get $rhs)) (i64.const 0))
          )
          (then (i64.sub (local.get $quot) (i64.const 1)))
          (else (local.get $quot))
        )
      )
    )
  )

  (func $zmod (param $lhs i64) (param $rhs i64) (result i64)
    (if (result i64) (i64.eqz (local.get $rhs))
      (then (i64.const 0))
      (else
        (i64.rem_s
          (i64.add (i64.rem_s (local.get $lhs) (local.get $rhs)) (local.get $rhs))
          (local.get $rhs)
        )
      )
    )
  )
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_valid(text: &str) {
        let bytes = wat::parse_str(text).expect("module text must assemble");
        wasmparser::validate(&bytes).expect("module must validate");
    }

    #[test]
    fn test_empty_module_balances_stack() {
        let builder = WatBuilder::new();
        let text = builder.finish();
        assert!(text.contains("(i64.const 0)"));
        assert_valid(&text);
    }

    #[test]
    fn test_result_expression() {
        let mut builder = WatBuilder::new();
        builder.push_result("(i64.const 42)");
        let text = builder.finish();
        assert!(!text.ends_with("(i64.const 0)\n  )\n)\n"));
        assert_valid(&text);
    }

    #[test]
    fn test_locals_and_nesting() {
        let mut builder = WatBuilder::new();
        let tmp = builder.alloc_local("tmp");
        let tmp2 = builder.alloc_local("tmp");
        assert_ne!(tmp, tmp2);
        builder.declare_local("$next_0");
        builder.line(format!("(local.set {tmp} (i64.const 7))"));
        builder.open("(if (i32.const 1)");
        builder.open("(then");
        builder.line(format!("(local.set $next_0 (local.get {tmp}))"));
        builder.close();
        builder.close();
        builder.line("(call $slots_set (i64.const 0) (local.get $next_0))");
        assert_valid(&builder.finish());
    }

    #[test]
    fn test_helpers_are_present() {
        let text = WatBuilder::new().finish();
        for helper in ["$slots_set", "$sign", "$zdiv", "$zmod"] {
            assert!(text.contains(helper), "missing helper {helper}");
        }
        assert!(text.contains("(import \"\" \"gmem\" (memory 0 2))"));
        assert!(text.contains("slots_set_host"));
    }
}
