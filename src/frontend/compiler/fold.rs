// Myulax compiler peephole constant folder
// Created by: Zimeng Li <zimengli@mail.nwpu.edu.cn>
//
// Changelog:
//      26-06-20: Split out of mod.rs. The folder looks at the last one or two
//                emitted instructions (the emitter records their byte offsets)
//                and rewrites literal expressions in place

use super::Compiler;
use crate::common::object::Value;
use crate::common::opcode::OpCode;

impl<'src, 'h> Compiler<'src, 'h> {
    /// Emit `op`, or replace it and its two literal operands with a single
    /// literal load.
    pub(super) fn emit_binary_folded(&mut self, op: OpCode) {
        if !self.try_fold_binary(op) {
            self.emit_op(op);
        }
    }

    pub(super) fn emit_unary_folded(&mut self, op: OpCode) {
        if !self.try_fold_unary(op) {
            self.emit_op(op);
        }
    }

    /// Decode the instruction spanning exactly [start, end) as a literal load.
    /// Anything else (wrong width, not a literal opcode, bad constant index)
    /// disqualifies the fold.
    fn literal_at(&self, start: usize, end: usize) -> Option<Value> {
        let chunk = &self.states.last().unwrap().function.chunk;
        let code = &chunk.code;
        if start >= end || end > code.len() {
            return None;
        }
        let op = OpCode::try_from(code[start]).ok()?;
        match op {
            OpCode::Constant if end - start == 2 => {
                chunk.constants.get(code[start + 1] as usize).copied()
            }
            OpCode::Nil if end - start == 1 => Some(Value::Nil),
            OpCode::True if end - start == 1 => Some(Value::Boolean(true)),
            OpCode::False if end - start == 1 => Some(Value::Boolean(false)),
            _ => None,
        }
    }

    fn try_fold_binary(&mut self, op: OpCode) -> bool {
        let st = self.states.last().unwrap();
        let n = st.instr_starts.len();
        if n < 2 {
            return false;
        }
        let prev = st.instr_starts[n - 2];
        let last = st.instr_starts[n - 1];
        let count = st.function.chunk.count();

        let Some(lhs) = self.literal_at(prev, last) else {
            return false;
        };
        let Some(rhs) = self.literal_at(last, count) else {
            return false;
        };

        let folded = match (op, lhs, rhs) {
            (OpCode::Add, Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (OpCode::Subtract, Value::Number(a), Value::Number(b)) => Value::Number(a - b),
            (OpCode::Multiply, Value::Number(a), Value::Number(b)) => Value::Number(a * b),
            // division and modulo by zero must stay runtime errors
            (OpCode::Divide, Value::Number(a), Value::Number(b)) if b != 0.0 => {
                Value::Number(a / b)
            }
            (OpCode::Modulo, Value::Number(a), Value::Number(b)) if b != 0.0 => {
                Value::Number(a % b)
            }
            (OpCode::Greater, Value::Number(a), Value::Number(b)) => Value::Boolean(a > b),
            (OpCode::Less, Value::Number(a), Value::Number(b)) => Value::Boolean(a < b),
            // interning makes string equality a pointer comparison here too
            (OpCode::Equal, a, b) => Value::Boolean(a == b),
            (OpCode::Concat, Value::String(a), Value::String(b)) => {
                let joined = unsafe { format!("{}{}", (*a).data, (*b).data) };
                self.intern(&joined)
            }
            _ => return false,
        };

        let lhs_width = last - prev;
        self.rewind_to(prev);
        self.emit_folded(folded, lhs_width);
        true
    }

    fn try_fold_unary(&mut self, op: OpCode) -> bool {
        let st = self.states.last().unwrap();
        let Some(&last) = st.instr_starts.last() else {
            return false;
        };
        let count = st.function.chunk.count();

        let Some(operand) = self.literal_at(last, count) else {
            return false;
        };

        let folded = match (op, operand) {
            (OpCode::Negate, Value::Number(n)) => Value::Number(-n),
            (OpCode::Not, v) => Value::Boolean(!v.is_truthy()),
            _ => return false,
        };

        let operand_width = count - last;
        self.rewind_to(last);
        self.emit_folded(folded, operand_width);
        true
    }

    /// The replacement must occupy the folded literal's footprint: an and/or
    /// merge jump may already be patched to land right behind it, and that
    /// target has to stay on an instruction boundary. 1-byte literals can only
    /// fold into nil/boolean results, which have 1-byte loads of their own.
    fn emit_folded(&mut self, value: Value, width: usize) {
        if width == 1 {
            match value {
                Value::Nil => return self.emit_op(OpCode::Nil),
                Value::Boolean(true) => return self.emit_op(OpCode::True),
                Value::Boolean(false) => return self.emit_op(OpCode::False),
                _ => {}
            }
        }
        self.emit_constant(value);
    }

    /// Drop the operand instructions; orphaned pool entries are tolerated the
    /// same way re-interned identifier constants are. The boundary history is
    /// popped, not cleared, so the constant emitted next still has the
    /// instruction before `offset` as its neighbor and an enclosing fold can
    /// keep collapsing ('1 + 2 * 3' must end up as one CONSTANT).
    fn rewind_to(&mut self, offset: usize) {
        let st = self.state();
        st.function.chunk.truncate(offset);
        while st.instr_starts.last().is_some_and(|&start| start >= offset) {
            st.instr_starts.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::vm::heap::Heap;
    use crate::common::object::{Function, GCObject, Value};
    use crate::common::opcode::OpCode;
    use crate::frontend::compiler::compile;

    fn compiled_ops(heap: &mut Heap, source: &str) -> Vec<OpCode> {
        let function: *mut GCObject<Function> =
            compile(source, "fold_test.mlx", heap).expect("source must compile");
        let chunk = unsafe { &(*function).data.chunk };
        let mut ops = Vec::new();
        let mut i = 0;
        while i < chunk.code.len() {
            let op = OpCode::try_from(chunk.code[i]).expect("valid opcode stream");
            ops.push(op);
            i += 1 + op.operand_len();
            if op == OpCode::Closure {
                // trailing upvalue pairs are not interesting to these tests
                break;
            }
        }
        ops
    }

    fn constant_count(ops: &[OpCode]) -> usize {
        ops.iter().filter(|op| **op == OpCode::Constant).count()
    }

    #[test]
    fn arithmetic_chain_folds_to_one_constant() {
        let mut heap = Heap::new();
        let ops = compiled_ops(&mut heap, "local x = 1 + 2 * 3");
        assert_eq!(constant_count(&ops), 1);
        assert!(!ops.contains(&OpCode::Add));
        assert!(!ops.contains(&OpCode::Multiply));
    }

    #[test]
    fn nested_folds_compose_across_precedence_levels() {
        let mut heap = Heap::new();
        let ops = compiled_ops(&mut heap, "local x = 1 + 2 * 3 - 4 / 2");
        assert_eq!(constant_count(&ops), 1);
        assert!(!ops.contains(&OpCode::Add));
        assert!(!ops.contains(&OpCode::Subtract));
        assert!(!ops.contains(&OpCode::Multiply));
        assert!(!ops.contains(&OpCode::Divide));
    }

    #[test]
    fn folded_value_matches_evaluation() {
        let mut heap = Heap::new();
        let function = compile("local x = 2 * 21", "fold_test.mlx", &mut heap).unwrap();
        let constants = unsafe { &(*function).data.chunk.constants };
        assert!(constants.iter().any(|c| *c == Value::Number(42.0)));
    }

    #[test]
    fn division_by_zero_never_folds() {
        let mut heap = Heap::new();
        let ops = compiled_ops(&mut heap, "local x = 1 / 0");
        assert!(ops.contains(&OpCode::Divide));
        let ops = compiled_ops(&mut heap, "local x = 1 % 0");
        assert!(ops.contains(&OpCode::Modulo));
    }

    #[test]
    fn string_concat_folds_through_interning() {
        let mut heap = Heap::new();
        let function = compile("local s = \"foo\" .. \"bar\"", "fold_test.mlx", &mut heap).unwrap();
        let chunk = unsafe { &(*function).data.chunk };
        let folded = chunk.constants.iter().any(|c| match c {
            Value::String(ptr) => unsafe { (*(*ptr)).data == "foobar" },
            _ => false,
        });
        assert!(folded);
        // and the CONCAT op is gone
        assert!(!chunk.code.contains(&(OpCode::Concat as u8)));
    }

    #[test]
    fn comparisons_between_numbers_fold() {
        let mut heap = Heap::new();
        let ops = compiled_ops(&mut heap, "local b = 1 < 2");
        assert!(!ops.contains(&OpCode::Less));
        assert_eq!(constant_count(&ops), 1);
    }

    #[test]
    fn equality_between_literals_folds() {
        let mut heap = Heap::new();
        let ops = compiled_ops(&mut heap, "local b = nil == nil");
        assert!(!ops.contains(&OpCode::Equal));
    }

    #[test]
    fn unary_minus_on_number_folds() {
        let mut heap = Heap::new();
        let function = compile("local n = -(3 + 4)", "fold_test.mlx", &mut heap).unwrap();
        let constants = unsafe { &(*function).data.chunk.constants };
        assert!(constants.iter().any(|c| *c == Value::Number(-7.0)));
    }

    #[test]
    fn non_literal_operands_do_not_fold() {
        let mut heap = Heap::new();
        let ops = compiled_ops(&mut heap, "local a = 1 local b = a + 2");
        assert!(ops.contains(&OpCode::Add));
    }
}
