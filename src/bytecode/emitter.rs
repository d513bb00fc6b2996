//! Scope stack and emission primitives.
//!
//! The [`Emitter`] owns every [`Scope`] of a compilation in an arena. The
//! compiler only ever talks to the *current* scope through the primitives
//! here; nested scopes are entered and left strictly depth-first, so a
//! child always finishes (and relays its captures) before its parent.

use tracing::{debug, trace};

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::ir::CodeObject;
use crate::bytecode::op::{Instruction, Opcode};
use crate::bytecode::scope::{
    Capture, LabelId, OuterDescriptor, Scope, ScopeId, ScopeKind,
};
use crate::bytecode::stack_effect;
use crate::config::CompilerConfig;
use crate::lang::value::Value;

/// Where an identifier lives, as seen from the current scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    Local(u32),
    Outer(u32),
    /// Constant index of the interned global name.
    Global(u32),
}

/// A finished child scope, already attached to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCode {
    /// Index in the parent's children.
    pub index: u32,
    /// How the parent fills each of the child's outer slots, in slot order.
    pub captures: Vec<Capture>,
}

pub struct Emitter<'a> {
    scopes: Vec<Scope<'a>>,
    current: ScopeId,
    config: CompilerConfig,
}

impl<'a> Emitter<'a> {
    pub fn new(config: CompilerConfig) -> Self {
        let root = Scope::new(ScopeKind::Global, None, config.debug_info);
        Self {
            scopes: vec![root],
            current: ScopeId(0),
            config,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn current_id(&self) -> ScopeId {
        self.current
    }

    pub fn current(&self) -> &Scope<'a> {
        &self.scopes[self.current.0]
    }

    pub fn current_mut(&mut self) -> &mut Scope<'a> {
        &mut self.scopes[self.current.0]
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope<'a>> {
        self.scopes.get(id.0)
    }

    // =========================================================================
    // Scope transitions
    // =========================================================================

    pub fn enter_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes
            .push(Scope::new(kind, Some(self.current), self.config.debug_info));
        debug!(scope = id.0, parent = self.current.0, ?kind, "enter scope");
        self.current = id;
        id
    }

    /// Finish the current scope: patch its jumps, relay its captures into
    /// the parent, lower it and attach the result to the parent.
    pub fn leave_scope(&mut self) -> Result<ChildCode, CompileError> {
        let child_id = self.current;
        let parent_id = self.scopes[child_id.0]
            .parent()
            .ok_or_else(|| CompileError::internal("leave_scope on the root scope"))?;
        if self.scopes[parent_id.0].is_ended() {
            return Err(CompileError::internal(format!(
                "scope {} relays into ended scope {}",
                child_id.0, parent_id.0
            )));
        }

        self.scopes[child_id.0].reconcile_labels()?;

        let descriptors = self.scopes[child_id.0].outers().to_vec();
        let mut captures = Vec::with_capacity(descriptors.len());
        for (i, desc) in descriptors.into_iter().enumerate() {
            if desc.up <= 1 {
                captures.push(Capture::Local(desc.slot));
                continue;
            }
            let relay = OuterDescriptor {
                slot: desc.slot,
                up: desc.up - 1,
            };
            let r = self.scopes[parent_id.0].outers.add(relay)?;
            trace!(
                child = child_id.0,
                parent = parent_id.0,
                slot = desc.slot,
                up = relay.up,
                relay = r,
                "relay capture"
            );
            self.scopes[child_id.0]
                .outers
                .set(i, OuterDescriptor { slot: r, up: 1 });
            captures.push(Capture::Outer(r));
        }

        let code = self.scopes[child_id.0].lower();
        debug!(
            scope = child_id.0,
            instructions = code.code.len(),
            max_stack = code.max_stack,
            outers = code.outer_count,
            "leave scope"
        );

        let parent = &mut self.scopes[parent_id.0];
        parent.children.push(code);
        self.current = parent_id;

        Ok(ChildCode {
            index: parent.children.len() as u32 - 1,
            captures,
        })
    }

    /// Lower the root scope into the program's code object.
    pub fn finish(mut self) -> Result<CodeObject, CompileError> {
        if self.current != ScopeId(0) {
            return Err(CompileError::internal(format!(
                "scope {} still open at end of program",
                self.current.0
            )));
        }
        let root = &mut self.scopes[0];
        root.reconcile_labels()?;
        if !root.outers().is_empty() {
            return Err(CompileError::internal("root scope has outer references"));
        }
        let code = root.lower();
        debug!(
            instructions = code.code.len(),
            children = code.children.len(),
            max_stack = code.max_stack,
            "program lowered"
        );
        Ok(code)
    }

    /// Emit the instruction that instantiates a finished child, followed by
    /// its capture list.
    pub fn emit_child(&mut self, op: Opcode, child: &ChildCode) -> Result<(), CompileError> {
        self.emit_unsigned(op, child.index)?;
        for capture in &child.captures {
            self.emit(capture.instruction()?)?;
        }
        Ok(())
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    pub fn emit(&mut self, ins: Instruction) -> Result<usize, CompileError> {
        let scope = self.current_mut();
        if scope.is_ended() {
            return Err(CompileError::internal("emit into an ended scope"));
        }
        let at = scope.buffer.push(ins);
        scope.adjust_depth(stack_effect::net(ins));
        Ok(at)
    }

    pub fn emit_op(&mut self, op: Opcode) -> Result<usize, CompileError> {
        self.emit(Instruction::simple(op))
    }

    pub fn emit_unsigned(&mut self, op: Opcode, operand: u32) -> Result<usize, CompileError> {
        self.emit(Instruction::with_unsigned(op, operand)?)
    }

    pub fn emit_pair(&mut self, op: Opcode, a: u32, b: u32) -> Result<usize, CompileError> {
        self.emit(Instruction::with_pair(op, a, b)?)
    }

    /// Placeholder jump to `label`, patched at scope end.
    pub fn emit_jump(&mut self, op: Opcode, label: LabelId) -> Result<usize, CompileError> {
        let at = self.emit_op(op)?;
        self.current_mut().labels.add_patch(label, at, op)?;
        Ok(at)
    }

    pub fn new_label(&mut self) -> LabelId {
        self.current_mut().new_label()
    }

    pub fn set_label(&mut self, label: LabelId) -> Result<(), CompileError> {
        self.current_mut().set_label(label)
    }

    /// Account for a value the runtime pushes outside the linear flow,
    /// such as the exception on handler entry.
    pub fn adjust_depth(&mut self, delta: i64) {
        self.current_mut().adjust_depth(delta);
    }

    /// `Line n` when `line` differs from the last marked line.
    pub fn mark_line(&mut self, line: u32) -> Result<(), CompileError> {
        if !self.config.line_markers || self.current().last_line == Some(line) {
            return Ok(());
        }
        self.current_mut().last_line = Some(line);
        self.emit_unsigned(Opcode::Line, line)?;
        Ok(())
    }

    /// Drop the value on top of the stack.
    ///
    /// `Dup; Store` followed by a discard becomes a bare `Store` when no
    /// jump lands on or after the `Dup`.
    pub fn discard(&mut self) -> Result<(), CompileError> {
        let scope = self.current_mut();
        let len = scope.buffer.len();
        if len >= 2 {
            let last = scope.buffer.get(len - 1).and_then(Instruction::opcode);
            let prev = scope.buffer.get(len - 2).and_then(Instruction::opcode);
            let dup_at = len - 2;
            if last.is_some_and(Opcode::is_store)
                && prev == Some(Opcode::Dup)
                && !scope.labels.any_resolved_at_or_after(dup_at)
            {
                scope.buffer.remove(dup_at);
                scope.adjust_depth(-1);
                trace!(at = dup_at, "elide dup before store");
                return Ok(());
            }
        }
        self.emit_op(Opcode::Pop)?;
        Ok(())
    }

    // =========================================================================
    // Constants and names
    // =========================================================================

    pub fn constant(&mut self, value: Value) -> Result<u32, CompileError> {
        self.current_mut().constants.add(value)
    }

    pub fn name_constant(&mut self, name: &str) -> Result<u32, CompileError> {
        self.current_mut().constants.add_name(name)
    }

    pub fn load_const(&mut self, value: Value) -> Result<(), CompileError> {
        let index = self.constant(value)?;
        self.emit_unsigned(Opcode::LoadConst, index)?;
        Ok(())
    }

    pub fn declare(&mut self, name: &str) -> Result<u32, CompileError> {
        self.current_mut().declare(name)
    }

    pub fn enter_block(&mut self) {
        self.current_mut().enter_block();
    }

    pub fn leave_block(&mut self) -> Result<(), CompileError> {
        self.current_mut().leave_block()
    }

    /// Resolve `name` from the current scope outwards, registering an
    /// outer descriptor when it lives in an enclosing scope.
    pub fn resolve(&mut self, name: &str) -> Result<Resolved, CompileError> {
        if let Some(slot) = self.current().lookup(name) {
            return Ok(Resolved::Local(slot));
        }

        let mut up = 0;
        let mut cursor = self.current().parent();
        while let Some(id) = cursor {
            up += 1;
            let scope = &self.scopes[id.0];
            if scope.is_ended() {
                return Err(CompileError::internal(format!(
                    "capture of '{}' through ended scope {}",
                    name, id.0
                )));
            }
            if let Some(slot) = scope.lookup(name) {
                let index = self
                    .current_mut()
                    .outers
                    .add(OuterDescriptor { slot, up })?;
                trace!(name, slot, up, index, "outer reference");
                return Ok(Resolved::Outer(index));
            }
            cursor = scope.parent();
        }

        Ok(Resolved::Global(self.name_constant(name)?))
    }

    pub fn load_name(&mut self, name: &str) -> Result<(), CompileError> {
        let ins = match self.resolve(name)? {
            Resolved::Local(slot) => Instruction::with_unsigned(Opcode::LoadLocal, slot)?,
            Resolved::Outer(index) => Instruction::with_unsigned(Opcode::LoadOuter, index)?,
            Resolved::Global(index) => Instruction::with_unsigned(Opcode::LoadGlobal, index)?,
        };
        self.emit(ins)?;
        Ok(())
    }

    pub fn store_name(&mut self, name: &str) -> Result<(), CompileError> {
        let ins = match self.resolve(name)? {
            Resolved::Local(slot) => Instruction::with_unsigned(Opcode::StoreLocal, slot)?,
            Resolved::Outer(index) => Instruction::with_unsigned(Opcode::StoreOuter, index)?,
            Resolved::Global(index) => Instruction::with_unsigned(Opcode::StoreGlobal, index)?,
        };
        self.emit(ins)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter() -> Emitter<'static> {
        Emitter::new(CompilerConfig::default())
    }

    fn u(op: Opcode, n: u32) -> Instruction {
        Instruction::with_unsigned(op, n).unwrap()
    }

    // =========================================================================
    // Name resolution
    // =========================================================================

    #[test]
    fn test_resolve_local_outer_global() {
        let mut e = emitter();
        e.declare("top").unwrap();
        e.enter_scope(ScopeKind::Local);
        e.declare("mine").unwrap();

        assert_eq!(e.resolve("mine").unwrap(), Resolved::Local(0));
        assert_eq!(e.resolve("top").unwrap(), Resolved::Outer(0));
        assert_eq!(e.resolve("top").unwrap(), Resolved::Outer(0));
        assert!(matches!(e.resolve("print").unwrap(), Resolved::Global(_)));
        assert_eq!(e.current().outers().len(), 1);
    }

    #[test]
    fn test_global_name_is_interned_once() {
        let mut e = emitter();
        e.load_name("print").unwrap();
        e.load_name("print").unwrap();
        e.store_name("print").unwrap();
        assert_eq!(e.current().constants().len(), 1);
        assert_eq!(
            e.current().code(),
            &[
                u(Opcode::LoadGlobal, 0),
                u(Opcode::LoadGlobal, 0),
                u(Opcode::StoreGlobal, 0)
            ]
        );
    }

    // =========================================================================
    // Closure chaining
    // =========================================================================

    #[test]
    fn test_three_level_capture_relays_through_middle() {
        let mut e = emitter();

        // fn a() { var x; fn b() { fn c() { x } } }
        e.enter_scope(ScopeKind::Local);
        let x = e.declare("x").unwrap();
        e.declare("pad").unwrap();
        let a = e.current_id();

        e.enter_scope(ScopeKind::Local);
        let b = e.current_id();

        e.enter_scope(ScopeKind::Local);
        let c = e.current_id();
        e.load_name("x").unwrap();
        e.emit_op(Opcode::Return).unwrap();
        assert_eq!(
            e.scope(c).unwrap().outers(),
            &[OuterDescriptor { slot: x, up: 2 }]
        );

        let c_code = e.leave_scope().unwrap();
        assert_eq!(c_code.captures, vec![Capture::Outer(0)]);
        assert_eq!(
            e.scope(c).unwrap().outers(),
            &[OuterDescriptor { slot: 0, up: 1 }]
        );
        assert_eq!(
            e.scope(b).unwrap().outers(),
            &[OuterDescriptor { slot: x, up: 1 }]
        );

        e.emit_child(Opcode::Closure, &c_code).unwrap();
        e.emit_op(Opcode::Return).unwrap();
        let b_code = e.leave_scope().unwrap();
        assert_eq!(b_code.captures, vec![Capture::Local(x)]);
        assert!(e.scope(a).unwrap().outers().is_empty());

        e.emit_child(Opcode::Closure, &b_code).unwrap();
        e.emit_op(Opcode::Return).unwrap();
        e.leave_scope().unwrap();

        let program = e.finish().unwrap();
        let a_obj = &program.children[0];
        let b_obj = &a_obj.children[0];
        let c_obj = &b_obj.children[0];
        assert_eq!(
            (a_obj.outer_count, b_obj.outer_count, c_obj.outer_count),
            (0, 1, 1)
        );
        assert_eq!(c_obj.code[0], u(Opcode::LoadOuter, 0));
        assert_eq!(
            &b_obj.code[..2],
            &[u(Opcode::Closure, 0), u(Opcode::CaptureOuter, 0)]
        );
        assert_eq!(
            &a_obj.code[..2],
            &[u(Opcode::Closure, 0), u(Opcode::CaptureLocal, x)]
        );
    }

    #[test]
    fn test_relay_is_shared_by_siblings() {
        let mut e = emitter();
        e.enter_scope(ScopeKind::Local);
        e.declare("x").unwrap();
        e.enter_scope(ScopeKind::Local);
        let middle = e.current_id();

        for _ in 0..2 {
            e.enter_scope(ScopeKind::Local);
            e.load_name("x").unwrap();
            e.emit_op(Opcode::Return).unwrap();
            let child = e.leave_scope().unwrap();
            assert_eq!(child.captures, vec![Capture::Outer(0)]);
        }
        assert_eq!(e.scope(middle).unwrap().outers().len(), 1);
    }

    #[test]
    fn test_leave_root_is_internal_error() {
        let mut e = emitter();
        assert!(e.leave_scope().unwrap_err().is_internal());
    }

    #[test]
    fn test_finish_with_open_scope_is_internal_error() {
        let mut e = emitter();
        e.enter_scope(ScopeKind::Local);
        assert!(e.finish().unwrap_err().is_internal());
    }

    // =========================================================================
    // Dup elision
    // =========================================================================

    #[test]
    fn test_discard_elides_dup_before_store() {
        let mut e = emitter();
        e.declare("x").unwrap();
        e.load_const(Value::Integer(1)).unwrap();
        e.emit_op(Opcode::Dup).unwrap();
        e.store_name("x").unwrap();
        e.discard().unwrap();

        assert_eq!(
            e.current().code(),
            &[u(Opcode::LoadConst, 0), u(Opcode::StoreLocal, 0)]
        );
        assert_eq!(e.current().depth(), 0);
    }

    #[test]
    fn test_discard_keeps_dup_when_label_lands_after_it() {
        let mut e = emitter();
        e.declare("x").unwrap();
        let l = e.new_label();
        e.load_const(Value::Integer(1)).unwrap();
        e.emit_op(Opcode::Dup).unwrap();
        e.set_label(l).unwrap();
        e.store_name("x").unwrap();
        e.discard().unwrap();

        assert_eq!(e.current().code().len(), 4);
        assert_eq!(e.current().code()[3], Instruction::simple(Opcode::Pop));
    }

    #[test]
    fn test_discard_pops_other_values() {
        let mut e = emitter();
        e.load_name("f").unwrap();
        e.emit_unsigned(Opcode::Call, 0).unwrap();
        e.discard().unwrap();
        assert_eq!(e.current().code().last(), Some(&Instruction::simple(Opcode::Pop)));
    }

    // =========================================================================
    // Stack accounting and lines
    // =========================================================================

    #[test]
    fn test_high_water_tracks_emission() {
        let mut e = emitter();
        e.load_const(Value::Integer(1)).unwrap();
        e.load_const(Value::Integer(2)).unwrap();
        e.load_const(Value::Integer(3)).unwrap();
        e.emit_op(Opcode::Add).unwrap();
        e.emit_op(Opcode::Add).unwrap();
        e.discard().unwrap();

        assert_eq!(e.current().max_depth(), 3);
        assert_eq!(e.current().depth(), 0);
    }

    #[test]
    fn test_line_markers_only_on_change() {
        let mut e = emitter();
        e.mark_line(1).unwrap();
        e.mark_line(1).unwrap();
        e.mark_line(3).unwrap();
        assert_eq!(
            e.current().code(),
            &[u(Opcode::Line, 1), u(Opcode::Line, 3)]
        );
    }

    #[test]
    fn test_line_markers_disabled() {
        let mut e = Emitter::new(CompilerConfig {
            line_markers: false,
            ..CompilerConfig::default()
        });
        e.mark_line(7).unwrap();
        assert!(e.current().code().is_empty());
    }
}
