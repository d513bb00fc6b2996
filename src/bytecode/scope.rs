//! Compile-time state of one code unit.
//!
//! A [`Scope`] owns every table the emitter writes into while a program,
//! function, generator, class body or namespace body is being compiled:
//!
//! - [`LocalTable`]: identifier → stack slot, with block rollback
//! - [`OuterTable`]: closure capture descriptors
//! - [`LabelTable`]: deferred jump targets
//! - [`DebugRecorder`]: local lifetimes for tooling
//! - the instruction buffer and constant pool
//!
//! Scopes live in the emitter's arena and refer to their parent by
//! [`ScopeId`]; they never own each other.

use tracing::trace;

use crate::bytecode::buffer::InstructionBuffer;
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::constants::ConstantPool;
use crate::bytecode::ir::{CodeFlags, CodeObject, DebugSymbol, DebugTable};
use crate::bytecode::op::{Instruction, MAX_UNSIGNED, Opcode};
use crate::lang::node::Stmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Top-level program.
    Global,
    /// Class or namespace body.
    Object,
    /// Function or generator body.
    Local,
}

/// Index of a scope in the emitter's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) usize);

/// Handle of a label within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(u32);

// =============================================================================
// Local slot table
// =============================================================================

/// Active locals, densely packed: the slot of a local is its position.
#[derive(Debug, Default, Clone)]
pub struct LocalTable {
    active: Vec<String>,
    high_water: usize,
}

impl LocalTable {
    /// Slot of `name` in any open block, or a freshly allocated one.
    /// The flag tells whether the slot is new.
    pub fn declare(&mut self, name: &str) -> Result<(u32, bool), CompileError> {
        if let Some(slot) = self.lookup(name) {
            return Ok((slot, false));
        }
        let slot = self.active.len();
        if slot > MAX_UNSIGNED as usize {
            return Err(CompileError::overflow("local slot", slot as i64, MAX_UNSIGNED as i64));
        }
        self.active.push(name.to_string());
        self.high_water = self.high_water.max(self.active.len());
        Ok((slot as u32, true))
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.active
            .iter()
            .rposition(|n| n == name)
            .map(|slot| slot as u32)
    }

    /// Number of active slots, used as a rollback marker.
    pub fn mark(&self) -> usize {
        self.active.len()
    }

    /// Free every slot at or above `marker`; returns how many were freed.
    pub fn rollback(&mut self, marker: usize) -> usize {
        let freed = self.active.len().saturating_sub(marker);
        self.active.truncate(marker);
        freed
    }

    /// Highest number of slots ever live at once.
    pub fn count(&self) -> u32 {
        self.high_water as u32
    }
}

// =============================================================================
// Closure capture table
// =============================================================================

/// Where a captured variable lives: `up` scopes out, in local `slot` there.
///
/// After reconciliation every descriptor has `up == 1` and `slot` names
/// either a parent local or a parent relay, see [`Capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OuterDescriptor {
    pub slot: u32,
    pub up: u32,
}

/// How the parent fills one outer slot of a child when instantiating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// From the parent's own local slot.
    Local(u32),
    /// From the parent's own outer slot (a relay).
    Outer(u32),
}

impl Capture {
    pub fn instruction(self) -> Result<Instruction, CompileError> {
        match self {
            Capture::Local(slot) => Instruction::with_unsigned(Opcode::CaptureLocal, slot),
            Capture::Outer(index) => Instruction::with_unsigned(Opcode::CaptureOuter, index),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct OuterTable {
    descriptors: Vec<OuterDescriptor>,
}

impl OuterTable {
    /// Index of `desc`, de-duplicated by value.
    pub fn add(&mut self, desc: OuterDescriptor) -> Result<u32, CompileError> {
        if let Some(index) = self.descriptors.iter().position(|d| *d == desc) {
            return Ok(index as u32);
        }
        let index = self.descriptors.len();
        if index > MAX_UNSIGNED as usize {
            return Err(CompileError::overflow("outer slot", index as i64, MAX_UNSIGNED as i64));
        }
        self.descriptors.push(desc);
        Ok(index as u32)
    }

    pub fn descriptors(&self) -> &[OuterDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub(crate) fn set(&mut self, index: usize, desc: OuterDescriptor) {
        self.descriptors[index] = desc;
    }
}

// =============================================================================
// Label table
// =============================================================================

#[derive(Debug, Default, Clone)]
struct Label {
    position: Option<usize>,
    patches: Vec<(usize, Opcode)>,
}

#[derive(Debug, Default, Clone)]
pub struct LabelTable {
    labels: Vec<Label>,
}

impl LabelTable {
    pub fn new_label(&mut self) -> LabelId {
        self.labels.push(Label::default());
        LabelId(self.labels.len() as u32 - 1)
    }

    fn label_mut(&mut self, id: LabelId) -> Result<&mut Label, CompileError> {
        self.labels
            .get_mut(id.0 as usize)
            .ok_or_else(|| CompileError::internal(format!("unknown label L{}", id.0)))
    }

    pub fn add_patch(&mut self, id: LabelId, at: usize, op: Opcode) -> Result<(), CompileError> {
        self.label_mut(id)?.patches.push((at, op));
        Ok(())
    }

    pub fn set(&mut self, id: LabelId, position: usize) -> Result<(), CompileError> {
        let label = self.label_mut(id)?;
        if label.position.is_some() {
            return Err(CompileError::internal(format!("label L{} set twice", id.0)));
        }
        label.position = Some(position);
        Ok(())
    }

    pub fn position(&self, id: LabelId) -> Option<usize> {
        self.labels.get(id.0 as usize).and_then(|l| l.position)
    }

    /// Whether any label resolves to `index` or later.
    pub fn any_resolved_at_or_after(&self, index: usize) -> bool {
        self.labels
            .iter()
            .any(|l| l.position.is_some_and(|p| p >= index))
    }

    /// Overwrite every placeholder with its final relative displacement.
    pub fn reconcile(&self, buffer: &mut InstructionBuffer) -> Result<(), CompileError> {
        for (id, label) in self.labels.iter().enumerate() {
            if label.patches.is_empty() {
                continue;
            }
            let target = label.position.ok_or_else(|| {
                CompileError::internal(format!(
                    "label L{} is referenced by {} jump(s) but never set",
                    id,
                    label.patches.len()
                ))
            })?;
            for &(at, op) in &label.patches {
                let delta = target as i64 - at as i64 - 1;
                let delta = i32::try_from(delta)
                    .map_err(|_| CompileError::overflow(op.mnemonic(), delta, i32::MAX as i64))?;
                trace!(label = id, at, target, delta, "patch jump");
                if !buffer.patch(at, Instruction::with_signed(op, delta)?) {
                    return Err(CompileError::internal(format!(
                        "jump placeholder {} is past the end of the code",
                        at
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Debug symbols
// =============================================================================

#[derive(Debug, Default, Clone)]
pub struct DebugRecorder {
    symbols: Vec<DebugSymbol>,
    /// Symbol index for each live slot, in slot order.
    open: Vec<usize>,
}

impl DebugRecorder {
    pub fn open(&mut self, name: &str, at: usize) {
        self.symbols.push(DebugSymbol {
            name: name.to_string(),
            start: at as u32,
            end: u32::MAX,
        });
        self.open.push(self.symbols.len() - 1);
    }

    /// Close the `count` most recently opened symbols at `at`.
    pub fn close(&mut self, count: usize, at: usize) {
        for _ in 0..count {
            if let Some(index) = self.open.pop() {
                self.symbols[index].end = at as u32;
            }
        }
    }

    pub fn finish(mut self, at: usize) -> DebugTable {
        let open = self.open.len();
        self.close(open, at);
        DebugTable {
            symbols: self.symbols,
        }
    }
}

// =============================================================================
// Control-flow bookkeeping
// =============================================================================

/// One active `try` region.
#[derive(Debug, Clone, Copy)]
pub struct TryRegion<'a> {
    /// The catch handler is still installed (cleared once the protected
    /// body has been emitted).
    pub catch_installed: bool,
    /// Cleanup to inline when control leaves the region early; `None` once
    /// the finally clause itself is being emitted.
    pub finally: Option<&'a [Stmt]>,
}

/// Jump targets of the innermost breakable construct.
#[derive(Debug, Clone, Copy)]
pub struct LoopTargets {
    pub break_label: LabelId,
    /// `None` for `switch`, which `continue` skips over.
    pub continue_label: Option<LabelId>,
    /// Try depth when the construct was entered.
    pub try_depth: usize,
}

// =============================================================================
// Scope
// =============================================================================

#[derive(Debug)]
pub struct Scope<'a> {
    pub(crate) kind: ScopeKind,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) arg_count: u32,
    pub(crate) varargs: bool,
    pub(crate) generator: bool,
    pub(crate) named_params: bool,
    pub(crate) arg_names: Vec<Option<String>>,

    pub(crate) buffer: InstructionBuffer,
    pub(crate) constants: ConstantPool,
    pub(crate) locals: LocalTable,
    pub(crate) outers: OuterTable,
    pub(crate) labels: LabelTable,
    pub(crate) debug: Option<DebugRecorder>,
    pub(crate) children: Vec<CodeObject>,

    depth: i64,
    max_depth: i64,
    blocks: Vec<usize>,
    pub(crate) try_regions: Vec<TryRegion<'a>>,
    pub(crate) loops: Vec<LoopTargets>,
    pub(crate) has_exception_blocks: bool,
    pub(crate) last_line: Option<u32>,
    pub(crate) ended: bool,
}

impl Scope<'_> {
    pub fn new(kind: ScopeKind, parent: Option<ScopeId>, debug: bool) -> Self {
        Scope {
            kind,
            parent,
            arg_count: 0,
            varargs: false,
            generator: false,
            named_params: false,
            arg_names: Vec::new(),
            buffer: InstructionBuffer::new(),
            constants: ConstantPool::new(),
            locals: LocalTable::default(),
            outers: OuterTable::default(),
            labels: LabelTable::default(),
            debug: debug.then(DebugRecorder::default),
            children: Vec::new(),
            depth: 0,
            max_depth: 0,
            blocks: Vec::new(),
            try_regions: Vec::new(),
            loops: Vec::new(),
            has_exception_blocks: false,
            last_line: None,
            ended: false,
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn outers(&self) -> &[OuterDescriptor] {
        self.outers.descriptors()
    }

    pub fn code(&self) -> &[Instruction] {
        self.buffer.as_slice()
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    pub fn local_count(&self) -> u32 {
        self.locals.count()
    }

    /// Deepest stack seen so far, excluding locals and arguments.
    pub fn max_depth(&self) -> u32 {
        self.max_depth as u32
    }

    // -------------------------------------------------------------------------
    // Locals and blocks
    // -------------------------------------------------------------------------

    pub fn declare(&mut self, name: &str) -> Result<u32, CompileError> {
        let (slot, fresh) = self.locals.declare(name)?;
        if fresh {
            let at = self.buffer.len();
            if let Some(debug) = self.debug.as_mut() {
                debug.open(name, at);
            }
        } else {
            trace!(name, slot, "redeclaration reuses slot");
        }
        Ok(slot)
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.locals.lookup(name)
    }

    pub fn enter_block(&mut self) {
        self.blocks.push(self.locals.mark());
    }

    pub fn leave_block(&mut self) -> Result<(), CompileError> {
        let marker = self
            .blocks
            .pop()
            .ok_or_else(|| CompileError::internal("leave_block without matching enter_block"))?;
        let freed = self.locals.rollback(marker);
        let at = self.buffer.len();
        if let Some(debug) = self.debug.as_mut() {
            debug.close(freed, at);
        }
        Ok(())
    }

    pub fn block_depth(&self) -> usize {
        self.blocks.len()
    }

    // -------------------------------------------------------------------------
    // Stack accounting
    // -------------------------------------------------------------------------

    pub fn adjust_depth(&mut self, delta: i64) {
        self.depth = (self.depth + delta).max(0);
        self.max_depth = self.max_depth.max(self.depth);
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    // -------------------------------------------------------------------------
    // Labels
    // -------------------------------------------------------------------------

    pub fn new_label(&mut self) -> LabelId {
        self.labels.new_label()
    }

    pub fn set_label(&mut self, id: LabelId) -> Result<(), CompileError> {
        let at = self.buffer.len();
        self.labels.set(id, at)
    }

    // -------------------------------------------------------------------------
    // Lowering
    // -------------------------------------------------------------------------

    /// Patch all jumps. Must run once, after the last instruction.
    pub fn reconcile_labels(&mut self) -> Result<(), CompileError> {
        if !self.blocks.is_empty() {
            return Err(CompileError::internal(format!(
                "{} lexical block(s) still open at scope end",
                self.blocks.len()
            )));
        }
        self.labels.reconcile(&mut self.buffer)
    }

    /// Move the scope's tables into an immutable code object. The scope is
    /// left empty and flagged as ended.
    pub fn lower(&mut self) -> CodeObject {
        let code_len = self.buffer.len();
        let buffer = std::mem::take(&mut self.buffer);
        let constants = std::mem::take(&mut self.constants).into_values();
        let debug = self.debug.take().map(|d| d.finish(code_len));

        let local_count = self.locals.count();
        let outer_count = self.outers.len() as u32;

        let mut flags = CodeFlags::NONE;
        if debug.is_some() {
            flags.insert(CodeFlags::HAS_DEBUG_INFO);
        }
        if self.has_exception_blocks {
            flags.insert(CodeFlags::HAS_EXCEPTION_BLOCKS);
        }
        if self.varargs {
            flags.insert(CodeFlags::HAS_VARARGS);
        }
        if self.named_params {
            flags.insert(CodeFlags::HAS_NAMED_PARAMS);
        }
        if self.generator {
            flags.insert(CodeFlags::GENERATOR);
        }

        let max_stack = self.max_depth as u32
            + self.arg_count
            + local_count
            + constants.len() as u32
            + outer_count;

        self.ended = true;
        self.labels = LabelTable::default();
        self.try_regions.clear();
        self.loops.clear();

        CodeObject {
            code: buffer.into_boxed(),
            constants,
            max_stack,
            flags,
            arg_count: self.arg_count,
            outer_count,
            local_count,
            arg_names: std::mem::take(&mut self.arg_names),
            debug,
            children: std::mem::take(&mut self.children),
        }
    }
}
