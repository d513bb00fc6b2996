use tracing::debug;

use crate::{
    bytecode::{
        compile_error::CompileError,
        emitter::Emitter,
        ir::CodeObject,
        op::Opcode,
        scope::{LabelId, LoopTargets, ScopeId, ScopeKind, TryRegion},
        tail_call::{self, TailCalls},
    },
    config::CompilerConfig,
    lang::{
        node::{
            Arg, BinaryOp, CaseArm, CatchClause, Expr, ExprKind, FunctionLit, LogicalOp, MapKey,
            Stmt, StmtKind, SwitchCase, UnaryOp,
        },
        value::Value,
    },
};

/// Tail-call sites of a function while its body is being compiled.
struct TailFrame<'a> {
    scope: ScopeId,
    sites: TailCalls<'a>,
}

/// Shape of an argument list once it is on the stack.
struct ArgCount {
    positional: u32,
    named: u32,
}

pub struct Compiler<'a> {
    emitter: Emitter<'a>,

    /// Open functions with detected self tail calls, innermost last.
    tail_frames: Vec<TailFrame<'a>>,

    /// Counter for compiler-generated locals (iterators, switch subjects).
    hidden: u32,
}

/// Compile a program with the default configuration.
pub fn compile(program: &[Stmt]) -> Result<CodeObject, CompileError> {
    Compiler::new(CompilerConfig::default()).compile_program(program)
}

impl<'a> Compiler<'a> {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            emitter: Emitter::new(config),
            tail_frames: Vec::new(),
            hidden: 0,
        }
    }

    pub fn compile_program(mut self, program: &'a [Stmt]) -> Result<CodeObject, CompileError> {
        for stmt in program {
            self.compile_stmt(stmt)?;
        }
        self.emitter.emit_op(Opcode::PushNil)?;
        self.emitter.emit_op(Opcode::Return)?;

        let code = self.emitter.finish()?;
        debug!(
            statements = program.len(),
            code_objects = code.tree_size(),
            "program compiled"
        );
        Ok(code)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn scope_kind(&self) -> ScopeKind {
        self.emitter.current().kind()
    }

    fn try_depth(&self) -> usize {
        self.emitter.current().try_regions.len()
    }

    /// Run `f` inside a fresh lexical block.
    fn scoped<F>(&mut self, f: F) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        self.emitter.enter_block();
        f(self)?;
        self.emitter.leave_block()
    }

    fn compile_block(&mut self, stmts: &'a [Stmt]) -> Result<(), CompileError> {
        self.scoped(|c| {
            for stmt in stmts {
                c.compile_stmt(stmt)?;
            }
            Ok(())
        })
    }

    /// A local no identifier can name.
    fn hidden_local(&mut self, what: &str) -> Result<u32, CompileError> {
        self.hidden += 1;
        let name = format!("({} {})", what, self.hidden);
        self.emitter.declare(&name)
    }

    fn is_tail_site(&self, expr: &Expr) -> bool {
        self.emitter.config().tail_calls
            && self.try_depth() == 0
            && self.tail_frames.last().is_some_and(|frame| {
                frame.scope == self.emitter.current_id() && frame.sites.contains(expr)
            })
    }

    /// Bind the value on top of the stack to a declared name.
    fn bind_declaration(&mut self, name: &str, slot: Option<u32>) -> Result<(), CompileError> {
        match (self.scope_kind(), slot) {
            (ScopeKind::Global, _) => {
                let index = self.emitter.name_constant(name)?;
                self.emitter.emit_unsigned(Opcode::StoreGlobal, index)?;
            }
            (ScopeKind::Object, _) => {
                let index = self.emitter.name_constant(name)?;
                self.emitter.emit_unsigned(Opcode::DefineMember, index)?;
            }
            (ScopeKind::Local, Some(slot)) => {
                self.emitter.emit_unsigned(Opcode::StoreLocal, slot)?;
            }
            (ScopeKind::Local, None) => {
                return Err(CompileError::internal(format!(
                    "local declaration of '{}' without a slot",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Local declarations get their slot before the body is compiled, so
    /// the body can refer to itself.
    fn predeclare(&mut self, name: &str) -> Result<Option<u32>, CompileError> {
        match self.scope_kind() {
            ScopeKind::Local => Ok(Some(self.emitter.declare(name)?)),
            ScopeKind::Global | ScopeKind::Object => Ok(None),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_stmt(&mut self, stmt: &'a Stmt) -> Result<(), CompileError> {
        self.emitter.mark_line(stmt.line)?;

        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.compile_expr(e)?;
                self.emitter.discard()?;
            }

            StmtKind::Var { name, init } => self.compile_var(name, init.as_ref())?,

            StmtKind::Block(stmts) => self.compile_block(stmts)?,

            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(cond, then_branch, else_branch.as_deref())?,

            StmtKind::While { cond, body } => self.compile_while(cond, body)?,

            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.compile_for(init.as_deref(), cond.as_ref(), step.as_ref(), body)?,

            StmtKind::ForIn {
                name,
                iterable,
                body,
            } => self.compile_for_in(name, iterable, body)?,

            StmtKind::Break => self.compile_break(stmt.line)?,
            StmtKind::Continue => self.compile_continue(stmt.line)?,
            StmtKind::Return(value) => self.compile_return(value.as_ref(), stmt.line)?,

            StmtKind::Throw(value) => {
                self.compile_expr(value)?;
                self.emitter.emit_op(Opcode::Throw)?;
            }

            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.compile_try(body, catch.as_ref(), finally.as_deref(), stmt.line)?,

            StmtKind::Switch {
                subject,
                cases,
                default,
            } => self.compile_switch(subject, cases, default.as_deref())?,

            StmtKind::Function { name, func } => {
                let slot = self.predeclare(name)?;
                // Members are not visible by bare name inside their own body.
                let binding = (self.scope_kind() != ScopeKind::Object).then_some(name.as_str());
                self.compile_function(binding, func, stmt.line)?;
                self.bind_declaration(name, slot)?;
            }

            StmtKind::Class { name, parent, body } => {
                let slot = self.predeclare(name)?;
                match parent {
                    Some(parent) => self.compile_expr(parent)?,
                    None => {
                        self.emitter.emit_op(Opcode::PushNil)?;
                    }
                }
                self.compile_object_body(Opcode::Class, body)?;
                self.bind_declaration(name, slot)?;
            }

            StmtKind::Namespace { name, body } => {
                let slot = self.predeclare(name)?;
                self.compile_object_body(Opcode::Namespace, body)?;
                self.bind_declaration(name, slot)?;
            }
        }

        Ok(())
    }

    fn compile_var(&mut self, name: &str, init: Option<&'a Expr>) -> Result<(), CompileError> {
        let slot = match init {
            Some(Expr {
                kind: ExprKind::Function(func),
                line,
            }) => {
                let slot = self.emitter.declare(name)?;
                self.compile_function(Some(name), func, *line)?;
                slot
            }
            Some(init) => {
                self.compile_expr(init)?;
                self.emitter.declare(name)?
            }
            None => {
                self.emitter.emit_op(Opcode::PushNil)?;
                self.emitter.declare(name)?
            }
        };
        self.emitter.emit_unsigned(Opcode::StoreLocal, slot)?;
        Ok(())
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    /// ```text
    ///   <cond>
    ///   JUMP_FALSE  else
    ///   <then>
    ///   JUMP        end      ; only with an else branch
    /// else:
    ///   <else>
    /// end:
    /// ```
    fn compile_if(
        &mut self,
        cond: &'a Expr,
        then_branch: &'a Stmt,
        else_branch: Option<&'a Stmt>,
    ) -> Result<(), CompileError> {
        let else_label = self.emitter.new_label();
        self.compile_expr(cond)?;
        self.emitter.emit_jump(Opcode::JumpIfFalse, else_label)?;
        self.scoped(|c| c.compile_stmt(then_branch))?;

        match else_branch {
            Some(else_branch) => {
                let end = self.emitter.new_label();
                self.emitter.emit_jump(Opcode::Jump, end)?;
                self.emitter.set_label(else_label)?;
                self.scoped(|c| c.compile_stmt(else_branch))?;
                self.emitter.set_label(end)?;
            }
            None => self.emitter.set_label(else_label)?,
        }
        Ok(())
    }

    fn push_loop(&mut self, break_label: LabelId, continue_label: Option<LabelId>) {
        let try_depth = self.try_depth();
        self.emitter.current_mut().loops.push(LoopTargets {
            break_label,
            continue_label,
            try_depth,
        });
    }

    fn pop_loop(&mut self) {
        self.emitter.current_mut().loops.pop();
    }

    /// ```text
    /// top:
    ///   <cond>
    ///   JUMP_FALSE  end
    ///   <body>
    ///   JUMP        top
    /// end:
    /// ```
    fn compile_while(&mut self, cond: &'a Expr, body: &'a Stmt) -> Result<(), CompileError> {
        let top = self.emitter.new_label();
        let end = self.emitter.new_label();

        self.emitter.set_label(top)?;
        self.compile_expr(cond)?;
        self.emitter.emit_jump(Opcode::JumpIfFalse, end)?;

        self.push_loop(end, Some(top));
        self.scoped(|c| c.compile_stmt(body))?;
        self.pop_loop();

        self.emitter.emit_jump(Opcode::Jump, top)?;
        self.emitter.set_label(end)
    }

    fn compile_for(
        &mut self,
        init: Option<&'a Stmt>,
        cond: Option<&'a Expr>,
        step: Option<&'a Expr>,
        body: &'a Stmt,
    ) -> Result<(), CompileError> {
        self.scoped(|c| {
            if let Some(init) = init {
                c.compile_stmt(init)?;
            }

            let top = c.emitter.new_label();
            let next = c.emitter.new_label();
            let end = c.emitter.new_label();

            c.emitter.set_label(top)?;
            if let Some(cond) = cond {
                c.compile_expr(cond)?;
                c.emitter.emit_jump(Opcode::JumpIfFalse, end)?;
            }

            c.push_loop(end, Some(next));
            c.scoped(|c| c.compile_stmt(body))?;
            c.pop_loop();

            c.emitter.set_label(next)?;
            if let Some(step) = step {
                c.compile_expr(step)?;
                c.emitter.discard()?;
            }
            c.emitter.emit_jump(Opcode::Jump, top)?;
            c.emitter.set_label(end)
        })
    }

    /// ```text
    ///   <iterable>
    ///   ITER
    ///   STORE_LOCAL  it
    /// next:
    ///   LOAD_LOCAL   it
    ///   FOR_ITER     end     ; jumps once exhausted
    ///   STORE_LOCAL  name
    ///   <body>
    ///   JUMP         next
    /// end:
    /// ```
    fn compile_for_in(&mut self, name: &str, iterable: &'a Expr, body: &'a Stmt) -> Result<(), CompileError> {
        self.scoped(|c| {
            c.compile_expr(iterable)?;
            c.emitter.emit_op(Opcode::Iter)?;
            let iter = c.hidden_local("iter")?;
            c.emitter.emit_unsigned(Opcode::StoreLocal, iter)?;

            let next = c.emitter.new_label();
            let end = c.emitter.new_label();

            c.emitter.set_label(next)?;
            c.emitter.emit_unsigned(Opcode::LoadLocal, iter)?;
            c.emitter.emit_jump(Opcode::ForIter, end)?;
            let slot = c.emitter.declare(name)?;
            c.emitter.emit_unsigned(Opcode::StoreLocal, slot)?;

            c.push_loop(end, Some(next));
            c.scoped(|c| c.compile_stmt(body))?;
            c.pop_loop();

            c.emitter.emit_jump(Opcode::Jump, next)?;
            c.emitter.set_label(end)
        })
    }

    fn compile_break(&mut self, line: u32) -> Result<(), CompileError> {
        let target = self
            .emitter
            .current()
            .loops
            .last()
            .copied()
            .ok_or_else(|| CompileError::outside_loop("break", line))?;
        self.unwind_try(target.try_depth)?;
        self.emitter.emit_jump(Opcode::Jump, target.break_label)?;
        Ok(())
    }

    fn compile_continue(&mut self, line: u32) -> Result<(), CompileError> {
        let target = self
            .emitter
            .current()
            .loops
            .iter()
            .rev()
            .find_map(|l| l.continue_label.map(|label| (label, l.try_depth)));
        let (label, try_depth) = target.ok_or_else(|| CompileError::outside_loop("continue", line))?;
        self.unwind_try(try_depth)?;
        self.emitter.emit_jump(Opcode::Jump, label)?;
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&'a Expr>, line: u32) -> Result<(), CompileError> {
        if self.scope_kind() != ScopeKind::Local {
            return Err(CompileError::return_outside_function(line));
        }

        match value {
            Some(value) => {
                let tail = self.is_tail_site(value);
                self.compile_expr(value)?;
                if tail {
                    return Ok(());
                }
            }
            None => {
                self.emitter.emit_op(Opcode::PushNil)?;
            }
        }
        self.unwind_try(0)?;
        self.emitter.emit_op(Opcode::Return)?;
        Ok(())
    }

    /// Leave every try region above `depth`, innermost first: pop the
    /// installed handlers and run the cleanup code inline.
    fn unwind_try(&mut self, depth: usize) -> Result<(), CompileError> {
        for index in (depth..self.try_depth()).rev() {
            let region = self.emitter.current().try_regions[index];
            if region.catch_installed {
                self.emitter.emit_op(Opcode::EndTry)?;
            }
            if let Some(cleanup) = region.finally {
                self.emitter.emit_op(Opcode::EndTry)?;
                // The cleanup runs outside its own region.
                let saved = self.emitter.current_mut().try_regions.split_off(index);
                let result = self.compile_block(cleanup);
                self.emitter.current_mut().try_regions.extend(saved);
                result?;
            }
        }
        Ok(())
    }

    /// ```text
    ///   TRY_FINALLY  cleanup     ; with finally
    ///   TRY_CATCH    handler     ; with catch
    ///   <body>
    ///   END_TRY                  ; with catch
    ///   JUMP         done        ; with catch
    /// handler:
    ///   STORE_LOCAL  e
    ///   <handler body>
    /// done:
    ///   END_TRY                  ; with finally
    /// cleanup:
    ///   <cleanup body>
    ///   END_FINALLY
    /// ```
    fn compile_try(
        &mut self,
        body: &'a [Stmt],
        catch: Option<&'a CatchClause>,
        finally: Option<&'a [Stmt]>,
        line: u32,
    ) -> Result<(), CompileError> {
        if catch.is_none() && finally.is_none() {
            return Err(CompileError::try_without_handler(line));
        }
        self.emitter.current_mut().has_exception_blocks = true;

        let cleanup = match finally {
            Some(_) => {
                let label = self.emitter.new_label();
                self.emitter.emit_jump(Opcode::TryFinally, label)?;
                Some(label)
            }
            None => None,
        };
        let handler = match catch {
            Some(_) => {
                let label = self.emitter.new_label();
                self.emitter.emit_jump(Opcode::TryCatch, label)?;
                Some(label)
            }
            None => None,
        };

        self.emitter.current_mut().try_regions.push(TryRegion {
            catch_installed: catch.is_some(),
            finally,
        });
        let region = self.try_depth() - 1;

        self.compile_block(body)?;

        if let (Some(catch), Some(handler)) = (catch, handler) {
            self.emitter.emit_op(Opcode::EndTry)?;
            self.emitter.current_mut().try_regions[region].catch_installed = false;

            let done = self.emitter.new_label();
            self.emitter.emit_jump(Opcode::Jump, done)?;

            self.emitter.set_label(handler)?;
            // The runtime pushes the exception before entering the handler.
            self.emitter.adjust_depth(1);
            self.scoped(|c| {
                let slot = c.emitter.declare(&catch.name)?;
                c.emitter.emit_unsigned(Opcode::StoreLocal, slot)?;
                for stmt in &catch.body {
                    c.compile_stmt(stmt)?;
                }
                Ok(())
            })?;
            self.emitter.set_label(done)?;
        }

        self.emitter.current_mut().try_regions.truncate(region);

        if let (Some(finally), Some(cleanup)) = (finally, cleanup) {
            self.emitter.emit_op(Opcode::EndTry)?;
            self.emitter.set_label(cleanup)?;
            self.compile_block(finally)?;
            self.emitter.emit_op(Opcode::EndFinally)?;
        }
        Ok(())
    }

    /// Each case compares the subject with `EQ` + `JUMP_TRUE`; bodies do
    /// not fall through and `break` leaves the switch.
    fn compile_switch(
        &mut self,
        subject: &'a Expr,
        cases: &'a [SwitchCase],
        default: Option<&'a [Stmt]>,
    ) -> Result<(), CompileError> {
        self.scoped(|c| {
            c.compile_expr(subject)?;
            let slot = c.hidden_local("switch")?;
            c.emitter.emit_unsigned(Opcode::StoreLocal, slot)?;

            let end = c.emitter.new_label();
            let bodies: Vec<LabelId> = cases.iter().map(|_| c.emitter.new_label()).collect();

            for (case, &label) in cases.iter().zip(&bodies) {
                for value in &case.values {
                    c.emitter.emit_unsigned(Opcode::LoadLocal, slot)?;
                    c.compile_expr(value)?;
                    c.emitter.emit_op(Opcode::Eq)?;
                    c.emitter.emit_jump(Opcode::JumpIfTrue, label)?;
                }
            }
            let fallback = c.emitter.new_label();
            c.emitter.emit_jump(Opcode::Jump, fallback)?;

            c.push_loop(end, None);
            for (case, &label) in cases.iter().zip(&bodies) {
                c.emitter.set_label(label)?;
                c.compile_block(&case.body)?;
                c.emitter.emit_jump(Opcode::Jump, end)?;
            }
            c.emitter.set_label(fallback)?;
            if let Some(default) = default {
                c.compile_block(default)?;
            }
            c.pop_loop();

            c.emitter.set_label(end)
        })
    }

    // =========================================================================
    // Functions and object bodies
    // =========================================================================

    /// Compile a function literal into a child code object and leave the
    /// closure on the stack. `binding` is the name the closure is bound to,
    /// used to find self tail calls.
    fn compile_function(
        &mut self,
        binding: Option<&str>,
        func: &'a FunctionLit,
        line: u32,
    ) -> Result<(), CompileError> {
        for (i, param) in func.params.iter().enumerate() {
            if func.params[..i].iter().any(|p| p.name == param.name) {
                return Err(CompileError::invalid_with_hint(
                    "function",
                    line,
                    format!("parameter '{}' is declared more than once", param.name),
                    "give each parameter a distinct name",
                ));
            }
        }

        let sites = match binding {
            Some(name) if self.emitter.config().tail_calls => tail_call::analyze(name, func),
            _ => TailCalls::default(),
        };
        if !sites.is_empty() {
            debug!(function = ?binding, sites = sites.len(), line, "tail calls found");
        }

        let scope = self.emitter.enter_scope(ScopeKind::Local);
        {
            let s = self.emitter.current_mut();
            s.arg_count = func.params.len() as u32;
            s.varargs = func.variadic;
            s.generator = func.generator;
            s.arg_names = func.params.iter().map(|p| Some(p.name.clone())).collect();
        }
        for param in &func.params {
            self.emitter.declare(&param.name)?;
        }

        // HAS_ARG i; JUMP_TRUE skip; <default>; STORE_LOCAL i; skip: PARAM_END i
        for (i, param) in func.params.iter().enumerate() {
            let Some(default) = &param.default else {
                continue;
            };
            let i = i as u32;
            self.emitter.current_mut().named_params = true;
            let skip = self.emitter.new_label();
            self.emitter.emit_unsigned(Opcode::HasArg, i)?;
            self.emitter.emit_jump(Opcode::JumpIfTrue, skip)?;
            self.compile_expr(default)?;
            self.emitter.emit_unsigned(Opcode::StoreLocal, i)?;
            self.emitter.set_label(skip)?;
            self.emitter.emit_unsigned(Opcode::ParamEnd, i)?;
        }

        if !sites.is_empty() {
            self.tail_frames.push(TailFrame { scope, sites });
        }
        let body = self.compile_function_body(&func.body);
        if self
            .tail_frames
            .last()
            .is_some_and(|frame| frame.scope == scope)
        {
            self.tail_frames.pop();
        }
        body?;

        let child = self.emitter.leave_scope()?;
        self.emitter.emit_child(Opcode::Closure, &child)
    }

    /// A trailing expression statement is the function's value; otherwise
    /// the function returns nil.
    fn compile_function_body(&mut self, body: &'a [Stmt]) -> Result<(), CompileError> {
        let Some((last, rest)) = body.split_last() else {
            self.emitter.emit_op(Opcode::PushNil)?;
            self.emitter.emit_op(Opcode::Return)?;
            return Ok(());
        };

        for stmt in rest {
            self.compile_stmt(stmt)?;
        }

        match &last.kind {
            StmtKind::Expr(e) => {
                self.emitter.mark_line(last.line)?;
                let tail = self.is_tail_site(e);
                self.compile_expr(e)?;
                if !tail {
                    self.emitter.emit_op(Opcode::Return)?;
                }
            }
            StmtKind::Return(_) => self.compile_stmt(last)?,
            _ => {
                self.compile_stmt(last)?;
                self.emitter.emit_op(Opcode::PushNil)?;
                self.emitter.emit_op(Opcode::Return)?;
            }
        }
        Ok(())
    }

    /// Class or namespace body; `op` instantiates it in the parent.
    fn compile_object_body(&mut self, op: Opcode, body: &'a [Stmt]) -> Result<(), CompileError> {
        self.emitter.enter_scope(ScopeKind::Object);
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.emitter.emit_op(Opcode::PushNil)?;
        self.emitter.emit_op(Opcode::Return)?;

        let child = self.emitter.leave_scope()?;
        self.emitter.emit_child(op, &child)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &'a Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Literal(value) => self.compile_literal(value)?,

            ExprKind::Ident(name) => self.emitter.load_name(name)?,

            ExprKind::This => {
                self.emitter.emit_op(Opcode::PushThis)?;
            }

            ExprKind::Assign { target, value } => self.compile_assign(target, value, expr.line)?,

            ExprKind::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emitter.emit_op(binary_opcode(*op))?;
            }

            // a and b:  <a> JUMP_FALSE_OR_POP end <b> end:
            ExprKind::Logical { op, lhs, rhs } => {
                let end = self.emitter.new_label();
                self.compile_expr(lhs)?;
                let jump = match op {
                    LogicalOp::And => Opcode::JumpIfFalseOrPop,
                    LogicalOp::Or => Opcode::JumpIfTrueOrPop,
                };
                self.emitter.emit_jump(jump, end)?;
                self.compile_expr(rhs)?;
                self.emitter.set_label(end)?;
            }

            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                let op = match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::BitNot => Opcode::BitNot,
                };
                self.emitter.emit_op(op)?;
            }

            ExprKind::Call { callee, args } => {
                let tail = self.is_tail_site(expr);
                self.compile_expr(callee)?;
                let count = self.compile_args(args, "call", expr.line)?;
                if tail {
                    self.emitter.emit_unsigned(Opcode::TailCall, count.positional)?;
                } else if count.named > 0 {
                    self.emitter
                        .emit_pair(Opcode::CallNamed, count.positional, count.named)?;
                } else {
                    self.emitter.emit_unsigned(Opcode::Call, count.positional)?;
                }
            }

            ExprKind::MethodCall { object, name, args } => {
                self.compile_expr(object)?;
                let index = self.emitter.name_constant(name)?;
                self.emitter.emit_unsigned(Opcode::GetMethod, index)?;
                let count = self.compile_args(args, "method call", expr.line)?;
                if count.named > 0 {
                    return Err(CompileError::invalid_with_hint(
                        "method call",
                        expr.line,
                        "named arguments are not supported on method calls",
                        "pass a map, or call the method through a plain function",
                    ));
                }
                self.emitter.emit_unsigned(Opcode::CallMethod, count.positional)?;
            }

            ExprKind::Member { object, name } => {
                self.compile_expr(object)?;
                let index = self.emitter.name_constant(name)?;
                self.emitter.emit_unsigned(Opcode::GetMember, index)?;
            }

            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emitter.emit_op(Opcode::GetIndex)?;
            }

            ExprKind::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emitter.emit_unsigned(Opcode::NewArray, items.len() as u32)?;
            }

            ExprKind::Map(entries) => {
                for (key, value) in entries {
                    match key {
                        MapKey::Name(name) => self.emitter.load_const(Value::String(name.clone()))?,
                        MapKey::Computed(key) => self.compile_expr(key)?,
                    }
                    self.compile_expr(value)?;
                }
                self.emitter.emit_unsigned(Opcode::NewMap, entries.len() as u32)?;
            }

            ExprKind::Function(func) => self.compile_function(None, func, expr.line)?,

            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let other = self.emitter.new_label();
                let end = self.emitter.new_label();
                self.compile_expr(cond)?;
                self.emitter.emit_jump(Opcode::JumpIfFalse, other)?;
                self.compile_expr(then)?;
                self.emitter.emit_jump(Opcode::Jump, end)?;
                self.emitter.set_label(other)?;
                self.compile_expr(otherwise)?;
                self.emitter.set_label(end)?;
            }

            ExprKind::Case {
                subject,
                arms,
                default,
            } => self.compile_case(subject, arms, default.as_deref())?,

            ExprKind::Yield(value) => {
                if !self.emitter.current().generator {
                    return Err(CompileError::yield_outside_generator(expr.line));
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => {
                        self.emitter.emit_op(Opcode::PushNil)?;
                    }
                }
                self.emitter.emit_op(Opcode::Yield)?;
            }
        }

        Ok(())
    }

    fn compile_literal(&mut self, value: &Value) -> Result<(), CompileError> {
        match value {
            Value::Nil => {
                self.emitter.emit_op(Opcode::PushNil)?;
            }
            Value::Bool(true) => {
                self.emitter.emit_op(Opcode::PushTrue)?;
            }
            Value::Bool(false) => {
                self.emitter.emit_op(Opcode::PushFalse)?;
            }
            other => self.emitter.load_const(other.clone())?,
        }
        Ok(())
    }

    /// Assignments leave the assigned value on the stack.
    fn compile_assign(&mut self, target: &'a Expr, value: &'a Expr, line: u32) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Ident(name) => {
                match &value.kind {
                    ExprKind::Function(func) => {
                        self.compile_function(Some(name.as_str()), func, value.line)?
                    }
                    _ => self.compile_expr(value)?,
                }
                self.emitter.emit_op(Opcode::Dup)?;
                self.emitter.store_name(name)?;
            }
            ExprKind::Member { object, name } => {
                self.compile_expr(object)?;
                self.compile_expr(value)?;
                let index = self.emitter.name_constant(name)?;
                self.emitter.emit_unsigned(Opcode::SetMember, index)?;
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emitter.emit_op(Opcode::SetIndex)?;
            }
            other => {
                return Err(CompileError::invalid_assignment_target(
                    other.construct_name(),
                    line,
                ));
            }
        }
        Ok(())
    }

    /// Positional and spread arguments first, then `name, value` pairs.
    fn compile_args(&mut self, args: &'a [Arg], construct: &str, line: u32) -> Result<ArgCount, CompileError> {
        let has_spread = args.iter().any(|a| matches!(a, Arg::Spread(_)));
        let has_named = args.iter().any(|a| matches!(a, Arg::Named(..)));
        if has_spread && has_named {
            return Err(CompileError::invalid_with_hint(
                construct,
                line,
                "spread arguments cannot be combined with named arguments",
                "build the argument list first, then spread it",
            ));
        }

        let mut count = ArgCount {
            positional: 0,
            named: 0,
        };
        let mut names: Vec<&str> = Vec::new();

        for arg in args {
            match arg {
                Arg::Positional(e) | Arg::Spread(e) => {
                    if count.named > 0 {
                        return Err(CompileError::invalid(
                            construct,
                            line,
                            "positional argument after a named argument",
                        ));
                    }
                    self.compile_expr(e)?;
                    if matches!(arg, Arg::Spread(_)) {
                        self.emitter.emit_op(Opcode::Spread)?;
                    }
                    count.positional += 1;
                }
                Arg::Named(name, e) => {
                    if names.contains(&name.as_str()) {
                        return Err(CompileError::invalid(
                            construct,
                            line,
                            format!("named argument '{}' given more than once", name),
                        ));
                    }
                    names.push(name.as_str());
                    self.emitter.load_const(Value::String(name.clone()))?;
                    self.compile_expr(e)?;
                    count.named += 1;
                }
            }
        }
        Ok(count)
    }

    /// ```text
    ///   <subject>
    ///   STORE_LOCAL  s
    ///   LOAD_LOCAL s; <v>; EQ; JUMP_TRUE arm_i    ; per value
    ///   <default or nil>
    ///   JUMP         end
    /// arm_i:
    ///   <result_i>
    ///   JUMP         end
    /// end:
    /// ```
    fn compile_case(
        &mut self,
        subject: &'a Expr,
        arms: &'a [CaseArm],
        default: Option<&'a Expr>,
    ) -> Result<(), CompileError> {
        self.emitter.enter_block();
        self.compile_expr(subject)?;
        let slot = self.hidden_local("case")?;
        self.emitter.emit_unsigned(Opcode::StoreLocal, slot)?;

        let end = self.emitter.new_label();
        let labels: Vec<LabelId> = arms.iter().map(|_| self.emitter.new_label()).collect();

        for (arm, &label) in arms.iter().zip(&labels) {
            for value in &arm.values {
                self.emitter.emit_unsigned(Opcode::LoadLocal, slot)?;
                self.compile_expr(value)?;
                self.emitter.emit_op(Opcode::Eq)?;
                self.emitter.emit_jump(Opcode::JumpIfTrue, label)?;
            }
        }

        match default {
            Some(default) => self.compile_expr(default)?,
            None => {
                self.emitter.emit_op(Opcode::PushNil)?;
            }
        }
        self.emitter.emit_jump(Opcode::Jump, end)?;

        for (arm, &label) in arms.iter().zip(&labels) {
            self.emitter.set_label(label)?;
            self.compile_expr(&arm.result)?;
            self.emitter.emit_jump(Opcode::Jump, end)?;
        }

        self.emitter.set_label(end)?;
        self.emitter.leave_block()
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Pow => Opcode::Pow,
        BinaryOp::Concat => Opcode::Concat,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::NotEq => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::LtEq => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::GtEq => Opcode::Ge,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
    }
}
