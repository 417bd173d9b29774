//! Code generation (pass 2).
//!
//! Top-level statements are wrapped into the synthetic `_main_` entry
//! function (always function id 0) and compiled first; declared functions
//! follow in declaration order, so code ranges stay contiguous. Jumps are
//! emitted with placeholder offsets and patched through the instruction
//! list once their targets are known; offsets are always relative to the
//! jump instruction's own byte position.

use sable_bytecode::{
    CompiledScript, DebugInfo, DebugSymbol, FunctionInfo, Instruction, LocalFrame, SwitchBranch,
    SwitchTable, SystemAttribute,
};

use crate::ast::{
    AssignOp, BinaryOp, Declarator, Expr, ExprKind, ForInit, FunctionDecl, Literal, LogicalOp,
    MemberAccess, Script, Stmt, StmtKind, SwitchCase, UnaryOp, UpdateOp,
};
use crate::error::{ErrorKind, Result};
use crate::frame::{ControlBlock, ControlKind, FuncFrame, JumpRef};
use crate::scanner;
use crate::state::{CompilerState, OC_NAMES};

/// Compiles a parsed script into a [`CompiledScript`].
///
/// Debug info (static/local symbol names, file names and a statement-level
/// line map) is generated by default; release builds turn it off.
pub struct Compiler {
    file_name: String,
    debug: bool,
}

impl Compiler {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            debug: true,
        }
    }

    pub fn debug_info(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn compile(&self, script: &Script) -> Result<CompiledScript> {
        let mut st = CompilerState::new(&self.file_name, self.debug);

        // The entry function owns identifier 0 and function id 0.
        st.add_identifier("_main_")?;
        st.functions.push(FunctionInfo::new(0, 0));
        st.function_ids.insert("_main_".to_owned(), 0);

        let top_level = scanner::scan(&mut st, script)?;
        let main_decl = FunctionDecl {
            name: "_main_".to_owned(),
            params: Vec::new(),
            body: top_level,
        };
        compile_function(&mut st, &main_decl, true)?;

        for stmt in &script.body {
            if let StmtKind::FunctionDecl(decl) = &stmt.kind {
                st.current_line = stmt.line;
                compile_function(&mut st, decl, false)?;
            }
        }

        let file_name_id = st.add_identifier(&self.file_name)? as i16;
        let system_attributes = vec![
            SystemAttribute {
                name_id: file_name_id,
            },
            SystemAttribute { name_id: -1 },
        ];

        let debug_info = if self.debug {
            Some(build_debug_info(&mut st)?)
        } else {
            None
        };

        Ok(CompiledScript {
            entry_point: 0,
            code: st.code,
            identifier_pool: st.identifiers,
            int_pool: st.int_pool,
            fixed_pool: st.fixed_pool,
            string_pool: st.string_pool,
            functions: st.functions,
            plugin_imports: st.plugin_imports,
            oc_imports: st.oc_imports,
            statics: st.statics,
            local_pool: st.local_pool,
            system_attributes,
            debug_info,
        })
    }
}

fn compile_function(st: &mut CompilerState, decl: &FunctionDecl, is_main: bool) -> Result<()> {
    let Some(&id) = st.function_ids.get(&decl.name) else {
        return Err(st.error(ErrorKind::CallToUndeclaredFunction));
    };
    st.functions[id as usize].code_start = st.pc;

    for param in &decl.params {
        st.add_identifier(param)?;
    }
    st.functions[id as usize].arguments = decl.params.clone();

    let mut func = FnCompiler {
        st: &mut *st,
        frame: FuncFrame::new(id),
    };
    for stmt in &decl.body {
        func.statement(stmt)?;
    }
    let FnCompiler { frame, .. } = func;

    // The terminal instruction sits exactly at the recorded end offset.
    st.functions[id as usize].code_end = st.pc;
    st.emit(if is_main {
        Instruction::Exit
    } else {
        Instruction::Ret
    });

    if let Some(locals) = frame.locals {
        let pool_index = st.local_pool.len() as u16;
        let info = &mut st.functions[id as usize];
        info.local_count = locals.named_count() as u16;
        info.local_pool_index = Some(pool_index);
        st.local_pool.push(locals);
    }
    Ok(())
}

fn build_debug_info(st: &mut CompilerState) -> Result<DebugInfo> {
    let mut info = DebugInfo::default();

    let static_names = st.static_names.clone();
    for (name, slot) in static_names {
        let name_id = st.add_identifier(&name)?;
        info.static_symbols.push(DebugSymbol {
            name_id,
            slot_id: slot as u16,
        });
    }

    let pool_indices: Vec<Option<u16>> = st.functions.iter().map(|f| f.local_pool_index).collect();
    for pool_index in pool_indices {
        let mut symbols = Vec::new();
        if let Some(idx) = pool_index {
            let names = st.local_pool[idx as usize].names().to_vec();
            for (name, slot) in names {
                let name_id = st.add_identifier(&name)?;
                symbols.push(DebugSymbol {
                    name_id,
                    slot_id: slot as u16,
                });
            }
        }
        info.function_locals.push(symbols);
    }

    info.file_names = st.file_names.clone();
    info.lines = st.lines.clone();
    Ok(info)
}

/// How an identifier resolved in the current scope.
enum Binding {
    Oc,
    Local(u32),
    Argument(usize),
    Static(u32),
    Function(u32),
    Undefined,
}

/// Chosen operand width for a pool/table reference. Decided by the table's
/// size at emission time, so a table past 255 entries widens every later
/// reference, small indices included.
enum RefWidth {
    Byte(u8),
    Word(u16),
}

struct FnCompiler<'a> {
    st: &'a mut CompilerState,
    frame: FuncFrame,
}

impl FnCompiler<'_> {
    // ==================== Statements ====================

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        self.st.current_line = stmt.line;
        if let StmtKind::SourceFile(name) = &stmt.kind {
            self.st.set_source_file(name);
            return Ok(());
        }
        self.st.record_line(stmt.line);

        match &stmt.kind {
            StmtKind::Expression(expr) => self.expression_statement(expr),
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.statement(s)?;
                }
                Ok(())
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => self.if_statement(test, consequent, alternate.as_deref()),
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.for_statement(init.as_ref(), test.as_ref(), update.as_ref(), body),
            StmtKind::While { test, body } => self.while_statement(test, body),
            StmtKind::DoWhile { body, test } => self.do_while_statement(body, test),
            StmtKind::Switch {
                discriminant,
                cases,
            } => self.switch_statement(discriminant, cases),
            StmtKind::Break => self.break_statement(),
            StmtKind::Continue => self.continue_statement(),
            StmtKind::Return(argument) => self.return_statement(argument.as_ref()),
            StmtKind::VarDecl { declarators, .. } => self.var_decl(declarators),
            StmtKind::FunctionDecl(_) => Err(self.st.error(ErrorKind::NestedFunctionDeclaration)),
            StmtKind::StaticDecl { .. } => {
                Err(self.st.error(ErrorKind::StaticDeclarationInFunction))
            }
            StmtKind::SourceFile(_) => Ok(()),
        }
    }

    fn expression_statement(&mut self, expr: &Expr) -> Result<()> {
        self.st.current_line = expr.line;
        match &expr.kind {
            ExprKind::Update { op, argument } => self.update(*op, argument, false),
            ExprKind::Call { callee, arguments } => self.call(callee, arguments, true),
            _ => self.expression(expr),
        }
    }

    /// Loop/if test position: update expressions drop their value.
    fn test_expression(&mut self, expr: &Expr) -> Result<()> {
        if let ExprKind::Update { op, argument } = &expr.kind {
            self.update(*op, argument, false)
        } else {
            self.expression(expr)
        }
    }

    fn if_statement(&mut self, test: &Expr, consequent: &Stmt, alternate: Option<&Stmt>) -> Result<()> {
        self.test_expression(test)?;
        let skip = self.forward_jump(Instruction::Jpf(0));
        self.statement(consequent)?;
        match alternate {
            None => self.patch_jump(skip, self.st.pc),
            Some(alt) => {
                let done = self.forward_jump(Instruction::Jmp(0));
                self.patch_jump(skip, self.st.pc)?;
                self.statement(alt)?;
                self.patch_jump(done, self.st.pc)
            }
        }
    }

    fn for_statement(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<()> {
        self.frame.blocks.push(ControlBlock::new(ControlKind::Loop));

        if let Some(init) = init {
            match init {
                ForInit::VarDecl { declarators, .. } => self.var_decl(declarators)?,
                ForInit::Expr(expr) => {
                    self.st.current_line = expr.line;
                    match &expr.kind {
                        ExprKind::Assignment { .. } | ExprKind::Identifier(_) => {
                            self.expression(expr)?
                        }
                        ExprKind::Call { callee, arguments } => {
                            self.call(callee, arguments, true)?
                        }
                        _ => return Err(self.st.error(ErrorKind::UnsupportedForInit)),
                    }
                }
            }
        }

        let test_offset = self.st.pc;
        if let Some(test) = test {
            self.test_expression(test)?;
        }
        let exit = self.forward_jump(Instruction::Jpf(0));
        self.statement(body)?;

        let update_offset = self.st.pc;
        if let Some(update) = update {
            self.test_expression(update)?;
        }
        self.jump_back(test_offset)?;

        let end = self.st.pc;
        let continue_target = if update.is_some() {
            update_offset
        } else {
            test_offset
        };
        if let Some(block) = self.frame.blocks.pop() {
            for jump in block.continue_jumps {
                self.patch_jump(jump, continue_target)?;
            }
            for jump in block.break_jumps {
                self.patch_jump(jump, end)?;
            }
        }
        self.patch_jump(exit, end)
    }

    fn while_statement(&mut self, test: &Expr, body: &Stmt) -> Result<()> {
        self.frame.blocks.push(ControlBlock::new(ControlKind::Loop));

        let test_offset = self.st.pc;
        self.test_expression(test)?;
        let exit = self.forward_jump(Instruction::Jpf(0));
        self.statement(body)?;
        self.jump_back(test_offset)?;

        let end = self.st.pc;
        if let Some(block) = self.frame.blocks.pop() {
            for jump in block.continue_jumps {
                self.patch_jump(jump, test_offset)?;
            }
            for jump in block.break_jumps {
                self.patch_jump(jump, end)?;
            }
        }
        self.patch_jump(exit, end)
    }

    fn do_while_statement(&mut self, body: &Stmt, test: &Expr) -> Result<()> {
        self.frame.blocks.push(ControlBlock::new(ControlKind::Loop));

        let body_start = self.st.pc;
        self.statement(body)?;
        let test_offset = self.st.pc;
        self.expression(test)?;

        let block = self.frame.blocks.pop();
        if let Some(block) = block {
            for jump in block.continue_jumps {
                self.patch_jump(jump, test_offset)?;
            }
            let exit = self.forward_jump(Instruction::Jpf(0));
            self.jump_back(body_start)?;
            let end = self.st.pc;
            for jump in block.break_jumps {
                self.patch_jump(jump, end)?;
            }
            self.patch_jump(exit, end)?;
        }
        Ok(())
    }

    fn switch_statement(&mut self, discriminant: &Expr, cases: &[SwitchCase]) -> Result<()> {
        self.expression(discriminant)?;
        let start = self.st.pc;

        // Branches are table-ordered ascending by case value so the VM can
        // binary-search them; the default arm sorts last.
        let mut ordered: Vec<(i64, &SwitchCase)> = Vec::new();
        let mut branch_count = 0usize;
        for case in cases {
            match &case.test {
                Some(test) => {
                    let ExprKind::Literal(Literal::Int(value)) = &test.kind else {
                        return Err(self.st.error(ErrorKind::ExpectedIntegerLiteralForSwitchTest));
                    };
                    let key = i64::from(*value);
                    if ordered.iter().any(|(k, _)| *k == key) {
                        return Err(self.st.error(ErrorKind::DuplicateSwitchCaseTest));
                    }
                    ordered.push((key, case));
                    branch_count += 1;
                    if branch_count > u8::MAX as usize {
                        return Err(self.st.error(ErrorKind::TooManySwitchCases));
                    }
                }
                None => ordered.push((i64::MAX, case)),
            }
        }
        ordered.sort_by_key(|(key, _)| *key);

        // Inserted with its final branch count so later byte offsets are
        // already correct; entries are filled in as each arm compiles.
        let switch_index = self.st.code.len();
        self.st.emit(Instruction::Switch(SwitchTable {
            default_offset: 0,
            branches: vec![
                SwitchBranch {
                    case_value: 0,
                    offset: 0,
                };
                branch_count
            ],
        }));
        self.frame
            .blocks
            .push(ControlBlock::new(ControlKind::Switch));

        let mut has_default = false;
        let mut branch_i = 0usize;
        for (key, case) in &ordered {
            let offset = (self.st.pc - start) as i32;
            if case.test.is_some() {
                if let Some(Instruction::Switch(table)) = self.st.code.get_mut(switch_index) {
                    table.branches[branch_i] = SwitchBranch {
                        case_value: *key as i32,
                        offset,
                    };
                }
                branch_i += 1;
                for s in &case.body {
                    self.statement(s)?;
                }
            } else {
                has_default = true;
                if let Some(Instruction::Switch(table)) = self.st.code.get_mut(switch_index) {
                    table.default_offset = offset;
                }
                // A default arm that opens with break falls straight out of
                // the switch; its body is dropped entirely.
                let opens_with_break =
                    matches!(case.body.first(), Some(first) if matches!(first.kind, StmtKind::Break));
                if !opens_with_break {
                    for s in &case.body {
                        self.statement(s)?;
                    }
                }
            }
        }

        let end = self.st.pc;
        if let Some(block) = self.frame.blocks.pop() {
            for jump in block.break_jumps {
                self.patch_jump(jump, end)?;
            }
        }
        if !has_default {
            if let Some(Instruction::Switch(table)) = self.st.code.get_mut(switch_index) {
                table.default_offset = (end - start) as i32;
            }
        }
        Ok(())
    }

    fn break_statement(&mut self) -> Result<()> {
        if self.frame.blocks.is_empty() {
            return Err(self.st.error(ErrorKind::BreakWithoutContextualScope));
        }
        let jump = JumpRef {
            at: self.st.pc,
            index: self.st.code.len(),
        };
        self.st.emit(Instruction::Jmp(0));
        if let Some(block) = self.frame.blocks.last_mut() {
            block.break_jumps.push(jump);
        }
        Ok(())
    }

    fn continue_statement(&mut self) -> Result<()> {
        if self.frame.innermost_loop().is_none() {
            return Err(self.st.error(ErrorKind::ContinueWithoutContextualScope));
        }
        let jump = JumpRef {
            at: self.st.pc,
            index: self.st.code.len(),
        };
        self.st.emit(Instruction::Jmp(0));
        if let Some(block) = self.frame.innermost_loop() {
            block.continue_jumps.push(jump);
        }
        Ok(())
    }

    fn return_statement(&mut self, argument: Option<&Expr>) -> Result<()> {
        if let Some(arg) = argument {
            self.expression(arg)?;
            self.st.functions[self.frame.id as usize].has_return_value = true;
        }
        self.st.emit(Instruction::Ret);
        Ok(())
    }

    fn var_decl(&mut self, declarators: &[Declarator]) -> Result<()> {
        for decl in declarators {
            self.st.add_identifier(&decl.name)?;
            if self
                .frame
                .locals
                .as_ref()
                .is_some_and(|l| l.contains(&decl.name))
            {
                return Err(self.st.error(ErrorKind::VariableRedeclaration));
            }

            let base = self.frame.locals.as_ref().map_or(0, LocalFrame::len) as u32;
            let slots = self.st.flatten_declarator(decl.init.as_ref(), base)?;
            let locals = self.frame.locals.get_or_insert_with(LocalFrame::new);
            for var in slots {
                locals.push(var);
            }
            locals.bind(&decl.name, base);

            // Scalar initializers also run at function entry; array contents
            // live purely in the frame's slot records.
            if let Some(init) = &decl.init {
                if !matches!(init.kind, ExprKind::Array(_)) {
                    self.expression(init)?;
                    self.store_local(base)?;
                }
            }
        }
        Ok(())
    }

    // ==================== Expressions ====================

    fn expression(&mut self, expr: &Expr) -> Result<()> {
        self.st.current_line = expr.line;
        match &expr.kind {
            ExprKind::Identifier(name) => self.load_identifier(name),
            ExprKind::Literal(lit) => self.literal(lit, false),
            ExprKind::Call { callee, arguments } => self.call(callee, arguments, false),
            ExprKind::Unary { op, argument } => self.unary(*op, argument),
            ExprKind::Update { op, argument } => self.update(*op, argument, true),
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right),
            ExprKind::Logical { op, left, right } => self.logical(*op, left, right),
            ExprKind::Assignment { op, target, value } => self.assignment(*op, target, value),
            ExprKind::Member { object, access } => self.member(object, access),
            ExprKind::Array(_) => Err(self.st.error(ErrorKind::UnsupportedExpression)),
        }
    }

    fn literal(&mut self, lit: &Literal, allow_immediate: bool) -> Result<()> {
        match lit {
            Literal::Int(v) => self.int_literal(*v, allow_immediate),
            Literal::Fixed(v) => self.fixed_literal(*v),
            Literal::Str(s) => {
                let index = self.st.string_pool.add_str(s) as u32;
                match self.ref_width(
                    index,
                    self.st.string_pool.len(),
                    ErrorKind::StringPoolIndexTooBig,
                )? {
                    RefWidth::Byte(i) => self.st.emit(Instruction::PoolStr(i)),
                    RefWidth::Word(i) => self.st.emit(Instruction::PoolStrW(i)),
                }
                Ok(())
            }
            Literal::Bool(true) => {
                self.st.emit(Instruction::LdTrue);
                Ok(())
            }
            Literal::Bool(false) => {
                self.st.emit(Instruction::LdFalse);
                Ok(())
            }
            Literal::Nil => {
                self.st.emit(Instruction::LdNil);
                Ok(())
            }
        }
    }

    /// Integers 0-4 use the zero-operand opcodes. The immediate forms are
    /// only legal where the VM expects an encoded count (call argument
    /// counts); everything else goes through the int pool.
    fn int_literal(&mut self, value: i32, allow_immediate: bool) -> Result<()> {
        let inst = match value {
            0 => Instruction::Const0,
            1 => Instruction::Const1,
            2 => Instruction::Const2,
            3 => Instruction::Const3,
            4 => Instruction::Const4,
            _ if allow_immediate && (0..=255).contains(&value) => Instruction::ConstI(value as u8),
            _ if allow_immediate && (0..=65535).contains(&value) => {
                Instruction::ConstIW(value as u16)
            }
            _ => {
                let index = self.st.int_pool.add(value) as u32;
                match self.ref_width(index, self.st.int_pool.len(), ErrorKind::IntPoolIndexTooBig)?
                {
                    RefWidth::Byte(i) => Instruction::PoolInt(i),
                    RefWidth::Word(i) => Instruction::PoolIntW(i),
                }
            }
        };
        self.st.emit(inst);
        Ok(())
    }

    fn fixed_literal(&mut self, value: f32) -> Result<()> {
        let index = self.st.fixed_pool.add(value) as u32;
        match self.ref_width(
            index,
            self.st.fixed_pool.len(),
            ErrorKind::FixedPoolIndexTooBig,
        )? {
            RefWidth::Byte(i) => self.st.emit(Instruction::PoolFloat(i)),
            RefWidth::Word(i) => self.st.emit(Instruction::PoolFloatW(i)),
        }
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, argument: &Expr) -> Result<()> {
        match (op, &argument.kind) {
            // Negated numeric literals fold into the literal itself.
            (UnaryOp::Minus, ExprKind::Literal(Literal::Int(v))) => self.int_literal(-v, false),
            (UnaryOp::Minus, ExprKind::Literal(Literal::Fixed(v))) => self.fixed_literal(-v),
            (UnaryOp::Minus, ExprKind::Literal(_)) => {
                Err(self.st.error(ErrorKind::UnaryInvalidLiteralType))
            }
            (UnaryOp::LogicalNot, _) => {
                self.expression(argument)?;
                self.st.emit(Instruction::LNot);
                Ok(())
            }
            (UnaryOp::Minus, _) => Err(self.st.error(ErrorKind::UnsupportedUnaryExpression)),
        }
    }

    fn update(&mut self, op: UpdateOp, argument: &Expr, keep_result: bool) -> Result<()> {
        self.expression(argument)?;
        self.st.emit(match op {
            UpdateOp::Increment => Instruction::Inc,
            UpdateOp::Decrement => Instruction::Dec,
        });
        if !matches!(argument.kind, ExprKind::Call { .. }) {
            self.store(argument)?;
            if keep_result {
                self.expression(argument)?;
            }
        }
        Ok(())
    }

    /// Right operand first: the VM pops the left operand off the top.
    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<()> {
        self.expression(right)?;
        self.expression(left)?;
        self.st.emit(binary_instruction(op));
        Ok(())
    }

    fn logical(&mut self, op: LogicalOp, left: &Expr, right: &Expr) -> Result<()> {
        self.expression(right)?;
        self.expression(left)?;
        self.st.emit(match op {
            LogicalOp::Or => Instruction::LOr,
            LogicalOp::And => Instruction::LAnd,
        });
        Ok(())
    }

    fn assignment(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Result<()> {
        if op == AssignOp::Assign {
            self.expression(value)?;
            return self.store(target);
        }
        let inst = match op {
            AssignOp::Add => Instruction::Add,
            AssignOp::Sub => Instruction::Sub,
            AssignOp::Mul => Instruction::Mul,
            AssignOp::Div => Instruction::Div,
            AssignOp::Mod => Instruction::Mod,
            AssignOp::LShift => Instruction::LShift,
            AssignOp::RShift => Instruction::RShift,
            AssignOp::BitOr => Instruction::Or,
            AssignOp::BitAnd => Instruction::And,
            AssignOp::Assign => {
                return Err(self.st.error(ErrorKind::UnsupportedAssignmentExpression));
            }
        };
        self.expression(value)?;
        self.expression(target)?;
        self.st.emit(inst);
        self.store(target)
    }

    fn member(&mut self, object: &Expr, access: &MemberAccess) -> Result<()> {
        match access {
            MemberAccess::Computed(property) => {
                if let ExprKind::Literal(lit) = &property.kind {
                    if !matches!(lit, Literal::Int(_)) {
                        return Err(self
                            .st
                            .error(ErrorKind::ExpectedExpressionOrNumberInArrayAccess));
                    }
                }
                self.expression(object)?;
                self.expression(property)?;
                self.st.emit(Instruction::LdAr);
                Ok(())
            }
            MemberAccess::Attribute(property) => {
                self.expression(object)?;
                let index = self.st.add_identifier(property)? as u32;
                match self.ref_width(
                    index,
                    self.st.identifiers.len(),
                    ErrorKind::ExceededMaximumIdentifierCount,
                )? {
                    RefWidth::Byte(i) => self.st.emit(Instruction::Getter(i)),
                    RefWidth::Word(i) => self.st.emit(Instruction::GetterW(i)),
                }
                Ok(())
            }
            MemberAccess::Namespace(_) => Err(self.st.error(ErrorKind::UnsupportedExpression)),
        }
    }

    fn call(&mut self, callee: &Expr, arguments: &[Expr], pop_return: bool) -> Result<()> {
        if let ExprKind::Identifier(name) = &callee.kind {
            match name.as_str() {
                "next" => {
                    if !arguments.is_empty() {
                        return Err(self.st.error(ErrorKind::InvalidNextWithArguments));
                    }
                    self.st.emit(Instruction::Next);
                    return Ok(());
                }
                "typeof" => {
                    if arguments.len() != 1 {
                        return Err(self.st.error(ErrorKind::MissingTypeOfArgument));
                    }
                    self.expression(&arguments[0])?;
                    self.st.emit(Instruction::TypeOf);
                    return Ok(());
                }
                "sizeof" => {
                    if arguments.len() != 1 {
                        return Err(self.st.error(ErrorKind::MissingSizeOfArgument));
                    }
                    self.expression(&arguments[0])?;
                    self.st.emit(Instruction::SizeOf);
                    return Ok(());
                }
                _ => {}
            }
        }

        for arg in arguments.iter().rev() {
            self.expression(arg)?;
        }
        // Bit 0x100 of the encoded count tells the VM to keep the return
        // value; statement-position calls discard it.
        let count = arguments.len() as i32;
        self.int_literal(if pop_return { count } else { count | 0x100 }, true)?;

        match &callee.kind {
            ExprKind::Identifier(name) => match self.resolve(name, true) {
                Binding::Oc => {
                    let id = self.st.add_oc(name)?;
                    match self.ref_width(
                        id,
                        self.st.oc_imports.len(),
                        ErrorKind::ExceededMaximumOcCount,
                    )? {
                        RefWidth::Byte(i) => self.st.emit(Instruction::GetOc(i)),
                        RefWidth::Word(i) => self.st.emit(Instruction::GetOcW(i)),
                    }
                    Ok(())
                }
                Binding::Function(id) => {
                    match self.ref_width(
                        id,
                        self.st.functions.len(),
                        ErrorKind::ExceededMaximumFunctionCount,
                    )? {
                        RefWidth::Byte(i) => self.st.emit(Instruction::Call(i)),
                        RefWidth::Word(i) => self.st.emit(Instruction::CallW(i)),
                    }
                    Ok(())
                }
                Binding::Local(_) => {
                    self.load_identifier(name)?;
                    self.st.emit(Instruction::CallInd);
                    Ok(())
                }
                _ => Err(self.st.error(ErrorKind::CallToUndeclaredFunction)),
            },
            ExprKind::Member { object, access } => {
                let ExprKind::Identifier(object_name) = &object.kind else {
                    return Err(self.st.error(ErrorKind::UnsupportedCallType));
                };
                match access {
                    MemberAccess::Attribute(method) => {
                        self.load_identifier(object_name)?;
                        let index = self.st.add_identifier(method)? as u32;
                        match self.ref_width(
                            index,
                            self.st.identifiers.len(),
                            ErrorKind::ExceededMaximumIdentifierCount,
                        )? {
                            RefWidth::Byte(i) => self.st.emit(Instruction::Send(i)),
                            RefWidth::Word(i) => self.st.emit(Instruction::SendW(i)),
                        }
                        Ok(())
                    }
                    MemberAccess::Namespace(function) => {
                        let id = self.st.add_plugin_import(object_name, function)?;
                        match self.ref_width(
                            id,
                            self.st.plugin_imports.len(),
                            ErrorKind::ExceededMaximumPluginImports,
                        )? {
                            RefWidth::Byte(i) => self.st.emit(Instruction::Plugin(i)),
                            RefWidth::Word(i) => self.st.emit(Instruction::PluginW(i)),
                        }
                        Ok(())
                    }
                    MemberAccess::Computed(_) => {
                        Err(self.st.error(ErrorKind::UnsupportedCallType))
                    }
                }
            }
            _ => Err(self.st.error(ErrorKind::UnsupportedCallType)),
        }
    }

    // ==================== Identifier access ====================

    fn resolve(&self, name: &str, allow_oc: bool) -> Binding {
        if allow_oc && OC_NAMES.contains(&name) {
            return Binding::Oc;
        }
        // Shadowing order: locals over arguments over statics over
        // functions.
        if let Some(locals) = &self.frame.locals {
            if let Some(slot) = locals.slot_of(name) {
                return Binding::Local(slot);
            }
        }
        if let Some(pos) = self.st.functions[self.frame.id as usize]
            .arguments
            .iter()
            .position(|a| a == name)
        {
            return Binding::Argument(pos);
        }
        if let Some(&id) = self.st.static_ids.get(name) {
            return Binding::Static(id);
        }
        if let Some(&id) = self.st.function_ids.get(name) {
            return Binding::Function(id);
        }
        Binding::Undefined
    }

    fn load_identifier(&mut self, name: &str) -> Result<()> {
        match self.resolve(name, false) {
            Binding::Local(slot) => self.load_local(slot),
            Binding::Argument(pos) => {
                let inst = match pos {
                    0 => Instruction::LdArg0,
                    1 => Instruction::LdArg1,
                    2 => Instruction::LdArg2,
                    3 => Instruction::LdArg3,
                    _ if pos <= u8::MAX as usize => Instruction::LdArg(pos as u8),
                    _ => return Err(self.st.error(ErrorKind::ExceededMaximumArgumentCount)),
                };
                self.st.emit(inst);
                Ok(())
            }
            Binding::Static(id) => {
                match self.ref_width(
                    id,
                    self.st.statics.len(),
                    ErrorKind::ExceededMaximumStaticCount,
                )? {
                    RefWidth::Byte(i) => self.st.emit(Instruction::LdStatic(i)),
                    RefWidth::Word(i) => self.st.emit(Instruction::LdStaticW(i)),
                }
                Ok(())
            }
            Binding::Function(id) => {
                match self.ref_width(
                    id,
                    self.st.functions.len(),
                    ErrorKind::ExceededMaximumFunctionCount,
                )? {
                    RefWidth::Byte(i) => self.st.emit(Instruction::LdFunc(i)),
                    RefWidth::Word(i) => self.st.emit(Instruction::LdFuncW(i)),
                }
                Ok(())
            }
            Binding::Oc | Binding::Undefined => {
                Err(self.st.error(ErrorKind::UndefinedIdentifier))
            }
        }
    }

    fn store(&mut self, target: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Identifier(name) => self.store_identifier(name),
            ExprKind::Member { object, access } => match access {
                MemberAccess::Attribute(property) => {
                    let ExprKind::Identifier(object_name) = &object.kind else {
                        return Err(self
                            .st
                            .error(ErrorKind::InvalidAttributeMemberExpressionAssignment));
                    };
                    self.load_identifier(object_name)?;
                    let index = self.st.add_identifier(property)? as u32;
                    match self.ref_width(
                        index,
                        self.st.identifiers.len(),
                        ErrorKind::ExceededMaximumIdentifierCount,
                    )? {
                        RefWidth::Byte(i) => self.st.emit(Instruction::Setter(i)),
                        RefWidth::Word(i) => self.st.emit(Instruction::SetterW(i)),
                    }
                    Ok(())
                }
                MemberAccess::Computed(property) => {
                    self.expression(object)?;
                    if let ExprKind::Literal(lit) = &property.kind {
                        if !matches!(lit, Literal::Int(_)) {
                            return Err(self
                                .st
                                .error(ErrorKind::ExpectedExpressionOrNumberInArrayAccess));
                        }
                    }
                    self.expression(property)?;
                    self.st.emit(Instruction::StAr);
                    Ok(())
                }
                MemberAccess::Namespace(_) => {
                    Err(self.st.error(ErrorKind::UnexpectedMemberAssignmentType))
                }
            },
            _ => Err(self.st.error(ErrorKind::InvalidAssignmentTarget)),
        }
    }

    fn store_identifier(&mut self, name: &str) -> Result<()> {
        match self.resolve(name, false) {
            Binding::Local(slot) => self.store_local(slot),
            Binding::Argument(pos) => {
                let inst = match pos {
                    0 => Instruction::StArg0,
                    1 => Instruction::StArg1,
                    2 => Instruction::StArg2,
                    3 => Instruction::StArg3,
                    _ if pos <= u8::MAX as usize => Instruction::StArg(pos as u8),
                    _ => return Err(self.st.error(ErrorKind::ExceededMaximumArgumentCount)),
                };
                self.st.emit(inst);
                Ok(())
            }
            Binding::Static(id) => {
                match self.ref_width(
                    id,
                    self.st.statics.len(),
                    ErrorKind::ExceededMaximumStaticCount,
                )? {
                    RefWidth::Byte(i) => self.st.emit(Instruction::StStatic(i)),
                    RefWidth::Word(i) => self.st.emit(Instruction::StStaticW(i)),
                }
                Ok(())
            }
            Binding::Function(_) => Err(self.st.error(ErrorKind::AssignToFunction)),
            Binding::Oc | Binding::Undefined => {
                Err(self.st.error(ErrorKind::InvalidAssignmentTarget))
            }
        }
    }

    fn load_local(&mut self, slot: u32) -> Result<()> {
        let inst = match slot {
            0 => Instruction::Ld0,
            1 => Instruction::Ld1,
            2 => Instruction::Ld2,
            3 => Instruction::Ld3,
            _ if slot <= u8::MAX as u32 => Instruction::Ld(slot as u8),
            _ => return Err(self.st.error(ErrorKind::ExceededMaximumLocalsCount)),
        };
        self.st.emit(inst);
        Ok(())
    }

    fn store_local(&mut self, slot: u32) -> Result<()> {
        let inst = match slot {
            0 => Instruction::St0,
            1 => Instruction::St1,
            2 => Instruction::St2,
            3 => Instruction::St3,
            _ if slot <= u8::MAX as u32 => Instruction::St(slot as u8),
            _ => return Err(self.st.error(ErrorKind::ExceededMaximumLocalsCount)),
        };
        self.st.emit(inst);
        Ok(())
    }

    // ==================== Jump bookkeeping ====================

    fn forward_jump(&mut self, inst: Instruction) -> JumpRef {
        let jump = JumpRef {
            at: self.st.pc,
            index: self.st.code.len(),
        };
        self.st.emit(inst);
        jump
    }

    fn patch_jump(&mut self, jump: JumpRef, target: u32) -> Result<()> {
        let delta = i16::try_from(i64::from(target) - i64::from(jump.at))
            .map_err(|_| self.st.error(ErrorKind::JumpOffsetTooFar))?;
        if let Some(Instruction::Jmp(ofs) | Instruction::Jpf(ofs)) =
            self.st.code.get_mut(jump.index)
        {
            *ofs = delta;
        }
        Ok(())
    }

    fn jump_back(&mut self, target: u32) -> Result<()> {
        let delta = i16::try_from(i64::from(target) - i64::from(self.st.pc))
            .map_err(|_| self.st.error(ErrorKind::JumpOffsetTooFar))?;
        self.st.emit(Instruction::Jmp(delta));
        Ok(())
    }

    fn ref_width(&self, index: u32, table_len: usize, overflow: ErrorKind) -> Result<RefWidth> {
        if table_len <= u8::MAX as usize {
            Ok(RefWidth::Byte(index as u8))
        } else if table_len <= u16::MAX as usize {
            Ok(RefWidth::Word(index as u16))
        } else {
            Err(self.st.error(overflow))
        }
    }
}

fn binary_instruction(op: BinaryOp) -> Instruction {
    match op {
        BinaryOp::Add => Instruction::Add,
        BinaryOp::Sub => Instruction::Sub,
        BinaryOp::Mul => Instruction::Mul,
        BinaryOp::Div => Instruction::Div,
        BinaryOp::Mod => Instruction::Mod,
        BinaryOp::Eq => Instruction::Eq,
        BinaryOp::Ne => Instruction::Ne,
        BinaryOp::Gt => Instruction::Gt,
        BinaryOp::Ge => Instruction::Ge,
        BinaryOp::Lt => Instruction::Lt,
        BinaryOp::Le => Instruction::Le,
        BinaryOp::LShift => Instruction::LShift,
        BinaryOp::RShift => Instruction::RShift,
        BinaryOp::BitAnd => Instruction::And,
        BinaryOp::BitOr => Instruction::Or,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarKind;

    fn compile(body: Vec<Stmt>) -> CompiledScript {
        Compiler::new("test.sc")
            .compile(&Script { body })
            .unwrap()
    }

    fn compile_err(body: Vec<Stmt>) -> ErrorKind {
        Compiler::new("test.sc")
            .compile(&Script { body })
            .unwrap_err()
            .kind
    }

    #[test]
    fn test_empty_script_is_exit_only() {
        let script = compile(vec![]);
        assert_eq!(script.code, vec![Instruction::Exit]);
        assert_eq!(script.functions.len(), 1);
        assert_eq!(script.functions[0].code_start, 0);
        assert_eq!(script.functions[0].code_end, 0);
        assert!(script.local_pool.is_empty());
    }

    #[test]
    fn test_declaration_and_add_in_entry_function() {
        let script = compile(vec![
            Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 1))),
            Stmt::expression(
                2,
                Expr::assign(
                    2,
                    Expr::identifier(2, "x"),
                    Expr::binary(
                        2,
                        BinaryOp::Add,
                        Expr::identifier(2, "x"),
                        Expr::int(2, 1),
                    ),
                ),
            ),
        ]);
        assert_eq!(
            script.code,
            vec![
                Instruction::Const1,
                Instruction::St0,
                Instruction::Const1,
                Instruction::Ld0,
                Instruction::Add,
                Instruction::St0,
                Instruction::Exit,
            ]
        );
        assert_eq!(script.functions[0].local_count, 1);
        assert_eq!(script.functions[0].local_pool_index, Some(0));
        assert_eq!(script.local_pool[0].len(), 1);
        assert!(script.int_pool.is_empty());
    }

    #[test]
    fn test_if_else_offsets() {
        // if (1) { 2; } else { 3; }
        let script = compile(vec![Stmt {
            line: 1,
            kind: StmtKind::If {
                test: Expr::int(1, 1),
                consequent: Box::new(Stmt::expression(1, Expr::int(1, 2))),
                alternate: Some(Box::new(Stmt::expression(1, Expr::int(1, 3)))),
            },
        }]);
        // CONST_1, JPF +7, CONST_2, JMP +4, CONST_3, EXIT
        assert_eq!(
            script.code,
            vec![
                Instruction::Const1,
                Instruction::Jpf(7),
                Instruction::Const2,
                Instruction::Jmp(4),
                Instruction::Const3,
                Instruction::Exit,
            ]
        );
    }

    #[test]
    fn test_while_loop_shape() {
        // while (1) {}  →  CONST_1, JPF +6, JMP -4, EXIT
        let script = compile(vec![Stmt {
            line: 1,
            kind: StmtKind::While {
                test: Expr::int(1, 1),
                body: Box::new(Stmt {
                    line: 1,
                    kind: StmtKind::Block(vec![]),
                }),
            },
        }]);
        assert_eq!(
            script.code,
            vec![
                Instruction::Const1,
                Instruction::Jpf(6),
                Instruction::Jmp(-4),
                Instruction::Exit,
            ]
        );
    }

    #[test]
    fn test_call_keeps_or_discards_return() {
        let body = vec![
            Stmt::function(1, "f", vec![], vec![]),
            // Statement position: count without the keep-result bit.
            Stmt::expression(2, Expr::call(2, Expr::identifier(2, "f"), vec![])),
            // Value position: the keep-result bit forces the wide form.
            Stmt::var(
                3,
                VarKind::Int,
                "x",
                Some(Expr::int(3, 0)),
            ),
            Stmt::expression(
                4,
                Expr::assign(
                    4,
                    Expr::identifier(4, "x"),
                    Expr::call(4, Expr::identifier(4, "f"), vec![]),
                ),
            ),
        ];
        let script = compile(body);
        assert!(script.code.contains(&Instruction::Const0));
        assert!(script.code.contains(&Instruction::Call(1)));
        assert!(script.code.contains(&Instruction::ConstIW(0x100)));
    }

    #[test]
    fn test_undefined_identifier_reports_location() {
        let err = Compiler::new("quest.sc")
            .compile(&Script {
                body: vec![Stmt::expression(7, Expr::identifier(7, "ghost"))],
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedIdentifier);
        assert_eq!(err.location.line, 7);
        assert_eq!(err.location.file, "quest.sc");
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let kind = compile_err(vec![Stmt {
            line: 1,
            kind: StmtKind::Break,
        }]);
        assert_eq!(kind, ErrorKind::BreakWithoutContextualScope);
    }

    #[test]
    fn test_continue_outside_loop_rejected() {
        let kind = compile_err(vec![Stmt {
            line: 1,
            kind: StmtKind::Continue,
        }]);
        assert_eq!(kind, ErrorKind::ContinueWithoutContextualScope);
    }

    #[test]
    fn test_continue_needs_a_loop_not_just_a_switch() {
        // A switch block alone offers break scope but no continue scope.
        let body = vec![
            Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
            Stmt {
                line: 2,
                kind: StmtKind::Switch {
                    discriminant: Expr::identifier(2, "x"),
                    cases: vec![SwitchCase {
                        test: None,
                        body: vec![Stmt {
                            line: 3,
                            kind: StmtKind::Continue,
                        }],
                    }],
                },
            },
        ];
        assert_eq!(
            compile_err(body),
            ErrorKind::ContinueWithoutContextualScope
        );
    }

    #[test]
    fn test_release_build_has_no_debug_info() {
        let script = Compiler::new("test.sc")
            .debug_info(false)
            .compile(&Script { body: vec![] })
            .unwrap();
        assert!(script.debug_info.is_none());
    }
}
