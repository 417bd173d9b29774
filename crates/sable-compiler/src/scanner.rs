//! Declaration scan (pass 1).
//!
//! Walks the top level once before any code is generated: function
//! declarations get their table slot and argument count, static declarations
//! get their variable records, and every plain identifier inside a function
//! body is pre-registered in the identifier pool so pass 2 never grows it
//! for ordinary names. Nested variable declarators are left alone; pass 2
//! resolves those lazily. Everything else at the top level is collected, in
//! order, for the synthetic entry function.

use sable_bytecode::FunctionInfo;

use crate::ast::{
    Declarator, Expr, ExprKind, ForInit, FunctionDecl, MemberAccess, Script, Stmt, StmtKind,
};
use crate::error::{ErrorKind, Result};
use crate::state::CompilerState;

pub(crate) fn scan(state: &mut CompilerState, script: &Script) -> Result<Vec<Stmt>> {
    let mut top_level = Vec::new();
    let mut static_names: Vec<String> = Vec::new();

    for stmt in &script.body {
        state.current_line = stmt.line;
        match &stmt.kind {
            StmtKind::FunctionDecl(decl) => scan_function(state, decl)?,
            StmtKind::StaticDecl { declarators, .. } => {
                preprocess_statics(state, declarators)?;
                if let Some(first) = declarators.first() {
                    static_names.push(first.name.clone());
                }
            }
            _ => top_level.push(stmt.clone()),
        }
    }

    // Static names enter the identifier pool after every function has been
    // scanned, keeping them out of the code-referenced index range.
    for name in static_names {
        state.add_identifier(&name)?;
    }

    Ok(top_level)
}

fn scan_function(state: &mut CompilerState, decl: &FunctionDecl) -> Result<()> {
    if decl.name == "_main_" {
        return Err(state.error(ErrorKind::MainFunctionAlreadyDeclared));
    }
    if state.function_ids.contains_key(&decl.name) {
        return Err(state.error(ErrorKind::FunctionRedeclaration));
    }
    let name_id = state.add_identifier(&decl.name)?;
    let id = state.functions.len() as u32;
    if id > u16::MAX as u32 {
        return Err(state.error(ErrorKind::ExceededMaximumFunctionCount));
    }
    if decl.params.len() > u8::MAX as usize {
        return Err(state.error(ErrorKind::ExceededMaximumArgumentCount));
    }

    let mut info = FunctionInfo::new(id, name_id);
    info.arg_count = decl.params.len() as u16;
    state.functions.push(info);
    state.function_ids.insert(decl.name.clone(), id);

    for param in &decl.params {
        state.add_identifier(param)?;
    }
    for stmt in &decl.body {
        scan_stmt(state, stmt)?;
    }
    Ok(())
}

fn preprocess_statics(state: &mut CompilerState, declarators: &[Declarator]) -> Result<()> {
    for decl in declarators {
        if state.static_ids.contains_key(&decl.name) {
            return Err(state.error(ErrorKind::StaticAlreadyDeclared));
        }
        let base = state.statics.len() as u32;
        if base > u16::MAX as u32 {
            return Err(state.error(ErrorKind::ExceededMaximumStaticCount));
        }
        let slots = state.flatten_declarator(decl.init.as_ref(), base)?;
        state.statics.extend(slots);
        state.static_names.push((decl.name.clone(), base));
        state.static_ids.insert(decl.name.clone(), base);
    }
    Ok(())
}

fn scan_stmt(state: &mut CompilerState, stmt: &Stmt) -> Result<()> {
    state.current_line = stmt.line;
    match &stmt.kind {
        StmtKind::Expression(expr) => scan_expr(state, expr)?,
        StmtKind::Block(stmts) => {
            for s in stmts {
                scan_stmt(state, s)?;
            }
        }
        StmtKind::If {
            test,
            consequent,
            alternate,
        } => {
            scan_expr(state, test)?;
            scan_stmt(state, consequent)?;
            if let Some(alt) = alternate {
                scan_stmt(state, alt)?;
            }
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            // Declarator initializers stay un-scanned, like free-standing
            // variable declarations.
            if let Some(ForInit::Expr(expr)) = init {
                scan_expr(state, expr)?;
            }
            if let Some(test) = test {
                scan_expr(state, test)?;
            }
            if let Some(update) = update {
                scan_expr(state, update)?;
            }
            scan_stmt(state, body)?;
        }
        StmtKind::While { test, body } => {
            scan_expr(state, test)?;
            scan_stmt(state, body)?;
        }
        StmtKind::DoWhile { body, test } => {
            scan_stmt(state, body)?;
            scan_expr(state, test)?;
        }
        StmtKind::Switch {
            discriminant,
            cases,
        } => {
            scan_expr(state, discriminant)?;
            for case in cases {
                for s in &case.body {
                    scan_stmt(state, s)?;
                }
            }
        }
        StmtKind::Return(Some(expr)) => scan_expr(state, expr)?,
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
        StmtKind::VarDecl { .. } => {}
        StmtKind::FunctionDecl(_) => {
            return Err(state.error(ErrorKind::NestedFunctionDeclaration));
        }
        StmtKind::StaticDecl { .. } => {
            return Err(state.error(ErrorKind::StaticDeclarationInFunction));
        }
        StmtKind::SourceFile(_) => {}
    }
    Ok(())
}

fn scan_expr(state: &mut CompilerState, expr: &Expr) -> Result<()> {
    match &expr.kind {
        ExprKind::Identifier(name) => {
            state.add_identifier(name)?;
        }
        ExprKind::Literal(_) => {}
        ExprKind::Array(elements) => {
            for e in elements {
                scan_expr(state, e)?;
            }
        }
        ExprKind::Unary { argument, .. } | ExprKind::Update { argument, .. } => {
            scan_expr(state, argument)?;
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            scan_expr(state, left)?;
            scan_expr(state, right)?;
        }
        ExprKind::Assignment { target, value, .. } => {
            scan_expr(state, target)?;
            scan_expr(state, value)?;
        }
        ExprKind::Call { callee, arguments } => {
            scan_expr(state, callee)?;
            for arg in arguments {
                scan_expr(state, arg)?;
            }
        }
        ExprKind::Member { object, access } => {
            scan_expr(state, object)?;
            match access {
                MemberAccess::Computed(prop) => scan_expr(state, prop)?,
                MemberAccess::Attribute(name) | MemberAccess::Namespace(name) => {
                    state.add_identifier(name)?;
                }
            }
        }
    }
    Ok(())
}
