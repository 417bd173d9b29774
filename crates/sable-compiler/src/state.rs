//! Shared compilation state.
//!
//! Both passes (symbol scan and code generation) work against this one
//! structure: the literal pools, the function/static/import registries, the
//! emitted instruction list with its running byte offset, and the debug
//! line/file bookkeeping.

use rustc_hash::FxHashMap;
use sable_bytecode::{
    FixedPool, FunctionInfo, Instruction, LineEntry, LocalFrame, ObjectConstructor, PluginImport,
    Pool, VarType, VarValue, Variable,
};

use crate::ast::{Expr, ExprKind, Literal, UnaryOp};
use crate::error::{CompileError, ErrorKind, Location, Result};

/// The engine's closed object-constructor vocabulary, recognized by name in
/// call-callee position.
pub(crate) const OC_NAMES: [&str; 11] = [
    "builtin", "thread", "bdat", "msgYuka", "msgNpc", "unit", "obj", "point", "effect", "attr",
    "cfp",
];

pub(crate) struct CompilerState {
    pub debug: bool,

    pub code: Vec<Instruction>,
    /// Byte offset of the next emitted instruction.
    pub pc: u32,

    pub identifiers: Pool<String>,
    pub int_pool: Pool<i32>,
    pub fixed_pool: FixedPool,
    pub string_pool: Pool<String>,

    pub functions: Vec<FunctionInfo>,
    pub function_ids: FxHashMap<String, u32>,

    pub statics: Vec<Variable>,
    /// Named static slots in declaration order, for debug symbols.
    pub static_names: Vec<(String, u32)>,
    pub static_ids: FxHashMap<String, u32>,

    pub plugin_imports: Vec<PluginImport>,
    /// Keyed by `Namespace::function` path.
    pub plugin_ids: FxHashMap<String, u32>,
    pub oc_imports: Vec<ObjectConstructor>,
    pub oc_ids: FxHashMap<String, u32>,

    pub local_pool: Vec<LocalFrame>,

    /// Source file currently being compiled, for error locations.
    pub source_file: String,
    pub current_line: u32,
    pub file_names: Vec<String>,
    pub current_file: u16,
    pub lines: Vec<LineEntry>,
}

impl CompilerState {
    pub fn new(file_name: &str, debug: bool) -> Self {
        let mut state = Self {
            debug,
            code: Vec::new(),
            pc: 0,
            identifiers: Pool::new(),
            int_pool: Pool::new(),
            fixed_pool: FixedPool::new(),
            string_pool: Pool::new(),
            functions: Vec::new(),
            function_ids: FxHashMap::default(),
            statics: Vec::new(),
            static_names: Vec::new(),
            static_ids: FxHashMap::default(),
            plugin_imports: Vec::new(),
            plugin_ids: FxHashMap::default(),
            oc_imports: Vec::new(),
            oc_ids: FxHashMap::default(),
            local_pool: Vec::new(),
            source_file: String::new(),
            current_line: 0,
            file_names: Vec::new(),
            current_file: 0,
            lines: Vec::new(),
        };
        state.set_source_file(file_name);
        state
    }

    /// Appends an instruction, advancing the byte offset by its encoded
    /// size. Jump targets are patched later through the instruction list.
    pub fn emit(&mut self, inst: Instruction) {
        self.pc += inst.encoded_size() as u32;
        self.code.push(inst);
    }

    pub fn error(&self, kind: ErrorKind) -> CompileError {
        CompileError {
            kind,
            location: Location {
                file: self.source_file.clone(),
                line: self.current_line,
            },
        }
    }

    /// Switches the current source file, registering it in the debug
    /// file-name table on first sight.
    pub fn set_source_file(&mut self, name: &str) {
        self.source_file = name.to_owned();
        if !self.debug {
            return;
        }
        match self.file_names.iter().position(|f| f == name) {
            Some(idx) => self.current_file = idx as u16,
            None => {
                self.current_file = self.file_names.len() as u16;
                self.file_names.push(name.to_owned());
            }
        }
    }

    /// Records the statement starting at the current byte offset in the
    /// debug line map. A later statement at the same offset (because the
    /// earlier one emitted nothing) replaces the entry.
    pub fn record_line(&mut self, line: u32) {
        if !self.debug {
            return;
        }
        if let Some(last) = self.lines.last_mut() {
            if last.code_offset == self.pc {
                last.file_id = self.current_file;
                last.line = line as u16;
                return;
            }
        }
        self.lines.push(LineEntry {
            file_id: self.current_file,
            line: line as u16,
            code_offset: self.pc,
        });
    }

    pub fn add_identifier(&mut self, name: &str) -> Result<u16> {
        let idx = self.identifiers.add_str(name);
        if idx > u16::MAX as usize {
            return Err(self.error(ErrorKind::ExceededMaximumIdentifierCount));
        }
        Ok(idx as u16)
    }

    /// Registers an OC import on first use, returning its import id.
    pub fn add_oc(&mut self, name: &str) -> Result<u32> {
        if let Some(&id) = self.oc_ids.get(name) {
            return Ok(id);
        }
        let id = self.oc_imports.len() as u32;
        if id > u16::MAX as u32 {
            return Err(self.error(ErrorKind::ExceededMaximumOcCount));
        }
        let name_id = self.add_identifier(name)?;
        self.oc_imports.push(ObjectConstructor { id, name_id });
        self.oc_ids.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Resolves `Namespace::function` through the de-duplicated plugin
    /// import table, interning both names on first use.
    pub fn add_plugin_import(&mut self, namespace: &str, function: &str) -> Result<u32> {
        let path = format!("{namespace}::{function}");
        if let Some(&id) = self.plugin_ids.get(&path) {
            return Ok(id);
        }
        let id = self.plugin_imports.len() as u32;
        if id > u16::MAX as u32 {
            return Err(self.error(ErrorKind::ExceededMaximumPluginImports));
        }
        let plugin_name_id = self.add_identifier(namespace)?;
        let function_name_id = self.add_identifier(function)?;
        self.plugin_imports.push(PluginImport {
            id,
            plugin_name_id,
            function_name_id,
        });
        self.plugin_ids.insert(path, id);
        Ok(id)
    }

    /// Flattens one declarator into variable records, ids starting at
    /// `base`. A scalar yields one record; an array yields its own record
    /// followed by all element slots, siblings before nested subtrees so
    /// each level's slots stay contiguous.
    pub fn flatten_declarator(&mut self, init: Option<&Expr>, base: u32) -> Result<Vec<Variable>> {
        let mut slots = Vec::new();
        match init {
            None => slots.push(Variable::new(base, VarType::Int, VarValue::Int(0))),
            Some(expr) => match &expr.kind {
                ExprKind::Array(elements) => {
                    let mut parent = Variable::new(
                        base,
                        VarType::Array,
                        VarValue::ArrayStart(base + 1),
                    );
                    parent.array_size = self.array_size(elements)?;
                    slots.push(parent);
                    self.flatten_array(elements, base, &mut slots)?;
                }
                _ => {
                    let var = self
                        .literal_slot(expr, base)
                        .map_err(|_| self.error(ErrorKind::UnexpectedVariableDeclaratorType))?;
                    slots.push(var);
                }
            },
        }
        Ok(slots)
    }

    fn flatten_array(
        &mut self,
        elements: &[Expr],
        base: u32,
        slots: &mut Vec<Variable>,
    ) -> Result<()> {
        let first = slots.len();
        // Sibling slots first; nested subtrees are appended afterwards so
        // this level's indices stay contiguous.
        for element in elements {
            let id = base + slots.len() as u32;
            let var = match &element.kind {
                ExprKind::Array(_) => Variable::new(id, VarType::Array, VarValue::ArrayStart(0)),
                _ => self.literal_slot(element, id)?,
            };
            slots.push(var);
        }
        for (i, element) in elements.iter().enumerate() {
            if let ExprKind::Array(children) = &element.kind {
                let start = base + slots.len() as u32;
                let slot = &mut slots[first + i];
                slot.array_size = self.array_size_of(children)?;
                slot.value = VarValue::ArrayStart(start);
                self.flatten_array(children, base, slots)?;
            }
        }
        Ok(())
    }

    fn array_size(&self, elements: &[Expr]) -> Result<u16> {
        u16::try_from(elements.len()).map_err(|_| self.error(ErrorKind::UnsupportedArrayElement))
    }

    fn array_size_of(&self, elements: &[Expr]) -> Result<u16> {
        self.array_size(elements)
    }

    /// Builds the record for a literal-valued slot, folding a unary minus
    /// on a numeric literal into a negated value.
    fn literal_slot(&mut self, expr: &Expr, id: u32) -> Result<Variable> {
        match &expr.kind {
            ExprKind::Literal(lit) => self.literal_value(lit, id),
            ExprKind::Unary {
                op: UnaryOp::Minus,
                argument,
            } => match &argument.kind {
                ExprKind::Literal(Literal::Int(v)) => {
                    self.literal_value(&Literal::Int(-v), id)
                }
                ExprKind::Literal(Literal::Fixed(v)) => {
                    self.literal_value(&Literal::Fixed(-v), id)
                }
                ExprKind::Literal(_) => Err(self.error(ErrorKind::UnaryInvalidLiteralType)),
                _ => Err(self.error(ErrorKind::UnsupportedArrayElement)),
            },
            _ => Err(self.error(ErrorKind::UnsupportedArrayElement)),
        }
    }

    fn literal_value(&mut self, lit: &Literal, id: u32) -> Result<Variable> {
        match lit {
            Literal::Int(v) => Ok(Variable::new(id, VarType::Int, VarValue::Int(*v))),
            Literal::Fixed(v) => Ok(Variable::new(id, VarType::Fixed, VarValue::Fixed(*v))),
            Literal::Str(s) => {
                let idx = self.string_pool.add_str(s);
                if idx > u16::MAX as usize {
                    return Err(self.error(ErrorKind::StringPoolIndexTooBig));
                }
                Ok(Variable::new(
                    id,
                    VarType::String,
                    VarValue::StringIndex(idx as u32),
                ))
            }
            Literal::Bool(_) | Literal::Nil => {
                Err(self.error(ErrorKind::UnsupportedArrayElement))
            }
        }
    }
}
