//! Per-function compilation state: the local frame and the break/continue
//! scope stack.

use sable_bytecode::LocalFrame;

/// A forward jump awaiting its target: the instruction's byte offset and its
/// index in the emitted instruction list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JumpRef {
    pub at: u32,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlKind {
    Loop,
    Switch,
}

/// One enclosing loop or switch. `break` targets the innermost block of
/// either kind; `continue` only ever targets a loop.
#[derive(Debug)]
pub(crate) struct ControlBlock {
    pub kind: ControlKind,
    pub break_jumps: Vec<JumpRef>,
    pub continue_jumps: Vec<JumpRef>,
}

impl ControlBlock {
    pub fn new(kind: ControlKind) -> Self {
        Self {
            kind,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        }
    }
}

/// State of the function currently being compiled.
///
/// The local frame is created lazily on the first declaration, matching the
/// container's convention that functions without locals have no local-pool
/// entry at all.
#[derive(Debug)]
pub(crate) struct FuncFrame {
    pub id: u32,
    pub locals: Option<LocalFrame>,
    pub blocks: Vec<ControlBlock>,
}

impl FuncFrame {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            locals: None,
            blocks: Vec::new(),
        }
    }

    pub fn innermost_loop(&mut self) -> Option<&mut ControlBlock> {
        self.blocks
            .iter_mut()
            .rev()
            .find(|b| b.kind == ControlKind::Loop)
    }
}
