//! Compilation errors.
//!
//! Every failure carries the source location that was current when it was
//! raised, so messages render as `<message> at <file>:<line>`.

use std::fmt;

use thiserror::Error;

/// Source position of a compilation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {location}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    // Declarations
    #[error("call to undeclared function")]
    CallToUndeclaredFunction,
    #[error("static was already declared")]
    StaticAlreadyDeclared,
    #[error("local variable is already declared")]
    VariableRedeclaration,
    #[error("undefined identifier")]
    UndefinedIdentifier,
    #[error("function already declared")]
    FunctionRedeclaration,

    // Entry point and frame rules
    #[error("cannot explicitly declare _main_")]
    MainFunctionAlreadyDeclared,
    #[error("locals cannot be declared in the top level")]
    CannotDeclareLocalsInTopLevel,
    #[error("only static and function declarations are allowed in the top frame")]
    StatementInTopFrame,
    #[error("attempted to assign to a function")]
    AssignToFunction,
    #[error("nested function declarations are not allowed")]
    NestedFunctionDeclaration,
    #[error("static declarations are not allowed inside functions")]
    StaticDeclarationInFunction,

    // Capacity limits
    #[error("too many plugin imports (> 65535)")]
    ExceededMaximumPluginImports,
    #[error("too many integers in pool (> 65535)")]
    IntPoolIndexTooBig,
    #[error("too many fixed values in pool (> 65535)")]
    FixedPoolIndexTooBig,
    #[error("too many strings in pool (> 65535)")]
    StringPoolIndexTooBig,
    #[error("too many identifiers in pool (> 65535)")]
    ExceededMaximumIdentifierCount,
    #[error("too many statics (> 65535)")]
    ExceededMaximumStaticCount,
    #[error("too many functions (> 65535)")]
    ExceededMaximumFunctionCount,
    #[error("too many OC imports (> 65535)")]
    ExceededMaximumOcCount,
    #[error("too many locals (> 255)")]
    ExceededMaximumLocalsCount,
    #[error("too many function arguments (> 255)")]
    ExceededMaximumArgumentCount,
    #[error("jump offset does not fit in 16 bits")]
    JumpOffsetTooFar,

    // Switch and loop scoping
    #[error("too many switch cases (> 255)")]
    TooManySwitchCases,
    #[error("break outside of a loop or switch block")]
    BreakWithoutContextualScope,
    #[error("continue outside of a loop block")]
    ContinueWithoutContextualScope,
    #[error("expected integer literal for switch case")]
    ExpectedIntegerLiteralForSwitchTest,
    #[error("duplicate switch case")]
    DuplicateSwitchCaseTest,

    // Unsupported constructs
    #[error("unsupported expression")]
    UnsupportedExpression,
    #[error("unsupported unary expression")]
    UnsupportedUnaryExpression,
    #[error("unsupported assignment expression")]
    UnsupportedAssignmentExpression,
    #[error("expected an expression or integer in array access")]
    ExpectedExpressionOrNumberInArrayAccess,
    #[error("unexpected member assignment type")]
    UnexpectedMemberAssignmentType,
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("invalid literal type for unary operation")]
    UnaryInvalidLiteralType,
    #[error("unexpected variable declarator type")]
    UnexpectedVariableDeclaratorType,
    #[error("attribute member assignment requires identifier object and property")]
    InvalidAttributeMemberExpressionAssignment,
    #[error("unsupported array element")]
    UnsupportedArrayElement,
    #[error("unsupported or invalid statement")]
    UnsupportedStatementType,
    #[error("unsupported call type")]
    UnsupportedCallType,
    #[error("unsupported for-loop initializer")]
    UnsupportedForInit,

    // Built-in pseudo-calls
    #[error("next() cannot be called with arguments")]
    InvalidNextWithArguments,
    #[error("typeof() requires exactly 1 argument")]
    MissingTypeOfArgument,
    #[error("sizeof() requires exactly 1 argument")]
    MissingSizeOfArgument,
}

pub type Result<T> = std::result::Result<T, CompileError>;
