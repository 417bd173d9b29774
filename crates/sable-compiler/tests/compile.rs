//! End-to-end compilation tests: AST in, container bytes out, decoded and
//! disassembled back through the bytecode crate.

use sable_bytecode::{Instruction, ScriptFile, VarValue};
use sable_compiler::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, MemberAccess, Script, Stmt, StmtKind, SwitchCase,
    UpdateOp, VarKind,
};
use sable_compiler::{Compiler, ErrorKind};

fn compile(body: Vec<Stmt>) -> sable_bytecode::CompiledScript {
    Compiler::new("main.sc").compile(&Script { body }).unwrap()
}

fn compile_err(body: Vec<Stmt>) -> ErrorKind {
    Compiler::new("main.sc")
        .compile(&Script { body })
        .unwrap_err()
        .kind
}

fn attribute(line: u32, object: Expr, name: &str) -> Expr {
    Expr {
        line,
        kind: ExprKind::Member {
            object: Box::new(object),
            access: MemberAccess::Attribute(name.to_owned()),
        },
    }
}

fn namespace_call(line: u32, namespace: &str, function: &str, arguments: Vec<Expr>) -> Expr {
    let callee = Expr {
        line,
        kind: ExprKind::Member {
            object: Box::new(Expr::identifier(line, namespace)),
            access: MemberAccess::Namespace(function.to_owned()),
        },
    };
    Expr::call(line, callee, arguments)
}

#[test]
fn test_round_trip_through_container() {
    // static hp = 100;
    // function heal(amount) { hp = hp + amount; return hp; }
    // heal(25);
    // deb::put("healed");
    let body = vec![
        Stmt {
            line: 1,
            kind: StmtKind::StaticDecl {
                kind: VarKind::Int,
                declarators: vec![sable_compiler::ast::Declarator {
                    name: "hp".to_owned(),
                    init: Some(Expr::int(1, 100)),
                }],
            },
        },
        Stmt::function(
            2,
            "heal",
            vec!["amount".to_owned()],
            vec![
                Stmt::expression(
                    3,
                    Expr::assign(
                        3,
                        Expr::identifier(3, "hp"),
                        Expr::binary(
                            3,
                            BinaryOp::Add,
                            Expr::identifier(3, "hp"),
                            Expr::identifier(3, "amount"),
                        ),
                    ),
                ),
                Stmt::ret(4, Some(Expr::identifier(4, "hp"))),
            ],
        ),
        Stmt::expression(
            6,
            Expr::call(6, Expr::identifier(6, "heal"), vec![Expr::int(6, 25)]),
        ),
        Stmt::expression(
            7,
            namespace_call(7, "deb", "put", vec![Expr::string(7, "healed")]),
        ),
    ];

    let compiled = compile(body);
    let bytes = compiled.to_bytes().unwrap();
    let file = ScriptFile::from_bytes(&bytes).unwrap();

    assert_eq!(file.entry_point, 0);
    assert_eq!(file.int_pool, vec![25]);
    assert_eq!(file.string_pool, vec!["healed".to_owned()]);
    assert_eq!(file.statics.len(), 1);
    assert_eq!(file.statics[0].value, VarValue::Int(100));
    assert_eq!(file.functions.len(), 2);
    assert!(file.functions[1].has_return_value);
    assert_eq!(file.functions[1].arg_count, 1);
    assert_eq!(file.plugin_imports.len(), 1);
    for name in ["_main_", "heal", "amount", "deb", "put", "hp"] {
        assert!(
            file.identifiers.iter().any(|i| i == name),
            "missing identifier {name}"
        );
    }

    let debug = file.debug_info.as_ref().unwrap();
    assert_eq!(debug.static_symbols.len(), 1);
    assert_eq!(debug.static_symbols[0].slot_id, 0);
    assert_eq!(debug.file_names, vec!["main.sc".to_owned()]);
    assert!(!debug.lines.is_empty());
    assert_eq!(debug.function_locals.len(), 2);

    let listing = sable_bytecode::Disassembler::new(&file).disassemble().unwrap();
    assert!(listing.contains("heal"));
}

#[test]
fn test_function_call_argument_order() {
    // function add(a, b) { return a - b; }  add(1, 2);
    let body = vec![
        Stmt::function(
            1,
            "add",
            vec!["a".to_owned(), "b".to_owned()],
            vec![Stmt::ret(
                2,
                Some(Expr::binary(
                    2,
                    BinaryOp::Sub,
                    Expr::identifier(2, "a"),
                    Expr::identifier(2, "b"),
                )),
            )],
        ),
        Stmt::expression(
            4,
            Expr::call(
                4,
                Expr::identifier(4, "add"),
                vec![Expr::int(4, 1), Expr::int(4, 2)],
            ),
        ),
    ];
    let compiled = compile(body);
    // Arguments push right to left, then the count, then the call.
    assert_eq!(
        compiled.code[..4],
        [
            Instruction::Const2,
            Instruction::Const1,
            Instruction::Const2,
            Instruction::Call(1),
        ]
    );
    // Inside add: right operand first, so b loads before a.
    let body_code = &compiled.code[5..];
    assert_eq!(
        body_code[..3],
        [Instruction::LdArg1, Instruction::LdArg0, Instruction::Sub]
    );
}

#[test]
fn test_for_loop_continue_targets_update() {
    // var x; for (x = 0; x < 3; x = x + 1) { continue; }
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", None),
        Stmt {
            line: 2,
            kind: StmtKind::For {
                init: Some(sable_compiler::ast::ForInit::Expr(Expr::assign(
                    2,
                    Expr::identifier(2, "x"),
                    Expr::int(2, 0),
                ))),
                test: Some(Expr::binary(
                    2,
                    BinaryOp::Lt,
                    Expr::identifier(2, "x"),
                    Expr::int(2, 3),
                )),
                update: Some(Expr::assign(
                    2,
                    Expr::identifier(2, "x"),
                    Expr::binary(2, BinaryOp::Add, Expr::identifier(2, "x"), Expr::int(2, 1)),
                )),
                body: Box::new(Stmt {
                    line: 3,
                    kind: StmtKind::Block(vec![Stmt {
                        line: 3,
                        kind: StmtKind::Continue,
                    }]),
                }),
            },
        },
    ];
    let compiled = compile(body);
    assert_eq!(
        compiled.code,
        vec![
            Instruction::Const0,
            Instruction::St0,
            Instruction::Const3,
            Instruction::Ld0,
            Instruction::Lt,
            Instruction::Jpf(13),
            Instruction::Jmp(3),
            Instruction::Const1,
            Instruction::Ld0,
            Instruction::Add,
            Instruction::St0,
            Instruction::Jmp(-13),
            Instruction::Exit,
        ]
    );
}

#[test]
fn test_switch_inside_loop_break_scoping() {
    // var x = 0;
    // while (1) { switch (x) { case 1: break; default: x = 2; } }
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
        Stmt {
            line: 2,
            kind: StmtKind::While {
                test: Expr::int(2, 1),
                body: Box::new(Stmt {
                    line: 3,
                    kind: StmtKind::Switch {
                        discriminant: Expr::identifier(3, "x"),
                        cases: vec![
                            SwitchCase {
                                test: Some(Expr::int(4, 1)),
                                body: vec![Stmt {
                                    line: 4,
                                    kind: StmtKind::Break,
                                }],
                            },
                            SwitchCase {
                                test: None,
                                body: vec![Stmt::expression(
                                    5,
                                    Expr::assign(
                                        5,
                                        Expr::identifier(5, "x"),
                                        Expr::int(5, 2),
                                    ),
                                )],
                            },
                        ],
                    },
                }),
            },
        },
    ];
    let compiled = compile(body);
    let switch = compiled
        .code
        .iter()
        .find_map(|inst| match inst {
            Instruction::Switch(table) => Some(table.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(switch.branches.len(), 1);
    assert_eq!(switch.branches[0].case_value, 1);
    assert_eq!(switch.branches[0].offset, 14);
    assert_eq!(switch.default_offset, 17);
    assert_eq!(
        compiled.code,
        vec![
            Instruction::Const0,
            Instruction::St0,
            Instruction::Const1,
            Instruction::Jpf(26),
            Instruction::Ld0,
            Instruction::Switch(switch),
            // break leaves the switch, not the loop
            Instruction::Jmp(5),
            Instruction::Const2,
            Instruction::St0,
            Instruction::Jmp(-24),
            Instruction::Exit,
        ]
    );
}

#[test]
fn test_continue_in_switch_targets_enclosing_loop() {
    // var x = 0;
    // while (1) { switch (x) { default: continue; } }
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
        Stmt {
            line: 2,
            kind: StmtKind::While {
                test: Expr::int(2, 1),
                body: Box::new(Stmt {
                    line: 3,
                    kind: StmtKind::Switch {
                        discriminant: Expr::identifier(3, "x"),
                        cases: vec![SwitchCase {
                            test: None,
                            body: vec![Stmt {
                                line: 4,
                                kind: StmtKind::Continue,
                            }],
                        }],
                    },
                }),
            },
        },
    ];
    let compiled = compile(body);
    let table = compiled
        .code
        .iter()
        .find_map(|inst| match inst {
            Instruction::Switch(t) => Some(t.clone()),
            _ => None,
        })
        .unwrap();
    assert!(table.branches.is_empty());
    assert_eq!(table.default_offset, 6);
    // The continue jump lands on the loop test, not the switch end.
    assert_eq!(
        compiled.code,
        vec![
            Instruction::Const0,
            Instruction::St0,
            Instruction::Const1,
            Instruction::Jpf(16),
            Instruction::Ld0,
            Instruction::Switch(table),
            Instruction::Jmp(-11),
            Instruction::Jmp(-14),
            Instruction::Exit,
        ]
    );
}

#[test]
fn test_continue_outside_loop_rejected() {
    let body = vec![Stmt {
        line: 1,
        kind: StmtKind::Continue,
    }];
    assert_eq!(
        compile_err(body),
        ErrorKind::ContinueWithoutContextualScope
    );
}

#[test]
fn test_switch_cases_sorted_ascending() {
    // switch (x) { case 5: case 1: case 3: }
    let cases = [5, 1, 3]
        .into_iter()
        .map(|v| SwitchCase {
            test: Some(Expr::int(2, v)),
            body: vec![],
        })
        .collect();
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
        Stmt {
            line: 2,
            kind: StmtKind::Switch {
                discriminant: Expr::identifier(2, "x"),
                cases,
            },
        },
    ];
    let compiled = compile(body);
    let table = compiled
        .code
        .iter()
        .find_map(|inst| match inst {
            Instruction::Switch(t) => Some(t.clone()),
            _ => None,
        })
        .unwrap();
    let values: Vec<i32> = table.branches.iter().map(|b| b.case_value).collect();
    assert_eq!(values, vec![1, 3, 5]);
    // All arms are empty, so every branch and the implicit default land at
    // the end of the (30-byte) switch instruction.
    assert!(table.branches.iter().all(|b| b.offset == 30));
    assert_eq!(table.default_offset, 30);
}

#[test]
fn test_duplicate_switch_case_rejected() {
    let cases = vec![
        SwitchCase {
            test: Some(Expr::int(2, 1)),
            body: vec![],
        },
        SwitchCase {
            test: Some(Expr::int(3, 1)),
            body: vec![],
        },
    ];
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
        Stmt {
            line: 2,
            kind: StmtKind::Switch {
                discriminant: Expr::identifier(2, "x"),
                cases,
            },
        },
    ];
    assert_eq!(compile_err(body), ErrorKind::DuplicateSwitchCaseTest);
}

#[test]
fn test_int_pool_widens_past_255_entries() {
    let mut body = vec![Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0)))];
    for i in 0..300 {
        body.push(Stmt::expression(
            2,
            Expr::assign(2, Expr::identifier(2, "x"), Expr::int(2, 1000 + i)),
        ));
    }
    let compiled = compile(body);
    assert_eq!(compiled.int_pool.len(), 300);
    assert!(compiled.code.contains(&Instruction::PoolInt(0)));
    // The 256th entry tips the pool over the byte-index limit.
    assert!(compiled.code.contains(&Instruction::PoolIntW(255)));
    assert!(compiled.code.contains(&Instruction::PoolIntW(299)));
}

#[test]
fn test_literal_pools_deduplicate() {
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
        Stmt::expression(
            2,
            Expr::assign(2, Expr::identifier(2, "x"), Expr::int(2, 1000)),
        ),
        Stmt::expression(
            3,
            Expr::assign(3, Expr::identifier(3, "x"), Expr::int(3, 1000)),
        ),
        Stmt::expression(
            4,
            Expr::assign(4, Expr::identifier(4, "x"), Expr::string(4, "hi")),
        ),
        Stmt::expression(
            5,
            Expr::assign(5, Expr::identifier(5, "x"), Expr::string(5, "hi")),
        ),
    ];
    let compiled = compile(body);
    assert_eq!(compiled.int_pool.len(), 1);
    assert_eq!(compiled.string_pool.len(), 1);
}

#[test]
fn test_local_array_flattens_into_frame() {
    // var a = [1, [2, 3]];
    let init = Expr::array(
        1,
        vec![
            Expr::int(1, 1),
            Expr::array(1, vec![Expr::int(1, 2), Expr::int(1, 3)]),
        ],
    );
    let compiled = compile(vec![Stmt::var(1, VarKind::Array, "a", Some(init))]);
    // Array contents live in the frame records; no init code runs.
    assert_eq!(compiled.code, vec![Instruction::Exit]);
    assert_eq!(compiled.local_pool.len(), 1);
    let slots = compiled.local_pool[0].slots();
    assert_eq!(slots.len(), 5);
    assert_eq!(slots[0].value, VarValue::ArrayStart(1));
    assert_eq!(slots[2].value, VarValue::ArrayStart(3));
    assert_eq!(slots[4].value, VarValue::Int(3));
    assert_eq!(compiled.functions[0].local_count, 1);

    let bytes = compiled.to_bytes().unwrap();
    let file = ScriptFile::from_bytes(&bytes).unwrap();
    assert_eq!(file.local_frames.len(), 1);
    assert_eq!(file.local_frames[0].len(), 5);
}

#[test]
fn test_attribute_access_uses_shared_identifier() {
    // var o = 0; var x = 0; o.hp = 3; x = o.hp;
    let body = vec![
        Stmt::var(1, VarKind::Int, "o", Some(Expr::int(1, 0))),
        Stmt::var(2, VarKind::Int, "x", Some(Expr::int(2, 0))),
        Stmt::expression(
            3,
            Expr::assign(3, attribute(3, Expr::identifier(3, "o"), "hp"), Expr::int(3, 3)),
        ),
        Stmt::expression(
            4,
            Expr::assign(
                4,
                Expr::identifier(4, "x"),
                attribute(4, Expr::identifier(4, "o"), "hp"),
            ),
        ),
    ];
    let compiled = compile(body);
    let setter = compiled.code.iter().find_map(|i| match i {
        Instruction::Setter(idx) => Some(*idx),
        _ => None,
    });
    let getter = compiled.code.iter().find_map(|i| match i {
        Instruction::Getter(idx) => Some(*idx),
        _ => None,
    });
    assert_eq!(setter, getter);
    let idx = setter.unwrap() as usize;
    assert_eq!(compiled.identifier_pool.get(idx).map(String::as_str), Some("hp"));
}

#[test]
fn test_oc_call_registers_import() {
    let compiled = compile(vec![Stmt::expression(
        1,
        Expr::call(1, Expr::identifier(1, "thread"), vec![]),
    )]);
    assert_eq!(compiled.oc_imports.len(), 1);
    assert!(compiled.code.contains(&Instruction::GetOc(0)));
    let name_id = compiled.oc_imports[0].name_id as usize;
    assert_eq!(
        compiled.identifier_pool.get(name_id).map(String::as_str),
        Some("thread")
    );
}

#[test]
fn test_value_position_call_sets_keep_bit() {
    let body = vec![
        Stmt::function(1, "f", vec![], vec![Stmt::ret(1, Some(Expr::int(1, 1)))]),
        Stmt::var(2, VarKind::Int, "x", Some(Expr::int(2, 0))),
        Stmt::expression(
            3,
            Expr::assign(
                3,
                Expr::identifier(3, "x"),
                Expr::call(3, Expr::identifier(3, "f"), vec![]),
            ),
        ),
    ];
    let compiled = compile(body);
    assert!(compiled.code.contains(&Instruction::ConstIW(0x100)));
}

#[test]
fn test_update_expression_reloads_when_value_used() {
    // var x = 0; var y = 0; y = x++;
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
        Stmt::var(2, VarKind::Int, "y", Some(Expr::int(2, 0))),
        Stmt::expression(
            3,
            Expr::assign(
                3,
                Expr::identifier(3, "y"),
                Expr {
                    line: 3,
                    kind: ExprKind::Update {
                        op: UpdateOp::Increment,
                        argument: Box::new(Expr::identifier(3, "x")),
                    },
                },
            ),
        ),
    ];
    let compiled = compile(body);
    assert_eq!(
        compiled.code[4..],
        [
            Instruction::Ld0,
            Instruction::Inc,
            Instruction::St0,
            Instruction::Ld0,
            Instruction::St1,
            Instruction::Exit,
        ]
    );
}

#[test]
fn test_compound_assignment_expands() {
    // var x = 1; x += 2;  →  CONST_2, LD_0, ADD, ST_0
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 1))),
        Stmt::expression(
            2,
            Expr {
                line: 2,
                kind: ExprKind::Assignment {
                    op: AssignOp::Add,
                    target: Box::new(Expr::identifier(2, "x")),
                    value: Box::new(Expr::int(2, 2)),
                },
            },
        ),
    ];
    let compiled = compile(body);
    assert_eq!(
        compiled.code[2..],
        [
            Instruction::Const2,
            Instruction::Ld0,
            Instruction::Add,
            Instruction::St0,
            Instruction::Exit,
        ]
    );
}

#[test]
fn test_builtin_pseudo_calls() {
    let body = vec![
        Stmt::var(1, VarKind::Int, "x", Some(Expr::int(1, 0))),
        Stmt::expression(2, Expr::call(2, Expr::identifier(2, "next"), vec![])),
        Stmt::expression(
            3,
            Expr::assign(
                3,
                Expr::identifier(3, "x"),
                Expr::call(
                    3,
                    Expr::identifier(3, "typeof"),
                    vec![Expr::identifier(3, "x")],
                ),
            ),
        ),
    ];
    let compiled = compile(body);
    assert!(compiled.code.contains(&Instruction::Next));
    assert!(compiled.code.contains(&Instruction::TypeOf));

    let err = compile_err(vec![Stmt::expression(
        1,
        Expr::call(1, Expr::identifier(1, "next"), vec![Expr::int(1, 1)]),
    )]);
    assert_eq!(err, ErrorKind::InvalidNextWithArguments);

    let err = compile_err(vec![Stmt::expression(
        1,
        Expr::call(1, Expr::identifier(1, "sizeof"), vec![]),
    )]);
    assert_eq!(err, ErrorKind::MissingSizeOfArgument);
}

#[test]
fn test_assignment_to_function_rejected() {
    let body = vec![
        Stmt::function(1, "f", vec![], vec![]),
        Stmt::expression(
            2,
            Expr::assign(2, Expr::identifier(2, "f"), Expr::int(2, 1)),
        ),
    ];
    assert_eq!(compile_err(body), ErrorKind::AssignToFunction);
}

#[test]
fn test_call_to_undeclared_function_rejected() {
    let body = vec![Stmt::expression(
        1,
        Expr::call(1, Expr::identifier(1, "nope"), vec![]),
    )];
    assert_eq!(compile_err(body), ErrorKind::CallToUndeclaredFunction);
}

#[test]
fn test_source_file_markers_switch_debug_files() {
    let body = vec![
        Stmt {
            line: 0,
            kind: StmtKind::SourceFile("a.sc".to_owned()),
        },
        Stmt::expression(1, Expr::int(1, 1)),
        Stmt {
            line: 0,
            kind: StmtKind::SourceFile("b.sc".to_owned()),
        },
        Stmt::expression(1, Expr::int(1, 2)),
    ];
    let compiled = compile(body);
    let debug = compiled.debug_info.unwrap();
    assert_eq!(
        debug.file_names,
        vec!["main.sc".to_owned(), "a.sc".to_owned(), "b.sc".to_owned()]
    );
    assert_eq!(debug.lines[0].file_id, 1);
    assert_eq!(debug.lines.last().unwrap().file_id, 2);
}
