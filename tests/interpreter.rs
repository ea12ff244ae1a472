//! Integration tests exercising the public `corvid` API: the compiler's
//! error-reporting contract, long-operand encoding, and end-to-end program
//! behavior through a persistent `Vm`.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use corvid::table::Table;
use corvid::{compile, Gc, InterpretError, Vm};

/// A bare VM-root stand-in for tests that only need to drive the compiler
/// directly: an empty globals table and an interned `init` sentinel, the
/// same roots `Vm::interpret` threads through on every call.
fn compiler_roots(gc: &mut Gc) -> (Table, corvid::object::ObjRef) {
    let init_string = gc.intern("init");
    (Table::new(), init_string)
}

#[derive(Clone, Default)]
struct Sink(Rc<RefCell<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> Result<String, InterpretError> {
    let sink = Sink::default();
    let mut vm = Vm::with_writer(Box::new(sink.clone()));
    vm.interpret(source)?;
    Ok(String::from_utf8(sink.0.borrow().clone()).unwrap_or_default())
}

#[test]
fn well_formed_program_compiles_cleanly() {
    let mut gc = Gc::new();
    let (globals, init_string) = compiler_roots(&mut gc);
    let result = compile("fun add(a, b) { return a + b; } print add(1, 2);", &mut gc, &globals, init_string);
    assert!(result.is_ok());
}

#[test]
fn malformed_program_reports_at_least_one_error_and_no_function() {
    let mut gc = Gc::new();
    let (globals, init_string) = compiler_roots(&mut gc);
    let result = compile("fun (", &mut gc, &globals, init_string);
    assert!(result.is_err());
}

#[test]
fn a_single_malformed_statement_reports_exactly_one_error() {
    // Every `+` past the first triggers "Expect expression." if panic mode
    // didn't suppress cascading errors; only the first should be reported.
    let mut gc = Gc::new();
    let (globals, init_string) = compiler_roots(&mut gc);
    let errors = compile("+ + + + +; print \"ok\";", &mut gc, &globals, init_string).expect_err("should fail to compile");
    assert_eq!(errors.len(), 1);
}

#[test]
fn synchronization_lets_a_later_statement_compile_after_an_earlier_error() {
    // The first statement is malformed; synchronize() should skip past its
    // trailing semicolon so the well-formed second statement still compiles,
    // contributing no further errors.
    let mut gc = Gc::new();
    let (globals, init_string) = compiler_roots(&mut gc);
    let errors = compile("+; var x = 1;", &mut gc, &globals, init_string).expect_err("should fail to compile");
    assert_eq!(errors.len(), 1);
}

#[test]
fn return_at_script_scope_is_a_compile_error() {
    let mut gc = Gc::new();
    let (globals, init_string) = compiler_roots(&mut gc);
    let errors = compile("return 1;", &mut gc, &globals, init_string).expect_err("should fail to compile");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("return"));
}

#[test]
fn long_operand_encoding_round_trips_past_256_globals() {
    // Each `var vN = N;` interns a distinct global name, forcing the
    // constant pool past the one-byte "short" operand width partway
    // through; both the short- and long-operand paths must resolve to the
    // right global by the end.
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("var v{} = {};\n", i, i));
    }
    source.push_str("print v10;\nprint v299;\n");

    let output = run(&source).expect("program should run without error");
    assert_eq!(output, "10\n299\n");
}

#[test]
fn long_operand_encoding_round_trips_past_256_constants_in_one_function() {
    // A single function body referencing 300 distinct string constants
    // exercises the long-constant path inside one Chunk rather than across
    // many globals.
    let mut source = String::from("fun many() {\n");
    for i in 0..300 {
        source.push_str(&format!("  if (false) {{ print \"constant-{}\"; }}\n", i));
    }
    source.push_str("  return \"done\";\n}\nprint many();\n");

    let output = run(&source).expect("program should run without error");
    assert_eq!(output, "done\n");
}

#[test]
fn globals_persist_across_interpret_calls_on_the_same_vm() {
    let sink = Sink::default();
    let mut vm = Vm::with_writer(Box::new(sink.clone()));
    vm.interpret("var count = 0;").unwrap();
    vm.interpret("count = count + 1;").unwrap();
    vm.interpret("print count;").unwrap();
    let output = String::from_utf8(sink.0.borrow().clone()).unwrap_or_default();
    assert_eq!(output, "1\n");
}

#[test]
fn classes_inheritance_and_closures_compose() {
    let source = r#"
        class Animal {
            init(name) {
                this.name = name;
            }
            speak() {
                return this.name + " makes a sound";
            }
        }

        class Dog < Animal {
            speak() {
                return super.speak() + " (a bark)";
            }
        }

        var rex = Dog("Rex");
        print rex.speak();
    "#;
    let output = run(source).expect("program should run without error");
    assert_eq!(output, "Rex makes a sound (a bark)\n");
}

#[test]
fn runtime_error_produces_a_call_stack_trace() {
    let result = run("fun inner() { return nope; } fun outer() { return inner(); } outer();");
    match result {
        Err(InterpretError::Runtime(trace)) => {
            assert_eq!(trace.frames.len(), 3);
            assert_eq!(trace.frames[0].1, "inner");
            assert_eq!(trace.frames[1].1, "outer");
            assert_eq!(trace.frames[2].1, "script");
        }
        other => panic!("expected a runtime trace, got {:?}", other),
    }
}
