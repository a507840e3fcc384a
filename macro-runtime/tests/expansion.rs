//! End-to-end expansion: source → build → compile → bind → execute

use std::path::Path;

use macro_core::Error;
use macro_runtime::{MacroConfig, MacroRuntime, RuntimeConfig, RuntimeError};

fn runtime(source: &str) -> MacroRuntime {
    let mut runtime = MacroRuntime::new(RuntimeConfig::default()).unwrap();
    runtime.load_source(source).unwrap();
    runtime
}

fn expand(source: &str, call: &str) -> String {
    runtime(source).call(call).unwrap()
}

// ===== Basic expansion =====

#[test]
fn test_increment() {
    let source = "a .macro x:int\ny .local int\ny .set x+1\n&y\n\t.mend\n";
    assert_eq!(expand(source, "5"), "6\n");
    assert_eq!(expand(source, "a(41)"), "42\n");
}

#[test]
fn test_plain_text_and_escapes() {
    let source = "t .macro who:str\nhello, &who. && bye\n\t.mend\n";
    assert_eq!(expand(source, "\"world\""), "hello, world & bye\n");
}

#[test]
fn test_key_parameter_defaults() {
    let source = "\
e .macro k:int=,label:str=\"none\"
\t.if exists(k)
&label=&k
\t.else
&label
\t.endif
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("").unwrap(), "none\n");
    assert_eq!(runtime.call("k=4").unwrap(), "none=4\n");
    assert_eq!(runtime.call("label=\"v\", k=1").unwrap(), "v=1\n");
}

#[test]
fn test_missing_value_is_calculation_error() {
    let err = runtime("m .macro x:int\n&x\n\t.mend\n").call("").unwrap_err();
    match err.as_macro() {
        Some(Error::CalculationError { message }) => assert!(message.contains("'x' has no value")),
        other => panic!("unexpected {:?}", other),
    }
}

// ===== Control flow =====

#[test]
fn test_choice_selects_case() {
    let source = "\
c .macro x:int
\t.choise x
\t.of 1
foo
\t.of 2
bar
\t.otherwise
baz
\t.endchoise
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("2").unwrap(), "bar\n");
    assert_eq!(runtime.call("1").unwrap(), "foo\n");
    assert_eq!(runtime.call("9").unwrap(), "baz\n");
}

#[test]
fn test_string_choice() {
    let source = "\
c .macro s:str
\t.choise s
\t.of \"a\"
A
\t.of \"b\"
B
\t.endchoise
end
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("\"b\"").unwrap(), "B\nend\n");
    assert_eq!(runtime.call("\"z\"").unwrap(), "end\n");
}

#[test]
fn test_if_elseif_chain() {
    let source = "\
s .macro n:int
\t.if n < 0
neg
\t.elseif n == 0
zero
\t.else
pos
\t.endif
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("-3").unwrap(), "neg\n");
    assert_eq!(runtime.call("0").unwrap(), "zero\n");
    assert_eq!(runtime.call("8").unwrap(), "pos\n");
}

#[test]
fn test_while_with_break() {
    let source = "\
br .macro limit:int
i .local int = 0
\t.while true
i .set i + 1
\t.if i > limit
\t.break
\t.endif
&i
\t.endwhile
done
\t.mend
";
    assert_eq!(expand(source, "2"), "1\n2\ndone\n");
}

#[test]
fn test_labeled_continue() {
    let source = "\
lp .macro
i .local int
j .local int
outer:\t.for i = 1 to 3
\t.for j = 1 to 3
\t.if j == 2
\t.continue outer
\t.endif
&i&j
\t.endfor
\t.endfor
\t.mend
";
    assert_eq!(expand(source, ""), "11\n21\n31\n");
}

#[test]
fn test_labeled_break_leaves_both_loops() {
    let source = "\
lb .macro
i .local int
j .local int
outer:\t.for i = 1 to 3
\t.for j = 1 to 3
\t.if i * j == 4
\t.break outer
\t.endif
&i&j
\t.endfor
\t.endfor
after
\t.mend
";
    assert_eq!(expand(source, ""), "11\n12\n13\n21\nafter\n");
}

#[test]
fn test_break_out_of_choice_drops_selector() {
    let source = "\
bc .macro
i .local int = 0
\t.while i < 10
i .set i + 1
\t.choise i % 3
\t.of 0
\t.break
\t.endchoise
&i
\t.endwhile
end
\t.mend
";
    assert_eq!(expand(source, ""), "1\n2\nend\n");
}

#[test]
fn test_for_counts_down_with_negative_step() {
    let source = "dn .macro\ni .local int\n\t.for i = 3 to 1 step -1\n&i\n\t.endfor\n\t.mend\n";
    assert_eq!(expand(source, ""), "3\n2\n1\n");
}

#[test]
fn test_for_with_parameter_step_tests_upward() {
    let source = "dp .macro st:int\ni .local int\n\t.for i = 3 to 1 step st\n&i\n\t.endfor\n\t.mend\n";
    let runtime = runtime(source);
    assert_eq!(runtime.call("-1").unwrap(), "");
    assert_eq!(runtime.call("1").unwrap(), "");
}

#[test]
fn test_real_for_loop() {
    let source = "rf .macro\nr .local real\n\t.for r = 0.5 to 1.5 step 0.5\n&r\n\t.endfor\n\t.mend\n";
    assert_eq!(expand(source, ""), "0.5\n1.0\n1.5\n");
}

#[test]
fn test_forall_split() {
    let source = "\
fa .macro list:str
item .local str
\t.forall item in list splitted by \",\"
<&item>
\t.endforall
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("\"a,b,c\"").unwrap(), "<a>\n<b>\n<c>\n");
    assert_eq!(runtime.call("\"\"").unwrap(), "");
}

#[test]
fn test_exit_inside_choice_and_loop() {
    let source = "\
ex .macro
s .local str
\t.forall s in \"x;stop;y\" splitted by \";\"
\t.choise s
\t.of \"stop\"
\t.exit
\t.otherwise
&s
\t.endchoise
\t.endforall
never
\t.mend
";
    assert_eq!(expand(source, ""), "x\n");
}

// ===== Values =====

#[test]
fn test_array_parameter() {
    let source = "\
ar .macro vals:int[]
total .local int = 0
i .local int
\t.for i = 0 to len(vals) - 1
total .set total + vals[i]
\t.endfor
&total of &vals
\t.mend
";
    assert_eq!(expand(source, "{1,2,3}"), "6 of {1,2,3}\n");
}

#[test]
fn test_setindex_and_element_substitution() {
    let source = "\
si .macro
names .local str[] = {\"a\",\"b\"}
names .setindex 1 = \"z\"
&names[0]&names[1]
\t.mend
";
    assert_eq!(expand(source, ""), "az\n");
}

#[test]
fn test_index_out_of_range() {
    let source = "ix .macro vals:int[]\n&vals[5]\n\t.mend\n";
    let err = runtime(source).call("{1}").unwrap_err();
    assert!(matches!(err.as_macro(), Some(Error::CalculationError { .. })));
}

#[test]
fn test_conversions_at_run_time() {
    let source = "\
cv .macro s:str,r:real
n .local int
b .local bool
n .set s
b .set str(r) == \"2.5\"
&n &b
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("\"12\", 2.5").unwrap(), "12 true\n");
    assert_eq!(runtime.call("\" 7 \", 1").unwrap(), "7 false\n");
    let err = runtime.call("\"x\", 1.0").unwrap_err();
    assert!(matches!(err.as_macro(), Some(Error::CalculationError { .. })));
}

#[test]
fn test_unique_numbers() {
    let source = "\
u .macro
a .local int
b .local int
g .local int
a .set uniqueL()
b .set uniqueL()
g .set uniqueG()
&a &b &g
\t.mend
";
    let runtime = runtime(source);
    let first = runtime.call("").unwrap();
    let second = runtime.call("").unwrap();
    assert!(first.starts_with("0 1 "));
    assert!(second.starts_with("0 1 "));
    assert_ne!(first, second);
}

#[test]
fn test_instances_are_independent() {
    let source = "\
ind .macro x:int
acc .local int = 100
acc .set acc + x
&acc
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("1").unwrap(), "101\n");
    assert_eq!(runtime.call("2").unwrap(), "102\n");
    assert_eq!(runtime.call("1").unwrap(), "101\n");
}

#[test]
fn test_folding_does_not_change_output() {
    let source = "\
f .macro x:int
r .local real
s .local str
b .local bool
r .set 7 / 2 + 0.5
s .set \"n\" # (3 * 4) # true
b .set (1 < 2) && !(2.5 > 3.0)
&r &s &b &x
\t.mend
";
    let folded = expand(source, "9");

    let settings = MacroConfig::from_str("[compiler]\nfold_constants = false").unwrap();
    let mut plain = MacroRuntime::from_settings(settings, Path::new(".")).unwrap();
    plain.load_source(source).unwrap();
    let unfolded = plain.call("9").unwrap();

    assert_eq!(folded, "3.5 n12true true 9\n");
    assert_eq!(folded, unfolded);
    assert!(plain.compiled().unwrap().instruction_count() > runtime(source).compiled().unwrap().instruction_count());
}

// ===== Errors =====

#[test]
fn test_error_directive_raises_syntax_error() {
    let source = "\
er .macro n:int
\t.if n > 5
\t.error \"too big: \" # n
\t.endif
ok
\t.mend
";
    let runtime = runtime(source);
    assert_eq!(runtime.call("1").unwrap(), "ok\n");
    match runtime.call("7").unwrap_err() {
        RuntimeError::Macro(Error::SyntaxError { message, line, .. }) => {
            assert_eq!(message, "too big: 7");
            assert_eq!(line, 3);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_bind_errors() {
    let runtime = runtime("b .macro x:int,k:str=\nx\n\t.mend\n");
    assert!(matches!(runtime.call("1, 2"), Err(RuntimeError::Macro(Error::SyntaxError { .. }))));
    assert!(matches!(runtime.call("k=\"a\", 1"), Err(RuntimeError::Macro(Error::SyntaxError { .. }))));
    assert!(matches!(runtime.call("other(1)"), Err(RuntimeError::Macro(Error::SyntaxError { .. }))));
    assert!(matches!(runtime.call("\"abc\""), Err(RuntimeError::Macro(Error::SyntaxError { .. }))));
}
