//! Build → bind → compile through the public API

use macro_core::{
    bind_text, build, compile, BuildState, Error, MacroBuilder, MacroConfig, MacroTemplate, TemplateRepo, Value,
};

const SCENARIO: &str = "\
a .macro x:int
y .local int
y .set x+1
&y
\t.mend
";

#[test]
fn test_builder_states_follow_lines() {
    let mut builder = MacroBuilder::new();
    assert_eq!(builder.state(), BuildState::BeforeMacro);
    builder.process_line(1, "a .macro x:int").unwrap();
    assert_eq!(builder.state(), BuildState::InDeclarations);
    builder.process_line(2, "y .local int").unwrap();
    assert_eq!(builder.state(), BuildState::InDeclarations);
    builder.process_line(3, "y .set x+1").unwrap();
    assert_eq!(builder.state(), BuildState::InBody);
    builder.process_line(4, "\t.mend").unwrap();
    assert_eq!(builder.state(), BuildState::AfterMacro);
    let def = builder.finish().unwrap();
    assert_eq!(def.declarations.len(), 2);
}

#[test]
fn test_scenario_compiles() {
    let out = compile(SCENARIO).unwrap();
    assert_eq!(out.name, "a");
    assert!(out.code.contains("\tinvokeinterface\tSlot.setLong\n"));
    assert!(out.code.contains("\tladd\n"));
    assert_eq!(out.strings, "\n");
}

#[test]
fn test_template_shared_between_calls() {
    let template = MacroTemplate::new(build(SCENARIO).unwrap());
    let first = bind_text(&template, "5").unwrap();
    let second = bind_text(&template, "a(7)").unwrap();
    assert_eq!(first.get(0), Some(&Value::Int(5)));
    assert_eq!(second.get(0), Some(&Value::Int(7)));
    assert!(!first.exists(1));

    let threads: Vec<_> = (0..4)
        .map(|n| {
            let template = template.clone();
            std::thread::spawn(move || bind_text(&template, &n.to_string()).map(|i| i.unique_g()))
        })
        .collect();
    let mut uniques: Vec<u64> = threads.into_iter().map(|t| t.join().unwrap().unwrap()).collect();
    uniques.sort_unstable();
    uniques.dedup();
    assert_eq!(uniques.len(), 4);
}

#[test]
fn test_build_errors_carry_positions() {
    let err = build("m .macro\n\t.while true\nx\n\t.continue nowhere\n").unwrap_err();
    match err {
        Error::SyntaxError { line, .. } => assert_eq!(line, 4),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_config_drives_compiler() {
    let config = MacroConfig::from_str("[compiler]\nclass_name = \"Expanded\"\nfold_constants = false").unwrap();
    let templates = TemplateRepo::builtin().unwrap();
    let def = build("m .macro\nv .local int\nv .set 2*3\n\t.mend").unwrap();
    let out = config.compiler(&templates).compile(&def).unwrap();
    assert!(out.code.contains("\t.class\tExpanded\n"));
    assert!(out.code.contains("\tlmul\n"));
}

#[test]
fn test_every_directive_compiles() {
    let source = "\
all .macro n:int,list:str,flags:bool[]=,key:str=\"k\"
i .local int
r .local real = 0.5
s .local str
arr .local int[] = {1,2,3}
\t.if exists(flags) && len(flags) > 0
flags .setindex 0 = false
\t.elseif n < 0
\t.error \"negative\"
\t.else
arr .setindex n % 3 = n
\t.endif
outer:\t.for i = 1 to n step 2
r .set r * 2
\t.while r > 100.0
\t.break outer
\t.endwhile
\t.endfor
\t.forall s in list splitted by \";\"
\t.choise s
\t.of \"skip\"
\t.continue
\t.of \"stop\"
\t.exit
\t.otherwise
&s:&key&arr[0]
\t.endchoise
\t.endforall
\t.mend
";
    let out = compile(source).unwrap();
    assert!(out.code.contains("macroExit:"));
    assert!(out.code.contains("MacroExecutor.split"));
    assert!(out.code.contains("Slot.setBooleanAt"));
    assert!(out.code.contains("Slot.setLongAt"));
    assert!(out.code.contains("MacroExecutor.error"));
}
