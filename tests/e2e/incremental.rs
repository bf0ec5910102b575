//! Rebuilds after edits to sources, flags and dependencies.

use crate::e2e::*;

#[cfg(unix)]
const APP: &str = r#"
[[target]]
name = "app"
type = "executable"
sources = ["a.c", "b.c"]
"#;

#[cfg(unix)]
fn setup() -> anyhow::Result<TestSpace> {
    let space = TestSpace::new()?;
    space.write_manifest(APP)?;
    space.write("a.c", "a\n")?;
    space.write("b.c", "b\n")?;
    space.touch("a.c", 1000)?;
    space.touch("b.c", 1000)?;
    space.run_expect(&mut cc2_command(vec![]))?;
    Ok(space)
}

#[cfg(unix)]
#[test]
fn touched_source_recompiles_alone() -> anyhow::Result<()> {
    let space = setup()?;
    space.write("b.c", "b2\n")?;
    space.touch("b.c", 2000)?;

    let out = space.run_expect(&mut cc2_command(vec!["-v"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_output_contains(&out, "b.c.o");
    assert_output_not_contains(&out, "a.c.o\n");
    assert_eq!(space.read("build/sh/app/app.out")?, b"a\nb2\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn replaced_source() -> anyhow::Result<()> {
    let space = setup()?;
    space.write_manifest(&APP.replace("\"b.c\"", "\"c.c\""))?;
    space.write("c.c", "c\n")?;

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    // One compile for c.c, then the link.
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("build/sh/app/app.out")?, b"a\nc\n");
    let schema = String::from_utf8(space.read("build/sh/app/app.cc2")?)?;
    assert!(schema.contains("c.c"));
    assert!(!schema.contains("b.c"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn flag_change_rebuilds_every_source() -> anyhow::Result<()> {
    let space = setup()?;
    space.write_manifest(&format!("{}c_compile_flags = [\"-DX\"]\n", APP))?;
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 3 tasks");

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn rebuilt_library_only_relinks() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "app"
type = "executable"
sources = ["main.c"]
deps = ["lib"]

[[target]]
name = "lib"
type = "static_library"
sources = ["l.c"]
"#,
    )?;
    space.write("main.c", "main\n")?;
    space.write("l.c", "lib\n")?;
    space.touch("main.c", 1000)?;
    space.touch("l.c", 1000)?;
    space.run_expect(&mut cc2_command(vec![]))?;

    space.write("l.c", "lib2\n")?;
    space.touch("l.c", 2000)?;
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    // The library compiles and archives; the app relinks without compiling.
    assert_output_contains(&out, "ran 3 tasks");
    assert_output_not_contains(&out, "main.c");
    assert_eq!(space.read("build/sh/app/app.out")?, b"main\nlib2\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn content_fingerprint_ignores_touch() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(&format!("[project]\nfingerprint = \"content\"\n{}", APP))?;
    space.write("a.c", "a\n")?;
    space.write("b.c", "b\n")?;
    space.run_expect(&mut cc2_command(vec![]))?;

    space.touch("a.c", 3000)?;
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "no work to do");

    space.write("a.c", "a2\n")?;
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("build/sh/app/app.out")?, b"a2\nb\n");
    Ok(())
}
