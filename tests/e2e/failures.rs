use crate::e2e::*;

#[cfg(unix)]
#[test]
fn failed_compile_keeps_progress() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "app"
type = "executable"
sources = ["a.c", "b.c"]
"#,
    )?;
    space.write("a.c", "a\n")?;
    space.write("b.c", "FAIL\n")?;

    let out = space.run(&mut cc2_command(vec!["-j", "1"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: app: compile");
    assert_output_not_contains(&out, "now up to date");
    assert!(!space.exists("build/sh/app/app.out"));

    // Only the source that failed compiles again.
    space.write("b.c", "b\n")?;
    let out = space.run_expect(&mut cc2_command(vec!["-j", "1"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("build/sh/app/app.out")?, b"a\nb\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failed_library_stops_dependents() -> anyhow::Result<()> {
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
    space.write("l.c", "FAIL\n")?;

    let out = space.run(&mut cc2_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_not_contains(&out, "main.c");
    assert!(!space.exists("build/sh/lib/lib.a"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_source() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "app"
type = "executable"
sources = ["a.c", "gone.c"]
"#,
    )?;
    space.write("a.c", "a\n")?;

    let out = space.run(&mut cc2_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "gone.c");
    Ok(())
}

#[cfg(unix)]
#[test]
fn invalid_source_extension() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "app"
type = "executable"
sources = ["notes.txt"]
"#,
    )?;
    let out = space.run(&mut cc2_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "cc2: error: app:");
    assert_output_contains(&out, "notes.txt");
    Ok(())
}

#[test]
fn unknown_placeholder() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.toml",
        r#"
[toolchain.config]
compile_command = "cc {nope} {input}"

[[target]]
name = "app"
type = "executable"
sources = ["a.c"]
"#,
    )?;
    space.write("a.c", "")?;
    let out = space.run(&mut cc2_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "{nope}");
    Ok(())
}

#[test]
fn dependency_cycle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.toml",
        r#"
[[generator]]
name = "x"
deps = ["y"]

[[generator]]
name = "y"
deps = ["x"]
"#,
    )?;
    let out = space.run(&mut cc2_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "cycle");
    Ok(())
}
