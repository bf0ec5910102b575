use crate::e2e::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.toml", "")?;
    let out = space.run(&mut cc2_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "cc2: no work to do\n");
    Ok(())
}

#[test]
fn missing_manifest() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut cc2_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "cc2: error: read");
    Ok(())
}

#[cfg(unix)]
#[test]
fn basic_build() -> anyhow::Result<()> {
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
    space.write("b.c", "b\n")?;

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 3 tasks");
    assert_eq!(space.read("build/sh/app/a.c.o")?, b"a\n");
    assert_eq!(space.read("build/sh/app/app.out")?, b"a\nb\n");
    assert!(space.exists("build/sh/app/app.cc2"));

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn sources_in_subdirs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "app"
type = "executable"
root = "src"
sources = ["main.c", "util/u.c", "../shared/s.c"]
"#,
    )?;
    space.write("src/main.c", "main\n")?;
    space.write("src/util/u.c", "u\n")?;
    space.write("shared/s.c", "s\n")?;

    space.run_expect(&mut cc2_command(vec![]))?;
    assert!(space.exists("build/sh/app/main.c.o"));
    assert!(space.exists("build/sh/app/util/u.c.o"));
    // Paths leaving the target root are kept inside the build dir.
    assert!(space.exists("build/sh/app/__/shared/s.c.o"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn library_dependency() -> anyhow::Result<()> {
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
root = "lib"
sources = ["l.c"]
"#,
    )?;
    space.write("main.c", "main\n")?;
    space.write("lib/l.c", "lib\n")?;

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 4 tasks");
    assert_eq!(space.read("build/sh/lib/lib.a")?, b"lib\n");
    assert_eq!(space.read("build/sh/app/app.out")?, b"main\nlib\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn select_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "one"
type = "executable"
sources = ["one.c"]

[[target]]
name = "two"
type = "executable"
sources = ["two.c"]
"#,
    )?;
    space.write("one.c", "1\n")?;
    space.write("two.c", "2\n")?;

    space.run_expect(&mut cc2_command(vec!["two"]))?;
    assert!(space.exists("build/sh/two/two.out"));
    assert!(!space.exists("build/sh/one"));

    let out = space.run(&mut cc2_command(vec!["three"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown target requested");
    Ok(())
}

#[cfg(unix)]
#[test]
fn clean() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "app"
type = "executable"
sources = ["a.c"]
"#,
    )?;
    space.write("a.c", "a\n")?;
    space.run_expect(&mut cc2_command(vec![]))?;
    assert!(space.exists("build"));

    space.run_expect(&mut cc2_command(vec!["--clean"]))?;
    assert!(!space.exists("build"));

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 2 tasks");
    Ok(())
}

#[cfg(unix)]
#[test]
fn run_tests() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[target]]
name = "good"
type = "executable"
sources = ["a.c"]
test = "grep -q a good.out"
"#,
    )?;
    space.write("a.c", "a\n")?;
    space.run_expect(&mut cc2_command(vec!["--test"]))?;

    space.write_manifest(
        r#"
[[target]]
name = "good"
type = "executable"
sources = ["a.c"]
test = "grep -q z good.out"
"#,
    )?;
    let out = space.run(&mut cc2_command(vec!["--test"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "cc2: tests failed");
    Ok(())
}

#[cfg(unix)]
#[test]
fn chdir_and_manifest_flags() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "proj/other.toml",
        &[
            SHELL_TOOLCHAIN,
            r#"
[project]
build = "out"

[[target]]
name = "app"
type = "executable"
sources = ["a.c"]
"#,
        ]
        .join("\n"),
    )?;
    space.write("proj/a.c", "a\n")?;
    space.run_expect(&mut cc2_command(vec!["-C", "proj", "-f", "other.toml"]))?;
    assert!(space.exists("proj/out/sh/app/app.out"));
    Ok(())
}

#[test]
fn debug_list() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.toml", "")?;
    let out = space.run(&mut cc2_command(vec!["-d", "list"]))?;
    assert_output_contains(&out, "trace");
    assert_output_not_contains(&out, "no work to do");
    Ok(())
}
