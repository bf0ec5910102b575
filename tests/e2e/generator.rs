use crate::e2e::*;

#[cfg(unix)]
const VERSION: &str = r#"
[[generator]]
name = "version"
inputs = ["VERSION"]
outputs = ["{gen_build_dir}/version.h"]
commands = ["cp {gen_root_dir}/VERSION {gen_build_dir}/version.h"]
"#;

#[cfg(unix)]
#[test]
fn generate_and_regenerate() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.toml", VERSION)?;
    space.write("VERSION", "1\n")?;
    space.touch("VERSION", 1000)?;

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert_eq!(space.read("build/version/version.h")?, b"1\n");

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "no work to do");

    space.write("VERSION", "2\n")?;
    space.touch("VERSION", 2000)?;
    space.run_expect(&mut cc2_command(vec![]))?;
    assert_eq!(space.read("build/version/version.h")?, b"2\n");

    // A deleted output is produced again.
    std::fs::remove_file(space.path().join("build/version/version.h"))?;
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert!(space.exists("build/version/version.h"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn generated_source_feeds_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write_manifest(
        r#"
[[generator]]
name = "gen"
args = { greeting = "hello" }
inputs = ["template.c"]
outputs = ["{project_build_dir}/gen.c"]
commands = ["sed s/GREETING/{greeting}/ {gen_root_dir}/template.c > {project_build_dir}/gen.c"]

[[target]]
name = "app"
type = "executable"
sources = ["build/gen.c"]
deps = ["gen"]
"#,
    )?;
    space.write("template.c", "GREETING\n")?;

    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 3 tasks");
    assert_eq!(space.read("build/sh/app/app.out")?, b"hello\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn parallel_commands() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.toml",
        r#"
[[generator]]
name = "many"
parallel = true
outputs = ["{gen_build_dir}/1", "{gen_build_dir}/2", "{gen_build_dir}/3"]
commands = [
    "touch {gen_build_dir}/1",
    "touch {gen_build_dir}/2",
    "touch {gen_build_dir}/3",
]
"#,
    )?;
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 3 tasks");
    for n in ["1", "2", "3"] {
        assert!(space.exists(&format!("build/many/{}", n)));
    }
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failed_command_regenerates_next_time() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.toml",
        r#"
[[generator]]
name = "flaky"
inputs = ["in"]
outputs = ["{gen_build_dir}/out"]
commands = ["test -f ok", "cp {gen_root_dir}/in {gen_build_dir}/out"]
"#,
    )?;
    space.write("in", "data\n")?;

    let out = space.run(&mut cc2_command(vec![]))?;
    assert!(!out.status.success());
    assert!(!space.exists("build/flaky/flaky.cc2"));

    space.write("ok", "")?;
    let out = space.run_expect(&mut cc2_command(vec![]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("build/flaky/out")?, b"data\n");
    Ok(())
}
