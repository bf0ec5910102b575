use anyhow::{anyhow, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::canon::canon_join;
use crate::env::Context;
use crate::generator::Generator;
use crate::manifest::{self, GeneratorConfig, Manifest, TargetConfig};
use crate::progress::ConsoleProgress;
use crate::register::{self, Builder, Register};
use crate::target::Target;
use crate::toolchain::{TargetType, Toolchain};
use crate::{signal, trace};

#[derive(argh::FromArgs)]
/// cc2, an incremental build orchestrator for C and C++ projects.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<PathBuf>,

    /// build description [default=build.toml]
    #[argh(option, short = 'f', default = "String::from(\"build.toml\")")]
    file: String,

    /// parallelism [default=available hardware threads]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// debugging tools, "-d list" to list
    #[argh(option, short = 'd')]
    debug: Option<String>,

    /// log level when CC2_LOG is unset [default=warn]
    #[argh(option, short = 'l', default = "String::from(\"warn\")")]
    log_level: String,

    /// remove the build directory and exit
    #[argh(switch)]
    clean: bool,

    /// run the declared tests after a successful build
    #[argh(switch)]
    test: bool,

    /// targets or generators to build [default=all]
    #[argh(positional)]
    targets: Vec<String>,
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("CC2_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

/// One declared entity of the build description.
enum Node<'a> {
    Target(Target<'a>),
    Generator(Generator<'a>),
}

impl<'a> Node<'a> {
    fn builder(&self) -> &dyn Builder {
        match self {
            Node::Target(t) => t,
            Node::Generator(g) => g,
        }
    }

    fn name(&self) -> &str {
        match self {
            Node::Target(t) => t.name(),
            Node::Generator(g) => g.name(),
        }
    }

    fn lock(&mut self) -> crate::error::Result<()> {
        match self {
            Node::Target(t) => t.build(),
            Node::Generator(g) => g.build(),
        }
    }
}

fn declare_target<'a>(
    config: &TargetConfig,
    toolchain: &'a Toolchain,
    ctx: &'a Context,
) -> crate::error::Result<Target<'a>> {
    let mut t = Target::new(&config.name, config.kind, toolchain, ctx, &config.root)?;
    for path in &config.sources {
        t.add_source(path)?;
    }
    for dir in &config.glob_sources {
        t.glob_sources(dir)?;
    }
    for path in &config.headers {
        t.add_header(path)?;
    }
    for dir in &config.glob_headers {
        t.glob_headers(dir)?;
    }
    for path in &config.pch {
        t.add_pch(path)?;
    }
    for dir in &config.include_dirs {
        t.add_include_dir(dir, false)?;
    }
    for dir in &config.lib_dirs {
        t.add_lib_dir(dir)?;
    }

    let flags: [(&[String], fn(&mut Target<'a>, String) -> crate::error::Result<()>); 8] = [
        (config.preprocessor_flags.as_slice(), |t, f| t.add_preprocessor_flag(f)),
        (config.common_compile_flags.as_slice(), |t, f| t.add_common_compile_flag(f)),
        (config.pch_compile_flags.as_slice(), |t, f| t.add_pch_compile_flag(f)),
        (config.pch_object_flags.as_slice(), |t, f| t.add_pch_object_flag(f)),
        (config.asm_compile_flags.as_slice(), |t, f| t.add_asm_compile_flag(f)),
        (config.c_compile_flags.as_slice(), |t, f| t.add_c_compile_flag(f)),
        (config.cpp_compile_flags.as_slice(), |t, f| t.add_cpp_compile_flag(f)),
        (config.link_flags.as_slice(), |t, f| t.add_link_flag(f)),
    ];
    for (values, add) in flags {
        for flag in values {
            add(&mut t, flag.clone())?;
        }
    }

    for path in &config.lib_deps {
        t.add_lib_dep(path)?;
    }
    for lib in &config.external_lib_deps {
        t.add_external_lib_dep(lib)?;
    }
    for path in &config.compile_dependencies {
        t.add_compile_dependency(path)?;
    }
    for path in &config.link_dependencies {
        t.add_link_dependency(path)?;
    }
    Ok(t)
}

fn declare_generator<'a>(
    config: &GeneratorConfig,
    ctx: &'a Context,
) -> crate::error::Result<Generator<'a>> {
    let mut g = Generator::new(&config.name, ctx, &config.root, config.parallel)?;
    for (identifier, value) in &config.args {
        g.add_default_argument(identifier, value)?;
    }
    for pattern in &config.inputs {
        g.add_input(pattern)?;
    }
    for pattern in &config.outputs {
        g.add_output(pattern)?;
    }
    for pattern in &config.commands {
        g.add_command(pattern, &[])?;
    }
    Ok(g)
}

fn named<T>(name: &str, result: crate::error::Result<T>) -> anyhow::Result<T> {
    result.map_err(|err| anyhow!("{}: {}", name, err))
}

fn build(ctx: &Context, manifest: &Manifest, args: &Args) -> anyhow::Result<i32> {
    let toolchain = Toolchain::new(
        &manifest.toolchain.name,
        manifest.toolchain.executables.clone(),
        manifest.toolchain.config.clone(),
    )?;
    let selected = manifest.select(&args.targets)?;

    let mut nodes: Vec<Node> = Vec::new();
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for config in manifest.target.iter().filter(|t| selected.contains(&t.name)) {
        let target = named(&config.name, declare_target(config, &toolchain, ctx))?;
        index.insert(&config.name, nodes.len());
        nodes.push(Node::Target(target));
    }
    for config in manifest.generator.iter().filter(|g| selected.contains(&g.name)) {
        let generator = named(&config.name, declare_generator(config, ctx))?;
        index.insert(&config.name, nodes.len());
        nodes.push(Node::Generator(generator));
    }

    // Libraries named in `deps` are linked against, in declaration order.
    let mut outputs: BTreeMap<String, PathBuf> = BTreeMap::new();
    for node in &nodes {
        if let Node::Target(t) = node {
            if t.kind() != TargetType::Executable {
                outputs.insert(t.name().to_owned(), t.target_path());
            }
        }
    }
    for config in manifest.target.iter().filter(|t| selected.contains(&t.name)) {
        let libs: Vec<&PathBuf> = config
            .deps
            .iter()
            .filter_map(|dep| outputs.get(dep.as_str()))
            .collect();
        if let Node::Target(t) = &mut nodes[index[config.name.as_str()]] {
            for lib in libs {
                named(&config.name, t.add_lib_dep(lib))?;
            }
        }
    }

    for node in &mut nodes {
        let name = node.name().to_owned();
        named(&name, node.lock())?;
    }

    let mut register = Register::new(ctx);
    for node in &nodes {
        register.build(node.builder())?;
    }
    let edges = manifest
        .target
        .iter()
        .map(|t| (&t.name, &t.deps, &t.test))
        .chain(manifest.generator.iter().map(|g| (&g.name, &g.deps, &g.test)));
    for (name, deps, test) in edges {
        let Some(&i) = index.get(name.as_str()) else {
            continue;
        };
        let node = nodes[i].builder();
        for dep in deps {
            named(name, register.dep(node, nodes[index[dep.as_str()]].builder()))?;
        }
        if let Some(command) = test {
            named(name, register.test(node, command.clone()))?;
        }
    }

    let summary = register.run(args.jobs.unwrap_or(0))?;
    if !summary.success {
        // The failing task has already reported itself.
        return Ok(1);
    }
    match summary.commands {
        0 => println!("cc2: no work to do"),
        n => println!("cc2: ran {} tasks, now up to date", n),
    }

    if args.test && !register.run_tests()? {
        println!("cc2: tests failed");
        return Ok(1);
    }
    Ok(0)
}

fn run_impl(args: Args) -> anyhow::Result<i32> {
    if let Some(dir) = &args.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let trace = match args.debug.as_deref() {
        None => None,
        Some("list") => {
            println!("debug tools:");
            println!("  trace  generate json performance trace");
            return Ok(1);
        }
        Some("trace") => Some(trace::Trace::open("trace.json")?),
        Some(other) => bail!("unknown -d {:?}, use -d list to list", other),
    };

    let manifest_path = Path::new(&args.file);
    let manifest = manifest::load(manifest_path)?;
    let cwd = std::env::current_dir()?;
    let manifest_dir = canon_join(&cwd, manifest_path.parent().unwrap_or(Path::new("")));
    let root = canon_join(&manifest_dir, &manifest.project.root);
    let build_dir = canon_join(&root, &manifest.project.build);

    let mut ctx = Context::new(root, build_dir)
        .with_fingerprint(manifest.project.fingerprint)
        .with_progress(ConsoleProgress::new(args.verbose));
    if let Some(trace) = trace {
        ctx = ctx.with_trace(trace);
    }

    let result = if args.clean {
        register::clean(&ctx)
            .map(|()| 0)
            .map_err(anyhow::Error::from)
    } else {
        ctx.scope("build", || build(&ctx, &manifest, &args))
    };
    if let Some(trace) = ctx.trace() {
        if let Err(err) = trace.close() {
            tracing::warn!("writing trace: {}", err);
        }
    }
    result
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging(&args.log_level);
    signal::register_sigint();
    run_impl(args)
}
