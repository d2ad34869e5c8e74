use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use weave::build::{
    RuntimeSource, build_instrumented, crate_roots, find_project_root, find_workspace_root,
    inject_runtime, package_name, prepare_staging,
};
use weave::config::Config;
use weave::error::Error;
use weave::filter::Pattern;
use weave::intercept::{Interceptor, Load, Strategy, deliver};
use weave::modules::ModuleTree;
use weave::rewrite::{DeclaredTypes, instrument_source};

#[derive(Parser)]
#[command(
    name = "weave",
    about = "Load-time instrumentation weaving: wrap Rust functions with pre/post hooks",
    version,
    after_help = "Workflow: weave build [OPTIONS], then weave run -- ARGS"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which functions are woven and how their hooks are found.
#[derive(Args, Clone)]
struct Selection {
    /// Weave functions whose name contains PATTERN (repeatable).
    /// e.g. --fn parse matches parse, parse_line, Walker::try_parse.
    #[arg(long = "fn", value_name = "PATTERN")]
    fn_patterns: Vec<String>,

    /// Weave methods of a type or trait, by bare or module-qualified name
    /// (repeatable).
    #[arg(long = "class", value_name = "NAME")]
    class_patterns: Vec<String>,

    /// Weave all functions in a module and its submodules (repeatable).
    #[arg(long = "mod", value_name = "NAME")]
    mod_patterns: Vec<String>,

    /// Resolver function called as RESOLVER(class, function), e.g.
    /// crate::hooks::resolve. Defaults to weave_runtime::resolve.
    #[arg(long, value_name = "PATH")]
    resolver: Option<String>,
}

impl Selection {
    fn into_config(self) -> Config {
        let mut patterns = Vec::new();
        patterns.extend(self.fn_patterns.into_iter().map(Pattern::Fn));
        patterns.extend(self.class_patterns.into_iter().map(Pattern::Class));
        patterns.extend(self.mod_patterns.into_iter().map(Pattern::Mod));
        Config {
            resolver: self.resolver,
            patterns,
            ..Config::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Weave and build the project. Weaves all functions by default;
    /// use --fn, --class, or --mod to narrow scope.
    Build {
        #[command(flatten)]
        selection: Selection,

        /// Project root (defaults to current directory).
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Path to weave-runtime source (for development before publishing).
        #[arg(long)]
        runtime_path: Option<PathBuf>,

        /// Never weave this module or its submodules, e.g. mycrate::vendor
        /// (repeatable).
        #[arg(long, value_name = "MODULE")]
        exclude: Vec<String>,

        /// Keep woven text under DIR and reuse it on later builds.
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,

        /// Re-weave every module even when a cached artifact exists.
        #[arg(long)]
        refresh_cache: bool,
    },
    /// Execute the last-built woven binary.
    /// Pass arguments to the binary after --.
    Run {
        /// Arguments to pass to the woven binary (after --).
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Print the woven text of one source file.
    Show {
        /// Source file inside a Cargo project.
        file: PathBuf,

        #[command(flatten)]
        selection: Selection,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

/// Debug events go to stderr, filtered by `WEAVE_LOG` (e.g. `WEAVE_LOG=debug`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("WEAVE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Build {
            selection,
            project,
            runtime_path,
            exclude,
            cache_dir,
            refresh_cache,
        } => {
            let cli_config = Config {
                exclude,
                cache_dir,
                ..selection.into_config()
            };
            cmd_build(project, runtime_path, cli_config, refresh_cache)
        }
        Commands::Run { args } => cmd_run(args),
        Commands::Show { file, selection } => cmd_show(file, selection.into_config()),
    }
}

/// Weave and build the project, returning the binary path.
fn build_project(
    project: PathBuf,
    runtime_path: Option<PathBuf>,
    cli_config: Config,
    refresh_cache: bool,
) -> Result<PathBuf, Error> {
    if !project.exists() {
        return Err(Error::BuildFailed(format!(
            "project directory does not exist: {}",
            project.display()
        )));
    }
    let project = find_project_root(&project)?;
    let config = Config::load(&project)?.merge(cli_config);
    let options = config.options()?;
    let roots = crate_roots(&project)?;

    // Detect workspace membership. If the project is a workspace member,
    // stage from the workspace root so inherited fields and cross-member
    // path dependencies resolve correctly.
    let workspace_root = find_workspace_root(&project);
    let (staging_root, member_subdir, package) = match &workspace_root {
        Some(ws_root) => {
            let relative = project
                .strip_prefix(ws_root)
                .map_err(|e| std::io::Error::other(e.to_string()))?
                .to_path_buf();
            (ws_root.clone(), Some(relative), Some(package_name(&project)?))
        }
        None => (project.clone(), None, None),
    };

    let staging = tempfile::tempdir()?;
    prepare_staging(&staging_root, staging.path())?;
    let member_staging = match &member_subdir {
        Some(sub) => staging.path().join(sub),
        None => staging.path().to_path_buf(),
    };

    match runtime_path {
        Some(ref path) => {
            let abs_path = std::fs::canonicalize(path)?;
            inject_runtime(&member_staging, RuntimeSource::Path(&abs_path))?;
        }
        None => {
            inject_runtime(
                &member_staging,
                RuntimeSource::Version(env!("WEAVE_RUNTIME_VERSION")),
            )?;
        }
    }

    let strategy = match &config.cache_dir {
        Some(dir) => Strategy::Cached {
            dir: project.join(dir),
            refresh: refresh_cache,
        },
        None => Strategy::Streaming,
    };

    // A file reachable from several crate roots (lib and bin sharing a
    // module via #[path]) is delivered once.
    let mut delivered: HashSet<PathBuf> = HashSet::new();
    let mut total_fns = 0;
    let mut woven_files = 0;
    for root in &roots {
        let tree = ModuleTree::discover(&root.crate_name, &project.join(&root.path))?;
        let mut interceptor =
            Interceptor::new(&tree, options.clone()).with_strategy(strategy.clone());
        for prefix in &config.exclude {
            interceptor = interceptor.exclude(prefix.clone());
        }

        for (module, _) in tree.modules() {
            let Some(load) = interceptor.load(module)? else {
                continue;
            };
            if !delivered.insert(load.path().to_path_buf()) {
                continue;
            }
            if deliver(&load, &project, &member_staging)?.is_none() {
                continue;
            }
            woven_files += 1;
            let relative = load.path().strip_prefix(&project).unwrap_or(load.path());
            match &load {
                Load::Instrumented { wrapped, .. } => {
                    eprintln!("  {}:", relative.display());
                    for f in wrapped {
                        eprintln!("    {f}");
                    }
                    total_fns += wrapped.len();
                }
                Load::Cached { .. } => eprintln!("  {}: (cached)", relative.display()),
                Load::Original { .. } => {}
            }
        }
    }
    eprintln!(
        "wove {} function(s) across {} file(s)",
        total_fns, woven_files
    );

    let target_dir = project.join("target").join("weave");
    build_instrumented(staging.path(), &target_dir, package.as_deref())
}

fn cmd_build(
    project: PathBuf,
    runtime_path: Option<PathBuf>,
    cli_config: Config,
    refresh_cache: bool,
) -> Result<(), Error> {
    let binary = build_project(project, runtime_path, cli_config, refresh_cache)?;
    let display_name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string());
    eprintln!("built: {display_name}");
    if !std::io::stdout().is_terminal() {
        println!("{}", binary.display());
    }

    Ok(())
}

fn find_latest_binary() -> Result<PathBuf, Error> {
    let project = find_project_root(&std::env::current_dir()?).map_err(|_| Error::NoBinary)?;
    let dir = project.join("target").join("weave").join("debug");
    if !dir.is_dir() {
        return Err(Error::NoBinary);
    }
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Skip files with extensions (e.g. .d, .fingerprint) -- binaries have no extension on unix
        if path.extension().is_some() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if entry.metadata()?.permissions().mode() & 0o111 == 0 {
                continue; // not executable
            }
        }
        let mtime = entry.metadata()?.modified()?;
        if best.as_ref().is_none_or(|(_, t)| mtime > *t) {
            best = Some((path, mtime));
        }
    }
    best.map(|(p, _)| p).ok_or(Error::NoBinary)
}

fn cmd_run(args: Vec<String>) -> Result<(), Error> {
    let binary = find_latest_binary()?;
    eprintln!("running: {}", binary.display());

    let status = std::process::Command::new(&binary)
        .args(&args)
        .status()
        .map_err(|e| Error::RunFailed(format!("failed to run {}: {e}", binary.display())))?;

    std::process::exit(status.code().unwrap_or(1));
}

fn cmd_show(file: PathBuf, cli_config: Config) -> Result<(), Error> {
    let file = std::fs::canonicalize(&file).map_err(|source| Error::ReadError {
        path: file.clone(),
        source,
    })?;
    let project = find_project_root(file.parent().unwrap_or(Path::new(".")))?;
    let config = Config::load(&project)?.merge(cli_config);
    let mut options = config.options()?;
    if let Some((namespace, types)) = module_of_file(&project, &file)? {
        options = options.with_types(types).for_module(&namespace);
    }

    let source = std::fs::read_to_string(&file).map_err(|source| Error::ReadError {
        path: file.clone(),
        source,
    })?;
    let result = instrument_source(&source, &options).map_err(|source| Error::ParseError {
        path: file.clone(),
        source,
    })?;
    if result.hooked {
        eprintln!("wove {} function(s)", result.wrapped.len());
    } else {
        eprintln!("nothing to weave");
    }
    anstream::print!("{}", result.source);
    Ok(())
}

/// Crate-relative module path of `file` and the types its crate declares,
/// if any crate root reaches it.
fn module_of_file(project: &Path, file: &Path) -> Result<Option<(String, DeclaredTypes)>, Error> {
    for root in crate_roots(project)? {
        let tree = ModuleTree::discover(&root.crate_name, &project.join(&root.path))?;
        let found = tree
            .modules()
            .find(|(_, path)| path.canonicalize().is_ok_and(|p| p == file))
            .map(|(module, _)| tree.namespace_of(module).to_string());
        if let Some(namespace) = found {
            return Ok(Some((namespace, tree.declared_types())));
        }
    }
    Ok(None)
}
