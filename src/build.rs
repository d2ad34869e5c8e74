use std::path::{Path, PathBuf};
use std::process::Command;

use ignore::WalkBuilder;
use toml_edit::DocumentMut;

use crate::error::Error;

/// Copy the user's project into a staging directory, respecting .gitignore
/// and skipping the `target/` directory.
pub fn prepare_staging(project_root: &Path, staging_dir: &Path) -> Result<(), Error> {
    let walker = WalkBuilder::new(project_root)
        .hidden(false)
        .follow_links(true)
        .filter_entry(|entry| {
            // Skip target/ only at the project root level (depth 1).
            entry.depth() != 1 || entry.file_name().to_string_lossy() != "target"
        })
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let source = entry.path();
        let relative = source
            .strip_prefix(project_root)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let dest = staging_dir.join(relative);

        if entry.file_type().is_some_and(|ft| ft.is_dir()) {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_some_and(|ft| ft.is_file()) {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(source, &dest)?;
        }
    }

    Ok(())
}

/// How to reference weave-runtime in the staged Cargo.toml.
pub enum RuntimeSource<'a> {
    /// Published crate version (e.g. "0.3.0").
    Version(&'a str),
    /// Local path (for development before publishing).
    Path(&'a Path),
}

/// Add `weave-runtime` as a dependency in the staged project's Cargo.toml.
/// Uses `toml_edit` for structured manipulation (never string replacement).
pub fn inject_runtime(staging_dir: &Path, source: RuntimeSource<'_>) -> Result<(), Error> {
    let cargo_toml_path = staging_dir.join("Cargo.toml");
    let content = std::fs::read_to_string(&cargo_toml_path)?;

    let mut doc: DocumentMut =
        content
            .parse::<DocumentMut>()
            .map_err(|e| Error::InvalidManifest {
                path: cargo_toml_path.clone(),
                reason: e.to_string(),
            })?;

    // Ensure [dependencies] table exists.
    if !doc.contains_table("dependencies") {
        doc["dependencies"] = toml_edit::Item::Table(toml_edit::Table::new());
    }

    doc["dependencies"]["weave-runtime"] = match source {
        RuntimeSource::Version(v) => toml_edit::value(v),
        RuntimeSource::Path(p) => {
            let mut table = toml_edit::InlineTable::new();
            table.insert("path", p.to_string_lossy().as_ref().into());
            toml_edit::Item::Value(toml_edit::Value::InlineTable(table))
        }
    };

    std::fs::write(&cargo_toml_path, doc.to_string())?;

    Ok(())
}

/// Extract human-readable compiler errors from cargo's JSON output.
fn extract_rendered_errors(json_output: &str) -> Vec<String> {
    json_output
        .lines()
        .filter_map(|line| {
            let msg: serde_json::Value = serde_json::from_str(line).ok()?;
            if msg.get("reason")?.as_str()? != "compiler-message" {
                return None;
            }
            msg.get("message")?
                .get("rendered")?
                .as_str()
                .map(String::from)
        })
        .collect()
}

/// Find the workspace root for a project directory.
///
/// Walks up from `project_dir` looking for the nearest parent `Cargo.toml`
/// containing a `[workspace]` table. Does not validate that this project
/// is an actual member of the workspace -- Cargo will catch mismatches at
/// build time. Returns `None` if no workspace root is found.
pub fn find_workspace_root(project_dir: &Path) -> Option<PathBuf> {
    let project_dir = project_dir.canonicalize().ok()?;
    let mut dir = project_dir.parent()?;
    loop {
        let cargo_toml = dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).ok()?;
            let doc: DocumentMut = content.parse().ok()?;
            if doc.get("workspace").is_some() {
                return Some(dir.to_path_buf());
            }
        }
        dir = dir.parent()?;
    }
}

/// Find the project root by walking up from `start_dir` looking for Cargo.toml.
///
/// Returns the canonicalized directory containing the nearest Cargo.toml.
/// Starts checking `start_dir` itself, then walks up through parents.
pub fn find_project_root(start_dir: &Path) -> Result<PathBuf, Error> {
    let start = start_dir
        .canonicalize()
        .map_err(|_| Error::NoProjectFound(start_dir.to_path_buf()))?;
    let mut dir = start.as_path();
    loop {
        if dir.join("Cargo.toml").exists() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(Error::NoProjectFound(start_dir.to_path_buf())),
        }
    }
}

/// Kind of crate target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Lib,
    Bin,
}

/// One crate root of a package: the file the compiler starts from and the
/// name the crate is compiled under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrateRoot {
    pub kind: TargetKind,
    pub crate_name: String,
    /// Relative to the project directory.
    pub path: PathBuf,
}

/// Read `[package].name` from the project's Cargo.toml.
pub fn package_name(project_dir: &Path) -> Result<String, Error> {
    let manifest = project_dir.join("Cargo.toml");
    let doc = read_manifest(&manifest)?;
    doc.get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidManifest {
            path: manifest,
            reason: "missing package.name".into(),
        })
}

fn read_manifest(manifest: &Path) -> Result<DocumentMut, Error> {
    let content = std::fs::read_to_string(manifest).map_err(|source| Error::ReadError {
        path: manifest.to_path_buf(),
        source,
    })?;
    content
        .parse::<DocumentMut>()
        .map_err(|e| Error::InvalidManifest {
            path: manifest.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Find every crate root of a Cargo package.
///
/// Resolves targets using Cargo's rules:
///
/// 1. `[lib]` with an explicit `path`, else `src/lib.rs` when it exists.
/// 2. `[[bin]]` entries with an explicit `path`, or with a `name` whose
///    source is inferred as `src/bin/<name>.rs` or `src/bin/<name>/main.rs`.
/// 3. Auto-discovered binaries: `src/main.rs`, `src/bin/*.rs` and
///    `src/bin/*/main.rs`.
///
/// A file claimed by an explicit `[[bin]]` is not discovered again. Returns
/// an error if the package has no crate root at all.
pub fn crate_roots(project_dir: &Path) -> Result<Vec<CrateRoot>, Error> {
    let doc = read_manifest(&project_dir.join("Cargo.toml"))?;
    let package = package_name(project_dir)?;
    let crate_ident = |name: &str| name.replace('-', "_");
    let mut roots: Vec<CrateRoot> = Vec::new();
    let push = |roots: &mut Vec<CrateRoot>, kind, name: &str, path: PathBuf| {
        if !roots.iter().any(|r| r.path == path) {
            roots.push(CrateRoot {
                kind,
                crate_name: crate_ident(name),
                path,
            });
        }
    };

    let lib = doc.get("lib");
    let lib_path = lib
        .and_then(|l| l.get("path"))
        .and_then(|p| p.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("src").join("lib.rs"));
    if project_dir.join(&lib_path).is_file() {
        let name = lib
            .and_then(|l| l.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or(&package);
        push(&mut roots, TargetKind::Lib, name, lib_path);
    }

    if let Some(bins) = doc.get("bin").and_then(|b| b.as_array_of_tables()) {
        for bin in bins {
            let name = bin.get("name").and_then(|n| n.as_str()).unwrap_or(&package);
            if let Some(path) = bin.get("path").and_then(|p| p.as_str()) {
                push(&mut roots, TargetKind::Bin, name, PathBuf::from(path));
                continue;
            }
            let single_file = PathBuf::from("src").join("bin").join(format!("{name}.rs"));
            let dir_main = PathBuf::from("src").join("bin").join(name).join("main.rs");
            let default_main = PathBuf::from("src").join("main.rs");
            if let Some(path) = [single_file, dir_main, default_main]
                .into_iter()
                .find(|p| project_dir.join(p).is_file())
            {
                push(&mut roots, TargetKind::Bin, name, path);
            }
        }
    }

    let default_main = PathBuf::from("src").join("main.rs");
    if project_dir.join(&default_main).is_file() {
        push(&mut roots, TargetKind::Bin, &package, default_main);
    }

    let bin_dir = project_dir.join("src").join("bin");
    if bin_dir.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&bin_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        for entry in entries {
            let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let stem = stem.to_string();
            let relative = PathBuf::from("src").join("bin");
            if entry.is_file() && entry.extension().is_some_and(|e| e == "rs") {
                push(&mut roots, TargetKind::Bin, &stem, relative.join(format!("{stem}.rs")));
            } else if entry.join("main.rs").is_file() {
                push(&mut roots, TargetKind::Bin, &stem, relative.join(&stem).join("main.rs"));
            }
        }
    }

    if roots.is_empty() {
        return Err(Error::NoCrateRoots(project_dir.to_path_buf()));
    }
    Ok(roots)
}

/// Build the woven project using `cargo build --message-format=json`.
/// Returns the path to the compiled executable.
///
/// When `package` is `Some`, passes `-p <name>` to cargo to build a specific
/// workspace member (used when staging an entire workspace).
pub fn build_instrumented(
    staging_dir: &Path,
    target_dir: &Path,
    package: Option<&str>,
) -> Result<PathBuf, Error> {
    // Remove RUSTUP_TOOLCHAIN so the target project's rust-toolchain.toml
    // is respected. Without this, nested cargo invocations inherit the
    // parent's toolchain, ignoring the project's pinned version.
    let mut cmd = Command::new("cargo");
    cmd.arg("build")
        .arg("--message-format=json")
        .env("CARGO_TARGET_DIR", target_dir)
        .env_remove("RUSTUP_TOOLCHAIN")
        .current_dir(staging_dir);
    if let Some(pkg) = package {
        cmd.arg("-p").arg(pkg);
    }
    let output = cmd.output()?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let rendered = extract_rendered_errors(&stdout);
        if rendered.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::BuildFailed(stderr.into_owned()));
        }
        return Err(Error::BuildFailed(rendered.join("")));
    }

    // Parse JSON lines to find the last compiler-artifact with an executable.
    // Cargo emits dependencies first; the project's own binary comes last.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut binary_path = None;
    for line in stdout.lines() {
        let Ok(msg) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if msg.get("reason").and_then(|r| r.as_str()) == Some("compiler-artifact")
            && let Some(exe) = msg.get("executable").and_then(|e| e.as_str())
        {
            binary_path = Some(PathBuf::from(exe));
        }
    }

    binary_path
        .ok_or_else(|| Error::BuildFailed("no executable found in cargo build output".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Helper: create a file within a directory, creating parents as needed.
    fn create_file(base: &Path, relative: &str, content: &str) {
        let path = base.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn staging_copies_project_structure() {
        let project = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        create_file(project.path(), "Cargo.toml", "[package]\nname = \"demo\"");
        create_file(project.path(), "src/main.rs", "fn main() {}");
        create_file(project.path(), "src/lib.rs", "pub fn lib() {}");
        create_file(project.path(), "src/util/helper.rs", "pub fn help() {}");

        // Also create a target/ dir that should be skipped
        create_file(project.path(), "target/debug/demo", "binary-content");

        prepare_staging(project.path(), staging.path()).unwrap();

        assert!(staging.path().join("Cargo.toml").exists());
        assert!(staging.path().join("src/main.rs").exists());
        assert!(staging.path().join("src/lib.rs").exists());
        assert!(staging.path().join("src/util/helper.rs").exists());
        assert!(!staging.path().join("target").exists());

        let content = std::fs::read_to_string(staging.path().join("Cargo.toml")).unwrap();
        assert_eq!(content, "[package]\nname = \"demo\"");
    }

    #[test]
    fn inject_runtime_adds_version_dependency() {
        let staging = TempDir::new().unwrap();
        let toml_content = r#"[package]
name = "demo"
version = "0.1.0"

[dependencies]
serde = "1"
"#;
        create_file(staging.path(), "Cargo.toml", toml_content);

        inject_runtime(staging.path(), RuntimeSource::Version("0.3.0")).unwrap();

        let result = std::fs::read_to_string(staging.path().join("Cargo.toml")).unwrap();
        let doc: DocumentMut = result.parse().unwrap();

        assert_eq!(doc["dependencies"]["weave-runtime"].as_str(), Some("0.3.0"));
        // serde is preserved
        assert_eq!(doc["dependencies"]["serde"].as_str(), Some("1"));
    }

    #[test]
    fn inject_runtime_creates_section_with_path() {
        let staging = TempDir::new().unwrap();
        let toml_content = r#"[package]
name = "demo"
version = "0.1.0"
"#;
        create_file(staging.path(), "Cargo.toml", toml_content);

        inject_runtime(
            staging.path(),
            RuntimeSource::Path(Path::new("/opt/weave/weave-runtime")),
        )
        .unwrap();

        let result = std::fs::read_to_string(staging.path().join("Cargo.toml")).unwrap();
        let doc: DocumentMut = result.parse().unwrap();
        let dep = doc["dependencies"]["weave-runtime"]
            .as_inline_table()
            .unwrap();
        assert_eq!(
            dep.get("path").and_then(|v| v.as_str()),
            Some("/opt/weave/weave-runtime")
        );
    }

    #[test]
    fn extract_compiler_errors_from_json() {
        let json_lines = concat!(
            r#"{"reason":"compiler-message","message":{"rendered":"error[E0308]: mismatched types\n --> src/main.rs:2:5\n"}}"#,
            "\n",
            r#"{"reason":"compiler-message","message":{"rendered":"error: aborting due to previous error\n"}}"#,
            "\n",
            r#"{"reason":"build-finished","success":false}"#,
        );
        let errors = extract_rendered_errors(json_lines);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("mismatched types"));
    }

    #[test]
    fn find_workspace_root_detects_parent_workspace() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("ws");

        create_file(&ws, "Cargo.toml", "[workspace]\nmembers = [\"crates/*\"]\n");
        create_file(
            &ws,
            "crates/member/Cargo.toml",
            "[package]\nname = \"member\"\nversion = \"0.1.0\"\n",
        );
        create_file(&ws, "crates/member/src/main.rs", "fn main() {}");

        let member_dir = ws.join("crates").join("member");
        let result = find_workspace_root(&member_dir);
        assert_eq!(result, Some(ws.canonicalize().unwrap()));
    }

    #[test]
    fn find_workspace_root_returns_none_for_standalone() {
        let tmp = TempDir::new().unwrap();
        create_file(
            tmp.path(),
            "Cargo.toml",
            "[package]\nname = \"standalone\"\nversion = \"0.1.0\"\n",
        );
        create_file(tmp.path(), "src/main.rs", "fn main() {}");

        assert!(find_workspace_root(tmp.path()).is_none());
    }

    #[test]
    fn find_project_root_walks_up() {
        let tmp = TempDir::new().unwrap();
        create_file(tmp.path(), "Cargo.toml", "[package]\nname = \"demo\"\n");
        create_file(tmp.path(), "src/deep/mod.rs", "");

        let root = find_project_root(&tmp.path().join("src/deep")).unwrap();
        assert_eq!(root, tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn crate_roots_finds_lib_and_main() {
        let tmp = TempDir::new().unwrap();
        create_file(
            tmp.path(),
            "Cargo.toml",
            "[package]\nname = \"my-tool\"\nversion = \"0.1.0\"\n",
        );
        create_file(tmp.path(), "src/lib.rs", "pub fn lib() {}");
        create_file(tmp.path(), "src/main.rs", "fn main() {}");

        let roots = crate_roots(tmp.path()).unwrap();
        assert_eq!(
            roots,
            [
                CrateRoot {
                    kind: TargetKind::Lib,
                    crate_name: "my_tool".into(),
                    path: PathBuf::from("src/lib.rs"),
                },
                CrateRoot {
                    kind: TargetKind::Bin,
                    crate_name: "my_tool".into(),
                    path: PathBuf::from("src/main.rs"),
                },
            ]
        );
    }

    #[test]
    fn crate_roots_with_explicit_bin_path() {
        let tmp = TempDir::new().unwrap();
        let toml = r#"[package]
name = "demo"
version = "0.1.0"

[[bin]]
name = "demo"
path = "src/custom/app.rs"
"#;
        create_file(tmp.path(), "Cargo.toml", toml);
        create_file(tmp.path(), "src/custom/app.rs", "fn main() {}");

        let roots = crate_roots(tmp.path()).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, PathBuf::from("src/custom/app.rs"));
    }

    #[test]
    fn crate_roots_infers_bin_from_name() {
        let tmp = TempDir::new().unwrap();
        let toml = r#"[package]
name = "demo"
version = "0.1.0"

[[bin]]
name = "mytool"
"#;
        create_file(tmp.path(), "Cargo.toml", toml);
        // No src/bin/mytool.rs, but src/bin/mytool/main.rs exists.
        create_file(tmp.path(), "src/bin/mytool/main.rs", "fn main() {}");

        let roots = crate_roots(tmp.path()).unwrap();
        assert_eq!(roots.len(), 1, "explicit bin is not discovered twice");
        assert_eq!(roots[0].crate_name, "mytool");
        assert_eq!(roots[0].path, PathBuf::from("src/bin/mytool/main.rs"));
    }

    #[test]
    fn crate_roots_discovers_src_bin() {
        let tmp = TempDir::new().unwrap();
        create_file(
            tmp.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
        );
        create_file(tmp.path(), "src/bin/alpha.rs", "fn main() {}");
        create_file(tmp.path(), "src/bin/beta/main.rs", "fn main() {}");

        let roots = crate_roots(tmp.path()).unwrap();
        let names: Vec<&str> = roots.iter().map(|r| r.crate_name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[test]
    #[cfg(unix)]
    fn staging_follows_symlinked_directories() {
        let project = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        let real_src = TempDir::new().unwrap();
        create_file(real_src.path(), "main.rs", "fn main() {}");
        create_file(real_src.path(), "lib.rs", "pub fn lib() {}");

        create_file(project.path(), "Cargo.toml", "[package]\nname = \"demo\"");
        std::os::unix::fs::symlink(real_src.path(), project.path().join("src")).unwrap();

        prepare_staging(project.path(), staging.path()).unwrap();

        assert!(
            staging.path().join("src/main.rs").exists(),
            "symlinked src/main.rs should be copied to staging"
        );
        assert!(staging.path().join("src/lib.rs").exists());
    }

    #[test]
    fn crate_roots_errors_when_no_root_found() {
        let tmp = TempDir::new().unwrap();
        let toml = r#"[package]
name = "demo"
version = "0.1.0"
"#;
        create_file(tmp.path(), "Cargo.toml", toml);

        let result = crate_roots(tmp.path());
        assert!(matches!(result, Err(Error::NoCrateRoots(_))));
    }
}
