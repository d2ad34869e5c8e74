use std::path::Path;

fn main() {
    // Woven projects call into weave-runtime, so `weave build` adds it to the
    // staged manifest. Without --runtime-path that entry is a version
    // requirement, taken from the sibling crate here.
    let runtime_cargo = Path::new("weave-runtime").join("Cargo.toml");
    println!("cargo::rerun-if-changed={}", runtime_cargo.display());

    let version = match std::fs::read_to_string(&runtime_cargo) {
        Ok(contents) => contents
            .parse::<toml_edit::DocumentMut>()
            .expect("failed to parse weave-runtime/Cargo.toml")
            .get("package")
            .and_then(|p| p.get("version"))
            .and_then(|v| v.as_str())
            .expect("missing [package].version in weave-runtime/Cargo.toml")
            .to_owned(),
        Err(_) => {
            // A packaged weave has no weave-runtime directory next to it. Both
            // crates are released with the same version number.
            std::env::var("CARGO_PKG_VERSION").expect("CARGO_PKG_VERSION not set")
        }
    };

    println!("cargo::rustc-env=WEAVE_RUNTIME_VERSION={version}");
}
