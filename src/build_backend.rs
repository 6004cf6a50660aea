//! Invoking a distribution's build backend to get at metadata the static files don't
//! declare.
//!
//! Two backends are called out here, matching what an sdist can actually contain:
//! legacy `setup.py` (no `pyproject.toml`, or a `pyproject.toml` with no `[build-system]`)
//! and PEP 517 (`build-system.build-backend` names an importable object implementing the
//! hook protocol). Both are invoked against whatever interpreter the caller hands in --
//! constructing an isolated build environment per package is the Environment Closure's
//! job (it already knows how to resolve one), not this module's.

use crate::prelude::*;
use std::path::Path;
use std::process::Command;

/// `setup.py egg_info`: the legacy way to get a `PKG-INFO` out of a project with no
/// declarative build metadata at all. Runs against `python`, in `sdist_root`, and
/// returns the directory that now contains `PKG-INFO` (normally `{name}.egg-info/`).
pub fn run_egg_info(python: &str, sdist_root: &Path) -> Result<std::path::PathBuf> {
    context!("running setup.py egg_info in {}", sdist_root.display());

    let status = Command::new(python)
        .arg("setup.py")
        .arg("egg_info")
        .current_dir(sdist_root)
        .status()
        .with_context(|| format!("failed to launch {python} setup.py egg_info"))?;
    if !status.success() {
        bail!("{python} setup.py egg_info exited with {status}");
    }

    for entry in std::fs::read_dir(sdist_root)? {
        let entry = entry?;
        if entry.path().join("PKG-INFO").is_file() {
            return Ok(entry.path());
        }
    }
    bail!("setup.py egg_info didn't produce a *.egg-info/PKG-INFO");
}

/// The minimal PEP 517 `prepare_metadata_for_build_wheel` hook call, run as a one-liner
/// against `python`. Returns the path to the `.dist-info` directory it wrote inside
/// `out_dir`.
pub fn run_prepare_metadata(
    python: &str,
    sdist_root: &Path,
    build_backend: &str,
    backend_path: &[String],
    out_dir: &Path,
) -> Result<std::path::PathBuf> {
    context!("invoking {build_backend}.prepare_metadata_for_build_wheel");

    std::fs::create_dir_all(out_dir)?;
    let (module, colon_obj) = build_backend
        .split_once(':')
        .map(|(m, o)| (m, Some(o)))
        .unwrap_or((build_backend, None));
    let getter = match colon_obj {
        Some(obj) => format!("getattr(__import__({module:?}, fromlist=['']), {obj:?})"),
        None => format!("__import__({module:?}, fromlist=[''])"),
    };

    let mut sys_path_prefix = String::new();
    for p in backend_path {
        sys_path_prefix += &format!("sys.path.insert(0, {p:?})\n");
    }

    let script = format!(
        "import sys\n{sys_path_prefix}backend = {getter}\n\
         out = backend.prepare_metadata_for_build_wheel({out:?})\n\
         print(out)\n",
        out = out_dir.to_string_lossy(),
    );

    let output = Command::new(python)
        .arg("-c")
        .arg(&script)
        .current_dir(sdist_root)
        .output()
        .with_context(|| format!("failed to launch {python} -c <hook script>"))?;
    if !output.status.success() {
        bail!(
            "{build_backend}.prepare_metadata_for_build_wheel failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let dist_info = String::from_utf8(output.stdout)
        .context("non-utf8 output from build backend")?
        .trim()
        .to_owned();
    Ok(out_dir.join(dist_info))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_module_colon_object_split() {
        let (module, obj) = "setuptools.build_meta:__legacy__".split_once(':').unwrap();
        assert_eq!(module, "setuptools.build_meta");
        assert_eq!(obj, "__legacy__");
    }
}
