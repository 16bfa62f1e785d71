//! Module package installation
//!
//! Unpacks a ZIP module package into the modules directory and renders its
//! global-adapter compose file. Every entry name is checked before anything
//! is written. Files are extracted and rendered into hidden staging
//! directories next to their targets, which are renamed into place only once
//! the whole package has been staged, so a rejected package leaves the
//! previous install untouched.

use std::fs;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::module::registry::descriptor::{
    ModuleDescriptor, ADAPTER_COMPOSE_FILE, ADAPTER_TEMPLATE, DESCRIPTOR_FILE,
};
use crate::module::traits::ModuleError;
use crate::template::{AdapterDataSource, Template};
use crate::utils::fs::{ensure_dir, recreate_dir, write_file, DIR_MODE, FILE_MODE};

const SYMLINK_TYPE: u32 = 0o120000;
const FILE_TYPE_MASK: u32 = 0o170000;

fn package_error(package: &str, e: zip::result::ZipError) -> ModuleError {
    ModuleError::DescriptorMalformed {
        path: package.to_string(),
        reason: format!("unreadable package: {}", e),
    }
}

/// Normalize an archive entry name to a relative path, rejecting escapes
fn safe_entry_path(name: &str) -> Result<PathBuf, ModuleError> {
    let unsafe_path = || ModuleError::UnsafePath(name.to_string());
    if name.starts_with('/') || name.starts_with('\\') || name.contains('\0') {
        return Err(unsafe_path());
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path())
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(unsafe_path());
    }
    Ok(normalized)
}

/// `<dir>/.<name>.<suffix>`; discovery skips hidden entries
fn hidden_sibling(dir: &Path, name: &str, suffix: &str) -> PathBuf {
    dir.join(format!(".{}.{}", name, suffix))
}

fn remove_dir_if_exists(path: &Path) -> Result<(), ModuleError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ModuleError::io(path, "Failed to remove", e)),
    }
}

/// Replace `target` with the fully staged `stage`
///
/// The previous directory is parked beside the target and restored if the
/// final rename fails.
fn swap_in(stage: &Path, target: &Path) -> Result<(), ModuleError> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let previous = hidden_sibling(parent, &name, "previous");
    remove_dir_if_exists(&previous)?;

    let had_previous = target.exists();
    if had_previous {
        debug!("Replacing existing install at {:?}", target);
        fs::rename(target, &previous)
            .map_err(|e| ModuleError::io(target, "Failed to move previous install aside", e))?;
    }
    if let Err(e) = fs::rename(stage, target) {
        if had_previous {
            if let Err(restore) = fs::rename(&previous, target) {
                warn!("Failed to restore {:?}: {}", target, restore);
            }
        }
        return Err(ModuleError::io(target, "Failed to move staged install into place", e));
    }
    if had_previous {
        remove_dir_if_exists(&previous)?;
    }
    Ok(())
}

/// Extract every entry into `module_stage` and render the global adapter
/// into `adapter_stage`; returns whether the package has an adapter
fn stage<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    origin: &str,
    descriptor: &ModuleDescriptor,
    entries: Vec<(usize, PathBuf, bool)>,
    module_stage: &Path,
    adapter_stage: &Path,
) -> Result<bool, ModuleError> {
    recreate_dir(module_stage, DIR_MODE)?;
    remove_dir_if_exists(adapter_stage)?;

    let mut adapter_template = None;
    for (index, relative, is_dir) in entries {
        let dest = module_stage.join(&relative);
        if is_dir {
            ensure_dir(&dest, DIR_MODE)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            ensure_dir(parent, DIR_MODE)?;
        }
        let mut entry = archive.by_index(index).map_err(|e| package_error(origin, e))?;
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| ModuleError::io(&dest, "Failed to extract", e))?;
        write_file(&dest, &contents, FILE_MODE)?;

        if relative == Path::new(ADAPTER_TEMPLATE) {
            adapter_template = Some(contents);
        }
    }

    let Some(source) = adapter_template else {
        return Ok(false);
    };
    render_global_adapter(descriptor, &source, adapter_stage)?;
    Ok(true)
}

/// Render `adapter.tmpl` in global mode to `<dir>/adapter.yml`
fn render_global_adapter(
    descriptor: &ModuleDescriptor,
    source: &[u8],
    dir: &Path,
) -> Result<PathBuf, ModuleError> {
    let source = String::from_utf8_lossy(source);
    let template = Template::parse(&format!("{}/{}", descriptor.name, ADAPTER_TEMPLATE), &source)?;
    let data = AdapterDataSource::global(&descriptor.global_adapter_container());

    ensure_dir(dir, DIR_MODE)?;
    let dest = dir.join(ADAPTER_COMPOSE_FILE);
    template.render_to_file(&data, &dest)?;
    debug!("Rendered global adapter compose file {:?}", dest);
    Ok(dest)
}

/// Module package installer
pub struct ModuleInstaller {
    modules_dir: PathBuf,
    global_adapter_root: PathBuf,
}

impl ModuleInstaller {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(modules_dir: P, global_adapter_root: Q) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
            global_adapter_root: global_adapter_root.as_ref().to_path_buf(),
        }
    }

    /// Install a package file; an existing install of the same module is replaced
    pub fn install(&self, package: &Path) -> Result<ModuleDescriptor, ModuleError> {
        let file = fs::File::open(package)
            .map_err(|e| ModuleError::io(package, "Failed to open module package", e))?;
        self.install_from(file, &package.display().to_string())
    }

    /// Install from any seekable ZIP stream; `origin` names it in errors
    pub fn install_from<R: Read + Seek>(
        &self,
        reader: R,
        origin: &str,
    ) -> Result<ModuleDescriptor, ModuleError> {
        let mut archive = ZipArchive::new(reader).map_err(|e| package_error(origin, e))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(|e| package_error(origin, e))?;
            let relative = safe_entry_path(entry.name())?;
            if entry.enclosed_name().is_none() {
                return Err(ModuleError::UnsafePath(entry.name().to_string()));
            }
            if entry
                .unix_mode()
                .is_some_and(|mode| mode & FILE_TYPE_MASK == SYMLINK_TYPE)
            {
                return Err(ModuleError::UnsafePath(format!(
                    "{} (symbolic link)",
                    entry.name()
                )));
            }
            entries.push((index, relative, entry.is_dir()));
        }

        let descriptor = {
            let mut entry = archive.by_name(DESCRIPTOR_FILE).map_err(|_| {
                ModuleError::DescriptorMalformed {
                    path: origin.to_string(),
                    reason: format!("package has no top-level {}", DESCRIPTOR_FILE),
                }
            })?;
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| ModuleError::io(origin, "Failed to read descriptor from", e))?;
            ModuleDescriptor::from_slice(&bytes, &format!("{}:{}", origin, DESCRIPTOR_FILE))?
        };

        let name = descriptor.name.as_str();
        info!(
            "Installing module {} into {:?}",
            descriptor.fqmn(),
            self.modules_dir.join(name)
        );
        ensure_dir(&self.modules_dir, DIR_MODE)?;
        ensure_dir(&self.global_adapter_root, DIR_MODE)?;

        let module_stage = hidden_sibling(&self.modules_dir, name, "staging");
        let adapter_stage = hidden_sibling(&self.global_adapter_root, name, "staging");
        let staged = stage(
            &mut archive,
            origin,
            &descriptor,
            entries,
            &module_stage,
            &adapter_stage,
        );
        let has_adapter = match staged {
            Ok(has_adapter) => has_adapter,
            Err(e) => {
                remove_dir_if_exists(&module_stage)?;
                remove_dir_if_exists(&adapter_stage)?;
                return Err(e);
            }
        };

        swap_in(&module_stage, &self.modules_dir.join(name))?;
        let adapter_dir = self.global_adapter_root.join(name);
        if has_adapter {
            swap_in(&adapter_stage, &adapter_dir)?;
        } else {
            remove_dir_if_exists(&adapter_dir)?;
        }

        info!("Installed module {} {}", descriptor.fqmn(), descriptor.version);
        Ok(descriptor)
    }

    /// Remove a module's directory and its global-adapter directory
    pub fn uninstall(&self, name: &str) -> Result<(), ModuleError> {
        safe_entry_path(name)?;
        let target = self.modules_dir.join(name);
        if !target.is_dir() {
            return Err(ModuleError::ModuleNotInstalled(name.to_string()));
        }
        info!("Uninstalling module {}", name);
        fs::remove_dir_all(&target)
            .map_err(|e| ModuleError::io(&target, "Failed to remove module", e))?;

        remove_dir_if_exists(&self.global_adapter_root.join(name))
    }
}
