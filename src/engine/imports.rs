//! Import collision handling.

use crate::context::RunContext;
use crate::engine::PatchError;
use crate::fragment::CodeFragment;
use crate::source::{ImportBinding, ImportCheck, ImportSet};
use std::path::Path;

/// Decide how each package of `fragment` is brought into scope.
///
/// An import already present is reused, a package imported under another
/// name is adopted, and a name taken by something else is renamed once.
/// The fragment is retargeted at the final alias. Returns the `use`
/// bindings that still have to be inserted.
pub(crate) fn resolve_imports(
    path: &Path,
    existing: &ImportSet,
    fragment: &mut CodeFragment,
    ctx: &mut RunContext,
) -> Result<Vec<ImportBinding>, PatchError> {
    let mut scope = existing.clone();
    let mut inserts = Vec::new();

    let packages: Vec<(String, String, String)> = fragment
        .packages()
        .map(|(key, p)| (key.to_string(), p.alias.clone(), p.path.clone()))
        .collect();

    for (key, wanted, package) in packages {
        let alias = match scope.check(&wanted, &package) {
            ImportCheck::AlreadyPresent => continue,
            ImportCheck::PresentUnderAlias(existing) => {
                tracing::debug!("{}: reusing `{existing}` for {package}", path.display());
                existing
            }
            ImportCheck::AliasTaken { path: taken } => {
                let renamed = format!("{wanted}_{}", ctx.rename_suffix());
                tracing::debug!(
                    "{}: `{wanted}` already names {taken}, importing {package} as `{renamed}`",
                    path.display()
                );
                renamed
            }
            ImportCheck::Absent => wanted.clone(),
        };

        match scope.check(&alias, &package) {
            ImportCheck::AlreadyPresent => {}
            ImportCheck::Absent => {
                let binding = ImportBinding::new(&alias, &package);
                scope.push(binding.clone());
                inserts.push(binding);
            }
            ImportCheck::PresentUnderAlias(_) | ImportCheck::AliasTaken { .. } => {
                return Err(PatchError::ImportConflict {
                    path: path.to_path_buf(),
                    alias,
                    package,
                });
            }
        }

        if alias != wanted {
            fragment.retarget(&key, &alias);
        }
    }

    Ok(inserts)
}
