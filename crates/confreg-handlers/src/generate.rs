//! File and multifile generation
//!
//! A file handler renders one template; a multifile handler renders its
//! subfile templates in file-name order and concatenates them. The result
//! replaces the target atomically, then mode and ownership are applied.

use crate::descriptor::HandlerKind;
use crate::error::{Error, Result};
use crate::index::{Handler, normalize_target};
use crate::module::{ModuleCalls, Phase};
use crate::script;
use crate::template;
use confreg_core::{Changes, Settings, Snapshot};
use confreg_fs::io;
use std::path::{Path, PathBuf};

/// Where `handler` writes below the target root.
pub fn target_path(settings: &Settings, handler: &Handler) -> PathBuf {
    settings.target_root.join(normalize_target(&handler.target))
}

/// Run a file or multifile handler through preinst, generation and postinst.
pub(crate) fn run_file_handler(
    settings: &Settings,
    modules: &ModuleCalls<'_>,
    handler: &Handler,
    snapshot: &Snapshot,
    changes: &Changes,
) -> Result<()> {
    if let Some(module) = &handler.preinst {
        modules.call(module, Phase::Preinst, snapshot, changes)?;
    }

    if !generate(settings, handler, snapshot)? {
        return Ok(());
    }

    if let Some(module) = &handler.postinst {
        modules.call(module, Phase::Postinst, snapshot, changes)?;
    }

    let hook = settings.scripts_dir().join(normalize_target(&handler.target));
    if hook.is_file() {
        script::run_script(&hook, "postinst", changes)?;
    }
    Ok(())
}

/// Render and write the target. Returns `false` when nothing was generated.
pub fn generate(settings: &Settings, handler: &Handler, snapshot: &Snapshot) -> Result<bool> {
    let Some(content) = render(handler, snapshot)? else {
        return Ok(false);
    };

    let target = target_path(settings, handler);
    io::write_atomic(&target, content.as_bytes(), settings.robustness())?;
    apply_permissions(handler, &target)?;

    tracing::info!(path = %target.display(), handler = %handler.id, "Generated file");
    Ok(true)
}

/// Render the handler's content, `None` for a multifile with nothing to write.
pub fn render(handler: &Handler, snapshot: &Snapshot) -> Result<Option<String>> {
    match handler.kind {
        HandlerKind::File => {
            let source = handler
                .sources
                .first()
                .ok_or_else(|| Error::handler_failed(&handler.id, "no template"))?;
            let text = std::fs::read_to_string(source).map_err(|e| {
                Error::handler_failed(&handler.id, format!("cannot read {}: {e}", source.display()))
            })?;
            let sources = vec![source.display().to_string()];
            Ok(Some(render_one(handler, &text, snapshot, &sources)))
        }
        HandlerKind::Multifile => {
            if handler.definitions == 0 || handler.sources.is_empty() {
                tracing::debug!(handler = %handler.id, "Multifile has no definition or subfiles");
                return Ok(None);
            }
            let mut subfiles: Vec<&PathBuf> = handler.sources.iter().collect();
            subfiles.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
            let sources: Vec<String> = subfiles.iter().map(|p| p.display().to_string()).collect();

            let mut content = String::new();
            for subfile in subfiles {
                match std::fs::read_to_string(subfile) {
                    Ok(text) => content.push_str(&render_one(handler, &text, snapshot, &sources)),
                    Err(e) => tracing::warn!(
                        subfile = %subfile.display(),
                        error = %e,
                        "Skipping unreadable subfile"
                    ),
                }
            }
            Ok(Some(content))
        }
        other => Err(Error::handler_failed(
            &handler.id,
            format!("{other} handlers do not generate files"),
        )),
    }
}

fn render_one(handler: &Handler, text: &str, snapshot: &Snapshot, sources: &[String]) -> String {
    if template::has_code_blocks(text) {
        tracing::warn!(handler = %handler.id, "Inline code blocks are not executed");
    }
    template::render(text, snapshot, sources)
}

#[cfg(unix)]
fn apply_permissions(handler: &Handler, target: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = match (handler.permissions.mode, handler.kind) {
        (Some(mode), _) => Some(mode),
        // A multifile has no single template; the target keeps its bits.
        (None, HandlerKind::File) => handler
            .sources
            .first()
            .and_then(|source| std::fs::metadata(source).ok())
            .map(|meta| meta.permissions().mode() & 0o7777),
        (None, _) => None,
    };
    if let Some(mode) = mode {
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(mode))?;
    }

    let uid = handler.permissions.user.as_deref().and_then(|name| {
        match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Some(user.uid),
            Ok(None) | Err(_) => {
                tracing::warn!(user = name, handler = %handler.id, "Unknown user, ownership unchanged");
                None
            }
        }
    });
    let gid = handler.permissions.group.as_deref().and_then(|name| {
        match nix::unistd::Group::from_name(name) {
            Ok(Some(group)) => Some(group.gid),
            Ok(None) | Err(_) => {
                tracing::warn!(group = name, handler = %handler.id, "Unknown group, ownership unchanged");
                None
            }
        }
    });
    if uid.is_some() || gid.is_some() {
        nix::unistd::chown(target, uid, gid)
            .map_err(|e| Error::handler_failed(&handler.id, format!("chown failed: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(handler: &Handler, _target: &Path) -> Result<()> {
    if !handler.permissions.is_empty() {
        tracing::debug!(handler = %handler.id, "Ownership and mode are not applied on this platform");
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::index::HandlerIndex;
    use crate::module::ModuleRegistry;
    use confreg_test_utils::TestRegistry;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    fn snapshot() -> Snapshot {
        [("hostname", "master"), ("mail/alias/root", "admin")]
            .into_iter()
            .collect()
    }

    fn only_handler(settings: &Settings) -> Handler {
        let index = HandlerIndex::build(settings).unwrap();
        index.iter().next().unwrap().handler().clone()
    }

    #[test]
    fn file_handler_writes_rendered_template() {
        let fixture = TestRegistry::new();
        fixture.write_template("etc/hostname", "@%@hostname@%@\n");
        fixture.write_info("base", "Type: file\nFile: etc/hostname\n");
        let settings = Settings::with_root(fixture.root());

        let handler = only_handler(&settings);
        assert!(generate(&settings, &handler, &snapshot()).unwrap());
        assert_eq!(fixture.read_target("etc/hostname"), "master\n");
    }

    #[test]
    fn descriptor_mode_wins_over_template_mode() {
        let fixture = TestRegistry::new();
        fixture.write_template("etc/secret", "x\n");
        fixture.write_info("base", "Type: file\nFile: etc/secret\nMode: 0600\n");
        let settings = Settings::with_root(fixture.root());

        generate(&settings, &only_handler(&settings), &snapshot()).unwrap();
        let mode = std::fs::metadata(fixture.target_dir().join("etc/secret"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_handler_copies_template_mode() {
        let fixture = TestRegistry::new();
        fixture.write_template("usr/bin/tool", "#!/bin/sh\n");
        let template = fixture.templates_dir().join("files/usr/bin/tool");
        std::fs::set_permissions(&template, std::fs::Permissions::from_mode(0o750)).unwrap();
        fixture.write_info("base", "Type: file\nFile: usr/bin/tool\n");
        let settings = Settings::with_root(fixture.root());

        generate(&settings, &only_handler(&settings), &snapshot()).unwrap();
        let mode = std::fs::metadata(fixture.target_dir().join("usr/bin/tool"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn multifile_concatenates_subfiles_by_name() {
        let fixture = TestRegistry::new();
        fixture.write_template("etc/aliases.d/20web", "web: www\n");
        fixture.write_template("etc/aliases.d/10root", "root: @%@mail/alias/root@%@\n");
        fixture.write_info(
            "mail",
            "Type: multifile\nMultifile: etc/aliases\n\nType: subfile\nMultifile: etc/aliases\nSubfile: etc/aliases.d/20web\n\nType: subfile\nMultifile: etc/aliases\nSubfile: etc/aliases.d/10root\n",
        );
        let settings = Settings::with_root(fixture.root());

        generate(&settings, &only_handler(&settings), &snapshot()).unwrap();
        assert_eq!(fixture.read_target("etc/aliases"), "root: admin\nweb: www\n");
    }

    #[test]
    fn multifile_without_subfiles_is_not_written() {
        let fixture = TestRegistry::new();
        fixture.write_info("mail", "Type: multifile\nMultifile: etc/empty\n");
        let settings = Settings::with_root(fixture.root());

        assert!(!generate(&settings, &only_handler(&settings), &snapshot()).unwrap());
        assert!(!fixture.target_exists("etc/empty"));
    }

    #[test]
    fn missing_template_fails_the_handler() {
        let fixture = TestRegistry::new();
        fixture.write_info("base", "Type: file\nFile: etc/ghost\n");
        let settings = Settings::with_root(fixture.root());

        let err = generate(&settings, &only_handler(&settings), &snapshot()).unwrap_err();
        assert!(matches!(err, Error::HandlerFailed { .. }));
    }

    #[test]
    fn target_named_script_runs_after_generation() {
        let fixture = TestRegistry::new();
        fixture.write_template("etc/hostname", "@%@hostname@%@\n");
        fixture.write_info("base", "Type: file\nFile: etc/hostname\n");
        let marker = fixture.root().join("ran");
        fixture.write_script(
            "etc/hostname",
            &format!("#!/bin/sh\necho \"$1\" > '{}'\n", marker.display()),
        );
        let settings = Settings::with_root(fixture.root());

        run_file_handler(
            &settings,
            &ModuleCalls::new(&ModuleRegistry::new()),
            &only_handler(&settings),
            &snapshot(),
            &Changes::new(),
        )
        .unwrap();
        assert_eq!(std::fs::read_to_string(marker).unwrap(), "postinst\n");
    }
}
