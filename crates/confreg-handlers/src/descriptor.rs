//! Handler descriptor files
//!
//! Each package ships `<package>.info` in the info directory. The file holds
//! stanzas separated by blank lines; every stanza is a list of `Field: value`
//! lines. Repeated fields accumulate, and lines starting with whitespace
//! continue the previous field with another value.
//!
//! ```text
//! Type: file
//! File: etc/hosts
//! Variables: hostname
//! Variables: domainname
//! Mode: 0644
//!
//! Type: script
//! Script: restart-dns
//! Variables: dns/.*
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Raw fields of one stanza.
pub type Stanza = BTreeMap<String, Vec<String>>;

/// Kind of an indexed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    File,
    Multifile,
    Module,
    Script,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [Self::File, Self::Multifile, Self::Module, Self::Script];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "multifile" => Some(Self::Multifile),
            "module" => Some(Self::Module),
            "script" => Some(Self::Script),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Multifile => "multifile",
            Self::Module => "module",
            Self::Script => "script",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership and mode applied to generated files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub mode: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl Permissions {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && self.user.is_none() && self.group.is_none()
    }
}

/// Options shared by `file` and `multifile` stanzas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOptions {
    pub preinst: Option<String>,
    pub postinst: Option<String>,
    pub variables: Vec<String>,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorEntry {
    File { file: String, options: FileOptions },
    Multifile { multifile: String, options: FileOptions },
    Subfile {
        multifile: String,
        subfile: String,
        variables: Vec<String>,
    },
    Script { script: String, variables: Vec<String> },
    Module { module: String, variables: Vec<String> },
}

/// One usable stanza and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub package: String,
    pub stanza: usize,
    pub entry: DescriptorEntry,
}

/// Read `<info_dir>/<package>.info`.
pub fn read_descriptor_file(path: &Path) -> Result<Vec<Descriptor>> {
    let text = std::fs::read_to_string(path)?;
    let package = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_descriptors(&package, path, &text)
}

/// Parse descriptor text. Stanzas with an unknown `Type` or missing required
/// fields are skipped with a warning.
pub fn parse_descriptors(package: &str, path: &Path, text: &str) -> Result<Vec<Descriptor>> {
    let stanzas = parse_stanzas(path, text)?;
    let mut descriptors = Vec::with_capacity(stanzas.len());
    for (index, stanza) in stanzas.iter().enumerate() {
        match entry_from_stanza(stanza) {
            Some(entry) => descriptors.push(Descriptor {
                package: package.to_string(),
                stanza: index,
                entry,
            }),
            None => tracing::warn!(
                path = %path.display(),
                stanza = index,
                "Skipping descriptor stanza with unknown type or missing fields"
            ),
        }
    }
    Ok(descriptors)
}

pub fn parse_stanzas(path: &Path, text: &str) -> Result<Vec<Stanza>> {
    let mut stanzas = Vec::new();
    let mut current = Stanza::new();
    let mut last_field: Option<String> = None;

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(std::mem::take(&mut current));
            }
            last_field = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            let Some(field) = &last_field else {
                return Err(parse_error(path, index, "continuation line without a field"));
            };
            current
                .entry(field.clone())
                .or_default()
                .push(line.trim().to_string());
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            return Err(parse_error(path, index, "expected 'Field: value'"));
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(parse_error(path, index, "empty field name"));
        }
        let values = current.entry(field.to_string()).or_default();
        let value = value.trim();
        if !value.is_empty() {
            values.push(value.to_string());
        }
        last_field = Some(field.to_string());
    }

    if !current.is_empty() {
        stanzas.push(current);
    }
    Ok(stanzas)
}

fn parse_error(path: &Path, index: usize, message: &str) -> Error {
    Error::DescriptorParse {
        path: path.to_path_buf(),
        line: index + 1,
        message: message.to_string(),
    }
}

fn first(stanza: &Stanza, field: &str) -> Option<String> {
    stanza.get(field).and_then(|values| values.first()).cloned()
}

fn all(stanza: &Stanza, field: &str) -> Vec<String> {
    stanza.get(field).cloned().unwrap_or_default()
}

fn file_options(stanza: &Stanza) -> FileOptions {
    let mode = first(stanza, "Mode").and_then(|mode| match u32::from_str_radix(&mode, 8) {
        Ok(mode) => Some(mode),
        Err(_) => {
            tracing::warn!(mode = %mode, "Ignoring invalid octal mode");
            None
        }
    });
    FileOptions {
        preinst: first(stanza, "Preinst"),
        postinst: first(stanza, "Postinst"),
        variables: all(stanza, "Variables"),
        permissions: Permissions {
            mode,
            user: first(stanza, "User"),
            group: first(stanza, "Group"),
        },
    }
}

fn entry_from_stanza(stanza: &Stanza) -> Option<DescriptorEntry> {
    let kind = first(stanza, "Type")?;
    match kind.as_str() {
        "file" => Some(DescriptorEntry::File {
            file: first(stanza, "File")?,
            options: file_options(stanza),
        }),
        "multifile" => Some(DescriptorEntry::Multifile {
            multifile: first(stanza, "Multifile")?,
            options: file_options(stanza),
        }),
        "subfile" => Some(DescriptorEntry::Subfile {
            multifile: first(stanza, "Multifile")?,
            subfile: first(stanza, "Subfile")?,
            variables: all(stanza, "Variables"),
        }),
        "script" => Some(DescriptorEntry::Script {
            script: first(stanza, "Script")?,
            variables: non_empty(all(stanza, "Variables"))?,
        }),
        "module" => {
            let module = first(stanza, "Module")?;
            let module = module
                .rsplit_once('.')
                .map_or(module.as_str(), |(stem, _)| stem)
                .to_string();
            Some(DescriptorEntry::Module {
                module,
                variables: non_empty(all(stanza, "Variables"))?,
            })
        }
        _ => None,
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Vec<Descriptor> {
        parse_descriptors("pkg", Path::new("pkg.info"), text).unwrap()
    }

    #[test]
    fn stanzas_split_on_blank_lines_and_accumulate_fields() {
        let text = "# comment\nType: file\nFile: etc/hosts\nVariables: a\nVariables: b\n\n\nType: module\nModule: thing.py\nVariables:\n  x\n  y\n";
        let stanzas = parse_stanzas(Path::new("t.info"), text).unwrap();
        assert_eq!(stanzas.len(), 2);
        assert_eq!(stanzas[0]["Variables"], vec!["a", "b"]);
        assert_eq!(stanzas[1]["Variables"], vec!["x", "y"]);
    }

    #[test]
    fn file_stanza_with_permissions() {
        let descriptors =
            parse("Type: file\nFile: etc/motd\nMode: 0640\nUser: root\nPreinst: pre\nVariables: motd/.*\n");
        assert_eq!(
            descriptors[0].entry,
            DescriptorEntry::File {
                file: "etc/motd".into(),
                options: FileOptions {
                    preinst: Some("pre".into()),
                    postinst: None,
                    variables: vec!["motd/.*".into()],
                    permissions: Permissions {
                        mode: Some(0o640),
                        user: Some("root".into()),
                        group: None,
                    },
                },
            }
        );
    }

    #[test]
    fn module_name_drops_extension() {
        let descriptors = parse("Type: module\nModule: dns_update.py\nVariables: dns/.*\n");
        assert_eq!(
            descriptors[0].entry,
            DescriptorEntry::Module {
                module: "dns_update".into(),
                variables: vec!["dns/.*".into()],
            }
        );
    }

    #[test]
    fn incomplete_and_unknown_stanzas_are_skipped() {
        let text = "Type: script\nScript: no-variables\n\nType: carrier-pigeon\n\nFile: typeless\n\nType: subfile\nMultifile: etc/x\nSubfile: etc/x.d/10\n";
        let descriptors = parse(text);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].stanza, 3);
    }

    #[test]
    fn invalid_mode_is_ignored() {
        let descriptors = parse("Type: file\nFile: etc/a\nMode: rwxr\n");
        match &descriptors[0].entry {
            DescriptorEntry::File { options, .. } => assert_eq!(options.permissions.mode, None),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_descriptors("pkg", Path::new("pkg.info"), "Type: file\njunk\n").unwrap_err();
        assert!(matches!(err, Error::DescriptorParse { line: 2, .. }));
    }

    #[test]
    fn continuation_without_field_is_an_error() {
        let err = parse_stanzas(Path::new("x.info"), "  floating\n").unwrap_err();
        assert!(matches!(err, Error::DescriptorParse { line: 1, .. }));
    }

    #[test]
    fn handler_kind_round_trips_through_name() {
        for kind in HandlerKind::ALL {
            assert_eq!(HandlerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(HandlerKind::parse("subfile"), None);
    }
}
