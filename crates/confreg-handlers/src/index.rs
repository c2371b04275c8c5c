//! Pattern index over the handler descriptor corpus
//!
//! The index is built by scanning every `*.info` file in the info directory
//! and cached as JSON together with a fingerprint of the info, files and
//! scripts directories. A cache whose version or fingerprint does not match
//! is rebuilt; deleting the cache file only costs a rebuild.

use crate::descriptor::{Descriptor, DescriptorEntry, FileOptions, HandlerKind, Permissions, read_descriptor_file};
use crate::error::{Error, Result};
use crate::pattern::{PatternSet, PatternSpec};
use crate::template;
use confreg_core::Settings;
use confreg_fs::checksum::compute_tree_fingerprint;
use confreg_fs::ConfigStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CACHE_VERSION: u32 = 1;

/// One runnable handler assembled from one or more descriptor stanzas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    pub id: String,
    pub kind: HandlerKind,
    /// Generated path for file handlers, script path relative to the
    /// scripts directory, or module name.
    pub target: String,
    /// Templates read by file handlers, or the script to execute.
    pub sources: Vec<PathBuf>,
    pub patterns: Vec<PatternSpec>,
    pub preinst: Option<String>,
    pub postinst: Option<String>,
    pub permissions: Permissions,
    /// Packages that declared or contributed to this handler.
    pub packages: Vec<String>,
    /// Number of multifile stanzas declaring this target.
    pub definitions: usize,
    /// Declaration order across the corpus.
    pub order: usize,
}

impl Handler {
    fn new(kind: HandlerKind, target: &str, package: &str, order: usize) -> Self {
        Self {
            id: format!("{kind}:{target}"),
            kind,
            target: target.to_string(),
            sources: Vec::new(),
            patterns: Vec::new(),
            preinst: None,
            postinst: None,
            permissions: Permissions::default(),
            packages: vec![package.to_string()],
            definitions: 1,
            order,
        }
    }

    /// Whether this handler writes a file below the target root.
    pub fn generates_file(&self) -> bool {
        matches!(self.kind, HandlerKind::File | HandlerKind::Multifile)
    }

    fn add_patterns<'a>(&mut self, raw: impl IntoIterator<Item = &'a String>) {
        for raw in raw {
            let spec = PatternSpec::parse(raw);
            if let Err(e) = spec.validate() {
                tracing::warn!(handler = %self.id, error = %e, "Ignoring invalid pattern");
                continue;
            }
            if !self.patterns.contains(&spec) {
                self.patterns.push(spec);
            }
        }
    }

    fn add_package(&mut self, package: &str) {
        if !self.packages.iter().any(|p| p == package) {
            self.packages.push(package.to_string());
        }
    }

    fn apply_options(&mut self, options: &FileOptions) {
        if options.preinst.is_some() {
            self.preinst.clone_from(&options.preinst);
        }
        if options.postinst.is_some() {
            self.postinst.clone_from(&options.postinst);
        }
        let perms = &options.permissions;
        if perms.mode.is_some() {
            self.permissions.mode = perms.mode;
        }
        if perms.user.is_some() {
            self.permissions.user.clone_from(&perms.user);
        }
        if perms.group.is_some() {
            self.permissions.group.clone_from(&perms.group);
        }
        self.add_patterns(&options.variables);
    }
}

/// A handler with its compiled patterns.
#[derive(Debug, Clone)]
pub struct IndexedHandler {
    handler: Handler,
    patterns: PatternSet,
}

impl IndexedHandler {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn matches(&self, key: &str) -> bool {
        self.patterns.is_match(key)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    token: String,
    handlers: Vec<Handler>,
}

#[derive(Debug, Clone)]
pub struct HandlerIndex {
    token: String,
    entries: Vec<IndexedHandler>,
}

impl HandlerIndex {
    /// Fingerprint of the descriptor corpus.
    pub fn corpus_token(settings: &Settings) -> Result<String> {
        let info = settings.info_dir();
        let files = settings.files_dir();
        let scripts = settings.scripts_dir();
        Ok(compute_tree_fingerprint(&[info.as_path(), files.as_path(), scripts.as_path()])?)
    }

    /// Scan the corpus and write the cache.
    pub fn build(settings: &Settings) -> Result<Self> {
        let token = Self::corpus_token(settings)?;
        let handlers = scan(settings, None)?;
        save_cache(settings, &token, &handlers);
        Self::from_handlers(token, handlers, &settings.handler_order)
    }

    /// Scan the corpus as if `package` were not installed. The cache is not written.
    pub fn build_excluding(settings: &Settings, package: &str) -> Result<Self> {
        let token = Self::corpus_token(settings)?;
        let handlers = scan(settings, Some(package))?;
        Self::from_handlers(token, handlers, &settings.handler_order)
    }

    /// Use the cache when it is current, otherwise [`build`](Self::build).
    pub fn load_or_rebuild(settings: &Settings) -> Result<Self> {
        let token = Self::corpus_token(settings)?;
        match read_cache(&settings.cache_file, &token) {
            Ok(Some(handlers)) => match Self::from_handlers(token, handlers, &settings.handler_order) {
                Ok(index) => return Ok(index),
                Err(Error::UnknownHandlerKind { kind }) => {
                    return Err(Error::UnknownHandlerKind { kind });
                }
                Err(e) => tracing::warn!(error = %e, "Cached index does not compile, rebuilding"),
            },
            Ok(None) => tracing::debug!(cache = %settings.cache_file.display(), "Handler cache missing or stale"),
            Err(e) => tracing::warn!(error = %e, "Handler cache unreadable, rebuilding"),
        }
        Self::build(settings)
    }

    fn from_handlers(token: String, handlers: Vec<Handler>, order: &[String]) -> Result<Self> {
        let ranks = kind_ranks(order)?;
        let rank = |kind: HandlerKind| ranks.iter().position(|k| *k == kind).unwrap_or(ranks.len());

        let mut entries = handlers
            .into_iter()
            .map(|handler| {
                let patterns = PatternSet::compile(&handler.patterns)?;
                Ok(IndexedHandler { handler, patterns })
            })
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| (rank(entry.handler.kind), entry.handler.order));

        tracing::debug!(handlers = entries.len(), "Handler index ready");
        Ok(Self { token, entries })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All handlers in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexedHandler> {
        self.entries.iter()
    }

    /// Handlers with a pattern matching any of `keys`, in dispatch order,
    /// each listed once.
    pub fn matching<K: AsRef<str>>(&self, keys: &[K]) -> Vec<&IndexedHandler> {
        self.entries
            .iter()
            .filter(|entry| keys.iter().any(|key| entry.matches(key.as_ref())))
            .collect()
    }

    pub fn by_package(&self, package: &str) -> Vec<&IndexedHandler> {
        self.entries
            .iter()
            .filter(|entry| entry.handler.packages.iter().any(|p| p == package))
            .collect()
    }

    /// File and multifile handlers generating one of `targets`.
    ///
    /// Targets compare without a leading `/`, so `/etc/hosts` and `etc/hosts`
    /// name the same handler.
    pub fn by_targets<T: AsRef<str>>(&self, targets: &[T]) -> Vec<&IndexedHandler> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.handler.generates_file()
                    && targets
                        .iter()
                        .any(|t| normalize_target(t.as_ref()) == normalize_target(&entry.handler.target))
            })
            .collect()
    }
}

pub(crate) fn normalize_target(target: &str) -> &str {
    target.trim_start_matches('/')
}

fn kind_ranks(order: &[String]) -> Result<Vec<HandlerKind>> {
    order
        .iter()
        .map(|name| {
            HandlerKind::parse(name).ok_or_else(|| Error::UnknownHandlerKind { kind: name.clone() })
        })
        .collect()
}

fn read_cache(path: &Path, token: &str) -> Result<Option<Vec<Handler>>> {
    let Some(cache) = ConfigStore::new().load_if_exists::<CacheFile>(path)? else {
        return Ok(None);
    };
    if cache.version != CACHE_VERSION || cache.token != token {
        return Ok(None);
    }
    Ok(Some(cache.handlers))
}

fn save_cache(settings: &Settings, token: &str, handlers: &[Handler]) {
    let cache = CacheFile {
        version: CACHE_VERSION,
        token: token.to_string(),
        handlers: handlers.to_vec(),
    };
    let store = ConfigStore::with_robustness(settings.robustness());
    if let Err(e) = store.save(&settings.cache_file, &cache) {
        tracing::warn!(cache = %settings.cache_file.display(), error = %e, "Failed to write handler cache");
    }
}

/// Descriptor files in the info directory, sorted by path.
pub(crate) fn info_files(settings: &Settings) -> Result<Vec<PathBuf>> {
    let dir = settings.info_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "info") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn info_file(settings: &Settings, package: &str) -> PathBuf {
    settings.info_dir().join(format!("{package}.info"))
}

fn scan(settings: &Settings, exclude: Option<&str>) -> Result<Vec<Handler>> {
    let mut builder = Builder::new(settings);
    for path in info_files(settings)? {
        let package = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        if exclude == Some(package.as_str()) {
            continue;
        }
        match read_descriptor_file(&path) {
            Ok(descriptors) => {
                for descriptor in descriptors {
                    builder.add(descriptor);
                }
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping descriptor file"),
        }
    }
    Ok(builder.finish())
}

struct PendingSubfile {
    package: String,
    source: PathBuf,
    variables: Vec<String>,
}

struct Builder<'a> {
    settings: &'a Settings,
    handlers: Vec<Handler>,
    multifiles: HashMap<String, usize>,
    pending: HashMap<String, Vec<PendingSubfile>>,
}

impl<'a> Builder<'a> {
    fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            handlers: Vec::new(),
            multifiles: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    fn push(&mut self, handler: Handler) -> usize {
        self.handlers.push(handler);
        self.handlers.len() - 1
    }

    fn next_order(&self) -> usize {
        self.handlers.len()
    }

    fn add(&mut self, descriptor: Descriptor) {
        let Descriptor { package, entry, .. } = descriptor;
        match entry {
            DescriptorEntry::File { file, options } => {
                let source = self.settings.files_dir().join(&file);
                let mut handler = Handler::new(HandlerKind::File, &file, &package, self.next_order());
                if let Some(text) = read_template(&source) {
                    let vars: Vec<String> = template::referenced_variables(&text).into_iter().collect();
                    handler.add_patterns(&vars);
                }
                handler.sources.push(source);
                handler.apply_options(&options);
                self.push(handler);
            }
            DescriptorEntry::Multifile { multifile, options } => {
                let index = match self.multifiles.get(&multifile) {
                    Some(&index) => {
                        let handler = &mut self.handlers[index];
                        handler.definitions += 1;
                        handler.add_package(&package);
                        index
                    }
                    None => {
                        let handler =
                            Handler::new(HandlerKind::Multifile, &multifile, &package, self.next_order());
                        let index = self.push(handler);
                        self.multifiles.insert(multifile.clone(), index);
                        index
                    }
                };
                self.handlers[index].apply_options(&options);
                for subfile in self.pending.remove(&multifile).unwrap_or_default() {
                    attach_subfile(&mut self.handlers[index], subfile);
                }
            }
            DescriptorEntry::Subfile { multifile, subfile, mut variables } => {
                let source = self.settings.files_dir().join(&subfile);
                let Some(text) = read_template(&source) else {
                    tracing::warn!(subfile = %source.display(), "Skipping subfile without template");
                    return;
                };
                variables.extend(template::referenced_variables(&text));
                let pending = PendingSubfile {
                    package,
                    source,
                    variables,
                };
                match self.multifiles.get(&multifile) {
                    Some(&index) => attach_subfile(&mut self.handlers[index], pending),
                    None => self.pending.entry(multifile).or_default().push(pending),
                }
            }
            DescriptorEntry::Script { script, variables } => {
                let mut handler = Handler::new(HandlerKind::Script, &script, &package, self.next_order());
                handler.sources.push(self.settings.scripts_dir().join(&script));
                handler.add_patterns(&variables);
                self.push(handler);
            }
            DescriptorEntry::Module { module, variables } => {
                let mut handler = Handler::new(HandlerKind::Module, &module, &package, self.next_order());
                handler.add_patterns(&variables);
                self.push(handler);
            }
        }
    }

    fn finish(self) -> Vec<Handler> {
        for multifile in self.pending.keys() {
            tracing::debug!(multifile = %multifile, "Dropping subfiles without a multifile declaration");
        }
        self.handlers
    }
}

fn attach_subfile(handler: &mut Handler, subfile: PendingSubfile) {
    if !handler.sources.contains(&subfile.source) {
        handler.sources.push(subfile.source);
    }
    handler.add_patterns(&subfile.variables);
    handler.add_package(&subfile.package);
}

fn read_template(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read template");
            None
        }
    }
}
