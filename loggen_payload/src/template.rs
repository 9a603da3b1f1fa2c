//! Named output templates for one log family.
//!
//! Templates are grouped in YAML files, one file per group:
//!
//! ```yaml
//! template: "<default body>"
//! formats:
//!   <group>.<sub>: "<body>"
//! ```
//!
//! A format name `group.sub` is resolved by loading `group.yaml` and looking
//! up `group.sub` exactly. A bare `group` falls back to the file's default
//! template. Groups found in the operator's template directory are consulted
//! before the built-in set compiled into this crate.
//!
//! Rendering is strict: a template referencing a field the bound data does
//! not carry fails to render.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior, Value};
use rust_embed::RustEmbed;
use serde::Deserialize;
use tracing::debug;

use crate::{sequence::SequenceState, timestamp};

#[derive(RustEmbed)]
#[folder = "templates/"]
struct Builtin;

const GROUP_EXTENSION: &str = "yaml";

/// Errors related to templates
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Template directory could not be read
    #[error("Unable to read template directory {path}: {source}")]
    Io {
        /// Directory or file being read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// A group file is not valid YAML or has the wrong shape
    #[error("Template group {path} is malformed: {source}")]
    Group {
        /// Group file
        path: String,
        /// Underlying parse error
        source: serde_yaml::Error,
    },
    /// A group file is not UTF-8
    #[error("Template group {0} is not valid UTF-8")]
    Utf8(String),
    /// A named format does not belong to the group that declares it
    #[error("Format {format} is declared in group {group} but does not start with '{group}.'")]
    Misnamed {
        /// Declaring group
        group: String,
        /// Offending format name
        format: String,
    },
    /// A template body failed to compile
    #[error("Template for format {format} failed to compile: {source}")]
    Compile {
        /// Format being compiled
        format: String,
        /// Underlying template error
        source: minijinja::Error,
    },
    /// No source declares the format
    #[error("Could not find format {0:?}")]
    NotFound(String),
    /// Rendering failed, usually a missing field
    #[error("Format {format} failed to render: {source}")]
    Render {
        /// Format being rendered
        format: String,
        /// Underlying template error
        source: minijinja::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupFile {
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    formats: BTreeMap<String, String>,
}

/// Where in the environment each format of a group lives.
#[derive(Debug, Default)]
struct Group {
    default: Option<String>,
    formats: BTreeMap<String, String>,
}

#[derive(Debug)]
struct Source {
    groups: BTreeMap<String, Group>,
}

impl Source {
    fn lookup(&self, format: &str) -> Option<&str> {
        let (group, structured) = match format.split_once('.') {
            Some((group, _)) => (group, true),
            None => (format, false),
        };
        let group = self.groups.get(group)?;
        if let Some(name) = group.formats.get(format) {
            return Some(name);
        }
        if structured {
            None
        } else {
            group.default.as_deref()
        }
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flat_map(|(name, group)| {
            group
                .default
                .as_ref()
                .map(|_| name.as_str())
                .into_iter()
                .chain(group.formats.keys().map(String::as_str))
        })
    }
}

/// All templates for one log family, compiled up front.
#[derive(Debug)]
pub struct TemplateStore {
    kind: String,
    env: Environment<'static>,
    sources: Vec<Source>,
}

impl TemplateStore {
    /// Load the templates of family `kind`.
    ///
    /// When `template_dir` is set, groups under `<template_dir>/<kind>/` are
    /// loaded first and shadow built-in groups of the same format name.
    ///
    /// # Errors
    ///
    /// Fails if the template directory cannot be read or any group is
    /// malformed or does not compile.
    pub fn load(
        kind: &str,
        template_dir: Option<&Path>,
        sequences: Arc<SequenceState>,
    ) -> Result<Self, Error> {
        let mut store = Self {
            kind: kind.to_string(),
            env: environment(sequences),
            sources: Vec::with_capacity(2),
        };

        if let Some(dir) = template_dir {
            let groups = read_dir_groups(&dir.join(kind))?;
            store.add_source(groups)?;
        }

        let prefix = format!("{kind}/");
        let mut builtin = Vec::new();
        for path in Builtin::iter() {
            let Some(file) = path.strip_prefix(&prefix) else {
                continue;
            };
            let Some(group) = file.strip_suffix(".yaml") else {
                continue;
            };
            let Some(embedded) = Builtin::get(&path) else {
                continue;
            };
            let body = std::str::from_utf8(embedded.data.as_ref())
                .map_err(|_| Error::Utf8(path.to_string()))?;
            builtin.push((group.to_string(), path.to_string(), body.to_string()));
        }
        store.add_source(builtin)?;

        debug!(
            kind = %store.kind,
            formats = store.format_names().len(),
            "loaded templates"
        );
        Ok(store)
    }

    /// Load only from in-memory groups, `(group, body)` pairs. Used for
    /// families assembled at runtime and in tests.
    ///
    /// # Errors
    ///
    /// Fails if any group is malformed or does not compile.
    pub fn from_groups<I>(kind: &str, groups: I, sequences: Arc<SequenceState>) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut store = Self {
            kind: kind.to_string(),
            env: environment(sequences),
            sources: Vec::with_capacity(1),
        };
        let groups = groups
            .into_iter()
            .map(|(group, body)| {
                let path = format!("{kind}/{group}.{GROUP_EXTENSION}");
                (group, path, body)
            })
            .collect();
        store.add_source(groups)?;
        Ok(store)
    }

    fn add_source(&mut self, files: Vec<(String, String, String)>) -> Result<(), Error> {
        let index = self.sources.len();
        let mut groups = BTreeMap::new();
        for (group_name, path, body) in files {
            let file: GroupFile = serde_yaml::from_str(&body).map_err(|source| Error::Group {
                path: path.clone(),
                source,
            })?;
            let mut group = Group::default();
            if let Some(body) = file.template {
                let name = format!("{index}:{group_name}");
                self.compile(&group_name, &name, body)?;
                group.default = Some(name);
            }
            for (format, body) in file.formats {
                let belongs = format
                    .strip_prefix(group_name.as_str())
                    .is_some_and(|rest| rest.starts_with('.'));
                if !belongs {
                    return Err(Error::Misnamed {
                        group: group_name.clone(),
                        format,
                    });
                }
                let name = format!("{index}:{format}");
                self.compile(&format, &name, body)?;
                group.formats.insert(format, name);
            }
            groups.insert(group_name, group);
        }
        self.sources.push(Source { groups });
        Ok(())
    }

    fn compile(&mut self, format: &str, name: &str, body: String) -> Result<(), Error> {
        self.env
            .add_template_owned(name.to_string(), body)
            .map_err(|source| Error::Compile {
                format: format.to_string(),
                source,
            })
    }

    /// The family these templates belong to.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Every format declared by any source, sorted and without duplicates.
    #[must_use]
    pub fn format_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.sources.iter().flat_map(Source::names).collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Whether `format` resolves to a template.
    #[must_use]
    pub fn contains(&self, format: &str) -> bool {
        self.resolve(format).is_ok()
    }

    fn resolve(&self, format: &str) -> Result<&str, Error> {
        self.sources
            .iter()
            .find_map(|source| source.lookup(format))
            .ok_or_else(|| Error::NotFound(format.to_string()))
    }

    /// Render `format` against `context`. A single trailing newline is
    /// dropped from the output.
    ///
    /// # Errors
    ///
    /// Fails if the format is unknown or rendering fails.
    pub fn render(&self, format: &str, context: &Value) -> Result<String, Error> {
        let name = self.resolve(format)?;
        let render_error = |source| Error::Render {
            format: format.to_string(),
            source,
        };
        let template = self.env.get_template(name).map_err(render_error)?;
        let mut text = template.render(context).map_err(render_error)?;
        if text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }
}

fn read_dir_groups(dir: &Path) -> Result<Vec<(String, String, String)>, Error> {
    let io_error = |source| Error::Io {
        path: dir.to_path_buf(),
        source,
    };
    if !dir.exists() {
        debug!(dir = %dir.display(), "no operator templates for family");
        return Ok(Vec::new());
    }

    let mut groups = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(GROUP_EXTENSION) {
            continue;
        }
        let Some(group) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let body = fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        groups.push((group.to_string(), path.display().to_string(), body));
    }
    groups.sort();
    Ok(groups)
}

fn environment(sequences: Arc<SequenceState>) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);

    let seq = Arc::clone(&sequences);
    env.add_function("monoton_seq", move |name: &str, start: u64| {
        seq.next(name, start)
    });
    env.add_function(
        "monoton_seq_gap",
        move |name: &str, start: u64, rate: u32, gap: u32| {
            sequences.next_gapped(&mut rand::rng(), name, start, rate, gap)
        },
    );
    env.add_filter("date_format", date_format);
    env
}

fn date_format(timestamp: i64, description: &str) -> Result<String, minijinja::Error> {
    timestamp::format_nanos(timestamp, description)
        .map_err(|err| minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use minijinja::context;

    use super::{Error, TemplateStore};
    use crate::sequence::SequenceState;

    fn store(groups: &[(&str, &str)]) -> Result<TemplateStore, Error> {
        TemplateStore::from_groups(
            "test",
            groups
                .iter()
                .map(|(g, b)| ((*g).to_string(), (*b).to_string())),
            Arc::new(SequenceState::new()),
        )
    }

    const SYSLOG: &str = r#"
template: "default {{ msg }}"
formats:
  syslog.rfc5424: "5424 {{ msg }}"
  syslog.rfc5424.sdata: "sdata {{ msg }}"
"#;

    #[test]
    fn resolution_rules() {
        let store = store(&[("syslog", SYSLOG)]).unwrap();
        let ctx = context! { msg => "hi" };

        assert_eq!(store.render("syslog", &ctx).unwrap(), "default hi");
        assert_eq!(store.render("syslog.rfc5424", &ctx).unwrap(), "5424 hi");
        assert_eq!(store.render("syslog.rfc5424.sdata", &ctx).unwrap(), "sdata hi");
        // A structured subformat never falls back to the default.
        assert!(matches!(
            store.render("syslog.nope", &ctx),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.render("web", &ctx), Err(Error::NotFound(_))));

        assert_eq!(
            store.format_names(),
            vec!["syslog", "syslog.rfc5424", "syslog.rfc5424.sdata"]
        );
    }

    #[test]
    fn group_without_default() {
        let store = store(&[("plain", "formats:\n  plain.one: \"1\"\n")]).unwrap();
        assert_eq!(store.format_names(), vec!["plain.one"]);
        assert!(!store.contains("plain"));
        assert!(store.contains("plain.one"));
    }

    #[test]
    fn missing_fields_are_errors() {
        let store = store(&[("syslog", SYSLOG)]).unwrap();
        let err = store.render("syslog", &context! { other => 1 }).unwrap_err();
        assert!(matches!(err, Error::Render { .. }));
    }

    #[test]
    fn misnamed_formats_are_rejected() {
        let err = store(&[("web", "formats:\n  nginx.x: \"x\"\n")]).unwrap_err();
        assert!(matches!(err, Error::Misnamed { .. }));
        // A shared prefix is not the group.
        let err = store(&[("web", "formats:\n  webby: \"x\"\n")]).unwrap_err();
        assert!(matches!(err, Error::Misnamed { .. }));
    }

    #[test]
    fn compile_errors_surface_at_load() {
        let err = store(&[("bad", "template: \"{{ unclosed \"\n")]).unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn trailing_newline_is_trimmed_and_nothing_is_escaped() {
        let store = store(&[("t", "template: \"<{{ v }}>\\n\"\n")]).unwrap();
        let out = store.render("t", &context! { v => "a&b" }).unwrap();
        assert_eq!(out, "<a&b>");
    }

    #[test]
    fn sequence_functions() {
        let body = r#"template: "{{ monoton_seq('s', 100) }} {{ monoton_seq_gap('g', 5, 0, 0) }}""#;
        let store = store(&[("seq", body)]).unwrap();
        let ctx = context! {};
        assert_eq!(store.render("seq", &ctx).unwrap(), "100 5");
        assert_eq!(store.render("seq", &ctx).unwrap(), "101 6");
        assert_eq!(store.render("seq", &ctx).unwrap(), "102 7");
    }

    #[test]
    fn date_format_filter() {
        let body = r#"template: "{{ ts | date_format('[year]/[month]/[day]') }}""#;
        let store = store(&[("d", body)]).unwrap();
        // 2011-06-25T20:00:04Z
        let out = store
            .render("d", &context! { ts => 1_309_032_004_000_000_000_i64 })
            .unwrap();
        assert_eq!(out, "2011/06/25");
    }

    #[test]
    fn builtin_families_load() {
        for kind in ["web", "syslog", "golang"] {
            let store = TemplateStore::load(kind, None, Arc::new(SequenceState::new())).unwrap();
            assert!(!store.format_names().is_empty(), "{kind} has no formats");
        }
    }

    #[test]
    fn template_dir_shadows_builtin() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("web")).unwrap();
        fs::write(
            dir.path().join("web").join("nginx.yaml"),
            "template: \"custom {{ code }}\"\nformats:\n  nginx.short: \"{{ code }}\"\n",
        )
        .unwrap();
        // Files with other extensions are ignored.
        fs::write(dir.path().join("web").join("README"), "not a template").unwrap();

        let store =
            TemplateStore::load("web", Some(dir.path()), Arc::new(SequenceState::new())).unwrap();
        let ctx = minijinja::Value::from_serialize(serde_json::json!({ "code": 200 }));
        assert_eq!(store.render("nginx", &ctx).unwrap(), "custom 200");
        assert_eq!(store.render("nginx.short", &ctx).unwrap(), "200");

        let names = store.format_names();
        assert!(names.contains(&"nginx.short".to_string()));
        assert!(names.contains(&"apache".to_string()));
    }

    #[test]
    fn missing_family_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            TemplateStore::load("syslog", Some(dir.path()), Arc::new(SequenceState::new()))
                .unwrap();
        assert!(store.contains("syslog"));
    }
}
