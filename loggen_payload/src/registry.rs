//! The format registry.
//!
//! Every log family is registered under its type name. Callers ask the
//! registry for an [`Event`] by `(type, format)`; the event renders to a
//! [`Record`] ready for a writer.

use std::{borrow::Cow, collections::BTreeMap, fmt, sync::Arc};

use minijinja::Value;

use crate::{
    Config, Options,
    family::{EventData, Synthesizer, golang::Golang, syslog::Syslog, web::Web},
    sequence::SequenceState,
    template::TemplateStore,
};

/// Errors related to type and format lookup
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No family is registered under the type
    #[error("Unsupported type {0:?}")]
    UnsupportedType(String),
    /// The family does not declare the format
    #[error("Unsupported format {format:?} for type {kind:?}")]
    UnsupportedFormat {
        /// Requested type
        kind: String,
        /// Requested format
        format: String,
    },
}

/// A log family: a set of formats and a way to make events in them.
pub trait Family: fmt::Debug + Send + Sync {
    /// The type name this family is registered under.
    fn kind(&self) -> &str;

    /// Every format this family can render, sorted.
    fn formats(&self) -> Vec<String>;

    /// Whether `format` is one of [`Family::formats`].
    fn supports(&self, format: &str) -> bool;

    /// Make one event in `format`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnsupportedFormat`] for unknown formats, or if the
    /// event data cannot be synthesized.
    fn create(&self, format: &str, options: &Options) -> Result<Event, crate::Error>;
}

/// A [`Family`] whose events are templates rendered over synthesized data.
#[derive(Debug)]
pub struct TemplateFamily<S> {
    synthesizer: S,
    templates: Arc<TemplateStore>,
}

impl<S> TemplateFamily<S>
where
    S: Synthesizer,
{
    /// Pair a synthesizer with its templates.
    #[must_use]
    pub fn new(synthesizer: S, templates: TemplateStore) -> Self {
        Self {
            synthesizer,
            templates: Arc::new(templates),
        }
    }
}

impl<S> Family for TemplateFamily<S>
where
    S: Synthesizer,
{
    fn kind(&self) -> &str {
        self.synthesizer.kind()
    }

    fn formats(&self) -> Vec<String> {
        self.templates.format_names()
    }

    fn supports(&self, format: &str) -> bool {
        self.templates.contains(format)
    }

    fn create(&self, format: &str, options: &Options) -> Result<Event, crate::Error> {
        if !self.supports(format) {
            return Err(Error::UnsupportedFormat {
                kind: self.kind().to_string(),
                format: format.to_string(),
            }
            .into());
        }
        let data = if options.randomise {
            self.synthesizer.random(&mut rand::rng(), options)?
        } else {
            self.synthesizer.sample()?
        };
        Ok(Event {
            kind: self.kind().to_string(),
            format: format.to_string(),
            severity: data.severity(),
            context: Value::from_serialize(&data),
            templates: Arc::clone(&self.templates),
            framed: options.framed,
        })
    }
}

/// One event, bound to its data and ready to render.
#[derive(Debug, Clone)]
pub struct Event {
    kind: String,
    format: String,
    severity: String,
    context: Value,
    templates: Arc<TemplateStore>,
    framed: bool,
}

impl Event {
    /// The event's type.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The event's format.
    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Render the event.
    ///
    /// # Errors
    ///
    /// Fails if the template references data the event does not carry, or
    /// a template function fails.
    pub fn render(&self) -> Result<Record, crate::Error> {
        let text = self.templates.render(&self.format, &self.context)?;
        Ok(Record {
            kind: self.kind.clone(),
            severity: self.severity.clone(),
            text,
            framed: self.framed,
        })
    }
}

/// A rendered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Event type, used as a metrics label
    pub kind: String,
    /// Event severity, used as a metrics label
    pub severity: String,
    /// Rendered text, without a trailing newline
    pub text: String,
    /// Whether the payload is length prefixed
    pub framed: bool,
}

impl Record {
    /// The bytes handed to a writer: the text, prefixed with its byte length
    /// and a space when framed.
    #[must_use]
    pub fn payload(&self) -> Cow<'_, str> {
        if self.framed {
            Cow::Owned(format!("{} {}", self.text.len(), self.text))
        } else {
            Cow::Borrowed(&self.text)
        }
    }
}

/// Every registered family, by type name.
#[derive(Debug, Default)]
pub struct Registry {
    families: BTreeMap<String, Box<dyn Family>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `web`, `syslog` and `golang` families.
    ///
    /// # Errors
    ///
    /// Fails if any family's templates fail to load.
    pub fn builtin(config: &Config, sequences: &Arc<SequenceState>) -> Result<Self, crate::Error> {
        let dir = config.template_dir.as_deref();
        let mut registry = Self::new();

        let web = Web::new(&config.web, config.max_number)?;
        let templates = TemplateStore::load(web.kind(), dir, Arc::clone(sequences))?;
        registry.register(Box::new(TemplateFamily::new(web, templates)));

        let syslog = Syslog::new(
            &config.syslog,
            config.seed,
            config.max_random_hosts,
            config.max_random_apps,
            config.max_number,
        );
        let templates = TemplateStore::load(syslog.kind(), dir, Arc::clone(sequences))?;
        registry.register(Box::new(TemplateFamily::new(syslog, templates)));

        let golang = Golang::new(&config.golang);
        let templates = TemplateStore::load(golang.kind(), dir, Arc::clone(sequences))?;
        registry.register(Box::new(TemplateFamily::new(golang, templates)));

        Ok(registry)
    }

    /// Register `family`, replacing any family of the same type.
    pub fn register(&mut self, family: Box<dyn Family>) {
        self.families.insert(family.kind().to_string(), family);
    }

    /// Every type and its formats.
    #[must_use]
    pub fn list_formats(&self) -> BTreeMap<String, Vec<String>> {
        self.families
            .iter()
            .map(|(kind, family)| (kind.clone(), family.formats()))
            .collect()
    }

    /// Check that `(kind, format)` names a registered format.
    ///
    /// # Errors
    ///
    /// Unknown types are reported before unknown formats.
    pub fn validate(&self, kind: &str, format: &str) -> Result<(), Error> {
        let family = self.family(kind)?;
        if family.supports(format) {
            Ok(())
        } else {
            Err(Error::UnsupportedFormat {
                kind: kind.to_string(),
                format: format.to_string(),
            })
        }
    }

    /// Make one event, sample or random.
    ///
    /// # Errors
    ///
    /// See [`Registry::create_with`].
    pub fn create(&self, kind: &str, format: &str, randomise: bool) -> Result<Event, crate::Error> {
        self.create_with(
            kind,
            format,
            &Options {
                randomise,
                ..Options::default()
            },
        )
    }

    /// Make one event with explicit options.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnsupportedType`] or [`Error::UnsupportedFormat`]
    /// for unknown names, or if data synthesis fails.
    pub fn create_with(
        &self,
        kind: &str,
        format: &str,
        options: &Options,
    ) -> Result<Event, crate::Error> {
        self.family(kind)?.create(format, options)
    }

    fn family(&self, kind: &str) -> Result<&dyn Family, Error> {
        self.families
            .get(kind)
            .map(|family| &**family)
            .ok_or_else(|| Error::UnsupportedType(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Error, Record, Registry, TemplateFamily};
    use crate::{
        Config, Options, SequenceState,
        family::syslog::Syslog,
        template::TemplateStore,
    };

    fn registry() -> Registry {
        Registry::builtin(&Config::default(), &Arc::new(SequenceState::new())).unwrap()
    }

    #[test]
    fn every_declared_format_renders() {
        let registry = registry();
        let formats = registry.list_formats();
        assert_eq!(
            formats.keys().collect::<Vec<_>>(),
            vec!["golang", "syslog", "web"]
        );

        for (kind, names) in formats {
            assert!(!names.is_empty(), "{kind} declares no formats");
            for format in names {
                for randomise in [false, true] {
                    let event = registry.create(&kind, &format, randomise).unwrap();
                    let record = event
                        .render()
                        .unwrap_or_else(|e| panic!("{kind}/{format}: {e}"));
                    assert!(!record.text.is_empty(), "{kind}/{format} rendered nothing");
                    assert!(!record.text.ends_with('\n'));
                    assert_eq!(record.kind, kind);
                }
            }
        }
    }

    #[test]
    fn known_formats() {
        let formats = registry().list_formats();
        assert_eq!(formats["web"], vec!["apache", "nginx"]);
        for f in [
            "syslog",
            "syslog.rfc3164",
            "syslog.rfc5424",
            "syslog.rfc5424.gap",
            "syslog.rfc5424.sdata",
            "syslog.unix",
        ] {
            assert!(formats["syslog"].contains(&f.to_string()), "missing {f}");
        }
        assert_eq!(formats["golang"], vec!["golang", "golang.text"]);
    }

    #[test]
    fn samples_are_stable() {
        let registry = registry();
        let a = registry.create("web", "nginx", false).unwrap().render().unwrap();
        let b = registry.create("web", "nginx", false).unwrap().render().unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.text,
            "127.0.0.1 - - [25/Jun/2011:20:00:04 +0000] \"GET /loggen/loggen/loggen/loggen/loggen/loggen/loggen HTTP/1.1\" 200 650 \"-\" \"golang/generator PPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPP\" \"-\""
        );
        assert_eq!(a.severity, "200");
    }

    #[test]
    fn golang_sample_is_json() {
        let record = registry()
            .create("golang", "golang", false)
            .unwrap()
            .render()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&record.text).unwrap();
        assert_eq!(value["level"], "info");
        assert_eq!(value["msg"], "starting posthook function");
        assert_eq!(record.severity, "info");
    }

    #[test]
    fn validation_order() {
        let registry = registry();
        assert_eq!(
            registry.validate("nope", "nginx"),
            Err(Error::UnsupportedType("nope".to_string()))
        );
        assert_eq!(
            registry.validate("web", "nope"),
            Err(Error::UnsupportedFormat {
                kind: "web".to_string(),
                format: "nope".to_string()
            })
        );
        assert!(registry.validate("web", "nginx").is_ok());

        let err = registry.create("nope", "nginx", false).unwrap_err();
        assert!(err.is_unsupported());
        let err = registry.create("syslog", "syslog.nope", false).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn framing_prefixes_byte_length() {
        let record = Record {
            kind: "web".to_string(),
            severity: "200".to_string(),
            text: "héllo".to_string(),
            framed: true,
        };
        // 'é' is two bytes.
        assert_eq!(record.payload(), "6 héllo");

        let unframed = Record {
            framed: false,
            ..record
        };
        assert_eq!(unframed.payload(), "héllo");

        let registry = registry();
        let options = Options {
            framed: true,
            ..Options::default()
        };
        let record = registry
            .create_with("web", "nginx", &options)
            .unwrap()
            .render()
            .unwrap();
        assert_eq!(
            record.payload(),
            format!("{} {}", record.text.len(), record.text)
        );
    }

    #[test]
    fn custom_families_register_by_type() {
        let sequences = Arc::new(SequenceState::new());
        let mut registry = Registry::new();
        let templates = TemplateStore::from_groups(
            "syslog",
            [(
                "audit".to_string(),
                "template: \"{{ pri }} audit {{ monoton_seq('audit', 1) }}\"".to_string(),
            )],
            Arc::clone(&sequences),
        )
        .unwrap();
        let syslog = Syslog::new(&crate::family::syslog::Config::default(), None, 1, 1, None);
        registry.register(Box::new(TemplateFamily::new(syslog, templates)));

        let render = || {
            registry
                .create("syslog", "audit", false)
                .unwrap()
                .render()
                .unwrap()
                .text
        };
        assert_eq!(render(), "<165> audit 1");
        assert_eq!(render(), "<165> audit 2");
        assert_eq!(sequences.current("audit"), Some(2));
    }

    #[test]
    fn sequences_shared_across_families() {
        let sequences = Arc::new(SequenceState::new());
        let registry = Registry::builtin(&Config::default(), &sequences).unwrap();
        for _ in 0..3 {
            registry
                .create("syslog", "syslog.rfc5424.gap", true)
                .unwrap()
                .render()
                .unwrap();
        }
        assert!(sequences.current("rfc5424-gap").is_some());
    }
}
