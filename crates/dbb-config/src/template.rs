//! Templates for the generated files of the Docker build context.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::DbbConfig;
use crate::error::{ConfigError, ConfigResult};

const DOCKERFILE_DEFAULT: &str = include_str!("../templates/Dockerfile.template");
const CONTROL_DEFAULT: &str = include_str!("../templates/control.template");

#[allow(clippy::incompatible_msrv)]
static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok());

/// A file generated into the build context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// The image build recipe.
    Dockerfile,
    /// Debian control file listing the image's build dependencies.
    DebControl,
}

impl Template {
    /// Every generated file, in archive order.
    pub const ALL: [Self; 2] = [Self::Dockerfile, Self::DebControl];

    /// Name of the file inside the build context.
    #[must_use]
    pub const fn filename(self) -> &'static str {
        match self {
            Self::Dockerfile => "Dockerfile",
            Self::DebControl => "control",
        }
    }

    /// Name of the template file in the tree's `lib` directory.
    #[must_use]
    pub const fn template_name(self) -> &'static str {
        match self {
            Self::Dockerfile => "Dockerfile.template",
            Self::DebControl => "control.template",
        }
    }

    const fn builtin(self) -> &'static str {
        match self {
            Self::Dockerfile => DOCKERFILE_DEFAULT,
            Self::DebControl => CONTROL_DEFAULT,
        }
    }

    /// Template-specific substitutions, layered over [`DbbConfig::subs`].
    fn extra_subs(self, config: &DbbConfig) -> BTreeMap<String, String> {
        let mut subs = BTreeMap::new();
        if self == Self::DebControl {
            let xenomai = if config.worker().has_flavor("xenomai") {
                "xenomai-dev,"
            } else {
                ""
            };
            subs.insert("xenomai".to_owned(), xenomai.to_owned());
        }
        subs
    }

    /// Template text: `<lib_dir>/<template_name>` if present, else the built-in default.
    pub fn source(self, lib_dir: &Path) -> ConfigResult<String> {
        let path = lib_dir.join(self.template_name());
        if path.is_file() {
            Ok(std::fs::read_to_string(path)?)
        } else {
            Ok(self.builtin().to_owned())
        }
    }

    /// Render this template for the given configuration.
    pub fn render(self, config: &DbbConfig) -> ConfigResult<String> {
        let mut subs = config.subs();
        subs.extend(self.extra_subs(config));
        render(self.template_name(), &self.source(&config.lib_dir())?, &subs)
    }
}

/// Replace every `{{name}}` placeholder in `text` with its substitution.
///
/// A placeholder with no matching substitution is an error.
pub fn render(name: &str, text: &str, subs: &BTreeMap<String, String>) -> ConfigResult<String> {
    let Some(placeholder) = PLACEHOLDER.as_ref() else {
        return Err(ConfigError::Template {
            template: name.to_owned(),
            reason: "placeholder pattern failed to compile".to_owned(),
        });
    };

    let mut missing = None;
    let rendered = placeholder.replace_all(text, |caps: &Captures<'_>| {
        let key = &caps[1];
        match subs.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_owned());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(ConfigError::Template {
            template: name.to_owned(),
            reason: format!("unknown substitution '{key}'"),
        }),
        None => Ok(rendered.into_owned()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn subs() -> BTreeMap<String, String> {
        [("hostname", "ci1"), ("uid", "1000")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    #[rstest]
    #[case("FROM {{hostname}}", "FROM ci1")]
    #[case("USER {{ uid }}:{{uid}}", "USER 1000:1000")]
    #[case("no placeholders", "no placeholders")]
    #[case("{not a placeholder}", "{not a placeholder}")]
    fn renders_placeholders(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(render("t", text, &subs()).unwrap(), expected);
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let err = render("Dockerfile.template", "{{nope}}", &subs()).unwrap_err();
        match err {
            ConfigError::Template { template, reason } => {
                assert_eq!(template, "Dockerfile.template");
                assert!(reason.contains("nope"));
            }
            other => panic!("expected template error, got {other:?}"),
        }
    }

    #[test]
    fn xenomai_flavor_adds_dependency() {
        let yaml = "workers:\n  rt:\n    flavors: [posix, xenomai]\n  plain: {}\n";
        let rt = DbbConfig::from_yaml_str(yaml, "/nonexistent", Some("rt")).unwrap();
        let plain = DbbConfig::from_yaml_str(yaml, "/nonexistent", Some("plain")).unwrap();

        assert!(Template::DebControl.render(&rt).unwrap().contains("xenomai-dev,"));
        assert!(!Template::DebControl.render(&plain).unwrap().contains("xenomai-dev"));
    }

    #[test]
    fn lib_dir_template_overrides_builtin() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(
            dir.path().join("lib/Dockerfile.template"),
            "FROM {{base_image}}\n",
        )
        .unwrap();

        let config =
            DbbConfig::from_yaml_str("workers:\n  ci1: {}\n", dir.path(), Some("ci1")).unwrap();
        assert_eq!(
            Template::Dockerfile.render(&config).unwrap(),
            "FROM debian:jessie\n"
        );
    }

    #[test]
    fn builtin_templates_render_with_default_subs() {
        let config =
            DbbConfig::from_yaml_str("workers:\n  ci1: {}\n", "/nonexistent", Some("ci1")).unwrap();
        for template in Template::ALL {
            assert!(!template.render(&config).unwrap().is_empty());
        }
    }
}
