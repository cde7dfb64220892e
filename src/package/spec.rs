//! Package specification parsing for `add`.

use anyhow::{Result, anyhow, bail};
use std::fmt;
use std::str::FromStr;

use super::VersionConstraint;

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".zip"];

/// What the user asked to install.
///
/// Formats:
/// - `Name` or `Name@constraint` - resolve against the registries
/// - `https://host/path/Name.tar.gz` (`.tgz`, `.zip`) - download an archive
/// - `https://host/Name.git`, `git@host:Name.git`, `<url>#rev` - clone with git
#[derive(Debug, Clone, PartialEq)]
pub enum PackageSpec {
    Registry {
        name: String,
        constraint: VersionConstraint,
    },
    Archive {
        url: String,
    },
    Git {
        url: String,
        rev: Option<String>,
    },
}

impl PackageSpec {
    pub fn registry(name: impl Into<String>) -> Self {
        PackageSpec::Registry {
            name: name.into(),
            constraint: VersionConstraint::Latest,
        }
    }

    fn looks_like_url(s: &str) -> bool {
        s.starts_with("https://")
            || s.starts_with("http://")
            || s.starts_with("file://")
            || s.starts_with("git@")
            || s.starts_with("ssh://")
    }
}

/// Package names are identifiers: a letter or `_`, then letters, digits or `_`.
pub fn validate_package_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_alphabetic() || first == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        bail!("Invalid package name `{}`", name);
    }
    Ok(())
}

impl FromStr for PackageSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            bail!("Package specification cannot be empty");
        }

        if Self::looks_like_url(s) || s.ends_with(".git") || s.contains(".git#") {
            let (url, rev) = match s.split_once('#') {
                Some((_, "")) => {
                    bail!("Invalid format: revision after # cannot be empty")
                }
                Some((url, rev)) => (url, Some(rev.to_string())),
                None => (s, None),
            };

            let lower = url.to_lowercase();
            if rev.is_none() && ARCHIVE_SUFFIXES.iter().any(|ext| lower.ends_with(ext)) {
                return Ok(PackageSpec::Archive {
                    url: url.to_string(),
                });
            }
            return Ok(PackageSpec::Git {
                url: url.to_string(),
                rev,
            });
        }

        let (name, constraint) = match s.split_once('@') {
            Some((_, "")) => {
                return Err(anyhow!(
                    "Invalid format: version after @ cannot be empty. Expected 'Name@version'."
                ));
            }
            Some((name, version)) => (name, version.parse::<VersionConstraint>()?),
            None => (s, VersionConstraint::Latest),
        };

        validate_package_name(name)?;
        Ok(PackageSpec::Registry {
            name: name.to_string(),
            constraint,
        })
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSpec::Registry {
                name,
                constraint: VersionConstraint::Latest,
            } => write!(f, "{}", name),
            PackageSpec::Registry { name, constraint } => write!(f, "{}@{}", name, constraint),
            PackageSpec::Archive { url } => write!(f, "{}", url),
            PackageSpec::Git { url, rev: None } => write!(f, "{}", url),
            PackageSpec::Git { url, rev: Some(rev) } => write!(f, "{}#{}", url, rev),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    #[test]
    fn test_parse_bare_name() {
        let spec: PackageSpec = "Comonicon".parse().unwrap();
        assert_eq!(spec, PackageSpec::registry("Comonicon"));
    }

    #[test]
    fn test_parse_name_with_exact_version() {
        let spec: PackageSpec = "Foo@1.2.3".parse().unwrap();
        assert_eq!(
            spec,
            PackageSpec::Registry {
                name: "Foo".into(),
                constraint: VersionConstraint::Exact(Version::new(1, 2, 3)),
            }
        );
    }

    #[test]
    fn test_parse_name_with_range() {
        let spec: PackageSpec = "Foo@^0.4".parse().unwrap();
        match spec {
            PackageSpec::Registry {
                constraint: VersionConstraint::Range(req),
                ..
            } => assert!(req.matches(&Version::new(0, 4, 7))),
            other => panic!("unexpected spec {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_version_fails() {
        let err = "Foo@".parse::<PackageSpec>().unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_parse_invalid_name_fails() {
        assert!("9Lives".parse::<PackageSpec>().is_err());
        assert!("foo/bar".parse::<PackageSpec>().is_err());
        assert!("".parse::<PackageSpec>().is_err());
    }

    #[test]
    fn test_parse_archive_urls() {
        for url in [
            "https://example.com/Foo-1.0.tar.gz",
            "https://example.com/Foo.tgz",
            "file:///tmp/Foo.ZIP",
        ] {
            assert_eq!(
                url.parse::<PackageSpec>().unwrap(),
                PackageSpec::Archive { url: url.into() }
            );
        }
    }

    #[test]
    fn test_parse_git_urls() {
        assert_eq!(
            "https://github.com/o/Foo.jl.git".parse::<PackageSpec>().unwrap(),
            PackageSpec::Git {
                url: "https://github.com/o/Foo.jl.git".into(),
                rev: None
            }
        );
        assert_eq!(
            "git@github.com:o/Foo.git#main".parse::<PackageSpec>().unwrap(),
            PackageSpec::Git {
                url: "git@github.com:o/Foo.git".into(),
                rev: Some("main".into())
            }
        );
        assert!("https://github.com/o/Foo.git#".parse::<PackageSpec>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for s in [
            "Foo",
            "Foo@=1.2.3",
            "https://example.com/Foo.tar.gz",
            "https://github.com/o/Foo.git#v2",
        ] {
            let spec: PackageSpec = s.parse().unwrap();
            assert_eq!(spec.to_string(), s);
        }
    }
}
