//! Registry served as static JSON over HTTP.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};

use super::{PackageVersions, Registry};
use crate::http::HttpClient;
use crate::package::{PackageIdentity, VersionEntry};

/// Wire format of `{base}/packages/{name}.json` (internal).
mod api {
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct Package {
        pub name: String,
        pub uuid: Uuid,
        #[serde(default)]
        pub versions: Vec<Version>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Version {
        pub version: String,
        pub content_hash: String,
        #[serde(default)]
        pub yanked: bool,
    }
}

/// HTTP registry.
///
/// Layout under `base_url`:
/// - `packages/{name}.json` - version index
/// - `sources/{uuid}/{content_hash}.tar.gz` - source archives
pub struct HttpRegistry {
    name: String,
    base_url: String,
    http_client: HttpClient,
}

impl HttpRegistry {
    pub fn new(name: impl Into<String>, base_url: &str, http_client: HttpClient) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    fn convert(&self, package: api::Package) -> PackageVersions {
        let versions = package
            .versions
            .into_iter()
            .filter_map(|v| match semver::Version::parse(&v.version) {
                Ok(version) => Some(VersionEntry {
                    version,
                    content_hash: v.content_hash.to_lowercase(),
                    yanked: v.yanked,
                }),
                Err(e) => {
                    warn!(
                        "{}: skipping unparsable version `{}` of {}: {}",
                        self.name, v.version, package.name, e
                    );
                    None
                }
            })
            .collect();

        PackageVersions {
            name: package.name,
            uuid: package.uuid,
            versions,
        }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self))]
    async fn lookup(&self, package: &str) -> Result<Option<PackageVersions>> {
        let url = format!("{}/packages/{}.json", self.base_url, package);
        debug!("Looking up {} in registry {} ({})", package, self.name, url);

        let Some(parsed) = self
            .http_client
            .get_json_optional::<api::Package>(&url)
            .await?
        else {
            return Ok(None);
        };

        if parsed.name != package {
            warn!(
                "{}: index for `{}` names package `{}`, ignoring it",
                self.name, package, parsed.name
            );
            return Ok(None);
        }

        Ok(Some(self.convert(parsed)))
    }

    fn source_url(&self, identity: &PackageIdentity, content_hash: &str) -> String {
        format!(
            "{}/sources/{}/{}.tar.gz",
            self.base_url, identity.uuid, content_hash
        )
    }
}
