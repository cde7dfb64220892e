use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use std::path::PathBuf;
use std::sync::Arc;

use super::paths::AppPaths;
use crate::{
    application::AppContext,
    http::HttpClient,
    registry::{HttpRegistry, Registry, Resolver},
    runtime::Runtime,
    shim::{ShimConfig, ShimFlavor},
};

pub const TOKEN_ENV: &str = "PKGAPP_REGISTRY_TOKEN";

/// Settings taken from the command line (or its environment fallbacks).
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub depot: Option<PathBuf>,
    pub bin_dir: Option<PathBuf>,
    /// `name=url` or a bare url.
    pub registries: Vec<String>,
    /// Language runtime executable for shims.
    pub runtime: Option<String>,
}

pub struct Config<R: Runtime> {
    pub runtime: R,
    pub paths: AppPaths,
    pub http_client: HttpClient,
    pub resolver: Resolver,
    pub shim_config: ShimConfig,
    pub flavor: ShimFlavor,
}

/// Split a `--registry` value into name and base url. A bare url is named
/// after its host and path.
pub fn parse_registry(value: &str) -> Result<(String, String)> {
    let value = value.trim();
    let (name, url) = match value.split_once('=') {
        Some((name, url)) if !name.contains("://") => (name.trim().to_string(), url.trim()),
        _ => {
            let bare = value.split_once("://").map_or(value, |(_, rest)| rest);
            (bare.trim_end_matches('/').to_string(), value)
        }
    };
    if name.is_empty() || url.is_empty() {
        bail!("Invalid registry `{}`; expected NAME=URL or URL", value);
    }
    if !url.contains("://") {
        bail!("Registry url `{}` has no scheme", url);
    }
    Ok((name, url.to_string()))
}

impl<R: Runtime> Config<R> {
    pub fn new(runtime: R, options: ConfigOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Ok(token) = runtime.env_var(TOKEN_ENV) {
            let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .with_context(|| format!("{} is not a valid header value", TOKEN_ENV))?;
            auth_value.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_value);
            debug!("Using {} for registry authentication", TOKEN_ENV);
        }

        let client = Client::builder()
            .user_agent("pkgapp-cli")
            .default_headers(headers)
            .build()?;
        let http_client = HttpClient::new(client);

        let mut resolver = Resolver::new();
        for value in &options.registries {
            let (name, url) = parse_registry(value)?;
            debug!("Registry {} at {}", name, url);
            resolver.register(
                Arc::new(HttpRegistry::new(name, &url, http_client.clone())) as Arc<dyn Registry>,
            );
        }

        let paths = AppPaths::resolve(&runtime, options.depot, options.bin_dir)?;

        let mut shim_config = ShimConfig::default();
        if let Some(executable) = options.runtime {
            shim_config.runtime = executable;
        }

        Ok(Self {
            runtime,
            paths,
            http_client,
            resolver,
            shim_config,
            flavor: ShimFlavor::host(),
        })
    }

    pub fn ctx(&self) -> AppContext<'_, R> {
        AppContext::new(&self.runtime, &self.paths, &self.shim_config).with_flavor(self.flavor)
    }
}
