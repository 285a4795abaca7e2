use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use url::Url;

use toolgate_invoke::{DispatchTarget, InvokeLimits};
use toolgate_tools::HandlerRegistry;
use toolgate_types::{DispatchMode, Route};

const ENV_PREFIX: &str = "env:";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no in-process binding named {0}")]
    BindingMissing(String),
    #[error("route {0} has no usable base url")]
    RouteUrlMissing(String),
    #[error("signing secret {0} is not available")]
    SecretMissing(String),
}

impl ResolveError {
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::BindingMissing(_) => "binding_missing",
            ResolveError::RouteUrlMissing(_) => "route_url_missing",
            ResolveError::SecretMissing(_) => "signing_secret_missing",
        }
    }
}

/// Source of environment-style indirections (`env:NAME`).
pub trait EnvLookup: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// A route turned into something the invoker can call.
#[derive(Clone, Debug)]
pub struct ResolvedRoute {
    pub target: DispatchTarget,
    pub limits: InvokeLimits,
    pub signing_secret: Option<Vec<u8>>,
}

pub struct RouteResolver<'a> {
    bindings: &'a HandlerRegistry,
    env: &'a dyn EnvLookup,
}

impl<'a> RouteResolver<'a> {
    pub fn new(bindings: &'a HandlerRegistry, env: &'a dyn EnvLookup) -> Self {
        Self { bindings, env }
    }

    pub fn resolve(
        &self,
        route: &Route,
        query: &BTreeMap<String, String>,
    ) -> Result<ResolvedRoute, ResolveError> {
        let target = match route.mode {
            DispatchMode::InProcess => {
                let binding = route
                    .target_ref
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", route.domain, route.action));
                let handler = self
                    .bindings
                    .get(&binding)
                    .ok_or_else(|| ResolveError::BindingMissing(binding.clone()))?;
                DispatchTarget::InProcess { binding, handler }
            }
            DispatchMode::RemoteHttp => DispatchTarget::Remote {
                url: self.remote_url(route, query)?,
            },
        };
        let signing_secret = match route.signing_secret_ref.as_deref() {
            Some(secret_ref) => {
                let name = secret_ref.strip_prefix(ENV_PREFIX).unwrap_or(secret_ref);
                let secret = self
                    .env
                    .var(name)
                    .ok_or_else(|| ResolveError::SecretMissing(secret_ref.to_string()))?;
                Some(secret.into_bytes())
            }
            None => None,
        };
        Ok(ResolvedRoute {
            target,
            limits: InvokeLimits::for_route(route),
            signing_secret,
        })
    }

    fn remote_url(&self, route: &Route, query: &BTreeMap<String, String>) -> Result<Url, ResolveError> {
        let missing = || ResolveError::RouteUrlMissing(route.key());
        let base = match route.target_ref.as_deref() {
            Some(r) if is_http_url(r) => r.to_string(),
            Some(r) => {
                let name = r.strip_prefix(ENV_PREFIX).unwrap_or(r);
                self.env.var(name).ok_or_else(missing)?
            }
            None if is_http_url(&route.domain) => route.domain.clone(),
            None if route.domain.contains('.') => format!("https://{}", route.domain),
            None => return Err(missing()),
        };

        let path = route
            .path_template
            .as_deref()
            .unwrap_or_default()
            .replace("{domain}", &route.domain)
            .replace("{action}", &route.action);
        let joined = if path.is_empty() {
            base
        } else {
            format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
        };

        let mut url = Url::parse(&joined).map_err(|_| missing())?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(missing());
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
