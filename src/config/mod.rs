use std::{collections::HashSet, fs};

use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    config_error,
    core::{
        descriptor::{AppDescriptor, Meta, RouteMatch},
        error::FrameResult,
    },
    orchestration::router::RoutingMode,
};

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Config::validate_unique_names"))]
pub struct Config {
    #[serde(default)]
    pub routing: Routing,

    #[validate(nested)]
    #[serde(default)]
    pub bus: Bus,

    #[validate(nested)]
    #[serde(default)]
    pub loader: Loader,

    #[validate(nested)]
    pub log: Option<Log>,

    #[validate(nested)]
    #[serde(default)]
    pub apps: Vec<App>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> FrameResult<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path)
            .map_err(|e| config_error!("Unable to read conf file from {}: {}", path, e))?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> FrameResult<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str)
            .map_err(|e| config_error!("Unable to parse yaml conf: {}", e))?;

        trace!("Loaded conf: {conf:?}");

        // use validator to validate conf file
        conf.validate()
            .map_err(|e| config_error!("Conf file valid failed: {}", e))?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> FrameResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("Unable to serialize conf: {}", e))
    }

    /// Descriptors of every configured application, in file order.
    pub fn descriptors(&self) -> FrameResult<Vec<AppDescriptor>> {
        self.apps.iter().map(App::to_descriptor).collect()
    }

    fn validate_unique_names(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for app in &self.apps {
            if !seen.insert(app.name.as_str()) {
                return Err(ValidationError::new("duplicate_app_name"));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Routing {
    /// Detected from the initial location when absent.
    pub mode: Option<RoutingMode>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Bus {
    #[validate(range(min = 1))]
    #[serde(default = "Bus::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Bus {
    fn default_request_timeout_ms() -> u64 {
        30_000
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Loader {
    #[validate(range(min = 1))]
    #[serde(default = "Loader::default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "Loader::default_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "Loader::default_delay_ms")]
    pub unmount_grace_ms: u64,
}

impl Loader {
    fn default_load_timeout_ms() -> u64 {
        30_000
    }

    fn default_delay_ms() -> u64 {
        100
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            load_timeout_ms: Self::default_load_timeout_ms(),
            settle_delay_ms: Self::default_delay_ms(),
            unmount_grace_ms: Self::default_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Log {
    #[validate(custom(function = "Log::validate_level"))]
    #[serde(default = "Log::default_level")]
    pub level: String,
    /// Log lines are appended to this file instead of stderr.
    pub path: Option<String>,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }

    fn validate_level(level: &str) -> Result<(), ValidationError> {
        level
            .parse::<log::LevelFilter>()
            .map(|_| ())
            .map_err(|_| ValidationError::new("invalid_log_level"))
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct App {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub url: String,
    #[validate(nested)]
    pub route_match: RouteMatchConf,
    pub container: Option<String>,
    #[serde(default)]
    pub cache: bool,
    pub meta: Option<Meta>,
}

impl App {
    pub fn to_descriptor(&self) -> FrameResult<AppDescriptor> {
        let mut descriptor = AppDescriptor::new(&self.name, &self.url, self.route_match.to_route_match()?)
            .with_cache(self.cache);
        if let Some(container) = &self.container {
            descriptor = descriptor.with_container(container);
        }
        if let Some(meta) = &self.meta {
            descriptor = descriptor.with_meta(meta.clone());
        }
        Ok(descriptor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMatchKind {
    Prefix,
    Exact,
    Pattern,
}

/// Route match as written in configuration. Predicates are code-only.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "RouteMatchConf::validate_kind"))]
pub struct RouteMatchConf {
    pub kind: RouteMatchKind,
    pub path: Option<String>,
    pub regex: Option<String>,
}

impl RouteMatchConf {
    fn validate_kind(&self) -> Result<(), ValidationError> {
        match self.kind {
            RouteMatchKind::Prefix | RouteMatchKind::Exact => {
                if self.path.as_deref().map_or(true, str::is_empty) {
                    return Err(ValidationError::new("path_required"));
                }
            }
            RouteMatchKind::Pattern => match &self.regex {
                Some(re) if Regex::new(re).is_ok() => {}
                Some(_) => return Err(ValidationError::new("invalid_regex")),
                None => return Err(ValidationError::new("regex_required")),
            },
        }

        Ok(())
    }

    pub fn to_route_match(&self) -> FrameResult<RouteMatch> {
        match (self.kind, &self.path, &self.regex) {
            (RouteMatchKind::Prefix, Some(path), _) => Ok(RouteMatch::prefix(path)),
            (RouteMatchKind::Exact, Some(path), _) => Ok(RouteMatch::exact(path)),
            (RouteMatchKind::Pattern, _, Some(re)) => {
                RouteMatch::pattern(re).map_err(|e| config_error!("invalid route pattern {}: {}", re, e))
            }
            (kind, _, _) => Err(config_error!("route match {:?} is incomplete", kind)),
        }
    }
}
