//! Process configuration from the environment

use crate::guard::{GuardPolicy, Verb};
use crate::llm::LlmConfig;
use crate::state_machine::state::{DEFAULT_MAX_ITERATIONS, DEFAULT_ROW_LIMIT};
use crate::state_machine::GraphContext;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8001;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: '{value}' is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{var} must be at least 1")]
    Zero { var: &'static str },
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
        }
    }
}

/// Per-question graph settings shared by every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub row_limit: u32,
    pub max_iterations: u32,
    pub guard: GuardPolicy,
}

impl AgentConfig {
    /// Graph context for a store speaking `dialect`
    pub fn graph_context(&self, dialect: &str) -> GraphContext {
        GraphContext::new(dialect)
            .with_row_limit(self.row_limit)
            .with_max_iterations(self.max_iterations)
            .with_guard(self.guard.clone())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            row_limit: DEFAULT_ROW_LIMIT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            guard: GuardPolicy::strict(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset and blank values take defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let mut server = ServerConfig::default();
        if let Some(value) = get("SQLGRAPH_HOST") {
            server.host = parse("SQLGRAPH_HOST", &value, "IP address")?;
        }
        if let Some(value) = get("SQLGRAPH_PORT") {
            server.port = parse("SQLGRAPH_PORT", &value, "port number")?;
        }

        let mut agent = AgentConfig::default();
        if let Some(value) = get("SQLGRAPH_ROW_LIMIT") {
            agent.row_limit = parse_positive("SQLGRAPH_ROW_LIMIT", &value)?;
        }
        if let Some(value) = get("SQLGRAPH_MAX_ITERATIONS") {
            agent.max_iterations = parse_positive("SQLGRAPH_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = get("SQLGRAPH_ALLOWED_STATEMENTS") {
            agent.guard = parse_guard(&value)?;
        }

        let llm = LlmConfig {
            google_api_key: get("GOOGLE_API_KEY"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            gateway: get("LLM_GATEWAY"),
            default_model: get("SQLGRAPH_MODEL"),
        };

        Ok(Self { server, agent, llm })
    }
}

fn parse<T: std::str::FromStr>(
    var: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
        expected,
    })
}

fn parse_positive(var: &'static str, value: &str) -> Result<u32, ConfigError> {
    match parse(var, value, "positive integer")? {
        0 => Err(ConfigError::Zero { var }),
        n => Ok(n),
    }
}

fn parse_guard(value: &str) -> Result<GuardPolicy, ConfigError> {
    let verbs = value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| parse::<Verb>("SQLGRAPH_ALLOWED_STATEMENTS", v, "statement verb"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GuardPolicy::allowing(verbs))
}
