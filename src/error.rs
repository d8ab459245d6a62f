use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    Config(String),
    Bind { addr: String, source: std::io::Error },
    DuplicateRuleSet(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Config(msg) => write!(f, "config error: {msg}"),
            GatewayError::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            GatewayError::DuplicateRuleSet(name) => {
                write!(f, "rule set '{name}' already registered")
            }
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}
