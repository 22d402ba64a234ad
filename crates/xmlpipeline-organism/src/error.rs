use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read organism config at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse organism config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("organism config is invalid: {0}")]
    Invalid(String),
}
