pub type NxchatResult<T> = Result<T, NxchatError>;

#[derive(Debug, thiserror::Error)]
pub enum NxchatError {
    #[error("[Config Error] {0}")]
    ConfigError(#[from] ::confy::ConfyError),

    #[error("[Enum Error] {0}")]
    EnumError(#[from] ::strum::ParseError),

    #[error("[HTTP Error] {0}")]
    HttpError(#[from] ::reqwest::Error),

    #[error("[HTTP Status Error] {0}")]
    HttpStatusError(String),

    #[error("[Invalid] {1}")]
    Invalid(&'static str, String),

    #[error("[IO Error] {0}")]
    IoError(#[from] std::io::Error),

    #[error("[JSON Error] {0}")]
    JsonError(#[from] ::serde_json::Error),

    #[error("[Not Exists] {1}")]
    NotExists(&'static str, String),

    #[error("[Required] {1}")]
    Required(&'static str, String),

    #[error("[Task Error] {0}")]
    TaskError(#[from] ::tokio::task::JoinError),

    #[error("[Timeout] Request was not answered within {0} ms")]
    Timeout(u64),

    #[error("[Tool Error] Model kept calling tools after {0} rounds")]
    ToolRoundsExceeded(usize),

    #[error("[Unauthorized] {0}")]
    Unauthorized(String),

    #[error("[Tool Error] Unsupported tool '{0}'")]
    UnsupportedTool(String),

    #[error("[URL Error] {0}")]
    UrlError(#[from] ::url::ParseError),
}
