use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("App '{0}' has not been initialized")]
    AppNotFound(String),

    #[error(
        "Module '{namespace}' does not support multiple apps; access it from the default app instead of '{app}'"
    )]
    UnsupportedMultiApp { namespace: String, app: String },

    #[error("Module '{namespace}' does not accept a custom URL or region")]
    CustomUrlOrRegionUnsupported { namespace: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Query error: {0}")]
    Query(#[from] core_query::QueryError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
