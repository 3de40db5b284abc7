use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayApiError {
    #[error("Could not initialize client: {0}")]
    Initialization(String),
    #[error("Invalid REST request: {0}")]
    RestRequestError(String),
    #[error("Invalid REST response: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize JSON: {0}")]
    JsonError(String),
    #[error("Query failed. Error {status}. {message}")]
    QueryError { status: u16, message: String },
    #[error("The gateway returned an object that was not expanded: {0}")]
    NotExpanded(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

impl GatewayApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayApiError::QueryError { status: 404, .. })
    }

    /// Connection failures, rate limits and server-side errors. The request may succeed if it is repeated later.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayApiError::RestResponseError(_) => true,
            GatewayApiError::QueryError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
