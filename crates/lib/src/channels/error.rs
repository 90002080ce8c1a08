/// Failure talking to a channel's API (replies, typing, polling, webhook management).
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("channel request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{method} failed: {status} {body}")]
    Api {
        method: &'static str,
        status: u16,
        body: String,
    },
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}
