mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use bytes::Bytes;
use reqwest::Url;

use crate::error::FeedError;

/// Issues a GET for `url` with `params` appended to the query string.
///
/// Any status outside 2xx/3xx is an error; the body is not read in that case.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    params: &[(&str, &str)],
) -> Result<Bytes, FeedError> {
    let mut url = Url::parse(url)
        .map_err(|e| FeedError::Transport(format!("invalid feed url '{url}': {e}")))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }

    let resp = client.get(url).await?;

    let status = resp.status();
    if !(status.is_success() || status.is_redirection()) {
        return Err(FeedError::Status(status.as_u16()));
    }

    Ok(resp.bytes().await?)
}
