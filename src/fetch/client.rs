use async_trait::async_trait;
use reqwest::{Method, Request, Response, Url};

/// Transport seam under the prediction feed.
///
/// [`BasicClient`](super::BasicClient) is the production implementation;
/// anything that can execute a `reqwest::Request` can stand in for it.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;

    /// Plain GET with no body or extra headers.
    async fn get(&self, url: Url) -> reqwest::Result<Response> {
        self.execute(Request::new(Method::GET, url)).await
    }
}
