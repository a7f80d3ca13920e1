use std::future::Future;

use serde_json::Value;

use crate::{
    dispatch::{Dispatcher, RequestFuture},
    error::DispatchError,
    request::RequestDescriptor,
};

/// Endpoint returning the single best match for a show query.
pub const SEARCH_ENDPOINT: &str = "/singlesearch/shows";

const NOT_FOUND: u16 = 404;

impl Dispatcher {
    /// Look up the show best matching `query`, with its episodes embedded.
    pub fn search(&self, query: &str) -> RequestFuture {
        self.submit(
            RequestDescriptor::get(SEARCH_ENDPOINT)
                .param("embed", "episodes")
                .param("q", query),
        )
    }

    /// [`search`](Dispatcher::search), decoded. The request is queued
    /// immediately. An upstream 404 means nothing matched and becomes
    /// [`DispatchError::NotFound`].
    pub fn find_show(&self, query: &str) -> impl Future<Output = Result<Value, DispatchError>> {
        let pending = self.search(query);

        async move {
            match pending.await {
                Ok(response) => Ok(response.json()?),
                Err(err) if err.status() == Some(NOT_FOUND) => Err(DispatchError::NotFound),
                Err(err) => Err(err),
            }
        }
    }
}
