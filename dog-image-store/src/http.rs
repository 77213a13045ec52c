use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use futures_util::TryStreamExt;
use reqwest::{Body, Client, Method, RequestBuilder, Response, Url};

use crate::store::{ObjectConnection, ObjectResponse, ObjectTransport};
use crate::upload::ObjectReader;
use crate::{ConnectionError, ConnectionResult, ObjectHeaders, ObjectListing};

/// Bytes pulled from an image reader per request body chunk
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// Swift API over HTTP
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (TLS roots, proxies, timeouts)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl ObjectTransport for HttpTransport {
    fn connect(&self, storage_url: &str, token: &str) -> Arc<dyn ObjectConnection> {
        Arc::new(HttpConnection {
            client: self.client.clone(),
            storage_url: storage_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

/// One token against one storage account
pub struct HttpConnection {
    client: Client,
    storage_url: String,
    token: String,
}

impl HttpConnection {
    fn url(&self, container: &str, name: Option<&str>) -> ConnectionResult<Url> {
        let mut url = Url::parse(&self.storage_url)
            .map_err(|e| ConnectionError::transport(format!("Invalid storage URL {}: {}", self.storage_url, e)))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ConnectionError::transport(format!("Storage URL {} cannot take a path", self.storage_url))
            })?;
            segments.pop_if_empty().push(container);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).header("X-Auth-Token", &self.token)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> ConnectionResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ConnectionError::transport(format!("{} failed: {}", what, e)))?;
        check_status(response, what).await
    }
}

async fn check_status(response: Response, what: &str) -> ConnectionResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    Err(ConnectionError::http(
        status.as_u16(),
        format!("{} failed: {} {} {}", what, url, status, body.trim()),
    ))
}

fn response_headers(response: &Response) -> ObjectHeaders {
    let mut headers = ObjectHeaders::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str(), value);
        }
    }
    headers
}

#[async_trait]
impl ObjectConnection for HttpConnection {
    async fn head_container(&self, container: &str) -> ConnectionResult<ObjectHeaders> {
        let url = self.url(container, None)?;
        let response = self
            .send(self.request(Method::HEAD, url), "Container HEAD")
            .await?;
        Ok(response_headers(&response))
    }

    async fn put_container(&self, container: &str) -> ConnectionResult<()> {
        let url = self.url(container, None)?;
        self.send(
            self.request(Method::PUT, url).header("Content-Length", "0"),
            "Container PUT",
        )
        .await?;
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> ConnectionResult<()> {
        let url = self.url(container, None)?;
        self.send(self.request(Method::DELETE, url), "Container DELETE")
            .await?;
        Ok(())
    }

    async fn head_object(&self, container: &str, name: &str) -> ConnectionResult<ObjectHeaders> {
        let url = self.url(container, Some(name))?;
        let response = self.send(self.request(Method::HEAD, url), "Object HEAD").await?;
        Ok(response_headers(&response))
    }

    async fn get_object(
        &self,
        container: &str,
        name: &str,
        offset: Option<u64>,
    ) -> ConnectionResult<ObjectResponse> {
        let url = self.url(container, Some(name))?;
        let mut request = self.request(Method::GET, url);
        if let Some(offset) = offset {
            request = request.header("Range", format!("bytes={}-", offset));
        }
        let response = self.send(request, "Object GET").await?;
        let headers = response_headers(&response);
        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(ObjectResponse {
            headers,
            body: Box::pin(body),
        })
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        body: Option<&mut dyn ObjectReader>,
        content_length: Option<u64>,
        headers: &ObjectHeaders,
    ) -> ConnectionResult<String> {
        let url = self.url(container, Some(name))?;
        let mut request = self.request(Method::PUT, url);
        for (header, value) in headers.iter() {
            request = request.header(header, value);
        }
        if let Some(length) = content_length {
            request = request.header("Content-Length", length.to_string());
        }

        // The reader is borrowed, so it feeds the request through a channel
        // holding one chunk at a time.
        let (mut tx, rx) = futures::channel::mpsc::channel::<io::Result<Bytes>>(1);
        let request = request.body(Body::wrap_stream(rx));

        let feed = async move {
            let Some(reader) = body else {
                return Ok(());
            };
            loop {
                match reader.read(BODY_CHUNK_SIZE).await {
                    Ok(chunk) if chunk.is_empty() => return Ok(()),
                    Ok(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                        return Err(e);
                    }
                }
            }
        };
        let (fed, response) = futures::join!(feed, self.send(request, "Object PUT"));
        fed?;

        let response = response?;
        Ok(response_headers(&response).etag().unwrap_or_default().to_string())
    }

    async fn delete_object(
        &self,
        container: &str,
        name: &str,
        query: Option<&str>,
    ) -> ConnectionResult<()> {
        let mut url = self.url(container, Some(name))?;
        url.set_query(query);
        self.send(self.request(Method::DELETE, url), "Object DELETE")
            .await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> ConnectionResult<Vec<ObjectListing>> {
        let mut listing = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut url = self.url(container, None)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("format", "json");
                if let Some(prefix) = prefix {
                    query.append_pair("prefix", prefix);
                }
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }
            let response = self
                .send(self.request(Method::GET, url), "Container GET")
                .await?;
            let page: Vec<ObjectListing> = response
                .json()
                .await
                .map_err(|e| ConnectionError::transport(format!("Invalid container listing: {}", e)))?;

            match page.last() {
                Some(last) => marker = Some(last.name.clone()),
                None => return Ok(listing),
            }
            listing.extend(page);
        }
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("storage_url", &self.storage_url)
            .finish_non_exhaustive()
    }
}
