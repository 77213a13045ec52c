use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::store::{ObjectConnection, ObjectResponse, ObjectTransport};
use crate::upload::ObjectReader;
use crate::{
    ConnectionError, ConnectionResult, ObjectHeaders, ObjectListing, DELETE_MANIFEST_QUERY,
    STATIC_LARGE_OBJECT_HEADER,
};

const READ_SIZE: usize = 64 * 1024;

/// A call received by the in-memory store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    HeadContainer(String),
    PutContainer(String),
    DeleteContainer(String),
    HeadObject(String, String),
    GetObject {
        container: String,
        name: String,
        offset: Option<u64>,
    },
    PutObject {
        container: String,
        name: String,
        content_length: Option<u64>,
    },
    DeleteObject {
        container: String,
        name: String,
        query: Option<String>,
    },
    ListObjects {
        container: String,
        prefix: Option<String>,
    },
}

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    headers: ObjectHeaders,
    /// Segments of a static large object, in order
    segments: Vec<(String, String)>,
}

#[derive(Default)]
struct State {
    containers: BTreeMap<String, BTreeMap<String, StoredObject>>,
    calls: Vec<Call>,
    connections: Vec<(String, String)>,
    closed: usize,
    failing_puts: HashMap<String, u16>,
    failing_deletes: HashSet<String>,
    interruptions: VecDeque<Option<u64>>,
    serve_chunk_size: Option<usize>,
}

impl State {
    fn object(&self, container: &str, name: &str) -> ConnectionResult<&StoredObject> {
        self.containers
            .get(container)
            .ok_or_else(|| not_found("Container", container))?
            .get(name)
            .ok_or_else(|| not_found("Object", &format!("{}/{}", container, name)))
    }

    /// Content as served: manifests resolve to their segments
    fn content(&self, container: &str, name: &str) -> ConnectionResult<Bytes> {
        let object = self.object(container, name)?;
        if object.headers.is_static_large_object() {
            let mut buf = BytesMut::new();
            for (segment_container, segment) in &object.segments {
                buf.extend_from_slice(&self.object(segment_container, segment)?.data);
            }
            return Ok(buf.freeze());
        }
        if let Some(manifest) = object.headers.object_manifest() {
            let (segment_container, prefix) = manifest.split_once('/').unwrap_or((manifest, ""));
            let mut buf = BytesMut::new();
            if let Some(objects) = self.containers.get(segment_container) {
                for (_, segment) in objects.iter().filter(|(n, _)| n.starts_with(prefix)) {
                    buf.extend_from_slice(&segment.data);
                }
            }
            return Ok(buf.freeze());
        }
        Ok(object.data.clone())
    }
}

fn not_found(what: &str, name: &str) -> ConnectionError {
    ConnectionError::http(404, format!("{} {} not found", what, name))
}

fn etag(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Object store kept entirely in process memory.
///
/// Serves dynamic and static large objects the way Swift does, records every
/// call, and can be told to fail puts, deletes and downloads.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<State>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, container: &str) -> Self {
        self.create_container(container);
        self
    }

    pub fn create_container(&self, container: &str) {
        self.state
            .lock()
            .containers
            .entry(container.to_string())
            .or_default();
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.state.lock().containers.contains_key(container)
    }

    pub fn insert_object(&self, container: &str, name: &str, data: impl Into<Bytes>) {
        self.insert(container, name, data.into(), ObjectHeaders::new(), Vec::new());
    }

    /// Store a static large object manifest listing `segments` in `container`
    pub fn insert_static_manifest(&self, container: &str, name: &str, segments: &[&str]) {
        let segments = segments
            .iter()
            .map(|s| (container.to_string(), s.to_string()))
            .collect();
        let headers = ObjectHeaders::new().with(STATIC_LARGE_OBJECT_HEADER, "True");
        self.insert(container, name, Bytes::new(), headers, segments);
    }

    fn insert(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        headers: ObjectHeaders,
        segments: Vec<(String, String)>,
    ) {
        self.state
            .lock()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(
                name.to_string(),
                StoredObject {
                    data,
                    headers,
                    segments,
                },
            );
    }

    /// Raw stored bytes of one object (empty for manifests)
    pub fn object(&self, container: &str, name: &str) -> Option<Bytes> {
        self.state
            .lock()
            .object(container, name)
            .ok()
            .map(|o| o.data.clone())
    }

    pub fn object_headers(&self, container: &str, name: &str) -> Option<ObjectHeaders> {
        self.state
            .lock()
            .object(container, name)
            .ok()
            .map(|o| o.headers.clone())
    }

    /// Object names in `container`, sorted
    pub fn object_names(&self, container: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// `(storage_url, token)` of every connection opened, in order
    pub fn connections(&self) -> Vec<(String, String)> {
        self.state.lock().connections.clone()
    }

    pub fn closed_connections(&self) -> usize {
        self.state.lock().closed
    }

    /// Answer puts of `name` with `status`
    pub fn fail_put(&self, name: &str, status: u16) {
        self.state.lock().failing_puts.insert(name.to_string(), status);
    }

    pub fn fail_delete(&self, name: &str) {
        self.state.lock().failing_deletes.insert(name.to_string());
    }

    /// Cut the next downloads short. Each entry applies to one GET in order:
    /// `Some(n)` breaks the stream after `n` bytes, `None` serves it whole.
    pub fn interrupt_gets(&self, schedule: Vec<Option<u64>>) {
        self.state.lock().interruptions = schedule.into();
    }

    /// Size of the chunks downloads are served in
    pub fn set_serve_chunk_size(&self, size: usize) {
        self.state.lock().serve_chunk_size = Some(size.max(1));
    }
}

impl ObjectTransport for MemoryObjectStore {
    fn connect(&self, storage_url: &str, token: &str) -> Arc<dyn ObjectConnection> {
        self.state
            .lock()
            .connections
            .push((storage_url.to_string(), token.to_string()));
        Arc::new(MemoryConnection {
            state: self.state.clone(),
        })
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl ObjectConnection for MemoryConnection {
    async fn head_container(&self, container: &str) -> ConnectionResult<ObjectHeaders> {
        let mut state = self.state.lock();
        state.calls.push(Call::HeadContainer(container.to_string()));
        let objects = state
            .containers
            .get(container)
            .ok_or_else(|| not_found("Container", container))?;
        Ok(ObjectHeaders::new().with("x-container-object-count", objects.len().to_string()))
    }

    async fn put_container(&self, container: &str) -> ConnectionResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::PutContainer(container.to_string()));
        state.containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> ConnectionResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::DeleteContainer(container.to_string()));
        match state.containers.get(container) {
            None => Err(not_found("Container", container)),
            Some(objects) if !objects.is_empty() => Err(ConnectionError::http(
                409,
                format!("Container {} is not empty", container),
            )),
            Some(_) => {
                state.containers.remove(container);
                Ok(())
            }
        }
    }

    async fn head_object(&self, container: &str, name: &str) -> ConnectionResult<ObjectHeaders> {
        let mut state = self.state.lock();
        state
            .calls
            .push(Call::HeadObject(container.to_string(), name.to_string()));
        let content = state.content(container, name)?;
        let object = state.object(container, name)?;
        Ok(object
            .headers
            .clone()
            .with("content-length", content.len().to_string())
            .with("etag", etag(&object.data)))
    }

    async fn get_object(
        &self,
        container: &str,
        name: &str,
        offset: Option<u64>,
    ) -> ConnectionResult<ObjectResponse> {
        let mut state = self.state.lock();
        state.calls.push(Call::GetObject {
            container: container.to_string(),
            name: name.to_string(),
            offset,
        });
        let content = state.content(container, name)?;
        let start = offset.unwrap_or(0) as usize;
        if start > content.len() {
            return Err(ConnectionError::http(416, "Requested range not satisfiable"));
        }
        let body = content.slice(start..);
        let cut = state.interruptions.pop_front().flatten();
        let chunk_size = state.serve_chunk_size.unwrap_or(READ_SIZE);
        drop(state);

        let served = match cut {
            Some(n) => body.slice(..body.len().min(n as usize)),
            None => body.clone(),
        };
        let mut items: Vec<io::Result<Bytes>> = served
            .chunks(chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if cut.map_or(false, |n| (n as usize) < body.len()) {
            items.push(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection interrupted",
            )));
        }

        Ok(ObjectResponse {
            headers: ObjectHeaders::new().with("content-length", body.len().to_string()),
            body: Box::pin(futures::stream::iter(items)),
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
        {
            let mut state = self.state.lock();
            state.calls.push(Call::PutObject {
                container: container.to_string(),
                name: name.to_string(),
                content_length,
            });
            if let Some(status) = state.failing_puts.get(name).copied() {
                return Err(ConnectionError::http(status, format!("Object PUT {} refused", name)));
            }
            if !state.containers.contains_key(container) {
                return Err(not_found("Container", container));
            }
        }

        let mut data = BytesMut::new();
        if let Some(reader) = body {
            loop {
                let chunk = reader.read(READ_SIZE).await?;
                if chunk.is_empty() {
                    break;
                }
                data.extend_from_slice(&chunk);
            }
        }
        let data = data.freeze();

        if let Some(expected) = content_length {
            if expected != data.len() as u64 {
                return Err(ConnectionError::http(
                    499,
                    format!("Client sent {} of {} bytes", data.len(), expected),
                ));
            }
        }
        let digest = etag(&data);
        if let Some(claimed) = headers.etag() {
            if claimed != digest {
                return Err(ConnectionError::http(422, "ETag does not match content"));
            }
        }

        let mut stored_headers = ObjectHeaders::new();
        for (header, value) in headers.iter().filter(|(h, _)| *h != "etag") {
            stored_headers.insert(header, value);
        }
        self.state
            .lock()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(
                name.to_string(),
                StoredObject {
                    data,
                    headers: stored_headers,
                    segments: Vec::new(),
                },
            );
        Ok(digest)
    }

    async fn delete_object(
        &self,
        container: &str,
        name: &str,
        query: Option<&str>,
    ) -> ConnectionResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::DeleteObject {
            container: container.to_string(),
            name: name.to_string(),
            query: query.map(str::to_string),
        });
        if state.failing_deletes.contains(name) {
            return Err(ConnectionError::http(503, format!("Object DELETE {} failed", name)));
        }

        let object = state.object(container, name)?.clone();
        if query == Some(DELETE_MANIFEST_QUERY) && object.headers.is_static_large_object() {
            for (segment_container, segment) in &object.segments {
                if let Some(objects) = state.containers.get_mut(segment_container) {
                    objects.remove(segment);
                }
            }
        }
        if let Some(objects) = state.containers.get_mut(container) {
            objects.remove(name);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> ConnectionResult<Vec<ObjectListing>> {
        let mut state = self.state.lock();
        state.calls.push(Call::ListObjects {
            container: container.to_string(),
            prefix: prefix.map(str::to_string),
        });
        let objects = state
            .containers
            .get(container)
            .ok_or_else(|| not_found("Container", container))?;
        Ok(objects
            .iter()
            .filter(|(n, _)| prefix.map_or(true, |p| n.starts_with(p)))
            .map(|(n, o)| ObjectListing {
                name: n.clone(),
                bytes: o.data.len() as u64,
                hash: Some(etag(&o.data)),
            })
            .collect())
    }

    async fn close(&self) {
        self.state.lock().closed += 1;
    }
}
