//! Cache handle backed directly by the dispatcher.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hotrod_core::protocol::constants::*;
use hotrod_core::protocol::{
    Expiration, MetadataValue, Request, Response, ResponseBody, VersionedValue,
};
use hotrod_core::{HotRodError, Result};

use super::{
    RemoteCacheOperations, ServerStatistics, VersionedOperationResponse,
    VersionedOperationStatus, WriteResult,
};
use crate::dispatcher::OperationDispatcher;
use crate::listener::{add_listener_request, ClientCacheListener, ListenerId, ListenerRegistry};

/// A handle on one remote cache.
///
/// Cheap to clone; clones share the dispatcher and listener registry of
/// the manager that created them.
#[derive(Debug, Clone)]
pub struct RemoteCache {
    name: String,
    dispatcher: Arc<OperationDispatcher>,
    listeners: Arc<ListenerRegistry>,
    flags: u32,
}

impl RemoteCache {
    pub(crate) fn new(
        name: impl Into<String>,
        dispatcher: Arc<OperationDispatcher>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let flags = if dispatcher.config().force_return_values() {
            FLAG_FORCE_RETURN_VALUE
        } else {
            0
        };
        Self {
            name: name.into(),
            dispatcher,
            listeners,
            flags,
        }
    }

    /// Returns a handle sending `flags` with every operation.
    pub fn with_flags(&self, flags: u32) -> Self {
        Self {
            flags,
            ..self.clone()
        }
    }

    /// Returns a handle that asks the server for previous values.
    pub fn with_force_return_value(&self) -> Self {
        self.with_flags(self.flags | FLAG_FORCE_RETURN_VALUE)
    }

    /// Flags sent with every operation.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Whether previous values are requested on writes.
    pub fn force_return_value(&self) -> bool {
        self.flags & FLAG_FORCE_RETURN_VALUE != 0
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        self.dispatcher
            .execute(&self.name, self.flags, request)
            .await
    }
}

fn previous(response: &Response) -> Option<Bytes> {
    match &response.body {
        ResponseBody::Previous(value) => value.clone(),
        _ => None,
    }
}

fn write_result(response: &Response) -> WriteResult {
    WriteResult {
        executed: is_success(response.status()),
        previous: previous(response),
    }
}

fn versioned_response(response: &Response) -> VersionedOperationResponse {
    let status = match response.status() {
        KEY_DOES_NOT_EXIST_STATUS => VersionedOperationStatus::NoSuchKey,
        s if is_success(s) => VersionedOperationStatus::Success,
        _ => VersionedOperationStatus::ModifiedKey,
    };
    VersionedOperationResponse {
        value: previous(response),
        status,
    }
}

fn unexpected(operation: &str, status: u8) -> HotRodError {
    HotRodError::Protocol(format!(
        "unexpected {} response body with status {}",
        operation,
        status_name(status)
    ))
}

#[async_trait]
impl RemoteCacheOperations for RemoteCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: Bytes) -> Result<Option<Bytes>> {
        let response = self.execute(Request::Get { key }).await?;
        let status = response.status();
        match response.body {
            ResponseBody::Value(value) => Ok(value),
            _ if status == KEY_DOES_NOT_EXIST_STATUS => Ok(None),
            _ => Err(unexpected("get", status)),
        }
    }

    async fn get_with_version(&self, key: Bytes) -> Result<Option<VersionedValue>> {
        let response = self.execute(Request::GetWithVersion { key }).await?;
        let status = response.status();
        match response.body {
            ResponseBody::Versioned(value) => Ok(Some(value)),
            _ if status == KEY_DOES_NOT_EXIST_STATUS => Ok(None),
            _ => Err(unexpected("get_with_version", status)),
        }
    }

    async fn get_with_metadata(&self, key: Bytes) -> Result<Option<MetadataValue>> {
        let response = self.execute(Request::GetWithMetadata { key }).await?;
        let status = response.status();
        match response.body {
            ResponseBody::Metadata(value) => Ok(Some(value)),
            _ if status == KEY_DOES_NOT_EXIST_STATUS => Ok(None),
            _ => Err(unexpected("get_with_metadata", status)),
        }
    }

    async fn contains_key(&self, key: Bytes) -> Result<bool> {
        let response = self.execute(Request::ContainsKey { key }).await?;
        Ok(response.status() == NO_ERROR_STATUS)
    }

    async fn put_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<Option<Bytes>> {
        let response = self
            .execute(Request::Put {
                key,
                value,
                expiration,
            })
            .await?;
        Ok(previous(&response))
    }

    async fn put_if_absent_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<WriteResult> {
        let response = self
            .execute(Request::PutIfAbsent {
                key,
                value,
                expiration,
            })
            .await?;
        Ok(write_result(&response))
    }

    async fn replace_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: Expiration,
    ) -> Result<WriteResult> {
        let response = self
            .execute(Request::Replace {
                key,
                value,
                expiration,
            })
            .await?;
        Ok(write_result(&response))
    }

    async fn replace_with_version(
        &self,
        key: Bytes,
        value: Bytes,
        version: i64,
    ) -> Result<VersionedOperationResponse> {
        let response = self
            .execute(Request::ReplaceIfUnmodified {
                key,
                value,
                version,
                expiration: Expiration::NONE,
            })
            .await?;
        Ok(versioned_response(&response))
    }

    async fn remove(&self, key: Bytes) -> Result<WriteResult> {
        let response = self.execute(Request::Remove { key }).await?;
        Ok(write_result(&response))
    }

    async fn remove_with_version(
        &self,
        key: Bytes,
        version: i64,
    ) -> Result<VersionedOperationResponse> {
        let response = self
            .execute(Request::RemoveIfUnmodified { key, version })
            .await?;
        Ok(versioned_response(&response))
    }

    async fn clear(&self) -> Result<()> {
        self.execute(Request::Clear).await?;
        Ok(())
    }

    async fn size(&self) -> Result<u64> {
        let response = self.execute(Request::Size).await?;
        let status = response.status();
        match response.body {
            ResponseBody::Size(size) => Ok(size),
            _ => Err(unexpected("size", status)),
        }
    }

    async fn stats(&self) -> Result<ServerStatistics> {
        let response = self.execute(Request::Stats).await?;
        let status = response.status();
        match response.body {
            ResponseBody::Stats(entries) => Ok(ServerStatistics::new(entries)),
            _ => Err(unexpected("stats", status)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.execute(Request::Ping).await?;
        Ok(())
    }

    async fn add_client_listener(
        &self,
        listener: Arc<dyn ClientCacheListener>,
    ) -> Result<ListenerId> {
        let server = self
            .dispatcher
            .tracker()
            .route(&self.name, None, &HashSet::new())
            .ok_or_else(|| {
                HotRodError::Connection(format!(
                    "no server available to register a listener on cache '{}'",
                    self.name
                ))
            })?;

        // Registered first so events sent before the ack are not dropped.
        let id = ListenerId::new();
        self.listeners
            .register(id, &self.name, server.clone(), listener);

        match self
            .dispatcher
            .execute_on_connection(&server, &self.name, self.flags, add_listener_request(id))
            .await
        {
            Ok((_, connection)) => {
                self.listeners.bind(&id, server.clone(), connection);
                tracing::debug!(
                    cache = %self.name,
                    listener = %id,
                    server = %server,
                    "listener added"
                );
                Ok(id)
            }
            Err(e) => {
                self.listeners.unregister(&id);
                Err(e)
            }
        }
    }

    async fn remove_client_listener(&self, id: ListenerId) -> Result<()> {
        let Some(server) = self.listeners.server_of(&id) else {
            return Ok(());
        };
        let request = Request::RemoveClientListener {
            listener_id: id.to_bytes(),
        };
        let result = self
            .dispatcher
            .execute_on(&server, &self.name, self.flags, request)
            .await;
        self.listeners.unregister(&id);
        result.map(|_| ())
    }
}
