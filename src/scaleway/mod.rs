//! Scaleway Block SSD backend built on the Instance API.
//!
//! Volume endpoints are called directly with `reqwest` because the
//! `scaleway-rs` crate does not expose them; server lookups go through the
//! SDK. Identifiers are zone-qualified (`<zone>/<uuid>`).

mod error;
mod types;
mod wait;

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use scaleway_rs::ScalewayApi;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::backend::{BackendFuture, VolumeBackend, VolumeError};
use crate::config::{ConfigError, ScalewayConfig};
use crate::volume::{BYTES_PER_GB, CreateOptions, Server, ServerId, Volume, VolumeId};
use error::{ApiFailure, server_lookup_error};
use types::{
    ApiVolume, CreateVolumeBody, ResizeVolumeBody, VOLUME_TYPE, VolumeEnvelope, VolumeListPage,
    VolumeRefBody, ZonedId,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
const LIST_PAGE_SIZE: u32 = 100;

/// Largest Block SSD volume the Instance API accepts, in gigabytes.
pub const MAX_VOLUME_SIZE_GB: u64 = 10_000;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// [`VolumeBackend`] backed by Scaleway Block SSD volumes.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    api_base: String,
    secret_key: String,
    project_id: String,
    zones: Vec<String>,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl ScalewayBackend {
    /// Constructs a backend from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required setting is
    /// empty.
    pub fn new(config: &ScalewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            api_base: SCALEWAY_INSTANCE_API_BASE.to_owned(),
            secret_key: config.secret_key.clone(),
            project_id: config.default_project_id.clone(),
            zones: config.zones(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn http(&self, method: Method, path: &str) -> RequestBuilder {
        HTTP_CLIENT
            .request(method, format!("{}{path}", self.api_base))
            .header("X-Auth-Token", &self.secret_key)
            .timeout(HTTP_TIMEOUT)
    }

    async fn call(request: RequestBuilder) -> Result<Response, ApiFailure> {
        let response = request
            .send()
            .await
            .map_err(|err| ApiFailure::from_transport(&err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(ApiFailure::from_response(status, &body))
    }

    async fn call_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiFailure> {
        let response = Self::call(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| ApiFailure::from_transport(&err))?;
        serde_json::from_slice(&body)
            .map_err(|err| ApiFailure::Other(format!("malformed API response: {err}")))
    }

    async fn fetch_volume(&self, id: &ZonedId) -> Result<ApiVolume, ApiFailure> {
        let path = format!("/zones/{}/volumes/{}", id.zone, id.uuid);
        let envelope: VolumeEnvelope = Self::call_json(self.http(Method::GET, &path)).await?;
        Ok(envelope.volume)
    }

    /// Lists every volume in `zone`, optionally filtered by name. The API
    /// matches names by prefix, so callers compare exactly.
    async fn list_zone(&self, zone: &str, name: Option<&str>) -> Result<Vec<ApiVolume>, ApiFailure> {
        let path = format!("/zones/{zone}/volumes");
        let mut volumes = Vec::new();
        let mut page: u32 = 1;
        loop {
            let mut request = self
                .http(Method::GET, &path)
                .query(&[("per_page", LIST_PAGE_SIZE), ("page", page)]);
            if let Some(wanted) = name {
                request = request.query(&[("name", wanted)]);
            }
            let batch: VolumeListPage = Self::call_json(request).await?;
            let received = batch.volumes.len();
            volumes.extend(batch.volumes);
            let seen = u64::try_from(volumes.len()).unwrap_or(u64::MAX);
            if received == 0 || seen >= batch.total_count {
                return Ok(volumes);
            }
            page = page.saturating_add(1);
        }
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ApiVolume>, VolumeError> {
        for zone in &self.zones {
            let found = self
                .list_zone(zone, Some(name))
                .await
                .map_err(|failure| failure.into_volume_error(name, None))?;
            if let Some(volume) = found.into_iter().find(|volume| volume.name == name) {
                return Ok(Some(volume));
            }
        }
        Ok(None)
    }

    /// Removes a volume whose creation did not complete. Failures are only
    /// logged; the caller reports the original error.
    async fn discard_unfinished(&self, id: &ZonedId) {
        let path = format!("/zones/{}/volumes/{}", id.zone, id.uuid);
        match Self::call(self.http(Method::DELETE, &path)).await {
            Ok(_) | Err(ApiFailure::VolumeNotFound) => {
                info!(volume_id = %id, "removed unfinished volume");
            }
            Err(failure) => {
                warn!(volume_id = %id, error = ?failure, "could not remove unfinished volume");
            }
        }
    }

    /// Resolves an attach the API refused because the volume already has a
    /// holder.
    async fn reconcile_attached(
        &self,
        id: &ZonedId,
        volume: &Volume,
        server: &Server,
    ) -> Result<(), VolumeError> {
        let current = self
            .fetch_volume(id)
            .await
            .map_err(|failure| failure.into_volume_error(&volume.id, Some(server.id.as_str())))?
            .into_volume();
        match current.server {
            Some(holder) if holder == server.id => Ok(()),
            Some(holder) => Err(VolumeError::AlreadyAttachedElsewhere {
                volume_id: volume.id.clone(),
                server_id: holder,
            }),
            None => Err(VolumeError::Provider {
                message: format!("volume {} reported as attached but has no server", volume.id),
            }),
        }
    }
}

fn parse_volume_id(id: &VolumeId) -> Result<ZonedId, VolumeError> {
    ZonedId::parse(id).ok_or_else(|| VolumeError::VolumeNotFound(id.to_string()))
}

fn parse_server_id(id: &ServerId) -> Result<ZonedId, VolumeError> {
    ZonedId::parse(id).ok_or_else(|| VolumeError::ServerNotFound(id.to_string()))
}

/// A volume the provider gave up on must not stand in for a new one.
fn usable(volume: ApiVolume) -> Result<Volume, VolumeError> {
    if volume.is_failed() {
        return Err(VolumeError::Provider {
            message: format!(
                "volume '{}' ({}/{}) is in error state",
                volume.name, volume.zone, volume.id
            ),
        });
    }
    Ok(volume.into_volume())
}

fn holder_is(volume: &ApiVolume, server: &ZonedId) -> bool {
    volume
        .server
        .as_ref()
        .is_some_and(|holder| holder.id.eq_ignore_ascii_case(&server.uuid.to_string()))
}

impl VolumeBackend for ScalewayBackend {
    fn create<'a>(&'a self, opts: &'a CreateOptions) -> BackendFuture<'a, Volume, VolumeError> {
        Box::pin(async move {
            if self.find_by_name(&opts.name).await?.is_some() {
                return Err(VolumeError::VolumeAlreadyExists {
                    name: opts.name.clone(),
                });
            }

            let body = CreateVolumeBody {
                name: &opts.name,
                project: &self.project_id,
                volume_type: VOLUME_TYPE,
                size: opts.min_size_gb.saturating_mul(BYTES_PER_GB),
            };
            let path = format!("/zones/{}/volumes", opts.location);
            let created: VolumeEnvelope =
                Self::call_json(self.http(Method::POST, &path).json(&body))
                    .await
                    .map_err(|failure| failure.into_volume_error(&opts.name, None))?;
            let id = ZonedId {
                zone: created.volume.zone.clone(),
                uuid: uuid::Uuid::parse_str(&created.volume.id).map_err(|err| {
                    VolumeError::Provider {
                        message: format!("API returned malformed volume id: {err}"),
                    }
                })?,
            };
            info!(volume_id = %id, "volume created, waiting until available");
            match self
                .wait_for_volume(&id, "create", ApiVolume::is_available)
                .await
            {
                Ok(volume) => Ok(volume),
                Err(err) => {
                    self.discard_unfinished(&id).await;
                    Err(err)
                }
            }
        })
    }

    fn get_by_id<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, Volume, VolumeError> {
        Box::pin(async move {
            let zoned = parse_volume_id(id)?;
            self.fetch_volume(&zoned)
                .await
                .map(ApiVolume::into_volume)
                .map_err(|failure| failure.into_volume_error(id, None))
        })
    }

    fn get_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Volume, VolumeError> {
        Box::pin(async move {
            let found = self
                .find_by_name(name)
                .await?
                .ok_or_else(|| VolumeError::VolumeNotFound(name.to_owned()))?;
            usable(found)
        })
    }

    fn list(&self) -> BackendFuture<'_, Vec<Volume>, VolumeError> {
        Box::pin(async move {
            let mut volumes = Vec::new();
            for zone in &self.zones {
                let listed = self
                    .list_zone(zone, None)
                    .await
                    .map_err(|failure| failure.into_volume_error(zone, None))?;
                volumes.extend(listed.into_iter().map(ApiVolume::into_volume));
            }
            volumes.sort_by(|left, right| left.id.cmp(&right.id));
            Ok(volumes)
        })
    }

    fn delete<'a>(&'a self, volume: &'a Volume) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let id = parse_volume_id(&volume.id)?;
            let path = format!("/zones/{}/volumes/{}", id.zone, id.uuid);
            Self::call(self.http(Method::DELETE, &path))
                .await
                .map_err(|failure| failure.into_volume_error(&volume.id, None))?;
            self.wait_until_deleted(&id).await
        })
    }

    fn attach<'a>(
        &'a self,
        volume: &'a Volume,
        server: &'a Server,
    ) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let volume_zoned = parse_volume_id(&volume.id)?;
            let server_zoned = parse_server_id(&server.id)?;
            if volume_zoned.zone != server_zoned.zone {
                return Err(VolumeError::LocationMismatch {
                    volume: volume_zoned.zone,
                    server: server_zoned.zone,
                });
            }

            let path = format!(
                "/zones/{}/servers/{}/attach-volume",
                server_zoned.zone, server_zoned.uuid
            );
            let volume_uuid = volume_zoned.uuid.to_string();
            let body = VolumeRefBody {
                volume_id: &volume_uuid,
            };
            match Self::call(self.http(Method::POST, &path).json(&body)).await {
                Ok(_) => {}
                Err(ApiFailure::AlreadyAttached) => {
                    return self.reconcile_attached(&volume_zoned, volume, server).await;
                }
                Err(failure) => {
                    return Err(failure.into_volume_error(&volume.id, Some(server.id.as_str())));
                }
            }

            self.wait_for_volume(&volume_zoned, "attach", |current| {
                holder_is(current, &server_zoned)
            })
            .await
            .map(drop)
        })
    }

    fn detach<'a>(&'a self, volume: &'a Volume) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let id = parse_volume_id(&volume.id)?;
            let current = self
                .fetch_volume(&id)
                .await
                .map_err(|failure| failure.into_volume_error(&volume.id, None))?;
            let Some(holder) = current.server else {
                return Err(VolumeError::NotAttached {
                    volume_id: volume.id.clone(),
                });
            };

            let path = format!("/zones/{}/servers/{}/detach-volume", id.zone, holder.id);
            let volume_uuid = id.uuid.to_string();
            let body = VolumeRefBody {
                volume_id: &volume_uuid,
            };
            if let Err(failure) = Self::call(self.http(Method::POST, &path).json(&body)).await {
                warn!(holder = %holder.id, "detach request rejected");
                return Err(failure.into_volume_error(&volume.id, None));
            }

            self.wait_for_volume(&id, "detach", |current| current.server.is_none())
                .await
                .map(drop)
        })
    }

    fn resize<'a>(
        &'a self,
        volume: &'a Volume,
        size_gb: u64,
    ) -> BackendFuture<'a, (), VolumeError> {
        Box::pin(async move {
            let id = parse_volume_id(&volume.id)?;
            let size = size_gb.saturating_mul(BYTES_PER_GB);
            let path = format!("/zones/{}/volumes/{}", id.zone, id.uuid);
            Self::call(
                self.http(Method::PATCH, &path)
                    .json(&ResizeVolumeBody { size }),
            )
            .await
            .map_err(|failure| failure.into_volume_error(&volume.id, None))?;

            self.wait_for_volume(&id, "resize", |current| {
                current.is_available() && current.size >= size
            })
            .await
            .map(drop)
        })
    }

    fn get_server<'a>(&'a self, id: &'a ServerId) -> BackendFuture<'a, Server, VolumeError> {
        Box::pin(async move {
            let zoned = parse_server_id(id)?;
            let mut servers = self
                .api
                .list_instances(&zoned.zone)
                .servers(&zoned.uuid.to_string())
                .per_page(1)
                .run_async()
                .await
                .map_err(|err| server_lookup_error(id, err))?;
            let server = servers
                .pop()
                .ok_or_else(|| VolumeError::ServerNotFound(id.to_string()))?;
            Ok(Server {
                id: ServerId::new(format!("{}/{}", zoned.zone, server.id)),
                location: zoned.zone,
            })
        })
    }

    fn max_volume_size_gb(&self, _location: &str) -> u64 {
        MAX_VOLUME_SIZE_GB
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotent::IdempotentVolumeService;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    const UUID: &str = "3f1c6d1e-8a5b-4c2d-9e0f-1a2b3c4d5e6f";

    /// Minimal HTTP responder that answers requests in order from a script
    /// and records `"<METHOD> <path>"` for each of them.
    struct ScriptedApi {
        base: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedApi {
        async fn start(responses: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("local addr");
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&requests);
            let mut script = VecDeque::from(responses);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let mut reader = BufReader::new(stream);
                    let Some(request) = read_request(&mut reader).await else {
                        continue;
                    };
                    seen.lock().expect("request log").push(request);
                    let (status, body) = script
                        .pop_front()
                        .unwrap_or_else(|| (500, String::from("{}")));
                    let reply = format!(
                        "HTTP/1.1 {status} OK\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let stream = reader.get_mut();
                    stream.write_all(reply.as_bytes()).await.ok();
                    stream.shutdown().await.ok();
                }
            });
            Self {
                base: format!("http://{addr}"),
                requests,
            }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().expect("request log").clone()
        }
    }

    async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.ok()?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_owned();
        let target = parts.next()?;
        let path = target.split_once('?').map_or(target, |(path, _)| path);

        let mut length = 0_usize;
        loop {
            let mut raw_header = String::new();
            reader.read_line(&mut raw_header).await.ok()?;
            let header = raw_header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().ok()?;
                }
            }
        }
        let mut body = vec![0_u8; length];
        reader.read_exact(&mut body).await.ok()?;
        Some(format!("{method} {path}"))
    }

    fn volume_json(state: &str) -> String {
        format!(
            r#"{{"id":"{UUID}","name":"data","size":10000000000,"zone":"fr-par-1","state":"{state}"}}"#
        )
    }

    fn backend(api: &ScriptedApi) -> ScalewayBackend {
        let config = ScalewayConfig {
            secret_key: String::from("secret"),
            default_project_id: String::from("project"),
            default_zone: String::from("fr-par-1"),
            zones: None,
            poll_interval_secs: 1,
            wait_timeout_secs: 5,
        };
        ScalewayBackend::new(&config)
            .expect("backend")
            .with_api_base(&api.base)
    }

    #[tokio::test]
    async fn failed_create_removes_the_unfinished_volume() {
        let api = ScriptedApi::start(vec![
            (200, String::from(r#"{"volumes":[],"total_count":0}"#)),
            (201, format!(r#"{{"volume":{}}}"#, volume_json("creating"))),
            (200, format!(r#"{{"volume":{}}}"#, volume_json("error"))),
            (204, String::new()),
        ])
        .await;

        let err = backend(&api)
            .create(&CreateOptions::new("data", 10, 0, "fr-par-1"))
            .await
            .expect_err("volume entered error state");

        assert!(matches!(err, VolumeError::Provider { .. }), "{err:?}");
        assert_eq!(
            api.requests(),
            vec![
                String::from("GET /zones/fr-par-1/volumes"),
                String::from("POST /zones/fr-par-1/volumes"),
                format!("GET /zones/fr-par-1/volumes/{UUID}"),
                format!("DELETE /zones/fr-par-1/volumes/{UUID}"),
            ]
        );
    }

    #[tokio::test]
    async fn replayed_create_does_not_reuse_a_volume_in_error_state() {
        let listing = format!(r#"{{"volumes":[{}],"total_count":1}}"#, volume_json("error"));
        let api = ScriptedApi::start(vec![(200, listing.clone()), (200, listing)]).await;
        let svc = IdempotentVolumeService::new(Arc::new(backend(&api)));

        let err = svc
            .create(&CreateOptions::new("data", 10, 0, "fr-par-1"))
            .await
            .expect_err("error-state volume is not a replay");

        assert!(matches!(err, VolumeError::Provider { .. }), "{err:?}");
        assert_eq!(api.requests().len(), 2);
    }

    #[rstest::rstest]
    #[case::available("available", true)]
    #[case::failed("error", false)]
    fn only_healthy_volumes_are_usable(#[case] state: &str, #[case] expected: bool) {
        let volume: ApiVolume = serde_json::from_str(&volume_json(state)).expect("parse");
        assert_eq!(usable(volume).is_ok(), expected);
    }
}
