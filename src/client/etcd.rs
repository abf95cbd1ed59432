//! etcd v3 backend
//!
//! Unary calls map one-to-one onto `etcd-client` requests. Watches and
//! keep-alives run as pump tasks that forward into a [`Feed`] channel and stop
//! when the feed goes away or the backend shuts down.

use crate::client::{
    renewal_interval, DeleteOptions, DeleteResponse, EventKind, Feed, GetOptions, GetResponse,
    KeepAlive, KeepAliveAck, KeyValue, KvBackend, LeaseGrant, LeaseId, PutOptions, PutResponse,
    Subscription, WatchBatch, WatchEvent, WatchOptions,
};
use crate::common::{display_bytes, format_duration, ClientConfig, Error, Result};
use bytes::Bytes;
use etcd_client::{Client, ConnectOptions, EventType};
use tokio::sync::{mpsc, watch};

pub struct EtcdBackend {
    client: Client,
    shutdown: watch::Sender<bool>,
}

impl EtcdBackend {
    /// Dial the cluster and probe it with a status request, all within the
    /// dial timeout.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        tracing::info!("Connecting to {}", config.endpoints.join(","));

        let options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout)
            .with_timeout(config.request_timeout);
        let dial = async {
            let mut client = Client::connect(&config.endpoints, Some(options)).await?;
            let status = client.status().await?;
            Ok::<_, etcd_client::Error>((client, status))
        };

        let (client, status) = match tokio::time::timeout(config.dial_timeout, dial).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(Error::Connection(e.to_string())),
            Err(_) => {
                return Err(Error::Connection(format!(
                    "no endpoint reachable within {}",
                    format_duration(config.dial_timeout)
                )))
            }
        };
        tracing::info!(
            "Connected to etcd {} (leader {:x})",
            status.version(),
            status.leader()
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Self { client, shutdown })
    }

    fn client(&self) -> Result<Client> {
        if *self.shutdown.borrow() {
            return Err(Error::SessionClosed);
        }
        Ok(self.client.clone())
    }
}

fn record(kv: &etcd_client::KeyValue) -> KeyValue {
    KeyValue {
        key: Bytes::copy_from_slice(kv.key()),
        value: Bytes::copy_from_slice(kv.value()),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
        lease: kv.lease(),
    }
}

fn event_kind(kind: EventType) -> EventKind {
    match kind {
        EventType::Put => EventKind::Put,
        EventType::Delete => EventKind::Delete,
    }
}

fn event(ev: &etcd_client::Event) -> Option<WatchEvent> {
    Some(WatchEvent {
        kind: event_kind(ev.event_type()),
        kv: record(ev.kv()?),
        prev_kv: ev.prev_kv().map(record),
    })
}

/// etcd reports a missing lease as a plain status message
fn lease_error(id: LeaseId, e: etcd_client::Error) -> Error {
    match Error::from(e) {
        Error::Request(msg) if msg.contains("lease not found") => Error::LeaseNotFound(id),
        other => other,
    }
}

#[tonic::async_trait]
impl KvBackend for EtcdBackend {
    async fn put(&self, key: Bytes, value: Bytes, options: PutOptions) -> Result<PutResponse> {
        let mut request = etcd_client::PutOptions::new();
        if let Some(lease) = options.lease {
            request = request.with_lease(lease.get());
        }
        if options.prev_kv {
            request = request.with_prev_key();
        }

        let resp = self
            .client()?
            .put(key.to_vec(), value.to_vec(), Some(request))
            .await
            .map_err(|e| match options.lease {
                Some(id) => lease_error(id, e),
                None => e.into(),
            })?;
        Ok(PutResponse {
            revision: resp.header().map_or(0, |h| h.revision()),
            prev_kv: resp.prev_key().map(record),
        })
    }

    async fn get(&self, key: Bytes, options: GetOptions) -> Result<GetResponse> {
        let mut request = etcd_client::GetOptions::new();
        if options.prefix {
            request = request.with_prefix();
        }
        if options.limit > 0 {
            request = request.with_limit(options.limit);
        }

        let resp = self.client()?.get(key.to_vec(), Some(request)).await?;
        Ok(GetResponse {
            revision: resp.header().map_or(0, |h| h.revision()),
            kvs: resp.kvs().iter().map(record).collect(),
            count: resp.count(),
        })
    }

    async fn delete(&self, key: Bytes, options: DeleteOptions) -> Result<DeleteResponse> {
        let mut request = etcd_client::DeleteOptions::new();
        if options.prefix {
            request = request.with_prefix();
        }
        if options.prev_kv {
            request = request.with_prev_key();
        }

        let resp = self.client()?.delete(key.to_vec(), Some(request)).await?;
        Ok(DeleteResponse {
            revision: resp.header().map_or(0, |h| h.revision()),
            deleted: resp.deleted(),
            prev_kvs: resp.prev_kvs().iter().map(record).collect(),
        })
    }

    async fn watch(&self, key: Bytes, options: WatchOptions) -> Result<Subscription> {
        let mut request = etcd_client::WatchOptions::new();
        if options.prefix {
            request = request.with_prefix();
        }
        if options.prev_kv {
            request = request.with_prev_key();
        }

        let (mut watcher, mut stream) = self.client()?.watch(key.to_vec(), Some(request)).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shutdown = self.shutdown.subscribe();
        let label = display_bytes(&key);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = shutdown.changed() => break,
                    message = stream.message() => match message {
                        Ok(Some(resp)) => {
                            if resp.canceled() {
                                let _ = tx.send(Err(Error::Request(format!(
                                    "watch on {} canceled by server: {}",
                                    label,
                                    resp.cancel_reason()
                                ))));
                                break;
                            }
                            let events: Vec<WatchEvent> =
                                resp.events().iter().filter_map(event).collect();
                            // The creation notice carries no events
                            if events.is_empty() {
                                continue;
                            }
                            let batch = WatchBatch {
                                revision: resp.header().map_or(0, |h| h.revision()),
                                events,
                            };
                            if tx.send(Ok(batch)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e.into()));
                            break;
                        }
                    }
                }
            }
            if let Err(e) = watcher.cancel().await {
                tracing::debug!("Cancelling watch on {} failed: {}", label, e);
            }
            tracing::debug!("Watch on {} stopped", label);
        });

        Ok(Feed::new(rx))
    }

    async fn grant(&self, ttl: i64) -> Result<LeaseGrant> {
        let resp = self.client()?.lease_grant(ttl, None).await?;
        Ok(LeaseGrant {
            id: LeaseId::new(resp.id()),
            ttl: resp.ttl(),
        })
    }

    async fn keep_alive(&self, id: LeaseId) -> Result<KeepAlive> {
        let (mut keeper, mut stream) = self
            .client()?
            .lease_keep_alive(id.get())
            .await
            .map_err(|e| lease_error(id, e))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                if let Err(e) = keeper.keep_alive().await {
                    let _ = tx.send(Err(lease_error(id, e)));
                    break;
                }
                let ttl = tokio::select! {
                    _ = tx.closed() => break,
                    _ = shutdown.changed() => break,
                    message = stream.message() => match message {
                        Ok(Some(resp)) => resp.ttl(),
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(lease_error(id, e)));
                            break;
                        }
                    }
                };
                if ttl <= 0 {
                    tracing::warn!("Lease {} expired, keep-alive stopped", id);
                    break;
                }
                if tx.send(Ok(KeepAliveAck { id, ttl })).is_err() {
                    break;
                }
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(renewal_interval(ttl)) => {}
                }
            }
            tracing::debug!("Keep-alive for lease {} stopped", id);
        });

        Ok(Feed::new(rx))
    }

    async fn revoke(&self, id: LeaseId) -> Result<()> {
        self.client()?
            .lease_revoke(id.get())
            .await
            .map_err(|e| lease_error(id, e))?;
        Ok(())
    }

    async fn time_to_live(&self, id: LeaseId) -> Result<Option<i64>> {
        match self.client()?.lease_time_to_live(id.get(), None).await {
            Ok(resp) if resp.ttl() >= 0 => Ok(Some(resp.ttl())),
            Ok(_) => Ok(None),
            Err(e) => match lease_error(id, e) {
                Error::LeaseNotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
