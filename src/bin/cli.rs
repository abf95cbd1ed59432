//! CLI for the coordination service

use clap::{Parser, Subcommand};
use coordkv::client::{
    DeleteOptions, GetOptions, KeyValue, KvBackend, LeaseId, MemoryCluster, PutOptions, Session,
    WatchOptions,
};
use coordkv::common::{parse_duration, Config};
use coordkv::tour;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coordkv")]
#[command(about = "Client for an etcd-style coordination service")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Service endpoints (comma-separated)
    #[arg(long, value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Time allowed to reach an endpoint (e.g. 5s)
    #[arg(long, value_parser = duration_arg)]
    dial_timeout: Option<Duration>,

    /// Upper bound for each request (e.g. 5s)
    #[arg(long, value_parser = duration_arg)]
    request_timeout: Option<Duration>,

    /// Run against an in-process service instead of etcd
    #[arg(long)]
    in_memory: bool,

    /// Print records as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk through every operation: put, get, delete, watch, lease
    Tour,

    /// Write a key
    Put {
        key: String,
        value: String,

        /// Bind the key to a lease (hex id)
        #[arg(long, value_parser = lease_arg)]
        lease: Option<LeaseId>,
    },

    /// Read a key or a prefix
    Get {
        key: String,

        #[arg(long)]
        prefix: bool,

        /// Maximum number of records (0 = all)
        #[arg(long, default_value = "0")]
        limit: i64,
    },

    /// Delete a key or a prefix
    Delete {
        key: String,

        #[arg(long)]
        prefix: bool,
    },

    /// Print changes to a key or a prefix
    Watch {
        key: String,

        #[arg(long)]
        prefix: bool,

        /// Include the previous value in each event
        #[arg(long)]
        prev_kv: bool,

        /// Stop after this long (default: until Ctrl-C)
        #[arg(long = "for", value_parser = duration_arg)]
        duration: Option<Duration>,
    },

    /// Create a lease
    Grant {
        /// TTL in seconds
        ttl: i64,
    },

    /// Revoke a lease and delete its keys
    Revoke {
        #[arg(value_parser = lease_arg)]
        lease: LeaseId,
    },

    /// Renew a lease for a while
    KeepAlive {
        #[arg(value_parser = lease_arg)]
        lease: LeaseId,

        #[arg(long = "for", default_value = "10s", value_parser = duration_arg)]
        duration: Duration,
    },

    /// Show the remaining TTL of a lease
    Ttl {
        #[arg(value_parser = lease_arg)]
        lease: LeaseId,
    },

    /// Print the effective configuration
    Config,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn lease_arg(s: &str) -> Result<LeaseId, String> {
    LeaseId::parse(s).map_err(|e| e.to_string())
}

fn record_json(kv: &KeyValue) -> serde_json::Value {
    serde_json::json!({
        "key": kv.key_str(),
        "value": kv.value_str(),
        "create_revision": kv.create_revision,
        "mod_revision": kv.mod_revision,
        "version": kv.version,
        "lease": kv.lease_id().map(|id| id.to_string()),
    })
}

fn print_records(kvs: &[KeyValue], json: bool) -> anyhow::Result<()> {
    if json {
        let records: Vec<_> = kvs.iter().map(record_json).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for kv in kvs {
            println!("{}", kv);
        }
    }
    Ok(())
}

async fn execute<B: KvBackend>(
    session: &Session<B>,
    command: Commands,
    config: &Config,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Tour => {
            let report = tour::run(session, &config.tour).await?;
            println!("Tour report:");
            println!("  Fetched: {} record(s)", report.fetched.len());
            println!("  Listed: {} record(s)", report.listed.len());
            println!("  Deleted (exact): {}", report.deleted_exact);
            println!("  Deleted (prefix): {}", report.deleted_prefix);
            println!("  Lease: {}", report.lease);
            println!("  Keep-alive renewals: {}", report.keep_alive_acks);
            println!("  Records after revoke: {}", report.after_revoke.len());
            println!("  Key events: {}", report.key_events.len());
            println!("  Namespace events: {}", report.namespace_events.len());
            println!("  Lease key events: {}", report.lease_key_events.len());
        }

        Commands::Put { key, value, lease } => {
            let mut options = PutOptions::new();
            if let Some(lease) = lease {
                options = options.with_lease(lease);
            }
            let resp = session.put(&key, &value, options).await?;
            println!("OK (revision {})", resp.revision);
        }

        Commands::Get { key, prefix, limit } => {
            let mut options = GetOptions::new().with_limit(limit);
            if prefix {
                options = options.with_prefix();
            }
            let resp = session.get(&key, options).await?;
            print_records(&resp.kvs, json)?;
        }

        Commands::Delete { key, prefix } => {
            let mut options = DeleteOptions::new();
            if prefix {
                options = options.with_prefix();
            }
            let resp = session.delete(&key, options).await?;
            println!("{}", resp.deleted);
        }

        Commands::Watch {
            key,
            prefix,
            prev_kv,
            duration,
        } => {
            let mut options = WatchOptions::new();
            if prefix {
                options = options.with_prefix();
            }
            if prev_kv {
                options = options.with_prev_kv();
            }
            let mut subscription = session.watch(&key, options).await?;
            let deadline = async {
                match duration {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    batch = subscription.next() => match batch {
                        Some(batch) => {
                            for event in batch?.events {
                                println!("{}", event);
                            }
                        }
                        None => break,
                    },
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            subscription.cancel();
        }

        Commands::Grant { ttl } => {
            let grant = session.grant(ttl).await?;
            println!("lease {} granted with TTL({}s)", grant.id, grant.ttl);
        }

        Commands::Revoke { lease } => {
            session.revoke(lease).await?;
            println!("lease {} revoked", lease);
        }

        Commands::KeepAlive { lease, duration } => {
            let mut keep_alive = session.keep_alive(lease).await?;
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    ack = keep_alive.next() => match ack {
                        Some(ack) => {
                            let ack = ack?;
                            println!("lease {} keepalived with TTL({})", ack.id, ack.ttl);
                        }
                        None => {
                            println!("lease {} expired or revoked", lease);
                            break;
                        }
                    },
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            keep_alive.cancel();
        }

        Commands::Ttl { lease } => match session.time_to_live(lease).await? {
            Some(ttl) => println!("lease {} granted with TTL remaining({}s)", lease, ttl),
            None => println!("lease {} already expired", lease),
        },

        // Printed before connecting
        Commands::Config => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and environment, then override with CLI arguments
    let mut config = Config::load(cli.config.as_deref())?;
    if !cli.endpoints.is_empty() {
        config.client.endpoints = cli.endpoints;
    }
    if let Some(timeout) = cli.dial_timeout {
        config.client.dial_timeout = timeout;
    }
    if let Some(timeout) = cli.request_timeout {
        config.client.request_timeout = timeout;
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if cli.in_memory {
        let cluster = MemoryCluster::new();
        let session = Session::new(cluster.connect(), config.client.request_timeout);
        execute(&session, cli.command, &config, cli.json).await
    } else {
        let session = Session::connect(&config.client).await?;
        execute(&session, cli.command, &config, cli.json).await
    }
}
