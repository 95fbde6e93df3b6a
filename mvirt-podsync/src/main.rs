//! mvirt-podsync: discover VM hosts through rack workers and keep pod records in sync.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mvirt_podsync::{
    CreatePodRequest, DiscoveryRequest, HttpWorker, MemoryPodStore, PodRecord, PodStore,
    PodSyncer, SqlitePodStore, SyncAuditLogger, TargetKind, WorkerHandle, WorkerRegistry,
    discover,
};

#[derive(Parser)]
#[command(name = "mvirt-podsync", version)]
#[command(about = "Discover VM hosts through rack workers and sync pod records")]
struct Args {
    /// Data directory for the pod database
    #[arg(short, long, default_value = "/var/lib/mvirt/podsync")]
    data_dir: PathBuf,

    /// Use an ephemeral in-memory store
    #[arg(long)]
    dev: bool,

    /// Per-worker discovery timeout in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a pod record
    Create {
        /// Pod name
        #[arg(long)]
        name: String,

        /// Power type (e.g. virsh, lxd)
        #[arg(long = "type")]
        pod_type: String,

        /// Power address (e.g. qemu+ssh://user@10.0.0.1/system)
        #[arg(long)]
        power_address: String,

        /// Extra power parameter (key=value, can be repeated)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        #[arg(long, default_value = "default")]
        zone: String,

        #[arg(long, default_value = "default")]
        pool: String,
    },

    /// List pods
    List,

    /// Show a pod and its worker routes
    Show {
        /// Pod ID or name
        pod: String,
    },

    /// Delete a pod
    Delete {
        /// Pod ID or name
        pod: String,
    },

    /// Discover a target without saving anything
    Discover {
        /// Power type (e.g. virsh, lxd)
        #[arg(long = "type")]
        target_type: String,

        /// Power address
        #[arg(long)]
        power_address: String,

        /// Extra power parameter (key=value, can be repeated)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Discover a power chassis instead of a pod
        #[arg(long)]
        chassis: bool,

        /// Rack worker (id=url, can be repeated)
        #[arg(long = "worker", value_parser = parse_key_val, required = true)]
        workers: Vec<(String, String)>,
    },

    /// Re-discover a pod and save the result
    Sync {
        /// Pod ID or name
        pod: String,

        /// Rack worker (id=url, can be repeated)
        #[arg(long = "worker", value_parser = parse_key_val, required = true)]
        workers: Vec<(String, String)>,

        /// Run the sync on a blocking thread
        #[arg(long)]
        blocking: bool,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected format: key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("Empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    pod_type: String,
    #[tabled(rename = "ZONE")]
    zone: String,
    #[tabled(rename = "CORES")]
    cores: u32,
    #[tabled(rename = "MEMORY")]
    memory: String,
    #[tabled(rename = "ROUTES")]
    routes: String,
}

impl From<&PodRecord> for PodRow {
    fn from(pod: &PodRecord) -> Self {
        Self {
            id: pod.id.clone(),
            name: pod.name.clone(),
            pod_type: pod.pod_type.clone(),
            zone: pod.zone.clone(),
            cores: pod.cores,
            memory: format!("{}MB", pod.memory),
            routes: format!(
                "{}/{}",
                pod.routable_workers().len(),
                pod.routable.len()
            ),
        }
    }
}

#[derive(Tabled)]
struct RouteRow {
    #[tabled(rename = "WORKER")]
    worker: String,
    #[tabled(rename = "ROUTABLE")]
    routable: bool,
}

async fn open_store(args: &Args) -> Result<Arc<dyn PodStore>> {
    if args.dev {
        info!("Using in-memory pod store");
        return Ok(Arc::new(MemoryPodStore::new()));
    }
    let store = SqlitePodStore::new(&args.data_dir)
        .await
        .context("Failed to open pod database")?;
    Ok(Arc::new(store))
}

async fn find_pod(store: &dyn PodStore, key: &str) -> Result<PodRecord> {
    if let Some(pod) = store.get_pod(key).await? {
        return Ok(pod);
    }
    store
        .get_pod_by_name(key)
        .await?
        .with_context(|| format!("Pod '{key}' not found"))
}

async fn connect_workers(specs: Vec<(String, String)>) -> Vec<Arc<dyn WorkerHandle>> {
    let client = reqwest::Client::new();
    let registry = WorkerRegistry::new();
    for (id, endpoint) in specs {
        registry
            .register(Arc::new(HttpWorker::with_client(id, endpoint, client.clone())))
            .await;
    }
    registry.snapshot().await
}

fn power_parameters(power_address: String, params: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut parameters: BTreeMap<String, String> = params.into_iter().collect();
    parameters.insert("power_address".to_string(), power_address);
    parameters
}

fn print_pod(pod: &PodRecord) {
    println!("{}", Table::new([PodRow::from(pod)]));
    if let Some(ip) = pod.ip_address {
        println!("IP address: {ip}");
    }
    if !pod.architectures.is_empty() {
        println!("Architectures: {}", pod.architectures.join(", "));
    }
    if !pod.routable.is_empty() {
        let routes: Vec<RouteRow> = pod
            .routable
            .iter()
            .map(|(worker, routable)| RouteRow {
                worker: worker.to_string(),
                routable: *routable,
            })
            .collect();
        println!("{}", Table::new(routes));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_podsync=info,sqlx=warn,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);
    let store = open_store(&args).await?;
    let audit = Arc::new(SyncAuditLogger::new());

    match args.command {
        Commands::Create {
            name,
            pod_type,
            power_address,
            params,
            zone,
            pool,
        } => {
            let pod = store
                .create_pod(CreatePodRequest {
                    name,
                    pod_type,
                    zone,
                    pool,
                    power_parameters: power_parameters(power_address, params),
                })
                .await
                .context("Failed to create pod")?;
            audit.pod_created(&pod);
            print_pod(&pod);
        }

        Commands::List => {
            let pods = store.list_pods().await?;
            let rows: Vec<PodRow> = pods.iter().map(PodRow::from).collect();
            println!("{}", Table::new(rows));
        }

        Commands::Show { pod } => {
            let pod = find_pod(store.as_ref(), &pod).await?;
            print_pod(&pod);
        }

        Commands::Delete { pod } => {
            let pod = find_pod(store.as_ref(), &pod).await?;
            store.delete_pod(&pod.id).await?;
            audit.pod_deleted(&pod.id);
            println!("Deleted pod {} ({})", pod.name, pod.id);
        }

        Commands::Discover {
            target_type,
            power_address,
            params,
            chassis,
            workers,
        } => {
            let kind = if chassis {
                TargetKind::Chassis
            } else {
                TargetKind::Pod
            };
            let workers = connect_workers(workers).await;
            let request = DiscoveryRequest::new(target_type, power_parameters(power_address, params));
            let result = discover(kind, &request, &workers, timeout).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.succeeded.is_empty() {
                bail!("No worker could discover the {kind}");
            }
        }

        Commands::Sync {
            pod,
            workers,
            blocking,
        } => {
            let pod = find_pod(store.as_ref(), &pod).await?;
            let workers = connect_workers(workers).await;
            let syncer = Arc::new(
                PodSyncer::new(Arc::clone(&store), Handle::current())
                    .with_timeout(timeout)
                    .with_audit(audit),
            );

            let result = if blocking {
                let syncer = Arc::clone(&syncer);
                tokio::task::spawn_blocking(move || syncer.sync_pod(&pod, &workers))
                    .await
                    .context("Blocking sync task failed")?
            } else {
                syncer.sync_pod_async(&pod, &workers).await
            };
            let synced = result.context("Pod sync failed")?;

            print_pod(&synced);
        }
    }

    Ok(())
}
