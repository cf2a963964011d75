use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_api::cluster::{KubeSources, MetricsServer};
use keel_api::{
    CancellationToken, DetailConfig, DetailError, DetailOrchestrator, MetricsSource, NoMetrics, ResourceIdentity,
    Schedule, Sources, StatefulSetDetail,
};
use keel_core::dataselect::{DataSelectQuery, FilterQuery, MetricQuery, PaginationQuery, SortQuery};
use tokio::signal;
use tracing::{info, warn};

const EXIT_NOT_FOUND: i32 = 2;
const EXIT_UPSTREAM: i32 = 3;
const EXIT_CANCELLED: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: "default")
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the aggregated detail view of a resource
    Describe {
        #[command(subcommand)]
        target: Target,
    },
}

#[derive(Subcommand, Debug)]
enum Target {
    /// StatefulSet with its pods, pod counts, images and events
    #[command(alias = "sts")]
    Statefulset {
        name: String,
        #[command(flatten)]
        select: SelectArgs,
        /// sequential | concurrent (default from KEEL_DETAIL_SCHEDULE)
        #[arg(long = "schedule")]
        schedule: Option<Schedule>,
        /// Give up after this many seconds; 0 waits for Ctrl-C
        #[arg(long = "timeout-secs")]
        timeout_secs: Option<u64>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct SelectArgs {
    /// Pod sort, e.g. "a,name,d,creationTimestamp"
    #[arg(long = "sort")]
    sort: Option<String>,
    /// Pod filter, e.g. "name,web,status,Running"
    #[arg(long = "filter")]
    filter: Option<String>,
    /// Zero-based pod page (requires --per-page)
    #[arg(long = "page", default_value_t = 0)]
    page: usize,
    #[arg(long = "per-page")]
    per_page: Option<usize>,
    /// Skip metrics.k8s.io
    #[arg(long = "no-metrics", action = ArgAction::SetTrue)]
    no_metrics: bool,
}

impl SelectArgs {
    fn to_query(&self, metrics: bool) -> Result<DataSelectQuery> {
        let sort = match self.sort.as_deref() {
            Some(s) => SortQuery::parse(s).context("parsing --sort")?,
            None => SortQuery::default(),
        };
        let filter = match self.filter.as_deref() {
            Some(s) => FilterQuery::parse(s).context("parsing --filter")?,
            None => FilterQuery::default(),
        };
        let pagination = self.per_page.map(|n| PaginationQuery::new(n, self.page));
        let metrics = (metrics && !self.no_metrics).then(MetricQuery::standard);
        Ok(DataSelectQuery { pagination, sort, filter, metrics })
    }
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

/// Start the Prometheus exporter when the config names a listen address.
fn init_metrics(cfg: &DetailConfig) {
    match cfg.metrics_addr {
        Some(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
            Ok(()) => info!(addr = %sock, "metrics exporter listening"),
            Err(e) => warn!(addr = %sock, error = %e, "metrics exporter not started"),
        },
        None if std::env::var_os("KEEL_METRICS_ADDR").is_some() => {
            warn!("KEEL_METRICS_ADDR is not host:port; metrics exporter disabled")
        }
        None => {}
    }
}

/// Cancel `token` on Ctrl-C or once `timeout` elapses.
fn spawn_canceller(token: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => info!("interrupted; cancelling"),
            _ = deadline => warn!(timeout_secs = timeout.map(|d| d.as_secs()), "deadline reached; cancelling"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
}

fn exit_code(e: &DetailError) -> i32 {
    match e {
        DetailError::NotFound(_) => EXIT_NOT_FOUND,
        DetailError::Upstream { .. } => EXIT_UPSTREAM,
        DetailError::Cancelled => EXIT_CANCELLED,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = DetailConfig::from_env();
    init_metrics(&cfg);
    let cli = Cli::parse();

    match cli.command {
        Commands::Describe { target: Target::Statefulset { name, select, schedule, timeout_secs } } => {
            let ns = cli.namespace.unwrap_or_else(|| "default".to_string());
            let identity = ResourceIdentity::new(ns, name);
            let selection = select.to_query(cfg.metrics)?;
            let timeout = match timeout_secs {
                Some(0) => None,
                Some(s) => Some(Duration::from_secs(s)),
                None => cfg.timeout,
            };
            let kube = KubeSources::try_default().await?;
            let metrics: Box<dyn MetricsSource> =
                if selection.wants_metrics() { Box::new(MetricsServer::new(kube.client())) } else { Box::new(NoMetrics) };
            let orch = DetailOrchestrator::new(Sources::from_backend(Arc::new(kube))).with_schedule(schedule.unwrap_or(cfg.schedule));
            info!(sts = %identity, schedule = ?orch.schedule(), timeout_secs = timeout.map(|d| d.as_secs()), "describe statefulset invoked");

            let cancel = CancellationToken::new();
            spawn_canceller(cancel.clone(), timeout);
            let res = orch.get_detail(&identity, metrics.as_ref(), &selection, &cancel).await;
            cancel.cancel();

            match res {
                Ok(detail) => match cli.output {
                    Output::Human => print!("{}", render_detail(&detail, Utc::now())),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&detail)?),
                },
                Err(e) => {
                    eprintln!("describe error: {}", e);
                    std::process::exit(exit_code(&e));
                }
            }
        }
    }

    Ok(())
}

fn render_detail(d: &StatefulSetDetail, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let meta = &d.object_meta;
    let _ = writeln!(out, "Kind:         {}", d.type_meta.kind.as_str());
    let _ = writeln!(out, "Name:         {}", meta.name);
    let _ = writeln!(out, "Namespace:    {}", meta.namespace.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "Age:          {}", render_age(meta.creation_timestamp, now));
    let labels: Vec<String> = meta.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let _ = writeln!(out, "Labels:       {}", if labels.is_empty() { "<none>".to_string() } else { labels.join(",") });
    let _ = writeln!(out, "Images:       {}", if d.container_images.is_empty() { "<none>".to_string() } else { d.container_images.join(", ") });
    let p = &d.pod_info;
    let desired = p.desired.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    let _ = writeln!(out, "Replicas:     {} current / {} desired", p.current, desired);
    let _ = writeln!(
        out,
        "Pods Status:  {} Running / {} Pending / {} Succeeded / {} Failed",
        p.running, p.pending, p.succeeded, p.failed
    );

    let _ = writeln!(out, "\nPods ({} of {}):", d.pod_list.pods.len(), d.pod_list.list_meta.total_items);
    if d.pod_list.pods.is_empty() {
        let _ = writeln!(out, "  <none>");
    } else {
        let _ = writeln!(out, "  {:<32} {:<20} {:>8} {:<20} {:>8} {:>10} {:>6}", "NAME", "STATUS", "RESTARTS", "NODE", "CPU", "MEMORY", "AGE");
        for pod in &d.pod_list.pods {
            let (cpu, mem) = match pod.metrics {
                Some(m) => (format!("{}m", m.cpu_millicores), format!("{}Mi", m.memory_bytes / (1024 * 1024))),
                None => ("-".to_string(), "-".to_string()),
            };
            let _ = writeln!(
                out,
                "  {:<32} {:<20} {:>8} {:<20} {:>8} {:>10} {:>6}",
                pod.object_meta.name,
                pod.status,
                pod.restart_count,
                pod.node_name.as_deref().unwrap_or("-"),
                cpu,
                mem,
                render_age(pod.object_meta.creation_timestamp, now)
            );
        }
    }
    if let Some(m) = d.pod_list.cumulative_metrics {
        let _ = writeln!(out, "  total: cpu {}m, memory {}Mi", m.cpu_millicores, m.memory_bytes / (1024 * 1024));
    }

    let _ = writeln!(out, "\nEvents ({}):", d.event_list.list_meta.total_items);
    if d.event_list.events.is_empty() {
        let _ = writeln!(out, "  <none>");
    } else {
        let _ = writeln!(out, "  {:<8} {:<24} {:>6} {:<28} MESSAGE", "TYPE", "REASON", "AGE", "FROM");
        for ev in &d.event_list.events {
            let _ = writeln!(
                out,
                "  {:<8} {:<24} {:>6} {:<28} {}",
                ev.type_,
                ev.reason,
                render_age(ev.last_seen.or(ev.first_seen), now),
                ev.source_component,
                ev.message
            );
        }
    }
    out
}

fn render_age(ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(ts) = ts else { return "-".to_string() };
    let mut secs = (now - ts).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use keel_core::{ListMeta, ObjectMeta, PodInfo, PodList, PodSummary, ResourceKind, TypeMeta};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid ts")
    }

    #[test]
    fn age_formats_largest_units() {
        let now = at(0);
        assert_eq!(render_age(None, now), "-");
        assert_eq!(render_age(Some(at(-42)), now), "42s");
        assert_eq!(render_age(Some(at(-125)), now), "2m");
        assert_eq!(render_age(Some(at(-(3 * 3600 + 60 * 5))), now), "3h5m");
        assert_eq!(render_age(Some(at(-(2 * 86_400 + 3600))), now), "2d1h");
        assert_eq!(render_age(Some(at(10)), now), "0s");
    }

    #[test]
    fn select_args_build_query() {
        let args = SelectArgs {
            sort: Some("d,name".into()),
            filter: Some("status,Running".into()),
            page: 1,
            per_page: Some(5),
            no_metrics: false,
        };
        let q = args.to_query(true).expect("query");
        assert_eq!(q.pagination, Some(PaginationQuery::new(5, 1)));
        assert_eq!(q.sort.by.len(), 1);
        assert!(!q.sort.by[0].ascending);
        assert!(q.wants_metrics());
        assert!(!args.to_query(false).expect("query").wants_metrics());

        let bad = SelectArgs { sort: Some("x,name".into()), ..Default::default() };
        assert!(bad.to_query(true).is_err());
    }

    #[test]
    fn human_output_lists_images_pods_and_events() {
        let pod = PodSummary {
            object_meta: ObjectMeta { name: "web-0".into(), creation_timestamp: Some(at(-60)), ..Default::default() },
            type_meta: TypeMeta::new(ResourceKind::Pod),
            status: "Running".into(),
            restart_count: 1,
            node_name: Some("node-a".into()),
            metrics: None,
        };
        let d = StatefulSetDetail {
            object_meta: ObjectMeta { name: "web".into(), namespace: Some("ns1".into()), ..Default::default() },
            type_meta: TypeMeta::new(ResourceKind::StatefulSet),
            pod_info: PodInfo { current: 1, desired: Some(2), running: 1, ..Default::default() },
            pod_list: PodList { list_meta: ListMeta { total_items: 1 }, cumulative_metrics: None, pods: vec![pod] },
            container_images: vec!["nginx:1.14".into()],
            event_list: Default::default(),
        };
        let out = render_detail(&d, at(0));
        assert!(out.starts_with("Kind:         statefulset\n"));
        assert!(out.contains("Namespace:    ns1"));
        assert!(out.contains("Images:       nginx:1.14"));
        assert!(out.contains("1 current / 2 desired"));
        assert!(out.contains("web-0"));
        assert!(out.contains("node-a"));
        assert!(out.contains("Events (0):\n  <none>"));
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(exit_code(&DetailError::NotFound("x".into())), EXIT_NOT_FOUND);
        assert_eq!(exit_code(&DetailError::Cancelled), EXIT_CANCELLED);
    }
}
