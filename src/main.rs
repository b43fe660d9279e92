use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;
use tracing_subscriber::{self, EnvFilter};

use edge_lb::config::Document;
use edge_lb::metrics::App as MetricsApp;
use edge_lb::service::Service;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// Path to the load balancer's YAML configuration document.
	#[arg(short, long, value_name = "file")]
	config: PathBuf,

	/// Port the `/metrics` and `/healthz` admin surface listens on.
	#[arg(long, default_value_t = 19000)]
	admin_port: u16,

	/// Enable debug-level logging.
	#[arg(long)]
	debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let default_level = if args.debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let document = Document::from_file(&args.config)?.validate()?;
	let service = Service::assemble(document)?;
	let ready = service.ready_flag();

	let mut run_set = JoinSet::new();

	let mut registry = Registry::default();
	service.metrics().register(&mut registry);
	let metrics_app = MetricsApp::new(Arc::new(registry), ready);
	let admin_listener = tokio::net::TcpListener::bind(("0.0.0.0", args.admin_port)).await?;
	run_set.spawn(async move {
		if let Err(err) = axum::serve(admin_listener, metrics_app.router()).await {
			tracing::error!(%err, "admin surface exited with error");
		}
	});

	let shutdown = async {
		shutdown_signal().await;
	};
	service.run(shutdown).await?;

	run_set.abort_all();
	while let Some(result) = run_set.join_next().await {
		if let Err(err) = result {
			if !err.is_cancelled() {
				tracing::warn!(%err, "admin task exited unexpectedly");
			}
		}
	}

	Ok(())
}

async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
		let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
		tokio::select! {
			_ = sigterm.recv() => {},
			_ = sigint.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
