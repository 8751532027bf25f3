//! Client run: plugin -> templates -> per-CPU tables -> TX workers + stats.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use xdperf_dataplane::stats::{self, SAMPLE_INTERVAL};
use xdperf_dataplane::{
    device, packet, tables, DispatchConfig, Dispatcher, PacketTemplate, SchedAffinity, XdpObjects,
};
use xdperf_plugin::{GeneratorAdapter, GeneratorOutput, GeneratorRequest, PluginHost};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    let plugin_config = config.plugin_config_bytes()?;
    let mac = device::mac_address(&config.device)
        .with_context(|| format!("failed get device {}", config.device))?;

    let host = PluginHost::new(&config.plugin_path).context("failed init plugin host")?;
    let result = drive(&config, &host, &plugin_config, mac).await;

    // Teardown always runs; a run error takes precedence over a teardown error.
    let teardown = host.close().context("failed to unload plugins");
    match (result, teardown) {
        (Err(e), Err(t)) => {
            tracing::error!(error = format!("{t:#}"), "failed to cleanup");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), teardown) => teardown,
    }
}

async fn drive(
    config: &Config,
    host: &PluginHost,
    plugin_config: &[u8],
    mac: [u8; 6],
) -> anyhow::Result<()> {
    tracing::info!(plugin = %config.plugin_name, device = %config.device, "start client mode");

    let module = host.load(&config.plugin_name).context("failed load plugin")?;
    let generator = GeneratorAdapter::new(module);
    generator.initialize(plugin_config).context("failed to initialize plugin")?;

    let request = GeneratorRequest::new(config.count, mac);
    let outputs = generator
        .generate(&request)
        .with_context(|| format!("failed to call plugin (count={})", config.count))?;
    let templates = to_templates(outputs);
    tracing::info!(entry_count = templates.len(), "plugin call successful");

    let mut objects = XdpObjects::load(&config.bpf_object).context("failed to load eBPF objects")?;
    tables::install(&mut objects.tables, &templates).context("failed to init ebpf map")?;

    let token = CancellationToken::new();
    let sampler = tokio::spawn(stats::sample(objects.stats, SAMPLE_INTERVAL, token.clone(), |rate| {
        tracing::info!(pps = rate.pps, mbps = rate.mbps, "{rate}");
    }));

    let mut dispatcher = Dispatcher::new(
        Arc::new(objects.program),
        Arc::new(SchedAffinity),
        DispatchConfig {
            parallelism: config.parallelism,
            count: config.count,
            packet: packet::sample_frame(mac),
        },
        token.clone(),
    );
    let report = dispatcher.run(shutdown_signal()).await;

    token.cancel();
    if let Err(e) = sampler.await {
        tracing::warn!(error = %e, "stats sampler ended abnormally");
    }

    let report = report.context("failed to run TX packet")?;
    let failed = report.failures().count();
    if failed > 0 {
        tracing::warn!(failed, workers = report.outcomes.len(), "some TX workers failed");
    }
    Ok(())
}

fn to_templates(outputs: Vec<GeneratorOutput>) -> Vec<PacketTemplate> {
    outputs
        .into_iter()
        .enumerate()
        .map(|(i, output)| {
            let packet = output.template.base_packet;
            tracing::debug!(
                entry_index = i,
                length = packet.length,
                tags = ?output.metadata.tags,
                "packet template"
            );
            PacketTemplate::new(packet.data, packet.length)
        })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Exec done. Shutting down client...");
}
