use clap::Parser;
use erdp::ErrorDisplay;
use pppoe_ac_disc::config::{
    parse_interface_spec, parse_pado_delay, GlobalConfig, IfnameInSid, InterfaceOptions,
};
use pppoe_ac_disc::ppp::NullPppEngine;
use pppoe_ac_disc::registry::Registry;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// PPPoE Access Concentrator discovery engine.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Interface to listen on, as `ifname[,k=v[,k=v...]]`. May be given
    /// more than once to serve several interfaces from one process.
    #[arg(short = 'i', long = "interface", required = true)]
    interfaces: Vec<String>,

    /// AC-Name carried in every PADO/PADS.
    #[arg(long, default_value = "accel-ppp")]
    ac_name: String,

    /// Service name this AC offers; may be given more than once. With
    /// none given, any client-requested name is accepted.
    #[arg(long = "service-name")]
    service_names: Vec<String>,

    /// Echo back only the service name the client asked for, instead of
    /// the full configured list, in PADO.
    #[arg(long)]
    reply_exact_service: bool,

    /// Fold the interface name into PPP calling/called-station-id:
    /// off, called, calling, or both.
    #[arg(long, default_value = "off")]
    ifname_in_sid: String,

    /// PADO delay: `-1` never replies, `0` replies immediately, `N`
    /// delays N ms, or a staircase `n1:d1,n2:d2,...` keyed by active
    /// session count.
    #[arg(long, default_value = "0")]
    pado_delay: String,

    /// Capture TR-101 vendor-specific tags (circuit-id/remote-id) onto
    /// sessions for the PPP engine to read back.
    #[arg(long)]
    tr101: bool,

    /// Default per-interface PADI sliding-window limit, `0` disables it.
    #[arg(long, default_value_t = 0)]
    padi_limit: u32,

    /// Process-wide PADI cap shared across every interface, `0` disables
    /// it.
    #[arg(long, default_value_t = 0)]
    padi_limit_total: u32,

    /// Enable TRACE-level packet hex dumps.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_ifname_in_sid(s: &str) -> Result<IfnameInSid, String> {
    match s {
        "off" => Ok(IfnameInSid::Off),
        "called" => Ok(IfnameInSid::CalledSid),
        "calling" => Ok(IfnameInSid::CallingSid),
        "both" => Ok(IfnameInSid::Both),
        other => Err(format!("invalid ifname-in-sid value: {other}")),
    }
}

fn apply_interface_options(global: &GlobalConfig, opts: &InterfaceOptions) -> GlobalConfig {
    let mut cfg = global.clone();
    if let Some(limit) = opts.padi_limit {
        cfg.padi_limit = limit;
    }
    if !opts.service_names.is_empty() {
        cfg.service_names = opts.service_names.clone();
    }
    cfg
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let ifname_in_sid = match parse_ifname_in_sid(&args.ifname_in_sid) {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let pado_delay = match parse_pado_delay(&args.pado_delay) {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let global = GlobalConfig {
        ac_name: args.ac_name,
        service_names: args.service_names,
        reply_exact_service: args.reply_exact_service,
        ifname_in_sid,
        pado_delay,
        tr101: args.tr101,
        padi_limit: args.padi_limit,
        global_padi_limit: args.padi_limit_total,
    };

    let specs = match args
        .interfaces
        .iter()
        .map(|s| parse_interface_spec(s))
        .collect::<Result<Vec<InterfaceOptions>, _>>()
    {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // PPP/LCP negotiation lives outside this crate; NullPppEngine is the
    // placeholder wiring until a real engine is plugged in.
    let registry = Registry::new(Arc::new(NullPppEngine));

    for opts in &specs {
        let cfg = apply_interface_options(&global, opts);
        if let Err(e) = registry.start(opts.ifname.clone(), &cfg).await {
            error!("failed to start interface {}: {}", opts.ifname, e.display());
            return ExitCode::FAILURE;
        }
    }

    info!(count = specs.len(), "PPPoE discovery engine running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to wait for ctrl-c: {}", e.display());
    }

    info!("shutting down, draining active sessions");
    registry.stop_all().await;

    ExitCode::SUCCESS
}
