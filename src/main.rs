use clap::{Parser, ValueEnum};
use proxyvet::configuration::{ProbeKind, Settings};
use proxyvet::pipeline::Halt;
use proxyvet::report::ConsoleReporter;
use proxyvet::supervisor::Readiness;
use proxyvet::Pipeline;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

#[derive(Parser)]
#[command(name = "proxyvet", version, about = "Keep only the proxy configs that actually connect")]
struct Cli {
    /// Text file with one proxy configuration per line
    input: PathBuf,
    /// Settings file (defaults to ./proxyvet.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Proxy engine executable
    #[arg(long)]
    engine: Option<String>,
    /// Local SOCKS address the engine listens on
    #[arg(long)]
    socks_addr: Option<SocketAddr>,
    /// Host or URL requested through the proxy
    #[arg(long)]
    target: Option<String>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    grace_ms: Option<u64>,
    #[arg(long, value_enum)]
    readiness: Option<ReadinessArg>,
    #[arg(long, value_enum)]
    prober: Option<ProberArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReadinessArg {
    Fixed,
    Poll,
}

impl From<ReadinessArg> for Readiness {
    fn from(value: ReadinessArg) -> Self {
        match value {
            ReadinessArg::Fixed => Readiness::Fixed,
            ReadinessArg::Poll => Readiness::Poll,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProberArg {
    Curl,
    Http,
}

impl From<ProberArg> for ProbeKind {
    fn from(value: ProberArg) -> Self {
        match value {
            ProberArg::Curl => ProbeKind::Curl,
            ProberArg::Http => ProbeKind::Http,
        }
    }
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(engine) = &self.engine {
            settings.engine.path = engine.clone();
        }
        if let Some(addr) = self.socks_addr {
            settings.engine.socks_addr = addr;
        }
        if let Some(ms) = self.grace_ms {
            settings.engine.startup_grace_ms = ms;
        }
        if let Some(readiness) = self.readiness {
            settings.engine.readiness = readiness.into();
        }
        if let Some(target) = &self.target {
            settings.probe.target = target.clone();
        }
        if let Some(ms) = self.timeout_ms {
            settings.probe.timeout_ms = ms;
        }
        if let Some(prober) = self.prober {
            settings.probe.kind = prober.into();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("proxyvet", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut settings);

    let mut pipeline = Pipeline::from_settings(&settings);
    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, finishing current config");
            stop.store(true, Ordering::SeqCst);
        }
    });

    match pipeline.run(&cli.input, &mut ConsoleReporter).await {
        Ok(report) => match report.halted {
            None => ExitCode::SUCCESS,
            Some(Halt::Interrupted) => ExitCode::from(130),
            Some(Halt::ReadError(e)) => {
                log::error!("input was not read completely: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
