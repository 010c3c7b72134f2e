use proxyvet::configuration::Settings;
use proxyvet::report::ConsoleReporter;
use proxyvet::Pipeline;
use std::path::PathBuf;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::builder().filter_level(log::LevelFilter::Info).init();

    let input = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("configs.txt"));

    // poll the SOCKS port instead of sleeping a fixed second
    let mut settings = Settings::parse("[engine]\nreadiness = \"poll\"\n")?;
    settings.probe.timeout_ms = 3000;

    let mut pipeline = Pipeline::from_settings(&settings);
    let report = pipeline.run(&input, &mut ConsoleReporter).await?;

    println!(
        "{} of {} configs working, see {}",
        report.summary.working,
        report.summary.tested,
        report.summary.output.display()
    );
    Ok(())
}
