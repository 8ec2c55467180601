// src/main.rs

use gantry::{cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("gantry error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    if let Some(report) = run(args).await? {
        println!(
            "run {} ({}): {:?}",
            report.run_id, report.pipeline, report.status
        );
        for (name, value) in &report.results {
            println!("  result {name} = {value}");
        }
        println!("  {}", report.compliance.describe());
    }

    Ok(())
}
