use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Report;
use netbench_exp::config::GuestLogin;
use netbench_exp::progress::TracingProgressBar;
use netbench_exp::{
    Delays, Experiment, PaneFactory, RecordingPanes, SuiteConfig, TmuxPanes,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Runs a suite of network benchmark experiments.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML file listing the experiments.
    #[arg(long)]
    config: PathBuf,

    /// Print the commands instead of typing them into tmux.
    #[arg(long)]
    dry_run: bool,

    /// Only run the experiment with this name.
    #[arg(long)]
    only: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;
    let args = Args::parse();

    let mut suite = SuiteConfig::from_path(&args.config)?;
    if let Some(only) = &args.only {
        suite.experiments.retain(|config| &config.name == only);
        if suite.experiments.is_empty() {
            return Err(eyre!("no experiment named {}", only));
        }
    }

    let progress = TracingProgressBar::init(suite.experiments.len() as u64);

    // dry runs answer the shutdown check as if every pane was in a guest
    let recording = RecordingPanes::new();
    let panes: Arc<dyn PaneFactory> = if args.dry_run {
        recording.respond("whoami", &[GuestLogin::default().user.as_str()]);
        Arc::new(recording.clone())
    } else {
        Arc::new(TmuxPanes::new(suite.session.clone()))
    };

    let total = suite.experiments.len();
    let mut failed = Vec::new();
    for mut config in suite.experiments {
        let name = config.name.clone();
        progress.set_message(name.clone());
        if args.dry_run {
            config.delays = Delays::none();
        }

        match Experiment::new(config, panes.clone()) {
            Ok(mut exp) => {
                // a failed experiment was already cleaned up; move on
                if let Err(e) = exp.run().await {
                    tracing::error!("{}", e);
                    failed.push(name);
                }
            }
            Err(e) => {
                tracing::error!("experiment {}: {}", name, e);
                failed.push(name);
            }
        }
        progress.inc();
    }
    progress.finish();

    if args.dry_run {
        for sent in recording.sent() {
            println!("[{}] {}", sent.pane, sent.keys);
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(eyre!(
            "{} of {} experiments failed: {:?}",
            failed.len(),
            total,
            failed
        ))
    }
}
