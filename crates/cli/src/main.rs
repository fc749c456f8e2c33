//! CLI entry point for Webber
//!
//! Plans one job from the command line, runs it through the engine's queue
//! and prints its events until it finishes. Ctrl-C cancels the queue.

mod args;

use args::{Cli, Command, JobArgs};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use webber_engine::{
    channel, run_startup_checks, AlwaysConfirm, Config, Confirm, Engine, EngineError,
    EngineEvent, EventReceiver, JobMode, JobOutcome, JobRequest, ProfileRegistry,
};

/// Asks on the terminal
struct PromptConfirm;

impl PromptConfirm {
    fn ask(question: &str) -> bool {
        eprint!("{} [y/N] ", question);
        let _ = io::stderr().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

impl Confirm for PromptConfirm {
    fn confirm_overwrite(&self, path: &Path) -> bool {
        Self::ask(&format!("{} already exists or is queued. Overwrite?", path.display()))
    }

    fn confirm_warning(&self, title: &str, message: &str) -> bool {
        Self::ask(&format!("{}: {}", title, message))
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let mut config = match Config::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Profiles => {
            print_profiles(&ProfileRegistry::from_config(&config.profiles));
            ExitCode::SUCCESS
        }
        Command::Check => match run_startup_checks(&config) {
            Ok(report) => {
                println!("ffmpeg major version {}", report.encoder_major);
                println!("{}", report.prober_version);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        },
        Command::Convert(args) => {
            let request = args.to_request();
            run_job(&mut config, cli.skip_checks, &args.job, request).await
        }
        Command::Cut(args) => {
            let request = args.to_request(JobMode::Cut);
            run_job(&mut config, cli.skip_checks, &args, request).await
        }
        Command::Split(args) => {
            let request = args.to_request(JobMode::Split);
            run_job(&mut config, cli.skip_checks, &args, request).await
        }
    }
}

fn print_profiles(registry: &ProfileRegistry) {
    for profile in registry.iter() {
        println!(
            "{} (.{}, {})",
            profile.name, profile.container_extension, profile.muxer_format_name
        );
        println!("  all:    {}", profile.all_stage_args.join(" "));
        println!("  first:  {}", profile.first_stage_args.join(" "));
        println!("  second: {}", profile.second_stage_args.join(" "));
    }
}

async fn run_job(
    config: &mut Config,
    skip_checks: bool,
    args: &JobArgs,
    mut request: JobRequest,
) -> ExitCode {
    if let Some(bind) = &args.status_bind {
        config.status.bind = Some(bind.clone());
    }

    let (tx, events) = channel();
    let engine = if skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Engine::new_without_checks(config.clone(), tx).await
    } else {
        match Engine::new(config.clone(), tx).await {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to initialize engine: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };

    if let Some(crop) = args.crop_normalized {
        match engine.crop_from_normalized(&args.source, crop.x, crop.y, crop.w, crop.h) {
            Ok(region) => request.crop = Some(region),
            Err(e) => {
                error!("Failed to map crop onto the source: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let submitted = if args.yes {
        engine.submit(&request, &AlwaysConfirm)
    } else {
        engine.submit(&request, &PromptConfirm)
    };
    let job = match submitted {
        Ok(job) => job,
        Err(EngineError::Planning(e)) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(bind) = config.status.bind.clone() {
        let queue = engine.queue().clone();
        tokio::spawn(async move {
            if let Err(e) = webber_engine::run_status_server(queue, &bind).await {
                error!("Status server error: {}", e);
            }
        });
    }

    let outcome = watch_job(&engine, events, &job.id, args.json).await;
    exit_code(&outcome)
}

/// Print events until the job finishes; Ctrl-C cancels the queue.
async fn watch_job(
    engine: &Engine,
    mut events: EventReceiver,
    job_id: &str,
    json: bool,
) -> JobOutcome {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;
    let mut progress_line = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return JobOutcome::LaunchFailed { reason: "event stream closed".to_string() };
                };
                if json {
                    match event.to_json() {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("Failed to encode event: {}", e),
                    }
                } else if let EngineEvent::Progress(update) = &event {
                    eprint!("\r{}\x1b[K", update);
                    let _ = io::stderr().flush();
                    progress_line = true;
                } else {
                    if progress_line {
                        eprintln!();
                        progress_line = false;
                    }
                    println!("{}", event);
                }

                if let EngineEvent::JobFinished { job_id: finished, outcome, .. } = event {
                    if finished == job_id {
                        return outcome;
                    }
                }
            }
            _ = &mut ctrl_c, if !cancelled => {
                cancelled = true;
                info!("Interrupted, cancelling queue");
                engine.queue().cancel_all();
            }
        }
    }
}

fn exit_code(outcome: &JobOutcome) -> ExitCode {
    match outcome {
        JobOutcome::Succeeded => ExitCode::SUCCESS,
        JobOutcome::LaunchFailed { .. } => ExitCode::FAILURE,
        other => ExitCode::from(u8::try_from(other.code()).unwrap_or(1)),
    }
}
