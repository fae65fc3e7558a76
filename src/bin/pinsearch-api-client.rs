use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pinsearch_api_client::cutout_job::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MODEL, DEFAULT_POLL_INTERVAL,
};
use pinsearch_api_client::{
    image_data, CutoutRequest, CutoutWorkerClient, PinSearchAPIClient, SearchResult, WorkerConfig,
    DEFAULT_SERVER_ADDR, DEFAULT_WORKER_ADDR,
};

fn main() {
    env_logger::init();
    if let Err(error) = run() {
        eprintln!("error: {}", error);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let matches = Command::new("pinsearch-api-client")
        .arg(
            Arg::new("server-addr")
                .long("server-addr")
                .required(false)
                .default_value(DEFAULT_SERVER_ADDR)
                .value_parser(value_parser!(url::Url)),
        )
        .arg(
            Arg::new("worker-addr")
                .long("worker-addr")
                .required(false)
                .default_value(DEFAULT_WORKER_ADDR)
                .value_parser(value_parser!(url::Url)),
        )
        .arg_required_else_help(true)
        .subcommand_required(true)
        .subcommand(
            Command::new("search")
                .about("Upload an image and list matching pins")
                .arg(
                    Arg::new("image_path")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                )
                .arg(
                    Arg::new("save-cutout")
                        .long("save-cutout")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("raw-json")
                        .long("raw-json")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(worker_command(
            "cutout",
            "Remove the background from an image via the GPU worker",
        ))
        .subcommand(worker_command(
            "embed",
            "Compute an embedding vector for an image via the GPU worker",
        ))
        .get_matches();

    let server_addr = matches
        .get_one::<url::Url>("server-addr")
        .expect("server-addr has a default value");
    let worker_addr = matches
        .get_one::<url::Url>("worker-addr")
        .expect("worker-addr has a default value");

    if let Some(matches) = matches.subcommand_matches("search") {
        run_search(server_addr.as_str(), matches)
    } else if let Some(matches) = matches.subcommand_matches("cutout") {
        run_worker_job(worker_addr.as_str(), matches, false)
    } else if let Some(matches) = matches.subcommand_matches("embed") {
        run_worker_job(worker_addr.as_str(), matches, true)
    } else {
        unreachable!("a subcommand is required")
    }
}

fn worker_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("image_path")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(Arg::new("model").long("model").default_value(DEFAULT_MODEL))
        .arg(Arg::new("enhance").long("enhance").action(ArgAction::SetTrue))
        .arg(
            Arg::new("output")
                .long("output")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("interval-secs")
                .long("interval-secs")
                .value_parser(value_parser!(u64)),
        )
}

fn run_search(server_addr: &str, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let image_path = matches
        .get_one::<PathBuf>("image_path")
        .expect("image_path is required");
    let client = PinSearchAPIClient::new_for_server(server_addr)?;
    let file_name = image_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.jpg");
    let image = fs::read(image_path)?;

    let result = client.search_image(file_name, image)?;

    if matches.get_flag("raw-json") {
        serde_json::to_writer_pretty(io::stdout(), &result)?;
        println!();
        return Ok(());
    }

    print_search_summary(&result, &client)?;

    if let Some(cutout) = &result.cutout_image {
        save_cutout(cutout, matches.get_one::<PathBuf>("save-cutout"), "pin_cutout.png");
    }
    Ok(())
}

fn print_search_summary(
    result: &SearchResult,
    client: &PinSearchAPIClient,
) -> Result<(), Box<dyn Error>> {
    let time_taken = result.time_taken_sec.unwrap_or(0.0);
    if result.match_found {
        println!(
            "match: found ({} match(es), confidence: {}, {:.2}s)",
            result.count,
            result.confidence.as_deref().unwrap_or("unknown"),
            time_taken
        );
    } else {
        match result.threshold {
            Some(threshold) => println!(
                "match: not found (threshold: {}, {:.2}s)",
                threshold, time_taken
            ),
            None => println!("match: not found ({:.2}s)", time_taken),
        }
    }
    if let Some(reason) = &result.reason {
        println!("reason: {}", reason);
    }

    for pin_match in &result.matches {
        println!(
            "  pin {} similarity {:.4} distance {:.4}",
            pin_match.pin_id_display(),
            pin_match.similarity.unwrap_or(0.0),
            pin_match.distance.unwrap_or(0.0)
        );
        if let Some(name) = &pin_match.name {
            println!("    name: {}", name);
        }
        if let Some(origin) = &pin_match.origin {
            println!("    origin: {}", origin);
        }
        if let Some(link) = &pin_match.image_link {
            println!("    image: {}", link);
        }
    }

    // Similar pins are diagnostic output; only the top three are shown.
    if !result.debug.is_empty() {
        println!("similar pins:");
        for pin_match in result.debug.iter().take(3) {
            let link = match &pin_match.image_link {
                Some(link) => link.clone(),
                None => client.pin_page_url(&pin_match.pin_id_display())?.into(),
            };
            println!(
                "  pin {} similarity {:.4} ({})",
                pin_match.pin_id_display(),
                pin_match.similarity.unwrap_or(0.0),
                link
            );
        }
    }
    Ok(())
}

fn run_worker_job(
    worker_addr: &str,
    matches: &ArgMatches,
    show_embedding: bool,
) -> Result<(), Box<dyn Error>> {
    let image_path = matches
        .get_one::<PathBuf>("image_path")
        .expect("image_path is required");
    let config = WorkerConfig::from_env()?;
    let client = CutoutWorkerClient::new_for_server(config, worker_addr)?;

    let mut request = CutoutRequest::new(fs::read(image_path)?);
    request.model = matches
        .get_one::<String>("model")
        .expect("model has a default value")
        .clone();
    request.enhance = matches.get_flag("enhance");

    let max_attempts = matches
        .get_one::<u32>("max-attempts")
        .copied()
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);
    let interval = matches
        .get_one::<u64>("interval-secs")
        .copied()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL);

    let job_id = client.submit_cutout_request(&request)?;
    println!("submitted job {}", job_id);

    let output = client.watch_job_output(&job_id, max_attempts, interval, |attempt, total, msg| {
        eprintln!("waiting for job... ({}/{}, status: {})", attempt, total, msg.status);
        Ok(false)
    })?;

    println!(
        "model used: {}",
        output.model_used.as_deref().unwrap_or("unknown")
    );
    if show_embedding {
        match &output.embedding {
            Some(embedding) => {
                println!(
                    "embedding model: {}",
                    output.embedding_model.as_deref().unwrap_or("unknown")
                );
                println!("embedding ({} dims): {:?}", embedding.len(), embedding);
            }
            None => println!("no embedding in the worker output"),
        }
    }

    match &output.image {
        Some(image_field) => {
            save_cutout(
                image_field,
                matches.get_one::<PathBuf>("output"),
                "pin_cutout.png",
            );
        }
        None => println!("no cutout image in the worker output"),
    }
    Ok(())
}

/// Decode failures here are warnings, not fatal: the textual results above
/// are already printed and remain useful.
fn save_cutout(image_field: &str, requested_path: Option<&PathBuf>, default_name: &str) {
    let png = match image_data::decode_image_field(image_field)
        .and_then(|bytes| image_data::to_png(&bytes))
    {
        Ok(png) => png,
        Err(error) => {
            log::warn!("could not decode cutout image: {}", error);
            return;
        }
    };

    let default_path = PathBuf::from(default_name);
    let path: &Path = requested_path.unwrap_or(&default_path);
    match fs::write(path, png) {
        Ok(()) => println!("cutout saved to {}", path.display()),
        Err(error) => log::warn!("could not write cutout to {}: {}", path.display(), error),
    }
}
