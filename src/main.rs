use anyhow::Result;
use clap::Parser;
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use video_captions::cli::{Cli, Commands};
use video_captions::output::{print_to_console, save_to_file};
use video_captions::utils::{self, format_duration};
use video_captions::{AcquisitionFailure, AcquisitionResult, BackendKind, BrowserPreference, CaptionPipeline, Config, PipelineOptions};

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "video_captions=debug" } else { "video_captions=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Configuration defaults with per-invocation overrides applied
fn pipeline_options(
    config: &Config,
    browser: Option<&str>,
    sessdata: Option<String>,
    quiet: bool,
) -> Result<PipelineOptions> {
    let mut options = PipelineOptions::from_config(config);
    if let Some(browser) = browser {
        options.browser = browser.parse::<BrowserPreference>()?;
    }
    if sessdata.is_some() {
        options.explicit_credential = sessdata;
    }
    if quiet {
        options.show_progress = false;
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    // fetch always answers with a result object, so a broken file cannot stop it
    let config = match &cli.command {
        Commands::Fetch { .. } => Config::load_or_default().await,
        _ => Config::load().await?,
    };

    match cli.command {
        Commands::Fetch {
            source,
            format,
            model,
            browser,
            sessdata,
            output,
            cache_dir,
            raw,
        } => {
            let missing_deps = utils::check_dependencies(
                &config.tools.yt_dlp,
                &config.tools.ffmpeg,
                &config.tools.whisper,
            )
            .await;
            if !missing_deps.is_empty() {
                eprintln!("⚠️  Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
                eprintln!("   (Continuing anyway - platform captions may not need them)");
            }

            let format = format.unwrap_or(config.app.default_format);
            let model = model.unwrap_or_else(|| config.asr.default_model.clone());
            let result = match pipeline_options(&config, browser.as_deref(), sessdata, cli.quiet) {
                Ok(mut options) => {
                    if cache_dir.is_some() {
                        options.cache_dir = cache_dir;
                    }

                    tracing::info!("Fetching captions for: {}", source);
                    let pipeline = CaptionPipeline::new(config, options);
                    pipeline.acquire_captions(&source, format, &model).await
                }
                Err(e) => AcquisitionFailure::from_error(&e).into(),
            };

            if raw {
                println!("{}", serde_json::to_string_pretty(&result)?);
                if !result.is_success() {
                    std::process::exit(1);
                }
                return Ok(());
            }

            match result {
                AcquisitionResult::Success(document) => match output {
                    Some(path) => {
                        save_to_file(&document, &path)?;
                        println!(
                            "{} captions ({}) for '{}' saved to: {}",
                            document.subtitle_count,
                            document.origin,
                            document.video_title,
                            path.display()
                        );
                    }
                    None => {
                        eprintln!(
                            "{} {} [{} via {}]",
                            style("▶").green(),
                            style(&document.video_title).bold(),
                            document.platform,
                            document.origin
                        );
                        print_to_console(&document)?;
                        eprintln!("{} captions", document.subtitle_count);
                    }
                },
                AcquisitionResult::Failure(failure) => {
                    eprintln!("{} {}: {}", style("✗").red(), failure.error_kind, failure.message);
                    if let Some(suggestion) = &failure.suggestion {
                        eprintln!("  {}", style(suggestion).yellow());
                    }
                    if let Some(diagnostic) = &failure.raw_diagnostic {
                        tracing::debug!("Collaborator output: {}", diagnostic);
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Info {
            source,
            browser,
            sessdata,
        } => {
            let options = pipeline_options(&config, browser.as_deref(), sessdata, cli.quiet)?;
            let pipeline = CaptionPipeline::new(config, options);
            let info = pipeline.video_info(&source).await?;

            println!("{}", style(&info.title).bold());
            println!("  ID: {}", info.id);
            println!("  Duration: {}", format_duration(info.duration_seconds as f64));
            if let Some(author) = &info.author {
                println!("  Author: {}", author);
            }
            println!("  Captions: {}", if info.has_captions { "yes" } else { "no" });
            if !info.description.is_empty() {
                println!("\n{}", info.description);
            }
        }
        Commands::List {
            source,
            browser,
            sessdata,
        } => {
            let options = pipeline_options(&config, browser.as_deref(), sessdata, cli.quiet)?;
            let pipeline = CaptionPipeline::new(config, options);
            let backend = pipeline.select_backend(&source)?;
            let tracks = pipeline.caption_tracks(&source).await?;

            if tracks.is_empty() {
                println!("No caption tracks; fetch will use speech recognition");
            } else {
                let preferred = backend.select_track(&tracks).map(|t| t.language_code.clone());
                println!("Caption tracks:");
                for track in &tracks {
                    let marker = if preferred.as_deref() == Some(track.language_code.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("  {} {:<12} {}", marker, track.language_code, track.language_label);
                }
            }
        }
        Commands::Config { show, init } => {
            if init {
                let path = config.save().await?;
                println!("Configuration written to: {}", path.display());
            }
            if show || !init {
                config.display();
            }
        }
        Commands::Platforms => {
            println!("Supported platforms:");
            for kind in BackendKind::TRIAL_ORDER {
                println!("  • {:<9} {}", kind.name(), kind.description());
            }
        }
    }

    Ok(())
}
