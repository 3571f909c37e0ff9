use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use delview::config::{DVConfig, expand_path};
use delview::controller::Controller;
use delview::domain::DVError;
use delview::logging;
use delview::model::{Model, Status};
use delview::ui::TableUI;

#[derive(Parser, Debug)]
#[command(version, about = "Browse large delimited text files in the terminal")]
struct Args {
    /// File to open on start (.tsv, .csv, .psv or .txt)
    path: Option<String>,

    /// Read settings from this file instead of the default location
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Bytes read per chunk
    #[arg(long = "chunk-size")]
    chunk_size: Option<usize>,

    /// Rows per batch sent to the viewer
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,

    /// Extra rows materialised above and below the viewport
    #[arg(long = "overscan")]
    overscan: Option<usize>,

    /// Write logs to this file
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
}

impl Args {
    /// Command line values win over the config file.
    fn apply(&self, mut config: DVConfig) -> Result<DVConfig, DVError> {
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(overscan) = self.overscan {
            config.overscan = overscan;
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(expand_path(&log_file.to_string_lossy())?);
        }
        config.validate()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let result = run(&args);
    ratatui::restore();
    match result {
        Err(e) => {
            error!("Exiting with error: {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run(args: &Args) -> Result<(), DVError> {
    let config = args.apply(DVConfig::load(args.config.as_deref())?)?;
    logging::init(config.log_file.as_deref())?;
    info!("Starting delview {}", env!("CARGO_PKG_VERSION"));

    let mut terminal = ratatui::init();
    let size = terminal.size()?;

    let mut model = Model::init(&config, size.width as usize, size.height as usize)?;
    let mut ui = TableUI::new();
    let controller = Controller::new(config.event_poll_time);

    if let Some(path) = &args.path {
        model.open(expand_path(path)?);
    }

    while model.status != Status::QUITTING {
        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message; without one the model still
        // picks up worker results.
        let message = controller.handle_event(&model)?;
        model.update(message)?;
    }

    info!("Bye");
    Ok(())
}
