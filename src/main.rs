use std::{error::Error, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use crossbeam_channel::select;
use keepalive::{
    audio::{self, AudioPlayer},
    config::ConfigStore,
    controller::{Controller, SettingsUpdate},
    settings::Settings,
    status::Status,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// use this settings file instead of the platform default
    #[clap(long, short, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write a default settings file
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// list connected output devices
    Devices,
    /// print the current settings
    Show,
    /// watch a device (any connected device containing NAME matches)
    Add { name: String },
    /// stop watching a device
    Remove { name: String },
    /// change the sound, volume or interval
    Set {
        #[clap(long, short)]
        sound: Option<PathBuf>,
        /// 0.0 to 1.0
        #[clap(long, short, allow_hyphen_values = true)]
        volume: Option<f32>,
        /// minutes between alerts, 1 to 360
        #[clap(long, short, allow_hyphen_values = true)]
        interval: Option<i64>,
    },
    /// monitor until interrupted (the default)
    Run,
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("keepalive")
        .map_err(|e| format!("couldn't initialize logger: {e:?}"))?;

    let args = Args::parse();
    let store = match args.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::at_default_location()?,
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Init { force } => {
            if force || !store.exists() {
                store.save(&Settings::default())?;
                println!("wrote {}", store.path().display());
            } else {
                println!(
                    "{} already exists, use --force to overwrite",
                    store.path().display()
                );
            }
        }
        Command::Devices => {
            for device in audio::list_output_devices()? {
                println!("{device}");
            }
        }
        Command::Show => {
            let settings = store.load()?;
            println!("settings file: {}", store.path().display());
            print!("{}", toml::to_string_pretty(&settings)?);
        }
        Command::Add { name } => {
            let mut controller = headless(store);
            if controller.add_device(&name)? {
                println!("watching {}", name.trim().to_lowercase());
            } else {
                println!("nothing to add");
            }
        }
        Command::Remove { name } => {
            let mut controller = headless(store);
            if controller.remove_device(&name)? {
                println!("no longer watching {}", name.trim().to_lowercase());
            } else {
                println!("{name} was not being watched");
            }
        }
        Command::Set {
            sound,
            volume,
            interval,
        } => {
            let update = SettingsUpdate {
                sound_path: sound,
                volume,
                interval_minutes: interval,
            };
            if update.is_empty() {
                println!("nothing to change");
                return Ok(());
            }
            let mut controller = headless(store);
            controller.update_settings(update)?;
            print!("{}", toml::to_string_pretty(controller.settings())?);
        }
        Command::Run => run(store)?,
    }
    Ok(())
}

fn headless(store: ConfigStore) -> Controller {
    Controller::new(
        store,
        AudioPlayer::factory(),
        Arc::new(keepalive::status::NullSink),
    )
}

fn run(store: ConfigStore) -> Result<(), Box<dyn Error>> {
    let (status_tx, status_rx) = crossbeam_channel::unbounded::<Status>();
    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })?;

    let mut controller = Controller::new(store, AudioPlayer::factory(), Arc::new(status_tx));
    controller.start_monitor()?;
    let requests = controller.requests().clone();

    loop {
        select! {
            recv(requests) -> request => {
                if let Ok(request) = request {
                    controller.respond(request);
                }
            }
            recv(status_rx) -> status => {
                if let Ok(status) = status {
                    println!("{status}");
                }
            }
            recv(interrupt_rx) -> _ => break,
        }
    }

    controller.close()?;
    for status in status_rx.try_iter() {
        println!("{status}");
    }
    Ok(())
}
