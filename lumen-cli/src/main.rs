use std::path::{Path, PathBuf};
use anyhow::Context;
use clap::{Parser, Subcommand};
use lumen_common::{
    ContentRef, Direction, ErrorReporting, IpcClient, IpcCommand, IpcResponse, LumenError,
    PlaylistEntries, PlaylistStore, Property, PropertyValue,
};

#[derive(Parser)]
#[command(name = "lumen-cli")]
#[command(about = "lumen-cli (live wallpaper daemon control)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pause playback on every monitor
    Pause,

    /// Resume playback
    Start,

    /// Toggle the user pause
    Toggle,

    /// Stop the daemon and release every player
    Quit,

    /// Play a random video from the video directory
    Lucky,

    /// Read a playback property
    Get {
        /// volume, is_mute, blur_radius, is_static_wallpaper,
        /// is_pause_when_maximized, is_mute_when_maximized or is_paused_by_user
        property: String,
    },

    /// Change a playback property
    Set { property: String, value: String },

    /// Play a local video
    Video {
        path: PathBuf,
        /// Monitor to bind, or "all"; without it the default entry changes
        #[arg(long)]
        monitor: Option<String>,
    },

    /// Show a web page (URL or local HTML file)
    Webpage { url: String },

    /// Play a network stream
    Stream { url: String },

    /// Switch to a saved playlist
    Playlist { name: String },

    /// Report whether a window covers the desktop
    Maximized {
        #[arg(action = clap::ArgAction::Set)]
        maximized: bool,
    },

    /// Re-read configuration and playlists from disk
    Reload,

    /// Show current status
    Status,

    /// Edit the playlist store
    #[command(subcommand)]
    Playlists(PlaylistCommands),
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// List playlists and their entries
    List,

    /// Create or overwrite a playlist
    Save {
        name: String,
        /// Monitor the given files are for
        #[arg(long, default_value = "Default")]
        monitor: String,
        files: Vec<PathBuf>,
    },

    /// Append files to a monitor's sequence
    Add {
        playlist: String,
        monitor: String,
        files: Vec<PathBuf>,
    },

    /// Remove files from a monitor's sequence
    Remove {
        playlist: String,
        monitor: String,
        files: Vec<PathBuf>,
    },

    /// Move entries one position towards the start
    MoveLeft {
        playlist: String,
        monitor: String,
        indices: Vec<usize>,
    },

    /// Move entries one position towards the end
    MoveRight {
        playlist: String,
        monitor: String,
        indices: Vec<usize>,
    },

    /// Rename a playlist
    Rename { old_name: String, new_name: String },

    /// Delete a playlist
    Delete { name: String },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        match e.downcast_ref::<LumenError>() {
            Some(lumen_error) => eprintln!("✗ Error: {}", lumen_error.user_friendly_message()),
            None => eprintln!("✗ Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run(command: Commands) -> anyhow::Result<()> {
    let client = IpcClient::new();

    let command = match command {
        Commands::Pause => IpcCommand::PausePlayback,
        Commands::Start => IpcCommand::StartPlayback,
        Commands::Toggle => {
            let response = client.send_command(IpcCommand::Get {
                property: Property::IsPausedByUser,
            })?;
            match response {
                IpcResponse::Property {
                    value: PropertyValue::IsPausedByUser(true),
                } => IpcCommand::StartPlayback,
                IpcResponse::Property { .. } => IpcCommand::PausePlayback,
                other => {
                    print_response(other);
                    return Ok(());
                }
            }
        }
        Commands::Quit => IpcCommand::Quit,
        Commands::Lucky => IpcCommand::FeelingLucky,
        Commands::Get { property } => IpcCommand::Get {
            property: property.parse()?,
        },
        Commands::Set { property, value } => IpcCommand::Set {
            value: PropertyValue::parse(property.parse()?, &value)?,
        },
        Commands::Video { path, monitor } => IpcCommand::Video {
            path: absolute(&path).to_string_lossy().into_owned(),
            monitor,
        },
        Commands::Webpage { url } => IpcCommand::Webpage {
            url: local_or_url(url),
        },
        Commands::Stream { url } => IpcCommand::Stream { url },
        Commands::Playlist { name } => IpcCommand::Playlist { name },
        Commands::Maximized { maximized } => IpcCommand::WindowMaximized { maximized },
        Commands::Reload => IpcCommand::Reload,
        Commands::Status => IpcCommand::Status,
        Commands::Playlists(command) => return edit_playlists(command),
    };

    log::debug!("Sending {:?} to {:?}", command, client.socket_path());
    print_response(client.send_command(command)?);
    Ok(())
}

/// The daemon runs with a different working directory.
fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn local_or_url(url: String) -> String {
    if Path::new(&url).exists() {
        absolute(Path::new(&url)).to_string_lossy().into_owned()
    } else {
        url
    }
}

fn refs(files: &[PathBuf]) -> Vec<ContentRef> {
    files.iter().map(|f| ContentRef::from(absolute(f).as_path())).collect()
}

fn edit_playlists(command: PlaylistCommands) -> anyhow::Result<()> {
    let store_file = PlaylistStore::get_store_file();
    let mut store = PlaylistStore::load(&store_file)?;

    match command {
        PlaylistCommands::List => {
            print_playlists(&store);
            return Ok(());
        }
        PlaylistCommands::Save { name, monitor, files } => {
            let mut entries = PlaylistEntries::new();
            if !files.is_empty() {
                entries.insert(monitor, refs(&files));
            }
            store.create_or_save(&name, entries)?;
            println!("✓ Saved playlist '{}'", name.trim());
        }
        PlaylistCommands::Add { playlist, monitor, files } => {
            let outcome = store.add_entries(&playlist, &monitor, &refs(&files))?;
            if outcome.nothing_selected() {
                println!("Nothing selected, playlist '{}' unchanged", playlist);
                return Ok(());
            }
            println!(
                "✓ Added {} of {} files to '{}' on {}",
                outcome.added, outcome.requested, playlist, monitor
            );
        }
        PlaylistCommands::Remove { playlist, monitor, files } => {
            let removed = store.remove_entries(&playlist, &monitor, &refs(&files))?;
            println!("✓ Removed {} entries from '{}' on {}", removed, playlist, monitor);
        }
        PlaylistCommands::MoveLeft { playlist, monitor, indices } => {
            store.move_entries(&playlist, &monitor, &indices, Direction::Left)?;
            println!("✓ Moved {} entries left", indices.len());
        }
        PlaylistCommands::MoveRight { playlist, monitor, indices } => {
            store.move_entries(&playlist, &monitor, &indices, Direction::Right)?;
            println!("✓ Moved {} entries right", indices.len());
        }
        PlaylistCommands::Rename { old_name, new_name } => {
            store.rename(&old_name, &new_name)?;
            println!("✓ Renamed '{}' to '{}'", old_name, new_name.trim());
        }
        PlaylistCommands::Delete { name } => {
            store.delete(&name)?;
            println!("✓ Deleted playlist '{}'", name);
        }
    }

    store
        .save(&store_file)
        .with_context(|| format!("Failed to write {:?}", store_file))?;
    Ok(())
}

fn print_playlists(store: &PlaylistStore) {
    if store.is_empty() {
        println!("No playlists saved");
        return;
    }

    for name in store.names() {
        println!("{}:", name);
        let Some(entries) = store.entries(name) else {
            continue;
        };
        if entries.is_empty() {
            println!("  (empty)");
        }
        for (monitor, sequence) in entries {
            println!("  {}:", monitor);
            for (index, reference) in sequence.iter().enumerate() {
                println!("    {}. {}", index, reference);
            }
        }
    }
}

fn print_response(response: IpcResponse) {
    match response {
        IpcResponse::Success { message } => {
            println!("✓ {}", message);
        }

        IpcResponse::Error { message } => {
            eprintln!("✗ Error: {}", message);
            std::process::exit(1);
        }

        IpcResponse::Property { value } => {
            println!("{} = {}", value.property(), value);
        }

        IpcResponse::Status {
            mode,
            active_playlist,
            paused,
            playback,
            monitors,
        } => {
            println!("lumen Status:");
            println!("=============");
            println!("Mode: {}", mode);
            if let Some(playlist) = active_playlist {
                println!("Playlist: {}", playlist);
            }
            println!("Global State: {}", if paused { "PAUSED" } else { "PLAYING" });
            println!(
                "Volume: {}{} | Blur: {} | Static: {}",
                playback.volume,
                if playback.is_mute { " (muted)" } else { "" },
                playback.blur_radius,
                playback.is_static_wallpaper
            );
            println!();

            if monitors.is_empty() {
                println!("No monitors found");
                return;
            }

            for monitor in monitors {
                let current = monitor
                    .current
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "idle".to_string());
                let backend = monitor
                    .backend
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "unbound".to_string());

                println!(
                    "{}{}: {} | {} | {} | {} queued{}",
                    monitor.name,
                    if monitor.is_primary { " (primary)" } else { "" },
                    monitor.geometry,
                    backend,
                    current,
                    monitor.queued,
                    if monitor.muted { " | muted" } else { "" }
                );
                if let Some(error) = monitor.last_error {
                    println!("  last error: {}", error);
                }
            }
        }
    }
}
