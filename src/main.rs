use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use midiplay::output::output_port_names;
use midiplay::{Engine, Format, LogSink, MidiError, MidirSink, PlaybackUpdate, ScaleKind, Settings};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: midiplay [--config <settings.ron>] [--port <name>] [--dry-run] <command>

Commands:
  ports                                   list MIDI output ports
  play <file.mid|file.trk>                play a file or tracker score
  convert <in.trk> <out.mid>              write a tracker score as a MIDI file
  scale <root> <kind> [octaves] [seconds] play a scale (kind: major, minor,
                                          pentatonic, blues, chromatic)
  panic                                   send all notes off on every channel";

struct Options {
    config: Option<PathBuf>,
    port: Option<String>,
    dry_run: bool,
    command: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options {
        config: None,
        port: None,
        dry_run: false,
        command: Vec::new(),
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--port" => {
                let port = iter.next().ok_or("--port needs a name")?;
                options.port = Some(port.clone());
            }
            "--dry-run" => options.dry_run = true,
            "-h" | "--help" => return Err(String::new()),
            _ => options.command.push(arg.clone()),
        }
    }
    if options.command.is_empty() {
        return Err(String::new());
    }
    Ok(options)
}

fn number<T: FromStr>(value: &str, field: &'static str, expected: &'static str) -> midiplay::Result<T> {
    value.parse().map_err(|_| MidiError::InvalidParameter {
        field,
        value: value.to_string(),
        expected,
    })
}

fn open_engine(settings: Settings, dry_run: bool) -> midiplay::Result<Engine> {
    if dry_run {
        return Ok(Engine::new(settings, LogSink));
    }
    let sink = MidirSink::connect(&settings.client_name, settings.port_hint.as_deref())?;
    Ok(Engine::new(settings, sink))
}

fn is_tracker(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("trk") || ext.eq_ignore_ascii_case("txt"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_tracker(engine: &mut Engine, path: &Path) -> midiplay::Result<String> {
    let text = fs::read_to_string(path)?;
    engine.load_tracker(&file_stem(path), &text)
}

/// Plays until the session ends, logging progress from the update channel.
fn play_and_wait(engine: &Engine, session: midiplay::timing::SessionId) {
    let updates = engine.updates();
    engine.wait();
    for update in updates.try_iter() {
        match update {
            PlaybackUpdate::Started { name, events, .. } => {
                tracing::debug!(song = %name, events, "started");
            }
            PlaybackUpdate::Finished {
                session: finished,
                dispatched,
                ..
            } if finished == session => {
                eprintln!("Finished: {} events", dispatched);
            }
            _ => {}
        }
    }
    // Nothing should still be sounding, but a device may have missed a release.
    engine.all_notes_off(None);
}

fn run(options: Options) -> midiplay::Result<()> {
    let mut settings = match &options.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if options.port.is_some() {
        settings.port_hint = options.port.clone();
    }

    let command: Vec<&str> = options.command.iter().map(String::as_str).collect();
    match command.as_slice() {
        ["ports"] => {
            for (index, name) in output_port_names(&settings.client_name)?
                .iter()
                .enumerate()
            {
                println!("{index}: {name}");
            }
        }
        ["play", path] => {
            let path = Path::new(path);
            let mut engine = open_engine(settings, options.dry_run)?;
            let session = if is_tracker(path) {
                let name = load_tracker(&mut engine, path)?;
                engine.play_song(&name)?
            } else {
                let name = engine.load_file_path(path, None)?;
                eprintln!("{}", engine.file_info(&name)?);
                engine.play_file(&name)?
            };
            play_and_wait(&engine, session);
        }
        ["convert", input, output] => {
            let mut engine = Engine::new(settings, LogSink);
            let name = load_tracker(&mut engine, Path::new(input))?;
            let bytes = engine.export_song(&name, Format::Parallel)?;
            fs::write(output, &bytes)?;
            eprintln!("Wrote {} bytes to {}", bytes.len(), output);
        }
        ["scale", root, kind, rest @ ..] if rest.len() <= 2 => {
            let root: u8 = number(root, "root", "0..=127")?;
            let kind: ScaleKind = kind.parse()?;
            let octaves = match rest.first() {
                Some(octaves) => number(octaves, "octaves", "a whole number >= 1")?,
                None => 1,
            };
            let duration = match rest.get(1) {
                Some(seconds) => number(seconds, "duration", "seconds > 0")?,
                None => 0.25,
            };
            let mut engine = open_engine(settings, options.dry_run)?;
            let name = engine.create_scale("scale", root, kind, octaves, duration)?;
            let session = engine.play_song(&name)?;
            play_and_wait(&engine, session);
        }
        ["panic"] => {
            let engine = open_engine(settings, options.dry_run)?;
            let released = engine.all_notes_off(None);
            eprintln!("All notes off ({released} registered notes released)");
        }
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("Error: {}", message);
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    if let Err(e) = run(options) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
