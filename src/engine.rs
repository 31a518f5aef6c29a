//! The explicit context every operation goes through.
//!
//! An [`Engine`] owns the output, the playback scheduler, and the named
//! songs and loaded files. Songs are stored as `Arc<Timeline>`; editing a
//! song that is being played clones it first, so playback keeps reading the
//! snapshot it started with.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::config::Settings;
use crate::error::{MidiError, Result};
use crate::output::{Output, OutputSink};
use crate::smf::{self, FileInfo, Format, LoadedFile};
use crate::timing::{
    self, NowPlaying, PlaybackUpdate, ScaleKind, Scheduler, SessionId, SessionOutcome, Timeline,
};
use crate::tracker;

const UNTITLED: &str = "Untitled";

/// `base`, else `base_1`, `base_2`, ... whichever is free first.
fn unique_name<V>(taken: &BTreeMap<String, V>, base: &str) -> String {
    let base = if base.is_empty() { UNTITLED } else { base };
    if !taken.contains_key(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}_{i}"))
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

pub struct Engine {
    settings: Settings,
    output: Arc<Output>,
    scheduler: Scheduler,
    songs: BTreeMap<String, Arc<Timeline>>,
    files: BTreeMap<String, Arc<LoadedFile>>,
}

impl Engine {
    pub fn new(settings: Settings, sink: impl OutputSink + 'static) -> Self {
        Self {
            settings,
            output: Arc::new(Output::new(sink)),
            scheduler: Scheduler::new(),
            songs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn output(&self) -> &Arc<Output> {
        &self.output
    }

    // Direct commands bypass the scheduler.

    pub fn note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.output.note_on(channel, note, velocity)
    }

    pub fn note_off(&self, channel: u8, note: u8) -> Result<()> {
        self.output.note_off(channel, note)
    }

    pub fn program_change(&self, channel: u8, program: u8) -> Result<()> {
        self.output.program_change(channel, program)
    }

    pub fn control_change(&self, channel: u8, controller: u8, value: u8) -> Result<()> {
        self.output.control_change(channel, controller, value)
    }

    pub fn all_notes_off(&self, channels: Option<&[u8]>) -> usize {
        self.output.all_notes_off(channels)
    }

    // Songs

    /// Creates an empty song and returns the name it was stored under.
    pub fn create_song(&mut self, name: &str, tempo: Option<f64>) -> Result<String> {
        let tempo = tempo.unwrap_or(self.settings.default_tempo);
        let song = Timeline::with_tempo(name, tempo)?;
        Ok(self.add_song(song))
    }

    /// Stores `song` under its own name, suffixed if the name is taken.
    pub fn add_song(&mut self, mut song: Timeline) -> String {
        let name = unique_name(&self.songs, song.name());
        if name != song.name() {
            tracing::debug!(requested = %song.name(), stored = %name, "song name taken");
        }
        song.set_name(name.clone());
        self.songs.insert(name.clone(), Arc::new(song));
        name
    }

    pub fn song(&self, name: &str) -> Result<Arc<Timeline>> {
        self.songs
            .get(name)
            .cloned()
            .ok_or_else(|| MidiError::SongNotFound(name.to_string()))
    }

    pub fn song_mut(&mut self, name: &str) -> Result<&mut Timeline> {
        self.songs
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| MidiError::SongNotFound(name.to_string()))
    }

    /// Stops playback first if this song is the one playing.
    pub fn remove_song(&mut self, name: &str) -> Result<Arc<Timeline>> {
        let song = self
            .songs
            .remove(name)
            .ok_or_else(|| MidiError::SongNotFound(name.to_string()))?;
        if self
            .scheduler
            .now_playing()
            .is_some_and(|playing| playing.name == name)
        {
            self.stop();
        }
        Ok(song)
    }

    pub fn song_names(&self) -> Vec<String> {
        self.songs.keys().cloned().collect()
    }

    pub fn create_scale(
        &mut self,
        name: &str,
        root: u8,
        kind: ScaleKind,
        octaves: u32,
        duration: f64,
    ) -> Result<String> {
        let mut song = timing::create_scale(name, root, kind, octaves, duration)?;
        song.set_tempo(self.settings.default_tempo)?;
        Ok(self.add_song(song))
    }

    /// Parses a tracker score into a new song. A `TITLE` directive in the
    /// text takes precedence over `name`.
    pub fn load_tracker(&mut self, name: &str, text: &str) -> Result<String> {
        let song = tracker::parse_tracker(text, &self.settings.tracker_config(name))?;
        tracing::info!(song = %song.name(), events = song.len(), "loaded tracker score");
        Ok(self.add_song(song))
    }

    // Files

    pub fn load_file_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<String> {
        let file = LoadedFile::decode(bytes)?;
        let name = unique_name(&self.files, name);
        tracing::info!(file = %name, "loaded {}", file.info());
        self.files.insert(name.clone(), Arc::new(file));
        Ok(name)
    }

    pub fn load_file_base64(&mut self, name: &str, text: &str) -> Result<String> {
        let file = LoadedFile::from_base64(text)?;
        let name = unique_name(&self.files, name);
        tracing::info!(file = %name, "loaded {}", file.info());
        self.files.insert(name.clone(), Arc::new(file));
        Ok(name)
    }

    /// `name` defaults to the file stem.
    pub fn load_file_path(&mut self, path: &Path, name: Option<&str>) -> Result<String> {
        let bytes = std::fs::read(path)?;
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        let name = name.map(str::to_string).or(stem).unwrap_or_default();
        self.load_file_bytes(&name, &bytes)
    }

    fn file(&self, name: &str) -> Result<&Arc<LoadedFile>> {
        self.files
            .get(name)
            .ok_or_else(|| MidiError::FileNotFound(name.to_string()))
    }

    pub fn file_info(&self, name: &str) -> Result<FileInfo> {
        Ok(self.file(name)?.info())
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Converts a loaded file into a new song named after it.
    pub fn file_to_song(&mut self, name: &str) -> Result<String> {
        let song = self.file(name)?.to_timeline(name)?;
        Ok(self.add_song(song))
    }

    pub fn export_song(&self, name: &str, format: Format) -> Result<Vec<u8>> {
        let song = self.song(name)?;
        smf::encode(&song, &self.settings.encode_options(format))
    }

    // Playback

    pub fn play_song(&self, name: &str) -> Result<SessionId> {
        let song = self.song(name)?;
        self.scheduler.play(song, self.output.clone())
    }

    pub fn play_file(&self, name: &str) -> Result<SessionId> {
        let song = self.file(name)?.to_timeline(name)?;
        self.scheduler.play(Arc::new(song), self.output.clone())
    }

    pub fn play_timeline(&self, song: Timeline) -> Result<SessionId> {
        self.scheduler.play(Arc::new(song), self.output.clone())
    }

    /// `false` when nothing was playing. With `release_on_stop`, a stopped
    /// session is followed by an all-notes-off on every channel.
    pub fn stop(&self) -> bool {
        let stopped = self.scheduler.stop();
        if stopped && self.settings.release_on_stop {
            self.output.all_notes_off(None);
        }
        stopped
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn now_playing(&self) -> Option<Arc<NowPlaying>> {
        self.scheduler.now_playing()
    }

    pub fn wait(&self) -> Option<SessionOutcome> {
        self.scheduler.wait()
    }

    pub fn updates(&self) -> Receiver<PlaybackUpdate> {
        self.scheduler.updates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MidiMessage;
    use crate::output::RecordingSink;

    fn engine() -> (Engine, RecordingSink) {
        let sink = RecordingSink::new();
        (Engine::new(Settings::default(), sink.clone()), sink)
    }

    #[test]
    fn test_add_song_suffixes_taken_names() {
        let (mut engine, _) = engine();
        assert_eq!(engine.create_song("demo", None).unwrap(), "demo");
        assert_eq!(engine.create_song("demo", None).unwrap(), "demo_1");
        assert_eq!(engine.create_song("demo", None).unwrap(), "demo_2");
        assert_eq!(engine.create_song("", None).unwrap(), "Untitled");
        assert_eq!(engine.song("demo_1").unwrap().name(), "demo_1");
        assert_eq!(
            engine.song_names(),
            vec!["Untitled", "demo", "demo_1", "demo_2"]
        );
    }

    #[test]
    fn test_missing_song_and_file() {
        let (mut engine, _) = engine();
        assert!(matches!(engine.song("nope"), Err(MidiError::SongNotFound(_))));
        assert!(matches!(engine.song_mut("nope"), Err(MidiError::SongNotFound(_))));
        assert!(matches!(engine.play_song("nope"), Err(MidiError::SongNotFound(_))));
        assert!(matches!(engine.file_info("nope"), Err(MidiError::FileNotFound(_))));
        assert!(matches!(engine.remove_song("nope"), Err(MidiError::SongNotFound(_))));
    }

    #[test]
    fn test_song_mut_does_not_touch_shared_snapshot() {
        let (mut engine, _) = engine();
        let name = engine.create_song("edit", Some(100.0)).unwrap();
        let snapshot = engine.song(&name).unwrap();

        engine
            .song_mut(&name)
            .unwrap()
            .add_note(60, 0.0, 1.0, 80, 0)
            .unwrap();

        assert!(snapshot.is_empty());
        assert_eq!(engine.song(&name).unwrap().len(), 2);
    }

    #[test]
    fn test_direct_commands_share_the_guard() {
        let (engine, sink) = engine();
        engine.note_on(3, 50, 90).unwrap();
        engine.control_change(3, 7, 100).unwrap();

        assert_eq!(engine.output().guard().sounding(), vec![(3, 50)]);
        assert_eq!(engine.all_notes_off(Some(&[3])), 1);
        assert!(engine.output().guard().is_empty());
        assert_eq!(
            sink.messages().last(),
            Some(&MidiMessage::ControlChange {
                channel: 3,
                controller: 123,
                value: 0
            })
        );
    }

    #[test]
    fn test_tracker_and_export() {
        let (mut engine, _) = engine();
        let name = engine
            .load_tracker("riff", "TITLE: Riff\nC-4 | E-4\nOFF | ---\n")
            .unwrap();
        assert_eq!(name, "Riff");

        let bytes = engine.export_song(&name, Format::Parallel).unwrap();
        let file = engine.load_file_bytes("riff", &bytes).unwrap();
        assert_eq!(engine.file_info(&file).unwrap().tracks, 3);

        let converted = engine.file_to_song(&file).unwrap();
        assert_eq!(converted, "riff");
        assert_eq!(
            engine.song(&converted).unwrap().notes().len(),
            engine.song("Riff").unwrap().notes().len()
        );
    }

    #[test]
    fn test_stop_releases_sounding_notes() {
        let (mut engine, sink) = engine();
        let name = engine.create_song("held", None).unwrap();
        engine
            .song_mut(&name)
            .unwrap()
            .add_note(60, 0.0, 30.0, 100, 0)
            .unwrap();

        engine.play_song(&name).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(engine.stop());
        assert!(!engine.stop());

        assert!(engine.output().guard().is_empty());
        assert!(
            sink.messages()
                .contains(&MidiMessage::NoteOff { channel: 0, note: 60 })
        );
    }

    #[test]
    fn test_remove_playing_song_stops_it() {
        let (mut engine, _) = engine();
        let name = engine.create_song("gone", None).unwrap();
        engine
            .song_mut(&name)
            .unwrap()
            .add_note(60, 0.0, 30.0, 100, 0)
            .unwrap();
        engine.play_song(&name).unwrap();

        engine.remove_song(&name).unwrap();
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_create_scale_uses_default_tempo() {
        let sink = RecordingSink::new();
        let settings = Settings {
            default_tempo: 96.0,
            ..Settings::default()
        };
        let mut engine = Engine::new(settings, sink);
        let name = engine
            .create_scale("c major", 60, ScaleKind::Major, 1, 0.25)
            .unwrap();
        let song = engine.song(&name).unwrap();
        assert_eq!(song.tempo(), 96.0);
        assert_eq!(song.notes().len(), 7);
    }
}
