use std::fmt;

use base64::Engine as _;

use super::reader::Reader;
use super::tempo::{TempoMap, uspq_to_bpm};
use super::{Format, meta};
use crate::error::{MidiError, Result};
use crate::events::{Event, MidiMessage};
use crate::timing::Timeline;

/// Channel voice message as stored in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelAftertouch { channel: u8, pressure: u8 },
    PitchBend { channel: u8, value: u16 },
}

impl ChannelEvent {
    /// The playable message, if the timeline model has one. A note-on with
    /// velocity 0 stays a note-on; it still releases the note downstream.
    pub fn to_message(&self) -> Option<MidiMessage> {
        match *self {
            ChannelEvent::NoteOff { channel, note, .. } => {
                Some(MidiMessage::NoteOff { channel, note })
            }
            ChannelEvent::NoteOn {
                channel,
                note,
                velocity,
            } => Some(MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            }),
            ChannelEvent::ControlChange {
                channel,
                controller,
                value,
            } => Some(MidiMessage::ControlChange {
                channel,
                controller,
                value,
            }),
            ChannelEvent::ProgramChange { channel, program } => {
                Some(MidiMessage::ProgramChange { channel, program })
            }
            ChannelEvent::PolyAftertouch { .. }
            | ChannelEvent::ChannelAftertouch { .. }
            | ChannelEvent::PitchBend { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEventKind {
    Channel(ChannelEvent),
    Meta { kind: u8, data: Vec<u8> },
    SysEx(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    /// Ticks since the previous event on the same track.
    pub delta: u32,
    pub kind: TrackEventKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    pub name: Option<String>,
    pub events: Vec<TrackEvent>,
}

impl Track {
    /// Tick of the end-of-track event.
    pub fn length_ticks(&self) -> u64 {
        self.events.iter().map(|e| u64::from(e.delta)).sum()
    }
}

/// A decoded file, still in ticks. Convert with [`LoadedFile::to_timeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFile {
    format: Format,
    ticks_per_quarter: u16,
    tracks: Vec<Track>,
    tempo_map: TempoMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: Option<String>,
    pub format: u16,
    pub tracks: usize,
    pub ticks_per_quarter: u16,
    pub events: usize,
    pub tempo_changes: usize,
    /// Seconds
    pub duration: f64,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}format {}, {} track(s), {} ticks/quarter, {} events, {:.2}s",
            self.name
                .as_deref()
                .map(|n| format!("'{n}': "))
                .unwrap_or_default(),
            self.format,
            self.tracks,
            self.ticks_per_quarter,
            self.events,
            self.duration
        )
    }
}

impl LoadedFile {
    /// Nothing is returned unless the whole file decodes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes, 0);

        if reader.read_bytes(4, "header magic")? != b"MThd" {
            return Err(MidiError::corrupt(0, "missing MThd header"));
        }
        let header_len = reader.read_u32("header length")?;
        if header_len != 6 {
            return Err(MidiError::corrupt(
                4,
                format!("header length is {header_len}, expected 6"),
            ));
        }
        let format = match reader.read_u16("format")? {
            0 => Format::SingleTrack,
            1 => Format::Parallel,
            2 => return Err(MidiError::corrupt(8, "format 2 files are not supported")),
            other => return Err(MidiError::corrupt(8, format!("unknown format {other}"))),
        };
        let track_count = reader.read_u16("track count")?;
        if format == Format::SingleTrack && track_count != 1 {
            return Err(MidiError::corrupt(
                10,
                format!("format 0 declares {track_count} tracks"),
            ));
        }
        let division = reader.read_u16("division")?;
        if division & 0x8000 != 0 {
            return Err(MidiError::corrupt(12, "SMPTE time division is not supported"));
        }
        if division == 0 {
            return Err(MidiError::corrupt(12, "zero ticks per quarter note"));
        }

        let mut tracks = Vec::with_capacity(usize::from(track_count));
        while tracks.len() < usize::from(track_count) {
            if reader.is_empty() {
                return Err(MidiError::corrupt(
                    reader.offset(),
                    format!("expected {track_count} tracks, found {}", tracks.len()),
                ));
            }
            let id = reader.read_bytes(4, "chunk id")?;
            let len = reader.read_u32("chunk length")? as usize;
            let base = reader.offset();
            let body = reader.read_bytes(len, "chunk body")?;
            if id != b"MTrk" {
                tracing::debug!(
                    id = %String::from_utf8_lossy(id),
                    offset = base - 8,
                    "skipping unknown chunk"
                );
                continue;
            }
            tracks.push(decode_track(body, base)?);
        }
        if !reader.is_empty() {
            tracing::debug!(offset = reader.offset(), "ignoring data after the last track");
        }

        let tempo_map = build_tempo_map(division, &tracks);
        let file = Self {
            format,
            ticks_per_quarter: division,
            tracks,
            tempo_map,
        };
        tracing::debug!("decoded {}", file.info());
        Ok(file)
    }

    /// Line breaks and other whitespace inside `text` are ignored.
    pub fn from_base64(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
        Self::decode(&bytes)
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    /// First track name found, conventionally the song title.
    pub fn name(&self) -> Option<&str> {
        self.tracks.iter().find_map(|t| t.name.as_deref())
    }

    pub fn duration(&self) -> f64 {
        let ticks = self.tracks.iter().map(Track::length_ticks).max().unwrap_or(0);
        self.tempo_map.seconds_at(ticks)
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name().map(str::to_string),
            format: self.format.code(),
            tracks: self.tracks.len(),
            ticks_per_quarter: self.ticks_per_quarter,
            events: self.tracks.iter().map(|t| t.events.len()).sum(),
            tempo_changes: self.tempo_map.changes(),
            duration: self.duration(),
        }
    }

    /// Absolute seconds of every event of one track, in track order.
    pub fn event_times(&self, track: usize) -> Option<Vec<f64>> {
        let track = self.tracks.get(track)?;
        let mut tick = 0u64;
        Some(
            track
                .events
                .iter()
                .map(|event| {
                    tick += u64::from(event.delta);
                    self.tempo_map.seconds_at(tick)
                })
                .collect(),
        )
    }

    /// Merges every track's playable events into one timeline. Ties keep
    /// track order, then position within the track.
    pub fn to_timeline(&self, name: &str) -> Result<Timeline> {
        let mut merged: Vec<(u64, MidiMessage)> = Vec::new();
        for track in &self.tracks {
            let mut tick = 0u64;
            for event in &track.events {
                tick += u64::from(event.delta);
                if let TrackEventKind::Channel(channel_event) = &event.kind {
                    if let Some(message) = channel_event.to_message() {
                        merged.push((tick, message));
                    }
                }
            }
        }
        merged.sort_by_key(|&(tick, _)| tick);

        let mut timeline =
            Timeline::with_tempo(name, uspq_to_bpm(self.tempo_map.initial_uspq()))?;
        for (tick, message) in merged {
            timeline.append(Event::new(self.tempo_map.seconds_at(tick), message)?);
        }
        Ok(timeline)
    }
}

fn build_tempo_map(ticks_per_quarter: u16, tracks: &[Track]) -> TempoMap {
    let mut changes = Vec::new();
    for track in tracks {
        let mut tick = 0u64;
        for event in &track.events {
            tick += u64::from(event.delta);
            if let TrackEventKind::Meta {
                kind: meta::SET_TEMPO,
                data,
            } = &event.kind
            {
                match data.as_slice() {
                    &[a, b, c] => {
                        changes.push((tick, u32::from_be_bytes([0, a, b, c])));
                    }
                    _ => tracing::warn!(tick, len = data.len(), "skipping set-tempo with bad length"),
                }
            }
        }
    }
    TempoMap::new(ticks_per_quarter, changes)
}

fn data_byte(reader: &mut Reader<'_>) -> Result<u8> {
    let offset = reader.offset();
    let byte = reader.read_u8("event data")?;
    if byte & 0x80 != 0 {
        return Err(MidiError::corrupt(
            offset,
            format!("data byte 0x{byte:02X} has the high bit set"),
        ));
    }
    Ok(byte)
}

fn channel_event(status: u8, first: u8, reader: &mut Reader<'_>) -> Result<ChannelEvent> {
    let channel = status & 0x0F;
    let event = match status & 0xF0 {
        0x80 => ChannelEvent::NoteOff {
            channel,
            note: first,
            velocity: data_byte(reader)?,
        },
        0x90 => ChannelEvent::NoteOn {
            channel,
            note: first,
            velocity: data_byte(reader)?,
        },
        0xA0 => ChannelEvent::PolyAftertouch {
            channel,
            note: first,
            pressure: data_byte(reader)?,
        },
        0xB0 => ChannelEvent::ControlChange {
            channel,
            controller: first,
            value: data_byte(reader)?,
        },
        0xC0 => ChannelEvent::ProgramChange {
            channel,
            program: first,
        },
        0xD0 => ChannelEvent::ChannelAftertouch {
            channel,
            pressure: first,
        },
        0xE0 => ChannelEvent::PitchBend {
            channel,
            value: (u16::from(data_byte(reader)?) << 7) | u16::from(first),
        },
        _ => {
            return Err(MidiError::UnknownEvent {
                offset: reader.offset(),
                status,
            });
        }
    };
    Ok(event)
}

/// Running status lives only inside one call; sysex and meta events
/// cancel it.
fn decode_track(body: &[u8], base: usize) -> Result<Track> {
    let mut reader = Reader::new(body, base);
    let mut running_status: Option<u8> = None;
    let mut track = Track::default();

    while !reader.is_empty() {
        let delta = reader.read_vlq("delta time")?;
        let status_offset = reader.offset();
        let lead = reader.read_u8("event status")?;

        let kind = match lead {
            0xFF => {
                running_status = None;
                let kind = reader.read_u8("meta type")?;
                let len = reader.read_vlq("meta length")? as usize;
                let data = reader.read_bytes(len, "meta data")?.to_vec();
                if kind == meta::END_OF_TRACK {
                    track.events.push(TrackEvent {
                        delta,
                        kind: TrackEventKind::Meta { kind, data },
                    });
                    if !reader.is_empty() {
                        tracing::debug!(offset = reader.offset(), "ignoring bytes after end of track");
                    }
                    return Ok(track);
                }
                if kind == meta::TRACK_NAME && track.name.is_none() {
                    track.name = Some(String::from_utf8_lossy(&data).into_owned());
                }
                TrackEventKind::Meta { kind, data }
            }
            0xF0 | 0xF7 => {
                running_status = None;
                let len = reader.read_vlq("sysex length")? as usize;
                TrackEventKind::SysEx(reader.read_bytes(len, "sysex data")?.to_vec())
            }
            0x80..=0xEF => {
                running_status = Some(lead);
                let first = data_byte(&mut reader)?;
                TrackEventKind::Channel(channel_event(lead, first, &mut reader)?)
            }
            0x00..=0x7F => {
                let status = running_status.ok_or(MidiError::UnknownEvent {
                    offset: status_offset,
                    status: lead,
                })?;
                TrackEventKind::Channel(channel_event(status, lead, &mut reader)?)
            }
            _ => {
                return Err(MidiError::UnknownEvent {
                    offset: status_offset,
                    status: lead,
                });
            }
        };
        track.events.push(TrackEvent { delta, kind });
    }

    Err(MidiError::corrupt(
        reader.offset(),
        "track ends without an end-of-track event",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(format: u16, tracks: u16, division: u16) -> Vec<u8> {
        let mut bytes = b"MThd".to_vec();
        bytes.extend_from_slice(&6u32.to_be_bytes());
        bytes.extend_from_slice(&format.to_be_bytes());
        bytes.extend_from_slice(&tracks.to_be_bytes());
        bytes.extend_from_slice(&division.to_be_bytes());
        bytes
    }

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut bytes = id.to_vec();
        bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    fn file(format: u16, division: u16, tracks: &[&[u8]]) -> Vec<u8> {
        let mut bytes = header(format, tracks.len() as u16, division);
        for body in tracks {
            bytes.extend(chunk(b"MTrk", body));
        }
        bytes
    }

    const END: [u8; 4] = [0x00, 0xFF, 0x2F, 0x00];

    fn track(events: &[u8]) -> Vec<u8> {
        let mut body = events.to_vec();
        body.extend_from_slice(&END);
        body
    }

    #[test]
    fn test_quarter_note_at_500000_uspq_lasts_half_a_second() {
        let body = track(&[
            0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // 500000 us
            0x00, 0x90, 0x3C, 0x64, // note on
            0x83, 0x60, 0x80, 0x3C, 0x40, // 480 ticks later, note off
        ]);
        let loaded = LoadedFile::decode(&file(0, 480, &[&body])).unwrap();
        let timeline = loaded.to_timeline("minimal").unwrap();

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.events()[0].time(), 0.0);
        assert_eq!(timeline.events()[1].time(), 0.5);
        assert_eq!(timeline.tempo(), 120.0);
    }

    #[test]
    fn test_two_quarters_at_500000_uspq_last_one_second() {
        let body = track(&[
            0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // 500000 us
            0x00, 0x90, 0x3C, 0x64, // note on
            0x87, 0x40, 0x80, 0x3C, 0x40, // 960 ticks later, note off
        ]);
        let timeline = LoadedFile::decode(&file(0, 480, &[&body]))
            .unwrap()
            .to_timeline("minimal")
            .unwrap();
        let notes = timeline.notes();

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 60);
        assert_eq!(notes[0].velocity, 100);
        assert_eq!(notes[0].duration, 1.0);
    }

    #[test]
    fn test_running_status_and_zero_velocity() {
        let body = track(&[
            0x00, 0x91, 0x40, 0x50, // note on, channel 1
            0x10, 0x43, 0x50, // running status note on
            0x10, 0x40, 0x00, // running status, velocity 0
        ]);
        let loaded = LoadedFile::decode(&file(0, 96, &[&body])).unwrap();
        let messages: Vec<_> = loaded
            .to_timeline("rs")
            .unwrap()
            .events()
            .iter()
            .map(|e| *e.message())
            .collect();

        assert_eq!(
            messages,
            vec![
                MidiMessage::NoteOn {
                    channel: 1,
                    note: 0x40,
                    velocity: 0x50
                },
                MidiMessage::NoteOn {
                    channel: 1,
                    note: 0x43,
                    velocity: 0x50
                },
                MidiMessage::NoteOn {
                    channel: 1,
                    note: 0x40,
                    velocity: 0
                },
            ]
        );
        let notes = loaded.to_timeline("rs").unwrap().notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 0x40);
    }

    #[test]
    fn test_data_byte_without_running_status() {
        let body = track(&[0x00, 0x40, 0x40]);
        let err = LoadedFile::decode(&file(0, 96, &[&body])).unwrap_err();
        assert!(matches!(
            err,
            MidiError::UnknownEvent {
                offset: 23,
                status: 0x40
            }
        ));
    }

    #[test]
    fn test_meta_cancels_running_status() {
        let body = track(&[0x00, 0x90, 0x3C, 0x40, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x3C, 0x00]);
        let err = LoadedFile::decode(&file(0, 96, &[&body])).unwrap_err();
        assert!(matches!(err, MidiError::UnknownEvent { status: 0x3C, .. }));
    }

    #[test]
    fn test_system_common_status_is_unknown() {
        let body = track(&[0x00, 0xF2, 0x00, 0x00]);
        let err = LoadedFile::decode(&file(0, 96, &[&body])).unwrap_err();
        assert!(matches!(err, MidiError::UnknownEvent { status: 0xF2, .. }));
    }

    #[test]
    fn test_header_errors() {
        let mut bad_magic = file(0, 96, &[&END]);
        bad_magic[0] = b'X';
        assert!(matches!(
            LoadedFile::decode(&bad_magic),
            Err(MidiError::CorruptFile { offset: 0, .. })
        ));

        let mut bad_len = file(0, 96, &[&END]);
        bad_len[7] = 7;
        assert!(matches!(
            LoadedFile::decode(&bad_len),
            Err(MidiError::CorruptFile { offset: 4, .. })
        ));

        assert!(matches!(
            LoadedFile::decode(&file(2, 96, &[&END])),
            Err(MidiError::CorruptFile { offset: 8, .. })
        ));
        assert!(matches!(
            LoadedFile::decode(&file(0, 0xE728, &[&END])),
            Err(MidiError::CorruptFile { offset: 12, .. })
        ));
        assert!(matches!(
            LoadedFile::decode(&file(0, 96, &[&END, &END])),
            Err(MidiError::CorruptFile { offset: 10, .. })
        ));
        assert!(matches!(
            LoadedFile::decode(&header(0, 1, 96)[..10]),
            Err(MidiError::CorruptFile { .. })
        ));
    }

    #[test]
    fn test_truncated_track() {
        let mut bytes = file(0, 96, &[&track(&[0x00, 0x90, 0x3C, 0x40])]);
        bytes.truncate(bytes.len() - 3);
        let err = LoadedFile::decode(&bytes).unwrap_err();
        assert!(matches!(err, MidiError::CorruptFile { offset: 22, .. }));
    }

    #[test]
    fn test_missing_end_of_track() {
        let bytes = file(0, 96, &[&[0x00, 0x90, 0x3C, 0x40]]);
        assert!(matches!(
            LoadedFile::decode(&bytes),
            Err(MidiError::CorruptFile { .. })
        ));
    }

    #[test]
    fn test_unknown_chunk_is_skipped() {
        let mut bytes = header(1, 1, 96);
        bytes.extend(chunk(b"XFIH", &[1, 2, 3]));
        bytes.extend(chunk(b"MTrk", &track(&[0x00, 0xC2, 0x05])));
        let loaded = LoadedFile::decode(&bytes).unwrap();
        assert_eq!(loaded.tracks().len(), 1);
        assert_eq!(
            loaded.to_timeline("x").unwrap().events()[0].message(),
            &MidiMessage::ProgramChange {
                channel: 2,
                program: 5
            }
        );
    }

    #[test]
    fn test_tempo_from_conductor_track_applies_to_all() {
        let conductor = track(&[
            0x00, 0xFF, 0x03, 0x04, b'S', b'o', b'n', b'g', // track name
            0x00, 0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40, // 1_000_000 us
        ]);
        let notes = track(&[0x00, 0x90, 0x30, 0x40, 0x60, 0x80, 0x30, 0x00]);
        let loaded = LoadedFile::decode(&file(1, 96, &[&conductor, &notes])).unwrap();

        assert_eq!(loaded.name(), Some("Song"));
        let timeline = loaded.to_timeline("song").unwrap();
        assert_eq!(timeline.tempo(), 60.0);
        assert_eq!(timeline.events()[1].time(), 1.0);

        let info = loaded.info();
        assert_eq!(info.format, 1);
        assert_eq!(info.tracks, 2);
        assert_eq!(info.tempo_changes, 1);
        assert_eq!(info.duration, 1.0);
    }

    #[test]
    fn test_bad_tempo_length_is_skipped() {
        let body = track(&[
            0x00, 0xFF, 0x51, 0x02, 0x01, 0x02, // malformed set-tempo
            0x00, 0x90, 0x3C, 0x40, 0x60, 0x80, 0x3C, 0x00,
        ]);
        let loaded = LoadedFile::decode(&file(0, 96, &[&body])).unwrap();
        assert_eq!(loaded.tempo_map().changes(), 0);
        assert_eq!(loaded.to_timeline("t").unwrap().events()[1].time(), 0.5);
    }

    #[test]
    fn test_pitch_bend_is_kept_but_not_played() {
        let body = track(&[0x00, 0xE0, 0x00, 0x40]);
        let loaded = LoadedFile::decode(&file(0, 96, &[&body])).unwrap();
        assert_eq!(
            loaded.tracks()[0].events[0].kind,
            TrackEventKind::Channel(ChannelEvent::PitchBend {
                channel: 0,
                value: 0x2000
            })
        );
        assert!(loaded.to_timeline("t").unwrap().is_empty());
    }

    #[test]
    fn test_base64() {
        use base64::Engine as _;
        let bytes = file(0, 96, &[&track(&[0x00, 0x90, 0x3C, 0x40])]);
        let text = base64::engine::general_purpose::STANDARD.encode(&bytes);
        assert_eq!(LoadedFile::from_base64(&text).unwrap().tracks().len(), 1);
        assert!(matches!(
            LoadedFile::from_base64("not base64!"),
            Err(MidiError::InvalidEncoding(_))
        ));
    }
}
