use std::collections::BTreeMap;

use super::reader::{MAX_VLQ, write_vlq};
use super::tempo::bpm_to_uspq;
use super::{Format, meta};
use crate::error::{MidiError, Result};
use crate::events::MidiMessage;
use crate::timing::Timeline;

const MAX_USPQ: f64 = 16_777_215.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: Format,
    pub ticks_per_quarter: u16,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            format: Format::Parallel,
            ticks_per_quarter: 480,
        }
    }
}

/// Writes `timeline` as a Standard MIDI File.
///
/// Seconds are converted to ticks at the timeline's tempo, which is stored
/// as a single set-tempo event together with the timeline name. Format 0
/// puts everything in one track. Format 1 writes a conductor track
/// followed by one track per channel in use.
pub fn encode(timeline: &Timeline, options: &EncodeOptions) -> Result<Vec<u8>> {
    let ticks_per_quarter = options.ticks_per_quarter;
    if ticks_per_quarter == 0 || ticks_per_quarter > 0x7FFF {
        return Err(MidiError::invalid(
            "ticks_per_quarter",
            ticks_per_quarter,
            "1-32767",
        ));
    }
    let uspq = bpm_to_uspq(timeline.tempo()).round();
    if !(1.0..=MAX_USPQ).contains(&uspq) {
        return Err(MidiError::invalid(
            "tempo",
            timeline.tempo(),
            "a BPM between 4 and 60000000",
        ));
    }
    let uspq = uspq as u32;
    let ticks_per_second = f64::from(ticks_per_quarter) * 1_000_000.0 / f64::from(uspq);

    let mut timed = Vec::with_capacity(timeline.len());
    for event in timeline.events() {
        let tick = (event.time() * ticks_per_second).round();
        if tick > f64::from(u32::MAX) {
            return Err(MidiError::invalid(
                "time",
                event.time(),
                "a time within the file's tick range",
            ));
        }
        timed.push((tick as u64, *event.message()));
    }

    let mut metas = Vec::new();
    if !timeline.name().is_empty() {
        metas.push((meta::TRACK_NAME, timeline.name().as_bytes().to_vec()));
    }
    metas.push((meta::SET_TEMPO, uspq.to_be_bytes()[1..].to_vec()));

    let tracks = match options.format {
        Format::SingleTrack => vec![write_track(&metas, &timed)?],
        Format::Parallel => {
            let mut by_channel: BTreeMap<u8, Vec<(u64, MidiMessage)>> = BTreeMap::new();
            for &(tick, message) in &timed {
                by_channel
                    .entry(message.channel())
                    .or_default()
                    .push((tick, message));
            }
            let mut tracks = vec![write_track(&metas, &[])?];
            for events in by_channel.values() {
                tracks.push(write_track(&[], events)?);
            }
            tracks
        }
    };

    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&options.format.code().to_be_bytes());
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&ticks_per_quarter.to_be_bytes());
    for body in &tracks {
        let len = u32::try_from(body.len())
            .map_err(|_| MidiError::invalid("track length", body.len(), "at most 4 GiB"))?;
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(body);
    }

    tracing::debug!(
        song = %timeline.name(),
        format = options.format.code(),
        tracks = tracks.len(),
        bytes = out.len(),
        "encoded file"
    );
    Ok(out)
}

fn write_length(out: &mut Vec<u8>, field: &'static str, value: u64) -> Result<()> {
    match u32::try_from(value) {
        Ok(value) if value <= MAX_VLQ => {
            write_vlq(out, value);
            Ok(())
        }
        _ => Err(MidiError::invalid(field, value, "at most 0x0FFFFFFF")),
    }
}

fn write_meta(out: &mut Vec<u8>, kind: u8, data: &[u8]) -> Result<()> {
    write_vlq(out, 0);
    out.push(0xFF);
    out.push(kind);
    write_length(out, "meta length", data.len() as u64)?;
    out.extend_from_slice(data);
    Ok(())
}

/// `events` must be sorted by tick. Channel events share a status byte
/// with the previous one whenever they can.
fn write_track(metas: &[(u8, Vec<u8>)], events: &[(u64, MidiMessage)]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for (kind, data) in metas {
        write_meta(&mut body, *kind, data)?;
    }

    let mut running_status = None;
    let mut last_tick = 0u64;
    for &(tick, message) in events {
        write_length(&mut body, "delta ticks", tick - last_tick)?;
        last_tick = tick;
        let status = message.status();
        if running_status != Some(status) {
            body.push(status);
            running_status = Some(status);
        }
        body.extend(message.data());
    }

    write_meta(&mut body, meta::END_OF_TRACK, &[])?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smf::{LoadedFile, TrackEventKind};

    fn single_track() -> EncodeOptions {
        EncodeOptions {
            format: Format::SingleTrack,
            ticks_per_quarter: 96,
        }
    }

    #[test]
    fn test_format_0_layout() {
        let mut song = Timeline::new("ab");
        song.add_note(60, 0.0, 0.5, 100, 0).unwrap();
        let bytes = encode(&song, &single_track()).unwrap();

        assert_eq!(&bytes[..14], b"MThd\0\0\0\x06\0\0\0\x01\0\x60");
        assert_eq!(&bytes[14..18], b"MTrk");
        let body = &bytes[22..];
        assert_eq!(
            body,
            &[
                0x00, 0xFF, 0x03, 0x02, b'a', b'b', // name
                0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // tempo
                0x00, 0x90, 0x3C, 0x64, // note on
                0x60, 0x80, 0x3C, 0x40, // note off after 96 ticks
                0x00, 0xFF, 0x2F, 0x00,
            ]
        );
        assert_eq!(u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]) as usize, body.len());
    }

    #[test]
    fn test_running_status_compression() {
        let mut song = Timeline::new("");
        song.add_note(60, 0.0, 1.0, 100, 0).unwrap();
        song.add_note(64, 0.0, 1.0, 100, 0).unwrap();
        let bytes = encode(&song, &single_track()).unwrap();

        // One status byte per run of same-status events.
        let note_on_count = bytes.iter().filter(|&&b| b == 0x90).count();
        let note_off_count = bytes.iter().filter(|&&b| b == 0x80).count();
        assert_eq!(note_on_count, 1);
        assert_eq!(note_off_count, 1);

        let decoded = LoadedFile::decode(&bytes).unwrap().to_timeline("").unwrap();
        assert_eq!(decoded.events(), song.events());
    }

    #[test]
    fn test_format_1_splits_channels() {
        let mut song = Timeline::new("parts");
        song.add_program_change(0.0, 33, 1).unwrap();
        song.add_note(40, 0.0, 0.5, 90, 1).unwrap();
        song.add_note(72, 0.25, 0.25, 70, 9).unwrap();
        let bytes = encode(&song, &EncodeOptions::default()).unwrap();

        let loaded = LoadedFile::decode(&bytes).unwrap();
        assert_eq!(loaded.format(), Format::Parallel);
        assert_eq!(loaded.tracks().len(), 3);
        assert_eq!(loaded.name(), Some("parts"));
        let channels: Vec<u8> = loaded.tracks()[1]
            .events
            .iter()
            .filter_map(|e| match &e.kind {
                TrackEventKind::Channel(c) => c.to_message().map(|m| m.channel()),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec![1, 1, 1]);
        assert_eq!(loaded.to_timeline("parts").unwrap().len(), song.len());
    }

    #[test]
    fn test_rejects_bad_division() {
        let song = Timeline::new("x");
        let options = EncodeOptions {
            format: Format::SingleTrack,
            ticks_per_quarter: 0,
        };
        assert!(matches!(
            encode(&song, &options),
            Err(MidiError::InvalidParameter {
                field: "ticks_per_quarter",
                ..
            })
        ));
        let options = EncodeOptions {
            format: Format::SingleTrack,
            ticks_per_quarter: 0x8000,
        };
        assert!(encode(&song, &options).is_err());
    }

    #[test]
    fn test_tempo_is_written() {
        let song = Timeline::with_tempo("slow", 60.0).unwrap();
        let loaded = LoadedFile::decode(&encode(&song, &single_track()).unwrap()).unwrap();
        assert_eq!(loaded.tempo_map().initial_uspq(), 1_000_000);
    }
}
