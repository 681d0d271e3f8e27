//! # Audio Extractor
//!
//! Reads ID3 tags from MPEG audio files.
//!
//! - ID3v2.2, v2.3 and v2.4 at the start of the file (title, artist, album)
//! - ID3v1 in the last 128 bytes, used for fields v2 did not provide
//!
//! Artist and album become their own resources so that every track by the
//! same artist points at one `nmm:Artist`. Their URNs are derived from the
//! names, which makes them stable across runs and shared between files.

use super::{AuxResource, ExtractedMetadata, ExtractionFailure, Extractor, ModuleInfo, minted_urn};
use crate::types::Term;
use crate::vocab::{
    GRAPH_AUDIO, NIE_TITLE, NMM_ALBUM_ARTIST, NMM_ARTIST, NMM_ARTIST_NAME, NMM_MUSIC_ALBUM,
    NMM_MUSIC_ALBUM_PROP, NMM_MUSIC_PIECE, NMM_PERFORMER,
};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Largest ID3v2 tag we are willing to read.
const MAX_TAG_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct AudioExtractor;

/// Fields read from the tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl Tags {
    fn fill_from(&mut self, other: Tags) {
        self.title = self.title.take().or(other.title);
        self.artist = self.artist.take().or(other.artist);
        self.album = self.album.take().or(other.album);
    }
}

impl Extractor for AudioExtractor {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "audio",
            version: 1,
            graph: GRAPH_AUDIO,
            mime_types: &["audio/mpeg", "audio/mp3", "audio/x-mpeg"],
        }
    }

    fn extract(&self, path: &Path, _mime: &str) -> Result<ExtractedMetadata, ExtractionFailure> {
        let tags = read_tags(path)?;
        let mut metadata = ExtractedMetadata::of_types(&[NMM_MUSIC_PIECE]);

        if let Some(title) = &tags.title {
            metadata.set(NIE_TITLE, Term::literal(title));
        }

        let artist = tags.artist.as_ref().map(|name| {
            let urn = minted_urn("artist", &[name.as_str()]);
            metadata.resources.push(AuxResource {
                subject: urn.clone(),
                types: vec![NMM_ARTIST.to_string()],
                properties: vec![(NMM_ARTIST_NAME.to_string(), Term::literal(name))],
            });
            metadata.set(NMM_PERFORMER, Term::Uri(urn.clone()));
            urn
        });

        if let Some(album) = &tags.album {
            let artist_name = tags.artist.as_deref().unwrap_or_default();
            let urn = minted_urn("album", &[artist_name, album.as_str()]);
            let mut properties = vec![(NIE_TITLE.to_string(), Term::literal(album))];
            if let Some(artist) = artist {
                properties.push((NMM_ALBUM_ARTIST.to_string(), Term::Uri(artist)));
            }
            metadata.resources.push(AuxResource {
                subject: urn.clone(),
                types: vec![NMM_MUSIC_ALBUM.to_string()],
                properties,
            });
            metadata.set(NMM_MUSIC_ALBUM_PROP, Term::Uri(urn));
        }

        Ok(metadata)
    }
}

/// Read ID3v2 and ID3v1 tags, v2 taking precedence.
pub fn read_tags(path: &Path) -> Result<Tags, ExtractionFailure> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut tags = Tags::default();
    let mut header = [0u8; 10];
    if len >= 10 {
        file.read_exact(&mut header)?;
        if &header[..3] == b"ID3" {
            let size = syncsafe(&header[6..10]);
            if size > MAX_TAG_SIZE || (size as u64) + 10 > len {
                return Err(ExtractionFailure::Malformed(format!(
                    "ID3v2 tag of {} bytes exceeds file",
                    size
                )));
            }
            let mut body = vec![0u8; size];
            file.read_exact(&mut body)?;
            tags = parse_id3v2(header[3], header[5], &body)?;
        }
    }

    if len >= 128 {
        file.seek(SeekFrom::End(-128))?;
        let mut v1 = [0u8; 128];
        file.read_exact(&mut v1)?;
        if &v1[..3] == b"TAG" {
            tags.fill_from(Tags {
                title: latin1_field(&v1[3..33]),
                artist: latin1_field(&v1[33..63]),
                album: latin1_field(&v1[63..93]),
            });
        }
    }
    Ok(tags)
}

fn syncsafe(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7f) as usize)
}

fn big_endian(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
}

fn parse_id3v2(major: u8, flags: u8, body: &[u8]) -> Result<Tags, ExtractionFailure> {
    let truncated = || ExtractionFailure::Malformed("truncated ID3v2 frame".into());
    let (id_len, header_len) = match major {
        2 => (3, 6),
        3 | 4 => (4, 10),
        v => {
            return Err(ExtractionFailure::Unsupported(format!("ID3v2.{}", v)));
        }
    };

    let mut pos = 0;
    if flags & 0x40 != 0 && major >= 3 {
        let ext = body.get(..4).ok_or_else(truncated)?;
        pos = if major == 4 {
            syncsafe(ext)
        } else {
            big_endian(ext) + 4
        };
    }

    let mut tags = Tags::default();
    while pos + header_len <= body.len() {
        let frame = &body[pos..pos + header_len];
        if frame[0] == 0 {
            break;
        }
        let id = &frame[..id_len];
        let size = match major {
            2 => big_endian(&frame[3..6]),
            3 => big_endian(&frame[4..8]),
            _ => syncsafe(&frame[4..8]),
        };
        let start = pos + header_len;
        let data = body.get(start..start + size).ok_or_else(truncated)?;
        pos = start + size;

        let slot = match id {
            b"TIT2" | b"TT2" => &mut tags.title,
            b"TPE1" | b"TP1" => &mut tags.artist,
            b"TALB" | b"TAL" => &mut tags.album,
            _ => continue,
        };
        if slot.is_none() {
            *slot = decode_text(data)?;
        }
    }
    Ok(tags)
}

/// Decode a text frame: encoding byte followed by the string.
fn decode_text(data: &[u8]) -> Result<Option<String>, ExtractionFailure> {
    let Some((&encoding, raw)) = data.split_first() else {
        return Ok(None);
    };
    let text = match encoding {
        0 => raw.iter().map(|&b| b as char).collect::<String>(),
        1 => match raw {
            [0xff, 0xfe, rest @ ..] => utf16(rest, u16::from_le_bytes),
            [0xfe, 0xff, rest @ ..] => utf16(rest, u16::from_be_bytes),
            _ => utf16(raw, u16::from_le_bytes),
        },
        2 => utf16(raw, u16::from_be_bytes),
        3 => String::from_utf8(raw.to_vec())
            .map_err(|_| ExtractionFailure::Malformed("invalid UTF-8 in ID3 frame".into()))?,
        e => {
            return Err(ExtractionFailure::Malformed(format!(
                "unknown ID3 text encoding {}",
                e
            )));
        }
    };
    let text = text.trim_end_matches('\0').trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

fn utf16(raw: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = raw.chunks_exact(2).map(|c| unit([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

fn latin1_field(raw: &[u8]) -> Option<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text: String = raw[..end].iter().map(|&b| b as char).collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
