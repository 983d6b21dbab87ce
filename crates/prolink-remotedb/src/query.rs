//! Query addressing and the records built from menu items.

use crate::error::{RemoteDbError, Result};
use crate::fields::Field;
use crate::message::{Message, MessageType};
use bytes::{Buf, Bytes};
use prolink_core::types::{DeviceId, MediaSlot, TrackType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Menu a query renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuTarget {
    Main = 0x01,
}

/// Addressing context of a query, packed into one UInt32 argument as
/// `[host device, menu target, track slot, track type]` (big endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupDescriptor {
    pub host_device: DeviceId,
    pub menu_target: MenuTarget,
    pub track_slot: MediaSlot,
    pub track_type: TrackType,
}

impl LookupDescriptor {
    pub fn new(host_device: DeviceId, track_slot: MediaSlot, track_type: TrackType) -> Self {
        Self {
            host_device,
            menu_target: MenuTarget::Main,
            track_slot,
            track_type,
        }
    }

    pub fn to_field(&self) -> Field {
        Field::UInt32(u32::from_be_bytes([
            self.host_device,
            self.menu_target as u8,
            self.track_slot.as_byte(),
            self.track_type.as_byte(),
        ]))
    }
}

macro_rules! item_types {
    ($($name:ident = $value:literal,)*) => {
        /// Kind of a menu item
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ItemType {
            $($name,)*
            Unknown(u16),
        }

        impl From<u16> for ItemType {
            fn from(value: u16) -> Self {
                match value {
                    $($value => ItemType::$name,)*
                    other => ItemType::Unknown(other),
                }
            }
        }
    };
}

item_types! {
    Folder = 0x0001,
    AlbumTitle = 0x0002,
    Disc = 0x0003,
    TrackTitle = 0x0004,
    Genre = 0x0006,
    Artist = 0x0007,
    Playlist = 0x0008,
    Rating = 0x000a,
    Duration = 0x000b,
    Tempo = 0x000d,
    Label = 0x000e,
    Key = 0x000f,
    BitRate = 0x0010,
    Year = 0x0011,
    ColorNone = 0x0013,
    ColorPink = 0x0014,
    ColorRed = 0x0015,
    ColorOrange = 0x0016,
    ColorYellow = 0x0017,
    ColorGreen = 0x0018,
    ColorAqua = 0x0019,
    ColorBlue = 0x001a,
    ColorPurple = 0x001b,
    Comment = 0x0023,
    HistoryPlaylist = 0x0024,
    Path = 0x0026,
    OriginalArtist = 0x0028,
    Remixer = 0x0029,
    DateAdded = 0x002e,
}

/// Track color label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackColor {
    None,
    Pink,
    Red,
    Orange,
    Yellow,
    Green,
    Aqua,
    Blue,
    Purple,
}

impl ItemType {
    fn color(&self) -> Option<TrackColor> {
        let color = match self {
            ItemType::ColorNone => TrackColor::None,
            ItemType::ColorPink => TrackColor::Pink,
            ItemType::ColorRed => TrackColor::Red,
            ItemType::ColorOrange => TrackColor::Orange,
            ItemType::ColorYellow => TrackColor::Yellow,
            ItemType::ColorGreen => TrackColor::Green,
            ItemType::ColorAqua => TrackColor::Aqua,
            ItemType::ColorBlue => TrackColor::Blue,
            ItemType::ColorPurple => TrackColor::Purple,
            _ => return None,
        };
        Some(color)
    }
}

/// One decoded menu item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub parent_id: u32,
    pub main_id: u32,
    pub label1: String,
    pub label2: String,
    pub item_type: ItemType,
    pub flags: u32,
    pub artwork_id: u32,
}

impl Item {
    /// Decodes a MenuItem message
    pub fn from_message(message: &Message) -> Result<Self> {
        if message.kind != MessageType::MenuItem {
            return Err(RemoteDbError::InvalidMessage(format!(
                "expected a menu item, got {:?}",
                message.kind
            )));
        }

        Ok(Self {
            parent_id: message.u32_arg(0)?,
            main_id: message.u32_arg(1)?,
            label1: message.str_arg(3)?.to_string(),
            label2: message.str_arg(5)?.to_string(),
            item_type: ItemType::from((message.u32_arg(6)? & 0xffff) as u16),
            flags: message.u32_arg(7)?,
            artwork_id: message.u32_arg(8)?,
        })
    }
}

/// An id and name pair (artist, album, genre, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named {
    pub id: u32,
    pub name: String,
}

/// Track metadata assembled from a metadata menu
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u32,
    pub title: String,
    pub artist: Option<Named>,
    pub original_artist: Option<Named>,
    pub remixer: Option<Named>,
    pub album: Option<Named>,
    pub genre: Option<Named>,
    pub label: Option<Named>,
    pub key: Option<Named>,
    pub comment: String,
    pub duration: Duration,
    /// Beats per minute
    pub tempo: f64,
    pub rating: u32,
    pub color: Option<TrackColor>,
    pub artwork_id: Option<u32>,
    pub year: Option<u32>,
    pub bitrate: Option<u32>,
    pub date_added: Option<String>,
    /// Filled in by a track info query
    pub file_path: Option<String>,
}

impl Track {
    /// Builds a track out of the items of a metadata menu
    pub fn from_items(items: &[Item]) -> Self {
        let mut track = Track::default();

        let named = |item: &Item| {
            Some(Named {
                id: item.main_id,
                name: item.label1.clone(),
            })
        };

        for item in items {
            match item.item_type {
                ItemType::TrackTitle => {
                    track.id = item.main_id;
                    track.title = item.label1.clone();
                    if item.artwork_id != 0 {
                        track.artwork_id = Some(item.artwork_id);
                    }
                }
                ItemType::Artist => track.artist = named(item),
                ItemType::OriginalArtist => track.original_artist = named(item),
                ItemType::Remixer => track.remixer = named(item),
                ItemType::AlbumTitle => track.album = named(item),
                ItemType::Genre => track.genre = named(item),
                ItemType::Label => track.label = named(item),
                ItemType::Key => track.key = named(item),
                ItemType::Comment => track.comment = item.label1.clone(),
                ItemType::Duration => track.duration = Duration::from_secs(item.main_id as u64),
                ItemType::Tempo => track.tempo = item.main_id as f64 / 100.0,
                ItemType::Rating => track.rating = item.main_id,
                ItemType::Year => track.year = Some(item.main_id),
                ItemType::BitRate => track.bitrate = Some(item.main_id),
                ItemType::DateAdded => track.date_added = Some(item.label1.clone()),
                ItemType::Path => track.file_path = Some(item.label1.clone()),
                other => {
                    // The last color item wins
                    if let Some(color) = other.color() {
                        track.color = Some(color);
                    }
                }
            }
        }

        track
    }
}

/// One beat of a beat grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Position within the bar, 1 to 4
    pub count: u8,
    /// Tempo at this beat
    pub bpm: f64,
    /// Time of the beat from the start of the track
    pub offset_ms: u32,
}

/// Offset of the first beat entry in a beat grid blob
const BEAT_GRID_HEADER: usize = 0x14;
const BEAT_ENTRY_LEN: usize = 0x10;

/// Parses the beat grid blob returned by the player. Unlike the protocol
/// fields, the blob is little endian.
pub fn parse_beat_grid(blob: &Bytes) -> Vec<Beat> {
    if blob.len() <= BEAT_GRID_HEADER {
        return Vec::new();
    }

    blob[BEAT_GRID_HEADER..]
        .chunks_exact(BEAT_ENTRY_LEN)
        .map(|mut entry| {
            let count = entry.get_u8();
            entry.advance(1);
            let bpm = entry.get_u16_le() as f64 / 100.0;
            let offset_ms = entry.get_u32_le();
            Beat {
                count,
                bpm,
                offset_ms,
            }
        })
        .collect()
}

/// A folder or playlist in the playlist tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: u32,
    pub name: String,
    pub is_folder: bool,
}

/// A track listed in a playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub id: u32,
    pub title: String,
}

/// Contents of one level of the playlist tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistContents {
    pub folders: Vec<PlaylistEntry>,
    pub playlists: Vec<PlaylistEntry>,
    pub tracks: Vec<TrackEntry>,
}

impl PlaylistContents {
    pub fn from_items(items: &[Item]) -> Self {
        let mut contents = PlaylistContents::default();

        for item in items {
            match item.item_type {
                ItemType::Folder => contents.folders.push(PlaylistEntry {
                    id: item.main_id,
                    name: item.label1.clone(),
                    is_folder: true,
                }),
                ItemType::Playlist => contents.playlists.push(PlaylistEntry {
                    id: item.main_id,
                    name: item.label1.clone(),
                    is_folder: false,
                }),
                ItemType::TrackTitle => contents.tracks.push(TrackEntry {
                    id: item.main_id,
                    title: item.label1.clone(),
                }),
                _ => {}
            }
        }

        contents
    }
}

#[cfg(test)]
pub(crate) fn item_message(txid: u32, item_type: u16, main_id: u32, label1: &str, label2: &str) -> Message {
    Message::new(
        txid,
        MessageType::MenuItem,
        vec![
            Field::UInt32(0),
            Field::UInt32(main_id),
            Field::UInt32((label1.encode_utf16().count() as u32 + 1) * 2),
            Field::from(label1),
            Field::UInt32((label2.encode_utf16().count() as u32 + 1) * 2),
            Field::from(label2),
            Field::UInt32(item_type as u32),
            Field::UInt32(0),
            Field::UInt32(if item_type == 0x0004 { 99 } else { 0 }),
        ],
    )
}
