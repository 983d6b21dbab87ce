//! High level queries built on the lookup, render and simple exchanges.

use crate::connection::Connection;
use crate::error::Result;
use crate::fields::Field;
use crate::message::MessageType;
use crate::query::{parse_beat_grid, Beat, ItemType, LookupDescriptor, PlaylistContents, Track};
use bytes::Bytes;
use tracing::debug;

/// Argument holding the payload of binary responses
const BINARY_PAYLOAD_ARG: usize = 3;

impl Connection {
    /// Metadata of an analyzed track
    pub async fn get_metadata(&self, descriptor: LookupDescriptor, track_id: u32) -> Result<Track> {
        let items = self
            .query_menu(MessageType::GetMetadata, descriptor, vec![Field::UInt32(track_id)])
            .await?
            .collect_all()
            .await?;

        debug!(track_id = track_id, items = items.len(), "Metadata received");
        Ok(Track::from_items(&items))
    }

    /// Metadata of a track rekordbox did not analyze
    pub async fn get_generic_metadata(&self, descriptor: LookupDescriptor, track_id: u32) -> Result<Track> {
        let items = self
            .query_menu(
                MessageType::GetGenericMetadata,
                descriptor,
                vec![Field::UInt32(track_id)],
            )
            .await?
            .collect_all()
            .await?;

        Ok(Track::from_items(&items))
    }

    /// Path of the track's file on the media, if the device reports one
    pub async fn get_track_info(&self, descriptor: LookupDescriptor, track_id: u32) -> Result<Option<String>> {
        let items = self
            .query_menu(MessageType::GetTrackInfo, descriptor, vec![Field::UInt32(track_id)])
            .await?
            .collect_all()
            .await?;

        Ok(items
            .into_iter()
            .find(|item| item.item_type == ItemType::Path)
            .map(|item| item.label1))
    }

    pub async fn get_beat_grid(&self, descriptor: LookupDescriptor, track_id: u32) -> Result<Vec<Beat>> {
        let response = self
            .query_single(
                MessageType::GetBeatGrid,
                descriptor,
                vec![Field::UInt32(track_id)],
                MessageType::BeatGrid,
            )
            .await?;

        Ok(parse_beat_grid(&response.binary_arg(BINARY_PAYLOAD_ARG)?))
    }

    /// Artwork image (JPEG) for an artwork id
    pub async fn get_artwork(&self, descriptor: LookupDescriptor, artwork_id: u32) -> Result<Bytes> {
        let response = self
            .query_single(
                MessageType::GetArtwork,
                descriptor,
                vec![Field::UInt32(artwork_id)],
                MessageType::Artwork,
            )
            .await?;

        response.binary_arg(BINARY_PAYLOAD_ARG)
    }

    /// Raw waveform preview blob
    pub async fn get_waveform_preview(&self, descriptor: LookupDescriptor, track_id: u32) -> Result<Bytes> {
        let response = self
            .query_single(
                MessageType::GetWaveformPreview,
                descriptor,
                vec![
                    Field::UInt32(4),
                    Field::UInt32(track_id),
                    Field::UInt32(0),
                ],
                MessageType::WaveformPreview,
            )
            .await?;

        response.binary_arg(BINARY_PAYLOAD_ARG)
    }

    /// One level of the playlist tree. `None` lists the root folder.
    pub async fn get_playlist(
        &self,
        descriptor: LookupDescriptor,
        id: Option<u32>,
        is_folder: bool,
    ) -> Result<PlaylistContents> {
        let items = self
            .query_menu(
                MessageType::GetPlaylist,
                descriptor,
                vec![
                    Field::UInt32(0), // sort order
                    Field::UInt32(id.unwrap_or(0)),
                    Field::UInt32(is_folder as u32),
                ],
            )
            .await?
            .collect_all()
            .await?;

        Ok(PlaylistContents::from_items(&items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::query::{item_message, Named};
    use crate::testing::{menu_responder, FakeDatabase};
    use bytes::{BufMut, BytesMut};
    use prolink_core::types::{MediaSlot, TrackType};
    use std::time::Duration;

    fn binary_response(txid: u32, kind: MessageType, payload: Bytes) -> Vec<Message> {
        vec![Message::new(
            txid,
            kind,
            vec![
                Field::UInt32(0),
                Field::UInt32(0),
                Field::UInt32(payload.len() as u32),
                Field::Binary(payload),
            ],
        )]
    }

    #[tokio::test]
    async fn test_get_metadata() {
        let items = vec![
            item_message(0, 0x0004, 42, "Strobe", ""),
            item_message(0, 0x0007, 3, "deadmau5", ""),
            item_message(0, 0x000b, 634, "", ""),
            item_message(0, 0x000d, 12800, "", ""),
        ];
        let (conn, server) = FakeDatabase::start(menu_responder(items)).await;
        let descriptor = conn.descriptor(MediaSlot::Usb, TrackType::Rb);

        let track = conn.get_metadata(descriptor, 42).await.unwrap();
        assert_eq!(track.title, "Strobe");
        assert_eq!(
            track.artist,
            Some(Named {
                id: 3,
                name: "deadmau5".to_string()
            })
        );
        assert_eq!(track.duration, Duration::from_secs(634));
        assert_eq!(track.tempo, 128.0);

        drop(conn);
        let log = server.finish().await;
        let request = &log.requests[0];
        assert_eq!(request.kind, MessageType::GetMetadata);
        assert_eq!(request.args[0], descriptor.to_field());
        assert_eq!(request.u32_arg(1).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_get_track_info() {
        let items = vec![
            item_message(0, 0x0004, 42, "Strobe", ""),
            item_message(0, 0x0026, 0, "/Contents/deadmau5/Strobe.mp3", ""),
        ];
        let (conn, _server) = FakeDatabase::start(menu_responder(items)).await;
        let descriptor = conn.descriptor(MediaSlot::Usb, TrackType::Rb);

        assert_eq!(
            conn.get_track_info(descriptor, 42).await.unwrap().as_deref(),
            Some("/Contents/deadmau5/Strobe.mp3")
        );
    }

    #[tokio::test]
    async fn test_get_beat_grid() {
        let mut blob = BytesMut::new();
        blob.put_bytes(0, 0x14);
        for (count, time) in [(1u8, 100u32), (2, 569), (3, 1038)] {
            blob.put_u8(count);
            blob.put_u8(0);
            blob.put_u16_le(12800);
            blob.put_u32_le(time);
            blob.put_bytes(0, 8);
        }
        let blob = blob.freeze();

        let (conn, _server) = FakeDatabase::start(move |request, txid| {
            assert_eq!(request.kind, MessageType::GetBeatGrid);
            binary_response(txid, MessageType::BeatGrid, blob.clone())
        })
        .await;
        let descriptor = conn.descriptor(MediaSlot::Rb, TrackType::Rb);

        let beats = conn.get_beat_grid(descriptor, 42).await.unwrap();
        assert_eq!(beats.len(), 3);
        assert_eq!(beats[2].count, 3);
        assert_eq!(beats[2].offset_ms, 1038);
        assert_eq!(beats[0].bpm, 128.0);
    }

    #[tokio::test]
    async fn test_get_artwork_and_waveform() {
        let (conn, server) = FakeDatabase::start(|request, txid| match request.kind {
            MessageType::GetArtwork => {
                binary_response(txid, MessageType::Artwork, Bytes::from_static(b"\xff\xd8jpeg"))
            }
            _ => binary_response(txid, MessageType::WaveformPreview, Bytes::from_static(&[1, 2, 3])),
        })
        .await;
        let descriptor = conn.descriptor(MediaSlot::Usb, TrackType::Rb);

        let art = conn.get_artwork(descriptor, 7).await.unwrap();
        assert_eq!(&art[..], b"\xff\xd8jpeg");

        let preview = conn.get_waveform_preview(descriptor, 42).await.unwrap();
        assert_eq!(&preview[..], &[1, 2, 3]);

        drop(conn);
        let log = server.finish().await;
        assert_eq!(log.requests[1].kind, MessageType::GetWaveformPreview);
        assert_eq!(log.requests[1].u32_arg(2).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_get_playlist() {
        let items = vec![
            item_message(0, 0x0001, 10, "Sets", ""),
            item_message(0, 0x0008, 11, "Warmup", ""),
            item_message(0, 0x0004, 42, "Strobe", ""),
            item_message(0, 0x0004, 43, "Ghosts 'n' Stuff", ""),
        ];
        let (conn, server) = FakeDatabase::start(menu_responder(items)).await;
        let descriptor = conn.descriptor(MediaSlot::Usb, TrackType::Rb);

        let contents = conn.get_playlist(descriptor, Some(5), false).await.unwrap();
        assert_eq!(contents.folders.len(), 1);
        assert_eq!(contents.playlists.len(), 1);
        assert_eq!(contents.tracks.len(), 2);
        assert_eq!(contents.tracks[1].id, 43);

        drop(conn);
        let log = server.finish().await;
        let request = &log.requests[0];
        assert_eq!(request.kind, MessageType::GetPlaylist);
        assert_eq!(request.u32_arg(2).unwrap(), 5);
        assert_eq!(request.u32_arg(3).unwrap(), 0);
    }
}
