//! Paged retrieval of menu items.
//!
//! Items are requested 64 at a time. Each page is framed by a MenuHeader and
//! a MenuFooter around its MenuItems:
//!
//! ```text
//! -> RenderMenu [descriptor, offset, count, 0, total, 0x0c]
//! <- MenuHeader
//! <- MenuItem x count
//! <- MenuFooter
//! ```
//!
//! The pager holds the connection for its whole life. Dropping it before the
//! last footer is read leaves unread frames on the wire, so the connection is
//! poisoned.

use crate::connection::ConnectionGuard;
use crate::error::Result;
use crate::fields::Field;
use crate::message::MessageType;
use crate::query::{Item, LookupDescriptor};
use futures::Stream;
use tracing::{debug, warn};

/// Items requested per RenderMenu
pub const PAGE_SIZE: u32 = 64;

/// Trailing RenderMenu argument the players expect
const RENDER_FLAGS: u32 = 0x0c;

/// Forward-only pager over the items of a menu
pub struct MenuItems<'a> {
    guard: Option<ConnectionGuard<'a>>,
    descriptor: LookupDescriptor,
    total: u32,
    read: u32,
    /// Set while an exchange is partially complete
    in_flight: bool,
}

impl<'a> MenuItems<'a> {
    pub(crate) fn new(guard: ConnectionGuard<'a>, descriptor: LookupDescriptor, total: u32) -> Self {
        Self {
            guard: Some(guard),
            descriptor,
            total,
            read: 0,
            in_flight: false,
        }
    }

    /// Number of items the menu holds
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Number of items yielded so far
    pub fn read(&self) -> u32 {
        self.read
    }

    /// Yields the next item, or `None` once every item was read.
    ///
    /// After an error the pager is finished and the connection poisoned.
    pub async fn next_item(&mut self) -> Result<Option<Item>> {
        if self.read >= self.total {
            // Release the connection as soon as the menu is exhausted
            self.guard = None;
            return Ok(None);
        }

        let Some(guard) = self.guard.as_mut() else {
            return Ok(None);
        };

        self.in_flight = true;
        match Self::advance(guard, self.descriptor, self.read, self.total).await {
            Ok(item) => {
                self.read += 1;
                self.in_flight = false;
                if self.read == self.total {
                    self.guard = None;
                }
                Ok(Some(item))
            }
            Err(e) => {
                if let Some(guard) = self.guard.take() {
                    guard.poison();
                }
                self.in_flight = false;
                Err(e)
            }
        }
    }

    async fn advance(
        guard: &mut ConnectionGuard<'a>,
        descriptor: LookupDescriptor,
        read: u32,
        total: u32,
    ) -> Result<Item> {
        if read % PAGE_SIZE == 0 {
            // Never ask past the end: the last page covers exactly the rest
            let count = PAGE_SIZE.min(total - read);
            debug!(offset = read, count = count, total = total, "Rendering menu page");

            guard
                .write_message(
                    MessageType::RenderMenu,
                    vec![
                        descriptor.to_field(),
                        Field::UInt32(read),
                        Field::UInt32(count),
                        Field::UInt32(0),
                        Field::UInt32(total),
                        Field::UInt32(RENDER_FLAGS),
                    ],
                )
                .await?;
            guard.read_message(MessageType::MenuHeader).await?;
        }

        let message = guard.read_message(MessageType::MenuItem).await?;
        let item = Item::from_message(&message)?;

        let read = read + 1;
        if read % PAGE_SIZE == 0 || read == total {
            guard.read_message(MessageType::MenuFooter).await?;
        }

        Ok(item)
    }

    /// Reads every remaining item
    pub async fn collect_all(mut self) -> Result<Vec<Item>> {
        let mut items = Vec::with_capacity((self.total - self.read) as usize);
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Adapts the pager into a [`Stream`]. The stream ends after the first
    /// error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Item>> + 'a {
        futures::stream::unfold(Some(self), |state| async move {
            let mut items = state?;
            match items.next_item().await {
                Ok(Some(item)) => Some((Ok(item), Some(items))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Drop for MenuItems<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if self.read < self.total || self.in_flight {
                warn!(
                    read = self.read,
                    total = self.total,
                    "Menu abandoned before all items were read"
                );
                guard.poison();
            }
        }
    }
}

impl std::fmt::Debug for MenuItems<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuItems")
            .field("total", &self.total)
            .field("read", &self.read)
            .field("finished", &self.guard.is_none())
            .finish()
    }
}
