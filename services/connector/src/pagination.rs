use async_trait::async_trait;

use crate::error::ConnectorError;

/// One page of a cursor-based listing.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// A cursor-addressable listing endpoint.
#[async_trait]
pub trait PageSource: Send {
    type Item: Send;

    /// Fetch the page at `cursor` (`None` means the first page).
    async fn fetch(&mut self, cursor: Option<&str>) -> Result<CursorPage<Self::Item>, ConnectorError>;
}

/// Drive a cursor-based listing into a finite item sequence: request a page,
/// collect its items, follow the next-cursor until none remains or the page
/// cap is hit. One invocation is not restartable; resuming means
/// re-supplying a cursor from a checkpoint.
pub async fn drain_pages<S: PageSource>(
    source: &mut S,
    start_cursor: Option<String>,
    max_pages: Option<u32>,
) -> Result<Vec<S::Item>, ConnectorError> {
    let mut items = Vec::new();
    let mut cursor = start_cursor;
    let mut pages = 0u32;

    loop {
        if let Some(cap) = max_pages {
            if pages >= cap {
                return Ok(items);
            }
        }

        let page = source.fetch(cursor.as_deref()).await?;
        items.extend(page.items);
        pages += 1;

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }
}
