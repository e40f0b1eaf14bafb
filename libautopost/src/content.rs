//! Caption and image rotation
//!
//! Captions are claimed in memory from selection until the selection is
//! dropped, so concurrent workers sharing a rotator never post the same
//! caption. The `used = 0` guard in the commit still covers rotators in
//! other processes.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;

use crate::db::{self, Database};
use crate::error::{ContentExhausted, Result};
use crate::types::{Caption, Image};

/// What an account will post this tick; the caption stays claimed while
/// this is alive
#[derive(Debug)]
pub struct ContentSelection {
    pub caption: Caption,
    pub image: Option<Image>,
    _claim: CaptionClaim,
}

/// Releases a caption claim on drop
#[derive(Debug)]
struct CaptionClaim {
    claims: Arc<DashMap<String, String>>,
    caption_id: String,
}

impl Drop for CaptionClaim {
    fn drop(&mut self) {
        self.claims.remove(&self.caption_id);
    }
}

#[derive(Clone)]
pub struct ContentRotator {
    db: Database,
    /// caption id -> account id holding it
    claims: Arc<DashMap<String, String>>,
}

impl ContentRotator {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            claims: Arc::new(DashMap::new()),
        }
    }

    /// Pick the oldest unclaimed unused caption and the least recently used
    /// image
    ///
    /// Returns `AutopostError::ContentExhausted` when every unused caption is
    /// gone or claimed by another worker. A missing image is fine; the post
    /// goes out caption-only.
    pub async fn select_content(&self, account_id: &str) -> Result<ContentSelection> {
        let (caption, claim) = self.claim_caption(account_id).await?;
        let image = self.db.least_used_image().await?;

        tracing::debug!(
            account_id = %account_id,
            caption_id = %caption.id,
            image_id = image.as_ref().map(|i| i.id.as_str()).unwrap_or("-"),
            "Selected content"
        );

        Ok(ContentSelection {
            caption,
            image,
            _claim: claim,
        })
    }

    /// Captions currently held by in-flight selections
    pub fn claimed(&self) -> usize {
        self.claims.len()
    }

    async fn claim_caption(&self, account_id: &str) -> Result<(Caption, CaptionClaim)> {
        loop {
            // One more row than there are claims guarantees an unclaimed
            // candidate unless the pool is exhausted or claims grew meanwhile
            let limit = self.claims.len() + 1;
            let candidates = self.db.unused_captions(limit).await?;
            let fetched = candidates.len();

            for caption in candidates {
                if let Entry::Vacant(slot) = self.claims.entry(caption.id.clone()) {
                    slot.insert(account_id.to_string());
                    let claim = CaptionClaim {
                        claims: Arc::clone(&self.claims),
                        caption_id: caption.id.clone(),
                    };
                    return Ok((caption, claim));
                }
            }

            if fetched < limit {
                tracing::debug!(
                    account_id = %account_id,
                    claimed = self.claims.len(),
                    "Caption pool exhausted"
                );
                return Err(ContentExhausted.into());
            }
        }
    }

    /// Consume the selection inside the caller's transaction
    ///
    /// Returns false when the caption had already been taken by a rotator
    /// in another process; the image counter is still bumped since the post
    /// did go out.
    pub async fn mark_used(
        conn: &mut SqliteConnection,
        selection: &ContentSelection,
        now: i64,
    ) -> Result<bool> {
        let fresh = db::mark_caption_used(conn, &selection.caption.id, now).await?;
        if !fresh {
            tracing::warn!(
                caption_id = %selection.caption.id,
                "Caption was already marked used elsewhere"
            );
        }

        if let Some(image) = &selection.image {
            db::mark_image_used(conn, &image.id, now).await?;
        }

        Ok(fresh)
    }

    /// Put every caption back into rotation
    pub async fn reset(&self) -> Result<u64> {
        let count = self.db.reset_captions().await?;
        tracing::info!("Reset {} captions to unused", count);
        Ok(count)
    }
}
