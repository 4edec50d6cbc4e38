//! Temporary image pool for per-frame intermediates.
//!
//! Instead of creating and destroying images every frame, the [`ImagePool`]
//! keeps released images in free lists keyed by [`ImageDesc`] and hands them
//! out again on the next matching acquisition. Handles are moved into
//! [`ImagePool::release`], so a handle cannot be released twice or used after
//! release.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::error::RenderError;
use crate::image_desc::{FilterMode, ImageDesc, ImageHandle};
use crate::stages::ShaderStages;

/// Free images kept per descriptor.
const DEFAULT_MAX_FREE_PER_DESC: usize = 4;

/// An image on loan from an [`ImagePool`].
///
/// Return it with [`ImagePool::release`]. Dropping it instead frees the image
/// and leaves it counted as outstanding until [`ImagePool::end_frame`].
#[must_use = "pooled images must be returned with ImagePool::release"]
#[derive(Debug)]
pub struct PooledImage<I> {
    image: I,
    desc: ImageDesc,
}

impl<I> PooledImage<I> {
    pub fn desc(&self) -> ImageDesc {
        self.desc
    }
}

impl<I> Deref for PooledImage<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.image
    }
}

impl<I> DerefMut for PooledImage<I> {
    fn deref_mut(&mut self) -> &mut I {
        &mut self.image
    }
}

/// Lifetime counters for an [`ImagePool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful acquisitions.
    pub acquired: u64,
    /// Handles returned through `release`.
    pub released: u64,
    /// Acquisitions that created a new image.
    pub allocated: u64,
    /// Acquisitions served from a free list.
    pub reused: u64,
    /// Handles dropped without release, reconciled at frame end.
    pub written_off: u64,
}

/// A pool of temporary images bucketed by size and format.
pub struct ImagePool<I> {
    free: HashMap<ImageDesc, Vec<I>>,
    max_free_per_desc: usize,
    outstanding: usize,
    stats: PoolStats,
}

impl<I> ImagePool<I> {
    /// Create a new empty pool.
    pub fn new() -> Self {
        Self::with_max_free(DEFAULT_MAX_FREE_PER_DESC)
    }

    /// Create a pool that keeps at most `max_free_per_desc` released images
    /// of each descriptor. Zero disables recycling.
    pub fn with_max_free(max_free_per_desc: usize) -> Self {
        Self {
            free: HashMap::new(),
            max_free_per_desc,
            outstanding: 0,
            stats: PoolStats::default(),
        }
    }

    /// Acquire an image matching `desc`. Contents are undefined and the
    /// filter is [`FilterMode::default`], whether or not the image is recycled.
    pub fn acquire<D>(&mut self, device: &mut D, desc: ImageDesc) -> Result<PooledImage<I>, RenderError>
    where
        D: ShaderStages<Image = I>,
        I: ImageHandle,
    {
        if desc.is_empty() {
            return Err(RenderError::ZeroSizedImage {
                width: desc.width,
                height: desc.height,
            });
        }

        let image = match self.free.get_mut(&desc).and_then(Vec::pop) {
            Some(mut image) => {
                image.set_filter(FilterMode::default());
                self.stats.reused += 1;
                image
            }
            None => {
                let image = device.create_image(desc)?;
                self.stats.allocated += 1;
                log::trace!(
                    "Pool allocated {}x{} {:?}",
                    desc.width,
                    desc.height,
                    desc.format
                );
                image
            }
        };

        self.outstanding += 1;
        self.stats.acquired += 1;
        Ok(PooledImage { image, desc })
    }

    /// Return an image to the pool.
    pub fn release(&mut self, pooled: PooledImage<I>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.stats.released += 1;

        let bucket = self.free.entry(pooled.desc).or_default();
        if bucket.len() < self.max_free_per_desc {
            bucket.push(pooled.image);
        }
    }

    /// Close the current frame. Returns how many handles were still out.
    ///
    /// Handles still out at this point were dropped on an error path; their
    /// images are already freed, so they are only written off here.
    pub fn end_frame(&mut self) -> usize {
        let leaked = self.outstanding;
        if leaked > 0 {
            log::warn!("{leaked} temporary image(s) not released this frame, writing off");
            self.stats.written_off += leaked as u64;
            self.outstanding = 0;
        }
        leaked
    }

    /// Drop every free image.
    pub fn trim(&mut self) {
        self.free.clear();
    }

    /// Handles currently on loan.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of free images across all descriptors.
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl<I> Default for ImagePool<I> {
    fn default() -> Self {
        Self::new()
    }
}
