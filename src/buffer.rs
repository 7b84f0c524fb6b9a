//! opaque buffer handles and the allocator contract
//!
//! the core never owns pixel memory, a [`Buffer`] is a handle whose backing
//! storage belongs to whatever [`BufferAllocator`] produced it. [`SlabAllocator`]
//! is the in-memory allocator used by the demo binary and the tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

bitflags::bitflags! {
    /// how a buffer may be used by the display pipeline
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const RENDER  = 1 << 0;
        const SCANOUT = 1 << 1;
        const CURSOR  = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    pub fn next() -> BufferId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Size {
        Size { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Abgr8888,
    Argb8888,
    Xrgb8888,
    Abgr2101010,
    Argb2101010,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        // every supported format is a packed 32bit format
        4
    }
}

/// handle to a block of pixel data owned by a [`BufferAllocator`]
pub trait Buffer: Send + Sync {
    fn id(&self) -> BufferId;
    fn size(&self) -> Size;
    fn pixel_format(&self) -> PixelFormat;

    fn flags(&self) -> BufferFlags {
        BufferFlags::RENDER
    }
}

/// external collaborator producing [`Buffer`] handles
///
/// gpu backed allocators live behind this seam, the core only ever asks for
/// a buffer of a given size and format
pub trait BufferAllocator: Send + Sync {
    fn alloc_buffer(&self, size: Size, format: PixelFormat) -> Arc<dyn Buffer>;

    fn supported_formats(&self) -> &[PixelFormat];
}

/// plain heap allocator, one `Vec<u8>` per buffer
pub struct SlabAllocator;

impl BufferAllocator for SlabAllocator {
    fn alloc_buffer(&self, size: Size, format: PixelFormat) -> Arc<dyn Buffer> {
        let len = size.width as usize * size.height as usize * format.bytes_per_pixel();
        Arc::new(SlabBuffer {
            id: BufferId::next(),
            size,
            format,
            _pixels: vec![0; len],
        })
    }

    fn supported_formats(&self) -> &[PixelFormat] {
        crate::config::SUPPORTED_FORMATS
    }
}

struct SlabBuffer {
    id: BufferId,
    size: Size,
    format: PixelFormat,
    _pixels: Vec<u8>,
}

impl Buffer for SlabBuffer {
    fn id(&self) -> BufferId {
        self.id
    }

    fn size(&self) -> Size {
        self.size
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    // plain memory, nothing stops an output from scanning it out directly
    fn flags(&self) -> BufferFlags {
        BufferFlags::RENDER | BufferFlags::SCANOUT
    }
}
