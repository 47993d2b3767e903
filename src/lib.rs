//! Pure in-memory codec for classic Macintosh HFS volume images.
//!
//! Given a byte image, [`Volume::read`] materialises the directory tree;
//! given a tree, [`Volume::write`] serialises a self-consistent image of a
//! requested size. There is no file I/O anywhere in this crate — a caller
//! supplies and receives plain `&[u8]`/`Vec<u8>` byte buffers.
//!
//! ```
//! use hfs::{Entry, File, Volume, WriteOptions};
//!
//! let mut vol = Volume::new();
//! vol.root.insert("hello.txt", Entry::File(File {
//!     data: b"hello world".to_vec(),
//!     ..Default::default()
//! })).unwrap();
//!
//! let image = vol.write(&WriteOptions::new(800 * 1024)).unwrap();
//! let back = Volume::read(&image).unwrap();
//! assert_eq!(back.root.get("hello.txt").unwrap().as_file().unwrap().data, b"hello world");
//! ```

mod bits;
pub mod btree;
pub mod catalog;
pub mod directory;
pub mod error;
pub mod extents;
pub mod macroman;
mod resourcefork;
pub mod volume;

pub use directory::{Entry, File, Folder, NodeRef};
pub use error::{HfsError, Result};
pub use volume::{Volume, WriteOptions};
